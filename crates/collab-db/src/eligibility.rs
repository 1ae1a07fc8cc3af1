//! Eligible pair resolution.
//!
//! The whole eligibility predicate lives in one query: pool reachability,
//! the target's incoming-proposal preference, profile presence, and the
//! absence of a matching result at the pair's current profile versions.
//! There is no second filter in application code.

use std::time::Instant;

use async_trait::async_trait;
use sqlx::{Pool, Postgres, Row};
use tracing::debug;
use uuid::Uuid;

use collab_core::{
    EligibilityResolver, Error, PairCandidate, PairScope, PoolDirection, Result,
};

/// Edges count when the target accepts incoming proposals or selected the
/// source back. Pairs come out canonically ordered via LEAST/GREATEST, which
/// matches `PairKey`'s byte-wise uuid ordering.
const ELIGIBLE_PAIRS_SQL: &str = "
WITH edges AS (
    SELECT e.user_id AS src, e.target_user_id AS dst
    FROM match_pool_entry e
    WHERE ($1::uuid IS NULL OR e.user_id = $1 OR e.target_user_id = $1)
      AND ($2::uuid IS NULL OR (
            LEAST(e.user_id, e.target_user_id) = $2
            AND GREATEST(e.user_id, e.target_user_id) = $3))
),
counted AS (
    SELECT ed.src, ed.dst
    FROM edges ed
    JOIN researcher_user tu ON tu.id = ed.dst
    WHERE tu.allow_incoming_proposals
       OR EXISTS (
            SELECT 1 FROM match_pool_entry rev
            WHERE rev.user_id = ed.dst AND rev.target_user_id = ed.src)
),
pairs AS (
    SELECT LEAST(src, dst) AS researcher_a_id,
           GREATEST(src, dst) AS researcher_b_id,
           bool_or(src < dst) AS a_selected_b,
           bool_or(src > dst) AS b_selected_a
    FROM counted
    GROUP BY 1, 2
)
SELECT p.researcher_a_id, p.researcher_b_id,
       pa.profile_version AS profile_version_a,
       pb.profile_version AS profile_version_b,
       p.a_selected_b, p.b_selected_a
FROM pairs p
JOIN researcher_profile pa ON pa.user_id = p.researcher_a_id
JOIN researcher_profile pb ON pb.user_id = p.researcher_b_id
WHERE NOT EXISTS (
    SELECT 1 FROM matching_result m
    WHERE m.researcher_a_id = p.researcher_a_id
      AND m.researcher_b_id = p.researcher_b_id
      AND m.profile_version_a = pa.profile_version
      AND m.profile_version_b = pb.profile_version)
ORDER BY p.researcher_a_id, p.researcher_b_id
";

/// Bind parameters for a scope: `(user, pair_a, pair_b)`.
fn scope_params(scope: PairScope) -> (Option<Uuid>, Option<Uuid>, Option<Uuid>) {
    match scope {
        PairScope::All => (None, None, None),
        PairScope::User(user_id) => (Some(user_id), None, None),
        PairScope::Pair(pair) => (
            None,
            Some(pair.researcher_a_id()),
            Some(pair.researcher_b_id()),
        ),
    }
}

/// PostgreSQL implementation of [`EligibilityResolver`].
#[derive(Clone)]
pub struct PgEligibilityResolver {
    pool: Pool<Postgres>,
}

impl PgEligibilityResolver {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl EligibilityResolver for PgEligibilityResolver {
    async fn compute_eligible_pairs(&self, scope: PairScope) -> Result<Vec<PairCandidate>> {
        let start = Instant::now();
        let (user, pair_a, pair_b) = scope_params(scope);

        let rows = sqlx::query(ELIGIBLE_PAIRS_SQL)
            .bind(user)
            .bind(pair_a)
            .bind(pair_b)
            .fetch_all(&self.pool)
            .await
            .map_err(Error::Database)?;

        let mut candidates = Vec::with_capacity(rows.len());
        for row in rows {
            let a_selected_b: bool = row.try_get("a_selected_b")?;
            let b_selected_a: bool = row.try_get("b_selected_a")?;
            // A counted edge always exists for a grouped pair.
            let Some(direction) = PoolDirection::from_edges(a_selected_b, b_selected_a) else {
                continue;
            };
            candidates.push(PairCandidate {
                researcher_a_id: row.try_get("researcher_a_id")?,
                researcher_b_id: row.try_get("researcher_b_id")?,
                profile_version_a: row.try_get("profile_version_a")?,
                profile_version_b: row.try_get("profile_version_b")?,
                direction,
            });
        }

        debug!(
            subsystem = "db",
            component = "resolver",
            op = "compute_eligible_pairs",
            scope = ?scope,
            result_count = candidates.len(),
            duration_ms = start.elapsed().as_millis() as u64,
            "Eligible pairs computed"
        );
        Ok(candidates)
    }
}
