//! Proposal store: transactional persistence of evaluations plus the
//! read-only query surface used by the swipe queue and admin dashboards.

use async_trait::async_trait;
use sqlx::postgres::PgRow;
use sqlx::{Pool, Postgres, Row};
use tracing::{debug, info};
use uuid::Uuid;

use collab_core::error::is_unique_violation;
use collab_core::{
    new_v7, CollaborationProposal, CollaborationType, ConfidenceTier, Error, GenerationResult,
    MatchingOutcome, MatchingResult, MatchingStats, PairContext, PairKey, ProposalStore,
    ProposalVisibility, Result, StoreOutcome,
};

const PROPOSAL_COLUMNS: &str = "id, researcher_a_id, researcher_b_id, profile_version_a, \
    profile_version_b, title, collaboration_type, scientific_question, one_line_summary_a, \
    one_line_summary_b, detailed_rationale, lab_a_contributions, lab_b_contributions, \
    lab_a_benefits, lab_b_benefits, proposed_first_experiment, anchoring_publication_ids, \
    confidence_tier, reasoning, visibility_a, visibility_b, llm_model, content_hash, created_at";

const RESULT_COLUMNS: &str = "id, researcher_a_id, researcher_b_id, profile_version_a, \
    profile_version_b, outcome, proposal_count, discarded_count, deduplicated_count, llm_model, \
    evaluated_at";

/// PostgreSQL implementation of [`ProposalStore`].
#[derive(Clone)]
pub struct PgProposalStore {
    pool: Pool<Postgres>,
}

impl PgProposalStore {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    fn parse_proposal_row(row: &PgRow) -> Result<CollaborationProposal> {
        let collaboration_type: String = row.try_get("collaboration_type")?;
        let confidence_tier: String = row.try_get("confidence_tier")?;
        let visibility_a: String = row.try_get("visibility_a")?;
        let visibility_b: String = row.try_get("visibility_b")?;

        Ok(CollaborationProposal {
            id: row.try_get("id")?,
            researcher_a_id: row.try_get("researcher_a_id")?,
            researcher_b_id: row.try_get("researcher_b_id")?,
            profile_version_a: row.try_get("profile_version_a")?,
            profile_version_b: row.try_get("profile_version_b")?,
            title: row.try_get("title")?,
            collaboration_type: CollaborationType::parse(&collaboration_type).ok_or_else(|| {
                Error::Serialization(format!("unknown collaboration type: {}", collaboration_type))
            })?,
            scientific_question: row.try_get("scientific_question")?,
            one_line_summary_a: row.try_get("one_line_summary_a")?,
            one_line_summary_b: row.try_get("one_line_summary_b")?,
            detailed_rationale: row.try_get("detailed_rationale")?,
            lab_a_contributions: row.try_get("lab_a_contributions")?,
            lab_b_contributions: row.try_get("lab_b_contributions")?,
            lab_a_benefits: row.try_get("lab_a_benefits")?,
            lab_b_benefits: row.try_get("lab_b_benefits")?,
            proposed_first_experiment: row.try_get("proposed_first_experiment")?,
            anchoring_publication_ids: row.try_get("anchoring_publication_ids")?,
            confidence_tier: ConfidenceTier::parse(&confidence_tier).ok_or_else(|| {
                Error::Serialization(format!("unknown confidence tier: {}", confidence_tier))
            })?,
            reasoning: row.try_get("reasoning")?,
            visibility_a: ProposalVisibility::parse(&visibility_a)?,
            visibility_b: ProposalVisibility::parse(&visibility_b)?,
            llm_model: row.try_get("llm_model")?,
            content_hash: row.try_get("content_hash")?,
            created_at: row.try_get("created_at")?,
        })
    }

    fn parse_result_row(row: &PgRow) -> Result<MatchingResult> {
        let outcome: String = row.try_get("outcome")?;
        Ok(MatchingResult {
            id: row.try_get("id")?,
            researcher_a_id: row.try_get("researcher_a_id")?,
            researcher_b_id: row.try_get("researcher_b_id")?,
            profile_version_a: row.try_get("profile_version_a")?,
            profile_version_b: row.try_get("profile_version_b")?,
            outcome: MatchingOutcome::parse(&outcome)?,
            proposal_count: row.try_get("proposal_count")?,
            discarded_count: row.try_get("discarded_count")?,
            deduplicated_count: row.try_get("deduplicated_count")?,
            llm_model: row.try_get("llm_model")?,
            evaluated_at: row.try_get("evaluated_at")?,
        })
    }

    /// Proposals involving a researcher on either side, newest first.
    pub async fn proposals_for_user(
        &self,
        user_id: Uuid,
        limit: i64,
    ) -> Result<Vec<CollaborationProposal>> {
        let rows = sqlx::query(&format!(
            "SELECT {PROPOSAL_COLUMNS} FROM collaboration_proposal
             WHERE researcher_a_id = $1 OR researcher_b_id = $1
             ORDER BY created_at DESC
             LIMIT $2"
        ))
        .bind(user_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        rows.iter().map(Self::parse_proposal_row).collect()
    }

    /// Every proposal stored for a pair, across all profile versions.
    pub async fn proposals_for_pair(&self, pair: PairKey) -> Result<Vec<CollaborationProposal>> {
        let rows = sqlx::query(&format!(
            "SELECT {PROPOSAL_COLUMNS} FROM collaboration_proposal
             WHERE researcher_a_id = $1 AND researcher_b_id = $2
             ORDER BY created_at"
        ))
        .bind(pair.researcher_a_id())
        .bind(pair.researcher_b_id())
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        rows.iter().map(Self::parse_proposal_row).collect()
    }

    /// Evaluation history of a pair, oldest first.
    pub async fn results_for_pair(&self, pair: PairKey) -> Result<Vec<MatchingResult>> {
        let rows = sqlx::query(&format!(
            "SELECT {RESULT_COLUMNS} FROM matching_result
             WHERE researcher_a_id = $1 AND researcher_b_id = $2
             ORDER BY profile_version_a, profile_version_b"
        ))
        .bind(pair.researcher_a_id())
        .bind(pair.researcher_b_id())
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        rows.iter().map(Self::parse_result_row).collect()
    }

    /// Aggregate counts for admin dashboards.
    pub async fn matching_stats(&self) -> Result<MatchingStats> {
        let results = sqlx::query(
            "SELECT
                COUNT(*) AS total_results,
                COUNT(*) FILTER (WHERE outcome = 'proposals_generated') AS proposals_generated,
                COUNT(*) FILTER (WHERE outcome = 'no_proposal') AS no_proposal,
                COUNT(*) FILTER (WHERE evaluated_at > now() - INTERVAL '24 hours') AS last_24h
             FROM matching_result",
        )
        .fetch_one(&self.pool)
        .await
        .map_err(Error::Database)?;

        let proposals = sqlx::query(
            "SELECT
                COUNT(*) AS total,
                COUNT(*) FILTER (WHERE confidence_tier = 'high') AS high,
                COUNT(*) FILTER (WHERE confidence_tier = 'moderate') AS moderate,
                COUNT(*) FILTER (WHERE confidence_tier = 'speculative') AS speculative
             FROM collaboration_proposal",
        )
        .fetch_one(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(MatchingStats {
            total_results: results.try_get("total_results")?,
            proposals_generated: results.try_get("proposals_generated")?,
            no_proposal: results.try_get("no_proposal")?,
            evaluations_last_24h: results.try_get("last_24h")?,
            total_proposals: proposals.try_get("total")?,
            high_confidence: proposals.try_get("high")?,
            moderate_confidence: proposals.try_get("moderate")?,
            speculative_confidence: proposals.try_get("speculative")?,
        })
    }
}

#[async_trait]
impl ProposalStore for PgProposalStore {
    async fn store_proposals_and_result(
        &self,
        context: &PairContext,
        result: &GenerationResult,
    ) -> Result<StoreOutcome> {
        let key = context.evaluation_key();
        let (visibility_a, visibility_b) = context.direction.initial_visibility();

        let mut tx = self.pool.begin().await.map_err(Error::Database)?;

        // The result row goes first: losing the uniqueness race here means a
        // concurrent worker already owns this evaluation, and nothing else is written.
        let result_id = new_v7();
        let inserted = sqlx::query(
            "INSERT INTO matching_result
                (id, researcher_a_id, researcher_b_id, profile_version_a, profile_version_b,
                 outcome, proposal_count, discarded_count, deduplicated_count, llm_model)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)",
        )
        .bind(result_id)
        .bind(key.pair.researcher_a_id())
        .bind(key.pair.researcher_b_id())
        .bind(key.profile_version_a)
        .bind(key.profile_version_b)
        .bind(result.outcome().as_str())
        .bind(result.proposals.len() as i32)
        .bind(result.discarded as i32)
        .bind(result.deduplicated as i32)
        .bind(&result.model)
        .execute(&mut *tx)
        .await;

        match inserted {
            Ok(_) => {}
            Err(e) if is_unique_violation(&e) => {
                tx.rollback().await.map_err(Error::Database)?;
                debug!(
                    subsystem = "db",
                    component = "proposal_store",
                    op = "store",
                    researcher_a_id = %key.pair.researcher_a_id(),
                    researcher_b_id = %key.pair.researcher_b_id(),
                    profile_version_a = key.profile_version_a,
                    profile_version_b = key.profile_version_b,
                    "Evaluation already recorded by another worker"
                );
                return Ok(StoreOutcome {
                    stored: 0,
                    already_evaluated: true,
                });
            }
            Err(e) => return Err(Error::Database(e)),
        }

        let mut stored = 0usize;
        for draft in &result.proposals {
            let done = sqlx::query(
                "INSERT INTO collaboration_proposal
                    (id, researcher_a_id, researcher_b_id, profile_version_a, profile_version_b,
                     title, collaboration_type, scientific_question, one_line_summary_a,
                     one_line_summary_b, detailed_rationale, lab_a_contributions,
                     lab_b_contributions, lab_a_benefits, lab_b_benefits,
                     proposed_first_experiment, anchoring_publication_ids, confidence_tier,
                     reasoning, visibility_a, visibility_b, llm_model, content_hash)
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15,
                         $16, $17, $18, $19, $20, $21, $22, $23)
                 ON CONFLICT (researcher_a_id, researcher_b_id, profile_version_a,
                              profile_version_b, content_hash) DO NOTHING",
            )
            .bind(new_v7())
            .bind(key.pair.researcher_a_id())
            .bind(key.pair.researcher_b_id())
            .bind(key.profile_version_a)
            .bind(key.profile_version_b)
            .bind(&draft.title)
            .bind(draft.collaboration_type.as_str())
            .bind(&draft.scientific_question)
            .bind(&draft.one_line_summary_a)
            .bind(&draft.one_line_summary_b)
            .bind(&draft.detailed_rationale)
            .bind(&draft.lab_a_contributions)
            .bind(&draft.lab_b_contributions)
            .bind(&draft.lab_a_benefits)
            .bind(&draft.lab_b_benefits)
            .bind(&draft.proposed_first_experiment)
            .bind(&draft.anchoring_publication_ids)
            .bind(draft.confidence_tier.as_str())
            .bind(&draft.reasoning)
            .bind(visibility_a.as_str())
            .bind(visibility_b.as_str())
            .bind(&result.model)
            .bind(&draft.fingerprint)
            .execute(&mut *tx)
            .await
            .map_err(Error::Database)?;

            stored += done.rows_affected() as usize;
        }

        if stored != result.proposals.len() {
            let collapsed = (result.proposals.len() - stored) as i32;
            let outcome = if stored == 0 {
                MatchingOutcome::NoProposal
            } else {
                MatchingOutcome::ProposalsGenerated
            };
            sqlx::query(
                "UPDATE matching_result
                 SET proposal_count = $2, deduplicated_count = deduplicated_count + $3,
                     outcome = $4
                 WHERE id = $1",
            )
            .bind(result_id)
            .bind(stored as i32)
            .bind(collapsed)
            .bind(outcome.as_str())
            .execute(&mut *tx)
            .await
            .map_err(Error::Database)?;
        }

        tx.commit().await.map_err(Error::Database)?;

        info!(
            subsystem = "db",
            component = "proposal_store",
            op = "store",
            researcher_a_id = %key.pair.researcher_a_id(),
            researcher_b_id = %key.pair.researcher_b_id(),
            profile_version_a = key.profile_version_a,
            profile_version_b = key.profile_version_b,
            result_count = stored,
            "Evaluation stored"
        );
        Ok(StoreOutcome {
            stored,
            already_evaluated: false,
        })
    }
}
