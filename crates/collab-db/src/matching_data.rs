//! Read-side queries backing pair context assembly.

use async_trait::async_trait;
use sqlx::postgres::PgRow;
use sqlx::{Pool, Postgres, Row};
use uuid::Uuid;

use collab_core::{
    Error, ExistingProposal, MatchingDataSource, PairKey, PoolDirection, Publication,
    ResearcherProfile, Result,
};

/// PostgreSQL implementation of [`MatchingDataSource`].
#[derive(Clone)]
pub struct PgMatchingData {
    pool: Pool<Postgres>,
}

impl PgMatchingData {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    fn parse_profile_row(row: &PgRow) -> Result<ResearcherProfile> {
        Ok(ResearcherProfile {
            user_id: row.try_get("user_id")?,
            profile_version: row.try_get("profile_version")?,
            display_name: row.try_get("display_name")?,
            affiliation: row.try_get("affiliation")?,
            research_summary: row.try_get("research_summary")?,
            techniques: row.try_get("techniques")?,
            experimental_models: row.try_get("experimental_models")?,
            disease_areas: row.try_get("disease_areas")?,
            key_targets: row.try_get("key_targets")?,
            keywords: row.try_get("keywords")?,
            grant_titles: row.try_get("grant_titles")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

#[async_trait]
impl MatchingDataSource for PgMatchingData {
    async fn load_profile(&self, user_id: Uuid) -> Result<Option<ResearcherProfile>> {
        let row = sqlx::query(
            "SELECT p.user_id, p.profile_version, u.display_name, u.affiliation,
                    p.research_summary, p.techniques, p.experimental_models,
                    p.disease_areas, p.key_targets, p.keywords, p.grant_titles, p.updated_at
             FROM researcher_profile p
             JOIN researcher_user u ON u.id = p.user_id
             WHERE p.user_id = $1",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;

        row.as_ref().map(Self::parse_profile_row).transpose()
    }

    async fn load_publications(&self, user_id: Uuid, limit: usize) -> Result<Vec<Publication>> {
        let rows = sqlx::query(
            "SELECT id, user_id, external_id, title, journal, year, abstract_text
             FROM publication
             WHERE user_id = $1
             ORDER BY year DESC NULLS LAST, created_at DESC
             LIMIT $2",
        )
        .bind(user_id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        rows.iter()
            .map(|row| {
                Ok(Publication {
                    id: row.try_get("id")?,
                    user_id: row.try_get("user_id")?,
                    external_id: row.try_get("external_id")?,
                    title: row.try_get("title")?,
                    journal: row.try_get("journal")?,
                    year: row.try_get("year")?,
                    abstract_text: row.try_get("abstract_text")?,
                })
            })
            .collect()
    }

    async fn load_existing_proposals(&self, pair: PairKey) -> Result<Vec<ExistingProposal>> {
        let rows = sqlx::query(
            "SELECT id, profile_version_a, profile_version_b, title,
                    anchoring_publication_ids, content_hash
             FROM collaboration_proposal
             WHERE researcher_a_id = $1 AND researcher_b_id = $2
             ORDER BY created_at",
        )
        .bind(pair.researcher_a_id())
        .bind(pair.researcher_b_id())
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        rows.iter()
            .map(|row| {
                Ok(ExistingProposal {
                    id: row.try_get("id")?,
                    profile_version_a: row.try_get("profile_version_a")?,
                    profile_version_b: row.try_get("profile_version_b")?,
                    title: row.try_get("title")?,
                    anchoring_publication_ids: row.try_get("anchoring_publication_ids")?,
                    content_hash: row.try_get("content_hash")?,
                })
            })
            .collect()
    }

    async fn pool_direction(&self, pair: PairKey) -> Result<Option<PoolDirection>> {
        let (a_selected_b, b_selected_a): (bool, bool) = sqlx::query_as(
            "SELECT
                EXISTS (SELECT 1 FROM match_pool_entry WHERE user_id = $1 AND target_user_id = $2),
                EXISTS (SELECT 1 FROM match_pool_entry WHERE user_id = $2 AND target_user_id = $1)",
        )
        .bind(pair.researcher_a_id())
        .bind(pair.researcher_b_id())
        .fetch_one(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(PoolDirection::from_edges(a_selected_b, b_selected_a))
    }

    async fn list_profiled_users(&self) -> Result<Vec<Uuid>> {
        let ids = sqlx::query_scalar::<_, Uuid>(
            "SELECT user_id FROM researcher_profile ORDER BY user_id",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;
        Ok(ids)
    }
}
