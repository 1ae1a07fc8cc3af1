//! Core data models for the matching pipeline.
//!
//! These types are shared across crates and represent the domain entities
//! the pipeline reads (profiles, publications, pool entries) and writes
//! (proposals, matching results).

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::pair::{EvaluationKey, PairKey, PoolDirection, ProposalVisibility};
use crate::{Error, Result};

// =============================================================================
// RESEARCHER TYPES
// =============================================================================

/// Synthesized researcher profile. Read-only to the pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResearcherProfile {
    pub user_id: Uuid,
    /// Incremented by the profile service on every content change.
    pub profile_version: i32,
    pub display_name: String,
    pub affiliation: Option<String>,
    pub research_summary: String,
    pub techniques: Vec<String>,
    pub experimental_models: Vec<String>,
    pub disease_areas: Vec<String>,
    pub key_targets: Vec<String>,
    pub keywords: Vec<String>,
    pub grant_titles: Vec<String>,
    pub updated_at: DateTime<Utc>,
}

/// Publication record attached to a researcher.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Publication {
    pub id: Uuid,
    pub user_id: Uuid,
    /// Stable external identifier (PMID or DOI) used as the anchoring reference.
    pub external_id: String,
    pub title: String,
    pub journal: Option<String>,
    pub year: Option<i32>,
    pub abstract_text: Option<String>,
}

/// Provenance of a match pool entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PoolSource {
    Individual,
    Affiliation,
    AllUsers,
}

impl PoolSource {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Individual => "individual",
            Self::Affiliation => "affiliation",
            Self::AllUsers => "all_users",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "individual" => Ok(Self::Individual),
            "affiliation" => Ok(Self::Affiliation),
            "all_users" => Ok(Self::AllUsers),
            other => Err(Error::Serialization(format!("unknown pool source: {}", other))),
        }
    }
}

// =============================================================================
// PROPOSAL TYPES
// =============================================================================

/// Kind of collaboration a proposal describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CollaborationType {
    ComplementaryExpertise,
    SharedTechnique,
    DataSharing,
    ReagentExchange,
    JointGrant,
    MechanisticExtension,
}

impl CollaborationType {
    pub const ALL: [CollaborationType; 6] = [
        Self::ComplementaryExpertise,
        Self::SharedTechnique,
        Self::DataSharing,
        Self::ReagentExchange,
        Self::JointGrant,
        Self::MechanisticExtension,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::ComplementaryExpertise => "complementary_expertise",
            Self::SharedTechnique => "shared_technique",
            Self::DataSharing => "data_sharing",
            Self::ReagentExchange => "reagent_exchange",
            Self::JointGrant => "joint_grant",
            Self::MechanisticExtension => "mechanistic_extension",
        }
    }

    /// Lenient parse: accepts case and separator variants ("Shared technique").
    pub fn parse(s: &str) -> Option<Self> {
        let normalized = s.trim().to_lowercase().replace([' ', '-'], "_");
        Self::ALL
            .into_iter()
            .find(|t| t.as_str() == normalized)
    }
}

/// Categorical quality label attached to a proposal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfidenceTier {
    High,
    Moderate,
    Speculative,
}

impl ConfidenceTier {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::High => "high",
            Self::Moderate => "moderate",
            Self::Speculative => "speculative",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "high" => Some(Self::High),
            "moderate" | "medium" => Some(Self::Moderate),
            "speculative" | "low" => Some(Self::Speculative),
            _ => None,
        }
    }
}

/// A validated proposal produced by the matching engine, not yet stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProposalDraft {
    pub title: String,
    pub collaboration_type: CollaborationType,
    pub scientific_question: String,
    pub one_line_summary_a: String,
    pub one_line_summary_b: String,
    pub detailed_rationale: String,
    pub lab_a_contributions: String,
    pub lab_b_contributions: String,
    pub lab_a_benefits: String,
    pub lab_b_benefits: String,
    pub proposed_first_experiment: String,
    pub anchoring_publication_ids: Vec<String>,
    pub confidence_tier: ConfidenceTier,
    pub reasoning: Option<String>,
    /// Content fingerprint used for deduplication.
    pub fingerprint: String,
}

/// A stored collaboration proposal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollaborationProposal {
    pub id: Uuid,
    pub researcher_a_id: Uuid,
    pub researcher_b_id: Uuid,
    pub profile_version_a: i32,
    pub profile_version_b: i32,
    pub title: String,
    pub collaboration_type: CollaborationType,
    pub scientific_question: String,
    pub one_line_summary_a: String,
    pub one_line_summary_b: String,
    pub detailed_rationale: String,
    pub lab_a_contributions: String,
    pub lab_b_contributions: String,
    pub lab_a_benefits: String,
    pub lab_b_benefits: String,
    pub proposed_first_experiment: String,
    pub anchoring_publication_ids: Vec<String>,
    pub confidence_tier: ConfidenceTier,
    pub reasoning: Option<String>,
    pub visibility_a: ProposalVisibility,
    pub visibility_b: ProposalVisibility,
    pub llm_model: String,
    pub content_hash: String,
    pub created_at: DateTime<Utc>,
}

/// Minimal view of an already-stored proposal, used for anchoring and dedup hints.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExistingProposal {
    pub id: Uuid,
    pub profile_version_a: i32,
    pub profile_version_b: i32,
    pub title: String,
    pub anchoring_publication_ids: Vec<String>,
    pub content_hash: String,
}

// =============================================================================
// MATCHING RESULT TYPES
// =============================================================================

/// Outcome of one pair evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchingOutcome {
    ProposalsGenerated,
    NoProposal,
}

impl MatchingOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ProposalsGenerated => "proposals_generated",
            Self::NoProposal => "no_proposal",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "proposals_generated" => Ok(Self::ProposalsGenerated),
            "no_proposal" => Ok(Self::NoProposal),
            other => Err(Error::Serialization(format!(
                "unknown matching outcome: {}",
                other
            ))),
        }
    }
}

/// Durable evaluation record; at most one per `(pair, version_a, version_b)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchingResult {
    pub id: Uuid,
    pub researcher_a_id: Uuid,
    pub researcher_b_id: Uuid,
    pub profile_version_a: i32,
    pub profile_version_b: i32,
    pub outcome: MatchingOutcome,
    pub proposal_count: i32,
    pub discarded_count: i32,
    pub deduplicated_count: i32,
    pub llm_model: Option<String>,
    pub evaluated_at: DateTime<Utc>,
}

/// Everything the engine needs to evaluate one pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PairContext {
    pub pair: PairKey,
    pub researcher_a: ResearcherProfile,
    pub researcher_b: ResearcherProfile,
    pub publications_a: Vec<Publication>,
    pub publications_b: Vec<Publication>,
    /// Proposals already stored for this pair, at any profile versions.
    pub existing_proposals: Vec<ExistingProposal>,
    pub direction: PoolDirection,
}

impl PairContext {
    /// The evaluation tuple at the profile versions this context was read at.
    pub fn evaluation_key(&self) -> EvaluationKey {
        EvaluationKey {
            pair: self.pair,
            profile_version_a: self.researcher_a.profile_version,
            profile_version_b: self.researcher_b.profile_version,
        }
    }

    /// External identifiers of every publication either researcher authored.
    pub fn publication_ids(&self) -> HashSet<&str> {
        self.publications_a
            .iter()
            .chain(self.publications_b.iter())
            .map(|p| p.external_id.as_str())
            .collect()
    }

    /// Stored proposals at exactly this context's profile versions.
    pub fn proposals_at_current_versions(&self) -> impl Iterator<Item = &ExistingProposal> {
        let key = self.evaluation_key();
        self.existing_proposals.iter().filter(move |p| {
            p.profile_version_a == key.profile_version_a
                && p.profile_version_b == key.profile_version_b
        })
    }
}

/// Output of one engine run over a pair context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationResult {
    pub proposals: Vec<ProposalDraft>,
    /// Candidates that failed structural validation.
    pub discarded: usize,
    /// Candidates that duplicated another candidate or a stored proposal.
    pub deduplicated: usize,
    pub model: String,
}

impl GenerationResult {
    pub fn outcome(&self) -> MatchingOutcome {
        if self.proposals.is_empty() {
            MatchingOutcome::NoProposal
        } else {
            MatchingOutcome::ProposalsGenerated
        }
    }
}

/// What the proposal store did with one generation result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct StoreOutcome {
    pub stored: usize,
    /// A concurrent worker already recorded this evaluation tuple.
    pub already_evaluated: bool,
}

/// Aggregate statistics for admin dashboards.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MatchingStats {
    pub total_results: i64,
    pub proposals_generated: i64,
    pub no_proposal: i64,
    pub total_proposals: i64,
    pub high_confidence: i64,
    pub moderate_confidence: i64,
    pub speculative_confidence: i64,
    pub evaluations_last_24h: i64,
}
