//! # collab-matching
//!
//! The matching engine: turns a researcher pair into zero or more validated,
//! deduplicated collaboration proposal drafts.
//!
//! - [`assemble_context_for_pair`]: profiles, publications, existing proposals
//!   and pool direction, or `None` if the pair is no longer evaluable
//! - [`MatchingEngine::generate_proposals_for_pair`]: prompt, model call,
//!   parsing, per-candidate validation, one strict retry, fingerprint dedup
//!
//! Persisting the result is the proposal store's job (`collab-db`).

pub mod context;
pub mod dedup;
pub mod engine;
pub mod prompt;
pub mod validation;

pub use context::{assemble_context_for_pair, assemble_default_context};
pub use dedup::{fingerprint, normalize_text, Deduplicator};
pub use engine::{EngineConfig, MatchingEngine};
pub use prompt::{system_prompt, user_prompt, PromptOptions};
pub use validation::{parse_candidates, validate_candidates, Rejection, ValidationReport};
