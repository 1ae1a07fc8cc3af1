//! Matching engine: one model call per pair, validated and deduplicated.

use std::sync::Arc;
use std::time::Instant;

use serde_json::Value;
use tracing::{debug, info, warn};

use collab_core::{
    defaults, Error, GenerationBackend, GenerationResult, MatchingDataSource, PairContext,
    PairKey, Result,
};

use crate::context::assemble_context_for_pair;
use crate::dedup::Deduplicator;
use crate::prompt::{system_prompt, user_prompt, PromptOptions};
use crate::validation::{parse_candidates, validate_candidates, ValidationReport};

/// Engine tuning.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Most recent publications loaded per researcher.
    pub max_publications: usize,
    pub prompt: PromptOptions,
    /// Re-ask once with stricter instructions when nothing usable came back.
    pub strict_retry: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_publications: defaults::CONTEXT_MAX_PUBLICATIONS,
            prompt: PromptOptions::default(),
            strict_retry: true,
        }
    }
}

impl EngineConfig {
    pub fn with_max_publications(mut self, n: usize) -> Self {
        self.max_publications = n;
        self
    }

    pub fn with_strict_retry(mut self, enabled: bool) -> Self {
        self.strict_retry = enabled;
        self
    }
}

/// Generates collaboration proposals for pairs.
///
/// Transient model failures are retried by the backend itself (wrap it in a
/// retrying backend); the engine handles unusable output.
#[derive(Clone)]
pub struct MatchingEngine {
    backend: Arc<dyn GenerationBackend>,
    config: EngineConfig,
}

/// Parsed and validated output of one model call.
enum Attempt {
    Usable(ValidationReport),
    Unparseable(Error),
}

impl Attempt {
    /// Nothing survived: unparseable, or every candidate was rejected.
    fn needs_retry(&self) -> bool {
        match self {
            Attempt::Usable(report) => report.drafts.is_empty() && !report.rejections.is_empty(),
            Attempt::Unparseable(_) => true,
        }
    }

    fn rejected(&self) -> usize {
        match self {
            Attempt::Usable(report) => report.rejections.len(),
            Attempt::Unparseable(_) => 0,
        }
    }
}

impl MatchingEngine {
    pub fn new(backend: Arc<dyn GenerationBackend>) -> Self {
        Self::with_config(backend, EngineConfig::default())
    }

    pub fn with_config(backend: Arc<dyn GenerationBackend>, config: EngineConfig) -> Self {
        Self { backend, config }
    }

    pub fn model_name(&self) -> &str {
        self.backend.model_name()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// See [`assemble_context_for_pair`].
    pub async fn assemble_context_for_pair(
        &self,
        data: &dyn MatchingDataSource,
        pair: PairKey,
    ) -> Result<Option<PairContext>> {
        assemble_context_for_pair(data, pair, self.config.max_publications).await
    }

    async fn attempt(&self, context: &PairContext, user: &str, strict: bool) -> Result<Attempt> {
        let raw = self
            .backend
            .generate_with_system(&system_prompt(strict), user)
            .await?;

        let candidates: Vec<Value> = match parse_candidates(&raw) {
            Ok(candidates) => candidates,
            Err(e) => {
                warn!(
                    subsystem = "matching",
                    component = "engine",
                    pair = %context.pair,
                    strict,
                    error = %e,
                    "Model output unusable"
                );
                return Ok(Attempt::Unparseable(e));
            }
        };

        let report = validate_candidates(&candidates, context);
        for rejection in &report.rejections {
            warn!(
                subsystem = "matching",
                component = "engine",
                pair = %context.pair,
                strict,
                reason = %rejection,
                "Discarding proposal candidate"
            );
        }
        Ok(Attempt::Usable(report))
    }

    /// Invoke the model for a pair and return validated, deduplicated drafts.
    ///
    /// Fails with [`Error::Validation`] only when no attempt produced
    /// parseable output; model API errors propagate unchanged.
    pub async fn generate_proposals_for_pair(
        &self,
        context: &PairContext,
    ) -> Result<GenerationResult> {
        let start = Instant::now();
        let user = user_prompt(context, &self.config.prompt);

        let first = self.attempt(context, &user, false).await?;
        let mut discarded = first.rejected();

        let report = if first.needs_retry() && self.config.strict_retry {
            debug!(
                subsystem = "matching",
                pair = %context.pair,
                "Retrying generation with strict instructions"
            );
            match self.attempt(context, &user, true).await? {
                Attempt::Usable(report) => {
                    discarded += report.rejections.len();
                    report
                }
                Attempt::Unparseable(e) => match first {
                    // Second answer was worse; keep the first (all-rejected) one.
                    Attempt::Usable(report) => report,
                    Attempt::Unparseable(_) => return Err(e),
                },
            }
        } else {
            match first {
                Attempt::Usable(report) => report,
                Attempt::Unparseable(e) => return Err(e),
            }
        };

        let mut dedup = Deduplicator::for_context(context);
        let proposals: Vec<_> = report
            .drafts
            .into_iter()
            .filter(|draft| {
                let fresh = dedup.admit(draft);
                if !fresh {
                    debug!(
                        subsystem = "matching",
                        pair = %context.pair,
                        title = %draft.title,
                        "Duplicate proposal dropped"
                    );
                }
                fresh
            })
            .collect();

        let result = GenerationResult {
            proposals,
            discarded,
            deduplicated: dedup.rejected(),
            model: self.backend.model_name().to_string(),
        };

        info!(
            subsystem = "matching",
            component = "engine",
            op = "generate",
            researcher_a_id = %context.pair.researcher_a_id(),
            researcher_b_id = %context.pair.researcher_b_id(),
            model = %result.model,
            result_count = result.proposals.len(),
            discarded = result.discarded,
            deduplicated = result.deduplicated,
            duration_ms = start.elapsed().as_millis() as u64,
            "Proposal generation complete"
        );
        Ok(result)
    }
}
