//! Bounded exponential retry for model calls.
//!
//! Only errors classified as transient ([`collab_core::Error::is_transient`]) are retried;
//! configuration and input errors surface on the first attempt.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use tracing::warn;

use collab_core::{defaults, GenerationBackend, Result};

/// Retry policy for a single logical model call.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts including the first one. Never below 1.
    pub max_attempts: u32,
    /// Delay before the second attempt.
    pub base_delay: Duration,
    /// Maximum delay cap.
    pub max_delay: Duration,
    /// Jitter factor (0.0-1.0); the delay varies by up to this fraction either way.
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: defaults::LLM_MAX_ATTEMPTS,
            base_delay: Duration::from_millis(defaults::LLM_RETRY_BASE_MS),
            max_delay: Duration::from_millis(defaults::LLM_RETRY_MAX_MS),
            jitter: 0.2,
        }
    }
}

impl RetryPolicy {
    /// Load from `LLM_MAX_ATTEMPTS`, `LLM_RETRY_BASE_MS` and `LLM_RETRY_MAX_MS`.
    pub fn from_env() -> Self {
        let mut policy = Self::default();
        if let Some(n) = std::env::var("LLM_MAX_ATTEMPTS")
            .ok()
            .and_then(|s| s.parse::<u32>().ok())
        {
            policy.max_attempts = n.max(1);
        }
        if let Some(ms) = std::env::var("LLM_RETRY_BASE_MS")
            .ok()
            .and_then(|s| s.parse().ok())
        {
            policy.base_delay = Duration::from_millis(ms);
        }
        if let Some(ms) = std::env::var("LLM_RETRY_MAX_MS")
            .ok()
            .and_then(|s| s.parse().ok())
        {
            policy.max_delay = Duration::from_millis(ms);
        }
        policy
    }

    /// A policy that makes exactly one attempt.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Default::default()
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    pub fn with_delays(mut self, base: Duration, max: Duration) -> Self {
        self.base_delay = base;
        self.max_delay = max;
        self
    }

    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter.clamp(0.0, 1.0);
        self
    }

    /// Un-jittered delay after the given failed attempt (1-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        let shift = (attempt - 1).min(20);
        self.base_delay
            .saturating_mul(1u32 << shift)
            .min(self.max_delay)
    }

    fn jittered(&self, attempt: u32) -> Duration {
        let delay = self.delay_for_attempt(attempt);
        if self.jitter <= 0.0 || delay.is_zero() {
            return delay;
        }
        let factor = rand::thread_rng().gen_range(1.0 - self.jitter..=1.0 + self.jitter);
        delay.mul_f64(factor).min(self.max_delay)
    }

    /// Run `op` until it succeeds, fails non-transiently, or attempts run out.
    ///
    /// `op` receives the 1-based attempt number.
    pub async fn run<T, F, Fut>(&self, operation: &str, mut op: F) -> Result<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match op(attempt).await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() && attempt < max_attempts => {
                    let delay = self.jittered(attempt);
                    warn!(
                        subsystem = "inference",
                        op = operation,
                        attempt,
                        max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Transient failure, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// A [`GenerationBackend`] that retries transient failures of its inner backend.
pub struct RetryingBackend<B> {
    inner: B,
    policy: RetryPolicy,
}

impl<B: GenerationBackend> RetryingBackend<B> {
    pub fn new(inner: B, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn inner(&self) -> &B {
        &self.inner
    }
}

#[async_trait]
impl<B: GenerationBackend> GenerationBackend for RetryingBackend<B> {
    async fn generate_with_system(&self, system: &str, prompt: &str) -> Result<String> {
        self.policy
            .run("generate", |_| self.inner.generate_with_system(system, prompt))
            .await
    }

    fn model_name(&self) -> &str {
        self.inner.model_name()
    }
}
