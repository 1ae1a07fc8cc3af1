//! # collab-inference
//!
//! Generative model backend for the collaboration matching pipeline.
//!
//! This crate provides:
//! - OpenAI-compatible chat-completions backend
//! - HTTP error classification (retryable vs permanent)
//! - Bounded exponential retry with jitter ([`RetryPolicy`], [`RetryingBackend`])
//! - Scripted mock backend (feature `mock`)
//!
//! # Example
//!
//! ```rust,no_run
//! use collab_inference::{OpenAIBackend, RetryPolicy, RetryingBackend};
//!
//! let backend = RetryingBackend::new(OpenAIBackend::from_env().unwrap(), RetryPolicy::from_env());
//! ```

pub mod openai;
pub mod retry;

#[cfg(any(test, feature = "mock"))]
pub mod mock;

pub use openai::{OpenAIBackend, OpenAIConfig, OpenAIErrorCode};
pub use retry::{RetryPolicy, RetryingBackend};

/// Build the production backend from the environment: OpenAI-compatible
/// client wrapped in the configured retry policy.
pub fn backend_from_env() -> collab_core::Result<RetryingBackend<OpenAIBackend>> {
    Ok(RetryingBackend::new(
        OpenAIBackend::from_env()?,
        RetryPolicy::from_env(),
    ))
}
