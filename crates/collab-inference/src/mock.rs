//! Mock generation backend for deterministic testing.
//!
//! Replies are scripted in order; once the script runs out every call gets the
//! default response. Every call is logged for assertions.
//!
//! ## Usage
//!
//! ```rust
//! use collab_inference::mock::{MockGenerationBackend, MockReply};
//! use collab_core::GenerationBackend;
//!
//! #[tokio::main]
//! async fn main() {
//!     let backend = MockGenerationBackend::new()
//!         .with_reply(MockReply::Transient("503".into()))
//!         .with_default_response("[]");
//!
//!     assert!(backend.generate_with_system("", "p").await.is_err());
//!     assert_eq!(backend.generate_with_system("", "p").await.unwrap(), "[]");
//!     assert_eq!(backend.call_count(), 2);
//! }
//! ```

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;

use collab_core::{Error, GenerationBackend, Result};

/// One scripted reply.
#[derive(Debug, Clone)]
pub enum MockReply {
    /// Successful completion text.
    Text(String),
    /// Fails with a transient [`Error::Inference`].
    Transient(String),
    /// Fails with a non-transient [`Error::Config`].
    Fatal(String),
}

impl MockReply {
    fn into_result(self) -> Result<String> {
        match self {
            Self::Text(text) => Ok(text),
            Self::Transient(msg) => Err(Error::Inference(msg)),
            Self::Fatal(msg) => Err(Error::Config(msg)),
        }
    }
}

/// A logged generation call.
#[derive(Debug, Clone)]
pub struct MockCall {
    pub system: String,
    pub prompt: String,
}

/// Mock generation backend.
#[derive(Clone)]
pub struct MockGenerationBackend {
    model: String,
    default_response: String,
    latency: Duration,
    script: Arc<Mutex<VecDeque<MockReply>>>,
    call_log: Arc<Mutex<Vec<MockCall>>>,
}

impl Default for MockGenerationBackend {
    fn default() -> Self {
        Self::new()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl MockGenerationBackend {
    pub fn new() -> Self {
        Self {
            model: "mock-model".to_string(),
            default_response: "[]".to_string(),
            latency: Duration::ZERO,
            script: Arc::new(Mutex::new(VecDeque::new())),
            call_log: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Response used once the script is exhausted.
    pub fn with_default_response(mut self, response: impl Into<String>) -> Self {
        self.default_response = response.into();
        self
    }

    /// Append one scripted reply.
    pub fn with_reply(self, reply: MockReply) -> Self {
        lock(&self.script).push_back(reply);
        self
    }

    /// Append a successful scripted reply.
    pub fn with_text(self, text: impl Into<String>) -> Self {
        self.with_reply(MockReply::Text(text.into()))
    }

    /// Simulated latency for every call.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn calls(&self) -> Vec<MockCall> {
        lock(&self.call_log).clone()
    }

    pub fn call_count(&self) -> usize {
        lock(&self.call_log).len()
    }
}

#[async_trait]
impl GenerationBackend for MockGenerationBackend {
    async fn generate_with_system(&self, system: &str, prompt: &str) -> Result<String> {
        lock(&self.call_log).push(MockCall {
            system: system.to_string(),
            prompt: prompt.to_string(),
        });

        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        let next = lock(&self.script).pop_front();
        match next {
            Some(reply) => reply.into_result(),
            None => Ok(self.default_response.clone()),
        }
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_script_then_default() {
        let backend = MockGenerationBackend::new()
            .with_text("first")
            .with_reply(MockReply::Fatal("no key".into()))
            .with_default_response("fallback");

        assert_eq!(backend.generate_with_system("s", "p1").await.unwrap(), "first");
        let err = backend.generate_with_system("s", "p2").await.unwrap_err();
        assert!(!err.is_transient());
        assert_eq!(backend.generate_with_system("s", "p3").await.unwrap(), "fallback");

        let calls = backend.calls();
        assert_eq!(calls.len(), 3);
        assert_eq!(calls[1].prompt, "p2");
    }

    #[tokio::test]
    async fn test_clones_share_script_and_log() {
        let backend = MockGenerationBackend::new().with_text("only once");
        let clone = backend.clone();

        assert_eq!(clone.generate_with_system("", "x").await.unwrap(), "only once");
        assert_eq!(backend.generate_with_system("", "y").await.unwrap(), "[]");
        assert_eq!(backend.call_count(), 2);
    }
}
