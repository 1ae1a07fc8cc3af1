//! OpenAI-compatible generation backend.
//!
//! Works with any endpoint that speaks the chat-completions protocol:
//! OpenAI, Azure OpenAI, OpenRouter, vLLM, Ollama in compatibility mode.
//!
//! # Example
//!
//! ```rust,no_run
//! use collab_inference::openai::{OpenAIBackend, OpenAIConfig};
//! use collab_core::GenerationBackend;
//!
//! #[tokio::main]
//! async fn main() {
//!     let backend = OpenAIBackend::new(OpenAIConfig {
//!         base_url: "http://localhost:11434/v1".to_string(),
//!         model: "llama3".to_string(),
//!         ..Default::default()
//!     })
//!     .unwrap();
//!
//!     let reply = backend.generate_with_system("Answer in JSON.", "[]").await;
//! }
//! ```

mod backend;
mod error;
mod types;

pub use backend::{OpenAIBackend, OpenAIConfig};
pub use error::{to_collab_error, OpenAIErrorCode};
pub use types::*;
