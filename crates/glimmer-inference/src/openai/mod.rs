//! OpenAI-compatible generation backend.
//!
//! Works with any endpoint speaking the chat completions protocol (OpenAI,
//! Azure OpenAI, OpenRouter, vLLM, Ollama in compatibility mode). Images are
//! sent inline as `data:` URIs.
//!
//! Throttling (HTTP 429, `insufficient_quota`) surfaces as
//! `Error::RateLimited`, carrying the `Retry-After` header or the
//! "try again in Ns" hint from the body when the provider sent one.
//!
//! # Example
//!
//! ```rust,no_run
//! use glimmer_core::{GenerationBackend, GenerationRequest};
//! use glimmer_inference::openai::OpenAIBackend;
//!
//! #[tokio::main]
//! async fn main() {
//!     let backend = OpenAIBackend::from_env().unwrap();
//!     let text = backend
//!         .generate(&GenerationRequest::new("Describe a gentle cleanser"))
//!         .await
//!         .unwrap();
//!     println!("{}", text);
//! }
//! ```

mod backend;
mod error;
mod types;

pub use backend::{OpenAIBackend, OpenAIConfig};
pub use error::{retry_after_header, retry_hint_from_message, to_glimmer_error, OpenAIErrorCode};
pub use types::*;
