//! # glimmer-inference
//!
//! Rate-limited, retrying AI invocation for glimmer.
//!
//! This crate provides:
//! - A client-side call quota ([`InvocationLimiter`])
//! - Exponential backoff that honours provider retry hints ([`RetryPolicy`])
//! - The invoker that ties them to a backend and falls back per operation
//!   kind when every attempt fails ([`RetryingInvoker`])
//! - Tolerant JSON extraction from model output ([`response`])
//! - An OpenAI-compatible backend with vision support ([`openai`])
//!
//! # Feature Flags
//!
//! - `mock`: expose [`mock::ScriptedBackend`] for other crates' tests

pub mod fallback;
pub mod invoker;
pub mod limiter;
pub mod openai;
pub mod response;
pub mod retry;

// Scripted backend for testing
#[cfg(any(test, feature = "mock"))]
pub mod mock;

pub use fallback::fallback_payload;
pub use invoker::{Invocation, InvocationFailure, RetryingInvoker};
pub use limiter::InvocationLimiter;
pub use openai::{OpenAIBackend, OpenAIConfig};
pub use response::{extract_fenced, extract_json, parse_response, AiPayload};
pub use retry::RetryPolicy;
