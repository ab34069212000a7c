//! Scripted generation backend for deterministic testing.
//!
//! Replies are consumed in order; once the script runs out the fallback
//! outcome is used for every further call.
//!
//! ```rust
//! use glimmer_inference::mock::ScriptedBackend;
//!
//! let backend = ScriptedBackend::new()
//!     .then_fail("502 bad gateway")
//!     .then_reply(r#"{"skin_type": "oily"}"#);
//! ```

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use glimmer_core::{Error, GenerationBackend, GenerationRequest, Result};

/// One scripted outcome.
#[derive(Debug, Clone)]
pub enum Scripted {
    Reply(String),
    Fail(String),
    RateLimit(Option<Duration>),
    ConfigError(String),
}

impl Scripted {
    fn into_result(self) -> Result<String> {
        match self {
            Scripted::Reply(text) => Ok(text),
            Scripted::Fail(msg) => Err(Error::Inference(msg)),
            Scripted::RateLimit(retry_after) => {
                Err(Error::rate_limited("mock rate limit", retry_after))
            }
            Scripted::ConfigError(msg) => Err(Error::Config(msg)),
        }
    }
}

#[derive(Debug)]
struct ScriptState {
    script: VecDeque<Scripted>,
    otherwise: Scripted,
    requests: Vec<GenerationRequest>,
}

/// Mock backend that replays a script of outcomes.
#[derive(Debug, Clone)]
pub struct ScriptedBackend {
    state: Arc<Mutex<ScriptState>>,
    latency: Option<Duration>,
}

impl Default for ScriptedBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedBackend {
    /// An empty script that answers `{}` forever.
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(ScriptState {
                script: VecDeque::new(),
                otherwise: Scripted::Reply("{}".to_string()),
                requests: Vec::new(),
            })),
            latency: None,
        }
    }

    fn push(self, outcome: Scripted) -> Self {
        self.lock().script.push_back(outcome);
        self
    }

    fn set_otherwise(self, outcome: Scripted) -> Self {
        self.lock().otherwise = outcome;
        self
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ScriptState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn then_reply(self, text: impl Into<String>) -> Self {
        self.push(Scripted::Reply(text.into()))
    }

    pub fn then_fail(self, msg: impl Into<String>) -> Self {
        self.push(Scripted::Fail(msg.into()))
    }

    pub fn then_rate_limit(self, retry_after: Option<Duration>) -> Self {
        self.push(Scripted::RateLimit(retry_after))
    }

    pub fn otherwise_reply(self, text: impl Into<String>) -> Self {
        self.set_otherwise(Scripted::Reply(text.into()))
    }

    pub fn otherwise_fail(self, msg: impl Into<String>) -> Self {
        self.set_otherwise(Scripted::Fail(msg.into()))
    }

    pub fn otherwise_rate_limit(self, retry_after: Option<Duration>) -> Self {
        self.set_otherwise(Scripted::RateLimit(retry_after))
    }

    pub fn otherwise_config_error(self, msg: impl Into<String>) -> Self {
        self.set_otherwise(Scripted::ConfigError(msg.into()))
    }

    /// Sleep this long (tokio time) before answering.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Number of `generate` calls so far.
    pub fn calls(&self) -> usize {
        self.lock().requests.len()
    }

    /// Every request received, in order.
    pub fn requests(&self) -> Vec<GenerationRequest> {
        self.lock().requests.clone()
    }
}

#[async_trait]
impl GenerationBackend for ScriptedBackend {
    async fn generate(&self, request: &GenerationRequest) -> Result<String> {
        let outcome = {
            let mut state = self.lock();
            state.requests.push(request.clone());
            match state.script.pop_front() {
                Some(next) => next,
                None => state.otherwise.clone(),
            }
        };
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        outcome.into_result()
    }

    fn model_name(&self) -> &str {
        "scripted-mock"
    }
}
