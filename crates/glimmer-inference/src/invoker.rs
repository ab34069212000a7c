//! Rate-limited, retrying AI invocation.
//!
//! Every attempt first takes a slot from the shared [`InvocationLimiter`],
//! so retries count against the quota too. Failed attempts are retried with
//! exponential backoff; throttled attempts wait at least as long as the
//! provider asked. [`RetryingInvoker::invoke`] never fails: once attempts
//! run out it returns the kind's fallback payload.

use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use thiserror::Error as ThisError;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use glimmer_core::{Error, GenerationBackend, GenerationRequest, OperationKind, Result};

use crate::fallback::fallback_payload;
use crate::limiter::InvocationLimiter;
use crate::response::{parse_response, AiPayload};
use crate::retry::RetryPolicy;

/// Outcome of a successful (or fallen back) invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct Invocation {
    pub kind: OperationKind,
    pub payload: AiPayload,
    /// Attempts made, first call included.
    pub attempts: u32,
    /// The model's verbatim text, when there was one.
    pub raw_text: Option<String>,
}

impl Invocation {
    /// Build the fallback outcome for a failed invocation.
    pub fn fallback(kind: &OperationKind, failure: &InvocationFailure) -> Self {
        let error = failure.error.to_string();
        Self {
            kind: kind.clone(),
            payload: AiPayload::Fallback {
                payload: fallback_payload(kind, &error),
                error,
            },
            attempts: failure.attempts,
            raw_text: None,
        }
    }

    /// Whether this is a fallback rather than a model answer.
    pub fn is_degraded(&self) -> bool {
        self.payload.is_fallback()
    }

    /// The JSON envelope for callers and the cache.
    pub fn to_json(&self) -> serde_json::Value {
        self.payload.to_json()
    }

    pub fn into_json(self) -> serde_json::Value {
        self.payload.into_json()
    }
}

/// Final error after all attempts were used.
#[derive(Debug, ThisError)]
#[error("{error} (after {attempts} attempt(s))")]
pub struct InvocationFailure {
    pub error: Error,
    pub attempts: u32,
}

impl InvocationFailure {
    /// Whether the last attempt was throttled by the provider.
    pub fn is_rate_limited(&self) -> bool {
        self.error.is_rate_limited()
    }
}

impl From<InvocationFailure> for Error {
    fn from(failure: InvocationFailure) -> Self {
        failure.error
    }
}

/// Errors that will not go away on retry.
fn is_retryable(error: &Error) -> bool {
    !matches!(error, Error::Config(_) | Error::InvalidInput(_))
}

/// Wraps a generation backend with quota, retry and fallback.
#[derive(Clone)]
pub struct RetryingInvoker {
    backend: Arc<dyn GenerationBackend>,
    limiter: Arc<InvocationLimiter>,
    policy: RetryPolicy,
}

impl RetryingInvoker {
    pub fn new(
        backend: Arc<dyn GenerationBackend>,
        limiter: Arc<InvocationLimiter>,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            backend,
            limiter,
            policy,
        }
    }

    /// Build with limiter and policy loaded from the environment.
    pub fn from_env(backend: Arc<dyn GenerationBackend>) -> Self {
        Self::new(
            backend,
            Arc::new(InvocationLimiter::from_env()),
            RetryPolicy::from_env(),
        )
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn limiter(&self) -> &Arc<InvocationLimiter> {
        &self.limiter
    }

    pub fn backend(&self) -> &Arc<dyn GenerationBackend> {
        &self.backend
    }

    /// Invoke the model; falls back to the kind's default payload on failure.
    pub async fn invoke(&self, kind: &OperationKind, request: &GenerationRequest) -> Invocation {
        match self.try_invoke(kind, request).await {
            Ok(invocation) => invocation,
            Err(failure) => {
                warn!(
                    subsystem = "inference",
                    component = "invoker",
                    operation_kind = %kind,
                    attempt = failure.attempts,
                    degraded = true,
                    error = %failure.error,
                    "AI invocation exhausted, returning fallback"
                );
                Invocation::fallback(kind, &failure)
            }
        }
    }

    /// Invoke the model, surfacing the final error instead of falling back.
    ///
    /// Used by callers with their own retry loop (the job queue).
    pub async fn try_invoke(
        &self,
        kind: &OperationKind,
        request: &GenerationRequest,
    ) -> std::result::Result<Invocation, InvocationFailure> {
        let backend = &self.backend;
        debug!(
            subsystem = "inference",
            component = "invoker",
            operation_kind = %kind,
            model = backend.model_name(),
            prompt_len = request.prompt.len(),
            images = request.images.len(),
            "Invoking AI backend"
        );

        let (text, attempts) = self
            .invoke_with(kind, move |_attempt| backend.generate(request))
            .await?;

        let payload = parse_response(&text);
        if let AiPayload::Raw { parse_error, .. } = &payload {
            warn!(
                subsystem = "inference",
                component = "invoker",
                operation_kind = %kind,
                response_len = text.len(),
                error = %parse_error,
                "AI response was not valid JSON, keeping raw text"
            );
        }

        Ok(Invocation {
            kind: kind.clone(),
            payload,
            attempts,
            raw_text: Some(text),
        })
    }

    /// Run an arbitrary fallible AI operation under quota and retry.
    ///
    /// `op` receives the 1-based attempt number. Returns the value and the
    /// number of attempts used.
    pub async fn invoke_with<F, Fut, T>(
        &self,
        kind: &OperationKind,
        mut op: F,
    ) -> std::result::Result<(T, u32), InvocationFailure>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let max_attempts = self.policy.max_attempts.max(1);
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            self.limiter.acquire().await;

            let started = Instant::now();
            match op(attempt).await {
                Ok(value) => {
                    info!(
                        subsystem = "inference",
                        component = "invoker",
                        operation_kind = %kind,
                        attempt,
                        duration_ms = started.elapsed().as_millis() as u64,
                        success = true,
                        "AI call succeeded"
                    );
                    return Ok((value, attempt));
                }
                Err(error) => {
                    if attempt >= max_attempts || !is_retryable(&error) {
                        warn!(
                            subsystem = "inference",
                            component = "invoker",
                            operation_kind = %kind,
                            attempt,
                            duration_ms = started.elapsed().as_millis() as u64,
                            success = false,
                            error = %error,
                            "AI call failed, no attempts left"
                        );
                        return Err(InvocationFailure {
                            error,
                            attempts: attempt,
                        });
                    }

                    let delay = self.policy.delay_after(attempt, &error);
                    warn!(
                        subsystem = "inference",
                        component = "invoker",
                        operation_kind = %kind,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        rate_limited = error.is_rate_limited(),
                        error = %error,
                        "AI call failed, retrying"
                    );
                    sleep(delay).await;
                }
            }
        }
    }
}

impl std::fmt::Debug for RetryingInvoker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryingInvoker")
            .field("model", &self.backend.model_name())
            .field("limiter", &self.limiter)
            .field("policy", &self.policy)
            .finish()
    }
}
