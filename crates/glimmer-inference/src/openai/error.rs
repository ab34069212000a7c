//! OpenAI-specific error handling.

use std::time::Duration;

use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::header::{HeaderMap, RETRY_AFTER};

use glimmer_core::Error;

/// OpenAI-specific error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenAIErrorCode {
    /// Invalid authentication credentials.
    AuthenticationError,
    /// Rate limit or quota exceeded.
    RateLimitExceeded,
    /// Model not found or not available.
    ModelNotFound,
    /// Request too large.
    ContextLengthExceeded,
    /// Server error.
    ServerError,
    /// Unknown error.
    Unknown,
}

impl OpenAIErrorCode {
    /// Determine error code from HTTP status and error type.
    pub fn from_response(status: u16, error_type: &str) -> Self {
        match (status, error_type) {
            (401, _) | (403, _) => Self::AuthenticationError,
            (429, _) | (_, "rate_limit_exceeded") | (_, "insufficient_quota") => {
                Self::RateLimitExceeded
            }
            (404, _) | (_, "model_not_found") => Self::ModelNotFound,
            (400, _) if error_type.contains("context_length") => Self::ContextLengthExceeded,
            (500..=599, _) => Self::ServerError,
            _ => Self::Unknown,
        }
    }

    /// Check if this error is retryable.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::RateLimitExceeded | Self::ServerError)
    }
}

/// Convert OpenAI error to glimmer Error.
pub fn to_glimmer_error(
    code: OpenAIErrorCode,
    message: &str,
    retry_after: Option<Duration>,
) -> Error {
    match code {
        OpenAIErrorCode::AuthenticationError => {
            Error::Config(format!("Authentication failed: {}", message))
        }
        OpenAIErrorCode::RateLimitExceeded => Error::rate_limited(
            format!("Rate limit exceeded: {}", message),
            retry_after.or_else(|| retry_hint_from_message(message)),
        ),
        OpenAIErrorCode::ModelNotFound => Error::Config(format!("Model not found: {}", message)),
        OpenAIErrorCode::ContextLengthExceeded => {
            Error::InvalidInput(format!("Context too long: {}", message))
        }
        OpenAIErrorCode::ServerError => Error::Inference(format!("Server error: {}", message)),
        OpenAIErrorCode::Unknown => Error::Inference(message.to_string()),
    }
}

/// Read a `Retry-After` header given in (possibly fractional) seconds.
pub fn retry_after_header(headers: &HeaderMap) -> Option<Duration> {
    let raw = headers.get(RETRY_AFTER)?.to_str().ok()?;
    parse_seconds(raw.trim())
}

fn parse_seconds(raw: &str) -> Option<Duration> {
    seconds_to_duration(raw.parse().ok()?)
}

fn seconds_to_duration(secs: f64) -> Option<Duration> {
    if secs.is_finite() && secs >= 0.0 {
        Some(Duration::from_millis((secs * 1000.0).round() as u64))
    } else {
        None
    }
}

static TRY_AGAIN_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)try again in\s+([0-9]+(?:\.[0-9]+)?)\s*(ms|s|sec|seconds?)\b").unwrap()
});

static RETRY_DELAY_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)"?retry_?delay"?\s*[:=]\s*"?([0-9]+(?:\.[0-9]+)?)s"#).unwrap()
});

/// Extract a retry hint from an error message body.
///
/// Recognises `try again in 20s`, `try again in 350ms` and `"retryDelay": "7s"`.
pub fn retry_hint_from_message(message: &str) -> Option<Duration> {
    if let Some(caps) = TRY_AGAIN_RE.captures(message) {
        let value: f64 = caps.get(1)?.as_str().parse().ok()?;
        let unit = caps.get(2)?.as_str().to_ascii_lowercase();
        let secs = if unit == "ms" { value / 1000.0 } else { value };
        return seconds_to_duration(secs);
    }
    if let Some(caps) = RETRY_DELAY_RE.captures(message) {
        return parse_seconds(caps.get(1)?.as_str());
    }
    None
}
