//! Retry and backoff policy.
//!
//! Shared by the invoker (between attempts of one AI call) and the job queue
//! (between attempts of one job).

use std::time::Duration;

use rand::Rng;

use glimmer_core::{defaults, Error};

/// Exponential backoff with a cap and optional jitter.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts, first call included. Never less than one.
    pub max_attempts: u32,
    /// Backoff after the first failed attempt.
    pub base_backoff: Duration,
    /// Growth factor per failed attempt.
    pub multiplier: u32,
    /// Cap on the computed backoff (provider hints are not capped).
    pub max_backoff: Duration,
    /// Extra random delay as a fraction of the computed backoff.
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: defaults::AI_MAX_ATTEMPTS,
            base_backoff: Duration::from_millis(defaults::AI_BASE_BACKOFF_MS),
            multiplier: defaults::AI_BACKOFF_MULTIPLIER,
            max_backoff: Duration::from_millis(defaults::AI_MAX_BACKOFF_MS),
            jitter: defaults::AI_JITTER_RATIO,
        }
    }
}

impl RetryPolicy {
    /// Load the invoker policy from `AI_MAX_ATTEMPTS`, `AI_BASE_BACKOFF_MS`,
    /// `AI_MAX_BACKOFF_MS` and `AI_JITTER`.
    pub fn from_env() -> Self {
        Self {
            max_attempts: glimmer_core::env_or("AI_MAX_ATTEMPTS", defaults::AI_MAX_ATTEMPTS),
            base_backoff: Duration::from_millis(glimmer_core::env_or(
                "AI_BASE_BACKOFF_MS",
                defaults::AI_BASE_BACKOFF_MS,
            )),
            multiplier: defaults::AI_BACKOFF_MULTIPLIER,
            max_backoff: Duration::from_millis(glimmer_core::env_or(
                "AI_MAX_BACKOFF_MS",
                defaults::AI_MAX_BACKOFF_MS,
            )),
            jitter: glimmer_core::env_or("AI_JITTER", defaults::AI_JITTER_RATIO),
        }
        .normalized()
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    pub fn with_base_backoff(mut self, base: Duration) -> Self {
        self.base_backoff = base;
        self
    }

    pub fn with_max_backoff(mut self, max: Duration) -> Self {
        self.max_backoff = max;
        self
    }

    /// Jitter ratio in `0.0..=1.0`; NaN or negative disables it.
    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter;
        self.normalized()
    }

    /// Disable jitter (deterministic delays, used in tests).
    pub fn without_jitter(self) -> Self {
        self.with_jitter(0.0)
    }

    fn normalized(mut self) -> Self {
        self.max_attempts = self.max_attempts.max(1);
        self.multiplier = self.multiplier.max(1);
        self.jitter = if self.jitter.is_nan() {
            0.0
        } else {
            self.jitter.clamp(0.0, 1.0)
        };
        self
    }

    /// Backoff after failed attempt `attempt` (1-based), before jitter.
    ///
    /// `base * multiplier^(attempt - 1)`, capped at `max_backoff`.
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1);
        let factor = (self.multiplier.max(1) as u64)
            .checked_pow(exponent)
            .unwrap_or(u64::MAX);
        let base_ms = self.base_backoff.as_millis() as u64;
        let ms = base_ms.saturating_mul(factor);
        Duration::from_millis(ms).min(self.max_backoff)
    }

    /// Delay to sleep after failed attempt `attempt` ended with `error`.
    ///
    /// Rate-limit errors wait at least as long as the provider asked.
    pub fn delay_after(&self, attempt: u32, error: &Error) -> Duration {
        let computed = self.jittered(self.backoff_for(attempt));
        match error.retry_after() {
            Some(hint) if error.is_rate_limited() => hint.max(computed),
            _ => computed,
        }
    }

    fn jittered(&self, delay: Duration) -> Duration {
        if self.jitter <= 0.0 || delay.is_zero() {
            return delay;
        }
        let extra = rand::thread_rng().gen_range(0.0..self.jitter);
        delay + delay.mul_f64(extra)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> RetryPolicy {
        RetryPolicy::default()
            .with_base_backoff(Duration::from_millis(100))
            .with_max_backoff(Duration::from_millis(1_000))
            .without_jitter()
    }

    #[test]
    fn test_backoff_grows_exponentially() {
        let p = policy();
        assert_eq!(p.backoff_for(1), Duration::from_millis(100));
        assert_eq!(p.backoff_for(2), Duration::from_millis(200));
        assert_eq!(p.backoff_for(3), Duration::from_millis(400));
    }

    #[test]
    fn test_backoff_is_capped() {
        let p = policy();
        assert_eq!(p.backoff_for(5), Duration::from_millis(1_000));
        assert_eq!(p.backoff_for(200), Duration::from_millis(1_000));
    }

    #[test]
    fn test_rate_limit_hint_wins_when_longer() {
        let p = policy();
        let err = Error::rate_limited("slow down", Some(Duration::from_secs(30)));
        assert_eq!(p.delay_after(1, &err), Duration::from_secs(30));
    }

    #[test]
    fn test_computed_backoff_wins_when_hint_shorter() {
        let p = policy();
        let err = Error::rate_limited("slow down", Some(Duration::from_millis(10)));
        assert_eq!(p.delay_after(2, &err), Duration::from_millis(200));
    }

    #[test]
    fn test_rate_limit_without_hint_uses_backoff() {
        let p = policy();
        let err = Error::rate_limited("slow down", None);
        assert_eq!(p.delay_after(1, &err), Duration::from_millis(100));
    }

    #[test]
    fn test_unusable_jitter_is_clamped() {
        let err = Error::Inference("boom".to_string());
        for (jitter, expected) in [(f64::NAN, 0.0), (-0.3, 0.0), (f64::INFINITY, 1.0)] {
            let p = policy().with_jitter(jitter);
            assert_eq!(p.jitter, expected);
            let d = p.delay_after(1, &err);
            assert!(d >= p.base_backoff && d <= p.base_backoff * 2);
        }
    }

    #[test]
    fn test_jitter_stays_within_ratio() {
        let p = policy().with_jitter(0.5);
        let err = Error::Inference("boom".to_string());
        for _ in 0..50 {
            let d = p.delay_after(1, &err);
            assert!(d >= Duration::from_millis(100));
            assert!(d <= Duration::from_millis(150));
        }
    }

    #[test]
    fn test_max_attempts_never_zero() {
        assert_eq!(RetryPolicy::default().with_max_attempts(0).max_attempts, 1);
    }
}
