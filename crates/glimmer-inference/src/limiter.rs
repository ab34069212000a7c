//! Client-side sliding quota for outbound AI calls.
//!
//! N calls are allowed per window (60 seconds by default). Once the quota is
//! spent the next caller sleeps out the rest of the window, then the window
//! resets. Waiters queue on a fair async mutex, so they are released in
//! arrival order.
//!
//! The limiter only reduces provider throttling; it cannot rule it out.
//! Timing uses `tokio::time::Instant`, so tests drive it with a paused clock.

use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::{Mutex as AsyncMutex, Notify};
use tokio::time::{sleep, Instant};
use tracing::debug;

use glimmer_core::defaults;

struct WindowState {
    window_start: Instant,
    count: u32,
}

impl WindowState {
    fn reset(&mut self, now: Instant) {
        self.window_start = now;
        self.count = 0;
    }
}

/// Fixed-quota limiter over a rolling window.
pub struct InvocationLimiter {
    name: &'static str,
    quota: u32,
    window: Duration,
    state: Mutex<WindowState>,
    /// Held by the waiter at the head of the line.
    turnstile: AsyncMutex<()>,
    refunded: Notify,
}

impl InvocationLimiter {
    /// Create a limiter allowing `quota` acquisitions per `window`.
    ///
    /// A quota of zero is treated as one.
    pub fn new(name: &'static str, quota: u32, window: Duration) -> Self {
        Self {
            name,
            quota: quota.max(1),
            window,
            state: Mutex::new(WindowState {
                window_start: Instant::now(),
                count: 0,
            }),
            turnstile: AsyncMutex::new(()),
            refunded: Notify::new(),
        }
    }

    /// `quota` acquisitions per 60-second window.
    pub fn per_minute(name: &'static str, quota: u32) -> Self {
        Self::new(
            name,
            quota,
            Duration::from_secs(defaults::AI_LIMIT_WINDOW_SECS),
        )
    }

    /// Limiter for outbound AI calls, configured from `AI_MAX_CALLS_PER_MINUTE`.
    pub fn from_env() -> Self {
        let quota = glimmer_core::env_or(
            "AI_MAX_CALLS_PER_MINUTE",
            defaults::AI_MAX_CALLS_PER_MINUTE,
        );
        Self::per_minute("ai_calls", quota)
    }

    fn state(&self) -> MutexGuard<'_, WindowState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Take a slot if one is free, otherwise report how long the window has left.
    fn try_take(&self) -> Option<Duration> {
        let mut state = self.state();
        let now = Instant::now();
        if now.duration_since(state.window_start) >= self.window {
            state.reset(now);
        }
        if state.count < self.quota {
            state.count += 1;
            None
        } else {
            Some(
                self.window
                    .saturating_sub(now.duration_since(state.window_start)),
            )
        }
    }

    /// Wait until a slot is free in the current window, then take it.
    pub async fn acquire(&self) {
        let _turn = self.turnstile.lock().await;

        while let Some(wait) = self.try_take() {
            debug!(
                subsystem = "inference",
                component = "limiter",
                op = "acquire",
                limiter = self.name,
                delay_ms = wait.as_millis() as u64,
                "Quota exhausted, waiting for window reset"
            );
            tokio::select! {
                _ = sleep(wait) => {}
                _ = self.refunded.notified() => {}
            }
        }
    }

    /// Give back a slot taken by `acquire` that ended up unused.
    ///
    /// Has no effect once the window the slot came from has reset.
    pub async fn refund(&self) {
        {
            let mut state = self.state();
            if Instant::now().duration_since(state.window_start) >= self.window {
                return;
            }
            state.count = state.count.saturating_sub(1);
        }
        self.refunded.notify_one();
    }

    /// Slots left in the current window.
    pub async fn remaining(&self) -> u32 {
        let state = self.state();
        if Instant::now().duration_since(state.window_start) >= self.window {
            self.quota
        } else {
            self.quota.saturating_sub(state.count)
        }
    }

    /// Acquisitions allowed per window.
    pub fn window_quota(&self) -> u32 {
        self.quota
    }

    /// Window length.
    pub fn window(&self) -> Duration {
        self.window
    }
}

impl std::fmt::Debug for InvocationLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InvocationLimiter")
            .field("name", &self.name)
            .field("quota", &self.quota)
            .field("window", &self.window)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn test_acquire_within_quota_does_not_wait() {
        let limiter = InvocationLimiter::per_minute("test", 3);
        let start = Instant::now();
        for _ in 0..3 {
            limiter.acquire().await;
        }
        assert_eq!(start.elapsed(), Duration::ZERO);
        assert_eq!(limiter.remaining().await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_quota_waits_for_window() {
        let limiter = InvocationLimiter::per_minute("test", 2);
        let start = Instant::now();
        limiter.acquire().await;
        limiter.acquire().await;
        limiter.acquire().await;
        assert!(start.elapsed() >= Duration::from_secs(60));
        // The fresh window holds the third call.
        assert_eq!(limiter.remaining().await, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_window_elapses_naturally() {
        let limiter = InvocationLimiter::per_minute("test", 1);
        limiter.acquire().await;
        tokio::time::advance(Duration::from_secs(61)).await;
        assert_eq!(limiter.remaining().await, 1);

        let start = Instant::now();
        limiter.acquire().await;
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_partial_wait_only_covers_rest_of_window() {
        let limiter = InvocationLimiter::per_minute("test", 1);
        limiter.acquire().await;
        tokio::time::advance(Duration::from_secs(45)).await;

        let start = Instant::now();
        limiter.acquire().await;
        let waited = start.elapsed();
        assert!(waited >= Duration::from_secs(15));
        assert!(waited < Duration::from_secs(16));
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_waiters_are_all_served() {
        let limiter = Arc::new(InvocationLimiter::per_minute("test", 2));
        let start = Instant::now();
        let mut handles = Vec::new();
        for _ in 0..5 {
            let limiter = limiter.clone();
            handles.push(tokio::spawn(async move { limiter.acquire().await }));
        }
        for h in handles {
            h.await.unwrap();
        }
        // 5 calls at 2 per window need two resets.
        assert!(start.elapsed() >= Duration::from_secs(120));
    }

    #[tokio::test(start_paused = true)]
    async fn test_refund_returns_slot() {
        let limiter = InvocationLimiter::per_minute("test", 1);
        limiter.acquire().await;
        limiter.refund().await;
        assert_eq!(limiter.remaining().await, 1);

        let start = Instant::now();
        limiter.acquire().await;
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_refund_wakes_waiter() {
        let limiter = Arc::new(InvocationLimiter::per_minute("test", 1));
        limiter.acquire().await;

        let waiter = {
            let limiter = limiter.clone();
            tokio::spawn(async move {
                let start = Instant::now();
                limiter.acquire().await;
                start.elapsed()
            })
        };
        tokio::time::advance(Duration::from_secs(5)).await;
        limiter.refund().await;

        let waited = waiter.await.unwrap();
        assert!(waited < Duration::from_secs(60));
    }

    #[test]
    fn test_zero_quota_is_clamped() {
        let limiter = InvocationLimiter::per_minute("test", 0);
        assert_eq!(limiter.window_quota(), 1);
    }
}
