//! Token-bucket rate limiter
//!
//! Tokens refill at a steady rate up to a burst capacity. `acquire` queues
//! (bounded waiters, bounded wait) and then fails fast with `RateLimited`.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::Duration;

use crate::error::{Result, WeaverError};

/// Configuration for the rate limiter
#[derive(Debug, Clone)]
pub struct RateLimiterConfig {
    /// Steady-state tokens per second
    pub rate_per_second: f64,
    /// Bucket capacity
    pub burst_capacity: u32,
    /// Longest a caller may queue for a token
    pub max_wait: Duration,
    /// Most callers allowed to queue at once; excess fails immediately
    pub max_waiters: u32,
}

impl RateLimiterConfig {
    pub fn new(rate_per_second: f64, burst_capacity: u32) -> Self {
        Self {
            rate_per_second,
            burst_capacity,
            max_wait: Duration::from_secs(30),
            max_waiters: 64,
        }
    }

    /// Convenience for per-minute limits (the configuration surface speaks
    /// requests/minute).
    pub fn per_minute(rate_per_minute: u32) -> Self {
        let per_second = f64::from(rate_per_minute) / 60.0;
        // Burst of one minute's allowance, floor 1.
        Self::new(per_second, rate_per_minute.max(1))
    }

    pub fn with_max_wait(mut self, max_wait: Duration) -> Self {
        self.max_wait = max_wait;
        self
    }

    pub fn with_max_waiters(mut self, max_waiters: u32) -> Self {
        self.max_waiters = max_waiters;
        self
    }
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        // 50/min is the configuration surface default.
        Self::per_minute(50)
    }
}

/// Token bucket keyed to one named resource
pub struct RateLimiter {
    name: String,
    config: RateLimiterConfig,
    /// Available tokens, scaled by 1000 for sub-token precision
    tokens: AtomicU64,
    /// Last refill time, milliseconds since UNIX epoch
    last_refill: AtomicU64,
    waiters: AtomicU32,
}

impl RateLimiter {
    const SCALE: u64 = 1000;

    pub fn new(name: impl Into<String>, config: RateLimiterConfig) -> Self {
        let tokens = u64::from(config.burst_capacity) * Self::SCALE;
        Self {
            name: name.into(),
            config,
            tokens: AtomicU64::new(tokens),
            last_refill: AtomicU64::new(Self::now_millis()),
            waiters: AtomicU32::new(0),
        }
    }

    pub fn with_defaults(name: impl Into<String>) -> Self {
        Self::new(name, RateLimiterConfig::default())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Approximate available tokens.
    pub fn available_tokens(&self) -> f64 {
        self.refill();
        (self.tokens.load(Ordering::SeqCst) as f64) / (Self::SCALE as f64)
    }

    /// Take one token without waiting.
    pub fn try_acquire(&self) -> bool {
        self.refill();
        let required = Self::SCALE;
        let mut current = self.tokens.load(Ordering::SeqCst);
        loop {
            if current < required {
                return false;
            }
            match self.tokens.compare_exchange_weak(
                current,
                current - required,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => return true,
                Err(observed) => current = observed,
            }
        }
    }

    /// Take one token, queueing until the bucket refills.
    ///
    /// Fails fast with `RateLimited` when the waiter queue is full, and
    /// after `max_wait` of queueing.
    pub async fn acquire(&self) -> Result<()> {
        if self.try_acquire() {
            return Ok(());
        }

        let waiting = self.waiters.fetch_add(1, Ordering::SeqCst) + 1;
        if waiting > self.config.max_waiters {
            self.waiters.fetch_sub(1, Ordering::SeqCst);
            return Err(self.limit_error());
        }

        let result = self.acquire_queued().await;
        self.waiters.fetch_sub(1, Ordering::SeqCst);
        result
    }

    async fn acquire_queued(&self) -> Result<()> {
        let start = std::time::Instant::now();
        loop {
            if self.try_acquire() {
                return Ok(());
            }
            if start.elapsed() >= self.config.max_wait {
                return Err(self.limit_error());
            }
            // Sleep roughly one token's worth, capped to keep cancellation
            // responsive.
            let token_ms = (1000.0 / self.config.rate_per_second).ceil() as u64;
            tokio::time::sleep(Duration::from_millis(token_ms.clamp(1, 100))).await;
        }
    }

    fn limit_error(&self) -> WeaverError {
        let token_ms = (1000.0 / self.config.rate_per_second).ceil() as u64;
        WeaverError::RateLimited {
            resource: self.name.clone(),
            retry_after_ms: Some(token_ms),
        }
    }

    fn refill(&self) {
        let now = Self::now_millis();
        let last = self.last_refill.load(Ordering::SeqCst);
        let elapsed_ms = now.saturating_sub(last);
        if elapsed_ms == 0 {
            return;
        }
        let to_add =
            (elapsed_ms as f64 * self.config.rate_per_second / 1000.0 * Self::SCALE as f64) as u64;
        if to_add == 0 {
            return;
        }
        if self
            .last_refill
            .compare_exchange_weak(last, now, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return;
        }
        let cap = u64::from(self.config.burst_capacity) * Self::SCALE;
        let mut current = self.tokens.load(Ordering::SeqCst);
        loop {
            let next = (current + to_add).min(cap);
            if next == current {
                return;
            }
            match self.tokens.compare_exchange_weak(
                current,
                next,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => return,
                Err(observed) => current = observed,
            }
        }
    }

    /// Restore full capacity (admin surface and tests).
    pub fn reset(&self) {
        let cap = u64::from(self.config.burst_capacity) * Self::SCALE;
        self.tokens.store(cap, Ordering::SeqCst);
        self.last_refill.store(Self::now_millis(), Ordering::SeqCst);
    }

    fn now_millis() -> u64 {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0)
    }
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("name", &self.name)
            .field("available_tokens", &self.available_tokens())
            .field("rate_per_second", &self.config.rate_per_second)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn per_minute_conversion() {
        let config = RateLimiterConfig::per_minute(50);
        assert!((config.rate_per_second - 50.0 / 60.0).abs() < 1e-9);
        assert_eq!(config.burst_capacity, 50);
    }

    #[test]
    fn starts_at_burst_capacity() {
        let limiter = RateLimiter::new("llm", RateLimiterConfig::new(10.0, 20));
        let available = limiter.available_tokens();
        assert!((available - 20.0).abs() < 1.0, "got {}", available);
    }

    #[test]
    fn try_acquire_drains_bucket() {
        let limiter = RateLimiter::new("llm", RateLimiterConfig::new(10.0, 3));
        assert!(limiter.try_acquire());
        assert!(limiter.try_acquire());
        assert!(limiter.try_acquire());
        assert!(!limiter.try_acquire());
    }

    #[tokio::test]
    async fn acquire_waits_for_refill() {
        let config = RateLimiterConfig::new(100.0, 2).with_max_wait(Duration::from_secs(1));
        let limiter = RateLimiter::new("llm", config);
        limiter.try_acquire();
        limiter.try_acquire();
        assert!(!limiter.try_acquire());

        let result = limiter.acquire().await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn acquire_fails_after_max_wait() {
        let config = RateLimiterConfig::new(0.1, 1).with_max_wait(Duration::from_millis(40));
        let limiter = RateLimiter::new("llm", config);
        limiter.try_acquire();

        let err = limiter.acquire().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::RateLimited);
    }

    #[tokio::test]
    async fn waiter_overflow_fails_fast() {
        let config = RateLimiterConfig::new(0.01, 1)
            .with_max_wait(Duration::from_millis(200))
            .with_max_waiters(0);
        let limiter = RateLimiter::new("llm", config);
        limiter.try_acquire();

        let start = std::time::Instant::now();
        let err = limiter.acquire().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::RateLimited);
        assert!(start.elapsed() < Duration::from_millis(100), "failed fast");
    }

    #[test]
    fn rate_limited_error_carries_hint() {
        let limiter = RateLimiter::new("llm", RateLimiterConfig::new(10.0, 1));
        match limiter.limit_error() {
            WeaverError::RateLimited { retry_after_ms, .. } => {
                assert_eq!(retry_after_ms, Some(100));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn reset_restores_capacity() {
        let limiter = RateLimiter::new("llm", RateLimiterConfig::new(10.0, 2));
        limiter.try_acquire();
        limiter.try_acquire();
        assert!(!limiter.try_acquire());
        limiter.reset();
        assert!(limiter.try_acquire());
    }
}
