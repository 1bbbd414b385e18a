//! Retry with exponential backoff
//!
//! Re-attempts operations whose error kind is transient (`RateLimited`,
//! `Transport`, `Timeout`). A `RateLimited` error carrying a server hint
//! overrides the computed backoff. Everything else surfaces on the first
//! failure.

use std::future::Future;
use std::time::Duration;

use crate::error::{Result, WeaverError};

/// Configuration for retry behavior
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Total attempts, including the first
    pub max_attempts: u32,
    /// Delay before the first retry
    pub base_delay: Duration,
    /// Cap on any single delay
    pub max_delay: Duration,
    /// Jitter factor in [0, 1], fraction of the computed delay
    pub jitter: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(16),
            jitter: 0.1,
        }
    }
}

impl RetryConfig {
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    pub fn with_base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter.clamp(0.0, 1.0);
        self
    }
}

/// Retry policy executing operations with exponential backoff
#[derive(Debug, Clone, Default)]
pub struct RetryPolicy {
    config: RetryConfig,
}

impl RetryPolicy {
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    pub fn with_defaults() -> Self {
        Self::new(RetryConfig::default())
    }

    pub fn max_attempts(&self) -> u32 {
        self.config.max_attempts
    }

    /// Backoff for a given retry (0-indexed: delay after the first failure
    /// is `delay_for(0)`), doubling up to the cap, jittered.
    pub fn delay_for(&self, retry_index: u32) -> Duration {
        let base = self.config.base_delay.as_millis() as f64
            * 2f64.powi(retry_index.min(16) as i32);
        let capped = base.min(self.config.max_delay.as_millis() as f64);
        let jittered = if self.config.jitter > 0.0 {
            let range = capped * self.config.jitter;
            let offset = rand::random::<f64>() * range * 2.0 - range;
            (capped + offset).max(0.0)
        } else {
            capped
        };
        Duration::from_millis(jittered as u64)
    }

    /// Execute with retries. Transient errors re-attempt; the rest return
    /// immediately. The final transient error is returned as-is once the
    /// attempt budget is spent.
    pub async fn execute<F, Fut, T>(&self, operation: F) -> Result<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut last_error: Option<WeaverError> = None;

        for attempt in 0..self.config.max_attempts {
            match operation().await {
                Ok(value) => return Ok(value),
                Err(e) => {
                    if !e.is_retryable() {
                        return Err(e);
                    }
                    let is_last = attempt + 1 >= self.config.max_attempts;
                    if !is_last {
                        let delay = match &e {
                            WeaverError::RateLimited {
                                retry_after_ms: Some(hint),
                                ..
                            } => Duration::from_millis(*hint).min(self.config.max_delay),
                            _ => self.delay_for(attempt),
                        };
                        tracing::debug!(
                            attempt = attempt + 1,
                            delay_ms = delay.as_millis() as u64,
                            error = %e,
                            "retrying after transient failure"
                        );
                        tokio::time::sleep(delay).await;
                    }
                    last_error = Some(e);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| WeaverError::RetryExhausted {
            attempts: self.config.max_attempts,
            last_error: "unknown".to_string(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn transient() -> WeaverError {
        WeaverError::Transport {
            reason: "503".into(),
            status: Some(503),
        }
    }

    fn fast_policy(attempts: u32) -> RetryPolicy {
        RetryPolicy::new(
            RetryConfig::default()
                .with_max_attempts(attempts)
                .with_base_delay(Duration::from_millis(1))
                .with_max_delay(Duration::from_millis(4))
                .with_jitter(0.0),
        )
    }

    #[test]
    fn delay_doubles_and_caps() {
        let policy = RetryPolicy::new(
            RetryConfig::default()
                .with_base_delay(Duration::from_secs(2))
                .with_max_delay(Duration::from_secs(16))
                .with_jitter(0.0),
        );
        assert_eq!(policy.delay_for(0), Duration::from_secs(2));
        assert_eq!(policy.delay_for(1), Duration::from_secs(4));
        assert_eq!(policy.delay_for(2), Duration::from_secs(8));
        assert_eq!(policy.delay_for(3), Duration::from_secs(16));
        assert_eq!(policy.delay_for(10), Duration::from_secs(16));
    }

    #[tokio::test]
    async fn succeeds_first_try() {
        let policy = fast_policy(3);
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);

        let result = policy
            .execute(|| {
                let counter = Arc::clone(&counter);
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok(7)
                }
            })
            .await;

        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn retries_transient_until_success() {
        let policy = fast_policy(3);
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);

        let result = policy
            .execute(|| {
                let counter = Arc::clone(&counter);
                async move {
                    let n = counter.fetch_add(1, Ordering::SeqCst);
                    if n < 2 {
                        Err(transient())
                    } else {
                        Ok("done")
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), "done");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn gives_up_after_budget() {
        let policy = fast_policy(3);
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);

        let err = policy
            .execute(|| {
                let counter = Arc::clone(&counter);
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err::<(), _>(transient())
                }
            })
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Transport);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn permanent_errors_never_retry() {
        let policy = fast_policy(5);
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);

        let err = policy
            .execute(|| {
                let counter = Arc::clone(&counter);
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err::<(), _>(WeaverError::parse("llm response", "bad schema"))
                }
            })
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Parse);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn rate_limit_hint_overrides_backoff() {
        let policy = RetryPolicy::new(
            RetryConfig::default()
                .with_max_attempts(2)
                .with_base_delay(Duration::from_secs(60))
                .with_jitter(0.0),
        );
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);

        let start = std::time::Instant::now();
        let result = policy
            .execute(|| {
                let counter = Arc::clone(&counter);
                async move {
                    if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                        Err(WeaverError::RateLimited {
                            resource: "llm".into(),
                            retry_after_ms: Some(5),
                        })
                    } else {
                        Ok(())
                    }
                }
            })
            .await;

        assert!(result.is_ok());
        // Waited the 5ms hint, not the 60s base delay.
        assert!(start.elapsed() < Duration::from_secs(1));
    }
}
