//! Circuit breaker
//!
//! Fails fast when a dependency keeps failing, instead of piling work onto
//! a dead service.
//!
//! # States
//!
//! - **Closed**: normal operation, requests go through
//! - **Open**: threshold reached, requests fail immediately with
//!   `CircuitOpen` until the cooldown elapses
//! - **Half-open**: exactly one probe request is admitted; success closes
//!   the circuit, failure re-opens it

use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::RwLock;

use crate::error::{Result, WeaverError};

/// Circuit breaker states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

/// Configuration for circuit breaker behavior
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures before the circuit opens
    pub failure_threshold: u32,
    /// Open-state duration before a probe is admitted
    pub cooldown: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            cooldown: Duration::from_secs(60),
        }
    }
}

impl CircuitBreakerConfig {
    pub fn with_failure_threshold(mut self, threshold: u32) -> Self {
        self.failure_threshold = threshold;
        self
    }

    pub fn with_cooldown(mut self, cooldown: Duration) -> Self {
        self.cooldown = cooldown;
        self
    }
}

/// Circuit breaker for fault-tolerant access to one named service
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    state: RwLock<CircuitState>,
    consecutive_failures: AtomicU32,
    /// Milliseconds since UNIX epoch of the failure that opened the circuit
    opened_at: AtomicU64,
    /// Half-open admits one probe at a time
    probe_in_flight: AtomicBool,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            state: RwLock::new(CircuitState::Closed),
            consecutive_failures: AtomicU32::new(0),
            opened_at: AtomicU64::new(0),
            probe_in_flight: AtomicBool::new(false),
        }
    }

    pub fn with_defaults(name: impl Into<String>) -> Self {
        Self::new(name, CircuitBreakerConfig::default())
    }

    pub fn state(&self) -> CircuitState {
        *self.state.read()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn failure_count(&self) -> u32 {
        self.consecutive_failures.load(Ordering::SeqCst)
    }

    /// Execute an operation through the circuit breaker.
    pub async fn execute<F, Fut, T>(&self, operation: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.check_cooldown();

        let is_probe = match self.state() {
            CircuitState::Closed => false,
            CircuitState::HalfOpen => {
                // Only one probe; concurrent callers keep failing fast.
                if self
                    .probe_in_flight
                    .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
                    .is_err()
                {
                    return Err(self.open_error());
                }
                true
            }
            CircuitState::Open => return Err(self.open_error()),
        };

        let result = operation().await;
        if is_probe {
            self.probe_in_flight.store(false, Ordering::SeqCst);
        }
        match result {
            Ok(value) => {
                self.record_success();
                Ok(value)
            }
            Err(e) => {
                // Non-transport failures (validation, parse) say nothing
                // about service health and leave the circuit alone.
                if Self::counts_as_failure(&e) {
                    self.record_failure();
                }
                Err(e)
            }
        }
    }

    fn counts_as_failure(error: &WeaverError) -> bool {
        use crate::error::ErrorKind;
        matches!(
            error.kind(),
            ErrorKind::Transport | ErrorKind::Timeout | ErrorKind::Internal
        )
    }

    fn open_error(&self) -> WeaverError {
        WeaverError::CircuitOpen {
            service: self.name.clone(),
        }
    }

    /// Transition Open → HalfOpen once the cooldown has elapsed.
    fn check_cooldown(&self) {
        if *self.state.read() != CircuitState::Open {
            return;
        }
        let opened = self.opened_at.load(Ordering::SeqCst);
        let elapsed = Duration::from_millis(Self::now_millis().saturating_sub(opened));
        if elapsed >= self.config.cooldown {
            let mut state = self.state.write();
            if *state == CircuitState::Open {
                *state = CircuitState::HalfOpen;
                self.probe_in_flight.store(false, Ordering::SeqCst);
            }
        }
    }

    fn record_success(&self) {
        let mut state = self.state.write();
        self.consecutive_failures.store(0, Ordering::SeqCst);
        *state = CircuitState::Closed;
    }

    fn record_failure(&self) {
        let mut state = self.state.write();
        match *state {
            CircuitState::Closed => {
                let failures = self.consecutive_failures.fetch_add(1, Ordering::SeqCst) + 1;
                if failures >= self.config.failure_threshold {
                    *state = CircuitState::Open;
                    self.opened_at.store(Self::now_millis(), Ordering::SeqCst);
                    tracing::warn!(
                        service = %self.name,
                        failures,
                        "circuit breaker opened"
                    );
                }
            }
            CircuitState::HalfOpen => {
                *state = CircuitState::Open;
                self.opened_at.store(Self::now_millis(), Ordering::SeqCst);
            }
            CircuitState::Open => {}
        }
    }

    /// Reset to closed (admin surface and tests).
    pub fn reset(&self) {
        let mut state = self.state.write();
        *state = CircuitState::Closed;
        self.consecutive_failures.store(0, Ordering::SeqCst);
        self.opened_at.store(0, Ordering::SeqCst);
        self.probe_in_flight.store(false, Ordering::SeqCst);
    }

    fn now_millis() -> u64 {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0)
    }
}

impl std::fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("name", &self.name)
            .field("state", &self.state())
            .field("failure_count", &self.failure_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    fn transport_err() -> WeaverError {
        WeaverError::Transport {
            reason: "connection refused".into(),
            status: None,
        }
    }

    #[tokio::test]
    async fn closed_passes_through() {
        let breaker = CircuitBreaker::with_defaults("svc");
        let result = breaker.execute(|| async { Ok("value") }).await;
        assert_eq!(result.unwrap(), "value");
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn opens_after_threshold() {
        let config = CircuitBreakerConfig::default().with_failure_threshold(3);
        let breaker = CircuitBreaker::new("svc", config);

        for _ in 0..3 {
            let _ = breaker
                .execute(|| async { Err::<(), _>(transport_err()) })
                .await;
        }
        assert_eq!(breaker.state(), CircuitState::Open);

        let result = breaker.execute(|| async { Ok(()) }).await;
        let err = result.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::CircuitOpen);
    }

    #[tokio::test]
    async fn non_transport_errors_do_not_trip() {
        let config = CircuitBreakerConfig::default().with_failure_threshold(1);
        let breaker = CircuitBreaker::new("svc", config);

        let _ = breaker
            .execute(|| async { Err::<(), _>(WeaverError::validation("bad input")) })
            .await;
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn success_resets_failure_streak() {
        let config = CircuitBreakerConfig::default().with_failure_threshold(3);
        let breaker = CircuitBreaker::new("svc", config);

        for _ in 0..2 {
            let _ = breaker
                .execute(|| async { Err::<(), _>(transport_err()) })
                .await;
        }
        assert_eq!(breaker.failure_count(), 2);
        let _ = breaker.execute(|| async { Ok(()) }).await;
        assert_eq!(breaker.failure_count(), 0);
    }

    #[tokio::test]
    async fn probe_after_cooldown_closes_on_success() {
        let config = CircuitBreakerConfig::default()
            .with_failure_threshold(1)
            .with_cooldown(Duration::from_millis(10));
        let breaker = CircuitBreaker::new("svc", config);

        let _ = breaker
            .execute(|| async { Err::<(), _>(transport_err()) })
            .await;
        assert_eq!(breaker.state(), CircuitState::Open);

        tokio::time::sleep(Duration::from_millis(20)).await;

        let result = breaker.execute(|| async { Ok("recovered") }).await;
        assert_eq!(result.unwrap(), "recovered");
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn probe_failure_reopens() {
        let config = CircuitBreakerConfig::default()
            .with_failure_threshold(1)
            .with_cooldown(Duration::from_millis(10));
        let breaker = CircuitBreaker::new("svc", config);

        let _ = breaker
            .execute(|| async { Err::<(), _>(transport_err()) })
            .await;
        tokio::time::sleep(Duration::from_millis(20)).await;

        let _ = breaker
            .execute(|| async { Err::<(), _>(transport_err()) })
            .await;
        assert_eq!(breaker.state(), CircuitState::Open);
    }

    #[tokio::test]
    async fn reset_closes_circuit() {
        let config = CircuitBreakerConfig::default().with_failure_threshold(1);
        let breaker = CircuitBreaker::new("svc", config);
        let _ = breaker
            .execute(|| async { Err::<(), _>(transport_err()) })
            .await;
        assert_eq!(breaker.state(), CircuitState::Open);

        breaker.reset();
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert!(breaker.execute(|| async { Ok(()) }).await.is_ok());
    }
}
