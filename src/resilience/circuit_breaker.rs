//! Circuit breaker: Closed -> Open -> HalfOpen -> Closed.

use crate::error::HearthError;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{watch, RwLock};

/// Circuit breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Normal operation.
    Closed,
    /// Rejecting calls immediately.
    Open,
    /// Allowing a single probe call to test recovery.
    HalfOpen,
}

struct Inner {
    state: CircuitState,
    failure_count: u32,
    last_failure: Option<Instant>,
}

/// A named circuit breaker guarding one operation.
///
/// State transitions are broadcast on a [`watch`] channel so the gateway can
/// publish `circuit-open` on the event bus without the breaker itself
/// depending on the bus.
pub struct CircuitBreaker {
    name: String,
    inner: RwLock<Inner>,
    threshold: u32,
    cooldown: Duration,
    state_tx: watch::Sender<CircuitState>,
}

impl CircuitBreaker {
    /// Create a breaker that opens after `threshold` consecutive failures
    /// and probes again after `cooldown`.
    pub fn new(name: impl Into<String>, threshold: u32, cooldown: Duration) -> Self {
        let (state_tx, _rx) = watch::channel(CircuitState::Closed);
        Self {
            name: name.into(),
            inner: RwLock::new(Inner {
                state: CircuitState::Closed,
                failure_count: 0,
                last_failure: None,
            }),
            threshold,
            cooldown,
            state_tx,
        }
    }

    /// Subscribe to state transitions.
    pub fn subscribe(&self) -> watch::Receiver<CircuitState> {
        self.state_tx.subscribe()
    }

    /// Current state.
    pub async fn state(&self) -> CircuitState {
        self.inner.read().await.state
    }

    /// Execute `operation` through the breaker.
    pub async fn execute<F, Fut, T>(&self, operation: F) -> Result<T, HearthError>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<T, HearthError>>,
    {
        {
            let mut inner = self.inner.write().await;
            match inner.state {
                CircuitState::Open => {
                    let elapsed = inner.last_failure.map(|t| t.elapsed() >= self.cooldown).unwrap_or(false);
                    if elapsed {
                        inner.state = CircuitState::HalfOpen;
                        let _ = self.state_tx.send(CircuitState::HalfOpen);
                    } else {
                        return Err(HearthError::CircuitOpen(self.name.clone()));
                    }
                }
                CircuitState::HalfOpen | CircuitState::Closed => {}
            }
        }

        match operation().await {
            Ok(result) => {
                let mut inner = self.inner.write().await;
                inner.failure_count = 0;
                inner.state = CircuitState::Closed;
                let _ = self.state_tx.send(CircuitState::Closed);
                Ok(result)
            }
            Err(e) => {
                let mut inner = self.inner.write().await;
                inner.failure_count += 1;
                inner.last_failure = Some(Instant::now());
                if inner.failure_count >= self.threshold {
                    inner.state = CircuitState::Open;
                    let _ = self.state_tx.send(CircuitState::Open);
                }
                Err(e)
            }
        }
    }
}

/// Registry of named breakers so callers can share one per operation key.
#[derive(Default, Clone)]
pub struct CircuitBreakerRegistry {
    breakers: Arc<dashmap::DashMap<String, Arc<CircuitBreaker>>>,
}

impl CircuitBreakerRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Get or create the breaker for `name`.
    pub fn get_or_create(&self, name: &str, threshold: u32, cooldown: Duration) -> Arc<CircuitBreaker> {
        self.breakers
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(CircuitBreaker::new(name, threshold, cooldown)))
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn opens_after_threshold_and_half_opens_after_cooldown() {
        let breaker = CircuitBreaker::new("op", 2, Duration::from_millis(50));

        for _ in 0..2 {
            let result: Result<(), HearthError> = breaker
                .execute(|| async { Err(HearthError::Timeout { duration_ms: 10 }) })
                .await;
            assert!(result.is_err());
        }
        assert_eq!(breaker.state().await, CircuitState::Open);

        // Third call rejects immediately without invoking the operation.
        let rejected: Result<(), HearthError> = breaker.execute(|| async { Ok(()) }).await;
        assert!(matches!(rejected, Err(HearthError::CircuitOpen(_))));

        tokio::time::sleep(Duration::from_millis(80)).await;

        let recovered: Result<i32, HearthError> = breaker.execute(|| async { Ok(42) }).await;
        assert_eq!(recovered.unwrap(), 42);
        assert_eq!(breaker.state().await, CircuitState::Closed);

        let subsequent: Result<i32, HearthError> = breaker.execute(|| async { Ok(7) }).await;
        assert_eq!(subsequent.unwrap(), 7);
    }

    #[tokio::test]
    async fn registry_returns_same_breaker_for_same_name() {
        let registry = CircuitBreakerRegistry::new();
        let a = registry.get_or_create("x", 3, Duration::from_secs(1));
        let b = registry.get_or_create("x", 3, Duration::from_secs(1));
        assert!(Arc::ptr_eq(&a, &b));
    }
}
