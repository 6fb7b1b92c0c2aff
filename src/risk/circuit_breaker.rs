//! Failure Circuit Breaker (C10): consecutive-failure breaker with a
//! half-open probe state — count failures, cool down, probe before fully
//! resuming, the same shape as the retry/backoff loop in `utils.rs`.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::config::BreakerConfig;
use crate::publisher::{CircuitBreakerEvent, LoggingPublisher, OutcomePublisher};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

impl BreakerState {
    fn as_wire(self) -> &'static str {
        match self {
            BreakerState::Closed => "CLOSED",
            BreakerState::Open => "OPEN",
            BreakerState::HalfOpen => "HALF_OPEN",
        }
    }
}

struct Inner {
    state: BreakerState,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
    half_open_attempts: u32,
}

/// Guards strategy execution against a run of consecutive failures. Only the
/// orchestrator calls `record_success`/`record_failure`; `can_execute` is
/// read through the shared context view (§3 Ownership).
pub struct CircuitBreaker {
    config: BreakerConfig,
    inner: Mutex<Inner>,
    publisher: Arc<dyn OutcomePublisher>,
    instance_id: String,
}

impl CircuitBreaker {
    pub fn new(config: BreakerConfig) -> Self {
        Self::with_publisher(config, Arc::new(LoggingPublisher), "execution-engine".to_string())
    }

    pub fn with_publisher(config: BreakerConfig, publisher: Arc<dyn OutcomePublisher>, instance_id: String) -> Self {
        Self {
            config,
            inner: Mutex::new(Inner {
                state: BreakerState::Closed,
                consecutive_failures: 0,
                opened_at: None,
                half_open_attempts: 0,
            }),
            publisher,
            instance_id,
        }
    }

    async fn publish_transition(&self, previous: BreakerState, new: BreakerState, reason: &str, consecutive_failures: u32, cooldown_remaining_ms: u64) {
        let event = CircuitBreakerEvent {
            service: "execution-engine".to_string(),
            instance_id: self.instance_id.clone(),
            previous_state: previous.as_wire().to_string(),
            new_state: new.as_wire().to_string(),
            reason: reason.to_string(),
            timestamp: chrono::Utc::now(),
            consecutive_failures,
            cooldown_remaining_ms,
        };
        if let Err(err) = self.publisher.publish_circuit_breaker(event).await {
            warn!(%err, "failed to publish circuit-breaker event");
        }
    }

    /// True when the orchestrator may dispatch the next dequeued
    /// opportunity. Transitions OPEN -> HALF_OPEN once the cooldown elapses.
    pub async fn can_execute(&self) -> bool {
        let mut inner = self.inner.lock().await;
        match inner.state {
            BreakerState::Closed => true,
            BreakerState::HalfOpen => inner.half_open_attempts < self.config.half_open_max_attempts,
            BreakerState::Open => {
                let cooled_down = inner
                    .opened_at
                    .map(|at| at.elapsed() >= self.config.cooldown)
                    .unwrap_or(false);
                if cooled_down {
                    inner.state = BreakerState::HalfOpen;
                    inner.half_open_attempts = 0;
                    info!("circuit breaker cooldown elapsed, entering HALF_OPEN");
                    let failures = inner.consecutive_failures;
                    drop(inner);
                    self.publish_transition(BreakerState::Open, BreakerState::HalfOpen, "cooldown elapsed", failures, 0)
                        .await;
                    true
                } else {
                    false
                }
            }
        }
    }

    pub async fn record_success(&self) {
        let mut inner = self.inner.lock().await;
        inner.consecutive_failures = 0;
        let previous = inner.state;
        if previous != BreakerState::Closed {
            info!(from = ?previous, "circuit breaker closing after success");
        }
        inner.state = BreakerState::Closed;
        inner.half_open_attempts = 0;
        inner.opened_at = None;
        drop(inner);
        if previous != BreakerState::Closed {
            self.publish_transition(previous, BreakerState::Closed, "probe succeeded", 0, 0).await;
        }
    }

    pub async fn record_failure(&self) {
        let mut inner = self.inner.lock().await;
        match inner.state {
            BreakerState::HalfOpen => {
                warn!("half-open probe failed, re-opening circuit breaker");
                inner.state = BreakerState::Open;
                inner.opened_at = Some(Instant::now());
                let failures = inner.consecutive_failures;
                let cooldown_ms = self.config.cooldown.as_millis() as u64;
                drop(inner);
                self.publish_transition(BreakerState::HalfOpen, BreakerState::Open, "half-open probe failed", failures, cooldown_ms)
                    .await;
            }
            BreakerState::Closed => {
                inner.consecutive_failures += 1;
                if inner.consecutive_failures >= self.config.failure_threshold {
                    warn!(
                        failures = inner.consecutive_failures,
                        threshold = self.config.failure_threshold,
                        "circuit breaker opening"
                    );
                    inner.state = BreakerState::Open;
                    inner.opened_at = Some(Instant::now());
                    let failures = inner.consecutive_failures;
                    let cooldown_ms = self.config.cooldown.as_millis() as u64;
                    drop(inner);
                    self.publish_transition(BreakerState::Closed, BreakerState::Open, "consecutive failure threshold reached", failures, cooldown_ms)
                        .await;
                }
            }
            BreakerState::Open => {}
        }
    }

    pub async fn record_half_open_attempt(&self) {
        let mut inner = self.inner.lock().await;
        if inner.state == BreakerState::HalfOpen {
            inner.half_open_attempts += 1;
        }
    }

    pub async fn state(&self) -> BreakerState {
        self.inner.lock().await.state
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> BreakerConfig {
        BreakerConfig {
            failure_threshold: 3,
            cooldown: Duration::from_millis(50),
            half_open_max_attempts: 1,
        }
    }

    #[tokio::test]
    async fn opens_after_threshold_failures() {
        let breaker = CircuitBreaker::new(config());
        for _ in 0..2 {
            breaker.record_failure().await;
            assert!(breaker.can_execute().await);
        }
        breaker.record_failure().await;
        assert_eq!(breaker.state().await, BreakerState::Open);
        assert!(!breaker.can_execute().await);
    }

    #[tokio::test]
    async fn success_resets_consecutive_failures() {
        let breaker = CircuitBreaker::new(config());
        breaker.record_failure().await;
        breaker.record_failure().await;
        breaker.record_success().await;
        breaker.record_failure().await;
        breaker.record_failure().await;
        assert_eq!(breaker.state().await, BreakerState::Closed);
    }

    #[tokio::test]
    async fn half_open_failure_reopens_immediately() {
        let breaker = CircuitBreaker::new(config());
        for _ in 0..3 {
            breaker.record_failure().await;
        }
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(breaker.can_execute().await);
        assert_eq!(breaker.state().await, BreakerState::HalfOpen);

        breaker.record_failure().await;
        assert_eq!(breaker.state().await, BreakerState::Open);
    }

    #[tokio::test]
    async fn half_open_success_closes() {
        let breaker = CircuitBreaker::new(config());
        for _ in 0..3 {
            breaker.record_failure().await;
        }
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(breaker.can_execute().await);

        breaker.record_success().await;
        assert_eq!(breaker.state().await, BreakerState::Closed);
    }
}
