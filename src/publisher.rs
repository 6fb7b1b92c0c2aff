//! Output-stream publisher (§6): the external collaborator contract for the
//! `execution-results`, `circuit-breaker` and `health` streams, mirroring
//! `OpportunityStream`'s shape for the input side. Concrete sinks
//! (Kafka/Redis Streams/etc.) are out of scope; `LoggingPublisher` is the
//! default so every publish call site is still exercised without one
//! configured.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::info;

use crate::domain::ExecutionResult;

#[derive(Debug, Clone, Serialize)]
pub struct CircuitBreakerEvent {
    pub service: String,
    pub instance_id: String,
    pub previous_state: String,
    pub new_state: String,
    pub reason: String,
    pub timestamp: DateTime<Utc>,
    pub consecutive_failures: u32,
    pub cooldown_remaining_ms: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthEvent {
    pub name: String,
    pub service: String,
    pub status: String,
    pub event: String,
    pub region_id: Option<String>,
    pub timestamp: DateTime<Utc>,
}

#[async_trait]
pub trait OutcomePublisher: Send + Sync {
    async fn publish_result(&self, result: &ExecutionResult) -> anyhow::Result<()>;
    async fn publish_circuit_breaker(&self, event: CircuitBreakerEvent) -> anyhow::Result<()>;
    async fn publish_health(&self, event: HealthEvent) -> anyhow::Result<()>;
}

/// Logs every event at info level instead of forwarding to a broker.
pub struct LoggingPublisher;

#[async_trait]
impl OutcomePublisher for LoggingPublisher {
    async fn publish_result(&self, result: &ExecutionResult) -> anyhow::Result<()> {
        info!(opportunity_id = %result.opportunity_id, success = result.success, "execution-results");
        Ok(())
    }

    async fn publish_circuit_breaker(&self, event: CircuitBreakerEvent) -> anyhow::Result<()> {
        info!(
            service = %event.service,
            previous_state = %event.previous_state,
            new_state = %event.new_state,
            reason = %event.reason,
            "circuit-breaker"
        );
        Ok(())
    }

    async fn publish_health(&self, event: HealthEvent) -> anyhow::Result<()> {
        info!(name = %event.name, service = %event.service, status = %event.status, event = %event.event, "health");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn logging_publisher_accepts_every_event_kind() {
        let publisher = LoggingPublisher;
        publisher
            .publish_result(&ExecutionResult::failure("o1", "ethereum", "uniswap_v3", "[ERR_EXECUTION] x"))
            .await
            .unwrap();
        publisher
            .publish_circuit_breaker(CircuitBreakerEvent {
                service: "execution-engine".to_string(),
                instance_id: "i1".to_string(),
                previous_state: "CLOSED".to_string(),
                new_state: "OPEN".to_string(),
                reason: "consecutive failures".to_string(),
                timestamp: Utc::now(),
                consecutive_failures: 3,
                cooldown_remaining_ms: 30_000,
            })
            .await
            .unwrap();
        publisher
            .publish_health(HealthEvent {
                name: "provider".to_string(),
                service: "execution-engine".to_string(),
                status: "unhealthy".to_string(),
                event: "reconnect_failed".to_string(),
                region_id: None,
                timestamp: Utc::now(),
            })
            .await
            .unwrap();
    }
}
