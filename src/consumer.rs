//! Opportunity Consumer (C5): durable stream reader, validation gateway and
//! dead-letter routing. A batch-read, per-message-handle, periodic-sweep
//! polling loop.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, instrument, warn};

use crate::config::Config;
use crate::domain::Opportunity;
use crate::error::ValidationError;
use crate::queue::Queue;
use crate::stats::Stats;

/// Bounded, age-evicted record of recently-admitted opportunity ids, so an
/// at-least-once redelivery within `dedup_window` is rejected as a duplicate
/// instead of re-enqueued (§4.5 DUPLICATE).
struct SeenIds {
    window: Duration,
    seen: VecDeque<(String, DateTime<Utc>)>,
}

impl SeenIds {
    fn new(window: Duration) -> Self {
        Self {
            window,
            seen: VecDeque::new(),
        }
    }

    fn evict_expired(&mut self, now: DateTime<Utc>) {
        while self
            .seen
            .front()
            .is_some_and(|(_, seen_at)| (now - *seen_at).to_std().unwrap_or_default() > self.window)
        {
            self.seen.pop_front();
        }
    }

    /// Returns `true` and records the id if it has not been seen within the
    /// window; returns `false` without recording it if it's a duplicate.
    fn check_and_insert(&mut self, id: &str, now: DateTime<Utc>) -> bool {
        self.evict_expired(now);
        if self.seen.iter().any(|(seen_id, _)| seen_id == id) {
            return false;
        }
        self.seen.push_back((id.to_string(), now));
        true
    }
}

/// A message as delivered by the broker, with enough metadata for at-least-
/// once ack/pending bookkeeping.
#[derive(Debug, Clone)]
pub struct StreamMessage {
    pub id: String,
    pub payload: serde_json::Value,
    pub delivered_at: chrono::DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DeadLetter {
    pub original_message: serde_json::Value,
    pub validation_code: String,
    pub reason: String,
    pub timestamp: chrono::DateTime<Utc>,
}

/// External collaborator contract for the durable input stream; concrete
/// brokers (Kafka/Redis Streams/etc.) are out of scope per §1 and implement
/// this trait.
#[async_trait]
pub trait OpportunityStream: Send + Sync {
    async fn read_batch(&self, batch_size: usize, block: Duration) -> anyhow::Result<Vec<StreamMessage>>;
    async fn ack(&self, message_id: &str) -> anyhow::Result<()>;
    async fn pending_older_than(&self, age: Duration) -> anyhow::Result<Vec<String>>;
    async fn dead_letter(&self, entry: DeadLetter) -> anyhow::Result<()>;
}

pub struct Consumer<S: OpportunityStream> {
    stream: Arc<S>,
    config: Config,
    queue: Arc<Queue>,
    stats: Arc<Stats>,
    seen_ids: Mutex<SeenIds>,
}

impl<S: OpportunityStream> Consumer<S> {
    pub fn new(stream: Arc<S>, config: Config, queue: Arc<Queue>, stats: Arc<Stats>) -> Self {
        let seen_ids = Mutex::new(SeenIds::new(config.consumer.dedup_window));
        Self {
            stream,
            config,
            queue,
            stats,
            seen_ids,
        }
    }

    #[instrument(skip(self))]
    pub async fn run(&self) {
        let mut sweep_ticker = tokio::time::interval(self.config.consumer.stale_cleanup_interval);
        loop {
            tokio::select! {
                _ = crate::shutdown::await_shutdown() => return,
                _ = sweep_ticker.tick() => self.sweep_pending().await,
                result = self.stream.read_batch(self.config.consumer.batch_size, self.config.consumer.block_ms) => {
                    match result {
                        Ok(messages) => self.handle_batch(messages).await,
                        Err(err) => {
                            warn!(%err, "stream read failed, backing off");
                            tokio::time::sleep(Duration::from_secs(1)).await;
                        }
                    }
                }
            }
        }
    }

    async fn handle_batch(&self, messages: Vec<StreamMessage>) {
        for message in messages {
            match Opportunity::validate_raw(&message.payload, &self.config, Utc::now()) {
                Ok(opportunity) => {
                    let first_seen = self
                        .seen_ids
                        .lock()
                        .unwrap()
                        .check_and_insert(&opportunity.id, Utc::now());
                    if !first_seen {
                        self.dead_letter(message, ValidationError::Duplicate).await;
                        continue;
                    }
                    if self.queue.enqueue(opportunity).await {
                        // ACK deferred until a terminal ExecutionResult is published
                        // (the orchestrator acks after processing); nothing more to do here.
                    } else {
                        warn!(id = %message.id, "queue rejected enqueue (full or paused), leaving unacked for redelivery");
                    }
                }
                Err(code) => {
                    self.dead_letter(message, code).await;
                }
            }
        }
    }

    async fn dead_letter(&self, message: StreamMessage, code: ValidationError) {
        self.stats.record_dead_lettered();
        let entry = DeadLetter {
            original_message: message.payload,
            validation_code: code.to_string(),
            reason: format!("failed admission validation: {code}"),
            timestamp: Utc::now(),
        };
        if let Err(err) = self.stream.dead_letter(entry).await {
            warn!(%err, "failed to publish dead-letter entry");
        }
        if let Err(err) = self.stream.ack(&message.id).await {
            warn!(%err, "failed to ack dead-lettered message");
        }
    }

    /// ACKs any message stuck in the pending list beyond
    /// `pending_max_age` (well past the execution timeout), treating it as
    /// orphaned (§4.5).
    async fn sweep_pending(&self) {
        match self.stream.pending_older_than(self.config.consumer.pending_max_age).await {
            Ok(ids) => {
                for id in &ids {
                    if let Err(err) = self.stream.ack(id).await {
                        warn!(%err, id, "failed to ack orphaned pending message");
                    }
                }
                if !ids.is_empty() {
                    info!(count = ids.len(), "swept orphaned pending messages");
                }
            }
            Err(err) => warn!(%err, "pending sweep failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    struct InMemoryStream {
        inbox: Mutex<Vec<StreamMessage>>,
        dead_letters: Mutex<Vec<DeadLetter>>,
        acked: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl OpportunityStream for InMemoryStream {
        async fn read_batch(&self, batch_size: usize, _block: Duration) -> anyhow::Result<Vec<StreamMessage>> {
            let mut inbox = self.inbox.lock().unwrap();
            let drain = inbox.len().min(batch_size);
            Ok(inbox.drain(..drain).collect())
        }

        async fn ack(&self, message_id: &str) -> anyhow::Result<()> {
            self.acked.lock().unwrap().push(message_id.to_string());
            Ok(())
        }

        async fn pending_older_than(&self, _age: Duration) -> anyhow::Result<Vec<String>> {
            Ok(vec![])
        }

        async fn dead_letter(&self, entry: DeadLetter) -> anyhow::Result<()> {
            self.dead_letters.lock().unwrap().push(entry);
            Ok(())
        }
    }

    fn test_config() -> Config {
        let mut chains = std::collections::HashMap::new();
        chains.insert(
            "ethereum".to_string(),
            crate::config::ChainConfig {
                chain_id: 1,
                block_time: Duration::from_secs(12),
                native_token: "ETH".to_string(),
                rpc_url: "http://localhost:8545".to_string(),
                ws_url: None,
            },
        );
        Config {
            chains,
            dex_registry: Default::default(),
            flash_loan: Default::default(),
            risk: Default::default(),
            breaker: Default::default(),
            queue: Default::default(),
            consumer: Default::default(),
            simulation: Default::default(),
            standby: Default::default(),
            server: crate::config::ServerConfig {
                address: "0.0.0.0:9000".parse().unwrap(),
            },
            timeouts: Default::default(),
        }
    }

    #[tokio::test]
    async fn valid_message_is_enqueued() {
        let stream = Arc::new(InMemoryStream {
            inbox: Mutex::new(vec![StreamMessage {
                id: "m1".into(),
                payload: fixtures::intra_chain_opportunity("o1"),
                delivered_at: Utc::now(),
            }]),
            dead_letters: Mutex::new(vec![]),
            acked: Mutex::new(vec![]),
        });
        let queue = Arc::new(Queue::new(Default::default()));
        let consumer = Consumer::new(stream.clone(), test_config(), queue.clone(), Arc::new(Stats::default()));

        let batch = stream.read_batch(10, Duration::from_secs(1)).await.unwrap();
        consumer.handle_batch(batch).await;

        assert_eq!(queue.len().await, 1);
        assert!(stream.dead_letters.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn invalid_message_is_dead_lettered_and_acked() {
        let stream = Arc::new(InMemoryStream {
            inbox: Mutex::new(vec![StreamMessage {
                id: "m2".into(),
                payload: fixtures::invalid_opportunity("ZERO_AMOUNT"),
                delivered_at: Utc::now(),
            }]),
            dead_letters: Mutex::new(vec![]),
            acked: Mutex::new(vec![]),
        });
        let queue = Arc::new(Queue::new(Default::default()));
        let stats = Arc::new(Stats::default());
        let consumer = Consumer::new(stream.clone(), test_config(), queue.clone(), stats.clone());

        let batch = stream.read_batch(10, Duration::from_secs(1)).await.unwrap();
        consumer.handle_batch(batch).await;

        assert_eq!(queue.len().await, 0);
        assert_eq!(stream.dead_letters.lock().unwrap().len(), 1);
        assert_eq!(*stream.acked.lock().unwrap(), vec!["m2".to_string()]);
        assert_eq!(stats.snapshot().dead_lettered, 1);
    }

    #[tokio::test]
    async fn redelivered_id_within_window_is_deduped() {
        let stream = Arc::new(InMemoryStream {
            inbox: Mutex::new(vec![
                StreamMessage {
                    id: "m3".into(),
                    payload: fixtures::intra_chain_opportunity("dup-1"),
                    delivered_at: Utc::now(),
                },
                StreamMessage {
                    id: "m4".into(),
                    payload: fixtures::intra_chain_opportunity("dup-1"),
                    delivered_at: Utc::now(),
                },
            ]),
            dead_letters: Mutex::new(vec![]),
            acked: Mutex::new(vec![]),
        });
        let queue = Arc::new(Queue::new(Default::default()));
        let stats = Arc::new(Stats::default());
        let consumer = Consumer::new(stream.clone(), test_config(), queue.clone(), stats.clone());

        let batch = stream.read_batch(10, Duration::from_secs(1)).await.unwrap();
        consumer.handle_batch(batch).await;

        assert_eq!(queue.len().await, 1);
        assert_eq!(stream.dead_letters.lock().unwrap().len(), 1);
        assert_eq!(stream.dead_letters.lock().unwrap()[0].validation_code, "DUPLICATE");
    }
}
