//! Queue (C4): bounded FIFO with high/low watermark auto pause/resume,
//! driven by a `Notify`-based wake-up channel with a fallback tick.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::{Mutex, Notify};
use tracing::info;

use crate::config::QueueConfig;
use crate::domain::Opportunity;

pub struct Queue {
    config: QueueConfig,
    items: Mutex<VecDeque<Opportunity>>,
    paused: AtomicBool,
    manually_paused: AtomicBool,
    wake_up: Notify,
}

impl Queue {
    pub fn new(config: QueueConfig) -> Self {
        Self {
            config,
            items: Mutex::new(VecDeque::new()),
            paused: AtomicBool::new(false),
            manually_paused: AtomicBool::new(false),
            wake_up: Notify::new(),
        }
    }

    /// Returns `false` when the queue is full or paused (manually, or via
    /// the high-water-mark auto-pause).
    pub async fn enqueue(&self, opportunity: Opportunity) -> bool {
        if self.is_paused() {
            return false;
        }

        let mut items = self.items.lock().await;
        if items.len() >= self.config.max_size {
            return false;
        }

        items.push_back(opportunity);
        let depth = items.len();
        drop(items);

        if depth >= self.config.high_water_mark && !self.paused.swap(true, Ordering::SeqCst) {
            info!(depth, high_water_mark = self.config.high_water_mark, "queue auto-paused");
        }

        self.wake_up.notify_one();
        true
    }

    pub async fn dequeue(&self) -> Option<Opportunity> {
        let mut items = self.items.lock().await;
        let item = items.pop_front();
        let depth = items.len();
        drop(items);

        if item.is_some()
            && depth <= self.config.low_water_mark
            && !self.manually_paused.load(Ordering::SeqCst)
            && self.paused.swap(false, Ordering::SeqCst)
        {
            info!(depth, low_water_mark = self.config.low_water_mark, "queue auto-resumed");
        }

        item
    }

    /// Waits for an item to become available, or a 1s fallback tick so
    /// progress is made even under pathological notify timing (§4.4).
    pub async fn wait_for_item(&self) {
        tokio::select! {
            _ = self.wake_up.notified() => {}
            _ = tokio::time::sleep(std::time::Duration::from_secs(1)) => {}
        }
    }

    /// Manual pause for standby mode; independent of the watermark logic.
    pub fn pause(&self) {
        self.manually_paused.store(true, Ordering::SeqCst);
        self.paused.store(true, Ordering::SeqCst);
    }

    pub fn resume(&self) {
        self.manually_paused.store(false, Ordering::SeqCst);
        self.paused.store(false, Ordering::SeqCst);
        self.wake_up.notify_one();
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    pub async fn len(&self) -> usize {
        self.items.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Re-admits an already-dequeued opportunity at the front of the queue,
    /// bypassing the max-size/pause checks — used when the circuit breaker
    /// is OPEN and the orchestrator must put a dequeued item back (§4.10).
    pub async fn requeue_front(&self, opportunity: Opportunity) {
        self.items.lock().await.push_front(opportunity);
        self.wake_up.notify_one();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(max: usize, high: usize, low: usize) -> QueueConfig {
        QueueConfig {
            max_size: max,
            high_water_mark: high,
            low_water_mark: low,
        }
    }

    #[tokio::test]
    async fn auto_pauses_at_high_water_mark() {
        let queue = Queue::new(config(10, 2, 0));
        assert!(queue.enqueue(fixture_opportunity("a")).await);
        assert!(!queue.is_paused());
        assert!(queue.enqueue(fixture_opportunity("b")).await);
        assert!(queue.is_paused());
        assert!(!queue.enqueue(fixture_opportunity("c")).await);
    }

    #[tokio::test]
    async fn auto_resumes_at_low_water_mark() {
        let queue = Queue::new(config(10, 2, 1));
        queue.enqueue(fixture_opportunity("a")).await;
        queue.enqueue(fixture_opportunity("b")).await;
        assert!(queue.is_paused());

        queue.dequeue().await;
        assert!(!queue.is_paused(), "should resume once depth reaches low water mark");
        assert_eq!(queue.len().await, 1);
    }

    #[tokio::test]
    async fn manual_pause_blocks_enqueue_until_resumed() {
        let queue = Queue::new(config(10, 100, 0));
        queue.pause();
        assert!(!queue.enqueue(fixture_opportunity("a")).await);
        queue.resume();
        assert!(queue.enqueue(fixture_opportunity("a")).await);
    }

    fn fixture_opportunity(id: &str) -> Opportunity {
        let value = fixtures::intra_chain_opportunity(id);
        serde_json::from_value(value).unwrap()
    }
}
