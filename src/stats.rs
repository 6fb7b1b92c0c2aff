//! Process-wide atomic counters (C17) plus their Prometheus projections.
//!
//! All increments are plain atomic fetch-adds per §5's shared-resource
//! policy; nothing here ever takes a lock.

use std::sync::atomic::{AtomicU64, Ordering};

use once_cell::sync::Lazy;
use prometheus::{register_int_counter, register_int_gauge, IntCounter, IntGauge};

static SUCCESSFUL_EXECUTIONS: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "successful_executions_total",
        "Opportunities that completed with a broadcast, confirmed transaction"
    )
    .unwrap()
});

static FAILED_EXECUTIONS: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "failed_executions_total",
        "Opportunities that reached strategy execution and failed"
    )
    .unwrap()
});

static RISK_DRAWDOWN_BLOCKS: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "risk_drawdown_blocks_total",
        "Opportunities skipped because the drawdown breaker was in HALT"
    )
    .unwrap()
});

static RISK_LOW_EV_REJECTIONS: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "risk_low_ev_rejections_total",
        "Opportunities rejected by the expected-value filter"
    )
    .unwrap()
});

static RISK_POSITION_SIZE_REJECTIONS: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "risk_position_size_rejections_total",
        "Opportunities rejected because the sized position fell below the minimum"
    )
    .unwrap()
});

static STALE_LOCK_RECOVERIES: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "stale_lock_recoveries_total",
        "Distributed locks force-deleted after repeated conflicts from a dead holder"
    )
    .unwrap()
});

static SIMULATION_ERRORS: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "simulation_errors_total",
        "Simulator transport errors that were tolerated (graceful degradation)"
    )
    .unwrap()
});

static DEAD_LETTERED: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "dead_lettered_total",
        "Opportunities routed to the dead-letter stream by the consumer"
    )
    .unwrap()
});

static ACTIVE_EXECUTIONS: Lazy<IntGauge> = Lazy::new(|| {
    register_int_gauge!(
        "active_executions",
        "Opportunity executions currently in flight"
    )
    .unwrap()
});

static QUEUE_DEPTH: Lazy<IntGauge> =
    Lazy::new(|| register_int_gauge!("queue_depth", "Current depth of the opportunity queue").unwrap());

/// Atomic counters shared (read-write) across the orchestrator, risk
/// pipeline and strategies via the read-only context view (§3 Ownership);
/// every field increments through `Ordering::Relaxed` fetch-add, mirroring
/// each counter into its Prometheus projection.
#[derive(Default)]
pub struct Stats {
    pub successful_executions: AtomicU64,
    pub failed_executions: AtomicU64,
    pub risk_drawdown_blocks: AtomicU64,
    pub risk_low_ev_rejections: AtomicU64,
    pub risk_position_size_rejections: AtomicU64,
    pub stale_lock_recoveries: AtomicU64,
    pub simulation_errors: AtomicU64,
    pub dead_lettered: AtomicU64,
}

impl Stats {
    pub fn record_success(&self) {
        self.successful_executions.fetch_add(1, Ordering::Relaxed);
        SUCCESSFUL_EXECUTIONS.inc();
    }

    pub fn record_failure(&self) {
        self.failed_executions.fetch_add(1, Ordering::Relaxed);
        FAILED_EXECUTIONS.inc();
    }

    pub fn record_drawdown_block(&self) {
        self.risk_drawdown_blocks.fetch_add(1, Ordering::Relaxed);
        RISK_DRAWDOWN_BLOCKS.inc();
    }

    pub fn record_low_ev_rejection(&self) {
        self.risk_low_ev_rejections.fetch_add(1, Ordering::Relaxed);
        RISK_LOW_EV_REJECTIONS.inc();
    }

    pub fn record_position_size_rejection(&self) {
        self.risk_position_size_rejections
            .fetch_add(1, Ordering::Relaxed);
        RISK_POSITION_SIZE_REJECTIONS.inc();
    }

    pub fn record_stale_lock_recovery(&self) {
        self.stale_lock_recoveries.fetch_add(1, Ordering::Relaxed);
        STALE_LOCK_RECOVERIES.inc();
    }

    pub fn record_simulation_error(&self) {
        self.simulation_errors.fetch_add(1, Ordering::Relaxed);
        SIMULATION_ERRORS.inc();
    }

    pub fn record_dead_lettered(&self) {
        self.dead_lettered.fetch_add(1, Ordering::Relaxed);
        DEAD_LETTERED.inc();
    }

    pub fn set_active_executions(&self, n: i64) {
        ACTIVE_EXECUTIONS.set(n);
    }

    pub fn set_queue_depth(&self, n: i64) {
        QUEUE_DEPTH.set(n);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            successful_executions: self.successful_executions.load(Ordering::Relaxed),
            failed_executions: self.failed_executions.load(Ordering::Relaxed),
            risk_drawdown_blocks: self.risk_drawdown_blocks.load(Ordering::Relaxed),
            risk_low_ev_rejections: self.risk_low_ev_rejections.load(Ordering::Relaxed),
            risk_position_size_rejections: self
                .risk_position_size_rejections
                .load(Ordering::Relaxed),
            stale_lock_recoveries: self.stale_lock_recoveries.load(Ordering::Relaxed),
            simulation_errors: self.simulation_errors.load(Ordering::Relaxed),
            dead_lettered: self.dead_lettered.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, serde::Serialize)]
pub struct StatsSnapshot {
    pub successful_executions: u64,
    pub failed_executions: u64,
    pub risk_drawdown_blocks: u64,
    pub risk_low_ev_rejections: u64,
    pub risk_position_size_rejections: u64,
    pub stale_lock_recoveries: u64,
    pub simulation_errors: u64,
    pub dead_lettered: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_increment_independently() {
        let stats = Stats::default();
        stats.record_success();
        stats.record_success();
        stats.record_failure();

        let snap = stats.snapshot();
        assert_eq!(snap.successful_executions, 2);
        assert_eq!(snap.failed_executions, 1);
        assert_eq!(snap.risk_drawdown_blocks, 0);
    }
}
