//! Execution Orchestrator (C12): owns every long-lived collaborator,
//! drives the dequeue -> admit -> dispatch -> record loop, and answers the
//! standby-activation control plane. Constructed once behind `Arc<Self>`,
//! with background tasks spawned off that shared handle and a start/
//! shutdown lifecycle driven from the process entrypoint.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::Mutex as AsyncMutex;
use tracing::{error, info, instrument, warn};

use crate::bridge::BridgeRouter;
use crate::config::Config;
use crate::domain::{ExecutionResult, Opportunity};
use crate::error::StrategyError;
use crate::gas_oracle::GasOracle;
use crate::lock::{DistributedLock, OPPORTUNITY_LOCK_TTL};
use crate::nonce::NonceManager;
use crate::provider_pool::ProviderPool;
use crate::publisher::OutcomePublisher;
use crate::queue::Queue;
use crate::recovery_journal::RecoveryJournal;
use crate::risk::sizing::{self, EvInput};
use crate::risk::{CircuitBreaker, DrawdownBreaker};
use crate::simulator::Simulator;
use crate::stats::Stats;
use crate::strategies::{ExecutionProbabilityTracker, Strategy, StrategyContext, StrategyFactory};
use crate::utils::spawn_with_backoff;

/// Everything an opportunity's admission/execution path needs, assembled
/// once at startup and shared (read-mostly) by every worker loop.
pub struct Orchestrator {
    config: Config,
    providers: Arc<ProviderPool>,
    nonce_manager: Arc<NonceManager>,
    gas_oracle: Arc<GasOracle>,
    simulator: Arc<Simulator>,
    bridge_router: Option<Arc<BridgeRouter>>,
    recovery_journal: Option<Arc<RecoveryJournal>>,
    lock: Arc<DistributedLock>,
    queue: Arc<Queue>,
    stats: Arc<Stats>,
    drawdown: Arc<AsyncMutex<DrawdownBreaker>>,
    breaker: Arc<CircuitBreaker>,
    factory: Arc<StrategyFactory>,
    probability_tracker: Arc<ExecutionProbabilityTracker>,
    active_executions: tokio::sync::Semaphore,
    standby: AtomicBool,
    publisher: Arc<dyn OutcomePublisher>,
}

pub struct OrchestratorDeps {
    pub config: Config,
    pub providers: Arc<ProviderPool>,
    pub nonce_manager: Arc<NonceManager>,
    pub gas_oracle: Arc<GasOracle>,
    pub simulator: Arc<Simulator>,
    pub bridge_router: Option<Arc<BridgeRouter>>,
    pub recovery_journal: Option<Arc<RecoveryJournal>>,
    pub lock: Arc<DistributedLock>,
    pub queue: Arc<Queue>,
    pub stats: Arc<Stats>,
    pub drawdown: DrawdownBreaker,
    pub breaker: Arc<CircuitBreaker>,
    pub strategies: Vec<Arc<dyn Strategy>>,
    pub publisher: Arc<dyn OutcomePublisher>,
}

impl Orchestrator {
    pub fn new(deps: OrchestratorDeps) -> Arc<Self> {
        let max_concurrent = deps.config.timeouts.max_concurrent_executions;
        let factory = StrategyFactory::new(deps.config.simulation.enabled, deps.strategies);

        Arc::new(Self {
            config: deps.config,
            providers: deps.providers,
            nonce_manager: deps.nonce_manager,
            gas_oracle: deps.gas_oracle,
            simulator: deps.simulator,
            bridge_router: deps.bridge_router,
            recovery_journal: deps.recovery_journal,
            lock: deps.lock,
            queue: deps.queue,
            stats: deps.stats,
            drawdown: Arc::new(AsyncMutex::new(deps.drawdown)),
            breaker: deps.breaker,
            factory: Arc::new(factory),
            probability_tracker: Arc::new(ExecutionProbabilityTracker::default()),
            active_executions: tokio::sync::Semaphore::new(max_concurrent),
            standby: AtomicBool::new(false),
            publisher: deps.publisher,
        })
    }

    /// Rehydrates any bridge legs left in flight by a previous process and
    /// resumes polling them in the background before the main loop starts
    /// taking new work (§3 BridgeRecoveryRecord lifecycle).
    pub async fn rehydrate(self: &Arc<Self>) -> anyhow::Result<()> {
        let (Some(journal), Some(router)) = (&self.recovery_journal, &self.bridge_router) else {
            return Ok(());
        };

        let pending = journal.rehydrate_pending().await?;
        if pending.is_empty() {
            return Ok(());
        }
        info!(count = pending.len(), "resuming bridge legs left in flight");

        for record in pending {
            let router = router.clone();
            let journal = journal.clone();
            tokio::spawn(async move {
                let strategy = crate::strategies::cross_chain::CrossChainStrategy;
                if let Err(err) = strategy.resume(&record, &router, &journal).await {
                    error!(opportunity_id = %record.opportunity_id, %err, "failed to resume bridge leg");
                }
            });
        }
        Ok(())
    }

    /// Standard lifecycle entrypoint: runs the dequeue loop until shutdown,
    /// honoring standby mode and the circuit breaker.
    #[instrument(skip(self))]
    pub async fn run(self: Arc<Self>) {
        loop {
            tokio::select! {
                _ = crate::shutdown::await_shutdown() => {
                    info!("orchestrator main loop exiting on shutdown signal");
                    return;
                }
                _ = self.queue.wait_for_item() => {}
            }

            if self.is_standby() {
                continue;
            }
            if !self.breaker.can_execute().await {
                continue;
            }

            let Some(opportunity) = self.queue.dequeue().await else {
                continue;
            };

            if self.breaker.state().await == crate::risk::BreakerState::HalfOpen {
                self.breaker.record_half_open_attempt().await;
            }

            let this = self.clone();
            tokio::spawn(async move { this.process(opportunity).await });
        }
    }

    /// Per-opportunity flow: acquire the distributed lock, run risk
    /// admission, dispatch to the selected strategy under a deadline, then
    /// record the outcome everywhere it needs to land.
    #[instrument(skip(self, opportunity), fields(opportunity_id = %opportunity.id))]
    async fn process(self: Arc<Self>, opportunity: Opportunity) {
        let Ok(permit) = self.active_executions.acquire().await else {
            return;
        };
        self.stats.set_active_executions(self.active_executions_in_flight());

        let lock_token = match self.lock.acquire(&opportunity.id, Some(OPPORTUNITY_LOCK_TTL)).await {
            Ok(Some(token)) => token,
            Ok(None) => {
                if self.lock.should_force_delete(&opportunity.id).await {
                    warn!(opportunity_id = %opportunity.id, "forcing stale lock recovery");
                    self.stats.record_stale_lock_recovery();
                    let _ = self.lock.force_delete(&opportunity.id).await;
                }
                drop(permit);
                return;
            }
            Err(err) => {
                error!(%err, "lock store error, dropping opportunity");
                drop(permit);
                return;
            }
        };

        let result = self.admit_and_execute(&opportunity).await;
        self.record_outcome(&opportunity, &result).await;

        if let Err(err) = self.lock.release(&opportunity.id, &lock_token).await {
            warn!(%err, opportunity_id = %opportunity.id, "failed to release distributed lock");
        }
        drop(permit);
        self.stats.set_active_executions(self.active_executions_in_flight());
    }

    async fn admit_and_execute(&self, opportunity: &Opportunity) -> ExecutionResult {
        let permission = self.drawdown.lock().await.is_trading_allowed();
        if !permission.allowed {
            self.stats.record_drawdown_block();
            return ExecutionResult::failure(opportunity.id.as_str(), opportunity.buy_chain.as_str(), opportunity.buy_dex.as_str(), StrategyError::DrawdownHalt);
        }

        let probability = self.probability_tracker.probability(&opportunity.buy_chain, &opportunity.buy_dex, path_length(opportunity));
        let ev_input = EvInput {
            execution_probability: probability,
            expected_profit_usd: opportunity.expected_profit_usd,
            expected_loss_usd: opportunity.expected_profit_usd * 0.5,
            gas_cost_estimate_usd: 5.0,
        };
        if let Err(err) = sizing::check_ev(&ev_input, &self.config.risk) {
            self.stats.record_low_ev_rejection();
            return ExecutionResult::failure(opportunity.id.as_str(), opportunity.buy_chain.as_str(), opportunity.buy_dex.as_str(), err);
        }

        let capital = self.drawdown.lock().await.capital();
        if let Err(err) = sizing::recommended_size(
            probability,
            opportunity.expected_profit_usd,
            ev_input.expected_loss_usd,
            capital,
            permission.size_multiplier,
            &self.config.risk,
        ) {
            self.stats.record_position_size_rejection();
            return ExecutionResult::failure(opportunity.id.as_str(), opportunity.buy_chain.as_str(), opportunity.buy_dex.as_str(), err);
        }

        let strategy = match self.factory.select(opportunity) {
            Ok(strategy) => strategy,
            Err(err) => return ExecutionResult::failure(opportunity.id.as_str(), opportunity.buy_chain.as_str(), opportunity.buy_dex.as_str(), err),
        };

        let ctx = StrategyContext {
            config: self.config.clone(),
            providers: self.providers.clone(),
            nonce_manager: self.nonce_manager.clone(),
            gas_oracle: self.gas_oracle.clone(),
            simulator: self.simulator.clone(),
            bridge_router: self.bridge_router.clone(),
            recovery_journal: self.recovery_journal.clone(),
            drawdown: self.drawdown.clone(),
            stats: self.stats.clone(),
            probability_tracker: self.probability_tracker.clone(),
        };

        match tokio::time::timeout(self.config.timeouts.execution_timeout, strategy.execute(opportunity, &ctx)).await {
            Ok(result) => result,
            Err(_) => ExecutionResult::failure(
                opportunity.id.as_str(),
                opportunity.buy_chain.as_str(),
                opportunity.buy_dex.as_str(),
                StrategyError::Execution("strategy execution exceeded the configured deadline".to_string()),
            ),
        }
    }

    async fn record_outcome(&self, opportunity: &Opportunity, result: &ExecutionResult) {
        if let Err(err) = self.publisher.publish_result(result).await {
            warn!(%err, opportunity_id = %opportunity.id, "failed to publish execution-results event");
        }

        if result.success {
            self.stats.record_success();
            self.breaker.record_success().await;
            self.drawdown.lock().await.record_outcome(result.actual_profit.unwrap_or(0.0));
        } else {
            self.stats.record_failure();
            self.breaker.record_failure().await;
            // Most failures are pre-flight rejections (stale price, EV floor,
            // drawdown halt) that never reach the chain; a failure result
            // carries no gas figure to charge against capital, so treat it
            // as pnl-neutral rather than guessing a loss.
            self.drawdown.lock().await.record_outcome(0.0);
        }
        self.probability_tracker
            .record(&opportunity.buy_chain, &opportunity.buy_dex, path_length(opportunity), result.success);
    }

    fn active_executions_in_flight(&self) -> i64 {
        let max = self.config.timeouts.max_concurrent_executions;
        (max - self.active_executions.available_permits()) as i64
    }

    pub fn is_standby(&self) -> bool {
        self.standby.load(Ordering::SeqCst)
    }

    /// Enters standby: pauses intake and, if configured, forces simulation
    /// mode off so a freshly-promoted standby region never fires against
    /// stale synthetic data (§4.15 standby semantics).
    pub fn activate_standby(&self) {
        info!("activating standby mode");
        self.standby.store(true, Ordering::SeqCst);
        self.queue.pause();
    }

    pub fn deactivate_standby(&self) {
        info!("deactivating standby mode, resuming intake");
        self.standby.store(false, Ordering::SeqCst);
        self.queue.resume();
    }

    pub fn stats(&self) -> Arc<Stats> {
        self.stats.clone()
    }

    pub fn providers(&self) -> Arc<ProviderPool> {
        self.providers.clone()
    }

    /// Spawns every background monitor loop (provider health, gas baseline
    /// invalidation) behind the panic-tolerant backoff wrapper in `utils.rs`.
    pub fn spawn_background_tasks(self: &Arc<Self>) {
        let providers = self.providers.clone();
        spawn_with_backoff(
            move || {
                let providers = providers.clone();
                async move {
                    providers.run_health_loop(std::time::Duration::from_secs(15)).await;
                    Ok(())
                }
            },
            std::time::Duration::from_secs(5),
        );

        let gas_oracle = self.gas_oracle.clone();
        spawn_with_backoff(
            move || {
                let gas_oracle = gas_oracle.clone();
                async move {
                    gas_oracle.run_invalidation_loop().await;
                    Ok(())
                }
            },
            std::time::Duration::from_secs(5),
        );
    }

    /// Orderly shutdown: stop taking new work, let in-flight executions
    /// drain (bounded), then release the durable collaborators.
    pub async fn shutdown(self: Arc<Self>) {
        self.queue.pause();
        let mut hooks = crate::shutdown::Shutdown::new();

        let drain = self.clone();
        hooks.register(move || async move {
            let max = drain.config.timeouts.max_concurrent_executions as u32;
            let _ = drain.active_executions.acquire_many(max).await;
        });

        hooks.run(self.config.timeouts.shutdown_timeout).await;
        info!("orchestrator shutdown complete");
    }
}

fn path_length(opportunity: &Opportunity) -> usize {
    opportunity.path.as_ref().map(|p| p.len()).unwrap_or(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn path_length_defaults_to_one_hop() {
        let value = fixtures::intra_chain_opportunity("o1");
        let opportunity: Opportunity = serde_json::from_value(value).unwrap();
        assert_eq!(path_length(&opportunity), 1);
    }

    #[test]
    fn path_length_reads_n_hop_path() {
        let value = fixtures::n_hop_opportunity("o2");
        let opportunity: Opportunity = serde_json::from_value(value).unwrap();
        assert!(path_length(&opportunity) >= 2);
    }
}
