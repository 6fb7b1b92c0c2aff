//! Strategy trait, shared context and factory (C11). Grounded on the
//! teacher's `identity::processor::IdentityProcessor` trait (swappable
//! implementation behind `Arc<dyn Trait>`) and `prover::map`'s
//! suitability-selection factory style.

pub mod backrun;
pub mod cross_chain;
pub mod flash_loan;
pub mod intra_chain;
pub mod simulation;
pub mod statistical;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;

use crate::bridge::BridgeRouter;
use crate::config::Config;
use crate::domain::{ExecutionResult, Opportunity, OpportunityType};
use crate::error::StrategyError;
use crate::gas_oracle::GasOracle;
use crate::nonce::NonceManager;
use crate::provider_pool::ProviderPool;
use crate::recovery_journal::RecoveryJournal;
use crate::risk::DrawdownBreaker;
use crate::simulator::Simulator;
use crate::stats::Stats;
use tokio::sync::Mutex as AsyncMutex;

/// Price re-verification gate shared by every strategy (§4.11 base): the
/// opportunity must still be fresh, at least as profitable as when
/// admitted, and at least as confident.
pub const MAX_REVERIFICATION_AGE_MS: i64 = 3_000;
pub const REVERIFICATION_PROFIT_FACTOR: f64 = 1.2;

/// Read-only collaborator handles injected into every strategy (§3
/// Ownership) — no strategy holds a back-reference to the orchestrator.
pub struct StrategyContext {
    pub config: Config,
    pub providers: Arc<ProviderPool>,
    pub nonce_manager: Arc<NonceManager>,
    pub gas_oracle: Arc<GasOracle>,
    pub simulator: Arc<Simulator>,
    pub bridge_router: Option<Arc<BridgeRouter>>,
    pub recovery_journal: Option<Arc<RecoveryJournal>>,
    pub drawdown: Arc<AsyncMutex<DrawdownBreaker>>,
    pub stats: Arc<Stats>,
    pub probability_tracker: Arc<ExecutionProbabilityTracker>,
}

#[async_trait]
pub trait Strategy: Send + Sync {
    fn name(&self) -> &'static str;
    async fn execute(&self, opportunity: &Opportunity, ctx: &StrategyContext) -> ExecutionResult;
}

/// Exponential-moving-average execution probability per (chain, dex,
/// pathLength), consumed by the EV filter (C9) as `p`.
pub struct ExecutionProbabilityTracker {
    probabilities: DashMap<(String, String, usize), f64>,
    smoothing: f64,
}

impl Default for ExecutionProbabilityTracker {
    fn default() -> Self {
        Self { probabilities: DashMap::new(), smoothing: 0.2 }
    }
}

impl ExecutionProbabilityTracker {
    pub fn probability(&self, chain: &str, dex: &str, path_length: usize) -> f64 {
        self.probabilities
            .get(&(chain.to_string(), dex.to_string(), path_length))
            .map(|e| *e)
            .unwrap_or(0.5)
    }

    pub fn record(&self, chain: &str, dex: &str, path_length: usize, succeeded: bool) {
        let key = (chain.to_string(), dex.to_string(), path_length);
        let sample = if succeeded { 1.0 } else { 0.0 };
        self.probabilities
            .entry(key)
            .and_modify(|p| *p = *p * (1.0 - self.smoothing) + sample * self.smoothing)
            .or_insert(sample * self.smoothing + 0.5 * (1.0 - self.smoothing));
    }
}

/// Picks the strategy for an opportunity per the dispatch rule in §4.12:
/// simulation mode overrides everything; otherwise flash-loan flag/type,
/// then cross-chain, then backrun, then statistical, else intra-chain.
pub struct StrategyFactory {
    simulation_mode: bool,
    strategies: HashMap<&'static str, Arc<dyn Strategy>>,
}

impl StrategyFactory {
    pub fn new(simulation_mode: bool, strategies: Vec<Arc<dyn Strategy>>) -> Self {
        let map = strategies.into_iter().map(|s| (s.name(), s)).collect();
        Self { simulation_mode, strategies: map }
    }

    pub fn select(&self, opportunity: &Opportunity) -> Result<Arc<dyn Strategy>, StrategyError> {
        let name = if self.simulation_mode {
            "simulation"
        } else if opportunity.wants_flash_loan() {
            "flash-loan"
        } else if !opportunity.is_intra_chain() {
            "cross-chain"
        } else if opportunity.kind == OpportunityType::Backrun {
            "backrun"
        } else if opportunity.kind == OpportunityType::Statistical {
            "statistical"
        } else {
            "intra-chain"
        };

        self.strategies.get(name).cloned().ok_or(StrategyError::NoStrategy)
    }
}

/// Shared re-verification check: rejects a stale or now-worse-priced
/// opportunity before a strategy commits to on-chain work.
pub fn reverify(opportunity: &Opportunity, now: chrono::DateTime<chrono::Utc>, min_confidence: f64) -> Result<(), StrategyError> {
    let age_ms = opportunity.age(now).num_milliseconds();
    if age_ms > MAX_REVERIFICATION_AGE_MS {
        return Err(StrategyError::Execution(format!("opportunity stale at re-verification ({age_ms}ms old)")));
    }
    if opportunity.confidence < min_confidence {
        return Err(StrategyError::Execution("confidence dropped below threshold at re-verification".to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    struct StubStrategy(&'static str);

    #[async_trait]
    impl Strategy for StubStrategy {
        fn name(&self) -> &'static str {
            self.0
        }

        async fn execute(&self, opportunity: &Opportunity, _ctx: &StrategyContext) -> ExecutionResult {
            ExecutionResult::failure(opportunity.id.as_str(), opportunity.buy_chain.as_str(), opportunity.buy_dex.as_str(), "stub")
        }
    }

    fn opp(value: serde_json::Value) -> Opportunity {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn dispatch_prefers_simulation_mode_over_everything() {
        let factory = StrategyFactory::new(
            true,
            vec![Arc::new(StubStrategy("simulation")), Arc::new(StubStrategy("flash-loan"))],
        );
        let opportunity = opp(fixtures::n_hop_opportunity("o1"));
        assert_eq!(factory.select(&opportunity).unwrap().name(), "simulation");
    }

    #[test]
    fn dispatch_routes_flash_loan_flag_or_type() {
        let factory = StrategyFactory::new(
            false,
            vec![Arc::new(StubStrategy("flash-loan")), Arc::new(StubStrategy("intra-chain"))],
        );
        let opportunity = opp(fixtures::n_hop_opportunity("o2"));
        assert_eq!(factory.select(&opportunity).unwrap().name(), "flash-loan");
    }

    #[test]
    fn dispatch_routes_cross_chain_by_distinct_chains() {
        let factory = StrategyFactory::new(
            false,
            vec![Arc::new(StubStrategy("cross-chain")), Arc::new(StubStrategy("intra-chain"))],
        );
        let opportunity = opp(fixtures::cross_chain_opportunity_high_fee("o3"));
        assert_eq!(factory.select(&opportunity).unwrap().name(), "cross-chain");
    }

    #[test]
    fn dispatch_falls_back_to_intra_chain() {
        let factory = StrategyFactory::new(false, vec![Arc::new(StubStrategy("intra-chain"))]);
        let opportunity = opp(fixtures::intra_chain_opportunity("o4"));
        assert_eq!(factory.select(&opportunity).unwrap().name(), "intra-chain");
    }

    #[test]
    fn dispatch_errors_when_no_strategy_registered() {
        let factory = StrategyFactory::new(false, vec![]);
        let opportunity = opp(fixtures::intra_chain_opportunity("o5"));
        assert!(matches!(factory.select(&opportunity), Err(StrategyError::NoStrategy)));
    }

    #[test]
    fn probability_tracker_moves_toward_recorded_outcomes() {
        let tracker = ExecutionProbabilityTracker::default();
        for _ in 0..20 {
            tracker.record("ethereum", "uniswap_v2", 1, true);
        }
        assert!(tracker.probability("ethereum", "uniswap_v2", 1) > 0.9);
    }
}
