use async_trait::async_trait;
use ethers::types::H256;
use rand::{Rng, RngCore};
use tracing::instrument;

use crate::config::SimulationConfig;
use crate::domain::{ExecutionResult, Opportunity};

use super::{Strategy, StrategyContext};

/// Dry-run strategy: produces a synthetic `ExecutionResult` from configured
/// distributions instead of ever touching a provider. Selected ahead of
/// every other strategy whenever `simulation.enabled` is set (§4.12).
pub struct SimulationStrategy {
    config: SimulationConfig,
}

impl SimulationStrategy {
    /// Refuses to construct a simulation strategy for a production run
    /// unless explicitly overridden, so a misconfigured deploy can't
    /// silently fabricate trades.
    pub fn new(config: SimulationConfig, run_env: &str) -> anyhow::Result<Self> {
        if config.enabled && run_env == "production" && !config.allow_in_production {
            anyhow::bail!("refusing to start with simulation mode enabled in a production run environment");
        }
        Ok(Self { config })
    }
}

#[async_trait]
impl Strategy for SimulationStrategy {
    fn name(&self) -> &'static str {
        "simulation"
    }

    #[instrument(skip(self, _ctx), fields(opportunity_id = %opportunity.id))]
    async fn execute(&self, opportunity: &Opportunity, _ctx: &StrategyContext) -> ExecutionResult {
        tokio::time::sleep(std::time::Duration::from_millis(self.config.latency_ms)).await;

        let mut rng = rand::rng();
        let succeeds = rng.random_range(0..100) < self.config.success_rate_pct;

        if !succeeds {
            return ExecutionResult::failure(opportunity.id.as_str(), opportunity.buy_chain.as_str(), opportunity.buy_dex.as_str(), "[ERR_EXECUTION] simulated failure");
        }

        let variance_pct = self.config.profit_variance_pct as f64 / 100.0;
        let variance = rng.random_range(-variance_pct..=variance_pct);
        let actual_profit = synthesize_profit(opportunity.expected_profit_usd, variance);
        let gas_used = self.config.gas_used;
        let gas_cost = synthesize_gas_cost(gas_used, self.config.gas_cost_multiplier_pct);

        let mut hash_bytes = [0u8; 32];
        rng.fill_bytes(&mut hash_bytes);

        ExecutionResult::success(
            opportunity.id.as_str(),
            opportunity.buy_chain.as_str(),
            opportunity.buy_dex.as_str(),
            H256::from(hash_bytes),
            actual_profit,
            gas_used,
            gas_cost,
        )
    }
}

fn synthesize_profit(expected_profit_usd: f64, variance: f64) -> f64 {
    expected_profit_usd * (1.0 + variance)
}

fn synthesize_gas_cost(gas_used: u64, gas_cost_multiplier_pct: u32) -> f64 {
    gas_used as f64 * (gas_cost_multiplier_pct as f64 / 100.0) / 1e6
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn refuses_to_construct_in_production_without_override() {
        let config = SimulationConfig { enabled: true, allow_in_production: false, ..Default::default() };
        assert!(SimulationStrategy::new(config, "production").is_err());
    }

    #[test]
    fn allows_production_override() {
        let config = SimulationConfig { enabled: true, allow_in_production: true, ..Default::default() };
        assert!(SimulationStrategy::new(config, "production").is_ok());
    }

    #[test]
    fn allows_non_production_regardless_of_override() {
        let config = SimulationConfig { enabled: true, allow_in_production: false, ..Default::default() };
        assert!(SimulationStrategy::new(config, "development").is_ok());
    }

    #[test]
    fn synthesized_profit_applies_variance_fraction() {
        assert_eq!(synthesize_profit(100.0, 0.1), 110.0);
        assert_eq!(synthesize_profit(100.0, -0.1), 90.0);
    }

    #[test]
    fn synthesized_gas_cost_scales_with_multiplier() {
        let base = synthesize_gas_cost(150_000, 100);
        let doubled = synthesize_gas_cost(150_000, 200);
        assert_eq!(doubled, base * 2.0);
    }
}
