use async_trait::async_trait;
use chrono::Utc;
use tracing::instrument;

use crate::domain::{ExecutionResult, Opportunity};
use crate::error::StrategyError;

use super::{Strategy, StrategyContext};

const MAX_AGE_MS: i64 = 3_000;

/// Statistical-arbitrage opportunities (signal-derived, not path-derived)
/// are gated on age/confidence/profit and then delegated to the flash-loan
/// strategy with `useFlashLoan` forced on, since a statistical edge still
/// needs the same atomic borrow-swap-repay execution shape. Never
/// synthesizes a result of its own — a missing flash-loan strategy is a
/// hard failure, per §4.11.
pub struct StatisticalStrategy {
    min_confidence: f64,
}

impl StatisticalStrategy {
    pub fn new(min_confidence: f64) -> Self {
        Self { min_confidence }
    }
}

#[async_trait]
impl Strategy for StatisticalStrategy {
    fn name(&self) -> &'static str {
        "statistical"
    }

    #[instrument(skip(self, ctx), fields(opportunity_id = %opportunity.id))]
    async fn execute(&self, opportunity: &Opportunity, ctx: &StrategyContext) -> ExecutionResult {
        match self.run(opportunity, ctx).await {
            Ok(result) => result,
            Err(err) => ExecutionResult::failure(opportunity.id.as_str(), opportunity.buy_chain.as_str(), opportunity.buy_dex.as_str(), err),
        }
    }
}

impl StatisticalStrategy {
    /// Age/confidence/profit admission gate, factored out of `run` so it can
    /// be exercised without standing up a full `StrategyContext`.
    fn check_gates(&self, opportunity: &Opportunity, min_profit_usd: f64, now: chrono::DateTime<Utc>) -> Result<(), StrategyError> {
        let age_ms = opportunity.age(now).num_milliseconds();
        if age_ms > MAX_AGE_MS {
            return Err(StrategyError::Execution(format!("statistical opportunity stale at {age_ms}ms")));
        }
        if opportunity.confidence < self.min_confidence {
            return Err(StrategyError::Execution("statistical opportunity below confidence floor".to_string()));
        }
        if opportunity.expected_profit_usd < min_profit_usd {
            return Err(StrategyError::LowEv { ev: opportunity.expected_profit_usd, min_ev: min_profit_usd });
        }
        Ok(())
    }

    async fn run(&self, opportunity: &Opportunity, ctx: &StrategyContext) -> Result<ExecutionResult, StrategyError> {
        self.check_gates(opportunity, ctx.config.consumer.min_profit_usd, Utc::now())?;

        let mut forced = opportunity.clone();
        forced.use_flash_loan = true;

        let flash_loan = super::flash_loan::FlashLoanStrategy;
        Ok(flash_loan.execute(&forced, ctx).await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stale_opportunity_is_rejected_before_delegating() {
        let strategy = StatisticalStrategy::new(0.5);
        let value = fixtures::intra_chain_opportunity("o1");
        let mut opportunity: Opportunity = serde_json::from_value(value).unwrap();
        opportunity.timestamp = (Utc::now() - chrono::Duration::seconds(10)).timestamp_millis();

        let err = strategy.check_gates(&opportunity, 0.0, Utc::now()).unwrap_err();
        assert!(matches!(err, StrategyError::Execution(ref msg) if msg.contains("stale")));
    }

    #[test]
    fn low_confidence_opportunity_is_rejected() {
        let strategy = StatisticalStrategy::new(0.9);
        let value = fixtures::intra_chain_opportunity("o2");
        let opportunity: Opportunity = serde_json::from_value(value).unwrap();

        let err = strategy.check_gates(&opportunity, 0.0, Utc::now()).unwrap_err();
        assert!(matches!(err, StrategyError::Execution(ref msg) if msg.contains("confidence")));
    }

    #[test]
    fn fresh_confident_profitable_opportunity_passes_gates() {
        let strategy = StatisticalStrategy::new(0.5);
        let value = fixtures::intra_chain_opportunity("o3");
        let opportunity: Opportunity = serde_json::from_value(value).unwrap();

        assert!(strategy.check_gates(&opportunity, 0.0, Utc::now()).is_ok());
    }
}
