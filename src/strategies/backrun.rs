use async_trait::async_trait;
use chrono::Utc;
use ethers::abi::{encode, Token};
use ethers::providers::Middleware;
use ethers::types::{TransactionRequest, U256};
use tracing::instrument;

use crate::domain::{BackrunDirection, ExecutionResult, Opportunity};
use crate::error::StrategyError;
use crate::gas_oracle::FeeShape;

use super::{Strategy, StrategyContext};

const MAX_AGE_MS: i64 = 2_000;
const SLIPPAGE_BPS: u32 = 100;

/// MEV backrun against a known target transaction. Ethereum-only per §4.11:
/// the high-slippage reversal swap this strategy places is only meaningful
/// immediately behind a mempool-observed transaction on a chain with a
/// public mempool.
pub struct BackrunStrategy {
    max_gas_price_gwei: u64,
    mev_share_refund_percent: f64,
}

impl BackrunStrategy {
    pub fn new(max_gas_price_gwei: u64, mev_share_refund_percent: f64) -> Self {
        Self { max_gas_price_gwei, mev_share_refund_percent }
    }
}

#[async_trait]
impl Strategy for BackrunStrategy {
    fn name(&self) -> &'static str {
        "backrun"
    }

    #[instrument(skip(self, ctx), fields(opportunity_id = %opportunity.id))]
    async fn execute(&self, opportunity: &Opportunity, ctx: &StrategyContext) -> ExecutionResult {
        match self.run(opportunity, ctx).await {
            Ok(result) => result,
            Err(err) => ExecutionResult::failure(opportunity.id.as_str(), opportunity.buy_chain.as_str(), opportunity.buy_dex.as_str(), err),
        }
    }
}

impl BackrunStrategy {
    async fn run(&self, opportunity: &Opportunity, ctx: &StrategyContext) -> Result<ExecutionResult, StrategyError> {
        if opportunity.buy_chain != "ethereum" {
            return Err(StrategyError::Execution("backrun strategy only supports ethereum".to_string()));
        }

        let age_ms = opportunity.age(Utc::now()).num_milliseconds();
        if age_ms > MAX_AGE_MS {
            return Err(StrategyError::Execution(format!("backrun opportunity stale at {age_ms}ms")));
        }
        if opportunity.expected_profit_usd < ctx.config.consumer.min_profit_usd {
            return Err(StrategyError::LowEv { ev: opportunity.expected_profit_usd, min_ev: ctx.config.consumer.min_profit_usd });
        }

        let target = opportunity
            .backrun_target
            .as_ref()
            .ok_or_else(|| StrategyError::Execution("backrun opportunity is missing its target transaction".to_string()))?;

        if !ctx.config.dex_registry.values().any(|d| d.router_address == target.router_address) {
            return Err(StrategyError::Execution(format!("target router {:#x} is not a known dex", target.router_address)));
        }

        let fee = ctx.gas_oracle.current_fee(&opportunity.buy_chain).await?;
        let gas_price_gwei = fee_price_gwei(&fee);
        if gas_price_gwei > self.max_gas_price_gwei as f64 {
            return Err(StrategyError::Execution(format!(
                "current gas price {gas_price_gwei} gwei exceeds backrun ceiling {}",
                self.max_gas_price_gwei
            )));
        }

        let wallet_address = ctx
            .providers
            .wallet_address(&opportunity.buy_chain)
            .ok_or_else(|| StrategyError::Execution("no provider configured for ethereum".to_string()))?;

        let amount = opportunity.amount_in_u256().map_err(|_| StrategyError::Execution("invalid amount".to_string()))?;
        let calldata = build_reverse_swap_calldata(opportunity, amount, target.direction);

        let nonce = ctx
            .nonce_manager
            .allocate(&ctx.providers, &opportunity.buy_chain, wallet_address)
            .await
            .map_err(StrategyError::from)?;

        let provider = ctx
            .providers
            .get(&opportunity.buy_chain)
            .ok_or_else(|| StrategyError::Execution("no provider configured for ethereum".to_string()))?;

        let mut tx = TransactionRequest::new().to(target.router_address).data(calldata).nonce(nonce);
        if let FeeShape::Legacy { gas_price } = fee {
            tx = tx.gas_price(gas_price);
        }

        let submission = async {
            let pending = provider.send_transaction(tx, None).await?;
            let receipt = pending.await?.ok_or_else(|| anyhow::anyhow!("backrun transaction dropped before mining"))?;
            Ok::<_, anyhow::Error>(receipt)
        }
        .await;

        let receipt = match submission {
            Ok(receipt) => receipt,
            Err(err) => {
                ctx.nonce_manager.fail(&opportunity.buy_chain, nonce, false, "backrun submission failed").await;
                return Err(StrategyError::Execution(err.to_string()));
            }
        };
        ctx.nonce_manager.confirm(&opportunity.buy_chain, nonce, receipt.transaction_hash).await;
        ctx.probability_tracker.record(&opportunity.buy_chain, &opportunity.buy_dex, 1, true);

        let refund = opportunity.expected_profit_usd * (self.mev_share_refund_percent / 100.0);
        Ok(ExecutionResult::success(
            opportunity.id.as_str(),
            opportunity.buy_chain.as_str(),
            opportunity.buy_dex.as_str(),
            receipt.transaction_hash,
            opportunity.expected_profit_usd - refund,
            receipt.gas_used.map(|g| g.as_u64()).unwrap_or_default(),
            0.0,
        ))
    }
}

fn fee_price_gwei(fee: &FeeShape) -> f64 {
    let wei = match fee {
        FeeShape::Legacy { gas_price } => gas_price.as_u128(),
        FeeShape::Eip1559 { max_fee_per_gas, .. } => max_fee_per_gas.as_u128(),
    };
    wei as f64 / 1e9
}

fn build_reverse_swap_calldata(opportunity: &Opportunity, amount: U256, direction: BackrunDirection) -> ethers::types::Bytes {
    let min_out = reverse_slippage_floor(amount);
    let path = match direction {
        BackrunDirection::Buy => vec![Token::Address(opportunity.token_out), Token::Address(opportunity.token_in)],
        BackrunDirection::Sell => vec![Token::Address(opportunity.token_in), Token::Address(opportunity.token_out)],
    };
    let selector = ethers::utils::id("swapExactTokensForTokens(uint256,uint256,address[],address,uint256)");
    let encoded = encode(&[Token::Uint(amount), Token::Uint(min_out), Token::Array(path), Token::Uint(U256::zero())]);
    [selector.to_vec(), encoded].concat().into()
}

/// Applies 100bps slippage tolerance against the naive 1:1 output estimate
/// a reverse swap targets.
fn reverse_slippage_floor(amount: U256) -> U256 {
    amount.saturating_sub(amount * U256::from(SLIPPAGE_BPS) / U256::from(10_000))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slippage_floor_is_one_percent_below_amount() {
        let amount = U256::from(10_000u64);
        assert_eq!(reverse_slippage_floor(amount), U256::from(9_900u64));
    }

    #[test]
    fn fee_price_converts_wei_to_gwei() {
        let fee = FeeShape::Legacy { gas_price: U256::from(50_000_000_000u64) };
        assert_eq!(fee_price_gwei(&fee), 50.0);
    }
}
