use std::time::Duration;

use async_trait::async_trait;
use ethers::abi::{encode, Token};
use ethers::types::{Address, Bytes, TransactionRequest, U256};
use tracing::{instrument, warn};

use crate::domain::{ExecutionResult, Opportunity};
use crate::error::StrategyError;
use crate::gas_oracle::FeeShape;
use crate::simulator::{SimulationDecision, SimulationRequest};

use super::{reverify, Strategy, StrategyContext};

/// Same-chain swap across two DEXes on one buy/sell leg. Grounded on the
/// shared strategy base described in §4.11 — gas pricing, price
/// re-verification and allowance check run as independent concurrent
/// operations before a single submit-and-wait.
pub struct IntraChainStrategy;

#[async_trait]
impl Strategy for IntraChainStrategy {
    fn name(&self) -> &'static str {
        "intra-chain"
    }

    #[instrument(skip(self, ctx), fields(opportunity_id = %opportunity.id))]
    async fn execute(&self, opportunity: &Opportunity, ctx: &StrategyContext) -> ExecutionResult {
        match self.run(opportunity, ctx).await {
            Ok(result) => result,
            Err(err) => ExecutionResult::failure(opportunity.id.as_str(), opportunity.buy_chain.as_str(), opportunity.buy_dex.as_str(), err),
        }
    }
}

impl IntraChainStrategy {
    async fn run(&self, opportunity: &Opportunity, ctx: &StrategyContext) -> Result<ExecutionResult, StrategyError> {
        if !opportunity.is_intra_chain() {
            return Err(StrategyError::Execution("intra-chain strategy received a cross-chain opportunity".to_string()));
        }

        let wallet_address = ctx
            .providers
            .wallet_address(&opportunity.buy_chain)
            .ok_or_else(|| StrategyError::Execution(format!("no provider configured for chain {}", opportunity.buy_chain)))?;

        let (fee, fresh, allowance_result) = tokio::join!(
            ctx.gas_oracle.current_fee(&opportunity.buy_chain),
            async { reverify(opportunity, chrono::Utc::now(), ctx.config.consumer.min_confidence) },
            self.check_allowance(ctx, opportunity, wallet_address),
        );
        let fee = fee?;
        fresh?;
        let allowance_ok = allowance_result?;

        if !allowance_ok {
            self.submit_approval(opportunity, ctx, wallet_address, &fee).await?;
        }

        let is_v3 = is_v3_dex(&opportunity.buy_dex) || is_v3_dex(&opportunity.sell_dex);
        let calldata = build_swap_calldata(opportunity, is_v3)?;

        let simulated_gas = self.simulate(opportunity, ctx, wallet_address, &calldata).await?;
        let gas_limit = (simulated_gas as f64 * 1.15) as u64;

        let nonce = ctx
            .nonce_manager
            .allocate(&ctx.providers, &opportunity.buy_chain, wallet_address)
            .await
            .map_err(StrategyError::from)?;

        let tx_hash = match self.submit(opportunity, ctx, wallet_address, calldata, gas_limit, nonce, &fee).await {
            Ok(hash) => hash,
            Err(err) => {
                ctx.nonce_manager.fail(&opportunity.buy_chain, nonce, false, "submission failed").await;
                return Err(err);
            }
        };

        ctx.nonce_manager.confirm(&opportunity.buy_chain, nonce, tx_hash).await;
        ctx.probability_tracker.record(&opportunity.buy_chain, &opportunity.buy_dex, 1, true);

        Ok(ExecutionResult::success(
            opportunity.id.as_str(),
            opportunity.buy_chain.as_str(),
            opportunity.buy_dex.as_str(),
            tx_hash,
            opportunity.expected_profit_usd,
            gas_limit,
            gas_limit as f64 * fee_price_wei(&fee) as f64 / 1e18,
        ))
    }

    /// Reads ERC20 `allowance(owner, spender)` on `token_in` for the DEX
    /// router as `spender`, via a raw `eth_call` (no ABI crate dependency
    /// needed for a single read).
    async fn check_allowance(&self, ctx: &StrategyContext, opportunity: &Opportunity, wallet_address: Address) -> Result<bool, StrategyError> {
        use ethers::providers::Middleware;

        let provider = ctx
            .providers
            .get(&opportunity.buy_chain)
            .ok_or_else(|| StrategyError::Execution(format!("no provider for chain {}", opportunity.buy_chain)))?;

        let spender = router_address(&ctx.config, &opportunity.buy_dex);
        let selector = ethers::utils::id("allowance(address,address)");
        let calldata: Bytes = [selector.to_vec(), encode(&[Token::Address(wallet_address), Token::Address(spender)])]
            .concat()
            .into();

        let call = TransactionRequest::new().to(opportunity.token_in).data(calldata);
        let result = provider
            .call(&call.into(), None)
            .await
            .map_err(|err| StrategyError::Execution(format!("allowance read failed: {err}")))?;

        let amount_in = opportunity.amount_in_u256().map_err(|_| StrategyError::Execution("invalid amount".to_string()))?;
        Ok(U256::from_big_endian(&result) >= amount_in)
    }

    async fn submit_approval(
        &self,
        opportunity: &Opportunity,
        ctx: &StrategyContext,
        wallet_address: Address,
        fee: &FeeShape,
    ) -> Result<(), StrategyError> {
        let nonce = ctx
            .nonce_manager
            .allocate(&ctx.providers, &opportunity.buy_chain, wallet_address)
            .await
            .map_err(StrategyError::from)?;

        let approve_selector = ethers::utils::id("approve(address,uint256)");
        let calldata = [approve_selector.to_vec(), encode(&[Token::Address(opportunity.token_in), Token::Uint(U256::MAX)])].concat();

        let result = self.send_raw(ctx, &opportunity.buy_chain, opportunity.token_in, calldata.into(), nonce, fee).await;
        match result {
            Ok(_) => {
                ctx.nonce_manager.confirm(&opportunity.buy_chain, nonce, Default::default()).await;
                Ok(())
            }
            Err(err) => {
                ctx.nonce_manager.fail(&opportunity.buy_chain, nonce, false, "approval failed").await;
                Err(StrategyError::Approval(err.to_string()))
            }
        }
    }

    async fn simulate(
        &self,
        opportunity: &Opportunity,
        ctx: &StrategyContext,
        wallet_address: Address,
        calldata: &Bytes,
    ) -> Result<u64, StrategyError> {
        let request = SimulationRequest {
            chain: opportunity.buy_chain.clone(),
            from: wallet_address,
            to: router_address(&ctx.config, &opportunity.buy_dex),
            data: calldata.clone(),
            value: U256::zero(),
        };
        let decision = ctx
            .simulator
            .evaluate(&request, opportunity.expected_profit_usd, opportunity.age(chrono::Utc::now()))
            .await;

        match decision {
            SimulationDecision::Ok(outcome) => {
                crate::simulator::Simulator::classify(&outcome)?;
                Ok(outcome.gas_used.unwrap_or(ctx.config.simulation.gas_used))
            }
            SimulationDecision::Skipped { reason } => {
                warn!(reason, "simulation skipped, proceeding without a forecast");
                Ok(ctx.config.simulation.gas_used)
            }
        }
    }

    async fn submit(
        &self,
        opportunity: &Opportunity,
        ctx: &StrategyContext,
        wallet_address: Address,
        calldata: Bytes,
        gas_limit: u64,
        nonce: u64,
        fee: &FeeShape,
    ) -> Result<ethers::types::H256, StrategyError> {
        let to = router_address(&ctx.config, &opportunity.buy_dex);
        let hash = self
            .send_prepared(ctx, &opportunity.buy_chain, wallet_address, to, calldata, gas_limit, nonce, fee)
            .await
            .map_err(|err| StrategyError::Execution(err.to_string()))?;
        Ok(hash)
    }

    async fn send_raw(
        &self,
        ctx: &StrategyContext,
        chain: &str,
        to: Address,
        calldata: Bytes,
        nonce: u64,
        fee: &FeeShape,
    ) -> anyhow::Result<ethers::types::H256> {
        let wallet_address = ctx
            .providers
            .wallet_address(chain)
            .ok_or_else(|| anyhow::anyhow!("no provider for chain {chain}"))?;
        self.send_prepared(ctx, chain, wallet_address, to, calldata, 200_000, nonce, fee).await
    }

    async fn send_prepared(
        &self,
        ctx: &StrategyContext,
        chain: &str,
        _from: Address,
        to: Address,
        calldata: Bytes,
        gas_limit: u64,
        nonce: u64,
        fee: &FeeShape,
    ) -> anyhow::Result<ethers::types::H256> {
        use ethers::providers::Middleware;

        let provider = ctx.providers.get(chain).ok_or_else(|| anyhow::anyhow!("no provider for chain {chain}"))?;
        let mut tx = TransactionRequest::new().to(to).data(calldata).gas(gas_limit).nonce(nonce);
        if let FeeShape::Legacy { gas_price } = fee {
            tx = tx.gas_price(*gas_price);
        }

        let pending = tokio::time::timeout(
            ctx.config.timeouts.transaction_timeout,
            provider.send_transaction(tx, None),
        )
        .await
        .map_err(|_| anyhow::anyhow!("transaction submission timed out"))??;

        let receipt = tokio::time::timeout(Duration::from_secs(60), pending)
            .await
            .map_err(|_| anyhow::anyhow!("receipt confirmation timed out"))?
            .map_err(|err| anyhow::anyhow!("provider error awaiting receipt: {err}"))?
            .ok_or_else(|| anyhow::anyhow!("transaction dropped before mining"))?;

        Ok(receipt.transaction_hash)
    }
}

fn fee_price_wei(fee: &FeeShape) -> u128 {
    match fee {
        FeeShape::Legacy { gas_price } => gas_price.as_u128(),
        FeeShape::Eip1559 { max_fee_per_gas, .. } => max_fee_per_gas.as_u128(),
    }
}

fn is_v3_dex(name: &str) -> bool {
    name.ends_with("_v3")
}

fn router_address(config: &crate::config::Config, dex: &str) -> Address {
    config.dex_registry.get(dex).map(|d| d.router_address).unwrap_or_default()
}

fn build_swap_calldata(opportunity: &Opportunity, is_v3: bool) -> Result<Bytes, StrategyError> {
    let amount_in = opportunity.amount_in_u256().map_err(|_| StrategyError::Execution("invalid amount".to_string()))?;
    let selector = if is_v3 {
        ethers::utils::id("exactInputSingle((address,address,uint24,address,uint256,uint256,uint256,uint160))")
    } else {
        ethers::utils::id("swapExactTokensForTokens(uint256,uint256,address[],address,uint256)")
    };
    let path = vec![Token::Address(opportunity.token_in), Token::Address(opportunity.token_out)];
    let encoded = if is_v3 {
        encode(&[Token::Address(opportunity.token_in), Token::Address(opportunity.token_out), Token::Uint(amount_in)])
    } else {
        encode(&[Token::Uint(amount_in), Token::Uint(U256::zero()), Token::Array(path), Token::Uint(U256::zero())])
    };
    Ok([selector.to_vec(), encoded].concat().into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn v3_dex_names_are_detected() {
        assert!(is_v3_dex("uniswap_v3"));
        assert!(!is_v3_dex("sushiswap"));
    }

    #[test]
    fn calldata_builds_for_both_dex_versions() {
        let value = fixtures::intra_chain_opportunity("o1");
        let opportunity: Opportunity = serde_json::from_value(value).unwrap();
        assert!(!build_swap_calldata(&opportunity, true).unwrap().is_empty());
        assert!(!build_swap_calldata(&opportunity, false).unwrap().is_empty());
    }
}
