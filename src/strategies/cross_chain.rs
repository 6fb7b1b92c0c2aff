use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use ethers::types::{Address, U256};
use tracing::{info, instrument, warn};

use crate::bridge::{is_terminal, BridgeRouter};
use crate::domain::{ExecutionResult, Opportunity};
use crate::error::{BridgeError, StrategyError};
use crate::recovery_journal::{BridgeRecoveryRecord, RecoveryJournal};

use super::{reverify, Strategy, StrategyContext};

const POLL_INTERVAL: Duration = Duration::from_secs(5);
const POLL_TIMEOUT: Duration = Duration::from_secs(30 * 60);

/// Buys on one chain, bridges the proceeds, sells on another. The recovery
/// record is written before the source leg is ever submitted, so a crash
/// mid-bridge is always recoverable.
pub struct CrossChainStrategy;

#[async_trait]
impl Strategy for CrossChainStrategy {
    fn name(&self) -> &'static str {
        "cross-chain"
    }

    #[instrument(skip(self, ctx), fields(opportunity_id = %opportunity.id))]
    async fn execute(&self, opportunity: &Opportunity, ctx: &StrategyContext) -> ExecutionResult {
        match self.run(opportunity, ctx).await {
            Ok(result) => result,
            Err(err) => ExecutionResult::failure(opportunity.id.as_str(), opportunity.buy_chain.as_str(), opportunity.buy_dex.as_str(), err),
        }
    }
}

/// Resolves and validates the destination chain: must be present and
/// distinct from the buy chain (§4.11 cross-chain precondition).
fn dest_chain_of(opportunity: &Opportunity) -> Result<String, StrategyError> {
    let dest_chain = opportunity
        .sell_chain
        .clone()
        .ok_or_else(|| StrategyError::Execution("cross-chain opportunity is missing a sell chain".to_string()))?;
    if dest_chain == opportunity.buy_chain {
        return Err(StrategyError::Execution("cross-chain opportunity has identical buy/sell chains".to_string()));
    }
    Ok(dest_chain)
}

impl CrossChainStrategy {
    async fn run(&self, opportunity: &Opportunity, ctx: &StrategyContext) -> Result<ExecutionResult, StrategyError> {
        let dest_chain = dest_chain_of(opportunity)?;

        let router = ctx
            .bridge_router
            .as_ref()
            .ok_or_else(|| StrategyError::Execution("no bridge router configured".to_string()))?;
        let journal = ctx
            .recovery_journal
            .as_ref()
            .ok_or_else(|| StrategyError::Execution("no recovery journal configured".to_string()))?;

        reverify(opportunity, Utc::now(), ctx.config.consumer.min_confidence)?;

        let amount = opportunity.amount_in_u256().map_err(|_| StrategyError::Execution("invalid amount".to_string()))?;
        let wallet_address = ctx
            .providers
            .wallet_address(&opportunity.buy_chain)
            .ok_or_else(|| StrategyError::Execution(format!("no provider configured for chain {}", opportunity.buy_chain)))?;

        let route = router
            .best_route(&opportunity.buy_chain, &dest_chain, opportunity.token_out, amount, opportunity.expected_profit_usd)
            .await
            .map_err(StrategyError::from)?;

        journal
            .persist_before_submission(&BridgeRecoveryRecord {
                opportunity_id: opportunity.id.clone(),
                bridge_id: route.bridge_id.clone(),
                source_chain: opportunity.buy_chain.clone(),
                dest_chain: dest_chain.clone(),
                source_tx_hash: None,
                recipient: wallet_address,
                amount,
                status: bridge_client::data::BridgeStatus::Pending,
                created_at: Utc::now(),
                updated_at: Utc::now(),
            })
            .await
            .map_err(|err| StrategyError::Execution(format!("failed to persist recovery record: {err}")))?;

        let source_tx_hash = self.submit_source_leg(opportunity, ctx, wallet_address, amount).await?;

        journal
            .attach_source_tx_hash(&opportunity.id, source_tx_hash)
            .await
            .map_err(|err| StrategyError::Execution(format!("failed to attach source tx hash: {err}")))?;

        router
            .execute(&opportunity.buy_chain, &dest_chain, &route.bridge_id, source_tx_hash, wallet_address, amount)
            .await
            .map_err(StrategyError::from)?;

        let status = self.poll_until_terminal(opportunity, router, journal, &dest_chain, &route.bridge_id).await?;

        if !matches!(status, bridge_client::data::BridgeStatus::Completed) {
            return Err(StrategyError::Bridge(BridgeError::Failed(format!("bridge settled with status {status}"))));
        }

        journal
            .delete(&opportunity.id)
            .await
            .map_err(|err| StrategyError::Execution(format!("failed to clear recovery record: {err}")))?;

        ctx.probability_tracker.record(&opportunity.buy_chain, &opportunity.buy_dex, 2, true);

        Ok(ExecutionResult::success(
            opportunity.id.as_str(),
            opportunity.buy_chain.as_str(),
            opportunity.buy_dex.as_str(),
            source_tx_hash,
            opportunity.expected_profit_usd - route.fee_usd,
            0,
            route.fee_usd,
        ))
    }

    /// Resumes polling for a bridge leg that was already submitted before a
    /// restart, using the rehydrated recovery record instead of executing a
    /// fresh source leg.
    pub async fn resume(&self, record: &BridgeRecoveryRecord, router: &BridgeRouter, journal: &RecoveryJournal) -> Result<(), StrategyError> {
        info!(opportunity_id = %record.opportunity_id, bridge_id = %record.bridge_id, "resuming bridge poll after restart");
        let status = self
            .poll_until_terminal_record(record, router, journal)
            .await?;
        if matches!(status, bridge_client::data::BridgeStatus::Completed) {
            journal
                .delete(&record.opportunity_id)
                .await
                .map_err(|err| StrategyError::Execution(err.to_string()))?;
        }
        Ok(())
    }

    async fn submit_source_leg(
        &self,
        opportunity: &Opportunity,
        ctx: &StrategyContext,
        wallet_address: Address,
        amount: U256,
    ) -> Result<ethers::types::H256, StrategyError> {
        use ethers::providers::Middleware;

        let fee = ctx.gas_oracle.current_fee(&opportunity.buy_chain).await?;
        let nonce = ctx
            .nonce_manager
            .allocate(&ctx.providers, &opportunity.buy_chain, wallet_address)
            .await
            .map_err(StrategyError::from)?;

        let provider = ctx
            .providers
            .get(&opportunity.buy_chain)
            .ok_or_else(|| StrategyError::Execution(format!("no provider for chain {}", opportunity.buy_chain)))?;

        let selector = ethers::utils::id("transfer(address,uint256)");
        let calldata: Vec<u8> =
            [selector.to_vec(), ethers::abi::encode(&[ethers::abi::Token::Address(opportunity.token_out), ethers::abi::Token::Uint(amount)])].concat();

        let mut tx = ethers::types::TransactionRequest::new().to(opportunity.token_out).data(calldata).nonce(nonce);
        if let crate::gas_oracle::FeeShape::Legacy { gas_price } = fee {
            tx = tx.gas_price(gas_price);
        }

        let result = async {
            let pending = provider.send_transaction(tx, None).await?;
            let receipt = pending.await?.ok_or_else(|| anyhow::anyhow!("source leg dropped before mining"))?;
            Ok::<_, anyhow::Error>(receipt.transaction_hash)
        }
        .await;

        match result {
            Ok(hash) => {
                ctx.nonce_manager.confirm(&opportunity.buy_chain, nonce, hash).await;
                Ok(hash)
            }
            Err(err) => {
                ctx.nonce_manager.fail(&opportunity.buy_chain, nonce, false, "source leg submission failed").await;
                Err(StrategyError::Execution(err.to_string()))
            }
        }
    }

    async fn poll_until_terminal(
        &self,
        opportunity: &Opportunity,
        router: &BridgeRouter,
        journal: &RecoveryJournal,
        dest_chain: &str,
        bridge_id: &str,
    ) -> Result<bridge_client::data::BridgeStatus, StrategyError> {
        let deadline = tokio::time::Instant::now() + POLL_TIMEOUT;
        loop {
            let status = router
                .poll_status(&opportunity.buy_chain, dest_chain, bridge_id)
                .await
                .map_err(StrategyError::from)?;

            journal
                .update_status(&opportunity.id, status.status)
                .await
                .map_err(|err| StrategyError::Execution(err.to_string()))?;

            if is_terminal(status.status) {
                return Ok(status.status);
            }
            if tokio::time::Instant::now() >= deadline {
                warn!(opportunity_id = %opportunity.id, "bridge poll timed out before reaching a terminal status");
                return Ok(status.status);
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    async fn poll_until_terminal_record(
        &self,
        record: &BridgeRecoveryRecord,
        router: &BridgeRouter,
        journal: &RecoveryJournal,
    ) -> Result<bridge_client::data::BridgeStatus, StrategyError> {
        let deadline = tokio::time::Instant::now() + POLL_TIMEOUT;
        loop {
            let status = router
                .poll_status(&record.source_chain, &record.dest_chain, &record.bridge_id)
                .await
                .map_err(StrategyError::from)?;

            journal
                .update_status(&record.opportunity_id, status.status)
                .await
                .map_err(|err| StrategyError::Execution(err.to_string()))?;

            if is_terminal(status.status) {
                return Ok(status.status);
            }
            if tokio::time::Instant::now() >= deadline {
                return Ok(status.status);
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_buy_and_sell_chain_is_rejected() {
        let value = fixtures::cross_chain_opportunity_high_fee("o1");
        let mut opportunity: Opportunity = serde_json::from_value(value).unwrap();
        opportunity.sell_chain = Some(opportunity.buy_chain.clone());
        assert!(matches!(dest_chain_of(&opportunity), Err(StrategyError::Execution(_))));
    }

    #[test]
    fn distinct_chains_resolve_to_the_sell_chain() {
        let value = fixtures::cross_chain_opportunity_high_fee("o2");
        let opportunity: Opportunity = serde_json::from_value(value).unwrap();
        let expected = opportunity.sell_chain.clone().unwrap();
        assert_eq!(dest_chain_of(&opportunity).unwrap(), expected);
    }
}
