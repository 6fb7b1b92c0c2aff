//! Bridge Router (C13): quote/execute/poll adapter selection across the
//! cross-chain bridge aggregators the engine is configured with, built as a
//! typed reqwest client wrapped by a thin domain-facing adapter, selected
//! through a small suitability factory.

use std::collections::HashMap;
use std::sync::Arc;

use bridge_client::data::{BridgeStatus, ExecuteRequest, QuoteRequest, QuoteResponse, StatusResponse};
use bridge_client::BridgeAggregatorClient;
use ethers::types::{Address, H256, U256};
use tracing::instrument;

use crate::error::BridgeError;

/// Converts a bridge's `totalFeeUsdCents` into the same unit strategies
/// reason about expected profit in. Resolved as an injected collaborator
/// (§9 Open Question) rather than a static constant, since native-token USD
/// price is itself an external, per-chain data feed.
pub trait NativePriceOracle: Send + Sync {
    fn usd_cents(&self, chain: &str, amount_wei: U256) -> u64;
}

pub struct FixedNativePriceOracle {
    prices_usd_per_eth: HashMap<String, f64>,
}

impl FixedNativePriceOracle {
    pub fn new(prices_usd_per_eth: HashMap<String, f64>) -> Self {
        Self { prices_usd_per_eth }
    }
}

impl NativePriceOracle for FixedNativePriceOracle {
    fn usd_cents(&self, chain: &str, amount_wei: U256) -> u64 {
        let price = self.prices_usd_per_eth.get(chain).copied().unwrap_or(0.0);
        let eth = amount_wei.as_u128() as f64 / 1e18;
        (eth * price * 100.0).round() as u64
    }
}

pub struct BridgeRoute {
    pub bridge_id: String,
    pub quote: QuoteResponse,
    pub fee_usd: f64,
}

/// Picks the single aggregator registered for a (source, dest) chain pair.
/// Multiple candidate bridges per pair are possible in principle; this
/// engine keeps a one-adapter-per-resource factory shape and leaves
/// multi-bridge best-of selection as a thin loop over the registered
/// clients.
pub struct BridgeRouter {
    clients: HashMap<(String, String), Arc<BridgeAggregatorClient>>,
    chain_ids: HashMap<String, u64>,
}

impl BridgeRouter {
    pub fn new(clients: HashMap<(String, String), Arc<BridgeAggregatorClient>>, chain_ids: HashMap<String, u64>) -> Self {
        Self { clients, chain_ids }
    }

    /// Requests a quote from the configured aggregator for `source` ->
    /// `dest`, validates it is not already expired and that its fee does
    /// not exceed half the expected profit (§4.11 cross-chain gate).
    #[instrument(skip(self))]
    pub async fn best_route(
        &self,
        source: &str,
        dest: &str,
        token: Address,
        amount: U256,
        expected_profit_usd: f64,
    ) -> Result<BridgeRoute, BridgeError> {
        let client = self
            .clients
            .get(&(source.to_string(), dest.to_string()))
            .ok_or_else(|| BridgeError::NoRoute { chain_source: source.to_string(), dest: dest.to_string() })?;

        let source_chain_id = *self.chain_ids.get(source).ok_or_else(|| BridgeError::NoRoute {
            chain_source: source.to_string(),
            dest: dest.to_string(),
        })?;
        let dest_chain_id = *self.chain_ids.get(dest).ok_or_else(|| BridgeError::NoRoute {
            chain_source: source.to_string(),
            dest: dest.to_string(),
        })?;

        let quote = client
            .quote(&QuoteRequest { source_chain_id, dest_chain_id, token, amount })
            .await
            .map_err(BridgeError::Client)?;

        if !quote.valid {
            return Err(BridgeError::NoRoute { chain_source: source.to_string(), dest: dest.to_string() });
        }
        if is_expired(chrono::Utc::now(), quote.expires_at) {
            return Err(BridgeError::QuoteExpired { bridge_id: quote.bridge_id.clone(), expires_at: quote.expires_at });
        }

        let fee_usd = quote.total_fee_usd_cents as f64 / 100.0;
        if fee_exceeds_half_profit(fee_usd, expected_profit_usd) {
            return Err(BridgeError::FeeTooHigh { fee_usd, profit_usd: expected_profit_usd });
        }

        Ok(BridgeRoute { bridge_id: quote.bridge_id.clone(), quote, fee_usd })
    }

    #[instrument(skip(self))]
    pub async fn execute(
        &self,
        source: &str,
        dest: &str,
        bridge_id: &str,
        source_tx_hash: H256,
        recipient: Address,
        amount: U256,
    ) -> Result<(), BridgeError> {
        let client = self
            .clients
            .get(&(source.to_string(), dest.to_string()))
            .ok_or_else(|| BridgeError::NoRoute { chain_source: source.to_string(), dest: dest.to_string() })?;

        let response = client
            .execute(&ExecuteRequest { bridge_id: bridge_id.to_string(), source_tx_hash, recipient, amount })
            .await
            .map_err(BridgeError::Client)?;

        if !response.success {
            return Err(BridgeError::Failed(response.error.unwrap_or_else(|| "unknown bridge execution error".to_string())));
        }
        Ok(())
    }

    pub async fn poll_status(&self, source: &str, dest: &str, bridge_id: &str) -> Result<StatusResponse, BridgeError> {
        let client = self
            .clients
            .get(&(source.to_string(), dest.to_string()))
            .ok_or_else(|| BridgeError::NoRoute { chain_source: source.to_string(), dest: dest.to_string() })?;

        client.get_status(bridge_id).await.map_err(BridgeError::Client)
    }
}

pub fn is_terminal(status: BridgeStatus) -> bool {
    matches!(status, BridgeStatus::Completed | BridgeStatus::Failed | BridgeStatus::Refunded)
}

/// A quote expiring exactly now is treated as already expired (§4.11
/// boundary-inclusive rejection), matching the gas-spike threshold's own
/// boundary semantics.
fn is_expired(now: chrono::DateTime<chrono::Utc>, expires_at: chrono::DateTime<chrono::Utc>) -> bool {
    now >= expires_at
}

/// A fee exactly equal to half the expected profit is rejected, not
/// admitted.
fn fee_exceeds_half_profit(fee_usd: f64, expected_profit_usd: f64) -> bool {
    fee_usd >= 0.5 * expected_profit_usd
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_price_oracle_converts_wei_to_cents() {
        let mut prices = HashMap::new();
        prices.insert("ethereum".to_string(), 2000.0);
        let oracle = FixedNativePriceOracle::new(prices);

        let one_eth = U256::from(10).pow(U256::from(18));
        assert_eq!(oracle.usd_cents("ethereum", one_eth), 200_000);
    }

    #[test]
    fn terminal_statuses_are_closed() {
        assert!(is_terminal(BridgeStatus::Completed));
        assert!(is_terminal(BridgeStatus::Failed));
        assert!(is_terminal(BridgeStatus::Refunded));
        assert!(!is_terminal(BridgeStatus::Pending));
        assert!(!is_terminal(BridgeStatus::Inflight));
    }

    #[test]
    fn quote_expiring_exactly_now_is_rejected() {
        let now = chrono::Utc::now();
        assert!(is_expired(now, now));
        assert!(!is_expired(now, now + chrono::Duration::seconds(1)));
    }

    #[test]
    fn fee_exactly_half_profit_is_rejected() {
        assert!(fee_exceeds_half_profit(50.0, 100.0));
        assert!(!fee_exceeds_half_profit(49.99, 100.0));
    }
}
