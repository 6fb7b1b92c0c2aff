use chrono::{DateTime, Utc};
use ethers::types::H256;
use serde::{Deserialize, Serialize};

/// Produced exactly once per opportunity the engine attempts, published to
/// the `execution-results` outcome stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionResult {
    pub opportunity_id: String,
    pub success: bool,
    #[serde(default)]
    pub transaction_hash: Option<H256>,
    #[serde(default)]
    pub actual_profit: Option<f64>,
    #[serde(default)]
    pub gas_used: Option<u64>,
    #[serde(default)]
    pub gas_cost: Option<f64>,
    #[serde(default)]
    pub error: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub chain: String,
    pub dex: String,
}

impl ExecutionResult {
    pub fn success(
        opportunity_id: impl Into<String>,
        chain: impl Into<String>,
        dex: impl Into<String>,
        transaction_hash: H256,
        actual_profit: f64,
        gas_used: u64,
        gas_cost: f64,
    ) -> Self {
        Self {
            opportunity_id: opportunity_id.into(),
            success: true,
            transaction_hash: Some(transaction_hash),
            actual_profit: Some(actual_profit),
            gas_used: Some(gas_used),
            gas_cost: Some(gas_cost),
            error: None,
            timestamp: Utc::now(),
            chain: chain.into(),
            dex: dex.into(),
        }
    }

    pub fn failure(
        opportunity_id: impl Into<String>,
        chain: impl Into<String>,
        dex: impl Into<String>,
        error: impl std::fmt::Display,
    ) -> Self {
        Self {
            opportunity_id: opportunity_id.into(),
            success: false,
            transaction_hash: None,
            actual_profit: None,
            gas_used: None,
            gas_cost: None,
            error: Some(error.to_string()),
            timestamp: Utc::now(),
            chain: chain.into(),
            dex: dex.into(),
        }
    }
}

/// One fee-data sample; `GasOracle` keeps a bounded, age-evicted history of
/// these per chain (§3: ≤100 entries, ≤5 minutes).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct GasBaselineEntry {
    pub price: u128,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderHealth {
    pub healthy: bool,
    pub last_check: DateTime<Utc>,
    pub consecutive_failures: u32,
    pub last_error: Option<String>,
}

impl Default for ProviderHealth {
    fn default() -> Self {
        Self {
            healthy: true,
            last_check: Utc::now(),
            consecutive_failures: 0,
            last_error: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failure_result_carries_no_transaction_hash() {
        let result = ExecutionResult::failure("o1", "ethereum", "uniswap_v3", "[ERR_GAS_SPIKE] x");
        assert!(!result.success);
        assert!(result.transaction_hash.is_none());
        assert_eq!(result.error.as_deref(), Some("[ERR_GAS_SPIKE] x"));
    }
}
