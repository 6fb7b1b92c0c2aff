use chrono::{DateTime, Utc};
use ethers::types::{Address, H256, U256};
use serde::{Deserialize, Serialize};
use strum::Display;

use crate::decimal_u256;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuoteRequest {
    pub source_chain_id: u64,
    pub dest_chain_id:   u64,
    pub token:           Address,
    #[serde(with = "decimal_u256")]
    pub amount:          U256,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuoteResponse {
    pub valid:            bool,
    pub bridge_id:        String,
    pub protocol:         String,
    #[serde(with = "decimal_u256")]
    pub estimated_output: U256,
    /// Total bridge fee, in USD cents, so it serializes as an exact integer.
    pub total_fee_usd_cents: u64,
    pub expires_at:       DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecuteRequest {
    pub bridge_id:       String,
    pub source_tx_hash:  H256,
    pub recipient:       Address,
    #[serde(with = "decimal_u256")]
    pub amount:          U256,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecuteResponse {
    pub success:        bool,
    pub bridge_id:       String,
    #[serde(default)]
    pub error:           Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Display, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
#[strum(serialize_all = "camelCase")]
pub enum BridgeStatus {
    Pending,
    Inflight,
    Completed,
    Failed,
    Refunded,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusResponse {
    pub bridge_id: String,
    pub status:    BridgeStatus,
    #[serde(default)]
    pub error:     Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_partial_status_response() {
        const DATA: &str = indoc::indoc! {r#"{
                "bridgeId": "9c7f1b2e-e1b2-4e5a-9f3b-0c2a6a1e9c10",
                "status": "inflight"
            }
        "#};

        let decoded: StatusResponse = serde_json::from_str(DATA).unwrap();
        assert_eq!(decoded.status, BridgeStatus::Inflight);
        assert!(decoded.error.is_none());
    }
}
