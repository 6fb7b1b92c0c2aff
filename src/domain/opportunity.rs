use chrono::{DateTime, Utc};
use ethers::types::{Address, U256};
use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::error::ValidationError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OpportunityType {
    IntraChain,
    CrossChain,
    FlashLoan,
    Backrun,
    Statistical,
    NHop,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PathHop {
    pub router: Address,
    pub token_out: Address,
    #[serde(default)]
    pub expected_output: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackrunDirection {
    Buy,
    Sell,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackrunTarget {
    pub tx_hash: String,
    pub router_address: Address,
    pub direction: BackrunDirection,
    pub source: String,
    pub trace_id: String,
}

/// Immutable record produced upstream; the engine never mutates an
/// `Opportunity` after admission, it only derives decisions from it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Opportunity {
    #[serde(default)]
    pub id: String,
    #[serde(rename = "type")]
    pub kind: OpportunityType,
    pub buy_chain: String,
    #[serde(default)]
    pub sell_chain: Option<String>,
    pub buy_dex: String,
    pub sell_dex: String,
    pub token_in: Address,
    pub token_out: Address,
    /// Smallest-unit integer amount, carried as a string on the wire so it
    /// round-trips through JSON without precision loss.
    pub amount_in: String,
    pub expected_profit_usd: f64,
    pub confidence: f64,
    pub timestamp: i64,
    #[serde(default)]
    pub path: Option<Vec<PathHop>>,
    #[serde(default)]
    pub backrun_target: Option<BackrunTarget>,
    #[serde(default)]
    pub use_flash_loan: bool,
}

impl Opportunity {
    /// True when buy and sell legs settle on the same chain.
    pub fn is_intra_chain(&self) -> bool {
        match &self.sell_chain {
            None => true,
            Some(sell) => sell == &self.buy_chain,
        }
    }

    pub fn amount_in_u256(&self) -> Result<U256, ValidationError> {
        U256::from_dec_str(&self.amount_in).map_err(|_| ValidationError::InvalidAmount)
    }

    pub fn age(&self, now: DateTime<Utc>) -> chrono::Duration {
        now - DateTime::from_timestamp_millis(self.timestamp).unwrap_or(now)
    }

    /// Flash-loan dispatch rule resolved per §9 Open Questions: explicit flag
    /// or a type that can only be expressed as a closed-cycle multi-hop.
    pub fn wants_flash_loan(&self) -> bool {
        self.use_flash_loan
            || matches!(self.kind, OpportunityType::FlashLoan | OpportunityType::NHop)
    }

    /// Runs the closed validation taxonomy from §4.5 against a raw,
    /// untrusted JSON payload before it is ever deserialized into the
    /// typed struct above, so every rejection gets a stable tag even when
    /// the payload is shaped wrong.
    pub fn validate_raw(
        value: &serde_json::Value,
        config: &Config,
        now: DateTime<Utc>,
    ) -> Result<Opportunity, ValidationError> {
        let Some(obj) = value.as_object() else {
            return Err(ValidationError::NotObject);
        };
        if obj.is_empty() {
            return Err(ValidationError::Empty);
        }
        if !obj.contains_key("type") {
            return Err(ValidationError::MissingType);
        }

        let opportunity: Opportunity =
            serde_json::from_value(value.clone()).map_err(|_| ValidationError::InvalidType)?;

        if opportunity.id.trim().is_empty() {
            return Err(ValidationError::MissingId);
        }
        if opportunity.token_in == Address::zero() {
            return Err(ValidationError::MissingTokenIn);
        }
        if opportunity.token_out == Address::zero() {
            return Err(ValidationError::MissingTokenOut);
        }

        let amount = opportunity
            .amount_in_u256()
            .map_err(|_| ValidationError::InvalidAmount)?;
        if amount.is_zero() {
            return Err(ValidationError::ZeroAmount);
        }

        if !opportunity.is_intra_chain() {
            let sell_chain = opportunity.sell_chain.as_deref().unwrap_or_default();
            if sell_chain.is_empty() {
                return Err(ValidationError::CrossChainMissingChains);
            }
            if sell_chain == opportunity.buy_chain {
                return Err(ValidationError::CrossChainSame);
            }
            if !config.chains.contains_key(sell_chain) {
                return Err(ValidationError::UnsupportedChain);
            }
        }

        if !config.chains.contains_key(&opportunity.buy_chain) {
            return Err(ValidationError::UnsupportedChain);
        }

        if opportunity.age(now) > chrono::Duration::milliseconds(300_000) {
            return Err(ValidationError::Expired);
        }

        if opportunity.confidence < config.consumer.min_confidence {
            return Err(ValidationError::LowConfidence);
        }

        if opportunity.expected_profit_usd < config.consumer.min_profit_usd {
            return Err(ValidationError::LowProfit);
        }

        Ok(opportunity)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use crate::config::ChainConfig;

    fn test_config() -> Config {
        let mut chains = HashMap::new();
        chains.insert(
            "ethereum".to_string(),
            ChainConfig {
                chain_id: 1,
                block_time: std::time::Duration::from_secs(12),
                native_token: "ETH".to_string(),
                rpc_url: "http://localhost:8545".to_string(),
                ws_url: None,
            },
        );
        chains.insert(
            "arbitrum".to_string(),
            ChainConfig {
                chain_id: 42161,
                block_time: std::time::Duration::from_secs(1),
                native_token: "ETH".to_string(),
                rpc_url: "http://localhost:8546".to_string(),
                ws_url: None,
            },
        );
        Config {
            chains,
            dex_registry: HashMap::new(),
            flash_loan: HashMap::new(),
            risk: Default::default(),
            breaker: Default::default(),
            queue: Default::default(),
            consumer: Default::default(),
            simulation: Default::default(),
            standby: Default::default(),
            server: crate::config::ServerConfig {
                address: "0.0.0.0:9000".parse().unwrap(),
            },
            timeouts: Default::default(),
        }
    }

    #[test]
    fn valid_intra_chain_opportunity_passes() {
        let config = test_config();
        let value = fixtures::intra_chain_opportunity("o1");
        let result = Opportunity::validate_raw(&value, &config, Utc::now());
        assert!(result.is_ok(), "{result:?}");
        assert!(result.unwrap().is_intra_chain());
    }

    #[test]
    fn missing_id_is_rejected() {
        let config = test_config();
        let value = fixtures::invalid_opportunity("MISSING_ID");
        let err = Opportunity::validate_raw(&value, &config, Utc::now()).unwrap_err();
        assert_eq!(err, ValidationError::MissingId);
    }

    #[test]
    fn missing_type_is_rejected() {
        let config = test_config();
        let value = fixtures::invalid_opportunity("MISSING_TYPE");
        let err = Opportunity::validate_raw(&value, &config, Utc::now()).unwrap_err();
        assert_eq!(err, ValidationError::MissingType);
    }

    #[test]
    fn zero_amount_is_rejected() {
        let config = test_config();
        let value = fixtures::invalid_opportunity("ZERO_AMOUNT");
        let err = Opportunity::validate_raw(&value, &config, Utc::now()).unwrap_err();
        assert_eq!(err, ValidationError::ZeroAmount);
    }

    #[test]
    fn expired_opportunity_is_rejected() {
        let config = test_config();
        let value = fixtures::invalid_opportunity("EXPIRED");
        let err = Opportunity::validate_raw(&value, &config, Utc::now()).unwrap_err();
        assert_eq!(err, ValidationError::Expired);
    }

    #[test]
    fn cross_chain_same_chain_is_rejected() {
        let config = test_config();
        let value = fixtures::invalid_opportunity("CROSS_CHAIN_SAME");
        let err = Opportunity::validate_raw(&value, &config, Utc::now()).unwrap_err();
        assert_eq!(err, ValidationError::CrossChainSame);
    }

    #[test]
    fn flash_loan_dispatch_rule_follows_flag_or_type() {
        let mut opp_value = fixtures::n_hop_opportunity("o2");
        let config = test_config();
        let opp = Opportunity::validate_raw(&opp_value, &config, Utc::now()).unwrap();
        assert!(opp.wants_flash_loan());

        opp_value["useFlashLoan"] = serde_json::json!(false);
        opp_value["type"] = serde_json::json!("intra-chain");
        let opp = Opportunity::validate_raw(&opp_value, &config, Utc::now()).unwrap();
        assert!(!opp.wants_flash_loan());
    }
}
