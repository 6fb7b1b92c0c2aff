//! Closed, per-subsystem error enums plus the top-level wire error that
//! renders the `[ERR_XXX]` tags strategies and the orchestrator publish on
//! the outcome stream.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum GasOracleError {
    #[error("[ERR_GAS_SPIKE] current gas {current} exceeds baseline {baseline} x {multiplier}")]
    Spike {
        current: u128,
        baseline: u128,
        multiplier: f64,
    },
    #[error("[ERR_NO_CHAIN] no fee data available for chain {0}")]
    NoFeeData(String),
}

#[derive(Debug, Error)]
pub enum SimulatorError {
    #[error("[ERR_SIMULATION_REVERT] {reason}")]
    Reverted { reason: String },
    #[error("simulator transport error: {0}")]
    Transport(#[from] reqwest::Error),
}

#[derive(Debug, Error)]
pub enum LockError {
    #[error("lock already held for resource {0}")]
    Conflict(String),
    #[error("lock store error: {0}")]
    Store(#[from] sqlx::Error),
    #[error("release attempted with a token that does not match the holder")]
    TokenMismatch,
}

#[derive(Debug, Error)]
pub enum NonceError {
    #[error("[ERR_NONCE] too many pending nonces for chain {0} (limit {1})")]
    PendingLimitReached(String, usize),
    #[error("[ERR_NONCE] provider error while reading nonce for chain {0}: {1}")]
    Provider(String, String),
}

#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("[ERR_NO_CHAIN] no bridge route registered for {chain_source} -> {dest}")]
    NoRoute { chain_source: String, dest: String },
    #[error("[ERR_QUOTE_EXPIRED] bridge quote for {bridge_id} expired at {expires_at}")]
    QuoteExpired {
        bridge_id: String,
        expires_at: chrono::DateTime<chrono::Utc>,
    },
    #[error("[ERR_HIGH_FEES] bridge fee {fee_usd} exceeds 50% of expected profit {profit_usd}")]
    FeeTooHigh { fee_usd: f64, profit_usd: f64 },
    #[error("[ERR_BRIDGE_FAILED] {0}")]
    Failed(String),
    #[error("bridge aggregator request failed: {0}")]
    Client(#[from] anyhow::Error),
}

#[derive(Debug, Error)]
pub enum StrategyError {
    #[error("[ERR_LOW_EV] expected value {ev} below minimum {min_ev}")]
    LowEv { ev: f64, min_ev: f64 },
    #[error("[ERR_POSITION_SIZE] recommended size {size} below minimum {min_size}")]
    PositionTooSmall { size: f64, min_size: f64 },
    #[error("[ERR_DRAWDOWN_HALT] drawdown breaker is in HALT state")]
    DrawdownHalt,
    #[error("[ERR_APPROVAL] token approval transaction failed: {0}")]
    Approval(String),
    #[error(transparent)]
    Gas(#[from] GasOracleError),
    #[error(transparent)]
    Simulation(#[from] SimulatorError),
    #[error(transparent)]
    Nonce(#[from] NonceError),
    #[error(transparent)]
    Bridge(#[from] BridgeError),
    #[error("no strategy registered for this opportunity shape")]
    NoStrategy,
    #[error("[ERR_EXECUTION] {0}")]
    Execution(String),
}

/// The closed taxonomy from the admission/validation pipeline; each variant
/// carries the stable tag published on the dead-letter stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum ValidationError {
    Empty,
    NotObject,
    MissingId,
    MissingType,
    InvalidType,
    MissingTokenIn,
    MissingTokenOut,
    InvalidAmount,
    ZeroAmount,
    CrossChainMissingChains,
    CrossChainSame,
    UnsupportedChain,
    Expired,
    LowConfidence,
    LowProfit,
    Duplicate,
}

impl StrategyError {
    /// The stable `[ERR_XXX]` tag a caller can match on without parsing the
    /// message string.
    pub fn tag(&self) -> &'static str {
        match self {
            Self::LowEv { .. } => "ERR_LOW_EV",
            Self::PositionTooSmall { .. } => "ERR_POSITION_SIZE",
            Self::DrawdownHalt => "ERR_DRAWDOWN_HALT",
            Self::Approval(_) => "ERR_APPROVAL",
            Self::Gas(GasOracleError::Spike { .. }) => "ERR_GAS_SPIKE",
            Self::Gas(GasOracleError::NoFeeData(_)) => "ERR_NO_CHAIN",
            Self::Simulation(_) => "ERR_SIMULATION_REVERT",
            Self::Nonce(_) => "ERR_NONCE",
            Self::Bridge(BridgeError::QuoteExpired { .. }) => "ERR_QUOTE_EXPIRED",
            Self::Bridge(BridgeError::FeeTooHigh { .. }) => "ERR_HIGH_FEES",
            Self::Bridge(BridgeError::Failed(_)) => "ERR_BRIDGE_FAILED",
            Self::Bridge(_) => "ERR_NO_CHAIN",
            Self::NoStrategy => "ERR_EXECUTION",
            Self::Execution(_) => "ERR_EXECUTION",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tag_matches_wire_prefix() {
        let err = StrategyError::LowEv {
            ev: -1.0,
            min_ev: 5.0,
        };
        assert!(err.to_string().starts_with("[ERR_LOW_EV]"));
        assert_eq!(err.tag(), "ERR_LOW_EV");
    }

    #[test]
    fn validation_error_renders_screaming_snake() {
        assert_eq!(ValidationError::ZeroAmount.to_string(), "ZERO_AMOUNT");
    }
}
