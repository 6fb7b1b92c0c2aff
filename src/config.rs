use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use ethers::types::Address;
use serde::{Deserialize, Serialize};
use tracing::warn;

pub fn load_config(config_file_path: Option<&Path>) -> anyhow::Result<Config> {
    let mut settings = config::Config::builder();

    if let Some(path) = config_file_path {
        settings = settings.add_source(config::File::from(path).required(true));
    }

    let settings = settings
        .add_source(
            config::Environment::with_prefix("ARB")
                .separator("__")
                .try_parsing(true),
        )
        .build()?;

    let mut config: Config = settings.try_deserialize()?;
    config.validate()?;
    Ok(config)
}

/// Moves `value` onto `[min, max]`, logging a warning naming the field when
/// it had to move.
fn clamp_f64(field: &str, value: f64, min: f64, max: f64) -> f64 {
    let clamped = value.clamp(min, max);
    if clamped != value {
        warn!(field, value, min, max, "config value out of bounds, clamped");
    }
    clamped
}

fn clamp_duration(field: &str, value: Duration, min: Duration, max: Duration) -> Duration {
    let clamped = value.clamp(min, max);
    if clamped != value {
        warn!(field, ?value, ?min, ?max, "config value out of bounds, clamped");
    }
    clamped
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    pub chains: HashMap<String, ChainConfig>,
    #[serde(default)]
    pub dex_registry: HashMap<String, DexConfig>,
    #[serde(default)]
    pub flash_loan: HashMap<String, FlashLoanConfig>,
    #[serde(default)]
    pub risk: RiskConfig,
    #[serde(default)]
    pub breaker: BreakerConfig,
    #[serde(default)]
    pub queue: QueueConfig,
    #[serde(default)]
    pub consumer: ConsumerConfig,
    #[serde(default)]
    pub simulation: SimulationConfig,
    #[serde(default)]
    pub standby: StandbyConfig,
    pub server: ServerConfig,
    #[serde(default)]
    pub timeouts: TimeoutConfig,
}

impl Config {
    /// Clamps every bounded numeric setting into its documented range,
    /// logging a warning for each value that had to move, per §6's "all
    /// numeric values have enforced min/max bounds".
    pub fn validate(&mut self) -> anyhow::Result<()> {
        if self.chains.is_empty() {
            anyhow::bail!("at least one chain must be configured");
        }

        self.risk.caution_pct = clamp_f64("risk.caution_pct", self.risk.caution_pct, 0.0, 1.0);
        self.risk.recovery_pct = clamp_f64("risk.recovery_pct", self.risk.recovery_pct, 0.0, 1.0);
        self.risk.halt_pct = clamp_f64("risk.halt_pct", self.risk.halt_pct, 0.0, 1.0);
        self.risk.kelly_safety_factor = clamp_f64("risk.kelly_safety_factor", self.risk.kelly_safety_factor, 0.0, 1.0);
        self.risk.min_fraction = clamp_f64("risk.min_fraction", self.risk.min_fraction, 0.0, 1.0);
        self.risk.max_fraction = clamp_f64("risk.max_fraction", self.risk.max_fraction, 0.0, 1.0);

        self.consumer.min_confidence = clamp_f64("consumer.min_confidence", self.consumer.min_confidence, 0.0, 1.0);

        self.timeouts.execution_timeout = clamp_duration(
            "timeouts.execution_timeout",
            self.timeouts.execution_timeout,
            Duration::from_secs(1),
            Duration::from_secs(120),
        );
        self.timeouts.transaction_timeout = clamp_duration(
            "timeouts.transaction_timeout",
            self.timeouts.transaction_timeout,
            Duration::from_secs(1),
            Duration::from_secs(120),
        );
        self.timeouts.provider_health_check_timeout = clamp_duration(
            "timeouts.provider_health_check_timeout",
            self.timeouts.provider_health_check_timeout,
            Duration::from_millis(100),
            Duration::from_secs(30),
        );

        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainConfig {
    pub chain_id: u64,
    #[serde(with = "humantime_serde")]
    #[serde(default = "default::block_time")]
    pub block_time: Duration,
    pub native_token: String,
    pub rpc_url: String,
    #[serde(default)]
    pub ws_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DexConfig {
    pub factory_address: Address,
    pub router_address: Address,
    pub fee_bps: u32,
    /// `v2` or `v3`; used by strategies to pick calldata encoding.
    pub version: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlashLoanConfig {
    pub protocol: String,
    pub pool_address: Address,
    pub fee_bps: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskConfig {
    #[serde(default = "default::caution_pct")]
    pub caution_pct: f64,
    #[serde(default = "default::recovery_pct")]
    pub recovery_pct: f64,
    #[serde(default = "default::halt_pct")]
    pub halt_pct: f64,
    #[serde(with = "humantime_serde")]
    #[serde(default = "default::halt_cooldown")]
    pub halt_cooldown: Duration,
    #[serde(default = "default::kelly_safety_factor")]
    pub kelly_safety_factor: f64,
    #[serde(default = "default::min_fraction")]
    pub min_fraction: f64,
    #[serde(default = "default::max_fraction")]
    pub max_fraction: f64,
    #[serde(default = "default::min_ev_usd")]
    pub min_ev_usd: f64,
    #[serde(default = "default::min_position_size_usd")]
    pub min_position_size_usd: f64,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            caution_pct: default::caution_pct(),
            recovery_pct: default::recovery_pct(),
            halt_pct: default::halt_pct(),
            halt_cooldown: default::halt_cooldown(),
            kelly_safety_factor: default::kelly_safety_factor(),
            min_fraction: default::min_fraction(),
            max_fraction: default::max_fraction(),
            min_ev_usd: default::min_ev_usd(),
            min_position_size_usd: default::min_position_size_usd(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BreakerConfig {
    #[serde(default = "default::failure_threshold")]
    pub failure_threshold: u32,
    #[serde(with = "humantime_serde")]
    #[serde(default = "default::breaker_cooldown")]
    pub cooldown: Duration,
    #[serde(default = "default::half_open_max_attempts")]
    pub half_open_max_attempts: u32,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: default::failure_threshold(),
            cooldown: default::breaker_cooldown(),
            half_open_max_attempts: default::half_open_max_attempts(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueConfig {
    #[serde(default = "default::queue_max_size")]
    pub max_size: usize,
    #[serde(default = "default::queue_high_water_mark")]
    pub high_water_mark: usize,
    #[serde(default = "default::queue_low_water_mark")]
    pub low_water_mark: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_size: default::queue_max_size(),
            high_water_mark: default::queue_high_water_mark(),
            low_water_mark: default::queue_low_water_mark(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsumerConfig {
    #[serde(default = "default::batch_size")]
    pub batch_size: usize,
    #[serde(with = "humantime_serde")]
    #[serde(default = "default::block_ms")]
    pub block_ms: Duration,
    #[serde(with = "humantime_serde")]
    #[serde(default = "default::pending_max_age")]
    pub pending_max_age: Duration,
    #[serde(with = "humantime_serde")]
    #[serde(default = "default::stale_cleanup_interval")]
    pub stale_cleanup_interval: Duration,
    #[serde(default = "default::min_confidence")]
    pub min_confidence: f64,
    #[serde(default = "default::min_profit_usd")]
    pub min_profit_usd: f64,
    /// How long an opportunity id is remembered for duplicate-delivery
    /// detection (§4.5 DUPLICATE); at-least-once redelivery within this
    /// window is deduped rather than re-validated and re-enqueued.
    #[serde(with = "humantime_serde")]
    #[serde(default = "default::dedup_window")]
    pub dedup_window: Duration,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            batch_size: default::batch_size(),
            block_ms: default::block_ms(),
            pending_max_age: default::pending_max_age(),
            stale_cleanup_interval: default::stale_cleanup_interval(),
            min_confidence: default::min_confidence(),
            min_profit_usd: default::min_profit_usd(),
            dedup_window: default::dedup_window(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimulationConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default::sim_success_rate_pct")]
    pub success_rate_pct: u32,
    #[serde(default = "default::sim_latency_ms")]
    pub latency_ms: u64,
    #[serde(default = "default::sim_gas_used")]
    pub gas_used: u64,
    #[serde(default = "default::sim_gas_cost_multiplier_pct")]
    pub gas_cost_multiplier_pct: u32,
    #[serde(default = "default::sim_profit_variance_pct")]
    pub profit_variance_pct: u32,
    /// Required to run `enabled = true` when `ARB_ENV=production`.
    #[serde(default)]
    pub allow_in_production: bool,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            success_rate_pct: default::sim_success_rate_pct(),
            latency_ms: default::sim_latency_ms(),
            gas_used: default::sim_gas_used(),
            gas_cost_multiplier_pct: default::sim_gas_cost_multiplier_pct(),
            profit_variance_pct: default::sim_profit_variance_pct(),
            allow_in_production: false,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StandbyConfig {
    #[serde(default)]
    pub is_standby: bool,
    #[serde(default)]
    pub queue_paused_on_start: bool,
    #[serde(default)]
    pub activation_disables_simulation: bool,
    #[serde(default)]
    pub region_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerConfig {
    pub address: SocketAddr,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeoutConfig {
    #[serde(with = "humantime_serde")]
    #[serde(default = "default::execution_timeout")]
    pub execution_timeout: Duration,
    #[serde(with = "humantime_serde")]
    #[serde(default = "default::transaction_timeout")]
    pub transaction_timeout: Duration,
    #[serde(with = "humantime_serde")]
    #[serde(default = "default::provider_health_check_timeout")]
    pub provider_health_check_timeout: Duration,
    #[serde(with = "humantime_serde")]
    #[serde(default = "default::shutdown_timeout")]
    pub shutdown_timeout: Duration,
    #[serde(default = "default::max_concurrent_executions")]
    pub max_concurrent_executions: usize,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            execution_timeout: default::execution_timeout(),
            transaction_timeout: default::transaction_timeout(),
            provider_health_check_timeout: default::provider_health_check_timeout(),
            shutdown_timeout: default::shutdown_timeout(),
            max_concurrent_executions: default::max_concurrent_executions(),
        }
    }
}

pub mod default {
    use std::time::Duration;

    pub fn block_time() -> Duration {
        Duration::from_secs(12)
    }

    pub fn caution_pct() -> f64 {
        0.05
    }

    pub fn recovery_pct() -> f64 {
        0.10
    }

    pub fn halt_pct() -> f64 {
        0.20
    }

    pub fn halt_cooldown() -> Duration {
        Duration::from_secs(3600)
    }

    pub fn kelly_safety_factor() -> f64 {
        0.5
    }

    pub fn min_fraction() -> f64 {
        0.01
    }

    pub fn max_fraction() -> f64 {
        0.25
    }

    pub fn min_ev_usd() -> f64 {
        5.0
    }

    pub fn min_position_size_usd() -> f64 {
        10.0
    }

    pub fn failure_threshold() -> u32 {
        5
    }

    pub fn breaker_cooldown() -> Duration {
        Duration::from_secs(300)
    }

    pub fn half_open_max_attempts() -> u32 {
        1
    }

    pub fn queue_max_size() -> usize {
        1000
    }

    pub fn queue_high_water_mark() -> usize {
        800
    }

    pub fn queue_low_water_mark() -> usize {
        200
    }

    pub fn batch_size() -> usize {
        10
    }

    pub fn block_ms() -> Duration {
        Duration::from_secs(1)
    }

    pub fn pending_max_age() -> Duration {
        Duration::from_secs(600)
    }

    pub fn stale_cleanup_interval() -> Duration {
        Duration::from_secs(60)
    }

    pub fn min_confidence() -> f64 {
        0.05
    }

    pub fn min_profit_usd() -> f64 {
        0.0
    }

    pub fn dedup_window() -> Duration {
        Duration::from_secs(300)
    }

    pub fn sim_success_rate_pct() -> u32 {
        90
    }

    pub fn sim_latency_ms() -> u64 {
        200
    }

    pub fn sim_gas_used() -> u64 {
        150_000
    }

    pub fn sim_gas_cost_multiplier_pct() -> u32 {
        100
    }

    pub fn sim_profit_variance_pct() -> u32 {
        10
    }

    pub fn execution_timeout() -> Duration {
        Duration::from_secs(55)
    }

    pub fn transaction_timeout() -> Duration {
        Duration::from_secs(50)
    }

    pub fn provider_health_check_timeout() -> Duration {
        Duration::from_secs(5)
    }

    pub fn shutdown_timeout() -> Duration {
        Duration::from_secs(5)
    }

    pub fn max_concurrent_executions() -> usize {
        5
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL_TOML: &str = indoc::indoc! {r#"
        [server]
        address = "0.0.0.0:9000"

        [chains.ethereum]
        chain_id = 1
        native_token = "ETH"
        rpc_url = "http://localhost:8545"
    "#};

    #[test]
    fn deserialize_minimal_config() {
        let config: Config = toml::from_str(MINIMAL_TOML).unwrap();
        assert_eq!(config.chains["ethereum"].chain_id, 1);
        assert_eq!(config.risk.caution_pct, default::caution_pct());
        assert_eq!(config.queue.max_size, default::queue_max_size());
    }

    #[test]
    fn rejects_empty_chain_table() {
        let toml = indoc::indoc! {r#"
            [server]
            address = "0.0.0.0:9000"
        "#};
        let mut config: Config = toml::from_str(toml).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn out_of_bounds_risk_pct_is_clamped() {
        let mut config = Config {
            chains: {
                let mut chains = HashMap::new();
                chains.insert(
                    "ethereum".to_string(),
                    ChainConfig {
                        chain_id: 1,
                        block_time: default::block_time(),
                        native_token: "ETH".to_string(),
                        rpc_url: "http://localhost:8545".to_string(),
                        ws_url: None,
                    },
                );
                chains
            },
            dex_registry: Default::default(),
            flash_loan: Default::default(),
            risk: RiskConfig {
                caution_pct: 1.5,
                ..Default::default()
            },
            breaker: Default::default(),
            queue: Default::default(),
            consumer: Default::default(),
            simulation: Default::default(),
            standby: Default::default(),
            server: ServerConfig {
                address: "0.0.0.0:9000".parse().unwrap(),
            },
            timeouts: Default::default(),
        };
        config.validate().unwrap();
        assert_eq!(config.risk.caution_pct, 1.0);
    }

    #[test]
    fn env_override_takes_precedence() {
        std::env::set_var("ARB__RISK__CAUTION_PCT", "0.2");
        std::env::set_var("ARB__CHAINS__ETHEREUM__CHAIN_ID", "1");
        std::env::set_var("ARB__CHAINS__ETHEREUM__NATIVE_TOKEN", "ETH");
        std::env::set_var("ARB__CHAINS__ETHEREUM__RPC_URL", "http://localhost:8545");
        std::env::set_var("ARB__SERVER__ADDRESS", "0.0.0.0:9000");

        let config = load_config(None).unwrap();
        assert_eq!(config.risk.caution_pct, 0.2);

        for key in [
            "ARB__RISK__CAUTION_PCT",
            "ARB__CHAINS__ETHEREUM__CHAIN_ID",
            "ARB__CHAINS__ETHEREUM__NATIVE_TOKEN",
            "ARB__CHAINS__ETHEREUM__RPC_URL",
            "ARB__SERVER__ADDRESS",
        ] {
            std::env::remove_var(key);
        }
    }
}
