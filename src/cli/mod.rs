//! CLI entrypoint options (C15): flags carry process-level concerns (config
//! path, logging, bind address); everything domain-specific lives in the
//! layered `Config`.

pub mod logging;

use std::net::SocketAddr;
use std::path::PathBuf;

use clap::Parser;

#[derive(Debug, Parser)]
#[command(name = "arb-execution-engine", version, about)]
pub struct Options {
    #[command(flatten)]
    pub log: logging::Options,

    /// Path to the TOML configuration file. Falls back to `ARB__*` env vars alone.
    #[arg(long, env)]
    pub config: Option<PathBuf>,

    /// Overrides `server.address` from the config file.
    #[arg(long, env)]
    pub server_address: Option<SocketAddr>,

    /// Run environment tag; gates `simulation.enabled` in production (§4.12).
    #[arg(long, env, default_value = "development")]
    pub run_env: String,

    /// Starting capital the drawdown breaker (C8) tracks peak/current against.
    #[arg(long, env, default_value_t = 10_000.0)]
    pub starting_capital_usd: f64,
}
