//! Process entrypoint (C15): parses CLI/env, loads layered config, wires
//! every C1-C14 collaborator into the orchestrator, and drives the
//! init -> run -> shutdown lifecycle, using `clap::Parser` + `#[tokio::main]`
//! + `dotenvy::dotenv` over the `cli`/`config` split.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Context;
use arb_execution_engine::bridge::BridgeRouter;
use arb_execution_engine::cli::Options;
use arb_execution_engine::config::{self, Config};
use arb_execution_engine::gas_oracle::GasOracle;
use arb_execution_engine::lock::DistributedLock;
use arb_execution_engine::nonce::NonceManager;
use arb_execution_engine::orchestrator::{Orchestrator, OrchestratorDeps};
use arb_execution_engine::provider_pool::ProviderPool;
use arb_execution_engine::publisher::{LoggingPublisher, OutcomePublisher};
use arb_execution_engine::queue::Queue;
use arb_execution_engine::recovery_journal::RecoveryJournal;
use arb_execution_engine::risk::{CircuitBreaker, DrawdownBreaker};
use arb_execution_engine::shutdown;
use arb_execution_engine::simulator::Simulator;
use arb_execution_engine::stats::Stats;
use arb_execution_engine::strategies::backrun::BackrunStrategy;
use arb_execution_engine::strategies::cross_chain::CrossChainStrategy;
use arb_execution_engine::strategies::flash_loan::FlashLoanStrategy;
use arb_execution_engine::strategies::intra_chain::IntraChainStrategy;
use arb_execution_engine::strategies::simulation::SimulationStrategy;
use arb_execution_engine::strategies::statistical::StatisticalStrategy;
use arb_execution_engine::strategies::Strategy;
use clap::Parser;
use ethers::signers::LocalWallet;
use tracing::{info, warn};

/// Backrun strategy gas ceiling absent a dedicated config section (§9 Open
/// Question); revisit if the CLI needs to tune it without a rebuild.
const DEFAULT_BACKRUN_MAX_GAS_PRICE_GWEI: u64 = 200;
const DEFAULT_MEV_SHARE_REFUND_PERCENT: f64 = 10.0;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let options = Options::parse();
    options.log.init();

    let mut config = config::load_config(options.config.as_deref()).context("loading configuration")?;
    if let Some(address) = options.server_address {
        config.server.address = address;
    }

    info!(chains = config.chains.len(), "starting execution engine");

    // Concrete output-stream sinks (Kafka/Redis Streams/etc.) are an
    // external collaborator (§1); `LoggingPublisher` keeps every
    // execution-results/circuit-breaker/health publish call site live
    // until a deployment supplies one.
    let publisher: Arc<dyn OutcomePublisher> = Arc::new(LoggingPublisher);

    let signing_keys = load_signing_keys(&config)?;
    let providers = Arc::new(
        ProviderPool::connect(&config, &signing_keys, publisher.clone())
            .await
            .context("connecting provider pool")?,
    );
    let nonce_manager = Arc::new(NonceManager::new());
    let gas_oracle = Arc::new(GasOracle::new(providers.clone()));
    let simulator = Arc::new(Simulator::new(None));

    let database_url = std::env::var("DATABASE_URL").unwrap_or_else(|_| "sqlite://arb-execution-engine.db".to_string());
    let lock = Arc::new(DistributedLock::connect(&database_url).await.context("connecting lock store")?);
    let recovery_journal = match RecoveryJournal::connect(&database_url).await {
        Ok(journal) => Some(Arc::new(journal)),
        Err(err) => {
            warn!(%err, "recovery journal unavailable, bridge legs will not survive a restart");
            None
        }
    };

    // The bridge aggregator and its concrete adapters are external
    // collaborators (§1); without a registered aggregator endpoint this
    // engine runs with cross-chain execution disabled.
    let bridge_router: Option<Arc<BridgeRouter>> = None;

    let queue = Arc::new(Queue::new(config.queue.clone()));
    let stats = Arc::new(Stats::default());
    let breaker = Arc::new(CircuitBreaker::with_publisher(config.breaker.clone(), publisher.clone(), "engine-0".to_string()));
    let drawdown = DrawdownBreaker::new(config.risk.clone(), options.starting_capital_usd);

    let strategies = build_strategies(&config, &options.run_env)?;

    let deps = OrchestratorDeps {
        config: config.clone(),
        providers: providers.clone(),
        nonce_manager,
        gas_oracle,
        simulator,
        bridge_router,
        recovery_journal,
        lock,
        queue,
        stats,
        drawdown,
        breaker,
        strategies,
        publisher,
    };

    let orchestrator = Orchestrator::new(deps);
    orchestrator.rehydrate().await.context("rehydrating recovery journal")?;
    orchestrator.spawn_background_tasks();

    shutdown::watch_shutdown_signals();

    let run_handle = tokio::spawn(orchestrator.clone().run());
    let server_handle = tokio::spawn(arb_execution_engine::server::run(orchestrator.clone(), config.server.clone()));

    // Opportunity intake (C5) is wired against a concrete `OpportunityStream`
    // supplied by the deployment; the broker itself is an external
    // collaborator (§1) this engine does not ship. A deployment embeds this
    // crate and spawns its own `Consumer::new(stream, ..).run()` alongside
    // the orchestrator started here.

    shutdown::await_shutdown().await;
    orchestrator.shutdown().await;

    run_handle.abort();
    server_handle.abort();

    Ok(())
}

fn load_signing_keys(config: &Config) -> anyhow::Result<HashMap<String, LocalWallet>> {
    let mut keys = HashMap::new();
    for chain in config.chains.keys() {
        let env_key = format!("ARB_SIGNING_KEY_{}", chain.to_uppercase());
        let hex_key = std::env::var(&env_key).with_context(|| format!("missing signing key env var {env_key} for chain {chain}"))?;
        let wallet: LocalWallet = hex_key.parse().with_context(|| format!("invalid signing key for chain {chain}"))?;
        keys.insert(chain.clone(), wallet);
    }
    Ok(keys)
}

fn build_strategies(config: &Config, run_env: &str) -> anyhow::Result<Vec<Arc<dyn Strategy>>> {
    if config.simulation.enabled {
        let simulation = SimulationStrategy::new(config.simulation.clone(), run_env)?;
        return Ok(vec![Arc::new(simulation)]);
    }

    Ok(vec![
        Arc::new(IntraChainStrategy),
        Arc::new(CrossChainStrategy),
        Arc::new(FlashLoanStrategy),
        Arc::new(BackrunStrategy::new(DEFAULT_BACKRUN_MAX_GAS_PRICE_GWEI, DEFAULT_MEV_SHARE_REFUND_PERCENT)),
        Arc::new(StatisticalStrategy::new(config.consumer.min_confidence)),
    ])
}
