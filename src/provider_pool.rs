//! Provider Pool (C1): one RPC connection and bound signing wallet per
//! configured chain, with a background health loop and exponential-backoff
//! reconnect.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use ethers::middleware::SignerMiddleware;
use ethers::providers::{Http, Middleware, Provider};
use ethers::signers::{LocalWallet, Signer};
use tokio::sync::broadcast;
use tokio::time::timeout;
use tracing::{error, info, instrument, warn};

use crate::config::Config;
use crate::domain::ProviderHealth;
use crate::publisher::{HealthEvent, OutcomePublisher};

pub type ChainProvider = SignerMiddleware<Provider<Http>, LocalWallet>;

/// Emitted whenever a chain's provider transitions healthy <-> unhealthy, or
/// completes a reconnect. The gas oracle subscribes to replace its baseline
/// snapshot rather than clearing it in place (§9 Open Question).
#[derive(Debug, Clone)]
pub struct ProviderEvent {
    pub chain: String,
    pub reconnected: bool,
}

pub struct ProviderPool {
    providers: DashMap<String, Arc<ChainProvider>>,
    health: DashMap<String, ProviderHealth>,
    health_check_timeout: Duration,
    events: broadcast::Sender<ProviderEvent>,
    publisher: Arc<dyn OutcomePublisher>,
}

impl ProviderPool {
    /// Connects to every configured chain; a signing key must be supplied
    /// per chain (production deployments source it from a keystore, tests
    /// inject a deterministic dev key).
    #[instrument(name = "ProviderPool::connect", skip(config, signing_keys, publisher))]
    pub async fn connect(
        config: &Config,
        signing_keys: &HashMap<String, LocalWallet>,
        publisher: Arc<dyn OutcomePublisher>,
    ) -> anyhow::Result<Self> {
        let providers = DashMap::new();
        let health = DashMap::new();
        let (events, _) = broadcast::channel(64);

        for (name, chain) in &config.chains {
            let wallet = signing_keys
                .get(name)
                .ok_or_else(|| anyhow::anyhow!("no signing key configured for chain {name}"))?
                .clone()
                .with_chain_id(chain.chain_id);

            let provider = Provider::<Http>::try_from(chain.rpc_url.as_str())?;
            let signed = SignerMiddleware::new(provider, wallet);

            match signed.get_chainid().await {
                Ok(observed) if observed.as_u64() == chain.chain_id => {
                    info!(chain = %name, chain_id = chain.chain_id, "connected to provider");
                }
                Ok(observed) => {
                    anyhow::bail!(
                        "chain {name} configured with id {} but provider reports {observed}",
                        chain.chain_id
                    );
                }
                Err(err) => {
                    warn!(chain = %name, %err, "initial provider connectivity check failed");
                }
            }

            providers.insert(name.clone(), Arc::new(signed));
            health.insert(name.clone(), ProviderHealth::default());
        }

        Ok(Self {
            providers,
            health,
            health_check_timeout: config.timeouts.provider_health_check_timeout,
            events,
            publisher,
        })
    }

    pub fn get(&self, chain: &str) -> Option<Arc<ChainProvider>> {
        self.providers.get(chain).map(|entry| entry.clone())
    }

    pub fn wallet_address(&self, chain: &str) -> Option<ethers::types::Address> {
        self.providers.get(chain).map(|entry| entry.address())
    }

    pub fn health_map(&self) -> HashMap<String, ProviderHealth> {
        self.health
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ProviderEvent> {
        self.events.subscribe()
    }

    /// Runs until shutdown, checking every chain's connectivity on a fixed
    /// interval and reconnecting unhealthy ones with capped exponential
    /// backoff (1s, 2s, 4s, ... capped at 60s), per §4.1.
    pub async fn run_health_loop(self: Arc<Self>, interval: Duration) {
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = crate::shutdown::await_shutdown() => return,
            }

            let chains: Vec<String> = self.providers.iter().map(|e| e.key().clone()).collect();
            for chain in chains {
                self.check_and_maybe_reconnect(&chain).await;
            }
        }
    }

    async fn check_and_maybe_reconnect(&self, chain: &str) {
        let Some(provider) = self.get(chain) else {
            return;
        };

        let ok = timeout(self.health_check_timeout, provider.get_block_number())
            .await
            .map(|res| res.is_ok())
            .unwrap_or(false);

        let mut entry = self.health.entry(chain.to_string()).or_default();
        if ok {
            let was_unhealthy = !entry.healthy;
            entry.healthy = true;
            entry.consecutive_failures = 0;
            entry.last_error = None;
            entry.last_check = chrono::Utc::now();
            if was_unhealthy {
                info!(chain, "provider reconnected");
                let _ = self.events.send(ProviderEvent {
                    chain: chain.to_string(),
                    reconnected: true,
                });
                drop(entry);
                self.publish_health(chain, "healthy", "reconnected").await;
            }
            return;
        }

        entry.consecutive_failures += 1;
        entry.last_check = chrono::Utc::now();
        entry.last_error = Some(format!("health check timed out after {:?}", self.health_check_timeout));

        let became_unhealthy = entry.healthy;
        if became_unhealthy {
            entry.healthy = false;
            error!(chain, failures = entry.consecutive_failures, "provider marked unhealthy");
        }

        let backoff = Duration::from_secs(1 << entry.consecutive_failures.min(6)).min(Duration::from_secs(60));
        drop(entry);
        if became_unhealthy {
            self.publish_health(chain, "unhealthy", "health_check_failed").await;
        }
        tokio::time::sleep(backoff).await;
    }

    async fn publish_health(&self, chain: &str, status: &str, event: &str) {
        let health_event = HealthEvent {
            name: chain.to_string(),
            service: "execution-engine".to_string(),
            status: status.to_string(),
            event: event.to_string(),
            region_id: None,
            timestamp: chrono::Utc::now(),
        };
        if let Err(err) = self.publisher.publish_health(health_event).await {
            warn!(%err, chain, "failed to publish health event");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_caps_at_sixty_seconds() {
        let failures: u32 = 10;
        let backoff = Duration::from_secs(1 << failures.min(6)).min(Duration::from_secs(60));
        assert_eq!(backoff, Duration::from_secs(60));
    }
}
