//! Nonce Manager (C2): per-chain monotonic nonce allocation with pending
//! tracking, implemented directly rather than as an `ethers` middleware
//! layer — the multi-chain, write-before-broadcast semantics this engine
//! needs don't fit a single provider-stack middleware.

use std::collections::HashMap;
use std::time::Duration;

use ethers::providers::Middleware;
use ethers::types::{Address, H256, U256};
use tokio::sync::{Mutex, Notify};
use tracing::{debug, warn};

use crate::error::NonceError;
use crate::provider_pool::ProviderPool;

const MAX_PENDING_PER_CHAIN: usize = 10;
const PENDING_MAX_AGE: Duration = Duration::from_secs(300);

#[derive(Debug, Clone)]
struct PendingEntry {
    nonce: u64,
    allocated_at: std::time::Instant,
}

#[derive(Default)]
struct ChainState {
    next: u64,
    initialized: bool,
    pending: Vec<PendingEntry>,
}

pub struct NonceManager {
    chains: Mutex<HashMap<String, ChainState>>,
    notify: Notify,
}

impl Default for NonceManager {
    fn default() -> Self {
        Self::new()
    }
}

impl NonceManager {
    pub fn new() -> Self {
        Self {
            chains: Mutex::new(HashMap::new()),
            notify: Notify::new(),
        }
    }

    /// Atomically reserves the next nonce for `chain`. Blocks (yielding to
    /// other tasks) while `MAX_PENDING_PER_CHAIN` nonces are outstanding,
    /// per §4.2.
    pub async fn allocate(
        &self,
        pool: &ProviderPool,
        chain: &str,
        wallet_address: Address,
    ) -> Result<u64, NonceError> {
        loop {
            {
                let mut chains = self.chains.lock().await;
                let state = chains.entry(chain.to_string()).or_default();
                self.evict_stale(state);

                if !state.initialized {
                    let provider = pool
                        .get(chain)
                        .ok_or_else(|| NonceError::Provider(chain.to_string(), "no provider".into()))?;
                    let count = provider
                        .get_transaction_count(wallet_address, None)
                        .await
                        .map_err(|err| NonceError::Provider(chain.to_string(), err.to_string()))?;
                    state.next = count.as_u64();
                    state.initialized = true;
                }

                if state.pending.len() < MAX_PENDING_PER_CHAIN {
                    let nonce = state.next;
                    state.next += 1;
                    state.pending.push(PendingEntry {
                        nonce,
                        allocated_at: std::time::Instant::now(),
                    });
                    debug!(chain, nonce, "allocated nonce");
                    return Ok(nonce);
                }
            }
            self.notify.notified().await;
        }
    }

    /// Marks `nonce` as confirmed on-chain; it is simply removed from the
    /// pending set (the chain's own transaction count has already advanced).
    pub async fn confirm(&self, chain: &str, nonce: u64, _tx_hash: H256) {
        self.release(chain, nonce).await;
    }

    /// Releases `nonce` after a failed attempt. If no transaction was ever
    /// broadcast for it, it becomes available for immediate reuse by
    /// rewinding `next` when it is the most-recently-allocated nonce;
    /// otherwise it is simply dropped from the pending set (a gap is left,
    /// matching how a real chain's nonce sequencing tolerates skipped,
    /// never-broadcast values).
    pub async fn fail(&self, chain: &str, nonce: u64, broadcast_happened: bool, reason: &str) {
        warn!(chain, nonce, broadcast_happened, reason, "releasing nonce after failure");
        let mut chains = self.chains.lock().await;
        if let Some(state) = chains.get_mut(chain) {
            if !broadcast_happened && state.next == nonce + 1 {
                state.next = nonce;
            }
        }
        drop(chains);
        self.release(chain, nonce).await;
    }

    async fn release(&self, chain: &str, nonce: u64) {
        let mut chains = self.chains.lock().await;
        if let Some(state) = chains.get_mut(chain) {
            state.pending.retain(|entry| entry.nonce != nonce);
        }
        drop(chains);
        self.notify.notify_waiters();
    }

    fn evict_stale(&self, state: &mut ChainState) {
        let before = state.pending.len();
        state
            .pending
            .retain(|entry| entry.allocated_at.elapsed() < PENDING_MAX_AGE);
        if state.pending.len() < before {
            self.notify.notify_waiters();
        }
    }

    #[cfg(test)]
    async fn pending_count(&self, chain: &str) -> usize {
        self.chains
            .lock()
            .await
            .get(chain)
            .map(|s| s.pending.len())
            .unwrap_or(0)
    }
}

// Kept for callers that want a typed zero-nonce placeholder before a wallet
// is known, e.g. simulation-mode strategies.
pub const SIMULATED_NONCE: U256 = U256::zero();

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn release_on_fail_without_broadcast_allows_reuse() {
        let manager = NonceManager::new();
        let mut chains = manager.chains.lock().await;
        chains.insert(
            "ethereum".into(),
            ChainState {
                next: 5,
                initialized: true,
                pending: vec![PendingEntry {
                    nonce: 4,
                    allocated_at: std::time::Instant::now(),
                }],
            },
        );
        drop(chains);

        manager.fail("ethereum", 4, false, "simulated failure").await;

        let chains = manager.chains.lock().await;
        let state = chains.get("ethereum").unwrap();
        assert_eq!(state.next, 4);
        assert!(state.pending.is_empty());
    }

    #[tokio::test]
    async fn confirm_removes_from_pending() {
        let manager = NonceManager::new();
        {
            let mut chains = manager.chains.lock().await;
            chains.insert(
                "ethereum".into(),
                ChainState {
                    next: 2,
                    initialized: true,
                    pending: vec![PendingEntry {
                        nonce: 1,
                        allocated_at: std::time::Instant::now(),
                    }],
                },
            );
        }

        manager.confirm("ethereum", 1, H256::zero()).await;
        assert_eq!(manager.pending_count("ethereum").await, 0);
    }
}
