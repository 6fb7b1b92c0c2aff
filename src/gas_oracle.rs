//! Gas Oracle (C6): rolling per-chain fee baseline, spike detection and
//! EIP-1559 fee shaping, wrapping a fee read with clamp/compare and a gauge
//! emission, and using `dashmap` for the lock-free per-chain snapshot read
//! required by the hot path.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use ethers::providers::Middleware;
use ethers::types::U256;
use once_cell::sync::Lazy;
use prometheus::{register_gauge_vec, GaugeVec};
use tracing::warn;

use crate::domain::GasBaselineEntry;
use crate::error::GasOracleError;
use crate::provider_pool::{ChainProvider, ProviderEvent, ProviderPool};

const MAX_HISTORY: usize = 100;
const MAX_HISTORY_AGE: Duration = Duration::from_secs(5 * 60);
const DEFAULT_SPIKE_MULTIPLIER: f64 = 2.0;
const PRIORITY_FEE_CAP_WEI: u128 = 3_000_000_000; // 3 gwei

static GAS_BASELINE_GAUGE: Lazy<GaugeVec> = Lazy::new(|| {
    register_gauge_vec!(
        "gas_baseline_wei",
        "Rolling per-chain gas price baseline used for spike detection",
        &["chain"]
    )
    .unwrap()
});

/// A transaction-ready fee shape: either legacy `gasPrice` or EIP-1559
/// `maxFeePerGas`/`maxPriorityFeePerGas`, matching ethers' own split.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeeShape {
    Legacy { gas_price: U256 },
    Eip1559 { max_fee_per_gas: U256, max_priority_fee_per_gas: U256 },
}

struct ChainBaseline {
    history: VecDeque<GasBaselineEntry>,
}

impl ChainBaseline {
    fn new() -> Self {
        Self { history: VecDeque::new() }
    }

    fn push(&mut self, price: u128) {
        let now = chrono::Utc::now();
        self.history.push_back(GasBaselineEntry { price, timestamp: now });
        while self.history.len() > MAX_HISTORY {
            self.history.pop_front();
        }
        while self
            .history
            .front()
            .is_some_and(|e| (now - e.timestamp).to_std().unwrap_or_default() > MAX_HISTORY_AGE)
        {
            self.history.pop_front();
        }
    }

    fn baseline(&self) -> Option<f64> {
        if self.history.is_empty() {
            return None;
        }
        let mut prices: Vec<f64> = self.history.iter().map(|e| e.price as f64).collect();
        if prices.len() >= 3 {
            prices.sort_by(|a, b| a.partial_cmp(b).unwrap());
            let mid = prices.len() / 2;
            Some(if prices.len() % 2 == 0 {
                (prices[mid - 1] + prices[mid]) / 2.0
            } else {
                prices[mid]
            })
        } else {
            let mean = prices.iter().sum::<f64>() / prices.len() as f64;
            Some(mean * 1.5)
        }
    }

    /// True when `current_price` exceeds the rolling baseline by more than
    /// `multiplier`; a price exactly at the boundary does not trip (§4.6).
    fn is_spike(&self, current_price: u128, multiplier: f64) -> bool {
        self.baseline()
            .is_some_and(|baseline| current_price as f64 > baseline * multiplier)
    }
}

pub struct GasOracle {
    pool: Arc<ProviderPool>,
    baselines: DashMap<String, ChainBaseline>,
    spike_multiplier: f64,
}

impl GasOracle {
    pub fn new(pool: Arc<ProviderPool>) -> Self {
        Self {
            pool,
            baselines: DashMap::new(),
            spike_multiplier: DEFAULT_SPIKE_MULTIPLIER,
        }
    }

    /// Invalidates the chain's baseline after a provider reconnect, per
    /// `ProviderPool`'s reconnect event (§4.1) — replaces the snapshot
    /// rather than clearing in place, so concurrent readers never observe a
    /// torn history.
    pub async fn run_invalidation_loop(self: Arc<Self>) {
        let mut events = self.pool.subscribe();
        loop {
            tokio::select! {
                _ = crate::shutdown::await_shutdown() => return,
                event = events.recv() => {
                    match event {
                        Ok(ProviderEvent { chain, reconnected: true }) => {
                            self.baselines.insert(chain, ChainBaseline::new());
                        }
                        Ok(_) => {}
                        Err(_) => return,
                    }
                }
            }
        }
    }

    /// Fetches current fee data for `chain`, checks it against the rolling
    /// baseline, records the sample, and shapes a fee for submission.
    /// Returns `GasOracleError::Spike` without recording the sample or
    /// mutating the baseline when the spike check trips (§4.6).
    pub async fn current_fee(&self, chain: &str) -> Result<FeeShape, GasOracleError> {
        let provider = self
            .pool
            .get(chain)
            .ok_or_else(|| GasOracleError::NoFeeData(chain.to_string()))?;

        let current_price = self.fetch_current_price(&provider).await?;

        {
            let entry = self.baselines.entry(chain.to_string()).or_insert_with(ChainBaseline::new);
            if entry.is_spike(current_price, self.spike_multiplier) {
                let baseline = entry.baseline().unwrap_or_default();
                return Err(GasOracleError::Spike {
                    current: current_price,
                    baseline: baseline as u128,
                    multiplier: self.spike_multiplier,
                });
            }
        }

        self.baselines
            .entry(chain.to_string())
            .or_insert_with(ChainBaseline::new)
            .push(current_price);
        GAS_BASELINE_GAUGE.with_label_values(&[chain]).set(current_price as f64);

        self.shape_fee(&provider, current_price).await
    }

    async fn fetch_current_price(&self, provider: &ChainProvider) -> Result<u128, GasOracleError> {
        match provider.estimate_eip1559_fees(None).await {
            Ok((max_fee, _)) => Ok(max_fee.as_u128()),
            Err(_) => provider
                .get_gas_price()
                .await
                .map(|p| p.as_u128())
                .map_err(|err| {
                    warn!(%err, "gas price fetch failed");
                    GasOracleError::NoFeeData(format!("{err}"))
                }),
        }
    }

    async fn shape_fee(&self, provider: &ChainProvider, current_price: u128) -> Result<FeeShape, GasOracleError> {
        match provider.estimate_eip1559_fees(None).await {
            Ok((_, priority_fee)) => {
                let capped_priority = priority_fee.as_u128().min(PRIORITY_FEE_CAP_WEI);
                Ok(FeeShape::Eip1559 {
                    max_fee_per_gas: U256::from(current_price),
                    max_priority_fee_per_gas: U256::from(capped_priority),
                })
            }
            Err(_) => Ok(FeeShape::Legacy { gas_price: U256::from(current_price) }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn baseline_with(prices: &[u128]) -> ChainBaseline {
        let mut b = ChainBaseline::new();
        for &p in prices {
            b.push(p);
        }
        b
    }

    #[test]
    fn baseline_uses_median_at_three_samples() {
        let b = baseline_with(&[10, 30, 20]);
        assert_eq!(b.baseline(), Some(20.0));
    }

    #[test]
    fn baseline_uses_one_point_five_x_mean_below_three_samples() {
        let b = baseline_with(&[10, 20]);
        assert_eq!(b.baseline(), Some(22.5));
    }

    #[test]
    fn history_is_capped_at_max_entries() {
        let mut b = ChainBaseline::new();
        for i in 0..150u128 {
            b.push(i);
        }
        assert_eq!(b.history.len(), MAX_HISTORY);
    }

    #[test]
    fn spike_boundary_equal_to_threshold_does_not_trip() {
        let b = baseline_with(&[10, 30, 20]); // median baseline == 20
        let at_threshold = (20.0 * DEFAULT_SPIKE_MULTIPLIER) as u128;
        assert!(!b.is_spike(at_threshold, DEFAULT_SPIKE_MULTIPLIER));
        assert!(b.is_spike(at_threshold + 1, DEFAULT_SPIKE_MULTIPLIER));
    }

    #[test]
    fn no_baseline_never_trips_spike() {
        let b = ChainBaseline::new();
        assert!(!b.is_spike(u128::MAX, DEFAULT_SPIKE_MULTIPLIER));
    }
}
