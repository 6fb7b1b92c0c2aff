//! Simulator (C7): forwards a built transaction to an external fork/trace
//! provider and classifies the predicted outcome, using the same
//! typed-reqwest-client idiom as the bridge adapters (one struct, one base
//! URL, thin per-endpoint methods).

use std::time::{Duration, Instant};

use async_trait::async_trait;
use ethers::types::{Bytes, U256};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::SimulatorError;

const MIN_PROFIT_FOR_SIMULATION_USD: f64 = 50.0;
const TIME_CRITICAL_THRESHOLD: Duration = Duration::from_secs(2);

#[derive(Debug, Clone)]
pub struct SimulationRequest {
    pub chain: String,
    pub from: ethers::types::Address,
    pub to: ethers::types::Address,
    pub data: Bytes,
    pub value: U256,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationOutcome {
    pub would_revert: bool,
    pub revert_reason: Option<String>,
    pub gas_used: Option<u64>,
    pub provider: String,
    pub latency_ms: u64,
}

/// External collaborator contract for a fork/trace simulation backend
/// (Tenderly-style). A concrete adapter implements this over `reqwest`.
#[async_trait]
pub trait ForkSimulator: Send + Sync {
    async fn simulate(&self, request: &SimulationRequest) -> anyhow::Result<SimulationOutcome>;
    fn name(&self) -> &str;
}

pub struct Simulator {
    backend: Option<Box<dyn ForkSimulator>>,
    min_profit_for_simulation: f64,
    time_critical_threshold: Duration,
}

pub enum SimulationDecision {
    Skipped { reason: &'static str },
    Ok(SimulationOutcome),
}

impl Simulator {
    pub fn new(backend: Option<Box<dyn ForkSimulator>>) -> Self {
        Self {
            backend,
            min_profit_for_simulation: MIN_PROFIT_FOR_SIMULATION_USD,
            time_critical_threshold: TIME_CRITICAL_THRESHOLD,
        }
    }

    /// Runs the skip-condition gate from §4.7 before ever calling the
    /// backend, then classifies the result. On a transport error the
    /// simulation is treated as skipped (graceful degradation) and the
    /// caller is expected to bump `Stats::record_simulation_error`.
    pub async fn evaluate(
        &self,
        request: &SimulationRequest,
        expected_profit_usd: f64,
        opportunity_age: chrono::Duration,
    ) -> SimulationDecision {
        let Some(backend) = &self.backend else {
            return SimulationDecision::Skipped { reason: "provider unavailable" };
        };
        if expected_profit_usd < self.min_profit_for_simulation {
            return SimulationDecision::Skipped { reason: "expected profit below simulation floor" };
        }
        if opportunity_age.to_std().unwrap_or_default() > self.time_critical_threshold {
            return SimulationDecision::Skipped { reason: "opportunity too time-critical to simulate" };
        }

        let started = Instant::now();
        match backend.simulate(request).await {
            Ok(outcome) => SimulationDecision::Ok(outcome),
            Err(err) => {
                warn!(%err, provider = backend.name(), elapsed_ms = started.elapsed().as_millis(), "simulation transport error, proceeding without a forecast");
                SimulationDecision::Skipped { reason: "simulator transport error" }
            }
        }
    }

    pub fn classify(outcome: &SimulationOutcome) -> Result<(), SimulatorError> {
        if outcome.would_revert {
            return Err(SimulatorError::Reverted {
                reason: outcome.revert_reason.clone().unwrap_or_else(|| "unknown".to_string()),
            });
        }
        Ok(())
    }
}

#[derive(Clone)]
pub struct ReqwestForkSimulator {
    client: reqwest::Client,
    base_url: String,
    name: String,
}

impl ReqwestForkSimulator {
    pub fn new(name: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
            name: name.into(),
        }
    }
}

#[derive(Serialize)]
struct SimulateBody<'a> {
    chain: &'a str,
    from: ethers::types::Address,
    to: ethers::types::Address,
    data: &'a Bytes,
    value: U256,
}

#[derive(Deserialize)]
struct SimulateResponse {
    would_revert: bool,
    revert_reason: Option<String>,
    gas_used: Option<u64>,
}

#[async_trait]
impl ForkSimulator for ReqwestForkSimulator {
    async fn simulate(&self, request: &SimulationRequest) -> anyhow::Result<SimulationOutcome> {
        let started = Instant::now();
        let body = SimulateBody {
            chain: &request.chain,
            from: request.from,
            to: request.to,
            data: &request.data,
            value: request.value,
        };
        let response = self
            .client
            .post(format!("{}/simulate", self.base_url))
            .json(&body)
            .send()
            .await?
            .error_for_status()?
            .json::<SimulateResponse>()
            .await?;

        Ok(SimulationOutcome {
            would_revert: response.would_revert,
            revert_reason: response.revert_reason,
            gas_used: response.gas_used,
            provider: self.name.clone(),
            latency_ms: started.elapsed().as_millis() as u64,
        })
    }

    fn name(&self) -> &str {
        &self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> SimulationRequest {
        SimulationRequest {
            chain: "ethereum".into(),
            from: ethers::types::Address::zero(),
            to: ethers::types::Address::zero(),
            data: Bytes::default(),
            value: U256::zero(),
        }
    }

    struct StubSimulator {
        outcome: SimulationOutcome,
    }

    #[async_trait]
    impl ForkSimulator for StubSimulator {
        async fn simulate(&self, _request: &SimulationRequest) -> anyhow::Result<SimulationOutcome> {
            Ok(self.outcome.clone())
        }

        fn name(&self) -> &str {
            "stub"
        }
    }

    #[tokio::test]
    async fn skips_when_no_backend_configured() {
        let simulator = Simulator::new(None);
        let decision = simulator.evaluate(&request(), 1000.0, chrono::Duration::milliseconds(0)).await;
        assert!(matches!(decision, SimulationDecision::Skipped { reason: "provider unavailable" }));
    }

    #[tokio::test]
    async fn skips_below_minimum_profit() {
        let backend = Box::new(StubSimulator {
            outcome: SimulationOutcome {
                would_revert: false,
                revert_reason: None,
                gas_used: Some(100_000),
                provider: "stub".into(),
                latency_ms: 1,
            },
        });
        let simulator = Simulator::new(Some(backend));
        let decision = simulator.evaluate(&request(), 10.0, chrono::Duration::milliseconds(0)).await;
        assert!(matches!(decision, SimulationDecision::Skipped { .. }));
    }

    #[tokio::test]
    async fn skips_when_opportunity_too_old() {
        let backend = Box::new(StubSimulator {
            outcome: SimulationOutcome {
                would_revert: false,
                revert_reason: None,
                gas_used: None,
                provider: "stub".into(),
                latency_ms: 1,
            },
        });
        let simulator = Simulator::new(Some(backend));
        let decision = simulator.evaluate(&request(), 1000.0, chrono::Duration::seconds(3)).await;
        assert!(matches!(decision, SimulationDecision::Skipped { .. }));
    }

    #[tokio::test]
    async fn runs_and_classifies_revert() {
        let backend = Box::new(StubSimulator {
            outcome: SimulationOutcome {
                would_revert: true,
                revert_reason: Some("INSUFFICIENT_OUTPUT_AMOUNT".into()),
                gas_used: Some(50_000),
                provider: "stub".into(),
                latency_ms: 5,
            },
        });
        let simulator = Simulator::new(Some(backend));
        let decision = simulator.evaluate(&request(), 1000.0, chrono::Duration::milliseconds(0)).await;
        let SimulationDecision::Ok(outcome) = decision else {
            panic!("expected a completed simulation");
        };
        let err = Simulator::classify(&outcome).unwrap_err();
        assert!(matches!(err, SimulatorError::Reverted { .. }));
    }
}
