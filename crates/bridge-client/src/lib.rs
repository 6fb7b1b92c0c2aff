//! Typed client for a single external cross-chain bridge aggregator's HTTP API.
//!
//! One `BridgeAggregatorClient` is constructed per adapter registered in the
//! engine's bridge router factory; the factory picks an adapter by chain-pair
//! and the strategy layer only ever sees the `quote`/`execute`/`get_status`
//! trio.

use data::{ExecuteRequest, ExecuteResponse, QuoteRequest, QuoteResponse, StatusResponse};
use reqwest::Response;
use tracing::instrument;

pub mod data;
mod decimal_u256;

pub struct BridgeAggregatorClient {
    client: reqwest::Client,
    url:    String,
}

impl BridgeAggregatorClient {
    pub fn new(url: impl ToString) -> Self {
        Self {
            client: reqwest::Client::new(),
            url:    url.to_string(),
        }
    }

    async fn json_post<T, R>(&self, path: &str, body: &T) -> anyhow::Result<R>
    where
        T: serde::Serialize,
        R: serde::de::DeserializeOwned,
    {
        let response = self
            .client
            .post(format!("{}{path}", self.url))
            .json(body)
            .send()
            .await?;

        let response = Self::validate_response(response).await?;

        Ok(response.json().await?)
    }

    async fn json_get<R>(&self, path: &str) -> anyhow::Result<R>
    where
        R: serde::de::DeserializeOwned,
    {
        let response = self.client.get(format!("{}{path}", self.url)).send().await?;

        let response = Self::validate_response(response).await?;

        Ok(response.json().await?)
    }

    async fn validate_response(response: Response) -> anyhow::Result<Response> {
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await?;

            tracing::error!("Bridge aggregator response failed with status {status} - {body}");
            return Err(anyhow::anyhow!(
                "Bridge aggregator response failed with status {status} - {body}"
            ));
        }

        Ok(response)
    }

    #[instrument(skip(self))]
    pub async fn quote(&self, req: &QuoteRequest) -> anyhow::Result<QuoteResponse> {
        self.json_post("/quote", req).await
    }

    #[instrument(skip(self))]
    pub async fn execute(&self, req: &ExecuteRequest) -> anyhow::Result<ExecuteResponse> {
        self.json_post("/execute", req).await
    }

    #[instrument(skip(self))]
    pub async fn get_status(&self, bridge_id: &str) -> anyhow::Result<StatusResponse> {
        self.json_get(&format!("/status/{bridge_id}")).await
    }
}
