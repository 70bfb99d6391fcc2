use super::{GenerationRequest, GenerationService};
use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Url;

/// Posts the generation request as JSON to an agent endpoint and returns the
/// JSON body it answers with.
pub struct AgentEndpointService {
    http: reqwest::Client,
    endpoint: Url,
}

impl AgentEndpointService {
    pub fn new(http: reqwest::Client, endpoint: &str) -> Result<Self> {
        let endpoint =
            Url::parse(endpoint).with_context(|| format!("invalid agent endpoint '{endpoint}'"))?;
        Ok(Self { http, endpoint })
    }
}

#[async_trait]
impl GenerationService for AgentEndpointService {
    async fn generate(&self, request: &GenerationRequest) -> Result<serde_json::Value> {
        let resp = self
            .http
            .post(self.endpoint.clone())
            .json(request)
            .send()
            .await
            .context("agent endpoint request failed")?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            anyhow::bail!("agent endpoint returned {status}: {}", body.trim());
        }

        resp.json::<serde_json::Value>()
            .await
            .context("agent endpoint returned a non-JSON body")
    }
}
