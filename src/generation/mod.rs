//! Generation service contract and its HTTP adapters.
//!
//! The service is an external collaborator: it receives the routed track and
//! the instruction, and answers with a JSON document that the dispatcher
//! decodes into the track's result type.

mod agent;
mod chat;

pub use agent::AgentEndpointService;
pub use chat::ChatCompletionsService;

use crate::model::{RunConfig, ServiceKind, Track};
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;

/// Outbound request scoped to one track.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GenerationRequest {
    pub track: Track,
    pub instruction: String,
    pub expertise_hint: String,
}

#[async_trait]
pub trait GenerationService: Send + Sync {
    /// Produce the raw, undecoded response for `request`.
    async fn generate(&self, request: &GenerationRequest) -> Result<serde_json::Value>;
}

/// Build the HTTP client shared by the adapters.
fn build_http_client(cfg: &RunConfig) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .user_agent(cfg.user_agent.clone())
        .build()
        .context("build generation http client")
}

/// Construct the service selected by the run configuration.
pub fn build_service(cfg: &RunConfig) -> Result<Arc<dyn GenerationService>> {
    let http = build_http_client(cfg)?;
    let service: Arc<dyn GenerationService> = match cfg.service {
        ServiceKind::Chat => Arc::new(ChatCompletionsService::new(http, cfg)?),
        ServiceKind::Agent => Arc::new(AgentEndpointService::new(http, &cfg.service_url)?),
    };
    Ok(service)
}
