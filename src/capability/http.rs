//! HTTP-backed stage capabilities
//!
//! Each stage is served by a remote agent at `{base_url}/stages/{stage}`.

use super::{CapabilityRegistry, CapabilityRequest, StageCapability, StageOutput};
use crate::error::OrchestrationError;
use crate::models::Stage;
use crate::Result;
use reqwest::{Client, StatusCode};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

#[derive(Clone)]
pub struct StageServiceClient {
    client: Client,
    base_url: String,
}

impl StageServiceClient {
    /// The per-request timeout is a backstop; the orchestrator applies the
    /// stage timeout itself.
    pub fn new(base_url: &str, request_timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .pool_idle_timeout(Duration::from_secs(60))
            .pool_max_idle_per_host(8)
            .timeout(request_timeout)
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    async fn post_json(&self, path: &str, body: &Value) -> Result<Value> {
        let url = format!("{}{}", self.base_url, path);

        let response = self
            .client
            .post(url)
            .header("Content-Type", "application/json")
            .json(body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    OrchestrationError::CapabilityTimeout(format!("{}: {}", path, e))
                } else {
                    OrchestrationError::CapabilityUnavailable(format!(
                        "Stage service request failed for {}: {}",
                        path, e
                    ))
                }
            })?;

        let status = response.status();
        let body = response.json::<Value>().await.map_err(|e| {
            OrchestrationError::CapabilitySchemaError(format!("Invalid JSON response: {}", e))
        })?;

        if status == StatusCode::UNPROCESSABLE_ENTITY {
            return Err(OrchestrationError::StageRejected(format!(
                "{} rejected the application: {}",
                path, body
            )));
        }

        if !status.is_success() {
            return Err(OrchestrationError::CapabilityUnavailable(format!(
                "Stage service returned {} for {}: {}",
                status, path, body
            )));
        }

        Ok(body)
    }
}

/// Remote stage agent
pub struct HttpStageCapability {
    stage: Stage,
    client: StageServiceClient,
}

impl HttpStageCapability {
    pub fn new(stage: Stage, client: StageServiceClient) -> Self {
        Self { stage, client }
    }

    fn path(&self) -> String {
        format!("/stages/{}", self.stage.as_str())
    }
}

#[async_trait::async_trait]
impl StageCapability for HttpStageCapability {
    fn stage(&self) -> Stage {
        self.stage
    }

    fn description(&self) -> &'static str {
        "Delegates the stage to a remote agent service"
    }

    async fn invoke(&self, request: &CapabilityRequest) -> Result<StageOutput> {
        let body = json!({
            "run_id": request.run_id,
            "stage": self.stage,
            "context": request.context,
            "facts": request.facts.as_ref(),
        });

        let response = self.client.post_json(&self.path(), &body).await?;

        // Accept either a bare StageOutput or one wrapped in {"data": ...}
        let output = response.get("data").cloned().unwrap_or(response);
        serde_json::from_value(output).map_err(|e| {
            OrchestrationError::CapabilitySchemaError(format!(
                "{} returned a malformed envelope: {}",
                self.stage.as_str(),
                e
            ))
        })
    }
}

/// Registry with one remote capability per external stage
pub fn create_http_registry(base_url: &str, request_timeout: Duration) -> Result<CapabilityRegistry> {
    let client = StageServiceClient::new(base_url, request_timeout)?;
    let mut registry = CapabilityRegistry::new();

    for stage in Stage::ORDER.iter().copied().filter(|s| !s.is_internal()) {
        registry.register(Arc::new(HttpStageCapability::new(stage, client.clone())));
    }

    Ok(registry)
}
