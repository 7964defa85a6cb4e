//! Environment configuration

use crate::capability::{create_http_registry, create_rule_based_registry};
use crate::error::OrchestrationError;
use crate::pipeline::Orchestrator;
use crate::sink::build_result_sink;
use crate::state::InMemoryRunTracker;
use crate::underwriting::DecisionSynthesizer;
use crate::Result;
use std::env;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

pub const DEFAULT_PORT: u16 = 8080;
pub const DEFAULT_STAGE_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Clone, PartialEq)]
pub struct OrchestratorConfig {
    pub port: u16,
    pub stage_timeout: Duration,
    /// Remote stage agents; rule-based capabilities when absent
    pub stage_service_url: Option<String>,
    /// Durable result sink; in-memory when absent
    pub database_url: Option<String>,
    pub log_level: String,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            stage_timeout: Duration::from_secs(DEFAULT_STAGE_TIMEOUT_SECS),
            stage_service_url: None,
            database_url: None,
            log_level: "info".to_string(),
        }
    }
}

impl OrchestratorConfig {
    /// Read configuration from the process environment (after `.env`)
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build from any key lookup. Blank values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let port = match get("API_PORT").or_else(|| get("PORT")) {
            Some(raw) => raw.trim().parse::<u16>().map_err(|_| {
                OrchestrationError::ConfigError(format!("invalid port: {}", raw))
            })?,
            None => DEFAULT_PORT,
        };

        let timeout_secs = match get("STAGE_TIMEOUT_SECS") {
            Some(raw) => match raw.trim().parse::<u64>() {
                Ok(secs) if secs > 0 => secs,
                _ => {
                    return Err(OrchestrationError::ConfigError(format!(
                        "STAGE_TIMEOUT_SECS must be a positive integer, got {}",
                        raw
                    )))
                }
            },
            None => DEFAULT_STAGE_TIMEOUT_SECS,
        };

        let stage_service_url = get("STAGE_SERVICE_BASE_URL");
        if let Some(url) = &stage_service_url {
            if !url.starts_with("http://") && !url.starts_with("https://") {
                return Err(OrchestrationError::ConfigError(format!(
                    "STAGE_SERVICE_BASE_URL must be an http(s) URL, got {}",
                    url
                )));
            }
        }

        Ok(Self {
            port,
            stage_timeout: Duration::from_secs(timeout_secs),
            stage_service_url,
            database_url: get("POSTGRES_URL").or_else(|| get("DATABASE_URL")),
            log_level: get("LOG_LEVEL").unwrap_or_else(|| "info".to_string()),
        })
    }

    /// Wire capabilities, sink and tracker from this configuration.
    /// A database URL requires a running Tokio runtime.
    pub fn build_orchestrator(&self) -> Result<Orchestrator> {
        let capabilities = match &self.stage_service_url {
            Some(url) => {
                info!(base_url = %url, "Using remote stage capabilities");
                create_http_registry(url, self.stage_timeout)?
            }
            None => {
                info!("Using rule-based stage capabilities");
                create_rule_based_registry()
            }
        };

        let orchestrator = Orchestrator::new(
            capabilities,
            DecisionSynthesizer::default(),
            build_result_sink(self.database_url.as_deref()),
            Arc::new(InMemoryRunTracker::new()),
        )
        .with_stage_timeout(self.stage_timeout);

        Ok(orchestrator)
    }
}
