//! Stage capability trait and registry
//!
//! A capability fulfils one pipeline stage. It is a black box to the
//! orchestrator: slow, fallible, and only trusted once its output passes the
//! stage's schema.

use crate::context::ContextSnapshot;
use crate::error::OrchestrationError;
use crate::models::{LoanApplicationRequest, Stage, StagePayload, StageResult};
use crate::Result;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};
use uuid::Uuid;

pub mod http;
pub mod rules;

pub use http::{create_http_registry, HttpStageCapability};
pub use rules::create_rule_based_registry;

/// Everything a capability may read when invoked
#[derive(Debug, Clone)]
pub struct CapabilityRequest {
    pub run_id: Uuid,
    pub stage: Stage,
    pub context: ContextSnapshot,
    pub facts: Arc<LoanApplicationRequest>,
}

/// Raw, unvalidated capability output
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageOutput {
    pub payload: Value,
    pub rationale: String,
    /// Short narrative appended to the run handoff
    #[serde(default)]
    pub summary: Option<String>,
}

/// Trait for a single stage capability
#[async_trait::async_trait]
pub trait StageCapability: Send + Sync {
    fn stage(&self) -> Stage;
    fn description(&self) -> &'static str;
    async fn invoke(&self, request: &CapabilityRequest) -> Result<StageOutput>;
}

/// Capability registry keyed by stage
pub struct CapabilityRegistry {
    capabilities: HashMap<Stage, Arc<dyn StageCapability>>,
}

impl CapabilityRegistry {
    pub fn new() -> Self {
        Self {
            capabilities: HashMap::new(),
        }
    }

    pub fn register(&mut self, capability: Arc<dyn StageCapability>) {
        self.capabilities.insert(capability.stage(), capability);
    }

    pub fn get(&self, stage: Stage) -> Option<Arc<dyn StageCapability>> {
        self.capabilities.get(&stage).cloned()
    }

    pub fn stages(&self) -> Vec<Stage> {
        let mut stages: Vec<Stage> = self.capabilities.keys().copied().collect();
        stages.sort();
        stages
    }

    /// Stages that need an external capability but have none registered
    pub fn missing_stages(&self) -> Vec<Stage> {
        Stage::ORDER
            .iter()
            .copied()
            .filter(|s| !s.is_internal() && !self.capabilities.contains_key(s))
            .collect()
    }
}

impl Default for CapabilityRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Outcome of one capability invocation
#[derive(Debug, Clone)]
pub struct StageAttempt {
    pub result: StageResult,
    pub summary: Option<String>,
}

/// Invoke a capability under a timeout and validate its output.
///
/// Never returns an error: every failure mode is folded into a failed
/// `StageResult` carrying the matching reason code.
pub async fn invoke_stage(
    capability: Option<Arc<dyn StageCapability>>,
    request: CapabilityRequest,
    timeout: Duration,
) -> StageAttempt {
    let stage = request.stage;
    let start = Instant::now();

    let outcome = match capability {
        Some(capability) => match tokio::time::timeout(timeout, capability.invoke(&request)).await {
            Ok(Ok(output)) => validate_output(stage, output),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(OrchestrationError::CapabilityTimeout(format!(
                "{} did not respond within {} ms",
                stage.as_str(),
                timeout.as_millis()
            ))),
        },
        None => Err(OrchestrationError::CapabilityUnavailable(format!(
            "no capability registered for {}",
            stage.as_str()
        ))),
    };

    let elapsed_ms = start.elapsed().as_millis() as u64;

    match outcome {
        Ok((payload, rationale, summary)) => {
            debug!(
                run_id = %request.run_id,
                stage = stage.as_str(),
                elapsed_ms,
                "Stage capability succeeded"
            );
            StageAttempt {
                result: StageResult::succeeded(stage, payload, rationale, elapsed_ms),
                summary,
            }
        }
        Err(e) => {
            warn!(
                run_id = %request.run_id,
                stage = stage.as_str(),
                error = %e,
                elapsed_ms,
                "Stage capability failed"
            );
            StageAttempt {
                result: StageResult::failed(stage, e.failure_code(), e.to_string(), elapsed_ms),
                summary: None,
            }
        }
    }
}

fn validate_output(stage: Stage, output: StageOutput) -> Result<(StagePayload, String, Option<String>)> {
    let payload = StagePayload::from_output(stage, output.payload)?;
    Ok((payload, output.rationale, output.summary))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ApplicantProfile, FailureCode, StageStatus};
    use serde_json::json;

    struct FixedCapability {
        stage: Stage,
        payload: Value,
        delay: Duration,
    }

    #[async_trait::async_trait]
    impl StageCapability for FixedCapability {
        fn stage(&self) -> Stage {
            self.stage
        }

        fn description(&self) -> &'static str {
            "Returns a fixed payload"
        }

        async fn invoke(&self, _request: &CapabilityRequest) -> Result<StageOutput> {
            tokio::time::sleep(self.delay).await;
            Ok(StageOutput {
                payload: self.payload.clone(),
                rationale: "fixed".to_string(),
                summary: Some("done".to_string()),
            })
        }
    }

    fn request(stage: Stage) -> CapabilityRequest {
        CapabilityRequest {
            run_id: Uuid::new_v4(),
            stage,
            context: ContextSnapshot::empty(),
            facts: Arc::new(LoanApplicationRequest {
                customer_name: "Test".to_string(),
                loan_amount: 100_000.0,
                loan_purpose: "Home Loan".to_string(),
                tenure_years: 5,
                contact_number: None,
                email: None,
                profile: ApplicantProfile::default(),
            }),
        }
    }

    #[tokio::test]
    async fn test_invoke_stage_success() {
        let capability: Arc<dyn StageCapability> = Arc::new(FixedCapability {
            stage: Stage::CustomerService,
            payload: json!({"application_complete": true}),
            delay: Duration::ZERO,
        });

        let attempt = invoke_stage(
            Some(capability),
            request(Stage::CustomerService),
            Duration::from_secs(1),
        )
        .await;

        assert_eq!(attempt.result.status, StageStatus::Succeeded);
        assert_eq!(attempt.summary.as_deref(), Some("done"));
    }

    #[tokio::test]
    async fn test_invoke_stage_timeout_is_stage_failure() {
        let capability: Arc<dyn StageCapability> = Arc::new(FixedCapability {
            stage: Stage::CustomerService,
            payload: json!({"application_complete": true}),
            delay: Duration::from_millis(200),
        });

        let attempt = invoke_stage(
            Some(capability),
            request(Stage::CustomerService),
            Duration::from_millis(20),
        )
        .await;

        assert_eq!(attempt.result.status, StageStatus::Failed);
        assert_eq!(attempt.result.failure, Some(FailureCode::Timeout));
    }

    #[tokio::test]
    async fn test_invoke_stage_schema_error() {
        let capability: Arc<dyn StageCapability> = Arc::new(FixedCapability {
            stage: Stage::CreditAssessment,
            payload: json!({"unexpected": "shape"}),
            delay: Duration::ZERO,
        });

        let attempt = invoke_stage(
            Some(capability),
            request(Stage::CreditAssessment),
            Duration::from_secs(1),
        )
        .await;

        assert_eq!(attempt.result.failure, Some(FailureCode::SchemaError));
        assert!(attempt.summary.is_none());
    }

    #[tokio::test]
    async fn test_invoke_stage_missing_capability() {
        let attempt = invoke_stage(None, request(Stage::Audit), Duration::from_secs(1)).await;
        assert_eq!(attempt.result.failure, Some(FailureCode::Unavailable));
    }

    #[test]
    fn test_registry_reports_missing_stages() {
        let mut registry = CapabilityRegistry::new();
        registry.register(Arc::new(FixedCapability {
            stage: Stage::Audit,
            payload: json!({}),
            delay: Duration::ZERO,
        }));

        let missing = registry.missing_stages();
        assert_eq!(missing.len(), 6);
        assert!(!missing.contains(&Stage::Audit));
        assert!(!missing.contains(&Stage::Underwriting));
        assert_eq!(registry.stages(), vec![Stage::Audit]);
    }
}
