//! Error types for the loan origination orchestrator

use crate::models::FailureCode;
use thiserror::Error;

/// Result type alias for orchestrator operations
pub type Result<T> = std::result::Result<T, OrchestrationError>;

#[derive(Error, Debug)]
pub enum OrchestrationError {

    // =============================
    // Stage Capability Errors
    // =============================

    #[error("Capability timed out: {0}")]
    CapabilityTimeout(String),

    #[error("Capability schema error: {0}")]
    CapabilitySchemaError(String),

    #[error("Capability unavailable: {0}")]
    CapabilityUnavailable(String),

    #[error("Stage rejected: {0}")]
    StageRejected(String),

    // =============================
    // Core Pipeline Errors
    // =============================

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Context conflict: {0}")]
    ContextConflict(String),

    #[error("Invalid state transition: {0}")]
    InvalidTransition(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Database error: {0}")]
    DatabaseError(String),

    // =============================
    // External Library Conversions
    // =============================

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("HTTP client error: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("UUID parse error: {0}")]
    UuidError(#[from] uuid::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl OrchestrationError {
    /// Reason code recorded on a failed stage result
    pub fn failure_code(&self) -> FailureCode {
        match self {
            OrchestrationError::CapabilityTimeout(_) => FailureCode::Timeout,
            OrchestrationError::CapabilitySchemaError(_)
            | OrchestrationError::SerializationError(_) => FailureCode::SchemaError,
            OrchestrationError::InvalidInput(_) => FailureCode::InvalidInput,
            OrchestrationError::StageRejected(_)
            | OrchestrationError::ContextConflict(_)
            | OrchestrationError::InvalidTransition(_) => FailureCode::StageFailed,
            OrchestrationError::CapabilityUnavailable(_)
            | OrchestrationError::HttpError(_)
            | OrchestrationError::NotFound(_)
            | OrchestrationError::ConfigError(_)
            | OrchestrationError::DatabaseError(_)
            | OrchestrationError::UuidError(_)
            | OrchestrationError::IoError(_) => FailureCode::Unavailable,
        }
    }
}
