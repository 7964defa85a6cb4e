//! Loan Origination Orchestrator
//!
//! Drives a loan application through a fixed stage pipeline:
//! - Sequential intake, document and qualification stages
//! - Credit assessment and asset valuation run concurrently, joined atomically
//! - Deterministic underwriting decision with hard policy gates
//! - Offer generation from deterministic finance math
//! - Hash-verified run records kept in a result sink
//!
//! PIPELINE:
//! INTAKE → DOCUMENTS → QUALIFICATION → (ASSESSMENT ∥ VALUATION) → UNDERWRITING → OFFER → COMMUNICATION → AUDIT

pub mod api;
pub mod capability;
pub mod config;
pub mod context;
pub mod error;
pub mod finance;
pub mod models;
pub mod offer;
pub mod pipeline;
pub mod sink;
pub mod state;
pub mod underwriting;

pub use error::Result;

// Re-export common types
pub use models::*;
pub use config::OrchestratorConfig;
pub use pipeline::{Orchestrator, RunState};
