//! AttriKit Application Orchestration Layer
//!
//! This crate drives the end-to-end attribution flow: it owns the
//! single-flight orchestrator, the retry ledger it consults, and the
//! tuning configuration. All infrastructure is injected through the ports
//! defined in `ak-core`.

pub mod config;
pub mod ledger;
pub mod orchestrator;

pub use config::FlowConfig;
pub use ledger::RetryLedger;
pub use orchestrator::{
    AttributionOrchestrator, FlowDebugReport, HandleError, OperationRetryStatus,
    OrchestratorHandle,
};
