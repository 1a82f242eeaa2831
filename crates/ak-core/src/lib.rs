//! # ak-core
//!
//! Core domain models and business logic for AttriKit.
//!
//! This crate contains pure attribution-flow logic without any
//! infrastructure dependencies: the persisted flow state and its derived
//! stage, the register-response reconciliation rules, the retry/backoff
//! policy, and the ports implemented by the infrastructure layer.

pub mod backend;
pub mod flow;
pub mod ports;
pub mod retry;

// Re-export commonly used types at the crate root
pub use backend::{
    AssociateResponse, AttributionToken, BackendError, RegisterResponse, ResolveResponse,
    TransactionId,
};
pub use flow::{
    reconcile_register_response, AttributionOutcome, FlowStage, FlowState, RegisterReconciliation,
};
pub use retry::{BackoffPolicy, OperationKind, RetryRecord, RetryRecords};
