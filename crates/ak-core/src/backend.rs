//! Backend call payloads and error taxonomy
//!
//! The backend contract is deliberately loose: every response field is
//! optional because the server is known to omit fields depending on the
//! attribution outcome. Reconciling that ambiguity into flow decisions
//! lives in [`crate::flow::reconcile_register_response`], not here.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Identifier delivered by the platform transaction queue.
pub type TransactionId = String;

/// Opaque attribution token handed to the backend. Never inspected
/// client-side.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributionToken(String);

impl AttributionToken {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Response to the register call. Any attribution outcome embedded here is
/// applied exactly like a standalone resolve response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct RegisterResponse {
    pub user_id: Option<String>,
    pub originated_from_campaign: Option<bool>,
    pub attribution_resolved: Option<bool>,
    pub user_created: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ResolveResponse {
    pub originated_from_campaign: Option<bool>,
    pub attribution_resolved: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AssociateResponse {
    pub success: Option<bool>,
    pub confirmed_user_id: Option<String>,
}

/// Failure taxonomy for remote calls.
///
/// Transport, backend-reported and decode failures are treated uniformly by
/// the orchestrator: recorded against the operation's retry ledger and left
/// for a later pass. `BudgetExhausted` is local-only — the call never
/// reached the network, so it must not consume a ledger slot.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BackendError {
    #[error("transport failure: {0}")]
    Transport(String),

    #[error("backend error (status {status}): {message}")]
    Backend { status: u16, message: String },

    #[error("response decode failure: {0}")]
    Decode(String),

    #[error("lifetime request budget exhausted")]
    BudgetExhausted,
}

impl BackendError {
    /// Whether this failure should count against the retry ledger.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, BackendError::BudgetExhausted)
    }
}
