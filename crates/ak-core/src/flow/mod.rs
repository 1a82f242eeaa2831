//! Attribution flow domain state
//!
//! The flow progresses `NoUser → PendingAttribution →
//! AwaitingTransaction → AwaitingAssociation → Complete`, with a
//! non-campaign resolution short-circuiting to a terminal stage. The stage
//! is always derived from [`FlowState`], never stored separately.

mod reconcile;
mod state;

pub use reconcile::{reconcile_register_response, AttributionOutcome, RegisterReconciliation};
pub use state::{FlowStage, FlowState};
