use serde::{Deserialize, Serialize};

/// Persisted progress of the attribution flow for one installed app.
///
/// Owned exclusively by the flow store; the orchestrator never mutates it
/// directly. Compound fields (`user_id` with `user_created`,
/// `original_transaction_id` with `transaction_captured`) are written as a
/// unit through the `apply_*` methods, so no reader can observe a
/// half-updated pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct FlowState {
    /// Whether a user record was created server-side. Set exactly once,
    /// together with `user_id`; cleared only by an explicit reset.
    pub user_created: bool,
    pub user_id: Option<String>,

    /// Whether attribution resolution completed. `is_asa_user` is
    /// meaningful only when this is true.
    pub attribution_resolved: bool,
    pub is_asa_user: bool,

    /// Whether the observed transaction was captured. Set exactly once per
    /// flow lifetime, together with `original_transaction_id`.
    pub transaction_captured: bool,
    pub original_transaction_id: Option<String>,

    /// Terminal success marker.
    pub association_complete: bool,

    /// Determined once, then fixed for the life of the install.
    pub install_type_resolved: bool,
    pub is_first_install: bool,
}

/// Derived stage of the flow. Never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowStage {
    /// No user record exists yet.
    NoUser,
    /// User exists, attribution unresolved.
    PendingAttribution,
    /// Campaign user, waiting for the transaction observer.
    AwaitingTransaction,
    /// User, attribution, and transaction all present; association pending.
    AwaitingAssociation,
    /// Terminal: attribution resolved negative, user not persisted.
    NonAsa,
    /// Terminal: association complete.
    Complete,
}

impl FlowStage {
    pub fn is_terminal(self) -> bool {
        matches!(self, FlowStage::NonAsa | FlowStage::Complete)
    }
}

impl FlowState {
    /// Terminal check: no further remote calls are issued once this holds,
    /// until an explicit reset.
    pub fn should_terminate(&self) -> bool {
        (self.attribution_resolved && !self.is_asa_user) || self.association_complete
    }

    /// Whether everything the associate call needs is present.
    pub fn can_associate(&self) -> bool {
        self.user_created
            && self.attribution_resolved
            && self.is_asa_user
            && self.transaction_captured
            && self.user_id.is_some()
            && self.original_transaction_id.is_some()
    }

    pub fn stage(&self) -> FlowStage {
        if self.association_complete {
            FlowStage::Complete
        } else if self.attribution_resolved && !self.is_asa_user {
            FlowStage::NonAsa
        } else if !self.user_created {
            FlowStage::NoUser
        } else if !self.attribution_resolved {
            FlowStage::PendingAttribution
        } else if !self.transaction_captured {
            FlowStage::AwaitingTransaction
        } else {
            FlowStage::AwaitingAssociation
        }
    }

    /// Mark the user as created. Returns false (no change) if a user was
    /// already recorded; creation happens exactly once.
    pub fn apply_user_created(&mut self, user_id: &str) -> bool {
        if self.user_created {
            return false;
        }
        self.user_created = true;
        self.user_id = Some(user_id.to_owned());
        true
    }

    /// Record the attribution outcome. Idempotent once resolved.
    pub fn apply_attribution_resolved(&mut self, is_asa_user: bool) -> bool {
        if self.attribution_resolved {
            return false;
        }
        self.attribution_resolved = true;
        self.is_asa_user = is_asa_user;
        true
    }

    /// Capture the observed transaction. First value wins; later deliveries
    /// are ignored.
    pub fn apply_transaction_captured(&mut self, transaction_id: &str) -> bool {
        if self.transaction_captured {
            return false;
        }
        self.transaction_captured = true;
        self.original_transaction_id = Some(transaction_id.to_owned());
        true
    }

    pub fn apply_association_complete(&mut self) -> bool {
        if self.association_complete {
            return false;
        }
        self.association_complete = true;
        true
    }

    /// Fix the install type. Resolved once for the life of the install.
    pub fn apply_install_type(&mut self, is_first_install: bool) -> bool {
        if self.install_type_resolved {
            return false;
        }
        self.install_type_resolved = true;
        self.is_first_install = is_first_install;
        true
    }
}
