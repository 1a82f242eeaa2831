use async_trait::async_trait;

use crate::backend::{
    AssociateResponse, AttributionToken, BackendError, RegisterResponse, ResolveResponse,
};

/// The three idempotent-intent remote calls. Each is a single asynchronous
/// call; none is expected to run more than once per flow lifetime under
/// normal operation, though the retry ledger permits bounded re-issue after
/// failure.
///
/// The lifetime request budget lives at this boundary: the production
/// implementation is wrapped in a budget decorator that fails calls locally
/// with [`BackendError::BudgetExhausted`] once the install's ceiling is
/// reached, regardless of which operation asks.
#[async_trait]
pub trait BackendPort: Send + Sync {
    /// Register the install with the backend. `None` when the platform
    /// could not produce an attribution token.
    async fn register_user(
        &self,
        token: Option<AttributionToken>,
    ) -> Result<RegisterResponse, BackendError>;

    async fn resolve_attribution(
        &self,
        user_id: &str,
        token: &AttributionToken,
    ) -> Result<ResolveResponse, BackendError>;

    async fn associate_transaction(
        &self,
        user_id: &str,
        transaction_id: &str,
    ) -> Result<AssociateResponse, BackendError>;
}
