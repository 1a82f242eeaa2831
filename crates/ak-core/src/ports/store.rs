use async_trait::async_trait;

use crate::flow::FlowState;
use crate::retry::{OperationKind, RetryRecord};

/// Durable store of flow progress. Implementations must survive process
/// restarts and keep keys namespaced away from host-application storage.
///
/// Concurrency contract: reads may proceed concurrently; writes are
/// mutually exclusive with reads and with each other, and a write is fully
/// durable before any read started after it can observe the change.
/// Compound fields are written atomically as a unit. Setters are
/// idempotent: re-applying an already-recorded fact is a no-op (for the
/// captured transaction, the first value wins).
#[async_trait]
pub trait FlowStorePort: Send + Sync {
    async fn snapshot(&self) -> anyhow::Result<FlowState>;

    /// Record user creation together with the user id, exactly once.
    async fn set_user_created(&self, user_id: &str) -> anyhow::Result<()>;

    async fn set_attribution_resolved(&self, is_asa_user: bool) -> anyhow::Result<()>;

    /// Capture the observed transaction id. First value wins.
    async fn set_transaction_captured(&self, transaction_id: &str) -> anyhow::Result<()>;

    async fn set_association_complete(&self) -> anyhow::Result<()>;

    async fn set_install_type(&self, is_first_install: bool) -> anyhow::Result<()>;

    async fn retry_record(&self, operation: OperationKind)
        -> anyhow::Result<Option<RetryRecord>>;

    async fn set_retry_record(
        &self,
        operation: OperationKind,
        record: RetryRecord,
    ) -> anyhow::Result<()>;

    async fn clear_retry_record(&self, operation: OperationKind) -> anyhow::Result<()>;

    /// Whether durable state already existed when this store was opened.
    /// Used to resolve the install type exactly once.
    async fn had_persisted_state(&self) -> bool;

    /// Clear every field, including retry records. The lifetime request
    /// budget is owned by the transport layer and is NOT touched by this.
    async fn reset(&self) -> anyhow::Result<()>;
}
