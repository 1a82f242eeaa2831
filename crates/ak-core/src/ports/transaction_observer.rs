use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::backend::TransactionId;

/// Platform transaction queue. Delivers at most one transaction id per
/// `start()`/`stop()` cycle, at an unpredictable time relative to the rest
/// of the flow — possibly before a user even exists.
///
/// Implementations must tolerate `start()` being called again after
/// `stop()`. The orchestrator starts the observer immediately on
/// activation and stops it as soon as a value is delivered.
#[async_trait]
pub trait TransactionObserverPort: Send + Sync {
    async fn start(&self) -> anyhow::Result<mpsc::Receiver<TransactionId>>;

    async fn stop(&self) -> anyhow::Result<()>;
}
