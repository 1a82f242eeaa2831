use std::sync::Arc;
use std::time::Duration;

use tracing::warn;

use ak_core::ports::{ClockPort, FlowStorePort};
use ak_core::{BackoffPolicy, OperationKind, RetryRecord};

/// Retry/backoff ledger: failure counters with exponential, jittered
/// backoff per remote operation.
///
/// The records themselves are persisted by the flow store (so they survive
/// restarts and are cleared by `reset()`); this component owns the policy
/// math and the quiet-window expiry rule. Store errors fail open — the
/// lifetime request budget is the hard backstop against retry storms, not
/// this ledger.
pub struct RetryLedger {
    store: Arc<dyn FlowStorePort>,
    clock: Arc<dyn ClockPort>,
    policy: BackoffPolicy,
}

impl RetryLedger {
    pub fn new(
        store: Arc<dyn FlowStorePort>,
        clock: Arc<dyn ClockPort>,
        policy: BackoffPolicy,
    ) -> Self {
        Self {
            store,
            clock,
            policy,
        }
    }

    /// Whether the operation is currently eligible to run.
    pub async fn can_retry(&self, operation: OperationKind) -> bool {
        match self.store.retry_record(operation).await {
            Ok(record) => self.policy.can_retry(record.as_ref(), self.clock.now_ms()),
            Err(error) => {
                warn!(operation = %operation, error = %error, "retry record read failed; allowing attempt");
                true
            }
        }
    }

    /// Record a failed attempt. A record older than the quiet window is
    /// treated as empty, so the consecutive count restarts at one.
    pub async fn record_failure(&self, operation: OperationKind) {
        let now_ms = self.clock.now_ms();
        let next = match self.store.retry_record(operation).await {
            Ok(Some(previous)) if !self.policy.is_expired(&previous, now_ms) => {
                previous.next_failure(now_ms)
            }
            Ok(_) => RetryRecord::first_failure(now_ms),
            Err(error) => {
                warn!(operation = %operation, error = %error, "retry record read failed; restarting count");
                RetryRecord::first_failure(now_ms)
            }
        };
        if let Err(error) = self.store.set_retry_record(operation, next).await {
            warn!(operation = %operation, error = %error, "retry record write failed");
        }
    }

    /// Clear the failure record after a successful attempt.
    pub async fn record_success(&self, operation: OperationKind) {
        if let Err(error) = self.store.clear_retry_record(operation).await {
            warn!(operation = %operation, error = %error, "retry record clear failed");
        }
    }

    /// Estimated wait until the operation becomes eligible. `None` when it
    /// is eligible now. Jitter is re-drawn on every read.
    pub async fn time_until_retry(&self, operation: OperationKind) -> Option<Duration> {
        let record = self.store.retry_record(operation).await.ok()?;
        let wait_ms = self
            .policy
            .time_until_retry_ms(record.as_ref(), self.clock.now_ms());
        (wait_ms > 0).then(|| Duration::from_millis(wait_ms as u64))
    }
}
