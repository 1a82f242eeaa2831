//! Shared test doubles for the orchestrator and ledger tests: a manual
//! clock, an in-memory flow store, and a scriptable transaction observer.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::mpsc;

use ak_core::flow::FlowState;
use ak_core::ports::{ClockPort, FlowStorePort, TransactionObserverPort};
use ak_core::{OperationKind, RetryRecord, RetryRecords, TransactionId};

pub(crate) struct ManualClock {
    now_ms: AtomicI64,
}

impl ManualClock {
    pub fn new(now_ms: i64) -> Self {
        Self {
            now_ms: AtomicI64::new(now_ms),
        }
    }

    pub fn advance_ms(&self, delta_ms: i64) {
        self.now_ms.fetch_add(delta_ms, Ordering::SeqCst);
    }
}

impl ClockPort for ManualClock {
    fn now_ms(&self) -> i64 {
        self.now_ms.load(Ordering::SeqCst)
    }
}

/// In-memory stand-in for the durable flow store. Mutations go through the
/// same `FlowState::apply_*` helpers the real store uses.
#[derive(Default)]
pub(crate) struct MemoryFlowStore {
    inner: Mutex<(FlowState, RetryRecords)>,
    had_persisted_state: bool,
}

impl MemoryFlowStore {
    /// Store that reports pre-existing durable state, seeded with `state`.
    pub fn with_state(state: FlowState) -> Self {
        Self {
            inner: Mutex::new((state, RetryRecords::default())),
            had_persisted_state: true,
        }
    }
}

#[async_trait]
impl FlowStorePort for MemoryFlowStore {
    async fn snapshot(&self) -> anyhow::Result<FlowState> {
        Ok(self.inner.lock().unwrap().0.clone())
    }

    async fn set_user_created(&self, user_id: &str) -> anyhow::Result<()> {
        self.inner.lock().unwrap().0.apply_user_created(user_id);
        Ok(())
    }

    async fn set_attribution_resolved(&self, is_asa_user: bool) -> anyhow::Result<()> {
        self.inner
            .lock()
            .unwrap()
            .0
            .apply_attribution_resolved(is_asa_user);
        Ok(())
    }

    async fn set_transaction_captured(&self, transaction_id: &str) -> anyhow::Result<()> {
        self.inner
            .lock()
            .unwrap()
            .0
            .apply_transaction_captured(transaction_id);
        Ok(())
    }

    async fn set_association_complete(&self) -> anyhow::Result<()> {
        self.inner.lock().unwrap().0.apply_association_complete();
        Ok(())
    }

    async fn set_install_type(&self, is_first_install: bool) -> anyhow::Result<()> {
        self.inner
            .lock()
            .unwrap()
            .0
            .apply_install_type(is_first_install);
        Ok(())
    }

    async fn retry_record(
        &self,
        operation: OperationKind,
    ) -> anyhow::Result<Option<RetryRecord>> {
        Ok(self.inner.lock().unwrap().1.get(operation))
    }

    async fn set_retry_record(
        &self,
        operation: OperationKind,
        record: RetryRecord,
    ) -> anyhow::Result<()> {
        self.inner.lock().unwrap().1.set(operation, record);
        Ok(())
    }

    async fn clear_retry_record(&self, operation: OperationKind) -> anyhow::Result<()> {
        self.inner.lock().unwrap().1.clear(operation);
        Ok(())
    }

    async fn had_persisted_state(&self) -> bool {
        self.had_persisted_state
    }

    async fn reset(&self) -> anyhow::Result<()> {
        let mut guard = self.inner.lock().unwrap();
        *guard = (FlowState::default(), RetryRecords::default());
        Ok(())
    }
}

/// Observer double backed by channels the test writes into. Each queued
/// channel serves one `start()`/`stop()` cycle, so a test can arm a second
/// cycle for a flow that restarts the observer.
pub(crate) struct StubObserver {
    receivers: Mutex<VecDeque<mpsc::Receiver<TransactionId>>>,
    stopped: AtomicBool,
}

impl StubObserver {
    /// Observer plus the sender the test uses to deliver a transaction.
    pub fn with_channel() -> (Arc<Self>, mpsc::Sender<TransactionId>) {
        let observer = Arc::new(Self {
            receivers: Mutex::new(VecDeque::new()),
            stopped: AtomicBool::new(false),
        });
        let delivery_tx = observer.arm_cycle();
        (observer, delivery_tx)
    }

    /// Observer that never delivers anything.
    pub fn inert() -> Arc<Self> {
        let (observer, _delivery_tx) = Self::with_channel();
        observer
    }

    /// Queue a channel for the next `start()` call and hand back its
    /// sender.
    pub fn arm_cycle(&self) -> mpsc::Sender<TransactionId> {
        let (delivery_tx, delivery_rx) = mpsc::channel(1);
        self.receivers.lock().unwrap().push_back(delivery_rx);
        delivery_tx
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TransactionObserverPort for StubObserver {
    async fn start(&self) -> anyhow::Result<mpsc::Receiver<TransactionId>> {
        let receiver = self
            .receivers
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| anyhow::anyhow!("no capture cycle armed"))?;
        self.stopped.store(false, Ordering::SeqCst);
        Ok(receiver)
    }

    async fn stop(&self) -> anyhow::Result<()> {
        self.stopped.store(true, Ordering::SeqCst);
        Ok(())
    }
}
