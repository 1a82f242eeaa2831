//! Attribution flow orchestrator
//!
//! Single-flight state machine coordinating three remote operations —
//! register user, resolve attribution, associate transaction — across
//! process launches. Every external stimulus (an evaluation request, a
//! captured transaction, a reset, a debug query) is a command on one
//! serialized channel; the command loop is therefore the single-flight
//! guarantee, and remote-call completions re-enter the flow as fresh
//! commands rather than nested callbacks.
//!
//! ```text
//! Host / observer / settle timers
//!   ↓ FlowCommand (mpsc, serialized)
//! AttributionOrchestrator (decides the next legal calls)
//!   ↓ ports
//! FlowStorePort / AttributionProviderPort / BackendPort
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

use ak_core::flow::{
    reconcile_register_response, AttributionOutcome, FlowState, RegisterReconciliation,
};
use ak_core::ports::{
    AttributionProviderPort, BackendPort, ClockPort, FlowStorePort, TransactionObserverPort,
};
use ak_core::{BackendError, OperationKind, RegisterResponse, RetryRecord};

use crate::config::FlowConfig;
use crate::ledger::RetryLedger;

#[cfg(test)]
pub(crate) mod test_support;

/// Commands processed by the orchestrator loop, one at a time.
enum FlowCommand {
    Evaluate,
    TransactionCaptured(String),
    Reset,
    DebugReport(oneshot::Sender<FlowDebugReport>),
    Shutdown,
}

/// Failure state is only observable through this debug query; no error is
/// ever surfaced to the host as a crash.
#[derive(Debug, Clone)]
pub struct FlowDebugReport {
    pub state: FlowState,
    pub retries: Vec<OperationRetryStatus>,
}

#[derive(Debug, Clone)]
pub struct OperationRetryStatus {
    pub operation: OperationKind,
    pub record: Option<RetryRecord>,
    /// Jittered estimate, re-drawn per query. `None` when eligible now.
    pub time_until_retry: Option<Duration>,
}

#[derive(Debug, Error)]
pub enum HandleError {
    #[error("orchestrator is no longer running")]
    Closed,
}

/// Cloneable handle to a spawned orchestrator.
#[derive(Clone)]
pub struct OrchestratorHandle {
    command_tx: mpsc::Sender<FlowCommand>,
    evaluate_pending: Arc<AtomicBool>,
}

impl OrchestratorHandle {
    /// Ask the orchestrator to run an evaluation pass. Invocations that
    /// arrive while a pass is queued or running are dropped, not queued:
    /// the running pass re-triggers evaluation itself once its completions
    /// land, so nothing is lost.
    pub fn request_evaluation(&self) {
        request_evaluation(&self.command_tx, &self.evaluate_pending);
    }

    /// Clear all flow state, including retry records. The lifetime request
    /// budget is unaffected.
    pub async fn reset(&self) -> Result<(), HandleError> {
        self.command_tx
            .send(FlowCommand::Reset)
            .await
            .map_err(|_| HandleError::Closed)
    }

    pub async fn debug_report(&self) -> Result<FlowDebugReport, HandleError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.command_tx
            .send(FlowCommand::DebugReport(reply_tx))
            .await
            .map_err(|_| HandleError::Closed)?;
        reply_rx.await.map_err(|_| HandleError::Closed)
    }

    pub async fn shutdown(&self) -> Result<(), HandleError> {
        self.command_tx
            .send(FlowCommand::Shutdown)
            .await
            .map_err(|_| HandleError::Closed)
    }
}

/// Coalescing enqueue of an evaluation pass. The pending flag is cleared by
/// the loop when it dequeues the command, so at most one `Evaluate` is ever
/// in flight.
fn request_evaluation(command_tx: &mpsc::Sender<FlowCommand>, evaluate_pending: &AtomicBool) {
    if evaluate_pending.swap(true, Ordering::AcqRel) {
        return;
    }
    if command_tx.try_send(FlowCommand::Evaluate).is_err() {
        evaluate_pending.store(false, Ordering::Release);
    }
}

/// The persisted, idempotent attribution flow state machine.
///
/// Explicitly constructed and spawned by the host process — there is no
/// global instance. All collaborators are injected.
pub struct AttributionOrchestrator {
    store: Arc<dyn FlowStorePort>,
    provider: Arc<dyn AttributionProviderPort>,
    observer: Arc<dyn TransactionObserverPort>,
    backend: Arc<dyn BackendPort>,
    ledger: RetryLedger,
    config: FlowConfig,
    command_tx: mpsc::Sender<FlowCommand>,
    evaluate_pending: Arc<AtomicBool>,
}

impl AttributionOrchestrator {
    /// Spawn the orchestrator onto the current runtime and kick off the
    /// first evaluation pass. The transaction observer is started
    /// immediately: transactions can arrive before a user exists.
    pub fn spawn(
        store: Arc<dyn FlowStorePort>,
        provider: Arc<dyn AttributionProviderPort>,
        observer: Arc<dyn TransactionObserverPort>,
        backend: Arc<dyn BackendPort>,
        clock: Arc<dyn ClockPort>,
        config: FlowConfig,
    ) -> OrchestratorHandle {
        let (command_tx, command_rx) = mpsc::channel(config.command_buffer);
        let evaluate_pending = Arc::new(AtomicBool::new(false));
        let ledger = RetryLedger::new(store.clone(), clock, config.backoff.clone());

        let orchestrator = Self {
            store,
            provider,
            observer,
            backend,
            ledger,
            config,
            command_tx: command_tx.clone(),
            evaluate_pending: evaluate_pending.clone(),
        };

        let activation = Uuid::new_v4();
        let span = info_span!("attribution.flow", activation = %activation);
        tokio::spawn(orchestrator.run(command_rx).instrument(span));

        OrchestratorHandle {
            command_tx,
            evaluate_pending,
        }
    }

    async fn run(self, mut command_rx: mpsc::Receiver<FlowCommand>) {
        self.start_observer().await;
        self.resolve_install_type().await;
        request_evaluation(&self.command_tx, &self.evaluate_pending);

        while let Some(command) = command_rx.recv().await {
            match command {
                FlowCommand::Evaluate => {
                    self.evaluate_pending.store(false, Ordering::Release);
                    self.run_pass().await;
                }
                FlowCommand::TransactionCaptured(transaction_id) => {
                    self.handle_transaction_captured(&transaction_id).await;
                }
                FlowCommand::Reset => match self.store.reset().await {
                    Ok(()) => {
                        info!("flow state reset");
                        // A completed flow stopped its observer; the new
                        // lifetime needs its own capture cycle and an
                        // immediate first pass.
                        self.start_observer().await;
                        request_evaluation(&self.command_tx, &self.evaluate_pending);
                    }
                    Err(error) => warn!(error = %error, "flow state reset failed"),
                },
                FlowCommand::DebugReport(reply_tx) => {
                    let _ = reply_tx.send(self.debug_report().await);
                }
                FlowCommand::Shutdown => {
                    if let Err(error) = self.observer.stop().await {
                        warn!(error = %error, "transaction observer stop failed");
                    }
                    debug!("orchestrator shut down");
                    break;
                }
            }
        }
    }

    /// Start the transaction observer and relay its single delivery into
    /// the command loop. The observer is stopped as soon as the value
    /// arrives.
    async fn start_observer(&self) {
        match self.observer.start().await {
            Ok(mut delivery_rx) => {
                let command_tx = self.command_tx.clone();
                let observer = self.observer.clone();
                tokio::spawn(async move {
                    if let Some(transaction_id) = delivery_rx.recv().await {
                        if let Err(error) = observer.stop().await {
                            warn!(error = %error, "transaction observer stop failed");
                        }
                        let _ = command_tx
                            .send(FlowCommand::TransactionCaptured(transaction_id))
                            .await;
                    }
                });
            }
            Err(error) => warn!(error = %error, "transaction observer failed to start"),
        }
    }

    /// Fix the install type on first activation: first install iff no
    /// durable flow state existed when the store was opened.
    async fn resolve_install_type(&self) {
        let state = match self.store.snapshot().await {
            Ok(state) => state,
            Err(error) => {
                warn!(error = %error, "state snapshot failed; install type unresolved");
                return;
            }
        };
        if state.install_type_resolved {
            return;
        }
        let is_first_install = !self.store.had_persisted_state().await;
        match self.store.set_install_type(is_first_install).await {
            Ok(()) => info!(is_first_install, "install type resolved"),
            Err(error) => warn!(error = %error, "install type write failed"),
        }
    }

    /// One evaluation pass: read state, issue whichever remote calls are
    /// legal and not in backoff, apply their results. Runs strictly
    /// serially within the command loop.
    async fn run_pass(&self) {
        let state = match self.store.snapshot().await {
            Ok(state) => state,
            Err(error) => {
                warn!(error = %error, "state snapshot failed; pass skipped");
                return;
            }
        };

        let stage = state.stage();
        debug!(stage = ?stage, "evaluation pass");

        if state.should_terminate() {
            debug!("flow terminal; no further remote calls");
            return;
        }

        if !state.user_created {
            if !self.ledger.can_retry(OperationKind::Register).await {
                debug!("register in backoff; waiting");
                return;
            }
            self.attempt_register().await;
            return;
        }

        let resolve_due =
            !state.attribution_resolved && self.ledger.can_retry(OperationKind::Resolve).await;
        let associate_due = state.can_associate()
            && !state.association_complete
            && self.ledger.can_retry(OperationKind::Associate).await;

        // The two legs are independent and must not block each other.
        match (resolve_due, associate_due) {
            (true, true) => {
                tokio::join!(self.attempt_resolve(&state), self.attempt_associate(&state));
            }
            (true, false) => self.attempt_resolve(&state).await,
            (false, true) => self.attempt_associate(&state).await,
            (false, false) => {
                debug!("pass idle; waiting on an external event or a backoff timer");
            }
        }
    }

    async fn attempt_register(&self) {
        let token = match self.provider.fetch_token().await {
            Ok(token) => Some(token),
            Err(unavailable) => {
                info!(reason = %unavailable, "attribution token unavailable; registering without one");
                None
            }
        };

        match self.backend.register_user(token).await {
            Ok(response) => {
                self.apply_register_response(&response).await;
                self.schedule_reevaluation();
            }
            Err(error) => self.handle_call_failure(OperationKind::Register, error).await,
        }
    }

    async fn apply_register_response(&self, response: &RegisterResponse) {
        match reconcile_register_response(response) {
            RegisterReconciliation::Created {
                user_id,
                inferred,
                attribution,
            } => {
                if inferred {
                    // Distinct from the explicit path so telemetry can tell
                    // when the backend starts (or stops) omitting the flag.
                    warn!(
                        user_id = %user_id,
                        inferred = true,
                        "user creation inferred from attribution outcome"
                    );
                }
                if let Err(error) = self.store.set_user_created(&user_id).await {
                    warn!(error = %error, "user creation write failed");
                    return;
                }
                self.ledger.record_success(OperationKind::Register).await;
                info!(user_id = %user_id, "user registered");
                if let Some(outcome) = attribution {
                    self.apply_attribution_outcome(outcome).await;
                }
            }
            RegisterReconciliation::NonCampaign => {
                self.ledger.record_success(OperationKind::Register).await;
                match self.store.set_attribution_resolved(false).await {
                    Ok(()) => info!("install did not originate from the campaign; flow terminal"),
                    Err(error) => warn!(error = %error, "attribution write failed"),
                }
            }
            RegisterReconciliation::Inconclusive { attribution } => {
                if let Some(outcome) = attribution {
                    self.apply_attribution_outcome(outcome).await;
                }
                warn!("register response inconclusive");
                self.ledger.record_failure(OperationKind::Register).await;
            }
        }
    }

    /// Apply an attribution outcome, whether it came from a standalone
    /// resolve call or embedded in a register response.
    async fn apply_attribution_outcome(&self, outcome: AttributionOutcome) {
        if let Err(error) = self
            .store
            .set_attribution_resolved(outcome.is_asa_user)
            .await
        {
            warn!(error = %error, "attribution write failed");
            return;
        }
        self.ledger.record_success(OperationKind::Resolve).await;
        info!(is_asa_user = outcome.is_asa_user, "attribution resolved");
    }

    async fn attempt_resolve(&self, state: &FlowState) {
        let Some(user_id) = state.user_id.as_deref() else {
            return;
        };
        let token = match self.provider.fetch_token().await {
            Ok(token) => token,
            Err(unavailable) => {
                // No network attempt happened; no ledger slot is consumed.
                info!(reason = %unavailable, "attribution token unavailable; resolve leg skipped");
                return;
            }
        };

        match self.backend.resolve_attribution(user_id, &token).await {
            Ok(response) => {
                if response.attribution_resolved == Some(true) {
                    self.apply_attribution_outcome(AttributionOutcome {
                        is_asa_user: response.originated_from_campaign == Some(true),
                    })
                    .await;
                } else {
                    warn!("resolve response inconclusive");
                    self.ledger.record_failure(OperationKind::Resolve).await;
                }
                // A captured transaction may have become associable; re-run
                // regardless of the resolution outcome.
                self.schedule_reevaluation();
            }
            Err(error) => self.handle_call_failure(OperationKind::Resolve, error).await,
        }
    }

    async fn attempt_associate(&self, state: &FlowState) {
        let (Some(user_id), Some(transaction_id)) = (
            state.user_id.as_deref(),
            state.original_transaction_id.as_deref(),
        ) else {
            return;
        };

        match self
            .backend
            .associate_transaction(user_id, transaction_id)
            .await
        {
            Ok(response) if response.success == Some(true) => {
                self.ledger.record_success(OperationKind::Associate).await;
                match self.store.set_association_complete().await {
                    Ok(()) => info!(
                        user_id,
                        transaction_id,
                        confirmed_user_id = ?response.confirmed_user_id,
                        "transaction associated; flow complete"
                    ),
                    Err(error) => warn!(error = %error, "association write failed"),
                }
            }
            Ok(_) => {
                warn!("associate response ambiguous");
                self.ledger.record_failure(OperationKind::Associate).await;
                self.schedule_reevaluation();
            }
            Err(error) => {
                self.handle_call_failure(OperationKind::Associate, error)
                    .await
            }
        }
    }

    async fn handle_call_failure(&self, operation: OperationKind, error: BackendError) {
        if !error.is_retryable() {
            // Budget exhausted: the call never left the process, no ledger
            // slot is consumed, and re-evaluating now would spin — wait for
            // the next external invocation instead.
            warn!(operation = %operation, "remote call blocked by the lifetime request budget");
            return;
        }
        warn!(operation = %operation, error = %error, "remote call failed");
        self.ledger.record_failure(operation).await;
        self.schedule_reevaluation();
    }

    /// Post a re-evaluation after the settle delay, giving the storage
    /// write time to propagate before the next decision reads it.
    fn schedule_reevaluation(&self) {
        let delay = self.config.settle_delay;
        let command_tx = self.command_tx.clone();
        let evaluate_pending = self.evaluate_pending.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            request_evaluation(&command_tx, &evaluate_pending);
        });
    }

    /// Record the captured transaction immediately — even before a user
    /// exists — then act on it only if the flow can already use it.
    async fn handle_transaction_captured(&self, transaction_id: &str) {
        info!(transaction_id, "transaction captured");
        if let Err(error) = self.store.set_transaction_captured(transaction_id).await {
            warn!(error = %error, "transaction capture write failed");
            return;
        }
        match self.store.snapshot().await {
            Ok(state) if state.user_created => self.run_pass().await,
            Ok(_) => debug!("transaction held until user registration completes"),
            Err(error) => warn!(error = %error, "state snapshot failed after transaction capture"),
        }
    }

    async fn debug_report(&self) -> FlowDebugReport {
        let state = self.store.snapshot().await.unwrap_or_default();
        let mut retries = Vec::with_capacity(OperationKind::ALL.len());
        for operation in OperationKind::ALL {
            let record = self.store.retry_record(operation).await.ok().flatten();
            retries.push(OperationRetryStatus {
                operation,
                record,
                time_until_retry: self.ledger.time_until_retry(operation).await,
            });
        }
        FlowDebugReport { state, retries }
    }
}
