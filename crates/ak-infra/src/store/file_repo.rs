use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tokio::fs;
use tokio::sync::RwLock;

use ak_core::flow::FlowState;
use ak_core::ports::FlowStorePort;
use ak_core::{OperationKind, RetryRecord, RetryRecords};

use crate::fs::app_data_dir;

/// File name of the durable flow state, under the app data directory.
pub const DEFAULT_FLOW_STATE_FILE: &str = "attribution_flow_state.json";

/// Everything the flow persists, written as one JSON document so a crash
/// can never leave the state and the retry records out of step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
struct PersistedFlow {
    state: FlowState,
    retries: RetryRecords,
}

/// JSON-file flow store.
///
/// The in-memory copy behind the `RwLock` is authoritative; the file is
/// rewritten (temp file + rename) after every effective mutation. Holding
/// the write lock across the whole mutate-then-persist step is the
/// reader/writer barrier: a snapshot taken concurrently sees either the
/// previous state or the fully applied new one.
#[derive(Debug)]
pub struct FileFlowStore {
    path: PathBuf,
    inner: RwLock<PersistedFlow>,
    had_persisted_state: bool,
}

impl FileFlowStore {
    /// Open the store at `path`, reading existing durable state if any.
    ///
    /// A missing file means a fresh install and yields default state; a
    /// present-but-unparseable file is an error, not silent data loss.
    pub async fn load(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let (persisted, had_persisted_state) = match fs::read_to_string(&path).await {
            Ok(content) => {
                let persisted: PersistedFlow = serde_json::from_str(&content)
                    .with_context(|| format!("parse flow state failed: {}", path.display()))?;
                (persisted, true)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => (PersistedFlow::default(), false),
            Err(e) => {
                return Err(e)
                    .with_context(|| format!("read flow state failed: {}", path.display()))
            }
        };

        Ok(Self {
            path,
            inner: RwLock::new(persisted),
            had_persisted_state,
        })
    }

    /// Open the store at its platform-default location.
    pub async fn load_default() -> Result<Self> {
        Self::load(app_data_dir()?.join(DEFAULT_FLOW_STATE_FILE)).await
    }

    async fn atomic_write(&self, content: &str) -> Result<()> {
        if let Some(dir) = self.path.parent() {
            fs::create_dir_all(dir)
                .await
                .with_context(|| format!("create flow state dir failed: {}", dir.display()))?;
        }

        let tmp_path = self.path.with_extension("json.tmp");
        fs::write(&tmp_path, content)
            .await
            .with_context(|| format!("write temp flow state failed: {}", tmp_path.display()))?;

        fs::rename(&tmp_path, &self.path).await.with_context(|| {
            format!(
                "rename temp flow state to target failed: {} -> {}",
                tmp_path.display(),
                self.path.display()
            )
        })?;

        Ok(())
    }

    async fn persist(&self, persisted: &PersistedFlow) -> Result<()> {
        let content =
            serde_json::to_string_pretty(persisted).context("serialize flow state failed")?;
        self.atomic_write(&content).await
    }

    /// Apply a mutation under the write lock and persist only if it changed
    /// anything. Idempotent re-applications never touch the disk.
    async fn mutate<F>(&self, apply: F) -> Result<()>
    where
        F: FnOnce(&mut PersistedFlow) -> bool,
    {
        let mut guard = self.inner.write().await;
        if !apply(&mut guard) {
            return Ok(());
        }
        self.persist(&guard).await
    }
}

#[async_trait]
impl FlowStorePort for FileFlowStore {
    async fn snapshot(&self) -> Result<FlowState> {
        Ok(self.inner.read().await.state.clone())
    }

    async fn set_user_created(&self, user_id: &str) -> Result<()> {
        self.mutate(|p| p.state.apply_user_created(user_id)).await
    }

    async fn set_attribution_resolved(&self, is_asa_user: bool) -> Result<()> {
        self.mutate(|p| p.state.apply_attribution_resolved(is_asa_user))
            .await
    }

    async fn set_transaction_captured(&self, transaction_id: &str) -> Result<()> {
        self.mutate(|p| p.state.apply_transaction_captured(transaction_id))
            .await
    }

    async fn set_association_complete(&self) -> Result<()> {
        self.mutate(|p| p.state.apply_association_complete()).await
    }

    async fn set_install_type(&self, is_first_install: bool) -> Result<()> {
        self.mutate(|p| p.state.apply_install_type(is_first_install))
            .await
    }

    async fn retry_record(&self, operation: OperationKind) -> Result<Option<RetryRecord>> {
        Ok(self.inner.read().await.retries.get(operation))
    }

    async fn set_retry_record(&self, operation: OperationKind, record: RetryRecord) -> Result<()> {
        self.mutate(|p| {
            p.retries.set(operation, record);
            true
        })
        .await
    }

    async fn clear_retry_record(&self, operation: OperationKind) -> Result<()> {
        self.mutate(|p| p.retries.clear(operation)).await
    }

    async fn had_persisted_state(&self) -> bool {
        self.had_persisted_state
    }

    async fn reset(&self) -> Result<()> {
        self.mutate(|p| {
            let was_default = *p == PersistedFlow::default();
            *p = PersistedFlow::default();
            !was_default
        })
        .await
    }
}
