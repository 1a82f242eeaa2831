//! Lifetime request budget
//!
//! A durable counter of every backend request this install has ever made.
//! It is deliberately stored apart from the flow state: a flow reset wipes
//! progress and retry records but never refunds requests.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::fs;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use ak_core::ports::BackendPort;
use ak_core::{
    AssociateResponse, AttributionToken, BackendError, RegisterResponse, ResolveResponse,
};

use crate::fs::app_data_dir;

/// File name of the durable request counter, under the app data directory.
pub const DEFAULT_REQUEST_BUDGET_FILE: &str = "attribution_request_budget.json";

/// Hard ceiling on backend requests over the lifetime of an install.
pub const LIFETIME_REQUEST_CEILING: u32 = 100;

#[derive(Debug, Serialize, Deserialize, Default)]
#[serde(default)]
struct PersistedBudget {
    used: u32,
}

/// Durable lifetime request counter.
///
/// `try_consume` claims a slot with a lock-free increment, so concurrent
/// legs can never over-spend; persistence of the claimed value is
/// best-effort behind a lock. A persist failure under-counts at worst,
/// which a later successful write corrects.
#[derive(Debug)]
pub struct FileRequestBudget {
    path: PathBuf,
    used: AtomicU32,
    ceiling: u32,
    write_lock: Mutex<()>,
}

impl FileRequestBudget {
    pub async fn load(path: impl Into<PathBuf>) -> Result<Self> {
        Self::load_with_ceiling(path, LIFETIME_REQUEST_CEILING).await
    }

    /// Open the counter at its platform-default location.
    pub async fn load_default() -> Result<Self> {
        Self::load(app_data_dir()?.join(DEFAULT_REQUEST_BUDGET_FILE)).await
    }

    pub async fn load_with_ceiling(path: impl Into<PathBuf>, ceiling: u32) -> Result<Self> {
        let path = path.into();
        let persisted = match fs::read_to_string(&path).await {
            Ok(content) => serde_json::from_str::<PersistedBudget>(&content)
                .with_context(|| format!("parse request budget failed: {}", path.display()))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => PersistedBudget::default(),
            Err(e) => {
                return Err(e)
                    .with_context(|| format!("read request budget failed: {}", path.display()))
            }
        };

        Ok(Self {
            path,
            used: AtomicU32::new(persisted.used),
            ceiling,
            write_lock: Mutex::new(()),
        })
    }

    pub fn used(&self) -> u32 {
        self.used.load(Ordering::SeqCst)
    }

    pub fn ceiling(&self) -> u32 {
        self.ceiling
    }

    /// Claim one request slot. Returns false once the ceiling is reached;
    /// the counter never exceeds the ceiling.
    pub async fn try_consume(&self) -> bool {
        let claim = self
            .used
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |used| {
                (used < self.ceiling).then_some(used + 1)
            });

        match claim {
            Ok(previous) => {
                debug!(
                    used = previous + 1,
                    ceiling = self.ceiling,
                    "request budget slot consumed"
                );
                self.persist_latest().await;
                true
            }
            Err(_) => false,
        }
    }

    /// Write the latest counter value. Serialized so concurrent claims do
    /// not race the temp-file rename; always writes the freshest value.
    async fn persist_latest(&self) {
        let _guard = self.write_lock.lock().await;
        let snapshot = PersistedBudget { used: self.used() };
        if let Err(error) = self.write(&snapshot).await {
            warn!(error = %error, "request budget persist failed");
        }
    }

    async fn write(&self, persisted: &PersistedBudget) -> Result<()> {
        if let Some(dir) = self.path.parent() {
            fs::create_dir_all(dir)
                .await
                .with_context(|| format!("create request budget dir failed: {}", dir.display()))?;
        }

        let content =
            serde_json::to_string_pretty(persisted).context("serialize request budget failed")?;
        let tmp_path = self.path.with_extension("json.tmp");
        fs::write(&tmp_path, &content)
            .await
            .with_context(|| format!("write temp request budget failed: {}", tmp_path.display()))?;
        fs::rename(&tmp_path, &self.path).await.with_context(|| {
            format!(
                "rename temp request budget to target failed: {} -> {}",
                tmp_path.display(),
                self.path.display()
            )
        })?;

        Ok(())
    }
}

/// Backend decorator that charges every call against the lifetime budget
/// before letting it out of the process.
pub struct BudgetedBackend {
    inner: Arc<dyn BackendPort>,
    budget: Arc<FileRequestBudget>,
}

impl BudgetedBackend {
    pub fn new(inner: Arc<dyn BackendPort>, budget: Arc<FileRequestBudget>) -> Self {
        Self { inner, budget }
    }

    async fn charge(&self) -> Result<(), BackendError> {
        if self.budget.try_consume().await {
            return Ok(());
        }
        warn!(
            used = self.budget.used(),
            ceiling = self.budget.ceiling(),
            "lifetime request budget exhausted"
        );
        Err(BackendError::BudgetExhausted)
    }
}

#[async_trait]
impl BackendPort for BudgetedBackend {
    async fn register_user(
        &self,
        token: Option<AttributionToken>,
    ) -> Result<RegisterResponse, BackendError> {
        self.charge().await?;
        self.inner.register_user(token).await
    }

    async fn resolve_attribution(
        &self,
        user_id: &str,
        token: &AttributionToken,
    ) -> Result<ResolveResponse, BackendError> {
        self.charge().await?;
        self.inner.resolve_attribution(user_id, token).await
    }

    async fn associate_transaction(
        &self,
        user_id: &str,
        transaction_id: &str,
    ) -> Result<AssociateResponse, BackendError> {
        self.charge().await?;
        self.inner.associate_transaction(user_id, transaction_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct CountingBackend {
        calls: AtomicU32,
    }

    impl CountingBackend {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicU32::new(0),
            })
        }
    }

    #[async_trait]
    impl BackendPort for CountingBackend {
        async fn register_user(
            &self,
            _token: Option<AttributionToken>,
        ) -> Result<RegisterResponse, BackendError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(RegisterResponse::default())
        }

        async fn resolve_attribution(
            &self,
            _user_id: &str,
            _token: &AttributionToken,
        ) -> Result<ResolveResponse, BackendError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(ResolveResponse::default())
        }

        async fn associate_transaction(
            &self,
            _user_id: &str,
            _transaction_id: &str,
        ) -> Result<AssociateResponse, BackendError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(AssociateResponse::default())
        }
    }

    fn budget_path(dir: &tempfile::TempDir) -> PathBuf {
        dir.path().join(DEFAULT_REQUEST_BUDGET_FILE)
    }

    #[tokio::test]
    async fn counter_stops_exactly_at_the_ceiling() {
        let dir = tempfile::tempdir().unwrap();
        let budget = FileRequestBudget::load_with_ceiling(budget_path(&dir), 3)
            .await
            .unwrap();

        assert!(budget.try_consume().await);
        assert!(budget.try_consume().await);
        assert!(budget.try_consume().await);
        assert!(!budget.try_consume().await);
        assert_eq!(budget.used(), 3);
    }

    #[tokio::test]
    async fn counter_survives_a_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = budget_path(&dir);

        {
            let budget = FileRequestBudget::load(&path).await.unwrap();
            assert!(budget.try_consume().await);
            assert!(budget.try_consume().await);
        }

        let budget = FileRequestBudget::load(&path).await.unwrap();
        assert_eq!(budget.used(), 2);
        assert_eq!(budget.ceiling(), LIFETIME_REQUEST_CEILING);
    }

    #[tokio::test]
    async fn default_ceiling_is_one_hundred() {
        let dir = tempfile::tempdir().unwrap();
        let budget = FileRequestBudget::load(budget_path(&dir)).await.unwrap();
        assert_eq!(budget.ceiling(), 100);

        for _ in 0..100 {
            assert!(budget.try_consume().await);
        }
        assert!(!budget.try_consume().await);
        assert_eq!(budget.used(), 100);
    }

    #[tokio::test]
    async fn exhausted_budget_blocks_calls_before_the_inner_backend() {
        let dir = tempfile::tempdir().unwrap();
        let budget = Arc::new(
            FileRequestBudget::load_with_ceiling(budget_path(&dir), 2)
                .await
                .unwrap(),
        );
        let inner = CountingBackend::new();
        let backend = BudgetedBackend::new(inner.clone(), budget);

        assert!(backend.register_user(None).await.is_ok());
        let token = AttributionToken::new("token-1");
        assert!(backend.resolve_attribution("7", &token).await.is_ok());
        assert_eq!(inner.calls.load(Ordering::SeqCst), 2);

        let blocked = backend.associate_transaction("7", "txn-1").await;
        assert_eq!(blocked.unwrap_err(), BackendError::BudgetExhausted);
        // The third call never reached the inner backend.
        assert_eq!(inner.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn corrupt_budget_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = budget_path(&dir);
        tokio::fs::write(&path, "not json").await.unwrap();

        let error = FileRequestBudget::load(&path).await.unwrap_err();
        assert!(error.to_string().contains("parse request budget failed"));
    }
}
