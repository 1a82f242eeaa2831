use async_trait::async_trait;
use thiserror::Error;

use crate::backend::AttributionToken;

/// The platform attribution API could not produce a token (unsupported OS,
/// simulator, ad tracking disabled, ...). Not a failure of the flow; the
/// orchestrator proceeds without a token or skips the leg that needed one.
#[derive(Debug, Clone, Error)]
#[error("attribution token unavailable: {reason}")]
pub struct TokenUnavailable {
    pub reason: String,
}

impl TokenUnavailable {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

/// Ad-platform token lookup. Invoked at most once per register/resolve
/// attempt; retry timing is the orchestrator's job, never this layer's.
#[async_trait]
pub trait AttributionProviderPort: Send + Sync {
    async fn fetch_token(&self) -> Result<AttributionToken, TokenUnavailable>;
}
