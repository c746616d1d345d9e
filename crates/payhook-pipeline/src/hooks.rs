//! Lifecycle hooks
//!
//! Optional host observers. Hook failures are swallowed and logged by the
//! processor; they can never affect a claim's fate.

use async_trait::async_trait;
use payhook_types::{ProcessingId, ProcessingStatus, TransactionId, WebhookLogId};

/// Summary handed to `on_webhook_fate` after every claim
#[derive(Debug, Clone)]
pub struct FateSummary {
    pub processing_id: ProcessingId,
    pub provider: String,
    pub fate: ProcessingStatus,
    pub webhook_log_id: Option<WebhookLogId>,
    pub transaction_id: Option<TransactionId>,
    pub duration_ms: i64,
    pub error: Option<String>,
}

/// Host-provided lifecycle observers
#[async_trait]
pub trait LifecycleHooks: Send + Sync {
    /// Invoked once per claim, after the pipeline finishes (best-effort)
    async fn on_webhook_fate(
        &self,
        summary: &FateSummary,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let _ = summary;
        Ok(())
    }

    /// Invoked for fatal pipeline errors (best-effort)
    async fn on_error(
        &self,
        error: &str,
        provider: &str,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let _ = (error, provider);
        Ok(())
    }
}

/// The default: observe nothing
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopHooks;

#[async_trait]
impl LifecycleHooks for NoopHooks {}
