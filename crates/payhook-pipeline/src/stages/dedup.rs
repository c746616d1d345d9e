//! S4 - deduplication
//!
//! Storage errors here are soft: a false-negative duplicate check is
//! recoverable (the state engine's row lock absorbs it), a lost fate is
//! not.

use crate::context::WebhookContext;
use crate::stage::{Stage, StageOutcome};
use async_trait::async_trait;
use payhook_storage::{AuditAction, AuditEntry, Storage};
use payhook_types::{ProcessingStatus, TriggerType};
use serde_json::json;
use std::sync::Arc;
use tracing::{info, warn};

pub struct DeduplicationStage {
    storage: Arc<dyn Storage>,
}

impl DeduplicationStage {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self { storage }
    }
}

#[async_trait]
impl Stage for DeduplicationStage {
    fn name(&self) -> &'static str {
        "deduplication"
    }

    async fn run(&self, ctx: &mut WebhookContext) -> StageOutcome {
        if ctx.fate_decided() {
            // Signature failures are recorded, not deduplicated
            return StageOutcome::proceed();
        }
        let Some(key) = ctx.idempotency_key.clone() else {
            // No reliable idempotency key, no reliable dedup
            return StageOutcome::proceed();
        };
        let current_id = ctx.webhook_log.as_ref().map(|log| log.id);

        // Rows come back in arrival order. Only rows that precede this
        // claim's own row count as duplicates; two concurrent deliveries
        // each seeing the other's row must not both yield, or the event
        // would never apply.
        let prior = match self.storage.find_webhook_logs(&ctx.provider, &key).await {
            Ok(logs) => match current_id {
                Some(id) => logs
                    .iter()
                    .position(|log| log.id == id)
                    .unwrap_or(logs.len()),
                None => logs.len(),
            },
            Err(e) => {
                warn!(provider = %ctx.provider, error = %e, "dedup lookup failed; continuing");
                return StageOutcome::soft_fail(format!("dedup lookup failed: {e}"));
            }
        };
        if prior == 0 {
            return StageOutcome::proceed();
        }

        info!(provider = %ctx.provider, event_id = %key, "duplicate webhook");
        ctx.set_fate(ProcessingStatus::Duplicate, None);

        if let Some(id) = current_id {
            match self
                .storage
                .update_webhook_log_status(id, ProcessingStatus::Duplicate, None)
                .await
            {
                Ok(()) => {
                    if let Some(log) = ctx.webhook_log.as_mut() {
                        log.processing_status = ProcessingStatus::Duplicate;
                    }
                }
                Err(e) => warn!(error = %e, "failed to mark webhook log duplicate"),
            }
        }

        if let Some(tx) = &ctx.transaction {
            let entry = AuditEntry {
                transaction_id: tx.id,
                action: AuditAction::WebhookReceived,
                state_before: Some(tx.status),
                state_after: tx.status,
                trigger: TriggerType::Webhook,
                webhook_log_id: current_id,
                verification_method: None,
                actor: "system".to_string(),
                reason: Some("duplicate delivery".to_string()),
                metadata: json!({ "provider_event_id": key }),
            };
            if let Err(e) = self.storage.create_audit_log(entry).await {
                warn!(error = %e, "failed to record duplicate audit row");
            }
        }

        StageOutcome::stop()
    }
}
