//! S3 - persist the claim
//!
//! The only stage whose storage failure is fatal: without a durable
//! record there is nothing to attach a fate to. Payload and headers are
//! redacted before they are stored. If the claim's references already
//! match a transaction, the log is linked and a no-state-change audit row
//! records the arrival.

use crate::context::WebhookContext;
use crate::redact::{redact_headers, redact_payload};
use crate::stage::{Stage, StageOutcome};
use async_trait::async_trait;
use payhook_storage::{
    AuditAction, AuditEntry, NewWebhookLog, Storage, TransactionQuery, TransactionRecord,
};
use payhook_types::TriggerType;
use serde_json::json;
use std::sync::Arc;
use tracing::{error, warn};

pub struct PersistClaimStage {
    storage: Arc<dyn Storage>,
    redact_keys: Vec<String>,
}

impl PersistClaimStage {
    pub fn new(storage: Arc<dyn Storage>, redact_keys: Vec<String>) -> Self {
        Self {
            storage,
            redact_keys,
        }
    }

    /// Match the claim to an existing transaction: provider ref first,
    /// merchant ref second
    async fn find_linked(&self, ctx: &WebhookContext) -> Option<TransactionRecord> {
        if let Some(provider_ref) = &ctx.references.provider_ref {
            match self
                .storage
                .find_transaction(&TransactionQuery::ByProviderRef {
                    provider: ctx.provider.clone(),
                    provider_ref: provider_ref.clone(),
                })
                .await
            {
                Ok(Some(tx)) => return Some(tx),
                Ok(None) => {}
                Err(e) => warn!(error = %e, "provider ref lookup failed"),
            }
        }
        if let Some(application_ref) = &ctx.references.application_ref {
            match self
                .storage
                .find_transaction(&TransactionQuery::ByApplicationRef(application_ref.clone()))
                .await
            {
                Ok(Some(tx)) => return Some(tx),
                Ok(None) => {}
                Err(e) => warn!(error = %e, "application ref lookup failed"),
            }
        }
        None
    }
}

#[async_trait]
impl Stage for PersistClaimStage {
    fn name(&self) -> &'static str {
        "persist-claim"
    }

    async fn run(&self, ctx: &mut WebhookContext) -> StageOutcome {
        let raw_payload = ctx
            .payload
            .as_ref()
            .map(|p| redact_payload(p, &self.redact_keys))
            .unwrap_or_else(|| json!({ "unparsed": true }));
        let headers = redact_headers(&ctx.headers);

        // Claims whose fate is already decided (failed signature) carry
        // untrusted content; record them unlinked
        let linked = if ctx.fate_decided() {
            None
        } else {
            self.find_linked(ctx).await
        };

        let dto = NewWebhookLog {
            provider: ctx.provider.clone(),
            provider_event_id: ctx.idempotency_key.clone(),
            event_type: ctx.raw_event_type.clone(),
            raw_payload,
            headers,
            signature_valid: ctx.signature_valid,
            // Provisional; later stages refine it
            processing_status: ctx.fate(),
            received_at: ctx.received_at,
            transaction_id: linked.as_ref().map(|tx| tx.id),
            normalized_event: ctx.normalized.clone(),
            error_message: ctx.error_message.clone(),
        };

        let log = match self.storage.create_webhook_log(dto).await {
            Ok(log) => log,
            Err(e) => {
                error!(provider = %ctx.provider, error = %e, "persist-claim failed");
                return StageOutcome::halt(format!("persist-claim failed: {e}"));
            }
        };

        if let Some(tx) = &linked {
            let entry = AuditEntry {
                transaction_id: tx.id,
                action: AuditAction::WebhookReceived,
                state_before: Some(tx.status),
                state_after: tx.status,
                trigger: TriggerType::Webhook,
                webhook_log_id: Some(log.id),
                verification_method: None,
                actor: "system".to_string(),
                reason: None,
                metadata: json!({ "event_type": ctx.raw_event_type }),
            };
            if let Err(e) = self.storage.create_audit_log(entry).await {
                warn!(error = %e, "failed to record webhook-received audit row");
            }
        }

        ctx.webhook_log = Some(log);
        ctx.transaction = linked;
        StageOutcome::proceed()
    }
}
