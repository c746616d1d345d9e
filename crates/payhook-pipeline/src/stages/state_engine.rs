//! S5 - the state engine
//!
//! Locates the transaction the claim refers to (optionally creating one
//! for initial payment events), maps the normalized event to a target
//! status, and applies the transition through the storage layer's locked
//! update path. The provider-ref link, the audit row, the webhook link,
//! and (when the outbox is enabled) the outbox event all commit in that
//! one unit of work.

use crate::context::WebhookContext;
use crate::stage::{Stage, StageOutcome};
use async_trait::async_trait;
use payhook_dispatch::{outbox_event_for, DispatchPayload, OutboxConfig};
use payhook_state::{map_event_to_status, validate_transition, TransitionContext, TransitionOutcome};
use payhook_storage::{
    AuditAction, AuditEntry, NewTransaction, Storage, StorageError, TransactionQuery,
    TransactionRecord,
};
use payhook_types::{
    NormalizedEvent, NormalizedEventType, ProcessingStatus, TransactionStatus, TriggerType,
    VerificationMethod, WebhookLogId,
};
use serde_json::json;
use std::sync::Arc;
use tracing::{info, warn};

pub struct StateEngineStage {
    storage: Arc<dyn Storage>,
    auto_create: bool,
    outbox: OutboxConfig,
}

impl StateEngineStage {
    pub fn new(storage: Arc<dyn Storage>, auto_create: bool, outbox: OutboxConfig) -> Self {
        Self {
            storage,
            auto_create,
            outbox,
        }
    }

    async fn locate(&self, ctx: &WebhookContext, event: &NormalizedEvent) -> Option<TransactionRecord> {
        if let Some(tx) = &ctx.transaction {
            return Some(tx.clone());
        }
        match self
            .storage
            .find_transaction(&TransactionQuery::ByProviderRef {
                provider: ctx.provider.clone(),
                provider_ref: event.provider_ref.clone(),
            })
            .await
        {
            Ok(Some(tx)) => return Some(tx),
            Ok(None) => {}
            Err(e) => warn!(error = %e, "provider ref lookup failed"),
        }
        if let Some(application_ref) = &event.application_ref {
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

    /// Create a PENDING transaction for an initial payment event whose
    /// references matched nothing
    async fn create_pending_transaction(
        &self,
        ctx: &WebhookContext,
        event: &NormalizedEvent,
        webhook_log_id: Option<WebhookLogId>,
    ) -> Option<TransactionRecord> {
        let application_ref = event
            .application_ref
            .clone()
            .unwrap_or_else(|| format!("auto_{}_{}", ctx.provider, event.provider_ref));

        let dto = NewTransaction {
            application_ref,
            provider: ctx.provider.clone(),
            provider_ref: Some(event.provider_ref.clone()),
            status: TransactionStatus::Pending,
            money: event.money,
            verification_method: VerificationMethod::WebhookOnly,
            metadata: json!({ "auto_created": true }),
            provider_created_at: event.provider_timestamp,
        };

        let tx = match self.storage.create_transaction(dto).await {
            Ok(tx) => tx,
            Err(StorageError::DuplicateApplicationRef { .. }) => {
                // Lost a race with a concurrent creation; use theirs
                return self.locate(ctx, event).await;
            }
            Err(e) => {
                warn!(error = %e, "auto-create failed");
                return None;
            }
        };
        info!(transaction_id = %tx.id, provider_ref = %event.provider_ref, "transaction auto-created");

        let entry = AuditEntry {
            transaction_id: tx.id,
            action: AuditAction::TransactionCreated,
            state_before: None,
            state_after: TransactionStatus::Pending,
            trigger: TriggerType::Webhook,
            webhook_log_id,
            verification_method: Some(VerificationMethod::WebhookOnly),
            actor: "system".to_string(),
            reason: Some("auto-created from initial payment event".to_string()),
            metadata: json!({ "event_type": event.event_type }),
        };
        if let Err(e) = self.storage.create_audit_log(entry).await {
            warn!(error = %e, "failed to record creation audit row");
        }
        Some(tx)
    }

    async fn record_rejection(
        &self,
        ctx: &mut WebhookContext,
        tx: &TransactionRecord,
        current: TransactionStatus,
        target: TransactionStatus,
        reason: &str,
    ) {
        ctx.set_fate(ProcessingStatus::TransitionRejected, Some(reason.to_string()));

        let webhook_log_id = ctx.webhook_log.as_ref().map(|log| log.id);
        let entry = AuditEntry {
            transaction_id: tx.id,
            action: AuditAction::TransitionRejected,
            // A rejection changes nothing: before == after == current
            state_before: Some(current),
            state_after: current,
            trigger: TriggerType::Webhook,
            webhook_log_id,
            verification_method: None,
            actor: "system".to_string(),
            reason: Some(reason.to_string()),
            metadata: json!({
                "rejected_target": target,
                "rejection_reason": reason,
            }),
        };
        if let Err(e) = self.storage.create_audit_log(entry).await {
            warn!(error = %e, "failed to record rejection audit row");
        }
        self.persist_fate(ctx).await;
    }

    async fn persist_fate(&self, ctx: &mut WebhookContext) {
        if let Some(id) = ctx.webhook_log.as_ref().map(|log| log.id) {
            let fate = ctx.fate();
            match self
                .storage
                .update_webhook_log_status(id, fate, ctx.error_message.clone())
                .await
            {
                Ok(()) => {
                    if let Some(log) = ctx.webhook_log.as_mut() {
                        log.processing_status = fate;
                    }
                }
                Err(e) => warn!(error = %e, "failed to persist fate"),
            }
        }
    }
}

#[async_trait]
impl Stage for StateEngineStage {
    fn name(&self) -> &'static str {
        "state-engine"
    }

    async fn run(&self, ctx: &mut WebhookContext) -> StageOutcome {
        if ctx.fate_decided() {
            return StageOutcome::stop();
        }
        let Some(event) = ctx.normalized.clone() else {
            return StageOutcome::stop();
        };
        if !ctx.signature_valid {
            // Unreachable through the normal stage order; kept as the
            // invariant that unsigned claims never transition state
            return StageOutcome::stop();
        }
        let webhook_log_id = ctx.webhook_log.as_ref().map(|log| log.id);

        let mut transaction = self.locate(ctx, &event).await;
        if transaction.is_none()
            && self.auto_create
            && event.event_type.is_initial_payment_event()
        {
            transaction = self.create_pending_transaction(ctx, &event, webhook_log_id).await;
            if let (Some(tx), Some(log_id)) = (&transaction, webhook_log_id) {
                if let Err(e) = self.storage.link_webhook_to_transaction(log_id, tx.id).await {
                    warn!(error = %e, "failed to link webhook to auto-created transaction");
                }
            }
        }
        let Some(tx) = transaction else {
            ctx.set_fate(ProcessingStatus::Unmatched, None);
            self.persist_fate(ctx).await;
            return StageOutcome::stop();
        };
        ctx.transaction = Some(tx.clone());

        let Some(target) = map_event_to_status(event.event_type, event.dispute_outcome) else {
            if event.event_type == NormalizedEventType::RefundPending {
                let patch = json!({
                    "refund_pending": {
                        "provider_event_id": event.provider_event_id,
                        "amount": event.money.amount,
                        "observed_at": ctx.received_at,
                    }
                });
                if let Err(e) = self.storage.merge_transaction_metadata(tx.id, patch).await {
                    warn!(error = %e, "failed to annotate pending refund");
                }
            }
            return StageOutcome::stop();
        };

        if target == tx.status {
            // Already there; a raced duplicate or a provider re-send
            info!(transaction_id = %tx.id, status = %target, "target equals current status; no transition");
            return StageOutcome::stop();
        }

        let transition_ctx = TransitionContext::webhook();
        if let TransitionOutcome::Rejected { reason } =
            validate_transition(tx.status, target, transition_ctx)
        {
            self.record_rejection(ctx, &tx, tx.status, target, &reason).await;
            return StageOutcome::stop();
        }

        let audit = AuditEntry::webhook_transition(
            tx.id,
            tx.status,
            target,
            webhook_log_id.unwrap_or_else(WebhookLogId::new),
            event.event_type.as_str(),
        );

        let outbox = if self.outbox.enabled {
            // Expected post-commit snapshot; the worker re-reads nothing
            let mut snapshot = tx.clone();
            snapshot.status = target;
            let payload = DispatchPayload {
                event_type: event.event_type,
                transaction: Some(snapshot),
                webhook_log_id,
                normalized: Some(event.clone()),
                metadata: json!({ "processing_id": ctx.processing_id }),
            };
            match outbox_event_for(&payload, &self.outbox) {
                Ok(outbox_event) => Some(outbox_event),
                Err(e) => {
                    warn!(error = %e, "failed to encode outbox payload");
                    None
                }
            }
        } else {
            None
        };
        let outbox_written = outbox.is_some();

        let effects = payhook_storage::TransitionEffects {
            link_provider_ref: tx
                .provider_ref
                .is_none()
                .then(|| event.provider_ref.clone()),
            link_webhook_log: webhook_log_id,
            outbox,
            verification_method: Some(VerificationMethod::WebhookOnly),
        };

        match self
            .storage
            .update_transaction_status(tx.id, target, transition_ctx, audit, effects)
            .await
        {
            Ok(updated) => {
                info!(
                    transaction_id = %updated.id,
                    from = %tx.status,
                    to = %target,
                    "transition applied"
                );
                ctx.transaction = Some(updated);
                ctx.transition_applied = true;
                ctx.outbox_written = outbox_written;
                StageOutcome::proceed()
            }
            Err(StorageError::TransitionRejected { from, to, reason }) => {
                // A concurrent delivery won the lock first
                self.record_rejection(ctx, &tx, from, to, &reason).await;
                StageOutcome::stop()
            }
            Err(e) => {
                // No transition happened; end here so nothing downstream
                // announces one. The claim keeps its fate, the error is
                // recorded on the log row.
                warn!(transaction_id = %tx.id, error = %e, "transition commit failed");
                ctx.error_message = Some(format!("transition commit failed: {e}"));
                self.persist_fate(ctx).await;
                StageOutcome::halt(format!("transition commit failed: {e}"))
            }
        }
    }
}
