//! In-memory storage backend
//!
//! Backs the integration test suite and local development. A single async
//! mutex over all stores plays the role of the database's unit of work:
//! every port operation runs under it, so the compound operations commit
//! atomically and transitions on one transaction are linearized exactly as
//! the PostgreSQL backend linearizes them with row locks.

use crate::models::*;
use crate::port::Storage;
use crate::{StorageError, StorageResult};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use payhook_state::{validate_transition, TransitionContext, TransitionOutcome};
use payhook_types::{
    AuditLogId, DispatchLogId, OutboxEventId, OutboxStatus, ProcessingStatus, TransactionId,
    TransactionStatus, WebhookLogId,
};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

#[derive(Default)]
struct Stores {
    transactions: HashMap<TransactionId, TransactionRecord>,
    /// Unique index on application_ref
    application_refs: HashMap<String, TransactionId>,
    /// Unique index on (provider, provider_ref)
    provider_refs: HashMap<(String, String), TransactionId>,
    webhook_logs: HashMap<WebhookLogId, WebhookLogRecord>,
    /// Index on (provider, provider_event_id), insertion-ordered values
    webhook_event_index: HashMap<(String, String), Vec<WebhookLogId>>,
    audit_logs: Vec<AuditLogRecord>,
    dispatch_logs: Vec<DispatchLogRecord>,
    outbox: HashMap<OutboxEventId, OutboxEventRecord>,
}

/// In-memory implementation of the storage port
#[derive(Clone, Default)]
pub struct InMemoryStorage {
    inner: Arc<Mutex<Stores>>,
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every audit row ever written, oldest first (test observability)
    pub async fn all_audit_logs(&self) -> Vec<AuditLogRecord> {
        self.inner.lock().await.audit_logs.clone()
    }

    /// Every dispatch row ever written, oldest first (test observability)
    pub async fn all_dispatch_logs(&self) -> Vec<DispatchLogRecord> {
        self.inner.lock().await.dispatch_logs.clone()
    }

    /// Every outbox row, unordered (test observability)
    pub async fn all_outbox_events(&self) -> Vec<OutboxEventRecord> {
        self.inner.lock().await.outbox.values().cloned().collect()
    }
}

fn insert_outbox(stores: &mut Stores, dto: NewOutboxEvent) -> OutboxEventRecord {
    let now = Utc::now();
    let record = OutboxEventRecord {
        id: OutboxEventId::new(),
        aggregate_id: dto.aggregate_id,
        aggregate_type: dto.aggregate_type,
        event_type: dto.event_type,
        payload: dto.payload,
        status: OutboxStatus::Pending,
        retry_count: 0,
        max_retries: dto.max_retries,
        scheduled_for: dto.scheduled_for,
        processed_at: None,
        error: None,
        created_at: now,
        updated_at: now,
    };
    stores.outbox.insert(record.id, record.clone());
    record
}

fn insert_audit(stores: &mut Stores, entry: AuditEntry) -> AuditLogRecord {
    let record = AuditLogRecord {
        id: AuditLogId::new(),
        transaction_id: entry.transaction_id,
        action: entry.action,
        state_before: entry.state_before,
        state_after: entry.state_after,
        trigger: entry.trigger,
        webhook_log_id: entry.webhook_log_id,
        verification_method: entry.verification_method,
        actor: entry.actor,
        reason: entry.reason,
        metadata: entry.metadata,
        created_at: Utc::now(),
    };
    stores.audit_logs.push(record.clone());
    record
}

/// Link a webhook row to a transaction; transaction_id is set at most once
fn link_webhook(stores: &mut Stores, webhook_id: WebhookLogId, tx_id: TransactionId) {
    if let Some(log) = stores.webhook_logs.get_mut(&webhook_id) {
        if log.transaction_id.is_none() {
            log.transaction_id = Some(tx_id);
        }
    }
}

#[async_trait]
impl Storage for InMemoryStorage {
    async fn create_transaction(&self, dto: NewTransaction) -> StorageResult<TransactionRecord> {
        let mut stores = self.inner.lock().await;
        if stores.application_refs.contains_key(&dto.application_ref) {
            return Err(StorageError::DuplicateApplicationRef {
                application_ref: dto.application_ref,
            });
        }

        let now = Utc::now();
        let record = TransactionRecord {
            id: TransactionId::new(),
            application_ref: dto.application_ref.clone(),
            provider: dto.provider.clone(),
            provider_ref: dto.provider_ref.clone(),
            status: dto.status,
            money: dto.money,
            verification_method: dto.verification_method,
            metadata: dto.metadata,
            provider_created_at: dto.provider_created_at,
            created_at: now,
            updated_at: now,
            version: 1,
        };

        stores
            .application_refs
            .insert(record.application_ref.clone(), record.id);
        if let Some(ref provider_ref) = record.provider_ref {
            stores
                .provider_refs
                .insert((record.provider.clone(), provider_ref.clone()), record.id);
        }
        stores.transactions.insert(record.id, record.clone());
        Ok(record)
    }

    async fn find_transaction(
        &self,
        query: &TransactionQuery,
    ) -> StorageResult<Option<TransactionRecord>> {
        let stores = self.inner.lock().await;
        let id = match query {
            TransactionQuery::ById(id) => Some(*id),
            TransactionQuery::ByApplicationRef(app_ref) => {
                stores.application_refs.get(app_ref).copied()
            }
            TransactionQuery::ByProviderRef {
                provider,
                provider_ref,
            } => stores
                .provider_refs
                .get(&(provider.clone(), provider_ref.clone()))
                .copied(),
        };
        Ok(id.and_then(|id| stores.transactions.get(&id).cloned()))
    }

    async fn update_transaction_status(
        &self,
        id: TransactionId,
        target: TransactionStatus,
        ctx: TransitionContext,
        mut audit: AuditEntry,
        effects: TransitionEffects,
    ) -> StorageResult<TransactionRecord> {
        let mut stores = self.inner.lock().await;

        // Re-read under the store lock; the snapshot the caller saw may
        // be stale by now
        let current = stores
            .transactions
            .get(&id)
            .ok_or(StorageError::TransactionNotFound { id })?
            .status;

        if let TransitionOutcome::Rejected { reason } = validate_transition(current, target, ctx)
        {
            return Err(StorageError::TransitionRejected {
                from: current,
                to: target,
                reason,
            });
        }

        if let Some(incoming) = &effects.link_provider_ref {
            let tx = stores.transactions.get(&id).expect("checked above");
            match &tx.provider_ref {
                Some(existing) if existing != incoming => {
                    return Err(StorageError::ProviderRefConflict {
                        id,
                        existing: existing.clone(),
                        incoming: incoming.clone(),
                    });
                }
                _ => {}
            }
        }

        // Point of no return: everything below commits together
        let (provider, new_ref) = {
            let tx = stores.transactions.get_mut(&id).expect("checked above");
            tx.status = target;
            tx.updated_at = Utc::now();
            tx.version += 1;
            let mut newly_linked = None;
            if let Some(incoming) = effects.link_provider_ref {
                if tx.provider_ref.is_none() {
                    tx.provider_ref = Some(incoming.clone());
                    newly_linked = Some(incoming);
                }
            }
            if let Some(vm) = effects.verification_method {
                if tx.verification_method.can_upgrade_to(vm) {
                    tx.verification_method = vm;
                }
            }
            (tx.provider.clone(), newly_linked)
        };
        if let Some(provider_ref) = new_ref {
            stores.provider_refs.insert((provider, provider_ref), id);
        }

        audit.state_before = Some(current);
        audit.state_after = target;
        insert_audit(&mut stores, audit);

        if let Some(webhook_id) = effects.link_webhook_log {
            link_webhook(&mut stores, webhook_id, id);
        }
        if let Some(outbox) = effects.outbox {
            insert_outbox(&mut stores, outbox);
        }

        Ok(stores.transactions.get(&id).expect("checked above").clone())
    }

    async fn mark_as_processing(
        &self,
        id: TransactionId,
        update: ProcessingUpdate,
        mut audit: AuditEntry,
    ) -> StorageResult<TransactionRecord> {
        let mut stores = self.inner.lock().await;
        let current = stores
            .transactions
            .get(&id)
            .ok_or(StorageError::TransactionNotFound { id })?
            .status;

        let ctx = TransitionContext {
            trigger: audit.trigger,
            force: false,
        };
        if let TransitionOutcome::Rejected { reason } =
            validate_transition(current, TransactionStatus::Processing, ctx)
        {
            return Err(StorageError::TransitionRejected {
                from: current,
                to: TransactionStatus::Processing,
                reason,
            });
        }

        {
            let tx = stores.transactions.get(&id).expect("checked above");
            if let Some(existing) = &tx.provider_ref {
                if existing != &update.provider_ref {
                    return Err(StorageError::ProviderRefConflict {
                        id,
                        existing: existing.clone(),
                        incoming: update.provider_ref,
                    });
                }
            }
        }

        let provider = {
            let tx = stores.transactions.get_mut(&id).expect("checked above");
            tx.status = TransactionStatus::Processing;
            tx.provider_ref = Some(update.provider_ref.clone());
            if let Some(vm) = update.verification_method {
                if tx.verification_method.can_upgrade_to(vm) {
                    tx.verification_method = vm;
                }
            }
            tx.updated_at = Utc::now();
            tx.version += 1;
            tx.provider.clone()
        };
        stores
            .provider_refs
            .insert((provider, update.provider_ref), id);

        audit.state_before = Some(current);
        audit.state_after = TransactionStatus::Processing;
        insert_audit(&mut stores, audit);

        Ok(stores.transactions.get(&id).expect("checked above").clone())
    }

    async fn link_provider_ref(
        &self,
        id: TransactionId,
        provider_ref: &str,
    ) -> StorageResult<()> {
        let mut stores = self.inner.lock().await;
        let tx = stores
            .transactions
            .get(&id)
            .ok_or(StorageError::TransactionNotFound { id })?;

        match &tx.provider_ref {
            Some(existing) if existing == provider_ref => Ok(()),
            Some(existing) => Err(StorageError::ProviderRefConflict {
                id,
                existing: existing.clone(),
                incoming: provider_ref.to_string(),
            }),
            None => {
                let provider = tx.provider.clone();
                let tx = stores.transactions.get_mut(&id).expect("checked above");
                tx.provider_ref = Some(provider_ref.to_string());
                tx.updated_at = Utc::now();
                stores
                    .provider_refs
                    .insert((provider, provider_ref.to_string()), id);
                Ok(())
            }
        }
    }

    async fn merge_transaction_metadata(
        &self,
        id: TransactionId,
        patch: serde_json::Value,
    ) -> StorageResult<()> {
        let mut stores = self.inner.lock().await;
        let tx = stores
            .transactions
            .get_mut(&id)
            .ok_or(StorageError::TransactionNotFound { id })?;
        if let (Some(target), Some(source)) = (tx.metadata.as_object_mut(), patch.as_object()) {
            for (key, value) in source {
                target.insert(key.clone(), value.clone());
            }
        } else if patch.is_object() {
            tx.metadata = patch;
        }
        tx.updated_at = Utc::now();
        Ok(())
    }

    async fn create_webhook_log(&self, dto: NewWebhookLog) -> StorageResult<WebhookLogRecord> {
        let mut stores = self.inner.lock().await;
        let record = WebhookLogRecord {
            id: WebhookLogId::new(),
            provider: dto.provider.clone(),
            provider_event_id: dto.provider_event_id.clone(),
            event_type: dto.event_type,
            raw_payload: dto.raw_payload,
            headers: dto.headers,
            signature_valid: dto.signature_valid,
            processing_status: dto.processing_status,
            processing_duration_ms: None,
            received_at: dto.received_at,
            transaction_id: dto.transaction_id,
            normalized_event: dto.normalized_event,
            error_message: dto.error_message,
        };
        if let Some(event_id) = &record.provider_event_id {
            stores
                .webhook_event_index
                .entry((record.provider.clone(), event_id.clone()))
                .or_default()
                .push(record.id);
        }
        stores.webhook_logs.insert(record.id, record.clone());
        Ok(record)
    }

    async fn update_webhook_log_status(
        &self,
        id: WebhookLogId,
        status: ProcessingStatus,
        error_message: Option<String>,
    ) -> StorageResult<()> {
        let mut stores = self.inner.lock().await;
        let log = stores
            .webhook_logs
            .get_mut(&id)
            .ok_or(StorageError::WebhookLogNotFound { id })?;
        log.processing_status = status;
        if error_message.is_some() {
            log.error_message = error_message;
        }
        Ok(())
    }

    async fn set_webhook_log_duration(
        &self,
        id: WebhookLogId,
        duration_ms: i64,
    ) -> StorageResult<()> {
        let mut stores = self.inner.lock().await;
        let log = stores
            .webhook_logs
            .get_mut(&id)
            .ok_or(StorageError::WebhookLogNotFound { id })?;
        log.processing_duration_ms = Some(duration_ms);
        Ok(())
    }

    async fn link_webhook_to_transaction(
        &self,
        webhook_id: WebhookLogId,
        transaction_id: TransactionId,
    ) -> StorageResult<()> {
        let mut stores = self.inner.lock().await;
        if !stores.webhook_logs.contains_key(&webhook_id) {
            return Err(StorageError::WebhookLogNotFound { id: webhook_id });
        }
        link_webhook(&mut stores, webhook_id, transaction_id);
        Ok(())
    }

    async fn find_webhook_logs(
        &self,
        provider: &str,
        provider_event_id: &str,
    ) -> StorageResult<Vec<WebhookLogRecord>> {
        let stores = self.inner.lock().await;
        let ids = stores
            .webhook_event_index
            .get(&(provider.to_string(), provider_event_id.to_string()));
        Ok(ids
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| stores.webhook_logs.get(id).cloned())
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn find_webhook_log(
        &self,
        id: WebhookLogId,
    ) -> StorageResult<Option<WebhookLogRecord>> {
        let stores = self.inner.lock().await;
        Ok(stores.webhook_logs.get(&id).cloned())
    }

    async fn create_audit_log(&self, entry: AuditEntry) -> StorageResult<AuditLogRecord> {
        let mut stores = self.inner.lock().await;
        Ok(insert_audit(&mut stores, entry))
    }

    async fn list_audit_logs(
        &self,
        transaction_id: TransactionId,
    ) -> StorageResult<Vec<AuditLogRecord>> {
        let stores = self.inner.lock().await;
        Ok(stores
            .audit_logs
            .iter()
            .filter(|a| a.transaction_id == transaction_id)
            .cloned()
            .collect())
    }

    async fn create_dispatch_log(
        &self,
        dto: NewDispatchLog,
    ) -> StorageResult<DispatchLogRecord> {
        let mut stores = self.inner.lock().await;
        let record = DispatchLogRecord {
            id: DispatchLogId::new(),
            transaction_id: dto.transaction_id,
            webhook_log_id: dto.webhook_log_id,
            event_type: dto.event_type,
            handler_name: dto.handler_name,
            status: dto.status,
            attempted_at: dto.attempted_at,
            completed_at: dto.completed_at,
            duration_ms: dto.duration_ms,
            error: dto.error,
            retry_count: dto.retry_count,
            is_replay: dto.is_replay,
        };
        stores.dispatch_logs.push(record.clone());
        Ok(record)
    }

    async fn create_outbox_event(
        &self,
        dto: NewOutboxEvent,
    ) -> StorageResult<OutboxEventRecord> {
        let mut stores = self.inner.lock().await;
        Ok(insert_outbox(&mut stores, dto))
    }

    async fn due_outbox_events(&self, limit: i64) -> StorageResult<Vec<OutboxEventRecord>> {
        let stores = self.inner.lock().await;
        let now = Utc::now();
        let mut due: Vec<_> = stores
            .outbox
            .values()
            .filter(|e| {
                matches!(e.status, OutboxStatus::Pending | OutboxStatus::Failed)
                    && e.scheduled_for <= now
            })
            .cloned()
            .collect();
        due.sort_by_key(|e| e.scheduled_for);
        due.truncate(limit.max(0) as usize);
        Ok(due)
    }

    async fn mark_outbox_processed(&self, id: OutboxEventId) -> StorageResult<()> {
        let mut stores = self.inner.lock().await;
        let event = stores
            .outbox
            .get_mut(&id)
            .ok_or(StorageError::OutboxEventNotFound { id })?;
        event.status = OutboxStatus::Processed;
        event.processed_at = Some(Utc::now());
        event.updated_at = Utc::now();
        Ok(())
    }

    async fn reschedule_outbox_event(
        &self,
        id: OutboxEventId,
        error: &str,
        backoff_base: Duration,
    ) -> StorageResult<OutboxStatus> {
        let mut stores = self.inner.lock().await;
        let event = stores
            .outbox
            .get_mut(&id)
            .ok_or(StorageError::OutboxEventNotFound { id })?;

        event.retry_count += 1;
        event.error = Some(error.to_string());
        event.updated_at = Utc::now();

        if event.retry_count >= event.max_retries {
            event.status = OutboxStatus::DeadLetter;
        } else {
            event.status = OutboxStatus::Failed;
            let backoff = backoff_base * 2i32.pow(event.retry_count.min(20) as u32);
            event.scheduled_for = Utc::now() + backoff;
        }
        Ok(event.status)
    }

    async fn purge_webhook_logs_before(&self, cutoff: DateTime<Utc>) -> StorageResult<u64> {
        let mut stores = self.inner.lock().await;
        let stale: Vec<WebhookLogId> = stores
            .webhook_logs
            .values()
            .filter(|log| log.received_at < cutoff)
            .map(|log| log.id)
            .collect();
        for id in &stale {
            if let Some(log) = stores.webhook_logs.remove(id) {
                if let Some(event_id) = log.provider_event_id {
                    if let Some(ids) = stores
                        .webhook_event_index
                        .get_mut(&(log.provider.clone(), event_id))
                    {
                        ids.retain(|i| i != id);
                    }
                }
            }
        }
        Ok(stale.len() as u64)
    }

    async fn purge_dispatch_logs_before(&self, cutoff: DateTime<Utc>) -> StorageResult<u64> {
        let mut stores = self.inner.lock().await;
        let before = stores.dispatch_logs.len();
        stores.dispatch_logs.retain(|log| log.attempted_at >= cutoff);
        Ok((before - stores.dispatch_logs.len()) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use payhook_types::{Currency, Money, TriggerType, VerificationMethod};
    use serde_json::json;

    fn new_tx(app_ref: &str) -> NewTransaction {
        NewTransaction {
            application_ref: app_ref.to_string(),
            provider: "paystack".to_string(),
            provider_ref: None,
            status: TransactionStatus::Pending,
            money: Money::new(10000, Currency::new("NGN").unwrap()),
            verification_method: VerificationMethod::WebhookOnly,
            metadata: json!({}),
            provider_created_at: None,
        }
    }

    fn audit_for(tx: &TransactionRecord, to: TransactionStatus) -> AuditEntry {
        AuditEntry {
            transaction_id: tx.id,
            action: AuditAction::StatusChanged,
            state_before: Some(tx.status),
            state_after: to,
            trigger: TriggerType::Webhook,
            webhook_log_id: None,
            verification_method: Some(VerificationMethod::WebhookOnly),
            actor: "system".to_string(),
            reason: None,
            metadata: json!({}),
        }
    }

    #[tokio::test]
    async fn test_duplicate_application_ref_rejected() {
        let storage = InMemoryStorage::new();
        storage.create_transaction(new_tx("order_1")).await.unwrap();
        let err = storage.create_transaction(new_tx("order_1")).await;
        assert!(matches!(
            err,
            Err(StorageError::DuplicateApplicationRef { .. })
        ));
    }

    #[tokio::test]
    async fn test_find_by_provider_ref_after_link() {
        let storage = InMemoryStorage::new();
        let tx = storage.create_transaction(new_tx("order_1")).await.unwrap();
        storage.link_provider_ref(tx.id, "ref_1").await.unwrap();

        let found = storage
            .find_transaction(&TransactionQuery::ByProviderRef {
                provider: "paystack".to_string(),
                provider_ref: "ref_1".to_string(),
            })
            .await
            .unwrap();
        assert_eq!(found.unwrap().id, tx.id);

        // Idempotent relink
        storage.link_provider_ref(tx.id, "ref_1").await.unwrap();
        // Conflicting relink
        assert!(matches!(
            storage.link_provider_ref(tx.id, "ref_2").await,
            Err(StorageError::ProviderRefConflict { .. })
        ));
    }

    #[tokio::test]
    async fn test_update_status_writes_audit_in_same_unit() {
        let storage = InMemoryStorage::new();
        let tx = storage.create_transaction(new_tx("order_1")).await.unwrap();

        let updated = storage
            .update_transaction_status(
                tx.id,
                TransactionStatus::Processing,
                TransitionContext::webhook(),
                audit_for(&tx, TransactionStatus::Processing),
                TransitionEffects::default(),
            )
            .await
            .unwrap();

        assert_eq!(updated.status, TransactionStatus::Processing);
        assert_eq!(updated.version, tx.version + 1);

        let audits = storage.list_audit_logs(tx.id).await.unwrap();
        assert_eq!(audits.len(), 1);
        assert_eq!(audits[0].state_before, Some(TransactionStatus::Pending));
        assert_eq!(audits[0].state_after, TransactionStatus::Processing);
    }

    #[tokio::test]
    async fn test_update_status_rejects_illegal_edge() {
        let storage = InMemoryStorage::new();
        let tx = storage.create_transaction(new_tx("order_1")).await.unwrap();

        let err = storage
            .update_transaction_status(
                tx.id,
                TransactionStatus::Refunded,
                TransitionContext::webhook(),
                audit_for(&tx, TransactionStatus::Refunded),
                TransitionEffects::default(),
            )
            .await;
        assert!(matches!(err, Err(StorageError::TransitionRejected { .. })));

        // No audit row on rejection
        assert!(storage.list_audit_logs(tx.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_transition_effects_commit_together() {
        let storage = InMemoryStorage::new();
        let tx = storage.create_transaction(new_tx("order_1")).await.unwrap();
        let wh = storage
            .create_webhook_log(NewWebhookLog {
                provider: "paystack".to_string(),
                provider_event_id: Some("evt_1".to_string()),
                event_type: Some("charge.success".to_string()),
                raw_payload: json!({}),
                headers: json!({}),
                signature_valid: true,
                processing_status: ProcessingStatus::Processed,
                received_at: Utc::now(),
                transaction_id: None,
                normalized_event: None,
                error_message: None,
            })
            .await
            .unwrap();

        let updated = storage
            .update_transaction_status(
                tx.id,
                TransactionStatus::Processing,
                TransitionContext::webhook(),
                audit_for(&tx, TransactionStatus::Processing),
                TransitionEffects {
                    link_provider_ref: Some("ref_1".to_string()),
                    link_webhook_log: Some(wh.id),
                    outbox: Some(NewOutboxEvent {
                        aggregate_id: tx.id.to_string(),
                        aggregate_type: "transaction".to_string(),
                        event_type: "PAYMENT_SUCCESSFUL".to_string(),
                        payload: json!({}),
                        max_retries: 5,
                        scheduled_for: Utc::now(),
                    }),
                    verification_method: Some(VerificationMethod::WebhookOnly),
                },
            )
            .await
            .unwrap();

        assert_eq!(updated.provider_ref.as_deref(), Some("ref_1"));
        let wh = storage.find_webhook_log(wh.id).await.unwrap().unwrap();
        assert_eq!(wh.transaction_id, Some(tx.id));
        assert_eq!(storage.all_outbox_events().await.len(), 1);
    }

    #[tokio::test]
    async fn test_verification_never_downgrades() {
        let storage = InMemoryStorage::new();
        let mut dto = new_tx("order_1");
        dto.verification_method = VerificationMethod::ApiVerified;
        let tx = storage.create_transaction(dto).await.unwrap();

        let updated = storage
            .update_transaction_status(
                tx.id,
                TransactionStatus::Processing,
                TransitionContext::webhook(),
                audit_for(&tx, TransactionStatus::Processing),
                TransitionEffects {
                    verification_method: Some(VerificationMethod::WebhookOnly),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(
            updated.verification_method,
            VerificationMethod::ApiVerified
        );
    }

    #[tokio::test]
    async fn test_mark_as_processing_sets_provider_ref() {
        let storage = InMemoryStorage::new();
        let tx = storage.create_transaction(new_tx("order_1")).await.unwrap();

        let updated = storage
            .mark_as_processing(
                tx.id,
                ProcessingUpdate {
                    provider_ref: "ref_1".to_string(),
                    verification_method: None,
                },
                AuditEntry {
                    trigger: TriggerType::ApiVerification,
                    ..audit_for(&tx, TransactionStatus::Processing)
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.status, TransactionStatus::Processing);
        assert_eq!(updated.provider_ref.as_deref(), Some("ref_1"));
    }

    #[tokio::test]
    async fn test_outbox_backoff_and_dead_letter() {
        let storage = InMemoryStorage::new();
        let event = storage
            .create_outbox_event(NewOutboxEvent {
                aggregate_id: "agg".to_string(),
                aggregate_type: "transaction".to_string(),
                event_type: "PAYMENT_SUCCESSFUL".to_string(),
                payload: json!({}),
                max_retries: 2,
                scheduled_for: Utc::now(),
            })
            .await
            .unwrap();

        let status = storage
            .reschedule_outbox_event(event.id, "boom", Duration::seconds(1))
            .await
            .unwrap();
        assert_eq!(status, OutboxStatus::Failed);

        let status = storage
            .reschedule_outbox_event(event.id, "boom again", Duration::seconds(1))
            .await
            .unwrap();
        assert_eq!(status, OutboxStatus::DeadLetter);
    }

    #[tokio::test]
    async fn test_purge_webhook_logs() {
        let storage = InMemoryStorage::new();
        storage
            .create_webhook_log(NewWebhookLog {
                provider: "paystack".to_string(),
                provider_event_id: Some("old".to_string()),
                event_type: None,
                raw_payload: json!({}),
                headers: json!({}),
                signature_valid: false,
                processing_status: ProcessingStatus::Processed,
                received_at: Utc::now() - Duration::days(90),
                transaction_id: None,
                normalized_event: None,
                error_message: None,
            })
            .await
            .unwrap();

        let purged = storage
            .purge_webhook_logs_before(Utc::now() - Duration::days(30))
            .await
            .unwrap();
        assert_eq!(purged, 1);
        assert!(storage
            .find_webhook_logs("paystack", "old")
            .await
            .unwrap()
            .is_empty());
    }
}
