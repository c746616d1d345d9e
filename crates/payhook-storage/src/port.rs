//! The storage port consumed by the pipeline, dispatcher, and host API
//!
//! Atomicity contracts:
//!
//! - `update_transaction_status` and `mark_as_processing` take a
//!   pessimistic write lock on the transaction row, re-read the current
//!   status, re-validate the transition under that lock, and commit the
//!   status write, the audit row, and any [`TransitionEffects`] in one
//!   unit of work. A concurrent duplicate that raced past deduplication
//!   surfaces here as `StorageError::TransitionRejected`.
//! - Everything else is a single statement (or a read).

use crate::models::*;
use crate::StorageResult;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use payhook_types::{
    OutboxEventId, OutboxStatus, ProcessingStatus, TransactionId, TransactionStatus,
    WebhookLogId,
};
use payhook_state::TransitionContext;

#[async_trait]
pub trait Storage: Send + Sync {
    // ------------------------------------------------------------------
    // Transactions
    // ------------------------------------------------------------------

    /// Create a transaction; fails with `DuplicateApplicationRef` when the
    /// merchant reference already exists
    async fn create_transaction(&self, dto: NewTransaction) -> StorageResult<TransactionRecord>;

    /// Indexed lookup; returns at most one record
    async fn find_transaction(
        &self,
        query: &TransactionQuery,
    ) -> StorageResult<Option<TransactionRecord>>;

    /// Atomically transition a transaction and record the audit entry.
    ///
    /// The `audit.state_before` field is overwritten with the status
    /// re-read under the lock so audit rows never lie about the edge that
    /// was actually taken.
    async fn update_transaction_status(
        &self,
        id: TransactionId,
        target: TransactionStatus,
        ctx: TransitionContext,
        audit: AuditEntry,
        effects: TransitionEffects,
    ) -> StorageResult<TransactionRecord>;

    /// Atomically move a transaction into `Processing`, attaching the
    /// provider ref; fails with `ProviderRefConflict` when a different
    /// ref is already set
    async fn mark_as_processing(
        &self,
        id: TransactionId,
        update: ProcessingUpdate,
        audit: AuditEntry,
    ) -> StorageResult<TransactionRecord>;

    /// Attach a provider ref; idempotent no-op when the same ref is
    /// already present
    async fn link_provider_ref(&self, id: TransactionId, provider_ref: &str)
        -> StorageResult<()>;

    /// Shallow-merge a JSON object into the transaction's metadata under
    /// the row lock (annotations like pending refunds; never a status
    /// change)
    async fn merge_transaction_metadata(
        &self,
        id: TransactionId,
        patch: serde_json::Value,
    ) -> StorageResult<()>;

    // ------------------------------------------------------------------
    // Webhook logs
    // ------------------------------------------------------------------

    /// Append a webhook log row
    async fn create_webhook_log(&self, dto: NewWebhookLog) -> StorageResult<WebhookLogRecord>;

    /// Refine the fate (and optionally the error message) of a webhook log
    async fn update_webhook_log_status(
        &self,
        id: WebhookLogId,
        status: ProcessingStatus,
        error_message: Option<String>,
    ) -> StorageResult<()>;

    /// Record how long processing took
    async fn set_webhook_log_duration(
        &self,
        id: WebhookLogId,
        duration_ms: i64,
    ) -> StorageResult<()>;

    /// Link a webhook log to a transaction; idempotent
    async fn link_webhook_to_transaction(
        &self,
        webhook_id: WebhookLogId,
        transaction_id: TransactionId,
    ) -> StorageResult<()>;

    /// All rows for `(provider, provider_event_id)`; the duplicate check
    async fn find_webhook_logs(
        &self,
        provider: &str,
        provider_event_id: &str,
    ) -> StorageResult<Vec<WebhookLogRecord>>;

    /// Fetch one webhook log by id
    async fn find_webhook_log(&self, id: WebhookLogId)
        -> StorageResult<Option<WebhookLogRecord>>;

    // ------------------------------------------------------------------
    // Audit, dispatch, outbox
    // ------------------------------------------------------------------

    /// Append an audit row outside a status transition (webhook received,
    /// transition rejected)
    async fn create_audit_log(&self, entry: AuditEntry) -> StorageResult<AuditLogRecord>;

    /// Audit rows for a transaction, oldest first
    async fn list_audit_logs(
        &self,
        transaction_id: TransactionId,
    ) -> StorageResult<Vec<AuditLogRecord>>;

    /// Append a dispatch record
    async fn create_dispatch_log(&self, dto: NewDispatchLog)
        -> StorageResult<DispatchLogRecord>;

    /// Append an outbox event
    async fn create_outbox_event(&self, dto: NewOutboxEvent)
        -> StorageResult<OutboxEventRecord>;

    /// PENDING or FAILED outbox events whose `scheduled_for` has passed,
    /// oldest first
    async fn due_outbox_events(&self, limit: i64) -> StorageResult<Vec<OutboxEventRecord>>;

    /// Mark an outbox event delivered
    async fn mark_outbox_processed(&self, id: OutboxEventId) -> StorageResult<()>;

    /// Advance an outbox event's retry schedule with exponential backoff:
    /// `scheduled_for := now + 2^retry_count * base`. Returns the
    /// resulting status (`Failed`, or `DeadLetter` once retries are
    /// exhausted).
    async fn reschedule_outbox_event(
        &self,
        id: OutboxEventId,
        error: &str,
        backoff_base: Duration,
    ) -> StorageResult<OutboxStatus>;

    // ------------------------------------------------------------------
    // Retention
    // ------------------------------------------------------------------

    /// Delete webhook logs received before the cutoff; returns the count
    async fn purge_webhook_logs_before(&self, cutoff: DateTime<Utc>) -> StorageResult<u64>;

    /// Delete dispatch logs attempted before the cutoff; returns the count
    async fn purge_dispatch_logs_before(&self, cutoff: DateTime<Utc>) -> StorageResult<u64>;
}
