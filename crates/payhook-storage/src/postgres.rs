//! PostgreSQL storage backend
//!
//! Row structs mirror the tables; domain conversions happen at the edge
//! so corrupt rows surface as `StorageError::CorruptRow` instead of
//! panics. Compound operations run inside one database transaction with
//! `SELECT ... FOR UPDATE` providing the pessimistic row lock.

use crate::config::StorageConfig;
use crate::models::*;
use crate::port::Storage;
use crate::{StorageError, StorageResult};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use payhook_state::{validate_transition, TransitionContext, TransitionOutcome};
use payhook_types::{
    AuditLogId, Currency, DispatchLogId, DispatchStatus, Money, OutboxEventId, OutboxStatus,
    ProcessingStatus, TransactionId, TransactionStatus, TriggerType, VerificationMethod,
    WebhookLogId,
};
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::FromRow;
use tracing::info;
use uuid::Uuid;

/// PostgreSQL implementation of the storage port
#[derive(Clone)]
pub struct PostgresStorage {
    pool: PgPool,
}

impl PostgresStorage {
    /// Connect a pool using the given configuration
    pub async fn connect(config: &StorageConfig) -> StorageResult<Self> {
        info!("Connecting to PostgreSQL: {}", config.database_url_masked());
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(std::time::Duration::from_secs(config.acquire_timeout_secs))
            .connect(&config.database_url)
            .await
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        info!("Connected to PostgreSQL");
        Ok(Self { pool })
    }

    /// Wrap an existing pool
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Run embedded migrations
    pub async fn migrate(&self) -> StorageResult<()> {
        info!("Running database migrations...");
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| StorageError::Migration(e.to_string()))?;
        info!("Migrations complete");
        Ok(())
    }
}

// ============================================================================
// Row types
// ============================================================================

#[derive(Debug, Clone, FromRow)]
struct DbTransaction {
    id: Uuid,
    application_ref: String,
    provider: String,
    provider_ref: Option<String>,
    status: String,
    amount: i64,
    currency: String,
    verification_method: String,
    metadata: serde_json::Value,
    provider_created_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    version: i64,
}

impl TryFrom<DbTransaction> for TransactionRecord {
    type Error = StorageError;

    fn try_from(row: DbTransaction) -> Result<Self, Self::Error> {
        let status = TransactionStatus::parse(&row.status).ok_or_else(|| corrupt("status", &row.status))?;
        let verification_method = VerificationMethod::parse(&row.verification_method)
            .ok_or_else(|| corrupt("verification_method", &row.verification_method))?;
        let currency =
            Currency::new(&row.currency).map_err(|e| corrupt("currency", &e.to_string()))?;
        let amount = u64::try_from(row.amount).map_err(|_| corrupt("amount", "negative"))?;
        Ok(TransactionRecord {
            id: TransactionId::from_uuid(row.id),
            application_ref: row.application_ref,
            provider: row.provider,
            provider_ref: row.provider_ref,
            status,
            money: Money::new(amount, currency),
            verification_method,
            metadata: row.metadata,
            provider_created_at: row.provider_created_at,
            created_at: row.created_at,
            updated_at: row.updated_at,
            version: row.version,
        })
    }
}

#[derive(Debug, Clone, FromRow)]
struct DbWebhookLog {
    id: Uuid,
    provider: String,
    provider_event_id: Option<String>,
    event_type: Option<String>,
    raw_payload: serde_json::Value,
    headers: serde_json::Value,
    signature_valid: bool,
    processing_status: String,
    processing_duration_ms: Option<i64>,
    received_at: DateTime<Utc>,
    transaction_id: Option<Uuid>,
    normalized_event: Option<serde_json::Value>,
    error_message: Option<String>,
}

impl TryFrom<DbWebhookLog> for WebhookLogRecord {
    type Error = StorageError;

    fn try_from(row: DbWebhookLog) -> Result<Self, Self::Error> {
        let processing_status = ProcessingStatus::parse(&row.processing_status)
            .ok_or_else(|| corrupt("processing_status", &row.processing_status))?;
        let normalized_event = row
            .normalized_event
            .map(serde_json::from_value)
            .transpose()
            .map_err(|e| corrupt("normalized_event", &e.to_string()))?;
        Ok(WebhookLogRecord {
            id: WebhookLogId::from_uuid(row.id),
            provider: row.provider,
            provider_event_id: row.provider_event_id,
            event_type: row.event_type,
            raw_payload: row.raw_payload,
            headers: row.headers,
            signature_valid: row.signature_valid,
            processing_status,
            processing_duration_ms: row.processing_duration_ms,
            received_at: row.received_at,
            transaction_id: row.transaction_id.map(TransactionId::from_uuid),
            normalized_event,
            error_message: row.error_message,
        })
    }
}

#[derive(Debug, Clone, FromRow)]
struct DbAuditLog {
    id: Uuid,
    transaction_id: Uuid,
    action: String,
    state_before: Option<String>,
    state_after: String,
    trigger_type: String,
    webhook_log_id: Option<Uuid>,
    verification_method: Option<String>,
    actor: String,
    reason: Option<String>,
    metadata: serde_json::Value,
    created_at: DateTime<Utc>,
}

impl TryFrom<DbAuditLog> for AuditLogRecord {
    type Error = StorageError;

    fn try_from(row: DbAuditLog) -> Result<Self, Self::Error> {
        let action = AuditAction::parse(&row.action).ok_or_else(|| corrupt("action", &row.action))?;
        let state_before = row
            .state_before
            .as_deref()
            .map(|s| TransactionStatus::parse(s).ok_or_else(|| corrupt("state_before", s)))
            .transpose()?;
        let state_after = TransactionStatus::parse(&row.state_after)
            .ok_or_else(|| corrupt("state_after", &row.state_after))?;
        let trigger = parse_trigger(&row.trigger_type)?;
        let verification_method = row
            .verification_method
            .as_deref()
            .map(|s| VerificationMethod::parse(s).ok_or_else(|| corrupt("verification_method", s)))
            .transpose()?;
        Ok(AuditLogRecord {
            id: AuditLogId::from_uuid(row.id),
            transaction_id: TransactionId::from_uuid(row.transaction_id),
            action,
            state_before,
            state_after,
            trigger,
            webhook_log_id: row.webhook_log_id.map(WebhookLogId::from_uuid),
            verification_method,
            actor: row.actor,
            reason: row.reason,
            metadata: row.metadata,
            created_at: row.created_at,
        })
    }
}

#[derive(Debug, Clone, FromRow)]
struct DbDispatchLog {
    id: Uuid,
    transaction_id: Option<Uuid>,
    webhook_log_id: Option<Uuid>,
    event_type: String,
    handler_name: String,
    status: String,
    attempted_at: DateTime<Utc>,
    completed_at: Option<DateTime<Utc>>,
    duration_ms: Option<i64>,
    error: Option<String>,
    retry_count: i32,
    is_replay: bool,
}

impl TryFrom<DbDispatchLog> for DispatchLogRecord {
    type Error = StorageError;

    fn try_from(row: DbDispatchLog) -> Result<Self, Self::Error> {
        let status =
            DispatchStatus::parse(&row.status).ok_or_else(|| corrupt("status", &row.status))?;
        Ok(DispatchLogRecord {
            id: DispatchLogId::from_uuid(row.id),
            transaction_id: row.transaction_id.map(TransactionId::from_uuid),
            webhook_log_id: row.webhook_log_id.map(WebhookLogId::from_uuid),
            event_type: row.event_type,
            handler_name: row.handler_name,
            status,
            attempted_at: row.attempted_at,
            completed_at: row.completed_at,
            duration_ms: row.duration_ms,
            error: row.error,
            retry_count: row.retry_count,
            is_replay: row.is_replay,
        })
    }
}

#[derive(Debug, Clone, FromRow)]
struct DbOutboxEvent {
    id: Uuid,
    aggregate_id: String,
    aggregate_type: String,
    event_type: String,
    payload: serde_json::Value,
    status: String,
    retry_count: i32,
    max_retries: i32,
    scheduled_for: DateTime<Utc>,
    processed_at: Option<DateTime<Utc>>,
    error: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<DbOutboxEvent> for OutboxEventRecord {
    type Error = StorageError;

    fn try_from(row: DbOutboxEvent) -> Result<Self, Self::Error> {
        let status = OutboxStatus::parse(&row.status).ok_or_else(|| corrupt("status", &row.status))?;
        Ok(OutboxEventRecord {
            id: OutboxEventId::from_uuid(row.id),
            aggregate_id: row.aggregate_id,
            aggregate_type: row.aggregate_type,
            event_type: row.event_type,
            payload: row.payload,
            status,
            retry_count: row.retry_count,
            max_retries: row.max_retries,
            scheduled_for: row.scheduled_for,
            processed_at: row.processed_at,
            error: row.error,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

fn corrupt(field: &str, value: &str) -> StorageError {
    StorageError::CorruptRow {
        message: format!("{field}: {value}"),
    }
}

fn parse_trigger(s: &str) -> StorageResult<TriggerType> {
    match s {
        "WEBHOOK" => Ok(TriggerType::Webhook),
        "API_VERIFICATION" => Ok(TriggerType::ApiVerification),
        "RECONCILIATION" => Ok(TriggerType::Reconciliation),
        "LATE_MATCH" => Ok(TriggerType::LateMatch),
        "MANUAL" => Ok(TriggerType::Manual),
        other => Err(corrupt("trigger_type", other)),
    }
}

fn amount_as_i64(money: &Money) -> StorageResult<i64> {
    i64::try_from(money.amount).map_err(|_| StorageError::CorruptRow {
        message: format!("amount {} exceeds BIGINT range", money.amount),
    })
}

/// Unique-violation detection for the application_ref constraint
fn is_unique_violation(e: &sqlx::Error) -> bool {
    matches!(
        e,
        sqlx::Error::Database(db) if db.code().as_deref() == Some("23505")
    )
}

async fn insert_audit_tx(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    entry: &AuditEntry,
) -> StorageResult<DbAuditLog> {
    let row = sqlx::query_as::<_, DbAuditLog>(
        r#"
        INSERT INTO audit_logs
            (id, transaction_id, action, state_before, state_after, trigger_type,
             webhook_log_id, verification_method, actor, reason, metadata, created_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, now())
        RETURNING *
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(entry.transaction_id.0)
    .bind(entry.action.as_str())
    .bind(entry.state_before.map(|s| s.as_str()))
    .bind(entry.state_after.as_str())
    .bind(entry.trigger.as_str())
    .bind(entry.webhook_log_id.map(|id| id.0))
    .bind(entry.verification_method.map(|v| v.as_str()))
    .bind(&entry.actor)
    .bind(&entry.reason)
    .bind(&entry.metadata)
    .fetch_one(&mut **tx)
    .await?;
    Ok(row)
}

async fn insert_outbox_tx(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    dto: &NewOutboxEvent,
) -> StorageResult<DbOutboxEvent> {
    let row = sqlx::query_as::<_, DbOutboxEvent>(
        r#"
        INSERT INTO outbox_events
            (id, aggregate_id, aggregate_type, event_type, payload, status,
             retry_count, max_retries, scheduled_for, created_at, updated_at)
        VALUES ($1, $2, $3, $4, $5, 'PENDING', 0, $6, $7, now(), now())
        RETURNING *
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(&dto.aggregate_id)
    .bind(&dto.aggregate_type)
    .bind(&dto.event_type)
    .bind(&dto.payload)
    .bind(dto.max_retries)
    .bind(dto.scheduled_for)
    .fetch_one(&mut **tx)
    .await?;
    Ok(row)
}

#[async_trait]
impl Storage for PostgresStorage {
    async fn create_transaction(&self, dto: NewTransaction) -> StorageResult<TransactionRecord> {
        let amount = amount_as_i64(&dto.money)?;
        let row = sqlx::query_as::<_, DbTransaction>(
            r#"
            INSERT INTO transactions
                (id, application_ref, provider, provider_ref, status, amount, currency,
                 verification_method, metadata, provider_created_at, created_at, updated_at, version)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, now(), now(), 1)
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(&dto.application_ref)
        .bind(&dto.provider)
        .bind(&dto.provider_ref)
        .bind(dto.status.as_str())
        .bind(amount)
        .bind(dto.money.currency.code())
        .bind(dto.verification_method.as_str())
        .bind(&dto.metadata)
        .bind(dto.provider_created_at)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                StorageError::DuplicateApplicationRef {
                    application_ref: dto.application_ref.clone(),
                }
            } else {
                e.into()
            }
        })?;
        row.try_into()
    }

    async fn find_transaction(
        &self,
        query: &TransactionQuery,
    ) -> StorageResult<Option<TransactionRecord>> {
        let row = match query {
            TransactionQuery::ById(id) => {
                sqlx::query_as::<_, DbTransaction>("SELECT * FROM transactions WHERE id = $1")
                    .bind(id.0)
                    .fetch_optional(&self.pool)
                    .await?
            }
            TransactionQuery::ByApplicationRef(app_ref) => sqlx::query_as::<_, DbTransaction>(
                "SELECT * FROM transactions WHERE application_ref = $1",
            )
            .bind(app_ref)
            .fetch_optional(&self.pool)
            .await?,
            TransactionQuery::ByProviderRef {
                provider,
                provider_ref,
            } => sqlx::query_as::<_, DbTransaction>(
                "SELECT * FROM transactions WHERE provider = $1 AND provider_ref = $2",
            )
            .bind(provider)
            .bind(provider_ref)
            .fetch_optional(&self.pool)
            .await?,
        };
        row.map(TryInto::try_into).transpose()
    }

    async fn update_transaction_status(
        &self,
        id: TransactionId,
        target: TransactionStatus,
        ctx: TransitionContext,
        mut audit: AuditEntry,
        effects: TransitionEffects,
    ) -> StorageResult<TransactionRecord> {
        let mut tx = self.pool.begin().await?;

        let locked = sqlx::query_as::<_, DbTransaction>(
            "SELECT * FROM transactions WHERE id = $1 FOR UPDATE",
        )
        .bind(id.0)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or(StorageError::TransactionNotFound { id })?;
        let locked: TransactionRecord = locked.try_into()?;
        let current = locked.status;

        if let TransitionOutcome::Rejected { reason } = validate_transition(current, target, ctx)
        {
            return Err(StorageError::TransitionRejected {
                from: current,
                to: target,
                reason,
            });
        }

        let provider_ref = match (&locked.provider_ref, &effects.link_provider_ref) {
            (Some(existing), Some(incoming)) if existing != incoming => {
                return Err(StorageError::ProviderRefConflict {
                    id,
                    existing: existing.clone(),
                    incoming: incoming.clone(),
                });
            }
            (Some(existing), _) => Some(existing.clone()),
            (None, incoming) => incoming.clone(),
        };

        let verification_method = match effects.verification_method {
            Some(vm) if locked.verification_method.can_upgrade_to(vm) => vm,
            _ => locked.verification_method,
        };

        let updated = sqlx::query_as::<_, DbTransaction>(
            r#"
            UPDATE transactions
            SET status = $2, provider_ref = $3, verification_method = $4,
                updated_at = now(), version = version + 1
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(id.0)
        .bind(target.as_str())
        .bind(&provider_ref)
        .bind(verification_method.as_str())
        .fetch_one(&mut *tx)
        .await?;

        audit.state_before = Some(current);
        audit.state_after = target;
        insert_audit_tx(&mut tx, &audit).await?;

        if let Some(webhook_id) = effects.link_webhook_log {
            sqlx::query(
                "UPDATE webhook_logs SET transaction_id = $2 WHERE id = $1 AND transaction_id IS NULL",
            )
            .bind(webhook_id.0)
            .bind(id.0)
            .execute(&mut *tx)
            .await?;
        }
        if let Some(outbox) = &effects.outbox {
            insert_outbox_tx(&mut tx, outbox).await?;
        }

        tx.commit().await?;
        updated.try_into()
    }

    async fn mark_as_processing(
        &self,
        id: TransactionId,
        update: ProcessingUpdate,
        mut audit: AuditEntry,
    ) -> StorageResult<TransactionRecord> {
        let mut tx = self.pool.begin().await?;

        let locked = sqlx::query_as::<_, DbTransaction>(
            "SELECT * FROM transactions WHERE id = $1 FOR UPDATE",
        )
        .bind(id.0)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or(StorageError::TransactionNotFound { id })?;
        let locked: TransactionRecord = locked.try_into()?;
        let current = locked.status;

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

        if let Some(existing) = &locked.provider_ref {
            if existing != &update.provider_ref {
                return Err(StorageError::ProviderRefConflict {
                    id,
                    existing: existing.clone(),
                    incoming: update.provider_ref,
                });
            }
        }

        let verification_method = match update.verification_method {
            Some(vm) if locked.verification_method.can_upgrade_to(vm) => vm,
            _ => locked.verification_method,
        };

        let updated = sqlx::query_as::<_, DbTransaction>(
            r#"
            UPDATE transactions
            SET status = $2, provider_ref = $3, verification_method = $4,
                updated_at = now(), version = version + 1
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(id.0)
        .bind(TransactionStatus::Processing.as_str())
        .bind(&update.provider_ref)
        .bind(verification_method.as_str())
        .fetch_one(&mut *tx)
        .await?;

        audit.state_before = Some(current);
        audit.state_after = TransactionStatus::Processing;
        insert_audit_tx(&mut tx, &audit).await?;

        tx.commit().await?;
        updated.try_into()
    }

    async fn link_provider_ref(
        &self,
        id: TransactionId,
        provider_ref: &str,
    ) -> StorageResult<()> {
        let mut tx = self.pool.begin().await?;
        let locked = sqlx::query_as::<_, DbTransaction>(
            "SELECT * FROM transactions WHERE id = $1 FOR UPDATE",
        )
        .bind(id.0)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or(StorageError::TransactionNotFound { id })?;

        match locked.provider_ref.as_deref() {
            Some(existing) if existing == provider_ref => {}
            Some(existing) => {
                return Err(StorageError::ProviderRefConflict {
                    id,
                    existing: existing.to_string(),
                    incoming: provider_ref.to_string(),
                });
            }
            None => {
                sqlx::query(
                    "UPDATE transactions SET provider_ref = $2, updated_at = now() WHERE id = $1",
                )
                .bind(id.0)
                .bind(provider_ref)
                .execute(&mut *tx)
                .await?;
            }
        }
        tx.commit().await?;
        Ok(())
    }

    async fn merge_transaction_metadata(
        &self,
        id: TransactionId,
        patch: serde_json::Value,
    ) -> StorageResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE transactions
            SET metadata = metadata || $2, updated_at = now()
            WHERE id = $1
            "#,
        )
        .bind(id.0)
        .bind(patch)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(StorageError::TransactionNotFound { id });
        }
        Ok(())
    }

    async fn create_webhook_log(&self, dto: NewWebhookLog) -> StorageResult<WebhookLogRecord> {
        let normalized_event = dto
            .normalized_event
            .as_ref()
            .map(serde_json::to_value)
            .transpose()?;
        let row = sqlx::query_as::<_, DbWebhookLog>(
            r#"
            INSERT INTO webhook_logs
                (id, provider, provider_event_id, event_type, raw_payload, headers,
                 signature_valid, processing_status, received_at, transaction_id,
                 normalized_event, error_message)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(&dto.provider)
        .bind(&dto.provider_event_id)
        .bind(&dto.event_type)
        .bind(&dto.raw_payload)
        .bind(&dto.headers)
        .bind(dto.signature_valid)
        .bind(dto.processing_status.as_str())
        .bind(dto.received_at)
        .bind(dto.transaction_id.map(|id| id.0))
        .bind(normalized_event)
        .bind(&dto.error_message)
        .fetch_one(&self.pool)
        .await?;
        row.try_into()
    }

    async fn update_webhook_log_status(
        &self,
        id: WebhookLogId,
        status: ProcessingStatus,
        error_message: Option<String>,
    ) -> StorageResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE webhook_logs
            SET processing_status = $2, error_message = COALESCE($3, error_message)
            WHERE id = $1
            "#,
        )
        .bind(id.0)
        .bind(status.as_str())
        .bind(error_message)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(StorageError::WebhookLogNotFound { id });
        }
        Ok(())
    }

    async fn set_webhook_log_duration(
        &self,
        id: WebhookLogId,
        duration_ms: i64,
    ) -> StorageResult<()> {
        let result =
            sqlx::query("UPDATE webhook_logs SET processing_duration_ms = $2 WHERE id = $1")
                .bind(id.0)
                .bind(duration_ms)
                .execute(&self.pool)
                .await?;
        if result.rows_affected() == 0 {
            return Err(StorageError::WebhookLogNotFound { id });
        }
        Ok(())
    }

    async fn link_webhook_to_transaction(
        &self,
        webhook_id: WebhookLogId,
        transaction_id: TransactionId,
    ) -> StorageResult<()> {
        sqlx::query(
            "UPDATE webhook_logs SET transaction_id = $2 WHERE id = $1 AND transaction_id IS NULL",
        )
        .bind(webhook_id.0)
        .bind(transaction_id.0)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn find_webhook_logs(
        &self,
        provider: &str,
        provider_event_id: &str,
    ) -> StorageResult<Vec<WebhookLogRecord>> {
        let rows = sqlx::query_as::<_, DbWebhookLog>(
            r#"
            SELECT * FROM webhook_logs
            WHERE provider = $1 AND provider_event_id = $2
            ORDER BY received_at ASC
            "#,
        )
        .bind(provider)
        .bind(provider_event_id)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn find_webhook_log(
        &self,
        id: WebhookLogId,
    ) -> StorageResult<Option<WebhookLogRecord>> {
        let row = sqlx::query_as::<_, DbWebhookLog>("SELECT * FROM webhook_logs WHERE id = $1")
            .bind(id.0)
            .fetch_optional(&self.pool)
            .await?;
        row.map(TryInto::try_into).transpose()
    }

    async fn create_audit_log(&self, entry: AuditEntry) -> StorageResult<AuditLogRecord> {
        let mut tx = self.pool.begin().await?;
        let row = insert_audit_tx(&mut tx, &entry).await?;
        tx.commit().await?;
        row.try_into()
    }

    async fn list_audit_logs(
        &self,
        transaction_id: TransactionId,
    ) -> StorageResult<Vec<AuditLogRecord>> {
        let rows = sqlx::query_as::<_, DbAuditLog>(
            "SELECT * FROM audit_logs WHERE transaction_id = $1 ORDER BY created_at ASC",
        )
        .bind(transaction_id.0)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn create_dispatch_log(
        &self,
        dto: NewDispatchLog,
    ) -> StorageResult<DispatchLogRecord> {
        let row = sqlx::query_as::<_, DbDispatchLog>(
            r#"
            INSERT INTO dispatch_logs
                (id, transaction_id, webhook_log_id, event_type, handler_name, status,
                 attempted_at, completed_at, duration_ms, error, retry_count, is_replay)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(dto.transaction_id.map(|id| id.0))
        .bind(dto.webhook_log_id.map(|id| id.0))
        .bind(&dto.event_type)
        .bind(&dto.handler_name)
        .bind(dto.status.as_str())
        .bind(dto.attempted_at)
        .bind(dto.completed_at)
        .bind(dto.duration_ms)
        .bind(&dto.error)
        .bind(dto.retry_count)
        .bind(dto.is_replay)
        .fetch_one(&self.pool)
        .await?;
        row.try_into()
    }

    async fn create_outbox_event(
        &self,
        dto: NewOutboxEvent,
    ) -> StorageResult<OutboxEventRecord> {
        let mut tx = self.pool.begin().await?;
        let row = insert_outbox_tx(&mut tx, &dto).await?;
        tx.commit().await?;
        row.try_into()
    }

    async fn due_outbox_events(&self, limit: i64) -> StorageResult<Vec<OutboxEventRecord>> {
        let rows = sqlx::query_as::<_, DbOutboxEvent>(
            r#"
            SELECT * FROM outbox_events
            WHERE status IN ('PENDING', 'FAILED') AND scheduled_for <= now()
            ORDER BY scheduled_for ASC
            LIMIT $1
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn mark_outbox_processed(&self, id: OutboxEventId) -> StorageResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE outbox_events
            SET status = 'PROCESSED', processed_at = now(), updated_at = now()
            WHERE id = $1
            "#,
        )
        .bind(id.0)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(StorageError::OutboxEventNotFound { id });
        }
        Ok(())
    }

    async fn reschedule_outbox_event(
        &self,
        id: OutboxEventId,
        error: &str,
        backoff_base: Duration,
    ) -> StorageResult<OutboxStatus> {
        let mut tx = self.pool.begin().await?;
        let locked = sqlx::query_as::<_, DbOutboxEvent>(
            "SELECT * FROM outbox_events WHERE id = $1 FOR UPDATE",
        )
        .bind(id.0)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or(StorageError::OutboxEventNotFound { id })?;

        let retry_count = locked.retry_count + 1;
        let status = if retry_count >= locked.max_retries {
            OutboxStatus::DeadLetter
        } else {
            OutboxStatus::Failed
        };
        let scheduled_for =
            Utc::now() + backoff_base * 2i32.pow(retry_count.min(20) as u32);

        sqlx::query(
            r#"
            UPDATE outbox_events
            SET status = $2, retry_count = $3, error = $4, scheduled_for = $5, updated_at = now()
            WHERE id = $1
            "#,
        )
        .bind(id.0)
        .bind(status.as_str())
        .bind(retry_count)
        .bind(error)
        .bind(scheduled_for)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(status)
    }

    async fn purge_webhook_logs_before(&self, cutoff: DateTime<Utc>) -> StorageResult<u64> {
        let result = sqlx::query("DELETE FROM webhook_logs WHERE received_at < $1")
            .bind(cutoff)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn purge_dispatch_logs_before(&self, cutoff: DateTime<Utc>) -> StorageResult<u64> {
        let result = sqlx::query("DELETE FROM dispatch_logs WHERE attempted_at < $1")
            .bind(cutoff)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    #[ignore = "requires a running PostgreSQL at DATABASE_URL"]
    async fn test_connect_and_migrate() {
        let storage = PostgresStorage::connect(&StorageConfig::from_env())
            .await
            .unwrap();
        storage.migrate().await.unwrap();

        let found = storage
            .find_transaction(&TransactionQuery::ById(TransactionId::new()))
            .await
            .unwrap();
        assert!(found.is_none());
    }
}
