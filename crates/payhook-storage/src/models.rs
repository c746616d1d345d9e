//! Persistent records and the DTOs used to create them
//!
//! Records are value types addressed by id. The pipeline holds snapshots;
//! the authoritative copy is whatever the backend re-reads under lock.

use chrono::{DateTime, Utc};
use payhook_types::{
    AuditLogId, DispatchLogId, DispatchStatus, Money, NormalizedEvent, OutboxEventId,
    OutboxStatus, ProcessingStatus, TransactionId, TransactionStatus, TriggerType,
    VerificationMethod, WebhookLogId,
};
use serde::{Deserialize, Serialize};

/// The authoritative payment fact
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionRecord {
    pub id: TransactionId,
    /// The merchant's own unique reference
    pub application_ref: String,
    pub provider: String,
    /// Immutable once set
    pub provider_ref: Option<String>,
    pub status: TransactionStatus,
    pub money: Money,
    pub verification_method: VerificationMethod,
    pub metadata: serde_json::Value,
    pub provider_created_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Bumped on every status write
    pub version: i64,
}

/// DTO for creating a transaction
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewTransaction {
    pub application_ref: String,
    pub provider: String,
    pub provider_ref: Option<String>,
    pub status: TransactionStatus,
    pub money: Money,
    pub verification_method: VerificationMethod,
    pub metadata: serde_json::Value,
    pub provider_created_at: Option<DateTime<Utc>>,
}

/// Indexed transaction lookups
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransactionQuery {
    ById(TransactionId),
    ByApplicationRef(String),
    ByProviderRef { provider: String, provider_ref: String },
}

/// Append-only record of one inbound webhook claim
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebhookLogRecord {
    pub id: WebhookLogId,
    pub provider: String,
    /// The idempotency key; absent when the provider supplied none and
    /// synthesis was disabled
    pub provider_event_id: Option<String>,
    /// Raw provider event name
    pub event_type: Option<String>,
    /// Post-redaction payload
    pub raw_payload: serde_json::Value,
    /// Post-redaction headers
    pub headers: serde_json::Value,
    pub signature_valid: bool,
    pub processing_status: ProcessingStatus,
    pub processing_duration_ms: Option<i64>,
    pub received_at: DateTime<Utc>,
    /// Set at most once
    pub transaction_id: Option<TransactionId>,
    /// Snapshot of the normalization result
    pub normalized_event: Option<NormalizedEvent>,
    pub error_message: Option<String>,
}

/// DTO for creating a webhook log
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewWebhookLog {
    pub provider: String,
    pub provider_event_id: Option<String>,
    pub event_type: Option<String>,
    pub raw_payload: serde_json::Value,
    pub headers: serde_json::Value,
    pub signature_valid: bool,
    pub processing_status: ProcessingStatus,
    pub received_at: DateTime<Utc>,
    pub transaction_id: Option<TransactionId>,
    pub normalized_event: Option<NormalizedEvent>,
    pub error_message: Option<String>,
}

/// What an audit row records
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditAction {
    /// Transaction row came into existence
    TransactionCreated,
    /// Status moved along a permitted edge
    StatusChanged,
    /// A webhook was linked without changing status
    WebhookReceived,
    /// The state machine refused an implied transition
    TransitionRejected,
    /// A provider ref was attached
    ProviderRefLinked,
}

impl AuditAction {
    /// Stable string form, matching the persistence schema
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TransactionCreated => "TRANSACTION_CREATED",
            Self::StatusChanged => "STATUS_CHANGED",
            Self::WebhookReceived => "WEBHOOK_RECEIVED",
            Self::TransitionRejected => "TRANSITION_REJECTED",
            Self::ProviderRefLinked => "PROVIDER_REF_LINKED",
        }
    }

    /// Parse from the stable string form
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "TRANSACTION_CREATED" => Some(Self::TransactionCreated),
            "STATUS_CHANGED" => Some(Self::StatusChanged),
            "WEBHOOK_RECEIVED" => Some(Self::WebhookReceived),
            "TRANSITION_REJECTED" => Some(Self::TransitionRejected),
            "PROVIDER_REF_LINKED" => Some(Self::ProviderRefLinked),
            _ => None,
        }
    }
}

/// Append-only transition record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditLogRecord {
    pub id: AuditLogId,
    pub transaction_id: TransactionId,
    pub action: AuditAction,
    /// `None` for creation rows
    pub state_before: Option<TransactionStatus>,
    pub state_after: TransactionStatus,
    pub trigger: TriggerType,
    pub webhook_log_id: Option<WebhookLogId>,
    pub verification_method: Option<VerificationMethod>,
    /// Who performed the change ("system", an operator id, ...)
    pub actor: String,
    pub reason: Option<String>,
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

/// DTO for an audit row, minus the parts storage assigns
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub transaction_id: TransactionId,
    pub action: AuditAction,
    pub state_before: Option<TransactionStatus>,
    pub state_after: TransactionStatus,
    pub trigger: TriggerType,
    pub webhook_log_id: Option<WebhookLogId>,
    pub verification_method: Option<VerificationMethod>,
    pub actor: String,
    pub reason: Option<String>,
    pub metadata: serde_json::Value,
}

impl AuditEntry {
    /// An entry for a webhook-driven status change
    pub fn webhook_transition(
        transaction_id: TransactionId,
        from: TransactionStatus,
        to: TransactionStatus,
        webhook_log_id: WebhookLogId,
        event_type: &str,
    ) -> Self {
        Self {
            transaction_id,
            action: AuditAction::StatusChanged,
            state_before: Some(from),
            state_after: to,
            trigger: TriggerType::Webhook,
            webhook_log_id: Some(webhook_log_id),
            verification_method: Some(VerificationMethod::WebhookOnly),
            actor: "system".to_string(),
            reason: None,
            metadata: serde_json::json!({ "event_type": event_type }),
        }
    }
}

/// Per-handler invocation record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DispatchLogRecord {
    pub id: DispatchLogId,
    pub transaction_id: Option<TransactionId>,
    pub webhook_log_id: Option<WebhookLogId>,
    pub event_type: String,
    pub handler_name: String,
    pub status: DispatchStatus,
    pub attempted_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub duration_ms: Option<i64>,
    pub error: Option<String>,
    pub retry_count: i32,
    pub is_replay: bool,
}

/// DTO for a dispatch record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewDispatchLog {
    pub transaction_id: Option<TransactionId>,
    pub webhook_log_id: Option<WebhookLogId>,
    pub event_type: String,
    pub handler_name: String,
    pub status: DispatchStatus,
    pub attempted_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub duration_ms: Option<i64>,
    pub error: Option<String>,
    pub retry_count: i32,
    pub is_replay: bool,
}

/// A deferred, guaranteed-delivery unit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboxEventRecord {
    pub id: OutboxEventId,
    /// Transaction or webhook id, as a string
    pub aggregate_id: String,
    pub aggregate_type: String,
    pub event_type: String,
    pub payload: serde_json::Value,
    pub status: OutboxStatus,
    pub retry_count: i32,
    pub max_retries: i32,
    pub scheduled_for: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// DTO for an outbox event
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewOutboxEvent {
    pub aggregate_id: String,
    pub aggregate_type: String,
    pub event_type: String,
    pub payload: serde_json::Value,
    pub max_retries: i32,
    pub scheduled_for: DateTime<Utc>,
}

/// Fields `mark_as_processing` may set alongside the status
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessingUpdate {
    pub provider_ref: String,
    pub verification_method: Option<VerificationMethod>,
}

/// Side effects committed atomically with a status transition
#[derive(Debug, Clone, Default)]
pub struct TransitionEffects {
    /// Attach this provider ref if the transaction has none
    pub link_provider_ref: Option<String>,
    /// Link this webhook log to the transaction
    pub link_webhook_log: Option<WebhookLogId>,
    /// Write this outbox event in the same unit of work
    pub outbox: Option<NewOutboxEvent>,
    /// Raise verification confidence (never lowers it)
    pub verification_method: Option<VerificationMethod>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_audit_action_string_roundtrip() {
        for action in [
            AuditAction::TransactionCreated,
            AuditAction::StatusChanged,
            AuditAction::WebhookReceived,
            AuditAction::TransitionRejected,
            AuditAction::ProviderRefLinked,
        ] {
            assert_eq!(AuditAction::parse(action.as_str()), Some(action));
        }
    }
}
