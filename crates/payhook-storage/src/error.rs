//! Storage error types

use payhook_types::{TransactionId, TransactionStatus};
use thiserror::Error;

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Storage operation errors
#[derive(Debug, Error)]
pub enum StorageError {
    /// `application_ref` collides with an existing transaction
    #[error("duplicate application ref: {application_ref}")]
    DuplicateApplicationRef { application_ref: String },

    /// No transaction with the given id
    #[error("transaction not found: {id}")]
    TransactionNotFound { id: TransactionId },

    /// No webhook log with the given id
    #[error("webhook log not found: {id}")]
    WebhookLogNotFound { id: payhook_types::WebhookLogId },

    /// The transaction already carries a different provider ref
    #[error("provider ref conflict on {id}: has {existing}, got {incoming}")]
    ProviderRefConflict {
        id: TransactionId,
        existing: String,
        incoming: String,
    },

    /// The state machine rejected the transition under the row lock
    #[error("transition rejected: {from} -> {to}: {reason}")]
    TransitionRejected {
        from: TransactionStatus,
        to: TransactionStatus,
        reason: String,
    },

    /// No outbox event with the given id
    #[error("outbox event not found: {id}")]
    OutboxEventNotFound { id: payhook_types::OutboxEventId },

    /// Connection-level failure
    #[error("connection error: {0}")]
    Connection(String),

    /// Migration failure
    #[error("migration error: {0}")]
    Migration(String),

    /// Query-level failure
    #[error("query error: {0}")]
    Query(#[from] sqlx::Error),

    /// Row contained data the domain types reject
    #[error("corrupt row: {message}")]
    CorruptRow { message: String },

    /// Serialization failure
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for StorageError {
    fn from(e: serde_json::Error) -> Self {
        StorageError::Serialization(e.to_string())
    }
}
