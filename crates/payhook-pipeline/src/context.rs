//! The mutable record threaded through the pipeline stages

use chrono::{DateTime, Utc};
use payhook_adapters::EventReferences;
use payhook_storage::{TransactionRecord, WebhookLogRecord};
use payhook_types::{NormalizedEvent, ProcessingId, ProcessingStatus};
use std::collections::HashMap;

/// Classifier booleans extracted from the raw event name
#[derive(Debug, Clone, Copy, Default)]
pub struct EventClassifiers {
    pub is_success: bool,
    pub is_failure: bool,
    pub is_refund: bool,
    pub is_dispute: bool,
}

/// Shared mutable state for one webhook claim.
///
/// Earlier stages publish into it; later stages read from it. The
/// `transaction` field is a snapshot - the authoritative status is always
/// re-read under lock inside the storage layer.
#[derive(Debug, Clone)]
pub struct WebhookContext {
    pub processing_id: ProcessingId,
    pub provider: String,
    /// Verbatim request body; signature schemes are byte-sensitive
    pub raw_body: Vec<u8>,
    /// Header map with lowercased keys
    pub headers: HashMap<String, String>,
    pub received_at: DateTime<Utc>,

    // Published by the verification stage
    pub signature_valid: bool,

    // Published by the normalization stage
    pub payload: Option<serde_json::Value>,
    pub normalized: Option<NormalizedEvent>,
    pub idempotency_key: Option<String>,
    pub references: EventReferences,
    pub raw_event_type: Option<String>,
    pub classifiers: EventClassifiers,

    // Published by persist-claim and the state engine
    pub webhook_log: Option<WebhookLogRecord>,
    pub transaction: Option<TransactionRecord>,
    pub transition_applied: bool,
    pub outbox_written: bool,
    pub dispatched: bool,

    /// The fate, once some stage has decided it
    pub processing_status: Option<ProcessingStatus>,
    pub error_message: Option<String>,
}

impl WebhookContext {
    /// Build a fresh context; header keys are lowercased here
    pub fn new(provider: &str, raw_body: Vec<u8>, headers: HashMap<String, String>) -> Self {
        let headers = headers
            .into_iter()
            .map(|(k, v)| (k.to_ascii_lowercase(), v))
            .collect();
        Self {
            processing_id: ProcessingId::new(),
            provider: provider.to_ascii_lowercase(),
            raw_body,
            headers,
            received_at: Utc::now(),
            signature_valid: false,
            payload: None,
            normalized: None,
            idempotency_key: None,
            references: EventReferences::default(),
            raw_event_type: None,
            classifiers: EventClassifiers::default(),
            webhook_log: None,
            transaction: None,
            transition_applied: false,
            outbox_written: false,
            dispatched: false,
            processing_status: None,
            error_message: None,
        }
    }

    /// The fate as it stands: explicitly set, or the provisional default
    pub fn fate(&self) -> ProcessingStatus {
        self.processing_status.unwrap_or(ProcessingStatus::Processed)
    }

    /// Record a fate; the first explicit fate wins except that later
    /// stages may refine a provisional one
    pub fn set_fate(&mut self, fate: ProcessingStatus, error: Option<String>) {
        self.processing_status = Some(fate);
        if error.is_some() {
            self.error_message = error;
        }
    }

    /// Whether any stage has already fixed the fate
    pub fn fate_decided(&self) -> bool {
        self.processing_status.is_some()
    }
}
