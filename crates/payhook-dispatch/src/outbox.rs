//! Outbox write path
//!
//! When the outbox is enabled, the pipeline's dispatch stage writes an
//! outbox row instead of invoking handlers inline; the worker picks it up
//! after commit. The row must be created inside the same unit of work as
//! the state change that produced it.

use crate::dispatcher::DispatchPayload;
use chrono::Utc;
use payhook_storage::NewOutboxEvent;
use serde::{Deserialize, Serialize};

/// Outbox configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboxConfig {
    /// When false, the dispatch stage invokes handlers inline
    pub enabled: bool,
    /// Retry budget per event before dead-lettering
    pub max_retries: i32,
    /// Base of the exponential backoff schedule, in seconds
    pub backoff_base_secs: i64,
    /// Rows fetched per worker poll
    pub batch_size: i64,
    /// Worker poll interval, in seconds
    pub poll_interval_secs: u64,
}

impl Default for OutboxConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            max_retries: 5,
            backoff_base_secs: 30,
            batch_size: 50,
            poll_interval_secs: 5,
        }
    }
}

/// Build the outbox row for a dispatch payload.
///
/// The payload is stored verbatim so the worker can reconstruct the exact
/// `DispatchPayload` the inline path would have delivered.
pub fn outbox_event_for(
    payload: &DispatchPayload,
    config: &OutboxConfig,
) -> Result<NewOutboxEvent, serde_json::Error> {
    let (aggregate_id, aggregate_type) = match &payload.transaction {
        Some(tx) => (tx.id.to_string(), "transaction".to_string()),
        None => (
            payload
                .webhook_log_id
                .map(|id| id.to_string())
                .unwrap_or_default(),
            "webhook".to_string(),
        ),
    };

    Ok(NewOutboxEvent {
        aggregate_id,
        aggregate_type,
        event_type: payload.event_type.as_str().to_string(),
        payload: serde_json::to_value(payload)?,
        max_retries: config.max_retries,
        scheduled_for: Utc::now(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use payhook_types::NormalizedEventType;

    #[test]
    fn test_outbox_event_roundtrips_payload() {
        let payload = DispatchPayload {
            event_type: NormalizedEventType::PaymentSuccessful,
            transaction: None,
            webhook_log_id: Some(payhook_types::WebhookLogId::new()),
            normalized: None,
            metadata: serde_json::json!({"k": "v"}),
        };
        let event = outbox_event_for(&payload, &OutboxConfig::default()).unwrap();
        assert_eq!(event.aggregate_type, "webhook");
        assert_eq!(event.event_type, "PAYMENT_SUCCESSFUL");

        let back: DispatchPayload = serde_json::from_value(event.payload).unwrap();
        assert_eq!(back.event_type, payload.event_type);
        assert_eq!(back.webhook_log_id, payload.webhook_log_id);
    }
}
