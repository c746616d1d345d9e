//! The event dispatcher
//!
//! Delivers one payload to every handler subscribed to its event type,
//! concurrently, observing each handler independently through a dispatch
//! log row. Ordering across handlers is unspecified.

use crate::registry::HandlerRegistry;
use chrono::Utc;
use futures::future::join_all;
use payhook_storage::{NewDispatchLog, Storage, TransactionRecord};
use payhook_types::{
    DispatchStatus, NormalizedEvent, NormalizedEventType, TransactionId, WebhookLogId,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tracing::warn;

/// What handlers receive
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchPayload {
    pub event_type: NormalizedEventType,
    /// Snapshot of the transaction at dispatch time
    pub transaction: Option<TransactionRecord>,
    pub webhook_log_id: Option<WebhookLogId>,
    pub normalized: Option<NormalizedEvent>,
    pub metadata: serde_json::Value,
}

impl DispatchPayload {
    fn transaction_id(&self) -> Option<TransactionId> {
        self.transaction.as_ref().map(|t| t.id)
    }
}

/// Outcome counts for one dispatch call
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchSummary {
    pub delivered: usize,
    pub failed: usize,
}

impl DispatchSummary {
    /// True when every handler accepted the payload
    pub fn all_delivered(&self) -> bool {
        self.failed == 0
    }
}

/// Fans payloads out to registered handlers
#[derive(Clone)]
pub struct EventDispatcher {
    registry: Arc<HandlerRegistry>,
    storage: Arc<dyn Storage>,
}

impl EventDispatcher {
    pub fn new(registry: Arc<HandlerRegistry>, storage: Arc<dyn Storage>) -> Self {
        Self { registry, storage }
    }

    /// Whether any handler is subscribed to the event type
    pub fn has_handlers(&self, event_type: NormalizedEventType) -> bool {
        self.registry.has_handlers(event_type)
    }

    /// Deliver `payload` to all subscribed handlers concurrently.
    ///
    /// Each handler gets its own dispatch log row. A failing handler is
    /// recorded and skipped over; it never affects its peers or the
    /// webhook's fate.
    pub async fn dispatch(&self, payload: &DispatchPayload, is_replay: bool) -> DispatchSummary {
        let handlers = self.registry.handlers_for(payload.event_type);
        if handlers.is_empty() {
            return DispatchSummary::default();
        }

        let invocations = handlers.iter().map(|handler| {
            let handler = handler.clone();
            async move {
                let attempted_at = Utc::now();
                let started = Instant::now();
                let result = handler.handle(payload).await;
                (handler, attempted_at, started.elapsed(), result)
            }
        });

        let mut summary = DispatchSummary::default();
        for (handler, attempted_at, elapsed, result) in join_all(invocations).await {
            let (status, error) = match &result {
                Ok(()) => {
                    summary.delivered += 1;
                    (DispatchStatus::Delivered, None)
                }
                Err(e) => {
                    summary.failed += 1;
                    warn!(
                        handler = handler.name(),
                        event_type = %payload.event_type,
                        error = %e,
                        "handler failed"
                    );
                    (DispatchStatus::Failed, Some(e.to_string()))
                }
            };

            let log = NewDispatchLog {
                transaction_id: payload.transaction_id(),
                webhook_log_id: payload.webhook_log_id,
                event_type: payload.event_type.as_str().to_string(),
                handler_name: handler.name().to_string(),
                status,
                attempted_at,
                completed_at: Some(Utc::now()),
                duration_ms: Some(elapsed.as_millis() as i64),
                error,
                retry_count: 0,
                is_replay,
            };
            if let Err(e) = self.storage.create_dispatch_log(log).await {
                // Observability loss only; the delivery itself happened
                warn!(handler = handler.name(), error = %e, "failed to record dispatch log");
            }
        }
        summary
    }
}
