//! S6 - dispatch
//!
//! By the time this stage runs, persisted state is the truth. Nothing
//! here can change the claim's fate: outbox write failures and handler
//! failures are logged and absorbed.

use crate::context::WebhookContext;
use crate::stage::{Stage, StageOutcome};
use async_trait::async_trait;
use payhook_dispatch::{outbox_event_for, DispatchPayload, EventDispatcher, OutboxConfig};
use payhook_storage::Storage;
use serde_json::json;
use std::sync::Arc;
use tracing::{info, warn};

pub struct DispatchStage {
    storage: Arc<dyn Storage>,
    dispatcher: EventDispatcher,
    outbox: OutboxConfig,
}

impl DispatchStage {
    pub fn new(
        storage: Arc<dyn Storage>,
        dispatcher: EventDispatcher,
        outbox: OutboxConfig,
    ) -> Self {
        Self {
            storage,
            dispatcher,
            outbox,
        }
    }
}

#[async_trait]
impl Stage for DispatchStage {
    fn name(&self) -> &'static str {
        "dispatch"
    }

    async fn run(&self, ctx: &mut WebhookContext) -> StageOutcome {
        if ctx.fate().suppresses_dispatch() {
            return StageOutcome::stop();
        }
        let Some(event) = ctx.normalized.clone() else {
            return StageOutcome::stop();
        };

        let payload = DispatchPayload {
            event_type: event.event_type,
            transaction: ctx.transaction.clone(),
            webhook_log_id: ctx.webhook_log.as_ref().map(|log| log.id),
            normalized: Some(event),
            metadata: json!({ "processing_id": ctx.processing_id }),
        };

        if self.outbox.enabled {
            // The state engine already wrote the outbox row inside its
            // commit when it applied a transition
            if !ctx.outbox_written {
                match outbox_event_for(&payload, &self.outbox) {
                    Ok(outbox_event) => {
                        match self.storage.create_outbox_event(outbox_event).await {
                            Ok(_) => ctx.outbox_written = true,
                            Err(e) => warn!(error = %e, "failed to write outbox event"),
                        }
                    }
                    Err(e) => warn!(error = %e, "failed to encode outbox payload"),
                }
            }
            return StageOutcome::stop();
        }

        let summary = self.dispatcher.dispatch(&payload, false).await;
        info!(
            event_type = %payload.event_type,
            delivered = summary.delivered,
            failed = summary.failed,
            "dispatched"
        );
        ctx.dispatched = summary.delivered > 0;
        StageOutcome::stop()
    }
}
