//! Outbox worker
//!
//! Polls for due PENDING/FAILED rows, reconstructs each payload, fans it
//! out through the dispatcher, and marks the row PROCESSED - or advances
//! its retry schedule with exponential backoff until the retry budget is
//! exhausted and the row dead-letters.

use crate::dispatcher::{DispatchPayload, EventDispatcher};
use crate::outbox::OutboxConfig;
use chrono::Duration;
use payhook_storage::Storage;
use payhook_types::OutboxStatus;
use std::sync::Arc;
use tracing::{error, info, warn};

/// Background delivery loop for outbox events
pub struct OutboxWorker {
    storage: Arc<dyn Storage>,
    dispatcher: EventDispatcher,
    config: OutboxConfig,
}

impl OutboxWorker {
    pub fn new(
        storage: Arc<dyn Storage>,
        dispatcher: EventDispatcher,
        config: OutboxConfig,
    ) -> Self {
        Self {
            storage,
            dispatcher,
            config,
        }
    }

    /// Run until the task is aborted
    pub async fn run(self) {
        let mut interval =
            tokio::time::interval(std::time::Duration::from_secs(self.config.poll_interval_secs));
        info!(
            poll_interval_secs = self.config.poll_interval_secs,
            "outbox worker started"
        );
        loop {
            interval.tick().await;
            if let Err(e) = self.drain_once().await {
                error!(error = %e, "outbox poll failed");
            }
        }
    }

    /// One poll cycle; returns how many events were delivered
    pub async fn drain_once(&self) -> payhook_storage::StorageResult<usize> {
        let due = self.storage.due_outbox_events(self.config.batch_size).await?;
        let mut delivered = 0;

        for event in due {
            let payload: DispatchPayload = match serde_json::from_value(event.payload.clone()) {
                Ok(payload) => payload,
                Err(e) => {
                    // Undecodable rows burn a retry each cycle until they
                    // dead-letter; they can never succeed
                    warn!(event_id = %event.id, error = %e, "undecodable outbox payload");
                    self.storage
                        .reschedule_outbox_event(
                            event.id,
                            &format!("undecodable payload: {e}"),
                            Duration::seconds(self.config.backoff_base_secs),
                        )
                        .await?;
                    continue;
                }
            };

            let summary = self.dispatcher.dispatch(&payload, false).await;
            if summary.all_delivered() {
                self.storage.mark_outbox_processed(event.id).await?;
                delivered += 1;
            } else {
                let status = self
                    .storage
                    .reschedule_outbox_event(
                        event.id,
                        &format!("{} handler(s) failed", summary.failed),
                        Duration::seconds(self.config.backoff_base_secs),
                    )
                    .await?;
                if status == OutboxStatus::DeadLetter {
                    error!(event_id = %event.id, event_type = %event.event_type, "outbox event dead-lettered");
                }
            }
        }
        Ok(delivered)
    }
}
