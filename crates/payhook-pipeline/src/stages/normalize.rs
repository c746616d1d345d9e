//! S2 - parsing and normalization
//!
//! Publishes the parsed payload, the idempotency key, references, and
//! (for claims with a valid signature) the normalized event. A claim
//! whose signature already failed is still parsed so the persist stage
//! can store something useful, but it is never normalized - its content
//! is untrusted.

use crate::context::{EventClassifiers, WebhookContext};
use crate::stage::{Stage, StageOutcome};
use async_trait::async_trait;
use payhook_adapters::{signature::synthesize_idempotency_key, AdapterRegistry};
use payhook_types::ProcessingStatus;
use std::sync::Arc;

pub struct NormalizationStage {
    adapters: Arc<AdapterRegistry>,
}

impl NormalizationStage {
    pub fn new(adapters: Arc<AdapterRegistry>) -> Self {
        Self { adapters }
    }
}

#[async_trait]
impl Stage for NormalizationStage {
    fn name(&self) -> &'static str {
        "normalization"
    }

    async fn run(&self, ctx: &mut WebhookContext) -> StageOutcome {
        let Some(adapter) = self.adapters.get(&ctx.provider) else {
            // Unknown provider (fate already SIGNATURE_FAILED): best-effort
            // parse so the claim record holds the payload
            ctx.payload = serde_json::from_slice(&ctx.raw_body).ok();
            return StageOutcome::proceed();
        };

        let payload = match adapter.parse_payload(&ctx.raw_body) {
            Ok(payload) => payload,
            Err(e) => {
                if !ctx.fate_decided() {
                    ctx.set_fate(ProcessingStatus::ParseError, Some(e.to_string()));
                }
                return StageOutcome::stop();
            }
        };

        ctx.raw_event_type = adapter.extract_event_type(&payload);
        ctx.references = adapter.extract_references(&payload);
        ctx.idempotency_key = Some(
            adapter
                .extract_idempotency_key(&payload)
                .unwrap_or_else(|| {
                    synthesize_idempotency_key(&ctx.raw_body, &ctx.provider, ctx.received_at)
                }),
        );
        if let Some(raw_type) = &ctx.raw_event_type {
            ctx.classifiers = EventClassifiers {
                is_success: adapter.is_success_event(raw_type),
                is_failure: adapter.is_failure_event(raw_type),
                is_refund: adapter.is_refund_event(raw_type),
                is_dispute: adapter.is_dispute_event(raw_type),
            };
        }
        ctx.payload = Some(payload);

        if ctx.fate_decided() {
            // Untrusted content; record it but do not interpret it
            return StageOutcome::proceed();
        }

        match adapter.normalize(ctx.payload.as_ref().expect("just set")) {
            Ok(event) => {
                ctx.normalized = Some(event);
                StageOutcome::proceed()
            }
            Err(e) => {
                ctx.set_fate(ProcessingStatus::NormalizationFailed, Some(e.to_string()));
                StageOutcome::stop()
            }
        }
    }
}
