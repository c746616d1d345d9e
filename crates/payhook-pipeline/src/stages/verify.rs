//! S1 - signature verification
//!
//! A failed signature does not short-circuit: the claim continues so the
//! persist stage still records the attempt. It can never reach the state
//! engine because its fate is already decided.

use crate::context::WebhookContext;
use crate::stage::{Stage, StageOutcome};
use async_trait::async_trait;
use payhook_adapters::AdapterRegistry;
use payhook_types::ProcessingStatus;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::warn;

pub struct VerificationStage {
    adapters: Arc<AdapterRegistry>,
    secrets: HashMap<String, Vec<String>>,
    skip_verification: bool,
}

impl VerificationStage {
    pub fn new(
        adapters: Arc<AdapterRegistry>,
        secrets: HashMap<String, Vec<String>>,
        skip_verification: bool,
    ) -> Self {
        Self {
            adapters,
            secrets,
            skip_verification,
        }
    }
}

#[async_trait]
impl Stage for VerificationStage {
    fn name(&self) -> &'static str {
        "verification"
    }

    async fn run(&self, ctx: &mut WebhookContext) -> StageOutcome {
        if self.skip_verification {
            ctx.signature_valid = true;
            return StageOutcome::proceed();
        }

        let Some(adapter) = self.adapters.get(&ctx.provider) else {
            warn!(provider = %ctx.provider, "no adapter registered");
            ctx.set_fate(
                ProcessingStatus::SignatureFailed,
                Some(format!("no adapter registered for provider {}", ctx.provider)),
            );
            return StageOutcome::proceed();
        };

        let secrets = self
            .secrets
            .get(&ctx.provider)
            .map(Vec::as_slice)
            .unwrap_or(&[]);
        if secrets.is_empty() {
            warn!(provider = %ctx.provider, "no secrets configured");
            ctx.set_fate(
                ProcessingStatus::SignatureFailed,
                Some(format!("no secrets configured for provider {}", ctx.provider)),
            );
            return StageOutcome::proceed();
        }

        if adapter.verify_signature(&ctx.raw_body, &ctx.headers, secrets) {
            ctx.signature_valid = true;
        } else {
            ctx.set_fate(
                ProcessingStatus::SignatureFailed,
                Some("signature missing or invalid".to_string()),
            );
        }
        StageOutcome::proceed()
    }
}
