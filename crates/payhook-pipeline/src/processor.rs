//! The webhook processor
//!
//! Owns the stage list (built once per configuration), the per-request
//! deadline, metrics, finalization, and lifecycle hooks. Also exposes the
//! two host-driven entry points that bypass the webhook path: manual
//! transitions and dispatch replay.

use crate::config::ProcessorConfig;
use crate::context::WebhookContext;
use crate::hooks::{FateSummary, LifecycleHooks, NoopHooks};
use crate::metrics::{PipelineMetrics, StageFlags};
use crate::redact::{redact_headers, redact_payload};
use crate::stage::Stage;
use crate::stages::{
    DeduplicationStage, DispatchStage, NormalizationStage, PersistClaimStage, StateEngineStage,
    VerificationStage,
};
use crate::PipelineError;
use payhook_adapters::AdapterRegistry;
use payhook_dispatch::{DispatchPayload, DispatchSummary, EventDispatcher, HandlerRegistry};
use payhook_state::TransitionContext;
use payhook_storage::{
    AuditAction, AuditEntry, NewWebhookLog, Storage, TransactionQuery, TransactionRecord,
};
use payhook_types::{
    ProcessingId, ProcessingStatus, TransactionId, TransactionStatus, TriggerType, WebhookLogId,
};
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

/// What the processor hands back for every claim
#[derive(Debug, Clone)]
pub struct ProcessingResult {
    /// True when the claim ended `PROCESSED` without recorded errors
    pub success: bool,
    pub processing_id: ProcessingId,
    pub webhook_log_id: Option<WebhookLogId>,
    pub transaction_id: Option<TransactionId>,
    pub processing_status: ProcessingStatus,
    pub error: Option<String>,
    pub metrics: PipelineMetrics,
}

/// A host-initiated status change
#[derive(Debug, Clone)]
pub struct ManualTransitionRequest {
    pub transaction_id: TransactionId,
    pub target: TransactionStatus,
    /// Allow edges outside the transition table (terminal states still
    /// reject everything)
    pub force: bool,
    pub actor: String,
    pub reason: Option<String>,
}

/// Builder for [`WebhookProcessor`]
#[derive(Default)]
pub struct ProcessorBuilder {
    storage: Option<Arc<dyn Storage>>,
    adapters: Option<AdapterRegistry>,
    handlers: Option<HandlerRegistry>,
    hooks: Option<Arc<dyn LifecycleHooks>>,
    config: ProcessorConfig,
}

impl ProcessorBuilder {
    pub fn storage(mut self, storage: Arc<dyn Storage>) -> Self {
        self.storage = Some(storage);
        self
    }

    pub fn adapters(mut self, adapters: AdapterRegistry) -> Self {
        self.adapters = Some(adapters);
        self
    }

    pub fn handlers(mut self, handlers: HandlerRegistry) -> Self {
        self.handlers = Some(handlers);
        self
    }

    pub fn hooks(mut self, hooks: Arc<dyn LifecycleHooks>) -> Self {
        self.hooks = Some(hooks);
        self
    }

    pub fn config(mut self, config: ProcessorConfig) -> Self {
        self.config = config;
        self
    }

    /// Assemble the processor; panics if storage is missing (a
    /// construction-time wiring error, not a runtime condition)
    pub fn build(self) -> WebhookProcessor {
        let storage = self.storage.expect("processor requires a storage backend");
        let adapters = Arc::new(self.adapters.unwrap_or_else(AdapterRegistry::with_defaults));
        let handlers = Arc::new(self.handlers.unwrap_or_default());
        let hooks = self.hooks.unwrap_or_else(|| Arc::new(NoopHooks));
        let config = self.config;

        let dispatcher = EventDispatcher::new(handlers, storage.clone());
        let stages: Vec<Box<dyn Stage>> = vec![
            Box::new(VerificationStage::new(
                adapters.clone(),
                config.secrets.clone(),
                config.skip_signature_verification,
            )),
            Box::new(NormalizationStage::new(adapters.clone())),
            Box::new(PersistClaimStage::new(
                storage.clone(),
                config.redact_keys.clone(),
            )),
            Box::new(DeduplicationStage::new(storage.clone())),
            Box::new(StateEngineStage::new(
                storage.clone(),
                config.auto_create_transactions,
                config.outbox.clone(),
            )),
            Box::new(DispatchStage::new(
                storage.clone(),
                dispatcher.clone(),
                config.outbox.clone(),
            )),
        ];

        WebhookProcessor {
            stages,
            storage,
            dispatcher,
            hooks,
            config,
        }
    }
}

/// Runs the pipeline for inbound webhook claims
pub struct WebhookProcessor {
    stages: Vec<Box<dyn Stage>>,
    storage: Arc<dyn Storage>,
    dispatcher: EventDispatcher,
    hooks: Arc<dyn LifecycleHooks>,
    config: ProcessorConfig,
}

impl WebhookProcessor {
    pub fn builder() -> ProcessorBuilder {
        ProcessorBuilder::default()
    }

    /// Process one inbound claim. Always resolves to a fate; raises only
    /// when `throw_on_error` is configured.
    pub async fn process(
        &self,
        provider: &str,
        raw_body: Vec<u8>,
        headers: HashMap<String, String>,
    ) -> Result<ProcessingResult, PipelineError> {
        let started = Instant::now();
        let ctx = WebhookContext::new(provider, raw_body, headers);
        let processing_id = ctx.processing_id;
        let provider_name = ctx.provider.clone();

        let run = tokio::time::timeout(
            std::time::Duration::from_millis(self.config.timeout_ms),
            self.run_stages(ctx),
        )
        .await;

        let (mut ctx, mut metrics) = match run {
            Ok(done) => done,
            Err(_) => {
                // The stage future is gone; a partially inserted claim row
                // keeps its provisional fate
                warn!(provider = %provider_name, timeout_ms = self.config.timeout_ms, "pipeline timeout");
                let metrics = PipelineMetrics {
                    timed_out: true,
                    total_duration_ms: started.elapsed().as_millis() as i64,
                    ..Default::default()
                };
                let result = ProcessingResult {
                    success: false,
                    processing_id,
                    webhook_log_id: None,
                    transaction_id: None,
                    processing_status: ProcessingStatus::ParseError,
                    error: Some("pipeline timeout".to_string()),
                    metrics,
                };
                self.fire_fate_hook(&result, &provider_name).await;
                if self.config.throw_on_error {
                    return Err(PipelineError::Timeout {
                        timeout_ms: self.config.timeout_ms,
                    });
                }
                return Ok(result);
            }
        };

        self.finalize(&mut ctx, started).await;

        metrics.flags = StageFlags {
            signature_verified: ctx.signature_valid,
            normalized: ctx.normalized.is_some(),
            persisted: ctx.webhook_log.is_some(),
            transition_applied: ctx.transition_applied,
            dispatched: ctx.dispatched,
        };
        metrics.total_duration_ms = started.elapsed().as_millis() as i64;

        let fate = ctx.fate();
        let result = ProcessingResult {
            success: fate == ProcessingStatus::Processed && ctx.error_message.is_none(),
            processing_id,
            webhook_log_id: ctx.webhook_log.as_ref().map(|log| log.id),
            transaction_id: ctx.transaction.as_ref().map(|tx| tx.id),
            processing_status: fate,
            error: ctx.error_message.clone(),
            metrics,
        };

        info!(
            provider = %provider_name,
            processing_id = %processing_id,
            fate = %fate,
            duration_ms = result.metrics.total_duration_ms,
            "webhook processed"
        );
        self.fire_fate_hook(&result, &provider_name).await;

        if self.config.throw_on_error && fate != ProcessingStatus::Processed {
            return Err(PipelineError::Fate {
                fate,
                message: result.error.clone().unwrap_or_default(),
            });
        }
        Ok(result)
    }

    async fn run_stages(&self, mut ctx: WebhookContext) -> (WebhookContext, PipelineMetrics) {
        let mut metrics = PipelineMetrics::default();
        for stage in &self.stages {
            let stage_started = Instant::now();
            let outcome = stage.run(&mut ctx).await;
            metrics.record_stage(stage.name(), stage_started.elapsed().as_millis() as i64);

            if !outcome.should_continue {
                // The only fatal stop with no fate attached is a failed
                // persist; classify it so the caller still gets a fate
                if !outcome.success && !ctx.fate_decided() {
                    ctx.set_fate(ProcessingStatus::ParseError, outcome.error);
                }
                break;
            }
        }
        (ctx, metrics)
    }

    /// Guarantee the claim record and its final fate agree, then stamp the
    /// duration
    async fn finalize(&self, ctx: &mut WebhookContext, started: Instant) {
        if ctx.webhook_log.is_none() {
            // The pipeline ended before (or inside) persist-claim; record
            // the attempt so the fate has a durable home
            let dto = NewWebhookLog {
                provider: ctx.provider.clone(),
                provider_event_id: ctx.idempotency_key.clone(),
                event_type: ctx.raw_event_type.clone(),
                raw_payload: ctx
                    .payload
                    .as_ref()
                    .map(|p| redact_payload(p, &self.config.redact_keys))
                    .unwrap_or_else(|| json!({ "unparsed": true })),
                headers: redact_headers(&ctx.headers),
                signature_valid: ctx.signature_valid,
                processing_status: ctx.fate(),
                received_at: ctx.received_at,
                transaction_id: None,
                normalized_event: ctx.normalized.clone(),
                error_message: ctx.error_message.clone(),
            };
            match self.storage.create_webhook_log(dto).await {
                Ok(log) => ctx.webhook_log = Some(log),
                Err(e) => warn!(provider = %ctx.provider, error = %e, "claim record lost"),
            }
        } else if let Some(log) = &ctx.webhook_log {
            if log.processing_status != ctx.fate() {
                if let Err(e) = self
                    .storage
                    .update_webhook_log_status(log.id, ctx.fate(), ctx.error_message.clone())
                    .await
                {
                    warn!(error = %e, "failed to finalize fate");
                }
            }
        }

        if let Some(id) = ctx.webhook_log.as_ref().map(|log| log.id) {
            let elapsed = started.elapsed().as_millis() as i64;
            if let Err(e) = self.storage.set_webhook_log_duration(id, elapsed).await {
                warn!(error = %e, "failed to record processing duration");
            }
        }
    }

    async fn fire_fate_hook(&self, result: &ProcessingResult, provider: &str) {
        let summary = FateSummary {
            processing_id: result.processing_id,
            provider: provider.to_string(),
            fate: result.processing_status,
            webhook_log_id: result.webhook_log_id,
            transaction_id: result.transaction_id,
            duration_ms: result.metrics.total_duration_ms,
            error: result.error.clone(),
        };
        if let Err(e) = self.hooks.on_webhook_fate(&summary).await {
            warn!(error = %e, "onWebhookFate hook failed");
        }
    }

    /// Apply an operator-initiated transition through the same locked,
    /// audited update path webhooks use
    pub async fn apply_manual_transition(
        &self,
        request: ManualTransitionRequest,
    ) -> payhook_storage::StorageResult<TransactionRecord> {
        let audit = AuditEntry {
            transaction_id: request.transaction_id,
            action: AuditAction::StatusChanged,
            state_before: None, // overwritten under the row lock
            state_after: request.target,
            trigger: TriggerType::Manual,
            webhook_log_id: None,
            verification_method: None,
            actor: request.actor,
            reason: request.reason,
            metadata: json!({ "forced": request.force }),
        };
        self.storage
            .update_transaction_status(
                request.transaction_id,
                request.target,
                TransitionContext::manual(request.force),
                audit,
                Default::default(),
            )
            .await
    }

    /// Re-run dispatch for an already-processed claim (after a handler
    /// fix). Verification and the state engine are not re-run; dispatch
    /// logs are marked as replays.
    pub async fn replay_dispatch(
        &self,
        webhook_log_id: WebhookLogId,
    ) -> Result<DispatchSummary, PipelineError> {
        let log = self
            .storage
            .find_webhook_log(webhook_log_id)
            .await
            .map_err(PipelineError::Persist)?
            .ok_or_else(|| PipelineError::Replay {
                message: format!("webhook log not found: {webhook_log_id}"),
            })?;

        if log.processing_status.suppresses_dispatch() {
            return Err(PipelineError::Replay {
                message: format!("fate {} is not dispatchable", log.processing_status),
            });
        }
        let Some(event) = log.normalized_event.clone() else {
            return Err(PipelineError::Replay {
                message: "claim has no normalized event snapshot".to_string(),
            });
        };

        let transaction = match log.transaction_id {
            Some(id) => self
                .storage
                .find_transaction(&TransactionQuery::ById(id))
                .await
                .map_err(PipelineError::Persist)?,
            None => None,
        };

        let payload = DispatchPayload {
            event_type: event.event_type,
            transaction,
            webhook_log_id: Some(log.id),
            normalized: Some(event),
            metadata: json!({ "replay": true }),
        };
        Ok(self.dispatcher.dispatch(&payload, true).await)
    }
}
