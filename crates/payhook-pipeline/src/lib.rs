//! PayHook Processing Pipeline
//!
//! Seven-stage conversion of an opaque HTTP body into a classified fate:
//!
//! 1. verification - signature check against the provider adapter
//! 2. normalization - parse and translate into the canonical taxonomy
//! 3. persist-claim - durable, redacted record of the attempt
//! 4. deduplication - idempotency-key lookup against prior claims
//! 5. state engine - locked, audited transaction transition
//! 6. dispatch - outbox write or inline handler fan-out
//!
//! (The seventh "stage" is the processor itself: timeout, metrics,
//! finalization, and lifecycle hooks around the other six.)
//!
//! No stage throws to the HTTP boundary. Every claim terminates with a
//! fate, and errors inside the pipeline become fates rather than
//! propagating - the processor returns a result unless explicitly
//! configured to raise.

pub mod config;
pub mod context;
pub mod hooks;
pub mod metrics;
pub mod processor;
pub mod redact;
pub mod stage;
pub mod stages;

pub use config::ProcessorConfig;
pub use context::WebhookContext;
pub use hooks::{FateSummary, LifecycleHooks, NoopHooks};
pub use metrics::PipelineMetrics;
pub use processor::{ManualTransitionRequest, ProcessingResult, WebhookProcessor};
pub use stage::{Stage, StageOutcome};

use thiserror::Error;

/// Errors the processor can raise when `throw_on_error` is enabled
#[derive(Debug, Error)]
pub enum PipelineError {
    /// The claim could not be durably recorded
    #[error("persist-claim failed: {0}")]
    Persist(#[from] payhook_storage::StorageError),

    /// The pipeline exceeded its deadline
    #[error("pipeline timeout after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    /// The claim terminated with a non-processed fate
    #[error("webhook fate {fate}: {message}")]
    Fate {
        fate: payhook_types::ProcessingStatus,
        message: String,
    },

    /// A dispatch replay could not be set up
    #[error("replay failed: {message}")]
    Replay { message: String },
}
