//! Stage contract
//!
//! Stages return tagged outcomes instead of raising: only the persist
//! stage (no durable record possible) and the pipeline timeout escape the
//! stage path. Stages never retry internally.

use crate::context::WebhookContext;
use async_trait::async_trait;

/// What a stage reports back to the processor
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageOutcome {
    /// Whether the stage did what it is for
    pub success: bool,
    /// `false` terminates the pipeline with the current fate
    pub should_continue: bool,
    /// Operator-facing detail for failures
    pub error: Option<String>,
}

impl StageOutcome {
    /// Stage succeeded, keep going
    pub fn proceed() -> Self {
        Self {
            success: true,
            should_continue: true,
            error: None,
        }
    }

    /// Stage concluded the pipeline (the fate is already on the context)
    pub fn stop() -> Self {
        Self {
            success: true,
            should_continue: false,
            error: None,
        }
    }

    /// Stage failed but the pipeline can keep going (soft failure)
    pub fn soft_fail(error: impl Into<String>) -> Self {
        Self {
            success: false,
            should_continue: true,
            error: Some(error.into()),
        }
    }

    /// Stage failed and the pipeline must end here
    pub fn halt(error: impl Into<String>) -> Self {
        Self {
            success: false,
            should_continue: false,
            error: Some(error.into()),
        }
    }
}

/// One pipeline stage
#[async_trait]
pub trait Stage: Send + Sync {
    /// Stable stage name for metrics and logs
    fn name(&self) -> &'static str;

    /// Perform this stage's contract against the context
    async fn run(&self, ctx: &mut WebhookContext) -> StageOutcome;
}
