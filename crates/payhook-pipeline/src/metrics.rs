//! Per-request pipeline metrics

use serde::{Deserialize, Serialize};

/// Booleans describing how far a claim got
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageFlags {
    pub signature_verified: bool,
    pub normalized: bool,
    pub persisted: bool,
    pub transition_applied: bool,
    pub dispatched: bool,
}

/// Timing and progress for one pipeline run
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PipelineMetrics {
    /// `(stage name, elapsed ms)` in execution order
    pub stage_durations_ms: Vec<(String, i64)>,
    pub flags: StageFlags,
    pub total_duration_ms: i64,
    pub timed_out: bool,
}

impl PipelineMetrics {
    /// Record one stage's elapsed time
    pub fn record_stage(&mut self, name: &str, elapsed_ms: i64) {
        self.stage_durations_ms.push((name.to_string(), elapsed_ms));
    }
}
