//! Orchestrator: composes role agents into tasks.
//!
//! Three modes. Single-role is the interactive default; the pipeline chains
//! planner → coder → reviewer under per-role deadlines; the test-and-fix loop
//! alternates the test runner with the coder until green or the cap. Every
//! role step gets a monotonic timing and a latency observation; every task
//! gets an outcome counter.

mod pipeline;
mod testfix;

pub use pipeline::{run_pipeline, run_single_role, PipelineConfig};
pub use testfix::{run_test_fix, FixLoopConfig, FixOutcome, FixReport};

use std::time::Duration;

use crate::roles::RoleKind;

/// Timing for one executed role step.
#[derive(Clone, Debug)]
pub struct RoleTiming {
    pub role: RoleKind,
    pub elapsed: Duration,
    /// Soft deadline exceeded (warned) or hard deadline hit (cancelled).
    pub degraded: bool,
}

/// Result of one orchestrated task.
#[derive(Clone, Debug)]
pub struct TaskReport {
    pub task_id: String,
    pub content: String,
    pub timings: Vec<RoleTiming>,
    /// True when any role step was cut short by its hard deadline.
    pub degraded: bool,
}

pub(crate) fn observe_role(role: RoleKind, elapsed: Duration, ok: bool) {
    metrics::histogram!("quill_role_latency_seconds", "role" => role.as_str())
        .record(elapsed.as_secs_f64());
    metrics::counter!(
        "quill_role_outcome_total",
        "role" => role.as_str(),
        "outcome" => if ok { "ok" } else { "error" }
    )
    .increment(1);
}

pub(crate) fn observe_task(mode: &'static str, outcome: &'static str) {
    metrics::counter!("quill_task_outcome_total", "mode" => mode, "outcome" => outcome)
        .increment(1);
}
