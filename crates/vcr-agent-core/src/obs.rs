//! Structured observability hooks for pipeline runs.
//!
//! - `RunSpan` scopes every event of a run under a `vcr.run` span
//! - `emit_*` functions log lifecycle events with an `event` field
//!
//! The run's status log is separate: it is data returned to the caller.

use std::future::Future;

use tracing::instrument::Instrumented;
use tracing::{info, warn, Instrument};

use crate::domain::Stage;

/// Run-scoped tracing span.
///
/// Runs are async and may hop threads, so the span is attached to the run's
/// future rather than entered on the current thread.
///
/// ```ignore
/// let span = RunSpan::new("6f1c...");
/// span.wrap(async { /* run */ }).await;
/// ```
#[derive(Debug, Clone)]
pub struct RunSpan {
    span: tracing::Span,
}

impl RunSpan {
    pub fn new(run_id: &str) -> Self {
        Self {
            span: tracing::info_span!("vcr.run", run_id = %run_id),
        }
    }

    pub fn wrap<F: Future>(&self, future: F) -> Instrumented<F> {
        future.instrument(self.span.clone())
    }
}

/// Emit event: run started.
pub fn emit_run_started(run_id: &str, pipeline: &str) {
    info!(event = "run.started", run_id = %run_id, pipeline = %pipeline);
}

/// Emit event: the run entered a new stage.
pub fn emit_stage_entered(run_id: &str, stage: Stage) {
    info!(event = "run.stage_entered", run_id = %run_id, stage = %stage);
}

/// Emit event: run finished.
pub fn emit_run_finished(run_id: &str, duration_ms: u64, success: bool) {
    info!(
        event = "run.finished",
        run_id = %run_id,
        duration_ms = duration_ms,
        success = success,
    );
}

/// Emit event: a non-fatal problem was absorbed (context, lint).
pub fn emit_degraded(run_id: &str, stage: Stage, reason: &dyn std::fmt::Display) {
    warn!(event = "run.degraded", run_id = %run_id, stage = %stage, reason = %reason);
}

/// Emit event: the run failed.
pub fn emit_run_failed(run_id: &str, error: &dyn std::fmt::Display) {
    warn!(event = "run.failed", run_id = %run_id, error = %error);
}
