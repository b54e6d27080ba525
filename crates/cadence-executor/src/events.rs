//! Execution events and notifiers for observability.
//!
//! Events are emitted while a pipeline runs so consumers can print live
//! output, persist progress or feed a UI. The scheduler emits pipeline and
//! job events; the executor emits step events.

use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Events emitted during pipeline execution.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ExecutionEvent {
  /// The pipeline run has started.
  PipelineStarted { run_id: String, jobs: usize },

  /// A job has been dispatched.
  JobStarted { run_id: String, job: String },

  /// A step within a job has started.
  StepStarted {
    run_id: String,
    job: String,
    index: usize,
    name: String,
  },

  /// One line of combined stdout/stderr from a running step.
  StepOutput {
    run_id: String,
    job: String,
    step: String,
    line: String,
  },

  /// A step has finished.
  StepFinished {
    run_id: String,
    job: String,
    index: usize,
    name: String,
    success: bool,
    duration_ms: u64,
  },

  /// A job reached `succeeded` or `failed`.
  JobFinished {
    run_id: String,
    job: String,
    success: bool,
    duration_ms: u64,
    error: Option<String>,
  },

  /// A job will never run because a job it requires did not succeed.
  JobSkipped {
    run_id: String,
    job: String,
    reason: String,
  },

  /// Every job reached a terminal state.
  PipelineFinished {
    run_id: String,
    success: bool,
    duration_ms: u64,
  },
}

/// Trait for receiving execution events.
///
/// The scheduler and executor call `notify` for each event; implementations
/// decide what to do with them (print, persist, broadcast, ignore).
pub trait ExecutionNotifier: Send + Sync {
  fn notify(&self, event: ExecutionEvent);
}

/// A no-op notifier that discards all events.
#[derive(Debug, Clone, Default)]
pub struct NoopNotifier;

impl ExecutionNotifier for NoopNotifier {
  fn notify(&self, _event: ExecutionEvent) {}
}

/// A notifier that sends events to an unbounded channel.
#[derive(Debug, Clone)]
pub struct ChannelNotifier {
  // Unbounded so a slow consumer never stalls a step's output stream.
  sender: mpsc::UnboundedSender<ExecutionEvent>,
}

impl ChannelNotifier {
  pub fn new(sender: mpsc::UnboundedSender<ExecutionEvent>) -> Self {
    Self { sender }
  }
}

impl ExecutionNotifier for ChannelNotifier {
  fn notify(&self, event: ExecutionEvent) {
    // Receiver may have been dropped
    let _ = self.sender.send(event);
  }
}

/// A notifier that turns events into `tracing` records.
///
/// Step output is logged at debug level, everything else at info (or warn
/// for failures and skips).
#[derive(Debug, Clone, Default)]
pub struct TracingNotifier;

impl ExecutionNotifier for TracingNotifier {
  fn notify(&self, event: ExecutionEvent) {
    match event {
      ExecutionEvent::PipelineStarted { run_id, jobs } => {
        info!(run_id = %run_id, jobs, "pipeline_started");
      }
      ExecutionEvent::JobStarted { run_id, job } => {
        info!(run_id = %run_id, job = %job, "job_started");
      }
      ExecutionEvent::StepStarted {
        run_id,
        job,
        index,
        name,
      } => {
        info!(run_id = %run_id, job = %job, index, step = %name, "step_started");
      }
      ExecutionEvent::StepOutput {
        job, step, line, ..
      } => {
        debug!(job = %job, step = %step, "{line}");
      }
      ExecutionEvent::StepFinished {
        run_id,
        job,
        index,
        name,
        success,
        duration_ms,
      } => {
        info!(run_id = %run_id, job = %job, index, step = %name, success, duration_ms, "step_finished");
      }
      ExecutionEvent::JobFinished {
        run_id,
        job,
        success: true,
        duration_ms,
        ..
      } => {
        info!(run_id = %run_id, job = %job, duration_ms, "job_succeeded");
      }
      ExecutionEvent::JobFinished {
        run_id,
        job,
        duration_ms,
        error,
        ..
      } => {
        warn!(
          run_id = %run_id,
          job = %job,
          duration_ms,
          error = error.as_deref().unwrap_or("unknown"),
          "job_failed"
        );
      }
      ExecutionEvent::JobSkipped {
        run_id,
        job,
        reason,
      } => {
        warn!(run_id = %run_id, job = %job, reason = %reason, "job_skipped");
      }
      ExecutionEvent::PipelineFinished {
        run_id,
        success,
        duration_ms,
      } => {
        info!(run_id = %run_id, success, duration_ms, "pipeline_finished");
      }
    }
  }
}
