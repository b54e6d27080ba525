//! Pipeline scheduler.
//!
//! The `Scheduler` dispatches ready jobs up to a concurrency ceiling and
//! propagates failures to their dependents as skips.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use cadence_executor::{
  ExecutionEvent, ExecutionNotifier, JobContext, JobExecutor, JobOutcome, NoopNotifier,
};
use cadence_workflow::Pipeline;
use serde::Serialize;
use tokio::task::{self, JoinError, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::run::{Run, RunStatus, RunTable};

const CANCELLED_REASON: &str = "pipeline cancelled";

/// Running job tasks and the job each task belongs to.
#[derive(Default)]
struct InFlight {
  tasks: JoinSet<JobOutcome>,
  jobs: HashMap<task::Id, String>,
}

impl InFlight {
  fn len(&self) -> usize {
    self.tasks.len()
  }

  fn is_empty(&self) -> bool {
    self.tasks.is_empty()
  }

  /// Wait for the next task. A task that panicked or was aborted still
  /// yields its job, with the join error in place of an outcome.
  async fn next(&mut self) -> Option<(String, Result<JobOutcome, JoinError>)> {
    loop {
      let (id, result) = match self.tasks.join_next_with_id().await? {
        Ok((id, outcome)) => (id, Ok(outcome)),
        Err(e) => (e.id(), Err(e)),
      };
      match self.jobs.remove(&id) {
        Some(job) => return Some((job, result)),
        None => warn!(task = %id, "untracked_job_task"),
      }
    }
  }
}

/// Result of a complete pipeline run.
#[derive(Debug, Clone, Serialize)]
pub struct PipelineReport {
  pub run_id: String,
  pub success: bool,
  pub cancelled: bool,
  pub duration_ms: u64,
  /// One entry per job, in dispatch order.
  pub runs: Vec<Run>,
}

impl PipelineReport {
  pub fn run(&self, job: &str) -> Option<&Run> {
    self.runs.iter().find(|run| run.job == job)
  }

  pub fn status(&self, job: &str) -> Option<RunStatus> {
    self.run(job).map(|run| run.status)
  }

  pub fn count(&self, status: RunStatus) -> usize {
    self.runs.iter().filter(|run| run.status == status).count()
  }
}

/// Dispatches a pipeline's jobs through a [`JobExecutor`].
pub struct Scheduler {
  executor: Arc<dyn JobExecutor>,
  notifier: Arc<dyn ExecutionNotifier>,
  concurrency: usize,
}

impl Scheduler {
  /// Create a scheduler with no-op notifications.
  ///
  /// A ceiling of zero is raised to one.
  pub fn new(executor: Arc<dyn JobExecutor>, concurrency: usize) -> Self {
    Self::with_notifier(executor, concurrency, Arc::new(NoopNotifier))
  }

  pub fn with_notifier(
    executor: Arc<dyn JobExecutor>,
    concurrency: usize,
    notifier: Arc<dyn ExecutionNotifier>,
  ) -> Self {
    Self {
      executor,
      notifier,
      concurrency: concurrency.max(1),
    }
  }

  pub fn concurrency(&self) -> usize {
    self.concurrency
  }

  /// Run every job of the pipeline to a terminal state.
  ///
  /// Cancelling `cancel` stops dispatch: in-flight jobs observe the token and
  /// fail, every still-pending job is skipped.
  #[instrument(name = "pipeline_run", skip_all, fields(jobs = pipeline.len(), concurrency = self.concurrency))]
  pub async fn run(&self, pipeline: &Pipeline, cancel: CancellationToken) -> PipelineReport {
    let run_id = uuid::Uuid::new_v4().to_string();
    let started = Instant::now();
    let graph = pipeline.graph();
    let mut table = RunTable::new(graph.topological_order());
    let mut in_flight = InFlight::default();
    let mut cancelled = false;

    info!(run_id = %run_id, "pipeline_started");
    self.notifier.notify(ExecutionEvent::PipelineStarted {
      run_id: run_id.clone(),
      jobs: pipeline.len(),
    });

    loop {
      if !cancelled {
        self.dispatch_ready(pipeline, &mut table, &mut in_flight, &run_id, &cancel);
      }

      if in_flight.is_empty() {
        break;
      }

      tokio::select! {
        joined = in_flight.next() => match joined {
          Some((job_id, outcome)) => {
            self.finish_job(pipeline, &mut table, &run_id, &job_id, outcome);
          }
          None => break,
        },
        _ = cancel.cancelled(), if !cancelled => {
          cancelled = true;
          warn!(run_id = %run_id, running = in_flight.len(), "pipeline_cancelled");
          for job_id in table.order().to_vec() {
            self.skip_job(&mut table, &run_id, &job_id, None, CANCELLED_REASON);
          }
        }
      }
    }

    // Anything left pending could not be reached
    for job_id in table.order().to_vec() {
      if table.status(&job_id) == Some(RunStatus::Pending) {
        self.skip_job(&mut table, &run_id, &job_id, None, "not reachable");
      }
    }

    let success = table.count(RunStatus::Succeeded) == pipeline.len();
    let duration_ms = started.elapsed().as_millis() as u64;
    info!(
      run_id = %run_id,
      success,
      succeeded = table.count(RunStatus::Succeeded),
      failed = table.count(RunStatus::Failed),
      skipped = table.count(RunStatus::Skipped),
      duration_ms,
      "pipeline_finished"
    );
    self.notifier.notify(ExecutionEvent::PipelineFinished {
      run_id: run_id.clone(),
      success,
      duration_ms,
    });

    PipelineReport {
      run_id,
      success,
      cancelled,
      duration_ms,
      runs: table.into_runs(),
    }
  }

  /// Start ready jobs in topological order until the ceiling is reached.
  fn dispatch_ready(
    &self,
    pipeline: &Pipeline,
    table: &mut RunTable,
    in_flight: &mut InFlight,
    run_id: &str,
    cancel: &CancellationToken,
  ) {
    let graph = pipeline.graph();

    for job_id in table.order().to_vec() {
      if in_flight.len() >= self.concurrency {
        break;
      }
      if !table.is_ready(&job_id, graph) {
        continue;
      }
      let Some(job) = pipeline.job(&job_id) else {
        continue;
      };

      table.mark_running(&job_id);
      debug!(job = %job_id, running = in_flight.len() + 1, "job_dispatched");
      self.notifier.notify(ExecutionEvent::JobStarted {
        run_id: run_id.to_string(),
        job: job_id.clone(),
      });

      let executor = self.executor.clone();
      let job = job.clone();
      let ctx = JobContext {
        run_id: run_id.to_string(),
        notifier: self.notifier.clone(),
        cancel: cancel.clone(),
      };
      let handle = in_flight
        .tasks
        .spawn(async move { executor.execute(&job, &ctx).await });
      in_flight.jobs.insert(handle.id(), job_id);
    }
  }

  fn finish_job(
    &self,
    pipeline: &Pipeline,
    table: &mut RunTable,
    run_id: &str,
    job_id: &str,
    outcome: Result<JobOutcome, JoinError>,
  ) {
    let status = match outcome {
      Ok(outcome) => table.mark_finished(job_id, outcome),
      Err(e) => {
        let message = if e.is_panic() {
          format!("executor panicked: {}", panic_message(e.into_panic().as_ref()))
        } else {
          format!("job task stopped: {e}")
        };
        error!(job = %job_id, error = %message, "job_crashed");
        table
          .mark_crashed(job_id, message)
          .then_some(RunStatus::Failed)
      }
    };
    let Some(status) = status else {
      return;
    };
    let Some(run) = table.get(job_id) else {
      return;
    };

    self.notifier.notify(ExecutionEvent::JobFinished {
      run_id: run_id.to_string(),
      job: job_id.to_string(),
      success: status == RunStatus::Succeeded,
      duration_ms: run.duration_ms.unwrap_or(0),
      error: run.error.clone(),
    });

    if status == RunStatus::Failed {
      let reason = format!("required job '{job_id}' failed");
      for dependent in pipeline.graph().transitive_dependents(job_id) {
        self.skip_job(table, run_id, &dependent, Some(job_id), &reason);
      }
    }
  }

  fn skip_job(
    &self,
    table: &mut RunTable,
    run_id: &str,
    job_id: &str,
    because: Option<&str>,
    reason: &str,
  ) {
    if table.mark_skipped(job_id, because) {
      debug!(job = %job_id, reason = %reason, "job_skipped");
      self.notifier.notify(ExecutionEvent::JobSkipped {
        run_id: run_id.to_string(),
        job: job_id.to_string(),
        reason: reason.to_string(),
      });
    }
  }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
  if let Some(s) = panic.downcast_ref::<&str>() {
    s.to_string()
  } else if let Some(s) = panic.downcast_ref::<String>() {
    s.clone()
  } else {
    "unknown panic".to_string()
  }
}
