//! Per-job run state.

use std::collections::BTreeMap;
use std::time::Instant;

use cadence_executor::{JobOutcome, StepResult};
use cadence_workflow::Graph;
use serde::Serialize;
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
  Pending,
  Running,
  Succeeded,
  Failed,
  Skipped,
}

impl RunStatus {
  pub fn is_terminal(self) -> bool {
    matches!(
      self,
      RunStatus::Succeeded | RunStatus::Failed | RunStatus::Skipped
    )
  }
}

impl std::fmt::Display for RunStatus {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    let s = match self {
      RunStatus::Pending => "pending",
      RunStatus::Running => "running",
      RunStatus::Succeeded => "succeeded",
      RunStatus::Failed => "failed",
      RunStatus::Skipped => "skipped",
    };
    f.write_str(s)
  }
}

/// One execution attempt of a job.
#[derive(Debug, Clone, Serialize)]
pub struct Run {
  pub job: String,
  pub status: RunStatus,
  /// Milliseconds from pipeline start to dispatch.
  #[serde(skip_serializing_if = "Option::is_none")]
  pub started_ms: Option<u64>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub duration_ms: Option<u64>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub error: Option<String>,
  /// The job whose failure caused this one to be skipped.
  #[serde(skip_serializing_if = "Option::is_none")]
  pub skipped_because: Option<String>,
  #[serde(skip_serializing_if = "Vec::is_empty")]
  pub steps: Vec<StepResult>,
  #[serde(skip)]
  started: Option<Instant>,
}

impl Run {
  fn new(job: String) -> Self {
    Self {
      job,
      status: RunStatus::Pending,
      started_ms: None,
      duration_ms: None,
      error: None,
      skipped_because: None,
      steps: Vec::new(),
      started: None,
    }
  }
}

/// The pipeline's only mutable state: one [`Run`] per job.
///
/// Transitions are one-way: `pending -> running -> succeeded | failed` or
/// `pending -> skipped`. Requests for any other transition are ignored.
#[derive(Debug)]
pub struct RunTable {
  runs: BTreeMap<String, Run>,
  /// Job ids in dispatch (topological) order.
  order: Vec<String>,
  created: Instant,
}

impl RunTable {
  /// Create a table with every job pending. `order` fixes the iteration order.
  pub fn new(order: Vec<String>) -> Self {
    let runs = order
      .iter()
      .map(|id| (id.clone(), Run::new(id.clone())))
      .collect();
    Self {
      runs,
      order,
      created: Instant::now(),
    }
  }

  pub fn get(&self, job: &str) -> Option<&Run> {
    self.runs.get(job)
  }

  pub fn status(&self, job: &str) -> Option<RunStatus> {
    self.runs.get(job).map(|run| run.status)
  }

  /// Job ids in dispatch order.
  pub fn order(&self) -> &[String] {
    &self.order
  }

  /// A job is ready when it is pending and everything it requires succeeded.
  pub fn is_ready(&self, job: &str, graph: &Graph) -> bool {
    self.status(job) == Some(RunStatus::Pending)
      && graph
        .upstream(job)
        .iter()
        .all(|up| self.status(up) == Some(RunStatus::Succeeded))
  }

  pub fn all_terminal(&self) -> bool {
    self.runs.values().all(|run| run.status.is_terminal())
  }

  pub fn count(&self, status: RunStatus) -> usize {
    self.runs.values().filter(|run| run.status == status).count()
  }

  fn transition(&mut self, job: &str, from: RunStatus, to: RunStatus) -> Option<&mut Run> {
    match self.runs.get_mut(job) {
      Some(run) if run.status == from => {
        run.status = to;
        Some(run)
      }
      Some(run) => {
        warn!(job = %job, from = %run.status, to = %to, "invalid_run_transition");
        None
      }
      None => {
        warn!(job = %job, "unknown_job_in_run_table");
        None
      }
    }
  }

  pub fn mark_running(&mut self, job: &str) -> bool {
    let offset = self.created.elapsed().as_millis() as u64;
    match self.transition(job, RunStatus::Pending, RunStatus::Running) {
      Some(run) => {
        run.started = Some(Instant::now());
        run.started_ms = Some(offset);
        true
      }
      None => false,
    }
  }

  /// Record a running job's outcome. Returns the resulting status.
  pub fn mark_finished(&mut self, job: &str, outcome: JobOutcome) -> Option<RunStatus> {
    let status = if outcome.is_success() {
      RunStatus::Succeeded
    } else {
      RunStatus::Failed
    };
    let run = self.transition(job, RunStatus::Running, status)?;
    run.duration_ms = run.started.map(|at| at.elapsed().as_millis() as u64);
    run.error = outcome.error.map(|e| e.to_string());
    run.steps = outcome.steps;
    Some(status)
  }

  /// Record an executor that died without reporting an outcome.
  pub fn mark_crashed(&mut self, job: &str, error: String) -> bool {
    match self.transition(job, RunStatus::Running, RunStatus::Failed) {
      Some(run) => {
        run.duration_ms = run.started.map(|at| at.elapsed().as_millis() as u64);
        run.error = Some(error);
        true
      }
      None => false,
    }
  }

  /// Skip a pending job. Returns false if the job was not pending.
  pub fn mark_skipped(&mut self, job: &str, because: Option<&str>) -> bool {
    if self.status(job) != Some(RunStatus::Pending) {
      return false;
    }
    match self.transition(job, RunStatus::Pending, RunStatus::Skipped) {
      Some(run) => {
        run.skipped_because = because.map(str::to_string);
        true
      }
      None => false,
    }
  }

  pub fn into_runs(mut self) -> Vec<Run> {
    self
      .order
      .iter()
      .filter_map(|id| self.runs.remove(id))
      .collect()
  }
}
