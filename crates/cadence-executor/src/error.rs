//! Step execution errors.

use std::path::PathBuf;
use std::time::Duration;

/// Errors that stop a job.
#[derive(Debug, thiserror::Error)]
pub enum StepError {
  /// A `run` step exited non-zero. Signal termination reports `-1`.
  #[error("step '{step}' exited with code {exit_code}")]
  Failed { step: String, exit_code: i32 },

  /// A `run` step produced no output for longer than its bound.
  #[error("step '{step}' produced no output for {}s", .after.as_secs_f64())]
  Timeout { step: String, after: Duration },

  /// The step's process could not be started.
  #[error("failed to start step '{step}': {source}")]
  Spawn {
    step: String,
    #[source]
    source: std::io::Error,
  },

  /// The job's working directory could not be created.
  #[error("failed to prepare working directory {path}: {source}")]
  WorkingDirectory {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  /// Execution was cancelled.
  #[error("cancelled")]
  Cancelled,
}
