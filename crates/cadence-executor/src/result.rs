//! Job and step execution results.

use serde::Serialize;

use crate::error::StepError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
  Succeeded,
  Failed,
}

/// What a cache step did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum CacheOutcome {
  /// An entry was found and unpacked into the working directory.
  Restored { key: String },
  /// No key matched.
  Miss,
  /// The paths were archived and stored.
  Saved { key: String },
  /// An entry already exists under the key; nothing was uploaded.
  Exists { key: String },
  /// The cache could not be used; treated as a miss.
  Error { message: String },
}

/// Result of a single step.
#[derive(Debug, Clone, Serialize)]
pub struct StepResult {
  pub name: String,
  pub status: StepStatus,
  /// Exit code of a `run` step that ran to completion.
  #[serde(skip_serializing_if = "Option::is_none")]
  pub exit_code: Option<i32>,
  pub duration_ms: u64,
  /// Retained output, after pruning.
  #[serde(skip_serializing_if = "Vec::is_empty")]
  pub output: Vec<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub cache: Option<CacheOutcome>,
}

/// Result of executing a whole job.
#[derive(Debug)]
pub struct JobOutcome {
  /// Results for every step that started, in order.
  pub steps: Vec<StepResult>,
  /// The error that stopped the job, if any.
  pub error: Option<StepError>,
}

impl JobOutcome {
  pub fn succeeded(steps: Vec<StepResult>) -> Self {
    Self { steps, error: None }
  }

  pub fn failed(steps: Vec<StepResult>, error: StepError) -> Self {
    Self {
      steps,
      error: Some(error),
    }
  }

  pub fn is_success(&self) -> bool {
    self.error.is_none()
  }
}
