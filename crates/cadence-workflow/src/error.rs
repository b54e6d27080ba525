use thiserror::Error;

/// A pipeline definition that cannot be executed.
///
/// Always raised before any job is dispatched.
#[derive(Debug, Error)]
pub enum ConfigError {
  #[error("workflow contains no jobs")]
  EmptyWorkflow,

  #[error("workflow references undefined job '{job}'")]
  UnknownJob { job: String },

  #[error("job '{job}' requires undefined job '{requires}'")]
  UnknownDependency { job: String, requires: String },

  #[error("job '{job}' requires itself")]
  SelfDependency { job: String },

  #[error("dependency cycle at edge '{job}' requires '{requires}': {}", .path.join(" -> "))]
  Cycle {
    job: String,
    requires: String,
    path: Vec<String>,
  },

  #[error("job '{job}' step {index}: {message}")]
  InvalidStep {
    job: String,
    index: usize,
    message: String,
  },

  #[error("concurrency must be at least 1")]
  InvalidConcurrency,
}
