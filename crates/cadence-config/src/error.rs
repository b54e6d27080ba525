//! Configuration loading errors.

use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur while reading a pipeline definition.
#[derive(Debug, Error)]
pub enum LoadError {
  #[error("failed to read {path}: {source}")]
  Io {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error("invalid YAML pipeline definition: {0}")]
  Yaml(#[from] serde_yaml::Error),

  #[error("invalid JSON pipeline definition: {0}")]
  Json(#[from] serde_json::Error),

  #[error("invalid duration '{value}': {message}")]
  InvalidDuration { value: String, message: String },
}
