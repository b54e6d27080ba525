use std::path::PathBuf;

/// Error type for cache operations.
///
/// Callers treat every cache error as a miss; none of them fail a job.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
  /// An I/O error occurred while reading or writing an entry.
  #[error("cache io error for key '{key}': {source}")]
  Io {
    key: String,
    #[source]
    source: std::io::Error,
  },

  /// The in-memory store lock was poisoned by a panicking writer.
  #[error("cache lock poisoned")]
  Poisoned,

  /// Packing or unpacking an archive failed.
  #[error("cache archive error: {message}")]
  Archive { message: String },

  /// A key template could not be rendered.
  #[error("failed to render cache key '{template}': {message}")]
  KeyTemplate { template: String, message: String },

  /// A file named in `checksum(...)` could not be read.
  #[error("failed to checksum {path}: {source}")]
  Checksum {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },
}
