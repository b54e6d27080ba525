//! Cache key rendering using minijinja templates.
//!
//! Key templates are rendered against a small context:
//!
//! - `checksum(path)`: hex SHA-256 of a file, relative to the job's working directory
//! - `job`: the job identifier
//! - `arch` / `os`: the host platform
//! - `env.NAME`: the job's environment variables
//!
//! ```text
//! v1-{{ os }}-{{ arch }}-deps-{{ checksum('Cargo.lock') }}
//! ```
//!
//! Undefined variables are an error, so a typo never silently collapses two
//! keys into one.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use minijinja::{Environment, ErrorKind, UndefinedBehavior, context};
use sha2::{Digest, Sha256};

use crate::error::CacheError;

/// Values available to key templates.
#[derive(Debug, Clone, Default)]
pub struct KeyContext {
  pub job: String,
  /// Base directory for `checksum(...)` paths.
  pub working_dir: PathBuf,
  pub env: BTreeMap<String, String>,
}

/// Hex SHA-256 of a file's contents.
pub fn checksum_file(path: &Path) -> Result<String, CacheError> {
  let data = std::fs::read(path).map_err(|source| CacheError::Checksum {
    path: path.to_path_buf(),
    source,
  })?;
  Ok(hex::encode(Sha256::digest(&data)))
}

/// Render a key template. The result is trimmed and must not be empty.
pub fn render_key(template: &str, ctx: &KeyContext) -> Result<String, CacheError> {
  let mut env = Environment::new();
  env.set_undefined_behavior(UndefinedBehavior::Strict);

  let base = ctx.working_dir.clone();
  env.add_function("checksum", move |path: String| {
    checksum_file(&base.join(&path))
      .map_err(|e| minijinja::Error::new(ErrorKind::InvalidOperation, e.to_string()))
  });

  let rendered = env
    .render_str(
      template,
      context! {
        job => ctx.job,
        arch => std::env::consts::ARCH,
        os => std::env::consts::OS,
        env => ctx.env,
      },
    )
    .map_err(|e| CacheError::KeyTemplate {
      template: template.to_string(),
      message: e.to_string(),
    })?;

  let key = rendered.trim().to_string();
  if key.is_empty() {
    return Err(CacheError::KeyTemplate {
      template: template.to_string(),
      message: "rendered to an empty key".to_string(),
    });
  }
  Ok(key)
}

#[cfg(test)]
mod tests {
  use super::*;

  fn context_in(dir: &Path) -> KeyContext {
    KeyContext {
      job: "fetch".to_string(),
      working_dir: dir.to_path_buf(),
      env: BTreeMap::from([("TOOLCHAIN".to_string(), "stable".to_string())]),
    }
  }

  #[test]
  fn plain_keys_pass_through() {
    let dir = tempfile::tempdir().unwrap();
    assert_eq!(
      render_key("v1-deps-", &context_in(dir.path())).unwrap(),
      "v1-deps-"
    );
  }

  #[test]
  fn checksum_tracks_file_contents() {
    let dir = tempfile::tempdir().unwrap();
    let ctx = context_in(dir.path());
    std::fs::write(dir.path().join("Cargo.lock"), "version = 1").unwrap();

    let first = render_key("deps-{{ checksum('Cargo.lock') }}", &ctx).unwrap();
    let again = render_key("deps-{{ checksum('Cargo.lock') }}", &ctx).unwrap();
    assert_eq!(first, again);
    assert_eq!(first.len(), "deps-".len() + 64);

    std::fs::write(dir.path().join("Cargo.lock"), "version = 2").unwrap();
    let changed = render_key("deps-{{ checksum('Cargo.lock') }}", &ctx).unwrap();
    assert_ne!(first, changed);
  }

  #[test]
  fn renders_context_values() {
    let dir = tempfile::tempdir().unwrap();
    let key = render_key(
      "{{ job }}-{{ env.TOOLCHAIN }}-{{ os }}",
      &context_in(dir.path()),
    )
    .unwrap();
    assert_eq!(key, format!("fetch-stable-{}", std::env::consts::OS));
  }

  #[test]
  fn missing_checksum_file_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let err = render_key("{{ checksum('nope.lock') }}", &context_in(dir.path())).unwrap_err();
    assert!(matches!(err, CacheError::KeyTemplate { .. }));
  }

  #[test]
  fn undefined_variables_are_errors() {
    let dir = tempfile::tempdir().unwrap();
    assert!(render_key("{{ env.MISSING }}", &context_in(dir.path())).is_err());
    assert!(render_key("{{ branch }}", &context_in(dir.path())).is_err());
  }

  #[test]
  fn empty_render_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    assert!(render_key("   ", &context_in(dir.path())).is_err());
  }
}
