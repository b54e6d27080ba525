use std::path::{Path, PathBuf};
use std::time::SystemTime;

use async_trait::async_trait;
use bytes::Bytes;
use sha2::{Digest, Sha256};
use tokio::fs;

use crate::{CacheError, CacheStore};

const ENTRY_EXTENSION: &str = "blob";
const KEY_EXTENSION: &str = "key";

/// Filesystem-based cache store.
///
/// Each entry is stored at `{base_path}/{sha256(key)}.blob` with the original
/// key text beside it in `{sha256(key)}.key`, so file names stay short no
/// matter how long the key is. Writes go to a temporary file that is renamed
/// into place, so concurrent readers never observe a partial blob.
pub struct FsCache {
  base_path: PathBuf,
}

impl FsCache {
  /// Create a new filesystem cache rooted at the given path.
  pub fn new(base_path: impl Into<PathBuf>) -> Self {
    Self {
      base_path: base_path.into(),
    }
  }

  fn entry_name(key: &str) -> String {
    hex::encode(Sha256::digest(key.as_bytes()))
  }

  fn key_to_path(&self, key: &str) -> PathBuf {
    self
      .base_path
      .join(format!("{}.{ENTRY_EXTENSION}", Self::entry_name(key)))
  }

  fn key_file_path(&self, key: &str) -> PathBuf {
    self
      .base_path
      .join(format!("{}.{KEY_EXTENSION}", Self::entry_name(key)))
  }

  async fn write_atomic(&self, path: &Path, data: &[u8], key: &str) -> Result<(), CacheError> {
    let tmp = self
      .base_path
      .join(format!(".{}.tmp", uuid::Uuid::new_v4()));

    fs::write(&tmp, data).await.map_err(io_error(key))?;
    if let Err(e) = fs::rename(&tmp, path).await {
      let _ = fs::remove_file(&tmp).await;
      return Err(io_error(key)(e));
    }
    Ok(())
  }
}

fn io_error(key: &str) -> impl FnOnce(std::io::Error) -> CacheError + '_ {
  move |source| CacheError::Io {
    key: key.to_string(),
    source,
  }
}

#[async_trait]
impl CacheStore for FsCache {
  async fn get(&self, key: &str) -> Result<Option<Bytes>, CacheError> {
    match fs::read(self.key_to_path(key)).await {
      Ok(data) => Ok(Some(Bytes::from(data))),
      Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
      Err(e) => Err(io_error(key)(e)),
    }
  }

  async fn put(&self, key: &str, blob: Bytes) -> Result<(), CacheError> {
    fs::create_dir_all(&self.base_path)
      .await
      .map_err(io_error(key))?;

    // Blob first: a key file always points at a complete entry
    self.write_atomic(&self.key_to_path(key), &blob, key).await?;
    self
      .write_atomic(&self.key_file_path(key), key.as_bytes(), key)
      .await
  }

  async fn contains(&self, key: &str) -> Result<bool, CacheError> {
    fs::try_exists(self.key_to_path(key))
      .await
      .map_err(io_error(key))
  }

  async fn find_prefix(&self, prefix: &str) -> Result<Option<String>, CacheError> {
    let mut entries = match fs::read_dir(&self.base_path).await {
      Ok(entries) => entries,
      Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
      Err(e) => return Err(io_error(prefix)(e)),
    };

    let mut best: Option<(SystemTime, String)> = None;
    while let Some(entry) = entries.next_entry().await.map_err(io_error(prefix))? {
      let path = entry.path();
      if path.extension().and_then(|ext| ext.to_str()) != Some(KEY_EXTENSION) {
        continue;
      }
      let key = match fs::read_to_string(&path).await {
        Ok(key) => key,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
        Err(e) => return Err(io_error(prefix)(e)),
      };
      if !key.starts_with(prefix) {
        continue;
      }
      let modified = match fs::metadata(self.key_to_path(&key)).await {
        Ok(meta) => meta.modified().map_err(io_error(&key))?,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
        Err(e) => return Err(io_error(&key)(e)),
      };
      // Equal timestamps fall back to the greater key
      let newer = match &best {
        Some((when, best_key)) => (modified, &key) > (*when, best_key),
        None => true,
      };
      if newer {
        best = Some((modified, key));
      }
    }

    Ok(best.map(|(_, key)| key))
  }
}
