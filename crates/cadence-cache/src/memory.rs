use std::collections::HashMap;
use std::sync::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use bytes::Bytes;

use crate::{CacheError, CacheStore};

/// In-process cache store, used for tests and single-run pipelines.
#[derive(Default)]
pub struct MemoryCache {
  entries: RwLock<HashMap<String, (u64, Bytes)>>,
  /// Write sequence, used to pick the newest prefix match.
  sequence: AtomicU64,
}

impl MemoryCache {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn len(&self) -> usize {
    self.entries.read().map(|e| e.len()).unwrap_or(0)
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }
}

#[async_trait]
impl CacheStore for MemoryCache {
  async fn get(&self, key: &str) -> Result<Option<Bytes>, CacheError> {
    let entries = self.entries.read().map_err(|_| CacheError::Poisoned)?;
    Ok(entries.get(key).map(|(_, blob)| blob.clone()))
  }

  async fn put(&self, key: &str, blob: Bytes) -> Result<(), CacheError> {
    let seq = self.sequence.fetch_add(1, Ordering::Relaxed);
    let mut entries = self.entries.write().map_err(|_| CacheError::Poisoned)?;
    entries.insert(key.to_string(), (seq, blob));
    Ok(())
  }

  async fn contains(&self, key: &str) -> Result<bool, CacheError> {
    let entries = self.entries.read().map_err(|_| CacheError::Poisoned)?;
    Ok(entries.contains_key(key))
  }

  async fn find_prefix(&self, prefix: &str) -> Result<Option<String>, CacheError> {
    let entries = self.entries.read().map_err(|_| CacheError::Poisoned)?;
    Ok(
      entries
        .iter()
        .filter(|(key, _)| key.starts_with(prefix))
        .max_by_key(|(_, (seq, _))| *seq)
        .map(|(key, _)| key.clone()),
    )
  }
}
