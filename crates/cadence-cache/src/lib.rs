//! Cadence Cache
//!
//! This crate provides the cache storage trait and implementations for cadence.
//! Cache entries are opaque blobs (usually gzip tar archives of dependency
//! directories) stored under keys rendered from templates such as
//! `v1-deps-{{ checksum('Cargo.lock') }}`.
//!
//! The [`CacheStore`] trait defines the backend layer. Implementations handle
//! the actual storage (filesystem, memory) while the executor renders keys and
//! packs or unpacks the archived paths.
//!
//! Keys are compared exactly: a changed checksum produces a new key, and the
//! old entry simply stops being used. There is no other invalidation.

mod archive;
mod error;
mod fs;
mod key;
mod memory;

pub use archive::{pack_paths, unpack};
pub use error::CacheError;
pub use fs::FsCache;
pub use key::{KeyContext, render_key};
pub use memory::MemoryCache;

use async_trait::async_trait;
use bytes::Bytes;

/// Cache storage trait.
///
/// Implementations must be safe to use from concurrently running jobs. Writes
/// to the same key overwrite the previous blob.
#[async_trait]
pub trait CacheStore: Send + Sync {
  /// Fetch the blob stored under `key`. `Ok(None)` is a miss.
  async fn get(&self, key: &str) -> Result<Option<Bytes>, CacheError>;

  /// Store a blob under `key`, replacing any previous entry.
  async fn put(&self, key: &str, blob: Bytes) -> Result<(), CacheError>;

  /// Whether an entry exists under exactly this key.
  async fn contains(&self, key: &str) -> Result<bool, CacheError>;

  /// The most recently written key starting with `prefix`, if any.
  async fn find_prefix(&self, prefix: &str) -> Result<Option<String>, CacheError>;
}
