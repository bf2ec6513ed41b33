//! Local cache persistence for the vAtom data pool.
//!
//! Regions keep their objects in memory; this crate gives them a warm start
//! across launches. Memory is always authoritative, so every failure here is
//! something the caller logs and moves past.
//!
//! # Architecture
//!
//! - [`LocalPersistence`] is the seam regions write through
//! - [`FileCacheStore`] keeps one JSON file per region under a cache directory
//! - [`MemoryCacheStore`] keeps encoded snapshots in memory (tests, ephemeral sessions)
//! - Every snapshot is wrapped in a versioned envelope; a version mismatch
//!   reads as a cache miss

mod error;
mod file_store;
mod format;
mod memory_store;

pub use error::{StorageError, StorageResult};
pub use file_store::FileCacheStore;
pub use format::{CACHE_FORMAT_VERSION, CacheEnvelope, decode_snapshot, encode_snapshot};
pub use memory_store::MemoryCacheStore;

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use vatomsync_types::DataObject;

/// Durable storage for region snapshots, addressed by a region's state key.
#[async_trait]
pub trait LocalPersistence: Send + Sync {
    /// Loads the snapshot saved under `key`, or `None` if there is none (or it
    /// was written by an incompatible version).
    async fn load(&self, key: &str) -> StorageResult<Option<Vec<DataObject>>>;

    /// Replaces the snapshot saved under `key`.
    async fn save(&self, key: &str, objects: &[DataObject]) -> StorageResult<()>;

    /// Deletes the snapshot saved under `key`. Missing snapshots are not an error.
    async fn remove(&self, key: &str) -> StorageResult<()>;
}

const MAX_READABLE_PREFIX: usize = 48;

/// Transforms a state key into a filesystem-safe, collision-resistant name.
///
/// Keeps a readable prefix of `[A-Za-z0-9_-]` (other characters become `_`)
/// and appends the first 16 hex digits of the key's SHA-256 so that keys
/// differing only in replaced characters still map to distinct names.
pub fn safe_key(key: &str) -> String {
    let readable: String = key
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .take(MAX_READABLE_PREFIX)
        .collect();
    let digest = Sha256::digest(key.as_bytes());
    format!("{}-{}", readable, &hex::encode(digest)[..16])
}
