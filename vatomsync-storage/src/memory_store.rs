use crate::error::{StorageError, StorageResult};
use crate::format::{decode_snapshot, encode_snapshot};
use crate::LocalPersistence;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use vatomsync_types::DataObject;

/// Keeps encoded snapshots in memory.
///
/// Snapshots go through the same envelope encoding as [`crate::FileCacheStore`],
/// so a round trip here exercises the on-disk format.
#[derive(Debug, Default)]
pub struct MemoryCacheStore {
    entries: Mutex<HashMap<String, Vec<u8>>>,
    saves: AtomicUsize,
}

impl MemoryCacheStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of successful `save` calls so far.
    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }

    /// Keys that currently hold a snapshot.
    pub fn keys(&self) -> Vec<String> {
        self.entries
            .lock()
            .map(|entries| entries.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Seeds a raw snapshot, bypassing encoding.
    pub fn insert_raw(&self, key: &str, bytes: Vec<u8>) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.insert(key.to_string(), bytes);
        }
    }

    fn lock_poisoned() -> StorageError {
        StorageError::InvalidData("memory store lock poisoned".into())
    }
}

#[async_trait]
impl LocalPersistence for MemoryCacheStore {
    async fn load(&self, key: &str) -> StorageResult<Option<Vec<DataObject>>> {
        let bytes = {
            let entries = self.entries.lock().map_err(|_| Self::lock_poisoned())?;
            entries.get(key).cloned()
        };
        match bytes {
            Some(bytes) => decode_snapshot(key, &bytes),
            None => Ok(None),
        }
    }

    async fn save(&self, key: &str, objects: &[DataObject]) -> StorageResult<()> {
        let bytes = encode_snapshot(key, objects)?;
        self.entries
            .lock()
            .map_err(|_| Self::lock_poisoned())?
            .insert(key.to_string(), bytes);
        self.saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn remove(&self, key: &str) -> StorageResult<()> {
        self.entries
            .lock()
            .map_err(|_| Self::lock_poisoned())?
            .remove(key);
        Ok(())
    }
}
