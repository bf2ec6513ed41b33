use crate::error::StorageResult;
use crate::format::{decode_snapshot, encode_snapshot};
use crate::{LocalPersistence, safe_key};
use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::debug;
use vatomsync_types::DataObject;

/// Stores each region snapshot as a JSON file inside a cache directory.
///
/// Writes go to a temporary sibling first and are renamed into place, so a
/// crash mid-write leaves the previous snapshot intact.
#[derive(Debug, Clone)]
pub struct FileCacheStore {
    dir: PathBuf,
}

impl FileCacheStore {
    /// Creates a store rooted at `dir`. The directory is created lazily on
    /// first save.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// The cache directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// The file a given state key is stored in.
    pub fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.json", safe_key(key)))
    }
}

#[async_trait]
impl LocalPersistence for FileCacheStore {
    async fn load(&self, key: &str) -> StorageResult<Option<Vec<DataObject>>> {
        let path = self.path_for(key);
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let objects = decode_snapshot(key, &bytes)?;
        debug!(
            "Loaded {} cached objects for {} from {}",
            objects.as_ref().map_or(0, Vec::len),
            key,
            path.display()
        );
        Ok(objects)
    }

    async fn save(&self, key: &str, objects: &[DataObject]) -> StorageResult<()> {
        let bytes = encode_snapshot(key, objects)?;
        tokio::fs::create_dir_all(&self.dir).await?;
        let path = self.path_for(key);
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, &bytes).await?;
        tokio::fs::rename(&tmp, &path).await?;
        debug!("Saved {} objects for {} to {}", objects.len(), key, path.display());
        Ok(())
    }

    async fn remove(&self, key: &str) -> StorageResult<()> {
        match tokio::fs::remove_file(self.path_for(key)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
