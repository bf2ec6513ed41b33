//! On-disk snapshot format.
//!
//! A snapshot is an ordered list of `(id, type, data)` records wrapped in an
//! envelope that names the format version and the state key it belongs to.

use crate::error::{StorageError, StorageResult};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;
use vatomsync_types::{DataObject, decode_records};

/// Current snapshot format version. Bump when the record shape changes.
pub const CACHE_FORMAT_VERSION: u32 = 1;

/// Versioned wrapper around a region snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEnvelope {
    pub version: u32,
    pub key: String,
    /// Records are kept raw so one bad record does not poison the file.
    pub objects: Vec<Value>,
}

/// Serializes a snapshot for `key`.
pub fn encode_snapshot(key: &str, objects: &[DataObject]) -> StorageResult<Vec<u8>> {
    let objects = objects
        .iter()
        .map(serde_json::to_value)
        .collect::<Result<Vec<_>, _>>()?;
    let envelope = CacheEnvelope {
        version: CACHE_FORMAT_VERSION,
        key: key.to_string(),
        objects,
    };
    Ok(serde_json::to_vec(&envelope)?)
}

/// Parses a snapshot written for `key`.
///
/// Returns `Ok(None)` for a version or key mismatch. Undecodable records are
/// dropped individually.
pub fn decode_snapshot(key: &str, bytes: &[u8]) -> StorageResult<Option<Vec<DataObject>>> {
    let envelope: CacheEnvelope = serde_json::from_slice(bytes)?;
    if envelope.version != CACHE_FORMAT_VERSION {
        warn!(
            "Ignoring cache for {}: format version {} (expected {})",
            key, envelope.version, CACHE_FORMAT_VERSION
        );
        return Ok(None);
    }
    if envelope.key != key {
        return Err(StorageError::InvalidData(format!(
            "snapshot belongs to {:?}, not {:?}",
            envelope.key, key
        )));
    }
    let batch = decode_records(&envelope.objects);
    if batch.skipped > 0 {
        warn!("Dropped {} undecodable cached records for {}", batch.skipped, key);
    }
    Ok(Some(batch.objects))
}
