use crate::merge::{deep_merge, get_path};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

/// A generic record held by the local cache.
///
/// All server-owned objects (vAtoms, faces, actions) flow through this type.
/// `data` holds the raw JSON fields; `None` means the object is known to exist
/// but its fields have not been fetched yet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataObject {
    pub id: String,
    #[serde(rename = "type", alias = "object_type")]
    pub object_type: String,
    #[serde(default)]
    pub data: Option<Value>,
}

impl DataObject {
    /// Creates a loaded object.
    pub fn new(id: impl Into<String>, object_type: impl Into<String>, data: Value) -> Self {
        Self {
            id: id.into(),
            object_type: object_type.into(),
            data: Some(data),
        }
    }

    /// Creates a placeholder for an object whose fields are not loaded yet.
    pub fn unloaded(id: impl Into<String>, object_type: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            object_type: object_type.into(),
            data: None,
        }
    }

    /// Decodes a raw remote record of the shape `{"id", "type", "data"}`.
    pub fn from_record(record: &Value) -> Result<Self> {
        let object: DataObject = serde_json::from_value(record.clone())?;
        if object.id.is_empty() {
            return Err(Error::InvalidRecord("empty id".into()));
        }
        Ok(object)
    }

    /// Whether the object's fields have been fetched.
    pub fn is_loaded(&self) -> bool {
        self.data.is_some()
    }

    /// Deep-merges a partial field change into `data`.
    ///
    /// Returns false (and changes nothing) when the object is not loaded.
    pub fn apply_changes(&mut self, changes: &Value) -> bool {
        match self.data.as_mut() {
            Some(data) => {
                deep_merge(data, changes);
                true
            }
            None => false,
        }
    }

    /// Reads a value using a dot-separated key path (e.g. "vAtom::vAtomType.title").
    pub fn get(&self, path: &str) -> Option<&Value> {
        self.data.as_ref().and_then(|d| get_path(d, path))
    }

    /// Extract a string value from `data` using a key path.
    pub fn get_str(&self, path: &str) -> Option<&str> {
        self.get(path).and_then(|v| v.as_str())
    }

    /// Extract a boolean value from `data` using a key path.
    pub fn get_bool(&self, path: &str) -> Option<bool> {
        self.get(path).and_then(|v| v.as_bool())
    }

    /// Extract a numeric value from `data` using a key path.
    pub fn get_number(&self, path: &str) -> Option<f64> {
        self.get(path).and_then(|v| v.as_f64())
    }
}

/// A partial field change addressed to one object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectDelta {
    pub id: String,
    pub changes: Value,
}

impl ObjectDelta {
    pub fn new(id: impl Into<String>, changes: Value) -> Self {
        Self {
            id: id.into(),
            changes,
        }
    }
}

/// Outcome of decoding a batch of raw records.
#[derive(Debug, Clone, Default)]
pub struct DecodedBatch {
    pub objects: Vec<DataObject>,
    /// Number of records that failed to decode and were dropped.
    pub skipped: usize,
}

/// Decodes a batch of raw records, skipping malformed ones.
///
/// A single bad record never fails the batch; it is logged and counted.
pub fn decode_records(records: &[Value]) -> DecodedBatch {
    let mut batch = DecodedBatch::default();
    for record in records {
        match DataObject::from_record(record) {
            Ok(object) => batch.objects.push(object),
            Err(e) => {
                warn!("Skipping undecodable record: {}", e);
                batch.skipped += 1;
            }
        }
    }
    batch
}
