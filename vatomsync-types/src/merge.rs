//! Deep-merge and key-path helpers over loosely-typed JSON fields.
//!
//! Records arrive as arbitrary JSON mappings; partial updates from the push
//! stream and from predicted-state batches carry the same nested shape with
//! only the changed leaves present.

use crate::{Error, Result};
use serde_json::{Map, Value};

/// Recursively merges `patch` into `target`.
///
/// For every key of `patch`: when both sides hold mappings they are merged
/// recursively, otherwise the incoming value replaces the current one
/// outright. An incoming `null` therefore nulls the key rather than removing
/// it. When `patch` itself is not a mapping it replaces `target` whole.
///
/// `patch` is never modified.
pub fn deep_merge(target: &mut Value, patch: &Value) {
    match (target, patch) {
        (Value::Object(current), Value::Object(incoming)) => {
            for (key, value) in incoming {
                match current.get_mut(key) {
                    Some(existing) if existing.is_object() && value.is_object() => {
                        deep_merge(existing, value);
                    }
                    _ => {
                        current.insert(key.clone(), value.clone());
                    }
                }
            }
        }
        (target, patch) => *target = patch.clone(),
    }
}

/// Returns a merged copy of `base` without touching either operand.
#[must_use]
pub fn merged(base: &Value, patch: &Value) -> Value {
    let mut out = base.clone();
    deep_merge(&mut out, patch);
    out
}

fn segments(path: &str) -> Result<Vec<&str>> {
    let parts: Vec<&str> = path.split('.').collect();
    if parts.iter().any(|p| p.is_empty()) {
        return Err(Error::InvalidPath(path.to_string()));
    }
    Ok(parts)
}

/// Reads the value at a dot-separated key path.
#[must_use]
pub fn get_path<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    let parts = segments(path).ok()?;
    parts
        .into_iter()
        .try_fold(value, |node, key| node.as_object()?.get(key))
}

/// Writes `new` at a dot-separated key path and returns the previous value.
///
/// Missing or `null` intermediate nodes become empty mappings. Any other
/// non-mapping intermediate node is an error and leaves `value` untouched.
pub fn set_path(value: &mut Value, path: &str, new: Value) -> Result<Option<Value>> {
    let parts = segments(path)?;
    let (last, parents) = parts
        .split_last()
        .ok_or_else(|| Error::InvalidPath(path.to_string()))?;

    // Validate before mutating so a failed write has no side effects.
    let mut probe = Some(&*value);
    for key in parents {
        match probe {
            Some(Value::Object(map)) => probe = map.get(*key),
            Some(Value::Null) | None => {
                probe = None;
                break;
            }
            Some(_) => return Err(Error::InvalidPath(path.to_string())),
        }
    }
    if let Some(node) = probe {
        if !matches!(node, Value::Null | Value::Object(_)) {
            return Err(Error::InvalidPath(path.to_string()));
        }
    }

    let mut node = value;
    for key in parents {
        let map = as_map(node, path)?;
        node = map
            .entry((*key).to_string())
            .or_insert_with(|| Value::Object(Map::new()));
    }
    let map = as_map(node, path)?;
    Ok(map.insert((*last).to_string(), new))
}

/// Removes the value at a dot-separated key path, returning it.
pub fn remove_path(value: &mut Value, path: &str) -> Option<Value> {
    let parts = segments(path).ok()?;
    let (last, parents) = parts.split_last()?;
    let mut node = value;
    for key in parents {
        node = node.as_object_mut()?.get_mut(*key)?;
    }
    node.as_object_mut()?.remove(*last)
}

fn as_map<'a>(node: &'a mut Value, path: &str) -> Result<&'a mut Map<String, Value>> {
    if node.is_null() {
        *node = Value::Object(Map::new());
    }
    node.as_object_mut()
        .ok_or_else(|| Error::InvalidPath(path.to_string()))
}
