//! Events delivered by the live push stream.
//!
//! The WebSocket layer that decodes frames lives outside this workspace; it
//! translates each frame into one of these variants and hands it to a push
//! channel. Variants carry only what the cache needs to apply the change.

use crate::Timestamp;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A single predicted field change scheduled for a future time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictedChange {
    /// When the change should become visible.
    pub time: Timestamp,
    /// Partial fields, same shape as a deep-merge update.
    pub changes: Value,
}

impl PredictedChange {
    pub fn new(time: Timestamp, changes: Value) -> Self {
        Self { time, changes }
    }
}

/// A notification from the push stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum PushEvent {
    /// The stream (re)connected. Anything may have changed while offline.
    Connected,

    /// The stream dropped.
    Disconnected,

    /// A record entered the user's universe; its fields must be fetched.
    RecordInserted { id: String },

    /// A record left the user's universe.
    RecordRemoved { id: String },

    /// Some fields of a record changed.
    RecordPartialUpdate { id: String, changes: Value },

    /// Predicted future states for a record (e.g. motion interpolation).
    PredictedStateUpdate {
        id: String,
        changes: Vec<PredictedChange>,
    },
}

impl PushEvent {
    /// The record this event targets, if any.
    pub fn object_id(&self) -> Option<&str> {
        match self {
            PushEvent::Connected | PushEvent::Disconnected => None,
            PushEvent::RecordInserted { id }
            | PushEvent::RecordRemoved { id }
            | PushEvent::RecordPartialUpdate { id, .. }
            | PushEvent::PredictedStateUpdate { id, .. } => Some(id),
        }
    }

    /// Whether the event mutates cached records.
    pub fn is_record_change(&self) -> bool {
        matches!(
            self,
            PushEvent::RecordInserted { .. }
                | PushEvent::RecordRemoved { .. }
                | PushEvent::RecordPartialUpdate { .. }
        )
    }
}
