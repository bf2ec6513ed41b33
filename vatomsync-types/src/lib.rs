//! Core type definitions for the vAtom data pool.
//!
//! This crate defines the plugin-agnostic types shared by the storage and
//! sync layers:
//! - [`DataObject`]: the atomic cached record (id, type, raw JSON fields)
//! - Deep-merge and key-path helpers over `serde_json::Value`
//! - [`PushEvent`]: notifications delivered by the live push stream
//! - [`Timestamp`]: wall-clock milliseconds used to schedule predicted state
//! - [`SubscriptionId`]: handle returned by explicit registrations
//!
//! Region-specific projections (vAtoms, faces, actions) belong to the plugins
//! that map these records, not here.

mod event;
mod ids;
pub mod merge;
mod object;
mod timestamp;

pub use event::{PredictedChange, PushEvent};
pub use ids::SubscriptionId;
pub use merge::{deep_merge, get_path, merged, remove_path, set_path};
pub use object::{DataObject, DecodedBatch, ObjectDelta, decode_records};
pub use timestamp::Timestamp;

/// Result type alias using the crate's error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in type operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("invalid record: {0}")]
    InvalidRecord(String),

    #[error("invalid key path: {0}")]
    InvalidPath(String),
}
