//! The store a sync coordinator writes into.

use crate::error::{SyncError, SyncResult};
use crate::undo::Undo;
use async_trait::async_trait;
use serde_json::Value;
use vatomsync_types::{DataObject, ObjectDelta};

/// Object storage driven by a [`crate::SyncCoordinator`].
///
/// [`crate::Region`] implements this; the coordinator only ever touches the
/// target from its own run loop, which makes that loop the single writer.
#[async_trait]
pub trait SyncTarget: Send + Sync {
    /// Name used in logs.
    fn name(&self) -> String;

    /// Whether nothing is cached yet.
    fn is_empty(&self) -> bool;

    /// Ids of every cached object.
    fn ids(&self) -> Vec<String>;

    /// Copies of every cached object.
    fn snapshot(&self) -> Vec<DataObject>;

    /// Inserts or replaces whole objects.
    fn upsert(&self, objects: Vec<DataObject>) -> SyncResult<()>;

    /// Deep-merges partial changes; returns how many applied.
    fn merge(&self, deltas: &[ObjectDelta]) -> SyncResult<usize>;

    /// Removes objects; returns how many existed.
    fn delete(&self, ids: &[String]) -> SyncResult<usize>;

    /// Applies an optimistic field write.
    fn preemptive_change(&self, id: &str, path: &str, value: Value) -> SyncResult<Undo>;

    /// Records that a sync brought the target up to date.
    fn mark_synchronized(&self);

    /// Records that a sync failed.
    fn mark_failed(&self, error: &SyncError);

    /// Writes the current state to durable storage now.
    async fn persist(&self);
}
