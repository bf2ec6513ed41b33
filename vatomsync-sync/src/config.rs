//! Configuration for regions, the animator and the sync coordinator.
//!
//! Every struct has working defaults; `SyncSettings` bundles them so an app can
//! ship one JSON file and override only what it needs.

use crate::error::{SyncError, SyncResult};
use crate::remote::PageFilter;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Region behaviour.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegionConfig {
    /// Quiet period after the last mutation before the snapshot is written.
    pub save_debounce_ms: u64,
    /// Capacity of each region's event broadcast buffer.
    pub event_buffer: usize,
}

impl Default for RegionConfig {
    fn default() -> Self {
        Self {
            save_debounce_ms: 5_000,
            event_buffer: 256,
        }
    }
}

impl RegionConfig {
    pub fn save_debounce(&self) -> Duration {
        Duration::from_millis(self.save_debounce_ms)
    }
}

/// Live-update animator behaviour.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnimatorConfig {
    /// How often the queue head is checked while updates are pending.
    pub tick_interval_ms: u64,
}

impl Default for AnimatorConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: 20,
        }
    }
}

impl AnimatorConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms.max(1))
    }
}

/// Sync coordinator behaviour.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinatorConfig {
    /// Which remote collection a full sync pages through.
    pub filter: PageFilter,
    /// Records requested per page.
    pub page_size: usize,
    /// Pages fetched concurrently in one window.
    pub concurrent_pages: usize,
    /// Hard ceiling on pages requested by one full sync.
    pub max_pages: usize,
    /// Timeout applied to every remote call (ms).
    pub request_timeout_ms: u64,
    /// Key path holding an object's parent id, if objects nest.
    pub parent_field: Option<String>,
    /// Capacity of the command queue.
    pub command_buffer: usize,
    /// Capacity of the event broadcast buffer.
    pub event_buffer: usize,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            filter: PageFilter::default(),
            page_size: 100,
            concurrent_pages: 4,
            max_pages: 50,
            request_timeout_ms: 30_000,
            parent_field: Some("vAtom::vAtomType.parent_id".to_string()),
            command_buffer: 256,
            event_buffer: 256,
        }
    }
}

impl CoordinatorConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

/// All sync-layer settings in one document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncSettings {
    pub region: RegionConfig,
    pub animator: AnimatorConfig,
    pub coordinator: CoordinatorConfig,
}

impl SyncSettings {
    /// Parses settings from JSON text. Missing fields take their defaults.
    pub fn from_json_str(text: &str) -> SyncResult<Self> {
        Ok(serde_json::from_str(text)?)
    }

    /// Reads settings from a JSON file.
    pub fn from_file(path: impl AsRef<Path>) -> SyncResult<Self> {
        let text = std::fs::read_to_string(path.as_ref())
            .map_err(|e| SyncError::Storage(format!("{}: {e}", path.as_ref().display())))?;
        Self::from_json_str(&text)
    }
}
