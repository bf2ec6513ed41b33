//! Client-side data pool for vAtom objects.
//!
//! Holds a partial, continuously reconciled mirror of server-owned objects and
//! keeps it consistent under three interleaved change sources:
//! - paginated bulk fetches (full sync) and change-token deltas (partial sync)
//! - the live push stream
//! - optimistic local mutations with compensating undo
//!
//! # Architecture
//!
//! ## Components
//!
//! - **Region**: a filtered subset of objects with memoized projections,
//!   single-flight synchronization and debounced persistence
//! - **DataPool**: the session's registry of regions, keyed per plugin by
//!   `(plugin id, descriptor)`
//! - **LiveUpdateAnimator**: applies predicted future states to every region
//!   when they come due
//! - **SyncCoordinator**: the serialized pipeline all remote and local writes
//!   go through
//!
//! ## Collaborators
//!
//! The REST and WebSocket clients live outside this crate. They plug in
//! through [`RemoteSource`] and [`PushChannel`]; local snapshots go through
//! `vatomsync_storage::LocalPersistence`.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use vatomsync_storage::MemoryCacheStore;
//! use vatomsync_sync::{AnimatorConfig, DataPool, LiveUpdateAnimator, RegionConfig};
//!
//! let pool = DataPool::new(
//!     Arc::new(MemoryCacheStore::new()),
//!     LiveUpdateAnimator::new(AnimatorConfig::default()),
//!     RegionConfig::default(),
//! );
//! assert_eq!(pool.region_count(), 0);
//! ```

mod animator;
mod config;
mod coordinator;
mod debounce;
mod error;
mod pool;
mod push;
mod region;
mod remote;
mod target;
mod task;
mod undo;

pub use animator::{LiveUpdateAnimator, LiveUpdateTarget, PendingUpdate};
pub use config::{AnimatorConfig, CoordinatorConfig, RegionConfig, SyncSettings};
pub use coordinator::{
    AssociationIndex, CoordinatorHandle, CoordinatorState, OptimisticChange, ROOT_PARENT,
    RemoteAction, SyncCommand, SyncCoordinator, SyncEvent, SyncMode, SyncPhase, SyncSummary,
    create_coordinator,
};
pub use debounce::Debouncer;
pub use error::{SyncError, SyncResult};
pub use pool::{DataPool, SessionInfo};
pub use push::{LocalPushChannel, PushChannel};
pub use region::{Region, RegionEvent, RegionPlugin};
pub use remote::{ChangeSet, ChangeToken, Page, PageFilter, RemoteSource};
pub use target::SyncTarget;
pub use undo::Undo;
