//! Sync coordinator.
//!
//! One [`SyncCoordinator`] serializes every write to a [`SyncTarget`]: pages
//! from a full sync, change sets from a partial sync, push events and local
//! optimistic mutations all enter its run loop and are applied there one at a
//! time. Remote calls run on worker tasks and report back into the same loop.
//!
//! # State machine
//!
//! `Idle` → `FetchingLatest` (cache empty or no change token) or
//! `FetchingDelta` → `Reconciling` → `Idle`. Push events that arrive while a
//! sync is running are held and replayed in arrival order once it finishes.
//!
//! # Example
//!
//! ```ignore
//! let (handle, mut events, coordinator) =
//!     create_coordinator(CoordinatorConfig::default(), remote, Some(push), region);
//! tokio::spawn(coordinator.run());
//! let summary = handle.refresh().await?;
//! ```

mod associations;
mod fetch;
mod pipeline;

pub use associations::{AssociationIndex, ROOT_PARENT};
pub use pipeline::SyncCoordinator;

use crate::config::CoordinatorConfig;
use crate::error::{SyncError, SyncResult};
use crate::push::PushChannel;
use crate::remote::{ChangeToken, RemoteSource};
use crate::target::SyncTarget;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot};
use vatomsync_types::PushEvent;

/// How a sync fetches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SyncMode {
    /// Page through the whole collection.
    Full,
    /// Fetch only what changed since the held change token.
    Delta,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SyncPhase {
    #[default]
    Idle,
    FetchingLatest,
    FetchingDelta,
    Reconciling,
}

/// What one sync did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncSummary {
    /// The mode the sync finished in (a partial sync may fall back to full).
    pub mode: SyncMode,
    pub pages_fetched: usize,
    pub objects_imported: usize,
    pub objects_removed: usize,
    /// Records that failed to decode and were skipped.
    pub records_skipped: usize,
    /// The page ceiling stopped a full sync before it saw an empty page.
    pub ceiling_reached: bool,
    /// A partial sync found nothing changed.
    pub up_to_date: bool,
}

impl SyncSummary {
    pub fn new(mode: SyncMode) -> Self {
        Self {
            mode,
            pages_fetched: 0,
            objects_imported: 0,
            objects_removed: 0,
            records_skipped: 0,
            ceiling_reached: false,
            up_to_date: false,
        }
    }
}

/// Snapshot of the coordinator's bookkeeping.
#[derive(Debug, Clone, PartialEq)]
pub struct CoordinatorState {
    pub phase: SyncPhase,
    /// A sync is running. Reset on every completion path.
    pub refreshing: bool,
    /// Push events held until the running sync finishes.
    pub deferred_events: usize,
    pub change_token: Option<ChangeToken>,
    /// Optimistic actions awaiting the remote.
    pub pending_actions: usize,
    /// Remote deletes awaiting the remote.
    pub pending_deletes: usize,
    /// Failure of the last sync, cleared by the next success.
    pub last_error: Option<SyncError>,
}

/// Events emitted by the coordinator.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncEvent {
    Started { mode: SyncMode },
    PageImported { page: usize, objects: usize, skipped: usize },
    Completed(SyncSummary),
    Failed { mode: SyncMode, error: SyncError },
    PushApplied(PushEvent),
    AssociationsResolved { linked: usize, unresolved: usize },
    ObjectDeleted { id: String },
    ActionRejected { object_id: String, action: String, error: SyncError },
}

/// One optimistic field write.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimisticChange {
    /// Dot-separated key path inside the object's data.
    pub path: String,
    pub value: Value,
}

impl OptimisticChange {
    pub fn new(path: impl Into<String>, value: Value) -> Self {
        Self {
            path: path.into(),
            value,
        }
    }
}

/// The remote call confirming an optimistic change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteAction {
    pub name: String,
    pub payload: Value,
}

impl RemoteAction {
    pub fn new(name: impl Into<String>, payload: Value) -> Self {
        Self {
            name: name.into(),
            payload,
        }
    }
}

/// Commands accepted by the coordinator's run loop.
#[derive(Debug)]
pub enum SyncCommand {
    /// Start a sync, or join the one already running.
    Refresh {
        force_full: bool,
        reply: Option<oneshot::Sender<SyncResult<SyncSummary>>>,
    },
    /// Apply a push event (held while a sync runs).
    Push(PushEvent),
    /// Delete remotely, then locally.
    Delete {
        id: String,
        reply: oneshot::Sender<SyncResult<()>>,
    },
    /// Apply changes locally, then confirm them with a remote action.
    Optimistic {
        object_id: String,
        changes: Vec<OptimisticChange>,
        action: RemoteAction,
        reply: oneshot::Sender<SyncResult<Value>>,
    },
    ChildrenOf {
        parent: String,
        reply: oneshot::Sender<Vec<String>>,
    },
    State {
        reply: oneshot::Sender<CoordinatorState>,
    },
    Shutdown,
}

/// Cloneable handle for talking to a running [`SyncCoordinator`].
#[derive(Debug, Clone)]
pub struct CoordinatorHandle {
    commands: mpsc::Sender<SyncCommand>,
}

impl CoordinatorHandle {
    /// Sends a raw command.
    pub async fn send(&self, command: SyncCommand) -> SyncResult<()> {
        self.commands
            .send(command)
            .await
            .map_err(|_| SyncError::ChannelClosed)
    }

    async fn request<T>(
        &self,
        command: impl FnOnce(oneshot::Sender<T>) -> SyncCommand,
    ) -> SyncResult<T> {
        let (reply, response) = oneshot::channel();
        self.send(command(reply)).await?;
        response.await.map_err(|_| SyncError::ChannelClosed)
    }

    /// Syncs (partially when possible) and waits for the result.
    pub async fn refresh(&self) -> SyncResult<SyncSummary> {
        self.request(|reply| SyncCommand::Refresh {
            force_full: false,
            reply: Some(reply),
        })
        .await?
    }

    /// Runs a full sync and waits for the result.
    pub async fn full_refresh(&self) -> SyncResult<SyncSummary> {
        self.request(|reply| SyncCommand::Refresh {
            force_full: true,
            reply: Some(reply),
        })
        .await?
    }

    /// Requests a sync without waiting for it.
    pub async fn request_refresh(&self) -> SyncResult<()> {
        self.send(SyncCommand::Refresh {
            force_full: false,
            reply: None,
        })
        .await
    }

    /// Deletes an object remotely, then locally.
    ///
    /// A not-found or forbidden reply counts as success. Any other error
    /// leaves the local object in place and is returned.
    pub async fn delete(&self, id: impl Into<String>) -> SyncResult<()> {
        let id = id.into();
        self.request(|reply| SyncCommand::Delete { id, reply }).await?
    }

    /// Applies `changes` to `object_id` at once and confirms them with
    /// `action`. If the remote rejects the action the changes are undone
    /// (fields overwritten since keep their newer value).
    pub async fn perform_optimistic(
        &self,
        object_id: impl Into<String>,
        changes: Vec<OptimisticChange>,
        action: RemoteAction,
    ) -> SyncResult<Value> {
        let object_id = object_id.into();
        self.request(|reply| SyncCommand::Optimistic {
            object_id,
            changes,
            action,
            reply,
        })
        .await?
    }

    /// Feeds a push event into the pipeline.
    pub async fn push_event(&self, event: PushEvent) -> SyncResult<()> {
        self.send(SyncCommand::Push(event)).await
    }

    /// Direct children of `parent` ([`ROOT_PARENT`] for top level).
    pub async fn children_of(&self, parent: impl Into<String>) -> SyncResult<Vec<String>> {
        let parent = parent.into();
        self.request(|reply| SyncCommand::ChildrenOf { parent, reply })
            .await
    }

    pub async fn state(&self) -> SyncResult<CoordinatorState> {
        self.request(|reply| SyncCommand::State { reply }).await
    }

    /// Stops the run loop. In-flight syncs are cancelled.
    pub async fn shutdown(&self) -> SyncResult<()> {
        self.send(SyncCommand::Shutdown).await
    }
}

/// Creates a coordinator writing into `target`.
///
/// Returns the handle, the first event receiver (more via
/// [`SyncCoordinator::subscribe`]) and the coordinator itself, whose
/// [`SyncCoordinator::run`] must be spawned.
pub fn create_coordinator(
    config: CoordinatorConfig,
    remote: Arc<dyn RemoteSource>,
    push: Option<Arc<dyn PushChannel>>,
    target: Arc<dyn SyncTarget>,
) -> (CoordinatorHandle, broadcast::Receiver<SyncEvent>, SyncCoordinator) {
    let (command_tx, command_rx) = mpsc::channel(config.command_buffer.max(1));
    let (event_tx, event_rx) = broadcast::channel(config.event_buffer.max(1));
    let coordinator = SyncCoordinator::new(config, remote, push, target, command_rx, event_tx);
    (
        CoordinatorHandle {
            commands: command_tx,
        },
        event_rx,
        coordinator,
    )
}
