//! The coordinator's run loop.

use super::associations::AssociationIndex;
use super::fetch::{self, DeltaOutcome, FullOutcome, WorkerMessage, WorkerTask};
use super::{
    CoordinatorState, OptimisticChange, RemoteAction, SyncCommand, SyncEvent, SyncMode, SyncPhase,
    SyncSummary,
};
use crate::config::CoordinatorConfig;
use crate::error::{SyncError, SyncResult};
use crate::push::PushChannel;
use crate::remote::{ChangeToken, RemoteSource, with_timeout};
use crate::target::SyncTarget;
use crate::undo::Undo;
use serde_json::Value;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::AbortHandle;
use tracing::{debug, info, warn};
use vatomsync_types::{ObjectDelta, PushEvent, decode_records, get_path};

type RefreshReply = oneshot::Sender<SyncResult<SyncSummary>>;

struct ActiveSync {
    mode: SyncMode,
    summary: SyncSummary,
    /// Ids imported by this sync, for pruning after a complete full sync.
    seen: HashSet<String>,
    waiters: Vec<RefreshReply>,
    worker: AbortHandle,
}

struct PendingDelete {
    id: String,
    reply: oneshot::Sender<SyncResult<()>>,
}

struct PendingAction {
    object_id: String,
    action: String,
    undos: Vec<Undo>,
    reply: oneshot::Sender<SyncResult<Value>>,
}

/// Serializes remote and local changes into one [`SyncTarget`].
///
/// Built by [`super::create_coordinator`]; drive it by spawning
/// [`SyncCoordinator::run`].
pub struct SyncCoordinator {
    config: CoordinatorConfig,
    remote: Arc<dyn RemoteSource>,
    push: Option<Arc<dyn PushChannel>>,
    push_rx: Option<mpsc::UnboundedReceiver<PushEvent>>,
    target: Arc<dyn SyncTarget>,
    commands: mpsc::Receiver<SyncCommand>,
    events: broadcast::Sender<SyncEvent>,
    worker_tx: mpsc::UnboundedSender<WorkerMessage>,
    worker_rx: mpsc::UnboundedReceiver<WorkerMessage>,
    phase: SyncPhase,
    active: Option<ActiveSync>,
    deferred: VecDeque<PushEvent>,
    change_token: Option<ChangeToken>,
    associations: AssociationIndex,
    pending_deletes: HashMap<u64, PendingDelete>,
    pending_actions: HashMap<u64, PendingAction>,
    next_ticket: u64,
    last_error: Option<SyncError>,
}

impl SyncCoordinator {
    pub(super) fn new(
        config: CoordinatorConfig,
        remote: Arc<dyn RemoteSource>,
        push: Option<Arc<dyn PushChannel>>,
        target: Arc<dyn SyncTarget>,
        commands: mpsc::Receiver<SyncCommand>,
        events: broadcast::Sender<SyncEvent>,
    ) -> Self {
        let push_rx = push.as_ref().map(|channel| channel.subscribe());
        let (worker_tx, worker_rx) = mpsc::unbounded_channel();
        Self {
            config,
            remote,
            push,
            push_rx,
            target,
            commands,
            events,
            worker_tx,
            worker_rx,
            phase: SyncPhase::Idle,
            active: None,
            deferred: VecDeque::new(),
            change_token: None,
            associations: AssociationIndex::new(),
            pending_deletes: HashMap::new(),
            pending_actions: HashMap::new(),
            next_ticket: 0,
            last_error: None,
        }
    }

    /// Another receiver for coordinator events.
    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.events.subscribe()
    }

    /// Seeds the change token, e.g. one persisted from a previous session.
    pub fn with_change_token(mut self, token: ChangeToken) -> Self {
        self.change_token = Some(token);
        self
    }

    /// Processes commands, push events and worker reports until shut down.
    ///
    /// Worker reports are handled first, then push events, then commands.
    pub async fn run(mut self) {
        info!("Sync coordinator for {} running", self.target.name());
        loop {
            tokio::select! {
                biased;

                Some(message) = self.worker_rx.recv() => {
                    self.handle_worker(message).await;
                }

                event = next_push(&mut self.push_rx) => match event {
                    Some(event) => self.handle_push(event).await,
                    None => {
                        debug!("Push channel closed");
                        self.push_rx = None;
                    }
                },

                command = self.commands.recv() => match command {
                    Some(SyncCommand::Shutdown) | None => break,
                    Some(command) => self.handle_command(command).await,
                },
            }
        }
        self.stop();
        info!("Sync coordinator for {} stopped", self.target.name());
    }

    fn emit(&self, event: SyncEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    fn ticket(&mut self) -> u64 {
        self.next_ticket += 1;
        self.next_ticket
    }

    fn state(&self) -> CoordinatorState {
        CoordinatorState {
            phase: self.phase,
            refreshing: self.active.is_some(),
            deferred_events: self.deferred.len(),
            change_token: self.change_token.clone(),
            pending_actions: self.pending_actions.len(),
            pending_deletes: self.pending_deletes.len(),
            last_error: self.last_error.clone(),
        }
    }

    async fn handle_command(&mut self, command: SyncCommand) {
        match command {
            SyncCommand::Refresh { force_full, reply } => match self.active.as_mut() {
                Some(active) => {
                    debug!("Sync already running; joining it");
                    active.waiters.extend(reply);
                }
                None => self.start_sync(force_full, reply),
            },
            SyncCommand::Push(event) => self.handle_push(event).await,
            SyncCommand::Delete { id, reply } => self.start_delete(id, reply),
            SyncCommand::Optimistic {
                object_id,
                changes,
                action,
                reply,
            } => self.start_action(object_id, changes, action, reply),
            SyncCommand::ChildrenOf { parent, reply } => {
                let _ = reply.send(self.associations.children_of(&parent));
            }
            SyncCommand::State { reply } => {
                let _ = reply.send(self.state());
            }
            SyncCommand::Shutdown => {}
        }
    }

    // ── Sync lifecycle ───────────────────────────────────────────

    fn start_sync(&mut self, force_full: bool, reply: Option<RefreshReply>) {
        let mode = match &self.change_token {
            Some(_) if !force_full && !self.target.is_empty() => SyncMode::Delta,
            _ => SyncMode::Full,
        };
        if let Some(push) = &self.push {
            push.pause();
        }
        info!("Starting {:?} sync of {}", mode, self.target.name());
        self.emit(SyncEvent::Started { mode });
        let worker = self.spawn_sync_worker(mode);
        self.phase = phase_for(mode);
        self.active = Some(ActiveSync {
            mode,
            summary: SyncSummary::new(mode),
            seen: HashSet::new(),
            waiters: reply.into_iter().collect(),
            worker,
        });
    }

    fn spawn_sync_worker(&self, mode: SyncMode) -> AbortHandle {
        let remote = self.remote.clone();
        let tx = self.worker_tx.clone();
        match (mode, self.change_token.clone()) {
            (SyncMode::Delta, Some(since)) => fetch::supervise(
                WorkerTask::Sync(mode),
                tx,
                fetch::delta_sync(remote, self.config.request_timeout(), since),
            ),
            _ => fetch::supervise(
                WorkerTask::Sync(SyncMode::Full),
                tx.clone(),
                fetch::full_sync(remote, self.config.clone(), tx),
            ),
        }
    }

    async fn handle_worker(&mut self, message: WorkerMessage) {
        match message {
            WorkerMessage::Page { page, records } => self.import_page(page, records),
            WorkerMessage::FullFinished(Ok(outcome)) => self.finish_full(outcome).await,
            WorkerMessage::FullFinished(Err(e)) => self.fail_sync(e).await,
            WorkerMessage::DeltaFetched(Ok(outcome)) => self.finish_delta(outcome).await,
            WorkerMessage::DeltaFetched(Err(e)) => self.delta_failed(e).await,
            WorkerMessage::DeleteFinished { ticket, result } => self.finish_delete(ticket, result),
            WorkerMessage::ActionFinished { ticket, result } => self.finish_action(ticket, result),
            WorkerMessage::WorkerLost { task, reason } => {
                let error = SyncError::Internal(reason);
                match task {
                    WorkerTask::Sync(_) => self.fail_sync(error).await,
                    WorkerTask::Delete(ticket) => self.finish_delete(ticket, Err(error)),
                    WorkerTask::Action(ticket) => self.finish_action(ticket, Err(error)),
                }
            }
        }
    }

    fn import_page(&mut self, page: usize, records: Vec<Value>) {
        let Some(active) = self.active.as_mut() else {
            return;
        };
        // Ids of undecodable records still count as seen: skipping a record
        // must not prune the cached copy.
        active.seen.extend(
            records
                .iter()
                .filter_map(|record| record.get("id").and_then(Value::as_str))
                .map(str::to_string),
        );
        let batch = decode_records(&records);
        let imported = batch.objects.len();
        if let Err(e) = self.target.upsert(batch.objects) {
            warn!("Failed to import page {}: {}", page, e);
            return;
        }
        active.summary.objects_imported += imported;
        active.summary.records_skipped += batch.skipped;
        self.emit(SyncEvent::PageImported {
            page,
            objects: imported,
            skipped: batch.skipped,
        });
    }

    async fn finish_full(&mut self, outcome: FullOutcome) {
        let Some(mut active) = self.active.take() else {
            return;
        };
        self.phase = SyncPhase::Reconciling;
        active.summary.pages_fetched = outcome.pages;
        active.summary.ceiling_reached = outcome.ceiling_reached;

        if outcome.complete {
            let stale: Vec<String> = self
                .target
                .ids()
                .into_iter()
                .filter(|id| !active.seen.contains(id))
                .collect();
            if !stale.is_empty() {
                match self.target.delete(&stale) {
                    Ok(removed) => active.summary.objects_removed += removed,
                    Err(e) => warn!("Failed to prune {} stale objects: {}", stale.len(), e),
                }
                for id in &stale {
                    self.associations.forget(id);
                }
            }
        } else {
            warn!(
                "Full sync of {} hit the page ceiling; unseen objects kept",
                self.target.name()
            );
        }

        self.change_token = outcome.token;
        self.complete_sync(active).await;
    }

    async fn finish_delta(&mut self, outcome: DeltaOutcome) {
        let Some(mut active) = self.active.take() else {
            return;
        };
        self.phase = SyncPhase::Reconciling;
        match outcome {
            DeltaOutcome::UpToDate(token) => {
                debug!("{} is up to date at {}", self.target.name(), token);
                active.summary.up_to_date = true;
                self.change_token = Some(token);
            }
            DeltaOutcome::Changes(changes) => {
                let batch = decode_records(&changes.changed);
                active.summary.objects_imported = batch.objects.len();
                active.summary.records_skipped = batch.skipped;
                if let Err(e) = self.target.upsert(batch.objects) {
                    warn!("Failed to apply changed records: {}", e);
                }
                if !changes.removed.is_empty() {
                    match self.target.delete(&changes.removed) {
                        Ok(removed) => active.summary.objects_removed = removed,
                        Err(e) => warn!("Failed to apply removals: {}", e),
                    }
                    for id in &changes.removed {
                        self.associations.forget(id);
                    }
                }
                self.change_token = Some(changes.token);
            }
        }
        self.complete_sync(active).await;
    }

    /// A partial sync the remote cannot serve becomes a full sync.
    async fn delta_failed(&mut self, error: SyncError) {
        let fallback = matches!(
            error,
            SyncError::Unsupported(_) | SyncError::TokenRejected(_)
        );
        if !fallback || self.active.is_none() {
            self.fail_sync(error).await;
            return;
        }
        info!("Partial sync unavailable ({}); falling back to full sync", error);
        self.change_token = None;
        let worker = self.spawn_sync_worker(SyncMode::Full);
        self.phase = SyncPhase::FetchingLatest;
        if let Some(active) = self.active.as_mut() {
            active.mode = SyncMode::Full;
            active.summary.mode = SyncMode::Full;
            active.worker = worker;
        }
    }

    async fn complete_sync(&mut self, active: ActiveSync) {
        self.resolve_associations();
        self.target.persist().await;
        self.target.mark_synchronized();
        self.last_error = None;
        info!(
            "{:?} sync of {} complete: {} imported, {} removed, {} skipped",
            active.mode,
            self.target.name(),
            active.summary.objects_imported,
            active.summary.objects_removed,
            active.summary.records_skipped
        );
        self.settle(active.waiters, Ok(active.summary.clone())).await;
        self.emit(SyncEvent::Completed(active.summary));
    }

    async fn fail_sync(&mut self, error: SyncError) {
        let Some(active) = self.active.take() else {
            return;
        };
        warn!(
            "{:?} sync of {} failed: {}",
            active.mode,
            self.target.name(),
            error
        );
        self.target.mark_failed(&error);
        self.last_error = Some(error.clone());
        // The cache is kept and held push events still apply.
        self.settle(active.waiters, Err(error.clone())).await;
        self.emit(SyncEvent::Failed {
            mode: active.mode,
            error,
        });
    }

    /// Returns to idle, replays held push events and answers waiters.
    async fn settle(&mut self, waiters: Vec<RefreshReply>, result: SyncResult<SyncSummary>) {
        self.phase = SyncPhase::Idle;
        while let Some(event) = self.deferred.pop_front() {
            self.apply_push(event).await;
        }
        if let Some(push) = &self.push {
            push.resume();
        }
        for reply in waiters {
            let _ = reply.send(result.clone());
        }
    }

    fn resolve_associations(&mut self) {
        let Some(field) = self.config.parent_field.as_deref() else {
            return;
        };
        let (linked, unresolved) = self.associations.rebuild(&self.target.snapshot(), field);
        if unresolved > 0 {
            debug!("{} objects reference a parent that is not cached", unresolved);
        }
        self.emit(SyncEvent::AssociationsResolved { linked, unresolved });
    }

    // ── Push events ──────────────────────────────────────────────

    async fn handle_push(&mut self, event: PushEvent) {
        match event {
            // Live predictions belong to the animator.
            PushEvent::PredictedStateUpdate { .. } => {}
            PushEvent::Connected if self.active.is_some() => {
                debug!("Reconnected during a sync; nothing to do");
            }
            event if self.active.is_some() => self.deferred.push_back(event),
            event => self.apply_push(event).await,
        }
    }

    async fn apply_push(&mut self, event: PushEvent) {
        match &event {
            PushEvent::Connected => {
                self.start_sync(false, None);
                return;
            }
            PushEvent::Disconnected | PushEvent::PredictedStateUpdate { .. } => return,
            PushEvent::RecordInserted { id } => {
                let records = match with_timeout(
                    self.config.request_timeout(),
                    self.remote.fetch_by_ids(std::slice::from_ref(id)),
                )
                .await
                {
                    Ok(records) => records,
                    Err(e) => {
                        warn!("Failed to fetch inserted record {}: {}", id, e);
                        return;
                    }
                };
                let batch = decode_records(&records);
                if let Some(field) = self.config.parent_field.as_deref() {
                    for object in &batch.objects {
                        if let Some(parent) = object.get_str(field) {
                            self.associations.link(&object.id, parent);
                        }
                    }
                }
                if let Err(e) = self.target.upsert(batch.objects) {
                    warn!("Failed to insert {}: {}", id, e);
                    return;
                }
            }
            PushEvent::RecordRemoved { id } => {
                if let Err(e) = self.target.delete(std::slice::from_ref(id)) {
                    warn!("Failed to remove {}: {}", id, e);
                    return;
                }
                self.associations.forget(id);
            }
            PushEvent::RecordPartialUpdate { id, changes } => {
                if let Err(e) = self
                    .target
                    .merge(&[ObjectDelta::new(id.clone(), changes.clone())])
                {
                    warn!("Failed to update {}: {}", id, e);
                    return;
                }
                if let Some(field) = self.config.parent_field.as_deref() {
                    if let Some(parent) = get_path(changes, field).and_then(Value::as_str) {
                        self.associations.link(id, parent);
                    }
                }
            }
        }
        self.emit(SyncEvent::PushApplied(event));
    }

    // ── Remote deletes ───────────────────────────────────────────

    fn start_delete(&mut self, id: String, reply: oneshot::Sender<SyncResult<()>>) {
        let ticket = self.ticket();
        fetch::supervise(
            WorkerTask::Delete(ticket),
            self.worker_tx.clone(),
            fetch::delete_record(
                self.remote.clone(),
                self.config.request_timeout(),
                ticket,
                id.clone(),
            ),
        );
        self.pending_deletes.insert(ticket, PendingDelete { id, reply });
    }

    fn finish_delete(&mut self, ticket: u64, result: SyncResult<()>) {
        let Some(PendingDelete { id, reply }) = self.pending_deletes.remove(&ticket) else {
            return;
        };
        let outcome = match result {
            Ok(()) => Ok(()),
            Err(e) if e.is_gone() => {
                debug!("{} already gone remotely ({}); removing locally", id, e);
                Ok(())
            }
            Err(e) => {
                warn!("Remote delete of {} failed: {}", id, e);
                Err(e)
            }
        };
        if outcome.is_ok() {
            if let Err(e) = self.target.delete(std::slice::from_ref(&id)) {
                warn!("Failed to remove {} locally: {}", id, e);
            }
            self.associations.forget(&id);
            self.emit(SyncEvent::ObjectDeleted { id });
        }
        let _ = reply.send(outcome);
    }

    // ── Optimistic actions ───────────────────────────────────────

    fn start_action(
        &mut self,
        object_id: String,
        changes: Vec<OptimisticChange>,
        action: RemoteAction,
        reply: oneshot::Sender<SyncResult<Value>>,
    ) {
        let mut undos = Vec::with_capacity(changes.len());
        for change in changes {
            match self
                .target
                .preemptive_change(&object_id, &change.path, change.value)
            {
                Ok(undo) => undos.push(undo),
                Err(e) => {
                    warn!(
                        "Optimistic change to {}.{} failed: {}",
                        object_id, change.path, e
                    );
                    roll_back(undos);
                    let _ = reply.send(Err(e));
                    return;
                }
            }
        }

        let ticket = self.ticket();
        debug!("Performing {} on {} (ticket {})", action.name, object_id, ticket);
        fetch::supervise(
            WorkerTask::Action(ticket),
            self.worker_tx.clone(),
            fetch::perform_action(
                self.remote.clone(),
                self.config.request_timeout(),
                ticket,
                action.name.clone(),
                action.payload,
            ),
        );
        self.pending_actions.insert(
            ticket,
            PendingAction {
                object_id,
                action: action.name,
                undos,
                reply,
            },
        );
    }

    fn finish_action(&mut self, ticket: u64, result: SyncResult<Value>) {
        let Some(pending) = self.pending_actions.remove(&ticket) else {
            return;
        };
        match result {
            Ok(response) => {
                for undo in pending.undos {
                    undo.dismiss();
                }
                let _ = pending.reply.send(Ok(response));
            }
            Err(e) => {
                warn!(
                    "{} on {} rejected: {}; undoing",
                    pending.action, pending.object_id, e
                );
                roll_back(pending.undos);
                self.emit(SyncEvent::ActionRejected {
                    object_id: pending.object_id,
                    action: pending.action,
                    error: e.clone(),
                });
                let _ = pending.reply.send(Err(e));
            }
        }
    }

    fn stop(&mut self) {
        if let Some(active) = self.active.take() {
            active.worker.abort();
            if let Some(push) = &self.push {
                push.resume();
            }
            for reply in active.waiters {
                let _ = reply.send(Err(SyncError::ChannelClosed));
            }
        }
        if !self.pending_actions.is_empty() || !self.pending_deletes.is_empty() {
            debug!(
                "Stopping with {} actions and {} deletes unconfirmed",
                self.pending_actions.len(),
                self.pending_deletes.len()
            );
        }
        self.phase = SyncPhase::Idle;
    }
}

fn phase_for(mode: SyncMode) -> SyncPhase {
    match mode {
        SyncMode::Full => SyncPhase::FetchingLatest,
        SyncMode::Delta => SyncPhase::FetchingDelta,
    }
}

/// Reverts optimistic writes, newest first.
fn roll_back(undos: Vec<Undo>) {
    for undo in undos.into_iter().rev() {
        undo.undo();
    }
}

async fn next_push(rx: &mut Option<mpsc::UnboundedReceiver<PushEvent>>) -> Option<PushEvent> {
    match rx {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}
