//! Regions: filtered subsets of the cache that synchronize independently.
//!
//! A region owns an id-indexed map of [`DataObject`]s plus a memoized
//! projection of each one (the plugin's `map` output). The map is guarded by
//! one mutex whose critical sections never await, so every add, update and
//! remove is applied atomically with respect to the others.

use crate::animator::LiveUpdateTarget;
use crate::config::RegionConfig;
use crate::debounce::Debouncer;
use crate::error::{SyncError, SyncResult};
use crate::pool::SessionInfo;
use crate::target::SyncTarget;
use crate::task::{lock, spawn_detached};
use crate::undo::Undo;
use async_trait::async_trait;
use futures::future::{BoxFuture, FutureExt, Shared};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, Weak};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};
use vatomsync_storage::LocalPersistence;
use vatomsync_types::{DataObject, ObjectDelta, get_path, remove_path, set_path};

/// What a concrete region kind supplies.
///
/// A plugin decides which remote objects belong to the region (`load`), how
/// a raw object is presented to consumers (`map`), and whether an existing
/// region can serve a lookup (`matches`).
#[async_trait]
pub trait RegionPlugin: Sized + Send + Sync + 'static {
    /// The projection consumers read.
    type Item: Clone + Send + Sync + 'static;

    /// Identifies the region kind, e.g. `"inventory"`.
    fn plugin_id(&self) -> &str;

    /// Identifies the subset within the kind, e.g. `{"user": "u1"}`.
    fn descriptor(&self) -> Value;

    /// Whether this region serves a lookup for `(plugin_id, descriptor)`.
    fn matches(&self, plugin_id: &str, descriptor: &Value) -> bool {
        plugin_id == self.plugin_id() && *descriptor == self.descriptor()
    }

    /// Stable key the region's snapshot is persisted under.
    fn state_key(&self) -> String;

    /// Fetches the region's objects from the remote and adds them to `region`.
    ///
    /// Returns the complete list of ids that belong to the region, so objects
    /// held locally but absent from it can be dropped. `None` means the full
    /// set is unknown and nothing is removed.
    async fn load(&self, region: &Region<Self>) -> SyncResult<Option<Vec<String>>>;

    /// Projects a raw object. `None` hides the object from `get`/`get_all`
    /// while keeping it in the store.
    fn map(&self, object: &DataObject) -> Option<Self::Item>;

    /// Whether the region stays valid under a new session (e.g. same user).
    fn accepts_session(&self, info: &SessionInfo) -> bool {
        let _ = info;
        true
    }
}

/// Change notifications emitted by a region.
#[derive(Debug, Clone, PartialEq)]
pub enum RegionEvent {
    /// One object was added, replaced, merged or removed.
    ObjectUpdated(String),
    /// A batch of changes finished applying.
    Updated,
    /// `synchronize` completed.
    Synchronized,
    /// `synchronize` failed.
    Error(SyncError),
    /// The region was closed.
    Closed,
}

struct Entry<T> {
    object: DataObject,
    /// `None` = not computed since the last mutation; `Some(None)` = the
    /// plugin declined to project this object.
    projection: Option<Option<T>>,
}

impl<T: Clone> Entry<T> {
    fn new(object: DataObject) -> Self {
        Self {
            object,
            projection: None,
        }
    }

    fn replace(&mut self, object: DataObject) {
        self.object = object;
        self.projection = None;
    }

    fn invalidate(&mut self) {
        self.projection = None;
    }

    fn project(&mut self, map: impl FnOnce(&DataObject) -> Option<T>) -> Option<T> {
        if self.projection.is_none() {
            self.projection = Some(map(&self.object));
        }
        self.projection.clone().flatten()
    }
}

struct RegionState<T> {
    objects: BTreeMap<String, Entry<T>>,
    synchronized: bool,
    error: Option<SyncError>,
    closed: bool,
    /// Ids removed optimistically whose undo is still outstanding, mapped to
    /// the token that undo holds. Any later add of the id clears the entry.
    tombstones: HashMap<String, u64>,
    next_token: u64,
}

impl<T: Clone> RegionState<T> {
    fn new() -> Self {
        Self {
            objects: BTreeMap::new(),
            synchronized: false,
            error: None,
            closed: false,
            tombstones: HashMap::new(),
            next_token: 0,
        }
    }

    fn ensure_open(&self) -> SyncResult<()> {
        if self.closed {
            Err(SyncError::RegionClosed)
        } else {
            Ok(())
        }
    }

    fn upsert(&mut self, object: DataObject) -> String {
        let id = object.id.clone();
        self.tombstones.remove(&id);
        match self.objects.get_mut(&id) {
            Some(entry) => entry.replace(object),
            None => {
                self.objects.insert(id.clone(), Entry::new(object));
            }
        }
        id
    }

    fn loaded_data(&mut self, id: &str) -> SyncResult<&mut Entry<T>> {
        match self.objects.get_mut(id) {
            Some(entry) if entry.object.is_loaded() => Ok(entry),
            _ => Err(SyncError::ObjectNotLoaded(id.to_string())),
        }
    }
}

type SyncFuture = Shared<BoxFuture<'static, SyncResult<()>>>;

enum SyncSlot {
    Idle,
    InFlight(SyncFuture),
}

type CloseHook = Box<dyn FnOnce() + Send>;

/// A filtered subset of the cache.
pub struct Region<P: RegionPlugin> {
    plugin: P,
    state_key: String,
    state: Mutex<RegionState<P::Item>>,
    sync_slot: Mutex<SyncSlot>,
    close_hooks: Mutex<Vec<CloseHook>>,
    events: broadcast::Sender<RegionEvent>,
    persistence: Arc<dyn LocalPersistence>,
    saver: Debouncer,
    this: Weak<Region<P>>,
}

impl<P: RegionPlugin> Region<P> {
    /// Creates a standalone region. Use [`crate::DataPool::region`] to get a
    /// registered one.
    pub fn new(
        plugin: P,
        persistence: Arc<dyn LocalPersistence>,
        config: &RegionConfig,
    ) -> Arc<Self> {
        let (events, _) = broadcast::channel(config.event_buffer.max(1));
        let state_key = plugin.state_key();
        Arc::new_cyclic(|this| Self {
            plugin,
            state_key,
            state: Mutex::new(RegionState::new()),
            sync_slot: Mutex::new(SyncSlot::Idle),
            close_hooks: Mutex::new(Vec::new()),
            events,
            persistence,
            saver: Debouncer::new(config.save_debounce()),
            this: this.clone(),
        })
    }

    pub fn plugin(&self) -> &P {
        &self.plugin
    }

    pub fn state_key(&self) -> &str {
        &self.state_key
    }

    /// Subscribes to change notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<RegionEvent> {
        self.events.subscribe()
    }

    pub fn is_synchronized(&self) -> bool {
        lock(&self.state).synchronized
    }

    /// The last synchronization failure, cleared by the next success.
    pub fn error(&self) -> Option<SyncError> {
        lock(&self.state).error.clone()
    }

    pub fn is_closed(&self) -> bool {
        lock(&self.state).closed
    }

    pub fn len(&self) -> usize {
        lock(&self.state).objects.len()
    }

    pub fn is_empty(&self) -> bool {
        lock(&self.state).objects.is_empty()
    }

    pub fn contains(&self, id: &str) -> bool {
        lock(&self.state).objects.contains_key(id)
    }

    /// Ids of every stored object, projected or not.
    pub fn ids(&self) -> Vec<String> {
        lock(&self.state).objects.keys().cloned().collect()
    }

    /// A copy of the raw stored object.
    pub fn object(&self, id: &str) -> Option<DataObject> {
        lock(&self.state).objects.get(id).map(|e| e.object.clone())
    }

    /// Copies of every raw stored object, ordered by id.
    pub fn snapshot(&self) -> Vec<DataObject> {
        lock(&self.state)
            .objects
            .values()
            .map(|e| e.object.clone())
            .collect()
    }

    fn emit(&self, event: RegionEvent) {
        // No receivers is fine.
        let _ = self.events.send(event);
    }

    fn notify_changed(&self, ids: &[String], persist: bool) {
        if ids.is_empty() {
            return;
        }
        for id in ids {
            self.emit(RegionEvent::ObjectUpdated(id.clone()));
        }
        self.emit(RegionEvent::Updated);
        if persist {
            self.schedule_save();
        }
    }

    // ── Mutations ────────────────────────────────────────────────

    /// Adds objects, replacing (not merging) any with the same id.
    pub fn add(&self, objects: Vec<DataObject>) -> SyncResult<()> {
        let changed: Vec<String> = {
            let mut state = lock(&self.state);
            state.ensure_open()?;
            objects.into_iter().map(|o| state.upsert(o)).collect()
        };
        debug!("Added {} objects to {}", changed.len(), self.state_key);
        self.notify_changed(&changed, true);
        Ok(())
    }

    /// Deep-merges partial changes into loaded objects.
    ///
    /// Deltas for unknown ids, or for objects whose fields were never
    /// fetched, are skipped. Returns the number applied.
    pub fn update(&self, deltas: &[ObjectDelta]) -> SyncResult<usize> {
        let changed: Vec<String> = {
            let mut state = lock(&self.state);
            state.ensure_open()?;
            let mut changed = Vec::with_capacity(deltas.len());
            for delta in deltas {
                let Some(entry) = state.objects.get_mut(&delta.id) else {
                    continue;
                };
                if entry.object.apply_changes(&delta.changes) {
                    entry.invalidate();
                    changed.push(delta.id.clone());
                }
            }
            changed
        };
        self.notify_changed(&changed, true);
        Ok(changed.len())
    }

    /// Removes objects by id. Unknown ids are ignored. Returns the number removed.
    pub fn remove<I, S>(&self, ids: I) -> SyncResult<usize>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let removed: Vec<String> = {
            let mut state = lock(&self.state);
            state.ensure_open()?;
            ids.into_iter()
                .filter_map(|id| state.objects.remove(id.as_ref()).map(|e| e.object.id))
                .collect()
        };
        debug!("Removed {} objects from {}", removed.len(), self.state_key);
        self.notify_changed(&removed, true);
        Ok(removed.len())
    }

    // ── Reads ────────────────────────────────────────────────────

    /// The projection of one object over current (possibly stale) state.
    pub fn get(&self, id: &str) -> Option<P::Item> {
        let mut state = lock(&self.state);
        let entry = state.objects.get_mut(id)?;
        entry.project(|o| self.plugin.map(o))
    }

    /// Projections of every object the plugin maps, ordered by id.
    pub fn get_all(&self) -> Vec<P::Item> {
        let mut state = lock(&self.state);
        state
            .objects
            .values_mut()
            .filter_map(|entry| entry.project(|o| self.plugin.map(o)))
            .collect()
    }

    /// Like [`Region::get`], after synchronizing.
    pub async fn get_stable(&self, id: &str) -> SyncResult<Option<P::Item>> {
        self.synchronize().await?;
        Ok(self.get(id))
    }

    /// Like [`Region::get_all`], after synchronizing.
    pub async fn get_all_stable(&self) -> SyncResult<Vec<P::Item>> {
        self.synchronize().await?;
        Ok(self.get_all())
    }

    // ── Synchronization ──────────────────────────────────────────

    /// Brings the region up to date with the remote.
    ///
    /// Concurrent callers share one in-flight load. Resolves immediately when
    /// already synchronized. A failure is recorded as [`Region::error`] and
    /// emitted as [`RegionEvent::Error`] as well as returned; it is not
    /// retried until the next call.
    pub async fn synchronize(&self) -> SyncResult<()> {
        let pending = {
            let mut slot = lock(&self.sync_slot);
            match &*slot {
                SyncSlot::InFlight(pending) => pending.clone(),
                SyncSlot::Idle => {
                    {
                        let state = lock(&self.state);
                        state.ensure_open()?;
                        if state.synchronized {
                            return Ok(());
                        }
                    }
                    let region = self.this.upgrade().ok_or(SyncError::RegionClosed)?;
                    let pending = region.run_synchronize().boxed().shared();
                    *slot = SyncSlot::InFlight(pending.clone());
                    pending
                }
            }
        };
        pending.await
    }

    /// Forgets the synchronized flag and synchronizes again.
    pub async fn force_synchronize(&self) -> SyncResult<()> {
        lock(&self.state).synchronized = false;
        self.synchronize().await
    }

    async fn run_synchronize(self: Arc<Self>) -> SyncResult<()> {
        debug!("Synchronizing region {}", self.state_key);
        let loaded = AssertUnwindSafe(self.plugin.load(&self))
            .catch_unwind()
            .await
            .unwrap_or_else(|_| Err(SyncError::Internal("region load panicked".into())));
        let outcome = match loaded {
            Ok(ids) => {
                self.finish_synchronize(ids);
                Ok(())
            }
            Err(e) => {
                warn!("Region {} failed to synchronize: {}", self.state_key, e);
                self.mark_failed(&e);
                Err(e)
            }
        };
        *lock(&self.sync_slot) = SyncSlot::Idle;
        outcome
    }

    fn finish_synchronize(&self, ids: Option<Vec<String>>) {
        let stale: Vec<String> = {
            let mut state = lock(&self.state);
            if state.closed {
                return;
            }
            let stale = match ids {
                Some(ids) => {
                    let keep: HashSet<String> = ids.into_iter().collect();
                    let stale: Vec<String> = state
                        .objects
                        .keys()
                        .filter(|id| !keep.contains(*id))
                        .cloned()
                        .collect();
                    for id in &stale {
                        state.objects.remove(id);
                    }
                    stale
                }
                None => Vec::new(),
            };
            state.synchronized = true;
            state.error = None;
            stale
        };
        info!(
            "Region {} synchronized ({} stale objects dropped)",
            self.state_key,
            stale.len()
        );
        self.notify_changed(&stale, true);
        self.emit(RegionEvent::Synchronized);
    }

    // ── Optimistic writes ────────────────────────────────────────

    /// Writes `value` at `path` in a loaded object before the remote confirms.
    ///
    /// The returned [`Undo`] restores the previous value, unless the field has
    /// been overwritten again in the meantime.
    pub fn preemptive_change(&self, id: &str, path: &str, value: Value) -> SyncResult<Undo> {
        let previous = {
            let mut state = lock(&self.state);
            state.ensure_open()?;
            let entry = state.loaded_data(id)?;
            let data = entry
                .object
                .data
                .as_mut()
                .ok_or_else(|| SyncError::ObjectNotLoaded(id.to_string()))?;
            let previous = set_path(data, path, value.clone())?;
            entry.invalidate();
            previous
        };
        self.notify_changed(&[id.to_string()], true);

        let region = self.this.clone();
        let (id, path) = (id.to_string(), path.to_string());
        Ok(Undo::new(move || {
            if let Some(region) = region.upgrade() {
                region.revert_change(&id, &path, &value, previous);
            }
        }))
    }

    fn revert_change(&self, id: &str, path: &str, written: &Value, previous: Option<Value>) {
        {
            let mut state = lock(&self.state);
            if state.closed {
                return;
            }
            let Ok(entry) = state.loaded_data(id) else {
                return;
            };
            let Some(data) = entry.object.data.as_mut() else {
                return;
            };
            if get_path(data, path) != Some(written) {
                debug!("Not reverting {}.{}: overwritten since", id, path);
                return;
            }
            match previous {
                Some(value) => {
                    if let Err(e) = set_path(data, path, value) {
                        warn!("Failed to revert {}.{}: {}", id, path, e);
                        return;
                    }
                }
                None => {
                    remove_path(data, path);
                }
            }
            entry.invalidate();
        }
        self.notify_changed(&[id.to_string()], true);
    }

    /// Removes an object before the remote confirms.
    ///
    /// The returned [`Undo`] puts the object back only if no object with the
    /// same id has been added since.
    pub fn preemptive_remove(&self, id: &str) -> SyncResult<Undo> {
        let (object, token) = {
            let mut state = lock(&self.state);
            state.ensure_open()?;
            let entry = state
                .objects
                .remove(id)
                .ok_or_else(|| SyncError::ObjectNotLoaded(id.to_string()))?;
            state.next_token += 1;
            let token = state.next_token;
            state.tombstones.insert(id.to_string(), token);
            (entry.object, token)
        };
        self.notify_changed(&[id.to_string()], true);

        let restore = self.this.clone();
        let release = self.this.clone();
        let released_id = id.to_string();
        Ok(Undo::new(move || {
            if let Some(region) = restore.upgrade() {
                region.restore_removed(object, token);
            }
        })
        .with_release(move || {
            if let Some(region) = release.upgrade() {
                region.release_tombstone(&released_id, token);
            }
        }))
    }

    fn restore_removed(&self, object: DataObject, token: u64) {
        let id = object.id.clone();
        {
            let mut state = lock(&self.state);
            let current = state.tombstones.get(&id).copied();
            if current == Some(token) {
                state.tombstones.remove(&id);
            }
            if state.closed || current != Some(token) || state.objects.contains_key(&id) {
                debug!("Not restoring {}: re-added since removal", id);
                return;
            }
            state.objects.insert(id.clone(), Entry::new(object));
        }
        self.notify_changed(&[id], true);
    }

    fn release_tombstone(&self, id: &str, token: u64) {
        let mut state = lock(&self.state);
        if state.tombstones.get(id) == Some(&token) {
            state.tombstones.remove(id);
        }
    }

    // ── Persistence ──────────────────────────────────────────────

    /// Seeds the region from its persisted snapshot.
    ///
    /// Objects already present (e.g. from a sync that finished first) are not
    /// overwritten. Returns the number of objects inserted.
    pub async fn load_from_cache(&self) -> usize {
        let objects = match self.persistence.load(&self.state_key).await {
            Ok(Some(objects)) => objects,
            Ok(None) => return 0,
            Err(e) => {
                warn!("Failed to load cache for {}: {}", self.state_key, e);
                return 0;
            }
        };
        let inserted: Vec<String> = {
            let mut state = lock(&self.state);
            if state.closed {
                return 0;
            }
            let mut inserted = Vec::new();
            for object in objects {
                if state.objects.contains_key(&object.id)
                    || state.tombstones.contains_key(&object.id)
                {
                    continue;
                }
                inserted.push(object.id.clone());
                state.objects.insert(object.id.clone(), Entry::new(object));
            }
            inserted
        };
        info!("Loaded {} cached objects into {}", inserted.len(), self.state_key);
        self.notify_changed(&inserted, false);
        inserted.len()
    }

    /// Writes the current snapshot now. Failures are logged, never returned:
    /// memory stays the source of truth.
    pub async fn save(&self) {
        let objects = self.snapshot();
        match self.persistence.save(&self.state_key, &objects).await {
            Ok(()) => debug!("Persisted {} objects for {}", objects.len(), self.state_key),
            Err(e) => warn!("Failed to persist {}: {}", self.state_key, e),
        }
    }

    /// Writes the pending debounced snapshot immediately, if there is one.
    pub async fn flush(&self) {
        if self.saver.cancel() {
            self.save().await;
        }
    }

    /// Whether a debounced save is waiting.
    pub fn has_pending_save(&self) -> bool {
        self.saver.is_pending()
    }

    fn schedule_save(&self) {
        let region = self.this.clone();
        self.saver.schedule(async move {
            if let Some(region) = region.upgrade() {
                region.save().await;
            }
        });
    }

    // ── Lifecycle ────────────────────────────────────────────────

    /// Closes the region: it leaves its registry, stops receiving live
    /// updates and rejects further mutations. Idempotent.
    pub fn close(&self) {
        let hooks = {
            let mut state = lock(&self.state);
            if state.closed {
                return;
            }
            state.closed = true;
            std::mem::take(&mut *lock(&self.close_hooks))
        };
        if self.saver.cancel() {
            if let Some(region) = self.this.upgrade() {
                spawn_detached("final save", async move { region.save().await });
            }
        }
        for hook in hooks {
            hook();
        }
        self.emit(RegionEvent::Closed);
        info!("Closed region {}", self.state_key);
    }

    /// Runs `hook` when the region closes (immediately if it already has).
    pub(crate) fn on_close(&self, hook: impl FnOnce() + Send + 'static) {
        {
            let state = lock(&self.state);
            if !state.closed {
                lock(&self.close_hooks).push(Box::new(hook));
                return;
            }
        }
        hook();
    }
}

impl<P: RegionPlugin> LiveUpdateTarget for Region<P> {
    fn apply_live_updates(&self, updates: &[ObjectDelta]) {
        if let Err(e) = self.update(updates) {
            debug!("Dropping live updates for {}: {}", self.state_key, e);
        }
    }
}

#[async_trait]
impl<P: RegionPlugin> SyncTarget for Region<P> {
    fn name(&self) -> String {
        self.state_key.clone()
    }

    fn is_empty(&self) -> bool {
        Region::is_empty(self)
    }

    fn ids(&self) -> Vec<String> {
        Region::ids(self)
    }

    fn snapshot(&self) -> Vec<DataObject> {
        Region::snapshot(self)
    }

    fn upsert(&self, objects: Vec<DataObject>) -> SyncResult<()> {
        self.add(objects)
    }

    fn merge(&self, deltas: &[ObjectDelta]) -> SyncResult<usize> {
        self.update(deltas)
    }

    fn delete(&self, ids: &[String]) -> SyncResult<usize> {
        self.remove(ids)
    }

    fn preemptive_change(&self, id: &str, path: &str, value: Value) -> SyncResult<Undo> {
        Region::preemptive_change(self, id, path, value)
    }

    fn mark_synchronized(&self) {
        {
            let mut state = lock(&self.state);
            if state.closed {
                return;
            }
            state.synchronized = true;
            state.error = None;
        }
        self.emit(RegionEvent::Synchronized);
    }

    fn mark_failed(&self, error: &SyncError) {
        {
            let mut state = lock(&self.state);
            if state.closed {
                return;
            }
            state.error = Some(error.clone());
        }
        self.emit(RegionEvent::Error(error.clone()));
    }

    async fn persist(&self) {
        self.saver.cancel();
        self.save().await;
    }
}
