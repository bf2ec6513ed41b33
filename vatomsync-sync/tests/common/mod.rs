//! Shared test helpers for sync tests.

#![allow(dead_code)]

use async_trait::async_trait;
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::watch;
use vatomsync_sync::{
    ChangeSet, ChangeToken, Page, PageFilter, Region, RegionPlugin, RemoteSource, SessionInfo,
    SyncError, SyncResult,
};
use vatomsync_types::{DataObject, decode_records};

pub const PARENT_FIELD: &str = "vAtom::vAtomType.parent_id";

/// Installs a tracing subscriber honouring `RUST_LOG`. Safe to call repeatedly.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// A raw remote record for a vAtom.
pub fn record(id: &str, title: &str, parent: &str) -> Value {
    json!({
        "id": id,
        "type": "vatom",
        "data": {
            "vAtom::vAtomType": { "title": title, "parent_id": parent }
        }
    })
}

pub fn vatom(id: &str, title: &str) -> DataObject {
    DataObject::from_record(&record(id, title, ".")).unwrap()
}

/// A face record; the inventory plugin does not project these.
pub fn face(id: &str) -> DataObject {
    DataObject::new(id, "face", json!({ "resource": "icon.png" }))
}

#[derive(Debug, Clone, PartialEq)]
pub struct VatomItem {
    pub id: String,
    pub title: String,
}

/// What an [`InventoryPlugin`] does when asked to load.
#[derive(Default)]
pub struct LoadScript {
    pub calls: AtomicUsize,
    pub records: Mutex<Vec<Value>>,
    /// Returned as the complete id list; `None` means "unknown".
    pub ids: Mutex<Option<Vec<String>>>,
    pub error: Mutex<Option<SyncError>>,
    /// `load` panics while set.
    pub panic: AtomicBool,
    gate: Mutex<Option<watch::Receiver<bool>>>,
}

impl LoadScript {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn returning(records: Vec<Value>, ids: Option<Vec<&str>>) -> Arc<Self> {
        let script = Self::new();
        *script.records.lock().unwrap() = records;
        *script.ids.lock().unwrap() = ids.map(|ids| ids.into_iter().map(String::from).collect());
        script
    }

    /// Makes `load` wait until the returned sender sends `true`.
    pub fn gated(&self) -> watch::Sender<bool> {
        let (tx, rx) = watch::channel(false);
        *self.gate.lock().unwrap() = Some(rx);
        tx
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

pub struct InventoryPlugin {
    pub user: String,
    pub script: Arc<LoadScript>,
}

impl InventoryPlugin {
    pub fn new(user: &str, script: Arc<LoadScript>) -> Self {
        Self {
            user: user.to_string(),
            script,
        }
    }
}

#[async_trait]
impl RegionPlugin for InventoryPlugin {
    type Item = VatomItem;

    fn plugin_id(&self) -> &str {
        "inventory"
    }

    fn descriptor(&self) -> Value {
        json!({ "user": self.user })
    }

    fn state_key(&self) -> String {
        format!("inventory:{}", self.user)
    }

    async fn load(&self, region: &Region<Self>) -> SyncResult<Option<Vec<String>>> {
        self.script.calls.fetch_add(1, Ordering::SeqCst);
        if self.script.panic.load(Ordering::SeqCst) {
            panic!("inventory load exploded");
        }
        let gate = self.script.gate.lock().unwrap().clone();
        if let Some(mut gate) = gate {
            let _ = gate.wait_for(|open| *open).await;
        }
        if let Some(error) = self.script.error.lock().unwrap().clone() {
            return Err(error);
        }
        let records = self.script.records.lock().unwrap().clone();
        region.add(decode_records(&records).objects)?;
        Ok(self.script.ids.lock().unwrap().clone())
    }

    fn map(&self, object: &DataObject) -> Option<VatomItem> {
        if object.object_type != "vatom" {
            return None;
        }
        Some(VatomItem {
            id: object.id.clone(),
            title: object.get_str("vAtom::vAtomType.title")?.to_string(),
        })
    }

    fn accepts_session(&self, info: &SessionInfo) -> bool {
        info.user_id.as_deref() == Some(self.user.as_str())
    }
}

/// Scriptable remote.
pub struct MockRemote {
    /// Page `n` (1-based) is `pages[n - 1]`; later pages are empty.
    pub pages: Mutex<Vec<Vec<Value>>>,
    /// Every page holds one fresh record and none is ever empty.
    pub endless: bool,
    /// Every page request fails with this error.
    pub page_error: Mutex<Option<SyncError>>,
    /// Every page request panics.
    pub panic_pages: AtomicBool,
    pub records: Mutex<HashMap<String, Value>>,
    pub token: Mutex<Option<ChangeToken>>,
    pub changes: Mutex<Option<SyncResult<ChangeSet>>>,
    pub delete_result: Mutex<SyncResult<()>>,
    pub action_result: Mutex<SyncResult<Value>>,
    pub page_calls: AtomicUsize,
    pub deleted: Mutex<Vec<String>>,
    pub actions: Mutex<Vec<(String, Value)>>,
    /// Runs once, right after page 1 has been read.
    after_first_page: Mutex<Option<Box<dyn FnOnce(&MockRemote) + Send>>>,
    page_gate: watch::Sender<bool>,
    action_gate: watch::Sender<bool>,
}

impl Default for MockRemote {
    fn default() -> Self {
        Self {
            pages: Mutex::new(Vec::new()),
            endless: false,
            page_error: Mutex::new(None),
            panic_pages: AtomicBool::new(false),
            records: Mutex::new(HashMap::new()),
            token: Mutex::new(None),
            changes: Mutex::new(None),
            delete_result: Mutex::new(Ok(())),
            action_result: Mutex::new(Ok(json!({ "ok": true }))),
            page_calls: AtomicUsize::new(0),
            deleted: Mutex::new(Vec::new()),
            actions: Mutex::new(Vec::new()),
            after_first_page: Mutex::new(None),
            page_gate: watch::channel(true).0,
            action_gate: watch::channel(true).0,
        }
    }
}

impl MockRemote {
    pub fn with_pages(pages: Vec<Vec<Value>>) -> Arc<Self> {
        let remote = Self::default();
        *remote.pages.lock().unwrap() = pages;
        Arc::new(remote)
    }

    pub fn endless() -> Arc<Self> {
        Arc::new(Self {
            endless: true,
            ..Self::default()
        })
    }

    pub fn add_record(&self, record: Value) {
        let id = record["id"].as_str().unwrap().to_string();
        self.records.lock().unwrap().insert(id, record);
    }

    pub fn set_token(&self, token: &str) {
        *self.token.lock().unwrap() = Some(ChangeToken::new(token));
    }

    /// Simulates a remote edit landing while a full sync is paging.
    pub fn after_first_page(&self, edit: impl FnOnce(&MockRemote) + Send + 'static) {
        *self.after_first_page.lock().unwrap() = Some(Box::new(edit));
    }

    pub fn hold_pages(&self) {
        self.page_gate.send_replace(false);
    }

    pub fn release_pages(&self) {
        self.page_gate.send_replace(true);
    }

    pub fn hold_actions(&self) {
        self.action_gate.send_replace(false);
    }

    pub fn release_actions(&self) {
        self.action_gate.send_replace(true);
    }

    pub fn page_calls(&self) -> usize {
        self.page_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RemoteSource for MockRemote {
    async fn fetch_page(
        &self,
        _filter: &PageFilter,
        page: usize,
        _page_size: usize,
    ) -> SyncResult<Page> {
        self.page_calls.fetch_add(1, Ordering::SeqCst);
        let mut gate = self.page_gate.subscribe();
        let _ = gate.wait_for(|open| *open).await;
        if self.panic_pages.load(Ordering::SeqCst) {
            panic!("remote exploded");
        }
        if let Some(error) = self.page_error.lock().unwrap().clone() {
            return Err(error);
        }
        if self.endless {
            return Ok(Page::new(vec![record(&format!("p{page}"), "paged", ".")]));
        }
        let records = self
            .pages
            .lock()
            .unwrap()
            .get(page - 1)
            .cloned()
            .unwrap_or_default();
        if page == 1 {
            let edit = self.after_first_page.lock().unwrap().take();
            if let Some(edit) = edit {
                edit(self);
            }
        }
        Ok(Page::new(records))
    }

    async fn fetch_by_ids(&self, ids: &[String]) -> SyncResult<Vec<Value>> {
        let records = self.records.lock().unwrap();
        Ok(ids.iter().filter_map(|id| records.get(id).cloned()).collect())
    }

    async fn fetch_change_token(&self) -> SyncResult<ChangeToken> {
        self.token
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| SyncError::Unsupported("fetch_change_token".into()))
    }

    async fn fetch_changes(&self, since: &ChangeToken) -> SyncResult<ChangeSet> {
        match self.changes.lock().unwrap().clone() {
            Some(result) => result,
            None => Err(SyncError::TokenRejected(since.to_string())),
        }
    }

    async fn delete_record(&self, id: &str) -> SyncResult<()> {
        self.deleted.lock().unwrap().push(id.to_string());
        self.delete_result.lock().unwrap().clone()
    }

    async fn perform_action(&self, name: &str, payload: Value) -> SyncResult<Value> {
        self.actions
            .lock()
            .unwrap()
            .push((name.to_string(), payload));
        let mut gate = self.action_gate.subscribe();
        let _ = gate.wait_for(|open| *open).await;
        self.action_result.lock().unwrap().clone()
    }
}
