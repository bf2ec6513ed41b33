//! Remote source abstraction.
//!
//! The REST layer (endpoints, OAuth refresh, HTTP) lives outside this crate.
//! It implements [`RemoteSource`] and hands back raw JSON records; decoding
//! into [`vatomsync_types::DataObject`] happens here so one malformed record
//! never fails a page.

use crate::error::{SyncError, SyncResult};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::future::Future;
use std::time::Duration;

/// Selects the remote collection a full sync pages through.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageFilter {
    /// Collection scope, e.g. the inventory root `"."` or a folder id.
    pub scope: String,
    /// Extra query parameters passed through to the remote verbatim.
    #[serde(default)]
    pub params: Value,
}

impl PageFilter {
    pub fn new(scope: impl Into<String>) -> Self {
        Self {
            scope: scope.into(),
            params: Value::Null,
        }
    }
}

impl Default for PageFilter {
    fn default() -> Self {
        Self::new(".")
    }
}

/// One page of a paginated fetch.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Page {
    pub records: Vec<Value>,
    /// Opaque continuation marker, when the remote provides one.
    #[serde(default)]
    pub cursor: Option<String>,
}

impl Page {
    pub fn new(records: Vec<Value>) -> Self {
        Self {
            records,
            cursor: None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Server-side change-detection token (inventory hash / sync number).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChangeToken(pub String);

impl ChangeToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ChangeToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Records changed since a token.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeSet {
    /// Full current records for everything added or modified.
    pub changed: Vec<Value>,
    /// Ids that left the collection.
    #[serde(default)]
    pub removed: Vec<String>,
    /// Token describing the state after these changes.
    pub token: ChangeToken,
}

/// The server the cache mirrors.
#[async_trait]
pub trait RemoteSource: Send + Sync {
    /// Fetches one page (1-based) of the filtered collection.
    async fn fetch_page(
        &self,
        filter: &PageFilter,
        page: usize,
        page_size: usize,
    ) -> SyncResult<Page>;

    /// Fetches full records for specific ids.
    async fn fetch_by_ids(&self, ids: &[String]) -> SyncResult<Vec<Value>>;

    /// Fetches the current change token.
    async fn fetch_change_token(&self) -> SyncResult<ChangeToken>;

    /// Fetches what changed since `since`.
    ///
    /// Remotes without delta support keep the default, which makes the
    /// coordinator fall back to a full sync.
    async fn fetch_changes(&self, since: &ChangeToken) -> SyncResult<ChangeSet> {
        let _ = since;
        Err(SyncError::Unsupported("fetch_changes".into()))
    }

    /// Deletes a record.
    async fn delete_record(&self, id: &str) -> SyncResult<()>;

    /// Performs a named action (transfer, drop, pick up, ...).
    async fn perform_action(&self, name: &str, payload: Value) -> SyncResult<Value>;
}

/// Bounds a remote call by `timeout`.
pub(crate) async fn with_timeout<T, F>(timeout: Duration, call: F) -> SyncResult<T>
where
    F: Future<Output = SyncResult<T>>,
{
    match tokio::time::timeout(timeout, call).await {
        Ok(result) => result,
        Err(_) => Err(SyncError::Timeout),
    }
}
