//! Remote-facing workers.
//!
//! Each worker runs on its own task and reports back to the coordinator's run
//! loop through [`WorkerMessage`]s; none of them touches the sync target.

use super::SyncMode;
use crate::config::CoordinatorConfig;
use crate::error::{SyncError, SyncResult};
use crate::remote::{ChangeSet, ChangeToken, RemoteSource, with_timeout};
use futures::stream::{FuturesUnordered, StreamExt};
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::AbortHandle;
use tracing::{debug, warn};

/// What a worker was doing, so a lost worker can be failed precisely.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum WorkerTask {
    Sync(SyncMode),
    Delete(u64),
    Action(u64),
}

/// How a full sync ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct FullOutcome {
    pub pages: usize,
    /// A page came back empty: every remote record has been seen.
    pub complete: bool,
    pub ceiling_reached: bool,
    /// Change token read before the first page, so changes made while
    /// paging are still newer than it.
    pub token: Option<ChangeToken>,
}

/// Result of a partial sync.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum DeltaOutcome {
    UpToDate(ChangeToken),
    Changes(ChangeSet),
}

pub(crate) enum WorkerMessage {
    Page {
        page: usize,
        records: Vec<Value>,
    },
    FullFinished(SyncResult<FullOutcome>),
    DeltaFetched(SyncResult<DeltaOutcome>),
    DeleteFinished {
        ticket: u64,
        result: SyncResult<()>,
    },
    ActionFinished {
        ticket: u64,
        result: SyncResult<Value>,
    },
    WorkerLost {
        task: WorkerTask,
        reason: String,
    },
}

/// Runs `work` on its own task and forwards its final message.
///
/// If the task panics or is cancelled, a `WorkerLost` message is sent in its
/// place, so the run loop never waits on a worker that will not report.
pub(crate) fn supervise<F>(
    task: WorkerTask,
    tx: mpsc::UnboundedSender<WorkerMessage>,
    work: F,
) -> AbortHandle
where
    F: Future<Output = WorkerMessage> + Send + 'static,
{
    let worker = tokio::spawn(work);
    let abort = worker.abort_handle();
    tokio::spawn(async move {
        let message = match worker.await {
            Ok(message) => message,
            Err(e) => {
                warn!("Worker {:?} lost: {}", task, e);
                WorkerMessage::WorkerLost {
                    task,
                    reason: e.to_string(),
                }
            }
        };
        // The run loop may already be gone.
        let _ = tx.send(message);
    });
    abort
}

/// Pages through the filtered collection in windows of `concurrent_pages`.
///
/// The change token is read first; the sync is only known to cover changes
/// up to that point.
///
/// Pages are forwarded as they complete, in completion order. Stops after
/// the window containing an empty page, on the first error, or once
/// `max_pages` have been requested.
pub(crate) async fn full_sync(
    remote: Arc<dyn RemoteSource>,
    config: CoordinatorConfig,
    pages: mpsc::UnboundedSender<WorkerMessage>,
) -> WorkerMessage {
    let window = config.concurrent_pages.max(1);
    let max_pages = config.max_pages.max(1);
    let timeout = config.request_timeout();
    let token = match with_timeout(timeout, remote.fetch_change_token()).await {
        Ok(token) => Some(token),
        Err(e) => {
            debug!("No change token for full sync: {}", e);
            None
        }
    };
    let mut fetched = 0;
    let mut next_page = 1;

    while next_page <= max_pages {
        let last_page = (next_page + window - 1).min(max_pages);
        let mut requests: FuturesUnordered<_> = (next_page..=last_page)
            .map(|page| {
                let remote = remote.clone();
                let filter = config.filter.clone();
                let page_size = config.page_size;
                async move {
                    let result =
                        with_timeout(timeout, remote.fetch_page(&filter, page, page_size)).await;
                    (page, result)
                }
            })
            .collect();

        let mut reached_end = false;
        while let Some((page, result)) = requests.next().await {
            fetched += 1;
            match result {
                Ok(fetched_page) => {
                    debug!("Fetched page {} ({} records)", page, fetched_page.records.len());
                    reached_end |= fetched_page.is_empty();
                    if pages
                        .send(WorkerMessage::Page {
                            page,
                            records: fetched_page.records,
                        })
                        .is_err()
                    {
                        return WorkerMessage::FullFinished(Err(SyncError::ChannelClosed));
                    }
                }
                Err(e) => return WorkerMessage::FullFinished(Err(e)),
            }
        }

        if reached_end {
            return WorkerMessage::FullFinished(Ok(FullOutcome {
                pages: fetched,
                complete: true,
                ceiling_reached: false,
                token,
            }));
        }
        next_page = last_page + 1;
    }

    warn!("Full sync stopped at the {} page ceiling", max_pages);
    WorkerMessage::FullFinished(Ok(FullOutcome {
        pages: fetched,
        complete: false,
        ceiling_reached: true,
        token,
    }))
}

/// Compares the remote change token with `since` and fetches the difference.
pub(crate) async fn delta_sync(
    remote: Arc<dyn RemoteSource>,
    timeout: Duration,
    since: ChangeToken,
) -> WorkerMessage {
    let result: SyncResult<DeltaOutcome> = async {
        let current = with_timeout(timeout, remote.fetch_change_token()).await?;
        if current == since {
            return Ok(DeltaOutcome::UpToDate(current));
        }
        let changes = with_timeout(timeout, remote.fetch_changes(&since)).await?;
        Ok(DeltaOutcome::Changes(changes))
    }
    .await;
    WorkerMessage::DeltaFetched(result)
}

pub(crate) async fn delete_record(
    remote: Arc<dyn RemoteSource>,
    timeout: Duration,
    ticket: u64,
    id: String,
) -> WorkerMessage {
    let result = with_timeout(timeout, remote.delete_record(&id)).await;
    WorkerMessage::DeleteFinished { ticket, result }
}

pub(crate) async fn perform_action(
    remote: Arc<dyn RemoteSource>,
    timeout: Duration,
    ticket: u64,
    name: String,
    payload: Value,
) -> WorkerMessage {
    let result = with_timeout(timeout, remote.perform_action(&name, payload)).await;
    WorkerMessage::ActionFinished { ticket, result }
}
