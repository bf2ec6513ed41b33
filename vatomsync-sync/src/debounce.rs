//! Single-slot deferred task.

use crate::task::{lock, spawn_detached};
use std::future::Future;
use std::sync::Mutex;
use std::time::Duration;
use tokio::task::JoinHandle;

/// Runs the most recently scheduled task once `delay` has passed without a
/// newer one being scheduled.
///
/// Scheduling aborts whatever was pending and starts the quiet period over,
/// so a burst of mutations produces one write.
#[derive(Debug)]
pub struct Debouncer {
    delay: Duration,
    slot: Mutex<Option<JoinHandle<()>>>,
}

impl Debouncer {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            slot: Mutex::new(None),
        }
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Replaces the pending task with `task`, to run after the quiet period.
    pub fn schedule<F>(&self, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let delay = self.delay;
        let handle = spawn_detached("debounced task", async move {
            tokio::time::sleep(delay).await;
            task.await;
        });
        let previous = std::mem::replace(&mut *lock(&self.slot), handle);
        if let Some(previous) = previous {
            previous.abort();
        }
    }

    /// Cancels the pending task. Returns true if one was still waiting.
    pub fn cancel(&self) -> bool {
        match lock(&self.slot).take() {
            Some(handle) if !handle.is_finished() => {
                handle.abort();
                true
            }
            _ => false,
        }
    }

    /// Whether a task is scheduled and has not finished yet.
    pub fn is_pending(&self) -> bool {
        lock(&self.slot)
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }
}

impl Drop for Debouncer {
    fn drop(&mut self) {
        if let Some(handle) = lock(&self.slot).take() {
            handle.abort();
        }
    }
}
