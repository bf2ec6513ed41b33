//! Small runtime helpers shared by regions, the pool and the animator.

use std::future::Future;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::debug;

/// Locks a mutex, recovering the data if a previous holder panicked.
///
/// Every critical section in this crate leaves its state consistent before
/// any call that could panic, so a poisoned lock still guards valid data.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Spawns `future` on the current Tokio runtime, if there is one.
///
/// Regions are usable from plain threads (tests, FFI callers); background
/// work is skipped there instead of panicking.
pub(crate) fn spawn_detached<F>(what: &str, future: F) -> Option<JoinHandle<()>>
where
    F: Future<Output = ()> + Send + 'static,
{
    match Handle::try_current() {
        Ok(handle) => Some(handle.spawn(future)),
        Err(_) => {
            debug!("No Tokio runtime; skipping background {}", what);
            None
        }
    }
}
