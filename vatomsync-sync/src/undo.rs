//! Compensating actions for optimistic local writes.

use std::fmt;

type Action = Box<dyn FnOnce() + Send>;

/// Reverts one optimistic write.
///
/// Call [`Undo::undo`] when the remote rejects the write. Dropping the value
/// (or calling [`Undo::dismiss`]) accepts the write and releases whatever
/// bookkeeping the revert needed.
///
/// The revert re-validates against the region's current state when it runs:
/// it never overwrites data that changed after the optimistic write.
pub struct Undo {
    revert: Option<Action>,
    release: Option<Action>,
}

impl Undo {
    pub(crate) fn new(revert: impl FnOnce() + Send + 'static) -> Self {
        Self {
            revert: Some(Box::new(revert)),
            release: None,
        }
    }

    pub(crate) fn with_release(mut self, release: impl FnOnce() + Send + 'static) -> Self {
        self.release = Some(Box::new(release));
        self
    }

    /// An undo that does nothing.
    pub fn noop() -> Self {
        Self {
            revert: None,
            release: None,
        }
    }

    /// Reverts the write.
    pub fn undo(mut self) {
        self.release = None;
        if let Some(revert) = self.revert.take() {
            revert();
        }
    }

    /// Accepts the write.
    pub fn dismiss(self) {
        drop(self);
    }
}

impl Drop for Undo {
    fn drop(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

impl fmt::Debug for Undo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Undo")
            .field("armed", &self.revert.is_some())
            .finish()
    }
}
