//! Wall-clock timestamps for scheduled state changes.
//!
//! Predicted-state batches from the push stream carry absolute times in
//! milliseconds since the Unix epoch. Only ordering and "has it passed yet"
//! matter here, so there is no logical component.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Milliseconds since the Unix epoch.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Timestamp(u64);

impl Timestamp {
    /// Returns the current wall-clock time.
    ///
    /// A clock set before the epoch reads as zero.
    #[must_use]
    pub fn now() -> Self {
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);
        Self(millis)
    }

    /// Creates a timestamp from epoch milliseconds.
    #[must_use]
    pub const fn from_millis(millis: u64) -> Self {
        Self(millis)
    }

    /// Returns epoch milliseconds.
    #[must_use]
    pub const fn as_millis(&self) -> u64 {
        self.0
    }

    /// Returns this timestamp shifted forward, saturating at `u64::MAX`.
    #[must_use]
    pub fn after(&self, delta: Duration) -> Self {
        Self(self.0.saturating_add(delta.as_millis() as u64))
    }

    /// True when this timestamp is at or before `now`.
    #[must_use]
    pub fn has_passed(&self, now: Timestamp) -> bool {
        self.0 <= now.0
    }

    /// Time remaining until this timestamp, zero if already passed.
    #[must_use]
    pub fn until(&self, now: Timestamp) -> Duration {
        Duration::from_millis(self.0.saturating_sub(now.0))
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}ms", self.0)
    }
}
