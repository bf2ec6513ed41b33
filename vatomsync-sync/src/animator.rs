//! Live-update animator.
//!
//! The push stream sends predicted future states for objects (motion
//! interpolation and the like) as lists of `(time, partial change)` pairs.
//! The animator queues them by apply time and, on a short repeating timer,
//! merges every due change into each subscribed target in one batch.
//!
//! The timer is the only polling loop in the crate. It starts on the first
//! enqueue and stops as soon as the queue drains.

use crate::config::AnimatorConfig;
use crate::task::{lock, spawn_detached};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, Weak};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, trace};
use vatomsync_types::{ObjectDelta, PredictedChange, PushEvent, SubscriptionId, Timestamp};

/// Receives batches of due live updates.
pub trait LiveUpdateTarget: Send + Sync {
    /// Merges `updates` into whichever of the objects the target holds.
    fn apply_live_updates(&self, updates: &[ObjectDelta]);
}

/// One queued change.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingUpdate {
    pub apply_at: Timestamp,
    pub object_id: String,
    pub changes: Value,
}

type Clock = Arc<dyn Fn() -> Timestamp + Send + Sync>;

#[derive(Default)]
struct Schedule {
    /// Sorted ascending by `apply_at`; equal times keep arrival order.
    queue: Vec<PendingUpdate>,
    timer: Option<JoinHandle<()>>,
}

struct AnimatorShared {
    config: AnimatorConfig,
    clock: Clock,
    schedule: Mutex<Schedule>,
    targets: Mutex<HashMap<SubscriptionId, Weak<dyn LiveUpdateTarget>>>,
}

impl Drop for AnimatorShared {
    fn drop(&mut self) {
        if let Some(timer) = lock(&self.schedule).timer.take() {
            timer.abort();
        }
    }
}

/// Schedules predicted changes and applies them when due.
///
/// Cloning is cheap; clones share one queue and one set of targets.
#[derive(Clone)]
pub struct LiveUpdateAnimator {
    shared: Arc<AnimatorShared>,
}

impl LiveUpdateAnimator {
    /// Creates an animator driven by the wall clock.
    pub fn new(config: AnimatorConfig) -> Self {
        Self::with_clock(config, Timestamp::now)
    }

    /// Creates an animator that reads time from `clock`.
    pub fn with_clock(
        config: AnimatorConfig,
        clock: impl Fn() -> Timestamp + Send + Sync + 'static,
    ) -> Self {
        Self {
            shared: Arc::new(AnimatorShared {
                config,
                clock: Arc::new(clock),
                schedule: Mutex::new(Schedule::default()),
                targets: Mutex::new(HashMap::new()),
            }),
        }
    }

    fn now(&self) -> Timestamp {
        (self.shared.clock)()
    }

    /// Registers a target. The animator never keeps it alive; a target that
    /// has been dropped is skipped and pruned on the next tick.
    pub fn subscribe(&self, target: Weak<dyn LiveUpdateTarget>) -> SubscriptionId {
        let id = SubscriptionId::new();
        lock(&self.shared.targets).insert(id, target);
        debug!("Live-update target {} subscribed", id);
        id
    }

    /// Removes a target. Returns false if it was not registered.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        lock(&self.shared.targets).remove(&id).is_some()
    }

    /// Number of registered targets that are still alive.
    pub fn target_count(&self) -> usize {
        lock(&self.shared.targets)
            .values()
            .filter(|t| t.strong_count() > 0)
            .count()
    }

    /// Copy of the queue, in apply order.
    pub fn pending(&self) -> Vec<PendingUpdate> {
        lock(&self.shared.schedule).queue.clone()
    }

    /// Whether the timer is active.
    pub fn is_running(&self) -> bool {
        lock(&self.shared.schedule).timer.is_some()
    }

    /// Queues a batch of predicted changes for one object.
    ///
    /// Queued changes for the same object due at or before the batch's
    /// earliest time are dropped: the new batch supersedes them. Changes
    /// whose time has already passed are discarded. Returns the number of
    /// changes queued.
    pub fn enqueue(&self, object_id: &str, changes: Vec<PredictedChange>) -> usize {
        let Some(earliest) = changes.iter().map(|c| c.time).min() else {
            return 0;
        };
        let now = self.now();

        let mut schedule = lock(&self.shared.schedule);
        let before = schedule.queue.len();
        schedule
            .queue
            .retain(|u| !(u.object_id == object_id && u.apply_at <= earliest));
        let superseded = before - schedule.queue.len();

        let mut queued = 0;
        for change in changes {
            if change.time.has_passed(now) {
                continue;
            }
            schedule.queue.push(PendingUpdate {
                apply_at: change.time,
                object_id: object_id.to_string(),
                changes: change.changes,
            });
            queued += 1;
        }
        schedule.queue.sort_by_key(|u| u.apply_at);

        trace!(
            "Queued {} live updates for {} ({} superseded)",
            queued, object_id, superseded
        );
        self.ensure_timer(&mut schedule);
        queued
    }

    /// Feeds a push event to the animator. Returns whether it was a
    /// predicted-state event.
    pub fn handle_event(&self, event: &PushEvent) -> bool {
        match event {
            PushEvent::PredictedStateUpdate { id, changes } => {
                self.enqueue(id, changes.clone());
                true
            }
            _ => false,
        }
    }

    /// Consumes a push subscription on a background task until the channel
    /// closes or the animator is dropped.
    pub fn attach(&self, mut events: mpsc::UnboundedReceiver<PushEvent>) -> JoinHandle<()> {
        let shared = Arc::downgrade(&self.shared);
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                let Some(shared) = shared.upgrade() else {
                    break;
                };
                LiveUpdateAnimator { shared }.handle_event(&event);
            }
            debug!("Live-update feed closed");
        })
    }

    /// Applies every due update. Returns how many were applied.
    ///
    /// Called by the timer; callable directly when driving a manual clock.
    pub fn tick(&self) -> usize {
        let now = self.now();
        let due: Vec<PendingUpdate> = {
            let mut schedule = lock(&self.shared.schedule);
            let count = schedule
                .queue
                .iter()
                .take_while(|u| u.apply_at.has_passed(now))
                .count();
            schedule.queue.drain(..count).collect()
        };

        let applied = due.len();
        if applied > 0 {
            let batch: Vec<ObjectDelta> = due
                .into_iter()
                .map(|u| ObjectDelta::new(u.object_id, u.changes))
                .collect();
            for target in self.live_targets() {
                target.apply_live_updates(&batch);
            }
            trace!("Applied {} live updates", applied);
        }

        let mut schedule = lock(&self.shared.schedule);
        if schedule.queue.is_empty() {
            if let Some(timer) = schedule.timer.take() {
                timer.abort();
                debug!("Live-update queue drained; timer stopped");
            }
        }
        applied
    }

    /// Drops every queued update and stops the timer.
    pub fn clear(&self) {
        let mut schedule = lock(&self.shared.schedule);
        schedule.queue.clear();
        if let Some(timer) = schedule.timer.take() {
            timer.abort();
        }
    }

    fn live_targets(&self) -> Vec<Arc<dyn LiveUpdateTarget>> {
        let mut targets = lock(&self.shared.targets);
        let mut live = Vec::with_capacity(targets.len());
        targets.retain(|id, target| match target.upgrade() {
            Some(target) => {
                live.push(target);
                true
            }
            None => {
                debug!("Pruning dropped live-update target {}", id);
                false
            }
        });
        live
    }

    fn ensure_timer(&self, schedule: &mut Schedule) {
        if schedule.timer.is_some() || schedule.queue.is_empty() {
            return;
        }
        let shared = Arc::downgrade(&self.shared);
        let period = self.shared.config.tick_interval();
        schedule.timer = spawn_detached("live-update timer", async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                interval.tick().await;
                let Some(shared) = shared.upgrade() else {
                    break;
                };
                LiveUpdateAnimator { shared }.tick();
            }
        });
        if schedule.timer.is_some() {
            debug!("Live-update timer started ({:?})", period);
        }
    }
}

impl fmt::Debug for LiveUpdateAnimator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let schedule = lock(&self.shared.schedule);
        f.debug_struct("LiveUpdateAnimator")
            .field("pending", &schedule.queue.len())
            .field("running", &schedule.timer.is_some())
            .finish()
    }
}
