//! Push channel abstraction.
//!
//! The WebSocket client decodes frames into [`PushEvent`]s and publishes them
//! on a [`PushChannel`]. Subscribers get every event, in publish order, on an
//! unbounded queue: a slow consumer delays events but never loses them.

use crate::task::lock;
use std::collections::VecDeque;
use std::sync::Mutex;
use tokio::sync::mpsc;
use tracing::debug;
use vatomsync_types::PushEvent;

/// A source of push events that can be paused without losing events.
pub trait PushChannel: Send + Sync {
    /// Registers a new subscriber.
    fn subscribe(&self) -> mpsc::UnboundedReceiver<PushEvent>;

    /// Holds delivery. Pauses nest: delivery resumes after the matching
    /// number of `resume` calls.
    fn pause(&self);

    /// Releases one pause; when none remain, held events are delivered in
    /// their original order.
    fn resume(&self);

    /// Whether delivery is currently held.
    fn is_paused(&self) -> bool;
}

#[derive(Debug, Default)]
struct ChannelState {
    subscribers: Vec<mpsc::UnboundedSender<PushEvent>>,
    pause_depth: usize,
    held: VecDeque<PushEvent>,
}

impl ChannelState {
    fn deliver(&mut self, event: PushEvent) {
        self.subscribers
            .retain(|subscriber| subscriber.send(event.clone()).is_ok());
    }
}

/// In-process push channel.
#[derive(Debug, Default)]
pub struct LocalPushChannel {
    state: Mutex<ChannelState>,
}

impl LocalPushChannel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publishes an event to every subscriber (or holds it while paused).
    pub fn publish(&self, event: PushEvent) {
        let mut state = lock(&self.state);
        if state.pause_depth > 0 {
            state.held.push_back(event);
        } else {
            state.deliver(event);
        }
    }

    /// Number of live subscribers.
    pub fn subscriber_count(&self) -> usize {
        let mut state = lock(&self.state);
        state.subscribers.retain(|s| !s.is_closed());
        state.subscribers.len()
    }

    /// Number of events held by a pause.
    pub fn held_count(&self) -> usize {
        lock(&self.state).held.len()
    }
}

impl PushChannel for LocalPushChannel {
    fn subscribe(&self) -> mpsc::UnboundedReceiver<PushEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        lock(&self.state).subscribers.push(tx);
        rx
    }

    fn pause(&self) {
        lock(&self.state).pause_depth += 1;
    }

    fn resume(&self) {
        let mut state = lock(&self.state);
        if state.pause_depth == 0 {
            return;
        }
        state.pause_depth -= 1;
        if state.pause_depth == 0 {
            let held = std::mem::take(&mut state.held);
            if !held.is_empty() {
                debug!("Releasing {} held push events", held.len());
            }
            for event in held {
                state.deliver(event);
            }
        }
    }

    fn is_paused(&self) -> bool {
        lock(&self.state).pause_depth > 0
    }
}
