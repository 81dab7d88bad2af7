// Per-session progress bus
//
// Publish/subscribe fan-out of progress events. Each subscriber owns a
// bounded buffer: on overflow the oldest non-terminal event is dropped and
// the subscription's drop counter is incremented. Terminal events are never
// dropped. Late subscribers first receive a replay of the current state.
// Publishing never blocks the engine.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;

use crate::models::{ProgressEvent, ProgressEventType};

/// Default per-subscriber buffer capacity
pub const DEFAULT_SUBSCRIBER_CAPACITY: usize = 64;

// ============================================================================
// Subscriber
// ============================================================================

struct SubscriberQueue {
    buffer: VecDeque<ProgressEvent>,
    capacity: usize,
    dropped: u64,
    closed: bool,
}

struct SubscriberState {
    queue: Mutex<SubscriberQueue>,
    notify: Notify,
}

impl SubscriberState {
    fn new(capacity: usize) -> Self {
        Self {
            queue: Mutex::new(SubscriberQueue {
                buffer: VecDeque::new(),
                capacity,
                dropped: 0,
                closed: false,
            }),
            notify: Notify::new(),
        }
    }

    fn push(&self, event: ProgressEvent) {
        {
            let mut queue = self.queue.lock().unwrap();
            if queue.closed {
                return;
            }
            if queue.buffer.len() >= queue.capacity {
                // Drop the oldest non-terminal event; terminal events stay
                let victim = queue.buffer.iter().position(|e| !e.is_terminal());
                if let Some(index) = victim {
                    queue.buffer.remove(index);
                    queue.dropped += 1;
                }
            }
            queue.buffer.push_back(event);
        }
        self.notify.notify_one();
    }

    fn close(&self) {
        {
            let mut queue = self.queue.lock().unwrap();
            queue.closed = true;
        }
        self.notify.notify_one();
    }
}

/// A live subscription to one session's event stream
pub struct ProgressSubscription {
    session_id: String,
    state: Arc<SubscriberState>,
}

impl ProgressSubscription {
    /// Receive the next event in publish order. Returns None once the
    /// session is closed and the buffer is drained.
    pub async fn recv(&mut self) -> Option<ProgressEvent> {
        loop {
            {
                let mut queue = self.state.queue.lock().unwrap();
                if let Some(event) = queue.buffer.pop_front() {
                    return Some(event);
                }
                if queue.closed {
                    return None;
                }
            }
            self.state.notify.notified().await;
        }
    }

    /// Number of events this subscription lost to overflow
    pub fn dropped(&self) -> u64 {
        self.state.queue.lock().unwrap().dropped
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }
}

// ============================================================================
// Bus
// ============================================================================

struct SessionChannel {
    subscribers: Vec<Arc<SubscriberState>>,
    /// Most recent event, kept for late-subscriber replay
    last_event: Option<ProgressEvent>,
    closed: bool,
}

impl SessionChannel {
    fn new() -> Self {
        Self {
            subscribers: Vec::new(),
            last_event: None,
            closed: false,
        }
    }
}

/// Fan-out of progress events to any number of subscribers per session
pub struct ProgressBus {
    channels: Mutex<HashMap<String, SessionChannel>>,
}

impl ProgressBus {
    pub fn new() -> Self {
        Self {
            channels: Mutex::new(HashMap::new()),
        }
    }

    /// Publish an event to every subscriber of the session. Never blocks;
    /// slow subscribers lose old events instead.
    pub fn publish(&self, event: ProgressEvent) {
        let mut channels = self.channels.lock().unwrap();
        let channel = channels
            .entry(event.session_id.clone())
            .or_insert_with(SessionChannel::new);
        if channel.closed {
            return;
        }

        for subscriber in &channel.subscribers {
            subscriber.push(event.clone());
        }
        channel.last_event = Some(event);
    }

    /// Subscribe with the default buffer capacity
    pub fn subscribe(&self, session_id: &str) -> ProgressSubscription {
        self.subscribe_with_capacity(session_id, DEFAULT_SUBSCRIBER_CAPACITY)
    }

    /// Subscribe with an explicit buffer capacity. The subscription starts
    /// with a replay: the terminal event if the session already ended,
    /// otherwise a synthetic progress_update carrying the current state.
    pub fn subscribe_with_capacity(
        &self,
        session_id: &str,
        capacity: usize,
    ) -> ProgressSubscription {
        let state = Arc::new(SubscriberState::new(capacity.max(1)));

        let mut channels = self.channels.lock().unwrap();
        let channel = channels
            .entry(session_id.to_string())
            .or_insert_with(SessionChannel::new);

        if let Some(last) = &channel.last_event {
            let replay = if last.is_terminal() {
                last.clone()
            } else {
                ProgressEvent::new(
                    session_id,
                    ProgressEventType::ProgressUpdate,
                    last.stage,
                    last.progress,
                )
            };
            state.push(replay);
        }

        if channel.closed {
            state.close();
        } else {
            channel.subscribers.push(state.clone());
        }

        ProgressSubscription {
            session_id: session_id.to_string(),
            state,
        }
    }

    /// Detach a subscription so the session stops buffering for it
    pub fn unsubscribe(&self, subscription: &ProgressSubscription) {
        let mut channels = self.channels.lock().unwrap();
        if let Some(channel) = channels.get_mut(subscription.session_id()) {
            channel
                .subscribers
                .retain(|s| !Arc::ptr_eq(s, &subscription.state));
        }
        subscription.state.close();
    }

    /// Seed the replay state for a session, used after a restart when the
    /// bus has no event history but the store does.
    pub fn seed_last_event(&self, event: ProgressEvent) {
        let mut channels = self.channels.lock().unwrap();
        let channel = channels
            .entry(event.session_id.clone())
            .or_insert_with(SessionChannel::new);
        if channel.last_event.is_none() {
            let terminal = event.is_terminal();
            channel.last_event = Some(event);
            if terminal {
                channel.closed = true;
            }
        }
    }

    /// Close a session's stream: pending events drain, then every
    /// subscriber's channel ends. The last event stays for late replay.
    pub fn close(&self, session_id: &str) {
        let mut channels = self.channels.lock().unwrap();
        if let Some(channel) = channels.get_mut(session_id) {
            channel.closed = true;
            for subscriber in channel.subscribers.drain(..) {
                subscriber.close();
            }
        }
    }

    /// Forget a session entirely (after delete)
    pub fn remove(&self, session_id: &str) {
        let mut channels = self.channels.lock().unwrap();
        if let Some(mut channel) = channels.remove(session_id) {
            for subscriber in channel.subscribers.drain(..) {
                subscriber.close();
            }
        }
    }
}

impl Default for ProgressBus {
    fn default() -> Self {
        Self::new()
    }
}
