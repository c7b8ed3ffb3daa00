//! The event bus itself.
//!
//! One instance lives for the lifetime of a single job. Publishers assign
//! sequence numbers; subscribers see a monotonically increasing sequence
//! with no gaps relative to the point they subscribed (or the `from`
//! sequence they requested via [`EventBus::subscribe_from`]).

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::Utc;
use choo_types::Event;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::warn;

/// Default bounded capacity for each subscriber's live-delivery channel.
/// Matches spec.md §5's "Event Bus buffer is bounded (default 1000)".
pub const DEFAULT_BUFFER_CAPACITY: usize = 1000;

struct State {
    next_sequence: i64,
    history: Vec<Event>,
    subscribers: HashMap<u64, mpsc::Sender<Event>>,
    next_subscriber_id: u64,
    closed: bool,
}

/// A typed, in-process pub/sub bus for one job's events.
#[derive(Clone)]
pub struct EventBus {
    state: Arc<Mutex<State>>,
    buffer_capacity: usize,
    job_id: String,
}

impl EventBus {
    pub fn new(job_id: impl Into<String>) -> Self {
        Self::with_capacity(job_id, DEFAULT_BUFFER_CAPACITY)
    }

    pub fn with_capacity(job_id: impl Into<String>, buffer_capacity: usize) -> Self {
        Self {
            state: Arc::new(Mutex::new(State {
                next_sequence: 0,
                history: Vec::new(),
                subscribers: HashMap::new(),
                next_subscriber_id: 0,
                closed: false,
            })),
            buffer_capacity,
            job_id: job_id.into(),
        }
    }

    /// Publish an event, assigning it the next sequence number and the
    /// current timestamp. Delivery to a full subscriber buffer is dropped
    /// (and logged) rather than blocking the publisher.
    pub fn publish(&self, event: Event) -> Event {
        self.publish_internal(event, false)
    }

    /// Re-emit an event whose `sequence`/`timestamp` were already assigned
    /// (e.g. replayed from persistence), preserving both unchanged.
    pub fn publish_raw(&self, event: Event) -> Event {
        self.publish_internal(event, true)
    }

    fn publish_internal(&self, mut event: Event, raw: bool) -> Event {
        let mut state = self.state.lock().unwrap();
        if state.closed {
            warn!(job_id = %self.job_id, event_type = %event.event_type, "publish after bus close, dropping");
            return event;
        }

        if !raw {
            state.next_sequence += 1;
            event.sequence = Some(state.next_sequence);
            event.timestamp = Utc::now();
        }

        state.history.push(event.clone());

        let mut dead = Vec::new();
        for (id, tx) in state.subscribers.iter() {
            match tx.try_send(event.clone()) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(_)) => {
                    warn!(
                        job_id = %self.job_id,
                        subscriber = id,
                        event_type = %event.event_type,
                        "event bus buffer full, dropping event for subscriber"
                    );
                }
                Err(mpsc::error::TrySendError::Closed(_)) => dead.push(*id),
            }
        }
        for id in dead {
            state.subscribers.remove(&id);
        }

        event
    }

    /// Register a handler for all events published after this call. No
    /// replay.
    pub fn subscribe<F>(&self, handler: F) -> Subscription
    where
        F: FnMut(Event) + Send + 'static,
    {
        self.subscribe_inner(None, handler)
    }

    /// Register a handler and replay every event with `sequence >= from`
    /// strictly before any live event reaches the handler.
    pub fn subscribe_from<F>(&self, from: i64, handler: F) -> Subscription
    where
        F: FnMut(Event) + Send + 'static,
    {
        self.subscribe_inner(Some(from), handler)
    }

    fn subscribe_inner<F>(&self, from: Option<i64>, mut handler: F) -> Subscription
    where
        F: FnMut(Event) + Send + 'static,
    {
        let (tx, mut rx) = mpsc::channel(self.buffer_capacity);

        let replay = {
            let mut state = self.state.lock().unwrap();
            let id = state.next_subscriber_id;
            state.next_subscriber_id += 1;

            let replay = from.map(|from| {
                state
                    .history
                    .iter()
                    .filter(|e| e.sequence.map(|s| s >= from).unwrap_or(false))
                    .cloned()
                    .collect::<Vec<_>>()
            });

            state.subscribers.insert(id, tx);
            (id, replay)
        };
        let (id, replay) = replay;

        let handle: JoinHandle<()> = tokio::spawn(async move {
            if let Some(events) = replay {
                for event in events {
                    handler(event);
                }
            }
            while let Some(event) = rx.recv().await {
                handler(event);
            }
        });

        Subscription {
            id,
            state: Arc::clone(&self.state),
            handle: Some(handle),
        }
    }

    /// Stop accepting publishes. Idempotent. Existing subscriber tasks
    /// drain their remaining buffered events and then exit once their
    /// channel closes.
    pub fn close(&self) {
        let mut state = self.state.lock().unwrap();
        state.closed = true;
        state.subscribers.clear();
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().unwrap().closed
    }

    /// Snapshot of every event published so far, in sequence order.
    /// Equivalent to what `subscribe_from(0)` would replay on a finished
    /// job.
    pub fn history(&self) -> Vec<Event> {
        self.state.lock().unwrap().history.clone()
    }
}

/// Handle returned by `subscribe`/`subscribe_from`. Dropping it leaves the
/// subscription active; call [`Subscription::unsubscribe`] to stop it.
pub struct Subscription {
    id: u64,
    state: Arc<Mutex<State>>,
    handle: Option<JoinHandle<()>>,
}

impl Subscription {
    pub fn unsubscribe(mut self) {
        self.state.lock().unwrap().subscribers.remove(&self.id);
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.state.lock().unwrap().subscribers.remove(&self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use choo_types::EventKind;
    use std::sync::{Arc as StdArc, Mutex as StdMutex};

    fn collector() -> (StdArc<StdMutex<Vec<Event>>>, impl FnMut(Event) + Send + 'static) {
        let events = StdArc::new(StdMutex::new(Vec::new()));
        let sink = events.clone();
        let handler = move |e: Event| sink.lock().unwrap().push(e);
        (events, handler)
    }

    #[tokio::test]
    async fn publish_assigns_monotonic_sequence() {
        let bus = EventBus::new("job-1");
        let e1 = bus.publish(Event::new(EventKind::OrchStarted, serde_json::json!({})));
        let e2 = bus.publish(Event::new(EventKind::OrchCompleted, serde_json::json!({})));
        assert_eq!(e1.sequence, Some(1));
        assert_eq!(e2.sequence, Some(2));
    }

    #[tokio::test]
    async fn subscribers_see_events_in_order() {
        let bus = EventBus::new("job-1");
        let (events, handler) = collector();
        let sub = bus.subscribe(handler);

        bus.publish(Event::new(EventKind::UnitStarted, serde_json::json!({})));
        bus.publish(Event::new(EventKind::UnitCompleted, serde_json::json!({})));

        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        sub.unsubscribe();

        let seen = events.lock().unwrap();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0].sequence, Some(1));
        assert_eq!(seen[1].sequence, Some(2));
    }

    #[tokio::test]
    async fn subscribe_from_replays_then_live_with_no_gap() {
        let bus = EventBus::new("job-1");
        for _ in 0..5 {
            bus.publish(Event::new(EventKind::TaskStarted, serde_json::json!({})));
        }

        let (events, handler) = collector();
        let sub = bus.subscribe_from(3, handler);

        bus.publish(Event::new(EventKind::TaskCompleted, serde_json::json!({})));
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        sub.unsubscribe();

        let seen = events.lock().unwrap();
        let sequences: Vec<i64> = seen.iter().map(|e| e.sequence.unwrap()).collect();
        assert_eq!(sequences, vec![3, 4, 5, 6]);
    }

    #[tokio::test]
    async fn subscribe_from_zero_yields_full_history() {
        let bus = EventBus::new("job-1");
        for _ in 0..10 {
            bus.publish(Event::new(EventKind::TaskStarted, serde_json::json!({})));
        }
        bus.close();

        let (events, handler) = collector();
        bus.subscribe_from(0, handler);
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;

        assert_eq!(events.lock().unwrap().len(), 10);
    }

    #[tokio::test]
    async fn publish_after_close_is_dropped() {
        let bus = EventBus::new("job-1");
        bus.close();
        assert!(bus.is_closed());
        bus.publish(Event::new(EventKind::OrchFailed, serde_json::json!({})));
        assert!(bus.history().is_empty());
    }

    #[tokio::test]
    async fn publish_raw_preserves_sequence_and_timestamp() {
        let bus = EventBus::new("job-1");
        let mut event = Event::new(EventKind::UnitFailed, serde_json::json!({}));
        event.sequence = Some(42);
        let ts = event.timestamp;
        let out = bus.publish_raw(event);
        assert_eq!(out.sequence, Some(42));
        assert_eq!(out.timestamp, ts);
    }
}
