//! Event Bus (C1): typed in-process pub/sub with tagged publishers.
//!
//! Two subscription modes — by tag, or all events — matching spec.md §4.1.
//! `publish` is synchronous and single-threaded with respect to one bus
//! instance: every matching subscriber runs before `publish` returns.
//! Subscribers must not block; if a subscriber needs to do I/O (e.g. append
//! to a JSONL file, push onto an SSE channel) it sends the event onward
//! through a channel rather than doing the I/O inline.

use foreman_proto::{Event, EventKind, RunId};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Mutex;
use tracing::warn;

type Subscriber = Box<dyn Fn(&Event) + Send + Sync>;

enum Subscription {
    Tag(&'static str, Subscriber),
    All(Subscriber),
}

/// The in-process publish/subscribe fabric shared by a daemon process.
pub struct EventBus {
    subscriptions: Mutex<Vec<Subscription>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            subscriptions: Mutex::new(Vec::new()),
        }
    }

    /// Registers a subscriber that only sees events whose tag equals `tag`.
    pub fn subscribe_tag(&self, tag: &'static str, handler: impl Fn(&Event) + Send + Sync + 'static) {
        self.subscriptions
            .lock()
            .expect("event bus mutex poisoned")
            .push(Subscription::Tag(tag, Box::new(handler)));
    }

    /// Registers a subscriber that sees every event published on this bus.
    pub fn subscribe_all(&self, handler: impl Fn(&Event) + Send + Sync + 'static) {
        self.subscriptions
            .lock()
            .expect("event bus mutex poisoned")
            .push(Subscription::All(Box::new(handler)));
    }

    /// Publishes `event`, invoking every matching subscriber in registration
    /// order before returning. A subscriber that panics is caught and
    /// logged; it never prevents other subscribers from seeing the event
    /// (spec.md §4.1 "Failure").
    pub fn publish(&self, event: Event) {
        let subs = self.subscriptions.lock().expect("event bus mutex poisoned");
        for sub in subs.iter() {
            let (matches, handler): (bool, &Subscriber) = match sub {
                Subscription::Tag(tag, handler) => (*tag == event.tag(), handler),
                Subscription::All(handler) => (true, handler),
            };
            if !matches {
                continue;
            }
            let result = panic::catch_unwind(AssertUnwindSafe(|| handler(&event)));
            if result.is_err() {
                warn!(tag = event.tag(), "event subscriber panicked; continuing");
            }
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Wraps a bus and stamps every event with a fixed `runId` before
/// forwarding, so callers never have to thread `runId` through helper
/// functions (spec.md §4.1).
#[derive(Clone)]
pub struct TaggedPublisher {
    bus: std::sync::Arc<EventBus>,
    run_id: RunId,
}

impl TaggedPublisher {
    pub fn new(bus: std::sync::Arc<EventBus>, run_id: RunId) -> Self {
        Self { bus, run_id }
    }

    pub fn run_id(&self) -> &RunId {
        &self.run_id
    }

    pub fn publish(&self, kind: EventKind) {
        let event = Event::new(kind, now_millis()).with_run_id(self.run_id.clone());
        self.bus.publish(event);
    }

    pub fn bus(&self) -> &std::sync::Arc<EventBus> {
        &self.bus
    }
}

fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn tag_subscriber_only_sees_matching_tag() {
        let bus = EventBus::new();
        let seen = Arc::new(AtomicUsize::new(0));
        let seen2 = seen.clone();
        bus.subscribe_tag("worktree.merged", move |_| {
            seen2.fetch_add(1, Ordering::SeqCst);
        });

        bus.publish(Event::new(EventKind::LoopDone, 0));
        assert_eq!(seen.load(Ordering::SeqCst), 0);

        bus.publish(Event::new(
            EventKind::WorktreeMerged {
                branch_name: "task/abc".into(),
            },
            1,
        ));
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn all_subscriber_sees_every_event() {
        let bus = EventBus::new();
        let seen = Arc::new(AtomicUsize::new(0));
        let seen2 = seen.clone();
        bus.subscribe_all(move |_| {
            seen2.fetch_add(1, Ordering::SeqCst);
        });

        bus.publish(Event::new(EventKind::LoopDone, 0));
        bus.publish(Event::new(EventKind::ResolverComplete, 1));
        assert_eq!(seen.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn panicking_subscriber_does_not_block_others() {
        let bus = EventBus::new();
        let seen = Arc::new(AtomicUsize::new(0));
        let seen2 = seen.clone();

        bus.subscribe_all(|_| panic!("boom"));
        bus.subscribe_all(move |_| {
            seen2.fetch_add(1, Ordering::SeqCst);
        });

        bus.publish(Event::new(EventKind::LoopDone, 0));
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn tagged_publisher_stamps_run_id() {
        let bus = Arc::new(EventBus::new());
        let run_id = RunId::from("abcdefgh1234");
        let received: Arc<Mutex<Option<Event>>> = Arc::new(Mutex::new(None));
        let received2 = received.clone();
        bus.subscribe_all(move |e| {
            *received2.lock().unwrap() = Some(e.clone());
        });

        let publisher = TaggedPublisher::new(bus, run_id.clone());
        publisher.publish(EventKind::LoopDone);

        let got = received.lock().unwrap().clone().unwrap();
        assert_eq!(got.run_id, Some(run_id));
    }
}
