//! Topic-keyed pub/sub for the keydrive core.
//!
//! Delivery is synchronous on the publisher's thread, except for topics in
//! the *bridged* set: those are marshaled onto a single coordinator thread
//! (the engine drains [`Bus::bridged_receiver`]) so that executor flags have
//! exactly one writer.
//!
//! Two safety properties hold for every publish:
//! - a handler republishing the topic it is currently handling is deferred
//!   to the end of the outer publish, never recursed into;
//! - a panicking handler does not prevent its siblings from running, and
//!   all failures of one publish aggregate into a single
//!   `core:handler_error` event.
#![warn(missing_docs)]

use std::{
    cell::RefCell,
    collections::{HashMap, HashSet, VecDeque},
    panic::{AssertUnwindSafe, catch_unwind},
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};

use crossbeam_channel::{Receiver, Sender, unbounded};
use parking_lot::RwLock;
use tracing::warn;

use keydrive_protocol::{BusEvent, Topic};

/// How many deferred same-topic republishes one publish may trigger before
/// the bus drops the remainder. A handler that republishes its own topic on
/// every delivery would otherwise never terminate.
const DEFERRED_DELIVERY_LIMIT: usize = 64;

type Handler = Arc<dyn Fn(&BusEvent) + Send + Sync>;

/// Subscription token returned by [`Bus::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubId {
    topic: Topic,
    id: u64,
}

struct Inner {
    subscribers: RwLock<HashMap<Topic, Vec<(u64, Handler)>>>,
    bridged: HashSet<Topic>,
    bridge_tx: Sender<BusEvent>,
    next_id: AtomicU64,
}

thread_local! {
    static IN_FLIGHT: RefCell<HashSet<Topic>> = RefCell::new(HashSet::new());
    static DEFERRED: RefCell<VecDeque<BusEvent>> = RefCell::new(VecDeque::new());
}

/// Thread-safe topic pub/sub.
#[derive(Clone)]
pub struct Bus {
    inner: Arc<Inner>,
}

impl Bus {
    /// Create a bus whose `bridged` topics are routed to the returned
    /// receiver instead of being delivered on the publisher's thread.
    pub fn new<I: IntoIterator<Item = Topic>>(bridged: I) -> (Self, Receiver<BusEvent>) {
        let (bridge_tx, bridge_rx) = unbounded();
        let bus = Self {
            inner: Arc::new(Inner {
                subscribers: RwLock::new(HashMap::new()),
                bridged: bridged.into_iter().collect(),
                bridge_tx,
                next_id: AtomicU64::new(1),
            }),
        };
        (bus, bridge_rx)
    }

    /// Create a bus with no bridged topics (tests, simple embeddings).
    pub fn unbridged() -> Self {
        Self::new([]).0
    }

    /// Register `handler` for `topic`.
    pub fn subscribe<F>(&self, topic: Topic, handler: F) -> SubId
    where
        F: Fn(&BusEvent) + Send + Sync + 'static,
    {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner
            .subscribers
            .write()
            .entry(topic)
            .or_default()
            .push((id, Arc::new(handler)));
        SubId { topic, id }
    }

    /// Remove a subscription. Removing an already-removed id is a no-op.
    pub fn unsubscribe(&self, sub: SubId) {
        if let Some(handlers) = self.inner.subscribers.write().get_mut(&sub.topic) {
            handlers.retain(|(id, _)| *id != sub.id);
        }
    }

    /// Publish an event. Bridged topics enqueue to the coordinator; all
    /// others deliver synchronously on this thread.
    pub fn publish(&self, event: BusEvent) {
        if self.inner.bridged.contains(&event.topic()) {
            if self.inner.bridge_tx.send(event).is_err() {
                warn!("bridge_receiver_gone_dropping_event");
            }
            return;
        }
        self.deliver_now(event);
    }

    /// Deliver an event on the calling thread, bypassing the bridge. The
    /// coordinator uses this to run bridged subscribers after draining the
    /// channel.
    pub fn deliver_now(&self, event: BusEvent) {
        let topic = event.topic();

        let already_in_flight = IN_FLIGHT.with(|f| !f.borrow_mut().insert(topic));
        if already_in_flight {
            // Same-topic republish from inside a handler: run it after the
            // outer publish instead of recursing.
            DEFERRED.with(|d| d.borrow_mut().push_back(event));
            return;
        }

        self.run_handlers(&event, topic);

        IN_FLIGHT.with(|f| f.borrow_mut().remove(&topic));

        // Only the outermost publish on this thread drains deferred work.
        let outermost = IN_FLIGHT.with(|f| f.borrow().is_empty());
        if outermost {
            self.drain_deferred();
        }
    }

    fn drain_deferred(&self) {
        let mut delivered = 0;
        loop {
            let Some(event) = DEFERRED.with(|d| d.borrow_mut().pop_front()) else {
                return;
            };
            if delivered >= DEFERRED_DELIVERY_LIMIT {
                warn!(topic = %event.topic(), "deferred_delivery_limit_reached_dropping");
                continue;
            }
            delivered += 1;
            self.deliver_now(event);
        }
    }

    fn run_handlers(&self, event: &BusEvent, topic: Topic) {
        // Copy the handler list, then release the lock before invoking.
        let handlers: Vec<Handler> = {
            let subs = self.inner.subscribers.read();
            match subs.get(&topic) {
                Some(list) => list.iter().map(|(_, h)| h.clone()).collect(),
                None => return,
            }
        };

        let mut failures: Vec<String> = Vec::new();
        for handler in handlers {
            if let Err(panic) = catch_unwind(AssertUnwindSafe(|| handler(event))) {
                failures.push(panic_message(panic));
            }
        }

        if !failures.is_empty() && topic != Topic::HandlerError {
            let cause = failures.join("; ");
            warn!(%topic, %cause, "bus_handler_failed");
            self.deliver_now(BusEvent::HandlerError { topic, cause });
        }
    }
}

fn panic_message(panic: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "handler panicked".to_string()
    }
}
