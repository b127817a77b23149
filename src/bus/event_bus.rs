//! `EventBus` (spec §4.1): thread-safe in-process publish/subscribe. A
//! dedicated dispatch thread drains a FIFO queue; handlers are invoked
//! synchronously on that thread. A handler that panics does not abort
//! dispatch of the same event to other handlers or of subsequent events;
//! the error is logged (spec §4.1 "Failure").

use super::events::Event;
use crossbeam_channel::{unbounded, Receiver, Sender};
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use tracing::{error, warn};

pub type Handler = Arc<dyn Fn(&Event) + Send + Sync>;

struct Subscription {
    id: usize,
    handler: Handler,
}

struct Inner {
    subscribers: Mutex<HashMap<&'static str, Vec<Subscription>>>,
    next_id: AtomicUsize,
    sender: Sender<Event>,
}

/// A running `EventBus`. Cloning shares the same dispatch thread and
/// subscriber table (`Arc`-wrapped shared state).
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<Inner>,
}

pub struct EventBusHandle {
    _dispatch_thread: JoinHandle<()>,
}

impl EventBus {
    /// Spawns the dispatch thread and returns `(bus, handle)`. The handle
    /// keeps the thread alive for as long as it's held; dropping the bus's
    /// sender side (all clones) lets the thread exit once the queue drains.
    pub fn start() -> (Self, EventBusHandle) {
        let (sender, receiver): (Sender<Event>, Receiver<Event>) = unbounded();
        let subscribers: Arc<Mutex<HashMap<&'static str, Vec<Subscription>>>> =
            Arc::new(Mutex::new(HashMap::new()));

        let dispatch_subscribers = subscribers.clone();
        let dispatch_thread = std::thread::Builder::new()
            .name("event-bus-dispatch".into())
            .spawn(move || {
                for event in receiver.iter() {
                    let type_name = event.type_name();
                    let handlers: Vec<Handler> = {
                        let guard = dispatch_subscribers
                            .lock()
                            .unwrap_or_else(|e| e.into_inner());
                        guard
                            .get(type_name)
                            .map(|subs| subs.iter().map(|s| s.handler.clone()).collect())
                            .unwrap_or_default()
                    };
                    for handler in handlers {
                        let event_ref = &event;
                        let result = catch_unwind(AssertUnwindSafe(|| handler(event_ref)));
                        if result.is_err() {
                            error!(event = type_name, "event handler panicked; continuing dispatch");
                        }
                    }
                }
            })
            .expect("failed to spawn event bus dispatch thread");

        let inner = Inner {
            subscribers,
            next_id: AtomicUsize::new(1),
            sender,
        };

        (
            Self {
                inner: Arc::new(inner),
            },
            EventBusHandle {
                _dispatch_thread: dispatch_thread,
            },
        )
    }

    /// Registers `handler` for events named `event_type`. Returns a
    /// subscription id usable with [`EventBus::unsubscribe`].
    pub fn subscribe<F>(&self, event_type: &'static str, handler: F) -> usize
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let mut guard = self
            .inner
            .subscribers
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        guard.entry(event_type).or_default().push(Subscription {
            id,
            handler: Arc::new(handler),
        });
        id
    }

    pub fn unsubscribe(&self, event_type: &'static str, id: usize) {
        let mut guard = self
            .inner
            .subscribers
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        if let Some(subs) = guard.get_mut(event_type) {
            subs.retain(|s| s.id != id);
        }
    }

    /// Enqueues `event` for dispatch. Events are delivered in publish order
    /// per (event_type, subscriber) pair (spec §4.1 ordering).
    pub fn publish(&self, event: Event) {
        if self.inner.sender.send(event).is_err() {
            warn!("event bus dispatch thread is gone; dropping event");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;
    use std::time::Duration;

    #[test]
    fn delivers_in_publish_order() {
        let (bus, _handle) = EventBus::start();
        let order = Arc::new(Mutex::new(Vec::new()));
        let order_clone = order.clone();
        bus.subscribe("LiveStateChanged", move |event| {
            if let Event::LiveStateChanged { state } = event {
                order_clone.lock().unwrap().push(state.clone());
            }
        });

        for s in ["Starting", "Live", "Stopping"] {
            bus.publish(Event::LiveStateChanged { state: s.into() });
        }

        // give the dispatch thread a moment to drain
        std::thread::sleep(Duration::from_millis(100));
        let observed = order.lock().unwrap().clone();
        assert_eq!(observed, vec!["Starting", "Live", "Stopping"]);
    }

    #[test]
    fn panicking_handler_does_not_stop_other_handlers() {
        let (bus, _handle) = EventBus::start();
        let hits = Arc::new(AtomicU32::new(0));
        let hits_clone = hits.clone();

        bus.subscribe("LiveStateChanged", |_event| {
            panic!("boom");
        });
        bus.subscribe("LiveStateChanged", move |_event| {
            hits_clone.fetch_add(1, Ordering::SeqCst);
        });

        bus.publish(Event::LiveStateChanged { state: "Live".into() });
        std::thread::sleep(Duration::from_millis(100));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn unsubscribe_stops_delivery() {
        let (bus, _handle) = EventBus::start();
        let hits = Arc::new(AtomicU32::new(0));
        let hits_clone = hits.clone();
        let id = bus.subscribe("LiveStateChanged", move |_e| {
            hits_clone.fetch_add(1, Ordering::SeqCst);
        });
        bus.unsubscribe("LiveStateChanged", id);
        bus.publish(Event::LiveStateChanged { state: "Live".into() });
        std::thread::sleep(Duration::from_millis(50));
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }
}
