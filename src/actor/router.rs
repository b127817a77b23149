//! `BackendCommandRouter` (spec §4.1): subscribes to each registered command
//! type on the `EventBus` and forwards it into the actor's priority queue.
//! This is the only path through which hardware-touching commands reach
//! controllers.

use super::backend_actor::BackendActor;
use crate::bus::{Event, EventBus};
use std::sync::Arc;
use tracing::warn;

pub struct BackendCommandRouter {
    actor: Arc<BackendActor>,
}

impl BackendCommandRouter {
    pub fn new(actor: Arc<BackendActor>) -> Self {
        Self { actor }
    }

    /// Subscribes to `CommandIssued` events and forwards their payload into
    /// the actor. A single subscription suffices since every command flows
    /// through the one `CommandIssued` event wrapper (see `bus::events`).
    pub fn attach(self: &Arc<Self>, bus: &EventBus) -> usize {
        let actor = self.actor.clone();
        bus.subscribe("CommandIssued", move |event| {
            if let Event::CommandIssued(command) = event {
                if !actor.enqueue(command.clone()) {
                    warn!(
                        command = command.type_name(),
                        "router failed to enqueue command: actor queue full"
                    );
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::Command;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    #[test]
    fn routed_command_reaches_registered_handler() {
        let (bus, _bus_handle) = EventBus::start();
        let (actor, _actor_handle) = BackendActor::start(16);
        let actor = Arc::new(actor);
        let hits = Arc::new(AtomicU32::new(0));
        let hits_clone = hits.clone();
        actor.register("StartLive", move |_| {
            hits_clone.fetch_add(1, Ordering::SeqCst);
        });

        let router = Arc::new(BackendCommandRouter::new(actor));
        router.attach(&bus);

        bus.publish(Event::CommandIssued(Command::StartLive));
        std::thread::sleep(Duration::from_millis(100));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }
}
