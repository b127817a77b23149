//! Command/event bus (spec §4.1): typed events/commands, FIFO-per-subscriber
//! dispatch, and the priority-queued `BackendActor` that is the sole caller
//! of controller state transitions (spec §5).

pub mod commands;
pub mod event_bus;
pub mod events;

pub use commands::{Command, CommandPriority, TriggerMode};
pub use event_bus::{EventBus, EventBusHandle};
pub use events::Event;
