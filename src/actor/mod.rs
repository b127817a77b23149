//! `BackendActor` and `BackendCommandRouter` (spec §4.1).

pub mod backend_actor;
pub mod router;

pub use backend_actor::{BackendActor, BackendActorHandle};
pub use router::BackendCommandRouter;
