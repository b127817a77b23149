//! Multi-point acquisition scheduling (spec §4.8/§4.9): `MultiPointController`
//! owns the acquisition lifecycle state machine and launches a
//! `MultiPointWorker` thread per run.

pub mod controller;
pub mod worker;

pub use controller::{AcqCommand, AcqState, AcquisitionHardware, MultiPointController};
pub use worker::MultiPointWorker;
