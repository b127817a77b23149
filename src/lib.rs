//! Acquisition core for a high-content automated microscope: the
//! resource-arbitrated, event-driven scheduler that drives stage, camera,
//! illumination, piezo, filter wheel, and laser autofocus hardware through
//! correct, resumable, abortable scans and writes the resulting dataset to
//! disk.
//!
//! Built around a single-writer actor, capability-trait hardware
//! abstraction, and a `thiserror`/`tracing`/`figment` ambient stack (see
//! `DESIGN.md` for the design rationale).

pub mod actor;
pub mod autofocus;
pub mod bus;
pub mod config;
pub mod error;
pub mod flags;
pub mod geometry;
pub mod hw;
pub mod jobs;
pub mod live_controller;
pub mod model;
pub mod resource_coordinator;
pub mod scheduler;
pub mod state_machine;
pub mod storage;
