//! Deferred per-frame work (spec §4.10): image encoding and persistence
//! run off the camera-callback thread through a bounded job queue.

pub mod job;
pub mod save_image;

pub use job::{Job, JobRunner, JobRunnerHandle};
pub use save_image::{ImageFormat, SaveCompositeImageJob, SaveImageJob};
