//! Error types for the acquisition core.
//!
//! `AcqError` consolidates every failure mode described in spec §7
//! (`InvalidStateForOperation`, `InvalidStateTransition`, `ResourceUnavailable`,
//! `HardwareTimeout`, `FrameCallbackError`, `DispatchFailure`, `ConfigurationError`,
//! `FilesystemError`) into one `thiserror` enum: a single error-enum-plus-
//! `#[from]` shape rather than a type per subsystem.
//!
//! Propagation policy (spec §7): library code never panics outside tests;
//! `unwrap`/`expect` are confined to `#[cfg(test)]`. Hardware callbacks
//! contain errors locally (never propagate); the worker's run loop converts
//! any error into `AcquisitionWorkerFinished { success: false, .. }`.

use thiserror::Error;

/// Convenience alias for results using [`AcqError`].
pub type AcqResult<T> = std::result::Result<T, AcqError>;

#[derive(Error, Debug, Clone)]
pub enum AcqError {
    /// A command arrived in a controller state that does not accept it.
    /// Logged and dropped; never has a hardware side effect.
    #[error("command {command} invalid for state {state}")]
    InvalidStateForOperation { state: String, command: String },

    /// A state machine transition was attempted that is not in the
    /// transition table. Programmer error; forces the controller to `Failed`.
    #[error("invalid transition from {from} to {to}")]
    InvalidStateTransition { from: String, to: String },

    /// `ResourceCoordinator::acquire` returned `None`: one or more requested
    /// resources are already held by another owner.
    #[error("resource unavailable: {0:?}")]
    ResourceUnavailable(Vec<String>),

    /// A microcontroller or camera operation exceeded its budget.
    #[error("hardware timeout after {0:?} waiting on {1}")]
    HardwareTimeout(std::time::Duration, String),

    /// An exception escaped a camera frame callback; caught by the
    /// safe-callback guard and reported here.
    #[error("frame callback error: {0}")]
    FrameCallbackError(String),

    /// A job's bounded input queue was full; the worker requests abort.
    #[error("job dispatch failed: queue full for {0}")]
    DispatchFailure(String),

    /// A semantic configuration error, e.g. reflection AF requested with no
    /// stored laser-AF reference, or piezo enabled with no piezo configured.
    /// Raised at the setter; acquisition start fails before leaving `Preparing`.
    #[error("configuration error: {0}")]
    ConfigurationError(String),

    /// `coordinates.csv` / `acquisition parameters.json` / `configurations.xml`
    /// could not be written. Fatal setup error: `Preparing -> Failed`.
    #[error("filesystem error: {0}")]
    FilesystemError(String),

    /// A requested hardware capability (piezo, laser AF, fluidics, ...) is
    /// not present on the current instrument set.
    #[error("capability not available: {0}")]
    CapabilityUnavailable(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("I/O error: {0}")]
    Io(String),
}

impl From<std::io::Error> for AcqError {
    fn from(e: std::io::Error) -> Self {
        AcqError::Io(e.to_string())
    }
}

impl From<serde_json::Error> for AcqError {
    fn from(e: serde_json::Error) -> Self {
        AcqError::Serialization(e.to_string())
    }
}

impl From<quick_xml::Error> for AcqError {
    fn from(e: quick_xml::Error) -> Self {
        AcqError::Serialization(e.to_string())
    }
}

impl From<csv::Error> for AcqError {
    fn from(e: csv::Error) -> Self {
        AcqError::Serialization(e.to_string())
    }
}
