//! Published event types (spec §6 "Events (published)").

use crate::model::{GlobalMode, LeaseMode, Resource};
use chrono::{DateTime, Utc};
use std::path::PathBuf;

#[derive(Clone, Debug)]
pub enum Event {
    AcquisitionStateChanged {
        in_progress: bool,
        experiment_id: String,
        is_aborting: bool,
    },
    AcquisitionProgress {
        experiment_id: String,
        completed_fovs: u64,
        total_fovs: u64,
    },
    AcquisitionRegionProgress {
        experiment_id: String,
        region_id: String,
        completed: u32,
        total: u32,
    },
    AcquisitionWorkerProgress {
        experiment_id: String,
        time_point: u32,
        message: String,
    },
    AcquisitionWorkerFinished {
        experiment_id: String,
        success: bool,
        error: Option<String>,
        final_fov_count: u64,
    },

    LiveStateChanged {
        state: String,
    },
    TriggerModeChanged {
        mode: String,
    },
    TriggerFpsChanged {
        fps: f64,
    },

    LaserAfInitialized {
        objective: String,
        pixel_to_um: f64,
    },
    LaserAfReferenceSet {
        objective: String,
    },
    LaserAfDisplacementMeasured {
        displacement_um: f64,
    },
    LaserAfCrossCorrelationMeasured {
        correlation: f64,
    },
    LaserAfMoveCompleted {
        success: bool,
        final_z_mm: f64,
    },
    LaserAfPropertiesChanged {
        objective: String,
    },
    LaserAfSpotCentroidMeasured {
        x: f64,
        y: f64,
    },

    /// Contrast-based autofocus result (spec §4.5).
    AutoFocusCompleted {
        success: bool,
        z_mm: f64,
    },

    GlobalModeChanged {
        mode: GlobalMode,
    },
    LeaseAcquired {
        lease_id: uuid::Uuid,
        owner: String,
        resources: Vec<Resource>,
        mode: LeaseMode,
    },
    LeaseReleased {
        lease_id: uuid::Uuid,
        owner: String,
    },
    LeaseRevoked {
        lease_id: uuid::Uuid,
        owner: String,
        reason: String,
    },

    /// A `*StateChanged` event emitted generically by `StateMachine`
    /// consumers that don't need a bespoke event shape (spec §4.3).
    ControllerStateChanged {
        controller: String,
        from: String,
        to: String,
        at: DateTime<Utc>,
    },

    DoneMarkerWritten {
        path: PathBuf,
    },

    /// A non-fatal controller-level failure that must reach observers
    /// without propagating to the caller (spec §4.4 "publish an error
    /// event", §7 failure semantics for Live/Autofocus/Laser AF).
    ControllerError {
        controller: String,
        message: String,
    },

    /// A command published on the bus (e.g. by a UI/scripting adapter) for
    /// the `BackendCommandRouter` to pick up and enqueue into the actor
    /// (spec §4.1: "the only path through which hardware-touching commands
    /// reach controllers"). Carried as an event so callers outside the
    /// actor's own crate boundary never need a direct channel handle.
    CommandIssued(crate::bus::commands::Command),
}

impl Event {
    /// Discriminant name, used for per-(event_type, subscriber) FIFO
    /// dispatch bookkeeping and logging (spec §4.1).
    pub fn type_name(&self) -> &'static str {
        match self {
            Event::AcquisitionStateChanged { .. } => "AcquisitionStateChanged",
            Event::AcquisitionProgress { .. } => "AcquisitionProgress",
            Event::AcquisitionRegionProgress { .. } => "AcquisitionRegionProgress",
            Event::AcquisitionWorkerProgress { .. } => "AcquisitionWorkerProgress",
            Event::AcquisitionWorkerFinished { .. } => "AcquisitionWorkerFinished",
            Event::LiveStateChanged { .. } => "LiveStateChanged",
            Event::TriggerModeChanged { .. } => "TriggerModeChanged",
            Event::TriggerFpsChanged { .. } => "TriggerFPSChanged",
            Event::LaserAfInitialized { .. } => "LaserAFInitialized",
            Event::LaserAfReferenceSet { .. } => "LaserAFReferenceSet",
            Event::LaserAfDisplacementMeasured { .. } => "LaserAFDisplacementMeasured",
            Event::LaserAfCrossCorrelationMeasured { .. } => "LaserAFCrossCorrelationMeasured",
            Event::LaserAfMoveCompleted { .. } => "LaserAFMoveCompleted",
            Event::LaserAfPropertiesChanged { .. } => "LaserAFPropertiesChanged",
            Event::LaserAfSpotCentroidMeasured { .. } => "LaserAFSpotCentroidMeasured",
            Event::AutoFocusCompleted { .. } => "AutoFocusCompleted",
            Event::GlobalModeChanged { .. } => "GlobalModeChanged",
            Event::LeaseAcquired { .. } => "LeaseAcquired",
            Event::LeaseReleased { .. } => "LeaseReleased",
            Event::LeaseRevoked { .. } => "LeaseRevoked",
            Event::ControllerStateChanged { .. } => "ControllerStateChanged",
            Event::DoneMarkerWritten { .. } => "DoneMarkerWritten",
            Event::ControllerError { .. } => "ControllerError",
            Event::CommandIssued(_) => "CommandIssued",
        }
    }
}
