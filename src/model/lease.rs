//! Resource/lease/global-mode types shared between `ResourceCoordinator` and
//! its callers (spec §3, §4.2).

use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use uuid::Uuid;

/// Fixed enumeration of arbitrable hardware resources (spec §4.2).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Resource {
    CameraControl,
    IlluminationControl,
    StageControl,
    PiezoControl,
}

impl Resource {
    pub const ALL: [Resource; 4] = [
        Resource::CameraControl,
        Resource::IlluminationControl,
        Resource::StageControl,
        Resource::PiezoControl,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Resource::CameraControl => "CAMERA_CONTROL",
            Resource::IlluminationControl => "ILLUMINATION_CONTROL",
            Resource::StageControl => "STAGE_CONTROL",
            Resource::PiezoControl => "PIEZO_CONTROL",
        }
    }
}

/// The mode under which a lease holds its resources; drives global-mode
/// derivation (spec §4.2).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum LeaseMode {
    Live,
    Acquiring,
    Autofocusing,
}

/// Coarse system state derived from the set of active leases (spec §3).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum GlobalMode {
    Idle,
    Live,
    Acquiring,
    Aborting,
    Autofocusing,
}

/// A grant from the `ResourceCoordinator` allowing `owner` to operate on
/// `resources` in `mode` until released or revoked.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ResourceLease {
    pub lease_id: Uuid,
    pub owner: String,
    pub resources: Vec<Resource>,
    pub mode: LeaseMode,
    #[serde(skip, default = "Instant::now")]
    pub acquired_at: Instant,
    pub timeout: Option<Duration>,
    /// Set when `StopAcquisition` is requested on an `Acquiring` lease;
    /// causes global-mode derivation to report `Aborting` instead of
    /// `Acquiring` for this lease (spec §4.2).
    pub abort_requested: bool,
}

impl ResourceLease {
    pub fn is_expired(&self, now: Instant) -> bool {
        match self.timeout {
            Some(timeout) => now > self.acquired_at + timeout,
            None => false,
        }
    }

    pub fn holds(&self, resource: Resource) -> bool {
        self.resources.contains(&resource)
    }
}
