//! `AcquisitionParameters` (spec §3): the immutable snapshot constructed at
//! `run_acquisition` entry and frozen for the duration of `Running`.

use super::channel::ChannelMode;
use super::scan_region::ScanPositionInformation;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ZStackingConfig {
    FromBottom,
    FromTop,
    FromCenter,
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct ZRangeMm {
    pub min_mm: f64,
    pub max_mm: f64,
}

/// Immutable per-run snapshot (spec §3). Constructed once in
/// `MultiPointController::prepare`, never mutated afterward; the worker
/// thread only ever sees a shared immutable reference to one instance.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AcquisitionParameters {
    pub nx: u32,
    pub ny: u32,
    pub nz: u32,
    pub nt: u32,
    pub delta_x_mm: f64,
    pub delta_y_mm: f64,
    pub delta_z_mm: f64,
    pub delta_t_s: f64,

    pub do_autofocus: bool,
    pub do_reflection_autofocus: bool,
    pub use_piezo: bool,
    pub use_fluidics: bool,

    pub z_stacking_config: ZStackingConfig,
    pub z_range: Option<ZRangeMm>,

    pub selected_configurations: Vec<ChannelMode>,

    pub display_resolution_scaling: f64,

    pub experiment_id: String,
    pub base_path: PathBuf,
    pub acquisition_start_time: DateTime<Utc>,

    pub scan_position_information: ScanPositionInformation,

    /// Ambient: objective metadata persisted into `acquisition parameters.json`
    /// (spec §6: `objective: { name, magnification, ... }`).
    pub objective_name: String,
    pub objective_magnification: f64,
    pub sensor_pixel_size_um: f64,
    pub tube_lens_mm: f64,
}

impl AcquisitionParameters {
    pub fn experiment_dir(&self) -> PathBuf {
        self.base_path.join(&self.experiment_id)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.nx == 0 || self.ny == 0 || self.nz == 0 || self.nt == 0 {
            return Err("NX, NY, NZ, Nt must all be >= 1".into());
        }
        if !(0.0..=1.0).contains(&self.display_resolution_scaling)
            || self.display_resolution_scaling <= 0.0
        {
            return Err("display_resolution_scaling must be in (0, 1]".into());
        }
        if self.selected_configurations.is_empty() {
            return Err("at least one channel configuration must be selected".into());
        }
        if self.do_reflection_autofocus && self.do_autofocus {
            return Err("contrast AF and reflection AF are mutually exclusive".into());
        }
        Ok(())
    }
}
