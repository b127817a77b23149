//! Deployment-wide configuration, loaded with `figment` (toml + env overlay).
//!
//! Per-run parameters (`AcquisitionParameters`) are a separate, explicitly
//! constructed and frozen snapshot (see `model::acquisition_params`) and are
//! never part of this struct: spec §3 requires `AcquisitionParameters` to be
//! immutable for the duration of a run, which a shared mutable config object
//! cannot guarantee.

use figment::providers::{Env, Format, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{AcqError, AcqResult};

/// Software stage limits (spec §6 "Software stage limits"). All generated
/// FOV coordinates and direct move commands are clipped/rejected against these.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq)]
pub struct StageLimitsMm {
    pub x_negative: f64,
    pub x_positive: f64,
    pub y_negative: f64,
    pub y_positive: f64,
}

impl Default for StageLimitsMm {
    fn default() -> Self {
        // Generous defaults matching a typical well-plate travel range.
        Self {
            x_negative: 0.0,
            x_positive: 120.0,
            y_negative: 0.0,
            y_positive: 86.0,
        }
    }
}

impl StageLimitsMm {
    pub fn contains(&self, x_mm: f64, y_mm: f64) -> bool {
        x_mm >= self.x_negative
            && x_mm <= self.x_positive
            && y_mm >= self.y_negative
            && y_mm <= self.y_positive
    }
}

/// Settings object loaded once at process startup. Resolves Open Question
/// "two different file-ID paddings exist" (spec §9) by making
/// `file_id_padding` the single configured constant.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct AcquisitionConfig {
    pub software_stage_limits_mm: StageLimitsMm,

    /// ResourceCoordinator watchdog tick interval (spec §4.2, default 1s).
    #[serde(with = "humantime_serde")]
    pub watchdog_tick_interval: Duration,

    /// Default hardware-operation (microcontroller) completion timeout (spec §5, default 5s).
    #[serde(with = "humantime_serde")]
    pub hardware_op_timeout: Duration,

    /// Frame-wait timeout base; the worker's actual per-trigger wait is
    /// computed from `camera.total_frame_time` plus this margin (spec §4.9).
    #[serde(with = "humantime_serde")]
    pub frame_wait_margin: Duration,

    /// Single configured constant for `file_id` zero-padding width,
    /// replacing the two inconsistent paddings noted in spec §9.
    pub file_id_padding: usize,

    /// Timepoint directory zero-padding width (spec §6: "4+ digit zero-padded").
    pub timepoint_dir_padding: usize,

    /// Number of FOVs between contrast-AF passes (`NUMBER_OF_FOVS_PER_AF`, spec §4.9).
    pub number_of_fovs_per_af: u32,

    /// `MULTIPOINT_PIEZO_DELAY_MS`: settle time after a piezo Z move (spec §4.6/4.9).
    #[serde(with = "humantime_serde")]
    pub piezo_settle_delay: Duration,

    /// Settle time after a stage X/Y/Z move before the next action (implementation
    /// detail not named as a constant in spec.md but required by "move, then settle").
    #[serde(with = "humantime_serde")]
    pub stage_settle_delay: Duration,

    /// `LASER_AF_SEARCH_DOWN_FIRST` (spec §4.6): outer direction of the Z search.
    pub laser_af_search_down_first: bool,

    /// Fallback calibration constant (µm/px) used when `initialize_auto`
    /// cannot resolve a centroid shift (`x1 - x0 == 0`, spec §4.6).
    pub laser_af_fallback_pixel_to_um: f64,

    /// Whether a job failure should request acquisition abort
    /// (`abort_on_failed_jobs`, spec §4.10).
    pub abort_on_failed_jobs: bool,

    /// Bounded queue depth for each `JobRunner` (spec §4.10).
    pub job_queue_depth: usize,

    /// Z sweep range (`AutoFocusController::run`) used for the 3-corner
    /// focus-map calibration performed during acquisition preparation
    /// (spec §4.8 step 11 "3-corner grid").
    pub focus_map_sweep_range_um: f64,
    pub focus_map_step_um: f64,
}

impl Default for AcquisitionConfig {
    fn default() -> Self {
        Self {
            software_stage_limits_mm: StageLimitsMm::default(),
            watchdog_tick_interval: Duration::from_secs(1),
            hardware_op_timeout: Duration::from_secs(5),
            frame_wait_margin: Duration::from_secs(10),
            file_id_padding: 4,
            timepoint_dir_padding: 4,
            number_of_fovs_per_af: 1,
            piezo_settle_delay: Duration::from_millis(20),
            stage_settle_delay: Duration::from_millis(20),
            laser_af_search_down_first: true,
            laser_af_fallback_pixel_to_um: 0.4,
            abort_on_failed_jobs: true,
            job_queue_depth: 64,
            focus_map_sweep_range_um: 60.0,
            focus_map_step_um: 2.0,
        }
    }
}

impl AcquisitionConfig {
    /// Loads configuration from `config.toml` (if present in the current
    /// directory) overlaid with `ACQ_`-prefixed environment variables,
    /// falling back to [`AcquisitionConfig::default`] for anything unset.
    pub fn load() -> AcqResult<Self> {
        Figment::from(figment::providers::Serialized::defaults(Self::default()))
            .merge(Toml::file("config.toml"))
            .merge(Env::prefixed("ACQ_").split("__"))
            .extract()
            .map_err(|e| AcqError::Config(e.to_string()))
    }

    pub fn validate(&self) -> AcqResult<()> {
        if self.file_id_padding == 0 {
            return Err(AcqError::ConfigurationError(
                "file_id_padding must be >= 1".into(),
            ));
        }
        if self.number_of_fovs_per_af == 0 {
            return Err(AcqError::ConfigurationError(
                "number_of_fovs_per_af must be >= 1".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_limits_contain_origin_adjacent_point() {
        let limits = StageLimitsMm::default();
        assert!(limits.contains(10.0, 10.0));
        assert!(!limits.contains(-5.0, 10.0));
        assert!(!limits.contains(10.0, 1000.0));
    }

    #[test]
    fn default_config_validates() {
        assert!(AcquisitionConfig::default().validate().is_ok());
    }

    #[test]
    fn zero_padding_rejected() {
        let mut cfg = AcquisitionConfig::default();
        cfg.file_id_padding = 0;
        assert!(cfg.validate().is_err());
    }
}
