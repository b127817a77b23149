//! `LaserAFConfig` (spec §3, §4.6): per-objective calibration, thresholds,
//! spot-detection parameters and reference record for the laser autofocus.

use crate::model::image::PixelBuffer;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SpotDetectionMode {
    /// Largest connected region passing area bounds.
    Single,
    /// Two spots expected (e.g. two interfaces); implementation-defined.
    DualPeak,
    /// Spot search constrained to a row band around the last known Y.
    RowConstrained,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct Roi {
    pub offset_x: u32,
    pub offset_y: u32,
    pub width: u32,
    pub height: u32,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct SpotDetectionParams {
    pub window: u32,
    pub cc_threshold: f64,
    pub cc_min_area: u32,
    pub cc_max_area: u32,
    pub cc_row_tolerance: u32,
    pub ignore_row_tolerance: bool,
    pub spot_spacing: f64,
    pub spot_detection_mode: SpotDetectionMode,
    pub filter_sigma: f64,
}

impl Default for SpotDetectionParams {
    fn default() -> Self {
        Self {
            window: 5,
            cc_threshold: 10.0,
            cc_min_area: 4,
            cc_max_area: 4096,
            cc_row_tolerance: 20,
            ignore_row_tolerance: false,
            spot_spacing: 100.0,
            spot_detection_mode: SpotDetectionMode::Single,
            filter_sigma: 1.0,
        }
    }
}

/// Stored reference record used for cross-correlation verification
/// (`set_reference`, spec §4.6).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LaserAFReference {
    pub x_reference: f64,
    pub has_reference: bool,
    pub reference_crop: Option<PixelBuffer>,
    pub reference_crop_width: u32,
    pub reference_crop_height: u32,
}

impl Default for LaserAFReference {
    fn default() -> Self {
        Self {
            x_reference: 0.0,
            has_reference: false,
            reference_crop: None,
            reference_crop_width: 0,
            reference_crop_height: 0,
        }
    }
}

/// Persisted per-objective laser-AF configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LaserAFConfig {
    pub objective: String,
    pub roi: Roi,

    pub pixel_to_um: f64,
    pub calibration_timestamp: Option<DateTime<Utc>>,

    pub correlation_threshold: f64,
    pub laser_af_range_um: f64,
    pub laser_af_averaging_n: u32,
    pub displacement_success_window_um: f64,

    pub spot_detection: SpotDetectionParams,
    pub spot_crop_size: u32,

    pub reference: LaserAFReference,

    /// `is_initialized`: cleared on objective/profile change without
    /// touching hardware (spec §4.6 "State transitions and persistence").
    pub is_initialized: bool,
}

impl LaserAFConfig {
    pub fn new(objective: impl Into<String>) -> Self {
        Self {
            objective: objective.into(),
            roi: Roi {
                offset_x: 0,
                offset_y: 0,
                width: 1024,
                height: 1024,
            },
            pixel_to_um: 0.4,
            calibration_timestamp: None,
            correlation_threshold: 0.8,
            laser_af_range_um: 40.0,
            laser_af_averaging_n: 3,
            displacement_success_window_um: 1.0,
            spot_detection: SpotDetectionParams::default(),
            spot_crop_size: 50,
            reference: LaserAFReference::default(),
            is_initialized: false,
        }
    }

    /// Config validation per spec §9 Open Question: `laser_af_averaging_n`
    /// must be >= 1; rejected here rather than silently treated as 0
    /// successful detections.
    pub fn validate(&self) -> Result<(), String> {
        if self.laser_af_averaging_n == 0 {
            return Err("laser_af_averaging_n must be >= 1".into());
        }
        if self.laser_af_range_um <= 0.0 {
            return Err("laser_af_range_um must be > 0".into());
        }
        Ok(())
    }

    /// Marks the config uninitialized on objective/profile change; cached
    /// settings remain loaded, no hardware is touched (spec §4.6).
    pub fn mark_uninitialized(&mut self) {
        self.is_initialized = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_averaging_rejected() {
        let mut cfg = LaserAFConfig::new("20x");
        cfg.laser_af_averaging_n = 0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn has_reference_requires_crop_present_by_convention() {
        let mut reference = LaserAFReference::default();
        reference.has_reference = true;
        reference.reference_crop = Some(PixelBuffer::U8(vec![0; 16]));
        assert!(reference.has_reference && reference.reference_crop.is_some());
    }
}
