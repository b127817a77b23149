//! `ChannelMode` / `ChannelConfigurationSet` (spec §3).

use crate::error::{AcqError, AcqResult};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Integer enum of illumination sources; values `<10` designate LED-matrix
/// modes per spec §3.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct IlluminationSource(pub i32);

impl IlluminationSource {
    pub fn is_led_matrix(&self) -> bool {
        self.0 < 10
    }
}

/// A single optics/illumination preset, unique per objective by `name`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChannelMode {
    pub name: String,
    pub illumination_source: IlluminationSource,
    pub illumination_intensity: f64,
    pub exposure_time_ms: f64,
    pub analog_gain: f64,
    pub z_offset_um: Option<f64>,
    pub emission_filter_position: i32,
}

impl ChannelMode {
    pub fn new(name: impl Into<String>, exposure_time_ms: f64) -> Self {
        Self {
            name: name.into(),
            illumination_source: IlluminationSource(0),
            illumination_intensity: 50.0,
            exposure_time_ms,
            analog_gain: 0.0,
            z_offset_um: None,
            emission_filter_position: 0,
        }
    }

    pub fn validate(&self) -> AcqResult<()> {
        if !(0.0..=100.0).contains(&self.illumination_intensity) {
            return Err(AcqError::ConfigurationError(format!(
                "channel '{}': illumination_intensity {} out of [0,100]",
                self.name, self.illumination_intensity
            )));
        }
        if self.exposure_time_ms <= 0.0 {
            return Err(AcqError::ConfigurationError(format!(
                "channel '{}': exposure_time_ms must be > 0",
                self.name
            )));
        }
        if self.analog_gain < 0.0 {
            return Err(AcqError::ConfigurationError(format!(
                "channel '{}': analog_gain must be >= 0",
                self.name
            )));
        }
        Ok(())
    }

    /// A config name containing "RGB" triggers the three-LED composite
    /// capture path described in spec §6.
    pub fn is_rgb(&self) -> bool {
        self.name.to_uppercase().contains("RGB")
    }

    /// Filename suffix used when composing `{file_id}_{suffix}.{ext}` (spec §6).
    pub fn suffix(&self) -> String {
        self.name.replace(' ', "_")
    }
}

/// Ordered per-objective list of channel presets, persisted as XML per
/// experiment (`configurations.xml`, spec §6).
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ChannelConfigurationSet {
    pub objective: String,
    pub modes: Vec<ChannelMode>,
}

impl ChannelConfigurationSet {
    pub fn new(objective: impl Into<String>) -> Self {
        Self {
            objective: objective.into(),
            modes: Vec::new(),
        }
    }

    /// Enforces the "name unique within objective" invariant from spec §3.
    pub fn add(&mut self, mode: ChannelMode) -> AcqResult<()> {
        mode.validate()?;
        if self.modes.iter().any(|m| m.name == mode.name) {
            return Err(AcqError::ConfigurationError(format!(
                "duplicate channel name '{}' for objective '{}'",
                mode.name, self.objective
            )));
        }
        self.modes.push(mode);
        Ok(())
    }

    pub fn names_are_unique(&self) -> bool {
        let mut seen = HashSet::new();
        self.modes.iter().all(|m| seen.insert(m.name.clone()))
    }

    pub fn get(&self, name: &str) -> Option<&ChannelMode> {
        self.modes.iter().find(|m| m.name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicate_name_rejected() {
        let mut set = ChannelConfigurationSet::new("20x");
        set.add(ChannelMode::new("BF", 20.0)).unwrap();
        let err = set.add(ChannelMode::new("BF", 30.0));
        assert!(err.is_err());
    }

    #[test]
    fn rgb_detection_is_case_insensitive() {
        assert!(ChannelMode::new("Fluorescence_RGB", 10.0).is_rgb());
        assert!(!ChannelMode::new("BF LED matrix full", 10.0).is_rgb());
    }

    #[test]
    fn invalid_exposure_rejected() {
        let mode = ChannelMode::new("BF", 0.0);
        assert!(mode.validate().is_err());
    }
}
