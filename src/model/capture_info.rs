//! `CaptureInfo` (spec §3): per-frame metadata record created just before
//! triggering, consumed by exactly one frame callback, then handed to 0..N jobs.

use super::channel::ChannelMode;
use super::position::Position;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CaptureInfo {
    pub position: Position,
    pub z_index: u32,
    pub capture_time: DateTime<Utc>,
    pub z_piezo_um: Option<f64>,

    pub configuration: ChannelMode,
    pub configuration_idx: usize,

    pub region_id: String,
    pub fov: usize,
    pub time_point: u32,
    pub file_id: String,
    pub save_directory: PathBuf,

    pub total_time_points: u32,
    pub total_z_levels: u32,
    pub total_channels: u32,
    pub channel_names: Vec<String>,

    pub physical_size_x_um: f64,
    pub physical_size_y_um: f64,
    pub physical_size_z_um: f64,
    pub time_increment_s: f64,
}

impl CaptureInfo {
    /// Identity tuple consumers must key on instead of wall-clock arrival
    /// order (spec §5 ordering guarantees, §8 property 9).
    pub fn identity(&self) -> (String, usize, u32, usize, u32) {
        (
            self.region_id.clone(),
            self.fov,
            self.z_index,
            self.configuration_idx,
            self.time_point,
        )
    }

    /// `file_id = {region}_{fov:NNNN}_{z:NNNN}` (spec §6), using the
    /// configured padding width.
    pub fn compute_file_id(region: &str, fov: usize, z_index: u32, padding: usize) -> String {
        format!(
            "{region}_{fov:0pad$}_{z:0pad$}",
            region = region,
            fov = fov,
            z = z_index,
            pad = padding
        )
    }

    /// `{file_id}_{config.suffix}.{ext}` (spec §6).
    pub fn output_filename(&self, ext: &str) -> String {
        format!("{}_{}.{}", self.file_id, self.configuration.suffix(), ext)
    }
}
