//! On-disk experiment layout (spec §6): `configurations.xml`,
//! `acquisition parameters.json`, the top-level and per-timepoint
//! `coordinates.csv`, and `done` marker files.
//!
//! CSV via the `csv` crate, JSON via `serde_json`, XML via `quick-xml`'s
//! event writer - one crate per format, no hand-rolled parsing.

use crate::error::AcqResult;
use crate::model::{AcquisitionParameters, ChannelConfigurationSet, ScanPositionInformation};
use chrono::{DateTime, Utc};
use quick_xml::events::{BytesEnd, BytesStart, Event as XmlEvent};
use quick_xml::writer::Writer as XmlWriter;
use serde::Serialize;
use std::io::Cursor;
use std::path::{Path, PathBuf};

/// One row of the experiment-wide `coordinates.csv` (spec §6): the region
/// center the run was planned against, one row per region.
#[derive(Serialize)]
struct RegionRow<'a> {
    region: &'a str,
    #[serde(rename = "x (mm)")]
    x_mm: f64,
    #[serde(rename = "y (mm)")]
    y_mm: f64,
    #[serde(rename = "z (mm)")]
    z_mm: f64,
}

pub fn write_global_coordinates_csv(path: &Path, info: &ScanPositionInformation) -> AcqResult<()> {
    let mut writer = csv::Writer::from_path(path)?;
    for region in &info.scan_region_names {
        let Some(center) = info.scan_region_coords_mm.get(region) else {
            continue;
        };
        writer.serialize(RegionRow {
            region,
            x_mm: center.x_mm,
            y_mm: center.y_mm,
            z_mm: center.z_mm,
        })?;
    }
    writer.flush()?;
    Ok(())
}

pub fn write_acquisition_parameters_json(path: &Path, params: &AcquisitionParameters) -> AcqResult<()> {
    let file = std::fs::File::create(path)?;
    serde_json::to_writer_pretty(file, params)?;
    Ok(())
}

/// Writes `configurations.xml` as a flat `<modes><mode .../></modes>` per
/// objective, mirroring the attribute-per-field layout used by the original
/// acquisition software's configuration file (spec §6, resolved per
/// `original_source/` since spec.md itself only names the file).
pub fn write_configurations_xml(path: &Path, configs: &ChannelConfigurationSet) -> AcqResult<()> {
    let mut buffer = Cursor::new(Vec::new());
    let mut writer = XmlWriter::new_with_indent(&mut buffer, b' ', 2);

    let mut modes_start = BytesStart::new("modes");
    modes_start.push_attribute(("objective", configs.objective.as_str()));
    writer.write_event(XmlEvent::Start(modes_start))?;

    for mode in &configs.modes {
        let mut mode_start = BytesStart::new("mode");
        mode_start.push_attribute(("Name", mode.name.as_str()));
        mode_start.push_attribute(("IlluminationSource", mode.illumination_source.0.to_string().as_str()));
        mode_start.push_attribute(("IlluminationIntensity", mode.illumination_intensity.to_string().as_str()));
        mode_start.push_attribute(("ExposureTime", mode.exposure_time_ms.to_string().as_str()));
        mode_start.push_attribute(("AnalogGain", mode.analog_gain.to_string().as_str()));
        mode_start.push_attribute(("EmissionFilterPosition", mode.emission_filter_position.to_string().as_str()));
        if let Some(offset) = mode.z_offset_um {
            mode_start.push_attribute(("ZOffset", offset.to_string().as_str()));
        }
        writer.write_event(XmlEvent::Empty(mode_start))?;
    }

    writer.write_event(XmlEvent::End(BytesEnd::new("modes")))?;
    std::fs::write(path, buffer.into_inner())?;
    Ok(())
}

/// One row of a per-timepoint `coordinates.csv` (spec §6): every frame
/// actually captured this time point, keyed by the same identity tuple used
/// for callback/job dispatch (`CaptureInfo::identity`).
#[derive(Serialize)]
pub struct TimepointRecord {
    pub region: String,
    pub fov: usize,
    pub z_level: u32,
    #[serde(rename = "x (mm)")]
    pub x_mm: f64,
    #[serde(rename = "y (mm)")]
    pub y_mm: f64,
    /// Micrometers (`z_mm * 1000`), matching the original's
    /// `update_coordinates_dataframe` (spec §6).
    #[serde(rename = "z (um)")]
    pub z_um: f64,
    pub time: DateTime<Utc>,
    #[serde(rename = "z_piezo (um)")]
    pub z_piezo_um: Option<f64>,
}

pub fn write_timepoint_coordinates_csv(dir: &Path, records: &[TimepointRecord]) -> AcqResult<()> {
    std::fs::create_dir_all(dir)?;
    let mut writer = csv::Writer::from_path(dir.join("coordinates.csv"))?;
    for record in records {
        writer.serialize(record)?;
    }
    writer.flush()?;
    Ok(())
}

/// `{tttt}` directory name, zero-padded per `AcquisitionConfig::timepoint_dir_padding`.
pub fn timepoint_dir(experiment_dir: &Path, time_point: u32, padding: usize) -> PathBuf {
    experiment_dir.join(format!("{time_point:0padding$}", padding = padding))
}

pub fn write_done_marker(dir: &Path) -> AcqResult<()> {
    std::fs::write(dir.join("done"), b"")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::FovCoord;

    #[test]
    fn global_coordinates_round_trip_row_count() {
        let dir = tempfile::tempdir().unwrap();
        let mut info = ScanPositionInformation::default();
        info.scan_region_names.push("A1".into());
        info.scan_region_coords_mm
            .insert("A1".into(), crate::model::Position::new(0.0, 0.0, 0.0));
        info.scan_region_fov_coords_mm.insert(
            "A1".into(),
            vec![FovCoord::xy(0.0, 0.0), FovCoord::xy(1.0, 0.0)],
        );
        let path = dir.path().join("coordinates.csv");
        write_global_coordinates_csv(&path, &info).unwrap();
        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents.lines().count(), 2); // header + 1 region row
        assert!(contents.contains("region,x (mm),y (mm),z (mm)"));
    }

    #[test]
    fn configurations_xml_contains_mode_name() {
        let dir = tempfile::tempdir().unwrap();
        let mut configs = ChannelConfigurationSet::new("20x");
        configs.add(crate::model::ChannelMode::new("BF", 20.0)).unwrap();
        let path = dir.path().join("configurations.xml");
        write_configurations_xml(&path, &configs).unwrap();
        let contents = std::fs::read_to_string(&path).unwrap();
        assert!(contents.contains("Name=\"BF\""));
    }

    #[test]
    fn done_marker_is_an_empty_file() {
        let dir = tempfile::tempdir().unwrap();
        write_done_marker(dir.path()).unwrap();
        assert!(dir.path().join("done").exists());
    }

    #[test]
    fn timepoint_dir_is_zero_padded() {
        let base = PathBuf::from("/tmp/experiment");
        assert_eq!(timepoint_dir(&base, 7, 4), base.join("0007"));
    }
}
