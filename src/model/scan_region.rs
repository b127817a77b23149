//! `ScanRegion` / `ScanPositionInformation` (spec §3).

use super::position::Position;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub enum RegionShape {
    Square,
    Rectangle,
    Circle,
    Manual,
}

/// A single FOV center, either a flat 2D point or a 3D point carrying its
/// own Z (e.g. after `update_fov_z_level` or focus-map interpolation).
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct FovCoord {
    pub x_mm: f64,
    pub y_mm: f64,
    pub z_mm: Option<f64>,
}

impl FovCoord {
    pub fn xy(x_mm: f64, y_mm: f64) -> Self {
        Self {
            x_mm,
            y_mm,
            z_mm: None,
        }
    }
}

/// Named entity owning an ordered list of FOV centers generated from
/// `(shape, FOV size, overlap, stage limits)` (spec §3).
///
/// Invariant: every FOV center lies within software stage limits; the list
/// is never empty unless the region was explicitly cleared.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ScanRegion {
    pub name: String,
    pub center: Position,
    pub shape: RegionShape,
    pub polygon_vertices_mm: Option<Vec<(f64, f64)>>,
    pub fov_centers: Vec<FovCoord>,
}

impl ScanRegion {
    pub fn new(name: impl Into<String>, center: Position, shape: RegionShape) -> Self {
        Self {
            name: name.into(),
            center,
            shape,
            polygon_vertices_mm: None,
            fov_centers: Vec::new(),
        }
    }

    /// `update_fov_z_level`: updates Z of a specific FOV and, if it is the
    /// first FOV in the region, also updates the region center's Z (spec §4.7).
    pub fn update_fov_z_level(&mut self, fov_index: usize, z_mm: f64) {
        if let Some(fov) = self.fov_centers.get_mut(fov_index) {
            fov.z_mm = Some(z_mm);
        }
        if fov_index == 0 {
            self.center.z_mm = z_mm;
        }
    }
}

/// Immutable snapshot of all scan regions, passed to the worker at run start
/// (spec §3). Mutations to the live `ScanCoordinates` after this snapshot is
/// taken do not affect the active run.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ScanPositionInformation {
    pub scan_region_names: Vec<String>,
    pub scan_region_coords_mm: BTreeMap<String, Position>,
    pub scan_region_fov_coords_mm: BTreeMap<String, Vec<FovCoord>>,
}

impl ScanPositionInformation {
    pub fn total_fov_count(&self) -> usize {
        self.scan_region_fov_coords_mm
            .values()
            .map(|v| v.len())
            .sum()
    }

    pub fn region_count(&self) -> usize {
        self.scan_region_names.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn update_first_fov_also_updates_center() {
        let mut region = ScanRegion::new(
            "A1",
            Position::new(1.0, 2.0, 0.0),
            RegionShape::Square,
        );
        region.fov_centers.push(FovCoord::xy(1.0, 2.0));
        region.fov_centers.push(FovCoord::xy(1.1, 2.0));
        region.update_fov_z_level(0, 5.0);
        assert_eq!(region.center.z_mm, 5.0);
        assert_eq!(region.fov_centers[0].z_mm, Some(5.0));
        assert_eq!(region.fov_centers[1].z_mm, None);
    }
}
