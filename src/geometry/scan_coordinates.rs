//! `ScanCoordinates` (spec §4.7): pure geometry with one validation
//! dependency (software stage limits). Grounded on
//! `original_source/.../scan_coordinates.py`.

use crate::config::StageLimitsMm;
use crate::model::{FovCoord, Position, RegionShape, ScanRegion};
use std::collections::BTreeMap;

/// Tile count policy (spec §4.7 / §8 property 2):
/// `n = max(1, ceil((span - fov) / step) + 1)`.
fn tile_count(span: f64, fov: f64, step: f64) -> u32 {
    if step <= 0.0 {
        return 1;
    }
    let raw = ((span - fov) / step).ceil() + 1.0;
    raw.max(1.0) as u32
}

fn row_letter(index: usize) -> String {
    // A, B, ..., Z, AA, AB, ... (spreadsheet-style), used for deterministic
    // lexicographic sort (spec §4.7 `sort_coordinates`).
    let mut n = index as u32 + 1;
    let mut s = Vec::new();
    while n > 0 {
        let rem = (n - 1) % 26;
        s.push((b'A' + rem as u8) as char);
        n = (n - 1) / 26;
    }
    s.iter().rev().collect()
}

/// Owns the live (mutable) collection of named regions. Snapshotting into
/// `ScanPositionInformation` happens at acquisition-prepare time (spec §4.8
/// step 5); mutations after that point do not affect the active run.
#[derive(Clone, Debug, Default)]
pub struct ScanCoordinates {
    regions: BTreeMap<String, ScanRegion>,
    /// Insertion order, preserved separately from `sort_coordinates` output
    /// since `BTreeMap` would otherwise silently re-sort by name.
    order: Vec<String>,
    s_pattern: bool,
}

impl ScanCoordinates {
    pub fn new(s_pattern: bool) -> Self {
        Self {
            regions: BTreeMap::new(),
            order: Vec::new(),
            s_pattern,
        }
    }

    pub fn clear_regions(&mut self) {
        self.regions.clear();
        self.order.clear();
    }

    pub fn region(&self, id: &str) -> Option<&ScanRegion> {
        self.regions.get(id)
    }

    pub fn region_mut(&mut self, id: &str) -> Option<&mut ScanRegion> {
        self.regions.get_mut(id)
    }

    pub fn regions_in_order(&self) -> impl Iterator<Item = &ScanRegion> {
        self.order.iter().filter_map(move |id| self.regions.get(id))
    }

    fn insert_region(&mut self, region: ScanRegion) {
        if !self.regions.contains_key(&region.name) {
            self.order.push(region.name.clone());
        }
        self.regions.insert(region.name.clone(), region);
    }

    /// `add_region(id, center, size_mm, overlap_percent, shape)` (spec §4.7).
    ///
    /// "span" is scan size for Square/Circle, or width x height for
    /// Rectangle where height = 0.6 x width by convention (spec §4.7 tile
    /// count policy note).
    pub fn add_region(
        &mut self,
        id: impl Into<String>,
        center: Position,
        size_mm: f64,
        overlap_percent: f64,
        shape: RegionShape,
        fov_mm: f64,
        limits: &StageLimitsMm,
    ) {
        let id = id.into();
        let step = fov_mm * (1.0 - overlap_percent / 100.0);

        let (span_x, span_y) = match shape {
            RegionShape::Rectangle => (size_mm, size_mm * 0.6),
            _ => (size_mm, size_mm),
        };

        let nx = tile_count(span_x, fov_mm, step);
        let ny = tile_count(span_y, fov_mm, step);

        let mut tiles = Vec::new();
        let x0 = center.x_mm - (nx as f64 - 1.0) * step / 2.0;
        let y0 = center.y_mm - (ny as f64 - 1.0) * step / 2.0;

        for row in 0..ny {
            let mut row_tiles = Vec::new();
            for col in 0..nx {
                let cx = x0 + col as f64 * step;
                let cy = y0 + row as f64 * step;

                if matches!(shape, RegionShape::Circle) && !circle_accepts(cx, cy, center, size_mm / 2.0, fov_mm) {
                    continue;
                }
                if !limits.contains(cx, cy) {
                    continue;
                }
                row_tiles.push(FovCoord::xy(cx, cy));
            }
            if self.s_pattern && row % 2 == 1 {
                row_tiles.reverse();
            }
            tiles.extend(row_tiles);
        }

        // Circle degenerate case: keep the center tile even if the ring of
        // tiles around it was entirely rejected (spec §4.7).
        if tiles.is_empty() && matches!(shape, RegionShape::Circle) && limits.contains(center.x_mm, center.y_mm) {
            tiles.push(FovCoord::xy(center.x_mm, center.y_mm));
        }

        let mut region = ScanRegion::new(id, center, shape);
        region.fov_centers = tiles;
        self.insert_region(region);
    }

    /// `add_flexible_region(id, center, NX, NY, overlap_percent)` (spec §4.7).
    pub fn add_flexible_region(
        &mut self,
        id: impl Into<String>,
        center: Position,
        nx: u32,
        ny: u32,
        overlap_percent: f64,
        fov_mm: f64,
        limits: &StageLimitsMm,
    ) {
        let step = fov_mm * (1.0 - overlap_percent / 100.0);
        self.add_flexible_region_with_step(id, center, nx, ny, step, step, limits);
    }

    /// `add_flexible_region...with_step_size(id, center, NX, NY, dx, dy)` (spec §4.7).
    pub fn add_flexible_region_with_step(
        &mut self,
        id: impl Into<String>,
        center: Position,
        nx: u32,
        ny: u32,
        dx: f64,
        dy: f64,
        limits: &StageLimitsMm,
    ) {
        let id = id.into();
        let mut tiles = Vec::new();
        let x0 = center.x_mm - (nx as f64 - 1.0) * dx / 2.0;
        let y0 = center.y_mm - (ny as f64 - 1.0) * dy / 2.0;

        for row in 0..ny {
            let mut row_tiles = Vec::new();
            for col in 0..nx {
                let cx = x0 + col as f64 * dx;
                let cy = y0 + row as f64 * dy;
                if limits.contains(cx, cy) {
                    row_tiles.push(FovCoord::xy(cx, cy));
                }
            }
            if self.s_pattern && row % 2 == 1 {
                row_tiles.reverse();
            }
            tiles.extend(row_tiles);
        }

        let mut region = ScanRegion::new(id, center, RegionShape::Square);
        region.fov_centers = tiles;
        self.insert_region(region);
    }

    /// `add_template_region(x, y, z, template_xs, template_ys, id)` (spec §4.7):
    /// arbitrary tile template offset from a base position.
    pub fn add_template_region(
        &mut self,
        id: impl Into<String>,
        base: Position,
        template_xs: &[f64],
        template_ys: &[f64],
        limits: &StageLimitsMm,
    ) {
        let id = id.into();
        let tiles: Vec<FovCoord> = template_xs
            .iter()
            .zip(template_ys.iter())
            .filter_map(|(&dx, &dy)| {
                let cx = base.x_mm + dx;
                let cy = base.y_mm + dy;
                limits.contains(cx, cy).then(|| FovCoord::xy(cx, cy))
            })
            .collect();

        let mut region = ScanRegion::new(id, base, RegionShape::Manual);
        region.fov_centers = tiles;
        self.insert_region(region);
    }

    /// `get_points_for_manual_region(polygon, overlap_percent)` (spec §4.7):
    /// grid within the polygon's bounding box, accepting a tile if its
    /// center or any of its four corners is inside the polygon (ray
    /// casting), with optional S-pattern row reversal.
    pub fn get_points_for_manual_region(
        &self,
        polygon: &[(f64, f64)],
        overlap_percent: f64,
        fov_mm: f64,
        limits: &StageLimitsMm,
    ) -> Vec<FovCoord> {
        if polygon.len() < 3 {
            return Vec::new();
        }
        let step = fov_mm * (1.0 - overlap_percent / 100.0);
        let min_x = polygon.iter().map(|p| p.0).fold(f64::INFINITY, f64::min);
        let max_x = polygon.iter().map(|p| p.0).fold(f64::NEG_INFINITY, f64::max);
        let min_y = polygon.iter().map(|p| p.1).fold(f64::INFINITY, f64::min);
        let max_y = polygon.iter().map(|p| p.1).fold(f64::NEG_INFINITY, f64::max);

        let nx = tile_count(max_x - min_x, fov_mm, step).max(1);
        let ny = tile_count(max_y - min_y, fov_mm, step).max(1);
        let half = fov_mm / 2.0;

        let mut points = Vec::new();
        for row in 0..ny {
            let mut row_points = Vec::new();
            for col in 0..nx {
                let cx = min_x + col as f64 * step;
                let cy = min_y + row as f64 * step;
                let corners = [
                    (cx - half, cy - half),
                    (cx + half, cy - half),
                    (cx - half, cy + half),
                    (cx + half, cy + half),
                ];
                let accept = point_in_polygon(cx, cy, polygon)
                    || corners.iter().any(|&(px, py)| point_in_polygon(px, py, polygon));
                if accept && limits.contains(cx, cy) {
                    row_points.push(FovCoord::xy(cx, cy));
                }
            }
            if self.s_pattern && row % 2 == 1 {
                row_points.reverse();
            }
            points.extend(row_points);
        }
        points
    }

    /// `sort_coordinates()` (spec §4.7): deterministic lexicographic
    /// ordering by (row-letter, column-number); "manual" regions sort first
    /// by (y, x). S-pattern reversal of alternate rows is preserved by
    /// construction (tiles are already row-reversed where applicable).
    pub fn sort_coordinates(&mut self) {
        self.order.sort_by(|a, b| {
            let ra = self.regions.get(a).expect("region exists");
            let rb = self.regions.get(b).expect("region exists");
            match (matches!(ra.shape, RegionShape::Manual), matches!(rb.shape, RegionShape::Manual)) {
                (true, true) => ra
                    .center
                    .y_mm
                    .partial_cmp(&rb.center.y_mm)
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then_with(|| ra.center.x_mm.partial_cmp(&rb.center.x_mm).unwrap_or(std::cmp::Ordering::Equal)),
                (true, false) => std::cmp::Ordering::Less,
                (false, true) => std::cmp::Ordering::Greater,
                (false, false) => a.cmp(b),
            }
        });
    }

    /// Assigns row-letter/column-number names for a grid of well-like
    /// regions, matching the naming convention `sort_coordinates` expects.
    pub fn well_name(row: usize, col: usize) -> String {
        format!("{}{}", row_letter(row), col + 1)
    }
}

fn circle_accepts(cx: f64, cy: f64, center: Position, radius: f64, fov: f64) -> bool {
    // `§8 property 5`: accept a tile iff all four corners lie within radius.
    let half = fov / 2.0;
    let corners = [
        (cx - half, cy - half),
        (cx + half, cy - half),
        (cx - half, cy + half),
        (cx + half, cy + half),
    ];
    corners.iter().all(|&(x, y)| {
        let dx = x - center.x_mm;
        let dy = y - center.y_mm;
        (dx * dx + dy * dy).sqrt() <= radius
    })
}

/// Standard ray-casting point-in-polygon test.
fn point_in_polygon(x: f64, y: f64, polygon: &[(f64, f64)]) -> bool {
    let mut inside = false;
    let n = polygon.len();
    let mut j = n - 1;
    for i in 0..n {
        let (xi, yi) = polygon[i];
        let (xj, yj) = polygon[j];
        if (yi > y) != (yj > y) {
            let x_intersect = xj + (y - yj) / (yi - yj) * (xi - xj);
            if x < x_intersect {
                inside = !inside;
            }
        }
        j = i;
    }
    inside
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wide_limits() -> StageLimitsMm {
        StageLimitsMm {
            x_negative: -1000.0,
            x_positive: 1000.0,
            y_negative: -1000.0,
            y_positive: 1000.0,
        }
    }

    #[test]
    fn tile_count_matches_formula() {
        // span 3.0, fov 1.0, overlap 10% -> step 0.9
        let n = tile_count(3.0, 1.0, 0.9);
        let expected = (((3.0 - 1.0) / 0.9f64).ceil() + 1.0) as u32;
        assert_eq!(n, expected);
    }

    #[test]
    fn every_fov_within_limits() {
        let mut sc = ScanCoordinates::new(false);
        let limits = StageLimitsMm {
            x_negative: 0.0,
            x_positive: 10.0,
            y_negative: 0.0,
            y_positive: 10.0,
        };
        sc.add_region(
            "A1",
            Position::new(5.0, 5.0, 0.0),
            3.0,
            10.0,
            RegionShape::Square,
            1.0,
            &limits,
        );
        let region = sc.region("A1").unwrap();
        assert!(!region.fov_centers.is_empty());
        for fov in &region.fov_centers {
            assert!(limits.contains(fov.x_mm, fov.y_mm));
        }
    }

    #[test]
    fn region_outside_limits_yields_no_fovs() {
        let mut sc = ScanCoordinates::new(false);
        let limits = StageLimitsMm {
            x_negative: 0.0,
            x_positive: 1.0,
            y_negative: 0.0,
            y_positive: 1.0,
        };
        sc.add_region(
            "A1",
            Position::new(500.0, 500.0, 0.0),
            3.0,
            10.0,
            RegionShape::Square,
            1.0,
            &limits,
        );
        let region = sc.region("A1").unwrap();
        assert!(region.fov_centers.is_empty());
    }

    #[test]
    fn s_pattern_reverses_odd_rows() {
        let mut sc = ScanCoordinates::new(true);
        sc.add_flexible_region(
            "A1",
            Position::new(0.0, 0.0, 0.0),
            3,
            2,
            0.0,
            1.0,
            &wide_limits(),
        );
        let region = sc.region("A1").unwrap();
        assert_eq!(region.fov_centers.len(), 6);
        let row0: Vec<f64> = region.fov_centers[0..3].iter().map(|f| f.x_mm).collect();
        let row1: Vec<f64> = region.fov_centers[3..6].iter().map(|f| f.x_mm).collect();
        let mut expected_row1 = row0.clone();
        expected_row1.reverse();
        assert_eq!(row1, expected_row1);
    }

    #[test]
    fn circle_rejects_corner_outside_radius() {
        assert!(!circle_accepts(0.9, 0.9, Position::new(0.0, 0.0, 0.0), 1.0, 1.0));
        assert!(circle_accepts(0.0, 0.0, Position::new(0.0, 0.0, 0.0), 1.0, 0.5));
    }

    #[test]
    fn manual_region_point_in_polygon() {
        let sc = ScanCoordinates::new(false);
        let polygon = vec![(0.0, 0.0), (4.0, 0.0), (4.0, 4.0), (0.0, 4.0)];
        let points = sc.get_points_for_manual_region(&polygon, 0.0, 1.0, &wide_limits());
        assert!(!points.is_empty());
        for p in &points {
            // every accepted point's center or a corner was inside [0,4]x[0,4]
            assert!(p.x_mm >= -0.5 && p.x_mm <= 4.5);
        }
    }

    #[test]
    fn clear_then_readd_reproduces_fov_list() {
        let mut sc = ScanCoordinates::new(false);
        let limits = wide_limits();
        sc.add_region("A1", Position::new(0.0, 0.0, 0.0), 3.0, 10.0, RegionShape::Square, 1.0, &limits);
        let first: Vec<_> = sc.region("A1").unwrap().fov_centers.clone();
        sc.clear_regions();
        assert!(sc.region("A1").is_none());
        sc.add_region("A1", Position::new(0.0, 0.0, 0.0), 3.0, 10.0, RegionShape::Square, 1.0, &limits);
        let second: Vec<_> = sc.region("A1").unwrap().fov_centers.clone();
        assert_eq!(first, second);
    }

    #[test]
    fn sort_puts_manual_regions_first() {
        let mut sc = ScanCoordinates::new(false);
        let limits = wide_limits();
        sc.add_region("B2", Position::new(0.0, 0.0, 0.0), 1.0, 0.0, RegionShape::Square, 1.0, &limits);
        sc.add_template_region("manual_1", Position::new(2.0, 2.0, 0.0), &[0.0], &[0.0], &limits);
        sc.add_region("A1", Position::new(0.0, 0.0, 0.0), 1.0, 0.0, RegionShape::Square, 1.0, &limits);
        sc.sort_coordinates();
        let order: Vec<_> = sc.regions_in_order().map(|r| r.name.clone()).collect();
        assert_eq!(order[0], "manual_1");
        assert_eq!(order[1], "A1");
        assert_eq!(order[2], "B2");
    }
}
