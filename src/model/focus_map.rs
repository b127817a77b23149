//! `FocusMap` (spec §3): an interpolator over (x, y) -> z within a named
//! region, built from >= 3 calibration points (a 3-corner grid in the
//! scheduler's `gen_focus_map` preparation step, spec §4.8).
//!
//! Implemented as a least-squares plane fit `z = a*x + b*y + c`, the
//! simplest interpolator that satisfies ">= 3 calibration points" without
//! requiring a full surface-fitting dependency; consistent with the
//! "3-corner grid" calibration procedure named in spec §4.8 step 11.

use crate::error::{AcqError, AcqResult};
use std::collections::HashMap;

#[derive(Clone, Debug)]
struct PlaneFit {
    a: f64,
    b: f64,
    c: f64,
}

impl PlaneFit {
    fn z_at(&self, x: f64, y: f64) -> f64 {
        self.a * x + self.b * y + self.c
    }
}

/// Fits `z = a*x + b*y + c` to `points` by ordinary least squares via the
/// normal equations; `points.len() >= 3` and not collinear is required.
fn fit_plane(points: &[(f64, f64, f64)]) -> AcqResult<PlaneFit> {
    if points.len() < 3 {
        return Err(AcqError::ConfigurationError(
            "focus map requires >= 3 calibration points".into(),
        ));
    }

    // Normal equations for least-squares plane fit: solve M * [a,b,c]^T = v
    let mut m = [[0.0f64; 3]; 3];
    let mut v = [0.0f64; 3];
    for &(x, y, z) in points {
        m[0][0] += x * x;
        m[0][1] += x * y;
        m[0][2] += x;
        m[1][0] += x * y;
        m[1][1] += y * y;
        m[1][2] += y;
        m[2][0] += x;
        m[2][1] += y;
        m[2][2] += 1.0;
        v[0] += x * z;
        v[1] += y * z;
        v[2] += z;
    }

    solve_3x3(m, v).ok_or_else(|| {
        AcqError::ConfigurationError("focus map calibration points are degenerate".into())
    })
}

fn solve_3x3(m: [[f64; 3]; 3], v: [f64; 3]) -> Option<PlaneFit> {
    let det = m[0][0] * (m[1][1] * m[2][2] - m[1][2] * m[2][1])
        - m[0][1] * (m[1][0] * m[2][2] - m[1][2] * m[2][0])
        + m[0][2] * (m[1][0] * m[2][1] - m[1][1] * m[2][0]);
    if det.abs() < 1e-12 {
        return None;
    }

    let solve_col = |col: usize| -> f64 {
        let mut mm = m;
        for row in 0..3 {
            mm[row][col] = v[row];
        }
        let d = mm[0][0] * (mm[1][1] * mm[2][2] - mm[1][2] * mm[2][1])
            - mm[0][1] * (mm[1][0] * mm[2][2] - mm[1][2] * mm[2][0])
            + mm[0][2] * (mm[1][0] * mm[2][1] - mm[1][1] * mm[2][0]);
        d / det
    };

    Some(PlaneFit {
        a: solve_col(0),
        b: solve_col(1),
        c: solve_col(2),
    })
}

/// One fit per named region (`interpolate(x, y, region_id) -> z_mm`, spec §3).
#[derive(Clone, Debug, Default)]
pub struct FocusMap {
    fits: HashMap<String, PlaneFit>,
}

impl FocusMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calibrate_region(
        &mut self,
        region_id: impl Into<String>,
        points: &[(f64, f64, f64)],
    ) -> AcqResult<()> {
        let fit = fit_plane(points)?;
        self.fits.insert(region_id.into(), fit);
        Ok(())
    }

    pub fn interpolate(&self, x_mm: f64, y_mm: f64, region_id: &str) -> AcqResult<f64> {
        self.fits
            .get(region_id)
            .map(|fit| fit.z_at(x_mm, y_mm))
            .ok_or_else(|| {
                AcqError::ConfigurationError(format!(
                    "no focus map calibration for region '{region_id}'"
                ))
            })
    }

    pub fn has_region(&self, region_id: &str) -> bool {
        self.fits.contains_key(region_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flat_plane_interpolates_to_constant() {
        let mut map = FocusMap::new();
        map.calibrate_region(
            "A1",
            &[(0.0, 0.0, 1.0), (1.0, 0.0, 1.0), (0.0, 1.0, 1.0)],
        )
        .unwrap();
        let z = map.interpolate(0.5, 0.5, "A1").unwrap();
        assert!((z - 1.0).abs() < 1e-9);
    }

    #[test]
    fn tilted_plane_matches_corners() {
        let mut map = FocusMap::new();
        // z = 2x + 3y + 1
        map.calibrate_region(
            "A1",
            &[(0.0, 0.0, 1.0), (1.0, 0.0, 3.0), (0.0, 1.0, 4.0)],
        )
        .unwrap();
        let z = map.interpolate(2.0, 2.0, "A1").unwrap();
        assert!((z - (2.0 * 2.0 + 3.0 * 2.0 + 1.0)).abs() < 1e-6);
    }

    #[test]
    fn too_few_points_rejected() {
        let mut map = FocusMap::new();
        let err = map.calibrate_region("A1", &[(0.0, 0.0, 1.0), (1.0, 0.0, 1.0)]);
        assert!(err.is_err());
    }
}
