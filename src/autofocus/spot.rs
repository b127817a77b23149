//! Laser-spot image processing (spec §4.6 "Centroid detection"): top-hat
//! background removal, connected-component spot finding, and the
//! normalized cross-correlation used to verify a tracked interface.

use crate::model::{PixelBuffer, SpotDetectionMode};
use ndarray::Array2;

/// Crops a `width`-wide window of `frac` of `full_width`/`full_height`
/// centered on the frame, used as the "center-crop hint" in
/// `initialize_auto` (spec §4.6).
pub fn center_crop(pixels: &[f64], full_width: usize, full_height: usize, crop_width: usize, crop_height: usize) -> (Vec<f64>, usize, usize, usize, usize) {
    let crop_width = crop_width.min(full_width);
    let crop_height = crop_height.min(full_height);
    let x0 = (full_width - crop_width) / 2;
    let y0 = (full_height - crop_height) / 2;
    let mut out = Vec::with_capacity(crop_width * crop_height);
    for y in y0..y0 + crop_height {
        for x in x0..x0 + crop_width {
            out.push(pixels[y * full_width + x]);
        }
    }
    (out, crop_width, crop_height, x0, y0)
}

/// Grayscale morphological top-hat: `image - opening(image, window)`,
/// approximated with a square min-filter followed by a square max-filter
/// (erosion then dilation), isolating bright spots on a slowly varying
/// background (spec §4.6 "background top-hat removal").
pub fn top_hat_background_subtract(pixels: &[f64], width: usize, height: usize, window: usize) -> Vec<f64> {
    if window < 2 {
        return pixels.to_vec();
    }
    let eroded = min_filter(pixels, width, height, window);
    let opened = max_filter(&eroded, width, height, window);
    pixels.iter().zip(opened.iter()).map(|(&p, &o)| (p - o).max(0.0)).collect()
}

fn min_filter(pixels: &[f64], width: usize, height: usize, window: usize) -> Vec<f64> {
    rank_filter(pixels, width, height, window, f64::min, f64::INFINITY)
}

fn max_filter(pixels: &[f64], width: usize, height: usize, window: usize) -> Vec<f64> {
    rank_filter(pixels, width, height, window, f64::max, f64::NEG_INFINITY)
}

fn rank_filter(
    pixels: &[f64],
    width: usize,
    height: usize,
    window: usize,
    combine: fn(f64, f64) -> f64,
    identity: f64,
) -> Vec<f64> {
    let half = (window / 2) as isize;
    let mut out = vec![0.0; pixels.len()];
    for y in 0..height as isize {
        for x in 0..width as isize {
            let mut acc = identity;
            for dy in -half..=half {
                for dx in -half..=half {
                    let ny = (y + dy).clamp(0, height as isize - 1);
                    let nx = (x + dx).clamp(0, width as isize - 1);
                    acc = combine(acc, pixels[(ny as usize) * width + nx as usize]);
                }
            }
            out[(y as usize) * width + x as usize] = acc;
        }
    }
    out
}

/// A connected region found by [`largest_connected_component`].
#[derive(Clone, Debug)]
pub struct Spot {
    pub centroid_x: f64,
    pub centroid_y: f64,
    pub area: u32,
}

/// 4-connected flood-fill over pixels exceeding `threshold`, returning the
/// largest component whose area is within `[min_area, max_area]` and,
/// unless `ignore_row_tolerance`, whose centroid y falls within
/// `row_tolerance` of `expected_row` (spec §4.6 `SINGLE` mode + row
/// constraint parameters).
pub fn largest_connected_component(
    pixels: &[f64],
    width: usize,
    height: usize,
    threshold: f64,
    min_area: u32,
    max_area: u32,
    expected_row: Option<f64>,
    row_tolerance: u32,
    ignore_row_tolerance: bool,
) -> Option<Spot> {
    let mut visited = vec![false; pixels.len()];
    let mut best: Option<Spot> = None;

    for start in 0..pixels.len() {
        if visited[start] || pixels[start] <= threshold {
            continue;
        }
        let mut stack = vec![start];
        visited[start] = true;
        let mut sum_x = 0.0f64;
        let mut sum_y = 0.0f64;
        let mut count = 0u32;

        while let Some(idx) = stack.pop() {
            let x = idx % width;
            let y = idx / width;
            sum_x += x as f64;
            sum_y += y as f64;
            count += 1;

            let neighbors = [
                (x.wrapping_sub(1), y),
                (x + 1, y),
                (x, y.wrapping_sub(1)),
                (x, y + 1),
            ];
            for (nx, ny) in neighbors {
                if nx >= width || ny >= height {
                    continue;
                }
                let nidx = ny * width + nx;
                if !visited[nidx] && pixels[nidx] > threshold {
                    visited[nidx] = true;
                    stack.push(nidx);
                }
            }
        }

        if count < min_area || count > max_area {
            continue;
        }
        let centroid_y = sum_y / count as f64;
        if !ignore_row_tolerance {
            if let Some(expected) = expected_row {
                if (centroid_y - expected).abs() > row_tolerance as f64 {
                    continue;
                }
            }
        }

        let candidate = Spot {
            centroid_x: sum_x / count as f64,
            centroid_y,
            area: count,
        };
        if best.as_ref().map(|b| candidate.area > b.area).unwrap_or(true) {
            best = Some(candidate);
        }
    }

    best
}

/// Finds a spot according to `mode`. `DualPeak`/`RowConstrained` reuse the
/// same connected-component core with different row-tolerance handling
/// (spec §4.6: "plus implementation-defined modes").
#[allow(clippy::too_many_arguments)]
pub fn find_spot(
    pixels: &[f64],
    width: usize,
    height: usize,
    mode: SpotDetectionMode,
    threshold: f64,
    min_area: u32,
    max_area: u32,
    expected_row: Option<f64>,
    row_tolerance: u32,
    ignore_row_tolerance: bool,
) -> Option<Spot> {
    match mode {
        SpotDetectionMode::Single => largest_connected_component(
            pixels, width, height, threshold, min_area, max_area, expected_row, row_tolerance, true,
        ),
        SpotDetectionMode::RowConstrained => largest_connected_component(
            pixels,
            width,
            height,
            threshold,
            min_area,
            max_area,
            expected_row,
            row_tolerance,
            ignore_row_tolerance,
        ),
        SpotDetectionMode::DualPeak => largest_connected_component(
            pixels, width, height, threshold, min_area, max_area, expected_row, row_tolerance, true,
        ),
    }
}

/// Crops a `size`x`size` window centered on `(cx, cy)`, clamped to image
/// bounds, as an `Array2<f64>` ready for normalization/correlation.
pub fn crop_array(pixels: &[f64], width: usize, height: usize, cx: f64, cy: f64, size: u32) -> Array2<f64> {
    let size = size as usize;
    let half = size / 2;
    let x0 = (cx as isize - half as isize).clamp(0, width as isize - 1) as usize;
    let y0 = (cy as isize - half as isize).clamp(0, height as isize - 1) as usize;
    let x1 = (x0 + size).min(width);
    let y1 = (y0 + size).min(height);
    let mut out = Array2::zeros((y1 - y0, x1 - x0));
    for y in y0..y1 {
        for x in x0..x1 {
            out[[y - y0, x - x0]] = pixels[y * width + x];
        }
    }
    out
}

/// Zero-mean, max-normalize a crop before storing/comparing it (spec §4.6
/// `set_reference`: "zero-mean and max-normalize").
pub fn zero_mean_max_normalize(crop: &Array2<f64>) -> Array2<f64> {
    let mean = crop.mean().unwrap_or(0.0);
    let mut zeroed = crop.mapv(|v| v - mean);
    let max_abs = zeroed.iter().fold(0.0f64, |acc, &v| acc.max(v.abs()));
    if max_abs > 1e-12 {
        zeroed.mapv_inplace(|v| v / max_abs);
    }
    zeroed
}

/// Pearson correlation coefficient between two equal-shape crops, returning
/// `0.0` for degenerate (zero-variance) input (spec §4.6 `move_to_target`
/// step 5 "compute Pearson correlation").
pub fn pearson_correlation(a: &Array2<f64>, b: &Array2<f64>) -> f64 {
    if a.shape() != b.shape() || a.is_empty() {
        return 0.0;
    }
    let mean_a = a.mean().unwrap_or(0.0);
    let mean_b = b.mean().unwrap_or(0.0);
    let mut numerator = 0.0;
    let mut denom_a = 0.0;
    let mut denom_b = 0.0;
    for (&va, &vb) in a.iter().zip(b.iter()) {
        let da = va - mean_a;
        let db = vb - mean_b;
        numerator += da * db;
        denom_a += da * da;
        denom_b += db * db;
    }
    if denom_a <= 1e-12 || denom_b <= 1e-12 {
        return 0.0;
    }
    numerator / (denom_a.sqrt() * denom_b.sqrt())
}

pub fn pixel_buffer_as_array(buffer: &PixelBuffer, width: usize, height: usize) -> Array2<f64> {
    let flat = buffer.as_f64();
    Array2::from_shape_vec((height, width), flat.into_owned()).unwrap_or_else(|_| Array2::zeros((height, width)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn synthetic_spot(width: usize, height: usize, cx: usize, cy: usize, radius: usize, value: f64) -> Vec<f64> {
        let mut out = vec![0.0; width * height];
        for y in 0..height {
            for x in 0..width {
                let dx = x as isize - cx as isize;
                let dy = y as isize - cy as isize;
                if (dx * dx + dy * dy) <= (radius * radius) as isize {
                    out[y * width + x] = value;
                }
            }
        }
        out
    }

    #[test]
    fn largest_component_finds_the_spot() {
        let frame = synthetic_spot(64, 64, 32, 20, 4, 200.0);
        let spot = largest_connected_component(&frame, 64, 64, 50.0, 1, 10_000, None, 0, true).unwrap();
        assert!((spot.centroid_x - 32.0).abs() < 1.0);
        assert!((spot.centroid_y - 20.0).abs() < 1.0);
    }

    #[test]
    fn area_bounds_reject_too_small_or_too_large() {
        let frame = synthetic_spot(64, 64, 32, 20, 4, 200.0);
        assert!(largest_connected_component(&frame, 64, 64, 50.0, 1000, 10_000, None, 0, true).is_none());
    }

    #[test]
    fn top_hat_removes_slowly_varying_background() {
        let width = 32;
        let height = 32;
        let mut frame = vec![50.0; width * height];
        for y in 14..18 {
            for x in 14..18 {
                frame[y * width + x] = 250.0;
            }
        }
        let result = top_hat_background_subtract(&frame, width, height, 9);
        let background_pixel = result[2 * width + 2];
        let spot_pixel = result[16 * width + 16];
        assert!(spot_pixel > background_pixel);
    }

    #[test]
    fn identical_crops_correlate_perfectly() {
        let crop = Array2::from_shape_vec((4, 4), (0..16).map(|v| v as f64).collect()).unwrap();
        assert!((pearson_correlation(&crop, &crop) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn uncorrelated_crops_score_low() {
        let a = Array2::from_shape_vec((2, 2), vec![1.0, 2.0, 3.0, 4.0]).unwrap();
        let b = Array2::from_shape_vec((2, 2), vec![4.0, 3.0, 2.0, 1.0]).unwrap();
        assert!(pearson_correlation(&a, &b) < 0.0);
    }
}
