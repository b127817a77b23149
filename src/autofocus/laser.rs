//! `LaserAutofocusController` (spec §4.6): reflection-based autofocus using
//! a laser spot imaged on a dedicated focus camera. Centroid position is
//! linearly related to sample Z via a per-objective `pixel_to_um`
//! calibration; a stored reference crop lets `move_to_target` verify the
//! tracked interface by cross-correlation before accepting a move.

use super::spot::{center_crop, crop_array, find_spot, pearson_correlation, top_hat_background_subtract, zero_mean_max_normalize};
use crate::bus::{Event, EventBus};
use crate::hw::{LaserAfCamera, LaserAfIllumination, Piezo, Stage};
use crate::model::{LaserAFConfig, PixelBuffer};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{info, warn};

pub struct LaserAutofocusController {
    config: Mutex<LaserAFConfig>,
    camera: Arc<dyn LaserAfCamera>,
    laser: Arc<dyn LaserAfIllumination>,
    stage: Arc<dyn Stage>,
    piezo: Option<Arc<dyn Piezo>>,
    use_piezo: bool,
    bus: EventBus,
    frame_wait_timeout: Duration,
    piezo_settle_delay: Duration,
    stage_settle_delay: Duration,
    search_down_first: bool,
    fallback_pixel_to_um: f64,
}

impl LaserAutofocusController {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: LaserAFConfig,
        camera: Arc<dyn LaserAfCamera>,
        laser: Arc<dyn LaserAfIllumination>,
        stage: Arc<dyn Stage>,
        piezo: Option<Arc<dyn Piezo>>,
        use_piezo: bool,
        bus: EventBus,
        frame_wait_timeout: Duration,
        piezo_settle_delay: Duration,
        stage_settle_delay: Duration,
        search_down_first: bool,
        fallback_pixel_to_um: f64,
    ) -> Self {
        Self {
            config: Mutex::new(config),
            camera,
            laser,
            stage,
            piezo,
            use_piezo,
            bus,
            frame_wait_timeout,
            piezo_settle_delay,
            stage_settle_delay,
            search_down_first,
            fallback_pixel_to_um,
        }
    }

    pub fn config_snapshot(&self) -> LaserAFConfig {
        self.config.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Objective/profile change: invalidate without touching hardware
    /// (spec §4.6 "State transitions and persistence").
    pub fn mark_uninitialized(&self) {
        self.config.lock().unwrap_or_else(|e| e.into_inner()).mark_uninitialized();
    }

    fn current_z_um(&self) -> f64 {
        if self.use_piezo {
            if let Some(piezo) = &self.piezo {
                return piezo.position_um().unwrap_or(0.0);
            }
        }
        self.stage.position().map(|p| p.z_mm * 1000.0).unwrap_or(0.0)
    }

    fn move_z_um(&self, z_um: f64) -> bool {
        if self.use_piezo {
            if let Some(piezo) = &self.piezo {
                let moved = piezo.move_absolute_um(z_um).is_ok();
                std::thread::sleep(self.piezo_settle_delay);
                return moved;
            }
        }
        let moved = self.stage.move_relative_z_um(z_um - self.current_z_um()).is_ok();
        std::thread::sleep(self.stage_settle_delay);
        moved
    }

    fn capture_frame_pixels(&self) -> Option<(Vec<f64>, usize, usize)> {
        let image = self.camera.read_frame(self.frame_wait_timeout).ok()??;
        let pixels = image.pixels.as_f64().into_owned();
        Some((pixels, image.width as usize, image.height as usize))
    }

    /// Single-frame centroid detection with optional center-crop hint and
    /// top-hat background removal (spec §4.6 `_get_laser_spot_centroid`
    /// per-frame step), returning full-frame-relative coordinates.
    fn detect_centroid_once(&self, center_crop_hint: bool, expected_row: Option<f64>) -> Option<(f64, f64)> {
        let (frame, width, height) = self.capture_frame_pixels()?;
        let config = self.config_snapshot();

        let (working, w, h, ox, oy) = if center_crop_hint {
            center_crop(&frame, width, height, width / 2, height / 2)
        } else {
            (frame, width, height, 0, 0)
        };

        let processed = top_hat_background_subtract(&working, w, h, config.spot_detection.window as usize);
        let spot = find_spot(
            &processed,
            w,
            h,
            config.spot_detection.spot_detection_mode,
            config.spot_detection.cc_threshold,
            config.spot_detection.cc_min_area,
            config.spot_detection.cc_max_area,
            expected_row,
            config.spot_detection.cc_row_tolerance,
            config.spot_detection.ignore_row_tolerance,
        )?;

        Some((spot.centroid_x + ox as f64, spot.centroid_y + oy as f64))
    }

    /// Averages `laser_af_averaging_n` detections (spec §4.6): repeat, read
    /// frame, detect, average successful detections; `None` if zero succeed.
    fn get_laser_spot_centroid(&self, center_crop_hint: bool, reject_outside_range: Option<f64>) -> Option<(f64, f64)> {
        let config = self.config_snapshot();
        let _ = self.laser.set_on(true);

        let mut sum_x = 0.0;
        let mut sum_y = 0.0;
        let mut count = 0u32;
        for _ in 0..config.laser_af_averaging_n {
            if let Some((x, y)) = self.detect_centroid_once(center_crop_hint, None) {
                if let Some(range) = reject_outside_range {
                    if (x - config.reference.x_reference).abs() * config.pixel_to_um > range {
                        continue;
                    }
                }
                sum_x += x;
                sum_y += y;
                count += 1;
            }
        }
        if count == 0 {
            None
        } else {
            Some((sum_x / count as f64, sum_y / count as f64))
        }
    }

    /// spec §4.6 `initialize_auto`.
    pub fn initialize_auto(&self, calibration_distance_um: f64) -> bool {
        let _ = self.laser.set_on(true);
        let Some((x0_centroid, _)) = self.get_laser_spot_centroid(true, None) else {
            warn!("laser AF initialize_auto: no spot found on full-sensor ROI");
            return false;
        };

        {
            let mut config = self.config.lock().unwrap_or_else(|e| e.into_inner());
            config.reference = crate::model::LaserAFReference::default();
        }

        let original_z = self.current_z_um();
        self.move_z_um(original_z - calibration_distance_um / 2.0);
        let Some((x0, _)) = self.get_laser_spot_centroid(false, None) else {
            self.move_z_um(original_z);
            warn!("laser AF initialize_auto: calibration move (down) lost the spot");
            return false;
        };
        self.move_z_um(original_z + calibration_distance_um / 2.0);
        let Some((x1, _)) = self.get_laser_spot_centroid(false, None) else {
            self.move_z_um(original_z);
            warn!("laser AF initialize_auto: calibration move (up) lost the spot");
            return false;
        };
        self.move_z_um(original_z);

        let pixel_to_um = if (x1 - x0).abs() < 1e-9 {
            warn!("laser AF calibration degenerate (x1 == x0); using fallback pixel_to_um");
            self.fallback_pixel_to_um
        } else {
            calibration_distance_um / (x1 - x0)
        };

        {
            let mut config = self.config.lock().unwrap_or_else(|e| e.into_inner());
            config.pixel_to_um = pixel_to_um;
            config.calibration_timestamp = Some(chrono::Utc::now());
            config.is_initialized = true;
            config.roi.offset_x = (x0_centroid as u32).saturating_sub(config.roi.width / 2);
        }

        self.bus.publish(Event::LaserAfInitialized {
            objective: self.config_snapshot().objective,
            pixel_to_um,
        });
        info!(pixel_to_um, "laser AF initialized");
        true
    }

    /// spec §4.6 `set_reference`.
    pub fn set_reference(&self) -> bool {
        let Some((x, y)) = self.get_laser_spot_centroid(false, None) else {
            warn!("laser AF set_reference: no spot found");
            return false;
        };
        let Some((frame, width, height)) = self.capture_frame_pixels() else {
            return false;
        };
        let crop_size = self.config_snapshot().spot_crop_size;
        let crop = crop_array(&frame, width, height, x, y, crop_size);
        let normalized = zero_mean_max_normalize(&crop);

        {
            let mut config = self.config.lock().unwrap_or_else(|e| e.into_inner());
            config.reference.x_reference = x;
            config.reference.has_reference = true;
            config.reference.reference_crop_width = normalized.ncols() as u32;
            config.reference.reference_crop_height = normalized.nrows() as u32;
            config.reference.reference_crop = Some(PixelBuffer::F64(normalized.iter().copied().collect()));
        }
        let _ = y;
        self.bus.publish(Event::LaserAfReferenceSet {
            objective: self.config_snapshot().objective,
        });
        true
    }

    /// spec §4.6 `measure_displacement`. Returns `NaN` on failure.
    pub fn measure_displacement(&self, search_for_spot: bool) -> f64 {
        let _ = self.laser.set_on(true);
        let config = self.config_snapshot();

        if let Some((x, _)) = self.get_laser_spot_centroid(false, None) {
            let displacement = (x - config.reference.x_reference) * config.pixel_to_um;
            self.bus.publish(Event::LaserAfDisplacementMeasured { displacement_um: displacement });
            return displacement;
        }

        if !search_for_spot {
            return f64::NAN;
        }

        let original_z = self.current_z_um();
        let step = 10.0f64;
        let range = config.laser_af_range_um;
        let clamped_range = if self.use_piezo {
            self.piezo.as_ref().map(|p| {
                let (lo, hi) = p.range_um();
                range.min((hi - lo) / 2.0)
            }).unwrap_or(range)
        } else {
            range
        };

        let steps = (clamped_range / step).floor().max(1.0) as i64;
        let downward: Vec<f64> = (1..=steps).rev().map(|n| original_z - n as f64 * step).collect();
        let upward: Vec<f64> = (1..=steps).map(|n| original_z + n as f64 * step).collect();

        let mut candidates = Vec::with_capacity(downward.len() + upward.len() + 1);
        if self.search_down_first {
            candidates.extend(downward.iter().rev().cloned());
            candidates.push(original_z);
            candidates.extend(upward.iter().cloned());
        } else {
            candidates.extend(upward.iter().rev().cloned());
            candidates.push(original_z);
            candidates.extend(downward.iter().cloned());
        }

        for z in candidates {
            self.move_z_um(z);
            if let Some((x, _)) = self.get_laser_spot_centroid(false, None) {
                let displacement = (x - config.reference.x_reference) * config.pixel_to_um;
                if displacement.abs() <= step + 4.0 {
                    self.bus.publish(Event::LaserAfDisplacementMeasured { displacement_um: displacement });
                    return displacement;
                }
            }
        }

        self.move_z_um(original_z);
        f64::NAN
    }

    /// spec §4.6 `move_to_target`.
    pub fn move_to_target(&self, target_um: f64) -> bool {
        let original_z = self.current_z_um();
        let config = self.config_snapshot();

        let displacement = self.measure_displacement(true);
        if displacement.is_nan() || displacement.abs() > config.laser_af_range_um {
            self.move_z_um(original_z);
            warn!(displacement, "laser AF move_to_target: displacement out of range");
            self.bus.publish(Event::LaserAfMoveCompleted { success: false, final_z_mm: original_z / 1000.0 });
            return false;
        }

        self.move_z_um(self.current_z_um() + target_um - displacement);

        let Some((peak_x, peak_y)) = self.get_laser_spot_centroid(false, None) else {
            self.move_z_um(original_z);
            self.bus.publish(Event::LaserAfMoveCompleted { success: false, final_z_mm: original_z / 1000.0 });
            return false;
        };

        let Some((frame, width, height)) = self.capture_frame_pixels() else {
            self.move_z_um(original_z);
            self.bus.publish(Event::LaserAfMoveCompleted { success: false, final_z_mm: original_z / 1000.0 });
            return false;
        };

        // Peak-centered crop, per DESIGN.md's resolution of the
        // `_verify_spot_alignment` ambiguity (spec §9): crop around the
        // just-detected peak, not around `x_reference`.
        let crop = crop_array(&frame, width, height, peak_x, peak_y, config.spot_crop_size);
        let normalized = zero_mean_max_normalize(&crop);

        let correlation = match &config.reference.reference_crop {
            Some(PixelBuffer::F64(values)) => {
                let reference = ndarray::Array2::from_shape_vec(
                    (config.reference.reference_crop_height as usize, config.reference.reference_crop_width as usize),
                    values.clone(),
                );
                match reference {
                    Ok(reference) if reference.shape() == normalized.shape() => pearson_correlation(&normalized, &reference),
                    _ => 0.0,
                }
            }
            _ => 0.0,
        };

        self.bus.publish(Event::LaserAfCrossCorrelationMeasured { correlation });

        if correlation < config.correlation_threshold {
            self.move_z_um(original_z);
            self.bus.publish(Event::LaserAfMoveCompleted { success: false, final_z_mm: original_z / 1000.0 });
            return false;
        }

        let final_z = self.current_z_um();
        self.bus.publish(Event::LaserAfMoveCompleted { success: true, final_z_mm: final_z / 1000.0 });
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hw::mock::{MockLaserAfCamera, MockLaserAfIllumination, MockPiezo, MockStage};
    use crate::model::Position;

    fn flat_frame_with_spot(width: usize, height: usize, cx: usize, cy: usize) -> Vec<u16> {
        let mut frame = vec![100u16; width * height];
        for y in cy.saturating_sub(3)..=(cy + 3).min(height - 1) {
            for x in cx.saturating_sub(3)..=(cx + 3).min(width - 1) {
                frame[y * width + x] = 4000;
            }
        }
        frame
    }

    fn build_controller(spot_x: Arc<std::sync::atomic::AtomicI64>) -> LaserAutofocusController {
        let (bus, _h) = EventBus::start();
        let width = 128usize;
        let height = 128usize;
        let spot_x_clone = spot_x.clone();
        let camera: Arc<dyn LaserAfCamera> = Arc::new(MockLaserAfCamera::with_frame_generator(
            width as u32,
            height as u32,
            move || flat_frame_with_spot(width, height, spot_x_clone.load(std::sync::atomic::Ordering::SeqCst) as usize, 64),
        ));
        let laser: Arc<dyn LaserAfIllumination> = Arc::new(MockLaserAfIllumination::default());
        let stage: Arc<dyn Stage> = Arc::new(MockStage::new(Position::new(0.0, 0.0, 0.0)));
        let piezo: Arc<dyn Piezo> = Arc::new(MockPiezo::new((-200.0, 200.0)));

        let mut config = LaserAFConfig::new("20x");
        config.spot_detection.cc_threshold = 1000.0;
        config.spot_detection.cc_min_area = 1;
        config.spot_detection.cc_max_area = 1000;
        config.spot_detection.window = 3;

        LaserAutofocusController::new(
            config,
            camera,
            laser,
            stage,
            Some(piezo),
            true,
            bus,
            Duration::from_millis(100),
            Duration::from_millis(1),
            Duration::from_millis(1),
            true,
            0.4,
        )
    }

    #[test]
    fn set_reference_then_zero_displacement_at_same_spot() {
        let spot_x = Arc::new(std::sync::atomic::AtomicI64::new(64));
        let controller = build_controller(spot_x);
        controller.config.lock().unwrap().pixel_to_um = 0.5;
        assert!(controller.set_reference());
        let displacement = controller.measure_displacement(false);
        assert!(displacement.abs() < 2.0);
    }

    #[test]
    fn displacement_scales_with_pixel_shift() {
        let spot_x = Arc::new(std::sync::atomic::AtomicI64::new(64));
        let controller = build_controller(spot_x.clone());
        controller.config.lock().unwrap().pixel_to_um = 0.5;
        assert!(controller.set_reference());
        spot_x.store(74, std::sync::atomic::Ordering::SeqCst);
        let displacement = controller.measure_displacement(false);
        assert!((displacement - 5.0).abs() < 1.5);
    }

    #[test]
    fn cross_correlation_rejects_mismatched_interface() {
        let spot_x = Arc::new(std::sync::atomic::AtomicI64::new(64));
        let controller = build_controller(spot_x.clone());
        assert!(controller.set_reference());
        controller.config.lock().unwrap().correlation_threshold = 2.0; // unreachable threshold forces rejection
        assert!(!controller.move_to_target(0.0));
    }
}
