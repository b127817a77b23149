//! `MultiPointWorker` (spec §4.9): the thread spawned by
//! `MultiPointController::start_acquisition` that actually walks timepoints,
//! regions, FOVs, Z levels and channels, triggering the camera and handing
//! frames to `JobRunner`/`SaveImageJob`.

use crate::autofocus::{AutoFocusController, LaserAutofocusController};
use crate::bus::{Event, EventBus};
use crate::config::AcquisitionConfig;
use crate::error::AcqResult;
use crate::flags::{AtomicCell, ThreadSafeFlag};
use crate::hw::{Camera, FilterWheel, Fluidics, Illumination, Piezo, Stage};
use crate::jobs::{ImageFormat, JobRunner, JobRunnerHandle, SaveCompositeImageJob, SaveImageJob};
use crate::model::{
    AcquisitionParameters, CaptureInfo, ChannelMode, FocusMap, FovCoord, JobImage, PixelBuffer,
    Position, ZRangeMm, ZStackingConfig,
};
use crate::storage::{self, TimepointRecord};
use chrono::Utc;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::warn;

pub struct MultiPointWorker {
    params: Arc<AcquisitionParameters>,
    bus: EventBus,
    config: AcquisitionConfig,
    camera: Arc<dyn Camera>,
    stage: Arc<dyn Stage>,
    piezo: Option<Arc<dyn Piezo>>,
    illumination: Arc<dyn Illumination>,
    filter_wheel: Option<Arc<dyn FilterWheel>>,
    fluidics: Arc<dyn Fluidics>,
    laser_af: Option<Arc<LaserAutofocusController>>,
    contrast_af: Option<Arc<AutoFocusController>>,
    focus_map: FocusMap,
    abort: Arc<AtomicBool>,
    pause: Arc<AtomicBool>,
    #[allow(dead_code)]
    start_position: Position,

    // Trigger/callback handoff (spec §4.9), shared in spirit with
    // `LiveController`'s callback-driven design even though this crate's
    // `Camera::read_frame` blocks inline rather than calling back from a
    // separate hardware thread.
    ready_for_next_trigger: ThreadSafeFlag,
    image_callback_idle: ThreadSafeFlag,
    current_capture_info: AtomicCell<CaptureInfo>,

    /// `(region, fov) -> z_mm` recorded at `z_level == 0` whenever AF is
    /// enabled and `Nt > 1` (spec §4.9); consulted at the start of the next
    /// time point so repeat visits move straight to the focal plane instead
    /// of re-deriving it.
    last_af_z_mm: Mutex<HashMap<(String, usize), f64>>,

    job_runner: JobRunner,
    _job_runner_handle: JobRunnerHandle,
}

impl MultiPointWorker {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        params: Arc<AcquisitionParameters>,
        bus: EventBus,
        config: AcquisitionConfig,
        camera: Arc<dyn Camera>,
        stage: Arc<dyn Stage>,
        piezo: Option<Arc<dyn Piezo>>,
        illumination: Arc<dyn Illumination>,
        filter_wheel: Option<Arc<dyn FilterWheel>>,
        fluidics: Arc<dyn Fluidics>,
        laser_af: Option<Arc<LaserAutofocusController>>,
        contrast_af: Option<Arc<AutoFocusController>>,
        focus_map: FocusMap,
        abort: Arc<AtomicBool>,
        pause: Arc<AtomicBool>,
        start_position: Position,
    ) -> Self {
        let (job_runner, job_runner_handle) = JobRunner::start(config.job_queue_depth);
        Self {
            params,
            bus,
            config,
            camera,
            stage,
            piezo,
            illumination,
            filter_wheel,
            fluidics,
            laser_af,
            contrast_af,
            focus_map,
            abort,
            pause,
            start_position,
            ready_for_next_trigger: ThreadSafeFlag::new(true),
            image_callback_idle: ThreadSafeFlag::new(true),
            current_capture_info: AtomicCell::new(),
            last_af_z_mm: Mutex::new(HashMap::new()),
            job_runner,
            _job_runner_handle: job_runner_handle,
        }
    }

    /// Per-timepoint Z-stack init (spec §4.9 "Initialize Z stack"): for
    /// FROM_TOP, the traversal direction is negative and the stage starts
    /// at `z_range.max`; otherwise it's positive, starting at `z_range.min`.
    fn signed_delta_z_mm(&self) -> f64 {
        match self.params.z_stacking_config {
            ZStackingConfig::FromTop => -self.params.delta_z_mm.abs(),
            _ => self.params.delta_z_mm.abs(),
        }
    }

    fn init_z_stack_for_timepoint(&self) -> AcqResult<()> {
        let z_range = self.params.z_range.unwrap_or(ZRangeMm { min_mm: 0.0, max_mm: 0.0 });
        let target_z_mm = match self.params.z_stacking_config {
            ZStackingConfig::FromTop => z_range.max_mm,
            _ => z_range.min_mm,
        };
        let current = self.stage.position()?;
        self.stage.move_absolute(Position::new(current.x_mm, current.y_mm, target_z_mm))?;
        std::thread::sleep(self.config.stage_settle_delay);
        Ok(())
    }

    fn pixel_size_um(&self) -> f64 {
        let mag_factor = self.params.objective_magnification * (self.params.tube_lens_mm / 180.0);
        if mag_factor <= 0.0 {
            self.params.sensor_pixel_size_um
        } else {
            self.params.sensor_pixel_size_um / mag_factor
        }
    }

    /// Outer run loop: timepoints -> regions -> FOVs -> Z levels -> channels
    /// (spec §4.8/§4.9). Converts every internal failure into
    /// `AcquisitionWorkerFinished { success: false, .. }` rather than
    /// propagating, per spec §7 worker failure semantics.
    pub fn run(self) {
        let params = self.params.clone();
        let total_fovs = params.scan_position_information.total_fov_count() as u64
            * params.nz as u64
            * params.nt as u64;
        let mut fov_counter: u64 = 0;
        let mut success = true;
        let mut error_message: Option<String> = None;

        'timepoints: for time_point in 0..params.nt {
            if self.abort.load(Ordering::SeqCst) {
                break;
            }
            if time_point > 0 {
                if params.delta_t_s > 0.0 {
                    std::thread::sleep(Duration::from_secs_f64(params.delta_t_s));
                }
                if params.use_fluidics {
                    if let Err(err) = self.fluidics.run_protocol(time_point) {
                        warn!(error = %err, time_point, "fluidics protocol failed");
                    }
                }
            }

            let timepoint_dir = storage::timepoint_dir(
                &params.experiment_dir(),
                time_point,
                self.config.timepoint_dir_padding,
            );
            if let Err(err) = std::fs::create_dir_all(&timepoint_dir) {
                success = false;
                error_message = Some(format!("failed to create timepoint directory: {err}"));
                break;
            }

            if let Err(err) = self.init_z_stack_for_timepoint() {
                success = false;
                error_message = Some(format!("failed to initialize z stack: {err}"));
                break;
            }
            let signed_delta_z_mm = self.signed_delta_z_mm();

            let mut records = Vec::new();
            let mut fovs_since_af = 0u32;
            let af_interval = self.config.number_of_fovs_per_af.max(1);

            let mut hard_failure = false;

            'regions: for region_id in &params.scan_position_information.scan_region_names {
                if self.abort.load(Ordering::SeqCst) {
                    break 'regions;
                }
                let Some(fovs) = params.scan_position_information.scan_region_fov_coords_mm.get(region_id) else {
                    continue;
                };
                let region_total = fovs.len() as u32;

                for (fov_index, fov) in fovs.iter().enumerate() {
                    if self.abort.load(Ordering::SeqCst) {
                        break 'regions;
                    }
                    while self.pause.load(Ordering::SeqCst) && !self.abort.load(Ordering::SeqCst) {
                        std::thread::sleep(Duration::from_millis(50));
                    }

                    // spec §4.9 `perform_autofocus`: contrast AF only runs
                    // when there's no stack to smear it across (NZ == 1) or
                    // the stack is centered on the focal plane.
                    let do_contrast_af = params.do_autofocus
                        && fovs_since_af == 0
                        && (params.nz == 1 || params.z_stacking_config == ZStackingConfig::FromCenter);
                    let do_reflection_af = params.do_reflection_autofocus && fovs_since_af == 0;

                    if let Err(err) = self.acquire_fov(
                        region_id,
                        fov_index,
                        fov,
                        time_point,
                        &timepoint_dir,
                        do_contrast_af,
                        do_reflection_af,
                        signed_delta_z_mm,
                        &mut records,
                    ) {
                        warn!(error = %err, region = %region_id, fov = fov_index, "FOV acquisition failed");
                        if self.config.abort_on_failed_jobs {
                            success = false;
                            error_message = Some(err.to_string());
                            hard_failure = true;
                            break 'regions;
                        }
                    }

                    fovs_since_af = (fovs_since_af + 1) % af_interval;
                    fov_counter += 1;
                    self.bus.publish(Event::AcquisitionProgress {
                        experiment_id: params.experiment_id.clone(),
                        completed_fovs: fov_counter,
                        total_fovs,
                    });
                    self.bus.publish(Event::AcquisitionRegionProgress {
                        experiment_id: params.experiment_id.clone(),
                        region_id: region_id.clone(),
                        completed: fov_index as u32 + 1,
                        total: region_total,
                    });
                }
            }

            // Always persist whatever FOVs this time point actually captured
            // (spec §8 S3: a mid-scan abort leaves a partial `coordinates.csv`
            // on disk), even though the run was cut short.
            if let Err(err) = storage::write_timepoint_coordinates_csv(&timepoint_dir, &records) {
                warn!(error = %err, "failed to write per-timepoint coordinates.csv");
            }

            let cut_short = hard_failure || self.abort.load(Ordering::SeqCst);
            if !cut_short {
                match storage::write_done_marker(&timepoint_dir) {
                    Ok(()) => self.bus.publish(Event::DoneMarkerWritten { path: timepoint_dir.join("done") }),
                    Err(err) => warn!(error = %err, "failed to write done marker"),
                }
                self.bus.publish(Event::AcquisitionWorkerProgress {
                    experiment_id: params.experiment_id.clone(),
                    time_point,
                    message: format!("time point {time_point} complete"),
                });
            }

            if cut_short {
                break 'timepoints;
            }
        }

        if let Err(err) = self.job_runner.drain(Duration::from_secs(30)) {
            warn!(error = %err, "job runner did not drain within timeout");
            success = false;
            error_message.get_or_insert_with(|| err.to_string());
        }
        let failures = self.job_runner.poll_outcomes();
        if failures > 0 && self.config.abort_on_failed_jobs {
            success = false;
            error_message.get_or_insert_with(|| format!("{failures} job(s) failed to save"));
        }

        self.bus.publish(Event::AcquisitionWorkerFinished {
            experiment_id: params.experiment_id.clone(),
            success,
            error: error_message,
            final_fov_count: fov_counter,
        });
    }

    /// One FOV across every Z level and selected channel (spec §4.8/§4.9
    /// "13-step" body). Contrast/reflection autofocus, when due, runs once
    /// per FOV before the Z stack; the stack itself is walked with relative
    /// Z moves by `signed_delta_z_mm`, not a precomputed absolute linspace,
    /// so it starts from wherever AF actually left the stage.
    #[allow(clippy::too_many_arguments)]
    fn acquire_fov(
        &self,
        region_id: &str,
        fov_index: usize,
        fov: &FovCoord,
        time_point: u32,
        timepoint_dir: &Path,
        do_contrast_af: bool,
        do_reflection_af: bool,
        signed_delta_z_mm: f64,
        records: &mut Vec<TimepointRecord>,
    ) -> AcqResult<()> {
        let params = &self.params;
        let af_enabled = params.do_autofocus || params.do_reflection_autofocus;

        let current = self.stage.position()?;
        self.stage.move_absolute(Position::new(fov.x_mm, fov.y_mm, current.z_mm))?;
        std::thread::sleep(self.config.stage_settle_delay);

        // spec §4.9 "move to coordinate": a repeat visit with a recorded
        // focal Z from the previous time point goes straight there instead
        // of the coordinate's own (possibly stale) Z.
        let cached_z_mm = if time_point > 0 && af_enabled {
            self.last_af_z_mm.lock().unwrap().get(&(region_id.to_string(), fov_index)).copied()
        } else {
            None
        };

        if let Some(z_mm) = cached_z_mm {
            self.stage.move_absolute(Position::new(fov.x_mm, fov.y_mm, z_mm))?;
            std::thread::sleep(self.config.stage_settle_delay);
        } else if let Some(z_mm) = fov.z_mm {
            self.stage.move_absolute(Position::new(fov.x_mm, fov.y_mm, z_mm))?;
            std::thread::sleep(self.config.stage_settle_delay);
        }

        if do_contrast_af {
            if let Some(af) = &self.contrast_af {
                let hint = Some((&self.focus_map, region_id, fov.x_mm, fov.y_mm));
                af.run(
                    self.config.focus_map_sweep_range_um,
                    self.config.focus_map_step_um,
                    &self.abort,
                    hint,
                );
            }
        }
        if do_reflection_af {
            if let Some(laser_af) = &self.laser_af {
                laser_af.move_to_target(0.0);
            }
        }

        // spec §4.9 `prepare_z_stack`: FROM_CENTER pre-offsets onto the
        // bottom of the stack, always via the stage regardless of piezo use.
        if params.nz > 1 && params.z_stacking_config == ZStackingConfig::FromCenter {
            let offset_um = -signed_delta_z_mm * ((params.nz - 1) as f64 / 2.0).round() * 1000.0;
            self.stage.move_relative_z_um(offset_um)?;
            std::thread::sleep(self.config.stage_settle_delay);
        }

        let mut z_piezo_um = if params.use_piezo {
            match &self.piezo {
                Some(piezo) => piezo.position_um()?,
                None => 0.0,
            }
        } else {
            0.0
        };

        for z_index in 0..params.nz {
            if self.abort.load(Ordering::SeqCst) {
                return Ok(());
            }

            let acquire_position = self.stage.position()?;
            let z_mm = acquire_position.z_mm;

            if z_index == 0 && af_enabled && params.nt > 1 {
                self.last_af_z_mm
                    .lock()
                    .unwrap()
                    .insert((region_id.to_string(), fov_index), z_mm);
            }

            let z_piezo_record = if params.use_piezo { Some(z_piezo_um) } else { None };

            for (config_idx, channel) in params.selected_configurations.clone().iter().enumerate() {
                if self.abort.load(Ordering::SeqCst) {
                    return Ok(());
                }
                self.capture_channel(
                    region_id,
                    fov_index,
                    fov,
                    z_index,
                    z_mm,
                    z_piezo_record,
                    time_point,
                    channel,
                    config_idx,
                    timepoint_dir,
                    records,
                )?;
            }

            if z_index + 1 < params.nz {
                if params.use_piezo {
                    if let Some(piezo) = &self.piezo {
                        z_piezo_um += signed_delta_z_mm * 1000.0;
                        piezo.move_absolute_um(z_piezo_um)?;
                        std::thread::sleep(self.config.piezo_settle_delay);
                    }
                } else {
                    self.stage.move_relative_z_um(signed_delta_z_mm * 1000.0)?;
                    std::thread::sleep(self.config.stage_settle_delay);
                }
            }
        }

        // spec §4.9 `move_z_back_after_stack`: undoes the per-level steps
        // (and, on the stage path, the FROM_CENTER pre-offset); the piezo
        // path only unwinds its own steps, leaving any stage-side
        // FROM_CENTER offset in place for the next FOV, same as the original.
        if params.nz > 1 {
            if params.use_piezo {
                if let Some(piezo) = &self.piezo {
                    z_piezo_um -= signed_delta_z_mm * 1000.0 * (params.nz - 1) as f64;
                    piezo.move_absolute_um(z_piezo_um)?;
                    std::thread::sleep(self.config.piezo_settle_delay);
                }
            } else {
                let rel_z_to_start_um = if params.z_stacking_config == ZStackingConfig::FromCenter {
                    (-signed_delta_z_mm * (params.nz - 1) as f64
                        + signed_delta_z_mm * ((params.nz - 1) as f64 / 2.0).round())
                        * 1000.0
                } else {
                    -signed_delta_z_mm * (params.nz - 1) as f64 * 1000.0
                };
                self.stage.move_relative_z_um(rel_z_to_start_um)?;
                std::thread::sleep(self.config.stage_settle_delay);
            }
        }
        Ok(())
    }

    /// One channel at one (region, FOV, Z): sets exposure/gain/illumination/
    /// filter, applies the channel's own `z_offset_um` (spec §4.8 "per-
    /// channel Z offset"), and captures either a single frame or the
    /// three-exposure RGB composite (spec §6 RGB config naming).
    #[allow(clippy::too_many_arguments)]
    fn capture_channel(
        &self,
        region_id: &str,
        fov_index: usize,
        fov: &FovCoord,
        z_index: u32,
        z_mm: f64,
        z_piezo_um: Option<f64>,
        time_point: u32,
        channel: &ChannelMode,
        config_idx: usize,
        timepoint_dir: &Path,
        records: &mut Vec<TimepointRecord>,
    ) -> AcqResult<()> {
        if let Some(offset_um) = channel.z_offset_um {
            self.stage.move_relative_z_um(offset_um)?;
        }

        self.illumination.set_intensity(channel.illumination_source, channel.illumination_intensity)?;
        self.illumination.set_on(channel.illumination_source, true)?;
        self.camera.set_exposure_time_ms(channel.exposure_time_ms)?;
        self.camera.set_analog_gain(channel.analog_gain)?;
        if let Some(filter_wheel) = &self.filter_wheel {
            filter_wheel.move_to_position(channel.emission_filter_position.max(0) as u32)?;
        }

        let result = if channel.is_rgb() {
            self.capture_rgb_composite(
                region_id, fov_index, fov, z_index, z_mm, z_piezo_um, time_point, channel, config_idx,
                timepoint_dir,
            )
        } else {
            self.capture_one(
                region_id, fov_index, fov, z_index, z_mm, z_piezo_um, time_point, channel, config_idx,
                timepoint_dir,
            )
        };

        let _ = self.illumination.set_on(channel.illumination_source, false);
        if let Some(offset_um) = channel.z_offset_um {
            self.stage.move_relative_z_um(-offset_um)?;
        }

        if result.is_ok() {
            records.push(TimepointRecord {
                region: region_id.to_string(),
                fov: fov_index,
                z_level: z_index,
                x_mm: fov.x_mm,
                y_mm: fov.y_mm,
                z_um: z_mm * 1000.0,
                time: Utc::now(),
                z_piezo_um,
            });
        }
        result
    }

    #[allow(clippy::too_many_arguments)]
    fn capture_one(
        &self,
        region_id: &str,
        fov_index: usize,
        fov: &FovCoord,
        z_index: u32,
        z_mm: f64,
        z_piezo_um: Option<f64>,
        time_point: u32,
        channel: &ChannelMode,
        config_idx: usize,
        timepoint_dir: &Path,
    ) -> AcqResult<()> {
        let info = self.build_capture_info(
            region_id, fov_index, fov, z_index, z_mm, z_piezo_um, time_point, channel, config_idx,
            timepoint_dir,
        );
        self.capture_single(info)?;
        Ok(())
    }

    /// Three-exposure composite for an `_RGB`-suffixed channel config (spec
    /// §6): one sub-capture per band, saved under `{file_id}_{name}_{R,G,B}`,
    /// plus a fourth stacked composite under the un-suffixed channel name
    /// (spec §6, matching the original's `construct_rgb_image`).
    #[allow(clippy::too_many_arguments)]
    fn capture_rgb_composite(
        &self,
        region_id: &str,
        fov_index: usize,
        fov: &FovCoord,
        z_index: u32,
        z_mm: f64,
        z_piezo_um: Option<f64>,
        time_point: u32,
        channel: &ChannelMode,
        config_idx: usize,
        timepoint_dir: &Path,
    ) -> AcqResult<()> {
        let mut bands: Vec<Arc<JobImage>> = Vec::with_capacity(3);
        for band in ["R", "G", "B"] {
            if self.abort.load(Ordering::SeqCst) {
                return Ok(());
            }
            let mut band_channel = channel.clone();
            band_channel.name = format!("{}_{band}", channel.name);
            let info = self.build_capture_info(
                region_id, fov_index, fov, z_index, z_mm, z_piezo_um, time_point, &band_channel, config_idx,
                timepoint_dir,
            );
            if let Some(image) = self.capture_single(info)? {
                bands.push(Arc::new(image));
            }
        }

        if let [red, green, blue] = bands.as_slice() {
            let composite_info = self.build_capture_info(
                region_id, fov_index, fov, z_index, z_mm, z_piezo_um, time_point, channel, config_idx,
                timepoint_dir,
            );
            let job = SaveCompositeImageJob::new(composite_info.clone(), red.clone(), green.clone(), blue.clone());
            if !self.job_runner.dispatch(Box::new(job)) {
                warn!(file_id = %composite_info.file_id, "RGB composite job dispatch failed; queue full");
                if self.config.abort_on_failed_jobs {
                    self.abort.store(true, Ordering::SeqCst);
                }
            }
        } else {
            warn!(region = %region_id, fov = fov_index, "RGB composite skipped: fewer than 3 bands captured");
        }
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn build_capture_info(
        &self,
        region_id: &str,
        fov_index: usize,
        fov: &FovCoord,
        z_index: u32,
        z_mm: f64,
        z_piezo_um: Option<f64>,
        time_point: u32,
        channel: &ChannelMode,
        config_idx: usize,
        timepoint_dir: &Path,
    ) -> CaptureInfo {
        let file_id = CaptureInfo::compute_file_id(region_id, fov_index, z_index, self.config.file_id_padding);
        CaptureInfo {
            position: Position::new(fov.x_mm, fov.y_mm, z_mm),
            z_index,
            capture_time: Utc::now(),
            z_piezo_um,
            configuration: channel.clone(),
            configuration_idx: config_idx,
            region_id: region_id.to_string(),
            fov: fov_index,
            time_point,
            file_id,
            save_directory: timepoint_dir.to_path_buf(),
            total_time_points: self.params.nt,
            total_z_levels: self.params.nz,
            total_channels: self.params.selected_configurations.len() as u32,
            channel_names: self.params.selected_configurations.iter().map(|c| c.name.clone()).collect(),
            physical_size_x_um: self.pixel_size_um(),
            physical_size_y_um: self.pixel_size_um(),
            physical_size_z_um: self.params.delta_z_mm * 1000.0,
            time_increment_s: self.params.delta_t_s,
        }
    }

    /// Trigger + frame-wait + job-dispatch for one frame (spec §4.9): the
    /// `current_capture_info` cell carries identity across the trigger/read
    /// boundary, and the two flags mark the handoff points a
    /// callback-driven camera implementation would signal from its own
    /// thread.
    fn capture_single(&self, info: CaptureInfo) -> AcqResult<Option<JobImage>> {
        self.ready_for_next_trigger.clear();
        self.image_callback_idle.clear();
        self.current_capture_info.set(info.clone());

        if !self.camera.is_ready_for_trigger() {
            self.current_capture_info.get_and_clear();
            self.ready_for_next_trigger.set();
            return Ok(None);
        }

        self.camera.send_trigger()?;
        let frame_timeout =
            Duration::from_millis(info.configuration.exposure_time_ms.max(0.0) as u64) + self.config.frame_wait_margin;
        let frame = self.camera.read_frame(frame_timeout)?;

        let pending_info = self.current_capture_info.get_and_clear();
        self.ready_for_next_trigger.set();

        let Some((mut image, metadata)) = frame else {
            warn!(file_id = %info.file_id, "frame wait timed out; skipping capture");
            self.image_callback_idle.set();
            return Ok(None);
        };
        image.metadata = metadata;
        let captured = image.clone();
        self.dispatch_save_job(pending_info.unwrap_or(info), image);
        self.image_callback_idle.set();
        Ok(Some(captured))
    }

    fn dispatch_save_job(&self, info: CaptureInfo, image: JobImage) {
        let format = format_for(&image.pixels);
        let image = Arc::new(image);
        let job = SaveImageJob::new(info.clone(), image, format);
        if !self.job_runner.dispatch(Box::new(job)) {
            warn!(file_id = %info.file_id, "job dispatch failed; queue full");
            if self.config.abort_on_failed_jobs {
                self.abort.store(true, Ordering::SeqCst);
            }
        }
    }
}

fn format_for(pixels: &PixelBuffer) -> ImageFormat {
    match pixels {
        PixelBuffer::U8(_) => ImageFormat::Png,
        PixelBuffer::U16(_) => ImageFormat::Tiff,
        PixelBuffer::F64(_) => ImageFormat::Zarr,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hw::mock::{MockCamera, MockFluidics, MockIllumination, MockStage};
    use crate::model::{AcquisitionParameters, FovCoord, ScanPositionInformation};

    fn minimal_params(base_path: PathBuf) -> AcquisitionParameters {
        let mut info = ScanPositionInformation::default();
        info.scan_region_names.push("A1".into());
        info.scan_region_coords_mm.insert("A1".into(), Position::new(0.0, 0.0, 0.0));
        info.scan_region_fov_coords_mm.insert("A1".into(), vec![FovCoord::xy(0.0, 0.0)]);

        AcquisitionParameters {
            nx: 1,
            ny: 1,
            nz: 1,
            nt: 1,
            delta_x_mm: 0.9,
            delta_y_mm: 0.9,
            delta_z_mm: 0.001,
            delta_t_s: 0.0,
            do_autofocus: false,
            do_reflection_autofocus: false,
            use_piezo: false,
            use_fluidics: false,
            z_stacking_config: crate::model::ZStackingConfig::FromCenter,
            z_range: Some(ZRangeMm { min_mm: 0.0, max_mm: 0.0 }),
            selected_configurations: vec![ChannelMode::new("BF", 10.0)],
            display_resolution_scaling: 1.0,
            experiment_id: "exp_test".into(),
            base_path,
            acquisition_start_time: chrono::DateTime::parse_from_rfc3339("2026-01-01T00:00:00Z")
                .unwrap()
                .with_timezone(&Utc),
            scan_position_information: info,
            objective_name: "20x".into(),
            objective_magnification: 20.0,
            sensor_pixel_size_um: 5.5,
            tube_lens_mm: 180.0,
        }
    }

    fn worker(dir: PathBuf) -> MultiPointWorker {
        let (bus, _bh) = EventBus::start();
        let params = Arc::new(minimal_params(dir));
        MultiPointWorker::new(
            params,
            bus,
            AcquisitionConfig::default(),
            Arc::new(MockCamera::new(8, 8)),
            Arc::new(MockStage::new(Position::new(0.0, 0.0, 0.0))),
            None,
            Arc::new(MockIllumination::default()),
            None,
            Arc::new(MockFluidics::default()),
            None,
            None,
            FocusMap::new(),
            Arc::new(AtomicBool::new(false)),
            Arc::new(AtomicBool::new(false)),
            Position::new(0.0, 0.0, 0.0),
        )
    }

    #[test]
    fn signed_delta_z_is_negated_for_from_top() {
        let dir = tempfile::tempdir().unwrap();
        let mut params = minimal_params(dir.path().to_path_buf());
        params.delta_z_mm = 0.002;
        params.z_stacking_config = crate::model::ZStackingConfig::FromTop;
        let (bus, _bh) = EventBus::start();
        let w = MultiPointWorker::new(
            Arc::new(params),
            bus,
            AcquisitionConfig::default(),
            Arc::new(MockCamera::new(8, 8)),
            Arc::new(MockStage::new(Position::new(0.0, 0.0, 0.0))),
            None,
            Arc::new(MockIllumination::default()),
            None,
            Arc::new(MockFluidics::default()),
            None,
            None,
            FocusMap::new(),
            Arc::new(AtomicBool::new(false)),
            Arc::new(AtomicBool::new(false)),
            Position::new(0.0, 0.0, 0.0),
        );
        assert_eq!(w.signed_delta_z_mm(), -0.002);
    }

    #[test]
    fn signed_delta_z_stays_positive_for_from_bottom_and_center() {
        let dir = tempfile::tempdir().unwrap();
        let w = worker(dir.path().to_path_buf());
        assert_eq!(w.signed_delta_z_mm(), w.params.delta_z_mm);
    }

    #[test]
    fn run_writes_done_marker_and_coordinates() {
        let dir = tempfile::tempdir().unwrap();
        let w = worker(dir.path().to_path_buf());
        let experiment_dir = dir.path().join("exp_test");
        w.run();

        let timepoint_dir = experiment_dir.join("0000");
        assert!(timepoint_dir.join("done").exists());
        assert!(timepoint_dir.join("coordinates.csv").exists());
    }

    #[test]
    fn abort_before_start_skips_all_fovs() {
        let dir = tempfile::tempdir().unwrap();
        let (bus, _bh) = EventBus::start();
        let params = Arc::new(minimal_params(dir.path().to_path_buf()));
        let abort = Arc::new(AtomicBool::new(true));
        let w = MultiPointWorker::new(
            params,
            bus,
            AcquisitionConfig::default(),
            Arc::new(MockCamera::new(8, 8)),
            Arc::new(MockStage::new(Position::new(0.0, 0.0, 0.0))),
            None,
            Arc::new(MockIllumination::default()),
            None,
            Arc::new(MockFluidics::default()),
            None,
            None,
            FocusMap::new(),
            abort,
            Arc::new(AtomicBool::new(false)),
            Position::new(0.0, 0.0, 0.0),
        );
        w.run();
        assert!(!dir.path().join("exp_test").join("0000").join("done").exists());
    }
}
