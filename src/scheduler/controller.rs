//! `MultiPointController` (spec §4.8): orchestrates preparation, handoff to
//! `MultiPointWorker`, and the abort/completion lifecycle of one
//! acquisition run. Mirrors `LiveController`'s shape - a `StateMachine` plus
//! a `ResourceCoordinator` lease - generalized from "own the camera stream"
//! to "own a whole multi-region, multi-channel, multi-timepoint scan".

use super::worker::MultiPointWorker;
use crate::autofocus::{AutoFocusController, LaserAutofocusController};
use crate::bus::{Command, Event, EventBus};
use crate::config::AcquisitionConfig;
use crate::error::{AcqError, AcqResult};
use crate::geometry::ScanCoordinates;
use crate::hw::{Camera, FilterWheel, Fluidics, Illumination, Piezo, Stage};
use crate::live_controller::LiveController;
use crate::model::{
    AcquisitionParameters, ChannelConfigurationSet, ChannelMode, FocusMap, FovCoord, Position,
    Resource, ScanPositionInformation, ZRangeMm, ZStackingConfig,
};
use crate::resource_coordinator::ResourceCoordinator;
use crate::state_machine::StateMachine;
use crate::storage;
use chrono::Utc;
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub enum AcqState {
    Idle,
    Preparing,
    Running,
    Aborting,
    Completed,
    Failed,
}

#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub enum AcqCommand {
    Start,
    Stop,
    Pause,
    Resume,
    Configure,
}

fn transition_table() -> HashMap<AcqState, HashSet<AcqState>> {
    use AcqState::*;
    let mut t = HashMap::new();
    t.insert(Idle, HashSet::from([Preparing]));
    t.insert(Preparing, HashSet::from([Running, Failed]));
    t.insert(Running, HashSet::from([Aborting, Completed, Failed]));
    t.insert(Aborting, HashSet::from([Completed, Failed]));
    t.insert(Completed, HashSet::from([Idle]));
    t.insert(Failed, HashSet::from([Idle]));
    t
}

fn command_whitelist() -> HashMap<AcqState, HashSet<AcqCommand>> {
    use AcqCommand::*;
    use AcqState::*;
    let mut w = HashMap::new();
    w.insert(Idle, HashSet::from([Start, Configure]));
    w.insert(Preparing, HashSet::new());
    w.insert(Running, HashSet::from([Stop, Pause, Resume]));
    w.insert(Aborting, HashSet::new());
    w.insert(Completed, HashSet::new());
    w.insert(Failed, HashSet::new());
    w
}

/// Mutable, user-settable configuration for the *next* run, applied via the
/// `Set*` commands (spec §6) and frozen into an `AcquisitionParameters`
/// snapshot at `StartAcquisition` time.
#[derive(Clone, Debug)]
struct PendingSettings {
    nz: u32,
    nt: u32,
    delta_x_mm: f64,
    delta_y_mm: f64,
    delta_z_mm: f64,
    delta_t_s: f64,
    do_autofocus: bool,
    do_reflection_autofocus: bool,
    use_piezo: bool,
    use_fluidics: bool,
    z_stacking_config: ZStackingConfig,
    z_range: Option<ZRangeMm>,
    selected_configurations: Vec<ChannelMode>,
    display_resolution_scaling: f64,
    base_path: PathBuf,
    objective_name: String,
    objective_magnification: f64,
    sensor_pixel_size_um: f64,
    tube_lens_mm: f64,
}

impl Default for PendingSettings {
    fn default() -> Self {
        Self {
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
            z_stacking_config: ZStackingConfig::FromCenter,
            z_range: None,
            selected_configurations: Vec::new(),
            display_resolution_scaling: 1.0,
            base_path: PathBuf::from("."),
            objective_name: "20x".into(),
            objective_magnification: 20.0,
            sensor_pixel_size_um: 5.5,
            tube_lens_mm: 180.0,
        }
    }
}

struct PriorLiveState {
    was_live: bool,
    config: ChannelMode,
}

/// Stage/camera/illumination/piezo/filter/fluidics/autofocus handles needed
/// to prepare and run an acquisition; bundled to keep `MultiPointController::new`'s
/// argument list manageable (the same "bag of capability trait objects"
/// shape as `LiveController::start`).
pub struct AcquisitionHardware {
    pub camera: Arc<dyn Camera>,
    pub stage: Arc<dyn Stage>,
    pub piezo: Option<Arc<dyn Piezo>>,
    pub illumination: Arc<dyn Illumination>,
    pub filter_wheel: Option<Arc<dyn FilterWheel>>,
    pub fluidics: Arc<dyn Fluidics>,
    pub laser_af: Option<Arc<LaserAutofocusController>>,
    pub contrast_af: Option<Arc<AutoFocusController>>,
}

pub struct MultiPointController {
    sm: StateMachine<AcqState, AcqCommand>,
    bus: EventBus,
    resources: Arc<ResourceCoordinator>,
    config: AcquisitionConfig,
    scan_coordinates: Mutex<ScanCoordinates>,
    focus_map: Mutex<FocusMap>,
    channel_configs: Mutex<ChannelConfigurationSet>,
    pending: Mutex<PendingSettings>,
    live_controller: Arc<LiveController>,
    hw: AcquisitionHardware,
    acquisition_lease: Mutex<Option<Uuid>>,
    worker_abort: Arc<AtomicBool>,
    worker_pause: Arc<AtomicBool>,
    current_experiment_id: Mutex<Option<String>>,
    prior_live: Mutex<Option<PriorLiveState>>,
    worker_thread: Mutex<Option<JoinHandle<()>>>,
}

impl MultiPointController {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        bus: EventBus,
        resources: Arc<ResourceCoordinator>,
        config: AcquisitionConfig,
        scan_coordinates: ScanCoordinates,
        channel_configs: ChannelConfigurationSet,
        live_controller: Arc<LiveController>,
        hw: AcquisitionHardware,
    ) -> Arc<Self> {
        let controller = Arc::new(Self {
            sm: StateMachine::new("MultiPointController", AcqState::Idle, transition_table())
                .with_command_whitelist(command_whitelist()),
            bus,
            resources,
            config,
            scan_coordinates: Mutex::new(scan_coordinates),
            focus_map: Mutex::new(FocusMap::new()),
            channel_configs: Mutex::new(channel_configs),
            pending: Mutex::new(PendingSettings::default()),
            live_controller,
            hw,
            acquisition_lease: Mutex::new(None),
            worker_abort: Arc::new(AtomicBool::new(false)),
            worker_pause: Arc::new(AtomicBool::new(false)),
            current_experiment_id: Mutex::new(None),
            prior_live: Mutex::new(None),
            worker_thread: Mutex::new(None),
        });

        let handler_controller = controller.clone();
        controller.bus.subscribe("AcquisitionWorkerFinished", move |event| {
            if let Event::AcquisitionWorkerFinished {
                experiment_id,
                success,
                error,
                final_fov_count,
            } = event
            {
                handler_controller.on_worker_finished(experiment_id.clone(), *success, error.clone(), *final_fov_count);
            }
        });

        controller
    }

    pub fn state(&self) -> AcqState {
        self.sm.state()
    }

    fn pending_mut<R>(&self, f: impl FnOnce(&mut PendingSettings) -> R) -> R {
        f(&mut self.pending.lock().unwrap_or_else(|e| e.into_inner()))
    }

    pub fn set_acquisition_channels(&self, channels: Vec<ChannelMode>) -> bool {
        if !self.sm.accepts(AcqCommand::Configure) {
            return false;
        }
        self.pending_mut(|p| p.selected_configurations = channels);
        true
    }

    pub fn set_acquisition_path(&self, path: PathBuf) -> bool {
        if !self.sm.accepts(AcqCommand::Configure) {
            return false;
        }
        self.pending_mut(|p| p.base_path = path);
        true
    }

    pub fn set_fluidics_rounds(&self, n: u32) -> bool {
        if !self.sm.accepts(AcqCommand::Configure) {
            return false;
        }
        self.pending_mut(|p| p.use_fluidics = n > 0);
        true
    }

    /// Adopts a caller-built `AcquisitionParameters` wholesale (spec §6
    /// `SetAcquisitionParameters`): the explicit, scripting-friendly path
    /// that bypasses incremental `Set*` commands.
    pub fn set_acquisition_parameters(&self, params: Box<AcquisitionParameters>) -> bool {
        if !self.sm.accepts(AcqCommand::Configure) {
            return false;
        }
        self.pending_mut(|p| {
            p.nz = params.nz;
            p.nt = params.nt;
            p.delta_x_mm = params.delta_x_mm;
            p.delta_y_mm = params.delta_y_mm;
            p.delta_z_mm = params.delta_z_mm;
            p.delta_t_s = params.delta_t_s;
            p.do_autofocus = params.do_autofocus;
            p.do_reflection_autofocus = params.do_reflection_autofocus;
            p.use_piezo = params.use_piezo;
            p.use_fluidics = params.use_fluidics;
            p.z_stacking_config = params.z_stacking_config;
            p.z_range = params.z_range;
            p.selected_configurations = params.selected_configurations.clone();
            p.display_resolution_scaling = params.display_resolution_scaling;
            p.base_path = params.base_path.clone();
            p.objective_name = params.objective_name.clone();
            p.objective_magnification = params.objective_magnification;
            p.sensor_pixel_size_um = params.sensor_pixel_size_um;
            p.tube_lens_mm = params.tube_lens_mm;
        });
        true
    }

    pub fn start_new_experiment(&self, experiment_id: String) -> bool {
        if !self.sm.accepts(AcqCommand::Configure) {
            return false;
        }
        *self.current_experiment_id.lock().unwrap_or_else(|e| e.into_inner()) = Some(experiment_id);
        true
    }

    /// `StartAcquisition` (spec §4.8): runs the 13-step preparation sequence
    /// synchronously (on the actor thread, per spec §5) and, on success,
    /// hands off a frozen `AcquisitionParameters` to a spawned
    /// `MultiPointWorker` before returning.
    pub fn start_acquisition(&self, experiment_id: Option<String>, acquire_current_fov: bool) -> bool {
        if !self.sm.accepts(AcqCommand::Start) {
            warn!(state = ?self.sm.state(), "StartAcquisition invalid for current state");
            return false;
        }
        if self.sm.transition_to(AcqState::Preparing).is_err() {
            return false;
        }

        match self.prepare_and_launch(experiment_id, acquire_current_fov) {
            Ok(()) => true,
            Err(err) => {
                warn!(error = %err, "acquisition preparation failed");
                self.sm.force_state(AcqState::Failed, &err.to_string());
                self.bus.publish(Event::ControllerError {
                    controller: "MultiPointController".into(),
                    message: err.to_string(),
                });
                self.sm.force_state(AcqState::Idle, "reset after failed preparation");
                false
            }
        }
    }

    pub fn stop_acquisition(&self) -> bool {
        if !self.sm.accepts(AcqCommand::Stop) {
            warn!(state = ?self.sm.state(), "StopAcquisition invalid for current state");
            return false;
        }
        if self.sm.transition_to(AcqState::Aborting).is_err() {
            return false;
        }
        self.worker_abort.store(true, Ordering::SeqCst);
        if let Some(lease_id) = *self.acquisition_lease.lock().unwrap_or_else(|e| e.into_inner()) {
            self.resources.request_abort(lease_id);
        }
        let experiment_id = self
            .current_experiment_id
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
            .unwrap_or_default();
        self.bus.publish(Event::AcquisitionStateChanged {
            in_progress: false,
            experiment_id,
            is_aborting: true,
        });
        info!("acquisition abort requested");
        true
    }

    pub fn pause_acquisition(&self) -> bool {
        if !self.sm.accepts(AcqCommand::Pause) {
            return false;
        }
        self.worker_pause.store(true, Ordering::SeqCst);
        true
    }

    pub fn resume_acquisition(&self) -> bool {
        if !self.sm.accepts(AcqCommand::Resume) {
            return false;
        }
        self.worker_pause.store(false, Ordering::SeqCst);
        true
    }

    fn prepare_and_launch(&self, experiment_id: Option<String>, acquire_current_fov: bool) -> AcqResult<()> {
        // Step 1: validate settings.
        let pending = self.pending.lock().unwrap_or_else(|e| e.into_inner()).clone();
        if pending.selected_configurations.is_empty() {
            return Err(AcqError::ConfigurationError("no channel configurations selected".into()));
        }
        for channel in &pending.selected_configurations {
            channel.validate()?;
        }
        if pending.do_autofocus && pending.do_reflection_autofocus {
            return Err(AcqError::ConfigurationError(
                "contrast AF and reflection AF are mutually exclusive".into(),
            ));
        }
        if pending.use_piezo && self.hw.piezo.is_none() {
            return Err(AcqError::CapabilityUnavailable("piezo requested but not configured".into()));
        }
        if pending.do_reflection_autofocus && self.hw.laser_af.is_none() {
            return Err(AcqError::CapabilityUnavailable(
                "reflection autofocus requested but laser AF is not configured".into(),
            ));
        }
        if matches!(
            self.resources.global_mode(),
            crate::model::GlobalMode::Acquiring | crate::model::GlobalMode::Aborting
        ) {
            return Err(AcqError::ResourceUnavailable(vec!["ACQUIRING".into()]));
        }

        // Step 2: snapshot start position.
        let start_position = self.hw.stage.position()?;

        // Step 3: Z range defaulting.
        let z_range = pending.z_range.unwrap_or_else(|| default_z_range(&pending, start_position.z_mm));

        // Step 4 + 5: acquire_current_fov handling, scan position snapshot.
        let mut scan_coordinates = self.scan_coordinates.lock().unwrap_or_else(|e| e.into_inner()).clone();
        if acquire_current_fov {
            scan_coordinates.add_template_region(
                "current_fov",
                start_position,
                &[0.0],
                &[0.0],
                &self.config.software_stage_limits_mm,
            );
        }
        scan_coordinates.sort_coordinates();
        let scan_position_information = build_scan_position_information(&scan_coordinates);
        if scan_position_information.total_fov_count() == 0 {
            return Err(AcqError::ConfigurationError("no FOVs to acquire".into()));
        }

        let experiment_id = experiment_id
            .or_else(|| self.current_experiment_id.lock().unwrap_or_else(|e| e.into_inner()).clone())
            .unwrap_or_else(|| Utc::now().format("acq_%Y%m%d_%H%M%S").to_string());
        let acquisition_start_time = Utc::now();

        let params = AcquisitionParameters {
            // Retained for backward-compatible callers that read a flat grid
            // size; the authoritative per-region FOV layout is
            // `scan_position_information`.
            nx: 1,
            ny: 1,
            nz: pending.nz,
            nt: pending.nt,
            delta_x_mm: pending.delta_x_mm,
            delta_y_mm: pending.delta_y_mm,
            delta_z_mm: pending.delta_z_mm,
            delta_t_s: pending.delta_t_s,
            do_autofocus: pending.do_autofocus,
            do_reflection_autofocus: pending.do_reflection_autofocus,
            use_piezo: pending.use_piezo,
            use_fluidics: pending.use_fluidics,
            z_stacking_config: pending.z_stacking_config,
            z_range: Some(z_range),
            selected_configurations: pending.selected_configurations.clone(),
            display_resolution_scaling: pending.display_resolution_scaling,
            experiment_id: experiment_id.clone(),
            base_path: pending.base_path.clone(),
            acquisition_start_time,
            scan_position_information,
            objective_name: pending.objective_name.clone(),
            objective_magnification: pending.objective_magnification,
            sensor_pixel_size_um: pending.sensor_pixel_size_um,
            tube_lens_mm: pending.tube_lens_mm,
        };
        params.validate().map_err(AcqError::ConfigurationError)?;

        // Step 6: write coordinates.csv / acquisition parameters.json / configurations.xml.
        let experiment_dir = params.experiment_dir();
        std::fs::create_dir_all(&experiment_dir)?;
        storage::write_global_coordinates_csv(&experiment_dir.join("coordinates.csv"), &params.scan_position_information)?;
        storage::write_acquisition_parameters_json(&experiment_dir.join("acquisition parameters.json"), &params)?;
        let channel_configs = self.channel_configs.lock().unwrap_or_else(|e| e.into_inner()).clone();
        storage::write_configurations_xml(&experiment_dir.join("configurations.xml"), &channel_configs)?;

        // Step 7: snapshot live/callback state, stop live if running.
        let was_live = self.live_controller.state() == crate::live_controller::LiveState::Live;
        let prior_config = self.live_controller.current_config();
        *self.prior_live.lock().unwrap_or_else(|e| e.into_inner()) = Some(PriorLiveState { was_live, config: prior_config });
        if was_live {
            self.live_controller.stop_live();
        }

        // Step 8: focus map Z overwrite / 3-corner-grid calibration.
        if pending.do_autofocus {
            self.gen_focus_map(&params.scan_position_information, start_position.z_mm)?;
        }

        // Steps 9-10: acquire the exclusive Acquiring lease (camera now owned
        // by the worker thread, not LiveController).
        let mut resources = vec![Resource::CameraControl, Resource::StageControl, Resource::IlluminationControl];
        if pending.use_piezo {
            resources.push(Resource::PiezoControl);
        }
        let lease = self
            .resources
            .acquire_exclusive_acquiring(&resources, "MultiPointController", None)
            .ok_or_else(|| {
                AcqError::ResourceUnavailable(resources.iter().map(|r| r.name().to_string()).collect())
            })?;
        *self.acquisition_lease.lock().unwrap_or_else(|e| e.into_inner()) = Some(lease.lease_id);

        // Steps 11-12: build and spawn the worker.
        self.worker_abort.store(false, Ordering::SeqCst);
        self.worker_pause.store(false, Ordering::SeqCst);
        *self.current_experiment_id.lock().unwrap_or_else(|e| e.into_inner()) = Some(experiment_id.clone());

        let focus_map_snapshot = self.focus_map.lock().unwrap_or_else(|e| e.into_inner()).clone();
        let worker = MultiPointWorker::new(
            Arc::new(params),
            self.bus.clone(),
            self.config.clone(),
            self.hw.camera.clone(),
            self.hw.stage.clone(),
            self.hw.piezo.clone(),
            self.hw.illumination.clone(),
            self.hw.filter_wheel.clone(),
            self.hw.fluidics.clone(),
            self.hw.laser_af.clone(),
            self.hw.contrast_af.clone(),
            focus_map_snapshot,
            self.worker_abort.clone(),
            self.worker_pause.clone(),
            start_position,
        );

        let thread = std::thread::Builder::new()
            .name("multipoint-worker".into())
            .spawn(move || worker.run())
            .map_err(|e| AcqError::FilesystemError(format!("failed to spawn worker thread: {e}")))?;
        *self.worker_thread.lock().unwrap_or_else(|e| e.into_inner()) = Some(thread);

        // Step 13: transition to Running.
        self.sm.transition_to(AcqState::Running)?;
        self.bus.publish(Event::AcquisitionStateChanged {
            in_progress: true,
            experiment_id,
            is_aborting: false,
        });
        Ok(())
    }

    /// `gen_focus_map` (spec §4.8 step 11): calibrates a 3-point plane per
    /// region from its bounding-box corners using the contrast autofocus
    /// controller, skipping regions already present in the focus map.
    fn gen_focus_map(&self, info: &ScanPositionInformation, fallback_z_mm: f64) -> AcqResult<()> {
        let Some(af) = &self.hw.contrast_af else {
            return Ok(());
        };
        for region_id in &info.scan_region_names {
            let mut focus_map = self.focus_map.lock().unwrap_or_else(|e| e.into_inner());
            if focus_map.has_region(region_id) {
                continue;
            }
            drop(focus_map);

            let Some(fovs) = info.scan_region_fov_coords_mm.get(region_id) else {
                continue;
            };
            if fovs.len() < 3 {
                continue;
            }
            let corners = pick_three_corners(fovs);
            let mut points = Vec::with_capacity(3);
            for (x, y) in corners {
                let current = self.hw.stage.position().map(|p| p.z_mm).unwrap_or(fallback_z_mm);
                self.hw.stage.move_absolute(Position::new(x, y, current))?;
                std::thread::sleep(self.config.stage_settle_delay);
                let abort = AtomicBool::new(false);
                af.run(self.config.focus_map_sweep_range_um, self.config.focus_map_step_um, &abort, None);
                let z = self.hw.stage.position()?.z_mm;
                points.push((x, y, z));
            }
            self.focus_map
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .calibrate_region(region_id, &points)?;
        }
        Ok(())
    }

    fn on_worker_finished(&self, experiment_id: String, success: bool, error: Option<String>, final_fov_count: u64) {
        // Stale-event filtering: only act on the finish event for the run we
        // are actually tracking (spec §4.8 "completion handling").
        let current = self.current_experiment_id.lock().unwrap_or_else(|e| e.into_inner()).clone();
        if current.as_deref() != Some(experiment_id.as_str()) {
            return;
        }
        if !matches!(self.sm.state(), AcqState::Running | AcqState::Aborting) {
            return;
        }

        if let Some(lease_id) = self.acquisition_lease.lock().unwrap_or_else(|e| e.into_inner()).take() {
            self.resources.release(lease_id);
        }

        if let Some(prior) = self.prior_live.lock().unwrap_or_else(|e| e.into_inner()).take() {
            self.live_controller.switch_channel(prior.config);
            if prior.was_live {
                self.live_controller.start_live();
            }
        }

        let final_state = if success { AcqState::Completed } else { AcqState::Failed };
        let _ = self.sm.transition_to(final_state);

        // Settle to a terminal, non-aborting state change: the "aborting"
        // phase was already announced by `stop_acquisition`, this is the
        // final word on the run (spec §8 S3).
        self.bus.publish(Event::AcquisitionStateChanged {
            in_progress: false,
            experiment_id,
            is_aborting: false,
        });
        if let Some(message) = error {
            self.bus.publish(Event::ControllerError {
                controller: "MultiPointController".into(),
                message,
            });
        }
        info!(fovs = final_fov_count, success, "acquisition finished");

        self.sm.force_state(AcqState::Idle, "ready for next run");
    }

    /// `CommandIssued` handlers registered with a `BackendActor` (spec §5);
    /// exposed so the binary/wiring layer can bind each `Command` variant to
    /// the matching controller method.
    pub fn handle_command(&self, command: Command) {
        match command {
            Command::StartAcquisition { experiment_id, acquire_current_fov } => {
                self.start_acquisition(experiment_id, acquire_current_fov);
            }
            Command::StopAcquisition => {
                self.stop_acquisition();
            }
            Command::PauseAcquisition => {
                self.pause_acquisition();
            }
            Command::ResumeAcquisition => {
                self.resume_acquisition();
            }
            Command::SetFluidicsRounds(n) => {
                self.set_fluidics_rounds(n);
            }
            Command::SetAcquisitionParameters(params) => {
                self.set_acquisition_parameters(params);
            }
            Command::SetAcquisitionPath(path) => {
                self.set_acquisition_path(path);
            }
            Command::SetAcquisitionChannels(channels) => {
                self.set_acquisition_channels(channels);
            }
            Command::StartNewExperiment(id) => {
                self.start_new_experiment(id);
            }
            _ => {}
        }
    }
}

/// spec §4.8 step 3: the default Z range is always `(start.z, start.z +
/// deltaZ*(NZ-1))` regardless of `z_stacking_config`. Direction and
/// centering are handled by the worker's traversal, not here.
fn default_z_range(pending: &PendingSettings, current_z_mm: f64) -> ZRangeMm {
    let span = pending.delta_z_mm * pending.nz.saturating_sub(1) as f64;
    ZRangeMm {
        min_mm: current_z_mm,
        max_mm: current_z_mm + span,
    }
}

fn build_scan_position_information(coordinates: &ScanCoordinates) -> ScanPositionInformation {
    let mut info = ScanPositionInformation::default();
    for region in coordinates.regions_in_order() {
        info.scan_region_names.push(region.name.clone());
        info.scan_region_coords_mm.insert(region.name.clone(), region.center);
        info.scan_region_fov_coords_mm
            .insert(region.name.clone(), region.fov_centers.clone());
    }
    info
}

/// Picks three FOV centers spanning the region's footprint (first, middle,
/// last in insertion order) as calibration points for `gen_focus_map`.
fn pick_three_corners(fovs: &[FovCoord]) -> [(f64, f64); 3] {
    let first = fovs.first().unwrap();
    let last = fovs.last().unwrap();
    let mid = &fovs[fovs.len() / 2];
    [(first.x_mm, first.y_mm), (mid.x_mm, mid.y_mm), (last.x_mm, last.y_mm)]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::EventBus;
    use crate::hw::mock::{MockCamera, MockFluidics, MockIllumination, MockStage};
    use crate::model::{Position, RegionShape};
    use std::time::Duration;

    fn hardware() -> AcquisitionHardware {
        AcquisitionHardware {
            camera: Arc::new(MockCamera::new(32, 32)),
            stage: Arc::new(MockStage::new(Position::new(0.0, 0.0, 0.0))),
            piezo: None,
            illumination: Arc::new(MockIllumination::default()),
            filter_wheel: None,
            fluidics: Arc::new(MockFluidics::default()),
            laser_af: None,
            contrast_af: None,
        }
    }

    fn controller() -> Arc<MultiPointController> {
        let (bus, _bh) = EventBus::start();
        let (resources, _rh) = ResourceCoordinator::start(bus.clone(), Duration::from_secs(3600));
        let (live, _lh) = LiveController::start(
            bus.clone(),
            resources.clone(),
            Arc::new(MockCamera::new(32, 32)),
            Arc::new(MockIllumination::default()),
            ChannelMode::new("BF", 10.0),
        );

        let mut scan_coordinates = ScanCoordinates::new(false);
        scan_coordinates.add_region(
            "A1",
            Position::new(0.0, 0.0, 0.0),
            1.0,
            0.0,
            RegionShape::Square,
            1.0,
            &crate::config::StageLimitsMm::default(),
        );

        let mut channel_configs = ChannelConfigurationSet::new("20x");
        channel_configs.add(ChannelMode::new("BF", 10.0)).unwrap();

        MultiPointController::new(
            bus,
            resources,
            AcquisitionConfig::default(),
            scan_coordinates,
            channel_configs,
            live,
            hardware(),
        )
    }

    #[test]
    fn start_without_channels_fails_preparation() {
        let controller = controller();
        assert!(!controller.start_acquisition(Some("exp1".into()), false));
        assert_eq!(controller.state(), AcqState::Idle);
    }

    #[test]
    fn start_with_channels_transitions_to_running() {
        let controller = controller();
        controller.set_acquisition_channels(vec![ChannelMode::new("BF", 10.0)]);
        let dir = tempfile::tempdir().unwrap();
        controller.set_acquisition_path(dir.path().to_path_buf());
        assert!(controller.start_acquisition(Some("exp1".into()), false));
        assert_eq!(controller.state(), AcqState::Running);
        controller.worker_abort.store(true, Ordering::SeqCst);
        std::thread::sleep(Duration::from_millis(300));
    }

    #[test]
    fn stop_before_running_is_rejected() {
        let controller = controller();
        assert!(!controller.stop_acquisition());
    }

    #[test]
    fn stop_after_completion_is_idempotent_noop() {
        let controller = controller();
        controller.set_acquisition_channels(vec![ChannelMode::new("BF", 10.0)]);
        let dir = tempfile::tempdir().unwrap();
        controller.set_acquisition_path(dir.path().to_path_buf());
        assert!(controller.start_acquisition(Some("exp1".into()), false));

        let deadline = std::time::Instant::now() + Duration::from_secs(10);
        while std::time::Instant::now() < deadline && controller.state() != AcqState::Idle {
            std::thread::sleep(Duration::from_millis(10));
        }
        assert_eq!(controller.state(), AcqState::Idle);

        assert!(!controller.stop_acquisition());
        assert_eq!(controller.state(), AcqState::Idle);
    }
}
