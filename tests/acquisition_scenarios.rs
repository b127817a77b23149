//! End-to-end scenarios S1, S2, S3, S6 (spec §8), exercised against mock
//! hardware through the public `MultiPointController`/`LiveController`/
//! `ResourceCoordinator` API — the same seam a real instrument binary would
//! drive this crate through.

use acq_core::bus::{Event, EventBus};
use acq_core::config::{AcquisitionConfig, StageLimitsMm};
use acq_core::geometry::ScanCoordinates;
use acq_core::hw::mock::{MockCamera, MockFluidics, MockIllumination, MockStage};
use acq_core::live_controller::LiveController;
use acq_core::model::{ChannelConfigurationSet, ChannelMode, Position, RegionShape};
use acq_core::resource_coordinator::ResourceCoordinator;
use acq_core::scheduler::{AcqState, AcquisitionHardware, MultiPointController};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

fn hardware() -> AcquisitionHardware {
    AcquisitionHardware {
        camera: Arc::new(MockCamera::new(16, 16)),
        stage: Arc::new(MockStage::new(Position::new(0.0, 0.0, 0.0))),
        piezo: None,
        illumination: Arc::new(MockIllumination::default()),
        filter_wheel: None,
        fluidics: Arc::new(MockFluidics::default()),
        laser_af: None,
        contrast_af: None,
    }
}

/// Builds a controller wired to mock hardware with one named region already
/// present (callers further shape its FOV layout via `ScanCoordinates`
/// before construction).
fn build(scan_coordinates: ScanCoordinates, channels: Vec<ChannelMode>) -> (Arc<MultiPointController>, EventBus) {
    let (bus, _bus_handle) = EventBus::start();
    let (resources, _watchdog_handle) = ResourceCoordinator::start(bus.clone(), Duration::from_secs(3600));
    let (live, _live_handle) = LiveController::start(
        bus.clone(),
        resources.clone(),
        Arc::new(MockCamera::new(16, 16)),
        Arc::new(MockIllumination::default()),
        ChannelMode::new("BF", 10.0),
    );

    let mut channel_configs = ChannelConfigurationSet::new("20x");
    for channel in &channels {
        channel_configs.add(channel.clone()).unwrap();
    }

    let controller = MultiPointController::new(
        bus.clone(),
        resources,
        AcquisitionConfig::default(),
        scan_coordinates,
        channel_configs,
        live,
        hardware(),
    );
    controller.set_acquisition_channels(channels);
    (controller, bus)
}

fn wait_for_state(controller: &MultiPointController, target: AcqState, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if controller.state() == target {
            return true;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    false
}

fn csv_row_count(path: &std::path::Path) -> usize {
    let contents = std::fs::read_to_string(path).unwrap();
    contents.lines().count().saturating_sub(1) // minus header
}

/// S1 — minimal capture: one region, one FOV at (0,0), NX=NY=NZ=Nt=1, one
/// `BF` channel (20 ms, intensity 50). Expect exactly one TIFF file, one
/// `done` marker, a single-row `coordinates.csv`.
#[test]
fn s1_minimal_capture() {
    let limits = StageLimitsMm::default();
    let mut scan_coordinates = ScanCoordinates::new(false);
    scan_coordinates.add_flexible_region("A1", Position::new(10.0, 10.0, 0.0), 1, 1, 0.0, 1.0, &limits);

    let (controller, _bus) = build(scan_coordinates, vec![ChannelMode::new("BF", 20.0)]);

    let dir = tempfile::tempdir().unwrap();
    controller.set_acquisition_path(dir.path().to_path_buf());
    assert!(controller.start_acquisition(Some("exp1".into()), false));
    assert!(wait_for_state(&controller, AcqState::Idle, Duration::from_secs(10)));

    let experiment_dir = dir.path().join("exp1");
    let timepoint_dir = experiment_dir.join("0000");
    assert!(timepoint_dir.join("done").exists());

    let coordinates_csv = timepoint_dir.join("coordinates.csv");
    assert_eq!(csv_row_count(&coordinates_csv), 1);

    let tiff = timepoint_dir.join("A1_0000_0000_BF.tiff");
    assert!(tiff.exists(), "expected {tiff:?} to exist");
}

/// S2 — 2x2 FOV square region, NZ=3, one channel, `deltaZ=0.002mm`,
/// `z_range=None` (controller computes it from the current stage Z and the
/// chosen stacking mode). Expect 4 x 3 = 12 files and a 12-row
/// `coordinates.csv`; the last captured frame's Z is `z_start + 2*deltaZ`.
#[test]
fn s2_z_stack_over_four_fovs() {
    let limits = StageLimitsMm::default();
    let mut scan_coordinates = ScanCoordinates::new(false);
    scan_coordinates.add_flexible_region("A1", Position::new(10.0, 10.0, 0.0), 2, 2, 0.0, 1.0, &limits);

    let (controller, _bus) = build(scan_coordinates, vec![ChannelMode::new("BF", 10.0)]);

    let dir = tempfile::tempdir().unwrap();
    controller.set_acquisition_path(dir.path().to_path_buf());

    let mut params = acq_core::model::AcquisitionParameters {
        nx: 1,
        ny: 1,
        nz: 3,
        nt: 1,
        delta_x_mm: 1.0,
        delta_y_mm: 1.0,
        delta_z_mm: 0.002,
        delta_t_s: 0.0,
        do_autofocus: false,
        do_reflection_autofocus: false,
        use_piezo: false,
        use_fluidics: false,
        z_stacking_config: acq_core::model::ZStackingConfig::FromBottom,
        z_range: None,
        selected_configurations: vec![ChannelMode::new("BF", 10.0)],
        display_resolution_scaling: 1.0,
        experiment_id: "exp2".into(),
        base_path: dir.path().to_path_buf(),
        acquisition_start_time: chrono::Utc::now(),
        scan_position_information: acq_core::model::ScanPositionInformation::default(),
        objective_name: "20x".into(),
        objective_magnification: 20.0,
        sensor_pixel_size_um: 5.5,
        tube_lens_mm: 180.0,
    };
    assert!(controller.set_acquisition_parameters(Box::new(params)));

    assert!(controller.start_acquisition(Some("exp2".into()), false));
    assert!(wait_for_state(&controller, AcqState::Idle, Duration::from_secs(15)));

    let timepoint_dir = dir.path().join("exp2").join("0000");
    let coordinates_csv = timepoint_dir.join("coordinates.csv");
    assert_eq!(csv_row_count(&coordinates_csv), 12);

    let contents = std::fs::read_to_string(&coordinates_csv).unwrap();
    let last_row = contents.lines().last().unwrap();
    let z_um: f64 = last_row.split(',').nth(5).unwrap().parse().unwrap();
    assert!((z_um - 4.0).abs() < 1e-6, "expected last z (um) ~ 4.0, got {z_um}");
}

/// S3 — abort mid-scan: 100 FOVs, `StopAcquisition` issued once the 10th
/// has completed. Expect an aborting state transition followed by a final
/// non-in-progress state, a partial `coordinates.csv` with >= 10 rows, and
/// no `done` marker for the interrupted time point.
#[test]
fn s3_abort_mid_scan_leaves_partial_results() {
    let limits = StageLimitsMm::default();
    let mut scan_coordinates = ScanCoordinates::new(false);
    scan_coordinates.add_flexible_region("A1", Position::new(10.0, 10.0, 0.0), 100, 1, 0.0, 0.2, &limits);

    let (controller, bus) = build(scan_coordinates, vec![ChannelMode::new("BF", 5.0)]);

    let dir = tempfile::tempdir().unwrap();
    controller.set_acquisition_path(dir.path().to_path_buf());

    let completed = Arc::new(AtomicU64::new(0));
    let state_changes: Arc<Mutex<Vec<(bool, bool)>>> = Arc::new(Mutex::new(Vec::new()));
    let stop_controller = controller.clone();
    let completed_clone = completed.clone();
    bus.subscribe("AcquisitionProgress", move |event| {
        if let Event::AcquisitionProgress { completed_fovs, .. } = event {
            completed_clone.store(*completed_fovs, Ordering::SeqCst);
            if *completed_fovs >= 10 {
                stop_controller.stop_acquisition();
            }
        }
    });
    let state_changes_clone = state_changes.clone();
    bus.subscribe("AcquisitionStateChanged", move |event| {
        if let Event::AcquisitionStateChanged { in_progress, is_aborting, .. } = event {
            state_changes_clone.lock().unwrap().push((*in_progress, *is_aborting));
        }
    });

    assert!(controller.start_acquisition(Some("exp3".into()), false));
    assert!(wait_for_state(&controller, AcqState::Idle, Duration::from_secs(15)));
    std::thread::sleep(Duration::from_millis(100));

    let timepoint_dir = dir.path().join("exp3").join("0000");
    assert!(!timepoint_dir.join("done").exists());

    let coordinates_csv = timepoint_dir.join("coordinates.csv");
    assert!(csv_row_count(&coordinates_csv) >= 10);
    assert!(completed.load(Ordering::SeqCst) < 100, "scan should have been cut short");

    let changes = state_changes.lock().unwrap().clone();
    assert!(changes.contains(&(false, true)), "expected an aborting state change, got {changes:?}");
    assert_eq!(changes.last().copied(), Some((false, false)));
}

/// S6 — resource contention: with an acquisition running, `StartLive` must
/// be rejected because `CameraControl` is held in `Acquiring` mode; no
/// camera streaming state change should occur and the live controller must
/// stay `Stopped`.
#[test]
fn s6_start_live_rejected_during_running_acquisition() {
    let limits = StageLimitsMm::default();
    let mut scan_coordinates = ScanCoordinates::new(false);
    scan_coordinates.add_flexible_region("A1", Position::new(10.0, 10.0, 0.0), 20, 1, 0.0, 0.2, &limits);

    let (bus, _bus_handle) = EventBus::start();
    let (resources, _watchdog_handle) = ResourceCoordinator::start(bus.clone(), Duration::from_secs(3600));
    let camera: Arc<dyn acq_core::hw::Camera> = Arc::new(MockCamera::new(16, 16));
    let illumination: Arc<dyn acq_core::hw::Illumination> = Arc::new(MockIllumination::default());
    let (live, _live_handle) = LiveController::start(
        bus.clone(),
        resources.clone(),
        camera.clone(),
        illumination.clone(),
        ChannelMode::new("BF", 10.0),
    );

    let mut channel_configs = ChannelConfigurationSet::new("20x");
    channel_configs.add(ChannelMode::new("BF", 5.0)).unwrap();

    let controller = MultiPointController::new(
        bus.clone(),
        resources,
        AcquisitionConfig::default(),
        scan_coordinates,
        channel_configs,
        live.clone(),
        AcquisitionHardware {
            camera,
            stage: Arc::new(MockStage::new(Position::new(0.0, 0.0, 0.0))),
            piezo: None,
            illumination,
            filter_wheel: None,
            fluidics: Arc::new(MockFluidics::default()),
            laser_af: None,
            contrast_af: None,
        },
    );
    controller.set_acquisition_channels(vec![ChannelMode::new("BF", 5.0)]);

    let dir = tempfile::tempdir().unwrap();
    controller.set_acquisition_path(dir.path().to_path_buf());
    assert!(controller.start_acquisition(Some("exp6".into()), false));
    assert_eq!(controller.state(), AcqState::Running);

    assert!(!live.start_live(), "StartLive must be rejected while an acquisition holds CameraControl");
    assert_eq!(live.state(), acq_core::live_controller::LiveState::Stopped);

    controller.stop_acquisition();
    wait_for_state(&controller, AcqState::Idle, Duration::from_secs(15));
}
