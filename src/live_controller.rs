//! `LiveController` (spec §4.4): the stream + trigger + callback loop that
//! owns the camera whenever no acquisition is running.

use crate::bus::{Event, EventBus, TriggerMode};
use crate::hw::{Camera, Illumination};
use crate::model::{ChannelMode, IlluminationSource, Resource};
use crate::resource_coordinator::ResourceCoordinator;
use crate::state_machine::StateMachine;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub enum LiveState {
    Stopped,
    Starting,
    Live,
    Stopping,
}

#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub enum LiveCommand {
    Start,
    Stop,
    SetTriggerMode,
    SetTriggerFps,
    SetMicroscopeMode,
    UpdateIllumination,
}

fn transition_table() -> HashMap<LiveState, HashSet<LiveState>> {
    let mut table = HashMap::new();
    table.insert(LiveState::Stopped, HashSet::from([LiveState::Starting]));
    table.insert(LiveState::Starting, HashSet::from([LiveState::Live, LiveState::Stopped]));
    table.insert(LiveState::Live, HashSet::from([LiveState::Stopping]));
    table.insert(LiveState::Stopping, HashSet::from([LiveState::Stopped]));
    table
}

fn command_whitelist() -> HashMap<LiveState, HashSet<LiveCommand>> {
    use LiveCommand::*;
    let any_state = HashSet::from([SetTriggerFps, SetMicroscopeMode, UpdateIllumination]);

    let mut stopped = any_state.clone();
    stopped.insert(Start);
    stopped.insert(SetTriggerMode);

    let mut live = any_state.clone();
    live.insert(Stop);
    live.insert(SetTriggerMode);

    let mut whitelist = HashMap::new();
    whitelist.insert(LiveState::Stopped, stopped);
    whitelist.insert(LiveState::Starting, HashSet::new());
    whitelist.insert(LiveState::Live, live);
    whitelist.insert(LiveState::Stopping, HashSet::new());
    whitelist
}

struct TimerParams {
    mode: TriggerMode,
    fps: f64,
}

pub struct LiveController {
    sm: StateMachine<LiveState, LiveCommand>,
    bus: EventBus,
    resources: Arc<ResourceCoordinator>,
    camera: Arc<dyn Camera>,
    illumination: Arc<dyn Illumination>,
    current_config: Mutex<ChannelMode>,
    timer: Mutex<TimerParams>,
    lease: Mutex<Option<Uuid>>,
    trigger_id: AtomicU64,
    illumination_is_on: AtomicBool,
    timer_shutdown: Arc<AtomicBool>,
}

pub struct LiveControllerHandle {
    _timer_thread: JoinHandle<()>,
}

impl LiveController {
    pub fn start(
        bus: EventBus,
        resources: Arc<ResourceCoordinator>,
        camera: Arc<dyn Camera>,
        illumination: Arc<dyn Illumination>,
        default_config: ChannelMode,
    ) -> (Arc<Self>, LiveControllerHandle) {
        let controller = Arc::new(Self {
            sm: StateMachine::new("LiveController", LiveState::Stopped, transition_table())
                .with_command_whitelist(command_whitelist()),
            bus,
            resources,
            camera,
            illumination,
            current_config: Mutex::new(default_config),
            timer: Mutex::new(TimerParams {
                mode: TriggerMode::Software,
                fps: 1.0,
            }),
            lease: Mutex::new(None),
            trigger_id: AtomicU64::new(0),
            illumination_is_on: AtomicBool::new(false),
            timer_shutdown: Arc::new(AtomicBool::new(false)),
        });

        let timer_controller = controller.clone();
        let shutdown = controller.timer_shutdown.clone();
        let thread = std::thread::Builder::new()
            .name("live-controller-timer".into())
            .spawn(move || {
                let mut skip_count: u64 = 0;
                while !shutdown.load(Ordering::Relaxed) {
                    let (mode, fps) = {
                        let params = timer_controller.timer.lock().unwrap_or_else(|e| e.into_inner());
                        (params.mode, params.fps)
                    };
                    let period = if fps > 0.0 {
                        Duration::from_secs_f64(1.0 / fps)
                    } else {
                        Duration::from_millis(200)
                    };
                    std::thread::sleep(period.min(Duration::from_millis(250)));

                    if timer_controller.sm.state() != LiveState::Live || mode != TriggerMode::Software {
                        continue;
                    }
                    timer_controller.software_trigger_tick(&mut skip_count);
                }
            })
            .expect("failed to spawn live controller timer thread");

        (controller, LiveControllerHandle { _timer_thread: thread })
    }

    pub fn state(&self) -> LiveState {
        self.sm.state()
    }

    fn publish_state_changed(&self, state: LiveState) {
        self.bus.publish(Event::LiveStateChanged {
            state: format!("{state:?}"),
        });
    }

    /// spec §4.4 step sequence executed on each software timer tick.
    fn software_trigger_tick(&self, skip_count: &mut u64) {
        if !self.camera.is_ready_for_trigger() {
            *skip_count += 1;
            if *skip_count % 100 == 0 {
                warn!(skips = *skip_count, "camera not ready; skipped trigger ticks");
            }
            return;
        }
        self.trigger_id.fetch_add(1, Ordering::SeqCst);

        if !self.illumination_is_on.load(Ordering::SeqCst) {
            self.ensure_illumination_on();
        }
        if let Err(err) = self.camera.send_trigger() {
            warn!(error = %err, "live trigger send failed");
        }
    }

    fn ensure_illumination_on(&self) {
        let source = self.current_config.lock().unwrap_or_else(|e| e.into_inner()).illumination_source;
        if self.illumination.set_on(source, true).is_ok() {
            self.illumination_is_on.store(true, Ordering::SeqCst);
        }
    }

    fn illumination_off(&self) {
        let source = self.current_config.lock().unwrap_or_else(|e| e.into_inner()).illumination_source;
        let _ = self.illumination.set_on(source, false);
        self.illumination_is_on.store(false, Ordering::SeqCst);
    }

    /// Called by the camera frame callback on every delivered frame (spec
    /// §4.4 "illumination ownership"): at low fps, illumination is switched
    /// off between frames to avoid continuous excitation.
    pub fn on_new_frame(&self) {
        let fps = self.timer.lock().unwrap_or_else(|e| e.into_inner()).fps;
        if fps <= 5.0 {
            self.illumination_off();
        }
    }

    fn fail_to_stopped(&self, reason: &str) {
        self.sm.force_state(LiveState::Stopped, reason);
        if let Some(lease_id) = self.lease.lock().unwrap_or_else(|e| e.into_inner()).take() {
            self.resources.release(lease_id);
        }
        self.publish_state_changed(LiveState::Stopped);
        self.bus.publish(Event::ControllerError {
            controller: "LiveController".into(),
            message: reason.to_string(),
        });
    }

    pub fn start_live(&self) -> bool {
        if !self.sm.accepts(LiveCommand::Start) {
            warn!(state = ?self.sm.state(), "StartLive invalid for current state");
            return false;
        }
        if self.sm.transition_to(LiveState::Starting).is_err() {
            return false;
        }
        self.publish_state_changed(LiveState::Starting);

        let lease = self.resources.acquire(
            &[Resource::CameraControl, Resource::IlluminationControl],
            "LiveController",
            crate::model::LeaseMode::Live,
            None,
        );
        let Some(lease) = lease else {
            self.fail_to_stopped("resource acquisition failed");
            return false;
        };

        if let Err(err) = self.camera.start_streaming() {
            self.resources.release(lease.lease_id);
            self.fail_to_stopped(&format!("camera start_streaming failed: {err}"));
            return false;
        }

        *self.lease.lock().unwrap_or_else(|e| e.into_inner()) = Some(lease.lease_id);
        self.illumination_is_on.store(false, Ordering::SeqCst);
        let _ = self.sm.transition_to(LiveState::Live);
        self.publish_state_changed(LiveState::Live);
        info!("live started");
        true
    }

    pub fn stop_live(&self) -> bool {
        if !self.sm.accepts(LiveCommand::Stop) {
            warn!(state = ?self.sm.state(), "StopLive invalid for current state");
            return false;
        }
        if self.sm.transition_to(LiveState::Stopping).is_err() {
            return false;
        }
        self.publish_state_changed(LiveState::Stopping);

        self.illumination_off();
        let _ = self.camera.stop_streaming();
        if let Some(lease_id) = self.lease.lock().unwrap_or_else(|e| e.into_inner()).take() {
            self.resources.release(lease_id);
        }

        let _ = self.sm.transition_to(LiveState::Stopped);
        self.publish_state_changed(LiveState::Stopped);
        info!("live stopped");
        true
    }

    pub fn set_trigger_mode(&self, mode: TriggerMode) -> bool {
        if !self.sm.accepts(LiveCommand::SetTriggerMode) {
            return false;
        }
        self.timer.lock().unwrap_or_else(|e| e.into_inner()).mode = mode;
        self.bus.publish(Event::TriggerModeChanged {
            mode: format!("{mode:?}"),
        });
        true
    }

    pub fn set_trigger_fps(&self, fps: f64) -> bool {
        if !self.sm.accepts(LiveCommand::SetTriggerFps) {
            return false;
        }
        self.timer.lock().unwrap_or_else(|e| e.into_inner()).fps = fps;
        self.bus.publish(Event::TriggerFpsChanged { fps });
        true
    }

    pub fn update_illumination(&self, intensity: f64) -> bool {
        if !self.sm.accepts(LiveCommand::UpdateIllumination) {
            return false;
        }
        let source = self.current_config.lock().unwrap_or_else(|e| e.into_inner()).illumination_source;
        let _ = self.illumination.set_intensity(source, intensity);
        true
    }

    /// spec §4.4 "Changing currentConfiguration while live": stop the
    /// timer (implicitly, by flipping state-gated tick below), stop
    /// illumination, apply new exposure/gain/illumination/filter, resume.
    pub fn switch_channel(&self, new_config: ChannelMode) -> bool {
        if !self.sm.accepts(LiveCommand::SetMicroscopeMode) {
            return false;
        }
        let was_live = self.sm.state() == LiveState::Live;
        if was_live {
            self.illumination_off();
        }
        let _ = self.camera.set_exposure_time_ms(new_config.exposure_time_ms);
        let _ = self.camera.set_analog_gain(new_config.analog_gain);
        let _ = self
            .illumination
            .set_intensity(new_config.illumination_source, new_config.illumination_intensity);
        *self.current_config.lock().unwrap_or_else(|e| e.into_inner()) = new_config;
        if was_live {
            self.ensure_illumination_on();
        }
        true
    }

    pub fn current_config(&self) -> ChannelMode {
        self.current_config.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn shutdown(&self) {
        self.timer_shutdown.store(true, Ordering::Relaxed);
    }
}

#[allow(dead_code)]
fn led_matrix_default_illumination_source() -> IlluminationSource {
    IlluminationSource(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hw::mock::{MockCamera, MockIllumination};

    fn controller() -> (Arc<LiveController>, LiveControllerHandle, EventBus) {
        let (bus, _bh) = EventBus::start();
        let (coordinator, _wh) = ResourceCoordinator::start(bus.clone(), Duration::from_secs(3600));
        let camera: Arc<dyn Camera> = Arc::new(MockCamera::new(64, 64));
        let illumination: Arc<dyn Illumination> = Arc::new(MockIllumination::default());
        let (controller, handle) =
            LiveController::start(bus.clone(), coordinator, camera, illumination, ChannelMode::new("BF", 10.0));
        (controller, handle, bus)
    }

    #[test]
    fn start_live_acquires_resources_and_transitions() {
        let (controller, _h, _bus) = controller();
        assert!(controller.start_live());
        assert_eq!(controller.state(), LiveState::Live);
        assert!(controller.stop_live());
        assert_eq!(controller.state(), LiveState::Stopped);
    }

    #[test]
    fn start_live_twice_is_rejected() {
        let (controller, _h, _bus) = controller();
        assert!(controller.start_live());
        assert!(!controller.start_live());
    }

    #[test]
    fn resource_conflict_fails_back_to_stopped() {
        let (bus, _bh) = EventBus::start();
        let (coordinator, _wh) = ResourceCoordinator::start(bus.clone(), Duration::from_secs(3600));
        coordinator
            .acquire(
                &[Resource::CameraControl],
                "someone-else",
                crate::model::LeaseMode::Acquiring,
                None,
            )
            .unwrap();
        let camera: Arc<dyn Camera> = Arc::new(MockCamera::new(64, 64));
        let illumination: Arc<dyn Illumination> = Arc::new(MockIllumination::default());
        let (controller, _h) =
            LiveController::start(bus, coordinator, camera, illumination, ChannelMode::new("BF", 10.0));
        assert!(!controller.start_live());
        assert_eq!(controller.state(), LiveState::Stopped);
    }

    #[test]
    fn low_fps_turns_illumination_off_between_frames() {
        let (controller, _h, _bus) = controller();
        controller.set_trigger_fps(2.0);
        assert!(controller.start_live());
        controller.on_new_frame();
        assert!(!controller.illumination_is_on.load(Ordering::SeqCst));
    }
}
