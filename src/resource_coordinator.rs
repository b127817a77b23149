//! `ResourceCoordinator` (spec §4.2): a global arbiter of shared hardware
//! resources across concurrent subsystems (live view, autofocus,
//! acquisition) via leases. Plain `Mutex`-guarded state, not an async actor,
//! since leases are acquired from worker threads that block on hardware
//! (spec's SPEC_FULL implementation note).

use crate::bus::{Event, EventBus};
use crate::model::{GlobalMode, LeaseMode, Resource, ResourceLease};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{info, warn};
use uuid::Uuid;

type RevokedCallback = Arc<dyn Fn(&ResourceLease, &str) + Send + Sync>;

struct State {
    leases: HashMap<Uuid, ResourceLease>,
    global_mode: GlobalMode,
}

impl State {
    fn derive_global_mode(&self) -> GlobalMode {
        // Derivation order per spec §4.2: Acquiring/Aborting > Autofocusing > Live > Idle.
        if let Some(lease) = self
            .leases
            .values()
            .find(|l| l.mode == LeaseMode::Acquiring)
        {
            return if lease.abort_requested {
                GlobalMode::Aborting
            } else {
                GlobalMode::Acquiring
            };
        }
        if self
            .leases
            .values()
            .any(|l| l.mode == LeaseMode::Autofocusing)
        {
            return GlobalMode::Autofocusing;
        }
        if self.leases.values().any(|l| l.mode == LeaseMode::Live) {
            return GlobalMode::Live;
        }
        GlobalMode::Idle
    }
}

pub struct ResourceCoordinator {
    state: Mutex<State>,
    bus: EventBus,
    revoked_callbacks: Mutex<Vec<RevokedCallback>>,
    watchdog_shutdown: Arc<AtomicBool>,
}

pub struct ResourceCoordinatorHandle {
    _watchdog_thread: JoinHandle<()>,
}

impl ResourceCoordinator {
    pub fn start(bus: EventBus, tick_interval: Duration) -> (Arc<Self>, ResourceCoordinatorHandle) {
        let coordinator = Arc::new(Self {
            state: Mutex::new(State {
                leases: HashMap::new(),
                global_mode: GlobalMode::Idle,
            }),
            bus,
            revoked_callbacks: Mutex::new(Vec::new()),
            watchdog_shutdown: Arc::new(AtomicBool::new(false)),
        });

        let watchdog_coordinator = coordinator.clone();
        let shutdown = coordinator.watchdog_shutdown.clone();
        let thread = std::thread::Builder::new()
            .name("resource-coordinator-watchdog".into())
            .spawn(move || {
                while !shutdown.load(Ordering::Relaxed) {
                    std::thread::sleep(tick_interval);
                    watchdog_coordinator.tick();
                }
            })
            .expect("failed to spawn resource coordinator watchdog thread");

        (
            coordinator,
            ResourceCoordinatorHandle {
                _watchdog_thread: thread,
            },
        )
    }

    pub fn shutdown_watchdog(&self) {
        self.watchdog_shutdown.store(true, Ordering::Relaxed);
    }

    /// Registers a callback invoked after a lease is revoked by the
    /// watchdog (spec §4.2 `on_lease_acquired/released/revoked`).
    pub fn on_revoked<F>(&self, callback: F)
    where
        F: Fn(&ResourceLease, &str) + Send + Sync + 'static,
    {
        self.revoked_callbacks
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(Arc::new(callback));
    }

    /// Atomic, all-or-nothing acquire (spec §4.2). Returns `None` if any
    /// requested resource is currently held by a different lease.
    pub fn acquire(
        &self,
        resources: &[Resource],
        owner: impl Into<String>,
        mode: LeaseMode,
        timeout: Option<Duration>,
    ) -> Option<ResourceLease> {
        let owner = owner.into();
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());

        let conflict = state
            .leases
            .values()
            .any(|l| resources.iter().any(|r| l.holds(*r)));
        if conflict {
            warn!(owner = %owner, ?resources, "resource acquire failed: conflict");
            return None;
        }

        let lease = ResourceLease {
            lease_id: Uuid::new_v4(),
            owner: owner.clone(),
            resources: resources.to_vec(),
            mode,
            acquired_at: Instant::now(),
            timeout,
            abort_requested: false,
        };
        state.leases.insert(lease.lease_id, lease.clone());
        let new_mode = state.derive_global_mode();
        let mode_changed = new_mode != state.global_mode;
        state.global_mode = new_mode;
        drop(state);

        self.bus.publish(Event::LeaseAcquired {
            lease_id: lease.lease_id,
            owner: lease.owner.clone(),
            resources: lease.resources.clone(),
            mode: lease.mode,
        });
        if mode_changed {
            self.bus.publish(Event::GlobalModeChanged { mode: new_mode });
        }
        Some(lease)
    }

    /// At most one `Acquiring` lease may be alive at any instant (spec §3,
    /// §8 property 8). Checked by the caller before `acquire` by scanning
    /// `global_mode()`, but enforced here too for defense in depth.
    pub fn acquire_exclusive_acquiring(
        &self,
        resources: &[Resource],
        owner: impl Into<String>,
        timeout: Option<Duration>,
    ) -> Option<ResourceLease> {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if state
            .leases
            .values()
            .any(|l| l.mode == LeaseMode::Acquiring)
        {
            return None;
        }
        drop(state);
        self.acquire(resources, owner, LeaseMode::Acquiring, timeout)
    }

    pub fn release(&self, lease_id: Uuid) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let Some(lease) = state.leases.remove(&lease_id) else {
            return;
        };
        let new_mode = state.derive_global_mode();
        let mode_changed = new_mode != state.global_mode;
        state.global_mode = new_mode;
        drop(state);

        self.bus.publish(Event::LeaseReleased {
            lease_id,
            owner: lease.owner,
        });
        if mode_changed {
            self.bus.publish(Event::GlobalModeChanged { mode: new_mode });
        }
    }

    /// Marks an `Acquiring` lease as aborting; derived global mode reports
    /// `Aborting` instead of `Acquiring` until the lease is released.
    pub fn request_abort(&self, lease_id: Uuid) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(lease) = state.leases.get_mut(&lease_id) {
            lease.abort_requested = true;
        }
        let new_mode = state.derive_global_mode();
        let mode_changed = new_mode != state.global_mode;
        state.global_mode = new_mode;
        drop(state);
        if mode_changed {
            self.bus.publish(Event::GlobalModeChanged { mode: new_mode });
        }
    }

    pub fn global_mode(&self) -> GlobalMode {
        self.state.lock().unwrap_or_else(|e| e.into_inner()).global_mode
    }

    pub fn is_resource_held(&self, resource: Resource) -> bool {
        self.state
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .leases
            .values()
            .any(|l| l.holds(resource))
    }

    pub fn active_lease_count(&self) -> usize {
        self.state.lock().unwrap_or_else(|e| e.into_inner()).leases.len()
    }

    /// Watchdog tick (spec §4.2): revokes any lease past its timeout.
    /// Revocation is not preemptive for code already executing inside the
    /// owner - it only frees the resource slot and fires `on_revoked`.
    fn tick(&self) {
        let now = Instant::now();
        let expired: Vec<ResourceLease> = {
            let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
            state
                .leases
                .values()
                .filter(|l| l.is_expired(now))
                .cloned()
                .collect()
        };

        for lease in expired {
            {
                let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
                state.leases.remove(&lease.lease_id);
                state.global_mode = state.derive_global_mode();
            }
            let reason = "lease timeout exceeded".to_string();
            info!(owner = %lease.owner, lease_id = %lease.lease_id, "lease revoked by watchdog");
            for callback in self
                .revoked_callbacks
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .iter()
            {
                callback(&lease, &reason);
            }
            self.bus.publish(Event::LeaseRevoked {
                lease_id: lease.lease_id,
                owner: lease.owner,
                reason,
            });
        }
    }

    #[cfg(test)]
    pub(crate) fn force_tick_for_test(&self) {
        self.tick();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conflicting_resources_are_rejected() {
        let (bus, _h) = EventBus::start();
        let (coord, _wh) = ResourceCoordinator::start(bus, Duration::from_secs(3600));
        let lease1 = coord
            .acquire(&[Resource::CameraControl], "live", LeaseMode::Live, None)
            .expect("first acquire succeeds");
        let lease2 = coord.acquire(&[Resource::CameraControl], "autofocus", LeaseMode::Autofocusing, None);
        assert!(lease2.is_none());
        coord.release(lease1.lease_id);
        assert!(coord
            .acquire(&[Resource::CameraControl], "autofocus", LeaseMode::Autofocusing, None)
            .is_some());
    }

    #[test]
    fn global_mode_prioritizes_acquiring_over_live() {
        let (bus, _h) = EventBus::start();
        let (coord, _wh) = ResourceCoordinator::start(bus, Duration::from_secs(3600));
        coord
            .acquire(&[Resource::IlluminationControl], "live", LeaseMode::Live, None)
            .unwrap();
        assert_eq!(coord.global_mode(), GlobalMode::Live);
        coord
            .acquire(&[Resource::CameraControl], "acq", LeaseMode::Acquiring, None)
            .unwrap();
        assert_eq!(coord.global_mode(), GlobalMode::Acquiring);
    }

    #[test]
    fn at_most_one_acquiring_lease() {
        let (bus, _h) = EventBus::start();
        let (coord, _wh) = ResourceCoordinator::start(bus, Duration::from_secs(3600));
        let first = coord.acquire_exclusive_acquiring(&[Resource::CameraControl], "acq1", None);
        assert!(first.is_some());
        let second = coord.acquire_exclusive_acquiring(&[Resource::StageControl], "acq2", None);
        assert!(second.is_none());
    }

    #[test]
    fn expired_lease_is_revoked_on_tick() {
        let (bus, _h) = EventBus::start();
        let (coord, _wh) = ResourceCoordinator::start(bus, Duration::from_secs(3600));
        let lease = coord
            .acquire(
                &[Resource::PiezoControl],
                "af",
                LeaseMode::Autofocusing,
                Some(Duration::from_millis(1)),
            )
            .unwrap();
        std::thread::sleep(Duration::from_millis(5));
        coord.force_tick_for_test();
        assert_eq!(coord.active_lease_count(), 0);
        assert!(!coord.is_resource_held(Resource::PiezoControl));
        let _ = lease;
    }
}
