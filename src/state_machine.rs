//! Generic `StateMachine<S>` substrate (spec §4.3), shared by
//! `LiveController` and `MultiPointController`.

use crate::error::AcqError;
use std::collections::{HashMap, HashSet};
use std::hash::Hash;
use std::sync::Mutex;

/// A controller FSM: explicit transition table, a lock guarding `state`,
/// `transition_to` that rejects non-whitelisted transitions, `force_state`
/// for unrecoverable cleanup paths, and an optional per-state command
/// whitelist.
pub struct StateMachine<S, C> {
    state: Mutex<S>,
    transitions: HashMap<S, HashSet<S>>,
    command_whitelist: HashMap<S, HashSet<C>>,
    name: &'static str,
}

impl<S, C> StateMachine<S, C>
where
    S: Copy + Eq + Hash + std::fmt::Debug,
    C: Copy + Eq + Hash + std::fmt::Debug,
{
    pub fn new(name: &'static str, initial: S, transitions: HashMap<S, HashSet<S>>) -> Self {
        Self {
            state: Mutex::new(initial),
            transitions,
            command_whitelist: HashMap::new(),
            name,
        }
    }

    pub fn with_command_whitelist(mut self, whitelist: HashMap<S, HashSet<C>>) -> Self {
        self.command_whitelist = whitelist;
        self
    }

    pub fn state(&self) -> S {
        *self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Rejects a transition not present in the transition table with
    /// `InvalidStateTransition`. On success, returns the old state so the
    /// caller can publish a `*StateChanged` event (spec §4.3: "after every
    /// transition, a `*StateChanged` event is published" - publishing is
    /// the caller's job since only the caller knows which event type to emit).
    pub fn transition_to(&self, next: S) -> Result<S, AcqError> {
        let mut guard = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let allowed = self
            .transitions
            .get(&*guard)
            .map(|set| set.contains(&next))
            .unwrap_or(false);
        if !allowed {
            return Err(AcqError::InvalidStateTransition {
                from: format!("{:?}", *guard),
                to: format!("{next:?}"),
            });
        }
        let old = *guard;
        *guard = next;
        Ok(old)
    }

    /// Unconditional transition for unrecoverable cleanup paths (spec §4.3).
    /// `reason` is expected to be logged by the caller.
    pub fn force_state(&self, next: S, _reason: &str) -> S {
        let mut guard = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let old = *guard;
        *guard = next;
        old
    }

    /// Whether `command` is accepted in the current state. Returns `true`
    /// (accept) if no whitelist was registered for the current state, per
    /// spec §4.3 "optional per-state command whitelist".
    pub fn accepts(&self, command: C) -> bool {
        let state = self.state();
        match self.command_whitelist.get(&state) {
            Some(allowed) => allowed.contains(&command),
            None => true,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}
