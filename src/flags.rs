//! Cross-thread mutable state primitives (spec §9 design notes): a boolean
//! event flag with `set/clear/is_set/wait(timeout)`, and a single-value cell
//! with atomic `set/get_and_clear`. Both are implemented with a mutex plus
//! condition variable, exactly as spec §9 prescribes, rather than atomics
//! alone, since waiters need to block without polling.

use std::sync::{Condvar, Mutex};
use std::time::Duration;

/// A boolean event flag: `set()` wakes every waiter, `wait(timeout)` blocks
/// until set or the timeout elapses. Used for `ready_for_next_trigger` and
/// `image_callback_idle` (spec §4.9).
pub struct ThreadSafeFlag {
    state: Mutex<bool>,
    condvar: Condvar,
}

impl ThreadSafeFlag {
    pub fn new(initial: bool) -> Self {
        Self {
            state: Mutex::new(initial),
            condvar: Condvar::new(),
        }
    }

    pub fn set(&self) {
        let mut guard = self.state.lock().unwrap_or_else(|e| e.into_inner());
        *guard = true;
        self.condvar.notify_all();
    }

    pub fn clear(&self) {
        let mut guard = self.state.lock().unwrap_or_else(|e| e.into_inner());
        *guard = false;
    }

    pub fn is_set(&self) -> bool {
        *self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Blocks until the flag is set or `timeout` elapses; returns whether it
    /// was observed set. Does not clear the flag.
    pub fn wait(&self, timeout: Duration) -> bool {
        let guard = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if *guard {
            return true;
        }
        let (guard, result) = self
            .condvar
            .wait_timeout_while(guard, timeout, |set| !*set)
            .unwrap_or_else(|e| e.into_inner());
        let _ = guard;
        !result.timed_out()
    }
}

/// A single-value cell with atomic set / get-and-clear, used for the
/// `current_capture_info` handoff between the worker thread and the camera
/// callback (spec §4.9).
pub struct AtomicCell<T> {
    value: Mutex<Option<T>>,
}

impl<T> AtomicCell<T> {
    pub fn new() -> Self {
        Self {
            value: Mutex::new(None),
        }
    }

    pub fn set(&self, value: T) {
        let mut guard = self.value.lock().unwrap_or_else(|e| e.into_inner());
        *guard = Some(value);
    }

    pub fn get_and_clear(&self) -> Option<T> {
        let mut guard = self.value.lock().unwrap_or_else(|e| e.into_inner());
        guard.take()
    }

    pub fn is_some(&self) -> bool {
        self.value.lock().unwrap_or_else(|e| e.into_inner()).is_some()
    }
}

impl<T> Default for AtomicCell<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn flag_wait_returns_true_once_set() {
        let flag = Arc::new(ThreadSafeFlag::new(false));
        let flag2 = flag.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            flag2.set();
        });
        assert!(flag.wait(Duration::from_secs(1)));
        handle.join().unwrap();
    }

    #[test]
    fn flag_wait_times_out() {
        let flag = ThreadSafeFlag::new(false);
        assert!(!flag.wait(Duration::from_millis(20)));
    }

    #[test]
    fn cell_get_and_clear_is_one_shot() {
        let cell: AtomicCell<u32> = AtomicCell::new();
        cell.set(42);
        assert_eq!(cell.get_and_clear(), Some(42));
        assert_eq!(cell.get_and_clear(), None);
    }
}
