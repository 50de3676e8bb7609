use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use crate::common::enums::DeviceState;

/// Cross-thread view of the device state.
///
/// Only the dispatcher writes it. Producer threads read it under the same lock
/// (so a check-then-act such as the speaking-only audio gate cannot straddle a
/// transition), and lifecycle flows block on it to notice cancellation.
pub struct StateWatch {
    state: Mutex<DeviceState>,
    changed: Condvar,
}

impl StateWatch {
    pub fn new(initial: DeviceState) -> Self {
        Self {
            state: Mutex::new(initial),
            changed: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, DeviceState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn get(&self) -> DeviceState {
        *self.lock()
    }

    /// Publishes `state`, returning the value it replaced.
    pub(crate) fn set(&self, state: DeviceState) -> DeviceState {
        let previous = std::mem::replace(&mut *self.lock(), state);
        self.changed.notify_all();
        previous
    }

    /// Runs `f` while holding the state lock, so no transition can be
    /// published until it returns.
    pub fn with_state<R>(&self, f: impl FnOnce(DeviceState) -> R) -> R {
        let guard = self.lock();
        f(*guard)
    }

    /// Waits up to `timeout` for the state to become `target`.
    ///
    /// Returns `true` as soon as the target state is observed, `false` when
    /// the timeout elapses first.
    pub fn wait_for(&self, target: DeviceState, timeout: Duration) -> bool {
        let guard = self.lock();
        let (guard, _) = self
            .changed
            .wait_timeout_while(guard, timeout, |state| *state != target)
            .unwrap_or_else(PoisonError::into_inner);
        *guard == target
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::thread;

    use super::*;

    #[test]
    fn wait_for_returns_early_on_target_state() {
        let watch = Arc::new(StateWatch::new(DeviceState::Activating));
        let writer = Arc::clone(&watch);
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            writer.set(DeviceState::Idle);
        });

        assert!(watch.wait_for(DeviceState::Idle, Duration::from_secs(5)));
        handle.join().expect("writer panicked");
    }

    #[test]
    fn wait_for_times_out_without_transition() {
        let watch = StateWatch::new(DeviceState::Activating);
        assert!(!watch.wait_for(DeviceState::Idle, Duration::from_millis(10)));
    }

    #[test]
    fn set_reports_previous_state() {
        let watch = StateWatch::new(DeviceState::Starting);
        assert_eq!(watch.set(DeviceState::Idle), DeviceState::Starting);
        assert_eq!(watch.get(), DeviceState::Idle);
        assert!(watch.with_state(|state| state == DeviceState::Idle));
    }
}
