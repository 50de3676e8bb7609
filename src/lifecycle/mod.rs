//! Long-running boot and maintenance flows: version check, activation,
//! firmware upgrade and asset update.
//!
//! Flows run on their own thread and reach the orchestrator only through
//! [`AppHandle::call`], so the main loop keeps serving events while they
//! wait on the network.

use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::Duration;

use crate::application::AppHandle;
use crate::common::enums::DeviceState;
use crate::common::state_watch::StateWatch;
use crate::lang;
use crate::ota::UpgradeProgress;

pub mod assets;
pub mod upgrade;
pub mod version_check;

pub use assets::check_assets_version;
pub use upgrade::{spawn_manual_upgrade, upgrade_firmware, UpgradeOutcome};
pub use version_check::{check_new_version, VersionCheckOutcome};

/// How flows wait.
pub trait Sleeper: Send + Sync {
    fn sleep(&self, duration: Duration);

    /// Waits up to `duration`, returning early once the device is `Idle`.
    /// Returns `true` if the device is `Idle` when the wait ends.
    fn sleep_until_idle(&self, duration: Duration, watch: &StateWatch) -> bool;
}

pub struct ThreadSleeper;

impl Sleeper for ThreadSleeper {
    fn sleep(&self, duration: Duration) {
        thread::sleep(duration);
    }

    fn sleep_until_idle(&self, duration: Duration, watch: &StateWatch) -> bool {
        watch.wait_for(DeviceState::Idle, duration)
    }
}

/// Forwards download progress to the display, keeping at most one update
/// queued on the dispatcher. A newer report replaces one not yet shown.
pub(crate) struct ProgressReporter {
    handle: AppHandle,
    pending: Arc<Mutex<Option<String>>>,
}

impl ProgressReporter {
    pub(crate) fn new(handle: AppHandle) -> Self {
        Self {
            handle,
            pending: Arc::new(Mutex::new(None)),
        }
    }

    pub(crate) fn report(&self, progress: UpgradeProgress) {
        let line = lang::progress(progress.percent, progress.speed);
        let queued = self
            .pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(line)
            .is_some();
        if queued {
            return;
        }

        let pending = Arc::clone(&self.pending);
        self.handle.schedule(move |app| {
            let line = pending.lock().unwrap_or_else(PoisonError::into_inner).take();
            if let Some(line) = line {
                app.show_system_message(&line);
            }
        });
    }
}
