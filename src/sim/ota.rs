use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use anyhow::{anyhow, Result};
use log::info;
use serde_json::Value;

use super::{Call, Journal};
use crate::common::enums::DeviceState;
use crate::common::state_watch::StateWatch;
use crate::lifecycle::Sleeper;
use crate::ota::{ActivationError, Assets, OtaClient, UpgradeProgress, VersionCheck};

const CHECK_URL: &str = "https://ota.sim.local/xiaozhi/ota/";

/// Version server that replays a script. Once the script runs out every
/// check succeeds with nothing to do.
pub struct SimOta {
    journal: Journal,
    current_version: String,
    checks: VecDeque<Result<VersionCheck, String>>,
    activations: VecDeque<Result<(), ActivationError>>,
    upgrade_error: Option<String>,
}

impl SimOta {
    pub fn new(journal: Journal, current_version: &str) -> Self {
        Self {
            journal,
            current_version: current_version.to_string(),
            checks: VecDeque::new(),
            activations: VecDeque::new(),
            upgrade_error: None,
        }
    }

    pub fn failing_checks(mut self, count: usize) -> Self {
        for attempt in 1..=count {
            self.checks
                .push_back(Err(format!("connection refused (attempt {})", attempt)));
        }
        self
    }

    pub fn then_check(mut self, check: VersionCheck) -> Self {
        self.checks.push_back(Ok(check));
        self
    }

    /// Queues a check parsed from a raw server reply, the way a real client
    /// would see it.
    pub fn then_response(mut self, response: &Value) -> Self {
        let check = VersionCheck::from_response(&self.current_version, response)
            .map_err(|e| format!("bad version reply: {}", e));
        self.checks.push_back(check);
        self
    }

    pub fn activation_results(
        mut self,
        results: impl IntoIterator<Item = Result<(), ActivationError>>,
    ) -> Self {
        self.activations.extend(results);
        self
    }

    pub fn upgrade_fails(mut self, message: &str) -> Self {
        self.upgrade_error = Some(message.to_string());
        self
    }

    fn up_to_date(&self) -> VersionCheck {
        VersionCheck {
            current_version: self.current_version.clone(),
            firmware: None,
            activation: None,
            has_server_time: true,
        }
    }
}

impl OtaClient for SimOta {
    fn current_version(&self) -> String {
        self.current_version.clone()
    }

    fn check_version_url(&self) -> String {
        CHECK_URL.to_string()
    }

    fn check_version(&mut self) -> Result<VersionCheck> {
        self.journal.record(Call::CheckVersion);
        match self.checks.pop_front() {
            Some(Ok(check)) => Ok(check),
            Some(Err(message)) => Err(anyhow!(message)),
            None => Ok(self.up_to_date()),
        }
    }

    fn mark_current_version_valid(&mut self) -> Result<()> {
        self.journal.record(Call::MarkValid);
        Ok(())
    }

    fn activate(&mut self, _check: &VersionCheck) -> Result<(), ActivationError> {
        self.journal.record(Call::Activate);
        self.activations.pop_front().unwrap_or(Ok(()))
    }

    fn upgrade(&mut self, url: &str, progress: &mut dyn FnMut(UpgradeProgress)) -> Result<()> {
        self.journal.record(Call::Upgrade(url.to_string()));
        for percent in [25, 50, 75, 100] {
            progress(UpgradeProgress {
                percent,
                speed: 128 * 1024,
            });
            if percent == 50 {
                if let Some(message) = &self.upgrade_error {
                    return Err(anyhow!(message.clone()));
                }
            }
        }
        info!("Flashed {}", url);
        Ok(())
    }
}

pub struct SimAssets {
    journal: Journal,
    valid: bool,
    fail_download: bool,
}

impl SimAssets {
    pub fn new(journal: Journal) -> Self {
        Self {
            journal,
            valid: true,
            fail_download: false,
        }
    }

    pub fn invalid(mut self) -> Self {
        self.valid = false;
        self
    }

    pub fn failing_download(mut self) -> Self {
        self.fail_download = true;
        self
    }
}

impl Assets for SimAssets {
    fn partition_valid(&self) -> bool {
        self.valid
    }

    fn download(&mut self, url: &str, progress: &mut dyn FnMut(UpgradeProgress)) -> Result<()> {
        self.journal.record(Call::AssetsDownload(url.to_string()));
        if self.fail_download {
            return Err(anyhow!("download interrupted"));
        }
        progress(UpgradeProgress {
            percent: 100,
            speed: 256 * 1024,
        });
        Ok(())
    }

    fn apply(&mut self) -> Result<()> {
        self.journal.record(Call::AssetsApply);
        Ok(())
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Wait {
    Sleep(Duration),
    UntilIdle(Duration),
}

/// Returns immediately and remembers what it was asked to wait for.
#[derive(Clone, Default)]
pub struct InstantSleeper {
    waits: Arc<Mutex<Vec<Wait>>>,
}

impl InstantSleeper {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn waits(&self) -> Vec<Wait> {
        self.waits
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Durations of the interruptible waits only, in seconds.
    pub fn backoff_secs(&self) -> Vec<u64> {
        self.waits()
            .into_iter()
            .filter_map(|wait| match wait {
                Wait::UntilIdle(duration) => Some(duration.as_secs()),
                Wait::Sleep(_) => None,
            })
            .collect()
    }

    fn record(&self, wait: Wait) {
        self.waits
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(wait);
    }
}

impl Sleeper for InstantSleeper {
    fn sleep(&self, duration: Duration) {
        self.record(Wait::Sleep(duration));
    }

    fn sleep_until_idle(&self, duration: Duration, watch: &StateWatch) -> bool {
        self.record(Wait::UntilIdle(duration));
        watch.get() == DeviceState::Idle
    }
}
