use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use anyhow::Result;
use log::{error, info};

use super::{ProgressReporter, Sleeper};
use crate::application::{AppHandle, DispatchError};
use crate::audio::Sound;
use crate::common::enums::DeviceState;
use crate::config::RetryPolicy;
use crate::lang;
use crate::ota::OtaClient;

const UPGRADE_THREAD_STACK_SIZE: usize = 64 * 1024;
const AUDIO_DRAIN: Duration = Duration::from_secs(1);
const REBOOT_NOTICE: Duration = Duration::from_secs(1);

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum UpgradeOutcome {
    Rebooting,
    Failed,
}

/// Downloads and flashes `url`, then reboots.
///
/// On failure the audio pipeline is restarted, the device returns to `Idle`
/// with an error alert, and [`UpgradeOutcome::Failed`] is returned.
pub fn upgrade_firmware(
    handle: &AppHandle,
    ota: &mut dyn OtaClient,
    sleeper: &dyn Sleeper,
    policy: &RetryPolicy,
    url: &str,
    version: &str,
) -> Result<UpgradeOutcome, DispatchError> {
    info!("Starting firmware upgrade from: {}", url);
    handle.call(|app| {
        app.close_audio_channel();
        app.alert(lang::OTA_UPGRADE, lang::UPGRADING, "download", Some(Sound::Upgrade));
    })?;
    sleeper.sleep(Duration::from_secs(policy.upgrade_settle_secs));

    let banner = format!("{}{}", lang::NEW_VERSION, version);
    handle.call(move |app| {
        app.set_device_state(DeviceState::Upgrading);
        app.show_system_message(&banner);
        app.set_power_save_mode(false);
        app.stop_audio();
    })?;
    sleeper.sleep(AUDIO_DRAIN);

    let reporter = ProgressReporter::new(handle.clone());
    if let Err(e) = ota.upgrade(url, &mut |progress| reporter.report(progress)) {
        error!("Firmware upgrade failed, restarting audio service: {:?}", e);
        handle.call(|app| {
            app.restart_audio();
            app.set_power_save_mode(true);
            app.set_device_state(DeviceState::Idle);
            app.alert(lang::ERROR, lang::UPGRADE_FAILED, "circle_xmark", Some(Sound::Exclamation));
        })?;
        sleeper.sleep(Duration::from_secs(policy.upgrade_failure_hold_secs));
        return Ok(UpgradeOutcome::Failed);
    }

    info!("Firmware upgrade successful, rebooting...");
    handle.call(|app| app.show_system_message(lang::UPGRADE_SUCCEEDED))?;
    sleeper.sleep(REBOOT_NOTICE);
    handle.call(|app| app.reboot())?;
    Ok(UpgradeOutcome::Rebooting)
}

/// Runs a user-requested upgrade from `url` on its own thread.
pub fn spawn_manual_upgrade(
    handle: AppHandle,
    ota: Arc<Mutex<Box<dyn OtaClient>>>,
    sleeper: Arc<dyn Sleeper>,
    policy: RetryPolicy,
    url: String,
) -> Result<JoinHandle<Result<UpgradeOutcome, DispatchError>>> {
    let thread = thread::Builder::new()
        .name("ota_upgrade".into())
        .stack_size(UPGRADE_THREAD_STACK_SIZE)
        .spawn(move || {
            let mut ota = ota.lock().unwrap_or_else(PoisonError::into_inner);
            upgrade_firmware(
                &handle,
                &mut **ota,
                sleeper.as_ref(),
                &policy,
                &url,
                lang::MANUAL_UPGRADE,
            )
        })?;
    Ok(thread)
}
