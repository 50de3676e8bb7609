use log::{error, info, warn};

use super::upgrade::{upgrade_firmware, UpgradeOutcome};
use super::Sleeper;
use crate::application::{AppHandle, DispatchError};
use crate::audio::Sound;
use crate::common::enums::DeviceState;
use crate::config::RetryPolicy;
use crate::lang;
use crate::ota::{ActivationError, OtaClient, VersionCheck};

#[derive(Debug, PartialEq, Eq)]
pub enum VersionCheckOutcome {
    /// Running firmware is current and the device is activated.
    Ready(VersionCheck),
    /// Every attempt failed; the device keeps its current firmware.
    GaveUp,
    /// A new image was flashed and the board restarted.
    Rebooting,
}

/// Checks for new firmware and activates the device, retrying with
/// exponential backoff.
///
/// The device sits in `Activating` for the duration. Moving it to `Idle`
/// (for example from the chat button) cuts the current wait short.
pub fn check_new_version(
    handle: &AppHandle,
    ota: &mut dyn OtaClient,
    sleeper: &dyn Sleeper,
    policy: &RetryPolicy,
) -> Result<VersionCheckOutcome, DispatchError> {
    let mut failures = 0;

    loop {
        handle.call(|app| {
            app.set_device_state(DeviceState::Activating);
            app.set_status(lang::CHECKING_NEW_VERSION);
        })?;

        let check = match ota.check_version() {
            Ok(check) => check,
            Err(e) => {
                failures += 1;
                if failures >= policy.version_check_attempts {
                    error!("Too many retries, exiting version check: {:?}", e);
                    return Ok(VersionCheckOutcome::GaveUp);
                }

                let delay = policy.backoff(failures);
                let message = lang::check_new_version_failed(delay.as_secs(), &ota.check_version_url());
                handle.call(move |app| {
                    app.alert(lang::ERROR, &message, "cloud_slash", Some(Sound::Exclamation))
                })?;
                warn!(
                    "Check new version failed, retry in {} seconds ({}/{}): {:?}",
                    delay.as_secs(),
                    failures,
                    policy.version_check_attempts,
                    e
                );

                sleeper.sleep_until_idle(delay, handle.state_watch());
                continue;
            }
        };
        failures = 0;

        if let Some(firmware) = &check.firmware {
            let outcome =
                upgrade_firmware(handle, ota, sleeper, policy, &firmware.url, &firmware.version)?;
            if outcome == UpgradeOutcome::Rebooting {
                return Ok(VersionCheckOutcome::Rebooting);
            }
        }

        if let Err(e) = ota.mark_current_version_valid() {
            warn!("Failed to mark current version valid: {:?}", e);
        }

        if !check.has_activation() {
            info!("Firmware {} is up to date", check.current_version);
            return Ok(VersionCheckOutcome::Ready(check));
        }

        activate(handle, ota, &check, sleeper, policy)?;
    }
}

/// Presents the activation code and polls the server until the user has
/// confirmed it, the attempts run out, or the device is moved to `Idle`.
fn activate(
    handle: &AppHandle,
    ota: &mut dyn OtaClient,
    check: &VersionCheck,
    sleeper: &dyn Sleeper,
    policy: &RetryPolicy,
) -> Result<(), DispatchError> {
    handle.call(|app| app.set_status(lang::ACTIVATION))?;

    if let Some(prompt) = &check.activation {
        if let Some(code) = prompt.code.clone() {
            let message = prompt.message.clone();
            handle.call(move |app| app.show_activation_code(&code, &message))?;
        }
    }

    for attempt in 1..=policy.activation_attempts {
        info!("Activating... {}/{}", attempt, policy.activation_attempts);

        let wait = match ota.activate(check) {
            Ok(()) => {
                info!("Activation succeeded");
                return Ok(());
            }
            Err(ActivationError::Timeout) => policy.activation_backoff(true),
            Err(e) => {
                warn!("{}", e);
                policy.activation_backoff(false)
            }
        };

        if sleeper.sleep_until_idle(wait, handle.state_watch()) {
            info!("Activation cancelled");
            break;
        }
    }
    Ok(())
}
