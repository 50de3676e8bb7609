use std::time::Duration;

use log::{error, info, warn};

use super::{ProgressReporter, Sleeper};
use crate::application::{AppHandle, DispatchError};
use crate::audio::Sound;
use crate::common::enums::DeviceState;
use crate::config::RetryPolicy;
use crate::lang;
use crate::ota::Assets;
use crate::setting::Settings;

/// Settings key (in the `assets` namespace) of a pending asset download.
pub const DOWNLOAD_URL_KEY: &str = "download_url";

const POWER_SETTLE: Duration = Duration::from_secs(1);
const FAILURE_HOLD: Duration = Duration::from_secs(2);

/// Downloads a pending asset bundle, if any, then applies the partition.
pub fn check_assets_version(
    handle: &AppHandle,
    assets: &mut dyn Assets,
    settings: &mut dyn Settings,
    sleeper: &dyn Sleeper,
    policy: &RetryPolicy,
) -> Result<(), DispatchError> {
    if !assets.partition_valid() {
        warn!("Assets partition is disabled");
        return Ok(());
    }

    let pending = settings
        .get_string(DOWNLOAD_URL_KEY)
        .filter(|url| !url.is_empty());
    if let Some(url) = pending {
        if let Err(e) = settings.erase_key(DOWNLOAD_URL_KEY) {
            warn!("Failed to clear pending asset url: {:?}", e);
        }

        let message = lang::found_new_assets(&url);
        handle.call(move |app| {
            app.alert(lang::LOADING_ASSETS, &message, "cloud_arrow_down", Some(Sound::Upgrade))
        })?;
        sleeper.sleep(Duration::from_secs(policy.asset_settle_secs));

        handle.call(|app| {
            app.set_device_state(DeviceState::Upgrading);
            app.set_power_save_mode(false);
            app.show_system_message(lang::PLEASE_WAIT);
        })?;

        info!("Downloading assets from {}", url);
        let reporter = ProgressReporter::new(handle.clone());
        let result = assets.download(&url, &mut |progress| reporter.report(progress));

        handle.call(|app| app.set_power_save_mode(true))?;
        sleeper.sleep(POWER_SETTLE);

        if let Err(e) = result {
            error!("Failed to download assets: {:?}", e);
            handle.call(|app| {
                app.alert(
                    lang::ERROR,
                    lang::DOWNLOAD_ASSETS_FAILED,
                    "circle_xmark",
                    Some(Sound::Exclamation),
                )
            })?;
            sleeper.sleep(FAILURE_HOLD);
            return Ok(());
        }
    }

    if let Err(e) = assets.apply() {
        error!("Failed to apply assets: {:?}", e);
    }
    handle.call(|app| {
        app.show_system_message("");
        app.set_emotion("microchip_ai");
    })?;
    Ok(())
}
