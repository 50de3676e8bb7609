//! User-visible strings (en-US).

pub const STANDBY: &str = "Standby";
pub const CONNECTING: &str = "Connecting...";
pub const LISTENING: &str = "Listening...";
pub const SPEAKING: &str = "Speaking...";
pub const ERROR: &str = "Error";
pub const CHECKING_NEW_VERSION: &str = "Checking for new version...";
pub const ACTIVATION: &str = "Activation";
pub const LOADING_PROTOCOL: &str = "Logging in...";
pub const OTA_UPGRADE: &str = "OTA Upgrade";
pub const UPGRADING: &str = "System is upgrading...";
pub const UPGRADE_FAILED: &str = "Upgrade failed";
pub const UPGRADE_SUCCEEDED: &str = "Upgrade successful, rebooting...";
pub const NEW_VERSION: &str = "New version ";
pub const VERSION: &str = "Version ";
pub const RTC_MODE_ON: &str = "AEC On";
pub const RTC_MODE_OFF: &str = "AEC Off";
pub const LOADING_ASSETS: &str = "Loading assets...";
pub const PLEASE_WAIT: &str = "Please wait...";
pub const DOWNLOAD_ASSETS_FAILED: &str = "Failed to download assets";
pub const MANUAL_UPGRADE: &str = "(Manual upgrade)";

pub fn check_new_version_failed(retry_secs: u64, url: &str) -> String {
    format!(
        "Check new version failed, retry in {} seconds: {}",
        retry_secs, url
    )
}

pub fn found_new_assets(url: &str) -> String {
    format!("Found new assets: {}", url)
}

pub fn progress(percent: u8, speed: usize) -> String {
    format!("{}% {}KB/s", percent, speed / 1024)
}
