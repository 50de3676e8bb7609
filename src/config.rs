//! Device configuration, loaded from a TOML file or defaulted.

use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::common::enums::AecMode;

/// Attempt ceilings and waits of the lifecycle flows.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Consecutive failed version checks before giving up for this boot.
    pub version_check_attempts: u32,
    /// Wait after the first failed check; doubles after every failure.
    pub initial_backoff_secs: u64,
    pub activation_attempts: u32,
    pub activation_timeout_backoff_secs: u64,
    pub activation_error_backoff_secs: u64,
    /// Pause between the upgrade alert and the download.
    pub upgrade_settle_secs: u64,
    /// How long the upgrade failure alert stays up before the flow returns.
    pub upgrade_failure_hold_secs: u64,
    pub asset_settle_secs: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            version_check_attempts: 10,
            initial_backoff_secs: 10,
            activation_attempts: 10,
            activation_timeout_backoff_secs: 3,
            activation_error_backoff_secs: 10,
            upgrade_settle_secs: 3,
            upgrade_failure_hold_secs: 3,
            asset_settle_secs: 3,
        }
    }
}

impl RetryPolicy {
    /// Wait before the next version check after `failures` consecutive
    /// failures (1-based): 10, 20, 40, ... seconds. Not capped.
    pub fn backoff(&self, failures: u32) -> Duration {
        let secs = 2u64
            .checked_pow(failures.saturating_sub(1))
            .and_then(|factor| factor.checked_mul(self.initial_backoff_secs))
            .unwrap_or(u64::MAX);
        Duration::from_secs(secs)
    }

    pub fn activation_backoff(&self, timed_out: bool) -> Duration {
        if timed_out {
            Duration::from_secs(self.activation_timeout_backoff_secs)
        } else {
            Duration::from_secs(self.activation_error_backoff_secs)
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Used when no mode has been persisted yet.
    pub aec_mode: AecMode,
    /// Send the buffered wake-word audio to the server instead of playing a
    /// local prompt.
    pub send_wake_word_data: bool,
    pub clock_interval_ms: u64,
    pub heap_report_every: u32,
    pub reboot_grace_ms: u64,
    pub stt_denylist: Vec<String>,
    pub retry: RetryPolicy,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            aec_mode: AecMode::Off,
            send_wake_word_data: true,
            clock_interval_ms: 1000,
            heap_report_every: 10,
            reboot_grace_ms: 1000,
            stt_denylist: Vec::new(),
            retry: RetryPolicy::default(),
        }
    }
}

impl AppConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        Self::parse(&content).with_context(|| format!("Invalid config {}", path.display()))
    }

    pub fn parse(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    pub fn clock_interval(&self) -> Duration {
        Duration::from_millis(self.clock_interval_ms)
    }

    pub fn reboot_grace(&self) -> Duration {
        Duration::from_millis(self.reboot_grace_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_from_ten_seconds() {
        let policy = RetryPolicy::default();
        let waits: Vec<u64> = (1..=9).map(|n| policy.backoff(n).as_secs()).collect();
        assert_eq!(waits, vec![10, 20, 40, 80, 160, 320, 640, 1280, 2560]);
    }

    #[test]
    fn backoff_saturates_instead_of_overflowing() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.backoff(200).as_secs(), u64::MAX);
    }

    #[test]
    fn activation_backoff_depends_on_failure_class() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.activation_backoff(true), Duration::from_secs(3));
        assert_eq!(policy.activation_backoff(false), Duration::from_secs(10));
    }

    #[test]
    fn empty_file_yields_defaults() {
        assert_eq!(AppConfig::parse("").expect("parse"), AppConfig::default());
    }

    #[test]
    fn partial_file_overrides_only_named_fields() {
        let config = AppConfig::parse(
            r#"
aec_mode = "device_side"
stt_denylist = ["like and subscribe"]

[retry]
initial_backoff_secs = 1
"#,
        )
        .expect("parse");
        assert_eq!(config.aec_mode, AecMode::DeviceSide);
        assert_eq!(config.stt_denylist, vec!["like and subscribe".to_string()]);
        assert_eq!(config.retry.initial_backoff_secs, 1);
        assert_eq!(config.retry.version_check_attempts, 10);
        assert!(config.send_wake_word_data);
    }

    #[test]
    fn unknown_aec_mode_is_rejected() {
        assert!(AppConfig::parse(r#"aec_mode = "loud""#).is_err());
    }
}
