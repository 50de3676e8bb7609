//! Firmware/version service seam and the data one version check yields.

use anyhow::{anyhow, Result};
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

/// Firmware newer than the running image, offered by the server.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct FirmwareCandidate {
    pub version: String,
    pub url: String,
}

/// Pending activation the user has to confirm out of band.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
pub struct ActivationPrompt {
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub challenge: Option<String>,
}

/// Result of one successful version check. Lives only for the boot sequence.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct VersionCheck {
    pub current_version: String,
    pub firmware: Option<FirmwareCandidate>,
    pub activation: Option<ActivationPrompt>,
    pub has_server_time: bool,
}

#[derive(Deserialize)]
struct FirmwareField {
    version: String,
    #[serde(default)]
    url: String,
}

impl VersionCheck {
    /// Builds a check result from the OTA server's JSON reply.
    ///
    /// A `firmware` entry only becomes a candidate when its version differs
    /// from `current_version` and it carries a download URL.
    pub fn from_response(current_version: &str, response: &Value) -> Result<Self> {
        if !response.is_object() {
            return Err(anyhow!("version check response is not an object"));
        }

        let firmware = match response.get("firmware") {
            Some(value) => {
                let field = FirmwareField::deserialize(value)?;
                (field.version != current_version && !field.url.is_empty()).then(|| {
                    FirmwareCandidate {
                        version: field.version,
                        url: field.url,
                    }
                })
            }
            None => None,
        };

        let activation = response
            .get("activation")
            .map(ActivationPrompt::deserialize)
            .transpose()?;

        Ok(Self {
            current_version: current_version.to_string(),
            firmware,
            activation,
            has_server_time: response.get("server_time").is_some(),
        })
    }

    pub fn has_activation(&self) -> bool {
        self.activation.is_some()
    }

    pub fn activation_code(&self) -> Option<&str> {
        self.activation.as_ref().and_then(|a| a.code.as_deref())
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ActivationError {
    /// The server has not seen the user confirm the code yet.
    #[error("activation timed out")]
    Timeout,
    #[error("activation failed: {0}")]
    Failed(String),
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct UpgradeProgress {
    pub percent: u8,
    /// Bytes per second.
    pub speed: usize,
}

/// Version/activation server and firmware flasher.
pub trait OtaClient: Send {
    fn current_version(&self) -> String;
    fn check_version_url(&self) -> String;
    fn check_version(&mut self) -> Result<VersionCheck>;
    fn mark_current_version_valid(&mut self) -> Result<()>;
    fn activate(&mut self, check: &VersionCheck) -> Result<(), ActivationError>;

    /// Downloads and flashes `url`, reporting progress as it goes. On success
    /// the new image is selected for the next boot.
    fn upgrade(&mut self, url: &str, progress: &mut dyn FnMut(UpgradeProgress)) -> Result<()>;
}

/// Resource partition (fonts, emoji, wake-word models).
pub trait Assets: Send {
    fn partition_valid(&self) -> bool;
    fn download(&mut self, url: &str, progress: &mut dyn FnMut(UpgradeProgress)) -> Result<()>;
    fn apply(&mut self) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn newer_firmware_becomes_a_candidate() {
        let response = json!({
            "firmware": {"version": "1.7.0", "url": "https://ota.example/1.7.0.bin"},
            "server_time": {"timestamp": 1_700_000_000_000u64, "timezone_offset": 480}
        });
        let check = VersionCheck::from_response("1.6.2", &response).expect("parse");
        assert!(check.firmware.is_some());
        assert!(check.has_server_time);
        assert!(!check.has_activation());
        assert_eq!(
            check.firmware.map(|f| f.url),
            Some("https://ota.example/1.7.0.bin".to_string())
        );
    }

    #[test]
    fn same_version_is_not_an_upgrade() {
        let response = json!({"firmware": {"version": "1.6.2", "url": "https://ota.example/x.bin"}});
        let check = VersionCheck::from_response("1.6.2", &response).expect("parse");
        assert_eq!(check.firmware, None);
        assert!(!check.has_server_time);
    }

    #[test]
    fn activation_code_is_optional() {
        let response = json!({"activation": {"code": "482913", "message": "xiaozhi.me\n482913"}});
        let check = VersionCheck::from_response("1.0.0", &response).expect("parse");
        assert_eq!(check.activation_code(), Some("482913"));

        let response = json!({"activation": {"message": "waiting"}});
        let check = VersionCheck::from_response("1.0.0", &response).expect("parse");
        assert!(check.has_activation());
        assert_eq!(check.activation_code(), None);
    }

    #[test]
    fn rejects_non_object_replies() {
        assert!(VersionCheck::from_response("1.0.0", &json!("oops")).is_err());
    }
}
