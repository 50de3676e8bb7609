use std::fmt;

use serde::Deserialize;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum AbortReason {
    None,
    WakeWordDetected,
}

impl AbortReason {
    /// Value of the `reason` field in an abort message, if one is sent.
    pub const fn as_wire(self) -> Option<&'static str> {
        match self {
            AbortReason::None => None,
            AbortReason::WakeWordDetected => Some("wake_word_detected"),
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Default)]
pub enum ListeningMode {
    /// The user ends the turn explicitly (push-to-talk).
    ManualStop,
    /// The server detects the end of the utterance.
    #[default]
    AutoStop,
    /// Continuous full-duplex streaming, requires echo cancellation.
    Realtime,
}

impl ListeningMode {
    pub const fn as_wire(self) -> &'static str {
        match self {
            ListeningMode::ManualStop => "manual",
            ListeningMode::AutoStop => "auto",
            ListeningMode::Realtime => "realtime",
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AecMode {
    #[default]
    Off,
    DeviceSide,
    ServerSide,
}

impl AecMode {
    pub const fn as_str(self) -> &'static str {
        match self {
            AecMode::Off => "off",
            AecMode::DeviceSide => "device_side",
            AecMode::ServerSide => "server_side",
        }
    }

    /// Parses the persisted form written by [`AecMode::as_str`].
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "off" => Some(AecMode::Off),
            "device_side" => Some(AecMode::DeviceSide),
            "server_side" => Some(AecMode::ServerSide),
            _ => None,
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Default)]
pub enum DeviceState {
    #[default]
    Unknown,
    Starting,
    WifiConfiguring,
    Idle,
    Connecting,
    Listening,
    Speaking,
    Upgrading,
    Activating,
    AudioTesting,
    FatalError,
}

impl DeviceState {
    pub const fn as_str(self) -> &'static str {
        match self {
            DeviceState::Unknown => "unknown",
            DeviceState::Starting => "starting",
            DeviceState::WifiConfiguring => "configuring",
            DeviceState::Idle => "idle",
            DeviceState::Connecting => "connecting",
            DeviceState::Listening => "listening",
            DeviceState::Speaking => "speaking",
            DeviceState::Upgrading => "upgrading",
            DeviceState::Activating => "activating",
            DeviceState::AudioTesting => "audio_testing",
            DeviceState::FatalError => "fatal_error",
        }
    }
}

impl fmt::Display for DeviceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A transition observed by state-change subscribers.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct StateChange {
    pub previous: DeviceState,
    pub current: DeviceState,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aec_mode_round_trips_through_settings_form() {
        for mode in [AecMode::Off, AecMode::DeviceSide, AecMode::ServerSide] {
            assert_eq!(AecMode::parse(mode.as_str()), Some(mode));
        }
        assert_eq!(AecMode::parse("on"), None);
    }

    #[test]
    fn listening_modes_use_protocol_names() {
        assert_eq!(ListeningMode::ManualStop.as_wire(), "manual");
        assert_eq!(ListeningMode::AutoStop.as_wire(), "auto");
        assert_eq!(ListeningMode::Realtime.as_wire(), "realtime");
    }

    #[test]
    fn wifi_configuring_reports_short_name() {
        assert_eq!(DeviceState::WifiConfiguring.to_string(), "configuring");
        assert_eq!(DeviceState::default(), DeviceState::Unknown);
    }
}
