//! Simulated collaborators for running the orchestrator off-device.
//!
//! Every fake records what it was asked to do into a shared [`Journal`], so
//! a caller can assert the exact collaborator calls a transition caused.

use std::sync::{Arc, Mutex, PoisonError};

use log::info;
use serde_json::Value;

use crate::audio::Sound;
use crate::common::enums::{AbortReason, DeviceState, ListeningMode};
use crate::companion::CompanionLink;
use crate::mcp::McpServer;

mod audio;
mod board;
mod ota;
mod protocol;
mod rig;

pub use audio::{AudioControl, SimAudio};
pub use board::SimBoard;
pub use ota::{InstantSleeper, SimAssets, SimOta, Wait};
pub use protocol::{ProtocolControl, SimConnector, SimProtocol};
pub use rig::{RigBuilder, SimRig};

/// One collaborator call.
#[derive(Clone, Debug, PartialEq)]
pub enum Call {
    // display
    Status(String),
    Emotion(String),
    ChatMessage(String, String),
    Notification(String),
    StatusBar(bool),
    // board
    Led(DeviceState),
    PowerSave(bool),
    StartNetwork,
    HeapStats,
    Restart,
    // audio
    AudioStart,
    AudioStop,
    VoiceProcessing(bool),
    WakeWordDetection(bool),
    AudioTesting(bool),
    DeviceAec(bool),
    ResetDecoder,
    PlaySound(Sound),
    EncodeWakeWord,
    // protocol
    ProtocolStart,
    OpenChannel,
    CloseChannel,
    SendAudio(Vec<u8>),
    StartListening(ListeningMode),
    StopListening,
    AbortSpeaking(AbortReason),
    WakeWord(String),
    RawText(String),
    McpOut(String),
    // ota
    CheckVersion,
    MarkValid,
    Activate,
    Upgrade(String),
    AssetsDownload(String),
    AssetsApply,
    // others
    McpIn(Value),
    Broadcast(String),
}

/// Shared, append-only record of collaborator calls.
#[derive(Clone, Default)]
pub struct Journal {
    calls: Arc<Mutex<Vec<Call>>>,
}

impl Journal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, call: Call) {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(call);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn clear(&self) {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    pub fn contains(&self, call: &Call) -> bool {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(call)
    }

    /// Calls matching `filter`, in order.
    pub fn filtered(&self, filter: impl Fn(&Call) -> bool) -> Vec<Call> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|call| filter(call))
            .cloned()
            .collect()
    }
}

pub struct SimMcp {
    journal: Journal,
}

impl SimMcp {
    pub fn new(journal: Journal) -> Self {
        Self { journal }
    }
}

impl McpServer for SimMcp {
    fn parse_message(&mut self, payload: &Value) {
        info!(target: "mcp", "{}", payload);
        self.journal.record(Call::McpIn(payload.clone()));
    }
}

pub struct SimCompanion {
    journal: Journal,
}

impl SimCompanion {
    pub fn new(journal: Journal) -> Self {
        Self { journal }
    }
}

impl CompanionLink for SimCompanion {
    fn broadcast(&mut self, message: &str) {
        info!(target: "companion", "{}", message);
        self.journal.record(Call::Broadcast(message.to_string()));
    }
}
