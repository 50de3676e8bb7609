use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use anyhow::{bail, Result};
use log::info;
use serde_json::Value;

use super::{Call, Journal};
use crate::audio::AudioStreamPacket;
use crate::common::enums::{AbortReason, ListeningMode};
use crate::ota::VersionCheck;
use crate::protocols::{Protocol, ProtocolListener};
use crate::startup::ProtocolConnector;

const SESSION_ID: &str = "sim-session";
const SERVER_SAMPLE_RATE: u32 = 24000;

#[derive(Default)]
struct ProtocolState {
    listener: Option<Arc<dyn ProtocolListener>>,
    opened: bool,
    fail_start: bool,
    fail_open: bool,
    /// Remaining audio frames the transport accepts; `None` is unbounded.
    audio_budget: Option<usize>,
}

/// Test-side view of a [`SimProtocol`]: plays the server.
#[derive(Clone, Default)]
pub struct ProtocolControl {
    state: Arc<Mutex<ProtocolState>>,
}

impl ProtocolControl {
    fn lock(&self) -> MutexGuard<'_, ProtocolState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn listener(&self) -> Option<Arc<dyn ProtocolListener>> {
        self.lock().listener.clone()
    }

    pub fn set_fail_start(&self, fail: bool) {
        self.lock().fail_start = fail;
    }

    pub fn set_fail_open(&self, fail: bool) {
        self.lock().fail_open = fail;
    }

    pub fn set_audio_budget(&self, budget: Option<usize>) {
        self.lock().audio_budget = budget;
    }

    pub fn is_opened(&self) -> bool {
        self.lock().opened
    }

    pub fn connected(&self) {
        if let Some(listener) = self.listener() {
            listener.on_connected();
        }
    }

    pub fn network_error(&self, message: &str) {
        if let Some(listener) = self.listener() {
            listener.on_network_error(message);
        }
    }

    pub fn deliver_json(&self, message: &Value) {
        if let Some(listener) = self.listener() {
            listener.on_incoming_json(message);
        }
    }

    pub fn deliver_audio(&self, packet: AudioStreamPacket) {
        if let Some(listener) = self.listener() {
            listener.on_incoming_audio(packet);
        }
    }

    /// The server hangs up the audio channel.
    pub fn hang_up(&self) {
        self.lock().opened = false;
        if let Some(listener) = self.listener() {
            listener.on_audio_channel_closed();
        }
    }
}

/// Loopback transport driven through a [`ProtocolControl`].
pub struct SimProtocol {
    journal: Journal,
    control: ProtocolControl,
}

impl SimProtocol {
    pub fn new(journal: Journal) -> (Self, ProtocolControl) {
        let control = ProtocolControl::default();
        (
            Self {
                journal,
                control: control.clone(),
            },
            control,
        )
    }
}

impl Protocol for SimProtocol {
    fn start(&mut self, listener: Arc<dyn ProtocolListener>) -> Result<()> {
        self.journal.record(Call::ProtocolStart);
        let fail = {
            let mut state = self.control.lock();
            state.listener = Some(listener);
            state.fail_start
        };
        if fail {
            bail!("server unreachable");
        }
        self.control.connected();
        Ok(())
    }

    fn open_audio_channel(&mut self) -> Result<()> {
        self.journal.record(Call::OpenChannel);
        if self.control.lock().fail_open {
            self.control.network_error("Failed to open audio channel");
            bail!("audio channel refused");
        }
        self.control.lock().opened = true;
        if let Some(listener) = self.control.listener() {
            listener.on_audio_channel_opened();
        }
        Ok(())
    }

    fn close_audio_channel(&mut self) {
        self.journal.record(Call::CloseChannel);
        self.control.hang_up();
    }

    fn is_audio_channel_opened(&self) -> bool {
        self.control.is_opened()
    }

    fn send_audio(&mut self, packet: AudioStreamPacket) -> Result<()> {
        {
            let mut state = self.control.lock();
            match state.audio_budget {
                Some(0) => bail!("send buffer full"),
                Some(ref mut budget) => *budget -= 1,
                None => {}
            }
        }
        self.journal.record(Call::SendAudio(packet.payload));
        Ok(())
    }

    fn send_start_listening(&mut self, mode: ListeningMode) -> Result<()> {
        self.journal.record(Call::StartListening(mode));
        Ok(())
    }

    fn send_stop_listening(&mut self) -> Result<()> {
        self.journal.record(Call::StopListening);
        Ok(())
    }

    fn send_abort_speaking(&mut self, reason: AbortReason) -> Result<()> {
        self.journal.record(Call::AbortSpeaking(reason));
        Ok(())
    }

    fn send_wake_word_detected(&mut self, wake_word: &str) -> Result<()> {
        self.journal.record(Call::WakeWord(wake_word.to_string()));
        Ok(())
    }

    fn send_raw_text(&mut self, text: &str) -> Result<()> {
        info!(target: "protocol", "-> {}", text);
        self.journal.record(Call::RawText(text.to_string()));
        Ok(())
    }

    fn send_mcp_message(&mut self, payload: &str) -> Result<()> {
        self.journal.record(Call::McpOut(payload.to_string()));
        Ok(())
    }

    fn session_id(&self) -> &str {
        SESSION_ID
    }

    fn server_sample_rate(&self) -> u32 {
        SERVER_SAMPLE_RATE
    }
}

/// Hands out [`SimProtocol`]s that all answer to the same control.
pub struct SimConnector {
    journal: Journal,
    control: ProtocolControl,
}

impl SimConnector {
    pub fn new(journal: Journal) -> (Self, ProtocolControl) {
        let control = ProtocolControl::default();
        (
            Self {
                journal,
                control: control.clone(),
            },
            control,
        )
    }
}

impl ProtocolConnector for SimConnector {
    fn connect(&mut self, _check: Option<&VersionCheck>) -> Result<Box<dyn Protocol>> {
        Ok(Box::new(SimProtocol {
            journal: self.journal.clone(),
            control: self.control.clone(),
        }))
    }
}
