//! Transport callbacks and server message handling.

use std::sync::Arc;

use log::{debug, info, warn};
use serde_json::Value;

use super::{AppHandle, Application};
use crate::audio::{AudioStreamPacket, PacketSink, Sound};
use crate::boards::role;
use crate::common::enums::{DeviceState, ListeningMode};
use crate::protocols::{IncomingMessage, MessageError, ProtocolListener};

/// The orchestrator's [`ProtocolListener`].
///
/// Runs on the transport's thread. Only the audio gate and error recording
/// happen here; everything else is queued for the dispatcher.
pub struct ProtocolEvents {
    handle: AppHandle,
    sink: Arc<dyn PacketSink>,
}

impl ProtocolEvents {
    pub fn new(handle: AppHandle, sink: Arc<dyn PacketSink>) -> Self {
        Self { handle, sink }
    }
}

impl ProtocolListener for ProtocolEvents {
    fn on_connected(&self) {
        self.handle.schedule(Application::dismiss_alert);
    }

    fn on_network_error(&self, message: &str) {
        self.handle.report_network_error(message);
    }

    fn on_incoming_audio(&self, packet: AudioStreamPacket) {
        // Held across the push so the state cannot leave Speaking mid-check.
        self.handle.state_watch().with_state(|state| {
            if state == DeviceState::Speaking {
                self.sink.push(packet);
            }
        });
    }

    fn on_audio_channel_opened(&self) {
        self.handle.schedule(Application::on_audio_channel_opened);
    }

    fn on_audio_channel_closed(&self) {
        self.handle.schedule(Application::on_audio_channel_closed);
    }

    fn on_incoming_json(&self, message: &Value) {
        debug!("Incoming json: {}", message);
        match IncomingMessage::parse(message) {
            Ok(message) => self
                .handle
                .schedule(move |app| app.handle_incoming(message)),
            Err(MessageError::MissingType) => debug!("Dropping message without type"),
            Err(e) => warn!("Dropping message: {}", e),
        }
    }
}

impl Application {
    /// Applies one classified server message.
    pub fn handle_incoming(&mut self, message: IncomingMessage) {
        match message {
            IncomingMessage::TtsStart => {
                self.aborted = false;
                if matches!(self.state, DeviceState::Idle | DeviceState::Listening) {
                    self.set_device_state(DeviceState::Speaking);
                }
            }
            IncomingMessage::TtsStop => {
                if self.state == DeviceState::Speaking {
                    if self.listening_mode == ListeningMode::ManualStop {
                        self.set_device_state(DeviceState::Idle);
                    } else {
                        self.set_device_state(DeviceState::Listening);
                    }
                }
            }
            IncomingMessage::TtsSentenceStart { text } => {
                info!("<< {}", text);
                self.board.display().set_chat_message(role::ASSISTANT, &text);
            }
            IncomingMessage::Stt { text } => self.on_transcript(&text),
            IncomingMessage::Llm { emotion } => self.board.display().set_emotion(&emotion),
            IncomingMessage::Mcp { payload } => self.mcp.parse_message(&payload),
            IncomingMessage::System { command } => {
                info!("System command: {}", command);
                if command == "reboot" {
                    self.reboot();
                }
            }
            IncomingMessage::Alert {
                status,
                message,
                emotion,
            } => self.alert(&status, &message, &emotion, Some(Sound::Vibration)),
        }
    }

    fn on_transcript(&mut self, text: &str) {
        if let Some(phrase) = self.filter.blocked_by(text) {
            warn!("Blocked STT line ({}): {}", phrase, text);
            return;
        }

        info!(">> {}", text);
        if let Some(companion) = self.companion.as_deref_mut() {
            companion.broadcast(&format!("stt: {}", text));
        }
        self.board.display().set_chat_message(role::USER, text);
    }
}
