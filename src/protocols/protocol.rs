use std::sync::Arc;

use anyhow::Result;
use serde_json::Value;

use crate::audio::AudioStreamPacket;
use crate::common::enums::{AbortReason, ListeningMode};

/// Callbacks a transport invokes from its own receive thread.
///
/// Implementations must return quickly; anything that touches device state
/// is deferred to the main event loop.
pub trait ProtocolListener: Send + Sync {
    fn on_connected(&self);
    fn on_network_error(&self, message: &str);
    fn on_incoming_audio(&self, packet: AudioStreamPacket);
    fn on_audio_channel_opened(&self);
    fn on_audio_channel_closed(&self);
    fn on_incoming_json(&self, message: &Value);
}

/// Session contract every transport (MQTT+UDP, WebSocket, ...) provides.
pub trait Protocol: Send {
    /// Registers `listener` and connects the control channel.
    fn start(&mut self, listener: Arc<dyn ProtocolListener>) -> Result<()>;

    /// Opens the audio channel, blocking until the server answers or the
    /// transport gives up.
    fn open_audio_channel(&mut self) -> Result<()>;
    fn close_audio_channel(&mut self);
    fn is_audio_channel_opened(&self) -> bool;

    /// Fails when the transport cannot take more data right now.
    fn send_audio(&mut self, packet: AudioStreamPacket) -> Result<()>;
    fn send_start_listening(&mut self, mode: ListeningMode) -> Result<()>;
    fn send_stop_listening(&mut self) -> Result<()>;
    fn send_abort_speaking(&mut self, reason: AbortReason) -> Result<()>;
    fn send_wake_word_detected(&mut self, wake_word: &str) -> Result<()>;
    fn send_raw_text(&mut self, text: &str) -> Result<()>;
    fn send_mcp_message(&mut self, payload: &str) -> Result<()>;

    fn session_id(&self) -> &str;
    fn server_sample_rate(&self) -> u32;
}
