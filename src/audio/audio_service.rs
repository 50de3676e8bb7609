use std::sync::Arc;

use crate::audio::{AudioStreamPacket, Sound};

/// Notifications the audio pipeline raises from its own threads.
///
/// Implementations must not block; the orchestrator only raises a wake signal.
pub trait AudioServiceListener: Send + Sync {
    fn on_send_queue_available(&self);
    fn on_wake_word_detected(&self, wake_word: &str);
    fn on_vad_change(&self, speaking: bool);
}

/// Thread-safe entry into the playback decode queue.
pub trait PacketSink: Send + Sync {
    fn push(&self, packet: AudioStreamPacket);
}

/// Capture, encode, decode and playback pipeline.
///
/// Every method except [`AudioService::decode_sink`]'s returned sink is called
/// from the dispatcher thread only.
pub trait AudioService: Send {
    fn start(&mut self);
    fn stop(&mut self);
    fn set_listener(&mut self, listener: Arc<dyn AudioServiceListener>);

    fn is_voice_processing_running(&self) -> bool;
    fn enable_voice_processing(&mut self, enable: bool);
    fn enable_wake_word_detection(&mut self, enable: bool);
    /// Whether wake-word detection should stay on while speaking.
    fn is_afe_wake_word(&self) -> bool;
    fn enable_audio_testing(&mut self, enable: bool);
    fn enable_device_aec(&mut self, enable: bool);

    fn reset_decoder(&mut self);
    fn play_sound(&mut self, sound: Sound);

    fn pop_packet_from_send_queue(&mut self) -> Option<AudioStreamPacket>;
    fn decode_sink(&self) -> Arc<dyn PacketSink>;

    fn encode_wake_word(&mut self);
    fn pop_wake_word_packet(&mut self) -> Option<AudioStreamPacket>;
    fn last_wake_word(&self) -> String;

    fn is_idle(&self) -> bool;
    fn output_sample_rate(&self) -> u32;
}
