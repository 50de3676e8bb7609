use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use super::{Call, Journal};
use crate::audio::{AudioService, AudioServiceListener, AudioStreamPacket, PacketSink, Sound};

const OUTPUT_SAMPLE_RATE: u32 = 24000;

#[derive(Default)]
struct AudioState {
    listener: Option<Arc<dyn AudioServiceListener>>,
    running: bool,
    voice_processing: bool,
    afe_wake_word: bool,
    busy: bool,
    send_queue: VecDeque<AudioStreamPacket>,
    wake_word_packets: VecDeque<AudioStreamPacket>,
    encoded_wake_word: bool,
    last_wake_word: String,
    decoded: Vec<AudioStreamPacket>,
}

/// Test-side view of a [`SimAudio`]: injects microphone activity and
/// inspects what reached the decoder.
#[derive(Clone, Default)]
pub struct AudioControl {
    state: Arc<Mutex<AudioState>>,
}

impl AudioControl {
    fn lock(&self) -> MutexGuard<'_, AudioState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn listener(&self) -> Option<Arc<dyn AudioServiceListener>> {
        self.lock().listener.clone()
    }

    /// Queues encoded microphone frames and signals the send queue.
    pub fn capture(&self, payloads: impl IntoIterator<Item = Vec<u8>>) {
        {
            let mut state = self.lock();
            for payload in payloads {
                state
                    .send_queue
                    .push_back(AudioStreamPacket::new(16000, payload));
            }
        }
        if let Some(listener) = self.listener() {
            listener.on_send_queue_available();
        }
    }

    /// Simulates the detector hearing `wake_word`, with `frames` of buffered
    /// audio preceding it.
    pub fn hear_wake_word(&self, wake_word: &str, frames: impl IntoIterator<Item = Vec<u8>>) {
        {
            let mut state = self.lock();
            state.last_wake_word = wake_word.to_string();
            state.wake_word_packets = frames
                .into_iter()
                .map(|payload| AudioStreamPacket::new(16000, payload))
                .collect();
        }
        if let Some(listener) = self.listener() {
            listener.on_wake_word_detected(wake_word);
        }
    }

    pub fn voice_activity(&self, speaking: bool) {
        if let Some(listener) = self.listener() {
            listener.on_vad_change(speaking);
        }
    }

    pub fn set_afe_wake_word(&self, afe: bool) {
        self.lock().afe_wake_word = afe;
    }

    pub fn set_busy(&self, busy: bool) {
        self.lock().busy = busy;
    }

    pub fn decoded(&self) -> Vec<AudioStreamPacket> {
        self.lock().decoded.clone()
    }

    pub fn pending_send(&self) -> usize {
        self.lock().send_queue.len()
    }

    pub fn is_running(&self) -> bool {
        self.lock().running
    }

    pub fn voice_processing(&self) -> bool {
        self.lock().voice_processing
    }
}

struct DecodeQueue {
    control: AudioControl,
}

impl PacketSink for DecodeQueue {
    fn push(&self, packet: AudioStreamPacket) {
        self.control.lock().decoded.push(packet);
    }
}

/// Audio pipeline without hardware.
pub struct SimAudio {
    journal: Journal,
    control: AudioControl,
}

impl SimAudio {
    pub fn new(journal: Journal) -> (Self, AudioControl) {
        let control = AudioControl::default();
        (
            Self {
                journal,
                control: control.clone(),
            },
            control,
        )
    }
}

impl AudioService for SimAudio {
    fn start(&mut self) {
        self.control.lock().running = true;
        self.journal.record(Call::AudioStart);
    }

    fn stop(&mut self) {
        self.control.lock().running = false;
        self.journal.record(Call::AudioStop);
    }

    fn set_listener(&mut self, listener: Arc<dyn AudioServiceListener>) {
        self.control.lock().listener = Some(listener);
    }

    fn is_voice_processing_running(&self) -> bool {
        self.control.lock().voice_processing
    }

    fn enable_voice_processing(&mut self, enable: bool) {
        self.control.lock().voice_processing = enable;
        self.journal.record(Call::VoiceProcessing(enable));
    }

    fn enable_wake_word_detection(&mut self, enable: bool) {
        self.journal.record(Call::WakeWordDetection(enable));
    }

    fn is_afe_wake_word(&self) -> bool {
        self.control.lock().afe_wake_word
    }

    fn enable_audio_testing(&mut self, enable: bool) {
        self.journal.record(Call::AudioTesting(enable));
    }

    fn enable_device_aec(&mut self, enable: bool) {
        self.journal.record(Call::DeviceAec(enable));
    }

    fn reset_decoder(&mut self) {
        self.journal.record(Call::ResetDecoder);
    }

    fn play_sound(&mut self, sound: Sound) {
        self.journal.record(Call::PlaySound(sound));
    }

    fn pop_packet_from_send_queue(&mut self) -> Option<AudioStreamPacket> {
        self.control.lock().send_queue.pop_front()
    }

    fn decode_sink(&self) -> Arc<dyn PacketSink> {
        Arc::new(DecodeQueue {
            control: self.control.clone(),
        })
    }

    fn encode_wake_word(&mut self) {
        self.control.lock().encoded_wake_word = true;
        self.journal.record(Call::EncodeWakeWord);
    }

    fn pop_wake_word_packet(&mut self) -> Option<AudioStreamPacket> {
        let mut state = self.control.lock();
        if !state.encoded_wake_word {
            return None;
        }
        let packet = state.wake_word_packets.pop_front();
        if packet.is_none() {
            state.encoded_wake_word = false;
        }
        packet
    }

    fn last_wake_word(&self) -> String {
        self.control.lock().last_wake_word.clone()
    }

    fn is_idle(&self) -> bool {
        let state = self.control.lock();
        !state.busy && state.send_queue.is_empty()
    }

    fn output_sample_rate(&self) -> u32 {
        OUTPUT_SAMPLE_RATE
    }
}
