pub mod audio_service;

pub use audio_service::{AudioService, AudioServiceListener, PacketSink};

pub const OPUS_FRAME_DURATION_MS: u32 = 60;

/// One encoded audio frame travelling between the pipeline and the protocol.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AudioStreamPacket {
    pub sample_rate: u32,
    pub frame_duration: u32,
    pub timestamp: u32,
    pub payload: Vec<u8>,
}

impl AudioStreamPacket {
    pub fn new(sample_rate: u32, payload: Vec<u8>) -> Self {
        Self {
            sample_rate,
            frame_duration: OPUS_FRAME_DURATION_MS,
            timestamp: 0,
            payload,
        }
    }
}

/// Built-in prompt sounds the orchestrator asks the pipeline to play.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Sound {
    Activation,
    Exclamation,
    Popup,
    Success,
    Upgrade,
    Vibration,
    /// Spoken digit, used to read out activation codes.
    Digit(u8),
}

impl Sound {
    /// Maps an activation code character to its spoken digit.
    pub fn for_digit(c: char) -> Option<Sound> {
        c.to_digit(10).map(|d| Sound::Digit(d as u8))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_ascii_digits_have_sounds() {
        assert_eq!(Sound::for_digit('7'), Some(Sound::Digit(7)));
        assert_eq!(Sound::for_digit('x'), None);
    }
}
