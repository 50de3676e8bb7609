use std::sync::Arc;

use super::{
    AudioControl, Journal, ProtocolControl, SimAudio, SimBoard, SimCompanion, SimMcp, SimProtocol,
};
use crate::application::{Application, Collaborators};
use crate::audio::AudioStreamPacket;
use crate::common::enums::AecMode;
use crate::config::AppConfig;
use crate::protocols::Protocol;
use crate::setting::MemorySettings;

/// An [`Application`] wired to simulated collaborators, driven from the
/// calling thread with [`Application::dispatch_pending`].
pub struct SimRig {
    pub app: Application,
    pub journal: Journal,
    pub audio: AudioControl,
    pub protocol: ProtocolControl,
    pub settings: MemorySettings,
}

pub struct RigBuilder {
    config: AppConfig,
    settings: MemorySettings,
    protocol: bool,
}

impl RigBuilder {
    pub fn config(mut self, configure: impl FnOnce(&mut AppConfig)) -> Self {
        configure(&mut self.config);
        self
    }

    pub fn denylist<I, S>(self, phrases: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config(|config| config.stt_denylist = phrases.into_iter().map(Into::into).collect())
    }

    pub fn aec_mode(self, mode: AecMode) -> Self {
        self.config(|config| config.aec_mode = mode)
    }

    pub fn settings(mut self, settings: MemorySettings) -> Self {
        self.settings = settings;
        self
    }

    /// Installs a started [`SimProtocol`].
    pub fn with_protocol(mut self) -> Self {
        self.protocol = true;
        self
    }

    pub fn build(self) -> SimRig {
        let journal = Journal::new();
        let (audio, audio_control) = SimAudio::new(journal.clone());

        let mut app = Application::new(
            Collaborators {
                board: Box::new(SimBoard::new(journal.clone())),
                audio: Box::new(audio),
                mcp: Box::new(SimMcp::new(journal.clone())),
                settings: Box::new(self.settings.clone()),
                companion: Some(Box::new(SimCompanion::new(journal.clone()))),
            },
            self.config,
        );
        app.start_audio(Arc::new(app.handle()));

        let protocol_control = if self.protocol {
            let (mut protocol, control) = SimProtocol::new(journal.clone());
            if let Err(e) = protocol.start(app.protocol_listener()) {
                log::warn!("Simulated protocol failed to start: {:?}", e);
            }
            app.install_protocol(Box::new(protocol));
            control
        } else {
            ProtocolControl::default()
        };

        let mut rig = SimRig {
            app,
            journal,
            audio: audio_control,
            protocol: protocol_control,
            settings: self.settings,
        };
        rig.settle();
        rig.journal.clear();
        rig
    }
}

impl SimRig {
    pub fn builder() -> RigBuilder {
        RigBuilder {
            config: AppConfig {
                reboot_grace_ms: 0,
                ..AppConfig::default()
            },
            settings: MemorySettings::new(),
            protocol: false,
        }
    }

    pub fn new() -> Self {
        Self::builder().build()
    }

    pub fn with_protocol() -> Self {
        Self::builder().with_protocol().build()
    }

    /// Runs the dispatcher until nothing is pending.
    pub fn settle(&mut self) {
        while self.app.dispatch_pending() {}
    }

    pub fn decoded(&self) -> Vec<AudioStreamPacket> {
        self.audio.decoded()
    }
}

impl Default for SimRig {
    fn default() -> Self {
        Self::new()
    }
}
