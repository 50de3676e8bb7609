//! The device orchestrator: main event loop, state machine and the entry
//! points that drive it.
//!
//! [`Application`] owns every collaborator and is only ever touched by the
//! dispatcher thread. Other threads talk to it through an [`AppHandle`].

use std::sync::mpsc::Sender;
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;

use log::{error, info, warn};

use crate::audio::{AudioService, AudioServiceListener, PacketSink, Sound};
use crate::boards::{role, Board};
use crate::common::content_filter::ContentFilter;
use crate::common::enums::{AbortReason, AecMode, DeviceState, ListeningMode, StateChange};
use crate::common::event::{EventSet, MainEvent};
use crate::common::scheduler::Scheduler;
use crate::common::state_watch::StateWatch;
use crate::companion::CompanionLink;
use crate::config::AppConfig;
use crate::lang;
use crate::mcp::McpServer;
use crate::protocols::{Protocol, ProtocolListener, SttMessage};
use crate::setting::Settings;

mod handle;
mod incoming;

pub use handle::{AppHandle, DispatchError};
pub use incoming::ProtocolEvents;

const AEC_MODE_KEY: &str = "aec_mode";

/// State reachable from producer threads.
pub(crate) struct Shared {
    pub(crate) scheduler: Scheduler<Application>,
    pub(crate) state: StateWatch,
    pub(crate) last_error: Mutex<String>,
    observers: Mutex<Vec<Sender<StateChange>>>,
    outbound: Mutex<Vec<Outbound>>,
}

/// A message handed over by a collaborator running on the dispatcher. It goes
/// out before the session is next touched.
pub(crate) enum Outbound {
    Text(String),
    Mcp(String),
}

impl Shared {
    pub(crate) fn push_outbound(&self, message: Outbound) {
        self.outbound
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(message);
    }

    fn take_outbound(&self) -> Vec<Outbound> {
        std::mem::take(&mut *self.outbound.lock().unwrap_or_else(PoisonError::into_inner))
    }

    fn publish(&self, change: StateChange) {
        self.observers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|observer| observer.send(change).is_ok());
    }
}

/// Collaborators handed to the orchestrator at construction.
pub struct Collaborators {
    pub board: Box<dyn Board>,
    pub audio: Box<dyn AudioService>,
    pub mcp: Box<dyn McpServer>,
    /// Namespace holding the persisted AEC mode.
    pub settings: Box<dyn Settings>,
    pub companion: Option<Box<dyn CompanionLink>>,
}

pub struct Application {
    shared: Arc<Shared>,
    board: Box<dyn Board>,
    audio: Box<dyn AudioService>,
    protocol: Option<Box<dyn Protocol>>,
    mcp: Box<dyn McpServer>,
    settings: Box<dyn Settings>,
    companion: Option<Box<dyn CompanionLink>>,
    filter: ContentFilter,
    config: AppConfig,

    state: DeviceState,
    listening_mode: ListeningMode,
    aec_mode: AecMode,
    aborted: bool,
    clock_ticks: u32,
    has_server_time: bool,
}

impl Application {
    pub fn new(parts: Collaborators, config: AppConfig) -> Self {
        let aec_mode = parts
            .settings
            .get_string(AEC_MODE_KEY)
            .and_then(|value| AecMode::parse(&value))
            .unwrap_or(config.aec_mode);

        let shared = Arc::new(Shared {
            scheduler: Scheduler::new(),
            state: StateWatch::new(DeviceState::Unknown),
            last_error: Mutex::new(String::new()),
            observers: Mutex::new(Vec::new()),
            outbound: Mutex::new(Vec::new()),
        });

        Self {
            shared,
            board: parts.board,
            audio: parts.audio,
            protocol: None,
            mcp: parts.mcp,
            settings: parts.settings,
            companion: parts.companion,
            filter: ContentFilter::new(config.stt_denylist.iter().cloned()),
            config,
            state: DeviceState::Unknown,
            listening_mode: ListeningMode::default(),
            aec_mode,
            aborted: false,
            clock_ticks: 0,
            has_server_time: false,
        }
    }

    pub fn handle(&self) -> AppHandle {
        AppHandle::new(Arc::clone(&self.shared))
    }

    pub fn state(&self) -> DeviceState {
        self.state
    }

    pub fn listening_mode(&self) -> ListeningMode {
        self.listening_mode
    }

    pub fn aec_mode(&self) -> AecMode {
        self.aec_mode
    }

    pub fn clock_ticks(&self) -> u32 {
        self.clock_ticks
    }

    pub fn is_aborted(&self) -> bool {
        self.aborted
    }

    pub fn has_server_time(&self) -> bool {
        self.has_server_time
    }

    pub fn set_has_server_time(&mut self, has_server_time: bool) {
        self.has_server_time = has_server_time;
    }

    pub fn has_protocol(&self) -> bool {
        self.protocol.is_some()
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    // ---------------------------------------------------------------------
    // Main event loop
    // ---------------------------------------------------------------------

    /// Runs the main event loop on the calling thread. Never returns.
    pub fn run(&mut self) {
        self.shared.scheduler.bind_dispatcher();
        info!("Main event loop started");
        loop {
            self.run_once();
        }
    }

    /// Parks until something is pending, then handles one wake.
    pub fn run_once(&mut self) {
        let events = self.shared.scheduler.wait();
        self.dispatch(events);
    }

    /// Handles whatever is pending without blocking. Returns `false` when
    /// nothing was.
    pub fn dispatch_pending(&mut self) -> bool {
        let events = self.shared.scheduler.take_events();
        if events.is_empty() {
            return false;
        }
        self.dispatch(events);
        true
    }

    /// Handles one wake, in fixed priority order.
    pub fn dispatch(&mut self, events: EventSet) {
        for event in events.iter() {
            match event {
                MainEvent::NetworkError => self.handle_network_error(),
                MainEvent::SendAudioReady => self.drain_send_queue(),
                MainEvent::WakeWordDetected => self.on_wake_word_detected(),
                MainEvent::VadChanged => {
                    if self.state == DeviceState::Listening {
                        self.board.led().on_state_changed(self.state);
                    }
                }
                MainEvent::ScheduledTasks => {
                    for task in self.shared.scheduler.take_tasks() {
                        task(self);
                        self.flush_outbound();
                    }
                }
                MainEvent::ClockTick => self.on_clock_tick(),
            }
            self.flush_outbound();
        }
    }

    fn handle_network_error(&mut self) {
        let message = self
            .shared
            .last_error
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        self.set_device_state(DeviceState::Idle);
        self.alert(lang::ERROR, &message, "circle_xmark", Some(Sound::Exclamation));
    }

    fn drain_send_queue(&mut self) {
        let mut protocol = self.protocol.as_deref_mut();
        while let Some(packet) = self.audio.pop_packet_from_send_queue() {
            let Some(protocol) = protocol.as_mut() else {
                continue;
            };
            if let Err(e) = protocol.send_audio(packet) {
                log::debug!("Send queue stalled: {:?}", e);
                break;
            }
        }
    }

    fn on_clock_tick(&mut self) {
        self.clock_ticks += 1;
        self.board.display().update_status_bar(false);

        let every = self.config.heap_report_every;
        if every != 0 && self.clock_ticks % every == 0 {
            self.board.print_heap_stats();
        }
    }

    // ---------------------------------------------------------------------
    // State machine
    // ---------------------------------------------------------------------

    pub fn set_device_state(&mut self, state: DeviceState) {
        if self.state == state {
            return;
        }

        self.clock_ticks = 0;
        let previous = self.state;
        self.state = state;
        self.shared.state.set(state);
        info!("STATE: {}", state);

        self.shared.publish(StateChange {
            previous,
            current: state,
        });
        self.board.led().on_state_changed(state);

        match state {
            DeviceState::Idle => {
                let display = self.board.display();
                display.set_status(lang::STANDBY);
                display.set_emotion("neutral");
                self.audio.enable_voice_processing(false);
                self.audio.enable_wake_word_detection(true);
            }
            DeviceState::Connecting => {
                let display = self.board.display();
                display.set_status(lang::CONNECTING);
                display.set_emotion("neutral");
                display.set_chat_message(role::SYSTEM, "");
            }
            DeviceState::Listening => {
                let display = self.board.display();
                display.set_status(lang::LISTENING);
                display.set_emotion("neutral");

                if !self.audio.is_voice_processing_running() {
                    if let Some(protocol) = self.protocol.as_deref_mut() {
                        if let Err(e) = protocol.send_start_listening(self.listening_mode) {
                            warn!("Failed to send start listening: {:?}", e);
                        }
                    }
                    self.audio.enable_voice_processing(true);
                    self.audio.enable_wake_word_detection(false);
                }
            }
            DeviceState::Speaking => {
                self.board.display().set_status(lang::SPEAKING);

                if self.listening_mode != ListeningMode::Realtime {
                    self.audio.enable_voice_processing(false);
                    let afe = self.audio.is_afe_wake_word();
                    self.audio.enable_wake_word_detection(afe);
                }
                self.audio.reset_decoder();
            }
            _ => {}
        }
    }

    pub fn set_listening_mode(&mut self, mode: ListeningMode) {
        self.listening_mode = mode;
        self.set_device_state(DeviceState::Listening);
    }

    fn conversation_mode(&self) -> ListeningMode {
        if self.aec_mode == AecMode::Off {
            ListeningMode::AutoStop
        } else {
            ListeningMode::Realtime
        }
    }

    // ---------------------------------------------------------------------
    // Entry points
    // ---------------------------------------------------------------------

    pub fn toggle_chat_state(&mut self) {
        match self.state {
            DeviceState::Activating => self.set_device_state(DeviceState::Idle),
            DeviceState::WifiConfiguring => {
                self.audio.enable_audio_testing(true);
                self.set_device_state(DeviceState::AudioTesting);
            }
            DeviceState::AudioTesting => {
                self.audio.enable_audio_testing(false);
                self.set_device_state(DeviceState::WifiConfiguring);
            }
            _ if self.protocol.is_none() => error!("Protocol not initialized"),
            DeviceState::Idle => {
                if self.open_audio_channel() {
                    self.set_listening_mode(self.conversation_mode());
                }
            }
            DeviceState::Speaking => self.abort_speaking(AbortReason::None),
            DeviceState::Listening => self.close_audio_channel(),
            _ => {}
        }
    }

    pub fn start_listening(&mut self) {
        match self.state {
            DeviceState::Activating => self.set_device_state(DeviceState::Idle),
            DeviceState::WifiConfiguring => {
                self.audio.enable_audio_testing(true);
                self.set_device_state(DeviceState::AudioTesting);
            }
            _ if self.protocol.is_none() => error!("Protocol not initialized"),
            DeviceState::Idle => {
                if self.open_audio_channel() {
                    self.set_listening_mode(ListeningMode::ManualStop);
                }
            }
            DeviceState::Speaking => {
                self.abort_speaking(AbortReason::None);
                self.set_listening_mode(ListeningMode::ManualStop);
            }
            _ => {}
        }
    }

    pub fn stop_listening(&mut self) {
        match self.state {
            DeviceState::AudioTesting => {
                self.audio.enable_audio_testing(false);
                self.set_device_state(DeviceState::WifiConfiguring);
            }
            DeviceState::Listening => {
                if let Some(protocol) = self.protocol.as_deref_mut() {
                    if let Err(e) = protocol.send_stop_listening() {
                        warn!("Failed to send stop listening: {:?}", e);
                    }
                }
                self.set_device_state(DeviceState::Idle);
            }
            _ => {}
        }
    }

    /// Handles a wake word reported by the audio pipeline.
    pub fn on_wake_word_detected(&mut self) {
        if self.protocol.is_none() {
            return;
        }

        match self.state {
            DeviceState::Idle => {
                self.audio.encode_wake_word();
                if !self.open_audio_channel() {
                    self.audio.enable_wake_word_detection(true);
                    return;
                }
                let wake_word = self.audio.last_wake_word();
                info!("Wake word detected: {}", wake_word);
                self.begin_wake_word_turn(&wake_word);
            }
            DeviceState::Speaking => self.abort_speaking(AbortReason::WakeWordDetected),
            DeviceState::Activating => self.set_device_state(DeviceState::Idle),
            _ => {}
        }
    }

    /// Behaves as if `wake_word` had been heard.
    pub fn invoke_wake_word(&mut self, wake_word: &str) {
        if self.protocol.is_none() {
            return;
        }

        match self.state {
            DeviceState::Idle => {
                self.audio.encode_wake_word();
                if !self.open_audio_channel() {
                    self.audio.enable_wake_word_detection(true);
                    return;
                }
                info!("Wake word invoked: {}", wake_word);
                self.begin_wake_word_turn(wake_word);
            }
            DeviceState::Speaking => self.abort_speaking(AbortReason::None),
            DeviceState::Listening => self.close_audio_channel(),
            _ => {}
        }
    }

    fn begin_wake_word_turn(&mut self, wake_word: &str) {
        if !self.config.send_wake_word_data {
            self.set_listening_mode(self.conversation_mode());
            self.audio.play_sound(Sound::Popup);
            return;
        }

        if let Some(protocol) = self.protocol.as_deref_mut() {
            while let Some(packet) = self.audio.pop_wake_word_packet() {
                if let Err(e) = protocol.send_audio(packet) {
                    warn!("Failed to send wake word audio: {:?}", e);
                }
            }
            if let Err(e) = protocol.send_wake_word_detected(wake_word) {
                warn!("Failed to send wake word: {:?}", e);
            }
        }
        self.set_listening_mode(self.conversation_mode());
    }

    pub fn abort_speaking(&mut self, reason: AbortReason) {
        info!("Abort speaking");
        self.aborted = true;
        if let Some(protocol) = self.protocol.as_deref_mut() {
            if let Err(e) = protocol.send_abort_speaking(reason) {
                warn!("Failed to send abort speaking: {:?}", e);
            }
        }
    }

    // ---------------------------------------------------------------------
    // Audio channel
    // ---------------------------------------------------------------------

    /// Opens the audio channel unless it already is, passing through
    /// `Connecting`. On failure the device is left in `Connecting`.
    fn open_audio_channel(&mut self) -> bool {
        match self.protocol.as_deref() {
            None => return false,
            Some(protocol) if protocol.is_audio_channel_opened() => return true,
            Some(_) => {}
        }

        self.set_device_state(DeviceState::Connecting);
        match self.protocol.as_deref_mut().map(|p| p.open_audio_channel()) {
            Some(Ok(())) => true,
            Some(Err(e)) => {
                warn!("Failed to open audio channel: {:?}", e);
                false
            }
            None => false,
        }
    }

    pub fn close_audio_channel(&mut self) {
        self.flush_outbound();
        if let Some(protocol) = self.protocol.as_deref_mut() {
            if protocol.is_audio_channel_opened() {
                protocol.close_audio_channel();
            }
        }
    }

    pub fn is_audio_channel_opened(&self) -> bool {
        self.protocol
            .as_deref()
            .is_some_and(|protocol| protocol.is_audio_channel_opened())
    }

    pub(crate) fn on_audio_channel_opened(&mut self) {
        self.board.set_power_save_mode(false);
        if let Some(protocol) = self.protocol.as_deref() {
            let server = protocol.server_sample_rate();
            let device = self.audio.output_sample_rate();
            if server != device {
                warn!("Server sample rate = {}, device = {}", server, device);
            }
        }
    }

    pub(crate) fn on_audio_channel_closed(&mut self) {
        self.board.set_power_save_mode(true);
        self.board.display().set_chat_message(role::SYSTEM, "");
        self.set_device_state(DeviceState::Idle);
    }

    // ---------------------------------------------------------------------
    // Display, sounds
    // ---------------------------------------------------------------------

    pub fn alert(&mut self, status: &str, message: &str, emotion: &str, sound: Option<Sound>) {
        warn!("Alert [{}] {}: {}", emotion, status, message);

        let display = self.board.display();
        display.set_status(status);
        display.set_emotion(emotion);
        display.set_chat_message(role::SYSTEM, message);

        if let Some(sound) = sound {
            self.audio.play_sound(sound);
        }
    }

    /// Restores the standby screen if the device is idle.
    pub fn dismiss_alert(&mut self) {
        if self.state == DeviceState::Idle {
            let display = self.board.display();
            display.set_status(lang::STANDBY);
            display.set_emotion("neutral");
            display.set_chat_message(role::SYSTEM, "");
        }
    }

    pub fn set_status(&mut self, status: &str) {
        self.board.display().set_status(status);
    }

    pub fn set_emotion(&mut self, emotion: &str) {
        self.board.display().set_emotion(emotion);
    }

    pub fn show_system_message(&mut self, message: &str) {
        self.board.display().set_chat_message(role::SYSTEM, message);
    }

    pub fn show_notification(&mut self, message: &str) {
        self.board.display().show_notification(message);
    }

    pub fn update_status_bar(&mut self, update_all: bool) {
        self.board.display().update_status_bar(update_all);
    }

    pub fn play_sound(&mut self, sound: Sound) {
        self.audio.play_sound(sound);
    }

    /// Reads an activation code out loud after showing `message`.
    pub fn show_activation_code(&mut self, code: &str, message: &str) {
        self.alert(lang::ACTIVATION, message, "link", Some(Sound::Activation));
        for sound in code.chars().filter_map(Sound::for_digit) {
            self.audio.play_sound(sound);
        }
    }

    // ---------------------------------------------------------------------
    // Board and audio plumbing used by the boot sequence and lifecycle flows
    // ---------------------------------------------------------------------

    pub fn set_power_save_mode(&mut self, enabled: bool) {
        self.board.set_power_save_mode(enabled);
    }

    pub fn start_audio(&mut self, listener: Arc<dyn AudioServiceListener>) {
        self.audio.set_listener(listener);
        self.audio.start();
    }

    pub fn restart_audio(&mut self) {
        self.audio.start();
    }

    pub fn stop_audio(&mut self) {
        self.audio.stop();
    }

    pub fn decode_sink(&self) -> Arc<dyn PacketSink> {
        self.audio.decode_sink()
    }

    pub fn user_agent(&self) -> String {
        self.board.user_agent()
    }

    pub fn start_network(&mut self) -> anyhow::Result<()> {
        self.board.start_network()
    }

    pub fn print_heap_stats(&self) {
        self.board.print_heap_stats();
    }

    /// Listener a transport reports into.
    pub fn protocol_listener(&self) -> Arc<dyn ProtocolListener> {
        Arc::new(ProtocolEvents::new(self.handle(), self.audio.decode_sink()))
    }

    /// Takes ownership of a started session.
    pub fn install_protocol(&mut self, protocol: Box<dyn Protocol>) {
        info!("Protocol session {} installed", protocol.session_id());
        self.protocol = Some(protocol);
    }

    // ---------------------------------------------------------------------
    // Outbound
    // ---------------------------------------------------------------------

    /// Sends `text` to the server as if the user had said it.
    pub fn send_text_to_server(&mut self, text: &str) {
        self.flush_outbound();
        self.write_text(text);
    }

    pub fn send_mcp_message(&mut self, payload: &str) {
        self.flush_outbound();
        self.write_mcp(payload);
    }

    /// Sends whatever dispatcher-side collaborators queued through an
    /// [`AppHandle`], oldest first.
    fn flush_outbound(&mut self) {
        for message in self.shared.take_outbound() {
            match message {
                Outbound::Text(text) => self.write_text(&text),
                Outbound::Mcp(payload) => self.write_mcp(&payload),
            }
        }
    }

    fn write_text(&mut self, text: &str) {
        let Some(protocol) = self.protocol.as_deref_mut() else {
            warn!("send_text_to_server: protocol not initialized");
            return;
        };

        let message = match SttMessage::new(protocol.session_id(), text).to_json() {
            Ok(message) => message,
            Err(e) => {
                error!("Failed to encode text message: {:?}", e);
                return;
            }
        };
        if let Err(e) = protocol.send_raw_text(&message) {
            warn!("Failed to send text message: {:?}", e);
        }
    }

    fn write_mcp(&mut self, payload: &str) {
        let Some(protocol) = self.protocol.as_deref_mut() else {
            return;
        };
        if let Err(e) = protocol.send_mcp_message(payload) {
            warn!("Failed to send mcp message: {:?}", e);
        }
    }

    // ---------------------------------------------------------------------
    // Settings and power
    // ---------------------------------------------------------------------

    /// Switches echo cancellation. The open channel, if any, is closed so the
    /// next one negotiates the new mode.
    pub fn set_aec_mode(&mut self, mode: AecMode) {
        self.aec_mode = mode;
        if let Err(e) = self.settings.set_string(AEC_MODE_KEY, mode.as_str()) {
            warn!("Failed to persist aec mode: {:?}", e);
        }

        match mode {
            AecMode::Off => {
                self.audio.enable_device_aec(false);
                self.board.display().show_notification(lang::RTC_MODE_OFF);
            }
            AecMode::ServerSide => {
                self.audio.enable_device_aec(false);
                self.board.display().show_notification(lang::RTC_MODE_ON);
            }
            AecMode::DeviceSide => {
                self.audio.enable_device_aec(true);
                self.board.display().show_notification(lang::RTC_MODE_ON);
            }
        }

        self.close_audio_channel();
    }

    pub fn can_enter_sleep_mode(&self) -> bool {
        self.state == DeviceState::Idle && !self.is_audio_channel_opened() && self.audio.is_idle()
    }

    /// Closes the session, stops audio and restarts the board. Does not
    /// return on hardware.
    pub fn reboot(&mut self) {
        info!("Rebooting...");
        self.close_audio_channel();
        self.protocol = None;
        self.audio.stop();

        thread::sleep(self.config.reboot_grace());
        self.board.restart();
    }
}
