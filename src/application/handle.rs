use std::sync::mpsc::{self, Receiver};
use std::sync::{Arc, PoisonError};

use log::info;
use thiserror::Error;

use super::{Application, Outbound, Shared};
use crate::audio::{AudioServiceListener, Sound};
use crate::common::enums::{AecMode, DeviceState, StateChange};
use crate::common::event::MainEvent;
use crate::common::state_watch::StateWatch;

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum DispatchError {
    /// A blocking call was made from the dispatcher thread itself.
    #[error("blocking call issued from the dispatcher thread")]
    Reentrant,
    /// The task was dropped without producing a reply.
    #[error("dispatcher dropped the request")]
    Closed,
}

/// Producer-side handle to the running [`Application`].
///
/// Cheap to clone and safe to use from any thread. Every operation that
/// touches device state is queued and runs later on the dispatcher, except
/// outbound text and MCP messages sent from the dispatcher itself, which
/// reach the session before the running task next touches it.
#[derive(Clone)]
pub struct AppHandle {
    shared: Arc<Shared>,
}

impl AppHandle {
    pub(super) fn new(shared: Arc<Shared>) -> Self {
        Self { shared }
    }

    pub fn schedule<F>(&self, task: F)
    where
        F: FnOnce(&mut Application) + Send + 'static,
    {
        self.shared.scheduler.schedule(task);
    }

    pub fn raise(&self, event: MainEvent) {
        self.shared.scheduler.notify(event);
    }

    /// Runs `f` on the dispatcher and waits for its result.
    ///
    /// Fails with [`DispatchError::Reentrant`] on the dispatcher thread,
    /// where waiting would deadlock.
    pub fn call<F, R>(&self, f: F) -> Result<R, DispatchError>
    where
        F: FnOnce(&mut Application) -> R + Send + 'static,
        R: Send + 'static,
    {
        if self.shared.scheduler.is_dispatcher() {
            return Err(DispatchError::Reentrant);
        }

        let (reply, result) = mpsc::sync_channel(1);
        self.schedule(move |app| {
            let _ = reply.send(f(app));
        });
        result.recv().map_err(|_| DispatchError::Closed)
    }

    pub fn is_dispatcher(&self) -> bool {
        self.shared.scheduler.is_dispatcher()
    }

    /// Marks the calling thread as the dispatcher. [`Application::run`] does
    /// this itself.
    pub fn bind_dispatcher(&self) {
        self.shared.scheduler.bind_dispatcher();
    }

    /// Last state published by the dispatcher.
    pub fn state(&self) -> DeviceState {
        self.shared.state.get()
    }

    pub fn state_watch(&self) -> &StateWatch {
        &self.shared.state
    }

    pub fn subscribe_state_changes(&self) -> Receiver<StateChange> {
        let (sender, receiver) = mpsc::channel();
        self.shared
            .observers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(sender);
        receiver
    }

    /// Records a transport failure and wakes the dispatcher to handle it.
    pub fn report_network_error(&self, message: &str) {
        *self
            .shared
            .last_error
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = message.to_string();
        self.raise(MainEvent::NetworkError);
    }

    pub fn toggle_chat_state(&self) {
        self.schedule(Application::toggle_chat_state);
    }

    pub fn start_listening(&self) {
        self.schedule(Application::start_listening);
    }

    pub fn stop_listening(&self) {
        self.schedule(Application::stop_listening);
    }

    pub fn invoke_wake_word(&self, wake_word: &str) {
        let wake_word = wake_word.to_string();
        self.schedule(move |app| app.invoke_wake_word(&wake_word));
    }

    /// Sends `text` to the server as a recognized utterance.
    pub fn send_text_to_server(&self, text: &str) {
        let text = text.to_string();
        if self.is_dispatcher() {
            self.shared.push_outbound(Outbound::Text(text));
        } else {
            self.schedule(move |app| app.send_text_to_server(&text));
        }
    }

    pub fn send_mcp_message(&self, payload: &str) {
        let payload = payload.to_string();
        if self.is_dispatcher() {
            self.shared.push_outbound(Outbound::Mcp(payload));
        } else {
            self.schedule(move |app| app.send_mcp_message(&payload));
        }
    }

    pub fn set_aec_mode(&self, mode: AecMode) {
        self.schedule(move |app| app.set_aec_mode(mode));
    }

    pub fn play_sound(&self, sound: Sound) {
        self.schedule(move |app| app.play_sound(sound));
    }

    /// Lets board code move the device into states such as
    /// `WifiConfiguring` or `FatalError`.
    pub fn request_device_state(&self, state: DeviceState) {
        self.schedule(move |app| app.set_device_state(state));
    }

    pub fn reboot(&self) {
        info!("Reboot requested");
        self.schedule(Application::reboot);
    }
}

impl AudioServiceListener for AppHandle {
    fn on_send_queue_available(&self) {
        self.raise(MainEvent::SendAudioReady);
    }

    fn on_wake_word_detected(&self, _wake_word: &str) {
        self.raise(MainEvent::WakeWordDetected);
    }

    fn on_vad_change(&self, _speaking: bool) {
        self.raise(MainEvent::VadChanged);
    }
}

#[cfg(test)]
mod tests {
    use std::thread;

    use super::*;
    use crate::sim::SimRig;

    #[test]
    fn call_runs_on_dispatcher_and_returns_result() {
        let mut rig = SimRig::new();
        let handle = rig.app.handle();

        let caller = thread::spawn(move || handle.call(|app| app.clock_ticks() + 41));
        while !caller.is_finished() {
            rig.app.dispatch_pending();
            thread::yield_now();
        }
        assert_eq!(caller.join().expect("caller panicked"), Ok(41));
    }

    #[test]
    fn call_from_dispatcher_is_rejected() {
        let rig = SimRig::new();
        let handle = rig.app.handle();
        handle.bind_dispatcher();
        assert_eq!(handle.call(|_| ()), Err(DispatchError::Reentrant));
    }

    #[test]
    fn observers_receive_each_transition_once() {
        let mut rig = SimRig::new();
        let changes = rig.app.handle().subscribe_state_changes();

        rig.app.set_device_state(DeviceState::Starting);
        rig.app.set_device_state(DeviceState::Starting);
        rig.app.set_device_state(DeviceState::Idle);

        let seen: Vec<StateChange> = changes.try_iter().collect();
        assert_eq!(
            seen,
            vec![
                StateChange {
                    previous: DeviceState::Unknown,
                    current: DeviceState::Starting
                },
                StateChange {
                    previous: DeviceState::Starting,
                    current: DeviceState::Idle
                },
            ]
        );
    }

    #[test]
    fn dropped_observers_are_pruned() {
        let mut rig = SimRig::new();
        drop(rig.app.handle().subscribe_state_changes());
        rig.app.set_device_state(DeviceState::Idle);
        assert!(rig
            .app
            .handle()
            .shared
            .observers
            .lock()
            .expect("observers")
            .is_empty());
    }
}
