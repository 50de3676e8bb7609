//! Boot sequence: brings up audio, the main event loop and the clock, runs
//! the lifecycle flows, then connects the protocol session.

use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use anyhow::{Context, Result};
use log::{error, info, warn};

use crate::application::{AppHandle, Application, DispatchError};
use crate::audio::Sound;
use crate::common::enums::DeviceState;
use crate::common::event::MainEvent;
use crate::config::RetryPolicy;
use crate::lang;
use crate::lifecycle::{self, Sleeper, UpgradeOutcome, VersionCheckOutcome};
use crate::ota::{Assets, OtaClient, VersionCheck};
use crate::protocols::Protocol;
use crate::setting::Settings;

const MAIN_LOOP_STACK_SIZE: usize = 64 * 1024;
const CLOCK_STACK_SIZE: usize = 16 * 1024;

/// Builds the transport for this boot. Which one (MQTT, WebSocket, ...) is
/// the connector's decision, typically from the version check reply.
pub trait ProtocolConnector: Send {
    fn connect(&mut self, check: Option<&VersionCheck>) -> Result<Box<dyn Protocol>>;
}

/// Services used only while booting (and for later manual upgrades).
pub struct Startup {
    pub ota: Box<dyn OtaClient>,
    pub assets: Box<dyn Assets>,
    /// The `assets` settings namespace.
    pub asset_settings: Box<dyn Settings>,
    pub connector: Box<dyn ProtocolConnector>,
    pub sleeper: Arc<dyn Sleeper>,
}

/// Periodic `ClockTick` source. Stops when dropped.
pub struct ClockTimer {
    stop: Option<Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl ClockTimer {
    pub fn start(handle: AppHandle, interval: Duration) -> Result<Self> {
        let (stop, stopped) = mpsc::channel::<()>();
        let thread = thread::Builder::new()
            .name("clock_timer".into())
            .stack_size(CLOCK_STACK_SIZE)
            .spawn(move || loop {
                match stopped.recv_timeout(interval) {
                    Err(RecvTimeoutError::Timeout) => handle.raise(MainEvent::ClockTick),
                    _ => break,
                }
            })?;
        Ok(Self {
            stop: Some(stop),
            thread: Some(thread),
        })
    }
}

impl Drop for ClockTimer {
    fn drop(&mut self) {
        drop(self.stop.take());
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                warn!("clock_timer thread panicked");
            }
        }
    }
}

/// A booted device.
pub struct Device {
    handle: AppHandle,
    dispatcher: JoinHandle<()>,
    _clock: ClockTimer,
    ota: Arc<Mutex<Box<dyn OtaClient>>>,
    sleeper: Arc<dyn Sleeper>,
    policy: RetryPolicy,
    version: VersionCheckOutcome,
}

impl Device {
    pub fn handle(&self) -> &AppHandle {
        &self.handle
    }

    pub fn version_check(&self) -> &VersionCheckOutcome {
        &self.version
    }

    pub fn is_running(&self) -> bool {
        !self.dispatcher.is_finished()
    }

    /// Starts a firmware upgrade from `url` in the background.
    pub fn upgrade(&self, url: &str) -> Result<JoinHandle<Result<UpgradeOutcome, DispatchError>>> {
        lifecycle::spawn_manual_upgrade(
            self.handle.clone(),
            Arc::clone(&self.ota),
            Arc::clone(&self.sleeper),
            self.policy.clone(),
            url.to_string(),
        )
    }
}

/// Boots `app`. Returns once the device has reached `Idle`, or once a
/// firmware upgrade has restarted the board.
pub fn start(mut app: Application, startup: Startup) -> Result<Device> {
    let Startup {
        mut ota,
        mut assets,
        mut asset_settings,
        mut connector,
        sleeper,
    } = startup;
    let handle = app.handle();
    let policy = app.config().retry.clone();
    let clock_interval = app.config().clock_interval();

    app.set_device_state(DeviceState::Starting);
    let user_agent = app.user_agent();
    app.show_system_message(&user_agent);
    app.start_audio(Arc::new(handle.clone()));

    let dispatcher = thread::Builder::new()
        .name("main_event_loop".into())
        .stack_size(MAIN_LOOP_STACK_SIZE)
        .spawn(move || app.run())
        .context("Failed to spawn main event loop")?;
    let clock = ClockTimer::start(handle.clone(), clock_interval)?;

    handle
        .call(|app| app.start_network())?
        .context("Failed to start network")?;
    handle.call(|app| app.update_status_bar(true))?;

    lifecycle::check_assets_version(
        &handle,
        &mut *assets,
        &mut *asset_settings,
        &*sleeper,
        &policy,
    )?;

    let version = lifecycle::check_new_version(&handle, &mut *ota, &*sleeper, &policy)?;
    if version != VersionCheckOutcome::Rebooting {
        connect(&handle, &*ota, &mut *connector, &version)?;
    }

    Ok(Device {
        handle,
        dispatcher,
        _clock: clock,
        ota: Arc::new(Mutex::new(ota)),
        sleeper,
        policy,
        version,
    })
}

fn connect(
    handle: &AppHandle,
    ota: &dyn OtaClient,
    connector: &mut dyn ProtocolConnector,
    version: &VersionCheckOutcome,
) -> Result<()> {
    handle.call(|app| app.set_status(lang::LOADING_PROTOCOL))?;

    let check = match version {
        VersionCheckOutcome::Ready(check) => Some(check),
        _ => None,
    };
    let has_server_time = check.is_some_and(|check| check.has_server_time);

    let mut protocol = connector.connect(check).context("Failed to create protocol")?;
    let listener = handle.call(|app| app.protocol_listener())?;
    let started = match protocol.start(listener) {
        Ok(()) => true,
        Err(e) => {
            error!("Failed to start protocol: {:?}", e);
            false
        }
    };

    let banner = format!("{}{}", lang::VERSION, ota.current_version());
    handle.call(move |app| {
        app.install_protocol(protocol);
        app.print_heap_stats();
        app.set_device_state(DeviceState::Idle);
        app.set_has_server_time(has_server_time);

        if started {
            app.show_notification(&banner);
            app.show_system_message("");
            app.play_sound(Sound::Success);
        }
    })?;
    info!("Device ready");
    Ok(())
}
