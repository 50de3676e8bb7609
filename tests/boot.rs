mod common;

use std::sync::Arc;

use xiaozhi::audio::Sound;
use xiaozhi::common::enums::DeviceState;
use xiaozhi::lang;
use xiaozhi::lifecycle::VersionCheckOutcome;
use xiaozhi::ota::{FirmwareCandidate, VersionCheck};
use xiaozhi::setting::MemorySettings;
use xiaozhi::sim::{
    Call, InstantSleeper, Journal, ProtocolControl, SimAssets, SimConnector, SimOta, SimRig,
};
use xiaozhi::startup::{self, Device, Startup};

const VERSION: &str = "1.0.0";

struct Booted {
    device: Device,
    journal: Journal,
    server: ProtocolControl,
    sleeper: InstantSleeper,
}

fn boot(
    script: impl FnOnce(SimOta) -> SimOta,
    prepare: impl FnOnce(&ProtocolControl),
) -> Booted {
    common::init_logging();
    let SimRig { app, journal, .. } = SimRig::new();
    let (connector, server) = SimConnector::new(journal.clone());
    prepare(&server);
    let sleeper = InstantSleeper::new();

    let device = startup::start(
        app,
        Startup {
            ota: Box::new(script(SimOta::new(journal.clone(), VERSION))),
            assets: Box::new(SimAssets::new(journal.clone())),
            asset_settings: Box::new(MemorySettings::new()),
            connector: Box::new(connector),
            sleeper: Arc::new(sleeper.clone()),
        },
    )
    .expect("boot");

    Booted {
        device,
        journal,
        server,
        sleeper,
    }
}

#[test]
fn boot_survives_flaky_version_server() {
    let booted = boot(|ota| ota.failing_checks(3), |_| {});

    assert!(booted.device.is_running());
    assert_eq!(booted.device.handle().state(), DeviceState::Idle);
    assert!(matches!(
        booted.device.version_check(),
        VersionCheckOutcome::Ready(_)
    ));
    assert_eq!(booted.sleeper.backoff_secs(), vec![10, 20, 40]);

    let calls = booted.journal.calls();
    assert_eq!(calls.first(), Some(&Call::Led(DeviceState::Starting)));
    assert!(calls.contains(&Call::StartNetwork));
    assert!(calls.contains(&Call::ProtocolStart));
    assert!(calls.contains(&Call::Notification(format!("{}{}", lang::VERSION, VERSION))));
    assert!(calls.contains(&Call::PlaySound(Sound::Success)));

    let starts: Vec<&Call> = calls
        .iter()
        .filter(|call| matches!(call, Call::StartNetwork | Call::CheckVersion | Call::ProtocolStart))
        .collect();
    assert_eq!(starts.first(), Some(&&Call::StartNetwork));
    assert_eq!(starts.last(), Some(&&Call::ProtocolStart));
}

#[test]
fn boot_continues_when_the_version_server_never_answers() {
    let booted = boot(|ota| ota.failing_checks(10), |_| {});

    assert_eq!(booted.device.version_check(), &VersionCheckOutcome::GaveUp);
    assert_eq!(booted.device.handle().state(), DeviceState::Idle);
    assert!(booted.journal.contains(&Call::ProtocolStart));
}

#[test]
fn failed_protocol_start_still_reaches_idle_quietly() {
    let booted = boot(|ota| ota, |server| server.set_fail_start(true));

    assert_eq!(booted.device.handle().state(), DeviceState::Idle);
    assert!(!booted.journal.contains(&Call::PlaySound(Sound::Success)));
    assert!(booted
        .handle_call(|app| app.has_protocol()));
}

#[test]
fn boot_stops_after_flashing_new_firmware() {
    let booted = boot(
        |ota| {
            ota.then_check(VersionCheck {
                current_version: VERSION.to_string(),
                firmware: Some(FirmwareCandidate {
                    version: "1.1.0".to_string(),
                    url: "https://ota.sim.local/xiaozhi-1.1.0.bin".to_string(),
                }),
                activation: None,
                has_server_time: true,
            })
        },
        |_| {},
    );

    assert_eq!(booted.device.version_check(), &VersionCheckOutcome::Rebooting);
    assert!(booted.journal.contains(&Call::Restart));
    assert!(!booted.journal.contains(&Call::ProtocolStart));
}

#[test]
fn boot_reads_the_server_reply() {
    let booted = boot(
        |ota| {
            ota.then_response(&serde_json::json!({
                "firmware": {"version": VERSION, "url": "https://ota.sim.local/xiaozhi-1.0.0.bin"},
                "server_time": {"timestamp": 1_700_000_000_000u64, "timezone_offset": 480}
            }))
        },
        |_| {},
    );

    assert!(matches!(
        booted.device.version_check(),
        VersionCheckOutcome::Ready(check) if check.firmware.is_none()
    ));
    assert!(!booted
        .journal
        .calls()
        .iter()
        .any(|call| matches!(call, Call::Upgrade(_))));
    assert!(booted.handle_call(|app| app.has_server_time()));
}

#[test]
fn server_messages_flow_after_boot() {
    let booted = boot(|ota| ota, |_| {});
    let handle = booted.device.handle().clone();

    handle.toggle_chat_state();
    booted
        .server
        .deliver_json(&serde_json::json!({"type": "tts", "state": "start"}));
    handle.call(|_| ()).expect("dispatcher");

    assert_eq!(handle.state(), DeviceState::Speaking);
    assert!(booted.server.is_opened());
}

impl Booted {
    fn handle_call<R: Send + 'static>(
        &self,
        f: impl FnOnce(&mut xiaozhi::Application) -> R + Send + 'static,
    ) -> R {
        self.device.handle().call(f).expect("dispatcher")
    }
}
