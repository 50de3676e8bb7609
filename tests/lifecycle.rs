mod common;

use std::time::Duration;

use xiaozhi::application::AppHandle;
use xiaozhi::audio::Sound;
use xiaozhi::common::enums::DeviceState;
use xiaozhi::common::state_watch::StateWatch;
use xiaozhi::config::RetryPolicy;
use xiaozhi::lang;
use xiaozhi::lifecycle::assets::DOWNLOAD_URL_KEY;
use xiaozhi::lifecycle::{
    check_assets_version, check_new_version, spawn_manual_upgrade, upgrade_firmware, Sleeper,
    UpgradeOutcome, VersionCheckOutcome,
};
use xiaozhi::ota::{ActivationError, ActivationPrompt, FirmwareCandidate, VersionCheck};
use xiaozhi::setting::{MemorySettings, Settings};
use xiaozhi::sim::{Call, InstantSleeper, SimAssets, SimOta, SimRig, Wait};

const VERSION: &str = "1.0.0";

fn activation_check(code: &str) -> VersionCheck {
    VersionCheck {
        current_version: VERSION.to_string(),
        firmware: None,
        activation: Some(ActivationPrompt {
            code: Some(code.to_string()),
            message: format!("xiaozhi.me\n{}", code),
            challenge: None,
        }),
        has_server_time: true,
    }
}

fn upgrade_check(url: &str) -> VersionCheck {
    VersionCheck {
        current_version: VERSION.to_string(),
        firmware: Some(FirmwareCandidate {
            version: "1.1.0".to_string(),
            url: url.to_string(),
        }),
        activation: None,
        has_server_time: true,
    }
}

fn running() -> common::Running {
    common::init_logging();
    let mut rig = SimRig::with_protocol();
    rig.app.set_device_state(DeviceState::Idle);
    rig.journal.clear();
    common::spawn(rig)
}

#[test]
fn version_check_backs_off_then_gives_up() {
    let running = running();
    let mut ota = SimOta::new(running.journal.clone(), VERSION).failing_checks(10);
    let sleeper = InstantSleeper::new();

    let outcome = check_new_version(
        &running.handle,
        &mut ota,
        &sleeper,
        &RetryPolicy::default(),
    )
    .expect("dispatcher");

    assert_eq!(outcome, VersionCheckOutcome::GaveUp);
    assert_eq!(running.count(&Call::CheckVersion), 10);
    assert_eq!(
        sleeper.backoff_secs(),
        vec![10, 20, 40, 80, 160, 320, 640, 1280, 2560]
    );
    assert!(running
        .journal
        .contains(&Call::Emotion("cloud_slash".to_string())));
}

#[test]
fn version_check_recovers_after_transient_failures() {
    let running = running();
    let mut ota = SimOta::new(running.journal.clone(), VERSION).failing_checks(3);
    let sleeper = InstantSleeper::new();

    let outcome = check_new_version(
        &running.handle,
        &mut ota,
        &sleeper,
        &RetryPolicy::default(),
    )
    .expect("dispatcher");

    assert!(matches!(outcome, VersionCheckOutcome::Ready(_)));
    assert_eq!(sleeper.backoff_secs(), vec![10, 20, 40]);
    assert_eq!(running.count(&Call::MarkValid), 1);
    assert_eq!(running.handle.state(), DeviceState::Activating);
}

#[test]
fn activation_polls_until_the_code_is_confirmed() {
    let running = running();
    let mut ota = SimOta::new(running.journal.clone(), VERSION)
        .then_check(activation_check("4217"))
        .activation_results([
            Err(ActivationError::Timeout),
            Err(ActivationError::Failed("bad challenge".to_string())),
            Ok(()),
        ]);
    let sleeper = InstantSleeper::new();

    let outcome = check_new_version(
        &running.handle,
        &mut ota,
        &sleeper,
        &RetryPolicy::default(),
    )
    .expect("dispatcher");

    assert!(matches!(outcome, VersionCheckOutcome::Ready(check) if !check.has_activation()));
    assert_eq!(running.count(&Call::Activate), 3);
    assert_eq!(running.count(&Call::CheckVersion), 2);
    assert_eq!(
        sleeper.waits(),
        vec![
            Wait::UntilIdle(Duration::from_secs(3)),
            Wait::UntilIdle(Duration::from_secs(10)),
        ]
    );

    let sounds = running
        .journal
        .filtered(|call| matches!(call, Call::PlaySound(_)));
    assert_eq!(
        sounds,
        vec![
            Call::PlaySound(Sound::Activation),
            Call::PlaySound(Sound::Digit(4)),
            Call::PlaySound(Sound::Digit(2)),
            Call::PlaySound(Sound::Digit(1)),
            Call::PlaySound(Sound::Digit(7)),
        ]
    );
}

#[test]
fn activation_gives_up_after_the_attempt_ceiling() {
    let running = running();
    let mut ota = SimOta::new(running.journal.clone(), VERSION)
        .then_check(activation_check("1"))
        .activation_results((0..10).map(|_| Err(ActivationError::Timeout)));
    let sleeper = InstantSleeper::new();

    check_new_version(
        &running.handle,
        &mut ota,
        &sleeper,
        &RetryPolicy::default(),
    )
    .expect("dispatcher");

    assert_eq!(running.count(&Call::Activate), 10);
    assert_eq!(
        sleeper.waits(),
        vec![Wait::UntilIdle(Duration::from_secs(3)); 10]
    );
}

/// Moves the device to `Idle` during the first interruptible wait, as the
/// chat button would.
struct CancelOnFirstWait {
    handle: AppHandle,
    inner: InstantSleeper,
}

impl Sleeper for CancelOnFirstWait {
    fn sleep(&self, duration: Duration) {
        self.inner.sleep(duration);
    }

    fn sleep_until_idle(&self, duration: Duration, watch: &StateWatch) -> bool {
        if self.inner.waits().is_empty() {
            self.handle.toggle_chat_state();
            self.handle.call(|_| ()).expect("dispatcher");
        }
        self.inner.sleep_until_idle(duration, watch)
    }
}

#[test]
fn idle_cancels_activation_polling() {
    let running = running();
    let mut ota = SimOta::new(running.journal.clone(), VERSION)
        .then_check(activation_check("1"))
        .activation_results((0..10).map(|_| Err(ActivationError::Timeout)));
    let sleeper = CancelOnFirstWait {
        handle: running.handle.clone(),
        inner: InstantSleeper::new(),
    };

    let outcome = check_new_version(
        &running.handle,
        &mut ota,
        &sleeper,
        &RetryPolicy::default(),
    )
    .expect("dispatcher");

    assert!(matches!(outcome, VersionCheckOutcome::Ready(_)));
    assert_eq!(running.count(&Call::Activate), 1);
}

#[test]
fn new_firmware_is_flashed_and_the_board_restarts() {
    let running = running();
    let url = "https://ota.sim.local/xiaozhi-1.1.0.bin";
    let mut ota = SimOta::new(running.journal.clone(), VERSION).then_check(upgrade_check(url));
    let sleeper = InstantSleeper::new();

    let outcome = check_new_version(
        &running.handle,
        &mut ota,
        &sleeper,
        &RetryPolicy::default(),
    )
    .expect("dispatcher");
    running.flush();

    assert_eq!(outcome, VersionCheckOutcome::Rebooting);
    assert_eq!(running.handle.state(), DeviceState::Upgrading);
    assert!(running.journal.contains(&Call::Upgrade(url.to_string())));
    assert!(!running.journal.contains(&Call::MarkValid));
    assert!(running.journal.contains(&Call::ChatMessage(
        "system".to_string(),
        format!("{}1.1.0", lang::NEW_VERSION)
    )));
    assert_eq!(running.journal.calls().last(), Some(&Call::Restart));
}

#[test]
fn failed_upgrade_restores_audio_and_returns_to_idle() {
    let running = running();
    let mut ota = SimOta::new(running.journal.clone(), VERSION).upgrade_fails("checksum mismatch");
    let sleeper = InstantSleeper::new();

    let outcome = upgrade_firmware(
        &running.handle,
        &mut ota,
        &sleeper,
        &RetryPolicy::default(),
        "https://ota.sim.local/broken.bin",
        "1.1.0",
    )
    .expect("dispatcher");
    running.flush();

    assert_eq!(outcome, UpgradeOutcome::Failed);
    assert_eq!(running.handle.state(), DeviceState::Idle);
    assert!(running.audio.is_running());
    assert!(!running.journal.contains(&Call::Restart));
    assert_eq!(
        running
            .journal
            .filtered(|call| matches!(call, Call::PowerSave(_)))
            .last(),
        Some(&Call::PowerSave(true))
    );
    assert!(running.journal.contains(&Call::ChatMessage(
        "system".to_string(),
        lang::UPGRADE_FAILED.to_string()
    )));
}

#[test]
fn failed_upgrade_during_version_check_keeps_the_current_firmware() {
    let running = running();
    let mut ota = SimOta::new(running.journal.clone(), VERSION)
        .then_check(upgrade_check("https://ota.sim.local/broken.bin"))
        .upgrade_fails("connection reset");
    let sleeper = InstantSleeper::new();

    let outcome = check_new_version(
        &running.handle,
        &mut ota,
        &sleeper,
        &RetryPolicy::default(),
    )
    .expect("dispatcher");

    assert!(matches!(outcome, VersionCheckOutcome::Ready(_)));
    assert_eq!(running.count(&Call::MarkValid), 1);
    assert!(!running.journal.contains(&Call::Restart));
}

#[test]
fn manual_upgrade_runs_on_its_own_thread() {
    let running = running();
    let ota: Box<dyn xiaozhi::ota::OtaClient> =
        Box::new(SimOta::new(running.journal.clone(), VERSION));
    let sleeper = std::sync::Arc::new(InstantSleeper::new());

    let thread = spawn_manual_upgrade(
        running.handle.clone(),
        std::sync::Arc::new(std::sync::Mutex::new(ota)),
        sleeper,
        RetryPolicy::default(),
        "https://ota.sim.local/manual.bin".to_string(),
    )
    .expect("spawn");

    assert_eq!(thread.join().expect("upgrade thread"), Ok(UpgradeOutcome::Rebooting));
    running.flush();
    assert!(running.journal.contains(&Call::ChatMessage(
        "system".to_string(),
        format!("{}{}", lang::NEW_VERSION, lang::MANUAL_UPGRADE)
    )));
}

#[test]
fn pending_assets_are_downloaded_then_applied() {
    let running = running();
    let mut settings =
        MemorySettings::new().with_value(DOWNLOAD_URL_KEY, "https://assets.sim.local/a.bin");
    let mut assets = SimAssets::new(running.journal.clone());

    check_assets_version(
        &running.handle,
        &mut assets,
        &mut settings,
        &InstantSleeper::new(),
        &RetryPolicy::default(),
    )
    .expect("dispatcher");
    running.flush();

    assert_eq!(settings.get_string(DOWNLOAD_URL_KEY), None);
    assert_eq!(
        running
            .journal
            .filtered(|call| matches!(call, Call::AssetsDownload(_) | Call::AssetsApply)),
        vec![
            Call::AssetsDownload("https://assets.sim.local/a.bin".to_string()),
            Call::AssetsApply,
        ]
    );
    assert!(running
        .journal
        .contains(&Call::Emotion("microchip_ai".to_string())));
}

#[test]
fn failed_asset_download_skips_apply() {
    let running = running();
    let mut settings =
        MemorySettings::new().with_value(DOWNLOAD_URL_KEY, "https://assets.sim.local/a.bin");
    let mut assets = SimAssets::new(running.journal.clone()).failing_download();

    check_assets_version(
        &running.handle,
        &mut assets,
        &mut settings,
        &InstantSleeper::new(),
        &RetryPolicy::default(),
    )
    .expect("dispatcher");
    running.flush();

    assert!(!running.journal.contains(&Call::AssetsApply));
    assert!(running.journal.contains(&Call::ChatMessage(
        "system".to_string(),
        lang::DOWNLOAD_ASSETS_FAILED.to_string()
    )));
    assert_eq!(settings.get_string(DOWNLOAD_URL_KEY), None);
}

#[test]
fn invalid_asset_partition_is_left_alone() {
    let running = running();
    let mut assets = SimAssets::new(running.journal.clone()).invalid();

    check_assets_version(
        &running.handle,
        &mut assets,
        &mut MemorySettings::new(),
        &InstantSleeper::new(),
        &RetryPolicy::default(),
    )
    .expect("dispatcher");
    running.flush();

    assert!(running.journal.calls().is_empty());
}
