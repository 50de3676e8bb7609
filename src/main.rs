use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use clap::Parser;
use log::{error, info};
use serde_json::{json, Value};
use tracing_subscriber::EnvFilter;

use xiaozhi::common::enums::AecMode;
use xiaozhi::lifecycle::{Sleeper, ThreadSleeper};
use xiaozhi::ota::ActivationError;
use xiaozhi::setting::MemorySettings;
use xiaozhi::sim::{
    InstantSleeper, Journal, SimAssets, SimAudio, SimBoard, SimCompanion, SimConnector, SimMcp,
    SimOta,
};
use xiaozhi::startup::{self, Startup};
use xiaozhi::{AppConfig, Application, Collaborators};

const FIRMWARE_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Runs the device orchestrator against simulated peripherals and reads
/// commands from stdin.
#[derive(Parser, Debug)]
#[command(name = "xiaozhi-sim", version, about)]
struct Args {
    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Number of version checks that fail before the server answers
    #[arg(long, default_value_t = 0)]
    fail_checks: usize,

    /// Require activation with this code before booting
    #[arg(long)]
    activation_code: Option<String>,

    /// Skip lifecycle waits (backoff, settle delays)
    #[arg(long)]
    fast: bool,
}

#[derive(Debug, PartialEq)]
enum Command {
    Toggle,
    Listen,
    Stop,
    Wake(String),
    Json(Value),
    Text(String),
    Aec(AecMode),
    Upgrade(String),
    Reboot,
    State,
    Quit,
}

impl FromStr for Command {
    type Err = anyhow::Error;

    fn from_str(line: &str) -> Result<Self> {
        let line = line.trim();
        let (name, rest) = match line.split_once(char::is_whitespace) {
            Some((name, rest)) => (name, rest.trim()),
            None => (line, ""),
        };

        let command = match name {
            "toggle" => Command::Toggle,
            "listen" => Command::Listen,
            "stop" => Command::Stop,
            "wake" if rest.is_empty() => Command::Wake("你好小智".to_string()),
            "wake" => Command::Wake(rest.to_string()),
            "json" => Command::Json(serde_json::from_str(rest).context("invalid json")?),
            "text" if !rest.is_empty() => Command::Text(rest.to_string()),
            "aec" => Command::Aec(match rest {
                "off" => AecMode::Off,
                "device" => AecMode::DeviceSide,
                "server" => AecMode::ServerSide,
                other => bail!("unknown aec mode `{}` (off|device|server)", other),
            }),
            "upgrade" if !rest.is_empty() => Command::Upgrade(rest.to_string()),
            "reboot" => Command::Reboot,
            "state" => Command::State,
            "quit" | "exit" => Command::Quit,
            other => return Err(anyhow!("unknown command `{}`", other)),
        };
        Ok(command)
    }
}

fn init_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();
}

fn scripted_ota(journal: &Journal, args: &Args) -> SimOta {
    let mut ota = SimOta::new(journal.clone(), FIRMWARE_VERSION).failing_checks(args.fail_checks);
    if let Some(code) = &args.activation_code {
        ota = ota
            .then_response(&json!({
                "activation": {"code": code, "message": format!("xiaozhi.me\n{}", code)},
                "firmware": {"version": FIRMWARE_VERSION, "url": ""},
                "server_time": {"timestamp": 0, "timezone_offset": 480}
            }))
            .activation_results([Err(ActivationError::Timeout), Ok(())]);
    }
    ota
}

fn main() -> Result<()> {
    init_logging();
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => AppConfig::load(path)?,
        None => AppConfig::default(),
    };

    let journal = Journal::new();
    let (audio, _audio_control) = SimAudio::new(journal.clone());
    let (connector, server) = SimConnector::new(journal.clone());
    let app = Application::new(
        Collaborators {
            board: Box::new(SimBoard::new(journal.clone())),
            audio: Box::new(audio),
            mcp: Box::new(SimMcp::new(journal.clone())),
            settings: Box::new(MemorySettings::new()),
            companion: Some(Box::new(SimCompanion::new(journal.clone()))),
        },
        config,
    );

    let sleeper: Arc<dyn Sleeper> = if args.fast {
        Arc::new(InstantSleeper::new())
    } else {
        Arc::new(ThreadSleeper)
    };
    let device = startup::start(
        app,
        Startup {
            ota: Box::new(scripted_ota(&journal, &args)),
            assets: Box::new(SimAssets::new(journal.clone())),
            asset_settings: Box::new(MemorySettings::new()),
            connector: Box::new(connector),
            sleeper,
        },
    )?;
    info!("Booted: {:?}", device.version_check());

    let handle = device.handle().clone();
    let stdin = io::stdin();
    print!("> ");
    io::stdout().flush()?;
    for line in stdin.lock().lines() {
        let line = line?;
        if line.trim().is_empty() {
            print!("> ");
            io::stdout().flush()?;
            continue;
        }

        match line.parse::<Command>() {
            Ok(Command::Toggle) => handle.toggle_chat_state(),
            Ok(Command::Listen) => handle.start_listening(),
            Ok(Command::Stop) => handle.stop_listening(),
            Ok(Command::Wake(word)) => handle.invoke_wake_word(&word),
            Ok(Command::Json(message)) => server.deliver_json(&message),
            Ok(Command::Text(text)) => handle.send_text_to_server(&text),
            Ok(Command::Aec(mode)) => handle.set_aec_mode(mode),
            Ok(Command::Upgrade(url)) => {
                if let Err(e) = device.upgrade(&url) {
                    error!("Failed to start upgrade: {:?}", e);
                }
            }
            Ok(Command::Reboot) => handle.reboot(),
            Ok(Command::State) => println!("{}", handle.state()),
            Ok(Command::Quit) => break,
            Err(e) => error!("{}", e),
        }
        print!("> ");
        io::stdout().flush()?;
    }

    Ok(())
}
