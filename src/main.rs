//! camsync console tool
//!
//! Seeds an in-process broker from camera/position definition files, then
//! walks a second session through the mirroring and locking flows so the
//! whole pipeline can be inspected end to end:
//!
//! ```bash
//! # built-in sample fleet
//! cargo run -- demo
//!
//! # seed from definition files and dump the mirrored state
//! cargo run -- dump --cameras cameras.yaml --positions positions.yaml
//! ```

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use serde::Deserialize;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use camsync::broker::LocalBroker;
use camsync::commands::CameraCommands;
use camsync::positions::{LEVEL_ADMIN, LEVEL_ROOT};
use camsync::settings::Settings;
use camsync::ConsoleState;

#[derive(Parser, Debug)]
#[command(name = "camsync")]
#[command(about = "Broker-synchronized routing console state, simulated end to end")]
struct Args {
    /// Settings file (YAML). CAMSYNC_CONFIG and CAMSYNC_* env vars apply too.
    #[arg(long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Two-session mirroring and locking walkthrough
    Demo {
        /// Camera definition YAML (list of cameras)
        #[arg(long)]
        cameras: Option<PathBuf>,
        /// Position definition YAML (list of positions)
        #[arg(long)]
        positions: Option<PathBuf>,
    },
    /// Seed a broker snapshot and dump the mirrored state as JSON
    Dump {
        #[arg(long)]
        cameras: Option<PathBuf>,
        #[arg(long)]
        positions: Option<PathBuf>,
    },
}

/// One camera in a definition file.
#[derive(Debug, Clone, Deserialize)]
struct CameraSeed {
    name: String,
    #[serde(rename = "type")]
    camera_type: String,
    address: String,
    rtspurl: Option<String>,
    audiourl: Option<String>,
    jpgurl: Option<String>,
    pingurl: Option<String>,
    #[serde(default)]
    ispublic: bool,
    #[serde(default)]
    ishidden: bool,
    #[serde(default)]
    nothumb: bool,
    #[serde(default)]
    noaudio: bool,
}

/// One position in a definition file.
#[derive(Debug, Clone, Deserialize)]
struct PositionSeed {
    name: String,
    #[serde(default)]
    isaudio: bool,
    nice_name: Option<String>,
}

fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "camsync=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();

    let mut settings = match &args.config {
        Some(path) => Settings::load_from_yaml_file(path)
            .with_context(|| format!("loading settings from {}", path.display()))?,
        None => Settings::load().context("loading settings")?,
    };
    settings.apply_env_overrides();

    match args.command {
        Command::Demo { cameras, positions } => run_demo(settings, cameras, positions),
        Command::Dump { cameras, positions } => run_dump(settings, cameras, positions),
    }
}

fn run_demo(
    settings: Settings,
    camera_file: Option<PathBuf>,
    position_file: Option<PathBuf>,
) -> Result<()> {
    let broker = LocalBroker::new();

    // The operator session owns the seeded state.
    let operator = broker.connect(Some("operator"));
    let operator_state = ConsoleState::new(&operator.handle(), settings.clone());
    seed(&operator_state, &settings, camera_file, position_file)?;
    operator.process_events_for(Duration::from_millis(200), true);

    // A fresh session warm-starts purely from retained traffic.
    println!("{}", "== warm start ==".bold());
    let viewer = broker.connect(Some("viewer"));
    let viewer_state = ConsoleState::new(&viewer.handle(), settings.clone());
    let topics = viewer.wait_for_initial_state(settings.startup_idle_window());
    println!("settled after first messages on {topics} topics");
    check(
        "viewer mirrors the camera set",
        viewer_state.cameras.names() == operator_state.cameras.names(),
    );
    check(
        "viewer mirrors the position set",
        viewer_state.positions.names() == operator_state.positions.names(),
    );

    // Locking walkthrough on the first position.
    println!("{}", "== position locking ==".bold());
    let position_name = viewer_state
        .positions
        .names()
        .first()
        .cloned()
        .context("no positions seeded")?;

    viewer_state
        .positions
        .lock_position(&position_name, LEVEL_ROOT, None)?;
    viewer.process_events_for(Duration::from_millis(100), true);
    check(
        &format!("{position_name} locked against admins"),
        viewer_state.positions.is_locked(&position_name, LEVEL_ADMIN)?,
    );
    check(
        &format!("{position_name} never locked against root"),
        !viewer_state.positions.is_locked(&position_name, LEVEL_ROOT)?,
    );

    let locked_until = viewer_state
        .positions
        .position(&position_name)
        .context("position vanished")?
        .locked_until();
    viewer_state
        .positions
        .lock_position(&position_name, LEVEL_ADMIN, Some(5.0))?;
    let after = viewer_state
        .positions
        .position(&position_name)
        .context("position vanished")?
        .locked_until();
    check("shorter admin lock cannot shorten it", locked_until == after);

    // The echo makes the lock visible to the other session too.
    operator.process_events_for(Duration::from_millis(100), true);
    check(
        "operator sees the same lock via the broker echo",
        operator_state.positions.is_locked(&position_name, LEVEL_ADMIN)?,
    );

    // Fire-and-forget PTZ command round trip.
    println!("{}", "== camera commands ==".bold());
    if let Some(camera_name) = viewer_state.cameras.names().first().cloned() {
        let delivered = Arc::new(AtomicBool::new(false));
        let delivered2 = Arc::clone(&delivered);
        operator_state.camera_commands.channel().on(
            CameraCommands::GOTO_PTZ_POSITION,
            move |params| {
                println!(
                    "  operator received goto_ptz_position: {} -> preset {}",
                    params["camera_name"], params["position_number"]
                );
                delivered2.store(true, Ordering::SeqCst);
                Ok(())
            },
        )?;
        viewer_state
            .camera_commands
            .goto_ptz_position(&camera_name, 2)?;
        operator.process_events_for(Duration::from_millis(100), true);
        check(
            "command envelope delivered",
            delivered.load(Ordering::SeqCst),
        );
    }

    println!("{}", "== mirrored state ==".bold());
    println!("{}", serde_json::to_string_pretty(&viewer_state.to_record()?)?);
    Ok(())
}

fn run_dump(
    settings: Settings,
    camera_file: Option<PathBuf>,
    position_file: Option<PathBuf>,
) -> Result<()> {
    let broker = LocalBroker::new();
    let session = broker.connect(Some("seeder"));
    let state = ConsoleState::new(&session.handle(), settings.clone());
    seed(&state, &settings, camera_file, position_file)?;
    session.process_events_for(Duration::from_millis(200), true);

    println!("{}", serde_json::to_string_pretty(&state.to_record()?)?);
    Ok(())
}

fn seed(
    state: &ConsoleState,
    settings: &Settings,
    camera_file: Option<PathBuf>,
    position_file: Option<PathBuf>,
) -> Result<()> {
    let camera_seeds: Vec<CameraSeed> = match camera_file {
        Some(path) => serde_yaml::from_str(&std::fs::read_to_string(&path)?)
            .with_context(|| format!("parsing {}", path.display()))?,
        None => sample_cameras(),
    };
    let position_seeds: Vec<PositionSeed> = match position_file {
        Some(path) => serde_yaml::from_str(&std::fs::read_to_string(&path)?)
            .with_context(|| format!("parsing {}", path.display()))?,
        None => sample_positions(),
    };

    let user = settings.camera_user.as_deref().unwrap_or("admin");
    let pass = settings.camera_pass.as_deref().unwrap_or("admin");

    for seed in camera_seeds {
        let camera = state.cameras.add_or_get_by_name(&seed.name)?;
        camera.set_camera_type(&seed.camera_type)?;
        camera.set_address(&seed.address)?;
        let rtspurl = seed
            .rtspurl
            .unwrap_or_else(|| make_rtsp_url(&seed.camera_type, &seed.address, user, pass));
        let audiourl = seed.audiourl.unwrap_or_else(|| rtspurl.clone());
        let jpgurl = seed
            .jpgurl
            .unwrap_or_else(|| make_jpg_url(&seed.camera_type, &seed.address, user, pass));
        camera.set_rtsp_url(&rtspurl)?;
        camera.set_audio_url(&audiourl)?;
        camera.set_jpg_url(&jpgurl)?;
        if let Some(pingurl) = seed.pingurl {
            camera.set_ping_url(&pingurl)?;
        }
        camera.set_is_public(seed.ispublic)?;
        camera.set_is_hidden(seed.ishidden)?;
        camera.set_no_thumb(seed.nothumb)?;
        camera.set_no_audio(seed.noaudio)?;
        tracing::info!(camera = %seed.name, "seeded camera");
    }

    for seed in position_seeds {
        let position = state.positions.add_or_get_by_name(&seed.name)?;
        position.set_is_audio(seed.isaudio)?;
        position.set_locked_until(0.0)?;
        position.set_lock_level("")?;
        if let Some(nice_name) = seed.nice_name {
            position.set_nice_name(&nice_name)?;
        }
        tracing::info!(position = %seed.name, "seeded position");
    }
    Ok(())
}

/// Per-vendor RTSP path conventions.
fn make_rtsp_url(camera_type: &str, address: &str, user: &str, pass: &str) -> String {
    match camera_type {
        "ANPVIZ" => format!("rtsp://{user}:{pass}@{address}/Streaming/Channels/101"),
        "MOTO" => format!("rtsp://{user}:{pass}@{address}/stream0"),
        "AMCREST" | "LOREX" | "GENERIC" => {
            format!("rtsp://{user}:{pass}@{address}/cam/realmonitor?channel=1&subtype=0")
        }
        _ => format!("rtsp://{user}:{pass}@{address}/"),
    }
}

fn make_jpg_url(camera_type: &str, address: &str, user: &str, pass: &str) -> String {
    match camera_type {
        "ANPVIZ" => format!("http://{user}:{pass}@{address}/ISAPI/Streaming/channels/102/picture"),
        "MOTO" => format!(
            "http://{user}:{pass}@{address}/cgi-bin/snapshot.cgi?stream=1&username={user}&password={pass}"
        ),
        "AMCREST" | "LOREX" | "GENERIC" => {
            format!("http://{user}:{pass}@{address}/cgi-bin/snapshot.cgi?1")
        }
        _ => format!("http://{user}:{pass}@{address}/"),
    }
}

fn sample_cameras() -> Vec<CameraSeed> {
    vec![
        CameraSeed {
            name: "gate".to_string(),
            camera_type: "ANPVIZ".to_string(),
            address: "10.0.0.11".to_string(),
            rtspurl: None,
            audiourl: None,
            jpgurl: None,
            pingurl: None,
            ispublic: true,
            ishidden: false,
            nothumb: false,
            noaudio: false,
        },
        CameraSeed {
            name: "lobby".to_string(),
            camera_type: "AMCREST".to_string(),
            address: "10.0.0.12".to_string(),
            rtspurl: None,
            audiourl: None,
            jpgurl: None,
            pingurl: None,
            ispublic: false,
            ishidden: false,
            nothumb: false,
            noaudio: true,
        },
    ]
}

fn sample_positions() -> Vec<PositionSeed> {
    vec![
        PositionSeed {
            name: "P1".to_string(),
            isaudio: false,
            nice_name: Some("Main".to_string()),
        },
        PositionSeed {
            name: "P2".to_string(),
            isaudio: true,
            nice_name: Some("Audio".to_string()),
        },
    ]
}

fn check(label: &str, ok: bool) {
    let status = if ok { "OK".green() } else { "FAIL".red() };
    println!("  [{status}] {label}");
}
