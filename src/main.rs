//! obscam - Observatory camera controller CLI
//!
//! Main entry point. Every subcommand works against one controller: the one
//! given with `--controller`, else the active `cameras` controller.

use clap::{Args, Parser, Subcommand};
use obscam::{
    camera_client::{CameraClient, CameraSettings, FileFormat},
    controller_registry::{ControllerId, NewController, Role},
    realtime_hub::HubMessage,
    sequence_orchestrator::{ResumeOutcome, SequenceOrchestrator, SequenceRequest},
    state::{AppConfig, AppState},
};
use serde::Serialize;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "obscam", version, about = "Observatory camera controller client")]
struct Cli {
    /// Controller id (defaults to the active cameras controller)
    #[arg(long, global = true)]
    controller: Option<ControllerId>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Manage registered controllers
    #[command(subcommand)]
    Controllers(ControllersCommand),
    /// Fetch camera / sensor status
    Status {
        /// Keep polling every cameras controller until Ctrl-C
        #[arg(long)]
        watch: bool,
    },
    /// Connect the cameras
    Connect,
    /// Disconnect the cameras
    Disconnect,
    /// Live stream control
    #[command(subcommand)]
    Stream(StreamCommand),
    /// Update camera settings, then report the settled status
    Settings(SettingsArgs),
    /// Capture one photo
    Snapshot {
        #[arg(long)]
        out: PathBuf,
    },
    /// Capture sequences
    #[command(subcommand)]
    Sequence(SequenceCommand),
}

impl Command {
    fn name(&self) -> &'static str {
        match self {
            Command::Controllers(_) => "controllers",
            Command::Status { .. } => "status",
            Command::Connect => "connect",
            Command::Disconnect => "disconnect",
            Command::Stream(_) => "stream",
            Command::Settings(_) => "settings",
            Command::Snapshot { .. } => "snapshot",
            Command::Sequence(_) => "sequence",
        }
    }
}

#[derive(Subcommand)]
enum ControllersCommand {
    List,
    Add {
        #[arg(long)]
        name: String,
        #[arg(long)]
        url: String,
        #[arg(long)]
        token: Option<String>,
        /// Capability role (repeatable; none = every known role)
        #[arg(long = "role")]
        roles: Vec<String>,
    },
    Remove {
        id: ControllerId,
    },
    /// Make a controller the active one for a role
    Pin {
        id: ControllerId,
        #[arg(long, default_value = Role::CAMERAS)]
        role: String,
    },
}

#[derive(Subcommand)]
enum StreamCommand {
    Start,
    Stop,
    /// Read the MJPEG stream and report (optionally save) frames
    Watch {
        /// Stop after this many frames
        #[arg(long)]
        frames: Option<u64>,
        /// Directory to save frames into
        #[arg(long)]
        out: Option<PathBuf>,
    },
}

#[derive(Args)]
struct SettingsArgs {
    #[arg(long)]
    gain: Option<i64>,
    /// Photo exposure in seconds
    #[arg(long)]
    photo_exposure: Option<f64>,
    /// Video exposure in seconds
    #[arg(long)]
    video_exposure: Option<f64>,
    #[arg(long)]
    image_format: Option<String>,
    #[arg(long)]
    wb_r: Option<i64>,
    #[arg(long)]
    wb_b: Option<i64>,
}

impl From<SettingsArgs> for CameraSettings {
    fn from(args: SettingsArgs) -> Self {
        Self {
            gain: args.gain,
            photo_exposure_seconds: args.photo_exposure,
            video_exposure_seconds: args.video_exposure,
            image_format: args.image_format,
            wb_r: args.wb_r,
            wb_b: args.wb_b,
        }
    }
}

#[derive(Subcommand)]
enum SequenceCommand {
    /// Run a capture sequence locally (Ctrl-C cancels)
    Run {
        #[arg(long)]
        dir: PathBuf,
        #[arg(long)]
        count: u32,
        /// Seconds between photos; 0 = one batch call
        #[arg(long, default_value_t = 0.0)]
        interval: f64,
        /// Exposure in seconds (applied to the camera before the run)
        #[arg(long)]
        exposure: Option<f64>,
        /// Gain (applied to the camera before the run)
        #[arg(long)]
        gain: Option<i64>,
        #[arg(long, default_value_t = FileFormat::Jpeg)]
        format: FileFormat,
    },
    /// Remote sequence status
    Status,
    /// Stop the remote sequence
    Stop,
    /// Recompute progress of a run interrupted by a restart
    ResumeCheck,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "obscam=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    let config = AppConfig::default();
    tracing::debug!(
        state_dir = %config.state_dir.display(),
        http_timeout_secs = config.http_timeout.as_secs(),
        settle_delay_ms = config.settle_delay.as_millis() as u64,
        "Configuration loaded"
    );

    let state = AppState::init(config).await?;

    let name = cli.command.name();
    let result = dispatch(&state, cli).await;
    if let Err(e) = &result {
        state.record_failure(name, format!("{:#}", e)).await;
    }
    result
}

async fn dispatch(state: &AppState, cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Command::Controllers(command) => controllers(state, command).await,
        Command::Status { watch: true } => watch_status(state).await,
        Command::Status { watch: false } => {
            let client = client(state, cli.controller).await?;
            print_json(&client.fetch_status().await?)
        }
        Command::Connect => {
            let client = client(state, cli.controller).await?;
            print_json(&client.connect().await?)
        }
        Command::Disconnect => {
            let client = client(state, cli.controller).await?;
            print_json(&client.disconnect().await?)
        }
        Command::Stream(command) => stream(state, cli.controller, command).await,
        Command::Settings(args) => {
            let client = client(state, cli.controller).await?;
            let settings = CameraSettings::from(args);
            let (applied, status) = client.update_settings_and_refresh(&settings).await?;
            print_json(&serde_json::json!({
                "applied": applied,
                "status": status,
            }))
        }
        Command::Snapshot { out } => {
            let client = client(state, cli.controller).await?;
            let bytes = client.capture_snapshot().await?;
            tokio::fs::write(&out, &bytes).await?;
            tracing::info!(path = %out.display(), size = bytes.len(), "Snapshot saved");
            Ok(())
        }
        Command::Sequence(command) => sequence(state, cli.controller, command).await,
    }
}

async fn client(state: &AppState, id: Option<ControllerId>) -> anyhow::Result<CameraClient> {
    let endpoint = state.resolve_controller(id).await?;
    tracing::debug!(controller_id = %endpoint.id, name = %endpoint.name, "Using controller");
    Ok(state.client_for(&endpoint)?)
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn controllers(state: &AppState, command: ControllersCommand) -> anyhow::Result<()> {
    match command {
        ControllersCommand::List => {
            let list = state.controllers.list().await;
            let resolved = state.controllers.resolved().await;
            print_json(&serde_json::json!({
                "controllers": list,
                "active": resolved,
            }))
        }
        ControllersCommand::Add {
            name,
            url,
            token,
            roles,
        } => {
            let endpoint = state
                .controllers
                .add(NewController {
                    name,
                    base_url: url,
                    token,
                    roles: roles.iter().map(|r| Role::new(r)).collect(),
                })
                .await?;
            print_json(&endpoint)
        }
        ControllersCommand::Remove { id } => {
            let resolved = state.controllers.remove(&id).await?;
            state.camera_status.remove(&id).await;
            print_json(&resolved)
        }
        ControllersCommand::Pin { id, role } => {
            state.controllers.set_active(&Role::new(&role), &id).await?;
            print_json(&state.controllers.resolved().await)
        }
    }
}

async fn watch_status(state: &AppState) -> anyhow::Result<()> {
    let mut rx = state.realtime.subscribe();
    state.polling.start().await;

    loop {
        tokio::select! {
            message = rx.recv() => match message {
                Ok(HubMessage::CameraStatus(status)) => print_json(&status)?,
                Ok(HubMessage::LogEntry(entry)) => {
                    tracing::info!(module = %entry.module, severity = ?entry.severity, "{}", entry.message);
                }
                Ok(_) => {}
                Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::debug!(skipped = skipped, "Status watcher lagged");
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            },
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    state.polling.stop().await;
    Ok(())
}

async fn stream(
    state: &AppState,
    id: Option<ControllerId>,
    command: StreamCommand,
) -> anyhow::Result<()> {
    let client = client(state, id).await?;
    match command {
        StreamCommand::Start => print_json(&client.start_stream_and_refresh().await?),
        StreamCommand::Stop => print_json(&client.stop_stream_and_refresh().await?),
        StreamCommand::Watch { frames, out } => {
            if let Some(dir) = &out {
                tokio::fs::create_dir_all(dir).await?;
            }
            let mut stream = client.open_stream().await?;
            loop {
                let frame = tokio::select! {
                    frame = stream.next_frame() => frame?,
                    _ = tokio::signal::ctrl_c() => break,
                };
                let Some(frame) = frame else {
                    break;
                };
                let number = stream.frames_emitted();
                println!("frame {} ({} bytes)", number, frame.len());
                if let Some(dir) = &out {
                    tokio::fs::write(dir.join(format!("frame_{:06}.jpg", number)), &frame).await?;
                }
                if frames.is_some_and(|limit| number >= limit) {
                    break;
                }
            }
            tracing::info!(frames = stream.frames_emitted(), "Stream watch ended");
            Ok(())
        }
    }
}

async fn sequence(
    state: &AppState,
    id: Option<ControllerId>,
    command: SequenceCommand,
) -> anyhow::Result<()> {
    let endpoint = state.resolve_controller(id).await?;
    match command {
        SequenceCommand::Run {
            dir,
            count,
            interval,
            exposure,
            gain,
            format,
        } => {
            let client = state.client_for(&endpoint)?;
            let settings = CameraSettings {
                gain,
                photo_exposure_seconds: exposure,
                ..Default::default()
            };
            let applied = if settings.is_empty() {
                None
            } else {
                Some(client.update_settings(&settings).await?)
            };

            let request = SequenceRequest {
                save_dir: dir,
                count,
                interval_seconds: interval,
                exposure_seconds: applied
                    .as_ref()
                    .and_then(|ack| ack.exposure_seconds)
                    .or(exposure)
                    .unwrap_or(0.0),
                gain: applied.as_ref().and_then(|ack| ack.gain).or(gain).unwrap_or(0),
                file_format: format,
            };

            let orchestrator = state.orchestrator_for(&endpoint)?;
            run_sequence(state, &orchestrator, request).await
        }
        SequenceCommand::Status => {
            let client = state.client_for(&endpoint)?;
            print_json(&client.sequence_status().await?)
        }
        SequenceCommand::Stop => {
            let client = state.client_for(&endpoint)?;
            client.stop_sequence().await?;
            tracing::info!("Remote sequence stop requested");
            Ok(())
        }
        SequenceCommand::ResumeCheck => {
            let Some(checkpoint) = state.checkpoints().load().await? else {
                println!("no sequence in flight");
                return Ok(());
            };
            let orchestrator = state.orchestrator_for(&endpoint)?;
            match orchestrator.resume(checkpoint).await? {
                ResumeOutcome::Finished => {
                    println!("previous sequence presumed finished");
                    Ok(())
                }
                ResumeOutcome::Restarted(progress) => {
                    print_json(&progress)?;
                    follow_progress(state, &orchestrator).await
                }
            }
        }
    }
}

async fn run_sequence(
    state: &AppState,
    orchestrator: &SequenceOrchestrator,
    request: SequenceRequest,
) -> anyhow::Result<()> {
    let mut rx = state.realtime.subscribe();
    let mut handle = orchestrator.spawn(request).await?;

    let outcome = loop {
        tokio::select! {
            outcome = &mut handle => break outcome?,
            message = rx.recv() => {
                if let Ok(HubMessage::SequenceProgress(progress)) = message {
                    eprintln!(
                        "{}/{} photos, ~{:.0}%",
                        progress.current_count,
                        progress.total_count,
                        progress.progress_fraction * 100.0
                    );
                }
            }
            _ = tokio::signal::ctrl_c() => {
                orchestrator.cancel().await;
            }
        }
    };

    print_json(&outcome)
}

/// Follow a resumed estimate until it completes or Ctrl-C cancels it
async fn follow_progress(state: &AppState, orchestrator: &SequenceOrchestrator) -> anyhow::Result<()> {
    let mut rx = state.realtime.subscribe();
    while orchestrator.state().await.active {
        tokio::select! {
            message = rx.recv() => {
                if let Ok(HubMessage::SequenceProgress(progress)) = message {
                    eprintln!("~{:.0}%", progress.progress_fraction * 100.0);
                }
            }
            _ = tokio::signal::ctrl_c() => {
                orchestrator.cancel().await;
            }
        }
    }
    Ok(())
}
