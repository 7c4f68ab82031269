pub mod core;
pub mod models;

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use crate::core::autopilot::AutopilotLoop;
use crate::core::config::Config;
use crate::core::events::EventBus;
use crate::core::frame_source::DirectoryFrameSource;
use crate::core::recorder::Recorder;
use crate::core::session::PilotSession;
use crate::core::vehicle::LoggingSink;
use crate::models::motion::PilotEvent;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

/// Command line of the `navpilot` binary
#[derive(Debug, Parser)]
#[command(name = "navpilot", version, about = "Vision autopilot and training-data recorder")]
pub struct Args {
    /// Settings file (defaults to ~/.navpilot/config/settings.json)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Pilot model, overriding the configured model path
    #[arg(long)]
    pub model: Option<PathBuf>,

    /// Directory of image files to replay as the camera stream
    #[arg(long)]
    pub frames: Option<PathBuf>,

    /// Replay rate for --frames
    #[arg(long, default_value_t = 10)]
    pub fps: u32,

    /// Record (motion, frame) samples while running
    #[arg(long)]
    pub record: bool,

    /// Drive the vehicle with the pilot model
    #[arg(long)]
    pub autopilot: bool,
}

/// Parse the command line and run until the frame source ends or Ctrl-C
pub fn run() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("navpilot=info")),
        )
        .init();

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to start tokio runtime")?;

    runtime.block_on(run_with(args))
}

/// Wire configuration, model, recorder and autopilot together over a frame source
pub async fn run_with(args: Args) -> Result<()> {
    let mut config = match &args.config {
        Some(path) => Config::load_from(path),
        None => Config::load(),
    }
    .map_err(|e| anyhow!("Failed to load configuration: {}", e))?;

    if let Some(model) = &args.model {
        config.model_path = model.clone();
    }
    config
        .validate()
        .map_err(|e| anyhow!("Invalid configuration: {}", e))?;
    info!("Configuration loaded (tick {}ms, skip {})", config.tick_period_ms, config.skip_count);

    let events = EventBus::new(config.event_capacity);
    let listener = tokio::spawn(log_events(events.subscribe()));

    let recorder = Arc::new(
        Recorder::from_config(&config, events.clone()).context("Failed to set up recorder")?,
    );
    let session = Arc::new(PilotSession::new(recorder.clone(), events.clone()));

    let pilot = if args.autopilot {
        Some(start_autopilot(&config, &session, &events)?)
    } else {
        None
    };

    if args.record {
        let run = recorder.start().context("Failed to start recording")?;
        info!("Recording into {}", recorder.storage_path().join(format!("run{}", run)).display());
    }

    match &args.frames {
        Some(dir) => {
            let mut source = DirectoryFrameSource::open(dir, args.fps)
                .with_context(|| format!("Failed to open frame directory {}", dir.display()))?;
            tokio::select! {
                _ = session.pump(&mut source) => {}
                _ = tokio::signal::ctrl_c() => info!("Interrupted"),
            }
        }
        None => {
            info!("No frame source given; waiting for Ctrl-C");
            tokio::signal::ctrl_c()
                .await
                .context("Failed to listen for Ctrl-C")?;
        }
    }

    if let Some(pilot) = &pilot {
        pilot.shutdown();
        let stats = pilot.stats();
        info!(
            "Autopilot: {} ticks, {} moves, {} without frame, {} failed, {} skipped",
            stats.ticks, stats.moves, stats.empty, stats.failures, stats.skipped
        );
    }

    let drain = recorder.clone();
    if let Some(report) = tokio::task::spawn_blocking(move || drain.stop_and_wait())
        .await
        .context("Recorder shutdown panicked")?
    {
        info!(
            "Run {} saved to {} ({} written, {} dropped)",
            report.run_number,
            report.output_directory.display(),
            report.written,
            report.dropped
        );
    }

    listener.abort();
    Ok(())
}

fn start_autopilot(
    config: &Config,
    session: &PilotSession,
    events: &EventBus,
) -> Result<Arc<AutopilotLoop>> {
    let pilot = AutopilotLoop::load(
        config,
        session.mailbox().clone(),
        session.motion().clone(),
        Arc::new(LoggingSink),
        events,
    )
    .with_context(|| format!("Failed to load pilot model {}", config.model_path.display()))?;

    pilot.start();
    Ok(pilot)
}

async fn log_events(mut rx: tokio::sync::broadcast::Receiver<PilotEvent>) {
    loop {
        match rx.recv().await {
            Ok(PilotEvent::PilotInitError { reason }) => error!("Pilot failed to initialize: {}", reason),
            Ok(event) => debug!("{:?}", event),
            Err(RecvError::Lagged(missed)) => warn!("Event listener lagged, {} events missed", missed),
            Err(RecvError::Closed) => break,
        }
    }
}
