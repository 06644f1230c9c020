use air_cursor::core_modules::detector::{DetectorSource, ObservationReceiver, spawn_detector};
use air_cursor::core_modules::parameters::{ParameterStore, Settings};
#[cfg(feature = "desktop")]
use air_cursor::core_modules::pointer::EnigoPointer;
use air_cursor::core_modules::pointer::{LoggingPointer, PointerDevice};
use air_cursor::session::{self, SessionReport};
use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use tracing::info;
#[cfg(not(feature = "desktop"))]
use tracing::warn;
use tracing_subscriber::EnvFilter;

/// Drives the pointer from hand-landmark frames.
///
/// Frames are JSON lines, one per camera frame, read from a file, from a
/// detector command's stdout, or from stdin.
#[derive(Debug, Parser)]
#[command(name = "air_cursor", version, about)]
struct Cli {
    /// TOML settings file. Missing keys use defaults.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Recorded detector frames to replay.
    #[arg(long, conflicts_with = "detector_cmd")]
    input: Option<PathBuf>,

    /// Detector command to spawn, e.g. "python3 hand_detect.py".
    #[arg(long)]
    detector_cmd: Option<String>,

    /// Log pointer commands instead of moving the real pointer.
    #[arg(long)]
    dry_run: bool,

    /// Override a setting, e.g. --set move_sensitivity=95. Repeatable.
    #[arg(long = "set", value_name = "KEY=VALUE")]
    overrides: Vec<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("air_cursor=info")))
        .init();

    let cli = Cli::parse();

    let mut settings = match &cli.config {
        Some(path) => Settings::load(path)?,
        None => Settings::default(),
    };
    for assignment in &cli.overrides {
        settings.apply_assignment(assignment)?;
    }
    let store = ParameterStore::from_settings(settings).context("invalid settings")?;

    let source = match (cli.input, cli.detector_cmd) {
        (Some(path), _) => DetectorSource::File(path),
        (None, Some(command)) => DetectorSource::Command(command),
        (None, None) => DetectorSource::Stdin,
    };
    let (observations, detector) = spawn_detector(source).await?;

    let report = run_session(cli.dry_run, store, observations).await;
    detector.abort();

    let report = report?;
    info!(
        frames_processed = report.frames_processed,
        frames_dropped = report.frames_dropped,
        snapshots_applied = report.snapshots_applied,
        "done"
    );
    Ok(())
}

#[cfg(feature = "desktop")]
async fn run_session(dry_run: bool, store: ParameterStore, observations: ObservationReceiver) -> Result<SessionReport> {
    if dry_run {
        return run_dry(store, observations).await;
    }
    run(store, observations, EnigoPointer::new).await
}

#[cfg(not(feature = "desktop"))]
async fn run_session(dry_run: bool, store: ParameterStore, observations: ObservationReceiver) -> Result<SessionReport> {
    if !dry_run {
        warn!("built without the `desktop` feature, pointer commands are only logged");
    }
    run_dry(store, observations).await
}

async fn run_dry(store: ParameterStore, observations: ObservationReceiver) -> Result<SessionReport> {
    let center = store.current().screen_center();
    run(store, observations, move || Ok(LoggingPointer::new(center))).await
}

/// Runs a session until Ctrl-C or until the detector stream ends.
async fn run<D, F>(
    store: ParameterStore,
    observations: ObservationReceiver,
    make_device: F,
) -> Result<SessionReport>
where
    D: PointerDevice + 'static,
    F: FnOnce() -> Result<D> + Send + 'static,
{
    let handle = session::start(store, observations, make_device).await?;
    handle.run_until(tokio::signal::ctrl_c()).await
}
