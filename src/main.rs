use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use signal_hook::consts::{SIGINT, SIGTERM};
use tracing::info;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use tripwire_edge::dispatch::HttpSink;
use tripwire_edge::operator::spawn_stdin_reader;
use tripwire_edge::{
    CaptureLoop, DetectionSource, Dispatcher, PipelineConfig, RpicamSource, ThreadedSource,
};

/// How long the capture loop waits for a frame before checking for commands and signals.
const FRAME_POLL: Duration = Duration::from_millis(250);

/// Edge people counter: camera -> detector -> tracker -> tripwire -> server.
#[derive(Debug, Parser)]
#[command(name = "tripwire-edge", version)]
struct Args {
    /// TOML configuration file; defaults apply when omitted
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Send to `server.local_url` instead of `server.url`
    #[arg(long)]
    debug: bool,

    /// Override the server base address
    #[arg(long)]
    server_url: Option<String>,
}

fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => PipelineConfig::from_file(path)
            .with_context(|| format!("failed to load config {}", path.display()))?,
        None => PipelineConfig::default(),
    };
    config.apply_env();
    if let Some(url) = &args.server_url {
        config.server.url = url.clone();
    }

    let server_url = config.server_url(args.debug).to_string();
    if config.server.fetch_tripwire {
        let sink = HttpSink::new(config.http_sink_config(&server_url));
        config.refresh_tripwire(&sink);
    }
    config.validate().context("invalid configuration")?;
    info!(device_id = %config.device_id, %server_url, debug = args.debug, "starting");

    // Model before camera: a bad model should not leave a camera process behind.
    let detector = load_detector(&config)?;
    let camera = RpicamSource::spawn(config.camera.clone()).context("failed to start camera")?;
    let source = ThreadedSource::spawn(camera, 2, FRAME_POLL)
        .context("failed to start camera reader")?;

    let dispatcher = Dispatcher::spawn(
        HttpSink::new(config.http_sink_config(&server_url)),
        config.dispatcher_config(),
    )
    .context("failed to start dispatch worker")?;

    let shutdown = Arc::new(AtomicBool::new(false));
    for signal in [SIGINT, SIGTERM] {
        signal_hook::flag::register(signal, Arc::clone(&shutdown))
            .context("failed to install signal handler")?;
    }

    let (command_tx, command_rx) = crossbeam_channel::unbounded();
    spawn_stdin_reader(command_tx).context("failed to start operator console")?;
    println!("Ready. Commands: r = register, c = cancel registration, q = quit");

    let mut capture = CaptureLoop::new(source, detector, dispatcher, &config)?
        .with_commands(command_rx)
        .with_shutdown(shutdown);
    let result = capture.run();
    let (stats, dispatch) = capture.finish();

    info!(
        frames = stats.frames,
        processed = stats.processed,
        enters = stats.enters,
        exits = stats.exits,
        delivered = dispatch.delivered,
        failed = dispatch.failed,
        "shut down"
    );
    result?;
    Ok(())
}

#[cfg(feature = "onnx")]
fn load_detector(config: &PipelineConfig) -> Result<Box<dyn DetectionSource>> {
    let detector = tripwire_edge::OnnxDetector::load(
        &config.detector.model_path,
        config.detector.input_name.as_str(),
        config.detector.output_name.as_str(),
        config.decoder(),
    )
    .context("failed to load detection model")?;
    Ok(Box::new(detector))
}

#[cfg(not(feature = "onnx"))]
fn load_detector(config: &PipelineConfig) -> Result<Box<dyn DetectionSource>> {
    anyhow::bail!(
        "cannot load {}: built without an inference backend (enable the `onnx` feature)",
        config.detector.model_path.display()
    )
}
