//! precland CLI: run the landing-target pipeline against a camera or a replay directory.

use clap::{Parser, ValueEnum};
use log::{error, info, warn, LevelFilter};
use precland::aruco::ArucoDetector;
use precland::core::LogConfig;
use precland::capture::open_frame_source;
use precland::link::{LinkConfig, LinkError, TelemetryLink};
use precland::pipeline::{Pipeline, PipelineOptions, StopSignal};
use precland::viz::{LogRenderer, VectorSink};
use precland::{CameraConfig, CaptureMethod, PadConfig, PositionAggregator};
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

type CliError = Box<dyn std::error::Error>;
type CliResult<T> = Result<T, CliError>;

#[derive(Parser)]
#[command(name = "precland")]
#[command(about = "Detect landing pad markers and report the pad position to the flight controller")]
#[command(version)]
struct Cli {
    /// Camera calibration file (JSON).
    #[arg(long, default_value = "calibration.json")]
    calibration: PathBuf,

    /// Landing pad geometry file (JSON).
    #[arg(long, default_value = "pad.json")]
    pad: PathBuf,

    /// Replay still images from this directory instead of the configured camera.
    #[arg(long)]
    replay: Option<PathBuf>,

    /// Send LANDING_TARGET reports over MAVLink.
    #[arg(long)]
    telemetry: bool,

    /// Abort when the telemetry link cannot be established.
    #[arg(long, requires = "telemetry")]
    telemetry_required: bool,

    /// Serial device of the flight controller link.
    #[arg(long, default_value = "/dev/serial0")]
    serial: String,

    /// Serial baud rate.
    #[arg(long, default_value_t = 57600)]
    baud: u32,

    /// Seconds to wait for the first flight controller heartbeat (default: forever).
    #[arg(long, value_parser = parse_seconds)]
    heartbeat_timeout: Option<Duration>,

    /// Our MAVLink system id.
    #[arg(long, default_value_t = 1)]
    system_id: u8,

    /// Our MAVLink component id.
    #[arg(long, default_value_t = 191)]
    component_id: u8,

    /// Log the body-frame vectors from a background visualization thread.
    #[arg(long)]
    visualize: bool,

    /// Stop after this many frames.
    #[arg(long)]
    max_frames: Option<u64>,

    /// Log verbosity.
    #[arg(long, value_enum, default_value_t = LogLevelArg::Info)]
    log_level: LogLevelArg,

    /// Verbosity of the telemetry link (default: same as --log-level).
    #[arg(long, value_enum)]
    link_log_level: Option<LogLevelArg>,

    /// Emit JSON log lines (needs the `tracing` feature).
    #[arg(long)]
    json_logs: bool,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum LogLevelArg {
    Off,
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl From<LogLevelArg> for LevelFilter {
    fn from(level: LogLevelArg) -> Self {
        match level {
            LogLevelArg::Off => LevelFilter::Off,
            LogLevelArg::Error => LevelFilter::Error,
            LogLevelArg::Warn => LevelFilter::Warn,
            LogLevelArg::Info => LevelFilter::Info,
            LogLevelArg::Debug => LevelFilter::Debug,
            LogLevelArg::Trace => LevelFilter::Trace,
        }
    }
}

fn parse_seconds(raw: &str) -> Result<Duration, String> {
    let secs: f64 = raw.parse().map_err(|e| format!("{e}"))?;
    Duration::try_from_secs_f64(secs).map_err(|e| format!("{e}"))
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(&cli);

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e}");
            eprintln!("precland: {e}");
            ExitCode::FAILURE
        }
    }
}

fn init_logging(cli: &Cli) {
    let mut config = LogConfig::new(cli.log_level.into());
    if let Some(link) = cli.link_log_level {
        config = config.with_module("precland_link", link.into());
    }
    #[cfg(feature = "tracing")]
    {
        if cli.json_logs {
            precland::core::init_tracing(true, &config);
            return;
        }
    }
    let _ = precland::core::init(config);
    if cli.json_logs {
        warn!("built without the `tracing` feature; --json-logs ignored");
    }
}

fn run(cli: &Cli) -> CliResult<()> {
    let mut camera = CameraConfig::load(&cli.calibration)
        .map_err(|e| format!("calibration {}: {e}", cli.calibration.display()))?;
    if let Some(dir) = &cli.replay {
        camera.capture = CaptureMethod::Replay { dir: dir.clone() };
    }
    let pad = PadConfig::load(&cli.pad).map_err(|e| format!("pad {}: {e}", cli.pad.display()))?;
    info!(
        "pad: {} markers, payload {}, dictionary {}",
        pad.geometry.len(),
        pad.geometry.payload_id(),
        pad.dictionary.name
    );

    let detector = ArucoDetector::new(&pad.dictionary, camera.detector.clone())?;
    let (width, height) = camera.calibration.resolution();
    let source = open_frame_source(&camera.capture, width, height)
        .map_err(|e| format!("camera: {e}"))?;

    let stop = StopSignal::new();
    if let Err(e) = stop.install_handler() {
        warn!("signal handler not installed: {e}");
    }

    let aggregator = PositionAggregator::new(camera.calibration, pad.geometry, camera.mount);
    let options = PipelineOptions {
        max_frames: cli.max_frames,
        ..PipelineOptions::default()
    };
    let mut pipeline = Pipeline::new(source, detector, aggregator, options);

    if cli.telemetry {
        match open_link(cli, &stop) {
            Ok(Some(link)) => pipeline = pipeline.with_link(link),
            Ok(None) => return Ok(()),
            Err(e) if cli.telemetry_required => return Err(e.into()),
            Err(e) => warn!("telemetry disabled: {e}"),
        }
    }

    if cli.visualize {
        let mut sink = VectorSink::default();
        sink.start(LogRenderer);
        pipeline = pipeline.with_visualization(sink);
    }

    pipeline.run(&stop)?;
    Ok(())
}

/// Open the serial link and wait for the flight controller.
/// `Ok(None)` means the wait was interrupted by a stop signal.
fn open_link(cli: &Cli, stop: &StopSignal) -> Result<Option<TelemetryLink>, LinkError> {
    let mut link = TelemetryLink::new(LinkConfig {
        system_id: cli.system_id,
        component_id: cli.component_id,
        ..LinkConfig::default()
    });
    link.open_serial(&cli.serial, cli.baud)?;
    match link.wait_for_heartbeat(cli.heartbeat_timeout, || stop.is_stopped()) {
        Ok(_) => Ok(Some(link)),
        Err(LinkError::Cancelled) => {
            info!("stopped while waiting for heartbeat");
            Ok(None)
        }
        Err(e) => Err(e),
    }
}
