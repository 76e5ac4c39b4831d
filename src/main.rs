// This file is part of the NVR core recording pipeline.
// Command-line entry point, adapted from Moonfire NVR's `src/main.rs` and
// `src/cmds/run/mod.rs` (bpaf argument parsing, the `base::shutdown`-driven
// double-signal graceful/immediate shutdown dance).

use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use bpaf::{Bpaf, Parser};
use tracing::{debug, error, info};

mod artifact;
mod bus;
mod config;
mod dispatcher;
mod mediatool;
mod recorder;
mod segment;

use config::Config;
use dispatcher::Dispatcher;

fn parse_config_path() -> impl Parser<PathBuf> {
    bpaf::long("config")
        .short('c')
        .help("Path to the YAML camera configuration file.")
        .argument::<PathBuf>("PATH")
        .fallback(PathBuf::from("conf.yaml"))
}

fn parse_base_dir() -> impl Parser<Option<PathBuf>> {
    bpaf::long("base-dir")
        .help("Overrides both the RAM buffer and output directories, \
               relative to this single base (used in integration tests).")
        .argument::<PathBuf>("PATH")
        .optional()
}

/// Multi-camera network video recorder: records RTSP streams into a RAM
/// ring buffer and finalizes pre-roll/post-roll clips on MQTT detection
/// events.
#[derive(Bpaf, Debug)]
#[bpaf(options, version(env!("CARGO_PKG_VERSION")))]
struct Args {
    #[bpaf(external(parse_config_path))]
    config: PathBuf,

    #[bpaf(external(parse_base_dir))]
    base_dir: Option<PathBuf>,

    /// Path to the `ffmpeg` binary.
    #[bpaf(long, argument("PATH"), fallback("ffmpeg".to_owned()))]
    ffmpeg_bin: String,

    /// Path to the `ffprobe` binary.
    #[bpaf(long, argument("PATH"), fallback("ffprobe".to_owned()))]
    ffprobe_bin: String,
}

fn main() {
    base::tracing_setup::install();

    let progname = std::env::args_os()
        .next()
        .map(PathBuf::from)
        .as_deref()
        .and_then(Path::file_name)
        .and_then(OsStr::to_str)
        .unwrap_or(env!("CARGO_PKG_NAME"))
        .to_owned();

    let args = match args()
        .fallback_to_usage()
        .run_inner(bpaf::Args::current_args().set_name(&progname))
    {
        Ok(a) => a,
        Err(e) => std::process::exit(e.exit_code()),
    };
    tracing::trace!("parsed command-line arguments: {args:#?}");

    match run(args) {
        Err(e) => {
            error!(err = %e, "exiting due to error");
            std::process::exit(1);
        }
        Ok(()) => {
            debug!("exiting cleanly");
        }
    }
}

fn run(args: Args) -> anyhow::Result<()> {
    let config =
        Config::load(&args.config).with_context(|| format!("loading {}", args.config.display()))?;
    let config = match &args.base_dir {
        Some(base_dir) => config.with_base_dir(base_dir),
        None => config,
    };

    let dispatcher = Arc::new(Dispatcher::build(&config));
    let clocks = base::clock::RealClocks;
    let (shutdown_tx, shutdown_rx) = base::shutdown::channel();

    info!(
        cameras = config.cameras.len(),
        topics = dispatcher.topics().count(),
        "starting recorders"
    );
    let mut handles = dispatcher.spawn_all(
        &args.ffmpeg_bin,
        &args.ffprobe_bin,
        &config.ram_base,
        &config.output_base,
        Duration::from_secs(config.pre_roll_seconds),
        Duration::from_secs(config.post_roll_seconds),
        config.segment_duration_seconds,
        &shutdown_rx,
        &clocks,
    );

    let bus_handle = {
        let dispatcher = dispatcher.clone();
        let mqtt_config = config.mqtt.clone();
        let shutdown_rx = shutdown_rx.clone();
        let clocks = clocks.clone();
        std::thread::Builder::new()
            .name("mqtt".to_owned())
            .spawn(move || bus::run(&mqtt_config, &dispatcher, shutdown_rx, clocks))
            .context("spawning mqtt thread")?
    };
    handles.push(bus_handle);

    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_io()
        .build()
        .context("building tokio runtime")?;
    rt.block_on(wait_for_shutdown_signal())?;

    // Dropping the sender broadcasts shutdown to every recorder thread and
    // the MQTT client; join them all before exiting so in-flight ffmpeg
    // children are reaped rather than orphaned.
    drop(shutdown_tx);
    for handle in handles {
        let _ = handle.join();
    }
    Ok(())
}

async fn wait_for_shutdown_signal() -> anyhow::Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut int = signal(SignalKind::interrupt())?;
    let mut term = signal(SignalKind::terminate())?;
    tokio::select! {
        _ = int.recv() => info!("received SIGINT; shutting down gracefully"),
        _ = term.recv() => info!("received SIGTERM; shutting down gracefully"),
    }
    Ok(())
}
