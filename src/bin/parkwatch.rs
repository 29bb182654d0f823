//! parkwatch - parking-space occupancy monitor
//!
//! This daemon:
//! 1. Loads the runtime config and the spot coordinate store
//! 2. Opens the frame source (looping file, live stream, or `stub://` scene)
//! 3. Classifies every spot on every frame and tracks the monitored set
//! 4. Dispatches transition events to the configured notifiers
//! 5. Writes the latest report / annotated snapshots when configured
//! 6. Stops on Ctrl-C or after `--max-frames`

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use std::io::IsTerminal;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};

use parkwatch::config::MonitorSelection;
use parkwatch::ingest::{open_source, SceneConfig};
use parkwatch::pipeline::{FrameLoopConfig, StopReason};
use parkwatch::{
    control, FrameLoop, JsonLinesNotifier, LogNotifier, MonitorConfig, NotifierSet,
    Preprocessor, SnapshotSink, SpotEvaluator, SpotStore, StatusFileSink,
};

#[path = "../ui.rs"]
mod ui;

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Path to a TOML config file (falls back to PARKWATCH_CONFIG).
    #[arg(long)]
    config: Option<PathBuf>,
    /// Frame source URL; overrides source.url (e.g. carPark.mp4, rtsp://cam/1, stub://lot).
    #[arg(long)]
    source: Option<String>,
    /// Spot coordinate store; overrides spots.store.
    #[arg(long)]
    store: Option<PathBuf>,
    /// Spots to monitor at startup: "all", "none", or ids like "1,3".
    #[arg(long)]
    monitor: Option<String>,
    /// Stop after this many frames.
    #[arg(long)]
    max_frames: Option<u64>,
    /// Read watch commands from stdin ("watch 1 2", "watch all", "watch none", "status").
    #[arg(long)]
    stdin_control: bool,
    /// UI mode for stderr progress (auto|plain|pretty)
    #[arg(long, default_value = "auto", value_name = "MODE")]
    ui: String,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let is_tty = std::io::stderr().is_terminal();
    let stdout_is_tty = std::io::stdout().is_terminal();
    let ui = ui::Ui::from_args(Some(&args.ui), is_tty, !stdout_is_tty);

    let mut cfg = {
        let _stage = ui.stage("Load config");
        let mut cfg = MonitorConfig::load(args.config.as_deref())?;
        if let Some(url) = &args.source {
            cfg.source.url = url.clone();
        }
        if let Some(store) = &args.store {
            cfg.spots.store = store.clone();
        }
        if let Some(monitor) = &args.monitor {
            cfg.monitor = MonitorSelection::parse(monitor)?;
        }
        cfg.validate()?;
        cfg
    };

    let store = {
        let _stage = ui.stage("Load spot store");
        SpotStore::load(&cfg.spots.store)?
    };
    let layout = store.layout(cfg.spots.size);
    if layout.is_empty() {
        log::warn!(
            "spot store {} is empty; counts will stay at 0/0",
            cfg.spots.store.display()
        );
    }

    let mode = cfg.source.resolved_mode();
    let source = {
        let _stage = ui.stage("Open source");
        let scene = SceneConfig::new(cfg.source.width, cfg.source.height).with_layout(&layout);
        let mut source = open_source(&cfg.source.url, mode, cfg.source.target_fps, scene)?;
        source
            .connect()
            .with_context(|| format!("failed to connect to {}", cfg.source.url))?;
        source
    };
    log::info!(
        "source {} connected ({:?}), {} spots of {}x{}, threshold {}",
        cfg.source.url,
        mode,
        layout.len(),
        cfg.spots.size.width,
        cfg.spots.size.height,
        cfg.detection.occupancy_threshold
    );

    let notifiers = build_notifiers(&cfg)?;
    log::info!("notifiers: {}", notifiers.names().join(", "));

    let loop_config = FrameLoopConfig {
        target_fps: cfg.source.target_fps,
        out_of_bounds: cfg.detection.out_of_bounds,
        max_frames: args.max_frames,
    };
    let mut frame_loop = FrameLoop::new(source, layout, loop_config)
        .with_preprocessor(Preprocessor::new(cfg.preprocess.clone())?)
        .with_evaluator(SpotEvaluator::new(cfg.detection.occupancy_threshold))
        .with_notifiers(notifiers);

    if let Some(path) = cfg.output.status_path.take() {
        log::info!("status file: {}", path.display());
        frame_loop = frame_loop.with_sink(StatusFileSink::new(path));
    }
    if let Some(dir) = cfg.output.snapshot_dir.take() {
        log::info!(
            "snapshots: {} every {} frames",
            dir.display(),
            cfg.output.snapshot_every
        );
        frame_loop = frame_loop.with_sink(SnapshotSink::new(dir, cfg.output.snapshot_every)?);
    }
    if let Some(status_line) = ui.status_line() {
        frame_loop = frame_loop.with_sink(status_line);
    }

    if let Some(command) = cfg.monitor.to_command() {
        frame_loop.apply_command(command);
    }
    if args.stdin_control {
        let (tx, rx) = mpsc::channel();
        control::spawn_stdin_control(tx);
        frame_loop = frame_loop.with_commands(rx);
        log::info!("reading watch commands from stdin");
    }

    let stop = Arc::new(AtomicBool::new(false));
    let handler_stop = Arc::clone(&stop);
    ctrlc::set_handler(move || {
        handler_stop.store(true, Ordering::SeqCst);
    })
    .map_err(|e| anyhow!("error setting Ctrl-C handler: {}", e))?;

    log::info!("parkwatch running (Ctrl-C to stop)");
    let summary = frame_loop.run(&stop)?;

    match summary.stop_reason {
        StopReason::Requested => log::info!("stop requested"),
        StopReason::FrameLimit => log::info!("frame limit reached"),
    }
    if !summary.skipped_spots.is_empty() {
        let skipped: Vec<String> = summary
            .skipped_spots
            .iter()
            .map(|id| id.get().to_string())
            .collect();
        log::warn!("skipped out-of-bounds spots: {}", skipped.join(", "));
    }
    println!(
        "frames={} events={} rewinds={}",
        summary.frames_processed, summary.events_emitted, summary.rewinds
    );
    if let Some(report) = &summary.last_report {
        println!("{}", report.summary());
    }
    Ok(())
}

fn build_notifiers(cfg: &MonitorConfig) -> Result<NotifierSet> {
    let mut notifiers = NotifierSet::new().with(LogNotifier);
    if let Some(path) = &cfg.output.events_path {
        notifiers.register(JsonLinesNotifier::append(path)?);
    }
    if let Some(mqtt) = &cfg.mqtt {
        #[cfg(feature = "notify-mqtt")]
        {
            let notifier = parkwatch::notify::MqttNotifier::connect(
                &parkwatch::notify::MqttNotifierConfig {
                    broker: mqtt.broker.clone(),
                    topic_prefix: mqtt.topic_prefix.clone(),
                    client_id: mqtt.client_id.clone(),
                },
            )?;
            notifiers.register(notifier);
        }
        #[cfg(not(feature = "notify-mqtt"))]
        log::warn!(
            "[mqtt] broker {} configured but parkwatch was built without notify-mqtt",
            mqtt.broker
        );
    }
    Ok(notifiers)
}
