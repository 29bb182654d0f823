//! demo - end-to-end synthetic run for parkwatch
//!
//! Builds a grid of spots, feeds a `stub://` scene through the full frame loop
//! with every spot monitored, then prints the transitions and final counts.
//! No video or coordinate store needed.

use anyhow::{anyhow, Result};
use clap::Parser;
use std::io::IsTerminal;
use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::sync::mpsc;

use parkwatch::ingest::{FileConfig, FileSource, SceneConfig};
use parkwatch::notify::{headline, ChannelNotifier};
use parkwatch::pipeline::FrameLoopConfig;
use parkwatch::{
    FrameLoop, FrameSource, LogNotifier, MonitorCommand, NotifierSet, SnapshotSink, SpotSize,
    SpotStore, StatusFileSink,
};

#[path = "../ui.rs"]
mod ui;

const MARGIN: u32 = 20;
/// Room above the grid for the count banner.
const BANNER_HEIGHT: u32 = 60;
const GAP_X: u32 = 2;
const GAP_Y: u32 = 8;
/// Upper bound on rows and cols, keeping the scene a sane size.
const MAX_GRID: u32 = 32;

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Rows of spots.
    #[arg(long, default_value_t = 2)]
    rows: u32,
    /// Spots per row.
    #[arg(long, default_value_t = 4)]
    cols: u32,
    /// Frames to process.
    #[arg(long, default_value_t = 240)]
    frames: u64,
    /// Frames a vehicle stays parked (and a bay stays empty).
    #[arg(long, default_value_t = 30)]
    period: u64,
    /// Scene length before it loops back to frame zero.
    #[arg(long, default_value_t = 100)]
    scene_length: u64,
    /// Optional directory for annotated PNG snapshots.
    #[arg(long)]
    snapshots: Option<PathBuf>,
    /// Write snapshots every N frames.
    #[arg(long, default_value_t = 30)]
    snapshot_every: u64,
    /// Optional path for the latest report as JSON.
    #[arg(long)]
    status: Option<PathBuf>,
    /// UI mode for stderr progress (auto|plain|pretty)
    #[arg(long, default_value = "auto", value_name = "MODE")]
    ui: String,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();
    if !(1..=MAX_GRID).contains(&args.rows) || !(1..=MAX_GRID).contains(&args.cols) {
        return Err(anyhow!("rows and cols must be between 1 and {}", MAX_GRID));
    }
    if args.period == 0 || args.scene_length == 0 {
        return Err(anyhow!("period and scene length must be >= 1"));
    }
    let is_tty = std::io::stderr().is_terminal();
    let stdout_is_tty = std::io::stdout().is_terminal();
    let ui = ui::Ui::from_args(Some(&args.ui), is_tty, !stdout_is_tty);

    let size = SpotSize::default();
    let (layout, width, height) = {
        let _stage = ui.stage("Lay out spots");
        // In-memory store; nothing is written.
        let mut store = SpotStore::new("demo_spots.json");
        for row in 0..args.rows {
            for col in 0..args.cols {
                store.add(
                    MARGIN + col * (size.width + GAP_X),
                    BANNER_HEIGHT + row * (size.height + GAP_Y),
                );
            }
        }
        let width = 2 * MARGIN + args.cols * (size.width + GAP_X);
        let height = BANNER_HEIGHT + MARGIN + args.rows * (size.height + GAP_Y);
        (store.layout(size), width, height)
    };

    let source = {
        let _stage = ui.stage("Open synthetic source");
        let mut scene = SceneConfig::new(width, height).with_layout(&layout);
        scene.period = args.period;
        scene.length = Some(args.scene_length);
        let mut source = FileSource::new(FileConfig {
            path: "stub://demo".to_string(),
            target_fps: 0,
            scene,
        })?;
        source.connect()?;
        source
    };
    log::info!(
        "demo: {} spots in a {}x{} scene, {} frames",
        layout.len(),
        width,
        height,
        args.frames
    );

    let (tx, rx) = mpsc::channel();
    let notifiers = NotifierSet::new()
        .with(LogNotifier)
        .with(ChannelNotifier::new(tx));
    let config = FrameLoopConfig {
        target_fps: 0,
        max_frames: Some(args.frames),
        ..FrameLoopConfig::default()
    };
    let mut frame_loop = FrameLoop::new(Box::new(source), layout, config).with_notifiers(notifiers);
    if let Some(dir) = &args.snapshots {
        frame_loop = frame_loop.with_sink(SnapshotSink::new(dir, args.snapshot_every)?);
    }
    if let Some(path) = &args.status {
        frame_loop = frame_loop.with_sink(StatusFileSink::new(path));
    }
    if let Some(status_line) = ui.status_line() {
        frame_loop = frame_loop.with_sink(status_line);
    }
    frame_loop.apply_command(MonitorCommand::WatchAll);

    let summary = frame_loop.run(&AtomicBool::new(false))?;
    drop(frame_loop);

    println!("=== Transitions ===");
    for (frame_index, event) in rx.try_iter() {
        println!("frame {:>4}: {}", frame_index, headline(&event));
    }

    println!("=== Summary ===");
    println!("frames processed: {}", summary.frames_processed);
    println!("events emitted:   {}", summary.events_emitted);
    println!("source rewinds:   {}", summary.rewinds);
    if let Some(report) = &summary.last_report {
        println!(
            "final: FREE {} / OCCUPIED {} / TOTAL {}",
            report.free_count, report.occupied_count, report.total
        );
    }
    if let Some(dir) = &args.snapshots {
        println!("snapshots in {}", dir.display());
    }
    Ok(())
}
