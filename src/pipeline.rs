//! The frame loop.
//!
//! One thread, one frame at a time: acquire -> preprocess -> evaluate -> track ->
//! report -> dispatch. Monitoring commands are applied between frames, so the
//! tracker has a single writer.
//!
//! Source exhaustion and read failures are handled by source mode:
//! - `Looping`: rewind to frame zero. More than `MAX_CONSECUTIVE_REWINDS`
//!   rewinds without a good frame in between is fatal.
//! - `Live`: the run ends with an error.
//!
//! The spot layout is validated against the frame size once per resolution,
//! under the configured `OutOfBoundsPolicy`. A spot skipped at one resolution
//! stays out for the rest of the run, even if a later resolution would fit it.

use anyhow::{anyhow, Result};
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{Receiver, TryRecvError};
use std::time::{Duration, Instant};

use crate::control::MonitorCommand;
use crate::evaluate::{apply_bounds_policy, OutOfBoundsPolicy, SpotEvaluator};
use crate::frame::BgrFrame;
use crate::ingest::{FrameSource, SourceMode};
use crate::notify::NotifierSet;
use crate::preprocess::Preprocessor;
use crate::report::{build_report, FrameReport};
use crate::sink::ReportSink;
use crate::spots::SpotLayout;
use crate::tracker::OccupancyTracker;
use crate::{OccupancyError, SpotId};

/// Rewinds allowed in a row without a successfully processed frame.
pub const MAX_CONSECUTIVE_REWINDS: u32 = 3;

const HEALTH_LOG_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Clone, Debug)]
pub struct FrameLoopConfig {
    /// Frames per second to pace the loop at. 0 disables pacing.
    pub target_fps: u32,
    pub out_of_bounds: OutOfBoundsPolicy,
    /// Stop after this many processed frames.
    pub max_frames: Option<u64>,
}

impl Default for FrameLoopConfig {
    fn default() -> Self {
        Self {
            target_fps: 30,
            out_of_bounds: OutOfBoundsPolicy::Abort,
            max_frames: None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StopReason {
    /// The stop flag was raised.
    Requested,
    /// `max_frames` frames were processed.
    FrameLimit,
}

#[derive(Clone, Debug)]
pub struct RunSummary {
    pub frames_processed: u64,
    pub events_emitted: u64,
    pub rewinds: u64,
    pub skipped_spots: Vec<SpotId>,
    pub stop_reason: StopReason,
    pub last_report: Option<FrameReport>,
}

/// Layout checked against one frame resolution.
struct ActiveLayout {
    width: u32,
    height: u32,
    layout: SpotLayout,
}

pub struct FrameLoop {
    source: Box<dyn FrameSource>,
    layout: SpotLayout,
    active: Option<ActiveLayout>,
    preprocessor: Preprocessor,
    evaluator: SpotEvaluator,
    tracker: OccupancyTracker,
    notifiers: NotifierSet,
    sinks: Vec<Box<dyn ReportSink>>,
    commands: Option<Receiver<MonitorCommand>>,
    config: FrameLoopConfig,
    skipped: BTreeSet<SpotId>,
    frame_index: u64,
    events_emitted: u64,
    rewinds: u64,
    last_report: Option<FrameReport>,
}

impl FrameLoop {
    pub fn new(source: Box<dyn FrameSource>, layout: SpotLayout, config: FrameLoopConfig) -> Self {
        Self {
            source,
            layout,
            active: None,
            preprocessor: Preprocessor::default(),
            evaluator: SpotEvaluator::default(),
            tracker: OccupancyTracker::new(),
            notifiers: NotifierSet::new(),
            sinks: Vec::new(),
            commands: None,
            config,
            skipped: BTreeSet::new(),
            frame_index: 0,
            events_emitted: 0,
            rewinds: 0,
            last_report: None,
        }
    }

    pub fn with_preprocessor(mut self, preprocessor: Preprocessor) -> Self {
        self.preprocessor = preprocessor;
        self
    }

    pub fn with_evaluator(mut self, evaluator: SpotEvaluator) -> Self {
        self.evaluator = evaluator;
        self
    }

    pub fn with_notifiers(mut self, notifiers: NotifierSet) -> Self {
        self.notifiers = notifiers;
        self
    }

    pub fn with_sink<S: ReportSink + 'static>(mut self, sink: S) -> Self {
        self.sinks.push(Box::new(sink));
        self
    }

    /// Commands received here are applied before each frame.
    pub fn with_commands(mut self, commands: Receiver<MonitorCommand>) -> Self {
        self.commands = Some(commands);
        self
    }

    pub fn layout(&self) -> &SpotLayout {
        &self.layout
    }

    pub fn tracker(&self) -> &OccupancyTracker {
        &self.tracker
    }

    pub fn last_report(&self) -> Option<&FrameReport> {
        self.last_report.as_ref()
    }

    /// Apply a monitoring command to the tracker.
    pub fn apply_command(&mut self, command: MonitorCommand) {
        match command {
            MonitorCommand::Watch(ids) => {
                let (known, unknown): (Vec<SpotId>, Vec<SpotId>) =
                    ids.into_iter().partition(|id| self.layout.contains_id(*id));
                for id in &unknown {
                    log::warn!("ignoring unknown spot {}", id.get());
                }
                log::info!("monitoring {}", format_ids(&known));
                self.tracker.set_monitored(known);
            }
            MonitorCommand::WatchAll => {
                log::info!("monitoring all {} spots", self.layout.len());
                self.tracker.monitor_all(self.layout.ids());
            }
            MonitorCommand::WatchNone => {
                log::info!("monitoring cleared");
                self.tracker.clear_all();
            }
            MonitorCommand::Status => {
                let monitored: Vec<SpotId> = self.tracker.monitored().collect();
                match &self.last_report {
                    Some(report) => log::info!(
                        "frame {}: {} occupied {}, monitoring {}",
                        report.frame_index,
                        report.summary(),
                        report.occupied_count,
                        format_ids(&monitored)
                    ),
                    None => log::info!(
                        "no frame processed yet, monitoring {}",
                        format_ids(&monitored)
                    ),
                }
            }
        }
    }

    /// Run one frame through the core and dispatch its report.
    pub fn process_frame(&mut self, frame: &BgrFrame) -> Result<FrameReport> {
        let mask = self.preprocessor.transform(frame)?;
        self.ensure_layout(mask.width(), mask.height())?;
        let layout = match &self.active {
            Some(active) => &active.layout,
            None => return Err(anyhow!("spot layout not validated")),
        };

        let evaluation = self.evaluator.evaluate(&mask, layout.spots())?;
        let events = self.tracker.step(&evaluation.classifications);
        let report = build_report(self.frame_index, &evaluation, events);

        self.notifiers.dispatch(self.frame_index, &report.events);
        for sink in &mut self.sinks {
            if let Err(e) = sink.consume(&report, frame, layout) {
                log::warn!("sink {} failed: {:#}", sink.name(), e);
            }
        }

        log::debug!(
            "frame {}: free={} occupied={} events={}",
            report.frame_index,
            report.free_count,
            report.occupied_count,
            report.events.len()
        );
        self.events_emitted += report.events.len() as u64;
        self.frame_index += 1;
        self.last_report = Some(report.clone());
        Ok(report)
    }

    /// Drive the source until stopped, the frame limit is hit, or a fatal error.
    pub fn run(&mut self, stop: &AtomicBool) -> Result<RunSummary> {
        let interval = match self.config.target_fps {
            0 => None,
            fps => Some(Duration::from_secs_f64(1.0 / fps as f64)),
        };
        let mut consecutive_rewinds = 0u32;
        let mut last_health_log = Instant::now();
        let processed_at_start = self.frame_index;

        let stop_reason = loop {
            if stop.load(Ordering::SeqCst) {
                break StopReason::Requested;
            }
            if let Some(max) = self.config.max_frames {
                if self.frame_index - processed_at_start >= max {
                    break StopReason::FrameLimit;
                }
            }
            self.drain_commands();

            let started = Instant::now();
            let failure = match self.source.next_frame() {
                Ok(Some(frame)) => match self.process_frame(&frame) {
                    Ok(_) => {
                        consecutive_rewinds = 0;
                        None
                    }
                    Err(e) if is_invalid_frame(&e) => Some((e, false)),
                    Err(e) => return Err(e),
                },
                Ok(None) => Some((anyhow!("source exhausted"), true)),
                Err(e) => Some((e, false)),
            };

            if let Some((reason, exhausted)) = failure {
                match self.source.mode() {
                    SourceMode::Live => {
                        return Err(reason.context("live source ended"));
                    }
                    SourceMode::Looping => {
                        consecutive_rewinds += 1;
                        if consecutive_rewinds > MAX_CONSECUTIVE_REWINDS {
                            return Err(reason.context(format!(
                                "source failed {} times in a row without a frame",
                                consecutive_rewinds
                            )));
                        }
                        if consecutive_rewinds > 1 || !exhausted {
                            log::warn!("rewinding source after: {:#}", reason);
                        } else {
                            log::debug!("end of source, rewinding");
                        }
                        self.source.rewind()?;
                        self.rewinds += 1;
                        continue;
                    }
                }
            }

            if last_health_log.elapsed() >= HEALTH_LOG_INTERVAL {
                self.log_health();
                last_health_log = Instant::now();
            }

            if let Some(interval) = interval {
                let elapsed = started.elapsed();
                if elapsed < interval {
                    std::thread::sleep(interval - elapsed);
                }
            }
        };

        Ok(RunSummary {
            frames_processed: self.frame_index - processed_at_start,
            events_emitted: self.events_emitted,
            rewinds: self.rewinds,
            skipped_spots: self.skipped.iter().copied().collect(),
            stop_reason,
            last_report: self.last_report.clone(),
        })
    }

    fn drain_commands(&mut self) {
        let mut pending = Vec::new();
        if let Some(rx) = &self.commands {
            loop {
                match rx.try_recv() {
                    Ok(cmd) => pending.push(cmd),
                    Err(TryRecvError::Empty) => break,
                    Err(TryRecvError::Disconnected) => {
                        log::debug!("control channel closed");
                        self.commands = None;
                        break;
                    }
                }
            }
        }
        for cmd in pending {
            self.apply_command(cmd);
        }
    }

    fn ensure_layout(&mut self, width: u32, height: u32) -> Result<()> {
        if let Some(active) = &self.active {
            if active.width == width && active.height == height {
                return Ok(());
            }
        }
        let skipped: Vec<SpotId> = self.skipped.iter().copied().collect();
        let candidates = self.layout.without(&skipped);
        let (layout, dropped) =
            apply_bounds_policy(&candidates, width, height, self.config.out_of_bounds)?;
        for id in dropped {
            if self.skipped.insert(id) {
                log::warn!(
                    "{} does not fit a {}x{} frame, skipping it for this run",
                    id,
                    width,
                    height
                );
            }
        }
        log::info!(
            "evaluating {} of {} spots at {}x{}",
            layout.len(),
            self.layout.len(),
            width,
            height
        );
        self.active = Some(ActiveLayout {
            width,
            height,
            layout,
        });
        Ok(())
    }

    fn log_health(&self) {
        let stats = self.source.stats();
        let (free, occupied) = self
            .last_report
            .as_ref()
            .map(|r| (r.free_count, r.occupied_count))
            .unwrap_or((0, 0));
        log::info!(
            "source health={} frames={} rewinds={} free={} occupied={} location={}",
            self.source.is_healthy(),
            stats.frames_captured,
            stats.rewinds,
            free,
            occupied,
            stats.location
        );
    }
}

fn is_invalid_frame(err: &anyhow::Error) -> bool {
    matches!(
        err.downcast_ref::<OccupancyError>(),
        Some(OccupancyError::InvalidFrame { .. })
    )
}

fn format_ids(ids: &[SpotId]) -> String {
    if ids.is_empty() {
        return "no spots".to_string();
    }
    let list: Vec<String> = ids.iter().map(|id| id.get().to_string()).collect();
    format!("spots [{}]", list.join(", "))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::SourceStats;
    use crate::spots::SpotSize;
    use crate::OccupancyStatus;
    use std::collections::VecDeque;

    /// Source replaying prepared results.
    struct Scripted {
        items: VecDeque<Result<Option<BgrFrame>>>,
        mode: SourceMode,
        rewinds: u64,
    }

    impl Scripted {
        fn new(mode: SourceMode, items: Vec<Result<Option<BgrFrame>>>) -> Self {
            Self {
                items: items.into(),
                mode,
                rewinds: 0,
            }
        }
    }

    impl FrameSource for Scripted {
        fn connect(&mut self) -> Result<()> {
            Ok(())
        }

        fn next_frame(&mut self) -> Result<Option<BgrFrame>> {
            self.items.pop_front().unwrap_or(Ok(None))
        }

        fn rewind(&mut self) -> Result<()> {
            self.rewinds += 1;
            Ok(())
        }

        fn mode(&self) -> SourceMode {
            self.mode
        }

        fn is_healthy(&self) -> bool {
            true
        }

        fn stats(&self) -> SourceStats {
            SourceStats::default()
        }
    }

    fn blank() -> BgrFrame {
        BgrFrame::filled(160, 60, [150, 150, 150])
    }

    fn unpaced(max_frames: Option<u64>) -> FrameLoopConfig {
        FrameLoopConfig {
            target_fps: 0,
            max_frames,
            ..FrameLoopConfig::default()
        }
    }

    fn layout() -> SpotLayout {
        SpotLayout::from_positions(&[(10, 10)], SpotSize::default())
    }

    #[test]
    fn looping_source_rewinds_on_exhaustion() -> Result<()> {
        let source = Scripted::new(
            SourceMode::Looping,
            vec![Ok(Some(blank())), Ok(None), Ok(Some(blank()))],
        );
        let mut frame_loop = FrameLoop::new(Box::new(source), layout(), unpaced(Some(2)));
        let summary = frame_loop.run(&AtomicBool::new(false))?;
        assert_eq!(summary.frames_processed, 2);
        assert_eq!(summary.rewinds, 1);
        assert_eq!(summary.stop_reason, StopReason::FrameLimit);
        Ok(())
    }

    #[test]
    fn looping_source_gives_up_after_repeated_failures() {
        let source = Scripted::new(SourceMode::Looping, Vec::new());
        let mut frame_loop = FrameLoop::new(Box::new(source), layout(), unpaced(Some(5)));
        let err = frame_loop.run(&AtomicBool::new(false)).unwrap_err();
        assert!(format!("{:#}", err).contains("in a row"));
    }

    #[test]
    fn invalid_frame_rewinds_looping_source() -> Result<()> {
        let broken = BgrFrame::new(vec![0u8; 7], 160, 60);
        let source = Scripted::new(
            SourceMode::Looping,
            vec![Ok(Some(broken)), Ok(Some(blank()))],
        );
        let mut frame_loop = FrameLoop::new(Box::new(source), layout(), unpaced(Some(1)));
        let summary = frame_loop.run(&AtomicBool::new(false))?;
        assert_eq!(summary.frames_processed, 1);
        assert_eq!(summary.rewinds, 1);
        Ok(())
    }

    #[test]
    fn live_source_read_failure_ends_run() {
        let source = Scripted::new(
            SourceMode::Live,
            vec![Ok(Some(blank())), Err(anyhow!("connection reset"))],
        );
        let mut frame_loop = FrameLoop::new(Box::new(source), layout(), unpaced(None));
        let err = frame_loop.run(&AtomicBool::new(false)).unwrap_err();
        let message = format!("{:#}", err);
        assert!(message.contains("live source ended"));
        assert!(message.contains("connection reset"));
        assert_eq!(frame_loop.last_report().map(|r| r.frame_index), Some(0));
    }

    #[test]
    fn stop_flag_ends_run_before_first_frame() -> Result<()> {
        let source = Scripted::new(SourceMode::Live, vec![Ok(Some(blank()))]);
        let mut frame_loop = FrameLoop::new(Box::new(source), layout(), unpaced(None));
        let summary = frame_loop.run(&AtomicBool::new(true))?;
        assert_eq!(summary.frames_processed, 0);
        assert_eq!(summary.stop_reason, StopReason::Requested);
        Ok(())
    }

    #[test]
    fn abort_policy_rejects_oversized_layout() {
        let layout = SpotLayout::from_positions(&[(10, 10), (100, 10)], SpotSize::default());
        let source = Scripted::new(SourceMode::Looping, vec![Ok(Some(blank()))]);
        let mut frame_loop = FrameLoop::new(Box::new(source), layout, unpaced(Some(1)));
        let err = frame_loop.run(&AtomicBool::new(false)).unwrap_err();
        assert_eq!(
            err.downcast_ref::<OccupancyError>().and_then(|e| e.spot()),
            Some(SpotId(2))
        );
    }

    #[test]
    fn skip_policy_drops_spot_once() -> Result<()> {
        let layout = SpotLayout::from_positions(&[(10, 10), (100, 10)], SpotSize::default());
        let source = Scripted::new(
            SourceMode::Looping,
            vec![Ok(Some(blank())), Ok(Some(blank()))],
        );
        let config = FrameLoopConfig {
            out_of_bounds: OutOfBoundsPolicy::Skip,
            ..unpaced(Some(2))
        };
        let mut frame_loop = FrameLoop::new(Box::new(source), layout, config);
        frame_loop.apply_command(MonitorCommand::WatchAll);
        let summary = frame_loop.run(&AtomicBool::new(false))?;
        assert_eq!(summary.skipped_spots, vec![SpotId(2)]);
        let report = summary.last_report.ok_or_else(|| anyhow!("no report"))?;
        assert_eq!(report.total, 1);
        assert_eq!(report.free_spots, vec![SpotId(1)]);
        // Only the first frame fires for the surviving spot.
        assert_eq!(summary.events_emitted, 1);
        Ok(())
    }

    #[test]
    fn skipped_spot_stays_out_after_resolution_change() -> Result<()> {
        let layout = SpotLayout::from_positions(&[(10, 10), (100, 10)], SpotSize::default());
        let wide = BgrFrame::filled(320, 60, [150, 150, 150]);
        let source = Scripted::new(
            SourceMode::Looping,
            vec![Ok(Some(blank())), Ok(Some(wide.clone())), Ok(Some(wide))],
        );
        let config = FrameLoopConfig {
            out_of_bounds: OutOfBoundsPolicy::Skip,
            ..unpaced(Some(3))
        };
        let mut frame_loop = FrameLoop::new(Box::new(source), layout, config);
        frame_loop.apply_command(MonitorCommand::WatchAll);
        let summary = frame_loop.run(&AtomicBool::new(false))?;

        assert_eq!(summary.frames_processed, 3);
        assert_eq!(summary.skipped_spots, vec![SpotId(2)]);
        let report = summary.last_report.ok_or_else(|| anyhow!("no report"))?;
        assert_eq!(report.total, 1);
        assert_eq!(report.free_spots, vec![SpotId(1)]);
        assert!(report.classifications.iter().all(|c| c.spot == SpotId(1)));
        assert_eq!(summary.events_emitted, 1);
        Ok(())
    }

    #[test]
    fn commands_apply_between_frames() -> Result<()> {
        let (tx, rx) = std::sync::mpsc::channel();
        let source = Scripted::new(SourceMode::Looping, vec![Ok(Some(blank()))]);
        let mut frame_loop = FrameLoop::new(Box::new(source), layout(), unpaced(Some(1)))
            .with_commands(rx);
        tx.send(MonitorCommand::Watch(vec![SpotId(1), SpotId(9)]))?;
        let summary = frame_loop.run(&AtomicBool::new(false))?;
        let monitored: Vec<SpotId> = frame_loop.tracker().monitored().collect();
        assert_eq!(monitored, vec![SpotId(1)]);
        let report = summary.last_report.ok_or_else(|| anyhow!("no report"))?;
        assert_eq!(report.events.len(), 1);
        assert_eq!(report.events[0].status, OccupancyStatus::Free);
        Ok(())
    }
}
