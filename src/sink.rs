//! Report consumers.
//!
//! A sink sees every processed frame together with its report. `StatusFileSink`
//! keeps the latest report on disk as JSON; `SnapshotSink` writes the annotated
//! frame as a PNG every N frames.

use anyhow::{anyhow, Context, Result};
use std::path::{Path, PathBuf};

use crate::frame::BgrFrame;
use crate::overlay;
use crate::report::FrameReport;
use crate::spots::SpotLayout;

pub trait ReportSink: Send {
    fn name(&self) -> &'static str;

    fn consume(&mut self, report: &FrameReport, frame: &BgrFrame, layout: &SpotLayout)
        -> Result<()>;
}

/// Latest report as pretty JSON, replaced atomically each frame.
pub struct StatusFileSink {
    path: PathBuf,
}

impl StatusFileSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ReportSink for StatusFileSink {
    fn name(&self) -> &'static str {
        "status-file"
    }

    fn consume(
        &mut self,
        report: &FrameReport,
        _frame: &BgrFrame,
        _layout: &SpotLayout,
    ) -> Result<()> {
        let json = serde_json::to_vec_pretty(report)?;
        write_atomic(&self.path, &json)
    }
}

/// Annotated PNG snapshots, named by frame index.
pub struct SnapshotSink {
    dir: PathBuf,
    every: u64,
}

impl SnapshotSink {
    pub fn new(dir: impl Into<PathBuf>, every: u64) -> Result<Self> {
        let dir = dir.into();
        if every == 0 {
            return Err(anyhow!("snapshot interval must be >= 1"));
        }
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("failed to create snapshot dir {}", dir.display()))?;
        Ok(Self { dir, every })
    }

    pub fn snapshot_path(&self, frame_index: u64) -> PathBuf {
        self.dir.join(format!("frame_{:08}.png", frame_index))
    }
}

impl ReportSink for SnapshotSink {
    fn name(&self) -> &'static str {
        "snapshot"
    }

    fn consume(
        &mut self,
        report: &FrameReport,
        frame: &BgrFrame,
        layout: &SpotLayout,
    ) -> Result<()> {
        if report.frame_index % self.every != 0 {
            return Ok(());
        }
        let annotated = overlay::annotate(frame, layout, report)?;
        let path = self.snapshot_path(report.frame_index);
        annotated
            .save(&path)
            .with_context(|| format!("failed to write snapshot {}", path.display()))?;
        log::debug!("snapshot written to {}", path.display());
        Ok(())
    }
}

pub(crate) fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    std::fs::write(&tmp, bytes).with_context(|| format!("failed to write {}", tmp.display()))?;
    std::fs::rename(&tmp, path).with_context(|| format!("failed to replace {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evaluate::Evaluation;
    use crate::report::build_report;
    use crate::spots::SpotSize;
    use crate::{OccupancyStatus, SpotClassification, SpotId};

    fn fixture(frame_index: u64) -> (FrameReport, BgrFrame, SpotLayout) {
        let layout = SpotLayout::from_positions(&[(10, 60)], SpotSize::default());
        let evaluation = Evaluation {
            classifications: vec![SpotClassification {
                spot: SpotId(1),
                status: OccupancyStatus::Occupied,
                foreground: 1500,
            }],
            free_count: 0,
        };
        (
            build_report(frame_index, &evaluation, Vec::new()),
            BgrFrame::filled(200, 120, [120, 120, 120]),
            layout,
        )
    }

    #[test]
    fn status_file_holds_latest_report() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("status.json");
        let mut sink = StatusFileSink::new(&path);

        let (report, frame, layout) = fixture(1);
        sink.consume(&report, &frame, &layout)?;
        let (report, frame, layout) = fixture(2);
        sink.consume(&report, &frame, &layout)?;

        let value: serde_json::Value = serde_json::from_slice(&std::fs::read(&path)?)?;
        assert_eq!(value["frame_index"], 2);
        assert_eq!(value["occupied_spots"], serde_json::json!([1]));
        Ok(())
    }

    #[test]
    fn snapshots_only_on_interval() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let mut sink = SnapshotSink::new(dir.path().join("snaps"), 5)?;
        for i in 1..=10 {
            let (report, frame, layout) = fixture(i);
            sink.consume(&report, &frame, &layout)?;
        }
        assert!(!sink.snapshot_path(4).exists());
        assert!(sink.snapshot_path(5).exists());
        assert!(sink.snapshot_path(10).exists());

        let img = image::open(sink.snapshot_path(5))?.to_rgb8();
        assert_eq!(img.dimensions(), (200, 120));
        // Bottom-right corner of the occupied outline, in RGB.
        assert_eq!(img.get_pixel(10 + 104, 60 + 39).0, [255, 0, 0]);
        Ok(())
    }

    #[test]
    fn zero_interval_is_rejected() {
        assert!(SnapshotSink::new("unused", 0).is_err());
    }
}
