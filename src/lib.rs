//! Parking-space occupancy monitor.
//!
//! This crate decides, frame by frame, whether each predefined parking-space
//! region of a video feed holds a vehicle, and reports the instant a watched
//! spot changes status.
//!
//! # Architecture
//!
//! The core is three components, leaves first:
//!
//! 1. **Preprocessor** (`preprocess`): color frame -> binary foreground mask. Pure.
//! 2. **SpotEvaluator** (`evaluate`): mask + spot geometry -> per-spot status. Pure.
//! 3. **OccupancyTracker** (`tracker`): remembers the last status of monitored spots
//!    and emits one transition event per change. The only stateful core piece.
//!
//! Everything else is plumbing around that core:
//!
//! - `ingest`: frame sources (looping local files, live network streams, `stub://` scenes)
//! - `pipeline`: the frame loop driving source -> preprocess -> evaluate -> track -> report
//! - `report` / `overlay`: per-frame aggregate report and the annotated frame
//! - `notify` / `sink`: consumers of transition events and reports
//! - `control`: external monitoring commands (watch ids / all / none)
//! - `spots` / `config`: the coordinate store and runtime configuration

use serde::{Deserialize, Serialize};
use std::fmt;

pub mod config;
pub mod control;
pub mod evaluate;
pub mod frame;
pub mod ingest;
pub mod notify;
pub mod overlay;
pub mod pipeline;
pub mod preprocess;
pub mod report;
pub mod sink;
pub mod spots;
pub mod tracker;

pub use config::MonitorConfig;
pub use control::MonitorCommand;
pub use evaluate::{Evaluation, OutOfBoundsPolicy, SpotEvaluator};
pub use frame::{BgrFrame, Mask};
pub use ingest::{FileConfig, FileSource, FrameSource, RtspConfig, RtspSource, SourceMode};
pub use notify::{JsonLinesNotifier, LogNotifier, Notifier, NotifierSet};
pub use pipeline::{FrameLoop, RunSummary};
pub use preprocess::{PreprocessConfig, Preprocessor};
pub use report::{build_report, FrameReport};
pub use sink::{ReportSink, SnapshotSink, StatusFileSink};
pub use spots::{Spot, SpotLayout, SpotSize, SpotStore};
pub use tracker::{OccupancyTracker, TrackedState};

/// Width in pixels shared by every spot region.
pub const SPOT_WIDTH: u32 = 105;

/// Height in pixels shared by every spot region.
pub const SPOT_HEIGHT: u32 = 40;

/// Foreground pixel count at which a spot counts as occupied.
/// A crop with exactly this many nonzero pixels is `Occupied`.
pub const OCCUPANCY_THRESHOLD: usize = 900;

// -------------------- Spot identity --------------------

/// Stable 1-indexed spot identity. Declaration order in the coordinate store
/// defines the numbering.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SpotId(pub u32);

impl SpotId {
    pub fn get(self) -> u32 {
        self.0
    }
}

impl fmt::Display for SpotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Spot {}", self.0)
    }
}

// -------------------- Occupancy --------------------

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OccupancyStatus {
    Free,
    Occupied,
}

impl OccupancyStatus {
    /// Classify a foreground pixel count against a threshold.
    /// Strictly below the threshold is free; equality is occupied.
    pub fn from_count(count: usize, threshold: usize) -> Self {
        if count < threshold {
            OccupancyStatus::Free
        } else {
            OccupancyStatus::Occupied
        }
    }

    pub fn is_free(self) -> bool {
        matches!(self, OccupancyStatus::Free)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            OccupancyStatus::Free => "free",
            OccupancyStatus::Occupied => "occupied",
        }
    }
}

impl fmt::Display for OccupancyStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status of one spot in one frame. Produced fresh every frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpotClassification {
    pub spot: SpotId,
    pub status: OccupancyStatus,
    /// Nonzero mask pixels inside the spot crop.
    pub foreground: usize,
}

/// One-shot signal that a monitored spot changed status.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionEvent {
    pub spot: SpotId,
    pub status: OccupancyStatus,
    /// `None` when this is the first observation since monitoring started.
    pub previous: Option<OccupancyStatus>,
}

// -------------------- Core errors --------------------

/// Failures of the pure core components.
///
/// Callers decide what to do with them: the frame loop rewinds or stops on
/// `InvalidFrame`, and applies its `OutOfBoundsPolicy` to `OutOfBoundsSpot`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum OccupancyError {
    #[error("invalid frame: {reason}")]
    InvalidFrame { reason: String },

    #[error(
        "{spot} crop ({x}, {y}) {width}x{height} exceeds mask bounds {mask_width}x{mask_height}"
    )]
    OutOfBoundsSpot {
        spot: SpotId,
        x: u32,
        y: u32,
        width: u32,
        height: u32,
        mask_width: u32,
        mask_height: u32,
    },
}

impl OccupancyError {
    pub(crate) fn invalid_frame(reason: impl Into<String>) -> Self {
        OccupancyError::InvalidFrame {
            reason: reason.into(),
        }
    }

    /// The offending spot, for out-of-bounds failures.
    pub fn spot(&self) -> Option<SpotId> {
        match self {
            OccupancyError::OutOfBoundsSpot { spot, .. } => Some(*spot),
            OccupancyError::InvalidFrame { .. } => None,
        }
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn threshold_boundary_is_occupied() {
        assert_eq!(
            OccupancyStatus::from_count(0, OCCUPANCY_THRESHOLD),
            OccupancyStatus::Free
        );
        assert_eq!(
            OccupancyStatus::from_count(899, OCCUPANCY_THRESHOLD),
            OccupancyStatus::Free
        );
        assert_eq!(
            OccupancyStatus::from_count(900, OCCUPANCY_THRESHOLD),
            OccupancyStatus::Occupied
        );
        assert_eq!(
            OccupancyStatus::from_count(4200, OCCUPANCY_THRESHOLD),
            OccupancyStatus::Occupied
        );
    }

    #[test]
    fn spot_id_displays_one_indexed_name() {
        assert_eq!(SpotId(3).to_string(), "Spot 3");
    }

    #[test]
    fn status_serializes_lowercase() {
        let json = serde_json::to_string(&OccupancyStatus::Occupied).unwrap();
        assert_eq!(json, "\"occupied\"");
    }

    #[test]
    fn out_of_bounds_error_names_spot() {
        let err = OccupancyError::OutOfBoundsSpot {
            spot: SpotId(7),
            x: 1050,
            y: 10,
            width: 105,
            height: 40,
            mask_width: 1100,
            mask_height: 720,
        };
        assert_eq!(err.spot(), Some(SpotId(7)));
        assert!(err.to_string().contains("Spot 7"));
    }
}
