//! Per-frame aggregate report.

use serde::Serialize;

use crate::evaluate::Evaluation;
use crate::{SpotClassification, SpotId, TransitionEvent};

/// Everything a report consumer needs about one processed frame.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct FrameReport {
    pub frame_index: u64,
    pub total: usize,
    pub free_count: usize,
    pub occupied_count: usize,
    pub free_spots: Vec<SpotId>,
    pub occupied_spots: Vec<SpotId>,
    pub classifications: Vec<SpotClassification>,
    pub events: Vec<TransitionEvent>,
}

/// Assemble a report. Spot lists keep the order of `evaluation.classifications`.
pub fn build_report(
    frame_index: u64,
    evaluation: &Evaluation,
    events: Vec<TransitionEvent>,
) -> FrameReport {
    let (free, occupied): (Vec<&SpotClassification>, Vec<&SpotClassification>) = evaluation
        .classifications
        .iter()
        .partition(|c| c.status.is_free());
    FrameReport {
        frame_index,
        total: evaluation.total(),
        free_count: evaluation.free_count,
        occupied_count: evaluation.occupied_count(),
        free_spots: free.iter().map(|c| c.spot).collect(),
        occupied_spots: occupied.iter().map(|c| c.spot).collect(),
        classifications: evaluation.classifications.clone(),
        events,
    }
}

impl FrameReport {
    /// One-line human summary, e.g. `Free: 3/5`.
    pub fn summary(&self) -> String {
        format!("Free: {}/{}", self.free_count, self.total)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::OccupancyStatus::{self, Free, Occupied};

    fn classified(id: u32, status: OccupancyStatus, foreground: usize) -> SpotClassification {
        SpotClassification {
            spot: SpotId(id),
            status,
            foreground,
        }
    }

    #[test]
    fn partitions_in_declaration_order() {
        let classifications = vec![
            classified(1, Occupied, 2000),
            classified(2, Free, 10),
            classified(3, Occupied, 4200),
            classified(4, Free, 0),
        ];
        let evaluation = Evaluation {
            classifications,
            free_count: 2,
        };
        let report = build_report(7, &evaluation, Vec::new());

        assert_eq!(report.frame_index, 7);
        assert_eq!(report.free_spots, vec![SpotId(2), SpotId(4)]);
        assert_eq!(report.occupied_spots, vec![SpotId(1), SpotId(3)]);
        assert_eq!(report.free_count + report.occupied_count, report.total);
        assert_eq!(report.summary(), "Free: 2/4");
    }

    #[test]
    fn serializes_ids_as_numbers() -> anyhow::Result<()> {
        let evaluation = Evaluation {
            classifications: vec![classified(1, Free, 0)],
            free_count: 1,
        };
        let events = vec![TransitionEvent {
            spot: SpotId(1),
            status: Free,
            previous: None,
        }];
        let json = serde_json::to_value(build_report(0, &evaluation, events))?;
        assert_eq!(json["free_spots"], serde_json::json!([1]));
        assert_eq!(json["events"][0]["status"], "free");
        assert!(json["events"][0]["previous"].is_null());
        Ok(())
    }
}
