//! Per-spot occupancy classification.
//!
//! `SpotEvaluator::evaluate` crops each spot out of the mask, counts foreground
//! pixels and classifies against the occupancy threshold. It never renders, logs
//! or notifies. A crop that leaves the mask is reported as
//! `OccupancyError::OutOfBoundsSpot`; the caller applies an `OutOfBoundsPolicy`.

use serde::{Deserialize, Serialize};

use crate::frame::Mask;
use crate::spots::{Spot, SpotLayout};
use crate::{OccupancyError, OccupancyStatus, SpotClassification, SpotId, OCCUPANCY_THRESHOLD};

/// What the frame loop does with spots whose crop leaves the frame.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutOfBoundsPolicy {
    /// Refuse to run.
    #[default]
    Abort,
    /// Drop the offending spots for the rest of the run (logged once each).
    Skip,
}

/// Classifications for one frame, in spot declaration order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Evaluation {
    pub classifications: Vec<SpotClassification>,
    pub free_count: usize,
}

impl Evaluation {
    pub fn total(&self) -> usize {
        self.classifications.len()
    }

    /// Derived from the total so that free + occupied always equals the spot count.
    pub fn occupied_count(&self) -> usize {
        self.total() - self.free_count
    }
}

#[derive(Clone, Copy, Debug)]
pub struct SpotEvaluator {
    threshold: usize,
}

impl Default for SpotEvaluator {
    fn default() -> Self {
        Self::new(OCCUPANCY_THRESHOLD)
    }
}

impl SpotEvaluator {
    pub fn new(threshold: usize) -> Self {
        Self { threshold }
    }

    pub fn threshold(&self) -> usize {
        self.threshold
    }

    pub fn evaluate(&self, mask: &Mask, spots: &[Spot]) -> Result<Evaluation, OccupancyError> {
        let mut classifications = Vec::with_capacity(spots.len());
        let mut free_count = 0;
        for spot in spots {
            let foreground = mask
                .count_nonzero_in(spot.x, spot.y, spot.width, spot.height)
                .ok_or_else(|| out_of_bounds(spot, mask.width(), mask.height()))?;
            let status = OccupancyStatus::from_count(foreground, self.threshold);
            if status.is_free() {
                free_count += 1;
            }
            classifications.push(SpotClassification {
                spot: spot.id,
                status,
                foreground,
            });
        }
        Ok(Evaluation {
            classifications,
            free_count,
        })
    }
}

/// Spots whose crop does not fit a `width` x `height` mask, as errors.
pub fn out_of_bounds_spots(layout: &SpotLayout, width: u32, height: u32) -> Vec<OccupancyError> {
    layout
        .spots()
        .iter()
        .filter(|s| !fits(s, width, height))
        .map(|s| out_of_bounds(s, width, height))
        .collect()
}

/// Check a layout against a frame size under a policy.
///
/// `Abort` fails on the first offending spot; `Skip` returns a layout without them
/// and the ids that were dropped.
pub fn apply_bounds_policy(
    layout: &SpotLayout,
    width: u32,
    height: u32,
    policy: OutOfBoundsPolicy,
) -> Result<(SpotLayout, Vec<SpotId>), OccupancyError> {
    let offending = out_of_bounds_spots(layout, width, height);
    match (policy, offending.into_iter().next()) {
        (_, None) => Ok((layout.clone(), Vec::new())),
        (OutOfBoundsPolicy::Abort, Some(err)) => Err(err),
        (OutOfBoundsPolicy::Skip, Some(_)) => {
            let dropped: Vec<SpotId> = layout
                .spots()
                .iter()
                .filter(|s| !fits(s, width, height))
                .map(|s| s.id)
                .collect();
            Ok((layout.without(&dropped), dropped))
        }
    }
}

fn fits(spot: &Spot, width: u32, height: u32) -> bool {
    match (
        spot.x.checked_add(spot.width),
        spot.y.checked_add(spot.height),
    ) {
        (Some(x_end), Some(y_end)) => x_end <= width && y_end <= height,
        _ => false,
    }
}

fn out_of_bounds(spot: &Spot, mask_width: u32, mask_height: u32) -> OccupancyError {
    OccupancyError::OutOfBoundsSpot {
        spot: spot.id,
        x: spot.x,
        y: spot.y,
        width: spot.width,
        height: spot.height,
        mask_width,
        mask_height,
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
