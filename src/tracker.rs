//! Per-spot change detection for the monitored set.
//!
//! Each monitored spot remembers the last status it was observed in. `step`
//! compares every monitored classification against that memory and emits one
//! event per change. The first observation after monitoring starts always fires
//! (Unknown differs from any status).
//!
//! Unmonitored spots are neither compared nor updated: a remembered status goes
//! stale while the spot is unwatched, and re-watching compares against it.
//! `clear_all` forgets everything so the next observation of any spot fires.

use std::collections::{BTreeSet, HashMap};

use crate::{OccupancyStatus, SpotClassification, SpotId, TransitionEvent};

/// What the tracker remembers about one spot.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TrackedState {
    Unknown,
    Known(OccupancyStatus),
}

#[derive(Debug, Default)]
pub struct OccupancyTracker {
    monitored: BTreeSet<SpotId>,
    remembered: HashMap<SpotId, OccupancyStatus>,
}

impl OccupancyTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the monitored set. Remembered statuses are kept.
    pub fn set_monitored<I>(&mut self, ids: I)
    where
        I: IntoIterator<Item = SpotId>,
    {
        self.monitored = ids.into_iter().collect();
    }

    /// Monitor every id in `ids` (typically every spot of the layout).
    pub fn monitor_all<I>(&mut self, ids: I)
    where
        I: IntoIterator<Item = SpotId>,
    {
        self.set_monitored(ids);
    }

    /// Empty the monitored set and forget every remembered status.
    pub fn clear_all(&mut self) {
        self.monitored.clear();
        self.remembered.clear();
    }

    pub fn is_monitored(&self, id: SpotId) -> bool {
        self.monitored.contains(&id)
    }

    pub fn monitored(&self) -> impl Iterator<Item = SpotId> + '_ {
        self.monitored.iter().copied()
    }

    pub fn state(&self, id: SpotId) -> TrackedState {
        match self.remembered.get(&id) {
            Some(status) => TrackedState::Known(*status),
            None => TrackedState::Unknown,
        }
    }

    /// Compare a frame's classifications against memory.
    ///
    /// Events come out in the order of `classifications` (spot declaration order),
    /// at most one per spot.
    pub fn step(&mut self, classifications: &[SpotClassification]) -> Vec<TransitionEvent> {
        let mut events = Vec::new();
        for c in classifications {
            if !self.monitored.contains(&c.spot) {
                continue;
            }
            let previous = self.remembered.insert(c.spot, c.status);
            if previous != Some(c.status) {
                events.push(TransitionEvent {
                    spot: c.spot,
                    status: c.status,
                    previous,
                });
            }
        }
        events
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
