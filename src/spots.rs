//! Spot geometry and the on-disk coordinate store.
//!
//! The store is a JSON array of `[x, y]` top-left corners. List order defines
//! spot identity: the first entry is `Spot 1`. Every spot shares one `SpotSize`.
//! The core never creates or repairs the store; a missing or corrupt file is a
//! startup failure for the caller to report.

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::{SpotId, SPOT_HEIGHT, SPOT_WIDTH};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpotSize {
    pub width: u32,
    pub height: u32,
}

impl Default for SpotSize {
    fn default() -> Self {
        Self {
            width: SPOT_WIDTH,
            height: SPOT_HEIGHT,
        }
    }
}

/// One parking-space region in frame pixel space. Immutable once loaded.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Spot {
    pub id: SpotId,
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Spot {
    /// Whether a point lies inside this spot's rectangle.
    pub fn contains(&self, px: u32, py: u32) -> bool {
        px >= self.x
            && py >= self.y
            && (px as u64) < self.x as u64 + self.width as u64
            && (py as u64) < self.y as u64 + self.height as u64
    }
}

/// Ordered list of spots sharing one size.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SpotLayout {
    size: SpotSize,
    spots: Vec<Spot>,
}

impl SpotLayout {
    pub fn from_positions(positions: &[(u32, u32)], size: SpotSize) -> Self {
        let spots = positions
            .iter()
            .enumerate()
            .map(|(i, &(x, y))| Spot {
                id: SpotId(i as u32 + 1),
                x,
                y,
                width: size.width,
                height: size.height,
            })
            .collect();
        Self { size, spots }
    }

    pub fn size(&self) -> SpotSize {
        self.size
    }

    pub fn spots(&self) -> &[Spot] {
        &self.spots
    }

    pub fn len(&self) -> usize {
        self.spots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.spots.is_empty()
    }

    pub fn ids(&self) -> impl Iterator<Item = SpotId> + '_ {
        self.spots.iter().map(|s| s.id)
    }

    pub fn get(&self, id: SpotId) -> Option<&Spot> {
        self.spots.iter().find(|s| s.id == id)
    }

    pub fn contains_id(&self, id: SpotId) -> bool {
        self.get(id).is_some()
    }

    /// Drop the given spots, keeping the order (and identities) of the rest.
    pub fn without(&self, dropped: &[SpotId]) -> Self {
        Self {
            size: self.size,
            spots: self
                .spots
                .iter()
                .filter(|s| !dropped.contains(&s.id))
                .copied()
                .collect(),
        }
    }
}

/// The coordinate store file.
#[derive(Clone, Debug)]
pub struct SpotStore {
    path: PathBuf,
    positions: Vec<(u32, u32)>,
}

impl SpotStore {
    /// Empty store bound to a path (nothing is written until `save`).
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            positions: Vec::new(),
        }
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read spot store {}", path.display()))?;
        let positions: Vec<(u32, u32)> = serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid spot store {}: {}", path.display(), e))?;
        Ok(Self {
            path: path.to_path_buf(),
            positions,
        })
    }

    /// Write pretty JSON via a temp file + rename.
    pub fn save(&self) -> Result<()> {
        let json = serde_json::to_string_pretty(&self.positions)?;
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, json)
            .with_context(|| format!("failed to write {}", tmp.display()))?;
        std::fs::rename(&tmp, &self.path)
            .with_context(|| format!("failed to replace spot store {}", self.path.display()))?;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn positions(&self) -> &[(u32, u32)] {
        &self.positions
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    /// Append a spot; returns its identity.
    pub fn add(&mut self, x: u32, y: u32) -> SpotId {
        self.positions.push((x, y));
        SpotId(self.positions.len() as u32)
    }

    /// Remove every spot whose rectangle contains the point. Returns the removed corners.
    /// Identities of later spots shift down.
    pub fn remove_at(&mut self, px: u32, py: u32, size: SpotSize) -> Vec<(u32, u32)> {
        let hits = |&(x, y): &(u32, u32)| {
            Spot {
                id: SpotId(0),
                x,
                y,
                width: size.width,
                height: size.height,
            }
            .contains(px, py)
        };
        let removed: Vec<(u32, u32)> = self.positions.iter().copied().filter(hits).collect();
        self.positions.retain(|pos| !hits(pos));
        removed
    }

    pub fn layout(&self, size: SpotSize) -> SpotLayout {
        SpotLayout::from_positions(&self.positions, size)
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
