//! Cell identifiers shared by both grid variants.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Identifier of a grid cell within one zoom level.
///
/// For the fixed grid this is the linear `row * 2^zoom + col` index. For the
/// Z-order grid it is the packed `(zoom, morton path)` value. Any coordinate
/// outside the valid domain maps to [`CellId::INVALID`] instead of an error.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CellId(pub i64);

impl CellId {
    /// Sentinel for "not a cell".
    pub const INVALID: Self = Self(-1);

    /// Whether this id refers to a real cell.
    #[must_use]
    pub const fn is_valid(self) -> bool {
        self.0 >= 0
    }

    /// Raw integer value.
    #[must_use]
    pub const fn get(self) -> i64 {
        self.0
    }
}

impl fmt::Debug for CellId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_valid() {
            write!(f, "CellId({})", self.0)
        } else {
            f.write_str("CellId(invalid)")
        }
    }
}

/// A cell at a specific zoom level.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CellCoord {
    /// Zoom level (0 = whole world).
    pub zoom: u8,
    /// Cell identifier within the zoom level.
    pub id: CellId,
}

impl CellCoord {
    /// Reserved bucket for entities without any visible coordinate.
    pub const UNLOCATED: Self = Self {
        zoom: 0,
        id: CellId::INVALID,
    };

    /// Create a new cell coordinate.
    #[must_use]
    pub const fn new(zoom: u8, id: CellId) -> Self {
        Self { zoom, id }
    }

    /// Whether this is the unlocated bucket (or any invalid cell).
    #[must_use]
    pub const fn is_unlocated(self) -> bool {
        !self.id.is_valid()
    }
}

impl fmt::Display for CellCoord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.zoom, self.id.0)
    }
}
