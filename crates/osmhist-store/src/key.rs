//! Fixed-size store key for a grid cell.
//!
//! # Key Format
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────┐
//! │  CellKey (10 bytes)                                        │
//! ├────────────────────────────────────────────────────────────┤
//! │  osm_type: u8    (1 byte)  - node, way or relation         │
//! │  zoom: u8        (1 byte)  - grid level                    │
//! │  cell_id: [u8;8] (8 bytes) - big-endian, sign bit flipped  │
//! └────────────────────────────────────────────────────────────┘
//! ```
//!
//! Byte order equals `(osm_type, zoom, cell_id)` order, so all cells of one
//! type form a contiguous prefix range and the unlocated cell (-1) sorts
//! before every real cell of its level.

use bytemuck::{Pod, Zeroable};
use osmhist_codec::OsmType;

const SIGN: u64 = 1 << 63;

/// Key identifying one grid cell of one entity type.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Pod, Zeroable)]
#[repr(C)]
pub struct CellKey {
    osm_type: u8,
    zoom: u8,
    cell_id: [u8; 8],
}

impl CellKey {
    #[inline]
    #[must_use]
    pub const fn new(osm_type: OsmType, zoom: u8, cell_id: i64) -> Self {
        Self {
            osm_type: osm_type.as_u8(),
            zoom,
            cell_id: ((cell_id as u64) ^ SIGN).to_be_bytes(),
        }
    }

    /// Entity type, `None` if the key was not produced by [`CellKey::new`].
    #[inline]
    #[must_use]
    pub const fn osm_type(&self) -> Option<OsmType> {
        OsmType::from_u8(self.osm_type)
    }

    #[inline]
    #[must_use]
    pub const fn zoom(&self) -> u8 {
        self.zoom
    }

    #[inline]
    #[must_use]
    pub const fn cell_id(&self) -> i64 {
        (u64::from_be_bytes(self.cell_id) ^ SIGN) as i64
    }

    #[inline]
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        bytemuck::bytes_of(self)
    }

    #[inline]
    #[must_use]
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        bytemuck::try_pod_read_unaligned(bytes).ok()
    }

    /// Prefix shared by every key of `osm_type`.
    #[inline]
    #[must_use]
    pub const fn type_prefix(osm_type: OsmType) -> [u8; 1] {
        [osm_type.as_u8()]
    }
}
