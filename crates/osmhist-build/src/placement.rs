//! Mapping aggregate bounding boxes to storage cells.

use osmhist_codec::{Coord, IntBbox};
use osmhist_spatial::{BoundingBox, CellCoord, FixedGrid, ZGrid, fixed, zorder};
use tracing::warn;

/// A grid that can file an entity under one cell.
pub trait Placement: Send + Sync {
    /// Cell for a valid, non-empty box. May return an invalid id when the box
    /// lies outside the grid domain.
    fn locate(&self, bbox: &BoundingBox) -> CellCoord;

    /// Extent of a cell previously returned by [`Placement::locate`].
    fn cell_bounds(&self, coord: CellCoord) -> Option<BoundingBox>;

    /// Cell for an entity with the given aggregate box.
    ///
    /// Entities without any visible coordinate, or whose box the grid cannot
    /// place, go to [`CellCoord::UNLOCATED`].
    fn place(&self, bbox: Option<BoundingBox>) -> CellCoord {
        let Some(bbox) = bbox else {
            return CellCoord::UNLOCATED;
        };
        let coord = self.locate(&bbox);
        if coord.is_unlocated() {
            warn!(?bbox, "bbox outside the grid domain, storing as unlocated");
            return CellCoord::UNLOCATED;
        }
        coord
    }

    /// South-west corner of a cell in fixed-point units; the origin for the
    /// unlocated bucket.
    fn cell_origin(&self, coord: CellCoord) -> Coord {
        if coord.is_unlocated() {
            return Coord::default();
        }
        self.cell_bounds(coord)
            .map(|b| Coord::from_degrees(b.min_lon, b.min_lat))
            .unwrap_or_default()
    }
}

impl Placement for FixedGrid {
    fn locate(&self, bbox: &BoundingBox) -> CellCoord {
        self.place_bbox(bbox)
    }

    fn cell_bounds(&self, coord: CellCoord) -> Option<BoundingBox> {
        fixed::cell_to_bbox(coord.zoom, coord.id)
    }
}

impl Placement for ZGrid {
    fn locate(&self, bbox: &BoundingBox) -> CellCoord {
        self.place_bbox(bbox)
    }

    fn cell_bounds(&self, coord: CellCoord) -> Option<BoundingBox> {
        zorder::cell_to_bbox(coord.id)
    }
}

/// Grid chosen at runtime from configuration.
#[derive(Clone, Copy, Debug)]
pub enum Grid {
    Fixed(FixedGrid),
    ZOrder(ZGrid),
}

impl Placement for Grid {
    fn locate(&self, bbox: &BoundingBox) -> CellCoord {
        match self {
            Self::Fixed(grid) => grid.locate(bbox),
            Self::ZOrder(grid) => grid.locate(bbox),
        }
    }

    fn cell_bounds(&self, coord: CellCoord) -> Option<BoundingBox> {
        match self {
            Self::Fixed(grid) => grid.cell_bounds(coord),
            Self::ZOrder(grid) => grid.cell_bounds(coord),
        }
    }
}

/// Fixed-point box in degrees.
#[must_use]
pub fn to_degrees(bbox: IntBbox) -> BoundingBox {
    let (min_lon, min_lat) = bbox.min().to_degrees();
    let (max_lon, max_lat) = Coord::new(bbox.max_lon, bbox.max_lat).to_degrees();
    BoundingBox::new(min_lon, min_lat, max_lon, max_lat)
}
