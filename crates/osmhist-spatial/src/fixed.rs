//! Fixed quadtree: one uniform grid per zoom level.
//!
//! At zoom `z` every cell is a square of `360 / 2^z` degrees. Columns count
//! from the antimeridian eastwards and rows from the south pole northwards,
//! so the linear id is `row * 2^z + col`:
//!
//! ```text
//! zoom 2 (cell width 90°)
//!
//!  90° ┌────┬────┬────┬────┐
//!      │  4 │  5 │  6 │  7 │
//!   0° ├────┼────┼────┼────┤
//!      │  0 │  1 │  2 │  3 │
//! -90° └────┴────┴────┴────┘
//!    -180  -90    0   90  180
//! ```
//!
//! Points on the eastern or northern domain edge are snapped into the last
//! column or row, so every valid point belongs to exactly one cell.

use std::ops::RangeInclusive;

use crate::bbox::{BoundingBox, MAX_LAT, MAX_LON, in_lat_domain, in_lon_domain, normalize};
use crate::{CellCoord, CellId};

/// Highest zoom the fixed grid supports (ids still fit in an `i64`).
pub const MAX_ZOOM: u8 = 30;

/// An entity may touch at most this many cells (estimated) at its level.
pub const FAN_OUT_LIMIT: f64 = 4.0;

/// Width in degrees of a cell at `zoom`, with `zoom` clamped to [`MAX_ZOOM`].
#[must_use]
pub fn cell_width(zoom: u8) -> f64 {
    360.0 / (1_u64 << zoom.min(MAX_ZOOM)) as f64
}

/// Map a point to its cell at `zoom`.
///
/// Returns [`CellId::INVALID`] for coordinates outside the lon/lat domain
/// or a zoom beyond [`MAX_ZOOM`].
#[must_use]
pub fn point_to_cell(lon: f64, lat: f64, zoom: u8) -> CellId {
    if zoom > MAX_ZOOM || !in_lon_domain(lon) || !in_lat_domain(lat) {
        return CellId::INVALID;
    }
    let (row, col) = row_col(lon, lat, zoom);
    CellId((row << zoom) + col)
}

/// Row and column of a point already known to be inside the domain.
fn row_col(lon: f64, lat: f64, zoom: u8) -> (i64, i64) {
    let width = cell_width(zoom);
    let columns = 1_i64 << zoom;
    let x = normalize(lon, MAX_LON);
    let y = normalize(lat, MAX_LAT);
    let col = ((x / width).floor() as i64).min(columns - 1);
    let row = ((y / width).floor() as i64).min(row_count(zoom) - 1);
    (row, col)
}

/// Number of rows needed to cover 180 degrees of latitude.
fn row_count(zoom: u8) -> i64 {
    ((1_i64 << zoom) + 1) / 2
}

/// Bounding box of a cell, or `None` if `id` is not a cell at `zoom`.
#[must_use]
pub fn cell_to_bbox(zoom: u8, id: CellId) -> Option<BoundingBox> {
    if zoom > MAX_ZOOM || !id.is_valid() {
        return None;
    }
    let columns = 1_i64 << zoom;
    let row = id.0 >> zoom;
    let col = id.0 & (columns - 1);
    if row >= row_count(zoom) {
        return None;
    }
    let width = cell_width(zoom);
    let min_lon = col as f64 * width - MAX_LON;
    let min_lat = row as f64 * width - MAX_LAT;
    Some(BoundingBox::new(
        min_lon,
        min_lat,
        (min_lon + width).min(MAX_LON),
        (min_lat + width).min(MAX_LAT),
    ))
}

/// Cheap area estimate of how many cells at `zoom` a box touches.
///
/// This is not an exact tile count: a tiny box straddling a cell corner
/// touches four cells but estimates near zero.
#[must_use]
pub fn estimated_cell_count(bbox: &BoundingBox, zoom: u8) -> f64 {
    let width = cell_width(zoom);
    (bbox.width() / width) * (bbox.height() / width)
}

/// A contiguous run of columns within one row.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CellRange {
    pub zoom: u8,
    pub row: i64,
    pub cols: RangeInclusive<i64>,
}

impl CellRange {
    /// Cell ids covered by this run.
    pub fn ids(&self) -> impl Iterator<Item = CellId> + '_ {
        let base = self.row << self.zoom;
        self.cols.clone().map(move |col| CellId(base + col))
    }

    /// Number of cells in the run.
    #[must_use]
    pub fn len(&self) -> usize {
        self.cols.clone().count()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.cols.is_empty()
    }
}

/// Uniform per-zoom grid with level selection bounded by `max_zoom`.
#[derive(Clone, Copy, Debug)]
pub struct FixedGrid {
    max_zoom: u8,
    fan_out_limit: f64,
}

impl FixedGrid {
    /// Create a grid whose finest level is `max_zoom` (clamped to [`MAX_ZOOM`]).
    #[must_use]
    pub fn new(max_zoom: u8) -> Self {
        Self {
            max_zoom: max_zoom.min(MAX_ZOOM),
            fan_out_limit: FAN_OUT_LIMIT,
        }
    }

    /// Replace the estimated cell count above which level selection steps up.
    #[must_use]
    pub fn with_fan_out_limit(mut self, limit: f64) -> Self {
        self.fan_out_limit = limit;
        self
    }

    #[must_use]
    pub const fn max_zoom(&self) -> u8 {
        self.max_zoom
    }

    #[must_use]
    pub const fn fan_out_limit(&self) -> f64 {
        self.fan_out_limit
    }

    /// Coarsest-needed level for a box.
    ///
    /// Starting at `max_zoom`, steps up while the box is estimated to touch
    /// more than the fan-out limit ([`FAN_OUT_LIMIT`] by default) cells,
    /// stopping at zoom 0.
    #[must_use]
    pub fn select_zoom(&self, bbox: &BoundingBox) -> u8 {
        let mut zoom = self.max_zoom;
        while zoom > 0 && estimated_cell_count(bbox, zoom) > self.fan_out_limit {
            zoom -= 1;
        }
        zoom
    }

    /// Cell holding the south-west corner of `bbox` at `zoom`.
    ///
    /// The box is not guaranteed to fit inside the returned cell.
    #[must_use]
    pub fn bbox_to_cell(&self, bbox: &BoundingBox, zoom: u8) -> CellId {
        if !bbox.is_valid() {
            return CellId::INVALID;
        }
        point_to_cell(bbox.min_lon, bbox.min_lat, zoom)
    }

    /// Select a zoom level and the cell at that level for `bbox`.
    #[must_use]
    pub fn place_bbox(&self, bbox: &BoundingBox) -> CellCoord {
        let zoom = self.select_zoom(bbox);
        CellCoord::new(zoom, self.bbox_to_cell(bbox, zoom))
    }

    /// Cells at `zoom` overlapping `bbox`, as one column run per row.
    ///
    /// An invalid box yields no ranges.
    #[must_use]
    pub fn bbox_to_cells(&self, bbox: &BoundingBox, zoom: u8) -> Vec<CellRange> {
        self.cell_ranges(bbox, zoom, false)
    }

    /// Like [`Self::bbox_to_cells`], but widened by one cell to the west and
    /// south.
    ///
    /// Entities are filed under the cell of their south-west corner, so an
    /// entity overlapping `bbox` may live in a neighbouring cell.
    #[must_use]
    pub fn bbox_to_cells_enlarged(&self, bbox: &BoundingBox, zoom: u8) -> Vec<CellRange> {
        self.cell_ranges(bbox, zoom, true)
    }

    fn cell_ranges(&self, bbox: &BoundingBox, zoom: u8, enlarge: bool) -> Vec<CellRange> {
        if zoom > MAX_ZOOM || !bbox.is_valid() {
            return Vec::new();
        }
        let (mut min_row, mut min_col) = row_col(bbox.min_lon, bbox.min_lat, zoom);
        let (max_row, max_col) = row_col(bbox.max_lon, bbox.max_lat, zoom);
        if enlarge {
            min_row = (min_row - 1).max(0);
            min_col = (min_col - 1).max(0);
        }
        (min_row..=max_row)
            .map(|row| CellRange {
                zoom,
                row,
                cols: min_col..=max_col,
            })
            .collect()
    }
}

impl Default for FixedGrid {
    fn default() -> Self {
        Self::new(15)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_points() -> impl Iterator<Item = (f64, f64)> {
        let lons = [-180.0, -179.5, -90.0, -0.000001, 0.0, 12.345678, 89.99, 179.999999999, 180.0];
        let lats = [-90.0, -45.3, -0.5, 0.0, 33.3, 89.9999999, 90.0];
        lons.into_iter()
            .flat_map(move |lon| lats.into_iter().map(move |lat| (lon, lat)))
    }

    #[test]
    fn test_known_cells() {
        assert_eq!(point_to_cell(0.0, 0.0, 2), CellId(6));
        assert_eq!(point_to_cell(-180.0, -90.0, 0), CellId(0));
        assert_eq!(point_to_cell(180.0, 90.0, 0), CellId(0));
        assert_eq!(point_to_cell(179.999999999, 90.0, 2), CellId(7));
        assert_eq!(point_to_cell(-180.0, -90.0, 2), CellId(0));
        assert_eq!(point_to_cell(-91.0, 10.0, 2), CellId(4));
    }

    #[test]
    fn test_east_edge_stays_in_last_column() {
        // lon 180 is clamped into the last column rather than wrapped to column 0
        assert_eq!(point_to_cell(180.0, 0.0, 2), CellId(7));
        assert_eq!(point_to_cell(-180.0, 0.0, 2), CellId(4));
    }

    #[test]
    fn test_out_of_domain_is_invalid() {
        assert_eq!(point_to_cell(180.000000000005, 0.0, 3), CellId::INVALID);
        assert_eq!(point_to_cell(-180.000000000005, 0.0, 3), CellId::INVALID);
        assert_eq!(point_to_cell(0.0, 90.000000000005, 3), CellId::INVALID);
        assert_eq!(point_to_cell(180.5, 0.0, 3), CellId::INVALID);
        assert_eq!(point_to_cell(0.0, -91.0, 3), CellId::INVALID);
        assert_eq!(point_to_cell(0.0, 0.0, MAX_ZOOM + 1), CellId::INVALID);
        assert_eq!(cell_to_bbox(2, CellId(8)), None);
        assert_eq!(cell_to_bbox(2, CellId::INVALID), None);
    }

    #[test]
    fn test_cell_contains_its_points() {
        for zoom in 0..=18 {
            for (lon, lat) in sample_points() {
                let id = point_to_cell(lon, lat, zoom);
                let bbox = cell_to_bbox(zoom, id).unwrap();
                assert!(
                    bbox.contains_point(lon, lat),
                    "zoom {zoom}: ({lon}, {lat}) not in {bbox:?} of {id:?}"
                );
            }
        }
    }

    #[test]
    fn test_point_cell_is_in_point_range() {
        let grid = FixedGrid::new(18);
        for zoom in 0..=18 {
            for (lon, lat) in sample_points() {
                let id = point_to_cell(lon, lat, zoom);
                let ranges = grid.bbox_to_cells(&BoundingBox::point(lon, lat), zoom);
                let ids: Vec<_> = ranges.iter().flat_map(CellRange::ids).collect();
                assert_eq!(ids, vec![id], "zoom {zoom}: ({lon}, {lat})");
            }
        }
    }

    #[test]
    fn test_cell_width_clamps_zoom() {
        assert_eq!(cell_width(0), 360.0);
        assert_eq!(cell_width(200), cell_width(MAX_ZOOM));
        let bbox = BoundingBox::new(0.0, 0.0, 1.0, 1.0);
        assert_eq!(
            estimated_cell_count(&bbox, u8::MAX),
            estimated_cell_count(&bbox, MAX_ZOOM)
        );
    }

    #[test]
    fn test_cell_to_bbox_roundtrip() {
        let bbox = cell_to_bbox(2, CellId(6)).unwrap();
        assert_eq!(bbox, BoundingBox::new(0.0, 0.0, 90.0, 90.0));
        let world = cell_to_bbox(0, CellId(0)).unwrap();
        assert_eq!(world, BoundingBox::WORLD);
    }

    #[test]
    fn test_level_selection_bound() {
        let grid = FixedGrid::new(15);
        let boxes = [
            BoundingBox::point(8.67, 49.41),
            BoundingBox::new(8.6, 49.3, 8.7, 49.5),
            BoundingBox::new(-10.0, 35.0, 30.0, 60.0),
            BoundingBox::new(-170.0, -80.0, 170.0, 80.0),
            BoundingBox::WORLD,
        ];
        for bbox in &boxes {
            let zoom = grid.select_zoom(bbox);
            assert!(
                zoom == 0 || estimated_cell_count(bbox, zoom) <= FAN_OUT_LIMIT,
                "{bbox:?} at zoom {zoom}"
            );
            if zoom < grid.max_zoom() {
                assert!(estimated_cell_count(bbox, zoom + 1) > FAN_OUT_LIMIT);
            }
        }
        assert_eq!(grid.select_zoom(&boxes[0]), 15);
        // 2x1 cells of 180 degrees cover the world
        assert_eq!(grid.select_zoom(&BoundingBox::WORLD), 1);

        let strict = grid.with_fan_out_limit(1.0);
        assert_eq!(strict.select_zoom(&BoundingBox::WORLD), 0);
        assert_eq!(strict.select_zoom(&boxes[0]), 15);
    }

    #[test]
    fn test_place_uses_south_west_corner() {
        let grid = FixedGrid::new(4);
        let bbox = BoundingBox::new(1.0, 1.0, 2.0, 2.0);
        let coord = grid.place_bbox(&bbox);
        assert_eq!(coord.zoom, 4);
        assert_eq!(coord.id, point_to_cell(1.0, 1.0, 4));
        assert_eq!(
            grid.place_bbox(&BoundingBox::new(5.0, 0.0, 1.0, 1.0)).id,
            CellId::INVALID
        );
    }

    #[test]
    fn test_bbox_to_cells_rows() {
        let grid = FixedGrid::new(4);
        // zoom 2: spans columns 1..=2 and rows 0..=1
        let ranges = grid.bbox_to_cells(&BoundingBox::new(-45.0, -45.0, 45.0, 45.0), 2);
        assert_eq!(ranges.len(), 2);
        assert_eq!(ranges[0].cols, 1..=2);
        let ids: Vec<_> = ranges.iter().flat_map(CellRange::ids).collect();
        assert_eq!(ids, vec![CellId(1), CellId(2), CellId(5), CellId(6)]);
    }

    #[test]
    fn test_enlarged_range_includes_south_west_neighbours() {
        let grid = FixedGrid::new(4);
        let ranges = grid.bbox_to_cells_enlarged(&BoundingBox::point(45.0, 45.0), 2);
        let ids: Vec<_> = ranges.iter().flat_map(CellRange::ids).collect();
        assert_eq!(ids, vec![CellId(1), CellId(2), CellId(5), CellId(6)]);

        let corner = grid.bbox_to_cells_enlarged(&BoundingBox::point(-180.0, -90.0), 2);
        let ids: Vec<_> = corner.iter().flat_map(CellRange::ids).collect();
        assert_eq!(ids, vec![CellId(0)]);
    }
}
