//! Adaptive quadtree addressed by Z-order (Morton) paths.
//!
//! A cell id packs its zoom into the high bits and the interleaved
//! `(col, row)` quad path into the low bits:
//!
//! ```text
//! ┌──────────┬────────────────────────────────────────────────────┐
//! │ zoom (8) │ morton path (56) = ... r1 c1 r0 c0                  │
//! └──────────┴────────────────────────────────────────────────────┘
//! ```
//!
//! The root square spans 360 degrees starting at (-180, -90), the same
//! squares the fixed grid uses, so its northern half never holds data.
//! Each level halves the square; the child index is `(row_bit << 1) | col_bit`.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use smallvec::SmallVec;

use crate::bbox::{BoundingBox, MAX_LAT, MAX_LON, normalize};
use crate::fixed::cell_width;
use crate::{CellCoord, CellId};

/// Deepest zoom representable in a packed id.
pub const MAX_ZOOM: u8 = 28;

const ZOOM_SHIFT: u32 = 56;
const PATH_MASK: i64 = (1 << ZOOM_SHIFT) - 1;

/// Pack a zoom and Morton path into a cell id.
#[must_use]
pub const fn pack(zoom: u8, path: u64) -> CellId {
    CellId(((zoom as i64) << ZOOM_SHIFT) | (path as i64 & PATH_MASK))
}

/// Zoom level encoded in `id`.
#[must_use]
pub const fn zoom_of(id: CellId) -> u8 {
    (id.0 >> ZOOM_SHIFT) as u8
}

/// Morton path encoded in `id`.
#[must_use]
pub const fn path_of(id: CellId) -> u64 {
    (id.0 & PATH_MASK) as u64
}

/// Interleave column and row bits (column in the even positions).
#[must_use]
pub fn morton(col: u32, row: u32) -> u64 {
    spread(col) | (spread(row) << 1)
}

/// Inverse of [`morton`].
#[must_use]
pub fn demorton(path: u64) -> (u32, u32) {
    (compact(path), compact(path >> 1))
}

fn spread(v: u32) -> u64 {
    let mut x = u64::from(v);
    x = (x | (x << 16)) & 0x0000_FFFF_0000_FFFF;
    x = (x | (x << 8)) & 0x00FF_00FF_00FF_00FF;
    x = (x | (x << 4)) & 0x0F0F_0F0F_0F0F_0F0F;
    x = (x | (x << 2)) & 0x3333_3333_3333_3333;
    (x | (x << 1)) & 0x5555_5555_5555_5555
}

fn compact(v: u64) -> u32 {
    let mut x = v & 0x5555_5555_5555_5555;
    x = (x | (x >> 1)) & 0x3333_3333_3333_3333;
    x = (x | (x >> 2)) & 0x0F0F_0F0F_0F0F_0F0F;
    x = (x | (x >> 4)) & 0x00FF_00FF_00FF_00FF;
    x = (x | (x >> 8)) & 0x0000_FFFF_0000_FFFF;
    ((x | (x >> 16)) & 0x0000_0000_FFFF_FFFF) as u32
}

/// Parent of `id`, or [`CellId::INVALID`] for the root and invalid ids.
#[must_use]
pub fn parent(id: CellId) -> CellId {
    if !id.is_valid() || zoom_of(id) == 0 {
        return CellId::INVALID;
    }
    pack(zoom_of(id) - 1, path_of(id) >> 2)
}

/// Ancestor of `id` at `zoom` (the cell itself if `zoom` is its own level).
#[must_use]
pub fn parent_at(id: CellId, zoom: u8) -> CellId {
    if !id.is_valid() || zoom > zoom_of(id) {
        return CellId::INVALID;
    }
    let levels = zoom_of(id) - zoom;
    pack(zoom, path_of(id) >> (2 * u32::from(levels)))
}

/// Full square of a cell (not clipped to the latitude domain).
#[must_use]
pub fn cell_to_bbox(id: CellId) -> Option<BoundingBox> {
    if !id.is_valid() || zoom_of(id) > MAX_ZOOM {
        return None;
    }
    Some(square(zoom_of(id), path_of(id)))
}

fn square(zoom: u8, path: u64) -> BoundingBox {
    let width = cell_width(zoom);
    let (col, row) = demorton(path);
    let min_lon = f64::from(col) * width - MAX_LON;
    let min_lat = f64::from(row) * width - MAX_LAT;
    BoundingBox::new(min_lon, min_lat, min_lon + width, min_lat + width)
}

/// Total order matching a pre-order walk of the quadtree.
///
/// Paths are left-aligned to [`MAX_ZOOM`] and compared; an ancestor sorts
/// before its descendants. Invalid ids sort first.
#[must_use]
pub fn dfs_cmp(a: CellId, b: CellId) -> Ordering {
    dfs_key(a).cmp(&dfs_key(b))
}

fn dfs_key(id: CellId) -> (bool, u64, u8) {
    if !id.is_valid() {
        return (false, 0, 0);
    }
    let zoom = zoom_of(id);
    let aligned = path_of(id) << (2 * u32::from(MAX_ZOOM - zoom.min(MAX_ZOOM)));
    (true, aligned, zoom)
}

/// Z-order adaptive grid.
#[derive(Clone, Copy, Debug)]
pub struct ZGrid {
    max_zoom: u8,
}

impl ZGrid {
    /// Create a grid whose deepest level is `max_zoom` (clamped to [`MAX_ZOOM`]).
    #[must_use]
    pub fn new(max_zoom: u8) -> Self {
        Self {
            max_zoom: max_zoom.min(MAX_ZOOM),
        }
    }

    #[must_use]
    pub const fn max_zoom(&self) -> u8 {
        self.max_zoom
    }

    /// Smallest cell whose square fully contains `bbox`, capped at `max_zoom`.
    ///
    /// Returns [`CellId::INVALID`] for an invalid box.
    #[must_use]
    pub fn deepest_containing_cell(&self, bbox: &BoundingBox) -> CellId {
        if !bbox.is_valid() {
            return CellId::INVALID;
        }
        let x0 = normalize(bbox.min_lon, MAX_LON);
        let x1 = normalize(bbox.max_lon, MAX_LON);
        let y0 = normalize(bbox.min_lat, MAX_LAT);
        let y1 = normalize(bbox.max_lat, MAX_LAT);

        let mut zoom = 0;
        let (mut col, mut row) = (0, 0);
        while zoom < self.max_zoom {
            let width = cell_width(zoom + 1);
            let c0 = (x0 / width).floor() as u32;
            let r0 = (y0 / width).floor() as u32;
            if c0 != (x1 / width).floor() as u32 || r0 != (y1 / width).floor() as u32 {
                break;
            }
            zoom += 1;
            col = c0;
            row = r0;
        }
        pack(zoom, morton(col, row))
    }

    /// Placement coordinate for `bbox`.
    #[must_use]
    pub fn place_bbox(&self, bbox: &BoundingBox) -> CellCoord {
        let id = self.deepest_containing_cell(bbox);
        if id.is_valid() {
            CellCoord::new(zoom_of(id), id)
        } else {
            CellCoord::UNLOCATED
        }
    }

    /// Depth-first walk over every cell from the root to `max_zoom` whose
    /// square intersects `query`, in [`dfs_cmp`] order.
    #[must_use]
    pub fn range(&self, query: BoundingBox) -> DfsRange {
        let mut stack = SmallVec::new();
        if query.is_valid() {
            stack.push(Frame {
                zoom: 0,
                path: 0,
                complete: false,
            });
        }
        DfsRange {
            query,
            max_zoom: self.max_zoom,
            stack,
        }
    }
}

impl Default for ZGrid {
    fn default() -> Self {
        Self::new(15)
    }
}

#[derive(Clone, Copy, Debug)]
struct Frame {
    zoom: u8,
    path: u64,
    /// An ancestor lies fully inside the query; skip intersection tests.
    complete: bool,
}

/// Iterator returned by [`ZGrid::range`].
#[derive(Debug)]
pub struct DfsRange {
    query: BoundingBox,
    max_zoom: u8,
    stack: SmallVec<[Frame; 64]>,
}

impl Iterator for DfsRange {
    type Item = CellId;

    fn next(&mut self) -> Option<CellId> {
        while let Some(mut frame) = self.stack.pop() {
            if !frame.complete {
                let cell = square(frame.zoom, frame.path);
                if !cell.intersects(&self.query) {
                    continue;
                }
                frame.complete = self.query.contains(&cell);
            }
            if frame.zoom < self.max_zoom {
                for child in (0..4).rev() {
                    self.stack.push(Frame {
                        zoom: frame.zoom + 1,
                        path: (frame.path << 2) | child,
                        complete: frame.complete,
                    });
                }
            }
            return Some(pack(frame.zoom, frame.path));
        }
        None
    }
}

struct HeapEntry<T> {
    id: CellId,
    source: usize,
    value: T,
}

impl<T> PartialEq for HeapEntry<T> {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl<T> Eq for HeapEntry<T> {}

impl<T> PartialOrd for HeapEntry<T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<T> Ord for HeapEntry<T> {
    // reversed: BinaryHeap is a max-heap
    fn cmp(&self, other: &Self) -> Ordering {
        dfs_cmp(other.id, self.id).then_with(|| other.source.cmp(&self.source))
    }
}

/// K-way merge of streams each already sorted by [`dfs_cmp`].
///
/// Equal ids are yielded in source order.
pub struct MergeDfs<I: Iterator> {
    sources: Vec<I>,
    heap: BinaryHeap<HeapEntry<I::Item>>,
}

impl<T, I: Iterator<Item = (CellId, T)>> MergeDfs<I> {
    pub fn new(sources: impl IntoIterator<Item = I>) -> Self {
        let mut sources: Vec<I> = sources.into_iter().collect();
        let mut heap = BinaryHeap::with_capacity(sources.len());
        for (source, iter) in sources.iter_mut().enumerate() {
            if let Some(item) = iter.next() {
                heap.push(HeapEntry {
                    id: item.0,
                    source,
                    value: item,
                });
            }
        }
        Self { sources, heap }
    }
}

impl<T, I: Iterator<Item = (CellId, T)>> Iterator for MergeDfs<I> {
    type Item = (CellId, T);

    fn next(&mut self) -> Option<Self::Item> {
        let top = self.heap.pop()?;
        if let Some(item) = self.sources[top.source].next() {
            self.heap.push(HeapEntry {
                id: item.0,
                source: top.source,
                value: item,
            });
        }
        Some(top.value)
    }
}
