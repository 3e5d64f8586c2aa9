//! Persistence of sealed grid cells.
//!
//! A store is a key-value sink keyed by `(entity type, zoom, cell id)`.
//! Builders running on several threads may hand off the same cell; `put`
//! therefore merges into an existing blob instead of overwriting it.
//!
//! - [`MemoryCellStore`]: mutex-guarded map, for tests and small builds.
//! - [`LmdbCellStore`]: LMDB environment via `heed`.

pub mod error;
pub mod key;
pub mod lmdb;
pub mod memory;

use bytes::Bytes;
use osmhist_codec::{GridCell, NodePayload, OsmType, Payload, RelationPayload, WayPayload};

pub use error::{StoreError, StoreResult};
pub use key::CellKey;
pub use lmdb::LmdbCellStore;
pub use memory::MemoryCellStore;

/// Concurrent append/merge sink for grid cell blobs.
pub trait GridCellStore: Send + Sync {
    /// Store `bytes` at the cell, merging with any blob already present.
    fn put(&self, osm_type: OsmType, zoom: u8, cell_id: i64, bytes: Bytes) -> StoreResult<()>;

    /// Blob stored at the cell, if any.
    fn get(&self, osm_type: OsmType, zoom: u8, cell_id: i64) -> StoreResult<Option<Bytes>>;

    /// Every `(zoom, cell_id)` holding entities of `osm_type`, in key order.
    fn cells(&self, osm_type: OsmType) -> StoreResult<Vec<(u8, i64)>>;

    /// Fetch and parse a cell.
    fn get_cell<P: Payload>(&self, zoom: u8, cell_id: i64) -> StoreResult<Option<GridCell<P>>>
    where
        Self: Sized,
    {
        self.get(P::TYPE, zoom, cell_id)?
            .map(GridCell::from_bytes)
            .transpose()
            .map_err(StoreError::from)
    }
}

impl<S: GridCellStore + ?Sized> GridCellStore for &S {
    fn put(&self, osm_type: OsmType, zoom: u8, cell_id: i64, bytes: Bytes) -> StoreResult<()> {
        (**self).put(osm_type, zoom, cell_id, bytes)
    }

    fn get(&self, osm_type: OsmType, zoom: u8, cell_id: i64) -> StoreResult<Option<Bytes>> {
        (**self).get(osm_type, zoom, cell_id)
    }

    fn cells(&self, osm_type: OsmType) -> StoreResult<Vec<(u8, i64)>> {
        (**self).cells(osm_type)
    }
}

/// Merge two blobs of the same cell.
pub(crate) fn merge_blobs(osm_type: OsmType, existing: Bytes, incoming: Bytes) -> StoreResult<Bytes> {
    fn merge<P: Payload>(existing: Bytes, incoming: Bytes) -> StoreResult<Bytes> {
        let existing = GridCell::<P>::from_bytes(existing)?;
        let incoming = GridCell::<P>::from_bytes(incoming)?;
        Ok(existing.merge(&incoming)?.into_bytes())
    }

    match osm_type {
        OsmType::Node => merge::<NodePayload>(existing, incoming),
        OsmType::Way => merge::<WayPayload>(existing, incoming),
        OsmType::Relation => merge::<RelationPayload>(existing, incoming),
    }
}
