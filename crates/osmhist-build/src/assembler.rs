//! Bucketing placed entities per cell and sealing the buckets into a store.

use std::cmp::Reverse;

use hashbrown::HashMap;
use osmhist_codec::{Base, CompactedEntity, GridCell, IntBbox, Payload, Version};
use osmhist_spatial::CellCoord;
use osmhist_store::GridCellStore;
use tracing::debug;

use crate::error::BuildResult;
use crate::placement::{Placement, to_degrees};

/// An entity waiting for its cell to be sealed.
#[derive(Clone, Debug)]
pub struct PendingEntity<P> {
    pub id: i64,
    /// Newest first.
    pub versions: Vec<Version<P>>,
    /// Aggregate box over the entity (nodes) or its children (ways, relations).
    pub bbox: Option<IntBbox>,
}

impl<P: Payload> PendingEntity<P> {
    /// Wrap a non-empty version group, ordering it newest first.
    pub fn new(mut versions: Vec<Version<P>>, bbox: Option<IntBbox>) -> Option<Self> {
        let id = versions.first()?.id;
        versions.sort_by_key(|v| Reverse(v.number()));
        Some(Self { id, versions, bbox })
    }

    fn min_timestamp(&self) -> Option<i64> {
        self.versions.iter().map(|v| v.timestamp).min()
    }
}

/// Outcome of sealing one assembler.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct AssemblyStats {
    pub cells: usize,
    pub entities: usize,
    /// Entities filed under the unlocated bucket.
    pub unlocated: usize,
    pub bytes: usize,
}

impl std::ops::AddAssign for AssemblyStats {
    fn add_assign(&mut self, rhs: Self) {
        self.cells += rhs.cells;
        self.entities += rhs.entities;
        self.unlocated += rhs.unlocated;
        self.bytes += rhs.bytes;
    }
}

/// Per-cell buckets of one entity type, filled during a pass.
pub struct CellAssembler<G, P> {
    grid: G,
    buckets: HashMap<CellCoord, Vec<PendingEntity<P>>>,
    pending: usize,
}

impl<G: Placement, P: Payload> CellAssembler<G, P> {
    pub fn new(grid: G) -> Self {
        Self {
            grid,
            buckets: HashMap::new(),
            pending: 0,
        }
    }

    pub fn grid(&self) -> &G {
        &self.grid
    }

    /// Cell an entity with this aggregate box is filed under.
    pub fn place(&self, bbox: Option<IntBbox>) -> CellCoord {
        self.grid.place(bbox.map(to_degrees))
    }

    pub fn append(&mut self, coord: CellCoord, entity: PendingEntity<P>) {
        self.buckets.entry(coord).or_default().push(entity);
        self.pending += 1;
    }

    /// Place and append an entity, returning its cell.
    pub fn add(&mut self, entity: PendingEntity<P>) -> CellCoord {
        let coord = self.place(entity.bbox);
        self.append(coord, entity);
        coord
    }

    /// Entities appended so far.
    pub fn len(&self) -> usize {
        self.pending
    }

    pub fn is_empty(&self) -> bool {
        self.pending == 0
    }

    /// Non-empty buckets so far.
    pub fn cell_count(&self) -> usize {
        self.buckets.len()
    }

    /// Encode every bucket into a sealed cell, in cell order.
    pub fn seal(self) -> BuildResult<Vec<(CellCoord, GridCell<P>)>> {
        let mut buckets: Vec<_> = self.buckets.into_iter().collect();
        buckets.sort_unstable_by_key(|(coord, _)| *coord);

        let mut cells = Vec::with_capacity(buckets.len());
        for (coord, mut entities) in buckets {
            entities.sort_by_key(|e| e.id);
            let base = cell_base(&self.grid, coord, &entities);
            let encoded = entities
                .iter()
                .map(|e| CompactedEntity::build(&e.versions, base, e.bbox))
                .collect();
            let cell = GridCell::seal(coord.zoom, coord.id.get(), base, encoded)?;
            debug!(
                osm_type = %P::TYPE,
                %coord,
                entities = cell.len(),
                bytes = cell.as_bytes().len(),
                "sealed cell"
            );
            cells.push((coord, cell));
        }
        Ok(cells)
    }

    /// Seal every bucket and hand it to `store`.
    pub fn seal_into(self, store: &impl GridCellStore) -> BuildResult<AssemblyStats> {
        let mut stats = AssemblyStats::default();
        for (coord, cell) in self.seal()? {
            stats.cells += 1;
            stats.entities += cell.len();
            if coord.is_unlocated() {
                stats.unlocated += cell.len();
            }
            stats.bytes += cell.as_bytes().len();
            store.put(P::TYPE, coord.zoom, coord.id.get(), cell.into_bytes())?;
        }
        Ok(stats)
    }
}

/// Base shared by a bucket: smallest id and timestamp, cell south-west corner.
fn cell_base<G: Placement, P: Payload>(
    grid: &G,
    coord: CellCoord,
    entities: &[PendingEntity<P>],
) -> Base {
    let id = entities.iter().map(|e| e.id).min().unwrap_or(0);
    let timestamp = entities
        .iter()
        .filter_map(PendingEntity::min_timestamp)
        .min()
        .unwrap_or(0);
    let origin = grid.cell_origin(coord);
    Base::new(id, timestamp, origin.lon, origin.lat)
}
