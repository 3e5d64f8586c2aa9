//! In-memory grid cell store.

use std::collections::BTreeMap;

use bytes::Bytes;
use osmhist_codec::OsmType;
use parking_lot::Mutex;

use crate::error::StoreResult;
use crate::key::CellKey;
use crate::{GridCellStore, merge_blobs};

/// Grid cell store backed by an ordered map behind a mutex.
#[derive(Debug, Default)]
pub struct MemoryCellStore {
    cells: Mutex<BTreeMap<CellKey, Bytes>>,
}

impl MemoryCellStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored cells across all entity types.
    #[must_use]
    pub fn len(&self) -> usize {
        self.cells.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.cells.lock().is_empty()
    }
}

impl GridCellStore for MemoryCellStore {
    fn put(&self, osm_type: OsmType, zoom: u8, cell_id: i64, bytes: Bytes) -> StoreResult<()> {
        let key = CellKey::new(osm_type, zoom, cell_id);
        let mut cells = self.cells.lock();
        let value = match cells.remove(&key) {
            Some(existing) => match merge_blobs(osm_type, existing.clone(), bytes) {
                Ok(merged) => merged,
                Err(err) => {
                    cells.insert(key, existing);
                    return Err(err);
                }
            },
            None => bytes,
        };
        tracing::trace!(%osm_type, zoom, cell_id, len = value.len(), "stored cell");
        cells.insert(key, value);
        Ok(())
    }

    fn get(&self, osm_type: OsmType, zoom: u8, cell_id: i64) -> StoreResult<Option<Bytes>> {
        let key = CellKey::new(osm_type, zoom, cell_id);
        Ok(self.cells.lock().get(&key).cloned())
    }

    fn cells(&self, osm_type: OsmType) -> StoreResult<Vec<(u8, i64)>> {
        let cells = self.cells.lock();
        Ok(cells
            .keys()
            .filter(|key| key.osm_type() == Some(osm_type))
            .map(|key| (key.zoom(), key.cell_id()))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use osmhist_codec::NodePayload;

    use super::*;
    use crate::test_support::{ids, node_cell};

    #[test]
    fn test_put_get() {
        let store = MemoryCellStore::new();
        let cell = node_cell(2, 5, &[1, 2, 3]);
        store
            .put(OsmType::Node, 2, 5, cell.as_bytes().clone())
            .unwrap();

        assert_eq!(store.len(), 1);
        assert_eq!(
            store.get(OsmType::Node, 2, 5).unwrap().as_ref(),
            Some(cell.as_bytes())
        );
        assert_eq!(store.get(OsmType::Way, 2, 5).unwrap(), None);
        assert_eq!(store.get(OsmType::Node, 2, 6).unwrap(), None);

        let parsed = store.get_cell::<NodePayload>(2, 5).unwrap().unwrap();
        assert_eq!(ids(&parsed), [1, 2, 3]);
    }

    #[test]
    fn test_put_merges() {
        let store = MemoryCellStore::new();
        let first = node_cell(2, 5, &[1, 4]);
        let second = node_cell(2, 5, &[2, 4, 9]);
        store.put(OsmType::Node, 2, 5, first.into_bytes()).unwrap();
        store.put(OsmType::Node, 2, 5, second.into_bytes()).unwrap();

        let merged = store.get_cell::<NodePayload>(2, 5).unwrap().unwrap();
        assert_eq!(ids(&merged), [1, 2, 4, 9]);
    }

    #[test]
    fn test_failed_merge_keeps_existing() {
        let store = MemoryCellStore::new();
        let cell = node_cell(1, 0, &[7]);
        store.put(OsmType::Node, 1, 0, cell.as_bytes().clone()).unwrap();

        assert!(store
            .put(OsmType::Node, 1, 0, Bytes::from_static(&[0xFF]))
            .is_err());
        assert_eq!(
            store.get(OsmType::Node, 1, 0).unwrap().as_ref(),
            Some(cell.as_bytes())
        );
    }

    #[test]
    fn test_cells_listing() {
        let store = MemoryCellStore::new();
        for (zoom, id) in [(3, 10), (0, -1), (3, 2)] {
            let cell = node_cell(zoom, id, &[1]);
            store.put(OsmType::Node, zoom, id, cell.into_bytes()).unwrap();
        }
        let way = node_cell(1, 1, &[1]);
        store.put(OsmType::Way, 1, 1, way.into_bytes()).unwrap();

        assert_eq!(
            store.cells(OsmType::Node).unwrap(),
            [(0, -1), (3, 2), (3, 10)]
        );
        assert_eq!(store.cells(OsmType::Way).unwrap(), [(1, 1)]);
        assert!(store.cells(OsmType::Relation).unwrap().is_empty());
    }

    #[test]
    fn test_concurrent_puts() {
        let store = MemoryCellStore::new();
        std::thread::scope(|scope| {
            for shard in 0..4_i64 {
                let store = &store;
                scope.spawn(move || {
                    let ids: Vec<i64> = (0..10).map(|i| shard * 100 + i).collect();
                    let cell = node_cell(4, 8, &ids);
                    store.put(OsmType::Node, 4, 8, cell.into_bytes()).unwrap();
                });
            }
        });
        let merged = store.get_cell::<NodePayload>(4, 8).unwrap().unwrap();
        assert_eq!(merged.len(), 40);
    }
}
