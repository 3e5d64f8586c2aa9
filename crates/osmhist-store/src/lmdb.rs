//! LMDB-backed grid cell store.

use std::path::Path;

use bytes::Bytes;
use heed::types::Bytes as RawBytes;
use heed::{Database, Env, EnvOpenOptions};
use osmhist_codec::OsmType;

use crate::error::{StoreError, StoreResult};
use crate::key::CellKey;
use crate::{GridCellStore, merge_blobs};

/// Default LMDB map size (64 GiB of address space; pages are allocated lazily).
pub const DEFAULT_MAP_SIZE: usize = 64 * 1024 * 1024 * 1024;

/// Grid cell store in an LMDB environment.
///
/// Keys are [`CellKey`] bytes. Writers are serialized by LMDB; a `put` that
/// finds an existing blob merges inside the same write transaction.
pub struct LmdbCellStore {
    env: Env,
    db: Database<RawBytes, RawBytes>,
}

impl LmdbCellStore {
    /// Open or create a store at the given directory.
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        Self::open_with_map_size(path, DEFAULT_MAP_SIZE)
    }

    /// Open or create a store with an explicit map size in bytes.
    ///
    /// # Safety
    /// Uses unsafe to call heed's open method which requires that the
    /// environment is not opened twice in the same process with different
    /// options.
    #[allow(unsafe_code)]
    pub fn open_with_map_size(path: impl AsRef<Path>, map_size: usize) -> StoreResult<Self> {
        let path = path.as_ref();
        std::fs::create_dir_all(path)?;

        // SAFETY: each store directory is opened once per process
        let env = unsafe {
            EnvOpenOptions::new()
                .map_size(map_size)
                .max_dbs(1)
                .open(path)?
        };

        let mut wtxn = env.write_txn()?;
        let db = env.create_database(&mut wtxn, Some("cells"))?;
        wtxn.commit()?;

        Ok(Self { env, db })
    }

    /// Flush the environment to disk.
    pub fn sync(&self) -> StoreResult<()> {
        self.env.force_sync()?;
        Ok(())
    }
}

impl GridCellStore for LmdbCellStore {
    fn put(&self, osm_type: OsmType, zoom: u8, cell_id: i64, bytes: Bytes) -> StoreResult<()> {
        let key = CellKey::new(osm_type, zoom, cell_id);

        let mut wtxn = self.env.write_txn()?;
        let existing = self
            .db
            .get(&wtxn, key.as_bytes())?
            .map(Bytes::copy_from_slice);
        let value = match existing {
            Some(existing) => merge_blobs(osm_type, existing, bytes)?,
            None => bytes,
        };
        self.db.put(&mut wtxn, key.as_bytes(), &value)?;
        wtxn.commit()?;

        tracing::trace!(%osm_type, zoom, cell_id, len = value.len(), "persisted cell");
        Ok(())
    }

    fn get(&self, osm_type: OsmType, zoom: u8, cell_id: i64) -> StoreResult<Option<Bytes>> {
        let key = CellKey::new(osm_type, zoom, cell_id);

        let rtxn = self.env.read_txn()?;
        let Some(bytes) = self.db.get(&rtxn, key.as_bytes())? else {
            return Ok(None);
        };

        tracing::trace!(%osm_type, zoom, cell_id, "loaded cell");
        Ok(Some(Bytes::copy_from_slice(bytes)))
    }

    fn cells(&self, osm_type: OsmType) -> StoreResult<Vec<(u8, i64)>> {
        let rtxn = self.env.read_txn()?;
        let mut cells = Vec::new();
        for entry in self
            .db
            .prefix_iter(&rtxn, &CellKey::type_prefix(osm_type))?
        {
            let (raw, _) = entry?;
            let key = CellKey::from_bytes(raw).ok_or(StoreError::MalformedKey(raw.len()))?;
            cells.push((key.zoom(), key.cell_id()));
        }
        Ok(cells)
    }
}
