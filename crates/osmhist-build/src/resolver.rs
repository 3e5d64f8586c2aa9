//! Attaching children from the side channel to ascending parents.
//!
//! Parents and children are both sorted by id, so one forward pass over the
//! side channel serves every parent. Children read past on the way to a
//! requested id are kept in a small cache until their watermark (the last
//! parent needing them) has been processed.

use std::io::Read;

use hashbrown::HashMap;
use osmhist_codec::{CompactedEntity, Payload};
use tracing::{debug, warn};

use crate::error::BuildResult;
use crate::sidechannel::{SideChannelReader, SideChannelRecord};

/// A child held for later parents.
#[derive(Clone, Debug)]
pub struct CachedChild<P> {
    pub watermark: i64,
    pub entity: CompactedEntity<P>,
}

/// Counters over the lifetime of a resolver.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ResolverStats {
    /// Children served straight from the side channel.
    pub from_stream: u64,
    /// Children served from the retention cache.
    pub from_cache: u64,
    /// Requested children that could not be found.
    pub missing: u64,
    /// Cache entries dropped after their last parent.
    pub evicted: u64,
    /// Largest cache size observed.
    pub peak_cached: usize,
}

/// Merge-join of ascending parents against an ascending child stream.
pub struct BackReferenceResolver<R, P> {
    stream: SideChannelReader<R, P>,
    cache: HashMap<i64, CachedChild<P>>,
    /// Highest child id taken from the stream.
    last_consumed: Option<i64>,
    last_parent: Option<i64>,
    exhausted: bool,
    retention_limit: usize,
    retention_warned: bool,
    stats: ResolverStats,
}

impl<R: Read, P: Payload> BackReferenceResolver<R, P> {
    pub fn new(stream: SideChannelReader<R, P>, retention_limit: usize) -> Self {
        Self {
            stream,
            cache: HashMap::new(),
            last_consumed: None,
            last_parent: None,
            exhausted: false,
            retention_limit,
            retention_warned: false,
            stats: ResolverStats::default(),
        }
    }

    /// Resolver over a raw side-channel reader.
    pub fn from_reader(reader: R, retention_limit: usize) -> Self {
        Self::new(SideChannelReader::new(reader), retention_limit)
    }

    /// Children of `parent_id` found among `child_ids`, in request order.
    ///
    /// `child_ids` must be ascending without duplicates, and parents must be
    /// resolved in ascending id order. One parent's children may be split over
    /// several calls as long as the batches ascend. Children that were deleted
    /// or never written to the side channel are omitted.
    ///
    /// Cached children whose watermark is below `parent_id` are evicted first.
    pub fn resolve_all(
        &mut self,
        parent_id: i64,
        child_ids: &[i64],
    ) -> BuildResult<Vec<CompactedEntity<P>>> {
        debug_assert!(
            child_ids.windows(2).all(|w| w[0] < w[1]),
            "child ids must be strictly ascending"
        );
        debug_assert!(
            self.last_parent.is_none_or(|last| last <= parent_id),
            "parents must be resolved in ascending order"
        );
        self.last_parent = Some(parent_id);

        self.evict(parent_id);

        let mut resolved = Vec::with_capacity(child_ids.len());
        for &id in child_ids {
            let found = if self.last_consumed.is_some_and(|last| id <= last) {
                self.from_cache(id)
            } else {
                self.advance_to(parent_id, id)?
            };
            match found {
                Some(entity) => resolved.push(entity),
                None => {
                    self.stats.missing += 1;
                    debug!(parent_id, child_id = id, "child not found");
                }
            }
        }
        Ok(resolved)
    }

    fn from_cache(&mut self, id: i64) -> Option<CompactedEntity<P>> {
        let child = self.cache.get(&id)?;
        self.stats.from_cache += 1;
        Some(child.entity.clone())
    }

    /// Read the stream up to `id`, caching everything passed on the way.
    fn advance_to(&mut self, parent_id: i64, id: i64) -> BuildResult<Option<CompactedEntity<P>>> {
        while !self.exhausted {
            let Some(SideChannelRecord { watermark, entity }) = self.stream.next_record()? else {
                self.exhausted = true;
                warn!(
                    parent_id,
                    child_id = id,
                    skipped = self.stream.skipped(),
                    "side channel exhausted, remaining children are missing"
                );
                break;
            };
            let child_id = entity.id();
            self.last_consumed = Some(child_id);

            if child_id == id {
                self.stats.from_stream += 1;
                if watermark > parent_id {
                    self.retain(watermark, entity.clone());
                }
                return Ok(Some(entity));
            }
            if watermark >= parent_id {
                self.retain(watermark, entity);
            }
            if child_id > id {
                break;
            }
        }
        Ok(None)
    }

    fn retain(&mut self, watermark: i64, entity: CompactedEntity<P>) {
        self.cache.insert(entity.id(), CachedChild { watermark, entity });
        let cached = self.cache.len();
        self.stats.peak_cached = self.stats.peak_cached.max(cached);
        if cached > self.retention_limit && !self.retention_warned {
            self.retention_warned = true;
            warn!(
                cached,
                limit = self.retention_limit,
                "side-channel cache above retention limit; watermarks may be too high"
            );
        }
    }

    /// Drop children no parent from `parent_id` on refers to.
    fn evict(&mut self, parent_id: i64) {
        let before = self.cache.len();
        self.cache.retain(|_, child| child.watermark >= parent_id);
        self.stats.evicted += (before - self.cache.len()) as u64;
    }

    /// Children currently held in the cache.
    pub fn cached(&self) -> usize {
        self.cache.len()
    }

    pub fn stats(&self) -> ResolverStats {
        self.stats
    }

    /// Whether the side channel has been read to its end.
    pub fn is_exhausted(&self) -> bool {
        self.exhausted
    }
}
