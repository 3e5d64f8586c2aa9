//! Full version history of one entity as a single delta-encoded record.
//!
//! # Record Format
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │ header: u8            MULTIVERSION | TIMESTAMPS_NOT_IN_ORDER |       │
//! │                       HAS_TAGS | HAS_BBOX                            │
//! │ [HAS_BBOX]  min_lon - base.lon (zigzag), max_lon - min_lon,          │
//! │             min_lat - base.lat (zigzag), max_lat - min_lat           │
//! │ [HAS_TAGS]  key count, ascending key ids as deltas                   │
//! │ id - base.id                                                         │
//! ├──────────────────────────────────────────────────────────────────────┤
//! │ per version, newest first, each relative to the previous entry:      │
//! │   version delta, timestamp delta, changeset delta (all zigzag)       │
//! │   changed: u8 (USER | TAGS | PAYLOAD)                                │
//! │   [USER] user id delta   [TAGS] tag list   [PAYLOAD] payload diff    │
//! └──────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The first entry is compared against the base timestamp, zero version,
//! changeset and user, no tags and [`Payload::initial`]. All integers are
//! varints; signed ones are zigzag mapped.
//!
//! The version section is only parsed on iteration. Reading version `k`
//! means replaying every newer entry first.

use std::marker::PhantomData;
use std::sync::Arc;

use bytes::Bytes;

use crate::error::{CodecError, CodecResult};
use crate::flags::{Changed, EntityFlags};
use crate::model::{Base, IntBbox, Tag, Tags, Version};
use crate::payload::{Payload, visible_bbox};
use crate::varint::{Reader, write_uvarint, write_varint};

/// Running state that each version entry is a diff against.
#[derive(Clone, Debug)]
struct DeltaState<P> {
    version: i32,
    timestamp: i64,
    changeset: i64,
    user_id: i64,
    tags: Tags,
    payload: P,
}

impl<P: Payload> DeltaState<P> {
    fn initial(base: &Base) -> Self {
        Self {
            version: 0,
            timestamp: base.timestamp,
            changeset: 0,
            user_id: 0,
            tags: Tags::new(),
            payload: P::initial(base),
        }
    }
}

/// Decoded record prelude.
#[derive(Clone, Debug)]
struct Prelude {
    flags: EntityFlags,
    bbox: Option<IntBbox>,
    keys: Arc<[u32]>,
    id: i64,
    /// Offset of the first version entry within the record.
    body: usize,
}

/// Encode a version history into a record relative to `base`.
///
/// `versions` must be sorted newest first. For nodes, `bbox` may be `None`
/// and is then computed from the visible versions; for ways and relations it
/// is the aggregate box of their members.
///
/// # Panics
///
/// Panics if `versions` is empty or the entity id is below `base.id`.
#[must_use]
pub fn encode<P: Payload>(versions: &[Version<P>], base: &Base, bbox: Option<IntBbox>) -> Vec<u8> {
    encode_with_prelude(versions, base, bbox).0
}

fn encode_with_prelude<P: Payload>(
    versions: &[Version<P>],
    base: &Base,
    bbox: Option<IntBbox>,
) -> (Vec<u8>, Prelude) {
    assert!(!versions.is_empty(), "cannot encode an empty version list");
    let id = versions[0].id;
    assert!(
        id >= base.id,
        "entity id {id} is below base id {}",
        base.id
    );
    debug_assert!(
        versions.windows(2).all(|w| w[0].number() > w[1].number()),
        "versions must be sorted newest first"
    );

    let bbox = bbox.or_else(|| visible_bbox(versions));

    let mut keys: Vec<u32> = versions
        .iter()
        .flat_map(|v| v.tags.iter().map(|t| t.key))
        .collect();
    keys.sort_unstable();
    keys.dedup();

    let mut flags = EntityFlags::empty();
    flags.set(EntityFlags::MULTIVERSION, versions.len() > 1);
    flags.set(
        EntityFlags::TIMESTAMPS_NOT_IN_ORDER,
        versions.windows(2).any(|w| w[0].timestamp < w[1].timestamp),
    );
    flags.set(EntityFlags::HAS_TAGS, !keys.is_empty());
    flags.set(EntityFlags::HAS_BBOX, bbox.is_some());

    let mut out = Vec::with_capacity(16 + versions.len() * 12);
    out.push(flags.bits());

    if let Some(b) = bbox {
        write_varint(&mut out, b.min_lon - base.lon);
        write_uvarint(&mut out, (b.max_lon - b.min_lon) as u64);
        write_varint(&mut out, b.min_lat - base.lat);
        write_uvarint(&mut out, (b.max_lat - b.min_lat) as u64);
    }

    if !keys.is_empty() {
        write_uvarint(&mut out, keys.len() as u64);
        let mut last = 0;
        for &key in &keys {
            write_uvarint(&mut out, u64::from(key - last));
            last = key;
        }
    }

    write_uvarint(&mut out, (id - base.id) as u64);
    let body = out.len();

    let mut prev = DeltaState::<P>::initial(base);
    for v in versions {
        let payload = if v.is_visible() {
            v.payload.clone()
        } else {
            v.payload.hidden(base)
        };

        write_varint(&mut out, i64::from(v.version) - i64::from(prev.version));
        write_varint(&mut out, v.timestamp.wrapping_sub(prev.timestamp));
        write_varint(&mut out, v.changeset.wrapping_sub(prev.changeset));

        let mut changed = Changed::empty();
        changed.set(Changed::USER, v.user_id != prev.user_id);
        changed.set(Changed::TAGS, v.tags != prev.tags);
        changed.set(Changed::PAYLOAD, payload != prev.payload);
        out.push(changed.bits());

        if changed.contains(Changed::USER) {
            write_varint(&mut out, v.user_id.wrapping_sub(prev.user_id));
        }
        if changed.contains(Changed::TAGS) {
            encode_tags(&v.tags, &keys, &mut out);
        }
        if changed.contains(Changed::PAYLOAD) {
            payload.encode_diff(&prev.payload, &mut out);
        }

        prev = DeltaState {
            version: v.version,
            timestamp: v.timestamp,
            changeset: v.changeset,
            user_id: v.user_id,
            tags: v.tags.clone(),
            payload,
        };
    }

    let prelude = Prelude {
        flags,
        bbox,
        keys: keys.into(),
        id,
        body,
    };
    (out, prelude)
}

fn encode_tags(tags: &[Tag], keys: &[u32], out: &mut Vec<u8>) {
    debug_assert!(tags.is_sorted(), "tags must be sorted by key then value");
    write_uvarint(out, tags.len() as u64);
    let mut last = 0;
    for tag in tags {
        let index = keys.partition_point(|&k| k < tag.key);
        write_uvarint(out, (index - last) as u64);
        write_uvarint(out, u64::from(tag.value));
        last = index;
    }
}

fn decode_prelude(record: &[u8], base: &Base) -> CodecResult<Prelude> {
    let mut reader = Reader::new(record);
    let header = reader.read_u8()?;
    let flags = EntityFlags::from_bits(header).ok_or(CodecError::UnknownFlags(header))?;

    let bbox = if flags.contains(EntityFlags::HAS_BBOX) {
        let min_lon = base.lon.wrapping_add(reader.read_varint()?);
        let width = read_extent(&mut reader, "bbox width")?;
        let min_lat = base.lat.wrapping_add(reader.read_varint()?);
        let height = read_extent(&mut reader, "bbox height")?;
        Some(IntBbox::new(
            min_lon,
            min_lat,
            min_lon.wrapping_add(width),
            min_lat.wrapping_add(height),
        ))
    } else {
        None
    };

    let keys: Arc<[u32]> = if flags.contains(EntityFlags::HAS_TAGS) {
        let count = reader.read_uvarint()?;
        let mut keys = Vec::with_capacity(count.min(256) as usize);
        let mut last = 0_u32;
        for _ in 0..count {
            let delta = reader.read_u32_varint("tag key")?;
            last = last.checked_add(delta).ok_or(CodecError::OutOfRange {
                field: "tag key",
                value: i64::from(last) + i64::from(delta),
            })?;
            keys.push(last);
        }
        keys.into()
    } else {
        Arc::from([])
    };

    let id = base.id.wrapping_add(read_extent(&mut reader, "id")?);

    Ok(Prelude {
        flags,
        bbox,
        keys,
        id,
        body: reader.position(),
    })
}

fn read_extent(reader: &mut Reader<'_>, field: &'static str) -> CodecResult<i64> {
    let value = reader.read_uvarint()?;
    i64::try_from(value).map_err(|_| CodecError::OutOfRange {
        field,
        value: value as i64,
    })
}

/// Byte-encoded history of one entity together with its decoded prelude.
///
/// Cloning is cheap: the record bytes and key catalog are shared.
#[derive(Clone, Debug)]
pub struct CompactedEntity<P> {
    record: Bytes,
    base: Base,
    prelude: Prelude,
    _payload: PhantomData<fn() -> P>,
}

impl<P: Payload> CompactedEntity<P> {
    /// Encode `versions` relative to `base`. See [`encode`].
    ///
    /// # Panics
    ///
    /// Panics if `versions` is empty or the entity id is below `base.id`.
    #[must_use]
    pub fn build(versions: &[Version<P>], base: Base, bbox: Option<IntBbox>) -> Self {
        let (bytes, prelude) = encode_with_prelude(versions, &base, bbox);
        Self {
            record: Bytes::from(bytes),
            base,
            prelude,
            _payload: PhantomData,
        }
    }

    /// Decode the record stored at `data[offset..offset + length]`.
    ///
    /// Only the prelude is parsed; the returned entity shares `data`.
    pub fn decode(data: &Bytes, offset: usize, length: usize, base: Base) -> CodecResult<Self> {
        let end = offset
            .checked_add(length)
            .filter(|&end| end <= data.len())
            .ok_or(CodecError::OutOfBounds {
                offset,
                length,
                len: data.len(),
            })?;
        Self::from_record(data.slice(offset..end), base)
    }

    /// Decode a record occupying all of `record`.
    pub fn from_record(record: Bytes, base: Base) -> CodecResult<Self> {
        let prelude = decode_prelude(&record, &base)?;
        Ok(Self {
            record,
            base,
            prelude,
            _payload: PhantomData,
        })
    }

    #[must_use]
    pub fn id(&self) -> i64 {
        self.prelude.id
    }

    #[must_use]
    pub fn base(&self) -> &Base {
        &self.base
    }

    /// Bbox over the visible coordinates of this entity (or its members).
    #[must_use]
    pub fn bbox(&self) -> Option<IntBbox> {
        self.prelude.bbox
    }

    /// Every tag key referenced by any version, ascending.
    #[must_use]
    pub fn key_catalog(&self) -> &[u32] {
        &self.prelude.keys
    }

    #[must_use]
    pub fn flags(&self) -> EntityFlags {
        self.prelude.flags
    }

    #[must_use]
    pub fn is_multiversion(&self) -> bool {
        self.prelude.flags.contains(EntityFlags::MULTIVERSION)
    }

    #[must_use]
    pub fn timestamps_in_order(&self) -> bool {
        !self
            .prelude
            .flags
            .contains(EntityFlags::TIMESTAMPS_NOT_IN_ORDER)
    }

    /// The encoded record.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.record
    }

    /// The encoded record as a shared buffer.
    #[must_use]
    pub fn record(&self) -> &Bytes {
        &self.record
    }

    /// Offset and length of the version section within the record.
    #[must_use]
    pub fn version_section(&self) -> (usize, usize) {
        (self.prelude.body, self.record.len() - self.prelude.body)
    }

    /// Lazily decode the versions, newest first.
    #[must_use]
    pub fn iter(&self) -> VersionCursor<P> {
        VersionCursor {
            record: self.record.clone(),
            keys: Arc::clone(&self.prelude.keys),
            id: self.prelude.id,
            pos: self.prelude.body,
            state: DeltaState::initial(&self.base),
            done: false,
        }
    }

    /// Decode every version, newest first.
    pub fn versions(&self) -> CodecResult<Vec<Version<P>>> {
        self.iter().collect()
    }

    /// The newest version.
    pub fn latest(&self) -> CodecResult<Version<P>> {
        self.iter()
            .next_version()?
            .ok_or(CodecError::Truncated {
                offset: self.prelude.body,
            })
    }

    /// State of the entity at `timestamp`: the newest version not after it.
    ///
    /// Returns `None` if the entity did not exist yet. The result may be a
    /// deleted version.
    pub fn version_at(&self, timestamp: i64) -> CodecResult<Option<Version<P>>> {
        for version in self.iter() {
            let version = version?;
            if version.timestamp <= timestamp {
                return Ok(Some(version));
            }
        }
        Ok(None)
    }

    /// Re-encode this entity relative to another base.
    ///
    /// Deleted node versions take the new base location.
    pub fn rebase(&self, base: Base) -> CodecResult<Self> {
        if base.id > self.id() {
            return Err(CodecError::OutOfRange {
                field: "base id",
                value: base.id,
            });
        }
        let versions = self.versions()?;
        Ok(Self::build(&versions, base, self.bbox()))
    }
}

/// Forward-only decoder over the version section of a record.
///
/// Each call to [`VersionCursor::next_version`] applies one entry's diffs to
/// the running state. After an error the cursor stays exhausted.
#[derive(Clone, Debug)]
pub struct VersionCursor<P> {
    record: Bytes,
    keys: Arc<[u32]>,
    id: i64,
    pos: usize,
    state: DeltaState<P>,
    done: bool,
}

impl<P: Payload> VersionCursor<P> {
    /// Decode the next version; `Ok(None)` marks the end of the history.
    pub fn next_version(&mut self) -> CodecResult<Option<Version<P>>> {
        if self.done {
            return Ok(None);
        }
        if self.pos >= self.record.len() {
            self.done = true;
            return Ok(None);
        }
        let record = self.record.clone();
        let mut reader = Reader::at(&record, self.pos);
        match self.read_entry(&mut reader) {
            Ok(()) => {
                self.pos = reader.position();
                Ok(Some(self.current()))
            }
            Err(err) => {
                self.done = true;
                Err(err)
            }
        }
    }

    fn read_entry(&mut self, reader: &mut Reader<'_>) -> CodecResult<()> {
        let version = i64::from(self.state.version) + reader.read_varint()?;
        let version = i32::try_from(version).map_err(|_| CodecError::OutOfRange {
            field: "version",
            value: version,
        })?;
        let timestamp = self.state.timestamp.wrapping_add(reader.read_varint()?);
        let changeset = self.state.changeset.wrapping_add(reader.read_varint()?);

        let bits = reader.read_u8()?;
        let changed = Changed::from_bits(bits).ok_or(CodecError::UnknownFlags(bits))?;

        if changed.contains(Changed::USER) {
            self.state.user_id = self.state.user_id.wrapping_add(reader.read_varint()?);
        }
        if changed.contains(Changed::TAGS) {
            self.state.tags = self.read_tags(reader)?;
        }
        if changed.contains(Changed::PAYLOAD) {
            self.state.payload = P::decode_diff(&self.state.payload, reader)?;
        }
        self.state.version = version;
        self.state.timestamp = timestamp;
        self.state.changeset = changeset;
        Ok(())
    }

    fn read_tags(&self, reader: &mut Reader<'_>) -> CodecResult<Tags> {
        let count = reader.read_uvarint()?;
        let mut tags = Tags::with_capacity(count.min(64) as usize);
        let mut index = 0_u64;
        for _ in 0..count {
            index = index.saturating_add(reader.read_uvarint()?);
            let key = usize::try_from(index)
                .ok()
                .and_then(|i| self.keys.get(i))
                .ok_or(CodecError::TagIndex {
                    index,
                    len: self.keys.len(),
                })?;
            let value = reader.read_u32_varint("tag value")?;
            tags.push(Tag::new(*key, value));
        }
        Ok(tags)
    }

    fn current(&self) -> Version<P> {
        Version {
            id: self.id,
            version: self.state.version,
            timestamp: self.state.timestamp,
            changeset: self.state.changeset,
            user_id: self.state.user_id,
            tags: self.state.tags.clone(),
            payload: self.state.payload.clone(),
        }
    }
}

impl<P: Payload> Iterator for VersionCursor<P> {
    type Item = CodecResult<Version<P>>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_version().transpose()
    }
}
