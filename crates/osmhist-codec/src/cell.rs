//! Sealed grid cell: many entity records sharing one base, plus an offset index.
//!
//! ```text
//! zoom | cell_id | base.id | base.timestamp | base.lon | base.lat | count
//! count x u32 LE offsets (relative to the first record)
//! records, sorted by id
//! ```

use std::cmp::Ordering;
use std::marker::PhantomData;

use byteorder::{ByteOrder, LittleEndian};
use bytes::{BufMut, Bytes, BytesMut};

use crate::entity::CompactedEntity;
use crate::error::{CodecError, CodecResult};
use crate::model::Base;
use crate::payload::Payload;
use crate::varint::{Reader, write_uvarint, write_varint};

/// Bytes per offset index entry.
const OFFSET_SIZE: usize = 4;

/// Entity records of one `(zoom, cell_id)` bucket.
///
/// Immutable once sealed. Entities are decoded on access and share the
/// cell buffer.
#[derive(Clone, Debug)]
pub struct GridCell<P> {
    data: Bytes,
    zoom: u8,
    cell_id: i64,
    base: Base,
    index_start: usize,
    records_start: usize,
    count: usize,
    _payload: PhantomData<fn() -> P>,
}

impl<P: Payload> GridCell<P> {
    /// Seal `entities` into a cell with the given base.
    ///
    /// Entities encoded against another base are rebased first. They are
    /// stored sorted by id; ids are expected to be unique.
    pub fn seal(
        zoom: u8,
        cell_id: i64,
        base: Base,
        mut entities: Vec<CompactedEntity<P>>,
    ) -> CodecResult<Self> {
        entities.sort_by_key(CompactedEntity::id);

        let mut header = Vec::with_capacity(32);
        write_uvarint(&mut header, u64::from(zoom));
        write_varint(&mut header, cell_id);
        write_uvarint(&mut header, base.id as u64);
        write_varint(&mut header, base.timestamp);
        write_varint(&mut header, base.lon);
        write_varint(&mut header, base.lat);
        write_uvarint(&mut header, entities.len() as u64);

        let mut records = BytesMut::new();
        let mut index = BytesMut::with_capacity(entities.len() * OFFSET_SIZE);
        for entity in &entities {
            let offset = u32::try_from(records.len()).map_err(|_| CodecError::OutOfRange {
                field: "cell size",
                value: records.len() as i64,
            })?;
            index.put_u32_le(offset);
            if *entity.base() == base {
                records.put_slice(entity.as_bytes());
            } else {
                records.put_slice(entity.rebase(base)?.as_bytes());
            }
        }

        let index_start = header.len();
        let records_start = index_start + index.len();
        let mut data = BytesMut::with_capacity(records_start + records.len());
        data.put_slice(&header);
        data.put(index);
        data.put(records);

        Ok(Self {
            data: data.freeze(),
            zoom,
            cell_id,
            base,
            index_start,
            records_start,
            count: entities.len(),
            _payload: PhantomData,
        })
    }

    /// Parse a cell blob, validating its offset index.
    pub fn from_bytes(data: Bytes) -> CodecResult<Self> {
        let mut reader = Reader::new(&data);
        let zoom =
            u8::try_from(reader.read_uvarint()?).map_err(|_| CodecError::CorruptIndex("zoom"))?;
        let cell_id = reader.read_varint()?;
        let base = Base {
            id: reader.read_uvarint()? as i64,
            timestamp: reader.read_varint()?,
            lon: reader.read_varint()?,
            lat: reader.read_varint()?,
        };
        let count = usize::try_from(reader.read_uvarint()?)
            .map_err(|_| CodecError::CorruptIndex("entity count"))?;
        let index_start = reader.position();
        let index_len = count
            .checked_mul(OFFSET_SIZE)
            .ok_or(CodecError::CorruptIndex("entity count"))?;
        let index = reader.read_slice(index_len)?;
        let records_start = reader.position();
        let records_len = data.len() - records_start;

        let mut last = None;
        for chunk in index.chunks_exact(OFFSET_SIZE) {
            let offset = LittleEndian::read_u32(chunk) as usize;
            let valid = match last {
                None => offset == 0,
                Some(prev) => offset > prev,
            };
            if !valid {
                return Err(CodecError::CorruptIndex("offsets not strictly increasing"));
            }
            if offset >= records_len {
                return Err(CodecError::CorruptIndex("offset past end of cell"));
            }
            last = Some(offset);
        }

        Ok(Self {
            data,
            zoom,
            cell_id,
            base,
            index_start,
            records_start,
            count,
            _payload: PhantomData,
        })
    }

    #[must_use]
    pub fn zoom(&self) -> u8 {
        self.zoom
    }

    #[must_use]
    pub fn cell_id(&self) -> i64 {
        self.cell_id
    }

    #[must_use]
    pub fn base(&self) -> &Base {
        &self.base
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.count
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// The sealed blob.
    #[must_use]
    pub fn as_bytes(&self) -> &Bytes {
        &self.data
    }

    #[must_use]
    pub fn into_bytes(self) -> Bytes {
        self.data
    }

    fn offset(&self, i: usize) -> usize {
        let at = self.index_start + i * OFFSET_SIZE;
        LittleEndian::read_u32(&self.data[at..at + OFFSET_SIZE]) as usize
    }

    /// Byte range of entity `i` within the blob.
    fn range(&self, i: usize) -> (usize, usize) {
        let start = self.records_start + self.offset(i);
        let end = if i + 1 < self.count {
            self.records_start + self.offset(i + 1)
        } else {
            self.data.len()
        };
        (start, end - start)
    }

    /// Entity at position `i` in id order.
    pub fn entity(&self, i: usize) -> CodecResult<CompactedEntity<P>> {
        if i >= self.count {
            return Err(CodecError::OutOfBounds {
                offset: i,
                length: 1,
                len: self.count,
            });
        }
        let (offset, length) = self.range(i);
        CompactedEntity::decode(&self.data, offset, length, self.base)
    }

    /// Entities in id order. A record that fails to decode yields an error
    /// without ending the iteration.
    pub fn iter(&self) -> impl Iterator<Item = CodecResult<CompactedEntity<P>>> + '_ {
        (0..self.count).map(move |i| self.entity(i))
    }

    /// Binary search for the entity with `id`.
    pub fn find(&self, id: i64) -> CodecResult<Option<CompactedEntity<P>>> {
        let (mut lo, mut hi) = (0, self.count);
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            let entity = self.entity(mid)?;
            match entity.id().cmp(&id) {
                Ordering::Less => lo = mid + 1,
                Ordering::Greater => hi = mid,
                Ordering::Equal => return Ok(Some(entity)),
            }
        }
        Ok(None)
    }

    /// Combine two cells with the same coordinate.
    ///
    /// The result is based at the smaller id and timestamp of both and this
    /// cell's location. When both hold an id, the history with more versions
    /// wins; on a tie `other` wins.
    pub fn merge(&self, other: &Self) -> CodecResult<Self> {
        if self.zoom != other.zoom || self.cell_id != other.cell_id {
            return Err(CodecError::CellMismatch {
                left_zoom: self.zoom,
                left_id: self.cell_id,
                right_zoom: other.zoom,
                right_id: other.cell_id,
            });
        }
        let base = Base::new(
            self.base.id.min(other.base.id),
            self.base.timestamp.min(other.base.timestamp),
            self.base.lon,
            self.base.lat,
        );

        let left: Vec<_> = self.iter().collect::<CodecResult<_>>()?;
        let right: Vec<_> = other.iter().collect::<CodecResult<_>>()?;

        let mut merged = Vec::with_capacity(left.len() + right.len());
        let mut left = left.into_iter().peekable();
        let mut right = right.into_iter().peekable();
        loop {
            let order = match (left.peek(), right.peek()) {
                (Some(l), Some(r)) => l.id().cmp(&r.id()),
                (Some(_), None) => Ordering::Less,
                (None, Some(_)) => Ordering::Greater,
                (None, None) => break,
            };
            let next = match order {
                Ordering::Less => left.next(),
                Ordering::Greater => right.next(),
                Ordering::Equal => match (left.next(), right.next()) {
                    (Some(l), Some(r)) if l.iter().count() > r.iter().count() => Some(l),
                    (_, r) => r,
                },
            };
            merged.extend(next);
        }

        Self::seal(self.zoom, self.cell_id, base, merged)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Tags, Version};
    use crate::payload::NodePayload;

    fn history(id: i64, count: i32, lon: i64) -> Vec<Version<NodePayload>> {
        (1..=count)
            .rev()
            .map(|v| Version {
                id,
                version: v,
                timestamp: 1_000 + i64::from(v) * 10,
                changeset: i64::from(v),
                user_id: 1,
                tags: Tags::new(),
                payload: NodePayload::new(lon + i64::from(v), 20),
            })
            .collect()
    }

    fn cell(base: Base, entities: &[(i64, i32)]) -> GridCell<NodePayload> {
        let entities = entities
            .iter()
            .map(|&(id, n)| CompactedEntity::build(&history(id, n, 100), base, None))
            .collect();
        GridCell::seal(3, 17, base, entities).unwrap()
    }

    #[test]
    fn test_seal_and_read_back() {
        let base = Base::new(10, 1_000, 100, 20);
        let sealed = cell(base, &[(30, 2), (10, 1), (20, 3)]);
        assert_eq!(sealed.len(), 3);

        let parsed = GridCell::<NodePayload>::from_bytes(sealed.as_bytes().clone()).unwrap();
        assert_eq!(parsed.zoom(), 3);
        assert_eq!(parsed.cell_id(), 17);
        assert_eq!(*parsed.base(), base);

        let ids: Vec<i64> = parsed.iter().map(|e| e.unwrap().id()).collect();
        assert_eq!(ids, [10, 20, 30]);
        assert_eq!(parsed.entity(1).unwrap().versions().unwrap(), history(20, 3, 100));
        assert!(parsed.entity(3).is_err());
    }

    #[test]
    fn test_find() {
        let sealed = cell(Base::ORIGIN, &[(5, 1), (9, 1), (14, 2), (200, 1), (201, 1)]);
        for id in [5, 9, 14, 200, 201] {
            assert_eq!(sealed.find(id).unwrap().map(|e| e.id()), Some(id));
        }
        for id in [0, 6, 15, 202] {
            assert!(sealed.find(id).unwrap().is_none());
        }
    }

    #[test]
    fn test_rebases_foreign_entities() {
        let entity = CompactedEntity::build(&history(50, 2, 100), Base::ORIGIN, None);
        let base = Base::new(40, 900, 90, 10);
        let sealed = GridCell::seal(1, 2, base, vec![entity.clone()]).unwrap();
        let stored = sealed.entity(0).unwrap();
        assert_eq!(*stored.base(), base);
        assert_eq!(stored.versions().unwrap(), entity.versions().unwrap());
    }

    #[test]
    fn test_merge() {
        let left = cell(Base::new(10, 1_000, 100, 20), &[(10, 1), (30, 3)]);
        let right = cell(Base::new(5, 900, 0, 0), &[(5, 2), (30, 1), (40, 1)]);

        let merged = left.merge(&right).unwrap();
        assert_eq!(*merged.base(), Base::new(5, 900, 100, 20));
        let entities: Vec<_> = merged.iter().map(Result::unwrap).collect();
        let ids: Vec<i64> = entities.iter().map(CompactedEntity::id).collect();
        assert_eq!(ids, [5, 10, 30, 40]);
        // id 30: three versions on the left beat one on the right
        assert_eq!(entities[2].versions().unwrap().len(), 3);

        let other = GridCell::seal(4, 17, Base::ORIGIN, Vec::new()).unwrap();
        assert!(matches!(
            left.merge(&other),
            Err(CodecError::CellMismatch { .. })
        ));
    }

    #[test]
    fn test_empty_cell() {
        let sealed = GridCell::<NodePayload>::seal(0, -1, Base::ORIGIN, Vec::new()).unwrap();
        let parsed = GridCell::<NodePayload>::from_bytes(sealed.into_bytes()).unwrap();
        assert!(parsed.is_empty());
        assert_eq!(parsed.cell_id(), -1);
        assert!(parsed.find(1).unwrap().is_none());
    }

    #[test]
    fn test_corrupt_index() {
        let sealed = cell(Base::ORIGIN, &[(1, 1), (2, 1)]);
        let mut bytes = sealed.as_bytes().to_vec();
        // header is 7 single-byte varints; second offset follows the first
        let second = 7 + OFFSET_SIZE;
        bytes[second..second + OFFSET_SIZE].copy_from_slice(&0u32.to_le_bytes());
        assert_eq!(
            GridCell::<NodePayload>::from_bytes(Bytes::from(bytes)).unwrap_err(),
            CodecError::CorruptIndex("offsets not strictly increasing")
        );

        let truncated = sealed.as_bytes().slice(..9);
        assert!(GridCell::<NodePayload>::from_bytes(truncated).is_err());
    }
}
