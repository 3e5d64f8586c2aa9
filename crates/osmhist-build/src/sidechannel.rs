//! Side channel of child entities feeding the back-reference resolver.
//!
//! An earlier stage writes every node (or way) that some later parent refers
//! to, ascending by id, each tagged with its watermark: the highest parent id
//! still referring to it.
//!
//! # Record Format
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │  record_len: uvarint   length of the entity record       │
//! │  watermark: uvarint    highest referring parent id       │
//! │  record: [u8]          CompactedEntity against ORIGIN    │
//! └──────────────────────────────────────────────────────────┘
//! ```

use std::io::{self, Read, Write};
use std::marker::PhantomData;

use byteorder::ReadBytesExt;
use bytes::Bytes;
use hashbrown::HashMap;
use osmhist_codec::{Base, CompactedEntity, IntBbox, Payload, Version};
use tracing::warn;

use crate::error::{BuildError, BuildResult};

/// One child as read from the side channel.
#[derive(Clone, Debug)]
pub struct SideChannelRecord<P> {
    pub watermark: i64,
    pub entity: CompactedEntity<P>,
}

/// Writes child records, enforcing ascending ids.
pub struct SideChannelWriter<W: Write> {
    inner: W,
    last_id: Option<i64>,
    written: usize,
    scratch: Vec<u8>,
}

impl<W: Write> SideChannelWriter<W> {
    pub fn new(inner: W) -> Self {
        Self {
            inner,
            last_id: None,
            written: 0,
            scratch: Vec::with_capacity(16),
        }
    }

    /// Append an already encoded child. Entities with another base are
    /// rebased onto [`Base::ORIGIN`].
    pub fn write<P: Payload>(
        &mut self,
        entity: &CompactedEntity<P>,
        watermark: i64,
    ) -> BuildResult<()> {
        let id = entity.id();
        if let Some(previous) = self.last_id {
            if id <= previous {
                return Err(BuildError::Unsorted { previous, id });
            }
        }

        let rebased;
        let entity = if *entity.base() == Base::ORIGIN {
            entity
        } else {
            rebased = entity.rebase(Base::ORIGIN)?;
            &rebased
        };

        self.scratch.clear();
        osmhist_codec::varint::write_uvarint(&mut self.scratch, entity.as_bytes().len() as u64);
        osmhist_codec::varint::write_uvarint(&mut self.scratch, watermark as u64);
        self.inner.write_all(&self.scratch)?;
        self.inner.write_all(entity.as_bytes())?;

        self.last_id = Some(id);
        self.written += 1;
        Ok(())
    }

    /// Encode and append a child history.
    ///
    /// # Panics
    ///
    /// Panics if `versions` is empty or holds a negative id.
    pub fn append<P: Payload>(
        &mut self,
        versions: &[Version<P>],
        bbox: Option<IntBbox>,
        watermark: i64,
    ) -> BuildResult<()> {
        let entity = CompactedEntity::build(versions, Base::ORIGIN, bbox);
        self.write(&entity, watermark)
    }

    /// Number of records written so far.
    pub fn written(&self) -> usize {
        self.written
    }

    /// Flush and return the underlying writer.
    pub fn finish(mut self) -> BuildResult<W> {
        self.inner.flush()?;
        Ok(self.inner)
    }
}

/// Reads child records in stream order.
///
/// Records whose entity bytes fail to decode are logged and skipped; framing
/// errors and IO errors end the stream with an error.
pub struct SideChannelReader<R, P> {
    inner: R,
    offset: u64,
    skipped: usize,
    _payload: PhantomData<fn() -> P>,
}

impl<R: Read, P: Payload> SideChannelReader<R, P> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            offset: 0,
            skipped: 0,
            _payload: PhantomData,
        }
    }

    /// Records skipped because they could not be decoded.
    pub fn skipped(&self) -> usize {
        self.skipped
    }

    /// Next decodable record, `None` at a clean end of stream.
    pub fn next_record(&mut self) -> BuildResult<Option<SideChannelRecord<P>>> {
        loop {
            let start = self.offset;
            let Some(len) = self.read_uvarint(true)? else {
                return Ok(None);
            };
            let Some(watermark) = self.read_uvarint(false)? else {
                return Err(unexpected_eof(start));
            };

            // the length prefix is untrusted; grow with the data actually read
            let mut record = Vec::new();
            (&mut self.inner).take(len).read_to_end(&mut record)?;
            if record.len() as u64 != len {
                return Err(unexpected_eof(start));
            }
            self.offset += len;

            match CompactedEntity::from_record(Bytes::from(record), Base::ORIGIN) {
                Ok(entity) => {
                    return Ok(Some(SideChannelRecord {
                        watermark: watermark as i64,
                        entity,
                    }));
                }
                Err(error) => {
                    self.skipped += 1;
                    warn!(offset = start, %error, "skipping undecodable side-channel record");
                }
            }
        }
    }

    /// Read one varint. At a record boundary (`boundary`), end of input
    /// yields `None`; elsewhere it is an error.
    fn read_uvarint(&mut self, boundary: bool) -> BuildResult<Option<u64>> {
        let start = self.offset;
        let mut result = 0_u64;
        let mut shift = 0;
        loop {
            let byte = match self.inner.read_u8() {
                Ok(byte) => byte,
                Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                    if boundary && self.offset == start {
                        return Ok(None);
                    }
                    return Err(unexpected_eof(start));
                }
                Err(e) => return Err(e.into()),
            };
            self.offset += 1;
            if shift == 63 && byte > 1 {
                return Err(varint_too_long(start));
            }
            result |= u64::from(byte & 0x7F) << shift;
            if byte & 0x80 == 0 {
                return Ok(Some(result));
            }
            shift += 7;
            if shift >= 64 {
                return Err(varint_too_long(start));
            }
        }
    }
}

impl<R: Read, P: Payload> Iterator for SideChannelReader<R, P> {
    type Item = BuildResult<SideChannelRecord<P>>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_record().transpose()
    }
}

fn varint_too_long(offset: u64) -> BuildError {
    io::Error::new(
        io::ErrorKind::InvalidData,
        format!("varint too long at byte {offset}"),
    )
    .into()
}

fn unexpected_eof(offset: u64) -> BuildError {
    io::Error::new(
        io::ErrorKind::UnexpectedEof,
        format!("side channel ends inside record at byte {offset}"),
    )
    .into()
}

/// Watermark of every child: the highest parent id referring to it.
pub fn watermarks_for<C>(parents: impl IntoIterator<Item = (i64, C)>) -> HashMap<i64, i64>
where
    C: IntoIterator<Item = i64>,
{
    let mut watermarks = HashMap::new();
    for (parent, children) in parents {
        for child in children {
            watermarks
                .entry(child)
                .and_modify(|w: &mut i64| *w = (*w).max(parent))
                .or_insert(parent);
        }
    }
    watermarks
}
