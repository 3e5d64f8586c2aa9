//! Per-type payloads and their diff encodings.
//!
//! The record prelude (header, bbox, key catalog, id) and the per-version
//! metadata are shared by all entity types. Only the type-specific part of a
//! version goes through [`Payload`], and it is written only when it differs
//! from the previously encoded version.

use std::fmt::Debug;

use crate::error::{CodecError, CodecResult};
use crate::model::{Base, Coord, IntBbox, Member, OsmType, Version};
use crate::varint::{Reader, write_uvarint, write_varint};

/// Type-specific part of a [`Version`].
pub trait Payload: Clone + PartialEq + Debug + Send + Sync + 'static {
    /// Entity type this payload belongs to.
    const TYPE: OsmType;

    /// State the first encoded version is compared against.
    fn initial(base: &Base) -> Self;

    /// Value recorded for a deleted version.
    fn hidden(&self, _base: &Base) -> Self {
        self.clone()
    }

    /// Location carried by this payload, if any.
    fn location(&self) -> Option<Coord> {
        None
    }

    /// Write `self` relative to the previously encoded payload.
    fn encode_diff(&self, prev: &Self, out: &mut Vec<u8>);

    /// Read a payload written by [`Payload::encode_diff`].
    fn decode_diff(prev: &Self, reader: &mut Reader<'_>) -> CodecResult<Self>;
}

/// Bbox over the locations of all visible versions.
pub fn visible_bbox<P: Payload>(versions: &[Version<P>]) -> Option<IntBbox> {
    IntBbox::covering(
        versions
            .iter()
            .filter(|v| v.is_visible())
            .filter_map(|v| v.payload.location()),
    )
}

/// Node location.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct NodePayload {
    pub location: Coord,
}

impl NodePayload {
    #[must_use]
    pub const fn new(lon: i64, lat: i64) -> Self {
        Self {
            location: Coord::new(lon, lat),
        }
    }
}

impl Payload for NodePayload {
    const TYPE: OsmType = OsmType::Node;

    fn initial(base: &Base) -> Self {
        Self {
            location: base.location(),
        }
    }

    fn hidden(&self, base: &Base) -> Self {
        Self::initial(base)
    }

    fn location(&self) -> Option<Coord> {
        Some(self.location)
    }

    fn encode_diff(&self, prev: &Self, out: &mut Vec<u8>) {
        write_varint(out, self.location.lon.wrapping_sub(prev.location.lon));
        write_varint(out, self.location.lat.wrapping_sub(prev.location.lat));
    }

    fn decode_diff(prev: &Self, reader: &mut Reader<'_>) -> CodecResult<Self> {
        let lon = prev.location.lon.wrapping_add(reader.read_varint()?);
        let lat = prev.location.lat.wrapping_add(reader.read_varint()?);
        Ok(Self::new(lon, lat))
    }
}

/// Ordered node references of a way.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct WayPayload {
    pub refs: Vec<i64>,
}

impl WayPayload {
    #[must_use]
    pub fn new(refs: impl Into<Vec<i64>>) -> Self {
        Self { refs: refs.into() }
    }
}

impl Payload for WayPayload {
    const TYPE: OsmType = OsmType::Way;

    fn initial(_base: &Base) -> Self {
        Self::default()
    }

    fn encode_diff(&self, _prev: &Self, out: &mut Vec<u8>) {
        write_uvarint(out, self.refs.len() as u64);
        let mut last = 0;
        for &id in &self.refs {
            write_varint(out, id.wrapping_sub(last));
            last = id;
        }
    }

    fn decode_diff(_prev: &Self, reader: &mut Reader<'_>) -> CodecResult<Self> {
        let count = reader.read_uvarint()?;
        let mut refs = Vec::with_capacity(count.min(1024) as usize);
        let mut last = 0_i64;
        for _ in 0..count {
            last = last.wrapping_add(reader.read_varint()?);
            refs.push(last);
        }
        Ok(Self { refs })
    }
}

/// Ordered members of a relation.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct RelationPayload {
    pub members: Vec<Member>,
}

impl RelationPayload {
    #[must_use]
    pub fn new(members: impl Into<Vec<Member>>) -> Self {
        Self {
            members: members.into(),
        }
    }

    /// Ids of members of the given type, in member order.
    pub fn member_ids(&self, osm_type: OsmType) -> impl Iterator<Item = i64> + '_ {
        self.members
            .iter()
            .filter(move |m| m.osm_type == osm_type)
            .map(|m| m.id)
    }
}

impl Payload for RelationPayload {
    const TYPE: OsmType = OsmType::Relation;

    fn initial(_base: &Base) -> Self {
        Self::default()
    }

    fn encode_diff(&self, _prev: &Self, out: &mut Vec<u8>) {
        write_uvarint(out, self.members.len() as u64);
        let mut last = 0;
        for member in &self.members {
            out.push(member.osm_type.as_u8());
            write_varint(out, member.id.wrapping_sub(last));
            write_uvarint(out, u64::from(member.role));
            last = member.id;
        }
    }

    fn decode_diff(_prev: &Self, reader: &mut Reader<'_>) -> CodecResult<Self> {
        let count = reader.read_uvarint()?;
        let mut members = Vec::with_capacity(count.min(1024) as usize);
        let mut last = 0_i64;
        for _ in 0..count {
            let type_byte = reader.read_u8()?;
            let osm_type =
                OsmType::from_u8(type_byte).ok_or(CodecError::UnknownMemberType(type_byte))?;
            last = last.wrapping_add(reader.read_varint()?);
            let role = reader.read_u32_varint("member role")?;
            members.push(Member::new(osm_type, last, role));
        }
        Ok(Self { members })
    }
}
