//! Entity versions as delivered by the upstream decoder.

use std::fmt;

use smallvec::SmallVec;

/// Fixed-point units per degree (coordinates are stored as 1e-7 degrees).
pub const COORD_SCALE: i64 = 10_000_000;

/// Entity kind.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum OsmType {
    Node = 0,
    Way = 1,
    Relation = 2,
}

impl OsmType {
    pub const ALL: [OsmType; 3] = [OsmType::Node, OsmType::Way, OsmType::Relation];

    #[must_use]
    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Node),
            1 => Some(Self::Way),
            2 => Some(Self::Relation),
            _ => None,
        }
    }

    #[must_use]
    pub const fn as_u8(self) -> u8 {
        self as u8
    }
}

impl fmt::Display for OsmType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Node => "node",
            Self::Way => "way",
            Self::Relation => "relation",
        })
    }
}

/// Tag as a pair of ids into the external string tables.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Tag {
    pub key: u32,
    pub value: u32,
}

impl Tag {
    #[must_use]
    pub const fn new(key: u32, value: u32) -> Self {
        Self { key, value }
    }
}

/// Tag list of one version, sorted by key then value.
pub type Tags = SmallVec<[Tag; 4]>;

/// A fixed-point location.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct Coord {
    pub lon: i64,
    pub lat: i64,
}

impl Coord {
    #[must_use]
    pub const fn new(lon: i64, lat: i64) -> Self {
        Self { lon, lat }
    }

    /// Longitude and latitude in degrees.
    #[must_use]
    pub fn to_degrees(self) -> (f64, f64) {
        (
            self.lon as f64 / COORD_SCALE as f64,
            self.lat as f64 / COORD_SCALE as f64,
        )
    }

    /// Nearest fixed-point location for a position in degrees.
    #[must_use]
    pub fn from_degrees(lon: f64, lat: f64) -> Self {
        Self {
            lon: (lon * COORD_SCALE as f64).round() as i64,
            lat: (lat * COORD_SCALE as f64).round() as i64,
        }
    }
}

/// Fixed-point bounding box with inclusive edges.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct IntBbox {
    pub min_lon: i64,
    pub min_lat: i64,
    pub max_lon: i64,
    pub max_lat: i64,
}

impl IntBbox {
    #[must_use]
    pub const fn new(min_lon: i64, min_lat: i64, max_lon: i64, max_lat: i64) -> Self {
        Self {
            min_lon,
            min_lat,
            max_lon,
            max_lat,
        }
    }

    #[must_use]
    pub const fn from_coord(coord: Coord) -> Self {
        Self::new(coord.lon, coord.lat, coord.lon, coord.lat)
    }

    #[must_use]
    pub fn union(self, other: Self) -> Self {
        Self::new(
            self.min_lon.min(other.min_lon),
            self.min_lat.min(other.min_lat),
            self.max_lon.max(other.max_lon),
            self.max_lat.max(other.max_lat),
        )
    }

    #[must_use]
    pub fn expand(self, coord: Coord) -> Self {
        self.union(Self::from_coord(coord))
    }

    /// Box covering every coordinate, `None` for an empty input.
    pub fn covering(coords: impl IntoIterator<Item = Coord>) -> Option<Self> {
        coords
            .into_iter()
            .map(Self::from_coord)
            .reduce(Self::union)
    }

    /// Union of optional boxes, `None` if all are `None`.
    pub fn union_all(boxes: impl IntoIterator<Item = Option<Self>>) -> Option<Self> {
        boxes.into_iter().flatten().reduce(Self::union)
    }

    /// South-west corner.
    #[must_use]
    pub const fn min(&self) -> Coord {
        Coord::new(self.min_lon, self.min_lat)
    }
}

/// Reference values subtracted from every record stored against it.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct Base {
    pub id: i64,
    pub timestamp: i64,
    pub lon: i64,
    pub lat: i64,
}

impl Base {
    /// All-zero base, used for records outside any cell.
    pub const ORIGIN: Self = Self {
        id: 0,
        timestamp: 0,
        lon: 0,
        lat: 0,
    };

    #[must_use]
    pub const fn new(id: i64, timestamp: i64, lon: i64, lat: i64) -> Self {
        Self {
            id,
            timestamp,
            lon,
            lat,
        }
    }

    #[must_use]
    pub const fn location(&self) -> Coord {
        Coord::new(self.lon, self.lat)
    }
}

/// One member of a relation.
///
/// Members are plain references; a relation may name itself or form a cycle
/// with other relations without any ownership implications.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Member {
    pub osm_type: OsmType,
    pub id: i64,
    pub role: u32,
}

impl Member {
    #[must_use]
    pub const fn new(osm_type: OsmType, id: i64, role: u32) -> Self {
        Self { osm_type, id, role }
    }
}

/// One immutable historical state of an entity.
///
/// The sign of `version` encodes visibility: negative means the entity was
/// deleted in this version.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Version<P> {
    pub id: i64,
    pub version: i32,
    pub timestamp: i64,
    pub changeset: i64,
    pub user_id: i64,
    pub tags: Tags,
    pub payload: P,
}

impl<P> Version<P> {
    #[must_use]
    pub const fn is_visible(&self) -> bool {
        self.version > 0
    }

    /// Version number without the visibility sign.
    #[must_use]
    pub const fn number(&self) -> u32 {
        self.version.unsigned_abs()
    }
}
