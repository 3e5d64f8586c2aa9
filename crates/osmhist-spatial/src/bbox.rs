//! Lon/lat bounding boxes in degrees.

use serde::{Deserialize, Serialize};

/// Tolerance used when snapping coordinates on the domain edges.
pub const EPSILON: f64 = 1e-11;

/// Longitude range of the world.
pub const MAX_LON: f64 = 180.0;

/// Latitude range of the world.
pub const MAX_LAT: f64 = 90.0;

/// Axis-aligned bounding box in degrees. Edges are inclusive.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub min_lon: f64,
    pub min_lat: f64,
    pub max_lon: f64,
    pub max_lat: f64,
}

impl BoundingBox {
    /// The whole world.
    pub const WORLD: Self = Self {
        min_lon: -MAX_LON,
        min_lat: -MAX_LAT,
        max_lon: MAX_LON,
        max_lat: MAX_LAT,
    };

    #[must_use]
    pub const fn new(min_lon: f64, min_lat: f64, max_lon: f64, max_lat: f64) -> Self {
        Self {
            min_lon,
            min_lat,
            max_lon,
            max_lat,
        }
    }

    /// Degenerate box covering a single point.
    #[must_use]
    pub const fn point(lon: f64, lat: f64) -> Self {
        Self::new(lon, lat, lon, lat)
    }

    /// Whether the box is ordered and lies within the lon/lat domain.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.min_lon <= self.max_lon
            && self.min_lat <= self.max_lat
            && in_lon_domain(self.min_lon)
            && in_lon_domain(self.max_lon)
            && in_lat_domain(self.min_lat)
            && in_lat_domain(self.max_lat)
    }

    #[must_use]
    pub fn width(&self) -> f64 {
        self.max_lon - self.min_lon
    }

    #[must_use]
    pub fn height(&self) -> f64 {
        self.max_lat - self.min_lat
    }

    #[must_use]
    pub fn contains_point(&self, lon: f64, lat: f64) -> bool {
        lon >= self.min_lon && lon <= self.max_lon && lat >= self.min_lat && lat <= self.max_lat
    }

    /// Whether `other` lies completely inside `self`.
    #[must_use]
    pub fn contains(&self, other: &Self) -> bool {
        other.min_lon >= self.min_lon
            && other.max_lon <= self.max_lon
            && other.min_lat >= self.min_lat
            && other.max_lat <= self.max_lat
    }

    #[must_use]
    pub fn intersects(&self, other: &Self) -> bool {
        self.min_lon <= other.max_lon
            && other.min_lon <= self.max_lon
            && self.min_lat <= other.max_lat
            && other.min_lat <= self.max_lat
    }

    /// Smallest box covering both.
    #[must_use]
    pub fn union(&self, other: &Self) -> Self {
        Self::new(
            self.min_lon.min(other.min_lon),
            self.min_lat.min(other.min_lat),
            self.max_lon.max(other.max_lon),
            self.max_lat.max(other.max_lat),
        )
    }
}

pub(crate) fn in_lon_domain(lon: f64) -> bool {
    (-MAX_LON..=MAX_LON).contains(&lon)
}

pub(crate) fn in_lat_domain(lat: f64) -> bool {
    (-MAX_LAT..=MAX_LAT).contains(&lat)
}

/// Shift a coordinate into `[0, extent)`, snapping the upper edge inward.
///
/// The caller has already checked the domain, so `value` lies within
/// `[-extent/2, extent/2]`.
pub(crate) fn normalize(value: f64, half_extent: f64) -> f64 {
    let extent = 2.0 * half_extent;
    let shifted = value + half_extent;
    if shifted >= extent - EPSILON {
        extent - EPSILON
    } else if shifted < 0.0 {
        0.0
    } else {
        shifted
    }
}
