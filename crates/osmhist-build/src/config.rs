//! Build configuration.
//!
//! Defaults can be overridden from the environment:
//!
//! | Variable | Field | Example |
//! |---|---|---|
//! | `OSMHIST_MAX_ZOOM` | `max_zoom` | `14` |
//! | `OSMHIST_GRID` | `grid` | `fixed`, `zorder` |
//! | `OSMHIST_RETENTION_LIMIT` | `retention_limit` | `500000` |
//! | `OSMHIST_FAN_OUT_LIMIT` | `fan_out_limit` | `4.0` |

use std::fmt;
use std::str::FromStr;

use osmhist_spatial::{FixedGrid, ZGrid};
use serde::{Deserialize, Serialize};

use crate::error::{BuildError, BuildResult};
use crate::placement::Grid;

/// Which grid variant places entities.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GridKind {
    /// Uniform grid per zoom level, south-west corner placement.
    #[default]
    Fixed,
    /// Adaptive quadtree, smallest containing cell.
    #[serde(rename = "zorder")]
    ZOrder,
}

impl FromStr for GridKind {
    type Err = BuildError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "fixed" => Ok(Self::Fixed),
            "zorder" | "z-order" => Ok(Self::ZOrder),
            _ => Err(BuildError::Config {
                name: "grid",
                value: s.to_owned(),
            }),
        }
    }
}

impl fmt::Display for GridKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Fixed => "fixed",
            Self::ZOrder => "zorder",
        })
    }
}

/// Settings shared by every shard of a build.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BuildConfig {
    /// Finest zoom level entities are placed at.
    pub max_zoom: u8,
    pub grid: GridKind,
    /// Cached side-channel children above which a warning is logged.
    pub retention_limit: usize,
    /// Estimated cell count above which the fixed grid steps up a level.
    pub fan_out_limit: f64,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            max_zoom: 15,
            grid: GridKind::Fixed,
            retention_limit: 1_000_000,
            fan_out_limit: osmhist_spatial::fixed::FAN_OUT_LIMIT,
        }
    }
}

impl BuildConfig {
    /// Defaults overridden by `OSMHIST_*` environment variables.
    ///
    /// Unparseable values are logged and ignored.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Defaults overridden by whatever `lookup` returns for each variable.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();
        override_with(&lookup, "OSMHIST_MAX_ZOOM", &mut config.max_zoom);
        override_with(&lookup, "OSMHIST_GRID", &mut config.grid);
        override_with(&lookup, "OSMHIST_RETENTION_LIMIT", &mut config.retention_limit);
        override_with(&lookup, "OSMHIST_FAN_OUT_LIMIT", &mut config.fan_out_limit);
        config
    }

    /// Reject values no grid can honour.
    pub fn validate(&self) -> BuildResult<()> {
        let limit = match self.grid {
            GridKind::Fixed => osmhist_spatial::fixed::MAX_ZOOM,
            GridKind::ZOrder => osmhist_spatial::zorder::MAX_ZOOM,
        };
        if self.max_zoom > limit {
            return Err(BuildError::Config {
                name: "max_zoom",
                value: self.max_zoom.to_string(),
            });
        }
        if !(self.fan_out_limit.is_finite() && self.fan_out_limit > 0.0) {
            return Err(BuildError::Config {
                name: "fan_out_limit",
                value: self.fan_out_limit.to_string(),
            });
        }
        Ok(())
    }

    /// Placement strategy for this configuration.
    #[must_use]
    pub fn grid(&self) -> Grid {
        match self.grid {
            GridKind::Fixed => {
                Grid::Fixed(FixedGrid::new(self.max_zoom).with_fan_out_limit(self.fan_out_limit))
            }
            GridKind::ZOrder => Grid::ZOrder(ZGrid::new(self.max_zoom)),
        }
    }
}

fn override_with<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, name: &str, field: &mut T) {
    let Some(raw) = lookup(name) else {
        return;
    };
    match raw.trim().parse() {
        Ok(value) => *field = value,
        Err(_) => tracing::warn!(name, value = %raw, "ignoring unparseable setting"),
    }
}
