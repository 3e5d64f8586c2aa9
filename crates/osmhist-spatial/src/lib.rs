//! Hierarchical lon/lat grids for placing entity histories into storage cells.
//!
//! Two interchangeable strategies are provided:
//!
//! - [`FixedGrid`]: one uniform grid per zoom level. An entity is stored once,
//!   at the coarsest level where its bounding box touches only a few cells,
//!   in the cell holding its south-west corner.
//! - [`ZGrid`]: an adaptive quadtree addressed by Morton paths. An entity is
//!   stored in the smallest cell that fully contains it.
//!
//! All functions are pure and never fail: coordinates outside the domain
//! resolve to [`CellId::INVALID`] and the caller decides what to do with it.

pub mod bbox;
pub mod cell;
pub mod fixed;
pub mod zorder;

pub use bbox::BoundingBox;
pub use cell::{CellCoord, CellId};
pub use fixed::{CellRange, FixedGrid};
pub use zorder::{DfsRange, MergeDfs, ZGrid};
