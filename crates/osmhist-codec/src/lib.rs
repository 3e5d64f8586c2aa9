//! Compact byte records holding the complete version history of one entity.
//!
//! Versions are stored newest first. Each one only carries what changed since
//! the previously written version, and all integers are written relative to a
//! [`Base`] shared by every record in the same [`GridCell`], so the common
//! case of many small edits to nearby entities stays a few bytes per version.
//!
//! # Example
//!
//! ```
//! use osmhist_codec::{Base, CompactedEntity, NodePayload, Tags, Version};
//!
//! let versions = vec![
//!     Version { id: 123, version: -2, timestamp: 20, changeset: 2, user_id: 1,
//!               tags: Tags::new(), payload: NodePayload::new(0, 0) },
//!     Version { id: 123, version: 1, timestamp: 10, changeset: 1, user_id: 1,
//!               tags: Tags::new(), payload: NodePayload::new(86_756_350, 494_186_210) },
//! ];
//! let entity = CompactedEntity::build(&versions, Base::ORIGIN, None);
//! let decoded = entity.versions().unwrap();
//! assert_eq!(decoded[1], versions[1]);
//! assert!(!decoded[0].is_visible());
//! ```

pub mod cell;
pub mod entity;
pub mod error;
pub mod flags;
pub mod model;
pub mod payload;
pub mod varint;

pub use cell::GridCell;
pub use entity::{CompactedEntity, VersionCursor, encode};
pub use error::{CodecError, CodecResult};
pub use flags::{Changed, EntityFlags};
pub use model::{Base, COORD_SCALE, Coord, IntBbox, Member, OsmType, Tag, Tags, Version};
pub use payload::{NodePayload, Payload, RelationPayload, WayPayload, visible_bbox};
