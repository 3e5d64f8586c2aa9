//! Building grid cells from ascending streams of entity histories.
//!
//! One build runs three passes, nodes, ways and relations, each over
//! version groups sorted by id:
//!
//! ```text
//! version groups ─► BackReferenceResolver ─► CellAssembler::place ─► bucket
//!                        ▲ (side channel)                               │
//!                                                         seal ─► GridCellStore
//! ```
//!
//! Ways and relations need their children to find a location. Those come from
//! a [side channel](sidechannel) written by an earlier stage and are joined in
//! a single forward pass by the [`BackReferenceResolver`]. Independent shards
//! can run in parallel with [`build_shards`], sharing only the store.

pub mod assembler;
pub mod config;
pub mod error;
pub mod pass;
pub mod placement;
pub mod resolver;
pub mod sidechannel;

pub use assembler::{AssemblyStats, CellAssembler, PendingEntity};
pub use config::{BuildConfig, GridKind};
pub use error::{BuildError, BuildResult};
pub use pass::{
    NodePass, Pass, PassSummary, RelationAssembly, RelationPass, WayAssembly, WayPass, build_shards,
};
pub use placement::{Grid, Placement};
pub use resolver::{BackReferenceResolver, CachedChild, ResolverStats};
pub use sidechannel::{SideChannelReader, SideChannelRecord, SideChannelWriter, watermarks_for};
