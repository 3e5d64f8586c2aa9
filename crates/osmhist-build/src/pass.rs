//! Single-threaded shard passes over ascending version groups.
//!
//! A pass consumes the version groups of one entity type in id order,
//! attaches children where the type has any, and files every entity into a
//! [`CellAssembler`]. Sealing happens once the whole shard has been read, so a
//! shard that fails never writes to the store.

use std::io::Read;

use osmhist_codec::{
    CompactedEntity, IntBbox, NodePayload, OsmType, Payload, RelationPayload, Version, WayPayload,
    visible_bbox,
};
use osmhist_spatial::CellCoord;
use osmhist_store::GridCellStore;
use rayon::prelude::*;
use tracing::info;

use crate::assembler::{AssemblyStats, CellAssembler, PendingEntity};
use crate::error::{BuildError, BuildResult};
use crate::placement::Placement;
use crate::resolver::{BackReferenceResolver, ResolverStats};

/// Counters of one finished pass.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PassSummary {
    pub osm_type: OsmType,
    pub entities: usize,
    pub versions: usize,
    pub assembly: AssemblyStats,
    /// Node children, for ways and relations.
    pub nodes: Option<ResolverStats>,
    /// Way children, for relations.
    pub ways: Option<ResolverStats>,
}

impl PassSummary {
    fn new(osm_type: OsmType, entities: usize, versions: usize, assembly: AssemblyStats) -> Self {
        Self {
            osm_type,
            entities,
            versions,
            assembly,
            nodes: None,
            ways: None,
        }
    }

    fn log(&self) {
        info!(
            osm_type = %self.osm_type,
            entities = self.entities,
            versions = self.versions,
            cells = self.assembly.cells,
            unlocated = self.assembly.unlocated,
            bytes = self.assembly.bytes,
            missing_nodes = self.nodes.map_or(0, |s| s.missing),
            missing_ways = self.ways.map_or(0, |s| s.missing),
            "pass finished"
        );
    }
}

/// One shard pass over the groups of a single entity type.
pub trait Pass {
    type Payload: Payload;
    /// What [`Pass::process`] reports about each entity.
    type Output;

    /// Place one version group. Groups must arrive in ascending id order.
    fn process(&mut self, versions: Vec<Version<Self::Payload>>) -> BuildResult<Self::Output>;

    /// Seal all cells into `store`.
    fn finish(self, store: &impl GridCellStore) -> BuildResult<PassSummary>
    where
        Self: Sized;

    /// Process every group produced by an upstream decoder.
    fn run<I, E>(&mut self, groups: I) -> BuildResult<()>
    where
        I: IntoIterator<Item = Result<Vec<Version<Self::Payload>>, E>>,
        E: std::error::Error + Send + Sync + 'static,
    {
        for group in groups {
            self.process(group.map_err(BuildError::upstream)?)?;
        }
        Ok(())
    }
}

/// Input order bookkeeping shared by all passes.
#[derive(Debug, Default)]
struct GroupOrder {
    last: Option<i64>,
    entities: usize,
    versions: usize,
}

impl GroupOrder {
    /// Id of a well-formed group that follows every previous one.
    fn check<P>(&mut self, versions: &[Version<P>]) -> BuildResult<i64> {
        let Some(first) = versions.first() else {
            return Err(BuildError::EmptyGroup(self.last));
        };
        let id = first.id;
        if let Some(other) = versions.iter().find(|v| v.id != id) {
            return Err(BuildError::MixedGroup {
                expected: id,
                found: other.id,
            });
        }
        if let Some(previous) = self.last {
            if id <= previous {
                return Err(BuildError::Unsorted { previous, id });
            }
        }
        self.last = Some(id);
        self.entities += 1;
        self.versions += versions.len();
        Ok(id)
    }
}

fn pending<P: Payload>(
    id: i64,
    versions: Vec<Version<P>>,
    bbox: Option<IntBbox>,
) -> BuildResult<PendingEntity<P>> {
    PendingEntity::new(versions, bbox).ok_or(BuildError::EmptyGroup(Some(id)))
}

/// Sorted, deduplicated ids gathered from every version.
fn child_ids<P>(versions: &[Version<P>], ids: impl Fn(&P) -> Vec<i64>) -> Vec<i64> {
    let mut all: Vec<i64> = versions.iter().flat_map(|v| ids(&v.payload)).collect();
    all.sort_unstable();
    all.dedup();
    all
}

fn children_bbox<P: Payload>(children: &[CompactedEntity<P>]) -> Option<IntBbox> {
    IntBbox::union_all(children.iter().map(CompactedEntity::bbox))
}

/// Nodes: placed by their own visible locations.
pub struct NodePass<G> {
    assembler: CellAssembler<G, NodePayload>,
    order: GroupOrder,
}

impl<G: Placement> NodePass<G> {
    pub fn new(grid: G) -> Self {
        Self {
            assembler: CellAssembler::new(grid),
            order: GroupOrder::default(),
        }
    }
}

impl<G: Placement> Pass for NodePass<G> {
    type Payload = NodePayload;
    type Output = CellCoord;

    fn process(&mut self, versions: Vec<Version<NodePayload>>) -> BuildResult<CellCoord> {
        let id = self.order.check(&versions)?;
        let bbox = visible_bbox(&versions);
        Ok(self.assembler.add(pending(id, versions, bbox)?))
    }

    fn finish(self, store: &impl GridCellStore) -> BuildResult<PassSummary> {
        let assembly = self.assembler.seal_into(store)?;
        let summary = PassSummary::new(
            OsmType::Node,
            self.order.entities,
            self.order.versions,
            assembly,
        );
        summary.log();
        Ok(summary)
    }
}

/// A placed way and the nodes it was placed by.
#[derive(Clone, Debug)]
pub struct WayAssembly {
    pub coord: CellCoord,
    pub bbox: Option<IntBbox>,
    pub nodes: Vec<CompactedEntity<NodePayload>>,
}

/// Ways: placed by the union of their resolved nodes.
pub struct WayPass<G, R> {
    assembler: CellAssembler<G, WayPayload>,
    nodes: BackReferenceResolver<R, NodePayload>,
    order: GroupOrder,
}

impl<G: Placement, R: Read> WayPass<G, R> {
    pub fn new(grid: G, nodes: BackReferenceResolver<R, NodePayload>) -> Self {
        Self {
            assembler: CellAssembler::new(grid),
            nodes,
            order: GroupOrder::default(),
        }
    }
}

impl<G: Placement, R: Read> Pass for WayPass<G, R> {
    type Payload = WayPayload;
    type Output = WayAssembly;

    fn process(&mut self, versions: Vec<Version<WayPayload>>) -> BuildResult<WayAssembly> {
        let id = self.order.check(&versions)?;
        let refs = child_ids(&versions, |way| way.refs.clone());
        let nodes = self.nodes.resolve_all(id, &refs)?;
        let bbox = children_bbox(&nodes);
        let coord = self.assembler.add(pending(id, versions, bbox)?);
        Ok(WayAssembly { coord, bbox, nodes })
    }

    fn finish(self, store: &impl GridCellStore) -> BuildResult<PassSummary> {
        let assembly = self.assembler.seal_into(store)?;
        let mut summary = PassSummary::new(
            OsmType::Way,
            self.order.entities,
            self.order.versions,
            assembly,
        );
        summary.nodes = Some(self.nodes.stats());
        summary.log();
        Ok(summary)
    }
}

/// A placed relation and the members it was placed by.
///
/// Relation members are not resolved; they only keep their id reference.
#[derive(Clone, Debug)]
pub struct RelationAssembly {
    pub coord: CellCoord,
    pub bbox: Option<IntBbox>,
    pub nodes: Vec<CompactedEntity<NodePayload>>,
    pub ways: Vec<CompactedEntity<WayPayload>>,
}

/// Relations: placed by the union of their node and way members.
pub struct RelationPass<G, RN, RW> {
    assembler: CellAssembler<G, RelationPayload>,
    nodes: BackReferenceResolver<RN, NodePayload>,
    ways: BackReferenceResolver<RW, WayPayload>,
    order: GroupOrder,
}

impl<G: Placement, RN: Read, RW: Read> RelationPass<G, RN, RW> {
    pub fn new(
        grid: G,
        nodes: BackReferenceResolver<RN, NodePayload>,
        ways: BackReferenceResolver<RW, WayPayload>,
    ) -> Self {
        Self {
            assembler: CellAssembler::new(grid),
            nodes,
            ways,
            order: GroupOrder::default(),
        }
    }
}

impl<G: Placement, RN: Read, RW: Read> Pass for RelationPass<G, RN, RW> {
    type Payload = RelationPayload;
    type Output = RelationAssembly;

    fn process(
        &mut self,
        versions: Vec<Version<RelationPayload>>,
    ) -> BuildResult<RelationAssembly> {
        let id = self.order.check(&versions)?;
        let node_ids = child_ids(&versions, |r| r.member_ids(OsmType::Node).collect());
        let way_ids = child_ids(&versions, |r| r.member_ids(OsmType::Way).collect());

        let nodes = self.nodes.resolve_all(id, &node_ids)?;
        let ways = self.ways.resolve_all(id, &way_ids)?;
        let bbox = IntBbox::union_all([children_bbox(&nodes), children_bbox(&ways)]);

        let coord = self.assembler.add(pending(id, versions, bbox)?);
        Ok(RelationAssembly {
            coord,
            bbox,
            nodes,
            ways,
        })
    }

    fn finish(self, store: &impl GridCellStore) -> BuildResult<PassSummary> {
        let assembly = self.assembler.seal_into(store)?;
        let mut summary = PassSummary::new(
            OsmType::Relation,
            self.order.entities,
            self.order.versions,
            assembly,
        );
        summary.nodes = Some(self.nodes.stats());
        summary.ways = Some(self.ways.stats());
        summary.log();
        Ok(summary)
    }
}

/// Run independent shards in parallel against one store.
///
/// Each shard owns its pass and resolver state; only the store is shared.
/// The first failing shard's error is returned.
pub fn build_shards<S, F>(store: &S, shards: Vec<F>) -> BuildResult<Vec<PassSummary>>
where
    S: GridCellStore,
    F: FnOnce(&S) -> BuildResult<PassSummary> + Send,
{
    shards.into_par_iter().map(|shard| shard(store)).collect()
}
