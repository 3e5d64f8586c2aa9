//! Nodes, ways and relations built into an LMDB store, then read back.

use std::convert::Infallible;

use osmhist_build::{
    BackReferenceResolver, BuildConfig, NodePass, Pass, Placement, RelationPass,
    SideChannelWriter, WayPass, placement::to_degrees, watermarks_for,
};
use osmhist_codec::{
    Coord, IntBbox, Member, NodePayload, OsmType, Payload, RelationPayload, Tag, Tags, Version,
    WayPayload, visible_bbox,
};
use osmhist_spatial::CellCoord;
use osmhist_store::{GridCellStore, LmdbCellStore};
use smallvec::smallvec;
use tracing_subscriber::EnvFilter;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn version<P>(id: i64, version: i32, timestamp: i64, tags: Tags, payload: P) -> Version<P> {
    Version {
        id,
        version,
        timestamp,
        changeset: 1_000 + timestamp,
        user_id: 7,
        tags,
        payload,
    }
}

fn node(id: i64, version_number: i32, timestamp: i64, lon: f64, lat: f64) -> Version<NodePayload> {
    let Coord { lon, lat } = Coord::from_degrees(lon, lat);
    version(id, version_number, timestamp, Tags::new(), NodePayload::new(lon, lat))
}

fn nodes() -> Vec<Vec<Version<NodePayload>>> {
    vec![
        vec![node(1, 1, 100, 8.6700, 49.4100)],
        vec![node(2, 1, 100, 8.6710, 49.4105)],
        vec![node(3, 2, 300, 8.6725, 49.4112), node(3, 1, 100, 8.6720, 49.4110)],
        vec![node(4, 1, 150, 8.6800, 49.4150)],
        vec![node(5, 1, 150, 8.6810, 49.4160)],
        vec![
            version(6, -2, 400, Tags::new(), NodePayload::default()),
            node(6, 1, 200, 8.6900, 49.4200),
        ],
    ]
}

fn ways() -> Vec<Vec<Version<WayPayload>>> {
    let highway: Tags = smallvec![Tag::new(1, 2)];
    vec![
        vec![
            version(100, 2, 350, highway.clone(), WayPayload::new([1, 2, 3])),
            version(100, 1, 120, highway.clone(), WayPayload::new([1, 2])),
        ],
        vec![version(101, 1, 160, highway, WayPayload::new([3, 4, 5]))],
        // refers only to nodes that were never written
        vec![version(102, 1, 170, Tags::new(), WayPayload::new([7, 8]))],
    ]
}

fn relations() -> Vec<Vec<Version<RelationPayload>>> {
    vec![vec![version(
        200,
        1,
        500,
        smallvec![Tag::new(3, 4)],
        RelationPayload::new([
            Member::new(OsmType::Node, 6, 0),
            Member::new(OsmType::Way, 100, 1),
            Member::new(OsmType::Way, 101, 1),
        ]),
    )]]
}

/// Side channel holding every group some parent refers to.
fn side_channel<P: Payload>(
    groups: &[(Vec<Version<P>>, Option<IntBbox>)],
    watermark: impl Fn(i64) -> Option<i64>,
) -> Vec<u8> {
    let mut writer = SideChannelWriter::new(Vec::new());
    for (versions, bbox) in groups {
        if let Some(watermark) = watermark(versions[0].id) {
            writer.append(versions, *bbox, watermark).unwrap();
        }
    }
    writer.finish().unwrap()
}

fn build(grid: &str) {
    init_tracing();
    let config = BuildConfig::from_lookup(|name| match name {
        "OSMHIST_GRID" => Some(grid.to_owned()),
        "OSMHIST_MAX_ZOOM" => Some("14".to_owned()),
        _ => None,
    });
    config.validate().unwrap();
    let dir = tempfile::tempdir().unwrap();

    let node_groups: Vec<_> = nodes()
        .into_iter()
        .map(|versions| {
            let bbox = visible_bbox(&versions);
            (versions, bbox)
        })
        .collect();

    let node_cells;
    {
        let store = LmdbCellStore::open_with_map_size(dir.path(), 1 << 30).unwrap();

        // nodes
        let mut pass = NodePass::new(config.grid());
        pass.run(nodes().into_iter().map(Ok::<_, Infallible>)).unwrap();
        let summary = pass.finish(&store).unwrap();
        assert_eq!(summary.entities, 6);
        assert_eq!(summary.versions, 8);
        assert_eq!(summary.assembly.unlocated, 0);

        // ways, joined against the nodes they refer to
        let way_refs = watermarks_for(
            ways()
                .into_iter()
                .map(|g| (g[0].id, g.into_iter().flat_map(|v| v.payload.refs))),
        );
        let channel = side_channel(&node_groups, |id| way_refs.get(&id).copied());
        let mut pass = WayPass::new(
            config.grid(),
            BackReferenceResolver::from_reader(channel.as_slice(), config.retention_limit),
        );
        let mut way_groups = Vec::new();
        for versions in ways() {
            let assembly = pass.process(versions.clone()).unwrap();
            way_groups.push((versions, assembly.bbox));
        }
        let summary = pass.finish(&store).unwrap();
        assert_eq!(summary.assembly.unlocated, 1);
        assert_eq!(summary.nodes.unwrap().missing, 2);

        // relations, joined against member nodes and ways
        let member_refs = |osm_type: OsmType| {
            watermarks_for(relations().into_iter().map(move |g| {
                let id = g[0].id;
                let ids: Vec<i64> =
                    g.iter().flat_map(|v| v.payload.member_ids(osm_type)).collect();
                (id, ids)
            }))
        };
        let node_refs = member_refs(OsmType::Node);
        let way_refs = member_refs(OsmType::Way);
        let node_channel = side_channel(&node_groups, |id| node_refs.get(&id).copied());
        let way_channel = side_channel(&way_groups, |id| way_refs.get(&id).copied());

        let mut pass = RelationPass::new(
            config.grid(),
            BackReferenceResolver::from_reader(node_channel.as_slice(), config.retention_limit),
            BackReferenceResolver::from_reader(way_channel.as_slice(), config.retention_limit),
        );
        let relation = pass.process(relations().remove(0)).unwrap();
        assert_eq!(relation.nodes.len(), 1);
        assert_eq!(relation.ways.len(), 2);
        assert_eq!(
            relation.bbox,
            Some(IntBbox::new(86_700_000, 494_100_000, 86_900_000, 494_200_000))
        );
        assert_eq!(relation.coord, config.grid().place(relation.bbox.map(to_degrees)));
        pass.finish(&store).unwrap();

        store.sync().unwrap();
        node_cells = store.cells(OsmType::Node).unwrap();
    }

    // everything survives a reopen
    let store = LmdbCellStore::open_with_map_size(dir.path(), 1 << 30).unwrap();
    assert_eq!(store.cells(OsmType::Node).unwrap(), node_cells);

    let mut found = Vec::new();
    for (zoom, cell_id) in node_cells {
        assert!(zoom <= 14);
        let cell = store.get_cell::<NodePayload>(zoom, cell_id).unwrap().unwrap();
        for entity in cell.iter() {
            found.push(entity.unwrap().id());
        }
    }
    found.sort_unstable();
    assert_eq!(found, [1, 2, 3, 4, 5, 6]);

    let way_cells = store.cells(OsmType::Way).unwrap();
    let unlocated = (CellCoord::UNLOCATED.zoom, CellCoord::UNLOCATED.id.get());
    assert!(way_cells.contains(&unlocated));
    let orphan = store
        .get_cell::<WayPayload>(unlocated.0, unlocated.1)
        .unwrap()
        .unwrap();
    assert!(orphan.find(102).unwrap().is_some());

    let relation_cells = store.cells(OsmType::Relation).unwrap();
    assert_eq!(relation_cells.len(), 1);
    let (zoom, cell_id) = relation_cells[0];
    let cell = store
        .get_cell::<RelationPayload>(zoom, cell_id)
        .unwrap()
        .unwrap();
    let relation = cell.find(200).unwrap().unwrap();
    let latest = relation.latest().unwrap();
    assert_eq!(latest.tags.as_slice(), [Tag::new(3, 4)]);
    assert_eq!(latest.payload.member_ids(OsmType::Way).collect::<Vec<_>>(), [100, 101]);

    // the deleted node keeps its full history
    let node_cell = store
        .cells(OsmType::Node)
        .unwrap()
        .into_iter()
        .find_map(|(zoom, cell_id)| {
            let cell = store.get_cell::<NodePayload>(zoom, cell_id).unwrap()?;
            cell.find(6).unwrap()
        })
        .unwrap();
    let history = node_cell.versions().unwrap();
    assert_eq!(history.len(), 2);
    assert!(!history[0].is_visible());
    assert_eq!(node_cell.version_at(250).unwrap().unwrap().number(), 1);
}

#[test]
fn test_fixed_grid_pipeline() {
    build("fixed");
}

#[test]
fn test_zorder_grid_pipeline() {
    build("zorder");
}
