//! Codec benchmarks: building and replaying entity histories.

use std::hint::black_box;

use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use osmhist_codec::{Base, CompactedEntity, GridCell, NodePayload, Tag, Tags, Version, WayPayload};

fn node_history(id: i64, count: i32) -> Vec<Version<NodePayload>> {
    (1..=count)
        .rev()
        .map(|v| Version {
            id,
            version: v,
            timestamp: 1_300_000_000 + i64::from(v) * 3_600,
            changeset: 10_000 + i64::from(v),
            user_id: i64::from(v % 3),
            tags: (0..(v % 4) as u32).map(|k| Tag::new(k, v as u32)).collect::<Tags>(),
            payload: NodePayload::new(86_756_350 + i64::from(v) * 17, 494_186_210 - i64::from(v) * 5),
        })
        .collect()
}

fn way_history(count: i32) -> Vec<Version<WayPayload>> {
    (1..=count)
        .rev()
        .map(|v| Version {
            id: 77,
            version: v,
            timestamp: 1_300_000_000 + i64::from(v),
            changeset: i64::from(v),
            user_id: 1,
            tags: Tags::new(),
            payload: WayPayload::new((0..i64::from(v) + 8).map(|r| 1_000 + r * 2).collect::<Vec<_>>()),
        })
        .collect()
}

fn entity_benchmarks(c: &mut Criterion) {
    let mut group = c.benchmark_group("entity");
    let base = Base::new(1, 1_300_000_000, 86_000_000, 494_000_000);

    for count in [1, 10, 100] {
        let nodes = node_history(100, count);
        let ways = way_history(count);
        group.throughput(Throughput::Elements(count as u64));

        group.bench_with_input(BenchmarkId::new("build_node", count), &nodes, |b, nodes| {
            b.iter(|| black_box(CompactedEntity::build(nodes, base, None)));
        });

        let entity = CompactedEntity::build(&nodes, base, None);
        group.bench_with_input(BenchmarkId::new("replay_node", count), &entity, |b, entity| {
            b.iter(|| {
                for version in entity.iter() {
                    black_box(version.ok());
                }
            });
        });

        let way = CompactedEntity::build(&ways, base, None);
        group.bench_with_input(BenchmarkId::new("replay_way", count), &way, |b, way| {
            b.iter(|| black_box(way.versions().ok()));
        });
    }

    group.finish();
}

fn cell_benchmarks(c: &mut Criterion) {
    let mut group = c.benchmark_group("cell");
    let base = Base::new(1, 1_300_000_000, 86_000_000, 494_000_000);

    for size in [100, 1_000] {
        let entities: Vec<_> = (1..=size)
            .map(|id| CompactedEntity::build(&node_history(id, 3), base, None))
            .collect();
        group.throughput(Throughput::Elements(size as u64));

        group.bench_with_input(BenchmarkId::new("seal", size), &entities, |b, entities| {
            b.iter(|| black_box(GridCell::seal(15, 42, base, entities.clone()).ok()));
        });

        let Ok(cell) = GridCell::seal(15, 42, base, entities) else {
            continue;
        };
        group.bench_with_input(BenchmarkId::new("find", size), &cell, |b, cell| {
            b.iter(|| black_box(cell.find(size / 2).ok()));
        });
    }

    group.finish();
}

criterion_group!(benches, entity_benchmarks, cell_benchmarks);
criterion_main!(benches);
