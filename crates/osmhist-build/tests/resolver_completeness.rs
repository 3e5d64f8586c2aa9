//! Every child that exists with a watermark at or above its parent is
//! returned exactly once, however the requests are batched.

use std::collections::BTreeSet;

use osmhist_build::{BackReferenceResolver, SideChannelWriter, watermarks_for};
use osmhist_codec::{CompactedEntity, NodePayload, Tags, Version};

/// Deterministic pseudo-random parent -> children table.
fn parents(count: i64, seed: u64) -> Vec<(i64, Vec<i64>)> {
    let mut state = seed;
    let mut next = move || {
        state = state
            .wrapping_mul(6_364_136_223_846_793_005)
            .wrapping_add(1_442_695_040_888_963_407);
        state >> 33
    };
    (0..count)
        .map(|i| {
            let parent = 1_000 + i * 3;
            let fan_out = 1 + next() % 8;
            let children: BTreeSet<i64> = (0..fan_out)
                .map(|_| {
                    // mostly local references with occasional long jumps back
                    if next() % 5 == 0 {
                        (next() % 900) as i64
                    } else {
                        i * 2 + (next() % 20) as i64
                    }
                })
                .collect();
            (parent, children.into_iter().collect())
        })
        .collect()
}

fn side_channel(table: &[(i64, Vec<i64>)], drop_every: Option<i64>) -> Vec<u8> {
    let watermarks = watermarks_for(table.iter().map(|(p, c)| (*p, c.iter().copied())));
    let mut children: Vec<_> = watermarks.into_iter().collect();
    children.sort_unstable();

    let mut writer = SideChannelWriter::new(Vec::new());
    for (id, watermark) in children {
        if drop_every.is_some_and(|n| id % n == 0) {
            continue;
        }
        let version = Version {
            id,
            version: 1,
            timestamp: 1,
            changeset: 1,
            user_id: 1,
            tags: Tags::new(),
            payload: NodePayload::new(id * 100, id * 50),
        };
        writer.append(&[version], None, watermark).unwrap();
    }
    writer.finish().unwrap()
}

fn ids(entities: &[CompactedEntity<NodePayload>]) -> Vec<i64> {
    entities.iter().map(CompactedEntity::id).collect()
}

#[test]
fn test_every_child_resolved_once() {
    for seed in [1, 7, 42, 1_000_003] {
        let table = parents(300, seed);
        let channel = side_channel(&table, None);
        let mut resolver =
            BackReferenceResolver::<_, NodePayload>::from_reader(channel.as_slice(), 10_000);

        let mut requested = 0;
        for (parent, children) in &table {
            let resolved = resolver.resolve_all(*parent, children).unwrap();
            assert_eq!(&ids(&resolved), children, "seed {seed}, parent {parent}");
            requested += children.len() as u64;
        }

        let stats = resolver.stats();
        assert_eq!(stats.missing, 0);
        assert_eq!(stats.from_stream + stats.from_cache, requested);
    }
}

#[test]
fn test_batching_does_not_matter() {
    let table = parents(200, 99);
    let channel = side_channel(&table, None);

    let mut whole = BackReferenceResolver::<_, NodePayload>::from_reader(channel.as_slice(), 10_000);
    let mut split = BackReferenceResolver::<_, NodePayload>::from_reader(channel.as_slice(), 10_000);

    for (parent, children) in &table {
        let expected = ids(&whole.resolve_all(*parent, children).unwrap());

        let mut batched = Vec::new();
        for chunk in children.chunks(2) {
            batched.extend(ids(&split.resolve_all(*parent, chunk).unwrap()));
        }
        assert_eq!(batched, expected, "parent {parent}");
    }
    assert_eq!(split.stats().missing, 0);
}

#[test]
fn test_payload_survives_the_join() {
    let table = vec![(10, vec![1, 2]), (20, vec![2, 3])];
    let channel = side_channel(&table, None);
    let mut resolver = BackReferenceResolver::<_, NodePayload>::from_reader(channel.as_slice(), 10);

    resolver.resolve_all(10, &[1, 2]).unwrap();
    let second = resolver.resolve_all(20, &[2, 3]).unwrap();
    let location = second[0].latest().unwrap().payload;
    assert_eq!(location, NodePayload::new(200, 100));
}

#[test]
fn test_missing_children_are_omitted() {
    let table = parents(150, 5);
    let channel = side_channel(&table, Some(7));
    let mut resolver =
        BackReferenceResolver::<_, NodePayload>::from_reader(channel.as_slice(), 10_000);

    let mut expected_missing = 0;
    for (parent, children) in &table {
        let resolved = ids(&resolver.resolve_all(*parent, children).unwrap());
        let expected: Vec<i64> = children.iter().copied().filter(|id| id % 7 != 0).collect();
        expected_missing += (children.len() - expected.len()) as u64;
        assert_eq!(resolved, expected, "parent {parent}");
    }
    assert_eq!(resolver.stats().missing, expected_missing);
}
