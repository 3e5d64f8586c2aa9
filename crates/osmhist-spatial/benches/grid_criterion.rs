//! Grid benchmarks: placing boxes and walking query ranges.

use std::hint::black_box;

use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use osmhist_spatial::{BoundingBox, FixedGrid, ZGrid};

/// Boxes spread over Europe, from single points to a few degrees wide.
fn boxes(count: usize) -> Vec<BoundingBox> {
    (0..count)
        .map(|i| {
            let lon = -10.0 + (i % 400) as f64 * 0.1;
            let lat = 35.0 + (i / 400 % 300) as f64 * 0.1;
            let size = [0.0, 0.001, 0.05, 2.0][i % 4];
            BoundingBox::new(lon, lat, lon + size, lat + size)
        })
        .collect()
}

fn placement_benchmarks(c: &mut Criterion) {
    let mut group = c.benchmark_group("place");
    let boxes = boxes(10_000);

    let fixed = FixedGrid::new(15);
    group.bench_function("fixed", |b| {
        b.iter(|| {
            for bbox in &boxes {
                black_box(fixed.place_bbox(bbox));
            }
        });
    });

    let zgrid = ZGrid::new(15);
    group.bench_function("zorder", |b| {
        b.iter(|| {
            for bbox in &boxes {
                black_box(zgrid.place_bbox(bbox));
            }
        });
    });

    group.finish();
}

fn range_benchmarks(c: &mut Criterion) {
    let mut group = c.benchmark_group("range");
    let query = BoundingBox::new(8.6, 49.3, 8.8, 49.5);

    for zoom in [8, 12, 15] {
        let zgrid = ZGrid::new(zoom);
        group.bench_with_input(BenchmarkId::new("zorder_dfs", zoom), &zgrid, |b, grid| {
            b.iter(|| black_box(grid.range(query).count()));
        });

        let fixed = FixedGrid::new(zoom);
        group.bench_with_input(BenchmarkId::new("fixed_cells", zoom), &fixed, |b, grid| {
            b.iter(|| black_box(grid.bbox_to_cells(&query, zoom)));
        });
    }

    group.finish();
}

criterion_group!(benches, placement_benchmarks, range_benchmarks);
criterion_main!(benches);
