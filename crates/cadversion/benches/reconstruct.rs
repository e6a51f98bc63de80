//! Reconstruction cost versus replay depth.
//!
//! Run with:
//!   cargo bench --bench reconstruct

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use tokio::runtime::Runtime;

use cadversion::store::MemoryStore;
use cadversion::{CompactionPolicy, SchemaVersion, VersionGraph, VersionGraphConfig};
use cadversion_testkit::fixtures::{add_element, line, sample_drawing};

fn build_history(rt: &Runtime, deltas: usize) -> VersionGraph<MemoryStore> {
    let graph = VersionGraph::new(
        MemoryStore::new(),
        VersionGraphConfig {
            compaction: CompactionPolicy::never_checkpoint(),
            validate_deltas_on_write: false,
            ..VersionGraphConfig::default()
        },
    );
    rt.block_on(async {
        graph
            .initialize(&sample_drawing(), SchemaVersion(1), "bench")
            .await
            .unwrap();
        for i in 0..deltas {
            let x = i as i64;
            graph
                .record_edit(add_element(2 + i, line(x, 0, x, 10)), "line")
                .await
                .unwrap();
        }
    });
    graph
}

fn bench_replay_depth(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let mut group = c.benchmark_group("replay_depth");

    for depth in [0usize, 8, 32, 128] {
        let graph = build_history(&rt, depth);
        let target = depth as u64 + 1;
        group.throughput(Throughput::Elements(depth.max(1) as u64));
        group.bench_with_input(BenchmarkId::from_parameter(depth), &target, |b, &v| {
            b.iter(|| {
                let state = rt.block_on(graph.get_state_at_version(black_box(v))).unwrap();
                black_box(state)
            })
        });
    }

    group.finish();
}

criterion_group!(benches, bench_replay_depth);
criterion_main!(benches);
