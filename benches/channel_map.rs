//! Benchmarks for channel map staging and decoding
//!
//! Run with: cargo bench

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use turbine_rs::rmap::{DataBlock, DataTree, TimeRange};
use turbine_rs::{ByteOrder, ChannelData, ChannelMap};

fn channel_names(count: usize) -> Vec<String> {
    (0..count).map(|i| format!("rack{}/sensor{}", i % 8, i)).collect()
}

/// Per-point writes with contiguous times coalesce into one block per channel.
fn bench_put_coalescing(c: &mut Criterion) {
    let mut group = c.benchmark_group("put_coalescing");

    for points in [16usize, 256, 4096].iter() {
        group.throughput(Throughput::Elements(*points as u64));
        group.bench_with_input(BenchmarkId::from_parameter(points), points, |b, &points| {
            b.iter(|| {
                let mut map = ChannelMap::new();
                let c0 = map.add("c0").unwrap();
                for i in 0..points {
                    map.put_time(i as f64, 1.0);
                    map.put_data_as_f64(c0, &[i as f64]).unwrap();
                }
                black_box(map)
            });
        });
    }

    group.finish();
}

fn bench_produce_request(c: &mut Criterion) {
    let mut group = c.benchmark_group("produce_request");

    for count in [10usize, 100, 1000].iter() {
        let names = channel_names(*count);
        group.throughput(Throughput::Elements(*count as u64));
        group.bench_with_input(BenchmarkId::from_parameter(count), &names, |b, names| {
            b.iter(|| {
                let mut map = ChannelMap::new();
                for name in names {
                    map.add(name).unwrap();
                }
                black_box(map.produce_request(false).unwrap())
            });
        });
    }

    group.finish();
}

fn result_tree(names: &[String], points: usize) -> DataTree {
    let values: Vec<f64> = (0..points).map(|i| i as f64).collect();
    let data = ChannelData::Float64(values);
    let mut tree = DataTree::new();
    let root = tree.root();
    for name in names {
        let node = tree.add_channel(root, &format!("/Server/src/{}", name));
        let node = tree.node_mut(node);
        node.block = Some(DataBlock::from_data(&data, ByteOrder::Lsb));
        node.time = Some(TimeRange::new(0.0, points as f64));
    }
    tree
}

fn bench_process_result(c: &mut Criterion) {
    let mut group = c.benchmark_group("process_result");

    for count in [10usize, 100].iter() {
        let tree = result_tree(&channel_names(*count), 1024);
        group.throughput(Throughput::Elements(*count as u64));
        group.bench_with_input(BenchmarkId::from_parameter(count), &tree, |b, tree| {
            b.iter(|| {
                let mut map = ChannelMap::new();
                map.process_result(Some(tree.clone()), true, false);
                let total: usize = (0..map.len())
                    .map(|i| map.data_as_f64(i).map(|v| v.len()).unwrap_or(0))
                    .sum();
                black_box(total)
            });
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_put_coalescing,
    bench_produce_request,
    bench_process_result,
);

criterion_main!(benches);
