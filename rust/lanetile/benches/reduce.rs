use std::{hint::black_box, sync::Arc, time::Duration};

use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use lanetile::{
    reduction_ops::{MaxOp, SumOp},
    tiles::{DistributedTensor, Encoding, TileDistribution},
};

/// Reductions per measured iteration, to amortize setup
const BENCH_ITERS: usize = 64;

macro_rules! bench_reduce_impl {
    ($c:expr, $group_name:expr, $op:ty, $rows:expr, $cols:expr, $threads:expr) => {{
        let dist: Arc<_> = TileDistribution::shared(Encoding::for_tile($rows, $cols, $threads));
        let tile = DistributedTensor::<f32>::from_fn(&dist, |[r, c]| (r * $cols + c) as f32);

        let param_str = format!("{}x{}_t{}", $rows, $cols, $threads);

        // Elements per iteration * number of iterations
        let elements = $rows * $cols * BENCH_ITERS;
        $c.throughput(Throughput::Elements(elements as u64));
        $c.bench_with_input(BenchmarkId::new($group_name, &param_str), &(), |b, _| {
            b.iter(|| {
                for _ in 0..BENCH_ITERS {
                    black_box(black_box(&tile).reduce_rows::<$op>());
                }
            })
        });
    }};
}

fn bench_row_reductions(c: &mut Criterion) {
    let mut group = c.benchmark_group("row_reductions");
    group.measurement_time(Duration::from_secs(5));

    // s_acc tiles of the forward pipeline
    bench_reduce_impl!(group, "sum_rows", SumOp, 64, 64, 256);
    bench_reduce_impl!(group, "sum_rows", SumOp, 128, 128, 256);
    bench_reduce_impl!(group, "max_rows", MaxOp, 64, 64, 256);
    bench_reduce_impl!(group, "max_rows", MaxOp, 128, 128, 256);

    // Wide rows exercise the butterfly
    bench_reduce_impl!(group, "sum_rows", SumOp, 16, 256, 256);
    bench_reduce_impl!(group, "max_rows", MaxOp, 16, 256, 256);

    group.finish();
}

fn bench_thread_scaling_reductions(c: &mut Criterion) {
    let mut group = c.benchmark_group("reduction_thread_scaling");
    group.measurement_time(Duration::from_secs(5));

    for threads in [64usize, 128, 256] {
        bench_reduce_impl!(group, "sum_rows", SumOp, 64, 128, threads);
    }

    group.finish();
}

criterion_group!(benches, bench_row_reductions, bench_thread_scaling_reductions);
criterion_main!(benches);
