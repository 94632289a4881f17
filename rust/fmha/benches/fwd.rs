use std::{hint::black_box, time::Duration};

use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use fmha::prelude::*;
use half::f16;
use lanetile::tiles::{D8, D32, D64, D128, D256};

type Shape64 = TileShape<D64, D64, D32, D64, D32, D64, D256>;
type Shape128 = TileShape<D128, D128, D32, D128, D32, D128, D256>;
type NoMask = FmhaFlags<false, false, false, true, false, true>;
type Causal = FmhaFlags<false, false, false, true, true, true>;

fn inputs(dims: &FmhaDims) -> (Vec<f16>, Vec<f16>, Vec<f16>) {
    let fill = |len: usize, step: usize| -> Vec<f16> {
        (0..len)
            .map(|i| f16::from_f32(((i * step) % 17) as f32 / 17.0 - 0.5))
            .collect()
    };
    (fill(dims.q_len(), 3), fill(dims.k_len(), 5), fill(dims.v_len(), 7))
}

macro_rules! bench_fwd_impl {
    ($c:expr, $group_name:expr, $shape:ty, $flags:ty, $mask:expr, $hdim:expr, $seqlen:expr) => {{
        type P = FmhaFwdProblem<$shape, FmhaDataTypes<f16, f32>, $flags>;
        let dims = FmhaDims::new(1, 2, $seqlen, $seqlen, $hdim);
        let (q, k, v) = inputs(&dims);
        let kernel = FmhaFwdKernel::<P>::new().unwrap();
        let args = FmhaFwdArgs::<P> {
            q: &q,
            k: &k,
            v: &v,
            bias: None,
            dims,
            scale: 1.0 / ($hdim as f32).sqrt(),
            mask: $mask,
        };
        let mut o = vec![f16::ZERO; dims.o_len()];
        let mut lse = vec![0.0f32; dims.lse_len()];

        let param_str = format!("d{}_s{}", $hdim, $seqlen);
        $c.throughput(Throughput::Elements(dims.heads() as u64 * $seqlen * $seqlen * $hdim * 4));
        $c.bench_with_input(BenchmarkId::new($group_name, &param_str), &(), |bench, _| {
            bench.iter(|| {
                kernel
                    .launch(black_box(&args), &mut o, Some(&mut lse[..]))
                    .unwrap()
            })
        });
    }};
}

fn bench_fwd(c: &mut Criterion) {
    let mut group = c.benchmark_group("fmha_fwd");
    group.measurement_time(Duration::from_secs(5));
    group.sample_size(10);

    bench_fwd_impl!(group, "no_mask", Shape64, NoMask, MaskSpec::None, 64, 256);
    bench_fwd_impl!(group, "no_mask", Shape128, NoMask, MaskSpec::None, 128, 256);
    bench_fwd_impl!(group, "causal", Shape64, Causal, MaskSpec::causal_top_left(), 64, 256);

    group.finish();
}

fn bench_splitkv(c: &mut Criterion) {
    type P = FmhaFwdProblem<Shape64, FmhaDataTypes<f16, f32>, NoMask>;
    type C = CombineProblemOf<P, D8>;

    let mut group = c.benchmark_group("fmha_splitkv");
    group.measurement_time(Duration::from_secs(5));
    group.sample_size(10);

    let dims = FmhaDims::new(1, 2, 64, 1024, 64);
    let (q, k, v) = inputs(&dims);
    let split_kernel = FmhaFwdSplitKvKernel::<P>::new().unwrap();
    let combine_kernel = FmhaCombineKernel::<C>::new();

    for num_splits in [1, 4, 8] {
        let args = FmhaFwdSplitKvArgs::<P> {
            fwd: FmhaFwdArgs {
                q: &q,
                k: &k,
                v: &v,
                bias: None,
                dims,
                scale: 0.125,
                mask: MaskSpec::None,
            },
            num_splits,
        };
        let mut o_acc = vec![0.0f32; dims.o_acc_len(num_splits)];
        let mut lse_acc = vec![0.0f32; dims.lse_acc_len(num_splits)];
        let mut o = vec![f16::ZERO; dims.o_len()];
        let mut lse = vec![0.0f32; dims.lse_len()];

        group.bench_with_input(BenchmarkId::new("splits", num_splits), &(), |bench, _| {
            bench.iter(|| {
                split_kernel.launch(&args, &mut o_acc, &mut lse_acc).unwrap();
                combine_kernel
                    .launch(
                        &FmhaCombineArgs {
                            lse_acc: &lse_acc,
                            o_acc: &o_acc,
                            dims,
                            num_splits,
                        },
                        &mut o,
                        Some(&mut lse[..]),
                    )
                    .unwrap()
            })
        });
    }

    group.finish();
}

criterion_group!(benches, bench_fwd, bench_splitkv);
criterion_main!(benches);
