use std::{marker::PhantomData, sync::Arc};

use lanetile::{
    block::{BlockCtx, BlockGemm, Smem},
    element::Element,
    tiles::{DimOrOne, DistributedTensor, TileDistribution},
};
use tracing::trace;

use fmha_config::VLayout;

use crate::{
    error::{FmhaError, Result},
    mask::FmhaMask,
    policy::{DefaultPolicy, FmhaPolicy},
    problem::{
        BiasWindow, FmhaProblem, FmhaShape, FmhaTraits, KType, KWindow, LseType, OAccType,
        PType, QType, QWindow, SAccType, SmplType, VLayoutKind, VType, VWindow,
    },
    softmax::OnlineSoftmax,
};

/// Inputs of one forward block.
pub struct FwdArgs<'a, P: FmhaProblem> {
    /// `M0 × K0BlockLength` query tile.
    pub q: QWindow<'a, P>,
    /// `N0 × K0` at the first key tile and head-dim column 0.
    pub k: KWindow<'a, P>,
    /// `N1 × K1` over the `[hdim_v, seqlen_k]` view of V at the first key tile.
    pub v: VWindow<'a, P>,
    /// `M0 × N0` at the query tile and first key tile.
    pub bias: Option<BiasWindow<'a, P>>,
    pub mask: FmhaMask,
    pub seqlen_k: usize,
    pub scale: f32,
    /// Key tiles to visit, starting at the window origins.
    pub num_total_loop: usize,
}

/// Result of one forward block, still in registers.
pub struct FwdOutput<P: FmhaProblem> {
    /// Normalized output, `M0 × N1`.
    pub o_acc: DistributedTensor<OAccType<P>>,
    /// Natural-log LSE per query row, on the row projection of the score tile.
    pub lse: DistributedTensor<LseType<P>>,
}

/// Q kept in registers, K staged through LDS, V staged through LDS.
///
/// The Q tile is loaded once. Each outer iteration streams one `N0`-wide key
/// tile: K arrives in `k0_loops` async copies of `N0 × K0`, V in `k1_loops`
/// synchronous stores of `N1 × K1`, all rotating through the slots of
/// [`FmhaPolicy::lds_sequence`]. The stage about to be consumed is always
/// separated from its producer by a barrier, and the next stage is produced
/// into a slot no lane is still reading.
pub struct QrKsVsPipeline<P: FmhaProblem, Pol: FmhaPolicy<P> = DefaultPolicy> {
    q_dist: Arc<TileDistribution>,
    s_dist: Arc<TileDistribution>,
    o_dist: Arc<TileDistribution>,
    v_dist: Arc<TileDistribution>,
    v_shuffled_dist: Arc<TileDistribution>,
    lds_seq: Vec<usize>,
    qk_gemm: Pol::QkGemm,
    kv_gemm: Pol::KvGemm,
    _phantom: PhantomData<(P, Pol)>,
}

impl<P: FmhaProblem, Pol: FmhaPolicy<P>> QrKsVsPipeline<P, Pol> {
    const M0: usize = <P::Shape as FmhaShape>::M0::VALUE;
    const N0: usize = <P::Shape as FmhaShape>::N0::VALUE;
    const K0: usize = <P::Shape as FmhaShape>::K0::VALUE;
    const N1: usize = <P::Shape as FmhaShape>::N1::VALUE;
    const K1: usize = <P::Shape as FmhaShape>::K1::VALUE;
    const K0_LOOPS: usize = <P::Shape as FmhaShape>::K0_LOOPS;
    const K1_LOOPS: usize = <P::Shape as FmhaShape>::K1_LOOPS;

    pub fn new() -> Result<Self> {
        let () = <P::Shape as FmhaShape>::CHECK;
        let () = Pol::CHECK;

        let lds_seq = Pol::lds_sequence().ok_or(FmhaError::NoLdsSequence {
            slots: Pol::NUM_PREFETCH,
            k0_loops: Self::K0_LOOPS,
            k1_loops: Self::K1_LOOPS,
        })?;
        debug_assert!(lds_seq.iter().all(|&s| s < Pol::NUM_PREFETCH));

        let v_dist = TileDistribution::shared(Pol::V_ENCODING);
        let v_shuffled_dist = match P::VLayout::LAYOUT {
            VLayout::RowMajor => Arc::new(v_dist.shuffled()),
            VLayout::ColMajor => v_dist.clone(),
        };
        Ok(Self {
            q_dist: TileDistribution::shared(Pol::Q_ENCODING),
            s_dist: TileDistribution::shared(Pol::S_ACC_ENCODING),
            o_dist: TileDistribution::shared(Pol::O_ACC_ENCODING),
            v_dist,
            v_shuffled_dist,
            lds_seq,
            qk_gemm: Pol::QkGemm::default(),
            kv_gemm: Pol::KvGemm::default(),
            _phantom: PhantomData,
        })
    }

    pub fn lds_sequence(&self) -> &[usize] {
        &self.lds_seq
    }

    pub fn smem_bytes(&self) -> usize {
        Pol::smem_bytes()
    }

    pub fn run(&self, ctx: &mut BlockCtx, args: FwdArgs<'_, P>) -> FwdOutput<P> {
        self.run_with(ctx, args, |q| q, |k| k, |v| v)
    }

    /// Forward block with element functions applied to Q as it is loaded, to
    /// K as the QK GEMM consumes it, and to V before it is staged.
    pub fn run_with(
        &self,
        ctx: &mut BlockCtx,
        args: FwdArgs<'_, P>,
        q_fn: impl Fn(QType<P>) -> QType<P>,
        k_fn: impl Fn(KType<P>) -> KType<P>,
        v_fn: impl Fn(VType<P>) -> VType<P>,
    ) -> FwdOutput<P> {
        let (m0, n0, k0, n1, k1) = (Self::M0, Self::N0, Self::K0, Self::N1, Self::K1);
        let (k0_loops, k1_loops) = (Self::K0_LOOPS, Self::K1_LOOPS);
        let seq = &self.lds_seq;
        let last = seq.len() - 1;

        let region = ctx.lds_region(Pol::NUM_PREFETCH);
        let mut k_lds = Smem::<KType<P>>::new(region, Pol::k_lds_len());
        let mut v_lds = Smem::<VType<P>>::new(region, Pol::v_lds_len());

        let mut q = DistributedTensor::load_tile(&args.q, &self.q_dist);
        q.elementwise_inout(|x| *x = q_fn(*x));

        let mut o_acc = DistributedTensor::<OAccType<P>>::zeros(&self.o_dist);
        let mut softmax =
            OnlineSoftmax::<SmplType<P>, P::Traits>::new(&self.s_dist.row_projection(), args.scale);

        if args.num_total_loop == 0 {
            return FwdOutput {
                o_acc,
                lse: softmax.lse(),
            };
        }

        let row0 = args.q.origin()[0];
        let mut k_block = args.k;
        let mut k_window = k_block;
        let mut v_window = args.v;
        let mut bias_window = args.bias;

        // Prologue: first K sub-tile in flight.
        k_lds.async_load_tile(ctx, seq[0], &k_window);
        k_window.move_window([0, k0 as isize]);

        let mut s_acc = DistributedTensor::<SAccType<P>>::zeros(&self.s_dist);
        for i_total in 0..args.num_total_loop {
            let col0 = k_block.origin()[0];
            s_acc.zero();

            // S = Q · Kᵀ over K0-wide head-dim slices. Stage i is fenced and
            // barriered while stage i + 1 is in flight.
            for i_k0 in 0..k0_loops - 1 {
                k_lds.async_load_tile(ctx, seq[i_k0 + 1], &k_window);
                k_window.move_window([0, k0 as isize]);
                k_lds.async_fence(ctx, 1);
                ctx.barrier();
                let k_view = k_lds.view(ctx, seq[i_k0], [n0, k0], [k0, 1]);
                self.qk_gemm
                    .run(&mut s_acc, q.slice([0, i_k0 * k0], [m0, k0]), k_view, &k_fn);
            }
            k_lds.async_fence(ctx, 0);
            ctx.barrier();

            let mut v_buf = DistributedTensor::load_tile(&v_window, &self.v_dist);
            {
                let k_view = k_lds.view(ctx, seq[k0_loops - 1], [n0, k0], [k0, 1]);
                self.qk_gemm.run(
                    &mut s_acc,
                    q.slice([0, (k0_loops - 1) * k0], [m0, k0]),
                    k_view,
                    &k_fn,
                );
            }

            let mut s = s_acc.map(|x| x.convert::<SmplType<P>>());
            let bias = bias_window.as_ref().map(|w| {
                DistributedTensor::load_tile(w, &self.s_dist).map(|b| b.convert::<SmplType<P>>())
            });
            softmax.scale_scores(&mut s, bias.as_ref());
            self.mask_scores(&mut s, &args.mask, row0, col0, args.seqlen_k);

            // First V sub-tile goes to LDS while the softmax runs.
            v_lds.store_tile(ctx, seq[k0_loops], &self.stage_v(&v_buf, &v_fn), [k1, 1]);
            v_window.move_window([0, k1 as isize]);
            if k1_loops > 1 {
                v_buf = DistributedTensor::load_tile(&v_window, &self.v_dist);
            }

            let (p, rescale) = softmax.update(&s);
            o_acc.sweep_rows_with(&rescale, |_, o, f| *o = *o * f.convert::<OAccType<P>>());
            let p = p.map(|x| x.convert::<PType<P>>());

            // O += P · V over K1-wide key slices.
            for i_k1 in 0..k1_loops - 1 {
                if i_k1 != 0 {
                    v_buf = DistributedTensor::load_tile(&v_window, &self.v_dist);
                }
                ctx.barrier();
                let v_view = v_lds.view(ctx, seq[k0_loops + i_k1], [n1, k1], [k1, 1]);
                self.kv_gemm
                    .run(&mut o_acc, p.slice([0, i_k1 * k1], [m0, k1]), v_view, |v| v);
                v_lds.store_tile(
                    ctx,
                    seq[k0_loops + i_k1 + 1],
                    &self.stage_v(&v_buf, &v_fn),
                    [k1, 1],
                );
                v_window.move_window([0, k1 as isize]);
            }

            if i_total + 1 < args.num_total_loop {
                k_block.move_window([n0 as isize, 0]);
                if let Some(w) = bias_window.as_mut() {
                    w.move_window([0, n0 as isize]);
                }
                k_window = k_block;
                // The prefetch would overwrite the slot the previous V stage read.
                if seq[0] == seq[last - 1] {
                    ctx.barrier();
                }
                k_lds.async_load_tile(ctx, seq[0], &k_window);
                k_window.move_window([0, k0 as isize]);
            }

            ctx.barrier();
            let v_view = v_lds.view(ctx, seq[last], [n1, k1], [k1, 1]);
            self.kv_gemm
                .run(&mut o_acc, p.slice([0, (k1_loops - 1) * k1], [m0, k1]), v_view, |v| v);

            trace!(block = ctx.block_id(), i_total, col0, "key tile done");
        }

        let lse = softmax.lse();
        softmax.finalize(&mut o_acc);
        FwdOutput { o_acc, lse }
    }

    /// Row-major V is reordered within each lane so the LDS store writes
    /// contiguous `K1` runs.
    fn stage_v(
        &self,
        v_buf: &DistributedTensor<VType<P>>,
        v_fn: &impl Fn(VType<P>) -> VType<P>,
    ) -> DistributedTensor<VType<P>> {
        let mut staged = match P::VLayout::LAYOUT {
            VLayout::RowMajor => {
                let mut shuffled = DistributedTensor::zeros(&self.v_shuffled_dist);
                shuffled.shuffle_from(v_buf);
                shuffled
            }
            VLayout::ColMajor => v_buf.clone(),
        };
        staged.elementwise_inout(|x| *x = v_fn(*x));
        staged
    }

    /// `-inf` for key columns past `seqlen_k` and for masked positions.
    fn mask_scores(
        &self,
        s: &mut DistributedTensor<SmplType<P>>,
        mask: &FmhaMask,
        row0: usize,
        col0: usize,
        seqlen_k: usize,
    ) {
        let traits_pad = <P::Traits as FmhaTraits>::PAD_SEQLEN_K;
        let traits_mask = <P::Traits as FmhaTraits>::IS_MASKING;
        let pad = traits_pad && col0 + Self::N0 > seqlen_k;
        let edge = traits_mask && mask.is_edge_tile(row0, col0, Self::M0, Self::N0);
        if !pad && !edge {
            return;
        }
        let neg_inf = SmplType::<P>::neg_inf();
        s.sweep(|_, _, [r, c], x| {
            let (row, col) = (row0 + r, col0 + c);
            if (pad && col >= seqlen_k) || (edge && mask.is_masked(row, col)) {
                *x = neg_inf;
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use lanetile::tiles::{D16, D32, D64, TensorView, TileWindow};

    use super::*;
    use crate::problem::{FmhaDataTypes, FmhaFlags, FmhaFwdProblem, TileShape};

    type P = FmhaFwdProblem<
        TileShape<D32, D32, D16, D32, D16, D32, D64>,
        FmhaDataTypes<f32, f32>,
        FmhaFlags<false, false, false, true, false, false>,
    >;

    const SK: usize = 96;

    fn values(len: usize, step: usize) -> Vec<f32> {
        (0..len).map(|i| ((i * step) % 13) as f32 / 13.0 - 0.5).collect()
    }

    struct Head {
        q: Vec<f32>,
        k: Vec<f32>,
        v: Vec<f32>,
    }

    impl Head {
        fn new() -> Self {
            Self {
                q: values(32 * 32, 3),
                k: values(SK * 32, 5),
                v: values(SK * 32, 7),
            }
        }

        fn args(&self, scale: f32) -> FwdArgs<'_, P> {
            FwdArgs {
                q: TileWindow::new(TensorView::new(&self.q, [32, 32]), [0, 0]),
                k: TileWindow::new(TensorView::new(&self.k, [SK, 32]), [0, 0]),
                v: TileWindow::new(TensorView::new(&self.v, [SK, 32]).transposed(), [0, 0]),
                bias: None,
                mask: FmhaMask::no_mask(32, SK),
                seqlen_k: SK,
                scale,
                num_total_loop: SK / 32,
            }
        }
    }

    fn assert_close(a: &[f32], b: &[f32]) {
        for (i, (x, y)) in a.iter().zip(b).enumerate() {
            assert!((x - y).abs() <= 1e-5 + 1e-5 * y.abs(), "{i}: {x} vs {y}");
        }
    }

    #[test]
    fn v_function_scales_the_output() {
        let head = Head::new();
        let pipeline = QrKsVsPipeline::<P>::new().unwrap();
        let mut ctx = BlockCtx::new(0, 64);
        let plain = pipeline.run(&mut ctx, head.args(0.25));
        let doubled = pipeline.run_with(&mut ctx, head.args(0.25), |q| q, |k| k, |v| 2.0 * v);
        assert!(ctx.hazards().is_empty());

        let expected: Vec<f32> = plain.o_acc.to_dense().iter().map(|x| 2.0 * x).collect();
        assert_close(&doubled.o_acc.to_dense(), &expected);
        assert_close(&doubled.lse.to_dense(), &plain.lse.to_dense());
    }

    #[test]
    fn q_and_k_functions_fold_into_the_scale() {
        let head = Head::new();
        let pipeline = QrKsVsPipeline::<P>::new().unwrap();
        let mut ctx = BlockCtx::new(0, 64);
        let plain = pipeline.run(&mut ctx, head.args(0.5));
        let folded = pipeline.run_with(&mut ctx, head.args(0.125), |q| 2.0 * q, |k| 2.0 * k, |v| v);
        assert_close(&folded.o_acc.to_dense(), &plain.o_acc.to_dense());
        assert_close(&folded.lse.to_dense(), &plain.lse.to_dense());
    }

    #[test]
    fn uses_the_searched_sequence() {
        let pipeline = QrKsVsPipeline::<P>::new().unwrap();
        assert_eq!(pipeline.lds_sequence(), [0, 1, 0, 2]);
        assert_eq!(pipeline.smem_bytes(), 3 * 32 * 16 * 4);
    }
}
