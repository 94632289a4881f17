use std::{marker::PhantomData, sync::Arc};

use lanetile::{
    block::{BlockCtx, Smem},
    element::Element,
    reduction_ops::{MaxOp, SumOp},
    tiles::{DimOrOne, DistributedTensor, Encoding, TileDistribution},
};
use num_traits::{Float, Zero};

use crate::{
    error::{FmhaError, Result},
    problem::{CombineProblem, FmhaTypes, LseAccWindow, OAccWindow},
};

type Lse<C> = <<C as CombineProblem>::Types as FmhaTypes>::Lse;
type OAcc<C> = <<C as CombineProblem>::Types as FmhaTypes>::OAcc;

/// Inputs of one combine block.
pub struct CombineArgs<'a, C: CombineProblem> {
    lse_acc: LseAccWindow<'a, C>,
    o_acc: Vec<OAccWindow<'a, C>>,
}

impl<'a, C: CombineProblem> CombineArgs<'a, C> {
    /// `lse_acc` is the `MaxSplits × M0` window over the `[num_splits,
    /// seqlen_q]` LSE accumulator, padded with `-inf`. `o_acc` holds one
    /// `M0 × N1` window per split, at most `MaxSplits` of them.
    pub fn new(lse_acc: LseAccWindow<'a, C>, o_acc: Vec<OAccWindow<'a, C>>) -> Result<Self> {
        let max_splits = C::MaxSplits::VALUE;
        if o_acc.len() > max_splits {
            return Err(FmhaError::UnsupportedArgument(format!(
                "{} output splits but the combine block holds at most {max_splits}",
                o_acc.len()
            )));
        }
        Ok(Self { lse_acc, o_acc })
    }
}

pub struct CombineOutput<C: CombineProblem> {
    pub o: DistributedTensor<OAcc<C>>,
    /// Combined LSE per query row.
    pub lse: DistributedTensor<Lse<C>>,
}

/// Merges the per-split outputs of a splitKV forward pass.
///
/// Every split `i` produced `o_i` normalized over its own keys together with
/// `lse_i`. The combined output is `Σ_i exp(lse_i - lse) · o_i` with
/// `lse = log Σ_i exp(lse_i)`. LSE values arrive split-major and are turned
/// row-major through LDS, with rows padded to `M0 + 1` elements.
pub struct SplitKvCombinePipeline<C: CombineProblem> {
    lse_acc_dist: Arc<TileDistribution>,
    lse_dist: Arc<TileDistribution>,
    o_dist: Arc<TileDistribution>,
    _phantom: PhantomData<C>,
}

impl<C: CombineProblem> SplitKvCombinePipeline<C> {
    const M0: usize = C::M0::VALUE;
    const MAX_SPLITS: usize = C::MaxSplits::VALUE;

    pub const LSE_ACC_ENCODING: Encoding =
        Encoding::for_tile(C::MaxSplits::VALUE, C::M0::VALUE, C::BlockSize::VALUE);
    pub const LSE_ENCODING: Encoding =
        Encoding::for_tile(C::M0::VALUE, C::MaxSplits::VALUE, C::BlockSize::VALUE);
    pub const O_ENCODING: Encoding =
        Encoding::for_tile(C::M0::VALUE, C::N1::VALUE, C::BlockSize::VALUE);

    pub fn new() -> Self {
        Self {
            lse_acc_dist: TileDistribution::shared(Self::LSE_ACC_ENCODING),
            lse_dist: TileDistribution::shared(Self::LSE_ENCODING),
            o_dist: TileDistribution::shared(Self::O_ENCODING),
            _phantom: PhantomData,
        }
    }

    fn lds_len() -> usize {
        Self::MAX_SPLITS * (Self::M0 + 1)
    }

    pub fn smem_bytes() -> usize {
        Self::lds_len() * size_of::<Lse<C>>()
    }

    pub fn run(&self, ctx: &mut BlockCtx, args: CombineArgs<'_, C>) -> CombineOutput<C> {
        self.run_with(ctx, args, |x| x, |x| x)
    }

    /// Combine with element functions applied to every LSE and output
    /// accumulator value as it is loaded.
    pub fn run_with(
        &self,
        ctx: &mut BlockCtx,
        args: CombineArgs<'_, C>,
        lse_fn: impl Fn(Lse<C>) -> Lse<C>,
        o_fn: impl Fn(OAcc<C>) -> OAcc<C>,
    ) -> CombineOutput<C> {
        let (m0, max_splits) = (Self::M0, Self::MAX_SPLITS);
        let mut lds = Smem::<Lse<C>>::new(ctx.lds_region(1), Self::lds_len());

        let mut lse_acc = DistributedTensor::load_tile(&args.lse_acc, &self.lse_acc_dist);
        lse_acc.elementwise_inout(|x| *x = lse_fn(*x));

        // Split-major in, row-major out.
        lds.store_tile(ctx, 0, &lse_acc, [m0 + 1, 1]);
        ctx.barrier();
        let lse = lds.load_tile(ctx, 0, &self.lse_dist, [1, m0 + 1]);

        let lse_max = lse.reduce_rows::<MaxOp>();
        let mut lse_sum = lse.clone();
        lse_sum.sweep_rows_with(&lse_max, |_, x, m| *x = (*x - Self::validated(m)).exp());
        let lse_sum = lse_sum.reduce_rows::<SumOp>();

        let mut lse_total = lse_sum;
        lse_total.zip_inout(&lse_max, |sum, m| {
            *sum = if *sum == Lse::<C>::zero() {
                Lse::<C>::neg_infinity()
            } else {
                sum.ln() + Self::validated(m)
            };
        });

        let mut weights = lse;
        weights.sweep_rows_with(&lse_total, |_, x, total| {
            *x = if total == Lse::<C>::neg_infinity() {
                Lse::<C>::zero()
            } else {
                (*x - total).exp()
            };
        });

        // Every lane has read the LSE slot; reuse it for the weights.
        ctx.barrier();
        lds.store_tile(ctx, 0, &weights, [1, m0 + 1]);
        ctx.barrier();
        let w = lds.view(ctx, 0, [m0, max_splits], [1, m0 + 1]);

        let mut o = DistributedTensor::<OAcc<C>>::zeros(&self.o_dist);
        for (i_split, window) in args.o_acc.iter().enumerate() {
            let mut o_split = DistributedTensor::load_tile(window, &self.o_dist);
            o_split.elementwise_inout(|x| *x = o_fn(*x));
            o.sweep(|lane, slot, [r, _], acc| {
                let weight: OAcc<C> = w.get(r, i_split).convert();
                *acc = *acc + weight * o_split.get(lane, slot);
            });
        }

        CombineOutput {
            o,
            lse: lse_total,
        }
    }

    /// A row whose every split saw no key has a `-inf` maximum; shifting by
    /// `0` instead keeps its weights at `0` rather than `NaN`.
    #[inline]
    fn validated(m: Lse<C>) -> Lse<C> {
        if m == Lse::<C>::neg_infinity() {
            Lse::<C>::zero()
        } else {
            m
        }
    }
}

impl<C: CombineProblem> Default for SplitKvCombinePipeline<C> {
    fn default() -> Self {
        Self::new()
    }
}
