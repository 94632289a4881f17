use lanetile::{
    block::{BlockCtx, Hazard},
    element::Element,
    tiles::{D1, DimOrOne, TensorView, TileWindow},
};
use num_traits::Float;
use rayon::prelude::*;
use tracing::{debug, trace};

use super::{FmhaDims, LaunchReport, check_len, check_seqlen, hazards_to_result, store_chunk, unsupported};
use crate::{
    error::Result,
    pipeline::{CombineArgs, SplitKvCombinePipeline},
    problem::{CombineProblem, FmhaTraits, FmhaTypes},
};

type Lse<C> = <<C as CombineProblem>::Types as FmhaTypes>::Lse;
type OAcc<C> = <<C as CombineProblem>::Types as FmhaTypes>::OAcc;
type O<C> = <<C as CombineProblem>::Types as FmhaTypes>::O;

/// Partial results of a splitKV forward launch.
pub struct FmhaCombineArgs<'a, C: CombineProblem> {
    /// `[batch, nhead, num_splits, seqlen_q]`
    pub lse_acc: &'a [Lse<C>],
    /// `[batch, nhead, num_splits, seqlen_q, hdim_v]`
    pub o_acc: &'a [OAcc<C>],
    pub dims: FmhaDims,
    pub num_splits: usize,
}

/// Merges splitKV partials, one block per `(batch, head, query tile)`.
pub struct FmhaCombineKernel<C: CombineProblem> {
    pipeline: SplitKvCombinePipeline<C>,
}

impl<C: CombineProblem> FmhaCombineKernel<C> {
    const M0: usize = C::M0::VALUE;
    const N1: usize = C::N1::VALUE;
    const MAX_SPLITS: usize = C::MaxSplits::VALUE;
    const BLOCK_SIZE: usize = C::BlockSize::VALUE;

    pub fn new() -> Self {
        Self {
            pipeline: SplitKvCombinePipeline::new(),
        }
    }

    pub fn grid_size(dims: &FmhaDims) -> usize {
        dims.heads() * dims.seqlen_q.div_ceil(Self::M0)
    }

    pub fn is_supported_argument(
        &self,
        args: &FmhaCombineArgs<'_, C>,
        o: &[O<C>],
        lse: Option<&[Lse<C>]>,
    ) -> Result<()> {
        let d = &args.dims;
        if d.batch == 0 || d.nhead == 0 || d.seqlen_q == 0 {
            return Err(unsupported(format!(
                "empty problem: batch={}, nhead={}, seqlen_q={}",
                d.batch, d.nhead, d.seqlen_q
            )));
        }
        if !(1..=Self::MAX_SPLITS).contains(&args.num_splits) {
            return Err(unsupported(format!(
                "num_splits={} outside 1..={}",
                args.num_splits,
                Self::MAX_SPLITS
            )));
        }
        if d.hdim_v != Self::N1 {
            return Err(unsupported(format!(
                "hdim_v={} but the kernel is built for {}",
                d.hdim_v,
                Self::N1
            )));
        }
        check_seqlen(
            "seqlen_q",
            d.seqlen_q,
            Self::M0,
            <C::Traits as FmhaTraits>::PAD_SEQLEN_Q,
        )?;
        check_len("lse_acc", args.lse_acc.len(), d.lse_acc_len(args.num_splits))?;
        check_len("o_acc", args.o_acc.len(), d.o_acc_len(args.num_splits))?;
        check_len("o", o.len(), d.o_len())?;
        match (lse, <C::Traits as FmhaTraits>::STORE_LSE) {
            (Some(lse), true) => check_len("lse", lse.len(), d.lse_len()),
            (None, false) => Ok(()),
            (Some(_), false) => Err(unsupported("lse buffer given to a kernel that does not store it")),
            (None, true) => Err(unsupported("kernel stores LSE but no lse buffer was given")),
        }
    }

    pub fn launch(
        &self,
        args: &FmhaCombineArgs<'_, C>,
        o: &mut [O<C>],
        lse: Option<&mut [Lse<C>]>,
    ) -> Result<LaunchReport> {
        self.is_supported_argument(args, o, lse.as_deref())?;

        let dims = args.dims;
        let (m0, sq, dv) = (Self::M0, dims.seqlen_q, dims.hdim_v);
        let num_splits = args.num_splits;
        let tiles_m = sq.div_ceil(m0);
        let report = LaunchReport {
            grid: Self::grid_size(&dims),
            block_size: Self::BLOCK_SIZE,
            smem_bytes: SplitKvCombinePipeline::<C>::smem_bytes(),
            block_per_cu: match <C::Traits as FmhaTraits>::BLOCK_PER_CU {
                n if n > 0 => n as usize,
                _ => 1,
            },
        };
        debug!(kernel = "fmha_combine", grid = report.grid, num_splits, ?dims, "launch");

        let o_chunks: Vec<&mut [O<C>]> = o
            .chunks_mut(sq * dv)
            .flat_map(|head| head.chunks_mut(m0 * dv))
            .collect();
        let lse_chunks: Vec<Option<&mut [Lse<C>]>> = match lse {
            Some(lse) => lse
                .chunks_mut(sq)
                .flat_map(|head| head.chunks_mut(m0))
                .map(Some)
                .collect(),
            None => (0..report.grid).map(|_| None).collect(),
        };

        let hazards: Vec<Vec<Hazard>> = o_chunks
            .into_par_iter()
            .zip(lse_chunks)
            .enumerate()
            .map(|(block, (o_chunk, lse_chunk))| -> Result<Vec<Hazard>> {
                let (i_bh, row0) = (block / tiles_m, block % tiles_m * m0);

                // Splits past `num_splits` read as -inf and weigh nothing.
                let lse_head = &args.lse_acc[i_bh * num_splits * sq..][..num_splits * sq];
                let lse_view =
                    TensorView::new(lse_head, [num_splits, sq]).with_pad(Lse::<C>::neg_infinity());
                let o_acc = (0..num_splits)
                    .map(|i_split| {
                        let split = &args.o_acc[(i_bh * num_splits + i_split) * sq * dv..][..sq * dv];
                        TileWindow::new(TensorView::new(split, [sq, dv]), [row0, 0])
                    })
                    .collect();
                let combine_args = CombineArgs::new(TileWindow::new(lse_view, [0, row0]), o_acc)?;

                let mut ctx = BlockCtx::new(block, Self::BLOCK_SIZE);
                let out = self.pipeline.run(&mut ctx, combine_args);

                let o_tile = out.o.map(|x| x.convert::<O<C>>());
                store_chunk::<_, C::M0, C::N1>(&o_tile, o_chunk, dv);
                if let Some(lse_chunk) = lse_chunk {
                    store_chunk::<_, C::M0, D1>(&out.lse, lse_chunk, 1);
                }
                trace!(block, i_bh, row0, "combine block");
                Ok(ctx.take_hazards())
            })
            .collect::<Result<_>>()?;

        hazards_to_result(hazards.into_iter().flatten().collect())?;
        Ok(report)
    }
}

impl<C: CombineProblem> Default for FmhaCombineKernel<C> {
    fn default() -> Self {
        Self::new()
    }
}
