use lanetile::{
    block::{BlockCtx, Hazard},
    tiles::{D1, DimOrOne},
};
use rayon::prelude::*;
use tracing::{debug, trace};

use super::{
    FmhaDims, FmhaFwdArgs, LaunchReport, check_len, fwd::HeadViews, hazards_to_result,
    store_chunk, unsupported,
};
use crate::{
    error::Result,
    mask::FmhaMask,
    pipeline::QrKsVsPipeline,
    policy::{DefaultPolicy, FmhaPolicy},
    problem::{FmhaProblem, FmhaShape, LseType, OAccType, block_per_cu},
};

/// Most splits one splitKV launch accepts.
pub const MAX_SPLITS: usize = 128;

pub struct FmhaFwdSplitKvArgs<'a, P: FmhaProblem> {
    pub fwd: FmhaFwdArgs<'a, P>,
    pub num_splits: usize,
}

/// First key tile and tile count of split `i_split` out of `num_tiles`.
///
/// Tiles are dealt in contiguous runs of `ceil(num_tiles / num_splits)`;
/// trailing splits may be empty.
pub(super) fn split_range(num_tiles: usize, num_splits: usize, i_split: usize) -> (usize, usize) {
    let per_split = num_tiles.div_ceil(num_splits);
    let first = (i_split * per_split).min(num_tiles);
    let last = (first + per_split).min(num_tiles);
    (first, last - first)
}

/// Forward attention over disjoint key ranges, one block per
/// `(batch, head, split, query tile)`.
///
/// Every split writes its output normalized over its own keys, in the
/// accumulator type, together with its natural-log LSE. Empty splits write
/// zeros and `-inf`. The partials are merged by
/// [`FmhaCombineKernel`](super::FmhaCombineKernel).
pub struct FmhaFwdSplitKvKernel<P: FmhaProblem, Pol: FmhaPolicy<P> = DefaultPolicy> {
    pipeline: QrKsVsPipeline<P, Pol>,
}

impl<P: FmhaProblem, Pol: FmhaPolicy<P>> FmhaFwdSplitKvKernel<P, Pol> {
    const M0: usize = <P::Shape as FmhaShape>::M0::VALUE;
    const N0: usize = <P::Shape as FmhaShape>::N0::VALUE;
    const BLOCK_SIZE: usize = <P::Shape as FmhaShape>::BlockSize::VALUE;

    pub fn new() -> Result<Self> {
        Ok(Self {
            pipeline: QrKsVsPipeline::new()?,
        })
    }

    pub fn grid_size(dims: &FmhaDims, num_splits: usize) -> usize {
        dims.heads() * num_splits * dims.seqlen_q.div_ceil(Self::M0)
    }

    pub fn is_supported_argument(
        &self,
        args: &FmhaFwdSplitKvArgs<'_, P>,
        o_acc: &[OAccType<P>],
        lse_acc: &[LseType<P>],
    ) -> Result<()> {
        args.fwd.check()?;
        if !(1..=MAX_SPLITS).contains(&args.num_splits) {
            return Err(unsupported(format!(
                "num_splits={} outside 1..={MAX_SPLITS}",
                args.num_splits
            )));
        }
        let dims = &args.fwd.dims;
        check_len("o_acc", o_acc.len(), dims.o_acc_len(args.num_splits))?;
        check_len("lse_acc", lse_acc.len(), dims.lse_acc_len(args.num_splits))
    }

    pub fn launch(
        &self,
        args: &FmhaFwdSplitKvArgs<'_, P>,
        o_acc: &mut [OAccType<P>],
        lse_acc: &mut [LseType<P>],
    ) -> Result<LaunchReport> {
        self.is_supported_argument(args, o_acc, lse_acc)?;

        let fwd = &args.fwd;
        let dims = fwd.dims;
        let (m0, sq, dv) = (Self::M0, dims.seqlen_q, dims.hdim_v);
        let num_splits = args.num_splits;
        let tiles_m = sq.div_ceil(m0);
        let report = LaunchReport {
            grid: Self::grid_size(&dims, num_splits),
            block_size: Self::BLOCK_SIZE,
            smem_bytes: self.pipeline.smem_bytes(),
            block_per_cu: block_per_cu::<P>(),
        };
        debug!(
            kernel = "fmha_fwd_splitkv",
            grid = report.grid,
            num_splits,
            ?dims,
            mask = %fwd.mask,
            "launch"
        );

        // [b, h, split, sq, dv] and [b, h, split, sq]: one chunk per block
        let o_chunks: Vec<&mut [OAccType<P>]> = o_acc
            .chunks_mut(sq * dv)
            .flat_map(|split| split.chunks_mut(m0 * dv))
            .collect();
        let lse_chunks: Vec<&mut [LseType<P>]> = lse_acc
            .chunks_mut(sq)
            .flat_map(|split| split.chunks_mut(m0))
            .collect();
        debug_assert_eq!(o_chunks.len(), report.grid);

        let mask = FmhaMask::new(fwd.mask, sq, dims.seqlen_k);
        let hazards: Vec<Hazard> = o_chunks
            .into_par_iter()
            .zip(lse_chunks)
            .enumerate()
            .flat_map_iter(|(block, (o_chunk, lse_chunk))| {
                let i_m = block % tiles_m;
                let i_split = block / tiles_m % num_splits;
                let i_bh = block / tiles_m / num_splits;
                let row0 = i_m * m0;

                let (key_start, num_tiles) = mask.key_tiles(row0, m0, Self::N0);
                let (first, count) = split_range(num_tiles, num_splits, i_split);
                let views = HeadViews::new(fwd, i_bh);

                let mut ctx = BlockCtx::new(block, Self::BLOCK_SIZE);
                let out = self.pipeline.run(
                    &mut ctx,
                    views.fwd_args(row0, key_start + first * Self::N0, count, mask, fwd.scale),
                );

                store_chunk::<_, <P::Shape as FmhaShape>::M0, <P::Shape as FmhaShape>::N1>(
                    &out.o_acc, o_chunk, dv,
                );
                store_chunk::<_, <P::Shape as FmhaShape>::M0, D1>(&out.lse, lse_chunk, 1);
                trace!(block, i_bh, i_split, row0, first, count, "splitkv block");
                ctx.take_hazards()
            })
            .collect();

        hazards_to_result(hazards)?;
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use test_case::test_case;

    use super::*;

    #[test_case(8, 1, &[(0, 8)] ; "single split")]
    #[test_case(8, 4, &[(0, 2), (2, 2), (4, 2), (6, 2)] ; "even")]
    #[test_case(7, 3, &[(0, 3), (3, 3), (6, 1)] ; "ragged tail")]
    #[test_case(2, 4, &[(0, 1), (1, 1), (2, 0), (2, 0)] ; "more splits than tiles")]
    #[test_case(0, 2, &[(0, 0), (0, 0)] ; "no tiles")]
    fn splits_cover_the_tiles_once(num_tiles: usize, num_splits: usize, expected: &[(usize, usize)]) {
        let ranges: Vec<_> = (0..num_splits)
            .map(|i| split_range(num_tiles, num_splits, i))
            .collect();
        assert_eq!(ranges, expected);
        assert_eq!(ranges.iter().map(|&(_, n)| n).sum::<usize>(), num_tiles);
    }
}
