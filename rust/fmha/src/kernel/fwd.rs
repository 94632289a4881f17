use lanetile::{
    block::{BlockCtx, Hazard},
    element::Element,
    tiles::{D1, DimOrOne, TensorView, TileWindow},
};
use rayon::prelude::*;
use tracing::{debug, trace};

use fmha_config::{MaskSpec, VLayout};

use super::{FmhaDims, LaunchReport, check_len, check_seqlen, hazards_to_result, store_chunk, unsupported};
use crate::{
    error::Result,
    mask::FmhaMask,
    pipeline::{FwdArgs, QrKsVsPipeline},
    policy::{DefaultPolicy, FmhaPolicy},
    problem::{
        BiasType, FmhaProblem, FmhaShape, FmhaTraits, KType, LseType, OType, QType, VLayoutKind,
        VType, block_per_cu,
    },
};

/// Inputs of a forward launch, all BHSD.
pub struct FmhaFwdArgs<'a, P: FmhaProblem> {
    pub q: &'a [QType<P>],
    pub k: &'a [KType<P>],
    pub v: &'a [VType<P>],
    pub bias: Option<&'a [BiasType<P>]>,
    pub dims: FmhaDims,
    pub scale: f32,
    pub mask: MaskSpec,
}

impl<P: FmhaProblem> Clone for FmhaFwdArgs<'_, P> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<P: FmhaProblem> Copy for FmhaFwdArgs<'_, P> {}

impl<P: FmhaProblem> FmhaFwdArgs<'_, P> {
    /// Checks shared by the plain and splitKV forward launches.
    pub(super) fn check(&self) -> Result<()> {
        let shape_m0 = <P::Shape as FmhaShape>::M0::VALUE;
        let shape_n0 = <P::Shape as FmhaShape>::N0::VALUE;
        let shape_hdim_q = <P::Shape as FmhaShape>::K0BlockLength::VALUE;
        let shape_hdim_v = <P::Shape as FmhaShape>::N1::VALUE;
        let d = &self.dims;

        if d.batch == 0 || d.nhead == 0 || d.seqlen_q == 0 {
            return Err(unsupported(format!(
                "empty problem: batch={}, nhead={}, seqlen_q={}",
                d.batch, d.nhead, d.seqlen_q
            )));
        }
        if d.hdim_q != shape_hdim_q {
            return Err(unsupported(format!(
                "hdim_q={} but the kernel is built for {shape_hdim_q}",
                d.hdim_q
            )));
        }
        if d.hdim_v != shape_hdim_v {
            return Err(unsupported(format!(
                "hdim_v={} but the kernel is built for {shape_hdim_v}",
                d.hdim_v
            )));
        }
        check_seqlen(
            "seqlen_q",
            d.seqlen_q,
            shape_m0,
            <P::Traits as FmhaTraits>::PAD_SEQLEN_Q,
        )?;
        check_seqlen(
            "seqlen_k",
            d.seqlen_k,
            shape_n0,
            <P::Traits as FmhaTraits>::PAD_SEQLEN_K,
        )?;

        match (self.bias, <P::Traits as FmhaTraits>::HAS_BIAS) {
            (Some(bias), true) => check_len("bias", bias.len(), d.bias_len())?,
            (None, false) => {}
            (Some(_), false) => return Err(unsupported("bias given to a kernel without bias")),
            (None, true) => return Err(unsupported("kernel expects a bias tensor")),
        }
        if self.mask.is_masking() && !<P::Traits as FmhaTraits>::IS_MASKING {
            return Err(unsupported(format!(
                "mask '{}' given to a kernel without masking",
                self.mask
            )));
        }
        // A non-positive scale turns the row maximum into a minimum.
        if !(self.scale.is_finite() && self.scale > 0.0) {
            return Err(unsupported(format!("scale={} must be positive and finite", self.scale)));
        }

        check_len("q", self.q.len(), d.q_len())?;
        check_len("k", self.k.len(), d.k_len())?;
        check_len("v", self.v.len(), d.v_len())
    }
}

/// Views of one `(batch, head)` slice of the forward inputs.
pub(super) struct HeadViews<'a, P: FmhaProblem> {
    q: TensorView<'a, QType<P>>,
    k: TensorView<'a, KType<P>>,
    /// `[hdim_v, seqlen_k]` whatever the memory layout.
    v: TensorView<'a, VType<P>>,
    bias: Option<TensorView<'a, BiasType<P>>>,
    seqlen_k: usize,
}

impl<'a, P: FmhaProblem> HeadViews<'a, P> {
    pub(super) fn new(args: &FmhaFwdArgs<'a, P>, i_bh: usize) -> Self {
        let FmhaDims {
            seqlen_q: sq,
            seqlen_k: sk,
            hdim_q: dq,
            hdim_v: dv,
            ..
        } = args.dims;

        let v_head = &args.v[i_bh * sk * dv..][..sk * dv];
        let v = match P::VLayout::LAYOUT {
            VLayout::RowMajor => TensorView::new(v_head, [sk, dv]).transposed(),
            VLayout::ColMajor => TensorView::new(v_head, [dv, sk]),
        };
        Self {
            q: TensorView::new(&args.q[i_bh * sq * dq..][..sq * dq], [sq, dq]),
            k: TensorView::new(&args.k[i_bh * sk * dq..][..sk * dq], [sk, dq]),
            v,
            bias: args
                .bias
                .map(|bias| TensorView::new(&bias[i_bh * sq * sk..][..sq * sk], [sq, sk])),
            seqlen_k: sk,
        }
    }

    /// Windows for the query tile at `row0` starting at key `key_start`.
    pub(super) fn fwd_args(
        &self,
        row0: usize,
        key_start: usize,
        num_total_loop: usize,
        mask: FmhaMask,
        scale: f32,
    ) -> FwdArgs<'a, P> {
        FwdArgs {
            q: TileWindow::new(self.q, [row0, 0]),
            k: TileWindow::new(self.k, [key_start, 0]),
            v: TileWindow::new(self.v, [0, key_start]),
            bias: self.bias.map(|bias| TileWindow::new(bias, [row0, key_start])),
            mask,
            seqlen_k: self.seqlen_k,
            scale,
            num_total_loop,
        }
    }
}

/// Forward attention, one block per `(batch, head, query tile)`.
pub struct FmhaFwdKernel<P: FmhaProblem, Pol: FmhaPolicy<P> = DefaultPolicy> {
    pipeline: QrKsVsPipeline<P, Pol>,
}

impl<P: FmhaProblem, Pol: FmhaPolicy<P>> FmhaFwdKernel<P, Pol> {
    const M0: usize = <P::Shape as FmhaShape>::M0::VALUE;
    const N0: usize = <P::Shape as FmhaShape>::N0::VALUE;
    const BLOCK_SIZE: usize = <P::Shape as FmhaShape>::BlockSize::VALUE;

    pub fn new() -> Result<Self> {
        Ok(Self {
            pipeline: QrKsVsPipeline::new()?,
        })
    }

    pub fn pipeline(&self) -> &QrKsVsPipeline<P, Pol> {
        &self.pipeline
    }

    pub fn grid_size(dims: &FmhaDims) -> usize {
        dims.heads() * dims.seqlen_q.div_ceil(Self::M0)
    }

    pub fn is_supported_argument(
        &self,
        args: &FmhaFwdArgs<'_, P>,
        o: &[OType<P>],
        lse: Option<&[LseType<P>]>,
    ) -> Result<()> {
        args.check()?;
        check_len("o", o.len(), args.dims.o_len())?;
        match (lse, <P::Traits as FmhaTraits>::STORE_LSE) {
            (Some(lse), true) => check_len("lse", lse.len(), args.dims.lse_len()),
            (None, false) => Ok(()),
            (Some(_), false) => Err(unsupported("lse buffer given to a kernel that does not store it")),
            (None, true) => Err(unsupported("kernel stores LSE but no lse buffer was given")),
        }
    }

    /// Runs the whole grid, writing `o` and, when the problem stores it, the
    /// natural-log `lse` of every query row.
    pub fn launch(
        &self,
        args: &FmhaFwdArgs<'_, P>,
        o: &mut [OType<P>],
        lse: Option<&mut [LseType<P>]>,
    ) -> Result<LaunchReport> {
        self.is_supported_argument(args, o, lse.as_deref())?;

        let dims = args.dims;
        let (m0, sq, dv) = (Self::M0, dims.seqlen_q, dims.hdim_v);
        let tiles_m = sq.div_ceil(m0);
        let report = LaunchReport {
            grid: Self::grid_size(&dims),
            block_size: Self::BLOCK_SIZE,
            smem_bytes: self.pipeline.smem_bytes(),
            block_per_cu: block_per_cu::<P>(),
        };
        debug!(
            kernel = "fmha_fwd",
            grid = report.grid,
            block_size = report.block_size,
            smem_bytes = report.smem_bytes,
            ?dims,
            mask = %args.mask,
            "launch"
        );

        let o_chunks: Vec<&mut [OType<P>]> = o
            .chunks_mut(sq * dv)
            .flat_map(|head| head.chunks_mut(m0 * dv))
            .collect();
        let lse_chunks: Vec<Option<&mut [LseType<P>]>> = match lse {
            Some(lse) => lse
                .chunks_mut(sq)
                .flat_map(|head| head.chunks_mut(m0))
                .map(Some)
                .collect(),
            None => (0..report.grid).map(|_| None).collect(),
        };
        debug_assert_eq!(o_chunks.len(), report.grid);

        let mask = FmhaMask::new(args.mask, sq, dims.seqlen_k);
        let hazards: Vec<Hazard> = o_chunks
            .into_par_iter()
            .zip(lse_chunks)
            .enumerate()
            .flat_map_iter(|(block, (o_chunk, lse_chunk))| {
                let (i_bh, row0) = (block / tiles_m, block % tiles_m * m0);
                let (key_start, num_tiles) = mask.key_tiles(row0, m0, Self::N0);
                let views = HeadViews::new(args, i_bh);

                let mut ctx = BlockCtx::new(block, Self::BLOCK_SIZE);
                let out = self.pipeline.run(
                    &mut ctx,
                    views.fwd_args(row0, key_start, num_tiles, mask, args.scale),
                );

                let o_tile = out.o_acc.map(|x| x.convert::<OType<P>>());
                store_chunk::<_, <P::Shape as FmhaShape>::M0, <P::Shape as FmhaShape>::N1>(
                    &o_tile, o_chunk, dv,
                );
                if let Some(lse_chunk) = lse_chunk {
                    store_chunk::<_, <P::Shape as FmhaShape>::M0, D1>(&out.lse, lse_chunk, 1);
                }
                trace!(block, i_bh, row0, key_start, num_tiles, "fwd block");
                ctx.take_hazards()
            })
            .collect();

        hazards_to_result(hazards)?;
        Ok(report)
    }
}
