//! Plain f64 attention used to check the kernels.

use lanetile::element::Element;
use rayon::prelude::*;

use fmha_config::{MaskSpec, VLayout};

use crate::{kernel::FmhaDims, mask::FmhaMask};

pub struct ReferenceOutput {
    /// `[batch, nhead, seqlen_q, hdim_v]`
    pub o: Vec<f64>,
    /// Natural-log LSE, `[batch, nhead, seqlen_q]`.
    pub lse: Vec<f64>,
}

/// `softmax(scale · Q·Kᵀ + bias) · V` row by row in f64.
///
/// Masked positions are dropped from the softmax. A row with every key
/// masked produces zeros and an LSE of `-inf`.
#[allow(clippy::too_many_arguments)]
pub fn attention<T: Element>(
    q: &[T],
    k: &[T],
    v: &[T],
    bias: Option<&[T]>,
    dims: &FmhaDims,
    v_layout: VLayout,
    scale: f64,
    mask: MaskSpec,
) -> ReferenceOutput {
    let FmhaDims {
        seqlen_q: sq,
        seqlen_k: sk,
        hdim_q: dq,
        hdim_v: dv,
        ..
    } = *dims;
    let mask = FmhaMask::new(mask, sq, sk);
    let v_at = |i_bh: usize, j: usize, d: usize| match v_layout {
        VLayout::RowMajor => v[(i_bh * sk + j) * dv + d],
        VLayout::ColMajor => v[(i_bh * dv + d) * sk + j],
    };

    let mut o = vec![0.0; dims.o_len()];
    let mut lse = vec![f64::NEG_INFINITY; dims.lse_len()];
    o.par_chunks_mut(dv)
        .zip(lse.par_iter_mut())
        .enumerate()
        .for_each(|(row, (o_row, lse_row))| {
            let (i_bh, i) = (row / sq, row % sq);
            let q_row = &q[row * dq..][..dq];

            let s: Vec<f64> = (0..sk)
                .map(|j| {
                    if mask.is_masked(i, j) {
                        return f64::NEG_INFINITY;
                    }
                    let k_row = &k[(i_bh * sk + j) * dq..][..dq];
                    let dot: f64 = q_row
                        .iter()
                        .zip(k_row)
                        .map(|(a, b)| a.into_f64() * b.into_f64())
                        .sum();
                    let b = bias.map_or(0.0, |bias| bias[row * sk + j].into_f64());
                    dot * scale + b
                })
                .collect();

            let m = s.iter().copied().fold(f64::NEG_INFINITY, f64::max);
            if m == f64::NEG_INFINITY {
                return;
            }
            let p: Vec<f64> = s.iter().map(|x| (x - m).exp()).collect();
            let l: f64 = p.iter().sum();
            for (d, out) in o_row.iter_mut().enumerate() {
                let acc: f64 = p.iter().enumerate().map(|(j, p)| p * v_at(i_bh, j, d).into_f64()).sum();
                *out = acc / l;
            }
            *lse_row = m + l.ln();
        });

    ReferenceOutput { o, lse }
}
