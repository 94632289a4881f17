//! Online softmax state carried across key tiles.
//!
//! Per query row the state is the running max `m` and running sum `l` of the
//! exponentials seen so far. After key tiles `0..j`:
//!
//! ```text
//! m_j = max(m_{j-1}, rowmax(s_j))
//! l_j = exp(m_{j-1} - m_j) * l_{j-1} + rowsum(exp(s_j - m_j))
//! o_j = exp(m_{j-1} - m_j) * o_{j-1} + exp(s_j - m_j) · V_j
//! ```
//!
//! so `o_j / l_j` is softmax attention over every key seen. Under `FAST_EXP2`
//! the same recurrence runs in base 2 with `log2(e)` folded into the scale.

use std::{marker::PhantomData, sync::Arc};

use lanetile::{
    element::{Accum, Element},
    tiles::{DistributedTensor, TileDistribution},
};

use crate::problem::FmhaTraits;

/// Row state of one query tile. `S` is the softmax compute type.
#[derive(Clone, Debug)]
pub struct OnlineSoftmax<S, F> {
    m: DistributedTensor<S>,
    l: DistributedTensor<S>,
    scale: S,
    /// `scale` in the exponent's base: `scale * log2(e)` under `FAST_EXP2`.
    scale_s: S,
    _traits: PhantomData<F>,
}

impl<S: Accum, F: FmhaTraits> OnlineSoftmax<S, F> {
    /// `-inf` rows that stay empty are reported as `0` output and `-inf` LSE
    /// instead of NaN.
    pub const VALIDATE_MAX: bool = F::HAS_BIAS || F::IS_MASKING || F::PAD_SEQLEN_K;

    pub fn new(rows: &Arc<TileDistribution>, scale: f32) -> Self {
        let scale = S::from_f64(scale as f64);
        let scale_s = if F::FAST_EXP2 {
            scale * S::from_f64(std::f64::consts::LOG2_E)
        } else {
            scale
        };
        Self {
            m: DistributedTensor::filled(rows, S::neg_infinity()),
            l: DistributedTensor::zeros(rows),
            scale,
            scale_s,
            _traits: PhantomData,
        }
    }

    pub fn max(&self) -> &DistributedTensor<S> {
        &self.m
    }

    pub fn sum(&self) -> &DistributedTensor<S> {
        &self.l
    }

    #[inline]
    fn exp(x: S) -> S {
        if F::FAST_EXP2 { x.exp2() } else { x.exp() }
    }

    #[inline]
    fn validated(m: S) -> S {
        if Self::VALIDATE_MAX && m == S::neg_infinity() {
            S::zero()
        } else {
            m
        }
    }

    /// Bring raw `q·kᵀ` scores into the domain the row max is taken in.
    ///
    /// Without bias and with `FAST_EXP2` the scale is deferred into the
    /// exponent, so the scores are left raw.
    pub fn scale_scores(&self, s: &mut DistributedTensor<S>, bias: Option<&DistributedTensor<S>>) {
        match bias {
            Some(bias) if F::FAST_EXP2 => {
                let log2e = S::from_f64(std::f64::consts::LOG2_E);
                s.zip_inout(bias, |x, b| *x = self.scale_s * *x + log2e * b);
            }
            Some(bias) => s.zip_inout(bias, |x, b| *x = self.scale * *x + b),
            None if F::FAST_EXP2 => {}
            None => s.mul_scalar(self.scale),
        }
    }

    /// Exponent of `s - m` in the active base.
    #[inline]
    fn exp_shifted(&self, s: S, m: S) -> S {
        if F::FAST_EXP2 && !F::HAS_BIAS {
            Self::exp(self.scale_s * s - self.scale_s * m)
        } else {
            Self::exp(s - m)
        }
    }

    /// Fold a scaled (and masked) score tile into the row state.
    ///
    /// Returns `p = exp(s - m_new)` on the score distribution and, per row,
    /// the factor `exp(m_old - m_new)` the output accumulator must be
    /// rescaled by before `p · V` is added to it.
    pub fn update(
        &mut self,
        s: &DistributedTensor<S>,
    ) -> (DistributedTensor<S>, DistributedTensor<S>) {
        let m_local = s.max_rows();
        let m_old = self.m.clone();
        self.m.max(&m_local);

        let mut p = s.clone();
        p.sweep_rows_with(&self.m, |_, x, m| *x = self.exp_shifted(*x, Self::validated(m)));

        let mut rescale = m_old;
        rescale.zip_inout(&self.m, |old, m| *old = self.exp_shifted(*old, Self::validated(m)));

        let row_sum = p.sum_rows();
        self.l.mul(&rescale);
        self.l.add(&row_sum);
        (p, rescale)
    }

    /// `o_acc *= 1 / l` per row.
    pub fn finalize<O: Accum>(&self, o_acc: &mut DistributedTensor<O>) {
        o_acc.sweep_rows_with(&self.l, |_, o, l| {
            let inv = if Self::VALIDATE_MAX && l == S::zero() {
                S::zero()
            } else {
                S::one() / l
            };
            *o = *o * inv.convert::<O>();
        });
    }

    /// Natural-log log-sum-exp of every row seen so far, `-inf` for rows that
    /// saw no unmasked key.
    pub fn lse<L: Element>(&self) -> DistributedTensor<L> {
        let mut lse = self.m.clone();
        lse.zip_inout(&self.l, |m, l| {
            let m_nat = if !F::FAST_EXP2 {
                *m
            } else if F::HAS_BIAS {
                *m * S::from_f64(std::f64::consts::LN_2)
            } else {
                *m * self.scale
            };
            *m = m_nat + l.ln();
        });
        lse.map(|x| x.convert())
    }
}
