use crate::{
    element::{Accum, Element},
    tiles::{DistributedTensor, TensorView, TileSlice},
};

/// Block-wide tile matrix multiply-accumulate.
pub trait BlockGemm: Send + Sync + 'static {
    /// `c[M×N] += a[M×K] · b[N×K]ᵀ`, with `b_fn` applied to each `b` element
    /// as it is consumed.
    fn run<A: Element, B: Element, C: Accum>(
        &self,
        c: &mut DistributedTensor<C>,
        a: TileSlice<'_, A>,
        b: TensorView<'_, B>,
        b_fn: impl Fn(B) -> B,
    );
}

/// `A · Bᵀ` with A from registers and B from a staging buffer, accumulating
/// in `C`. Each lane computes the C elements it owns.
#[derive(Clone, Copy, Debug, Default)]
pub struct BlockGemmABt;

impl BlockGemm for BlockGemmABt {
    fn run<A: Element, B: Element, C: Accum>(
        &self,
        c: &mut DistributedTensor<C>,
        a: TileSlice<'_, A>,
        b: TensorView<'_, B>,
        b_fn: impl Fn(B) -> B,
    ) {
        let [m, k] = a.lengths();
        let [n, kb] = b.lengths();
        debug_assert_eq!(k, kb, "reduction extents differ");
        debug_assert_eq!(c.lengths(), [m, n], "C tile does not match A and B");

        // A fragments are exchanged once per call; each lane then walks its own C slots.
        let a_rows: Vec<C> = (0..m * k).map(|i| a.at(i / k, i % k).convert()).collect();
        let b_rows: Vec<C> = (0..n * k)
            .map(|i| b_fn(b.get(i / k, i % k)).convert())
            .collect();

        c.sweep(|_, _, [r, col], acc| {
            let a_row = &a_rows[r * k..(r + 1) * k];
            let b_row = &b_rows[col * k..(col + 1) * k];
            *acc = a_row
                .iter()
                .zip(b_row)
                .fold(*acc, |sum, (&x, &y)| sum + x * y);
        });
    }
}
