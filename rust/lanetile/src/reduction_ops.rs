use crate::{
    block::{block_tile_reduce, block_tile_reduce_sync},
    element::Accum,
    tiles::DistributedTensor,
};

pub trait ReductionOp<F> {
    /// Identity element (e.g., zero for sum)
    fn identity() -> F;
    /// Combine two partial results
    fn combine(a: F, b: F) -> F;
}

#[macro_export]
macro_rules! impl_reduction_ops {
    {
    $(
        $name:ident<$t:ident> {
            identity => $identity:expr;
            combine($a:ident, $b:ident) => $combine:expr;
        }
    )+
    } => {
    $(
        ::paste::paste! {
            #[derive(Clone, Copy, Debug)]
            pub struct [<$name Op>];

            impl<$t: $crate::element::Accum> $crate::reduction_ops::ReductionOp<$t> for [<$name Op>] {
                #[inline]
                fn identity() -> $t {
                    $identity
                }

                #[inline]
                fn combine($a: $t, $b: $t) -> $t {
                    $combine
                }
            }
        }
    )+
    };
}

macro_rules! impl_reduction_convenience_fns {
    {
        for $ty:ident;
        $(
            $name:ident<$t:ident> {
                identity => $identity:expr;
                combine($a:ident, $b:ident) => $combine:expr;
            }
        )+
    }
    => {
        ::paste::paste! {
            $(
                impl<$t: Accum> $ty<$t> {
                    /// Row reduction, synchronized so every owner lane holds the result.
                    pub fn [<$name:snake _rows>](&self) -> $ty<$t> {
                        self.reduce_rows::<[<$name Op>]>()
                    }
                }
            )+
        }
    };
}

macro_rules! with_reduction_ops {
    ($callback:path ; $($($arg:tt)+)?) => {
        $callback! {
            $($($arg)+;)?

            Sum<F> {
                identity => F::zero();
                combine(a, b) => a + b;
            }

            Max<F> {
                identity => F::neg_infinity();
                combine(a, b) => a.max(b);
            }
        }
    };
}

with_reduction_ops!(impl_reduction_ops;);
with_reduction_ops!(impl_reduction_convenience_fns; for DistributedTensor);

impl<F: Accum> DistributedTensor<F> {
    /// `block_tile_reduce` followed by `block_tile_reduce_sync` for `O`.
    pub fn reduce_rows<O: ReductionOp<F>>(&self) -> DistributedTensor<F> {
        let mut reduced = block_tile_reduce(self, O::identity(), O::combine);
        block_tile_reduce_sync(&mut reduced, O::combine);
        reduced
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use rand::SeedableRng;
    use test_case::test_matrix;

    use super::*;
    use crate::{
        test_utils::{random_vec, slices_eq, string_to_seed},
        tiles::{Encoding, TileDistribution},
    };

    #[test_matrix(
        [16, 32],
        [32, 128],
        [32, 64, 128]
    )]
    fn row_reductions_match_scalar(rows: usize, cols: usize, block: usize) {
        let dist: Arc<_> = TileDistribution::shared(Encoding::for_tile(rows, cols, block));
        let mut rng = rand::rngs::StdRng::seed_from_u64(string_to_seed("row_reductions"));
        let vals = random_vec::<f32>(&mut rng, rows * cols, -4.0, 4.0);
        let t = DistributedTensor::from_fn(&dist, |[r, c]| vals[r * cols + c]);

        let sums = t.sum_rows();
        let maxes = t.max_rows();

        let expected_sum: Vec<f32> = vals.chunks(cols).map(|row| row.iter().sum()).collect();
        let expected_max: Vec<f32> = vals
            .chunks(cols)
            .map(|row| row.iter().copied().fold(f32::NEG_INFINITY, f32::max))
            .collect();

        slices_eq(&sums.to_dense(), &expected_sum, "sum_rows");
        assert_eq!(maxes.to_dense(), expected_max);
    }
}
