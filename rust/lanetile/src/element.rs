//! Storage and arithmetic element traits.

use std::fmt::{Debug, Display};

use half::{bf16, f16};
use num_traits::Float;

/// A value that can live in a tensor view, a staging slot, or a register tile.
///
/// Conversions go through `f64`, which is exact for every implementor.
/// Method names avoid `num_traits` so `Accum` code never needs disambiguation.
pub trait Element: Copy + Default + Debug + Display + PartialOrd + Send + Sync + 'static {
    /// Short name used in logs and reports.
    const NAME: &'static str;

    fn into_f64(self) -> f64;
    fn from_f64(v: f64) -> Self;

    #[inline]
    fn convert<U: Element>(self) -> U {
        U::from_f64(self.into_f64())
    }

    fn neg_inf() -> Self {
        Self::from_f64(f64::NEG_INFINITY)
    }
}

/// Element type arithmetic is carried out in (scores, softmax state, accumulators).
pub trait Accum: Element + Float {}

impl Accum for f32 {}
impl Accum for f64 {}

macro_rules! impl_element {
    ($($ty:ty => $name:literal, |$a:ident| $to:expr, |$b:ident| $from:expr;)+) => {
        $(
            impl Element for $ty {
                const NAME: &'static str = $name;

                #[inline]
                fn into_f64(self) -> f64 {
                    let $a = self;
                    $to
                }

                #[inline]
                fn from_f64(v: f64) -> Self {
                    let $b = v;
                    $from
                }
            }
        )+
    };
}

impl_element! {
    f64 => "fp64", |x| x, |v| v;
    f32 => "fp32", |x| x as f64, |v| v as f32;
    f16 => "fp16", |x| x.to_f64(), |v| f16::from_f64(v);
    bf16 => "bf16", |x| x.to_f64(), |v| bf16::from_f64(v);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn half_conversions_round_trip_through_f64() {
        let x = f16::from_f32(0.125);
        let y: f32 = x.convert();
        assert_eq!(y, 0.125);
        assert_eq!(bf16::from_f64(2.0).convert::<f64>(), 2.0);
    }

    #[test]
    fn neg_infinity_survives_narrowing() {
        assert_eq!(f16::neg_inf().into_f64(), f64::NEG_INFINITY);
        assert_eq!(bf16::neg_inf().into_f64(), f64::NEG_INFINITY);
        assert_eq!(f32::neg_inf(), f32::NEG_INFINITY);
    }
}
