use std::marker::PhantomData;

use crate::LINE_SIZE;

/// Marker trait for compile-time dimensions, including D1.
///
/// Use `Dim` (which excludes D1) for most cases.
/// Only use `DimOrOne` when D1 is explicitly needed (e.g., the column of a row vector).
pub trait DimOrOne: Copy + std::fmt::Debug + Send + Sync + 'static {
    const VALUE: usize;
}

/// Marker trait for tile dimensions (excludes D1).
/// This is the standard dimension trait - use this for matrix/tile dimensions.
pub trait Dim: DimOrOne {}

/// Dimension equal to LINE_SIZE. Use when a dimension intentionally matches the line size.
pub type DLine = D4;
const _: () = assert!(DLine::VALUE == LINE_SIZE, "DLine must equal LINE_SIZE");

/// Compile-time dimension of 1 (for vectors only, do not use for tiles).
/// Only implements `DimOrOne`, not `Dim`.
#[derive(Clone, Copy, Debug)]
pub struct D1;
impl DimOrOne for D1 {
    const VALUE: usize = 1;
}

macro_rules! dims {
    ($($name:ident = $value:literal),+ $(,)?) => {
        $(
            #[doc = concat!("Compile-time dimension of ", stringify!($value), ".")]
            #[derive(Clone, Copy, Debug)]
            pub struct $name;
            impl DimOrOne for $name {
                const VALUE: usize = $value;
            }
            impl Dim for $name {}
        )+
    };
}

dims!(
    D2 = 2,
    D4 = 4,
    D8 = 8,
    D16 = 16,
    D32 = 32,
    D64 = 64,
    D128 = 128,
    D256 = 256,
    D512 = 512,
);

/// Zero-sized type for carrying dimension info without runtime cost.
pub type DimPhantom<R, C> = PhantomData<(R, C)>;

/// `[R::VALUE, C::VALUE]` for a pair of dimension markers.
pub const fn lengths_of<R: DimOrOne, C: DimOrOne>() -> [usize; 2] {
    [R::VALUE, C::VALUE]
}
