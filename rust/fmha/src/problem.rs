//! Compile-time problem descriptors: tile shape, element types, feature flags
//! and V layout.
//!
//! A problem is a zero-sized type; pipelines and kernels are monomorphized
//! over it, so every tile extent is a constant and a wrong-shaped window is a
//! type error.

#![allow(type_alias_bounds)]

use std::marker::PhantomData;

use fmha_config::VLayout;
use lanetile::{
    element::{Accum, Element},
    tiles::{Dim, DimOrOne, TileWindow, TileWindowMut},
};

/// Static block tile shape.
///
/// - `M0`: query rows per block
/// - `N0`: keys per outer iteration
/// - `K0`: head-dim slice per QK GEMM step
/// - `N1`: output head-dim columns
/// - `K1`: keys per KV GEMM step
/// - `K0BlockLength`: full query/key head dim, loaded once
pub trait FmhaShape: Send + Sync + 'static {
    type M0: Dim;
    type N0: Dim;
    type K0: Dim;
    type N1: Dim;
    type K1: Dim;
    type K0BlockLength: Dim;
    type BlockSize: Dim;

    const K0_LOOPS: usize = Self::K0BlockLength::VALUE / Self::K0::VALUE;
    const K1_LOOPS: usize = Self::N0::VALUE / Self::K1::VALUE;

    /// Evaluated when a pipeline is built; a failing shape does not compile.
    const CHECK: () = {
        assert!(
            Self::K0BlockLength::VALUE % Self::K0::VALUE == 0,
            "K0BlockLength must be a multiple of K0"
        );
        assert!(Self::N0::VALUE % Self::K1::VALUE == 0, "N0 must be a multiple of K1");
    };
}

pub struct TileShape<M0, N0, K0, N1, K1, K0BlockLength, BlockSize> {
    _phantom: PhantomData<(M0, N0, K0, N1, K1, K0BlockLength, BlockSize)>,
}

impl<M0: Dim, N0: Dim, K0: Dim, N1: Dim, K1: Dim, K0BlockLength: Dim, BlockSize: Dim> FmhaShape
    for TileShape<M0, N0, K0, N1, K1, K0BlockLength, BlockSize>
{
    type M0 = M0;
    type N0 = N0;
    type K0 = K0;
    type N1 = N1;
    type K1 = K1;
    type K0BlockLength = K0BlockLength;
    type BlockSize = BlockSize;
}

/// Element types flowing through the pipeline.
pub trait FmhaTypes: Send + Sync + 'static {
    type Q: Element;
    type K: Element;
    type V: Element;
    type Bias: Element;
    /// QK GEMM accumulator.
    type SAcc: Accum;
    /// Softmax arithmetic (scores, running max and sum).
    type SmplCompute: Accum;
    /// Probabilities fed to the KV GEMM.
    type P: Element;
    /// KV GEMM accumulator, also the splitKV partial output.
    type OAcc: Accum;
    type O: Element;
    type Lse: Accum;
}

/// Every input, `P` and the output in `In`; every accumulator in `Acc`.
pub struct FmhaDataTypes<In, Acc> {
    _phantom: PhantomData<(In, Acc)>,
}

impl<In: Element, Acc: Accum> FmhaTypes for FmhaDataTypes<In, Acc> {
    type Q = In;
    type K = In;
    type V = In;
    type Bias = In;
    type SAcc = Acc;
    type SmplCompute = Acc;
    type P = In;
    type OAcc = Acc;
    type O = In;
    type Lse = Acc;
}

/// Feature switches.
pub trait FmhaTraits: Send + Sync + 'static {
    /// Query rows past `seqlen_q` may appear in the last tile.
    const PAD_SEQLEN_Q: bool;
    /// Key columns past `seqlen_k` are forced to `-inf`.
    const PAD_SEQLEN_K: bool;
    /// `s = s * scale + bias` before the softmax.
    const HAS_BIAS: bool;
    const STORE_LSE: bool;
    const IS_MASKING: bool;
    /// Softmax in base 2 with `log2(e)` folded into the scale.
    const FAST_EXP2: bool;
    /// Occupancy hint; `-1` derives it from the head dim.
    const BLOCK_PER_CU: i32 = -1;
}

pub struct FmhaFlags<
    const PAD_SEQLEN_Q: bool,
    const PAD_SEQLEN_K: bool,
    const HAS_BIAS: bool,
    const STORE_LSE: bool,
    const IS_MASKING: bool,
    const FAST_EXP2: bool,
>;

impl<
    const PAD_SEQLEN_Q: bool,
    const PAD_SEQLEN_K: bool,
    const HAS_BIAS: bool,
    const STORE_LSE: bool,
    const IS_MASKING: bool,
    const FAST_EXP2: bool,
> FmhaTraits for FmhaFlags<PAD_SEQLEN_Q, PAD_SEQLEN_K, HAS_BIAS, STORE_LSE, IS_MASKING, FAST_EXP2>
{
    const PAD_SEQLEN_Q: bool = PAD_SEQLEN_Q;
    const PAD_SEQLEN_K: bool = PAD_SEQLEN_K;
    const HAS_BIAS: bool = HAS_BIAS;
    const STORE_LSE: bool = STORE_LSE;
    const IS_MASKING: bool = IS_MASKING;
    const FAST_EXP2: bool = FAST_EXP2;
}

/// Type-level V layout.
pub trait VLayoutKind: Send + Sync + 'static {
    const LAYOUT: VLayout;
}

/// `[seqlen_k, hdim_v]` per head; shuffled in registers before staging.
pub struct RowMajorV;
/// `[hdim_v, seqlen_k]` per head.
pub struct ColMajorV;

impl VLayoutKind for RowMajorV {
    const LAYOUT: VLayout = VLayout::RowMajor;
}

impl VLayoutKind for ColMajorV {
    const LAYOUT: VLayout = VLayout::ColMajor;
}

pub trait FmhaProblem: Send + Sync + 'static {
    type Shape: FmhaShape;
    type Types: FmhaTypes;
    type Traits: FmhaTraits;
    type VLayout: VLayoutKind;
}

pub struct FmhaFwdProblem<S, T, F, L = RowMajorV> {
    _phantom: PhantomData<(S, T, F, L)>,
}

impl<S: FmhaShape, T: FmhaTypes, F: FmhaTraits, L: VLayoutKind> FmhaProblem
    for FmhaFwdProblem<S, T, F, L>
{
    type Shape = S;
    type Types = T;
    type Traits = F;
    type VLayout = L;
}

/// Problem of the splitKV combine step.
pub trait CombineProblem: Send + Sync + 'static {
    type Types: FmhaTypes;
    type Traits: FmhaTraits;
    type M0: Dim;
    type N1: Dim;
    /// Upper bound on the number of splits one launch combines.
    type MaxSplits: Dim;
    type BlockSize: Dim;
}

pub struct FmhaCombineProblem<T, F, M0, N1, MaxSplits, BlockSize> {
    _phantom: PhantomData<(T, F, M0, N1, MaxSplits, BlockSize)>,
}

impl<T: FmhaTypes, F: FmhaTraits, M0: Dim, N1: Dim, MaxSplits: Dim, BlockSize: Dim> CombineProblem
    for FmhaCombineProblem<T, F, M0, N1, MaxSplits, BlockSize>
{
    type Types = T;
    type Traits = F;
    type M0 = M0;
    type N1 = N1;
    type MaxSplits = MaxSplits;
    type BlockSize = BlockSize;
}

/// Combine problem matching the tile rows, head dim and types of a forward
/// problem.
pub type CombineProblemOf<P: FmhaProblem, MaxSplits> = FmhaCombineProblem<
    <P as FmhaProblem>::Types,
    <P as FmhaProblem>::Traits,
    <P::Shape as FmhaShape>::M0,
    <P::Shape as FmhaShape>::N1,
    MaxSplits,
    <P::Shape as FmhaShape>::BlockSize,
>;

// Element types of a problem
pub type QType<P: FmhaProblem> = <P::Types as FmhaTypes>::Q;
pub type KType<P: FmhaProblem> = <P::Types as FmhaTypes>::K;
pub type VType<P: FmhaProblem> = <P::Types as FmhaTypes>::V;
pub type BiasType<P: FmhaProblem> = <P::Types as FmhaTypes>::Bias;
pub type SAccType<P: FmhaProblem> = <P::Types as FmhaTypes>::SAcc;
pub type SmplType<P: FmhaProblem> = <P::Types as FmhaTypes>::SmplCompute;
pub type PType<P: FmhaProblem> = <P::Types as FmhaTypes>::P;
pub type OAccType<P: FmhaProblem> = <P::Types as FmhaTypes>::OAcc;
pub type OType<P: FmhaProblem> = <P::Types as FmhaTypes>::O;
pub type LseType<P: FmhaProblem> = <P::Types as FmhaTypes>::Lse;

// Dram windows handed to the forward pipeline
pub type QWindow<'a, P: FmhaProblem> = TileWindow<
    'a,
    QType<P>,
    <P::Shape as FmhaShape>::M0,
    <P::Shape as FmhaShape>::K0BlockLength,
>;
pub type KWindow<'a, P: FmhaProblem> =
    TileWindow<'a, KType<P>, <P::Shape as FmhaShape>::N0, <P::Shape as FmhaShape>::K0>;
pub type VWindow<'a, P: FmhaProblem> =
    TileWindow<'a, VType<P>, <P::Shape as FmhaShape>::N1, <P::Shape as FmhaShape>::K1>;
pub type BiasWindow<'a, P: FmhaProblem> =
    TileWindow<'a, BiasType<P>, <P::Shape as FmhaShape>::M0, <P::Shape as FmhaShape>::N0>;
pub type OWindowMut<'a, P: FmhaProblem, T> =
    TileWindowMut<'a, T, <P::Shape as FmhaShape>::M0, <P::Shape as FmhaShape>::N1>;

// Dram windows handed to the combine pipeline
pub type LseAccWindow<'a, C: CombineProblem> =
    TileWindow<'a, <C::Types as FmhaTypes>::Lse, C::MaxSplits, C::M0>;
pub type OAccWindow<'a, C: CombineProblem> =
    TileWindow<'a, <C::Types as FmhaTypes>::OAcc, C::M0, C::N1>;

/// Blocks per compute unit for a problem, resolving `BLOCK_PER_CU == -1`.
pub fn block_per_cu<P: FmhaProblem>() -> usize {
    match <P::Traits as FmhaTraits>::BLOCK_PER_CU {
        n if n > 0 => n as usize,
        _ => match <P::Shape as FmhaShape>::K0BlockLength::VALUE {
            0..=32 => 2,
            33..=64 => 3,
            65..=128 => 2,
            _ => 1,
        },
    }
}
