//! Fused multi-head attention forward, written against block-level tile
//! primitives.
//!
//! # Layers
//!
//! - [`problem`] - Compile-time tile shape, element types and feature flags
//! - [`policy`] - Lane partitions, LDS buffer rotation and block GEMMs
//! - [`pipeline`] - One block's work: the QR/KS/VS forward loop and the
//!   splitKV combine
//! - [`kernel`] - Argument checks and grid launch over BHSD tensors
//! - [`reference`] - f64 attention for checking results
//!
//! # Example
//!
//! ```ignore
//! type Problem = FmhaFwdProblem<
//!     TileShape<D128, D128, D32, D128, D32, D128, D256>,
//!     FmhaDataTypes<f16, f32>,
//!     FmhaFlags<true, true, false, true, false, true>,
//! >;
//!
//! let kernel = FmhaFwdKernel::<Problem>::new()?;
//! let args = FmhaFwdArgs { q: &q, k: &k, v: &v, bias: None, dims, scale, mask: MaskSpec::None };
//! kernel.launch(&args, &mut o, Some(&mut lse))?;
//! ```

pub mod error;
pub mod kernel;
pub mod mask;
pub mod pipeline;
pub mod policy;
pub mod problem;
pub mod reference;
pub mod softmax;

pub use error::{FmhaError, Result};

pub mod prelude {
    pub use fmha_config::{MaskSpec, VLayout};

    pub use crate::{
        error::{FmhaError, Result},
        kernel::{
            FmhaCombineArgs, FmhaCombineKernel, FmhaDims, FmhaFwdArgs, FmhaFwdKernel,
            FmhaFwdSplitKvArgs, FmhaFwdSplitKvKernel, LaunchReport, MAX_SPLITS,
        },
        mask::{FmhaMask, MaskKind},
        policy::{DefaultPolicy, FmhaPolicy},
        problem::{
            ColMajorV, CombineProblem, CombineProblemOf, FmhaCombineProblem, FmhaDataTypes,
            FmhaFlags, FmhaFwdProblem, FmhaProblem, FmhaShape, FmhaTraits, FmhaTypes, RowMajorV,
            TileShape,
        },
    };
}
