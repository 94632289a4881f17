//! Cooperative block-level operations: barriers, shared memory, GEMM, and
//! cross-lane reductions.

mod ctx;
mod gemm;
mod reduce;
mod smem;

pub use ctx::{BlockCtx, Hazard, HazardKind, LdsRegion};
pub use gemm::{BlockGemm, BlockGemmABt};
pub use reduce::{block_tile_reduce, block_tile_reduce_sync};
pub use smem::Smem;
