//! Lanetile - lane-distributed tile primitives on a simulated block.
//!
//! This crate provides the building blocks block-level kernels are written
//! against: tiles whose extents are known at compile time, register tiles
//! partitioned across the lanes of a block, and a shared-memory model that
//! records synchronization mistakes instead of silently racing.
//!
//! # Core Abstractions
//!
//! ## Tiles (`tiles` module)
//! - [`TensorView`] / [`TensorViewMut`] - Strided 2D view over a slice, with a pad value
//! - [`TileWindow<T, R, C>`] - R×C window over a view with a movable origin
//! - [`TileDistribution`] - Lookup tables mapping logical coordinates to (lane, slot)
//! - [`DistributedTensor`] - Register tile, each lane holds the slots it owns
//! - [`Dim`] trait - Compile-time dimensions (D2 .. D512)
//!
//! ## Cooperative Operations (`block` module)
//! - [`BlockCtx`](block::BlockCtx) - Barrier epochs and hazard bookkeeping for one block
//! - [`Smem`](block::Smem) - Typed shared-memory slots, sync stores and async copies
//! - [`BlockGemm`](block::BlockGemm) - `C += A * B^T` on distributed tiles
//! - `block_tile_reduce` / `block_tile_reduce_sync` - Row reductions across lanes
//!
//! ## Element-wise Operations
//! - `unary_ops` - Per-element operations (zero, scale, exp, ...)
//! - `binary_ops` - Two-operand operations (add, max, ...)
//! - `reduction_ops` - Reduction operations (sum, max)
//!
//! # Memory Model
//!
//! ```text
//! Global (TensorView) ──load_tile──► DistributedTensor ──store_tile──► Smem slot
//!        │                                                               ▲
//!        └──────────────────────async_load_tile + async_fence────────────┘
//! ```
//!
//! - **Smem** (shared memory): visible to all lanes of a block once a barrier
//!   separates the write from the read.
//! - **DistributedTensor** (registers): every element is owned by exactly one lane.
//!
//! # Example
//!
//! ```ignore
//! let mut ctx = BlockCtx::new(0, 64);
//! let region = ctx.lds_region(2);
//! let mut k_lds = Smem::<f32>::new(region, 16 * 16);
//!
//! k_lds.async_load_tile(&mut ctx, 0, &k_window);
//! k_lds.async_fence(&mut ctx, 0);
//! ctx.barrier();
//!
//! let k = k_lds.view(&mut ctx, 0, [16, 16], [16, 1]);
//! BlockGemmABt.run(&mut s_acc, q.slice([0, 0], [16, 16]), k, |x| x);
//! ```

#![allow(
    clippy::identity_op,
    reason = "For `addr + 0`, it makes some stuff cleaner to read"
)]
#![allow(
    clippy::len_without_is_empty,
    reason = "Empty tiles aren't a thing, so this method would be confusing"
)]
#![allow(clippy::needless_range_loop)]

pub mod binary_ops;
pub mod block;
pub mod element;
pub mod reduction_ops;
pub mod tiles;
pub mod unary_ops;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

/// Widest per-lane vector along the fast axis of a tile.
pub const LINE_SIZE: usize = 4;

pub mod prelude {
    pub use crate::{
        LINE_SIZE,
        binary_ops::BinaryOp,
        block::{
            BlockCtx, BlockGemm, BlockGemmABt, Hazard, HazardKind, LdsRegion, Smem,
            block_tile_reduce, block_tile_reduce_sync,
        },
        element::{Accum, Element},
        reduction_ops::ReductionOp,
        tiles::*,
        unary_ops::UnaryOp,
    };
}
