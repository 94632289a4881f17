//! Device operations over whole BHSD tensors.
//!
//! A kernel validates its arguments, splits the problem into a grid of
//! blocks and runs every block on the rayon pool. Each block owns a disjoint
//! chunk of the output, so blocks never synchronize with each other. Shared
//! memory hazards recorded by any block fail the launch after the grid
//! completes.

mod combine;
mod fwd;
mod splitkv;

pub use combine::{FmhaCombineArgs, FmhaCombineKernel};
pub use fwd::{FmhaFwdArgs, FmhaFwdKernel};
pub use splitkv::{FmhaFwdSplitKvArgs, FmhaFwdSplitKvKernel, MAX_SPLITS};

use lanetile::{
    block::Hazard,
    element::Element,
    tiles::{DimOrOne, DistributedTensor, TensorViewMut, TileWindowMut},
};

use crate::error::{FmhaError, Result};

/// Problem extents. Q, K and O are `[batch, nhead, seqlen, hdim]`; V is
/// `[batch, nhead, seqlen_k, hdim_v]` row-major or `[batch, nhead, hdim_v,
/// seqlen_k]` col-major; bias is `[batch, nhead, seqlen_q, seqlen_k]`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FmhaDims {
    pub batch: usize,
    pub nhead: usize,
    pub seqlen_q: usize,
    pub seqlen_k: usize,
    pub hdim_q: usize,
    pub hdim_v: usize,
}

impl FmhaDims {
    /// Square problem with one head dim for Q, K and V.
    pub fn new(batch: usize, nhead: usize, seqlen_q: usize, seqlen_k: usize, hdim: usize) -> Self {
        Self {
            batch,
            nhead,
            seqlen_q,
            seqlen_k,
            hdim_q: hdim,
            hdim_v: hdim,
        }
    }

    pub fn heads(&self) -> usize {
        self.batch * self.nhead
    }

    pub fn q_len(&self) -> usize {
        self.heads() * self.seqlen_q * self.hdim_q
    }

    pub fn k_len(&self) -> usize {
        self.heads() * self.seqlen_k * self.hdim_q
    }

    pub fn v_len(&self) -> usize {
        self.heads() * self.seqlen_k * self.hdim_v
    }

    pub fn bias_len(&self) -> usize {
        self.heads() * self.seqlen_q * self.seqlen_k
    }

    pub fn o_len(&self) -> usize {
        self.heads() * self.seqlen_q * self.hdim_v
    }

    pub fn lse_len(&self) -> usize {
        self.heads() * self.seqlen_q
    }

    /// `[batch, nhead, num_splits, seqlen_q, hdim_v]`
    pub fn o_acc_len(&self, num_splits: usize) -> usize {
        self.o_len() * num_splits
    }

    /// `[batch, nhead, num_splits, seqlen_q]`
    pub fn lse_acc_len(&self, num_splits: usize) -> usize {
        self.lse_len() * num_splits
    }
}

/// What a launch ran with.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LaunchReport {
    pub grid: usize,
    pub block_size: usize,
    pub smem_bytes: usize,
    pub block_per_cu: usize,
}

fn unsupported(msg: impl Into<String>) -> FmhaError {
    FmhaError::UnsupportedArgument(msg.into())
}

fn check_len(name: &str, actual: usize, expected: usize) -> Result<()> {
    if actual != expected {
        return Err(unsupported(format!(
            "{name} has {actual} elements, expected {expected}"
        )));
    }
    Ok(())
}

fn check_seqlen(name: &str, len: usize, tile: usize, padded: bool) -> Result<()> {
    if len % tile != 0 && !padded {
        return Err(unsupported(format!(
            "{name}={len} is not a multiple of {tile} and the problem does not pad it"
        )));
    }
    Ok(())
}

/// Stores a register tile into the head of `chunk`, a row-major buffer of
/// `cols`-wide rows. Rows past the end of the chunk are dropped.
fn store_chunk<T: Element, R: DimOrOne, C: DimOrOne>(
    tile: &DistributedTensor<T>,
    chunk: &mut [T],
    cols: usize,
) {
    let rows = chunk.len() / cols;
    let mut window = TileWindowMut::<T, R, C>::new(TensorViewMut::new(chunk, [rows, cols]), [0, 0]);
    tile.store_tile(&mut window);
}

fn hazards_to_result(hazards: Vec<Hazard>) -> Result<()> {
    match hazards.first() {
        None => Ok(()),
        Some(&first) => Err(FmhaError::SyncHazard {
            count: hazards.len(),
            first,
        }),
    }
}
