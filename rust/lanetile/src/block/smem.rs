use std::{collections::VecDeque, sync::Arc};

use super::ctx::{BlockCtx, LdsRegion};
use crate::{
    element::Element,
    tiles::{DimOrOne, DistributedTensor, TensorView, TileDistribution, TileWindow},
};

struct PendingCopy<T> {
    slot: usize,
    values: Vec<T>,
}

/// Typed shared-memory buffer: `region.slots` slots of `slot_len` elements.
///
/// Synchronous stores land immediately. Async copies land when a fence
/// retires them, so reading a slot before its fence observes the previous
/// contents. Every access is reported to the [`BlockCtx`].
pub struct Smem<T> {
    region: LdsRegion,
    slot_len: usize,
    data: Vec<T>,
    pending: VecDeque<PendingCopy<T>>,
}

impl<T: Element> Smem<T> {
    pub fn new(region: LdsRegion, slot_len: usize) -> Self {
        Self {
            region,
            slot_len,
            data: vec![T::default(); region.slots * slot_len],
            pending: VecDeque::new(),
        }
    }

    pub fn slots(&self) -> usize {
        self.region.slots
    }

    pub fn slot_len(&self) -> usize {
        self.slot_len
    }

    pub fn bytes(&self) -> usize {
        self.data.len() * std::mem::size_of::<T>()
    }

    /// Copies not yet retired by a fence.
    pub fn outstanding(&self) -> usize {
        self.pending.len()
    }

    fn slot_id(&self, slot: usize) -> usize {
        debug_assert!(slot < self.region.slots, "slot {slot} outside region");
        self.region.base + slot
    }

    fn slot_data(&self, slot: usize) -> &[T] {
        &self.data[slot * self.slot_len..(slot + 1) * self.slot_len]
    }

    /// Issue a block-wide async copy of `window` (row-major) into `slot`.
    pub fn async_load_tile<R: DimOrOne, C: DimOrOne>(
        &mut self,
        ctx: &mut BlockCtx,
        slot: usize,
        window: &TileWindow<'_, T, R, C>,
    ) {
        debug_assert!(R::VALUE * C::VALUE <= self.slot_len);
        ctx.on_async_issue(self.slot_id(slot));
        self.pending.push_back(PendingCopy {
            slot,
            values: window.to_vec(),
        });
    }

    /// Wait until at most `keep` copies are outstanding. Retired copies land
    /// now; other lanes see them after the next barrier.
    pub fn async_fence(&mut self, ctx: &mut BlockCtx, keep: usize) {
        while self.pending.len() > keep {
            let Some(copy) = self.pending.pop_front() else {
                break;
            };
            let start = copy.slot * self.slot_len;
            self.data[start..start + copy.values.len()].copy_from_slice(&copy.values);
            ctx.on_async_commit(self.slot_id(copy.slot));
        }
    }

    /// Every lane writes its elements of `tensor` at `r * strides[0] + c * strides[1]`.
    pub fn store_tile(
        &mut self,
        ctx: &mut BlockCtx,
        slot: usize,
        tensor: &DistributedTensor<T>,
        strides: [usize; 2],
    ) {
        ctx.on_write(self.slot_id(slot));
        let base = slot * self.slot_len;
        let [rows, cols] = tensor.lengths();
        debug_assert!((rows - 1) * strides[0] + (cols - 1) * strides[1] < self.slot_len);
        for r in 0..rows {
            for c in 0..cols {
                self.data[base + r * strides[0] + c * strides[1]] = tensor.at(r, c);
            }
        }
    }

    /// Every lane reads the elements `dist` assigns it.
    pub fn load_tile(
        &self,
        ctx: &mut BlockCtx,
        slot: usize,
        dist: &Arc<TileDistribution>,
        strides: [usize; 2],
    ) -> DistributedTensor<T> {
        let view = self.view(ctx, slot, dist.lengths(), strides);
        DistributedTensor::from_fn(dist, |[r, c]| view.get(r, c))
    }

    /// A view over `slot` for cooperative reads (e.g. a GEMM operand).
    pub fn view(
        &self,
        ctx: &mut BlockCtx,
        slot: usize,
        lengths: [usize; 2],
        strides: [usize; 2],
    ) -> TensorView<'_, T> {
        ctx.on_read(self.slot_id(slot));
        TensorView::strided(self.slot_data(slot), lengths, strides)
    }
}
