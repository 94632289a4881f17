use std::sync::Arc;

use super::{
    dim::DimOrOne,
    distribution::TileDistribution,
    window::{TileWindow, TileWindowMut},
};
use crate::{binary_ops::BinaryOp, element::Element, unary_ops::UnaryOp};

/// A register tile. Lane `l` holds `data[l * slots .. (l + 1) * slots]`, the
/// elements its distribution assigns to it. Nothing here talks across lanes;
/// the cross-lane steps live in `block`.
#[derive(Clone, Debug)]
pub struct DistributedTensor<T> {
    dist: Arc<TileDistribution>,
    data: Vec<T>,
}

impl<T: Element> DistributedTensor<T> {
    pub fn filled(dist: &Arc<TileDistribution>, value: T) -> Self {
        Self {
            data: vec![value; dist.block_size() * dist.slots_per_lane()],
            dist: dist.clone(),
        }
    }

    /// Zero-initialized (`T::default()`), as accumulators start.
    pub fn zeros(dist: &Arc<TileDistribution>) -> Self {
        Self::filled(dist, T::default())
    }

    /// Each lane computes its own elements from their logical coordinate.
    pub fn from_fn(dist: &Arc<TileDistribution>, mut f: impl FnMut([usize; 2]) -> T) -> Self {
        let slots = dist.slots_per_lane();
        let data = (0..dist.block_size() * slots)
            .map(|i| f(dist.coords(i / slots, i % slots)))
            .collect();
        Self {
            dist: dist.clone(),
            data,
        }
    }

    /// Every lane reads the window elements it owns.
    pub fn load_tile<R: DimOrOne, C: DimOrOne>(
        window: &TileWindow<'_, T, R, C>,
        dist: &Arc<TileDistribution>,
    ) -> Self {
        debug_assert_eq!(window.lengths(), dist.lengths());
        Self::from_fn(dist, |[r, c]| window.at(r, c))
    }

    /// Every owning lane writes its elements. Replicated elements are written
    /// once, by the lowest lane of the group.
    pub fn store_tile<R: DimOrOne, C: DimOrOne>(&self, window: &mut TileWindowMut<'_, T, R, C>) {
        debug_assert_eq!(window.lengths(), self.dist.lengths());
        let [rows, cols] = self.dist.lengths();
        for r in 0..rows {
            for c in 0..cols {
                window.set(r, c, self.at(r, c));
            }
        }
    }

    pub fn distribution(&self) -> &Arc<TileDistribution> {
        &self.dist
    }

    pub fn lengths(&self) -> [usize; 2] {
        self.dist.lengths()
    }

    #[inline]
    pub fn get(&self, lane: usize, slot: usize) -> T {
        self.data[lane * self.dist.slots_per_lane() + slot]
    }

    #[inline]
    pub fn set(&mut self, lane: usize, slot: usize, value: T) {
        let slots = self.dist.slots_per_lane();
        self.data[lane * slots + slot] = value;
    }

    pub fn lane(&self, lane: usize) -> &[T] {
        let slots = self.dist.slots_per_lane();
        &self.data[lane * slots..(lane + 1) * slots]
    }

    /// Element at logical `(r, c)`, read from its owner.
    #[inline]
    pub fn at(&self, r: usize, c: usize) -> T {
        let (lane, slot) = self.dist.owner(r, c);
        self.get(lane, slot)
    }

    /// ElementwiseInOut: `f` on every held element, in place.
    pub fn elementwise_inout(&mut self, f: impl FnMut(&mut T)) {
        self.data.iter_mut().for_each(f);
    }

    /// Elementwise-in: a new tensor on the same distribution.
    pub fn map<U: Element>(&self, f: impl FnMut(T) -> U) -> DistributedTensor<U> {
        DistributedTensor {
            dist: self.dist.clone(),
            data: self.data.iter().copied().map(f).collect(),
        }
    }

    /// Combine with another tensor on the same distribution, slot by slot.
    pub fn zip_inout<U: Element>(&mut self, other: &DistributedTensor<U>, mut f: impl FnMut(&mut T, U)) {
        assert!(
            Arc::ptr_eq(&self.dist, &other.dist) || *self.dist == *other.dist,
            "zip_inout needs identical distributions"
        );
        for (a, &b) in self.data.iter_mut().zip(&other.data) {
            f(a, b);
        }
    }

    /// Visit every held element with its lane, slot, and logical coordinate.
    pub fn sweep(&mut self, mut f: impl FnMut(usize, usize, [usize; 2], &mut T)) {
        let slots = self.dist.slots_per_lane();
        for (i, v) in self.data.iter_mut().enumerate() {
            let (lane, slot) = (i / slots, i % slots);
            f(lane, slot, self.dist.coords(lane, slot), v);
        }
    }

    /// Visit every held element together with the value of its row in `rows`,
    /// a row projection whose rows live on the same lanes.
    ///
    /// # Panics
    /// If the two distributions do not share a row mapping.
    pub fn sweep_rows_with<U: Element>(
        &mut self,
        rows: &DistributedTensor<U>,
        mut f: impl FnMut([usize; 2], &mut T, U),
    ) {
        assert!(
            self.dist.rows_compatible(&rows.dist),
            "row state lives on different lanes"
        );
        let slots = self.dist.slots_per_lane();
        for (i, v) in self.data.iter_mut().enumerate() {
            let (lane, slot) = (i / slots, i % slots);
            let rc = self.dist.coords(lane, slot);
            f(rc, v, rows.get(lane, rows.dist.row_slot(lane, rc[0])));
        }
    }

    /// `get_slice_tile`: a read-only view of a sub-rectangle.
    pub fn slice(&self, origin: [usize; 2], lengths: [usize; 2]) -> TileSlice<'_, T> {
        let [rows, cols] = self.dist.lengths();
        debug_assert!(origin[0] + lengths[0] <= rows && origin[1] + lengths[1] <= cols);
        TileSlice {
            tensor: self,
            origin,
            lengths,
        }
    }

    /// Lane-local permutation into `self`'s distribution. Both distributions
    /// must give each lane the same set of coordinates.
    pub fn shuffle_from(&mut self, src: &DistributedTensor<T>) {
        let slots = self.dist.slots_per_lane();
        for i in 0..self.data.len() {
            let (lane, slot) = (i / slots, i % slots);
            let [r, c] = self.dist.coords(lane, slot);
            let (src_lane, src_slot) = src.dist.owner(r, c);
            debug_assert_eq!(src_lane, lane, "shuffle crossed lanes at ({r}, {c})");
            self.data[i] = src.get(src_lane, src_slot);
        }
    }

    /// Dense row-major copy of the logical tile.
    pub fn to_dense(&self) -> Vec<T> {
        let [rows, cols] = self.dist.lengths();
        let mut out = vec![T::default(); rows * cols];
        for r in 0..rows {
            for c in 0..cols {
                out[r * cols + c] = self.at(r, c);
            }
        }
        out
    }

    pub fn apply_unary_op<O: UnaryOp<T>>(&mut self, op: O) {
        for v in &mut self.data {
            *v = op.apply(*v);
        }
    }

    pub fn apply_binary_op<O: BinaryOp<T>>(&mut self, op: O, other: &DistributedTensor<T>) {
        self.zip_inout(other, |a, b| *a = op.apply(*a, b));
    }
}

/// Read-only sub-rectangle of a distributed tensor, addressed logically.
#[derive(Clone, Copy, Debug)]
pub struct TileSlice<'a, T> {
    tensor: &'a DistributedTensor<T>,
    origin: [usize; 2],
    lengths: [usize; 2],
}

impl<T: Element> TileSlice<'_, T> {
    pub fn lengths(&self) -> [usize; 2] {
        self.lengths
    }

    #[inline]
    pub fn at(&self, r: usize, c: usize) -> T {
        self.tensor.at(self.origin[0] + r, self.origin[1] + c)
    }
}
