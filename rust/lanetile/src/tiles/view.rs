//! Strided 2D views over borrowed memory.
//!
//! A view does not own its memory. Reads outside `lengths` return the view's
//! pad value and writes outside `lengths` are dropped, which is how ragged
//! sequence lengths are handled without per-element checks in callers.

use crate::element::Element;

/// Read-only strided 2D view.
#[derive(Clone, Copy, Debug)]
pub struct TensorView<'a, T> {
    data: &'a [T],
    lengths: [usize; 2],
    strides: [usize; 2],
    pad: T,
}

impl<'a, T: Element> TensorView<'a, T> {
    /// Row-major view with zero padding.
    pub fn new(data: &'a [T], lengths: [usize; 2]) -> Self {
        Self::strided(data, lengths, [lengths[1], 1])
    }

    pub fn strided(data: &'a [T], lengths: [usize; 2], strides: [usize; 2]) -> Self {
        debug_assert!(
            lengths[0] == 0
                || lengths[1] == 0
                || (lengths[0] - 1) * strides[0] + (lengths[1] - 1) * strides[1] < data.len(),
            "view {lengths:?} / {strides:?} exceeds buffer of {}",
            data.len()
        );
        Self {
            data,
            lengths,
            strides,
            pad: T::default(),
        }
    }

    /// An empty view, for operands a problem configuration never reads.
    pub fn empty() -> Self {
        Self {
            data: &[],
            lengths: [0, 0],
            strides: [0, 0],
            pad: T::default(),
        }
    }

    /// Value returned for reads outside the valid range.
    #[must_use]
    pub fn with_pad(mut self, pad: T) -> Self {
        self.pad = pad;
        self
    }

    /// Swaps the two axes without touching memory.
    #[must_use]
    pub fn transposed(self) -> Self {
        Self {
            lengths: [self.lengths[1], self.lengths[0]],
            strides: [self.strides[1], self.strides[0]],
            ..self
        }
    }

    pub fn lengths(&self) -> [usize; 2] {
        self.lengths
    }

    pub fn strides(&self) -> [usize; 2] {
        self.strides
    }

    pub fn pad(&self) -> T {
        self.pad
    }

    #[inline]
    pub fn in_bounds(&self, r: usize, c: usize) -> bool {
        r < self.lengths[0] && c < self.lengths[1]
    }

    #[inline]
    pub fn get(&self, r: usize, c: usize) -> T {
        if self.in_bounds(r, c) {
            self.data[r * self.strides[0] + c * self.strides[1]]
        } else {
            self.pad
        }
    }
}

/// Writable strided 2D view.
#[derive(Debug)]
pub struct TensorViewMut<'a, T> {
    data: &'a mut [T],
    lengths: [usize; 2],
    strides: [usize; 2],
}

impl<'a, T: Element> TensorViewMut<'a, T> {
    pub fn new(data: &'a mut [T], lengths: [usize; 2]) -> Self {
        Self::strided(data, lengths, [lengths[1], 1])
    }

    pub fn strided(data: &'a mut [T], lengths: [usize; 2], strides: [usize; 2]) -> Self {
        debug_assert!(
            lengths[0] == 0
                || lengths[1] == 0
                || (lengths[0] - 1) * strides[0] + (lengths[1] - 1) * strides[1] < data.len(),
            "view {lengths:?} / {strides:?} exceeds buffer of {}",
            data.len()
        );
        Self {
            data,
            lengths,
            strides,
        }
    }

    pub fn lengths(&self) -> [usize; 2] {
        self.lengths
    }

    #[inline]
    pub fn in_bounds(&self, r: usize, c: usize) -> bool {
        r < self.lengths[0] && c < self.lengths[1]
    }

    /// Writes `value` at `(r, c)`. Returns whether the write landed.
    #[inline]
    pub fn set(&mut self, r: usize, c: usize, value: T) -> bool {
        if self.in_bounds(r, c) {
            self.data[r * self.strides[0] + c * self.strides[1]] = value;
            true
        } else {
            false
        }
    }

    pub fn as_view(&self) -> TensorView<'_, T> {
        TensorView::strided(self.data, self.lengths, self.strides)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strided_view_reads_and_pads() {
        let data: Vec<f32> = (0..12).map(|x| x as f32).collect();
        let view = TensorView::new(&data, [3, 4]).with_pad(-1.0);
        assert_eq!(view.get(1, 2), 6.0);
        assert_eq!(view.get(3, 0), -1.0);
        assert_eq!(view.get(0, 4), -1.0);
    }

    #[test]
    fn transposed_view_swaps_axes() {
        let data: Vec<f32> = (0..6).map(|x| x as f32).collect();
        let view = TensorView::new(&data, [2, 3]).transposed();
        assert_eq!(view.lengths(), [3, 2]);
        assert_eq!(view.get(2, 1), 5.0);
        assert_eq!(view.get(1, 0), 1.0);
    }

    #[test]
    fn writes_outside_lengths_are_dropped() {
        let mut data = vec![0.0f32; 4];
        let mut view = TensorViewMut::new(&mut data, [2, 2]);
        assert!(view.set(1, 1, 3.0));
        assert!(!view.set(2, 0, 9.0));
        assert_eq!(data, vec![0.0, 0.0, 0.0, 3.0]);
    }
}
