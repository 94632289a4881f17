use super::{
    dim::{DimOrOne, DimPhantom, lengths_of},
    view::{TensorView, TensorViewMut},
};
use crate::element::Element;

/// An `R`×`C` window over a read-only view.
///
/// The window extents are part of the type, so handing a pipeline a window
/// of the wrong shape fails to compile. The origin is runtime state and is
/// rebound with [`move_window`](Self::move_window).
#[derive(Clone, Copy, Debug)]
pub struct TileWindow<'a, T, R: DimOrOne, C: DimOrOne> {
    view: TensorView<'a, T>,
    origin: [usize; 2],
    _dims: DimPhantom<R, C>,
}

impl<'a, T: Element, R: DimOrOne, C: DimOrOne> TileWindow<'a, T, R, C> {
    pub const ROWS: usize = R::VALUE;
    pub const COLS: usize = C::VALUE;

    pub fn new(view: TensorView<'a, T>, origin: [usize; 2]) -> Self {
        Self {
            view,
            origin,
            _dims: DimPhantom::default(),
        }
    }

    pub fn view(&self) -> TensorView<'a, T> {
        self.view
    }

    pub fn origin(&self) -> [usize; 2] {
        self.origin
    }

    pub fn lengths(&self) -> [usize; 2] {
        lengths_of::<R, C>()
    }

    /// Shifts the origin by `step`. No bounds check: callers derive every
    /// step from the static tile shape.
    pub fn move_window(&mut self, step: [isize; 2]) {
        self.origin = [
            self.origin[0].wrapping_add_signed(step[0]),
            self.origin[1].wrapping_add_signed(step[1]),
        ];
    }

    /// Same view, different origin.
    #[must_use]
    pub fn with_origin(&self, origin: [usize; 2]) -> Self {
        Self::new(self.view, origin)
    }

    /// Element at window-relative `(r, c)`; the view's pad value outside it.
    #[inline]
    pub fn at(&self, r: usize, c: usize) -> T {
        self.view
            .get(self.origin[0].wrapping_add(r), self.origin[1].wrapping_add(c))
    }

    /// The same window with both axes swapped.
    pub fn transposed(&self) -> TileWindow<'a, T, C, R> {
        TileWindow::new(self.view.transposed(), [self.origin[1], self.origin[0]])
    }

    /// Copies the window into a dense row-major buffer.
    pub fn to_vec(&self) -> Vec<T> {
        let mut out = Vec::with_capacity(R::VALUE * C::VALUE);
        for r in 0..R::VALUE {
            for c in 0..C::VALUE {
                out.push(self.at(r, c));
            }
        }
        out
    }
}

/// An `R`×`C` window over a writable view.
#[derive(Debug)]
pub struct TileWindowMut<'a, T, R: DimOrOne, C: DimOrOne> {
    view: TensorViewMut<'a, T>,
    origin: [usize; 2],
    _dims: DimPhantom<R, C>,
}

impl<'a, T: Element, R: DimOrOne, C: DimOrOne> TileWindowMut<'a, T, R, C> {
    pub fn new(view: TensorViewMut<'a, T>, origin: [usize; 2]) -> Self {
        Self {
            view,
            origin,
            _dims: DimPhantom::default(),
        }
    }

    pub fn origin(&self) -> [usize; 2] {
        self.origin
    }

    pub fn lengths(&self) -> [usize; 2] {
        lengths_of::<R, C>()
    }

    pub fn move_window(&mut self, step: [isize; 2]) {
        self.origin = [
            self.origin[0].wrapping_add_signed(step[0]),
            self.origin[1].wrapping_add_signed(step[1]),
        ];
    }

    /// Writes at window-relative `(r, c)`; dropped outside the view.
    #[inline]
    pub fn set(&mut self, r: usize, c: usize, value: T) -> bool {
        self.view.set(
            self.origin[0].wrapping_add(r),
            self.origin[1].wrapping_add(c),
            value,
        )
    }

    pub fn as_window(&self) -> TileWindow<'_, T, R, C> {
        TileWindow::new(self.view.as_view(), self.origin)
    }
}
