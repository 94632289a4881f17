//! Causal and sliding-window attention masks.
//!
//! A mask is a band around a diagonal of the score matrix. With
//! `d = col - row - offset`, a position is kept when `-left <= d <= right`;
//! a negative extent leaves that side unbounded. Bottom-right alignment sets
//! `offset = seqlen_k - seqlen_q`, so the last query row sees the last key.

use fmha_config::MaskSpec;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MaskKind {
    NoMask,
    CausalTopLeft,
    CausalBottomRight,
    Window { left: i64, right: i64, bottom_right: bool },
}

impl From<MaskSpec> for MaskKind {
    fn from(spec: MaskSpec) -> Self {
        match spec {
            MaskSpec::None => Self::NoMask,
            MaskSpec::Window {
                left,
                right: 0,
                bottom_right,
            } if left < 0 => {
                if bottom_right {
                    Self::CausalBottomRight
                } else {
                    Self::CausalTopLeft
                }
            }
            MaskSpec::Window {
                left,
                right,
                bottom_right,
            } => Self::Window {
                left,
                right,
                bottom_right,
            },
        }
    }
}

/// A mask bound to the sequence lengths of one problem.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FmhaMask {
    kind: MaskKind,
    left: Option<i64>,
    right: Option<i64>,
    offset: i64,
    seqlen_k: usize,
}

impl FmhaMask {
    pub fn new(spec: impl Into<MaskKind>, seqlen_q: usize, seqlen_k: usize) -> Self {
        let kind = spec.into();
        let bounded = |x: i64| (x >= 0).then_some(x);
        let (left, right, bottom_right) = match kind {
            MaskKind::NoMask => (None, None, false),
            MaskKind::CausalTopLeft => (None, Some(0), false),
            MaskKind::CausalBottomRight => (None, Some(0), true),
            MaskKind::Window {
                left,
                right,
                bottom_right,
            } => (bounded(left), bounded(right), bottom_right),
        };
        let offset = if bottom_right {
            seqlen_k as i64 - seqlen_q as i64
        } else {
            0
        };
        Self {
            kind,
            left,
            right,
            offset,
            seqlen_k,
        }
    }

    pub fn no_mask(seqlen_q: usize, seqlen_k: usize) -> Self {
        Self::new(MaskKind::NoMask, seqlen_q, seqlen_k)
    }

    pub fn kind(&self) -> MaskKind {
        self.kind
    }

    pub fn is_masking(&self) -> bool {
        self.kind != MaskKind::NoMask
    }

    #[inline]
    pub fn is_masked(&self, row: usize, col: usize) -> bool {
        let d = col as i64 - row as i64 - self.offset;
        self.right.is_some_and(|right| d > right) || self.left.is_some_and(|left| d < -left)
    }

    /// Whether any position of the `height`×`width` tile at `(row0, col0)`
    /// is masked. Tiles strictly inside the band skip the per-element test.
    pub fn is_edge_tile(&self, row0: usize, col0: usize, height: usize, width: usize) -> bool {
        let d_min = col0 as i64 - (row0 + height - 1) as i64 - self.offset;
        let d_max = (col0 + width - 1) as i64 - row0 as i64 - self.offset;
        self.right.is_some_and(|right| d_max > right) || self.left.is_some_and(|left| d_min < -left)
    }

    /// Key range `[start, end)` that rows `row0 .. row0 + height` can see.
    /// `start` is aligned down to `width` so key tiles stay on the tile grid.
    pub fn tile_range_along_x(&self, row0: usize, height: usize, width: usize) -> (usize, usize) {
        let seqlen_k = self.seqlen_k as i64;
        let start = match self.left {
            Some(left) => (row0 as i64 + self.offset - left).clamp(0, seqlen_k),
            None => 0,
        };
        let end = match self.right {
            Some(right) => (row0 as i64 + height as i64 + self.offset + right).clamp(0, seqlen_k),
            None => seqlen_k,
        };
        let start = start as usize / width * width;
        (start, end as usize)
    }

    /// First key column and number of `width`-wide key tiles for a query tile.
    pub fn key_tiles(&self, row0: usize, height: usize, width: usize) -> (usize, usize) {
        let (start, end) = self.tile_range_along_x(row0, height, width);
        if end <= start {
            (start, 0)
        } else {
            (start, (end - start).div_ceil(width))
        }
    }
}
