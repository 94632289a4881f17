//! Distribution descriptors: which lane holds which element of a tile.
//!
//! An [`Encoding`] is a handful of integers describing a regular partition
//! and is cheap to build in a `const` context, so shape errors surface at
//! compile time. A [`TileDistribution`] expands an encoding into immutable
//! lookup tables once per problem configuration and is shared through `Arc`.
//!
//! Lanes are numbered `lane = lm * lanes_n + ln`. Lane `(lm, ln)` owns
//! `rows_per_lane` consecutive partition rows and, within each, `col_repeats`
//! runs of `vec_n` consecutive columns strided by `lanes_n * vec_n`:
//!
//! ```text
//! pr = lm * rows_per_lane + i
//! pc = rep * lanes_n * vec_n + ln * vec_n + v
//! slot = (i * col_repeats + rep) * vec_n + v
//! ```
//!
//! A transposed encoding lays the partition over the swapped tile, so the
//! vector runs go down logical columns. A replicated encoding (`replicate_n`)
//! gives every lane of a column group the same columns; it is what a row
//! reduction produces.

use std::sync::{Arc, OnceLock};

use crate::LINE_SIZE;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Encoding {
    /// Logical tile rows.
    pub rows: usize,
    /// Logical tile columns.
    pub cols: usize,
    pub lanes_m: usize,
    pub lanes_n: usize,
    pub rows_per_lane: usize,
    pub vec_n: usize,
    pub col_repeats: usize,
    pub transposed: bool,
    pub replicate_n: bool,
}

impl Encoding {
    /// Partition for a `rows`×`cols` tile over `block_size` lanes, vectorized
    /// along columns. Prefers the widest vector, then the fewest column lanes.
    ///
    /// # Panics
    /// When no partition exists. In a `const` item this is a compile error.
    pub const fn for_tile(rows: usize, cols: usize, block_size: usize) -> Encoding {
        match Self::try_for_tile(rows, cols, block_size) {
            Some(enc) => enc,
            None => panic!("no lane partition covers this tile"),
        }
    }

    /// Same as [`for_tile`](Self::for_tile), vectorized along rows instead.
    pub const fn for_tile_transposed(rows: usize, cols: usize, block_size: usize) -> Encoding {
        let base = Self::for_tile(cols, rows, block_size);
        Encoding {
            rows,
            cols,
            transposed: true,
            ..base
        }
    }

    pub const fn try_for_tile(rows: usize, cols: usize, block_size: usize) -> Option<Encoding> {
        if rows == 0 || cols == 0 || block_size == 0 || !block_size.is_power_of_two() {
            return None;
        }
        let mut vec_n = LINE_SIZE;
        while vec_n >= 1 {
            if cols % vec_n == 0 {
                let mut lanes_n = 1;
                while lanes_n <= block_size && lanes_n * vec_n <= cols {
                    let lanes_m = block_size / lanes_n;
                    if lanes_m <= rows && rows % lanes_m == 0 && cols % (lanes_n * vec_n) == 0 {
                        return Some(Encoding {
                            rows,
                            cols,
                            lanes_m,
                            lanes_n,
                            rows_per_lane: rows / lanes_m,
                            vec_n,
                            col_repeats: cols / (lanes_n * vec_n),
                            transposed: false,
                            replicate_n: false,
                        });
                    }
                    lanes_n *= 2;
                }
            }
            vec_n /= 2;
        }
        None
    }

    pub const fn block_size(&self) -> usize {
        self.lanes_m * self.lanes_n
    }

    pub const fn slots_per_lane(&self) -> usize {
        self.rows_per_lane * self.col_repeats * self.vec_n
    }

    /// Partition extents, i.e. the logical extents before a transpose.
    const fn partition_lengths(&self) -> [usize; 2] {
        if self.transposed {
            [self.cols, self.rows]
        } else {
            [self.rows, self.cols]
        }
    }

    pub const fn is_valid(&self) -> bool {
        let [pr, pc] = self.partition_lengths();
        let covered_cols = if self.replicate_n {
            self.col_repeats * self.vec_n
        } else {
            self.col_repeats * self.lanes_n * self.vec_n
        };
        self.lanes_n.is_power_of_two()
            && self.lanes_m > 0
            && pr == self.lanes_m * self.rows_per_lane
            && pc == covered_cols
    }

    /// Reduction of this tile along its columns, replicated over column lanes.
    pub const fn row_projection(&self) -> Encoding {
        Encoding {
            rows: self.rows,
            cols: 1,
            lanes_m: self.lanes_m,
            lanes_n: self.lanes_n,
            rows_per_lane: self.rows_per_lane,
            vec_n: 1,
            col_repeats: 1,
            transposed: false,
            replicate_n: true,
        }
    }

    /// Whether two tiles assign every row to the same lanes, so per-row state
    /// reduced from one can be applied to the other without communication.
    pub const fn rows_compatible(a: &Encoding, b: &Encoding) -> bool {
        !a.transposed
            && !b.transposed
            && a.rows == b.rows
            && a.lanes_m == b.lanes_m
            && a.lanes_n == b.lanes_n
            && a.rows_per_lane == b.rows_per_lane
    }

    #[inline]
    const fn coords(&self, lane: usize, slot: usize) -> [usize; 2] {
        let lm = lane / self.lanes_n;
        let ln = lane % self.lanes_n;
        let v = slot % self.vec_n;
        let rep = (slot / self.vec_n) % self.col_repeats;
        let i = slot / (self.vec_n * self.col_repeats);
        let pr = lm * self.rows_per_lane + i;
        let pc = if self.replicate_n {
            rep * self.vec_n + v
        } else {
            rep * self.lanes_n * self.vec_n + ln * self.vec_n + v
        };
        if self.transposed { [pc, pr] } else { [pr, pc] }
    }
}

/// Lookup tables for one encoding.
#[derive(Debug)]
pub struct TileDistribution {
    encoding: Encoding,
    slots: usize,
    slot_coords: Vec<[usize; 2]>,
    coord_owner: Vec<(usize, usize)>,
    row_projection: OnceLock<Arc<TileDistribution>>,
}

impl PartialEq for TileDistribution {
    fn eq(&self, other: &Self) -> bool {
        self.encoding == other.encoding && self.slot_coords == other.slot_coords
    }
}

impl TileDistribution {
    /// # Panics
    /// When `encoding` does not describe a valid partition.
    pub fn new(encoding: Encoding) -> Self {
        assert!(encoding.is_valid(), "invalid encoding {encoding:?}");
        let slots = encoding.slots_per_lane();
        let lanes = encoding.block_size();
        let slot_coords: Vec<[usize; 2]> = (0..lanes * slots)
            .map(|i| encoding.coords(i / slots, i % slots))
            .collect();
        Self::from_tables(encoding, slots, slot_coords)
    }

    pub fn shared(encoding: Encoding) -> Arc<Self> {
        Arc::new(Self::new(encoding))
    }

    fn from_tables(encoding: Encoding, slots: usize, slot_coords: Vec<[usize; 2]>) -> Self {
        let mut coord_owner = vec![(usize::MAX, usize::MAX); encoding.rows * encoding.cols];
        // Walk backwards so replicated coordinates keep their lowest-lane owner.
        for (i, &[r, c]) in slot_coords.iter().enumerate().rev() {
            coord_owner[r * encoding.cols + c] = (i / slots, i % slots);
        }
        debug_assert!(coord_owner.iter().all(|&(lane, _)| lane != usize::MAX));
        Self {
            encoding,
            slots,
            slot_coords,
            coord_owner,
            row_projection: OnceLock::new(),
        }
    }

    pub fn encoding(&self) -> &Encoding {
        &self.encoding
    }

    pub fn lengths(&self) -> [usize; 2] {
        [self.encoding.rows, self.encoding.cols]
    }

    pub fn block_size(&self) -> usize {
        self.encoding.block_size()
    }

    pub fn slots_per_lane(&self) -> usize {
        self.slots
    }

    /// Logical coordinate held by `lane` in `slot`.
    #[inline]
    pub fn coords(&self, lane: usize, slot: usize) -> [usize; 2] {
        self.slot_coords[lane * self.slots + slot]
    }

    /// `(lane, slot)` holding logical `(r, c)`. For replicated tiles this is
    /// the lowest lane of the column group.
    #[inline]
    pub fn owner(&self, r: usize, c: usize) -> (usize, usize) {
        self.coord_owner[r * self.encoding.cols + c]
    }

    /// Slot in `lane` holding row `r` of a row projection.
    #[inline]
    pub fn row_slot(&self, lane: usize, r: usize) -> usize {
        let lm = lane / self.encoding.lanes_n;
        r - lm * self.encoding.rows_per_lane
    }

    pub fn row_projection(&self) -> Arc<TileDistribution> {
        self.row_projection
            .get_or_init(|| TileDistribution::shared(self.encoding.row_projection()))
            .clone()
    }

    pub fn rows_compatible(&self, other: &TileDistribution) -> bool {
        Encoding::rows_compatible(&self.encoding, &other.encoding)
    }

    /// Same lane ownership, each lane's slots reordered row-major. Moving a
    /// tensor into this distribution never crosses lanes.
    pub fn shuffled(&self) -> TileDistribution {
        let mut slot_coords = self.slot_coords.clone();
        for lane in slot_coords.chunks_mut(self.slots) {
            lane.sort_unstable();
        }
        Self::from_tables(self.encoding, self.slots, slot_coords)
    }

    /// Every lane owns every element at most once and every element has an owner.
    pub fn is_partition(&self) -> bool {
        let mut seen = vec![false; self.encoding.rows * self.encoding.cols];
        for &[r, c] in &self.slot_coords {
            let idx = r * self.encoding.cols + c;
            if seen[idx] {
                return false;
            }
            seen[idx] = true;
        }
        seen.into_iter().all(|s| s)
    }
}
