use std::fmt;

/// A shared-memory ordering mistake observed while a block ran.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HazardKind {
    /// Read in the same barrier epoch the slot was written.
    ReadAfterWrite,
    /// Written (or async-copied into) in the same epoch another read happened.
    WriteAfterRead,
    /// Read while an async copy into the slot had not been fenced.
    ReadInFlight,
    /// Synchronous write over a slot with an unfenced async copy.
    WriteInFlight,
}

impl fmt::Display for HazardKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ReadAfterWrite => write!(f, "read-after-write"),
            Self::WriteAfterRead => write!(f, "write-after-read"),
            Self::ReadInFlight => write!(f, "read-in-flight"),
            Self::WriteInFlight => write!(f, "write-in-flight"),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Hazard {
    pub kind: HazardKind,
    pub block: usize,
    pub slot: usize,
    pub epoch: u64,
}

impl fmt::Display for Hazard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} on lds slot {} (block {}, epoch {})",
            self.kind, self.slot, self.block, self.epoch
        )
    }
}

/// A contiguous range of shared-memory slot ids. Buffers built from the same
/// region alias each other, the way K and V staging share one LDS allocation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LdsRegion {
    pub base: usize,
    pub slots: usize,
}

#[derive(Clone, Copy, Debug, Default)]
struct SlotState {
    last_read: Option<u64>,
    last_write: Option<u64>,
    in_flight: usize,
}

/// Per-block execution context.
///
/// All lanes of a block advance together, so the context only tracks which
/// barrier epoch the block is in. Each `barrier()` ends an epoch: writes from
/// earlier epochs are visible to every lane, reads from earlier epochs are
/// finished. Shared-memory traffic reports itself here so misplaced or missing
/// barriers and fences are recorded instead of going unnoticed.
#[derive(Debug)]
pub struct BlockCtx {
    block_id: usize,
    block_size: usize,
    epoch: u64,
    slots: Vec<SlotState>,
    hazards: Vec<Hazard>,
}

impl BlockCtx {
    pub fn new(block_id: usize, block_size: usize) -> Self {
        Self {
            block_id,
            block_size,
            epoch: 0,
            slots: Vec::new(),
            hazards: Vec::new(),
        }
    }

    pub fn block_id(&self) -> usize {
        self.block_id
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Reserve `slots` fresh slot ids.
    pub fn lds_region(&mut self, slots: usize) -> LdsRegion {
        let base = self.slots.len();
        self.slots.resize(base + slots, SlotState::default());
        LdsRegion { base, slots }
    }

    /// `block_sync_lds`: every lane waits here; the epoch advances.
    pub fn barrier(&mut self) {
        self.epoch += 1;
    }

    pub fn hazards(&self) -> &[Hazard] {
        &self.hazards
    }

    pub fn take_hazards(&mut self) -> Vec<Hazard> {
        std::mem::take(&mut self.hazards)
    }

    fn record(&mut self, kind: HazardKind, slot: usize) {
        let hazard = Hazard {
            kind,
            block: self.block_id,
            slot,
            epoch: self.epoch,
        };
        tracing::warn!(%hazard, "shared memory hazard");
        self.hazards.push(hazard);
    }

    pub(crate) fn on_read(&mut self, slot: usize) {
        let state = self.slots[slot];
        if state.in_flight > 0 {
            self.record(HazardKind::ReadInFlight, slot);
        } else if state.last_write == Some(self.epoch) {
            self.record(HazardKind::ReadAfterWrite, slot);
        }
        self.slots[slot].last_read = Some(self.epoch);
    }

    pub(crate) fn on_write(&mut self, slot: usize) {
        let state = self.slots[slot];
        if state.in_flight > 0 {
            self.record(HazardKind::WriteInFlight, slot);
        } else if state.last_read == Some(self.epoch) {
            self.record(HazardKind::WriteAfterRead, slot);
        }
        self.slots[slot].last_write = Some(self.epoch);
    }

    pub(crate) fn on_async_issue(&mut self, slot: usize) {
        if self.slots[slot].last_read == Some(self.epoch) {
            self.record(HazardKind::WriteAfterRead, slot);
        }
        self.slots[slot].in_flight += 1;
    }

    pub(crate) fn on_async_commit(&mut self, slot: usize) {
        let state = &mut self.slots[slot];
        state.in_flight = state.in_flight.saturating_sub(1);
        state.last_write = Some(self.epoch);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn barrier_separates_write_from_read() {
        let mut ctx = BlockCtx::new(0, 64);
        let region = ctx.lds_region(1);
        ctx.on_write(region.base);
        ctx.barrier();
        ctx.on_read(region.base);
        assert!(ctx.hazards().is_empty());
    }

    #[test]
    fn missing_barrier_is_recorded() {
        let mut ctx = BlockCtx::new(3, 64);
        let region = ctx.lds_region(2);
        ctx.on_write(region.base + 1);
        ctx.on_read(region.base + 1);
        assert_eq!(
            ctx.hazards(),
            &[Hazard {
                kind: HazardKind::ReadAfterWrite,
                block: 3,
                slot: 1,
                epoch: 0
            }]
        );
    }

    #[test]
    fn overwriting_a_slot_being_read_is_recorded() {
        let mut ctx = BlockCtx::new(0, 64);
        let region = ctx.lds_region(1);
        ctx.on_read(region.base);
        ctx.on_async_issue(region.base);
        assert_eq!(ctx.hazards()[0].kind, HazardKind::WriteAfterRead);

        ctx.barrier();
        ctx.on_read(region.base);
        assert_eq!(ctx.hazards()[1].kind, HazardKind::ReadInFlight);
    }

    #[test]
    fn regions_do_not_overlap() {
        let mut ctx = BlockCtx::new(0, 64);
        let a = ctx.lds_region(3);
        let b = ctx.lds_region(2);
        assert_eq!(a, LdsRegion { base: 0, slots: 3 });
        assert_eq!(b, LdsRegion { base: 3, slots: 2 });
    }
}
