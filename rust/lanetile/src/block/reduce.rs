use crate::{element::Element, tiles::DistributedTensor};

/// BlockReduce, first pass: every lane folds the elements it holds into one
/// partial per row. The result lives on the row projection of `tensor`'s
/// distribution; lanes in the same column group hold different partials until
/// [`block_tile_reduce_sync`] runs.
pub fn block_tile_reduce<T: Element>(
    tensor: &DistributedTensor<T>,
    identity: T,
    f: impl Fn(T, T) -> T,
) -> DistributedTensor<T> {
    debug_assert!(!tensor.distribution().encoding().transposed, "reduce along a transposed tile");
    let rows_dist = tensor.distribution().row_projection();
    let mut reduced = DistributedTensor::filled(&rows_dist, identity);
    let dist = tensor.distribution().clone();

    for lane in 0..dist.block_size() {
        for (slot, &v) in tensor.lane(lane).iter().enumerate() {
            let [r, _] = dist.coords(lane, slot);
            let row_slot = rows_dist.row_slot(lane, r);
            reduced.set(lane, row_slot, f(reduced.get(lane, row_slot), v));
        }
    }
    reduced
}

/// BlockReduceSync: butterfly exchange across the `lanes_n` lanes sharing a
/// row. After `log2(lanes_n)` rounds every lane of the group holds the full
/// reduction. `f` must be associative and commutative.
pub fn block_tile_reduce_sync<T: Element>(reduced: &mut DistributedTensor<T>, f: impl Fn(T, T) -> T) {
    let dist = reduced.distribution().clone();
    let enc = *dist.encoding();
    assert!(enc.replicate_n, "sync expects a row projection");
    let slots = dist.slots_per_lane();

    let mut stride = 1;
    while stride < enc.lanes_n {
        // Every lane reads its partner's value from before this round.
        let snapshot = reduced.clone();
        for lane in 0..dist.block_size() {
            let partner = lane ^ stride;
            for slot in 0..slots {
                reduced.set(lane, slot, f(snapshot.get(lane, slot), snapshot.get(partner, slot)));
            }
        }
        stride *= 2;
    }
}
