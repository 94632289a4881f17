//! Staging policy of the QR/KS/VS forward pipeline: lane partitions of every
//! register tile, the LDS buffer rotation and the two block GEMMs.

use lanetile::{
    block::{BlockGemm, BlockGemmABt},
    tiles::{DimOrOne, Encoding},
};

use fmha_config::VLayout;

use crate::problem::{FmhaProblem, FmhaShape, KType, VLayoutKind, VType};

type M0<P> = <<P as FmhaProblem>::Shape as FmhaShape>::M0;
type N0<P> = <<P as FmhaProblem>::Shape as FmhaShape>::N0;
type K0<P> = <<P as FmhaProblem>::Shape as FmhaShape>::K0;
type N1<P> = <<P as FmhaProblem>::Shape as FmhaShape>::N1;
type K1<P> = <<P as FmhaProblem>::Shape as FmhaShape>::K1;
type K0BlockLength<P> = <<P as FmhaProblem>::Shape as FmhaShape>::K0BlockLength;
type BlockSize<P> = <<P as FmhaProblem>::Shape as FmhaShape>::BlockSize;

pub trait FmhaPolicy<P: FmhaProblem>: Send + Sync + 'static {
    /// LDS slots shared by K and V staging.
    const NUM_PREFETCH: usize;

    type QkGemm: BlockGemm + Default;
    type KvGemm: BlockGemm + Default;

    /// Q, loaded once for the whole key loop.
    const Q_ENCODING: Encoding =
        Encoding::for_tile(M0::<P>::VALUE, K0BlockLength::<P>::VALUE, BlockSize::<P>::VALUE);
    const S_ACC_ENCODING: Encoding =
        Encoding::for_tile(M0::<P>::VALUE, N0::<P>::VALUE, BlockSize::<P>::VALUE);
    const O_ACC_ENCODING: Encoding =
        Encoding::for_tile(M0::<P>::VALUE, N1::<P>::VALUE, BlockSize::<P>::VALUE);
    /// Row-major V is contiguous along the key axis of its transposed window,
    /// so lanes vectorize down the window's rows.
    const V_ENCODING: Encoding = match P::VLayout::LAYOUT {
        VLayout::RowMajor => {
            Encoding::for_tile_transposed(N1::<P>::VALUE, K1::<P>::VALUE, BlockSize::<P>::VALUE)
        }
        VLayout::ColMajor => Encoding::for_tile(N1::<P>::VALUE, K1::<P>::VALUE, BlockSize::<P>::VALUE),
    };

    /// Softmax state computed on `s_acc` rows scales `o_acc` rows in place.
    const CHECK: () = assert!(
        Encoding::rows_compatible(&Self::S_ACC_ENCODING, &Self::O_ACC_ENCODING),
        "s_acc and o_acc rows live on different lanes"
    );

    /// LDS slot used by each of the `k0_loops + k1_loops` stages of one
    /// outer iteration: K sub-tiles first, then V sub-tiles.
    fn lds_sequence() -> Option<Vec<usize>> {
        search_lds_sequence(
            Self::NUM_PREFETCH,
            <P::Shape as FmhaShape>::K0_LOOPS,
            <P::Shape as FmhaShape>::K1_LOOPS,
        )
    }

    fn k_lds_len() -> usize {
        N0::<P>::VALUE * K0::<P>::VALUE
    }

    fn v_lds_len() -> usize {
        N1::<P>::VALUE * K1::<P>::VALUE
    }

    fn smem_bytes() -> usize {
        let k = Self::k_lds_len() * size_of::<KType<P>>();
        let v = Self::v_lds_len() * size_of::<VType<P>>();
        Self::NUM_PREFETCH * k.max(v)
    }
}

/// Three LDS slots rotated by a searched sequence.
#[derive(Clone, Copy, Debug, Default)]
pub struct DefaultPolicy;

impl<P: FmhaProblem> FmhaPolicy<P> for DefaultPolicy {
    const NUM_PREFETCH: usize = 3;

    type QkGemm = BlockGemmABt;
    type KvGemm = BlockGemmABt;
}

/// Lowest-numbered slot sequence of length `k0_loops + k1_loops` such that no
/// stage writes a slot another stage may still be reading without a barrier
/// in between:
///
/// - consecutive stages use different slots;
/// - K prefetch `i + 1` does not overwrite the slot K stage `i - 1` read;
/// - the first K prefetch of the next iteration does not overwrite the last
///   V stage (`seq[1] != seq[L - 1]` with more than one K stage);
/// - the K block prefetched at the end of an iteration does not land in the
///   slot of the last V stage (`seq[0] != seq[L - 1]`).
pub fn search_lds_sequence(slots: usize, k0_loops: usize, k1_loops: usize) -> Option<Vec<usize>> {
    let len = k0_loops + k1_loops;
    if slots == 0 || k0_loops == 0 || k1_loops == 0 {
        return None;
    }
    let mut seq = Vec::with_capacity(len);
    extend_sequence(&mut seq, slots, k0_loops, len).then_some(seq)
}

fn extend_sequence(seq: &mut Vec<usize>, slots: usize, k0_loops: usize, len: usize) -> bool {
    let i = seq.len();
    if i == len {
        return true;
    }
    for slot in 0..slots {
        if admissible(seq, slot, k0_loops, len) {
            seq.push(slot);
            if extend_sequence(seq, slots, k0_loops, len) {
                return true;
            }
            seq.pop();
        }
    }
    false
}

/// Whether `slot` may follow `seq` at position `seq.len()`.
fn admissible(seq: &[usize], slot: usize, k0_loops: usize, len: usize) -> bool {
    let i = seq.len();
    if i >= 1 && seq[i - 1] == slot {
        return false;
    }
    // K prefetch into stage i happens while stage i - 2 is being consumed.
    if i >= 2 && i < k0_loops && seq[i - 2] == slot {
        return false;
    }
    if i == len - 1 {
        if seq[0] == slot {
            return false;
        }
        if k0_loops > 1 && seq[1] == slot {
            return false;
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use half::f16;
    use lanetile::tiles::{D32, D64, D128, D256};
    use test_case::test_case;

    use super::*;
    use crate::problem::{ColMajorV, FmhaDataTypes, FmhaFlags, FmhaFwdProblem, RowMajorV, TileShape};

    type Shape = TileShape<D128, D128, D32, D128, D32, D128, D256>;
    type Flags = FmhaFlags<true, true, false, true, false, true>;
    type Row = FmhaFwdProblem<Shape, FmhaDataTypes<f16, f32>, Flags, RowMajorV>;
    type Col = FmhaFwdProblem<Shape, FmhaDataTypes<f16, f32>, Flags, ColMajorV>;

    fn check(seq: &[usize], k0_loops: usize) {
        let len = seq.len();
        for i in 1..len {
            assert_ne!(seq[i], seq[i - 1], "{seq:?}: stage {i}");
        }
        for i in 1..k0_loops.saturating_sub(1) {
            assert_ne!(seq[i + 1], seq[i - 1], "{seq:?}: K prefetch {i}");
        }
        if k0_loops > 1 {
            assert_ne!(seq[1], seq[len - 1], "{seq:?}: next K prefetch");
        }
        assert_ne!(seq[0], seq[len - 1], "{seq:?}: next K block");
    }

    #[test_case(3, 2, 2, Some(vec![0, 1, 0, 2]) ; "three slots square")]
    #[test_case(2, 1, 1, Some(vec![0, 1]) ; "single stages")]
    #[test_case(2, 2, 2, None ; "two slots cannot rotate two K stages")]
    #[test_case(2, 1, 3, Some(vec![0, 1, 0, 1]) ; "two slots with a single K stage")]
    #[test_case(2, 1, 4, None ; "two slots with odd length")]
    #[test_case(3, 3, 1, None ; "three distinct K slots leave none for V")]
    fn sequence_search(slots: usize, k0: usize, k1: usize, expected: Option<Vec<usize>>) {
        assert_eq!(search_lds_sequence(slots, k0, k1), expected);
    }

    #[test]
    fn searched_sequences_satisfy_every_constraint() {
        for k0 in 1..=8 {
            for k1 in 2..=8 {
                let seq = search_lds_sequence(3, k0, k1)
                    .unwrap_or_else(|| panic!("no sequence for k0={k0}, k1={k1}"));
                assert_eq!(seq.len(), k0 + k1);
                check(&seq, k0);
            }
        }
    }

    #[test]
    fn default_policy_layout() {
        assert_eq!(<DefaultPolicy as FmhaPolicy<Row>>::lds_sequence().map(|s| s.len()), Some(8));
        // 3 slots of max(128 * 32, 128 * 32) halves
        assert_eq!(<DefaultPolicy as FmhaPolicy<Row>>::smem_bytes(), 3 * 128 * 32 * 2);
        assert!(<DefaultPolicy as FmhaPolicy<Row>>::V_ENCODING.transposed);
        assert!(!<DefaultPolicy as FmhaPolicy<Col>>::V_ENCODING.transposed);
        let () = <DefaultPolicy as FmhaPolicy<Row>>::CHECK;
    }

    #[test]
    fn narrow_head_dim_fits_the_same_block() {
        type Narrow = FmhaFwdProblem<
            TileShape<D64, D64, D32, D64, D32, D64, D256>,
            FmhaDataTypes<f16, f32>,
            Flags,
        >;
        let s = <DefaultPolicy as FmhaPolicy<Narrow>>::S_ACC_ENCODING;
        let o = <DefaultPolicy as FmhaPolicy<Narrow>>::O_ACC_ENCODING;
        assert_eq!(s.block_size(), 256);
        assert!(Encoding::rows_compatible(&s, &o));
    }
}
