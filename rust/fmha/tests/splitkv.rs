//! SplitKV forward + combine against the single-pass forward and the
//! reference.

mod common;

use common::*;
use fmha::{
    FmhaError,
    kernel::{FmhaCombineArgs, FmhaCombineKernel, FmhaDims, FmhaFwdSplitKvArgs, FmhaFwdSplitKvKernel, MAX_SPLITS},
    policy::DefaultPolicy,
    problem::{CombineProblemOf, RowMajorV, VLayoutKind},
};
use fmha_config::MaskSpec;
use half::f16;
use lanetile::test_utils::slices_eq_with;
use test_case::test_case;

#[test_case(1 ; "one split")]
#[test_case(2 ; "two splits")]
#[test_case(3 ; "uneven splits")]
#[test_case(8 ; "max splits")]
fn splits_match_single_pass(num_splits: usize) {
    type P = Problem<f32, Flags<true, false, false, false>>;
    let dims = FmhaDims::new(2, 2, 64, 200, 32);
    let inputs = Inputs::<f32>::random(&format!("splits_{num_splits}"), dims, false);
    let scale = default_scale(32);

    let single = run_fwd::<P, f32, DefaultPolicy>(&inputs, scale, MaskSpec::None).unwrap();
    let split = run_splitkv::<P, f32>(&inputs, scale, MaskSpec::None, num_splits).unwrap();

    slices_eq_with(&split.o, &single.o, 1e-5, 1e-5, "o");
    slices_eq_with(&split.lse, &single.lse, 1e-5, 1e-5, "lse");
}

#[test_case("t", 96, 96, 3 ; "causal top left")]
#[test_case("b", 40, 130, 4 ; "causal bottom right")]
#[test_case("t:16,16", 96, 160, 2 ; "sliding window")]
fn masked_splits_match_reference(mask: &str, seqlen_q: usize, seqlen_k: usize, num_splits: usize) {
    type P = Problem<f16, Flags<true, false, true, false>>;
    let spec: MaskSpec = mask.parse().unwrap();
    let name = format!("masked_splits_{mask}");
    let inputs = Inputs::<f16>::random(&name, FmhaDims::new(1, 2, seqlen_q, seqlen_k, 32), false);
    let scale = default_scale(32);

    let out = run_splitkv::<P, f16>(&inputs, scale, spec, num_splits).unwrap();
    assert_matches_reference(&out, &inputs.reference(RowMajorV::LAYOUT, scale, spec), &name);
}

#[test]
fn more_splits_than_key_tiles() {
    // One key tile: every split but the first is empty.
    type P = Problem<f16, Flags<false, false, false, false>>;
    let inputs = Inputs::<f16>::random("empty_splits", FmhaDims::new(1, 1, 32, 32, 32), false);
    let scale = default_scale(32);
    let out = run_splitkv::<P, f16>(&inputs, scale, MaskSpec::None, 4).unwrap();
    assert_matches_reference(
        &out,
        &inputs.reference(RowMajorV::LAYOUT, scale, MaskSpec::None),
        "empty_splits",
    );
}

#[test_case(1 ; "one split")]
#[test_case(2 ; "two splits")]
fn empty_key_sequence(num_splits: usize) {
    type P = Problem<f32, Flags<false, false, false, false>>;
    let dims = FmhaDims::new(1, 1, 32, 0, 32);
    let inputs = Inputs::<f32>::random("empty_keys", dims, false);
    let out = run_splitkv::<P, f32>(&inputs, 1.0, MaskSpec::None, num_splits).unwrap();
    assert!(out.o.iter().all(|&x| x == 0.0));
    assert!(out.lse.iter().all(|&x| x == f32::NEG_INFINITY));

    let single = run_fwd::<P, f32, DefaultPolicy>(&inputs, 1.0, MaskSpec::None).unwrap();
    assert_eq!(out.o, single.o);
}

#[test]
fn empty_splits_store_zero_and_neg_inf() {
    type P = Problem<f32, Flags<false, false, false, false>>;
    let dims = FmhaDims::new(1, 1, 32, 32, 32);
    let inputs = Inputs::<f32>::random("partials", dims, false);
    let mut o_acc = vec![1.0f32; dims.o_acc_len(3)];
    let mut lse_acc = vec![1.0f32; dims.lse_acc_len(3)];
    FmhaFwdSplitKvKernel::<P>::new()
        .unwrap()
        .launch(
            &FmhaFwdSplitKvArgs {
                fwd: inputs.fwd_args(0.2, MaskSpec::None),
                num_splits: 3,
            },
            &mut o_acc,
            &mut lse_acc,
        )
        .unwrap();

    let per_split = dims.o_len();
    assert!(lse_acc[..32].iter().all(|x| x.is_finite()));
    assert!(o_acc[per_split..].iter().all(|&x| x == 0.0));
    assert!(lse_acc[32..].iter().all(|&x| x == f32::NEG_INFINITY));
}

#[test]
fn fully_masked_rows_survive_the_combine() {
    type P = Problem<f32, Flags<true, false, true, false>>;
    let dims = FmhaDims::new(1, 1, 64, 40, 32);
    let mask = MaskSpec::causal_bottom_right();
    let inputs = Inputs::<f32>::random("masked_combine", dims, false);
    let scale = default_scale(32);

    let out = run_splitkv::<P, f32>(&inputs, scale, mask, 2).unwrap();
    assert!(out.o.iter().all(|x| !x.is_nan()));
    assert!(out.lse[..24].iter().all(|&x| x == f32::NEG_INFINITY));
    assert!(out.o[..24 * 32].iter().all(|&x| x == 0.0));
    assert_matches_reference(&out, &inputs.reference(RowMajorV::LAYOUT, scale, mask), "masked_combine");
}

#[test]
fn split_count_is_bounded() {
    type P = Problem<f16, Flags<false, false, false, false>>;
    let dims = FmhaDims::new(1, 1, 32, 32, 32);
    let inputs = Inputs::<f16>::random("bounds", dims, false);
    let kernel = FmhaFwdSplitKvKernel::<P>::new().unwrap();

    for num_splits in [0, MAX_SPLITS + 1] {
        let mut o_acc = vec![0.0f32; dims.o_acc_len(num_splits)];
        let mut lse_acc = vec![0.0f32; dims.lse_acc_len(num_splits)];
        let err = kernel
            .launch(
                &FmhaFwdSplitKvArgs {
                    fwd: inputs.fwd_args(0.1, MaskSpec::None),
                    num_splits,
                },
                &mut o_acc,
                &mut lse_acc,
            )
            .unwrap_err();
        assert!(matches!(err, FmhaError::UnsupportedArgument(_)), "{err}");
    }

    // The combine block holds at most `MaxSplits` partials.
    let num_splits = 9;
    let o_acc = vec![0.0f32; dims.o_acc_len(num_splits)];
    let lse_acc = vec![0.0f32; dims.lse_acc_len(num_splits)];
    let mut o = vec![f16::ZERO; dims.o_len()];
    let mut lse = vec![0.0f32; dims.lse_len()];
    let err = FmhaCombineKernel::<CombineProblemOf<P, MaxSplits>>::new()
        .launch(
            &FmhaCombineArgs {
                lse_acc: &lse_acc,
                o_acc: &o_acc,
                dims,
                num_splits,
            },
            &mut o,
            Some(lse.as_mut_slice()),
        )
        .unwrap_err();
    assert!(err.to_string().contains("num_splits=9"), "{err}");
}
