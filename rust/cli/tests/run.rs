//! End-to-end runs through the dispatch, kept small enough for debug builds.

use fmha::FmhaError;
use fmha_cli::{CliError, run_config};
use fmha_config::{DataType, MaskSpec, RunConfig, SweepConfig, VLayout};
use test_case::test_case;

fn small(name: &str) -> RunConfig {
    RunConfig {
        name: name.into(),
        batch: 1,
        nhead: 2,
        seqlen_q: 80,
        seqlen_k: Some(100),
        hdim: 64,
        dtype: DataType::Fp32,
        warmup: 0,
        repeat: 1,
        seed: 7,
        ..RunConfig::default()
    }
}

#[test_case(DataType::Fp32, "0" ; "fp32 no mask")]
#[test_case(DataType::Bf16, "t" ; "bf16 causal")]
#[test_case(DataType::Fp16, "b:16,0" ; "fp16 left window")]
fn single_pass_matches_reference(dtype: DataType, mask: &str) {
    let cfg = RunConfig {
        dtype,
        mask: mask.parse().unwrap(),
        ..small("single_pass")
    };
    let report = run_config(&cfg).unwrap();
    assert_eq!(report.launches.len(), 1);
    assert_eq!(report.launches[0].kernel, "fmha_fwd");
    assert!(report.passed(), "{:?} {:?}", report.o, report.lse);
    assert_eq!(report.o.as_ref().unwrap().checked, 2 * 80 * 64);
    assert_eq!(report.lse.as_ref().unwrap().checked, 2 * 80);
}

#[test]
fn splitkv_runs_two_kernels() {
    let cfg = RunConfig {
        num_splits: 3,
        mask: MaskSpec::causal_bottom_right(),
        ..small("splitkv")
    };
    let report = run_config(&cfg).unwrap();
    let kernels: Vec<_> = report.launches.iter().map(|l| l.kernel).collect();
    assert_eq!(kernels, ["fmha_fwd_splitkv", "fmha_fwd_splitkv_combine"]);
    assert_eq!(report.launches[0].grid, 2 * 3 * 2);
    assert!(report.passed(), "{:?} {:?}", report.o, report.lse);
}

#[test]
fn hdim_128_col_major_with_bias() {
    let cfg = RunConfig {
        hdim: 128,
        bias: true,
        v_layout: VLayout::ColMajor,
        mask: "t:32,8".parse().unwrap(),
        ..small("d128")
    };
    let report = run_config(&cfg).unwrap();
    assert_eq!(report.launches[0].block_size, 256);
    assert!(report.passed(), "{:?} {:?}", report.o, report.lse);
}

#[test]
fn lse_off_skips_the_lse_check() {
    let cfg = RunConfig {
        lse: false,
        ..small("no_lse")
    };
    let report = run_config(&cfg).unwrap();
    assert!(report.lse.is_none());
    assert!(report.o.is_some());
}

#[test]
fn no_verify_only_times() {
    let cfg = RunConfig {
        no_verify: true,
        repeat: 2,
        ..small("timing")
    };
    let report = run_config(&cfg).unwrap();
    assert!(report.o.is_none() && report.lse.is_none());
    assert!(report.time_ms > 0.0);
}

#[test]
fn unbuilt_instances_are_reported() {
    let err = run_config(&RunConfig {
        hdim: 96,
        ..small("hdim96")
    })
    .unwrap_err();
    assert!(matches!(err, CliError::NoInstance(..)));
    assert!(err.to_string().contains("hdim=96"), "{err}");

    let err = run_config(&RunConfig {
        dtype: DataType::Fp8,
        ..small("fp8")
    })
    .unwrap_err();
    assert!(err.to_string().contains("dtype fp8"), "{err}");
}

#[test]
fn invalid_configs_are_rejected_before_launch() {
    let err = run_config(&RunConfig {
        num_splits: 0,
        ..small("zero_splits")
    })
    .unwrap_err();
    assert!(matches!(err, CliError::Config(_)));

    let err = run_config(&RunConfig {
        num_splits: 9,
        ..small("nine_splits")
    })
    .unwrap_err();
    assert!(
        matches!(&err, CliError::Kernel(FmhaError::UnsupportedArgument(msg)) if msg.contains("num_splits=9")),
        "{err}"
    );
}

#[test]
fn sweep_file_runs_every_entry() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("sweep.toml");
    std::fs::write(
        &path,
        r#"
[defaults]
batch = 1
nhead = 1
hdim = 64
dtype = "fp32"
seqlen_q = 64
warmup = 0
repeat = 1

[[runs]]
name = "plain"

[[runs]]
name = "split"
mask = "t"
num_splits = 2
seqlen_k = 130
"#,
    )
    .unwrap();

    let sweep = SweepConfig::load(&path).unwrap();
    let reports: Vec<_> = sweep.runs.iter().map(|r| run_config(r).unwrap()).collect();
    assert_eq!(reports[0].name, "plain");
    assert_eq!(reports[1].seqlen_k, 130);
    assert!(reports.iter().all(|r| r.passed()));
}
