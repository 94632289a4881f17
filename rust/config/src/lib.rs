//! Configuration types shared between the FMHA crates.

mod run;
mod types;

pub use run::*;
pub use types::*;

#[cfg(test)]
mod tests {
    use tempfile::tempdir;
    use test_case::test_case;

    use super::*;

    #[test]
    fn test_run_config_default() {
        let run = RunConfig::default();
        assert_eq!(run.hdim, 128);
        assert_eq!(run.seqlen_k(), run.seqlen_q);
        assert_eq!(run.num_splits, 1);
        assert!(run.lse);
        assert!((run.scale() - 1.0 / 128f32.sqrt()).abs() < 1e-7);
        run.validate().unwrap();
    }

    #[test_case(0.0 ; "zero")]
    #[test_case(-0.125 ; "negative")]
    #[test_case(f32::NAN ; "nan")]
    fn test_run_rejects_scale(scale: f32) {
        let run = RunConfig {
            scale: Some(scale),
            ..RunConfig::default()
        };
        assert!(run.validate().is_err());
    }

    #[test]
    fn test_enum_serde() {
        assert_eq!(
            serde_json::from_str::<DataType>("\"bf16\"").unwrap(),
            DataType::Bf16
        );
        assert_eq!(
            serde_json::from_str::<VLayout>("\"col-major\"").unwrap(),
            VLayout::ColMajor
        );
        assert_eq!(
            serde_json::from_str::<MaskSpec>("\"b\"").unwrap(),
            MaskSpec::causal_bottom_right()
        );
    }

    #[test_case(DataType::Fp32, 1e-3, 1e-3)]
    #[test_case(DataType::Fp64, 1e-6, 1e-6)]
    #[test_case(DataType::Fp16, 1e-3, 1e-3)]
    #[test_case(DataType::Bf16, 5e-2, 5e-2)]
    #[test_case(DataType::Int8, 1e-1, 1e-1)]
    #[test_case(DataType::Fp8, 1e-1, 16.1)]
    #[test_case(DataType::Bf8, 1.5e-1, 8192.1)]
    fn test_tolerances(dtype: DataType, rtol: f64, atol: f64) {
        assert_eq!(dtype.rtol(), rtol);
        assert_eq!(dtype.atol(), atol);
    }

    #[test_case("0", MaskSpec::None)]
    #[test_case("none", MaskSpec::None)]
    #[test_case("1", MaskSpec::causal_top_left())]
    #[test_case("t", MaskSpec::causal_top_left())]
    #[test_case("2", MaskSpec::causal_bottom_right())]
    #[test_case("b", MaskSpec::causal_bottom_right())]
    #[test_case("t:64,0", MaskSpec::Window { left: 64, right: 0, bottom_right: false })]
    #[test_case("b:-1,16", MaskSpec::Window { left: -1, right: 16, bottom_right: true })]
    fn test_mask_from_str(s: &str, expected: MaskSpec) {
        assert_eq!(s.parse::<MaskSpec>().unwrap(), expected);
    }

    #[test]
    fn test_mask_rejects_garbage() {
        assert!("x".parse::<MaskSpec>().is_err());
        assert!("q:1,2".parse::<MaskSpec>().is_err());
        assert!("t:1".parse::<MaskSpec>().is_err());
        assert!("t:a,2".parse::<MaskSpec>().is_err());
    }

    #[test]
    fn test_mask_display_roundtrip() {
        for s in ["none", "t", "b", "t:32,4", "b:-1,8"] {
            let mask: MaskSpec = s.parse().unwrap();
            assert_eq!(mask.to_string(), s);
        }
    }

    #[test]
    fn test_sweep_defaults_applied() {
        let sweep = SweepConfig::parse(
            r#"
[defaults]
hdim = 64
dtype = "bf16"
seqlen_q = 256

[[runs]]
name = "causal"
mask = "t"

[[runs]]
hdim = 128
num_splits = 4
"#,
        )
        .unwrap();
        assert_eq!(sweep.runs.len(), 2);
        assert_eq!(sweep.runs[0].name, "causal");
        assert_eq!(sweep.runs[0].hdim, 64);
        assert_eq!(sweep.runs[0].dtype, DataType::Bf16);
        assert_eq!(sweep.runs[0].mask, MaskSpec::causal_top_left());

        assert_eq!(sweep.runs[1].name, "run-1");
        assert_eq!(sweep.runs[1].hdim, 128); // Overridden
        assert_eq!(sweep.runs[1].seqlen_q, 256);
        assert_eq!(sweep.runs[1].num_splits, 4);
    }

    #[test]
    fn test_sweep_rejects_invalid_run() {
        let err = SweepConfig::parse(
            r#"
[[runs]]
name = "bad"
num_splits = 0
"#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(name, _) if name == "bad"));
        assert!(SweepConfig::parse("").is_err());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("run.toml");
        std::fs::write(&path, "name = \"file\"\nseqlen_k = 300\nv_layout = \"col-major\"\n").unwrap();
        let run = RunConfig::load(&path).unwrap();
        assert_eq!(run.name, "file");
        assert_eq!(run.seqlen_k(), 300);
        assert_eq!(run.v_layout, VLayout::ColMajor);

        let missing = RunConfig::load(dir.path().join("missing.toml")).unwrap_err();
        assert!(matches!(missing, ConfigError::Io(..)));
    }
}
