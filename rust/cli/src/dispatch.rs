//! Maps a runtime [`RunConfig`] onto one compile-time kernel instantiation.

use fmha::problem::{ColMajorV, FmhaDataTypes, FmhaFlags, FmhaFwdProblem, RowMajorV, TileShape};
use fmha_config::{DataType, RunConfig, VLayout};
use half::{bf16, f16};
use lanetile::tiles::{D32, D64, D128, D256};

use crate::{error::CliError, report::RunReport, runner::run_problem};

type Shape64 = TileShape<D64, D64, D32, D64, D32, D64, D256>;
type Shape128 = TileShape<D128, D128, D32, D128, D32, D128, D256>;

/// Head dimensions with a built tile shape.
pub const SUPPORTED_HDIMS: [usize; 2] = [64, 128];

/// Both paddings on and `exp2` softmax, so any sequence length runs.
type Problem<S, T, L, const BIAS: bool, const LSE: bool, const MASK: bool> =
    FmhaFwdProblem<S, FmhaDataTypes<T, f32>, FmhaFlags<true, true, BIAS, LSE, MASK, true>, L>;

macro_rules! dispatch_flags {
    ($cfg:expr, $shape:ty, $t:ty, $layout:ty) => {
        match ($cfg.bias, $cfg.lse, $cfg.mask.is_masking()) {
            (false, false, false) => run_problem::<Problem<$shape, $t, $layout, false, false, false>, $t>($cfg),
            (false, false, true) => run_problem::<Problem<$shape, $t, $layout, false, false, true>, $t>($cfg),
            (false, true, false) => run_problem::<Problem<$shape, $t, $layout, false, true, false>, $t>($cfg),
            (false, true, true) => run_problem::<Problem<$shape, $t, $layout, false, true, true>, $t>($cfg),
            (true, false, false) => run_problem::<Problem<$shape, $t, $layout, true, false, false>, $t>($cfg),
            (true, false, true) => run_problem::<Problem<$shape, $t, $layout, true, false, true>, $t>($cfg),
            (true, true, false) => run_problem::<Problem<$shape, $t, $layout, true, true, false>, $t>($cfg),
            (true, true, true) => run_problem::<Problem<$shape, $t, $layout, true, true, true>, $t>($cfg),
        }
    };
}

macro_rules! dispatch_layout {
    ($cfg:expr, $shape:ty, $t:ty) => {
        match $cfg.v_layout {
            VLayout::RowMajor => dispatch_flags!($cfg, $shape, $t, RowMajorV),
            VLayout::ColMajor => dispatch_flags!($cfg, $shape, $t, ColMajorV),
        }
    };
}

macro_rules! dispatch_hdim {
    ($cfg:expr, $t:ty) => {
        match $cfg.hdim {
            64 => dispatch_layout!($cfg, Shape64, $t),
            128 => dispatch_layout!($cfg, Shape128, $t),
            hdim => Err(CliError::NoInstance(
                $cfg.name.clone(),
                format!("hdim={hdim}, built for {SUPPORTED_HDIMS:?}"),
            )),
        }
    };
}

/// Validates `cfg` and runs it on the instantiation matching its dtype, head
/// dimension, V layout, bias, LSE and mask settings.
pub fn run_config(cfg: &RunConfig) -> Result<RunReport, CliError> {
    cfg.validate()?;
    match cfg.dtype {
        DataType::Fp16 => dispatch_hdim!(cfg, f16),
        DataType::Bf16 => dispatch_hdim!(cfg, bf16),
        DataType::Fp32 => dispatch_hdim!(cfg, f32),
        dtype => Err(CliError::NoInstance(
            cfg.name.clone(),
            format!("dtype {dtype}, built for fp16, bf16 and fp32"),
        )),
    }
}
