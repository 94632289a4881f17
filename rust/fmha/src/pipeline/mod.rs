//! Block pipelines. Each `run` computes one output tile on one simulated
//! block and returns it in registers; storing it is up to the kernel.

mod qr_ks_vs;
mod splitkv_combine;

pub use qr_ks_vs::{FwdArgs, FwdOutput, QrKsVsPipeline};
pub use splitkv_combine::{CombineArgs, CombineOutput, SplitKvCombinePipeline};
