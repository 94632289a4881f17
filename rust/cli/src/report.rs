//! What a run measured, printable as text or JSON.

use fmha::kernel::LaunchReport;
use fmha_config::RunConfig;
use serde::Serialize;

#[derive(Clone, Debug, Serialize)]
pub struct KernelLaunch {
    pub kernel: &'static str,
    pub grid: usize,
    pub block_size: usize,
    pub smem_bytes: usize,
}

impl KernelLaunch {
    pub fn new(kernel: &'static str, report: &LaunchReport) -> Self {
        Self {
            kernel,
            grid: report.grid,
            block_size: report.block_size,
            smem_bytes: report.smem_bytes,
        }
    }
}

/// Result of comparing one output tensor against the reference.
#[derive(Clone, Debug, Default, Serialize, PartialEq)]
pub struct Verification {
    pub checked: usize,
    pub mismatches: usize,
    pub max_abs_err: f64,
    /// Flat index of the first mismatch.
    pub first_mismatch: Option<usize>,
}

impl Verification {
    /// `|a - e| <= atol + rtol·|e|`, with equal infinities matching.
    pub fn compare(
        actual: impl IntoIterator<Item = f64>,
        expected: &[f64],
        rtol: f64,
        atol: f64,
    ) -> Self {
        let mut v = Self::default();
        for (i, (a, &e)) in actual.into_iter().zip(expected).enumerate() {
            v.checked += 1;
            if a == e {
                continue;
            }
            let err = (a - e).abs();
            if err.is_finite() {
                v.max_abs_err = v.max_abs_err.max(err);
            }
            // NaN fails the comparison.
            let within = err <= atol + rtol * e.abs();
            if !within {
                v.mismatches += 1;
                v.first_mismatch.get_or_insert(i);
            }
        }
        v
    }

    pub fn passed(&self) -> bool {
        self.mismatches == 0
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct RunReport {
    pub name: String,
    pub batch: usize,
    pub nhead: usize,
    pub seqlen_q: usize,
    pub seqlen_k: usize,
    pub hdim: usize,
    pub dtype: String,
    pub mask: String,
    pub bias: bool,
    pub num_splits: usize,
    pub v_layout: String,
    pub launches: Vec<KernelLaunch>,
    pub time_ms: f64,
    pub tflops: f64,
    pub o: Option<Verification>,
    pub lse: Option<Verification>,
}

impl RunReport {
    pub fn new(cfg: &RunConfig, launches: Vec<KernelLaunch>, time_ms: f64) -> Self {
        Self {
            name: cfg.name.clone(),
            batch: cfg.batch,
            nhead: cfg.nhead,
            seqlen_q: cfg.seqlen_q,
            seqlen_k: cfg.seqlen_k(),
            hdim: cfg.hdim,
            dtype: cfg.dtype.to_string(),
            mask: cfg.mask.to_string(),
            bias: cfg.bias,
            num_splits: cfg.num_splits,
            v_layout: cfg.v_layout.to_string(),
            launches,
            time_ms,
            tflops: cfg.flops() as f64 / (time_ms * 1e-3) / 1e12,
            o: None,
            lse: None,
        }
    }

    /// False when any checked tensor has a mismatch; unchecked runs pass.
    pub fn passed(&self) -> bool {
        self.o.as_ref().is_none_or(Verification::passed)
            && self.lse.as_ref().is_none_or(Verification::passed)
    }

    pub fn print(&self) {
        println!("{}", self.name);
        println!(
            "  b={} h={} s_q={} s_k={} d={} {} mask={} bias={} splits={} v={}",
            self.batch,
            self.nhead,
            self.seqlen_q,
            self.seqlen_k,
            self.hdim,
            self.dtype,
            self.mask,
            self.bias,
            self.num_splits,
            self.v_layout
        );
        for launch in &self.launches {
            println!(
                "  {}: grid={} block={} smem={}B",
                launch.kernel, launch.grid, launch.block_size, launch.smem_bytes
            );
        }
        println!("  time: {:.3} ms, {:.4} TFLOP/s", self.time_ms, self.tflops);
        for (name, check) in [("o", &self.o), ("lse", &self.lse)] {
            match check {
                Some(v) if v.passed() => {
                    println!("  {name}: ok (max abs err {:.3e})", v.max_abs_err);
                }
                Some(v) => println!(
                    "  {name}: {} of {} mismatched, first at {:?}, max abs err {:.3e}",
                    v.mismatches, v.checked, v.first_mismatch, v.max_abs_err
                ),
                None => {}
            }
        }
    }
}
