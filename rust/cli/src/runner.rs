//! One run of one kernel instantiation: inputs, launches, check and timing.

use std::time::Instant;

use fmha::{
    kernel::{
        FmhaCombineArgs, FmhaCombineKernel, FmhaDims, FmhaFwdArgs, FmhaFwdKernel,
        FmhaFwdSplitKvArgs, FmhaFwdSplitKvKernel,
    },
    problem::{CombineProblemOf, FmhaDataTypes, FmhaProblem, FmhaTraits},
    reference,
};
use fmha_config::RunConfig;
use lanetile::{element::Element, tiles::D8};
use rand::{Rng, SeedableRng, rngs::StdRng};
use tracing::{debug, info, warn};

use crate::{
    error::CliError,
    report::{KernelLaunch, RunReport, Verification},
};

/// Partials the combine block holds.
pub type MaxSplits = D8;

/// Q, K, V and bias of a run, uniform in `[-1, 1)`.
pub struct Inputs<T> {
    pub dims: FmhaDims,
    pub q: Vec<T>,
    pub k: Vec<T>,
    pub v: Vec<T>,
    pub bias: Option<Vec<T>>,
}

fn random_vec<T: Element>(rng: &mut StdRng, len: usize) -> Vec<T> {
    (0..len)
        .map(|_| T::from_f64(rng.random_range(-1.0..1.0)))
        .collect()
}

impl<T: Element> Inputs<T> {
    pub fn random(seed: u64, dims: FmhaDims, with_bias: bool) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let q = random_vec(&mut rng, dims.q_len());
        let k = random_vec(&mut rng, dims.k_len());
        let v = random_vec(&mut rng, dims.v_len());
        let bias = with_bias.then(|| random_vec(&mut rng, dims.bias_len()));
        Self { dims, q, k, v, bias }
    }
}

/// Output buffers and the launch sequence for either the single-pass kernel
/// or splitKV followed by the combine.
enum Launcher<P: FmhaProblem> {
    Fwd(FmhaFwdKernel<P>),
    SplitKv {
        split: FmhaFwdSplitKvKernel<P>,
        combine: FmhaCombineKernel<CombineProblemOf<P, MaxSplits>>,
        o_acc: Vec<f32>,
        lse_acc: Vec<f32>,
    },
}

impl<T, P> Launcher<P>
where
    T: Element,
    P: FmhaProblem<Types = FmhaDataTypes<T, f32>>,
{
    fn new(dims: &FmhaDims, num_splits: usize) -> fmha::Result<Self> {
        if num_splits == 1 {
            return Ok(Self::Fwd(FmhaFwdKernel::new()?));
        }
        Ok(Self::SplitKv {
            split: FmhaFwdSplitKvKernel::new()?,
            combine: FmhaCombineKernel::new(),
            o_acc: vec![0.0; dims.o_acc_len(num_splits)],
            lse_acc: vec![0.0; dims.lse_acc_len(num_splits)],
        })
    }

    fn launch(
        &mut self,
        args: &FmhaFwdArgs<'_, P>,
        num_splits: usize,
        o: &mut [T],
        lse: Option<&mut [f32]>,
    ) -> fmha::Result<Vec<KernelLaunch>> {
        match self {
            Self::Fwd(kernel) => {
                let report = kernel.launch(args, o, lse)?;
                Ok(vec![KernelLaunch::new("fmha_fwd", &report)])
            }
            Self::SplitKv {
                split,
                combine,
                o_acc,
                lse_acc,
            } => {
                let split_args = FmhaFwdSplitKvArgs {
                    fwd: *args,
                    num_splits,
                };
                let split_report = split.launch(&split_args, o_acc, lse_acc)?;
                let combine_args = FmhaCombineArgs {
                    lse_acc: &lse_acc[..],
                    o_acc: &o_acc[..],
                    dims: args.dims,
                    num_splits,
                };
                let combine_report = combine.launch(&combine_args, o, lse)?;
                Ok(vec![
                    KernelLaunch::new("fmha_fwd_splitkv", &split_report),
                    KernelLaunch::new("fmha_fwd_splitkv_combine", &combine_report),
                ])
            }
        }
    }
}

/// Builds inputs for `cfg`, runs the kernel for `P` `warmup + repeat` times
/// and checks the last output against the f64 reference unless
/// `cfg.no_verify` is set.
pub fn run_problem<P, T>(cfg: &RunConfig) -> Result<RunReport, CliError>
where
    T: Element,
    P: FmhaProblem<Types = FmhaDataTypes<T, f32>>,
{
    let dims = FmhaDims::new(cfg.batch, cfg.nhead, cfg.seqlen_q, cfg.seqlen_k(), cfg.hdim);
    let inputs = Inputs::<T>::random(cfg.seed, dims, cfg.bias);
    let args = FmhaFwdArgs::<P> {
        q: &inputs.q,
        k: &inputs.k,
        v: &inputs.v,
        bias: inputs.bias.as_deref(),
        dims,
        scale: cfg.scale(),
        mask: cfg.mask,
    };

    let store_lse = <P::Traits as FmhaTraits>::STORE_LSE;
    let mut o = vec![T::default(); dims.o_len()];
    let mut lse = vec![0.0f32; if store_lse { dims.lse_len() } else { 0 }];
    let mut launcher = Launcher::<P>::new(&dims, cfg.num_splits)?;

    debug!(name = %cfg.name, ?dims, kernel = std::any::type_name::<P>(), "run");
    let mut launches = Vec::new();
    for _ in 0..cfg.warmup {
        launches = launcher.launch(&args, cfg.num_splits, &mut o, store_lse.then_some(&mut lse[..]))?;
    }
    let start = Instant::now();
    for _ in 0..cfg.repeat {
        launches = launcher.launch(&args, cfg.num_splits, &mut o, store_lse.then_some(&mut lse[..]))?;
    }
    let time_ms = start.elapsed().as_secs_f64() * 1000.0 / cfg.repeat as f64;

    let mut report = RunReport::new(cfg, launches, time_ms);
    info!(
        name = %cfg.name,
        time_ms,
        tflops = report.tflops,
        "timed"
    );

    if !cfg.no_verify {
        let expected = reference::attention(
            &inputs.q,
            &inputs.k,
            &inputs.v,
            inputs.bias.as_deref(),
            &dims,
            cfg.v_layout,
            f64::from(cfg.scale()),
            cfg.mask,
        );
        let (rtol, atol) = (cfg.dtype.rtol(), cfg.dtype.atol());
        let o_check = Verification::compare(o.iter().map(|x| x.into_f64()), &expected.o, rtol, atol);
        let lse_check = store_lse.then(|| {
            Verification::compare(lse.iter().map(|&x| f64::from(x)), &expected.lse, rtol, atol)
        });
        for (tensor, check) in [("o", Some(&o_check)), ("lse", lse_check.as_ref())] {
            if let Some(check) = check
                && !check.passed()
            {
                warn!(
                    name = %cfg.name,
                    tensor,
                    mismatches = check.mismatches,
                    max_abs_err = check.max_abs_err,
                    "output differs from the reference"
                );
            }
        }
        report.o = Some(o_check);
        report.lse = lse_check;
    }
    Ok(report)
}
