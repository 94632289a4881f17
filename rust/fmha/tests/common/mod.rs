#![allow(dead_code)]

use fmha::{
    kernel::{
        FmhaCombineArgs, FmhaCombineKernel, FmhaDims, FmhaFwdArgs, FmhaFwdKernel,
        FmhaFwdSplitKvArgs, FmhaFwdSplitKvKernel,
    },
    policy::{DefaultPolicy, FmhaPolicy},
    problem::{
        CombineProblemOf, FmhaDataTypes, FmhaFlags, FmhaFwdProblem, FmhaProblem, FmhaTraits,
        RowMajorV, TileShape,
    },
    reference::{self, ReferenceOutput},
};
use fmha_config::{MaskSpec, VLayout};
use lanetile::{
    element::Element,
    test_utils::{TestFloat, random_vec, slices_eq_with, string_to_seed},
    tiles::{D8, D16, D32, D64},
};
use rand::{SeedableRng, rngs::StdRng};

/// 32×32 tiles with 16-wide GEMM steps over 64 lanes: two QK stages and two
/// KV stages per key tile.
pub type Small = TileShape<D32, D32, D16, D32, D16, D32, D64>;
/// Same block with a single stage per GEMM.
pub type SingleStage = TileShape<D32, D32, D32, D32, D32, D32, D64>;

/// `FmhaFlags` with both sequence paddings tied together and LSE stored.
pub type Flags<const PAD: bool, const BIAS: bool, const MASK: bool, const EXP2: bool> =
    FmhaFlags<PAD, PAD, BIAS, true, MASK, EXP2>;

pub type Problem<T, F, L = RowMajorV, S = Small> = FmhaFwdProblem<S, FmhaDataTypes<T, f32>, F, L>;

pub type MaxSplits = D8;

pub struct Inputs<T> {
    pub dims: FmhaDims,
    pub q: Vec<T>,
    pub k: Vec<T>,
    pub v: Vec<T>,
    pub bias: Option<Vec<T>>,
}

impl<T: Element> Inputs<T> {
    /// Uniform values in `[-1, 1)` seeded from `name`.
    pub fn random(name: &str, dims: FmhaDims, with_bias: bool) -> Self {
        let mut rng = StdRng::seed_from_u64(string_to_seed(name));
        let q = random_vec(&mut rng, dims.q_len(), -1.0, 1.0);
        let k = random_vec(&mut rng, dims.k_len(), -1.0, 1.0);
        let v = random_vec(&mut rng, dims.v_len(), -1.0, 1.0);
        let bias = with_bias.then(|| random_vec(&mut rng, dims.bias_len(), -1.0, 1.0));
        Self { dims, q, k, v, bias }
    }

    pub fn reference(&self, layout: VLayout, scale: f32, mask: MaskSpec) -> ReferenceOutput {
        reference::attention(
            &self.q,
            &self.k,
            &self.v,
            self.bias.as_deref(),
            &self.dims,
            layout,
            scale as f64,
            mask,
        )
    }

    pub fn fwd_args<P>(&self, scale: f32, mask: MaskSpec) -> FmhaFwdArgs<'_, P>
    where
        P: FmhaProblem<Types = FmhaDataTypes<T, f32>>,
    {
        FmhaFwdArgs {
            q: &self.q,
            k: &self.k,
            v: &self.v,
            bias: self.bias.as_deref(),
            dims: self.dims,
            scale,
            mask,
        }
    }
}

pub fn default_scale(hdim: usize) -> f32 {
    1.0 / (hdim as f32).sqrt()
}

pub struct FwdResult<T> {
    pub o: Vec<T>,
    pub lse: Vec<f32>,
}

pub fn run_fwd<P, T, Pol>(inputs: &Inputs<T>, scale: f32, mask: MaskSpec) -> fmha::Result<FwdResult<T>>
where
    P: FmhaProblem<Types = FmhaDataTypes<T, f32>>,
    T: Element,
    Pol: FmhaPolicy<P>,
{
    let kernel = FmhaFwdKernel::<P, Pol>::new()?;
    let mut o = vec![T::default(); inputs.dims.o_len()];
    let mut lse = vec![0.0f32; inputs.dims.lse_len()];
    let store_lse = <P::Traits as FmhaTraits>::STORE_LSE;
    kernel.launch(
        &inputs.fwd_args(scale, mask),
        &mut o,
        store_lse.then_some(lse.as_mut_slice()),
    )?;
    Ok(FwdResult { o, lse })
}

/// SplitKV forward followed by the combine step.
pub fn run_splitkv<P, T>(
    inputs: &Inputs<T>,
    scale: f32,
    mask: MaskSpec,
    num_splits: usize,
) -> fmha::Result<FwdResult<T>>
where
    P: FmhaProblem<Types = FmhaDataTypes<T, f32>>,
    T: Element,
{
    let dims = inputs.dims;
    let mut o_acc = vec![0.0f32; dims.o_acc_len(num_splits)];
    let mut lse_acc = vec![0.0f32; dims.lse_acc_len(num_splits)];
    FmhaFwdSplitKvKernel::<P, DefaultPolicy>::new()?.launch(
        &FmhaFwdSplitKvArgs {
            fwd: inputs.fwd_args(scale, mask),
            num_splits,
        },
        &mut o_acc,
        &mut lse_acc,
    )?;

    let mut o = vec![T::default(); dims.o_len()];
    let mut lse = vec![0.0f32; dims.lse_len()];
    FmhaCombineKernel::<CombineProblemOf<P, MaxSplits>>::new().launch(
        &FmhaCombineArgs {
            lse_acc: &lse_acc,
            o_acc: &o_acc,
            dims,
            num_splits,
        },
        &mut o,
        Some(lse.as_mut_slice()),
    )?;
    Ok(FwdResult { o, lse })
}

/// Output and LSE against the f64 reference, with the tolerance of `T`.
pub fn assert_matches_reference<T: TestFloat>(actual: &FwdResult<T>, expected: &ReferenceOutput, ctx: &str) {
    slices_eq_with(&actual.o, &expected.o, T::rtol(), T::atol(), &format!("{ctx}: o"));
    slices_eq_with(&actual.lse, &expected.lse, 1e-3, 1e-3, &format!("{ctx}: lse"));
}
