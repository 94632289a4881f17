#![allow(dead_code)]

use std::hash::{DefaultHasher, Hasher};

use half::{bf16, f16};
use rand::{Rng, rngs::StdRng};

use crate::element::Element;

pub fn range_vec<F: Element>(len: usize) -> Vec<F> {
    (0..len).map(|i| F::from_f64(i as f64)).collect()
}

pub fn string_to_seed(s: &str) -> u64 {
    let mut hasher = DefaultHasher::new();
    hasher.write(s.as_bytes());
    hasher.finish()
}

pub fn random_vec<F: Element>(rng: &mut StdRng, len: usize, start: f64, end: f64) -> Vec<F> {
    (0..len)
        .map(|_| F::from_f64(rng.random_range(start..end)))
        .collect()
}

pub fn get_strides(shape: &[usize]) -> Vec<usize> {
    let mut strides = vec![1usize; shape.len()];
    for i in (0..shape.len().saturating_sub(1)).rev() {
        strides[i] = strides[i + 1] * shape[i + 1];
    }
    strides
}

/// Assert two values are approximately equal.
pub fn approx_eq<F: TestFloat>(actual: F, expected: F) -> bool {
    approx_eq_with(actual.into_f64(), expected.into_f64(), F::rtol(), F::atol())
}

/// `|a - e| <= atol + rtol * |e|`, with matching infinities and NaNs counted equal.
pub fn approx_eq_with(a: f64, e: f64, rtol: f64, atol: f64) -> bool {
    if a == e || (a.is_nan() && e.is_nan()) {
        return true;
    }
    (a - e).abs() <= atol + rtol * e.abs()
}

/// Assert slices are approximately equal.
pub fn slices_eq<F: TestFloat>(actual: &[F], expected: &[F], ctx: &str) {
    slices_eq_with(actual, expected, F::rtol(), F::atol(), ctx)
}

/// Assert slices are approximately equal under an explicit tolerance.
pub fn slices_eq_with<A: Element, E: Element>(
    actual: &[A],
    expected: &[E],
    rtol: f64,
    atol: f64,
    ctx: &str,
) {
    assert_eq!(actual.len(), expected.len(), "{ctx}: length mismatch");

    let mut passed = true;
    let mut shown = 0;

    let mut avg_magnitude_actual = 0.0;
    let mut avg_magnitude_expected = 0.0;

    for (i, (&a, &e)) in actual.iter().zip(expected).enumerate() {
        let (a, e) = (a.into_f64(), e.into_f64());
        if !approx_eq_with(a, e, rtol, atol) {
            passed = false;
            if shown < 32 {
                println!("{ctx}[{i}] mismatch: expected {e}, got {a}");
                shown += 1;
            }
        }
        if a.is_finite() {
            avg_magnitude_actual += a.abs();
        }
        if e.is_finite() {
            avg_magnitude_expected += e.abs();
        }
    }

    println!(
        "Average magnitude of actual values: {}",
        avg_magnitude_actual / actual.len().max(1) as f64
    );
    println!(
        "Average magnitude of expected values: {}",
        avg_magnitude_expected / expected.len().max(1) as f64
    );

    if !passed {
        panic!("{} mismatch", ctx);
    }
}

pub trait TestFloat: Element {
    fn rtol() -> f64;
    fn atol() -> f64;
}

impl TestFloat for f64 {
    fn rtol() -> f64 {
        1e-12
    }
    fn atol() -> f64 {
        1e-12
    }
}

impl TestFloat for f32 {
    fn rtol() -> f64 {
        1e-4
    }
    fn atol() -> f64 {
        1e-4
    }
}

impl TestFloat for f16 {
    fn rtol() -> f64 {
        1e-2
    }
    fn atol() -> f64 {
        1e-2
    }
}

impl TestFloat for bf16 {
    fn rtol() -> f64 {
        5e-2
    }
    fn atol() -> f64 {
        5e-2
    }
}
