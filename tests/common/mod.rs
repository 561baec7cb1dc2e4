//! Common test utilities for integration tests

#![allow(dead_code)]

use rand::{rngs::StdRng, Rng};
use symgrad::{DType, Value};

pub const EPSILON: f64 = 1e-9;

pub fn setup() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub fn approx_eq(a: f64, b: f64, tol: f64) -> bool {
    (a - b).abs() <= tol * (1.0 + a.abs().max(b.abs()))
}

pub fn assert_vec_close(actual: &[f64], expected: &[f64], tol: f64) {
    assert_eq!(actual.len(), expected.len(), "length mismatch");
    for (i, (a, e)) in actual.iter().zip(expected).enumerate() {
        assert!(approx_eq(*a, *e, tol), "element {i}: {a} != {e}");
    }
}

pub fn random_value(rng: &mut StdRng, shape: &[usize], dtype: DType) -> Value {
    let n = shape.iter().product();
    let data = (0..n).map(|_| rng.gen_range(-1.0..1.0)).collect();
    Value::from_vec(shape, data, dtype).unwrap()
}
