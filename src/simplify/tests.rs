use rand::{rngs::StdRng, Rng, SeedableRng};
use rstest::rstest;

use super::*;
use crate::{
    compile::function,
    config::Config,
    dtype::DType,
    error::GraphError,
    grad::grad,
    graph::{traversal::count_nodes, BinaryOp, GraphOp},
    value::Value,
};

fn setup() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn random_vec(rng: &mut StdRng, n: usize) -> Value {
    let data = (0..n).map(|_| rng.gen_range(0.5..2.0)).collect();
    Value::from_vec(&[n], data, DType::F64).unwrap()
}

fn assert_close(a: &Value, b: &Value) {
    assert_eq!(a.shape(), b.shape());
    for (x, y) in a.to_f64_vec().iter().zip(b.to_f64_vec()) {
        assert!((x - y).abs() <= 1e-9 * (1.0 + x.abs()), "{x} != {y}");
    }
}

/// Builds a few expressions full of reducible structure over `x`, `y`.
fn build(g: &mut Graph, which: usize) -> (NodeId, NodeId, NodeId) {
    let x = g.input("x", [4], DType::F64);
    let y = g.input("y", [4], DType::F64);
    let out = match which {
        0 => {
            let zero = g.zeros_like(x).unwrap();
            let one = g.ones_like(y).unwrap();
            let a = g.add(x, zero).unwrap();
            let b = g.mul(one, y).unwrap();
            let c = g.mul(a, b).unwrap();
            let d = g.mul(b, a).unwrap();
            g.sub(c, d).unwrap()
        }
        1 => {
            let n = g.neg(y).unwrap();
            let nn = g.neg(n).unwrap();
            let s = g.add(x, n).unwrap();
            let t = g.add(s, s).unwrap();
            g.div(t, nn).unwrap()
        }
        2 => {
            let two = g.scalar(2.0);
            let three = g.scalar(3.0);
            let c = g.mul(two, three).unwrap();
            let e = g.exp(x).unwrap();
            let inner = g.mul(three, e).unwrap();
            let outer = g.mul(c, inner).unwrap();
            let r = g.reshape(outer, [2, 2]).unwrap();
            let t = g.transpose(r).unwrap();
            let tt = g.transpose(t).unwrap();
            let back = g.reshape(tt, [4]).unwrap();
            g.sub(back, y).unwrap()
        }
        _ => {
            let sq = g.square(x).unwrap();
            let loss = g.sum_all(sq).unwrap();
            let gx = grad(g, loss, x).unwrap();
            g.add(gx, y).unwrap()
        }
    };
    (x, y, out)
}

#[rstest]
#[case(0)]
#[case(1)]
#[case(2)]
#[case(3)]
fn test_simplification_preserves_values(#[case] which: usize) {
    setup();
    let mut g = Graph::with_config(Config::default().with_precision(crate::config::Precision::Double));
    let (x, y, out) = build(&mut g, which);
    let simplified = simplify(&mut g, &[out]).unwrap();

    let before = function(&g, &[x, y], &[out]).unwrap();
    let after = function(&g, &[x, y], &simplified).unwrap();
    let mut rng = StdRng::seed_from_u64(which as u64);
    for _ in 0..5 {
        let args = [random_vec(&mut rng, 4), random_vec(&mut rng, 4)];
        let expected = before.call(&args).unwrap();
        let actual = after.call(&args).unwrap();
        assert_close(&expected[0], &actual[0]);
    }
    assert!(count_nodes(&g, &simplified).unwrap() <= count_nodes(&g, &[out]).unwrap());
}

#[rstest]
#[case(0)]
#[case(1)]
#[case(2)]
#[case(3)]
fn test_simplification_is_idempotent(#[case] which: usize) {
    let mut g = Graph::new();
    let (_, _, out) = build(&mut g, which);
    let once = simplify(&mut g, &[out]).unwrap();
    let len = g.len();
    let twice = simplify(&mut g, &once).unwrap();
    assert_eq!(once, twice);
    assert_eq!(g.len(), len);
}

#[test]
fn test_symmetric_difference_cancels_to_zero() {
    let mut g = Graph::new();
    let (_, _, out) = build(&mut g, 0);
    let out = simplify(&mut g, &[out]).unwrap()[0];
    // c and d are the same product once operands are canonical
    assert_eq!(g.node(out).op, GraphOp::Binary(BinaryOp::Sub));
    assert_eq!(g.node(out).src[0], g.node(out).src[1]);
}

#[test]
fn test_square_gradient_is_a_scaled_identity() {
    setup();
    let mut g = Graph::new();
    let x = g.input("x", [3], DType::F32);
    let sq = g.square(x).unwrap();
    let loss = g.sum_all(sq).unwrap();
    let gx = grad(&mut g, loss, x).unwrap();

    let gx = simplify(&mut g, &[gx]).unwrap()[0];
    let node = g.node(gx);
    assert_eq!(node.op, GraphOp::Binary(BinaryOp::Mul));
    assert_eq!(node.src[0], x);
    assert_eq!(splat_value(&g, node.src[1]), Some(Value::scalar(2.0, DType::F32)));
    assert_eq!(count_nodes(&g, &[gx]).unwrap(), 4);
}

#[test]
fn test_large_integers_are_not_mistaken_for_splats() {
    setup();
    let big = 1i64 << 53;
    let mut g = Graph::new();
    let c = g.constant_exact(Value::from(ndarray::arr1(&[big, big + 1])));
    let one = g.constant_exact(Value::from(1i64));
    let s = g.add(c, one).unwrap();
    let out = simplify(&mut g, &[s]).unwrap()[0];

    let f = function(&g, &[], &[s, out]).unwrap();
    let result = f.call(&[]).unwrap();
    let expected = ndarray::arr1(&[big + 1, big + 2]).into_dyn();
    assert_eq!(result[0].as_i64(), Some(&expected));
    assert_eq!(result[1].as_i64(), Some(&expected));
}

#[test]
fn test_integer_splat_keeps_exact_value() {
    let big = (1i64 << 53) + 1;
    let mut g = Graph::new();
    let c = g.constant_exact(Value::from(ndarray::arr1(&[big, big])));
    assert_eq!(splat_value(&g, c), Some(Value::from(big)));
    let d = g.constant_exact(Value::from(ndarray::arr1(&[big - 1, big])));
    assert!(splat_value(&g, d).is_none());
}

#[test]
fn test_constants_fold_to_one_node() {
    let mut g = Graph::new();
    let a = g.constant(Value::from_vec(&[2], vec![1.0, 2.0], DType::F32).unwrap());
    let b = g.constant(Value::from_vec(&[2], vec![3.0, 4.0], DType::F32).unwrap());
    let s = g.add(a, b).unwrap();
    let e = g.exp(s).unwrap();
    let total = g.sum_all(e).unwrap();

    let out = simplify(&mut g, &[total]).unwrap()[0];
    let GraphOp::Constant(v) = &g.node(out).op else {
        panic!("expected a constant, got {}", g.node(out).op);
    };
    let expected = (4.0f32).exp() + (6.0f32).exp();
    assert!((v.as_scalar().unwrap() - f64::from(expected)).abs() < 1e-3);
}

#[test]
fn test_output_order_and_sharing() {
    let mut g = Graph::new();
    let x = g.input("x", [3], DType::F32);
    let one = g.ones_like(x).unwrap();
    let a = g.mul(x, one).unwrap();
    let e1 = g.exp(a).unwrap();
    let e2 = g.exp(x).unwrap();
    let out = simplify(&mut g, &[e1, x, e2]).unwrap();
    assert_eq!(out[1], x);
    assert_eq!(out[0], out[2]);
    assert_eq!(g.node(out[0]).src, vec![x]);
}

#[test]
fn test_shared_and_inputs_are_kept() {
    let mut g = Graph::new();
    let w = g.shared("w", Value::zeros(&[3], DType::F32)).unwrap();
    let x = g.input("x", [3], DType::F32);
    let p = g.mul(w, x).unwrap();
    let out = simplify(&mut g, &[p]).unwrap();
    // the zero-valued shared variable is not a constant
    assert_eq!(out[0], p);
}

#[test]
fn test_unknown_output() {
    let mut g = Graph::new();
    let before = g.len();
    assert!(matches!(
        simplify(&mut g, &[NodeId(3)]),
        Err(GraphError::UnknownNode(_))
    ));
    assert_eq!(g.len(), before);
}

#[test]
fn test_iteration_cap_rolls_back() {
    let mut g = Graph::with_config(Config::default().with_max_simplify_iterations(1));
    let x = g.input("x", [3], DType::F32);
    let n = g.neg(x).unwrap();
    let nn = g.neg(n).unwrap();
    let e = g.exp(nn).unwrap();
    let before = g.len();
    // the first pass rewrites, so a second pass is needed to confirm a fixed point
    assert!(matches!(
        simplify(&mut g, &[e]),
        Err(GraphError::SimplificationError(_))
    ));
    assert_eq!(g.len(), before);
}
