//! Compiled functions: signatures, symbolic extents, shared state and updates.

mod common;

use common::{assert_vec_close, setup};
use symgrad::prelude::*;
use symgrad::shape;

fn vector(data: &[f64]) -> Value {
    Value::from_vec(&[data.len()], data.to_vec(), DType::F32).unwrap()
}

#[test]
fn test_symbolic_batch_extent() {
    setup();
    let mut g = Graph::new();
    let x = g.input("x", shape!["n", 3], DType::F32);
    let w = g.input("w", [3], DType::F32);
    let p = g.dot(x, w).unwrap();
    let total = g.sum_all(p).unwrap();
    let f = function(&g, &[x, w], &[p, total]).unwrap();

    for n in [1, 4] {
        let data: Vec<f64> = (0..n * 3).map(|i| i as f64).collect();
        let xv = Value::from_vec(&[n, 3], data, DType::F32).unwrap();
        let out = f.call(&[xv, vector(&[1.0, 0.0, -1.0])]).unwrap();
        assert_eq!(out[0].shape(), &[n]);
        assert_vec_close(&out[0].to_f64_vec(), &vec![-2.0; n], 0.0);
        assert_eq!(out[1].as_scalar(), Some(-2.0 * n as f64));
    }
}

#[test]
fn test_inconsistent_symbolic_extent() {
    let mut g = Graph::new();
    let a = g.input("a", shape!["n"], DType::F32);
    let b = g.input("b", shape!["n"], DType::F32);
    let s = g.add(a, b).unwrap();
    let f = function(&g, &[a, b], &[s]).unwrap();
    assert!(matches!(
        f.call(&[vector(&[1.0, 2.0]), vector(&[1.0, 2.0, 3.0])]),
        Err(GraphError::ShapeError(_))
    ));
}

#[test]
fn test_argument_checks() {
    let mut g = Graph::new();
    let x = g.input("x", [2], DType::F32);
    let i = g.input("i", [2], DType::I64);
    let c = g.cast(i, DType::F32).unwrap();
    let s = g.add(x, c).unwrap();
    let f = function(&g, &[x, i], &[s]).unwrap();

    let ints = Value::from_vec(&[2], vec![1.0, 2.0], DType::I64).unwrap();
    let doubles = Value::from_vec(&[2], vec![0.5, 0.5], DType::F64).unwrap();
    let out = f.call(&[doubles.clone(), ints.clone()]).unwrap();
    assert_eq!(out[0].dtype(), DType::F32);
    assert_eq!(out[0].to_f64_vec(), vec![1.5, 2.5]);

    assert!(matches!(
        f.call(&[doubles.clone()]),
        Err(GraphError::InvalidArgument(_))
    ));
    assert!(matches!(
        f.call(&[doubles.clone(), doubles]),
        Err(GraphError::DTypeError(_))
    ));
    assert!(matches!(
        f.call(&[vector(&[1.0, 2.0, 3.0]), ints]),
        Err(GraphError::ShapeError(_))
    ));
}

#[test]
fn test_unbound_input() {
    let mut g = Graph::new();
    let x = g.input("x", [2], DType::F32);
    let y = g.input("y", [2], DType::F32);
    let s = g.add(x, y).unwrap();
    assert!(matches!(
        function(&g, &[x], &[s]),
        Err(GraphError::UnboundInputError(_))
    ));
}

#[test]
fn test_function_sees_assignments() {
    let mut g = Graph::new();
    let w = g.shared("w", vector(&[1.0, 2.0])).unwrap();
    let s = g.sum_all(w).unwrap();
    let f = function(&g, &[], &[s]).unwrap();
    assert_eq!(f.call(&[]).unwrap()[0].as_scalar(), Some(3.0));

    g.shared_variable(w)
        .unwrap()
        .set_value(&vector(&[5.0, 5.0]))
        .unwrap();
    assert_eq!(f.call(&[]).unwrap()[0].as_scalar(), Some(10.0));
}

#[test]
fn test_updates_apply_after_outputs() {
    setup();
    let mut g = Graph::new();
    let lr = g.input("lr", Shape::scalar(), DType::F32);
    let w = g.shared("w", vector(&[1.0, -2.0])).unwrap();
    let sq = g.square(w).unwrap();
    let loss = g.sum_all(sq).unwrap();
    let gw = grad(&mut g, loss, w).unwrap();
    let step = g.mul(lr, gw).unwrap();
    let next = g.sub(w, step).unwrap();

    let f = Compiler::new(g.config())
        .compile_with_updates(&g, &[lr], &[loss], &[(w, next)])
        .unwrap();
    let lr_value = Value::scalar(0.25, DType::F32);

    // loss is reported for the value before the update
    assert_eq!(f.call(&[lr_value.clone()]).unwrap()[0].as_scalar(), Some(5.0));
    let var = g.shared_variable(w).unwrap();
    assert_eq!(var.get_value().unwrap().to_f64_vec(), vec![0.5, -1.0]);
    assert_eq!(f.call(&[lr_value]).unwrap()[0].as_scalar(), Some(1.25));
}

#[test]
fn test_packed_update_writes_the_buffer() {
    let mut g = Graph::new();
    let a = g.shared("a", vector(&[1.0, 2.0])).unwrap();
    let b = g.shared("b", Value::scalar(3.0, DType::F32)).unwrap();
    let storage = pack(&g, &[a, b]).unwrap();

    let two = g.scalar(2.0);
    let doubled = g.mul(a, two).unwrap();
    let f = Compiler::new(g.config())
        .compile_with_updates(&g, &[], &[], &[(a, doubled)])
        .unwrap();
    f.call(&[]).unwrap();
    assert_eq!(storage.buffer().to_vec(), vec![2.0, 4.0, 3.0]);
}

#[test]
fn test_evaluation_order_is_topological() {
    let mut g = Graph::new();
    let x = g.input("x", [3], DType::F32);
    let e = g.exp(x).unwrap();
    let l = g.log(e).unwrap();
    let s = g.add(e, l).unwrap();
    let f = function(&g, &[x], &[s, l]).unwrap();

    let order = f.order();
    let pos = |id| order.iter().position(|&n| n == id).unwrap();
    assert!(pos(x) < pos(e));
    assert!(pos(e) < pos(l));
    assert!(pos(l) < pos(s));
    assert_eq!(f.outputs(), &[s, l]);
    assert_eq!(f.inputs(), vec![x]);
    assert_eq!(f.backend_name(), "reference");
}

#[test]
fn test_functions_are_reusable() {
    let mut g = Graph::new();
    let x = g.input("x", [2], DType::F32);
    let sq = g.square(x).unwrap();
    let f = function(&g, &[x], &[sq]).unwrap();
    let first = f.call(&[vector(&[1.0, 2.0])]).unwrap();
    let second = f.call(&[vector(&[3.0, 4.0])]).unwrap();
    let again = f.call(&[vector(&[1.0, 2.0])]).unwrap();
    assert_eq!(first[0].to_f64_vec(), vec![1.0, 4.0]);
    assert_eq!(second[0].to_f64_vec(), vec![9.0, 16.0]);
    assert_eq!(first[0], again[0]);
}
