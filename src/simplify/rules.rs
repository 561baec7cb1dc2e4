//! The default rule set.
//!
//! A *splat* is a node known to hold one repeated value: a constant whose
//! elements are all equal, or an `Expand` of a splat.

use crate::{
    backend::{Backend, KernelMeta, ReferenceBackend},
    dtype::DType,
    error::Result,
    graph::{BinaryOp, Graph, GraphOp, NodeId, UnaryOp},
    value::Value,
};

use super::rewriter::RewriteRule;

pub fn default_rules() -> Vec<RewriteRule> {
    vec![
        RewriteRule::new("constant_folding", constant_folding),
        RewriteRule::new("splat_folding", splat_folding),
        RewriteRule::new("sum_of_splat", sum_of_splat),
        RewriteRule::new("add_zero", add_zero),
        RewriteRule::new("sub_zero", sub_zero),
        RewriteRule::new("zero_sub", zero_sub),
        RewriteRule::new("mul_one", mul_one),
        RewriteRule::new("mul_zero", mul_zero),
        RewriteRule::new("div_one", div_one),
        RewriteRule::new("double_neg", double_neg),
        RewriteRule::new("add_self", add_self),
        RewriteRule::new("add_neg", add_neg),
        RewriteRule::new("sub_neg", sub_neg),
        RewriteRule::new("scale_chain", scale_chain),
        RewriteRule::new("noop_reshape", noop_reshape),
        RewriteRule::new("reshape_chain", reshape_chain),
        RewriteRule::new("double_transpose", double_transpose),
        RewriteRule::new("noop_cast", noop_cast),
        RewriteRule::new("empty_axes", empty_axes),
    ]
}

/// The repeated value of a splat node, as a rank-0 value of its dtype.
pub fn splat_value(graph: &Graph, id: NodeId) -> Option<Value> {
    match &graph.get(id)?.op {
        GraphOp::Constant(value) => value.splat(),
        GraphOp::Expand { .. } => splat_value(graph, graph.node(id).src[0]),
        _ => None,
    }
}

fn is_splat_of(graph: &Graph, id: NodeId, x: f64) -> bool {
    splat_value(graph, id).and_then(|v| v.as_scalar()) == Some(x)
}

fn binary_parts(graph: &Graph, id: NodeId) -> Option<(BinaryOp, NodeId, NodeId)> {
    let node = graph.node(id);
    match node.op {
        GraphOp::Binary(op) => Some((op, node.src[0], node.src[1])),
        _ => None,
    }
}

fn unary_parts(graph: &Graph, id: NodeId) -> Option<(UnaryOp, NodeId)> {
    let node = graph.node(id);
    match node.op {
        GraphOp::Unary(op) => Some((op, node.src[0])),
        _ => None,
    }
}

/// Evaluates `op` on rank-0 operands.
fn eval_scalar(op: &GraphOp, operands: &[Value], dtype: DType) -> Result<Value> {
    let inputs: Vec<&Value> = operands.iter().collect();
    ReferenceBackend::new().evaluate(op, &inputs, &KernelMeta { shape: &[], dtype })
}

/// A splat holding `value`, shaped like `like`.
fn splat_like(graph: &mut Graph, like: NodeId, value: Value) -> Result<NodeId> {
    let shape = graph.node(like).shape.clone();
    let c = graph.constant_exact(value);
    graph.broadcast_to(c, shape)
}

/// Operators whose inputs are all constants are evaluated.
fn constant_folding(graph: &mut Graph, id: NodeId) -> Result<Option<NodeId>> {
    let node = graph.node(id);
    if node.is_leaf() || matches!(node.op, GraphOp::Expand { .. }) {
        return Ok(None);
    }
    let Some(shape) = node.shape.concrete() else {
        return Ok(None);
    };
    let mut inputs = Vec::with_capacity(node.src.len());
    for &s in &node.src {
        match &graph.node(s).op {
            GraphOp::Constant(value) => inputs.push(value),
            _ => return Ok(None),
        }
    }
    let meta = KernelMeta {
        shape: &shape,
        dtype: node.dtype,
    };
    let value = ReferenceBackend::new().evaluate(&node.op, &inputs, &meta)?;
    Ok(Some(graph.constant_exact(value)))
}

/// Elementwise operators on splats become a splat, without materialising
/// the broadcast.
fn splat_folding(graph: &mut Graph, id: NodeId) -> Result<Option<NodeId>> {
    let node = graph.node(id);
    if !matches!(node.op, GraphOp::Unary(_) | GraphOp::Binary(_)) {
        return Ok(None);
    }
    if node.src.iter().all(|&s| graph.node(s).op.is_constant()) {
        return Ok(None);
    }
    let mut operands = Vec::with_capacity(node.src.len());
    for &s in &node.src {
        let Some(x) = splat_value(graph, s) else {
            return Ok(None);
        };
        operands.push(x);
    }
    let value = eval_scalar(&node.op, &operands, node.dtype)?;
    Ok(Some(splat_like(graph, id, value)?))
}

/// Summing a splat over static axes multiplies it by the element count.
fn sum_of_splat(graph: &mut Graph, id: NodeId) -> Result<Option<NodeId>> {
    let node = graph.node(id);
    let GraphOp::Sum { axes } = &node.op else {
        return Ok(None);
    };
    if axes.is_empty() {
        return Ok(None);
    }
    let x = node.src[0];
    let Some(c) = splat_value(graph, x) else {
        return Ok(None);
    };
    let src = graph.node(x);
    let mut count = 1usize;
    for &axis in axes {
        match src.shape.dim(axis).as_const() {
            Some(n) => count *= n,
            None => return Ok(None),
        }
    }
    let dtype = node.dtype;
    let value = eval_scalar(
        &GraphOp::Binary(BinaryOp::Mul),
        &[c, Value::scalar(count as f64, dtype)],
        dtype,
    )?;
    Ok(Some(splat_like(graph, id, value)?))
}

fn add_zero(graph: &mut Graph, id: NodeId) -> Result<Option<NodeId>> {
    Ok(match binary_parts(graph, id) {
        Some((BinaryOp::Add, a, b)) if is_splat_of(graph, b, 0.0) => Some(a),
        Some((BinaryOp::Add, a, b)) if is_splat_of(graph, a, 0.0) => Some(b),
        _ => None,
    })
}

fn sub_zero(graph: &mut Graph, id: NodeId) -> Result<Option<NodeId>> {
    Ok(match binary_parts(graph, id) {
        Some((BinaryOp::Sub, a, b)) if is_splat_of(graph, b, 0.0) => Some(a),
        _ => None,
    })
}

fn zero_sub(graph: &mut Graph, id: NodeId) -> Result<Option<NodeId>> {
    match binary_parts(graph, id) {
        Some((BinaryOp::Sub, a, b)) if is_splat_of(graph, a, 0.0) => Ok(Some(graph.neg(b)?)),
        _ => Ok(None),
    }
}

fn mul_one(graph: &mut Graph, id: NodeId) -> Result<Option<NodeId>> {
    Ok(match binary_parts(graph, id) {
        Some((BinaryOp::Mul, a, b)) if is_splat_of(graph, b, 1.0) => Some(a),
        Some((BinaryOp::Mul, a, b)) if is_splat_of(graph, a, 1.0) => Some(b),
        _ => None,
    })
}

fn mul_zero(graph: &mut Graph, id: NodeId) -> Result<Option<NodeId>> {
    match binary_parts(graph, id) {
        Some((BinaryOp::Mul, a, b))
            if is_splat_of(graph, a, 0.0) || is_splat_of(graph, b, 0.0) =>
        {
            let dtype = graph.node(id).dtype;
            Ok(Some(splat_like(graph, id, Value::scalar(0.0, dtype))?))
        }
        _ => Ok(None),
    }
}

fn div_one(graph: &mut Graph, id: NodeId) -> Result<Option<NodeId>> {
    Ok(match binary_parts(graph, id) {
        Some((BinaryOp::Div, a, b)) if is_splat_of(graph, b, 1.0) => Some(a),
        _ => None,
    })
}

fn double_neg(graph: &mut Graph, id: NodeId) -> Result<Option<NodeId>> {
    let Some((UnaryOp::Neg, x)) = unary_parts(graph, id) else {
        return Ok(None);
    };
    Ok(match unary_parts(graph, x) {
        Some((UnaryOp::Neg, inner)) => Some(inner),
        _ => None,
    })
}

/// `x + x` becomes `2 * x`.
fn add_self(graph: &mut Graph, id: NodeId) -> Result<Option<NodeId>> {
    match binary_parts(graph, id) {
        Some((BinaryOp::Add, a, b)) if a == b => {
            let dtype = graph.node(a).dtype;
            let two = graph.constant_exact(Value::scalar(2.0, dtype));
            Ok(Some(graph.mul(two, a)?))
        }
        _ => Ok(None),
    }
}

/// `x + -y` becomes `x - y`.
fn add_neg(graph: &mut Graph, id: NodeId) -> Result<Option<NodeId>> {
    let Some((BinaryOp::Add, a, b)) = binary_parts(graph, id) else {
        return Ok(None);
    };
    if let Some((UnaryOp::Neg, y)) = unary_parts(graph, b) {
        return Ok(Some(graph.sub(a, y)?));
    }
    if let Some((UnaryOp::Neg, y)) = unary_parts(graph, a) {
        return Ok(Some(graph.sub(b, y)?));
    }
    Ok(None)
}

/// `x - -y` becomes `x + y`.
fn sub_neg(graph: &mut Graph, id: NodeId) -> Result<Option<NodeId>> {
    let Some((BinaryOp::Sub, a, b)) = binary_parts(graph, id) else {
        return Ok(None);
    };
    match unary_parts(graph, b) {
        Some((UnaryOp::Neg, y)) => Ok(Some(graph.add(a, y)?)),
        _ => Ok(None),
    }
}

/// `c1 * (c2 * x)` becomes `(c1 * c2) * x` for splats `c1`, `c2`.
fn scale_chain(graph: &mut Graph, id: NodeId) -> Result<Option<NodeId>> {
    let Some((BinaryOp::Mul, a, b)) = binary_parts(graph, id) else {
        return Ok(None);
    };
    let (c1, inner) = match (splat_value(graph, a), splat_value(graph, b)) {
        (Some(c), None) => (c, b),
        (None, Some(c)) => (c, a),
        _ => return Ok(None),
    };
    let Some((BinaryOp::Mul, p, q)) = binary_parts(graph, inner) else {
        return Ok(None);
    };
    let (c2, x) = match (splat_value(graph, p), splat_value(graph, q)) {
        (Some(c), None) => (c, q),
        (None, Some(c)) => (c, p),
        _ => return Ok(None),
    };
    let dtype = graph.node(id).dtype;
    let product = eval_scalar(&GraphOp::Binary(BinaryOp::Mul), &[c1, c2], dtype)?;
    let scale = graph.constant_exact(product);
    Ok(Some(graph.mul(scale, x)?))
}

fn noop_reshape(graph: &mut Graph, id: NodeId) -> Result<Option<NodeId>> {
    let node = graph.node(id);
    match &node.op {
        GraphOp::Reshape(shape) if graph.node(node.src[0]).shape == *shape => Ok(Some(node.src[0])),
        _ => Ok(None),
    }
}

fn reshape_chain(graph: &mut Graph, id: NodeId) -> Result<Option<NodeId>> {
    let node = graph.node(id);
    let GraphOp::Reshape(shape) = &node.op else {
        return Ok(None);
    };
    let inner = graph.node(node.src[0]);
    if !matches!(inner.op, GraphOp::Reshape(_)) {
        return Ok(None);
    }
    let (x, shape) = (inner.src[0], shape.clone());
    Ok(Some(graph.reshape(x, shape)?))
}

fn double_transpose(graph: &mut Graph, id: NodeId) -> Result<Option<NodeId>> {
    let node = graph.node(id);
    if node.op != GraphOp::Transpose {
        return Ok(None);
    }
    let inner = graph.node(node.src[0]);
    Ok((inner.op == GraphOp::Transpose).then(|| inner.src[0]))
}

fn noop_cast(graph: &mut Graph, id: NodeId) -> Result<Option<NodeId>> {
    let node = graph.node(id);
    match node.op {
        GraphOp::Cast(dtype) if graph.node(node.src[0]).dtype == dtype => Ok(Some(node.src[0])),
        _ => Ok(None),
    }
}

/// `Sum` and `Expand` over no axes.
fn empty_axes(graph: &mut Graph, id: NodeId) -> Result<Option<NodeId>> {
    let node = graph.node(id);
    Ok(match &node.op {
        GraphOp::Sum { axes } | GraphOp::Expand { axes, .. } if axes.is_empty() => {
            Some(node.src[0])
        }
        _ => None,
    })
}
