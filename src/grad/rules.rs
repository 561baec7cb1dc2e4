//! VJP (Vector-Jacobian Product) rules for automatic differentiation
//!
//! This module defines the gradient rule for each primitive operation: given
//! the adjoint of a node, build the adjoint contribution for each input. All
//! rules only add nodes; the forward nodes are never modified.

use crate::{
    dtype::DType,
    error::{GraphError, Result},
    graph::{BinaryOp, Graph, GraphOp, NodeId, UnaryOp},
    shape::{Dim, Shape},
    value::Value,
};

/// Result of computing VJP for an operation.
#[derive(Debug, Default)]
pub struct VjpResult {
    /// Gradients for each input, in order.
    /// `None` means the input doesn't need a gradient.
    pub input_grads: Vec<Option<NodeId>>,
}

/// Compute the VJP for a graph node.
///
/// `wanted[i]` tells whether the gradient of input `i` is needed; rules
/// build nothing for the others.
pub fn compute_vjp(
    graph: &mut Graph,
    node: NodeId,
    grad_output: NodeId,
    wanted: &[bool],
) -> Result<VjpResult> {
    let data = graph.try_node(node)?.clone();
    let src = data.src.clone();
    let want = |i: usize| wanted.get(i).copied().unwrap_or(false);
    let g = grad_output;

    let input_grads = match &data.op {
        GraphOp::Input { .. } | GraphOp::Constant(_) | GraphOp::Shared(_) => Vec::new(),

        GraphOp::Unary(op) => vec![if want(0) {
            Some(unary_vjp(graph, *op, node, src[0], g)?)
        } else {
            None
        }],

        GraphOp::Binary(op) => binary_vjp(graph, *op, src[0], src[1], g, want(0), want(1))?,

        GraphOp::MatMul => matmul_vjp(graph, src[0], src[1], g, want(0), want(1))?,

        // sum(a, axes): grad_a = expand(grad_out, axes)
        GraphOp::Sum { axes } => {
            let shape = graph.node(src[0]).shape.clone();
            vec![Some(graph.expand(g, axes, shape)?)]
        }

        // expand(a, axes): grad_a = sum(grad_out, axes)
        GraphOp::Expand { axes, .. } => vec![Some(graph.sum(g, axes)?)],

        GraphOp::Reshape(_) => {
            let shape = graph.node(src[0]).shape.clone();
            vec![Some(graph.reshape(g, shape)?)]
        }

        GraphOp::Transpose => vec![Some(graph.transpose(g)?)],

        // flatcat(a_0, .., a_n): grad_a_i = reshape(slice(grad_out, offset_i, len_i))
        GraphOp::Flatcat => {
            let mut offset = 0;
            let mut grads = Vec::with_capacity(src.len());
            for (i, &s) in src.iter().enumerate() {
                let shape = graph.node(s).shape.clone();
                let len = static_numel(&shape)?;
                if want(i) {
                    let part = graph.slice(g, offset, len)?;
                    grads.push(Some(graph.reshape(part, shape)?));
                } else {
                    grads.push(None);
                }
                offset += len;
            }
            grads
        }

        // slice(a, start, len): grad_a = [0; start] ++ grad_out ++ [0; rest]
        GraphOp::Slice { start, len } => {
            let total = static_numel(&graph.node(src[0]).shape)?;
            let rest = total - start - len;
            let mut parts = Vec::with_capacity(3);
            if *start > 0 {
                parts.push(graph.constant_exact(Value::zeros(&[*start], data.dtype)));
            }
            parts.push(g);
            if rest > 0 {
                parts.push(graph.constant_exact(Value::zeros(&[rest], data.dtype)));
            }
            vec![Some(graph.flatcat(&parts)?)]
        }

        // Only float-to-float casts carry a gradient.
        GraphOp::Cast(_) => {
            let from = graph.node(src[0]).dtype;
            if from.is_float() && data.dtype.is_float() && want(0) {
                vec![Some(graph.cast(g, from)?)]
            } else {
                vec![None]
            }
        }
    };

    Ok(VjpResult { input_grads })
}

fn unary_vjp(graph: &mut Graph, op: UnaryOp, out: NodeId, a: NodeId, g: NodeId) -> Result<NodeId> {
    let dtype = graph.node(out).dtype;
    match op {
        // neg(a): grad_a = -grad_out
        UnaryOp::Neg => graph.neg(g),

        // recip(a) = 1/a: grad_a = -grad_out * out^2
        UnaryOp::Recip => {
            let sq = graph.square(out)?;
            let t = graph.mul(g, sq)?;
            graph.neg(t)
        }

        // exp(a): grad_a = grad_out * exp(a)
        UnaryOp::Exp => graph.mul(g, out),

        // log(a): grad_a = grad_out / a
        UnaryOp::Log => graph.div(g, a),

        // square(a): grad_a = grad_out * 2a
        UnaryOp::Square => {
            let two = scalar(graph, dtype, 2.0);
            let two_a = graph.mul(two, a)?;
            graph.mul(g, two_a)
        }

        // sqrt(a): grad_a = grad_out / (2 * sqrt(a))
        UnaryOp::Sqrt => {
            let two = scalar(graph, dtype, 2.0);
            let denom = graph.mul(two, out)?;
            graph.div(g, denom)
        }

        // tanh(a): grad_a = grad_out * (1 - out^2)
        UnaryOp::Tanh => {
            let one = scalar(graph, dtype, 1.0);
            let sq = graph.square(out)?;
            let d = graph.sub(one, sq)?;
            graph.mul(g, d)
        }

        // sigmoid(a): grad_a = grad_out * out * (1 - out)
        UnaryOp::Sigmoid => {
            let one = scalar(graph, dtype, 1.0);
            let rest = graph.sub(one, out)?;
            let d = graph.mul(out, rest)?;
            graph.mul(g, d)
        }

        UnaryOp::Sign => Err(GraphError::DifferentiationError(format!(
            "{op:?} has no gradient rule"
        ))),
    }
}

fn binary_vjp(
    graph: &mut Graph,
    op: BinaryOp,
    a: NodeId,
    b: NodeId,
    g: NodeId,
    want_a: bool,
    want_b: bool,
) -> Result<Vec<Option<NodeId>>> {
    let (ga, gb) = match op {
        // add(a, b): grad_a = grad_out, grad_b = grad_out
        BinaryOp::Add => (Some(g), Some(g)),

        // sub(a, b): grad_a = grad_out, grad_b = -grad_out
        BinaryOp::Sub => {
            let gb = if want_b { Some(graph.neg(g)?) } else { None };
            (Some(g), gb)
        }

        // mul(a, b): grad_a = grad_out * b, grad_b = grad_out * a
        BinaryOp::Mul => {
            let ga = if want_a { Some(graph.mul(g, b)?) } else { None };
            let gb = if want_b { Some(graph.mul(g, a)?) } else { None };
            (ga, gb)
        }

        // div(a, b): grad_a = grad_out / b, grad_b = -grad_out * a / b^2
        BinaryOp::Div => {
            let ga = if want_a { Some(graph.div(g, b)?) } else { None };
            let gb = if want_b {
                let num = graph.mul(g, a)?;
                let den = graph.square(b)?;
                let q = graph.div(num, den)?;
                Some(graph.neg(q)?)
            } else {
                None
            };
            (ga, gb)
        }
    };
    Ok(vec![ga.filter(|_| want_a), gb.filter(|_| want_b)])
}

fn matmul_vjp(
    graph: &mut Graph,
    a: NodeId,
    b: NodeId,
    g: NodeId,
    want_a: bool,
    want_b: bool,
) -> Result<Vec<Option<NodeId>>> {
    let (ra, rb) = (graph.node(a).shape.rank(), graph.node(b).shape.rank());
    let mut ga = None;
    let mut gb = None;
    match (ra, rb) {
        // C = A B: grad_A = G B^T, grad_B = A^T G
        (2, 2) => {
            if want_a {
                let bt = graph.transpose(b)?;
                ga = Some(graph.dot(g, bt)?);
            }
            if want_b {
                let at = graph.transpose(a)?;
                gb = Some(graph.dot(at, g)?);
            }
        }
        // c = A b: grad_A = outer(g, b), grad_b = A^T g
        (2, 1) => {
            if want_a {
                ga = Some(outer(graph, g, b)?);
            }
            if want_b {
                let at = graph.transpose(a)?;
                gb = Some(graph.dot(at, g)?);
            }
        }
        // c = a B: grad_a = B g, grad_B = outer(a, g)
        (1, 2) => {
            if want_a {
                ga = Some(graph.dot(b, g)?);
            }
            if want_b {
                gb = Some(outer(graph, a, g)?);
            }
        }
        // c = a . b (scalar): grad_a = g b, grad_b = g a
        _ => {
            if want_a {
                ga = Some(graph.mul(g, b)?);
            }
            if want_b {
                gb = Some(graph.mul(g, a)?);
            }
        }
    }
    Ok(vec![ga, gb])
}

/// Outer product of two vectors as a `[m, 1] x [1, n]` matrix product.
fn outer(graph: &mut Graph, u: NodeId, v: NodeId) -> Result<NodeId> {
    let m = graph.node(u).shape.dim(0).clone();
    let n = graph.node(v).shape.dim(0).clone();
    let col = graph.reshape(u, Shape::new(vec![m, Dim::Const(1)]))?;
    let row = graph.reshape(v, Shape::new(vec![Dim::Const(1), n]))?;
    graph.dot(col, row)
}

fn scalar(graph: &mut Graph, dtype: DType, x: f64) -> NodeId {
    graph.constant_exact(Value::scalar(x, dtype))
}

fn static_numel(shape: &Shape) -> Result<usize> {
    shape.numel().ok_or_else(|| {
        GraphError::DifferentiationError(format!("shape {shape} has symbolic extents"))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(UnaryOp::Neg)]
    #[case(UnaryOp::Recip)]
    #[case(UnaryOp::Exp)]
    #[case(UnaryOp::Log)]
    #[case(UnaryOp::Square)]
    #[case(UnaryOp::Sqrt)]
    #[case(UnaryOp::Tanh)]
    #[case(UnaryOp::Sigmoid)]
    fn test_unary_grad_keeps_shape(#[case] op: UnaryOp) {
        let mut g = Graph::new();
        let x = g.input("x", [2, 3], DType::F32);
        let y = g.unary(op, x).unwrap();
        let seed = g.ones_like(y).unwrap();
        let vjp = compute_vjp(&mut g, y, seed, &[true]).unwrap();
        let gx = vjp.input_grads[0].unwrap();
        assert_eq!(g.node(gx).shape, g.node(x).shape);
        assert_eq!(g.node(gx).dtype, DType::F32);
    }

    #[test]
    fn test_sign_has_no_rule() {
        let mut g = Graph::new();
        let x = g.input("x", [2], DType::F32);
        let y = g.sign(x).unwrap();
        let seed = g.ones_like(y).unwrap();
        assert!(matches!(
            compute_vjp(&mut g, y, seed, &[true]),
            Err(GraphError::DifferentiationError(_))
        ));
    }

    #[rstest]
    #[case(&[2, 3], &[3, 4])]
    #[case(&[2, 3], &[3])]
    #[case(&[3], &[3, 4])]
    #[case(&[3], &[3])]
    fn test_matmul_grads_match_operand_shapes(#[case] sa: &[usize], #[case] sb: &[usize]) {
        let mut g = Graph::new();
        let a = g.input("a", sa, DType::F64);
        let b = g.input("b", sb, DType::F64);
        let c = g.dot(a, b).unwrap();
        let seed = g.ones_like(c).unwrap();
        let vjp = compute_vjp(&mut g, c, seed, &[true, true]).unwrap();
        let ga = vjp.input_grads[0].unwrap();
        let gb = vjp.input_grads[1].unwrap();
        assert_eq!(g.node(ga).shape, Shape::from(sa));
        assert_eq!(g.node(gb).shape, Shape::from(sb));
    }

    #[test]
    fn test_unwanted_inputs_build_nothing() {
        let mut g = Graph::new();
        let a = g.input("a", [3], DType::F32);
        let b = g.input("b", [3], DType::F32);
        let c = g.mul(a, b).unwrap();
        let seed = g.ones_like(c).unwrap();
        let before = g.len();
        let vjp = compute_vjp(&mut g, c, seed, &[true, false]).unwrap();
        assert!(vjp.input_grads[0].is_some());
        assert!(vjp.input_grads[1].is_none());
        assert_eq!(g.len(), before + 1);
    }

    #[test]
    fn test_flatcat_and_slice_grads() {
        let mut g = Graph::new();
        let w = g.input("w", [2, 2], DType::F32);
        let b = g.input("b", Shape::scalar(), DType::F32);
        let cat = g.flatcat(&[w, b]).unwrap();
        let seed = g.ones_like(cat).unwrap();
        let vjp = compute_vjp(&mut g, cat, seed, &[true, true]).unwrap();
        assert_eq!(g.node(vjp.input_grads[0].unwrap()).shape, Shape::from([2, 2]));
        assert!(g.node(vjp.input_grads[1].unwrap()).is_scalar());

        let s = g.slice(cat, 1, 2).unwrap();
        let seed = g.ones_like(s).unwrap();
        let vjp = compute_vjp(&mut g, s, seed, &[true]).unwrap();
        assert_eq!(g.node(vjp.input_grads[0].unwrap()).shape, Shape::from([5]));
    }
}
