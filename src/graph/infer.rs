//! Shape and dtype inference.
//!
//! `infer` is the single source of truth for a node's output type: the graph
//! runs it on every insertion and the simplifier re-checks rewrites against
//! it.

use crate::{
    dtype::DType,
    error::{GraphError, Result},
    graph::{
        node::NodeData,
        op::{BinaryOp, GraphOp, UnaryOp},
    },
    shape::{Dim, Shape},
};

pub fn infer(op: &GraphOp, src: &[&NodeData]) -> Result<(Shape, DType)> {
    match op {
        GraphOp::Input { shape, dtype, .. } => {
            expect_arity(op, src, 0)?;
            Ok((shape.clone(), *dtype))
        }
        GraphOp::Constant(value) => {
            expect_arity(op, src, 0)?;
            Ok((Shape::from(value.shape()), value.dtype()))
        }
        GraphOp::Shared(var) => {
            expect_arity(op, src, 0)?;
            Ok((var.symbolic_shape(), var.dtype()))
        }
        GraphOp::Unary(unary) => {
            expect_arity(op, src, 1)?;
            infer_unary(*unary, src[0])
        }
        GraphOp::Binary(binary) => {
            expect_arity(op, src, 2)?;
            infer_binary(*binary, src[0], src[1])
        }
        GraphOp::MatMul => {
            expect_arity(op, src, 2)?;
            infer_matmul(src[0], src[1])
        }
        GraphOp::Sum { axes } => {
            expect_arity(op, src, 1)?;
            check_axes(axes, src[0].shape.rank(), "sum")?;
            Ok((src[0].shape.without_axes(axes), src[0].dtype))
        }
        GraphOp::Expand { axes, shape } => {
            expect_arity(op, src, 1)?;
            check_axes(axes, shape.rank(), "expand")?;
            let kept = shape.without_axes(axes);
            if kept != src[0].shape {
                return Err(GraphError::shape(format!(
                    "cannot expand {} to {shape} by inserting axes {axes:?}",
                    src[0].shape
                )));
            }
            Ok((shape.clone(), src[0].dtype))
        }
        GraphOp::Reshape(shape) => {
            expect_arity(op, src, 1)?;
            let from = &src[0].shape;
            if from.size_signature() != shape.size_signature() {
                return Err(GraphError::shape(format!(
                    "cannot reshape {from} to {shape}: element counts differ"
                )));
            }
            Ok((shape.clone(), src[0].dtype))
        }
        GraphOp::Transpose => {
            expect_arity(op, src, 1)?;
            let s = &src[0].shape;
            if s.rank() != 2 {
                return Err(GraphError::shape(format!(
                    "transpose expects a matrix, got shape {s}"
                )));
            }
            Ok((
                Shape::new(vec![s.dim(1).clone(), s.dim(0).clone()]),
                src[0].dtype,
            ))
        }
        GraphOp::Flatcat => {
            if src.is_empty() {
                return Err(GraphError::shape("flatcat of an empty node list"));
            }
            let dtype = src[0].dtype;
            let mut total = 0;
            for node in src {
                if node.dtype != dtype {
                    return Err(GraphError::dtype(format!(
                        "flatcat operands must share a dtype, got {dtype} and {}",
                        node.dtype
                    )));
                }
                total += node.shape.numel().ok_or_else(|| {
                    GraphError::shape(format!(
                        "flatcat requires static extents, got shape {}",
                        node.shape
                    ))
                })?;
            }
            Ok((Shape::from(vec![total]), dtype))
        }
        GraphOp::Slice { start, len } => {
            expect_arity(op, src, 1)?;
            let s = &src[0].shape;
            let n = match (s.rank(), s.numel()) {
                (1, Some(n)) => n,
                _ => {
                    return Err(GraphError::shape(format!(
                        "slice expects a vector with a static extent, got shape {s}"
                    )));
                }
            };
            if start + len > n {
                return Err(GraphError::shape(format!(
                    "slice {start}..{} out of bounds for length {n}",
                    start + len
                )));
            }
            Ok((Shape::from(vec![*len]), src[0].dtype))
        }
        GraphOp::Cast(dtype) => {
            expect_arity(op, src, 1)?;
            Ok((src[0].shape.clone(), *dtype))
        }
    }
}

fn expect_arity(op: &GraphOp, src: &[&NodeData], n: usize) -> Result<()> {
    if src.len() != n {
        return Err(GraphError::InvalidArgument(format!(
            "{op} expects {n} inputs, got {}",
            src.len()
        )));
    }
    Ok(())
}

fn check_axes(axes: &[usize], rank: usize, what: &str) -> Result<()> {
    if axes.windows(2).any(|w| w[0] >= w[1]) {
        return Err(GraphError::shape(format!(
            "{what} axes must be sorted and distinct, got {axes:?}"
        )));
    }
    if let Some(&axis) = axes.iter().find(|&&a| a >= rank) {
        return Err(GraphError::shape(format!(
            "{what} axis {axis} out of range for rank {rank}"
        )));
    }
    Ok(())
}

fn infer_unary(op: UnaryOp, x: &NodeData) -> Result<(Shape, DType)> {
    if op.requires_float() && !x.dtype.is_float() {
        return Err(GraphError::dtype(format!(
            "{op:?} requires a float operand, got {}",
            x.dtype
        )));
    }
    Ok((x.shape.clone(), x.dtype))
}

fn infer_binary(op: BinaryOp, a: &NodeData, b: &NodeData) -> Result<(Shape, DType)> {
    if a.dtype != b.dtype {
        return Err(GraphError::dtype(format!(
            "{op:?} operands have dtypes {} and {}",
            a.dtype, b.dtype
        )));
    }
    if op.requires_float() && !a.dtype.is_float() {
        return Err(GraphError::dtype(format!(
            "{op:?} requires float operands, got {}",
            a.dtype
        )));
    }
    if a.shape != b.shape {
        return Err(GraphError::shape(format!(
            "{op:?} operands have shapes {} and {}",
            a.shape, b.shape
        )));
    }
    Ok((a.shape.clone(), a.dtype))
}

fn infer_matmul(a: &NodeData, b: &NodeData) -> Result<(Shape, DType)> {
    if a.dtype != b.dtype {
        return Err(GraphError::dtype(format!(
            "dot operands have dtypes {} and {}",
            a.dtype, b.dtype
        )));
    }
    let (sa, sb) = (a.shape.dims(), b.shape.dims());
    let (inner_a, inner_b, out): (&Dim, &Dim, Vec<Dim>) = match (sa, sb) {
        ([m, k1], [k2, n]) => (k1, k2, vec![m.clone(), n.clone()]),
        ([m, k1], [k2]) => (k1, k2, vec![m.clone()]),
        ([k1], [k2, n]) => (k1, k2, vec![n.clone()]),
        ([k1], [k2]) => (k1, k2, vec![]),
        _ => {
            return Err(GraphError::shape(format!(
                "dot expects rank 1 or 2 operands, got {} and {}",
                a.shape, b.shape
            )));
        }
    };
    if inner_a != inner_b {
        return Err(GraphError::shape(format!(
            "dot inner dimensions differ: {} @ {}",
            a.shape, b.shape
        )));
    }
    Ok((Shape::new(out), a.dtype))
}
