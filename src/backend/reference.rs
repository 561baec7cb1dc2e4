//! Directly interpreted ndarray kernels.

use std::ops::Add;

use ndarray::{Array1, ArrayD, ArrayView1, ArrayView2, Axis, Ix1, Ix2, IxDyn, LinalgScalar, Zip};
use num_traits::{Float, Zero};

use super::{Backend, KernelMeta};
use crate::{
    dtype::DType,
    error::{GraphError, Result},
    graph::{BinaryOp, GraphOp, UnaryOp},
    value::Value,
};

/// Applies a generic kernel to whichever array a `Value` holds, keeping the
/// element type.
macro_rules! map_value {
    ($value:expr, $a:ident => $body:expr) => {
        match $value {
            Value::F32($a) => Value::F32($body),
            Value::F64($a) => Value::F64($body),
            Value::I64($a) => Value::I64($body),
        }
    };
}

/// Unoptimised, sequential evaluation of every operator with `ndarray`.
#[derive(Debug, Default, Clone, Copy)]
pub struct ReferenceBackend;

impl ReferenceBackend {
    pub fn new() -> Self {
        ReferenceBackend
    }
}

impl Backend for ReferenceBackend {
    fn name(&self) -> &'static str {
        "reference"
    }

    fn evaluate(&self, op: &GraphOp, inputs: &[&Value], meta: &KernelMeta) -> Result<Value> {
        let out = match op {
            GraphOp::Constant(value) => value.clone(),
            GraphOp::Input { .. } | GraphOp::Shared(_) => {
                return Err(GraphError::backend(format!(
                    "{op} is bound by the runtime, not evaluated"
                )));
            }
            GraphOp::Unary(unary) => unary_kernel(*unary, arg(op, inputs, 0)?)?,
            GraphOp::Binary(binary) => {
                binary_kernel(*binary, arg(op, inputs, 0)?, arg(op, inputs, 1)?)?
            }
            GraphOp::MatMul => match (arg(op, inputs, 0)?, arg(op, inputs, 1)?) {
                (Value::F32(a), Value::F32(b)) => Value::F32(matmul(a, b)?),
                (Value::F64(a), Value::F64(b)) => Value::F64(matmul(a, b)?),
                (Value::I64(a), Value::I64(b)) => Value::I64(matmul(a, b)?),
                (a, b) => return Err(mismatched(op, a, b)),
            },
            GraphOp::Sum { axes } => map_value!(arg(op, inputs, 0)?, a => sum_axes(a, axes)),
            GraphOp::Expand { axes, .. } => {
                map_value!(arg(op, inputs, 0)?, a => expand(a, axes, meta.shape)?)
            }
            GraphOp::Reshape(_) => arg(op, inputs, 0)?.reshape(meta.shape)?,
            GraphOp::Transpose => map_value!(arg(op, inputs, 0)?, a => transpose(a)?),
            GraphOp::Flatcat => flatcat(inputs, meta.dtype)?,
            GraphOp::Slice { start, len } => arg(op, inputs, 0)?.read_flat(*start, *len)?,
            GraphOp::Cast(dtype) => arg(op, inputs, 0)?.cast(*dtype),
        };
        Ok(out)
    }
}

fn arg<'a>(op: &GraphOp, inputs: &[&'a Value], i: usize) -> Result<&'a Value> {
    inputs
        .get(i)
        .copied()
        .ok_or_else(|| GraphError::backend(format!("{op} is missing input {i}")))
}

fn mismatched(op: &GraphOp, a: &Value, b: &Value) -> GraphError {
    GraphError::backend(format!(
        "{op} operands have dtypes {} and {}",
        a.dtype(),
        b.dtype()
    ))
}

fn unary_kernel(op: UnaryOp, x: &Value) -> Result<Value> {
    Ok(match x {
        Value::F32(a) => Value::F32(float_unary(op, a)),
        Value::F64(a) => Value::F64(float_unary(op, a)),
        Value::I64(a) => Value::I64(int_unary(op, a)?),
    })
}

fn float_unary<T: Float>(op: UnaryOp, a: &ArrayD<T>) -> ArrayD<T> {
    let one = T::one();
    match op {
        UnaryOp::Neg => a.mapv(|x| -x),
        UnaryOp::Recip => a.mapv(T::recip),
        UnaryOp::Exp => a.mapv(T::exp),
        UnaryOp::Log => a.mapv(T::ln),
        UnaryOp::Square => a.mapv(|x| x * x),
        UnaryOp::Sqrt => a.mapv(T::sqrt),
        UnaryOp::Tanh => a.mapv(T::tanh),
        UnaryOp::Sigmoid => a.mapv(|x| one / (one + (-x).exp())),
        // zero and NaN map to themselves
        UnaryOp::Sign => a.mapv(|x| {
            if x > T::zero() {
                one
            } else if x < T::zero() {
                -one
            } else {
                x
            }
        }),
    }
}

fn int_unary(op: UnaryOp, a: &ArrayD<i64>) -> Result<ArrayD<i64>> {
    match op {
        UnaryOp::Neg => Ok(a.mapv(i64::wrapping_neg)),
        UnaryOp::Square => Ok(a.mapv(|x| x.wrapping_mul(x))),
        UnaryOp::Sign => Ok(a.mapv(i64::signum)),
        other => Err(GraphError::backend(format!(
            "{other:?} is not defined for i64"
        ))),
    }
}

fn binary_kernel(op: BinaryOp, a: &Value, b: &Value) -> Result<Value> {
    if a.shape() != b.shape() {
        return Err(GraphError::backend(format!(
            "{op:?} operands have shapes {:?} and {:?}",
            a.shape(),
            b.shape()
        )));
    }
    Ok(match (a, b) {
        (Value::F32(a), Value::F32(b)) => Value::F32(float_binary(op, a, b)),
        (Value::F64(a), Value::F64(b)) => Value::F64(float_binary(op, a, b)),
        (Value::I64(a), Value::I64(b)) => Value::I64(int_binary(op, a, b)?),
        (a, b) => return Err(mismatched(&GraphOp::Binary(op), a, b)),
    })
}

fn float_binary<T: Float>(op: BinaryOp, a: &ArrayD<T>, b: &ArrayD<T>) -> ArrayD<T> {
    Zip::from(a).and(b).map_collect(|&x, &y| match op {
        BinaryOp::Add => x + y,
        BinaryOp::Sub => x - y,
        BinaryOp::Mul => x * y,
        BinaryOp::Div => x / y,
    })
}

fn int_binary(op: BinaryOp, a: &ArrayD<i64>, b: &ArrayD<i64>) -> Result<ArrayD<i64>> {
    let f: fn(i64, i64) -> i64 = match op {
        BinaryOp::Add => i64::wrapping_add,
        BinaryOp::Sub => i64::wrapping_sub,
        BinaryOp::Mul => i64::wrapping_mul,
        BinaryOp::Div => {
            return Err(GraphError::backend("Div is not defined for i64"));
        }
    };
    Ok(Zip::from(a).and(b).map_collect(|&x, &y| f(x, y)))
}

fn view1<T>(a: &ArrayD<T>) -> Result<ArrayView1<'_, T>> {
    a.view()
        .into_dimensionality::<Ix1>()
        .map_err(|e| GraphError::backend(e.to_string()))
}

fn view2<T>(a: &ArrayD<T>) -> Result<ArrayView2<'_, T>> {
    a.view()
        .into_dimensionality::<Ix2>()
        .map_err(|e| GraphError::backend(e.to_string()))
}

fn matmul<T: LinalgScalar>(a: &ArrayD<T>, b: &ArrayD<T>) -> Result<ArrayD<T>> {
    let inner_matches = match (a.shape(), b.shape()) {
        ([_, k1], [k2, _]) | ([_, k1], [k2]) | ([k1], [k2, _]) | ([k1], [k2]) => k1 == k2,
        _ => false,
    };
    if !inner_matches {
        return Err(GraphError::backend(format!(
            "cannot multiply {:?} by {:?}",
            a.shape(),
            b.shape()
        )));
    }
    Ok(match (a.ndim(), b.ndim()) {
        (2, 2) => view2(a)?.dot(&view2(b)?).into_dyn(),
        (2, 1) => view2(a)?.dot(&view1(b)?).into_dyn(),
        (1, 2) => view1(a)?.dot(&view2(b)?).into_dyn(),
        _ => ArrayD::from_elem(IxDyn(&[]), view1(a)?.dot(&view1(b)?)),
    })
}

fn sum_axes<T: Clone + Zero + Add<Output = T>>(a: &ArrayD<T>, axes: &[usize]) -> ArrayD<T> {
    let mut out = a.clone();
    // highest axis first so the remaining indices stay valid
    for &axis in axes.iter().rev() {
        out = out.sum_axis(Axis(axis));
    }
    out
}

fn expand<T: Clone>(a: &ArrayD<T>, axes: &[usize], shape: &[usize]) -> Result<ArrayD<T>> {
    let mut view = a.view();
    for &axis in axes {
        view = view.insert_axis(Axis(axis));
    }
    view.broadcast(IxDyn(shape))
        .map(|v| v.to_owned())
        .ok_or_else(|| {
            GraphError::backend(format!(
                "cannot broadcast {:?} to {shape:?} along axes {axes:?}",
                a.shape()
            ))
        })
}

fn transpose<T: Clone>(a: &ArrayD<T>) -> Result<ArrayD<T>> {
    if a.ndim() != 2 {
        return Err(GraphError::backend(format!(
            "transpose expects a matrix, got shape {:?}",
            a.shape()
        )));
    }
    Ok(a.t().as_standard_layout().into_owned())
}

fn flatcat(inputs: &[&Value], dtype: DType) -> Result<Value> {
    fn parts<'a, T>(
        inputs: &[&'a Value],
        get: fn(&Value) -> Option<&ArrayD<T>>,
    ) -> Result<Vec<&'a ArrayD<T>>> {
        inputs
            .iter()
            .map(|&v| {
                get(v).ok_or_else(|| {
                    GraphError::backend(format!("flatcat operand has dtype {}", v.dtype()))
                })
            })
            .collect()
    }

    fn concat<T: Clone>(parts: Vec<&ArrayD<T>>) -> ArrayD<T> {
        let data: Vec<T> = parts.into_iter().flat_map(|a| a.iter().cloned()).collect();
        Array1::from(data).into_dyn()
    }

    Ok(match dtype {
        DType::F32 => Value::F32(concat(parts(inputs, Value::as_f32)?)),
        DType::F64 => Value::F64(concat(parts(inputs, Value::as_f64)?)),
        DType::I64 => Value::I64(concat(parts(inputs, Value::as_i64)?)),
    })
}
