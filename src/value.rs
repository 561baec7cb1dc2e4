//! Runtime values: dtype-tagged n-dimensional arrays backed by `ndarray`.

use std::hash::{Hash, Hasher};

use ndarray::{Array, ArrayD, Dimension, IxDyn};

use crate::dtype::DType;
use crate::error::{GraphError, Result};

/// A dense array of one of the supported element types.
///
/// Equality and hashing are bitwise, so `Value` can serve as part of a
/// structural key (two constants are the same node only if every bit
/// matches).
#[derive(Debug, Clone)]
pub enum Value {
    F32(ArrayD<f32>),
    F64(ArrayD<f64>),
    I64(ArrayD<i64>),
}

impl Value {
    pub fn dtype(&self) -> DType {
        match self {
            Value::F32(_) => DType::F32,
            Value::F64(_) => DType::F64,
            Value::I64(_) => DType::I64,
        }
    }

    pub fn shape(&self) -> &[usize] {
        match self {
            Value::F32(a) => a.shape(),
            Value::F64(a) => a.shape(),
            Value::I64(a) => a.shape(),
        }
    }

    pub fn ndim(&self) -> usize {
        self.shape().len()
    }

    /// Number of elements.
    pub fn len(&self) -> usize {
        self.shape().iter().product()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Rank-0 value holding `x` converted to `dtype`.
    pub fn scalar(x: f64, dtype: DType) -> Value {
        Value::full(&[], x, dtype)
    }

    pub fn full(shape: &[usize], x: f64, dtype: DType) -> Value {
        Value::from_f64_array(ArrayD::from_elem(IxDyn(shape), x), dtype)
    }

    pub fn zeros(shape: &[usize], dtype: DType) -> Value {
        Value::full(shape, 0.0, dtype)
    }

    /// Builds a value from row-major data.
    pub fn from_vec(shape: &[usize], data: Vec<f64>, dtype: DType) -> Result<Value> {
        let expected: usize = shape.iter().product();
        if data.len() != expected {
            return Err(GraphError::shape(format!(
                "shape {shape:?} requires {expected} elements, got {}",
                data.len()
            )));
        }
        let array = ArrayD::from_shape_vec(IxDyn(shape), data)
            .map_err(|e| GraphError::shape(e.to_string()))?;
        Ok(Value::from_f64_array(array, dtype))
    }

    pub(crate) fn from_f64_array(array: ArrayD<f64>, dtype: DType) -> Value {
        match dtype {
            DType::F64 => Value::F64(array),
            DType::F32 => Value::F32(array.mapv(|x| x as f32)),
            DType::I64 => Value::I64(array.mapv(|x| x as i64)),
        }
    }

    pub fn to_f64_array(&self) -> ArrayD<f64> {
        match self {
            Value::F32(a) => a.mapv(f64::from),
            Value::F64(a) => a.clone(),
            Value::I64(a) => a.mapv(|x| x as f64),
        }
    }

    /// Elements in row-major order, widened to `f64`.
    pub fn to_f64_vec(&self) -> Vec<f64> {
        match self {
            Value::F32(a) => a.iter().map(|&x| f64::from(x)).collect(),
            Value::F64(a) => a.iter().copied().collect(),
            Value::I64(a) => a.iter().map(|&x| x as f64).collect(),
        }
    }

    /// The single element of a one-element value.
    pub fn as_scalar(&self) -> Option<f64> {
        if self.len() != 1 {
            return None;
        }
        self.to_f64_vec().first().copied()
    }

    /// If every element holds the same value, returns it as a rank-0 value
    /// of the same dtype. Elements are compared bitwise in their own type.
    pub fn splat(&self) -> Option<Value> {
        fn uniform<T: Copy>(a: &ArrayD<T>, same: impl Fn(T, T) -> bool) -> Option<ArrayD<T>> {
            let first = *a.iter().next()?;
            a.iter()
                .all(|&x| same(x, first))
                .then(|| ArrayD::from_elem(IxDyn(&[]), first))
        }
        match self {
            Value::F32(a) => uniform(a, |x, y| x.to_bits() == y.to_bits()).map(Value::F32),
            Value::F64(a) => uniform(a, |x, y| x.to_bits() == y.to_bits()).map(Value::F64),
            Value::I64(a) => uniform(a, |x, y| x == y).map(Value::I64),
        }
    }

    pub fn as_f32(&self) -> Option<&ArrayD<f32>> {
        match self {
            Value::F32(a) => Some(a),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<&ArrayD<f64>> {
        match self {
            Value::F64(a) => Some(a),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<&ArrayD<i64>> {
        match self {
            Value::I64(a) => Some(a),
            _ => None,
        }
    }

    pub fn cast(&self, dtype: DType) -> Value {
        if self.dtype() == dtype {
            return self.clone();
        }
        Value::from_f64_array(self.to_f64_array(), dtype)
    }

    pub fn reshape(&self, shape: &[usize]) -> Result<Value> {
        fn go<T: Clone>(a: &ArrayD<T>, shape: &[usize]) -> Result<ArrayD<T>> {
            a.to_shape(IxDyn(shape))
                .map(|v| v.into_owned())
                .map_err(|e| GraphError::shape(e.to_string()))
        }
        Ok(match self {
            Value::F32(a) => Value::F32(go(a, shape)?),
            Value::F64(a) => Value::F64(go(a, shape)?),
            Value::I64(a) => Value::I64(go(a, shape)?),
        })
    }

    /// Copies `len` elements starting at flat `offset` into a new 1-D value.
    pub(crate) fn read_flat(&self, offset: usize, len: usize) -> Result<Value> {
        fn go<T: Clone>(a: &ArrayD<T>, offset: usize, len: usize) -> Result<ArrayD<T>> {
            let data: Vec<T> = a.iter().skip(offset).take(len).cloned().collect();
            if data.len() != len {
                return Err(GraphError::shape(format!(
                    "range {offset}..{} out of bounds for {} elements",
                    offset + len,
                    a.len()
                )));
            }
            ArrayD::from_shape_vec(IxDyn(&[len]), data)
                .map_err(|e| GraphError::shape(e.to_string()))
        }
        Ok(match self {
            Value::F32(a) => Value::F32(go(a, offset, len)?),
            Value::F64(a) => Value::F64(go(a, offset, len)?),
            Value::I64(a) => Value::I64(go(a, offset, len)?),
        })
    }

    /// Overwrites the elements starting at flat `offset` with the elements of
    /// `src` (row-major), converting to this value's dtype.
    pub(crate) fn write_flat(&mut self, offset: usize, src: &Value) -> Result<()> {
        fn go<T: Clone>(dst: &mut ArrayD<T>, offset: usize, src: &ArrayD<T>) -> Result<()> {
            if offset + src.len() > dst.len() {
                return Err(GraphError::shape(format!(
                    "range {offset}..{} out of bounds for {} elements",
                    offset + src.len(),
                    dst.len()
                )));
            }
            for (d, s) in dst.iter_mut().skip(offset).zip(src.iter()) {
                *d = s.clone();
            }
            Ok(())
        }
        let src = src.cast(self.dtype());
        match (self, &src) {
            (Value::F32(d), Value::F32(s)) => go(d, offset, s),
            (Value::F64(d), Value::F64(s)) => go(d, offset, s),
            (Value::I64(d), Value::I64(s)) => go(d, offset, s),
            _ => Err(GraphError::dtype("cast produced a mismatched dtype")),
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        if self.shape() != other.shape() {
            return false;
        }
        match (self, other) {
            (Value::F32(a), Value::F32(b)) => a.iter().zip(b.iter()).all(|(x, y)| x.to_bits() == y.to_bits()),
            (Value::F64(a), Value::F64(b)) => a.iter().zip(b.iter()).all(|(x, y)| x.to_bits() == y.to_bits()),
            (Value::I64(a), Value::I64(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for Value {}

impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.dtype().hash(state);
        self.shape().hash(state);
        match self {
            Value::F32(a) => a.iter().for_each(|x| x.to_bits().hash(state)),
            Value::F64(a) => a.iter().for_each(|x| x.to_bits().hash(state)),
            Value::I64(a) => a.iter().for_each(|x| x.hash(state)),
        }
    }
}

impl<D: Dimension> From<Array<f32, D>> for Value {
    fn from(a: Array<f32, D>) -> Self {
        Value::F32(a.into_dyn())
    }
}

impl<D: Dimension> From<Array<f64, D>> for Value {
    fn from(a: Array<f64, D>) -> Self {
        Value::F64(a.into_dyn())
    }
}

impl<D: Dimension> From<Array<i64, D>> for Value {
    fn from(a: Array<i64, D>) -> Self {
        Value::I64(a.into_dyn())
    }
}

impl From<f32> for Value {
    fn from(x: f32) -> Self {
        Value::F32(ArrayD::from_elem(IxDyn(&[]), x))
    }
}

impl From<f64> for Value {
    fn from(x: f64) -> Self {
        Value::F64(ArrayD::from_elem(IxDyn(&[]), x))
    }
}

impl From<i64> for Value {
    fn from(x: i64) -> Self {
        Value::I64(ArrayD::from_elem(IxDyn(&[]), x))
    }
}

impl From<Vec<f64>> for Value {
    fn from(v: Vec<f64>) -> Self {
        Value::F64(Array::from_vec(v).into_dyn())
    }
}
