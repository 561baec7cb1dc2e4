use std::cell::RefCell;
use std::rc::Rc;

use crate::{
    dtype::DType,
    error::{GraphError, Result},
    value::Value,
};

/// Handle to one contiguous, one-dimensional buffer holding packed shared
/// variables. Clones alias the same storage.
///
/// The buffer is single-owner: functions that read or write it through
/// different handles must not run concurrently.
#[derive(Debug, Clone)]
pub struct FlatBuffer(Rc<RefCell<Value>>);

impl FlatBuffer {
    pub(crate) fn zeros(len: usize, dtype: DType) -> Self {
        FlatBuffer(Rc::new(RefCell::new(Value::zeros(&[len], dtype))))
    }

    pub fn len(&self) -> usize {
        self.0.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn dtype(&self) -> DType {
        self.0.borrow().dtype()
    }

    /// Copy of the whole buffer.
    pub fn get(&self) -> Value {
        self.0.borrow().clone()
    }

    /// Overwrites the whole buffer. `value` must have the buffer's length; a
    /// float value is converted to the buffer's dtype.
    pub fn set(&self, value: &Value) -> Result<()> {
        let len = self.len();
        if value.len() != len {
            return Err(GraphError::LayoutError(format!(
                "flat buffer holds {len} elements, got a value of shape {:?}",
                value.shape()
            )));
        }
        let dtype = self.dtype();
        if value.dtype() != dtype && !(value.dtype().is_float() && dtype.is_float()) {
            return Err(GraphError::dtype(format!(
                "cannot assign {} value to a {dtype} flat buffer",
                value.dtype()
            )));
        }
        self.0.borrow_mut().write_flat(0, value)
    }

    /// Elements widened to `f64`.
    pub fn to_vec(&self) -> Vec<f64> {
        self.0.borrow().to_f64_vec()
    }

    pub fn ptr_eq(&self, other: &FlatBuffer) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    pub(crate) fn read_range(&self, offset: usize, len: usize) -> Result<Value> {
        self.0.borrow().read_flat(offset, len)
    }

    pub(crate) fn write_range(&self, offset: usize, value: &Value) -> Result<()> {
        self.0.borrow_mut().write_flat(offset, value)
    }
}
