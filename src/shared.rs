//! Shared variables: named, mutable leaves whose value persists across
//! function calls.
//!
//! A variable either owns its value or views a slice of a [`FlatBuffer`]
//! after [`pack`](crate::flat::pack) has rebound it. Handles are reference
//! counted and deliberately `!Send`: storage is single-owner, and concurrent
//! use of functions touching the same variable must be serialised by the
//! caller.

use std::cell::RefCell;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::rc::Rc;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::dtype::DType;
use crate::error::{GraphError, Result};
use crate::flat::FlatBuffer;
use crate::shape::Shape;
use crate::value::Value;

static NEXT_SHARED_ID: AtomicUsize = AtomicUsize::new(0);

fn next_id() -> usize {
    NEXT_SHARED_ID.fetch_add(1, Ordering::SeqCst)
}

#[derive(Debug)]
enum Storage {
    Owned(Value),
    Flat { buffer: FlatBuffer, offset: usize },
}

struct SharedInner {
    id: usize,
    name: String,
    shape: Vec<usize>,
    dtype: DType,
    storage: RefCell<Storage>,
}

/// Handle to a shared variable. Clones alias the same storage.
#[derive(Clone)]
pub struct SharedVariable(Rc<SharedInner>);

impl SharedVariable {
    pub(crate) fn new(name: &str, value: Value) -> Self {
        SharedVariable(Rc::new(SharedInner {
            id: next_id(),
            name: name.to_string(),
            shape: value.shape().to_vec(),
            dtype: value.dtype(),
            storage: RefCell::new(Storage::Owned(value)),
        }))
    }

    /// Process-unique identity.
    pub fn id(&self) -> usize {
        self.0.id
    }

    pub fn name(&self) -> &str {
        &self.0.name
    }

    pub fn shape(&self) -> &[usize] {
        &self.0.shape
    }

    pub fn symbolic_shape(&self) -> Shape {
        Shape::from(self.0.shape.as_slice())
    }

    pub fn dtype(&self) -> DType {
        self.0.dtype
    }

    pub fn len(&self) -> usize {
        self.0.shape.iter().product()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copy of the current value.
    pub fn get_value(&self) -> Result<Value> {
        match &*self.0.storage.borrow() {
            Storage::Owned(value) => Ok(value.clone()),
            Storage::Flat { buffer, offset } => buffer
                .read_range(*offset, self.len())?
                .reshape(&self.0.shape),
        }
    }

    /// Assigns a new value. The shape must match exactly; float values are
    /// converted to the variable's float dtype, other dtype changes fail.
    pub fn set_value(&self, value: &Value) -> Result<()> {
        if value.shape() != self.shape() {
            return Err(GraphError::shape(format!(
                "cannot assign shape {:?} to shared variable {} of shape {:?}",
                value.shape(),
                self.name(),
                self.shape()
            )));
        }
        if value.dtype() != self.dtype() && !(value.dtype().is_float() && self.dtype().is_float())
        {
            return Err(GraphError::dtype(format!(
                "cannot assign {} value to shared variable {} of dtype {}",
                value.dtype(),
                self.name(),
                self.dtype()
            )));
        }
        let value = value.cast(self.dtype());
        match &mut *self.0.storage.borrow_mut() {
            Storage::Owned(slot) => *slot = value,
            Storage::Flat { buffer, offset } => buffer.write_range(*offset, &value)?,
        }
        log::trace!("Assigned shared variable {}", self.name());
        Ok(())
    }

    /// Buffer and element offset if this variable lives in a flat buffer.
    pub fn flat_view(&self) -> Option<(FlatBuffer, usize)> {
        match &*self.0.storage.borrow() {
            Storage::Owned(_) => None,
            Storage::Flat { buffer, offset } => Some((buffer.clone(), *offset)),
        }
    }

    pub fn is_packed(&self) -> bool {
        self.flat_view().is_some()
    }

    /// Points the variable at `buffer[offset..offset + len]`. The caller has
    /// already copied the current value into that range.
    pub(crate) fn rebind_flat(&self, buffer: FlatBuffer, offset: usize) {
        *self.0.storage.borrow_mut() = Storage::Flat { buffer, offset };
    }
}

impl PartialEq for SharedVariable {
    fn eq(&self, other: &Self) -> bool {
        self.0.id == other.0.id
    }
}

impl Eq for SharedVariable {}

impl Hash for SharedVariable {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.id.hash(state);
    }
}

impl fmt::Debug for SharedVariable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedVariable")
            .field("id", &self.0.id)
            .field("name", &self.0.name)
            .field("shape", &self.0.shape)
            .field("dtype", &self.0.dtype)
            .field("packed", &self.is_packed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_ids_are_unique() {
        let a = SharedVariable::new("a", Value::from(1.0f64));
        let b = SharedVariable::new("a", Value::from(1.0f64));
        assert_ne!(a.id(), b.id());
        assert_ne!(a, b);
        assert_eq!(a, a.clone());
    }

    #[test]
    fn test_get_and_set_value() {
        let w = SharedVariable::new("w", Value::from(array![1.0f64, 2.0]));
        w.set_value(&Value::from(array![3.0f32, 4.0])).unwrap();
        let v = w.get_value().unwrap();
        assert_eq!(v.dtype(), DType::F64);
        assert_eq!(v.to_f64_vec(), vec![3.0, 4.0]);
    }

    #[test]
    fn test_set_value_rejects_mismatch() {
        let w = SharedVariable::new("w", Value::from(array![1.0f64, 2.0]));
        assert!(matches!(
            w.set_value(&Value::from(array![1.0f64, 2.0, 3.0])),
            Err(GraphError::ShapeError(_))
        ));
        assert!(matches!(
            w.set_value(&Value::from(array![1i64, 2])),
            Err(GraphError::DTypeError(_))
        ));
    }

    #[test]
    fn test_clones_alias_storage() {
        let w = SharedVariable::new("w", Value::from(0.0f64));
        let alias = w.clone();
        alias.set_value(&Value::from(5.0f64)).unwrap();
        assert_eq!(w.get_value().unwrap().as_scalar(), Some(5.0));
    }
}
