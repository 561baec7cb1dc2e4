//! The backend contract and the reference backend.
//!
//! The compiler is backend-agnostic: it resolves shapes, orders the nodes and
//! feeds each non-leaf operator with its input values to
//! [`Backend::evaluate`]. Leaves (inputs, constants, shared variables) are
//! bound by the runtime.

mod reference;

pub use reference::ReferenceBackend;

use std::fmt::Debug;
use std::rc::Rc;

use crate::{config::BackendKind, dtype::DType, error::Result, graph::GraphOp, value::Value};

/// Resolved output metadata of the node being evaluated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KernelMeta<'a> {
    /// Concrete output extents, symbolic axes already bound.
    pub shape: &'a [usize],
    pub dtype: DType,
}

/// Supplies one pure evaluation kernel per operator.
///
/// Kernels must be deterministic: identical inputs give bit-identical
/// outputs. A kernel may parallelise internally as long as that holds.
pub trait Backend: Debug {
    fn name(&self) -> &'static str;

    /// Evaluates `op` on `inputs`, producing a value of `meta.shape` and
    /// `meta.dtype`.
    fn evaluate(&self, op: &GraphOp, inputs: &[&Value], meta: &KernelMeta) -> Result<Value>;
}

/// Instantiates the backend selected by a configuration.
pub fn backend_for(kind: BackendKind) -> Rc<dyn Backend> {
    match kind {
        BackendKind::Reference => Rc::new(ReferenceBackend::new()),
    }
}
