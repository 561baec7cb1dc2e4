//! Error types for graph construction, differentiation, simplification,
//! packing and compilation.

use thiserror::Error;

use crate::graph::NodeId;

/// Main error type for every fallible operation in the crate.
///
/// All errors are raised synchronously where they are detected; none of the
/// operations that return one leave a partially built result behind.
#[derive(Debug, Error)]
pub enum GraphError {
    /// Operand shapes are incompatible for the requested operator.
    #[error("Shape error: {0}")]
    ShapeError(String),

    /// Operand dtypes are incompatible and no implicit promotion applies.
    #[error("DType error: {0}")]
    DTypeError(String),

    /// A gradient was requested that cannot be expressed.
    #[error("Differentiation error: {0}")]
    DifferentiationError(String),

    /// The simplifier violated one of its own invariants.
    #[error("Simplification error: {0}")]
    SimplificationError(String),

    /// A node list does not match a flat storage layout.
    #[error("Layout error: {0}")]
    LayoutError(String),

    /// A graph leaf is neither a declared input, a constant nor a shared variable.
    #[error("Unbound input: {0}")]
    UnboundInputError(String),

    /// A node would depend on itself, directly or transitively.
    #[error("Cycle detected at node {0}")]
    CycleError(NodeId),

    /// A node id does not belong to the graph.
    #[error("Unknown node: {0}")]
    UnknownNode(NodeId),

    /// Invalid argument (arity, duplicate names, configuration strings).
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// A backend kernel failed or broke its contract.
    #[error("Backend error: {0}")]
    BackendError(String),
}

impl GraphError {
    pub(crate) fn shape(msg: impl Into<String>) -> Self {
        GraphError::ShapeError(msg.into())
    }

    pub(crate) fn dtype(msg: impl Into<String>) -> Self {
        GraphError::DTypeError(msg.into())
    }

    pub(crate) fn backend(msg: impl Into<String>) -> Self {
        GraphError::BackendError(msg.into())
    }
}

/// Convenience result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, GraphError>;
