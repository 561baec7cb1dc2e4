use std::fmt;

use crate::{dtype::DType, shape::Shape, shared::SharedVariable, value::Value};

/// Elementwise operators with one operand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnaryOp {
    Neg,
    Recip,
    Exp,
    Log,
    Square,
    Sqrt,
    Tanh,
    Sigmoid,
    Sign,
}

impl UnaryOp {
    /// Whether the operator is only defined for float operands.
    pub fn requires_float(&self) -> bool {
        !matches!(self, UnaryOp::Neg | UnaryOp::Square | UnaryOp::Sign)
    }
}

/// Elementwise operators with two identically shaped operands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
}

impl BinaryOp {
    pub fn is_commutative(&self) -> bool {
        matches!(self, BinaryOp::Add | BinaryOp::Mul)
    }

    pub fn requires_float(&self) -> bool {
        matches!(self, BinaryOp::Div)
    }
}

/// An enumeration of all graph operations.
///
/// The set is closed: shape inference, gradient rules, simplification rules
/// and backend kernels each match on it exhaustively.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum GraphOp {
    /// A placeholder bound positionally when a compiled function is called.
    /// `index` is unique within the owning graph.
    Input {
        index: usize,
        name: String,
        shape: Shape,
        dtype: DType,
    },
    /// A literal value.
    Constant(Value),
    /// A mutable leaf whose value lives outside the graph.
    Shared(SharedVariable),
    Unary(UnaryOp),
    Binary(BinaryOp),
    /// Matrix/vector product of rank 1 or 2 operands.
    MatMul,
    /// Sum over the listed (sorted, distinct) axes, which are removed.
    Sum { axes: Vec<usize> },
    /// Broadcast by inserting `axes` into the source shape to reach `shape`.
    Expand { axes: Vec<usize>, shape: Shape },
    /// Row-major reshape to `shape`.
    Reshape(Shape),
    /// Swap the two axes of a matrix.
    Transpose,
    /// Flatten every source and lay them end to end.
    Flatcat,
    /// Contiguous range of a vector.
    Slice { start: usize, len: usize },
    Cast(DType),
}

/// Coarse operator category, used by logging and backends that dispatch on
/// the family of an operator rather than its parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpTag {
    Input,
    Constant,
    Shared,
    ElementwiseUnary,
    ElementwiseBinary,
    MatMul,
    Reduction,
    Reshape,
    Concatenation,
    Cast,
}

impl GraphOp {
    pub fn tag(&self) -> OpTag {
        match self {
            GraphOp::Input { .. } => OpTag::Input,
            GraphOp::Constant(_) => OpTag::Constant,
            GraphOp::Shared(_) => OpTag::Shared,
            GraphOp::Unary(_) => OpTag::ElementwiseUnary,
            GraphOp::Binary(_) => OpTag::ElementwiseBinary,
            GraphOp::MatMul => OpTag::MatMul,
            GraphOp::Sum { .. } => OpTag::Reduction,
            GraphOp::Expand { .. }
            | GraphOp::Reshape(_)
            | GraphOp::Transpose
            | GraphOp::Slice { .. } => OpTag::Reshape,
            GraphOp::Flatcat => OpTag::Concatenation,
            GraphOp::Cast(_) => OpTag::Cast,
        }
    }

    /// Returns `true` for operations without inputs.
    pub fn is_leaf(&self) -> bool {
        matches!(
            self,
            GraphOp::Input { .. } | GraphOp::Constant(_) | GraphOp::Shared(_)
        )
    }

    pub fn is_constant(&self) -> bool {
        matches!(self, GraphOp::Constant(_))
    }
}

impl fmt::Display for GraphOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GraphOp::Input { name, .. } => write!(f, "Input({name})"),
            GraphOp::Constant(v) => match v.as_scalar() {
                Some(x) if v.ndim() == 0 => write!(f, "Constant({x})"),
                _ => write!(f, "Constant({:?})", v.shape()),
            },
            GraphOp::Shared(var) => write!(f, "Shared({})", var.name()),
            GraphOp::Unary(op) => write!(f, "{op:?}"),
            GraphOp::Binary(op) => write!(f, "{op:?}"),
            GraphOp::MatMul => write!(f, "MatMul"),
            GraphOp::Sum { axes } => write!(f, "Sum{axes:?}"),
            GraphOp::Expand { axes, shape } => write!(f, "Expand{axes:?}->{shape}"),
            GraphOp::Reshape(shape) => write!(f, "Reshape({shape})"),
            GraphOp::Transpose => write!(f, "Transpose"),
            GraphOp::Flatcat => write!(f, "Flatcat"),
            GraphOp::Slice { start, len } => write!(f, "Slice({start}..{})", start + len),
            GraphOp::Cast(dtype) => write!(f, "Cast({dtype})"),
        }
    }
}
