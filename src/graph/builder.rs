//! Expression builder.
//!
//! Every constructor validates its operands before touching the arena, so a
//! failed call leaves the graph exactly as it was. Nothing is evaluated here.

use crate::{
    dtype::DType,
    error::{GraphError, Result},
    graph::{
        graph::Graph,
        node::NodeId,
        op::{BinaryOp, GraphOp, UnaryOp},
    },
    shape::Shape,
    shared::SharedVariable,
    value::Value,
};

impl Graph {
    // --- Leaves ---

    /// Adds a placeholder bound positionally when a compiled function is
    /// called. `shape` may contain symbolic extents.
    pub fn input(&mut self, name: &str, shape: impl Into<Shape>, dtype: DType) -> NodeId {
        let shape = shape.into();
        let op = GraphOp::Input {
            index: self.next_input_index(),
            name: name.to_string(),
            shape: shape.clone(),
            dtype,
        };
        self.push_leaf(op, shape, dtype)
    }

    /// Adds a constant. Float values are converted to the configured precision.
    pub fn constant(&mut self, value: impl Into<Value>) -> NodeId {
        let value = self.with_precision(value.into());
        self.constant_exact(value)
    }

    /// A scalar constant in the configured float precision.
    pub fn scalar(&mut self, x: f64) -> NodeId {
        let dtype = self.config().float_dtype();
        self.constant_exact(Value::scalar(x, dtype))
    }

    /// Adds a constant holding exactly `value`, without precision conversion.
    pub fn constant_exact(&mut self, value: Value) -> NodeId {
        let shape = Shape::from(value.shape());
        let dtype = value.dtype();
        self.push_leaf(GraphOp::Constant(value), shape, dtype)
    }

    /// Declares a shared variable with an initial value and registers it for
    /// lookup by name. Float values are converted to the configured precision.
    pub fn shared(&mut self, name: &str, value: impl Into<Value>) -> Result<NodeId> {
        if self.shared_by_name(name).is_some() {
            return Err(GraphError::InvalidArgument(format!(
                "a shared variable named {name:?} already exists"
            )));
        }
        let value = self.with_precision(value.into());
        let var = SharedVariable::new(name, value);
        self.add_shared_node(var)
    }

    /// References an existing shared variable, possibly created by another
    /// graph. Returns the existing node if the variable is already registered.
    pub fn shared_ref(&mut self, var: &SharedVariable) -> Result<NodeId> {
        if let Some(id) = self.find_shared(var) {
            return Ok(id);
        }
        if self.shared_by_name(var.name()).is_some() {
            return Err(GraphError::InvalidArgument(format!(
                "a different shared variable named {:?} already exists",
                var.name()
            )));
        }
        self.add_shared_node(var.clone())
    }

    fn add_shared_node(&mut self, var: SharedVariable) -> Result<NodeId> {
        let name = var.name().to_string();
        let shape = var.symbolic_shape();
        let dtype = var.dtype();
        let id = self.push_leaf(GraphOp::Shared(var), shape, dtype);
        self.register_shared(&name, id)?;
        Ok(id)
    }

    fn with_precision(&self, value: Value) -> Value {
        if value.dtype().is_float() {
            value.cast(self.config().float_dtype())
        } else {
            value
        }
    }

    /// `value` broadcast to the shape and dtype of `like`.
    pub fn full_like(&mut self, like: NodeId, value: f64) -> Result<NodeId> {
        let node = self.try_node(like)?;
        let (shape, dtype) = (node.shape.clone(), node.dtype);
        let c = self.constant_exact(Value::scalar(value, dtype));
        self.broadcast_to(c, shape)
    }

    pub fn zeros_like(&mut self, like: NodeId) -> Result<NodeId> {
        self.full_like(like, 0.0)
    }

    pub fn ones_like(&mut self, like: NodeId) -> Result<NodeId> {
        self.full_like(like, 1.0)
    }

    // --- Elementwise ---

    pub fn unary(&mut self, op: UnaryOp, x: NodeId) -> Result<NodeId> {
        self.add_node(GraphOp::Unary(op), vec![x])
    }

    pub fn neg(&mut self, x: NodeId) -> Result<NodeId> {
        self.unary(UnaryOp::Neg, x)
    }

    pub fn recip(&mut self, x: NodeId) -> Result<NodeId> {
        self.unary(UnaryOp::Recip, x)
    }

    pub fn exp(&mut self, x: NodeId) -> Result<NodeId> {
        self.unary(UnaryOp::Exp, x)
    }

    pub fn log(&mut self, x: NodeId) -> Result<NodeId> {
        self.unary(UnaryOp::Log, x)
    }

    pub fn square(&mut self, x: NodeId) -> Result<NodeId> {
        self.unary(UnaryOp::Square, x)
    }

    pub fn sqrt(&mut self, x: NodeId) -> Result<NodeId> {
        self.unary(UnaryOp::Sqrt, x)
    }

    pub fn tanh(&mut self, x: NodeId) -> Result<NodeId> {
        self.unary(UnaryOp::Tanh, x)
    }

    pub fn sigmoid(&mut self, x: NodeId) -> Result<NodeId> {
        self.unary(UnaryOp::Sigmoid, x)
    }

    pub fn sign(&mut self, x: NodeId) -> Result<NodeId> {
        self.unary(UnaryOp::Sign, x)
    }

    /// Elementwise binary operation. Float operands are promoted to the wider
    /// type and a scalar operand is broadcast to the other operand's shape;
    /// any other shape difference is a `ShapeError`.
    pub fn binary(&mut self, op: BinaryOp, a: NodeId, b: NodeId) -> Result<NodeId> {
        if op.requires_float() {
            for id in [a, b] {
                let dtype = self.try_node(id)?.dtype;
                if !dtype.is_float() {
                    return Err(GraphError::dtype(format!(
                        "{op:?} requires float operands, got {dtype}"
                    )));
                }
            }
        }
        let (a, b) = self.coerce_pair(a, b, &format!("{op:?}"))?;
        self.add_node(GraphOp::Binary(op), vec![a, b])
    }

    pub fn add(&mut self, a: NodeId, b: NodeId) -> Result<NodeId> {
        self.binary(BinaryOp::Add, a, b)
    }

    pub fn sub(&mut self, a: NodeId, b: NodeId) -> Result<NodeId> {
        self.binary(BinaryOp::Sub, a, b)
    }

    pub fn mul(&mut self, a: NodeId, b: NodeId) -> Result<NodeId> {
        self.binary(BinaryOp::Mul, a, b)
    }

    pub fn div(&mut self, a: NodeId, b: NodeId) -> Result<NodeId> {
        self.binary(BinaryOp::Div, a, b)
    }

    fn coerce_pair(&mut self, a: NodeId, b: NodeId, what: &str) -> Result<(NodeId, NodeId)> {
        let (na, nb) = (self.try_node(a)?, self.try_node(b)?);
        let dtype = DType::promote(na.dtype, nb.dtype).ok_or_else(|| {
            GraphError::dtype(format!(
                "{what} operands have dtypes {} and {} with no implicit promotion",
                na.dtype, nb.dtype
            ))
        })?;
        let (sa, sb) = (na.shape.clone(), nb.shape.clone());
        if sa != sb && !sa.is_scalar() && !sb.is_scalar() {
            return Err(GraphError::shape(format!(
                "{what} operands have shapes {sa} and {sb}"
            )));
        }
        let a = self.cast(a, dtype)?;
        let b = self.cast(b, dtype)?;
        if sa == sb {
            Ok((a, b))
        } else if sa.is_scalar() {
            Ok((self.broadcast_to(a, sb)?, b))
        } else {
            Ok((a, self.broadcast_to(b, sa)?))
        }
    }

    // --- Linear algebra ---

    /// Matrix-matrix, matrix-vector, vector-matrix or vector-vector product.
    pub fn dot(&mut self, a: NodeId, b: NodeId) -> Result<NodeId> {
        let (na, nb) = (self.try_node(a)?, self.try_node(b)?);
        let dtype = DType::promote(na.dtype, nb.dtype).ok_or_else(|| {
            GraphError::dtype(format!(
                "dot operands have dtypes {} and {} with no implicit promotion",
                na.dtype, nb.dtype
            ))
        })?;
        if na.dtype == nb.dtype {
            return self.add_node(GraphOp::MatMul, vec![a, b]);
        }
        // Validate shapes before inserting casts.
        let shapes_ok = matches!(
            (na.shape.dims(), nb.shape.dims()),
            ([_, k1], [k2, _]) | ([_, k1], [k2]) | ([k1], [k2, _]) | ([k1], [k2]) if k1 == k2
        );
        if !shapes_ok {
            return Err(GraphError::shape(format!(
                "dot operands have incompatible shapes {} and {}",
                na.shape, nb.shape
            )));
        }
        let a = self.cast(a, dtype)?;
        let b = self.cast(b, dtype)?;
        self.add_node(GraphOp::MatMul, vec![a, b])
    }

    pub fn transpose(&mut self, x: NodeId) -> Result<NodeId> {
        self.add_node(GraphOp::Transpose, vec![x])
    }

    // --- Reductions ---

    /// Sums over `axes` (in any order), removing them.
    pub fn sum(&mut self, x: NodeId, axes: &[usize]) -> Result<NodeId> {
        let mut axes = axes.to_vec();
        axes.sort_unstable();
        self.add_node(GraphOp::Sum { axes }, vec![x])
    }

    /// Sums every element into a scalar.
    pub fn sum_all(&mut self, x: NodeId) -> Result<NodeId> {
        let rank = self.try_node(x)?.shape.rank();
        self.add_node(
            GraphOp::Sum {
                axes: (0..rank).collect(),
            },
            vec![x],
        )
    }

    /// Mean over `axes`. The reduced extents must be static.
    pub fn mean(&mut self, x: NodeId, axes: &[usize]) -> Result<NodeId> {
        let node = self.try_node(x)?;
        if !node.dtype.is_float() {
            return Err(GraphError::dtype(format!(
                "mean requires a float operand, got {}",
                node.dtype
            )));
        }
        let mut count = 1usize;
        for &axis in axes {
            if axis >= node.shape.rank() {
                return Err(GraphError::shape(format!(
                    "mean axis {axis} out of range for shape {}",
                    node.shape
                )));
            }
            count *= node.shape.dim(axis).as_const().ok_or_else(|| {
                GraphError::shape(format!(
                    "mean over symbolic axis {axis} of shape {}",
                    node.shape
                ))
            })?;
        }
        let dtype = node.dtype;
        let total = self.sum(x, axes)?;
        let scale = self.constant_exact(Value::scalar(1.0 / count as f64, dtype));
        self.mul(scale, total)
    }

    // --- Shape manipulation ---

    /// Broadcasts by inserting `axes` so the result has `shape`.
    pub fn expand(&mut self, x: NodeId, axes: &[usize], shape: impl Into<Shape>) -> Result<NodeId> {
        self.add_node(
            GraphOp::Expand {
                axes: axes.to_vec(),
                shape: shape.into(),
            },
            vec![x],
        )
    }

    /// Broadcasts a scalar to `shape`. A node that already has `shape` is
    /// returned unchanged.
    pub fn broadcast_to(&mut self, x: NodeId, shape: impl Into<Shape>) -> Result<NodeId> {
        let shape = shape.into();
        let node = self.try_node(x)?;
        if node.shape == shape {
            return Ok(x);
        }
        if !node.shape.is_scalar() {
            return Err(GraphError::shape(format!(
                "only scalars broadcast, cannot broadcast {} to {shape}",
                node.shape
            )));
        }
        let axes = (0..shape.rank()).collect::<Vec<_>>();
        self.expand(x, &axes, shape)
    }

    pub fn reshape(&mut self, x: NodeId, shape: impl Into<Shape>) -> Result<NodeId> {
        self.add_node(GraphOp::Reshape(shape.into()), vec![x])
    }

    /// Flattens each node and concatenates them in order into one vector.
    /// Float operands of mixed precision are promoted to the widest.
    pub fn flatcat(&mut self, nodes: &[NodeId]) -> Result<NodeId> {
        let mut dtype: Option<DType> = None;
        for &id in nodes {
            let node = self.try_node(id)?;
            if node.shape.numel().is_none() {
                return Err(GraphError::shape(format!(
                    "flatcat requires static extents, got shape {}",
                    node.shape
                )));
            }
            dtype = match dtype {
                None => Some(node.dtype),
                Some(d) => Some(DType::promote(d, node.dtype).ok_or_else(|| {
                    GraphError::dtype(format!(
                        "flatcat operands have dtypes {d} and {} with no implicit promotion",
                        node.dtype
                    ))
                })?),
            };
        }
        let Some(dtype) = dtype else {
            return Err(GraphError::shape("flatcat of an empty node list"));
        };
        let mut src = Vec::with_capacity(nodes.len());
        for &id in nodes {
            src.push(self.cast(id, dtype)?);
        }
        self.add_node(GraphOp::Flatcat, src)
    }

    pub fn slice(&mut self, x: NodeId, start: usize, len: usize) -> Result<NodeId> {
        self.add_node(GraphOp::Slice { start, len }, vec![x])
    }

    /// Converts to `dtype`; a node already of that dtype is returned as is.
    pub fn cast(&mut self, x: NodeId, dtype: DType) -> Result<NodeId> {
        if self.try_node(x)?.dtype == dtype {
            return Ok(x);
        }
        self.add_node(GraphOp::Cast(dtype), vec![x])
    }
}
