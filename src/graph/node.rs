use std::fmt;

use crate::{
    dtype::DType,
    graph::op::GraphOp,
    shape::Shape,
};

/// A unique identifier for a node within a `Graph`.
///
/// Ids are dense indices into the graph arena and increase with creation
/// order, so a node's id is always greater than the ids of its inputs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub usize);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "%{}", self.0)
    }
}

/// The data associated with a single node in the computation graph.
///
/// Nodes are immutable once added; rewrites always allocate new nodes.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeData {
    /// The operation performed by this node.
    pub op: GraphOp,
    /// The `NodeId`s of the input nodes to this operation.
    pub src: Vec<NodeId>,
    /// The data type of the value produced by this node.
    pub dtype: DType,
    /// The symbolic shape of the value.
    pub shape: Shape,
}

impl NodeData {
    pub fn is_leaf(&self) -> bool {
        self.src.is_empty()
    }

    pub fn is_scalar(&self) -> bool {
        self.shape.is_scalar()
    }
}
