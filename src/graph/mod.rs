//! The symbolic computation graph.
//!
//! A [`Graph`] is an append-only arena of [`NodeData`]. Nodes are built
//! through the expression builder methods on `Graph` (see `builder.rs`),
//! which infer and validate the shape and dtype of every node as it is
//! created.

mod builder;
#[allow(clippy::module_inception)]
mod graph;
pub mod infer;
pub mod node;
pub mod op;
pub mod traversal;

pub use graph::Graph;
pub use node::{NodeData, NodeId};
pub use op::{BinaryOp, GraphOp, OpTag, UnaryOp};
pub use traversal::{graph_to_string, topological_sort};
