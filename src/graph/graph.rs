use rustc_hash::FxHashMap;

use crate::{
    config::Config,
    dtype::DType,
    error::{GraphError, Result},
    graph::{
        infer::infer,
        node::{NodeData, NodeId},
        op::GraphOp,
    },
    shape::Shape,
    shared::SharedVariable,
};

/// Owns all the nodes of a computation graph.
///
/// Nodes live in an append-only arena addressed by [`NodeId`]. The forward
/// expression, its gradients and their simplified forms all share one arena,
/// so a shared variable node is referenced by every expression that uses it
/// without any node owning another.
#[derive(Debug, Default)]
pub struct Graph {
    config: Config,
    nodes: Vec<NodeData>,
    inputs: Vec<NodeId>,
    shared: Vec<NodeId>,
    shared_names: FxHashMap<String, NodeId>,
}

impl Graph {
    /// Creates a new, empty graph with the default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: Config) -> Self {
        Graph {
            config,
            ..Self::default()
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Node lookup for ids already validated against this graph.
    pub(crate) fn node(&self, id: NodeId) -> &NodeData {
        &self.nodes[id.0]
    }

    /// Returns the node data for `id`, or `None` if this graph never allocated it.
    pub fn get(&self, id: NodeId) -> Option<&NodeData> {
        self.nodes.get(id.0)
    }

    pub fn try_node(&self, id: NodeId) -> Result<&NodeData> {
        self.get(id).ok_or(GraphError::UnknownNode(id))
    }

    pub fn nodes(&self) -> impl Iterator<Item = (NodeId, &NodeData)> {
        self.nodes.iter().enumerate().map(|(i, n)| (NodeId(i), n))
    }

    /// Input placeholders, in declaration order.
    pub fn inputs(&self) -> &[NodeId] {
        &self.inputs
    }

    /// Nodes of the registered shared variables, in declaration order.
    pub fn shared_nodes(&self) -> &[NodeId] {
        &self.shared
    }

    pub fn shared_by_name(&self, name: &str) -> Option<NodeId> {
        self.shared_names.get(name).copied()
    }

    /// The variable behind a `Shared` node.
    pub fn shared_variable(&self, id: NodeId) -> Option<&SharedVariable> {
        match &self.get(id)?.op {
            GraphOp::Shared(var) => Some(var),
            _ => None,
        }
    }

    /// Adds a new node to the graph after validating its inputs and inferring
    /// its shape and dtype.
    ///
    /// An input id equal to the id the new node would receive, or any later
    /// id, would make the node depend on itself or on a node that can only be
    /// built from it, so it is rejected with `CycleError`.
    pub fn add_node(&mut self, op: GraphOp, src: Vec<NodeId>) -> Result<NodeId> {
        let next = self.nodes.len();
        for &s in &src {
            if s.0 >= next {
                return Err(GraphError::CycleError(s));
            }
        }
        let (shape, dtype) = {
            let refs: Vec<&NodeData> = src.iter().map(|s| &self.nodes[s.0]).collect();
            infer(&op, &refs)?
        };
        let id = NodeId(next);
        if let GraphOp::Input { .. } = op {
            self.inputs.push(id);
        }
        log::trace!("add_node {id} = {op} {src:?} : {shape} {dtype}");
        self.nodes.push(NodeData {
            op,
            src,
            dtype,
            shape,
        });
        Ok(id)
    }

    /// Appends a leaf whose shape and dtype the caller has already derived.
    pub(crate) fn push_leaf(&mut self, op: GraphOp, shape: Shape, dtype: DType) -> NodeId {
        let id = NodeId(self.nodes.len());
        if let GraphOp::Input { .. } = op {
            self.inputs.push(id);
        }
        log::trace!("push_leaf {id} = {op} : {shape} {dtype}");
        self.nodes.push(NodeData {
            op,
            src: Vec::new(),
            dtype,
            shape,
        });
        id
    }

    /// Drops every node with an id of `len` or above, undoing a failed
    /// multi-node transformation.
    pub(crate) fn truncate(&mut self, len: usize) {
        if len >= self.nodes.len() {
            return;
        }
        log::trace!("Discarding {} nodes", self.nodes.len() - len);
        self.nodes.truncate(len);
        self.inputs.retain(|id| id.0 < len);
        self.shared.retain(|id| id.0 < len);
        self.shared_names.retain(|_, id| id.0 < len);
    }

    pub(crate) fn next_input_index(&self) -> usize {
        self.inputs.len()
    }

    pub(crate) fn register_shared(&mut self, name: &str, id: NodeId) -> Result<()> {
        if self.shared_names.contains_key(name) {
            return Err(GraphError::InvalidArgument(format!(
                "a shared variable named {name:?} already exists"
            )));
        }
        self.shared_names.insert(name.to_string(), id);
        self.shared.push(id);
        Ok(())
    }

    /// Finds an existing node for `var`, if it is registered here.
    pub(crate) fn find_shared(&self, var: &SharedVariable) -> Option<NodeId> {
        self.shared
            .iter()
            .copied()
            .find(|&id| self.shared_variable(id) == Some(var))
    }
}
