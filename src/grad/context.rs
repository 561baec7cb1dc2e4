//! Gradient computation context
//!
//! This module provides the `GradContext` structure that tracks adjoints
//! during backpropagation.

use rustc_hash::{FxHashMap, FxHashSet};

use crate::{
    error::{GraphError, Result},
    graph::{Graph, NodeId},
};

/// Context for gradient computation during backpropagation.
///
/// Contributions to a node's adjoint are collected as they arrive and only
/// summed (with new `Add` nodes) when the node itself is propagated. Once a
/// node has been propagated its adjoint is final: a late contribution means
/// the traversal visited nodes out of order and is reported as an error
/// instead of silently producing a partial gradient.
#[derive(Debug, Default)]
pub struct GradContext {
    /// Pending adjoint contributions per node.
    pending: FxHashMap<NodeId, Vec<NodeId>>,
    /// Summed adjoint of every propagated node.
    finalized: FxHashMap<NodeId, NodeId>,
    /// Nodes through which some target is reachable.
    requires_grad_set: FxHashSet<NodeId>,
    /// Position of each node in the forward topological order.
    rank: FxHashMap<NodeId, usize>,
}

impl GradContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records the forward order and marks every node of `order` that depends
    /// on one of `targets` (through float-valued nodes) as requiring a
    /// gradient.
    pub fn prepare(&mut self, graph: &Graph, order: &[NodeId], targets: &[NodeId]) {
        let targets: FxHashSet<NodeId> = targets.iter().copied().collect();
        for (i, &id) in order.iter().enumerate() {
            self.rank.insert(id, i);
            let node = graph.node(id);
            let needed = node.dtype.is_float()
                && (targets.contains(&id)
                    || node.src.iter().any(|s| self.requires_grad_set.contains(s)));
            if needed {
                self.requires_grad_set.insert(id);
            }
        }
    }

    pub fn requires_grad(&self, id: NodeId) -> bool {
        self.requires_grad_set.contains(&id)
    }

    /// Adds a contribution to the adjoint of `id`.
    pub fn accumulate(&mut self, id: NodeId, grad: NodeId) -> Result<()> {
        if self.finalized.contains_key(&id) {
            return Err(GraphError::DifferentiationError(format!(
                "adjoint of {id} received a contribution after it was propagated"
            )));
        }
        self.pending.entry(id).or_default().push(grad);
        Ok(())
    }

    /// Sums the contributions to `id` into its final adjoint. Returns `None`
    /// if nothing was contributed.
    pub fn finalize(&mut self, graph: &mut Graph, id: NodeId) -> Result<Option<NodeId>> {
        if let Some(&done) = self.finalized.get(&id) {
            return Ok(Some(done));
        }
        let Some(contributions) = self.pending.remove(&id) else {
            return Ok(None);
        };
        let mut parts = contributions.into_iter();
        let Some(mut total) = parts.next() else {
            return Ok(None);
        };
        for part in parts {
            total = graph.add(total, part)?;
        }
        self.finalized.insert(id, total);
        Ok(Some(total))
    }

    /// Checks that `src` precedes `id` in the forward order, which is what
    /// makes the adjoint of `src` complete before it is propagated.
    pub fn check_order(&self, id: NodeId, src: NodeId) -> Result<()> {
        match (self.rank.get(&src), self.rank.get(&id)) {
            (Some(s), Some(n)) if s < n => Ok(()),
            _ => Err(GraphError::DifferentiationError(format!(
                "{src} is not ordered before its consumer {id}"
            ))),
        }
    }

    /// The final adjoint of `id`, if it has been propagated.
    pub fn get_grad(&self, id: NodeId) -> Option<NodeId> {
        self.finalized.get(&id).copied()
    }

    /// Number of nodes with a final adjoint.
    pub fn num_grads(&self) -> usize {
        self.finalized.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dtype::DType;

    #[test]
    fn test_requires_grad_follows_dependencies() {
        let mut g = Graph::new();
        let x = g.input("x", [3], DType::F32);
        let y = g.input("y", [3], DType::F32);
        let e = g.exp(y).unwrap();
        let s = g.add(x, e).unwrap();

        let mut ctx = GradContext::new();
        ctx.prepare(&g, &[x, y, e, s], &[x]);
        assert!(ctx.requires_grad(x));
        assert!(ctx.requires_grad(s));
        assert!(!ctx.requires_grad(y));
        assert!(!ctx.requires_grad(e));
    }

    #[test]
    fn test_contributions_are_summed_on_finalize() {
        let mut g = Graph::new();
        let x = g.input("x", [3], DType::F32);
        let a = g.input("a", [3], DType::F32);
        let b = g.input("b", [3], DType::F32);

        let mut ctx = GradContext::new();
        ctx.accumulate(x, a).unwrap();
        ctx.accumulate(x, b).unwrap();
        let total = ctx.finalize(&mut g, x).unwrap().unwrap();
        assert_eq!(g.node(total).src, vec![a, b]);
        assert_eq!(ctx.get_grad(x), Some(total));
        assert_eq!(ctx.num_grads(), 1);
    }

    #[test]
    fn test_late_contribution_is_rejected() {
        let mut g = Graph::new();
        let x = g.input("x", [3], DType::F32);
        let a = g.input("a", [3], DType::F32);

        let mut ctx = GradContext::new();
        ctx.accumulate(x, a).unwrap();
        ctx.finalize(&mut g, x).unwrap();
        assert!(matches!(
            ctx.accumulate(x, a),
            Err(GraphError::DifferentiationError(_))
        ));
    }

    #[test]
    fn test_single_contribution_adds_no_node() {
        let mut g = Graph::new();
        let x = g.input("x", [3], DType::F32);
        let a = g.input("a", [3], DType::F32);
        let before = g.len();

        let mut ctx = GradContext::new();
        ctx.accumulate(x, a).unwrap();
        assert_eq!(ctx.finalize(&mut g, x).unwrap(), Some(a));
        assert_eq!(g.len(), before);
        assert_eq!(ctx.finalize(&mut g, a).unwrap(), None);
    }
}
