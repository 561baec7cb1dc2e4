//! Graph traversal utilities over the node arena.

use rustc_hash::{FxHashMap, FxHashSet};

use crate::{
    error::{GraphError, Result},
    graph::{graph::Graph, node::NodeId},
};

/// Topological sort (inputs before outputs) of every node reachable from
/// `roots`.
///
/// Iterative depth-first post-order, so deep chains do not overflow the
/// stack. A node found on the current path again is reported as a
/// `CycleError`.
pub fn topological_sort(graph: &Graph, roots: &[NodeId]) -> Result<Vec<NodeId>> {
    #[derive(Clone, Copy, PartialEq)]
    enum Mark {
        OnStack,
        Done,
    }

    let mut marks: FxHashMap<NodeId, Mark> = FxHashMap::default();
    let mut order = Vec::new();

    for &root in roots {
        graph.try_node(root)?;
        if marks.contains_key(&root) {
            continue;
        }
        // (node, index of the next source to visit)
        let mut stack = vec![(root, 0usize)];
        marks.insert(root, Mark::OnStack);
        while let Some(top) = stack.last_mut() {
            let (id, next) = *top;
            top.1 += 1;
            if let Some(&child) = graph.try_node(id)?.src.get(next) {
                match marks.get(&child) {
                    Some(Mark::OnStack) => return Err(GraphError::CycleError(child)),
                    Some(Mark::Done) => {}
                    None => {
                        graph.try_node(child)?;
                        marks.insert(child, Mark::OnStack);
                        stack.push((child, 0));
                    }
                }
            } else {
                marks.insert(id, Mark::Done);
                order.push(id);
                stack.pop();
            }
        }
    }

    Ok(order)
}

/// Number of distinct nodes reachable from `roots`.
pub fn count_nodes(graph: &Graph, roots: &[NodeId]) -> Result<usize> {
    Ok(topological_sort(graph, roots)?.len())
}

/// Leaves reachable from `roots`, in topological order.
pub fn collect_leaves(graph: &Graph, roots: &[NodeId]) -> Result<Vec<NodeId>> {
    Ok(topological_sort(graph, roots)?
        .into_iter()
        .filter(|&id| graph.node(id).is_leaf())
        .collect())
}

/// For every node reachable from `roots`, the nodes that use it as a source.
///
/// A node that uses the same source twice is listed twice.
pub fn consumers(graph: &Graph, roots: &[NodeId]) -> Result<FxHashMap<NodeId, Vec<NodeId>>> {
    let order = topological_sort(graph, roots)?;
    let mut users: FxHashMap<NodeId, Vec<NodeId>> =
        order.iter().map(|&id| (id, Vec::new())).collect();
    for &id in &order {
        for &src in &graph.node(id).src {
            users.entry(src).or_default().push(id);
        }
    }
    Ok(users)
}

/// Nodes with more than one use among the nodes reachable from `roots`,
/// with their use counts.
pub fn find_common_subexpressions(graph: &Graph, roots: &[NodeId]) -> Result<Vec<(NodeId, usize)>> {
    let users = consumers(graph, roots)?;
    let mut shared: Vec<(NodeId, usize)> = users
        .into_iter()
        .filter(|(_, u)| u.len() > 1)
        .map(|(id, u)| (id, u.len()))
        .collect();
    shared.sort_unstable();
    Ok(shared)
}

/// Whether `target` is reachable from any of `roots`.
pub fn depends_on(graph: &Graph, roots: &[NodeId], target: NodeId) -> Result<bool> {
    let mut visited = FxHashSet::default();
    let mut stack = roots.to_vec();
    while let Some(id) = stack.pop() {
        if id == target {
            return Ok(true);
        }
        if visited.insert(id) {
            stack.extend(graph.try_node(id)?.src.iter().copied());
        }
    }
    Ok(false)
}

/// Convert graph to string representation (for debugging)
pub fn graph_to_string(graph: &Graph, roots: &[NodeId]) -> Result<String> {
    let mut result = String::new();
    for id in topological_sort(graph, roots)? {
        let node = graph.node(id);
        let src: Vec<String> = node.src.iter().map(ToString::to_string).collect();
        result.push_str(&format!(
            "{id} = {}({}) : {} {}\n",
            node.op,
            src.join(", "),
            node.shape,
            node.dtype
        ));
    }
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dtype::DType;

    fn make_test_graph() -> (Graph, NodeId, NodeId, NodeId) {
        let mut g = Graph::new();
        let a = g.input("a", [32], DType::F32);
        let b = g.input("b", [32], DType::F32);
        let c = g.add(a, b).unwrap();
        (g, a, b, c)
    }

    #[test]
    fn test_topological_sort() {
        let (g, a, b, c) = make_test_graph();
        let sorted = topological_sort(&g, &[c]).unwrap();

        let pos = |id| sorted.iter().position(|&n| n == id).unwrap();
        assert!(pos(a) < pos(c));
        assert!(pos(b) < pos(c));
        assert_eq!(sorted.len(), 3);
    }

    #[test]
    fn test_topological_sort_excludes_unreachable() {
        let (mut g, a, _, c) = make_test_graph();
        let unused = g.exp(a).unwrap();
        let sorted = topological_sort(&g, &[c]).unwrap();
        assert!(!sorted.contains(&unused));
    }

    #[test]
    fn test_unknown_root() {
        let (g, ..) = make_test_graph();
        assert!(matches!(
            topological_sort(&g, &[NodeId(99)]),
            Err(GraphError::UnknownNode(NodeId(99)))
        ));
    }

    #[test]
    fn test_collect_leaves() {
        let (g, a, b, c) = make_test_graph();
        assert_eq!(collect_leaves(&g, &[c]).unwrap(), vec![a, b]);
    }

    #[test]
    fn test_count_nodes() {
        let (g, _, _, c) = make_test_graph();
        assert_eq!(count_nodes(&g, &[c]).unwrap(), 3);
    }

    #[test]
    fn test_common_subexpressions() {
        let mut g = Graph::new();
        let a = g.input("a", [4], DType::F32);
        let b = g.mul(a, a).unwrap();

        let common = find_common_subexpressions(&g, &[b]).unwrap();
        assert_eq!(common, vec![(a, 2)]);
    }

    #[test]
    fn test_depends_on() {
        let (mut g, a, b, c) = make_test_graph();
        let d = g.exp(b).unwrap();
        assert!(depends_on(&g, &[c], a).unwrap());
        assert!(!depends_on(&g, &[d], a).unwrap());
    }

    #[test]
    fn test_graph_to_string() {
        let (g, _, _, c) = make_test_graph();
        let text = graph_to_string(&g, &[c]).unwrap();
        assert!(text.contains("%2 = Add(%0, %1) : [32] f32"));
    }
}
