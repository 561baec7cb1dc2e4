//! Fixed-point rewrite engine.

use log::{debug, trace};
use rustc_hash::FxHashMap;

use crate::{
    error::{GraphError, Result},
    graph::{topological_sort, Graph, GraphOp, NodeId},
};

type RewriteFn = dyn Fn(&mut Graph, NodeId) -> Result<Option<NodeId>>;

/// A named local rewrite.
///
/// The function inspects one node and, if the rule applies, returns an
/// equivalent node (new or existing). It must not add nodes when it does
/// not apply.
pub struct RewriteRule {
    pub name: String,
    apply: Box<RewriteFn>,
}

impl RewriteRule {
    pub fn new<F>(name: &str, apply: F) -> Self
    where
        F: Fn(&mut Graph, NodeId) -> Result<Option<NodeId>> + 'static,
    {
        RewriteRule {
            name: name.to_string(),
            apply: Box::new(apply),
        }
    }
}

impl std::fmt::Debug for RewriteRule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RewriteRule").field("name", &self.name).finish()
    }
}

/// Applies a rule set to a graph until nothing changes.
///
/// Each pass walks the nodes reachable from the outputs in topological
/// order. A node is first rebuilt on its (already simplified) inputs, with
/// the inputs of commutative operators put in canonical order; structurally
/// identical nodes are then merged, and finally the rules are applied to the
/// node until none fires. Passes repeat until the outputs are unchanged.
#[derive(Debug)]
pub struct Simplifier {
    rules: Vec<RewriteRule>,
    max_iterations: usize,
}

impl Simplifier {
    pub fn new(rules: Vec<RewriteRule>, max_iterations: usize) -> Self {
        Self {
            rules,
            max_iterations,
        }
    }

    pub fn rules(&self) -> &[RewriteRule] {
        &self.rules
    }

    /// Returns the simplified counterparts of `outputs`, in order.
    pub fn run(&self, graph: &mut Graph, outputs: &[NodeId]) -> Result<Vec<NodeId>> {
        for &id in outputs {
            graph.try_node(id)?;
        }
        let start = graph.len();
        let mut current = outputs.to_vec();
        for pass in 1..=self.max_iterations {
            let (next, rewrites) = self.pass(graph, &current)?;
            debug!("Simplifier pass {pass}: {rewrites} rewrites");
            if next == current {
                debug!(
                    "Simplified {} outputs in {pass} passes, {} new nodes",
                    outputs.len(),
                    graph.len() - start
                );
                return Ok(next);
            }
            current = next;
        }
        Err(GraphError::SimplificationError(format!(
            "no fixed point after {} passes",
            self.max_iterations
        )))
    }

    fn pass(&self, graph: &mut Graph, outputs: &[NodeId]) -> Result<(Vec<NodeId>, usize)> {
        let order = topological_sort(graph, outputs)?;
        let mut memo: FxHashMap<NodeId, NodeId> = FxHashMap::default();
        let mut seen: FxHashMap<(GraphOp, Vec<NodeId>), NodeId> = FxHashMap::default();
        let mut rewrites = 0;

        for id in order {
            let node = graph.node(id);
            let op = node.op.clone();
            let mut src: Vec<NodeId> = node.src.iter().map(|s| memo[s]).collect();
            if let GraphOp::Binary(binary) = &op {
                if binary.is_commutative() {
                    src.sort_unstable();
                }
            }
            let unchanged = src == node.src;

            let key = (op, src);
            let rebuilt = match seen.get(&key) {
                Some(&existing) => existing,
                None => {
                    let rebuilt = if unchanged {
                        id
                    } else {
                        graph.add_node(key.0.clone(), key.1.clone())?
                    };
                    seen.insert(key, rebuilt);
                    rebuilt
                }
            };
            if rebuilt != id {
                rewrites += 1;
            }

            let (result, fired) = self.rewrite_node(graph, rebuilt)?;
            rewrites += fired;
            memo.insert(id, result);
        }

        Ok((outputs.iter().map(|o| memo[o]).collect(), rewrites))
    }

    /// Applies rules at `id` until none fires.
    fn rewrite_node(&self, graph: &mut Graph, id: NodeId) -> Result<(NodeId, usize)> {
        let mut current = id;
        let mut fired = 0;
        'outer: loop {
            for rule in &self.rules {
                let Some(replacement) = (rule.apply)(graph, current)? else {
                    continue;
                };
                if replacement == current {
                    continue;
                }
                check_equivalent(graph, &rule.name, current, replacement)?;
                trace!("Applied {}: {current} -> {replacement}", rule.name);
                current = replacement;
                fired += 1;
                if fired > self.max_iterations {
                    return Err(GraphError::SimplificationError(format!(
                        "more than {} rewrites at {id}",
                        self.max_iterations
                    )));
                }
                continue 'outer;
            }
            return Ok((current, fired));
        }
    }
}

/// Rewrites may change representation only, never shape or dtype.
fn check_equivalent(graph: &Graph, rule: &str, old: NodeId, new: NodeId) -> Result<()> {
    let (a, b) = (graph.try_node(old)?, graph.try_node(new)?);
    if a.shape != b.shape || a.dtype != b.dtype {
        return Err(GraphError::SimplificationError(format!(
            "{rule} rewrote {old} ({} {}) into {new} ({} {})",
            a.shape, a.dtype, b.shape, b.dtype
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dtype::DType;

    #[test]
    fn test_cse_merges_identical_nodes() {
        let mut g = Graph::new();
        let x = g.input("x", [3], DType::F32);
        let a = g.exp(x).unwrap();
        let b = g.exp(x).unwrap();
        let s = g.add(a, b).unwrap();

        let out = Simplifier::new(Vec::new(), 8).run(&mut g, &[s]).unwrap();
        let node = g.node(out[0]);
        assert_eq!(node.src[0], node.src[1]);
    }

    #[test]
    fn test_commutative_inputs_are_canonical() {
        let mut g = Graph::new();
        let x = g.input("x", [3], DType::F32);
        let y = g.input("y", [3], DType::F32);
        let a = g.mul(x, y).unwrap();
        let b = g.mul(y, x).unwrap();
        let out = Simplifier::new(Vec::new(), 8).run(&mut g, &[a, b]).unwrap();
        assert_eq!(out[0], out[1]);
    }

    #[test]
    fn test_oscillating_rules_hit_the_cap() {
        let mut g = Graph::new();
        let x = g.input("x", [3], DType::F32);
        let e = g.exp(x).unwrap();
        let rules = vec![RewriteRule::new("wrap", |g: &mut Graph, id: NodeId| {
            let wrapped = g.neg(id)?;
            Ok(Some(g.neg(wrapped)?))
        })];
        let err = Simplifier::new(rules, 4).run(&mut g, &[e]).unwrap_err();
        assert!(matches!(err, GraphError::SimplificationError(_)));
    }

    #[test]
    fn test_type_changing_rule_is_rejected() {
        let mut g = Graph::new();
        let x = g.input("x", [3], DType::F32);
        let e = g.exp(x).unwrap();
        let rules = vec![RewriteRule::new("bad", |g: &mut Graph, id: NodeId| {
            if matches!(g.node(id).op, GraphOp::Unary(_)) {
                Ok(Some(g.cast(id, DType::F64)?))
            } else {
                Ok(None)
            }
        })];
        assert!(matches!(
            Simplifier::new(rules, 8).run(&mut g, &[e]),
            Err(GraphError::SimplificationError(_))
        ));
    }
}
