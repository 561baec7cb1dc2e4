//! Graph simplification.
//!
//! [`simplify`] rewrites the subgraph reachable from a list of outputs into
//! an equivalent, usually smaller one:
//!
//! - **Constant folding**: operators on constant inputs are evaluated with
//!   the reference backend; elementwise operators on splats stay splats.
//! - **Identities**: `x + 0`, `x - 0`, `0 - x`, `x * 1`, `x * 0`, `x / 1`,
//!   `--x`, `x + x`, `x + -y`, nested constant scales.
//! - **Structural no-ops**: same-shape reshapes, reshape chains, double
//!   transposes, same-dtype casts, sums and expands over no axes.
//! - **Common subexpressions**: nodes with the same operator and the same
//!   inputs are merged, commutative inputs compared in canonical order.
//!
//! Rewrites only ever add nodes; the original outputs stay valid.

mod rewriter;
mod rules;

pub use rewriter::{RewriteRule, Simplifier};
pub use rules::{default_rules, splat_value};

use crate::{
    error::Result,
    graph::{Graph, NodeId},
};

/// Simplifies `outputs`, returning their replacements in order.
///
/// Runs the default rule set to a fixed point, bounded by the graph's
/// `max_simplify_iterations`. On error the graph is left as it was.
pub fn simplify(graph: &mut Graph, outputs: &[NodeId]) -> Result<Vec<NodeId>> {
    let simplifier = Simplifier::new(default_rules(), graph.config().max_simplify_iterations);
    let checkpoint = graph.len();
    let result = simplifier.run(graph, outputs);
    if result.is_err() {
        graph.truncate(checkpoint);
    }
    result
}

#[cfg(test)]
mod tests;
