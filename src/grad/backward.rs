//! Backward pass implementation for automatic differentiation
//!
//! This module provides the `backward()` function that computes gradients
//! by propagating through the computation graph in reverse order.

use crate::{
    error::{GraphError, Result},
    graph::{topological_sort, Graph, NodeId},
    value::Value,
};

use super::context::GradContext;
use super::rules::compute_vjp;

/// Result of backward pass computation.
///
/// Contains the gradient for the requested targets.
#[derive(Debug)]
pub struct GradResult {
    context: GradContext,
    targets: Vec<NodeId>,
    grads: Vec<NodeId>,
}

impl GradResult {
    /// The gradient for a specific target, or `None` if it was not requested.
    pub fn get(&self, target: NodeId) -> Option<NodeId> {
        self.targets
            .iter()
            .position(|&t| t == target)
            .map(|i| self.grads[i])
    }

    /// Gradients in the same order as the targets were provided.
    pub fn grads(&self) -> &[NodeId] {
        &self.grads
    }

    pub fn context(&self) -> &GradContext {
        &self.context
    }
}

/// Compute gradients of the scalar `output` with respect to `targets`.
///
/// Every target gets a gradient node of its own shape; a target the output
/// does not depend on gets zeros. On error no node is left behind.
pub fn backward(graph: &mut Graph, output: NodeId, targets: &[NodeId]) -> Result<GradResult> {
    let checkpoint = graph.len();
    let result = backward_inner(graph, output, targets);
    if result.is_err() {
        graph.truncate(checkpoint);
    }
    result
}

fn backward_inner(graph: &mut Graph, output: NodeId, targets: &[NodeId]) -> Result<GradResult> {
    let out = graph.try_node(output)?;
    if !out.is_scalar() {
        return Err(GraphError::DifferentiationError(format!(
            "output {output} has shape {}, only scalar outputs can be differentiated",
            out.shape
        )));
    }
    if !out.dtype.is_float() {
        return Err(GraphError::DifferentiationError(format!(
            "output {output} has integer dtype {}",
            out.dtype
        )));
    }
    let out_dtype = out.dtype;
    for &t in targets {
        let node = graph.try_node(t)?;
        if !node.dtype.is_float() {
            return Err(GraphError::DifferentiationError(format!(
                "cannot differentiate with respect to {t} of dtype {}",
                node.dtype
            )));
        }
    }

    let start = graph.len();
    let order = topological_sort(graph, &[output])?;
    let mut ctx = GradContext::new();
    ctx.prepare(graph, &order, targets);

    // Seed the output with 1
    if ctx.requires_grad(output) {
        let seed = graph.constant_exact(Value::scalar(1.0, out_dtype));
        ctx.accumulate(output, seed)?;
    }

    // Traverse in reverse order (from output to inputs)
    for &id in order.iter().rev() {
        if !ctx.requires_grad(id) {
            continue;
        }
        let Some(grad_output) = ctx.finalize(graph, id)? else {
            continue;
        };

        let src = graph.node(id).src.clone();
        let wanted: Vec<bool> = src.iter().map(|&s| ctx.requires_grad(s)).collect();
        if !wanted.iter().any(|&w| w) {
            continue;
        }

        let vjp = compute_vjp(graph, id, grad_output, &wanted)?;
        for ((&s, grad), want) in src.iter().zip(vjp.input_grads).zip(wanted) {
            if let (Some(grad), true) = (grad, want) {
                ctx.check_order(id, s)?;
                ctx.accumulate(s, grad)?;
            }
        }
    }

    let mut grads = Vec::with_capacity(targets.len());
    for &t in targets {
        let grad = match ctx.finalize(graph, t)? {
            Some(grad) => grad,
            None => graph.zeros_like(t)?,
        };
        grads.push(grad);
    }

    log::debug!(
        "Differentiated {output} with respect to {} targets: {} adjoints, {} new nodes",
        targets.len(),
        ctx.num_grads(),
        graph.len() - start
    );

    Ok(GradResult {
        context: ctx,
        targets: targets.to_vec(),
        grads,
    })
}

/// Compute gradients of `output` with respect to `targets`, one node per
/// target in the same order.
pub fn gradients(graph: &mut Graph, output: NodeId, targets: &[NodeId]) -> Result<Vec<NodeId>> {
    Ok(backward(graph, output, targets)?.grads)
}

/// Compute gradient of `output` with respect to a single target.
pub fn grad(graph: &mut Graph, output: NodeId, target: NodeId) -> Result<NodeId> {
    Ok(backward(graph, output, &[target])?.grads[0])
}
