//! Compiles a graph into a callable [`CompiledFunction`].

mod function;

pub use function::CompiledFunction;

use std::rc::Rc;

use petgraph::{
    algo::toposort,
    graph::{DiGraph, NodeIndex},
};
use rustc_hash::{FxHashMap, FxHashSet};

use crate::{
    backend::{backend_for, Backend},
    config::Config,
    error::{GraphError, Result},
    graph::{Graph, GraphOp, NodeId},
    shared::SharedVariable,
};
use function::{Parameter, Step, StepKind};

/// Binds graphs to a backend.
#[derive(Debug, Clone)]
pub struct Compiler {
    backend: Rc<dyn Backend>,
}

impl Compiler {
    /// Uses the backend selected by `config`.
    pub fn new(config: &Config) -> Self {
        Self {
            backend: backend_for(config.backend),
        }
    }

    pub fn with_backend(backend: Rc<dyn Backend>) -> Self {
        Self { backend }
    }

    /// Compiles `outputs` as a function of `inputs`.
    ///
    /// Every leaf the outputs depend on must be a constant, a shared variable
    /// or one of `inputs`, otherwise `UnboundInputError`.
    pub fn compile(
        &self,
        graph: &Graph,
        inputs: &[NodeId],
        outputs: &[NodeId],
    ) -> Result<CompiledFunction> {
        self.compile_with_updates(graph, inputs, outputs, &[])
    }

    /// Like [`Compiler::compile`], additionally assigning each update value to
    /// its shared variable after every call.
    pub fn compile_with_updates(
        &self,
        graph: &Graph,
        inputs: &[NodeId],
        outputs: &[NodeId],
        updates: &[(NodeId, NodeId)],
    ) -> Result<CompiledFunction> {
        let params = check_inputs(graph, inputs)?;
        for &id in outputs {
            graph.try_node(id)?;
        }
        let update_vars = check_updates(graph, updates)?;

        let roots: Vec<NodeId> = outputs
            .iter()
            .copied()
            .chain(updates.iter().map(|&(_, value)| value))
            .collect();
        let order = evaluation_order(graph, &roots)?;

        let positions: FxHashMap<NodeId, usize> =
            inputs.iter().enumerate().map(|(i, &id)| (id, i)).collect();
        let slot_of: FxHashMap<NodeId, usize> =
            order.iter().enumerate().map(|(i, &id)| (id, i)).collect();

        let mut steps = Vec::with_capacity(order.len());
        for &id in &order {
            let node = graph.node(id);
            let kind = match &node.op {
                GraphOp::Input { name, .. } => match positions.get(&id) {
                    Some(&position) => StepKind::Argument(position),
                    None => {
                        return Err(GraphError::UnboundInputError(format!(
                            "{name} ({id}) is not among the function inputs"
                        )));
                    }
                },
                GraphOp::Constant(value) => StepKind::Constant(value.clone()),
                GraphOp::Shared(var) => StepKind::Shared(var.clone()),
                op => StepKind::Kernel(op.clone()),
            };
            steps.push(Step {
                node: id,
                kind,
                args: node.src.iter().map(|s| slot_of[s]).collect(),
                shape: node.shape.clone(),
                dtype: node.dtype,
                release: Vec::new(),
            });
        }

        let output_slots: Vec<usize> = outputs.iter().map(|id| slot_of[id]).collect();
        let update_slots: Vec<usize> = updates.iter().map(|(_, v)| slot_of[v]).collect();
        assign_releases(&mut steps, output_slots.iter().chain(&update_slots));

        log::debug!(
            "Compiled function: {} inputs, {} outputs, {} updates, {} steps on {}",
            inputs.len(),
            outputs.len(),
            updates.len(),
            steps.len(),
            self.backend.name()
        );

        Ok(CompiledFunction {
            params,
            outputs: outputs.to_vec(),
            output_slots,
            updates: update_vars.into_iter().zip(update_slots).collect(),
            update_nodes: updates.to_vec(),
            steps,
            backend: self.backend.clone(),
        })
    }
}

/// Compiles with the backend selected by the graph's configuration.
pub fn function(graph: &Graph, inputs: &[NodeId], outputs: &[NodeId]) -> Result<CompiledFunction> {
    Compiler::new(graph.config()).compile(graph, inputs, outputs)
}

fn check_inputs(graph: &Graph, inputs: &[NodeId]) -> Result<Vec<Parameter>> {
    let mut seen = FxHashSet::default();
    inputs
        .iter()
        .map(|&id| {
            let node = graph.try_node(id)?;
            let GraphOp::Input { name, .. } = &node.op else {
                return Err(GraphError::InvalidArgument(format!(
                    "{id} ({}) is not an input placeholder",
                    node.op
                )));
            };
            if !seen.insert(id) {
                return Err(GraphError::InvalidArgument(format!(
                    "input {name} is listed twice"
                )));
            }
            Ok(Parameter {
                node: id,
                name: name.clone(),
                shape: node.shape.clone(),
                dtype: node.dtype,
            })
        })
        .collect()
}

fn check_updates(graph: &Graph, updates: &[(NodeId, NodeId)]) -> Result<Vec<SharedVariable>> {
    let mut seen = FxHashSet::default();
    let mut vars = Vec::with_capacity(updates.len());
    for &(target, value) in updates {
        let value_node = graph.try_node(value)?;
        graph.try_node(target)?;
        let var = graph.shared_variable(target).ok_or_else(|| {
            GraphError::InvalidArgument(format!("update target {target} is not a shared variable"))
        })?;
        if !seen.insert(var.id()) {
            return Err(GraphError::InvalidArgument(format!(
                "shared variable {} is updated twice",
                var.name()
            )));
        }
        if value_node.shape != var.symbolic_shape() {
            return Err(GraphError::shape(format!(
                "update of {} with shape {:?} by a value of shape {}",
                var.name(),
                var.shape(),
                value_node.shape
            )));
        }
        let dtype = value_node.dtype;
        if dtype != var.dtype() && !(dtype.is_float() && var.dtype().is_float()) {
            return Err(GraphError::dtype(format!(
                "update of {} variable {} by a {dtype} value",
                var.dtype(),
                var.name()
            )));
        }
        vars.push(var.clone());
    }
    Ok(vars)
}

/// Global topological order of every node reachable from `roots`.
fn evaluation_order(graph: &Graph, roots: &[NodeId]) -> Result<Vec<NodeId>> {
    let mut reachable = FxHashSet::default();
    let mut stack = roots.to_vec();
    while let Some(id) = stack.pop() {
        if reachable.insert(id) {
            stack.extend(graph.try_node(id)?.src.iter().copied());
        }
    }
    let mut ids: Vec<NodeId> = reachable.into_iter().collect();
    ids.sort_unstable();

    let mut deps: DiGraph<NodeId, ()> = DiGraph::with_capacity(ids.len(), ids.len());
    let index: FxHashMap<NodeId, NodeIndex> =
        ids.iter().map(|&id| (id, deps.add_node(id))).collect();
    for &id in &ids {
        for src in &graph.node(id).src {
            deps.add_edge(index[src], index[&id], ());
        }
    }

    let sorted = toposort(&deps, None).map_err(|cycle| GraphError::CycleError(deps[cycle.node_id()]))?;
    Ok(sorted.into_iter().map(|ix| deps[ix]).collect())
}

/// Records, on each step, the slots it is the last reader of. Slots in
/// `keep` are read after evaluation and are never released.
fn assign_releases<'a>(steps: &mut [Step], keep: impl Iterator<Item = &'a usize>) {
    let keep: FxHashSet<usize> = keep.copied().collect();
    let mut last_use: FxHashMap<usize, usize> = FxHashMap::default();
    for (i, step) in steps.iter().enumerate() {
        for &slot in &step.args {
            last_use.insert(slot, i);
        }
    }
    for (slot, reader) in last_use {
        if !keep.contains(&slot) {
            steps[reader].release.push(slot);
        }
    }
    for step in steps.iter_mut() {
        step.release.sort_unstable();
    }
}
