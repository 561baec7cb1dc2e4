use std::rc::Rc;

use crate::{
    backend::{Backend, KernelMeta},
    dtype::DType,
    error::{GraphError, Result},
    graph::{GraphOp, NodeId},
    shape::{Shape, ShapeEnv},
    shared::SharedVariable,
    value::Value,
};

/// How a step produces its value.
#[derive(Debug, Clone)]
pub(crate) enum StepKind {
    /// Positional argument.
    Argument(usize),
    Constant(Value),
    Shared(SharedVariable),
    /// Operator evaluated by the backend.
    Kernel(GraphOp),
}

/// One node of the evaluation order. Values live in slots indexed by the
/// position of their step.
#[derive(Debug, Clone)]
pub(crate) struct Step {
    pub node: NodeId,
    pub kind: StepKind,
    pub args: Vec<usize>,
    pub shape: Shape,
    pub dtype: DType,
    /// Slots whose last reader is this step.
    pub release: Vec<usize>,
}

/// Declared signature of one positional argument.
#[derive(Debug, Clone)]
pub(crate) struct Parameter {
    pub node: NodeId,
    pub name: String,
    pub shape: Shape,
    pub dtype: DType,
}

/// An executable function compiled from a graph.
///
/// The function holds no reference to the graph and no state of its own:
/// shared-variable values are read from (and updates written to) the
/// variables themselves, so it can be called any number of times.
#[derive(Debug, Clone)]
pub struct CompiledFunction {
    pub(crate) params: Vec<Parameter>,
    pub(crate) outputs: Vec<NodeId>,
    pub(crate) output_slots: Vec<usize>,
    pub(crate) updates: Vec<(SharedVariable, usize)>,
    pub(crate) update_nodes: Vec<(NodeId, NodeId)>,
    pub(crate) steps: Vec<Step>,
    pub(crate) backend: Rc<dyn Backend>,
}

impl CompiledFunction {
    /// The input nodes, in call-signature order.
    pub fn inputs(&self) -> Vec<NodeId> {
        self.params.iter().map(|p| p.node).collect()
    }

    pub fn outputs(&self) -> &[NodeId] {
        &self.outputs
    }

    /// Declared `(shared variable node, new value node)` pairs.
    pub fn updates(&self) -> &[(NodeId, NodeId)] {
        &self.update_nodes
    }

    /// Evaluation order. Every node appears after all of its inputs.
    pub fn order(&self) -> Vec<NodeId> {
        self.steps.iter().map(|s| s.node).collect()
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    /// Evaluates the function on positional `args` and returns the output
    /// values in order.
    ///
    /// Declared updates are applied after every output has been computed,
    /// and all of them are computed before any is written.
    pub fn call(&self, args: &[Value]) -> Result<Vec<Value>> {
        if args.len() != self.params.len() {
            return Err(GraphError::InvalidArgument(format!(
                "function takes {} arguments, got {}",
                self.params.len(),
                args.len()
            )));
        }

        let mut env = ShapeEnv::new();
        let mut bound = Vec::with_capacity(args.len());
        for (param, arg) in self.params.iter().zip(args) {
            bound.push(self.bind_argument(param, arg, &mut env)?);
        }

        let mut slots: Vec<Option<Value>> = vec![None; self.steps.len()];
        for (i, step) in self.steps.iter().enumerate() {
            let value = match &step.kind {
                StepKind::Argument(index) => bound[*index].clone(),
                StepKind::Constant(value) => value.clone(),
                StepKind::Shared(var) => var.get_value()?,
                StepKind::Kernel(op) => self.run_kernel(step, op, &slots, &env)?,
            };
            log::trace!("{} = {} : {:?}", step.node, step.kind_name(), value.shape());
            slots[i] = Some(value);
            for &slot in &step.release {
                slots[slot] = None;
            }
        }

        let outputs = self
            .output_slots
            .iter()
            .map(|&slot| take_slot(&slots, slot))
            .collect::<Result<Vec<_>>>()?;

        let mut new_values = Vec::with_capacity(self.updates.len());
        for (var, slot) in &self.updates {
            new_values.push((var, take_slot(&slots, *slot)?));
        }
        for (var, value) in new_values {
            var.set_value(&value)?;
        }

        Ok(outputs)
    }

    fn bind_argument(&self, param: &Parameter, arg: &Value, env: &mut ShapeEnv) -> Result<Value> {
        env.bind(&param.shape, arg.shape()).map_err(|e| match e {
            GraphError::ShapeError(msg) => {
                GraphError::shape(format!("argument {}: {msg}", param.name))
            }
            other => other,
        })?;
        if arg.dtype() == param.dtype {
            Ok(arg.clone())
        } else if arg.dtype().is_float() && param.dtype.is_float() {
            Ok(arg.cast(param.dtype))
        } else {
            Err(GraphError::dtype(format!(
                "argument {} expects {}, got {}",
                param.name,
                param.dtype,
                arg.dtype()
            )))
        }
    }

    fn run_kernel(
        &self,
        step: &Step,
        op: &GraphOp,
        slots: &[Option<Value>],
        env: &ShapeEnv,
    ) -> Result<Value> {
        let shape = step.shape.resolve(env)?;
        let inputs = step
            .args
            .iter()
            .map(|&slot| {
                slots[slot].as_ref().ok_or_else(|| {
                    GraphError::backend(format!("{} read a released value", step.node))
                })
            })
            .collect::<Result<Vec<_>>>()?;
        let meta = KernelMeta {
            shape: &shape,
            dtype: step.dtype,
        };
        let value = self.backend.evaluate(op, &inputs, &meta)?;
        if value.shape() != shape.as_slice() || value.dtype() != step.dtype {
            return Err(GraphError::backend(format!(
                "{} kernel for {} returned {:?} {}, expected {shape:?} {}",
                self.backend.name(),
                op,
                value.shape(),
                value.dtype(),
                step.dtype
            )));
        }
        Ok(value)
    }
}

impl Step {
    fn kind_name(&self) -> String {
        match &self.kind {
            StepKind::Argument(i) => format!("arg{i}"),
            StepKind::Constant(_) => "constant".to_string(),
            StepKind::Shared(var) => format!("shared {}", var.name()),
            StepKind::Kernel(op) => op.to_string(),
        }
    }
}

fn take_slot(slots: &[Option<Value>], slot: usize) -> Result<Value> {
    slots[slot]
        .clone()
        .ok_or_else(|| GraphError::backend(format!("slot {slot} was released before use")))
}
