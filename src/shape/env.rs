use rustc_hash::FxHashMap;

use super::{Dim, Shape};
use crate::error::{GraphError, Result};

/// Concrete values of symbolic extents for one function call.
#[derive(Debug, Clone, Default)]
pub struct ShapeEnv {
    bindings: FxHashMap<String, usize>,
}

impl ShapeEnv {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<usize> {
        self.bindings.get(name).copied()
    }

    /// Matches a declared shape against the extents of an actual value,
    /// binding any symbolic axes it mentions.
    pub fn bind(&mut self, declared: &Shape, actual: &[usize]) -> Result<()> {
        if declared.rank() != actual.len() {
            return Err(GraphError::shape(format!(
                "expected rank {} for shape {declared}, got {actual:?}",
                declared.rank()
            )));
        }
        for (dim, &extent) in declared.dims().iter().zip(actual) {
            match dim {
                Dim::Const(n) if *n != extent => {
                    return Err(GraphError::shape(format!(
                        "expected shape {declared}, got {actual:?}"
                    )));
                }
                Dim::Const(_) => {}
                Dim::Var(name) => match self.bindings.get(name) {
                    Some(&bound) if bound != extent => {
                        return Err(GraphError::shape(format!(
                            "symbolic extent {name} bound to {bound}, got {extent}"
                        )));
                    }
                    Some(_) => {}
                    None => {
                        self.bindings.insert(name.clone(), extent);
                    }
                },
            }
        }
        Ok(())
    }
}
