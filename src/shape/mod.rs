//! Symbolic shapes.
//!
//! A [`Shape`] is an ordered list of [`Dim`]s. Shapes are compared
//! structurally: two symbolic extents are equal only when they name the same
//! variable. [`ShapeEnv`] binds symbolic extents to concrete sizes at call
//! time.

mod dim;
mod env;

pub use dim::Dim;
pub use env::ShapeEnv;

use std::fmt;

use crate::error::{GraphError, Result};

#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct Shape(Vec<Dim>);

impl Shape {
    pub fn new(dims: Vec<Dim>) -> Self {
        Self(dims)
    }

    /// The rank-0 shape.
    pub fn scalar() -> Self {
        Self(Vec::new())
    }

    pub fn rank(&self) -> usize {
        self.0.len()
    }

    pub fn is_scalar(&self) -> bool {
        self.0.is_empty()
    }

    pub fn dims(&self) -> &[Dim] {
        &self.0
    }

    pub fn dim(&self, axis: usize) -> &Dim {
        &self.0[axis]
    }

    /// Concrete extents, or `None` if any axis is symbolic.
    pub fn concrete(&self) -> Option<Vec<usize>> {
        self.0.iter().map(Dim::as_const).collect()
    }

    /// Number of elements, or `None` if any axis is symbolic.
    pub fn numel(&self) -> Option<usize> {
        self.concrete().map(|dims| dims.iter().product())
    }

    /// Product of the concrete axes together with the sorted list of symbolic
    /// axis names. Two shapes with equal signatures hold the same number of
    /// elements for every binding.
    pub(crate) fn size_signature(&self) -> (usize, Vec<&str>) {
        let mut product = 1;
        let mut vars = Vec::new();
        for dim in &self.0 {
            match dim {
                Dim::Const(n) => product *= n,
                Dim::Var(v) => vars.push(v.as_str()),
            }
        }
        vars.sort_unstable();
        (product, vars)
    }

    /// Shape with `axes` removed. `axes` must be valid for this shape.
    pub(crate) fn without_axes(&self, axes: &[usize]) -> Shape {
        Shape(
            self.0
                .iter()
                .enumerate()
                .filter(|(i, _)| !axes.contains(i))
                .map(|(_, d)| d.clone())
                .collect(),
        )
    }

    /// Resolves every axis against `env`.
    pub fn resolve(&self, env: &ShapeEnv) -> Result<Vec<usize>> {
        self.0
            .iter()
            .map(|dim| match dim {
                Dim::Const(n) => Ok(*n),
                Dim::Var(v) => env.get(v).ok_or_else(|| {
                    GraphError::shape(format!("symbolic extent {v} is not bound"))
                }),
            })
            .collect()
    }
}

impl From<Vec<Dim>> for Shape {
    fn from(dims: Vec<Dim>) -> Self {
        Shape(dims)
    }
}

impl From<Vec<usize>> for Shape {
    fn from(dims: Vec<usize>) -> Self {
        Shape(dims.into_iter().map(Dim::Const).collect())
    }
}

impl From<&[usize]> for Shape {
    fn from(dims: &[usize]) -> Self {
        Shape(dims.iter().copied().map(Dim::Const).collect())
    }
}

impl<const N: usize> From<[usize; N]> for Shape {
    fn from(dims: [usize; N]) -> Self {
        Shape::from(&dims[..])
    }
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[")?;
        for (i, dim) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{dim}")?;
        }
        write!(f, "]")
    }
}

/// Builds a [`Shape`] from a mix of integer literals and symbolic names.
///
/// ```
/// use symgrad::shape;
/// let s = shape!["n", 3];
/// assert_eq!(s.to_string(), "[n, 3]");
/// ```
#[macro_export]
macro_rules! shape {
    () => {
        $crate::shape::Shape::scalar()
    };
    ($($dim:expr),+ $(,)?) => {
        $crate::shape::Shape::new(vec![$($crate::shape::Dim::from($dim)),+])
    };
}
