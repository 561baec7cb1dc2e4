//! symgrad: symbolic computation graphs with reverse-mode differentiation
//!
//! Expressions are built as nodes of a [`Graph`], differentiated
//! symbolically into new nodes of the same graph, simplified, and finally
//! compiled into a callable [`CompiledFunction`].
//!
//! # Architecture
//!
//! - **graph**: node arena, expression builder, shape/dtype inference, traversal
//! - **grad**: reverse-mode differentiation with per-operator gradient rules
//! - **simplify**: fixed-point rewrite engine (folding, identities, CSE)
//! - **flat**: packing shared variables into one contiguous buffer
//! - **compile**: scheduling a graph into a callable function
//! - **backend**: kernel contract and the ndarray reference backend
//!
//! # Example
//!
//! ```
//! use symgrad::prelude::*;
//!
//! let mut g = Graph::new();
//! let x = g.input("x", [3], DType::F32);
//! let sq = g.square(x).unwrap();
//! let loss = g.sum_all(sq).unwrap();
//! let gx = grad(&mut g, loss, x).unwrap();
//! let gx = simplify(&mut g, &[gx]).unwrap()[0];
//!
//! let f = function(&g, &[x], &[loss, gx]).unwrap();
//! let out = f
//!     .call(&[Value::from_vec(&[3], vec![1.0, 2.0, 3.0], DType::F32).unwrap()])
//!     .unwrap();
//! assert_eq!(out[0].as_scalar(), Some(14.0));
//! assert_eq!(out[1].to_f64_vec(), vec![2.0, 4.0, 6.0]);
//! ```

// ============================================================================
// Core Modules
// ============================================================================

pub mod backend;
pub mod compile;
pub mod config;
pub mod dtype;
pub mod error;
pub mod flat;
pub mod grad;
pub mod graph;
pub mod shape;
pub mod shared;
pub mod simplify;
pub mod value;

// ============================================================================
// Re-exports
// ============================================================================

pub use compile::{function, CompiledFunction, Compiler};
pub use config::{BackendKind, Config, Precision};
pub use dtype::DType;
pub use error::{GraphError, Result};
pub use flat::{pack, FlatBuffer, FlatLayout, FlatStorage};
pub use grad::{grad, gradients};
pub use graph::{Graph, NodeId};
pub use shape::{Dim, Shape, ShapeEnv};
pub use shared::SharedVariable;
pub use simplify::simplify;
pub use value::Value;

// ============================================================================
// Prelude
// ============================================================================

/// Prelude module with commonly used types and functions
pub mod prelude {
    pub use crate::compile::{function, CompiledFunction, Compiler};
    pub use crate::config::{Config, Precision};
    pub use crate::dtype::DType;
    pub use crate::error::{GraphError, Result};
    pub use crate::flat::{pack, FlatStorage};
    pub use crate::grad::{grad, gradients};
    pub use crate::graph::{Graph, NodeId};
    pub use crate::shape::{Dim, Shape};
    pub use crate::shared::SharedVariable;
    pub use crate::simplify::simplify;
    pub use crate::value::Value;
}
