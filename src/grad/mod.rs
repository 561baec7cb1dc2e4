//! Reverse-mode automatic differentiation.
//!
//! Gradients are built as new nodes in the same graph (source
//! transformation), so they can be simplified and compiled like any other
//! expression.
//!
//! # Supported Operations
//!
//! ## Elementwise Operations
//! - `add(a, b)`: `∂a = ∂out`, `∂b = ∂out`
//! - `sub(a, b)`: `∂a = ∂out`, `∂b = -∂out`
//! - `mul(a, b)`: `∂a = ∂out * b`, `∂b = ∂out * a`
//! - `div(a, b)`: `∂a = ∂out / b`, `∂b = -∂out * a / b²`
//! - `neg`, `recip`, `exp`, `log`, `square`, `sqrt`, `tanh`, `sigmoid`
//!
//! ## Linear Algebra and Reductions
//! - `dot(A, B)`: `∂A = ∂out Bᵀ`, `∂B = Aᵀ ∂out` (vector cases via outer products)
//! - `sum(a, axes)`: `∂a = expand(∂out, axes)`
//!
//! ## View Operations
//! - `reshape`, `transpose`, `expand`, `flatcat`, `slice`, float `cast`
//!
//! `sign` has no gradient rule.

mod backward;
mod context;
mod rules;

pub use backward::{backward, grad, gradients, GradResult};
pub use context::GradContext;
pub use rules::{compute_vjp, VjpResult};
