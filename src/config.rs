//! Explicit configuration passed to a [`Graph`](crate::graph::Graph) at
//! construction time and carried into compilation.

use crate::dtype::DType;
use crate::error::{GraphError, Result};

/// Floating point precision used for float constants and shared variables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Precision {
    #[default]
    Single,
    Double,
}

impl Precision {
    pub fn dtype(&self) -> DType {
        match self {
            Precision::Single => DType::F32,
            Precision::Double => DType::F64,
        }
    }
}

/// Backend selected by [`Compiler::new`](crate::compile::Compiler::new).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BackendKind {
    /// Directly interpreted ndarray kernels.
    #[default]
    Reference,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub precision: Precision,
    pub backend: BackendKind,
    /// Upper bound on simplifier passes (and rewrites per node) before the
    /// simplifier gives up with a `SimplificationError`.
    pub max_simplify_iterations: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            precision: Precision::default(),
            backend: BackendKind::default(),
            max_simplify_iterations: 64,
        }
    }
}

impl Config {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_precision(mut self, precision: Precision) -> Self {
        self.precision = precision;
        self
    }

    pub fn with_backend(mut self, backend: BackendKind) -> Self {
        self.backend = backend;
        self
    }

    pub fn with_max_simplify_iterations(mut self, iterations: usize) -> Self {
        self.max_simplify_iterations = iterations;
        self
    }

    /// The float dtype implied by `precision`.
    pub fn float_dtype(&self) -> DType {
        self.precision.dtype()
    }

    /// Builds a configuration from `SYMGRAD_PRECISION`, `SYMGRAD_BACKEND` and
    /// `SYMGRAD_SIMPLIFY_ITERATIONS`. Unset variables keep their defaults.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        if let Ok(value) = std::env::var("SYMGRAD_PRECISION") {
            config.precision = parse_precision(&value)?;
        }
        if let Ok(value) = std::env::var("SYMGRAD_BACKEND") {
            config.backend = parse_backend(&value)?;
        }
        if let Ok(value) = std::env::var("SYMGRAD_SIMPLIFY_ITERATIONS") {
            config.max_simplify_iterations = value.trim().parse().map_err(|_| {
                GraphError::InvalidArgument(format!(
                    "SYMGRAD_SIMPLIFY_ITERATIONS must be an integer, got {value:?}"
                ))
            })?;
        }
        log::debug!("Config from environment: {config:?}");
        Ok(config)
    }
}

fn parse_precision(value: &str) -> Result<Precision> {
    match value.trim().to_ascii_lowercase().as_str() {
        "single" | "f32" | "float32" => Ok(Precision::Single),
        "double" | "f64" | "float64" => Ok(Precision::Double),
        other => Err(GraphError::InvalidArgument(format!(
            "unknown precision {other:?}"
        ))),
    }
}

fn parse_backend(value: &str) -> Result<BackendKind> {
    match value.trim().to_ascii_lowercase().as_str() {
        "reference" | "ref" | "interpreter" => Ok(BackendKind::Reference),
        other => Err(GraphError::InvalidArgument(format!(
            "unknown backend {other:?}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.precision, Precision::Single);
        assert_eq!(config.backend, BackendKind::Reference);
        assert_eq!(config.float_dtype(), DType::F32);
    }

    #[test]
    fn test_builder_setters() {
        let config = Config::new()
            .with_precision(Precision::Double)
            .with_max_simplify_iterations(3);
        assert_eq!(config.float_dtype(), DType::F64);
        assert_eq!(config.max_simplify_iterations, 3);
    }

    #[rstest]
    #[case("single", Precision::Single)]
    #[case("F32", Precision::Single)]
    #[case("double", Precision::Double)]
    #[case(" float64 ", Precision::Double)]
    fn test_parse_precision(#[case] input: &str, #[case] expected: Precision) {
        assert_eq!(parse_precision(input).unwrap(), expected);
    }

    #[test]
    fn test_parse_rejects_unknown_values() {
        assert!(matches!(
            parse_precision("quad"),
            Err(GraphError::InvalidArgument(_))
        ));
        assert!(matches!(
            parse_backend("cuda"),
            Err(GraphError::InvalidArgument(_))
        ));
    }
}
