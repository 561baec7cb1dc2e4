use std::fmt;

/// Extent of a single axis.
///
/// `Var` extents are symbolic and only become concrete when a compiled
/// function binds an argument whose declared shape mentions them.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Dim {
    Const(usize),
    Var(String),
}

impl Dim {
    pub fn var(name: &str) -> Self {
        Self::Var(name.to_string())
    }

    pub fn as_const(&self) -> Option<usize> {
        match self {
            Dim::Const(n) => Some(*n),
            Dim::Var(_) => None,
        }
    }

    pub fn is_one(&self) -> bool {
        matches!(self, Dim::Const(1))
    }
}

impl From<usize> for Dim {
    fn from(n: usize) -> Self {
        Dim::Const(n)
    }
}

impl From<&str> for Dim {
    fn from(name: &str) -> Self {
        Dim::var(name)
    }
}

impl fmt::Display for Dim {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Dim::Const(n) => write!(f, "{n}"),
            Dim::Var(v) => write!(f, "{v}"),
        }
    }
}
