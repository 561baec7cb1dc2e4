use std::fmt;

/// Element type of a node or value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DType {
    F32, // single precision float
    F64, // double precision float
    I64, // signed integer
}

impl DType {
    pub fn is_float(&self) -> bool {
        matches!(self, DType::F32 | DType::F64)
    }

    /// Size of one element in bytes.
    pub fn size_in_bytes(&self) -> usize {
        match self {
            DType::F32 => 4,
            DType::F64 | DType::I64 => 8,
        }
    }

    /// Implicit promotion between two operand types.
    ///
    /// Floats promote to the wider float. Mixing integers with floats has no
    /// implicit rule and returns `None`.
    pub fn promote(a: DType, b: DType) -> Option<DType> {
        match (a, b) {
            (a, b) if a == b => Some(a),
            (DType::F32, DType::F64) | (DType::F64, DType::F32) => Some(DType::F64),
            _ => None,
        }
    }
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DType::F32 => "f32",
            DType::F64 => "f64",
            DType::I64 => "i64",
        };
        write!(f, "{name}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(DType::F32, DType::F32, Some(DType::F32))]
    #[case(DType::F32, DType::F64, Some(DType::F64))]
    #[case(DType::F64, DType::F32, Some(DType::F64))]
    #[case(DType::I64, DType::I64, Some(DType::I64))]
    #[case(DType::I64, DType::F32, None)]
    #[case(DType::F64, DType::I64, None)]
    fn test_promote(#[case] a: DType, #[case] b: DType, #[case] expected: Option<DType>) {
        assert_eq!(DType::promote(a, b), expected);
    }

    #[test]
    fn test_is_float() {
        assert!(DType::F32.is_float());
        assert!(DType::F64.is_float());
        assert!(!DType::I64.is_float());
    }
}
