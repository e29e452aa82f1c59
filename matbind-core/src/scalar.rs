//! Values crossing the native/host boundary

/// A single numeric value read from or written into a matrix
///
/// The three variants keep 64-bit integers exact; a plain `f64` would lose
/// anything above 2^53.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(untagged))]
pub enum Scalar {
    Int(i64),
    UInt(u64),
    Float(f64),
}

impl Scalar {
    /// Exact integer value, if there is one
    ///
    /// Floats qualify only when finite and without a fractional part.
    pub fn to_i128_exact(self) -> Option<i128> {
        match self {
            Scalar::Int(v) => Some(v as i128),
            Scalar::UInt(v) => Some(v as i128),
            Scalar::Float(f) => {
                // i128::MIN as f64 is exactly -2^127
                const LOWER: f64 = i128::MIN as f64;
                if !f.is_finite() || f < LOWER || f >= -LOWER {
                    return None;
                }
                let truncated = f as i128;
                (truncated as f64 == f).then_some(truncated)
            }
        }
    }

    /// Widen to `f64`, rounding to nearest for integers beyond 2^53
    pub fn to_f64(self) -> f64 {
        match self {
            Scalar::Int(v) => v as f64,
            Scalar::UInt(v) => v as f64,
            Scalar::Float(f) => f,
        }
    }
}

impl From<f64> for Scalar {
    fn from(value: f64) -> Self {
        Scalar::Float(value)
    }
}

impl From<i64> for Scalar {
    fn from(value: i64) -> Self {
        Scalar::Int(value)
    }
}

impl From<u64> for Scalar {
    fn from(value: u64) -> Self {
        Scalar::UInt(value)
    }
}

impl core::fmt::Display for Scalar {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Scalar::Int(v) => write!(f, "{v}"),
            Scalar::UInt(v) => write!(f, "{v}"),
            Scalar::Float(v) => write!(f, "{v}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exact_integers() {
        assert_eq!(Scalar::Float(42.0).to_i128_exact(), Some(42));
        assert_eq!(Scalar::Float(-0.0).to_i128_exact(), Some(0));
        assert_eq!(Scalar::Float(0.5).to_i128_exact(), None);
        assert_eq!(Scalar::Float(f64::INFINITY).to_i128_exact(), None);
        assert_eq!(Scalar::Float(1e40).to_i128_exact(), None);
        assert_eq!(Scalar::UInt(u64::MAX).to_i128_exact(), Some(u64::MAX as i128));
    }
}
