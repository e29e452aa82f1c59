//! Numeric element kinds a matrix can store
//!
//! Every matrix carries exactly one [`ElementType`]. The tag has a stable
//! `u8` code and a host-facing name, and maps onto one Rust primitive that
//! implements [`MatrixElement`].

use crate::error::{MatError, Result};
use crate::scalar::Scalar;

/// Element type tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
#[repr(u8)]
pub enum ElementType {
    /// 8-bit unsigned integer
    U8 = 0,
    /// 8-bit signed integer
    I8 = 1,
    /// 16-bit unsigned integer
    U16 = 2,
    /// 16-bit signed integer
    I16 = 3,
    /// 32-bit signed integer
    I32 = 4,
    /// 32-bit floating point
    F32 = 5,
    /// 64-bit floating point
    F64 = 6,
    /// 32-bit unsigned integer
    U32 = 7,
    /// 64-bit signed integer
    I64 = 8,
    /// 64-bit unsigned integer
    U64 = 9,
}

impl ElementType {
    /// All element types in code order
    pub const ALL: [ElementType; 10] = [
        ElementType::U8,
        ElementType::I8,
        ElementType::U16,
        ElementType::I16,
        ElementType::I32,
        ElementType::F32,
        ElementType::F64,
        ElementType::U32,
        ElementType::I64,
        ElementType::U64,
    ];

    /// Convert from u8 representation
    pub const fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(ElementType::U8),
            1 => Some(ElementType::I8),
            2 => Some(ElementType::U16),
            3 => Some(ElementType::I16),
            4 => Some(ElementType::I32),
            5 => Some(ElementType::F32),
            6 => Some(ElementType::F64),
            7 => Some(ElementType::U32),
            8 => Some(ElementType::I64),
            9 => Some(ElementType::U64),
            _ => None,
        }
    }

    /// Convert to u8 representation
    pub const fn code(self) -> u8 {
        self as u8
    }

    /// Parse a host-facing type name, accepting the common long aliases
    pub fn from_name(name: &str) -> Option<Self> {
        let ty = match name {
            "u8" | "uint8" => ElementType::U8,
            "i8" | "int8" => ElementType::I8,
            "u16" | "uint16" => ElementType::U16,
            "i16" | "int16" => ElementType::I16,
            "i32" | "int32" => ElementType::I32,
            "f32" | "float32" | "float" => ElementType::F32,
            "f64" | "float64" | "double" => ElementType::F64,
            "u32" | "uint32" => ElementType::U32,
            "i64" | "int64" => ElementType::I64,
            "u64" | "uint64" => ElementType::U64,
            _ => return None,
        };
        Some(ty)
    }

    /// Canonical short name
    pub const fn name(self) -> &'static str {
        match self {
            ElementType::U8 => "u8",
            ElementType::I8 => "i8",
            ElementType::U16 => "u16",
            ElementType::I16 => "i16",
            ElementType::I32 => "i32",
            ElementType::F32 => "f32",
            ElementType::F64 => "f64",
            ElementType::U32 => "u32",
            ElementType::I64 => "i64",
            ElementType::U64 => "u64",
        }
    }

    /// Get the size in bytes for this element type
    pub const fn size_bytes(self) -> usize {
        match self {
            ElementType::U8 | ElementType::I8 => 1,
            ElementType::U16 | ElementType::I16 => 2,
            ElementType::I32 | ElementType::F32 | ElementType::U32 => 4,
            ElementType::F64 | ElementType::I64 | ElementType::U64 => 8,
        }
    }

    /// Required pointer alignment; equal to the size for every supported kind
    pub const fn align(self) -> usize {
        self.size_bytes()
    }

    pub const fn is_float(self) -> bool {
        matches!(self, ElementType::F32 | ElementType::F64)
    }

    /// The scalar every element of a freshly allocated matrix reads back as
    pub const fn zero(self) -> Scalar {
        match self {
            ElementType::F32 | ElementType::F64 => Scalar::Float(0.0),
            ElementType::U8 | ElementType::U16 | ElementType::U32 | ElementType::U64 => {
                Scalar::UInt(0)
            }
            ElementType::I8 | ElementType::I16 | ElementType::I32 | ElementType::I64 => {
                Scalar::Int(0)
            }
        }
    }
}

impl core::fmt::Display for ElementType {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.name())
    }
}

/// Trait for types that can be stored as matrix elements
///
/// All element types are plain old data, so a buffer of raw bytes can be
/// reinterpreted as elements with `bytemuck` without any unsafe code.
pub trait MatrixElement: bytemuck::Pod + PartialEq + Send + Sync + 'static {
    /// The tag for this element type
    const ELEMENT_TYPE: ElementType;

    /// Narrow a boundary scalar into this type
    ///
    /// Integer types reject anything that is not exactly representable.
    /// Float types round to nearest; `f32` rejects finite values beyond its
    /// range.
    fn from_scalar(value: Scalar) -> Result<Self>;

    /// Widen into the natural scalar for this type
    fn to_scalar(self) -> Scalar;

    /// Lossy widening used by numeric reductions
    fn to_f64(self) -> f64;
}

macro_rules! impl_int_element {
    ($type:ty, $tag:ident, $variant:ident, $wide:ty) => {
        impl MatrixElement for $type {
            const ELEMENT_TYPE: ElementType = ElementType::$tag;

            fn from_scalar(value: Scalar) -> Result<Self> {
                value
                    .to_i128_exact()
                    .and_then(|v| <$type>::try_from(v).ok())
                    .ok_or(MatError::TypeMismatch {
                        target: ElementType::$tag,
                    })
            }

            fn to_scalar(self) -> Scalar {
                Scalar::$variant(self as $wide)
            }

            fn to_f64(self) -> f64 {
                self as f64
            }
        }
    };
}

impl_int_element!(u8, U8, UInt, u64);
impl_int_element!(i8, I8, Int, i64);
impl_int_element!(u16, U16, UInt, u64);
impl_int_element!(i16, I16, Int, i64);
impl_int_element!(i32, I32, Int, i64);
impl_int_element!(u32, U32, UInt, u64);
impl_int_element!(i64, I64, Int, i64);
impl_int_element!(u64, U64, UInt, u64);

impl MatrixElement for f32 {
    const ELEMENT_TYPE: ElementType = ElementType::F32;

    fn from_scalar(value: Scalar) -> Result<Self> {
        let wide = value.to_f64();
        let narrow = wide as f32;
        // `as` saturates to infinity; only a finite source may not overflow
        if wide.is_finite() && narrow.is_infinite() {
            return Err(MatError::TypeMismatch {
                target: ElementType::F32,
            });
        }
        Ok(narrow)
    }

    fn to_scalar(self) -> Scalar {
        Scalar::Float(self as f64)
    }

    fn to_f64(self) -> f64 {
        self as f64
    }
}

impl MatrixElement for f64 {
    const ELEMENT_TYPE: ElementType = ElementType::F64;

    fn from_scalar(value: Scalar) -> Result<Self> {
        Ok(value.to_f64())
    }

    fn to_scalar(self) -> Scalar {
        Scalar::Float(self)
    }

    fn to_f64(self) -> f64 {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_round_trip_and_sizes() {
        for ty in ElementType::ALL {
            assert_eq!(ElementType::from_code(ty.code()), Some(ty));
            assert_eq!(ElementType::from_name(ty.name()), Some(ty));
        }
        assert_eq!(ElementType::from_code(10), None);
        assert_eq!(ElementType::from_name("float64"), Some(ElementType::F64));
        assert_eq!(ElementType::from_name("complex"), None);
        assert_eq!(ElementType::I16.size_bytes(), 2);
        assert_eq!(ElementType::U64.size_bytes(), 8);
    }

    #[test]
    fn test_integer_narrowing_rejects_loss() {
        assert_eq!(u8::from_scalar(Scalar::Float(255.0)), Ok(255));
        assert!(u8::from_scalar(Scalar::Float(256.0)).is_err());
        assert!(u8::from_scalar(Scalar::Int(-1)).is_err());
        assert!(i32::from_scalar(Scalar::Float(1.5)).is_err());
        assert!(i32::from_scalar(Scalar::Float(f64::NAN)).is_err());
        assert_eq!(i64::from_scalar(Scalar::Int(i64::MIN)), Ok(i64::MIN));
        assert_eq!(u64::from_scalar(Scalar::UInt(u64::MAX)), Ok(u64::MAX));
        assert!(i64::from_scalar(Scalar::UInt(u64::MAX)).is_err());
    }

    #[test]
    fn test_float_rounding_policy() {
        assert_eq!(f32::from_scalar(Scalar::Float(0.1)), Ok(0.1f32));
        assert!(f32::from_scalar(Scalar::Float(1e300)).is_err());
        assert!(f32::from_scalar(Scalar::Float(f64::INFINITY))
            .map(f32::is_infinite)
            .unwrap_or(false));
        assert_eq!(f64::from_scalar(Scalar::Int(-3)), Ok(-3.0));
    }

    #[test]
    fn test_zero_matches_to_scalar() {
        assert_eq!(0u16.to_scalar(), ElementType::U16.zero());
        assert_eq!(0i8.to_scalar(), ElementType::I8.zero());
        assert_eq!(0.0f32.to_scalar(), ElementType::F32.zero());
    }
}
