//! Values passed between the host and native code

use hashbrown::HashMap;
use matbind_core::{ElementType, Scalar};

use super::exception::Exception;
use super::ObjectRef;

/// Largest integer a host number holds exactly, 2^53
const MAX_SAFE_INTEGER: f64 = 9_007_199_254_740_992.0;
const MAX_SAFE_MAGNITUDE: u64 = 1 << 53;

/// A host value as seen from native code
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Value {
    #[default]
    Undefined,
    Null,
    Bool(bool),
    Number(f64),
    BigInt(i128),
    String(String),
    Array(Vec<Value>),
    /// Plain key/value object
    Record(HashMap<String, Value>),
    /// Object wrapping native state
    Object(ObjectRef),
}

impl Value {
    /// Host-style type name used in argument errors
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Undefined => "undefined",
            Value::Null => "null",
            Value::Bool(_) => "boolean",
            Value::Number(_) => "number",
            Value::BigInt(_) => "bigint",
            Value::String(_) => "string",
            Value::Array(_) | Value::Record(_) | Value::Object(_) => "object",
        }
    }

    /// Read a non-negative integral number, e.g. a row index or extent
    pub fn to_index(&self, name: &str) -> Result<usize, Exception> {
        let invalid = || {
            Exception::type_error(
                "ERR_INVALID_ARG",
                format!("{name} must be a non-negative integer, got {}", self.describe()),
            )
        };
        match self {
            Value::Number(n) => {
                if !n.is_finite() || *n < 0.0 || n.fract() != 0.0 || *n > MAX_SAFE_INTEGER {
                    return Err(invalid());
                }
                Ok(*n as usize)
            }
            Value::BigInt(n) => usize::try_from(*n).map_err(|_| invalid()),
            _ => Err(invalid()),
        }
    }

    /// Read a numeric value to store into a matrix
    pub fn to_scalar(&self, name: &str) -> Result<Scalar, Exception> {
        match self {
            Value::Number(n) => Ok(Scalar::Float(*n)),
            Value::BigInt(n) => {
                if let Ok(v) = i64::try_from(*n) {
                    Ok(Scalar::Int(v))
                } else if let Ok(v) = u64::try_from(*n) {
                    Ok(Scalar::UInt(v))
                } else {
                    Err(Exception::range_error(
                        "ERR_TYPE_MISMATCH",
                        format!("{name} is outside the 64-bit integer range"),
                    ))
                }
            }
            _ => Err(Exception::type_error(
                "ERR_INVALID_ARG",
                format!("{name} must be a number or bigint, got {}", self.describe()),
            )),
        }
    }

    /// Read an element type given by name (`"f64"`) or numeric code
    pub fn to_element_type(&self, name: &str) -> Result<ElementType, Exception> {
        let parsed = match self {
            Value::String(s) => ElementType::from_name(s),
            Value::Number(n) if n.fract() == 0.0 && (0.0..=255.0).contains(n) => {
                ElementType::from_code(*n as u8)
            }
            _ => None,
        };
        parsed.ok_or_else(|| {
            Exception::type_error(
                "ERR_INVALID_ARG",
                format!("{name} is not a supported element type: {}", self.describe()),
            )
        })
    }

    pub fn as_object(&self) -> Option<ObjectRef> {
        match self {
            Value::Object(obj) => Some(*obj),
            _ => None,
        }
    }

    fn describe(&self) -> String {
        match self {
            Value::Number(n) => format!("{n}"),
            Value::BigInt(n) => format!("{n}n"),
            Value::String(s) => format!("{s:?}"),
            other => other.type_name().to_string(),
        }
    }
}

impl From<Scalar> for Value {
    /// Integers that a host number cannot hold exactly become bigints
    fn from(value: Scalar) -> Self {
        match value {
            Scalar::Float(f) => Value::Number(f),
            Scalar::Int(v) if v.unsigned_abs() <= MAX_SAFE_MAGNITUDE => Value::Number(v as f64),
            Scalar::Int(v) => Value::BigInt(v as i128),
            Scalar::UInt(v) if v <= MAX_SAFE_MAGNITUDE => Value::Number(v as f64),
            Scalar::UInt(v) => Value::BigInt(v as i128),
        }
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Number(value)
    }
}

impl From<usize> for Value {
    fn from(value: usize) -> Self {
        Value::Number(value as f64)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::String(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::String(value)
    }
}
