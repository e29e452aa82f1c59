//! Exceptions thrown back into the host

use matbind_core::{ErrorKind, MatError};
use thiserror::Error;

/// Host exception class
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExceptionKind {
    Error,
    TypeError,
    RangeError,
}

impl std::fmt::Display for ExceptionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ExceptionKind::Error => "Error",
            ExceptionKind::TypeError => "TypeError",
            ExceptionKind::RangeError => "RangeError",
        };
        f.write_str(name)
    }
}

/// An exception raised synchronously by a native call
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind} [{code}]: {message}")]
pub struct Exception {
    pub kind: ExceptionKind,
    /// Stable machine-readable code, e.g. `ERR_OUT_OF_RANGE`
    pub code: &'static str,
    pub message: String,
}

impl Exception {
    pub fn new(kind: ExceptionKind, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            kind,
            code,
            message: message.into(),
        }
    }

    pub fn error(code: &'static str, message: impl Into<String>) -> Self {
        Self::new(ExceptionKind::Error, code, message)
    }

    pub fn type_error(code: &'static str, message: impl Into<String>) -> Self {
        Self::new(ExceptionKind::TypeError, code, message)
    }

    pub fn range_error(code: &'static str, message: impl Into<String>) -> Self {
        Self::new(ExceptionKind::RangeError, code, message)
    }
}

/// Exception code for each matrix error kind
pub const fn error_code(kind: ErrorKind) -> &'static str {
    match kind {
        ErrorKind::Allocation => "ERR_ALLOCATION",
        ErrorKind::InvalidLayout => "ERR_INVALID_LAYOUT",
        ErrorKind::OutOfRange => "ERR_OUT_OF_RANGE",
        ErrorKind::ShapeMismatch => "ERR_SHAPE_MISMATCH",
        ErrorKind::TypeMismatch => "ERR_TYPE_MISMATCH",
    }
}

impl From<MatError> for Exception {
    fn from(err: MatError) -> Self {
        let kind = match err.kind() {
            ErrorKind::OutOfRange => ExceptionKind::RangeError,
            ErrorKind::TypeMismatch => ExceptionKind::TypeError,
            ErrorKind::Allocation | ErrorKind::InvalidLayout | ErrorKind::ShapeMismatch => {
                ExceptionKind::Error
            }
        };
        Exception::new(kind, error_code(err.kind()), format!("{}: {err}", err.kind()))
    }
}
