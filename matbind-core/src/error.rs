//! Error types for matrix binding operations

use crate::element::ElementType;

/// The five failure classes a matrix operation can surface to its caller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Requested size unobtainable or overflowing
    Allocation,
    /// Inconsistent stride, shape or alignment
    InvalidLayout,
    /// Index outside the current shape
    OutOfRange,
    /// Element count mismatch on reshape
    ShapeMismatch,
    /// Value not representable in the target element type
    TypeMismatch,
}

impl ErrorKind {
    /// Stable name used when the error crosses into the host
    pub const fn name(self) -> &'static str {
        match self {
            ErrorKind::Allocation => "AllocationError",
            ErrorKind::InvalidLayout => "InvalidLayoutError",
            ErrorKind::OutOfRange => "OutOfRangeError",
            ErrorKind::ShapeMismatch => "ShapeMismatchError",
            ErrorKind::TypeMismatch => "TypeMismatchError",
        }
    }
}

impl core::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.name())
    }
}

/// Errors that can occur during matrix operations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatError {
    /// `rows * cols * element size` does not fit in `usize`
    SizeOverflow,
    /// Request is larger than the configured allocation limit
    AllocationLimit { requested: usize, limit: usize },
    /// Row stride shorter than one packed row
    StrideTooSmall { stride: usize, min: usize },
    /// Row stride not a multiple of the element size
    StrideMisaligned { stride: usize, elem_size: usize },
    /// External pointer not aligned for the element type
    PointerMisaligned { align: usize },
    /// Backing memory shorter than the layout needs
    BufferTooSmall { required: usize, available: usize },
    /// Operation needs row-contiguous storage
    NonContiguous,
    /// Index outside `[0, rows) x [0, cols)`
    OutOfRange {
        row: usize,
        col: usize,
        rows: usize,
        cols: usize,
    },
    /// Reshape target has a different element count
    ShapeMismatch {
        rows: usize,
        cols: usize,
        new_rows: usize,
        new_cols: usize,
    },
    /// Initial values do not cover the requested shape
    ValueCountMismatch { expected: usize, actual: usize },
    /// Value cannot be stored in the element type without loss
    TypeMismatch { target: ElementType },
}

impl MatError {
    /// Classify this error into one of the five host-visible kinds
    pub const fn kind(&self) -> ErrorKind {
        match self {
            MatError::SizeOverflow | MatError::AllocationLimit { .. } => ErrorKind::Allocation,
            MatError::StrideTooSmall { .. }
            | MatError::StrideMisaligned { .. }
            | MatError::PointerMisaligned { .. }
            | MatError::BufferTooSmall { .. }
            | MatError::NonContiguous => ErrorKind::InvalidLayout,
            MatError::OutOfRange { .. } => ErrorKind::OutOfRange,
            MatError::ShapeMismatch { .. } | MatError::ValueCountMismatch { .. } => {
                ErrorKind::ShapeMismatch
            }
            MatError::TypeMismatch { .. } => ErrorKind::TypeMismatch,
        }
    }
}

impl core::fmt::Display for MatError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            MatError::SizeOverflow => write!(f, "Matrix byte size overflows"),
            MatError::AllocationLimit { requested, limit } => {
                write!(f, "Allocation of {requested} bytes exceeds limit of {limit} bytes")
            }
            MatError::StrideTooSmall { stride, min } => {
                write!(f, "Row stride {stride} is smaller than packed row size {min}")
            }
            MatError::StrideMisaligned { stride, elem_size } => {
                write!(f, "Row stride {stride} is not a multiple of element size {elem_size}")
            }
            MatError::PointerMisaligned { align } => {
                write!(f, "Buffer pointer is not aligned to {align} bytes")
            }
            MatError::BufferTooSmall {
                required,
                available,
            } => write!(f, "Layout needs {required} bytes but buffer holds {available}"),
            MatError::NonContiguous => write!(f, "Matrix rows are not contiguous"),
            MatError::OutOfRange {
                row,
                col,
                rows,
                cols,
            } => write!(f, "Index ({row}, {col}) outside matrix of shape ({rows}, {cols})"),
            MatError::ShapeMismatch {
                rows,
                cols,
                new_rows,
                new_cols,
            } => write!(
                f,
                "Cannot reshape ({rows}, {cols}) into ({new_rows}, {new_cols})"
            ),
            MatError::ValueCountMismatch { expected, actual } => {
                write!(f, "Expected {expected} values for the requested shape, got {actual}")
            }
            MatError::TypeMismatch { target } => {
                write!(f, "Value is not representable as {target}")
            }
        }
    }
}

/// Result type for matrix operations
pub type Result<T> = core::result::Result<T, MatError>;
