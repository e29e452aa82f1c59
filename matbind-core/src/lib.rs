#![no_std]

//! matbind core - element types, scalar conversion and layout rules
//!
//! This crate holds the pieces of the matrix binding that never touch
//! memory ownership or the host runtime: which numeric kinds a matrix can
//! store, how a boundary value is narrowed into one of them, and the shape
//! and stride arithmetic every buffer must satisfy.

#[cfg(feature = "alloc")]
extern crate alloc;

pub mod element;
pub mod error;
pub mod layout;
pub mod scalar;

pub use element::{ElementType, MatrixElement};
pub use error::{ErrorKind, MatError, Result};
pub use layout::{checked_byte_len, validate_alignment, Layout};
pub use scalar::Scalar;

/// Run `$body` with `$t` bound to the Rust type behind a runtime [`ElementType`].
///
/// ```
/// use matbind_core::{with_element, ElementType};
///
/// let size = with_element!(ElementType::I16, |T| core::mem::size_of::<T>());
/// assert_eq!(size, 2);
/// ```
#[macro_export]
macro_rules! with_element {
    ($elem:expr, |$t:ident| $body:expr) => {
        match $elem {
            $crate::ElementType::U8 => {
                type $t = u8;
                $body
            }
            $crate::ElementType::I8 => {
                type $t = i8;
                $body
            }
            $crate::ElementType::U16 => {
                type $t = u16;
                $body
            }
            $crate::ElementType::I16 => {
                type $t = i16;
                $body
            }
            $crate::ElementType::I32 => {
                type $t = i32;
                $body
            }
            $crate::ElementType::F32 => {
                type $t = f32;
                $body
            }
            $crate::ElementType::F64 => {
                type $t = f64;
                $body
            }
            $crate::ElementType::U32 => {
                type $t = u32;
                $body
            }
            $crate::ElementType::I64 => {
                type $t = i64;
                $body
            }
            $crate::ElementType::U64 => {
                type $t = u64;
                $body
            }
        }
    };
}
