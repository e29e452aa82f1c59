//! matbind - Dense matrix objects for a garbage-collected host runtime
//!
//! This library exposes a native `Mat` class to a host runtime: matrices live
//! in reference-counted native buffers, host objects hold handles onto those
//! buffers, and the host's garbage collector releases them through
//! finalizers.
//!
//! ## Architecture
//!
//! matbind follows the same split as its core crate:
//!
//! - **matbind-core**: element types, scalar conversion, layouts and errors (no I/O)
//! - **matbind**: buffers, handles, the host boundary and the module entry point
//!
//! ## Quick Start
//!
//! ```rust
//! use matbind::host::{Env, Value};
//! use matbind::registrar;
//!
//! let mut env = Env::new();
//! let exports = registrar::load(&mut env).unwrap();
//!
//! let m = env
//!     .construct(&exports, "Mat", &[Value::Number(2.0), Value::Number(3.0), Value::from("u8")])
//!     .unwrap();
//! env.call_method(m, "set", &[Value::Number(1.0), Value::Number(2.0), Value::Number(7.0)])
//!     .unwrap();
//! assert_eq!(
//!     env.call_method(m, "get", &[Value::Number(1.0), Value::Number(2.0)]).unwrap(),
//!     Value::Number(7.0)
//! );
//! ```
//!
//! ## Features
//!
//! - **Shared buffers**: views share storage, copies never do
//! - **Checked access**: every index and every narrowing conversion is validated
//! - **Memory mapping**: wrap a writable `memmap2` mapping as a matrix (`mmap` feature)
//! - **Worker offload**: element statistics computed on a rayon pool

pub use matbind_core::{
    // Element model
    ElementType, MatrixElement, Scalar,
    // Layout
    Layout, checked_byte_len, validate_alignment,
    // Error handling
    ErrorKind, MatError, Result,
};

pub mod binding;
pub mod buffer;
pub mod config;
pub mod host;
pub mod ledger;
pub mod logging;
pub mod mat;
pub mod registrar;
pub mod worker;

pub use binding::MatRuntime;
pub use buffer::{BufferOwner, BufferRef};
pub use config::{BindingConfig, ConfigError};
pub use ledger::{LedgerStats, MemoryLedger};
pub use mat::{MatHandle, MatInfo};
pub use registrar::{ModuleRegistrar, RegistrationError, MODULE_NAME};
pub use worker::{MatSnapshot, Stats};
