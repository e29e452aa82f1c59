//! In-process model of the host runtime a native module is loaded into
//!
//! The binding layer only talks to the host through [`Env`]: it defines
//! classes, wraps native state in garbage-collected objects with
//! finalizers, throws [`Exception`]s, and queues asynchronous work.

mod env;
mod exception;
mod value;

pub use env::{
    ClassDef, ClassId, CompleteFn, Completion, ConstructorFn, Env, Export, Exports, Finalizer,
    GetterFn, HostError, MethodFn, ObjectRef,
};
pub use exception::{error_code, Exception, ExceptionKind};
pub use value::Value;
