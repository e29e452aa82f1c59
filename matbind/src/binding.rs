//! The `Mat` class as seen by the host
//!
//! Each host object owns one [`MatHandle`]. The object's finalizer releases
//! the handle, so a buffer is freed once the last object referencing it
//! (directly or through views) has been collected.

use std::any::Any;
use std::sync::Arc;

use hashbrown::HashMap;
use matbind_core::Scalar;

use crate::host::{ClassDef, ClassId, Env, Exception, ObjectRef, Value};
use crate::ledger::MemoryLedger;
use crate::mat::{MatHandle, MatInfo};
use crate::worker::{Stats, WorkOutput};

/// Per-environment state shared by every `Mat` object
#[derive(Debug, Clone)]
pub struct MatRuntime {
    ledger: Arc<MemoryLedger>,
    class_name: String,
}

impl MatRuntime {
    pub fn new(ledger: Arc<MemoryLedger>, class_name: impl Into<String>) -> Self {
        Self {
            ledger,
            class_name: class_name.into(),
        }
    }

    /// Name the class was installed under
    pub fn class_name(&self) -> &str {
        &self.class_name
    }

    pub fn ledger(&self) -> &Arc<MemoryLedger> {
        &self.ledger
    }
}

/// Class definition installed by the registrar under `name`
pub(crate) fn class_def(name: &str) -> ClassDef {
    ClassDef::new(name, construct)
        .method("get", get)
        .method("set", set)
        .method("reshape", reshape)
        .method("clone", clone)
        .method("view", view)
        .method("fill", fill)
        .method("toArray", to_array)
        .method("inspect", inspect)
        .method("release", release)
        .method("statsAsync", stats_async)
        .getter("rows", rows)
        .getter("cols", cols)
        .getter("type", elem_type)
        .getter("continuous", continuous)
}

/// Finalizer: drop the handle's buffer reference before the object is freed
fn finalize(native: &mut (dyn Any + Send)) {
    if let Some(mat) = native.downcast_mut::<MatHandle>() {
        mat.release();
    }
}

fn wrap(env: &mut Env, class: ClassId, mat: MatHandle) -> ObjectRef {
    env.wrap(class, mat, Some(finalize))
}

static UNDEFINED: Value = Value::Undefined;

fn arg(args: &[Value], index: usize) -> &Value {
    args.get(index).unwrap_or(&UNDEFINED)
}

fn invalid_arg(message: impl Into<String>) -> Exception {
    Exception::type_error("ERR_INVALID_ARG", message)
}

fn ledger(env: &Env) -> Result<Arc<MemoryLedger>, Exception> {
    env.instance_data::<MatRuntime>()
        .map(|runtime| Arc::clone(runtime.ledger()))
        .ok_or_else(|| Exception::error("ERR_NOT_REGISTERED", "matrix module is not initialised"))
}

fn this_mat(env: &Env, this: ObjectRef) -> Result<&MatHandle, Exception> {
    env.unwrap::<MatHandle>(this)
}

fn this_mat_mut(env: &mut Env, this: ObjectRef) -> Result<&mut MatHandle, Exception> {
    env.unwrap_mut::<MatHandle>(this)
}

/// `new Mat()`, `new Mat(rows, cols, type[, values])`, `new Mat(other)`
fn construct(env: &mut Env, class: ClassId, args: &[Value]) -> Result<ObjectRef, Exception> {
    let mat = match args {
        [] => MatHandle::empty(),
        [Value::Object(other)] => {
            let source = env
                .unwrap::<MatHandle>(*other)
                .map_err(|_| invalid_arg("copy constructor expects a Mat"))?;
            source.deep_clone()?
        }
        [rows, cols, elem] => {
            let rows = rows.to_index("rows")?;
            let cols = cols.to_index("cols")?;
            let elem = elem.to_element_type("type")?;
            MatHandle::new(rows, cols, elem, &ledger(env)?)?
        }
        [rows, cols, elem, Value::Array(values)] => {
            let rows = rows.to_index("rows")?;
            let cols = cols.to_index("cols")?;
            let elem = elem.to_element_type("type")?;
            let values = values
                .iter()
                .map(|value| value.to_scalar("values"))
                .collect::<Result<Vec<Scalar>, _>>()?;
            MatHandle::from_scalars(rows, cols, elem, &values, &ledger(env)?)?
        }
        _ => {
            return Err(invalid_arg(format!(
                "Mat expects (), (mat) or (rows, cols, type[, values]); got {} argument(s)",
                args.len()
            )))
        }
    };
    tracing::debug!(rows = mat.rows(), cols = mat.cols(), elem = %mat.elem_type(), "constructed Mat");
    Ok(wrap(env, class, mat))
}

fn get(env: &mut Env, this: ObjectRef, args: &[Value]) -> Result<Value, Exception> {
    let row = arg(args, 0).to_index("row")?;
    let col = arg(args, 1).to_index("col")?;
    Ok(this_mat(env, this)?.get(row, col)?.into())
}

fn set(env: &mut Env, this: ObjectRef, args: &[Value]) -> Result<Value, Exception> {
    let row = arg(args, 0).to_index("row")?;
    let col = arg(args, 1).to_index("col")?;
    let value = arg(args, 2).to_scalar("value")?;
    this_mat_mut(env, this)?.set(row, col, value)?;
    Ok(Value::Undefined)
}

fn reshape(env: &mut Env, this: ObjectRef, args: &[Value]) -> Result<Value, Exception> {
    let rows = arg(args, 0).to_index("rows")?;
    let cols = arg(args, 1).to_index("cols")?;
    this_mat_mut(env, this)?.reshape(rows, cols)?;
    Ok(Value::Undefined)
}

fn clone(env: &mut Env, this: ObjectRef, _args: &[Value]) -> Result<Value, Exception> {
    let class = env.class_of(this)?;
    let copy = this_mat(env, this)?.deep_clone()?;
    Ok(Value::Object(wrap(env, class, copy)))
}

fn view(env: &mut Env, this: ObjectRef, args: &[Value]) -> Result<Value, Exception> {
    let row = arg(args, 0).to_index("row")?;
    let col = arg(args, 1).to_index("col")?;
    let rows = arg(args, 2).to_index("rows")?;
    let cols = arg(args, 3).to_index("cols")?;
    let class = env.class_of(this)?;
    let sub = this_mat(env, this)?.view(row, col, rows, cols)?;
    Ok(Value::Object(wrap(env, class, sub)))
}

fn fill(env: &mut Env, this: ObjectRef, args: &[Value]) -> Result<Value, Exception> {
    let value = arg(args, 0).to_scalar("value")?;
    this_mat_mut(env, this)?.fill(value)?;
    Ok(Value::Undefined)
}

/// Nested row arrays
fn to_array(env: &mut Env, this: ObjectRef, _args: &[Value]) -> Result<Value, Exception> {
    let mat = this_mat(env, this)?;
    let cols = mat.cols();
    let values = mat.to_vec();
    if cols == 0 {
        return Ok(Value::Array(vec![Value::Array(Vec::new()); mat.rows()]));
    }
    let rows = values
        .chunks(cols)
        .map(|row| Value::Array(row.iter().copied().map(Value::from).collect()))
        .collect();
    Ok(Value::Array(rows))
}

fn inspect(env: &mut Env, this: ObjectRef, _args: &[Value]) -> Result<Value, Exception> {
    Ok(info_record(this_mat(env, this)?.info()))
}

fn info_record(info: MatInfo) -> Value {
    let mut record = HashMap::new();
    record.insert("rows".to_string(), Value::from(info.rows));
    record.insert("cols".to_string(), Value::from(info.cols));
    record.insert("type".to_string(), Value::from(info.elem_type.name()));
    record.insert("continuous".to_string(), Value::from(info.continuous));
    record.insert("offset".to_string(), Value::from(info.offset));
    record.insert("bufferRefs".to_string(), Value::from(info.buffer_refs));
    record.insert("owned".to_string(), Value::from(info.owned));
    Value::Record(record)
}

fn release(env: &mut Env, this: ObjectRef, _args: &[Value]) -> Result<Value, Exception> {
    this_mat_mut(env, this)?.release();
    Ok(Value::Undefined)
}

/// Queue element statistics on the worker pool; resolves to a record
fn stats_async(env: &mut Env, this: ObjectRef, _args: &[Value]) -> Result<Value, Exception> {
    let snapshot = this_mat(env, this)?.snapshot();
    let task = env.queue_async_work(
        move || Box::new(snapshot.stats()) as WorkOutput,
        Box::new(|_env: &mut Env, output: WorkOutput| -> Result<Value, Exception> {
            let stats = output
                .downcast::<Stats>()
                .map_err(|_| Exception::error("ERR_WORKER_OUTPUT", "stats job returned an unexpected value"))?;
            Ok(stats_record(*stats))
        }),
    )?;
    Ok(Value::Number(task as f64))
}

fn stats_record(stats: Stats) -> Value {
    let mut record = HashMap::new();
    record.insert("count".to_string(), Value::from(stats.count));
    record.insert("sum".to_string(), Value::from(stats.sum));
    record.insert("min".to_string(), Value::from(stats.min));
    record.insert("max".to_string(), Value::from(stats.max));
    record.insert("mean".to_string(), Value::from(stats.mean));
    Value::Record(record)
}

fn rows(env: &Env, this: ObjectRef) -> Result<Value, Exception> {
    Ok(Value::from(this_mat(env, this)?.rows()))
}

fn cols(env: &Env, this: ObjectRef) -> Result<Value, Exception> {
    Ok(Value::from(this_mat(env, this)?.cols()))
}

fn elem_type(env: &Env, this: ObjectRef) -> Result<Value, Exception> {
    Ok(Value::from(this_mat(env, this)?.elem_type().name()))
}

fn continuous(env: &Env, this: ObjectRef) -> Result<Value, Exception> {
    Ok(Value::from(this_mat(env, this)?.is_continuous()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::{Export, Exports};

    fn setup() -> (Env, Exports, Arc<MemoryLedger>) {
        let mut env = Env::with_worker_threads(1);
        let ledger = Arc::new(MemoryLedger::default());
        env.set_instance_data(MatRuntime::new(Arc::clone(&ledger), "Mat"));
        let class = env.define_class(class_def("Mat")).unwrap();
        let mut exports = Exports::new();
        exports.insert("Mat", Export::Class(class));
        (env, exports, ledger)
    }

    fn num(n: f64) -> Value {
        Value::Number(n)
    }

    #[test]
    fn test_constructor_forms() {
        let (mut env, exports, _ledger) = setup();

        let empty = env.construct(&exports, "Mat", &[]).unwrap();
        assert_eq!(env.get_property(empty, "rows").unwrap(), num(0.0));
        assert_eq!(env.get_property(empty, "type").unwrap(), Value::from("u8"));

        let m = env
            .construct(&exports, "Mat", &[num(2.0), num(3.0), Value::from("f32")])
            .unwrap();
        assert_eq!(env.get_property(m, "cols").unwrap(), num(3.0));
        assert_eq!(env.get_property(m, "continuous").unwrap(), Value::Bool(true));

        let seeded = env
            .construct(
                &exports,
                "Mat",
                &[
                    num(1.0),
                    num(2.0),
                    num(4.0),
                    Value::Array(vec![num(7.0), num(-8.0)]),
                ],
            )
            .unwrap();
        assert_eq!(env.call_method(seeded, "get", &[num(0.0), num(1.0)]).unwrap(), num(-8.0));

        let copy = env.construct(&exports, "Mat", &[Value::Object(seeded)]).unwrap();
        env.call_method(seeded, "set", &[num(0.0), num(0.0), num(1.0)]).unwrap();
        assert_eq!(env.call_method(copy, "get", &[num(0.0), num(0.0)]).unwrap(), num(7.0));
    }

    #[test]
    fn test_argument_errors_are_type_errors() {
        let (mut env, exports, _ledger) = setup();
        let err = env
            .construct(&exports, "Mat", &[num(2.0), num(-1.0), Value::from("u8")])
            .unwrap_err();
        assert_eq!(err.code, "ERR_INVALID_ARG");

        let err = env
            .construct(&exports, "Mat", &[num(2.0), num(2.0), Value::from("complex")])
            .unwrap_err();
        assert_eq!(err.code, "ERR_INVALID_ARG");

        let err = env.construct(&exports, "Mat", &[num(1.0)]).unwrap_err();
        assert_eq!(err.code, "ERR_INVALID_ARG");

        let m = env
            .construct(&exports, "Mat", &[num(2.0), num(2.0), Value::from("u8")])
            .unwrap();
        let err = env.call_method(m, "get", &[num(0.0)]).unwrap_err();
        assert_eq!(err.code, "ERR_INVALID_ARG");
    }

    #[test]
    fn test_mat_errors_surface_with_codes() {
        let (mut env, exports, _ledger) = setup();
        let m = env
            .construct(&exports, "Mat", &[num(2.0), num(2.0), Value::from("u8")])
            .unwrap();
        let err = env.call_method(m, "get", &[num(2.0), num(0.0)]).unwrap_err();
        assert_eq!(err.code, "ERR_OUT_OF_RANGE");
        let err = env
            .call_method(m, "set", &[num(0.0), num(0.0), num(300.0)])
            .unwrap_err();
        assert_eq!(err.code, "ERR_TYPE_MISMATCH");
        let err = env.call_method(m, "reshape", &[num(3.0), num(1.0)]).unwrap_err();
        assert_eq!(err.code, "ERR_SHAPE_MISMATCH");
    }

    #[test]
    fn test_views_and_finalization() {
        let (mut env, exports, ledger) = setup();
        let m = env
            .construct(&exports, "Mat", &[num(3.0), num(3.0), Value::from("i16")])
            .unwrap();
        let sub = env
            .call_method(m, "view", &[num(1.0), num(1.0), num(2.0), num(2.0)])
            .unwrap()
            .as_object()
            .unwrap();
        assert_eq!(env.get_property(sub, "continuous").unwrap(), Value::Bool(false));
        env.call_method(sub, "fill", &[num(5.0)]).unwrap();
        assert_eq!(env.call_method(m, "get", &[num(2.0), num(2.0)]).unwrap(), num(5.0));
        assert_eq!(env.call_method(m, "get", &[num(0.0), num(0.0)]).unwrap(), num(0.0));

        let err = env.call_method(sub, "reshape", &[num(4.0), num(1.0)]).unwrap_err();
        assert_eq!(err.code, "ERR_INVALID_LAYOUT");

        env.unreference(m);
        env.collect();
        assert_eq!(ledger.stats().live_buffers(), 1);
        assert_eq!(env.call_method(sub, "get", &[num(0.0), num(0.0)]).unwrap(), num(5.0));

        env.unreference(sub);
        env.collect();
        assert_eq!(ledger.stats().live_buffers(), 0);
        assert_eq!(env.finalized_count(), 2);
    }

    #[test]
    fn test_to_array_and_inspect() {
        let (mut env, exports, _ledger) = setup();
        let m = env
            .construct(
                &exports,
                "Mat",
                &[
                    num(2.0),
                    num(2.0),
                    Value::from("u16"),
                    Value::Array(vec![num(1.0), num(2.0), num(3.0), num(4.0)]),
                ],
            )
            .unwrap();
        assert_eq!(
            env.call_method(m, "toArray", &[]).unwrap(),
            Value::Array(vec![
                Value::Array(vec![num(1.0), num(2.0)]),
                Value::Array(vec![num(3.0), num(4.0)]),
            ])
        );
        let Value::Record(info) = env.call_method(m, "inspect", &[]).unwrap() else {
            panic!("inspect should return a record");
        };
        assert_eq!(info["type"], Value::from("u16"));
        assert_eq!(info["bufferRefs"], num(1.0));

        env.call_method(m, "release", &[]).unwrap();
        assert_eq!(env.get_property(m, "rows").unwrap(), num(0.0));
        let err = env.call_method(m, "get", &[num(0.0), num(0.0)]).unwrap_err();
        assert_eq!(err.code, "ERR_OUT_OF_RANGE");
    }

    #[test]
    fn test_stats_async_resolves_on_host_thread() {
        let (mut env, exports, _ledger) = setup();
        let m = env
            .construct(
                &exports,
                "Mat",
                &[
                    num(2.0),
                    num(2.0),
                    Value::from("f64"),
                    Value::Array(vec![num(1.0), num(2.0), num(3.0), num(6.0)]),
                ],
            )
            .unwrap();
        let Value::Number(task) = env.call_method(m, "statsAsync", &[]).unwrap() else {
            panic!("statsAsync should return a task id");
        };
        // later writes do not affect the queued job
        env.call_method(m, "fill", &[num(0.0)]).unwrap();
        let Value::Record(stats) = env.await_task(task as u64).unwrap() else {
            panic!("stats should resolve to a record");
        };
        assert_eq!(stats["sum"], num(12.0));
        assert_eq!(stats["mean"], num(3.0));
        assert_eq!(stats["max"], num(6.0));
    }
}
