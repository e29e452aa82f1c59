//! Buffer lifetime and matrix semantics observed through the host surface.

use matbind::host::{Env, Exception, Exports, ObjectRef, Value};
use matbind::{BindingConfig, ElementType, ModuleRegistrar};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

fn num(n: f64) -> Value {
    Value::Number(n)
}

fn idx(n: usize) -> Value {
    Value::from(n)
}

struct Host {
    env: Env,
    exports: Exports,
}

impl Host {
    fn new() -> Self {
        let mut env = Env::with_worker_threads(2);
        let exports = ModuleRegistrar::new(BindingConfig::default())
            .load(&mut env)
            .unwrap();
        Self { env, exports }
    }

    fn mat(&mut self, rows: usize, cols: usize, elem: &str) -> ObjectRef {
        self.env
            .construct(&self.exports, "Mat", &[idx(rows), idx(cols), Value::from(elem)])
            .unwrap()
    }

    fn call(&mut self, obj: ObjectRef, method: &str, args: &[Value]) -> Result<Value, Exception> {
        self.env.call_method(obj, method, args)
    }

    fn get(&mut self, obj: ObjectRef, row: usize, col: usize) -> Result<Value, Exception> {
        self.call(obj, "get", &[idx(row), idx(col)])
    }

    fn set(&mut self, obj: ObjectRef, row: usize, col: usize, value: f64) {
        self.call(obj, "set", &[idx(row), idx(col), num(value)]).unwrap();
    }

    fn prop(&self, obj: ObjectRef, name: &str) -> Value {
        self.env.get_property(obj, name).unwrap()
    }

    fn drop_object(&mut self, obj: ObjectRef) {
        self.env.unreference(obj);
        self.env.collect();
    }

    fn live_buffers(&self) -> usize {
        self.env
            .instance_data::<matbind::MatRuntime>()
            .unwrap()
            .ledger()
            .stats()
            .live_buffers()
    }

    fn deallocations(&self) -> usize {
        self.env
            .instance_data::<matbind::MatRuntime>()
            .unwrap()
            .ledger()
            .stats()
            .deallocations
    }
}

#[test]
fn test_worked_example() {
    let mut host = Host::new();
    let m = host.mat(2, 3, "float64");
    assert_eq!(host.prop(m, "rows"), num(2.0));
    assert_eq!(host.prop(m, "cols"), num(3.0));
    assert_eq!(host.prop(m, "type"), Value::from("f64"));

    host.set(m, 1, 2, 5.0);
    assert_eq!(host.get(m, 1, 2).unwrap(), num(5.0));
    assert_eq!(host.get(m, 0, 0).unwrap(), num(0.0));

    host.call(m, "reshape", &[idx(3), idx(2)]).unwrap();
    assert_eq!(host.get(m, 2, 1).unwrap(), num(5.0));

    let err = host.call(m, "reshape", &[idx(2), idx(2)]).unwrap_err();
    assert_eq!(err.code, "ERR_SHAPE_MISMATCH");
}

#[test]
fn test_allocation_is_zero_filled_for_every_type() {
    let mut host = Host::new();
    let mut rng = StdRng::seed_from_u64(7);
    for elem in ElementType::ALL {
        let rows = rng.gen_range(1..6);
        let cols = rng.gen_range(1..6);
        let m = host.mat(rows, cols, elem.name());
        for row in 0..rows {
            for col in 0..cols {
                assert_eq!(host.get(m, row, col).unwrap(), num(0.0), "{elem} at ({row}, {col})");
            }
        }
    }
}

#[test]
fn test_clone_is_isolated_from_source() {
    let mut host = Host::new();
    let mut rng = StdRng::seed_from_u64(11);
    for _ in 0..20 {
        let rows = rng.gen_range(1..5);
        let cols = rng.gen_range(1..5);
        let m = host.mat(rows, cols, "i32");
        let original = rng.gen_range(-1000..1000) as f64;
        host.set(m, 0, 0, original);

        let copy = host.call(m, "clone", &[]).unwrap().as_object().unwrap();
        host.set(copy, 0, 0, original + 1.0);
        assert_eq!(host.get(m, 0, 0).unwrap(), num(original));

        host.set(m, 0, 0, original - 1.0);
        assert_eq!(host.get(copy, 0, 0).unwrap(), num(original + 1.0));
    }
}

#[test]
fn test_view_writes_are_shared_and_survive_view_release() {
    let mut host = Host::new();
    let m = host.mat(4, 4, "u16");
    let view = host
        .call(m, "view", &[idx(1), idx(2), idx(2), idx(2)])
        .unwrap()
        .as_object()
        .unwrap();

    host.set(view, 1, 1, 9.0);
    assert_eq!(host.get(m, 2, 3).unwrap(), num(9.0));

    host.drop_object(view);
    assert_eq!(host.get(m, 2, 3).unwrap(), num(9.0));
    host.set(m, 3, 3, 1.0);
}

#[test]
fn test_buffer_freed_once_after_last_of_n_views() {
    let mut host = Host::new();
    let m = host.mat(8, 8, "f32");
    host.set(m, 0, 0, 2.5);

    let views: Vec<ObjectRef> = (0..5)
        .map(|i| {
            host.call(m, "view", &[idx(0), idx(0), idx(8 - i), idx(8 - i)])
                .unwrap()
                .as_object()
                .unwrap()
        })
        .collect();

    host.drop_object(m);
    let (last, rest) = views.split_last().unwrap();
    for &view in rest {
        host.drop_object(view);
        assert_eq!(host.live_buffers(), 1);
        assert_eq!(host.get(*last, 0, 0).unwrap(), num(2.5));
    }
    assert_eq!(host.deallocations(), 0);

    host.drop_object(*last);
    assert_eq!(host.live_buffers(), 0);
    assert_eq!(host.deallocations(), 1);

    // nothing left to free on teardown
    host.env.collect();
    assert_eq!(host.deallocations(), 1);
}

#[test]
fn test_explicit_release_then_finalize_frees_once() {
    let mut host = Host::new();
    let m = host.mat(2, 2, "u8");
    host.call(m, "release", &[]).unwrap();
    host.call(m, "release", &[]).unwrap();
    assert_eq!(host.deallocations(), 1);
    assert_eq!(host.get(m, 0, 0).unwrap_err().code, "ERR_OUT_OF_RANGE");

    host.drop_object(m);
    assert_eq!(host.deallocations(), 1);
    assert_eq!(host.env.finalized_count(), 1);
}

#[test]
fn test_env_teardown_finalizes_live_objects() {
    let mut host = Host::new();
    let m = host.mat(3, 3, "f64");
    let _view = host.call(m, "view", &[idx(0), idx(0), idx(1), idx(1)]).unwrap();
    let ledger = std::sync::Arc::clone(
        host.env
            .instance_data::<matbind::MatRuntime>()
            .unwrap()
            .ledger(),
    );
    assert_eq!(ledger.stats().live_buffers(), 1);
    drop(host);
    assert_eq!(ledger.stats().live_buffers(), 0);
    assert_eq!(ledger.stats().deallocations, 1);
}

#[test]
fn test_reshape_preserves_linear_order() {
    let mut host = Host::new();
    let mut rng = StdRng::seed_from_u64(23);
    for _ in 0..20 {
        let rows = rng.gen_range(1..7);
        let cols = rng.gen_range(1..7);
        let m = host.mat(rows, cols, "i64");
        for i in 0..rows * cols {
            host.set(m, i / cols, i % cols, i as f64);
        }

        let (r2, c2) = (rng.gen_range(1..10), rng.gen_range(1..10));
        let result = host.call(m, "reshape", &[idx(r2), idx(c2)]);
        if r2 * c2 != rows * cols {
            assert_eq!(result.unwrap_err().code, "ERR_SHAPE_MISMATCH");
            continue;
        }
        result.unwrap();
        for i in 0..rows * cols {
            assert_eq!(host.get(m, i / c2, i % c2).unwrap(), num(i as f64));
        }
    }
}

#[test]
fn test_get_one_past_last_row_is_out_of_range() {
    let mut host = Host::new();
    let mut rng = StdRng::seed_from_u64(31);
    for _ in 0..20 {
        let rows = rng.gen_range(1..10);
        let cols = rng.gen_range(1..10);
        let m = host.mat(rows, cols, "u8");
        let err = host.get(m, rows, 0).unwrap_err();
        assert_eq!(err.code, "ERR_OUT_OF_RANGE");
        let err = host.get(m, 0, cols).unwrap_err();
        assert_eq!(err.code, "ERR_OUT_OF_RANGE");
    }
}

#[test]
fn test_narrowing_policy() {
    let mut host = Host::new();
    let m = host.mat(1, 1, "i8");
    for bad in [128.0, -129.0, 1.5, f64::NAN] {
        let err = host.call(m, "set", &[idx(0), idx(0), num(bad)]).unwrap_err();
        assert_eq!(err.code, "ERR_TYPE_MISMATCH", "{bad}");
    }
    host.set(m, 0, 0, -128.0);
    assert_eq!(host.get(m, 0, 0).unwrap(), num(-128.0));

    let f = host.mat(1, 1, "f32");
    let err = host.call(f, "set", &[idx(0), idx(0), num(1e300)]).unwrap_err();
    assert_eq!(err.code, "ERR_TYPE_MISMATCH");
    host.set(f, 0, 0, 0.1);
    assert_eq!(host.get(f, 0, 0).unwrap(), num(0.1f32 as f64));

    let u = host.mat(1, 1, "u64");
    host.call(u, "set", &[idx(0), idx(0), Value::BigInt(u64::MAX as i128)])
        .unwrap();
    assert_eq!(host.get(u, 0, 0).unwrap(), Value::BigInt(u64::MAX as i128));
}

#[test]
fn test_stats_async_completion_is_drained_on_host() {
    let mut host = Host::new();
    let m = host
        .env
        .construct(
            &host.exports,
            "Mat",
            &[
                idx(2),
                idx(3),
                Value::from("i32"),
                Value::Array([1.0, 2.0, 3.0, 4.0, 5.0, 6.0].map(num).to_vec()),
            ],
        )
        .unwrap();
    let view = host
        .call(m, "view", &[idx(0), idx(1), idx(2), idx(2)])
        .unwrap()
        .as_object()
        .unwrap();
    let task = match host.call(view, "statsAsync", &[]).unwrap() {
        Value::Number(task) => task as u64,
        other => panic!("unexpected task id {other:?}"),
    };
    // the job owns a snapshot; collecting the objects cannot affect it
    host.drop_object(view);
    host.drop_object(m);
    assert_eq!(host.live_buffers(), 0);

    let mut completions = Vec::new();
    while completions.is_empty() {
        completions = host.env.drain_completions();
        std::thread::yield_now();
    }
    assert_eq!(completions.len(), 1);
    assert_eq!(completions[0].task, task);
    let Ok(Value::Record(stats)) = &completions[0].result else {
        panic!("stats should resolve to a record");
    };
    assert_eq!(stats["sum"], num(2.0 + 3.0 + 5.0 + 6.0));
    assert_eq!(stats["min"], num(2.0));
    assert_eq!(stats["count"], num(4.0));
}
