use matbind::host::{Env, Exception, Value};
use matbind::logging::init_subscriber;
use matbind::{registrar, MatRuntime};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_subscriber();
    println!("Loading module '{}'", registrar::MODULE_NAME);

    let mut env = Env::new();
    let exports = registrar::load(&mut env)?;
    let names: Vec<&str> = exports.names().collect();
    println!("Exports: {names:?}");

    let values: Vec<Value> = (0..12).map(|i| Value::Number(i as f64)).collect();
    let mat = env.construct(
        &exports,
        "Mat",
        &[
            Value::Number(3.0),
            Value::Number(4.0),
            Value::from("f32"),
            Value::Array(values),
        ],
    )?;
    let centre = env
        .call_method(
            mat,
            "view",
            &[Value::Number(1.0), Value::Number(1.0), Value::Number(2.0), Value::Number(2.0)],
        )?
        .as_object()
        .ok_or_else(|| Exception::error("ERR_EXAMPLE", "view did not return an object"))?;

    println!("Matrix: {:?}", env.call_method(mat, "toArray", &[])?);
    println!("Centre view: {:?}", env.call_method(centre, "toArray", &[])?);

    if let Value::Number(task) = env.call_method(centre, "statsAsync", &[])? {
        println!("Centre stats: {:?}", env.await_task(task as u64)?);
    }

    // drop both host references and let the collector finalize them
    env.unreference(centre);
    env.unreference(mat);
    let collected = env.collect();
    if let Some(runtime) = env.instance_data::<MatRuntime>() {
        println!(
            "Collected {collected} objects; ledger: {:?}",
            runtime.ledger().stats()
        );
    }
    Ok(())
}
