//! Demo callables served by the binary.

use callwire::executor::{Class, Module};
use callwire::value::{param, param_or_default};
use callwire::{ExecutionError, SerializableValue};
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

/// Arithmetic and diagnostic functions.
pub fn math() -> Module {
    Module::new("services/math")
        .sync_function("add", |args| {
            Ok(param::<i64>(&args, 0)? + param::<i64>(&args, 1)?)
        })
        .sync_function("mul", |args| {
            Ok(param::<i64>(&args, 0)? * param::<i64>(&args, 1)?)
        })
        .sync_function("echo", |args| Ok(SerializableValue::Array(args)))
        .sync_function("fail", |args| -> Result<SerializableValue, _> {
            let message: String = param_or_default(&args, 0)?;
            let message = if message.is_empty() {
                "Conflict".to_string()
            } else {
                message
            };
            // An explicit code is passed through to the JSON-RPC error
            match param::<Option<i64>>(&args, 1)? {
                Some(code) => Err(ExecutionError::rpc(code, message)),
                None => Err(ExecutionError::application(message)),
            }
        })
        .function("delay", |args| async move {
            let millis: u64 = param(&args, 0)?;
            tokio::time::sleep(Duration::from_millis(millis)).await;
            Ok::<_, ExecutionError>(args.get(1).cloned().unwrap_or_default())
        })
}

/// Counter state; one instance per call unless a factory says otherwise.
pub struct Counter {
    value: AtomicI64,
}

/// The `Counter` class.
pub fn counter() -> Module {
    let class = Class::new("Counter", |args| {
        Ok(Counter {
            value: AtomicI64::new(param_or_default(&args, 0)?),
        })
    })
    .sync_method("increment", |counter: &Counter, args| {
        let by = param::<Option<i64>>(&args, 0)?.unwrap_or(1);
        Ok(counter.value.fetch_add(by, Ordering::SeqCst) + by)
    })
    .sync_method("value", |counter: &Counter, _| {
        Ok(counter.value.load(Ordering::SeqCst))
    });

    Module::new("services/counter").class(class)
}
