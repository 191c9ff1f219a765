use std::time::Duration;

use futures::Future;

use common::value::Value;
use errors::Result;
use super::registry::{FunctionRegistry, TaskContext, TaskFuture, TaskResult};

/// Register the built-in task functions.
pub fn install_builtins(registry: &mut FunctionRegistry) {
    registry.register_sync("identity", task_identity);
    registry.register_sync("sum", task_sum);
    registry.register_sync("concat", task_concat);
    registry.register("sleep", task_sleep);
}

fn task_identity(args: &[Value]) -> Result<Value> {
    match args.first() {
        Some(v) => Ok(v.clone()),
        None => bail!("identity expects one argument"),
    }
}

fn task_sum(args: &[Value]) -> Result<Value> {
    let mut total = 0i64;
    for arg in args {
        total += arg.as_int()?;
    }
    Ok(Value::Int(total))
}

fn task_concat(args: &[Value]) -> Result<Value> {
    let mut out = String::new();
    for arg in args {
        out.push_str(arg.as_str()?);
    }
    Ok(Value::Str(out))
}

/// Suspend for the given number of milliseconds, then yield the duration
/// back. Exercises genuinely asynchronous remote work.
fn task_sleep(ctx: &mut TaskContext, args: Vec<Value>) -> TaskResult {
    let millis = match args.first() {
        Some(v) => v.as_int()?,
        None => bail!("sleep expects a duration in milliseconds"),
    };
    if millis < 0 {
        bail!("sleep duration must be non-negative");
    }
    let timer = ctx.cluster.get().timer.clone();
    let fut: Box<TaskFuture> = Box::new(
        timer
            .sleep(Duration::from_millis(millis as u64))
            .from_err()
            .map(move |()| Value::Int(millis)),
    );
    Ok(fut)
}
