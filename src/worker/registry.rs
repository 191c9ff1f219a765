use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use futures::{future, Future};

use common::id::ProcUnit;
use common::value::Value;
use errors::{Error, ErrorKind, Result};
use scheduler::dynamics::SchedulerHandle;
use super::ClusterRef;

pub type TaskFuture = Future<Item = Value, Error = Error>;
pub type TaskResult = Result<Box<TaskFuture>>;

/// Execution context handed to a task function.
pub struct TaskContext {
    /// Processor unit chosen by the worker; `None` for in-scheduler
    /// execution.
    pub processor: Option<ProcUnit>,
    pub cluster: ClusterRef,
    /// Present only for dynamic thunks.
    pub handle: Option<SchedulerHandle>,
}

impl TaskContext {
    /// The scheduler endpoint of a dynamic thunk.
    pub fn scheduler(&self) -> Result<&SchedulerHandle> {
        match self.handle {
            Some(ref h) => Ok(h),
            None => bail!("task is not dynamic, no scheduler handle"),
        }
    }
}

type TaskFn = Box<Fn(&mut TaskContext, Vec<Value>) -> TaskResult>;

/// Name-keyed table of task functions, shared by the scheduler and every
/// worker of a cluster.
#[derive(Default)]
pub struct FunctionRegistry {
    fns: HashMap<String, TaskFn>,
}

pub type RegistryRef = Rc<RefCell<FunctionRegistry>>;

impl FunctionRegistry {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn register<F>(&mut self, name: &str, f: F)
    where
        F: Fn(&mut TaskContext, Vec<Value>) -> TaskResult + 'static,
    {
        self.fns.insert(name.to_string(), Box::new(f));
    }

    /// Register a plain synchronous function.
    pub fn register_sync<F>(&mut self, name: &str, f: F)
    where
        F: Fn(&[Value]) -> Result<Value> + 'static,
    {
        self.register(name, move |_ctx, args| {
            let value = f(&args)?;
            let fut: Box<TaskFuture> = Box::new(future::ok(value));
            Ok(fut)
        });
    }

    pub fn call(&self, name: &str, ctx: &mut TaskContext, args: Vec<Value>) -> TaskResult {
        match self.fns.get(name) {
            Some(f) => f(ctx, args),
            None => Err(Error::from(ErrorKind::UnknownFunction(name.to_string()))),
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.fns.contains_key(name)
    }
}
