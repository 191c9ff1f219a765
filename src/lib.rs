#[macro_use]
extern crate log;
#[macro_use]
extern crate error_chain;
#[macro_use]
extern crate lazy_static;
#[macro_use]
extern crate serde_derive;
extern crate chrono;
extern crate futures;
extern crate num_cpus;
extern crate serde;
extern crate serde_cbor;
extern crate serde_json;
extern crate tokio_core;
extern crate tokio_timer;

#[cfg(test)]
extern crate env_logger;

pub mod common;
pub mod errors;
pub mod graph;
pub mod logging;
pub mod scheduler;
pub mod worker;

pub use common::id::{ChunkId, ProcKind, ThunkId, WorkerId};
pub use common::options::{SchedulerOptions, ThunkOptions};
pub use common::value::Value;
pub use graph::thunk::{ThunkFlags, ThunkInput, ThunkRef};
pub use scheduler::Session;
pub use worker::chunk::ChunkRef;
pub use worker::{ClusterRef, Payload, WorkerRef};

pub const VERSION: &'static str = env!("CARGO_PKG_VERSION");
