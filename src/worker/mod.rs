pub mod chunk;
pub mod registry;
pub mod tasks;

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;

use futures::{future, Future};
use tokio_timer::Timer;

use common::id::{ProcKind, ProcUnit, ThunkId, WorkerId};
use common::options::ThunkOptions;
use common::value::Value;
use common::wrapped::SharedCell;
use errors::{Error, ErrorKind, Result};
use scheduler::dynamics::SchedulerHandle;
use self::chunk::{ChunkRef, ChunkStore};
use self::registry::{FunctionRegistry, RegistryRef, TaskContext, TaskFuture};

/// One wire argument of a dispatch: a chunk ref to be materialized on the
/// worker, or an immediate value shipped along.
#[derive(Clone, Debug)]
pub enum TaskArg {
    Chunk(ChunkRef),
    Value(Value),
}

/// A dispatched call as it goes over the worker RPC surface.
#[derive(Clone, Debug)]
pub struct DoTask {
    pub thunk_id: ThunkId,
    pub fname: String,
    pub args: Vec<TaskArg>,
    pub get_result: bool,
    pub persist: bool,
    pub cache: bool,
    pub options: ThunkOptions,
}

/// What a finished thunk left behind: a raw value, or a chunk ref plus the
/// encoded size of the data behind it.
#[derive(Clone, Debug)]
pub enum Payload {
    Value(Value),
    Chunk(ChunkRef, u64),
}

/// Per-process worker state.
pub struct Worker {
    id: WorkerId,
    procs: Vec<ProcUnit>,
    pub store: ChunkStore,
    alive: bool,
    /// Testing hook: the worker stops answering after this many completed
    /// tasks, as if its process had exited.
    fail_after: Option<usize>,
    completed: usize,
}

pub type WorkerRef = SharedCell<Worker>;

impl WorkerRef {
    pub fn new(id: WorkerId) -> Self {
        let procs = vec![
            ProcUnit {
                owner: id,
                index: 0,
                kind: ProcKind::Cpu,
            },
        ];
        Self::with_procs(id, procs)
    }

    pub fn with_procs(id: WorkerId, procs: Vec<ProcUnit>) -> Self {
        WorkerRef::wrap(Worker {
            id: id,
            procs: procs,
            store: ChunkStore::new(id),
            alive: true,
            fail_after: None,
            completed: 0,
        })
    }

    pub fn get_id(&self) -> WorkerId {
        self.get().id
    }

    pub fn is_alive(&self) -> bool {
        self.get().alive
    }

    /// Simulate process death: all held data is gone.
    pub fn kill(&self) {
        let mut w = self.get_mut();
        w.alive = false;
        w.store.clear();
    }

    pub fn fail_after(&self, completed_tasks: usize) {
        self.get_mut().fail_after = Some(completed_tasks);
    }

    /// Execute one dispatched call. Materializes chunk arguments (fetching
    /// from peer stores where needed), picks a processor unit, runs the
    /// function and wraps the result according to the request.
    pub fn do_task(
        &self,
        cluster: &ClusterRef,
        req: DoTask,
        sch_handle: Option<SchedulerHandle>,
    ) -> Box<Future<Item = Payload, Error = Error>> {
        {
            let mut w = self.get_mut();
            if let Some(limit) = w.fail_after {
                if w.completed >= limit {
                    w.alive = false;
                    w.store.clear();
                }
            }
            if !w.alive {
                return Box::new(future::err(ErrorKind::WorkerLost(w.id).into()));
            }
        }

        let fut = match self.run_task(cluster, &req, sch_handle) {
            Ok(f) => f,
            Err(e) => return Box::new(future::err(e)),
        };

        let wref = self.clone();
        let get_result = req.get_result;
        let persist = req.persist;
        Box::new(fut.and_then(move |value| {
            let mut w = wref.get_mut();
            if !w.alive {
                bail!(ErrorKind::WorkerLost(w.id));
            }
            w.completed += 1;
            if get_result {
                Ok(Payload::Value(value))
            } else {
                let (cref, size) = w.store.put(&value, persist)?;
                Ok(Payload::Chunk(cref, size))
            }
        }))
    }

    fn run_task(
        &self,
        cluster: &ClusterRef,
        req: &DoTask,
        sch_handle: Option<SchedulerHandle>,
    ) -> Result<Box<TaskFuture>> {
        let mut args = Vec::with_capacity(req.args.len());
        for arg in req.args.iter() {
            match *arg {
                TaskArg::Chunk(ref cref) => args.push(cluster.materialize(cref)?),
                TaskArg::Value(ref v) => args.push(v.clone()),
            }
        }
        let unit = choose_processor(&self.get(), &req.options, &req.fname, &args)?;
        debug!("task {} ({}) on {}", req.thunk_id, req.fname, unit);
        let mut ctx = TaskContext {
            processor: Some(unit),
            cluster: cluster.clone(),
            handle: sch_handle,
        };
        let registry = cluster.registry();
        let r = registry.borrow().call(&req.fname, &mut ctx, args);
        r
    }
}

/// Pick the processor unit that will run a function on this worker. The
/// scheduler only ever picks the host; this predicate is the worker's own
/// business and pluggable per deployment.
pub fn choose_processor(
    worker: &Worker,
    options: &ThunkOptions,
    fname: &str,
    _args: &[Value],
) -> Result<ProcUnit> {
    if options.proc_kinds.is_empty() {
        return match worker.procs.first() {
            Some(p) => Ok(*p),
            None => bail!("worker {} has no processor units", worker.id),
        };
    }
    for p in worker.procs.iter() {
        if options.proc_kinds.contains(&p.kind) {
            return Ok(*p);
        }
    }
    bail!(
        "no processor on {} matches kinds {:?} for {:?}",
        worker.id,
        options.proc_kinds,
        fname
    )
}

/// The pool of live workers plus what they share: the function registry and
/// the timer wheel.
pub struct Cluster {
    workers: BTreeMap<WorkerId, WorkerRef>,
    registry: RegistryRef,
    pub timer: Timer,
}

pub type ClusterRef = SharedCell<Cluster>;

impl ClusterRef {
    pub fn new() -> Self {
        let mut registry = FunctionRegistry::new();
        tasks::install_builtins(&mut registry);
        ClusterRef::wrap(Cluster {
            workers: BTreeMap::new(),
            registry: Rc::new(RefCell::new(registry)),
            timer: Timer::default(),
        })
    }

    /// A pool of in-process workers with consecutive ids starting at 1.
    pub fn local(nworkers: usize) -> Self {
        let cluster = Self::new();
        for i in 0..nworkers {
            cluster.add_worker(WorkerRef::new(WorkerId(i as u32 + 1)));
        }
        cluster
    }

    pub fn add_worker(&self, worker: WorkerRef) {
        let id = worker.get_id();
        let old = self.get_mut().workers.insert(id, worker);
        assert!(old.is_none(), "cluster already contains {}", id);
    }

    pub fn remove_worker(&self, id: WorkerId) -> Option<WorkerRef> {
        let removed = self.get_mut().workers.remove(&id);
        if let Some(ref w) = removed {
            w.kill();
        }
        removed
    }

    pub fn get_worker(&self, id: WorkerId) -> Option<WorkerRef> {
        self.get().workers.get(&id).cloned()
    }

    /// Live worker refs in id order.
    pub fn workers(&self) -> Vec<WorkerRef> {
        self.get().workers.values().cloned().collect()
    }

    /// Live worker ids in id order.
    pub fn worker_ids(&self) -> Vec<WorkerId> {
        self.get().workers.keys().cloned().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.get().workers.is_empty()
    }

    pub fn len(&self) -> usize {
        self.get().workers.len()
    }

    pub fn registry(&self) -> RegistryRef {
        self.get().registry.clone()
    }

    /// Decode the value behind a chunk ref, wherever it lives.
    pub fn materialize(&self, cref: &ChunkRef) -> Result<Value> {
        match self.get_worker(cref.owner) {
            Some(w) => w.get().store.fetch(cref.id),
            None => bail!(ErrorKind::ChunkLost(*cref)),
        }
    }

    /// Ask the owning worker to drop one reference to the chunk.
    pub fn free(&self, cref: &ChunkRef, force: bool, cache: bool) {
        if let Some(w) = self.get_worker(cref.owner) {
            w.get_mut().store.free(cref.id, force, cache);
        }
    }

    /// Try to revive a previously released chunk. Returns the encoded size
    /// on success.
    pub fn unrelease(&self, cref: &ChunkRef) -> Option<u64> {
        let w = self.get_worker(cref.owner)?;
        let mut worker = w.get_mut();
        worker.store.unrelease(cref.id)?;
        worker.store.size_of(cref.id)
    }
}
