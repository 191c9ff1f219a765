use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use futures::unsync::mpsc::UnboundedSender;
use tokio_core::reactor::Handle;

use common::id::{ThunkId, WorkerId};
use common::options::SchedulerOptions;
use common::wrapped::SharedCell;
use common::{RcSet, RunHook};
use errors::Result;
use graph::analysis::DagInfo;
use graph::thunk::{ThunkInput, ThunkRef};
use logging::LoggerRef;
use worker::{ClusterRef, Payload};
use super::dynamics::WorkerChannels;
use super::selector;

lazy_static! {
    /// When set, the compute state re-verifies its bucket invariants at
    /// every quiescent point. Too slow for production runs; tests and
    /// `SLEET_DEBUG_MODE=1` switch it on.
    pub static ref DEBUG_CHECK_STATE: AtomicBool = AtomicBool::new(false);
}

/// One message on the completion channel: what a dispatch came back with.
pub struct Completion {
    pub from: WorkerId,
    pub thunk_id: ThunkId,
    pub payload: Result<Payload>,
}

/// The single mutable object of a run. Every field is guarded by the
/// `StateRef` cell; borrows are short-lived and never held across a
/// suspension point.
pub struct ComputeState {
    /// Reverse edges, immutable after analysis.
    pub(super) dependents: HashMap<ThunkRef, RcSet<ThunkRef>>,
    /// Dispatch priorities, immutable after analysis.
    pub(super) order: HashMap<ThunkRef, i64>,
    pub(super) root: ThunkRef,

    /// Thunk -> inputs still unfulfilled. A key here is in no other bucket.
    pub(super) waiting: HashMap<ThunkRef, RcSet<ThunkRef>>,
    /// Thunk -> consumers not yet done. Empty set means the cached result
    /// is freeable.
    pub(super) waiting_data: HashMap<ThunkRef, RcSet<ThunkRef>>,
    /// Fireable now, sorted by priority with the highest at the end.
    pub(super) ready: Vec<ThunkRef>,
    pub(super) running: RcSet<ThunkRef>,
    pub(super) finished: RcSet<ThunkRef>,
    /// Results of finished thunks, removed once all consumers are done.
    pub(super) cache: HashMap<ThunkRef, Payload>,
    /// Wire-id lookup, populated on dispatch.
    pub(super) thunk_dict: HashMap<ThunkId, ThunkRef>,
    /// Dynamic message endpoints, one pair per live worker.
    pub(super) worker_chans: HashMap<WorkerId, WorkerChannels>,
    /// Stop-the-world flag; only ever goes false -> true.
    pub(super) halt: bool,

    pub(super) cluster: ClusterRef,
    pub(super) options: SchedulerOptions,
    pub(super) handle: Handle,
    pub(super) comp_tx: Option<UnboundedSender<Completion>>,
    pub(super) run_hook: Option<RunHook<Result<Payload>>>,
    pub(super) logger: LoggerRef,
}

impl ComputeState {
    pub(super) fn order_key(&self, tref: &ThunkRef) -> (i64, ThunkId) {
        (
            self.order.get(tref).cloned().unwrap_or(0),
            tref.get_id(),
        )
    }

    /// Insert into the ready sequence, keeping it sorted by priority.
    pub(super) fn push_ready(&mut self, tref: ThunkRef) {
        debug_assert!(!self.running.contains(&tref));
        debug_assert!(!self.finished.contains(&tref));
        debug_assert!(!self.ready.contains(&tref));
        let key = self.order_key(&tref);
        let pos = match self
            .ready
            .binary_search_by(|probe| self.order_key(probe).cmp(&key))
        {
            Ok(pos) | Err(pos) => pos,
        };
        self.ready.insert(pos, tref);
    }

    pub(super) fn pop_ready(&mut self, worker: WorkerId, immediate_next: bool) -> Option<ThunkRef> {
        let live: RcSet<WorkerId> = self.cluster.worker_ids().into_iter().collect();
        selector::pop_with_affinity(&mut self.ready, worker, &live, immediate_next)
    }

    /// Refresh the placement hints of a thunk from where its input data
    /// currently lives. Weights are the encoded chunk sizes per owner.
    pub(super) fn compute_affinity(&self, tref: &ThunkRef) {
        let mut weights: HashMap<WorkerId, u64> = HashMap::new();
        {
            let t = tref.get();
            for input in t.inputs.iter() {
                match *input {
                    ThunkInput::Chunk(ref c) => {
                        let size = self
                            .cluster
                            .get_worker(c.owner)
                            .and_then(|w| w.get().store.size_of(c.id))
                            .unwrap_or(1);
                        *weights.entry(c.owner).or_insert(0) += size;
                    }
                    ThunkInput::Thunk(ref dep) => {
                        if let Some(payload) = self.cache.get(dep) {
                            if let Payload::Chunk(ref c, size) = *payload {
                                *weights.entry(c.owner).or_insert(0) += size;
                            }
                        }
                    }
                    ThunkInput::Value(_) => {}
                }
            }
        }
        let mut affinity: Vec<(WorkerId, u64)> = weights.into_iter().collect();
        affinity.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
        tref.get_mut().affinity = affinity;
    }

    /// Settle a thunk whose result just landed in `cache`: remember its
    /// chunk ref, unlock dependents, free inputs nobody waits for any
    /// more, and move it to `finished`. Returns the immediate-next hint.
    pub(super) fn finish_task(&mut self, node: &ThunkRef, free: bool) -> bool {
        if node.get().flags.cache {
            let chunk = match self.cache.get(node) {
                Some(&Payload::Chunk(ref c, _)) => Some(*c),
                _ => None,
            };
            if let Some(c) = chunk {
                node.get_mut().cache_ref = Some(c);
            }
        }

        let mut deps: Vec<ThunkRef> = self
            .dependents
            .get(node)
            .map(|s| s.iter().cloned().collect())
            .unwrap_or_default();
        deps.sort_by(|a, b| self.order_key(b).cmp(&self.order_key(a)));
        let mut unlocked = 0;
        for dep in deps {
            let now_ready = match self.waiting.get_mut(&dep) {
                Some(w) => {
                    w.remove(node);
                    w.is_empty()
                }
                None => false,
            };
            if now_ready {
                self.waiting.remove(&dep);
                self.compute_affinity(&dep);
                self.push_ready(dep);
                unlocked += 1;
            }
        }
        let immediate_next = unlocked == 1;

        let cluster = self.cluster.clone();
        for input in node.thunk_inputs() {
            let drained = match self.waiting_data.get_mut(&input) {
                Some(wd) => {
                    wd.remove(node);
                    wd.is_empty()
                }
                None => false,
            };
            if drained && free {
                let flags = input.get().flags.clone();
                if flags.persist {
                    continue;
                }
                match self.cache.remove(&input) {
                    Some(Payload::Chunk(c, _)) => cluster.free(&c, false, flags.cache),
                    Some(Payload::Value(_)) | None => {}
                }
            }
        }

        self.running.remove(node);
        self.finished.insert(node.clone());
        immediate_next
    }

    pub(super) fn is_done(&self) -> bool {
        self.ready.is_empty() && self.running.is_empty()
    }

    pub(super) fn root_result(&self) -> Result<Payload> {
        match self.cache.get(&self.root) {
            Some(p) => Ok(p.clone()),
            None => bail!("run ended without a root result"),
        }
    }

    /// Fire the run hook. Only the first call delivers anything.
    pub(super) fn resolve(&mut self, result: Result<Payload>) {
        if let Some(hook) = self.run_hook.take() {
            let _ = hook.send(result);
        }
    }

    pub(super) fn close_channels(&mut self) {
        for (_, chans) in self.worker_chans.drain() {
            chans.close();
        }
    }
}

impl ComputeState {
    /// Re-run `check_invariants` when the debug gate is on.
    pub(super) fn check_invariants_opt(&self) -> Result<()> {
        if DEBUG_CHECK_STATE.load(Ordering::Relaxed) {
            self.check_invariants()
        } else {
            Ok(())
        }
    }

    /// Verify the bucket invariants: `ready`, `running` and `finished`
    /// stay pairwise disjoint, `waiting` keys sit in no other bucket,
    /// cached results belong to finished thunks, no finished thunk is
    /// still counted as a consumer, and the ready sequence stays sorted.
    /// Quite slow.
    pub fn check_invariants(&self) -> Result<()> {
        debug!("checking compute state invariants");
        for t in &self.ready {
            if self.running.contains(t) || self.finished.contains(t)
                || self.waiting.contains_key(t)
            {
                bail!("ready thunk {} present in another bucket", t.get_id());
            }
        }
        for t in &self.running {
            if self.finished.contains(t) || self.waiting.contains_key(t) {
                bail!("running thunk {} present in another bucket", t.get_id());
            }
        }
        for t in self.waiting.keys() {
            if self.finished.contains(t) {
                bail!("waiting thunk {} already finished", t.get_id());
            }
        }
        for t in self.cache.keys() {
            if !self.finished.contains(t) {
                bail!("cached thunk {} is not finished", t.get_id());
            }
        }
        for (t, wd) in &self.waiting_data {
            for d in wd {
                if self.finished.contains(d) {
                    bail!(
                        "finished thunk {} still counted as consumer of {}",
                        d.get_id(),
                        t.get_id()
                    );
                }
            }
        }
        for pair in self.ready.windows(2) {
            if self.order_key(&pair[0]) > self.order_key(&pair[1]) {
                bail!("ready sequence out of priority order");
            }
        }
        Ok(())
    }
}

pub type StateRef = SharedCell<ComputeState>;

impl StateRef {
    pub fn new(
        handle: Handle,
        cluster: ClusterRef,
        logger: LoggerRef,
        options: SchedulerOptions,
        root: ThunkRef,
        dag: DagInfo,
        comp_tx: UnboundedSender<Completion>,
        run_hook: RunHook<Result<Payload>>,
    ) -> Self {
        let DagInfo {
            dependents, order, ..
        } = dag;
        let mut state = ComputeState {
            dependents: dependents,
            order: order,
            root: root,
            waiting: HashMap::new(),
            waiting_data: HashMap::new(),
            ready: Vec::new(),
            running: Default::default(),
            finished: Default::default(),
            cache: HashMap::new(),
            thunk_dict: HashMap::new(),
            worker_chans: HashMap::new(),
            halt: false,
            cluster: cluster,
            options: options,
            handle: handle,
            comp_tx: Some(comp_tx),
            run_hook: Some(run_hook),
            logger: logger,
        };

        let thunks: Vec<ThunkRef> = state.dependents.keys().cloned().collect();
        for t in &thunks {
            let consumers = state.dependents[t].clone();
            state.waiting_data.insert(t.clone(), consumers);
        }
        for t in &thunks {
            let inputs: RcSet<ThunkRef> = t.thunk_inputs().into_iter().collect();
            if inputs.is_empty() {
                state.compute_affinity(t);
                state.push_ready(t.clone());
            } else {
                state.waiting.insert(t.clone(), inputs);
            }
        }

        state
            .logger
            .borrow_mut()
            .add_scheduler_init_event(state.cluster.worker_ids(), thunks.len());
        debug!(
            "state loaded: {} thunks, {} initially ready",
            thunks.len(),
            state.ready.len()
        );

        StateRef::wrap(state)
    }

    /// Open the dynamic message endpoints of every worker and start their
    /// listeners.
    pub fn start(&self) {
        let workers = self.get().cluster.worker_ids();
        for wid in workers {
            self.open_worker_channels(wid);
        }
    }

    /// Tear the run down: close dynamic channels and detach the completion
    /// channel so orphaned replies go nowhere.
    pub fn shutdown(&self) {
        let mut s = self.get_mut();
        s.close_channels();
        s.comp_tx = None;
        s.logger.borrow_mut().flush();
    }
}
