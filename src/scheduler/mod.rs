pub mod dynamics;
pub mod state;

mod dispatch;
mod fault;
mod selector;

#[cfg(test)]
mod tests;

use std::cell::RefCell;
use std::rc::Rc;

use futures::unsync::{mpsc, oneshot};
use futures::Stream;
use tokio_core::reactor::Core;

use common::options::SchedulerOptions;
use common::value::Value;
use errors::{ErrorKind, Result};
use graph::analysis::analyze_dag;
use graph::thunk::ThunkRef;
use logging::{DebugLogger, LoggerRef};
use worker::{ClusterRef, Payload};
use self::state::{Completion, StateRef};

/// Run a DAG to completion and return the root's payload.
///
/// Initializes the compute state from the analyzed graph, opens the
/// dynamic message bus, offers work to every worker and then drains the
/// completion channel until the root result is in, a fatal error
/// surfaces, or a halt is requested.
pub fn compute_dag(
    core: &mut Core,
    cluster: &ClusterRef,
    logger: LoggerRef,
    root: &ThunkRef,
    options: SchedulerOptions,
) -> Result<Payload> {
    if cluster.is_empty() {
        bail!(ErrorKind::NoWorkers);
    }

    let dag = analyze_dag(root);
    let (comp_tx, comp_rx) = mpsc::unbounded();
    let (hook_tx, hook_rx) = oneshot::channel();
    let state = StateRef::new(
        core.handle(),
        cluster.clone(),
        logger,
        options,
        root.clone(),
        dag,
        comp_tx,
        hook_tx,
    );
    state.start();

    if let Err(e) = state.fire_round() {
        state.shutdown();
        return Err(e);
    }
    // graphs that settle synchronously never touch the completion channel
    if state.get().is_done() {
        let result = state.get().root_result();
        state.get_mut().resolve(result);
    }
    state.spawn_pump(comp_rx);

    let result = match core.run(hook_rx) {
        Ok(r) => r,
        Err(_) => Err("scheduler dropped its result hook".into()),
    };
    state.shutdown();
    result
}

impl StateRef {
    fn spawn_pump(&self, comp_rx: mpsc::UnboundedReceiver<Completion>) {
        let state = self.clone();
        let pump = comp_rx.for_each(move |msg| {
            if state.process_completion(msg) {
                Ok(())
            } else {
                Err(())
            }
        });
        self.get().handle.spawn(pump);
    }

    /// One turn of the main loop: handle a completion, fire follow-up
    /// work, settle the run when nothing is left. Returns `false` once
    /// the pump should stop.
    fn process_completion(&self, msg: Completion) -> bool {
        // safepoint
        if self.get().halt {
            let mut s = self.get_mut();
            s.close_channels();
            s.resolve(Err(ErrorKind::SchedulerHalted.into()));
            return false;
        }

        let Completion {
            from,
            thunk_id,
            payload,
        } = msg;
        let tref = match self.get().thunk_dict.get(&thunk_id) {
            Some(t) => t.clone(),
            None => {
                debug!("completion of unknown thunk {}", thunk_id);
                return true;
            }
        };
        if !self.get().running.contains(&tref) {
            debug!("ignoring stale completion of thunk {}", thunk_id);
            return true;
        }

        {
            let s = self.get();
            s.logger.borrow_mut().add_scheduler_turn_event(
                s.ready.len(),
                s.running.len(),
                s.finished.len(),
            );
        }

        match payload {
            Err(e) => {
                {
                    let s = self.get();
                    s.logger
                        .borrow_mut()
                        .add_thunk_failed_event(thunk_id, from, e.to_string());
                }
                let outcome = match *e.kind() {
                    ErrorKind::WorkerLost(w) => self.handle_worker_failure(w, &tref, &e),
                    ErrorKind::ChunkLost(c) => self.handle_chunk_loss(&tref, c, &e),
                    _ => {
                        // the thunk itself raised; surface it to the caller
                        self.get_mut().resolve(Err(e));
                        return false;
                    }
                };
                if let Err(fatal) = outcome {
                    self.get_mut().resolve(Err(fatal));
                    return false;
                }
                if let Err(err) = self.fire_round() {
                    self.get_mut().resolve(Err(err));
                    return false;
                }
            }
            Ok(payload) => {
                let imm = {
                    let mut s = self.get_mut();
                    s.cache.insert(tref.clone(), payload);
                    s.finish_task(&tref, true)
                };
                {
                    let s = self.get();
                    s.logger
                        .borrow_mut()
                        .add_compute_finished_event(thunk_id, from);
                }
                let target = self.get().cluster.get_worker(from);
                if let Some(w) = target {
                    if let Err(err) = self.fire_ready_on(&w, imm) {
                        self.get_mut().resolve(Err(err));
                        return false;
                    }
                }
            }
        }

        // keep in-scheduler waves moving when nothing is in flight
        let stalled = {
            let s = self.get();
            s.running.is_empty() && !s.ready.is_empty()
        };
        if stalled {
            if let Err(err) = self.fire_round() {
                self.get_mut().resolve(Err(err));
                return false;
            }
        }

        self.get().check_invariants_opt().unwrap(); // non-recoverable

        if self.get().is_done() {
            let result = self.get().root_result();
            self.get_mut().resolve(result);
            return false;
        }
        true
    }
}

/// Owner of the reactor, the worker pool and the run-wide options; the
/// front-end's entry point.
pub struct Session {
    core: Core,
    cluster: ClusterRef,
    pub options: SchedulerOptions,
    logger: LoggerRef,
}

impl Session {
    /// A session over `nworkers` in-process workers; 0 means one per CPU.
    pub fn local(nworkers: usize) -> Result<Session> {
        let n = if nworkers == 0 {
            ::num_cpus::get()
        } else {
            nworkers
        };
        let debug_mode = ::std::env::var("SLEET_DEBUG_MODE")
            .map(|s| s == "1")
            .unwrap_or(false);
        if debug_mode {
            state::DEBUG_CHECK_STATE.store(true, ::std::sync::atomic::Ordering::Relaxed);
            info!("DEBUG mode enabled");
        }
        Ok(Session {
            core: Core::new()?,
            cluster: ClusterRef::local(n),
            options: Default::default(),
            logger: Rc::new(RefCell::new(DebugLogger)),
        })
    }

    pub fn cluster(&self) -> &ClusterRef {
        &self.cluster
    }

    pub fn set_logger(&mut self, logger: LoggerRef) {
        self.logger = logger;
    }

    /// Run the graph below `root` and return its payload as the scheduler
    /// sees it: a raw value or a chunk ref.
    pub fn compute_dag(&mut self, root: &ThunkRef) -> Result<Payload> {
        let options = self.options.clone();
        compute_dag(&mut self.core, &self.cluster, self.logger.clone(), root, options)
    }

    /// Run the graph below `root` and materialize the final value.
    pub fn compute(&mut self, root: &ThunkRef) -> Result<Value> {
        match self.compute_dag(root)? {
            Payload::Value(v) => Ok(v),
            Payload::Chunk(c, _) => self.cluster.materialize(&c),
        }
    }
}
