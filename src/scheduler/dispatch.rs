use futures::Future;

use common::value::Value;
use errors::Result;
use graph::thunk::{ThunkInput, ThunkRef};
use worker::registry::TaskContext;
use worker::{DoTask, Payload, TaskArg, WorkerRef};
use super::state::{Completion, StateRef};

impl StateRef {
    /// Offer work to every live worker, one dispatch each.
    pub(super) fn fire_round(&self) -> Result<()> {
        let workers = self.get().cluster.workers();
        for w in workers {
            if !w.is_alive() {
                continue;
            }
            self.fire_ready_on(&w, false)?;
        }
        Ok(())
    }

    /// Keep firing on one worker while dispatches settle synchronously;
    /// stop at the first remote call in flight or when nothing suits the
    /// worker.
    pub(super) fn fire_ready_on(&self, worker: &WorkerRef, immediate_next: bool) -> Result<()> {
        let mut immediate = immediate_next;
        loop {
            let candidate = self.get_mut().pop_ready(worker.get_id(), immediate);
            let tref = match candidate {
                Some(t) => t,
                None => return Ok(()),
            };
            match self.fire_task(&tref, worker)? {
                Some(imm) => immediate = imm,
                None => return Ok(()),
            }
        }
    }

    /// Dispatch one ready thunk. All thunk inputs are in `cache` by the
    /// ready invariant. Returns `Some(immediate_next)` when the thunk
    /// settled synchronously (cache revival or in-scheduler execution),
    /// `None` when a remote call is in flight.
    pub(super) fn fire_task(&self, tref: &ThunkRef, worker: &WorkerRef) -> Result<Option<bool>> {
        let (tid, fname, flags, topts, cache_ref) = {
            let t = tref.get();
            (
                t.id,
                t.fname.clone(),
                t.flags.clone(),
                t.options.clone(),
                t.cache_ref,
            )
        };

        // a previous run may have left the result around
        if flags.cache {
            if let Some(cref) = cache_ref {
                let revived = self.get().cluster.unrelease(&cref);
                match revived {
                    Some(size) => {
                        debug!("thunk {} revived from chunk {:?}", tid, cref);
                        let imm = {
                            let mut s = self.get_mut();
                            s.cache.insert(tref.clone(), Payload::Chunk(cref, size));
                            s.finish_task(tref, false)
                        };
                        return Ok(Some(imm));
                    }
                    None => {
                        tref.get_mut().cache_ref = None;
                    }
                }
            }
        }

        // in-scheduler execution, the result never leaves this process
        if flags.meta {
            let args = self.materialize_values(tref)?;
            let (cluster, registry) = {
                let s = self.get();
                (s.cluster.clone(), s.cluster.registry())
            };
            let mut ctx = TaskContext {
                processor: None,
                cluster: cluster,
                handle: None,
            };
            let fut = {
                let r = registry.borrow();
                r.call(&fname, &mut ctx, args)
            }?;
            // functions fired this way must settle without suspending
            let value = fut.wait()?;
            let imm = {
                let mut s = self.get_mut();
                s.cache.insert(tref.clone(), Payload::Value(value));
                s.finish_task(tref, true)
            };
            return Ok(Some(imm));
        }

        let options = self.get().options.merge(topts.as_ref());
        let mut target = worker.clone();
        if let Some(single) = options.single {
            if target.get_id() != single {
                target = match self.get().cluster.get_worker(single) {
                    Some(w) => w,
                    None => bail!("worker {} requested via `single` is not in the cluster", single),
                };
            }
        }
        let target_id = target.get_id();

        let mut args = Vec::new();
        {
            let s = self.get();
            let t = tref.get();
            for input in t.inputs.iter() {
                match *input {
                    ThunkInput::Value(ref v) => args.push(TaskArg::Value(v.clone())),
                    ThunkInput::Chunk(ref c) => args.push(TaskArg::Chunk(*c)),
                    ThunkInput::Thunk(ref dep) => match s.cache.get(dep) {
                        Some(&Payload::Chunk(ref c, _)) => args.push(TaskArg::Chunk(*c)),
                        Some(&Payload::Value(ref v)) => args.push(TaskArg::Value(v.clone())),
                        None => bail!(
                            "input {} of thunk {} has no cached result",
                            dep.get_id(),
                            tid
                        ),
                    },
                }
            }
        }

        {
            let s = self.get();
            let mut logger = s.logger.borrow_mut();
            for arg in args.iter() {
                if let TaskArg::Chunk(ref c) = *arg {
                    if c.owner != target_id {
                        logger.add_comm_event(tid, c.id, c.owner, target_id);
                    }
                }
            }
            logger.add_compute_started_event(tid, target_id);
        }

        let sch_handle = if flags.dynamic {
            Some(self.make_handle(tid, target_id)?)
        } else {
            None
        };

        let (cluster, handle, comp_tx) = {
            let mut s = self.get_mut();
            let tx = match s.comp_tx {
                Some(ref tx) => tx.clone(),
                None => bail!("dispatch of thunk {} after shutdown", tid),
            };
            s.thunk_dict.insert(tid, tref.clone());
            s.running.insert(tref.clone());
            (s.cluster.clone(), s.handle.clone(), tx)
        };

        debug!("firing thunk {} ({}) on {}", tid, fname, target_id);
        let req = DoTask {
            thunk_id: tid,
            fname: fname,
            args: args,
            get_result: flags.get_result,
            persist: flags.persist,
            cache: flags.cache,
            options: options,
        };
        let fut = target.do_task(&cluster, req, sch_handle).then(move |res| {
            let _ = comp_tx.unbounded_send(Completion {
                from: target_id,
                thunk_id: tid,
                payload: res,
            });
            Ok::<(), ()>(())
        });
        handle.spawn(fut);
        Ok(None)
    }

    /// Inputs as immediate values, for in-scheduler execution.
    fn materialize_values(&self, tref: &ThunkRef) -> Result<Vec<Value>> {
        let s = self.get();
        let t = tref.get();
        let mut out = Vec::with_capacity(t.inputs.len());
        for input in t.inputs.iter() {
            match *input {
                ThunkInput::Value(ref v) => out.push(v.clone()),
                ThunkInput::Chunk(ref c) => out.push(s.cluster.materialize(c)?),
                ThunkInput::Thunk(ref dep) => match s.cache.get(dep) {
                    Some(&Payload::Value(ref v)) => out.push(v.clone()),
                    Some(&Payload::Chunk(ref c, _)) => out.push(s.cluster.materialize(c)?),
                    None => bail!(
                        "input {} of thunk {} has no cached result",
                        dep.get_id(),
                        t.id
                    ),
                },
            }
        }
        Ok(out)
    }
}
