use common::id::WorkerId;
use common::RcSet;
use errors::{Error, ErrorKind, Result};
use graph::thunk::{ThunkInput, ThunkRef};
use worker::chunk::ChunkRef;
use worker::Payload;
use super::state::StateRef;

impl StateRef {
    /// A dispatch came back with a worker-death signature. Remove the
    /// worker, then re-plan the failed thunk together with everything the
    /// dead worker took with it.
    pub(super) fn handle_worker_failure(
        &self,
        dead: WorkerId,
        failed: &ThunkRef,
        error: &Error,
    ) -> Result<()> {
        warn!(
            "worker {} lost while running thunk {}: {}",
            dead,
            failed.get_id(),
            error
        );
        let cluster = self.get().cluster.clone();
        if cluster.remove_worker(dead).is_some() {
            let logger = self.get().logger.clone();
            logger
                .borrow_mut()
                .add_worker_removed_event(dead, error.to_string());
        }
        if let Some(chans) = self.get_mut().worker_chans.remove(&dead) {
            chans.close();
        }
        if cluster.is_empty() {
            bail!(ErrorKind::NoWorkers);
        }
        self.get_mut().running.remove(failed);
        self.replan(failed)
    }

    /// An input chunk of `failed` vanished although its worker is still
    /// with us. The stale result is dropped from the cache and the thunk
    /// is re-planned together with any ancestors needed to rebuild it.
    pub(super) fn handle_chunk_loss(
        &self,
        failed: &ThunkRef,
        chunk: ChunkRef,
        error: &Error,
    ) -> Result<()> {
        warn!(
            "thunk {} lost input chunk {:?}, re-planning: {}",
            failed.get_id(),
            chunk,
            error
        );
        {
            let mut s = self.get_mut();
            let producers: Vec<ThunkRef> = s
                .cache
                .iter()
                .filter(|&(_, payload)| match *payload {
                    Payload::Chunk(ref c, _) => *c == chunk,
                    Payload::Value(_) => false,
                })
                .map(|(t, _)| t.clone())
                .collect();
            for t in producers {
                s.cache.remove(&t);
            }
            s.running.remove(failed);
        }
        self.replan(failed)
    }

    /// Re-plan after data loss. Drops cache entries and cache refs that
    /// pointed at dead workers, then walks the demand of the unfinished
    /// frontier (plus the failed thunk): any demanded result that is not
    /// cached and not already planned is moved back from `finished` into
    /// `waiting`/`ready`, with its bookkeeping rebuilt from `dependents`.
    fn replan(&self, failed: &ThunkRef) -> Result<()> {
        let mut s = self.get_mut();
        let cluster = s.cluster.clone();
        let live: RcSet<WorkerId> = cluster.worker_ids().into_iter().collect();

        // refs into dead workers cannot be revived any more
        let thunks: Vec<ThunkRef> = s.dependents.keys().cloned().collect();
        for t in &thunks {
            let stale = t
                .get()
                .cache_ref
                .map_or(false, |c| !live.contains(&c.owner));
            if stale {
                t.get_mut().cache_ref = None;
            }
        }

        // results that resided on dead workers
        let lost: Vec<ThunkRef> = s
            .cache
            .iter()
            .filter(|&(_, payload)| match *payload {
                Payload::Chunk(ref c, _) => !live.contains(&c.owner),
                Payload::Value(_) => false,
            })
            .map(|(t, _)| t.clone())
            .collect();
        for t in &lost {
            s.cache.remove(t);
        }

        // demand walk: everything unfinished pulls on its inputs
        let mut stack: Vec<ThunkRef> = vec![failed.clone()];
        {
            let frontier: Vec<ThunkRef> = s
                .waiting
                .keys()
                .cloned()
                .chain(s.ready.iter().cloned())
                .chain(s.running.iter().cloned())
                .collect();
            for t in frontier {
                stack.extend(t.thunk_inputs());
            }
        }

        let mut rerun: RcSet<ThunkRef> = Default::default();
        while let Some(t) = stack.pop() {
            if rerun.contains(&t) || s.cache.contains_key(&t) || s.running.contains(&t)
                || s.waiting.contains_key(&t) || s.ready.contains(&t)
            {
                continue;
            }
            // a raw chunk input has no producer to re-run
            for input in t.get().inputs.iter() {
                if let ThunkInput::Chunk(ref c) = *input {
                    let available = cluster
                        .get_worker(c.owner)
                        .map_or(false, |w| w.get().store.size_of(c.id).is_some());
                    if !available {
                        bail!(ErrorKind::ChunkLost(*c));
                    }
                }
            }
            stack.extend(t.thunk_inputs());
            rerun.insert(t);
        }

        info!(
            "re-planning {} thunks after losing {} results",
            rerun.len(),
            lost.len()
        );

        for t in &rerun {
            s.finished.remove(t);
            s.cache.remove(t);
        }

        let mut batch: Vec<ThunkRef> = rerun.iter().cloned().collect();
        batch.sort_by(|a, b| s.order_key(a).cmp(&s.order_key(b)));

        // consumers that saw these results as satisfied must wait again
        for x in &batch {
            let consumers: Vec<ThunkRef> = s.dependents[x].iter().cloned().collect();
            for d in consumers {
                if s.finished.contains(&d) || s.running.contains(&d) || rerun.contains(&d) {
                    continue;
                }
                if let Some(pos) = s.ready.iter().position(|r| *r == d) {
                    s.ready.remove(pos);
                }
                s.waiting
                    .entry(d.clone())
                    .or_insert_with(Default::default)
                    .insert(x.clone());
            }
        }

        // rebuild the books of the re-planned set
        for t in &batch {
            let pending: RcSet<ThunkRef> = t
                .thunk_inputs()
                .into_iter()
                .filter(|i| !s.cache.contains_key(i))
                .collect();
            if pending.is_empty() {
                s.compute_affinity(t);
                s.push_ready(t.clone());
            } else {
                s.waiting.insert(t.clone(), pending);
            }
        }
        for t in &batch {
            let consumers: RcSet<ThunkRef> = s.dependents[t]
                .iter()
                .filter(|d| !s.finished.contains(*d))
                .cloned()
                .collect();
            s.waiting_data.insert(t.clone(), consumers);
            for i in t.thunk_inputs() {
                s.waiting_data
                    .entry(i)
                    .or_insert_with(Default::default)
                    .insert(t.clone());
            }
        }

        Ok(())
    }
}
