use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use futures::unsync::mpsc::{unbounded, UnboundedReceiver, UnboundedSender};
use futures::{future, Async, Future, Stream};

use common::id::ThunkId;
use common::value::Value;
use common::RcSet;
use errors::{Error, ErrorKind, Result};

/// A control message sent by a running thunk to the scheduler.
#[derive(Clone, Debug)]
pub struct DynRequest {
    pub thunk_id: ThunkId,
    pub cmd: String,
    pub data: Value,
}

/// A scheduler reply delivered on the worker's reply channel.
#[derive(Clone, Debug)]
pub enum DynReply {
    HaltAck,
    DagIds(HashMap<ThunkId, RcSet<ThunkId>>),
}

/// The per-worker endpoint pair of the dynamic message bus. Receivers are
/// shared so that both the listener pump and scheduler handles can reach
/// them, and so that `close` works without tearing the pumps down by hand.
pub struct WorkerChannels {
    pub cmd_tx: UnboundedSender<DynRequest>,
    pub cmd_rx: Rc<RefCell<UnboundedReceiver<DynRequest>>>,
    pub reply_tx: UnboundedSender<DynReply>,
    pub reply_rx: Rc<RefCell<UnboundedReceiver<DynReply>>>,
}

impl WorkerChannels {
    pub fn new() -> Self {
        let (cmd_tx, cmd_rx) = unbounded();
        let (reply_tx, reply_rx) = unbounded();
        WorkerChannels {
            cmd_tx: cmd_tx,
            cmd_rx: Rc::new(RefCell::new(cmd_rx)),
            reply_tx: reply_tx,
            reply_rx: Rc::new(RefCell::new(reply_rx)),
        }
    }

    /// Close both directions. Buffered replies stay readable; any further
    /// send on either side fails.
    pub fn close(&self) {
        self.cmd_rx.borrow_mut().close();
        self.reply_rx.borrow_mut().close();
    }
}

/// Capability handed to dynamic thunks as their scheduler endpoint.
///
/// Clones share the same endpoints; once the scheduler closes them (on
/// halt), `send`/`recv` on every clone fail with `ChannelClosed`.
#[derive(Clone)]
pub struct SchedulerHandle {
    thunk_id: ThunkId,
    cmd_tx: UnboundedSender<DynRequest>,
    reply_rx: Rc<RefCell<UnboundedReceiver<DynReply>>>,
}

impl SchedulerHandle {
    pub fn new(
        thunk_id: ThunkId,
        cmd_tx: UnboundedSender<DynRequest>,
        reply_rx: Rc<RefCell<UnboundedReceiver<DynReply>>>,
    ) -> Self {
        SchedulerHandle {
            thunk_id: thunk_id,
            cmd_tx: cmd_tx,
            reply_rx: reply_rx,
        }
    }

    pub fn thunk_id(&self) -> ThunkId {
        self.thunk_id
    }

    pub fn send(&self, cmd: &str, data: Value) -> Result<()> {
        self.cmd_tx
            .unbounded_send(DynRequest {
                thunk_id: self.thunk_id,
                cmd: cmd.to_string(),
                data: data,
            })
            .map_err(|_| Error::from(ErrorKind::ChannelClosed))
    }

    pub fn recv(&self) -> Box<Future<Item = DynReply, Error = Error>> {
        let rx = self.reply_rx.clone();
        Box::new(future::poll_fn(move || match rx.borrow_mut().poll() {
            Ok(Async::Ready(Some(msg))) => Ok(Async::Ready(msg)),
            Ok(Async::Ready(None)) | Err(()) => Err(ErrorKind::ChannelClosed.into()),
            Ok(Async::NotReady) => Ok(Async::NotReady),
        }))
    }

    /// Ask the scheduler to stop the run. Resolves once the scheduler has
    /// acknowledged the halt.
    pub fn halt(&self) -> Box<Future<Item = (), Error = Error>> {
        if let Err(e) = self.send("halt", Value::Unit) {
            return Box::new(future::err(e));
        }
        let h = self.clone();
        Box::new(future::loop_fn((), move |()| {
            h.recv().map(|msg| match msg {
                DynReply::HaltAck => future::Loop::Break(()),
                _ => future::Loop::Continue(()),
            })
        }))
    }

    /// Fetch the reverse-edge map of the current DAG, keyed by thunk id.
    pub fn get_dag_ids(
        &self,
    ) -> Box<Future<Item = HashMap<ThunkId, RcSet<ThunkId>>, Error = Error>> {
        if let Err(e) = self.send("get_dag_ids", Value::Unit) {
            return Box::new(future::err(e));
        }
        let h = self.clone();
        Box::new(future::loop_fn((), move |()| {
            h.recv().map(|msg| match msg {
                DynReply::DagIds(map) => future::Loop::Break(map),
                _ => future::Loop::Continue(()),
            })
        }))
    }
}

impl super::state::StateRef {
    /// Allocate the channel pair of one worker and start its listener
    /// pump on the reactor.
    pub(super) fn open_worker_channels(&self, worker: ::common::id::WorkerId) {
        let chans = WorkerChannels::new();
        let rx = chans.cmd_rx.clone();
        let state = self.clone();
        let listener = future::poll_fn(move || loop {
            let msg = match rx.borrow_mut().poll() {
                Ok(Async::Ready(Some(m))) => m,
                Ok(Async::Ready(None)) | Err(()) => return Ok(Async::Ready(())),
                Ok(Async::NotReady) => return Ok(Async::NotReady),
            };
            state.handle_dynamic(worker, msg);
        });
        self.get().handle.spawn(listener);
        self.get_mut().worker_chans.insert(worker, chans);
    }

    /// The capability a dynamic thunk receives as its first argument.
    pub(super) fn make_handle(
        &self,
        thunk_id: ThunkId,
        worker: ::common::id::WorkerId,
    ) -> Result<SchedulerHandle> {
        let s = self.get();
        match s.worker_chans.get(&worker) {
            Some(chans) => Ok(SchedulerHandle::new(
                thunk_id,
                chans.cmd_tx.clone(),
                chans.reply_rx.clone(),
            )),
            None => bail!("no dynamic channels for worker {}", worker),
        }
    }

    fn reply(&self, worker: ::common::id::WorkerId, reply: DynReply) {
        let delivered = match self.get().worker_chans.get(&worker) {
            Some(chans) => chans.reply_tx.unbounded_send(reply).is_ok(),
            None => false,
        };
        if !delivered {
            debug!("dropped dynamic reply to {}", worker);
        }
    }

    fn handle_dynamic(&self, worker: ::common::id::WorkerId, msg: DynRequest) {
        debug!(
            "dynamic command {:?} from thunk {} on {}",
            msg.cmd, msg.thunk_id, worker
        );
        match msg.cmd.as_str() {
            "halt" => {
                self.reply(worker, DynReply::HaltAck);
                let mut s = self.get_mut();
                s.halt = true;
                s.resolve(Err(ErrorKind::SchedulerHalted.into()));
                s.close_channels();
            }
            "get_dag_ids" => {
                let map: HashMap<ThunkId, RcSet<ThunkId>> = {
                    let s = self.get();
                    s.dependents
                        .iter()
                        .map(|(t, deps)| {
                            (t.get_id(), deps.iter().map(|d| d.get_id()).collect())
                        })
                        .collect()
                };
                self.reply(worker, DynReply::DagIds(map));
            }
            other => {
                warn!(
                    "unknown dynamic command {:?} from thunk {}, halting",
                    other, msg.thunk_id
                );
                let mut s = self.get_mut();
                s.halt = true;
                s.resolve(Err(ErrorKind::SchedulerHalted.into()));
                s.close_channels();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use futures::{future, Future, Stream};

    use common::value::Value;
    use super::*;

    #[test]
    fn send_reaches_command_channel() {
        let chans = WorkerChannels::new();
        let handle = SchedulerHandle::new(7, chans.cmd_tx.clone(), chans.reply_rx.clone());
        handle.send("get_dag_ids", Value::Unit).unwrap();
        let rx = chans.cmd_rx.clone();
        let msg = future::lazy(move || future::poll_fn(move || rx.borrow_mut().poll()))
            .wait()
            .unwrap()
            .unwrap();
        assert_eq!(msg.thunk_id, 7);
        assert_eq!(msg.cmd, "get_dag_ids");
    }

    #[test]
    fn closed_endpoints_fail_cleanly_on_all_clones() {
        let chans = WorkerChannels::new();
        let handle = SchedulerHandle::new(1, chans.cmd_tx.clone(), chans.reply_rx.clone());
        let clone = handle.clone();
        chans.close();
        assert!(handle.send("halt", Value::Unit).is_err());
        assert!(clone.send("halt", Value::Unit).is_err());
        assert!(clone.recv().wait().is_err());
    }

    #[test]
    fn buffered_reply_readable_after_close() {
        let chans = WorkerChannels::new();
        let handle = SchedulerHandle::new(1, chans.cmd_tx.clone(), chans.reply_rx.clone());
        chans.reply_tx.unbounded_send(DynReply::HaltAck).unwrap();
        chans.close();
        match handle.recv().wait().unwrap() {
            DynReply::HaltAck => (),
            other => panic!("expected HaltAck, got {:?}", other),
        }
        assert!(handle.recv().wait().is_err());
    }
}
