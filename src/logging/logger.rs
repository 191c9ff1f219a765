use std::cell::RefCell;
use std::rc::Rc;

use common::id::{ThunkId, WorkerId};
use super::events::*;

pub type LoggerRef = Rc<RefCell<Logger>>;

/// Observer of scheduler events. Implementations decide where events go;
/// the scheduler only brackets the relevant regions.
pub trait Logger {
    fn add_event(&mut self, event: EventKind);

    fn flush(&mut self) {}

    fn add_scheduler_init_event(&mut self, workers: Vec<WorkerId>, thunks: usize) {
        self.add_event(EventKind::SchedulerInit(SchedulerInitEvent {
            workers: workers,
            thunks: thunks,
        }));
    }

    fn add_scheduler_turn_event(&mut self, ready: usize, running: usize, finished: usize) {
        self.add_event(EventKind::SchedulerTurn(SchedulerTurnEvent {
            ready: ready,
            running: running,
            finished: finished,
        }));
    }

    fn add_comm_event(&mut self, thunk: ThunkId, chunk: ::common::id::ChunkId, from: WorkerId, to: WorkerId) {
        self.add_event(EventKind::Comm(CommEvent {
            thunk: thunk,
            chunk: chunk,
            from: from,
            to: to,
        }));
    }

    fn add_compute_started_event(&mut self, thunk: ThunkId, worker: WorkerId) {
        self.add_event(EventKind::ComputeStarted(ComputeStartedEvent {
            thunk: thunk,
            worker: worker,
        }));
    }

    fn add_compute_finished_event(&mut self, thunk: ThunkId, worker: WorkerId) {
        self.add_event(EventKind::ComputeFinished(ComputeFinishedEvent {
            thunk: thunk,
            worker: worker,
        }));
    }

    fn add_worker_removed_event(&mut self, worker: WorkerId, error_msg: String) {
        self.add_event(EventKind::WorkerRemoved(WorkerRemovedEvent {
            worker: worker,
            error_msg: error_msg,
        }));
    }

    fn add_thunk_failed_event(&mut self, thunk: ThunkId, worker: WorkerId, error_msg: String) {
        self.add_event(EventKind::ThunkFailed(ThunkFailedEvent {
            thunk: thunk,
            worker: worker,
            error_msg: error_msg,
        }));
    }
}

/// Default logger: events go to the `log` facade as single-line JSON.
#[derive(Default)]
pub struct DebugLogger;

impl Logger for DebugLogger {
    fn add_event(&mut self, event: EventKind) {
        let e = Event::now(event);
        match ::serde_json::to_string(&e) {
            Ok(s) => debug!("event {}", s),
            Err(err) => warn!("unserializable event {:?}: {}", e, err),
        }
    }
}

/// Captures events in memory. Intended for tests and post-run inspection.
#[derive(Default)]
pub struct MemoryLogger {
    events: Vec<Event>,
}

impl MemoryLogger {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn events(&self) -> &[Event] {
        &self.events
    }

    pub fn count_of(&self, event_type: &str) -> usize {
        self.events
            .iter()
            .filter(|e| e.event_type() == event_type)
            .count()
    }
}

impl Logger for MemoryLogger {
    fn add_event(&mut self, event: EventKind) {
        self.events.push(Event::now(event));
    }
}
