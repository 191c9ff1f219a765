use chrono::{DateTime, Utc};

use common::id::{ChunkId, ThunkId, WorkerId};

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SchedulerInitEvent {
    pub workers: Vec<WorkerId>,
    pub thunks: usize,
}

/// One turn of the main loop: a completion was taken off the channel and
/// processed.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SchedulerTurnEvent {
    pub ready: usize,
    pub running: usize,
    pub finished: usize,
}

/// An input chunk is about to move between workers for a dispatch.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CommEvent {
    pub thunk: ThunkId,
    pub chunk: ChunkId,
    pub from: WorkerId,
    pub to: WorkerId,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ComputeStartedEvent {
    pub thunk: ThunkId,
    pub worker: WorkerId,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ComputeFinishedEvent {
    pub thunk: ThunkId,
    pub worker: WorkerId,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WorkerRemovedEvent {
    pub worker: WorkerId,
    pub error_msg: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ThunkFailedEvent {
    pub thunk: ThunkId,
    pub worker: WorkerId,
    pub error_msg: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum EventKind {
    SchedulerInit(SchedulerInitEvent),
    SchedulerTurn(SchedulerTurnEvent),
    Comm(CommEvent),
    ComputeStarted(ComputeStartedEvent),
    ComputeFinished(ComputeFinishedEvent),
    WorkerRemoved(WorkerRemovedEvent),
    ThunkFailed(ThunkFailedEvent),
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Event {
    pub timestamp: DateTime<Utc>,
    pub event: EventKind,
}

impl Event {
    pub fn now(event: EventKind) -> Self {
        Event {
            timestamp: Utc::now(),
            event: event,
        }
    }

    pub fn event_type(&self) -> &'static str {
        match self.event {
            EventKind::SchedulerInit(_) => "SchedulerInit",
            EventKind::SchedulerTurn(_) => "SchedulerTurn",
            EventKind::Comm(_) => "Comm",
            EventKind::ComputeStarted(_) => "ComputeStarted",
            EventKind::ComputeFinished(_) => "ComputeFinished",
            EventKind::WorkerRemoved(_) => "WorkerRemoved",
            EventKind::ThunkFailed(_) => "ThunkFailed",
        }
    }
}
