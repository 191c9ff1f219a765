use common::id::WorkerId;
use worker::chunk::ChunkRef;

// Create the Error, ErrorKind, ResultExt, and Result types
error_chain! {
    types {
        Error, ErrorKind, ResultExt;
    }
    foreign_links {
        Io(::std::io::Error);
        Cbor(::serde_cbor::error::Error);
        Timer(::tokio_timer::TimerError);
    }

    errors {
        WorkerLost(worker: WorkerId) {
            description("worker process exited")
            display("worker {} exited", worker)
        }
        ChunkLost(chunk: ChunkRef) {
            description("chunk vanished with its worker")
            display("chunk {:?} is no longer materializable", chunk)
        }
        SchedulerHalted {
            description("scheduler halted")
            display("scheduler halted")
        }
        ChannelClosed {
            description("dynamic channel closed")
            display("dynamic channel closed")
        }
        NoWorkers {
            description("no live workers")
            display("no live workers remain, cannot make progress")
        }
        UnknownFunction(name: String) {
            description("function not registered")
            display("function {:?} is not registered", name)
        }
    }
}

// Explicit alias just to make the IDEs happier
pub type Result<T> = ::std::result::Result<T, Error>;

impl Error {
    /// Errors the fault handler can recover from without failing the run.
    pub fn is_recoverable(&self) -> bool {
        match *self.kind() {
            ErrorKind::WorkerLost(_) | ErrorKind::ChunkLost(_) => true,
            _ => false,
        }
    }

    pub fn is_halt(&self) -> bool {
        match *self.kind() {
            ErrorKind::SchedulerHalted => true,
            _ => false,
        }
    }
}
