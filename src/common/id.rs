use std::fmt;

/// Generic ID type. Negative values have special meaning.
pub type Id = i64;

/// ID of a thunk, unique within a process.
pub type ThunkId = Id;

/// ID of a chunk, unique within its owning worker.
pub type ChunkId = Id;

/// Identifies a worker by the OS process id it runs as.
#[derive(Copy, Clone, Debug, Ord, PartialOrd, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct WorkerId(pub u32);

impl WorkerId {
    #[inline]
    pub fn pid(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "worker-{}", self.0)
    }
}

/// Kind of a processor unit inside a worker. The scheduler only ever picks
/// the host; picking among the host's units is worker-side business.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum ProcKind {
    Cpu,
    Gpu,
}

/// A concrete processor unit within a worker.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct ProcUnit {
    pub owner: WorkerId,
    pub index: u32,
    pub kind: ProcKind,
}

impl fmt::Display for ProcUnit {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}/{:?}{}", self.owner, self.kind, self.index)
    }
}
