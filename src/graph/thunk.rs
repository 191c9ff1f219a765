use std::sync::atomic::{AtomicI64, Ordering};

use common::id::{ThunkId, WorkerId};
use common::options::ThunkOptions;
use common::value::Value;
use common::wrapped::SharedCell;
use worker::chunk::ChunkRef;

static THUNK_ID_COUNTER: AtomicI64 = AtomicI64::new(1);

fn new_thunk_id() -> ThunkId {
    THUNK_ID_COUNTER.fetch_add(1, Ordering::Relaxed)
}

/// One input slot of a thunk. Order matters and one object may appear in
/// several slots.
#[derive(Clone, Debug)]
pub enum ThunkInput {
    /// Result of another deferred computation.
    Thunk(ThunkRef),
    /// Data already living on some worker.
    Chunk(ChunkRef),
    /// An immediate value, shipped with the dispatch.
    Value(Value),
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ThunkFlags {
    /// Retain the result in the owning worker's released-chunk cache and
    /// remember the chunk ref for later runs.
    pub cache: bool,
    /// Never evict the result.
    pub persist: bool,
    /// Execute in the scheduler process instead of dispatching remotely.
    pub meta: bool,
    /// The function interacts with the scheduler through a handle.
    pub dynamic: bool,
    /// Return the raw value instead of wrapping it in a chunk.
    pub get_result: bool,
}

/// A node in the DAG: a deferred call of a named function over inputs.
#[derive(Debug)]
pub struct Thunk {
    pub(crate) id: ThunkId,
    pub(crate) fname: String,
    pub(crate) inputs: Vec<ThunkInput>,
    pub(crate) flags: ThunkFlags,
    pub(crate) options: Option<ThunkOptions>,
    /// Last known chunk ref of the result, if `flags.cache` is set.
    pub(crate) cache_ref: Option<ChunkRef>,
    /// Placement hints: (worker, weight) pairs derived from where the
    /// inputs live. Refreshed every time the thunk becomes ready.
    pub(crate) affinity: Vec<(WorkerId, u64)>,
}

pub type ThunkRef = SharedCell<Thunk>;

impl ThunkRef {
    pub fn new(fname: &str, inputs: Vec<ThunkInput>) -> Self {
        Self::with_flags(fname, inputs, Default::default())
    }

    pub fn with_flags(fname: &str, inputs: Vec<ThunkInput>, flags: ThunkFlags) -> Self {
        ThunkRef::wrap(Thunk {
            id: new_thunk_id(),
            fname: fname.to_string(),
            inputs: inputs,
            flags: flags,
            options: None,
            cache_ref: None,
            affinity: Vec::new(),
        })
    }

    pub fn set_options(&self, options: ThunkOptions) {
        self.get_mut().options = Some(options);
    }

    pub fn get_id(&self) -> ThunkId {
        self.get().id
    }

    pub fn cache_ref(&self) -> Option<ChunkRef> {
        self.get().cache_ref
    }

    /// Distinct thunk-typed inputs, in first-occurrence order.
    pub fn thunk_inputs(&self) -> Vec<ThunkRef> {
        let mut out: Vec<ThunkRef> = Vec::new();
        for input in self.get().inputs.iter() {
            if let ThunkInput::Thunk(ref t) = *input {
                if !out.contains(t) {
                    out.push(t.clone());
                }
            }
        }
        out
    }
}
