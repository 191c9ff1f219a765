use std::collections::HashMap;

use common::id::{ChunkId, WorkerId};
use common::value::Value;
use errors::{ErrorKind, Result};

/// Handle to data residing on a specific worker.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct ChunkRef {
    pub id: ChunkId,
    pub owner: WorkerId,
}

struct ChunkEntry {
    data: Vec<u8>,
    refs: usize,
    persist: bool,
}

/// Per-worker holder of intermediate results. Payloads are kept in
/// serialized form; a released entry may survive in a side cache so a later
/// run can reclaim it without recomputation.
pub struct ChunkStore {
    owner: WorkerId,
    id_counter: ChunkId,
    live: HashMap<ChunkId, ChunkEntry>,
    released: HashMap<ChunkId, Vec<u8>>,
}

impl ChunkStore {
    pub fn new(owner: WorkerId) -> Self {
        ChunkStore {
            owner: owner,
            id_counter: 0,
            live: HashMap::new(),
            released: HashMap::new(),
        }
    }

    /// Encode and register a new chunk with one owning reference.
    /// Returns the ref and the encoded size.
    pub fn put(&mut self, value: &Value, persist: bool) -> Result<(ChunkRef, u64)> {
        let data = ::serde_cbor::to_vec(value)?;
        let size = data.len() as u64;
        self.id_counter += 1;
        let id = self.id_counter;
        self.live.insert(
            id,
            ChunkEntry {
                data: data,
                refs: 1,
                persist: persist,
            },
        );
        Ok((
            ChunkRef {
                id: id,
                owner: self.owner,
            },
            size,
        ))
    }

    pub fn fetch(&self, id: ChunkId) -> Result<Value> {
        let entry = match self.live.get(&id) {
            Some(e) => e,
            None => bail!(ErrorKind::ChunkLost(ChunkRef {
                id: id,
                owner: self.owner,
            })),
        };
        Ok(::serde_cbor::from_slice(&entry.data)?)
    }

    pub fn size_of(&self, id: ChunkId) -> Option<u64> {
        self.live.get(&id).map(|e| e.data.len() as u64)
    }

    /// Drop one reference. A zero-ref entry is removed; with `cache` it is
    /// retained in the released side cache instead. Persistent entries only
    /// go away under `force`.
    pub fn free(&mut self, id: ChunkId, force: bool, cache: bool) {
        if force {
            self.live.remove(&id);
            self.released.remove(&id);
            return;
        }
        let gone = match self.live.get_mut(&id) {
            Some(entry) => {
                if entry.persist {
                    return;
                }
                entry.refs -= 1;
                entry.refs == 0
            }
            None => false,
        };
        if gone {
            let entry = self.live.remove(&id).unwrap();
            if cache {
                self.released.insert(id, entry.data);
            }
        }
    }

    /// Try to reclaim a chunk. A released entry is moved back to the live
    /// table with a fresh owning reference; `None` means the data is gone.
    pub fn unrelease(&mut self, id: ChunkId) -> Option<Value> {
        if let Some(data) = self.released.remove(&id) {
            let value = match ::serde_cbor::from_slice(&data) {
                Ok(v) => v,
                Err(_) => return None,
            };
            self.live.insert(
                id,
                ChunkEntry {
                    data: data,
                    refs: 1,
                    persist: false,
                },
            );
            return Some(value);
        }
        if self.live.contains_key(&id) {
            return self.fetch(id).ok();
        }
        None
    }

    pub fn live_len(&self) -> usize {
        self.live.len()
    }

    pub fn released_len(&self) -> usize {
        self.released.len()
    }

    /// Forget everything. Used when the owning worker dies.
    pub fn clear(&mut self) {
        self.live.clear();
        self.released.clear();
    }
}

#[cfg(test)]
mod tests {
    use common::id::WorkerId;
    use common::value::Value;
    use super::ChunkStore;

    #[test]
    fn put_fetch_roundtrip() {
        let mut store = ChunkStore::new(WorkerId(1));
        let (cref, size) = store.put(&Value::Int(7), false).unwrap();
        assert!(size > 0);
        assert_eq!(cref.owner, WorkerId(1));
        assert_eq!(store.fetch(cref.id).unwrap(), Value::Int(7));
    }

    #[test]
    fn free_with_cache_allows_unrelease() {
        let mut store = ChunkStore::new(WorkerId(1));
        let (cref, _) = store.put(&Value::Str("x".into()), false).unwrap();
        store.free(cref.id, false, true);
        assert_eq!(store.live_len(), 0);
        assert_eq!(store.released_len(), 1);
        assert_eq!(store.unrelease(cref.id), Some(Value::Str("x".into())));
        assert_eq!(store.live_len(), 1);
        assert!(store.fetch(cref.id).is_ok());
    }

    #[test]
    fn free_without_cache_drops() {
        let mut store = ChunkStore::new(WorkerId(1));
        let (cref, _) = store.put(&Value::Int(1), false).unwrap();
        store.free(cref.id, false, false);
        assert_eq!(store.unrelease(cref.id), None);
        assert!(store.fetch(cref.id).is_err());
    }

    #[test]
    fn persist_survives_free() {
        let mut store = ChunkStore::new(WorkerId(1));
        let (cref, _) = store.put(&Value::Int(2), true).unwrap();
        store.free(cref.id, false, false);
        assert_eq!(store.fetch(cref.id).unwrap(), Value::Int(2));
        store.free(cref.id, true, false);
        assert!(store.fetch(cref.id).is_err());
    }
}
