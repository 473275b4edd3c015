use crate::frame::Traceback;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// One live allocation: its byte size and the traceback that produced it.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Trace {
    pub size: u64,
    pub traceback: Traceback,
}

/// `address -> Trace` for every currently-live allocation the tracer knows
/// about. Insert/lookup/remove are expected O(1) (backed by `HashMap`).
#[derive(Default)]
pub struct AllocationTable {
    live: HashMap<usize, Trace>,
}

impl AllocationTable {
    pub fn new() -> Self {
        AllocationTable { live: HashMap::new() }
    }

    pub fn len(&self) -> usize {
        self.live.len()
    }

    pub fn is_empty(&self) -> bool {
        self.live.is_empty()
    }

    pub fn get(&self, address: usize) -> Option<&Trace> {
        self.live.get(&address)
    }

    /// Record a new allocation at `address`, returning the previous trace at
    /// that address if the allocator reused it without an observed free.
    pub fn insert(&mut self, address: usize, trace: Trace) -> Option<Trace> {
        self.live.insert(address, trace)
    }

    /// Remove the allocation at `address`. Idempotent: removing an unknown
    /// address is a no-op, returning `None`.
    pub fn remove(&mut self, address: usize) -> Option<Trace> {
        self.live.remove(&address)
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, &Trace)> {
        self.live.iter().map(|(addr, trace)| (*addr, trace))
    }

    pub fn clear(&mut self) {
        self.live.clear();
    }

    pub fn total_size(&self) -> u64 {
        self.live.values().map(|t| t.size).sum()
    }
}
