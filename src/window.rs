//! Named one-sided window sets.
//!
//! Window `w_r` exists for every rank `r` of the group. On the local rank it
//! exposes either the caller's tensor (`r == self`), a registry-owned receive
//! buffer (`r` is an in-neighbor) or nothing.

use crate::error::{GraphError, Result};
use crate::substrate::WinHandle;
use crate::tensor::Tensor;
use crate::types::Rank;
use std::collections::BTreeMap;

/// What this rank exposes in the window of one rank.
#[derive(Debug, Clone)]
pub struct WindowEntry {
    pub handle: WinHandle,
    /// For the local rank this aliases the caller's tensor.
    pub memory: Option<Tensor>,
}

/// One window per group rank, indexed by rank.
#[derive(Debug, Clone)]
pub struct WindowSet {
    entries: Vec<WindowEntry>,
}

impl WindowSet {
    pub fn new(entries: Vec<WindowEntry>) -> Self {
        Self { entries }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entry(&self, rank: Rank) -> Option<&WindowEntry> {
        self.entries.get(rank as usize)
    }

    pub fn handle(&self, rank: Rank) -> Option<WinHandle> {
        self.entry(rank).map(|e| e.handle)
    }

    /// Receive buffer exposed for `rank`, if any.
    pub fn memory(&self, rank: Rank) -> Option<&Tensor> {
        self.entry(rank).and_then(|e| e.memory.as_ref())
    }

    pub fn handles(&self) -> impl Iterator<Item = WinHandle> + '_ {
        self.entries.iter().map(|e| e.handle)
    }
}

/// Window sets keyed by tensor name. Iteration order is lexical so every
/// rank walks the same sequence when freeing everything.
#[derive(Debug, Default)]
pub struct WindowRegistry {
    windows: BTreeMap<String, WindowSet>,
}

impl WindowRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.windows.contains_key(name)
    }

    /// Fails with `InvalidArgument` if `name` is taken.
    pub fn register(&mut self, name: &str, set: WindowSet) -> Result<()> {
        if self.windows.contains_key(name) {
            return Err(GraphError::InvalidArgument(format!(
                "Win_create failed with {name}: window already registered"
            )));
        }
        self.windows.insert(name.to_string(), set);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Result<&WindowSet> {
        self.windows.get(name).ok_or_else(|| unknown(name))
    }

    pub fn remove(&mut self, name: &str) -> Result<WindowSet> {
        self.windows.remove(name).ok_or_else(|| unknown(name))
    }

    pub fn names(&self) -> Vec<String> {
        self.windows.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.windows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.windows.is_empty()
    }
}

fn unknown(name: &str) -> GraphError {
    GraphError::InvalidArgument(format!("window {name} is not registered"))
}
