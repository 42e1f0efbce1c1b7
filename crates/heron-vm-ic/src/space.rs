//! Per-unit stub arena
//!
//! Stubs are appended and never freed while the owning unit lives. A chain
//! links stubs by `StubId`; unlinking only rewires `next` indices, so a
//! dispatch that captured a head before a nested call still walks valid
//! stubs and still reaches the fallback.

use crate::error::{IcError, Result};
use crate::stub::Stub;
use std::fmt;
use std::sync::Arc;

/// Index of a stub inside its unit's arena
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(transparent)]
pub struct StubId(u32);

impl StubId {
    /// Raw arena index
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for StubId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "stub#{}", self.0)
    }
}

struct Slot {
    stub: Arc<Stub>,
    next: Option<StubId>,
}

/// Arena holding every stub of one bytecode unit
pub struct StubSpace {
    slots: Vec<Slot>,
    optimized: usize,
    limit: Option<usize>,
}

impl StubSpace {
    /// Create an arena. `limit` caps the number of optimized stubs;
    /// fallbacks are exempt since every entry needs one.
    pub fn new(limit: Option<usize>) -> Self {
        Self {
            slots: Vec::new(),
            optimized: 0,
            limit,
        }
    }

    fn push(&mut self, stub: Stub, next: Option<StubId>) -> StubId {
        debug_assert!(next.is_none_or(|next| next.index() < self.slots.len()));
        let id = StubId(self.slots.len() as u32);
        self.slots.push(Slot {
            stub: Arc::new(stub),
            next,
        });
        id
    }

    /// Allocate a chain terminator
    pub fn alloc_fallback(&mut self, stub: Stub) -> StubId {
        debug_assert!(stub.is_fallback());
        self.push(stub, None)
    }

    /// Allocate an optimized stub whose successor is `next`
    pub fn alloc(&mut self, stub: Stub, next: StubId) -> Result<StubId> {
        if self.limit.is_some_and(|limit| self.optimized >= limit) {
            return Err(IcError::OutOfMemory { what: "stub" });
        }
        self.optimized += 1;
        Ok(self.push(stub, Some(next)))
    }

    /// Stub at `id`
    pub fn get(&self, id: StubId) -> &Arc<Stub> {
        &self.slots[id.index()].stub
    }

    /// Successor of `id`, `None` for fallbacks
    pub fn next(&self, id: StubId) -> Option<StubId> {
        self.slots[id.index()].next
    }

    pub(crate) fn set_next(&mut self, id: StubId, next: Option<StubId>) {
        self.slots[id.index()].next = next;
    }

    /// Swap in a widened stub under the same id. Dispatches holding the old
    /// `Arc` keep seeing the old guard.
    pub(crate) fn replace(&mut self, id: StubId, stub: Stub) {
        debug_assert!(!stub.is_fallback());
        self.slots[id.index()].stub = Arc::new(stub);
    }

    /// Stubs allocated, fallbacks included
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Whether nothing was allocated
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Optimized stubs allocated, linked or not
    pub fn optimized_count(&self) -> usize {
        self.optimized
    }

    /// Remaining optimized-stub budget, `None` when unbounded
    pub fn remaining(&self) -> Option<usize> {
        self.limit.map(|limit| limit.saturating_sub(self.optimized))
    }

    /// Walk `next` links from `head`, including the terminator
    pub fn walk(&self, head: StubId) -> impl Iterator<Item = StubId> + '_ {
        std::iter::successors(Some(head), move |id| self.next(*id))
    }
}

impl fmt::Debug for StubSpace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StubSpace")
            .field("len", &self.slots.len())
            .field("optimized", &self.optimized)
            .field("limit", &self.limit)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use heron_vm_bytecode::IcKind;

    #[test]
    fn test_limit_applies_to_optimized_only() {
        let mut space = StubSpace::new(Some(0));
        let fallback = space.alloc_fallback(Stub::fallback(IcKind::ToBool));
        let other = space.alloc_fallback(Stub::monitor_fallback());
        assert_eq!(space.len(), 2);
        assert_eq!(space.next(fallback), None);
        assert_eq!(space.next(other), None);
        assert_eq!(space.remaining(), Some(0));
    }

    #[test]
    fn test_walk_reaches_terminator() {
        let mut space = StubSpace::new(None);
        let fallback = space.alloc_fallback(Stub::fallback(IcKind::ToBool));
        assert_eq!(space.walk(fallback).collect::<Vec<_>>(), vec![fallback]);
        assert!(space.get(fallback).is_fallback());
        assert_eq!(fallback.to_string(), "stub#0");
    }
}
