//! Stub chains
//!
//! A chain is a head index into the unit's arena, the fallback that
//! terminates it, and the stub immediately before the fallback. New stubs
//! are inserted at the head, so the newest specialization is tried first.

use crate::error::Result;
use crate::space::{StubId, StubSpace};
use crate::stub::Stub;
use crate::trace::trace_stub;
use heron_vm_gc::Zone;

/// Head, terminator and tail bookkeeping of one stub chain
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Chain {
    head: StubId,
    fallback: StubId,
    last: Option<StubId>,
}

impl Chain {
    /// Allocate `fallback` and create a chain holding only it
    pub fn new(space: &mut StubSpace, fallback: Stub) -> Self {
        let fallback = space.alloc_fallback(fallback);
        Self {
            head: fallback,
            fallback,
            last: None,
        }
    }

    /// First stub tried by a dispatch
    pub fn head(&self) -> StubId {
        self.head
    }

    /// The terminator
    pub fn fallback(&self) -> StubId {
        self.fallback
    }

    /// Optimized stub immediately before the fallback (the oldest one)
    pub fn last(&self) -> Option<StubId> {
        self.last
    }

    /// Whether the chain holds no optimized stub
    pub fn is_fallback_only(&self) -> bool {
        self.head == self.fallback
    }

    /// Optimized stubs in dispatch order
    pub fn stubs(&self, space: &StubSpace) -> Vec<StubId> {
        space
            .walk(self.head)
            .take_while(|id| *id != self.fallback)
            .collect()
    }

    /// Number of optimized stubs
    pub fn len(&self, space: &StubSpace) -> usize {
        space.walk(self.head).take_while(|id| *id != self.fallback).count()
    }

    /// First optimized stub matching `pred`, with its predecessor
    pub fn find(
        &self,
        space: &StubSpace,
        mut pred: impl FnMut(&Stub) -> bool,
    ) -> Option<(Option<StubId>, StubId)> {
        let mut prev = None;
        for id in space.walk(self.head).take_while(|id| *id != self.fallback) {
            if pred(space.get(id)) {
                return Some((prev, id));
            }
            prev = Some(id);
        }
        None
    }

    /// Allocate `stub` and link it at the head
    pub fn insert_head(&mut self, space: &mut StubSpace, stub: Stub) -> Result<StubId> {
        let id = space.alloc(stub, self.head)?;
        if self.is_fallback_only() {
            self.last = Some(id);
        }
        self.head = id;
        self.debug_check(space);
        Ok(id)
    }

    /// Remove `id`, whose predecessor is `prev` (`None` when `id` is the
    /// head).
    ///
    /// The zone's pre-barrier traces the stub before its edge disappears.
    /// The stub keeps its own `next`, so a dispatch that already reached it
    /// continues to the fallback.
    pub fn unlink(&mut self, space: &mut StubSpace, zone: &Zone, prev: Option<StubId>, id: StubId) {
        debug_assert_ne!(id, self.fallback, "the fallback is never unlinked");
        debug_assert_eq!(
            prev.map_or(self.head, |prev| space.next(prev).unwrap_or(self.fallback)),
            id,
            "predecessor does not link to the unlinked stub"
        );

        zone.pre_barrier(|tracer| trace_stub(space.get(id), tracer));

        let next = space.next(id);
        match prev {
            None => self.head = next.unwrap_or(self.fallback),
            Some(prev) => space.set_next(prev, next),
        }
        if self.last == Some(id) {
            self.last = prev;
        }

        tracing::debug!(target: "heron::ic", stub = %id, "unlinked stub");
        self.debug_check(space);
    }

    /// Unlink every optimized stub, returning how many were removed
    pub fn discard_all(&mut self, space: &mut StubSpace, zone: &Zone) -> usize {
        let mut removed = 0;
        while !self.is_fallback_only() {
            self.unlink(space, zone, None, self.head);
            removed += 1;
        }
        removed
    }

    /// Unlink every optimized stub matching `pred`, returning how many were
    /// removed
    pub fn unlink_matching(
        &mut self,
        space: &mut StubSpace,
        zone: &Zone,
        mut pred: impl FnMut(&Stub) -> bool,
    ) -> usize {
        let mut removed = 0;
        let mut prev = None;
        let mut cursor = self.head;
        while cursor != self.fallback {
            let next = space.next(cursor).unwrap_or(self.fallback);
            if pred(space.get(cursor)) {
                self.unlink(space, zone, prev, cursor);
                removed += 1;
            } else {
                prev = Some(cursor);
            }
            cursor = next;
        }
        removed
    }

    fn debug_check(&self, space: &StubSpace) {
        if cfg!(debug_assertions) {
            let walked: Vec<StubId> = space.walk(self.head).take(space.len() + 1).collect();
            debug_assert_eq!(walked.last(), Some(&self.fallback), "chain must end at its fallback");
            debug_assert!(walked.len() <= space.len(), "chain has a cycle");
            let tail = walked.len().checked_sub(2).map(|i| walked[i]);
            debug_assert_eq!(tail, self.last, "stale last-stub bookkeeping");
        }
    }
}
