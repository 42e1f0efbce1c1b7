//! Removal barrier for incremental marking
//!
//! While an incremental mark is in progress the collector has already
//! scanned part of the heap. If the mutator removes an edge from a cell the
//! collector has not reached yet, the target could be missed. Before any
//! such removal the owner traces the cell once more into the zone's
//! barrier tracer (snapshot-at-the-beginning, Yuasa style).

use crate::object::{GcThing, MarkColor};
use crate::oom::OomReporter;
use crate::tracer::Tracer;
use parking_lot::{Mutex, MutexGuard};
use rustc_hash::FxHashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Tracer that grays everything handed to it during an incremental mark
#[derive(Debug, Default)]
pub struct BarrierTracer {
    /// Mark state of every thing reached through the barrier
    marks: FxHashMap<GcThing, MarkColor>,
    /// Gray things waiting to be scanned by the collector
    gray: Vec<GcThing>,
}

impl BarrierTracer {
    /// Create an empty barrier tracer
    pub fn new() -> Self {
        Self::default()
    }

    /// Color of `thing`, white when it was never reached
    pub fn color(&self, thing: GcThing) -> MarkColor {
        self.marks.get(&thing).copied().unwrap_or_default()
    }

    /// Whether `thing` was reached through the barrier
    pub fn is_marked(&self, thing: GcThing) -> bool {
        self.color(thing) != MarkColor::White
    }

    /// Hand all gray things to the collector, blackening them
    pub fn drain_gray(&mut self) -> Vec<GcThing> {
        let drained = std::mem::take(&mut self.gray);
        for thing in &drained {
            self.marks.insert(*thing, MarkColor::Black);
        }
        drained
    }

    /// Number of things reached
    pub fn len(&self) -> usize {
        self.marks.len()
    }

    /// True when nothing was reached
    pub fn is_empty(&self) -> bool {
        self.marks.is_empty()
    }

    fn reset(&mut self) {
        self.marks.clear();
        self.gray.clear();
    }
}

impl Tracer for BarrierTracer {
    fn trace_edge(&mut self, thing: GcThing, _name: &'static str) {
        // Dijkstra-style shading: only white things turn gray
        if self.color(thing) == MarkColor::White {
            self.marks.insert(thing, MarkColor::Gray);
            self.gray.push(thing);
        }
    }
}

/// Heap zone an IC engine allocates its stubs against
#[derive(Debug, Default)]
pub struct Zone {
    incremental: AtomicBool,
    barrier: Mutex<BarrierTracer>,
    oom: OomReporter,
}

impl Zone {
    /// Create a zone with no mark in progress
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Whether removed edges must be traced before removal
    pub fn needs_incremental_barrier(&self) -> bool {
        self.incremental.load(Ordering::Acquire)
    }

    /// Start an incremental mark. Barrier state from a previous mark is dropped.
    pub fn begin_incremental_mark(&self) {
        self.barrier.lock().reset();
        self.incremental.store(true, Ordering::Release);

        #[cfg(feature = "gc_logging")]
        tracing::debug!(target: "heron::gc", "incremental mark started");
    }

    /// Finish the incremental mark and return every thing the barrier kept alive
    pub fn finish_incremental_mark(&self) -> Vec<GcThing> {
        self.incremental.store(false, Ordering::Release);
        let mut barrier = self.barrier.lock();
        let mut kept: Vec<GcThing> = barrier.marks.keys().copied().collect();
        kept.sort_unstable();
        barrier.reset();

        #[cfg(feature = "gc_logging")]
        tracing::debug!(target: "heron::gc", kept = kept.len(), "incremental mark finished");

        kept
    }

    /// Run `trace` against the barrier tracer if a mark is in progress.
    ///
    /// Returns true when the barrier fired. Callers invoke this immediately
    /// before removing the edges `trace` reports.
    pub fn pre_barrier(&self, trace: impl FnOnce(&mut dyn Tracer)) -> bool {
        if !self.needs_incremental_barrier() {
            return false;
        }
        let mut barrier = self.barrier.lock();
        trace(&mut *barrier);
        true
    }

    /// Direct access to the barrier tracer (for collectors and tests)
    pub fn barrier_tracer(&self) -> MutexGuard<'_, BarrierTracer> {
        self.barrier.lock()
    }

    /// Out-of-memory sink for this zone
    pub fn oom(&self) -> &OomReporter {
        &self.oom
    }
}
