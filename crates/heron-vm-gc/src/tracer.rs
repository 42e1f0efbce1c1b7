//! Edge reporting

use crate::object::GcThing;
use rustc_hash::FxHashSet;

/// Receives the outgoing edges of a traced cell
pub trait Tracer {
    /// Report one edge. `name` describes the field holding it.
    fn trace_edge(&mut self, thing: GcThing, name: &'static str);
}

/// Tracer that remembers every edge it was handed
#[derive(Debug, Default)]
pub struct EdgeRecorder {
    edges: Vec<(GcThing, &'static str)>,
}

impl EdgeRecorder {
    /// Create an empty recorder
    pub fn new() -> Self {
        Self::default()
    }

    /// All recorded edges in visiting order
    pub fn edges(&self) -> &[(GcThing, &'static str)] {
        &self.edges
    }

    /// Distinct things reached
    pub fn things(&self) -> FxHashSet<GcThing> {
        self.edges.iter().map(|(thing, _)| *thing).collect()
    }

    /// Whether `thing` was reached at least once
    pub fn contains(&self, thing: GcThing) -> bool {
        self.edges.iter().any(|(t, _)| *t == thing)
    }

    /// Number of recorded edges
    pub fn len(&self) -> usize {
        self.edges.len()
    }

    /// True when nothing was traced
    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }

    /// Forget recorded edges
    pub fn clear(&mut self) {
        self.edges.clear();
    }
}

impl Tracer for EdgeRecorder {
    fn trace_edge(&mut self, thing: GcThing, name: &'static str) {
        self.edges.push((thing, name));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recorder_keeps_duplicates_in_order() {
        let mut recorder = EdgeRecorder::new();
        recorder.trace_edge(GcThing::shape(1), "shape");
        recorder.trace_edge(GcThing::code(2), "code");
        recorder.trace_edge(GcThing::shape(1), "shape");

        assert_eq!(recorder.len(), 3);
        assert_eq!(recorder.things().len(), 2);
        assert_eq!(recorder.edges()[1], (GcThing::code(2), "code"));
        assert!(recorder.contains(GcThing::shape(1)));
        assert!(!recorder.contains(GcThing::group(1)));
    }
}
