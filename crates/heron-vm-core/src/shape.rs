//! Hidden classes (shapes) for property access optimization.
//!
//! A Shape represents the structure of an object: which properties it has
//! and at which slot offsets they live. Objects built the same way share a
//! Shape through the transition tree, so a stub can guard on shape identity
//! and then load a slot at a fixed offset.

use crate::object::PropertyKey;
use heron_vm_gc::{GcThing, Tracer};
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

static NEXT_SHAPE_ID: AtomicU64 = AtomicU64::new(1);

/// Stable identity of a shape
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(transparent)]
pub struct ShapeId(pub u64);

/// A Shape defines the layout of properties in an object.
pub struct Shape {
    id: ShapeId,

    /// The shape this one was transitioned from. None for a root shape.
    parent: Option<Arc<Shape>>,

    /// Property added to the parent to create this shape
    key: Option<PropertyKey>,

    /// Slot offset of `key`
    offset: Option<u32>,

    /// Child shapes per added key. Weak: children own their parent, not
    /// the other way round.
    transitions: Mutex<FxHashMap<PropertyKey, Weak<Shape>>>,

    /// Offsets of every property in this shape (inherited + own)
    property_map: FxHashMap<PropertyKey, u32>,
}

impl Shape {
    /// Create a new root (empty) shape.
    pub fn root() -> Arc<Self> {
        Arc::new(Self {
            id: ShapeId(NEXT_SHAPE_ID.fetch_add(1, Ordering::Relaxed)),
            parent: None,
            key: None,
            offset: None,
            transitions: Mutex::new(FxHashMap::default()),
            property_map: FxHashMap::default(),
        })
    }

    /// Shape identity
    pub fn id(&self) -> ShapeId {
        self.id
    }

    /// Shape this one was derived from
    pub fn parent(&self) -> Option<&Arc<Shape>> {
        self.parent.as_ref()
    }

    /// Property whose addition created this shape
    pub fn last_key(&self) -> Option<&PropertyKey> {
        self.key.as_ref()
    }

    /// Find the transition for `key`, or create it.
    pub fn transition(self: &Arc<Self>, key: PropertyKey) -> Arc<Self> {
        let mut transitions = self.transitions.lock();
        if let Some(shape) = transitions.get(&key).and_then(Weak::upgrade) {
            return shape;
        }

        let next_offset = self.property_map.len() as u32;
        let mut property_map = self.property_map.clone();
        property_map.insert(key.clone(), next_offset);

        let shape = Arc::new(Self {
            id: ShapeId(NEXT_SHAPE_ID.fetch_add(1, Ordering::Relaxed)),
            parent: Some(Arc::clone(self)),
            key: Some(key.clone()),
            offset: Some(next_offset),
            transitions: Mutex::new(FxHashMap::default()),
            property_map,
        });
        transitions.insert(key, Arc::downgrade(&shape));
        shape
    }

    /// Slot offset of `key`
    pub fn offset_of(&self, key: &PropertyKey) -> Option<u32> {
        self.property_map.get(key).copied()
    }

    /// Slot offset of the property this shape added
    pub fn own_offset(&self) -> Option<u32> {
        self.offset
    }

    /// Number of properties (and slots) in this shape
    pub fn property_count(&self) -> usize {
        self.property_map.len()
    }

    /// Report edges for the collector. Transitions are weak and not traced.
    pub fn trace(&self, tracer: &mut dyn Tracer) {
        if let Some(parent) = &self.parent {
            tracer.trace_edge(GcThing::shape(parent.id.0), "shape-parent");
        }
    }
}

impl fmt::Debug for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Shape")
            .field("id", &self.id.0)
            .field("key", &self.key)
            .field("offset", &self.offset)
            .field("property_count", &self.property_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use heron_vm_gc::EdgeRecorder;

    #[test]
    fn test_transitions_are_shared() {
        let root = Shape::root();
        let a = root.transition(PropertyKey::from("x"));
        let b = root.transition(PropertyKey::from("x"));
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(a.id(), b.id());
        assert_ne!(a.id(), root.id());
    }

    #[test]
    fn test_offsets_follow_insertion_order() {
        let root = Shape::root();
        let xy = root
            .transition(PropertyKey::from("x"))
            .transition(PropertyKey::from("y"));
        assert_eq!(xy.offset_of(&PropertyKey::from("x")), Some(0));
        assert_eq!(xy.offset_of(&PropertyKey::from("y")), Some(1));
        assert_eq!(xy.own_offset(), Some(1));
        assert_eq!(xy.property_count(), 2);
        assert_eq!(xy.offset_of(&PropertyKey::from("z")), None);
    }

    #[test]
    fn test_different_order_gives_different_shape() {
        let root = Shape::root();
        let xy = root
            .transition(PropertyKey::from("x"))
            .transition(PropertyKey::from("y"));
        let yx = root
            .transition(PropertyKey::from("y"))
            .transition(PropertyKey::from("x"));
        assert_ne!(xy.id(), yx.id());
    }

    #[test]
    fn test_trace_reports_parent() {
        let root = Shape::root();
        let child = root.transition(PropertyKey::from("x"));
        let mut recorder = EdgeRecorder::new();
        child.trace(&mut recorder);
        assert!(recorder.contains(GcThing::shape(root.id().0)));
        recorder.clear();
        root.trace(&mut recorder);
        assert!(recorder.is_empty());
    }
}
