//! Object groups: structural type classes shared by many objects
//!
//! A group records, per property, every type ever written to it. Compiled
//! code trusts these records, which is why property writes must go through
//! a type-update check before they store.

use crate::object::{ObjectClass, ObjectRef, PropertyKey};
use crate::types::TypeSet;
use crate::value::Value;
use heron_vm_gc::{GcThing, Tracer};
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

static NEXT_GROUP_ID: AtomicU64 = AtomicU64::new(1);

/// Stable identity of a group
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(transparent)]
pub struct GroupId(pub u64);

/// Representation of a field in a typed-layout group
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldRepr {
    /// Untyped reference field; `undefined` is its implicit default
    Any,
    /// Object reference field; `null` is its implicit default
    Object,
    /// Scalar field, no implicit value
    Scalar,
}

impl FieldRepr {
    /// Whether `value` is already implied by the field's representation and
    /// need not be recorded in the property's type set
    pub fn implicitly_covers(self, value: &Value) -> bool {
        matches!(
            (self, value),
            (FieldRepr::Any, Value::Undefined) | (FieldRepr::Object, Value::Null)
        )
    }
}

/// Structural type class of a set of objects
pub struct ObjectGroup {
    id: GroupId,
    class: ObjectClass,
    proto: Option<ObjectRef>,
    preliminary: AtomicBool,
    unknown_properties: AtomicBool,
    fields: FxHashMap<PropertyKey, FieldRepr>,
    properties: Mutex<FxHashMap<PropertyKey, TypeSet>>,
}

impl ObjectGroup {
    fn build(
        class: ObjectClass,
        proto: Option<ObjectRef>,
        preliminary: bool,
        fields: FxHashMap<PropertyKey, FieldRepr>,
    ) -> Arc<Self> {
        Arc::new(Self {
            id: GroupId(NEXT_GROUP_ID.fetch_add(1, Ordering::Relaxed)),
            class,
            proto,
            preliminary: AtomicBool::new(preliminary),
            unknown_properties: AtomicBool::new(false),
            fields,
            properties: Mutex::new(FxHashMap::default()),
        })
    }

    /// Create a group for objects of `class`
    pub fn new(class: ObjectClass) -> Arc<Self> {
        Self::build(class, None, false, FxHashMap::default())
    }

    /// Create a group whose objects inherit from `proto`. The prototype of a
    /// group never changes, so a guard on the group also pins the chain.
    pub fn with_proto(class: ObjectClass, proto: ObjectRef) -> Arc<Self> {
        Self::build(class, Some(proto), false, FxHashMap::default())
    }

    /// Create a group whose objects are still being shaped by their
    /// constructor. Caches treat such objects as temporarily unoptimizable.
    pub fn preliminary(class: ObjectClass) -> Arc<Self> {
        Self::build(class, None, true, FxHashMap::default())
    }

    /// Create a plain-object group with a typed field layout
    pub fn with_fields(fields: impl IntoIterator<Item = (PropertyKey, FieldRepr)>) -> Arc<Self> {
        Self::build(ObjectClass::Plain, None, false, fields.into_iter().collect())
    }

    /// Group identity
    pub fn id(&self) -> GroupId {
        self.id
    }

    /// Class of every object in the group
    pub fn class(&self) -> ObjectClass {
        self.class
    }

    /// Prototype shared by every object of the group
    pub fn proto(&self) -> Option<&ObjectRef> {
        self.proto.as_ref()
    }

    /// Whether objects of this group are still being shaped
    pub fn is_preliminary(&self) -> bool {
        self.preliminary.load(Ordering::Acquire)
    }

    /// Objects of this group reached their final shape
    pub fn finish_preliminary(&self) {
        self.preliminary.store(false, Ordering::Release);
    }

    /// Whether property types are no longer tracked
    pub fn has_unknown_properties(&self) -> bool {
        self.unknown_properties.load(Ordering::Acquire)
    }

    /// Stop tracking property types
    pub fn mark_unknown_properties(&self) {
        self.unknown_properties.store(true, Ordering::Release);
        self.properties.lock().clear();
    }

    /// Representation of `key` in a typed layout
    pub fn field_repr(&self, key: &PropertyKey) -> Option<FieldRepr> {
        self.fields.get(key).copied()
    }

    /// Snapshot of the types recorded for `key`
    pub fn property_types(&self, key: &PropertyKey) -> TypeSet {
        if self.has_unknown_properties() {
            return TypeSet::unknown();
        }
        self.properties.lock().get(key).cloned().unwrap_or_default()
    }

    /// Whether `value` is already covered for `key`
    pub fn property_has_value(&self, key: &PropertyKey, value: &Value) -> bool {
        if self.has_unknown_properties() {
            return true;
        }
        self.properties
            .lock()
            .get(key)
            .is_some_and(|types| types.has_value(value))
    }

    /// Record a write of `value` to `key`, returning true when the recorded
    /// types grew
    pub fn add_property_type(&self, key: &PropertyKey, value: &Value) -> bool {
        if self.has_unknown_properties() {
            return false;
        }
        self.properties
            .lock()
            .entry(key.clone())
            .or_default()
            .add_value(value)
    }

    /// Accept any object for `key` from now on
    pub fn mark_property_unknown_object(&self, key: &PropertyKey) -> bool {
        if self.has_unknown_properties() {
            return false;
        }
        self.properties
            .lock()
            .entry(key.clone())
            .or_default()
            .mark_unknown_object()
    }

    /// Report the group itself and its prototype
    pub fn trace(&self, tracer: &mut dyn Tracer) {
        tracer.trace_edge(GcThing::group(self.id.0), "group");
        if let Some(proto) = &self.proto {
            tracer.trace_edge(GcThing::object(proto.id().0), "group-proto");
        }
    }
}

impl fmt::Debug for ObjectGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectGroup")
            .field("id", &self.id.0)
            .field("class", &self.class)
            .field("proto", &self.proto.as_ref().map(|proto| proto.id().0))
            .field("preliminary", &self.is_preliminary())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ValueType;

    #[test]
    fn test_property_types_accumulate() {
        let group = ObjectGroup::new(ObjectClass::Plain);
        let key = PropertyKey::from("x");
        assert!(group.add_property_type(&key, &Value::Int32(1)));
        assert!(!group.add_property_type(&key, &Value::Int32(2)));
        assert!(group.add_property_type(&key, &Value::string("s")));

        let types = group.property_types(&key);
        assert!(types.primitives().contains(ValueType::Int32));
        assert!(types.primitives().contains(ValueType::String));
        assert!(group.property_has_value(&key, &Value::Int32(9)));
        assert!(!group.property_has_value(&key, &Value::Null));
    }

    #[test]
    fn test_unknown_properties_accept_everything() {
        let group = ObjectGroup::new(ObjectClass::Plain);
        let key = PropertyKey::from("x");
        group.add_property_type(&key, &Value::Int32(1));
        group.mark_unknown_properties();
        assert!(group.property_types(&key).is_unknown());
        assert!(!group.add_property_type(&key, &Value::Null));
        assert!(group.property_has_value(&key, &Value::Null));
    }

    #[test]
    fn test_implicit_field_values() {
        assert!(FieldRepr::Any.implicitly_covers(&Value::Undefined));
        assert!(!FieldRepr::Any.implicitly_covers(&Value::Null));
        assert!(FieldRepr::Object.implicitly_covers(&Value::Null));
        assert!(!FieldRepr::Object.implicitly_covers(&Value::Undefined));
        assert!(!FieldRepr::Scalar.implicitly_covers(&Value::Undefined));
    }

    #[test]
    fn test_group_prototype_is_fixed_at_creation() {
        let realm = crate::realm::Realm::new();
        let proto = realm.new_object();
        let group = ObjectGroup::with_proto(ObjectClass::Plain, Arc::clone(&proto));
        assert!(group.proto().is_some_and(|p| Arc::ptr_eq(p, &proto)));
        assert!(ObjectGroup::new(ObjectClass::Plain).proto().is_none());
    }

    #[test]
    fn test_preliminary_flag() {
        let group = ObjectGroup::preliminary(ObjectClass::Plain);
        assert!(group.is_preliminary());
        group.finish_preliminary();
        assert!(!group.is_preliminary());
    }
}
