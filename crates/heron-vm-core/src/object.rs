//! Heap objects

use crate::error::{VmError, VmResult};
use crate::group::ObjectGroup;
use crate::shape::Shape;
use crate::value::Value;
use heron_vm_gc::{GcThing, Tracer};
use parking_lot::RwLock;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};

static NEXT_OBJECT_ID: AtomicU64 = AtomicU64::new(1);

/// Property name
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PropertyKey(Arc<str>);

impl PropertyKey {
    /// Create a key
    pub fn new(name: &str) -> Self {
        Self(Arc::from(name))
    }

    /// Key text
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Canonical array index this key names, if any
    pub fn array_index(&self) -> Option<u32> {
        let s = self.as_str();
        if s.is_empty() || (s.len() > 1 && s.starts_with('0')) {
            return None;
        }
        s.parse::<u32>().ok().filter(|index| *index != u32::MAX)
    }
}

impl From<&str> for PropertyKey {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

impl fmt::Debug for PropertyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", &*self.0)
    }
}

impl fmt::Display for PropertyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Stable identity of an object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(transparent)]
pub struct ObjectId(pub u64);

/// Object class
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObjectClass {
    /// Ordinary object
    Plain,
    /// Array with dense elements
    Array,
    /// Callable native function
    Function,
    /// Iterator over an array
    ArrayIterator,
}

/// Native function body: `(this, args) -> result`
pub type NativeFn = Arc<dyn Fn(&Value, &[Value]) -> VmResult<Value> + Send + Sync>;

struct NativeFunction {
    name: Arc<str>,
    body: NativeFn,
    active_calls: AtomicU32,
}

/// Reference-counted object handle
pub type ObjectRef = Arc<JsObject>;

/// A heap object
pub struct JsObject {
    id: ObjectId,
    class: ObjectClass,
    group: Arc<ObjectGroup>,
    singleton: bool,
    extensible: AtomicBool,
    shape: RwLock<Arc<Shape>>,
    slots: RwLock<Vec<Value>>,
    elements: RwLock<Vec<Value>>,
    function: Option<NativeFunction>,
}

/// Decrements the active-call counter when a native call unwinds
struct ActiveCall<'a>(&'a AtomicU32);

impl Drop for ActiveCall<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

impl JsObject {
    fn alloc(
        class: ObjectClass,
        group: Arc<ObjectGroup>,
        shape: Arc<Shape>,
        singleton: bool,
        elements: Vec<Value>,
        function: Option<NativeFunction>,
    ) -> ObjectRef {
        Arc::new(Self {
            id: ObjectId(NEXT_OBJECT_ID.fetch_add(1, Ordering::Relaxed)),
            class,
            group,
            singleton,
            extensible: AtomicBool::new(true),
            shape: RwLock::new(shape),
            slots: RwLock::new(Vec::new()),
            elements: RwLock::new(elements),
            function,
        })
    }

    /// Create an ordinary object sharing `group`
    pub fn new_plain(group: Arc<ObjectGroup>, root: Arc<Shape>) -> ObjectRef {
        Self::alloc(ObjectClass::Plain, group, root, false, Vec::new(), None)
    }

    /// Create an ordinary object tracked by identity
    pub fn new_singleton(group: Arc<ObjectGroup>, root: Arc<Shape>) -> ObjectRef {
        Self::alloc(ObjectClass::Plain, group, root, true, Vec::new(), None)
    }

    /// Create an array with the given dense elements
    pub fn new_array(group: Arc<ObjectGroup>, root: Arc<Shape>, elements: Vec<Value>) -> ObjectRef {
        Self::alloc(ObjectClass::Array, group, root, false, elements, None)
    }

    /// Create a native function. Functions are tracked by identity.
    pub fn new_function(
        group: Arc<ObjectGroup>,
        root: Arc<Shape>,
        name: &str,
        body: NativeFn,
    ) -> ObjectRef {
        let function = NativeFunction {
            name: Arc::from(name),
            body,
            active_calls: AtomicU32::new(0),
        };
        Self::alloc(ObjectClass::Function, group, root, true, Vec::new(), Some(function))
    }

    /// Create an iterator object of class `ArrayIterator`
    pub fn new_iterator(group: Arc<ObjectGroup>, root: Arc<Shape>) -> ObjectRef {
        Self::alloc(ObjectClass::ArrayIterator, group, root, false, Vec::new(), None)
    }

    /// Object identity
    pub fn id(&self) -> ObjectId {
        self.id
    }

    /// Object class
    pub fn class(&self) -> ObjectClass {
        self.class
    }

    /// Object group
    pub fn group(&self) -> &Arc<ObjectGroup> {
        &self.group
    }

    /// Whether type sets track this object by identity
    pub fn is_singleton(&self) -> bool {
        self.singleton
    }

    /// Current shape
    pub fn shape(&self) -> Arc<Shape> {
        Arc::clone(&self.shape.read())
    }

    /// Whether new properties may be added
    pub fn is_extensible(&self) -> bool {
        self.extensible.load(Ordering::Acquire)
    }

    /// Forbid adding properties
    pub fn prevent_extensions(&self) {
        self.extensible.store(false, Ordering::Release);
    }

    /// Read slot `offset`
    pub fn slot(&self, offset: u32) -> Value {
        self.slots
            .read()
            .get(offset as usize)
            .cloned()
            .unwrap_or(Value::Undefined)
    }

    /// Overwrite slot `offset`
    pub fn set_slot(&self, offset: u32, value: Value) {
        if let Some(slot) = self.slots.write().get_mut(offset as usize) {
            *slot = value;
        }
    }

    /// Own named property
    pub fn get_own(&self, key: &PropertyKey) -> Option<Value> {
        let offset = self.shape.read().offset_of(key)?;
        Some(self.slot(offset))
    }

    /// Whether `key` is an own named property
    pub fn has_own(&self, key: &PropertyKey) -> bool {
        self.shape.read().offset_of(key).is_some()
    }

    /// Write a named property, adding it when missing.
    ///
    /// Returns false when the property is missing and the object is not
    /// extensible.
    pub fn set(&self, key: &PropertyKey, value: Value) -> bool {
        let mut shape = self.shape.write();
        if let Some(offset) = shape.offset_of(key) {
            drop(shape);
            self.set_slot(offset, value);
            return true;
        }
        if !self.is_extensible() {
            return false;
        }
        let next = shape.transition(key.clone());
        self.slots.write().push(value);
        *shape = next;
        true
    }

    /// Add a property by switching from `expected` to `next`, the way an
    /// add-slot stub does. Returns false when the current shape is not
    /// `expected`.
    pub fn add_slot(&self, expected: &Arc<Shape>, next: &Arc<Shape>, value: Value) -> bool {
        let mut shape = self.shape.write();
        if !Arc::ptr_eq(&*shape, expected) || !self.is_extensible() {
            return false;
        }
        debug_assert!(next.parent().is_some_and(|parent| Arc::ptr_eq(parent, expected)));
        self.slots.write().push(value);
        *shape = Arc::clone(next);
        true
    }

    /// Number of dense elements
    pub fn elements_len(&self) -> usize {
        self.elements.read().len()
    }

    /// Dense element at `index`
    pub fn element(&self, index: usize) -> Option<Value> {
        self.elements.read().get(index).cloned()
    }

    /// Write a dense element. Writing one past the end appends; writing
    /// further out pads with `undefined`.
    pub fn set_element(&self, index: usize, value: Value) {
        let mut elements = self.elements.write();
        if index >= elements.len() {
            elements.resize(index + 1, Value::Undefined);
        }
        elements[index] = value;
    }

    /// Truncate or pad the dense elements to `len`
    pub fn set_elements_len(&self, len: usize) {
        self.elements.write().resize(len, Value::Undefined);
    }

    /// Snapshot of the dense elements
    pub fn elements(&self) -> Vec<Value> {
        self.elements.read().clone()
    }

    /// Whether the object can be called
    pub fn is_callable(&self) -> bool {
        self.function.is_some()
    }

    /// Function name, for diagnostics
    pub fn function_name(&self) -> Option<&str> {
        self.function.as_ref().map(|f| &*f.name)
    }

    /// Number of calls to this function currently on the stack
    pub fn active_calls(&self) -> u32 {
        self.function
            .as_ref()
            .map_or(0, |f| f.active_calls.load(Ordering::Acquire))
    }

    /// Call the object as a function
    pub fn call(&self, this: &Value, args: &[Value]) -> VmResult<Value> {
        let function = self.function.as_ref().ok_or_else(|| {
            VmError::type_error(format!("object #{} is not a function", self.id.0))
        })?;
        function.active_calls.fetch_add(1, Ordering::AcqRel);
        let _active = ActiveCall(&function.active_calls);
        (function.body)(this, args)
    }

    /// Report edges for the collector
    pub fn trace(&self, tracer: &mut dyn Tracer) {
        tracer.trace_edge(GcThing::shape(self.shape.read().id().0), "object-shape");
        tracer.trace_edge(GcThing::group(self.group.id().0), "object-group");
        for value in self.slots.read().iter().chain(self.elements.read().iter()) {
            if let Value::Object(obj) = value {
                tracer.trace_edge(GcThing::object(obj.id.0), "object-slot");
            }
        }
    }
}

impl fmt::Debug for JsObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JsObject")
            .field("id", &self.id.0)
            .field("class", &self.class)
            .field("group", &self.group.id().0)
            .field("singleton", &self.singleton)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plain() -> ObjectRef {
        JsObject::new_plain(ObjectGroup::new(ObjectClass::Plain), Shape::root())
    }

    #[test]
    fn test_set_transitions_shape() {
        let obj = plain();
        let before = obj.shape();
        assert!(obj.set(&PropertyKey::from("x"), Value::Int32(1)));
        let after = obj.shape();
        assert_ne!(before.id(), after.id());
        assert!(obj.set(&PropertyKey::from("x"), Value::Int32(2)));
        assert_eq!(obj.shape().id(), after.id());
        assert!(matches!(obj.get_own(&PropertyKey::from("x")), Some(Value::Int32(2))));
    }

    #[test]
    fn test_non_extensible_rejects_new_properties() {
        let obj = plain();
        obj.set(&PropertyKey::from("x"), Value::Int32(1));
        obj.prevent_extensions();
        assert!(!obj.set(&PropertyKey::from("y"), Value::Int32(1)));
        assert!(obj.set(&PropertyKey::from("x"), Value::Int32(5)));
        assert!(!obj.has_own(&PropertyKey::from("y")));
    }

    #[test]
    fn test_add_slot_checks_expected_shape() {
        let obj = plain();
        let root = obj.shape();
        let next = root.transition(PropertyKey::from("x"));
        assert!(obj.add_slot(&root, &next, Value::Boolean(true)));
        assert!(!obj.add_slot(&root, &next, Value::Boolean(false)));
        assert!(matches!(obj.get_own(&PropertyKey::from("x")), Some(Value::Boolean(true))));
    }

    #[test]
    fn test_active_calls_unwind_on_error() {
        let group = ObjectGroup::new(ObjectClass::Function);
        let f = JsObject::new_function(
            group,
            Shape::root(),
            "thrower",
            Arc::new(|_, _| Err(VmError::Thrown("boom".into()))),
        );
        assert!(f.call(&Value::Undefined, &[]).is_err());
        assert_eq!(f.active_calls(), 0);
        assert!(f.is_singleton());
    }

    #[test]
    fn test_array_index_keys() {
        assert_eq!(PropertyKey::from("0").array_index(), Some(0));
        assert_eq!(PropertyKey::from("42").array_index(), Some(42));
        assert_eq!(PropertyKey::from("042").array_index(), None);
        assert_eq!(PropertyKey::from("-1").array_index(), None);
        assert_eq!(PropertyKey::from("length").array_index(), None);
    }
}
