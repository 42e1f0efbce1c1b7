//! Realm: the root shape and default groups new objects are created with

use crate::group::ObjectGroup;
use crate::object::{JsObject, NativeFn, ObjectClass, ObjectRef, PropertyKey};
use crate::shape::Shape;
use crate::value::Value;
use std::sync::Arc;

/// Allocation context for objects
#[derive(Debug)]
pub struct Realm {
    root_shape: Arc<Shape>,
    plain_group: Arc<ObjectGroup>,
    array_group: Arc<ObjectGroup>,
    function_group: Arc<ObjectGroup>,
    iterator_group: Arc<ObjectGroup>,
}

impl Realm {
    /// Create a realm with fresh default groups
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            root_shape: Shape::root(),
            plain_group: ObjectGroup::new(ObjectClass::Plain),
            array_group: ObjectGroup::new(ObjectClass::Array),
            function_group: ObjectGroup::new(ObjectClass::Function),
            iterator_group: ObjectGroup::new(ObjectClass::ArrayIterator),
        })
    }

    /// Empty shape every object starts from
    pub fn root_shape(&self) -> &Arc<Shape> {
        &self.root_shape
    }

    /// Group of `{}` literals
    pub fn plain_group(&self) -> &Arc<ObjectGroup> {
        &self.plain_group
    }

    /// Group of array literals
    pub fn array_group(&self) -> &Arc<ObjectGroup> {
        &self.array_group
    }

    /// New plain object in the default group
    pub fn new_object(&self) -> ObjectRef {
        JsObject::new_plain(Arc::clone(&self.plain_group), Arc::clone(&self.root_shape))
    }

    /// New plain object in `group`
    pub fn new_object_in(&self, group: &Arc<ObjectGroup>) -> ObjectRef {
        JsObject::new_plain(Arc::clone(group), Arc::clone(&self.root_shape))
    }

    /// New singleton object in `group`
    pub fn new_singleton_in(&self, group: &Arc<ObjectGroup>) -> ObjectRef {
        JsObject::new_singleton(Arc::clone(group), Arc::clone(&self.root_shape))
    }

    /// New plain object in the default group with the given properties,
    /// added in order
    pub fn new_object_with(&self, props: &[(&str, Value)]) -> ObjectRef {
        let obj = self.new_object();
        for (name, value) in props {
            obj.set(&PropertyKey::from(*name), value.clone());
        }
        obj
    }

    /// New array
    pub fn new_array(&self, elements: Vec<Value>) -> ObjectRef {
        JsObject::new_array(
            Arc::clone(&self.array_group),
            Arc::clone(&self.root_shape),
            elements,
        )
    }

    /// New native function
    pub fn new_function(&self, name: &str, body: NativeFn) -> ObjectRef {
        JsObject::new_function(
            Arc::clone(&self.function_group),
            Arc::clone(&self.root_shape),
            name,
            body,
        )
    }

    /// New iterator positioned at the start of `target`
    pub fn new_array_iterator(&self, target: &ObjectRef) -> ObjectRef {
        let iter = JsObject::new_iterator(
            Arc::clone(&self.iterator_group),
            Arc::clone(&self.root_shape),
        );
        iter.set(&PropertyKey::from("target"), Value::Object(Arc::clone(target)));
        iter.set(&PropertyKey::from("nextIndex"), Value::Int32(0));
        iter
    }
}
