//! Update chains
//!
//! Before a specialized store writes `value` to `key` on an object of some
//! group, the value is checked against the update chain of that
//! `(group, key)` pair. A miss records the value's type in the group's
//! property types, since compiled code trusts those, and widens the chain.
//!
//! Writes the group's typed layout already implies (`undefined` into an
//! untyped field, `null` into an object field) are not recorded.

use crate::chain::Chain;
use crate::monitor::{TypeChain, TypeChainRole};
use crate::runtime::IcRuntime;
use crate::space::StubSpace;
use crate::stats::IcStats;
use heron_vm_core::{ObjectGroup, PropertyKey, Value};
use std::sync::Arc;

/// Type-update chain of one `(group, property)` pair
#[derive(Debug, Clone)]
pub struct UpdateChain {
    group: Arc<ObjectGroup>,
    key: PropertyKey,
    chain: TypeChain,
}

impl UpdateChain {
    /// Create an empty chain for `key` on objects of `group`
    pub fn new(space: &mut StubSpace, group: Arc<ObjectGroup>, key: PropertyKey) -> Self {
        Self {
            group,
            key,
            chain: TypeChain::new(space, TypeChainRole::Update),
        }
    }

    /// Group whose property is checked
    pub fn group(&self) -> &Arc<ObjectGroup> {
        &self.group
    }

    /// Property checked
    pub fn key(&self) -> &PropertyKey {
        &self.key
    }

    /// Underlying chain
    pub fn chain(&self) -> &Chain {
        self.chain.chain()
    }

    /// Whether some stub's guard accepts `value`
    pub fn accepts(&self, space: &StubSpace, value: &Value) -> bool {
        self.chain.accepts(space, value)
    }

    /// Check a write of `value`. Returns true when an existing guard
    /// accepted it; otherwise runs the update fallback and returns false.
    /// The caller performs the store either way.
    pub fn record_write(
        &mut self,
        runtime: &IcRuntime,
        space: &mut StubSpace,
        stats: &mut IcStats,
        value: &Value,
    ) -> bool {
        if self.chain.accepts(space, value) {
            return true;
        }
        stats.update_fallback_hits += 1;

        if self
            .group
            .field_repr(&self.key)
            .is_some_and(|repr| repr.implicitly_covers(value))
        {
            return false;
        }

        self.group.add_property_type(&self.key, value);
        let mut types = self.group.property_types(&self.key);
        let was_unknown_object = types.is_unknown_object();
        self.chain.refine(runtime, space, stats, &mut types, value);
        if types.is_unknown_object() && !was_unknown_object {
            self.group.mark_property_unknown_object(&self.key);
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use heron_vm_core::{FieldRepr, ValueType};

    fn setup(group: Arc<ObjectGroup>, key: &str) -> (Arc<IcRuntime>, StubSpace, IcStats, UpdateChain) {
        let mut space = StubSpace::new(None);
        let chain = UpdateChain::new(&mut space, group, PropertyKey::from(key));
        (IcRuntime::new(), space, IcStats::default(), chain)
    }

    #[test]
    fn test_first_write_misses_then_hits() {
        let group = ObjectGroup::new(heron_vm_core::ObjectClass::Plain);
        let (runtime, mut space, mut stats, mut chain) = setup(Arc::clone(&group), "x");
        assert!(!chain.record_write(&runtime, &mut space, &mut stats, &Value::Int32(1)));
        assert!(chain.record_write(&runtime, &mut space, &mut stats, &Value::Int32(2)));
        assert!(group.property_types(chain.key()).primitives().contains(ValueType::Int32));
        assert_eq!(stats.update_fallback_hits, 1);
        assert_eq!(stats.update_stubs_attached, 1);
    }

    #[test]
    fn test_implicit_undefined_is_not_recorded() {
        let x = PropertyKey::from("x");
        let group = ObjectGroup::with_fields([(x.clone(), FieldRepr::Any)]);
        let (runtime, mut space, mut stats, mut chain) = setup(Arc::clone(&group), "x");

        assert!(!chain.record_write(&runtime, &mut space, &mut stats, &Value::Undefined));
        assert!(!group.property_types(&x).primitives().contains(ValueType::Undefined));
        assert!(chain.chain().is_fallback_only());

        // `null` is not implied by an untyped field
        assert!(!chain.record_write(&runtime, &mut space, &mut stats, &Value::Null));
        assert!(group.property_types(&x).primitives().contains(ValueType::Null));
        assert!(chain.accepts(&space, &Value::Null));
    }

    #[test]
    fn test_implicit_null_into_object_field() {
        let x = PropertyKey::from("x");
        let group = ObjectGroup::with_fields([(x.clone(), FieldRepr::Object)]);
        let (runtime, mut space, mut stats, mut chain) = setup(Arc::clone(&group), "x");

        assert!(!chain.record_write(&runtime, &mut space, &mut stats, &Value::Null));
        assert!(!group.property_types(&x).primitives().contains(ValueType::Null));
        assert!(!chain.record_write(&runtime, &mut space, &mut stats, &Value::Undefined));
        assert!(group.property_types(&x).primitives().contains(ValueType::Undefined));
    }

    #[test]
    fn test_unknown_properties_accept_anything() {
        let group = ObjectGroup::new(heron_vm_core::ObjectClass::Plain);
        group.mark_unknown_properties();
        let (runtime, mut space, mut stats, mut chain) = setup(group, "x");
        chain.record_write(&runtime, &mut space, &mut stats, &Value::Int32(1));
        assert!(chain.accepts(&space, &Value::string("s")));
        assert_eq!(chain.chain().len(&space), 1);
    }
}
