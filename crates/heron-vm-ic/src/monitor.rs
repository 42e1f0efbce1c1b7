//! Monitor chains
//!
//! A monitor chain watches the results of one site and widens a set of
//! type-guard stubs until every observed value passes one of them:
//!
//! 1. Once the site's types are unknown, a single `AnyValue` stub replaces
//!    everything else.
//! 2. Primitives share one `PrimitiveSet` stub whose bitmask only grows.
//! 3. Objects get a `SingleObject` or `ObjectGroup` stub each, up to the
//!    object-stub cap. Past the cap the site accepts any object and the
//!    object stubs collapse into the `PrimitiveSet` stub's object bit.
//!
//! The same refinement backs update chains, which differ only in the stub
//! kind they attach and in where their type set lives.

use crate::attach::{build_stub, report_attach_failure};
use crate::cache_ir::StubRecipe;
use crate::chain::Chain;
use crate::error::{IcError, Result};
use crate::runtime::IcRuntime;
use crate::space::{StubId, StubSpace};
use crate::stats::IcStats;
use crate::stub::{Stub, TypeGuard};
use heron_vm_bytecode::PcOffset;
use heron_vm_core::{MagicKind, PrimitiveTypeSet, TypeSet, Value, ValueType};
use std::sync::Arc;

/// Which auxiliary chain a `TypeChain` backs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeChainRole {
    /// Result monitoring of an IC entry
    Monitor,
    /// Property-write checks of a `(group, property)` pair
    Update,
}

/// Chain of type-guard stubs ending in a type fallback
#[derive(Debug, Clone, Copy)]
pub struct TypeChain {
    chain: Chain,
    role: TypeChainRole,
}

impl TypeChain {
    /// Create a chain holding only its fallback
    pub fn new(space: &mut StubSpace, role: TypeChainRole) -> Self {
        let fallback = match role {
            TypeChainRole::Monitor => Stub::monitor_fallback(),
            TypeChainRole::Update => Stub::update_fallback(),
        };
        Self {
            chain: Chain::new(space, fallback),
            role,
        }
    }

    /// Underlying chain
    pub fn chain(&self) -> &Chain {
        &self.chain
    }

    /// Whether some stub's guard accepts `value`
    pub fn accepts(&self, space: &StubSpace, value: &Value) -> bool {
        self.chain
            .stubs(space)
            .into_iter()
            .any(|id| space.get(id).kind().type_guard().is_some_and(|guard| guard.accepts(value)))
    }

    fn guards(&self, space: &StubSpace) -> Vec<(StubId, TypeGuard)> {
        self.chain
            .stubs(space)
            .into_iter()
            .filter_map(|id| space.get(id).kind().type_guard().map(|guard| (id, guard.clone())))
            .collect()
    }

    fn recipe(&self, guard: TypeGuard) -> StubRecipe {
        match self.role {
            TypeChainRole::Monitor => StubRecipe::type_monitor(guard),
            TypeChainRole::Update => StubRecipe::type_update(guard),
        }
    }

    fn count_attached(&self, stats: &mut IcStats) {
        match self.role {
            TypeChainRole::Monitor => stats.monitor_stubs_attached += 1,
            TypeChainRole::Update => stats.update_stubs_attached += 1,
        }
    }

    fn attach(&mut self, runtime: &IcRuntime, space: &mut StubSpace, guard: TypeGuard) -> Result<()> {
        let stub = build_stub(runtime, self.recipe(guard))?;
        let id = self.chain.insert_head(space, stub)?;
        tracing::debug!(target: "heron::ic", role = ?self.role, stub = %id, "attached type guard");
        Ok(())
    }

    /// Swap the chain's contents for a single broader guard. The new stub
    /// is built and its space reserved first, so a failure leaves the old
    /// guards in place.
    fn replace_all(&mut self, runtime: &IcRuntime, space: &mut StubSpace, guard: TypeGuard) -> Result<()> {
        let stub = build_stub(runtime, self.recipe(guard))?;
        if space.remaining() == Some(0) {
            return Err(IcError::OutOfMemory { what: "type guard" });
        }
        self.chain.discard_all(space, runtime.zone());
        self.chain.insert_head(space, stub)?;
        Ok(())
    }

    /// Widen the chain so it accepts `value`, given the up-to-date `types`
    /// of the site or property. `types` may itself widen to any object
    /// when the object-stub cap is hit.
    pub fn refine(
        &mut self,
        runtime: &IcRuntime,
        space: &mut StubSpace,
        stats: &mut IcStats,
        types: &mut TypeSet,
        value: &Value,
    ) {
        if matches!(value, Value::Magic(MagicKind::OptimizedOut)) {
            return;
        }
        match self.widen(runtime, space, types, value) {
            Ok(true) => self.count_attached(stats),
            Ok(false) => {}
            Err(err) => report_attach_failure(runtime, stats, PcOffset::NON_OP, &err),
        }
    }

    fn widen(
        &mut self,
        runtime: &IcRuntime,
        space: &mut StubSpace,
        types: &mut TypeSet,
        value: &Value,
    ) -> Result<bool> {
        let guards = self.guards(space);

        if types.is_unknown() {
            if let [(_, TypeGuard::AnyValue)] = guards.as_slice() {
                return Ok(false);
            }
            self.replace_all(runtime, space, TypeGuard::AnyValue)?;
            return Ok(true);
        }

        if guards.iter().any(|(_, guard)| guard.accepts(value)) {
            return Ok(false);
        }

        if let Value::Object(obj) = value {
            if !types.is_unknown_object() {
                let object_stubs = guards.iter().filter(|(_, guard)| guard.is_object_kind()).count();
                if object_stubs < runtime.config().monitor_object_stub_cap {
                    let guard = if obj.is_singleton() {
                        TypeGuard::SingleObject(Arc::clone(obj))
                    } else {
                        TypeGuard::ObjectGroup(Arc::clone(obj.group()))
                    };
                    self.attach(runtime, space, guard)?;
                    return Ok(true);
                }
                types.mark_unknown_object();
            }
        }

        self.widen_primitives(runtime, space, types, &guards, value.value_type())?;
        Ok(true)
    }

    fn widen_primitives(
        &mut self,
        runtime: &IcRuntime,
        space: &mut StubSpace,
        types: &TypeSet,
        guards: &[(StubId, TypeGuard)],
        ty: ValueType,
    ) -> Result<()> {
        debug_assert_ne!(ty, ValueType::Magic);
        let existing = guards
            .iter()
            .find_map(|(id, guard)| guard.primitive_flags().map(|flags| (*id, flags)));
        let mut flags = existing.map_or(PrimitiveTypeSet::EMPTY, |(_, flags)| flags).with(ty);
        if types.is_unknown_object() {
            flags = flags.with(ValueType::Object);
        }

        let has_object_stubs = guards.iter().any(|(_, guard)| guard.is_object_kind());
        if types.is_unknown_object() && has_object_stubs {
            return self.replace_all(runtime, space, TypeGuard::PrimitiveSet(flags));
        }

        match existing {
            Some((id, _)) => {
                let stub = build_stub(runtime, self.recipe(TypeGuard::PrimitiveSet(flags)))?;
                space.replace(id, stub);
                tracing::debug!(target: "heron::ic", role = ?self.role, stub = %id, ?flags, "widened primitive guard");
                Ok(())
            }
            None => self.attach(runtime, space, TypeGuard::PrimitiveSet(flags)),
        }
    }
}

/// Result monitor of one IC entry
#[derive(Debug, Clone)]
pub struct MonitorChain {
    chain: TypeChain,
    types: TypeSet,
}

impl MonitorChain {
    /// Create an empty monitor
    pub fn new(space: &mut StubSpace) -> Self {
        Self {
            chain: TypeChain::new(space, TypeChainRole::Monitor),
            types: TypeSet::new(),
        }
    }

    /// Underlying chain
    pub fn chain(&self) -> &Chain {
        self.chain.chain()
    }

    /// Types observed at the site
    pub fn types(&self) -> &TypeSet {
        &self.types
    }

    /// Whether some stub's guard accepts `value`
    pub fn accepts(&self, space: &StubSpace, value: &Value) -> bool {
        self.chain.accepts(space, value)
    }

    /// Monitor fallback: record `value` in the site's types and widen the
    /// chain to accept it
    pub fn record_result(&mut self, runtime: &IcRuntime, space: &mut StubSpace, stats: &mut IcStats, value: &Value) {
        stats.monitor_fallback_hits += 1;
        self.types.add_value(value);
        self.chain.refine(runtime, space, stats, &mut self.types, value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::IcConfig;
    use heron_vm_core::{ObjectClass, ObjectGroup};

    struct Fixture {
        runtime: Arc<IcRuntime>,
        space: StubSpace,
        stats: IcStats,
        monitor: MonitorChain,
    }

    impl Fixture {
        fn new(config: IcConfig) -> Self {
            let mut space = StubSpace::new(config.stub_space_limit);
            let monitor = MonitorChain::new(&mut space);
            Self {
                runtime: IcRuntime::builder().config(config).build(),
                space,
                stats: IcStats::default(),
                monitor,
            }
        }

        fn record(&mut self, value: &Value) {
            self.monitor
                .record_result(&self.runtime, &mut self.space, &mut self.stats, value);
        }

        fn guards(&self) -> Vec<TypeGuard> {
            self.monitor
                .chain
                .guards(&self.space)
                .into_iter()
                .map(|(_, guard)| guard)
                .collect()
        }
    }

    #[test]
    fn test_int_then_double_share_one_primitive_stub() {
        let mut fx = Fixture::new(IcConfig::default());
        fx.record(&Value::Int32(1));
        fx.record(&Value::Double(1.5));
        let guards = fx.guards();
        assert_eq!(guards.len(), 1);
        let flags = guards[0].primitive_flags().expect("primitive guard");
        assert!(flags.contains(ValueType::Int32));
        assert!(flags.contains(ValueType::Double));
    }

    #[test]
    fn test_repeated_value_is_idempotent() {
        let mut fx = Fixture::new(IcConfig::default());
        let obj = Value::Object(fx.runtime.realm().new_object());
        fx.record(&obj);
        let len = fx.monitor.chain().len(&fx.space);
        fx.record(&obj);
        assert_eq!(fx.monitor.chain().len(&fx.space), len);
        assert_eq!(fx.stats.monitor_stubs_attached, 1);
    }

    #[test]
    fn test_uninitialized_lexical_installs_any_value() {
        let mut fx = Fixture::new(IcConfig::default());
        fx.record(&Value::Int32(1));
        fx.record(&Value::Object(fx.runtime.realm().new_object()));
        fx.record(&Value::Magic(MagicKind::UninitializedLexical));
        assert!(matches!(fx.guards().as_slice(), [TypeGuard::AnyValue]));
        fx.record(&Value::string("anything"));
        assert_eq!(fx.guards().len(), 1);
    }

    #[test]
    fn test_optimized_out_is_ignored() {
        let mut fx = Fixture::new(IcConfig::default());
        fx.record(&Value::Magic(MagicKind::OptimizedOut));
        assert!(fx.guards().is_empty());
        assert!(!fx.monitor.types().is_unknown());
    }

    #[test]
    fn test_object_cap_collapses_into_object_bit() {
        let mut fx = Fixture::new(IcConfig::default().with_max_optimized_stubs(2));
        let objects: Vec<Value> = (0..3)
            .map(|_| {
                let group = ObjectGroup::new(ObjectClass::Plain);
                Value::Object(fx.runtime.realm().new_object_in(&group))
            })
            .collect();
        fx.record(&Value::Int32(1));
        fx.record(&objects[0]);
        fx.record(&objects[1]);
        assert_eq!(fx.guards().iter().filter(|g| g.is_object_kind()).count(), 2);

        fx.record(&objects[2]);
        let guards = fx.guards();
        assert_eq!(guards.len(), 1);
        let flags = guards[0].primitive_flags().expect("collapsed guard");
        assert!(flags.contains(ValueType::Object));
        assert!(flags.contains(ValueType::Int32));
        assert!(fx.monitor.types().is_unknown_object());
        for obj in &objects {
            assert!(fx.monitor.accepts(&fx.space, obj));
        }
    }

    #[test]
    fn test_singletons_are_guarded_by_identity() {
        let mut fx = Fixture::new(IcConfig::default());
        let realm = Arc::clone(fx.runtime.realm());
        let group = ObjectGroup::new(ObjectClass::Plain);
        let a = realm.new_singleton_in(&group);
        let b = realm.new_singleton_in(&group);
        fx.record(&Value::Object(Arc::clone(&a)));
        assert!(matches!(fx.guards().as_slice(), [TypeGuard::SingleObject(_)]));
        assert!(!fx.monitor.accepts(&fx.space, &Value::Object(b)));
    }
}
