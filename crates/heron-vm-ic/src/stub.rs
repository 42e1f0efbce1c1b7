//! Stubs: one guard plus handler, or a chain's fallback

use crate::cache_ir::{CacheIrOp, TypeGuardKind};
use crate::code_cache::CompiledCode;
use heron_vm_bytecode::IcKind;
use heron_vm_core::{
    ObjectClass, ObjectGroup, ObjectRef, PrimitiveTypeSet, PropertyKey, Shape, Value, ValueType,
};
use std::fmt;
use std::sync::Arc;

/// How a main-chain stub interacts with the auxiliary chains
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StubFlavor {
    /// Result returned as is
    Regular,
    /// Result routed through the entry's monitor chain
    Monitored,
    /// Stored value checked against the update chain before the store
    Updated,
}

/// Type guard of a monitor or update stub
#[derive(Clone)]
pub enum TypeGuard {
    /// Any primitive whose kind is in the set. The `Object` bit accepts any
    /// object.
    PrimitiveSet(PrimitiveTypeSet),
    /// Exactly this object
    SingleObject(ObjectRef),
    /// Any object of this group
    ObjectGroup(Arc<ObjectGroup>),
    /// Everything
    AnyValue,
}

impl TypeGuard {
    /// Whether `value` passes the guard
    pub fn accepts(&self, value: &Value) -> bool {
        match (self, value) {
            (TypeGuard::AnyValue, _) => true,
            (_, Value::Magic(_)) => false,
            (TypeGuard::PrimitiveSet(flags), value) => flags.accepts(value),
            (TypeGuard::SingleObject(expected), Value::Object(obj)) => Arc::ptr_eq(expected, obj),
            (TypeGuard::ObjectGroup(group), Value::Object(obj)) => Arc::ptr_eq(group, obj.group()),
            _ => false,
        }
    }

    /// Structural kind
    pub fn kind(&self) -> TypeGuardKind {
        match self {
            TypeGuard::PrimitiveSet(_) => TypeGuardKind::PrimitiveSet,
            TypeGuard::SingleObject(_) => TypeGuardKind::SingleObject,
            TypeGuard::ObjectGroup(_) => TypeGuardKind::ObjectGroup,
            TypeGuard::AnyValue => TypeGuardKind::AnyValue,
        }
    }

    /// Whether this guard is on an object identity or group; those count
    /// against the object-stub cap
    pub fn is_object_kind(&self) -> bool {
        matches!(self, TypeGuard::SingleObject(_) | TypeGuard::ObjectGroup(_))
    }

    /// Primitive kinds accepted, for a `PrimitiveSet` guard
    pub fn primitive_flags(&self) -> Option<PrimitiveTypeSet> {
        match self {
            TypeGuard::PrimitiveSet(flags) => Some(*flags),
            _ => None,
        }
    }
}

impl fmt::Debug for TypeGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypeGuard::PrimitiveSet(flags) => write!(f, "PrimitiveSet({flags:?})"),
            TypeGuard::SingleObject(obj) => write!(f, "SingleObject(#{})", obj.id().0),
            TypeGuard::ObjectGroup(group) => write!(f, "ObjectGroup(#{})", group.id().0),
            TypeGuard::AnyValue => f.write_str("AnyValue"),
        }
    }
}

/// Tag identifying what a stub does
#[derive(Debug, Clone)]
pub enum StubKind {
    /// Terminator of a main chain; runs the generic operation of its kind
    Fallback(IcKind),
    /// Specialized main-chain stub
    CacheIr {
        /// Specialized operation
        op: CacheIrOp,
        /// Interaction with monitor/update chains
        flavor: StubFlavor,
    },
    /// Terminator of a monitor chain
    TypeMonitorFallback,
    /// Monitor chain guard
    TypeMonitor(TypeGuard),
    /// Terminator of an update chain
    TypeUpdateFallback,
    /// Update chain guard
    TypeUpdate(TypeGuard),
}

impl StubKind {
    /// Whether this kind terminates a chain
    pub fn is_fallback(&self) -> bool {
        matches!(
            self,
            StubKind::Fallback(_) | StubKind::TypeMonitorFallback | StubKind::TypeUpdateFallback
        )
    }

    /// Code-cache key, `None` for fallbacks
    pub fn code_key(&self) -> Option<CacheIrOp> {
        match self {
            StubKind::CacheIr { op, .. } => Some(*op),
            StubKind::TypeMonitor(guard) | StubKind::TypeUpdate(guard) => {
                Some(CacheIrOp::TypeGuard(guard.kind()))
            }
            _ => None,
        }
    }

    /// Specialized operation of a main-chain stub
    pub fn cache_ir_op(&self) -> Option<CacheIrOp> {
        match self {
            StubKind::CacheIr { op, .. } => Some(*op),
            _ => None,
        }
    }

    /// Flavor of a main-chain stub
    pub fn flavor(&self) -> Option<StubFlavor> {
        match self {
            StubKind::CacheIr { flavor, .. } => Some(*flavor),
            _ => None,
        }
    }

    /// Guard of a monitor or update stub
    pub fn type_guard(&self) -> Option<&TypeGuard> {
        match self {
            StubKind::TypeMonitor(guard) | StubKind::TypeUpdate(guard) => Some(guard),
            _ => None,
        }
    }
}

/// Guard payload of a main-chain stub
#[derive(Debug, Clone, Default)]
pub enum StubData {
    /// No payload (fallbacks, type guards, type-only specializations)
    #[default]
    None,
    /// Fixed slot of objects with a given class and shape. Writes also pin
    /// the group, since property types are tracked per group.
    Slot {
        /// Expected class
        class: ObjectClass,
        /// Expected group, for stores
        group: Option<Arc<ObjectGroup>>,
        /// Expected shape
        shape: Arc<Shape>,
        /// Slot offset
        offset: u32,
    },
    /// Expected shape only
    Shape {
        /// Expected class
        class: ObjectClass,
        /// Expected shape
        shape: Arc<Shape>,
    },
    /// Shape transition performed by an add-slot store
    AddSlot {
        /// Expected group
        group: Arc<ObjectGroup>,
        /// Shape before the store
        old_shape: Arc<Shape>,
        /// Shape after the store
        new_shape: Arc<Shape>,
    },
    /// Expected callee
    Callee(ObjectRef),
    /// Constructor of an `instanceof` stub and where its `prototype` lives
    Prototype {
        /// Expected constructor
        ctor: ObjectRef,
        /// Expected constructor shape
        shape: Arc<Shape>,
        /// Slot of `prototype`
        offset: u32,
    },
    /// Answer to `key in object` for one shape
    HasProp {
        /// Expected shape
        shape: Arc<Shape>,
        /// Expected key
        key: PropertyKey,
        /// Whether the key is present
        present: bool,
    },
}

/// A stub. Immutable once built; widening a monitor stub builds a new one.
#[derive(Clone)]
pub struct Stub {
    kind: StubKind,
    data: StubData,
    code: Option<CompiledCode>,
}

impl Stub {
    /// Chain terminator for a main chain of `kind`
    pub fn fallback(kind: IcKind) -> Self {
        Self {
            kind: StubKind::Fallback(kind),
            data: StubData::None,
            code: None,
        }
    }

    /// Monitor chain terminator
    pub fn monitor_fallback() -> Self {
        Self {
            kind: StubKind::TypeMonitorFallback,
            data: StubData::None,
            code: None,
        }
    }

    /// Update chain terminator
    pub fn update_fallback() -> Self {
        Self {
            kind: StubKind::TypeUpdateFallback,
            data: StubData::None,
            code: None,
        }
    }

    /// Optimized stub with compiled code
    pub fn optimized(kind: StubKind, data: StubData, code: CompiledCode) -> Self {
        debug_assert!(!kind.is_fallback());
        Self {
            kind,
            data,
            code: Some(code),
        }
    }

    /// Stub kind
    pub fn kind(&self) -> &StubKind {
        &self.kind
    }

    /// Guard payload
    pub fn data(&self) -> &StubData {
        &self.data
    }

    /// Compiled code, `None` for fallbacks
    pub fn code(&self) -> Option<&CompiledCode> {
        self.code.as_ref()
    }

    /// Whether this stub terminates its chain
    pub fn is_fallback(&self) -> bool {
        self.kind.is_fallback()
    }

    /// Whether the stub accepts a value of primitive kind `ty` (type guards)
    pub fn accepts_type(&self, ty: ValueType) -> bool {
        match self.kind.type_guard() {
            Some(TypeGuard::AnyValue) => true,
            Some(TypeGuard::PrimitiveSet(flags)) => flags.contains(ty),
            _ => false,
        }
    }
}

impl fmt::Debug for Stub {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Stub")
            .field("kind", &self.kind)
            .field("code", &self.code.as_ref().map(|code| code.id()))
            .finish()
    }
}
