//! Type tags and observed-type sets

use crate::group::GroupId;
use crate::object::{ObjectId, ObjectRef};
use crate::value::{MagicKind, Value};
use smallvec::SmallVec;
use std::fmt;

/// Maximum distinct object keys a `TypeSet` tracks before it widens to
/// "any object"
pub const TYPE_SET_MAX_OBJECTS: usize = 8;

/// Type tag of a value
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ValueType {
    /// `undefined`
    Undefined = 0,
    /// `null`
    Null = 1,
    /// Boolean
    Boolean = 2,
    /// Int32 number
    Int32 = 3,
    /// Double number
    Double = 4,
    /// String
    String = 5,
    /// Symbol
    Symbol = 6,
    /// Any object
    Object = 7,
    /// Interpreter sentinel
    Magic = 8,
}

impl ValueType {
    /// Every tag a `PrimitiveTypeSet` can hold
    pub const PRIMITIVES: [ValueType; 7] = [
        ValueType::Undefined,
        ValueType::Null,
        ValueType::Boolean,
        ValueType::Int32,
        ValueType::Double,
        ValueType::String,
        ValueType::Symbol,
    ];

    /// Bit of this tag inside a `PrimitiveTypeSet`
    #[inline]
    pub const fn bit(self) -> u16 {
        1 << (self as u8)
    }

    /// Whether this is a primitive tag
    #[inline]
    pub const fn is_primitive(self) -> bool {
        !matches!(self, ValueType::Object | ValueType::Magic)
    }
}

/// Bitmask of primitive kinds, plus an "any object" bit
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct PrimitiveTypeSet(u16);

impl PrimitiveTypeSet {
    /// No kinds
    pub const EMPTY: PrimitiveTypeSet = PrimitiveTypeSet(0);

    /// Set holding a single kind
    pub const fn of(ty: ValueType) -> Self {
        Self(ty.bit())
    }

    /// Raw bits
    pub const fn bits(self) -> u16 {
        self.0
    }

    /// Whether `ty` is included
    pub const fn contains(self, ty: ValueType) -> bool {
        self.0 & ty.bit() != 0
    }

    /// Whether `value`'s kind is included
    pub fn accepts(self, value: &Value) -> bool {
        self.contains(value.value_type())
    }

    /// Set with `ty` added
    #[must_use]
    pub const fn with(self, ty: ValueType) -> Self {
        Self(self.0 | ty.bit())
    }

    /// Add `ty`, returning true when the set grew
    pub fn insert(&mut self, ty: ValueType) -> bool {
        let before = self.0;
        self.0 |= ty.bit();
        self.0 != before
    }

    /// Union of two sets
    #[must_use]
    pub const fn union(self, other: PrimitiveTypeSet) -> Self {
        Self(self.0 | other.0)
    }

    /// Whether every kind in `self` is in `other`
    pub const fn is_subset_of(self, other: PrimitiveTypeSet) -> bool {
        self.0 & !other.0 == 0
    }

    /// Whether no kind is included
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Number of kinds included
    pub const fn len(self) -> u32 {
        self.0.count_ones()
    }

    /// Included kinds in tag order
    pub fn iter(self) -> impl Iterator<Item = ValueType> {
        ValueType::PRIMITIVES
            .into_iter()
            .chain(std::iter::once(ValueType::Object))
            .filter(move |ty| self.contains(*ty))
    }
}

impl fmt::Debug for PrimitiveTypeSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.iter()).finish()
    }
}

/// How an object is identified inside a type set
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObjectKey {
    /// A singleton object, tracked by identity
    Singleton(ObjectId),
    /// Any object of a group
    Group(GroupId),
}

impl ObjectKey {
    /// Key an object is tracked under
    pub fn of(obj: &ObjectRef) -> Self {
        if obj.is_singleton() {
            ObjectKey::Singleton(obj.id())
        } else {
            ObjectKey::Group(obj.group().id())
        }
    }
}

/// Observed (or declared) types of a site or property
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TypeSet {
    primitives: PrimitiveTypeSet,
    objects: SmallVec<[ObjectKey; 4]>,
    unknown_object: bool,
    unknown: bool,
}

impl TypeSet {
    /// Empty set
    pub fn new() -> Self {
        Self::default()
    }

    /// Set that already accepts everything
    pub fn unknown() -> Self {
        Self {
            unknown: true,
            unknown_object: true,
            ..Self::default()
        }
    }

    /// Whether every value is accepted
    pub fn is_unknown(&self) -> bool {
        self.unknown
    }

    /// Whether every object is accepted
    pub fn is_unknown_object(&self) -> bool {
        self.unknown || self.unknown_object
    }

    /// Primitive kinds seen
    pub fn primitives(&self) -> PrimitiveTypeSet {
        self.primitives
    }

    /// Object keys seen (empty once widened to any object)
    pub fn objects(&self) -> &[ObjectKey] {
        &self.objects
    }

    /// Whether `value` is already covered
    pub fn has_value(&self, value: &Value) -> bool {
        if self.unknown {
            return true;
        }
        match value {
            Value::Object(obj) => {
                self.unknown_object || self.objects.contains(&ObjectKey::of(obj))
            }
            Value::Magic(_) => false,
            other => self.primitives.accepts(other),
        }
    }

    /// Record `value`, returning true when the set changed.
    ///
    /// An uninitialized-lexical sentinel widens to unknown, optimized-out is
    /// ignored.
    pub fn add_value(&mut self, value: &Value) -> bool {
        match value {
            Value::Magic(MagicKind::UninitializedLexical) => self.mark_unknown(),
            Value::Magic(MagicKind::OptimizedOut) => false,
            Value::Object(obj) => self.add_object(ObjectKey::of(obj)),
            other => self.add_type(other.value_type()),
        }
    }

    /// Record a primitive kind
    pub fn add_type(&mut self, ty: ValueType) -> bool {
        if self.unknown {
            return false;
        }
        debug_assert!(ty.is_primitive(), "objects are added by key");
        self.primitives.insert(ty)
    }

    /// Record an object key, widening to any object past the tracking limit
    pub fn add_object(&mut self, key: ObjectKey) -> bool {
        if self.is_unknown_object() || self.objects.contains(&key) {
            return false;
        }
        if self.objects.len() >= TYPE_SET_MAX_OBJECTS {
            return self.mark_unknown_object();
        }
        self.objects.push(key);
        true
    }

    /// Accept every object from now on
    pub fn mark_unknown_object(&mut self) -> bool {
        if self.is_unknown_object() {
            return false;
        }
        self.unknown_object = true;
        self.objects.clear();
        true
    }

    /// Accept every value from now on
    pub fn mark_unknown(&mut self) -> bool {
        if self.unknown {
            return false;
        }
        self.unknown = true;
        self.unknown_object = true;
        self.objects.clear();
        true
    }

    /// Number of object keys tracked
    pub fn object_count(&self) -> usize {
        self.objects.len()
    }
}
