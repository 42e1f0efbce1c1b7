//! Stub recipes
//!
//! A recipe names the specialized operation (`CacheIrOp`, the structural
//! signature handlers are compiled and cached by) plus the payload its
//! guard checks against. Two stubs with the same op share compiled code
//! and differ only in payload.

use crate::stub::{StubData, StubFlavor, StubKind, TypeGuard};
use heron_vm_bytecode::{BinaryOp, CompareOp, UnaryOp};
use heron_vm_core::ValueType;

/// Kind of a type-guard stub in a monitor or update chain
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TypeGuardKind {
    /// Bitmask of primitive kinds
    PrimitiveSet,
    /// Exact object identity
    SingleObject,
    /// Object group
    ObjectGroup,
    /// Accepts everything
    AnyValue,
}

/// Structural signature of a specialized stub
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CacheIrOp {
    /// Own data property at a fixed slot, guarded on class and shape
    GetPropSlot,
    /// Property absent from the shape, yields `undefined`
    GetPropMissing,
    /// `array.length`
    GetPropArrayLength,
    /// `string.length`
    GetPropStringLength,
    /// In-bounds Int32 index into dense array elements
    GetElemDense,
    /// Store to an existing dense element
    SetElemDense,
    /// Store one past the end of a dense array, growing it by one
    SetElemAppend,
    /// Store to an existing slot, guarded on group and shape
    SetPropSlot,
    /// Store that adds a property by a known shape transition
    AddSlot,
    /// Call of one specific function object
    CallFunction,
    /// Binary arithmetic on two Int32 operands
    BinaryArithInt32(BinaryOp),
    /// Binary arithmetic on two numbers
    BinaryArithDouble(BinaryOp),
    /// `+` with a string operand
    BinaryArithStringConcat,
    /// Unary arithmetic on an Int32 operand
    UnaryArithInt32(UnaryOp),
    /// Unary arithmetic on a number
    UnaryArithDouble(UnaryOp),
    /// Comparison of two Int32 operands
    CompareInt32(CompareOp),
    /// Comparison of two numbers
    CompareDouble(CompareOp),
    /// Comparison of two strings
    CompareString(CompareOp),
    /// Equality between `null`/`undefined` operands
    CompareNullUndefined(CompareOp),
    /// Truthiness of a value of one type
    ToBool(ValueType),
    /// `typeof` of a primitive of one type
    TypeOf(ValueType),
    /// Iterator over a dense array
    GetIteratorArray,
    /// `key in object` answered from the shape
    HasOwnSlot,
    /// Own-element test of an Int32 index on a dense array
    HasOwnDenseElement,
    /// `instanceof` against one constructor whose `prototype` lives at a
    /// known slot
    InstanceOfFunction,
    /// Monitor or update chain type guard
    TypeGuard(TypeGuardKind),
}

/// Everything needed to build one stub
#[derive(Debug, Clone)]
pub struct StubRecipe {
    op: CacheIrOp,
    kind: StubKind,
    data: StubData,
}

impl StubRecipe {
    /// Main-chain recipe
    pub fn cache_ir(op: CacheIrOp, flavor: StubFlavor, data: StubData) -> Self {
        Self {
            op,
            kind: StubKind::CacheIr { op, flavor },
            data,
        }
    }

    /// Monitor-chain recipe
    pub fn type_monitor(guard: TypeGuard) -> Self {
        Self {
            op: CacheIrOp::TypeGuard(guard.kind()),
            kind: StubKind::TypeMonitor(guard),
            data: StubData::None,
        }
    }

    /// Update-chain recipe
    pub fn type_update(guard: TypeGuard) -> Self {
        Self {
            op: CacheIrOp::TypeGuard(guard.kind()),
            kind: StubKind::TypeUpdate(guard),
            data: StubData::None,
        }
    }

    /// Code-cache key
    pub fn code_key(&self) -> CacheIrOp {
        self.op
    }

    /// Stub kind the recipe builds
    pub fn kind(&self) -> &StubKind {
        &self.kind
    }

    /// Guard payload
    pub fn data(&self) -> &StubData {
        &self.data
    }

    pub(crate) fn into_parts(self) -> (CacheIrOp, StubKind, StubData) {
        (self.op, self.kind, self.data)
    }
}
