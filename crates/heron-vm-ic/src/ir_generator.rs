//! IR generators
//!
//! A generator inspects the operands of one fallback hit and decides
//! whether the operation can be specialized. On `Attach` it leaves a
//! recipe behind for the attach controller to compile and link.

use crate::cache_ir::{CacheIrOp, StubRecipe};
use crate::state::AttachDecision;
use crate::stub::{StubData, StubFlavor};
use heron_vm_bytecode::{BinaryOp, CompareOp, UnaryOp};
use heron_vm_core::{ObjectClass, ObjectRef, PropertyKey, Shape, Value, ValueType};
use std::sync::Arc;

/// Specializes one operation from its observed operands
pub trait IrGenerator {
    /// Inspect the operands and decide
    fn try_attach_stub(&mut self) -> AttachDecision;

    /// Recipe produced by the last `Attach` decision
    fn take_recipe(&mut self) -> Option<StubRecipe>;
}

fn attach(slot: &mut Option<StubRecipe>, recipe: StubRecipe) -> AttachDecision {
    *slot = Some(recipe);
    AttachDecision::Attach
}

macro_rules! recipe_slot {
    ($ty:ty) => {
        impl $ty {
            fn emit(&mut self, op: CacheIrOp, flavor: StubFlavor, data: StubData) -> AttachDecision {
                attach(&mut self.recipe, StubRecipe::cache_ir(op, flavor, data))
            }
        }
    };
}

/// `object.key`
pub struct GetPropIrGenerator<'a> {
    target: &'a Value,
    key: &'a PropertyKey,
    recipe: Option<StubRecipe>,
}

impl<'a> GetPropIrGenerator<'a> {
    /// Generator for a read of `key` from `target`
    pub fn new(target: &'a Value, key: &'a PropertyKey) -> Self {
        Self {
            target,
            key,
            recipe: None,
        }
    }

    fn attach_object(&mut self, obj: &ObjectRef) -> AttachDecision {
        if obj.group().is_preliminary() {
            return AttachDecision::TemporarilyUnoptimizable;
        }
        let class = obj.class();
        if class == ObjectClass::Array {
            if self.key.as_str() == "length" {
                return self.emit(CacheIrOp::GetPropArrayLength, StubFlavor::Monitored, StubData::None);
            }
            if self.key.array_index().is_some() {
                return AttachDecision::NoAction;
            }
        }

        let shape = obj.shape();
        match shape.offset_of(self.key) {
            Some(offset) => self.emit(
                CacheIrOp::GetPropSlot,
                StubFlavor::Monitored,
                StubData::Slot {
                    class,
                    group: None,
                    shape,
                    offset,
                },
            ),
            // Missing-property stubs never guard arrays: their length and
            // indices are not in the shape
            None if class == ObjectClass::Array => AttachDecision::NoAction,
            None => self.emit(
                CacheIrOp::GetPropMissing,
                StubFlavor::Monitored,
                StubData::Shape { class, shape },
            ),
        }
    }
}

recipe_slot!(GetPropIrGenerator<'_>);

impl IrGenerator for GetPropIrGenerator<'_> {
    fn try_attach_stub(&mut self) -> AttachDecision {
        let target = self.target;
        match target {
            Value::String(_) if self.key.as_str() == "length" => {
                self.emit(CacheIrOp::GetPropStringLength, StubFlavor::Monitored, StubData::None)
            }
            Value::Object(obj) => self.attach_object(obj),
            _ => AttachDecision::NoAction,
        }
    }

    fn take_recipe(&mut self) -> Option<StubRecipe> {
        self.recipe.take()
    }
}

/// `object[index]`
pub struct GetElemIrGenerator<'a> {
    target: &'a Value,
    index: &'a Value,
    recipe: Option<StubRecipe>,
}

impl<'a> GetElemIrGenerator<'a> {
    /// Generator for an element read
    pub fn new(target: &'a Value, index: &'a Value) -> Self {
        Self {
            target,
            index,
            recipe: None,
        }
    }
}

recipe_slot!(GetElemIrGenerator<'_>);

impl IrGenerator for GetElemIrGenerator<'_> {
    fn try_attach_stub(&mut self) -> AttachDecision {
        let (Value::Object(obj), Value::Int32(index)) = (self.target, self.index) else {
            return AttachDecision::NoAction;
        };
        if obj.class() != ObjectClass::Array || *index < 0 || *index as usize >= obj.elements_len() {
            return AttachDecision::NoAction;
        }
        self.emit(CacheIrOp::GetElemDense, StubFlavor::Monitored, StubData::None)
    }

    fn take_recipe(&mut self) -> Option<StubRecipe> {
        self.recipe.take()
    }
}

/// `object[index] = rhs`
///
/// In-bounds stores to a dense array attach immediately. A store one past
/// the end is `Deferred`: `try_attach_append` confirms after the generic
/// write that it grew the array by exactly one element.
pub struct SetElemIrGenerator<'a> {
    target: &'a Value,
    index: &'a Value,
    recipe: Option<StubRecipe>,
}

impl<'a> SetElemIrGenerator<'a> {
    /// Generator for an element write
    pub fn new(target: &'a Value, index: &'a Value) -> Self {
        Self {
            target,
            index,
            recipe: None,
        }
    }

    fn dense_target(&self) -> Option<(&'a ObjectRef, usize)> {
        match (self.target, self.index) {
            (Value::Object(obj), Value::Int32(index)) if obj.class() == ObjectClass::Array && *index >= 0 => {
                Some((obj, *index as usize))
            }
            _ => None,
        }
    }

    /// Second pass after the generic write of an append
    pub fn try_attach_append(&mut self, old_len: usize) -> AttachDecision {
        let Some((obj, index)) = self.dense_target() else {
            return AttachDecision::NoAction;
        };
        if index != old_len || obj.elements_len() != old_len + 1 {
            return AttachDecision::NoAction;
        }
        self.emit(CacheIrOp::SetElemAppend, StubFlavor::Regular, StubData::None)
    }
}

recipe_slot!(SetElemIrGenerator<'_>);

impl IrGenerator for SetElemIrGenerator<'_> {
    fn try_attach_stub(&mut self) -> AttachDecision {
        let Some((obj, index)) = self.dense_target() else {
            return AttachDecision::NoAction;
        };
        if obj.group().is_preliminary() {
            return AttachDecision::TemporarilyUnoptimizable;
        }
        let len = obj.elements_len();
        if index < len {
            self.emit(CacheIrOp::SetElemDense, StubFlavor::Regular, StubData::None)
        } else if index == len {
            AttachDecision::Deferred
        } else {
            AttachDecision::NoAction
        }
    }

    fn take_recipe(&mut self) -> Option<StubRecipe> {
        self.recipe.take()
    }
}

/// `object.key = rhs`
///
/// Stores to an existing slot attach immediately. Stores that add a
/// property are `Deferred`: the new shape only exists once the generic
/// write ran, after which `try_attach_add_slot` records the transition.
pub struct SetPropIrGenerator<'a> {
    target: &'a Value,
    key: &'a PropertyKey,
    recipe: Option<StubRecipe>,
}

impl<'a> SetPropIrGenerator<'a> {
    /// Generator for a write of `key` on `target`
    pub fn new(target: &'a Value, key: &'a PropertyKey) -> Self {
        Self {
            target,
            key,
            recipe: None,
        }
    }

    /// Second pass after the generic write: attach an add-slot stub when the
    /// write moved the object from `old_shape` to a child adding `key`
    pub fn try_attach_add_slot(&mut self, old_shape: &Arc<Shape>) -> AttachDecision {
        let Value::Object(obj) = self.target else {
            return AttachDecision::NoAction;
        };
        let new_shape = obj.shape();
        let added = new_shape
            .parent()
            .is_some_and(|parent| Arc::ptr_eq(parent, old_shape))
            && new_shape.last_key() == Some(self.key);
        if !added {
            return AttachDecision::NoAction;
        }
        let group = Arc::clone(obj.group());
        self.emit(
            CacheIrOp::AddSlot,
            StubFlavor::Updated,
            StubData::AddSlot {
                group,
                old_shape: Arc::clone(old_shape),
                new_shape,
            },
        )
    }
}

recipe_slot!(SetPropIrGenerator<'_>);

impl IrGenerator for SetPropIrGenerator<'_> {
    fn try_attach_stub(&mut self) -> AttachDecision {
        let Value::Object(obj) = self.target else {
            return AttachDecision::NoAction;
        };
        if obj.group().is_preliminary() {
            return AttachDecision::TemporarilyUnoptimizable;
        }
        if obj.class() == ObjectClass::Array {
            return AttachDecision::NoAction;
        }

        let shape = obj.shape();
        match shape.offset_of(self.key) {
            Some(offset) => {
                let class = obj.class();
                let group = Some(Arc::clone(obj.group()));
                self.emit(
                    CacheIrOp::SetPropSlot,
                    StubFlavor::Updated,
                    StubData::Slot {
                        class,
                        group,
                        shape,
                        offset,
                    },
                )
            }
            None if obj.is_extensible() => AttachDecision::Deferred,
            None => AttachDecision::NoAction,
        }
    }

    fn take_recipe(&mut self) -> Option<StubRecipe> {
        self.recipe.take()
    }
}

/// `key in object`
pub struct InIrGenerator<'a> {
    key: &'a Value,
    target: &'a Value,
    recipe: Option<StubRecipe>,
}

impl<'a> InIrGenerator<'a> {
    /// Generator for `key in target`
    pub fn new(key: &'a Value, target: &'a Value) -> Self {
        Self {
            key,
            target,
            recipe: None,
        }
    }
}

recipe_slot!(InIrGenerator<'_>);

impl IrGenerator for InIrGenerator<'_> {
    fn try_attach_stub(&mut self) -> AttachDecision {
        let (Value::String(name), Value::Object(obj)) = (self.key, self.target) else {
            return AttachDecision::NoAction;
        };
        if obj.class() == ObjectClass::Array {
            return AttachDecision::NoAction;
        }
        let key = PropertyKey::new(name);
        let shape = obj.shape();
        let present = shape.offset_of(&key).is_some();
        self.emit(
            CacheIrOp::HasOwnSlot,
            StubFlavor::Regular,
            StubData::HasProp {
                shape,
                key,
                present,
            },
        )
    }

    fn take_recipe(&mut self) -> Option<StubRecipe> {
        self.recipe.take()
    }
}

/// Own-property test of `key` on `object`
pub struct HasOwnIrGenerator<'a> {
    key: &'a Value,
    target: &'a Value,
    recipe: Option<StubRecipe>,
}

impl<'a> HasOwnIrGenerator<'a> {
    /// Generator for an own-property test
    pub fn new(key: &'a Value, target: &'a Value) -> Self {
        Self {
            key,
            target,
            recipe: None,
        }
    }
}

recipe_slot!(HasOwnIrGenerator<'_>);

impl IrGenerator for HasOwnIrGenerator<'_> {
    fn try_attach_stub(&mut self) -> AttachDecision {
        let Value::Object(obj) = self.target else {
            return AttachDecision::NoAction;
        };
        match self.key {
            Value::Int32(index) if *index >= 0 && obj.class() == ObjectClass::Array => {
                self.emit(CacheIrOp::HasOwnDenseElement, StubFlavor::Regular, StubData::None)
            }
            Value::String(name) if obj.class() != ObjectClass::Array => {
                let key = PropertyKey::new(name);
                let shape = obj.shape();
                let present = shape.offset_of(&key).is_some();
                self.emit(
                    CacheIrOp::HasOwnSlot,
                    StubFlavor::Regular,
                    StubData::HasProp {
                        shape,
                        key,
                        present,
                    },
                )
            }
            _ => AttachDecision::NoAction,
        }
    }

    fn take_recipe(&mut self) -> Option<StubRecipe> {
        self.recipe.take()
    }
}

/// `value instanceof ctor`
pub struct InstanceOfIrGenerator<'a> {
    ctor: &'a Value,
    recipe: Option<StubRecipe>,
}

impl<'a> InstanceOfIrGenerator<'a> {
    /// Generator for an `instanceof` against `ctor`
    pub fn new(ctor: &'a Value) -> Self {
        Self { ctor, recipe: None }
    }
}

recipe_slot!(InstanceOfIrGenerator<'_>);

impl IrGenerator for InstanceOfIrGenerator<'_> {
    fn try_attach_stub(&mut self) -> AttachDecision {
        let Value::Object(ctor) = self.ctor else {
            return AttachDecision::NoAction;
        };
        if !ctor.is_callable() {
            return AttachDecision::NoAction;
        }
        let shape = ctor.shape();
        let Some(offset) = shape.offset_of(&PropertyKey::from("prototype")) else {
            return AttachDecision::NoAction;
        };
        if !matches!(ctor.slot(offset), Value::Object(_)) {
            return AttachDecision::NoAction;
        }
        let data = StubData::Prototype {
            ctor: Arc::clone(ctor),
            shape,
            offset,
        };
        self.emit(CacheIrOp::InstanceOfFunction, StubFlavor::Regular, data)
    }

    fn take_recipe(&mut self) -> Option<StubRecipe> {
        self.recipe.take()
    }
}

/// `callee(...args)`
pub struct CallIrGenerator<'a> {
    callee: &'a Value,
    recipe: Option<StubRecipe>,
}

impl<'a> CallIrGenerator<'a> {
    /// Generator for a call of `callee`
    pub fn new(callee: &'a Value) -> Self {
        Self {
            callee,
            recipe: None,
        }
    }
}

recipe_slot!(CallIrGenerator<'_>);

impl IrGenerator for CallIrGenerator<'_> {
    fn try_attach_stub(&mut self) -> AttachDecision {
        let Value::Object(callee) = self.callee else {
            return AttachDecision::NoAction;
        };
        if !callee.is_callable() {
            return AttachDecision::NoAction;
        }
        // A callee already on the stack may be mid-way through mutating
        // this very chain
        if callee.active_calls() > 0 {
            return AttachDecision::TemporarilyUnoptimizable;
        }
        let data = StubData::Callee(Arc::clone(callee));
        self.emit(CacheIrOp::CallFunction, StubFlavor::Monitored, data)
    }

    fn take_recipe(&mut self) -> Option<StubRecipe> {
        self.recipe.take()
    }
}

/// Binary arithmetic
pub struct BinaryArithIrGenerator<'a> {
    op: BinaryOp,
    lhs: &'a Value,
    rhs: &'a Value,
    recipe: Option<StubRecipe>,
}

impl<'a> BinaryArithIrGenerator<'a> {
    /// Generator for `lhs op rhs`
    pub fn new(op: BinaryOp, lhs: &'a Value, rhs: &'a Value) -> Self {
        Self {
            op,
            lhs,
            rhs,
            recipe: None,
        }
    }
}

recipe_slot!(BinaryArithIrGenerator<'_>);

impl IrGenerator for BinaryArithIrGenerator<'_> {
    fn try_attach_stub(&mut self) -> AttachDecision {
        let op = match (self.lhs, self.rhs) {
            (Value::Int32(_), Value::Int32(_)) => CacheIrOp::BinaryArithInt32(self.op),
            (lhs, rhs) if lhs.is_number() && rhs.is_number() => CacheIrOp::BinaryArithDouble(self.op),
            (lhs, rhs)
                if self.op == BinaryOp::Add
                    && (lhs.as_str().is_some() || rhs.as_str().is_some())
                    && [lhs, rhs]
                        .iter()
                        .all(|v| v.is_primitive() && !matches!(v, Value::Symbol(_))) =>
            {
                CacheIrOp::BinaryArithStringConcat
            }
            _ => return AttachDecision::NoAction,
        };
        self.emit(op, StubFlavor::Regular, StubData::None)
    }

    fn take_recipe(&mut self) -> Option<StubRecipe> {
        self.recipe.take()
    }
}

/// Unary arithmetic
pub struct UnaryArithIrGenerator<'a> {
    op: UnaryOp,
    operand: &'a Value,
    recipe: Option<StubRecipe>,
}

impl<'a> UnaryArithIrGenerator<'a> {
    /// Generator for `op operand`
    pub fn new(op: UnaryOp, operand: &'a Value) -> Self {
        Self {
            op,
            operand,
            recipe: None,
        }
    }
}

recipe_slot!(UnaryArithIrGenerator<'_>);

impl IrGenerator for UnaryArithIrGenerator<'_> {
    fn try_attach_stub(&mut self) -> AttachDecision {
        let op = match self.operand {
            Value::Int32(_) => CacheIrOp::UnaryArithInt32(self.op),
            Value::Double(_) => CacheIrOp::UnaryArithDouble(self.op),
            _ => return AttachDecision::NoAction,
        };
        self.emit(op, StubFlavor::Regular, StubData::None)
    }

    fn take_recipe(&mut self) -> Option<StubRecipe> {
        self.recipe.take()
    }
}

/// Comparison
pub struct CompareIrGenerator<'a> {
    op: CompareOp,
    lhs: &'a Value,
    rhs: &'a Value,
    recipe: Option<StubRecipe>,
}

impl<'a> CompareIrGenerator<'a> {
    /// Generator for `lhs op rhs`
    pub fn new(op: CompareOp, lhs: &'a Value, rhs: &'a Value) -> Self {
        Self {
            op,
            lhs,
            rhs,
            recipe: None,
        }
    }
}

recipe_slot!(CompareIrGenerator<'_>);

impl IrGenerator for CompareIrGenerator<'_> {
    fn try_attach_stub(&mut self) -> AttachDecision {
        let nullish = |v: &Value| matches!(v, Value::Undefined | Value::Null);
        let op = match (self.lhs, self.rhs) {
            (Value::Int32(_), Value::Int32(_)) => CacheIrOp::CompareInt32(self.op),
            (lhs, rhs) if lhs.is_number() && rhs.is_number() => CacheIrOp::CompareDouble(self.op),
            (Value::String(_), Value::String(_)) => CacheIrOp::CompareString(self.op),
            (lhs, rhs) if self.op.is_equality() && nullish(lhs) && nullish(rhs) => {
                CacheIrOp::CompareNullUndefined(self.op)
            }
            _ => return AttachDecision::NoAction,
        };
        self.emit(op, StubFlavor::Regular, StubData::None)
    }

    fn take_recipe(&mut self) -> Option<StubRecipe> {
        self.recipe.take()
    }
}

/// Truthiness test
pub struct ToBoolIrGenerator<'a> {
    value: &'a Value,
    recipe: Option<StubRecipe>,
}

impl<'a> ToBoolIrGenerator<'a> {
    /// Generator for the truthiness of `value`
    pub fn new(value: &'a Value) -> Self {
        Self { value, recipe: None }
    }
}

recipe_slot!(ToBoolIrGenerator<'_>);

impl IrGenerator for ToBoolIrGenerator<'_> {
    fn try_attach_stub(&mut self) -> AttachDecision {
        match self.value.value_type() {
            ValueType::Magic => AttachDecision::NoAction,
            ty => self.emit(CacheIrOp::ToBool(ty), StubFlavor::Regular, StubData::None),
        }
    }

    fn take_recipe(&mut self) -> Option<StubRecipe> {
        self.recipe.take()
    }
}

/// `typeof value`
pub struct TypeOfIrGenerator<'a> {
    value: &'a Value,
    recipe: Option<StubRecipe>,
}

impl<'a> TypeOfIrGenerator<'a> {
    /// Generator for `typeof value`
    pub fn new(value: &'a Value) -> Self {
        Self { value, recipe: None }
    }
}

recipe_slot!(TypeOfIrGenerator<'_>);

impl IrGenerator for TypeOfIrGenerator<'_> {
    fn try_attach_stub(&mut self) -> AttachDecision {
        let ty = self.value.value_type();
        if !ty.is_primitive() {
            return AttachDecision::NoAction;
        }
        self.emit(CacheIrOp::TypeOf(ty), StubFlavor::Regular, StubData::None)
    }

    fn take_recipe(&mut self) -> Option<StubRecipe> {
        self.recipe.take()
    }
}

/// Iterator creation
pub struct GetIteratorIrGenerator<'a> {
    value: &'a Value,
    recipe: Option<StubRecipe>,
}

impl<'a> GetIteratorIrGenerator<'a> {
    /// Generator for iterating `value`
    pub fn new(value: &'a Value) -> Self {
        Self { value, recipe: None }
    }
}

recipe_slot!(GetIteratorIrGenerator<'_>);

impl IrGenerator for GetIteratorIrGenerator<'_> {
    fn try_attach_stub(&mut self) -> AttachDecision {
        match self.value {
            Value::Object(obj) if obj.class() == ObjectClass::Array => {
                self.emit(CacheIrOp::GetIteratorArray, StubFlavor::Regular, StubData::None)
            }
            _ => AttachDecision::NoAction,
        }
    }

    fn take_recipe(&mut self) -> Option<StubRecipe> {
        self.recipe.take()
    }
}
