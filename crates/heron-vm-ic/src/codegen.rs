//! Codegen strategy and stub handlers
//!
//! The engine never emits code itself. It hands a `CacheIrOp` to a
//! `CodegenStrategy` and gets back an opaque `StubHandler`; the stub's
//! payload is passed to the handler on every call, so one handler serves
//! every stub of the same signature.
//!
//! `InterpretingBackend` is the default strategy: its handlers interpret
//! the op directly against the host model.

use crate::cache_ir::CacheIrOp;
use crate::operands::IcOperands;
use crate::stub::{Stub, StubData};
use heron_vm_core::{ObjectClass, ObjectRef, Realm, Value, ValueType, VmError, VmResult, ops};
use std::sync::Arc;
use thiserror::Error;

/// Codegen failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum CodegenError {
    /// The code allocator is exhausted
    #[error("out of memory")]
    OutOfMemory,
    /// The strategy cannot compile this signature
    #[error("unsupported stub signature {0:?}")]
    Unsupported(CacheIrOp),
}

/// Result of invoking a stub
#[derive(Debug, Clone)]
pub enum StubOutcome {
    /// The guard held and the handler produced this value
    Matched(Value),
    /// The guard failed; try the next stub
    GuardFailed,
}

/// Compiled guard plus handler
pub trait StubHandler: Send + Sync {
    /// Whether the operands satisfy the stub's guard. Has no side effects.
    fn guard(&self, stub: &Stub, operands: &IcOperands<'_>) -> bool;

    /// Run the specialized operation. Only called after `guard` held.
    fn run(&self, stub: &Stub, operands: &IcOperands<'_>, realm: &Realm) -> VmResult<Value>;

    /// Guard, then run
    fn invoke(&self, stub: &Stub, operands: &IcOperands<'_>, realm: &Realm) -> VmResult<StubOutcome> {
        if !self.guard(stub, operands) {
            return Ok(StubOutcome::GuardFailed);
        }
        self.run(stub, operands, realm).map(StubOutcome::Matched)
    }
}

/// Turns stub signatures into handlers
pub trait CodegenStrategy: Send + Sync {
    /// Compile a handler for `op`
    fn compile(&self, op: CacheIrOp) -> Result<Arc<dyn StubHandler>, CodegenError>;
}

/// Strategy whose handlers interpret their op
#[derive(Debug, Clone, Copy, Default)]
pub struct InterpretingBackend;

impl CodegenStrategy for InterpretingBackend {
    fn compile(&self, op: CacheIrOp) -> Result<Arc<dyn StubHandler>, CodegenError> {
        Ok(Arc::new(RecipeHandler { op }))
    }
}

struct RecipeHandler {
    op: CacheIrOp,
}

fn int32_pair(operands: &IcOperands<'_>) -> Option<(i32, i32)> {
    match operands.binary()? {
        (Value::Int32(a), Value::Int32(b)) => Some((*a, *b)),
        _ => None,
    }
}

fn number_pair(operands: &IcOperands<'_>) -> Option<(f64, f64)> {
    let (lhs, rhs) = operands.binary()?;
    Some((lhs.as_number()?, rhs.as_number()?))
}

fn dense_store<'a>(operands: &IcOperands<'a>) -> Option<(&'a ObjectRef, usize, usize)> {
    match operands.ternary()? {
        (Value::Object(obj), Value::Int32(index), _) if obj.class() == ObjectClass::Array && *index >= 0 => {
            Some((obj, *index as usize, obj.elements_len()))
        }
        _ => None,
    }
}

fn concat_operand(value: &Value) -> bool {
    value.is_primitive() && !matches!(value, Value::Symbol(_))
}

fn guard_failed(op: CacheIrOp) -> VmError {
    VmError::internal(format!("{op:?} stub ran without its guard"))
}

impl StubHandler for RecipeHandler {
    fn guard(&self, stub: &Stub, operands: &IcOperands<'_>) -> bool {
        match (self.op, stub.data()) {
            (CacheIrOp::GetPropSlot, StubData::Slot { class, shape, .. }) => {
                matches!(operands.unary(), Some(Value::Object(obj))
                    if obj.class() == *class && obj.shape().id() == shape.id())
            }
            (CacheIrOp::GetPropMissing, StubData::Shape { class, shape }) => {
                matches!(operands.unary(), Some(Value::Object(obj))
                    if *class != ObjectClass::Array
                        && obj.class() == *class
                        && obj.shape().id() == shape.id())
            }
            (CacheIrOp::GetPropArrayLength, _) => {
                matches!(operands.unary(), Some(Value::Object(obj)) if obj.class() == ObjectClass::Array)
            }
            (CacheIrOp::GetPropStringLength, _) => matches!(operands.unary(), Some(Value::String(_))),
            (CacheIrOp::GetElemDense, _) => matches!(operands.binary(),
                Some((Value::Object(obj), Value::Int32(index)))
                    if obj.class() == ObjectClass::Array
                        && *index >= 0
                        && (*index as usize) < obj.elements_len()),
            (CacheIrOp::SetElemDense, _) => {
                dense_store(operands).is_some_and(|(_, index, len)| index < len)
            }
            (CacheIrOp::SetElemAppend, _) => {
                dense_store(operands).is_some_and(|(_, index, len)| index == len)
            }
            (
                CacheIrOp::SetPropSlot,
                StubData::Slot {
                    group: Some(group),
                    shape,
                    ..
                },
            ) => matches!(operands.binary(), Some((Value::Object(obj), _))
                if Arc::ptr_eq(obj.group(), group) && obj.shape().id() == shape.id()),
            (
                CacheIrOp::AddSlot,
                StubData::AddSlot {
                    group, old_shape, ..
                },
            ) => matches!(operands.binary(), Some((Value::Object(obj), _))
                if Arc::ptr_eq(obj.group(), group)
                    && obj.shape().id() == old_shape.id()
                    && obj.is_extensible()),
            (CacheIrOp::CallFunction, StubData::Callee(expected)) => {
                matches!(operands.callee(), Some(Value::Object(obj)) if Arc::ptr_eq(obj, expected))
            }
            (CacheIrOp::BinaryArithInt32(_) | CacheIrOp::CompareInt32(_), _) => {
                int32_pair(operands).is_some()
            }
            (CacheIrOp::BinaryArithDouble(_) | CacheIrOp::CompareDouble(_), _) => {
                number_pair(operands).is_some()
            }
            (CacheIrOp::BinaryArithStringConcat, _) => matches!(operands.binary(),
                Some((lhs, rhs))
                    if (matches!(lhs, Value::String(_)) || matches!(rhs, Value::String(_)))
                        && concat_operand(lhs)
                        && concat_operand(rhs)),
            (CacheIrOp::UnaryArithInt32(_), _) => matches!(operands.unary(), Some(Value::Int32(_))),
            (CacheIrOp::UnaryArithDouble(_), _) => operands.unary().is_some_and(Value::is_number),
            (CacheIrOp::CompareString(_), _) => {
                matches!(operands.binary(), Some((Value::String(_), Value::String(_))))
            }
            (CacheIrOp::CompareNullUndefined(op), _) => {
                op.is_equality()
                    && matches!(operands.binary(),
                        Some((Value::Undefined | Value::Null, Value::Undefined | Value::Null)))
            }
            (CacheIrOp::ToBool(ty), _) => operands
                .unary()
                .is_some_and(|value| value.value_type() == ty && ty != ValueType::Magic),
            (CacheIrOp::TypeOf(ty), _) => operands
                .unary()
                .is_some_and(|value| ty.is_primitive() && value.value_type() == ty),
            (CacheIrOp::GetIteratorArray, _) => {
                matches!(operands.unary(), Some(Value::Object(obj)) if obj.class() == ObjectClass::Array)
            }
            (CacheIrOp::HasOwnSlot, StubData::HasProp { shape, key, .. }) => {
                matches!(operands.binary(), Some((Value::String(name), Value::Object(obj)))
                    if &**name == key.as_str()
                        && obj.class() != ObjectClass::Array
                        && obj.shape().id() == shape.id())
            }
            (CacheIrOp::HasOwnDenseElement, _) => matches!(operands.binary(),
                Some((Value::Int32(index), Value::Object(obj)))
                    if *index >= 0 && obj.class() == ObjectClass::Array),
            (CacheIrOp::InstanceOfFunction, StubData::Prototype { ctor, shape, .. }) => {
                matches!(operands.binary(), Some((_, Value::Object(obj)))
                    if Arc::ptr_eq(obj, ctor) && obj.shape().id() == shape.id())
            }
            (CacheIrOp::TypeGuard(_), _) => match (stub.kind().type_guard(), operands.unary()) {
                (Some(guard), Some(value)) => guard.accepts(value),
                _ => false,
            },
            _ => false,
        }
    }

    fn run(&self, stub: &Stub, operands: &IcOperands<'_>, realm: &Realm) -> VmResult<Value> {
        let op = self.op;
        match (op, stub.data()) {
            (CacheIrOp::GetPropSlot, StubData::Slot { offset, .. }) => match operands.unary() {
                Some(Value::Object(obj)) => Ok(obj.slot(*offset)),
                _ => Err(guard_failed(op)),
            },
            (CacheIrOp::GetPropMissing, _) => Ok(Value::Undefined),
            (CacheIrOp::GetPropArrayLength, _) => match operands.unary() {
                Some(Value::Object(obj)) => Ok(Value::Int32(obj.elements_len() as i32)),
                _ => Err(guard_failed(op)),
            },
            (CacheIrOp::GetPropStringLength, _) => match operands.unary() {
                Some(Value::String(s)) => Ok(Value::Int32(s.encode_utf16().count() as i32)),
                _ => Err(guard_failed(op)),
            },
            (CacheIrOp::GetElemDense, _) => match operands.binary() {
                Some((Value::Object(obj), Value::Int32(index))) => {
                    Ok(obj.element(*index as usize).unwrap_or(Value::Undefined))
                }
                _ => Err(guard_failed(op)),
            },
            (CacheIrOp::SetElemDense | CacheIrOp::SetElemAppend, _) => match operands.ternary() {
                Some((Value::Object(obj), Value::Int32(index), rhs)) => {
                    obj.set_element(*index as usize, rhs.clone());
                    Ok(rhs.clone())
                }
                _ => Err(guard_failed(op)),
            },
            (CacheIrOp::SetPropSlot, StubData::Slot { offset, .. }) => match operands.binary() {
                Some((Value::Object(obj), rhs)) => {
                    obj.set_slot(*offset, rhs.clone());
                    Ok(rhs.clone())
                }
                _ => Err(guard_failed(op)),
            },
            (
                CacheIrOp::AddSlot,
                StubData::AddSlot {
                    old_shape,
                    new_shape,
                    ..
                },
            ) => match operands.binary() {
                Some((Value::Object(obj), rhs)) => {
                    if !obj.add_slot(old_shape, new_shape, rhs.clone()) {
                        let key = new_shape.last_key().ok_or_else(|| guard_failed(op))?;
                        ops::set_property(&Value::Object(Arc::clone(obj)), key, rhs)?;
                    }
                    Ok(rhs.clone())
                }
                _ => Err(guard_failed(op)),
            },
            (CacheIrOp::CallFunction, StubData::Callee(callee)) => match operands {
                IcOperands::Call { this, args, .. } => callee.call(this, args),
                _ => Err(guard_failed(op)),
            },
            (CacheIrOp::BinaryArithInt32(bin), _) => int32_pair(operands)
                .map(|(a, b)| ops::int32_arith(bin, a, b))
                .ok_or_else(|| guard_failed(op)),
            (CacheIrOp::BinaryArithDouble(bin), _) => number_pair(operands)
                .map(|(a, b)| ops::double_arith(bin, a, b))
                .ok_or_else(|| guard_failed(op)),
            (CacheIrOp::BinaryArithStringConcat, _) => {
                let (lhs, rhs) = operands.binary().ok_or_else(|| guard_failed(op))?;
                ops::string_concat(lhs, rhs)
            }
            (CacheIrOp::UnaryArithInt32(un), _) => match operands.unary() {
                Some(Value::Int32(i)) => Ok(ops::int32_unary(un, *i)),
                _ => Err(guard_failed(op)),
            },
            (CacheIrOp::UnaryArithDouble(un), _) => operands
                .unary()
                .and_then(Value::as_number)
                .map(|n| ops::double_unary(un, n))
                .ok_or_else(|| guard_failed(op)),
            (CacheIrOp::CompareInt32(cmp), _) => int32_pair(operands)
                .map(|(a, b)| Value::Boolean(ops::compare_numbers(cmp, f64::from(a), f64::from(b))))
                .ok_or_else(|| guard_failed(op)),
            (CacheIrOp::CompareDouble(cmp), _) => number_pair(operands)
                .map(|(a, b)| Value::Boolean(ops::compare_numbers(cmp, a, b)))
                .ok_or_else(|| guard_failed(op)),
            (CacheIrOp::CompareString(cmp), _) => match operands.binary() {
                Some((Value::String(a), Value::String(b))) => {
                    Ok(Value::Boolean(ops::compare_strings(cmp, a, b)))
                }
                _ => Err(guard_failed(op)),
            },
            (CacheIrOp::CompareNullUndefined(cmp), _) => {
                let (lhs, rhs) = operands.binary().ok_or_else(|| guard_failed(op))?;
                ops::compare(cmp, lhs, rhs).map(Value::Boolean)
            }
            (CacheIrOp::ToBool(_), _) => operands
                .unary()
                .map(|value| Value::Boolean(ops::to_boolean(value)))
                .ok_or_else(|| guard_failed(op)),
            (CacheIrOp::TypeOf(_), _) => operands
                .unary()
                .map(|value| Value::string(ops::type_of(value)))
                .ok_or_else(|| guard_failed(op)),
            (CacheIrOp::GetIteratorArray, _) => match operands.unary() {
                Some(Value::Object(obj)) => Ok(Value::Object(realm.new_array_iterator(obj))),
                _ => Err(guard_failed(op)),
            },
            (CacheIrOp::HasOwnSlot, StubData::HasProp { present, .. }) => Ok(Value::Boolean(*present)),
            (CacheIrOp::HasOwnDenseElement, _) => match operands.binary() {
                Some((Value::Int32(index), Value::Object(obj))) => {
                    Ok(Value::Boolean((*index as usize) < obj.elements_len()))
                }
                _ => Err(guard_failed(op)),
            },
            (CacheIrOp::InstanceOfFunction, StubData::Prototype { ctor, offset, .. }) => {
                let (value, rhs) = operands.binary().ok_or_else(|| guard_failed(op))?;
                match (value, ctor.slot(*offset)) {
                    (Value::Object(_), Value::Object(proto)) => {
                        Ok(Value::Boolean(ops::inherits_from(value, &proto)))
                    }
                    // Primitives and a clobbered `prototype` take the generic path
                    _ => ops::instance_of(value, rhs).map(Value::Boolean),
                }
            }
            (CacheIrOp::TypeGuard(_), _) => operands.unary().cloned().ok_or_else(|| guard_failed(op)),
            _ => Err(VmError::internal(format!("{op:?} stub has a mismatched payload"))),
        }
    }
}
