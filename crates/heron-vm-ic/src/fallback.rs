//! Fallback stubs
//!
//! The fallback of an entry runs the canonical operation from `ops` and
//! tries to attach a stub for the operands it saw. Most kinds attach
//! before running the operation. Arithmetic and comparison attach after,
//! so a stub is only added once the operation did not throw. Property
//! writes that add a slot and element writes that append attach after the
//! write, once the new shape or length exists.
//!
//! The unit's lock is never held while an operation runs: a call may
//! re-enter this or any other entry of the unit.

use crate::attach::AttachSite;
use crate::cache_ir::StubRecipe;
use crate::ir_generator::{
    BinaryArithIrGenerator, CallIrGenerator, CompareIrGenerator, GetElemIrGenerator, GetIteratorIrGenerator,
    GetPropIrGenerator, HasOwnIrGenerator, InIrGenerator, InstanceOfIrGenerator, IrGenerator, SetElemIrGenerator,
    SetPropIrGenerator, ToBoolIrGenerator, TypeOfIrGenerator, UnaryArithIrGenerator,
};
use crate::operands::IcOperands;
use crate::script::{DispatchSnapshot, IcEntryId, IcScript, IcScriptState, IcSite};
use crate::space::StubSpace;
use crate::state::AttachDecision;
use crate::stats::IcStats;
use heron_vm_bytecode::{IcKind, Opcode};
use heron_vm_core::{ObjectClass, PropertyKey, Value, VmError, VmResult, ops};

fn mismatched(site: &IcSite) -> VmError {
    VmError::internal(format!(
        "{} entry at {} received operands of the wrong arity",
        site.op_name(),
        site.pc
    ))
}

fn with_site<R>(
    script: &IcScript,
    id: IcEntryId,
    f: impl FnOnce(&mut AttachSite<'_>, &mut StubSpace, &mut IcStats) -> R,
) -> R {
    let pc = script.site(id).pc;
    let mut guard = script.lock();
    let IcScriptState {
        space,
        entries,
        stats,
        ..
    } = &mut *guard;
    let mut site = entries[id.index()].attach_site(pc);
    f(&mut site, space, stats)
}

/// Count the fallback hit
fn enter(script: &IcScript, id: IcEntryId) {
    let site = script.site(id);
    let mut guard = script.lock();
    guard.stats.fallback_hits += 1;
    let space_len = guard.space.len();
    let entry = &mut guard.entries[id.index()];
    entry.entered_count += 1;
    tracing::trace!(
        target: "heron::ic",
        pc = %site.pc,
        op = site.op_name(),
        stubs = entry.state.num_optimized_stubs(),
        allocated = space_len,
        "fallback hit"
    );
}

/// Transition, then ask `generator` for a stub. A `NoAction` counts as a
/// failure; `Deferred` is settled by the caller.
fn attach(script: &IcScript, id: IcEntryId, generator: &mut dyn IrGenerator) -> AttachDecision {
    let runtime = script.runtime();
    with_site(script, id, |site, space, stats| {
        site.maybe_transition(runtime, space, stats);
        let decision = site.try_attach(runtime, space, stats, generator);
        if decision == AttachDecision::NoAction {
            site.state.track_not_attached();
        }
        decision
    })
}

/// Run the fallback of entry `id`
pub(crate) fn run(
    script: &IcScript,
    id: IcEntryId,
    operands: IcOperands<'_>,
    snapshot: &DispatchSnapshot,
) -> VmResult<Value> {
    let site = script.site(id);
    enter(script, id);

    match (site.kind, site.opcode) {
        (IcKind::ToBool, _) => {
            let value = operands.unary().ok_or_else(|| mismatched(site))?;
            attach(script, id, &mut ToBoolIrGenerator::new(value));
            Ok(Value::Boolean(ops::to_boolean(value)))
        }
        (IcKind::TypeOf, _) => {
            let value = operands.unary().ok_or_else(|| mismatched(site))?;
            attach(script, id, &mut TypeOfIrGenerator::new(value));
            Ok(Value::string(ops::type_of(value)))
        }
        (IcKind::GetIterator, _) => {
            let value = operands.unary().ok_or_else(|| mismatched(site))?;
            attach(script, id, &mut GetIteratorIrGenerator::new(value));
            ops::get_iterator(script.runtime().realm(), value)
        }
        (IcKind::GetProp, _) => {
            let target = operands.unary().ok_or_else(|| mismatched(site))?;
            let key = site.key.as_ref().ok_or_else(|| mismatched(site))?;
            attach(script, id, &mut GetPropIrGenerator::new(target, key));
            let result = ops::get_property(target, key)?;
            script.record_monitored(id, snapshot, &result, false);
            Ok(result)
        }
        (IcKind::GetElem, _) => {
            let (target, index) = operands.binary().ok_or_else(|| mismatched(site))?;
            attach(script, id, &mut GetElemIrGenerator::new(target, index));
            let result = ops::get_element(target, index)?;
            script.record_monitored(id, snapshot, &result, false);
            Ok(result)
        }
        (IcKind::SetProp, _) => {
            let (target, rhs) = operands.binary().ok_or_else(|| mismatched(site))?;
            let key = site.key.as_ref().ok_or_else(|| mismatched(site))?;
            set_prop(script, id, target, key, rhs)
        }
        (IcKind::SetElem, _) => {
            let (target, index, rhs) = operands.ternary().ok_or_else(|| mismatched(site))?;
            set_elem(script, id, target, index, rhs)
        }
        (IcKind::In, _) => {
            let (key, target) = operands.binary().ok_or_else(|| mismatched(site))?;
            attach(script, id, &mut InIrGenerator::new(key, target));
            Ok(Value::Boolean(ops::has_property(key, target)?))
        }
        (IcKind::HasOwn, _) => {
            let (key, target) = operands.binary().ok_or_else(|| mismatched(site))?;
            attach(script, id, &mut HasOwnIrGenerator::new(key, target));
            Ok(Value::Boolean(ops::has_own(key, target)?))
        }
        (IcKind::InstanceOf, _) => {
            let (value, ctor) = operands.binary().ok_or_else(|| mismatched(site))?;
            attach(script, id, &mut InstanceOfIrGenerator::new(ctor));
            Ok(Value::Boolean(ops::instance_of(value, ctor)?))
        }
        (IcKind::Call, _) => {
            let IcOperands::Call { callee, this, args } = operands else {
                return Err(mismatched(site));
            };
            attach(script, id, &mut CallIrGenerator::new(callee));
            let result = ops::call_value(callee, this, args)?;
            script.record_monitored(id, snapshot, &result, false);
            Ok(result)
        }
        (IcKind::BinaryArith, Some(Opcode::Binary(op))) => {
            let (lhs, rhs) = operands.binary().ok_or_else(|| mismatched(site))?;
            let result = ops::binary_arith(op, lhs, rhs)?;
            if matches!(result, Value::Double(_)) {
                script.lock().entries[id.index()].saw_double_result = true;
            }
            attach(script, id, &mut BinaryArithIrGenerator::new(op, lhs, rhs));
            Ok(result)
        }
        (IcKind::UnaryArith, Some(Opcode::Unary(op))) => {
            let operand = operands.unary().ok_or_else(|| mismatched(site))?;
            let result = ops::unary_arith(op, operand)?;
            attach(script, id, &mut UnaryArithIrGenerator::new(op, operand));
            Ok(result)
        }
        (IcKind::Compare, Some(Opcode::Compare(op))) => {
            let (lhs, rhs) = operands.binary().ok_or_else(|| mismatched(site))?;
            let result = ops::compare(op, lhs, rhs)?;
            attach(script, id, &mut CompareIrGenerator::new(op, lhs, rhs));
            Ok(Value::Boolean(result))
        }
        (IcKind::TypeMonitor, _) => {
            let value = operands.unary().ok_or_else(|| mismatched(site))?;
            script.record_monitored(id, snapshot, value, false);
            Ok(value.clone())
        }
        (IcKind::WarmUpCounter, _) => {
            let count = script.lock().entries[id.index()].entered_count;
            Ok(Value::number(count as f64))
        }
        (kind, opcode) => Err(VmError::internal(format!(
            "IC kind {kind:?} does not match opcode {opcode:?} at {}",
            site.pc
        ))),
    }
}

/// Named property write. Attaches a slot-store stub before the write, or
/// an add-slot stub after it when the write added the property.
fn set_prop(
    script: &IcScript,
    id: IcEntryId,
    target: &Value,
    key: &PropertyKey,
    rhs: &Value,
) -> VmResult<Value> {
    let mut generator = SetPropIrGenerator::new(target, key);
    let decision = attach(script, id, &mut generator);

    let old_shape = match target {
        Value::Object(obj) if obj.class() != ObjectClass::Array => {
            script.record_write(obj.group(), key, rhs);
            Some(obj.shape())
        }
        _ => None,
    };

    ops::set_property(target, key, rhs)?;

    if decision == AttachDecision::Deferred {
        settle_deferred(script, id, || {
            let old = old_shape.as_ref()?;
            if generator.try_attach_add_slot(old) != AttachDecision::Attach {
                return None;
            }
            generator.take_recipe()
        });
    }
    Ok(rhs.clone())
}

/// Element write. In-bounds array stores attach before the write, appends
/// after it. Writes to other objects record the stored type under the
/// element's property key, as a named write would.
fn set_elem(script: &IcScript, id: IcEntryId, target: &Value, index: &Value, rhs: &Value) -> VmResult<Value> {
    let mut generator = SetElemIrGenerator::new(target, index);
    let decision = attach(script, id, &mut generator);

    let old_len = match target {
        Value::Object(obj) if obj.class() == ObjectClass::Array => Some(obj.elements_len()),
        Value::Object(obj) => {
            let key = ops::to_property_key(index)?;
            script.record_write(obj.group(), &key, rhs);
            None
        }
        _ => None,
    };

    ops::set_element(target, index, rhs)?;

    if decision == AttachDecision::Deferred {
        settle_deferred(script, id, || {
            if generator.try_attach_append(old_len?) != AttachDecision::Attach {
                return None;
            }
            generator.take_recipe()
        });
    }
    Ok(rhs.clone())
}

/// Second attach pass of a `Deferred` decision, after the generic write
/// ran. `second_pass` is only consulted while the chain has room.
fn settle_deferred(script: &IcScript, id: IcEntryId, second_pass: impl FnOnce() -> Option<StubRecipe>) {
    let runtime = script.runtime();
    with_site(script, id, |site, space, stats| {
        let attached = site.state.can_attach_stub(runtime.config().max_optimized_stubs)
            && second_pass().is_some_and(|recipe| site.link(runtime, space, stats, recipe) == AttachDecision::Attach);
        if attached {
            stats.deferred_attaches += 1;
        } else {
            site.state.track_not_attached();
        }
    });
}

/// Bump the warm-up counter of a loop-entry entry, returning the new count
pub(crate) fn warm_up(script: &IcScript, id: IcEntryId) -> u64 {
    let mut guard = script.lock();
    guard.stats.fallback_hits += 1;
    let entry = &mut guard.entries[id.index()];
    entry.entered_count += 1;
    entry.entered_count
}
