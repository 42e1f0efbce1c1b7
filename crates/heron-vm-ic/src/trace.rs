//! GC tracing of stubs
//!
//! `trace_stub` reports every heap thing a stub keeps alive: its compiled
//! code and the shapes, groups and objects in its guard payload. It runs
//! during full traces and, through the zone's pre-barrier, immediately
//! before a stub is unlinked.

use crate::stub::{Stub, StubData, TypeGuard};
use heron_vm_core::{ObjectGroup, Shape};
use heron_vm_gc::{GcThing, Tracer};

fn trace_shape(shape: &Shape, tracer: &mut dyn Tracer, name: &'static str) {
    tracer.trace_edge(GcThing::shape(shape.id().0), name);
}

fn trace_group(group: &ObjectGroup, tracer: &mut dyn Tracer, name: &'static str) {
    tracer.trace_edge(GcThing::group(group.id().0), name);
}

/// Report the edges held by `stub`
pub fn trace_stub(stub: &Stub, tracer: &mut dyn Tracer) {
    if let Some(code) = stub.code() {
        tracer.trace_edge(GcThing::code(code.id().0), "stub-code");
    }

    match stub.data() {
        StubData::None => {}
        StubData::Slot { group, shape, .. } => {
            trace_shape(shape, tracer, "stub-shape");
            if let Some(group) = group {
                trace_group(group, tracer, "stub-group");
            }
        }
        StubData::Shape { shape, .. } | StubData::HasProp { shape, .. } => {
            trace_shape(shape, tracer, "stub-shape");
        }
        StubData::AddSlot {
            group,
            old_shape,
            new_shape,
        } => {
            trace_group(group, tracer, "stub-group");
            trace_shape(old_shape, tracer, "stub-old-shape");
            trace_shape(new_shape, tracer, "stub-new-shape");
        }
        StubData::Callee(callee) => {
            tracer.trace_edge(GcThing::object(callee.id().0), "stub-callee");
        }
        StubData::Prototype { ctor, shape, .. } => {
            tracer.trace_edge(GcThing::object(ctor.id().0), "stub-ctor");
            trace_shape(shape, tracer, "stub-shape");
        }
    }

    match stub.kind().type_guard() {
        Some(TypeGuard::SingleObject(obj)) => {
            tracer.trace_edge(GcThing::object(obj.id().0), "type-guard-object");
        }
        Some(TypeGuard::ObjectGroup(group)) => trace_group(group, tracer, "type-guard-group"),
        _ => {}
    }
}
