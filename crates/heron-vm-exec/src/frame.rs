//! Interpreter frames and their transferable state
//!
//! A frame owns its receiver, arguments and slots (locals followed by the
//! expression stack). Only the slots and the pc travel into compiled code;
//! both tiers read arguments and the receiver from the interpreter frame.

use crate::error::{OsrError, Result};
use heron_vm_bytecode::{PcOffset, Script};
use heron_vm_core::Value;
use std::sync::Arc;

/// Fixed part of a frame as laid out for compiled code
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(C)]
pub struct FrameHeader {
    /// Owning unit
    pub script: u32,
    /// Resume offset
    pub pc: u32,
    /// Number of slots following the header
    pub slot_count: u32,
    /// `FrameHeader::DEBUGGEE`, ...
    pub flags: u32,
    /// Return value, NaN-boxed
    pub return_value: u64,
}

impl FrameHeader {
    /// The frame is observed by a debugger
    pub const DEBUGGEE: u32 = 1 << 0;
}

/// Size of the fixed frame part
pub const FIXED_FRAME_SIZE: usize = std::mem::size_of::<FrameHeader>();

/// Size of one slot
pub const SLOT_SIZE: usize = 8;

/// A live interpreter frame
#[derive(Debug)]
pub struct InterpreterFrame {
    script: Arc<Script>,
    pc: PcOffset,
    this: Value,
    args: Vec<Value>,
    slots: Vec<Value>,
    debuggee: bool,
}

impl InterpreterFrame {
    /// Frame at offset 0 with every local `undefined`
    pub fn new(script: Arc<Script>, this: Value, args: Vec<Value>) -> Self {
        let slots = vec![Value::Undefined; script.local_count() as usize];
        Self {
            script,
            pc: PcOffset::new(0),
            this,
            args,
            slots,
            debuggee: false,
        }
    }

    /// The unit this frame executes
    pub fn script(&self) -> &Arc<Script> {
        &self.script
    }

    /// Current offset
    pub fn pc(&self) -> PcOffset {
        self.pc
    }

    /// Move to `pc`
    pub fn set_pc(&mut self, pc: PcOffset) {
        self.pc = pc;
    }

    /// The receiver
    pub fn this(&self) -> &Value {
        &self.this
    }

    /// Argument `index`, `undefined` when not passed
    pub fn arg(&self, index: usize) -> Value {
        self.args.get(index).cloned().unwrap_or(Value::Undefined)
    }

    /// Overwrite argument `index` in place
    pub fn set_arg(&mut self, index: usize, value: Value) {
        if let Some(slot) = self.args.get_mut(index) {
            *slot = value;
        }
    }

    /// Number of passed arguments
    pub fn arg_count(&self) -> usize {
        self.args.len()
    }

    /// Local `index`
    pub fn local(&self, index: usize) -> Option<&Value> {
        self.slots.get(index)
    }

    /// Overwrite local `index`
    pub fn set_local(&mut self, index: usize, value: Value) {
        if let Some(slot) = self.slots.get_mut(index) {
            *slot = value;
        }
    }

    /// Push onto the expression stack
    pub fn push(&mut self, value: Value) {
        self.slots.push(value);
    }

    /// Pop from the expression stack. Locals are never popped.
    pub fn pop(&mut self) -> Option<Value> {
        if self.slots.len() > self.script.local_count() as usize {
            self.slots.pop()
        } else {
            None
        }
    }

    /// Locals followed by the expression stack
    pub fn slots(&self) -> &[Value] {
        &self.slots
    }

    /// Number of live slots
    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }

    /// Whether a debugger observes this frame
    pub fn is_debuggee(&self) -> bool {
        self.debuggee
    }

    /// Flag the frame as observed by a debugger
    pub fn set_debuggee(&mut self, debuggee: bool) {
        self.debuggee = debuggee;
    }

    /// Header describing this frame
    pub fn header(&self) -> FrameHeader {
        FrameHeader {
            script: self.script.id().0,
            pc: self.pc.get(),
            slot_count: self.slots.len() as u32,
            flags: if self.debuggee { FrameHeader::DEBUGGEE } else { 0 },
            return_value: 0,
        }
    }

    /// Bytes a copy of this frame occupies in compiled code
    pub fn byte_size(&self) -> usize {
        FIXED_FRAME_SIZE + self.slots.len() * SLOT_SIZE
    }
}

/// Pc and slot values of a frame. The snapshot encodes a frame into this
/// layout and a bailout decodes it back.
#[derive(Debug, Clone)]
pub struct FrameState {
    /// Resume offset
    pub pc: PcOffset,
    /// Locals followed by the expression stack
    pub slots: Vec<Value>,
}

impl FrameState {
    /// Copy the pc and slots of `frame`
    pub fn capture(frame: &InterpreterFrame) -> Self {
        Self {
            pc: frame.pc,
            slots: frame.slots.clone(),
        }
    }
}

/// Write `state` back into `frame`
pub fn restore_frame(frame: &mut InterpreterFrame, state: &FrameState) -> Result<()> {
    let locals = frame.script.local_count() as usize;
    if state.slots.len() < locals {
        return Err(OsrError::InvalidFrameState(format!(
            "{} slots cannot hold {locals} locals",
            state.slots.len()
        )));
    }
    if frame.script.instruction(state.pc).is_none() {
        return Err(OsrError::InvalidFrameState(format!(
            "offset {} is outside the unit",
            state.pc
        )));
    }
    frame.pc = state.pc;
    frame.slots.clear();
    frame.slots.extend(state.slots.iter().cloned());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use heron_vm_bytecode::Opcode;
    use heron_vm_core::same_value;

    fn looping_script(locals: u16) -> Arc<Script> {
        Arc::new(
            Script::builder()
                .function(2)
                .local_count(locals)
                .op(Opcode::LoopEntry)
                .op(Opcode::Return)
                .build()
                .unwrap(),
        )
    }

    #[test]
    fn test_header_layout() {
        assert_eq!(FIXED_FRAME_SIZE, 24);
        let mut frame = InterpreterFrame::new(looping_script(3), Value::Undefined, vec![]);
        frame.set_debuggee(true);
        let header = frame.header();
        assert_eq!(header.slot_count, 3);
        assert_eq!(header.flags & FrameHeader::DEBUGGEE, FrameHeader::DEBUGGEE);
        assert_eq!(frame.byte_size(), FIXED_FRAME_SIZE + 3 * SLOT_SIZE);
    }

    #[test]
    fn test_pop_keeps_locals() {
        let mut frame = InterpreterFrame::new(looping_script(1), Value::Undefined, vec![]);
        frame.push(Value::Int32(7));
        assert_eq!(frame.slot_count(), 2);
        assert!(matches!(frame.pop(), Some(Value::Int32(7))));
        assert!(frame.pop().is_none());
        assert_eq!(frame.slot_count(), 1);
    }

    #[test]
    fn test_restore_round_trips_state() {
        let mut frame = InterpreterFrame::new(looping_script(2), Value::Undefined, vec![Value::Int32(1)]);
        frame.set_local(0, Value::Int32(5));
        frame.push(Value::Boolean(true));
        let state = FrameState::capture(&frame);

        let mut other = InterpreterFrame::new(looping_script(2), Value::Undefined, vec![]);
        other.set_pc(PcOffset::new(1));
        restore_frame(&mut other, &state).unwrap();
        assert_eq!(other.pc(), PcOffset::new(0));
        assert_eq!(other.slot_count(), 3);
        assert!(same_value(other.local(0).unwrap(), &Value::Int32(5)));
        // Arguments are not part of the state
        assert_eq!(other.arg_count(), 0);
    }

    #[test]
    fn test_restore_rejects_short_state() {
        let mut frame = InterpreterFrame::new(looping_script(2), Value::Undefined, vec![]);
        let state = FrameState {
            pc: PcOffset::new(0),
            slots: vec![Value::Null],
        };
        assert!(matches!(restore_frame(&mut frame, &state), Err(OsrError::InvalidFrameState(_))));

        let state = FrameState {
            pc: PcOffset::new(40),
            slots: vec![Value::Null, Value::Null],
        };
        assert!(restore_frame(&mut frame, &state).is_err());
        assert_eq!(frame.pc(), PcOffset::new(0));
    }
}
