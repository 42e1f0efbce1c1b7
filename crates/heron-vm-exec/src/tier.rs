//! Boundary with the optimizing tier
//!
//! The tier is a black box: it compiles a unit for entry at a loop and
//! runs that code from a snapshot. Control comes back either with the
//! unit's return value or with a frame state to resume interpreting from.

use crate::error::Result;
use crate::frame::{FrameState, InterpreterFrame};
use crate::osr::OsrSnapshot;
use heron_vm_bytecode::{PcOffset, Script};
use heron_vm_core::{Value, VmResult};
use std::fmt;
use std::sync::Arc;

/// Opaque machine entry point of compiled code
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CodeEntry(pub u64);

impl fmt::Display for CodeEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "code@{:#x}", self.0)
    }
}

/// Compiled code of a unit, enterable at one loop
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OsrCode {
    /// Machine entry point
    pub entry: CodeEntry,
    /// Loop-entry offset the code can be entered at
    pub osr_pc: PcOffset,
    /// The code would bail out right after entry
    pub bailout_expected: bool,
}

/// Reason compiled code handed control back to the interpreter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BailoutReason {
    /// A speculated value type did not hold.
    TypeGuardFailure,
    /// Int32 arithmetic overflowed.
    Overflow,
    /// The compiled code reached an operation it has no code for.
    UnsupportedOperation,
}

/// How control left compiled code
#[derive(Debug, Clone)]
pub enum TierExit {
    /// The unit returned
    Returned(Value),
    /// Resume interpreting from `state`
    Bailout {
        /// Why the code bailed out
        reason: BailoutReason,
        /// Frame to resume from, in snapshot layout
        state: FrameState,
    },
}

/// Tier-up progress of a unit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TierState {
    /// Below the warm-up threshold
    Interpreting,
    /// Compilation is in progress
    CompileRequested,
    /// The tier rejected the unit. Never retried.
    CompileFailed,
    /// Compiled code is available
    CompileSucceeded,
    /// A snapshot of the live frame exists
    TransferPrepared,
    /// Control is inside compiled code
    Transferred,
}

/// An optimizing compiler tier
pub trait OptimizingTier: Send + Sync {
    /// Compile `script` for entry at the loop at `pc`
    fn compile(&self, script: &Arc<Script>, pc: PcOffset) -> Result<OsrCode>;

    /// Run `code` from `snapshot`. Arguments and the receiver are read from
    /// `frame`, which is not modified while compiled code runs.
    fn enter(&self, code: &OsrCode, snapshot: &OsrSnapshot, frame: &InterpreterFrame) -> VmResult<TierExit>;
}
