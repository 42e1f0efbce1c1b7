//! IC engine errors
//!
//! These are attach-side errors only. Errors of the operation itself are
//! `VmError`s and pass through dispatch untouched.

use crate::codegen::CodegenError;
use heron_vm_bytecode::{BytecodeError, PcOffset};
use heron_vm_core::VmError;
use thiserror::Error;

/// Errors raised while attaching stubs or resolving entries
#[derive(Debug, Error)]
pub enum IcError {
    /// The stub arena is full
    #[error("out of memory allocating {what}")]
    OutOfMemory {
        /// What was being allocated
        what: &'static str,
    },

    /// The codegen strategy failed
    #[error("stub codegen failed: {0}")]
    Codegen(#[from] CodegenError),

    /// No IC entry exists at the given offset
    #[error("no IC entry at offset {0}")]
    NoEntry(PcOffset),

    /// The unit's bytecode is malformed
    #[error(transparent)]
    Bytecode(#[from] BytecodeError),
}

impl From<IcError> for VmError {
    fn from(err: IcError) -> Self {
        match err {
            IcError::OutOfMemory { .. } => VmError::OutOfMemory,
            IcError::Bytecode(err) => VmError::Bytecode(err),
            other => VmError::internal(other.to_string()),
        }
    }
}

/// Result of an attach-side operation
pub type Result<T> = std::result::Result<T, IcError>;
