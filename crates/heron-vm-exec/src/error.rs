//! OSR errors

use heron_vm_bytecode::{PcOffset, ScriptId};
use heron_vm_core::VmError;
use thiserror::Error;

/// Errors raised while preparing or performing a transfer
#[derive(Debug, Error)]
pub enum OsrError {
    /// The snapshot region cannot hold the frame
    #[error("out of memory: snapshot of {requested} bytes, {available} available")]
    OutOfMemory {
        /// Bytes the snapshot needs
        requested: usize,
        /// Bytes left in the region
        available: usize,
    },

    /// The unit has no compiled OSR code
    #[error("no compiled OSR code for {0:?}")]
    NoCompiledCode(ScriptId),

    /// The compiled code enters at another loop
    #[error("compiled OSR entry is at {expected}, frame is at {actual}")]
    PcMismatch {
        /// Entry offset of the compiled code
        expected: PcOffset,
        /// Offset of the frame
        actual: PcOffset,
    },

    /// The compiled code would bail out immediately
    #[error("compiled code expects to bail out at entry")]
    BailoutExpected,

    /// The optimizing tier rejected the unit
    #[error("OSR compile failed: {0}")]
    Compile(String),

    /// A frame state does not fit the frame it is restored into
    #[error("invalid frame state: {0}")]
    InvalidFrameState(String),

    /// The compiled code raised an operation error
    #[error(transparent)]
    Vm(#[from] VmError),
}

impl From<OsrError> for VmError {
    fn from(err: OsrError) -> Self {
        match err {
            OsrError::OutOfMemory { .. } => VmError::OutOfMemory,
            OsrError::Vm(err) => err,
            other => VmError::internal(other.to_string()),
        }
    }
}

/// Result of an OSR operation
pub type Result<T> = std::result::Result<T, OsrError>;
