//! VM error types

use thiserror::Error;

/// Errors raised by operations. Inline caches propagate these unchanged.
#[derive(Debug, Error)]
pub enum VmError {
    /// Type error (e.g., calling a non-function)
    #[error("TypeError: {0}")]
    TypeError(String),

    /// Range error
    #[error("RangeError: {0}")]
    RangeError(String),

    /// Internal error (magic value leaked into an operation, ...)
    #[error("InternalError: {0}")]
    InternalError(String),

    /// Out of memory
    #[error("OutOfMemory")]
    OutOfMemory,

    /// Exception thrown by a native function
    #[error("Uncaught exception: {0}")]
    Thrown(String),

    /// Bytecode error
    #[error("Bytecode error: {0}")]
    Bytecode(#[from] heron_vm_bytecode::BytecodeError),
}

impl VmError {
    /// Build a `TypeError`
    pub fn type_error(message: impl Into<String>) -> Self {
        VmError::TypeError(message.into())
    }

    /// Build an `InternalError`
    pub fn internal(message: impl Into<String>) -> Self {
        VmError::InternalError(message.into())
    }
}

/// Result of a VM operation
pub type VmResult<T> = std::result::Result<T, VmError>;
