//! Bytecode errors

use thiserror::Error;

/// Errors that can occur while building or reading a bytecode unit
#[derive(Debug, Error)]
pub enum BytecodeError {
    /// Name index outside the unit's name pool
    #[error("Invalid name index: {0}")]
    InvalidName(u32),

    /// Local slot outside the unit's declared locals
    #[error("Invalid local slot {index} (unit declares {count})")]
    InvalidLocal {
        /// Referenced slot
        index: u16,
        /// Declared slot count
        count: u16,
    },

    /// Jump target past the end of the unit
    #[error("Invalid jump target {target} at offset {at}")]
    InvalidJump {
        /// Offending instruction
        at: u32,
        /// Target offset
        target: u32,
    },

    /// Serialized unit could not be decoded
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type for bytecode operations
pub type Result<T> = std::result::Result<T, BytecodeError>;
