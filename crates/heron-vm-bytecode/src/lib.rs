//! # Heron VM Bytecode
//!
//! Bytecode units as seen by the inline-cache engine. A unit is a flat list
//! of instructions addressed by `PcOffset`; every instruction whose opcode
//! has an `IcKind` owns exactly one IC entry once the unit is prepared for
//! execution.

#![warn(clippy::all)]
#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod error;
pub mod instruction;
pub mod operand;
pub mod script;

pub use error::{BytecodeError, Result};
pub use instruction::{BinaryOp, CompareOp, IcKind, Instruction, Opcode, UnaryOp};
pub use operand::{LocalIndex, NameIndex, PcOffset};
pub use script::{Script, ScriptBuilder, ScriptId};
