//! Bytecode operands

use serde::{Deserialize, Serialize};
use std::fmt;

/// Offset of an instruction within its unit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(transparent)]
pub struct PcOffset(pub u32);

impl PcOffset {
    /// Sentinel for entries that do not belong to an instruction
    /// (argument and `this` type checks in a function prologue)
    pub const NON_OP: PcOffset = PcOffset(u32::MAX);

    /// Create a new offset
    #[inline]
    pub const fn new(offset: u32) -> Self {
        Self(offset)
    }

    /// Get the raw offset
    #[inline]
    pub const fn get(self) -> u32 {
        self.0
    }

    /// Whether this is the prologue sentinel
    #[inline]
    pub const fn is_non_op(self) -> bool {
        self.0 == u32::MAX
    }
}

impl fmt::Display for PcOffset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_non_op() {
            f.write_str("<prologue>")
        } else {
            write!(f, "{:05}", self.0)
        }
    }
}

/// Index into a unit's name pool
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(transparent)]
pub struct NameIndex(pub u32);

impl NameIndex {
    /// Create a new name index
    #[inline]
    pub const fn new(index: u32) -> Self {
        Self(index)
    }

    /// Get index value
    #[inline]
    pub const fn index(self) -> u32 {
        self.0
    }
}

/// Index into local variables
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(transparent)]
pub struct LocalIndex(pub u16);

impl LocalIndex {
    /// Create a new local index
    #[inline]
    pub const fn new(index: u16) -> Self {
        Self(index)
    }

    /// Get index value
    #[inline]
    pub const fn index(self) -> u16 {
        self.0
    }
}

impl From<u16> for LocalIndex {
    fn from(index: u16) -> Self {
        Self(index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_non_op_sorts_after_every_instruction() {
        assert!(PcOffset::new(0) < PcOffset::NON_OP);
        assert!(PcOffset::new(u32::MAX - 1) < PcOffset::NON_OP);
        assert!(PcOffset::NON_OP.is_non_op());
        assert_eq!(PcOffset::NON_OP.to_string(), "<prologue>");
        assert_eq!(PcOffset::new(12).to_string(), "00012");
    }
}
