//! Instructions and the IC kind each one needs

use crate::operand::{LocalIndex, NameIndex, PcOffset};
use serde::{Deserialize, Serialize};

/// Binary arithmetic and bitwise operators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BinaryOp {
    /// `+` (numeric add or string concatenation)
    Add,
    /// `-`
    Sub,
    /// `*`
    Mul,
    /// `/`
    Div,
    /// `%`
    Mod,
    /// `**`
    Pow,
    /// `&`
    BitAnd,
    /// `|`
    BitOr,
    /// `^`
    BitXor,
    /// `<<`
    Lsh,
    /// `>>`
    Rsh,
    /// `>>>`
    Ursh,
}

impl BinaryOp {
    /// Every binary operator
    pub const ALL: [BinaryOp; 12] = [
        BinaryOp::Add,
        BinaryOp::Sub,
        BinaryOp::Mul,
        BinaryOp::Div,
        BinaryOp::Mod,
        BinaryOp::Pow,
        BinaryOp::BitAnd,
        BinaryOp::BitOr,
        BinaryOp::BitXor,
        BinaryOp::Lsh,
        BinaryOp::Rsh,
        BinaryOp::Ursh,
    ];

    /// Whether the operator works on 32-bit integers
    pub const fn is_bitwise(self) -> bool {
        matches!(
            self,
            BinaryOp::BitAnd
                | BinaryOp::BitOr
                | BinaryOp::BitXor
                | BinaryOp::Lsh
                | BinaryOp::Rsh
                | BinaryOp::Ursh
        )
    }
}

/// Unary arithmetic operators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UnaryOp {
    /// `-x`
    Neg,
    /// `~x`
    BitNot,
    /// `x + 1`
    Inc,
    /// `x - 1`
    Dec,
}

impl UnaryOp {
    /// Every unary operator
    pub const ALL: [UnaryOp; 4] = [UnaryOp::Neg, UnaryOp::BitNot, UnaryOp::Inc, UnaryOp::Dec];
}

/// Comparison operators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CompareOp {
    /// `<`
    Lt,
    /// `<=`
    Le,
    /// `>`
    Gt,
    /// `>=`
    Ge,
    /// `==`
    Eq,
    /// `!=`
    Ne,
    /// `===`
    StrictEq,
    /// `!==`
    StrictNe,
}

impl CompareOp {
    /// Every comparison operator
    pub const ALL: [CompareOp; 8] = [
        CompareOp::Lt,
        CompareOp::Le,
        CompareOp::Gt,
        CompareOp::Ge,
        CompareOp::Eq,
        CompareOp::Ne,
        CompareOp::StrictEq,
        CompareOp::StrictNe,
    ];

    /// Whether this is one of the four equality operators
    pub const fn is_equality(self) -> bool {
        matches!(
            self,
            CompareOp::Eq | CompareOp::Ne | CompareOp::StrictEq | CompareOp::StrictNe
        )
    }
}

/// Which inline cache an instruction owns
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IcKind {
    /// Truthiness test of a conditional jump
    ToBool,
    /// Unary arithmetic
    UnaryArith,
    /// Binary arithmetic
    BinaryArith,
    /// Comparison
    Compare,
    /// Named property read
    GetProp,
    /// Named property write
    SetProp,
    /// Indexed element read
    GetElem,
    /// Indexed element write
    SetElem,
    /// `key in object`
    In,
    /// Own-property test
    HasOwn,
    /// `value instanceof constructor`
    InstanceOf,
    /// Function call
    Call,
    /// `typeof`
    TypeOf,
    /// Iterator creation
    GetIterator,
    /// Result-type check of a value the interpreter loads itself
    TypeMonitor,
    /// Loop-entry warm-up counter driving on-stack replacement
    WarmUpCounter,
}

impl IcKind {
    /// Whether results produced at this site are routed through a monitor chain
    pub const fn is_monitored(self) -> bool {
        matches!(
            self,
            IcKind::GetProp | IcKind::GetElem | IcKind::Call | IcKind::TypeMonitor
        )
    }
}

/// Bytecode operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Opcode {
    /// No operation
    Nop,
    /// Read a local slot
    GetLocal(LocalIndex),
    /// Write a local slot
    SetLocal(LocalIndex),
    /// Read a closed-over variable; the result is type monitored
    GetAliasedVar(LocalIndex),
    /// Unconditional jump
    Jump(PcOffset),
    /// Jump when the operand is falsy
    JumpIfFalse(PcOffset),
    /// Loop header, counts iterations for tier-up
    LoopEntry,
    /// Binary arithmetic
    Binary(BinaryOp),
    /// Unary arithmetic
    Unary(UnaryOp),
    /// Comparison
    Compare(CompareOp),
    /// `obj.name`
    GetProp(NameIndex),
    /// `obj.name = value`
    SetProp(NameIndex),
    /// `obj[index]`
    GetElem,
    /// `obj[index] = value`
    SetElem,
    /// `key in obj`
    In,
    /// Whether `key` is an own property of `obj`
    HasOwn,
    /// `value instanceof ctor`
    InstanceOf,
    /// Call with `argc` arguments
    Call(u8),
    /// `typeof value`
    TypeOf,
    /// `value[Symbol.iterator]()`
    GetIterator,
    /// Return from the unit
    Return,
}

impl Opcode {
    /// IC owned by instructions with this opcode, if any
    pub const fn ic_kind(self) -> Option<IcKind> {
        match self {
            Opcode::Nop
            | Opcode::GetLocal(_)
            | Opcode::SetLocal(_)
            | Opcode::Jump(_)
            | Opcode::Return => None,
            Opcode::GetAliasedVar(_) => Some(IcKind::TypeMonitor),
            Opcode::JumpIfFalse(_) => Some(IcKind::ToBool),
            Opcode::LoopEntry => Some(IcKind::WarmUpCounter),
            Opcode::Binary(_) => Some(IcKind::BinaryArith),
            Opcode::Unary(_) => Some(IcKind::UnaryArith),
            Opcode::Compare(_) => Some(IcKind::Compare),
            Opcode::GetProp(_) => Some(IcKind::GetProp),
            Opcode::SetProp(_) => Some(IcKind::SetProp),
            Opcode::GetElem => Some(IcKind::GetElem),
            Opcode::SetElem => Some(IcKind::SetElem),
            Opcode::In => Some(IcKind::In),
            Opcode::HasOwn => Some(IcKind::HasOwn),
            Opcode::InstanceOf => Some(IcKind::InstanceOf),
            Opcode::Call(_) => Some(IcKind::Call),
            Opcode::TypeOf => Some(IcKind::TypeOf),
            Opcode::GetIterator => Some(IcKind::GetIterator),
        }
    }

    /// Short mnemonic used in diagnostics
    pub const fn name(self) -> &'static str {
        match self {
            Opcode::Nop => "Nop",
            Opcode::GetLocal(_) => "GetLocal",
            Opcode::SetLocal(_) => "SetLocal",
            Opcode::GetAliasedVar(_) => "GetAliasedVar",
            Opcode::Jump(_) => "Jump",
            Opcode::JumpIfFalse(_) => "JumpIfFalse",
            Opcode::LoopEntry => "LoopEntry",
            Opcode::Binary(_) => "Binary",
            Opcode::Unary(_) => "Unary",
            Opcode::Compare(_) => "Compare",
            Opcode::GetProp(_) => "GetProp",
            Opcode::SetProp(_) => "SetProp",
            Opcode::GetElem => "GetElem",
            Opcode::SetElem => "SetElem",
            Opcode::In => "In",
            Opcode::HasOwn => "HasOwn",
            Opcode::InstanceOf => "InstanceOf",
            Opcode::Call(_) => "Call",
            Opcode::TypeOf => "TypeOf",
            Opcode::GetIterator => "GetIterator",
            Opcode::Return => "Return",
        }
    }
}

/// A single instruction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Instruction {
    /// Operation
    pub opcode: Opcode,
}

impl Instruction {
    /// Wrap an opcode
    pub const fn new(opcode: Opcode) -> Self {
        Self { opcode }
    }
}

impl From<Opcode> for Instruction {
    fn from(opcode: Opcode) -> Self {
        Self { opcode }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ic_kind_classification() {
        assert_eq!(Opcode::Nop.ic_kind(), None);
        assert_eq!(Opcode::Return.ic_kind(), None);
        assert_eq!(
            Opcode::JumpIfFalse(PcOffset::new(3)).ic_kind(),
            Some(IcKind::ToBool)
        );
        assert_eq!(Opcode::LoopEntry.ic_kind(), Some(IcKind::WarmUpCounter));
        assert_eq!(
            Opcode::GetAliasedVar(LocalIndex::new(0)).ic_kind(),
            Some(IcKind::TypeMonitor)
        );
        assert_eq!(Opcode::SetElem.ic_kind(), Some(IcKind::SetElem));
        assert_eq!(Opcode::HasOwn.ic_kind(), Some(IcKind::HasOwn));
        assert_eq!(Opcode::InstanceOf.name(), "InstanceOf");
    }

    #[test]
    fn test_monitored_kinds() {
        assert!(IcKind::GetProp.is_monitored());
        assert!(IcKind::Call.is_monitored());
        assert!(!IcKind::SetProp.is_monitored());
        assert!(!IcKind::SetElem.is_monitored());
        assert!(!IcKind::InstanceOf.is_monitored());
        assert!(!IcKind::BinaryArith.is_monitored());
    }
}
