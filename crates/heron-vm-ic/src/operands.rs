//! Operands handed to a dispatch

use heron_vm_core::Value;

/// Operand values of one IC dispatch.
///
/// Which variant a site takes depends on its kind:
///
/// | kind | operands |
/// |---|---|
/// | ToBool, UnaryArith, TypeOf, GetIterator, GetProp, TypeMonitor | `Unary(value)` |
/// | BinaryArith, Compare | `Binary(lhs, rhs)` |
/// | GetElem | `Binary(object, index)` |
/// | In, HasOwn | `Binary(key, object)` |
/// | InstanceOf | `Binary(value, constructor)` |
/// | SetProp | `Binary(object, rhs)` |
/// | SetElem | `Ternary(object, index, rhs)` |
/// | Call | `Call { .. }` |
/// | WarmUpCounter | `None` |
#[derive(Debug, Clone, Copy)]
pub enum IcOperands<'a> {
    /// No operands
    None,
    /// One operand
    Unary(&'a Value),
    /// Two operands
    Binary(&'a Value, &'a Value),
    /// Three operands
    Ternary(&'a Value, &'a Value, &'a Value),
    /// Callee, receiver and arguments
    Call {
        /// Value being called
        callee: &'a Value,
        /// Receiver
        this: &'a Value,
        /// Arguments
        args: &'a [Value],
    },
}

impl<'a> IcOperands<'a> {
    /// The single operand of a unary site
    pub fn unary(&self) -> Option<&'a Value> {
        match *self {
            IcOperands::Unary(value) => Some(value),
            _ => None,
        }
    }

    /// Both operands of a binary site
    pub fn binary(&self) -> Option<(&'a Value, &'a Value)> {
        match *self {
            IcOperands::Binary(lhs, rhs) => Some((lhs, rhs)),
            _ => None,
        }
    }

    /// Operands of a three-operand site
    pub fn ternary(&self) -> Option<(&'a Value, &'a Value, &'a Value)> {
        match *self {
            IcOperands::Ternary(a, b, c) => Some((a, b, c)),
            _ => None,
        }
    }

    /// Callee of a call site
    pub fn callee(&self) -> Option<&'a Value> {
        match *self {
            IcOperands::Call { callee, .. } => Some(callee),
            _ => None,
        }
    }
}
