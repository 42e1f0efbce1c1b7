//! Script values

use crate::object::ObjectRef;
use crate::types::ValueType;
use std::fmt;
use std::sync::Arc;

/// Sentinel values the interpreter keeps in slots but never hands to scripts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MagicKind {
    /// A `let`/`const` binding read before initialization
    UninitializedLexical,
    /// A value an optimized frame did not keep alive
    OptimizedOut,
}

/// A script value
#[derive(Clone)]
pub enum Value {
    /// `undefined`
    Undefined,
    /// `null`
    Null,
    /// Boolean
    Boolean(bool),
    /// Number in 32-bit integer representation
    Int32(i32),
    /// Number in double representation
    Double(f64),
    /// Immutable string
    String(Arc<str>),
    /// Symbol, identified by its registry id
    Symbol(u32),
    /// Heap object
    Object(ObjectRef),
    /// Interpreter-internal sentinel
    Magic(MagicKind),
}

impl Value {
    /// Build a string value
    pub fn string(s: &str) -> Self {
        Value::String(Arc::from(s))
    }

    /// Build a number, preferring the Int32 representation when exact.
    ///
    /// -0 stays a double.
    pub fn number(n: f64) -> Self {
        if n.fract() == 0.0
            && n >= i32::MIN as f64
            && n <= i32::MAX as f64
            && !(n == 0.0 && n.is_sign_negative())
        {
            Value::Int32(n as i32)
        } else {
            Value::Double(n)
        }
    }

    /// Type tag
    pub fn value_type(&self) -> ValueType {
        match self {
            Value::Undefined => ValueType::Undefined,
            Value::Null => ValueType::Null,
            Value::Boolean(_) => ValueType::Boolean,
            Value::Int32(_) => ValueType::Int32,
            Value::Double(_) => ValueType::Double,
            Value::String(_) => ValueType::String,
            Value::Symbol(_) => ValueType::Symbol,
            Value::Object(_) => ValueType::Object,
            Value::Magic(_) => ValueType::Magic,
        }
    }

    /// Whether this is a script-visible non-object value
    pub fn is_primitive(&self) -> bool {
        !matches!(self, Value::Object(_) | Value::Magic(_))
    }

    /// Whether this is Int32 or Double
    pub fn is_number(&self) -> bool {
        matches!(self, Value::Int32(_) | Value::Double(_))
    }

    /// Numeric value of Int32 or Double
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Int32(i) => Some(*i as f64),
            Value::Double(d) => Some(*d),
            _ => None,
        }
    }

    /// Object payload
    pub fn as_object(&self) -> Option<&ObjectRef> {
        match self {
            Value::Object(obj) => Some(obj),
            _ => None,
        }
    }

    /// String payload
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// Whether this is an interpreter sentinel
    pub fn is_magic(&self) -> bool {
        matches!(self, Value::Magic(_))
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Value::Int32(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Double(value)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Boolean(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::string(value)
    }
}

impl From<ObjectRef> for Value {
    fn from(value: ObjectRef) -> Self {
        Value::Object(value)
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Undefined => f.write_str("undefined"),
            Value::Null => f.write_str("null"),
            Value::Boolean(b) => write!(f, "{b}"),
            Value::Int32(i) => write!(f, "{i}i"),
            Value::Double(d) => write!(f, "{d:?}d"),
            Value::String(s) => write!(f, "{s:?}"),
            Value::Symbol(id) => write!(f, "Symbol({id})"),
            Value::Object(obj) => write!(f, "[{:?} #{}]", obj.class(), obj.id().0),
            Value::Magic(kind) => write!(f, "<magic {kind:?}>"),
        }
    }
}

/// SameValue: NaN equals itself, +0 and -0 differ, objects compare by identity.
///
/// Representation matters: `Int32(1)` and `Double(1.0)` are different.
pub fn same_value(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Undefined, Value::Undefined) | (Value::Null, Value::Null) => true,
        (Value::Boolean(x), Value::Boolean(y)) => x == y,
        (Value::Int32(x), Value::Int32(y)) => x == y,
        (Value::Double(x), Value::Double(y)) => x.to_bits() == y.to_bits() || (x.is_nan() && y.is_nan()),
        (Value::String(x), Value::String(y)) => x == y,
        (Value::Symbol(x), Value::Symbol(y)) => x == y,
        (Value::Object(x), Value::Object(y)) => Arc::ptr_eq(x, y),
        (Value::Magic(x), Value::Magic(y)) => x == y,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_number_normalization() {
        assert!(matches!(Value::number(3.0), Value::Int32(3)));
        assert!(matches!(Value::number(-0.0), Value::Double(d) if d.is_sign_negative()));
        assert!(matches!(Value::number(0.5), Value::Double(_)));
        assert!(matches!(Value::number(2147483648.0), Value::Double(_)));
        assert!(matches!(Value::number(-2147483648.0), Value::Int32(i32::MIN)));
        assert!(matches!(Value::number(f64::NAN), Value::Double(_)));
    }

    #[test]
    fn test_same_value_edge_cases() {
        assert!(same_value(&Value::Double(f64::NAN), &Value::Double(f64::NAN)));
        assert!(!same_value(&Value::Double(0.0), &Value::Double(-0.0)));
        assert!(!same_value(&Value::Int32(1), &Value::Double(1.0)));
        assert!(same_value(&Value::string("a"), &Value::string("a")));
    }

    #[test]
    fn test_primitive_classification() {
        assert!(Value::Null.is_primitive());
        assert!(Value::Symbol(1).is_primitive());
        assert!(!Value::Magic(MagicKind::OptimizedOut).is_primitive());
    }
}
