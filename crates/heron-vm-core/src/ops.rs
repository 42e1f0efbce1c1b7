//! Canonical operations
//!
//! The always-correct implementation of every operation an inline cache
//! specializes. Fallback handlers call these directly. Specialized stubs
//! must produce exactly the same value, representation included, for every
//! input their guard accepts.

use crate::error::{VmError, VmResult};
use crate::object::{ObjectClass, ObjectRef, PropertyKey};
use crate::realm::Realm;
use crate::value::Value;
use heron_vm_bytecode::{BinaryOp, CompareOp, UnaryOp};
use std::sync::Arc;

const TWO_32: f64 = 4_294_967_296.0;

/// ToNumber
pub fn to_number(value: &Value) -> VmResult<f64> {
    Ok(match value {
        Value::Undefined => f64::NAN,
        Value::Null => 0.0,
        Value::Boolean(b) => f64::from(u8::from(*b)),
        Value::Int32(i) => f64::from(*i),
        Value::Double(d) => *d,
        Value::String(s) => string_to_number(s),
        Value::Symbol(_) => {
            return Err(VmError::type_error("Cannot convert a Symbol value to a number"));
        }
        Value::Object(_) => f64::NAN,
        Value::Magic(kind) => {
            return Err(VmError::internal(format!("magic value {kind:?} used as operand")));
        }
    })
}

fn string_to_number(s: &str) -> f64 {
    let trimmed = s.trim();
    if trimmed.is_empty() {
        return 0.0;
    }
    match trimmed {
        "Infinity" | "+Infinity" => return f64::INFINITY,
        "-Infinity" => return f64::NEG_INFINITY,
        _ => {}
    }
    if let Some(hex) = trimmed.strip_prefix("0x").or_else(|| trimmed.strip_prefix("0X")) {
        return u64::from_str_radix(hex, 16).map_or(f64::NAN, |v| v as f64);
    }
    // Rust accepts "inf"/"nan" spellings that scripts do not
    if trimmed.bytes().any(|b| b.is_ascii_alphabetic() && b != b'e' && b != b'E') {
        return f64::NAN;
    }
    trimmed.parse::<f64>().unwrap_or(f64::NAN)
}

/// ToInt32
pub fn to_int32(n: f64) -> i32 {
    if !n.is_finite() {
        return 0;
    }
    let m = n.trunc().rem_euclid(TWO_32);
    if m >= TWO_32 / 2.0 {
        (m - TWO_32) as i32
    } else {
        m as i32
    }
}

/// ToUint32
pub fn to_uint32(n: f64) -> u32 {
    to_int32(n) as u32
}

/// ToBoolean
pub fn to_boolean(value: &Value) -> bool {
    match value {
        Value::Undefined | Value::Null | Value::Magic(_) => false,
        Value::Boolean(b) => *b,
        Value::Int32(i) => *i != 0,
        Value::Double(d) => !(*d == 0.0 || d.is_nan()),
        Value::String(s) => !s.is_empty(),
        Value::Symbol(_) | Value::Object(_) => true,
    }
}

/// `typeof`
pub fn type_of(value: &Value) -> &'static str {
    match value {
        Value::Undefined | Value::Magic(_) => "undefined",
        Value::Null => "object",
        Value::Boolean(_) => "boolean",
        Value::Int32(_) | Value::Double(_) => "number",
        Value::String(_) => "string",
        Value::Symbol(_) => "symbol",
        Value::Object(obj) if obj.is_callable() => "function",
        Value::Object(_) => "object",
    }
}

/// Number-to-string conversion
pub fn number_to_string(n: f64) -> String {
    if n.is_nan() {
        return "NaN".to_string();
    }
    if n.is_infinite() {
        return if n > 0.0 { "Infinity" } else { "-Infinity" }.to_string();
    }
    if n.fract() == 0.0 && n.abs() < 9.0e18 {
        let mut buf = itoa::Buffer::new();
        // -0 prints as "0"
        return buf.format(n as i64).to_string();
    }
    let mut buf = ryu::Buffer::new();
    let printed = buf.format_finite(n);
    printed.strip_suffix(".0").unwrap_or(printed).to_string()
}

/// ToString
pub fn to_string(value: &Value) -> VmResult<Arc<str>> {
    Ok(match value {
        Value::String(s) => Arc::clone(s),
        Value::Undefined => Arc::from("undefined"),
        Value::Null => Arc::from("null"),
        Value::Boolean(true) => Arc::from("true"),
        Value::Boolean(false) => Arc::from("false"),
        Value::Int32(i) => Arc::from(itoa::Buffer::new().format(*i)),
        Value::Double(d) => Arc::from(number_to_string(*d).as_str()),
        Value::Symbol(_) => {
            return Err(VmError::type_error("Cannot convert a Symbol value to a string"));
        }
        Value::Object(obj) => Arc::from(object_to_string(obj)?.as_str()),
        Value::Magic(kind) => {
            return Err(VmError::internal(format!("magic value {kind:?} used as operand")));
        }
    })
}

fn object_to_string(obj: &ObjectRef) -> VmResult<String> {
    match obj.class() {
        ObjectClass::Array => {
            let mut parts = Vec::with_capacity(obj.elements_len());
            for element in obj.elements() {
                parts.push(match element {
                    Value::Undefined | Value::Null => String::new(),
                    other => to_string(&other)?.to_string(),
                });
            }
            Ok(parts.join(","))
        }
        ObjectClass::Function => Ok(format!(
            "function {}() {{ [native code] }}",
            obj.function_name().unwrap_or_default()
        )),
        ObjectClass::ArrayIterator => Ok("[object Array Iterator]".to_string()),
        ObjectClass::Plain => Ok("[object Object]".to_string()),
    }
}

/// Property key for an element access
pub fn to_property_key(value: &Value) -> VmResult<PropertyKey> {
    Ok(PropertyKey::new(&to_string(value)?))
}

/// Binary arithmetic
pub fn binary_arith(op: BinaryOp, lhs: &Value, rhs: &Value) -> VmResult<Value> {
    if op == BinaryOp::Add
        && (matches!(lhs, Value::String(_)) || matches!(rhs, Value::String(_)))
    {
        return string_concat(lhs, rhs);
    }
    if let (Value::Int32(a), Value::Int32(b)) = (lhs, rhs) {
        return Ok(int32_arith(op, *a, *b));
    }
    Ok(double_arith(op, to_number(lhs)?, to_number(rhs)?))
}

/// String concatenation, the `Add` case with a string operand
pub fn string_concat(lhs: &Value, rhs: &Value) -> VmResult<Value> {
    let left = to_string(lhs)?;
    let right = to_string(rhs)?;
    let mut joined = String::with_capacity(left.len() + right.len());
    joined.push_str(&left);
    joined.push_str(&right);
    Ok(Value::String(Arc::from(joined)))
}

/// Arithmetic on two Int32 operands
pub fn int32_arith(op: BinaryOp, a: i32, b: i32) -> Value {
    match op {
        BinaryOp::Add => a.checked_add(b).map_or_else(|| Value::number(f64::from(a) + f64::from(b)), Value::Int32),
        BinaryOp::Sub => a.checked_sub(b).map_or_else(|| Value::number(f64::from(a) - f64::from(b)), Value::Int32),
        BinaryOp::BitAnd => Value::Int32(a & b),
        BinaryOp::BitOr => Value::Int32(a | b),
        BinaryOp::BitXor => Value::Int32(a ^ b),
        BinaryOp::Lsh => Value::Int32(a.wrapping_shl(b as u32 & 31)),
        BinaryOp::Rsh => Value::Int32(a.wrapping_shr(b as u32 & 31)),
        BinaryOp::Ursh => Value::number(f64::from((a as u32).wrapping_shr(b as u32 & 31))),
        // Mul can produce -0 and Div/Mod/Pow fractions: go through doubles
        BinaryOp::Mul | BinaryOp::Div | BinaryOp::Mod | BinaryOp::Pow => {
            double_arith(op, f64::from(a), f64::from(b))
        }
    }
}

/// Arithmetic on two numeric operands
pub fn double_arith(op: BinaryOp, a: f64, b: f64) -> Value {
    match op {
        BinaryOp::Add => Value::number(a + b),
        BinaryOp::Sub => Value::number(a - b),
        BinaryOp::Mul => Value::number(a * b),
        BinaryOp::Div => Value::number(a / b),
        BinaryOp::Mod => Value::number(a % b),
        BinaryOp::Pow => Value::number(pow(a, b)),
        BinaryOp::BitAnd => Value::Int32(to_int32(a) & to_int32(b)),
        BinaryOp::BitOr => Value::Int32(to_int32(a) | to_int32(b)),
        BinaryOp::BitXor => Value::Int32(to_int32(a) ^ to_int32(b)),
        BinaryOp::Lsh => Value::Int32(to_int32(a).wrapping_shl(to_uint32(b) & 31)),
        BinaryOp::Rsh => Value::Int32(to_int32(a).wrapping_shr(to_uint32(b) & 31)),
        BinaryOp::Ursh => Value::number(f64::from(to_uint32(a).wrapping_shr(to_uint32(b) & 31))),
    }
}

fn pow(base: f64, exponent: f64) -> f64 {
    if exponent.is_nan() || (base.abs() == 1.0 && exponent.is_infinite()) {
        return f64::NAN;
    }
    base.powf(exponent)
}

/// Unary arithmetic
pub fn unary_arith(op: UnaryOp, operand: &Value) -> VmResult<Value> {
    if let Value::Int32(i) = operand {
        return Ok(int32_unary(op, *i));
    }
    Ok(double_unary(op, to_number(operand)?))
}

/// Unary arithmetic on an Int32 operand
pub fn int32_unary(op: UnaryOp, i: i32) -> Value {
    match op {
        UnaryOp::BitNot => Value::Int32(!i),
        UnaryOp::Inc => i.checked_add(1).map_or_else(|| Value::number(f64::from(i) + 1.0), Value::Int32),
        UnaryOp::Dec => i.checked_sub(1).map_or_else(|| Value::number(f64::from(i) - 1.0), Value::Int32),
        // -0 and -i32::MIN need a double
        UnaryOp::Neg => Value::number(-f64::from(i)),
    }
}

/// Unary arithmetic on a numeric operand
pub fn double_unary(op: UnaryOp, n: f64) -> Value {
    match op {
        UnaryOp::Neg => Value::number(-n),
        UnaryOp::BitNot => Value::Int32(!to_int32(n)),
        UnaryOp::Inc => Value::number(n + 1.0),
        UnaryOp::Dec => Value::number(n - 1.0),
    }
}

/// Comparison
pub fn compare(op: CompareOp, lhs: &Value, rhs: &Value) -> VmResult<bool> {
    match op {
        CompareOp::Eq => loose_equals(lhs, rhs),
        CompareOp::Ne => loose_equals(lhs, rhs).map(|eq| !eq),
        CompareOp::StrictEq => Ok(strict_equals(lhs, rhs)),
        CompareOp::StrictNe => Ok(!strict_equals(lhs, rhs)),
        CompareOp::Lt | CompareOp::Le | CompareOp::Gt | CompareOp::Ge => relational(op, lhs, rhs),
    }
}

fn relational(op: CompareOp, lhs: &Value, rhs: &Value) -> VmResult<bool> {
    if let (Value::String(a), Value::String(b)) = (lhs, rhs) {
        return Ok(compare_strings(op, a, b));
    }
    Ok(compare_numbers(op, to_number(lhs)?, to_number(rhs)?))
}

/// Relational or equality comparison of two numbers
pub fn compare_numbers(op: CompareOp, a: f64, b: f64) -> bool {
    match op {
        CompareOp::Lt => a < b,
        CompareOp::Le => a <= b,
        CompareOp::Gt => a > b,
        CompareOp::Ge => a >= b,
        CompareOp::Eq | CompareOp::StrictEq => a == b,
        CompareOp::Ne | CompareOp::StrictNe => a != b,
    }
}

/// Relational or equality comparison of two strings
pub fn compare_strings(op: CompareOp, a: &str, b: &str) -> bool {
    match op {
        CompareOp::Lt => a < b,
        CompareOp::Le => a <= b,
        CompareOp::Gt => a > b,
        CompareOp::Ge => a >= b,
        CompareOp::Eq | CompareOp::StrictEq => a == b,
        CompareOp::Ne | CompareOp::StrictNe => a != b,
    }
}

/// `==`
pub fn loose_equals(lhs: &Value, rhs: &Value) -> VmResult<bool> {
    Ok(match (lhs, rhs) {
        (Value::Undefined | Value::Null, Value::Undefined | Value::Null) => true,
        (Value::Undefined | Value::Null, _) | (_, Value::Undefined | Value::Null) => false,
        (Value::Object(_), Value::Object(_)) => strict_equals(lhs, rhs),
        // No ToPrimitive on objects in this host
        (Value::Object(_), _) | (_, Value::Object(_)) => false,
        (Value::Symbol(a), Value::Symbol(b)) => a == b,
        (Value::Symbol(_), _) | (_, Value::Symbol(_)) => false,
        (Value::String(a), Value::String(b)) => a == b,
        (Value::Boolean(a), Value::Boolean(b)) => a == b,
        _ => to_number(lhs)? == to_number(rhs)?,
    })
}

/// `===`
pub fn strict_equals(lhs: &Value, rhs: &Value) -> bool {
    if let (Some(a), Some(b)) = (lhs.as_number(), rhs.as_number()) {
        return a == b;
    }
    match (lhs, rhs) {
        (Value::Undefined, Value::Undefined) | (Value::Null, Value::Null) => true,
        (Value::Boolean(a), Value::Boolean(b)) => a == b,
        (Value::String(a), Value::String(b)) => a == b,
        (Value::Symbol(a), Value::Symbol(b)) => a == b,
        (Value::Object(a), Value::Object(b)) => Arc::ptr_eq(a, b),
        _ => false,
    }
}

fn describe(value: &Value) -> String {
    match value {
        Value::String(s) => format!("{s:?}"),
        other => to_string(other).map_or_else(|_| format!("{other:?}"), |s| s.to_string()),
    }
}

/// Named property read
pub fn get_property(target: &Value, key: &PropertyKey) -> VmResult<Value> {
    match target {
        Value::Undefined | Value::Null => Err(VmError::type_error(format!(
            "Cannot read properties of {} (reading '{key}')",
            describe(target)
        ))),
        Value::String(s) => Ok(string_property(s, key)),
        Value::Object(obj) => Ok(object_property(obj, key)),
        Value::Magic(kind) => Err(VmError::internal(format!("magic value {kind:?} used as operand"))),
        _ => Ok(Value::Undefined),
    }
}

fn string_property(s: &str, key: &PropertyKey) -> Value {
    if key.as_str() == "length" {
        return Value::Int32(s.encode_utf16().count() as i32);
    }
    match key.array_index() {
        Some(index) => s
            .chars()
            .nth(index as usize)
            .map_or(Value::Undefined, |c| Value::string(c.encode_utf8(&mut [0; 4]))),
        None => Value::Undefined,
    }
}

fn object_property(obj: &ObjectRef, key: &PropertyKey) -> Value {
    if obj.class() == ObjectClass::Array {
        if key.as_str() == "length" {
            return Value::Int32(obj.elements_len() as i32);
        }
        if let Some(index) = key.array_index() {
            return obj.element(index as usize).unwrap_or(Value::Undefined);
        }
    }
    obj.get_own(key).unwrap_or(Value::Undefined)
}

/// Named property write
pub fn set_property(target: &Value, key: &PropertyKey, value: &Value) -> VmResult<()> {
    match target {
        Value::Undefined | Value::Null => Err(VmError::type_error(format!(
            "Cannot set properties of {} (setting '{key}')",
            describe(target)
        ))),
        Value::Object(obj) => {
            if obj.class() == ObjectClass::Array {
                if key.as_str() == "length" {
                    let len = to_number(value)?;
                    if len < 0.0 || len.fract() != 0.0 || len > f64::from(u32::MAX) {
                        return Err(VmError::RangeError("Invalid array length".into()));
                    }
                    obj.set_elements_len(len as usize);
                    return Ok(());
                }
                if let Some(index) = key.array_index() {
                    obj.set_element(index as usize, value.clone());
                    return Ok(());
                }
            }
            // Adding to a non-extensible object is silently ignored
            obj.set(key, value.clone());
            Ok(())
        }
        Value::Magic(kind) => Err(VmError::internal(format!("magic value {kind:?} used as operand"))),
        _ => Ok(()),
    }
}

/// Indexed element read
pub fn get_element(target: &Value, index: &Value) -> VmResult<Value> {
    if let (Value::Object(obj), Some(n)) = (target, index.as_number()) {
        if obj.class() == ObjectClass::Array && n >= 0.0 && n.fract() == 0.0 && n < f64::from(u32::MAX) {
            return Ok(obj.element(n as usize).unwrap_or(Value::Undefined));
        }
    }
    if matches!(target, Value::Undefined | Value::Null) {
        return Err(VmError::type_error(format!(
            "Cannot read properties of {} (reading '{}')",
            describe(target),
            describe(index)
        )));
    }
    get_property(target, &to_property_key(index)?)
}

/// Indexed element write
pub fn set_element(target: &Value, index: &Value, value: &Value) -> VmResult<()> {
    if let (Value::Object(obj), Some(n)) = (target, index.as_number()) {
        if obj.class() == ObjectClass::Array && n >= 0.0 && n.fract() == 0.0 && n < f64::from(u32::MAX) {
            obj.set_element(n as usize, value.clone());
            return Ok(());
        }
    }
    if matches!(target, Value::Undefined | Value::Null) {
        return Err(VmError::type_error(format!(
            "Cannot set properties of {} (setting '{}')",
            describe(target),
            describe(index)
        )));
    }
    set_property(target, &to_property_key(index)?, value)
}

/// `key in target`. Named lookups stop at the object itself: the host
/// model has no inherited data properties.
pub fn has_property(key: &Value, target: &Value) -> VmResult<bool> {
    let Value::Object(obj) = target else {
        return Err(VmError::type_error(format!(
            "Cannot use 'in' operator to search for '{}' in {}",
            describe(key),
            describe(target)
        )));
    };
    Ok(object_has_own(obj, &to_property_key(key)?))
}

/// Whether `key` is an own property of `target`
pub fn has_own(key: &Value, target: &Value) -> VmResult<bool> {
    match target {
        Value::Undefined | Value::Null => Err(VmError::type_error(format!(
            "Cannot convert {} to object",
            describe(target)
        ))),
        Value::Magic(kind) => Err(VmError::internal(format!("magic value {kind:?} used as operand"))),
        Value::Object(obj) => Ok(object_has_own(obj, &to_property_key(key)?)),
        Value::String(s) => {
            let key = to_property_key(key)?;
            Ok(key.as_str() == "length"
                || key
                    .array_index()
                    .is_some_and(|index| (index as usize) < s.chars().count()))
        }
        _ => {
            to_property_key(key)?;
            Ok(false)
        }
    }
}

fn object_has_own(obj: &ObjectRef, key: &PropertyKey) -> bool {
    if obj.class() == ObjectClass::Array {
        if key.as_str() == "length" {
            return true;
        }
        if let Some(index) = key.array_index() {
            return (index as usize) < obj.elements_len();
        }
    }
    obj.has_own(key)
}

/// `value instanceof ctor`
pub fn instance_of(value: &Value, ctor: &Value) -> VmResult<bool> {
    let callable = match ctor {
        Value::Object(obj) if obj.is_callable() => obj,
        other => {
            return Err(VmError::type_error(format!(
                "Right-hand side of 'instanceof' is not callable: {}",
                describe(other)
            )));
        }
    };
    if !matches!(value, Value::Object(_)) {
        return Ok(false);
    }
    match callable.get_own(&PropertyKey::from("prototype")) {
        Some(Value::Object(proto)) => Ok(inherits_from(value, &proto)),
        _ => Err(VmError::type_error(
            "Function has non-object prototype in instanceof check",
        )),
    }
}

/// Whether `proto` is on the prototype chain of `value`
pub fn inherits_from(value: &Value, proto: &ObjectRef) -> bool {
    let Value::Object(obj) = value else {
        return false;
    };
    let mut current = obj.group().proto();
    while let Some(candidate) = current {
        if Arc::ptr_eq(candidate, proto) {
            return true;
        }
        current = candidate.group().proto();
    }
    false
}

/// Call `callee` with `this` and `args`
pub fn call_value(callee: &Value, this: &Value, args: &[Value]) -> VmResult<Value> {
    match callee {
        Value::Object(obj) if obj.is_callable() => obj.call(this, args),
        other => Err(VmError::type_error(format!("{} is not a function", describe(other)))),
    }
}

/// Obtain an iterator for `value`
pub fn get_iterator(realm: &Realm, value: &Value) -> VmResult<Value> {
    match value {
        Value::Object(obj) if obj.class() == ObjectClass::Array => {
            Ok(Value::Object(realm.new_array_iterator(obj)))
        }
        other => Err(VmError::type_error(format!("{} is not iterable", describe(other)))),
    }
}
