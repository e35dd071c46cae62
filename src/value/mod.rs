//! Tagged runtime value shared by the compiler's constant pool and the VM.

mod table;

pub use table::Table;

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use crate::vm::closure::Closure;
use crate::vm::error::LuaError;

/// A register or constant-pool slot. Tables and closures are reference
/// counted: reclamation is left to Rust's drop glue rather than a
/// tracing collector.
#[derive(Clone)]
pub enum Value {
    Nil,
    Bool(bool),
    Number(f64),
    Str(Rc<str>),
    Table(Rc<RefCell<Table>>),
    Closure(Rc<Closure>),
}

impl Value {
    pub fn nil() -> Value {
        Value::Nil
    }

    pub fn bool(b: bool) -> Value {
        Value::Bool(b)
    }

    /// There is only one numeric representation (`f64`); this constructor
    /// exists so call sites can document "this is conceptually a float"
    /// even though integer-valued floats print and compare like integers.
    pub fn number(n: f64) -> Value {
        Value::Number(n)
    }

    pub fn integer(i: i64) -> Value {
        Value::Number(i as f64)
    }

    pub fn string(s: impl Into<Rc<str>>) -> Value {
        Value::Str(s.into())
    }

    pub fn table(t: Rc<RefCell<Table>>) -> Value {
        Value::Table(t)
    }

    pub fn closure(c: Rc<Closure>) -> Value {
        Value::Closure(c)
    }

    /// `false` and `nil` are false; everything else (including `0` and
    /// `""`) is true.
    pub fn truthiness(&self) -> bool {
        !matches!(self, Value::Nil | Value::Bool(false))
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Nil => "nil",
            Value::Bool(_) => "boolean",
            Value::Number(_) => "number",
            Value::Str(_) => "string",
            Value::Table(_) => "table",
            Value::Closure(_) => "function",
        }
    }

    /// Returns the integer value if `self` is a number whose value is
    /// exactly representable as an `i64`; else `None`.
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Value::Number(n) if n.fract() == 0.0 && n.is_finite() => {
                if *n >= i64::MIN as f64 && *n <= i64::MAX as f64 {
                    Some(*n as i64)
                } else {
                    None
                }
            }
            _ => None,
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            Value::Str(s) => to_number_string(s),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_table(&self) -> Option<&Rc<RefCell<Table>>> {
        match self {
            Value::Table(t) => Some(t),
            _ => None,
        }
    }

    pub fn as_closure(&self) -> Option<&Rc<Closure>> {
        match self {
            Value::Closure(c) => Some(c),
            _ => None,
        }
    }

    pub fn is_nil(&self) -> bool {
        matches!(self, Value::Nil)
    }

    pub fn is_callable(&self) -> bool {
        matches!(self, Value::Closure(_))
    }

    /// Primitives compare by tag+content; tables and closures by identity.
    pub fn raw_eq(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Nil, Value::Nil) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Number(a), Value::Number(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Table(a), Value::Table(b)) => Rc::ptr_eq(a, b),
            (Value::Closure(a), Value::Closure(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }

    pub fn metatable(&self) -> Option<Rc<RefCell<Table>>> {
        match self {
            Value::Table(t) => t.borrow().metatable(),
            _ => None,
        }
    }

    /// Table hits resolve directly; misses (and non-table receivers) fall
    /// through `__index`.
    pub fn gettable(
        &self,
        key: &Value,
        mut caller: impl FnMut(&Value, &Value, &Value) -> Result<Value, LuaError>,
    ) -> Result<Value, LuaError> {
        if let Value::Table(t) = self {
            let hit = t.borrow().get(key);
            if !hit.is_nil() {
                return Ok(hit);
            }
            let meta = t.borrow().metatable();
            let Some(meta) = meta else {
                return Ok(Value::Nil);
            };
            let index = meta.borrow().get(&Value::string("__index"));
            match index {
                Value::Nil => Ok(Value::Nil),
                Value::Table(_) => index.gettable(key, caller),
                other if other.is_callable() => caller(&other, self, key),
                _ => Ok(Value::Nil),
            }
        } else {
            let meta = self.metatable();
            let Some(meta) = meta else {
                return Ok(Value::Nil);
            };
            let index = meta.borrow().get(&Value::string("__index"));
            match index {
                Value::Nil => Ok(Value::Nil),
                Value::Table(_) => index.gettable(key, caller),
                other if other.is_callable() => caller(&other, self, key),
                _ => Ok(Value::Nil),
            }
        }
    }

    /// `__len` wins if present and callable; otherwise array length for
    /// tables, byte count for strings, 0 for anything else.
    pub fn len(
        &self,
        mut caller: impl FnMut(&Value, &Value) -> Result<Value, LuaError>,
    ) -> Result<Value, LuaError> {
        if let Some(meta) = self.metatable() {
            let len_mm = meta.borrow().get(&Value::string("__len"));
            if len_mm.is_callable() {
                return caller(&len_mm, self);
            }
        }
        match self {
            Value::Table(t) => Ok(Value::integer(t.borrow().array_len() as i64)),
            Value::Str(s) => Ok(Value::integer(s.len() as i64)),
            _ => Ok(Value::integer(0)),
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", display_value(self))
    }
}

/// `tostring` without metamethod dispatch — used by `print`/`..` default
/// formatting and the `%p`-free debug path.
pub fn display_value(v: &Value) -> String {
    match v {
        Value::Nil => "nil".to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => format_number(*n),
        Value::Str(s) => s.to_string(),
        Value::Table(t) => format!("table: {:p}", Rc::as_ptr(t)),
        Value::Closure(c) => format!("function: {:p}", Rc::as_ptr(c)),
    }
}

/// Lua prints integral floats without a trailing `.0`.
pub fn format_number(n: f64) -> String {
    if n.is_nan() {
        return "nan".to_string();
    }
    if n.is_infinite() {
        return if n > 0.0 { "inf" } else { "-inf" }.to_string();
    }
    if n.fract() == 0.0 && n.abs() < 1e15 {
        let mut buf = itoa::Buffer::new();
        buf.format(n as i64).to_string()
    } else {
        format!("{:.14}", n)
            .trim_end_matches('0')
            .trim_end_matches('.')
            .to_string()
    }
}

/// Parses a string as a number: decimal or hex, with an optional
/// fractional/exponent part.
pub fn to_number_string(s: &str) -> Option<f64> {
    let t = s.trim();
    if t.is_empty() {
        return None;
    }
    let (neg, rest) = match t.strip_prefix('-') {
        Some(r) => (true, r),
        None => (false, t.strip_prefix('+').unwrap_or(t)),
    };
    let value = if let Some(hex) = rest
        .strip_prefix("0x")
        .or_else(|| rest.strip_prefix("0X"))
    {
        parse_hex_number(hex)?
    } else {
        rest.parse::<f64>().ok()?
    };
    Some(if neg { -value } else { value })
}

fn parse_hex_number(hex: &str) -> Option<f64> {
    if hex.is_empty() {
        return None;
    }
    let (mantissa, exp) = match hex.find(['p', 'P']) {
        Some(i) => (&hex[..i], hex[i + 1..].parse::<i32>().ok()?),
        None => (hex, 0),
    };
    let (int_part, frac_part) = match mantissa.find('.') {
        Some(i) => (&mantissa[..i], &mantissa[i + 1..]),
        None => (mantissa, ""),
    };
    if int_part.is_empty() && frac_part.is_empty() {
        return None;
    }
    let mut value = 0.0f64;
    for c in int_part.chars() {
        value = value * 16.0 + c.to_digit(16)? as f64;
    }
    let mut scale = 1.0 / 16.0;
    for c in frac_part.chars() {
        value += c.to_digit(16)? as f64 * scale;
        scale /= 16.0;
    }
    Some(value * 2f64.powi(exp))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truthiness_matches_lua() {
        assert!(!Value::Nil.truthiness());
        assert!(!Value::Bool(false).truthiness());
        assert!(Value::Bool(true).truthiness());
        assert!(Value::integer(0).truthiness());
        assert!(Value::string("").truthiness());
    }

    #[test]
    fn integer_float_equal() {
        assert!(Value::number(1.0).raw_eq(&Value::integer(1)));
    }

    #[test]
    fn number_formatting_drops_trailing_zero() {
        assert_eq!(format_number(3.0), "3");
        assert_eq!(format_number(3.5), "3.5");
    }

    #[test]
    fn hex_number_parses() {
        assert_eq!(to_number_string("0x1A"), Some(26.0));
        assert_eq!(to_number_string("0x1p4"), Some(16.0));
    }
}
