//! Error kinds the implementation distinguishes.

use std::fmt;

use crate::lexer::SyntaxError;
use crate::value::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Syntax,
    Type,
    Runtime,
    Memory,
    Generic,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::Syntax => "syntax error",
            ErrorKind::Type => "type error",
            ErrorKind::Runtime => "runtime error",
            ErrorKind::Memory => "out of memory",
            ErrorKind::Generic => "error",
        };
        write!(f, "{s}")
    }
}

/// Carries the kind alongside both a display message and (for `error()`
/// with a non-string argument, or a propagating `pcall` failure) the
/// original Lua value, so `pcall` can hand the exact value back.
#[derive(Debug, Clone)]
pub struct LuaError {
    pub kind: ErrorKind,
    pub message: String,
    pub value: Option<Value>,
}

impl LuaError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> LuaError {
        LuaError {
            kind,
            message: message.into(),
            value: None,
        }
    }

    pub fn syntax(e: SyntaxError) -> LuaError {
        LuaError::new(ErrorKind::Syntax, e.to_string())
    }

    pub fn syntax_msg(line: u32, message: impl Into<String>) -> LuaError {
        LuaError::new(ErrorKind::Syntax, format!("{line}: {}", message.into()))
    }

    pub fn type_error(message: impl Into<String>) -> LuaError {
        LuaError::new(ErrorKind::Type, message)
    }

    pub fn runtime(message: impl Into<String>) -> LuaError {
        LuaError::new(ErrorKind::Runtime, message)
    }

    /// `error(value)` where `value` need not be a string.
    pub fn from_value(value: Value) -> LuaError {
        let message = crate::value::display_value(&value);
        LuaError {
            kind: ErrorKind::Runtime,
            message,
            value: Some(value),
        }
    }

    /// The value `pcall` should hand back to the caller.
    pub fn as_value(&self) -> Value {
        self.value
            .clone()
            .unwrap_or_else(|| Value::string(self.message.clone()))
    }
}

impl fmt::Display for LuaError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for LuaError {}
