//! Metatable-driven arithmetic, comparison, concatenation, and indexing.
//! The primitive path is tried first; a miss looks up the metamethod on
//! either operand and invokes it as a nested call.

use std::cell::RefCell;
use std::rc::Rc;

use crate::value::{Table, Value};

use super::error::LuaError;
use super::State;

fn metamethod(v: &Value, name: &str) -> Option<Value> {
    let meta = v.metatable()?;
    let mm = meta.borrow().get_str(name);
    if mm.is_callable() {
        Some(mm)
    } else {
        None
    }
}

fn binary_metamethod(a: &Value, b: &Value, name: &str) -> Option<Value> {
    metamethod(a, name).or_else(|| metamethod(b, name))
}

pub enum ArithOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Pow,
}

impl ArithOp {
    fn apply(&self, x: f64, y: f64) -> f64 {
        match self {
            ArithOp::Add => x + y,
            ArithOp::Sub => x - y,
            ArithOp::Mul => x * y,
            ArithOp::Div => x / y,
            ArithOp::Mod => x - (x / y).floor() * y,
            ArithOp::Pow => x.powf(y),
        }
    }

    fn event(&self) -> &'static str {
        match self {
            ArithOp::Add => "__add",
            ArithOp::Sub => "__sub",
            ArithOp::Mul => "__mul",
            ArithOp::Div => "__div",
            ArithOp::Mod => "__mod",
            ArithOp::Pow => "__pow",
        }
    }
}

pub fn arith(state: &mut State, op: ArithOp, a: &Value, b: &Value) -> Result<Value, LuaError> {
    if let (Some(x), Some(y)) = (a.as_number(), b.as_number()) {
        return Ok(Value::number(op.apply(x, y)));
    }
    if let Some(mm) = binary_metamethod(a, b, op.event()) {
        let rets = state.call_value(mm, vec![a.clone(), b.clone()])?;
        return Ok(rets.into_iter().next().unwrap_or(Value::Nil));
    }
    let bad = if a.as_number().is_none() { a } else { b };
    Err(LuaError::type_error(format!(
        "attempt to perform arithmetic on a {} value",
        bad.type_name()
    )))
}

pub fn unary_minus(state: &mut State, a: &Value) -> Result<Value, LuaError> {
    if let Some(x) = a.as_number() {
        return Ok(Value::number(-x));
    }
    if let Some(mm) = metamethod(a, "__unm") {
        let rets = state.call_value(mm, vec![a.clone(), a.clone()])?;
        return Ok(rets.into_iter().next().unwrap_or(Value::Nil));
    }
    Err(LuaError::type_error(format!(
        "attempt to perform arithmetic on a {} value",
        a.type_name()
    )))
}

pub fn concat(state: &mut State, a: &Value, b: &Value) -> Result<Value, LuaError> {
    let as_str = |v: &Value| -> Option<String> {
        match v {
            Value::Str(s) => Some(s.to_string()),
            Value::Number(n) => Some(crate::value::format_number(*n)),
            _ => None,
        }
    };
    if let (Some(x), Some(y)) = (as_str(a), as_str(b)) {
        return Ok(Value::string(x + &y));
    }
    if let Some(mm) = binary_metamethod(a, b, "__concat") {
        let rets = state.call_value(mm, vec![a.clone(), b.clone()])?;
        return Ok(rets.into_iter().next().unwrap_or(Value::Nil));
    }
    let bad = if as_str(a).is_none() { a } else { b };
    Err(LuaError::type_error(format!(
        "attempt to concatenate a {} value",
        bad.type_name()
    )))
}

pub fn raw_num_eq(a: &Value, b: &Value) -> bool {
    a.raw_eq(b)
}

/// `EQ`: primitive equality, falling back to `__eq` only when both
/// operands are tables (or both closures) and primitive equality failed.
pub fn equals(state: &mut State, a: &Value, b: &Value) -> Result<bool, LuaError> {
    if a.raw_eq(b) {
        return Ok(true);
    }
    let both_tables = matches!((a, b), (Value::Table(_), Value::Table(_)));
    if !both_tables {
        return Ok(false);
    }
    if let Some(mm) = binary_metamethod(a, b, "__eq") {
        let rets = state.call_value(mm, vec![a.clone(), b.clone()])?;
        return Ok(rets.into_iter().next().unwrap_or(Value::Nil).truthiness());
    }
    Ok(false)
}

pub fn less_than(state: &mut State, a: &Value, b: &Value) -> Result<bool, LuaError> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => Ok(x < y),
        (Value::Str(x), Value::Str(y)) => Ok(x < y),
        _ => {
            if let Some(mm) = binary_metamethod(a, b, "__lt") {
                let rets = state.call_value(mm, vec![a.clone(), b.clone()])?;
                return Ok(rets.into_iter().next().unwrap_or(Value::Nil).truthiness());
            }
            Err(LuaError::type_error(format!(
                "attempt to compare {} with {}",
                a.type_name(),
                b.type_name()
            )))
        }
    }
}

pub fn less_equal(state: &mut State, a: &Value, b: &Value) -> Result<bool, LuaError> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => Ok(x <= y),
        (Value::Str(x), Value::Str(y)) => Ok(x <= y),
        _ => {
            if let Some(mm) = binary_metamethod(a, b, "__le") {
                let rets = state.call_value(mm, vec![a.clone(), b.clone()])?;
                return Ok(rets.into_iter().next().unwrap_or(Value::Nil).truthiness());
            }
            Err(LuaError::type_error(format!(
                "attempt to compare {} with {}",
                a.type_name(),
                b.type_name()
            )))
        }
    }
}

pub fn gettable(state: &mut State, t: &Value, key: &Value) -> Result<Value, LuaError> {
    t.gettable(key, |callee, recv, k| {
        state.call_value(callee.clone(), vec![recv.clone(), k.clone()])
            .map(|rets| rets.into_iter().next().unwrap_or(Value::Nil))
    })
}

/// `SETTABLE`: a direct table write if the receiver is a table without a
/// relevant `__newindex`, else the `__newindex` chain (table recurse or
/// callable invoke).
pub fn settable(state: &mut State, t: &Value, key: Value, value: Value) -> Result<(), LuaError> {
    if let Value::Table(tbl) = t {
        let has_key = !tbl.borrow().get(&key).is_nil();
        if has_key {
            tbl.borrow_mut().set(key, value);
            return Ok(());
        }
        let meta = tbl.borrow().metatable();
        match meta {
            None => {
                tbl.borrow_mut().set(key, value);
                Ok(())
            }
            Some(meta) => {
                let newindex = meta.borrow().get_str("__newindex");
                match newindex {
                    Value::Nil => {
                        tbl.borrow_mut().set(key, value);
                        Ok(())
                    }
                    Value::Table(_) => settable(state, &newindex, key, value),
                    other if other.is_callable() => {
                        state.call_value(other, vec![t.clone(), key, value])?;
                        Ok(())
                    }
                    _ => {
                        tbl.borrow_mut().set(key, value);
                        Ok(())
                    }
                }
            }
        }
    } else {
        let meta = t.metatable();
        let Some(meta) = meta else {
            return Err(LuaError::type_error(format!(
                "attempt to index a {} value",
                t.type_name()
            )));
        };
        let newindex = meta.borrow().get_str("__newindex");
        match newindex {
            Value::Table(_) => settable(state, &newindex, key, value),
            other if other.is_callable() => {
                state.call_value(other, vec![t.clone(), key, value])?;
                Ok(())
            }
            _ => Err(LuaError::type_error(format!(
                "attempt to index a {} value",
                t.type_name()
            ))),
        }
    }
}

pub fn len(state: &mut State, v: &Value) -> Result<Value, LuaError> {
    v.len(|mm, recv| {
        state
            .call_value(mm.clone(), vec![recv.clone()])
            .map(|rets| rets.into_iter().next().unwrap_or(Value::Nil))
    })
}

pub fn new_table() -> Rc<RefCell<Table>> {
    Rc::new(RefCell::new(Table::new()))
}
