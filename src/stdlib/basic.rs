//! The "basic" library — the only library this implementation ships.
//! Each function follows the host-function convention from vm/mod.rs:
//! read arguments via `state.args()`/`state.arg(i)`, push results via
//! `state.push_ret`, return the count pushed.

use crate::value::{display_value, Value};
use crate::vm::error::LuaError;
use crate::vm::{Closure, State};

pub fn install(state: &mut State) {
    state.register_native("print", lua_print);
    state.register_native("type", lua_type);
    state.register_native("tostring", lua_tostring);
    state.register_native("tonumber", lua_tonumber);
    state.register_native("pairs", lua_pairs);
    state.register_native("ipairs", lua_ipairs);
    state.register_native("next", lua_next);
    state.register_native("error", lua_error);
    state.register_native("pcall", lua_pcall);
    state.register_native("assert", lua_assert);
    state.register_native("select", lua_select);
    state.register_native("rawget", lua_rawget);
    state.register_native("rawset", lua_rawset);
    state.register_native("rawequal", lua_rawequal);
    state.register_native("rawlen", lua_rawlen);
    state.register_native("unpack", lua_unpack);
    state.register_native("getmetatable", lua_getmetatable);
    state.register_native("setmetatable", lua_setmetatable);
}

fn lua_print(state: &mut State) -> Result<usize, LuaError> {
    let parts: Vec<String> = state.args().iter().map(display_value).collect();
    println!("{}", parts.join("\t"));
    Ok(0)
}

fn lua_type(state: &mut State) -> Result<usize, LuaError> {
    state.push_ret(Value::string(state.arg(0).type_name()));
    Ok(1)
}

fn lua_tostring(state: &mut State) -> Result<usize, LuaError> {
    state.push_ret(Value::string(display_value(&state.arg(0))));
    Ok(1)
}

fn lua_tonumber(state: &mut State) -> Result<usize, LuaError> {
    let v = state.arg(0);
    if state.args().len() > 1 && !state.arg(1).is_nil() {
        let base = state
            .arg(1)
            .as_integer()
            .ok_or_else(|| LuaError::type_error("bad argument #2 to 'tonumber' (number expected)"))?;
        let Some(s) = v.as_str() else {
            state.push_ret(Value::Nil);
            return Ok(1);
        };
        let n = i64::from_str_radix(s.trim(), base as u32).ok();
        state.push_ret(n.map(Value::integer).unwrap_or(Value::Nil));
        return Ok(1);
    }
    state.push_ret(v.as_number().map(Value::number).unwrap_or(Value::Nil));
    Ok(1)
}

/// `pairs(t)` — returns `(next, t, nil)`; the for-in loop then drives
/// `next` itself.
fn lua_pairs(state: &mut State) -> Result<usize, LuaError> {
    let t = state.arg(0);
    if t.as_table().is_none() {
        return Err(LuaError::type_error(format!(
            "bad argument #1 to 'pairs' (table expected, got {})",
            t.type_name()
        )));
    }
    let next_fn = state.globals.borrow().get_str("next");
    state.push_ret(next_fn);
    state.push_ret(t);
    state.push_ret(Value::Nil);
    Ok(3)
}

/// `ipairs(t)` — returns `(inext, t, 0)`, where `inext` walks the array
/// part via raw (metamethod-free) indexing and stops at the first hole.
fn lua_ipairs(state: &mut State) -> Result<usize, LuaError> {
    let t = state.arg(0);
    if t.as_table().is_none() {
        return Err(LuaError::type_error(format!(
            "bad argument #1 to 'ipairs' (table expected, got {})",
            t.type_name()
        )));
    }
    let inext = Closure::new_native("inext", std::rc::Rc::new(lua_inext));
    state.push_ret(Value::closure(std::rc::Rc::new(inext)));
    state.push_ret(t);
    state.push_ret(Value::integer(0));
    Ok(3)
}

fn lua_inext(state: &mut State) -> Result<usize, LuaError> {
    let t = state.arg(0);
    let i = state.arg(1).as_integer().unwrap_or(0) + 1;
    let Some(table) = t.as_table() else {
        return Err(LuaError::type_error("bad argument #1 to 'inext' (table expected)"));
    };
    let v = table.borrow().get(&Value::integer(i));
    if v.is_nil() {
        Ok(0)
    } else {
        state.push_ret(Value::integer(i));
        state.push_ret(v);
        Ok(2)
    }
}

fn lua_next(state: &mut State) -> Result<usize, LuaError> {
    let t = state.arg(0);
    let key = state.arg(1);
    let Some(table) = t.as_table() else {
        return Err(LuaError::type_error(format!(
            "bad argument #1 to 'next' (table expected, got {})",
            t.type_name()
        )));
    };
    let result = table.borrow().next(&key);
    match result {
        Some((k, v)) => {
            state.push_ret(k);
            state.push_ret(v);
            Ok(2)
        }
        None => {
            state.push_ret(Value::Nil);
            Ok(1)
        }
    }
}

/// `error(message, level?)`. `level` is accepted for call-site
/// compatibility but position information is not attached (no debug
/// library in this implementation).
fn lua_error(state: &mut State) -> Result<usize, LuaError> {
    Err(LuaError::from_value(state.arg(0)))
}

fn lua_pcall(state: &mut State) -> Result<usize, LuaError> {
    let args = state.args().to_vec();
    if args.is_empty() {
        return Err(LuaError::type_error("bad argument #1 to 'pcall' (value expected)"));
    }
    let func = args[0].clone();
    let (_, rets) = state.protected_call(func, args[1..].to_vec());
    let n = rets.len();
    for v in rets {
        state.push_ret(v);
    }
    Ok(n)
}

fn lua_assert(state: &mut State) -> Result<usize, LuaError> {
    let args = state.args().to_vec();
    let v = args.first().cloned().unwrap_or(Value::Nil);
    if !v.truthiness() {
        let message = args.get(1).cloned().unwrap_or_else(|| Value::string("assertion failed!"));
        return Err(LuaError::from_value(message));
    }
    let n = args.len();
    for v in args {
        state.push_ret(v);
    }
    Ok(n)
}

/// `select('#', ...)` or `select(n, ...)`.
fn lua_select(state: &mut State) -> Result<usize, LuaError> {
    let args = state.args().to_vec();
    let selector = args.first().cloned().unwrap_or(Value::Nil);
    let rest = &args[1.min(args.len())..];
    if let Some("#") = selector.as_str() {
        state.push_ret(Value::integer(rest.len() as i64));
        return Ok(1);
    }
    let n = selector
        .as_integer()
        .ok_or_else(|| LuaError::type_error("bad argument #1 to 'select' (number expected)"))?;
    if n < 1 {
        return Err(LuaError::type_error("bad argument #1 to 'select' (index out of range)"));
    }
    let start = (n as usize - 1).min(rest.len());
    let picked = &rest[start..];
    for v in picked {
        state.push_ret(v.clone());
    }
    Ok(picked.len())
}

fn lua_rawget(state: &mut State) -> Result<usize, LuaError> {
    let t = state.arg(0);
    let Some(table) = t.as_table() else {
        return Err(LuaError::type_error("bad argument #1 to 'rawget' (table expected)"));
    };
    state.push_ret(table.borrow().get(&state.arg(1)));
    Ok(1)
}

fn lua_rawset(state: &mut State) -> Result<usize, LuaError> {
    let t = state.arg(0);
    let Some(table) = t.as_table().cloned() else {
        return Err(LuaError::type_error("bad argument #1 to 'rawset' (table expected)"));
    };
    table.borrow_mut().set(state.arg(1), state.arg(2));
    state.push_ret(t);
    Ok(1)
}

fn lua_rawequal(state: &mut State) -> Result<usize, LuaError> {
    state.push_ret(Value::bool(state.arg(0).raw_eq(&state.arg(1))));
    Ok(1)
}

fn lua_rawlen(state: &mut State) -> Result<usize, LuaError> {
    let v = state.arg(0);
    let n = match &v {
        Value::Table(t) => t.borrow().array_len() as i64,
        Value::Str(s) => s.len() as i64,
        _ => {
            return Err(LuaError::type_error(
                "table or string expected for 'rawlen'",
            ))
        }
    };
    state.push_ret(Value::integer(n));
    Ok(1)
}

fn lua_unpack(state: &mut State) -> Result<usize, LuaError> {
    let t = state.arg(0);
    let Some(table) = t.as_table() else {
        return Err(LuaError::type_error("bad argument #1 to 'unpack' (table expected)"));
    };
    let i = if state.args().len() > 1 && !state.arg(1).is_nil() {
        state.arg(1).as_integer().unwrap_or(1)
    } else {
        1
    };
    let j = if state.args().len() > 2 && !state.arg(2).is_nil() {
        state.arg(2).as_integer().unwrap_or(0)
    } else {
        table.borrow().array_len() as i64
    };
    let mut n = 0;
    let mut k = i;
    while k <= j {
        state.push_ret(table.borrow().get(&Value::integer(k)));
        k += 1;
        n += 1;
    }
    Ok(n)
}

/// `__metatable` on the current metatable, if set, shadows the real one
/// (the same protection `setmetatable` enforces).
fn lua_getmetatable(state: &mut State) -> Result<usize, LuaError> {
    let v = state.arg(0);
    match v.metatable() {
        None => state.push_ret(Value::Nil),
        Some(meta) => {
            let protect = meta.borrow().get_str("__metatable");
            if !protect.is_nil() {
                state.push_ret(protect);
            } else {
                state.push_ret(Value::table(meta));
            }
        }
    }
    Ok(1)
}

fn lua_setmetatable(state: &mut State) -> Result<usize, LuaError> {
    let t = state.arg(0);
    let Some(table) = t.as_table().cloned() else {
        return Err(LuaError::type_error(
            "bad argument #1 to 'setmetatable' (table expected)",
        ));
    };
    if let Some(existing) = table.borrow().metatable() {
        if !existing.borrow().get_str("__metatable").is_nil() {
            return Err(LuaError::runtime("cannot change a protected metatable"));
        }
    }
    let meta = state.arg(1);
    let new_meta = match &meta {
        Value::Nil => None,
        Value::Table(m) => Some(m.clone()),
        _ => {
            return Err(LuaError::type_error(
                "bad argument #2 to 'setmetatable' (nil or table expected)",
            ))
        }
    };
    table.borrow_mut().set_metatable(new_meta);
    state.push_ret(t);
    Ok(1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{new_state, run_source};

    #[test]
    fn select_hash_counts_varargs() {
        let mut state = new_state();
        let rets = run_source(&mut state, "return select('#', 1, 2, 3)", "test").unwrap();
        assert!(rets[0].raw_eq(&Value::integer(3)));
    }

    #[test]
    fn rawequal_ignores_metamethod() {
        let mut state = new_state();
        let src = r#"
            local mt = {__eq = function() return true end}
            local a, b = setmetatable({}, mt), setmetatable({}, mt)
            return rawequal(a, b)
        "#;
        let rets = run_source(&mut state, src, "test").unwrap();
        assert!(rets[0].raw_eq(&Value::bool(false)));
    }

    #[test]
    fn setmetatable_protected_errors() {
        let mut state = new_state();
        let src = r#"
            local t = setmetatable({}, {__metatable = "locked"})
            setmetatable(t, {})
        "#;
        assert!(run_source(&mut state, src, "test").is_err());
    }
}
