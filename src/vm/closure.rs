//! Live function instances.

use std::cell::RefCell;
use std::rc::Rc;

use crate::compiler::proto::Proto;
use crate::value::Value;

use super::error::LuaError;
use super::State;

/// A register / upvalue cell. Every register in a Lua frame is boxed
/// this way so that capturing it as an upvalue is a pointer clone — see
/// DESIGN.md for the upvalue-capture design this enables.
pub type Cell = Rc<RefCell<Value>>;

pub fn new_cell(v: Value) -> Cell {
    Rc::new(RefCell::new(v))
}

/// Signature for host (native) functions: the full VM state in, a count
/// of values the function pushed onto its own call-stack window out.
pub type NativeFn = Rc<dyn Fn(&mut State) -> Result<usize, LuaError>>;

pub enum Closure {
    Lua {
        proto: Rc<Proto>,
        upvalues: Vec<Cell>,
    },
    Native {
        name: Rc<str>,
        func: NativeFn,
    },
}

impl Closure {
    pub fn new_lua(proto: Rc<Proto>, upvalues: Vec<Cell>) -> Closure {
        Closure::Lua { proto, upvalues }
    }

    pub fn new_native(name: impl Into<Rc<str>>, func: NativeFn) -> Closure {
        Closure::Native {
            name: name.into(),
            func,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Closure::Lua { proto, .. } => &proto.source,
            Closure::Native { name, .. } => name,
        }
    }
}
