//! Frame-stack interpreter: global state, the call primitive shared by
//! Lua and host functions, and the opcode dispatcher.

pub mod arith;
pub mod closure;
mod dispatch;
pub mod error;
mod frame;

use std::cell::RefCell;
use std::rc::Rc;

use crate::compiler::proto::Proto;
use crate::value::{Table, Value};

pub use closure::{new_cell, Cell, Closure, NativeFn};
pub use error::{ErrorKind, LuaError};
pub use frame::Frame;

const MAX_CALL_DEPTH: usize = 200;

pub struct State {
    pub globals: Rc<RefCell<Table>>,
    pub string_meta: Option<Rc<RefCell<Table>>>,
    current_args: Vec<Value>,
    current_rets: Vec<Value>,
    call_depth: usize,
}

impl State {
    pub fn new() -> State {
        State {
            globals: Rc::new(RefCell::new(Table::new())),
            string_meta: None,
            current_args: Vec::new(),
            current_rets: Vec::new(),
            call_depth: 0,
        }
    }

    pub fn register_global(&mut self, name: &str, v: Value) {
        self.globals.borrow_mut().set(Value::string(name), v);
    }

    pub fn register_native(
        &mut self,
        name: &str,
        func: impl Fn(&mut State) -> Result<usize, LuaError> + 'static,
    ) {
        let closure = Rc::new(Closure::new_native(name, Rc::new(func)));
        self.register_global(name, Value::closure(closure));
    }

    /// The arguments of the native function call currently running.
    pub fn args(&self) -> &[Value] {
        &self.current_args
    }

    pub fn arg(&self, i: usize) -> Value {
        self.current_args.get(i).cloned().unwrap_or(Value::Nil)
    }

    /// Pushes one return value for the native function call currently
    /// running; the call's push-count is the number of calls to this.
    pub fn push_ret(&mut self, v: Value) {
        self.current_rets.push(v);
    }

    /// Compiles and runs `proto` as a fresh top-level closure, discarding
    /// its results. Used by the CLI and the REPL.
    pub fn run_proto(&mut self, proto: Rc<Proto>) -> Result<Vec<Value>, LuaError> {
        let closure = Rc::new(Closure::new_lua(proto, Vec::new()));
        self.call_value(Value::closure(closure), Vec::new())
    }

    /// The universal call primitive: dispatches to a Lua closure, a
    /// native closure, or (failing those) a `__call` metamethod.
    pub fn call_value(&mut self, func: Value, args: Vec<Value>) -> Result<Vec<Value>, LuaError> {
        self.call_depth += 1;
        if self.call_depth > MAX_CALL_DEPTH {
            self.call_depth -= 1;
            return Err(LuaError::runtime("stack overflow"));
        }
        let result = self.call_value_inner(func, args);
        self.call_depth -= 1;
        result
    }

    fn call_value_inner(&mut self, func: Value, args: Vec<Value>) -> Result<Vec<Value>, LuaError> {
        match &func {
            Value::Closure(c) => match &**c {
                Closure::Native { func: f, .. } => self.call_native(f.clone(), args),
                Closure::Lua { .. } => {
                    let mut frame = Frame::new(c.clone(), &args);
                    dispatch::exec_frame(self, &mut frame)
                }
            },
            _ => {
                if let Some(meta) = func.metatable() {
                    let call_mm = meta.borrow().get_str("__call");
                    if call_mm.is_callable() {
                        let mut new_args = Vec::with_capacity(args.len() + 1);
                        new_args.push(func.clone());
                        new_args.extend(args);
                        return self.call_value(call_mm, new_args);
                    }
                }
                Err(LuaError::type_error(format!(
                    "attempt to call a {} value",
                    func.type_name()
                )))
            }
        }
    }

    fn call_native(&mut self, f: NativeFn, args: Vec<Value>) -> Result<Vec<Value>, LuaError> {
        let saved_args = std::mem::replace(&mut self.current_args, args);
        let saved_rets = std::mem::take(&mut self.current_rets);
        let result = f(self);
        let rets = std::mem::replace(&mut self.current_rets, saved_rets);
        self.current_args = saved_args;
        let count = result?;
        debug_assert!(count <= rets.len());
        Ok(rets)
    }

    /// `pcall(f, args...)`: catches any error from `f`, returning it as
    /// `Err` rather than propagating — the call-info unwind is implicit
    /// since `call_value` uses Rust's own call stack.
    pub fn protected_call(&mut self, func: Value, args: Vec<Value>) -> (bool, Vec<Value>) {
        match self.call_value(func, args) {
            Ok(mut rets) => {
                rets.insert(0, Value::Bool(true));
                (true, rets)
            }
            Err(e) => (false, vec![Value::Bool(false), e.as_value()]),
        }
    }
}

impl Default for State {
    fn default() -> State {
        State::new()
    }
}
