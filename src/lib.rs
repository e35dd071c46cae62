//! A single-file Lua 5.1-compatible compiler and register-based virtual
//! machine: source text (or a precompiled bytecode image) in, a global
//! environment with a small built-in library, values and effects out.

pub mod bytecode;
pub mod compiler;
pub mod lexer;
pub mod opcode;
pub mod stdlib;
pub mod value;
pub mod vm;

use std::rc::Rc;

use compiler::Proto;
use value::Value;
use vm::{LuaError, State};

/// Compiles `source` to a top-level `Proto` named `chunk_name` (used in
/// error messages and debug info).
pub fn compile(source: &str, chunk_name: &str) -> Result<Proto, LuaError> {
    compiler::compile(source, chunk_name)
}

/// Creates a fresh `State` with the standard built-in library installed.
pub fn new_state() -> State {
    let mut state = State::new();
    stdlib::open(&mut state);
    state
}

/// Compiles and runs `source` against `state`, returning whatever the
/// top-level chunk returned.
pub fn run_source(state: &mut State, source: &str, chunk_name: &str) -> Result<Vec<Value>, LuaError> {
    let proto = compile(source, chunk_name)?;
    state.run_proto(Rc::new(proto))
}

#[cfg(test)]
mod test;
