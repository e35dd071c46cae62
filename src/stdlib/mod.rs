//! The built-in library: `print`, `type`, `tostring`, `tonumber`, `pairs`,
//! `ipairs`, `next`, `error`, `pcall`, `assert`, `select`,
//! `rawget`/`rawset`/`rawequal`/`rawlen`, `unpack`, `getmetatable`,
//! `setmetatable`. Nothing beyond this list — the rest of the 5.1
//! standard library is out of scope (spec.md §1).

mod basic;

use crate::vm::State;

pub fn open(state: &mut State) {
    basic::install(state);
}
