//! A single Lua call's stack window: its registers, program counter,
//! varargs, and the closure it's executing.

use std::rc::Rc;

use crate::compiler::proto::Proto;
use crate::value::Value;

use super::closure::{new_cell, Cell, Closure};

pub struct Frame {
    pub closure: Rc<Closure>,
    pub proto: Rc<Proto>,
    pub regs: Vec<Cell>,
    pub pc: usize,
    pub varargs: Vec<Value>,
    /// One past the last register written by an open ("to top") multi-
    /// value instruction (`CALL`/`VARARG` with B or C = 0). Only
    /// meaningful right after such an instruction runs.
    pub top: usize,
}

impl Frame {
    pub fn new(closure: Rc<Closure>, args: &[Value]) -> Frame {
        let proto = match &*closure {
            Closure::Lua { proto, .. } => proto.clone(),
            Closure::Native { .. } => unreachable!("native closures don't build a Frame"),
        };
        let nparams = proto.num_params as usize;
        let regs: Vec<Cell> = (0..proto.max_stack_size)
            .map(|_| new_cell(Value::Nil))
            .collect();
        for (i, cell) in regs.iter().enumerate().take(nparams) {
            if let Some(v) = args.get(i) {
                *cell.borrow_mut() = v.clone();
            }
        }
        let varargs = if proto.is_vararg && args.len() > nparams {
            args[nparams..].to_vec()
        } else {
            Vec::new()
        };
        let top = regs.len();
        Frame {
            closure,
            proto,
            regs,
            pc: 0,
            varargs,
            top,
        }
    }

    pub fn upvalues(&self) -> &[Cell] {
        match &*self.closure {
            Closure::Lua { upvalues, .. } => upvalues,
            Closure::Native { .. } => unreachable!(),
        }
    }

    pub fn get(&self, r: u32) -> Value {
        self.regs[r as usize].borrow().clone()
    }

    pub fn set(&mut self, r: u32, v: Value) {
        self.ensure(r);
        *self.regs[r as usize].borrow_mut() = v;
    }

    pub fn cell(&mut self, r: u32) -> Cell {
        self.ensure(r);
        self.regs[r as usize].clone()
    }

    /// Grows the register file when a dynamic ("to top") write targets a
    /// slot beyond the statically-sized window.
    pub fn ensure(&mut self, r: u32) {
        let need = r as usize + 1;
        while self.regs.len() < need {
            self.regs.push(new_cell(Value::Nil));
        }
    }

    /// Reads `RK(x)`: a constant if `x` names one, else a register.
    pub fn rk(&self, x: u32, consts: &[Value]) -> Value {
        if crate::opcode::instruction::is_const(x) {
            consts[crate::opcode::instruction::const_index(x) as usize].clone()
        } else {
            self.get(x)
        }
    }
}
