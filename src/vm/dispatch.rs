//! The opcode dispatch loop: fetches one instruction at a time out of a
//! `Proto`'s code array and mutates the running `Frame` until `RETURN`.

use std::rc::Rc;

use crate::opcode::{Instruction, OpCode};
use crate::value::Value;

use super::arith::{self, ArithOp};
use super::closure::{new_cell, Closure};
use super::error::LuaError;
use super::frame::Frame;
use super::State;

pub fn exec_frame(state: &mut State, frame: &mut Frame) -> Result<Vec<Value>, LuaError> {
    loop {
        let instr = Instruction(frame.proto.code[frame.pc]);
        frame.pc += 1;
        let op = instr.op();
        let a = instr.a();

        match op {
            OpCode::Move => {
                let v = frame.get(instr.b());
                frame.set(a, v);
            }
            OpCode::LoadK => {
                let k = frame.proto.consts[instr.bx() as usize].clone();
                frame.set(a, k);
            }
            OpCode::LoadBool => {
                frame.set(a, Value::Bool(instr.b() != 0));
                if instr.c() != 0 {
                    frame.pc += 1;
                }
            }
            OpCode::LoadNil => {
                let last = a + instr.b();
                for r in a..=last {
                    frame.set(r, Value::Nil);
                }
            }
            OpCode::GetUpval => {
                let v = frame.upvalues()[instr.b() as usize].borrow().clone();
                frame.set(a, v);
            }
            OpCode::SetUpval => {
                let v = frame.get(a);
                *frame.upvalues()[instr.b() as usize].borrow_mut() = v;
            }
            OpCode::GetGlobal => {
                let key = frame.proto.consts[instr.bx() as usize].clone();
                let globals = Value::table(state.globals.clone());
                let v = arith::gettable(state, &globals, &key)?;
                frame.set(a, v);
            }
            OpCode::SetGlobal => {
                let key = frame.proto.consts[instr.bx() as usize].clone();
                let v = frame.get(a);
                let globals = Value::table(state.globals.clone());
                arith::settable(state, &globals, key, v)?;
            }
            OpCode::GetTable => {
                let t = frame.get(instr.b());
                let key = frame.rk(instr.c(), &frame.proto.consts);
                let v = arith::gettable(state, &t, &key)?;
                frame.set(a, v);
            }
            OpCode::SetTable => {
                let t = frame.get(a);
                let key = frame.rk(instr.b(), &frame.proto.consts);
                let v = frame.rk(instr.c(), &frame.proto.consts);
                arith::settable(state, &t, key, v)?;
            }
            OpCode::NewTable => {
                frame.set(a, Value::table(arith::new_table()));
            }
            OpCode::SelfOp => {
                let t = frame.get(instr.b());
                let key = frame.rk(instr.c(), &frame.proto.consts);
                let f = arith::gettable(state, &t, &key)?;
                frame.set(a + 1, t);
                frame.set(a, f);
            }
            OpCode::Add | OpCode::Sub | OpCode::Mul | OpCode::Div | OpCode::Mod | OpCode::Pow => {
                let x = frame.rk(instr.b(), &frame.proto.consts);
                let y = frame.rk(instr.c(), &frame.proto.consts);
                let op = match op {
                    OpCode::Add => ArithOp::Add,
                    OpCode::Sub => ArithOp::Sub,
                    OpCode::Mul => ArithOp::Mul,
                    OpCode::Div => ArithOp::Div,
                    OpCode::Mod => ArithOp::Mod,
                    OpCode::Pow => ArithOp::Pow,
                    _ => unreachable!(),
                };
                let r = arith::arith(state, op, &x, &y)?;
                frame.set(a, r);
            }
            OpCode::Unm => {
                let x = frame.get(instr.b());
                let r = arith::unary_minus(state, &x)?;
                frame.set(a, r);
            }
            OpCode::Not => {
                let v = frame.get(instr.b());
                frame.set(a, Value::Bool(!v.truthiness()));
            }
            OpCode::Len => {
                let v = frame.get(instr.b());
                let r = arith::len(state, &v)?;
                frame.set(a, r);
            }
            OpCode::Concat => {
                let (b, c) = (instr.b(), instr.c());
                let mut acc = frame.get(c);
                let mut i = c;
                while i > b {
                    i -= 1;
                    acc = arith::concat(state, &frame.get(i), &acc)?;
                }
                frame.set(a, acc);
            }
            OpCode::Jmp => {
                frame.pc = (frame.pc as i32 + instr.sbx()) as usize;
            }
            OpCode::Eq => {
                let x = frame.rk(instr.b(), &frame.proto.consts);
                let y = frame.rk(instr.c(), &frame.proto.consts);
                let want = a != 0;
                if arith::equals(state, &x, &y)? != want {
                    frame.pc += 1;
                }
            }
            OpCode::Lt => {
                let x = frame.rk(instr.b(), &frame.proto.consts);
                let y = frame.rk(instr.c(), &frame.proto.consts);
                let want = a != 0;
                if arith::less_than(state, &x, &y)? != want {
                    frame.pc += 1;
                }
            }
            OpCode::Le => {
                let x = frame.rk(instr.b(), &frame.proto.consts);
                let y = frame.rk(instr.c(), &frame.proto.consts);
                let want = a != 0;
                if arith::less_equal(state, &x, &y)? != want {
                    frame.pc += 1;
                }
            }
            OpCode::Test => {
                let v = frame.get(a);
                let want = instr.c() != 0;
                if v.truthiness() != want {
                    frame.pc += 1;
                }
            }
            OpCode::TestSet => {
                let v = frame.get(instr.b());
                let want = instr.c() != 0;
                if v.truthiness() == want {
                    frame.set(a, v);
                } else {
                    frame.pc += 1;
                }
            }
            OpCode::Call | OpCode::TailCall => {
                let (b, c) = (instr.b(), instr.c());
                let nargs = if b != 0 {
                    (b - 1) as usize
                } else {
                    frame.top - (a + 1) as usize
                };
                let func = frame.get(a);
                let args: Vec<Value> = (0..nargs).map(|i| frame.get(a + 1 + i as u32)).collect();
                let rets = state.call_value(func, args)?;
                if c != 0 {
                    let nrets = (c - 1) as usize;
                    for i in 0..nrets {
                        frame.set(a + i as u32, rets.get(i).cloned().unwrap_or(Value::Nil));
                    }
                } else {
                    if let Some(n) = rets.len().checked_sub(1) {
                        frame.ensure(a + n as u32);
                    }
                    for (i, v) in rets.iter().enumerate() {
                        frame.set(a + i as u32, v.clone());
                    }
                    frame.top = a as usize + rets.len();
                }
            }
            OpCode::Return => {
                let b = instr.b();
                let count = if b != 0 {
                    (b - 1) as usize
                } else {
                    frame.top - a as usize
                };
                return Ok((0..count).map(|i| frame.get(a + i as u32)).collect());
            }
            OpCode::ForPrep => {
                let idx = frame.get(a).as_number().unwrap_or(0.0);
                let step = frame.get(a + 2).as_number().unwrap_or(1.0);
                frame.set(a, Value::number(idx - step));
                frame.pc = (frame.pc as i32 + instr.sbx()) as usize;
            }
            OpCode::ForLoop => {
                let step = frame.get(a + 2).as_number().unwrap_or(1.0);
                let idx = frame.get(a).as_number().unwrap_or(0.0) + step;
                let limit = frame.get(a + 1).as_number().unwrap_or(0.0);
                let keep_going = if step > 0.0 { idx <= limit } else { idx >= limit };
                frame.set(a, Value::number(idx));
                if keep_going {
                    frame.pc = (frame.pc as i32 + instr.sbx()) as usize;
                    frame.set(a + 3, Value::number(idx));
                }
            }
            OpCode::TForLoop => {
                let generator = frame.get(a);
                let st = frame.get(a + 1);
                let control = frame.get(a + 2);
                let rets = state.call_value(generator, vec![st, control])?;
                let nrets = instr.c() as usize;
                for i in 0..nrets {
                    frame.set(a + 3 + i as u32, rets.get(i).cloned().unwrap_or(Value::Nil));
                }
                let first = frame.get(a + 3);
                if first.is_nil() {
                    frame.pc += 1;
                } else {
                    frame.set(a + 2, first);
                }
            }
            OpCode::SetList => {
                let (b, c) = (instr.b(), instr.c());
                let count = if b != 0 {
                    b as usize
                } else {
                    frame.top - (a + 1) as usize
                };
                let t = frame.get(a);
                let Some(table) = t.as_table().cloned() else {
                    return Err(LuaError::type_error("SETLIST target is not a table"));
                };
                let offset = (c as i64 - 1) * 50;
                for i in 1..=count {
                    let v = frame.get(a + i as u32);
                    table
                        .borrow_mut()
                        .set(Value::integer(offset + i as i64), v);
                }
            }
            OpCode::Close => {
                for idx in a as usize..frame.regs.len() {
                    let current = frame.regs[idx].borrow().clone();
                    frame.regs[idx] = new_cell(current);
                }
            }
            OpCode::Closure => {
                let sub = frame.proto.sub_protos[instr.bx() as usize].clone();
                let upvalues = sub
                    .upvalues
                    .iter()
                    .map(|src| match *src {
                        crate::compiler::proto::UpvalSource::ParentLocal(r) => frame.cell(r),
                        crate::compiler::proto::UpvalSource::ParentUpval(u) => {
                            frame.upvalues()[u as usize].clone()
                        }
                    })
                    .collect();
                let closure = Rc::new(Closure::new_lua(sub, upvalues));
                frame.set(a, Value::closure(closure));
            }
            OpCode::Vararg => {
                let b = instr.b();
                if b != 0 {
                    let count = (b - 1) as usize;
                    for i in 0..count {
                        let v = frame.varargs.get(i).cloned().unwrap_or(Value::Nil);
                        frame.set(a + i as u32, v);
                    }
                } else {
                    let n = frame.varargs.len();
                    if n > 0 {
                        frame.ensure(a + n as u32 - 1);
                    }
                    for (i, v) in frame.varargs.clone().into_iter().enumerate() {
                        frame.set(a + i as u32, v);
                    }
                    frame.top = a as usize + n;
                }
            }
        }
    }
}
