//! Deserializes a binary image written by `writer.rs` back into a `Proto`
//! tree, validating the opcode byte of every instruction as it goes.

use std::rc::Rc;

use crate::compiler::proto::{DebugInfo, LocalVarInfo, Proto, UpvalSource};
use crate::opcode::NUM_OPCODES;
use crate::value::Value;

use super::header::Header;

struct Cursor<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(bytes: &'a [u8]) -> Cursor<'a> {
        Cursor { bytes, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], String> {
        if self.pos + n > self.bytes.len() {
            return Err("truncated bytecode".to_string());
        }
        let slice = &self.bytes[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn u8(&mut self) -> Result<u8, String> {
        Ok(self.take(1)?[0])
    }

    fn u32(&mut self) -> Result<u32, String> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes(b.try_into().unwrap()))
    }

    fn u64(&mut self) -> Result<u64, String> {
        let b = self.take(8)?;
        Ok(u64::from_le_bytes(b.try_into().unwrap()))
    }

    fn f64(&mut self) -> Result<f64, String> {
        let b = self.take(8)?;
        Ok(f64::from_le_bytes(b.try_into().unwrap()))
    }

    fn string(&mut self) -> Result<Rc<str>, String> {
        let len = self.u64()?;
        if len == 0 {
            return Ok(Rc::from(""));
        }
        let bytes = self.take(len as usize)?;
        let (body, _nul) = bytes.split_at(bytes.len() - 1);
        std::str::from_utf8(body)
            .map(Rc::from)
            .map_err(|e| format!("invalid UTF-8 string constant: {e}"))
    }
}

pub fn read_proto(data: &[u8]) -> Result<Proto, String> {
    Header::read(data)?;
    let mut cur = Cursor::new(data);
    cur.pos = Header::LEN;
    read_function(&mut cur)
}

fn read_function(cur: &mut Cursor) -> Result<Proto, String> {
    let source = cur.string()?;
    let line_defined = cur.u32()?;
    let last_line_defined = cur.u32()?;
    let num_params = cur.u8()?;
    let is_vararg = cur.u8()? != 0;
    let max_stack_size = cur.u8()? as u32;

    let num_code = cur.u32()?;
    let mut code = Vec::with_capacity(num_code as usize);
    for _ in 0..num_code {
        let word = cur.u32()?;
        validate_opcode(word)?;
        code.push(word);
    }

    let num_consts = cur.u32()?;
    let mut consts = Vec::with_capacity(num_consts as usize);
    for _ in 0..num_consts {
        consts.push(read_constant(cur)?);
    }

    let num_upvals = cur.u32()?;
    let mut upvalues = Vec::with_capacity(num_upvals as usize);
    for _ in 0..num_upvals {
        let tag = cur.u8()?;
        let idx = cur.u32()?;
        upvalues.push(match tag {
            0 => UpvalSource::ParentLocal(idx),
            1 => UpvalSource::ParentUpval(idx),
            other => return Err(format!("invalid upvalue source tag {other}")),
        });
    }

    let num_subs = cur.u32()?;
    let mut sub_protos = Vec::with_capacity(num_subs as usize);
    for _ in 0..num_subs {
        sub_protos.push(Rc::new(read_function(cur)?));
    }

    let debug = read_debug(cur)?;

    Ok(Proto {
        source,
        line_defined,
        last_line_defined,
        num_params,
        is_vararg,
        max_stack_size,
        code,
        consts,
        sub_protos,
        upvalues,
        debug,
    })
}

fn validate_opcode(word: u32) -> Result<(), String> {
    let op = word & 0x3f;
    if op as usize >= NUM_OPCODES {
        return Err(format!("invalid opcode byte {op} in bytecode stream"));
    }
    Ok(())
}

fn read_constant(cur: &mut Cursor) -> Result<Value, String> {
    match cur.u8()? {
        0 => Ok(Value::Nil),
        1 => Ok(Value::bool(cur.u8()? != 0)),
        2 => Ok(Value::number(cur.f64()?)),
        3 => Ok(Value::string(cur.string()?)),
        other => Err(format!("invalid constant tag {other}")),
    }
}

fn read_debug(cur: &mut Cursor) -> Result<DebugInfo, String> {
    let num_lines = cur.u32()?;
    let mut lines = Vec::with_capacity(num_lines as usize);
    for _ in 0..num_lines {
        lines.push(cur.u32()?);
    }

    let num_locals = cur.u32()?;
    let mut locals = Vec::with_capacity(num_locals as usize);
    for _ in 0..num_locals {
        let name = cur.string()?;
        let start_pc = cur.u32()?;
        let end_pc = cur.u32()?;
        locals.push(LocalVarInfo {
            name,
            start_pc,
            end_pc,
        });
    }

    let num_upval_names = cur.u32()?;
    let mut upvalue_names = Vec::with_capacity(num_upval_names as usize);
    for _ in 0..num_upval_names {
        upvalue_names.push(cur.string()?);
    }

    Ok(DebugInfo {
        lines,
        locals,
        upvalue_names,
    })
}
