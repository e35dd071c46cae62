//! Serializes a compiled `Proto` tree to the binary format described in
//! spec.md §4.F / §6.

use crate::compiler::proto::{DebugInfo, LocalVarInfo, Proto, UpvalSource};
use crate::value::Value;

use super::header::Header;

/// Writes `proto` as a complete bytecode image (header + top-level
/// function). `strip` drops the debug block, matching `luac -s`.
pub fn write_proto(proto: &Proto, strip: bool) -> Vec<u8> {
    let mut buf = Vec::new();
    Header::write(&mut buf);
    write_function(&mut buf, proto, strip);
    buf
}

fn write_u32(buf: &mut Vec<u8>, v: u32) {
    buf.extend_from_slice(&v.to_le_bytes());
}

fn write_u64(buf: &mut Vec<u8>, v: u64) {
    buf.extend_from_slice(&v.to_le_bytes());
}

fn write_f64(buf: &mut Vec<u8>, v: f64) {
    buf.extend_from_slice(&v.to_le_bytes());
}

/// Length-prefixed string: 8-byte length *including* the trailing zero
/// byte, then the UTF-8 bytes, then the zero byte. Length 0 means the
/// empty string with no body at all (matches real Lua's convention for
/// an absent/empty source name).
fn write_string(buf: &mut Vec<u8>, s: &str) {
    if s.is_empty() {
        write_u64(buf, 0);
        return;
    }
    write_u64(buf, s.len() as u64 + 1);
    buf.extend_from_slice(s.as_bytes());
    buf.push(0);
}

fn write_constant(buf: &mut Vec<u8>, v: &Value) {
    match v {
        Value::Nil => buf.push(0),
        Value::Bool(b) => {
            buf.push(1);
            buf.push(if *b { 1 } else { 0 });
        }
        Value::Number(n) => {
            buf.push(2);
            write_f64(buf, *n);
        }
        Value::Str(s) => {
            buf.push(3);
            write_string(buf, s);
        }
        _ => unreachable!("only literal constants ever enter a Proto's constant pool"),
    }
}

fn write_function(buf: &mut Vec<u8>, proto: &Proto, strip: bool) {
    write_string(buf, &proto.source);
    write_u32(buf, proto.line_defined);
    write_u32(buf, proto.last_line_defined);
    buf.push(proto.num_params);
    buf.push(if proto.is_vararg { 1 } else { 0 });
    buf.push(proto.max_stack_size as u8);

    write_u32(buf, proto.code.len() as u32);
    for &instr in &proto.code {
        write_u32(buf, instr);
    }

    write_u32(buf, proto.consts.len() as u32);
    for k in &proto.consts {
        write_constant(buf, k);
    }

    write_u32(buf, proto.upvalues.len() as u32);
    for up in &proto.upvalues {
        match up {
            UpvalSource::ParentLocal(r) => {
                buf.push(0);
                write_u32(buf, *r);
            }
            UpvalSource::ParentUpval(u) => {
                buf.push(1);
                write_u32(buf, *u);
            }
        }
    }

    write_u32(buf, proto.sub_protos.len() as u32);
    for sub in &proto.sub_protos {
        write_function(buf, sub, strip);
    }

    write_debug(buf, &proto.debug, strip);
}

fn write_debug(buf: &mut Vec<u8>, debug: &DebugInfo, strip: bool) {
    if strip {
        write_u32(buf, 0);
        write_u32(buf, 0);
        write_u32(buf, 0);
        return;
    }
    write_u32(buf, debug.lines.len() as u32);
    for &line in &debug.lines {
        write_u32(buf, line);
    }
    write_u32(buf, debug.locals.len() as u32);
    for local in &debug.locals {
        write_local(buf, local);
    }
    write_u32(buf, debug.upvalue_names.len() as u32);
    for name in &debug.upvalue_names {
        write_string(buf, name);
    }
}

fn write_local(buf: &mut Vec<u8>, local: &LocalVarInfo) {
    write_string(buf, &local.name);
    write_u32(buf, local.start_pc);
    write_u32(buf, local.end_pc);
}
