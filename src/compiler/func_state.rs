//! Per-function compile-time state: register allocator, local/upvalue
//! tables, constant pool, and jump-patch bookkeeping.

use std::rc::Rc;

use ahash::AHashMap;

use crate::opcode::{Instruction, OpCode};
use crate::value::Value;

use super::proto::{DebugInfo, LocalVarInfo, Proto, UpvalSource};

const MAX_REGS: u32 = 255;

#[derive(Clone, PartialEq)]
enum ConstKey {
    Nil,
    Bool(bool),
    Num(u64),
    Str(String),
}

fn const_key(v: &Value) -> ConstKey {
    match v {
        Value::Nil => ConstKey::Nil,
        Value::Bool(b) => ConstKey::Bool(*b),
        Value::Number(n) => ConstKey::Num(n.to_bits()),
        Value::Str(s) => ConstKey::Str(s.to_string()),
        _ => unreachable!("only literal constants are pooled"),
    }
}

impl std::hash::Hash for ConstKey {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        match self {
            ConstKey::Nil => 0u8.hash(state),
            ConstKey::Bool(b) => (1u8, b).hash(state),
            ConstKey::Num(bits) => (2u8, bits).hash(state),
            ConstKey::Str(s) => (3u8, s).hash(state),
        }
    }
}
impl Eq for ConstKey {}

struct LocalVar {
    name: Rc<str>,
    reg: u32,
    depth: u32,
    start_pc: u32,
}

pub struct FuncState {
    pub num_params: u8,
    pub is_vararg: bool,
    pub source: Rc<str>,
    pub line_defined: u32,

    consts: Vec<Value>,
    const_index: AHashMap<ConstKey, u32>,
    code: Vec<u32>,
    lines: Vec<u32>,
    sub_protos: Vec<Rc<Proto>>,

    pub upvalues: Vec<UpvalSource>,
    pub upvalue_names: Vec<Rc<str>>,

    locals: Vec<LocalVar>,
    scope_depth: u32,
    used_regs: u32,
    max_regs: u32,
    debug_locals: Vec<LocalVarInfo>,

    /// One entry per currently-open loop; each holds the pcs of pending
    /// `break` jumps inside it, patched once the loop's exit pc is known.
    break_stack: Vec<Vec<usize>>,
}

impl FuncState {
    pub fn new(source: Rc<str>, line_defined: u32) -> FuncState {
        FuncState {
            num_params: 0,
            is_vararg: false,
            source,
            line_defined,
            consts: Vec::new(),
            const_index: AHashMap::new(),
            code: Vec::new(),
            lines: Vec::new(),
            sub_protos: Vec::new(),
            upvalues: Vec::new(),
            upvalue_names: Vec::new(),
            locals: Vec::new(),
            scope_depth: 0,
            used_regs: 0,
            max_regs: 0,
            debug_locals: Vec::new(),
            break_stack: Vec::new(),
        }
    }

    // ---- registers ----

    pub fn alloc_reg(&mut self) -> u32 {
        let r = self.used_regs;
        self.used_regs += 1;
        if self.used_regs > self.max_regs {
            self.max_regs = self.used_regs;
        }
        assert!(self.used_regs <= MAX_REGS, "function uses too many registers");
        r
    }

    pub fn reg_mark(&self) -> u32 {
        self.used_regs
    }

    /// Frees every register allocated since `mark`. Callers must respect
    /// LIFO discipline: `mark` must be <= the current top.
    pub fn free_to(&mut self, mark: u32) {
        debug_assert!(mark <= self.used_regs);
        self.used_regs = mark;
    }

    pub fn free_reg(&mut self) {
        self.used_regs -= 1;
    }

    // ---- locals ----

    pub fn enter_scope(&mut self) {
        self.scope_depth += 1;
    }

    pub fn leave_scope(&mut self) {
        let end_pc = self.current_pc() as u32;
        while let Some(local) = self.locals.last() {
            if local.depth < self.scope_depth {
                break;
            }
            let local = self.locals.pop().unwrap();
            self.debug_locals.push(LocalVarInfo {
                name: local.name,
                start_pc: local.start_pc,
                end_pc,
            });
        }
        self.used_regs = self.locals.iter().map(|l| l.reg + 1).max().unwrap_or(0);
        self.scope_depth -= 1;
    }

    /// Declares a new local at the next free register. Locals hold fixed
    /// registers from declaration until their scope exits.
    pub fn add_local(&mut self, name: &str) -> u32 {
        let reg = self.alloc_reg();
        self.locals.push(LocalVar {
            name: Rc::from(name),
            reg,
            depth: self.scope_depth,
            start_pc: self.current_pc() as u32,
        });
        reg
    }

    /// Binds `name` to an already-allocated register (used when the
    /// initializer was compiled directly into the local's slot, so no
    /// extra register or move is needed).
    pub fn declare_local_at(&mut self, name: &str, reg: u32) {
        self.locals.push(LocalVar {
            name: Rc::from(name),
            reg,
            depth: self.scope_depth,
            start_pc: self.current_pc() as u32,
        });
    }

    pub fn find_local(&self, name: &str) -> Option<u32> {
        self.locals
            .iter()
            .rev()
            .find(|l| &*l.name == name)
            .map(|l| l.reg)
    }

    // ---- upvalues ----

    pub fn find_existing_upvalue(&self, name: &str) -> Option<u32> {
        self.upvalue_names
            .iter()
            .position(|n| &**n == name)
            .map(|i| i as u32)
    }

    pub fn add_upvalue(&mut self, name: &str, source: UpvalSource) -> u32 {
        let idx = self.upvalues.len() as u32;
        self.upvalues.push(source);
        self.upvalue_names.push(Rc::from(name));
        idx
    }

    // ---- constants ----

    pub fn add_const(&mut self, v: Value) -> u32 {
        let key = const_key(&v);
        if let Some(&idx) = self.const_index.get(&key) {
            return idx;
        }
        let idx = self.consts.len() as u32;
        self.consts.push(v);
        self.const_index.insert(key, idx);
        idx
    }

    pub fn add_sub_proto(&mut self, proto: Proto) -> u32 {
        let idx = self.sub_protos.len() as u32;
        self.sub_protos.push(Rc::new(proto));
        idx
    }

    // ---- code emission ----

    pub fn current_pc(&self) -> usize {
        self.code.len()
    }

    fn push(&mut self, instr: Instruction, line: u32) -> usize {
        let pc = self.code.len();
        self.code.push(instr.0);
        self.lines.push(line);
        pc
    }

    pub fn emit_abc(&mut self, op: OpCode, a: u32, b: u32, c: u32, line: u32) -> usize {
        self.push(Instruction::encode_abc(op, a, b, c), line)
    }

    pub fn emit_abx(&mut self, op: OpCode, a: u32, bx: u32, line: u32) -> usize {
        self.push(Instruction::encode_abx(op, a, bx), line)
    }

    pub fn emit_asbx(&mut self, op: OpCode, a: u32, sbx: i32, line: u32) -> usize {
        self.push(Instruction::encode_asbx(op, a, sbx), line)
    }

    /// Emits a `JMP` with a placeholder offset, to be patched later via
    /// `patch_jmp_to_here` or `patch_jmp_to`.
    pub fn emit_jmp(&mut self, line: u32) -> usize {
        self.push(Instruction::placeholder_jmp(), line)
    }

    pub fn patch_jmp_to_here(&mut self, jmp_pc: usize) {
        let target = self.current_pc();
        self.patch_jmp_to(jmp_pc, target);
    }

    pub fn patch_jmp_to(&mut self, jmp_pc: usize, target_pc: usize) {
        let offset = target_pc as i32 - jmp_pc as i32 - 1;
        let mut instr = Instruction(self.code[jmp_pc]);
        instr.patch_sbx(offset);
        self.code[jmp_pc] = instr.0;
    }

    /// Emits a backward jump straight to `target_pc` (no patch needed).
    pub fn emit_jmp_back(&mut self, target_pc: usize, line: u32) -> usize {
        let pc = self.current_pc();
        let offset = target_pc as i32 - pc as i32 - 1;
        self.emit_asbx(OpCode::Jmp, 0, offset, line)
    }

    // ---- break/loop tracking ----

    pub fn enter_loop(&mut self) {
        self.break_stack.push(Vec::new());
    }

    /// Pops the current loop's pending-break list; caller patches each
    /// pc to jump past the loop.
    pub fn leave_loop(&mut self) -> Vec<usize> {
        self.break_stack.pop().unwrap_or_default()
    }

    pub fn record_break(&mut self, pc: usize) -> bool {
        match self.break_stack.last_mut() {
            Some(list) => {
                list.push(pc);
                true
            }
            None => false,
        }
    }

    pub fn max_stack_size(&self) -> u32 {
        self.max_regs.max(2)
    }

    pub fn into_proto(mut self, last_line: u32) -> Proto {
        let end_pc = self.code.len() as u32;
        while let Some(local) = self.locals.pop() {
            self.debug_locals.push(LocalVarInfo {
                name: local.name,
                start_pc: local.start_pc,
                end_pc,
            });
        }
        let max_stack_size = self.max_stack_size();
        Proto {
            source: self.source,
            line_defined: self.line_defined,
            last_line_defined: last_line,
            num_params: self.num_params,
            is_vararg: self.is_vararg,
            max_stack_size,
            code: self.code,
            consts: self.consts,
            sub_protos: self.sub_protos,
            upvalues: self.upvalues,
            debug: DebugInfo {
                lines: self.lines,
                locals: self.debug_locals,
                upvalue_names: self.upvalue_names,
            },
        }
    }
}
