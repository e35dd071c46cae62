//! AST-to-bytecode lowering: one `FuncState` per nested function, walked
//! depth-first so a closure's `Proto` is finished before its parent emits
//! the `CLOSURE` that instantiates it.

use std::rc::Rc;

use crate::opcode::instruction::rk_const;
use crate::opcode::OpCode;
use crate::value::Value;
use crate::vm::error::LuaError;

use super::ast::*;
use super::func_state::FuncState;
use super::parser::Parser;
use super::proto::{Proto, UpvalSource};

/// Where a call's or expression-list's value count comes from: a
/// compile-time-known count, or "whatever the last call/vararg returns",
/// resolved at runtime via `Frame::top`.
enum ListLen {
    Fixed(u32),
    Multi,
}

enum Want {
    Fixed(u32),
    Multi,
}

enum NameRef {
    Local(u32),
    Upval(u32),
    Global,
}

pub struct Compiler {
    fs_stack: Vec<FuncState>,
    chunk_name: Rc<str>,
}

pub fn compile(source: &str, chunk_name: &str) -> Result<Proto, LuaError> {
    let mut parser = Parser::new(source).map_err(LuaError::syntax)?;
    let block = parser.parse_chunk().map_err(LuaError::syntax)?;
    let mut c = Compiler {
        fs_stack: Vec::new(),
        chunk_name: Rc::from(chunk_name),
    };
    let mut main = FuncState::new(c.chunk_name.clone(), 0);
    main.is_vararg = true;
    c.fs_stack.push(main);
    c.compile_block(&block)?;
    c.fs_mut().emit_abc(OpCode::Return, 0, 1, 0, 0);
    let fs = c.fs_stack.pop().unwrap();
    Ok(fs.into_proto(0))
}

impl Compiler {
    fn fs_mut(&mut self) -> &mut FuncState {
        self.fs_stack.last_mut().unwrap()
    }

    // ---- name resolution ----

    fn resolve_name(&mut self, name: &str) -> NameRef {
        let level = self.fs_stack.len() - 1;
        if let Some(r) = self.fs_stack[level].find_local(name) {
            return NameRef::Local(r);
        }
        if let Some(idx) = self.resolve_upvalue(level, name) {
            return NameRef::Upval(idx);
        }
        NameRef::Global
    }

    fn resolve_upvalue(&mut self, level: usize, name: &str) -> Option<u32> {
        if level == 0 {
            return None;
        }
        if let Some(idx) = self.fs_stack[level].find_existing_upvalue(name) {
            return Some(idx);
        }
        let parent = level - 1;
        if let Some(reg) = self.fs_stack[parent].find_local(name) {
            return Some(
                self.fs_stack[level].add_upvalue(name, UpvalSource::ParentLocal(reg)),
            );
        }
        if let Some(up) = self.resolve_upvalue(parent, name) {
            return Some(
                self.fs_stack[level].add_upvalue(name, UpvalSource::ParentUpval(up)),
            );
        }
        None
    }

    // ---- statements ----

    fn compile_block(&mut self, block: &Block) -> Result<(), LuaError> {
        for stat in &block.stats {
            self.compile_stat(stat)?;
        }
        Ok(())
    }

    fn compile_stat(&mut self, stat: &Stat) -> Result<(), LuaError> {
        match stat {
            Stat::Empty => Ok(()),
            Stat::Break(line) => {
                let jmp = self.fs_mut().emit_jmp(*line);
                if !self.fs_mut().record_break(jmp) {
                    return Err(LuaError::syntax_msg(*line, "break outside a loop"));
                }
                Ok(())
            }
            Stat::Do(block) => {
                self.fs_mut().enter_scope();
                self.compile_block(block)?;
                self.fs_mut().leave_scope();
                Ok(())
            }
            Stat::While(cond, body) => self.compile_while(cond, body),
            Stat::Repeat(body, cond) => self.compile_repeat(body, cond),
            Stat::If { arms, else_block } => self.compile_if(arms, else_block),
            Stat::NumericFor {
                var,
                start,
                stop,
                step,
                body,
                line,
            } => self.compile_numeric_for(var, start, stop, step.as_ref(), body, *line),
            Stat::GenericFor {
                names,
                exprs,
                body,
                line,
            } => self.compile_generic_for(names, exprs, body, *line),
            Stat::Local { names, exprs } => self.compile_local(names, exprs),
            Stat::LocalFunction(name, body) => self.compile_local_function(name, body),
            Stat::Assign {
                targets,
                exprs,
                line,
            } => self.compile_assign(targets, exprs, *line),
            Stat::ExprStat(e) => self.compile_expr_stat(e),
            Stat::Return(exprs, line) => self.compile_return(exprs, *line),
        }
    }

    fn compile_while(&mut self, cond: &Expr, body: &Block) -> Result<(), LuaError> {
        let mark = self.fs_mut().reg_mark();
        let start_pc = self.fs_mut().current_pc();
        let exit_jmp = self.compile_cond_jump(cond, false, cond.line())?;
        self.fs_mut().enter_scope();
        self.fs_mut().enter_loop();
        self.compile_block(body)?;
        let breaks = self.fs_mut().leave_loop();
        self.fs_mut().leave_scope();
        self.fs_mut().emit_jmp_back(start_pc, cond.line());
        self.fs_mut().patch_jmp_to_here(exit_jmp);
        for b in breaks {
            self.fs_mut().patch_jmp_to_here(b);
        }
        self.fs_mut().free_to(mark);
        Ok(())
    }

    fn compile_repeat(&mut self, body: &Block, cond: &Expr) -> Result<(), LuaError> {
        let mark = self.fs_mut().reg_mark();
        let start_pc = self.fs_mut().current_pc();
        self.fs_mut().enter_scope();
        self.fs_mut().enter_loop();
        self.compile_block(body)?;
        // `until` may reference locals declared in the body, so the
        // condition is compiled before the scope closes.
        let back_jmp = self.compile_cond_jump(cond, false, cond.line())?;
        let breaks = self.fs_mut().leave_loop();
        self.fs_mut().leave_scope();
        self.fs_mut().patch_jmp_to(back_jmp, start_pc);
        for b in breaks {
            self.fs_mut().patch_jmp_to_here(b);
        }
        self.fs_mut().free_to(mark);
        Ok(())
    }

    fn compile_if(
        &mut self,
        arms: &[(Expr, Block)],
        else_block: &Option<Block>,
    ) -> Result<(), LuaError> {
        let mark = self.fs_mut().reg_mark();
        let mut end_jumps = Vec::new();
        let n = arms.len();
        for (i, (cond, block)) in arms.iter().enumerate() {
            let line = cond.line();
            let skip_jmp = self.compile_cond_jump(cond, false, line)?;
            self.fs_mut().enter_scope();
            self.compile_block(block)?;
            self.fs_mut().leave_scope();
            let is_last = i + 1 == n && else_block.is_none();
            if !is_last {
                end_jumps.push(self.fs_mut().emit_jmp(line));
            }
            self.fs_mut().patch_jmp_to_here(skip_jmp);
        }
        if let Some(eb) = else_block {
            self.fs_mut().enter_scope();
            self.compile_block(eb)?;
            self.fs_mut().leave_scope();
        }
        for j in end_jumps {
            self.fs_mut().patch_jmp_to_here(j);
        }
        self.fs_mut().free_to(mark);
        Ok(())
    }

    fn compile_numeric_for(
        &mut self,
        var: &str,
        start: &Expr,
        stop: &Expr,
        step: Option<&Expr>,
        body: &Block,
        line: u32,
    ) -> Result<(), LuaError> {
        let mark = self.fs_mut().reg_mark();
        let idx_reg = self.fs_mut().alloc_reg();
        self.compile_expr_into(start, idx_reg)?;
        let limit_reg = self.fs_mut().alloc_reg();
        self.compile_expr_into(stop, limit_reg)?;
        let step_reg = self.fs_mut().alloc_reg();
        match step {
            Some(e) => self.compile_expr_into(e, step_reg)?,
            None => {
                let k = self.fs_mut().add_const(Value::integer(1));
                self.fs_mut().emit_abx(OpCode::LoadK, step_reg, k, line);
            }
        }
        let prep_pc = self.fs_mut().emit_asbx(OpCode::ForPrep, idx_reg, 0, line);
        self.fs_mut().enter_scope();
        let body_start = self.fs_mut().current_pc();
        self.fs_mut().add_local(var);
        self.fs_mut().enter_loop();
        self.compile_block(body)?;
        self.fs_mut().emit_abc(OpCode::Close, idx_reg + 3, 0, 0, line);
        let breaks = self.fs_mut().leave_loop();
        self.fs_mut().leave_scope();
        let loop_pc = self.fs_mut().emit_asbx(OpCode::ForLoop, idx_reg, 0, line);
        self.fs_mut().patch_jmp_to(prep_pc, loop_pc);
        self.fs_mut().patch_jmp_to(loop_pc, body_start);
        for b in breaks {
            self.fs_mut().patch_jmp_to_here(b);
        }
        self.fs_mut().free_to(mark);
        Ok(())
    }

    fn compile_generic_for(
        &mut self,
        names: &[String],
        exprs: &[Expr],
        body: &Block,
        line: u32,
    ) -> Result<(), LuaError> {
        let mark = self.fs_mut().reg_mark();
        let base = mark;
        self.compile_named_list(exprs, 3, line)?;
        self.fs_mut().enter_scope();
        let jmp_to_test = self.fs_mut().emit_jmp(line);
        let body_start = self.fs_mut().current_pc();
        for name in names {
            self.fs_mut().add_local(name);
        }
        self.fs_mut().enter_loop();
        self.compile_block(body)?;
        self.fs_mut()
            .emit_abc(OpCode::Close, base + 3, 0, 0, line);
        let breaks = self.fs_mut().leave_loop();
        self.fs_mut().patch_jmp_to_here(jmp_to_test);
        self.fs_mut()
            .emit_abc(OpCode::TForLoop, base, 0, names.len() as u32, line);
        self.fs_mut().emit_jmp_back(body_start, line);
        self.fs_mut().leave_scope();
        for b in breaks {
            self.fs_mut().patch_jmp_to_here(b);
        }
        self.fs_mut().free_to(mark);
        Ok(())
    }

    fn compile_local(&mut self, names: &[String], exprs: &[Expr]) -> Result<(), LuaError> {
        let line = exprs.first().map(|e| e.line()).unwrap_or(0);
        let first_reg = self.fs_mut().reg_mark();
        self.compile_named_list(exprs, names.len(), line)?;
        for (i, name) in names.iter().enumerate() {
            self.fs_mut().declare_local_at(name, first_reg + i as u32);
        }
        Ok(())
    }

    fn compile_local_function(&mut self, name: &str, body: &FuncBody) -> Result<(), LuaError> {
        let reg = self.fs_mut().add_local(name);
        let idx = self.compile_function(body)?;
        self.fs_mut().emit_abx(OpCode::Closure, reg, idx, body.line);
        Ok(())
    }

    fn compile_assign(
        &mut self,
        targets: &[Expr],
        exprs: &[Expr],
        line: u32,
    ) -> Result<(), LuaError> {
        let mark = self.fs_mut().reg_mark();
        let first_reg = mark;
        self.compile_named_list(exprs, targets.len(), line)?;
        for (i, target) in targets.iter().enumerate() {
            self.assign_to(target, first_reg + i as u32, line)?;
        }
        self.fs_mut().free_to(mark);
        Ok(())
    }

    fn assign_to(&mut self, target: &Expr, src_reg: u32, line: u32) -> Result<(), LuaError> {
        match target {
            Expr::Name(name) => match self.resolve_name(name) {
                NameRef::Local(r) => {
                    if r != src_reg {
                        self.fs_mut().emit_abc(OpCode::Move, r, src_reg, 0, line);
                    }
                    Ok(())
                }
                NameRef::Upval(idx) => {
                    self.fs_mut()
                        .emit_abc(OpCode::SetUpval, src_reg, idx, 0, line);
                    Ok(())
                }
                NameRef::Global => {
                    let k = self.fs_mut().add_const(Value::string(name.clone()));
                    self.fs_mut().emit_abx(OpCode::SetGlobal, src_reg, k, line);
                    Ok(())
                }
            },
            Expr::Index(obj, key, _) => {
                let mark = self.fs_mut().reg_mark();
                let obj_r = self.compile_expr_to_reg(obj)?;
                let key_rk = self.compile_expr_rk(key)?;
                self.fs_mut()
                    .emit_abc(OpCode::SetTable, obj_r, key_rk, src_reg, line);
                self.fs_mut().free_to(mark);
                Ok(())
            }
            _ => Err(LuaError::syntax_msg(line, "cannot assign to this expression")),
        }
    }

    fn compile_expr_stat(&mut self, e: &Expr) -> Result<(), LuaError> {
        match e {
            Expr::Call(callee, args, l) => self.compile_call(callee, None, args, 0, Want::Fixed(0), *l),
            Expr::MethodCall(obj, m, args, l) => {
                self.compile_call(obj, Some(m), args, 0, Want::Fixed(0), *l)
            }
            _ => Err(LuaError::syntax_msg(e.line(), "syntax error")),
        }
    }

    fn compile_return(&mut self, exprs: &[Expr], line: u32) -> Result<(), LuaError> {
        let mark = self.fs_mut().reg_mark();
        let first_reg = mark;
        let list = self.compile_open_list(exprs, line)?;
        let b = match list {
            ListLen::Fixed(n) => n + 1,
            ListLen::Multi => 0,
        };
        self.fs_mut().emit_abc(OpCode::Return, first_reg, b, 0, line);
        self.fs_mut().free_to(mark);
        Ok(())
    }

    // ---- condition compilation ----

    /// Materializes `cond` into a fresh register and emits a `TEST` +
    /// placeholder `JMP`; the `JMP` executes when the condition's
    /// truthiness equals `want`. Returns the `JMP`'s pc for the caller to
    /// patch.
    fn compile_cond_jump(&mut self, cond: &Expr, want: bool, line: u32) -> Result<usize, LuaError> {
        let mark = self.fs_mut().reg_mark();
        let reg = self.fs_mut().alloc_reg();
        self.compile_expr_into(cond, reg)?;
        self.fs_mut()
            .emit_abc(OpCode::Test, reg, 0, want as u32, line);
        let jmp = self.fs_mut().emit_jmp(line);
        self.fs_mut().free_to(mark);
        Ok(jmp)
    }

    // ---- expression-list helpers ----

    /// Fills exactly `count` contiguous registers (from the current reg
    /// mark) with the values of `exprs`, truncating or nil-padding as
    /// needed. When `exprs` is a single call/method-call, its result
    /// count is set directly via the `CALL` instruction's C field rather
    /// than via a separate multi-value expansion.
    fn compile_named_list(&mut self, exprs: &[Expr], count: usize, line: u32) -> Result<(), LuaError> {
        if exprs.len() == 1 {
            match &exprs[0] {
                Expr::Call(callee, args, l) => {
                    let dest = self.fs_mut().reg_mark();
                    for _ in 0..count {
                        self.fs_mut().alloc_reg();
                    }
                    return self.compile_call(callee, None, args, dest, Want::Fixed(count as u32), *l);
                }
                Expr::MethodCall(obj, m, args, l) => {
                    let dest = self.fs_mut().reg_mark();
                    for _ in 0..count {
                        self.fs_mut().alloc_reg();
                    }
                    return self.compile_call(obj, Some(m), args, dest, Want::Fixed(count as u32), *l);
                }
                _ => {}
            }
        }
        for i in 0..count {
            let r = self.fs_mut().alloc_reg();
            if let Some(e) = exprs.get(i) {
                self.compile_expr_into(e, r)?;
            } else {
                self.fs_mut().emit_abc(OpCode::LoadNil, r, 0, 0, line);
            }
        }
        for e in exprs.iter().skip(count) {
            let r = self.fs_mut().alloc_reg();
            self.compile_expr_into(e, r)?;
            self.fs_mut().free_reg();
        }
        Ok(())
    }

    /// Fills registers from the current reg mark with the values of
    /// `exprs`: every element but the last truncates to one value; the
    /// last expands to "all remaining results" when it is itself a
    /// call, method-call, or `...`.
    fn compile_open_list(&mut self, exprs: &[Expr], line: u32) -> Result<ListLen, LuaError> {
        if exprs.is_empty() {
            return Ok(ListLen::Fixed(0));
        }
        let n = exprs.len();
        for e in &exprs[..n - 1] {
            let r = self.fs_mut().alloc_reg();
            self.compile_expr_into(e, r)?;
        }
        match &exprs[n - 1] {
            Expr::Call(callee, args, l) => {
                let dest = self.fs_mut().reg_mark();
                self.compile_call(callee, None, args, dest, Want::Multi, *l)?;
                Ok(ListLen::Multi)
            }
            Expr::MethodCall(obj, m, args, l) => {
                let dest = self.fs_mut().reg_mark();
                self.compile_call(obj, Some(m), args, dest, Want::Multi, *l)?;
                Ok(ListLen::Multi)
            }
            Expr::Vararg => {
                let dest = self.fs_mut().alloc_reg();
                self.fs_mut().emit_abc(OpCode::Vararg, dest, 0, 0, line);
                Ok(ListLen::Multi)
            }
            other => {
                let r = self.fs_mut().alloc_reg();
                self.compile_expr_into(other, r)?;
                Ok(ListLen::Fixed(n as u32))
            }
        }
    }

    // ---- calls ----

    /// Compiles a call (or method call, when `method` is `Some`) whose
    /// function sits wherever `callee` evaluates to. `dest` is where the
    /// first (or only) result should land; for `Want::Multi` the caller
    /// must arrange for `dest` to already equal the current reg mark.
    fn compile_call(
        &mut self,
        callee: &Expr,
        method: Option<&str>,
        args: &[Expr],
        dest: u32,
        want: Want,
        line: u32,
    ) -> Result<(), LuaError> {
        let mark = self.fs_mut().reg_mark();
        let funcreg = self.fs_mut().alloc_reg();
        let self_extra = if method.is_some() { 1 } else { 0 };
        if let Some(m) = method {
            let obj_r = self.compile_expr_to_reg(callee)?;
            self.fs_mut().alloc_reg(); // self register, funcreg + 1
            let key_rk = rk_const(self.fs_mut().add_const(Value::string(m.to_string())));
            self.fs_mut()
                .emit_abc(OpCode::SelfOp, funcreg, obj_r, key_rk, line);
        } else {
            self.compile_expr_into(callee, funcreg)?;
        }
        let arg_list = self.compile_open_list(args, line)?;
        let b = match arg_list {
            ListLen::Fixed(n) => n + 1 + self_extra,
            ListLen::Multi => 0,
        };
        let c = match want {
            Want::Fixed(n) => n + 1,
            Want::Multi => 0,
        };
        self.fs_mut().emit_abc(OpCode::Call, funcreg, b, c, line);
        if let Want::Fixed(n) = want {
            if funcreg != dest {
                for i in 0..n {
                    self.fs_mut()
                        .emit_abc(OpCode::Move, dest + i, funcreg + i, 0, line);
                }
            }
        }
        self.fs_mut().free_to(mark);
        Ok(())
    }

    fn compile_function(&mut self, body: &FuncBody) -> Result<u32, LuaError> {
        let source = self.chunk_name.clone();
        let mut fs = FuncState::new(source, body.line);
        fs.num_params = body.params.len() as u8;
        fs.is_vararg = body.is_vararg;
        self.fs_stack.push(fs);
        self.fs_mut().enter_scope();
        for p in &body.params {
            self.fs_mut().add_local(p);
        }
        self.compile_block(&body.body)?;
        self.fs_mut().emit_abc(OpCode::Return, 0, 1, 0, body.line);
        self.fs_mut().leave_scope();
        let finished = self.fs_stack.pop().unwrap();
        let proto = finished.into_proto(body.line);
        Ok(self.fs_mut().add_sub_proto(proto))
    }

    // ---- expressions ----

    /// Compiles `e`'s *table/callee/self* position into a register,
    /// reusing the register directly when `e` is already a local.
    fn compile_expr_to_reg(&mut self, e: &Expr) -> Result<u32, LuaError> {
        if let Expr::Name(name) = e {
            if let NameRef::Local(r) = self.resolve_name(name) {
                return Ok(r);
            }
        }
        let r = self.fs_mut().alloc_reg();
        self.compile_expr_into(e, r)?;
        Ok(r)
    }

    /// Compiles `e` into an RK-encodable operand: a constant-pool
    /// reference for literals, a local's own register, or (for anything
    /// else) a freshly allocated temporary.
    fn compile_expr_rk(&mut self, e: &Expr) -> Result<u32, LuaError> {
        match e {
            Expr::Nil => Ok(rk_const(self.fs_mut().add_const(Value::Nil))),
            Expr::True => Ok(rk_const(self.fs_mut().add_const(Value::Bool(true)))),
            Expr::False => Ok(rk_const(self.fs_mut().add_const(Value::Bool(false)))),
            Expr::Int(i) => Ok(rk_const(self.fs_mut().add_const(Value::integer(*i)))),
            Expr::Number(n) => Ok(rk_const(self.fs_mut().add_const(Value::number(*n)))),
            Expr::Str(s) => Ok(rk_const(self.fs_mut().add_const(Value::string(s.clone())))),
            Expr::Name(name) => match self.resolve_name(name) {
                NameRef::Local(r) => Ok(r),
                _ => {
                    let r = self.fs_mut().alloc_reg();
                    self.compile_expr_into(e, r)?;
                    Ok(r)
                }
            },
            _ => {
                let r = self.fs_mut().alloc_reg();
                self.compile_expr_into(e, r)?;
                Ok(r)
            }
        }
    }

    /// Compiles `e` so it writes exactly one value into register `dest`.
    fn compile_expr_into(&mut self, e: &Expr, dest: u32) -> Result<(), LuaError> {
        match e {
            Expr::Nil => {
                self.fs_mut().emit_abc(OpCode::LoadNil, dest, 0, 0, 0);
                Ok(())
            }
            Expr::True => {
                self.fs_mut().emit_abc(OpCode::LoadBool, dest, 1, 0, 0);
                Ok(())
            }
            Expr::False => {
                self.fs_mut().emit_abc(OpCode::LoadBool, dest, 0, 0, 0);
                Ok(())
            }
            Expr::Int(i) => {
                let k = self.fs_mut().add_const(Value::integer(*i));
                self.fs_mut().emit_abx(OpCode::LoadK, dest, k, 0);
                Ok(())
            }
            Expr::Number(n) => {
                let k = self.fs_mut().add_const(Value::number(*n));
                self.fs_mut().emit_abx(OpCode::LoadK, dest, k, 0);
                Ok(())
            }
            Expr::Str(s) => {
                let k = self.fs_mut().add_const(Value::string(s.clone()));
                self.fs_mut().emit_abx(OpCode::LoadK, dest, k, 0);
                Ok(())
            }
            Expr::Vararg => {
                self.fs_mut().emit_abc(OpCode::Vararg, dest, 2, 0, 0);
                Ok(())
            }
            Expr::Name(name) => {
                match self.resolve_name(name) {
                    NameRef::Local(r) => {
                        if r != dest {
                            self.fs_mut().emit_abc(OpCode::Move, dest, r, 0, 0);
                        }
                    }
                    NameRef::Upval(idx) => {
                        self.fs_mut().emit_abc(OpCode::GetUpval, dest, idx, 0, 0);
                    }
                    NameRef::Global => {
                        let k = self.fs_mut().add_const(Value::string(name.clone()));
                        self.fs_mut().emit_abx(OpCode::GetGlobal, dest, k, 0);
                    }
                }
                Ok(())
            }
            Expr::Paren(inner) => self.compile_expr_into(inner, dest),
            Expr::Unary(op, operand, line) => {
                self.compile_expr_into(operand, dest)?;
                let opcode = match op {
                    UnOp::Neg => OpCode::Unm,
                    UnOp::Not => OpCode::Not,
                    UnOp::Len => OpCode::Len,
                };
                self.fs_mut().emit_abc(opcode, dest, dest, 0, *line);
                Ok(())
            }
            Expr::Binary(op, l, r, line) => self.compile_binary(*op, l, r, dest, *line),
            Expr::Table(fields, line) => self.compile_table(fields, dest, *line),
            Expr::Index(obj, key, line) => {
                let mark = self.fs_mut().reg_mark();
                let obj_r = self.compile_expr_to_reg(obj)?;
                let key_rk = self.compile_expr_rk(key)?;
                self.fs_mut()
                    .emit_abc(OpCode::GetTable, dest, obj_r, key_rk, *line);
                self.fs_mut().free_to(mark);
                Ok(())
            }
            Expr::Call(callee, args, line) => {
                self.compile_call(callee, None, args, dest, Want::Fixed(1), *line)
            }
            Expr::MethodCall(obj, m, args, line) => {
                self.compile_call(obj, Some(m), args, dest, Want::Fixed(1), *line)
            }
            Expr::Function(body) => {
                let idx = self.compile_function(body)?;
                self.fs_mut().emit_abx(OpCode::Closure, dest, idx, body.line);
                Ok(())
            }
        }
    }

    fn compile_binary(
        &mut self,
        op: BinOp,
        l: &Expr,
        r: &Expr,
        dest: u32,
        line: u32,
    ) -> Result<(), LuaError> {
        match op {
            BinOp::And => {
                self.compile_expr_into(l, dest)?;
                self.fs_mut().emit_abc(OpCode::Test, dest, 0, 0, line);
                let jmp = self.fs_mut().emit_jmp(line);
                self.compile_expr_into(r, dest)?;
                self.fs_mut().patch_jmp_to_here(jmp);
                Ok(())
            }
            BinOp::Or => {
                self.compile_expr_into(l, dest)?;
                self.fs_mut().emit_abc(OpCode::Test, dest, 0, 1, line);
                let jmp = self.fs_mut().emit_jmp(line);
                self.compile_expr_into(r, dest)?;
                self.fs_mut().patch_jmp_to_here(jmp);
                Ok(())
            }
            BinOp::Concat => self.compile_concat(l, r, dest, line),
            BinOp::Eq | BinOp::NotEq | BinOp::Less | BinOp::LessEq | BinOp::Greater | BinOp::GreaterEq => {
                self.compile_comparison(op, l, r, dest, line)
            }
            BinOp::Add | BinOp::Sub | BinOp::Mul | BinOp::Div | BinOp::Mod | BinOp::Pow => {
                let mark = self.fs_mut().reg_mark();
                let lr = self.compile_expr_rk(l)?;
                let rr = self.compile_expr_rk(r)?;
                let opcode = match op {
                    BinOp::Add => OpCode::Add,
                    BinOp::Sub => OpCode::Sub,
                    BinOp::Mul => OpCode::Mul,
                    BinOp::Div => OpCode::Div,
                    BinOp::Mod => OpCode::Mod,
                    BinOp::Pow => OpCode::Pow,
                    _ => unreachable!(),
                };
                self.fs_mut().emit_abc(opcode, dest, lr, rr, line);
                self.fs_mut().free_to(mark);
                Ok(())
            }
        }
    }

    fn compile_comparison(
        &mut self,
        op: BinOp,
        l: &Expr,
        r: &Expr,
        dest: u32,
        line: u32,
    ) -> Result<(), LuaError> {
        let (opcode, want, swap) = match op {
            BinOp::Eq => (OpCode::Eq, true, false),
            BinOp::NotEq => (OpCode::Eq, false, false),
            BinOp::Less => (OpCode::Lt, true, false),
            BinOp::LessEq => (OpCode::Le, true, false),
            BinOp::Greater => (OpCode::Lt, true, true),
            BinOp::GreaterEq => (OpCode::Le, true, true),
            _ => unreachable!(),
        };
        let mark = self.fs_mut().reg_mark();
        let (le, re) = if swap { (r, l) } else { (l, r) };
        let lr = self.compile_expr_rk(le)?;
        let rr = self.compile_expr_rk(re)?;
        self.fs_mut().emit_abc(opcode, want as u32, lr, rr, line);
        let jmp_true = self.fs_mut().emit_jmp(line);
        self.fs_mut().emit_abc(OpCode::LoadBool, dest, 0, 1, line);
        let true_pc = self.fs_mut().emit_abc(OpCode::LoadBool, dest, 1, 0, line);
        self.fs_mut().patch_jmp_to(jmp_true, true_pc);
        self.fs_mut().free_to(mark);
        Ok(())
    }

    fn compile_concat(&mut self, l: &Expr, r: &Expr, dest: u32, line: u32) -> Result<(), LuaError> {
        let mut parts = Vec::new();
        flatten_concat(l, &mut parts);
        flatten_concat(r, &mut parts);
        let mark = self.fs_mut().reg_mark();
        let start = self.fs_mut().alloc_reg();
        self.compile_expr_into(&parts[0], start)?;
        for p in &parts[1..] {
            let reg = self.fs_mut().alloc_reg();
            self.compile_expr_into(p, reg)?;
        }
        let end = start + parts.len() as u32 - 1;
        self.fs_mut().emit_abc(OpCode::Concat, dest, start, end, line);
        self.fs_mut().free_to(mark);
        Ok(())
    }

    fn compile_table(&mut self, fields: &[TableField], dest: u32, line: u32) -> Result<(), LuaError> {
        self.fs_mut().emit_abc(OpCode::NewTable, dest, 0, 0, line);
        if fields.len() == 1 {
            if let TableField::Positional(e) = &fields[0] {
                if matches!(e, Expr::Call(..) | Expr::MethodCall(..) | Expr::Vararg) {
                    let mark = self.fs_mut().reg_mark();
                    self.compile_open_list(std::slice::from_ref(e), line)?;
                    self.fs_mut().emit_abc(OpCode::SetList, dest, 0, 1, line);
                    self.fs_mut().free_to(mark);
                    return Ok(());
                }
            }
        }

        let mut batch_start: Option<u32> = None;
        let mut batch_count: u32 = 0;
        let mut block: u32 = 1;
        for field in fields {
            match field {
                TableField::Positional(e) => {
                    if batch_start.is_none() {
                        batch_start = Some(self.fs_mut().reg_mark());
                    }
                    let reg = self.fs_mut().alloc_reg();
                    self.compile_expr_into(e, reg)?;
                    batch_count += 1;
                    if batch_count == 50 {
                        self.fs_mut()
                            .emit_abc(OpCode::SetList, dest, batch_count, block, line);
                        self.fs_mut().free_to(batch_start.unwrap());
                        batch_start = None;
                        batch_count = 0;
                        block += 1;
                    }
                }
                TableField::Named(name, value) => {
                    let mark = self.fs_mut().reg_mark();
                    let key_rk = rk_const(self.fs_mut().add_const(Value::string(name.clone())));
                    let value_rk = self.compile_expr_rk(value)?;
                    self.fs_mut()
                        .emit_abc(OpCode::SetTable, dest, key_rk, value_rk, line);
                    self.fs_mut().free_to(mark);
                }
                TableField::Indexed(key, value) => {
                    let mark = self.fs_mut().reg_mark();
                    let key_rk = self.compile_expr_rk(key)?;
                    let value_rk = self.compile_expr_rk(value)?;
                    self.fs_mut()
                        .emit_abc(OpCode::SetTable, dest, key_rk, value_rk, line);
                    self.fs_mut().free_to(mark);
                }
            }
        }
        if batch_count > 0 {
            self.fs_mut()
                .emit_abc(OpCode::SetList, dest, batch_count, block, line);
            self.fs_mut().free_to(batch_start.unwrap());
        }
        Ok(())
    }
}

fn flatten_concat(e: &Expr, out: &mut Vec<Expr>) {
    if let Expr::Binary(BinOp::Concat, l, r, _) = e {
        flatten_concat(l, out);
        flatten_concat(r, out);
    } else {
        out.push(e.clone());
    }
}
