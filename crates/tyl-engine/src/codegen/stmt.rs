//! Statement emission: control flow, loops with break/continue labels,
//! `lock`/`with`/`scope` lowering with cleanup on every exit path,
//! contracts, `delete`, and `match` as a comparison chain.

use super::abi::SHADOW_SPACE;
use super::x64::{Cond, Reg};
use super::{Cleanup, CodeGen, CodegenError};
use crate::parser::ast::*;

impl CodeGen {
    pub(crate) fn emit_statement(&mut self, statement: &Statement) -> Result<(), CodegenError> {
        match statement {
            Statement::VarDecl(decl) => self.emit_var_decl(decl),
            Statement::MultiVarDecl(decl) => self.emit_multi_var_decl(decl),
            Statement::Destructuring(decl) => self.emit_destructuring(decl),
            Statement::Expression(stmt) => {
                self.emit_expr(&stmt.expression)?;
                Ok(())
            }
            Statement::Return(ret) => self.emit_return(ret),
            Statement::If(if_stmt) => self.emit_if(if_stmt),
            Statement::Unless(unless) => self.emit_unless(unless),
            Statement::While(while_stmt) => self.emit_while(while_stmt),
            Statement::For(for_stmt) => self.emit_for(for_stmt),
            Statement::Loop(loop_stmt) => self.emit_loop(loop_stmt),
            Statement::Match(match_stmt) => self.emit_match(match_stmt),
            Statement::Break(brk) => {
                let frame = self.loop_frame(brk.label.as_deref()).cloned().ok_or_else(|| {
                    CodegenError::Unsupported {
                        what: "break outside a loop".into(),
                        span: brk.span,
                    }
                })?;
                self.buf.jmp_label(frame.break_label);
                Ok(())
            }
            Statement::Continue(cont) => {
                let frame = self
                    .loop_frame(cont.label.as_deref())
                    .cloned()
                    .ok_or_else(|| CodegenError::Unsupported {
                        what: "continue outside a loop".into(),
                        span: cont.span,
                    })?;
                self.buf.jmp_label(frame.continue_label);
                Ok(())
            }
            Statement::Block(block) => {
                for inner in &block.statements {
                    self.emit_statement(inner)?;
                }
                Ok(())
            }
            Statement::Unsafe(block) => {
                for inner in &block.body {
                    self.emit_statement(inner)?;
                }
                Ok(())
            }
            Statement::Lock(lock) => self.emit_lock(lock),
            Statement::With(with) => self.emit_with(with),
            Statement::Scope(scope) => self.emit_scope(scope),
            Statement::Delete(delete) => {
                self.emit_expr(&delete.target)?;
                self.emit_heap_free_rax();
                Ok(())
            }
            Statement::Require(require) => {
                self.emit_contract_check(&require.condition, "Contract violated: require")
            }
            Statement::Ensure(ensure) => {
                self.emit_contract_check(&ensure.condition, "Contract violated: ensure")
            }
            Statement::ComptimeAssert(assert) => {
                // CTFE/folding resolved satisfiable assertions already; a
                // literal false here is a hard error
                if let Expression::BoolLiteral(lit) = &assert.condition {
                    if !lit.value {
                        return Err(CodegenError::ComptimeAssertFailed {
                            message: assert.message.clone(),
                            span: assert.span,
                        });
                    }
                }
                Ok(())
            }
            // Comptime blocks were evaluated during optimization
            Statement::ComptimeBlock(_) => Ok(()),
            Statement::InlineAsm(asm) => Err(CodegenError::Unsupported {
                what: "inline assembly".into(),
                span: asm.span,
            }),
            Statement::IfLet(if_let) => Err(CodegenError::Unsupported {
                what: "if-let at code generation".into(),
                span: if_let.span,
            }),
            Statement::Handle(handle) => Err(CodegenError::Unsupported {
                what: "effect handlers require the effects runtime".into(),
                span: handle.span,
            }),
            // Declarations at statement level were hoisted or registered
            // during the pre-scan
            Statement::Fn(_)
            | Statement::Record(_)
            | Statement::Union(_)
            | Statement::Enum(_)
            | Statement::TypeAlias(_)
            | Statement::Trait(_)
            | Statement::Impl(_)
            | Statement::Concept(_)
            | Statement::Effect(_)
            | Statement::Use(_)
            | Statement::Module(_)
            | Statement::ExternBlock(_)
            | Statement::Macro(_)
            | Statement::InfixMacro(_)
            | Statement::SyntaxMacro(_)
            | Statement::Layer(_)
            | Statement::DslBlock(_) => Ok(()),
        }
    }

    fn emit_multi_var_decl(&mut self, decl: &MultiVarDecl) -> Result<(), CodegenError> {
        // Constants record every name; one evaluation feeds every slot
        if decl.is_const {
            if let Some(value) = self.try_eval_const_int(&decl.initializer) {
                for name in &decl.names {
                    self.const_vars.insert(name.clone(), value);
                }
                return Ok(());
            }
        }
        self.emit_expr(&decl.initializer)?;
        for name in &decl.names {
            if let Some(&reg) = self.var_registers.get(name) {
                self.buf.mov_reg_reg(reg, Reg::Rax);
            } else {
                let offset = self.alloc_local(name);
                self.buf.mov_local_reg(offset, Reg::Rax);
            }
        }
        Ok(())
    }

    fn emit_destructuring(&mut self, decl: &DestructuringDecl) -> Result<(), CodegenError> {
        let kind = self.emit_expr(&decl.initializer)?;
        let ptr_slot = self.push_spill(decl.span)?;
        self.buf.mov_local_reg(ptr_slot, Reg::Rax);

        let names: &[String] = match &decl.pattern {
            DestructurePattern::Tuple(names) => names,
            DestructurePattern::Record(names) => names,
        };

        for (index, name) in names.iter().enumerate() {
            let source_offset = match (&decl.pattern, &kind) {
                (DestructurePattern::Record(_), super::expr::ValueKind::Record(type_name)) => self
                    .record_layouts
                    .get(type_name)
                    .and_then(|layout| layout.field_offset(name))
                    .unwrap_or((index * 8) as i32),
                // Lists are 1-based; tuples index from the first element
                (DestructurePattern::Tuple(_), super::expr::ValueKind::List) => {
                    (8 + index * 8) as i32
                }
                _ => (index * 8) as i32,
            };
            self.buf.mov_reg_local(Reg::Rax, ptr_slot);
            self.buf.mov_reg_mem(Reg::Rax, Reg::Rax, source_offset);
            let offset = self.alloc_local(name);
            self.buf.mov_local_reg(offset, Reg::Rax);
        }
        self.pop_spill();
        Ok(())
    }

    fn emit_return(&mut self, ret: &ReturnStmt) -> Result<(), CodegenError> {
        if let Some(value) = &ret.value {
            self.emit_expr(value)?;
        } else {
            self.buf.mov_reg_imm32(Reg::Rax, 0);
        }
        // Early exits run the pending lock/with cleanups first
        self.emit_cleanups_for_exit();
        self.buf.jmp_label(self.epilogue_label());
        self.emit_asm("  jmp epilogue");
        Ok(())
    }

    fn emit_condition_jump_false(
        &mut self,
        condition: &Expression,
        target: &str,
    ) -> Result<(), CodegenError> {
        self.emit_expr(condition)?;
        self.buf.test_reg_reg(Reg::Rax, Reg::Rax);
        self.buf.jcc_label(Cond::Eq, target.to_string());
        Ok(())
    }

    fn emit_if(&mut self, if_stmt: &IfStmt) -> Result<(), CodegenError> {
        let end_label = self.fresh_label("if_end");

        let mut next_label = self.fresh_label("if_next");
        self.emit_condition_jump_false(&if_stmt.condition, &next_label)?;
        for inner in &if_stmt.then_branch {
            self.emit_statement(inner)?;
        }
        self.buf.jmp_label(end_label.clone());

        for (condition, branch) in &if_stmt.elif_branches {
            self.buf.bind_label(next_label.clone())?;
            next_label = self.fresh_label("if_next");
            self.emit_condition_jump_false(condition, &next_label)?;
            for inner in branch {
                self.emit_statement(inner)?;
            }
            self.buf.jmp_label(end_label.clone());
        }

        self.buf.bind_label(next_label)?;
        if let Some(branch) = &if_stmt.else_branch {
            for inner in branch {
                self.emit_statement(inner)?;
            }
        }
        self.buf.bind_label(end_label)?;
        Ok(())
    }

    fn emit_unless(&mut self, unless: &UnlessStmt) -> Result<(), CodegenError> {
        let end_label = self.fresh_label("unless_end");
        self.emit_expr(&unless.condition)?;
        self.buf.test_reg_reg(Reg::Rax, Reg::Rax);
        self.buf.jcc_label(Cond::Ne, end_label.clone());
        for inner in &unless.body {
            self.emit_statement(inner)?;
        }
        self.buf.bind_label(end_label)?;
        Ok(())
    }

    fn emit_while(&mut self, while_stmt: &WhileStmt) -> Result<(), CodegenError> {
        let head = self.fresh_label("while_head");
        let end = self.fresh_label("while_end");
        self.push_loop(end.clone(), head.clone(), while_stmt.label.clone());

        self.buf.bind_label(head.clone())?;
        self.emit_condition_jump_false(&while_stmt.condition, &end)?;
        for inner in &while_stmt.body {
            self.emit_statement(inner)?;
        }
        self.buf.jmp_label(head);
        self.buf.bind_label(end)?;

        self.pop_loop();
        Ok(())
    }

    /// `for i in a..b` / `a..=b`: the induction variable owns a slot; the
    /// bound is computed once.
    fn emit_for(&mut self, for_stmt: &ForStmt) -> Result<(), CodegenError> {
        let Expression::Range(range) = &for_stmt.iterable else {
            return Err(CodegenError::Unsupported {
                what: "for over a non-range iterable".into(),
                span: for_stmt.span,
            });
        };

        let head = self.fresh_label("for_head");
        let step = self.fresh_label("for_step");
        let end = self.fresh_label("for_end");

        let bound_slot = self.push_spill(for_stmt.span)?;
        self.emit_expr(&range.end)?;
        self.buf.mov_local_reg(bound_slot, Reg::Rax);

        self.emit_expr(&range.start)?;
        let var_offset = self.alloc_local(&for_stmt.var);
        self.buf.mov_local_reg(var_offset, Reg::Rax);

        self.push_loop(end.clone(), step.clone(), for_stmt.label.clone());

        self.buf.bind_label(head.clone())?;
        self.buf.mov_reg_local(Reg::Rax, var_offset);
        self.buf.mov_reg_local(Reg::Rcx, bound_slot);
        self.buf.cmp_reg_reg(Reg::Rax, Reg::Rcx);
        let exit_cond = if range.inclusive { Cond::Gt } else { Cond::Ge };
        self.buf.jcc_label(exit_cond, end.clone());

        for inner in &for_stmt.body {
            self.emit_statement(inner)?;
        }

        self.buf.bind_label(step)?;
        self.buf.mov_reg_local(Reg::Rax, var_offset);
        self.buf.add_reg_imm32(Reg::Rax, 1);
        self.buf.mov_local_reg(var_offset, Reg::Rax);
        self.buf.jmp_label(head);
        self.buf.bind_label(end)?;

        self.pop_loop();
        self.pop_spill();
        Ok(())
    }

    fn emit_loop(&mut self, loop_stmt: &LoopStmt) -> Result<(), CodegenError> {
        let head = self.fresh_label("loop_head");
        let end = self.fresh_label("loop_end");
        self.push_loop(end.clone(), head.clone(), loop_stmt.label.clone());
        self.buf.bind_label(head.clone())?;
        for inner in &loop_stmt.body {
            self.emit_statement(inner)?;
        }
        self.buf.jmp_label(head);
        self.buf.bind_label(end)?;
        self.pop_loop();
        Ok(())
    }

    /// `match` lowers to a comparison chain over integer-comparable
    /// patterns; bindings and guards compose on top.
    fn emit_match(&mut self, match_stmt: &MatchStmt) -> Result<(), CodegenError> {
        let end = self.fresh_label("match_end");
        let scrutinee_slot = self.push_spill(match_stmt.span)?;
        self.emit_expr(&match_stmt.scrutinee)?;
        self.buf.mov_local_reg(scrutinee_slot, Reg::Rax);

        for arm in &match_stmt.arms {
            let next = self.fresh_label("match_next");
            match &arm.pattern {
                MatchPattern::Literal(literal) => {
                    let value = self.try_eval_const_int(literal).ok_or_else(|| {
                        CodegenError::Unsupported {
                            what: "non-integer match pattern".into(),
                            span: arm.span,
                        }
                    })?;
                    self.buf.mov_reg_local(Reg::Rax, scrutinee_slot);
                    self.buf.cmp_reg_imm32(Reg::Rax, value as i32);
                    self.buf.jcc_label(Cond::Ne, next.clone());
                }
                MatchPattern::Range { lo, hi, inclusive } => {
                    let lo = self.try_eval_const_int(lo).ok_or_else(|| {
                        CodegenError::Unsupported {
                            what: "non-constant range pattern".into(),
                            span: arm.span,
                        }
                    })?;
                    let hi = self.try_eval_const_int(hi).ok_or_else(|| {
                        CodegenError::Unsupported {
                            what: "non-constant range pattern".into(),
                            span: arm.span,
                        }
                    })?;
                    self.buf.mov_reg_local(Reg::Rax, scrutinee_slot);
                    self.buf.cmp_reg_imm32(Reg::Rax, lo as i32);
                    self.buf.jcc_label(Cond::Lt, next.clone());
                    self.buf.cmp_reg_imm32(Reg::Rax, hi as i32);
                    let out = if *inclusive { Cond::Gt } else { Cond::Ge };
                    self.buf.jcc_label(out, next.clone());
                }
                MatchPattern::Wildcard => {}
                MatchPattern::Binding(name) => {
                    let offset = self.alloc_local(name);
                    self.buf.mov_reg_local(Reg::Rax, scrutinee_slot);
                    self.buf.mov_local_reg(offset, Reg::Rax);
                }
            }

            if let Some(guard) = &arm.guard {
                self.emit_condition_jump_false(guard, &next)?;
            }
            for inner in &arm.body {
                self.emit_statement(inner)?;
            }
            self.buf.jmp_label(end.clone());
            self.buf.bind_label(next)?;
        }

        self.buf.bind_label(end)?;
        self.pop_spill();
        Ok(())
    }

    /// `lock m:` acquires the mutex handle, runs the body, and releases
    /// on every exit path (normal, return, break).
    fn emit_lock(&mut self, lock: &LockStmt) -> Result<(), CodegenError> {
        // The mutex value is a { handle, value } pair
        self.emit_expr(&lock.mutex)?;
        self.buf.mov_reg_mem(Reg::Rax, Reg::Rax, 0);
        let handle_slot = self.push_spill(lock.span)?;
        self.buf.mov_local_reg(handle_slot, Reg::Rax);

        // WaitForSingleObject(handle, INFINITE)
        let wait = self.imports.kernel32("WaitForSingleObject");
        self.buf.mov_reg_reg(Reg::Rcx, Reg::Rax);
        self.buf.mov_reg_imm32(Reg::Rdx, -1);
        self.buf.sub_reg_imm32(Reg::Rsp, SHADOW_SPACE);
        self.buf.call_import(&wait);
        self.buf.add_reg_imm32(Reg::Rsp, SHADOW_SPACE);
        self.emit_asm("  ; lock: WaitForSingleObject(handle, INFINITE)");

        self.push_cleanup(Cleanup::ReleaseMutex {
            handle_offset: handle_slot,
        });
        for inner in &lock.body {
            self.emit_statement(inner)?;
        }
        let cleanup = self.pop_cleanup().expect("lock cleanup pushed above");
        self.emit_cleanup(&cleanup);
        self.pop_spill();
        Ok(())
    }

    /// `with acquire as name:` binds the resource and guarantees the
    /// release hook runs before any exit.
    fn emit_with(&mut self, with: &WithStmt) -> Result<(), CodegenError> {
        self.emit_expr(&with.acquire)?;
        let slot = match &with.binding {
            Some(name) => self.alloc_local(name),
            None => self.push_spill(with.span)?,
        };
        self.buf.mov_local_reg(slot, Reg::Rax);

        self.push_cleanup(Cleanup::ReleaseResource { slot_offset: slot });
        for inner in &with.body {
            self.emit_statement(inner)?;
        }
        let cleanup = self.pop_cleanup().expect("with cleanup pushed above");
        self.emit_cleanup(&cleanup);
        if with.binding.is_none() {
            self.pop_spill();
        }
        Ok(())
    }

    fn emit_scope(&mut self, scope: &ScopeStmt) -> Result<(), CodegenError> {
        if scope.timeout.is_some() {
            // Deadline enforcement needs the structured-concurrency
            // runtime; the body still runs to completion here.
            self.warn(
                "E4101",
                "scope timeout is not enforced by this backend",
                scope.span,
            );
        }
        // A labelled scope doubles as a break target
        let end = self.fresh_label("scope_end");
        if scope.label.is_some() {
            self.push_loop(end.clone(), end.clone(), scope.label.clone());
        }
        for inner in &scope.body {
            self.emit_statement(inner)?;
        }
        if scope.label.is_some() {
            self.pop_loop();
        }
        self.buf.bind_label(end)?;
        Ok(())
    }

    fn emit_contract_check(
        &mut self,
        condition: &Expression,
        message: &str,
    ) -> Result<(), CodegenError> {
        let stub = self.error_stub(message);
        self.emit_expr(condition)?;
        self.buf.test_reg_reg(Reg::Rax, Reg::Rax);
        self.buf.jcc_label(Cond::Eq, stub);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifact::CodeArtifact;
    use crate::optimize::OptLevel;
    use crate::parser::Parser;

    fn compile(source: &str) -> CodeArtifact {
        let program = Parser::parse_source(source, "t.tyl").unwrap();
        CodeGen::new("t.tyl", OptLevel::O0)
            .compile(&program)
            .expect("codegen ok")
    }

    #[test]
    fn if_else_compiles() {
        let artifact = compile(
            "fn main(a: int) -> int:\n    if a > 1:\n        return 1\n    else:\n        return 2\n",
        );
        assert!(artifact.find_symbol("main").is_some());
    }

    #[test]
    fn while_loop_with_break() {
        let artifact = compile(
            "fn main() -> int:\n    mut i = 0\n    while i < 10:\n        i = i + 1\n        if i > 5:\n            break\n    return i\n",
        );
        assert!(artifact.find_symbol("main").is_some());
    }

    #[test]
    fn for_range_loop() {
        let artifact = compile(
            "fn main() -> int:\n    mut x = 0\n    for i in 1..=5:\n        x = x + i\n    return x\n",
        );
        assert!(artifact.find_symbol("main").is_some());
    }

    #[test]
    fn labelled_break_targets_outer_loop() {
        let artifact = compile(
            "fn main() -> int:\n    outer: for i in 1..10:\n        for j in 1..10:\n            break outer\n    return 0\n",
        );
        assert!(artifact.find_symbol("main").is_some());
    }

    #[test]
    fn match_lowering() {
        let artifact = compile(
            "fn main(x: int) -> int:\n    match x:\n        0 => return 10\n        1..=5 => return 20\n        _ => return 30\n",
        );
        assert!(artifact.find_symbol("main").is_some());
    }

    #[test]
    fn lock_releases_mutex() {
        let artifact = compile(
            "fn main() -> int:\n    let m = Mutex[int](0)\n    lock m:\n        let x = 1\n    return 0\n",
        );
        assert!(artifact
            .imports
            .iter()
            .any(|i| i.symbol == "WaitForSingleObject"));
        assert!(artifact.imports.iter().any(|i| i.symbol == "ReleaseMutex"));
    }

    #[test]
    fn contract_violation_path() {
        let artifact = compile("fn main(n: int) -> int:\n    require n > 0\n    return n\n");
        let rdata = String::from_utf8_lossy(&artifact.rdata);
        assert!(rdata.contains("Contract violated: require"));
    }

    #[test]
    fn delete_calls_heap_free() {
        let artifact = compile(
            "fn main() -> int:\n    let xs = [1, 2]\n    delete xs\n    return 0\n",
        );
        assert!(artifact.imports.iter().any(|i| i.symbol == "HeapFree"));
    }
}
