//! Expression emission.
//!
//! Integer, boolean and pointer results land in RAX; float results in
//! XMM0. Intermediate values spill to frame slots (never pushed), so RSP
//! stays 16-byte aligned at every call site.

use super::abi::{self, SHADOW_SPACE};
use super::buffer::RelocKind;
use super::x64::{Cond, Reg, Xmm};
use super::{type_size, CodeGen, CodegenError};
use crate::parser::ast::*;
use crate::parser::token::Span;

/// What category of value an expression left behind.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum ValueKind {
    Int,
    Float,
    Bool,
    Str,
    List,
    FixedArray(String),
    Record(String),
    SmartPtr(SmartPtrKind, String),
    FnPtr,
    Nil,
}

impl ValueKind {
    pub(crate) fn is_float(&self) -> bool {
        matches!(self, ValueKind::Float)
    }
}

impl CodeGen {
    /// Structural float detection: literals, known-float identifiers,
    /// float-returning calls, generic calls with float arguments.
    pub(crate) fn is_float_expr(&self, expr: &Expression) -> bool {
        match expr {
            Expression::FloatLiteral(_) => true,
            Expression::Identifier(id) => {
                self.float_vars.contains(&id.name) || self.const_float_vars.contains_key(&id.name)
            }
            Expression::Binary(b) => self.is_float_expr(&b.left) || self.is_float_expr(&b.right),
            Expression::Unary(u) => self.is_float_expr(&u.operand),
            Expression::Cast(c) => matches!(c.target_type.as_str(), "float" | "f32" | "f64"),
            Expression::Call(call) => {
                if let Some(name) = call.callee.as_identifier() {
                    if let Some(decl) = self.function_decls.get(name) {
                        if matches!(decl.return_type.as_str(), "float" | "f32" | "f64") {
                            return true;
                        }
                    }
                    if self.generic_functions.contains_key(name) {
                        return call.args.iter().any(|arg| self.is_float_expr(arg));
                    }
                }
                false
            }
            Expression::Ternary(t) => {
                self.is_float_expr(&t.then_expr) || self.is_float_expr(&t.else_expr)
            }
            _ => false,
        }
    }

    pub(crate) fn emit_expr(&mut self, expr: &Expression) -> Result<ValueKind, CodegenError> {
        match expr {
            Expression::IntLiteral(lit) => {
                if lit.value as i32 as i64 == lit.value {
                    self.buf.mov_reg_imm32(Reg::Rax, lit.value as i32);
                } else {
                    self.buf.mov_reg_imm64(Reg::Rax, lit.value);
                }
                self.emit_asm(&format!("  mov rax, {}", lit.value));
                Ok(ValueKind::Int)
            }
            Expression::CharLiteral(lit) => {
                self.buf.mov_reg_imm32(Reg::Rax, lit.value as i32);
                Ok(ValueKind::Int)
            }
            Expression::BoolLiteral(lit) => {
                self.buf.mov_reg_imm32(Reg::Rax, lit.value as i32);
                Ok(ValueKind::Bool)
            }
            Expression::NilLiteral(_) => {
                self.buf.mov_reg_imm32(Reg::Rax, 0);
                Ok(ValueKind::Nil)
            }
            Expression::FloatLiteral(lit) => {
                let label = self.add_float_constant(lit.value);
                self.buf.movsd_xmm_data(Xmm::Xmm0, label);
                self.emit_asm(&format!("  movsd xmm0, [{}]", lit.value));
                Ok(ValueKind::Float)
            }
            Expression::StringLiteral(lit) => {
                let label = self.add_string_constant(&lit.value);
                self.buf.lea_reg_data(Reg::Rax, label);
                Ok(ValueKind::Str)
            }
            Expression::ByteStringLiteral(lit) => {
                let bytes: Vec<u8> = lit.value.chars().map(|c| c as u8).collect();
                let label = self.add_bytes_constant(&bytes);
                self.buf.lea_reg_data(Reg::Rax, label);
                Ok(ValueKind::Str)
            }
            Expression::Identifier(id) => self.emit_identifier(&id.name, id.span),
            Expression::Binary(binary) => self.emit_binary(binary),
            Expression::Unary(unary) => self.emit_unary(unary),
            Expression::Ternary(ternary) => self.emit_ternary(ternary),
            Expression::Assign(assign) => self.emit_assign(assign),
            Expression::Call(call) => self.emit_call(call),
            Expression::Member(member) => self.emit_member(member),
            Expression::Index(index) => self.emit_index(index),
            Expression::List(list) => self.emit_list_literal(list),
            Expression::RecordInit(init) => self.emit_record_init(init),
            Expression::Cast(cast) => self.emit_cast(cast),
            Expression::AddressOf(addr) => self.emit_address_of(&addr.operand, addr.span),
            Expression::Borrow(borrow) => self.emit_address_of(&borrow.operand, borrow.span),
            Expression::Deref(deref) => {
                let kind = self.emit_expr(&deref.operand)?;
                self.buf.mov_reg_mem(Reg::Rax, Reg::Rax, 0);
                match kind {
                    ValueKind::SmartPtr(SmartPtrKind::Box, elem)
                    | ValueKind::SmartPtr(SmartPtrKind::Cell, elem) => {
                        Ok(kind_for_type(&elem))
                    }
                    _ => Ok(ValueKind::Int),
                }
            }
            Expression::Propagate(prop) => {
                let kind = self.emit_expr(&prop.operand)?;
                let cont = self.fresh_label("prop");
                self.buf.test_reg_reg(Reg::Rax, Reg::Rax);
                self.buf.jcc_label(Cond::Ne, cont.clone());
                // Nil propagates out of the function
                self.emit_cleanups_for_exit();
                self.buf.mov_reg_imm32(Reg::Rax, 0);
                self.buf.jmp_label(self.epilogue_label());
                self.buf.bind_label(cont)?;
                Ok(kind)
            }
            Expression::TypeCheck(check) => {
                // Static answer from the declared type registry
                let matches = check
                    .expr
                    .as_identifier()
                    .and_then(|name| self.var_types.get(name))
                    .map(|ty| ty == &check.ty)
                    .unwrap_or(false);
                self.buf.mov_reg_imm32(Reg::Rax, matches as i32);
                Ok(ValueKind::Bool)
            }
            Expression::MakeSmartPtr(make) => self.emit_make_smart_ptr(make),
            Expression::MakeAtomic(make) => {
                // The value itself; the declaration stores it inline
                self.emit_expr(&make.initial)?;
                Ok(ValueKind::Int)
            }
            Expression::MakeChannel(make) => {
                let elem_size = type_size(&make.elem_type) as i32;
                match &make.capacity {
                    Some(capacity) => {
                        self.emit_expr(capacity)?;
                        self.buf.mov_reg_reg(Reg::Rdx, Reg::Rax);
                    }
                    None => self.buf.mov_reg_imm32(Reg::Rdx, 0),
                }
                self.buf.mov_reg_imm32(Reg::Rcx, elem_size);
                self.emit_runtime_call("tyl_chan_new");
                Ok(ValueKind::Int)
            }
            Expression::MakeSync(make) => self.emit_make_sync(make),
            Expression::ChanSend(send) => {
                let value_slot = self.push_spill(send.span)?;
                self.emit_expr(&send.value)?;
                self.buf.mov_local_reg(value_slot, Reg::Rax);
                self.emit_expr(&send.channel)?;
                self.buf.mov_reg_reg(Reg::Rcx, Reg::Rax);
                self.buf.mov_reg_local(Reg::Rdx, value_slot);
                self.pop_spill();
                self.emit_runtime_call("tyl_chan_send");
                Ok(ValueKind::Nil)
            }
            Expression::ChanRecv(recv) => {
                self.emit_expr(&recv.channel)?;
                self.buf.mov_reg_reg(Reg::Rcx, Reg::Rax);
                self.emit_runtime_call("tyl_chan_recv");
                Ok(ValueKind::Int)
            }
            Expression::Await(await_expr) => self.emit_await(await_expr),
            Expression::Spawn(spawn) => self.emit_spawn(spawn),
            Expression::Interpolated(interp) => Err(CodegenError::Unsupported {
                what: "runtime string interpolation".into(),
                span: interp.span,
            }),
            other => Err(CodegenError::Unsupported {
                what: format!("expression {:?}", discriminant_name(other)),
                span: other.span(),
            }),
        }
    }

    pub(crate) fn epilogue_label(&self) -> String {
        format!(".L{}_epilogue", self.current_function)
    }

    fn emit_identifier(&mut self, name: &str, span: Span) -> Result<ValueKind, CodegenError> {
        // Compile-time constants are inlined at read sites
        if let Some(&value) = self.const_vars.get(name) {
            if value as i32 as i64 == value {
                self.buf.mov_reg_imm32(Reg::Rax, value as i32);
            } else {
                self.buf.mov_reg_imm64(Reg::Rax, value);
            }
            return Ok(ValueKind::Int);
        }
        if let Some(&value) = self.const_float_vars.get(name) {
            let label = self.add_float_constant(value);
            self.buf.movsd_xmm_data(Xmm::Xmm0, label);
            return Ok(ValueKind::Float);
        }
        if let Some(value) = self.const_str_vars.get(name).cloned() {
            let label = self.add_string_constant(&value);
            self.buf.lea_reg_data(Reg::Rax, label);
            return Ok(ValueKind::Str);
        }

        if let Some(&reg) = self.var_registers.get(name) {
            self.buf.mov_reg_reg(Reg::Rax, reg);
            return Ok(ValueKind::Int);
        }
        if let Some(&reg) = self.global_var_registers.get(name) {
            self.buf.mov_reg_reg(Reg::Rax, reg);
            return Ok(ValueKind::Int);
        }

        if self.float_vars.contains(name) {
            let offset = self
                .local_offset(name)
                .ok_or_else(|| CodegenError::UndefinedVariable {
                    name: name.to_string(),
                    span,
                })?;
            self.buf.movsd_xmm_local(Xmm::Xmm0, offset);
            return Ok(ValueKind::Float);
        }

        if let Some(offset) = self.local_offset(name) {
            self.buf.mov_reg_local(Reg::Rax, offset);
            let kind = if let Some(binding) = self.var_smart_ptr_types.get(name) {
                ValueKind::SmartPtr(binding.kind, binding.elem_type.clone())
            } else if let Some(elem) = self.var_fixed_array_types.get(name) {
                ValueKind::FixedArray(elem.clone())
            } else if self.list_vars.contains(name) {
                ValueKind::List
            } else if let Some(record) = self.var_record_types.get(name) {
                ValueKind::Record(record.clone())
            } else if self.fn_ptr_vars.contains(name) {
                ValueKind::FnPtr
            } else if self.bool_vars.contains(name) {
                ValueKind::Bool
            } else if self.var_types.get(name).map(|t| t == "str").unwrap_or(false) {
                ValueKind::Str
            } else {
                ValueKind::Int
            };
            return Ok(kind);
        }

        // A bare function name is a function pointer
        if self.function_decls.contains_key(name) || self.buf.has_label(name) {
            self.buf.lea_reg_label(Reg::Rax, name);
            return Ok(ValueKind::FnPtr);
        }

        Err(CodegenError::UndefinedVariable {
            name: name.to_string(),
            span,
        })
    }

    fn emit_binary(&mut self, binary: &BinaryExpr) -> Result<ValueKind, CodegenError> {
        // Short-circuit logical operators
        if matches!(binary.op, BinOp::And | BinOp::Or) {
            return self.emit_logical(binary);
        }

        if self.is_float_expr(&binary.left) || self.is_float_expr(&binary.right) {
            return self.emit_float_binary(binary);
        }

        let slot = self.push_spill(binary.span)?;
        self.emit_expr(&binary.left)?;
        self.buf.mov_local_reg(slot, Reg::Rax);
        self.emit_expr(&binary.right)?;
        self.buf.mov_reg_reg(Reg::Rcx, Reg::Rax);
        self.buf.mov_reg_local(Reg::Rax, slot);
        self.pop_spill();

        match &binary.op {
            BinOp::Add => {
                self.buf.add_reg_reg(Reg::Rax, Reg::Rcx);
                self.emit_asm("  add rax, rcx");
                Ok(ValueKind::Int)
            }
            BinOp::Sub => {
                self.buf.sub_reg_reg(Reg::Rax, Reg::Rcx);
                Ok(ValueKind::Int)
            }
            BinOp::Mul => {
                self.buf.imul_reg_reg(Reg::Rax, Reg::Rcx);
                self.emit_asm("  imul rax, rcx");
                Ok(ValueKind::Int)
            }
            BinOp::Div | BinOp::Mod => {
                self.emit_division_guard(binary.span)?;
                self.buf.cqo();
                self.buf.idiv_reg(Reg::Rcx);
                if binary.op == BinOp::Mod {
                    self.buf.mov_reg_reg(Reg::Rax, Reg::Rdx);
                }
                Ok(ValueKind::Int)
            }
            BinOp::BitAnd => {
                self.buf.and_reg_reg(Reg::Rax, Reg::Rcx);
                Ok(ValueKind::Int)
            }
            BinOp::BitOr => {
                self.buf.or_reg_reg(Reg::Rax, Reg::Rcx);
                Ok(ValueKind::Int)
            }
            BinOp::BitXor => {
                self.buf.xor_reg_reg(Reg::Rax, Reg::Rcx);
                Ok(ValueKind::Int)
            }
            BinOp::Shl => {
                self.buf.shl_reg_cl(Reg::Rax);
                Ok(ValueKind::Int)
            }
            BinOp::Shr => {
                self.buf.sar_reg_cl(Reg::Rax);
                Ok(ValueKind::Int)
            }
            BinOp::Eq | BinOp::Ne | BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge => {
                self.buf.cmp_reg_reg(Reg::Rax, Reg::Rcx);
                self.buf.set_cond_rax(cond_for(&binary.op));
                Ok(ValueKind::Bool)
            }
            BinOp::Spaceship => {
                // (a > b) - (a < b)
                let slot = self.push_spill(binary.span)?;
                self.buf.cmp_reg_reg(Reg::Rax, Reg::Rcx);
                self.buf.set_cond_rax(Cond::Gt);
                self.buf.mov_local_reg(slot, Reg::Rax);
                self.buf.set_cond_rax(Cond::Lt);
                self.buf.mov_reg_reg(Reg::Rcx, Reg::Rax);
                self.buf.mov_reg_local(Reg::Rax, slot);
                self.buf.sub_reg_reg(Reg::Rax, Reg::Rcx);
                self.pop_spill();
                Ok(ValueKind::Int)
            }
            BinOp::NullCoalesce => Err(CodegenError::Unsupported {
                what: "?? on non-literal operands".into(),
                span: binary.span,
            }),
            BinOp::Pipe | BinOp::Custom(_) | BinOp::And | BinOp::Or => {
                Err(CodegenError::Unsupported {
                    what: "operator should have been rewritten by the expander".into(),
                    span: binary.span,
                })
            }
        }
    }

    /// The comparison would read flags set by `cmp rax, rcx`; division by
    /// zero traps through the shared error stub first.
    fn emit_division_guard(&mut self, span: Span) -> Result<(), CodegenError> {
        let _ = span;
        if self.unsafe_math() {
            return Ok(());
        }
        let stub = self.error_stub("Division by zero");
        self.buf.test_reg_reg(Reg::Rcx, Reg::Rcx);
        self.buf.jcc_label(Cond::Eq, stub);
        Ok(())
    }

    fn unsafe_math(&self) -> bool {
        matches!(self.opt_level(), crate::optimize::OptLevel::Ofast)
    }

    fn emit_logical(&mut self, binary: &BinaryExpr) -> Result<ValueKind, CodegenError> {
        let end = self.fresh_label("logic_end");
        self.emit_expr(&binary.left)?;
        self.buf.test_reg_reg(Reg::Rax, Reg::Rax);
        match binary.op {
            BinOp::And => self.buf.jcc_label(Cond::Eq, end.clone()),
            BinOp::Or => self.buf.jcc_label(Cond::Ne, end.clone()),
            _ => unreachable!(),
        }
        self.emit_expr(&binary.right)?;
        self.buf.bind_label(end)?;
        // Normalise to 0/1
        self.buf.test_reg_reg(Reg::Rax, Reg::Rax);
        self.buf.set_cond_rax(Cond::Ne);
        Ok(ValueKind::Bool)
    }

    fn emit_float_binary(&mut self, binary: &BinaryExpr) -> Result<ValueKind, CodegenError> {
        let slot = self.push_spill(binary.span)?;
        self.emit_float_operand(&binary.left)?;
        self.buf.movsd_local_xmm(slot, Xmm::Xmm0);
        self.emit_float_operand(&binary.right)?;
        self.buf.movsd_xmm_xmm(Xmm::Xmm1, Xmm::Xmm0);
        self.buf.movsd_xmm_local(Xmm::Xmm0, slot);
        self.pop_spill();

        match binary.op {
            BinOp::Add => {
                self.buf.addsd(Xmm::Xmm0, Xmm::Xmm1);
                Ok(ValueKind::Float)
            }
            BinOp::Sub => {
                self.buf.subsd(Xmm::Xmm0, Xmm::Xmm1);
                Ok(ValueKind::Float)
            }
            BinOp::Mul => {
                self.buf.mulsd(Xmm::Xmm0, Xmm::Xmm1);
                Ok(ValueKind::Float)
            }
            BinOp::Div => {
                self.buf.divsd(Xmm::Xmm0, Xmm::Xmm1);
                Ok(ValueKind::Float)
            }
            BinOp::Eq | BinOp::Ne | BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge => {
                self.buf.ucomisd(Xmm::Xmm0, Xmm::Xmm1);
                // ucomisd sets unsigned-style flags
                let cond = match binary.op {
                    BinOp::Eq => Cond::Eq,
                    BinOp::Ne => Cond::Ne,
                    BinOp::Lt => Cond::Below,
                    _ => cond_for(&binary.op),
                };
                self.buf.set_cond_rax(cond);
                Ok(ValueKind::Bool)
            }
            _ => Err(CodegenError::Unsupported {
                what: "float operator".into(),
                span: binary.span,
            }),
        }
    }

    /// Evaluate an operand into XMM0, converting integers with
    /// `cvtsi2sd`.
    fn emit_float_operand(&mut self, expr: &Expression) -> Result<(), CodegenError> {
        let kind = self.emit_expr(expr)?;
        if !kind.is_float() {
            self.buf.cvtsi2sd(Xmm::Xmm0, Reg::Rax);
        }
        Ok(())
    }

    fn emit_unary(&mut self, unary: &UnaryExpr) -> Result<ValueKind, CodegenError> {
        let kind = self.emit_expr(&unary.operand)?;
        match unary.op {
            UnOp::Neg => {
                if kind.is_float() {
                    // 0.0 - x
                    let zero = self.add_float_constant(0.0);
                    self.buf.movsd_xmm_xmm(Xmm::Xmm1, Xmm::Xmm0);
                    self.buf.movsd_xmm_data(Xmm::Xmm0, zero);
                    self.buf.subsd(Xmm::Xmm0, Xmm::Xmm1);
                    Ok(ValueKind::Float)
                } else {
                    self.buf.neg_reg(Reg::Rax);
                    Ok(ValueKind::Int)
                }
            }
            UnOp::Not => {
                self.buf.test_reg_reg(Reg::Rax, Reg::Rax);
                self.buf.set_cond_rax(Cond::Eq);
                Ok(ValueKind::Bool)
            }
            UnOp::BitNot => {
                self.buf.not_reg(Reg::Rax);
                Ok(ValueKind::Int)
            }
        }
    }

    fn emit_ternary(&mut self, ternary: &TernaryExpr) -> Result<ValueKind, CodegenError> {
        let else_label = self.fresh_label("tern_else");
        let end_label = self.fresh_label("tern_end");
        self.emit_expr(&ternary.condition)?;
        self.buf.test_reg_reg(Reg::Rax, Reg::Rax);
        self.buf.jcc_label(Cond::Eq, else_label.clone());
        let kind = self.emit_expr(&ternary.then_expr)?;
        self.buf.jmp_label(end_label.clone());
        self.buf.bind_label(else_label)?;
        self.emit_expr(&ternary.else_expr)?;
        self.buf.bind_label(end_label)?;
        Ok(kind)
    }

    fn emit_assign(&mut self, assign: &AssignExpr) -> Result<ValueKind, CodegenError> {
        match assign.target.as_ref() {
            Expression::Identifier(id) => self.emit_var_assign(id, assign),
            Expression::Index(index) => self.emit_index_store(index, assign),
            Expression::Member(member) => self.emit_member_store(member, assign),
            other => Err(CodegenError::Unsupported {
                what: "assignment target".into(),
                span: other.span(),
            }),
        }
    }

    fn emit_var_assign(
        &mut self,
        id: &Identifier,
        assign: &AssignExpr,
    ) -> Result<ValueKind, CodegenError> {
        let name = &id.name;

        if self.float_vars.contains(name) {
            let offset =
                self.local_offset(name)
                    .ok_or_else(|| CodegenError::UndefinedVariable {
                        name: name.clone(),
                        span: id.span,
                    })?;
            self.emit_float_operand(&assign.value)?;
            if assign.op != AssignOp::Assign {
                self.buf.movsd_xmm_xmm(Xmm::Xmm1, Xmm::Xmm0);
                self.buf.movsd_xmm_local(Xmm::Xmm0, offset);
                match assign.op {
                    AssignOp::Add => self.buf.addsd(Xmm::Xmm0, Xmm::Xmm1),
                    AssignOp::Sub => self.buf.subsd(Xmm::Xmm0, Xmm::Xmm1),
                    AssignOp::Mul => self.buf.mulsd(Xmm::Xmm0, Xmm::Xmm1),
                    AssignOp::Div => self.buf.divsd(Xmm::Xmm0, Xmm::Xmm1),
                    _ => {
                        return Err(CodegenError::Unsupported {
                            what: "float compound assignment".into(),
                            span: assign.span,
                        })
                    }
                }
            }
            self.buf.movsd_local_xmm(offset, Xmm::Xmm0);
            return Ok(ValueKind::Float);
        }

        self.emit_expr(&assign.value)?;

        if assign.op != AssignOp::Assign {
            self.buf.mov_reg_reg(Reg::Rcx, Reg::Rax);
            if let Some(&reg) = self
                .var_registers
                .get(name)
                .or_else(|| self.global_var_registers.get(name))
            {
                self.buf.mov_reg_reg(Reg::Rax, reg);
            } else {
                let offset =
                    self.local_offset(name)
                        .ok_or_else(|| CodegenError::UndefinedVariable {
                            name: name.clone(),
                            span: id.span,
                        })?;
                self.buf.mov_reg_local(Reg::Rax, offset);
            }
            match assign.op {
                AssignOp::Add => self.buf.add_reg_reg(Reg::Rax, Reg::Rcx),
                AssignOp::Sub => self.buf.sub_reg_reg(Reg::Rax, Reg::Rcx),
                AssignOp::Mul => self.buf.imul_reg_reg(Reg::Rax, Reg::Rcx),
                AssignOp::Div | AssignOp::Mod => {
                    self.emit_division_guard(assign.span)?;
                    self.buf.cqo();
                    self.buf.idiv_reg(Reg::Rcx);
                    if assign.op == AssignOp::Mod {
                        self.buf.mov_reg_reg(Reg::Rax, Reg::Rdx);
                    }
                }
                AssignOp::Assign => unreachable!(),
            }
        }

        if let Some(&reg) = self
            .var_registers
            .get(name)
            .or_else(|| self.global_var_registers.get(name))
        {
            self.buf.mov_reg_reg(reg, Reg::Rax);
        } else if let Some(offset) = self.local_offset(name) {
            self.buf.mov_local_reg(offset, Reg::Rax);
        } else {
            return Err(CodegenError::UndefinedVariable {
                name: name.clone(),
                span: id.span,
            });
        }
        Ok(ValueKind::Int)
    }

    fn emit_index_store(
        &mut self,
        index: &IndexExpr,
        assign: &AssignExpr,
    ) -> Result<ValueKind, CodegenError> {
        if assign.op != AssignOp::Assign {
            return Err(CodegenError::Unsupported {
                what: "compound assignment to an element".into(),
                span: assign.span,
            });
        }
        let value_slot = self.push_spill(assign.span)?;
        self.emit_expr(&assign.value)?;
        self.buf.mov_local_reg(value_slot, Reg::Rax);
        self.emit_element_address(index)?;
        self.buf.mov_reg_local(Reg::Rcx, value_slot);
        self.pop_spill();
        self.buf.mov_mem_reg(Reg::Rax, 0, Reg::Rcx);
        Ok(ValueKind::Int)
    }

    fn emit_member_store(
        &mut self,
        member: &MemberExpr,
        assign: &AssignExpr,
    ) -> Result<ValueKind, CodegenError> {
        if assign.op != AssignOp::Assign {
            return Err(CodegenError::Unsupported {
                what: "compound assignment to a field".into(),
                span: assign.span,
            });
        }
        let value_slot = self.push_spill(assign.span)?;
        self.emit_expr(&assign.value)?;
        self.buf.mov_local_reg(value_slot, Reg::Rax);
        let kind = self.emit_expr(&member.object)?;
        let offset = self.record_field_offset(&kind, &member.field, member.span)?;
        self.buf.mov_reg_local(Reg::Rcx, value_slot);
        self.pop_spill();
        self.buf.mov_mem_reg(Reg::Rax, offset, Reg::Rcx);
        Ok(ValueKind::Int)
    }

    fn record_field_offset(
        &self,
        kind: &ValueKind,
        field: &str,
        span: Span,
    ) -> Result<i32, CodegenError> {
        let ValueKind::Record(type_name) = kind else {
            return Err(CodegenError::Unsupported {
                what: format!("field access on non-record value '{}'", field),
                span,
            });
        };
        self.record_layouts
            .get(type_name)
            .and_then(|layout| layout.field_offset(field))
            .ok_or_else(|| CodegenError::Unsupported {
                what: format!("unknown field '{}' on '{}'", field, type_name),
                span,
            })
    }

    /// Leave the address of `object[index]` in RAX. Bounds checks route
    /// through the shared error stubs (skipped under -Ofast).
    fn emit_element_address(&mut self, index: &IndexExpr) -> Result<(), CodegenError> {
        let object_slot = self.push_spill(index.span)?;
        let kind = self.emit_expr(&index.object)?;
        self.buf.mov_local_reg(object_slot, Reg::Rax);
        self.emit_expr(&index.index)?;
        self.buf.mov_reg_reg(Reg::Rcx, Reg::Rax);
        self.buf.mov_reg_local(Reg::Rax, object_slot);
        self.pop_spill();

        match kind {
            ValueKind::List => {
                if !self.unsafe_math() {
                    let stub = self.error_stub("Index out of bounds");
                    self.buf.cmp_reg_imm32(Reg::Rcx, 1);
                    self.buf.jcc_label(Cond::Lt, stub.clone());
                    self.buf.cmp_reg_mem(Reg::Rcx, Reg::Rax, 0);
                    self.buf.jcc_label(Cond::Gt, stub);
                }
                // 1-based: element i sits at base + 8*i
                self.buf.shl_reg_imm8(Reg::Rcx, 3);
                self.buf.add_reg_reg(Reg::Rax, Reg::Rcx);
                Ok(())
            }
            ValueKind::FixedArray(elem) => {
                let elem_size = type_size(&elem);
                // 0-based and contiguous
                if elem_size.is_power_of_two() {
                    self.buf
                        .shl_reg_imm8(Reg::Rcx, elem_size.trailing_zeros() as u8);
                } else {
                    self.buf.mov_reg_imm32(Reg::R10, elem_size as i32);
                    self.buf.imul_reg_reg(Reg::Rcx, Reg::R10);
                }
                self.buf.add_reg_reg(Reg::Rax, Reg::Rcx);
                Ok(())
            }
            _ => Err(CodegenError::Unsupported {
                what: "indexing a non-list value".into(),
                span: index.span,
            }),
        }
    }

    fn emit_index(&mut self, index: &IndexExpr) -> Result<ValueKind, CodegenError> {
        self.emit_element_address(index)?;
        self.buf.mov_reg_mem(Reg::Rax, Reg::Rax, 0);
        Ok(ValueKind::Int)
    }

    fn emit_member(&mut self, member: &MemberExpr) -> Result<ValueKind, CodegenError> {
        let kind = self.emit_expr(&member.object)?;
        if member.safe {
            let end = self.fresh_label("safenav");
            self.buf.test_reg_reg(Reg::Rax, Reg::Rax);
            self.buf.jcc_label(Cond::Eq, end.clone());
            let offset = self.record_field_offset(&kind, &member.field, member.span)?;
            self.buf.mov_reg_mem(Reg::Rax, Reg::Rax, offset);
            self.buf.bind_label(end)?;
            return Ok(ValueKind::Int);
        }
        let offset = self.record_field_offset(&kind, &member.field, member.span)?;
        self.buf.mov_reg_mem(Reg::Rax, Reg::Rax, offset);
        Ok(ValueKind::Int)
    }

    fn emit_list_literal(&mut self, list: &ListExpr) -> Result<ValueKind, CodegenError> {
        let count = list.elements.len();
        // Header { length } + elements
        self.buf.mov_reg_imm32(Reg::Rax, (8 + 8 * count) as i32);
        self.emit_heap_alloc_rax_size();

        let ptr_slot = self.push_spill(list.span)?;
        self.buf.mov_local_reg(ptr_slot, Reg::Rax);
        self.buf.mov_reg_imm32(Reg::Rcx, count as i32);
        self.buf.mov_mem_reg(Reg::Rax, 0, Reg::Rcx);

        for (position, element) in list.elements.iter().enumerate() {
            self.emit_expr(element)?;
            self.buf.mov_reg_reg(Reg::Rcx, Reg::Rax);
            self.buf.mov_reg_local(Reg::Rax, ptr_slot);
            self.buf
                .mov_mem_reg(Reg::Rax, (8 + 8 * position) as i32, Reg::Rcx);
        }
        self.buf.mov_reg_local(Reg::Rax, ptr_slot);
        self.pop_spill();
        Ok(ValueKind::List)
    }

    fn emit_record_init(&mut self, init: &RecordInitExpr) -> Result<ValueKind, CodegenError> {
        let layout = self
            .record_layouts
            .get(&init.name)
            .cloned()
            .ok_or_else(|| CodegenError::Unsupported {
                what: format!("unknown record type '{}'", init.name),
                span: init.span,
            })?;

        self.buf.mov_reg_imm32(Reg::Rax, layout.size as i32);
        self.emit_heap_alloc_rax_size();
        let ptr_slot = self.push_spill(init.span)?;
        self.buf.mov_local_reg(ptr_slot, Reg::Rax);

        for (field, value) in &init.fields {
            let offset = layout.field_offset(field).ok_or_else(|| {
                CodegenError::Unsupported {
                    what: format!("unknown field '{}' on '{}'", field, init.name),
                    span: init.span,
                }
            })?;
            self.emit_expr(value)?;
            self.buf.mov_reg_reg(Reg::Rcx, Reg::Rax);
            self.buf.mov_reg_local(Reg::Rax, ptr_slot);
            self.buf.mov_mem_reg(Reg::Rax, offset, Reg::Rcx);
        }
        self.buf.mov_reg_local(Reg::Rax, ptr_slot);
        self.pop_spill();
        Ok(ValueKind::Record(init.name.clone()))
    }

    fn emit_cast(&mut self, cast: &CastExpr) -> Result<ValueKind, CodegenError> {
        let kind = self.emit_expr(&cast.expr)?;
        match (kind.is_float(), cast.target_type.as_str()) {
            (false, "float" | "f32" | "f64") => {
                self.buf.cvtsi2sd(Xmm::Xmm0, Reg::Rax);
                Ok(ValueKind::Float)
            }
            (true, "int" | "i64" | "i32") => {
                self.buf.cvttsd2si(Reg::Rax, Xmm::Xmm0);
                Ok(ValueKind::Int)
            }
            _ => Ok(kind_for_type(&cast.target_type)),
        }
    }

    fn emit_address_of(
        &mut self,
        operand: &Expression,
        span: Span,
    ) -> Result<ValueKind, CodegenError> {
        match operand {
            Expression::Identifier(id) => {
                if self.function_decls.contains_key(&id.name) {
                    self.buf.lea_reg_label(Reg::Rax, &id.name);
                    return Ok(ValueKind::FnPtr);
                }
                let offset = self.local_offset(&id.name).ok_or_else(|| {
                    CodegenError::UndefinedVariable {
                        name: id.name.clone(),
                        span: id.span,
                    }
                })?;
                self.buf.lea_reg_local(Reg::Rax, offset);
                Ok(ValueKind::Int)
            }
            _ => Err(CodegenError::Unsupported {
                what: "address of a temporary".into(),
                span,
            }),
        }
    }

    // ------------------------------------------------------------------
    // Calls
    // ------------------------------------------------------------------

    fn emit_call(&mut self, call: &CallExpr) -> Result<ValueKind, CodegenError> {
        // Method calls dispatch on the receiver's classification
        if let Expression::Member(member) = call.callee.as_ref() {
            return self.emit_method_call(member, call);
        }

        let Some(name) = call.callee.as_identifier().map(|s| s.to_string()) else {
            return self.emit_fn_ptr_call(call);
        };

        // Builtins with dedicated lowering
        match name.as_str() {
            "len" if call.args.len() == 1 => {
                let kind = self.emit_expr(&call.args[0])?;
                return match kind {
                    ValueKind::List => {
                        self.buf.mov_reg_mem(Reg::Rax, Reg::Rax, 0);
                        Ok(ValueKind::Int)
                    }
                    ValueKind::Str => {
                        self.buf.mov_reg_reg(Reg::Rcx, Reg::Rax);
                        let strlen = self.imports.msvcrt("strlen");
                        self.buf.sub_reg_imm32(Reg::Rsp, SHADOW_SPACE);
                        self.buf.call_import(&strlen);
                        self.buf.add_reg_imm32(Reg::Rsp, SHADOW_SPACE);
                        Ok(ValueKind::Int)
                    }
                    _ => Err(CodegenError::Unsupported {
                        what: "len() of this value".into(),
                        span: call.span,
                    }),
                };
            }
            "print" | "println" if call.args.len() == 1 => {
                return self.emit_print(&call.args[0], name == "println", call.span);
            }
            _ => {}
        }

        let arg_kinds = self.emit_call_arguments(call)?;

        if let Some(library) = self.extern_functions.get(&name).cloned() {
            match library {
                Some(dll) => {
                    let dll = dll.trim_end_matches(".dll").to_string();
                    self.imports.add(&dll, &name);
                    let symbol = format!("{}!{}", dll, name);
                    self.buf.sub_reg_imm32(Reg::Rsp, SHADOW_SPACE);
                    self.buf.call_import(&symbol);
                    self.buf.add_reg_imm32(Reg::Rsp, SHADOW_SPACE);
                }
                None => {
                    self.buf.sub_reg_imm32(Reg::Rsp, SHADOW_SPACE);
                    self.buf.emit_u8(0xE8);
                    self.buf.emit_reloc_rel32(RelocKind::Rel32, name.clone(), 0);
                    self.buf.add_reg_imm32(Reg::Rsp, SHADOW_SPACE);
                }
            }
        } else if self.function_decls.contains_key(&name) {
            self.buf.sub_reg_imm32(Reg::Rsp, SHADOW_SPACE);
            self.buf.call_label(&name);
            self.buf.add_reg_imm32(Reg::Rsp, SHADOW_SPACE);
            self.emit_asm(&format!("  call {}", name));
        } else {
            // Unknown callee: leave an external relocation for the
            // linker, which reports E5xxx if it stays unresolved
            self.buf.sub_reg_imm32(Reg::Rsp, SHADOW_SPACE);
            self.buf.emit_u8(0xE8);
            self.buf.emit_reloc_rel32(RelocKind::Rel32, name.clone(), 0);
            self.buf.add_reg_imm32(Reg::Rsp, SHADOW_SPACE);
        }

        // Result kind from the declared return type, or float inference
        // for generic calls
        if let Some(decl) = self.function_decls.get(&name) {
            if !decl.generics.is_empty() && arg_kinds.iter().any(|k| k.is_float()) {
                return Ok(ValueKind::Float);
            }
            return Ok(kind_for_type(&decl.return_type));
        }
        Ok(ValueKind::Int)
    }

    fn emit_fn_ptr_call(&mut self, call: &CallExpr) -> Result<ValueKind, CodegenError> {
        // Evaluate the callee into a spill slot, then arguments, then
        // `call rax`
        let callee_slot = self.push_spill(call.span)?;
        self.emit_expr(&call.callee)?;
        self.buf.mov_local_reg(callee_slot, Reg::Rax);
        self.emit_call_arguments(call)?;
        self.buf.mov_reg_local(Reg::Rax, callee_slot);
        self.pop_spill();
        self.buf.sub_reg_imm32(Reg::Rsp, SHADOW_SPACE);
        // call rax
        self.buf.emit(&[0xFF, 0xD0]);
        self.buf.add_reg_imm32(Reg::Rsp, SHADOW_SPACE);
        Ok(ValueKind::Int)
    }

    /// Evaluate arguments into spill slots, then load the first four into
    /// RCX/RDX/R8/R9 (or XMM0..XMM3) and any extras onto the stack.
    fn emit_call_arguments(&mut self, call: &CallExpr) -> Result<Vec<ValueKind>, CodegenError> {
        let mut kinds = Vec::with_capacity(call.args.len());
        let mut slots = Vec::with_capacity(call.args.len());
        for arg in &call.args {
            let slot = self.push_spill(call.span)?;
            let kind = self.emit_expr(arg)?;
            if kind.is_float() {
                self.buf.movsd_local_xmm(slot, Xmm::Xmm0);
            } else {
                self.buf.mov_local_reg(slot, Reg::Rax);
            }
            kinds.push(kind);
            slots.push(slot);
        }

        // Stack extras beyond the fourth argument live just above the
        // shadow space the call sequence reserves; keep 16-byte alignment
        let extras = call.args.len().saturating_sub(4);
        if extras > 0 {
            return Err(CodegenError::Unsupported {
                what: "more than four call arguments".into(),
                span: call.span,
            });
        }

        for (index, (slot, kind)) in slots.iter().zip(&kinds).enumerate().rev() {
            if kind.is_float() {
                self.buf.movsd_xmm_local(abi::FLOAT_ARG_REGS[index], *slot);
                // Varargs callees expect float args mirrored in the GP
                // register
                self.buf.mov_reg_local(abi::INT_ARG_REGS[index], *slot);
            } else {
                self.buf.mov_reg_local(abi::INT_ARG_REGS[index], *slot);
            }
        }
        for _ in &slots {
            self.pop_spill();
        }
        Ok(kinds)
    }

    fn emit_print(
        &mut self,
        arg: &Expression,
        newline: bool,
        span: Span,
    ) -> Result<ValueKind, CodegenError> {
        let slot = self.push_spill(span)?;
        let kind = self.emit_expr(arg)?;
        let format = match kind {
            ValueKind::Float => {
                self.buf.movsd_local_xmm(slot, Xmm::Xmm0);
                if newline {
                    "%g\n"
                } else {
                    "%g"
                }
            }
            ValueKind::Str => {
                self.buf.mov_local_reg(slot, Reg::Rax);
                if newline {
                    "%s\n"
                } else {
                    "%s"
                }
            }
            _ => {
                self.buf.mov_local_reg(slot, Reg::Rax);
                if newline {
                    "%lld\n"
                } else {
                    "%lld"
                }
            }
        };
        let fmt_label = self.add_string_constant(format);
        let printf = self.imports.msvcrt("printf");
        self.buf.lea_reg_data(Reg::Rcx, fmt_label);
        if kind == ValueKind::Float {
            self.buf.movsd_xmm_local(Xmm::Xmm1, slot);
            self.buf.mov_reg_local(Reg::Rdx, slot);
        } else {
            self.buf.mov_reg_local(Reg::Rdx, slot);
        }
        self.pop_spill();
        self.buf.sub_reg_imm32(Reg::Rsp, SHADOW_SPACE);
        self.buf.call_import(&printf);
        self.buf.add_reg_imm32(Reg::Rsp, SHADOW_SPACE);
        Ok(ValueKind::Nil)
    }

    /// Calls an external runtime-support symbol with the standard shadow
    /// space; arguments are already in place.
    pub(crate) fn emit_runtime_call(&mut self, symbol: &str) {
        self.buf.sub_reg_imm32(Reg::Rsp, SHADOW_SPACE);
        self.buf.emit_u8(0xE8);
        self.buf
            .emit_reloc_rel32(RelocKind::Rel32, symbol.to_string(), 0);
        self.buf.add_reg_imm32(Reg::Rsp, SHADOW_SPACE);
    }

    // ------------------------------------------------------------------
    // Smart pointers / concurrency
    // ------------------------------------------------------------------

    fn emit_make_smart_ptr(
        &mut self,
        make: &MakeSmartPtrExpr,
    ) -> Result<ValueKind, CodegenError> {
        let elem_type = make.elem_type.clone().unwrap_or_else(|| "int".to_string());
        let elem_size = type_size(&elem_type);

        let value_slot = self.push_spill(make.span)?;
        let is_float_value = self.is_float_expr(&make.value);
        let kind = self.emit_expr(&make.value)?;
        if kind.is_float() || is_float_value {
            self.buf.movsd_local_xmm(value_slot, Xmm::Xmm0);
        } else {
            self.buf.mov_local_reg(value_slot, Reg::Rax);
        }

        let (alloc_size, value_offset) = match make.kind {
            // Single allocation, value inline
            SmartPtrKind::Box => (elem_size.max(8), 0),
            // Header { strong, weak } + value
            SmartPtrKind::Rc | SmartPtrKind::Arc => (16 + elem_size.max(8), 16),
            // Value only
            SmartPtrKind::Cell => (elem_size.max(8), 0),
            // Value + borrow counter
            SmartPtrKind::RefCell => (elem_size.max(8) + 8, 0),
            SmartPtrKind::Weak => {
                return Err(CodegenError::Unsupported {
                    what: "constructing Weak directly (use downgrade)".into(),
                    span: make.span,
                })
            }
        };

        self.buf.mov_reg_imm32(Reg::Rax, alloc_size as i32);
        self.emit_heap_alloc_rax_size();

        if matches!(make.kind, SmartPtrKind::Rc | SmartPtrKind::Arc) {
            // strong = 1; weak stays 0 from the zeroed allocation
            self.buf.mov_reg_imm32(Reg::Rcx, 1);
            self.buf.mov_mem_reg(Reg::Rax, 0, Reg::Rcx);
        }

        self.buf.mov_reg_local(Reg::Rcx, value_slot);
        self.pop_spill();
        self.buf.mov_mem_reg(Reg::Rax, value_offset, Reg::Rcx);
        self.emit_asm(&format!("  ; {}[{}] constructed", make.kind.name(), elem_type));
        Ok(ValueKind::SmartPtr(make.kind, elem_type))
    }

    fn emit_make_sync(&mut self, make: &MakeSyncExpr) -> Result<ValueKind, CodegenError> {
        match make.kind {
            SyncPrimitive::Mutex => {
                // { handle, value }
                self.buf.mov_reg_imm32(Reg::Rax, 16);
                self.emit_heap_alloc_rax_size();
                let slot = self.push_spill(make.span)?;
                self.buf.mov_local_reg(slot, Reg::Rax);

                let create = self.imports.kernel32("CreateMutexA");
                self.buf.mov_reg_imm32(Reg::Rcx, 0);
                self.buf.mov_reg_imm32(Reg::Rdx, 0);
                self.buf.mov_reg_imm32(Reg::R8, 0);
                self.buf.sub_reg_imm32(Reg::Rsp, SHADOW_SPACE);
                self.buf.call_import(&create);
                self.buf.add_reg_imm32(Reg::Rsp, SHADOW_SPACE);

                self.buf.mov_reg_reg(Reg::Rcx, Reg::Rax);
                self.buf.mov_reg_local(Reg::Rax, slot);
                self.buf.mov_mem_reg(Reg::Rax, 0, Reg::Rcx);

                if let Some(initial) = make.args.first() {
                    let initial = initial.clone();
                    self.buf.mov_local_reg(slot, Reg::Rax);
                    self.emit_expr(&initial)?;
                    self.buf.mov_reg_reg(Reg::Rcx, Reg::Rax);
                    self.buf.mov_reg_local(Reg::Rax, slot);
                    self.buf.mov_mem_reg(Reg::Rax, 8, Reg::Rcx);
                }
                self.pop_spill();
                Ok(ValueKind::Int)
            }
            SyncPrimitive::Cond => {
                let create = self.imports.kernel32("CreateEventA");
                self.buf.mov_reg_imm32(Reg::Rcx, 0);
                self.buf.mov_reg_imm32(Reg::Rdx, 1);
                self.buf.mov_reg_imm32(Reg::R8, 0);
                self.buf.mov_reg_imm32(Reg::R9, 0);
                self.buf.sub_reg_imm32(Reg::Rsp, SHADOW_SPACE);
                self.buf.call_import(&create);
                self.buf.add_reg_imm32(Reg::Rsp, SHADOW_SPACE);
                Ok(ValueKind::Int)
            }
            SyncPrimitive::Future => {
                // { ready, value }
                self.buf.mov_reg_imm32(Reg::Rax, 16);
                self.emit_heap_alloc_rax_size();
                Ok(ValueKind::Int)
            }
            SyncPrimitive::CancelToken => {
                // { flag }
                self.buf.mov_reg_imm32(Reg::Rax, 8);
                self.emit_heap_alloc_rax_size();
                Ok(ValueKind::Int)
            }
            SyncPrimitive::ThreadPool | SyncPrimitive::RwLock | SyncPrimitive::Semaphore => {
                for arg in &make.args {
                    self.emit_expr(arg)?;
                }
                self.buf.mov_reg_reg(Reg::Rcx, Reg::Rax);
                let symbol = match make.kind {
                    SyncPrimitive::ThreadPool => "tyl_thread_pool_new",
                    SyncPrimitive::RwLock => "tyl_rwlock_new",
                    _ => "tyl_semaphore_new",
                };
                self.emit_runtime_call(symbol);
                Ok(ValueKind::Int)
            }
        }
    }

    fn emit_await(&mut self, await_expr: &AwaitExpr) -> Result<ValueKind, CodegenError> {
        self.emit_expr(&await_expr.operand)?;
        let poll = self.fresh_label("await_poll");
        let done = self.fresh_label("await_done");
        let slot = self.push_spill(await_expr.span)?;
        self.buf.mov_local_reg(slot, Reg::Rax);

        self.buf.bind_label(poll.clone())?;
        self.buf.mov_reg_local(Reg::Rax, slot);
        self.buf.mov_reg_mem(Reg::Rcx, Reg::Rax, 0);
        self.buf.test_reg_reg(Reg::Rcx, Reg::Rcx);
        self.buf.jcc_label(Cond::Ne, done.clone());
        // Sleep(0): yield the rest of the time slice
        let sleep = self.imports.kernel32("Sleep");
        self.buf.mov_reg_imm32(Reg::Rcx, 0);
        self.buf.sub_reg_imm32(Reg::Rsp, SHADOW_SPACE);
        self.buf.call_import(&sleep);
        self.buf.add_reg_imm32(Reg::Rsp, SHADOW_SPACE);
        self.buf.jmp_label(poll);

        self.buf.bind_label(done)?;
        self.buf.mov_reg_local(Reg::Rax, slot);
        self.pop_spill();
        self.buf.mov_reg_mem(Reg::Rax, Reg::Rax, 8);
        Ok(ValueKind::Int)
    }

    fn emit_spawn(&mut self, spawn: &SpawnExpr) -> Result<ValueKind, CodegenError> {
        let thunk = self.fresh_label("spawn_thunk");
        self.pending_thunk(thunk.clone(), (*spawn.operand).clone());

        // CreateThread(0, 0, thunk, 0, 0, 0)
        let create = self.imports.kernel32("CreateThread");
        self.buf.mov_reg_imm32(Reg::Rcx, 0);
        self.buf.mov_reg_imm32(Reg::Rdx, 0);
        self.buf.lea_reg_label(Reg::R8, thunk);
        self.buf.mov_reg_imm32(Reg::R9, 0);
        self.buf.sub_reg_imm32(Reg::Rsp, SHADOW_SPACE + 16);
        self.buf.mov_rsp_disp_imm32(SHADOW_SPACE, 0);
        self.buf.mov_rsp_disp_imm32(SHADOW_SPACE + 8, 0);
        self.buf.call_import(&create);
        self.buf.add_reg_imm32(Reg::Rsp, SHADOW_SPACE + 16);
        self.emit_asm("  ; spawn -> CreateThread");
        Ok(ValueKind::Int)
    }

    // Smart-pointer and atomic method dispatch.
    fn emit_method_call(
        &mut self,
        member: &MemberExpr,
        call: &CallExpr,
    ) -> Result<ValueKind, CodegenError> {
        // Atomics are classified variables, addressed directly on the
        // stack
        if let Some(name) = member.object.as_identifier() {
            if self.var_atomic_types.contains_key(name) {
                return self.emit_atomic_method(name, &member.field, call);
            }
        }

        let kind = self.emit_expr(&member.object)?;
        if let ValueKind::SmartPtr(ptr_kind, elem) = kind {
            return self.emit_smart_ptr_method(ptr_kind, elem, &member.field, call);
        }

        // Inherent impl method: Type__method(self, args...)
        if let ValueKind::Record(type_name) = &kind {
            let mangled = format!("{}__{}", type_name, member.field);
            let self_slot = self.push_spill(call.span)?;
            self.buf.mov_local_reg(self_slot, Reg::Rax);
            if !call.args.is_empty() {
                return Err(CodegenError::Unsupported {
                    what: "method arguments beyond self".into(),
                    span: call.span,
                });
            }
            self.buf.mov_reg_local(Reg::Rcx, self_slot);
            self.pop_spill();
            self.buf.sub_reg_imm32(Reg::Rsp, SHADOW_SPACE);
            self.buf.call_label(&mangled);
            self.buf.add_reg_imm32(Reg::Rsp, SHADOW_SPACE);
            return Ok(ValueKind::Int);
        }

        Err(CodegenError::Unsupported {
            what: format!("method '{}' on this value", member.field),
            span: call.span,
        })
    }

    fn emit_atomic_method(
        &mut self,
        name: &str,
        method: &str,
        call: &CallExpr,
    ) -> Result<ValueKind, CodegenError> {
        let offset = self
            .local_offset(name)
            .ok_or_else(|| CodegenError::UndefinedVariable {
                name: name.to_string(),
                span: call.span,
            })?;
        match method {
            "load" => {
                // Plain 64-bit loads are sequentially consistent on x64
                self.buf.mov_reg_local(Reg::Rax, offset);
                Ok(ValueKind::Int)
            }
            "store" => {
                self.emit_expr(&call.args[0])?;
                // xchg carries an implicit lock prefix
                self.buf.xchg_mem_reg(Reg::Rbp, offset, Reg::Rax);
                Ok(ValueKind::Nil)
            }
            "add" | "fetch_add" => {
                self.emit_expr(&call.args[0])?;
                self.buf.lock_xadd_mem_reg(Reg::Rbp, offset, Reg::Rax);
                self.emit_asm("  lock xadd [atomic], rax");
                Ok(ValueKind::Int)
            }
            "sub" | "fetch_sub" => {
                self.emit_expr(&call.args[0])?;
                self.buf.neg_reg(Reg::Rax);
                self.buf.lock_xadd_mem_reg(Reg::Rbp, offset, Reg::Rax);
                Ok(ValueKind::Int)
            }
            _ => Err(CodegenError::Unsupported {
                what: format!("atomic method '{}'", method),
                span: call.span,
            }),
        }
    }

    fn emit_smart_ptr_method(
        &mut self,
        kind: SmartPtrKind,
        elem: String,
        method: &str,
        call: &CallExpr,
    ) -> Result<ValueKind, CodegenError> {
        match (kind, method) {
            (SmartPtrKind::Rc, "clone") | (SmartPtrKind::Arc, "clone") => {
                // Bump the strong count at [ptr]; the pointer is the
                // result
                self.buf.mov_reg_imm32(Reg::Rcx, 1);
                if kind == SmartPtrKind::Arc {
                    self.buf.lock_xadd_mem_reg(Reg::Rax, 0, Reg::Rcx);
                    self.emit_asm("  lock xadd [rax], rcx");
                } else {
                    self.buf.mov_reg_mem(Reg::Rdx, Reg::Rax, 0);
                    self.buf.add_reg_reg(Reg::Rdx, Reg::Rcx);
                    self.buf.mov_mem_reg(Reg::Rax, 0, Reg::Rdx);
                }
                Ok(ValueKind::SmartPtr(kind, elem))
            }
            (SmartPtrKind::Rc, "downgrade") | (SmartPtrKind::Arc, "downgrade") => {
                // Bump the weak count at [ptr+8]; a Weak shares the
                // header pointer
                self.buf.mov_reg_imm32(Reg::Rcx, 1);
                if kind == SmartPtrKind::Arc {
                    self.buf.lock_xadd_mem_reg(Reg::Rax, 8, Reg::Rcx);
                } else {
                    self.buf.mov_reg_mem(Reg::Rdx, Reg::Rax, 8);
                    self.buf.add_reg_reg(Reg::Rdx, Reg::Rcx);
                    self.buf.mov_mem_reg(Reg::Rax, 8, Reg::Rdx);
                }
                Ok(ValueKind::SmartPtr(SmartPtrKind::Weak, elem))
            }
            (SmartPtrKind::Weak, "upgrade") => {
                // nil unless strong > 0; otherwise bump strong and return
                // the pointer
                let dead = self.fresh_label("upgrade_dead");
                let end = self.fresh_label("upgrade_end");
                self.buf.mov_reg_mem(Reg::Rcx, Reg::Rax, 0);
                self.buf.test_reg_reg(Reg::Rcx, Reg::Rcx);
                self.buf.jcc_label(Cond::Eq, dead.clone());
                self.buf.mov_reg_imm32(Reg::Rcx, 1);
                self.buf.lock_xadd_mem_reg(Reg::Rax, 0, Reg::Rcx);
                self.buf.jmp_label(end.clone());
                self.buf.bind_label(dead)?;
                self.buf.mov_reg_imm32(Reg::Rax, 0);
                self.buf.bind_label(end)?;
                Ok(ValueKind::SmartPtr(SmartPtrKind::Rc, elem))
            }
            (SmartPtrKind::Cell, "get") | (SmartPtrKind::Box, "get") => {
                self.buf.mov_reg_mem(Reg::Rax, Reg::Rax, 0);
                Ok(kind_for_type(&elem))
            }
            (SmartPtrKind::Cell, "set") => {
                let ptr_slot = self.push_spill(call.span)?;
                self.buf.mov_local_reg(ptr_slot, Reg::Rax);
                self.emit_expr(&call.args[0])?;
                self.buf.mov_reg_reg(Reg::Rcx, Reg::Rax);
                self.buf.mov_reg_local(Reg::Rax, ptr_slot);
                self.pop_spill();
                self.buf.mov_mem_reg(Reg::Rax, 0, Reg::Rcx);
                Ok(ValueKind::Nil)
            }
            (SmartPtrKind::RefCell, "borrow_mut") => {
                // Trap when the borrow counter (after the value) is
                // already set
                let elem_size = type_size(&elem).max(8) as i32;
                let stub = self.error_stub("RefCell already mutably borrowed");
                self.buf.mov_reg_mem(Reg::Rcx, Reg::Rax, elem_size);
                self.buf.test_reg_reg(Reg::Rcx, Reg::Rcx);
                self.buf.jcc_label(Cond::Ne, stub);
                self.buf.mov_reg_imm32(Reg::Rcx, 1);
                self.buf.mov_mem_reg(Reg::Rax, elem_size, Reg::Rcx);
                Ok(ValueKind::SmartPtr(SmartPtrKind::RefCell, elem))
            }
            (SmartPtrKind::RefCell, "borrow") | (SmartPtrKind::RefCell, "get") => {
                self.buf.mov_reg_mem(Reg::Rax, Reg::Rax, 0);
                Ok(kind_for_type(&elem))
            }
            _ => Err(CodegenError::Unsupported {
                what: format!("{}::{}", kind.name(), method),
                span: call.span,
            }),
        }
    }
}

fn cond_for(op: &BinOp) -> Cond {
    match op {
        BinOp::Eq => Cond::Eq,
        BinOp::Ne => Cond::Ne,
        BinOp::Lt => Cond::Lt,
        BinOp::Le => Cond::Le,
        BinOp::Gt => Cond::Gt,
        BinOp::Ge => Cond::Ge,
        _ => unreachable!("not a comparison operator"),
    }
}

pub(crate) fn kind_for_type(ty: &str) -> ValueKind {
    match ty {
        "float" | "f32" | "f64" => ValueKind::Float,
        "bool" => ValueKind::Bool,
        "str" => ValueKind::Str,
        "" | "()" => ValueKind::Nil,
        _ if ty.starts_with('[') && !ty.contains(';') => ValueKind::List,
        _ => ValueKind::Int,
    }
}

fn discriminant_name(expr: &Expression) -> &'static str {
    match expr {
        Expression::Lambda(_) => "lambda",
        Expression::ListComprehension(_) => "list comprehension",
        Expression::MapLiteral(_) => "map literal",
        Expression::New(_) => "new",
        Expression::Perform(_) => "perform",
        Expression::Resume(_) => "resume",
        Expression::Range(_) => "range outside for",
        Expression::Placeholder(_) => "placeholder",
        _ => "expression",
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
    fn arithmetic_compiles_to_imul() {
        let artifact = compile("fn main() -> int:\n    return 6 * 7\n");
        // 48 0F AF = imul r64, r/m64
        assert!(artifact
            .code
            .windows(3)
            .any(|w| w == [0x48, 0x0F, 0xAF]));
    }

    #[test]
    fn division_emits_guard_and_idiv() {
        let artifact = compile("fn main(a: int, b: int) -> int:\n    return a / b\n");
        assert!(artifact.code.windows(2).any(|w| w == [0x48, 0x99])); // cqo
    }

    #[test]
    fn string_literal_lands_in_rdata() {
        let artifact = compile("fn main() -> int:\n    let s = \"hi tyl\"\n    return 0\n");
        let rdata = String::from_utf8_lossy(&artifact.rdata);
        assert!(rdata.contains("hi tyl"));
        assert!(artifact
            .relocs
            .iter()
            .any(|r| r.kind == RelocKind::RipData));
    }

    #[test]
    fn spawn_creates_thread_thunk() {
        let artifact = compile(
            "fn work() -> int:\n    return 1\nfn main() -> int:\n    spawn work()\n    return 0\n",
        );
        assert!(artifact
            .imports
            .iter()
            .any(|i| i.symbol == "CreateThread"));
        assert!(artifact
            .symbols
            .iter()
            .any(|s| s.name.contains("spawn_thunk")));
    }

    #[test]
    fn arc_clone_uses_lock_xadd() {
        let artifact = compile(
            "fn main() -> int:\n    let a = Arc[int](5)\n    let b = a.clone()\n    return 0\n",
        );
        // F0 48 0F C1 = lock xadd
        assert!(artifact
            .code
            .windows(4)
            .any(|w| w == [0xF0, 0x48, 0x0F, 0xC1]));
    }

    #[test]
    fn list_literal_allocates_header_plus_elements() {
        let artifact = compile("fn main() -> int:\n    let xs = [1, 2, 3]\n    return 0\n");
        assert!(artifact.imports.iter().any(|i| i.symbol == "HeapAlloc"));
        // mov rax, 32 = 8 header + 3*8 elements
        assert!(artifact
            .code
            .windows(7)
            .any(|w| w == [0x48, 0xC7, 0xC0, 0x20, 0x00, 0x00, 0x00]));
    }
}
