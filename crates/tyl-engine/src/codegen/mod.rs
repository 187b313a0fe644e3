//! Native x86-64 code generation for Windows.
//!
//! The generator walks the optimized AST and emits machine bytes into a
//! [`CodeBuffer`], producing a [`CodeArtifact`] for the external PE/COFF
//! writers. Variable classification on declaration (see `vardecl.rs`)
//! drives everything: integers may live in callee-saved registers, while
//! lists, fixed arrays, records with `Drop`, smart pointers, atomics and
//! concurrency handles are forced to stack slots for stable addresses.

pub mod abi;
pub mod buffer;
mod expr;
pub mod imports;
mod runtime;
mod stmt;
mod vardecl;
pub mod x64;

use crate::artifact::{CodeArtifact, SymbolDef};
use crate::diagnostics::{Category, Diagnostic};
use crate::optimize::OptLevel;
use crate::parser::ast::*;
use crate::parser::token::Span;
use buffer::CodeBuffer;
use imports::ImportTable;
use rustc_hash::{FxHashMap, FxHashSet};
use thiserror::Error;
use x64::Reg;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum CodegenError {
    #[error("Unsupported construct in code generation: {what}")]
    Unsupported { what: String, span: Span },
    #[error("Undefined variable '{name}' in code generation")]
    UndefinedVariable { name: String, span: Span },
    #[error("Expression nesting exceeds the spill area")]
    SpillOverflow { span: Span },
    #[error("Compile-time assertion failed{}", message.as_ref().map(|m| format!(": {}", m)).unwrap_or_default())]
    ComptimeAssertFailed { message: Option<String>, span: Span },
    #[error("Label error: {0}")]
    Label(#[from] buffer::BufferError),
}

impl CodegenError {
    pub fn span(&self) -> Span {
        match self {
            CodegenError::Unsupported { span, .. }
            | CodegenError::UndefinedVariable { span, .. }
            | CodegenError::SpillOverflow { span }
            | CodegenError::ComptimeAssertFailed { span, .. } => *span,
            CodegenError::Label(_) => Span::synthetic(),
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            CodegenError::Unsupported { .. } => "E4001",
            CodegenError::UndefinedVariable { .. } => "E4002",
            CodegenError::SpillOverflow { .. } => "E4003",
            CodegenError::ComptimeAssertFailed { .. } => "E4004",
            CodegenError::Label(_) => "E4005",
        }
    }
}

/// Smart-pointer binding for a variable: kind, element type and element
/// size.
#[derive(Debug, Clone)]
pub struct SmartPtrBinding {
    pub kind: SmartPtrKind,
    pub elem_type: String,
    pub elem_size: u32,
}

/// Field layout of a record type.
#[derive(Debug, Clone, Default)]
pub struct RecordLayout {
    pub fields: Vec<(String, i32, u32)>,
    pub size: u32,
}

impl RecordLayout {
    pub fn field_offset(&self, name: &str) -> Option<i32> {
        self.fields
            .iter()
            .find(|(f, _, _)| f == name)
            .map(|(_, offset, _)| *offset)
    }
}

/// Labels a loop exposes to `break`/`continue`.
#[derive(Debug, Clone)]
pub(crate) struct LoopFrame {
    pub(crate) break_label: String,
    pub(crate) continue_label: String,
    pub(crate) name: Option<String>,
}

/// Cleanup work to run before leaving a scope early (`lock` releases and
/// `with` resource releases run on every exit path).
#[derive(Debug, Clone)]
pub(crate) enum Cleanup {
    ReleaseMutex { handle_offset: i32 },
    ReleaseResource { slot_offset: i32 },
}

/// Temp-slot spill area size, in 8-byte slots.
const SPILL_SLOTS: i32 = 32;

pub struct CodeGen {
    pub(crate) buf: CodeBuffer,
    pub(crate) imports: ImportTable,
    rdata: Vec<u8>,
    data_symbols: Vec<SymbolDef>,
    string_labels: FxHashMap<String, String>,
    float_labels: FxHashMap<u64, String>,
    pub(crate) asm: Vec<String>,
    pub(crate) warnings: Vec<Diagnostic>,
    filename: String,
    opt_level: OptLevel,

    // Program-wide registries
    pub(crate) refinement_types: FxHashMap<String, TypeAliasDecl>,
    /// `"Trait:Type"` → mangled method label (used for Drop detection).
    pub(crate) impls: FxHashMap<String, String>,
    pub(crate) generic_functions: FxHashMap<String, FnDecl>,
    pub(crate) record_layouts: FxHashMap<String, RecordLayout>,
    pub(crate) function_decls: FxHashMap<String, FnDecl>,
    pub(crate) extern_functions: FxHashMap<String, Option<String>>,
    pub(crate) exports: Vec<String>,

    // Program-level constants, re-seeded into the per-function registries
    global_const_ints: FxHashMap<String, i64>,
    global_const_floats: FxHashMap<String, f64>,
    global_const_strs: FxHashMap<String, String>,

    // Per-function state (cleared between functions)
    pub(crate) locals: FxHashMap<String, i32>,
    pub(crate) var_registers: FxHashMap<String, Reg>,
    /// Program-level mutable globals pinned to callee-saved registers;
    /// initialised by the entry stub and never handed to the local
    /// allocator.
    pub(crate) global_var_registers: FxHashMap<String, Reg>,
    pub(crate) float_vars: FxHashSet<String>,
    pub(crate) const_vars: FxHashMap<String, i64>,
    pub(crate) const_float_vars: FxHashMap<String, f64>,
    pub(crate) const_str_vars: FxHashMap<String, String>,
    pub(crate) const_list_vars: FxHashMap<String, Vec<i64>>,
    pub(crate) list_sizes: FxHashMap<String, usize>,
    pub(crate) list_vars: FxHashSet<String>,
    pub(crate) var_record_types: FxHashMap<String, String>,
    pub(crate) var_fixed_array_types: FxHashMap<String, String>,
    pub(crate) var_atomic_types: FxHashMap<String, String>,
    pub(crate) var_smart_ptr_types: FxHashMap<String, SmartPtrBinding>,
    pub(crate) var_refinement_types: FxHashMap<String, String>,
    pub(crate) var_types: FxHashMap<String, String>,
    pub(crate) closure_vars: FxHashSet<String>,
    pub(crate) fn_ptr_vars: FxHashSet<String>,
    pub(crate) bool_vars: FxHashSet<String>,

    pub(crate) current_function: String,
    next_offset: i32,
    frame_size: i32,
    spill_depth: i32,
    spill_base: i32,
    label_counter: usize,
    loop_stack: Vec<LoopFrame>,
    cleanup_stack: Vec<Cleanup>,
    epilogue_label: String,
    saved_regs: Vec<Reg>,
    /// Error stubs shared across the function body: (label, message).
    error_stubs: Vec<(String, String)>,
    /// Thunks generated for `spawn` expressions, emitted after the
    /// current function.
    pending_thunks: Vec<(String, Expression)>,
}

impl CodeGen {
    pub fn new(filename: impl Into<String>, opt_level: OptLevel) -> Self {
        Self {
            buf: CodeBuffer::new(),
            imports: ImportTable::new(),
            rdata: Vec::new(),
            data_symbols: Vec::new(),
            string_labels: FxHashMap::default(),
            float_labels: FxHashMap::default(),
            asm: Vec::new(),
            warnings: Vec::new(),
            filename: filename.into(),
            opt_level,
            refinement_types: FxHashMap::default(),
            impls: FxHashMap::default(),
            generic_functions: FxHashMap::default(),
            record_layouts: FxHashMap::default(),
            function_decls: FxHashMap::default(),
            extern_functions: FxHashMap::default(),
            exports: Vec::new(),
            global_const_ints: FxHashMap::default(),
            global_const_floats: FxHashMap::default(),
            global_const_strs: FxHashMap::default(),
            locals: FxHashMap::default(),
            var_registers: FxHashMap::default(),
            global_var_registers: FxHashMap::default(),
            float_vars: FxHashSet::default(),
            const_vars: FxHashMap::default(),
            const_float_vars: FxHashMap::default(),
            const_str_vars: FxHashMap::default(),
            const_list_vars: FxHashMap::default(),
            list_sizes: FxHashMap::default(),
            list_vars: FxHashSet::default(),
            var_record_types: FxHashMap::default(),
            var_fixed_array_types: FxHashMap::default(),
            var_atomic_types: FxHashMap::default(),
            var_smart_ptr_types: FxHashMap::default(),
            var_refinement_types: FxHashMap::default(),
            var_types: FxHashMap::default(),
            closure_vars: FxHashSet::default(),
            fn_ptr_vars: FxHashSet::default(),
            bool_vars: FxHashSet::default(),
            current_function: String::new(),
            next_offset: 0,
            frame_size: 0,
            spill_depth: 0,
            spill_base: 0,
            label_counter: 0,
            loop_stack: Vec::new(),
            cleanup_stack: Vec::new(),
            epilogue_label: String::new(),
            saved_regs: Vec::new(),
            error_stubs: Vec::new(),
            pending_thunks: Vec::new(),
        }
    }

    pub fn warnings(&self) -> &[Diagnostic] {
        &self.warnings
    }

    /// Compile a whole program into a code artifact. Warnings (e.g.
    /// compile-time refinement failures) stay on the generator for the
    /// driver to render.
    pub fn compile(&mut self, program: &Program) -> Result<CodeArtifact, CodegenError> {
        self.collect_declarations(program);
        let globals = self.classify_globals(program)?;

        // Entry stub: initialise register globals, call main, pass its
        // result to ExitProcess. DLL and library compiles have no main;
        // their entry is resolved by the image writer.
        if program.find_function("main").is_some() {
            self.emit_entry_stub(&globals)?;
        }

        for statement in &program.statements {
            match statement {
                Statement::Fn(decl) if decl.body.is_some() => {
                    self.emit_function(decl)?;
                }
                Statement::Impl(impl_decl) => {
                    for method in &impl_decl.methods {
                        if method.body.is_some() {
                            let mut mangled = method.clone();
                            mangled.name = format!("{}__{}", impl_decl.type_name, method.name);
                            self.emit_function(&mangled)?;
                        }
                    }
                }
                _ => {}
            }
        }

        self.buf.finalize()?;

        let mut symbols: Vec<SymbolDef> = self
            .buf
            .labels()
            .map(|(name, offset)| SymbolDef {
                name: name.clone(),
                offset,
                exported: self.exports.contains(name),
            })
            .collect();
        symbols.sort_by_key(|s| s.offset);

        Ok(CodeArtifact {
            code: std::mem::take(&mut self.buf.bytes),
            rdata: std::mem::take(&mut self.rdata),
            data_symbols: std::mem::take(&mut self.data_symbols),
            symbols,
            relocs: std::mem::take(&mut self.buf.relocs),
            imports: self.imports.entries().to_vec(),
            exports: std::mem::take(&mut self.exports),
            entry: 0,
            assembly: std::mem::take(&mut self.asm),
        })
    }

    /// Program pre-scan: record layouts, refinement types, impls, generic
    /// and extern functions.
    fn collect_declarations(&mut self, program: &Program) {
        for statement in &program.statements {
            match statement {
                Statement::Record(record) => {
                    let mut layout = RecordLayout::default();
                    let mut offset = 0i32;
                    for field in &record.fields {
                        let size = match record.repr {
                            ReprKind::Packed => type_size(&field.type_name),
                            _ => 8,
                        };
                        layout.fields.push((field.name.clone(), offset, size));
                        offset += size as i32;
                    }
                    layout.size = offset.max(8) as u32;
                    self.record_layouts.insert(record.name.clone(), layout);
                }
                Statement::TypeAlias(alias) if alias.constraint.is_some() => {
                    self.refinement_types
                        .insert(alias.name.clone(), alias.clone());
                }
                Statement::Impl(impl_decl) => {
                    if let Some(trait_name) = &impl_decl.trait_name {
                        let key = format!("{}:{}", trait_name, impl_decl.type_name);
                        let label = impl_decl
                            .methods
                            .first()
                            .map(|m| format!("{}__{}", impl_decl.type_name, m.name))
                            .unwrap_or_default();
                        self.impls.insert(key, label);
                    }
                }
                Statement::Fn(decl) => {
                    if !decl.generics.is_empty() {
                        self.generic_functions
                            .insert(decl.name.clone(), decl.clone());
                    }
                    if decl.flags.export {
                        self.exports.push(decl.name.clone());
                    }
                    self.function_decls.insert(decl.name.clone(), decl.clone());
                }
                Statement::ExternBlock(block) => {
                    for func in &block.functions {
                        self.extern_functions
                            .insert(func.name.clone(), block.library.clone());
                        self.function_decls.insert(func.name.clone(), func.clone());
                    }
                }
                _ => {}
            }
        }
    }

    /// Classify top-level declarations: constants feed the per-function
    /// constant registries; mutable integer globals get pinned to the
    /// tail of the callee-saved hint table.
    fn classify_globals(
        &mut self,
        program: &Program,
    ) -> Result<Vec<(Reg, i64)>, CodegenError> {
        // Registers reserved from the back so local hints take the front
        let mut available = abi::REGISTER_HINTS.iter().rev();
        let mut initializers = Vec::new();

        for statement in &program.statements {
            let Statement::VarDecl(decl) = statement else {
                continue;
            };
            let init = decl.initializer.as_ref();

            if decl.is_const || !decl.mutable {
                if let Some(init) = init {
                    if let Some(value) = self.try_eval_const_int(init) {
                        self.global_const_ints.insert(decl.name.clone(), value);
                        continue;
                    }
                    if let Some(value) = self.try_eval_const_float(init) {
                        self.global_const_floats.insert(decl.name.clone(), value);
                        continue;
                    }
                    if let Some(value) = self.try_eval_const_str(init) {
                        self.global_const_strs.insert(decl.name.clone(), value);
                        continue;
                    }
                }
            }

            // Mutable global: needs a pinned register and a constant
            // initial value the entry stub can materialise
            let value = init.and_then(|e| self.try_eval_const_int(e)).unwrap_or(0);
            let Some(&reg) = available.next() else {
                return Err(CodegenError::Unsupported {
                    what: format!("too many register globals (at '{}')", decl.name),
                    span: decl.span,
                });
            };
            self.global_var_registers.insert(decl.name.clone(), reg);
            initializers.push((reg, value));
        }
        Ok(initializers)
    }

    /// `_start`: set up a frame, materialise register globals, call main,
    /// exit with its return value.
    fn emit_entry_stub(&mut self, globals: &[(Reg, i64)]) -> Result<(), CodegenError> {
        self.buf.bind_label("_start")?;
        self.emit_asm("_start:");
        self.buf.sub_reg_imm32(Reg::Rsp, 40);
        for &(reg, value) in globals {
            if value as i32 as i64 == value {
                self.buf.mov_reg_imm32(reg, value as i32);
            } else {
                self.buf.mov_reg_imm64(reg, value);
            }
        }
        self.buf.call_label("main");
        self.buf.mov_reg_reg(Reg::Rcx, Reg::Rax);
        let exit = self.imports.kernel32("ExitProcess");
        self.buf.call_import(&exit);
        Ok(())
    }

    // ------------------------------------------------------------------
    // Per-function plumbing
    // ------------------------------------------------------------------

    fn reset_function_state(&mut self) {
        self.locals.clear();
        self.var_registers.clear();
        self.float_vars.clear();
        // Per-function constant registries start from the program-level
        // constants so reads inline them in every function
        self.const_vars = self.global_const_ints.clone();
        self.const_float_vars = self.global_const_floats.clone();
        self.const_str_vars = self.global_const_strs.clone();
        self.const_list_vars.clear();
        self.list_sizes.clear();
        self.list_vars.clear();
        self.var_record_types.clear();
        self.var_fixed_array_types.clear();
        self.var_atomic_types.clear();
        self.var_smart_ptr_types.clear();
        self.var_refinement_types.clear();
        self.var_types.clear();
        self.closure_vars.clear();
        self.fn_ptr_vars.clear();
        self.bool_vars.clear();
        self.loop_stack.clear();
        self.cleanup_stack.clear();
        self.error_stubs.clear();
        self.next_offset = 0;
        self.spill_depth = 0;
        self.saved_regs.clear();
    }

    pub(crate) fn emit_function(&mut self, decl: &FnDecl) -> Result<(), CodegenError> {
        self.reset_function_state();
        self.current_function = decl.name.clone();
        self.epilogue_label = format!(".L{}_epilogue", decl.name);

        let body = decl.body.as_ref().expect("function with body");

        // Frame sizing: one slot per declared name plus the spill area
        let slots = count_local_slots(body) as i32 + decl.params.len() as i32;
        let locals_bytes = slots * 8;
        self.spill_base = -(locals_bytes + 8);
        self.frame_size = abi::align_frame(locals_bytes + SPILL_SLOTS * 8 + 8);

        // Register hints: plain integer locals, in declaration order
        if !decl.flags.naked {
            self.assign_register_hints(body);
        }

        self.buf.bind_label(&decl.name)?;
        self.emit_asm(&format!("{}:", decl.name));

        if !decl.flags.naked {
            self.buf.push_reg(Reg::Rbp);
            self.buf.mov_reg_reg(Reg::Rbp, Reg::Rsp);
            self.buf.sub_reg_imm32(Reg::Rsp, self.frame_size);
            self.emit_asm(&format!("  sub rsp, {}", self.frame_size));

            let mut saved: Vec<Reg> = self.var_registers.values().copied().collect();
            saved.sort_by_key(|r| *r as u8);
            saved.dedup();
            for reg in &saved {
                self.buf.push_reg(*reg);
            }
            // Keep 16-byte alignment when an odd number of registers is
            // saved
            if saved.len() % 2 == 1 {
                self.buf.sub_reg_imm32(Reg::Rsp, 8);
            }
            self.saved_regs = saved;

            self.spill_params(decl)?;
        }

        for statement in body {
            self.emit_statement(statement)?;
        }

        // Fall-through return of 0
        self.buf.mov_reg_imm32(Reg::Rax, 0);
        self.buf.bind_label(self.epilogue_label.clone())?;
        if !decl.flags.naked {
            if self.saved_regs.len() % 2 == 1 {
                self.buf.add_reg_imm32(Reg::Rsp, 8);
            }
            for reg in self.saved_regs.clone().iter().rev() {
                self.buf.pop_reg(*reg);
            }
            self.buf.mov_reg_reg(Reg::Rsp, Reg::Rbp);
            self.buf.pop_reg(Reg::Rbp);
        }
        self.buf.ret();
        self.emit_asm("  ret");

        self.emit_error_stubs()?;
        self.emit_pending_thunks()?;
        Ok(())
    }

    fn spill_params(&mut self, decl: &FnDecl) -> Result<(), CodegenError> {
        for (index, param) in decl.params.iter().enumerate() {
            let offset = self.alloc_local(&param.name);
            self.var_types.insert(param.name.clone(), param.ty.clone());
            let is_float = matches!(param.ty.as_str(), "float" | "f32" | "f64");
            if is_float {
                self.float_vars.insert(param.name.clone());
            }
            if param.ty.starts_with('[') && !param.ty.contains(';') {
                self.list_vars.insert(param.name.clone());
            }
            if index < 4 {
                if is_float {
                    self.buf
                        .movsd_local_xmm(offset, abi::FLOAT_ARG_REGS[index]);
                } else {
                    self.buf.mov_local_reg(offset, abi::INT_ARG_REGS[index]);
                }
            } else {
                // Stack parameters sit above the return address and the
                // saved rbp: [rbp + 16 + 8*(index-4)] plus shadow space
                let src = 16 + abi::SHADOW_SPACE + ((index - 4) as i32) * 8;
                self.buf.mov_reg_mem(Reg::Rax, Reg::Rbp, src);
                self.buf.mov_local_reg(offset, Reg::Rax);
            }
        }
        Ok(())
    }

    /// Pick register-resident integer locals, in declaration order, up to
    /// the hint table size. Registers pinned to globals are off-limits.
    fn assign_register_hints(&mut self, body: &[Statement]) {
        let taken: Vec<Reg> = self.global_var_registers.values().copied().collect();
        let mut hints = abi::REGISTER_HINTS.iter().filter(|r| !taken.contains(r));
        collect_plain_int_decls(body, &mut |name| {
            if let Some(&reg) = hints.next() {
                self.var_registers.insert(name.to_string(), reg);
                true
            } else {
                false
            }
        });
    }

    // ------------------------------------------------------------------
    // Small shared helpers
    // ------------------------------------------------------------------

    pub(crate) fn alloc_local(&mut self, name: &str) -> i32 {
        self.next_offset -= 8;
        let offset = self.next_offset;
        self.locals.insert(name.to_string(), offset);
        offset
    }

    pub(crate) fn local_offset(&self, name: &str) -> Option<i32> {
        self.locals.get(name).copied()
    }

    pub(crate) fn fresh_label(&mut self, hint: &str) -> String {
        let label = format!(".L{}_{}", hint, self.label_counter);
        self.label_counter += 1;
        label
    }

    /// Allocate a spill slot for an intermediate value.
    pub(crate) fn push_spill(&mut self, span: Span) -> Result<i32, CodegenError> {
        if self.spill_depth >= SPILL_SLOTS {
            return Err(CodegenError::SpillOverflow { span });
        }
        let offset = self.spill_base - self.spill_depth * 8;
        self.spill_depth += 1;
        Ok(offset)
    }

    pub(crate) fn pop_spill(&mut self) {
        debug_assert!(self.spill_depth > 0);
        self.spill_depth -= 1;
    }

    pub(crate) fn emit_asm(&mut self, line: &str) {
        self.asm.push(line.to_string());
    }

    /// Intern a string constant in .rdata (NUL-terminated) and return its
    /// symbol.
    pub(crate) fn add_string_constant(&mut self, content: &str) -> String {
        if let Some(label) = self.string_labels.get(content) {
            return label.clone();
        }
        let label = format!("str_{}", self.string_labels.len());
        self.data_symbols.push(SymbolDef {
            name: label.clone(),
            offset: self.rdata.len(),
            exported: false,
        });
        self.rdata.extend_from_slice(content.as_bytes());
        self.rdata.push(0);
        self.string_labels.insert(content.to_string(), label.clone());
        label
    }

    /// Intern raw bytes (byte strings) in .rdata.
    pub(crate) fn add_bytes_constant(&mut self, bytes: &[u8]) -> String {
        let label = format!("bytes_{}", self.data_symbols.len());
        self.data_symbols.push(SymbolDef {
            name: label.clone(),
            offset: self.rdata.len(),
            exported: false,
        });
        self.rdata.extend_from_slice(bytes);
        self.rdata.push(0);
        label
    }

    /// Intern an f64 constant in .rdata and return its symbol.
    pub(crate) fn add_float_constant(&mut self, value: f64) -> String {
        let bits = value.to_bits();
        if let Some(label) = self.float_labels.get(&bits) {
            return label.clone();
        }
        let label = format!("flt_{}", self.float_labels.len());
        // 8-byte alignment for movsd
        while self.rdata.len() % 8 != 0 {
            self.rdata.push(0);
        }
        self.data_symbols.push(SymbolDef {
            name: label.clone(),
            offset: self.rdata.len(),
            exported: false,
        });
        self.rdata.extend_from_slice(&bits.to_le_bytes());
        self.float_labels.insert(bits, label.clone());
        label
    }

    pub(crate) fn warn(&mut self, code: &str, message: impl Into<String>, span: Span) {
        self.warnings.push(Diagnostic::warning(
            Category::Codegen,
            code,
            message,
            self.filename.clone(),
            span,
        ));
    }

    /// Whether `ty` has a registered `impl Drop`.
    pub(crate) fn type_has_drop(&self, ty: &str) -> bool {
        self.impls.contains_key(&format!("Drop:{}", ty))
    }

    pub(crate) fn loop_frame(&self, label: Option<&str>) -> Option<&LoopFrame> {
        match label {
            Some(name) => self
                .loop_stack
                .iter()
                .rev()
                .find(|f| f.name.as_deref() == Some(name)),
            None => self.loop_stack.last(),
        }
    }

    pub(crate) fn push_loop(
        &mut self,
        break_label: String,
        continue_label: String,
        name: Option<String>,
    ) {
        self.loop_stack.push(LoopFrame {
            break_label,
            continue_label,
            name,
        });
    }

    pub(crate) fn pop_loop(&mut self) {
        self.loop_stack.pop();
    }

    pub(crate) fn push_cleanup(&mut self, cleanup: Cleanup) {
        self.cleanup_stack.push(cleanup);
    }

    pub(crate) fn pop_cleanup(&mut self) -> Option<Cleanup> {
        self.cleanup_stack.pop()
    }

    pub(crate) fn opt_level(&self) -> OptLevel {
        self.opt_level
    }

    /// Queue a `spawn` thunk for emission after the current function.
    pub(crate) fn pending_thunk(&mut self, label: String, expression: Expression) {
        self.pending_thunks.push((label, expression));
    }

    /// Run every pending cleanup without popping (early exits re-run the
    /// whole stack; normal scope exits pop their own entry).
    pub(crate) fn emit_cleanups_for_exit(&mut self) {
        for cleanup in self.cleanup_stack.clone().iter().rev() {
            self.emit_cleanup(cleanup);
        }
    }

    pub(crate) fn emit_cleanup(&mut self, cleanup: &Cleanup) {
        match cleanup {
            Cleanup::ReleaseMutex { handle_offset } => {
                let release = self.imports.kernel32("ReleaseMutex");
                self.buf.mov_reg_local(Reg::Rcx, *handle_offset);
                self.buf.sub_reg_imm32(Reg::Rsp, abi::SHADOW_SPACE);
                self.buf.call_import(&release);
                self.buf.add_reg_imm32(Reg::Rsp, abi::SHADOW_SPACE);
            }
            Cleanup::ReleaseResource { slot_offset } => {
                // The release hook is resolved by the linker against the
                // runtime support library
                self.buf.mov_reg_local(Reg::Rcx, *slot_offset);
                self.buf.sub_reg_imm32(Reg::Rsp, abi::SHADOW_SPACE);
                self.buf.emit_u8(0xE8);
                self.buf
                    .emit_reloc_rel32(buffer::RelocKind::Rel32, "tyl_release", 0);
                self.buf.add_reg_imm32(Reg::Rsp, abi::SHADOW_SPACE);
            }
        }
    }
}

/// Sizes of canonical types, for fixed arrays, atomics and packed
/// records. Everything pointer-shaped is 8.
pub(crate) fn type_size(ty: &str) -> u32 {
    match ty {
        "i8" | "u8" | "bool" | "byte" => 1,
        "i16" | "u16" => 2,
        "i32" | "u32" | "f32" | "char" => 4,
        _ => 8,
    }
}

/// Count the stack slots a body needs: every declared name, loop
/// variable and destructuring binding.
fn count_local_slots(statements: &[Statement]) -> usize {
    let mut count = 0usize;
    for statement in statements {
        match statement {
            Statement::VarDecl(_) => count += 1,
            Statement::MultiVarDecl(decl) => count += decl.names.len(),
            Statement::Destructuring(decl) => {
                count += match &decl.pattern {
                    DestructurePattern::Tuple(names) | DestructurePattern::Record(names) => {
                        names.len()
                    }
                }
            }
            Statement::For(s) => count += 1 + count_local_slots(&s.body),
            Statement::While(s) => count += count_local_slots(&s.body),
            Statement::Loop(s) => count += count_local_slots(&s.body),
            Statement::If(s) => {
                count += count_local_slots(&s.then_branch);
                for (_, branch) in &s.elif_branches {
                    count += count_local_slots(branch);
                }
                if let Some(branch) = &s.else_branch {
                    count += count_local_slots(branch);
                }
            }
            Statement::Block(s) => count += count_local_slots(&s.statements),
            Statement::Lock(s) => count += 1 + count_local_slots(&s.body),
            Statement::With(s) => count += 1 + count_local_slots(&s.body),
            Statement::Scope(s) => count += count_local_slots(&s.body),
            Statement::Unsafe(s) => count += count_local_slots(&s.body),
            Statement::Match(s) => {
                count += 1;
                for arm in &s.arms {
                    count += count_local_slots(&arm.body);
                }
            }
            Statement::Unless(s) => count += count_local_slots(&s.body),
            _ => {}
        }
    }
    count
}

/// Visit plain-integer declarations (register-allocation candidates) in
/// order; the callback returns false when the hint table is exhausted.
fn collect_plain_int_decls(statements: &[Statement], f: &mut impl FnMut(&str) -> bool) -> bool {
    for statement in statements {
        if let Statement::VarDecl(decl) = statement {
            let int_type = matches!(decl.type_name.as_str(), "" | "int" | "i64" | "i32");
            let int_init = match &decl.initializer {
                Some(Expression::IntLiteral(_))
                | Some(Expression::Binary(_))
                | Some(Expression::Unary(_))
                | Some(Expression::Identifier(_)) => true,
                _ => false,
            };
            if int_type && int_init && !f(&decl.name) {
                return false;
            }
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::Parser;

    fn compile(source: &str) -> CodeArtifact {
        let program = Parser::parse_source(source, "t.tyl").unwrap();
        CodeGen::new("t.tyl", OptLevel::O0)
            .compile(&program)
            .expect("codegen ok")
    }

    #[test]
    fn entry_stub_calls_main_then_exit() {
        let artifact = compile("fn main() -> int:\n    return 0\n");
        assert!(artifact.find_symbol("_start").is_some());
        assert!(artifact.find_symbol("main").is_some());
        assert!(artifact
            .imports
            .iter()
            .any(|i| i.symbol == "ExitProcess" && i.dll == "kernel32"));
    }

    #[test]
    fn function_prologue_bytes() {
        let artifact = compile("fn main() -> int:\n    return 7\n");
        let main = artifact.find_symbol("main").unwrap();
        // push rbp; mov rbp, rsp; sub rsp, imm32
        let bytes = &artifact.code[main.offset..main.offset + 8];
        assert_eq!(&bytes[..4], &[0x55, 0x48, 0x89, 0xE5]);
        assert_eq!(bytes[4], 0x48);
        assert_eq!(bytes[5], 0x81);
        assert_eq!(bytes[6], 0xEC);
    }

    #[test]
    fn frame_is_16_byte_aligned() {
        let artifact = compile(
            "fn main() -> int:\n    let a = 1\n    let b = 2\n    let c = 3\n    return a\n",
        );
        let main = artifact.find_symbol("main").unwrap();
        let frame = u32::from_le_bytes(
            artifact.code[main.offset + 7..main.offset + 11]
                .try_into()
                .unwrap(),
        );
        assert_eq!(frame % 16, 0);
    }

    #[test]
    fn string_constants_deduplicate() {
        let mut cg = CodeGen::new("t.tyl", OptLevel::O0);
        let a = cg.add_string_constant("hello");
        let b = cg.add_string_constant("hello");
        let c = cg.add_string_constant("other");
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn top_level_const_is_inlined_at_o0() {
        let artifact = compile("const N :: 10\nfn main() -> int:\n    return N + 1\n");
        // mov rax, 10 from the inlined constant
        assert!(artifact
            .code
            .windows(7)
            .any(|w| w == [0x48, 0xC7, 0xC0, 0x0A, 0x00, 0x00, 0x00]));
    }

    #[test]
    fn mutable_global_is_register_pinned() {
        let program = Parser::parse_source(
            "mut counter = 5\nfn main() -> int:\n    counter = counter + 1\n    return counter\n",
        "t.tyl",
        )
        .unwrap();
        let mut cg = CodeGen::new("t.tyl", OptLevel::O0);
        let artifact = cg.compile(&program).unwrap();
        assert!(cg.global_var_registers.contains_key("counter"));
        assert!(artifact.find_symbol("_start").is_some());
    }

    #[test]
    fn record_layout_offsets() {
        let program = Parser::parse_source(
            "record Point:\n    x: int\n    y: int\nfn main() -> int:\n    return 0\n",
            "t.tyl",
        )
        .unwrap();
        let mut cg = CodeGen::new("t.tyl", OptLevel::O0);
        cg.collect_declarations(&program);
        let layout = &cg.record_layouts["Point"];
        assert_eq!(layout.field_offset("x"), Some(0));
        assert_eq!(layout.field_offset("y"), Some(8));
        assert_eq!(layout.size, 16);
    }
}
