//! SSA construction and SSA-level optimization (O3+).
//!
//! Uses the Braun et al. on-the-fly algorithm: definitions are recorded
//! per block; reads either find a local definition, walk a single
//! predecessor, or insert a (possibly incomplete) φ. Blocks are sealed
//! once all predecessors are known, at which point φ operands are filled
//! and trivially redundant φs collapse into their single operand.
//!
//! The SSA form does not round-trip to the AST. The pass exists to verify
//! the construction and to run DCE / constant propagation / copy
//! propagation / local CSE on the IR; it reports one transformation per
//! successfully lowered function.

use super::OptimizationPass;
use crate::parser::ast::*;
use rustc_hash::FxHashMap;

pub type ValueId = usize;
pub type BlockId = usize;
pub type InstrId = usize;

#[derive(Debug, Clone, PartialEq)]
pub enum SsaOpcode {
    ConstInt(i64),
    ConstFloat(f64),
    ConstBool(bool),
    /// Index into the module string pool.
    ConstStr(usize),
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Neg,
    Not,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Phi,
    Branch,
    Jump,
    Return,
    Param(usize),
    Call(String),
    Copy,
    Nop,
}

impl SsaOpcode {
    fn has_side_effects(&self) -> bool {
        matches!(
            self,
            SsaOpcode::Call(_) | SsaOpcode::Return | SsaOpcode::Branch | SsaOpcode::Jump
        )
    }
}

#[derive(Debug, Clone)]
pub struct SsaInstruction {
    pub opcode: SsaOpcode,
    pub result: Option<ValueId>,
    pub operands: Vec<ValueId>,
    pub block: BlockId,
    /// `(predecessor, value)` pairs for φs.
    pub phi_operands: Vec<(BlockId, ValueId)>,
    pub true_target: Option<BlockId>,
    pub false_target: Option<BlockId>,
}

impl SsaInstruction {
    fn new(opcode: SsaOpcode, block: BlockId) -> Self {
        Self {
            opcode,
            result: None,
            operands: Vec::new(),
            block,
            phi_operands: Vec::new(),
            true_target: None,
            false_target: None,
        }
    }

    pub fn is_phi(&self) -> bool {
        self.opcode == SsaOpcode::Phi
    }
}

#[derive(Debug, Default)]
pub struct SsaBlock {
    pub instructions: Vec<InstrId>,
    pub predecessors: Vec<BlockId>,
    pub successors: Vec<BlockId>,
    pub sealed: bool,
}

#[derive(Debug, Default)]
pub struct SsaFunction {
    pub name: String,
    pub blocks: Vec<SsaBlock>,
    pub instructions: Vec<SsaInstruction>,
    pub value_count: usize,
    pub entry: BlockId,
}

impl SsaFunction {
    fn new_value(&mut self) -> ValueId {
        let id = self.value_count;
        self.value_count += 1;
        id
    }

    fn new_block(&mut self) -> BlockId {
        self.blocks.push(SsaBlock::default());
        self.blocks.len() - 1
    }

    fn add_edge(&mut self, from: BlockId, to: BlockId) {
        self.blocks[from].successors.push(to);
        self.blocks[to].predecessors.push(from);
    }

    /// Count of non-Nop φ instructions, for tests and verification.
    pub fn phi_count(&self) -> usize {
        self.instructions.iter().filter(|i| i.is_phi()).count()
    }
}

#[derive(Debug, Default)]
pub struct SsaModule {
    pub functions: Vec<SsaFunction>,
    /// Every string literal lowered adds a unique pool entry.
    pub string_pool: Vec<String>,
}

impl SsaModule {
    pub fn intern_string(&mut self, value: &str) -> usize {
        if let Some(index) = self.string_pool.iter().position(|s| s == value) {
            return index;
        }
        self.string_pool.push(value.to_string());
        self.string_pool.len() - 1
    }
}

/// Signals an AST shape outside the lowering subset; the function is
/// skipped, not failed.
struct Unsupported;

pub struct SsaBuilder<'m> {
    module: &'m mut SsaModule,
    func: SsaFunction,
    current: BlockId,
    current_def: FxHashMap<String, FxHashMap<BlockId, ValueId>>,
    incomplete_phis: FxHashMap<BlockId, FxHashMap<String, InstrId>>,
    /// Which instruction defines each value (for trivial-φ rewriting).
    def_instr: FxHashMap<ValueId, InstrId>,
    terminated: bool,
}

impl<'m> SsaBuilder<'m> {
    pub fn new(module: &'m mut SsaModule) -> Self {
        Self {
            module,
            func: SsaFunction::default(),
            current: 0,
            current_def: FxHashMap::default(),
            incomplete_phis: FxHashMap::default(),
            def_instr: FxHashMap::default(),
            terminated: false,
        }
    }

    pub fn build(mut self, decl: &FnDecl) -> Option<SsaFunction> {
        self.func.name = decl.name.clone();
        let entry = self.func.new_block();
        self.func.entry = entry;
        self.current = entry;
        self.seal_block(entry);

        for (index, param) in decl.params.iter().enumerate() {
            let value = self.emit_value(SsaOpcode::Param(index), vec![]);
            self.write_variable(&param.name, entry, value);
        }

        let body = decl.body.as_ref()?;
        match self.lower_block(body) {
            Ok(()) => {}
            Err(Unsupported) => return None,
        }

        if !self.terminated {
            self.emit_effect(SsaOpcode::Return, vec![]);
        }
        Some(self.func)
    }

    // ------------------------------------------------------------------
    // Instruction emission
    // ------------------------------------------------------------------

    fn push_instr(&mut self, instr: SsaInstruction) -> InstrId {
        let id = self.func.instructions.len();
        self.func.instructions.push(instr);
        self.func.blocks[self.current].instructions.push(id);
        id
    }

    fn emit_value(&mut self, opcode: SsaOpcode, operands: Vec<ValueId>) -> ValueId {
        let value = self.func.new_value();
        let mut instr = SsaInstruction::new(opcode, self.current);
        instr.result = Some(value);
        instr.operands = operands;
        let id = self.push_instr(instr);
        self.def_instr.insert(value, id);
        value
    }

    fn emit_effect(&mut self, opcode: SsaOpcode, operands: Vec<ValueId>) -> InstrId {
        let mut instr = SsaInstruction::new(opcode, self.current);
        instr.operands = operands;
        self.push_instr(instr)
    }

    fn emit_jump(&mut self, target: BlockId) {
        let mut instr = SsaInstruction::new(SsaOpcode::Jump, self.current);
        instr.true_target = Some(target);
        self.push_instr(instr);
        self.func.add_edge(self.current, target);
    }

    fn emit_branch(&mut self, cond: ValueId, then_block: BlockId, else_block: BlockId) {
        let mut instr = SsaInstruction::new(SsaOpcode::Branch, self.current);
        instr.operands = vec![cond];
        instr.true_target = Some(then_block);
        instr.false_target = Some(else_block);
        self.push_instr(instr);
        self.func.add_edge(self.current, then_block);
        self.func.add_edge(self.current, else_block);
    }

    // ------------------------------------------------------------------
    // Braun et al. variable handling
    // ------------------------------------------------------------------

    fn write_variable(&mut self, name: &str, block: BlockId, value: ValueId) {
        self.current_def
            .entry(name.to_string())
            .or_default()
            .insert(block, value);
    }

    fn read_variable(&mut self, name: &str, block: BlockId) -> Result<ValueId, Unsupported> {
        if let Some(defs) = self.current_def.get(name) {
            if let Some(value) = defs.get(&block) {
                return Ok(*value);
            }
        }
        self.read_variable_recursive(name, block)
    }

    fn read_variable_recursive(
        &mut self,
        name: &str,
        block: BlockId,
    ) -> Result<ValueId, Unsupported> {
        let value = if !self.func.blocks[block].sealed {
            // Incomplete CFG: placeholder φ, filled when sealed
            let phi_value = self.place_phi(block);
            self.incomplete_phis
                .entry(block)
                .or_default()
                .insert(name.to_string(), self.def_instr[&phi_value]);
            phi_value
        } else if self.func.blocks[block].predecessors.len() == 1 {
            let pred = self.func.blocks[block].predecessors[0];
            self.read_variable(name, pred)?
        } else if self.func.blocks[block].predecessors.is_empty() {
            // Read of an undefined variable (a global or builtin): not in
            // the lowering subset
            return Err(Unsupported);
        } else {
            let phi_value = self.place_phi(block);
            self.write_variable(name, block, phi_value);
            self.add_phi_operands(name, phi_value, block)?
        };
        self.write_variable(name, block, value);
        Ok(value)
    }

    fn place_phi(&mut self, block: BlockId) -> ValueId {
        let value = self.func.new_value();
        let mut instr = SsaInstruction::new(SsaOpcode::Phi, block);
        instr.result = Some(value);
        let id = self.func.instructions.len();
        self.func.instructions.push(instr);
        // φs belong at the head of the block
        self.func.blocks[block].instructions.insert(0, id);
        self.def_instr.insert(value, id);
        value
    }

    fn add_phi_operands(
        &mut self,
        name: &str,
        phi_value: ValueId,
        block: BlockId,
    ) -> Result<ValueId, Unsupported> {
        let preds = self.func.blocks[block].predecessors.clone();
        for pred in preds {
            let operand = self.read_variable(name, pred)?;
            let instr_id = self.def_instr[&phi_value];
            self.func.instructions[instr_id]
                .phi_operands
                .push((pred, operand));
        }
        Ok(self.try_remove_trivial_phi(phi_value))
    }

    /// A φ whose operands are all the same value (or itself) is replaced
    /// by that value.
    fn try_remove_trivial_phi(&mut self, phi_value: ValueId) -> ValueId {
        let instr_id = self.def_instr[&phi_value];
        let mut same: Option<ValueId> = None;
        for (_, operand) in &self.func.instructions[instr_id].phi_operands {
            if *operand == phi_value || Some(*operand) == same {
                continue;
            }
            if same.is_some() {
                // Not trivial: merges at least two distinct values
                return phi_value;
            }
            same = Some(*operand);
        }
        let replacement = match same {
            Some(value) => value,
            None => phi_value, // unreachable φ
        };
        if replacement == phi_value {
            return phi_value;
        }

        // Rewrite every use of the φ and neutralise it
        for instr in &mut self.func.instructions {
            for operand in &mut instr.operands {
                if *operand == phi_value {
                    *operand = replacement;
                }
            }
            for (_, operand) in &mut instr.phi_operands {
                if *operand == phi_value {
                    *operand = replacement;
                }
            }
        }
        self.func.instructions[instr_id].opcode = SsaOpcode::Nop;
        self.func.instructions[instr_id].result = None;
        self.func.instructions[instr_id].phi_operands.clear();

        // Redirect definitions that pointed at the φ
        for defs in self.current_def.values_mut() {
            for value in defs.values_mut() {
                if *value == phi_value {
                    *value = replacement;
                }
            }
        }
        replacement
    }

    fn seal_block(&mut self, block: BlockId) {
        if self.func.blocks[block].sealed {
            return;
        }
        self.func.blocks[block].sealed = true;
        if let Some(pending) = self.incomplete_phis.remove(&block) {
            for (name, instr_id) in pending {
                if let Some(phi_value) = self.func.instructions[instr_id].result {
                    let _ = self.add_phi_operands(&name, phi_value, block);
                }
            }
        }
    }

    // ------------------------------------------------------------------
    // AST lowering
    // ------------------------------------------------------------------

    fn lower_block(&mut self, statements: &[Statement]) -> Result<(), Unsupported> {
        for statement in statements {
            if self.terminated {
                break;
            }
            self.lower_statement(statement)?;
        }
        Ok(())
    }

    fn lower_statement(&mut self, statement: &Statement) -> Result<(), Unsupported> {
        match statement {
            Statement::VarDecl(decl) => {
                let value = match &decl.initializer {
                    Some(init) => self.lower_expr(init)?,
                    None => self.emit_value(SsaOpcode::ConstInt(0), vec![]),
                };
                let block = self.current;
                self.write_variable(&decl.name, block, value);
                Ok(())
            }
            Statement::Expression(stmt) => {
                self.lower_expr(&stmt.expression)?;
                Ok(())
            }
            Statement::Return(ret) => {
                let operands = match &ret.value {
                    Some(value) => vec![self.lower_expr(value)?],
                    None => vec![],
                };
                self.emit_effect(SsaOpcode::Return, operands);
                self.terminated = true;
                Ok(())
            }
            Statement::If(if_stmt) if if_stmt.elif_branches.is_empty() => {
                let cond = self.lower_expr(&if_stmt.condition)?;
                let then_block = self.func.new_block();
                let else_block = self.func.new_block();
                let join_block = self.func.new_block();
                self.emit_branch(cond, then_block, else_block);

                self.seal_block(then_block);
                self.current = then_block;
                self.terminated = false;
                self.lower_block(&if_stmt.then_branch)?;
                if !self.terminated {
                    self.emit_jump(join_block);
                }
                let then_terminated = self.terminated;

                self.seal_block(else_block);
                self.current = else_block;
                self.terminated = false;
                if let Some(branch) = &if_stmt.else_branch {
                    self.lower_block(branch)?;
                }
                if !self.terminated {
                    self.emit_jump(join_block);
                }
                let else_terminated = self.terminated;

                self.seal_block(join_block);
                self.current = join_block;
                self.terminated = then_terminated && else_terminated;
                Ok(())
            }
            Statement::While(while_stmt) => {
                let header = self.func.new_block();
                let body = self.func.new_block();
                let exit = self.func.new_block();

                self.emit_jump(header);
                // Header stays unsealed until the back-edge is known
                self.current = header;
                let cond = self.lower_expr(&while_stmt.condition)?;
                self.emit_branch(cond, body, exit);

                self.seal_block(body);
                self.current = body;
                self.terminated = false;
                self.lower_block(&while_stmt.body)?;
                if !self.terminated {
                    self.emit_jump(header);
                }
                self.seal_block(header);
                self.seal_block(exit);
                self.current = exit;
                self.terminated = false;
                Ok(())
            }
            Statement::Block(block) => self.lower_block(&block.statements),
            _ => Err(Unsupported),
        }
    }

    fn lower_expr(&mut self, expr: &Expression) -> Result<ValueId, Unsupported> {
        match expr {
            Expression::IntLiteral(v) => Ok(self.emit_value(SsaOpcode::ConstInt(v.value), vec![])),
            Expression::FloatLiteral(v) => {
                Ok(self.emit_value(SsaOpcode::ConstFloat(v.value), vec![]))
            }
            Expression::BoolLiteral(v) => {
                Ok(self.emit_value(SsaOpcode::ConstBool(v.value), vec![]))
            }
            Expression::StringLiteral(v) => {
                let index = self.module.intern_string(&v.value);
                Ok(self.emit_value(SsaOpcode::ConstStr(index), vec![]))
            }
            Expression::Identifier(id) => {
                let block = self.current;
                self.read_variable(&id.name, block)
            }
            Expression::Unary(unary) => {
                let operand = self.lower_expr(&unary.operand)?;
                let opcode = match unary.op {
                    UnOp::Neg => SsaOpcode::Neg,
                    UnOp::Not => SsaOpcode::Not,
                    UnOp::BitNot => return Err(Unsupported),
                };
                Ok(self.emit_value(opcode, vec![operand]))
            }
            Expression::Binary(binary) => {
                let left = self.lower_expr(&binary.left)?;
                let right = self.lower_expr(&binary.right)?;
                let opcode = match binary.op {
                    BinOp::Add => SsaOpcode::Add,
                    BinOp::Sub => SsaOpcode::Sub,
                    BinOp::Mul => SsaOpcode::Mul,
                    BinOp::Div => SsaOpcode::Div,
                    BinOp::Mod => SsaOpcode::Mod,
                    BinOp::Eq => SsaOpcode::Eq,
                    BinOp::Ne => SsaOpcode::Ne,
                    BinOp::Lt => SsaOpcode::Lt,
                    BinOp::Le => SsaOpcode::Le,
                    BinOp::Gt => SsaOpcode::Gt,
                    BinOp::Ge => SsaOpcode::Ge,
                    _ => return Err(Unsupported),
                };
                Ok(self.emit_value(opcode, vec![left, right]))
            }
            Expression::Assign(assign) => {
                let name = assign
                    .target
                    .as_identifier()
                    .ok_or(Unsupported)?
                    .to_string();
                let value = match assign.op {
                    AssignOp::Assign => self.lower_expr(&assign.value)?,
                    compound => {
                        let block = self.current;
                        let current = self.read_variable(&name, block)?;
                        let rhs = self.lower_expr(&assign.value)?;
                        let opcode = match compound {
                            AssignOp::Add => SsaOpcode::Add,
                            AssignOp::Sub => SsaOpcode::Sub,
                            AssignOp::Mul => SsaOpcode::Mul,
                            AssignOp::Div => SsaOpcode::Div,
                            AssignOp::Mod => SsaOpcode::Mod,
                            AssignOp::Assign => unreachable!(),
                        };
                        self.emit_value(opcode, vec![current, rhs])
                    }
                };
                let block = self.current;
                self.write_variable(&name, block, value);
                Ok(value)
            }
            Expression::Call(call) => {
                let name = call
                    .callee
                    .as_identifier()
                    .ok_or(Unsupported)?
                    .to_string();
                let mut operands = Vec::with_capacity(call.args.len());
                for arg in &call.args {
                    operands.push(self.lower_expr(arg)?);
                }
                Ok(self.emit_value(SsaOpcode::Call(name), operands))
            }
            _ => Err(Unsupported),
        }
    }
}

// ============================================================================
// SSA-level optimizations
// ============================================================================

pub struct SsaOptimizer;

impl SsaOptimizer {
    pub fn optimize(func: &mut SsaFunction) {
        Self::constant_propagation(func);
        Self::copy_propagation(func);
        Self::local_cse(func);
        Self::dead_code(func);
    }

    fn constant_of(func: &SsaFunction, value: ValueId) -> Option<i64> {
        func.instructions
            .iter()
            .find(|i| i.result == Some(value))
            .and_then(|i| match i.opcode {
                SsaOpcode::ConstInt(v) => Some(v),
                _ => None,
            })
    }

    fn constant_propagation(func: &mut SsaFunction) {
        for index in 0..func.instructions.len() {
            let instr = &func.instructions[index];
            let folded = match instr.opcode {
                SsaOpcode::Add | SsaOpcode::Sub | SsaOpcode::Mul => {
                    if instr.operands.len() == 2 {
                        let a = Self::constant_of(func, instr.operands[0]);
                        let b = Self::constant_of(func, instr.operands[1]);
                        match (a, b, &instr.opcode) {
                            (Some(a), Some(b), SsaOpcode::Add) => Some(a.wrapping_add(b)),
                            (Some(a), Some(b), SsaOpcode::Sub) => Some(a.wrapping_sub(b)),
                            (Some(a), Some(b), SsaOpcode::Mul) => Some(a.wrapping_mul(b)),
                            _ => None,
                        }
                    } else {
                        None
                    }
                }
                _ => None,
            };
            if let Some(value) = folded {
                let instr = &mut func.instructions[index];
                instr.opcode = SsaOpcode::ConstInt(value);
                instr.operands.clear();
            }
        }
    }

    fn copy_propagation(func: &mut SsaFunction) {
        let copies: FxHashMap<ValueId, ValueId> = func
            .instructions
            .iter()
            .filter(|i| i.opcode == SsaOpcode::Copy && i.operands.len() == 1)
            .filter_map(|i| i.result.map(|r| (r, i.operands[0])))
            .collect();
        if copies.is_empty() {
            return;
        }
        for instr in &mut func.instructions {
            for operand in &mut instr.operands {
                while let Some(source) = copies.get(operand) {
                    *operand = *source;
                }
            }
        }
    }

    fn local_cse(func: &mut SsaFunction) {
        for block in 0..func.blocks.len() {
            let mut available: FxHashMap<(String, Vec<ValueId>), ValueId> = FxHashMap::default();
            let mut replacements: FxHashMap<ValueId, ValueId> = FxHashMap::default();
            for &instr_id in &func.blocks[block].instructions {
                let instr = &func.instructions[instr_id];
                let commutative = matches!(instr.opcode, SsaOpcode::Add | SsaOpcode::Mul);
                let pure_binop = matches!(
                    instr.opcode,
                    SsaOpcode::Add
                        | SsaOpcode::Sub
                        | SsaOpcode::Mul
                        | SsaOpcode::Eq
                        | SsaOpcode::Ne
                        | SsaOpcode::Lt
                        | SsaOpcode::Le
                        | SsaOpcode::Gt
                        | SsaOpcode::Ge
                );
                if !pure_binop {
                    continue;
                }
                let mut operands = instr.operands.clone();
                if commutative {
                    operands.sort_unstable();
                }
                let key = (format!("{:?}", instr.opcode), operands);
                match (available.get(&key), instr.result) {
                    (Some(&existing), Some(result)) => {
                        replacements.insert(result, existing);
                    }
                    (None, Some(result)) => {
                        available.insert(key, result);
                    }
                    _ => {}
                }
            }
            if replacements.is_empty() {
                continue;
            }
            for instr in &mut func.instructions {
                for operand in &mut instr.operands {
                    if let Some(&replacement) = replacements.get(operand) {
                        *operand = replacement;
                    }
                }
            }
        }
    }

    fn dead_code(func: &mut SsaFunction) {
        loop {
            let mut used: rustc_hash::FxHashSet<ValueId> = rustc_hash::FxHashSet::default();
            for instr in &func.instructions {
                for &operand in &instr.operands {
                    used.insert(operand);
                }
                for &(_, operand) in &instr.phi_operands {
                    used.insert(operand);
                }
            }
            let mut changed = false;
            for instr in &mut func.instructions {
                if instr.opcode.has_side_effects() || instr.opcode == SsaOpcode::Nop {
                    continue;
                }
                if let Some(result) = instr.result {
                    if !used.contains(&result) {
                        instr.opcode = SsaOpcode::Nop;
                        instr.result = None;
                        instr.operands.clear();
                        instr.phi_operands.clear();
                        changed = true;
                    }
                }
            }
            if !changed {
                break;
            }
        }
    }
}

/// The O3 driver pass: build SSA for every eligible function, run the
/// SSA-level optimizations, and report how many functions were lowered.
#[derive(Debug, Default)]
pub struct SsaPass {
    transformations: usize,
}

impl SsaPass {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the SSA module without running the pass (tests, debugging).
    pub fn build_module(program: &Program) -> SsaModule {
        let mut module = SsaModule::default();
        let mut built = Vec::new();
        for statement in &program.statements {
            if let Statement::Fn(decl) = statement {
                if let Some(func) = SsaBuilder::new(&mut module).build(decl) {
                    built.push(func);
                }
            }
        }
        module.functions = built;
        module
    }
}

impl OptimizationPass for SsaPass {
    fn name(&self) -> &'static str {
        "SSA"
    }

    fn run(&mut self, program: &mut Program) -> usize {
        let mut module = Self::build_module(program);
        for func in &mut module.functions {
            SsaOptimizer::optimize(func);
        }
        self.transformations = module.functions.len();
        self.transformations
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::Parser;

    fn build(source: &str) -> SsaModule {
        let program = Parser::parse_source(source, "t.tyl").unwrap();
        SsaPass::build_module(&program)
    }

    #[test]
    fn straight_line_code_has_no_phis() {
        let module = build(
            "fn f(a: int) -> int:\n    let b = a + 1\n    let c = b * 2\n    return c\n",
        );
        assert_eq!(module.functions.len(), 1);
        assert_eq!(module.functions[0].phi_count(), 0);
    }

    #[test]
    fn diamond_merge_needs_a_phi() {
        let module = build(
            "fn f(a: int) -> int:\n    mut x = 0\n    if a > 0:\n        x = 1\n    else:\n        x = 2\n    return x\n",
        );
        assert_eq!(module.functions.len(), 1);
        assert!(module.functions[0].phi_count() >= 1);
    }

    #[test]
    fn same_value_on_both_arms_is_trivial() {
        let module = build(
            "fn f(a: int) -> int:\n    mut x = 5\n    if a > 0:\n        let y = 1\n    else:\n        let z = 2\n    return x\n",
        );
        // x is 5 on both paths: any φ for it must have been removed
        assert_eq!(module.functions[0].phi_count(), 0);
    }

    #[test]
    fn loop_back_edge_phi() {
        let module = build(
            "fn f(n: int) -> int:\n    mut i = 0\n    while i < n:\n        i = i + 1\n    return i\n",
        );
        assert!(module.functions[0].phi_count() >= 1);
    }

    #[test]
    fn string_literals_populate_the_pool() {
        let module = build(
            "fn f() -> str:\n    let a = \"one\"\n    let b = \"two\"\n    return a\n",
        );
        assert_eq!(module.string_pool.len(), 2);
    }

    #[test]
    fn unsupported_functions_are_skipped() {
        let module = build("fn f(c: chan[int]) -> int:\n    return <- c\n");
        assert!(module.functions.is_empty());
    }

    #[test]
    fn ssa_dce_removes_unused_values() {
        let program = Parser::parse_source(
            "fn f(a: int) -> int:\n    let unused = a * 100\n    return a\n",
            "t.tyl",
        )
        .unwrap();
        let mut module = SsaPass::build_module(&program);
        SsaOptimizer::optimize(&mut module.functions[0]);
        let live_muls = module.functions[0]
            .instructions
            .iter()
            .filter(|i| i.opcode == SsaOpcode::Mul)
            .count();
        assert_eq!(live_muls, 0);
    }
}
