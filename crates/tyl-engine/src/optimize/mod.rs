//! The optimizer pipeline.
//!
//! Every pass implements [`OptimizationPass`]: it mutates the AST in
//! place and reports how many transformations it performed. The
//! [`Optimizer`] driver runs passes in a fixed phase order; the folding/
//! propagation/DCE phase iterates to a fixed point with a per-level
//! iteration cap.

pub mod algebraic;
pub mod constant_fold;
pub mod cse;
pub mod ctfe;
pub mod dead_code;
pub mod inline;
pub mod loops;
pub mod pgo;
pub mod propagate;
pub mod schedule;
pub mod ssa;
pub mod strength;
pub mod tailcall;

use crate::parser::ast::{Expression, InterpPart, Program, Statement};

/// Optimization levels accepted by the driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OptLevel {
    O0,
    O1,
    #[default]
    O2,
    O3,
    Os,
    Oz,
    Ofast,
}

impl OptLevel {
    pub fn folding(&self) -> bool {
        !matches!(self, OptLevel::O0)
    }

    pub fn dead_code(&self) -> bool {
        !matches!(self, OptLevel::O0)
    }

    pub fn inlining(&self) -> bool {
        matches!(
            self,
            OptLevel::O2 | OptLevel::O3 | OptLevel::Os | OptLevel::Ofast
        )
    }

    pub fn tail_calls(&self) -> bool {
        !matches!(self, OptLevel::O0 | OptLevel::O1)
    }

    pub fn ctfe(&self) -> bool {
        !matches!(self, OptLevel::O0 | OptLevel::O1)
    }

    pub fn loops(&self) -> bool {
        matches!(self, OptLevel::O2 | OptLevel::O3 | OptLevel::Ofast)
    }

    pub fn advanced(&self) -> bool {
        matches!(self, OptLevel::O3 | OptLevel::Ofast)
    }

    pub fn pgo(&self) -> bool {
        matches!(self, OptLevel::Ofast)
    }

    /// Cap for the fold/propagate/DCE fixed-point phase.
    pub fn max_fixpoint_iterations(&self) -> usize {
        if self.advanced() {
            5
        } else {
            3
        }
    }

    /// (max statements to inline, max inline count per callee)
    pub fn inline_limits(&self) -> (usize, usize) {
        match self {
            OptLevel::O3 => (50, 20),
            OptLevel::Ofast => (100, 50),
            OptLevel::Os => (5, 3),
            OptLevel::Oz => (0, 0),
            _ => (10, 5),
        }
    }
}

/// An AST-to-AST optimization pass.
pub trait OptimizationPass {
    fn name(&self) -> &'static str;
    /// Run over the whole program, returning the transformation count.
    fn run(&mut self, program: &mut Program) -> usize;
}

/// The ordered pipeline driver.
#[derive(Debug, Default)]
pub struct Optimizer {
    level: OptLevel,
    profile_path: Option<String>,
    total: usize,
    /// (pass label, transformation count) per executed pass, for
    /// `--verbose` reporting.
    log: Vec<(String, usize)>,
}

impl Optimizer {
    pub fn new(level: OptLevel) -> Self {
        Self {
            level,
            ..Self::default()
        }
    }

    pub fn with_profile(mut self, path: impl Into<String>) -> Self {
        self.profile_path = Some(path.into());
        self
    }

    pub fn total_transformations(&self) -> usize {
        self.total
    }

    pub fn pass_log(&self) -> &[(String, usize)] {
        &self.log
    }

    fn run_pass(&mut self, label: &str, pass: &mut dyn OptimizationPass, program: &mut Program) {
        let count = pass.run(program);
        self.total += count;
        if count > 0 {
            self.log.push((label.to_string(), count));
        }
    }

    pub fn optimize(&mut self, program: &mut Program) {
        if self.level == OptLevel::O0 {
            return;
        }
        self.total = 0;
        self.log.clear();

        // Phase 0: profile-guided decisions, when a profile is present
        if self.level.pgo() {
            if let Some(path) = self.profile_path.clone() {
                let mut pass = pgo::PgoPass::from_file(&path);
                self.run_pass("ProfileGuidedOptimization", &mut pass, program);
            }
        }

        // Phase 1: pre-loop clean-up
        if self.level.advanced() {
            self.run_pass(
                "AlgebraicSimplification",
                &mut algebraic::AlgebraicSimplificationPass::new(),
                program,
            );
        }
        if self.level.folding() {
            self.run_pass(
                "ConstantFolding (phase 1)",
                &mut constant_fold::ConstantFoldingPass::new(),
                program,
            );
        }
        if self.level.ctfe() {
            self.run_pass("CTFE", &mut ctfe::CtfePass::new(), program);
        }

        // Phase 2: loop optimizations
        if self.level.loops() {
            self.run_pass(
                "LoopOptimization",
                &mut loops::LoopOptimizationPass::new(),
                program,
            );
        }

        // Phase 3: fold/propagate/DCE to a fixed point. This is what
        // collapses unrolled loop bodies into constants.
        for iteration in 1..=self.level.max_fixpoint_iterations() {
            let mut iter_count = 0usize;
            if self.level.folding() {
                let mut pass = constant_fold::ConstantFoldingPass::new();
                let n = pass.run(program);
                iter_count += n;
                self.total += n;
                if n > 0 {
                    self.log
                        .push((format!("ConstantFolding (iter {})", iteration), n));
                }

                let mut pass = propagate::ConstantPropagationPass::new();
                let n = pass.run(program);
                iter_count += n;
                self.total += n;
                if n > 0 {
                    self.log
                        .push((format!("ConstantPropagation (iter {})", iteration), n));
                }
            }
            if self.level.dead_code() {
                let mut pass = dead_code::DeadCodeEliminationPass::new();
                let n = pass.run(program);
                iter_count += n;
                self.total += n;
                if n > 0 {
                    self.log
                        .push((format!("DeadCodeElimination (iter {})", iteration), n));
                }
            }
            if iter_count == 0 {
                break;
            }
        }

        // Phase 4: function-level optimizations
        if self.level.inlining() {
            let (max_statements, max_calls) = self.level.inline_limits();
            let mut pass = inline::InliningPass::new(max_statements, max_calls);
            self.run_pass("Inlining", &mut pass, program);
        }
        if self.level.tail_calls() {
            self.run_pass(
                "TailCallOptimization",
                &mut tailcall::TailCallPass::new(),
                program,
            );
        }

        // Phase 5: advanced passes (O3 / Ofast)
        if self.level.advanced() {
            self.run_pass(
                "AdvancedStrengthReduction",
                &mut strength::StrengthReductionPass::new(),
                program,
            );
            self.run_pass(
                "ConstantFolding (post-strength)",
                &mut constant_fold::ConstantFoldingPass::new(),
                program,
            );
            self.run_pass("CSE", &mut cse::CsePass::new(), program);
        }

        // Phase 6: final clean-up
        if self.level.folding() {
            self.run_pass(
                "ConstantFolding (final)",
                &mut constant_fold::ConstantFoldingPass::new(),
                program,
            );
        }
        if self.level.dead_code() {
            self.run_pass(
                "DeadCodeElimination (final)",
                &mut dead_code::DeadCodeEliminationPass::new(),
                program,
            );
        }

        // Phase 7: SSA verification and statement scheduling (O3 / Ofast)
        if self.level.advanced() {
            self.run_pass("SSA", &mut ssa::SsaPass::new(), program);
            self.run_pass(
                "InstructionScheduler",
                &mut schedule::InstructionSchedulerPass::new(),
                program,
            );
        }
    }
}

// ============================================================================
// Shared traversal helpers
// ============================================================================

/// Apply `f` to every statement list in the program (function bodies,
/// branches, loop bodies, nested blocks), innermost first.
pub(crate) fn for_each_block(program: &mut Program, f: &mut impl FnMut(&mut Vec<Statement>)) {
    visit_block(&mut program.statements, f);
}

pub(crate) fn visit_block(statements: &mut Vec<Statement>, f: &mut impl FnMut(&mut Vec<Statement>)) {
    for statement in statements.iter_mut() {
        visit_stmt_blocks(statement, f);
    }
    f(statements);
}

fn visit_stmt_blocks(statement: &mut Statement, f: &mut impl FnMut(&mut Vec<Statement>)) {
    match statement {
        Statement::Block(b) => visit_block(&mut b.statements, f),
        Statement::If(s) => {
            visit_block(&mut s.then_branch, f);
            for (_, branch) in &mut s.elif_branches {
                visit_block(branch, f);
            }
            if let Some(branch) = &mut s.else_branch {
                visit_block(branch, f);
            }
        }
        Statement::IfLet(s) => {
            visit_block(&mut s.then_branch, f);
            if let Some(branch) = &mut s.else_branch {
                visit_block(branch, f);
            }
        }
        Statement::Unless(s) => visit_block(&mut s.body, f),
        Statement::While(s) => visit_block(&mut s.body, f),
        Statement::For(s) => visit_block(&mut s.body, f),
        Statement::Loop(s) => visit_block(&mut s.body, f),
        Statement::Match(s) => {
            for arm in &mut s.arms {
                visit_block(&mut arm.body, f);
            }
        }
        Statement::Lock(s) => visit_block(&mut s.body, f),
        Statement::With(s) => visit_block(&mut s.body, f),
        Statement::Scope(s) => visit_block(&mut s.body, f),
        Statement::Handle(s) => {
            for arm in &mut s.handlers {
                visit_block(&mut arm.body, f);
            }
            visit_block(&mut s.body, f);
        }
        Statement::Unsafe(s) => visit_block(&mut s.body, f),
        Statement::ComptimeBlock(s) => visit_block(&mut s.body, f),
        Statement::Fn(decl) => {
            if let Some(body) = &mut decl.body {
                visit_block(body, f);
            }
        }
        Statement::Impl(decl) => {
            for method in &mut decl.methods {
                if let Some(body) = &mut method.body {
                    visit_block(body, f);
                }
            }
        }
        Statement::Module(decl) => visit_block(&mut decl.body, f),
        _ => {}
    }
}

/// Apply `f` to every expression in a statement, post-order (children
/// before parents), allowing in-place replacement.
pub(crate) fn visit_stmt_exprs(statement: &mut Statement, f: &mut impl FnMut(&mut Expression)) {
    match statement {
        Statement::Expression(s) => visit_expr(&mut s.expression, f),
        Statement::VarDecl(s) => {
            if let Some(init) = &mut s.initializer {
                visit_expr(init, f);
            }
        }
        Statement::MultiVarDecl(s) => visit_expr(&mut s.initializer, f),
        Statement::Destructuring(s) => visit_expr(&mut s.initializer, f),
        Statement::If(s) => {
            visit_expr(&mut s.condition, f);
            for statement in &mut s.then_branch {
                visit_stmt_exprs(statement, f);
            }
            for (cond, branch) in &mut s.elif_branches {
                visit_expr(cond, f);
                for statement in branch {
                    visit_stmt_exprs(statement, f);
                }
            }
            if let Some(branch) = &mut s.else_branch {
                for statement in branch {
                    visit_stmt_exprs(statement, f);
                }
            }
        }
        Statement::IfLet(s) => {
            visit_expr(&mut s.value, f);
            for statement in &mut s.then_branch {
                visit_stmt_exprs(statement, f);
            }
            if let Some(branch) = &mut s.else_branch {
                for statement in branch {
                    visit_stmt_exprs(statement, f);
                }
            }
        }
        Statement::Unless(s) => {
            visit_expr(&mut s.condition, f);
            for statement in &mut s.body {
                visit_stmt_exprs(statement, f);
            }
        }
        Statement::While(s) => {
            visit_expr(&mut s.condition, f);
            for statement in &mut s.body {
                visit_stmt_exprs(statement, f);
            }
        }
        Statement::For(s) => {
            visit_expr(&mut s.iterable, f);
            for statement in &mut s.body {
                visit_stmt_exprs(statement, f);
            }
        }
        Statement::Loop(s) => {
            for statement in &mut s.body {
                visit_stmt_exprs(statement, f);
            }
        }
        Statement::Match(s) => {
            visit_expr(&mut s.scrutinee, f);
            for arm in &mut s.arms {
                if let Some(guard) = &mut arm.guard {
                    visit_expr(guard, f);
                }
                for statement in &mut arm.body {
                    visit_stmt_exprs(statement, f);
                }
            }
        }
        Statement::Return(s) => {
            if let Some(value) = &mut s.value {
                visit_expr(value, f);
            }
        }
        Statement::Delete(s) => visit_expr(&mut s.target, f),
        Statement::Lock(s) => {
            visit_expr(&mut s.mutex, f);
            for statement in &mut s.body {
                visit_stmt_exprs(statement, f);
            }
        }
        Statement::With(s) => {
            visit_expr(&mut s.acquire, f);
            for statement in &mut s.body {
                visit_stmt_exprs(statement, f);
            }
        }
        Statement::Scope(s) => {
            if let Some(timeout) = &mut s.timeout {
                visit_expr(timeout, f);
            }
            for statement in &mut s.body {
                visit_stmt_exprs(statement, f);
            }
        }
        Statement::Require(s) => visit_expr(&mut s.condition, f),
        Statement::Ensure(s) => visit_expr(&mut s.condition, f),
        Statement::ComptimeAssert(s) => visit_expr(&mut s.condition, f),
        Statement::Handle(s) => {
            for arm in &mut s.handlers {
                for statement in &mut arm.body {
                    visit_stmt_exprs(statement, f);
                }
            }
            for statement in &mut s.body {
                visit_stmt_exprs(statement, f);
            }
        }
        Statement::Block(s) => {
            for statement in &mut s.statements {
                visit_stmt_exprs(statement, f);
            }
        }
        Statement::Unsafe(s) => {
            for statement in &mut s.body {
                visit_stmt_exprs(statement, f);
            }
        }
        Statement::ComptimeBlock(s) => {
            for statement in &mut s.body {
                visit_stmt_exprs(statement, f);
            }
        }
        Statement::Fn(decl) => {
            if let Some(body) = &mut decl.body {
                for statement in body {
                    visit_stmt_exprs(statement, f);
                }
            }
        }
        Statement::Impl(decl) => {
            for method in &mut decl.methods {
                if let Some(body) = &mut method.body {
                    for statement in body {
                        visit_stmt_exprs(statement, f);
                    }
                }
            }
        }
        Statement::Module(decl) => {
            for statement in &mut decl.body {
                visit_stmt_exprs(statement, f);
            }
        }
        _ => {}
    }
}

/// Post-order expression visitor with in-place replacement.
pub(crate) fn visit_expr(expr: &mut Expression, f: &mut impl FnMut(&mut Expression)) {
    match expr {
        Expression::Binary(b) => {
            visit_expr(&mut b.left, f);
            visit_expr(&mut b.right, f);
        }
        Expression::Unary(u) => visit_expr(&mut u.operand, f),
        Expression::Ternary(t) => {
            visit_expr(&mut t.condition, f);
            visit_expr(&mut t.then_expr, f);
            visit_expr(&mut t.else_expr, f);
        }
        Expression::Assign(a) => {
            visit_expr(&mut a.target, f);
            visit_expr(&mut a.value, f);
        }
        Expression::Call(c) => {
            visit_expr(&mut c.callee, f);
            for arg in &mut c.args {
                visit_expr(arg, f);
            }
            for (_, arg) in &mut c.named_args {
                visit_expr(arg, f);
            }
        }
        Expression::Member(m) => visit_expr(&mut m.object, f),
        Expression::Index(i) => {
            visit_expr(&mut i.object, f);
            visit_expr(&mut i.index, f);
        }
        Expression::Range(r) => {
            visit_expr(&mut r.start, f);
            visit_expr(&mut r.end, f);
        }
        Expression::List(l) => {
            for element in &mut l.elements {
                visit_expr(element, f);
            }
        }
        Expression::RecordInit(r) => {
            for (_, value) in &mut r.fields {
                visit_expr(value, f);
            }
        }
        Expression::MapLiteral(m) => {
            for (key, value) in &mut m.entries {
                visit_expr(key, f);
                visit_expr(value, f);
            }
        }
        Expression::Lambda(l) => visit_expr(&mut l.body, f),
        Expression::ListComprehension(c) => {
            visit_expr(&mut c.element, f);
            visit_expr(&mut c.iterable, f);
            if let Some(cond) = &mut c.condition {
                visit_expr(cond, f);
            }
        }
        Expression::AddressOf(a) => visit_expr(&mut a.operand, f),
        Expression::Borrow(b) => visit_expr(&mut b.operand, f),
        Expression::Deref(d) => visit_expr(&mut d.operand, f),
        Expression::Cast(c) => visit_expr(&mut c.expr, f),
        Expression::New(n) => {
            for arg in &mut n.args {
                visit_expr(arg, f);
            }
        }
        Expression::Propagate(p) => visit_expr(&mut p.operand, f),
        Expression::TypeCheck(t) => visit_expr(&mut t.expr, f),
        Expression::ChanSend(c) => {
            visit_expr(&mut c.channel, f);
            visit_expr(&mut c.value, f);
        }
        Expression::ChanRecv(c) => visit_expr(&mut c.channel, f),
        Expression::Await(a) => visit_expr(&mut a.operand, f),
        Expression::Spawn(s) => visit_expr(&mut s.operand, f),
        Expression::MakeChannel(c) => {
            if let Some(capacity) = &mut c.capacity {
                visit_expr(capacity, f);
            }
        }
        Expression::MakeSync(s) => {
            for arg in &mut s.args {
                visit_expr(arg, f);
            }
        }
        Expression::MakeAtomic(a) => visit_expr(&mut a.initial, f),
        Expression::MakeSmartPtr(p) => visit_expr(&mut p.value, f),
        Expression::Perform(p) => {
            for arg in &mut p.args {
                visit_expr(arg, f);
            }
        }
        Expression::Resume(r) => {
            if let Some(value) = &mut r.value {
                visit_expr(value, f);
            }
        }
        Expression::Interpolated(s) => {
            for part in &mut s.parts {
                if let InterpPart::Expr(e) = part {
                    visit_expr(e, f);
                }
            }
        }
        _ => {}
    }
    f(expr);
}

/// Collect the identifier names read by an expression.
pub(crate) fn collect_reads(expr: &Expression, reads: &mut rustc_hash::FxHashSet<String>) {
    let mut clone = expr.clone();
    visit_expr(&mut clone, &mut |e| {
        if let Expression::Identifier(id) = e {
            reads.insert(id.name.clone());
        }
    });
}

/// Whether evaluating the expression could have observable side effects.
pub(crate) fn has_side_effects(expr: &Expression) -> bool {
    match expr {
        Expression::Call(_)
        | Expression::Assign(_)
        | Expression::ChanSend(_)
        | Expression::ChanRecv(_)
        | Expression::Await(_)
        | Expression::Spawn(_)
        | Expression::Perform(_)
        | Expression::Resume(_)
        | Expression::New(_)
        | Expression::Propagate(_)
        | Expression::MakeSync(_)
        | Expression::MakeChannel(_)
        | Expression::MakeAtomic(_)
        | Expression::MakeSmartPtr(_)
        | Expression::Deref(_) => true,
        Expression::Binary(b) => has_side_effects(&b.left) || has_side_effects(&b.right),
        Expression::Unary(u) => has_side_effects(&u.operand),
        Expression::Ternary(t) => {
            has_side_effects(&t.condition)
                || has_side_effects(&t.then_expr)
                || has_side_effects(&t.else_expr)
        }
        Expression::Member(m) => has_side_effects(&m.object),
        Expression::Index(i) => has_side_effects(&i.object) || has_side_effects(&i.index),
        Expression::List(l) => l.elements.iter().any(has_side_effects),
        Expression::Range(r) => has_side_effects(&r.start) || has_side_effects(&r.end),
        Expression::Cast(c) => has_side_effects(&c.expr),
        Expression::Interpolated(s) => s.parts.iter().any(|p| match p {
            InterpPart::Expr(e) => has_side_effects(e),
            InterpPart::Text(_) => false,
        }),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::Parser;

    #[test]
    fn opt_level_tables() {
        assert!(!OptLevel::O0.folding());
        assert!(OptLevel::O1.folding());
        assert!(!OptLevel::O1.inlining());
        assert!(OptLevel::O2.ctfe());
        assert!(!OptLevel::Oz.loops());
        assert!(OptLevel::Ofast.pgo());
        assert_eq!(OptLevel::O2.max_fixpoint_iterations(), 3);
        assert_eq!(OptLevel::O3.max_fixpoint_iterations(), 5);
        assert_eq!(OptLevel::Oz.inline_limits(), (0, 0));
    }

    #[test]
    fn optimizer_collapses_s1() {
        let mut program =
            Parser::parse_source("fn main() -> int:\n    return 2 + 3 * 4\n", "t.tyl").unwrap();
        let mut optimizer = Optimizer::new(OptLevel::O1);
        optimizer.optimize(&mut program);
        let f = program.find_function("main").unwrap();
        let body = f.body.as_ref().unwrap();
        assert!(matches!(
            &body[0],
            Statement::Return(r) if r.value.as_ref().and_then(|v| v.as_int()) == Some(14)
        ));
        assert!(optimizer.total_transformations() > 0);
    }

    #[test]
    fn side_effect_detection() {
        let program = Parser::parse_source("let a = f(x)\nlet b = 1 + 2\n", "t.tyl").unwrap();
        let init = |i: usize| match &program.statements[i] {
            Statement::VarDecl(v) => v.initializer.clone().unwrap(),
            _ => panic!(),
        };
        assert!(has_side_effects(&init(0)));
        assert!(!has_side_effects(&init(1)));
    }
}
