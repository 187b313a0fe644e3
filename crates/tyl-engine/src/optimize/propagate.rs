//! Constant propagation, accumulator recognition, dead-store elimination
//! and branch elimination.
//!
//! Known values are tracked for immutables and for thin single-assignment
//! windows of mutables; any assignment to a mutable invalidates its
//! entry. The accumulator pre-pass is what collapses unrolled counting
//! loops into a single constant declaration.

use super::constant_fold::fold_expression;
use super::{collect_reads, for_each_block, has_side_effects, visit_expr, visit_stmt_exprs, OptimizationPass};
use crate::parser::ast::*;
use rustc_hash::{FxHashMap, FxHashSet};

#[derive(Debug, Default)]
pub struct ConstantPropagationPass {
    transformations: usize,
}

impl ConstantPropagationPass {
    pub fn new() -> Self {
        Self::default()
    }
}

impl OptimizationPass for ConstantPropagationPass {
    fn name(&self) -> &'static str {
        "ConstantPropagation"
    }

    fn run(&mut self, program: &mut Program) -> usize {
        let mut count = 0usize;

        // Program-level constants flow into every function body
        let globals = collect_global_consts(program);
        if !globals.is_empty() {
            for statement in &mut program.statements {
                count += substitute_in_statement(statement, &globals);
            }
        }

        for_each_block(program, &mut |statements| {
            count += optimize_accumulators(statements);
            count += propagate_block(statements);
            count += eliminate_dead_stores(statements);
        });

        self.transformations = count;
        count
    }
}

/// `const NAME :: literal` at the top level.
fn collect_global_consts(program: &Program) -> FxHashMap<String, Expression> {
    let mut consts = FxHashMap::default();
    for statement in &program.statements {
        if let Statement::VarDecl(decl) = statement {
            if decl.is_const {
                if let Some(init) = &decl.initializer {
                    if init.is_literal() {
                        consts.insert(decl.name.clone(), init.clone());
                    }
                }
            }
        }
    }
    consts
}

fn substitute_in_statement(
    statement: &mut Statement,
    values: &FxHashMap<String, Expression>,
) -> usize {
    // The defining declarations themselves keep their initializer
    if let Statement::VarDecl(decl) = statement {
        if decl.is_const {
            return 0;
        }
    }
    let mut count = 0usize;
    visit_stmt_exprs(statement, &mut |expr| {
        if let Expression::Identifier(id) = expr {
            if let Some(value) = values.get(&id.name) {
                let span = id.span;
                let mut replacement = value.clone();
                relocate(&mut replacement, span);
                *expr = replacement;
                count += 1;
            }
        }
    });
    count
}

fn substitute_in_expr(expr: &mut Expression, values: &FxHashMap<String, Expression>) -> usize {
    let mut count = 0usize;
    visit_expr(expr, &mut |e| {
        if let Expression::Identifier(id) = e {
            if let Some(value) = values.get(&id.name) {
                let span = id.span;
                let mut replacement = value.clone();
                relocate(&mut replacement, span);
                *e = replacement;
                count += 1;
            }
        }
    });
    count
}

fn relocate(expr: &mut Expression, span: crate::parser::token::Span) {
    match expr {
        Expression::IntLiteral(l) => l.span = span,
        Expression::FloatLiteral(l) => l.span = span,
        Expression::BoolLiteral(l) => l.span = span,
        Expression::StringLiteral(l) => l.span = span,
        _ => {}
    }
}

/// Linear propagation over one flat statement list, including branch
/// elimination for conditions that become literal.
fn propagate_block(statements: &mut Vec<Statement>) -> usize {
    let mut count = 0usize;
    let mut known: FxHashMap<String, Expression> = FxHashMap::default();
    let mut result: Vec<Statement> = Vec::with_capacity(statements.len());

    for mut statement in std::mem::take(statements) {
        if let Statement::VarDecl(decl) = &mut statement {
            if let Some(init) = &mut decl.initializer {
                count += substitute_in_expr(init, &known);
                fold_expression(init);
                if init.is_literal() {
                    // Immutables are sticky; mutables hold a thin window
                    // until the next write
                    known.insert(decl.name.clone(), init.clone());
                } else {
                    known.remove(&decl.name);
                }
            } else {
                known.remove(&decl.name);
            }
            result.push(statement);
            continue;
        }

        if let Statement::Expression(stmt) = &mut statement {
            if let Expression::Assign(assign) = &mut stmt.expression {
                count += substitute_in_expr(&mut assign.value, &known);
                fold_expression(&mut assign.value);
                if let Some(name) = assign.target.as_identifier() {
                    if assign.op == AssignOp::Assign && assign.value.is_literal() {
                        known.insert(name.to_string(), (*assign.value).clone());
                    } else {
                        known.remove(name);
                    }
                }
            } else {
                count += substitute_in_expr(&mut stmt.expression, &known);
            }
            result.push(statement);
            continue;
        }

        if let Statement::Return(ret) = &mut statement {
            if let Some(value) = &mut ret.value {
                count += substitute_in_expr(value, &known);
                fold_expression(value);
            }
            result.push(statement);
            continue;
        }

        if matches!(statement, Statement::If(_)) {
            if let Statement::If(if_stmt) = &mut statement {
                count += substitute_in_expr(&mut if_stmt.condition, &known);
                fold_expression(&mut if_stmt.condition);
            }
            match eliminate_if(statement) {
                IfOutcome::Replaced(spliced) => {
                    count += 1;
                    for inner in &spliced {
                        invalidate_writes(inner, &mut known);
                    }
                    result.extend(spliced);
                }
                IfOutcome::Kept(kept) => {
                    invalidate_writes(&kept, &mut known);
                    result.push(kept);
                }
            }
            continue;
        }

        // Loops and anything else may rebind whatever they write
        invalidate_writes(&statement, &mut known);
        result.push(statement);
    }

    *statements = result;
    count
}

enum IfOutcome {
    Replaced(Vec<Statement>),
    Kept(Statement),
}

/// When an `if` condition is literally true/false, splice the selected
/// branch into the parent. `elif` chains shift up when the head is
/// eliminated.
fn eliminate_if(statement: Statement) -> IfOutcome {
    let Statement::If(mut if_stmt) = statement else {
        return IfOutcome::Kept(statement);
    };

    match &if_stmt.condition {
        Expression::BoolLiteral(lit) if lit.value => IfOutcome::Replaced(if_stmt.then_branch),
        Expression::BoolLiteral(_) => {
            if if_stmt.elif_branches.is_empty() {
                IfOutcome::Replaced(if_stmt.else_branch.unwrap_or_default())
            } else {
                let (condition, then_branch) = if_stmt.elif_branches.remove(0);
                let promoted = Statement::If(IfStmt {
                    condition,
                    then_branch,
                    elif_branches: if_stmt.elif_branches,
                    else_branch: if_stmt.else_branch,
                    span: if_stmt.span,
                });
                match eliminate_if(promoted) {
                    IfOutcome::Replaced(spliced) => IfOutcome::Replaced(spliced),
                    IfOutcome::Kept(kept) => IfOutcome::Replaced(vec![kept]),
                }
            }
        }
        _ => IfOutcome::Kept(Statement::If(if_stmt)),
    }
}

/// Drop any known value that a statement (or its nested blocks) writes.
fn invalidate_writes(statement: &Statement, known: &mut FxHashMap<String, Expression>) {
    let mut writes = FxHashSet::default();
    collect_writes(statement, &mut writes);
    for name in writes {
        known.remove(&name);
    }
}

fn collect_writes(statement: &Statement, writes: &mut FxHashSet<String>) {
    let mut clone = statement.clone();
    visit_stmt_exprs(&mut clone, &mut |expr| {
        if let Expression::Assign(assign) = expr {
            if let Some(name) = assign.target.as_identifier() {
                writes.insert(name.to_string());
            }
        }
    });
    // Declarations rebind too
    collect_decl_names(statement, writes);
}

fn collect_decl_names(statement: &Statement, writes: &mut FxHashSet<String>) {
    match statement {
        Statement::VarDecl(decl) => {
            writes.insert(decl.name.clone());
        }
        Statement::MultiVarDecl(decl) => writes.extend(decl.names.iter().cloned()),
        Statement::Destructuring(decl) => match &decl.pattern {
            DestructurePattern::Tuple(names) | DestructurePattern::Record(names) => {
                writes.extend(names.iter().cloned())
            }
        },
        Statement::For(s) => {
            writes.insert(s.var.clone());
            for inner in &s.body {
                collect_decl_names(inner, writes);
            }
        }
        Statement::If(s) => {
            for inner in s
                .then_branch
                .iter()
                .chain(s.elif_branches.iter().flat_map(|(_, b)| b))
                .chain(s.else_branch.iter().flatten())
            {
                collect_decl_names(inner, writes);
            }
        }
        Statement::While(s) => {
            for inner in &s.body {
                collect_decl_names(inner, writes);
            }
        }
        Statement::Loop(s) => {
            for inner in &s.body {
                collect_decl_names(inner, writes);
            }
        }
        Statement::Block(s) => {
            for inner in &s.statements {
                collect_decl_names(inner, writes);
            }
        }
        _ => {}
    }
}

// ============================================================================
// Accumulator recognition
// ============================================================================

/// `mut x = N; x = x ⊕ K; ...; x = x ⊕ K` with ⊕ ∈ {+, -, *} and no
/// other read of `x` in between folds into `mut x = <final>` with the
/// intermediate assignments removed.
fn optimize_accumulators(statements: &mut Vec<Statement>) -> usize {
    let mut count = 0usize;
    let mut index = 0usize;

    while index < statements.len() {
        let Some((name, base)) = accumulator_decl(&statements[index]) else {
            index += 1;
            continue;
        };

        let mut value = base;
        let mut to_remove: Vec<usize> = Vec::new();
        for (offset, statement) in statements[index + 1..].iter().enumerate() {
            let position = index + 1 + offset;
            if let Some(next) = apply_accumulator_step(statement, &name, value) {
                value = next;
                to_remove.push(position);
                continue;
            }
            if statement_touches(statement, &name) {
                break;
            }
        }

        if !to_remove.is_empty() {
            count += to_remove.len();
            for position in to_remove.into_iter().rev() {
                statements.remove(position);
            }
            if let Statement::VarDecl(decl) = &mut statements[index] {
                let span = decl.span;
                decl.initializer = Some(Expression::int(value, span));
            }
        }
        index += 1;
    }
    count
}

fn accumulator_decl(statement: &Statement) -> Option<(String, i64)> {
    if let Statement::VarDecl(decl) = statement {
        if decl.mutable {
            if let Some(Expression::IntLiteral(lit)) = &decl.initializer {
                return Some((decl.name.clone(), lit.value));
            }
        }
    }
    None
}

/// Match one accumulator mutation of `name` and return the folded value.
fn apply_accumulator_step(statement: &Statement, name: &str, value: i64) -> Option<i64> {
    let Statement::Expression(stmt) = statement else {
        return None;
    };
    let Expression::Assign(assign) = &stmt.expression else {
        return None;
    };
    if assign.target.as_identifier() != Some(name) {
        return None;
    }

    // `x += K` / `x -= K` / `x *= K`
    let delta = |op: AssignOp, k: i64| match op {
        AssignOp::Add => Some(value.wrapping_add(k)),
        AssignOp::Sub => Some(value.wrapping_sub(k)),
        AssignOp::Mul => Some(value.wrapping_mul(k)),
        _ => None,
    };
    if assign.op != AssignOp::Assign {
        let k = assign.value.as_int()?;
        return delta(assign.op, k);
    }

    // `x = x ⊕ K` and `x = K + x`
    if let Expression::Binary(binary) = assign.value.as_ref() {
        let fold = |op: &BinOp, k: i64| match op {
            BinOp::Add => Some(value.wrapping_add(k)),
            BinOp::Sub => Some(value.wrapping_sub(k)),
            BinOp::Mul => Some(value.wrapping_mul(k)),
            _ => None,
        };
        if binary.left.as_identifier() == Some(name) {
            let k = binary.right.as_int()?;
            return fold(&binary.op, k);
        }
        if binary.right.as_identifier() == Some(name) && binary.op == BinOp::Add {
            let k = binary.left.as_int()?;
            return fold(&BinOp::Add, k);
        }
    }
    None
}

/// Whether a statement reads or writes `name` anywhere.
fn statement_touches(statement: &Statement, name: &str) -> bool {
    let mut reads = FxHashSet::default();
    let mut clone = statement.clone();
    visit_stmt_exprs(&mut clone, &mut |expr| {
        collect_reads(expr, &mut reads);
    });
    if reads.contains(name) {
        return true;
    }
    let mut writes = FxHashSet::default();
    collect_writes(statement, &mut writes);
    writes.contains(name)
}

// ============================================================================
// Dead-store elimination
// ============================================================================

/// Remove assignments overwritten before any read. Compound assignments
/// count as read+write; control flow between two stores is treated as a
/// read (conservative).
fn eliminate_dead_stores(statements: &mut Vec<Statement>) -> usize {
    let mut count = 0usize;
    let mut index = 0usize;

    'outer: while index < statements.len() {
        let Some(target) = simple_store_target(&statements[index]) else {
            index += 1;
            continue;
        };

        for later in statements[index + 1..].iter() {
            if is_flat_statement(later) {
                if statement_reads(later, &target) {
                    index += 1;
                    continue 'outer;
                }
                if simple_store_target(later).as_deref() == Some(&target) {
                    // Overwritten before any read
                    statements.remove(index);
                    count += 1;
                    continue 'outer;
                }
            } else {
                // Branches and loops may read anything
                index += 1;
                continue 'outer;
            }
        }
        index += 1;
    }
    count
}

/// A plain `x = value` store with a side-effect-free value.
fn simple_store_target(statement: &Statement) -> Option<String> {
    if let Statement::Expression(stmt) = statement {
        if let Expression::Assign(assign) = &stmt.expression {
            if assign.op == AssignOp::Assign && !has_side_effects(&assign.value) {
                return assign.target.as_identifier().map(|s| s.to_string());
            }
        }
    }
    None
}

fn is_flat_statement(statement: &Statement) -> bool {
    matches!(
        statement,
        Statement::Expression(_)
            | Statement::VarDecl(_)
            | Statement::MultiVarDecl(_)
            | Statement::Return(_)
    )
}

fn statement_reads(statement: &Statement, name: &str) -> bool {
    let mut reads = FxHashSet::default();
    let mut clone = statement.clone();
    visit_stmt_exprs(&mut clone, &mut |expr| {
        // The bare target of a simple store is not a read
        if let Expression::Assign(assign) = expr {
            if assign.op == AssignOp::Assign {
                collect_reads(&assign.value, &mut reads);
                return;
            }
        }
        if let Expression::Identifier(id) = expr {
            reads.insert(id.name.clone());
        }
    });
    // Re-add compound-assign targets as reads
    let mut clone = statement.clone();
    visit_stmt_exprs(&mut clone, &mut |expr| {
        if let Expression::Assign(assign) = expr {
            if assign.op != AssignOp::Assign {
                if let Some(target) = assign.target.as_identifier() {
                    reads.insert(target.to_string());
                }
            }
        }
    });
    reads.contains(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::Parser;

    fn run(source: &str) -> Program {
        let mut program = Parser::parse_source(source, "t.tyl").unwrap();
        let mut pass = ConstantPropagationPass::new();
        while pass.run(&mut program) > 0 {}
        program
    }

    #[test]
    fn propagates_immutable_bindings() {
        let program = run("fn f() -> int:\n    let a = 5\n    return a + 1\n");
        let body = program.find_function("f").unwrap().body.as_ref().unwrap();
        assert!(matches!(
            &body[1],
            Statement::Return(r) if r.value.as_ref().and_then(|v| v.as_int()) == Some(6)
        ));
    }

    #[test]
    fn global_const_flows_into_functions() {
        let program = run("const N :: 10\nfn main() -> int:\n    return N + 1\n");
        let body = program.find_function("main").unwrap().body.as_ref().unwrap();
        assert!(matches!(
            &body[0],
            Statement::Return(r) if r.value.as_ref().and_then(|v| v.as_int()) == Some(11)
        ));
    }

    #[test]
    fn mutable_write_invalidates() {
        let program = run(
            "fn f(n: int) -> int:\n    mut a = 1\n    a = n\n    return a + 1\n",
        );
        let body = program.find_function("f").unwrap().body.as_ref().unwrap();
        // `a` must not be folded to 2: its value is unknown after `a = n`
        assert!(matches!(
            &body[2],
            Statement::Return(r) if matches!(r.value.as_ref().unwrap(), Expression::Binary(_))
        ));
    }

    #[test]
    fn accumulator_collapses_unrolled_counting() {
        let program = run(
            "fn f() -> int:\n    mut x = 0\n    x = x + 1\n    x = x + 2\n    x = x + 3\n    x = x + 4\n    x = x + 5\n    return x\n",
        );
        let body = program.find_function("f").unwrap().body.as_ref().unwrap();
        assert_eq!(body.len(), 2);
        assert!(matches!(
            &body[0],
            Statement::VarDecl(v) if v.initializer.as_ref().and_then(|i| i.as_int()) == Some(15)
        ));
    }

    #[test]
    fn accumulator_with_compound_and_reversed_forms() {
        let program = run(
            "fn f() -> int:\n    mut x = 1\n    x *= 3\n    x = 2 + x\n    x -= 1\n    return x\n",
        );
        let body = program.find_function("f").unwrap().body.as_ref().unwrap();
        assert!(matches!(
            &body[0],
            Statement::VarDecl(v) if v.initializer.as_ref().and_then(|i| i.as_int()) == Some(4)
        ));
    }

    #[test]
    fn accumulator_stops_at_intermediate_read() {
        let program = run(
            "fn f() -> int:\n    mut x = 0\n    x = x + 1\n    g(x)\n    x = x + 2\n    return x\n",
        );
        let body = program.find_function("f").unwrap().body.as_ref().unwrap();
        // Only the first increment folds; the rest survive the read
        assert!(matches!(
            &body[0],
            Statement::VarDecl(v) if v.initializer.as_ref().and_then(|i| i.as_int()) == Some(1)
        ));
        assert!(body.len() >= 3);
    }

    #[test]
    fn if_with_constant_condition_is_eliminated() {
        let program = run(
            "fn f() -> int:\n    let flag = true\n    if flag:\n        return 1\n    else:\n        return 2\n",
        );
        let body = program.find_function("f").unwrap().body.as_ref().unwrap();
        assert!(matches!(
            &body[1],
            Statement::Return(r) if r.value.as_ref().and_then(|v| v.as_int()) == Some(1)
        ));
    }

    #[test]
    fn dead_store_removed() {
        let program = run(
            "fn f() -> int:\n    mut x = 0\n    x = 1\n    x = 2\n    return x\n",
        );
        let body = program.find_function("f").unwrap().body.as_ref().unwrap();
        // `x = 1` is overwritten before any read; the accumulator fold
        // then merges the rest
        assert!(!body.iter().any(|s| {
            matches!(
                s,
                Statement::Expression(e) if matches!(
                    &e.expression,
                    Expression::Assign(a) if a.value.as_int() == Some(1)
                )
            )
        }));
    }
}
