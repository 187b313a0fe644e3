//! Loop optimizations: bounded unrolling, loop-invariant code motion and
//! in-loop strength reduction.
//!
//! Unrolling requires literal bounds, a trip count inside the
//! `[min_trip_count, max_trip_count]` window, and a body free of `break`/
//! `continue` that targets the loop. Each clone substitutes the
//! induction variable with its literal value; the follow-up folding and
//! accumulator passes then collapse counting loops entirely.

use super::{collect_reads, for_each_block, has_side_effects, visit_stmt_exprs, OptimizationPass};
use crate::parser::ast::*;
use rustc_hash::FxHashSet;

#[derive(Debug)]
pub struct LoopOptimizationPass {
    min_trip_count: i64,
    max_trip_count: i64,
    transformations: usize,
}

impl Default for LoopOptimizationPass {
    fn default() -> Self {
        Self {
            min_trip_count: 4,
            max_trip_count: 64,
            transformations: 0,
        }
    }
}

impl LoopOptimizationPass {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_trip_window(min: i64, max: i64) -> Self {
        Self {
            min_trip_count: min,
            max_trip_count: max,
            transformations: 0,
        }
    }
}

impl OptimizationPass for LoopOptimizationPass {
    fn name(&self) -> &'static str {
        "LoopOptimization"
    }

    fn run(&mut self, program: &mut Program) -> usize {
        let mut count = 0usize;
        let (min_trip, max_trip) = (self.min_trip_count, self.max_trip_count);
        for_each_block(program, &mut |statements| {
            count += hoist_invariants(statements);
            count += unroll_loops(statements, min_trip, max_trip);
            count += reduce_in_loops(statements);
        });
        self.transformations = count;
        count
    }
}

/// Loop bounds for `for i in a..b`, `a..=b` and `range(a, b[, step])`.
struct LoopBounds {
    start: i64,
    end: i64,
    step: i64,
    inclusive: bool,
}

impl LoopBounds {
    fn trip_count(&self) -> i64 {
        if self.step == 0 {
            return 0;
        }
        let span = if self.inclusive {
            self.end - self.start + 1
        } else {
            self.end - self.start
        };
        if span <= 0 {
            0
        } else {
            (span + self.step - 1) / self.step
        }
    }
}

fn analyze_bounds(iterable: &Expression) -> Option<LoopBounds> {
    match iterable {
        Expression::Range(range) => Some(LoopBounds {
            start: range.start.as_int()?,
            end: range.end.as_int()?,
            step: 1,
            inclusive: range.inclusive,
        }),
        Expression::Call(call) if call.callee.as_identifier() == Some("range") => {
            match call.args.len() {
                // range(n) runs 0..n
                1 => Some(LoopBounds {
                    start: 0,
                    end: call.args[0].as_int()?,
                    step: 1,
                    inclusive: false,
                }),
                2 => Some(LoopBounds {
                    start: call.args[0].as_int()?,
                    end: call.args[1].as_int()?,
                    step: 1,
                    inclusive: false,
                }),
                3 => Some(LoopBounds {
                    start: call.args[0].as_int()?,
                    end: call.args[1].as_int()?,
                    step: call.args[2].as_int()?,
                    inclusive: false,
                }),
                _ => None,
            }
        }
        _ => None,
    }
}

fn contains_loop_exit(statements: &[Statement]) -> bool {
    statements.iter().any(|statement| match statement {
        Statement::Break(_) | Statement::Continue(_) => true,
        Statement::If(s) => {
            contains_loop_exit(&s.then_branch)
                || s.elif_branches.iter().any(|(_, b)| contains_loop_exit(b))
                || s.else_branch.as_ref().is_some_and(|b| contains_loop_exit(b))
        }
        Statement::Block(b) => contains_loop_exit(&b.statements),
        Statement::Match(m) => m.arms.iter().any(|arm| contains_loop_exit(&arm.body)),
        // A nested loop owns its own break/continue
        Statement::While(_) | Statement::For(_) | Statement::Loop(_) => false,
        _ => false,
    })
}

fn unroll_loops(statements: &mut Vec<Statement>, min_trip: i64, max_trip: i64) -> usize {
    let mut count = 0usize;
    let mut index = 0usize;

    while index < statements.len() {
        let unrolled = match &statements[index] {
            Statement::For(for_stmt) if for_stmt.label.is_none() => {
                analyze_bounds(&for_stmt.iterable).and_then(|bounds| {
                    let trips = bounds.trip_count();
                    if trips < min_trip || trips > max_trip {
                        return None;
                    }
                    if contains_loop_exit(&for_stmt.body) {
                        return None;
                    }
                    let mut clones = Vec::with_capacity(trips as usize * for_stmt.body.len());
                    let mut value = bounds.start;
                    for _ in 0..trips {
                        for statement in &for_stmt.body {
                            let mut clone = statement.clone();
                            substitute_induction(&mut clone, &for_stmt.var, value);
                            clones.push(clone);
                        }
                        value += bounds.step;
                    }
                    Some(clones)
                })
            }
            _ => None,
        };

        if let Some(clones) = unrolled {
            statements.remove(index);
            let added = clones.len();
            for (offset, statement) in clones.into_iter().enumerate() {
                statements.insert(index + offset, statement);
            }
            count += 1;
            index += added;
        } else {
            index += 1;
        }
    }
    count
}

fn substitute_induction(statement: &mut Statement, var: &str, value: i64) {
    visit_stmt_exprs(statement, &mut |expr| {
        if expr.as_identifier() == Some(var) {
            *expr = Expression::int(value, expr.span());
        }
    });
}

/// Loop-invariant code motion: declarations whose reads are disjoint from
/// everything the loop modifies (and from the induction variable) move in
/// front of the loop.
fn hoist_invariants(statements: &mut Vec<Statement>) -> usize {
    let mut count = 0usize;
    let mut index = 0usize;

    while index < statements.len() {
        let hoisted = match &mut statements[index] {
            Statement::For(for_stmt) => {
                let mut modified = FxHashSet::default();
                collect_modified(&for_stmt.body, &mut modified);
                modified.insert(for_stmt.var.clone());
                extract_invariants(&mut for_stmt.body, &modified)
            }
            Statement::While(while_stmt) => {
                let mut modified = FxHashSet::default();
                collect_modified(&while_stmt.body, &mut modified);
                // The condition's variables change too, by definition
                collect_reads(&while_stmt.condition, &mut modified);
                extract_invariants(&mut while_stmt.body, &modified)
            }
            _ => Vec::new(),
        };

        if !hoisted.is_empty() {
            count += hoisted.len();
            let added = hoisted.len();
            for (offset, statement) in hoisted.into_iter().enumerate() {
                statements.insert(index + offset, statement);
            }
            index += added + 1;
        } else {
            index += 1;
        }
    }
    count
}

fn collect_modified(statements: &[Statement], modified: &mut FxHashSet<String>) {
    let mut clone = statements.to_vec();
    for statement in &mut clone {
        if let Statement::VarDecl(decl) = statement {
            modified.insert(decl.name.clone());
        }
        if let Statement::For(s) = statement {
            modified.insert(s.var.clone());
        }
        visit_stmt_exprs(statement, &mut |expr| {
            if let Expression::Assign(assign) = expr {
                if let Some(name) = assign.target.as_identifier() {
                    modified.insert(name.to_string());
                }
            }
        });
    }
}

fn extract_invariants(
    body: &mut Vec<Statement>,
    modified: &FxHashSet<String>,
) -> Vec<Statement> {
    let mut hoisted = Vec::new();
    let mut index = 0usize;
    while index < body.len() {
        let invariant = match &body[index] {
            Statement::VarDecl(decl) => match &decl.initializer {
                Some(init) if !has_side_effects(init) => {
                    let mut reads = FxHashSet::default();
                    collect_reads(init, &mut reads);
                    reads.is_disjoint(modified)
                }
                _ => false,
            },
            _ => false,
        };
        if invariant {
            hoisted.push(body.remove(index));
        } else {
            index += 1;
        }
    }
    hoisted
}

/// Strength reduction applied inside loop bodies only (the global pass
/// runs at O3+, this covers O2 loop bodies).
fn reduce_in_loops(statements: &mut [Statement]) -> usize {
    let mut count = 0usize;
    for statement in statements.iter_mut() {
        let body = match statement {
            Statement::For(s) => &mut s.body,
            Statement::While(s) => &mut s.body,
            Statement::Loop(s) => &mut s.body,
            _ => continue,
        };
        for inner in body.iter_mut() {
            visit_stmt_exprs(inner, &mut |expr| {
                if let Some(reduced) = super::strength::reduce(expr) {
                    *expr = reduced;
                    count += 1;
                }
            });
        }
    }
    count
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::Parser;

    fn run(source: &str) -> Program {
        let mut program = Parser::parse_source(source, "t.tyl").unwrap();
        let mut pass = LoopOptimizationPass::new();
        pass.run(&mut program);
        program
    }

    #[test]
    fn unrolls_inclusive_range() {
        let program = run(
            "fn f() -> int:\n    mut x = 0\n    for i in 1..=5:\n        x = x + i\n    return x\n",
        );
        let body = program.find_function("f").unwrap().body.as_ref().unwrap();
        // The for is gone; five substituted assignments remain
        assert!(!body.iter().any(|s| matches!(s, Statement::For(_))));
        let assigns = body
            .iter()
            .filter(|s| matches!(s, Statement::Expression(e) if matches!(e.expression, Expression::Assign(_))))
            .count();
        assert_eq!(assigns, 5);
    }

    #[test]
    fn trip_count_window_is_respected() {
        // 2 iterations: below the minimum, not unrolled
        let program = run(
            "fn f() -> int:\n    mut x = 0\n    for i in 1..=2:\n        x = x + i\n    return x\n",
        );
        let body = program.find_function("f").unwrap().body.as_ref().unwrap();
        assert!(body.iter().any(|s| matches!(s, Statement::For(_))));

        // 100 iterations: above the maximum
        let program = run(
            "fn f() -> int:\n    mut x = 0\n    for i in 1..=100:\n        x = x + i\n    return x\n",
        );
        let body = program.find_function("f").unwrap().body.as_ref().unwrap();
        assert!(body.iter().any(|s| matches!(s, Statement::For(_))));
    }

    #[test]
    fn break_blocks_unrolling() {
        let program = run(
            "fn f() -> int:\n    mut x = 0\n    for i in 1..=5:\n        if x > 2:\n            break\n        x = x + i\n    return x\n",
        );
        let body = program.find_function("f").unwrap().body.as_ref().unwrap();
        assert!(body.iter().any(|s| matches!(s, Statement::For(_))));
    }

    #[test]
    fn range_call_unrolls() {
        let program = run(
            "fn f() -> int:\n    mut x = 0\n    for i in range(0, 4):\n        x = x + i\n    return x\n",
        );
        let body = program.find_function("f").unwrap().body.as_ref().unwrap();
        assert!(!body.iter().any(|s| matches!(s, Statement::For(_))));
    }

    #[test]
    fn licm_hoists_invariant_declaration() {
        let program = run(
            "fn f(a: int, b: int) -> int:\n    mut x = 0\n    for i in 1..=100:\n        let k = a * b\n        x = x + k\n    return x\n",
        );
        let body = program.find_function("f").unwrap().body.as_ref().unwrap();
        // `let k = a * b` now precedes the loop
        let k_pos = body
            .iter()
            .position(|s| matches!(s, Statement::VarDecl(v) if v.name == "k"))
            .expect("k hoisted");
        let for_pos = body
            .iter()
            .position(|s| matches!(s, Statement::For(_)))
            .expect("loop kept");
        assert!(k_pos < for_pos);
    }

    #[test]
    fn strength_reduction_inside_loops() {
        let program = run(
            "fn f(n: int) -> int:\n    mut x = 0\n    while x < n:\n        x = x * 8\n    return x\n",
        );
        let body = program.find_function("f").unwrap().body.as_ref().unwrap();
        let Statement::While(while_stmt) = &body[1] else {
            panic!("expected while");
        };
        assert!(matches!(
            &while_stmt.body[0],
            Statement::Expression(e) if matches!(
                &e.expression,
                Expression::Assign(a) if matches!(a.value.as_ref(), Expression::Binary(b) if b.op == BinOp::Shl)
            )
        ));
    }
}
