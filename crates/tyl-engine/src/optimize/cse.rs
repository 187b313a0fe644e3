//! Common subexpression elimination (O3+).
//!
//! Structural equivalence uses a hash string with sorted operands for
//! commutative operators, so `a + b` and `b + a` share one temp. Only
//! side-effect-free expressions whose inputs are not written anywhere in
//! the block are eligible.

use super::{collect_reads, for_each_block, has_side_effects, visit_stmt_exprs, OptimizationPass};
use crate::parser::ast::*;
use rustc_hash::{FxHashMap, FxHashSet};

#[derive(Debug, Default)]
pub struct CsePass {
    transformations: usize,
    temp_counter: usize,
}

impl CsePass {
    pub fn new() -> Self {
        Self::default()
    }

    fn next_temp(&mut self) -> String {
        let name = format!("__cse_{}", self.temp_counter);
        self.temp_counter += 1;
        name
    }
}

impl OptimizationPass for CsePass {
    fn name(&self) -> &'static str {
        "CSE"
    }

    fn run(&mut self, program: &mut Program) -> usize {
        let mut count = 0usize;
        let mut temp_counter = self.temp_counter;
        for_each_block(program, &mut |statements| {
            count += process_block(statements, &mut temp_counter);
        });
        self.temp_counter = temp_counter;
        self.transformations = count;
        count
    }
}

/// Structural hash with commutativity normalisation.
pub(crate) fn hash_expression(expr: &Expression) -> Option<String> {
    match expr {
        Expression::IntLiteral(lit) => Some(format!("i:{}", lit.value)),
        Expression::FloatLiteral(lit) => Some(format!("f:{}", lit.value.to_bits())),
        Expression::BoolLiteral(lit) => Some(format!("b:{}", lit.value)),
        Expression::StringLiteral(lit) => Some(format!("s:{:?}", lit.value)),
        Expression::Identifier(id) => Some(format!("v:{}", id.name)),
        Expression::Binary(binary) => {
            let mut left = hash_expression(&binary.left)?;
            let mut right = hash_expression(&binary.right)?;
            if binary.op.is_commutative() && right < left {
                std::mem::swap(&mut left, &mut right);
            }
            Some(format!("({:?} {} {})", binary.op, left, right))
        }
        Expression::Unary(unary) => {
            let operand = hash_expression(&unary.operand)?;
            Some(format!("({:?} {})", unary.op, operand))
        }
        Expression::Index(index) => {
            let object = hash_expression(&index.object)?;
            let idx = hash_expression(&index.index)?;
            Some(format!("(idx {} {})", object, idx))
        }
        Expression::Member(member) if !member.safe => {
            let object = hash_expression(&member.object)?;
            Some(format!("(mem {} {})", object, member.field))
        }
        _ => None,
    }
}

/// Worth a temp: a binary/unary/index expression that reads at least one
/// variable and has no side effects.
fn is_candidate(expr: &Expression) -> bool {
    if has_side_effects(expr) {
        return false;
    }
    let mut reads = FxHashSet::default();
    collect_reads(expr, &mut reads);
    if reads.is_empty() {
        return false;
    }
    matches!(
        expr,
        Expression::Binary(_) | Expression::Index(_) | Expression::Member(_)
    )
}

fn process_block(statements: &mut Vec<Statement>, temp_counter: &mut usize) -> usize {
    // Variables written anywhere in this block invalidate expressions
    // that read them.
    let mut written = FxHashSet::default();
    for statement in statements.iter_mut() {
        let mut clone = statement.clone();
        visit_stmt_exprs(&mut clone, &mut |expr| {
            if let Expression::Assign(assign) = expr {
                if let Some(name) = assign.target.as_identifier() {
                    written.insert(name.to_string());
                }
            }
        });
        if let Statement::VarDecl(decl) = statement {
            written.insert(decl.name.clone());
        }
    }

    // First walk: count occurrences of candidate hashes
    let mut seen: FxHashMap<String, (usize, usize, Expression)> = FxHashMap::default();
    for (index, statement) in statements.iter_mut().enumerate() {
        visit_stmt_exprs(statement, &mut |expr| {
            if !is_candidate(expr) {
                return;
            }
            let mut reads = FxHashSet::default();
            collect_reads(expr, &mut reads);
            if reads.iter().any(|name| written.contains(name)) {
                return;
            }
            if let Some(hash) = hash_expression(expr) {
                let entry = seen.entry(hash).or_insert((0, index, expr.clone()));
                entry.0 += 1;
            }
        });
    }

    // Keep only repeated expressions, outermost first (an inner
    // subexpression of a chosen temp is covered by the temp itself).
    let mut repeated: Vec<(String, usize, Expression)> = seen
        .into_iter()
        .filter(|(_, (count, _, _))| *count >= 2)
        .map(|(hash, (_, first, expr))| (hash, first, expr))
        .collect();
    repeated.sort_by_key(|(_, first, expr)| (*first, std::cmp::Reverse(expr_size(expr))));

    let mut count = 0usize;
    let mut inserted = 0usize;
    for (hash, first_index, expr) in repeated {
        let temp = format!("__cse_{}", *temp_counter);
        *temp_counter += 1;

        let mut replacements = 0usize;
        for statement in statements.iter_mut() {
            visit_stmt_exprs(statement, &mut |e| {
                if hash_expression(e).as_deref() == Some(&hash) {
                    *e = Expression::ident(temp.clone(), e.span());
                    replacements += 1;
                }
            });
        }

        if replacements >= 2 {
            let span = expr.span();
            statements.insert(
                first_index + inserted,
                Statement::VarDecl(VarDecl {
                    name: temp,
                    type_name: String::new(),
                    initializer: Some(expr),
                    mutable: false,
                    is_const: false,
                    span,
                }),
            );
            inserted += 1;
            count += replacements;
        }
    }
    count
}

fn expr_size(expr: &Expression) -> usize {
    match expr {
        Expression::Binary(b) => 1 + expr_size(&b.left) + expr_size(&b.right),
        Expression::Unary(u) => 1 + expr_size(&u.operand),
        Expression::Index(i) => 1 + expr_size(&i.object) + expr_size(&i.index),
        Expression::Member(m) => 1 + expr_size(&m.object),
        _ => 1,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::Parser;

    fn run(source: &str) -> Program {
        let mut program = Parser::parse_source(source, "t.tyl").unwrap();
        let mut pass = CsePass::new();
        pass.run(&mut program);
        program
    }

    #[test]
    fn commutative_hashes_match() {
        let a = Parser::parse_source("let v = a + b\n", "t.tyl").unwrap();
        let b = Parser::parse_source("let v = b + a\n", "t.tyl").unwrap();
        let get = |p: &Program| match &p.statements[0] {
            Statement::VarDecl(v) => hash_expression(v.initializer.as_ref().unwrap()),
            _ => panic!(),
        };
        assert_eq!(get(&a), get(&b));

        let c = Parser::parse_source("let v = a - b\n", "t.tyl").unwrap();
        let d = Parser::parse_source("let v = b - a\n", "t.tyl").unwrap();
        assert_ne!(get(&c), get(&d));
    }

    #[test]
    fn repeated_expression_gets_a_temp() {
        let program = run(
            "fn f() -> int:\n    let a = x * y + 1\n    let b = x * y + 2\n    return a + b\n",
        );
        let body = program.find_function("f").unwrap().body.as_ref().unwrap();
        // A `__cse_N` declaration for x * y is hoisted in
        assert!(body.iter().any(|s| matches!(
            s,
            Statement::VarDecl(v) if v.name.starts_with("__cse_")
        )));
    }

    #[test]
    fn written_variables_are_not_shared() {
        let program = run(
            "fn f() -> int:\n    let a = x * y\n    x = 1\n    let b = x * y\n    return a + b\n",
        );
        let body = program.find_function("f").unwrap().body.as_ref().unwrap();
        assert!(!body.iter().any(|s| matches!(
            s,
            Statement::VarDecl(v) if v.name.starts_with("__cse_")
        )));
    }
}
