//! Algebraic simplification (O3+).
//!
//! Applies operator identities while preserving the side effects of the
//! retained operand: an identity only fires when the *dropped* operand is
//! side-effect free.

use super::{for_each_block, has_side_effects, visit_stmt_exprs, OptimizationPass};
use crate::parser::ast::*;

#[derive(Debug, Default)]
pub struct AlgebraicSimplificationPass {
    transformations: usize,
}

impl AlgebraicSimplificationPass {
    pub fn new() -> Self {
        Self::default()
    }
}

impl OptimizationPass for AlgebraicSimplificationPass {
    fn name(&self) -> &'static str {
        "AlgebraicSimplification"
    }

    fn run(&mut self, program: &mut Program) -> usize {
        let mut count = 0usize;
        for_each_block(program, &mut |statements| {
            for statement in statements.iter_mut() {
                visit_stmt_exprs(statement, &mut |expr| {
                    if let Some(simplified) = simplify(expr) {
                        *expr = simplified;
                        count += 1;
                    }
                });
            }
        });
        self.transformations = count;
        count
    }
}

fn is_int(expr: &Expression, value: i64) -> bool {
    expr.as_int() == Some(value)
}

fn is_bool(expr: &Expression, value: bool) -> bool {
    matches!(expr, Expression::BoolLiteral(b) if b.value == value)
}

fn same_identifier(a: &Expression, b: &Expression) -> bool {
    match (a.as_identifier(), b.as_identifier()) {
        (Some(x), Some(y)) => x == y,
        _ => false,
    }
}

fn negate(expr: Expression) -> Expression {
    let span = expr.span();
    Expression::Unary(UnaryExpr {
        op: UnOp::Neg,
        operand: Box::new(expr),
        span,
    })
}

fn simplify(expr: &Expression) -> Option<Expression> {
    let Expression::Binary(binary) = expr else {
        // !!x -> x
        if let Expression::Unary(outer) = expr {
            if outer.op == UnOp::Not {
                if let Expression::Unary(inner) = outer.operand.as_ref() {
                    if inner.op == UnOp::Not {
                        return Some((*inner.operand).clone());
                    }
                }
            }
        }
        return None;
    };

    let left = binary.left.as_ref();
    let right = binary.right.as_ref();
    let span = binary.span;

    match binary.op {
        BinOp::Add => {
            if is_int(right, 0) {
                return Some(left.clone());
            }
            if is_int(left, 0) {
                return Some(right.clone());
            }
        }
        BinOp::Sub => {
            if is_int(right, 0) {
                return Some(left.clone());
            }
            // 0 - x -> -x
            if is_int(left, 0) {
                return Some(negate(right.clone()));
            }
        }
        BinOp::Mul => {
            // x * 0 -> 0 only when x has no side effects
            if is_int(right, 0) && !has_side_effects(left) {
                return Some(Expression::int(0, span));
            }
            if is_int(left, 0) && !has_side_effects(right) {
                return Some(Expression::int(0, span));
            }
            if is_int(right, 1) {
                return Some(left.clone());
            }
            if is_int(left, 1) {
                return Some(right.clone());
            }
            if is_int(right, -1) {
                return Some(negate(left.clone()));
            }
            if is_int(left, -1) {
                return Some(negate(right.clone()));
            }
        }
        BinOp::Div => {
            if is_int(right, 1) {
                return Some(left.clone());
            }
        }
        BinOp::BitAnd => {
            if same_identifier(left, right) {
                return Some(left.clone());
            }
        }
        BinOp::BitOr => {
            if same_identifier(left, right) {
                return Some(left.clone());
            }
        }
        BinOp::BitXor => {
            if same_identifier(left, right) {
                return Some(Expression::int(0, span));
            }
        }
        BinOp::Shl | BinOp::Shr => {
            if is_int(right, 0) {
                return Some(left.clone());
            }
        }
        BinOp::And => {
            // x and true -> x
            if is_bool(right, true) {
                return Some(left.clone());
            }
            if is_bool(left, true) {
                return Some(right.clone());
            }
            if is_bool(right, false) && !has_side_effects(left) {
                return Some(Expression::boolean(false, span));
            }
        }
        BinOp::Or => {
            // x or false -> x
            if is_bool(right, false) {
                return Some(left.clone());
            }
            if is_bool(left, false) {
                return Some(right.clone());
            }
            if is_bool(right, true) && !has_side_effects(left) {
                return Some(Expression::boolean(true, span));
            }
        }
        _ => {}
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::Parser;

    fn run(source: &str) -> Program {
        let mut program = Parser::parse_source(source, "t.tyl").unwrap();
        let mut pass = AlgebraicSimplificationPass::new();
        pass.run(&mut program);
        program
    }

    fn init(program: &Program, index: usize) -> &Expression {
        match &program.statements[index] {
            Statement::VarDecl(v) => v.initializer.as_ref().unwrap(),
            _ => panic!("expected var decl"),
        }
    }

    #[test]
    fn additive_and_multiplicative_identities() {
        let program = run("let a = x + 0\nlet b = x * 1\nlet c = x * 0\nlet d = x / 1\n");
        assert_eq!(init(&program, 0).as_identifier(), Some("x"));
        assert_eq!(init(&program, 1).as_identifier(), Some("x"));
        assert_eq!(init(&program, 2).as_int(), Some(0));
        assert_eq!(init(&program, 3).as_identifier(), Some("x"));
    }

    #[test]
    fn negation_forms() {
        let program = run("let a = 0 - x\nlet b = x * -1\n");
        assert!(matches!(init(&program, 0), Expression::Unary(u) if u.op == UnOp::Neg));
        assert!(matches!(init(&program, 1), Expression::Unary(u) if u.op == UnOp::Neg));
    }

    #[test]
    fn bitwise_self_identities() {
        let program = run("let a = x & x\nlet b = x | x\nlet c = x ^ x\n");
        assert_eq!(init(&program, 0).as_identifier(), Some("x"));
        assert_eq!(init(&program, 1).as_identifier(), Some("x"));
        assert_eq!(init(&program, 2).as_int(), Some(0));
    }

    #[test]
    fn boolean_identities() {
        let program = run("let a = x and true\nlet b = x or false\n");
        assert_eq!(init(&program, 0).as_identifier(), Some("x"));
        assert_eq!(init(&program, 1).as_identifier(), Some("x"));
    }

    #[test]
    fn side_effects_block_zero_multiplication() {
        let program = run("let a = f(y) * 0\n");
        // f(y) must still run; the identity may not fire
        assert!(matches!(init(&program, 0), Expression::Binary(_)));
    }
}
