//! Constant folding.
//!
//! Evaluates constant expressions over integers, floats (with int↔float
//! cross-promotion), booleans and strings. Division or modulo by zero
//! leaves the node unchanged; the runtime error path reports it instead.

use super::{for_each_block, visit_stmt_exprs, OptimizationPass};
use crate::parser::ast::*;
use crate::parser::token::Span;

#[derive(Debug, Default)]
pub struct ConstantFoldingPass {
    transformations: usize,
}

impl ConstantFoldingPass {
    pub fn new() -> Self {
        Self::default()
    }
}

impl OptimizationPass for ConstantFoldingPass {
    fn name(&self) -> &'static str {
        "ConstantFolding"
    }

    fn run(&mut self, program: &mut Program) -> usize {
        self.transformations = 0;
        let mut count = 0usize;
        for_each_block(program, &mut |statements| {
            for statement in statements.iter_mut() {
                visit_stmt_exprs(statement, &mut |expr| {
                    if let Some(folded) = try_fold(expr) {
                        *expr = folded;
                        count += 1;
                    }
                });
            }
        });
        self.transformations = count;
        count
    }
}

/// Fold an expression tree bottom-up in one post-order walk. Returns the
/// number of nodes folded. Used by passes that need a value out of a
/// freshly substituted expression without waiting for the next driver
/// iteration.
pub(crate) fn fold_expression(expr: &mut Expression) -> usize {
    let mut count = 0usize;
    super::visit_expr(expr, &mut |e| {
        if let Some(folded) = try_fold(e) {
            *e = folded;
            count += 1;
        }
    });
    count
}

fn try_fold(expr: &Expression) -> Option<Expression> {
    match expr {
        Expression::Binary(b) => fold_binary(&b.op, &b.left, &b.right, b.span),
        Expression::Unary(u) => fold_unary(u.op, &u.operand, u.span),
        Expression::Ternary(t) => match t.condition.as_ref() {
            Expression::BoolLiteral(cond) => Some(if cond.value {
                (*t.then_expr).clone()
            } else {
                (*t.else_expr).clone()
            }),
            _ => None,
        },
        _ => None,
    }
}

fn fold_unary(op: UnOp, operand: &Expression, span: Span) -> Option<Expression> {
    match (op, operand) {
        (UnOp::Neg, Expression::IntLiteral(v)) => Some(Expression::int(v.value.wrapping_neg(), span)),
        (UnOp::Neg, Expression::FloatLiteral(v)) => Some(Expression::float(-v.value, span)),
        (UnOp::Not, Expression::BoolLiteral(v)) => Some(Expression::boolean(!v.value, span)),
        (UnOp::BitNot, Expression::IntLiteral(v)) => Some(Expression::int(!v.value, span)),
        // !!x -> x (as a bool)
        (UnOp::Not, Expression::Unary(inner)) if inner.op == UnOp::Not => {
            Some((*inner.operand).clone())
        }
        _ => None,
    }
}

fn fold_binary(op: &BinOp, left: &Expression, right: &Expression, span: Span) -> Option<Expression> {
    use Expression as E;

    match (left, right) {
        (E::IntLiteral(a), E::IntLiteral(b)) => fold_int(op, a.value, b.value, span),
        (E::FloatLiteral(a), E::FloatLiteral(b)) => fold_float(op, a.value, b.value, span),
        // Cross-promotion
        (E::IntLiteral(a), E::FloatLiteral(b)) => fold_float(op, a.value as f64, b.value, span),
        (E::FloatLiteral(a), E::IntLiteral(b)) => fold_float(op, a.value, b.value as f64, span),
        (E::BoolLiteral(a), E::BoolLiteral(b)) => fold_bool(op, a.value, b.value, span),
        (E::StringLiteral(a), E::StringLiteral(b)) => fold_string(op, &a.value, &b.value, span),
        // `nil ?? x` -> x, `lit ?? x` -> lit
        (E::NilLiteral(_), _) if *op == BinOp::NullCoalesce => Some(right.clone()),
        (lhs, _) if *op == BinOp::NullCoalesce && lhs.is_literal() => Some(lhs.clone()),
        _ => None,
    }
}

fn fold_int(op: &BinOp, a: i64, b: i64, span: Span) -> Option<Expression> {
    let int = |v: i64| Some(Expression::int(v, span));
    let boolean = |v: bool| Some(Expression::boolean(v, span));
    match op {
        BinOp::Add => int(a.wrapping_add(b)),
        BinOp::Sub => int(a.wrapping_sub(b)),
        BinOp::Mul => int(a.wrapping_mul(b)),
        // Division/modulo by zero stays for the runtime error path
        BinOp::Div if b != 0 => int(a.wrapping_div(b)),
        BinOp::Mod if b != 0 => int(a.wrapping_rem(b)),
        BinOp::Div | BinOp::Mod => None,
        BinOp::BitAnd => int(a & b),
        BinOp::BitOr => int(a | b),
        BinOp::BitXor => int(a ^ b),
        BinOp::Shl => int(a.wrapping_shl((b & 63) as u32)),
        BinOp::Shr => int(a.wrapping_shr((b & 63) as u32)),
        BinOp::Eq => boolean(a == b),
        BinOp::Ne => boolean(a != b),
        BinOp::Lt => boolean(a < b),
        BinOp::Le => boolean(a <= b),
        BinOp::Gt => boolean(a > b),
        BinOp::Ge => boolean(a >= b),
        BinOp::Spaceship => int((a.cmp(&b) as i8) as i64),
        _ => None,
    }
}

fn fold_float(op: &BinOp, a: f64, b: f64, span: Span) -> Option<Expression> {
    let float = |v: f64| Some(Expression::float(v, span));
    let boolean = |v: bool| Some(Expression::boolean(v, span));
    match op {
        BinOp::Add => float(a + b),
        BinOp::Sub => float(a - b),
        BinOp::Mul => float(a * b),
        BinOp::Div => float(a / b),
        BinOp::Mod => float(a % b),
        BinOp::Eq => boolean(a == b),
        BinOp::Ne => boolean(a != b),
        BinOp::Lt => boolean(a < b),
        BinOp::Le => boolean(a <= b),
        BinOp::Gt => boolean(a > b),
        BinOp::Ge => boolean(a >= b),
        BinOp::Spaceship => a
            .partial_cmp(&b)
            .map(|ord| Expression::int((ord as i8) as i64, span)),
        _ => None,
    }
}

fn fold_bool(op: &BinOp, a: bool, b: bool, span: Span) -> Option<Expression> {
    let boolean = |v: bool| Some(Expression::boolean(v, span));
    match op {
        BinOp::And => boolean(a && b),
        BinOp::Or => boolean(a || b),
        BinOp::Eq => boolean(a == b),
        BinOp::Ne => boolean(a != b),
        BinOp::BitXor => boolean(a ^ b),
        _ => None,
    }
}

fn fold_string(op: &BinOp, a: &str, b: &str, span: Span) -> Option<Expression> {
    match op {
        BinOp::Add => Some(Expression::string(format!("{}{}", a, b), span)),
        BinOp::Eq => Some(Expression::boolean(a == b, span)),
        BinOp::Ne => Some(Expression::boolean(a != b, span)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::Parser;

    fn fold_source(source: &str) -> Program {
        let mut program = Parser::parse_source(source, "t.tyl").unwrap();
        let mut pass = ConstantFoldingPass::new();
        // Iterate like the driver does
        while pass.run(&mut program) > 0 {}
        program
    }

    fn first_init(program: &Program) -> &Expression {
        match &program.statements[0] {
            Statement::VarDecl(v) => v.initializer.as_ref().unwrap(),
            _ => panic!("expected var decl"),
        }
    }

    #[test]
    fn folds_arithmetic() {
        let program = fold_source("let x = 2 + 3 * 4\n");
        assert_eq!(first_init(&program).as_int(), Some(14));
    }

    #[test]
    fn folds_cross_promoted_floats() {
        let program = fold_source("let x = 1 + 2.5\n");
        assert!(matches!(
            first_init(&program),
            Expression::FloatLiteral(f) if f.value == 3.5
        ));
    }

    #[test]
    fn folds_strings_and_bools() {
        let program = fold_source("let s = \"ab\" + \"cd\"\nlet b = true and false\n");
        assert!(matches!(
            first_init(&program),
            Expression::StringLiteral(s) if s.value == "abcd"
        ));
        assert!(matches!(
            &program.statements[1],
            Statement::VarDecl(v) if matches!(
                v.initializer.as_ref().unwrap(),
                Expression::BoolLiteral(b) if !b.value
            )
        ));
    }

    #[test]
    fn division_by_zero_is_left_intact() {
        let program = fold_source("let x = 1 / 0\nlet y = 1 % 0\n");
        assert!(matches!(first_init(&program), Expression::Binary(_)));
        assert!(matches!(
            &program.statements[1],
            Statement::VarDecl(v) if matches!(v.initializer.as_ref().unwrap(), Expression::Binary(_))
        ));
    }

    #[test]
    fn folds_unary_and_double_negation() {
        let program = fold_source("let x = -(3)\nlet y = !!ok\n");
        assert_eq!(first_init(&program).as_int(), Some(-3));
        assert!(matches!(
            &program.statements[1],
            Statement::VarDecl(v) if v.initializer.as_ref().unwrap().as_identifier() == Some("ok")
        ));
    }

    #[test]
    fn constant_ternary_collapses() {
        let program = fold_source("let x = 1 if 2 > 1 else 0\n");
        assert_eq!(first_init(&program).as_int(), Some(1));
    }

    #[test]
    fn spaceship_folds_to_sign() {
        let program = fold_source("let a = 1 <=> 2\nlet b = 2 <=> 2\nlet c = 3 <=> 2\n");
        assert_eq!(first_init(&program).as_int(), Some(-1));
    }
}
