//! Advanced strength reduction (O3+).
//!
//! Integer multiply/divide/modulo by a power of two becomes a shift or a
//! mask; divide by a negative power of two becomes a shift plus negate.

use super::{for_each_block, visit_stmt_exprs, OptimizationPass};
use crate::parser::ast::*;

#[derive(Debug, Default)]
pub struct StrengthReductionPass {
    transformations: usize,
}

impl StrengthReductionPass {
    pub fn new() -> Self {
        Self::default()
    }
}

impl OptimizationPass for StrengthReductionPass {
    fn name(&self) -> &'static str {
        "AdvancedStrengthReduction"
    }

    fn run(&mut self, program: &mut Program) -> usize {
        let mut count = 0usize;
        for_each_block(program, &mut |statements| {
            for statement in statements.iter_mut() {
                visit_stmt_exprs(statement, &mut |expr| {
                    if let Some(reduced) = reduce(expr) {
                        *expr = reduced;
                        count += 1;
                    }
                });
            }
        });
        self.transformations = count;
        count
    }
}

fn is_power_of_two(value: i64) -> bool {
    value > 0 && (value & (value - 1)) == 0
}

fn log2(value: i64) -> i64 {
    63 - value.leading_zeros() as i64
}

/// Constant integer operand, accepting a not-yet-folded `-N`.
fn const_int(expr: &Expression) -> Option<i64> {
    match expr {
        Expression::IntLiteral(lit) => Some(lit.value),
        Expression::Unary(u) if u.op == UnOp::Neg => u.operand.as_int().map(|v| -v),
        _ => None,
    }
}

pub(crate) fn reduce(expr: &Expression) -> Option<Expression> {
    let Expression::Binary(binary) = expr else {
        return None;
    };
    let span = binary.span;
    let k = const_int(&binary.right)?;

    match binary.op {
        BinOp::Mul if is_power_of_two(k) && k > 1 => Some(Expression::binary(
            BinOp::Shl,
            (*binary.left).clone(),
            Expression::int(log2(k), span),
            span,
        )),
        BinOp::Div if is_power_of_two(k) && k > 1 => Some(Expression::binary(
            BinOp::Shr,
            (*binary.left).clone(),
            Expression::int(log2(k), span),
            span,
        )),
        BinOp::Div if k < 0 && is_power_of_two(-k) && -k > 1 => {
            let shifted = Expression::binary(
                BinOp::Shr,
                (*binary.left).clone(),
                Expression::int(log2(-k), span),
                span,
            );
            Some(Expression::Unary(UnaryExpr {
                op: UnOp::Neg,
                operand: Box::new(shifted),
                span,
            }))
        }
        BinOp::Mod if is_power_of_two(k) && k > 1 => Some(Expression::binary(
            BinOp::BitAnd,
            (*binary.left).clone(),
            Expression::int(k - 1, span),
            span,
        )),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::Parser;

    fn run(source: &str) -> Program {
        let mut program = Parser::parse_source(source, "t.tyl").unwrap();
        let mut pass = StrengthReductionPass::new();
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
    fn multiply_by_power_of_two_becomes_shift() {
        let program = run("let a = x * 8\n");
        if let Expression::Binary(b) = init(&program, 0) {
            assert_eq!(b.op, BinOp::Shl);
            assert_eq!(b.right.as_int(), Some(3));
        } else {
            panic!("expected shift");
        }
    }

    #[test]
    fn divide_and_modulo() {
        let program = run("let a = x / 16\nlet b = x % 32\n");
        assert!(matches!(
            init(&program, 0),
            Expression::Binary(b) if b.op == BinOp::Shr && b.right.as_int() == Some(4)
        ));
        assert!(matches!(
            init(&program, 1),
            Expression::Binary(b) if b.op == BinOp::BitAnd && b.right.as_int() == Some(31)
        ));
    }

    #[test]
    fn divide_by_negative_power_of_two() {
        let program = run("let a = x / -4\n");
        if let Expression::Unary(u) = init(&program, 0) {
            assert_eq!(u.op, UnOp::Neg);
            assert!(matches!(
                u.operand.as_ref(),
                Expression::Binary(b) if b.op == BinOp::Shr && b.right.as_int() == Some(2)
            ));
        } else {
            panic!("expected negated shift");
        }
    }

    #[test]
    fn non_powers_are_untouched() {
        let program = run("let a = x * 7\nlet b = x / 3\n");
        assert!(matches!(init(&program, 0), Expression::Binary(b) if b.op == BinOp::Mul));
        assert!(matches!(init(&program, 1), Expression::Binary(b) if b.op == BinOp::Div));
    }
}
