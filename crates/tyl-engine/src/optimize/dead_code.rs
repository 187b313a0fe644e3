//! Dead code elimination.
//!
//! Removes statements after an unconditional `return`/`break`/`continue`
//! within a block, side-effect-free expression statements, and `while`
//! loops whose condition is literally false.

use super::{for_each_block, has_side_effects, OptimizationPass};
use crate::parser::ast::*;

#[derive(Debug, Default)]
pub struct DeadCodeEliminationPass {
    transformations: usize,
}

impl DeadCodeEliminationPass {
    pub fn new() -> Self {
        Self::default()
    }
}

impl OptimizationPass for DeadCodeEliminationPass {
    fn name(&self) -> &'static str {
        "DeadCodeElimination"
    }

    fn run(&mut self, program: &mut Program) -> usize {
        let mut count = 0usize;
        for_each_block(program, &mut |statements| {
            // Truncate after the first unconditional exit
            if let Some(cut) = statements.iter().position(is_unconditional_exit) {
                let removed = statements.len() - cut - 1;
                if removed > 0 {
                    statements.truncate(cut + 1);
                    count += removed;
                }
            }

            statements.retain(|statement| match statement {
                Statement::Expression(s) => {
                    if has_side_effects(&s.expression) {
                        true
                    } else {
                        count += 1;
                        false
                    }
                }
                Statement::While(s) => {
                    if matches!(&s.condition, Expression::BoolLiteral(b) if !b.value) {
                        count += 1;
                        false
                    } else {
                        true
                    }
                }
                Statement::Block(b) if b.statements.is_empty() => {
                    count += 1;
                    false
                }
                _ => true,
            });
        });
        self.transformations = count;
        count
    }
}

fn is_unconditional_exit(statement: &Statement) -> bool {
    matches!(
        statement,
        Statement::Return(_) | Statement::Break(_) | Statement::Continue(_)
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::Parser;

    fn run(source: &str) -> Program {
        let mut program = Parser::parse_source(source, "t.tyl").unwrap();
        let mut pass = DeadCodeEliminationPass::new();
        pass.run(&mut program);
        program
    }

    #[test]
    fn removes_statements_after_return() {
        let program = run("fn f() -> int:\n    return 1\n    g()\n    h()\n");
        let body = program.find_function("f").unwrap().body.as_ref().unwrap();
        assert_eq!(body.len(), 1);
    }

    #[test]
    fn removes_pure_expression_statements() {
        let program = run("fn f():\n    1 + 2\n    g()\n");
        let body = program.find_function("f").unwrap().body.as_ref().unwrap();
        assert_eq!(body.len(), 1);
        assert!(matches!(&body[0], Statement::Expression(_)));
    }

    #[test]
    fn removes_while_false() {
        let program = run("fn f():\n    while false:\n        g()\n    h()\n");
        let body = program.find_function("f").unwrap().body.as_ref().unwrap();
        assert_eq!(body.len(), 1);
    }
}
