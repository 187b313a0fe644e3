//! Tail-call conversion.
//!
//! A function whose tail position is `return f(args...)` with `f` the
//! enclosing function is rewritten into a loop: arguments are evaluated
//! into temporaries, parameters reassigned, and the loop continues.
//! Self-tail calls only; mutual recursion is left alone.

use super::OptimizationPass;
use crate::parser::ast::*;
use crate::parser::token::Span;

#[derive(Debug, Default)]
pub struct TailCallPass {
    transformations: usize,
}

impl TailCallPass {
    pub fn new() -> Self {
        Self::default()
    }
}

impl OptimizationPass for TailCallPass {
    fn name(&self) -> &'static str {
        "TailCallOptimization"
    }

    fn run(&mut self, program: &mut Program) -> usize {
        let mut count = 0usize;
        for statement in &mut program.statements {
            if let Statement::Fn(decl) = statement {
                count += convert_function(decl);
            }
        }
        self.transformations = count;
        count
    }
}

fn convert_function(decl: &mut FnDecl) -> usize {
    let Some(body) = &mut decl.body else {
        return 0;
    };
    if !has_self_tail_call(body, &decl.name) {
        return 0;
    }

    let name = decl.name.clone();
    let params: Vec<String> = decl.params.iter().map(|p| p.name.clone()).collect();
    let mut count = 0usize;
    let mut loop_body = std::mem::take(body);
    rewrite_tail_calls(&mut loop_body, &name, &params, &mut count);

    // A fall-through off the loop end must still return
    if !ends_in_exit(&loop_body) {
        loop_body.push(Statement::Return(ReturnStmt {
            value: None,
            span: decl.span,
        }));
    }

    *body = vec![Statement::Loop(LoopStmt {
        body: loop_body,
        label: None,
        span: decl.span,
    })];
    count
}

fn ends_in_exit(statements: &[Statement]) -> bool {
    matches!(
        statements.last(),
        Some(Statement::Return(_)) | Some(Statement::Continue(_)) | Some(Statement::Break(_))
    )
}

fn has_self_tail_call(statements: &[Statement], name: &str) -> bool {
    statements.iter().any(|statement| match statement {
        Statement::Return(ret) => is_self_call(ret.value.as_ref(), name),
        Statement::If(s) => {
            has_self_tail_call(&s.then_branch, name)
                || s.elif_branches
                    .iter()
                    .any(|(_, b)| has_self_tail_call(b, name))
                || s.else_branch
                    .as_ref()
                    .is_some_and(|b| has_self_tail_call(b, name))
        }
        Statement::Block(b) => has_self_tail_call(&b.statements, name),
        _ => false,
    })
}

fn is_self_call(value: Option<&Expression>, name: &str) -> bool {
    matches!(
        value,
        Some(Expression::Call(call)) if call.callee.as_identifier() == Some(name)
    )
}

fn rewrite_tail_calls(
    statements: &mut Vec<Statement>,
    name: &str,
    params: &[String],
    count: &mut usize,
) {
    let mut index = 0usize;
    while index < statements.len() {
        let replace = match &statements[index] {
            Statement::Return(ret) => is_self_call(ret.value.as_ref(), name),
            _ => false,
        };

        if replace {
            let Statement::Return(ret) = statements.remove(index) else {
                unreachable!();
            };
            let Some(Expression::Call(call)) = ret.value else {
                unreachable!();
            };
            let replacement = expand_tail_call(&call, params, ret.span);
            let added = replacement.len();
            for (offset, statement) in replacement.into_iter().enumerate() {
                statements.insert(index + offset, statement);
            }
            *count += 1;
            index += added;
            continue;
        }

        match &mut statements[index] {
            Statement::If(s) => {
                rewrite_tail_calls(&mut s.then_branch, name, params, count);
                for (_, branch) in &mut s.elif_branches {
                    rewrite_tail_calls(branch, name, params, count);
                }
                if let Some(branch) = &mut s.else_branch {
                    rewrite_tail_calls(branch, name, params, count);
                }
            }
            Statement::Block(b) => {
                rewrite_tail_calls(&mut b.statements, name, params, count);
            }
            _ => {}
        }
        index += 1;
    }
}

/// `return f(a, b)` → evaluate into temporaries, reassign parameters,
/// continue. Temporaries keep argument evaluation independent of the
/// parameter reassignments.
fn expand_tail_call(call: &CallExpr, params: &[String], span: Span) -> Vec<Statement> {
    let mut statements = Vec::with_capacity(call.args.len() * 2 + 1);
    let temps: Vec<String> = (0..call.args.len())
        .map(|i| format!("__tco_{}", i))
        .collect();

    for (temp, arg) in temps.iter().zip(&call.args) {
        statements.push(Statement::VarDecl(VarDecl {
            name: temp.clone(),
            type_name: String::new(),
            initializer: Some(arg.clone()),
            mutable: false,
            is_const: false,
            span,
        }));
    }
    for (param, temp) in params.iter().zip(&temps) {
        statements.push(Statement::Expression(ExpressionStmt {
            expression: Expression::Assign(AssignExpr {
                target: Box::new(Expression::ident(param.clone(), span)),
                op: AssignOp::Assign,
                value: Box::new(Expression::ident(temp.clone(), span)),
                span,
            }),
            span,
        }));
    }
    statements.push(Statement::Continue(ContinueStmt { label: None, span }));
    statements
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::Parser;

    fn run(source: &str) -> Program {
        let mut program = Parser::parse_source(source, "t.tyl").unwrap();
        let mut pass = TailCallPass::new();
        pass.run(&mut program);
        program
    }

    #[test]
    fn self_tail_call_becomes_loop() {
        let program = run(
            "fn count(n: int, acc: int) -> int:\n    if n <= 0:\n        return acc\n    return count(n - 1, acc + n)\n",
        );
        let body = program.find_function("count").unwrap().body.as_ref().unwrap();
        assert_eq!(body.len(), 1);
        let Statement::Loop(loop_stmt) = &body[0] else {
            panic!("expected loop");
        };
        // No self-call remains anywhere in the loop
        assert!(!has_self_tail_call(&loop_stmt.body, "count"));
        assert!(loop_stmt
            .body
            .iter()
            .any(|s| matches!(s, Statement::Continue(_))));
    }

    #[test]
    fn non_tail_recursion_is_untouched() {
        let program = run(
            "fn fact(n: int) -> int:\n    if n <= 1:\n        return 1\n    return n * fact(n - 1)\n",
        );
        let body = program.find_function("fact").unwrap().body.as_ref().unwrap();
        // `n * fact(n-1)` is not a tail call
        assert!(!matches!(&body[0], Statement::Loop(_)));
    }

    #[test]
    fn other_functions_calls_are_untouched() {
        let program = run("fn f(n: int) -> int:\n    return g(n)\n");
        let body = program.find_function("f").unwrap().body.as_ref().unwrap();
        assert!(matches!(&body[0], Statement::Return(_)));
    }
}
