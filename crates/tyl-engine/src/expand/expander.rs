//! The macro expansion pass.
//!
//! Expansion order per compilation unit:
//! 1. Collect `macro`, `macro infix`, `syntax` and `layer` declarations
//!    into the registry (removing them from the statement stream), and
//!    activate layers named by `use layer "name"`.
//! 2. Walk the tree expanding macro call sites, rewriting user infix
//!    operators into calls, mangling unregistered custom operators, and
//!    converting DSL blocks into transformer calls or string literals.

use super::registry::MacroRegistry;
use crate::parser::ast::*;
use crate::parser::token::Span;
use rustc_hash::FxHashMap;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ExpandError {
    #[error("Macro '{name}' expects {expected} argument(s), got {actual}")]
    WrongArity {
        name: String,
        expected: usize,
        actual: usize,
        span: Span,
    },
    #[error("Unknown layer '{name}'")]
    UnknownLayer { name: String, span: Span },
}

impl ExpandError {
    pub fn span(&self) -> Span {
        match self {
            ExpandError::WrongArity { span, .. } | ExpandError::UnknownLayer { span, .. } => *span,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            ExpandError::WrongArity { .. } => "E3001",
            ExpandError::UnknownLayer { .. } => "E3002",
        }
    }
}

#[derive(Debug, Default)]
pub struct MacroExpander {
    registry: MacroRegistry,
    errors: Vec<ExpandError>,
    transformations: usize,
}

impl MacroExpander {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn errors(&self) -> &[ExpandError] {
        &self.errors
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    pub fn transformations(&self) -> usize {
        self.transformations
    }

    pub fn expand(&mut self, program: &mut Program) {
        self.collect(program);
        let statements = std::mem::take(&mut program.statements);
        program.statements = self.expand_statements(statements);
    }

    /// Collection pass: pull macro machinery out of the statement stream.
    fn collect(&mut self, program: &mut Program) {
        let statements = std::mem::take(&mut program.statements);
        let mut kept = Vec::with_capacity(statements.len());

        for statement in statements {
            match statement {
                Statement::Macro(decl) => self.registry.register_macro(decl),
                Statement::InfixMacro(decl) => self.registry.register_infix(decl),
                Statement::SyntaxMacro(decl) => self.registry.register_dsl(&decl),
                Statement::Layer(layer) => {
                    let macros = layer
                        .body
                        .into_iter()
                        .filter_map(|s| match s {
                            Statement::Macro(m) => Some(m),
                            _ => None,
                        })
                        .collect();
                    self.registry.register_layer(layer.name, macros);
                }
                Statement::Use(u) if u.is_layer => {
                    if !self.registry.activate_layer(&u.path) {
                        self.errors.push(ExpandError::UnknownLayer {
                            name: u.path.clone(),
                            span: u.span,
                        });
                    }
                }
                other => kept.push(other),
            }
        }
        program.statements = kept;
    }

    fn expand_statements(&mut self, statements: Vec<Statement>) -> Vec<Statement> {
        let mut out = Vec::with_capacity(statements.len());
        for statement in statements {
            match self.expand_statement(statement) {
                Expanded::One(s) => out.push(s),
                Expanded::Many(list) => out.extend(list),
            }
        }
        out
    }

    fn expand_statement(&mut self, statement: Statement) -> Expanded {
        match statement {
            Statement::Expression(stmt) => {
                // A statement-level macro call splices the macro body
                if let Expression::Call(call) = &stmt.expression {
                    if let Some(name) = call.callee.as_identifier() {
                        if let Some(decl) = self.registry.lookup_macro(name).cloned() {
                            return self.splice_macro_statement(&decl, call, stmt.span);
                        }
                    }
                }
                let expression = self.expand_expr(stmt.expression);
                Expanded::One(Statement::Expression(ExpressionStmt {
                    expression,
                    span: stmt.span,
                }))
            }
            Statement::DslBlock(block) => Expanded::One(self.expand_dsl_block(block)),
            other => Expanded::One(self.walk_statement(other)),
        }
    }

    fn expand_dsl_block(&mut self, block: DslBlockStmt) -> Statement {
        self.transformations += 1;
        let content = Expression::string(block.content, block.span);
        let expression = match self.registry.lookup_dsl(&block.name) {
            Some(Some(transformer)) => Expression::Call(CallExpr {
                callee: Box::new(Expression::ident(transformer.to_string(), block.span)),
                args: vec![content],
                named_args: Vec::new(),
                type_args: Vec::new(),
                span: block.span,
            }),
            _ => content,
        };
        Statement::Expression(ExpressionStmt {
            expression,
            span: block.span,
        })
    }

    fn splice_macro_statement(&mut self, decl: &MacroDecl, call: &CallExpr, span: Span) -> Expanded {
        let env = match self.bind_macro_args(decl, call) {
            Some(env) => env,
            None => {
                return Expanded::One(Statement::Expression(ExpressionStmt {
                    expression: Expression::Call(call.clone()),
                    span,
                }))
            }
        };
        self.transformations += 1;
        let body: Vec<Statement> = decl
            .body
            .iter()
            .map(|s| subst_stmt(s.clone(), &env))
            .collect();
        Expanded::Many(self.expand_statements(body))
    }

    fn bind_macro_args(
        &mut self,
        decl: &MacroDecl,
        call: &CallExpr,
    ) -> Option<FxHashMap<String, Expression>> {
        if call.args.len() != decl.params.len() {
            self.errors.push(ExpandError::WrongArity {
                name: decl.name.clone(),
                expected: decl.params.len(),
                actual: call.args.len(),
                span: call.span,
            });
            return None;
        }
        let mut env = FxHashMap::default();
        for (param, arg) in decl.params.iter().zip(&call.args) {
            let arg = self.expand_expr(arg.clone());
            // Bodies reference parameters as `$name`
            env.insert(format!("${}", param), arg.clone());
            env.insert(param.clone(), arg);
        }
        Some(env)
    }

    /// Expand a macro call in expression position: the macro body must
    /// reduce to a single expression. A trailing `if cond: a else: b`
    /// becomes a ternary.
    fn expand_macro_call(&mut self, decl: &MacroDecl, call: &CallExpr) -> Expression {
        let env = match self.bind_macro_args(decl, call) {
            Some(env) => env,
            None => return Expression::Call(call.clone()),
        };
        self.transformations += 1;

        let last = match decl.body.last() {
            Some(last) => subst_stmt(last.clone(), &env),
            None => return Expression::NilLiteral(call.span),
        };
        let result = statement_to_expression(last, call.span);
        self.expand_expr(result)
    }

    fn expand_expr(&mut self, expr: Expression) -> Expression {
        match expr {
            Expression::Call(mut call) => {
                if let Some(name) = call.callee.as_identifier() {
                    if let Some(decl) = self.registry.lookup_macro(name).cloned() {
                        return self.expand_macro_call(&decl, &call);
                    }
                }
                call.callee = Box::new(self.expand_expr(*call.callee));
                call.args = call.args.into_iter().map(|a| self.expand_expr(a)).collect();
                call.named_args = call
                    .named_args
                    .into_iter()
                    .map(|(n, a)| (n, self.expand_expr(a)))
                    .collect();
                Expression::Call(call)
            }
            Expression::Binary(binary) => self.expand_binary(*binary.left, binary.op, *binary.right, binary.span),
            Expression::Unary(mut unary) => {
                unary.operand = Box::new(self.expand_expr(*unary.operand));
                Expression::Unary(unary)
            }
            Expression::Ternary(mut t) => {
                t.condition = Box::new(self.expand_expr(*t.condition));
                t.then_expr = Box::new(self.expand_expr(*t.then_expr));
                t.else_expr = Box::new(self.expand_expr(*t.else_expr));
                Expression::Ternary(t)
            }
            Expression::Assign(mut a) => {
                a.target = Box::new(self.expand_expr(*a.target));
                a.value = Box::new(self.expand_expr(*a.value));
                Expression::Assign(a)
            }
            Expression::Member(mut m) => {
                m.object = Box::new(self.expand_expr(*m.object));
                Expression::Member(m)
            }
            Expression::Index(mut i) => {
                i.object = Box::new(self.expand_expr(*i.object));
                i.index = Box::new(self.expand_expr(*i.index));
                Expression::Index(i)
            }
            Expression::Range(mut r) => {
                r.start = Box::new(self.expand_expr(*r.start));
                r.end = Box::new(self.expand_expr(*r.end));
                Expression::Range(r)
            }
            Expression::List(mut l) => {
                l.elements = l.elements.into_iter().map(|e| self.expand_expr(e)).collect();
                Expression::List(l)
            }
            Expression::Lambda(mut l) => {
                l.body = Box::new(self.expand_expr(*l.body));
                Expression::Lambda(l)
            }
            Expression::Interpolated(mut s) => {
                s.parts = s
                    .parts
                    .into_iter()
                    .map(|part| match part {
                        InterpPart::Expr(e) => InterpPart::Expr(Box::new(self.expand_expr(*e))),
                        text => text,
                    })
                    .collect();
                Expression::Interpolated(s)
            }
            other => other,
        }
    }

    fn expand_binary(
        &mut self,
        left: Expression,
        op: BinOp,
        right: Expression,
        span: Span,
    ) -> Expression {
        let left = self.expand_expr(left);
        let right = self.expand_expr(right);

        if let BinOp::Custom(symbol) = &op {
            self.transformations += 1;
            let function = match self.registry.lookup_infix(symbol) {
                Some(decl) => decl.function.clone(),
                None => mangle_operator(symbol),
            };
            return Expression::Call(CallExpr {
                callee: Box::new(Expression::ident(function, span)),
                args: vec![left, right],
                named_args: Vec::new(),
                type_args: Vec::new(),
                span,
            });
        }

        Expression::binary(op, left, right, span)
    }

    /// Structural walk for statements that only need their children
    /// expanded.
    fn walk_statement(&mut self, statement: Statement) -> Statement {
        match statement {
            Statement::Block(mut b) => {
                b.statements = self.expand_statements(b.statements);
                Statement::Block(b)
            }
            Statement::VarDecl(mut v) => {
                v.initializer = v.initializer.map(|e| self.expand_expr(e));
                Statement::VarDecl(v)
            }
            Statement::MultiVarDecl(mut v) => {
                v.initializer = self.expand_expr(v.initializer);
                Statement::MultiVarDecl(v)
            }
            Statement::If(mut s) => {
                s.condition = self.expand_expr(s.condition);
                s.then_branch = self.expand_statements(s.then_branch);
                s.elif_branches = s
                    .elif_branches
                    .into_iter()
                    .map(|(c, b)| (self.expand_expr(c), self.expand_statements(b)))
                    .collect();
                s.else_branch = s.else_branch.map(|b| self.expand_statements(b));
                Statement::If(s)
            }
            Statement::While(mut s) => {
                s.condition = self.expand_expr(s.condition);
                s.body = self.expand_statements(s.body);
                Statement::While(s)
            }
            Statement::For(mut s) => {
                s.iterable = self.expand_expr(s.iterable);
                s.body = self.expand_statements(s.body);
                Statement::For(s)
            }
            Statement::Loop(mut s) => {
                s.body = self.expand_statements(s.body);
                Statement::Loop(s)
            }
            Statement::Match(mut s) => {
                s.scrutinee = self.expand_expr(s.scrutinee);
                s.arms = s
                    .arms
                    .into_iter()
                    .map(|mut arm| {
                        arm.guard = arm.guard.map(|g| self.expand_expr(g));
                        arm.body = self.expand_statements(arm.body);
                        arm
                    })
                    .collect();
                Statement::Match(s)
            }
            Statement::Return(mut s) => {
                s.value = s.value.map(|e| self.expand_expr(e));
                Statement::Return(s)
            }
            Statement::Fn(mut f) => {
                f.body = f.body.map(|b| self.expand_statements(b));
                Statement::Fn(f)
            }
            Statement::Lock(mut s) => {
                s.mutex = self.expand_expr(s.mutex);
                s.body = self.expand_statements(s.body);
                Statement::Lock(s)
            }
            Statement::With(mut s) => {
                s.acquire = self.expand_expr(s.acquire);
                s.body = self.expand_statements(s.body);
                Statement::With(s)
            }
            Statement::Scope(mut s) => {
                s.timeout = s.timeout.map(|e| self.expand_expr(e));
                s.body = self.expand_statements(s.body);
                Statement::Scope(s)
            }
            Statement::Unless(mut s) => {
                s.condition = self.expand_expr(s.condition);
                s.body = self.expand_statements(s.body);
                Statement::Unless(s)
            }
            Statement::Unsafe(mut s) => {
                s.body = self.expand_statements(s.body);
                Statement::Unsafe(s)
            }
            Statement::ComptimeBlock(mut s) => {
                s.body = self.expand_statements(s.body);
                Statement::ComptimeBlock(s)
            }
            Statement::Impl(mut i) => {
                i.methods = i
                    .methods
                    .into_iter()
                    .map(|mut m| {
                        m.body = m.body.map(|b| self.expand_statements(b));
                        m
                    })
                    .collect();
                Statement::Impl(i)
            }
            other => other,
        }
    }
}

enum Expanded {
    One(Statement),
    Many(Vec<Statement>),
}

/// Turn the final statement of a macro body into the macro's value.
fn statement_to_expression(statement: Statement, span: Span) -> Expression {
    match statement {
        Statement::Return(ret) => ret.value.unwrap_or(Expression::NilLiteral(span)),
        Statement::Expression(stmt) => stmt.expression,
        Statement::If(if_stmt) if if_stmt.elif_branches.is_empty() => {
            // `if cond: a else: b` as a macro tail becomes a ternary
            let then_expr = branch_value(if_stmt.then_branch, span);
            let else_expr = if_stmt
                .else_branch
                .map(|b| branch_value(b, span))
                .unwrap_or(Expression::NilLiteral(span));
            Expression::Ternary(TernaryExpr {
                condition: Box::new(if_stmt.condition),
                then_expr: Box::new(then_expr),
                else_expr: Box::new(else_expr),
                span,
            })
        }
        _ => Expression::NilLiteral(span),
    }
}

fn branch_value(mut branch: Vec<Statement>, span: Span) -> Expression {
    match branch.pop() {
        Some(last) => statement_to_expression(last, span),
        None => Expression::NilLiteral(span),
    }
}

/// Deterministic fallback function name for an unregistered custom
/// operator (`**` → `__op_starstar`).
pub fn mangle_operator(op: &str) -> String {
    let mut name = String::from("__op_");
    for ch in op.chars() {
        let part = match ch {
            '*' => "star",
            '+' => "plus",
            '-' => "minus",
            '/' => "slash",
            '%' => "percent",
            '^' => "caret",
            '@' => "at",
            '&' => "amp",
            '|' => "pipe",
            '<' => "lt",
            '>' => "gt",
            '=' => "eq",
            '!' => "bang",
            '?' => "question",
            '~' => "tilde",
            other => {
                name.push(other);
                continue;
            }
        };
        name.push_str(part);
    }
    name
}

/// Substitute macro arguments into a cloned body expression.
fn subst_expr(expr: Expression, env: &FxHashMap<String, Expression>) -> Expression {
    match expr {
        Expression::Identifier(id) => match env.get(&id.name) {
            Some(replacement) => replacement.clone(),
            None => Expression::Identifier(id),
        },
        Expression::Binary(mut b) => {
            b.left = Box::new(subst_expr(*b.left, env));
            b.right = Box::new(subst_expr(*b.right, env));
            Expression::Binary(b)
        }
        Expression::Unary(mut u) => {
            u.operand = Box::new(subst_expr(*u.operand, env));
            Expression::Unary(u)
        }
        Expression::Ternary(mut t) => {
            t.condition = Box::new(subst_expr(*t.condition, env));
            t.then_expr = Box::new(subst_expr(*t.then_expr, env));
            t.else_expr = Box::new(subst_expr(*t.else_expr, env));
            Expression::Ternary(t)
        }
        Expression::Call(mut c) => {
            c.callee = Box::new(subst_expr(*c.callee, env));
            c.args = c.args.into_iter().map(|a| subst_expr(a, env)).collect();
            Expression::Call(c)
        }
        Expression::Member(mut m) => {
            m.object = Box::new(subst_expr(*m.object, env));
            Expression::Member(m)
        }
        Expression::Index(mut i) => {
            i.object = Box::new(subst_expr(*i.object, env));
            i.index = Box::new(subst_expr(*i.index, env));
            Expression::Index(i)
        }
        Expression::Assign(mut a) => {
            a.target = Box::new(subst_expr(*a.target, env));
            a.value = Box::new(subst_expr(*a.value, env));
            Expression::Assign(a)
        }
        Expression::List(mut l) => {
            l.elements = l.elements.into_iter().map(|e| subst_expr(e, env)).collect();
            Expression::List(l)
        }
        Expression::Range(mut r) => {
            r.start = Box::new(subst_expr(*r.start, env));
            r.end = Box::new(subst_expr(*r.end, env));
            Expression::Range(r)
        }
        other => other,
    }
}

fn subst_stmt(statement: Statement, env: &FxHashMap<String, Expression>) -> Statement {
    match statement {
        Statement::Expression(mut s) => {
            s.expression = subst_expr(s.expression, env);
            Statement::Expression(s)
        }
        Statement::Return(mut s) => {
            s.value = s.value.map(|e| subst_expr(e, env));
            Statement::Return(s)
        }
        Statement::VarDecl(mut v) => {
            v.initializer = v.initializer.map(|e| subst_expr(e, env));
            Statement::VarDecl(v)
        }
        Statement::If(mut s) => {
            s.condition = subst_expr(s.condition, env);
            s.then_branch = s
                .then_branch
                .into_iter()
                .map(|st| subst_stmt(st, env))
                .collect();
            s.elif_branches = s
                .elif_branches
                .into_iter()
                .map(|(c, b)| {
                    (
                        subst_expr(c, env),
                        b.into_iter().map(|st| subst_stmt(st, env)).collect(),
                    )
                })
                .collect();
            s.else_branch = s
                .else_branch
                .map(|b| b.into_iter().map(|st| subst_stmt(st, env)).collect());
            Statement::If(s)
        }
        Statement::While(mut s) => {
            s.condition = subst_expr(s.condition, env);
            s.body = s.body.into_iter().map(|st| subst_stmt(st, env)).collect();
            Statement::While(s)
        }
        Statement::For(mut s) => {
            s.iterable = subst_expr(s.iterable, env);
            s.body = s.body.into_iter().map(|st| subst_stmt(st, env)).collect();
            Statement::For(s)
        }
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::Parser;

    fn expand(source: &str) -> Program {
        let mut program = Parser::parse_source(source, "t.tyl").expect("parse ok");
        let mut expander = MacroExpander::new();
        expander.expand(&mut program);
        assert!(!expander.has_errors(), "{:?}", expander.errors());
        program
    }

    #[test]
    fn macro_call_expands_to_expression() {
        let program = expand("macro square(x):\n    return $x * $x\nlet y = square(5)\n");
        if let Statement::VarDecl(decl) = &program.statements[0] {
            // square(5) -> 5 * 5
            assert!(matches!(
                decl.initializer.as_ref().unwrap(),
                Expression::Binary(b) if b.op == BinOp::Mul
            ));
        } else {
            panic!("expected var decl, got {:?}", program.statements[0]);
        }
    }

    #[test]
    fn macro_tail_if_becomes_ternary() {
        let program = expand(
            "macro clamp01(x):\n    if $x > 1:\n        return 1\n    else:\n        return $x\nlet y = clamp01(v)\n",
        );
        if let Statement::VarDecl(decl) = &program.statements[0] {
            assert!(matches!(
                decl.initializer.as_ref().unwrap(),
                Expression::Ternary(_)
            ));
        } else {
            panic!("expected var decl");
        }
    }

    #[test]
    fn registered_infix_operator_becomes_call() {
        let program = expand(
            "macro infix \"**\" 6 => pow_int\nlet y = a ** b\n",
        );
        if let Statement::VarDecl(decl) = &program.statements[0] {
            if let Expression::Call(call) = decl.initializer.as_ref().unwrap() {
                assert_eq!(call.callee.as_identifier(), Some("pow_int"));
                assert_eq!(call.args.len(), 2);
            } else {
                panic!("expected call");
            }
        } else {
            panic!("expected var decl");
        }
    }

    #[test]
    fn unregistered_custom_operator_mangles() {
        let program = expand("let y = a ++ b\n");
        if let Statement::VarDecl(decl) = &program.statements[0] {
            if let Expression::Call(call) = decl.initializer.as_ref().unwrap() {
                assert_eq!(call.callee.as_identifier(), Some("__op_plusplus"));
            } else {
                panic!("expected call");
            }
        } else {
            panic!("expected var decl");
        }
    }

    #[test]
    fn mangled_names_are_deterministic() {
        assert_eq!(mangle_operator("**"), "__op_starstar");
        assert_eq!(mangle_operator("++"), "__op_plusplus");
        assert_eq!(mangle_operator("%%"), "__op_percentpercent");
        assert_eq!(mangle_operator("@@"), "__op_atat");
    }

    #[test]
    fn dsl_block_with_transformer() {
        let program = expand("syntax sql => run_sql\nsql:\n    SELECT 1\n");
        if let Statement::Expression(stmt) = &program.statements[0] {
            if let Expression::Call(call) = &stmt.expression {
                assert_eq!(call.callee.as_identifier(), Some("run_sql"));
                assert!(matches!(
                    &call.args[0],
                    Expression::StringLiteral(s) if s.value.contains("SELECT 1")
                ));
            } else {
                panic!("expected transformer call");
            }
        } else {
            panic!("expected expression statement");
        }
    }

    #[test]
    fn dsl_block_without_transformer_is_string() {
        let program = expand("json:\n    {\"a\": 1}\n");
        assert!(matches!(
            &program.statements[0],
            Statement::Expression(s) if matches!(&s.expression, Expression::StringLiteral(_))
        ));
    }

    #[test]
    fn layer_macros_require_activation() {
        // Without `use layer`, the macro is not expanded
        let program = expand(
            "layer math:\n    macro double(x):\n        return $x * 2\nlet y = double(3)\n",
        );
        if let Statement::VarDecl(decl) = &program.statements[0] {
            assert!(matches!(
                decl.initializer.as_ref().unwrap(),
                Expression::Call(_)
            ));
        } else {
            panic!("expected var decl");
        }

        // With activation it expands
        let program = expand(
            "layer math:\n    macro double(x):\n        return $x * 2\nuse layer \"math\"\nlet y = double(3)\n",
        );
        if let Statement::VarDecl(decl) = &program.statements[0] {
            assert!(matches!(
                decl.initializer.as_ref().unwrap(),
                Expression::Binary(b) if b.op == BinOp::Mul
            ));
        } else {
            panic!("expected var decl");
        }
    }

    #[test]
    fn statement_macro_splices_body() {
        let program = expand(
            "macro twice(x):\n    $x\n    $x\nfn main():\n    twice(ping())\n",
        );
        if let Statement::Fn(f) = &program.statements[0] {
            assert_eq!(f.body.as_ref().unwrap().len(), 2);
        } else {
            panic!("expected fn");
        }
    }

    #[test]
    fn wrong_arity_reports_error() {
        let mut program =
            Parser::parse_source("macro square(x):\n    return $x\nlet y = square(1, 2)\n", "t.tyl")
                .unwrap();
        let mut expander = MacroExpander::new();
        expander.expand(&mut program);
        assert!(expander.has_errors());
        assert!(matches!(
            expander.errors()[0],
            ExpandError::WrongArity { expected: 1, actual: 2, .. }
        ));
    }
}
