//! Function inlining.
//!
//! Two strategies:
//! - pure single-return functions inline their return expression directly
//!   into the call expression (argument expressions are substituted
//!   exactly once);
//! - simple non-recursive functions inline at statement level with
//!   renamed locals (`$inline_<name>_<n>`).
//!
//! `main`, extern, async and recursive functions are never inlined, and
//! each callee is inlined at most `max_inline_call_count` times.

use super::{for_each_block, has_side_effects, visit_expr, visit_stmt_exprs, OptimizationPass};
use crate::parser::ast::*;
use rustc_hash::FxHashMap;

#[derive(Debug, Clone)]
struct FunctionInfo {
    decl: FnDecl,
    statement_count: usize,
    is_single_return: bool,
    is_pure: bool,
    has_recursion: bool,
}

#[derive(Debug)]
pub struct InliningPass {
    max_inline_statements: usize,
    max_inline_call_count: usize,
    functions: FxHashMap<String, FunctionInfo>,
    inline_count: FxHashMap<String, usize>,
    unique_counter: usize,
    transformations: usize,
}

impl InliningPass {
    pub fn new(max_inline_statements: usize, max_inline_call_count: usize) -> Self {
        Self {
            max_inline_statements,
            max_inline_call_count,
            functions: FxHashMap::default(),
            inline_count: FxHashMap::default(),
            unique_counter: 0,
            transformations: 0,
        }
    }

}

impl OptimizationPass for InliningPass {
    fn name(&self) -> &'static str {
        "Inlining"
    }

    fn run(&mut self, program: &mut Program) -> usize {
        self.transformations = 0;
        if self.max_inline_statements == 0 || self.max_inline_call_count == 0 {
            return 0;
        }
        self.collect(program);
        self.analyze_purity();

        // Expression-level inlining of pure single-return callees
        let mut pending = 0usize;
        {
            let functions = self.functions.clone();
            let inline_count = &mut self.inline_count;
            let max_calls = self.max_inline_call_count;
            for statement in &mut program.statements {
                visit_stmt_exprs(statement, &mut |expr| {
                    let Expression::Call(call) = expr else {
                        return;
                    };
                    let Some(name) = call.callee.as_identifier() else {
                        return;
                    };
                    let Some(info) = functions.get(name) else {
                        return;
                    };
                    if !expression_inlinable(info) {
                        return;
                    }
                    if inline_count.get(name).copied().unwrap_or(0) >= max_calls {
                        return;
                    }
                    if let Some(inlined) = inline_as_expression(info, call) {
                        *inline_count.entry(name.to_string()).or_insert(0) += 1;
                        pending += 1;
                        *expr = inlined;
                    }
                });
            }
        }
        self.transformations += pending;

        // Statement-level inlining of simple callees
        let mut counter = self.unique_counter;
        let mut statement_inlines = 0usize;
        {
            let functions = self.functions.clone();
            let inline_count = &mut self.inline_count;
            let max_calls = self.max_inline_call_count;
            let max_statements = self.max_inline_statements;
            for_each_block(program, &mut |statements| {
                statement_inlines += inline_statement_calls(
                    statements,
                    &functions,
                    inline_count,
                    max_calls,
                    max_statements,
                    &mut counter,
                );
            });
        }
        self.unique_counter = counter;
        self.transformations += statement_inlines;
        self.transformations
    }
}

impl InliningPass {
    fn collect(&mut self, program: &Program) {
        self.functions.clear();
        for statement in &program.statements {
            if let Statement::Fn(decl) = statement {
                let Some(body) = &decl.body else { continue };
                if decl.name == "main"
                    || decl.flags.is_extern
                    || decl.flags.is_async
                    || decl.flags.naked
                    || decl.flags.inline_hint == Some(false)
                {
                    continue;
                }
                let statement_count = count_statements(body);
                let has_recursion = calls_function(body, &decl.name);
                let is_single_return = body.len() == 1 && matches!(body[0], Statement::Return(_));
                self.functions.insert(
                    decl.name.clone(),
                    FunctionInfo {
                        decl: decl.clone(),
                        statement_count,
                        is_single_return,
                        is_pure: false,
                        has_recursion,
                    },
                );
            }
        }
    }

    /// Purity to a fixed point: a function is pure when its body contains
    /// no observable side effects and only calls other pure functions.
    fn analyze_purity(&mut self) {
        let names: Vec<String> = self.functions.keys().cloned().collect();
        for name in &names {
            let info = &self.functions[name];
            let pure_now = body_is_pure(info.decl.body.as_deref().unwrap_or(&[]), &|_| true);
            self.functions.get_mut(name).unwrap().is_pure = pure_now;
        }
        loop {
            let snapshot: FxHashMap<String, bool> = self
                .functions
                .iter()
                .map(|(k, v)| (k.clone(), v.is_pure))
                .collect();
            let mut changed = false;
            for name in &names {
                let info = &self.functions[name];
                if !info.is_pure {
                    continue;
                }
                let still_pure =
                    body_is_pure(info.decl.body.as_deref().unwrap_or(&[]), &|callee| {
                        snapshot.get(callee).copied().unwrap_or(false)
                    });
                if !still_pure {
                    self.functions.get_mut(name).unwrap().is_pure = false;
                    changed = true;
                }
            }
            if !changed {
                break;
            }
        }
    }
}

fn count_statements(statements: &[Statement]) -> usize {
    let mut count = 0usize;
    for statement in statements {
        count += 1;
        match statement {
            Statement::If(s) => {
                count += count_statements(&s.then_branch);
                for (_, b) in &s.elif_branches {
                    count += count_statements(b);
                }
                if let Some(b) = &s.else_branch {
                    count += count_statements(b);
                }
            }
            Statement::While(s) => count += count_statements(&s.body),
            Statement::For(s) => count += count_statements(&s.body),
            Statement::Loop(s) => count += count_statements(&s.body),
            Statement::Block(s) => count += count_statements(&s.statements),
            _ => {}
        }
    }
    count
}

fn calls_function(statements: &[Statement], name: &str) -> bool {
    let mut found = false;
    let mut clone = statements.to_vec();
    for statement in &mut clone {
        visit_stmt_exprs(statement, &mut |expr| {
            if let Expression::Call(call) = expr {
                if call.callee.as_identifier() == Some(name) {
                    found = true;
                }
            }
        });
    }
    found
}

/// Whether a body is free of observable side effects, treating calls as
/// pure when `call_is_pure` says so.
fn body_is_pure(statements: &[Statement], call_is_pure: &dyn Fn(&str) -> bool) -> bool {
    let mut pure = true;
    let mut clone = statements.to_vec();
    for statement in &mut clone {
        match statement {
            Statement::Expression(_)
            | Statement::VarDecl(_)
            | Statement::Return(_)
            | Statement::If(_)
            | Statement::While(_)
            | Statement::For(_)
            | Statement::Block(_) => {}
            _ => {
                pure = false;
                continue;
            }
        }
        visit_stmt_exprs(statement, &mut |expr| match expr {
            Expression::Call(call) => {
                match call.callee.as_identifier() {
                    Some(name) if call_is_pure(name) => {}
                    _ => pure = false,
                }
            }
            Expression::ChanSend(_)
            | Expression::ChanRecv(_)
            | Expression::Await(_)
            | Expression::Spawn(_)
            | Expression::Perform(_)
            | Expression::Resume(_)
            | Expression::New(_)
            | Expression::Deref(_)
            | Expression::MakeSync(_)
            | Expression::MakeChannel(_)
            | Expression::MakeAtomic(_)
            | Expression::MakeSmartPtr(_) => pure = false,
            _ => {}
        });
    }
    pure
}

fn expression_inlinable(info: &FunctionInfo) -> bool {
    info.is_pure && info.is_single_return && !info.has_recursion
}

/// Inline a pure single-return call as an expression, substituting each
/// argument exactly once.
fn inline_as_expression(info: &FunctionInfo, call: &CallExpr) -> Option<Expression> {
    if call.args.len() != info.decl.params.len() || !call.named_args.is_empty() {
        return None;
    }
    let Some(body) = &info.decl.body else {
        return None;
    };
    let Statement::Return(ret) = &body[0] else {
        return None;
    };
    let template = ret.value.clone()?;

    // Each parameter must be read exactly once so argument expressions are
    // not duplicated or dropped; unused parameters are fine when the
    // argument has no side effects.
    let mut env = FxHashMap::default();
    for (param, arg) in info.decl.params.iter().zip(&call.args) {
        let uses = count_uses(&template, &param.name);
        if uses > 1 {
            return None;
        }
        if uses == 0 && has_side_effects(arg) {
            return None;
        }
        env.insert(param.name.clone(), arg.clone());
    }

    let mut result = template;
    visit_expr(&mut result, &mut |expr| {
        if let Expression::Identifier(id) = expr {
            if let Some(replacement) = env.get(&id.name) {
                *expr = replacement.clone();
            }
        }
    });
    Some(result)
}

fn count_uses(expr: &Expression, name: &str) -> usize {
    let mut uses = 0usize;
    let mut clone = expr.clone();
    visit_expr(&mut clone, &mut |e| {
        if e.as_identifier() == Some(name) {
            uses += 1;
        }
    });
    uses
}

/// Statement-level inlining: `let x = f(a)` and bare `f(a)` statements
/// splice the callee body with renamed locals.
fn inline_statement_calls(
    statements: &mut Vec<Statement>,
    functions: &FxHashMap<String, FunctionInfo>,
    inline_count: &mut FxHashMap<String, usize>,
    max_calls: usize,
    max_statements: usize,
    counter: &mut usize,
) -> usize {
    let mut count = 0usize;
    let mut index = 0usize;

    while index < statements.len() {
        let target = match &statements[index] {
            Statement::VarDecl(decl) => match &decl.initializer {
                Some(Expression::Call(call)) => {
                    simple_callee(call, functions, inline_count, max_calls, max_statements)
                        .map(|name| (name, Some(decl.clone()), call.clone()))
                }
                _ => None,
            },
            Statement::Expression(stmt) => match &stmt.expression {
                Expression::Call(call) => {
                    simple_callee(call, functions, inline_count, max_calls, max_statements)
                        .map(|name| (name, None, call.clone()))
                }
                _ => None,
            },
            _ => None,
        };

        let Some((name, target_decl, call)) = target else {
            index += 1;
            continue;
        };

        let info = &functions[&name];
        let spliced = splice_call(info, &call, target_decl.as_ref(), counter);
        let Some(spliced) = spliced else {
            index += 1;
            continue;
        };

        statements.remove(index);
        let added = spliced.len();
        for (offset, statement) in spliced.into_iter().enumerate() {
            statements.insert(index + offset, statement);
        }
        *inline_count.entry(name).or_insert(0) += 1;
        count += 1;
        index += added;
    }
    count
}

fn simple_callee(
    call: &CallExpr,
    functions: &FxHashMap<String, FunctionInfo>,
    inline_count: &FxHashMap<String, usize>,
    max_calls: usize,
    max_statements: usize,
) -> Option<String> {
    let name = call.callee.as_identifier()?;
    let info = functions.get(name)?;
    if info.has_recursion
        || info.statement_count > max_statements
        || call.args.len() != info.decl.params.len()
        || !call.named_args.is_empty()
        || inline_count.get(name).copied().unwrap_or(0) >= max_calls
    {
        return None;
    }
    // Only bodies whose single return is the final statement keep their
    // semantics when spliced inline.
    let body = info.decl.body.as_deref()?;
    let returns = count_returns(body);
    let last_is_return = matches!(body.last(), Some(Statement::Return(_)));
    if returns > 1 || (returns == 1 && !last_is_return) {
        return None;
    }
    Some(name.to_string())
}

fn count_returns(statements: &[Statement]) -> usize {
    let mut count = 0usize;
    for statement in statements {
        match statement {
            Statement::Return(_) => count += 1,
            Statement::If(s) => {
                count += count_returns(&s.then_branch);
                for (_, b) in &s.elif_branches {
                    count += count_returns(b);
                }
                if let Some(b) = &s.else_branch {
                    count += count_returns(b);
                }
            }
            Statement::While(s) => count += count_returns(&s.body),
            Statement::For(s) => count += count_returns(&s.body),
            Statement::Loop(s) => count += count_returns(&s.body),
            Statement::Block(s) => count += count_returns(&s.statements),
            _ => {}
        }
    }
    count
}

fn splice_call(
    info: &FunctionInfo,
    call: &CallExpr,
    target: Option<&VarDecl>,
    counter: &mut usize,
) -> Option<Vec<Statement>> {
    let body = info.decl.body.as_deref()?;
    let id = *counter;
    *counter += 1;

    // Rename parameters and locals: $inline_<name>_<n>
    let mut renames: FxHashMap<String, String> = FxHashMap::default();
    for param in &info.decl.params {
        renames.insert(
            param.name.clone(),
            format!("$inline_{}_{}", param.name, id),
        );
    }
    collect_local_renames(body, id, &mut renames);

    let mut statements: Vec<Statement> = Vec::new();
    for (param, arg) in info.decl.params.iter().zip(&call.args) {
        statements.push(Statement::VarDecl(VarDecl {
            name: renames[&param.name].clone(),
            type_name: param.ty.clone(),
            initializer: Some(arg.clone()),
            mutable: true,
            is_const: false,
            span: call.span,
        }));
    }

    let mut cloned: Vec<Statement> = body.to_vec();
    for statement in &mut cloned {
        rename_in_statement(statement, &renames);
    }

    // The trailing return becomes the binding (or is dropped for bare
    // statement calls)
    let last_return = match cloned.last() {
        Some(Statement::Return(_)) => match cloned.pop() {
            Some(Statement::Return(ret)) => ret.value,
            _ => None,
        },
        _ => None,
    };
    statements.extend(cloned);

    if let Some(decl) = target {
        statements.push(Statement::VarDecl(VarDecl {
            name: decl.name.clone(),
            type_name: decl.type_name.clone(),
            initializer: Some(last_return.unwrap_or(Expression::NilLiteral(call.span))),
            mutable: decl.mutable,
            is_const: decl.is_const,
            span: decl.span,
        }));
    } else if let Some(value) = last_return {
        if has_side_effects(&value) {
            statements.push(Statement::Expression(ExpressionStmt {
                expression: value,
                span: call.span,
            }));
        }
    }

    Some(statements)
}

fn collect_local_renames(
    statements: &[Statement],
    id: usize,
    renames: &mut FxHashMap<String, String>,
) {
    for statement in statements {
        match statement {
            Statement::VarDecl(decl) => {
                renames
                    .entry(decl.name.clone())
                    .or_insert_with(|| format!("$inline_{}_{}", decl.name, id));
            }
            Statement::If(s) => {
                collect_local_renames(&s.then_branch, id, renames);
                for (_, b) in &s.elif_branches {
                    collect_local_renames(b, id, renames);
                }
                if let Some(b) = &s.else_branch {
                    collect_local_renames(b, id, renames);
                }
            }
            Statement::While(s) => collect_local_renames(&s.body, id, renames),
            Statement::For(s) => collect_local_renames(&s.body, id, renames),
            Statement::Loop(s) => collect_local_renames(&s.body, id, renames),
            Statement::Block(s) => collect_local_renames(&s.statements, id, renames),
            _ => {}
        }
    }
}

fn rename_in_statement(statement: &mut Statement, renames: &FxHashMap<String, String>) {
    if let Statement::VarDecl(decl) = statement {
        if let Some(new_name) = renames.get(&decl.name) {
            decl.name = new_name.clone();
        }
    }
    visit_stmt_exprs(statement, &mut |expr| {
        if let Expression::Identifier(id) = expr {
            if let Some(new_name) = renames.get(&id.name) {
                id.name = new_name.clone();
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::Parser;

    fn run(source: &str) -> Program {
        let mut program = Parser::parse_source(source, "t.tyl").unwrap();
        let mut pass = InliningPass::new(10, 5);
        pass.run(&mut program);
        program
    }

    #[test]
    fn pure_single_return_inlines_as_expression() {
        let program = run(
            "fn double(x: int) -> int:\n    return x * 2\nfn main() -> int:\n    return double(21)\n",
        );
        let body = program.find_function("main").unwrap().body.as_ref().unwrap();
        if let Statement::Return(ret) = &body[0] {
            // double(21) -> 21 * 2
            assert!(matches!(
                ret.value.as_ref().unwrap(),
                Expression::Binary(b) if b.op == BinOp::Mul
            ));
        } else {
            panic!("expected return");
        }
    }

    #[test]
    fn argument_used_twice_is_not_duplicated() {
        let program = run(
            "fn sq(x: int) -> int:\n    return x * x\nfn main() -> int:\n    return sq(f())\n",
        );
        let body = program.find_function("main").unwrap().body.as_ref().unwrap();
        // The call survives: inlining would duplicate the f() side effect
        if let Statement::Return(ret) = &body[0] {
            assert!(matches!(ret.value.as_ref().unwrap(), Expression::Call(_)));
        } else {
            panic!("expected return");
        }
    }

    #[test]
    fn recursive_functions_are_not_inlined() {
        let program = run(
            "fn fact(n: int) -> int:\n    return n * fact(n - 1)\nfn main() -> int:\n    return fact(5)\n",
        );
        let body = program.find_function("main").unwrap().body.as_ref().unwrap();
        if let Statement::Return(ret) = &body[0] {
            assert!(matches!(ret.value.as_ref().unwrap(), Expression::Call(_)));
        } else {
            panic!("expected return");
        }
    }

    #[test]
    fn statement_level_inline_renames_locals() {
        let program = run(
            "fn helper(a: int) -> int:\n    let t = a + 1\n    return t\nfn main() -> int:\n    let r = helper(f())\n    return r\n",
        );
        let body = program.find_function("main").unwrap().body.as_ref().unwrap();
        // The spliced body declares renamed locals
        assert!(body.iter().any(|s| matches!(
            s,
            Statement::VarDecl(v) if v.name.starts_with("$inline_")
        )));
        // And the binding for `r` survives
        assert!(body.iter().any(|s| matches!(
            s,
            Statement::VarDecl(v) if v.name == "r"
        )));
    }
}
