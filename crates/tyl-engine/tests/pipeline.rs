//! End-to-end pipeline tests: lex → parse → expand → optimize → codegen
//! over small programs, checking the transformations the optimizer is
//! contracted to make and the artifacts the backend produces.

use tyl_engine::codegen::CodeGen;
use tyl_engine::optimize::{OptLevel, Optimizer};
use tyl_engine::parser::ast::{Expression, Statement};
use tyl_engine::parser::TokenKind;
use tyl_engine::{Lexer, MacroExpander};

fn optimized(source: &str, level: OptLevel) -> tyl_engine::parser::ast::Program {
    let mut program = tyl_engine::parse_program(source, "test.tyl").expect("parse ok");
    let mut expander = MacroExpander::new();
    expander.expand(&mut program);
    assert!(!expander.has_errors(), "{:?}", expander.errors());
    let mut optimizer = Optimizer::new(level);
    optimizer.optimize(&mut program);
    program
}

fn return_value_of(program: &tyl_engine::parser::ast::Program, name: &str) -> Option<i64> {
    let body = program.find_function(name)?.body.as_ref()?;
    for statement in body {
        if let Statement::Return(ret) = statement {
            return ret.value.as_ref().and_then(|v| v.as_int());
        }
    }
    None
}

#[test]
fn lexer_balance_on_nested_blocks() {
    let source = "fn main():\n    if a:\n        if b:\n            x = 1\n    y = 2\n";
    let tokens = Lexer::new(source, "t.tyl").tokenize().unwrap();
    let indents = tokens.iter().filter(|t| t.kind == TokenKind::Indent).count();
    let dedents = tokens.iter().filter(|t| t.kind == TokenKind::Dedent).count();
    assert_eq!(indents, dedents);
}

// Literal round-trip: a literal token's canonical string re-lexes to a
// single token with the same kind and value.
#[test]
fn literal_canonical_round_trip() {
    let tokens = Lexer::new("42 3.5 \"hey\" true", "t.tyl").tokenize().unwrap();
    for token in tokens.iter().filter(|t| t.kind.is_literal()) {
        let canonical = match token.kind {
            TokenKind::Integer => token.literal.as_int().unwrap().to_string(),
            TokenKind::Float => token.literal.as_float().unwrap().to_string(),
            TokenKind::Str => format!("\"{}\"", token.literal.as_str().unwrap()),
            _ => token.lexeme.clone(),
        };
        let relexed = Lexer::new(&canonical, "t.tyl").tokenize().unwrap();
        assert_eq!(relexed[0].kind, token.kind, "kind for {}", canonical);
        assert_eq!(relexed[0].literal, token.literal, "value for {}", canonical);
    }
}

// S1: `return 2+3*4` at -O1 folds to a single IntegerLiteral(14).
#[test]
fn s1_constant_folding_to_14() {
    let program = optimized("fn main() -> int:\n    return 2 + 3 * 4\n", OptLevel::O1);
    assert_eq!(return_value_of(&program, "main"), Some(14));
}

// S2: `const N :: 10` propagates; N is inlined and never a runtime
// variable.
#[test]
fn s2_const_propagates_into_main() {
    let program = optimized(
        "const N :: 10\nfn main() -> int:\n    return N + 1\n",
        OptLevel::O2,
    );
    assert_eq!(return_value_of(&program, "main"), Some(11));
}

// S3: unroll + accumulator collapse `for i in 1..=5 { x = x + i }` to
// `mut x = 15`.
#[test]
fn s3_accumulator_collapse() {
    let program = optimized(
        "fn main() -> int:\n    mut x = 0\n    for i in 1..=5:\n        x = x + i\n    return x\n",
        OptLevel::O2,
    );
    let body = program.find_function("main").unwrap().body.as_ref().unwrap();
    assert!(
        !body.iter().any(|s| matches!(s, Statement::For(_))),
        "loop should be unrolled away"
    );
    assert!(body.iter().any(|s| matches!(
        s,
        Statement::VarDecl(v) if v.initializer.as_ref().and_then(|i| i.as_int()) == Some(15)
    )));
}

// S4: CTFE collapses fact(5) to 120.
#[test]
fn s4_ctfe_factorial() {
    let program = optimized(
        "fn fact(n: int) -> int:\n    return 1 if n <= 1 else n * fact(n - 1)\nfn main() -> int:\n    return fact(5)\n",
        OptLevel::O2,
    );
    assert_eq!(return_value_of(&program, "main"), Some(120));
}

// S5: `[int; 4]` allocates 32 bytes with elements at 0/8/16/24.
#[test]
fn s5_fixed_array_codegen() {
    let mut program = tyl_engine::parse_program(
        "fn main() -> int:\n    let a: [int; 4] = [10, 20, 30, 40]\n    return a[2]\n",
        "t.tyl",
    )
    .unwrap();
    let mut expander = MacroExpander::new();
    expander.expand(&mut program);
    let artifact = CodeGen::new("t.tyl", OptLevel::O0)
        .compile(&program)
        .unwrap();
    // HeapAlloc size request of exactly 32 bytes
    assert!(artifact
        .code
        .windows(7)
        .any(|w| w == [0x48, 0xC7, 0xC0, 0x20, 0x00, 0x00, 0x00]));
    // Stores to offsets 8, 16 and 24
    for offset in [8u8, 16, 24] {
        assert!(
            artifact
                .code
                .windows(7)
                .any(|w| w == [0x48, 0x89, 0x88, offset, 0x00, 0x00, 0x00]),
            "missing element store at offset {}",
            offset
        );
    }
}

// S7: a refinement-typed declaration with a failing constant emits a
// compile-time warning and always a runtime check with the exact
// message.
#[test]
fn s7_refinement_warning_and_runtime_message() {
    let program = tyl_engine::parse_program(
        "type Positive = int where _ > 0\nfn main() -> int:\n    let x: Positive = -3\n    return 0\n",
        "t.tyl",
    )
    .unwrap();
    let mut generator = CodeGen::new("t.tyl", OptLevel::O0);
    let artifact = generator.compile(&program).unwrap();
    let rdata = String::from_utf8_lossy(&artifact.rdata);
    assert!(rdata.contains("Refinement type constraint failed for type 'Positive'"));
    assert!(artifact.imports.iter().any(|i| i.symbol == "ExitProcess"));
    // The constant initializer also fails at compile time: a warning
    assert!(generator
        .warnings()
        .iter()
        .any(|w| w.message.contains("does not satisfy")));
}

// Inlining must not duplicate side effects (property 6): an argument
// read twice keeps the call.
#[test]
fn inlining_preserves_single_argument_evaluation() {
    let program = optimized(
        "fn sq(x: int) -> int:\n    return x * x\nfn main() -> int:\n    return sq(effectful())\n",
        OptLevel::O2,
    );
    let body = program.find_function("main").unwrap().body.as_ref().unwrap();
    let Statement::Return(ret) = &body[0] else {
        panic!("expected return");
    };
    assert!(matches!(ret.value.as_ref().unwrap(), Expression::Call(_)));
}

// Tail-call conversion: the converted function contains a loop and no
// self-call.
#[test]
fn tail_call_becomes_loop() {
    let program = optimized(
        "fn count(n: int, acc: int) -> int:\n    if n <= 0:\n        return acc\n    return count(n - 1, acc + n)\nfn main() -> int:\n    return count(5, 0)\n",
        OptLevel::O2,
    );
    let body = program.find_function("count").unwrap().body.as_ref().unwrap();
    assert!(matches!(body[0], Statement::Loop(_)));
}

// User operators expand deterministically whether or not registered.
#[test]
fn custom_operators_expand_to_calls() {
    let program = optimized(
        "macro infix \"**\" 6 => int_pow\nfn main() -> int:\n    let a = x ** y\n    let b = p ++ q\n    return 0\n",
        OptLevel::O0,
    );
    let body = program.find_function("main").unwrap().body.as_ref().unwrap();
    fn callee_of(s: &Statement) -> Option<&str> {
        if let Statement::VarDecl(v) = s {
            if let Some(Expression::Call(c)) = &v.initializer {
                return c.callee.as_identifier();
            }
        }
        None
    }
    assert_eq!(callee_of(&body[0]), Some("int_pow"));
    assert_eq!(callee_of(&body[1]), Some("__op_plusplus"));
}

// A full -O3 run over a mixed program stays stable and produces an
// artifact with an entry stub.
#[test]
fn o3_pipeline_produces_artifact() {
    let source = "\
fn helper(a: int) -> int:
    return a * 8

fn main() -> int:
    mut total = 0
    for i in 1..=6:
        total = total + helper(i)
    return total
";
    let mut program = tyl_engine::parse_program(source, "t.tyl").unwrap();
    let mut expander = MacroExpander::new();
    expander.expand(&mut program);
    let mut optimizer = Optimizer::new(OptLevel::O3);
    optimizer.optimize(&mut program);
    // The loop unrolls, helper inlines at every site, and strength
    // reduction turns the multiplications into shifts
    assert!(optimizer.total_transformations() > 0);
    let body = program.find_function("main").unwrap().body.as_ref().unwrap();
    assert!(!body.iter().any(|s| matches!(s, Statement::For(_))));

    let artifact = CodeGen::new("t.tyl", OptLevel::O3)
        .compile(&program)
        .unwrap();
    assert!(artifact.find_symbol("_start").is_some());
    assert!(artifact.find_symbol("main").is_some());
}

// Verbose pass accounting: the optimizer reports per-pass counts.
#[test]
fn optimizer_pass_log_reports_counts() {
    let mut program = tyl_engine::parse_program(
        "fn main() -> int:\n    return 1 + 2 + 3\n",
        "t.tyl",
    )
    .unwrap();
    let mut optimizer = Optimizer::new(OptLevel::O1);
    optimizer.optimize(&mut program);
    assert!(optimizer.total_transformations() > 0);
    assert!(optimizer
        .pass_log()
        .iter()
        .any(|(name, _)| name.starts_with("ConstantFolding")));
}
