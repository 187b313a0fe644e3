//! Tyl compiler command-line driver.
//!
//! Drives the pipeline: read → lex (`--tokens`) → parse → imports →
//! macro expansion → optional type-check hook → optimize (`--verbose`
//! per-pass counts) → native codegen (`--asm`). The PE/COFF writers and
//! the linker are external collaborators; until they are wired in, the
//! driver writes the raw artifact sections next to the requested output.

use clap::Parser as ClapParser;
use codespan_reporting::files::SimpleFiles;
use codespan_reporting::term;
use termcolor::{ColorChoice, StandardStream};
use std::path::PathBuf;
use std::process::ExitCode;
use tyl_engine::codegen::CodeGen;
use tyl_engine::optimize::{OptLevel, Optimizer};
use tyl_engine::parser::ast::Program;
use tyl_engine::parser::{Lexer, Parser, TokenKind};
use tyl_engine::{Diagnostic, MacroExpander, ModuleSystem};

#[derive(ClapParser)]
#[command(name = "tyl")]
#[command(about = "Tyl optimizing compiler for Windows x86-64")]
#[command(version)]
struct Cli {
    /// Source file (.tyl), or object files in link mode
    file: Option<PathBuf>,

    /// Output path (defaults: a.exe / a.dll / a.o)
    #[arg(short = 'o', value_name = "path")]
    output: Option<PathBuf>,

    /// Compile to an object file (.o/.obj)
    #[arg(short = 'S', long = "obj")]
    obj: bool,

    /// Compile to a dynamic library (.dll)
    #[arg(long)]
    dll: bool,

    /// DEF file for DLL exports
    #[arg(long, value_name = "file")]
    def: Option<PathBuf>,

    /// Also generate an import library (.lib)
    #[arg(long)]
    implib: bool,

    /// Export a symbol from the DLL (repeatable)
    #[arg(long = "export", value_name = "sym")]
    exports: Vec<String>,

    /// Link a static library (.lib/.a) or object file (.o/.obj)
    #[arg(short = 'l', value_name = "lib-or-obj")]
    libs: Vec<String>,

    /// Link mode: combine object files into an executable or DLL
    #[arg(long)]
    link: bool,

    /// Print the token stream
    #[arg(short = 't', long = "tokens")]
    tokens: bool,

    /// Print the AST
    #[arg(short = 'a', long = "ast")]
    ast: bool,

    /// Dump the generated assembly
    #[arg(short = 's', long = "asm")]
    asm: bool,

    /// Per-pass transformation counts
    #[arg(short = 'v', long = "verbose")]
    verbose: bool,

    /// Optimization level: 0..3, s, z, fast
    #[arg(short = 'O', value_name = "level", default_value = "2")]
    opt: String,

    /// Skip type checking
    #[arg(long = "no-typecheck")]
    no_typecheck: bool,

    /// Profile data for PGO (-Ofast)
    #[arg(long, value_name = "file")]
    profile: Option<PathBuf>,

    /// Emit a map file
    #[arg(long)]
    map: bool,
}

fn parse_opt_level(text: &str) -> Option<OptLevel> {
    match text {
        "0" => Some(OptLevel::O0),
        "1" => Some(OptLevel::O1),
        "2" => Some(OptLevel::O2),
        "3" => Some(OptLevel::O3),
        "s" => Some(OptLevel::Os),
        "z" => Some(OptLevel::Oz),
        "fast" => Some(OptLevel::Ofast),
        _ => None,
    }
}

enum Failure {
    /// Diagnostics were already rendered.
    Compile,
    Internal(String),
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(Failure::Compile) => ExitCode::from(1),
        Err(Failure::Internal(message)) => {
            eprintln!("internal error: {}", message);
            ExitCode::from(2)
        }
    }
}

fn render_diagnostics(filename: &str, source: &str, diagnostics: &[Diagnostic]) {
    let mut files = SimpleFiles::new();
    let file_id = files.add(filename.to_string(), source.to_string());
    let writer = StandardStream::stderr(ColorChoice::Auto);
    let config = term::Config::default();
    for diagnostic in diagnostics {
        let cs = diagnostic.to_codespan(file_id);
        let _ = term::emit(&mut writer.lock(), &config, &files, &cs);
    }
    let errors = diagnostics
        .iter()
        .filter(|d| matches!(d.level, tyl_engine::Level::Error | tyl_engine::Level::Fatal))
        .count();
    if errors > 0 {
        eprintln!("error: could not compile due to {} error(s)", errors);
    }
}

fn run(cli: Cli) -> Result<(), Failure> {
    let Some(opt_level) = parse_opt_level(&cli.opt) else {
        eprintln!("unknown optimization level: -O{}", cli.opt);
        return Err(Failure::Compile);
    };

    if cli.link {
        eprintln!("link mode requires the external linker; no object files were combined");
        return Err(Failure::Compile);
    }

    let Some(input) = cli.file.clone() else {
        eprintln!("no input file (try --help)");
        return Err(Failure::Compile);
    };

    let filename = input.to_string_lossy().into_owned();
    let source = std::fs::read_to_string(&input).map_err(|_| {
        eprintln!("error[E9001]: cannot open file: {}", filename);
        Failure::Compile
    })?;

    // Lex
    let tokens = match Lexer::new(&source, &filename).tokenize() {
        Ok(tokens) => tokens,
        Err(errors) => {
            let diagnostics: Vec<_> = errors
                .iter()
                .map(|e| tyl_engine::lex_error_to_diagnostic(e, &filename))
                .collect();
            render_diagnostics(&filename, &source, &diagnostics);
            return Err(Failure::Compile);
        }
    };

    if cli.tokens {
        print_tokens(&tokens);
    }

    // Parse
    let mut program = match Parser::new(tokens, &source, &filename).parse() {
        Ok(program) => program,
        Err(errors) => {
            let diagnostics: Vec<_> = errors
                .iter()
                .map(|e| tyl_engine::parse_error_to_diagnostic(e, &filename))
                .collect();
            render_diagnostics(&filename, &source, &diagnostics);
            return Err(Failure::Compile);
        }
    };

    // Imports: file imports merge statements; qualified imports populate
    // the module cache
    let mut modules = ModuleSystem::new();
    modules.process_imports(&mut program, &filename);
    if modules.has_errors() {
        let diagnostics: Vec<_> = modules
            .errors()
            .iter()
            .map(|e| tyl_engine::module_error_to_diagnostic(e, &filename))
            .collect();
        render_diagnostics(&filename, &source, &diagnostics);
        return Err(Failure::Compile);
    }

    // Macro expansion (before type checking)
    let mut expander = MacroExpander::new();
    expander.expand(&mut program);
    if expander.has_errors() {
        let diagnostics: Vec<_> = expander
            .errors()
            .iter()
            .map(|e| tyl_engine::expand_error_to_diagnostic(e, &filename))
            .collect();
        render_diagnostics(&filename, &source, &diagnostics);
        return Err(Failure::Compile);
    }

    // Type checking is an external collaborator (`tyl_engine::TypeCheck`);
    // --no-typecheck also skips the hook when one is configured.
    let _ = cli.no_typecheck;

    // Optimization passes
    if opt_level != OptLevel::O0 {
        let mut optimizer = Optimizer::new(opt_level);
        if let Some(profile) = &cli.profile {
            optimizer = optimizer.with_profile(profile.to_string_lossy());
        }
        optimizer.optimize(&mut program);
        if cli.verbose {
            for (pass, count) in optimizer.pass_log() {
                println!("[Optimizer] {}: {} transformation(s)", pass, count);
            }
            println!(
                "[Optimizer] Total: {} transformation(s)",
                optimizer.total_transformations()
            );
        }
    }

    if cli.ast {
        println!("=== AST ===");
        print_ast(&program);
    }

    // Native code generation
    let mut generator = CodeGen::new(&filename, opt_level);
    let artifact = match generator.compile(&program) {
        Ok(artifact) => artifact,
        Err(error) => {
            let diagnostic = tyl_engine::codegen_error_to_diagnostic(&error, &filename);
            render_diagnostics(&filename, &source, &[diagnostic]);
            return Err(Failure::Compile);
        }
    };
    if !generator.warnings().is_empty() {
        render_diagnostics(&filename, &source, generator.warnings());
    }

    if cli.asm {
        for line in &artifact.assembly {
            println!("{}", line);
        }
    }

    // Output naming per mode
    let output = cli.output.clone().unwrap_or_else(|| {
        let mut path = input.clone();
        if cli.obj {
            path.set_extension("o");
        } else if cli.dll {
            path.set_extension("dll");
        } else {
            path.set_extension("exe");
        }
        path
    });

    // The PE32+/COFF writers are external collaborators consuming the
    // artifact; write the raw sections so the pipeline stays inspectable
    // without them.
    let mut raw = artifact.code.clone();
    raw.extend_from_slice(&artifact.rdata);
    std::fs::write(&output, &raw).map_err(|e| Failure::Internal(e.to_string()))?;

    if cli.map {
        let mut map = String::new();
        for symbol in &artifact.symbols {
            map.push_str(&format!("{:08x} {}\n", symbol.offset, symbol.name));
        }
        for import in &artifact.imports {
            map.push_str(&format!("import {}!{}\n", import.dll, import.symbol));
        }
        let map_path = output.with_extension("map");
        std::fs::write(&map_path, map).map_err(|e| Failure::Internal(e.to_string()))?;
    }

    for export in &cli.exports {
        if !artifact.exports.contains(export) && !artifact.symbols.iter().any(|s| &s.name == export)
        {
            eprintln!("warning: export symbol '{}' not found in artifact", export);
        }
    }
    let _ = (&cli.def, cli.implib, &cli.libs);

    println!("Compiled to: {}", output.display());
    Ok(())
}

fn print_tokens(tokens: &[tyl_engine::Token]) {
    for token in tokens {
        if token.kind == TokenKind::Eof {
            break;
        }
        println!(
            "{:>4}:{:<3} {:?} '{}'",
            token.span.line, token.span.column, token.kind, token.lexeme
        );
    }
}

fn print_ast(program: &Program) {
    for statement in &program.statements {
        println!("{:#?}", statement);
    }
}
