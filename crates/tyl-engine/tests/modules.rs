//! Module-system integration tests over real files on disk.

use std::fs;
use std::path::Path;
use tyl_engine::{ModuleSystem, Parser};

fn write(dir: &Path, name: &str, content: &str) -> std::path::PathBuf {
    let path = dir.join(name);
    fs::write(&path, content).unwrap();
    path
}

// S6: `a.tyl` imports `b.tyl` imports `a.tyl` reports the concrete cycle.
#[test]
fn s6_circular_import_diagnostic() {
    let dir = tempfile::tempdir().unwrap();
    let a = write(
        dir.path(),
        "a.tyl",
        "use \"b.tyl\"\nfn fa() -> int:\n    return 1\n",
    );
    write(
        dir.path(),
        "b.tyl",
        "use \"a.tyl\"\nfn fb() -> int:\n    return 2\n",
    );

    let source = fs::read_to_string(&a).unwrap();
    let mut program = Parser::parse_source(&source, &a.to_string_lossy()).unwrap();

    let mut modules = ModuleSystem::new();
    modules.process_imports(&mut program, &a.to_string_lossy());

    assert!(modules.has_errors());
    let message = modules.errors()[0].to_string();
    assert!(
        message.contains("Circular import detected"),
        "unexpected message: {}",
        message
    );
    assert!(message.contains("a.tyl -> b.tyl -> a.tyl"), "{}", message);
}

#[test]
fn diamond_imports_are_not_circular() {
    // a imports b and c; both import d — a diamond, not a cycle.
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "d.tyl", "fn shared() -> int:\n    return 4\n");
    write(dir.path(), "b.tyl", "use \"d.tyl\"\nfn fb() -> int:\n    return 2\n");
    write(dir.path(), "c.tyl", "use \"d.tyl\"\nfn fc() -> int:\n    return 3\n");
    let a = write(
        dir.path(),
        "a.tyl",
        "use \"b.tyl\"\nuse \"c.tyl\"\nfn main() -> int:\n    return shared()\n",
    );

    let source = fs::read_to_string(&a).unwrap();
    let mut program = Parser::parse_source(&source, &a.to_string_lossy()).unwrap();

    let mut modules = ModuleSystem::new();
    modules.process_imports(&mut program, &a.to_string_lossy());

    assert!(!modules.has_errors(), "{:?}", modules.errors());
    assert_eq!(
        program.functions().filter(|f| f.name == "shared").count(),
        1
    );
    assert!(program.find_function("fb").is_some());
    assert!(program.find_function("fc").is_some());
}

#[test]
fn imported_functions_participate_in_compilation() {
    let dir = tempfile::tempdir().unwrap();
    write(
        dir.path(),
        "mathutil.tyl",
        "fn triple(x: int) -> int:\n    return x * 3\n",
    );
    let main = write(
        dir.path(),
        "main.tyl",
        "use \"mathutil.tyl\"\nfn main() -> int:\n    return triple(4)\n",
    );

    let source = fs::read_to_string(&main).unwrap();
    let mut program = Parser::parse_source(&source, &main.to_string_lossy()).unwrap();
    let mut modules = ModuleSystem::new();
    modules.process_imports(&mut program, &main.to_string_lossy());
    assert!(!modules.has_errors());

    use tyl_engine::codegen::CodeGen;
    use tyl_engine::optimize::OptLevel;
    let artifact = CodeGen::new("main.tyl", OptLevel::O0)
        .compile(&program)
        .unwrap();
    assert!(artifact.find_symbol("triple").is_some());
    assert!(artifact.find_symbol("main").is_some());
}

#[test]
fn qualified_export_surface() {
    let dir = tempfile::tempdir().unwrap();
    fs::create_dir(dir.path().join("geo")).unwrap();
    write(
        dir.path(),
        "geo/shapes.tyl",
        "pub record Circle:\n    r: float\npub fn area(r: float) -> float:\n    return r * r\nfn hidden() -> int:\n    return 0\n",
    );

    let mut modules = ModuleSystem::new();
    modules.add_search_path(dir.path());
    {
        let module = modules
            .load_module("geo::shapes", "", tyl_engine::Span::synthetic())
            .expect("module loads");
        assert_eq!(module.name, "geo::shapes");
    }

    let visible = modules.visible_exports("geo::shapes");
    let names: Vec<_> = visible.iter().map(|e| e.name.as_str()).collect();
    assert!(names.contains(&"Circle"));
    assert!(names.contains(&"area"));
    assert!(!names.contains(&"hidden"));
}
