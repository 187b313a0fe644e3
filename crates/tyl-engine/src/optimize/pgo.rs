//! Profile-guided optimization (Ofast).
//!
//! Reads `.prof` files in the line-oriented text format (`# tyl-profile
//! 1` header, `fn`/`br`/`lp` records) or the little-endian binary twin.
//! With a profile loaded, functions are marked hot/cold, `if`/`else`
//! arms reorder so the probable branch comes first, and inline/unroll
//! biases scale decisions for hot code.

use super::{visit_block, OptimizationPass};
use crate::parser::ast::*;
use rustc_hash::FxHashMap;
use std::io::Read;
use std::path::Path;

/// Text header line; the trailing digit is the format version.
pub const TEXT_HEADER: &str = "# tyl-profile 1";
/// Binary magic: `TYLPROF` plus a version byte.
pub const BINARY_MAGIC: [u8; 8] = *b"TYLPROF\x01";

const HOT_CALL_THRESHOLD: u64 = 1000;
const COLD_CALL_THRESHOLD: u64 = 10;

/// Default scaling applied to inline thresholds at hot call sites.
pub const INLINE_BIAS: f64 = 2.0;
/// Default scaling applied to unroll windows for hot loops.
pub const UNROLL_BIAS: f64 = 1.5;

#[derive(Debug, Clone, Default)]
pub struct BranchInfo {
    pub line: u32,
    pub taken: u64,
    pub not_taken: u64,
}

impl BranchInfo {
    pub fn taken_probability(&self) -> f64 {
        let total = self.taken + self.not_taken;
        if total == 0 {
            0.5
        } else {
            self.taken as f64 / total as f64
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct LoopInfo {
    pub line: u32,
    pub iterations: u64,
    pub entries: u64,
}

impl LoopInfo {
    pub fn average_iterations(&self) -> f64 {
        if self.entries == 0 {
            0.0
        } else {
            self.iterations as f64 / self.entries as f64
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct FunctionProfile {
    pub call_count: u64,
    pub total_cycles: u64,
    pub branches: Vec<BranchInfo>,
    pub loops: Vec<LoopInfo>,
}

/// Parsed profile data for a whole program.
#[derive(Debug, Clone, Default)]
pub struct ProgramProfile {
    pub functions: FxHashMap<String, FunctionProfile>,
}

impl ProgramProfile {
    pub fn is_hot(&self, name: &str) -> bool {
        self.functions
            .get(name)
            .map(|f| f.call_count > HOT_CALL_THRESHOLD)
            .unwrap_or(false)
    }

    pub fn is_cold(&self, name: &str) -> bool {
        self.functions
            .get(name)
            .map(|f| f.call_count < COLD_CALL_THRESHOLD)
            .unwrap_or(false)
    }

    pub fn branch_probability(&self, name: &str, line: u32) -> Option<f64> {
        self.functions
            .get(name)?
            .branches
            .iter()
            .find(|b| b.line == line)
            .map(|b| b.taken_probability())
    }

    /// Parse the line-oriented text format. Rejects version mismatches.
    pub fn parse_text(content: &str) -> Option<ProgramProfile> {
        let mut lines = content.lines();
        if lines.next()?.trim() != TEXT_HEADER {
            return None;
        }
        let mut profile = ProgramProfile::default();
        for line in lines {
            let fields: Vec<&str> = line.split_whitespace().collect();
            match fields.as_slice() {
                ["fn", name, calls, cycles] => {
                    let entry = profile.functions.entry(name.to_string()).or_default();
                    entry.call_count = calls.parse().ok()?;
                    entry.total_cycles = cycles.parse().ok()?;
                }
                ["br", func, line, taken, not_taken] => {
                    let entry = profile.functions.entry(func.to_string()).or_default();
                    entry.branches.push(BranchInfo {
                        line: line.parse().ok()?,
                        taken: taken.parse().ok()?,
                        not_taken: not_taken.parse().ok()?,
                    });
                }
                ["lp", func, line, iterations, entries] => {
                    let entry = profile.functions.entry(func.to_string()).or_default();
                    entry.loops.push(LoopInfo {
                        line: line.parse().ok()?,
                        iterations: iterations.parse().ok()?,
                        entries: entries.parse().ok()?,
                    });
                }
                [] => {}
                _ => return None,
            }
        }
        Some(profile)
    }

    /// Parse the binary twin: the magic, then tagged records with
    /// little-endian 64-bit fields.
    pub fn parse_binary(bytes: &[u8]) -> Option<ProgramProfile> {
        let mut cursor = bytes;
        let mut magic = [0u8; 8];
        cursor.read_exact(&mut magic).ok()?;
        if magic != BINARY_MAGIC {
            return None;
        }

        let mut profile = ProgramProfile::default();
        while !cursor.is_empty() {
            let mut tag = [0u8; 1];
            cursor.read_exact(&mut tag).ok()?;
            let name = read_string(&mut cursor)?;
            let entry = profile.functions.entry(name).or_default();
            match tag[0] {
                0 => {
                    entry.call_count = read_u64(&mut cursor)?;
                    entry.total_cycles = read_u64(&mut cursor)?;
                }
                1 => {
                    entry.branches.push(BranchInfo {
                        line: read_u64(&mut cursor)? as u32,
                        taken: read_u64(&mut cursor)?,
                        not_taken: read_u64(&mut cursor)?,
                    });
                }
                2 => {
                    entry.loops.push(LoopInfo {
                        line: read_u64(&mut cursor)? as u32,
                        iterations: read_u64(&mut cursor)?,
                        entries: read_u64(&mut cursor)?,
                    });
                }
                _ => return None,
            }
        }
        Some(profile)
    }

    /// Serialise to the text format (round-trip support for tooling).
    pub fn to_text(&self) -> String {
        let mut out = String::from(TEXT_HEADER);
        out.push('\n');
        let mut names: Vec<&String> = self.functions.keys().collect();
        names.sort();
        for name in names {
            let func = &self.functions[name];
            out.push_str(&format!(
                "fn {} {} {}\n",
                name, func.call_count, func.total_cycles
            ));
            for branch in &func.branches {
                out.push_str(&format!(
                    "br {} {} {} {}\n",
                    name, branch.line, branch.taken, branch.not_taken
                ));
            }
            for lp in &func.loops {
                out.push_str(&format!(
                    "lp {} {} {} {}\n",
                    name, lp.line, lp.iterations, lp.entries
                ));
            }
        }
        out
    }
}

fn read_u64(cursor: &mut &[u8]) -> Option<u64> {
    let mut buf = [0u8; 8];
    cursor.read_exact(&mut buf).ok()?;
    Some(u64::from_le_bytes(buf))
}

fn read_string(cursor: &mut &[u8]) -> Option<String> {
    let len = read_u64(cursor)? as usize;
    if cursor.len() < len {
        return None;
    }
    let (head, tail) = cursor.split_at(len);
    let name = String::from_utf8(head.to_vec()).ok()?;
    *cursor = tail;
    Some(name)
}

/// The PGO driver pass.
#[derive(Debug, Default)]
pub struct PgoPass {
    profile: Option<ProgramProfile>,
    transformations: usize,
}

impl PgoPass {
    pub fn new(profile: ProgramProfile) -> Self {
        Self {
            profile: Some(profile),
            transformations: 0,
        }
    }

    /// Load from disk, sniffing text vs binary by the magic.
    pub fn from_file(path: impl AsRef<Path>) -> Self {
        let profile = std::fs::read(path.as_ref()).ok().and_then(|bytes| {
            if bytes.starts_with(&BINARY_MAGIC) {
                ProgramProfile::parse_binary(&bytes)
            } else {
                ProgramProfile::parse_text(&String::from_utf8_lossy(&bytes))
            }
        });
        Self {
            profile,
            transformations: 0,
        }
    }
}

impl OptimizationPass for PgoPass {
    fn name(&self) -> &'static str {
        "ProfileGuidedOptimization"
    }

    fn run(&mut self, program: &mut Program) -> usize {
        let Some(profile) = self.profile.clone() else {
            return 0;
        };
        let mut count = 0usize;

        for statement in &mut program.statements {
            let Statement::Fn(decl) = statement else {
                continue;
            };
            if profile.is_hot(&decl.name) && !decl.flags.hot {
                decl.flags.hot = true;
                count += 1;
            }
            if profile.is_cold(&decl.name) && !decl.flags.cold {
                decl.flags.cold = true;
                count += 1;
            }

            let name = decl.name.clone();
            if let Some(body) = &mut decl.body {
                visit_block(body, &mut |statements| {
                    for inner in statements.iter_mut() {
                        count += reorder_branch(inner, &name, &profile);
                    }
                });
            }
        }

        self.transformations = count;
        count
    }
}

/// Swap `then`/`else` (negating the condition) when the profile says the
/// else arm is the likely one.
fn reorder_branch(statement: &mut Statement, func: &str, profile: &ProgramProfile) -> usize {
    let Statement::If(if_stmt) = statement else {
        return 0;
    };
    if !if_stmt.elif_branches.is_empty() {
        return 0;
    }
    let Some(else_branch) = &if_stmt.else_branch else {
        return 0;
    };
    let Some(probability) = profile.branch_probability(func, if_stmt.span.line) else {
        return 0;
    };
    if probability >= 0.5 {
        return 0;
    }

    let span = if_stmt.condition.span();
    let negated = Expression::Unary(UnaryExpr {
        op: UnOp::Not,
        operand: Box::new(if_stmt.condition.clone()),
        span,
    });
    let old_then = std::mem::take(&mut if_stmt.then_branch);
    if_stmt.then_branch = else_branch.clone();
    if_stmt.else_branch = Some(old_then);
    if_stmt.condition = negated;
    1
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::Parser;

    const SAMPLE: &str = "# tyl-profile 1\nfn hot_loop 5000 900000\nfn rare 2 100\nbr hot_loop 3 10 990\nlp hot_loop 4 50000 5000\n";

    #[test]
    fn parses_text_profile() {
        let profile = ProgramProfile::parse_text(SAMPLE).unwrap();
        assert!(profile.is_hot("hot_loop"));
        assert!(profile.is_cold("rare"));
        let p = profile.branch_probability("hot_loop", 3).unwrap();
        assert!(p < 0.05);
        assert_eq!(
            profile.functions["hot_loop"].loops[0].average_iterations(),
            10.0
        );
    }

    #[test]
    fn rejects_version_mismatch() {
        assert!(ProgramProfile::parse_text("# tyl-profile 2\nfn a 1 1\n").is_none());
        let mut bytes = b"TYLPROF\x02".to_vec();
        bytes.extend_from_slice(&[0u8; 8]);
        assert!(ProgramProfile::parse_binary(&bytes).is_none());
    }

    #[test]
    fn text_round_trip() {
        let profile = ProgramProfile::parse_text(SAMPLE).unwrap();
        let reparsed = ProgramProfile::parse_text(&profile.to_text()).unwrap();
        assert_eq!(
            reparsed.functions["hot_loop"].call_count,
            profile.functions["hot_loop"].call_count
        );
        assert_eq!(reparsed.functions.len(), profile.functions.len());
    }

    #[test]
    fn binary_round_trip() {
        let mut bytes = BINARY_MAGIC.to_vec();
        // fn record
        bytes.push(0);
        bytes.extend_from_slice(&(4u64).to_le_bytes());
        bytes.extend_from_slice(b"work");
        bytes.extend_from_slice(&(2000u64).to_le_bytes());
        bytes.extend_from_slice(&(1_000_000u64).to_le_bytes());
        // br record
        bytes.push(1);
        bytes.extend_from_slice(&(4u64).to_le_bytes());
        bytes.extend_from_slice(b"work");
        bytes.extend_from_slice(&(7u64).to_le_bytes());
        bytes.extend_from_slice(&(900u64).to_le_bytes());
        bytes.extend_from_slice(&(100u64).to_le_bytes());

        let profile = ProgramProfile::parse_binary(&bytes).unwrap();
        assert!(profile.is_hot("work"));
        assert_eq!(profile.functions["work"].branches[0].taken, 900);
    }

    #[test]
    fn marks_hot_and_cold_functions() {
        let mut program = Parser::parse_source(
            "fn hot_loop() -> int:\n    return 1\nfn rare() -> int:\n    return 2\n",
            "t.tyl",
        )
        .unwrap();
        let profile = ProgramProfile::parse_text(SAMPLE).unwrap();
        let mut pass = PgoPass::new(profile);
        let count = pass.run(&mut program);
        assert!(count >= 2);
        assert!(program.find_function("hot_loop").unwrap().flags.hot);
        assert!(program.find_function("rare").unwrap().flags.cold);
    }

    #[test]
    fn unlikely_branch_is_reordered() {
        // The `if` sits on line 2; the profile says it is almost never
        // taken, so the arms swap with a negated condition.
        let source = "fn hot_loop(x: int) -> int:\n    if x > 0:\n        return 1\n    else:\n        return 2\n";
        let mut program = Parser::parse_source(source, "t.tyl").unwrap();
        let profile =
            ProgramProfile::parse_text("# tyl-profile 1\nfn hot_loop 5000 1\nbr hot_loop 2 1 999\n")
                .unwrap();
        let mut pass = PgoPass::new(profile);
        pass.run(&mut program);
        let body = program.find_function("hot_loop").unwrap().body.as_ref().unwrap();
        let Statement::If(if_stmt) = &body[0] else {
            panic!("expected if");
        };
        assert!(matches!(
            &if_stmt.condition,
            Expression::Unary(u) if u.op == UnOp::Not
        ));
        assert!(matches!(
            &if_stmt.then_branch[0],
            Statement::Return(r) if r.value.as_ref().and_then(|v| v.as_int()) == Some(2)
        ));
    }
}
