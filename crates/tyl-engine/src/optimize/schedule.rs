//! Instruction scheduling (O3+).
//!
//! List-scheduling over straight-line statement runs using a per-statement
//! dependency graph: RAW/WAR/WAW edges on variable names, with calls and
//! other side-effecting statements acting as hard barriers. Priority is
//! critical-path length, so long dependency chains start early.
//!
//! The machine-code level keeps a minimal x64 latency/throughput table;
//! reordering raw bytes would need full instruction decoding, so the
//! byte scheduler only exposes the table for the code generator's use.

use super::{collect_reads, for_each_block, has_side_effects, visit_stmt_exprs, OptimizationPass};
use crate::parser::ast::*;
use rustc_hash::FxHashSet;

/// Latency/throughput estimate for an x64 instruction class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InstructionLatency {
    pub latency: u32,
    pub throughput: u32,
}

/// Minimal latency table keyed by primary opcode byte.
pub fn instruction_latency(opcode: u8) -> InstructionLatency {
    match opcode {
        // imul (0x0F 0xAF reaches here as 0xAF)
        0xAF => InstructionLatency {
            latency: 3,
            throughput: 1,
        },
        // div/idiv group
        0xF7 => InstructionLatency {
            latency: 20,
            throughput: 10,
        },
        // mov r/m
        0x89 | 0x8B | 0xB8 => InstructionLatency {
            latency: 1,
            throughput: 1,
        },
        // add/sub/cmp group
        0x01 | 0x03 | 0x29 | 0x2B | 0x39 | 0x3B | 0x81 | 0x83 => InstructionLatency {
            latency: 1,
            throughput: 1,
        },
        // lea
        0x8D => InstructionLatency {
            latency: 1,
            throughput: 2,
        },
        // call
        0xE8 => InstructionLatency {
            latency: 25,
            throughput: 2,
        },
        _ => InstructionLatency {
            latency: 1,
            throughput: 1,
        },
    }
}

#[derive(Debug)]
struct ScheduleNode {
    original_index: usize,
    reads: FxHashSet<String>,
    writes: FxHashSet<String>,
    latency: u32,
    predecessors: Vec<usize>,
    successors: Vec<usize>,
    priority: u32,
}

#[derive(Debug, Default)]
pub struct InstructionSchedulerPass {
    transformations: usize,
}

impl InstructionSchedulerPass {
    pub fn new() -> Self {
        Self::default()
    }
}

impl OptimizationPass for InstructionSchedulerPass {
    fn name(&self) -> &'static str {
        "InstructionScheduler"
    }

    fn run(&mut self, program: &mut Program) -> usize {
        let mut count = 0usize;
        for_each_block(program, &mut |statements| {
            count += schedule_runs(statements);
        });
        self.transformations = count;
        count
    }
}

/// True for statements that may be reordered within a run. Everything
/// else (calls, control flow, declarations with side effects) is a
/// barrier.
fn is_schedulable(statement: &Statement) -> bool {
    match statement {
        Statement::VarDecl(decl) => decl
            .initializer
            .as_ref()
            .map(|init| !has_side_effects(init))
            .unwrap_or(true),
        Statement::Expression(stmt) => match &stmt.expression {
            Expression::Assign(assign) => {
                assign.target.as_identifier().is_some() && !has_side_effects(&assign.value)
            }
            _ => false,
        },
        _ => false,
    }
}

fn schedule_runs(statements: &mut Vec<Statement>) -> usize {
    let mut count = 0usize;
    let mut start = 0usize;
    while start < statements.len() {
        if !is_schedulable(&statements[start]) {
            start += 1;
            continue;
        }
        let mut end = start;
        while end < statements.len() && is_schedulable(&statements[end]) {
            end += 1;
        }
        if end - start >= 2 {
            count += schedule_window(&mut statements[start..end]);
        }
        start = end;
    }
    count
}

fn statement_io(statement: &Statement) -> (FxHashSet<String>, FxHashSet<String>) {
    let mut reads = FxHashSet::default();
    let mut writes = FxHashSet::default();
    match statement {
        Statement::VarDecl(decl) => {
            writes.insert(decl.name.clone());
            if let Some(init) = &decl.initializer {
                collect_reads(init, &mut reads);
            }
        }
        Statement::Expression(stmt) => {
            if let Expression::Assign(assign) = &stmt.expression {
                if let Some(name) = assign.target.as_identifier() {
                    writes.insert(name.to_string());
                    if assign.op != AssignOp::Assign {
                        reads.insert(name.to_string());
                    }
                }
                collect_reads(&assign.value, &mut reads);
            }
        }
        _ => {}
    }
    (reads, writes)
}

fn statement_latency(statement: &Statement) -> u32 {
    let mut latency = 1u32;
    let mut clone = statement.clone();
    visit_stmt_exprs(&mut clone, &mut |expr| {
        if let Expression::Binary(binary) = expr {
            latency = latency.max(match binary.op {
                BinOp::Mul => 3,
                BinOp::Div | BinOp::Mod => 20,
                _ => 1,
            });
        }
    });
    latency
}

fn schedule_window(window: &mut [Statement]) -> usize {
    let n = window.len();
    let mut nodes: Vec<ScheduleNode> = window
        .iter()
        .enumerate()
        .map(|(index, statement)| {
            let (reads, writes) = statement_io(statement);
            ScheduleNode {
                original_index: index,
                reads,
                writes,
                latency: statement_latency(statement),
                predecessors: Vec::new(),
                successors: Vec::new(),
                priority: 0,
            }
        })
        .collect();

    // Dependency edges i -> j for i < j
    for j in 0..n {
        for i in 0..j {
            let raw = nodes[j].reads.iter().any(|r| nodes[i].writes.contains(r));
            let war = nodes[j].writes.iter().any(|w| nodes[i].reads.contains(w));
            let waw = nodes[j].writes.iter().any(|w| nodes[i].writes.contains(w));
            if raw || war || waw {
                nodes[j].predecessors.push(i);
                nodes[i].successors.push(j);
            }
        }
    }

    // Priority = critical-path length to any sink (reverse order works
    // because edges only point forward)
    for index in (0..n).rev() {
        let best_successor = nodes[index]
            .successors
            .iter()
            .map(|&s| nodes[s].priority)
            .max()
            .unwrap_or(0);
        nodes[index].priority = nodes[index].latency + best_successor;
    }

    // Greedy list scheduling
    let mut scheduled: Vec<usize> = Vec::with_capacity(n);
    let mut placed = vec![false; n];
    while scheduled.len() < n {
        let mut best: Option<usize> = None;
        for (index, node) in nodes.iter().enumerate() {
            if placed[index] {
                continue;
            }
            if node.predecessors.iter().any(|&p| !placed[p]) {
                continue;
            }
            best = match best {
                None => Some(index),
                Some(current) => {
                    // Higher priority first; original order breaks ties
                    if nodes[index].priority > nodes[current].priority {
                        Some(index)
                    } else {
                        Some(current)
                    }
                }
            };
        }
        let chosen = best.expect("dependency graph is acyclic");
        placed[chosen] = true;
        scheduled.push(chosen);
    }

    let moved = scheduled
        .iter()
        .enumerate()
        .filter(|(position, &index)| *position != nodes[index].original_index)
        .count();
    if moved == 0 {
        return 0;
    }

    let originals: Vec<Statement> = window.to_vec();
    for (position, &index) in scheduled.iter().enumerate() {
        window[position] = originals[nodes[index].original_index].clone();
    }
    moved
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::Parser;

    fn run(source: &str) -> Program {
        let mut program = Parser::parse_source(source, "t.tyl").unwrap();
        let mut pass = InstructionSchedulerPass::new();
        pass.run(&mut program);
        program
    }

    #[test]
    fn dependent_chain_keeps_order() {
        let program = run(
            "fn f(a: int) -> int:\n    let b = a + 1\n    let c = b + 1\n    let d = c + 1\n    return d\n",
        );
        let body = program.find_function("f").unwrap().body.as_ref().unwrap();
        let names: Vec<_> = body
            .iter()
            .filter_map(|s| match s {
                Statement::VarDecl(v) => Some(v.name.clone()),
                _ => None,
            })
            .collect();
        assert_eq!(names, vec!["b", "c", "d"]);
    }

    #[test]
    fn long_latency_chain_is_prioritised() {
        // The division chain is the critical path; its head should be
        // scheduled before the independent cheap add.
        let program = run(
            "fn f(a: int, b: int) -> int:\n    let cheap = a + 1\n    let slow = b / 3\n    let slower = slow / 5\n    return cheap + slower\n",
        );
        let body = program.find_function("f").unwrap().body.as_ref().unwrap();
        let names: Vec<_> = body
            .iter()
            .filter_map(|s| match s {
                Statement::VarDecl(v) => Some(v.name.clone()),
                _ => None,
            })
            .collect();
        assert_eq!(names[0], "slow");
    }

    #[test]
    fn calls_are_barriers() {
        let program = run(
            "fn f(a: int) -> int:\n    let x = a + 1\n    g()\n    let y = a / 2\n    return x + y\n",
        );
        let body = program.find_function("f").unwrap().body.as_ref().unwrap();
        // g() stays put between the two declarations
        assert!(matches!(&body[1], Statement::Expression(_)));
    }

    #[test]
    fn latency_table_classes() {
        assert_eq!(instruction_latency(0xAF).latency, 3);
        assert!(instruction_latency(0xF7).latency >= 20);
        assert_eq!(instruction_latency(0x8B).latency, 1);
    }
}
