// Copyright 2024 Cornell University
// released under BSD 3-Clause License
// author: Kevin Laeufer <laeufer@cornell.edu>

//! Ranking of suspicious statements.

use crate::encode::{ConstraintId, ProvenanceMap};
use crate::localize::{Diagnosis, LocalizationCore};
use crate::program::{ProgramModel, StmtId};
use crate::weight::WeightedConstraintSet;
use codespan_reporting::diagnostic::{Diagnostic, Label};
use codespan_reporting::files::SimpleFile;
use codespan_reporting::term;
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Suspect {
    /// Dense rank starting at 1. Statements of equal weight share a rank.
    pub rank: u32,
    pub stmt: StmtId,
    /// Sum of the weights of all core constraints of the statement.
    pub weight: u64,
    pub constraints: Vec<ConstraintId>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LocalizationResult {
    suspects: Vec<Suspect>,
    cost: u64,
}

impl LocalizationResult {
    /// Ordered by rank and then by statement.
    pub fn suspects(&self) -> &[Suspect] {
        &self.suspects
    }

    pub fn cost(&self) -> u64 {
        self.cost
    }

    pub fn is_empty(&self) -> bool {
        self.suspects.is_empty()
    }

    pub fn rank_of(&self, stmt: StmtId) -> Option<u32> {
        self.suspects
            .iter()
            .find(|s| s.stmt == stmt)
            .map(|s| s.rank)
    }

    pub fn statements(&self) -> Diagnosis {
        self.suspects.iter().map(|s| s.stmt).collect()
    }
}

/// Maps the constraints of `core` to statements and ranks them by weight.
///
/// # Panics
/// If a core constraint has no provenance. The encoder records one for every constraint.
pub fn build_result(
    core: &LocalizationCore,
    provenance: &ProvenanceMap,
    weighted: &WeightedConstraintSet,
) -> LocalizationResult {
    let mut per_stmt: BTreeMap<StmtId, (u64, Vec<ConstraintId>)> = BTreeMap::new();
    for id in core.constraints.iter() {
        let stmt = provenance
            .get(*id)
            .unwrap_or_else(|| panic!("no provenance recorded for {id}"));
        let weight = weighted.weight(*id).soft().unwrap_or(0);
        let entry = per_stmt.entry(stmt).or_default();
        entry.0 = entry.0.saturating_add(weight);
        entry.1.push(*id);
    }
    let mut ordered: Vec<_> = per_stmt.into_iter().collect();
    ordered.sort_by_key(|(stmt, (weight, _))| (*weight, *stmt));

    let mut suspects = Vec::with_capacity(ordered.len());
    let mut rank = 0;
    let mut last_weight = None;
    for (stmt, (weight, constraints)) in ordered {
        if last_weight != Some(weight) {
            rank += 1;
            last_weight = Some(weight);
        }
        suspects.push(Suspect {
            rank,
            stmt,
            weight,
            constraints,
        });
    }
    LocalizationResult {
        suspects,
        cost: core.cost,
    }
}

/// Human readable report. Annotates the source text when the program carries one.
pub fn render(result: &LocalizationResult, program: &(impl ProgramModel + ?Sized)) -> String {
    if result.is_empty() {
        return "no suspicious statements".to_string();
    }
    if let Some((name, text)) = program.source() {
        if let Some(annotated) = render_source(result, program, name, text) {
            return annotated;
        }
    }
    render_table(result, program)
}

fn render_table(result: &LocalizationResult, program: &(impl ProgramModel + ?Sized)) -> String {
    let mut lines = vec![];
    for s in result.suspects() {
        let mut line = format!("#{} {} weight={}", s.rank, s.stmt, s.weight);
        if let Some(number) = program.source_line(s.stmt) {
            line.push_str(&format!(" line={number}"));
        }
        lines.push(line);
    }
    lines.join("\n")
}

fn line_range(text: &str, line: u32) -> Option<std::ops::Range<usize>> {
    let mut start = 0;
    for (ii, content) in text.split_inclusive('\n').enumerate() {
        if ii + 1 == line as usize {
            let trimmed = content.trim_end();
            let indent = trimmed.len() - trimmed.trim_start().len();
            return Some(start + indent..start + trimmed.len());
        }
        start += content.len();
    }
    None
}

fn render_source(
    result: &LocalizationResult,
    program: &(impl ProgramModel + ?Sized),
    name: &str,
    text: &str,
) -> Option<String> {
    let mut labels = vec![];
    for s in result.suspects() {
        let range = program
            .source_line(s.stmt)
            .and_then(|line| line_range(text, line))?;
        let label = if s.rank == 1 {
            Label::primary((), range)
        } else {
            Label::secondary((), range)
        };
        let msg = format!("rank {} ({}, weight {})", s.rank, s.stmt, s.weight);
        labels.push(label.with_message(msg));
    }
    let diagnostic = Diagnostic::warning()
        .with_message(format!("{} suspicious statements", result.suspects().len()))
        .with_labels(labels);
    let file = SimpleFile::new(name, text);
    let mut writer = term::termcolor::NoColor::new(Vec::new());
    let config = term::Config::default();
    term::emit(&mut writer, &config, &file, &diagnostic).ok()?;
    String::from_utf8(writer.into_inner()).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encode::{encode_path, PathSpec};
    use crate::ir::Context;
    use crate::program::*;
    use crate::weight::{assign_weights, AssignOptions, WeightTable};

    /// `x = a + 1; y = x; assert(y == a)` where both assignments carry a source line
    fn increment(ctx: &mut Context, with_source: bool) -> (Program, PathSpec) {
        let a = ctx.bv_symbol("a", 4);
        let x = ctx.bv_symbol("x", 4);
        let y = ctx.bv_symbol("y", 4);
        let one = ctx.one(4);
        let inc = ctx.add(a, one);
        let ok = ctx.equal(y, a);
        let mut b = ProgramBuilder::new();
        let main = b.function("main", &[a]);
        let entry = b.block(main);
        b.push_at(entry, Instruction::Assign { target: x, value: inc }, 2);
        b.push_at(entry, Instruction::Assign { target: y, value: x }, 3);
        let check = b.push_at(entry, Instruction::Assert { cond: ok }, 4);
        b.push(entry, Instruction::Branch(Terminator::Return(vec![])));
        if with_source {
            let text = "int inc(int a) {\n  int x = a + 1;\n  int y = x;\n  assert(y == a);\n}\n";
            b.source("inc.c", text);
        }
        let spec = PathSpec::new(main, vec![entry]).with_assertion(check);
        (b.build(ctx).unwrap(), spec)
    }

    fn both_statements() -> LocalizationCore {
        LocalizationCore {
            constraints: vec![ConstraintId::from_index(0), ConstraintId::from_index(1)],
            cost: 20,
            stmts: vec![],
        }
    }

    #[test]
    fn equal_weights_share_a_rank() {
        let mut ctx = Context::default();
        let (program, spec) = increment(&mut ctx, false);
        let set = encode_path(&mut ctx, &program, &spec).unwrap();
        let weighted = assign_weights(&set, &WeightTable::default(), &AssignOptions::default());
        let result = build_result(&both_statements(), set.provenance(), &weighted);
        let ranks = result
            .suspects()
            .iter()
            .map(|s| (s.rank, s.stmt.to_string(), s.weight))
            .collect::<Vec<_>>();
        assert_eq!(
            ranks,
            [(1, "bb0:0".to_string(), 10), (1, "bb0:1".to_string(), 10)]
        );
        assert_eq!(result.cost(), 20);
        insta::assert_snapshot!(render(&result, &program), @r###"
        #1 bb0:0 weight=10 line=2
        #1 bb0:1 weight=10 line=3
        "###);
    }

    #[test]
    fn annotate_source() {
        let mut ctx = Context::default();
        let (program, spec) = increment(&mut ctx, true);
        let set = encode_path(&mut ctx, &program, &spec).unwrap();
        let weighted = assign_weights(&set, &WeightTable::default(), &AssignOptions::default());
        let result = build_result(&both_statements(), set.provenance(), &weighted);
        let report = render(&result, &program);
        assert!(report.contains("2 suspicious statements"), "{report}");
        assert!(report.contains("inc.c"), "{report}");
        assert!(report.contains("rank 1 (bb0:0, weight 10)"), "{report}");
        assert!(report.contains("int x = a + 1;"), "{report}");
    }

    #[test]
    fn empty_core() {
        let mut ctx = Context::default();
        let (program, spec) = increment(&mut ctx, false);
        let set = encode_path(&mut ctx, &program, &spec).unwrap();
        let weighted = assign_weights(&set, &WeightTable::default(), &AssignOptions::default());
        let result = build_result(&LocalizationCore::default(), set.provenance(), &weighted);
        assert!(result.is_empty());
        assert_eq!(render(&result, &program), "no suspicious statements");
    }

    #[test]
    #[should_panic(expected = "no provenance recorded for c7")]
    fn missing_provenance() {
        let mut ctx = Context::default();
        let (program, spec) = increment(&mut ctx, false);
        let set = encode_path(&mut ctx, &program, &spec).unwrap();
        let weighted = assign_weights(&set, &WeightTable::default(), &AssignOptions::default());
        let core = LocalizationCore {
            constraints: vec![ConstraintId::from_index(7)],
            cost: 10,
            stmts: vec![],
        };
        build_result(&core, set.provenance(), &weighted);
    }
}
