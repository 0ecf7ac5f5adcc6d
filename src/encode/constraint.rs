// Copyright 2024 Cornell University
// released under BSD 3-Clause License
// author: Kevin Laeufer <laeufer@cornell.edu>

use super::VersionArena;
use crate::ir::{Context, ExprRef, SerializableIrNode};
use crate::program::{BlockId, StmtId};
use indexmap::IndexMap;
use std::fmt::{Display, Formatter};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ConstraintKind {
    Assignment,
    BranchCondition,
    ArrayUpdate,
    ArrayRead,
    AssertNegation,
    AssumeFact,
}

/// What part of a statement a constraint was derived from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Origin {
    Statement,
    PhiMerge,
    BranchGuard,
    BranchPolarity,
    CallArgument,
    CallReturn,
    Summary,
    InputBinding,
    PassedAssertion,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Provenance {
    pub stmt: StmtId,
    /// Taken (`true`) or not taken edge for branch constraints.
    pub polarity: Option<bool>,
    pub origin: Origin,
    /// Zero based count of earlier visits of the block in the same activation.
    pub iteration: u32,
    pub call_depth: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConstraintId(u32);

impl ConstraintId {
    pub(crate) fn from_index(index: usize) -> Self {
        Self(index as u32)
    }

    pub fn index(&self) -> usize {
        self.0 as usize
    }
}

impl Display for ConstraintId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "c{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Constraint {
    pub id: ConstraintId,
    pub kind: ConstraintKind,
    /// 1-bit formula over variable versions.
    pub formula: ExprRef,
    pub provenance: Provenance,
    /// Needs to hold for the path to be feasible. Never relaxed.
    pub hard: bool,
}

/// Maps each constraint to the statement it was generated from.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProvenanceMap {
    inner: IndexMap<ConstraintId, StmtId>,
}

impl ProvenanceMap {
    pub(crate) fn insert(&mut self, id: ConstraintId, stmt: StmtId) {
        self.inner.insert(id, stmt);
    }

    pub fn get(&self, id: ConstraintId) -> Option<StmtId> {
        self.inner.get(&id).copied()
    }

    pub fn constraints_of(&self, stmt: StmtId) -> Vec<ConstraintId> {
        self.inner
            .iter()
            .filter(|(_, s)| **s == stmt)
            .map(|(c, _)| *c)
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (ConstraintId, StmtId)> + '_ {
        self.inner.iter().map(|(c, s)| (*c, *s))
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

/// A write to an array variable on the path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArrayUpdate {
    pub stmt: StmtId,
    /// Array version produced by the write.
    pub version: ExprRef,
}

/// All constraints of one path together with the data needed to map them back to statements.
#[derive(Debug, Clone)]
pub struct ConstraintSet {
    pub(crate) constraints: Vec<Constraint>,
    pub(crate) provenance: ProvenanceMap,
    pub(crate) versions: VersionArena,
    pub(crate) path: Vec<BlockId>,
    pub(crate) assertion: Option<StmtId>,
    pub(crate) reached_assertion: bool,
    pub(crate) array_history: IndexMap<ExprRef, Vec<ArrayUpdate>>,
}

impl ConstraintSet {
    pub fn constraints(&self) -> &[Constraint] {
        &self.constraints
    }

    pub fn get(&self, id: ConstraintId) -> &Constraint {
        &self.constraints[id.index()]
    }

    pub fn provenance(&self) -> &ProvenanceMap {
        &self.provenance
    }

    pub fn versions(&self) -> &VersionArena {
        &self.versions
    }

    /// Blocks that were encoded. Always the complete requested path.
    pub fn path(&self) -> &[BlockId] {
        &self.path
    }

    pub fn assertion(&self) -> Option<StmtId> {
        self.assertion
    }

    pub fn reached_assertion(&self) -> bool {
        self.reached_assertion
    }

    /// The negated assertion at the target site.
    pub fn obligation(&self) -> Option<&Constraint> {
        self.constraints
            .iter()
            .find(|c| c.kind == ConstraintKind::AssertNegation)
    }

    pub fn hard(&self) -> impl Iterator<Item = &Constraint> {
        self.constraints.iter().filter(|c| c.hard)
    }

    pub fn soft_eligible(&self) -> impl Iterator<Item = &Constraint> {
        self.constraints.iter().filter(|c| !c.hard)
    }

    /// Writes to the array whose first version on the path is `root`, in path order.
    pub fn array_updates(&self, root: ExprRef) -> &[ArrayUpdate] {
        self.array_history
            .get(&root)
            .map(|u| u.as_slice())
            .unwrap_or(&[])
    }

    pub fn path_label(&self) -> String {
        self.path
            .iter()
            .map(|b| b.to_string())
            .collect::<Vec<_>>()
            .join(" -> ")
    }

    /// One line per constraint, mostly useful for debugging and tests.
    pub fn serialize_to_str(&self, ctx: &Context) -> String {
        let mut lines = Vec::with_capacity(self.constraints.len());
        for c in self.constraints.iter() {
            let polarity = match c.provenance.polarity {
                Some(true) => " taken",
                Some(false) => " not-taken",
                None => "",
            };
            lines.push(format!(
                "{} {} {:?}/{:?}{}{}: {}",
                c.id,
                c.provenance.stmt,
                c.kind,
                c.provenance.origin,
                polarity,
                if c.hard { " hard" } else { "" },
                c.formula.serialize_to_str(ctx)
            ));
        }
        lines.join("\n")
    }
}
