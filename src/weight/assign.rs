// Copyright 2024 Cornell University
// released under BSD 3-Clause License
// author: Kevin Laeufer <laeufer@cornell.edu>

use super::{Weight, WeightClass, WeightTable};
use crate::encode::{ConstraintId, ConstraintKind, ConstraintSet, Provenance};
use crate::program::{BlockId, StmtId};

/// What the localizer may drop as a unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Granularity {
    /// every soft constraint on its own
    #[default]
    Constraint,
    /// all soft constraints of a statement together
    Statement,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AssignOptions {
    pub granularity: Granularity,
    /// Blocks that are known to be correct. Their constraints are never dropped.
    pub trusted_blocks: Vec<BlockId>,
}

impl AssignOptions {
    fn is_trusted(&self, stmt: StmtId) -> bool {
        self.trusted_blocks.contains(&stmt.block)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WeightedConstraint {
    pub id: ConstraintId,
    pub kind: ConstraintKind,
    pub provenance: Provenance,
    pub class: WeightClass,
    pub weight: Weight,
    /// hard in the encoding, independent of any trusted blocks
    required: bool,
}

impl WeightedConstraint {
    pub fn stmt(&self) -> StmtId {
        self.provenance.stmt
    }
}

/// Soft constraints that are kept or dropped together.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SoftGroup {
    pub stmt: StmtId,
    pub members: Vec<ConstraintId>,
    pub weight: u64,
}

/// Weights for every constraint of a [`ConstraintSet`], in constraint id order, together with
/// the soft groups in the order the localizer hands them to the solver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WeightedConstraintSet {
    constraints: Vec<WeightedConstraint>,
    groups: Vec<SoftGroup>,
    options: AssignOptions,
}

/// Assigns a weight to every constraint of `set`. Pure: the same inputs always result in the
/// same weighted set.
pub fn assign_weights(
    set: &ConstraintSet,
    table: &WeightTable,
    opts: &AssignOptions,
) -> WeightedConstraintSet {
    let constraints = set
        .constraints()
        .iter()
        .map(|c| {
            let class = WeightClass::of(c.kind, c.provenance.origin);
            WeightedConstraint {
                id: c.id,
                kind: c.kind,
                provenance: c.provenance,
                class,
                weight: Weight::Hard,
                required: c.hard,
            }
        })
        .collect();
    weigh(constraints, table, opts.clone())
}

fn weigh(
    mut constraints: Vec<WeightedConstraint>,
    table: &WeightTable,
    options: AssignOptions,
) -> WeightedConstraintSet {
    for c in constraints.iter_mut() {
        c.weight = if c.required || options.is_trusted(c.stmt()) {
            Weight::Hard
        } else {
            Weight::Soft(table.soft_weight(c.class, c.provenance.call_depth))
        };
    }

    let mut groups: Vec<SoftGroup> = vec![];
    for c in constraints.iter() {
        let Weight::Soft(weight) = c.weight else {
            continue;
        };
        let existing = match options.granularity {
            Granularity::Constraint => None,
            Granularity::Statement => groups.iter_mut().find(|g| g.stmt == c.stmt()),
        };
        match existing {
            Some(group) => {
                group.members.push(c.id);
                group.weight = group.weight.saturating_add(weight);
            }
            None => groups.push(SoftGroup {
                stmt: c.stmt(),
                members: vec![c.id],
                weight,
            }),
        }
    }
    groups.sort_by_key(|g| (g.weight, g.stmt, g.members[0]));

    WeightedConstraintSet {
        constraints,
        groups,
        options,
    }
}

impl WeightedConstraintSet {
    /// Weights the same constraints with a different table. Reassigning with the table that
    /// produced this set returns an identical set.
    pub fn reassign(&self, table: &WeightTable) -> Self {
        weigh(self.constraints.clone(), table, self.options.clone())
    }

    pub fn constraints(&self) -> &[WeightedConstraint] {
        &self.constraints
    }

    pub fn get(&self, id: ConstraintId) -> &WeightedConstraint {
        &self.constraints[id.index()]
    }

    pub fn weight(&self, id: ConstraintId) -> Weight {
        self.get(id).weight
    }

    /// Soft groups ordered by weight, statement and constraint id.
    pub fn soft(&self) -> &[SoftGroup] {
        &self.groups
    }

    pub fn hard(&self) -> impl Iterator<Item = &WeightedConstraint> {
        self.constraints.iter().filter(|c| c.weight.is_hard())
    }

    pub fn options(&self) -> &AssignOptions {
        &self.options
    }

    pub fn total_soft_weight(&self) -> u64 {
        self.groups
            .iter()
            .fold(0u64, |acc, g| acc.saturating_add(g.weight))
    }
}
