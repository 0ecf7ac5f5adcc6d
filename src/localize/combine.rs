// Copyright 2024 Cornell University
// released under BSD 3-Clause License
// author: Kevin Laeufer <laeufer@cornell.edu>

use crate::program::StmtId;
use std::collections::BTreeSet;

/// A set of statements that together explain a failure.
pub type Diagnosis = BTreeSet<StmtId>;

/// How the diagnoses of several failing inputs are merged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CombineMethod {
    /// one diagnosis containing every statement
    Flatten,
    /// Unions of one diagnosis per input, keeping only the minimal ones.
    PairwiseUnion,
    /// Hitting sets of the minimal conflicts of all inputs.
    #[default]
    MinimalHittingSets,
    /// All diagnoses side by side.
    None,
}

/// `per_input` holds the diagnoses of one failing input each. The result is sorted by size
/// and then by statements.
pub fn combine(per_input: &[Vec<Diagnosis>], method: CombineMethod) -> Vec<Diagnosis> {
    let mut out = match method {
        CombineMethod::Flatten => {
            let all: Diagnosis = per_input.iter().flatten().flatten().cloned().collect();
            if all.is_empty() {
                vec![]
            } else {
                vec![all]
            }
        }
        CombineMethod::PairwiseUnion => minimize(pairwise_union(per_input)),
        CombineMethod::MinimalHittingSets => {
            // each input's diagnoses are correction sets, their hitting sets are conflicts
            let conflicts: Vec<Diagnosis> = per_input
                .iter()
                .filter(|d| !d.is_empty())
                .flat_map(|d| minimal_hitting_sets(d))
                .collect();
            minimal_hitting_sets(&conflicts)
        }
        CombineMethod::None => per_input.iter().flatten().cloned().collect(),
    };
    sort_and_dedup(&mut out);
    out
}

fn pairwise_union(per_input: &[Vec<Diagnosis>]) -> Vec<Diagnosis> {
    let mut unions = vec![Diagnosis::new()];
    for diagnoses in per_input.iter().filter(|d| !d.is_empty()) {
        unions = unions
            .iter()
            .flat_map(|u| {
                diagnoses
                    .iter()
                    .map(move |d| u.union(d).cloned().collect::<Diagnosis>())
            })
            .collect();
    }
    if unions.iter().all(|u| u.is_empty()) {
        vec![]
    } else {
        unions
    }
}

/// All inclusion minimal sets that intersect every set in `sets`. Empty sets cannot be hit
/// and are ignored.
pub fn minimal_hitting_sets(sets: &[Diagnosis]) -> Vec<Diagnosis> {
    let mut hitting = vec![Diagnosis::new()];
    for set in sets.iter().filter(|s| !s.is_empty()) {
        let mut next = vec![];
        for h in hitting.iter() {
            if h.intersection(set).next().is_some() {
                next.push(h.clone());
            } else {
                for stmt in set.iter() {
                    let mut extended = h.clone();
                    extended.insert(*stmt);
                    next.push(extended);
                }
            }
        }
        hitting = minimize(next);
    }
    let mut out: Vec<_> = hitting.into_iter().filter(|h| !h.is_empty()).collect();
    sort_and_dedup(&mut out);
    out
}

/// Removes every set that is a proper superset of another one, and duplicates.
fn minimize(mut sets: Vec<Diagnosis>) -> Vec<Diagnosis> {
    sort_and_dedup(&mut sets);
    let mut out: Vec<Diagnosis> = vec![];
    // smaller sets come first, so a superset always finds its subset in `out`
    for set in sets {
        if !out.iter().any(|o| o.is_subset(&set)) {
            out.push(set);
        }
    }
    out
}

fn sort_and_dedup(sets: &mut Vec<Diagnosis>) {
    sets.sort_by(|a, b| a.len().cmp(&b.len()).then_with(|| a.cmp(b)));
    sets.dedup();
}
