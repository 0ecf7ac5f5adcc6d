// Copyright 2024 Cornell University
// released under BSD 3-Clause License
// author: Kevin Laeufer <laeufer@cornell.edu>

use super::{Budget, MaxSatEngine, MaxSatOutcome, MaxSatSession, SolverError};
use crate::ir::*;
use baa::{ArrayMutOps, ArrayValue};
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, HashSet};

/// In-process MaxSAT engine for small instances. Drop sets are visited in ascending
/// `(cost, size, indices)` order, so the first satisfiable one is the answer. Satisfiability
/// is decided by propagating definitions `x == e` and enumerating every value of the symbols
/// that remain unconstrained.
#[derive(Debug, Clone, Copy)]
pub struct EnumerativeMaxSat {
    /// Largest number of soft formulas that we accept.
    pub max_soft: usize,
    /// Largest number of unconstrained bits that we are willing to enumerate.
    pub max_free_bits: u32,
}

impl Default for EnumerativeMaxSat {
    fn default() -> Self {
        Self {
            max_soft: 20,
            max_free_bits: 16,
        }
    }
}

impl MaxSatEngine for EnumerativeMaxSat {
    type Session = EnumerativeSession;

    fn name(&self) -> &str {
        "enumerative"
    }

    fn open(&self) -> Result<EnumerativeSession, SolverError> {
        Ok(EnumerativeSession {
            limits: *self,
            checks: 0,
        })
    }
}

pub struct EnumerativeSession {
    limits: EnumerativeMaxSat,
    checks: u64,
}

impl Drop for EnumerativeSession {
    fn drop(&mut self) {
        tracing::trace!("closing enumerative session after {} checks", self.checks);
    }
}

impl MaxSatSession for EnumerativeSession {
    fn minimal_drop(
        &mut self,
        ctx: &Context,
        hard: &[ExprRef],
        soft: &[(ExprRef, u64)],
        budget: &Budget,
    ) -> Result<MaxSatOutcome, SolverError> {
        if soft.len() > self.limits.max_soft {
            return Err(SolverError::Unsupported(format!(
                "{} soft formulas exceed the limit of {}",
                soft.len(),
                self.limits.max_soft
            )));
        }
        if soft.iter().any(|(_, w)| *w == 0) {
            return Err(SolverError::Unsupported(
                "soft formulas need a positive weight".to_string(),
            ));
        }

        let all = hard
            .iter()
            .cloned()
            .chain(soft.iter().map(|(e, _)| *e))
            .collect::<Vec<_>>();
        match self.check(ctx, all, budget)? {
            None => return Ok(MaxSatOutcome::Timeout),
            Some(true) => {
                return Ok(MaxSatOutcome::Optimum {
                    dropped: vec![],
                    cost: 0,
                })
            }
            Some(false) => {}
        }
        match self.check(ctx, hard.to_vec(), budget)? {
            None => return Ok(MaxSatOutcome::Timeout),
            Some(false) => return Ok(MaxSatOutcome::Infeasible),
            Some(true) => {}
        }

        for candidate in DropSets::new(soft) {
            let (cost, dropped) = candidate?;
            let formulas = hard
                .iter()
                .cloned()
                .chain(
                    soft.iter()
                        .enumerate()
                        .filter(|(ii, _)| dropped.binary_search(ii).is_err())
                        .map(|(_, (e, _))| *e),
                )
                .collect::<Vec<_>>();
            match self.check(ctx, formulas, budget)? {
                None => return Ok(MaxSatOutcome::Timeout),
                Some(true) => return Ok(MaxSatOutcome::Optimum { dropped, cost }),
                Some(false) => {}
            }
        }
        // dropping all soft formulas leaves the satisfiable hard formulas
        unreachable!("hard formulas were satisfiable on their own")
    }
}

impl EnumerativeSession {
    /// `None` if the budget ran out.
    fn check(
        &mut self,
        ctx: &Context,
        formulas: Vec<ExprRef>,
        budget: &Budget,
    ) -> Result<Option<bool>, SolverError> {
        self.checks += 1;
        let plan = Plan::new(ctx, &formulas);
        let free_bits = plan
            .free
            .iter()
            .fold(0u64, |acc, s| acc.saturating_add(s.get_type(ctx).bits()));
        if free_bits > self.limits.max_free_bits as u64 || free_bits >= 64 {
            return Err(SolverError::Unsupported(format!(
                "{free_bits} unconstrained bits exceed the limit of {}",
                self.limits.max_free_bits
            )));
        }
        tracing::trace!(
            "check #{}: {} formulas, {} definitions, {} free bits",
            self.checks,
            formulas.len(),
            plan.definitions.len(),
            free_bits
        );

        for assignment in 0..(1u64 << free_bits) {
            if assignment % 256 == 0 && budget.should_stop() {
                return Ok(None);
            }
            if plan.is_model(ctx, &formulas, assignment)? {
                return Ok(Some(true));
            }
        }
        Ok(Some(false))
    }
}

#[derive(Debug, Clone, Copy)]
enum Definition {
    Expr(ExprRef),
    Const(bool),
}

/// Order in which symbols receive their value: `free` symbols are enumerated, all others are
/// computed from their definition.
struct Plan {
    free: Vec<ExprRef>,
    definitions: Vec<(ExprRef, Definition)>,
}

impl Plan {
    fn new(ctx: &Context, formulas: &[ExprRef]) -> Self {
        let symbols = formulas
            .iter()
            .map(|f| collect_symbols(ctx, [*f]))
            .collect::<Vec<_>>();
        let mut unknown: Vec<ExprRef> = collect_symbols(ctx, formulas.iter().cloned());
        let mut known: HashSet<ExprRef> = HashSet::new();
        let mut free = vec![];
        let mut definitions = vec![];
        let mut used = vec![false; formulas.len()];

        while !unknown.is_empty() {
            let mut progress = false;
            for (ii, formula) in formulas.iter().enumerate() {
                if used[ii] {
                    continue;
                }
                if let Some((symbol, def)) = find_definition(ctx, *formula, &known, &symbols[ii])
                {
                    used[ii] = true;
                    known.insert(symbol);
                    definitions.push((symbol, def));
                    progress = true;
                }
            }
            if !progress {
                // nothing defines the remaining symbols, the smallest one becomes free
                let symbol = unknown[0];
                known.insert(symbol);
                free.push(symbol);
            }
            unknown.retain(|s| !known.contains(s));
        }
        Self { free, definitions }
    }

    fn is_model(
        &self,
        ctx: &Context,
        formulas: &[ExprRef],
        assignment: u64,
    ) -> Result<bool, SolverError> {
        let mut values: HashMap<ExprRef, Value> = HashMap::new();
        let mut remaining = assignment;
        for symbol in self.free.iter() {
            let tpe = symbol.get_type(ctx);
            let value = take_value(tpe, &mut remaining);
            values.insert(*symbol, value);
        }
        for (symbol, def) in self.definitions.iter() {
            let value = match def {
                Definition::Const(v) => Value::from_u64(*v as u64, Type::BOOL),
                Definition::Expr(e) => eval_expr(ctx, &values, *e).map_err(eval_error)?,
            };
            values.insert(*symbol, value);
        }
        for formula in formulas.iter() {
            if !eval_bool_expr(ctx, &values, *formula).map_err(eval_error)? {
                return Ok(false);
            }
        }
        Ok(true)
    }
}

fn eval_error(e: EvalError) -> SolverError {
    SolverError::Unsupported(e.to_string())
}

/// Recognizes `x == e`, `e == x`, `x` and `not(x)` where `x` is an unknown symbol and `e` only
/// depends on known symbols.
fn find_definition(
    ctx: &Context,
    formula: ExprRef,
    known: &HashSet<ExprRef>,
    symbols: &[ExprRef],
) -> Option<(ExprRef, Definition)> {
    let is_unknown_symbol = |e: ExprRef| e.is_symbol(ctx) && !known.contains(&e);
    match ctx.get(formula) {
        Expr::BVSymbol { .. } if !known.contains(&formula) => {
            Some((formula, Definition::Const(true)))
        }
        Expr::BVNot(e, 1) if is_unknown_symbol(*e) => Some((*e, Definition::Const(false))),
        Expr::Compare {
            op: CmpOp::Equal,
            a,
            b,
        } => {
            let only_known_besides = |s: ExprRef| {
                symbols
                    .iter()
                    .all(|other| *other == s || known.contains(other))
            };
            if is_unknown_symbol(*a) && only_known_besides(*a) && !depends_on(ctx, *b, *a) {
                Some((*a, Definition::Expr(*b)))
            } else if is_unknown_symbol(*b) && only_known_besides(*b) && !depends_on(ctx, *a, *b)
            {
                Some((*b, Definition::Expr(*a)))
            } else {
                None
            }
        }
        _ => None,
    }
}

fn depends_on(ctx: &Context, expr: ExprRef, symbol: ExprRef) -> bool {
    collect_symbols(ctx, [expr]).binary_search(&symbol).is_ok()
}

/// Consumes the low bits of `bits` to build a value of type `tpe`.
fn take_value(tpe: Type, bits: &mut u64) -> Value {
    match tpe {
        Type::BV(width) => {
            let value = bv_from_u64(*bits, width);
            *bits = bits.checked_shr(width).unwrap_or(0);
            Value::BitVec(value)
        }
        Type::Array(a) => {
            let mut array = ArrayValue::new_sparse(a.index_width, &bv_from_u64(0, a.data_width));
            for index in 0..(1u64 << a.index_width) {
                let data = bv_from_u64(*bits, a.data_width);
                *bits = bits.checked_shr(a.data_width).unwrap_or(0);
                array.store(&bv_from_u64(index, a.index_width), &data);
            }
            Value::Array(array)
        }
    }
}

/// Subsets of the soft formulas in ascending `(cost, size, sorted indices)` order.
///
/// Indices are ranked by `(weight, index)`. Every subset is reached exactly once from its
/// parent by either appending the next ranked index or by replacing its last ranked index with
/// the next one. Both moves never decrease the sort key, which makes a best-first search over
/// this tree produce subsets in order.
struct DropSets<'a> {
    soft: &'a [(ExprRef, u64)],
    ranked: Vec<usize>,
    heap: BinaryHeap<Reverse<(u64, usize, Vec<usize>, Vec<usize>)>>,
}

impl<'a> DropSets<'a> {
    fn new(soft: &'a [(ExprRef, u64)]) -> Self {
        let mut ranked: Vec<usize> = (0..soft.len()).collect();
        ranked.sort_by_key(|ii| (soft[*ii].1, *ii));
        let mut heap = BinaryHeap::new();
        if !soft.is_empty() {
            let first = ranked[0];
            heap.push(Reverse((soft[first].1, 1, vec![first], vec![0])));
        }
        Self { soft, ranked, heap }
    }

    fn push(&mut self, ranks: Vec<usize>) -> Result<(), SolverError> {
        let mut cost = 0u64;
        for r in ranks.iter() {
            cost = cost.checked_add(self.soft[self.ranked[*r]].1).ok_or_else(|| {
                SolverError::Unsupported("sum of soft weights overflows".to_string())
            })?;
        }
        let mut indices: Vec<usize> = ranks.iter().map(|r| self.ranked[*r]).collect();
        indices.sort_unstable();
        self.heap
            .push(Reverse((cost, indices.len(), indices, ranks)));
        Ok(())
    }
}

impl<'a> Iterator for DropSets<'a> {
    type Item = Result<(u64, Vec<usize>), SolverError>;

    fn next(&mut self) -> Option<Self::Item> {
        let Reverse((cost, _, indices, ranks)) = self.heap.pop()?;
        let last = *ranks.last()?;
        if last + 1 < self.ranked.len() {
            let mut extended = ranks.clone();
            extended.push(last + 1);
            if let Err(e) = self.push(extended) {
                return Some(Err(e));
            }
            let mut replaced = ranks;
            if let Some(l) = replaced.last_mut() {
                *l = last + 1;
            }
            if let Err(e) = self.push(replaced) {
                return Some(Err(e));
            }
        }
        Some(Ok((cost, indices)))
    }
}
