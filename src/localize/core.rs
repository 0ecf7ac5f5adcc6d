// Copyright 2024 Cornell University
// released under BSD 3-Clause License
// author: Kevin Laeufer <laeufer@cornell.edu>

use super::{LocalizeError, LocalizerOptions};
use crate::encode::{ConstraintId, ConstraintSet};
use crate::ir::{Context, ExprRef};
use crate::maxsat::{Budget, MaxSatEngine, MaxSatOutcome, MaxSatSession, SolverError};
use crate::program::StmtId;
use crate::weight::WeightedConstraintSet;

/// A minimum weight set of soft constraints whose removal makes the path consistent with the
/// assertion. Empty if there is nothing to explain.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LocalizationCore {
    /// ascending
    pub constraints: Vec<ConstraintId>,
    pub cost: u64,
    /// Distinct statements of `constraints`, ascending.
    pub stmts: Vec<StmtId>,
}

impl LocalizationCore {
    pub fn is_empty(&self) -> bool {
        self.constraints.is_empty()
    }
}

/// The MaxSAT instance derived from a weighted constraint set.
struct Instance {
    hard: Vec<ExprRef>,
    /// one entry per soft group, in the order of `WeightedConstraintSet::soft`
    soft: Vec<(ExprRef, u64)>,
}

impl Instance {
    /// `None` if the path does not reach the assertion.
    fn new(
        ctx: &mut Context,
        set: &ConstraintSet,
        weighted: &WeightedConstraintSet,
    ) -> Option<Self> {
        if !set.reached_assertion() {
            return None;
        }
        let obligation = set.obligation()?;
        let mut hard = vec![];
        for c in weighted.hard() {
            if c.id != obligation.id {
                hard.push(set.get(c.id).formula);
            }
        }
        // the assertion has to hold
        hard.push(ctx.not(obligation.formula));
        let soft = weighted
            .soft()
            .iter()
            .map(|g| {
                let formula = ctx.and_all(g.members.iter().map(|id| set.get(*id).formula));
                (formula, g.weight)
            })
            .collect();
        Some(Self { hard, soft })
    }

    fn core(
        &self,
        set: &ConstraintSet,
        weighted: &WeightedConstraintSet,
        dropped: &[usize],
        cost: u64,
    ) -> LocalizationCore {
        let mut constraints: Vec<ConstraintId> = dropped
            .iter()
            .flat_map(|ii| weighted.soft()[*ii].members.iter().cloned())
            .collect();
        constraints.sort();
        let mut stmts: Vec<StmtId> = constraints
            .iter()
            .map(|id| set.get(*id).provenance.stmt)
            .collect();
        stmts.sort();
        stmts.dedup();
        LocalizationCore {
            constraints,
            cost,
            stmts,
        }
    }
}

/// Runs one `minimal_drop` query. Timeouts are retried with a growing budget.
fn query<S: MaxSatSession>(
    session: &mut S,
    ctx: &Context,
    instance: &Instance,
    opts: &LocalizerOptions,
    path: &str,
) -> Result<MaxSatOutcome, LocalizeError> {
    let mut timeout = opts.timeout;
    for attempt in 0..=opts.timeout_retries {
        if opts.cancel.is_cancelled() {
            return Err(LocalizeError::Cancelled);
        }
        if attempt > 0 {
            timeout = timeout.map(|t| t.saturating_mul(opts.retry_growth));
            tracing::warn!("retrying {path} with a budget of {timeout:?}");
        }
        let budget = Budget::new(timeout, opts.cancel.clone());
        let outcome = session
            .minimal_drop(ctx, &instance.hard, &instance.soft, &budget)
            .map_err(|e| protocol_error(path, e))?;
        if outcome != MaxSatOutcome::Timeout {
            return Ok(outcome);
        }
        if opts.cancel.is_cancelled() {
            return Err(LocalizeError::Cancelled);
        }
    }
    Err(LocalizeError::Timeout {
        path: path.to_string(),
        budget: timeout,
    })
}

fn protocol_error(path: &str, e: SolverError) -> LocalizeError {
    LocalizeError::SolverProtocol {
        path: path.to_string(),
        msg: e.to_string(),
    }
}

/// Repeatedly asks for the cheapest drop set and blocks it. With `same_cost` the enumeration
/// stops at the first answer that is more expensive than the first one.
fn enumerate<E: MaxSatEngine>(
    ctx: &mut Context,
    set: &ConstraintSet,
    weighted: &WeightedConstraintSet,
    engine: &E,
    opts: &LocalizerOptions,
    limit: usize,
    same_cost: bool,
) -> Result<Vec<LocalizationCore>, LocalizeError> {
    let path = set.path_label();
    let Some(mut instance) = Instance::new(ctx, set, weighted) else {
        tracing::debug!("{path} does not reach the assertion");
        return Ok(vec![]);
    };
    let mut session = engine.open().map_err(|e| protocol_error(&path, e))?;
    let mut cores: Vec<LocalizationCore> = vec![];
    while cores.len() < limit.max(1) {
        let outcome = match query(&mut session, ctx, &instance, opts, &path) {
            Ok(outcome) => outcome,
            // later queries only refine the answer
            Err(LocalizeError::Timeout { .. }) if !cores.is_empty() => {
                tracing::warn!("stopped enumerating cores of {path} after a timeout");
                break;
            }
            Err(e) => return Err(e),
        };
        let (dropped, cost) = match outcome {
            MaxSatOutcome::Optimum { dropped, cost } => (dropped, cost),
            MaxSatOutcome::Infeasible if cores.is_empty() => {
                tracing::warn!("{path} is infeasible, even without the assertion");
                return Err(LocalizeError::Infeasible { path });
            }
            MaxSatOutcome::Infeasible | MaxSatOutcome::Timeout => break,
        };
        if dropped.is_empty() {
            // nothing needs to change for the assertion to hold
            break;
        }
        if same_cost && cores.first().map(|c| c.cost < cost).unwrap_or(false) {
            break;
        }
        cores.push(instance.core(set, weighted, &dropped, cost));
        let keep_one = ctx.or_all(dropped.iter().map(|ii| instance.soft[*ii].0));
        instance.hard.push(keep_one);
    }
    Ok(cores)
}

/// Finds the minimum weight core of the localization instance derived from `set`. Among cores
/// of equal cost the one touching the fewest statements wins, then the one with the earliest
/// statements.
pub fn find_core<E: MaxSatEngine>(
    ctx: &mut Context,
    set: &ConstraintSet,
    weighted: &WeightedConstraintSet,
    engine: &E,
    opts: &LocalizerOptions,
) -> Result<LocalizationCore, LocalizeError> {
    let cores = enumerate(ctx, set, weighted, engine, opts, opts.max_cores, true)?;
    if cores.len() > 1 {
        tracing::debug!("{} cores of cost {}", cores.len(), cores[0].cost);
    }
    Ok(cores
        .into_iter()
        .min_by(|a, b| {
            a.stmts
                .len()
                .cmp(&b.stmts.len())
                .then_with(|| a.stmts.cmp(&b.stmts))
                .then_with(|| a.constraints.cmp(&b.constraints))
        })
        .unwrap_or_default())
}

/// Up to `limit` minimal correction sets, cheapest first.
pub fn diagnoses<E: MaxSatEngine>(
    ctx: &mut Context,
    set: &ConstraintSet,
    weighted: &WeightedConstraintSet,
    engine: &E,
    opts: &LocalizerOptions,
    limit: usize,
) -> Result<Vec<LocalizationCore>, LocalizeError> {
    enumerate(ctx, set, weighted, engine, opts, limit, false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encode::{encode_path, PathSpec};
    use crate::maxsat::EnumerativeMaxSat;
    use crate::program::*;
    use crate::weight::{assign_weights, AssignOptions, WeightTable};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    /// `y = a + 1; z = y + 1; assert(z == 1)` with `a = 0`: either statement can be blamed
    fn chain(ctx: &mut Context) -> (ConstraintSet, StmtId, StmtId) {
        let a = ctx.bv_symbol("a", 4);
        let y = ctx.bv_symbol("y", 4);
        let z = ctx.bv_symbol("z", 4);
        let one = ctx.one(4);
        let inc_a = ctx.add(a, one);
        let inc_y = ctx.add(y, one);
        let ok = ctx.equal(z, one);
        let mut b = ProgramBuilder::new();
        let main = b.function("main", &[a]);
        let entry = b.block(main);
        let first = b.push(entry, Instruction::Assign { target: y, value: inc_a });
        let second = b.push(entry, Instruction::Assign { target: z, value: inc_y });
        let check = b.push(entry, Instruction::Assert { cond: ok });
        b.push(entry, Instruction::Branch(Terminator::Return(vec![])));
        let program = b.build(ctx).unwrap();
        let spec = PathSpec::new(main, vec![entry])
            .with_assertion(check)
            .with_inputs(vec![(a, 0)]);
        (encode_path(ctx, &program, &spec).unwrap(), first, second)
    }

    #[test]
    fn equal_cost_prefers_earliest_statement() {
        let mut ctx = Context::default();
        let (set, first, second) = chain(&mut ctx);
        let weighted = assign_weights(&set, &WeightTable::default(), &AssignOptions::default());
        let engine = EnumerativeMaxSat::default();
        let opts = LocalizerOptions::default();
        let core = find_core(&mut ctx, &set, &weighted, &engine, &opts).unwrap();
        assert_eq!(core.cost, 10);
        assert_eq!(core.stmts, [first]);

        let all = diagnoses(&mut ctx, &set, &weighted, &engine, &opts, 5).unwrap();
        let stmts = all.iter().map(|c| c.stmts.clone()).collect::<Vec<_>>();
        assert_eq!(stmts, [vec![first], vec![second]]);
    }

    /// Times out on the first `timeouts` queries of a session, then answers like the
    /// enumerative engine. Records the budget of every query.
    struct Stalling {
        timeouts: usize,
        budgets: Arc<Mutex<Vec<Option<Duration>>>>,
    }

    struct StallingSession {
        timeouts: usize,
        budgets: Arc<Mutex<Vec<Option<Duration>>>>,
        inner: <EnumerativeMaxSat as MaxSatEngine>::Session,
    }

    impl MaxSatEngine for Stalling {
        type Session = StallingSession;

        fn name(&self) -> &str {
            "stalling"
        }

        fn open(&self) -> Result<StallingSession, SolverError> {
            Ok(StallingSession {
                timeouts: self.timeouts,
                budgets: self.budgets.clone(),
                inner: EnumerativeMaxSat::default().open()?,
            })
        }
    }

    impl MaxSatSession for StallingSession {
        fn minimal_drop(
            &mut self,
            ctx: &Context,
            hard: &[ExprRef],
            soft: &[(ExprRef, u64)],
            budget: &Budget,
        ) -> Result<MaxSatOutcome, SolverError> {
            self.budgets.lock().unwrap().push(budget.timeout());
            if self.timeouts > 0 {
                self.timeouts -= 1;
                return Ok(MaxSatOutcome::Timeout);
            }
            self.inner.minimal_drop(ctx, hard, soft, budget)
        }
    }

    #[test]
    fn timeouts_are_retried_with_a_larger_budget() {
        let mut ctx = Context::default();
        let (set, first, _) = chain(&mut ctx);
        let weighted = assign_weights(&set, &WeightTable::default(), &AssignOptions::default());
        let opts = LocalizerOptions {
            timeout: Some(Duration::from_secs(1)),
            timeout_retries: 1,
            retry_growth: 3,
            ..LocalizerOptions::default()
        };

        let budgets = Arc::new(Mutex::new(vec![]));
        let engine = Stalling {
            timeouts: 1,
            budgets: budgets.clone(),
        };
        let core = find_core(&mut ctx, &set, &weighted, &engine, &opts).unwrap();
        assert_eq!(core.stmts, [first]);
        let seen = budgets.lock().unwrap().clone();
        assert_eq!(
            seen[..2],
            [Some(Duration::from_secs(1)), Some(Duration::from_secs(3))]
        );
        // the next core starts over with the configured budget
        assert_eq!(seen.get(2), Some(&Some(Duration::from_secs(1))));

        let engine = Stalling {
            timeouts: 2,
            budgets: Arc::new(Mutex::new(vec![])),
        };
        let err = find_core(&mut ctx, &set, &weighted, &engine, &opts).unwrap_err();
        assert!(err.is_retryable());
        assert!(
            matches!(err, LocalizeError::Timeout { budget: Some(b), .. } if b == Duration::from_secs(3)),
            "{err}"
        );
    }

    #[test]
    fn cancelled_before_first_query() {
        let mut ctx = Context::default();
        let (set, _, _) = chain(&mut ctx);
        let weighted = assign_weights(&set, &WeightTable::default(), &AssignOptions::default());
        let opts = LocalizerOptions::default();
        opts.cancel.cancel();
        let err = find_core(&mut ctx, &set, &weighted, &EnumerativeMaxSat::default(), &opts)
            .unwrap_err();
        assert!(matches!(err, LocalizeError::Cancelled));
    }
}
