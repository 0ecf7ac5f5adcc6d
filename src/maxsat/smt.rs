// Copyright 2023 The Regents of the University of California
// Copyright 2024 Cornell University
// released under BSD 3-Clause License
// author: Kevin Laeufer <laeufer@cornell.edu>

use super::{drop_cost, Budget, MaxSatEngine, MaxSatOutcome, MaxSatSession, SolverError};
use crate::ir::*;
use crate::smt::*;
use easy_smt as smt;
use std::time::Duration;

#[derive(Debug, Clone, Copy)]
pub struct SmtSolverCmd {
    pub name: &'static str,
    pub args: &'static [&'static str],
    pub supports_uf: bool,
    pub supports_check_assuming: bool,
    /// `set-option` keyword that limits the next check to a number of milliseconds. Without
    /// one the budget is only checked between queries.
    pub timeout_option: Option<&'static str>,
}

pub const BITWUZLA_CMD: SmtSolverCmd = SmtSolverCmd {
    name: "bitwuzla",
    args: &["--smt2", "--incremental"],
    supports_uf: false,
    supports_check_assuming: true,
    timeout_option: Some(":time-limit-per"),
};

pub const YICES2_CMD: SmtSolverCmd = SmtSolverCmd {
    name: "yices-smt2",
    args: &["--incremental"],
    supports_uf: false, // actually true, but ignoring for now
    supports_check_assuming: false,
    timeout_option: None,
};

pub const Z3_CMD: SmtSolverCmd = SmtSolverCmd {
    name: "z3",
    args: &["-smt2", "-in"],
    supports_uf: true,
    supports_check_assuming: true,
    timeout_option: Some(":timeout"),
};

/// Width of the cost accumulator.
const COST_WIDTH: usize = 64;

/// Solver time limit for the rest of a budget. Zero disables the limit in most solvers, so
/// an exhausted budget still gets one millisecond.
fn time_limit_ms(remaining: Duration) -> u64 {
    u64::try_from(remaining.as_millis()).unwrap_or(u64::MAX).max(1)
}

/// Answer to a single check, evaluated while the assumption scope is still open.
enum Step {
    Improved(Vec<usize>, u64),
    Optimal,
    Unknown,
}

/// MaxSAT through an incremental SMT solver process. Every soft formula gets a relaxation
/// literal and the total weight of all true relaxation literals is minimized by repeatedly
/// asking for a strictly cheaper model.
#[derive(Debug, Clone, Copy)]
pub struct SmtMaxSat {
    solver: SmtSolverCmd,
    /// If true, the communication with the SMT solver will be logged into a `replay.smt` file.
    save_smt_replay: bool,
}

impl SmtMaxSat {
    pub fn new(solver: SmtSolverCmd) -> Self {
        Self {
            solver,
            save_smt_replay: false,
        }
    }

    pub fn with_replay(mut self, save_smt_replay: bool) -> Self {
        self.save_smt_replay = save_smt_replay;
        self
    }
}

impl MaxSatEngine for SmtMaxSat {
    type Session = SmtSession;

    fn name(&self) -> &str {
        self.solver.name
    }

    fn open(&self) -> Result<SmtSession, SolverError> {
        let replay_file = if self.save_smt_replay {
            Some(std::fs::File::create("replay.smt")?)
        } else {
            None
        };
        let mut smt_ctx = easy_smt::ContextBuilder::new()
            .solver(self.solver.name, self.solver.args)
            .replay_file(replay_file)
            .build()?;

        // z3 only supports the non-standard as-const array syntax when the logic is set to ALL
        let logic = if self.solver.name == "z3" {
            "ALL"
        } else if self.solver.supports_uf {
            "QF_AUFBV"
        } else {
            "QF_ABV"
        };
        smt_ctx.set_logic(logic)?;
        tracing::trace!("opened {} session", self.solver.name);
        Ok(SmtSession {
            smt_ctx,
            solver: self.solver,
            queries: 0,
        })
    }
}

pub struct SmtSession {
    smt_ctx: smt::Context,
    solver: SmtSolverCmd,
    queries: u64,
}

impl Drop for SmtSession {
    fn drop(&mut self) {
        // the solver process is terminated when `smt_ctx` goes out of scope
        tracing::trace!(
            "closing {} session after {} queries",
            self.solver.name,
            self.queries
        );
    }
}

impl MaxSatSession for SmtSession {
    fn minimal_drop(
        &mut self,
        ctx: &Context,
        hard: &[ExprRef],
        soft: &[(ExprRef, u64)],
        budget: &Budget,
    ) -> Result<MaxSatOutcome, SolverError> {
        if drop_cost(soft, &(0..soft.len()).collect::<Vec<_>>()).is_none() {
            return Err(SolverError::Unsupported(
                "sum of soft weights does not fit into 64 bits".to_string(),
            ));
        }
        // everything declared for this instance is discarded by the matching pop
        self.smt_ctx.push_many(1)?;
        let res = self.solve(ctx, hard, soft, budget);
        self.smt_ctx.pop_many(1)?;
        res
    }
}

impl SmtSession {
    fn solve(
        &mut self,
        ctx: &Context,
        hard: &[ExprRef],
        soft: &[(ExprRef, u64)],
        budget: &Budget,
    ) -> Result<MaxSatOutcome, SolverError> {
        let roots = hard.iter().chain(soft.iter().map(|(e, _)| e)).cloned();
        for symbol in collect_symbols(ctx, roots) {
            let name = symbol
                .get_symbol_name(ctx)
                .ok_or_else(|| SolverError::Protocol("expected a symbol".to_string()))?;
            let tpe = convert_tpe(&self.smt_ctx, symbol.get_type(ctx));
            self.smt_ctx
                .declare_const(escape_smt_identifier(name), tpe)?;
        }

        for expr in hard.iter() {
            let e = SmtTerms::new(&self.smt_ctx, ctx).term(*expr);
            self.smt_ctx.assert(e)?;
        }

        let bool_sort = self.smt_ctx.bool_sort();
        let mut relax = Vec::with_capacity(soft.len());
        let mut cost_terms = Vec::with_capacity(soft.len());
        for (ii, (expr, weight)) in soft.iter().enumerate() {
            let r = self
                .smt_ctx
                .declare_const(format!("__relax_{ii}"), bool_sort)?;
            let e = SmtTerms::new(&self.smt_ctx, ctx).term(*expr);
            self.smt_ctx.assert(self.smt_ctx.or(e, r))?;
            let w = self.smt_ctx.binary(COST_WIDTH, *weight);
            let zero = self.smt_ctx.binary(COST_WIDTH, 0u64);
            cost_terms.push(self.smt_ctx.ite(r, w, zero));
            relax.push(r);
        }
        let cost = match cost_terms.len() {
            0 => self.smt_ctx.binary(COST_WIDTH, 0u64),
            1 => cost_terms[0],
            _ => {
                let mut args = vec![self.smt_ctx.atom("bvadd")];
                args.extend(cost_terms);
                self.smt_ctx.list(args)
            }
        };

        let mut best: Option<(Vec<usize>, u64)> = None;
        loop {
            if budget.should_stop() {
                return Ok(MaxSatOutcome::Timeout);
            }
            self.limit_time(budget)?;
            self.queries += 1;
            let best_cost = best.as_ref().map(|(_, c)| *c);
            let step = match best_cost {
                None => self.step(soft, &relax),
                Some(best_cost) => {
                    let bound = self.smt_ctx.binary(COST_WIDTH, best_cost);
                    let cheaper = self
                        .smt_ctx
                        .list(vec![self.smt_ctx.atom("bvult"), cost, bound]);
                    let step = self.step_assuming(soft, &relax, cheaper, best_cost);
                    // closed on every exit, the next query reuses the scope level
                    check_assuming_end(&mut self.smt_ctx, &self.solver)?;
                    step
                }
            };
            match step? {
                Step::Improved(dropped, new_cost) => {
                    best = Some((dropped, new_cost));
                    // nothing is cheaper than dropping nothing
                    if new_cost == 0 {
                        break;
                    }
                }
                Step::Optimal => break,
                Step::Unknown => return Ok(MaxSatOutcome::Timeout),
            }
        }
        Ok(match best {
            None => MaxSatOutcome::Infeasible,
            Some((dropped, cost)) => MaxSatOutcome::Optimum { dropped, cost },
        })
    }

    fn limit_time(&mut self, budget: &Budget) -> Result<(), SolverError> {
        let (Some(option), Some(remaining)) = (self.solver.timeout_option, budget.remaining())
        else {
            return Ok(());
        };
        let ms = self.smt_ctx.atom(time_limit_ms(remaining).to_string());
        self.smt_ctx.set_option(option, ms)?;
        Ok(())
    }

    fn step_assuming(
        &mut self,
        soft: &[(ExprRef, u64)],
        relax: &[smt::SExpr],
        cheaper: smt::SExpr,
        best_cost: u64,
    ) -> Result<Step, SolverError> {
        let response = check_assuming(&mut self.smt_ctx, cheaper, &self.solver)?;
        self.evaluate(response, soft, relax, Some(best_cost))
    }

    fn step(&mut self, soft: &[(ExprRef, u64)], relax: &[smt::SExpr]) -> Result<Step, SolverError> {
        let response = self.smt_ctx.check()?;
        self.evaluate(response, soft, relax, None)
    }

    /// Reads the model of a satisfiable check. Has to run before the assumption scope closes.
    fn evaluate(
        &mut self,
        response: smt::Response,
        soft: &[(ExprRef, u64)],
        relax: &[smt::SExpr],
        best_cost: Option<u64>,
    ) -> Result<Step, SolverError> {
        tracing::trace!(
            "{} query #{}: {:?}",
            self.solver.name,
            self.queries,
            response
        );
        match response {
            smt::Response::Sat => {
                let dropped = self.read_dropped(relax)?;
                let new_cost = drop_cost(soft, &dropped)
                    .ok_or_else(|| SolverError::Protocol("model cost overflows".to_string()))?;
                if let Some(best_cost) = best_cost {
                    if new_cost >= best_cost {
                        return Err(SolverError::Protocol(format!(
                            "model with cost {new_cost} does not improve on {best_cost}"
                        )));
                    }
                }
                Ok(Step::Improved(dropped, new_cost))
            }
            smt::Response::Unsat => Ok(Step::Optimal),
            smt::Response::Unknown => Ok(Step::Unknown),
        }
    }

    fn read_dropped(&mut self, relax: &[smt::SExpr]) -> Result<Vec<usize>, SolverError> {
        if relax.is_empty() {
            return Ok(vec![]);
        }
        let values = self.smt_ctx.get_value(relax.to_vec())?;
        if values.len() != relax.len() {
            return Err(SolverError::Protocol(format!(
                "expected {} values, got {}",
                relax.len(),
                values.len()
            )));
        }
        let mut dropped = vec![];
        for (ii, (_, value)) in values.into_iter().enumerate() {
            match parse_smt_bool(&self.smt_ctx, value) {
                Some(true) => dropped.push(ii),
                Some(false) => {}
                None => {
                    return Err(SolverError::Protocol(format!(
                        "relaxation literal {ii} has non-boolean value {}",
                        self.smt_ctx.display(value)
                    )))
                }
            }
        }
        Ok(dropped)
    }
}

/// Checks satisfiability under `assumption`. Solvers without `check-sat-assuming` get the
/// assumption asserted in a new scope which [`check_assuming_end`] removes again.
#[inline]
pub fn check_assuming(
    smt_ctx: &mut smt::Context,
    assumption: smt::SExpr,
    solver: &SmtSolverCmd,
) -> std::io::Result<smt::Response> {
    if solver.supports_check_assuming {
        smt_ctx.check_assuming([assumption])
    } else {
        smt_ctx.push_many(1)?; // add new assertion
        smt_ctx.assert(assumption)?;
        let res = smt_ctx.check()?;
        Ok(res)
    }
}

// pops context for solver that do not support check assuming
#[inline]
pub fn check_assuming_end(
    smt_ctx: &mut smt::Context,
    solver: &SmtSolverCmd,
) -> std::io::Result<()> {
    if !solver.supports_check_assuming {
        smt_ctx.pop_many(1)
    } else {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::maxsat::CancelToken;

    fn conflicting_instance(ctx: &mut Context) -> (Vec<ExprRef>, Vec<(ExprRef, u64)>) {
        let x = ctx.bv_symbol("x@0", 4);
        let three = ctx.bv_lit(3, 4);
        let five = ctx.bv_lit(5, 4);
        let is_three = ctx.equal(x, three);
        let is_five = ctx.equal(x, five);
        let one = ctx.one(4);
        let positive = ctx.greater(x, one);
        (vec![positive], vec![(is_three, 10), (is_five, 1)])
    }

    #[test]
    fn time_limit_is_never_zero() {
        assert_eq!(time_limit_ms(Duration::ZERO), 1);
        assert_eq!(time_limit_ms(Duration::from_micros(300)), 1);
        assert_eq!(time_limit_ms(Duration::from_secs(2)), 2000);
        assert_eq!(time_limit_ms(Duration::MAX), u64::MAX);
        assert!(YICES2_CMD.timeout_option.is_none());
        assert_eq!(Z3_CMD.timeout_option, Some(":timeout"));
    }

    #[test]
    #[ignore] // requires z3 to be installed
    fn z3_with_a_time_budget() {
        let mut ctx = Context::default();
        let (hard, soft) = conflicting_instance(&mut ctx);
        let engine = SmtMaxSat::new(Z3_CMD);
        let mut session = engine.open().unwrap();
        let budget = Budget::new(Some(Duration::from_secs(30)), CancelToken::new());
        let res = session.minimal_drop(&ctx, &hard, &soft, &budget).unwrap();
        assert_eq!(
            res,
            MaxSatOutcome::Optimum {
                dropped: vec![1],
                cost: 1
            }
        );
    }

    #[test]
    #[ignore] // requires bitwuzla to be installed
    fn bitwuzla_minimal_drop() {
        let mut ctx = Context::default();
        let (hard, soft) = conflicting_instance(&mut ctx);
        let engine = SmtMaxSat::new(BITWUZLA_CMD);
        let mut session = engine.open().unwrap();
        let res = session
            .minimal_drop(&ctx, &hard, &soft, &Budget::unlimited())
            .unwrap();
        assert_eq!(
            res,
            MaxSatOutcome::Optimum {
                dropped: vec![1],
                cost: 1
            }
        );
    }

    #[test]
    #[ignore] // requires yices2 to be installed
    fn yices2_infeasible_and_cancel() {
        let mut ctx = Context::default();
        let x = ctx.bv_symbol("x@0", 4);
        let zero = ctx.zero(4);
        let is_zero = ctx.equal(x, zero);
        let not_zero = ctx.not(is_zero);
        let engine = SmtMaxSat::new(YICES2_CMD);
        let mut session = engine.open().unwrap();
        let res = session
            .minimal_drop(&ctx, &[is_zero, not_zero], &[], &Budget::unlimited())
            .unwrap();
        assert_eq!(res, MaxSatOutcome::Infeasible);

        let token = CancelToken::new();
        token.cancel();
        let (hard, soft) = conflicting_instance(&mut ctx);
        let res = session
            .minimal_drop(&ctx, &hard, &soft, &Budget::new(None, token))
            .unwrap();
        assert_eq!(res, MaxSatOutcome::Timeout);

        // the session is still usable and declares the same symbols again
        let res = session
            .minimal_drop(&ctx, &hard, &soft, &Budget::unlimited())
            .unwrap();
        assert_eq!(
            res,
            MaxSatOutcome::Optimum {
                dropped: vec![1],
                cost: 1
            }
        );
    }
}
