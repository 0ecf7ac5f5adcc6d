// Copyright 2024 Cornell University
// released under BSD 3-Clause License
// author: Kevin Laeufer <laeufer@cornell.edu>

//! Localizes the statements responsible for an assertion failure along a program path.
//!
//! The pipeline encodes the path, weighs the resulting constraints and asks a MaxSAT engine
//! for the cheapest set of constraints that needs to be dropped for the assertion to hold.
//! The dropped constraints are mapped back to statements and ranked.

mod combine;
mod core;

pub use combine::{combine, minimal_hitting_sets, CombineMethod, Diagnosis};
pub use core::{diagnoses, find_core, LocalizationCore};

use crate::encode::{encode_path, CallPolicy, ConstraintSet, EncodingError, PathSpec};
use crate::ir::{Context, ExprRef};
use crate::maxsat::{CancelToken, MaxSatEngine};
use crate::program::{execute, BlockId, ExecOptions, FunctionId, ProgramModel, StmtId};
use crate::report::{build_result, LocalizationResult};
use crate::weight::{assign_weights, AssignOptions, WeightTable, WeightedConstraintSet};
use rayon::prelude::*;
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum LocalizeError {
    #[error(transparent)]
    Encoding(#[from] EncodingError),
    #[error("localizing {path} timed out with a budget of {budget:?}")]
    Timeout {
        path: String,
        budget: Option<Duration>,
    },
    #[error("{path} is infeasible: the path cannot be executed, independent of the assertion")]
    Infeasible { path: String },
    #[error("solver failed while localizing {path}: {msg}")]
    SolverProtocol { path: String, msg: String },
    #[error("localization was cancelled")]
    Cancelled,
    #[error("the input does not fail any assertion")]
    NoFailure,
}

impl LocalizeError {
    /// Timeouts may succeed with a larger budget. Everything else is final.
    pub fn is_retryable(&self) -> bool {
        matches!(self, LocalizeError::Timeout { .. })
    }
}

#[derive(Debug, Clone)]
pub struct LocalizerOptions {
    /// Budget for a single solver query, `None` for no limit.
    pub timeout: Option<Duration>,
    pub timeout_retries: u32,
    /// The budget is multiplied by this factor on every retry.
    pub retry_growth: u32,
    /// Limit on the number of equal cost cores that are compared.
    pub max_cores: usize,
    pub max_diagnoses: usize,
    pub cancel: CancelToken,
    /// Loop bound used when a target does not specify one.
    pub bound: u32,
    pub calls: CallPolicy,
    pub assign: AssignOptions,
}

impl Default for LocalizerOptions {
    fn default() -> Self {
        Self {
            timeout: Some(Duration::from_secs(60)),
            timeout_retries: 1,
            retry_growth: 2,
            max_cores: 16,
            max_diagnoses: 8,
            cancel: CancelToken::default(),
            bound: 8,
            calls: CallPolicy::default(),
            assign: AssignOptions::default(),
        }
    }
}

/// A failing path to localize.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    pub entry: FunctionId,
    pub path: Vec<BlockId>,
    pub assertion: StmtId,
    pub bound: Option<u32>,
    pub inputs: Vec<(ExprRef, u64)>,
}

impl Target {
    pub fn new(entry: FunctionId, path: Vec<BlockId>, assertion: StmtId) -> Self {
        Self {
            entry,
            path,
            assertion,
            bound: None,
            inputs: vec![],
        }
    }

    pub fn with_bound(mut self, bound: u32) -> Self {
        self.bound = Some(bound);
        self
    }

    pub fn with_inputs(mut self, inputs: Vec<(ExprRef, u64)>) -> Self {
        self.inputs = inputs;
        self
    }

    fn path_spec(&self, opts: &LocalizerOptions) -> PathSpec {
        PathSpec::new(self.entry, self.path.clone())
            .with_assertion(self.assertion)
            .with_bound(self.bound.unwrap_or(opts.bound))
            .with_calls(opts.calls)
            .with_inputs(self.inputs.clone())
    }
}

pub struct FaultLocalizer<E: MaxSatEngine> {
    engine: E,
    table: WeightTable,
    opts: LocalizerOptions,
}

impl<E: MaxSatEngine> FaultLocalizer<E> {
    pub fn new(engine: E, table: WeightTable) -> Self {
        Self {
            engine,
            table,
            opts: LocalizerOptions::default(),
        }
    }

    pub fn with_options(mut self, opts: LocalizerOptions) -> Self {
        self.opts = opts;
        self
    }

    pub fn options(&self) -> &LocalizerOptions {
        &self.opts
    }

    pub fn table(&self) -> &WeightTable {
        &self.table
    }

    fn prepare(
        &self,
        ctx: &mut Context,
        program: &(impl ProgramModel + ?Sized),
        target: &Target,
    ) -> Result<(ConstraintSet, WeightedConstraintSet), LocalizeError> {
        let set = encode_path(ctx, program, &target.path_spec(&self.opts))?;
        let weighted = assign_weights(&set, &self.table, &self.opts.assign);
        Ok((set, weighted))
    }

    /// Ranks the statements that most likely cause `target` to fail.
    pub fn localize(
        &self,
        ctx: &mut Context,
        program: &(impl ProgramModel + ?Sized),
        target: &Target,
    ) -> Result<LocalizationResult, LocalizeError> {
        let _span = tracing::debug_span!("localize", assertion = %target.assertion).entered();
        let (set, weighted) = self.prepare(ctx, program, target)?;
        let core = find_core(ctx, &set, &weighted, &self.engine, &self.opts)?;
        let result = build_result(&core, set.provenance(), &weighted);
        tracing::info!(
            "{} with {}: {} suspicious statements at cost {}",
            set.path_label(),
            self.engine.name(),
            result.suspects().len(),
            result.cost()
        );
        Ok(result)
    }

    /// Executes `entry` on `inputs` and localizes the assertion failure that it runs into.
    pub fn localize_input(
        &self,
        ctx: &mut Context,
        program: &(impl ProgramModel + ?Sized),
        entry: FunctionId,
        inputs: &[(ExprRef, u64)],
    ) -> Result<LocalizationResult, LocalizeError> {
        let target = self.failing_target(ctx, program, entry, inputs)?;
        self.localize(ctx, program, &target)
    }

    fn failing_target(
        &self,
        ctx: &mut Context,
        program: &(impl ProgramModel + ?Sized),
        entry: FunctionId,
        inputs: &[(ExprRef, u64)],
    ) -> Result<Target, LocalizeError> {
        let exec_opts = ExecOptions {
            bound: self.opts.bound,
            calls: self.opts.calls,
            ..ExecOptions::default()
        };
        let trace = execute(ctx, program, entry, inputs, &exec_opts)?;
        let assertion = trace.failed_assertion.ok_or(LocalizeError::NoFailure)?;
        Ok(Target::new(entry, trace.path, assertion).with_inputs(inputs.to_vec()))
    }

    /// Localizes every target on its own thread. Results are in the order of `targets`.
    pub fn localize_paths(
        &self,
        ctx: &Context,
        program: &(impl ProgramModel + Sync + ?Sized),
        targets: &[Target],
    ) -> Vec<Result<LocalizationResult, LocalizeError>> {
        targets
            .par_iter()
            .map(|target| {
                let mut ctx = ctx.clone();
                self.localize(&mut ctx, program, target)
            })
            .collect()
    }

    /// Alternative explanations of the failure, cheapest first.
    pub fn diagnoses(
        &self,
        ctx: &mut Context,
        program: &(impl ProgramModel + ?Sized),
        target: &Target,
    ) -> Result<Vec<LocalizationResult>, LocalizeError> {
        let (set, weighted) = self.prepare(ctx, program, target)?;
        let cores = diagnoses(
            ctx,
            &set,
            &weighted,
            &self.engine,
            &self.opts,
            self.opts.max_diagnoses,
        )?;
        Ok(cores
            .iter()
            .map(|core| build_result(core, set.provenance(), &weighted))
            .collect())
    }

    /// Diagnoses of several failing inputs, merged with `method`.
    pub fn diagnoses_of_inputs(
        &self,
        ctx: &mut Context,
        program: &(impl ProgramModel + ?Sized),
        entry: FunctionId,
        inputs: &[Vec<(ExprRef, u64)>],
        method: CombineMethod,
    ) -> Result<Vec<Diagnosis>, LocalizeError> {
        let mut per_input = Vec::with_capacity(inputs.len());
        for input in inputs.iter() {
            let target = self.failing_target(ctx, program, entry, input)?;
            let found = self.diagnoses(ctx, program, &target)?;
            per_input.push(found.iter().map(|r| r.statements()).collect::<Vec<_>>());
        }
        Ok(combine(&per_input, method))
    }
}

/// Localizes a single path through the function that `path` starts in.
#[allow(clippy::too_many_arguments)]
pub fn localize<E: MaxSatEngine>(
    ctx: &mut Context,
    program: &(impl ProgramModel + ?Sized),
    path: &[BlockId],
    assertion: StmtId,
    table: &WeightTable,
    bound: u32,
    timeout: Option<Duration>,
    engine: &E,
) -> Result<LocalizationResult, LocalizeError> {
    let first = path.first().ok_or_else(|| EncodingError::MalformedPath {
        pos: 0,
        stmt: None,
        msg: "path is empty".to_string(),
    })?;
    let entry = program
        .function_of(*first)
        .ok_or(EncodingError::UnknownBlock {
            block: *first,
            pos: 0,
            stmt: None,
        })?;
    let opts = LocalizerOptions {
        timeout,
        bound,
        ..LocalizerOptions::default()
    };
    let target = Target::new(entry, path.to_vec(), assertion);
    let set = encode_path(ctx, program, &target.path_spec(&opts))?;
    let weighted = assign_weights(&set, table, &opts.assign);
    let core = find_core(ctx, &set, &weighted, engine, &opts)?;
    Ok(build_result(&core, set.provenance(), &weighted))
}
