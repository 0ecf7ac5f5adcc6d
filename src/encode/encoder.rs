// Copyright 2024 Cornell University
// released under BSD 3-Clause License
// author: Kevin Laeufer <laeufer@cornell.edu>

use super::*;
use crate::ir::*;
use crate::program::*;
use indexmap::IndexMap;
use std::collections::HashMap;

/// How calls on the path are encoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallPolicy {
    /// Follow the callee's blocks on the path.
    Inline { max_depth: u32 },
    /// Replace every call by the callee's contract.
    Summarize,
    /// Use the contract when there is one, inline otherwise.
    PreferSummary { max_depth: u32 },
}

impl Default for CallPolicy {
    fn default() -> Self {
        CallPolicy::PreferSummary { max_depth: 4 }
    }
}

impl CallPolicy {
    pub fn summarizes(&self, has_summary: bool) -> bool {
        match self {
            CallPolicy::Inline { .. } => false,
            CallPolicy::Summarize => true,
            CallPolicy::PreferSummary { .. } => has_summary,
        }
    }

    pub fn max_depth(&self) -> u32 {
        match self {
            CallPolicy::Inline { max_depth } | CallPolicy::PreferSummary { max_depth } => {
                *max_depth
            }
            CallPolicy::Summarize => 0,
        }
    }
}

/// The path to encode. `blocks` lists every block in the order it is entered, starting at the
/// entry block of `entry` and including the blocks of inlined callees. Returning to a caller
/// does not repeat the caller's block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathSpec {
    pub entry: FunctionId,
    pub blocks: Vec<BlockId>,
    pub assertion: Option<StmtId>,
    /// Every block may be entered at most `bound + 1` times per activation.
    pub bound: u32,
    pub calls: CallPolicy,
    /// Fixed values for parameters of `entry`. Arrays are filled with the value.
    pub inputs: Vec<(ExprRef, u64)>,
}

impl PathSpec {
    pub fn new(entry: FunctionId, blocks: Vec<BlockId>) -> Self {
        Self {
            entry,
            blocks,
            assertion: None,
            bound: 8,
            calls: CallPolicy::default(),
            inputs: vec![],
        }
    }

    pub fn with_assertion(mut self, assertion: StmtId) -> Self {
        self.assertion = Some(assertion);
        self
    }

    pub fn with_bound(mut self, bound: u32) -> Self {
        self.bound = bound;
        self
    }

    pub fn with_calls(mut self, calls: CallPolicy) -> Self {
        self.calls = calls;
        self
    }

    pub fn with_inputs(mut self, inputs: Vec<(ExprRef, u64)>) -> Self {
        self.inputs = inputs;
        self
    }
}

/// Encodes `spec` into constraints over variable versions. The hard constraints together with
/// all soft constraints are satisfiable iff some input follows the path and fails the
/// assertion at `spec.assertion`.
pub fn encode_path(
    ctx: &mut Context,
    program: &(impl ProgramModel + ?Sized),
    spec: &PathSpec,
) -> Result<ConstraintSet, EncodingError> {
    let entry = program
        .function(spec.entry)
        .ok_or(EncodingError::UnknownFunction {
            stmt: None,
            function: spec.entry,
        })?;
    let first = *spec.blocks.first().ok_or_else(|| EncodingError::MalformedPath {
        pos: 0,
        stmt: None,
        msg: "path is empty".to_string(),
    })?;
    if first != entry.entry {
        return Err(EncodingError::MalformedPath {
            pos: 0,
            stmt: None,
            msg: format!(
                "path starts at {first} instead of the entry {} of {}",
                entry.entry, entry.name
            ),
        });
    }

    let mut enc = PathEncoder {
        ctx,
        program,
        spec,
        versions: VersionArena::default(),
        constraints: vec![],
        provenance: ProvenanceMap::default(),
        array_roots: HashMap::new(),
        array_history: IndexMap::new(),
        frame: Frame::new(spec.entry, HashMap::new()),
        callers: vec![],
        pos: 0,
        last: None,
        reached_assertion: false,
    };
    enc.bind_entry(entry)?;
    enc.enter_block(first, None)?;
    enc.run()?;
    Ok(enc.finish())
}

struct Frame {
    function: FunctionId,
    /// program symbol -> current version
    env: HashMap<ExprRef, ExprRef>,
    visits: HashMap<BlockId, u32>,
    block: BlockId,
    pc: usize,
}

impl Frame {
    fn new(function: FunctionId, env: HashMap<ExprRef, ExprRef>) -> Self {
        Self {
            function,
            env,
            visits: HashMap::new(),
            block: BlockId(u32::MAX),
            pc: 0,
        }
    }
}

enum Flow {
    Continue,
    Stop,
}

struct PathEncoder<'a, P: ProgramModel + ?Sized> {
    ctx: &'a mut Context,
    program: &'a P,
    spec: &'a PathSpec,
    versions: VersionArena,
    constraints: Vec<Constraint>,
    provenance: ProvenanceMap,
    /// array version -> first version of the same array on the path
    array_roots: HashMap<ExprRef, ExprRef>,
    array_history: IndexMap<ExprRef, Vec<ArrayUpdate>>,
    frame: Frame,
    /// suspended frames with the call statement and its result variables
    callers: Vec<(Frame, StmtId, Vec<ExprRef>)>,
    /// index of the current block in `spec.blocks`
    pos: usize,
    /// most recently encoded statement
    last: Option<StmtId>,
    reached_assertion: bool,
}

impl<'a, P: ProgramModel + ?Sized> PathEncoder<'a, P> {
    fn bind_entry(&mut self, entry: &Function) -> Result<(), EncodingError> {
        let stmt = StmtId::params(entry.entry);
        for param in entry.params.iter() {
            let version = self.fresh(stmt, *param)?;
            self.array_roots.insert(version, version);
            self.frame.env.insert(*param, version);
        }
        let spec = self.spec;
        for (param, value) in spec.inputs.iter() {
            let Some(version) = self.frame.env.get(param).copied() else {
                return Err(EncodingError::UnknownInput {
                    stmt,
                    name: param.get_symbol_name(self.ctx).unwrap_or("?").to_string(),
                });
            };
            let lit = match version.get_type(self.ctx) {
                Type::BV(width) => self.ctx.bv_lit_signed(*value as i64, width),
                Type::Array(a) => {
                    let data = self.ctx.bv_lit_signed(*value as i64, a.data_width);
                    self.ctx.array_const(data, a.index_width)
                }
            };
            let formula = self.ctx.equal(version, lit);
            self.emit(
                ConstraintKind::AssumeFact,
                formula,
                stmt,
                None,
                Origin::InputBinding,
                true,
            )?;
        }
        Ok(())
    }

    fn run(&mut self) -> Result<(), EncodingError> {
        let program = self.program;
        loop {
            let block = program
                .block(self.frame.block)
                .ok_or(EncodingError::UnknownBlock {
                    block: self.frame.block,
                    pos: self.pos,
                    stmt: self.last,
                })?;
            let pc = self.frame.pc;
            let Some(instr) = block.instructions.get(pc) else {
                return Err(EncodingError::MalformedPath {
                    pos: self.pos,
                    stmt: self.last,
                    msg: format!("{} ends without a terminator", block.id),
                });
            };
            self.frame.pc += 1;
            let stmt = StmtId::new(block.id, pc as u32);
            self.last = Some(stmt);
            if let Flow::Stop = self.step(stmt, instr)? {
                return Ok(());
            }
        }
    }

    fn step(&mut self, stmt: StmtId, instr: &Instruction) -> Result<Flow, EncodingError> {
        match instr {
            Instruction::Assign { target, value } => {
                let value = self.rename(stmt, *value)?;
                let version = self.fresh(stmt, *target)?;
                if value.get_type(self.ctx).is_array() {
                    let root = self.array_roots.get(&value).copied().unwrap_or(version);
                    self.array_roots.insert(version, root);
                }
                let formula = self.ctx.equal(version, value);
                self.emit(
                    ConstraintKind::Assignment,
                    formula,
                    stmt,
                    None,
                    Origin::Statement,
                    false,
                )?;
            }
            Instruction::Phi { .. } => return Err(EncodingError::MisplacedPhi { stmt }),
            Instruction::Store {
                target,
                array,
                index,
                data,
            } => {
                let array = self.rename(stmt, *array)?;
                self.expect_array(stmt, array)?;
                let index = self.rename(stmt, *index)?;
                let data = self.rename(stmt, *data)?;
                let stored = self.ctx.array_store(array, index, data);
                let version = self.fresh(stmt, *target)?;
                let root = self.array_roots.get(&array).copied().unwrap_or(array);
                self.array_roots.insert(version, root);
                self.array_history
                    .entry(root)
                    .or_default()
                    .push(ArrayUpdate { stmt, version });
                let formula = self.ctx.equal(version, stored);
                self.emit(
                    ConstraintKind::ArrayUpdate,
                    formula,
                    stmt,
                    None,
                    Origin::Statement,
                    false,
                )?;
            }
            Instruction::Load {
                target,
                array,
                index,
            } => {
                let array = self.rename(stmt, *array)?;
                self.expect_array(stmt, array)?;
                let index = self.rename(stmt, *index)?;
                let read = self.ctx.array_read(array, index);
                let version = self.fresh(stmt, *target)?;
                let formula = self.ctx.equal(version, read);
                self.emit(
                    ConstraintKind::ArrayRead,
                    formula,
                    stmt,
                    None,
                    Origin::Statement,
                    false,
                )?;
            }
            Instruction::Assert { cond } => {
                let cond = self.rename(stmt, *cond)?;
                self.expect_bool(stmt, cond)?;
                // only the visit in the last block of the path fails, earlier ones passed
                if self.spec.assertion == Some(stmt) && self.pos + 1 == self.spec.blocks.len() {
                    let negated = self.ctx.not(cond);
                    self.emit(
                        ConstraintKind::AssertNegation,
                        negated,
                        stmt,
                        None,
                        Origin::Statement,
                        true,
                    )?;
                    self.reached_assertion = true;
                    return Ok(Flow::Stop);
                }
                // the execution got past this assertion
                self.emit(
                    ConstraintKind::AssumeFact,
                    cond,
                    stmt,
                    None,
                    Origin::PassedAssertion,
                    true,
                )?;
            }
            Instruction::Assume { cond } => {
                let cond = self.rename(stmt, *cond)?;
                self.emit(
                    ConstraintKind::AssumeFact,
                    cond,
                    stmt,
                    None,
                    Origin::Statement,
                    true,
                )?;
            }
            Instruction::Call {
                callee,
                args,
                results,
            } => return self.call(stmt, *callee, args, results),
            Instruction::Branch(t) => return self.terminate(stmt, t),
        }
        Ok(Flow::Continue)
    }

    fn terminate(&mut self, stmt: StmtId, terminator: &Terminator) -> Result<Flow, EncodingError> {
        match terminator {
            Terminator::Goto(target) => {
                let Some(next) = self.follow(stmt, &[*target])? else {
                    return Ok(Flow::Stop);
                };
                self.enter_block(next, Some(stmt.block))?;
            }
            Terminator::Cond { cond, then, els } => {
                let Some(next) = self.follow(stmt, &[*then, *els])? else {
                    return Ok(Flow::Stop);
                };
                if then != els {
                    let taken = next == *then;
                    let predicate = self.rename(stmt, *cond)?;
                    self.expect_bool(stmt, predicate)?;
                    let guard = if cond.is_symbol(self.ctx) {
                        predicate
                    } else {
                        let name = format!("$guard_{}", stmt.block);
                        let guard = self.versions.fresh_named(self.ctx, &name, Type::BOOL);
                        let def = self.ctx.equal(guard, predicate);
                        self.emit(
                            ConstraintKind::BranchCondition,
                            def,
                            stmt,
                            Some(taken),
                            Origin::BranchGuard,
                            false,
                        )?;
                        guard
                    };
                    let polarity = if taken { guard } else { self.ctx.not(guard) };
                    self.emit(
                        ConstraintKind::BranchCondition,
                        polarity,
                        stmt,
                        Some(taken),
                        Origin::BranchPolarity,
                        true,
                    )?;
                }
                self.enter_block(next, Some(stmt.block))?;
            }
            Terminator::Return(values) => {
                let Some((caller, call, results)) = self.callers.pop() else {
                    if self.pos + 1 < self.spec.blocks.len() {
                        return Err(EncodingError::MalformedPath {
                            pos: self.pos,
                            stmt: Some(stmt),
                            msg: format!("path continues after the return at {stmt}"),
                        });
                    }
                    return Ok(Flow::Stop);
                };
                let values = values
                    .iter()
                    .map(|v| self.rename(stmt, *v))
                    .collect::<Result<Vec<_>, _>>()?;
                if values.len() != results.len() {
                    return Err(EncodingError::ArityMismatch { stmt: call });
                }
                self.frame = caller;
                for (target, value) in results.iter().zip(values) {
                    let version = self.fresh(call, *target)?;
                    let formula = self.ctx.equal(version, value);
                    self.emit(
                        ConstraintKind::Assignment,
                        formula,
                        call,
                        None,
                        Origin::CallReturn,
                        false,
                    )?;
                }
            }
        }
        Ok(Flow::Continue)
    }

    fn call(
        &mut self,
        stmt: StmtId,
        callee: FunctionId,
        args: &[ExprRef],
        results: &[ExprRef],
    ) -> Result<Flow, EncodingError> {
        let program = self.program;
        let function = program
            .function(callee)
            .ok_or(EncodingError::UnknownFunction {
                stmt: Some(stmt),
                function: callee,
            })?;
        let summary = program.summary(callee);

        if self.spec.calls.summarizes(summary.is_some()) {
            let contract = summary.ok_or(EncodingError::MissingSummary {
                stmt,
                function: callee,
            })?;
            if contract.params.len() != args.len() || contract.results.len() != results.len() {
                return Err(EncodingError::ArityMismatch { stmt });
            }
            let mut map = HashMap::new();
            for (param, arg) in contract.params.iter().zip(args.iter()) {
                map.insert(*param, self.rename(stmt, *arg)?);
            }
            let pre = substitute(self.ctx, contract.pre, &map);
            self.emit(
                ConstraintKind::AssumeFact,
                pre,
                stmt,
                None,
                Origin::Summary,
                true,
            )?;
            for (result, target) in contract.results.iter().zip(results.iter()) {
                let version = self.fresh(stmt, *target)?;
                map.insert(*result, version);
            }
            let post = substitute(self.ctx, contract.post, &map);
            self.emit(
                ConstraintKind::AssumeFact,
                post,
                stmt,
                None,
                Origin::Summary,
                true,
            )?;
            return Ok(Flow::Continue);
        }

        let max_depth = self.spec.calls.max_depth();
        if self.callers.len() as u32 + 1 > max_depth {
            return Err(EncodingError::BoundExceeded {
                kind: BoundKind::CallDepth,
                bound: max_depth,
                stmt,
            });
        }
        if function.params.len() != args.len() {
            return Err(EncodingError::ArityMismatch { stmt });
        }
        let Some(next) = self.follow(stmt, &[function.entry])? else {
            return Ok(Flow::Stop);
        };
        let args = args
            .iter()
            .map(|a| self.rename(stmt, *a))
            .collect::<Result<Vec<_>, _>>()?;
        let mut env = HashMap::new();
        for (param, arg) in function.params.iter().zip(args) {
            // the version belongs to the callee's frame
            let version = self.new_version(stmt, *param)?;
            let formula = self.ctx.equal(version, arg);
            self.emit(
                ConstraintKind::Assignment,
                formula,
                stmt,
                None,
                Origin::CallArgument,
                false,
            )?;
            env.insert(*param, version);
        }
        let caller = std::mem::replace(&mut self.frame, Frame::new(callee, env));
        self.callers.push((caller, stmt, results.to_vec()));
        self.enter_block(next, None)?;
        Ok(Flow::Continue)
    }

    /// Advances along the path. `None` if the path ends here.
    fn follow(
        &mut self,
        stmt: StmtId,
        successors: &[BlockId],
    ) -> Result<Option<BlockId>, EncodingError> {
        let Some(next) = self.spec.blocks.get(self.pos + 1).copied() else {
            return Ok(None);
        };
        if !successors.contains(&next) {
            return Err(EncodingError::InvalidEdge { stmt, to: next });
        }
        self.pos += 1;
        Ok(Some(next))
    }

    fn enter_block(&mut self, id: BlockId, from: Option<BlockId>) -> Result<(), EncodingError> {
        let program = self.program;
        let block = program
            .block(id)
            .ok_or(EncodingError::UnknownBlock {
                block: id,
                pos: self.pos,
                stmt: self.last,
            })?;
        if block.function != self.frame.function {
            return Err(EncodingError::MalformedPath {
                pos: self.pos,
                stmt: self.last,
                msg: format!("{id} does not belong to {}", self.frame.function),
            });
        }
        let visits = self.frame.visits.entry(id).or_insert(0);
        *visits += 1;
        if *visits > self.spec.bound + 1 {
            return Err(EncodingError::BoundExceeded {
                kind: BoundKind::LoopUnrolling,
                bound: self.spec.bound,
                stmt: StmtId::new(id, 0),
            });
        }
        self.frame.block = id;

        // all phis read their value before any of them is assigned
        let mut phis = vec![];
        for (ii, instr) in block.instructions.iter().enumerate() {
            let Instruction::Phi { target, incoming } = instr else {
                break;
            };
            let stmt = StmtId::new(id, ii as u32);
            let value = from
                .and_then(|pred| incoming.iter().find(|(b, _)| *b == pred))
                .map(|(_, v)| *v)
                .ok_or(EncodingError::MissingPhiIncoming { stmt })?;
            phis.push((stmt, *target, self.rename(stmt, value)?));
        }
        self.frame.pc = phis.len();
        for (stmt, target, value) in phis {
            let version = self.fresh(stmt, target)?;
            if value.get_type(self.ctx).is_array() {
                self.array_roots.insert(version, version);
            }
            let formula = self.ctx.equal(version, value);
            self.emit(
                ConstraintKind::Assignment,
                formula,
                stmt,
                None,
                Origin::PhiMerge,
                false,
            )?;
        }
        Ok(())
    }

    /// Replaces program variables in `expr` with their current version.
    fn rename(&mut self, stmt: StmtId, expr: ExprRef) -> Result<ExprRef, EncodingError> {
        let mut map = HashMap::new();
        for symbol in collect_symbols(self.ctx, [expr]) {
            match self.frame.env.get(&symbol) {
                Some(version) => {
                    map.insert(symbol, *version);
                }
                None => {
                    return Err(EncodingError::UndefinedVersion {
                        stmt,
                        name: symbol.get_symbol_name(self.ctx).unwrap_or("?").to_string(),
                    })
                }
            }
        }
        Ok(substitute(self.ctx, expr, &map))
    }

    /// New version of `target` which becomes the current one in this frame.
    fn fresh(&mut self, stmt: StmtId, target: ExprRef) -> Result<ExprRef, EncodingError> {
        let version = self.new_version(stmt, target)?;
        self.frame.env.insert(target, version);
        Ok(version)
    }

    fn new_version(&mut self, stmt: StmtId, target: ExprRef) -> Result<ExprRef, EncodingError> {
        self.versions
            .fresh(self.ctx, target)
            .ok_or_else(|| EncodingError::TypeError {
                stmt,
                msg: "assignment target is not a symbol".to_string(),
            })
    }

    fn expect_array(&self, stmt: StmtId, e: ExprRef) -> Result<(), EncodingError> {
        match type_check_deep(self.ctx, e) {
            Ok(Type::Array(_)) => Ok(()),
            Ok(other) => Err(EncodingError::TypeError {
                stmt,
                msg: format!("expected an array, not {other}"),
            }),
            Err(e) => Err(EncodingError::TypeError {
                stmt,
                msg: e.get_msg().to_string(),
            }),
        }
    }

    fn expect_bool(&self, stmt: StmtId, e: ExprRef) -> Result<(), EncodingError> {
        match type_check_deep(self.ctx, e) {
            Ok(Type::BV(1)) => Ok(()),
            Ok(other) => Err(EncodingError::TypeError {
                stmt,
                msg: format!("expected a condition, not {other}"),
            }),
            Err(e) => Err(EncodingError::TypeError {
                stmt,
                msg: e.get_msg().to_string(),
            }),
        }
    }

    fn emit(
        &mut self,
        kind: ConstraintKind,
        formula: ExprRef,
        stmt: StmtId,
        polarity: Option<bool>,
        origin: Origin,
        hard: bool,
    ) -> Result<ConstraintId, EncodingError> {
        self.expect_bool(stmt, formula)?;
        let id = ConstraintId::from_index(self.constraints.len());
        let iteration = self
            .frame
            .visits
            .get(&stmt.block)
            .map(|v| v.saturating_sub(1))
            .unwrap_or(0);
        let provenance = Provenance {
            stmt,
            polarity,
            origin,
            iteration,
            call_depth: self.callers.len() as u32,
        };
        self.constraints.push(Constraint {
            id,
            kind,
            formula,
            provenance,
            hard,
        });
        self.provenance.insert(id, stmt);
        Ok(id)
    }

    fn finish(self) -> ConstraintSet {
        let path = self.spec.blocks.clone();
        let hard = self.constraints.iter().filter(|c| c.hard).count();
        tracing::debug!(
            "encoded path of {} blocks into {} constraints ({} hard), assertion reached: {}",
            path.len(),
            self.constraints.len(),
            hard,
            self.reached_assertion
        );
        ConstraintSet {
            constraints: self.constraints,
            provenance: self.provenance,
            versions: self.versions,
            path,
            assertion: self.spec.assertion,
            reached_assertion: self.reached_assertion,
            array_history: self.array_history,
        }
    }
}
