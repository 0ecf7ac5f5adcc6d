// Copyright 2024 Cornell University
// released under BSD 3-Clause License
// author: Kevin Laeufer <laeufer@cornell.edu>

//! Concrete interpreter. Variable versions are numbered exactly like the path encoder numbers
//! them, so a trace can be checked against the constraints of its own path.

use super::model::*;
use crate::encode::{BoundKind, CallPolicy, EncodingError, VersionArena};
use crate::ir::*;
use std::collections::HashMap;

#[derive(Debug, Clone, Copy)]
pub struct ExecOptions {
    /// Same meaning as the path bound: blocks may be entered `bound + 1` times per activation.
    pub bound: u32,
    pub calls: CallPolicy,
    /// Limit on the number of instructions executed inside summarized calls.
    pub max_steps: u32,
}

impl Default for ExecOptions {
    fn default() -> Self {
        Self {
            bound: 8,
            calls: CallPolicy::default(),
            max_steps: 100_000,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Trace {
    /// Entered blocks, in the format expected by the path encoder.
    pub path: Vec<BlockId>,
    /// Value of every variable version, in the order the versions were created.
    pub values: Vec<(ExprRef, Value)>,
    pub failed_assertion: Option<StmtId>,
    pub violated_assumption: Option<StmtId>,
}

impl Trace {
    pub fn value_of(&self, version: ExprRef) -> Option<&Value> {
        self.values
            .iter()
            .find(|(v, _)| *v == version)
            .map(|(_, value)| value)
    }

    pub fn values_map(&self) -> HashMap<ExprRef, Value> {
        self.values.iter().cloned().collect()
    }
}

/// Runs `entry` on `inputs` until it returns, fails an assertion or violates an assumption.
/// Every parameter of `entry` needs an input. Array parameters are filled with their value.
pub fn execute(
    ctx: &mut Context,
    program: &(impl ProgramModel + ?Sized),
    entry: FunctionId,
    inputs: &[(ExprRef, u64)],
    opts: &ExecOptions,
) -> Result<Trace, EncodingError> {
    let function = program
        .function(entry)
        .ok_or(EncodingError::UnknownFunction {
            stmt: None,
            function: entry,
        })?;
    let mut exec = Executor {
        ctx,
        program,
        opts,
        versions: VersionArena::default(),
        scratch: VersionArena::default(),
        values: HashMap::new(),
        trace: Trace {
            path: vec![],
            values: vec![],
            failed_assertion: None,
            violated_assumption: None,
        },
        frame: Frame::new(entry, false),
        callers: vec![],
        steps: 0,
        last: None,
    };
    let stmt = StmtId::params(function.entry);
    for (param, _) in inputs.iter() {
        if !function.params.contains(param) {
            return Err(EncodingError::UnknownInput {
                stmt,
                name: param.get_symbol_name(exec.ctx).unwrap_or("?").to_string(),
            });
        }
    }
    for param in function.params.iter() {
        let Some((_, raw)) = inputs.iter().find(|(p, _)| p == param) else {
            return Err(EncodingError::MissingInput {
                stmt,
                name: param.get_symbol_name(exec.ctx).unwrap_or("?").to_string(),
            });
        };
        let value = Value::from_u64(*raw, param.get_type(exec.ctx));
        exec.assign(stmt, *param, value)?;
    }
    exec.enter_block(function.entry, None)?;
    exec.run()?;
    tracing::debug!(
        "executed {} blocks, failed assertion: {:?}",
        exec.trace.path.len(),
        exec.trace.failed_assertion
    );
    Ok(exec.trace)
}

struct Frame {
    function: FunctionId,
    env: HashMap<ExprRef, ExprRef>,
    visits: HashMap<BlockId, u32>,
    block: BlockId,
    pc: usize,
    /// executed on behalf of a summarized call, invisible in the trace
    silent: bool,
}

impl Frame {
    fn new(function: FunctionId, silent: bool) -> Self {
        Self {
            function,
            env: HashMap::new(),
            visits: HashMap::new(),
            block: BlockId(u32::MAX),
            pc: 0,
            silent,
        }
    }
}

enum Flow {
    Continue,
    Stop,
}

struct Executor<'a, P: ProgramModel + ?Sized> {
    ctx: &'a mut Context,
    program: &'a P,
    opts: &'a ExecOptions,
    versions: VersionArena,
    /// versions created inside summarized calls
    scratch: VersionArena,
    values: HashMap<ExprRef, Value>,
    trace: Trace,
    frame: Frame,
    callers: Vec<(Frame, StmtId, Vec<ExprRef>)>,
    steps: u32,
    last: Option<StmtId>,
}

impl<'a, P: ProgramModel + ?Sized> Executor<'a, P> {
    fn run(&mut self) -> Result<(), EncodingError> {
        let program = self.program;
        loop {
            let block = program
                .block(self.frame.block)
                .ok_or(EncodingError::UnknownBlock {
                    block: self.frame.block,
                    pos: self.position(),
                    stmt: self.last,
                })?;
            let pc = self.frame.pc;
            let Some(instr) = block.instructions.get(pc) else {
                return Err(EncodingError::MalformedPath {
                    pos: self.position(),
                    stmt: self.last,
                    msg: format!("{} ends without a terminator", block.id),
                });
            };
            self.frame.pc += 1;
            let stmt = StmtId::new(block.id, pc as u32);
            self.last = Some(stmt);
            if self.frame.silent {
                self.steps += 1;
                if self.steps > self.opts.max_steps {
                    return Err(EncodingError::BoundExceeded {
                        kind: BoundKind::ExecutionSteps,
                        bound: self.opts.max_steps,
                        stmt,
                    });
                }
            }
            if let Flow::Stop = self.step(stmt, instr)? {
                return Ok(());
            }
        }
    }

    fn step(&mut self, stmt: StmtId, instr: &Instruction) -> Result<Flow, EncodingError> {
        match instr {
            Instruction::Assign { target, value } => {
                let value = self.eval(stmt, *value)?;
                self.assign(stmt, *target, value)?;
            }
            Instruction::Phi { .. } => return Err(EncodingError::MisplacedPhi { stmt }),
            Instruction::Store {
                target,
                array,
                index,
                data,
            } => {
                let array = self.eval(stmt, *array)?;
                let index = self.eval(stmt, *index)?;
                let data = self.eval(stmt, *data)?;
                let (Value::Array(mut array), Value::BitVec(index), Value::BitVec(data)) =
                    (array, index, data)
                else {
                    return Err(self.type_error(stmt, "malformed store"));
                };
                baa::ArrayMutOps::store(&mut array, &index, &data);
                self.assign(stmt, *target, Value::Array(array))?;
            }
            Instruction::Load {
                target,
                array,
                index,
            } => {
                let array = self.eval(stmt, *array)?;
                let index = self.eval(stmt, *index)?;
                let (Value::Array(array), Value::BitVec(index)) = (array, index) else {
                    return Err(self.type_error(stmt, "malformed load"));
                };
                let data = baa::ArrayOps::select(&array, &index);
                self.assign(stmt, *target, Value::BitVec(data))?;
            }
            Instruction::Assert { cond } => {
                if !self.eval_bool(stmt, *cond)? {
                    if self.frame.silent {
                        return Err(EncodingError::MalformedPath {
                            pos: self.position(),
                            stmt: Some(stmt),
                            msg: format!("assertion {stmt} fails inside a summarized call"),
                        });
                    }
                    self.trace.failed_assertion = Some(stmt);
                    return Ok(Flow::Stop);
                }
            }
            Instruction::Assume { cond } => {
                if !self.eval_bool(stmt, *cond)? {
                    self.trace.violated_assumption = Some(stmt);
                    return Ok(Flow::Stop);
                }
            }
            Instruction::Call {
                callee,
                args,
                results,
            } => self.call(stmt, *callee, args, results)?,
            Instruction::Branch(t) => return self.terminate(stmt, t),
        }
        Ok(Flow::Continue)
    }

    fn terminate(&mut self, stmt: StmtId, terminator: &Terminator) -> Result<Flow, EncodingError> {
        match terminator {
            Terminator::Goto(target) => self.enter_block(*target, Some(stmt.block))?,
            Terminator::Cond { cond, then, els } => {
                let taken = self.eval_bool(stmt, *cond)?;
                if then != els && !cond.is_symbol(self.ctx) {
                    // mirrors the guard variable of the encoder
                    let name = format!("$guard_{}", stmt.block);
                    self.fresh_value(&name, Type::BOOL, Value::from_u64(taken as u64, Type::BOOL));
                }
                let next = if taken { *then } else { *els };
                self.enter_block(next, Some(stmt.block))?;
            }
            Terminator::Return(values) => {
                let values = values
                    .iter()
                    .map(|v| self.eval(stmt, *v))
                    .collect::<Result<Vec<_>, _>>()?;
                let Some((caller, call, results)) = self.callers.pop() else {
                    return Ok(Flow::Stop);
                };
                if values.len() != results.len() {
                    return Err(EncodingError::ArityMismatch { stmt: call });
                }
                self.frame = caller;
                for (target, value) in results.iter().zip(values) {
                    self.assign(call, *target, value)?;
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
    ) -> Result<(), EncodingError> {
        let program = self.program;
        let function = program
            .function(callee)
            .ok_or(EncodingError::UnknownFunction {
                stmt: Some(stmt),
                function: callee,
            })?;
        if function.params.len() != args.len() {
            return Err(EncodingError::ArityMismatch { stmt });
        }
        let summarized = self.frame.silent
            || self
                .opts
                .calls
                .summarizes(program.summary(callee).is_some());
        if !summarized {
            let depth = self.callers.iter().filter(|(f, _, _)| !f.silent).count() as u32 + 1;
            let max_depth = self.opts.calls.max_depth();
            if depth > max_depth {
                return Err(EncodingError::BoundExceeded {
                    kind: BoundKind::CallDepth,
                    bound: max_depth,
                    stmt,
                });
            }
        }
        let args = args
            .iter()
            .map(|a| self.eval(stmt, *a))
            .collect::<Result<Vec<_>, _>>()?;
        let caller = std::mem::replace(&mut self.frame, Frame::new(callee, summarized));
        self.callers.push((caller, stmt, results.to_vec()));
        for (param, value) in function.params.iter().zip(args) {
            self.assign(stmt, *param, value)?;
        }
        self.enter_block(function.entry, None)
    }

    fn enter_block(&mut self, id: BlockId, from: Option<BlockId>) -> Result<(), EncodingError> {
        let program = self.program;
        let block = program
            .block(id)
            .ok_or(EncodingError::UnknownBlock {
                block: id,
                pos: self.trace.path.len(),
                stmt: self.last,
            })?;
        let visits = self.frame.visits.entry(id).or_insert(0);
        *visits += 1;
        if *visits > self.opts.bound + 1 && !self.frame.silent {
            return Err(EncodingError::BoundExceeded {
                kind: BoundKind::LoopUnrolling,
                bound: self.opts.bound,
                stmt: StmtId::new(id, 0),
            });
        }
        if !self.frame.silent {
            self.trace.path.push(id);
        }
        self.frame.block = id;

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
            phis.push((stmt, *target, self.eval(stmt, value)?));
        }
        self.frame.pc = phis.len();
        for (stmt, target, value) in phis {
            self.assign(stmt, target, value)?;
        }
        Ok(())
    }

    /// Creates the next version of `target` with `value`.
    fn assign(&mut self, stmt: StmtId, target: ExprRef, value: Value) -> Result<(), EncodingError> {
        let name = target
            .get_symbol_name(self.ctx)
            .ok_or_else(|| self.type_error(stmt, "assignment target is not a symbol"))?
            .to_string();
        let tpe = target.get_type(self.ctx);
        let version = self.fresh_value(&name, tpe, value);
        self.frame.env.insert(target, version);
        Ok(())
    }

    fn fresh_value(&mut self, name: &str, tpe: Type, value: Value) -> ExprRef {
        let version = if self.frame.silent {
            self.scratch
                .fresh_named(self.ctx, &format!("$summarized_{name}"), tpe)
        } else {
            let version = self.versions.fresh_named(self.ctx, name, tpe);
            self.trace.values.push((version, value.clone()));
            version
        };
        self.values.insert(version, value);
        version
    }

    fn eval(&mut self, stmt: StmtId, expr: ExprRef) -> Result<Value, EncodingError> {
        let mut env: HashMap<ExprRef, Value> = HashMap::new();
        for symbol in collect_symbols(self.ctx, [expr]) {
            let value = self
                .frame
                .env
                .get(&symbol)
                .and_then(|version| self.values.get(version))
                .ok_or_else(|| EncodingError::UndefinedVersion {
                    stmt,
                    name: symbol.get_symbol_name(self.ctx).unwrap_or("?").to_string(),
                })?;
            env.insert(symbol, value.clone());
        }
        eval_expr(self.ctx, &env, expr).map_err(|source| EncodingError::Eval { stmt, source })
    }

    fn eval_bool(&mut self, stmt: StmtId, expr: ExprRef) -> Result<bool, EncodingError> {
        match self.eval(stmt, expr)? {
            Value::BitVec(v) if baa::BitVecOps::width(&v) == 1 => Ok(baa::BitVecOps::is_tru(&v)),
            _ => Err(self.type_error(stmt, "expected a condition")),
        }
    }

    /// Position of the current block in the trace.
    fn position(&self) -> usize {
        self.trace.path.len().saturating_sub(1)
    }

    fn type_error(&self, stmt: StmtId, msg: &str) -> EncodingError {
        EncodingError::TypeError {
            stmt,
            msg: msg.to_string(),
        }
    }
}
