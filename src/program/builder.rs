// Copyright 2024 Cornell University
// released under BSD 3-Clause License
// author: Kevin Laeufer <laeufer@cornell.edu>

use super::model::*;
use crate::ir::*;
use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProgramError {
    #[error("function {function} has no blocks")]
    EmptyFunction { function: String },
    #[error("block {block} does not end in a branch or return")]
    MissingTerminator { block: BlockId },
    #[error("{stmt}: terminator before the end of the block")]
    MisplacedTerminator { stmt: StmtId },
    #[error("{stmt}: phi after a regular instruction")]
    MisplacedPhi { stmt: StmtId },
    #[error("{stmt}: assignment target is not a symbol")]
    NotASymbol { stmt: StmtId },
    #[error("{stmt}: `{name}` is not a valid variable name")]
    InvalidName { stmt: StmtId, name: String },
    #[error("{stmt}: `{name}` is assigned more than once")]
    Redefinition { stmt: StmtId, name: String },
    #[error("{stmt}: unknown block {target}")]
    UnknownTarget { stmt: StmtId, target: BlockId },
    #[error("{stmt}: unknown function {callee}")]
    UnknownFunction { stmt: StmtId, callee: FunctionId },
    #[error("{stmt}: wrong number of arguments or results")]
    ArityMismatch { stmt: StmtId },
    #[error("{stmt}: {msg}")]
    TypeError { stmt: StmtId, msg: String },
    #[error("contract of {function} does not match its signature")]
    InvalidContract { function: String },
}

/// Incrementally assembles a [`Program`]. Block ids are handed out in creation order, thus
/// statements created earlier compare smaller.
#[derive(Debug, Default)]
pub struct ProgramBuilder {
    program: Program,
}

impl ProgramBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn function(&mut self, name: &str, params: &[ExprRef]) -> FunctionId {
        let id = FunctionId(self.program.functions.len() as u32);
        self.program.functions.insert(
            id,
            Function {
                id,
                name: name.to_string(),
                params: params.to_vec(),
                entry: BlockId(u32::MAX),
                blocks: vec![],
            },
        );
        id
    }

    /// Adds a block to `function`. The first block of a function is its entry.
    pub fn block(&mut self, function: FunctionId) -> BlockId {
        let id = BlockId(self.program.blocks.len() as u32);
        let func = self
            .program
            .functions
            .get_mut(&function)
            .unwrap_or_else(|| panic!("unknown function {function}"));
        if func.blocks.is_empty() {
            func.entry = id;
        }
        func.blocks.push(id);
        self.program.blocks.insert(
            id,
            Block {
                id,
                function,
                instructions: vec![],
            },
        );
        id
    }

    pub fn push(&mut self, block: BlockId, instr: Instruction) -> StmtId {
        let b = self
            .program
            .blocks
            .get_mut(&block)
            .unwrap_or_else(|| panic!("unknown block {block}"));
        b.instructions.push(instr);
        StmtId::new(block, (b.instructions.len() - 1) as u32)
    }

    /// Like [`ProgramBuilder::push`] but also remembers the source line.
    pub fn push_at(&mut self, block: BlockId, instr: Instruction, line: u32) -> StmtId {
        let stmt = self.push(block, instr);
        self.program.lines.insert(stmt, line);
        stmt
    }

    pub fn summary(&mut self, function: FunctionId, contract: Contract) -> &mut Self {
        self.program.summaries.insert(function, contract);
        self
    }

    pub fn source(&mut self, name: &str, text: &str) -> &mut Self {
        self.program.source = Some(SourceText {
            name: name.to_string(),
            text: text.to_string(),
        });
        self
    }

    pub fn build(self, ctx: &Context) -> Result<Program, ProgramError> {
        let program = self.program;
        for func in program.functions.values() {
            validate_function(ctx, &program, func)?;
        }
        for (id, contract) in program.summaries.iter() {
            let func = program.function(*id).ok_or(ProgramError::InvalidContract {
                function: id.to_string(),
            })?;
            let invalid = || ProgramError::InvalidContract {
                function: func.name.clone(),
            };
            if contract.params.len() != func.params.len()
                || contract.pre.get_type(ctx) != Type::BOOL
                || contract.post.get_type(ctx) != Type::BOOL
            {
                return Err(invalid());
            }
            if let Some(results) = return_arity(&program, func) {
                if results != contract.results.len() {
                    return Err(invalid());
                }
            }
        }
        Ok(program)
    }
}

/// Number of values returned by `func`, `None` if it never returns.
fn return_arity(program: &Program, func: &Function) -> Option<usize> {
    func.blocks.iter().find_map(|b| {
        match program.block(*b).and_then(|b| b.terminator()) {
            Some(Terminator::Return(values)) => Some(values.len()),
            _ => None,
        }
    })
}

fn validate_function(ctx: &Context, program: &Program, func: &Function) -> Result<(), ProgramError> {
    if func.blocks.is_empty() {
        return Err(ProgramError::EmptyFunction {
            function: func.name.clone(),
        });
    }
    let mut defined: HashMap<ExprRef, StmtId> = HashMap::new();
    let entry_stmt = StmtId::new(func.entry, 0);
    for param in func.params.iter() {
        define(ctx, &mut defined, entry_stmt, *param)?;
    }
    let arity = return_arity(program, func);

    for block_id in func.blocks.iter() {
        let block = &program.blocks[block_id];
        if block.terminator().is_none() {
            return Err(ProgramError::MissingTerminator { block: *block_id });
        }
        let mut phis_allowed = true;
        let last = block.instructions.len() - 1;
        for (ii, instr) in block.instructions.iter().enumerate() {
            let stmt = StmtId::new(*block_id, ii as u32);
            if instr.is_terminator() && ii != last {
                return Err(ProgramError::MisplacedTerminator { stmt });
            }
            match instr {
                Instruction::Phi { .. } if !phis_allowed => {
                    return Err(ProgramError::MisplacedPhi { stmt })
                }
                Instruction::Phi { .. } => {}
                _ => phis_allowed = false,
            }
            for target in instr.defines() {
                define(ctx, &mut defined, stmt, target)?;
            }
            validate_instruction(ctx, program, func, arity, stmt, instr)?;
        }
    }
    Ok(())
}

fn define(
    ctx: &Context,
    defined: &mut HashMap<ExprRef, StmtId>,
    stmt: StmtId,
    target: ExprRef,
) -> Result<(), ProgramError> {
    let name = target
        .get_symbol_name(ctx)
        .ok_or(ProgramError::NotASymbol { stmt })?;
    // `@` separates a variable from its version and `$` marks encoder internal symbols
    if name.is_empty() || name.contains('@') || name.starts_with('$') {
        return Err(ProgramError::InvalidName {
            stmt,
            name: name.to_string(),
        });
    }
    if defined.insert(target, stmt).is_some() {
        return Err(ProgramError::Redefinition {
            stmt,
            name: name.to_string(),
        });
    }
    Ok(())
}

fn validate_instruction(
    ctx: &Context,
    program: &Program,
    func: &Function,
    arity: Option<usize>,
    stmt: StmtId,
    instr: &Instruction,
) -> Result<(), ProgramError> {
    let type_of = |e: ExprRef| {
        type_check_deep(ctx, e).map_err(|err| ProgramError::TypeError {
            stmt,
            msg: err.get_msg().to_string(),
        })
    };
    let expect = |e: ExprRef, tpe: Type, what: &str| -> Result<(), ProgramError> {
        let actual = type_of(e)?;
        if actual == tpe {
            Ok(())
        } else {
            Err(ProgramError::TypeError {
                stmt,
                msg: format!("{what} needs to be {tpe}, not {actual}"),
            })
        }
    };
    let known_block = |target: BlockId| {
        if program
            .block(target)
            .map(|b| b.function == func.id)
            .unwrap_or(false)
        {
            Ok(())
        } else {
            Err(ProgramError::UnknownTarget { stmt, target })
        }
    };

    match instr {
        Instruction::Assign { target, value } => {
            expect(*value, target.get_type(ctx), "assigned value")
        }
        Instruction::Phi { target, incoming } => {
            let tpe = target.get_type(ctx);
            for (pred, value) in incoming.iter() {
                known_block(*pred)?;
                expect(*value, tpe, "incoming value")?;
            }
            Ok(())
        }
        Instruction::Store {
            target,
            array,
            index,
            data,
        } => {
            let tpe = target.get_type(ctx);
            let Type::Array(a) = tpe else {
                return Err(ProgramError::TypeError {
                    stmt,
                    msg: format!("store target needs to be an array, not {tpe}"),
                });
            };
            expect(*array, tpe, "stored array")?;
            expect(*index, a.index_type(), "index")?;
            expect(*data, a.data_type(), "data")
        }
        Instruction::Load {
            target,
            array,
            index,
        } => {
            let Type::Array(a) = type_of(*array)? else {
                return Err(ProgramError::TypeError {
                    stmt,
                    msg: "can only load from an array".to_string(),
                });
            };
            expect(*index, a.index_type(), "index")?;
            if target.get_type(ctx) != a.data_type() {
                return Err(ProgramError::TypeError {
                    stmt,
                    msg: format!("load target needs to be {}", a.data_type()),
                });
            }
            Ok(())
        }
        Instruction::Assert { cond } | Instruction::Assume { cond } => {
            expect(*cond, Type::BOOL, "condition")
        }
        Instruction::Call {
            callee,
            args,
            results,
        } => {
            let Some(callee_fn) = program.function(*callee) else {
                return Err(ProgramError::UnknownFunction {
                    stmt,
                    callee: *callee,
                });
            };
            if callee_fn.params.len() != args.len() {
                return Err(ProgramError::ArityMismatch { stmt });
            }
            if let Some(n) = return_arity(program, callee_fn) {
                if n != results.len() {
                    return Err(ProgramError::ArityMismatch { stmt });
                }
            }
            for (param, arg) in callee_fn.params.iter().zip(args.iter()) {
                expect(*arg, param.get_type(ctx), "argument")?;
            }
            Ok(())
        }
        Instruction::Branch(Terminator::Goto(target)) => known_block(*target),
        Instruction::Branch(Terminator::Cond { cond, then, els }) => {
            expect(*cond, Type::BOOL, "branch condition")?;
            known_block(*then)?;
            known_block(*els)
        }
        Instruction::Branch(Terminator::Return(values)) => {
            if arity != Some(values.len()) {
                return Err(ProgramError::ArityMismatch { stmt });
            }
            for value in values.iter() {
                type_of(*value)?;
            }
            Ok(())
        }
    }
}
