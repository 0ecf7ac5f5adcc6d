// Copyright 2024 Cornell University
// released under BSD 3-Clause License
// author: Kevin Laeufer <laeufer@cornell.edu>

use crate::ir::ExprRef;
use indexmap::IndexMap;
use smallvec::{smallvec, SmallVec};
use std::collections::HashMap;
use std::fmt::{Display, Formatter};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlockId(pub u32);

impl Display for BlockId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "bb{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FunctionId(pub u32);

impl Display for FunctionId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "fn{}", self.0)
    }
}

/// Identifies an instruction by its block and position. Statement ids are ordered by block
/// first and instruction index second.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StmtId {
    pub block: BlockId,
    pub index: u32,
}

impl StmtId {
    const PARAMS: u32 = u32::MAX;

    pub fn new(block: BlockId, index: u32) -> Self {
        Self { block, index }
    }

    /// Binds the parameters of the function whose entry block is `entry`. Never refers to an
    /// instruction.
    pub fn params(entry: BlockId) -> Self {
        Self {
            block: entry,
            index: Self::PARAMS,
        }
    }

    pub fn is_params(&self) -> bool {
        self.index == Self::PARAMS
    }
}

impl Display for StmtId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        if self.is_params() {
            write!(f, "{}:params", self.block)
        } else {
            write!(f, "{}:{}", self.block, self.index)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Terminator {
    Goto(BlockId),
    Cond {
        cond: ExprRef,
        then: BlockId,
        els: BlockId,
    },
    Return(Vec<ExprRef>),
}

impl Terminator {
    pub fn successors(&self) -> SmallVec<[BlockId; 2]> {
        match self {
            Terminator::Goto(b) => smallvec![*b],
            Terminator::Cond { then, els, .. } if then == els => smallvec![*then],
            Terminator::Cond { then, els, .. } => smallvec![*then, *els],
            Terminator::Return(_) => smallvec![],
        }
    }
}

/// A single-assignment instruction. Variables are `ir` symbols, expressions are `ir` formulas
/// over those symbols.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Instruction {
    Assign {
        target: ExprRef,
        value: ExprRef,
    },
    /// Selects the value that flows in from the predecessor block.
    Phi {
        target: ExprRef,
        incoming: Vec<(BlockId, ExprRef)>,
    },
    /// `target = array` with `array[index] = data`
    Store {
        target: ExprRef,
        array: ExprRef,
        index: ExprRef,
        data: ExprRef,
    },
    /// `target = array[index]`
    Load {
        target: ExprRef,
        array: ExprRef,
        index: ExprRef,
    },
    Assert {
        cond: ExprRef,
    },
    Assume {
        cond: ExprRef,
    },
    Call {
        callee: FunctionId,
        args: Vec<ExprRef>,
        results: Vec<ExprRef>,
    },
    Branch(Terminator),
}

impl Instruction {
    /// Symbols that this instruction assigns.
    pub fn defines(&self) -> SmallVec<[ExprRef; 1]> {
        match self {
            Instruction::Assign { target, .. }
            | Instruction::Phi { target, .. }
            | Instruction::Store { target, .. }
            | Instruction::Load { target, .. } => smallvec![*target],
            Instruction::Call { results, .. } => results.iter().cloned().collect(),
            _ => smallvec![],
        }
    }

    pub fn is_terminator(&self) -> bool {
        matches!(self, Instruction::Branch(_))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    pub id: BlockId,
    pub function: FunctionId,
    pub instructions: Vec<Instruction>,
}

impl Block {
    /// The last instruction. Blocks of a validated program always end in a terminator.
    pub fn terminator(&self) -> Option<&Terminator> {
        match self.instructions.last() {
            Some(Instruction::Branch(t)) => Some(t),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Function {
    pub id: FunctionId,
    pub name: String,
    pub params: Vec<ExprRef>,
    pub entry: BlockId,
    pub blocks: Vec<BlockId>,
}

/// Externally supplied pre- and postcondition of a function. `pre` may only refer to `params`
/// while `post` may refer to `params` and `results`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Contract {
    pub params: Vec<ExprRef>,
    pub results: Vec<ExprRef>,
    pub pre: ExprRef,
    pub post: ExprRef,
}

/// Read-only view of a program in single-assignment form.
pub trait ProgramModel {
    fn block(&self, id: BlockId) -> Option<&Block>;
    fn function(&self, id: FunctionId) -> Option<&Function>;
    /// Contract used when a call is summarized instead of inlined.
    fn summary(&self, id: FunctionId) -> Option<&Contract>;

    fn function_of(&self, id: BlockId) -> Option<FunctionId> {
        Some(self.block(id)?.function)
    }

    fn successors(&self, id: BlockId) -> SmallVec<[BlockId; 2]> {
        self.block(id)
            .and_then(|b| b.terminator())
            .map(|t| t.successors())
            .unwrap_or_default()
    }

    fn statement(&self, stmt: StmtId) -> Option<&Instruction> {
        self.block(stmt.block)?
            .instructions
            .get(stmt.index as usize)
    }

    /// 1-based line in the source text that a statement was lowered from.
    fn source_line(&self, _stmt: StmtId) -> Option<u32> {
        None
    }

    /// `(file name, content)` of the original source.
    fn source(&self) -> Option<(&str, &str)> {
        None
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct SourceText {
    pub(crate) name: String,
    pub(crate) text: String,
}

/// A validated program. Create through [`crate::program::ProgramBuilder`].
#[derive(Debug, Clone, Default)]
pub struct Program {
    pub(crate) functions: IndexMap<FunctionId, Function>,
    pub(crate) blocks: IndexMap<BlockId, Block>,
    pub(crate) summaries: HashMap<FunctionId, Contract>,
    pub(crate) lines: HashMap<StmtId, u32>,
    pub(crate) source: Option<SourceText>,
}

impl Program {
    pub fn functions(&self) -> impl Iterator<Item = &Function> {
        self.functions.values()
    }

    pub fn blocks(&self) -> impl Iterator<Item = &Block> {
        self.blocks.values()
    }

    pub fn find_function(&self, name: &str) -> Option<&Function> {
        self.functions.values().find(|f| f.name == name)
    }
}

impl ProgramModel for Program {
    fn block(&self, id: BlockId) -> Option<&Block> {
        self.blocks.get(&id)
    }

    fn function(&self, id: FunctionId) -> Option<&Function> {
        self.functions.get(&id)
    }

    fn summary(&self, id: FunctionId) -> Option<&Contract> {
        self.summaries.get(&id)
    }

    fn source_line(&self, stmt: StmtId) -> Option<u32> {
        self.lines.get(&stmt).copied()
    }

    fn source(&self) -> Option<(&str, &str)> {
        self.source
            .as_ref()
            .map(|s| (s.name.as_str(), s.text.as_str()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stmt_order_is_block_then_index() {
        let a = StmtId::new(BlockId(0), 7);
        let b = StmtId::new(BlockId(1), 0);
        let c = StmtId::new(BlockId(1), 2);
        let mut stmts = vec![c, a, b];
        stmts.sort();
        assert_eq!(stmts, [a, b, c]);
        assert_eq!(c.to_string(), "bb1:2");
    }

    #[test]
    fn successors_of_terminators() {
        let mut ctx = crate::ir::Context::default();
        let c = ctx.bv_symbol("c", 1);
        let cond = Terminator::Cond {
            cond: c,
            then: BlockId(1),
            els: BlockId(2),
        };
        assert_eq!(cond.successors().as_slice(), &[BlockId(1), BlockId(2)]);
        assert!(Terminator::Return(vec![]).successors().is_empty());
    }
}
