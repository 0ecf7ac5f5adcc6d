// Copyright 2024 Cornell University
// released under BSD 3-Clause License
// author: Kevin Laeufer <laeufer@cornell.edu>

use crate::ir::EvalError;
use crate::program::{BlockId, FunctionId, StmtId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BoundKind {
    /// A block was entered more than `bound + 1` times within one function activation.
    LoopUnrolling,
    /// Inlined calls nested deeper than the configured depth.
    CallDepth,
    /// Concrete execution of a summarized call did not terminate in time.
    ExecutionSteps,
}

impl std::fmt::Display for BoundKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BoundKind::LoopUnrolling => write!(f, "loop unrolling"),
            BoundKind::CallDepth => write!(f, "call depth"),
            BoundKind::ExecutionSteps => write!(f, "execution step"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EncodingError {
    #[error("{kind} bound of {bound} exceeded at {stmt}")]
    BoundExceeded {
        kind: BoundKind,
        bound: u32,
        stmt: StmtId,
    },
    /// `pos` is the position in the path, `stmt` the last statement before the block.
    #[error("path position {pos}: unknown block {block}{}", after(.stmt))]
    UnknownBlock {
        block: BlockId,
        pos: usize,
        stmt: Option<StmtId>,
    },
    #[error("unknown function {function}")]
    UnknownFunction {
        stmt: Option<StmtId>,
        function: FunctionId,
    },
    #[error("{stmt}: {to} is not a successor")]
    InvalidEdge { stmt: StmtId, to: BlockId },
    #[error("{stmt}: `{name}` is used before it is defined")]
    UndefinedVersion { stmt: StmtId, name: String },
    #[error("{stmt}: phi has no value for the predecessor on this path")]
    MissingPhiIncoming { stmt: StmtId },
    #[error("{stmt}: phi after a regular instruction")]
    MisplacedPhi { stmt: StmtId },
    #[error("{stmt}: no contract for {function}")]
    MissingSummary { stmt: StmtId, function: FunctionId },
    #[error("{stmt}: wrong number of arguments or results")]
    ArityMismatch { stmt: StmtId },
    #[error("{stmt}: {msg}")]
    TypeError { stmt: StmtId, msg: String },
    #[error("malformed path at position {pos}{}: {msg}", after(.stmt))]
    MalformedPath {
        pos: usize,
        stmt: Option<StmtId>,
        msg: String,
    },
    #[error("{stmt}: `{name}` is not a parameter of the entry function")]
    UnknownInput { stmt: StmtId, name: String },
    #[error("{stmt}: no input value for `{name}`")]
    MissingInput { stmt: StmtId, name: String },
    #[error("{stmt}: {source}")]
    Eval { stmt: StmtId, source: EvalError },
}

impl EncodingError {
    /// Bound exhaustion is a limitation of the analysis, every other error points to malformed
    /// input.
    pub fn is_bound_exceeded(&self) -> bool {
        matches!(self, EncodingError::BoundExceeded { .. })
    }

    pub fn stmt(&self) -> Option<StmtId> {
        match self {
            EncodingError::BoundExceeded { stmt, .. }
            | EncodingError::InvalidEdge { stmt, .. }
            | EncodingError::UndefinedVersion { stmt, .. }
            | EncodingError::MissingPhiIncoming { stmt }
            | EncodingError::MisplacedPhi { stmt }
            | EncodingError::MissingSummary { stmt, .. }
            | EncodingError::ArityMismatch { stmt }
            | EncodingError::TypeError { stmt, .. }
            | EncodingError::UnknownInput { stmt, .. }
            | EncodingError::MissingInput { stmt, .. }
            | EncodingError::Eval { stmt, .. } => Some(*stmt),
            EncodingError::UnknownFunction { stmt, .. }
            | EncodingError::UnknownBlock { stmt, .. }
            | EncodingError::MalformedPath { stmt, .. } => *stmt,
        }
    }
}

fn after(stmt: &Option<StmtId>) -> String {
    match stmt {
        Some(stmt) => format!(" after {stmt}"),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn path_errors_name_their_position() {
        let err = EncodingError::UnknownBlock {
            block: BlockId(7),
            pos: 2,
            stmt: Some(StmtId::new(BlockId(1), 3)),
        };
        assert_eq!(err.to_string(), "path position 2: unknown block bb7 after bb1:3");
        assert_eq!(err.stmt(), Some(StmtId::new(BlockId(1), 3)));
        let err = EncodingError::MalformedPath {
            pos: 0,
            stmt: None,
            msg: "path is empty".to_string(),
        };
        assert_eq!(err.to_string(), "malformed path at position 0: path is empty");
        assert_eq!(err.stmt(), None);
        let err = EncodingError::MissingInput {
            stmt: StmtId::params(BlockId(0)),
            name: "n".to_string(),
        };
        assert_eq!(err.to_string(), "bb0:params: no input value for `n`");
    }
}
