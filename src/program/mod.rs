// Copyright 2024 Cornell University
// released under BSD 3-Clause License
// author: Kevin Laeufer <laeufer@cornell.edu>

//! Read-only access to programs in single-assignment form.

mod builder;
mod exec;
mod model;

pub use builder::{ProgramBuilder, ProgramError};
pub use exec::{execute, ExecOptions, Trace};
pub use model::{
    Block, BlockId, Contract, Function, FunctionId, Instruction, Program, ProgramModel, StmtId,
    Terminator,
};
