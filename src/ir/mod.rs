// Copyright 2023 The Regents of the University of California
// Copyright 2024 Cornell University
// released under BSD 3-Clause License
// author: Kevin Laeufer <laeufer@cornell.edu>
mod analysis;
mod context;
mod eval;
mod expr;
mod serialize;
mod transform;
mod type_check;

pub use analysis::{collect_symbols, ExprMetaData};
pub use context::{Context, ExprRef, StringRef};
pub use eval::{bv_from_u64, eval_bool_expr, eval_expr, EvalError, GetExprValue, Value};
pub use expr::{ArithOp, ArrayType, BVLiteralInt, Children, CmpOp, Expr, Type, WidthInt};
pub use serialize::SerializableIrNode;
pub use transform::substitute;
pub use type_check::{type_check_deep, TypeCheck, TypeCheckError};
