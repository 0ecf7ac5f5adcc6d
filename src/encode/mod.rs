// Copyright 2024 Cornell University
// released under BSD 3-Clause License
// author: Kevin Laeufer <laeufer@cornell.edu>

//! Turns a program path into single-assignment constraints that remember which statement they
//! came from.

mod constraint;
mod encoder;
mod error;
mod versions;

pub use constraint::{
    ArrayUpdate, Constraint, ConstraintId, ConstraintKind, ConstraintSet, Origin, Provenance,
    ProvenanceMap,
};
pub use encoder::{encode_path, CallPolicy, PathSpec};
pub use error::{BoundKind, EncodingError};
pub use versions::{VarVersion, VersionArena};
