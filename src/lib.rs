// Copyright 2023 The Regents of the University of California
// Copyright 2024 Cornell University
// released under BSD 3-Clause License
// author: Kevin Laeufer <laeufer@cornell.edu>

//! Fault localization for programs in single-assignment form.
//!
//! A failing path is encoded into bit-vector constraints, every constraint gets a weight that
//! reflects how likely it is to contain the bug, and a weighted partial MaxSAT query finds the
//! cheapest set of constraints whose removal makes the assertion hold. The statements behind
//! those constraints are the suspects.

pub mod encode;
pub mod ir;
pub mod localize;
pub mod maxsat;
pub mod program;
pub mod report;
pub mod smt;
pub mod weight;

pub use localize::{localize, FaultLocalizer, LocalizeError, LocalizerOptions, Target};
pub use report::{render, LocalizationResult, Suspect};
pub use weight::WeightTable;
