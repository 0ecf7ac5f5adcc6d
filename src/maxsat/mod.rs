// Copyright 2024 Cornell University
// released under BSD 3-Clause License
// author: Kevin Laeufer <laeufer@cornell.edu>

//! Weighted partial MaxSAT over `ir` formulas.
//!
//! An engine answers a single question: which soft formulas need to be dropped, at minimal
//! total weight, so that the hard formulas together with the remaining soft formulas become
//! satisfiable. How the answer is computed is up to the engine. Solver resources are held by a
//! [`MaxSatSession`] which releases them when it is dropped.

mod enumerate;
mod smt;

pub use enumerate::EnumerativeMaxSat;
pub use smt::{
    check_assuming, check_assuming_end, SmtMaxSat, SmtSession, SmtSolverCmd, BITWUZLA_CMD,
    YICES2_CMD, Z3_CMD,
};

use crate::ir::{Context, ExprRef};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Shared cancellation flag. Clones observe the same flag.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Time and cancellation limits for a single `minimal_drop` call.
#[derive(Debug, Clone)]
pub struct Budget {
    timeout: Option<Duration>,
    deadline: Option<Instant>,
    cancel: CancelToken,
}

impl Budget {
    pub fn new(timeout: Option<Duration>, cancel: CancelToken) -> Self {
        Self {
            timeout,
            deadline: timeout.map(|t| Instant::now() + t),
            cancel,
        }
    }

    pub fn unlimited() -> Self {
        Self::new(None, CancelToken::default())
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|d| d.saturating_duration_since(Instant::now()))
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn is_expired(&self) -> bool {
        self.deadline.map(|d| Instant::now() >= d).unwrap_or(false)
    }

    /// Engines poll this between solver queries and enumeration steps.
    pub fn should_stop(&self) -> bool {
        self.is_cancelled() || self.is_expired()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MaxSatOutcome {
    /// Indices into the soft list (ascending) that were dropped, and their summed weight.
    Optimum { dropped: Vec<usize>, cost: u64 },
    /// The hard formulas alone are unsatisfiable.
    Infeasible,
    /// Budget ran out or was cancelled before an optimum was proven.
    Timeout,
}

#[derive(Debug, thiserror::Error)]
pub enum SolverError {
    #[error("failed to communicate with solver: {0}")]
    Io(#[from] std::io::Error),
    #[error("unexpected solver response: {0}")]
    Protocol(String),
    #[error("instance is not supported by this engine: {0}")]
    Unsupported(String),
}

pub trait MaxSatSession {
    /// Finds a minimum weight subset of `soft` that needs to be dropped in order for
    /// `hard ∧ (soft \ dropped)` to be satisfiable. All weights must be positive.
    fn minimal_drop(
        &mut self,
        ctx: &Context,
        hard: &[ExprRef],
        soft: &[(ExprRef, u64)],
        budget: &Budget,
    ) -> Result<MaxSatOutcome, SolverError>;
}

pub trait MaxSatEngine: Sync {
    type Session: MaxSatSession;
    fn name(&self) -> &str;
    /// Acquires solver resources. They are released when the session is dropped.
    fn open(&self) -> Result<Self::Session, SolverError>;
}

/// Sum of the weights at `dropped`, `None` on overflow.
pub(crate) fn drop_cost(soft: &[(ExprRef, u64)], dropped: &[usize]) -> Option<u64> {
    dropped
        .iter()
        .try_fold(0u64, |acc, ii| acc.checked_add(soft[*ii].1))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancel_token_is_shared() {
        let token = CancelToken::new();
        let budget = Budget::new(None, token.clone());
        assert!(!budget.should_stop());
        token.cancel();
        assert!(budget.is_cancelled());
        assert!(budget.should_stop());
    }

    #[test]
    fn zero_timeout_expires() {
        let budget = Budget::new(Some(Duration::ZERO), CancelToken::new());
        assert!(budget.is_expired());
        assert_eq!(budget.remaining(), Some(Duration::ZERO));
        assert!(!Budget::unlimited().is_expired());
    }
}
