// Copyright 2023 The Regents of the University of California
// Copyright 2024 Cornell University
// released under BSD 3-Clause License
// author: Kevin Laeufer <laeufer@cornell.edu>

use crate::ir::{Context, ExprRef};
use std::ops::Index;

/// Returns all symbols (bit-vector and array) that `roots` depend on, ordered by their reference.
pub fn collect_symbols(ctx: &Context, roots: impl IntoIterator<Item = ExprRef>) -> Vec<ExprRef> {
    let mut visited = ExprMetaData::<bool>::default();
    let mut todo: Vec<ExprRef> = roots.into_iter().collect();
    let mut out = Vec::new();
    while let Some(e) = todo.pop() {
        if std::mem::replace(visited.get_mut(e), true) {
            continue;
        }
        let expr = ctx.get(e);
        if expr.is_symbol() {
            out.push(e);
        }
        todo.extend(expr.children());
    }
    out.sort();
    out
}

/// A dense map from expressions to `T`. Expressions without an entry map to `T::default()`.
#[derive(Debug, Default, Clone)]
pub struct ExprMetaData<T: Default + Clone> {
    inner: Vec<T>,
    default: T,
}

impl<T: Default + Clone> ExprMetaData<T> {
    pub fn get(&self, e: ExprRef) -> &T {
        self.inner.get(e.index()).unwrap_or(&self.default)
    }

    pub fn get_mut(&mut self, e: ExprRef) -> &mut T {
        if self.inner.len() <= e.index() {
            self.inner.resize(e.index() + 1, T::default());
        }
        &mut self.inner[e.index()]
    }
}

impl<T: Default + Clone> Index<ExprRef> for ExprMetaData<T> {
    type Output = T;

    fn index(&self, index: ExprRef) -> &Self::Output {
        self.get(index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn symbols_are_deduplicated_and_sorted() {
        let mut ctx = Context::default();
        let a = ctx.bv_symbol("a", 4);
        let b = ctx.bv_symbol("b", 4);
        let sum = ctx.add(b, a);
        let twice = ctx.add(sum, a);
        let cond = ctx.equal(twice, b);
        assert_eq!(collect_symbols(&ctx, [cond]), vec![a, b]);
        let lit = ctx.one(4);
        assert!(collect_symbols(&ctx, [lit]).is_empty());
    }

    #[test]
    fn array_symbols_are_collected() {
        let mut ctx = Context::default();
        let mem = ctx.array_symbol("mem", 2, 4);
        let i = ctx.bv_symbol("i", 2);
        let read = ctx.array_read(mem, i);
        assert_eq!(collect_symbols(&ctx, [read]), vec![mem, i]);
    }

    #[test]
    fn meta_data_defaults() {
        let mut ctx = Context::default();
        let a = ctx.bv_symbol("a", 4);
        let b = ctx.bv_symbol("b", 4);
        let mut m = ExprMetaData::<u32>::default();
        *m.get_mut(b) = 3;
        assert_eq!(m[a], 0);
        assert_eq!(m[b], 3);
    }
}
