// Copyright 2023 The Regents of the University of California
// Copyright 2024 Cornell University
// released under BSD 3-Clause License
// author: Kevin Laeufer <laeufer@cornell.edu>

use crate::ir::{Context, ExprMetaData, ExprRef};
use std::collections::HashMap;

/// Replaces symbols in `expr` according to `map`. Symbols without an entry are kept.
pub fn substitute(ctx: &mut Context, expr: ExprRef, map: &HashMap<ExprRef, ExprRef>) -> ExprRef {
    if map.is_empty() {
        return expr;
    }
    let mut rebuilt = ExprMetaData::<Option<ExprRef>>::default();
    let mut todo = vec![expr];
    while let Some(e) = todo.pop() {
        if rebuilt[e].is_some() {
            continue;
        }
        if let Some(replacement) = map.get(&e) {
            *rebuilt.get_mut(e) = Some(*replacement);
            continue;
        }
        let children = ctx.get(e).children();
        let pending: Vec<ExprRef> = children
            .iter()
            .filter(|c| rebuilt[**c].is_none())
            .copied()
            .collect();
        if !pending.is_empty() {
            // revisit once all children are done
            todo.push(e);
            todo.extend(pending);
            continue;
        }
        let new_children: Vec<ExprRef> = children.iter().filter_map(|c| rebuilt[*c]).collect();
        let result = if new_children.as_slice() == children.as_slice() {
            // untouched sub-expressions stay shared
            e
        } else {
            let updated = ctx.get(e).with_children(&new_children);
            ctx.add_expr(updated)
        };
        *rebuilt.get_mut(e) = Some(result);
    }
    rebuilt[expr].unwrap_or(expr)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn substitute_symbols() {
        let mut ctx = Context::default();
        let a = ctx.bv_symbol("a", 4);
        let b = ctx.bv_symbol("b", 4);
        let a1 = ctx.bv_symbol("a@1", 4);
        let sum = ctx.add(a, b);
        let expr = ctx.equal(sum, a);

        let map = HashMap::from([(a, a1)]);
        let res = substitute(&mut ctx, expr, &map);

        let expected_sum = ctx.add(a1, b);
        let expected = ctx.equal(expected_sum, a1);
        assert_eq!(res, expected);
        // untouched sub-expressions are shared
        assert_eq!(substitute(&mut ctx, b, &map), b);
    }

    #[test]
    fn substitute_arrays() {
        let mut ctx = Context::default();
        let mem = ctx.array_symbol("mem", 2, 4);
        let mem1 = ctx.array_symbol("mem@1", 2, 4);
        let i = ctx.bv_symbol("i", 2);
        let read = ctx.array_read(mem, i);
        let res = substitute(&mut ctx, read, &HashMap::from([(mem, mem1)]));
        assert_eq!(res, ctx.array_read(mem1, i));
    }

    #[test]
    fn shared_operands_are_rewritten_once() {
        let mut ctx = Context::default();
        let x = ctx.bv_symbol("x", 4);
        let y = ctx.bv_symbol("y", 4);
        let twice = ctx.add(x, x);
        let both = ctx.mul(twice, twice);
        let res = substitute(&mut ctx, both, &HashMap::from([(x, y)]));
        let y_twice = ctx.add(y, y);
        assert_eq!(res, ctx.mul(y_twice, y_twice));
    }
}
