// Copyright 2023 The Regents of the University of California
// Copyright 2024 Cornell University
// released under BSD 3-Clause License
// author: Kevin Laeufer <laeufer@cornell.edu>

use crate::ir::bv_from_u64;
use baa::{BitVecOps, BitVecValue};
use easy_smt as smt;

fn parse_smt_bit_vec(smt_ctx: &smt::Context, expr: smt::SExpr) -> Option<BitVecValue> {
    let data = smt_ctx.get(expr);
    match data {
        smt::SExprData::Atom(value) => smt_bit_vec_str_to_value(value),
        // unwraps expressions like: ((a true))
        smt::SExprData::List([inner]) => parse_smt_bit_vec(smt_ctx, *inner),
        // unwraps expressions like: (a true)
        smt::SExprData::List([_, value]) => parse_smt_bit_vec(smt_ctx, *value),
        _ => None,
    }
}

/// Parses a boolean model value.
pub fn parse_smt_bool(smt_ctx: &smt::Context, expr: smt::SExpr) -> Option<bool> {
    let value = parse_smt_bit_vec(smt_ctx, expr)?;
    if value.width() == 1 {
        Some(value.is_tru())
    } else {
        None
    }
}

fn smt_bit_vec_str_to_value(a: &str) -> Option<BitVecValue> {
    if let Some(suffix) = a.strip_prefix("#b") {
        let width = suffix.len() as u32;
        if width == 0 || width > 64 {
            return None;
        }
        Some(bv_from_u64(u64::from_str_radix(suffix, 2).ok()?, width))
    } else if let Some(suffix) = a.strip_prefix("#x") {
        let width = (suffix.len() * 4) as u32;
        if width == 0 || width > 64 {
            return None;
        }
        Some(bv_from_u64(u64::from_str_radix(suffix, 16).ok()?, width))
    } else if a == "true" {
        Some(BitVecValue::tru())
    } else if a == "false" {
        Some(BitVecValue::fals())
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use easy_smt::*;

    #[test]
    fn test_yices2_result_parsing() {
        // yices will produce responses like this for a `get-value` call:
        // ((n9@0 true))
        let ctx = ContextBuilder::new().build().unwrap();
        let r0 = ctx.list(vec![ctx.list(vec![ctx.atom("n9@0"), ctx.true_()])]);
        let val0 = parse_smt_bit_vec(&ctx, r0).unwrap();
        assert_eq!(val0.to_u64().unwrap(), 1);
        assert_eq!(val0.width(), 1);
        assert!(val0.is_tru());
        assert_eq!(parse_smt_bool(&ctx, r0), Some(true));
    }

    #[test]
    fn test_bit_vec_literals() {
        let ctx = ContextBuilder::new().build().unwrap();
        let bin = ctx.list(vec![ctx.atom("cost"), ctx.atom("#b0110")]);
        let val = parse_smt_bit_vec(&ctx, bin).unwrap();
        assert_eq!(val.width(), 4);
        assert_eq!(val.to_u64().unwrap(), 6);
        let hex = ctx.atom("#x00ff");
        assert_eq!(parse_smt_bit_vec(&ctx, hex).unwrap().to_u64(), Some(255));
        // decimal answers are a protocol violation for our queries
        assert!(parse_smt_bit_vec(&ctx, ctx.atom("12")).is_none());
        assert!(parse_smt_bool(&ctx, hex).is_none());
    }
}
