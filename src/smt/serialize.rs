// Copyright 2023 The Regents of the University of California
// Copyright 2024 Cornell University
// released under BSD 3-Clause License
// author: Kevin Laeufer <laeufer@cornell.edu>

use crate::ir::*;
use easy_smt as smt;
use std::borrow::Cow;

/// SMT sort of `tpe`. Single bits are booleans.
pub fn convert_tpe(smt_ctx: &smt::Context, tpe: Type) -> smt::SExpr {
    match tpe {
        Type::BV(1) => smt_ctx.bool_sort(),
        Type::BV(width) => smt_ctx.bit_vec_sort(smt_ctx.numeral(width)),
        Type::Array(a) => {
            let from = convert_tpe(smt_ctx, a.index_type());
            let to = convert_tpe(smt_ctx, a.data_type());
            smt_ctx.array_sort(from, to)
        }
    }
}

/// Translates formulas into the terms of one solver session.
///
/// One bit values are SMT booleans, so operations that need bit-vector operands wrap them
/// in an `ite` and turn one bit results back into booleans.
pub struct SmtTerms<'a> {
    smt: &'a smt::Context,
    ctx: &'a Context,
}

impl<'a> SmtTerms<'a> {
    pub fn new(smt: &'a smt::Context, ctx: &'a Context) -> Self {
        Self { smt, ctx }
    }

    pub fn term(&self, e: ExprRef) -> smt::SExpr {
        let smt = self.smt;
        match *self.ctx.get(e) {
            Expr::BVSymbol { name, .. } | Expr::ArraySymbol { name, .. } => {
                smt.atom(escape_smt_identifier(self.ctx.get_str(name)))
            }
            Expr::BVLiteral { value, width: 1 } => {
                if value == 1 {
                    smt.true_()
                } else {
                    smt.false_()
                }
            }
            Expr::BVLiteral { value, width } => smt.binary(width as usize, value),
            Expr::BVNot(a, 1) => smt.not(self.term(a)),
            Expr::BVNot(a, _) => smt.bvnot(self.term(a)),
            Expr::BVArith {
                op: ArithOp::And,
                a,
                b,
                width: 1,
            } => smt.and(self.term(a), self.term(b)),
            Expr::BVArith {
                op: ArithOp::Or,
                a,
                b,
                width: 1,
            } => smt.or(self.term(a), self.term(b)),
            Expr::BVArith { op, a, b, width } => {
                let res = self.apply(arith_name(op), a, b);
                if width == 1 {
                    self.to_bool(res)
                } else {
                    res
                }
            }
            // booleans and arrays compare with the core `=`
            Expr::Compare {
                op: CmpOp::Equal,
                a,
                b,
            } => smt.eq(self.term(a), self.term(b)),
            Expr::Compare { op, a, b } => self.apply(compare_name(op), a, b),
            Expr::BVArrayRead { array, index, .. } => smt.select(self.term(array), self.term(index)),
            Expr::ArrayConstant {
                e,
                index_width,
                data_width,
            } => {
                let tpe = Type::Array(ArrayType {
                    index_width,
                    data_width,
                });
                let sort = convert_tpe(smt, tpe);
                smt.list(vec![
                    smt.list(vec![smt.atom("as"), smt.atom("const"), sort]),
                    self.term(e),
                ])
            }
            Expr::ArrayStore { array, index, data } => {
                smt.store(self.term(array), self.term(index), self.term(data))
            }
        }
    }

    /// `(op a b)` on bit-vector operands.
    fn apply(&self, op: &str, a: ExprRef, b: ExprRef) -> smt::SExpr {
        let smt = self.smt;
        smt.list(vec![smt.atom(op), self.bits(a), self.bits(b)])
    }

    fn bits(&self, e: ExprRef) -> smt::SExpr {
        let term = self.term(e);
        if e.get_type(self.ctx) == Type::BOOL {
            self.smt
                .ite(term, self.smt.binary(1, 1), self.smt.binary(1, 0))
        } else {
            term
        }
    }

    fn to_bool(&self, e: smt::SExpr) -> smt::SExpr {
        self.smt.eq(e, self.smt.binary(1, 1))
    }
}

fn arith_name(op: ArithOp) -> &'static str {
    match op {
        ArithOp::And => "bvand",
        ArithOp::Or => "bvor",
        ArithOp::Add => "bvadd",
        ArithOp::Sub => "bvsub",
        ArithOp::Mul => "bvmul",
        ArithOp::UnsignedDiv => "bvudiv",
        ArithOp::SignedDiv => "bvsdiv",
        ArithOp::SignedRem => "bvsrem",
    }
}

fn compare_name(op: CmpOp) -> &'static str {
    match op {
        CmpOp::Equal => "=",
        CmpOp::Greater => "bvugt",
        CmpOp::GreaterSigned => "bvsgt",
        CmpOp::GreaterEqual => "bvuge",
    }
}

/// See <simple_symbol> definition in the Concrete Syntax Appendix of the SMTLib Spec
fn is_simple_smt_identifier(id: &str) -> bool {
    const SYMBOL_CHARS: &[u8] = b"+-/*=%?!.$_~&^<>@";
    let mut chars = id.bytes();
    match chars.next() {
        Some(first) if first.is_ascii_alphabetic() || SYMBOL_CHARS.contains(&first) => chars
            .all(|c| c.is_ascii_alphanumeric() || SYMBOL_CHARS.contains(&c)),
        _ => false,
    }
}

/// Quotes `id` with `|` unless it is a simple symbol. Our names never contain `|` or `\`.
pub fn escape_smt_identifier(id: &str) -> Cow<'_, str> {
    if is_simple_smt_identifier(id) {
        Cow::Borrowed(id)
    } else {
        Cow::Owned(format!("|{id}|"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use easy_smt::*;

    #[test]
    fn identifiers() {
        assert_eq!(escape_smt_identifier("x@3"), "x@3");
        assert_eq!(escape_smt_identifier("__relax_0"), "__relax_0");
        assert_eq!(escape_smt_identifier("a b"), "|a b|");
        assert_eq!(escape_smt_identifier("0x"), "|0x|");
        assert_eq!(escape_smt_identifier(""), "||");
    }

    #[test]
    fn convert_path_constraint() {
        let smt_ctx = ContextBuilder::new().build().unwrap();
        let mut ctx = crate::ir::Context::default();
        let result = ctx.bv_symbol("result@0", 4);
        let i = ctx.bv_symbol("i@0", 4);
        let j = ctx.bv_symbol("j@0", 4);
        let diff = ctx.sub(i, j);
        let eq = ctx.equal(result, diff);
        let terms = SmtTerms::new(&smt_ctx, &ctx);
        insta::assert_snapshot!(smt_ctx.display(terms.term(eq)).to_string(), @"(= result@0 (bvsub i@0 j@0))");

        // 1-bit values are represented as SMT booleans
        let guard = ctx.bv_symbol("guard@0", 1);
        let lt = ctx.less_signed(i, j);
        let def = ctx.equal(guard, lt);
        let terms = SmtTerms::new(&smt_ctx, &ctx);
        insta::assert_snapshot!(smt_ctx.display(terms.term(def)).to_string(), @"(= guard@0 (bvsgt j@0 i@0))");
    }

    #[test]
    fn single_bits_switch_between_bool_and_bit_vector() {
        let smt_ctx = ContextBuilder::new().build().unwrap();
        let mut ctx = crate::ir::Context::default();
        let a = ctx.bv_symbol("a", 1);
        let b = ctx.bv_symbol("b", 1);
        let both = ctx.and(a, b);
        let not_a = ctx.not(a);
        let sum = ctx.add(a, b);
        let bigger = ctx.greater(a, b);
        let terms = SmtTerms::new(&smt_ctx, &ctx);
        let show = |e| smt_ctx.display(terms.term(e)).to_string();
        insta::assert_snapshot!(show(both), @"(and a b)");
        insta::assert_snapshot!(show(not_a), @"(not a)");
        insta::assert_snapshot!(show(sum), @"(= (bvadd (ite a #b1 #b0) (ite b #b1 #b0)) #b1)");
        insta::assert_snapshot!(show(bigger), @"(bvugt (ite a #b1 #b0) (ite b #b1 #b0))");
    }

    #[test]
    fn arrays() {
        let smt_ctx = ContextBuilder::new().build().unwrap();
        let mut ctx = crate::ir::Context::default();
        let mem = ctx.array_symbol("mem@0", 2, 4);
        let i = ctx.bv_symbol("i@0", 2);
        let zero = ctx.zero(4);
        let store = ctx.array_store(mem, i, zero);
        let read = ctx.array_read(store, i);
        let filled = ctx.array_const(zero, 2);
        let same = ctx.equal(filled, store);
        let rem = ctx.signed_remainder(read, zero);
        let terms = SmtTerms::new(&smt_ctx, &ctx);
        let show = |e| smt_ctx.display(terms.term(e)).to_string();
        insta::assert_snapshot!(show(read), @"(select (store mem@0 i@0 #b0000) i@0)");
        insta::assert_snapshot!(show(same), @"(= ((as const (Array (_ BitVec 2) (_ BitVec 4))) #b0000) (store mem@0 i@0 #b0000))");
        insta::assert_snapshot!(show(rem), @"(bvsrem (select (store mem@0 i@0 #b0000) i@0) #b0000)");
    }
}
