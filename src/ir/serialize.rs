// Copyright 2023 The Regents of the University of California
// Copyright 2024 Cornell University
// released under BSD 3-Clause License
// author: Kevin Laeufer <laeufer@cornell.edu>

use super::{Context, Expr, ExprRef};
use std::io::Write;

pub trait SerializableIrNode {
    fn serialize<W: Write>(&self, ctx: &Context, writer: &mut W) -> std::io::Result<()>;
    fn serialize_to_str(&self, ctx: &Context) -> String {
        let mut buf = Vec::new();
        self.serialize(ctx, &mut buf)
            .expect("Failed to write to string!");
        String::from_utf8(buf).expect("Failed to read string we wrote!")
    }
}

impl SerializableIrNode for Expr {
    fn serialize<W: Write>(&self, ctx: &Context, writer: &mut W) -> std::io::Result<()> {
        serialize_expr(self, ctx, writer)
    }
}

impl SerializableIrNode for ExprRef {
    fn serialize<W: Write>(&self, ctx: &Context, writer: &mut W) -> std::io::Result<()> {
        ctx.get(*self).serialize(ctx, writer)
    }
}

fn serialize_expr<W: Write>(expr: &Expr, ctx: &Context, writer: &mut W) -> std::io::Result<()> {
    match expr {
        Expr::BVSymbol { name, .. } | Expr::ArraySymbol { name, .. } => {
            write!(writer, "{}", ctx.get_str(*name))
        }
        Expr::BVLiteral { value, width } => {
            if *width <= 8 {
                write!(writer, "{width}'b{value:0w$b}", w = *width as usize)
            } else {
                write!(writer, "{width}'x{value:x}")
            }
        }
        Expr::BVNot(e, _) => call(ctx, writer, "not", &[*e]),
        Expr::BVArith { op, a, b, .. } => call(ctx, writer, op.name(), &[*a, *b]),
        Expr::Compare { op, a, b } => call(ctx, writer, op.name(), &[*a, *b]),
        Expr::BVArrayRead { array, index, .. } => {
            array.serialize(ctx, writer)?;
            write!(writer, "[")?;
            index.serialize(ctx, writer)?;
            write!(writer, "]")
        }
        Expr::ArrayConstant { e, index_width, .. } => {
            write!(writer, "([")?;
            e.serialize(ctx, writer)?;
            write!(writer, "] x 2^{index_width})")
        }
        Expr::ArrayStore { array, index, data } => {
            array.serialize(ctx, writer)?;
            write!(writer, "[")?;
            index.serialize(ctx, writer)?;
            write!(writer, " := ")?;
            data.serialize(ctx, writer)?;
            write!(writer, "]")
        }
    }
}

fn call<W: Write>(
    ctx: &Context,
    writer: &mut W,
    name: &str,
    args: &[ExprRef],
) -> std::io::Result<()> {
    write!(writer, "{name}(")?;
    for (ii, arg) in args.iter().enumerate() {
        if ii > 0 {
            write!(writer, ", ")?;
        }
        arg.serialize(ctx, writer)?;
    }
    write!(writer, ")")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn simple_serialization() {
        let mut ctx = Context::default();
        let test_expr = ctx.bv_symbol("test", 3);
        assert_eq!("test", test_expr.serialize_to_str(&ctx));
    }

    #[test]
    fn constraint_serialization() {
        let mut ctx = Context::default();
        let result = ctx.bv_symbol("result@0", 4);
        let i = ctx.bv_symbol("i@0", 4);
        let j = ctx.bv_symbol("j@0", 4);
        let diff = ctx.sub(i, j);
        let eq = ctx.equal(result, diff);
        insta::assert_snapshot!(eq.serialize_to_str(&ctx), @"eq(result@0, sub(i@0, j@0))");
        let one = ctx.one(4);
        let cond = ctx.less_signed(i, one);
        let not = ctx.not(cond);
        insta::assert_snapshot!(not.serialize_to_str(&ctx), @"not(sgt(4'b0001, i@0))");
    }

    #[test]
    fn array_serialization() {
        let mut ctx = Context::default();
        let mem = ctx.array_symbol("mem@0", 2, 4);
        let i = ctx.bv_symbol("i@0", 2);
        let zero = ctx.zero(4);
        let store = ctx.array_store(mem, i, zero);
        let read = ctx.array_read(store, i);
        insta::assert_snapshot!(read.serialize_to_str(&ctx), @"mem@0[i@0 := 4'b0000][i@0]");
        let filled = ctx.array_const(zero, 2);
        insta::assert_snapshot!(filled.serialize_to_str(&ctx), @"([4'b0000] x 2^2)");
    }
}
