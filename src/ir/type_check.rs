// Copyright 2023 The Regents of the University of California
// Copyright 2024 Cornell University
// released under BSD 3-Clause License
// author: Kevin Laeufer <laeufer@cornell.edu>

use super::{ArrayType, CmpOp, Context, Expr, ExprMetaData, ExprRef, Type, WidthInt};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{msg}")]
pub struct TypeCheckError {
    msg: String,
}

impl TypeCheckError {
    fn new(msg: String) -> Self {
        Self { msg }
    }

    pub fn get_msg(&self) -> &str {
        &self.msg
    }
}

fn bv_width(ctx: &Context, e: ExprRef, what: &str) -> Result<WidthInt, TypeCheckError> {
    match e.get_type(ctx) {
        Type::BV(width) => Ok(width),
        Type::Array(_) => Err(TypeCheckError::new(format!(
            "{what} needs a bit-vector, not an array"
        ))),
    }
}

fn array_type(ctx: &Context, e: ExprRef, what: &str) -> Result<ArrayType, TypeCheckError> {
    match e.get_type(ctx) {
        Type::Array(tpe) => Ok(tpe),
        Type::BV(width) => Err(TypeCheckError::new(format!(
            "{what} needs an array, not a bv<{width}>"
        ))),
    }
}

fn expect_width(
    ctx: &Context,
    e: ExprRef,
    width: WidthInt,
    what: &str,
) -> Result<(), TypeCheckError> {
    let actual = bv_width(ctx, e, what)?;
    if actual == width {
        Ok(())
    } else {
        Err(TypeCheckError::new(format!(
            "{what} needs a bv<{width}>, not a bv<{actual}>"
        )))
    }
}

/// Width shared by both operands of a bit-vector operation.
fn same_width(ctx: &Context, op: &str, a: ExprRef, b: ExprRef) -> Result<WidthInt, TypeCheckError> {
    let a_width = bv_width(ctx, a, op)?;
    let b_width = bv_width(ctx, b, op)?;
    if a_width == b_width {
        Ok(a_width)
    } else {
        Err(TypeCheckError::new(format!(
            "{op} requires two bit-vectors of the same width, not {a_width} and {b_width}"
        )))
    }
}

pub trait TypeCheck {
    /// Type check expression node. Does not recurse to lower nodes.
    fn type_check(&self, ctx: &Context) -> Result<Type, TypeCheckError>;
    /// gets type as fast as possible without performing any checks
    fn get_type(&self, ctx: &Context) -> Type;
    fn get_bv_type(&self, ctx: &Context) -> Option<WidthInt> {
        match self.get_type(ctx) {
            Type::BV(width) => Some(width),
            Type::Array(_) => None,
        }
    }
}

impl TypeCheck for Expr {
    fn type_check(&self, ctx: &Context) -> Result<Type, TypeCheckError> {
        match *self {
            Expr::BVNot(e, width) => expect_width(ctx, e, width, "not")?,
            Expr::BVArith { op, a, b, width } => {
                let operands = same_width(ctx, op.name(), a, b)?;
                if operands != width {
                    return Err(TypeCheckError::new(format!(
                        "{} of bv<{operands}> cannot produce a bv<{width}>",
                        op.name()
                    )));
                }
            }
            Expr::Compare {
                op: CmpOp::Equal,
                a,
                b,
            } if a.get_type(ctx).is_array() => {
                let (a_tpe, b_tpe) = (array_type(ctx, a, "eq")?, array_type(ctx, b, "eq")?);
                if a_tpe != b_tpe {
                    return Err(TypeCheckError::new(format!(
                        "eq requires two arrays of the same type, not {} and {}",
                        Type::Array(a_tpe),
                        Type::Array(b_tpe)
                    )));
                }
            }
            Expr::Compare { op, a, b } => {
                same_width(ctx, op.name(), a, b)?;
            }
            Expr::BVArrayRead {
                array,
                index,
                width,
            } => {
                let tpe = array_type(ctx, array, "read")?;
                expect_width(ctx, index, tpe.index_width, "read index")?;
                if tpe.data_width != width {
                    return Err(TypeCheckError::new(format!(
                        "reading a {} produces a bv<{}>, not a bv<{width}>",
                        Type::Array(tpe),
                        tpe.data_width
                    )));
                }
            }
            Expr::ArrayConstant { e, data_width, .. } => {
                expect_width(ctx, e, data_width, "array constant")?
            }
            Expr::ArrayStore { array, index, data } => {
                let tpe = array_type(ctx, array, "store")?;
                expect_width(ctx, index, tpe.index_width, "store index")?;
                expect_width(ctx, data, tpe.data_width, "store data")?;
            }
            Expr::BVSymbol { .. } | Expr::BVLiteral { .. } | Expr::ArraySymbol { .. } => {}
        }
        Ok(self.get_type(ctx))
    }

    fn get_type(&self, ctx: &Context) -> Type {
        match *self {
            Expr::BVSymbol { width, .. }
            | Expr::BVLiteral { width, .. }
            | Expr::BVNot(_, width)
            | Expr::BVArith { width, .. }
            | Expr::BVArrayRead { width, .. } => Type::BV(width),
            Expr::Compare { .. } => Type::BOOL,
            Expr::ArraySymbol {
                index_width,
                data_width,
                ..
            }
            | Expr::ArrayConstant {
                index_width,
                data_width,
                ..
            } => Type::Array(ArrayType {
                index_width,
                data_width,
            }),
            Expr::ArrayStore { array, .. } => array.get_type(ctx),
        }
    }
}

impl TypeCheck for ExprRef {
    fn type_check(&self, ctx: &Context) -> Result<Type, TypeCheckError> {
        ctx.get(*self).type_check(ctx)
    }

    fn get_type(&self, ctx: &Context) -> Type {
        ctx.get(*self).get_type(ctx)
    }
}

/// Type checks an expression and all of its sub-expressions.
pub fn type_check_deep(ctx: &Context, expr: ExprRef) -> Result<Type, TypeCheckError> {
    let mut todo = vec![expr];
    let mut checked = ExprMetaData::<bool>::default();
    while let Some(e) = todo.pop() {
        if std::mem::replace(checked.get_mut(e), true) {
            continue;
        }
        e.type_check(ctx)?;
        todo.extend(ctx.get(e).children());
    }
    Ok(expr.get_type(ctx))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_width_mismatch() {
        let mut ctx = Context::default();
        let a = ctx.bv_symbol("a", 4);
        let b = ctx.bv_symbol("b", 3);
        let eq = ctx.equal(a, b);
        let err = type_check_deep(&ctx, eq).unwrap_err();
        insta::assert_snapshot!(err.to_string(), @"eq requires two bit-vectors of the same width, not 4 and 3");
        let c = ctx.bv_symbol("c", 4);
        let sum = ctx.add(a, c);
        let cond = ctx.less_signed(sum, a);
        assert_eq!(type_check_deep(&ctx, cond).unwrap(), Type::BOOL);
    }

    #[test]
    fn errors_in_nested_operands_are_found() {
        let mut ctx = Context::default();
        let a = ctx.bv_symbol("a", 4);
        let b = ctx.bv_symbol("b", 3);
        let bad = ctx.add(b, a);
        let c = ctx.bv_symbol("c", 4);
        let outer = ctx.greater(bad, c);
        // the outer comparison looks fine on its own
        assert_eq!(outer.type_check(&ctx), Ok(Type::BOOL));
        assert!(type_check_deep(&ctx, outer).is_err());
    }

    #[test]
    fn array_read_and_store() {
        let mut ctx = Context::default();
        let mem = ctx.array_symbol("mem", 2, 4);
        let idx = ctx.bv_symbol("i", 2);
        let data = ctx.bv_symbol("d", 4);
        let store = ctx.array_store(mem, idx, data);
        let read = ctx.array_read(store, idx);
        assert_eq!(type_check_deep(&ctx, read).unwrap(), Type::BV(4));
        let bad_index = ctx.bv_symbol("j", 3);
        let bad = ctx.array_store(mem, bad_index, data);
        insta::assert_snapshot!(type_check_deep(&ctx, bad).unwrap_err().to_string(), @"store index needs a bv<2>, not a bv<3>");
    }

    #[test]
    fn array_equality() {
        let mut ctx = Context::default();
        let mem = ctx.array_symbol("mem", 2, 4);
        let other = ctx.array_symbol("other", 3, 4);
        let same = ctx.equal(mem, mem);
        assert_eq!(type_check_deep(&ctx, same).unwrap(), Type::BOOL);
        let eq = ctx.equal(mem, other);
        insta::assert_snapshot!(
            type_check_deep(&ctx, eq).unwrap_err().to_string(),
            @"eq requires two arrays of the same type, not bv<2> -> bv<4> and bv<3> -> bv<4>"
        );
    }
}
