// Copyright 2024 Cornell University
// released under BSD 3-Clause License
// author: Kevin Laeufer <laeufer@cornell.edu>

// web sources on expression tree evaluation:
// https://www.geeksforgeeks.org/evaluation-of-expression-tree/ (recursive, C++)
// https://medium.com/javarevisited/evaluation-of-binary-expression-tree-6768db3be82f (recursive, Java)
//

use crate::ir::{ArithOp, CmpOp, Context, Expr, ExprRef, Type, TypeCheck, WidthInt};
use baa::{ArrayMutOps, ArrayOps, ArrayValue, BitVecOps, BitVecValue};
use smallvec::SmallVec;
use std::collections::HashMap;

/// Returns a value for an expression if it is available.
pub trait GetExprValue {
    fn get_bv(&self, ctx: &Context, symbol: ExprRef) -> Option<BitVecValue>;
    fn get_array(&self, ctx: &Context, symbol: ExprRef) -> Option<ArrayValue>;
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EvalError {
    #[error("no value found for symbol {name} : {tpe}")]
    MissingSymbol { name: String, tpe: Type },
    #[error("{op} is not supported on bit-vectors wider than 64 bits")]
    Unsupported { op: &'static str },
}

#[derive(Clone)]
pub enum Value {
    Array(ArrayValue),
    BitVec(BitVecValue),
}

impl Value {
    pub fn as_bv(&self) -> Option<&BitVecValue> {
        match self {
            Value::BitVec(v) => Some(v),
            Value::Array(_) => None,
        }
    }

    pub fn as_array(&self) -> Option<&ArrayValue> {
        match self {
            Value::Array(v) => Some(v),
            Value::BitVec(_) => None,
        }
    }

    /// Value for a `u64` that is truncated to the width of `tpe`. Arrays are filled with the
    /// truncated value.
    pub fn from_u64(value: u64, tpe: Type) -> Self {
        match tpe {
            Type::BV(width) => Value::BitVec(bv_from_u64(value, width)),
            Type::Array(a) => Value::Array(ArrayValue::new_sparse(
                a.index_width,
                &bv_from_u64(value, a.data_width),
            )),
        }
    }
}

impl std::fmt::Debug for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::BitVec(v) => match v.to_u64() {
                Some(value) => write!(f, "{}'d{}", v.width(), value),
                None => write!(f, "{}'b{}", v.width(), v.to_bit_str()),
            },
            Value::Array(a) => write!(f, "array(bv<{}> -> bv<{}>)", a.index_width(), a.data_width()),
        }
    }
}

/// Creates a bit-vector value of `width` bits from the low bits of `value`.
pub fn bv_from_u64(value: u64, width: WidthInt) -> BitVecValue {
    BitVecValue::from_u64(value & crate::ir::context::mask(width), width)
}

impl GetExprValue for HashMap<ExprRef, Value> {
    fn get_bv(&self, _ctx: &Context, symbol: ExprRef) -> Option<BitVecValue> {
        self.get(&symbol).and_then(|v| v.as_bv()).cloned()
    }

    fn get_array(&self, _ctx: &Context, symbol: ExprRef) -> Option<ArrayValue> {
        self.get(&symbol).and_then(|v| v.as_array()).cloned()
    }
}

type BitVecStack = SmallVec<[BitVecValue; 4]>;
type ArrayStack = SmallVec<[ArrayValue; 2]>;

/// Division and remainder with the SMT-LIB results for a zero divisor: `x / 0` is all ones
/// and `x % 0` is `x`.
fn div_rem(op: ArithOp, a: &BitVecValue, b: &BitVecValue) -> Result<BitVecValue, EvalError> {
    let width = a.width();
    let (a, b) = match (a.to_u64(), b.to_u64()) {
        (Some(a), Some(b)) => (a, b),
        _ => return Err(EvalError::Unsupported { op: op.name() }),
    };
    let mask = crate::ir::context::mask(width);
    let neg = |v: u64| v.wrapping_neg() & mask;
    let is_neg = |v: u64| (v >> (width - 1)) & 1 == 1;
    let abs = |v: u64| if is_neg(v) { neg(v) } else { v };
    let udiv = |a: u64, b: u64| if b == 0 { mask } else { a / b };
    let res = match op {
        ArithOp::UnsignedDiv => udiv(a, b),
        ArithOp::SignedDiv => {
            let q = udiv(abs(a), abs(b));
            if is_neg(a) != is_neg(b) {
                neg(q)
            } else {
                q
            }
        }
        ArithOp::SignedRem if b == 0 => a,
        ArithOp::SignedRem => {
            let r = abs(a) % abs(b);
            if is_neg(a) {
                neg(r)
            } else {
                r
            }
        }
        other => unreachable!("{other:?} is not a division"),
    };
    Ok(bv_from_u64(res, width))
}

fn arith(op: ArithOp, a: BitVecValue, b: BitVecValue) -> Result<BitVecValue, EvalError> {
    Ok(match op {
        ArithOp::And => a.and(&b),
        ArithOp::Or => a.or(&b),
        ArithOp::Add => a.add(&b),
        ArithOp::Sub => a.sub(&b),
        ArithOp::Mul => a.mul(&b),
        ArithOp::UnsignedDiv | ArithOp::SignedDiv | ArithOp::SignedRem => div_rem(op, &a, &b)?,
    })
}

fn compare(op: CmpOp, a: &BitVecValue, b: &BitVecValue) -> bool {
    match op {
        CmpOp::Equal => a.is_equal(b),
        CmpOp::Greater => a.is_greater(b),
        CmpOp::GreaterSigned => a.is_greater_signed(b),
        CmpOp::GreaterEqual => a.is_greater_or_equal(b),
    }
}

/// Evaluates a 1-bit formula.
pub fn eval_bool_expr(
    ctx: &Context,
    symbols: &(impl GetExprValue + ?Sized),
    expr: ExprRef,
) -> Result<bool, EvalError> {
    debug_assert_eq!(expr.get_type(ctx), Type::BOOL);
    match eval_expr(ctx, symbols, expr)? {
        Value::BitVec(value) => Ok(value.is_tru()),
        Value::Array(_) => unreachable!("a formula cannot evaluate to an array"),
    }
}

pub fn eval_expr(
    ctx: &Context,
    symbols: &(impl GetExprValue + ?Sized),
    expr: ExprRef,
) -> Result<Value, EvalError> {
    let (mut bv_stack, mut array_stack) = eval_expr_internal(ctx, symbols, expr)?;
    debug_assert_eq!(bv_stack.len() + array_stack.len(), 1);
    match (bv_stack.pop(), array_stack.pop()) {
        (Some(value), None) => Ok(Value::BitVec(value)),
        (None, Some(value)) => Ok(Value::Array(value)),
        _ => unreachable!("evaluation leaves exactly one value"),
    }
}

fn pop<A: smallvec::Array>(stack: &mut SmallVec<A>) -> A::Item {
    stack.pop().unwrap_or_else(|| panic!("operand is missing"))
}

fn eval_expr_internal(
    ctx: &Context,
    values: &(impl GetExprValue + ?Sized),
    expr: ExprRef,
) -> Result<(BitVecStack, ArrayStack), EvalError> {
    let mut bv_stack: BitVecStack = SmallVec::new();
    let mut array_stack: ArrayStack = SmallVec::new();
    // the flag marks nodes whose operands are already on the stacks
    let mut todo: SmallVec<[(ExprRef, bool); 4]> = SmallVec::new();

    todo.push((expr, false));
    while let Some((e, args_available)) = todo.pop() {
        let expr = ctx.get(e);

        if !args_available {
            // a value that is provided takes precedence over the definition
            if expr.is_bv_type() {
                if let Some(value) = values.get_bv(ctx, e) {
                    bv_stack.push(value);
                    continue;
                }
            } else if let Some(value) = values.get_array(ctx, e) {
                array_stack.push(value);
                continue;
            }
            let children = expr.children();
            if !children.is_empty() {
                todo.push((e, true));
                todo.extend(children.into_iter().map(|c| (c, false)));
                continue;
            }
        }

        // operands come off the stacks in order: the first operand is on top
        match *expr {
            Expr::BVSymbol { name, width } => {
                return Err(EvalError::MissingSymbol {
                    name: ctx.get_str(name).to_string(),
                    tpe: Type::BV(width),
                });
            }
            Expr::ArraySymbol {
                name,
                index_width,
                data_width,
            } => {
                return Err(EvalError::MissingSymbol {
                    name: ctx.get_str(name).to_string(),
                    tpe: Type::Array(crate::ir::ArrayType {
                        index_width,
                        data_width,
                    }),
                });
            }
            Expr::BVLiteral { value, width } => bv_stack.push(bv_from_u64(value, width)),
            Expr::BVNot(..) => {
                let e = pop(&mut bv_stack);
                bv_stack.push(e.not());
            }
            Expr::BVArith { op, .. } => {
                let a = pop(&mut bv_stack);
                let b = pop(&mut bv_stack);
                bv_stack.push(arith(op, a, b)?);
            }
            Expr::Compare { op, a, .. } => {
                let res = if a.get_type(ctx).is_array() {
                    let a = pop(&mut array_stack);
                    let b = pop(&mut array_stack);
                    a.is_equal(&b).unwrap_or_default()
                } else {
                    let a = pop(&mut bv_stack);
                    let b = pop(&mut bv_stack);
                    compare(op, &a, &b)
                };
                bv_stack.push(res.into());
            }
            Expr::BVArrayRead { .. } => {
                let array = pop(&mut array_stack);
                let index = pop(&mut bv_stack);
                bv_stack.push(array.select(&index));
            }
            Expr::ArrayConstant { index_width, .. } => {
                let default = pop(&mut bv_stack);
                array_stack.push(ArrayValue::new_sparse(index_width, &default));
            }
            Expr::ArrayStore { .. } => {
                let index = pop(&mut bv_stack);
                let data = pop(&mut bv_stack);
                let array = array_stack
                    .last_mut()
                    .unwrap_or_else(|| panic!("operand is missing"));
                array.store(&index, &data); // we avoid pop + push by modifying in place
            }
        }
    }

    Ok((bv_stack, array_stack))
}
