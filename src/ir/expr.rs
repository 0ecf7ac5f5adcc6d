// Copyright 2023 The Regents of the University of California
// Copyright 2024 Cornell University
// released under BSD 3-Clause License
// author: Kevin Laeufer <laeufer@cornell.edu>

use crate::ir::{Context, ExprRef, StringRef};
use smallvec::{smallvec, SmallVec};

/// This type restricts the maximum width that a bit-vector type is allowed to have in our IR.
pub type WidthInt = u32;

/// This restricts the maximum value that a bit-vector literal can carry.
pub type BVLiteralInt = u64;

/// Operands of a node, in evaluation order.
pub type Children = SmallVec<[ExprRef; 3]>;

/// Operations on two bit-vectors of the same width. The result has that width as well.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Hash)]
pub enum ArithOp {
    And,
    Or,
    Add,
    Sub,
    Mul,
    UnsignedDiv,
    SignedDiv,
    /// Remainder with the sign of the dividend, as in C.
    SignedRem,
}

impl ArithOp {
    pub fn name(self) -> &'static str {
        match self {
            ArithOp::And => "and",
            ArithOp::Or => "or",
            ArithOp::Add => "add",
            ArithOp::Sub => "sub",
            ArithOp::Mul => "mul",
            ArithOp::UnsignedDiv => "udiv",
            ArithOp::SignedDiv => "sdiv",
            ArithOp::SignedRem => "srem",
        }
    }

    /// `and` and `or` on single bits are the boolean connectives.
    pub fn is_logic(self) -> bool {
        matches!(self, ArithOp::And | ArithOp::Or)
    }
}

/// Comparisons produce a single bit. Only equality is defined on arrays.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Hash)]
pub enum CmpOp {
    Equal,
    Greater,
    GreaterSigned,
    GreaterEqual,
}

impl CmpOp {
    pub fn name(self) -> &'static str {
        match self {
            CmpOp::Equal => "eq",
            CmpOp::Greater => "ugt",
            CmpOp::GreaterSigned => "sgt",
            CmpOp::GreaterEqual => "ugte",
        }
    }
}

/// A bit-vector or array formula. One bit bit-vectors double as booleans.
#[derive(Debug, PartialEq, Eq, Clone, Hash)]
pub enum Expr {
    BVSymbol {
        name: StringRef,
        width: WidthInt,
    },
    BVLiteral {
        value: BVLiteralInt,
        width: WidthInt,
    },
    BVNot(ExprRef, WidthInt),
    BVArith {
        op: ArithOp,
        a: ExprRef,
        b: ExprRef,
        width: WidthInt,
    },
    Compare {
        op: CmpOp,
        a: ExprRef,
        b: ExprRef,
    },
    BVArrayRead {
        array: ExprRef,
        index: ExprRef,
        width: WidthInt,
    },
    ArraySymbol {
        name: StringRef,
        index_width: WidthInt,
        data_width: WidthInt,
    },
    /// Array that maps every index to `e`.
    ArrayConstant {
        e: ExprRef,
        index_width: WidthInt,
        data_width: WidthInt,
    },
    ArrayStore {
        array: ExprRef,
        index: ExprRef,
        data: ExprRef,
    },
}

impl Expr {
    pub fn symbol(name: StringRef, tpe: Type) -> Expr {
        match tpe {
            Type::BV(width) => Expr::BVSymbol { name, width },
            Type::Array(ArrayType {
                data_width,
                index_width,
            }) => Expr::ArraySymbol {
                name,
                data_width,
                index_width,
            },
        }
    }

    pub fn is_symbol(&self) -> bool {
        matches!(self, Expr::BVSymbol { .. } | Expr::ArraySymbol { .. })
    }

    pub fn is_bv_type(&self) -> bool {
        !self.is_array_type()
    }

    pub fn is_array_type(&self) -> bool {
        matches!(
            self,
            Expr::ArraySymbol { .. } | Expr::ArrayConstant { .. } | Expr::ArrayStore { .. }
        )
    }

    pub fn get_symbol_name_ref(&self) -> Option<StringRef> {
        match self {
            Expr::BVSymbol { name, .. } | Expr::ArraySymbol { name, .. } => Some(*name),
            _ => None,
        }
    }

    pub fn get_symbol_name<'a>(&self, ctx: &'a Context) -> Option<&'a str> {
        self.get_symbol_name_ref().map(|r| ctx.get_str(r))
    }

    pub fn children(&self) -> Children {
        match *self {
            Expr::BVSymbol { .. } | Expr::BVLiteral { .. } | Expr::ArraySymbol { .. } => {
                Children::new()
            }
            Expr::BVNot(e, _) | Expr::ArrayConstant { e, .. } => smallvec![e],
            Expr::BVArith { a, b, .. } | Expr::Compare { a, b, .. } => smallvec![a, b],
            Expr::BVArrayRead { array, index, .. } => smallvec![array, index],
            Expr::ArrayStore { array, index, data } => smallvec![array, index, data],
        }
    }

    /// The same operation applied to `children`, which must match the arity of `self`.
    pub(crate) fn with_children(&self, children: &[ExprRef]) -> Expr {
        match (self.clone(), children) {
            (Expr::BVNot(_, width), [e]) => Expr::BVNot(*e, width),
            (Expr::BVArith { op, width, .. }, [a, b]) => Expr::BVArith {
                op,
                a: *a,
                b: *b,
                width,
            },
            (Expr::Compare { op, .. }, [a, b]) => Expr::Compare { op, a: *a, b: *b },
            (Expr::BVArrayRead { width, .. }, [array, index]) => Expr::BVArrayRead {
                array: *array,
                index: *index,
                width,
            },
            (
                Expr::ArrayConstant {
                    index_width,
                    data_width,
                    ..
                },
                [e],
            ) => Expr::ArrayConstant {
                e: *e,
                index_width,
                data_width,
            },
            (Expr::ArrayStore { .. }, [array, index, data]) => Expr::ArrayStore {
                array: *array,
                index: *index,
                data: *data,
            },
            (leaf, []) => leaf,
            (other, _) => panic!(
                "{other:?} cannot be re-created from {} children",
                children.len()
            ),
        }
    }
}

impl ExprRef {
    pub fn is_symbol(&self, ctx: &Context) -> bool {
        ctx.get(*self).is_symbol()
    }

    pub fn get_symbol_name<'a>(&self, ctx: &'a Context) -> Option<&'a str> {
        ctx.get(*self).get_symbol_name(ctx)
    }
}

#[derive(Debug, PartialEq, Eq, Clone, Hash, Copy)]
pub struct ArrayType {
    pub index_width: WidthInt,
    pub data_width: WidthInt,
}

impl ArrayType {
    pub fn data_type(&self) -> Type {
        Type::BV(self.data_width)
    }
    pub fn index_type(&self) -> Type {
        Type::BV(self.index_width)
    }
}

#[derive(Debug, PartialEq, Eq, Clone, Copy, Hash)]
pub enum Type {
    BV(WidthInt),
    Array(ArrayType),
}

impl Type {
    pub const BOOL: Type = Type::BV(1);

    pub fn is_array(&self) -> bool {
        matches!(self, Type::Array(_))
    }

    /// Number of bits needed to represent every value of this type.
    pub fn bits(&self) -> u64 {
        match self {
            Type::BV(width) => *width as u64,
            Type::Array(a) => (a.data_width as u64).saturating_mul(1u64 << a.index_width.min(63)),
        }
    }
}

impl std::fmt::Display for Type {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match *self {
            Type::BV(width) => write!(f, "bv<{width}>"),
            Type::Array(ArrayType {
                index_width,
                data_width,
            }) => write!(f, "bv<{index_width}> -> bv<{data_width}>"),
        }
    }
}

pub(crate) fn bv_value_fits_width(value: BVLiteralInt, width: WidthInt) -> bool {
    let bits_required = BVLiteralInt::BITS - value.leading_zeros();
    width >= bits_required
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ir_type_size() {
        // an array has a index and a data width
        assert_eq!(std::mem::size_of::<ArrayType>(), 2 * 4);
        // Type could be a bit-vector or an array type (4 bytes for the tag!)
        assert_eq!(std::mem::size_of::<Type>(), 2 * 4 + 4);
        // the operator tag shares a word with the operands
        assert!(std::mem::size_of::<Expr>() <= 16);
    }

    #[test]
    fn literal_widths() {
        assert!(bv_value_fits_width(0, 1));
        assert!(bv_value_fits_width(15, 4));
        assert!(!bv_value_fits_width(16, 4));
    }

    #[test]
    fn array_bits() {
        let tpe = Type::Array(ArrayType {
            index_width: 2,
            data_width: 3,
        });
        assert_eq!(tpe.bits(), 12);
        assert_eq!(Type::BOOL.bits(), 1);
    }

    #[test]
    fn children_round_trip_through_with_children() {
        let mut ctx = Context::default();
        let a = ctx.bv_symbol("a", 4);
        let b = ctx.bv_symbol("b", 4);
        let c = ctx.bv_symbol("c", 4);
        let sum = ctx.add(a, b);
        let expr = ctx.get(sum).clone();
        assert_eq!(expr.children().as_slice(), &[a, b]);
        assert_eq!(
            expr.with_children(&[c, b]),
            Expr::BVArith {
                op: ArithOp::Add,
                a: c,
                b,
                width: 4
            }
        );
        assert!(ctx.get(a).children().is_empty());
        assert_eq!(ctx.get(a).with_children(&[]), *ctx.get(a));
    }
}
