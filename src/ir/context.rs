// Copyright 2023 The Regents of the University of California
// Copyright 2024 Cornell University
// released under BSD 3-Clause License
// author: Kevin Laeufer <laeufer@cornell.edu>

use crate::ir::expr::*;
use crate::ir::TypeCheck;
use std::fmt::{Debug, Formatter};
use std::num::NonZeroU32;

/// Every variable version interns its own name, so this needs as much room as `ExprRef`.
#[derive(PartialEq, Eq, Clone, Copy, Hash, Ord, PartialOrd)]
pub struct StringRef(NonZeroU32);

impl Debug for StringRef {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "StringRef({})", self.index())
    }
}

impl StringRef {
    fn from_index(index: usize) -> Self {
        Self(NonZeroU32::new((index + 1) as u32).unwrap())
    }

    pub(crate) fn index(&self) -> usize {
        (self.0.get() - 1) as usize
    }
}

#[derive(PartialEq, Eq, Clone, Copy, Hash, Ord, PartialOrd)]
pub struct ExprRef(NonZeroU32);

impl Debug for ExprRef {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        // we need a custom implementation in order to show the zero based index
        write!(f, "ExprRef({})", self.index())
    }
}

impl ExprRef {
    pub(crate) fn from_index(index: usize) -> Self {
        ExprRef(NonZeroU32::new((index + 1) as u32).unwrap())
    }

    pub(crate) fn index(&self) -> usize {
        (self.0.get() - 1) as usize
    }
}

/// Context which is used to create all formulas. Expressions are interned such that
/// reference equivalence implies structural equivalence.
///
/// A context is cheap to clone which allows independent paths to be encoded on
/// separate threads.
#[derive(Clone, Default)]
pub struct Context {
    strings: indexmap::IndexSet<String>,
    exprs: indexmap::IndexSet<Expr>,
}

/// Adding and removing nodes.
impl Context {
    pub fn get(&self, reference: ExprRef) -> &Expr {
        self.exprs
            .get_index(reference.index())
            .expect("Invalid ExprRef!")
    }

    pub(crate) fn add_expr(&mut self, value: Expr) -> ExprRef {
        let (index, _) = self.exprs.insert_full(value);
        ExprRef::from_index(index)
    }

    pub fn get_str(&self, reference: StringRef) -> &str {
        self.strings
            .get_index(reference.index())
            .expect("Invalid StringRef!")
    }

    pub fn string(&mut self, value: std::borrow::Cow<str>) -> StringRef {
        if let Some(index) = self.strings.get_index_of(value.as_ref()) {
            StringRef::from_index(index)
        } else {
            let (index, _) = self.strings.insert_full(value.into_owned());
            StringRef::from_index(index)
        }
    }
}

/// Convenience methods to construct IR nodes.
impl Context {
    pub fn bv_symbol(&mut self, name: &str, width: WidthInt) -> ExprRef {
        assert!(width > 0, "0-bit bitvectors are not allowed");
        let name_ref = self.string(name.into());
        self.add_expr(Expr::BVSymbol {
            name: name_ref,
            width,
        })
    }
    pub fn array_symbol(
        &mut self,
        name: &str,
        index_width: WidthInt,
        data_width: WidthInt,
    ) -> ExprRef {
        assert!(index_width > 0 && data_width > 0, "0-bit arrays are not allowed");
        let name_ref = self.string(name.into());
        self.add_expr(Expr::ArraySymbol {
            name: name_ref,
            index_width,
            data_width,
        })
    }
    pub fn symbol(&mut self, name: StringRef, tpe: Type) -> ExprRef {
        assert_ne!(tpe, Type::BV(0), "0-bit bitvectors are not allowed");
        self.add_expr(Expr::symbol(name, tpe))
    }
    pub fn bv_lit(&mut self, value: BVLiteralInt, width: WidthInt) -> ExprRef {
        assert!(
            bv_value_fits_width(value, width),
            "{value} does not fit into {width} bits"
        );
        self.add_expr(Expr::BVLiteral { value, width })
    }
    /// Two's complement literal, truncated to `width` bits.
    pub fn bv_lit_signed(&mut self, value: i64, width: WidthInt) -> ExprRef {
        let value = (value as u64) & mask(width);
        self.bv_lit(value, width)
    }
    pub fn zero(&mut self, width: WidthInt) -> ExprRef {
        self.bv_lit(0, width)
    }
    pub fn one(&mut self, width: WidthInt) -> ExprRef {
        self.bv_lit(1, width)
    }
    pub fn tru(&mut self) -> ExprRef {
        self.one(1)
    }
    /// Equality that works for bit-vectors as well as arrays.
    pub fn equal(&mut self, a: ExprRef, b: ExprRef) -> ExprRef {
        self.compare(CmpOp::Equal, a, b)
    }
    pub fn greater_signed(&mut self, a: ExprRef, b: ExprRef) -> ExprRef {
        self.compare(CmpOp::GreaterSigned, a, b)
    }
    pub fn greater(&mut self, a: ExprRef, b: ExprRef) -> ExprRef {
        self.compare(CmpOp::Greater, a, b)
    }
    pub fn greater_or_equal(&mut self, a: ExprRef, b: ExprRef) -> ExprRef {
        self.compare(CmpOp::GreaterEqual, a, b)
    }
    pub fn less_signed(&mut self, a: ExprRef, b: ExprRef) -> ExprRef {
        self.greater_signed(b, a)
    }
    pub fn less(&mut self, a: ExprRef, b: ExprRef) -> ExprRef {
        self.greater(b, a)
    }
    fn compare(&mut self, op: CmpOp, a: ExprRef, b: ExprRef) -> ExprRef {
        self.add_expr(Expr::Compare { op, a, b })
    }
    pub fn not(&mut self, e: ExprRef) -> ExprRef {
        let width = self.bv_width(e);
        self.add_expr(Expr::BVNot(e, width))
    }
    pub fn and(&mut self, a: ExprRef, b: ExprRef) -> ExprRef {
        self.arith(ArithOp::And, a, b)
    }
    pub fn or(&mut self, a: ExprRef, b: ExprRef) -> ExprRef {
        self.arith(ArithOp::Or, a, b)
    }
    /// Conjunction of boolean formulas. The empty conjunction is `true`.
    pub fn and_all(&mut self, items: impl IntoIterator<Item = ExprRef>) -> ExprRef {
        let mut items = items.into_iter();
        match items.next() {
            None => self.tru(),
            Some(first) => items.fold(first, |acc, e| self.and(acc, e)),
        }
    }
    /// Disjunction of boolean formulas. The empty disjunction is `false`.
    pub fn or_all(&mut self, items: impl IntoIterator<Item = ExprRef>) -> ExprRef {
        let mut items = items.into_iter();
        match items.next() {
            None => self.zero(1),
            Some(first) => items.fold(first, |acc, e| self.or(acc, e)),
        }
    }
    pub fn add(&mut self, a: ExprRef, b: ExprRef) -> ExprRef {
        self.arith(ArithOp::Add, a, b)
    }
    pub fn sub(&mut self, a: ExprRef, b: ExprRef) -> ExprRef {
        self.arith(ArithOp::Sub, a, b)
    }
    pub fn mul(&mut self, a: ExprRef, b: ExprRef) -> ExprRef {
        self.arith(ArithOp::Mul, a, b)
    }
    pub fn div(&mut self, a: ExprRef, b: ExprRef) -> ExprRef {
        self.arith(ArithOp::UnsignedDiv, a, b)
    }
    pub fn signed_div(&mut self, a: ExprRef, b: ExprRef) -> ExprRef {
        self.arith(ArithOp::SignedDiv, a, b)
    }
    pub fn signed_remainder(&mut self, a: ExprRef, b: ExprRef) -> ExprRef {
        self.arith(ArithOp::SignedRem, a, b)
    }
    fn arith(&mut self, op: ArithOp, a: ExprRef, b: ExprRef) -> ExprRef {
        let width = self.bv_width(b);
        self.add_expr(Expr::BVArith { op, a, b, width })
    }

    pub fn array_store(&mut self, array: ExprRef, index: ExprRef, data: ExprRef) -> ExprRef {
        self.add_expr(Expr::ArrayStore { array, index, data })
    }

    pub fn array_const(&mut self, e: ExprRef, index_width: WidthInt) -> ExprRef {
        let data_width = self.bv_width(e);
        self.add_expr(Expr::ArrayConstant {
            e,
            index_width,
            data_width,
        })
    }

    pub fn array_read(&mut self, array: ExprRef, index: ExprRef) -> ExprRef {
        let width = match array.get_type(self) {
            Type::Array(a) => a.data_width,
            other => panic!("cannot read from {other}"),
        };
        self.add_expr(Expr::BVArrayRead {
            array,
            index,
            width,
        })
    }

    fn bv_width(&self, e: ExprRef) -> WidthInt {
        e.get_bv_type(self)
            .unwrap_or_else(|| panic!("expected a bit-vector, not {}", e.get_type(self)))
    }
}

#[inline]
pub(crate) fn mask(width: WidthInt) -> BVLiteralInt {
    if width >= BVLiteralInt::BITS {
        BVLiteralInt::MAX
    } else {
        ((1 as BVLiteralInt) << width) - 1
    }
}
