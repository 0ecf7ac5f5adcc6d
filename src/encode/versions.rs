// Copyright 2024 Cornell University
// released under BSD 3-Clause License
// author: Kevin Laeufer <laeufer@cornell.edu>

use crate::ir::*;
use std::collections::HashMap;

/// One single-assignment instance of a variable, materialized as the symbol `name@generation`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VarVersion {
    pub name: String,
    pub generation: u32,
    pub symbol: ExprRef,
}

/// Hands out generations per variable name, starting at zero.
#[derive(Debug, Clone, Default)]
pub struct VersionArena {
    generations: HashMap<String, u32>,
    versions: Vec<VarVersion>,
}

impl VersionArena {
    /// New version of the program variable `var`. `None` if `var` is not a symbol.
    pub fn fresh(&mut self, ctx: &mut Context, var: ExprRef) -> Option<ExprRef> {
        let name = var.get_symbol_name(ctx)?.to_string();
        let tpe = var.get_type(ctx);
        Some(self.fresh_named(ctx, &name, tpe))
    }

    pub fn fresh_named(&mut self, ctx: &mut Context, name: &str, tpe: Type) -> ExprRef {
        let counter = self.generations.entry(name.to_string()).or_insert(0);
        let generation = *counter;
        *counter += 1;
        let name_ref = ctx.string(format!("{name}@{generation}").into());
        let symbol = ctx.symbol(name_ref, tpe);
        self.versions.push(VarVersion {
            name: name.to_string(),
            generation,
            symbol,
        });
        symbol
    }

    /// All versions in creation order.
    pub fn versions(&self) -> &[VarVersion] {
        &self.versions
    }

    pub fn latest(&self, name: &str) -> Option<&VarVersion> {
        self.versions.iter().rev().find(|v| v.name == name)
    }

    pub fn len(&self) -> usize {
        self.versions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.versions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generations_count_per_name() {
        let mut ctx = Context::default();
        let x = ctx.bv_symbol("x", 8);
        let y = ctx.bv_symbol("y", 8);
        let mut arena = VersionArena::default();
        let x0 = arena.fresh(&mut ctx, x).unwrap();
        let y0 = arena.fresh(&mut ctx, y).unwrap();
        let x1 = arena.fresh(&mut ctx, x).unwrap();
        assert_eq!(x0.get_symbol_name(&ctx), Some("x@0"));
        assert_eq!(y0.get_symbol_name(&ctx), Some("y@0"));
        assert_eq!(x1.get_symbol_name(&ctx), Some("x@1"));
        assert_eq!(x1.get_type(&ctx), Type::BV(8));
        assert_eq!(arena.latest("x").map(|v| v.symbol), Some(x1));
        assert_eq!(arena.len(), 3);

        let lit = ctx.zero(8);
        assert!(arena.fresh(&mut ctx, lit).is_none());
    }
}
