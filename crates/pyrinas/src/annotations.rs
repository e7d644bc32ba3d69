//! The annotated AST, realized as a side table from expression span to
//! inferred type rather than a mutation of the host parser's own nodes.
//!
//! `ruff_python_ast` expressions are plain, externally-owned values with no
//! room for an attached type slot, so the analyzer records its findings here,
//! keyed by `TextRange`. Two distinct expressions in one parsed file never
//! share a byte range, so this is a faithful stand-in for "the annotated
//! AST" the code generator consumes alongside the symbol table.

use std::collections::HashMap;

use ruff_python_ast::Expr;
use ruff_text_size::{Ranged, TextRange};

use crate::types::Type;

#[derive(Debug, Default)]
pub struct Annotations {
    expr_types: HashMap<TextRange, Type>,
}

impl Annotations {
    pub fn record(&mut self, expr: &Expr, ty: Type) {
        self.expr_types.insert(expr.range(), ty);
    }

    pub fn type_of(&self, expr: &Expr) -> Option<&Type> {
        self.expr_types.get(&expr.range())
    }
}
