//! Symbol kinds and the payloads each kind carries (§3.2 of the data model).

use indexmap::IndexMap;

use crate::types::{FunctionType, Type};

#[derive(Debug, Clone)]
pub enum SymbolKind {
    Variable { ty: Type, is_final: bool },
    Function { params: Vec<Type>, ret: Type, c_interop: bool, c_library: Option<String> },
    Struct {
        fields: IndexMap<String, Type>,
        methods: IndexMap<String, FunctionType>,
        implements: Vec<String>,
    },
    Interface { methods: IndexMap<String, FunctionType> },
    Enum { members: IndexMap<String, i64> },
    Module { exports: IndexMap<String, Symbol> },
}

#[derive(Debug, Clone)]
pub struct Symbol {
    pub name: String,
    pub kind: SymbolKind,
}

impl Symbol {
    pub fn variable(name: impl Into<String>, ty: Type) -> Self {
        let is_final = ty.is_final();
        Self { name: name.into(), kind: SymbolKind::Variable { ty, is_final } }
    }

    pub fn function(
        name: impl Into<String>,
        params: Vec<Type>,
        ret: Type,
        c_interop: bool,
        c_library: Option<String>,
    ) -> Self {
        Self { name: name.into(), kind: SymbolKind::Function { params, ret, c_interop, c_library } }
    }

    /// The type a name-expression referring to this symbol carries, used by
    /// the analyzer's `visit_expr`. Kinds without a sensible expression type
    /// (struct/interface/enum declarations themselves, as opposed to values
    /// of those types) return `None`.
    pub fn expr_type(&self) -> Option<Type> {
        match &self.kind {
            SymbolKind::Variable { ty, .. } => Some(ty.clone()),
            SymbolKind::Function { params, ret, c_interop, .. } => Some(Type::Function(Box::new(FunctionType {
                params: params.clone(),
                ret: ret.clone(),
                c_interop: *c_interop,
            }))),
            SymbolKind::Module { .. } => Some(Type::Module),
            SymbolKind::Struct { .. } | SymbolKind::Interface { .. } | SymbolKind::Enum { .. } => {
                Some(Type::Named(self.name.clone()))
            }
        }
    }
}
