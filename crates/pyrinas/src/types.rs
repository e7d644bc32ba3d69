//! The closed set of types a checked Pyrinas expression can carry.

use std::fmt;

use regex::Regex;
use ruff_python_ast::Expr;

use crate::diagnostics::CompileError;

/// A function's signature: ordered parameter types, return type, and whether
/// it is backed by an external C symbol.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FunctionType {
    pub params: Vec<Type>,
    pub ret: Type,
    pub c_interop: bool,
}

/// The closed sum of types described in the data model: primitives, the
/// built-in parametric constructors, named user types, and the two internal
/// markers (`Module`, `Range`) that never appear in user-written annotations.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Type {
    Int,
    Float,
    Bool,
    Str,
    Void,
    Ptr(Box<Type>),
    Array(Box<Type>, u32),
    Result(Box<Type>, Box<Type>),
    /// Immutability modifier, not a distinct runtime type. Stripped from a
    /// symbol's declared type after the immutability flag has been recorded.
    Final(Box<Type>),
    /// Struct, interface, or enum identifier.
    Named(String),
    /// The opaque type of an imported module symbol.
    Module,
    Function(Box<FunctionType>),
    /// Internal marker for the result of `range(n)`, legal only in `for` headers.
    Range,
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int => write!(f, "int"),
            Self::Float => write!(f, "float"),
            Self::Bool => write!(f, "bool"),
            Self::Str => write!(f, "str"),
            Self::Void => write!(f, "void"),
            Self::Ptr(inner) => write!(f, "ptr[{inner}]"),
            Self::Array(inner, size) => write!(f, "array[{inner},{size}]"),
            Self::Result(ok, err) => write!(f, "Result[{ok},{err}]"),
            Self::Final(inner) => write!(f, "Final[{inner}]"),
            Self::Named(name) => write!(f, "{name}"),
            Self::Module => write!(f, "module"),
            Self::Function(sig) => {
                write!(f, "function(")?;
                for (i, p) in sig.params.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{p}")?;
                }
                write!(f, ") -> {}", sig.ret)
            }
            Self::Range => write!(f, "range"),
        }
    }
}

impl Type {
    /// Strips a `Final[T]` modifier, returning `T` unchanged for every other type.
    pub fn without_final(&self) -> &Type {
        match self {
            Self::Final(inner) => inner.as_ref().without_final(),
            other => other,
        }
    }

    pub fn is_final(&self) -> bool {
        matches!(self, Self::Final(_))
    }

    pub fn is_pointer(&self) -> bool {
        matches!(self.without_final(), Self::Ptr(_))
    }

    /// A short, C-identifier-safe mangling used to name per-instantiation
    /// `Result` types and their helper functions.
    pub fn mangled(&self) -> String {
        match self.without_final() {
            Self::Int => "int".to_owned(),
            Self::Float => "float".to_owned(),
            Self::Bool => "bool".to_owned(),
            Self::Str => "str".to_owned(),
            Self::Void => "void".to_owned(),
            Self::Ptr(inner) => format!("ptr_{}", inner.mangled()),
            Self::Array(inner, size) => format!("array_{}_{size}", inner.mangled()),
            Self::Result(ok, err) => format!("result_{}_{}", ok.mangled(), err.mangled()),
            Self::Named(name) => name.clone(),
            Self::Module => "module".to_owned(),
            Self::Function(_) => "fn".to_owned(),
            Self::Range => "range".to_owned(),
            Self::Final(_) => unreachable!("without_final already strips Final"),
        }
    }

    /// Parses a bare type name (`int`, `MyStruct`, …) with no subscript syntax.
    pub fn from_bare_name(name: &str) -> Type {
        match name {
            "int" => Type::Int,
            "float" => Type::Float,
            "bool" => Type::Bool,
            "str" => Type::Str,
            "void" => Type::Void,
            other => Type::Named(other.to_owned()),
        }
    }

    /// Parses a composed type-name string such as `ptr[int]`, `array[int, 5]`,
    /// `Result[int, str]`, or `Final[int]`, mirroring the string decomposition
    /// the original compiler performs both when reading quoted annotations and
    /// when lowering types to C.
    pub fn parse_composed(text: &str) -> Result<Type, CompileError> {
        let text = text.trim();
        if let Some(inner) = text.strip_prefix("ptr[").and_then(|s| s.strip_suffix(']')) {
            return Ok(Type::Ptr(Box::new(Type::parse_composed(inner)?)));
        }
        if let Some(inner) = text.strip_prefix("Final[").and_then(|s| s.strip_suffix(']')) {
            return Ok(Type::Final(Box::new(Type::parse_composed(inner)?)));
        }
        if let Some(caps) = array_re().captures(text) {
            let base = Type::parse_composed(&caps[1])?;
            let size: u32 = caps[2]
                .parse()
                .map_err(|_| CompileError::syntax_msg(format!("invalid array size in '{text}'")))?;
            return Ok(Type::Array(Box::new(base), size));
        }
        if let Some(caps) = result_re().captures(text) {
            let ok = Type::parse_composed(&caps[1])?;
            let err = Type::parse_composed(&caps[2])?;
            return Ok(Type::Result(Box::new(ok), Box::new(err)));
        }
        if text.contains('[') {
            return Err(CompileError::type_msg(format!("unsupported type annotation '{text}'")));
        }
        Ok(Type::from_bare_name(text))
    }

    /// Extracts a type from an annotation expression, the structured analogue
    /// of the original's `_get_type_name`: bare names, quoted composed-type
    /// strings, and directly-written subscript forms (`ptr[int]`,
    /// `array[int, 5]`, `Result[int, str]`, `Final[int]`) are all accepted.
    pub fn from_annotation(expr: &Expr) -> Result<Type, CompileError> {
        match expr {
            Expr::Name(name) => Ok(Type::from_bare_name(name.id.as_str())),
            Expr::StringLiteral(lit) => Type::parse_composed(lit.value.to_str()),
            Expr::Subscript(sub) => {
                let base_name = match sub.value.as_ref() {
                    Expr::Name(name) => name.id.as_str(),
                    _ => return Err(CompileError::type_msg("unsupported subscript annotation base")),
                };
                match base_name {
                    "ptr" => Ok(Type::Ptr(Box::new(Type::from_annotation(&sub.slice)?))),
                    "Final" => Ok(Type::Final(Box::new(Type::from_annotation(&sub.slice)?))),
                    "array" => {
                        let (base, size) = two_element_subscript(&sub.slice)?;
                        let base = Type::from_annotation(base)?;
                        let size = int_literal_value(size)
                            .ok_or_else(|| CompileError::type_msg("array size must be an integer literal"))?;
                        Ok(Type::Array(Box::new(base), size))
                    }
                    "Result" => {
                        let (ok, err) = two_element_subscript(&sub.slice)?;
                        Ok(Type::Result(Box::new(Type::from_annotation(ok)?), Box::new(Type::from_annotation(err)?)))
                    }
                    other => Err(CompileError::type_msg(format!("unsupported subscript annotation: {other}"))),
                }
            }
            Expr::NoneLiteral(_) => Ok(Type::Void),
            _ => Err(CompileError::type_msg("unsupported type annotation")),
        }
    }
}

fn array_re() -> &'static Regex {
    static RE: std::sync::OnceLock<Regex> = std::sync::OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^array\[(\w+),\s*(\d+)\]$").expect("valid regex"))
}

fn result_re() -> &'static Regex {
    static RE: std::sync::OnceLock<Regex> = std::sync::OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^Result\[(\w+),\s*(\w+)\]$").expect("valid regex"))
}

fn two_element_subscript(slice: &Expr) -> Result<(&Expr, &Expr), CompileError> {
    match slice {
        Expr::Tuple(tuple) if tuple.elts.len() == 2 => Ok((&tuple.elts[0], &tuple.elts[1])),
        _ => Err(CompileError::type_msg("expected exactly two type parameters")),
    }
}

fn int_literal_value(expr: &Expr) -> Option<u32> {
    match expr {
        Expr::NumberLiteral(lit) => match &lit.value {
            ruff_python_ast::Number::Int(i) => i.as_i64().and_then(|v| u32::try_from(v).ok()),
            _ => None,
        },
        _ => None,
    }
}
