//! The closed four-kind diagnostic taxonomy the analyzer and code generator
//! report through. There is no multi-diagnostic collection: analysis halts
//! on the first failure (see module-level docs on [`crate::analyzer`]).

use std::fmt;

use ruff_text_size::TextRange;

/// A single compile-time failure, tagged with the error kind it belongs to.
#[derive(Debug, Clone)]
pub enum CompileError {
    /// Undeclared variable, unknown field, missing label, duplicate definition.
    Name { message: String, span: TextRange },
    /// Annotation mismatch, inapplicable operator, argument/return mismatch,
    /// immutable write, interface conformance failure.
    Type { message: String, span: TextRange },
    /// `break`/`continue` outside a loop, non-exhaustive `match` on `Result`.
    Syntax { message: String, span: TextRange },
    /// Module load failure propagated from the resolver.
    Import { message: String },
}

impl CompileError {
    pub fn name(message: impl Into<String>, span: TextRange) -> Self {
        Self::Name { message: message.into(), span }
    }

    pub fn type_err(message: impl Into<String>, span: TextRange) -> Self {
        Self::Type { message: message.into(), span }
    }

    pub fn syntax(message: impl Into<String>, span: TextRange) -> Self {
        Self::Syntax { message: message.into(), span }
    }

    pub fn import(message: impl Into<String>) -> Self {
        Self::Import { message: message.into() }
    }

    /// Convenience constructor for call sites (mostly inside [`crate::types`])
    /// that have no source span available, such as parsing a quoted
    /// composed-type string in isolation from its containing expression.
    pub fn type_msg(message: impl Into<String>) -> Self {
        Self::Type { message: message.into(), span: TextRange::default() }
    }

    pub fn syntax_msg(message: impl Into<String>) -> Self {
        Self::Syntax { message: message.into(), span: TextRange::default() }
    }

    pub fn span(&self) -> Option<TextRange> {
        match self {
            Self::Name { span, .. } | Self::Type { span, .. } | Self::Syntax { span, .. } => Some(*span),
            Self::Import { .. } => None,
        }
    }
}

impl fmt::Display for CompileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Name { message, span } => write!(f, "name error at {span:?}: {message}"),
            Self::Type { message, span } => write!(f, "type error at {span:?}: {message}"),
            Self::Syntax { message, span } => write!(f, "syntax error at {span:?}: {message}"),
            Self::Import { message } => write!(f, "import error: {message}"),
        }
    }
}

impl std::error::Error for CompileError {}
