//! Thin wrapper over the host parser.
//!
//! Lexing and parsing are out of scope for this crate (§1); `ruff_python_parser`
//! plays the role of the host parser the specification assumes, the same way
//! the teacher crate leans on it for its own out-of-scope parse step.

use ruff_python_ast::Stmt;
use ruff_python_parser::parse_module;
use ruff_text_size::TextRange;

use crate::diagnostics::CompileError;

pub fn parse_source(code: &str) -> Result<Vec<Stmt>, CompileError> {
    let parsed = parse_module(code)
        .map_err(|err| CompileError::syntax(format!("failed to parse source: {err}"), TextRange::default()))?;
    Ok(parsed.into_syntax().body)
}
