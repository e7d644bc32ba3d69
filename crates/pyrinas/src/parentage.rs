//! Label lookup (§4.2): the parentage pass, realized as a pure function over
//! a statement list and an index instead of a cyclic parent-pointer graph.
//!
//! A label is a bare string-literal expression statement placed directly
//! before a loop. Every call site that needs to know a loop's label — the
//! analyzer when pushing it onto the active-label stack, the generator when
//! emitting the `goto` targets — passes the enclosing block and the loop's
//! position within it here, rather than following a stored parent reference.

use ruff_python_ast::{Expr, Stmt};

/// Returns the label immediately preceding the statement at `index` in
/// `body`, if any.
pub fn label_preceding(body: &[Stmt], index: usize) -> Option<&str> {
    if index == 0 {
        return None;
    }
    match &body[index - 1] {
        Stmt::Expr(expr_stmt) => match expr_stmt.value.as_ref() {
            Expr::StringLiteral(lit) => Some(lit.value.to_str()),
            _ => None,
        },
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parse::parse_source;

    #[test]
    fn finds_label_immediately_before_loop() {
        let body = parse_source(
            "def main() -> void:\n    \"outer\"\n    while True:\n        pass\n",
        )
        .unwrap();
        let func_body = match &body[0] {
            Stmt::FunctionDef(f) => &f.body,
            _ => panic!("expected function def"),
        };
        assert_eq!(label_preceding(func_body, 1), Some("outer"));
    }

    #[test]
    fn no_label_when_preceding_statement_is_not_a_bare_string() {
        let body = parse_source("def main() -> void:\n    x: int = 1\n    while True:\n        pass\n").unwrap();
        let func_body = match &body[0] {
            Stmt::FunctionDef(f) => &f.body,
            _ => panic!("expected function def"),
        };
        assert_eq!(label_preceding(func_body, 1), None);
    }
}
