//! The semantic analyzer (§4.3): two passes over a module's top-level
//! statements, then a single recursive walk of each function body, resolving
//! names against the symbol table and recording the type of every checked
//! expression into the annotated AST.
//!
//! Analysis halts on the first failure — there is no multi-diagnostic
//! collection, matching the closed four-kind error taxonomy in
//! [`crate::diagnostics`]. Grounded throughout on `semantic.py`'s
//! `SemanticAnalyzer`.

use std::collections::BTreeSet;

use indexmap::IndexMap;
use ruff_python_ast::{self as ast, Expr, Stmt};
use ruff_text_size::{Ranged, TextRange};

use crate::annotations::Annotations;
use crate::diagnostics::CompileError;
use crate::parentage::label_preceding;
use crate::resolver::ModuleResolver;
use crate::scope::ScopeStack;
use crate::symbol::{Symbol, SymbolKind};
use crate::types::{FunctionType, Type};

/// Everything the code generator needs from a fully analyzed module: the
/// final global scope, the C headers and link libraries gathered from
/// `@c_include`/`@c_function` decorators, and the annotated AST side table.
pub struct AnalysisResult {
    pub symbols: ScopeStack,
    pub includes: Vec<String>,
    pub link_libs: Vec<String>,
    pub annotations: Annotations,
}

pub fn analyze(body: &[Stmt], file_path: &str, resolver: &mut dyn ModuleResolver) -> Result<AnalysisResult, CompileError> {
    let mut analyzer = Analyzer {
        scopes: ScopeStack::new(),
        current_return: None,
        loop_depth: 0,
        active_labels: Vec::new(),
        includes: BTreeSet::new(),
        link_libs: BTreeSet::new(),
        annotations: Annotations::default(),
        file_path,
        resolver,
    };
    analyzer.analyze_module(body)?;
    Ok(AnalysisResult {
        symbols: analyzer.scopes,
        includes: analyzer.includes.into_iter().collect(),
        link_libs: analyzer.link_libs.into_iter().collect(),
        annotations: analyzer.annotations,
    })
}

struct Analyzer<'a> {
    scopes: ScopeStack,
    current_return: Option<Type>,
    loop_depth: u32,
    active_labels: Vec<String>,
    includes: BTreeSet<String>,
    link_libs: BTreeSet<String>,
    annotations: Annotations,
    file_path: &'a str,
    resolver: &'a mut dyn ModuleResolver,
}

fn requires_main(file_path: &str) -> bool {
    !file_path.contains("/modules/") && !file_path.ends_with("_utils.pyr")
}

pub(crate) fn is_import_decorated(f: &ast::StmtFunctionDef) -> bool {
    f.decorator_list.iter().any(|d| {
        matches!(
            &d.expression,
            Expr::Call(call) if matches!(
                call.func.as_ref(),
                Expr::Name(name) if matches!(name.id.as_str(), "module_import" | "module_from_import")
            )
        )
    })
}

fn default_module_alias(path: &str) -> String {
    path.rsplit('/').next().unwrap_or(path).trim_end_matches(".pyr").to_owned()
}

pub(crate) fn is_pass_only(body: &[Stmt]) -> bool {
    matches!(body, [Stmt::Pass(_)])
}

fn int_literal(expr: &Expr) -> Option<i64> {
    match expr {
        Expr::NumberLiteral(lit) => match &lit.value {
            ast::Number::Int(i) => i.as_i64(),
            _ => None,
        },
        Expr::UnaryOp(u) if matches!(u.op, ast::UnaryOp::USub) => int_literal(&u.operand).map(|v| -v),
        _ => None,
    }
}

fn string_literal(expr: &Expr) -> Result<String, CompileError> {
    match expr {
        Expr::StringLiteral(lit) => Ok(lit.value.to_str().to_owned()),
        other => Err(CompileError::syntax("expected a string literal argument", other.range())),
    }
}

fn require_arg_count(args: &[Expr], expected: usize, name: &str, span: TextRange) -> Result<(), CompileError> {
    if args.len() != expected {
        return Err(CompileError::type_err(
            format!("{name}() expects exactly {expected} argument(s), got {}", args.len()),
            span,
        ));
    }
    Ok(())
}

fn expect_result_ok(ty: &Type, span: TextRange) -> Result<Type, CompileError> {
    match ty.without_final() {
        Type::Result(ok, _) => Ok(ok.as_ref().clone()),
        other => Err(CompileError::type_err(format!("expected a Result value, got {other}"), span)),
    }
}

impl Analyzer<'_> {
    // ---- module-level passes -------------------------------------------------

    fn analyze_module(&mut self, body: &[Stmt]) -> Result<(), CompileError> {
        self.process_module_imports(body)?;

        if requires_main(self.file_path) {
            let has_main = body.iter().any(|stmt| {
                matches!(
                    stmt,
                    Stmt::FunctionDef(f)
                        if f.name.as_str() == "main" && f.parameters.args.is_empty() && !is_import_decorated(f)
                )
            });
            if !has_main {
                return Err(CompileError::syntax_msg(format!(
                    "module '{}' must define a zero-argument 'main' function",
                    self.file_path
                )));
            }
        }

        // First pass: register every function signature and class before
        // checking any body, so forward references and mutual recursion
        // resolve correctly.
        for stmt in body {
            match stmt {
                Stmt::FunctionDef(f) if !is_import_decorated(f) => self.register_function_signature(f)?,
                Stmt::ClassDef(c) => self.register_class(c)?,
                _ => {}
            }
        }

        // Second pass: check function bodies and all other top-level statements.
        for (index, stmt) in body.iter().enumerate() {
            match stmt {
                Stmt::FunctionDef(f) if !is_import_decorated(f) => self.analyze_function_body(f)?,
                Stmt::FunctionDef(_) | Stmt::ClassDef(_) => {}
                _ => self.visit_stmt(body, index, stmt)?,
            }
        }

        Ok(())
    }

    fn process_module_imports(&mut self, body: &[Stmt]) -> Result<(), CompileError> {
        for stmt in body {
            let Stmt::FunctionDef(f) = stmt else { continue };
            for decorator in &f.decorator_list {
                let Expr::Call(call) = &decorator.expression else { continue };
                let Expr::Name(name) = call.func.as_ref() else { continue };
                match name.id.as_str() {
                    "module_import" => {
                        let path = string_literal(call.arguments.args.first().ok_or_else(|| {
                            CompileError::syntax("module_import() requires a path argument", decorator.range())
                        })?)?;
                        let alias = match call.arguments.args.get(1) {
                            Some(expr) => string_literal(expr)?,
                            None => default_module_alias(&path),
                        };
                        let exports = self.resolver.resolve_and_analyze(&path, Some(self.file_path))?;
                        self.scopes.insert(Symbol { name: alias, kind: SymbolKind::Module { exports: exports.symbols } });
                    }
                    "module_from_import" => {
                        let mut args = call.arguments.args.iter();
                        let path = string_literal(args.next().ok_or_else(|| {
                            CompileError::syntax("module_from_import() requires a path argument", decorator.range())
                        })?)?;
                        let exports = self.resolver.resolve_and_analyze(&path, Some(self.file_path))?;
                        for name_expr in args {
                            let member = string_literal(name_expr)?;
                            let symbol = exports.symbols.get(&member).cloned().ok_or_else(|| {
                                CompileError::name(format!("module '{path}' has no export '{member}'"), name_expr.range())
                            })?;
                            self.scopes.insert(symbol);
                        }
                    }
                    _ => {}
                }
            }
        }
        Ok(())
    }

    /// Reads `@c_function`/`@c_function("lib")`/`@c_include("header.h")`.
    /// Called both during signature registration and during body-checking,
    /// matching the original; re-inserting the same include/library is
    /// harmless since both are sets.
    fn process_decorators(&mut self, decorators: &[ast::Decorator]) -> Result<(bool, Option<String>), CompileError> {
        let mut is_c_function = false;
        let mut c_library = None;
        for decorator in decorators {
            match &decorator.expression {
                Expr::Name(name) if name.id.as_str() == "c_function" => is_c_function = true,
                Expr::Call(call) => {
                    let Expr::Name(name) = call.func.as_ref() else { continue };
                    match name.id.as_str() {
                        "c_function" => {
                            is_c_function = true;
                            if let Some(first) = call.arguments.args.first() {
                                c_library = Some(string_literal(first)?);
                            }
                        }
                        "c_include" => {
                            if let Some(first) = call.arguments.args.first() {
                                self.includes.insert(string_literal(first)?);
                            }
                        }
                        _ => {}
                    }
                }
                _ => {}
            }
        }
        Ok((is_c_function, c_library))
    }

    fn register_function_signature(&mut self, f: &ast::StmtFunctionDef) -> Result<(), CompileError> {
        if self.scopes.lookup_current(f.name.as_str()).is_some() {
            return Err(CompileError::name(format!("Function '{}' already defined.", f.name), f.range()));
        }
        let (is_c_function, c_library) = self.process_decorators(&f.decorator_list)?;
        let ret = parse_return_annotation(f.returns.as_deref())?;
        let mut params = Vec::with_capacity(f.parameters.args.len());
        for param in &f.parameters.args {
            let annotation = param.parameter.annotation.as_deref().ok_or_else(|| {
                CompileError::type_err(
                    format!("parameter '{}' must have a type annotation", param.parameter.name),
                    param.parameter.range(),
                )
            })?;
            params.push(Type::from_annotation(annotation)?);
        }
        if let Some(lib) = &c_library {
            self.link_libs.insert(lib.clone());
        }
        self.scopes.insert(Symbol::function(f.name.as_str(), params, ret, is_c_function, c_library));
        Ok(())
    }

    fn register_class(&mut self, c: &ast::StmtClassDef) -> Result<(), CompileError> {
        if self.scopes.lookup_current(c.name.as_str()).is_some() {
            return Err(CompileError::name(format!("Type '{}' already defined.", c.name), c.range()));
        }
        let bases: Vec<&Expr> = c.arguments.as_ref().map(|a| a.args.iter().collect()).unwrap_or_default();
        let base_names: Vec<&str> =
            bases.iter().filter_map(|b| match b { Expr::Name(name) => Some(name.id.as_str()), _ => None }).collect();

        if base_names.contains(&"Enum") {
            return self.register_enum(c);
        }

        let mut implements = Vec::new();
        for base in &base_names {
            match self.scopes.lookup(base).map(|s| &s.kind) {
                Some(SymbolKind::Interface { .. }) => implements.push((*base).to_owned()),
                Some(_) => {
                    return Err(CompileError::type_err(format!("'{base}' is not an interface and cannot be implemented"), c.range()));
                }
                None => return Err(CompileError::name(format!("'{base}' is not defined"), c.range())),
            }
        }

        let mut fields = IndexMap::new();
        let mut methods = IndexMap::new();
        let mut has_method_implementations = false;

        for item in &c.body {
            match item {
                Stmt::AnnAssign(a) => {
                    let Expr::Name(field_name) = a.target.as_ref() else {
                        return Err(CompileError::syntax("struct field declarations must be simple names", a.range()));
                    };
                    fields.insert(field_name.id.to_string(), Type::from_annotation(&a.annotation)?);
                }
                Stmt::FunctionDef(m) => {
                    let ret = parse_return_annotation(m.returns.as_deref())?;
                    let mut params = Vec::new();
                    for (i, param) in m.parameters.args.iter().enumerate() {
                        if i == 0 && param.parameter.name.as_str() == "self" {
                            continue;
                        }
                        let annotation = param.parameter.annotation.as_deref().ok_or_else(|| {
                            CompileError::type_err(
                                format!("parameter '{}' must have a type annotation", param.parameter.name),
                                param.parameter.range(),
                            )
                        })?;
                        params.push(Type::from_annotation(annotation)?);
                    }
                    if !is_pass_only(&m.body) {
                        has_method_implementations = true;
                    }
                    methods.insert(m.name.to_string(), FunctionType { params, ret, c_interop: false });
                }
                Stmt::Pass(_) => {}
                other => return Err(CompileError::syntax("unsupported statement in class body", other.range())),
            }
        }

        for base in &implements {
            let Some(SymbolKind::Interface { methods: iface_methods }) = self.scopes.lookup(base).map(|s| &s.kind) else {
                unreachable!("already validated to be an interface above");
            };
            for (name, sig) in iface_methods {
                match methods.get(name) {
                    Some(impl_sig) if impl_sig.params == sig.params && impl_sig.ret == sig.ret => {}
                    Some(_) => {
                        return Err(CompileError::type_err(format!("method '{name}' does not match interface '{base}'"), c.range()));
                    }
                    None => {
                        return Err(CompileError::type_err(
                            format!("'{}' does not implement method '{name}' required by interface '{base}'", c.name),
                            c.range(),
                        ));
                    }
                }
            }
        }

        let is_struct = !fields.is_empty() || has_method_implementations || !implements.is_empty();
        let kind =
            if is_struct { SymbolKind::Struct { fields, methods, implements } } else { SymbolKind::Interface { methods } };
        self.scopes.insert(Symbol { name: c.name.to_string(), kind });
        Ok(())
    }

    fn register_enum(&mut self, c: &ast::StmtClassDef) -> Result<(), CompileError> {
        let mut members = IndexMap::new();
        for item in &c.body {
            match item {
                Stmt::Assign(a) => {
                    if a.targets.len() != 1 {
                        return Err(CompileError::syntax("enum members must be single assignments", a.range()));
                    }
                    let Expr::Name(member_name) = &a.targets[0] else {
                        return Err(CompileError::syntax("enum members must be simple names", a.range()));
                    };
                    let value = int_literal(&a.value)
                        .ok_or_else(|| CompileError::type_err("enum members must be assigned an integer literal", a.value.range()))?;
                    members.insert(member_name.id.to_string(), value);
                }
                Stmt::Pass(_) => {}
                other => return Err(CompileError::syntax("enum bodies may only contain member assignments", other.range())),
            }
        }
        self.scopes.insert(Symbol { name: c.name.to_string(), kind: SymbolKind::Enum { members } });
        Ok(())
    }

    fn analyze_function_body(&mut self, f: &ast::StmtFunctionDef) -> Result<(), CompileError> {
        let (is_c_function, _) = self.process_decorators(&f.decorator_list)?;
        let is_external = is_pass_only(&f.body);
        let ret = parse_return_annotation(f.returns.as_deref())?;
        let previous_return = self.current_return.replace(ret);

        self.scopes.push_scope();
        for param in &f.parameters.args {
            let annotation = param.parameter.annotation.as_deref().ok_or_else(|| {
                CompileError::type_err(
                    format!("parameter '{}' must have a type annotation", param.parameter.name),
                    param.parameter.range(),
                )
            })?;
            let ty = Type::from_annotation(annotation)?;
            self.scopes.insert(Symbol::variable(param.parameter.name.as_str(), ty));
        }

        // A function is a bare C declaration (no body to check) only when it
        // is BOTH decorated @c_function AND has a pass-only body. A
        // @c_function with a real body is still analyzed normally.
        if !(is_c_function && is_external) {
            self.visit_block(&f.body)?;
        }

        self.scopes.pop_scope();
        self.current_return = previous_return;
        Ok(())
    }

    // ---- statements -----------------------------------------------------------

    fn visit_block(&mut self, body: &[Stmt]) -> Result<(), CompileError> {
        for (index, stmt) in body.iter().enumerate() {
            self.visit_stmt(body, index, stmt)?;
        }
        Ok(())
    }

    fn visit_stmt(&mut self, body: &[Stmt], index: usize, stmt: &Stmt) -> Result<(), CompileError> {
        match stmt {
            Stmt::Expr(e) => {
                self.visit_expr(&e.value)?;
                Ok(())
            }
            Stmt::Pass(_) => Ok(()),
            Stmt::AnnAssign(a) => self.visit_ann_assign(a),
            Stmt::Assign(a) => self.visit_assign(a),
            Stmt::Return(r) => self.visit_return(r),
            Stmt::If(i) => self.visit_if(i),
            Stmt::While(w) => self.visit_while(w, body, index),
            Stmt::For(f) => self.visit_for(f, body, index),
            Stmt::Break(b) => self.visit_break(b, body, index),
            Stmt::Continue(c) => self.visit_continue(c, body, index),
            Stmt::Match(m) => self.visit_match(m),
            Stmt::FunctionDef(_) => Err(CompileError::syntax("nested function definitions are not supported", stmt.range())),
            Stmt::ClassDef(_) => Err(CompileError::syntax("nested class definitions are not supported", stmt.range())),
            other => Err(CompileError::syntax("unsupported statement", other.range())),
        }
    }

    fn visit_ann_assign(&mut self, a: &ast::StmtAnnAssign) -> Result<(), CompileError> {
        let Expr::Name(target) = a.target.as_ref() else {
            return Err(CompileError::syntax("annotated assignment target must be a name", a.range()));
        };
        let declared = Type::from_annotation(&a.annotation)?;
        if self.scopes.lookup_current(target.id.as_str()).is_some() {
            return Err(CompileError::name(format!("variable '{}' already declared in this scope", target.id), a.range()));
        }
        if declared.is_final() && a.value.is_none() {
            return Err(CompileError::type_err(
                format!("immutable variable '{}' must be initialized at declaration", target.id),
                a.range(),
            ));
        }
        self.scopes.insert(Symbol::variable(target.id.as_str(), declared.clone()));
        if let Some(value) = &a.value {
            let value_ty = self.visit_expr(value)?;
            self.check_assignable(declared.without_final(), &value_ty, value.range())?;
        }
        Ok(())
    }

    fn visit_assign(&mut self, a: &ast::StmtAssign) -> Result<(), CompileError> {
        for target in &a.targets {
            match target {
                Expr::Name(name) => {
                    let symbol = self.scopes.lookup(name.id.as_str()).cloned().ok_or_else(|| {
                        CompileError::name(format!("variable '{}' not declared", name.id), target.range())
                    })?;
                    let SymbolKind::Variable { ty, is_final } = &symbol.kind else {
                        return Err(CompileError::type_err(format!("'{}' is not a variable", name.id), target.range()));
                    };
                    if *is_final {
                        return Err(CompileError::type_err(format!("cannot reassign immutable variable '{}'", name.id), target.range()));
                    }
                    let value_ty = self.visit_expr(&a.value)?;
                    self.check_assignable(ty.without_final(), &value_ty, a.value.range())?;
                }
                Expr::Subscript(sub) => {
                    self.check_immutable_base(&sub.value, "array", target.range())?;
                    self.visit_expr(target)?;
                }
                Expr::Attribute(attr) => {
                    self.check_immutable_base(&attr.value, "struct", target.range())?;
                    self.visit_expr(target)?;
                }
                other => {
                    self.visit_expr(other)?;
                }
            }
        }
        self.visit_expr(&a.value)?;
        Ok(())
    }

    fn check_immutable_base(&mut self, base: &Expr, what: &str, span: TextRange) -> Result<(), CompileError> {
        if let Expr::Name(name) = base {
            if let Some(Symbol { kind: SymbolKind::Variable { is_final: true, .. }, .. }) = self.scopes.lookup(name.id.as_str()) {
                return Err(CompileError::type_err(format!("cannot modify immutable {what} '{}'", name.id), span));
            }
        }
        Ok(())
    }

    fn check_assignable(&self, declared: &Type, value: &Type, span: TextRange) -> Result<(), CompileError> {
        let value = value.without_final();
        if declared == value {
            return Ok(());
        }
        match (declared, value) {
            (Type::Ptr(_), Type::Ptr(inner)) if matches!(inner.as_ref(), Type::Void) => Ok(()),
            (Type::Bool, Type::Int) => Ok(()),
            _ => Err(CompileError::type_err(format!("type mismatch: expected {declared}, got {value}"), span)),
        }
    }

    fn visit_if(&mut self, i: &ast::StmtIf) -> Result<(), CompileError> {
        let test_ty = self.visit_expr(&i.test)?;
        self.require_bool(&test_ty, i.test.range(), "if condition")?;
        self.visit_block(&i.body)?;
        for clause in &i.elif_else_clauses {
            if let Some(test) = &clause.test {
                let ty = self.visit_expr(test)?;
                self.require_bool(&ty, test.range(), "elif condition")?;
            }
            self.visit_block(&clause.body)?;
        }
        Ok(())
    }

    fn require_bool(&self, ty: &Type, span: TextRange, what: &str) -> Result<(), CompileError> {
        if matches!(ty.without_final(), Type::Bool) {
            Ok(())
        } else {
            Err(CompileError::type_err(format!("{what} must be a boolean expression, got {ty}"), span))
        }
    }

    // `while`/`for`/`if` bodies share the enclosing scope rather than
    // pushing their own, matching the original and the data model's scoping
    // rule (§3.3), which calls out function bodies, method bodies, and match
    // arms as the scope-pushing constructs and is silent on conditionals and
    // loops.
    fn visit_while(&mut self, w: &ast::StmtWhile, body: &[Stmt], index: usize) -> Result<(), CompileError> {
        if !w.orelse.is_empty() {
            return Err(CompileError::syntax("'while ... else' is not supported", w.range()));
        }
        let test_ty = self.visit_expr(&w.test)?;
        self.require_bool(&test_ty, w.test.range(), "while condition")?;

        let label = label_preceding(body, index).map(str::to_owned);
        self.loop_depth += 1;
        if let Some(label) = &label {
            self.active_labels.push(label.clone());
        }
        self.visit_block(&w.body)?;
        if label.is_some() {
            self.active_labels.pop();
        }
        self.loop_depth -= 1;
        Ok(())
    }

    fn visit_for(&mut self, f: &ast::StmtFor, body: &[Stmt], index: usize) -> Result<(), CompileError> {
        if !f.orelse.is_empty() {
            return Err(CompileError::syntax("'for ... else' is not supported", f.range()));
        }
        let Expr::Name(target) = f.target.as_ref() else {
            return Err(CompileError::syntax("for-loop target must be a simple name", f.target.range()));
        };
        self.check_range_iter(&f.iter)?;

        if self.scopes.lookup_current(target.id.as_str()).is_some() {
            return Err(CompileError::name(format!("variable '{}' already declared in this scope", target.id), f.target.range()));
        }
        self.scopes.insert(Symbol::variable(target.id.as_str(), Type::Int));

        let label = label_preceding(body, index).map(str::to_owned);
        self.loop_depth += 1;
        if let Some(label) = &label {
            self.active_labels.push(label.clone());
        }
        self.visit_block(&f.body)?;
        if label.is_some() {
            self.active_labels.pop();
        }
        self.loop_depth -= 1;
        Ok(())
    }

    fn check_range_iter(&mut self, expr: &Expr) -> Result<(), CompileError> {
        let Expr::Call(call) = expr else {
            return Err(CompileError::syntax("for-loop iterable must be a call to range(n)", expr.range()));
        };
        let Expr::Name(name) = call.func.as_ref() else {
            return Err(CompileError::syntax("for-loop iterable must be a call to range(n)", expr.range()));
        };
        if name.id.as_str() != "range" || call.arguments.args.len() != 1 {
            return Err(CompileError::syntax("for-loop iterable must be a call to range(n)", expr.range()));
        }
        let arg_ty = self.visit_expr(&call.arguments.args[0])?;
        if !matches!(arg_ty.without_final(), Type::Int) {
            return Err(CompileError::type_err("range() expects a single integer argument", expr.range()));
        }
        Ok(())
    }

    fn visit_break(&mut self, b: &ast::StmtBreak, body: &[Stmt], index: usize) -> Result<(), CompileError> {
        if self.loop_depth == 0 {
            return Err(CompileError::syntax("'break' outside loop", b.range()));
        }
        self.check_label(body, index, b.range())
    }

    fn visit_continue(&mut self, c: &ast::StmtContinue, body: &[Stmt], index: usize) -> Result<(), CompileError> {
        if self.loop_depth == 0 {
            return Err(CompileError::syntax("'continue' outside loop", c.range()));
        }
        self.check_label(body, index, c.range())
    }

    fn check_label(&self, body: &[Stmt], index: usize, span: TextRange) -> Result<(), CompileError> {
        if let Some(label) = label_preceding(body, index) {
            if !self.active_labels.iter().any(|l| l == label) {
                return Err(CompileError::name(format!("label '{label}' not found"), span));
            }
        }
        Ok(())
    }

    fn visit_return(&mut self, r: &ast::StmtReturn) -> Result<(), CompileError> {
        let current_return = self
            .current_return
            .clone()
            .ok_or_else(|| CompileError::syntax("'return' outside of a function", r.range()))?;

        match current_return.without_final() {
            Type::Result(ok, err) => {
                let value = r.value.as_deref().ok_or_else(|| {
                    CompileError::type_err("must return an Ok or Err value from a function with a Result return type", r.range())
                })?;
                let Expr::Call(call) = value else {
                    return Err(CompileError::type_err(
                        "must return an Ok or Err value from a function with a Result return type",
                        value.range(),
                    ));
                };
                let Expr::Name(ctor) = call.func.as_ref() else {
                    return Err(CompileError::type_err(
                        "must return an Ok or Err value from a function with a Result return type",
                        value.range(),
                    ));
                };
                if call.arguments.args.len() != 1 {
                    return Err(CompileError::type_err(format!("{}() expects exactly one argument", ctor.id), value.range()));
                }
                let inner_ty = self.visit_expr(&call.arguments.args[0])?;
                match ctor.id.as_str() {
                    "Ok" if &inner_ty == ok.as_ref() => Ok(()),
                    "Ok" => Err(CompileError::type_err(format!("type mismatch in Ok return: expected {ok}, got {inner_ty}"), value.range())),
                    "Err" if &inner_ty == err.as_ref() => Ok(()),
                    "Err" => {
                        Err(CompileError::type_err(format!("type mismatch in Err return: expected {err}, got {inner_ty}"), value.range()))
                    }
                    other => Err(CompileError::type_err(format!("unknown Result constructor '{other}'"), value.range())),
                }
            }
            Type::Void => {
                if let Some(value) = &r.value {
                    Err(CompileError::type_err("function declared to return void must not return a value", value.range()))
                } else {
                    Ok(())
                }
            }
            expected => {
                let value = r
                    .value
                    .as_deref()
                    .ok_or_else(|| CompileError::type_err(format!("function must return a value of type {expected}"), r.range()))?;
                let actual = self.visit_expr(value)?;
                // Unlike assignment, return-type checking uses exact equality:
                // no bool<-int widening here.
                if &actual != expected {
                    return Err(CompileError::type_err(format!("return type mismatch: expected {expected}, got {actual}"), value.range()));
                }
                Ok(())
            }
        }
    }

    fn visit_match(&mut self, m: &ast::StmtMatch) -> Result<(), CompileError> {
        let subject_ty = self.visit_expr(&m.subject)?;
        let Type::Result(ok_ty, err_ty) = subject_ty.without_final().clone() else {
            return Err(CompileError::type_err(
                format!("'match' on a Result requires a Result-typed subject, got {subject_ty}"),
                m.subject.range(),
            ));
        };

        let mut has_ok = false;
        let mut has_err = false;

        for case in &m.cases {
            let (ctor, binding) = match_arm_binding(&case.pattern)
                .ok_or_else(|| CompileError::syntax("match arms on a Result must bind 'Ok(name)' or 'Err(name)'", case.range()))?;

            let bound_ty = match ctor {
                "Ok" => {
                    has_ok = true;
                    ok_ty.as_ref().clone()
                }
                "Err" => {
                    has_err = true;
                    err_ty.as_ref().clone()
                }
                other => return Err(CompileError::syntax(format!("unsupported match pattern '{other}'"), case.range())),
            };

            self.scopes.push_scope();
            if let Some(name) = binding {
                self.scopes.insert(Symbol::variable(name, bound_ty));
            }
            self.visit_block(&case.body)?;
            self.scopes.pop_scope();
        }

        if !has_ok || !has_err {
            return Err(CompileError::syntax("match on a Result must handle both 'Ok' and 'Err' cases", m.range()));
        }
        Ok(())
    }

    // ---- expressions -----------------------------------------------------------

    fn visit_expr(&mut self, expr: &Expr) -> Result<Type, CompileError> {
        let ty = match expr {
            Expr::NumberLiteral(lit) => match &lit.value {
                ast::Number::Int(_) => Type::Int,
                ast::Number::Float(_) => Type::Float,
                ast::Number::Complex { .. } => {
                    return Err(CompileError::type_err("complex number literals are not supported", expr.range()));
                }
            },
            Expr::StringLiteral(_) => Type::Str,
            Expr::BooleanLiteral(_) => Type::Bool,
            Expr::Name(name) => self.lookup_name_type(name)?,
            Expr::BinOp(b) => self.visit_binop(b)?,
            Expr::BoolOp(b) => self.visit_boolop(b)?,
            Expr::UnaryOp(u) => self.visit_unaryop(u)?,
            Expr::Compare(c) => self.visit_compare(c)?,
            Expr::Call(call) => self.visit_call(call)?,
            Expr::Attribute(attr) => self.visit_attribute(attr)?,
            Expr::Subscript(sub) => self.visit_subscript(sub)?,
            other => return Err(CompileError::type_err("unsupported expression", other.range())),
        };
        self.annotations.record(expr, ty.clone());
        Ok(ty)
    }

    fn lookup_name_type(&self, name: &ast::ExprName) -> Result<Type, CompileError> {
        let symbol =
            self.scopes.lookup(name.id.as_str()).ok_or_else(|| CompileError::name(format!("'{}' not declared", name.id), name.range()))?;
        symbol.expr_type().ok_or_else(|| CompileError::type_err(format!("'{}' cannot be used as a value", name.id), name.range()))
    }

    fn visit_binop(&mut self, b: &ast::ExprBinOp) -> Result<Type, CompileError> {
        let left = self.visit_expr(&b.left)?;
        let right = self.visit_expr(&b.right)?;
        match (left.without_final(), right.without_final()) {
            (Type::Int, Type::Int) => Ok(Type::Int),
            (Type::Int | Type::Float, Type::Int | Type::Float) => Ok(Type::Float),
            _ => Err(CompileError::type_err(format!("unsupported operand types for binary operator: {left} and {right}"), b.range())),
        }
    }

    fn visit_boolop(&mut self, b: &ast::ExprBoolOp) -> Result<Type, CompileError> {
        for value in &b.values {
            let ty = self.visit_expr(value)?;
            if !matches!(ty.without_final(), Type::Bool) {
                return Err(CompileError::type_err(format!("boolean operator operands must be bool, got {ty}"), value.range()));
            }
        }
        Ok(Type::Bool)
    }

    fn visit_unaryop(&mut self, u: &ast::ExprUnaryOp) -> Result<Type, CompileError> {
        let operand = self.visit_expr(&u.operand)?;
        match u.op {
            ast::UnaryOp::Not => {
                if !matches!(operand.without_final(), Type::Bool) {
                    return Err(CompileError::type_err(format!("'not' requires a bool operand, got {operand}"), u.range()));
                }
                Ok(Type::Bool)
            }
            ast::UnaryOp::UAdd | ast::UnaryOp::USub => match operand.without_final() {
                Type::Int => Ok(Type::Int),
                Type::Float => Ok(Type::Float),
                other => Err(CompileError::type_err(format!("unary +/- requires a numeric operand, got {other}"), u.range())),
            },
            ast::UnaryOp::Invert => Err(CompileError::type_err("bitwise '~' is not supported", u.range())),
        }
    }

    fn visit_compare(&mut self, c: &ast::ExprCompare) -> Result<Type, CompileError> {
        let mut left_ty = self.visit_expr(&c.left)?;
        for (op, comparator) in c.ops.iter().zip(c.comparators.iter()) {
            let right_ty = self.visit_expr(comparator)?;
            self.check_comparison(&left_ty, &right_ty, *op, comparator.range())?;
            left_ty = right_ty;
        }
        Ok(Type::Bool)
    }

    fn check_comparison(&self, left: &Type, right: &Type, op: ast::CmpOp, span: TextRange) -> Result<(), CompileError> {
        let (left_enum, right_enum) = (self.enum_name(left), self.enum_name(right));
        if left_enum.is_some() || right_enum.is_some() {
            if left_enum != right_enum {
                return Err(CompileError::type_err(format!("cannot compare enum {left} with {right}"), span));
            }
            if !matches!(op, ast::CmpOp::Eq | ast::CmpOp::NotEq) {
                return Err(CompileError::type_err("enums may only be compared with '==' or '!='", span));
            }
        }
        Ok(())
    }

    fn enum_name<'a>(&self, ty: &'a Type) -> Option<&'a str> {
        match ty.without_final() {
            Type::Named(name) => match self.scopes.lookup(name).map(|s| &s.kind) {
                Some(SymbolKind::Enum { .. }) => Some(name.as_str()),
                _ => None,
            },
            _ => None,
        }
    }

    fn visit_attribute(&mut self, attr: &ast::ExprAttribute) -> Result<Type, CompileError> {
        if let Expr::Name(base_name) = attr.value.as_ref() {
            let symbol = self
                .scopes
                .lookup(base_name.id.as_str())
                .ok_or_else(|| CompileError::name(format!("'{}' not declared", base_name.id), base_name.range()))?
                .clone();
            match &symbol.kind {
                SymbolKind::Module { exports } => {
                    let member = exports.get(attr.attr.as_str()).ok_or_else(|| {
                        CompileError::name(format!("module '{}' has no member '{}'", base_name.id, attr.attr), attr.range())
                    })?;
                    return member
                        .expr_type()
                        .ok_or_else(|| CompileError::type_err(format!("'{}' cannot be used as a value", attr.attr), attr.range()));
                }
                SymbolKind::Enum { members } => {
                    if !members.contains_key(attr.attr.as_str()) {
                        return Err(CompileError::name(format!("enum '{}' has no member '{}'", base_name.id, attr.attr), attr.range()));
                    }
                    return Ok(Type::Named(base_name.id.to_string()));
                }
                SymbolKind::Struct { .. } => return self.lookup_field(&symbol, attr.attr.as_str(), attr.range()),
                _ => {
                    let object_ty = symbol
                        .expr_type()
                        .ok_or_else(|| CompileError::type_err(format!("'{}' has no attributes", base_name.id), attr.range()))?;
                    return self.lookup_field_by_type(&object_ty, attr.attr.as_str(), attr.range());
                }
            }
        }
        let object_ty = self.visit_expr(&attr.value)?;
        self.lookup_field_by_type(&object_ty, attr.attr.as_str(), attr.range())
    }

    fn lookup_field_by_type(&self, object_ty: &Type, field: &str, span: TextRange) -> Result<Type, CompileError> {
        let Type::Named(struct_name) = object_ty.without_final() else {
            return Err(CompileError::type_err(format!("'{object_ty}' is not a struct and has no attributes"), span));
        };
        let symbol = self
            .scopes
            .lookup(struct_name)
            .ok_or_else(|| CompileError::name(format!("type '{struct_name}' not defined"), span))?
            .clone();
        self.lookup_field(&symbol, field, span)
    }

    fn lookup_field(&self, symbol: &Symbol, field: &str, span: TextRange) -> Result<Type, CompileError> {
        let SymbolKind::Struct { fields, .. } = &symbol.kind else {
            return Err(CompileError::type_err(format!("'{}' is not a struct and has no attributes", symbol.name), span));
        };
        fields.get(field).cloned().ok_or_else(|| CompileError::name(format!("struct '{}' has no field '{field}'", symbol.name), span))
    }

    fn visit_subscript(&mut self, sub: &ast::ExprSubscript) -> Result<Type, CompileError> {
        let base_ty = self.visit_expr(&sub.value)?;
        let Type::Array(elem, _) = base_ty.without_final() else {
            return Err(CompileError::type_err(format!("'{base_ty}' is not an array and cannot be subscripted"), sub.range()));
        };
        let index_ty = self.visit_expr(&sub.slice)?;
        if !matches!(index_ty.without_final(), Type::Int) {
            return Err(CompileError::type_err(format!("array index must be an integer, got {index_ty}"), sub.slice.range()));
        }
        Ok(elem.as_ref().clone())
    }

    fn visit_call(&mut self, call: &ast::ExprCall) -> Result<Type, CompileError> {
        match call.func.as_ref() {
            Expr::Name(name) => self.visit_name_call(name, call),
            Expr::Attribute(attr) => self.visit_method_call(attr, call),
            other => Err(CompileError::syntax("only direct function calls and method calls are supported", other.range())),
        }
    }

    fn visit_name_call(&mut self, name: &ast::ExprName, call: &ast::ExprCall) -> Result<Type, CompileError> {
        let args = &call.arguments.args;
        match name.id.as_str() {
            "print" => {
                for arg in args {
                    self.visit_expr(arg)?;
                }
                Ok(Type::Void)
            }
            "int" | "float" | "str" | "bool" => {
                require_arg_count(args, 1, &name.id, call.range())?;
                self.visit_expr(&args[0])?;
                Ok(Type::from_bare_name(name.id.as_str()))
            }
            "range" => {
                require_arg_count(args, 1, "range", call.range())?;
                let ty = self.visit_expr(&args[0])?;
                if !matches!(ty.without_final(), Type::Int) {
                    return Err(CompileError::type_err("range() expects a single integer argument", call.range()));
                }
                Ok(Type::Range)
            }
            "addr" => {
                require_arg_count(args, 1, "addr", call.range())?;
                let Expr::Name(target) = &args[0] else {
                    return Err(CompileError::type_err("addr() expects a single variable name as an argument", call.range()));
                };
                let ty = self.lookup_name_type(target)?;
                Ok(Type::Ptr(Box::new(ty)))
            }
            "deref" => {
                require_arg_count(args, 1, "deref", call.range())?;
                let ptr_ty = self.visit_expr(&args[0])?;
                match ptr_ty.without_final() {
                    Type::Ptr(inner) => Ok(inner.as_ref().clone()),
                    other => Err(CompileError::type_err(format!("cannot dereference non-pointer type {other}"), call.range())),
                }
            }
            "assign" => {
                require_arg_count(args, 2, "assign", call.range())?;
                let ptr_ty = self.visit_expr(&args[0])?;
                let inner = match ptr_ty.without_final() {
                    Type::Ptr(inner) => inner.as_ref().clone(),
                    other => return Err(CompileError::type_err(format!("first argument to assign() must be a pointer, got {other}"), call.range())),
                };
                let value_ty = self.visit_expr(&args[1])?;
                self.check_assignable(&inner, &value_ty, args[1].range())?;
                Ok(Type::Void)
            }
            "sizeof" => {
                require_arg_count(args, 1, "sizeof", call.range())?;
                match &args[0] {
                    Expr::StringLiteral(_) => Ok(Type::Int),
                    other => Err(CompileError::type_err("sizeof() expects a single string literal argument naming a type", other.range())),
                }
            }
            "malloc" => {
                require_arg_count(args, 1, "malloc", call.range())?;
                let ty = self.visit_expr(&args[0])?;
                if !matches!(ty.without_final(), Type::Int) {
                    return Err(CompileError::type_err(format!("argument to malloc() must be an integer, got {ty}"), call.range()));
                }
                Ok(Type::Ptr(Box::new(Type::Void)))
            }
            "free" => {
                require_arg_count(args, 1, "free", call.range())?;
                let ty = self.visit_expr(&args[0])?;
                if !ty.is_pointer() {
                    return Err(CompileError::type_err(format!("argument to free() must be a pointer, got {ty}"), call.range()));
                }
                Ok(Type::Void)
            }
            "Ok" | "Err" => {
                Err(CompileError::type_err(format!("{}() may only appear as a function's return expression", name.id), call.range()))
            }
            "is_ok" | "is_err" => {
                require_arg_count(args, 1, &name.id, call.range())?;
                let ty = self.visit_expr(&args[0])?;
                if !matches!(ty.without_final(), Type::Result(_, _)) {
                    return Err(CompileError::type_err(format!("{}() expects a Result argument, got {ty}", name.id), call.range()));
                }
                Ok(Type::Bool)
            }
            builtin if builtin.starts_with("unwrap_or_") => {
                require_arg_count(args, 2, builtin, call.range())?;
                let result_ty = self.visit_expr(&args[0])?;
                let ok_ty = expect_result_ok(&result_ty, call.range())?;
                let default_ty = self.visit_expr(&args[1])?;
                self.check_assignable(&ok_ty, &default_ty, args[1].range())?;
                Ok(ok_ty)
            }
            builtin if builtin.starts_with("unwrap_") => {
                require_arg_count(args, 1, builtin, call.range())?;
                let result_ty = self.visit_expr(&args[0])?;
                expect_result_ok(&result_ty, call.range())
            }
            builtin if builtin.starts_with("expect_") => {
                require_arg_count(args, 2, builtin, call.range())?;
                let result_ty = self.visit_expr(&args[0])?;
                let ok_ty = expect_result_ok(&result_ty, call.range())?;
                let message_ty = self.visit_expr(&args[1])?;
                if !matches!(message_ty.without_final(), Type::Str) {
                    return Err(CompileError::type_err(format!("second argument to {builtin}() must be a string, got {message_ty}"), call.range()));
                }
                Ok(ok_ty)
            }
            other => self.visit_user_call(other, args, call.range()),
        }
    }

    fn visit_user_call(&mut self, name: &str, args: &[Expr], span: TextRange) -> Result<Type, CompileError> {
        let symbol = self.scopes.lookup(name).cloned().ok_or_else(|| CompileError::name(format!("'{name}' not defined"), span))?;
        match symbol.kind {
            SymbolKind::Struct { .. } => {
                if !args.is_empty() {
                    return Err(CompileError::type_err(format!("struct constructor '{name}' expects no arguments, got {}", args.len()), span));
                }
                Ok(Type::Named(name.to_owned()))
            }
            SymbolKind::Function { params, ret, .. } => self.check_call_args(name, &params, ret, args, span),
            _ => Err(CompileError::name(format!("'{name}' is not a function"), span)),
        }
    }

    fn visit_method_call(&mut self, attr: &ast::ExprAttribute, call: &ast::ExprCall) -> Result<Type, CompileError> {
        let args = &call.arguments.args;
        if let Expr::Name(base_name) = attr.value.as_ref() {
            let symbol = self
                .scopes
                .lookup(base_name.id.as_str())
                .cloned()
                .ok_or_else(|| CompileError::name(format!("'{}' not declared", base_name.id), call.range()))?;
            if let SymbolKind::Module { exports } = &symbol.kind {
                let func = exports
                    .get(attr.attr.as_str())
                    .cloned()
                    .ok_or_else(|| CompileError::name(format!("module '{}' has no function '{}'", base_name.id, attr.attr), call.range()))?;
                let SymbolKind::Function { params, ret, .. } = func.kind else {
                    return Err(CompileError::type_err(
                        format!("'{}' in module '{}' is not a function", attr.attr, base_name.id),
                        call.range(),
                    ));
                };
                return self.check_call_args(&format!("{}.{}", base_name.id, attr.attr), &params, ret, args, call.range());
            }
            let object_ty = symbol.expr_type().ok_or_else(|| CompileError::type_err(format!("'{}' has no methods", base_name.id), call.range()))?;
            return self.check_method_call(&object_ty, attr.attr.as_str(), args, call.range());
        }
        let object_ty = self.visit_expr(&attr.value)?;
        self.check_method_call(&object_ty, attr.attr.as_str(), args, call.range())
    }

    fn check_method_call(&mut self, object_ty: &Type, method: &str, args: &[Expr], span: TextRange) -> Result<Type, CompileError> {
        let Type::Named(type_name) = object_ty.without_final() else {
            return Err(CompileError::type_err(format!("'{object_ty}' has no methods"), span));
        };
        let symbol = self.scopes.lookup(type_name).cloned().ok_or_else(|| CompileError::name(format!("type '{type_name}' not defined"), span))?;
        let methods = match symbol.kind {
            SymbolKind::Struct { methods, .. } => methods,
            SymbolKind::Interface { methods } => methods,
            _ => return Err(CompileError::type_err(format!("'{type_name}' has no methods"), span)),
        };
        let sig = methods.get(method).cloned().ok_or_else(|| CompileError::name(format!("type '{type_name}' has no method '{method}'"), span))?;
        self.check_call_args(method, &sig.params, sig.ret, args, span)
    }

    fn check_call_args(&mut self, name: &str, params: &[Type], ret: Type, args: &[Expr], span: TextRange) -> Result<Type, CompileError> {
        if args.len() != params.len() {
            return Err(CompileError::type_err(format!("'{name}' expects {} arguments, got {}", params.len(), args.len()), span));
        }
        for (i, (arg, expected)) in args.iter().zip(params.iter()).enumerate() {
            let actual = self.visit_expr(arg)?;
            if self.check_assignable(expected, &actual, arg.range()).is_err() {
                return Err(CompileError::type_err(
                    format!("argument {} of '{name}' has type {actual}, but expected {expected}", i + 1),
                    arg.range(),
                ));
            }
        }
        Ok(ret)
    }
}

fn parse_return_annotation(returns: Option<&Expr>) -> Result<Type, CompileError> {
    match returns {
        None => Ok(Type::Void),
        Some(expr) => Type::from_annotation(expr),
    }
}

pub(crate) fn match_arm_binding(pattern: &ast::Pattern) -> Option<(&str, Option<&str>)> {
    let ast::Pattern::MatchClass(class_pattern) = pattern else { return None };
    let Expr::Name(ctor) = class_pattern.cls.as_ref() else { return None };
    let binding = class_pattern.arguments.patterns.first().and_then(|p| match p {
        ast::Pattern::MatchAs(as_pattern) => as_pattern.name.as_ref().map(ast::Identifier::as_str),
        _ => None,
    });
    Some((ctor.id.as_str(), binding))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parse::parse_source;
    use crate::resolver::NoImports;

    fn analyze_ok(code: &str) -> AnalysisResult {
        let body = parse_source(code).unwrap();
        analyze(&body, "main.pyr", &mut NoImports).unwrap()
    }

    fn analyze_err(code: &str) -> CompileError {
        let body = parse_source(code).unwrap();
        analyze(&body, "main.pyr", &mut NoImports).unwrap_err()
    }

    #[test]
    fn simple_function_and_call_analyze_cleanly() {
        analyze_ok(
            "def add(a: int, b: int) -> int:\n    return a + b\n\ndef main() -> void:\n    x: int = add(1, 2)\n    print(x)\n",
        );
    }

    #[test]
    fn bool_widens_from_int_on_assignment() {
        analyze_ok("def main() -> void:\n    flag: bool = 1\n");
    }

    #[test]
    fn reassigning_a_final_variable_is_rejected() {
        let err = analyze_err("def main() -> void:\n    x: Final[int] = 1\n    x = 2\n");
        assert!(matches!(err, CompileError::Type { .. }));
    }

    #[test]
    fn return_type_mismatch_does_not_widen_bool_from_int() {
        let err = analyze_err("def f() -> bool:\n    return 1\n\ndef main() -> void:\n    pass\n");
        assert!(matches!(err, CompileError::Type { .. }));
    }

    #[test]
    fn break_outside_loop_is_a_syntax_error() {
        let err = analyze_err("def main() -> void:\n    break\n");
        assert!(matches!(err, CompileError::Syntax { .. }));
    }

    #[test]
    fn match_on_result_requires_both_arms() {
        let err = analyze_err(
            "def f() -> Result[int, str]:\n    return Ok(1)\n\ndef main() -> void:\n    match f():\n        case Ok(v):\n            print(v)\n",
        );
        assert!(matches!(err, CompileError::Syntax { .. }));
    }

    #[test]
    fn executable_module_without_main_is_rejected() {
        let body = parse_source("def helper() -> int:\n    return 1\n").unwrap();
        let err = analyze(&body, "main.pyr", &mut NoImports).unwrap_err();
        assert!(matches!(err, CompileError::Syntax { .. }));
    }

    #[test]
    fn library_module_is_exempt_from_the_main_requirement() {
        let body = parse_source("def helper() -> int:\n    return 1\n").unwrap();
        analyze(&body, "/project/modules/helpers.pyr", &mut NoImports).unwrap();
    }
}
