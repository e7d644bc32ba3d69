//! The code generator (§4.4): lowers an analyzed module straight to C,
//! reading types from the symbol table and the annotated AST rather than
//! re-deriving them. Grounded in `codegen.py`'s `CCodeGenerator`, redesigned
//! per §4.4.1a to emit one tagged struct (and helper functions) per distinct
//! `Result[T, E]` instantiation instead of a single shared union.

use std::collections::{BTreeSet, HashMap};

use indexmap::IndexMap;
use ruff_python_ast::{self as ast, Expr, Stmt};
use ruff_text_size::{Ranged, TextRange};

use crate::analyzer::{is_import_decorated, is_pass_only, match_arm_binding, AnalysisResult};
use crate::annotations::Annotations;
use crate::diagnostics::CompileError;
use crate::parentage::label_preceding;
use crate::scope::ScopeStack;
use crate::symbol::{Symbol, SymbolKind};
use crate::types::{FunctionType, Type};

pub struct CodegenOutput {
    pub c_source: String,
    pub link_libs: Vec<String>,
}

pub fn generate(body: &[Stmt], analysis: &AnalysisResult) -> Result<CodegenOutput, CompileError> {
    let mut generator = Generator {
        symbols: &analysis.symbols,
        annotations: &analysis.annotations,
        includes: analysis.includes.iter().cloned().collect(),
        result_instantiations: IndexMap::new(),
        struct_defs: Vec::new(),
        function_defs: Vec::new(),
        globals: Vec::new(),
        print_types: HashMap::new(),
        current_return: None,
    };
    generator.generate_module(body)?;
    Ok(CodegenOutput { c_source: generator.assemble(), link_libs: analysis.link_libs.clone() })
}

struct Generator<'a> {
    symbols: &'a ScopeStack,
    annotations: &'a Annotations,
    includes: BTreeSet<String>,
    /// Mangled Result instantiation name -> its (Ok, Err) component types,
    /// in first-encountered order; emitted ahead of struct definitions.
    result_instantiations: IndexMap<String, (Type, Type)>,
    struct_defs: Vec<String>,
    function_defs: Vec<String>,
    globals: Vec<String>,
    /// Local-variable type map, reset at the start of each function (§4.4.4):
    /// scoped per function rather than shared across the whole module.
    print_types: HashMap<String, Type>,
    current_return: Option<Type>,
}

impl Generator<'_> {
    // ---- module assembly -------------------------------------------------------

    // Three passes, matching the original's `visit_Module` ordering: struct
    // and enum definitions, then every function but `main`, then `main`
    // itself last, so `main` can call anything defined above it in C.
    fn generate_module(&mut self, body: &[Stmt]) -> Result<(), CompileError> {
        for stmt in body {
            match stmt {
                Stmt::ClassDef(c) => self.generate_class(c)?,
                Stmt::AnnAssign(a) => self.generate_global(a)?,
                Stmt::FunctionDef(_) | Stmt::Pass(_) => {}
                other => return Err(CompileError::syntax("unsupported top-level statement for code generation", other.range())),
            }
        }
        for stmt in body {
            if let Stmt::FunctionDef(f) = stmt {
                if !is_import_decorated(f) && f.name.as_str() != "main" {
                    self.generate_function(f)?;
                }
            }
        }
        for stmt in body {
            if let Stmt::FunctionDef(f) = stmt {
                if f.name.as_str() == "main" {
                    self.generate_main(f)?;
                }
            }
        }
        Ok(())
    }

    fn assemble(&mut self) -> String {
        let mut out = String::new();
        out.push_str("#include \"pyrinas.h\"\n");
        for include in self.includes.clone() {
            out.push_str(&format!("#include <{include}>\n"));
        }
        out.push('\n');

        let result_defs = self.emit_all_result_instantiations();
        if !result_defs.is_empty() {
            out.push_str(&result_defs);
            out.push('\n');
        }

        if !self.struct_defs.is_empty() {
            out.push_str(&self.struct_defs.join("\n"));
            out.push('\n');
        }

        if !self.globals.is_empty() {
            out.push_str(&self.globals.join(""));
            out.push('\n');
        }

        if !self.function_defs.is_empty() {
            out.push_str(&self.function_defs.join("\n"));
        }

        out
    }

    fn emit_all_result_instantiations(&mut self) -> String {
        let mut out = String::new();
        let mut i = 0;
        while i < self.result_instantiations.len() {
            let (name, (ok, err)) = {
                let (name, (ok, err)) = self.result_instantiations.get_index(i).expect("index in range");
                (name.clone(), (ok.clone(), err.clone()))
            };
            let ok_c = self.c_type(&ok);
            let err_c = self.c_type(&err);
            out.push_str(&render_result_instantiation(&name, &ok_c, &err_c));
            i += 1;
        }
        out
    }

    // ---- types -------------------------------------------------------------------

    /// Lowers a Pyrinas type to C, registering any `Result[...]` instantiation
    /// reached along the way. Arrays decay to pointers here; the local-array
    /// declaration special case is handled separately by `local_declaration`.
    fn c_type(&mut self, ty: &Type) -> String {
        match ty.without_final() {
            Type::Int => "int".to_owned(),
            Type::Float => "float".to_owned(),
            Type::Bool => "int".to_owned(),
            Type::Str => "char*".to_owned(),
            Type::Void => "void".to_owned(),
            Type::Ptr(inner) => format!("{}*", self.c_type(inner)),
            Type::Array(inner, _) => format!("{}*", self.c_type(inner)),
            Type::Result(ok, err) => {
                let ok = ok.as_ref().clone();
                let err = err.as_ref().clone();
                self.result_struct_name(&ok, &err)
            }
            Type::Named(name) => match self.symbols.global_scope().get(name.as_str()).map(|s| &s.kind) {
                Some(SymbolKind::Enum { .. }) => format!("enum {name}"),
                // Matches the original's backward-compatibility fallback: an
                // unresolved named type is assumed to be a struct.
                _ => format!("struct {name}"),
            },
            Type::Module | Type::Function(_) | Type::Range | Type::Final(_) => {
                unreachable!("not a lowerable value type")
            }
        }
    }

    fn result_struct_name(&mut self, ok: &Type, err: &Type) -> String {
        let name = format!("Result_{}_{}", ok.mangled(), err.mangled());
        self.result_instantiations.entry(name.clone()).or_insert_with(|| (ok.clone(), err.clone()));
        name
    }

    /// A local (or global) variable's declaration text. `array[T, N]`
    /// declares a fixed-size C array in place rather than decaying to a
    /// pointer, matching the original's `visit_AnnAssign` special case.
    fn local_declaration(&mut self, ty: &Type, name: &str) -> String {
        match ty.without_final() {
            Type::Array(inner, size) => {
                let inner = inner.as_ref().clone();
                format!("{} {name}[{size}]", self.c_type(&inner))
            }
            other => {
                let other = other.clone();
                format!("{} {name}", self.c_type(&other))
            }
        }
    }

    fn type_of_expr(&self, expr: &Expr) -> Option<Type> {
        if let Expr::Name(name) = expr {
            if let Some(ty) = self.print_types.get(name.id.as_str()) {
                return Some(ty.clone());
            }
        }
        self.annotations.type_of(expr).cloned()
    }

    // ---- declarations -------------------------------------------------------------

    fn generate_class(&mut self, c: &ast::StmtClassDef) -> Result<(), CompileError> {
        let Some(symbol) = self.symbols.global_scope().get(c.name.as_str()).cloned() else {
            return Ok(());
        };
        match symbol.kind {
            SymbolKind::Enum { members } => {
                let mut lines = format!("enum {} {{\n", c.name);
                let count = members.len();
                for (i, (name, value)) in members.iter().enumerate() {
                    let comma = if i + 1 < count { "," } else { "" };
                    lines.push_str(&format!("    {}_{name} = {value}{comma}\n", c.name));
                }
                lines.push_str("};\n");
                self.struct_defs.push(lines);
            }
            SymbolKind::Struct { fields, methods, .. } => {
                let mut lines = format!("struct {} {{\n", c.name);
                for (name, ty) in &fields {
                    let ty = ty.clone();
                    lines.push_str(&format!("    {} {name};\n", self.c_type(&ty)));
                }
                lines.push_str("};\n");
                self.struct_defs.push(lines);

                for item in &c.body {
                    if let Stmt::FunctionDef(m) = item {
                        if !is_pass_only(&m.body) {
                            self.generate_method(c.name.as_str(), m, &methods)?;
                        }
                    }
                }
            }
            SymbolKind::Interface { .. } | SymbolKind::Variable { .. } | SymbolKind::Function { .. } | SymbolKind::Module { .. } => {}
        }
        Ok(())
    }

    fn generate_method(
        &mut self,
        struct_name: &str,
        m: &ast::StmtFunctionDef,
        methods: &IndexMap<String, FunctionType>,
    ) -> Result<(), CompileError> {
        let sig = methods.get(m.name.as_str()).cloned().unwrap_or(FunctionType { params: vec![], ret: Type::Void, c_interop: false });
        let mangled = format!("{struct_name}_{}", m.name);
        let ret_c = self.c_type(&sig.ret);

        self.print_types.clear();
        self.print_types.insert("self".to_owned(), Type::Ptr(Box::new(Type::Named(struct_name.to_owned()))));

        let mut params_c = vec![format!("struct {struct_name}* self")];
        for (param, ty) in m.parameters.args.iter().skip(1).zip(sig.params.iter()) {
            let param_name = param.parameter.name.as_str();
            params_c.push(format!("{} {param_name}", self.c_type(ty)));
            self.print_types.insert(param_name.to_owned(), ty.clone());
        }

        let previous_return = self.current_return.replace(sig.ret.clone());
        let body = self.generate_block(&m.body, 1)?;
        self.current_return = previous_return;

        self.function_defs.push(format!("{ret_c} {mangled}({}) {{\n{body}}}\n", params_c.join(", ")));
        Ok(())
    }

    fn generate_function(&mut self, f: &ast::StmtFunctionDef) -> Result<(), CompileError> {
        let Some(Symbol { kind: SymbolKind::Function { params, ret, c_interop, .. }, .. }) =
            self.symbols.global_scope().get(f.name.as_str()).cloned()
        else {
            return Ok(());
        };

        // A @c_function whose body is pass-only is a bare external
        // declaration: it carries no C of its own, it is only linked against.
        if c_interop && is_pass_only(&f.body) {
            return Ok(());
        }

        let ret_c = self.c_type(&ret);
        self.print_types.clear();
        let mut params_c = Vec::new();
        for (param, ty) in f.parameters.args.iter().zip(params.iter()) {
            let param_name = param.parameter.name.as_str();
            params_c.push(format!("{} {param_name}", self.c_type(ty)));
            self.print_types.insert(param_name.to_owned(), ty.clone());
        }

        let previous_return = self.current_return.replace(ret.clone());
        let body = self.generate_block(&f.body, 1)?;
        self.current_return = previous_return;

        self.function_defs.push(format!("{ret_c} {}({}) {{\n{body}}}\n", f.name, params_c.join(", ")));
        Ok(())
    }

    /// The C entry point is always `int main() { … }` (§4.4), regardless of
    /// the declared Pyrinas return annotation on `main`, which is `void` by
    /// convention; falling off the end without a `return` is a defined
    /// zero exit per C99, so no synthetic `return 0;` is needed.
    fn generate_main(&mut self, f: &ast::StmtFunctionDef) -> Result<(), CompileError> {
        self.print_types.clear();
        let previous_return = self.current_return.replace(Type::Void);
        let body = self.generate_block(&f.body, 1)?;
        self.current_return = previous_return;
        self.function_defs.push(format!("int main() {{\n{body}}}\n"));
        Ok(())
    }

    fn generate_global(&mut self, a: &ast::StmtAnnAssign) -> Result<(), CompileError> {
        let Expr::Name(target) = a.target.as_ref() else {
            return Err(CompileError::syntax("global declarations must be simple names", a.range()));
        };
        let ty = Type::from_annotation(&a.annotation)?;
        let decl = self.local_declaration(&ty, target.id.as_str());
        match &a.value {
            Some(value) => {
                let value_c = self.lower_expr(value)?;
                self.globals.push(format!("{decl} = {value_c};\n"));
            }
            None => self.globals.push(format!("{decl};\n")),
        }
        Ok(())
    }

    // ---- statements -----------------------------------------------------------

    fn generate_block(&mut self, body: &[Stmt], indent: usize) -> Result<String, CompileError> {
        let mut out = String::new();
        for (index, stmt) in body.iter().enumerate() {
            out.push_str(&self.generate_stmt(body, index, stmt, indent)?);
        }
        Ok(out)
    }

    fn generate_stmt(&mut self, body: &[Stmt], index: usize, stmt: &Stmt, indent: usize) -> Result<String, CompileError> {
        let pad = "    ".repeat(indent);
        match stmt {
            Stmt::Expr(e) => {
                if matches!(e.value.as_ref(), Expr::StringLiteral(_)) {
                    // A bare string-literal statement is a label, not code.
                    return Ok(String::new());
                }
                let code = self.lower_expr(&e.value)?;
                Ok(format!("{pad}{code};\n"))
            }
            Stmt::Pass(_) => Ok(String::new()),
            Stmt::AnnAssign(a) => self.generate_ann_assign(a, indent),
            Stmt::Assign(a) => self.generate_assign(a, indent),
            Stmt::Return(r) => self.generate_return(r, indent),
            Stmt::If(i) => self.generate_if(i, indent),
            Stmt::While(w) => self.generate_while(w, body, index, indent),
            Stmt::For(f) => self.generate_for(f, body, index, indent),
            Stmt::Break(_) => self.generate_break(body, index, indent),
            Stmt::Continue(_) => self.generate_continue(body, index, indent),
            Stmt::Match(m) => self.generate_match(m, indent),
            other => Err(CompileError::syntax("unsupported statement for code generation", other.range())),
        }
    }

    fn generate_ann_assign(&mut self, a: &ast::StmtAnnAssign, indent: usize) -> Result<String, CompileError> {
        let Expr::Name(target) = a.target.as_ref() else {
            return Err(CompileError::syntax("annotated assignment target must be a name", a.range()));
        };
        let ty = Type::from_annotation(&a.annotation)?;
        self.print_types.insert(target.id.to_string(), ty.clone());
        let pad = "    ".repeat(indent);
        let decl = self.local_declaration(&ty, target.id.as_str());
        match &a.value {
            Some(value) => {
                let value_c = self.lower_expr(value)?;
                Ok(format!("{pad}{decl} = {value_c};\n"))
            }
            None => Ok(format!("{pad}{decl};\n")),
        }
    }

    fn generate_assign(&mut self, a: &ast::StmtAssign, indent: usize) -> Result<String, CompileError> {
        let pad = "    ".repeat(indent);
        let value_c = self.lower_expr(&a.value)?;
        let mut out = String::new();
        for target in &a.targets {
            let target_c = self.lower_expr(target)?;
            out.push_str(&format!("{pad}{target_c} = {value_c};\n"));
        }
        Ok(out)
    }

    fn generate_return(&mut self, r: &ast::StmtReturn, indent: usize) -> Result<String, CompileError> {
        let pad = "    ".repeat(indent);
        let Some(value) = &r.value else {
            return Ok(format!("{pad}return;\n"));
        };

        if let Expr::Call(call) = value.as_ref() {
            if let Expr::Name(ctor) = call.func.as_ref() {
                if matches!(ctor.id.as_str(), "Ok" | "Err") {
                    let ret_ty =
                        self.current_return.clone().ok_or_else(|| CompileError::syntax("'return' outside of a function", r.range()))?;
                    let Type::Result(ok, err) = ret_ty.without_final().clone() else {
                        return Err(CompileError::type_err("Ok/Err return outside a Result-returning function", value.range()));
                    };
                    let struct_name = self.result_struct_name(&ok, &err);
                    let inner_c = self.lower_expr(&call.arguments.args[0])?;
                    let ctor_fn = if ctor.id.as_str() == "Ok" { "ok" } else { "err" };
                    return Ok(format!("{pad}return {struct_name}_{ctor_fn}({inner_c});\n"));
                }
            }
        }

        let value_c = self.lower_expr(value)?;
        Ok(format!("{pad}return {value_c};\n"))
    }

    fn generate_if(&mut self, i: &ast::StmtIf, indent: usize) -> Result<String, CompileError> {
        let pad = "    ".repeat(indent);
        let cond = self.lower_expr(&i.test)?;
        let body = self.generate_block(&i.body, indent + 1)?;
        let mut out = format!("{pad}if ({cond}) {{\n{body}{pad}}}\n");
        for clause in &i.elif_else_clauses {
            let clause_body = self.generate_block(&clause.body, indent + 1)?;
            match &clause.test {
                Some(test) => {
                    let test_c = self.lower_expr(test)?;
                    out.push_str(&format!("{pad}else if ({test_c}) {{\n{clause_body}{pad}}}\n"));
                }
                None => out.push_str(&format!("{pad}else {{\n{clause_body}{pad}}}\n")),
            }
        }
        Ok(out)
    }

    // A labeled loop emits `<label>:` before itself, `<label>_continue:;` as
    // the last statement in its body, and `<label>_break:;` right after it,
    // so a labeled break/continue nested inside another loop can reach an
    // outer loop that C's bare `break`/`continue` cannot address. Unlabeled
    // loops skip all three; the analyzer has already confirmed any label a
    // `break`/`continue` names resolves to an enclosing loop, so codegen
    // trusts the label text without re-checking it against a stack.
    fn generate_while(&mut self, w: &ast::StmtWhile, body: &[Stmt], index: usize, indent: usize) -> Result<String, CompileError> {
        let cond = self.lower_expr(&w.test)?;
        let label = label_preceding(body, index);
        let inner = self.generate_block(&w.body, indent + 1)?;
        let pad = "    ".repeat(indent);
        let mut out = String::new();
        if let Some(label) = label {
            out.push_str(&format!("{pad}{label}:\n"));
        }
        out.push_str(&format!("{pad}while ({cond}) {{\n{inner}"));
        if let Some(label) = label {
            out.push_str(&format!("{pad}    {label}_continue:;\n"));
        }
        out.push_str(&format!("{pad}}}\n"));
        if let Some(label) = label {
            out.push_str(&format!("{pad}{label}_break:;\n"));
        }
        Ok(out)
    }

    fn generate_for(&mut self, f: &ast::StmtFor, body: &[Stmt], index: usize, indent: usize) -> Result<String, CompileError> {
        let Expr::Name(target) = f.target.as_ref() else {
            return Err(CompileError::syntax("for-loop target must be a simple name", f.target.range()));
        };
        let Expr::Call(call) = f.iter.as_ref() else {
            return Err(CompileError::syntax("for-loop iterable must be range(n)", f.iter.range()));
        };
        let bound = self.lower_expr(&call.arguments.args[0])?;
        let var = target.id.as_str();
        self.print_types.insert(var.to_owned(), Type::Int);

        let label = label_preceding(body, index);
        let inner = self.generate_block(&f.body, indent + 1)?;
        let pad = "    ".repeat(indent);
        let mut out = String::new();
        if let Some(label) = label {
            out.push_str(&format!("{pad}{label}:\n"));
        }
        out.push_str(&format!("{pad}for (int {var} = 0; {var} < {bound}; {var}++) {{\n{inner}"));
        if let Some(label) = label {
            out.push_str(&format!("{pad}    {label}_continue:;\n"));
        }
        out.push_str(&format!("{pad}}}\n"));
        if let Some(label) = label {
            out.push_str(&format!("{pad}{label}_break:;\n"));
        }
        Ok(out)
    }

    fn generate_break(&self, body: &[Stmt], index: usize, indent: usize) -> Result<String, CompileError> {
        let pad = "    ".repeat(indent);
        match label_preceding(body, index) {
            None => Ok(format!("{pad}break;\n")),
            Some(label) => Ok(format!("{pad}goto {label}_break;\n")),
        }
    }

    fn generate_continue(&self, body: &[Stmt], index: usize, indent: usize) -> Result<String, CompileError> {
        let pad = "    ".repeat(indent);
        match label_preceding(body, index) {
            None => Ok(format!("{pad}continue;\n")),
            Some(label) => Ok(format!("{pad}goto {label}_continue;\n")),
        }
    }

    fn generate_match(&mut self, m: &ast::StmtMatch, indent: usize) -> Result<String, CompileError> {
        let pad = "    ".repeat(indent);
        let subject_ty = self
            .type_of_expr(&m.subject)
            .ok_or_else(|| CompileError::type_err("match subject has no recorded type", m.subject.range()))?;
        let Type::Result(ok_ty, err_ty) = subject_ty.without_final().clone() else {
            return Err(CompileError::type_err("match on a non-Result subject", m.subject.range()));
        };
        let struct_name = self.result_struct_name(&ok_ty, &err_ty);
        let subject_c = self.lower_expr(&m.subject)?;

        let mut ok_code = String::new();
        let mut err_code = String::new();

        for case in &m.cases {
            let Some((ctor, binding)) = match_arm_binding(&case.pattern) else {
                return Err(CompileError::syntax("unsupported match pattern", case.range()));
            };
            let (bound_ty, field) = match ctor {
                "Ok" => (ok_ty.as_ref().clone(), "value.ok"),
                "Err" => (err_ty.as_ref().clone(), "value.err"),
                other => return Err(CompileError::syntax(format!("unsupported match pattern '{other}'"), case.range())),
            };

            let mut block = String::new();
            if let Some(name) = binding {
                self.print_types.insert(name.to_owned(), bound_ty.clone());
                let ty_c = self.c_type(&bound_ty);
                block.push_str(&format!("{pad}    {ty_c} {name} = pyr_match_subject.{field};\n"));
            }
            block.push_str(&self.generate_block(&case.body, indent + 1)?);

            if ctor == "Ok" {
                ok_code = block;
            } else {
                err_code = block;
            }
        }

        Ok(format!(
            "{pad}{{\n{pad}    {struct_name} pyr_match_subject = {subject_c};\n\
             {pad}    if ({struct_name}_is_ok(pyr_match_subject)) {{\n{ok_code}{pad}    }} else {{\n{err_code}{pad}    }}\n{pad}}}\n"
        ))
    }

    // ---- expressions ------------------------------------------------------------

    fn lower_expr(&mut self, expr: &Expr) -> Result<String, CompileError> {
        match expr {
            Expr::NumberLiteral(lit) => match &lit.value {
                ast::Number::Int(i) => {
                    Ok(i.as_i64().map(|v| v.to_string()).ok_or_else(|| CompileError::type_err("integer literal out of range", expr.range()))?)
                }
                ast::Number::Float(f) => Ok(format!("{f}")),
                ast::Number::Complex { .. } => Err(CompileError::type_err("complex literals are not supported", expr.range())),
            },
            Expr::StringLiteral(lit) => Ok(format!("{:?}", lit.value.to_str())),
            Expr::BooleanLiteral(lit) => Ok(if lit.value { "1".to_owned() } else { "0".to_owned() }),
            Expr::Name(name) => Ok(name.id.to_string()),
            Expr::BinOp(b) => self.lower_binop(b),
            Expr::BoolOp(b) => self.lower_boolop(b),
            Expr::UnaryOp(u) => self.lower_unaryop(u),
            Expr::Compare(c) => self.lower_compare(c),
            Expr::Call(call) => self.lower_call(call),
            Expr::Attribute(attr) => self.lower_attribute(attr),
            Expr::Subscript(sub) => self.lower_subscript(sub),
            other => Err(CompileError::type_err("unsupported expression for code generation", other.range())),
        }
    }

    fn lower_binop(&mut self, b: &ast::ExprBinOp) -> Result<String, CompileError> {
        let left = self.lower_expr(&b.left)?;
        let right = self.lower_expr(&b.right)?;
        let op = match b.op {
            ast::Operator::Add => "+",
            ast::Operator::Sub => "-",
            ast::Operator::Mult => "*",
            ast::Operator::Div => "/",
            ast::Operator::Mod => "%",
            other => return Err(CompileError::type_err(format!("unsupported binary operator {other:?}"), b.range())),
        };
        Ok(format!("({left} {op} {right})"))
    }

    fn lower_boolop(&mut self, b: &ast::ExprBoolOp) -> Result<String, CompileError> {
        let op = match b.op {
            ast::BoolOp::And => " && ",
            ast::BoolOp::Or => " || ",
        };
        let mut parts = Vec::with_capacity(b.values.len());
        for value in &b.values {
            parts.push(self.lower_expr(value)?);
        }
        Ok(format!("({})", parts.join(op)))
    }

    fn lower_unaryop(&mut self, u: &ast::ExprUnaryOp) -> Result<String, CompileError> {
        let operand = self.lower_expr(&u.operand)?;
        let op = match u.op {
            ast::UnaryOp::Not => "!",
            ast::UnaryOp::USub => "-",
            ast::UnaryOp::UAdd => "+",
            ast::UnaryOp::Invert => return Err(CompileError::type_err("bitwise '~' is not supported", u.range())),
        };
        Ok(format!("({op}{operand})"))
    }

    fn lower_compare(&mut self, c: &ast::ExprCompare) -> Result<String, CompileError> {
        let mut left = self.lower_expr(&c.left)?;
        let mut parts = Vec::new();
        for (op, comparator) in c.ops.iter().zip(c.comparators.iter()) {
            let right = self.lower_expr(comparator)?;
            let op_c = match op {
                ast::CmpOp::Eq => "==",
                ast::CmpOp::NotEq => "!=",
                ast::CmpOp::Lt => "<",
                ast::CmpOp::LtE => "<=",
                ast::CmpOp::Gt => ">",
                ast::CmpOp::GtE => ">=",
                other => return Err(CompileError::type_err(format!("unsupported comparison operator {other:?}"), c.range())),
            };
            parts.push(format!("({left} {op_c} {right})"));
            left = right;
        }
        Ok(parts.join(" && "))
    }

    fn lower_attribute(&mut self, attr: &ast::ExprAttribute) -> Result<String, CompileError> {
        if let Expr::Name(base_name) = attr.value.as_ref() {
            match self.symbols.global_scope().get(base_name.id.as_str()).map(|s| &s.kind) {
                Some(SymbolKind::Enum { .. }) => return Ok(format!("{}_{}", base_name.id, attr.attr)),
                Some(SymbolKind::Module { .. }) => return Ok(attr.attr.to_string()),
                _ => {}
            }
        }
        let base_ty = self.type_of_expr(&attr.value);
        let base_c = self.lower_expr(&attr.value)?;
        let sep = if matches!(base_ty.as_ref().map(Type::without_final), Some(Type::Ptr(_))) { "->" } else { "." };
        Ok(format!("{base_c}{sep}{}", attr.attr))
    }

    fn lower_subscript(&mut self, sub: &ast::ExprSubscript) -> Result<String, CompileError> {
        let base = self.lower_expr(&sub.value)?;
        let index = self.lower_expr(&sub.slice)?;
        Ok(format!("{base}[{index}]"))
    }

    fn lower_call(&mut self, call: &ast::ExprCall) -> Result<String, CompileError> {
        match call.func.as_ref() {
            Expr::Name(name) => self.lower_name_call(name, call),
            Expr::Attribute(attr) => self.lower_method_call(attr, call),
            other => Err(CompileError::type_err("unsupported call form", other.range())),
        }
    }

    fn lower_name_call(&mut self, name: &ast::ExprName, call: &ast::ExprCall) -> Result<String, CompileError> {
        let args = &call.arguments.args;
        match name.id.as_str() {
            "print" => self.lower_print(args, call.range()),
            "int" => Ok(format!("(int)({})", self.lower_expr(&args[0])?)),
            "float" => Ok(format!("(float)({})", self.lower_expr(&args[0])?)),
            "bool" => Ok(format!("(({}) != 0)", self.lower_expr(&args[0])?)),
            "str" => Err(CompileError::type_err("str() conversion is not supported by the code generator", call.range())),
            "addr" => Ok(format!("(&{})", self.lower_expr(&args[0])?)),
            "deref" => Ok(format!("(*{})", self.lower_expr(&args[0])?)),
            "assign" => {
                let ptr = self.lower_expr(&args[0])?;
                let value = self.lower_expr(&args[1])?;
                Ok(format!("(*{ptr} = {value})"))
            }
            "sizeof" => {
                let Expr::StringLiteral(lit) = &args[0] else {
                    return Err(CompileError::type_err("sizeof() expects a string literal", call.range()));
                };
                let ty = Type::parse_composed(lit.value.to_str())?;
                let ty_c = self.c_type(&ty);
                Ok(format!("sizeof({ty_c})"))
            }
            "malloc" => Ok(format!("malloc({})", self.lower_expr(&args[0])?)),
            "free" => Ok(format!("free({})", self.lower_expr(&args[0])?)),
            "is_ok" | "is_err" => {
                let arg_ty = self
                    .type_of_expr(&args[0])
                    .ok_or_else(|| CompileError::type_err("could not resolve Result type for is_ok/is_err", call.range()))?;
                let Type::Result(ok, err) = arg_ty.without_final().clone() else {
                    return Err(CompileError::type_err("is_ok/is_err expects a Result argument", call.range()));
                };
                let struct_name = self.result_struct_name(&ok, &err);
                let arg_c = self.lower_expr(&args[0])?;
                let prefix = if name.id == "is_ok" { "is_ok" } else { "is_err" };
                Ok(format!("{struct_name}_{prefix}({arg_c})"))
            }
            builtin if builtin.starts_with("unwrap_or_") => self.lower_result_helper(args, call.range(), "unwrap_or"),
            builtin if builtin.starts_with("expect_") => self.lower_result_helper(args, call.range(), "expect"),
            builtin if builtin.starts_with("unwrap_") => self.lower_result_helper(args, call.range(), "unwrap"),
            other => self.lower_user_call(other, args),
        }
    }

    fn lower_result_helper(&mut self, args: &[Expr], span: TextRange, helper: &str) -> Result<String, CompileError> {
        let arg_ty = self.type_of_expr(&args[0]).ok_or_else(|| CompileError::type_err("could not resolve Result type", span))?;
        let Type::Result(ok, err) = arg_ty.without_final().clone() else {
            return Err(CompileError::type_err("expected a Result argument", span));
        };
        let struct_name = self.result_struct_name(&ok, &err);
        let mut call_args = vec![self.lower_expr(&args[0])?];
        for arg in &args[1..] {
            call_args.push(self.lower_expr(arg)?);
        }
        Ok(format!("{struct_name}_{helper}({})", call_args.join(", ")))
    }

    fn lower_print(&mut self, args: &[Expr], span: TextRange) -> Result<String, CompileError> {
        if args.len() != 1 {
            return Err(CompileError::type_err("print() expects exactly one argument", span));
        }
        let ty = self.type_of_expr(&args[0]).unwrap_or(Type::Str);
        let fmt = match ty.without_final() {
            Type::Int | Type::Bool => "%d",
            Type::Float => "%f",
            Type::Str => "%s",
            Type::Ptr(_) => "%p",
            other => return Err(CompileError::type_err(format!("print() does not support values of type {other}"), span)),
        };
        let arg_c = self.lower_expr(&args[0])?;
        Ok(format!("printf(\"{fmt}\\n\", {arg_c})"))
    }

    fn lower_user_call(&mut self, name: &str, args: &[Expr]) -> Result<String, CompileError> {
        if matches!(self.symbols.global_scope().get(name).map(|s| &s.kind), Some(SymbolKind::Struct { .. })) {
            return Ok("{0}".to_owned());
        }
        let mut rendered = Vec::with_capacity(args.len());
        for arg in args {
            rendered.push(self.lower_expr(arg)?);
        }
        Ok(format!("{name}({})", rendered.join(", ")))
    }

    fn lower_method_call(&mut self, attr: &ast::ExprAttribute, call: &ast::ExprCall) -> Result<String, CompileError> {
        let args = &call.arguments.args;
        if let Expr::Name(base_name) = attr.value.as_ref() {
            if let Some(SymbolKind::Module { .. }) = self.symbols.global_scope().get(base_name.id.as_str()).map(|s| &s.kind) {
                let mut rendered = Vec::with_capacity(args.len());
                for arg in args {
                    rendered.push(self.lower_expr(arg)?);
                }
                return Ok(format!("{}({})", attr.attr, rendered.join(", ")));
            }
        }

        let object_ty = self
            .type_of_expr(&attr.value)
            .ok_or_else(|| CompileError::type_err("could not resolve receiver type for method call", call.range()))?;
        let Type::Named(type_name) = object_ty.without_final().clone() else {
            return Err(CompileError::type_err("method call on a non-struct value", call.range()));
        };
        let receiver = self.lower_expr(&attr.value)?;
        let receiver_ptr = if matches!(object_ty.without_final(), Type::Ptr(_)) { receiver } else { format!("&{receiver}") };

        let mut call_args = vec![receiver_ptr];
        for arg in args {
            call_args.push(self.lower_expr(arg)?);
        }
        Ok(format!("{type_name}_{}({})", attr.attr, call_args.join(", ")))
    }
}

fn render_result_instantiation(name: &str, ok_c: &str, err_c: &str) -> String {
    format!(
        "typedef struct {{\n\
         \x20   enum {{ {name}_OK, {name}_ERR }} tag;\n\
         \x20   union {{ {ok_c} ok; {err_c} err; }} value;\n\
         }} {name};\n\
         \n\
         static {name} {name}_ok({ok_c} value) {{ {name} r; r.tag = {name}_OK; r.value.ok = value; return r; }}\n\
         static {name} {name}_err({err_c} value) {{ {name} r; r.tag = {name}_ERR; r.value.err = value; return r; }}\n\
         static int {name}_is_ok({name} r) {{ return r.tag == {name}_OK; }}\n\
         static int {name}_is_err({name} r) {{ return r.tag == {name}_ERR; }}\n\
         static {ok_c} {name}_unwrap({name} r) {{ return r.value.ok; }}\n\
         static {ok_c} {name}_unwrap_or({name} r, {ok_c} fallback) {{ return r.tag == {name}_OK ? r.value.ok : fallback; }}\n\
         static {ok_c} {name}_expect({name} r, const char* message) {{ if (r.tag != {name}_OK) {{ fprintf(stderr, \"%s\\n\", message); exit(1); }} return r.value.ok; }}\n"
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzer::analyze;
    use crate::parse::parse_source;
    use crate::resolver::NoImports;

    fn compile_to_c(code: &str) -> String {
        let body = parse_source(code).unwrap();
        let analysis = analyze(&body, "main.pyr", &mut NoImports).unwrap();
        generate(&body, &analysis).unwrap().c_source
    }

    #[test]
    fn emits_function_and_call() {
        let c = compile_to_c("def add(a: int, b: int) -> int:\n    return a + b\n\ndef main() -> void:\n    x: int = add(1, 2)\n    print(x)\n");
        assert!(c.contains("int add(int a, int b)"), "{c}");
        assert!(c.contains("int x = (add(1, 2));\n") || c.contains("int x = add(1, 2);\n"), "{c}");
        assert!(c.contains("printf(\"%d\\n\", x)"), "{c}");
    }

    #[test]
    fn result_instantiation_is_emitted_once_and_used_by_return() {
        let c = compile_to_c(
            "def parse(s: str) -> Result[int, str]:\n    return Ok(1)\n\ndef main() -> void:\n    r: Result[int, str] = parse(\"1\")\n",
        );
        assert!(c.contains("Result_int_str"), "{c}");
        assert!(c.contains("Result_int_str_ok(1)"), "{c}");
    }

    #[test]
    fn labeled_break_generates_goto_to_the_outer_loop() {
        let c = compile_to_c(
            "def main() -> void:\n    \"outer\"\n    while True:\n        while True:\n            \"outer\"\n            break\n",
        );
        assert!(c.contains("goto outer_break;"), "{c}");
    }

    #[test]
    fn struct_fields_and_method_lower_with_pointer_receiver() {
        let c = compile_to_c(
            "class Counter:\n    value: int\n\n    def bump(self) -> void:\n        self.value = self.value + 1\n\ndef main() -> void:\n    pass\n",
        );
        assert!(c.contains("struct Counter {"), "{c}");
        assert!(c.contains("void Counter_bump(struct Counter* self)"), "{c}");
        assert!(c.contains("self->value = (self->value + 1);"), "{c}");
    }
}
