//! Pyrinas: an ahead-of-time compiler that lowers a statically-typed,
//! Python-syntax source language to portable C.
//!
//! The pipeline is four stages, one module each: [`parse`] hands source text
//! to the host parser, [`analyzer`] walks the resulting AST to build a symbol
//! table and an annotated side table of expression types, and [`codegen`]
//! lowers the analyzed module to C. [`resolver`] is the collaborator the
//! analyzer calls out to when it hits an `@module_import`/
//! `@module_from_import` decorator.

mod analyzer;
mod annotations;
mod codegen;
mod diagnostics;
mod parentage;
mod parse;
mod resolver;
mod scope;
mod symbol;
mod types;

pub use annotations::Annotations;
pub use codegen::{generate, CodegenOutput};
pub use diagnostics::CompileError;
pub use parse::parse_source;
pub use resolver::{FsModuleResolver, ModuleExports, ModuleResolver, NoImports};
pub use scope::ScopeStack;
pub use symbol::{Symbol, SymbolKind};
pub use types::{FunctionType, Type};

pub use analyzer::{analyze, AnalysisResult};

/// Runs the full pipeline over one file: parse, analyze, generate. `file_path`
/// is used both for diagnostics and to resolve relative imports against.
pub fn compile(source: &str, file_path: &str, resolver: &mut dyn ModuleResolver) -> Result<CodegenOutput, CompileError> {
    let body = parse_source(source)?;
    let analysis = analyze(&body, file_path, resolver)?;
    generate(&body, &analysis)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compiles_a_minimal_program_end_to_end() {
        let output = compile("def main() -> void:\n    print(1)\n", "main.pyr", &mut NoImports).unwrap();
        assert!(output.c_source.contains("int main"), "{}", output.c_source);
        assert!(output.c_source.contains("printf(\"%d\\n\", 1)"), "{}", output.c_source);
    }
}
