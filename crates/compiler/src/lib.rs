//! Mica compiler library
//!
//! Front end and back ends for the Mica language: a hand-written parser
//! producing a uniform labeled AST, a type environment with class layouts
//! and vtables, a control-flow-graph analyzer with Graphviz export, and an
//! s390x assembly code generator.
//!
//! The three CLI binaries (`mica-codegen`, `mica-cfg`, `mica-sem`) are thin
//! wrappers over this crate:
//!
//! ```rust
//! use micac::{parse_source, CodegenConfig, TypeEnv};
//!
//! let mut root = parse_source("int f(int x) { return x + 1; }", false).unwrap();
//! let env = TypeEnv::build(&root);
//! let asm = micac::codegen::generate(&mut root, &env, &CodegenConfig::default()).unwrap();
//! assert!(asm.contains("agr  %r2,%r3"));
//! ```

pub mod ast;
pub mod cfg;
pub mod codegen;
pub mod config;
pub mod dot;
pub mod parser;
pub mod types;

pub use ast::AstNode;
pub use cfg::{CfgError, CfgErrorKind, CfgProgram};
pub use codegen::{CodeGen, CodeGenError};
pub use config::CodegenConfig;
pub use parser::Parser;
pub use types::TypeEnv;

use std::fs;
use std::path::Path;

/// Parser rule tracing is enabled by setting the `PARSER_DEBUG`
/// environment variable (any value).
pub fn parser_trace_enabled() -> bool {
    std::env::var_os("PARSER_DEBUG").is_some()
}

/// Tolerate a UTF-8 BOM at the start of input files.
fn strip_bom(source: &str) -> &str {
    source.strip_prefix('\u{feff}').unwrap_or(source)
}

/// Parse a source string into its AST root.
pub fn parse_source(source: &str, trace: bool) -> Result<AstNode, String> {
    Parser::new(strip_bom(source))?.with_trace(trace).parse()
}

/// Read and parse one input file. The error string is ready for CLI
/// display and distinguishes open failures from syntax errors.
pub fn parse_file(path: &Path) -> Result<AstNode, String> {
    let source = fs::read_to_string(path)
        .map_err(|e| format!("cannot open input file '{}': {}", path.display(), e))?;
    parse_source(&source, parser_trace_enabled())
        .map_err(|e| format!("syntax errors in '{}': {}", path.display(), e))
}
