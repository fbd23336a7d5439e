//! Library entry points.

pub mod pipeline;


use std::path::Path;

pub use pipeline::Compiled;

use crate::ast::eval::Interpreter;
use crate::ast::reader::{parse_ast, read_ast};
use crate::ast::AstNode;
use crate::backend::elf::{DEFAULT_DATA_BYTES, DEFAULT_LOAD_ADDRESS};
use crate::error::Result;

/// Options controlling compilation and packaging.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CompileOptions {
    /// Function the executable (or `--run`) starts at.
    pub entry: String,
    /// Bytes reserved for frames, in the executable and the JIT alike.
    pub data_stack_bytes: u64,
    /// Virtual address of the first instruction in the executable.
    pub load_address: u64,
    /// Run the control-flow verifier on the IR.
    pub verify_cfg: bool,
}

impl Default for CompileOptions {
    fn default() -> Self {
        Self {
            entry: "main".to_string(),
            data_stack_bytes: DEFAULT_DATA_BYTES,
            load_address: DEFAULT_LOAD_ADDRESS,
            verify_cfg: true,
        }
    }
}

/// Compile an AST with default options.
pub fn compile(ast: &AstNode) -> Result<Compiled> {
    Compiled::from_ast(ast, &CompileOptions::default())
}

pub fn compile_with_options(ast: &AstNode, options: &CompileOptions) -> Result<Compiled> {
    Compiled::from_ast(ast, options)
}

/// Compile serialized AST text.
pub fn compile_source(source: &str, options: &CompileOptions) -> Result<Compiled> {
    Compiled::from_ast(&parse_ast(source)?, options)
}

/// Compile an AST file. The source text is returned for diagnostics.
pub fn compile_file(path: &Path, options: &CompileOptions) -> Result<(String, Compiled)> {
    let (source, ast) = read_ast(path)?;
    let compiled = Compiled::from_ast(&ast, options)?;
    Ok((source, compiled))
}

/// Run `entry` of `ast` with the reference interpreter. Returns the result
/// and everything printed.
pub fn interpret(
    ast: &AstNode,
    entry: &str,
    args: &[i64],
    input: impl IntoIterator<Item = i64>,
) -> Result<(i64, Vec<i64>)> {
    let mut interp = Interpreter::new(ast)?.with_input(input);
    let value = interp.call(entry, args)?;
    Ok((value, interp.output().to_vec()))
}
