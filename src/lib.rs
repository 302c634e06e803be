//! Crate root: wires together the compilation pipeline.
//!
//! The stages are small and composable so they can be evolved independently:
//! - `tokenizer` performs lexical analysis and produces a flat token stream.
//! - `parser` owns all syntactic knowledge and returns a typed AST, resolving
//!   names and laying out each function's frame as it goes.
//! - `ty` and `layout` hold the type algebra shared by parser and codegen.
//! - `codegen` lowers the program into Intel-syntax x86-64 assembly.
//! - `error` centralises reporting utilities shared by the other modules.

pub mod ast;
pub mod error;
pub mod layout;
pub mod parser;
pub mod tokenizer;
pub mod ty;

mod codegen;

pub use error::{CompileError, CompileResult};

/// Compile a source string into Intel-syntax assembly.
pub fn generate_assembly(source: &str) -> CompileResult<String> {
  let tokens = tokenizer::tokenize(source)?;
  let program = parser::parse(tokens, source)?;
  codegen::generate(&program, source)
}
