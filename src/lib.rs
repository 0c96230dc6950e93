//! A type-inferring compiler for a small dynamically-typed, indentation-
//! sensitive scripting language (see `SPEC_FULL.md`). The pipeline is
//! `ast::Stmt -> [semant] -> sast::SStmt -> [codegen] -> codegen::ir::Module`;
//! this crate owns everything from the annotated-AST stage onward (no
//! lexer/parser: `types::ast` is the external interface an out-of-scope
//! front end targets).

pub mod codegen;
pub mod env;
pub mod error;
pub mod idx;
pub mod intern;
pub mod semant;
pub mod types;

pub use codegen::{compile, compile_with, CompileOptions};
pub use error::CompileError;
