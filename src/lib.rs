//! `tacjit` lowers a binary-node AST to three-address IR and then to raw
//! x86-64 machine code, which it either packages as a minimal ELF64
//! executable or maps into the current process and runs.
//!
//! Pipeline: [`ast`] → [`ir::builder`] → [`layout`] → [`x86`] →
//! [`backend`] (with the print/scan routines from [`runtime`]).

pub mod api;
pub mod ast;
pub mod backend;
pub mod config;
pub mod diagnostic;
pub mod error;
pub mod ir;
pub mod layout;
pub mod runtime;
pub mod span;
pub mod x86;

pub use api::*;
pub use error::{CompileError, Result};
