//! Packaging and execution of emitted code.
//!
//! [`link`] turns a laid-out program into an [`Image`]: generated code
//! followed by the runtime routines and the data stack limit word. [`elf`] wraps an image into a
//! standalone executable; [`jit`] maps one into the current process.

pub mod elf;
#[cfg(all(target_arch = "x86_64", target_os = "linux"))]
pub mod jit;

use std::fmt;
use std::str::FromStr;

use crate::error::{CompileError, Result};
use crate::ir::Program;
use crate::layout::{Layout, SymbolTable};
use crate::runtime::{set_limit, Runtime};
use crate::x86::{emit_program, listing_text, RoutineOffsets};

/// Code and runtime routines, position independent: every internal
/// reference is relative.
#[derive(Debug, Clone)]
pub struct Image {
    pub bytes: Vec<u8>,
    pub symbols: SymbolTable,
    /// Length of the generated code; the routines follow.
    pub code_len: u32,
    pub routines: RoutineOffsets,
    /// Assembly listing, empty unless requested.
    pub trace: Vec<String>,
}

impl Image {
    pub fn code(&self) -> &[u8] {
        &self.bytes[..self.code_len as usize]
    }

    /// The assembly listing as newline-terminated text.
    pub fn trace_text(&self) -> String {
        listing_text(&self.trace)
    }

    /// Fill the limit word: the address one past the end of the data
    /// stack. A prologue that moves the frame base above it runs the
    /// overflow routine.
    pub fn set_data_limit(&mut self, limit: u64) {
        set_limit(&mut self.bytes, self.routines, limit);
    }
}

/// Emit `program` and append the routines of `runtime`.
pub fn link(
    program: &Program,
    layout: &Layout,
    runtime: &dyn Runtime,
    trace: bool,
) -> Result<Image> {
    let (routines, offsets) = runtime.link(layout.code_len);
    let code = emit_program(program, layout, offsets, trace)?;
    let mut bytes = code.bytes;
    bytes.extend_from_slice(&routines);
    Ok(Image {
        bytes,
        symbols: layout.symbols.clone(),
        code_len: layout.code_len,
        routines: offsets,
        trace: code.trace,
    })
}

/// Artifact written by the build command.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum OutputFormat {
    /// ELF64 executable.
    #[default]
    Elf,
    /// Flat machine code, as executed in-process.
    Raw,
}

impl FromStr for OutputFormat {
    type Err = CompileError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "elf" => Ok(OutputFormat::Elf),
            "raw" | "bin" => Ok(OutputFormat::Raw),
            other => Err(CompileError::Config(format!(
                "unknown output format `{}` (expected `elf` or `raw`)",
                other
            ))),
        }
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutputFormat::Elf => write!(f, "elf"),
            OutputFormat::Raw => write!(f, "raw"),
        }
    }
}
