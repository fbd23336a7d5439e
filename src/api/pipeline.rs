//! The pass sequence shared by every entry point: build IR, check it, lay
//! it out. Emission happens later, once the caller has chosen a runtime.

use tracing::{debug, warn};

use super::CompileOptions;
use crate::ast::AstNode;
use crate::backend::elf::{build_elf, ElfOptions};
use crate::backend::{link, Image};
use crate::error::{CompileError, Result};
use crate::ir::builder::build_program;
use crate::ir::dump::dump_program;
use crate::ir::verify::verify_program;
use crate::ir::Program;
use crate::layout::{assign_code_offsets, check_frame, Layout};
use crate::runtime::{LinuxRuntime, Runtime};

/// A program with code offsets assigned, ready to emit.
#[derive(Debug, Clone)]
pub struct Compiled {
    pub program: Program,
    pub layout: Layout,
    pub options: CompileOptions,
}

impl Compiled {
    pub fn from_ast(ast: &AstNode, options: &CompileOptions) -> Result<Self> {
        let mut program = build_program(ast)?;
        if options.verify_cfg {
            verify_program(&program)?;
        }
        for func in &program.functions {
            check_frame(func)?;
        }
        let layout = assign_code_offsets(&mut program)?;
        if program.find_function(&options.entry).is_none() {
            warn!(entry = %options.entry, "program has no entry function");
        }
        debug!(
            functions = program.functions.len(),
            commands = program.command_count(),
            code_len = layout.code_len,
            "compiled"
        );
        Ok(Self {
            program,
            layout,
            options: options.clone(),
        })
    }

    /// Human-readable IR, with block offsets.
    pub fn ir_dump(&self) -> String {
        dump_program(&self.program)
    }

    /// Emit the code and append `runtime`'s routines.
    pub fn image(&self, runtime: &dyn Runtime, trace: bool) -> Result<Image> {
        link(&self.program, &self.layout, runtime, trace)
    }

    /// Flat code with the syscall routines, as laid out inside the ELF.
    pub fn raw(&self, trace: bool) -> Result<Image> {
        self.image(&LinuxRuntime, trace)
    }

    /// A standalone ELF64 executable entering at the configured function.
    pub fn executable(&self, trace: bool) -> Result<(Vec<u8>, Image)> {
        let entry = self
            .program
            .find_function(&self.options.entry)
            .ok_or_else(|| CompileError::UndefinedSymbol(self.options.entry.clone()))?;
        let arity = self.program.function(entry).arity();
        if arity != 0 {
            return Err(CompileError::ArityMismatch {
                name: self.options.entry.clone(),
                expected: 0,
                found: arity,
            });
        }
        let image = self.raw(trace)?;
        let elf = build_elf(
            &image,
            &ElfOptions {
                entry: self.options.entry.clone(),
                load_address: self.options.load_address,
                data_bytes: self.options.data_stack_bytes,
            },
        )?;
        Ok((elf, image))
    }

    /// Map the program into this process. `input` feeds `IN`.
    #[cfg(all(target_arch = "x86_64", target_os = "linux"))]
    pub fn jit(
        &self,
        input: impl IntoIterator<Item = i64>,
    ) -> Result<crate::backend::jit::JitSession> {
        crate::backend::jit::JitSession::with_data_stack(
            &self.program,
            &self.layout,
            input,
            self.options.data_stack_bytes as usize,
        )
    }
}
