//! IR → x86-64 machine code.
//!
//! Every command fills exactly one [`SLOT_SIZE`]-byte slot, so the byte
//! offsets computed by `layout::assign_code_offsets` hold by construction.
//! The emitter re-checks that at every block start and fails with
//! `LayoutMismatch` rather than writing a wrong displacement.

use tracing::debug;

use super::encode::CodeBuf;
use super::{Cond, Reg, SLOT_SIZE};
use crate::error::{CompileError, Result};
use crate::ir::dump::format_command;
use crate::ir::{BlockRef, Command, Function, Opcode, Operand, Program, Storage, VarId};
use crate::layout::{function_size, Layout};

/// Absolute offsets of the runtime routines in the final image, and of
/// the word holding the highest address the frame base may reach.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoutineOffsets {
    pub print: u32,
    pub scan: u32,
    pub overflow: u32,
    pub limit: u32,
}

impl RoutineOffsets {
    /// Print, scan and overflow routines appended right after the
    /// generated code in that order, followed by the limit word.
    pub fn after_code(code_len: u32, lens: [u32; 3]) -> Self {
        let [print_len, scan_len, overflow_len] = lens;
        let scan = code_len + print_len;
        let overflow = scan + scan_len;
        Self {
            print: code_len,
            scan,
            overflow,
            limit: overflow + overflow_len,
        }
    }
}

/// Emitted code plus the optional assembly listing.
#[derive(Debug, Clone)]
pub struct MachineCode {
    pub bytes: Vec<u8>,
    pub trace: Vec<String>,
}

/// Listing lines as one newline-terminated text.
pub fn listing_text(trace: &[String]) -> String {
    let mut text = trace.join("\n");
    text.push('\n');
    text
}

impl MachineCode {
    pub fn trace_text(&self) -> String {
        listing_text(&self.trace)
    }
}

/// Emit every function of `program` at the offsets recorded in `layout`.
pub fn emit_program(
    program: &Program,
    layout: &Layout,
    routines: RoutineOffsets,
    trace: bool,
) -> Result<MachineCode> {
    let mut emitter = Emitter {
        program,
        layout,
        routines,
        buf: CodeBuf::with_capacity(layout.code_len as usize, trace),
    };
    for func in &program.functions {
        emitter.function(func)?;
    }
    let (bytes, trace) = emitter.buf.into_parts();
    if bytes.len() != layout.code_len as usize {
        return Err(CompileError::LayoutMismatch {
            block: "<end>".to_string(),
            expected: layout.code_len as usize,
            actual: bytes.len(),
        });
    }
    Ok(MachineCode { bytes, trace })
}

struct Emitter<'a> {
    program: &'a Program,
    layout: &'a Layout,
    routines: RoutineOffsets,
    buf: CodeBuf,
}

impl<'a> Emitter<'a> {
    fn function(&mut self, func: &Function) -> Result<()> {
        let start = self.buf.len();
        let frame = func.frame_bytes();

        for (i, block) in func.blocks.iter().enumerate() {
            let expected = block.code_offset.ok_or_else(|| CompileError::LayoutMismatch {
                block: block.name.to_string(),
                expected: usize::MAX,
                actual: self.buf.len(),
            })? as usize;
            if expected != self.buf.len() {
                return Err(CompileError::LayoutMismatch {
                    block: block.name.to_string(),
                    expected,
                    actual: self.buf.len(),
                });
            }
            self.buf.annotate(|| format!("{}:", block.name));
            if i == 0 {
                self.buf.add_r9(frame);
                self.buf.cmp_r9_word(self.routines.limit);
                self.buf.ja(self.routines.overflow, "overflow");
            }
            for cmd in &block.commands {
                self.slot(func, cmd)?;
            }
        }

        self.buf.xor_eax_eax();
        self.buf.sub_r9(frame);
        self.buf.ret();

        debug!(
            function = %func.name,
            start,
            bytes = self.buf.len() - start,
            "emitted function"
        );
        debug_assert_eq!(self.buf.len() - start, function_size(func) as usize);
        Ok(())
    }

    fn slot(&mut self, func: &Function, cmd: &Command) -> Result<()> {
        let program = self.program;
        self.buf
            .annotate(|| format!("    ; {}", format_command(program, func, cmd)));
        let start = self.buf.len();
        self.command(func, cmd)?;
        let len = self.buf.len() - start;
        if len > SLOT_SIZE as usize {
            return Err(CompileError::SlotOverflow {
                opcode: cmd.opcode.to_string(),
                len,
            });
        }
        self.buf.pad_to(start + SLOT_SIZE as usize);
        Ok(())
    }

    fn command(&mut self, func: &Function, cmd: &Command) -> Result<()> {
        match cmd.opcode {
            op if op.is_binary() => {
                let lhs = required(cmd, cmd.op1, "missing left operand")?;
                let rhs = required(cmd, cmd.op2, "missing right operand")?;
                // op2 was pushed last, so it comes off the stack first.
                self.materialize(func, cmd, rhs, Reg::Rbx)?;
                self.materialize(func, cmd, lhs, Reg::Rax)?;
                match op {
                    Opcode::Add => self.buf.add_rax_rbx(),
                    Opcode::Sub => self.buf.sub_rax_rbx(),
                    Opcode::Mul => self.buf.imul_rax_rbx(),
                    Opcode::Div => self.buf.idiv_rbx(),
                    _ => self.buf.compare_rax_rbx(condition(op)),
                }
                if cmd.dest.is_some() {
                    self.buf.push(Reg::Rax);
                }
            }
            Opcode::Eq if self.dest_is_temporary(func, cmd) => {
                let src = required(cmd, cmd.op1, "missing source")?;
                self.materialize(func, cmd, src, Reg::Rax)?;
                self.buf.push(Reg::Rax);
            }
            Opcode::Eq => {
                let src = required(cmd, cmd.op1, "missing source")?;
                let offset = self.dest_slot(func, cmd)?;
                match src {
                    Operand::Number(n) => self.buf.store_imm(offset, n),
                    _ => {
                        self.materialize(func, cmd, src, Reg::Rax)?;
                        self.buf.store(Reg::Rax, offset);
                    }
                }
            }
            Opcode::If => {
                let cond = required(cmd, cmd.dest, "missing condition")?;
                let if_true = self.target(cmd, cmd.op1)?;
                let if_false = self.target(cmd, cmd.op2)?;
                self.materialize(func, cmd, cond, Reg::Rax)?;
                self.buf.cmp_rax_zero();
                self.buf.jne(if_true.1, &if_true.0);
                self.buf.jmp(if_false.1, &if_false.0);
            }
            Opcode::Jmp => {
                let (label, offset) = self.target(cmd, cmd.op1)?;
                self.buf.jmp(offset, &label);
            }
            Opcode::Ret => {
                let value = required(cmd, cmd.op1, "missing return value")?;
                self.materialize(func, cmd, value, Reg::Rax)?;
                self.buf.sub_r9(func.frame_bytes());
                self.buf.ret();
            }
            Opcode::Call => {
                let (label, offset) = self.target(cmd, cmd.op1)?;
                self.buf.call(offset, &label);
                if cmd.dest.is_some() {
                    self.buf.push(Reg::Rax);
                }
            }
            Opcode::ParamIn => {
                let value = required(cmd, cmd.op1, "missing argument")?;
                match value {
                    Operand::Number(n) => self.buf.push_imm(n),
                    Operand::Var(id) if func.var(id).storage.is_temporary() => {
                        // Already on the stack where the callee expects it.
                    }
                    Operand::Var(id) => {
                        self.materialize_var(func, id, Reg::Rax);
                        self.buf.push(Reg::Rax);
                    }
                    Operand::Block(_) => return Err(malformed(cmd, "block as argument")),
                }
            }
            Opcode::ParamOut => {
                let offset = self.dest_slot(func, cmd)?;
                self.buf.pop(Reg::R10);
                self.buf.pop(Reg::Rax);
                self.buf.store(Reg::Rax, offset);
                self.buf.push(Reg::R10);
            }
            Opcode::Out => {
                let value = required(cmd, cmd.op1, "missing value")?;
                self.materialize(func, cmd, value, Reg::Rdi)?;
                self.runtime_call(self.routines.print, "print");
            }
            Opcode::In => {
                let offset = self.dest_slot(func, cmd)?;
                self.buf.push(Reg::R9);
                self.buf.push(Reg::R10);
                self.buf.lea(Reg::Rdi, offset);
                self.buf.call(self.routines.scan, "scan");
                self.buf.pop(Reg::R10);
                self.buf.pop(Reg::R9);
            }
            _ => return Err(malformed(cmd, "unsupported opcode")),
        }
        Ok(())
    }

    fn runtime_call(&mut self, target: u32, label: &str) {
        self.buf.push(Reg::R9);
        self.buf.push(Reg::R10);
        self.buf.call(target, label);
        self.buf.pop(Reg::R10);
        self.buf.pop(Reg::R9);
    }

    /// Load `op` into `reg`: immediate, frame slot, or pop for temporaries.
    fn materialize(&mut self, func: &Function, cmd: &Command, op: Operand, reg: Reg) -> Result<()> {
        match op {
            Operand::Number(n) => self.buf.mov_imm(reg, n),
            Operand::Var(id) => self.materialize_var(func, id, reg),
            Operand::Block(_) => return Err(malformed(cmd, "block used as a value")),
        }
        Ok(())
    }

    fn materialize_var(&mut self, func: &Function, id: VarId, reg: Reg) {
        match func.var(id).storage {
            Storage::Memory { offset } => self.buf.load(reg, offset),
            Storage::Stack | Storage::Register => self.buf.pop(reg),
        }
    }

    fn dest_is_temporary(&self, func: &Function, cmd: &Command) -> bool {
        cmd.dest
            .and_then(|d| d.as_var())
            .is_some_and(|id| func.var(id).storage.is_temporary())
    }

    /// Frame offset of the command's destination, which must be a named
    /// variable.
    fn dest_slot(&self, func: &Function, cmd: &Command) -> Result<u32> {
        cmd.dest
            .and_then(|d| d.as_var())
            .and_then(|id| func.var(id).storage.offset())
            .ok_or_else(|| malformed(cmd, "destination is not a frame variable"))
    }

    /// Label and resolved offset of a block operand.
    fn target(&self, cmd: &Command, op: Option<Operand>) -> Result<(String, u32)> {
        let r: BlockRef = op
            .and_then(|o| o.as_block())
            .ok_or_else(|| malformed(cmd, "missing block target"))?;
        let name = self.program.block(r).name.to_string();
        let offset = self.layout.symbols.resolve(&name)?;
        Ok((name, offset))
    }
}

fn required(cmd: &Command, op: Option<Operand>, reason: &'static str) -> Result<Operand> {
    op.ok_or_else(|| malformed(cmd, reason))
}

fn malformed(cmd: &Command, reason: &'static str) -> CompileError {
    CompileError::MalformedCommand {
        opcode: cmd.opcode.to_string(),
        reason,
    }
}

fn condition(op: Opcode) -> Cond {
    match op {
        Opcode::CmpEq => Cond::Eq,
        Opcode::CmpNe => Cond::Ne,
        Opcode::CmpLt => Cond::Lt,
        Opcode::CmpGt => Cond::Gt,
        Opcode::CmpLe => Cond::Le,
        _ => Cond::Ge,
    }
}
