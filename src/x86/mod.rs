//! x86-64 code emission.
//!
//! [`encode`] holds the fixed instruction templates, [`emit`] walks the IR
//! and fills one [`SLOT_SIZE`]-byte slot per command. Frame addressing is
//! always `[r9 + disp32]` with a negative displacement, so every template
//! has a single length regardless of operand values.

pub mod emit;
pub mod encode;

use std::fmt;

pub use emit::{emit_program, listing_text, MachineCode, RoutineOffsets};
pub use encode::CodeBuf;

/// Bytes reserved for every IR command.
pub const SLOT_SIZE: u32 = 32;

/// Padding byte.
pub const NOP: u8 = 0x90;

/// General-purpose registers used by the templates. The discriminant is
/// the hardware register number.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Reg {
    Rax = 0,
    Rcx = 1,
    Rdx = 2,
    Rbx = 3,
    Rsp = 4,
    Rbp = 5,
    Rsi = 6,
    Rdi = 7,
    R8 = 8,
    R9 = 9,
    R10 = 10,
}

impl Reg {
    /// Low three bits, as encoded in ModRM/opcode.
    pub fn low(self) -> u8 {
        self as u8 & 7
    }

    /// REX extension bit.
    pub fn ext(self) -> u8 {
        (self as u8 >> 3) & 1
    }

    pub fn name(self) -> &'static str {
        match self {
            Reg::Rax => "rax",
            Reg::Rcx => "rcx",
            Reg::Rdx => "rdx",
            Reg::Rbx => "rbx",
            Reg::Rsp => "rsp",
            Reg::Rbp => "rbp",
            Reg::Rsi => "rsi",
            Reg::Rdi => "rdi",
            Reg::R8 => "r8",
            Reg::R9 => "r9",
            Reg::R10 => "r10",
        }
    }
}

impl fmt::Display for Reg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Condition codes for `setcc`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Cond {
    Eq,
    Ne,
    Lt,
    Gt,
    Le,
    Ge,
}

impl Cond {
    /// Second opcode byte of `setcc r/m8`.
    pub fn setcc_opcode(self) -> u8 {
        match self {
            Cond::Eq => 0x94,
            Cond::Ne => 0x95,
            Cond::Lt => 0x9C,
            Cond::Gt => 0x9F,
            Cond::Le => 0x9E,
            Cond::Ge => 0x9D,
        }
    }

    pub fn suffix(self) -> &'static str {
        match self {
            Cond::Eq => "e",
            Cond::Ne => "ne",
            Cond::Lt => "l",
            Cond::Gt => "g",
            Cond::Le => "le",
            Cond::Ge => "ge",
        }
    }
}
