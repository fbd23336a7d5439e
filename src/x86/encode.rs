//! Fixed-format instruction templates.
//!
//! Each method appends exactly one instruction (or one fixed idiom such as
//! `cqo; idiv`) with a length that depends only on the method, never on
//! the operand values. When tracing is enabled every instruction also gets
//! a listing line: offset, bytes, mnemonic.

use std::fmt::Write;

use super::{Cond, Reg, NOP};

/// Machine-code buffer with an optional assembly listing.
#[derive(Debug, Default)]
pub struct CodeBuf {
    bytes: Vec<u8>,
    trace: Option<Vec<String>>,
}

impl CodeBuf {
    pub fn new(trace: bool) -> Self {
        Self {
            bytes: Vec::new(),
            trace: trace.then(Vec::new),
        }
    }

    pub fn with_capacity(capacity: usize, trace: bool) -> Self {
        Self {
            bytes: Vec::with_capacity(capacity),
            trace: trace.then(Vec::new),
        }
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn into_parts(self) -> (Vec<u8>, Vec<String>) {
        (self.bytes, self.trace.unwrap_or_default())
    }

    /// Add a listing line that is not an instruction (labels, comments).
    pub fn annotate(&mut self, text: impl FnOnce() -> String) {
        if let Some(trace) = &mut self.trace {
            trace.push(text());
        }
    }

    fn put(&mut self, bytes: &[u8], asm: impl FnOnce() -> String) {
        if let Some(trace) = &mut self.trace {
            let mut hex = String::with_capacity(bytes.len() * 3);
            for b in bytes {
                let _ = write!(hex, "{:02x} ", b);
            }
            trace.push(format!(
                "{:08x}:  {:<33}{}",
                self.bytes.len(),
                hex,
                asm()
            ));
        }
        self.bytes.extend_from_slice(bytes);
    }

    /// Displacement from the end of a rel32 field starting `field_at` to
    /// `target`.
    fn rel32(field_at: usize, target: u32) -> [u8; 4] {
        let rel = target as i64 - (field_at as i64 + 4);
        (rel as i32).to_le_bytes()
    }

    fn frame_disp(offset: u32) -> [u8; 4] {
        (-(offset as i64) as i32).to_le_bytes()
    }

    // ── Moves ──────────────────────────────────────────────────────

    /// `mov r64, imm32` (sign-extended), 7 bytes.
    pub fn mov_imm(&mut self, r: Reg, imm: i32) {
        let mut b = vec![0x48 | r.ext(), 0xC7, 0xC0 | r.low()];
        b.extend_from_slice(&imm.to_le_bytes());
        self.put(&b, || format!("mov {}, {}", r, imm));
    }

    fn frame_op(&mut self, opcode: u8, r: Reg, offset: u32, mnemonic: &str) {
        let mut b = vec![0x49 | (r.ext() << 2), opcode, 0x81 | (r.low() << 3)];
        b.extend_from_slice(&Self::frame_disp(offset));
        self.put(&b, || match opcode {
            0x89 => format!("{} [r9 - {}], {}", mnemonic, offset, r),
            _ => format!("{} {}, [r9 - {}]", mnemonic, r, offset),
        });
    }

    /// `mov r64, [r9 - offset]`, 7 bytes.
    pub fn load(&mut self, r: Reg, offset: u32) {
        self.frame_op(0x8B, r, offset, "mov");
    }

    /// `mov [r9 - offset], r64`, 7 bytes.
    pub fn store(&mut self, r: Reg, offset: u32) {
        self.frame_op(0x89, r, offset, "mov");
    }

    /// `lea r64, [r9 - offset]`, 7 bytes.
    pub fn lea(&mut self, r: Reg, offset: u32) {
        self.frame_op(0x8D, r, offset, "lea");
    }

    /// `mov qword [r9 - offset], imm32`, 11 bytes.
    pub fn store_imm(&mut self, offset: u32, imm: i32) {
        let mut b = vec![0x49, 0xC7, 0x81];
        b.extend_from_slice(&Self::frame_disp(offset));
        b.extend_from_slice(&imm.to_le_bytes());
        self.put(&b, || format!("mov qword [r9 - {}], {}", offset, imm));
    }

    // ── Stack ──────────────────────────────────────────────────────

    pub fn push(&mut self, r: Reg) {
        if r.ext() == 1 {
            self.put(&[0x41, 0x50 | r.low()], || format!("push {}", r));
        } else {
            self.put(&[0x50 | r.low()], || format!("push {}", r));
        }
    }

    pub fn pop(&mut self, r: Reg) {
        if r.ext() == 1 {
            self.put(&[0x41, 0x58 | r.low()], || format!("pop {}", r));
        } else {
            self.put(&[0x58 | r.low()], || format!("pop {}", r));
        }
    }

    /// `push imm32`, 5 bytes.
    pub fn push_imm(&mut self, imm: i32) {
        let mut b = vec![0x68];
        b.extend_from_slice(&imm.to_le_bytes());
        self.put(&b, || format!("push {}", imm));
    }

    // ── Frame base ─────────────────────────────────────────────────

    /// `add r9, imm32`, 7 bytes.
    pub fn add_r9(&mut self, imm: u32) {
        let mut b = vec![0x49, 0x81, 0xC1];
        b.extend_from_slice(&imm.to_le_bytes());
        self.put(&b, || format!("add r9, {}", imm));
    }

    /// `sub r9, imm32`, 7 bytes.
    pub fn sub_r9(&mut self, imm: u32) {
        let mut b = vec![0x49, 0x81, 0xE9];
        b.extend_from_slice(&imm.to_le_bytes());
        self.put(&b, || format!("sub r9, {}", imm));
    }

    /// `cmp r9, [rip + disp32]` against the word at absolute offset
    /// `target`, 7 bytes.
    pub fn cmp_r9_word(&mut self, target: u32) {
        let mut b = vec![0x4C, 0x3B, 0x0D];
        b.extend_from_slice(&Self::rel32(self.len() + 3, target));
        self.put(&b, || format!("cmp r9, [rel {:#x}]", target));
    }

    // ── Arithmetic on rax, rbx ─────────────────────────────────────

    pub fn add_rax_rbx(&mut self) {
        self.put(&[0x48, 0x01, 0xD8], || "add rax, rbx".to_string());
    }

    pub fn sub_rax_rbx(&mut self) {
        self.put(&[0x48, 0x29, 0xD8], || "sub rax, rbx".to_string());
    }

    pub fn imul_rax_rbx(&mut self) {
        self.put(&[0x48, 0x0F, 0xAF, 0xC3], || "imul rax, rbx".to_string());
    }

    /// `cqo; idiv rbx`: rax = rdx:rax / rbx.
    pub fn idiv_rbx(&mut self) {
        self.put(&[0x48, 0x99], || "cqo".to_string());
        self.put(&[0x48, 0xF7, 0xFB], || "idiv rbx".to_string());
    }

    /// `cmp rax, rbx; setcc al; movzx eax, al`.
    pub fn compare_rax_rbx(&mut self, cond: Cond) {
        self.put(&[0x48, 0x39, 0xD8], || "cmp rax, rbx".to_string());
        self.put(&[0x0F, cond.setcc_opcode(), 0xC0], || {
            format!("set{} al", cond.suffix())
        });
        self.put(&[0x0F, 0xB6, 0xC0], || "movzx eax, al".to_string());
    }

    /// `cmp rax, 0`, 4 bytes.
    pub fn cmp_rax_zero(&mut self) {
        self.put(&[0x48, 0x83, 0xF8, 0x00], || "cmp rax, 0".to_string());
    }

    pub fn xor_eax_eax(&mut self) {
        self.put(&[0x31, 0xC0], || "xor eax, eax".to_string());
    }

    // ── Control transfer ───────────────────────────────────────────

    /// `jne rel32`, 6 bytes.
    pub fn jne(&mut self, target: u32, label: &str) {
        let mut b = vec![0x0F, 0x85];
        b.extend_from_slice(&Self::rel32(self.len() + 2, target));
        self.put(&b, || format!("jne {} ; {:#x}", label, target));
    }

    /// `ja rel32` (unsigned above), 6 bytes.
    pub fn ja(&mut self, target: u32, label: &str) {
        let mut b = vec![0x0F, 0x87];
        b.extend_from_slice(&Self::rel32(self.len() + 2, target));
        self.put(&b, || format!("ja {} ; {:#x}", label, target));
    }

    /// `jmp rel32`, 5 bytes.
    pub fn jmp(&mut self, target: u32, label: &str) {
        let mut b = vec![0xE9];
        b.extend_from_slice(&Self::rel32(self.len() + 1, target));
        self.put(&b, || format!("jmp {} ; {:#x}", label, target));
    }

    /// `call rel32`, 5 bytes.
    pub fn call(&mut self, target: u32, label: &str) {
        let mut b = vec![0xE8];
        b.extend_from_slice(&Self::rel32(self.len() + 1, target));
        self.put(&b, || format!("call {} ; {:#x}", label, target));
    }

    pub fn ret(&mut self) {
        self.put(&[0xC3], || "ret".to_string());
    }

    /// Pad with NOPs up to absolute offset `end`.
    pub fn pad_to(&mut self, end: usize) {
        if end > self.len() {
            let count = end - self.len();
            self.put(&vec![NOP; count], || format!("nop x{}", count));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_access_encodings() {
        let mut buf = CodeBuf::new(false);
        buf.load(Reg::Rax, 8);
        buf.load(Reg::Rbx, 16);
        buf.store(Reg::Rax, 8);
        buf.lea(Reg::Rdi, 24);
        assert_eq!(
            buf.bytes(),
            &[
                0x49, 0x8B, 0x81, 0xF8, 0xFF, 0xFF, 0xFF, // mov rax, [r9-8]
                0x49, 0x8B, 0x99, 0xF0, 0xFF, 0xFF, 0xFF, // mov rbx, [r9-16]
                0x49, 0x89, 0x81, 0xF8, 0xFF, 0xFF, 0xFF, // mov [r9-8], rax
                0x49, 0x8D, 0xB9, 0xE8, 0xFF, 0xFF, 0xFF, // lea rdi, [r9-24]
            ]
        );
    }

    #[test]
    fn test_immediates() {
        let mut buf = CodeBuf::new(false);
        buf.mov_imm(Reg::Rbx, -1);
        buf.push_imm(5);
        buf.store_imm(8, 7);
        assert_eq!(
            buf.bytes(),
            &[
                0x48, 0xC7, 0xC3, 0xFF, 0xFF, 0xFF, 0xFF, //
                0x68, 0x05, 0x00, 0x00, 0x00, //
                0x49, 0xC7, 0x81, 0xF8, 0xFF, 0xFF, 0xFF, 0x07, 0x00, 0x00, 0x00,
            ]
        );
    }

    #[test]
    fn test_extended_register_push_pop() {
        let mut buf = CodeBuf::new(false);
        buf.push(Reg::R9);
        buf.push(Reg::R10);
        buf.pop(Reg::R10);
        buf.pop(Reg::R9);
        buf.push(Reg::Rax);
        buf.pop(Reg::Rdi);
        assert_eq!(
            buf.bytes(),
            &[0x41, 0x51, 0x41, 0x52, 0x41, 0x5A, 0x41, 0x59, 0x50, 0x5F]
        );
    }

    #[test]
    fn test_relative_displacements() {
        let mut buf = CodeBuf::new(false);
        buf.call(0, "self"); // backwards: 0 - 5
        assert_eq!(&buf.bytes()[1..5], &(-5i32).to_le_bytes());
        buf.jne(100, "ahead"); // field at 7, ends at 11
        assert_eq!(&buf.bytes()[7..11], &89i32.to_le_bytes());
        buf.jmp(11, "next"); // at 11, field ends at 16
        assert_eq!(&buf.bytes()[12..16], &(-5i32).to_le_bytes());
    }

    #[test]
    fn test_frame_limit_check() {
        let mut buf = CodeBuf::new(false);
        buf.add_r9(8);
        buf.cmp_r9_word(100); // field at 10, ends at 14
        buf.ja(200, "overflow"); // field at 16, ends at 20
        assert_eq!(&buf.bytes()[7..10], &[0x4C, 0x3B, 0x0D]);
        assert_eq!(&buf.bytes()[10..14], &86i32.to_le_bytes());
        assert_eq!(&buf.bytes()[14..16], &[0x0F, 0x87]);
        assert_eq!(&buf.bytes()[16..20], &180i32.to_le_bytes());
    }

    #[test]
    fn test_setcc_and_division() {
        let mut buf = CodeBuf::new(false);
        buf.compare_rax_rbx(Cond::Le);
        buf.idiv_rbx();
        assert_eq!(
            buf.bytes(),
            &[0x48, 0x39, 0xD8, 0x0F, 0x9E, 0xC0, 0x0F, 0xB6, 0xC0, 0x48, 0x99, 0x48, 0xF7, 0xFB]
        );
    }

    #[test]
    fn test_trace_lines() {
        let mut buf = CodeBuf::new(true);
        buf.annotate(|| "main:".to_string());
        buf.add_r9(16);
        buf.pad_to(10);
        let (bytes, trace) = buf.into_parts();
        assert_eq!(bytes.len(), 10);
        assert_eq!(trace.len(), 3);
        assert_eq!(trace[0], "main:");
        assert!(trace[1].starts_with("00000000:  49 81 c1 10 00 00 00"));
        assert!(trace[1].ends_with("add r9, 16"));
        assert!(trace[2].ends_with("nop x3"));
    }
}
