//! Trampolines into Rust for in-process execution.
//!
//! Each routine aligns the stack, loads the [`HostIo`] address into `rsi`
//! and calls an `extern "sysv64"` callback whose absolute address is baked
//! into the routine. The `HostIo` must therefore stay at a fixed address
//! for as long as the code that embeds it can run.
//!
//! The overflow routine assumes it runs under the JIT host stub, which
//! keeps its own frame in `rbp` (generated code never touches `rbp`). It
//! unwinds straight back to the stub's caller with `rdx = 1` as the
//! overflow flag of the two-word return value.

use std::collections::VecDeque;

use super::Runtime;

/// Input queue and output record shared with generated code.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HostIo {
    pub input: VecDeque<i64>,
    pub output: Vec<i64>,
}

impl HostIo {
    pub fn with_input(input: impl IntoIterator<Item = i64>) -> Self {
        Self {
            input: input.into_iter().collect(),
            output: Vec::new(),
        }
    }
}

extern "sysv64" fn host_print(value: i64, io: *mut HostIo) {
    // SAFETY: the trampoline passes the address of a live HostIo that the
    // session keeps pinned for the mapping's lifetime.
    if let Some(io) = unsafe { io.as_mut() } {
        io.output.push(value);
    }
}

extern "sysv64" fn host_scan(dest: *mut i64, io: *mut HostIo) {
    // SAFETY: as in host_print; `dest` points at a frame slot inside the
    // session's data stack.
    let value = unsafe { io.as_mut() }
        .and_then(|io| io.input.pop_front())
        .unwrap_or(0);
    if !dest.is_null() {
        unsafe { dest.write(value) };
    }
}

/// `push rbp; mov rbp, rsp; and rsp, -16; mov rsi, ctx; mov rax, callback;
/// call rax; mov rsp, rbp; pop rbp; ret`.
pub fn trampoline(ctx: u64, callback: u64) -> Vec<u8> {
    let mut b = Vec::with_capacity(TRAMPOLINE_LEN);
    b.extend_from_slice(&[0x55, 0x48, 0x89, 0xE5, 0x48, 0x83, 0xE4, 0xF0]);
    b.extend_from_slice(&[0x48, 0xBE]);
    b.extend_from_slice(&ctx.to_le_bytes());
    b.extend_from_slice(&[0x48, 0xB8]);
    b.extend_from_slice(&callback.to_le_bytes());
    b.extend_from_slice(&[0xFF, 0xD0, 0x48, 0x89, 0xEC, 0x5D, 0xC3]);
    b
}

pub const TRAMPOLINE_LEN: usize = 35;

#[rustfmt::skip]
const OVERFLOW_UNWIND: [u8; 11] = [
    0xBA, 0x01, 0x00, 0x00, 0x00,       // mov edx, 1
    0x48, 0x89, 0xEC,                   // mov rsp, rbp
    0x5D,                               // pop rbp
    0x5B,                               // pop rbx
    0xC3,                               // ret
];

/// Routines bound to one [`HostIo`].
#[derive(Debug, Clone, Copy)]
pub struct HostRuntime {
    io: *mut HostIo,
}

impl HostRuntime {
    pub fn new(io: *mut HostIo) -> Self {
        Self { io }
    }
}

impl Runtime for HostRuntime {
    fn print_routine(&self) -> Vec<u8> {
        let callback: extern "sysv64" fn(i64, *mut HostIo) = host_print;
        trampoline(self.io as u64, callback as usize as u64)
    }

    fn scan_routine(&self) -> Vec<u8> {
        let callback: extern "sysv64" fn(*mut i64, *mut HostIo) = host_scan;
        trampoline(self.io as u64, callback as usize as u64)
    }

    fn overflow_routine(&self) -> Vec<u8> {
        OVERFLOW_UNWIND.to_vec()
    }
}
