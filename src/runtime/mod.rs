//! Print, scan and overflow routines appended after the generated code.
//!
//! Emitted `OUT` passes the value in `rdi`; emitted `IN` passes a pointer to
//! the destination frame slot in `rdi`. Both save `r9`/`r10` around the
//! call, so a routine may clobber every caller-saved register including
//! those two. A function prologue jumps (never calls) to the overflow
//! routine when the frame base passes the limit word; that routine does
//! not return to generated code.
//!
//! The image layout is always `code | print | scan | overflow | limit`,
//! where `limit` is an 8-byte word the backend fills in with the end
//! address of its data stack.
//!
//! Two implementations:
//!
//! * [`LinuxRuntime`]: self-contained routines that talk to fd 0/1 through
//!   raw syscalls, for standalone ELF executables.
//! * [`HostRuntime`]: trampolines into Rust callbacks operating on a
//!   [`HostIo`], for in-process execution and tests.

pub mod host;
pub mod linux;

pub use host::{HostIo, HostRuntime};
pub use linux::LinuxRuntime;

use crate::x86::RoutineOffsets;

/// Provider of the two helper routines.
pub trait Runtime {
    /// Print the signed integer in `rdi` followed by a newline.
    fn print_routine(&self) -> Vec<u8>;
    /// Read a signed integer and store it at the address in `rdi`.
    fn scan_routine(&self) -> Vec<u8>;
    /// Abandon the running program after a frame overran the data stack.
    fn overflow_routine(&self) -> Vec<u8>;

    /// Routine bytes in image order, with a zeroed limit word at the end,
    /// and their absolute offsets when placed right after `code_len` bytes
    /// of code.
    fn link(&self, code_len: u32) -> (Vec<u8>, RoutineOffsets) {
        let mut bytes = self.print_routine();
        let scan = self.scan_routine();
        let overflow = self.overflow_routine();
        let offsets = RoutineOffsets::after_code(
            code_len,
            [bytes.len() as u32, scan.len() as u32, overflow.len() as u32],
        );
        bytes.extend_from_slice(&scan);
        bytes.extend_from_slice(&overflow);
        bytes.extend_from_slice(&[0; LIMIT_WORD_LEN]);
        (bytes, offsets)
    }
}

/// Size of the limit word that ends every image.
pub const LIMIT_WORD_LEN: usize = 8;

/// Store the data stack's end address into the limit word of an image.
pub fn set_limit(image: &mut [u8], offsets: RoutineOffsets, limit: u64) {
    let at = offsets.limit as usize;
    image[at..at + LIMIT_WORD_LEN].copy_from_slice(&limit.to_le_bytes());
}
