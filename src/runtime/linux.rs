//! Syscall-based routines for standalone Linux executables.
//!
//! print: formats `rdi` as decimal into a 32-byte stack buffer from the
//! right (unsigned division on the magnitude, so `i64::MIN` works), adds
//! `-` and a trailing newline, then `write(1, ..)`.
//!
//! scan: `read(0, .., 1)` one byte at a time. A `-` marks the value
//! negative, digits accumulate, and any other byte or end of input stops.
//! Nothing read yields 0.
//!
//! overflow: writes a message to stderr and exits with
//! [`OVERFLOW_EXIT_STATUS`].

use super::Runtime;

#[rustfmt::skip]
const PRINT: [u8; 85] = [
    0x48, 0x89, 0xF8,                   // mov rax, rdi
    0x49, 0x89, 0xF8,                   // mov r8, rdi
    0x48, 0x85, 0xC0,                   // test rax, rax
    0x79, 0x03,                         // jns +3
    0x48, 0xF7, 0xD8,                   // neg rax
    0x48, 0x83, 0xEC, 0x20,             // sub rsp, 32
    0x48, 0x8D, 0x74, 0x24, 0x1F,       // lea rsi, [rsp + 31]
    0xC6, 0x06, 0x0A,                   // mov byte [rsi], '\n'
    0xB9, 0x0A, 0x00, 0x00, 0x00,       // mov ecx, 10
    // digits:
    0x31, 0xD2,                         // xor edx, edx
    0x48, 0xF7, 0xF1,                   // div rcx
    0x80, 0xC2, 0x30,                   // add dl, '0'
    0x48, 0xFF, 0xCE,                   // dec rsi
    0x88, 0x16,                         // mov [rsi], dl
    0x48, 0x85, 0xC0,                   // test rax, rax
    0x75, 0xEE,                         // jnz digits
    0x4D, 0x85, 0xC0,                   // test r8, r8
    0x79, 0x06,                         // jns write
    0x48, 0xFF, 0xCE,                   // dec rsi
    0xC6, 0x06, 0x2D,                   // mov byte [rsi], '-'
    // write:
    0x48, 0x8D, 0x54, 0x24, 0x20,       // lea rdx, [rsp + 32]
    0x48, 0x29, 0xF2,                   // sub rdx, rsi
    0xBF, 0x01, 0x00, 0x00, 0x00,       // mov edi, 1
    0xB8, 0x01, 0x00, 0x00, 0x00,       // mov eax, 1 (write)
    0x0F, 0x05,                         // syscall
    0x48, 0x83, 0xC4, 0x20,             // add rsp, 32
    0xC3,                               // ret
];

#[rustfmt::skip]
const SCAN: [u8; 84] = [
    0x49, 0x89, 0xF8,                   // mov r8, rdi
    0x45, 0x31, 0xD2,                   // xor r10d, r10d
    0x45, 0x31, 0xC9,                   // xor r9d, r9d
    0x48, 0x83, 0xEC, 0x10,             // sub rsp, 16
    // next:
    0x31, 0xC0,                         // xor eax, eax (read)
    0x31, 0xFF,                         // xor edi, edi
    0x48, 0x89, 0xE6,                   // mov rsi, rsp
    0xBA, 0x01, 0x00, 0x00, 0x00,       // mov edx, 1
    0x0F, 0x05,                         // syscall
    0x48, 0x85, 0xC0,                   // test rax, rax
    0x7E, 0x21,                         // jle done
    0x0F, 0xB6, 0x04, 0x24,             // movzx eax, byte [rsp]
    0x3C, 0x2D,                         // cmp al, '-'
    0x75, 0x08,                         // jne digit
    0x41, 0xB9, 0x01, 0x00, 0x00, 0x00, // mov r9d, 1
    0xEB, 0xDD,                         // jmp next
    // digit:
    0x83, 0xE8, 0x30,                   // sub eax, '0'
    0x83, 0xF8, 0x09,                   // cmp eax, 9
    0x77, 0x09,                         // ja done
    0x4D, 0x6B, 0xD2, 0x0A,             // imul r10, r10, 10
    0x49, 0x01, 0xC2,                   // add r10, rax
    0xEB, 0xCC,                         // jmp next
    // done:
    0x4C, 0x89, 0xD0,                   // mov rax, r10
    0x4D, 0x85, 0xC9,                   // test r9, r9
    0x74, 0x03,                         // jz store
    0x48, 0xF7, 0xD8,                   // neg rax
    // store:
    0x49, 0x89, 0x00,                   // mov [r8], rax
    0x48, 0x83, 0xC4, 0x10,             // add rsp, 16
    0xC3,                               // ret
];

/// Exit status of an executable whose data stack overflowed.
pub const OVERFLOW_EXIT_STATUS: u8 = 134;

#[rustfmt::skip]
const OVERFLOW: [u8; 56] = [
    0x48, 0x8D, 0x35, 0x1D, 0x00, 0x00, 0x00, // lea rsi, [rip + message]
    0xBA, 0x14, 0x00, 0x00, 0x00,       // mov edx, 20
    0xBF, 0x02, 0x00, 0x00, 0x00,       // mov edi, 2
    0xB8, 0x01, 0x00, 0x00, 0x00,       // mov eax, 1 (write)
    0x0F, 0x05,                         // syscall
    0xBF, OVERFLOW_EXIT_STATUS, 0x00, 0x00, 0x00, // mov edi, status
    0xB8, 0x3C, 0x00, 0x00, 0x00,       // mov eax, 60 (exit)
    0x0F, 0x05,                         // syscall
    // message:
    b'd', b'a', b't', b'a', b' ', b's', b't', b'a', b'c', b'k', b' ',
    b'o', b'v', b'e', b'r', b'f', b'l', b'o', b'w', b'\n',
];

/// Routines for executables that run on their own.
#[derive(Debug, Clone, Copy, Default)]
pub struct LinuxRuntime;

impl Runtime for LinuxRuntime {
    fn print_routine(&self) -> Vec<u8> {
        PRINT.to_vec()
    }

    fn scan_routine(&self) -> Vec<u8> {
        SCAN.to_vec()
    }

    fn overflow_routine(&self) -> Vec<u8> {
        OVERFLOW.to_vec()
    }
}
