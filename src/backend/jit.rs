//! In-process execution.
//!
//! Code is copied into an anonymous mapping that is never writable and
//! executable at the same time: it is read+write while filled, flipped to
//! read+execute for the duration of a call, and back to read+write after.
//! A small host stub bridges the SysV calling convention to the stack-only
//! convention of generated code.
//!
//! The session's data stack is a plain vector; the image's limit word holds
//! its end address, and the host overflow routine unwinds through the stub
//! when a prologue would pass it.

use std::collections::HashMap;
use std::ptr::NonNull;

use tracing::{debug, info};

use super::link;
use crate::error::{CompileError, Result};
use crate::ir::{Program, WORD_SIZE};
use crate::layout::{frame_slots, Layout, SymbolTable};
use crate::runtime::{HostIo, HostRuntime};

/// `extern "sysv64" fn(frame_base, entry, args, argc) -> StubReturn`:
/// set `r9`, push `argc` words from `args` in order, call `entry`. A
/// normal return clears `rdx`; the overflow routine sets it.
#[rustfmt::skip]
const HOST_STUB: [u8; 34] = [
    0x53,                               // push rbx
    0x55,                               // push rbp
    0x48, 0x89, 0xE5,                   // mov rbp, rsp
    0x49, 0x89, 0xF9,                   // mov r9, rdi
    0x48, 0x85, 0xC9,                   // test rcx, rcx
    0x74, 0x0B,                         // jz call
    0xFF, 0x32,                         // push qword [rdx]
    0x48, 0x83, 0xC2, 0x08,             // add rdx, 8
    0x48, 0xFF, 0xC9,                   // dec rcx
    0x75, 0xF5,                         // jnz push
    0xFF, 0xD6,                         // call rsi
    0x31, 0xD2,                         // xor edx, edx
    0x48, 0x89, 0xEC,                   // mov rsp, rbp
    0x5D,                               // pop rbp
    0x5B,                               // pop rbx
    0xC3,                               // ret
];

/// Returned in `rax:rdx`.
#[repr(C)]
struct StubReturn {
    value: i64,
    overflow: u64,
}

type HostStub = unsafe extern "sysv64" fn(*mut i64, *const u8, *const i64, u64) -> StubReturn;

pub const DEFAULT_DATA_STACK_BYTES: usize = 64 * 1024;

// ─── W^X mapping ───────────────────────────────────────────────────

/// Anonymous mapping holding machine code. Unmapped on drop.
pub struct ExecutableMemory {
    ptr: NonNull<u8>,
    len: usize,
}

impl ExecutableMemory {
    /// Map `bytes` read+write. The mapping only becomes executable inside
    /// [`ExecutableMemory::run`].
    pub fn new(bytes: &[u8]) -> Result<Self> {
        let len = bytes.len().max(1);
        // SAFETY: anonymous private mapping, no file descriptor involved.
        let raw = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
                -1,
                0,
            )
        };
        if raw == libc::MAP_FAILED {
            return Err(CompileError::Io(std::io::Error::last_os_error()));
        }
        let ptr = NonNull::new(raw.cast::<u8>())
            .ok_or_else(|| CompileError::Io(std::io::Error::last_os_error()))?;
        // SAFETY: the mapping is at least `bytes.len()` long and writable.
        unsafe { std::ptr::copy_nonoverlapping(bytes.as_ptr(), ptr.as_ptr(), bytes.len()) };
        Ok(Self { ptr, len })
    }

    fn protect(&self, prot: libc::c_int) -> Result<()> {
        // SAFETY: `ptr`/`len` describe a live mapping owned by self.
        let rc = unsafe { libc::mprotect(self.ptr.as_ptr().cast(), self.len, prot) };
        if rc != 0 {
            return Err(CompileError::Io(std::io::Error::last_os_error()));
        }
        Ok(())
    }

    /// Make the mapping read+execute, run `f` with its base address, then
    /// make it read+write again.
    pub fn run<R>(&self, f: impl FnOnce(*const u8) -> R) -> Result<R> {
        self.protect(libc::PROT_READ | libc::PROT_EXEC)?;
        let result = f(self.ptr.as_ptr());
        self.protect(libc::PROT_READ | libc::PROT_WRITE)?;
        Ok(result)
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl Drop for ExecutableMemory {
    fn drop(&mut self) {
        // SAFETY: unmapping our own mapping exactly once.
        unsafe {
            libc::munmap(self.ptr.as_ptr().cast(), self.len);
        }
    }
}

// ─── Session ───────────────────────────────────────────────────────

#[derive(Debug, Clone)]
struct FunctionInfo {
    arity: usize,
    frame_bytes: u32,
    vars: HashMap<String, u32>,
}

/// A compiled program mapped into this process, with its own data stack
/// and I/O queues.
pub struct JitSession {
    memory: ExecutableMemory,
    io: NonNull<HostIo>,
    symbols: SymbolTable,
    functions: HashMap<String, FunctionInfo>,
    stub_offset: usize,
    data: Vec<i64>,
    last_call: Option<String>,
}

impl JitSession {
    pub fn new(program: &Program, layout: &Layout, input: impl IntoIterator<Item = i64>) -> Result<Self> {
        Self::with_data_stack(program, layout, input, DEFAULT_DATA_STACK_BYTES)
    }

    pub fn with_data_stack(
        program: &Program,
        layout: &Layout,
        input: impl IntoIterator<Item = i64>,
        data_stack_bytes: usize,
    ) -> Result<Self> {
        let mut data = vec![0i64; (data_stack_bytes / WORD_SIZE as usize).max(1)];
        let io = NonNull::from(Box::leak(Box::new(HostIo::with_input(input))));
        let mut image = match link(program, layout, &HostRuntime::new(io.as_ptr()), false) {
            Ok(image) => image,
            Err(e) => {
                // SAFETY: `io` came from Box::leak above and nothing else holds it.
                drop(unsafe { Box::from_raw(io.as_ptr()) });
                return Err(e);
            }
        };
        let limit = data.as_mut_ptr_range().end as u64;
        image.set_data_limit(limit);
        let stub_offset = image.bytes.len();
        let mut bytes = image.bytes;
        bytes.extend_from_slice(&HOST_STUB);
        let memory = match ExecutableMemory::new(&bytes) {
            Ok(memory) => memory,
            Err(e) => {
                // SAFETY: as above.
                drop(unsafe { Box::from_raw(io.as_ptr()) });
                return Err(e);
            }
        };

        let functions = program
            .functions
            .iter()
            .map(|f| {
                let vars = frame_slots(f)
                    .map(|(v, off)| (v.name.to_string(), off))
                    .collect();
                let info = FunctionInfo {
                    arity: f.arity(),
                    frame_bytes: f.frame_bytes(),
                    vars,
                };
                (f.name.to_string(), info)
            })
            .collect();

        info!(bytes = memory.len(), "mapped program");
        Ok(Self {
            memory,
            io,
            symbols: image.symbols,
            functions,
            stub_offset,
            data,
            last_call: None,
        })
    }

    /// Call function `name` with `args` and return its result.
    ///
    /// The data stack is zeroed first, so variables read before being
    /// assigned see 0.
    pub fn call(&mut self, name: &str, args: &[i64]) -> Result<i64> {
        let entry = self.symbols.resolve(name)? as usize;
        let info = self
            .functions
            .get(name)
            .ok_or_else(|| CompileError::UndefinedFunction(name.to_string()))?;
        if info.arity != args.len() {
            return Err(CompileError::ArityMismatch {
                name: name.to_string(),
                expected: info.arity,
                found: args.len(),
            });
        }
        self.data.fill(0);
        let frame_base = self.data.as_mut_ptr();
        let stub_offset = self.stub_offset;
        debug!(function = name, ?args, "calling");

        let returned = self.memory.run(|base| {
            // SAFETY: `base` is the start of the mapped image; the stub and
            // the entry both lie inside it and the mapping is executable for
            // the duration of this closure.
            unsafe {
                let stub: HostStub = std::mem::transmute::<*const u8, HostStub>(base.add(stub_offset));
                stub(frame_base, base.add(entry), args.as_ptr(), args.len() as u64)
            }
        })?;
        if returned.overflow != 0 {
            self.last_call = None;
            return Err(CompileError::DataStackOverflow {
                function: name.to_string(),
                bytes: self.data.len() * WORD_SIZE as usize,
            });
        }
        self.last_call = Some(name.to_string());
        Ok(returned.value)
    }

    /// Value of variable `name` in the frame of the last top-level call.
    pub fn read_var(&self, name: &str) -> Option<i64> {
        let info = self.functions.get(self.last_call.as_deref()?)?;
        let offset = *info.vars.get(name)?;
        let slot = ((info.frame_bytes - offset) / WORD_SIZE) as usize;
        self.data.get(slot).copied()
    }

    /// Values printed by `OUT` so far.
    pub fn output(&self) -> &[i64] {
        // SAFETY: generated code only touches the HostIo while `call` runs,
        // which needs `&mut self`.
        unsafe { &self.io.as_ref().output }
    }

    /// Queue more values for `IN`.
    pub fn push_input(&mut self, values: impl IntoIterator<Item = i64>) {
        // SAFETY: as in `output`.
        unsafe { self.io.as_mut().input.extend(values) };
    }
}

impl Drop for JitSession {
    fn drop(&mut self) {
        // SAFETY: `io` was leaked in the constructor and is freed only here.
        drop(unsafe { Box::from_raw(self.io.as_ptr()) });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{AstNode, Operator};
    use crate::ir::builder::build_program;
    use crate::layout::assign_code_offsets;

    fn session(ast: &AstNode, input: Vec<i64>) -> JitSession {
        let mut program = build_program(ast).unwrap();
        let layout = assign_code_offsets(&mut program).unwrap();
        JitSession::new(&program, &layout, input).unwrap()
    }

    #[test]
    fn test_host_stub_jumps() {
        assert_eq!(11 + 2 + HOST_STUB[12] as usize, 24);
        assert_eq!(&HOST_STUB[24..28], &[0xFF, 0xD6, 0x31, 0xD2]);
        assert_eq!(22 + 2 + HOST_STUB[23] as i8 as isize, 13);
    }

    fn depth() -> AstNode {
        let n = || AstNode::var("n");
        AstNode::program(vec![AstNode::func(
            "depth",
            &["n"],
            vec![
                AstNode::if_then(
                    AstNode::op(Operator::Equal, n(), AstNode::number(0)),
                    vec![AstNode::ret(AstNode::number(0))],
                ),
                AstNode::ret(AstNode::op(
                    Operator::Add,
                    AstNode::number(1),
                    AstNode::call("depth", vec![AstNode::op(Operator::Sub, n(), AstNode::number(1))]),
                )),
            ],
        )])
    }

    #[test]
    fn test_recursion_past_data_stack_is_an_error() {
        let mut program = build_program(&depth()).unwrap();
        let layout = assign_code_offsets(&mut program).unwrap();
        // Two 8-byte frames fit.
        let mut jit = JitSession::with_data_stack(&program, &layout, [], 16).unwrap();
        assert!(matches!(
            jit.call("depth", &[4]),
            Err(CompileError::DataStackOverflow { bytes: 16, .. })
        ));
        assert_eq!(jit.read_var("n"), None);
        // The session stays usable.
        assert_eq!(jit.call("depth", &[1]).unwrap(), 1);
        assert!(jit.call("depth", &[2]).is_err());
        assert_eq!(jit.call("depth", &[0]).unwrap(), 0);

        let mut roomy = JitSession::new(&program, &layout, []).unwrap();
        assert_eq!(roomy.call("depth", &[1000]).unwrap(), 1000);
    }

    #[test]
    fn test_memory_round_trip() {
        // mov eax, 7; ret
        let mem = ExecutableMemory::new(&[0xB8, 7, 0, 0, 0, 0xC3]).unwrap();
        let value = mem
            .run(|base| {
                let f: unsafe extern "sysv64" fn() -> i32 = unsafe { std::mem::transmute(base) };
                unsafe { f() }
            })
            .unwrap();
        assert_eq!(value, 7);
    }

    #[test]
    fn test_call_and_read_var() {
        let ast = AstNode::program(vec![AstNode::func(
            "f",
            &["x"],
            vec![
                AstNode::assign("y", AstNode::op(Operator::Mul, AstNode::var("x"), AstNode::number(3))),
                AstNode::ret(AstNode::op(Operator::Sub, AstNode::var("y"), AstNode::number(1))),
            ],
        )]);
        let mut jit = session(&ast, vec![]);
        assert_eq!(jit.call("f", &[5]).unwrap(), 14);
        assert_eq!(jit.read_var("y"), Some(15));
        assert_eq!(jit.read_var("x"), Some(5));
        assert_eq!(jit.read_var("nope"), None);
    }

    #[test]
    fn test_call_errors() {
        let ast = AstNode::program(vec![AstNode::func(
            "f",
            &["x"],
            vec![AstNode::ret(AstNode::var("x"))],
        )]);
        let mut jit = session(&ast, vec![]);
        assert!(matches!(jit.call("g", &[]), Err(CompileError::UndefinedSymbol(_))));
        assert!(matches!(
            jit.call("f", &[]),
            Err(CompileError::ArityMismatch { expected: 1, found: 0, .. })
        ));
        assert_eq!(jit.read_var("x"), None);
    }

    #[test]
    fn test_io_through_host() {
        let ast = AstNode::program(vec![AstNode::func(
            "echo",
            &[],
            vec![
                AstNode::input("a"),
                AstNode::assign("b", AstNode::op(Operator::Add, AstNode::var("a"), AstNode::number(1))),
                AstNode::out("b"),
                AstNode::out("a"),
                AstNode::ret(AstNode::number(0)),
            ],
        )]);
        let mut jit = session(&ast, vec![41]);
        assert_eq!(jit.call("echo", &[]).unwrap(), 0);
        assert_eq!(jit.output(), &[42, 41]);
        jit.push_input([-5]);
        jit.call("echo", &[]).unwrap();
        assert_eq!(jit.output(), &[42, 41, -4, -5]);
    }
}
