//! Minimal single-segment ELF64 executables.
//!
//! File layout: 64-byte ELF header, one 56-byte `PT_LOAD` program header,
//! then the entry stub, the generated code and the runtime routines. The
//! whole file is mapped RWX starting at `load_address - 0x78`, so the stub
//! lands exactly at `load_address`. The zeroed data area that backs the
//! frame base register is reserved past the end of the file through
//! `p_memsz`; the image's limit word is set to its end, so a recursion
//! that outgrows it stops with the runtime's overflow exit status.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;

use tracing::info;

use super::Image;
use crate::error::{CompileError, Result};

pub const EHDR_SIZE: u64 = 64;
pub const PHDR_SIZE: u64 = 56;
pub const HEADERS_SIZE: u64 = EHDR_SIZE + PHDR_SIZE;
pub const DEFAULT_LOAD_ADDRESS: u64 = 0x400078;
pub const DEFAULT_DATA_BYTES: u64 = 512;
const PAGE: u64 = 0x1000;

/// `mov r9, imm64; call rel32; mov rdi, rax; mov eax, 60; syscall`.
pub const STUB_LEN: usize = 25;

/// Parameters of the executable.
#[derive(Debug, Clone)]
pub struct ElfOptions {
    pub entry: String,
    pub load_address: u64,
    pub data_bytes: u64,
}

impl Default for ElfOptions {
    fn default() -> Self {
        Self {
            entry: "main".to_string(),
            load_address: DEFAULT_LOAD_ADDRESS,
            data_bytes: DEFAULT_DATA_BYTES,
        }
    }
}

fn entry_stub(data_addr: u64, main_rel: i32) -> [u8; STUB_LEN] {
    let mut stub = [0u8; STUB_LEN];
    stub[0..2].copy_from_slice(&[0x49, 0xB9]);
    stub[2..10].copy_from_slice(&data_addr.to_le_bytes());
    stub[10] = 0xE8;
    stub[11..15].copy_from_slice(&main_rel.to_le_bytes());
    stub[15..18].copy_from_slice(&[0x48, 0x89, 0xC7]);
    stub[18..23].copy_from_slice(&[0xB8, 0x3C, 0x00, 0x00, 0x00]);
    stub[23..25].copy_from_slice(&[0x0F, 0x05]);
    stub
}

/// Build the executable bytes for `image`. The process exit status is the
/// low byte of the entry function's return value.
pub fn build_elf(image: &Image, opts: &ElfOptions) -> Result<Vec<u8>> {
    let segment = opts
        .load_address
        .checked_sub(HEADERS_SIZE)
        .filter(|v| v % PAGE == 0)
        .ok_or_else(|| {
            CompileError::Config(format!(
                "load address {:#x} must be {} bytes past a page boundary",
                opts.load_address, HEADERS_SIZE
            ))
        })?;

    let main = image.symbols.resolve(&opts.entry)?;
    // call ends at stub offset 15; code starts right after the stub.
    let main_rel = (STUB_LEN as i64 + main as i64 - 15) as i32;

    let file_size = HEADERS_SIZE + STUB_LEN as u64 + image.bytes.len() as u64;
    let data_offset = file_size.next_multiple_of(16);
    let data_addr = segment + data_offset;
    let mem_size = data_offset + opts.data_bytes;

    let mut out = Vec::with_capacity(file_size as usize);

    // ELF header
    out.extend_from_slice(&[0x7F, b'E', b'L', b'F', 2, 1, 1, 0]);
    out.extend_from_slice(&[0; 8]);
    out.extend_from_slice(&2u16.to_le_bytes()); // ET_EXEC
    out.extend_from_slice(&0x3Eu16.to_le_bytes()); // EM_X86_64
    out.extend_from_slice(&1u32.to_le_bytes());
    out.extend_from_slice(&opts.load_address.to_le_bytes()); // e_entry
    out.extend_from_slice(&EHDR_SIZE.to_le_bytes()); // e_phoff
    out.extend_from_slice(&0u64.to_le_bytes()); // e_shoff
    out.extend_from_slice(&0u32.to_le_bytes()); // e_flags
    out.extend_from_slice(&(EHDR_SIZE as u16).to_le_bytes());
    out.extend_from_slice(&(PHDR_SIZE as u16).to_le_bytes());
    out.extend_from_slice(&1u16.to_le_bytes()); // e_phnum
    out.extend_from_slice(&64u16.to_le_bytes()); // e_shentsize
    out.extend_from_slice(&0u16.to_le_bytes()); // e_shnum
    out.extend_from_slice(&0u16.to_le_bytes()); // e_shstrndx

    // Program header
    out.extend_from_slice(&1u32.to_le_bytes()); // PT_LOAD
    out.extend_from_slice(&7u32.to_le_bytes()); // PF_R | PF_W | PF_X
    out.extend_from_slice(&0u64.to_le_bytes()); // p_offset
    out.extend_from_slice(&segment.to_le_bytes()); // p_vaddr
    out.extend_from_slice(&segment.to_le_bytes()); // p_paddr
    out.extend_from_slice(&file_size.to_le_bytes());
    out.extend_from_slice(&mem_size.to_le_bytes());
    out.extend_from_slice(&PAGE.to_le_bytes());

    out.extend_from_slice(&entry_stub(data_addr, main_rel));
    let code_at = out.len();
    out.extend_from_slice(&image.bytes);
    let limit_at = code_at + image.routines.limit as usize;
    out[limit_at..limit_at + 8].copy_from_slice(&(data_addr + opts.data_bytes).to_le_bytes());
    debug_assert_eq!(out.len() as u64, file_size);
    Ok(out)
}

/// Write `bytes` to `path` and mark the file executable.
pub fn write_executable(path: &Path, bytes: &[u8]) -> Result<()> {
    let mut options = OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o755);
    }
    let mut file = options.open(path)?;
    file.write_all(bytes)?;
    file.flush()?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        file.set_permissions(std::fs::Permissions::from_mode(0o755))?;
    }
    info!(path = %path.display(), bytes = bytes.len(), "wrote executable");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::AstNode;
    use crate::backend::link;
    use crate::ir::builder::build_program;
    use crate::layout::assign_code_offsets;
    use crate::runtime::LinuxRuntime;

    fn image(ast: &AstNode) -> Image {
        let mut program = build_program(ast).unwrap();
        let layout = assign_code_offsets(&mut program).unwrap();
        link(&program, &layout, &LinuxRuntime, false).unwrap()
    }

    fn u64_at(b: &[u8], at: usize) -> u64 {
        u64::from_le_bytes(b[at..at + 8].try_into().unwrap())
    }

    fn two_functions() -> AstNode {
        AstNode::program(vec![
            AstNode::func("helper", &[], vec![AstNode::ret(AstNode::number(1))]),
            AstNode::func("main", &[], vec![AstNode::ret(AstNode::number(42))]),
        ])
    }

    #[test]
    fn test_headers() {
        let image = image(&two_functions());
        let elf = build_elf(&image, &ElfOptions::default()).unwrap();
        assert_eq!(&elf[0..4], b"\x7FELF");
        assert_eq!(elf[4], 2);
        assert_eq!(u64_at(&elf, 24), DEFAULT_LOAD_ADDRESS);
        assert_eq!(u64_at(&elf, 32), EHDR_SIZE);

        let ph = EHDR_SIZE as usize;
        assert_eq!(u32::from_le_bytes(elf[ph..ph + 4].try_into().unwrap()), 1);
        assert_eq!(u64_at(&elf, ph + 16), 0x400000);
        let filesz = u64_at(&elf, ph + 32);
        let memsz = u64_at(&elf, ph + 40);
        assert_eq!(filesz, elf.len() as u64);
        assert!(memsz >= filesz + DEFAULT_DATA_BYTES);
    }

    #[test]
    fn test_stub_calls_entry() {
        let image = image(&two_functions());
        let elf = build_elf(&image, &ElfOptions::default()).unwrap();
        let stub = HEADERS_SIZE as usize;
        assert_eq!(&elf[stub..stub + 2], &[0x49, 0xB9]);
        let data_addr = u64_at(&elf, stub + 2);
        assert_eq!(data_addr % 16, 0);
        assert!(data_addr >= 0x400000 + elf.len() as u64);

        assert_eq!(elf[stub + 10], 0xE8);
        let rel = i32::from_le_bytes(elf[stub + 11..stub + 15].try_into().unwrap());
        let target = stub as i64 + 15 + rel as i64;
        let main = image.symbols.get("main").unwrap() as i64;
        assert_eq!(target, stub as i64 + STUB_LEN as i64 + main);
        // main's prologue
        assert_eq!(elf[target as usize], 0x49);
        assert_eq!(&elf[stub + 15..stub + STUB_LEN], &[0x48, 0x89, 0xC7, 0xB8, 0x3C, 0, 0, 0, 0x0F, 0x05]);
    }

    #[test]
    fn test_missing_entry() {
        let ast = AstNode::program(vec![AstNode::func(
            "start",
            &[],
            vec![AstNode::ret(AstNode::number(0))],
        )]);
        let err = build_elf(&image(&ast), &ElfOptions::default()).unwrap_err();
        assert!(matches!(err, CompileError::UndefinedSymbol(name) if name == "main"));

        let opts = ElfOptions {
            entry: "start".to_string(),
            ..ElfOptions::default()
        };
        assert!(build_elf(&image(&ast), &opts).is_ok());
    }

    #[test]
    fn test_misaligned_load_address() {
        let opts = ElfOptions {
            load_address: 0x400000,
            ..ElfOptions::default()
        };
        assert!(matches!(
            build_elf(&image(&two_functions()), &opts),
            Err(CompileError::Config(_))
        ));
    }

    #[test]
    fn test_data_area_size() {
        let opts = ElfOptions {
            data_bytes: 4096,
            ..ElfOptions::default()
        };
        let elf = build_elf(&image(&two_functions()), &opts).unwrap();
        let ph = EHDR_SIZE as usize;
        let filesz = u64_at(&elf, ph + 32);
        let memsz = u64_at(&elf, ph + 40);
        assert_eq!(memsz, filesz.next_multiple_of(16) + 4096);

        // The limit word ends the file and marks the end of the data area.
        let data_addr = u64_at(&elf, HEADERS_SIZE as usize + 2);
        assert_eq!(u64_at(&elf, elf.len() - 8), data_addr + 4096);
    }

    #[cfg(unix)]
    #[test]
    fn test_write_executable_mode() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("prog");
        write_executable(&path, b"\x7FELF").unwrap();
        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o755);
        assert_eq!(std::fs::read(&path).unwrap(), b"\x7FELF");
    }
}
