//! Symbol/offset resolution: frame slots and code offsets.
//!
//! Frame offsets are fixed when a variable is added (see
//! [`Function::add_var`]); this module only exposes and checks them. Code
//! offsets come from a sizing pass over the finished IR: every function is
//! a fixed-size prologue, one [`SLOT_SIZE`] slot per command, and a
//! fixed-size epilogue, so the pass never looks at operand values.

use std::collections::HashMap;

use tracing::debug;

use crate::error::{CompileError, Result};
use crate::ir::{Function, Name, Program, Variable, WORD_SIZE};
use crate::x86::SLOT_SIZE;

/// `add r9, imm32; cmp r9, [rip + limit]; ja overflow`.
pub const PROLOGUE_LEN: u32 = 20;
/// `xor eax, eax; sub r9, imm32; ret`.
pub const EPILOGUE_LEN: u32 = 10;

// ─── Symbol table ──────────────────────────────────────────────────

/// Name → code offset, in insertion (layout) order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SymbolTable {
    entries: Vec<(Name, u32)>,
    index: HashMap<String, usize>,
}

impl SymbolTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: &Name, offset: u32) -> Result<()> {
        if self.index.contains_key(name.as_str()) {
            return Err(CompileError::DuplicateSymbol(name.to_string()));
        }
        self.index.insert(name.to_string(), self.entries.len());
        self.entries.push((name.clone(), offset));
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<u32> {
        self.index.get(name).map(|&i| self.entries[i].1)
    }

    /// Like [`SymbolTable::get`], but a missing name is an error.
    pub fn resolve(&self, name: &str) -> Result<u32> {
        self.get(name)
            .ok_or_else(|| CompileError::UndefinedSymbol(name.to_string()))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, u32)> {
        self.entries.iter().map(|(n, off)| (n.as_str(), *off))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// ─── Sizing pass ───────────────────────────────────────────────────

/// Result of [`assign_code_offsets`].
#[derive(Debug, Clone)]
pub struct Layout {
    pub symbols: SymbolTable,
    /// Bytes of generated code; the runtime routines start here.
    pub code_len: u32,
}

/// Encoded size of a function.
pub fn function_size(func: &Function) -> u32 {
    PROLOGUE_LEN + func.command_count() as u32 * SLOT_SIZE + EPILOGUE_LEN
}

/// Assign every block its `code_offset` and build the symbol table.
///
/// A function's entry block is recorded at the function start (before the
/// prologue), since calls target the function itself. Later blocks start
/// after their predecessors' slots. The pass depends only on the shape of
/// the IR, so running it twice yields the same offsets.
pub fn assign_code_offsets(program: &mut Program) -> Result<Layout> {
    let mut symbols = SymbolTable::new();
    let mut offset: u64 = 0;

    for func in &mut program.functions {
        let start = offset;
        offset += PROLOGUE_LEN as u64;
        for (i, block) in func.blocks.iter_mut().enumerate() {
            let block_start = if i == 0 { start } else { offset };
            let block_start = u32::try_from(block_start)
                .map_err(|_| CompileError::ImageTooLarge(block_start as usize))?;
            block.code_offset = Some(block_start);
            symbols.insert(&block.name, block_start)?;
            offset += block.len() as u64 * SLOT_SIZE as u64;
        }
        offset += EPILOGUE_LEN as u64;
        debug!(
            function = %func.name,
            start,
            size = offset - start,
            "laid out function"
        );
    }

    if offset > i32::MAX as u64 {
        return Err(CompileError::ImageTooLarge(offset as usize));
    }
    Ok(Layout {
        symbols,
        code_len: offset as u32,
    })
}

// ─── Frame layout ──────────────────────────────────────────────────

/// Named variables of `func` with their frame offsets, in table order.
pub fn frame_slots(func: &Function) -> impl Iterator<Item = (&Variable, u32)> {
    func.vars
        .iter()
        .filter_map(|v| v.storage.offset().map(|off| (v, off)))
}

/// Check that frame offsets are distinct word multiples inside the frame.
pub fn check_frame(func: &Function) -> Result<()> {
    let frame = func.frame_bytes();
    let mut seen = vec![false; (frame / WORD_SIZE) as usize];
    for (var, offset) in frame_slots(func) {
        let slot = (offset / WORD_SIZE) as usize;
        let valid = offset % WORD_SIZE == 0 && offset >= WORD_SIZE && offset <= frame;
        if !valid || seen[slot - 1] {
            return Err(CompileError::FrameSlotConflict {
                function: func.name.to_string(),
                variable: var.name.to_string(),
                offset,
            });
        }
        seen[slot - 1] = true;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{AstNode, Operator};
    use crate::ir::builder::build_program;
    use crate::ir::Storage;

    fn sample() -> Program {
        let ast = AstNode::program(vec![
            AstNode::func(
                "main",
                &[],
                vec![AstNode::ret(AstNode::call("f", vec![AstNode::number(4)]))],
            ),
            AstNode::func(
                "f",
                &["x"],
                vec![
                    AstNode::if_else(
                        AstNode::op(Operator::Equal, AstNode::var("x"), AstNode::number(0)),
                        vec![AstNode::assign("b", AstNode::number(1))],
                        vec![AstNode::assign("b", AstNode::number(2))],
                    ),
                    AstNode::ret(AstNode::op(Operator::Add, AstNode::var("x"), AstNode::var("b"))),
                ],
            ),
        ]);
        build_program(&ast).unwrap()
    }

    #[test]
    fn test_offsets_follow_slot_sizes() {
        let mut program = sample();
        let layout = assign_code_offsets(&mut program).unwrap();

        // main: prologue, 3 commands (PARIN, CALL, RET), epilogue.
        let main_size = PROLOGUE_LEN + 3 * SLOT_SIZE + EPILOGUE_LEN;
        assert_eq!(layout.symbols.get("main"), Some(0));
        assert_eq!(layout.symbols.get("f"), Some(main_size));

        // f: entry has PAROUT, CMPEQ, IF.
        let f_body = main_size + PROLOGUE_LEN;
        assert_eq!(layout.symbols.get("IF0"), Some(f_body + 3 * SLOT_SIZE));
        assert_eq!(layout.symbols.get("ELSE0"), Some(f_body + 5 * SLOT_SIZE));
        assert_eq!(layout.symbols.get("MERGE0"), Some(f_body + 7 * SLOT_SIZE));
        let f_size = function_size(&program.functions[1]);
        assert_eq!(layout.code_len, main_size + f_size);
        assert_eq!(
            program.functions[1].blocks[3].code_offset,
            layout.symbols.get("MERGE0")
        );
    }

    #[test]
    fn test_offsets_are_deterministic_and_distinct() {
        let mut program = sample();
        let first = assign_code_offsets(&mut program).unwrap();
        let offsets: Vec<Option<u32>> = program
            .functions
            .iter()
            .flat_map(|f| f.blocks.iter().map(|b| b.code_offset))
            .collect();
        let second = assign_code_offsets(&mut program).unwrap();
        let again: Vec<Option<u32>> = program
            .functions
            .iter()
            .flat_map(|f| f.blocks.iter().map(|b| b.code_offset))
            .collect();
        assert_eq!(offsets, again);
        assert_eq!(first.symbols, second.symbols);

        let mut sorted = offsets.clone();
        sorted.sort();
        sorted.dedup();
        assert_eq!(sorted.len(), offsets.len());
    }

    #[test]
    fn test_duplicate_symbol() {
        // A function whose name collides with a synthesized label.
        let ast = AstNode::program(vec![
            AstNode::func(
                "main",
                &[],
                vec![AstNode::if_then(AstNode::number(1), vec![])],
            ),
            AstNode::func("IF0", &[], vec![AstNode::ret(AstNode::number(0))]),
        ]);
        let mut program = build_program(&ast).unwrap();
        assert!(matches!(
            assign_code_offsets(&mut program),
            Err(CompileError::DuplicateSymbol(name)) if name == "IF0"
        ));
    }

    #[test]
    fn test_symbol_table_lookup() {
        let mut table = SymbolTable::new();
        table.insert(&Name::new("a").unwrap(), 0).unwrap();
        table.insert(&Name::new("b").unwrap(), 64).unwrap();
        assert_eq!(table.resolve("b").unwrap(), 64);
        assert!(matches!(
            table.resolve("c"),
            Err(CompileError::UndefinedSymbol(_))
        ));
        let names: Vec<&str> = table.iter().map(|(n, _)| n).collect();
        assert_eq!(names, vec!["a", "b"]);
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn test_frame_invariant() {
        let program = sample();
        for func in &program.functions {
            check_frame(func).unwrap();
            let named = func.vars.iter().filter(|v| !v.storage.is_temporary()).count() as u32;
            assert_eq!(func.frame_bytes(), named * WORD_SIZE);
            assert_eq!(
                func.frame_bytes(),
                (func.vars.len() as u32 - func.temp_count) * WORD_SIZE
            );
        }
    }

    #[test]
    fn test_frame_conflict_detected() {
        let mut program = sample();
        let f = &mut program.functions[1];
        f.vars[0].storage = Storage::Memory { offset: 16 };
        assert!(matches!(
            check_frame(f),
            Err(CompileError::FrameSlotConflict { .. })
        ));
    }
}
