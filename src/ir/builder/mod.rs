//! IrBuilder: lowers the AST into a [`Program`].
//!
//! Lowering runs in two steps. First every function head is registered so
//! calls resolve regardless of definition order (including recursion).
//! Then each body is lowered by a [`FunctionBuilder`], which owns the
//! function under construction and borrows the translation-wide
//! [`BuildContext`].
//!
//! Shape of the output:
//! - block 0 is named after the function and starts with one PARAM-OUT per
//!   parameter, last parameter first;
//! - every `IF` opens `IF<n>`, optionally `ELSE<n>`, then `MERGE<n>`; each
//!   arm ends with a JMP to the merge block and the branch itself is
//!   appended to the block that was current before the `IF`;
//! - temporaries (`$t<n>`) never outlive the statement that made them.

mod call;
mod count;
mod expr;
mod stmt;

use std::collections::HashMap;

use tracing::debug;

use crate::ast::navigate::{self, FunctionDef};
use crate::ast::AstNode;
use crate::error::{CompileError, Result};
use crate::ir::{
    push_doubling, Block, BlockId, BlockRef, BlockRole, Command, FuncId, Function, Name, Opcode,
    Operand, Program, VarId,
};

pub use count::MERGE_CAPACITY;

/// Per-translation state. One builder owns one context, so independent
/// compiles never share label numbers.
#[derive(Debug, Default)]
pub struct BuildContext {
    next_if: u32,
}

impl BuildContext {
    /// Number for the next `IF<n>`/`ELSE<n>`/`MERGE<n>` triple.
    pub fn fresh_if_label(&mut self) -> u32 {
        let n = self.next_if;
        self.next_if += 1;
        n
    }
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct Signature {
    pub id: FuncId,
    pub arity: usize,
}

// ─── IrBuilder ─────────────────────────────────────────────────────

#[derive(Debug, Default)]
pub struct IrBuilder {
    ctx: BuildContext,
    signatures: HashMap<String, Signature>,
}

impl IrBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn build(mut self, ast: &AstNode) -> Result<Program> {
        let defs = navigate::functions(ast)?;

        for (i, def) in defs.iter().enumerate() {
            Name::identifier(def.name)?;
            if self.signatures.contains_key(def.name) {
                return Err(CompileError::DuplicateFunction(def.name.to_string()));
            }
            self.signatures.insert(
                def.name.to_string(),
                Signature {
                    id: FuncId(i as u32),
                    arity: def.params.len(),
                },
            );
        }

        let mut program = Program {
            functions: Vec::with_capacity(defs.len()),
        };
        for (i, def) in defs.iter().enumerate() {
            let func = self.lower_function(FuncId(i as u32), def)?;
            push_doubling(&mut program.functions, func);
        }
        Ok(program)
    }

    fn lower_function(&mut self, id: FuncId, def: &FunctionDef<'_>) -> Result<Function> {
        let name = Name::identifier(def.name)?;
        let body = Some(def.body);
        let mut func = Function::with_capacity(
            name.clone(),
            count::variables(body) + def.params.len(),
            count::blocks(body),
        );
        let entry_capacity = count::commands(body) + def.params.len();
        let entry = func.add_block(Block::with_capacity(name, entry_capacity));

        let mut fb = FunctionBuilder {
            ctx: &mut self.ctx,
            signatures: &self.signatures,
            func,
            id,
            current: entry,
            live_temps: 0,
        };
        fb.lower_params(&def.params)?;
        fb.lower_chain(body)?;
        Ok(fb.finish())
    }
}

/// Lower a whole program with a fresh builder.
pub fn build_program(ast: &AstNode) -> Result<Program> {
    IrBuilder::new().build(ast)
}

// ─── FunctionBuilder ───────────────────────────────────────────────

/// Lowers one function body.
pub(crate) struct FunctionBuilder<'b> {
    pub(crate) ctx: &'b mut BuildContext,
    pub(crate) signatures: &'b HashMap<String, Signature>,
    pub(crate) func: Function,
    pub(crate) id: FuncId,
    /// Block receiving new commands.
    pub(crate) current: BlockId,
    /// Temporaries produced minus temporaries consumed so far.
    pub(crate) live_temps: i64,
}

impl FunctionBuilder<'_> {
    fn finish(self) -> Function {
        debug!(
            function = %self.func.name,
            vars = self.func.vars.len(),
            temps = self.func.temp_count,
            blocks = self.func.blocks.len(),
            commands = self.func.command_count(),
            "lowered function"
        );
        self.func
    }

    fn lower_params(&mut self, params: &[&str]) -> Result<()> {
        let mut ids = Vec::with_capacity(params.len());
        for param in params {
            if self.func.find_var(param).is_some() {
                return Err(CompileError::DuplicateParameter {
                    function: self.func.name.to_string(),
                    name: param.to_string(),
                });
            }
            let name = Name::identifier(param)?;
            ids.push(self.func.add_var(name));
        }
        // Arguments arrive pushed left to right; pop the last one first.
        for id in ids.iter().rev() {
            self.push(Command::param_out(*id));
        }
        self.func.params = ids;
        Ok(())
    }

    /// Look up `name`, declaring it as a frame variable on first use.
    pub(crate) fn declare(&mut self, name: &str) -> Result<VarId> {
        if let Some(id) = self.func.find_var(name) {
            return Ok(id);
        }
        let name = Name::identifier(name)?;
        Ok(self.func.add_var(name))
    }

    pub(crate) fn block_ref(&self, block: BlockId) -> BlockRef {
        BlockRef {
            func: self.id,
            block,
        }
    }

    /// Append a block and make it current.
    pub(crate) fn open_block(
        &mut self,
        name: String,
        role: BlockRole,
        capacity: usize,
    ) -> Result<BlockId> {
        let block = Block::with_capacity(Name::new(name)?, capacity).with_role(role);
        let id = self.func.add_block(block);
        self.current = id;
        Ok(id)
    }

    pub(crate) fn push(&mut self, cmd: Command) {
        self.push_to(self.current, cmd);
    }

    /// Append `cmd` to `block`, keeping the temporary balance.
    pub(crate) fn push_to(&mut self, block: BlockId, cmd: Command) {
        let consumed = cmd
            .sources()
            .filter(|op| self.is_temp(op))
            .count() as i64;
        let produced = match (&cmd.dest, cmd.opcode) {
            (Some(dest), op) if op != Opcode::If && self.is_temp(dest) => 1,
            _ => 0,
        };
        self.live_temps += produced - consumed;
        self.func.block_mut(block).push(cmd);
    }

    fn is_temp(&self, op: &Operand) -> bool {
        op.as_var()
            .map_or(false, |id| self.func.var(id).storage.is_temporary())
    }
}
