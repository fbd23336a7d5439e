//! Three-address IR between the AST and x86-64 machine code.
//!
//! A [`Program`] owns its [`Function`]s; each function owns a variable
//! table and an ordered list of [`Block`]s, and each block a flat list of
//! [`Command`]s. Operands are small values: literals, indices into the
//! owning function's variable table, or `(function, block)` references.
//!
//! Layout order is creation order: a function's first block is its entry
//! and is named after the function; `IF<n>`, `ELSE<n>` and `MERGE<n>`
//! blocks follow in the order the builder opened them.

pub mod builder;
pub mod dump;
pub mod name;
pub mod verify;

use std::fmt;

pub use name::{Name, MAX_NAME_LEN};

/// Size in bytes of every value the IR manipulates.
pub const WORD_SIZE: u32 = 8;

// ─── Identifiers ──────────────────────────────────────────────────

/// Index into a function's variable table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VarId(pub u32);

/// Index into a function's block list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlockId(pub u32);

/// Index into the program's function list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FuncId(pub u32);

/// A block anywhere in the program. Calls target another function's entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlockRef {
    pub func: FuncId,
    pub block: BlockId,
}

impl BlockRef {
    pub fn entry(func: FuncId) -> Self {
        Self {
            func,
            block: BlockId(0),
        }
    }
}

// ─── Variables ────────────────────────────────────────────────────

/// Where a variable's value lives while its function runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Storage {
    /// Call result, delivered in the return register.
    Register,
    /// Frame slot at `[base - offset]`.
    Memory { offset: u32 },
    /// Intermediate value on the evaluation stack.
    Stack,
}

impl Storage {
    /// Temporaries live on the evaluation stack and have no frame slot.
    pub fn is_temporary(&self) -> bool {
        !matches!(self, Storage::Memory { .. })
    }

    pub fn offset(&self) -> Option<u32> {
        match self {
            Storage::Memory { offset } => Some(*offset),
            _ => None,
        }
    }
}

impl fmt::Display for Storage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Storage::Register => write!(f, "register"),
            Storage::Memory { offset } => write!(f, "memory[-{}]", offset),
            Storage::Stack => write!(f, "stack"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Variable {
    pub name: Name,
    pub storage: Storage,
}

// ─── Operands and commands ────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operand {
    Number(i32),
    Var(VarId),
    Block(BlockRef),
}

impl Operand {
    pub fn as_var(&self) -> Option<VarId> {
        match self {
            Operand::Var(id) => Some(*id),
            _ => None,
        }
    }

    pub fn as_block(&self) -> Option<BlockRef> {
        match self {
            Operand::Block(b) => Some(*b),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Opcode {
    Add,
    Sub,
    Mul,
    Div,
    /// Assignment: `dest = op1`.
    Eq,
    /// `if dest != 0 goto op1 else goto op2`.
    If,
    Jmp,
    Ret,
    Call,
    /// Push an argument before a call.
    ParamIn,
    /// Pop an incoming argument into its frame slot.
    ParamOut,
    Out,
    In,
    CmpEq,
    CmpNe,
    CmpLt,
    CmpGt,
    CmpLe,
    CmpGe,
}

impl Opcode {
    pub fn mnemonic(&self) -> &'static str {
        match self {
            Opcode::Add => "ADD",
            Opcode::Sub => "SUB",
            Opcode::Mul => "MUL",
            Opcode::Div => "DIV",
            Opcode::Eq => "EQ",
            Opcode::If => "IF",
            Opcode::Jmp => "JMP",
            Opcode::Ret => "RET",
            Opcode::Call => "CALL",
            Opcode::ParamIn => "PARIN",
            Opcode::ParamOut => "PAROUT",
            Opcode::Out => "OUT",
            Opcode::In => "IN",
            Opcode::CmpEq => "CMPEQ",
            Opcode::CmpNe => "CMPNE",
            Opcode::CmpLt => "CMPLT",
            Opcode::CmpGt => "CMPGT",
            Opcode::CmpLe => "CMPLE",
            Opcode::CmpGe => "CMPGE",
        }
    }

    pub fn is_arithmetic(&self) -> bool {
        matches!(self, Opcode::Add | Opcode::Sub | Opcode::Mul | Opcode::Div)
    }

    pub fn is_comparison(&self) -> bool {
        matches!(
            self,
            Opcode::CmpEq
                | Opcode::CmpNe
                | Opcode::CmpLt
                | Opcode::CmpGt
                | Opcode::CmpLe
                | Opcode::CmpGe
        )
    }

    /// Two sources, optional result pushed on the evaluation stack.
    pub fn is_binary(&self) -> bool {
        self.is_arithmetic() || self.is_comparison()
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.mnemonic())
    }
}

/// One three-address instruction. Slot meaning depends on the opcode;
/// the constructors below are the only shapes the builder produces.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    pub opcode: Opcode,
    pub op1: Option<Operand>,
    pub op2: Option<Operand>,
    pub dest: Option<Operand>,
}

impl Command {
    fn new(
        opcode: Opcode,
        op1: Option<Operand>,
        op2: Option<Operand>,
        dest: Option<Operand>,
    ) -> Self {
        Self {
            opcode,
            op1,
            op2,
            dest,
        }
    }

    /// `dest = lhs <op> rhs`; without a dest the result is discarded.
    pub fn binary(opcode: Opcode, lhs: Operand, rhs: Operand, dest: Option<VarId>) -> Self {
        debug_assert!(opcode.is_binary());
        Self::new(opcode, Some(lhs), Some(rhs), dest.map(Operand::Var))
    }

    pub fn assign(src: Operand, dest: VarId) -> Self {
        Self::new(Opcode::Eq, Some(src), None, Some(Operand::Var(dest)))
    }

    pub fn branch(cond: Operand, if_true: BlockRef, if_false: BlockRef) -> Self {
        Self::new(
            Opcode::If,
            Some(Operand::Block(if_true)),
            Some(Operand::Block(if_false)),
            Some(cond),
        )
    }

    pub fn jump(target: BlockRef) -> Self {
        Self::new(Opcode::Jmp, Some(Operand::Block(target)), None, None)
    }

    pub fn ret(value: Operand) -> Self {
        Self::new(Opcode::Ret, Some(value), None, None)
    }

    pub fn call(callee: FuncId, dest: Option<VarId>) -> Self {
        Self::new(
            Opcode::Call,
            Some(Operand::Block(BlockRef::entry(callee))),
            None,
            dest.map(Operand::Var),
        )
    }

    pub fn param_in(value: Operand) -> Self {
        Self::new(Opcode::ParamIn, Some(value), None, None)
    }

    pub fn param_out(param: VarId) -> Self {
        Self::new(Opcode::ParamOut, None, None, Some(Operand::Var(param)))
    }

    pub fn out(value: Operand) -> Self {
        Self::new(Opcode::Out, Some(value), None, None)
    }

    pub fn input(dest: VarId) -> Self {
        Self::new(Opcode::In, None, None, Some(Operand::Var(dest)))
    }

    /// Operands this command reads, in slot order.
    pub fn sources(&self) -> impl Iterator<Item = &Operand> {
        let dest_read = matches!(self.opcode, Opcode::If);
        self.op1
            .iter()
            .chain(self.op2.iter())
            .chain(self.dest.iter().filter(move |_| dest_read))
    }

    /// Blocks this command may transfer control to within its function.
    pub fn branch_targets(&self) -> Vec<BlockRef> {
        match self.opcode {
            Opcode::If | Opcode::Jmp => self
                .op1
                .iter()
                .chain(self.op2.iter())
                .filter_map(Operand::as_block)
                .collect(),
            _ => Vec::new(),
        }
    }
}

/// Append `item`, doubling the capacity when the vector is full.
///
/// IR arrays start at the capacity computed by the builder's pre-sizing
/// pass; this keeps growth geometric no matter what the allocator does.
pub fn push_doubling<T>(vec: &mut Vec<T>, item: T) {
    if vec.len() == vec.capacity() {
        let extra = vec.capacity().max(1);
        vec.reserve_exact(extra);
    }
    vec.push(item);
}

// ─── Blocks, functions, program ───────────────────────────────────

/// What opened a block. Labels are only for display; checks that care
/// about the shape of an `IF` look at the role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BlockRole {
    Entry,
    Then,
    Else,
    Merge,
}

#[derive(Debug, Clone)]
pub struct Block {
    pub name: Name,
    pub role: BlockRole,
    pub commands: Vec<Command>,
    /// Byte offset in the code buffer; set by `layout::assign_code_offsets`.
    pub code_offset: Option<u32>,
}

impl Block {
    pub fn with_capacity(name: Name, capacity: usize) -> Self {
        Self {
            name,
            role: BlockRole::Entry,
            commands: Vec::with_capacity(capacity.max(1)),
            code_offset: None,
        }
    }

    pub fn with_role(mut self, role: BlockRole) -> Self {
        self.role = role;
        self
    }

    pub fn push(&mut self, cmd: Command) {
        push_doubling(&mut self.commands, cmd);
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct Function {
    pub name: Name,
    /// Parameter variables in declaration order.
    pub params: Vec<VarId>,
    pub vars: Vec<Variable>,
    pub blocks: Vec<Block>,
    /// Synthesized temporaries in `vars`; they have no frame slot.
    pub temp_count: u32,
}

impl Function {
    pub fn with_capacity(name: Name, vars: usize, blocks: usize) -> Self {
        Self {
            name,
            params: Vec::new(),
            vars: Vec::with_capacity(vars.max(1)),
            blocks: Vec::with_capacity(blocks.max(1)),
            temp_count: 0,
        }
    }

    /// Add a named frame variable. Its offset is fixed now, from the number
    /// of named variables already present, so later additions never move it.
    pub fn add_var(&mut self, name: Name) -> VarId {
        let named = self.vars.len() as u32 - self.temp_count;
        let offset = (named + 1) * WORD_SIZE;
        self.push_var(Variable {
            name,
            storage: Storage::Memory { offset },
        })
    }

    /// Add a synthesized temporary named `$t<n>`.
    pub fn add_temp(&mut self, storage: Storage) -> VarId {
        debug_assert!(storage.is_temporary());
        let name = Name::new(format!("$t{}", self.temp_count))
            .unwrap_or_else(|_| unreachable!("temporary names are short"));
        self.temp_count += 1;
        self.push_var(Variable { name, storage })
    }

    fn push_var(&mut self, var: Variable) -> VarId {
        let id = VarId(self.vars.len() as u32);
        push_doubling(&mut self.vars, var);
        id
    }

    pub fn add_block(&mut self, block: Block) -> BlockId {
        let id = BlockId(self.blocks.len() as u32);
        push_doubling(&mut self.blocks, block);
        id
    }

    pub fn find_var(&self, name: &str) -> Option<VarId> {
        self.vars
            .iter()
            .position(|v| v.name == name)
            .map(|i| VarId(i as u32))
    }

    pub fn var(&self, id: VarId) -> &Variable {
        &self.vars[id.0 as usize]
    }

    pub fn block(&self, id: BlockId) -> &Block {
        &self.blocks[id.0 as usize]
    }

    pub fn block_mut(&mut self, id: BlockId) -> &mut Block {
        &mut self.blocks[id.0 as usize]
    }

    pub fn entry(&self) -> &Block {
        &self.blocks[0]
    }

    pub fn arity(&self) -> usize {
        self.params.len()
    }

    pub fn named_var_count(&self) -> u32 {
        self.vars.len() as u32 - self.temp_count
    }

    /// Bytes the prologue adds to (and every exit subtracts from) the frame
    /// base register.
    pub fn frame_bytes(&self) -> u32 {
        self.named_var_count() * WORD_SIZE
    }

    pub fn command_count(&self) -> usize {
        self.blocks.iter().map(Block::len).sum()
    }
}

#[derive(Debug, Clone, Default)]
pub struct Program {
    pub functions: Vec<Function>,
}

impl Program {
    pub fn function(&self, id: FuncId) -> &Function {
        &self.functions[id.0 as usize]
    }

    pub fn find_function(&self, name: &str) -> Option<FuncId> {
        self.functions
            .iter()
            .position(|f| f.name == name)
            .map(|i| FuncId(i as u32))
    }

    pub fn block(&self, r: BlockRef) -> &Block {
        self.function(r.func).block(r.block)
    }

    pub fn command_count(&self) -> usize {
        self.functions.iter().map(Function::command_count).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn name(s: &str) -> Name {
        Name::new(s).unwrap()
    }

    #[test]
    fn test_offsets_skip_temporaries() {
        let mut f = Function::with_capacity(name("f"), 4, 1);
        let a = f.add_var(name("a"));
        let t = f.add_temp(Storage::Stack);
        let b = f.add_var(name("b"));
        assert_eq!(f.var(a).storage, Storage::Memory { offset: 8 });
        assert_eq!(f.var(t).storage, Storage::Stack);
        assert_eq!(f.var(t).name, "$t0");
        assert_eq!(f.var(b).storage, Storage::Memory { offset: 16 });
        assert_eq!(f.temp_count, 1);
        assert_eq!(f.frame_bytes(), 16);
    }

    #[test]
    fn test_find_var() {
        let mut f = Function::with_capacity(name("f"), 2, 1);
        let x = f.add_var(name("x"));
        assert_eq!(f.find_var("x"), Some(x));
        assert_eq!(f.find_var("y"), None);
    }

    #[test]
    fn test_push_doubling_grows_geometrically() {
        let mut v: Vec<u32> = Vec::with_capacity(3);
        for i in 0..3 {
            push_doubling(&mut v, i);
        }
        assert_eq!(v.capacity(), 3);
        push_doubling(&mut v, 3);
        assert!(v.capacity() >= 6);
        assert_eq!(v, vec![0, 1, 2, 3]);

        let mut empty: Vec<u8> = Vec::new();
        push_doubling(&mut empty, 1);
        assert_eq!(empty.len(), 1);
    }

    #[test]
    fn test_branch_command_shape() {
        let t = BlockRef {
            func: FuncId(0),
            block: BlockId(1),
        };
        let e = BlockRef {
            func: FuncId(0),
            block: BlockId(2),
        };
        let cmd = Command::branch(Operand::Var(VarId(0)), t, e);
        assert_eq!(cmd.opcode, Opcode::If);
        assert_eq!(cmd.branch_targets(), vec![t, e]);
        assert_eq!(cmd.sources().count(), 3);

        let call = Command::call(FuncId(1), Some(VarId(3)));
        assert!(call.branch_targets().is_empty());
        assert_eq!(call.op1, Some(Operand::Block(BlockRef::entry(FuncId(1)))));
    }

    #[test]
    fn test_opcode_classes() {
        assert!(Opcode::Div.is_arithmetic());
        assert!(Opcode::CmpLe.is_comparison());
        assert!(!Opcode::Eq.is_binary());
        assert_eq!(Opcode::ParamOut.to_string(), "PAROUT");
    }
}
