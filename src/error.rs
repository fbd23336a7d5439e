//! The single error type shared by every pipeline stage.

use thiserror::Error;

use crate::ir::name::MAX_NAME_LEN;
use crate::span::Span;
use crate::x86::SLOT_SIZE;

pub type Result<T> = std::result::Result<T, CompileError>;

#[derive(Debug, Error)]
pub enum CompileError {
    // ── AST structure ──
    #[error("function node has no {0} child")]
    MissingFunctionPart(&'static str),
    #[error("{context} node has no {child} child")]
    MissingChild {
        context: &'static str,
        child: &'static str,
    },
    #[error("unknown keyword `{0}`")]
    UnknownKeyword(String),
    #[error("unexpected {found} node in {context}")]
    UnexpectedNode {
        found: String,
        context: &'static str,
    },
    #[error("assignment target must be a variable, found {0}")]
    InvalidAssignTarget(String),
    #[error("literal {0} does not fit in a signed 32-bit immediate")]
    LiteralOutOfRange(i64),
    #[error("`{0}` is not a valid identifier")]
    InvalidIdentifier(String),
    #[error("name `{name}` is longer than {max} bytes ({len})", max = MAX_NAME_LEN)]
    NameTooLong { name: String, len: usize },
    #[error("program contains no functions")]
    EmptyProgram,

    // ── Name resolution ──
    #[error("undefined function `{0}`")]
    UndefinedFunction(String),
    #[error("function `{0}` is defined more than once")]
    DuplicateFunction(String),
    #[error("parameter `{name}` of `{function}` is declared more than once")]
    DuplicateParameter { function: String, name: String },
    #[error("function `{name}` takes {expected} argument(s) but {found} were supplied")]
    ArityMismatch {
        name: String,
        expected: usize,
        found: usize,
    },
    #[error("statement in `{function}` leaves {count} temporaries on the evaluation stack")]
    DanglingTemporary { function: String, count: i64 },

    // ── Control flow ──
    #[error("block `{block}` in `{function}` targets `{target}` outside the function")]
    ForeignBranchTarget {
        function: String,
        block: String,
        target: String,
    },
    #[error("block `{block}` in `{function}` is unreachable from the entry")]
    UnreachableBlock { function: String, block: String },
    #[error("merge block `{block}` in `{function}` is not reached from both arms")]
    MergeNotJoined { function: String, block: String },

    // ── Layout and emission ──
    #[error("undefined symbol `{0}`")]
    UndefinedSymbol(String),
    #[error("symbol `{0}` is defined more than once")]
    DuplicateSymbol(String),
    #[error("`{opcode}` encodes to {len} bytes, more than the {slot}-byte slot", slot = SLOT_SIZE)]
    SlotOverflow { opcode: String, len: usize },
    #[error("block `{block}` starts at byte {actual} but was laid out at {expected}")]
    LayoutMismatch {
        block: String,
        expected: usize,
        actual: usize,
    },
    #[error("variable `{variable}` of `{function}` has invalid frame offset {offset}")]
    FrameSlotConflict {
        function: String,
        variable: String,
        offset: u32,
    },
    #[error("malformed `{opcode}` command: {reason}")]
    MalformedCommand {
        opcode: String,
        reason: &'static str,
    },
    #[error("code image of {0} bytes exceeds the 32-bit displacement range")]
    ImageTooLarge(usize),

    // ── Execution ──
    #[error("division by zero")]
    DivisionByZero,
    #[error("division overflow: {0} / -1")]
    DivisionOverflow(i64),
    #[error("`{function}` ran past the end of the {bytes}-byte data stack")]
    DataStackOverflow { function: String, bytes: usize },
    #[error("call depth exceeded {0}")]
    CallDepthExceeded(usize),

    // ── Input and output ──
    #[error("malformed AST: {message}")]
    AstSyntax { message: String, span: Span },
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl CompileError {
    /// Source span for errors that point into an AST file.
    pub fn span(&self) -> Option<Span> {
        match self {
            CompileError::AstSyntax { span, .. } => Some(*span),
            _ => None,
        }
    }

    /// True for errors caused by malformed input rather than a compiler fault.
    pub fn is_user_error(&self) -> bool {
        !matches!(
            self,
            CompileError::SlotOverflow { .. }
                | CompileError::LayoutMismatch { .. }
                | CompileError::MalformedCommand { .. }
                | CompileError::FrameSlotConflict { .. }
        )
    }
}
