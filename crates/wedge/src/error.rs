use thiserror::Error;

use crate::module::types::ValType;
use crate::value::Val;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Top-level error returned by every fallible engine operation.
#[derive(Debug, Error)]
pub enum Error {
    /// A value, or a list of values, did not have the declared types.
    #[error("type mismatch: expected {}, found {}", type_list(.expected), type_list(.found))]
    TypeNotMatch {
        expected: Vec<ValType>,
        found: Vec<ValType>,
    },

    #[error("cannot write to an immutable global")]
    ImmutableGlobal,

    #[error(transparent)]
    Link(#[from] LinkError),

    /// An active segment did not fit its target during instantiation.
    /// Segments applied before the failing one keep their writes.
    #[error("instantiation trap: {0}")]
    InstantiationTrap(Trap),

    #[error("trap: {0}")]
    Trap(#[from] Trap),

    #[error("invalid module: {0}")]
    Load(String),

    #[error("unsupported feature: {0}")]
    Unsupported(String),

    #[error("invalid {kind} address {addr}")]
    InvalidAddress { kind: &'static str, addr: u32 },

    /// A linker definition was made in one store and resolved in another.
    #[error("import `{module}::{name}` is defined in a different store")]
    WrongStore { module: String, name: String },

    #[error("export `{0}` not found")]
    ExportNotFound(String),

    #[error("resource handle {handle} is lent out {lend_count} time(s)")]
    ResourceBorrowed { handle: u32, lend_count: u32 },

    #[error("resource handle {0} is already being transferred")]
    ResourceConsumed(u32),

    #[error("unknown resource handle {0}")]
    UnknownHandle(u32),

    #[error("resource table is full")]
    ResourceTableFull,

    #[error("resource handle {handle} does not have the expected resource type")]
    ResourceTypeMismatch { handle: u32 },

    #[error("task {task} completed with {count} outstanding borrow(s)")]
    DanglingBorrow { task: u32, count: u32 },

    #[error("borrow handle {0} does not belong to the calling task")]
    BorrowScopeMismatch(u32),

    #[error("canonical ABI: {0}")]
    Canonical(String),

    /// An internal invariant of the engine did not hold.
    #[error("engine fault: {0}")]
    Fault(&'static str),

    #[error(transparent)]
    Parse(#[from] wasmparser::BinaryReaderError),

    #[error(transparent)]
    Wat(#[from] wat::Error),
}

impl Error {
    /// The trap carried by this error, if it is one.
    pub fn trap(&self) -> Option<&Trap> {
        match self {
            Error::Trap(trap) | Error::InstantiationTrap(trap) => Some(trap),
            _ => None,
        }
    }
}

fn type_list(tys: &[ValType]) -> String {
    match tys {
        [ty] => ty.to_string(),
        _ => {
            let names: Vec<String> = tys.iter().map(ValType::to_string).collect();
            format!("[{}]", names.join(", "))
        }
    }
}

/// Failures while resolving imports or evaluating initializers.
#[derive(Debug, Error)]
pub enum LinkError {
    #[error("unknown import `{module}::{name}`")]
    UnknownImport { module: String, name: String },

    #[error("incompatible import type for `{module}::{name}`: {reason}")]
    IncompatibleImportType {
        module: String,
        name: String,
        reason: String,
    },

    #[error("invalid initializer: {0}")]
    InvalidInitializer(String),

    #[error("invalid limits: {0}")]
    InvalidLimits(String),

    #[error("cannot allocate {0} bytes of linear memory")]
    OutOfMemory(u64),
}

/// Runtime traps. Execution stops at the trapping instruction; writes that
/// were already committed stay in place.
#[derive(Debug, Clone, Error)]
pub enum Trap {
    #[error("unreachable executed")]
    Unreachable,

    #[error("out of bounds memory access")]
    MemoryOutOfBounds,

    #[error("out of bounds table access")]
    TableOutOfBounds,

    #[error("indirect call type mismatch")]
    IndirectCallTypeMismatch,

    #[error("undefined element")]
    UndefinedElement,

    #[error("call stack exhausted")]
    StackExhausted,

    #[error("integer divide by zero")]
    IntegerDivideByZero,

    #[error("integer overflow")]
    IntegerOverflow,

    #[error("invalid conversion to integer")]
    InvalidConversionToInteger,

    #[error("unaligned atomic access")]
    UnalignedAtomic,

    #[error("null reference")]
    NullReference,

    #[error("uncaught exception with tag {tag}")]
    UncaughtException { tag: u32, payload: Vec<Val> },

    #[error("cost limit exceeded")]
    CostLimitExceeded,

    #[error("exit with code {code}")]
    Exit { code: i32 },

    #[error("host error: {0}")]
    Host(String),
}
