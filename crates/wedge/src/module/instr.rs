//! Decoded instruction stream.
//!
//! Operators are converted from `wasmparser::Operator` once at load time.
//! Structured control flow is resolved to absolute instruction indices so the
//! interpreter never scans for matching `end`s. Variable-length immediates
//! (`br_table` targets, `catch` clauses) live in side tables so that
//! [`Instr`] stays `Copy`.

use wasmparser::Operator;

use crate::error::{Error, Result};
use crate::module::types::{FuncType, ValType};

/// Sentinel for an `if` without an `else` arm.
pub const NO_ELSE: u32 = u32::MAX;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockArity {
    pub params: u32,
    pub results: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemArg {
    pub offset: u64,
    pub align: u8,
    pub memory: u32,
}

impl MemArg {
    fn from_parser(m: &wasmparser::MemArg) -> Self {
        MemArg {
            offset: m.offset,
            align: m.align,
            memory: m.memory,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadKind {
    I32,
    I64,
    F32,
    F64,
    I32S8,
    I32U8,
    I32S16,
    I32U16,
    I64S8,
    I64U8,
    I64S16,
    I64U16,
    I64S32,
    I64U32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreKind {
    I32,
    I64,
    F32,
    F64,
    I32As8,
    I32As16,
    I64As8,
    I64As16,
    I64As32,
}

/// Operand type and access width of an atomic memory operation. Narrow
/// accesses are always zero-extended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AtomicKind {
    I32,
    I64,
    I32U8,
    I32U16,
    I64U8,
    I64U16,
    I64U32,
}

impl AtomicKind {
    pub fn width(self) -> u64 {
        match self {
            AtomicKind::I32U8 | AtomicKind::I64U8 => 1,
            AtomicKind::I32U16 | AtomicKind::I64U16 => 2,
            AtomicKind::I32 | AtomicKind::I64U32 => 4,
            AtomicKind::I64 => 8,
        }
    }

    pub fn is_i64(self) -> bool {
        matches!(
            self,
            AtomicKind::I64 | AtomicKind::I64U8 | AtomicKind::I64U16 | AtomicKind::I64U32
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RmwOp {
    Add,
    Sub,
    And,
    Or,
    Xor,
    Xchg,
}

macro_rules! numeric_ops {
    ($($name:ident)*) => {
        /// Stack-only numeric operators. Variant names follow the operator
        /// names of the binary format.
        #[derive(Debug, Clone, Copy, PartialEq, Eq)]
        pub enum NumOp {
            $($name,)*
        }

        impl NumOp {
            fn from_operator(op: &Operator<'_>) -> Option<NumOp> {
                match op {
                    $(Operator::$name => Some(NumOp::$name),)*
                    _ => None,
                }
            }
        }
    };
}

numeric_ops! {
    I32Eqz I32Eq I32Ne I32LtS I32LtU I32GtS I32GtU I32LeS I32LeU I32GeS I32GeU
    I64Eqz I64Eq I64Ne I64LtS I64LtU I64GtS I64GtU I64LeS I64LeU I64GeS I64GeU
    F32Eq F32Ne F32Lt F32Gt F32Le F32Ge
    F64Eq F64Ne F64Lt F64Gt F64Le F64Ge
    I32Clz I32Ctz I32Popcnt I32Add I32Sub I32Mul I32DivS I32DivU I32RemS I32RemU
    I32And I32Or I32Xor I32Shl I32ShrS I32ShrU I32Rotl I32Rotr
    I64Clz I64Ctz I64Popcnt I64Add I64Sub I64Mul I64DivS I64DivU I64RemS I64RemU
    I64And I64Or I64Xor I64Shl I64ShrS I64ShrU I64Rotl I64Rotr
    F32Abs F32Neg F32Ceil F32Floor F32Trunc F32Nearest F32Sqrt
    F32Add F32Sub F32Mul F32Div F32Min F32Max F32Copysign
    F64Abs F64Neg F64Ceil F64Floor F64Trunc F64Nearest F64Sqrt
    F64Add F64Sub F64Mul F64Div F64Min F64Max F64Copysign
    I32WrapI64 I32TruncF32S I32TruncF32U I32TruncF64S I32TruncF64U
    I64ExtendI32S I64ExtendI32U I64TruncF32S I64TruncF32U I64TruncF64S I64TruncF64U
    F32ConvertI32S F32ConvertI32U F32ConvertI64S F32ConvertI64U F32DemoteF64
    F64ConvertI32S F64ConvertI32U F64ConvertI64S F64ConvertI64U F64PromoteF32
    I32ReinterpretF32 I64ReinterpretF64 F32ReinterpretI32 F64ReinterpretI64
    I32Extend8S I32Extend16S I64Extend8S I64Extend16S I64Extend32S
    I32TruncSatF32S I32TruncSatF32U I32TruncSatF64S I32TruncSatF64U
    I64TruncSatF32S I64TruncSatF32U I64TruncSatF64S I64TruncSatF64U
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Instr {
    // Control
    Unreachable,
    Nop,
    Block { arity: BlockArity, end: u32 },
    Loop { arity: BlockArity },
    If { arity: BlockArity, else_pc: u32, end: u32 },
    Else,
    End,
    Try { arity: BlockArity, end: u32, handlers: u32 },
    Catch(u32),
    CatchAll,
    Throw(u32),
    Rethrow(u32),
    Br(u32),
    BrIf(u32),
    /// Index into [`FuncBody::br_tables`].
    BrTable(u32),
    Return,
    Call(u32),
    CallIndirect { type_index: u32, table: u32 },

    // Parametric
    Drop,
    Select,

    // Variables
    LocalGet(u32),
    LocalSet(u32),
    LocalTee(u32),
    GlobalGet(u32),
    GlobalSet(u32),

    // Tables
    TableGet(u32),
    TableSet(u32),
    TableSize(u32),
    TableGrow(u32),
    TableFill(u32),
    TableCopy { dst: u32, src: u32 },
    TableInit { elem: u32, table: u32 },
    ElemDrop(u32),

    // Memory
    Load(LoadKind, MemArg),
    Store(StoreKind, MemArg),
    MemorySize(u32),
    MemoryGrow(u32),
    MemoryFill(u32),
    MemoryCopy { dst: u32, src: u32 },
    MemoryInit { data: u32, memory: u32 },
    DataDrop(u32),

    // Constants and references
    I32Const(i32),
    I64Const(i64),
    F32Const(u32),
    F64Const(u64),
    RefNull(ValType),
    RefIsNull,
    RefFunc(u32),

    Numeric(NumOp),

    // Threads
    AtomicLoad(AtomicKind, MemArg),
    AtomicStore(AtomicKind, MemArg),
    AtomicRmw(RmwOp, AtomicKind, MemArg),
    AtomicCmpxchg(AtomicKind, MemArg),
    AtomicNotify(MemArg),
    AtomicFence,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrTable {
    pub targets: Box<[u32]>,
    pub default: u32,
}

impl BrTable {
    pub fn depth(&self, index: u32) -> u32 {
        self.targets
            .get(index as usize)
            .copied()
            .unwrap_or(self.default)
    }
}

/// A `catch`/`catch_all` clause of a `try` block. `tag` is `None` for
/// `catch_all`; `pc` is the first instruction of the handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Handler {
    pub tag: Option<u32>,
    pub pc: u32,
}

/// Decoded body of a module-defined function.
#[derive(Debug, Clone, Default)]
pub struct FuncBody {
    /// Declared locals, excluding parameters.
    pub locals: Vec<ValType>,
    pub instrs: Vec<Instr>,
    pub br_tables: Vec<BrTable>,
    pub handlers: Vec<Box<[Handler]>>,
}

impl FuncBody {
    pub(crate) fn decode(body: &wasmparser::FunctionBody<'_>, types: &[FuncType]) -> Result<Self> {
        let mut func = FuncBody::default();
        for local in body.get_locals_reader()? {
            let (count, ty) = local?;
            let ty = ValType::from_parser(ty)?;
            func.locals
                .extend(std::iter::repeat(ty).take(count as usize));
        }
        for op in body.get_operators_reader()? {
            let op = op?;
            let instr = func.decode_op(&op, types)?;
            func.instrs.push(instr);
        }
        func.resolve_block_targets()?;
        Ok(func)
    }

    fn decode_op(&mut self, op: &Operator<'_>, types: &[FuncType]) -> Result<Instr> {
        if let Some(num) = NumOp::from_operator(op) {
            return Ok(Instr::Numeric(num));
        }
        let instr = match *op {
            Operator::Unreachable => Instr::Unreachable,
            Operator::Nop => Instr::Nop,
            Operator::Block { blockty } => Instr::Block {
                arity: block_arity(blockty, types)?,
                end: 0,
            },
            Operator::Loop { blockty } => Instr::Loop {
                arity: block_arity(blockty, types)?,
            },
            Operator::If { blockty } => Instr::If {
                arity: block_arity(blockty, types)?,
                else_pc: NO_ELSE,
                end: 0,
            },
            Operator::Else => Instr::Else,
            Operator::End => Instr::End,
            Operator::Try { blockty } => {
                let handlers = self.handlers.len() as u32;
                self.handlers.push(Box::new([]));
                Instr::Try {
                    arity: block_arity(blockty, types)?,
                    end: 0,
                    handlers,
                }
            }
            Operator::Catch { tag_index } => Instr::Catch(tag_index),
            Operator::CatchAll => Instr::CatchAll,
            Operator::Throw { tag_index } => Instr::Throw(tag_index),
            Operator::Rethrow { relative_depth } => Instr::Rethrow(relative_depth),
            Operator::Br { relative_depth } => Instr::Br(relative_depth),
            Operator::BrIf { relative_depth } => Instr::BrIf(relative_depth),
            Operator::BrTable { ref targets } => {
                let index = self.br_tables.len() as u32;
                self.br_tables.push(BrTable {
                    targets: targets.targets().collect::<Result<_, _>>()?,
                    default: targets.default(),
                });
                Instr::BrTable(index)
            }
            Operator::Return => Instr::Return,
            Operator::Call { function_index } => Instr::Call(function_index),
            Operator::CallIndirect {
                type_index,
                table_index,
            } => Instr::CallIndirect {
                type_index,
                table: table_index,
            },
            Operator::Drop => Instr::Drop,
            Operator::Select | Operator::TypedSelect { .. } => Instr::Select,
            Operator::LocalGet { local_index } => Instr::LocalGet(local_index),
            Operator::LocalSet { local_index } => Instr::LocalSet(local_index),
            Operator::LocalTee { local_index } => Instr::LocalTee(local_index),
            Operator::GlobalGet { global_index } => Instr::GlobalGet(global_index),
            Operator::GlobalSet { global_index } => Instr::GlobalSet(global_index),

            Operator::TableGet { table } => Instr::TableGet(table),
            Operator::TableSet { table } => Instr::TableSet(table),
            Operator::TableSize { table } => Instr::TableSize(table),
            Operator::TableGrow { table } => Instr::TableGrow(table),
            Operator::TableFill { table } => Instr::TableFill(table),
            Operator::TableCopy {
                dst_table,
                src_table,
            } => Instr::TableCopy {
                dst: dst_table,
                src: src_table,
            },
            Operator::TableInit { elem_index, table } => Instr::TableInit {
                elem: elem_index,
                table,
            },
            Operator::ElemDrop { elem_index } => Instr::ElemDrop(elem_index),

            Operator::I32Load { ref memarg } => {
                Instr::Load(LoadKind::I32, MemArg::from_parser(memarg))
            }
            Operator::I64Load { ref memarg } => {
                Instr::Load(LoadKind::I64, MemArg::from_parser(memarg))
            }
            Operator::F32Load { ref memarg } => {
                Instr::Load(LoadKind::F32, MemArg::from_parser(memarg))
            }
            Operator::F64Load { ref memarg } => {
                Instr::Load(LoadKind::F64, MemArg::from_parser(memarg))
            }
            Operator::I32Load8S { ref memarg } => {
                Instr::Load(LoadKind::I32S8, MemArg::from_parser(memarg))
            }
            Operator::I32Load8U { ref memarg } => {
                Instr::Load(LoadKind::I32U8, MemArg::from_parser(memarg))
            }
            Operator::I32Load16S { ref memarg } => {
                Instr::Load(LoadKind::I32S16, MemArg::from_parser(memarg))
            }
            Operator::I32Load16U { ref memarg } => {
                Instr::Load(LoadKind::I32U16, MemArg::from_parser(memarg))
            }
            Operator::I64Load8S { ref memarg } => {
                Instr::Load(LoadKind::I64S8, MemArg::from_parser(memarg))
            }
            Operator::I64Load8U { ref memarg } => {
                Instr::Load(LoadKind::I64U8, MemArg::from_parser(memarg))
            }
            Operator::I64Load16S { ref memarg } => {
                Instr::Load(LoadKind::I64S16, MemArg::from_parser(memarg))
            }
            Operator::I64Load16U { ref memarg } => {
                Instr::Load(LoadKind::I64U16, MemArg::from_parser(memarg))
            }
            Operator::I64Load32S { ref memarg } => {
                Instr::Load(LoadKind::I64S32, MemArg::from_parser(memarg))
            }
            Operator::I64Load32U { ref memarg } => {
                Instr::Load(LoadKind::I64U32, MemArg::from_parser(memarg))
            }
            Operator::I32Store { ref memarg } => {
                Instr::Store(StoreKind::I32, MemArg::from_parser(memarg))
            }
            Operator::I64Store { ref memarg } => {
                Instr::Store(StoreKind::I64, MemArg::from_parser(memarg))
            }
            Operator::F32Store { ref memarg } => {
                Instr::Store(StoreKind::F32, MemArg::from_parser(memarg))
            }
            Operator::F64Store { ref memarg } => {
                Instr::Store(StoreKind::F64, MemArg::from_parser(memarg))
            }
            Operator::I32Store8 { ref memarg } => {
                Instr::Store(StoreKind::I32As8, MemArg::from_parser(memarg))
            }
            Operator::I32Store16 { ref memarg } => {
                Instr::Store(StoreKind::I32As16, MemArg::from_parser(memarg))
            }
            Operator::I64Store8 { ref memarg } => {
                Instr::Store(StoreKind::I64As8, MemArg::from_parser(memarg))
            }
            Operator::I64Store16 { ref memarg } => {
                Instr::Store(StoreKind::I64As16, MemArg::from_parser(memarg))
            }
            Operator::I64Store32 { ref memarg } => {
                Instr::Store(StoreKind::I64As32, MemArg::from_parser(memarg))
            }
            Operator::MemorySize { mem } => Instr::MemorySize(mem),
            Operator::MemoryGrow { mem } => Instr::MemoryGrow(mem),
            Operator::MemoryFill { mem } => Instr::MemoryFill(mem),
            Operator::MemoryCopy { dst_mem, src_mem } => Instr::MemoryCopy {
                dst: dst_mem,
                src: src_mem,
            },
            Operator::MemoryInit { data_index, mem } => Instr::MemoryInit {
                data: data_index,
                memory: mem,
            },
            Operator::DataDrop { data_index } => Instr::DataDrop(data_index),

            Operator::I32Const { value } => Instr::I32Const(value),
            Operator::I64Const { value } => Instr::I64Const(value),
            Operator::F32Const { value } => Instr::F32Const(value.bits()),
            Operator::F64Const { value } => Instr::F64Const(value.bits()),
            Operator::RefNull { hty } => Instr::RefNull(heap_val_type(hty)?),
            Operator::RefIsNull => Instr::RefIsNull,
            Operator::RefFunc { function_index } => Instr::RefFunc(function_index),

            Operator::I32AtomicLoad { ref memarg } => {
                Instr::AtomicLoad(AtomicKind::I32, MemArg::from_parser(memarg))
            }
            Operator::I64AtomicLoad { ref memarg } => {
                Instr::AtomicLoad(AtomicKind::I64, MemArg::from_parser(memarg))
            }
            Operator::I32AtomicLoad8U { ref memarg } => {
                Instr::AtomicLoad(AtomicKind::I32U8, MemArg::from_parser(memarg))
            }
            Operator::I32AtomicLoad16U { ref memarg } => {
                Instr::AtomicLoad(AtomicKind::I32U16, MemArg::from_parser(memarg))
            }
            Operator::I64AtomicLoad8U { ref memarg } => {
                Instr::AtomicLoad(AtomicKind::I64U8, MemArg::from_parser(memarg))
            }
            Operator::I64AtomicLoad16U { ref memarg } => {
                Instr::AtomicLoad(AtomicKind::I64U16, MemArg::from_parser(memarg))
            }
            Operator::I64AtomicLoad32U { ref memarg } => {
                Instr::AtomicLoad(AtomicKind::I64U32, MemArg::from_parser(memarg))
            }
            Operator::I32AtomicStore { ref memarg } => {
                Instr::AtomicStore(AtomicKind::I32, MemArg::from_parser(memarg))
            }
            Operator::I64AtomicStore { ref memarg } => {
                Instr::AtomicStore(AtomicKind::I64, MemArg::from_parser(memarg))
            }
            Operator::I32AtomicStore8 { ref memarg } => {
                Instr::AtomicStore(AtomicKind::I32U8, MemArg::from_parser(memarg))
            }
            Operator::I32AtomicStore16 { ref memarg } => {
                Instr::AtomicStore(AtomicKind::I32U16, MemArg::from_parser(memarg))
            }
            Operator::I64AtomicStore8 { ref memarg } => {
                Instr::AtomicStore(AtomicKind::I64U8, MemArg::from_parser(memarg))
            }
            Operator::I64AtomicStore16 { ref memarg } => {
                Instr::AtomicStore(AtomicKind::I64U16, MemArg::from_parser(memarg))
            }
            Operator::I64AtomicStore32 { ref memarg } => {
                Instr::AtomicStore(AtomicKind::I64U32, MemArg::from_parser(memarg))
            }
            Operator::I32AtomicRmwCmpxchg { ref memarg } => {
                Instr::AtomicCmpxchg(AtomicKind::I32, MemArg::from_parser(memarg))
            }
            Operator::I64AtomicRmwCmpxchg { ref memarg } => {
                Instr::AtomicCmpxchg(AtomicKind::I64, MemArg::from_parser(memarg))
            }
            Operator::I32AtomicRmw8CmpxchgU { ref memarg } => {
                Instr::AtomicCmpxchg(AtomicKind::I32U8, MemArg::from_parser(memarg))
            }
            Operator::I32AtomicRmw16CmpxchgU { ref memarg } => {
                Instr::AtomicCmpxchg(AtomicKind::I32U16, MemArg::from_parser(memarg))
            }
            Operator::I64AtomicRmw8CmpxchgU { ref memarg } => {
                Instr::AtomicCmpxchg(AtomicKind::I64U8, MemArg::from_parser(memarg))
            }
            Operator::I64AtomicRmw16CmpxchgU { ref memarg } => {
                Instr::AtomicCmpxchg(AtomicKind::I64U16, MemArg::from_parser(memarg))
            }
            Operator::I64AtomicRmw32CmpxchgU { ref memarg } => {
                Instr::AtomicCmpxchg(AtomicKind::I64U32, MemArg::from_parser(memarg))
            }
            Operator::MemoryAtomicNotify { ref memarg } => {
                Instr::AtomicNotify(MemArg::from_parser(memarg))
            }
            Operator::AtomicFence => Instr::AtomicFence,

            ref other => match decode_rmw(other) {
                Some(instr) => instr,
                None => return Err(Error::Unsupported(format!("operator {other:?}"))),
            },
        };
        Ok(instr)
    }

    /// Patch `end`/`else` positions of structured blocks and collect the
    /// `catch` clauses of each `try`.
    fn resolve_block_targets(&mut self) -> Result<()> {
        let mut open: Vec<usize> = Vec::new();
        for pc in 0..self.instrs.len() {
            match self.instrs[pc] {
                Instr::Block { .. } | Instr::Loop { .. } | Instr::If { .. } | Instr::Try { .. } => {
                    open.push(pc)
                }
                Instr::Else => {
                    let start = *open.last().ok_or_else(|| unbalanced(pc))?;
                    if let Instr::If { else_pc, .. } = &mut self.instrs[start] {
                        *else_pc = pc as u32;
                    } else {
                        return Err(unbalanced(pc));
                    }
                }
                Instr::Catch(_) | Instr::CatchAll => {
                    let start = *open.last().ok_or_else(|| unbalanced(pc))?;
                    let Instr::Try { handlers, .. } = self.instrs[start] else {
                        return Err(unbalanced(pc));
                    };
                    let tag = match self.instrs[pc] {
                        Instr::Catch(tag) => Some(tag),
                        _ => None,
                    };
                    let clauses = &mut self.handlers[handlers as usize];
                    let mut list = std::mem::take(clauses).into_vec();
                    list.push(Handler {
                        tag,
                        pc: pc as u32 + 1,
                    });
                    *clauses = list.into_boxed_slice();
                }
                Instr::End => {
                    // The final `end` closes the function body itself.
                    let Some(start) = open.pop() else {
                        continue;
                    };
                    match &mut self.instrs[start] {
                        Instr::Block { end, .. }
                        | Instr::If { end, .. }
                        | Instr::Try { end, .. } => *end = pc as u32,
                        _ => {}
                    }
                }
                _ => {}
            }
        }
        if !open.is_empty() {
            return Err(Error::Load("unterminated block".into()));
        }
        Ok(())
    }
}

fn unbalanced(pc: usize) -> Error {
    Error::Load(format!("unbalanced control instruction at {pc}"))
}

fn block_arity(ty: wasmparser::BlockType, types: &[FuncType]) -> Result<BlockArity> {
    Ok(match ty {
        wasmparser::BlockType::Empty => BlockArity {
            params: 0,
            results: 0,
        },
        wasmparser::BlockType::Type(_) => BlockArity {
            params: 0,
            results: 1,
        },
        wasmparser::BlockType::FuncType(idx) => {
            let ty = types
                .get(idx as usize)
                .ok_or_else(|| Error::Load(format!("block type index {idx} out of range")))?;
            BlockArity {
                params: ty.params().len() as u32,
                results: ty.results().len() as u32,
            }
        }
    })
}

pub(crate) fn heap_val_type(hty: wasmparser::HeapType) -> Result<ValType> {
    use wasmparser::{AbstractHeapType, HeapType};
    match hty {
        HeapType::Abstract {
            ty: AbstractHeapType::Func,
            ..
        } => Ok(ValType::FuncRef),
        HeapType::Abstract {
            ty: AbstractHeapType::Extern,
            ..
        } => Ok(ValType::ExternRef),
        other => Err(Error::Unsupported(format!("heap type {other:?}"))),
    }
}

macro_rules! rmw_ops {
    ($op:expr, $( $variant:ident => ($rmw:ident, $kind:ident) ),* $(,)?) => {
        match $op {
            $(Operator::$variant { memarg } => Some(Instr::AtomicRmw(
                RmwOp::$rmw,
                AtomicKind::$kind,
                MemArg::from_parser(memarg),
            )),)*
            _ => None,
        }
    };
}

fn decode_rmw(op: &Operator<'_>) -> Option<Instr> {
    rmw_ops!(op,
        I32AtomicRmwAdd => (Add, I32),
        I64AtomicRmwAdd => (Add, I64),
        I32AtomicRmw8AddU => (Add, I32U8),
        I32AtomicRmw16AddU => (Add, I32U16),
        I64AtomicRmw8AddU => (Add, I64U8),
        I64AtomicRmw16AddU => (Add, I64U16),
        I64AtomicRmw32AddU => (Add, I64U32),
        I32AtomicRmwSub => (Sub, I32),
        I64AtomicRmwSub => (Sub, I64),
        I32AtomicRmw8SubU => (Sub, I32U8),
        I32AtomicRmw16SubU => (Sub, I32U16),
        I64AtomicRmw8SubU => (Sub, I64U8),
        I64AtomicRmw16SubU => (Sub, I64U16),
        I64AtomicRmw32SubU => (Sub, I64U32),
        I32AtomicRmwAnd => (And, I32),
        I64AtomicRmwAnd => (And, I64),
        I32AtomicRmw8AndU => (And, I32U8),
        I32AtomicRmw16AndU => (And, I32U16),
        I64AtomicRmw8AndU => (And, I64U8),
        I64AtomicRmw16AndU => (And, I64U16),
        I64AtomicRmw32AndU => (And, I64U32),
        I32AtomicRmwOr => (Or, I32),
        I64AtomicRmwOr => (Or, I64),
        I32AtomicRmw8OrU => (Or, I32U8),
        I32AtomicRmw16OrU => (Or, I32U16),
        I64AtomicRmw8OrU => (Or, I64U8),
        I64AtomicRmw16OrU => (Or, I64U16),
        I64AtomicRmw32OrU => (Or, I64U32),
        I32AtomicRmwXor => (Xor, I32),
        I64AtomicRmwXor => (Xor, I64),
        I32AtomicRmw8XorU => (Xor, I32U8),
        I32AtomicRmw16XorU => (Xor, I32U16),
        I64AtomicRmw8XorU => (Xor, I64U8),
        I64AtomicRmw16XorU => (Xor, I64U16),
        I64AtomicRmw32XorU => (Xor, I64U32),
        I32AtomicRmwXchg => (Xchg, I32),
        I64AtomicRmwXchg => (Xchg, I64),
        I32AtomicRmw8XchgU => (Xchg, I32U8),
        I32AtomicRmw16XchgU => (Xchg, I32U16),
        I64AtomicRmw8XchgU => (Xchg, I64U8),
        I64AtomicRmw16XchgU => (Xchg, I64U16),
        I64AtomicRmw32XchgU => (Xchg, I64U32),
    )
}
