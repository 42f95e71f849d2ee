//! Type-level building blocks of the module AST.

use std::fmt;
use std::sync::Arc;

use crate::error::{Error, Result};

pub const PAGE_SIZE: u64 = 65_536;
pub const MAX_PAGES: u64 = 65_536;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValType {
    I32,
    I64,
    F32,
    F64,
    FuncRef,
    ExternRef,
}

impl ValType {
    pub fn is_ref(self) -> bool {
        matches!(self, ValType::FuncRef | ValType::ExternRef)
    }

    pub(crate) fn from_parser(ty: wasmparser::ValType) -> Result<Self> {
        Ok(match ty {
            wasmparser::ValType::I32 => ValType::I32,
            wasmparser::ValType::I64 => ValType::I64,
            wasmparser::ValType::F32 => ValType::F32,
            wasmparser::ValType::F64 => ValType::F64,
            wasmparser::ValType::Ref(rt) => ValType::from_ref_type(rt)?,
            wasmparser::ValType::V128 => return Err(Error::Unsupported("v128".into())),
        })
    }

    pub(crate) fn from_ref_type(rt: wasmparser::RefType) -> Result<Self> {
        use wasmparser::{AbstractHeapType, HeapType};
        match rt.heap_type() {
            HeapType::Abstract { ty: AbstractHeapType::Func, .. } => Ok(ValType::FuncRef),
            HeapType::Abstract { ty: AbstractHeapType::Extern, .. } => Ok(ValType::ExternRef),
            other => Err(Error::Unsupported(format!("reference type {other:?}"))),
        }
    }
}

impl fmt::Display for ValType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ValType::I32 => "i32",
            ValType::I64 => "i64",
            ValType::F32 => "f32",
            ValType::F64 => "f64",
            ValType::FuncRef => "funcref",
            ValType::ExternRef => "externref",
        };
        f.write_str(name)
    }
}

/// A function signature. Cheap to clone.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FuncType {
    params: Arc<[ValType]>,
    results: Arc<[ValType]>,
}

impl FuncType {
    pub fn new(
        params: impl IntoIterator<Item = ValType>,
        results: impl IntoIterator<Item = ValType>,
    ) -> Self {
        FuncType {
            params: params.into_iter().collect(),
            results: results.into_iter().collect(),
        }
    }

    pub fn params(&self) -> &[ValType] {
        &self.params
    }

    pub fn results(&self) -> &[ValType] {
        &self.results
    }

    pub(crate) fn from_parser(ty: &wasmparser::FuncType) -> Result<Self> {
        let params = ty
            .params()
            .iter()
            .map(|t| ValType::from_parser(*t))
            .collect::<Result<Vec<_>>>()?;
        let results = ty
            .results()
            .iter()
            .map(|t| ValType::from_parser(*t))
            .collect::<Result<Vec<_>>>()?;
        Ok(FuncType::new(params, results))
    }
}

impl fmt::Display for FuncType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let join = |tys: &[ValType]| {
            tys.iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(" ")
        };
        write!(f, "[{}] -> [{}]", join(&self.params), join(&self.results))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Limits {
    pub min: u64,
    pub max: Option<u64>,
}

impl Limits {
    /// Whether an actual (provided) limit satisfies this declared one.
    pub fn accepts(&self, actual: &Limits) -> bool {
        if actual.min < self.min {
            return false;
        }
        match (self.max, actual.max) {
            (None, _) => true,
            (Some(_), None) => false,
            (Some(declared), Some(actual)) => actual <= declared,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryType {
    pub limits: Limits,
    pub shared: bool,
}

impl MemoryType {
    pub fn new(min: u64, max: Option<u64>) -> Self {
        MemoryType {
            limits: Limits { min, max },
            shared: false,
        }
    }

    pub fn shared(min: u64, max: u64) -> Self {
        MemoryType {
            limits: Limits {
                min,
                max: Some(max),
            },
            shared: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TableType {
    pub elem: ValType,
    pub limits: Limits,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GlobalType {
    pub content: ValType,
    pub mutable: bool,
}

/// Index of the function type describing a tag's payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TagType {
    pub type_index: u32,
}

/// What an import asks for.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ImportDesc {
    Func(u32),
    Table(TableType),
    Memory(MemoryType),
    Global(GlobalType),
    Tag(TagType),
}

#[derive(Debug, Clone)]
pub struct Import {
    pub module: String,
    pub name: String,
    pub desc: ImportDesc,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExternKind {
    Func,
    Table,
    Memory,
    Global,
    Tag,
}

impl fmt::Display for ExternKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ExternKind::Func => "function",
            ExternKind::Table => "table",
            ExternKind::Memory => "memory",
            ExternKind::Global => "global",
            ExternKind::Tag => "tag",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone)]
pub struct Export {
    pub name: String,
    pub kind: ExternKind,
    pub index: u32,
}

/// One operation of a constant initializer expression.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ConstOp {
    I32Const(i32),
    I64Const(i64),
    F32Const(u32),
    F64Const(u64),
    RefNull(ValType),
    RefFunc(u32),
    GlobalGet(u32),
    I32Add,
    I32Sub,
    I32Mul,
    I64Add,
    I64Sub,
    I64Mul,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConstExpr(pub Vec<ConstOp>);

#[derive(Debug, Clone)]
pub struct GlobalDef {
    pub ty: GlobalType,
    pub init: ConstExpr,
}

#[derive(Debug, Clone)]
pub struct TableDef {
    pub ty: TableType,
    pub init: Option<ConstExpr>,
}

#[derive(Debug, Clone)]
pub enum SegmentMode {
    Passive,
    Active { index: u32, offset: ConstExpr },
    Declared,
}

#[derive(Debug, Clone)]
pub struct ElemSegment {
    pub mode: SegmentMode,
    pub elem: ValType,
    pub items: Vec<ConstExpr>,
}

#[derive(Debug, Clone)]
pub struct DataSegment {
    pub mode: SegmentMode,
    pub bytes: Arc<[u8]>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn import_limits_must_cover_declared_limits() {
        let declared = Limits {
            min: 1,
            max: Some(4),
        };
        assert!(declared.accepts(&Limits {
            min: 2,
            max: Some(3)
        }));
        assert!(!declared.accepts(&Limits { min: 0, max: Some(3) }));
        assert!(!declared.accepts(&Limits { min: 2, max: None }));
        assert!(Limits { min: 0, max: None }.accepts(&Limits { min: 5, max: None }));
    }

    #[test]
    fn func_type_display() {
        let ty = FuncType::new([ValType::I32, ValType::I64], [ValType::F32]);
        assert_eq!(ty.to_string(), "[i32 i64] -> [f32]");
    }
}
