//! Immutable module AST.

pub mod instr;
mod load;
pub mod types;

use std::sync::Arc;

use crate::error::Result;
use crate::Engine;

use instr::FuncBody;
use types::{
    DataSegment, ElemSegment, Export, FuncType, GlobalDef, Import, MemoryType, TableDef, TagType,
};

/// A loaded and validated WebAssembly module. Cloning shares the
/// underlying AST.
#[derive(Debug, Clone)]
pub struct Module {
    pub(crate) inner: Arc<ModuleInner>,
}

#[derive(Debug, Default)]
pub(crate) struct ModuleInner {
    pub(crate) types: Vec<FuncType>,
    pub(crate) imports: Vec<Import>,
    /// Type index of every function, imported ones first.
    pub(crate) funcs: Vec<u32>,
    /// Defined tables, memories, globals and tags (imports excluded).
    pub(crate) tables: Vec<TableDef>,
    pub(crate) memories: Vec<MemoryType>,
    pub(crate) globals: Vec<GlobalDef>,
    pub(crate) tags: Vec<TagType>,
    pub(crate) exports: Vec<Export>,
    pub(crate) start: Option<u32>,
    pub(crate) elems: Vec<ElemSegment>,
    pub(crate) datas: Vec<DataSegment>,
    pub(crate) codes: Vec<Arc<FuncBody>>,
    pub(crate) num_imported_funcs: u32,
    pub(crate) num_imported_tables: u32,
    pub(crate) num_imported_memories: u32,
    pub(crate) num_imported_globals: u32,
    pub(crate) num_imported_tags: u32,
}

impl Module {
    /// Parse a WAT string (or binary passed as text) into a module.
    pub fn new(engine: &Engine, wat: &str) -> Result<Self> {
        let bytes = wat::parse_str(wat)?;
        Self::from_bytes(engine, &bytes)
    }

    /// Validate and load raw WASM bytes.
    pub fn from_bytes(engine: &Engine, bytes: &[u8]) -> Result<Self> {
        engine.new_validator().validate_all(bytes)?;
        let inner = load::parse(bytes)?;
        tracing::debug!(
            funcs = inner.funcs.len(),
            imports = inner.imports.len(),
            exports = inner.exports.len(),
            "module loaded"
        );
        Ok(Module {
            inner: Arc::new(inner),
        })
    }

    pub fn imports(&self) -> &[Import] {
        &self.inner.imports
    }

    pub fn exports(&self) -> &[Export] {
        &self.inner.exports
    }

    pub fn export(&self, name: &str) -> Option<&Export> {
        self.inner.exports.iter().find(|e| e.name == name)
    }

    pub fn start(&self) -> Option<u32> {
        self.inner.start
    }

    pub fn func_type(&self, type_index: u32) -> Option<&FuncType> {
        self.inner.types.get(type_index as usize)
    }

    /// Signature of the function at `func_index` in the function index space.
    pub fn func_type_of(&self, func_index: u32) -> Option<&FuncType> {
        let type_index = *self.inner.funcs.get(func_index as usize)?;
        self.func_type(type_index)
    }

    pub(crate) fn code(&self, def_index: u32) -> Option<&Arc<FuncBody>> {
        self.inner.codes.get(def_index as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::module::types::{ExternKind, ValType};

    #[test]
    fn index_space_counts_imports_first() {
        let engine = Engine::default();
        let module = Module::new(
            &engine,
            r#"(module
                (import "env" "g" (global i64))
                (import "env" "f" (func (param i32)))
                (global (mut f32) (f32.const 1))
                (func (result i32) i32.const 0)
                (export "run" (func 1)))"#,
        )
        .unwrap();
        assert_eq!(module.inner.num_imported_funcs, 1);
        assert_eq!(module.func_type_of(0).unwrap().params(), &[ValType::I32]);
        assert_eq!(module.func_type_of(1).unwrap().results(), &[ValType::I32]);
        assert!(module.func_type_of(2).is_none());
        assert_eq!(module.export("run").map(|e| e.kind), Some(ExternKind::Func));
    }

    #[test]
    fn invalid_bytes_are_rejected() {
        let engine = Engine::default();
        let err = Module::from_bytes(&engine, b"\0asm\x01\0\0\0\x01").unwrap_err();
        assert!(matches!(err, Error::Parse(_)), "{err}");
    }

    #[test]
    fn simd_is_unsupported() {
        let engine = Engine::default();
        let err = Module::new(
            &engine,
            r#"(module (func (result v128) v128.const i64x2 0 0))"#,
        )
        .unwrap_err();
        assert!(matches!(err, Error::Parse(_) | Error::Unsupported(_)), "{err}");
    }
}
