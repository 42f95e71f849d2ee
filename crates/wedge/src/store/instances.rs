//! Runtime instances that carry no behaviour of their own.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::host::HostFunc;
use crate::module::types::{FuncType, ValType};
use crate::module::Module;
use crate::store::{
    DataAddr, ElemAddr, Extern, FuncAddr, GlobalAddr, InstanceAddr, MemoryAddr, TableAddr,
    TagAddr,
};
use crate::value::Ref;

pub enum FuncInstance {
    /// A function defined by a module: its code is `module`'s body
    /// `def_index`, executed in the context of `instance`.
    Wasm {
        ty: FuncType,
        instance: InstanceAddr,
        module: Module,
        def_index: u32,
    },
    Host(HostFunc),
}

impl FuncInstance {
    pub fn ty(&self) -> &FuncType {
        match self {
            FuncInstance::Wasm { ty, .. } => ty,
            FuncInstance::Host(host) => host.ty(),
        }
    }

    pub fn is_host(&self) -> bool {
        matches!(self, FuncInstance::Host(_))
    }
}

impl fmt::Debug for FuncInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FuncInstance::Wasm {
                ty,
                instance,
                def_index,
                ..
            } => f
                .debug_struct("Wasm")
                .field("ty", ty)
                .field("instance", instance)
                .field("def_index", def_index)
                .finish(),
            FuncInstance::Host(host) => f.debug_tuple("Host").field(host.ty()).finish(),
        }
    }
}

/// Exception tag. The payload carried by a `throw` matches `ty.params()`.
#[derive(Debug, Clone)]
pub struct TagInstance {
    pub ty: FuncType,
}

/// Contents of a data segment, cleared by `data.drop` or after active
/// application.
#[derive(Debug, Clone)]
pub struct DataInstance {
    bytes: Option<Arc<[u8]>>,
}

impl DataInstance {
    pub fn new(bytes: Arc<[u8]>) -> Self {
        DataInstance { bytes: Some(bytes) }
    }

    pub fn bytes(&self) -> &[u8] {
        self.bytes.as_deref().unwrap_or(&[])
    }

    pub fn drop_bytes(&mut self) {
        self.bytes = None;
    }
}

/// Evaluated references of an element segment.
#[derive(Debug, Clone)]
pub struct ElemInstance {
    pub ty: ValType,
    refs: Vec<Ref>,
}

impl ElemInstance {
    pub fn new(ty: ValType, refs: Vec<Ref>) -> Self {
        ElemInstance { ty, refs }
    }

    pub fn refs(&self) -> &[Ref] {
        &self.refs
    }

    pub fn drop_refs(&mut self) {
        self.refs = Vec::new();
    }
}

/// A module instance: per-kind address lists (imports first, then
/// definitions) and the export map. Immutable once published.
#[derive(Debug, Clone)]
pub struct ModuleInstance {
    pub(crate) module: Module,
    pub(crate) types: Vec<FuncType>,
    pub(crate) funcs: Vec<FuncAddr>,
    pub(crate) tables: Vec<TableAddr>,
    pub(crate) memories: Vec<MemoryAddr>,
    pub(crate) globals: Vec<GlobalAddr>,
    pub(crate) tags: Vec<TagAddr>,
    pub(crate) elems: Vec<ElemAddr>,
    pub(crate) datas: Vec<DataAddr>,
    pub(crate) exports: HashMap<String, Extern>,
}

impl ModuleInstance {
    pub fn module(&self) -> &Module {
        &self.module
    }

    pub fn export(&self, name: &str) -> Option<Extern> {
        self.exports.get(name).copied()
    }

    pub fn exports(&self) -> impl Iterator<Item = (&str, Extern)> + '_ {
        self.exports.iter().map(|(name, ext)| (name.as_str(), *ext))
    }

    pub fn func(&self, index: u32) -> Option<FuncAddr> {
        self.funcs.get(index as usize).copied()
    }

    pub fn memory(&self, index: u32) -> Option<MemoryAddr> {
        self.memories.get(index as usize).copied()
    }

    pub fn global(&self, index: u32) -> Option<GlobalAddr> {
        self.globals.get(index as usize).copied()
    }

    pub fn table(&self, index: u32) -> Option<TableAddr> {
        self.tables.get(index as usize).copied()
    }

    pub fn tag(&self, index: u32) -> Option<TagAddr> {
        self.tags.get(index as usize).copied()
    }
}
