//! Named import registry and module instantiation.
//!
//! The [`Linker`] collects definitions under `(module, name)` pairs and
//! resolves a module's imports against them. Host functions are kept
//! unallocated and placed into the target store on each instantiation;
//! every other definition is an address in one particular store, and is
//! rejected when resolved against any other.

use std::collections::HashMap;
use std::sync::Arc;

use crate::engine::Engine;
use crate::error::{Error, LinkError, Result};
use crate::host::{Caller, HostControl, HostFunc};
use crate::instance::Instance;
use crate::module::types::{ConstExpr, ConstOp, ExternKind, FuncType, ImportDesc, SegmentMode};
use crate::module::Module;
use crate::store::{
    DataInstance, ElemInstance, Extern, FuncAddr, FuncInstance, GlobalAddr, GlobalInstance,
    MemoryInstance, ModuleInstance, Store, StoreId, TableInstance, TagInstance,
};
use crate::value::{Ref, Val};

#[derive(Debug, Clone)]
enum Definition {
    Extern(StoreId, Extern),
    Func(HostFunc),
}

/// A named import registry.
///
/// # Examples
///
/// ```ignore
/// let mut linker = Linker::new(&engine);
/// linker.func_new("env", "double", ty, |_, args| {
///     Ok(HostControl::Return(vec![Val::I32(args[0].as_i32()? * 2)]))
/// });
/// let instance = linker.instantiate(&mut store, &module)?;
/// ```
#[derive(Debug, Clone)]
pub struct Linker {
    engine: Engine,
    defs: HashMap<(String, String), Definition>,
}

impl Linker {
    pub fn new(engine: &Engine) -> Self {
        Linker {
            engine: engine.clone(),
            defs: HashMap::new(),
        }
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    /// Register a host function built from a closure.
    pub fn func_new<F>(&mut self, module: &str, name: &str, ty: FuncType, callback: F) -> &mut Self
    where
        F: Fn(&mut Caller<'_>, &[Val]) -> std::result::Result<HostControl, crate::Trap>
            + Send
            + Sync
            + 'static,
    {
        self.func(module, name, HostFunc::new(ty, callback))
    }

    pub fn func(&mut self, module: &str, name: &str, func: HostFunc) -> &mut Self {
        self.insert(module, name, Definition::Func(func));
        self
    }

    /// Register an item that already lives in `store`.
    pub fn define(&mut self, store: &Store, module: &str, name: &str, item: Extern) -> &mut Self {
        self.insert(module, name, Definition::Extern(store.id(), item));
        self
    }

    /// Allocate `memory` in `store` and register it.
    pub fn memory(
        &mut self,
        store: &mut Store,
        module: &str,
        name: &str,
        memory: MemoryInstance,
    ) -> &mut Self {
        let addr = store.alloc_memory(memory);
        self.define(store, module, name, Extern::Memory(addr))
    }

    /// Allocate `global` in `store` and register it.
    pub fn global(
        &mut self,
        store: &mut Store,
        module: &str,
        name: &str,
        global: GlobalInstance,
    ) -> &mut Self {
        let addr = store.alloc_global(global);
        self.define(store, module, name, Extern::Global(addr))
    }

    /// Allocate `table` in `store` and register it.
    pub fn table(
        &mut self,
        store: &mut Store,
        module: &str,
        name: &str,
        table: TableInstance,
    ) -> &mut Self {
        let addr = store.alloc_table(table);
        self.define(store, module, name, Extern::Table(addr))
    }

    /// Register every export of `instance` under the module name `name`.
    pub fn instance(
        &mut self,
        store: &Store,
        name: &str,
        instance: &Instance,
    ) -> Result<&mut Self> {
        let inst = store.instance(instance.addr())?;
        for (export, item) in inst.exports() {
            self.defs.insert(
                (name.to_string(), export.to_string()),
                Definition::Extern(store.id(), item),
            );
        }
        tracing::debug!(module = name, instance = %instance.addr(), "registered instance");
        Ok(self)
    }

    pub fn has(&self, module: &str, name: &str) -> bool {
        self.defs
            .contains_key(&(module.to_string(), name.to_string()))
    }

    fn insert(&mut self, module: &str, name: &str, def: Definition) {
        self.defs
            .insert((module.to_string(), name.to_string()), def);
    }

    /// Resolve the imports of `module` and instantiate it in `store`.
    ///
    /// 1. Resolve and type-check every import.
    /// 2. Allocate functions, globals, memories, tables and tags.
    /// 3. Apply active element segments, then active data segments.
    /// 4. Run the start function and publish the instance.
    ///
    /// A segment that does not fit fails with [`Error::InstantiationTrap`];
    /// writes of earlier segments stay. Allocations made before a failure
    /// stay in the store but the instance is not published. Functions that
    /// already reached an imported table stay callable.
    pub fn instantiate(&self, store: &mut Store, module: &Module) -> Result<Instance> {
        let inner = &module.inner;
        let addr = store.instances.reserve();

        let mut funcs = Vec::with_capacity(inner.funcs.len());
        let mut tables = Vec::new();
        let mut memories = Vec::new();
        let mut globals = Vec::new();
        let mut tags = Vec::new();

        for import in &inner.imports {
            let def = self
                .defs
                .get(&(import.module.clone(), import.name.clone()))
                .ok_or_else(|| LinkError::UnknownImport {
                    module: import.module.clone(),
                    name: import.name.clone(),
                })?;
            let item = match def {
                Definition::Extern(owner, item) => {
                    if *owner != store.id() {
                        return Err(Error::WrongStore {
                            module: import.module.clone(),
                            name: import.name.clone(),
                        });
                    }
                    *item
                }
                Definition::Func(host) => {
                    Extern::Func(store.alloc_func(FuncInstance::Host(host.clone())))
                }
            };
            let incompatible = |reason: String| LinkError::IncompatibleImportType {
                module: import.module.clone(),
                name: import.name.clone(),
                reason,
            };
            match (import.desc, item) {
                (ImportDesc::Func(type_index), Extern::Func(func)) => {
                    let expected = module
                        .func_type(type_index)
                        .ok_or(Error::Fault("import type index out of range"))?;
                    let actual = store.func(func)?.ty();
                    if actual != expected {
                        let reason = format!("expected {expected}, found {actual}");
                        return Err(incompatible(reason).into());
                    }
                    funcs.push(func);
                }
                (ImportDesc::Table(expected), Extern::Table(table)) => {
                    let actual = store.table(table)?.ty();
                    if actual.elem != expected.elem || !expected.limits.accepts(&actual.limits) {
                        let reason = format!("expected {expected:?}, found {actual:?}");
                        return Err(incompatible(reason).into());
                    }
                    tables.push(table);
                }
                (ImportDesc::Memory(expected), Extern::Memory(memory)) => {
                    let actual = store.memory(memory)?.ty();
                    if actual.shared != expected.shared
                        || !expected.limits.accepts(&actual.limits)
                    {
                        let reason = format!("expected {expected:?}, found {actual:?}");
                        return Err(incompatible(reason).into());
                    }
                    memories.push(memory);
                }
                (ImportDesc::Global(expected), Extern::Global(global)) => {
                    let actual = store.global(global)?.ty();
                    if actual != expected {
                        let reason = format!("expected {expected:?}, found {actual:?}");
                        return Err(incompatible(reason).into());
                    }
                    globals.push(global);
                }
                (ImportDesc::Tag(expected), Extern::Tag(tag)) => {
                    let expected = module
                        .func_type(expected.type_index)
                        .ok_or(Error::Fault("tag type index out of range"))?;
                    if &store.tag(tag)?.ty != expected {
                        let reason = format!("tag signature differs from {expected}");
                        return Err(incompatible(reason).into());
                    }
                    tags.push(tag);
                }
                (desc, item) => {
                    return Err(incompatible(format!(
                        "expected {}, found {}",
                        desc_kind(&desc),
                        extern_kind(&item)
                    ))
                    .into());
                }
            }
        }

        for (def_index, &type_index) in inner.funcs[inner.num_imported_funcs as usize..]
            .iter()
            .enumerate()
        {
            let ty = module
                .func_type(type_index)
                .ok_or(Error::Fault("function type index out of range"))?
                .clone();
            funcs.push(store.alloc_func(FuncInstance::Wasm {
                ty,
                instance: addr,
                module: module.clone(),
                def_index: def_index as u32,
            }));
        }

        let imported_globals = globals.len();
        for def in &inner.globals {
            let ctx = InitContext {
                globals: &globals,
                imported_globals,
                funcs: &funcs,
            };
            let val = ctx.eval(store, &def.init)?;
            globals.push(store.alloc_global(GlobalInstance::new(def.ty, val)?));
        }
        let ctx = InitContext {
            globals: &globals,
            imported_globals,
            funcs: &funcs,
        };

        for ty in &inner.memories {
            memories.push(store.alloc_memory(MemoryInstance::new(*ty)?));
        }
        for def in &inner.tables {
            let init = match &def.init {
                Some(expr) => ctx.eval_ref(store, expr)?,
                None => Ref::null(def.ty.elem).ok_or_else(|| {
                    LinkError::InvalidInitializer("table of a non-reference type".into())
                })?,
            };
            tables.push(store.alloc_table(TableInstance::new(def.ty, init)?));
        }
        for tag in &inner.tags {
            let ty = module
                .func_type(tag.type_index)
                .ok_or(Error::Fault("tag type index out of range"))?
                .clone();
            tags.push(store.alloc_tag(TagInstance { ty }));
        }

        let mut elems = Vec::with_capacity(inner.elems.len());
        for segment in &inner.elems {
            let refs = segment
                .items
                .iter()
                .map(|item| ctx.eval_ref(store, item))
                .collect::<Result<Vec<_>>>()?;
            elems.push(store.elems.alloc(ElemInstance::new(segment.elem, refs)));
        }
        let datas: Vec<_> = inner
            .datas
            .iter()
            .map(|segment| store.datas.alloc(DataInstance::new(segment.bytes.clone())))
            .collect();

        let mut exports = HashMap::with_capacity(inner.exports.len());
        for export in &inner.exports {
            let index = export.index as usize;
            let item = match export.kind {
                ExternKind::Func => funcs.get(index).copied().map(Extern::Func),
                ExternKind::Table => tables.get(index).copied().map(Extern::Table),
                ExternKind::Memory => memories.get(index).copied().map(Extern::Memory),
                ExternKind::Global => globals.get(index).copied().map(Extern::Global),
                ExternKind::Tag => tags.get(index).copied().map(Extern::Tag),
            }
            .ok_or(Error::Fault("export index out of range"))?;
            exports.insert(export.name.clone(), item);
        }

        let start = inner.start.and_then(|index| funcs.get(index as usize).copied());
        let instance = Arc::new(ModuleInstance {
            module: module.clone(),
            types: inner.types.clone(),
            funcs,
            tables,
            memories,
            globals,
            tags,
            elems,
            datas,
            exports,
        });
        store.stage_instance(addr, instance.clone())?;
        let ctx = InitContext {
            globals: &instance.globals,
            imported_globals,
            funcs: &instance.funcs,
        };

        // Active and declared segments are dropped once applied.
        for (segment, &elem_addr) in inner.elems.iter().zip(&instance.elems) {
            match &segment.mode {
                SegmentMode::Active { index, offset } => {
                    let offset = ctx.eval(store, offset)?.as_i32()? as u32;
                    let table = *instance
                        .tables
                        .get(*index as usize)
                        .ok_or(Error::Fault("element table index out of range"))?;
                    let elem = store.elems.get(elem_addr)?;
                    if elem.ty != store.table(table)?.ty().elem {
                        return Err(Error::Fault("element segment type differs from its table"));
                    }
                    let refs = elem.refs().to_vec();
                    store
                        .table_mut(table)?
                        .init(offset, &refs)
                        .map_err(Error::InstantiationTrap)?;
                    store.elems.get_mut(elem_addr)?.drop_refs();
                }
                SegmentMode::Declared => store.elems.get_mut(elem_addr)?.drop_refs(),
                SegmentMode::Passive => {}
            }
        }
        for (segment, &data_addr) in inner.datas.iter().zip(&instance.datas) {
            if let SegmentMode::Active { index, offset } = &segment.mode {
                let offset = ctx.eval(store, offset)?.as_i32()? as u32;
                let memory = *instance
                    .memories
                    .get(*index as usize)
                    .ok_or(Error::Fault("data memory index out of range"))?;
                store
                    .memory(memory)?
                    .write(offset as u64, &segment.bytes)
                    .map_err(Error::InstantiationTrap)?;
                store.datas.get_mut(data_addr)?.drop_bytes();
            }
        }

        if let Some(start) = start {
            if let Err(err) = store.invoke(start, &[]) {
                tracing::debug!(instance = %addr, error = %err, "start function failed");
                return Err(err);
            }
        }
        store.publish_instance(addr);
        tracing::debug!(instance = %addr, "module instantiated");
        Ok(Instance::new(addr))
    }
}

/// Addresses visible to constant expressions during instantiation.
struct InitContext<'a> {
    globals: &'a [GlobalAddr],
    imported_globals: usize,
    funcs: &'a [FuncAddr],
}

impl InitContext<'_> {
    fn eval(&self, store: &Store, expr: &ConstExpr) -> Result<Val> {
        let mut stack: Vec<Val> = Vec::with_capacity(2);
        for op in &expr.0 {
            let val = match *op {
                ConstOp::I32Const(v) => Val::I32(v),
                ConstOp::I64Const(v) => Val::I64(v),
                ConstOp::F32Const(bits) => Val::F32(f32::from_bits(bits)),
                ConstOp::F64Const(bits) => Val::F64(f64::from_bits(bits)),
                ConstOp::RefNull(ty) => Val::Ref(Ref::null(ty).ok_or_else(|| {
                    LinkError::InvalidInitializer(format!("ref.null {ty}"))
                })?),
                ConstOp::RefFunc(index) => {
                    let addr = self.funcs.get(index as usize).copied().ok_or_else(|| {
                        LinkError::InvalidInitializer(format!("ref.func {index} out of range"))
                    })?;
                    Val::Ref(Ref::Func(Some(addr)))
                }
                ConstOp::GlobalGet(index) => {
                    if index as usize >= self.imported_globals {
                        return Err(LinkError::InvalidInitializer(format!(
                            "global.get {index} does not refer to an imported global"
                        ))
                        .into());
                    }
                    store.global(self.globals[index as usize])?.get()
                }
                ConstOp::I32Add | ConstOp::I32Sub | ConstOp::I32Mul => {
                    let (a, b) = pop_pair(&mut stack)?;
                    let (a, b) = (a.as_i32()?, b.as_i32()?);
                    Val::I32(match op {
                        ConstOp::I32Add => a.wrapping_add(b),
                        ConstOp::I32Sub => a.wrapping_sub(b),
                        _ => a.wrapping_mul(b),
                    })
                }
                ConstOp::I64Add | ConstOp::I64Sub | ConstOp::I64Mul => {
                    let (a, b) = pop_pair(&mut stack)?;
                    let (a, b) = (a.as_i64()?, b.as_i64()?);
                    Val::I64(match op {
                        ConstOp::I64Add => a.wrapping_add(b),
                        ConstOp::I64Sub => a.wrapping_sub(b),
                        _ => a.wrapping_mul(b),
                    })
                }
            };
            stack.push(val);
        }
        match stack.as_slice() {
            [val] => Ok(*val),
            _ => Err(LinkError::InvalidInitializer(format!(
                "constant expression left {} values",
                stack.len()
            ))
            .into()),
        }
    }

    fn eval_ref(&self, store: &Store, expr: &ConstExpr) -> Result<Ref> {
        self.eval(store, expr)?.as_reference()
    }
}

fn pop_pair(stack: &mut Vec<Val>) -> Result<(Val, Val)> {
    let b = stack.pop();
    let a = stack.pop();
    match (a, b) {
        (Some(a), Some(b)) => Ok((a, b)),
        _ => Err(LinkError::InvalidInitializer("operand stack underflow".into()).into()),
    }
}

fn desc_kind(desc: &ImportDesc) -> ExternKind {
    match desc {
        ImportDesc::Func(_) => ExternKind::Func,
        ImportDesc::Table(_) => ExternKind::Table,
        ImportDesc::Memory(_) => ExternKind::Memory,
        ImportDesc::Global(_) => ExternKind::Global,
        ImportDesc::Tag(_) => ExternKind::Tag,
    }
}

fn extern_kind(item: &Extern) -> ExternKind {
    match item {
        Extern::Func(_) => ExternKind::Func,
        Extern::Table(_) => ExternKind::Table,
        Extern::Memory(_) => ExternKind::Memory,
        Extern::Global(_) => ExternKind::Global,
        Extern::Tag(_) => ExternKind::Tag,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Trap;
    use crate::module::types::{GlobalType, MemoryType, ValType};

    #[test]
    fn missing_import_is_reported() {
        let engine = Engine::default();
        let module = Module::new(&engine, r#"(module (import "env" "f" (func)))"#).unwrap();
        let mut store = Store::new(&engine);
        let err = Linker::new(&engine)
            .instantiate(&mut store, &module)
            .unwrap_err();
        assert!(
            matches!(
                &err,
                Error::Link(LinkError::UnknownImport { module, name })
                    if module == "env" && name == "f"
            ),
            "{err}"
        );
    }

    #[test]
    fn import_signatures_are_checked() {
        let engine = Engine::default();
        let module = Module::new(
            &engine,
            r#"(module (import "env" "f" (func (param i32))))"#,
        )
        .unwrap();
        let mut store = Store::new(&engine);
        let mut linker = Linker::new(&engine);
        linker.func_new("env", "f", FuncType::new([ValType::I64], []), |_, _| {
            Ok(HostControl::Return(vec![]))
        });
        let err = linker.instantiate(&mut store, &module).unwrap_err();
        assert!(
            matches!(err, Error::Link(LinkError::IncompatibleImportType { .. })),
            "{err}"
        );
    }

    #[test]
    fn memory_limits_must_fit() {
        let engine = Engine::default();
        let module = Module::new(
            &engine,
            r#"(module (import "env" "mem" (memory 2 4)))"#,
        )
        .unwrap();
        let mut store = Store::new(&engine);
        let mut linker = Linker::new(&engine);
        linker.memory(
            &mut store,
            "env",
            "mem",
            MemoryInstance::new(MemoryType::new(1, Some(4))).unwrap(),
        );
        assert!(linker.instantiate(&mut store, &module).is_err());

        let mut linker = Linker::new(&engine);
        linker.memory(
            &mut store,
            "env",
            "mem",
            MemoryInstance::new(MemoryType::new(3, Some(4))).unwrap(),
        );
        assert!(linker.instantiate(&mut store, &module).is_ok());
    }

    #[test]
    fn globals_initialize_from_imports() {
        let engine = Engine::default();
        let module = Module::new(
            &engine,
            r#"(module
                (import "env" "base" (global i32))
                (global (export "derived") i32 (i32.add (global.get 0) (i32.const 5))))"#,
        )
        .unwrap();
        let mut store = Store::new(&engine);
        let mut linker = Linker::new(&engine);
        linker.global(
            &mut store,
            "env",
            "base",
            GlobalInstance::new(
                GlobalType {
                    content: ValType::I32,
                    mutable: false,
                },
                Val::I32(10),
            )
            .unwrap(),
        );
        let instance = linker.instantiate(&mut store, &module).unwrap();
        assert_eq!(instance.get_global(&store, "derived").unwrap(), Val::I32(15));
    }

    #[test]
    fn definitions_from_another_store_are_rejected() {
        let engine = Engine::default();
        let module = Module::new(
            &engine,
            r#"(module
                (import "env" "mem" (memory 1))
                (func (export "poke") (i32.store (i32.const 0) (i32.const 9))))"#,
        )
        .unwrap();
        let mut store_a = Store::new(&engine);
        let mut store_b = Store::new(&engine);
        let mut linker = Linker::new(&engine);
        linker.memory(
            &mut store_a,
            "env",
            "mem",
            MemoryInstance::new(MemoryType::new(1, None)).unwrap(),
        );
        let own = MemoryInstance::new(MemoryType::new(1, None)).unwrap();
        store_b.alloc_memory(own.clone());

        let err = linker.instantiate(&mut store_b, &module).unwrap_err();
        assert!(
            matches!(
                &err,
                Error::WrongStore { module, name } if module == "env" && name == "mem"
            ),
            "{err}"
        );
        assert_eq!(own.read_u32(0).unwrap(), 0);
        assert!(linker.instantiate(&mut store_a, &module).is_ok());
    }

    #[test]
    fn failed_start_unpublishes_instance() {
        let engine = Engine::default();
        let module = Module::new(
            &engine,
            r#"(module (func $boom unreachable) (start $boom))"#,
        )
        .unwrap();
        let mut store = Store::new(&engine);
        let err = Linker::new(&engine)
            .instantiate(&mut store, &module)
            .unwrap_err();
        assert!(matches!(err, Error::Trap(Trap::Unreachable)), "{err}");
        assert_eq!(store.instance_count(), 0);
    }

    #[test]
    fn instances_can_be_imported_by_name() {
        let engine = Engine::default();
        let mut store = Store::new(&engine);
        let mut linker = Linker::new(&engine);
        let provider = Module::new(
            &engine,
            r#"(module (func (export "seven") (result i32) i32.const 7))"#,
        )
        .unwrap();
        let provider = linker.instantiate(&mut store, &provider).unwrap();
        linker.instance(&store, "lib", &provider).unwrap();
        let consumer = Module::new(
            &engine,
            r#"(module
                (import "lib" "seven" (func $seven (result i32)))
                (func (export "run") (result i32) call $seven i32.const 1 i32.add))"#,
        )
        .unwrap();
        let consumer = linker.instantiate(&mut store, &consumer).unwrap();
        assert_eq!(consumer.call::<(), i32>(&mut store, "run", ()).unwrap(), 8);
        assert_eq!(store.instance_count(), 2);
    }
}
