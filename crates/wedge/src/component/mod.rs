//! Component-model runtime.
//!
//! A component instance groups core module instances, owns a resource
//! handle table and publishes lifted exports. Calls between components go
//! through [`canon::call_export`], which tracks each call as a [`Task`] so
//! borrowed handles can be checked when the call returns.

pub mod canon;
mod resource;
mod task;

use std::collections::HashMap;

pub use canon::call_export;
pub use resource::{ResourceHandle, ResourceType, MAX_HANDLES};
pub use task::{Task, TaskEvent, TaskState, TaskSummary};

use resource::ResourceTable;

use crate::error::{Error, Result};
use crate::instance::Instance;
use crate::module::types::{FuncType, ValType};
use crate::store::{Arena, ComponentAddr, FuncAddr, InstanceAddr, MemoryAddr, Store, TaskId};
use crate::value::Val;

/// Component-level value types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComponentType {
    Bool,
    S8,
    U8,
    S16,
    U16,
    S32,
    U32,
    S64,
    U64,
    F32,
    F64,
    Char,
    String,
    Own(ResourceType),
    Borrow(ResourceType),
}

impl ComponentType {
    /// Core types this type occupies as a parameter.
    pub fn flatten(self) -> &'static [ValType] {
        match self {
            ComponentType::S64 | ComponentType::U64 => &[ValType::I64],
            ComponentType::F32 => &[ValType::F32],
            ComponentType::F64 => &[ValType::F64],
            ComponentType::String => &[ValType::I32, ValType::I32],
            _ => &[ValType::I32],
        }
    }
}

/// Component-level values. Handles are indices into the holder's table.
#[derive(Debug, Clone, PartialEq)]
pub enum ComponentVal {
    Bool(bool),
    S8(i8),
    U8(u8),
    S16(i16),
    U16(u16),
    S32(i32),
    U32(u32),
    S64(i64),
    U64(u64),
    F32(f32),
    F64(f64),
    Char(char),
    String(String),
    Own(u32),
    Borrow(u32),
}

impl ComponentVal {
    pub(crate) fn matches(&self, ty: ComponentType) -> bool {
        use ComponentType as T;
        use ComponentVal as V;
        matches!(
            (self, ty),
            (V::Bool(_), T::Bool)
                | (V::S8(_), T::S8)
                | (V::U8(_), T::U8)
                | (V::S16(_), T::S16)
                | (V::U16(_), T::U16)
                | (V::S32(_), T::S32)
                | (V::U32(_), T::U32)
                | (V::S64(_), T::S64)
                | (V::U64(_), T::U64)
                | (V::F32(_), T::F32)
                | (V::F64(_), T::F64)
                | (V::Char(_), T::Char)
                | (V::String(_), T::String)
                | (V::Own(_), T::Own(_))
                | (V::Borrow(_), T::Borrow(_))
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComponentFuncType {
    pub params: Vec<ComponentType>,
    pub result: Option<ComponentType>,
}

impl ComponentFuncType {
    pub fn new(
        params: impl IntoIterator<Item = ComponentType>,
        result: Option<ComponentType>,
    ) -> Self {
        ComponentFuncType {
            params: params.into_iter().collect(),
            result,
        }
    }

    /// Core signature of a function lifted with this type. A string result
    /// is returned through a pointer to a `(ptr, len)` pair.
    pub fn core_type(&self) -> FuncType {
        let params = self.params.iter().flat_map(|ty| ty.flatten().iter().copied());
        let results: &[ValType] = match self.result {
            None => &[],
            Some(ComponentType::String) => &[ValType::I32],
            Some(ty) => ty.flatten(),
        };
        FuncType::new(params, results.iter().copied())
    }
}

/// Canonical ABI options attached to a lifted function.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CanonOptions {
    pub memory: Option<MemoryAddr>,
    pub realloc: Option<FuncAddr>,
    pub post_return: Option<FuncAddr>,
}

#[derive(Debug, Clone)]
pub(crate) struct LiftedFunc {
    pub(crate) func: FuncAddr,
    pub(crate) ty: ComponentFuncType,
    pub(crate) options: CanonOptions,
}

#[derive(Debug)]
pub(crate) struct ResourceTypeDef {
    pub(crate) name: String,
    pub(crate) dtor: Option<FuncAddr>,
    /// The component implementing the resource.
    pub(crate) owner: ComponentAddr,
}

#[derive(Debug)]
pub(crate) struct ComponentData {
    name: String,
    modules: Vec<InstanceAddr>,
    resources: ResourceTable,
    pub(crate) exports: HashMap<String, LiftedFunc>,
}

/// Per-store component state: instances, resource types and tasks.
#[derive(Debug, Default)]
pub(crate) struct ComponentStore {
    instances: Arena<ComponentAddr, ComponentData>,
    resource_types: Vec<ResourceTypeDef>,
    tasks: Arena<TaskId, Task>,
    /// Tasks currently running, innermost last.
    active: Vec<TaskId>,
}

impl ComponentStore {
    pub(crate) fn data(&self, addr: ComponentAddr) -> Result<&ComponentData> {
        self.instances.get(addr)
    }

    pub(crate) fn table(&self, addr: ComponentAddr) -> Result<&ResourceTable> {
        Ok(&self.instances.get(addr)?.resources)
    }

    pub(crate) fn table_mut(&mut self, addr: ComponentAddr) -> Result<&mut ResourceTable> {
        Ok(&mut self.instances.get_mut(addr)?.resources)
    }

    pub(crate) fn resource_type(&self, rt: ResourceType) -> Result<&ResourceTypeDef> {
        self.resource_types
            .get(rt.0 as usize)
            .ok_or_else(|| Error::Canonical(format!("unknown resource type {}", rt.0)))
    }

    pub(crate) fn task_mut(&mut self, id: TaskId) -> Result<&mut Task> {
        self.tasks.get_mut(id)
    }

    pub(crate) fn handle_new(
        &mut self,
        addr: ComponentAddr,
        rep: u32,
        rt: ResourceType,
        own: bool,
    ) -> Result<u32> {
        self.resource_type(rt)?;
        let handle = if own {
            ResourceHandle::own(rep, rt)
        } else {
            ResourceHandle::borrow(rep, rt, None)
        };
        self.table_mut(addr)?.insert(handle)
    }

    pub(crate) fn handle_lend(
        &mut self,
        addr: ComponentAddr,
        handle: u32,
        task: TaskId,
    ) -> Result<()> {
        self.tasks.get(task)?;
        let entry = self.table_mut(addr)?.get_mut(handle)?;
        if !entry.own {
            return Err(Error::Canonical(format!(
                "handle {handle} is a borrow and cannot be lent"
            )));
        }
        if entry.consumed {
            return Err(Error::ResourceConsumed(handle));
        }
        entry.lend_count += 1;
        self.tasks.get_mut(task)?.lenders.push((addr, handle));
        Ok(())
    }

    /// Remove a handle. Returns the destructor call an own handle needs.
    pub(crate) fn handle_drop(
        &mut self,
        addr: ComponentAddr,
        handle: u32,
    ) -> Result<Option<(FuncAddr, u32)>> {
        let entry = self.table(addr)?.get(handle)?;
        if entry.lend_count > 0 {
            return Err(Error::ResourceBorrowed {
                handle,
                lend_count: entry.lend_count,
            });
        }
        if entry.consumed {
            return Err(Error::ResourceConsumed(handle));
        }
        if let Some(scope) = entry.scope {
            if self.active.last() != Some(&scope) {
                return Err(Error::BorrowScopeMismatch(handle));
            }
        }

        let entry = self.table_mut(addr)?.remove(handle)?;
        if entry.own {
            let dtor = self.resource_type(entry.ty)?.dtor;
            return Ok(dtor.map(|dtor| (dtor, entry.rep)));
        }
        if let Some(scope) = entry.scope {
            let task = self.tasks.get_mut(scope)?;
            task.borrow_count = task.borrow_count.saturating_sub(1);
            task.borrows.retain(|h| *h != handle);
            task.events.push(TaskEvent::BorrowDropped { handle });
        }
        Ok(None)
    }

    pub(crate) fn open_task(
        &mut self,
        caller: ComponentAddr,
        callee: ComponentAddr,
        options: CanonOptions,
    ) -> TaskId {
        let id = self.tasks.alloc_recycled(Task::new(caller, callee, options));
        self.active.push(id);
        tracing::debug!(task = %id, %caller, %callee, "task opened");
        id
    }

    /// Close a task: lenders are released and borrows it left behind in the
    /// callee are revoked.
    fn close_task(&mut self, id: TaskId) -> Result<Task> {
        if let Some(pos) = self.active.iter().rposition(|t| *t == id) {
            self.active.remove(pos);
        }
        let task = self.tasks.release(id).ok_or(Error::InvalidAddress {
            kind: "task",
            addr: id.index(),
        })?;
        for (addr, handle) in &task.lenders {
            if let Ok(entry) = self.table_mut(*addr).and_then(|t| t.get_mut(*handle)) {
                entry.lend_count = entry.lend_count.saturating_sub(1);
            }
        }
        if let Ok(table) = self.table_mut(task.callee) {
            for handle in &task.borrows {
                table.remove(*handle).ok();
            }
        }
        Ok(task)
    }

    pub(crate) fn complete_task(&mut self, id: TaskId) -> Result<TaskSummary> {
        let task = self.close_task(id)?;
        if task.borrow_count != 0 {
            tracing::warn!(
                task = %id,
                count = task.borrow_count,
                "task completed with outstanding borrows; revoking them"
            );
            return Err(Error::DanglingBorrow {
                task: id.index(),
                count: task.borrow_count,
            });
        }
        tracing::debug!(task = %id, events = task.events.len(), "task completed");
        Ok(TaskSummary {
            task: id,
            events: task.events,
        })
    }

    pub(crate) fn abort_task(&mut self, id: TaskId) {
        if self.close_task(id).is_ok() {
            tracing::debug!(task = %id, "task aborted");
        }
    }
}

/// Handle to a component instance living in a store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ComponentInstance {
    addr: ComponentAddr,
}

impl ComponentInstance {
    pub fn new(store: &mut Store, name: &str) -> Self {
        let addr = store.components.instances.alloc(ComponentData {
            name: name.to_string(),
            modules: Vec::new(),
            resources: ResourceTable::default(),
            exports: HashMap::new(),
        });
        tracing::debug!(%addr, name, "component instance created");
        ComponentInstance { addr }
    }

    pub fn addr(&self) -> ComponentAddr {
        self.addr
    }

    pub fn name<'s>(&self, store: &'s Store) -> Result<&'s str> {
        Ok(&store.components.data(self.addr)?.name)
    }

    /// Record a core module instance as part of this component.
    pub fn add_module(&self, store: &mut Store, instance: Instance) -> Result<()> {
        store.instance(instance.addr())?;
        store
            .components
            .instances
            .get_mut(self.addr)?
            .modules
            .push(instance.addr());
        Ok(())
    }

    pub fn modules(&self, store: &Store) -> Result<Vec<Instance>> {
        Ok(store
            .components
            .data(self.addr)?
            .modules
            .iter()
            .map(|addr| Instance::new(*addr))
            .collect())
    }

    /// Define a resource type implemented by this component. The destructor,
    /// if any, takes the representation as its only argument.
    pub fn define_resource(
        &self,
        store: &mut Store,
        name: &str,
        dtor: Option<FuncAddr>,
    ) -> Result<ResourceType> {
        store.components.data(self.addr)?;
        if let Some(dtor) = dtor {
            let expected = FuncType::new([ValType::I32], []);
            if store.func(dtor)?.ty() != &expected {
                return Err(Error::Canonical(format!(
                    "destructor of resource `{name}` must have type [i32] -> []"
                )));
            }
        }
        let rt = ResourceType(store.components.resource_types.len() as u32);
        store.components.resource_types.push(ResourceTypeDef {
            name: name.to_string(),
            dtor,
            owner: self.addr,
        });
        Ok(rt)
    }

    /// Name of a resource type.
    pub fn resource_name<'s>(store: &'s Store, rt: ResourceType) -> Result<&'s str> {
        Ok(&store.components.resource_type(rt)?.name)
    }

    /// Publish `func` as the component export `name` with type `ty`.
    pub fn lift(
        &self,
        store: &mut Store,
        name: &str,
        func: FuncAddr,
        ty: ComponentFuncType,
        options: CanonOptions,
    ) -> Result<()> {
        let core = ty.core_type();
        if store.func(func)?.ty() != &core {
            return Err(Error::Canonical(format!(
                "core function for `{name}` does not match the lifted type"
            )));
        }
        let uses_strings = ty.params.contains(&ComponentType::String);
        if uses_strings && (options.memory.is_none() || options.realloc.is_none()) {
            return Err(Error::Canonical(format!(
                "`{name}` takes strings and needs both memory and realloc"
            )));
        }
        if ty.result == Some(ComponentType::String) && options.memory.is_none() {
            return Err(Error::Canonical(format!(
                "`{name}` returns a string and needs a memory"
            )));
        }
        if let Some(post) = options.post_return {
            let expected = FuncType::new(core.results().iter().copied(), []);
            if store.func(post)?.ty() != &expected {
                return Err(Error::Canonical(format!(
                    "post-return of `{name}` must take the core results"
                )));
            }
        }
        store
            .components
            .instances
            .get_mut(self.addr)?
            .exports
            .insert(name.to_string(), LiftedFunc { func, ty, options });
        Ok(())
    }

    /// Type of a lifted export.
    pub fn export_type(&self, store: &Store, name: &str) -> Result<ComponentFuncType> {
        store
            .components
            .data(self.addr)?
            .exports
            .get(name)
            .map(|lifted| lifted.ty.clone())
            .ok_or_else(|| Error::ExportNotFound(name.to_string()))
    }

    pub fn handle_new(
        &self,
        store: &mut Store,
        rep: u32,
        rt: ResourceType,
        own: bool,
    ) -> Result<u32> {
        store.components.handle_new(self.addr, rep, rt, own)
    }

    /// Lend an own handle to `task`. The lend is released when the task
    /// completes.
    pub fn handle_lend(&self, store: &mut Store, handle: u32, task: TaskId) -> Result<()> {
        store.components.handle_lend(self.addr, handle, task)
    }

    /// Drop a handle, running the resource destructor for own handles.
    pub fn handle_drop(&self, store: &mut Store, handle: u32) -> Result<()> {
        if let Some((dtor, rep)) = store.components.handle_drop(self.addr, handle)? {
            tracing::debug!(component = %self.addr, handle, rep, "running resource destructor");
            store.invoke(dtor, &[Val::I32(rep as i32)])?;
        }
        Ok(())
    }

    pub fn handle_rep(&self, store: &Store, handle: u32) -> Result<u32> {
        Ok(store.components.table(self.addr)?.get(handle)?.rep)
    }

    pub fn handle_get(&self, store: &Store, handle: u32) -> Result<ResourceHandle> {
        store.components.table(self.addr)?.get(handle).cloned()
    }

    /// Number of live handles in this component's table.
    pub fn handle_count(&self, store: &Store) -> Result<usize> {
        Ok(store.components.table(self.addr)?.len())
    }

    /// Open a task for a call from this component into `callee`.
    pub fn open_task(
        &self,
        store: &mut Store,
        callee: ComponentInstance,
        options: CanonOptions,
    ) -> Result<TaskId> {
        store.components.data(self.addr)?;
        store.components.data(callee.addr)?;
        Ok(store.components.open_task(self.addr, callee.addr, options))
    }

    /// Call `callee`'s export `name` on behalf of this component.
    pub fn call(
        &self,
        store: &mut Store,
        callee: ComponentInstance,
        name: &str,
        args: &[ComponentVal],
    ) -> Result<Vec<ComponentVal>> {
        call_export(store, *self, callee, name, args)
    }
}

impl Store {
    pub fn task(&self, id: TaskId) -> Result<&Task> {
        self.components.tasks.get(id)
    }

    /// Innermost running task.
    pub fn current_task(&self) -> Option<TaskId> {
        self.components.active.last().copied()
    }

    /// Complete a task. Fails with `DanglingBorrow` when borrow handles
    /// created for it are still live; those handles are revoked.
    pub fn complete_task(&mut self, id: TaskId) -> Result<TaskSummary> {
        self.components.complete_task(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Engine;

    fn setup() -> (Store, ComponentInstance, ComponentInstance, ResourceType) {
        let engine = Engine::default();
        let mut store = Store::new(&engine);
        let provider = ComponentInstance::new(&mut store, "provider");
        let consumer = ComponentInstance::new(&mut store, "consumer");
        let rt = provider.define_resource(&mut store, "file", None).unwrap();
        (store, provider, consumer, rt)
    }

    #[test]
    fn lent_handle_cannot_be_dropped_until_task_completes() {
        let (mut store, provider, consumer, rt) = setup();
        let h = consumer.handle_new(&mut store, 7, rt, true).unwrap();
        assert_eq!(h, 1);
        let task = consumer
            .open_task(&mut store, provider, CanonOptions::default())
            .unwrap();
        consumer.handle_lend(&mut store, h, task).unwrap();
        assert_eq!(consumer.handle_get(&store, h).unwrap().lend_count, 1);

        let err = consumer.handle_drop(&mut store, h).unwrap_err();
        assert!(
            matches!(err, Error::ResourceBorrowed { handle: 1, lend_count: 1 }),
            "{err}"
        );

        store.complete_task(task).unwrap();
        assert_eq!(consumer.handle_get(&store, h).unwrap().lend_count, 0);
        consumer.handle_drop(&mut store, h).unwrap();
        assert!(matches!(
            consumer.handle_rep(&store, h),
            Err(Error::UnknownHandle(1))
        ));
    }

    #[test]
    fn only_own_handles_are_lent() {
        let (mut store, provider, consumer, rt) = setup();
        let b = consumer.handle_new(&mut store, 3, rt, false).unwrap();
        let task = consumer
            .open_task(&mut store, provider, CanonOptions::default())
            .unwrap();
        assert!(matches!(
            consumer.handle_lend(&mut store, b, task),
            Err(Error::Canonical(_))
        ));
        let o = consumer.handle_new(&mut store, 4, rt, true).unwrap();
        store
            .components
            .table_mut(consumer.addr())
            .unwrap()
            .get_mut(o)
            .unwrap()
            .consumed = true;
        assert!(matches!(
            consumer.handle_lend(&mut store, o, task),
            Err(Error::ResourceConsumed(_))
        ));
        store.complete_task(task).unwrap();
    }

    #[test]
    fn scoped_borrows_must_be_dropped_before_completion() {
        let (mut store, provider, consumer, rt) = setup();
        let task = consumer
            .open_task(&mut store, provider, CanonOptions::default())
            .unwrap();
        let h = provider.handle_new(&mut store, 9, rt, false).unwrap();
        {
            let table = store.components.table_mut(provider.addr()).unwrap();
            table.get_mut(h).unwrap().scope = Some(task);
        }
        let t = store.components.task_mut(task).unwrap();
        t.borrow_count = 1;
        t.borrows.push(h);

        let err = store.complete_task(task).unwrap_err();
        assert!(matches!(err, Error::DanglingBorrow { count: 1, .. }), "{err}");
        assert_eq!(provider.handle_count(&store).unwrap(), 0);
        assert!(store.current_task().is_none());
        assert!(store.task(task).is_err());
    }

    #[test]
    fn dropping_a_borrow_records_an_event() {
        let (mut store, provider, consumer, rt) = setup();
        let task = consumer
            .open_task(&mut store, provider, CanonOptions::default())
            .unwrap();
        let h = provider.handle_new(&mut store, 9, rt, false).unwrap();
        let table = store.components.table_mut(provider.addr()).unwrap();
        table.get_mut(h).unwrap().scope = Some(task);
        let t = store.components.task_mut(task).unwrap();
        t.borrow_count = 1;
        t.borrows.push(h);

        provider.handle_drop(&mut store, h).unwrap();
        assert_eq!(store.task(task).unwrap().borrow_count(), 0);
        let summary = store.complete_task(task).unwrap();
        assert_eq!(summary.events, vec![TaskEvent::BorrowDropped { handle: h }]);
    }

    #[test]
    fn completed_task_slots_are_reused() {
        let (mut store, provider, consumer, _) = setup();
        let first = consumer
            .open_task(&mut store, provider, CanonOptions::default())
            .unwrap();
        store.complete_task(first).unwrap();
        for _ in 0..100 {
            let task = consumer
                .open_task(&mut store, provider, CanonOptions::default())
                .unwrap();
            assert_eq!(task, first);
            store.complete_task(task).unwrap();
        }
        let outer = consumer
            .open_task(&mut store, provider, CanonOptions::default())
            .unwrap();
        let inner = provider
            .open_task(&mut store, consumer, CanonOptions::default())
            .unwrap();
        assert_ne!(outer, inner);
        store.complete_task(inner).unwrap();
        store.complete_task(outer).unwrap();
    }

    #[test]
    fn lifted_signature_must_match_core_function() {
        let (mut store, provider, _, rt) = setup();
        let f = store.alloc_func(crate::store::FuncInstance::Host(crate::HostFunc::new(
            FuncType::new([ValType::I32], [ValType::I32]),
            |_, args| Ok(crate::HostControl::Return(vec![args[0]])),
        )));
        let ok = ComponentFuncType::new([ComponentType::Borrow(rt)], Some(ComponentType::U32));
        provider
            .lift(&mut store, "rep", f, ok, CanonOptions::default())
            .unwrap();
        let bad = ComponentFuncType::new([ComponentType::S64], Some(ComponentType::U32));
        assert!(matches!(
            provider.lift(&mut store, "bad", f, bad, CanonOptions::default()),
            Err(Error::Canonical(_))
        ));
        let strings = ComponentFuncType::new([ComponentType::String], None);
        assert_eq!(strings.core_type().params(), &[ValType::I32, ValType::I32]);
        assert!(provider.export_type(&store, "rep").is_ok());
    }
}
