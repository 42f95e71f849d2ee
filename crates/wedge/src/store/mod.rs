//! Owner of every runtime instance.
//!
//! Instances live in per-kind arenas and are referred to by opaque
//! addresses. Every lookup is bounds-checked; a removed slot stays empty so
//! stale addresses fail instead of aliasing a newer instance.
//!
//! Removing a module instance only unpublishes it. Its functions keep
//! running for the instances that imported them.

mod global;
mod instances;
mod memory;
mod table;

use std::collections::HashSet;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

pub use global::GlobalInstance;
pub use instances::{DataInstance, ElemInstance, FuncInstance, ModuleInstance, TagInstance};
pub use memory::MemoryInstance;
pub use table::TableInstance;

use crate::component::ComponentStore;
use crate::error::{Error, Result};
use crate::value::Val;
use crate::{interpreter, Engine};

macro_rules! addr_type {
    ($($name:ident => $kind:literal),* $(,)?) => {
        $(
            #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
            pub struct $name(pub(crate) u32);

            impl $name {
                pub fn index(self) -> u32 {
                    self.0
                }
            }

            impl fmt::Display for $name {
                fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                    write!(f, "{}#{}", $kind, self.0)
                }
            }

            impl ArenaAddr for $name {
                const KIND: &'static str = $kind;
                fn from_index(index: u32) -> Self {
                    $name(index)
                }
                fn index(self) -> u32 {
                    self.0
                }
            }
        )*
    };
}

pub(crate) trait ArenaAddr: Copy {
    const KIND: &'static str;
    fn from_index(index: u32) -> Self;
    fn index(self) -> u32;
}

addr_type! {
    FuncAddr => "func",
    TableAddr => "table",
    MemoryAddr => "memory",
    GlobalAddr => "global",
    TagAddr => "tag",
    DataAddr => "data",
    ElemAddr => "elem",
    InstanceAddr => "instance",
    ComponentAddr => "component",
    TaskId => "task",
}

/// Slot vector addressed by `A`.
#[derive(Debug)]
pub(crate) struct Arena<A, T> {
    slots: Vec<Option<T>>,
    /// Slots given back through `release`, reused by `alloc_recycled`.
    free: Vec<u32>,
    _addr: std::marker::PhantomData<A>,
}

impl<A, T> Default for Arena<A, T> {
    fn default() -> Self {
        Arena {
            slots: Vec::new(),
            free: Vec::new(),
            _addr: std::marker::PhantomData,
        }
    }
}

impl<A: ArenaAddr, T> Arena<A, T> {
    pub(crate) fn alloc(&mut self, value: T) -> A {
        let addr = A::from_index(self.slots.len() as u32);
        self.slots.push(Some(value));
        addr
    }

    /// Claim an empty slot. Lookups fail until it is filled, and the
    /// address is never handed out again.
    pub(crate) fn reserve(&mut self) -> A {
        let addr = A::from_index(self.slots.len() as u32);
        self.slots.push(None);
        addr
    }

    pub(crate) fn fill(&mut self, addr: A, value: T) -> Result<()> {
        let slot = self
            .slots
            .get_mut(addr.index() as usize)
            .ok_or(Error::InvalidAddress {
                kind: A::KIND,
                addr: addr.index(),
            })?;
        *slot = Some(value);
        Ok(())
    }

    pub(crate) fn get(&self, addr: A) -> Result<&T> {
        self.slots
            .get(addr.index() as usize)
            .and_then(Option::as_ref)
            .ok_or(Error::InvalidAddress {
                kind: A::KIND,
                addr: addr.index(),
            })
    }

    pub(crate) fn get_mut(&mut self, addr: A) -> Result<&mut T> {
        self.slots
            .get_mut(addr.index() as usize)
            .and_then(Option::as_mut)
            .ok_or(Error::InvalidAddress {
                kind: A::KIND,
                addr: addr.index(),
            })
    }

    pub(crate) fn remove(&mut self, addr: A) -> Option<T> {
        self.slots.get_mut(addr.index() as usize)?.take()
    }

    /// Allocate into a released slot when one is available. Only for
    /// short-lived entries whose addresses never outlive them.
    pub(crate) fn alloc_recycled(&mut self, value: T) -> A {
        while let Some(index) = self.free.pop() {
            if let Some(slot) = self.slots.get_mut(index as usize) {
                if slot.is_none() {
                    *slot = Some(value);
                    return A::from_index(index);
                }
            }
        }
        self.alloc(value)
    }

    /// Remove an entry and make its slot available to `alloc_recycled`.
    pub(crate) fn release(&mut self, addr: A) -> Option<T> {
        let value = self.remove(addr)?;
        self.free.push(addr.index());
        Some(value)
    }

    pub(crate) fn len(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }
}

/// An exported (or importable) entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Extern {
    Func(FuncAddr),
    Table(TableAddr),
    Memory(MemoryAddr),
    Global(GlobalAddr),
    Tag(TagAddr),
}

static NEXT_STORE_ID: AtomicU64 = AtomicU64::new(0);

/// Identity of a [`Store`]. Addresses are only meaningful in the store that
/// handed them out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StoreId(u64);

impl fmt::Display for StoreId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "store#{}", self.0)
    }
}

/// Runtime state: every function, table, memory, global, tag, segment,
/// module instance and component instance allocated through it.
pub struct Store {
    id: StoreId,
    engine: Engine,
    pub(crate) funcs: Arena<FuncAddr, FuncInstance>,
    pub(crate) tables: Arena<TableAddr, TableInstance>,
    pub(crate) memories: Arena<MemoryAddr, MemoryInstance>,
    pub(crate) globals: Arena<GlobalAddr, GlobalInstance>,
    pub(crate) tags: Arena<TagAddr, TagInstance>,
    pub(crate) datas: Arena<DataAddr, DataInstance>,
    pub(crate) elems: Arena<ElemAddr, ElemInstance>,
    pub(crate) instances: Arena<InstanceAddr, Arc<ModuleInstance>>,
    /// Filled instance slots that lookups by address do not see: removed
    /// instances and ones whose instantiation has not finished.
    unpublished: HashSet<InstanceAddr>,
    /// Wasm frames active in machines suspended below the current one, so
    /// that host re-entry counts against the same depth limit.
    pub(crate) call_depth: usize,
    pub(crate) components: ComponentStore,
}

impl Store {
    pub fn new(engine: &Engine) -> Self {
        Store {
            id: StoreId(NEXT_STORE_ID.fetch_add(1, Ordering::Relaxed)),
            engine: engine.clone(),
            funcs: Arena::default(),
            tables: Arena::default(),
            memories: Arena::default(),
            globals: Arena::default(),
            tags: Arena::default(),
            datas: Arena::default(),
            elems: Arena::default(),
            instances: Arena::default(),
            unpublished: HashSet::new(),
            call_depth: 0,
            components: ComponentStore::default(),
        }
    }

    pub fn id(&self) -> StoreId {
        self.id
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    pub fn func(&self, addr: FuncAddr) -> Result<&FuncInstance> {
        self.funcs.get(addr)
    }

    pub fn table(&self, addr: TableAddr) -> Result<&TableInstance> {
        self.tables.get(addr)
    }

    pub fn table_mut(&mut self, addr: TableAddr) -> Result<&mut TableInstance> {
        self.tables.get_mut(addr)
    }

    /// A handle to the memory at `addr`. The handle shares the bytes with
    /// the store.
    pub fn memory(&self, addr: MemoryAddr) -> Result<&MemoryInstance> {
        self.memories.get(addr)
    }

    pub fn global(&self, addr: GlobalAddr) -> Result<&GlobalInstance> {
        self.globals.get(addr)
    }

    pub fn global_mut(&mut self, addr: GlobalAddr) -> Result<&mut GlobalInstance> {
        self.globals.get_mut(addr)
    }

    pub fn tag(&self, addr: TagAddr) -> Result<&TagInstance> {
        self.tags.get(addr)
    }

    /// A published module instance.
    pub fn instance(&self, addr: InstanceAddr) -> Result<&Arc<ModuleInstance>> {
        if self.unpublished.contains(&addr) {
            return Err(Error::InvalidAddress {
                kind: "instance",
                addr: addr.0,
            });
        }
        self.instances.get(addr)
    }

    /// Any instance whose slot was filled, published or not. Code that is
    /// already running resolves its own instance through this.
    pub(crate) fn defining_instance(&self, addr: InstanceAddr) -> Result<&Arc<ModuleInstance>> {
        self.instances.get(addr)
    }

    /// Invalidate a module instance for lookups by address. Functions,
    /// memories and other items it defined stay alive for instances that
    /// imported them.
    pub fn remove_instance(&mut self, addr: InstanceAddr) -> Result<()> {
        self.instance(addr)?;
        self.unpublished.insert(addr);
        tracing::debug!(%addr, "module instance removed");
        Ok(())
    }

    /// Fill a reserved instance slot without publishing it.
    pub(crate) fn stage_instance(
        &mut self,
        addr: InstanceAddr,
        instance: Arc<ModuleInstance>,
    ) -> Result<()> {
        self.instances.fill(addr, instance)?;
        self.unpublished.insert(addr);
        Ok(())
    }

    pub(crate) fn publish_instance(&mut self, addr: InstanceAddr) {
        self.unpublished.remove(&addr);
    }

    pub fn alloc_memory(&mut self, memory: MemoryInstance) -> MemoryAddr {
        self.memories.alloc(memory)
    }

    pub fn alloc_global(&mut self, global: GlobalInstance) -> GlobalAddr {
        self.globals.alloc(global)
    }

    pub fn alloc_table(&mut self, table: TableInstance) -> TableAddr {
        self.tables.alloc(table)
    }

    pub fn alloc_tag(&mut self, tag: TagInstance) -> TagAddr {
        self.tags.alloc(tag)
    }

    pub fn alloc_func(&mut self, func: FuncInstance) -> FuncAddr {
        self.funcs.alloc(func)
    }

    /// Call the function at `addr` with dynamically typed arguments.
    pub fn invoke(&mut self, addr: FuncAddr, args: &[Val]) -> Result<Vec<Val>> {
        interpreter::invoke(self, addr, args)
    }

    /// Number of published module instances.
    pub fn instance_count(&self) -> usize {
        self.instances.len() - self.unpublished.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::module::types::{GlobalType, ValType};

    #[test]
    fn removed_slot_stays_invalid() {
        let mut arena: Arena<GlobalAddr, u8> = Arena::default();
        let a = arena.alloc(1);
        let b = arena.alloc(2);
        assert_eq!(arena.remove(a), Some(1));
        assert!(matches!(
            arena.get(a),
            Err(Error::InvalidAddress { kind: "global", addr: 0 })
        ));
        assert_eq!(*arena.get(b).unwrap(), 2);
        let reserved = arena.reserve();
        assert_eq!(reserved, GlobalAddr(2));
        assert!(arena.get(reserved).is_err());
        arena.fill(reserved, 3).unwrap();
        assert_eq!(*arena.get(reserved).unwrap(), 3);
    }

    #[test]
    fn released_slots_are_recycled() {
        let mut arena: Arena<TaskId, u8> = Arena::default();
        let a = arena.alloc_recycled(1);
        let b = arena.alloc_recycled(2);
        assert_eq!(arena.release(a), Some(1));
        assert_eq!(arena.release(a), None);
        assert_eq!(arena.alloc_recycled(3), a);
        assert_eq!(arena.alloc_recycled(4), TaskId(2));
        assert_eq!(*arena.get(b).unwrap(), 2);
        assert_eq!(arena.len(), 3);
    }

    #[test]
    fn unknown_addresses_fail() {
        let engine = Engine::default();
        let mut store = Store::new(&engine);
        let g = store.alloc_global(
            GlobalInstance::new(
                GlobalType {
                    content: ValType::I64,
                    mutable: false,
                },
                Val::I64(3),
            )
            .unwrap(),
        );
        assert_eq!(store.global(g).unwrap().get(), Val::I64(3));
        assert!(store.global(GlobalAddr(9)).is_err());
        assert!(store.func(FuncAddr(0)).is_err());
    }

    #[test]
    fn stores_have_distinct_ids() {
        let engine = Engine::default();
        let a = Store::new(&engine);
        let b = Store::new(&engine);
        assert_ne!(a.id(), b.id());
    }
}
