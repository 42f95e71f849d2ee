//! Host-function bridge.
//!
//! A host function is a native callback with a declared wasm signature. The
//! interpreter pops the arguments in declared order, hands them to the
//! callback together with a [`Caller`] that exposes the calling instance's
//! memories, checks the returned values against the declared result types,
//! and pushes them back.

use std::fmt;
use std::sync::Arc;

use crate::error::{Error, Result, Trap};
use crate::module::types::FuncType;
use crate::store::{Extern, FuncAddr, InstanceAddr, MemoryInstance, Store};
use crate::value::Val;

/// What a host callback asks the interpreter to do next.
#[derive(Debug, Clone, PartialEq)]
pub enum HostControl {
    /// Push these results and continue.
    Return(Vec<Val>),
    /// Unwind every frame and report `Trap::Exit` to the embedder.
    Exit(i32),
}

pub type HostCallback =
    dyn Fn(&mut Caller<'_>, &[Val]) -> std::result::Result<HostControl, Trap> + Send + Sync;

/// A typed native callback.
#[derive(Clone)]
pub struct HostFunc {
    ty: FuncType,
    callback: Arc<HostCallback>,
}

impl HostFunc {
    pub fn new<F>(ty: FuncType, callback: F) -> Self
    where
        F: Fn(&mut Caller<'_>, &[Val]) -> std::result::Result<HostControl, Trap>
            + Send
            + Sync
            + 'static,
    {
        HostFunc {
            ty,
            callback: Arc::new(callback),
        }
    }

    pub fn ty(&self) -> &FuncType {
        &self.ty
    }

    /// Run the callback and validate its results. Arguments are expected to
    /// have been checked by the caller.
    pub(crate) fn call(&self, caller: &mut Caller<'_>, args: &[Val]) -> Result<Vec<Val>> {
        caller.store.engine().statistics().add_host_call();
        match (self.callback)(caller, args)? {
            HostControl::Return(results) => {
                crate::value::check_types(&results, self.ty.results())?;
                Ok(results)
            }
            HostControl::Exit(code) => {
                tracing::debug!(code, "host requested exit");
                Err(Error::Trap(Trap::Exit { code }))
            }
        }
    }
}

impl fmt::Debug for HostFunc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostFunc").field("ty", &self.ty).finish()
    }
}

/// Context handed to a host callback.
pub struct Caller<'a> {
    pub(crate) store: &'a mut Store,
    pub(crate) instance: Option<InstanceAddr>,
}

impl<'a> Caller<'a> {
    pub(crate) fn new(store: &'a mut Store, instance: Option<InstanceAddr>) -> Self {
        Caller { store, instance }
    }

    pub fn store(&self) -> &Store {
        self.store
    }

    pub fn store_mut(&mut self) -> &mut Store {
        self.store
    }

    /// Module instance whose code made the call, if any.
    pub fn instance(&self) -> Option<InstanceAddr> {
        self.instance
    }

    /// Memory `index` of the calling instance.
    pub fn memory(&self, index: u32) -> std::result::Result<MemoryInstance, Trap> {
        let addr = self
            .instance
            .and_then(|inst| self.store.defining_instance(inst).ok())
            .and_then(|inst| inst.memory(index))
            .ok_or_else(|| Trap::Host(format!("caller has no memory {index}")))?;
        self.store
            .memory(addr)
            .cloned()
            .map_err(|e| Trap::Host(e.to_string()))
    }

    /// A memory exported by the calling instance under `name`.
    pub fn exported_memory(&self, name: &str) -> std::result::Result<MemoryInstance, Trap> {
        let export = self
            .instance
            .and_then(|inst| self.store.defining_instance(inst).ok())
            .and_then(|inst| inst.export(name));
        match export {
            Some(Extern::Memory(addr)) => self
                .store
                .memory(addr)
                .cloned()
                .map_err(|e| Trap::Host(e.to_string())),
            _ => Err(Trap::Host(format!("caller exports no memory `{name}`"))),
        }
    }

    /// Call back into wasm.
    pub fn invoke(&mut self, func: FuncAddr, args: &[Val]) -> Result<Vec<Val>> {
        self.store.invoke(func, args)
    }
}

impl From<Error> for Trap {
    fn from(err: Error) -> Self {
        match err {
            Error::Trap(trap) => trap,
            other => Trap::Host(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::module::types::ValType;
    use crate::Engine;

    #[test]
    fn results_are_type_checked() {
        let engine = Engine::default();
        let mut store = Store::new(&engine);
        let f = HostFunc::new(FuncType::new([], [ValType::I32]), |_, _| {
            Ok(HostControl::Return(vec![Val::I64(1)]))
        });
        let mut caller = Caller::new(&mut store, None);
        assert!(matches!(
            f.call(&mut caller, &[]),
            Err(Error::TypeNotMatch { .. })
        ));
    }

    #[test]
    fn exit_becomes_trap() {
        let engine = Engine::default();
        let mut store = Store::new(&engine);
        let f = HostFunc::new(FuncType::new([ValType::I32], []), |_, args| {
            Ok(HostControl::Exit(args[0].as_i32()?))
        });
        let mut caller = Caller::new(&mut store, None);
        let err = f.call(&mut caller, &[Val::I32(3)]).unwrap_err();
        assert!(matches!(err, Error::Trap(Trap::Exit { code: 3 })));
        assert_eq!(engine.statistics().host_call_count(), 1);
    }

    #[test]
    fn memory_requires_calling_instance() {
        let engine = Engine::default();
        let mut store = Store::new(&engine);
        let caller = Caller::new(&mut store, None);
        assert!(caller.memory(0).is_err());
    }
}
