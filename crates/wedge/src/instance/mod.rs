use crate::error::{Error, Result};
use crate::store::{Extern, FuncAddr, InstanceAddr, MemoryInstance, Store};
use crate::value::{Val, WasmArgs, WasmResults};

/// Handle to an instantiated module. The handle is only meaningful for the
/// store it was instantiated in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Instance {
    addr: InstanceAddr,
}

impl Instance {
    pub(crate) fn new(addr: InstanceAddr) -> Self {
        Instance { addr }
    }

    pub fn addr(&self) -> InstanceAddr {
        self.addr
    }

    /// Call an exported function by name (typed API).
    pub fn call<A: WasmArgs, R: WasmResults>(
        &self,
        store: &mut Store,
        name: &str,
        args: A,
    ) -> Result<R> {
        let vals = self.call_dynamic(store, name, &args.to_vals())?;
        R::from_vals(&vals)
    }

    /// Call an exported function by name (dynamic API).
    pub fn call_dynamic(&self, store: &mut Store, name: &str, args: &[Val]) -> Result<Vec<Val>> {
        let func = self.get_func(store, name)?;
        store.invoke(func, args)
    }

    pub fn get_export(&self, store: &Store, name: &str) -> Result<Extern> {
        store
            .instance(self.addr)?
            .export(name)
            .ok_or_else(|| Error::ExportNotFound(name.to_string()))
    }

    pub fn get_func(&self, store: &Store, name: &str) -> Result<FuncAddr> {
        match self.get_export(store, name)? {
            Extern::Func(addr) => Ok(addr),
            _ => Err(Error::ExportNotFound(format!("function `{name}`"))),
        }
    }

    /// Get an exported global's value by name.
    pub fn get_global(&self, store: &Store, name: &str) -> Result<Val> {
        match self.get_export(store, name)? {
            Extern::Global(addr) => Ok(store.global(addr)?.get()),
            _ => Err(Error::ExportNotFound(format!("global `{name}`"))),
        }
    }

    /// Set an exported mutable global. The value must match its type.
    pub fn set_global(&self, store: &mut Store, name: &str, value: Val) -> Result<()> {
        match self.get_export(store, name)? {
            Extern::Global(addr) => store.global_mut(addr)?.set(value),
            _ => Err(Error::ExportNotFound(format!("global `{name}`"))),
        }
    }

    /// A handle to an exported memory, sharing bytes with the store.
    pub fn memory(&self, store: &Store, name: &str) -> Result<MemoryInstance> {
        match self.get_export(store, name)? {
            Extern::Memory(addr) => Ok(store.memory(addr)?.clone()),
            _ => Err(Error::ExportNotFound(format!("memory `{name}`"))),
        }
    }

    /// Export names and items, in no particular order.
    pub fn exports(&self, store: &Store) -> Result<Vec<(String, Extern)>> {
        Ok(store
            .instance(self.addr)?
            .exports()
            .map(|(name, item)| (name.to_string(), item))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Engine, Linker, Module};

    #[test]
    fn global_writes_are_type_checked() {
        let engine = Engine::default();
        let module = Module::new(
            &engine,
            r#"(module
                (global (export "counter") (mut i32) (i32.const 1))
                (global (export "fixed") i64 (i64.const 2)))"#,
        )
        .unwrap();
        let mut store = Store::new(&engine);
        let instance = Linker::new(&engine).instantiate(&mut store, &module).unwrap();

        instance.set_global(&mut store, "counter", Val::I32(5)).unwrap();
        assert_eq!(instance.get_global(&store, "counter").unwrap(), Val::I32(5));

        let err = instance
            .set_global(&mut store, "counter", Val::F32(1.0))
            .unwrap_err();
        assert!(matches!(err, Error::TypeNotMatch { .. }), "{err}");
        assert_eq!(instance.get_global(&store, "counter").unwrap(), Val::I32(5));

        let err = instance
            .set_global(&mut store, "fixed", Val::I64(3))
            .unwrap_err();
        assert!(matches!(err, Error::ImmutableGlobal), "{err}");
    }

    #[test]
    fn unknown_exports_are_reported() {
        let engine = Engine::default();
        let module = Module::new(&engine, r#"(module (memory (export "mem") 1))"#).unwrap();
        let mut store = Store::new(&engine);
        let instance = Linker::new(&engine).instantiate(&mut store, &module).unwrap();
        assert!(matches!(
            instance.call_dynamic(&mut store, "missing", &[]),
            Err(Error::ExportNotFound(_))
        ));
        assert!(matches!(
            instance.get_func(&store, "mem"),
            Err(Error::ExportNotFound(_))
        ));
        assert_eq!(instance.exports(&store).unwrap().len(), 1);
    }
}
