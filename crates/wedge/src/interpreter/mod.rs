//! Stack-machine interpreter.
//!
//! Each top-level call runs on a fresh [`exec::Machine`] holding the
//! operand stack, the label stack and the suspended frames. Host callbacks
//! that call back into wasm start a nested machine on the same store; the
//! store's call depth carries the frames of every suspended machine into the
//! nested one's depth limit.

mod exec;
mod numeric;
mod stack;

use crate::error::Result;
use crate::host::Caller;
use crate::store::{FuncAddr, FuncInstance, Store};
use crate::value::{check_types, Val};

/// Invoke the function at `addr`. Arguments must match its parameter types.
pub(crate) fn invoke(store: &mut Store, addr: FuncAddr, args: &[Val]) -> Result<Vec<Val>> {
    let func = store.func(addr)?;
    check_types(args, func.ty().params())?;
    tracing::trace!(func = %addr, args = args.len(), "invoke");

    let host = match func {
        FuncInstance::Host(host) => Some(host.clone()),
        FuncInstance::Wasm { .. } => None,
    };
    match host {
        Some(host) => {
            let mut caller = Caller::new(store, None);
            host.call(&mut caller, args)
        }
        None => exec::Machine::new(store).run(addr, args.to_vec()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{Error, Trap};
    use crate::{Config, Engine, Instance, Linker, Module};

    fn instantiate(engine: &Engine, wat: &str) -> (Store, Instance) {
        let module = Module::new(engine, wat).unwrap();
        let mut store = Store::new(engine);
        let linker = Linker::new(engine);
        let instance = linker.instantiate(&mut store, &module).unwrap();
        (store, instance)
    }

    #[test]
    fn blocks_and_branches() {
        let engine = Engine::default();
        let (mut store, instance) = instantiate(
            &engine,
            r#"(module
                (func (export "classify") (param i32) (result i32)
                    block (result i32)
                        block
                            block
                                local.get 0
                                br_table 0 1
                            end
                            i32.const 100
                            br 1
                        end
                        i32.const 200
                    end)
                (func (export "sum") (param i32) (result i32) (local i32)
                    block
                        loop
                            local.get 0
                            i32.eqz
                            br_if 1
                            local.get 1
                            local.get 0
                            i32.add
                            local.set 1
                            local.get 0
                            i32.const 1
                            i32.sub
                            local.set 0
                            br 0
                        end
                    end
                    local.get 1))"#,
        );
        let classify = |store: &mut Store, v: i32| {
            instance
                .call::<i32, i32>(store, "classify", v)
                .unwrap()
        };
        assert_eq!(classify(&mut store, 0), 100);
        assert_eq!(classify(&mut store, 1), 200);
        let sum = instance.call::<i32, i32>(&mut store, "sum", 10).unwrap();
        assert_eq!(sum, 55);
    }

    #[test]
    fn if_without_else_and_multi_value_blocks() {
        let engine = Engine::default();
        let (mut store, instance) = instantiate(
            &engine,
            r#"(module
                (func (export "abs") (param i32) (result i32)
                    local.get 0
                    i32.const 0
                    i32.lt_s
                    if
                        i32.const 0
                        local.get 0
                        i32.sub
                        local.set 0
                    end
                    local.get 0)
                (func (export "swap") (param i32 i32) (result i32 i32)
                    local.get 0
                    local.get 1
                    block (param i32 i32) (result i32 i32)
                        local.set 0
                        local.set 1
                        local.get 0
                        local.get 1
                    end))"#,
        );
        assert_eq!(instance.call::<i32, i32>(&mut store, "abs", -7).unwrap(), 7);
        assert_eq!(
            instance
                .call::<(i32, i32), (i32, i32)>(&mut store, "swap", (1, 2))
                .unwrap(),
            (2, 1)
        );
    }

    #[test]
    fn unbounded_recursion_exhausts_stack() {
        let mut config = Config::new();
        config.max_call_depth(64);
        let engine = Engine::new(&config);
        let (mut store, instance) = instantiate(
            &engine,
            r#"(module (func $f (export "f") call $f))"#,
        );
        let err = instance.call::<(), ()>(&mut store, "f", ()).unwrap_err();
        assert!(matches!(err, Error::Trap(Trap::StackExhausted)), "{err}");
    }

    #[test]
    fn traps_stop_execution_but_keep_writes() {
        let engine = Engine::default();
        let (mut store, instance) = instantiate(
            &engine,
            r#"(module
                (memory (export "mem") 1)
                (func (export "run")
                    i32.const 0
                    i32.const 42
                    i32.store
                    unreachable))"#,
        );
        let err = instance.call::<(), ()>(&mut store, "run", ()).unwrap_err();
        assert!(matches!(err, Error::Trap(Trap::Unreachable)));
        let mem = instance.memory(&store, "mem").unwrap();
        assert_eq!(mem.read_u32(0).unwrap(), 42);
    }

    #[test]
    fn host_function_is_invoked_directly() {
        let engine = Engine::default();
        let mut store = Store::new(&engine);
        let ty = crate::module::types::FuncType::new(
            [crate::module::types::ValType::I32],
            [crate::module::types::ValType::I32],
        );
        let addr = store.alloc_func(FuncInstance::Host(crate::HostFunc::new(ty, |_, args| {
            Ok(crate::HostControl::Return(vec![Val::I32(args[0].as_i32()? * 2)]))
        })));
        assert_eq!(invoke(&mut store, addr, &[Val::I32(21)]).unwrap(), vec![Val::I32(42)]);
        assert!(matches!(
            invoke(&mut store, addr, &[Val::I64(21)]),
            Err(Error::TypeNotMatch { .. })
        ));
    }
}
