use wedge::{
    Config, Engine, Error, Extern, Limits, Linker, MemoryInstance, MemoryType, Module, Ref, Store,
    TableInstance, TableType, Trap, Val, ValType,
};

fn instantiate(engine: &Engine, wat: &str) -> anyhow::Result<(Store, wedge::Instance)> {
    let module = Module::new(engine, wat)?;
    let mut store = Store::new(engine);
    let instance = Linker::new(engine).instantiate(&mut store, &module)?;
    Ok((store, instance))
}

#[test]
fn recursive_fibonacci() -> anyhow::Result<()> {
    let engine = Engine::default();
    let (mut store, instance) = instantiate(
        &engine,
        r#"
        (module
            (func $fib (export "fib") (param i32) (result i32)
                local.get 0
                i32.const 2
                i32.lt_u
                if (result i32)
                    local.get 0
                else
                    local.get 0
                    i32.const 1
                    i32.sub
                    call $fib
                    local.get 0
                    i32.const 2
                    i32.sub
                    call $fib
                    i32.add
                end
            )
        )
    "#,
    )?;
    let result: i32 = instance.call(&mut store, "fib", 10)?;
    assert_eq!(result, 55);

    // -1 compares as u32::MAX, so the recursion never bottoms out.
    let err = instance.call::<i32, i32>(&mut store, "fib", -1).unwrap_err();
    assert!(matches!(err.trap(), Some(Trap::StackExhausted)), "{err}");
    let result: i32 = instance.call(&mut store, "fib", 1)?;
    assert_eq!(result, 1);
    Ok(())
}

#[test]
fn global_type_mismatch_leaves_value_unchanged() -> anyhow::Result<()> {
    let engine = Engine::default();
    let (mut store, instance) = instantiate(
        &engine,
        r#"(module (global (export "g") (mut i64) (i64.const 7)))"#,
    )?;
    let err = instance
        .set_global(&mut store, "g", Val::I32(1))
        .unwrap_err();
    assert!(matches!(err, Error::TypeNotMatch { .. }), "{err}");
    assert_eq!(instance.get_global(&store, "g")?, Val::I64(7));
    Ok(())
}

#[test]
fn memory_accesses_are_bounds_checked() -> anyhow::Result<()> {
    let engine = Engine::default();
    let (mut store, instance) = instantiate(
        &engine,
        r#"
        (module
            (memory (export "mem") 1 2)
            (func (export "load") (param i32) (result i32)
                local.get 0
                i32.load)
            (func (export "store8") (param i32 i32)
                local.get 0
                local.get 1
                i32.store8)
            (func (export "grow") (param i32) (result i32)
                local.get 0
                memory.grow)
            (func (export "size") (result i32)
                memory.size)
        )
    "#,
    )?;

    let last = 65536 - 4;
    instance.call::<(i32, i32), ()>(&mut store, "store8", (last, 0xab))?;
    let v: i32 = instance.call(&mut store, "load", last)?;
    assert_eq!(v, 0xab);

    let err = instance
        .call::<i32, i32>(&mut store, "load", last + 1)
        .unwrap_err();
    assert!(matches!(err.trap(), Some(Trap::MemoryOutOfBounds)), "{err}");
    let err = instance
        .call::<i32, i32>(&mut store, "load", -1)
        .unwrap_err();
    assert!(matches!(err.trap(), Some(Trap::MemoryOutOfBounds)), "{err}");

    let old: i32 = instance.call(&mut store, "grow", 1)?;
    assert_eq!(old, 1);
    let failed: i32 = instance.call(&mut store, "grow", 1)?;
    assert_eq!(failed, -1);
    let size: i32 = instance.call(&mut store, "size", ())?;
    assert_eq!(size, 2);
    let v: i32 = instance.call(&mut store, "load", last + 1)?;
    assert_eq!(v, 0);
    Ok(())
}

#[test]
fn data_segments_before_the_failing_one_stay_written() -> anyhow::Result<()> {
    let engine = Engine::default();
    let module = Module::new(
        &engine,
        r#"
        (module
            (import "env" "mem" (memory 1))
            (data (i32.const 0) "abcd")
            (data (i32.const 65534) "xyz")
        )
    "#,
    )?;
    let mut store = Store::new(&engine);
    let memory = MemoryInstance::new(MemoryType::new(1, None))?;
    let mut linker = Linker::new(&engine);
    linker.memory(&mut store, "env", "mem", memory.clone());

    let err = linker.instantiate(&mut store, &module).unwrap_err();
    assert!(
        matches!(err, Error::InstantiationTrap(Trap::MemoryOutOfBounds)),
        "{err}"
    );
    assert_eq!(memory.read_vec(0, 4)?, b"abcd");
    assert_eq!(memory.read_vec(65534, 2)?, [0, 0]);
    assert_eq!(store.instance_count(), 0);
    Ok(())
}

#[test]
fn indirect_calls_check_signature_and_slot() -> anyhow::Result<()> {
    let engine = Engine::default();
    let (mut store, instance) = instantiate(
        &engine,
        r#"
        (module
            (type $unary (func (param i32) (result i32)))
            (type $nullary (func (result i32)))
            (table 3 funcref)
            (elem (i32.const 0) $double $seven)
            (func $double (type $unary) local.get 0 i32.const 2 i32.mul)
            (func $seven (type $nullary) i32.const 7)
            (func (export "apply") (param i32 i32) (result i32)
                local.get 1
                local.get 0
                call_indirect (type $unary))
        )
    "#,
    )?;
    let v: i32 = instance.call(&mut store, "apply", (0, 21))?;
    assert_eq!(v, 42);

    let err = instance
        .call::<(i32, i32), i32>(&mut store, "apply", (1, 0))
        .unwrap_err();
    assert!(matches!(err.trap(), Some(Trap::IndirectCallTypeMismatch)), "{err}");
    let err = instance
        .call::<(i32, i32), i32>(&mut store, "apply", (2, 0))
        .unwrap_err();
    assert!(matches!(err.trap(), Some(Trap::UndefinedElement)), "{err}");
    let err = instance
        .call::<(i32, i32), i32>(&mut store, "apply", (9, 0))
        .unwrap_err();
    assert!(matches!(err.trap(), Some(Trap::UndefinedElement)), "{err}");
    Ok(())
}

#[test]
fn exceptions_unwind_to_the_nearest_handler() -> anyhow::Result<()> {
    let engine = Engine::default();
    let (mut store, instance) = instantiate(
        &engine,
        r#"
        (module
            (tag $oops (param i32))
            (func $fail (param i32)
                local.get 0
                throw $oops)
            (func (export "catch") (param i32) (result i32)
                try (result i32)
                    local.get 0
                    call $fail
                    i32.const 0
                catch $oops
                    i32.const 1
                    i32.add
                end)
            (func (export "catch_all") (result i32)
                try (result i32)
                    i32.const 3
                    call $fail
                    i32.const 0
                catch_all
                    i32.const -1
                end)
            (func (export "uncaught") (param i32)
                local.get 0
                call $fail)
        )
    "#,
    )?;
    let v: i32 = instance.call(&mut store, "catch", 41)?;
    assert_eq!(v, 42);
    let v: i32 = instance.call(&mut store, "catch_all", ())?;
    assert_eq!(v, -1);

    let err = instance
        .call::<i32, ()>(&mut store, "uncaught", 5)
        .unwrap_err();
    match err.trap() {
        Some(Trap::UncaughtException { tag: 0, payload }) => {
            assert_eq!(payload, &vec![Val::I32(5)]);
        }
        other => panic!("unexpected {other:?}"),
    }
    Ok(())
}

#[test]
fn cost_limit_stops_runaway_loops() -> anyhow::Result<()> {
    let mut config = Config::new();
    config.cost_limit(Some(10_000));
    let engine = Engine::new(&config);
    let (mut store, instance) = instantiate(
        &engine,
        r#"(module (func (export "spin") (loop $l br $l)))"#,
    )?;
    let err = instance.call::<(), ()>(&mut store, "spin", ()).unwrap_err();
    assert!(matches!(err.trap(), Some(Trap::CostLimitExceeded)), "{err}");
    assert!(engine.statistics().instruction_count() >= 10_000);
    Ok(())
}

#[test]
fn removed_instance_keeps_imported_functions_callable() -> anyhow::Result<()> {
    let engine = Engine::default();
    let mut store = Store::new(&engine);
    let mut linker = Linker::new(&engine);
    let lib = Module::new(
        &engine,
        r#"
        (module
            (memory 1)
            (data (i32.const 0) "\07")
            (func (export "seven") (result i32)
                (i32.load8_u (i32.const 0))))
    "#,
    )?;
    let lib = linker.instantiate(&mut store, &lib)?;
    linker.instance(&store, "lib", &lib)?;
    let app = Module::new(
        &engine,
        r#"
        (module
            (import "lib" "seven" (func $seven (result i32)))
            (func (export "run") (result i32) call $seven))
    "#,
    )?;
    let app = linker.instantiate(&mut store, &app)?;

    store.remove_instance(lib.addr())?;
    assert_eq!(store.instance_count(), 1);
    assert!(lib.get_func(&store, "seven").is_err());
    assert!(store.remove_instance(lib.addr()).is_err());
    assert_eq!(app.call::<(), i32>(&mut store, "run", ())?, 7);
    Ok(())
}

#[test]
fn functions_placed_before_a_segment_trap_stay_callable() -> anyhow::Result<()> {
    let engine = Engine::default();
    let module = Module::new(
        &engine,
        r#"
        (module
            (import "env" "table" (table 1 funcref))
            (memory 1)
            (global $base i32 (i32.const 40))
            (func $answer (result i32)
                (i32.add (global.get $base) (i32.const 2)))
            (elem (i32.const 0) $answer)
            (data (i32.const 65535) "xy"))
    "#,
    )?;
    let mut store = Store::new(&engine);
    let ty = TableType {
        elem: ValType::FuncRef,
        limits: Limits { min: 1, max: None },
    };
    let table = store.alloc_table(TableInstance::new(ty, Ref::Func(None))?);
    let mut linker = Linker::new(&engine);
    linker.define(&store, "env", "table", Extern::Table(table));

    let err = linker.instantiate(&mut store, &module).unwrap_err();
    assert!(
        matches!(err, Error::InstantiationTrap(Trap::MemoryOutOfBounds)),
        "{err}"
    );
    assert_eq!(store.instance_count(), 0);
    let Ref::Func(Some(answer)) = store.table(table)?.get(0)? else {
        anyhow::bail!("element segment was not applied");
    };
    assert_eq!(store.invoke(answer, &[])?, vec![Val::I32(42)]);
    Ok(())
}
