use wedge::component::canon;
use wedge::{
    CanonOptions, ComponentFuncType, ComponentInstance, ComponentType, ComponentVal, Engine,
    Error, Extern, Instance, Linker, Module, ResourceType, Store, Val,
};

const DTOR: &str = r#"
(module
    (global $dropped (export "dropped") (mut i32) (i32.const 0))
    (func (export "dtor") (param i32)
        (global.set $dropped (i32.add (global.get $dropped) (local.get 0)))))
"#;

const PROVIDER: &str = r#"
(module
    (import "canon" "resource.new" (func $new (param i32) (result i32)))
    (memory (export "memory") 1)
    (global $heap (mut i32) (i32.const 256))
    (func (export "realloc") (param i32 i32 i32 i32) (result i32)
        (local $ptr i32)
        (local.set $ptr (global.get $heap))
        (global.set $heap (i32.add (global.get $heap) (local.get 3)))
        (local.get $ptr))
    (func (export "make") (param i32) (result i32)
        (call $new (local.get 0)))
    (func (export "value") (param i32) (result i32)
        (i32.mul (local.get 0) (i32.const 10)))
    (func (export "pair") (param i32 i32))
    (func (export "greet") (param i32 i32) (result i32)
        (i32.store (i32.const 64) (local.get 0))
        (i32.store (i32.const 68) (local.get 1))
        (i32.const 64)))
"#;

const KEEPER: &str = r#"
(module
    (import "canon" "resource.drop" (func $drop (param i32)))
    (import "canon" "resource.new" (func $new (param i32) (result i32)))
    (func (export "keep") (param i32))
    (func (export "remake") (param i32) (result i32)
        (call $new (i32.const 11)))
    (func (export "inspect") (param i32) (result i32)
        (call $drop (local.get 0))
        (local.get 0)))
"#;

struct Fixture {
    store: Store,
    provider: ComponentInstance,
    consumer: ComponentInstance,
    keeper: ComponentInstance,
    dtor_module: Instance,
    rt: ResourceType,
}

fn setup() -> anyhow::Result<Fixture> {
    let engine = Engine::default();
    let mut store = Store::new(&engine);
    let provider = ComponentInstance::new(&mut store, "provider");
    let consumer = ComponentInstance::new(&mut store, "consumer");
    let keeper = ComponentInstance::new(&mut store, "keeper");

    let dtor_module = Linker::new(&engine).instantiate(&mut store, &Module::new(&engine, DTOR)?)?;
    provider.add_module(&mut store, dtor_module)?;
    let dtor = dtor_module.get_func(&store, "dtor")?;
    let rt = provider.define_resource(&mut store, "counter", Some(dtor))?;

    let mut linker = Linker::new(&engine);
    linker.func("canon", "resource.new", canon::resource_new(provider, rt));
    let core = linker.instantiate(&mut store, &Module::new(&engine, PROVIDER)?)?;
    provider.add_module(&mut store, core)?;
    let Extern::Memory(memory) = core.get_export(&store, "memory")? else {
        anyhow::bail!("provider memory is not a memory");
    };
    let options = CanonOptions {
        memory: Some(memory),
        realloc: Some(core.get_func(&store, "realloc")?),
        post_return: None,
    };
    let lifts = [
        (
            "make",
            ComponentFuncType::new([ComponentType::U32], Some(ComponentType::Own(rt))),
        ),
        (
            "value",
            ComponentFuncType::new([ComponentType::Borrow(rt)], Some(ComponentType::U32)),
        ),
        (
            "pair",
            ComponentFuncType::new([ComponentType::Own(rt), ComponentType::Borrow(rt)], None),
        ),
        (
            "greet",
            ComponentFuncType::new([ComponentType::String], Some(ComponentType::String)),
        ),
    ];
    for (name, ty) in lifts {
        let func = core.get_func(&store, name)?;
        provider.lift(&mut store, name, func, ty, options)?;
    }

    let mut linker = Linker::new(&engine);
    linker.func("canon", "resource.drop", canon::resource_drop(keeper, rt));
    linker.func("canon", "resource.new", canon::resource_new(keeper, rt));
    let core = linker.instantiate(&mut store, &Module::new(&engine, KEEPER)?)?;
    keeper.add_module(&mut store, core)?;
    let keep = core.get_func(&store, "keep")?;
    let inspect = core.get_func(&store, "inspect")?;
    let remake = core.get_func(&store, "remake")?;
    keeper.lift(
        &mut store,
        "keep",
        keep,
        ComponentFuncType::new([ComponentType::Borrow(rt)], None),
        CanonOptions::default(),
    )?;
    keeper.lift(
        &mut store,
        "inspect",
        inspect,
        ComponentFuncType::new([ComponentType::Borrow(rt)], Some(ComponentType::U32)),
        CanonOptions::default(),
    )?;
    keeper.lift(
        &mut store,
        "remake",
        remake,
        ComponentFuncType::new([ComponentType::Borrow(rt)], Some(ComponentType::Own(rt))),
        CanonOptions::default(),
    )?;

    Ok(Fixture {
        store,
        provider,
        consumer,
        keeper,
        dtor_module,
        rt,
    })
}

fn make(f: &mut Fixture, rep: u32) -> anyhow::Result<u32> {
    match f
        .consumer
        .call(&mut f.store, f.provider, "make", &[ComponentVal::U32(rep)])?
        .as_slice()
    {
        [ComponentVal::Own(handle)] => Ok(*handle),
        other => anyhow::bail!("unexpected results {other:?}"),
    }
}

#[test]
fn own_handles_move_to_the_caller_and_drop_runs_the_destructor() -> anyhow::Result<()> {
    let mut f = setup()?;
    let h = make(&mut f, 5)?;
    assert_eq!(f.consumer.handle_rep(&f.store, h)?, 5);
    assert_eq!(f.provider.handle_count(&f.store)?, 0);
    let entry = f.consumer.handle_get(&f.store, h)?;
    assert!(entry.own);
    assert_eq!(entry.ty, f.rt);

    f.consumer.handle_drop(&mut f.store, h)?;
    assert_eq!(f.dtor_module.get_global(&f.store, "dropped")?, Val::I32(5));
    assert!(matches!(
        f.consumer.handle_drop(&mut f.store, h),
        Err(Error::UnknownHandle(_))
    ));
    Ok(())
}

#[test]
fn borrow_to_the_implementer_passes_the_rep() -> anyhow::Result<()> {
    let mut f = setup()?;
    let h = make(&mut f, 4)?;
    let results = f
        .consumer
        .call(&mut f.store, f.provider, "value", &[ComponentVal::Borrow(h)])?;
    assert_eq!(results, vec![ComponentVal::U32(40)]);
    assert_eq!(f.consumer.handle_get(&f.store, h)?.lend_count, 0);
    assert!(f.store.current_task().is_none());
    Ok(())
}

#[test]
fn dangling_borrow_fails_the_call_and_releases_the_lender() -> anyhow::Result<()> {
    let mut f = setup()?;
    let h = make(&mut f, 9)?;

    let err = f
        .consumer
        .call(&mut f.store, f.keeper, "keep", &[ComponentVal::Borrow(h)])
        .unwrap_err();
    assert!(matches!(err, Error::DanglingBorrow { count: 1, .. }), "{err}");
    assert_eq!(f.keeper.handle_count(&f.store)?, 0);
    assert_eq!(f.consumer.handle_get(&f.store, h)?.lend_count, 0);

    let results = f
        .consumer
        .call(&mut f.store, f.keeper, "inspect", &[ComponentVal::Borrow(h)])?;
    assert!(matches!(results.as_slice(), [ComponentVal::U32(_)]));
    assert_eq!(f.keeper.handle_count(&f.store)?, 0);

    f.consumer.handle_drop(&mut f.store, h)?;
    Ok(())
}

#[test]
fn dangling_borrow_keeps_the_own_result_with_the_callee() -> anyhow::Result<()> {
    let mut f = setup()?;
    let h = make(&mut f, 8)?;
    assert_eq!(f.consumer.handle_count(&f.store)?, 1);

    let err = f
        .consumer
        .call(&mut f.store, f.keeper, "remake", &[ComponentVal::Borrow(h)])
        .unwrap_err();
    assert!(matches!(err, Error::DanglingBorrow { count: 1, .. }), "{err}");
    assert_eq!(f.consumer.handle_count(&f.store)?, 1);
    assert_eq!(f.consumer.handle_get(&f.store, h)?.lend_count, 0);

    // Only the own handle the callee created is left in its table.
    assert_eq!(f.keeper.handle_count(&f.store)?, 1);
    let kept = f.keeper.handle_get(&f.store, 2)?;
    assert!(kept.own);
    assert_eq!(kept.rep, 11);
    Ok(())
}

#[test]
fn a_handle_cannot_be_moved_and_lent_by_the_same_call() -> anyhow::Result<()> {
    let mut f = setup()?;
    let h = make(&mut f, 2)?;
    let err = f
        .consumer
        .call(
            &mut f.store,
            f.provider,
            "pair",
            &[ComponentVal::Own(h), ComponentVal::Borrow(h)],
        )
        .unwrap_err();
    assert!(matches!(err, Error::ResourceConsumed(_)), "{err}");

    let entry = f.consumer.handle_get(&f.store, h)?;
    assert_eq!(entry.lend_count, 0);
    assert_eq!(f.provider.handle_count(&f.store)?, 0);

    let other = make(&mut f, 3)?;
    f.consumer.call(
        &mut f.store,
        f.provider,
        "pair",
        &[ComponentVal::Own(h), ComponentVal::Borrow(other)],
    )?;
    assert!(f.consumer.handle_get(&f.store, h).is_err());
    assert_eq!(f.provider.handle_count(&f.store)?, 1);
    Ok(())
}

#[test]
fn strings_round_trip_through_guest_memory() -> anyhow::Result<()> {
    let mut f = setup()?;
    let results = f.consumer.call(
        &mut f.store,
        f.provider,
        "greet",
        &[ComponentVal::String("hello".into())],
    )?;
    assert_eq!(results, vec![ComponentVal::String("hello".into())]);
    Ok(())
}

#[test]
fn lowered_exports_are_callable_from_core_code() -> anyhow::Result<()> {
    let mut f = setup()?;
    let h = make(&mut f, 6)?;
    let engine = f.store.engine().clone();
    let mut linker = Linker::new(&engine);
    linker.func(
        "provider",
        "value",
        canon::lower(&f.store, f.consumer, f.provider, "value")?,
    );
    let module = Module::new(
        &engine,
        r#"
        (module
            (import "provider" "value" (func $value (param i32) (result i32)))
            (func (export "run") (param i32) (result i32)
                (call $value (local.get 0))))
    "#,
    )?;
    let core = linker.instantiate(&mut f.store, &module)?;
    f.consumer.add_module(&mut f.store, core)?;
    let v: i32 = core.call(&mut f.store, "run", h as i32)?;
    assert_eq!(v, 60);
    assert!(core.call::<i32, i32>(&mut f.store, "run", 99).is_err());
    Ok(())
}
