use anyhow::Result;
use riptide::{Config, Engine, Instance, Store, Trap, Val};

fn threads_engine() -> Result<Engine> {
    let mut config = Config::new();
    config.wasm_threads(true);
    Engine::new(&config)
}

const SHARED: &str = r#"
    (module
      (memory 1 1 shared)
      (func (export "add") (param i32 i32) (result i32)
        local.get 0
        local.get 1
        i32.atomic.rmw.add)
      (func (export "load") (param i32) (result i32)
        local.get 0
        i32.atomic.load)
      (func (export "cmpxchg") (param i32 i32 i32) (result i32)
        local.get 0
        local.get 1
        local.get 2
        i32.atomic.rmw.cmpxchg)
      (func (export "wait") (param i32 i32 i64) (result i32)
        local.get 0
        local.get 1
        local.get 2
        memory.atomic.wait32)
      (func (export "notify") (param i32 i32) (result i32)
        local.get 0
        local.get 1
        memory.atomic.notify))
"#;

#[test]
fn read_modify_write_returns_the_old_value() -> Result<()> {
    let engine = threads_engine()?;
    let module = riptide::Module::new(&engine, SHARED)?;
    let mut store = Store::new(&engine, ());
    let instance = Instance::new(&mut store, &module, &[])?;
    let add = instance.get_func(&mut store, "add").unwrap();
    let load = instance.get_func(&mut store, "load").unwrap();

    let mut results = [Val::I32(0)];
    add.call(&mut store, &[8.into(), 5.into()], &mut results)?;
    assert_eq!(results[0].unwrap_i32(), 0);
    add.call(&mut store, &[8.into(), 10.into()], &mut results)?;
    assert_eq!(results[0].unwrap_i32(), 5);
    load.call(&mut store, &[8.into()], &mut results)?;
    assert_eq!(results[0].unwrap_i32(), 15);
    Ok(())
}

#[test]
fn compare_exchange_only_stores_on_match() -> Result<()> {
    let engine = threads_engine()?;
    let module = riptide::Module::new(&engine, SHARED)?;
    let mut store = Store::new(&engine, ());
    let instance = Instance::new(&mut store, &module, &[])?;
    let cmpxchg = instance.get_func(&mut store, "cmpxchg").unwrap();
    let load = instance.get_func(&mut store, "load").unwrap();

    let mut results = [Val::I32(0)];
    // Expected 1, actual 0: no store, old value returned.
    cmpxchg.call(&mut store, &[0.into(), 1.into(), 42.into()], &mut results)?;
    assert_eq!(results[0].unwrap_i32(), 0);
    load.call(&mut store, &[0.into()], &mut results)?;
    assert_eq!(results[0].unwrap_i32(), 0);

    cmpxchg.call(&mut store, &[0.into(), 0.into(), 42.into()], &mut results)?;
    assert_eq!(results[0].unwrap_i32(), 0);
    load.call(&mut store, &[0.into()], &mut results)?;
    assert_eq!(results[0].unwrap_i32(), 42);
    Ok(())
}

#[test]
fn wait_and_notify_without_contention() -> Result<()> {
    let engine = threads_engine()?;
    let module = riptide::Module::new(&engine, SHARED)?;
    let mut store = Store::new(&engine, ());
    let instance = Instance::new(&mut store, &module, &[])?;
    let wait = instance.get_func(&mut store, "wait").unwrap();
    let notify = instance.get_func(&mut store, "notify").unwrap();

    let mut results = [Val::I32(0)];
    // The word at address 0 is zero; expecting 7 reports "not-equal".
    wait.call(&mut store, &[0.into(), 7.into(), 1_000_000i64.into()], &mut results)?;
    assert_eq!(results[0].unwrap_i32(), 1);

    // Matching value with a 1ms timeout reports "timed-out".
    wait.call(&mut store, &[0.into(), 0.into(), 1_000_000i64.into()], &mut results)?;
    assert_eq!(results[0].unwrap_i32(), 2);

    // Nobody is parked, so notify wakes zero waiters.
    notify.call(&mut store, &[0.into(), 1.into()], &mut results)?;
    assert_eq!(results[0].unwrap_i32(), 0);
    Ok(())
}

#[test]
fn unaligned_atomic_access_traps() -> Result<()> {
    let engine = threads_engine()?;
    let module = riptide::Module::new(&engine, SHARED)?;
    let mut store = Store::new(&engine, ());
    let instance = Instance::new(&mut store, &module, &[])?;
    let load = instance.get_func(&mut store, "load").unwrap();

    let mut results = [Val::I32(0)];
    let err = load
        .call(&mut store, &[3.into()], &mut results)
        .unwrap_err();
    assert_eq!(err.downcast_ref::<Trap>(), Some(&Trap::HeapMisaligned));
    assert!(format!("{err:?}").contains("unaligned atomic"), "{err:?}");
    Ok(())
}

#[test]
fn waiting_on_non_shared_memory_traps() -> Result<()> {
    let engine = threads_engine()?;
    let module = riptide::Module::new(
        &engine,
        r#"
            (module
              (memory 1)
              (func (export "wait") (param i32 i32 i64) (result i32)
                local.get 0
                local.get 1
                local.get 2
                memory.atomic.wait32))
        "#,
    )?;
    let mut store = Store::new(&engine, ());
    let instance = Instance::new(&mut store, &module, &[])?;
    let wait = instance.get_func(&mut store, "wait").unwrap();

    let mut results = [Val::I32(0)];
    let err = wait
        .call(&mut store, &[0.into(), 0.into(), 0i64.into()], &mut results)
        .unwrap_err();
    assert_eq!(
        err.downcast_ref::<Trap>(),
        Some(&Trap::AtomicWaitNonSharedMemory)
    );
    Ok(())
}
