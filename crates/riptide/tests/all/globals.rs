use crate::engines;
use anyhow::Result;
use riptide::{Engine, Global, GlobalType, Instance, Store, Val, ValType};

#[test]
fn host_created_global() -> Result<()> {
    let engine = Engine::default();
    let mut store = Store::new(&engine, ());

    let counter = Global::new(
        &mut store,
        GlobalType { ty: ValType::I64, mutability: true },
        Val::I64(3),
    )?;
    assert_eq!(counter.get(&mut store).unwrap_i64(), 3);
    counter.set(&mut store, Val::I64(-1))?;
    assert_eq!(counter.get(&mut store).unwrap_i64(), -1);

    let err = counter.set(&mut store, Val::F64(0)).unwrap_err();
    assert!(err.to_string().contains("global value type mismatch"), "{err}");

    let pinned = Global::new(
        &mut store,
        GlobalType { ty: ValType::I32, mutability: false },
        Val::I32(8),
    )?;
    let err = pinned.set(&mut store, Val::I32(9)).unwrap_err();
    assert!(err.to_string().contains("immutable global"), "{err}");

    let err = Global::new(
        &mut store,
        GlobalType { ty: ValType::F32, mutability: false },
        Val::I32(0),
    )
    .unwrap_err();
    assert!(err.to_string().contains("global initializer type mismatch"), "{err}");
    Ok(())
}

#[test]
fn exported_global_shared_with_guest() -> Result<()> {
    for engine in engines() {
        let module = riptide::Module::new(
            &engine,
            r#"
                (module
                  (global $g (export "counter") (mut i32) (i32.const 5))
                  (func (export "bump") (result i32)
                    global.get $g
                    i32.const 1
                    i32.add
                    global.set $g
                    global.get $g))
            "#,
        )?;
        let mut store = Store::new(&engine, ());
        let instance = Instance::new(&mut store, &module, &[])?;
        let counter = instance.get_global(&mut store, "counter").unwrap();
        let bump = instance.get_func(&mut store, "bump").unwrap();

        let mut results = [Val::I32(0)];
        bump.call(&mut store, &[], &mut results)?;
        assert_eq!(results[0].unwrap_i32(), 6);
        assert_eq!(counter.get(&mut store).unwrap_i32(), 6);

        counter.set(&mut store, Val::I32(41))?;
        bump.call(&mut store, &[], &mut results)?;
        assert_eq!(results[0].unwrap_i32(), 42);
    }
    Ok(())
}

#[test]
fn imported_global_initializes_defined_global() -> Result<()> {
    for engine in engines() {
        let module = riptide::Module::new(
            &engine,
            r#"
                (module
                  (import "env" "base" (global $base i32))
                  (global $derived i32 (global.get $base))
                  (func (export "base") (result i32)
                    global.get $base)
                  (func (export "derived") (result i32)
                    global.get $derived))
            "#,
        )?;
        let mut store = Store::new(&engine, ());
        let base = Global::new(
            &mut store,
            GlobalType { ty: ValType::I32, mutability: false },
            Val::I32(7),
        )?;
        let instance = Instance::new(&mut store, &module, &[base.into()])?;

        let mut results = [Val::I32(0)];
        let get_base = instance.get_func(&mut store, "base").unwrap();
        get_base.call(&mut store, &[], &mut results)?;
        assert_eq!(results[0].unwrap_i32(), 7);
        let get_derived = instance.get_func(&mut store, "derived").unwrap();
        get_derived.call(&mut store, &[], &mut results)?;
        assert_eq!(results[0].unwrap_i32(), 7);
    }
    Ok(())
}
