use crate::{engines, interp_engine};
use anyhow::Result;
use riptide::{Engine, Extern, Func, FuncType, Global, GlobalType, Instance, Store, Trap, Val, ValType};

#[test]
fn import_count_is_checked() -> Result<()> {
    let engine = Engine::default();
    let module = riptide::Module::new(
        &engine,
        r#"
            (module
              (import "a" "f" (func))
              (import "a" "g" (func)))
        "#,
    )?;
    let mut store = Store::new(&engine, ());
    let err = Instance::new(&mut store, &module, &[]).unwrap_err();
    assert!(err.to_string().contains("expected 2 imports, got 0"), "{err}");
    Ok(())
}

#[test]
fn import_types_are_checked() -> Result<()> {
    let engine = Engine::default();
    let module = riptide::Module::new(
        &engine,
        r#"
            (module
              (import "a" "f" (func (param i32))))
        "#,
    )?;
    let mut store = Store::new(&engine, ());

    // Wrong kind of extern.
    let global = Global::new(
        &mut store,
        GlobalType { ty: ValType::I32, mutability: false },
        Val::I32(0),
    )?;
    let err = Instance::new(&mut store, &module, &[global.into()]).unwrap_err();
    assert!(
        format!("{err:?}").contains("incompatible import type for `a::f`"),
        "{err:?}"
    );

    // Right kind, wrong signature.
    let ty = FuncType::new([ValType::I64], []);
    let f = Func::new(&mut store, ty, |_caller, _params, _results| Ok(()));
    let err = Instance::new(&mut store, &module, &[f.into()]).unwrap_err();
    assert!(
        format!("{err:?}").contains("incompatible import type for `a::f`"),
        "{err:?}"
    );
    Ok(())
}

#[test]
fn cross_engine_instantiation_is_rejected() -> Result<()> {
    let engine = Engine::default();
    let other = interp_engine();
    let module = riptide::Module::new(&engine, "(module)")?;
    let mut store = Store::new(&other, ());
    let err = Instance::new(&mut store, &module, &[]).unwrap_err();
    assert!(err.to_string().contains("cross-engine instantiation"), "{err}");
    Ok(())
}

#[test]
fn start_function_runs_at_instantiation() -> Result<()> {
    for engine in engines() {
        let module = riptide::Module::new(
            &engine,
            r#"
                (module
                  (global $g (export "ready") (mut i32) (i32.const 0))
                  (func $init
                    i32.const 1
                    global.set $g)
                  (start $init))
            "#,
        )?;
        let mut store = Store::new(&engine, ());
        let instance = Instance::new(&mut store, &module, &[])?;
        let ready = instance.get_global(&mut store, "ready").unwrap();
        assert_eq!(ready.get(&mut store).unwrap_i32(), 1);
    }
    Ok(())
}

#[test]
fn trapping_start_function_fails_instantiation() -> Result<()> {
    for engine in engines() {
        let module = riptide::Module::new(
            &engine,
            r#"
                (module
                  (func $init
                    unreachable)
                  (start $init))
            "#,
        )?;
        let mut store = Store::new(&engine, ());
        let err = Instance::new(&mut store, &module, &[]).unwrap_err();
        assert_eq!(
            err.downcast_ref::<Trap>(),
            Some(&Trap::UnreachableCodeReached)
        );
    }
    Ok(())
}

#[test]
fn exports_are_typed() -> Result<()> {
    let engine = Engine::default();
    let module = riptide::Module::new(
        &engine,
        r#"
            (module
              (memory (export "mem") 1)
              (global (export "g") i32 (i32.const 0))
              (func (export "f")))
        "#,
    )?;
    let mut store = Store::new(&engine, ());
    let instance = Instance::new(&mut store, &module, &[])?;

    assert!(module.get_export("mem").is_some());
    assert!(module.get_export("nope").is_none());
    assert_eq!(module.exports().count(), 3);

    assert!(matches!(instance.get_export(&mut store, "f"), Some(Extern::Func(_))));
    assert!(matches!(instance.get_export(&mut store, "mem"), Some(Extern::Memory(_))));
    assert!(matches!(instance.get_export(&mut store, "g"), Some(Extern::Global(_))));
    assert!(instance.get_export(&mut store, "nope").is_none());
    assert!(instance.get_func(&mut store, "mem").is_none());
    Ok(())
}

#[test]
fn instances_are_isolated_across_stores_and_threads() -> Result<()> {
    let engine = Engine::default();
    let module = riptide::Module::new(
        &engine,
        r#"
            (module
              (memory 1)
              (global $g (mut i32) (i32.const 0))
              (func (export "bump") (result i32)
                global.get $g
                i32.const 1
                i32.add
                global.set $g
                global.get $g))
        "#,
    )?;

    let mut handles = Vec::new();
    for _ in 0..4 {
        let engine = engine.clone();
        let module = module.clone();
        handles.push(std::thread::spawn(move || -> Result<i32> {
            let mut store = Store::new(&engine, ());
            let instance = Instance::new(&mut store, &module, &[])?;
            let bump = instance.get_func(&mut store, "bump").unwrap();
            let mut results = [Val::I32(0)];
            for _ in 0..100 {
                bump.call(&mut store, &[], &mut results)?;
            }
            Ok(results[0].unwrap_i32())
        }));
    }
    for handle in handles {
        assert_eq!(handle.join().unwrap()?, 100);
    }
    Ok(())
}

#[test]
fn instance_reports_its_module() -> Result<()> {
    let engine = Engine::default();
    let module = riptide::Module::new(&engine, "(module $named)")?;
    assert_eq!(module.name(), Some("named"));
    let mut store = Store::new(&engine, ());
    let instance = Instance::new(&mut store, &module, &[])?;
    assert_eq!(instance.module(&store).name(), Some("named"));
    Ok(())
}
