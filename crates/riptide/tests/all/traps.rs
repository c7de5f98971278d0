use crate::{engines, interp_engine};
use anyhow::{bail, Result};
use riptide::{Engine, Func, FuncType, Instance, Store, Trap, Val, WasmBacktrace};

#[test]
fn unreachable_instruction() -> Result<()> {
    for engine in engines() {
        let module = riptide::Module::new(
            &engine,
            r#"
                (module
                  (func (export "run")
                    unreachable))
            "#,
        )?;
        let mut store = Store::new(&engine, ());
        let instance = Instance::new(&mut store, &module, &[])?;
        let run = instance.get_func(&mut store, "run").unwrap();

        let err = run.call(&mut store, &[], &mut []).unwrap_err();
        assert_eq!(
            err.downcast_ref::<Trap>(),
            Some(&Trap::UnreachableCodeReached)
        );
        assert!(
            format!("{err:?}").contains("wasm `unreachable` instruction executed"),
            "{err:?}"
        );

        // The store stays usable after a trap.
        let err = run.call(&mut store, &[], &mut []).unwrap_err();
        assert_eq!(
            err.downcast_ref::<Trap>(),
            Some(&Trap::UnreachableCodeReached)
        );
    }
    Ok(())
}

#[test]
fn integer_arithmetic_traps() -> Result<()> {
    for engine in engines() {
        let module = riptide::Module::new(
            &engine,
            r#"
                (module
                  (func (export "div") (param i32 i32) (result i32)
                    local.get 0
                    local.get 1
                    i32.div_s)
                  (func (export "trunc") (param f64) (result i32)
                    local.get 0
                    i32.trunc_f64_s))
            "#,
        )?;
        let mut store = Store::new(&engine, ());
        let instance = Instance::new(&mut store, &module, &[])?;
        let div = instance.get_func(&mut store, "div").unwrap();
        let trunc = instance.get_func(&mut store, "trunc").unwrap();

        let mut results = [Val::I32(0)];
        let err = div
            .call(&mut store, &[1.into(), 0.into()], &mut results)
            .unwrap_err();
        assert_eq!(err.downcast_ref::<Trap>(), Some(&Trap::IntegerDivisionByZero));

        let err = div
            .call(&mut store, &[i32::MIN.into(), (-1).into()], &mut results)
            .unwrap_err();
        assert_eq!(err.downcast_ref::<Trap>(), Some(&Trap::IntegerOverflow));

        div.call(&mut store, &[(-7).into(), 2.into()], &mut results)?;
        assert_eq!(results[0].unwrap_i32(), -3);

        let err = trunc
            .call(&mut store, &[f64::NAN.into()], &mut results)
            .unwrap_err();
        assert_eq!(err.downcast_ref::<Trap>(), Some(&Trap::BadConversionToInteger));

        let err = trunc
            .call(&mut store, &[1e18f64.into()], &mut results)
            .unwrap_err();
        assert_eq!(err.downcast_ref::<Trap>(), Some(&Trap::IntegerOverflow));

        trunc.call(&mut store, &[(-2147483648.0f64).into()], &mut results)?;
        assert_eq!(results[0].unwrap_i32(), i32::MIN);
    }
    Ok(())
}

#[test]
fn out_of_bounds_memory_access() -> Result<()> {
    for engine in engines() {
        let module = riptide::Module::new(
            &engine,
            r#"
                (module
                  (memory 1)
                  (func (export "load") (param i32) (result i32)
                    local.get 0
                    i32.load))
            "#,
        )?;
        let mut store = Store::new(&engine, ());
        let instance = Instance::new(&mut store, &module, &[])?;
        let load = instance.get_func(&mut store, "load").unwrap();

        let mut results = [Val::I32(0)];
        load.call(&mut store, &[0xfffc.into()], &mut results)?;

        // One byte past the end of the page.
        let err = load
            .call(&mut store, &[0xfffd.into()], &mut results)
            .unwrap_err();
        assert_eq!(err.downcast_ref::<Trap>(), Some(&Trap::MemoryOutOfBounds));

        // Large offsets must not wrap around.
        let err = load
            .call(&mut store, &[(-4).into()], &mut results)
            .unwrap_err();
        assert_eq!(err.downcast_ref::<Trap>(), Some(&Trap::MemoryOutOfBounds));
    }
    Ok(())
}

#[test]
fn runaway_recursion_exhausts_the_stack() -> Result<()> {
    let engine = interp_engine();
    let module = riptide::Module::new(
        &engine,
        r#"
            (module
              (func $loop (export "run")
                call $loop))
        "#,
    )?;
    let mut store = Store::new(&engine, ());
    let instance = Instance::new(&mut store, &module, &[])?;
    let run = instance.get_func(&mut store, "run").unwrap();

    let err = run.call(&mut store, &[], &mut []).unwrap_err();
    assert_eq!(err.downcast_ref::<Trap>(), Some(&Trap::StackOverflow));
    assert!(format!("{err:?}").contains("call stack exhausted"), "{err:?}");
    Ok(())
}

#[test]
fn host_error_propagates_with_backtrace() -> Result<()> {
    for engine in engines() {
        let module = riptide::Module::new(
            &engine,
            r#"
                (module
                  (import "host" "fail" (func $fail))
                  (func $inner
                    call $fail)
                  (func $outer (export "run")
                    call $inner))
            "#,
        )?;
        let mut store = Store::new(&engine, ());
        let ty = FuncType::new([], []);
        let fail = Func::new(&mut store, ty, |_caller, _params, _results| {
            bail!("boom at depth")
        });
        let instance = Instance::new(&mut store, &module, &[fail.into()])?;
        let run = instance.get_func(&mut store, "run").unwrap();

        let err = run.call(&mut store, &[], &mut []).unwrap_err();
        assert!(format!("{err:?}").contains("boom at depth"), "{err:?}");
        assert!(err.downcast_ref::<Trap>().is_none());

        let backtrace = WasmBacktrace::capture(&err).unwrap();
        let names = backtrace
            .frames()
            .iter()
            .map(|frame| frame.func_name())
            .collect::<Vec<_>>();
        assert_eq!(names, [Some("inner"), Some("outer")], "innermost first");
    }
    Ok(())
}

#[test]
fn trap_backtrace_records_the_faulting_frame() -> Result<()> {
    for engine in engines() {
        let module = riptide::Module::new(
            &engine,
            r#"
                (module
                  (func $crash
                    unreachable)
                  (func (export "run")
                    call $crash))
            "#,
        )?;
        let mut store = Store::new(&engine, ());
        let instance = Instance::new(&mut store, &module, &[])?;
        let run = instance.get_func(&mut store, "run").unwrap();

        let err = run.call(&mut store, &[], &mut []).unwrap_err();
        let backtrace = WasmBacktrace::capture(&err).unwrap();
        assert_eq!(backtrace.frames().len(), 2);
        assert_eq!(backtrace.frames()[0].func_index(), 0);
        assert_eq!(backtrace.frames()[1].func_index(), 1);
        assert!(err.to_string().contains("wasm backtrace"), "{err}");
    }
    Ok(())
}

#[test]
fn closed_engine_rejects_calls() -> Result<()> {
    let engine = Engine::default();
    let module = riptide::Module::new(
        &engine,
        r#"
            (module (func (export "run")))
        "#,
    )?;
    let mut store = Store::new(&engine, ());
    let instance = Instance::new(&mut store, &module, &[])?;
    let run = instance.get_func(&mut store, "run").unwrap();
    run.call(&mut store, &[], &mut [])?;

    engine.close();
    let err = run.call(&mut store, &[], &mut []).unwrap_err();
    assert!(err.to_string().contains("engine has been closed"), "{err}");
    Ok(())
}
