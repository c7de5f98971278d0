use crate::engines;
use anyhow::Result;
use riptide::{Engine, Func, FuncType, Instance, Store, Val, ValType};

#[test]
fn call_wasm_function() -> Result<()> {
    for engine in engines() {
        let module = riptide::Module::new(
            &engine,
            r#"
                (module
                  (func (export "add") (param i32 i32) (result i32)
                    local.get 0
                    local.get 1
                    i32.add))
            "#,
        )?;
        let mut store = Store::new(&engine, ());
        let instance = Instance::new(&mut store, &module, &[])?;
        let add = instance.get_func(&mut store, "add").unwrap();

        let mut results = [Val::I32(0)];
        add.call(&mut store, &[7.into(), 9.into()], &mut results)?;
        assert_eq!(results[0].unwrap_i32(), 16);
    }
    Ok(())
}

#[test]
fn multi_value_results() -> Result<()> {
    for engine in engines() {
        let module = riptide::Module::new(
            &engine,
            r#"
                (module
                  (func (export "swap") (param i32 i64) (result i64 i32)
                    local.get 1
                    local.get 0))
            "#,
        )?;
        let mut store = Store::new(&engine, ());
        let instance = Instance::new(&mut store, &module, &[])?;
        let swap = instance.get_func(&mut store, "swap").unwrap();

        let mut results = [Val::I32(0), Val::I32(0)];
        swap.call(&mut store, &[1.into(), 2i64.into()], &mut results)?;
        assert_eq!(results[0].unwrap_i64(), 2);
        assert_eq!(results[1].unwrap_i32(), 1);
    }
    Ok(())
}

#[test]
fn call_host_function_directly() -> Result<()> {
    let engine = Engine::default();
    let mut store = Store::new(&engine, ());
    let ty = FuncType::new([ValType::I32], [ValType::I32]);
    let double = Func::new(&mut store, ty, |_caller, params, results| {
        results[0] = Val::I32(params[0].unwrap_i32() * 2);
        Ok(())
    });

    let mut results = [Val::I32(0)];
    double.call(&mut store, &[10.into()], &mut results)?;
    assert_eq!(results[0].unwrap_i32(), 20);
    Ok(())
}

#[test]
fn guest_calls_host_function() -> Result<()> {
    for engine in engines() {
        let module = riptide::Module::new(
            &engine,
            r#"
                (module
                  (import "host" "double" (func $double (param i32) (result i32)))
                  (func (export "run") (param i32) (result i32)
                    local.get 0
                    call $double))
            "#,
        )?;
        let mut store = Store::new(&engine, 0u32);
        let ty = FuncType::new([ValType::I32], [ValType::I32]);
        let double = Func::new(&mut store, ty, |mut caller, params, results| {
            *caller.data_mut() += 1;
            results[0] = Val::I32(params[0].unwrap_i32() * 2);
            Ok(())
        });
        let instance = Instance::new(&mut store, &module, &[double.into()])?;
        let run = instance.get_func(&mut store, "run").unwrap();

        let mut results = [Val::I32(0)];
        run.call(&mut store, &[21.into()], &mut results)?;
        assert_eq!(results[0].unwrap_i32(), 42);
        run.call(&mut store, &[3.into()], &mut results)?;
        assert_eq!(results[0].unwrap_i32(), 6);
        assert_eq!(*store.data(), 2, "host closure ran once per call");
    }
    Ok(())
}

#[test]
fn call_type_mismatches() -> Result<()> {
    let engine = Engine::default();
    let module = riptide::Module::new(
        &engine,
        r#"
            (module
              (func (export "add") (param i32 i32) (result i32)
                local.get 0
                local.get 1
                i32.add))
        "#,
    )?;
    let mut store = Store::new(&engine, ());
    let instance = Instance::new(&mut store, &module, &[])?;
    let add = instance.get_func(&mut store, "add").unwrap();

    let mut results = [Val::I32(0)];
    let err = add.call(&mut store, &[1.into()], &mut results).unwrap_err();
    assert!(err.to_string().contains("expected 2 parameters, got 1"), "{err}");

    let err = add
        .call(&mut store, &[1.into(), 2.0f32.into()], &mut results)
        .unwrap_err();
    assert!(err.to_string().contains("parameter type mismatch"), "{err}");

    let err = add
        .call(&mut store, &[1.into(), 2.into()], &mut [])
        .unwrap_err();
    assert!(err.to_string().contains("expected 1 result slots, got 0"), "{err}");
    Ok(())
}

#[test]
fn func_ty_reports_signature() -> Result<()> {
    let engine = Engine::default();
    let mut store = Store::new(&engine, ());
    let ty = FuncType::new([ValType::I64, ValType::F64], [ValType::F64]);
    let f = Func::new(&mut store, ty.clone(), |_caller, _params, _results| Ok(()));
    assert_eq!(f.ty(&store), ty);
    Ok(())
}

#[test]
#[should_panic(expected = "object used with the wrong store")]
fn cross_store_call_panics() {
    let engine = Engine::default();
    let mut store1 = Store::new(&engine, ());
    let mut store2 = Store::new(&engine, ());
    let ty = FuncType::new([], []);
    let f = Func::new(&mut store1, ty, |_caller, _params, _results| Ok(()));
    let _ = f.call(&mut store2, &[], &mut []);
}

#[test]
fn sign_extension_and_saturating_truncation() -> Result<()> {
    // Both proposals are on by default.
    for engine in engines() {
        let module = riptide::Module::new(
            &engine,
            r#"
                (module
                  (func (export "extend") (param i32) (result i32)
                    local.get 0
                    i32.extend8_s)
                  (func (export "sat") (param f32) (result i32)
                    local.get 0
                    i32.trunc_sat_f32_s))
            "#,
        )?;
        let mut store = Store::new(&engine, ());
        let instance = Instance::new(&mut store, &module, &[])?;

        let extend = instance.get_func(&mut store, "extend").unwrap();
        let mut results = [Val::I32(0)];
        extend.call(&mut store, &[0x80.into()], &mut results)?;
        assert_eq!(results[0].unwrap_i32(), -128);

        let sat = instance.get_func(&mut store, "sat").unwrap();
        sat.call(&mut store, &[f32::NAN.into()], &mut results)?;
        assert_eq!(results[0].unwrap_i32(), 0);
        sat.call(&mut store, &[1e10f32.into()], &mut results)?;
        assert_eq!(results[0].unwrap_i32(), i32::MAX);
    }
    Ok(())
}
