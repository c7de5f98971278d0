use anyhow::Result;
use riptide::{Engine, FuncType, Global, GlobalType, Instance, Linker, Store, Val, ValType};

#[test]
fn linker_resolves_imports_by_name() -> Result<()> {
    let engine = Engine::default();
    let module = riptide::Module::new(
        &engine,
        r#"
            (module
              (import "math" "add" (func $add (param i32 i32) (result i32)))
              (import "env" "bias" (global $bias i32))
              (func (export "run") (param i32) (result i32)
                local.get 0
                global.get $bias
                call $add))
        "#,
    )?;
    let mut store = Store::new(&engine, ());
    let mut linker = Linker::new();
    linker.func_new(
        &mut store,
        "math",
        "add",
        FuncType::new([ValType::I32, ValType::I32], [ValType::I32]),
        |_caller, params, results| {
            results[0] = Val::I32(params[0].unwrap_i32() + params[1].unwrap_i32());
            Ok(())
        },
    )?;
    let bias = Global::new(
        &mut store,
        GlobalType { ty: ValType::I32, mutability: false },
        Val::I32(100),
    )?;
    linker.define("env", "bias", bias)?;

    let instance = linker.instantiate(&mut store, &module)?;
    let run = instance.get_func(&mut store, "run").unwrap();
    let mut results = [Val::I32(0)];
    run.call(&mut store, &[23.into()], &mut results)?;
    assert_eq!(results[0].unwrap_i32(), 123);

    assert!(linker.get("math", "add").is_some());
    assert!(linker.get("math", "sub").is_none());
    Ok(())
}

#[test]
fn unknown_import_is_an_error() -> Result<()> {
    let engine = Engine::default();
    let module = riptide::Module::new(
        &engine,
        r#"
            (module (import "m" "missing" (func)))
        "#,
    )?;
    let mut store = Store::new(&engine, ());
    let linker: Linker<()> = Linker::new();
    let err = linker.instantiate(&mut store, &module).unwrap_err();
    assert!(
        err.to_string().contains("unknown import: `m::missing`"),
        "{err}"
    );
    Ok(())
}

#[test]
fn duplicate_definition_is_an_error() -> Result<()> {
    let engine = Engine::default();
    let mut store = Store::new(&engine, ());
    let mut linker: Linker<()> = Linker::new();
    let ty = FuncType::new([], []);
    linker.func_new(&mut store, "m", "f", ty.clone(), |_caller, _params, _results| Ok(()))?;
    let err = linker
        .func_new(&mut store, "m", "f", ty, |_caller, _params, _results| Ok(()))
        .unwrap_err();
    assert!(err.to_string().contains("defined twice"), "{err}");
    Ok(())
}

#[test]
fn instance_exports_can_be_linked() -> Result<()> {
    let engine = Engine::default();
    let provider = riptide::Module::new(
        &engine,
        r#"
            (module
              (func (export "seven") (result i32)
                i32.const 7))
        "#,
    )?;
    let consumer = riptide::Module::new(
        &engine,
        r#"
            (module
              (import "provider" "seven" (func $seven (result i32)))
              (func (export "fourteen") (result i32)
                call $seven
                call $seven
                i32.add))
        "#,
    )?;

    let mut store = Store::new(&engine, ());
    let mut linker = Linker::new();
    let instance = Instance::new(&mut store, &provider, &[])?;
    linker.instance(&mut store, "provider", instance)?;

    let instance = linker.instantiate(&mut store, &consumer)?;
    let fourteen = instance.get_func(&mut store, "fourteen").unwrap();
    let mut results = [Val::I32(0)];
    fourteen.call(&mut store, &[], &mut results)?;
    assert_eq!(results[0].unwrap_i32(), 14);
    Ok(())
}
