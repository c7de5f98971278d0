use anyhow::Result;
use riptide::{Config, Engine, Instance, Store, Val};

fn simd_engine() -> Result<Engine> {
    let mut config = Config::new();
    config.wasm_simd(true);
    Engine::new(&config)
}

#[test]
fn lanewise_integer_arithmetic() -> Result<()> {
    let engine = simd_engine()?;
    let module = riptide::Module::new(
        &engine,
        r#"
            (module
              (func (export "sum_lane") (param i32 i32) (result i32)
                local.get 0
                i32x4.splat
                local.get 1
                i32x4.splat
                i32x4.add
                i32x4.extract_lane 2))
        "#,
    )?;
    let mut store = Store::new(&engine, ());
    let instance = Instance::new(&mut store, &module, &[])?;
    let sum = instance.get_func(&mut store, "sum_lane").unwrap();

    let mut results = [Val::I32(0)];
    sum.call(&mut store, &[40.into(), 2.into()], &mut results)?;
    assert_eq!(results[0].unwrap_i32(), 42);
    Ok(())
}

#[test]
fn vector_constants_and_comparisons() -> Result<()> {
    let engine = simd_engine()?;
    let module = riptide::Module::new(
        &engine,
        r#"
            (module
              (func (export "all_positive") (param i32) (result i32)
                v128.const i32x4 1 2 3 4
                local.get 0
                i32x4.splat
                i32x4.gt_s
                i32x4.all_true))
        "#,
    )?;
    let mut store = Store::new(&engine, ());
    let instance = Instance::new(&mut store, &module, &[])?;
    let all_positive = instance.get_func(&mut store, "all_positive").unwrap();

    let mut results = [Val::I32(0)];
    all_positive.call(&mut store, &[0.into()], &mut results)?;
    assert_eq!(results[0].unwrap_i32(), 1);
    all_positive.call(&mut store, &[3.into()], &mut results)?;
    assert_eq!(results[0].unwrap_i32(), 0);
    Ok(())
}

#[test]
fn vectors_round_trip_through_memory() -> Result<()> {
    let engine = simd_engine()?;
    let module = riptide::Module::new(
        &engine,
        r#"
            (module
              (memory (export "mem") 1)
              (func (export "broadcast") (param i32 i32)
                local.get 0
                local.get 1
                i8x16.splat
                v128.store))
        "#,
    )?;
    let mut store = Store::new(&engine, ());
    let instance = Instance::new(&mut store, &module, &[])?;
    let memory = instance.get_memory(&mut store, "mem").unwrap();
    let broadcast = instance.get_func(&mut store, "broadcast").unwrap();

    broadcast.call(&mut store, &[32.into(), 0x5a.into()], &mut [])?;
    assert_eq!(&memory.data(&store)[32..48], &[0x5a; 16]);
    Ok(())
}
