use crate::engines;
use anyhow::Result;
use riptide::{Config, Engine, Instance, Memory, MemoryType, Store, Val};

#[test]
fn host_created_memory() -> Result<()> {
    let engine = Engine::default();
    let mut store = Store::new(&engine, ());
    let memory = Memory::new(
        &mut store,
        MemoryType { minimum: 1, maximum: Some(2), shared: false },
    )?;

    assert_eq!(memory.size(&store), 1);
    assert_eq!(memory.data_size(&store), 0x10000);

    memory.write(&mut store, 100, b"hello")?;
    let mut buffer = [0u8; 5];
    memory.read(&store, 100, &mut buffer)?;
    assert_eq!(&buffer, b"hello");
    assert_eq!(&memory.data(&store)[100..105], b"hello");

    let err = memory.read(&store, 0x10000 - 2, &mut buffer).unwrap_err();
    assert!(err.to_string().contains("out of bounds memory access"), "{err}");

    assert_eq!(memory.grow(&mut store, 1)?, 1);
    assert_eq!(memory.size(&store), 2);
    memory.write(&mut store, 0x10000, b"second page")?;

    let err = memory.grow(&mut store, 1).unwrap_err();
    assert!(err.to_string().contains("failed to grow memory"), "{err}");
    Ok(())
}

#[test]
fn guest_memory_operations() -> Result<()> {
    for engine in engines() {
        let module = riptide::Module::new(
            &engine,
            r#"
                (module
                  (memory (export "mem") 1 3)
                  (func (export "poke") (param i32 i32)
                    local.get 0
                    local.get 1
                    i32.store)
                  (func (export "peek") (param i32) (result i32)
                    local.get 0
                    i32.load)
                  (func (export "size") (result i32)
                    memory.size)
                  (func (export "grow") (param i32) (result i32)
                    local.get 0
                    memory.grow))
            "#,
        )?;
        let mut store = Store::new(&engine, ());
        let instance = Instance::new(&mut store, &module, &[])?;
        let memory = instance.get_memory(&mut store, "mem").unwrap();
        let poke = instance.get_func(&mut store, "poke").unwrap();
        let peek = instance.get_func(&mut store, "peek").unwrap();
        let size = instance.get_func(&mut store, "size").unwrap();
        let grow = instance.get_func(&mut store, "grow").unwrap();

        poke.call(&mut store, &[16.into(), 0x11223344.into()], &mut [])?;
        let mut results = [Val::I32(0)];
        peek.call(&mut store, &[16.into()], &mut results)?;
        assert_eq!(results[0].unwrap_i32(), 0x11223344);

        // Little-endian byte order is observable through the handle.
        let mut bytes = [0u8; 4];
        memory.read(&store, 16, &mut bytes)?;
        assert_eq!(bytes, [0x44, 0x33, 0x22, 0x11]);

        size.call(&mut store, &[], &mut results)?;
        assert_eq!(results[0].unwrap_i32(), 1);
        grow.call(&mut store, &[1.into()], &mut results)?;
        assert_eq!(results[0].unwrap_i32(), 1);
        assert_eq!(memory.size(&store), 2);

        // Growing past the declared maximum reports -1 to the guest.
        grow.call(&mut store, &[5.into()], &mut results)?;
        assert_eq!(results[0].unwrap_i32(), -1);
        assert_eq!(memory.size(&store), 2);
    }
    Ok(())
}

#[test]
fn active_data_segments_apply_at_instantiation() -> Result<()> {
    for engine in engines() {
        let module = riptide::Module::new(
            &engine,
            r#"
                (module
                  (memory (export "mem") 1)
                  (data (i32.const 8) "wasm"))
            "#,
        )?;
        let mut store = Store::new(&engine, ());
        let instance = Instance::new(&mut store, &module, &[])?;
        let memory = instance.get_memory(&mut store, "mem").unwrap();
        assert_eq!(&memory.data(&store)[8..12], b"wasm");
    }
    Ok(())
}

#[test]
fn bulk_memory_operations() -> Result<()> {
    for engine in engines() {
        let module = riptide::Module::new(
            &engine,
            r#"
                (module
                  (memory (export "mem") 1)
                  (data $seed "hello")
                  (func (export "init") (param i32 i32 i32)
                    local.get 0
                    local.get 1
                    local.get 2
                    memory.init $seed)
                  (func (export "drop")
                    data.drop $seed)
                  (func (export "copy") (param i32 i32 i32)
                    local.get 0
                    local.get 1
                    local.get 2
                    memory.copy)
                  (func (export "fill") (param i32 i32 i32)
                    local.get 0
                    local.get 1
                    local.get 2
                    memory.fill))
            "#,
        )?;
        let mut store = Store::new(&engine, ());
        let instance = Instance::new(&mut store, &module, &[])?;
        let memory = instance.get_memory(&mut store, "mem").unwrap();
        let init = instance.get_func(&mut store, "init").unwrap();
        let drop_seed = instance.get_func(&mut store, "drop").unwrap();
        let copy = instance.get_func(&mut store, "copy").unwrap();
        let fill = instance.get_func(&mut store, "fill").unwrap();

        init.call(&mut store, &[10.into(), 0.into(), 5.into()], &mut [])?;
        assert_eq!(&memory.data(&store)[10..15], b"hello");

        copy.call(&mut store, &[20.into(), 10.into(), 5.into()], &mut [])?;
        assert_eq!(&memory.data(&store)[20..25], b"hello");

        // Overlapping copy behaves like memmove.
        copy.call(&mut store, &[21.into(), 20.into(), 5.into()], &mut [])?;
        assert_eq!(&memory.data(&store)[20..26], b"hhello");

        fill.call(&mut store, &[0.into(), 0x61.into(), 4.into()], &mut [])?;
        assert_eq!(&memory.data(&store)[0..4], b"aaaa");

        // A dropped passive segment traps on any non-empty init.
        drop_seed.call(&mut store, &[], &mut [])?;
        let err = init
            .call(&mut store, &[0.into(), 0.into(), 1.into()], &mut [])
            .unwrap_err();
        assert!(
            format!("{err:?}").contains("out of bounds memory access"),
            "{err:?}"
        );
        init.call(&mut store, &[0.into(), 0.into(), 0.into()], &mut [])?;
    }
    Ok(())
}

#[test]
fn configured_page_limit() -> Result<()> {
    let mut config = Config::new();
    config.max_memory_pages(2);
    let engine = Engine::new(&config)?;

    // A minimum over the cap fails instantiation.
    let module = riptide::Module::new(&engine, "(module (memory 3))")?;
    let mut store = Store::new(&engine, ());
    let err = Instance::new(&mut store, &module, &[]).unwrap_err();
    assert!(format!("{err:?}").contains("exceeds the limit"), "{err:?}");

    // The cap applies even without a declared maximum.
    let memory = Memory::new(
        &mut store,
        MemoryType { minimum: 1, maximum: None, shared: false },
    )?;
    assert_eq!(memory.grow(&mut store, 1)?, 1);
    assert!(memory.grow(&mut store, 1).is_err());
    Ok(())
}

#[test]
fn memory_data_survives_growth() -> Result<()> {
    // Linear memories grow in place, so addresses seen by the guest
    // before a grow stay valid afterwards.
    let engine = Engine::default();
    let mut store = Store::new(&engine, ());
    let memory = Memory::new(
        &mut store,
        MemoryType { minimum: 1, maximum: None, shared: false },
    )?;
    memory.write(&mut store, 0, b"sticky")?;
    memory.grow(&mut store, 16)?;
    let mut buffer = [0u8; 6];
    memory.read(&store, 0, &mut buffer)?;
    assert_eq!(&buffer, b"sticky");
    Ok(())
}
