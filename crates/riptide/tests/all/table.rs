use crate::engines;
use anyhow::Result;
use riptide::{Engine, Func, FuncType, Instance, Store, Table, TableType, Val, ValType};

#[test]
fn host_created_table() -> Result<()> {
    let engine = Engine::default();
    let mut store = Store::new(&engine, ());
    let table = Table::new(
        &mut store,
        TableType { element: ValType::FuncRef, minimum: 2, maximum: Some(4) },
        Val::FuncRef(None),
    )?;

    assert_eq!(table.size(&store), 2);
    assert!(matches!(table.get(&mut store, 0), Some(Val::FuncRef(None))));
    assert!(table.get(&mut store, 2).is_none());

    let ty = FuncType::new([], [ValType::I32]);
    let f = Func::new(&mut store, ty, |_caller, _params, results| {
        results[0] = Val::I32(99);
        Ok(())
    });
    table.set(&mut store, 1, Val::FuncRef(Some(f)))?;
    let stored = match table.get(&mut store, 1) {
        Some(Val::FuncRef(Some(stored))) => stored,
        other => panic!("unexpected table entry: {other:?}"),
    };
    let mut results = [Val::I32(0)];
    stored.call(&mut store, &[], &mut results)?;
    assert_eq!(results[0].unwrap_i32(), 99);

    assert_eq!(table.grow(&mut store, 2, Val::FuncRef(None))?, 2);
    assert_eq!(table.size(&store), 4);
    let err = table.grow(&mut store, 1, Val::FuncRef(None)).unwrap_err();
    assert!(err.to_string().contains("failed to grow table"), "{err}");

    let err = table.set(&mut store, 10, Val::FuncRef(None)).unwrap_err();
    assert!(err.to_string().contains("out of bounds"), "{err}");
    Ok(())
}

#[test]
fn indirect_call_dispatch() -> Result<()> {
    for engine in engines() {
        let module = riptide::Module::new(
            &engine,
            r#"
                (module
                  (type $binop (func (param i32 i32) (result i32)))
                  (table (export "tbl") 2 funcref)
                  (elem (i32.const 0) $add $sub)
                  (func $add (type $binop)
                    local.get 0
                    local.get 1
                    i32.add)
                  (func $sub (type $binop)
                    local.get 0
                    local.get 1
                    i32.sub)
                  (func (export "dispatch") (param i32 i32 i32) (result i32)
                    local.get 1
                    local.get 2
                    local.get 0
                    call_indirect (type $binop)))
            "#,
        )?;
        let mut store = Store::new(&engine, ());
        let instance = Instance::new(&mut store, &module, &[])?;
        let dispatch = instance.get_func(&mut store, "dispatch").unwrap();

        let mut results = [Val::I32(0)];
        dispatch.call(&mut store, &[0.into(), 10.into(), 3.into()], &mut results)?;
        assert_eq!(results[0].unwrap_i32(), 13);
        dispatch.call(&mut store, &[1.into(), 10.into(), 3.into()], &mut results)?;
        assert_eq!(results[0].unwrap_i32(), 7);

        // Out-of-bounds index.
        let err = dispatch
            .call(&mut store, &[9.into(), 0.into(), 0.into()], &mut results)
            .unwrap_err();
        assert!(
            format!("{err:?}").contains("undefined element"),
            "{err:?}"
        );

        // A grown slot starts out null.
        let table = instance.get_table(&mut store, "tbl").unwrap();
        table.grow(&mut store, 1, Val::FuncRef(None))?;
        let err = dispatch
            .call(&mut store, &[2.into(), 0.into(), 0.into()], &mut results)
            .unwrap_err();
        assert!(
            format!("{err:?}").contains("uninitialized element"),
            "{err:?}"
        );

        // An exported table entry is callable from the host.
        let add = match table.get(&mut store, 0) {
            Some(Val::FuncRef(Some(f))) => f,
            other => panic!("unexpected table entry: {other:?}"),
        };
        add.call(&mut store, &[4.into(), 1.into()], &mut results)?;
        assert_eq!(results[0].unwrap_i32(), 5);
    }
    Ok(())
}

#[test]
fn guest_table_instructions() -> Result<()> {
    for engine in engines() {
        let module = riptide::Module::new(
            &engine,
            r#"
                (module
                  (table 4 funcref)
                  (elem (i32.const 0) $one)
                  (func $one (result i32)
                    i32.const 1)
                  (func (export "size") (result i32)
                    table.size)
                  (func (export "spread") (param i32 i32)
                    local.get 0
                    local.get 1
                    table.get
                    i32.const 2
                    table.fill)
                  (func (export "check") (param i32) (result i32)
                    local.get 0
                    table.get
                    ref.is_null))
            "#,
        )?;
        let mut store = Store::new(&engine, ());
        let instance = Instance::new(&mut store, &module, &[])?;
        let size = instance.get_func(&mut store, "size").unwrap();
        let spread = instance.get_func(&mut store, "spread").unwrap();
        let check = instance.get_func(&mut store, "check").unwrap();

        let mut results = [Val::I32(0)];
        size.call(&mut store, &[], &mut results)?;
        assert_eq!(results[0].unwrap_i32(), 4);

        check.call(&mut store, &[2.into()], &mut results)?;
        assert_eq!(results[0].unwrap_i32(), 1);
        spread.call(&mut store, &[2.into(), 0.into()], &mut [])?;
        check.call(&mut store, &[2.into()], &mut results)?;
        assert_eq!(results[0].unwrap_i32(), 0);
        check.call(&mut store, &[3.into()], &mut results)?;
        assert_eq!(results[0].unwrap_i32(), 0);
    }
    Ok(())
}
