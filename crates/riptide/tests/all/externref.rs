use crate::engines;
use anyhow::Result;
use riptide::{Engine, ExternRef, Func, FuncType, Global, GlobalType, Instance, Store, Val, ValType};

#[test]
fn externref_round_trips_through_the_guest() -> Result<()> {
    for engine in engines() {
        let module = riptide::Module::new(
            &engine,
            r#"
                (module
                  (func (export "id") (param externref) (result externref)
                    local.get 0))
            "#,
        )?;
        let mut store = Store::new(&engine, ());
        let instance = Instance::new(&mut store, &module, &[])?;
        let id = instance.get_func(&mut store, "id").unwrap();

        let value = ExternRef::new("payload".to_string());
        let mut results = [Val::ExternRef(None)];
        id.call(&mut store, &[Some(value.clone()).into()], &mut results)?;
        let returned = results[0].unwrap_externref().unwrap();
        assert!(value.ptr_eq(returned));
        assert_eq!(
            returned.data().downcast_ref::<String>().map(String::as_str),
            Some("payload")
        );

        // Null stays null.
        id.call(&mut store, &[Val::ExternRef(None)], &mut results)?;
        assert!(results[0].unwrap_externref().is_none());
    }
    Ok(())
}

#[test]
fn externref_flows_into_host_functions() -> Result<()> {
    for engine in engines() {
        let module = riptide::Module::new(
            &engine,
            r#"
                (module
                  (import "host" "sink" (func $sink (param externref)))
                  (func (export "run") (param externref)
                    local.get 0
                    call $sink))
            "#,
        )?;
        let mut store = Store::new(&engine, 0i32);
        let ty = FuncType::new([ValType::ExternRef], []);
        let sink = Func::new(&mut store, ty, |mut caller, params, _results| {
            let value = params[0].unwrap_externref().unwrap();
            *caller.data_mut() = *value.data().downcast_ref::<i32>().unwrap();
            Ok(())
        });
        let instance = Instance::new(&mut store, &module, &[sink.into()])?;
        let run = instance.get_func(&mut store, "run").unwrap();

        run.call(&mut store, &[Some(ExternRef::new(77i32)).into()], &mut [])?;
        assert_eq!(*store.data(), 77);
    }
    Ok(())
}

#[test]
fn externref_global() -> Result<()> {
    let engine = Engine::default();
    let mut store = Store::new(&engine, ());
    let global = Global::new(
        &mut store,
        GlobalType { ty: ValType::ExternRef, mutability: true },
        Val::ExternRef(None),
    )?;
    assert!(global.get(&mut store).unwrap_externref().is_none());

    let value = ExternRef::new(vec![1u8, 2, 3]);
    global.set(&mut store, Some(value.clone()).into())?;
    let held = global.get(&mut store);
    let held = held.unwrap_externref().unwrap();
    assert!(value.ptr_eq(held));

    global.set(&mut store, Val::ExternRef(None))?;
    assert!(global.get(&mut store).unwrap_externref().is_none());
    Ok(())
}

#[test]
fn guest_externref_global_holds_host_data() -> Result<()> {
    for engine in engines() {
        let module = riptide::Module::new(
            &engine,
            r#"
                (module
                  (global $slot (export "slot") (mut externref) (ref.null extern))
                  (func (export "stash") (param externref)
                    local.get 0
                    global.set $slot)
                  (func (export "fetch") (result externref)
                    global.get $slot))
            "#,
        )?;
        let mut store = Store::new(&engine, ());
        let instance = Instance::new(&mut store, &module, &[])?;
        let stash = instance.get_func(&mut store, "stash").unwrap();
        let fetch = instance.get_func(&mut store, "fetch").unwrap();

        let value = ExternRef::new(0xabcdu32);
        stash.call(&mut store, &[Some(value.clone()).into()], &mut [])?;

        let mut results = [Val::ExternRef(None)];
        fetch.call(&mut store, &[], &mut results)?;
        let fetched = results[0].unwrap_externref().unwrap();
        assert!(value.ptr_eq(fetched));
        assert_eq!(fetched.data().downcast_ref::<u32>(), Some(&0xabcd));
    }
    Ok(())
}

#[test]
fn funcref_values_pass_between_host_and_guest() -> Result<()> {
    for engine in engines() {
        let module = riptide::Module::new(
            &engine,
            r#"
                (module
                  (func $seven (result i32)
                    i32.const 7)
                  (func (export "pick") (param i32) (result funcref)
                    local.get 0
                    i32.eqz
                    if (result funcref)
                      ref.null func
                    else
                      ref.func $seven
                    end)
                  (elem declare func $seven))
            "#,
        )?;
        let mut store = Store::new(&engine, ());
        let instance = Instance::new(&mut store, &module, &[])?;
        let pick = instance.get_func(&mut store, "pick").unwrap();

        let mut results = [Val::FuncRef(None)];
        pick.call(&mut store, &[0.into()], &mut results)?;
        assert!(results[0].unwrap_funcref().is_none());

        pick.call(&mut store, &[1.into()], &mut results)?;
        let seven = results[0].unwrap_funcref().unwrap().clone();
        let mut out = [Val::I32(0)];
        seven.call(&mut store, &[], &mut out)?;
        assert_eq!(out[0].unwrap_i32(), 7);
    }
    Ok(())
}
