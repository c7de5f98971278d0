use anyhow::Result;
use riptide::{Config, Engine, Instance, Store, Strategy, Trap, Val};
use std::time::Duration;

const SPIN: &str = r#"
    (module
      (func (export "spin")
        loop
          br 0
        end)
      (func (export "done") (result i32)
        i32.const 1))
"#;

fn interruptable_engines() -> Result<Vec<Engine>> {
    let mut config = Config::new();
    config.interruptable(true);
    let auto = Engine::new(&config)?;
    config.strategy(Strategy::Interpreter);
    let interp = Engine::new(&config)?;
    Ok(vec![auto, interp])
}

#[test]
fn interrupt_from_another_thread() -> Result<()> {
    for engine in interruptable_engines()? {
        let module = riptide::Module::new(&engine, SPIN)?;
        let mut store = Store::new(&engine, ());
        let instance = Instance::new(&mut store, &module, &[])?;
        let spin = instance.get_func(&mut store, "spin").unwrap();
        let done = instance.get_func(&mut store, "done").unwrap();

        let handle = store.interrupt_handle()?;
        let interrupter = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            handle.interrupt();
        });

        let err = spin.call(&mut store, &[], &mut []).unwrap_err();
        assert_eq!(err.downcast_ref::<Trap>(), Some(&Trap::Interrupt));
        assert!(format!("{err:?}").contains("interrupt"), "{err:?}");
        interrupter.join().unwrap();

        // Delivery consumes the request, so the store works again.
        let mut results = [Val::I32(0)];
        done.call(&mut store, &[], &mut results)?;
        assert_eq!(results[0].unwrap_i32(), 1);
    }
    Ok(())
}

#[test]
fn pending_interrupt_stops_the_next_call() -> Result<()> {
    let mut config = Config::new();
    config.interruptable(true).strategy(Strategy::Interpreter);
    let engine = Engine::new(&config)?;
    let module = riptide::Module::new(&engine, SPIN)?;
    let mut store = Store::new(&engine, ());
    let instance = Instance::new(&mut store, &module, &[])?;
    let spin = instance.get_func(&mut store, "spin").unwrap();

    store.interrupt_handle()?.interrupt();
    let err = spin.call(&mut store, &[], &mut []).unwrap_err();
    assert_eq!(err.downcast_ref::<Trap>(), Some(&Trap::Interrupt));
    Ok(())
}

#[test]
fn interrupt_handles_are_config_gated() -> Result<()> {
    let engine = Engine::default();
    let store = Store::new(&engine, ());
    let err = store.interrupt_handle().unwrap_err();
    assert!(err.to_string().contains("not enabled"), "{err}");
    Ok(())
}

#[test]
fn closing_the_engine_stops_inflight_calls() -> Result<()> {
    let engine = crate::interp_engine();
    let module = riptide::Module::new(&engine, SPIN)?;
    let mut store = Store::new(&engine, ());
    let instance = Instance::new(&mut store, &module, &[])?;
    let spin = instance.get_func(&mut store, "spin").unwrap();

    let closer = {
        let engine = engine.clone();
        std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            engine.close();
        })
    };

    let err = spin.call(&mut store, &[], &mut []).unwrap_err();
    assert_eq!(err.downcast_ref::<Trap>(), Some(&Trap::Interrupt));
    closer.join().unwrap();

    // Close is permanent.
    assert!(engine.is_closed());
    let err = spin.call(&mut store, &[], &mut []).unwrap_err();
    assert!(err.to_string().contains("engine has been closed"), "{err}");
    Ok(())
}
