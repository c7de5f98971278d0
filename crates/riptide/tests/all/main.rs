//! Integration tests for the public embedding API.

use riptide::{Config, Engine, Strategy};

mod atomics;
mod externref;
mod func;
mod globals;
mod instance;
mod interrupt;
mod linker;
mod memory;
mod simd;
mod table;
mod traps;

/// An engine that always runs guest code in the interpreter, so a test
/// does not depend on a compiler backend existing for the host.
pub fn interp_engine() -> Engine {
    let mut config = Config::new();
    config.strategy(Strategy::Interpreter);
    Engine::new(&config).unwrap()
}

/// Both execution tiers. The default engine compiles what it can on
/// hosts with a backend and interprets elsewhere; observable behavior
/// must agree between the two.
pub fn engines() -> Vec<Engine> {
    vec![Engine::default(), interp_engine()]
}
