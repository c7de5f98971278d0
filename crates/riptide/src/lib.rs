//! Riptide's embedding API.
//!
//! This crate ties the decoder ([`riptide_environ`]), the compiler
//! ([`riptide_jit`]) and the runtime ([`riptide_runtime`]) together into
//! the API an application uses to load and run WebAssembly:
//!
//! ```no_run
//! use riptide::{Engine, Instance, Module, Store, Val};
//!
//! fn main() -> anyhow::Result<()> {
//!     let engine = Engine::default();
//!     let module = Module::new(
//!         &engine,
//!         r#"(module
//!             (func (export "add") (param i32 i32) (result i32)
//!                 local.get 0
//!                 local.get 1
//!                 i32.add))"#,
//!     )?;
//!
//!     let mut store = Store::new(&engine, ());
//!     let instance = Instance::new(&mut store, &module, &[])?;
//!     let add = instance.get_func(&mut store, "add").unwrap();
//!
//!     let mut results = [Val::I32(0)];
//!     add.call(&mut store, &[Val::I32(7), Val::I32(9)], &mut results)?;
//!     assert_eq!(results[0].unwrap_i32(), 16);
//!     Ok(())
//! }
//! ```
//!
//! The core concepts:
//!
//! * An [`Engine`] holds the configuration, the compiler and everything
//!   shared across stores. Functions compile to native code where the
//!   backend supports them and fall back to an interpreter otherwise;
//!   both run behind the same calling convention.
//! * A [`Module`] is a compiled module, shareable across threads and
//!   instantiable many times.
//! * A [`Store`] owns instances and host objects, plus arbitrary host
//!   data reachable from host functions through [`Caller`].
//! * A [`Linker`] resolves imports by name; [`Instance::new`] takes them
//!   positionally.
//!
//! Traps, host errors and interrupts surface as [`anyhow::Error`]s from
//! [`Func::call`], with the guest frames attached as a
//! [`WasmBacktrace`].

mod config;
mod engine;
mod externals;
mod func;
mod instance;
mod interp;
mod linker;
mod module;
mod store;
mod trap;
mod values;

pub use crate::config::{Config, Strategy};
pub use crate::engine::Engine;
pub use crate::externals::{Extern, ExternType, Global, Memory, Table};
pub use crate::func::{Caller, Func};
pub use crate::instance::Instance;
pub use crate::linker::Linker;
pub use crate::module::Module;
pub use crate::store::{InterruptHandle, Store};
pub use crate::trap::{FrameInfo, Trap, WasmBacktrace};
pub use crate::values::Val;

/// A reference to an arbitrary host value, passable through wasm as an
/// `externref`.
pub use riptide_runtime::ExternRef;

pub use riptide_environ::{
    FuncType, Global as GlobalType, Memory as MemoryType, Table as TableType, ValType,
};
