//! Standalone environment for WebAssembly: core types, the decoded module
//! representation, the binary decoder and the validator.
//!
//! This crate is deliberately free of any execution or code generation
//! machinery so that both the compiler and the interpreter can share one
//! view of a module. Everything index-shaped uses `cranelift-entity` typed
//! indices; once [`validate_module`] has accepted a module, every index
//! stored in it is known to be in bounds and is never re-checked at run
//! time.

mod decode;
mod error;
mod features;
mod indices;
mod module;
mod operators;
mod trap;
mod types;
mod validate;
pub mod vmoffsets;

pub use crate::decode::decode_module;
pub use crate::error::{WasmError, WasmResult};
pub use crate::features::WasmFeatures;
pub use crate::indices::*;
pub use crate::module::{
    ConstExpr, DataSegment, ElemKind, ElemSegment, FunctionBody, Import, Module,
};
pub use crate::operators::{
    AtomicRmwOp, AtomicWidth, BlockType, MemArg, Operator, SimdBinaryOp, SimdShape, SimdShiftOp,
    SimdUnaryOp,
};
pub use crate::trap::Trap;
pub use crate::types::{
    EntityIndex, EntityType, FuncType, Global, Memory, Table, ValType,
};
pub use crate::validate::validate_module;

/// The number of bytes in one WebAssembly page.
pub const WASM_PAGE_SIZE: u64 = 0x10000;

/// The maximum number of pages a 32-bit linear memory may have.
pub const WASM_MAX_PAGES: u64 = 0x10000;

/// Implementation limit on the number of locals a single function may
/// declare, matching the limit enforced by the upstream tooling.
pub const MAX_WASM_FUNCTION_LOCALS: u32 = 50_000;
