//! Builtin functions reachable from compiled code through the
//! `VMBuiltinFunctionsArray`.
//!
//! Each builtin takes the caller's `VMContext` first. Failures are
//! recorded in the thread-local activation; sentinel return values tell
//! compiled code to take its trap epilogue.

use crate::instance::Instance;
use crate::traphandlers;
use crate::vmcontext::{VMContext, VMFuncRef};
use riptide_environ::{TableIndex, Trap};

/// `memory.grow` on memory 0. Returns the previous size in pages, or
/// `u64::MAX` when the grow is refused.
pub(crate) unsafe extern "C" fn memory_grow(vmctx: *mut VMContext, delta: u64) -> u64 {
    let instance = Instance::from_vmctx(vmctx);
    match instance.memory_grow(delta) {
        Ok(Some(previous)) => previous,
        Ok(None) => u64::MAX,
        Err(error) => {
            log::warn!("memory.grow failed: {error:#}");
            u64::MAX
        }
    }
}

/// Reads element `index` of funcref table `table` for `call_indirect`.
///
/// Out-of-bounds access records a trap and returns the sentinel `1`,
/// which compiled code distinguishes from both a valid pointer and the
/// null of an uninitialized element.
pub(crate) unsafe extern "C" fn table_get_funcref(
    vmctx: *mut VMContext,
    table: u32,
    index: u32,
) -> *mut VMFuncRef {
    let instance = Instance::from_vmctx(vmctx);
    match instance.table_get_funcref(TableIndex::from_u32(table), index) {
        Ok(funcref) => funcref,
        Err(trap) => {
            traphandlers::record_trap(traphandlers::TrapReason::Wasm(trap));
            TABLE_GET_FAILED
        }
    }
}

/// Sentinel returned by [`table_get_funcref`] after recording a trap.
pub const TABLE_GET_FAILED: *mut VMFuncRef = 1 as *mut VMFuncRef;

/// Records the trap a compiled function is about to return with.
pub(crate) unsafe extern "C" fn raise_trap(
    _vmctx: *mut VMContext,
    trap: u32,
    func_index: u32,
    wasm_offset: u32,
) {
    let trap = Trap::from_u32(trap).unwrap_or(Trap::UnreachableCodeReached);
    traphandlers::record_wasm_trap(trap, func_index, wasm_offset);
}

/// Records one backtrace frame while a trap unwinds through a compiled
/// caller.
pub(crate) unsafe extern "C" fn push_frame(
    _vmctx: *mut VMContext,
    func_index: u32,
    wasm_offset: u32,
) {
    traphandlers::push_frame(func_index, wasm_offset);
}
