//! Runtime support for Riptide: instances, linear memories, tables,
//! executable code memory and trap propagation.
//!
//! This crate is the unsafe waist of the system. It owns every
//! `#[repr(C)]` structure compiled code touches and the thread-local
//! activation state traps flow through, and exposes them behind
//! interfaces the embedding crate can use without reaching into raw
//! contexts itself.

mod code_memory;
mod externref;
mod instance;
mod libcalls;
mod memory;
mod mmap;
mod parking;
mod table;
mod traphandlers;
mod vmcontext;

pub use crate::code_memory::CodeMemory;
pub use crate::externref::ExternRef;
pub use crate::instance::{Imports, Instance, InstanceAllocationRequest, InstanceHandle};
pub use crate::libcalls::TABLE_GET_FAILED;
pub use crate::memory::Memory;
pub use crate::mmap::{page_size, round_up_to_page_size, Mmap};
pub use crate::parking::{ParkingSpot, WaitResult};
pub use crate::table::{Table, TableElement};
pub use crate::traphandlers::{
    catch_traps, has_trap, push_frame, record_trap, record_wasm_trap, RawFrame, TrapReason,
    TrapState,
};
pub use crate::vmcontext::{
    VMArrayCallFunction, VMContext, VMFuncRef, VMGlobalDefinition, VMMemoryDefinition,
    VMOpaqueContext, ValRaw, ARRAY_CALL_OK, ARRAY_CALL_TRAP, VM_HOST_CONTEXT_MAGIC,
};
