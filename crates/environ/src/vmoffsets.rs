//! Offsets and sizes of the runtime structures that compiled code pokes
//! at directly.
//!
//! The runtime lays out `VMContext` and friends with `#[repr(C)]` and
//! asserts in its tests that the layouts match these constants; the
//! compiler bakes the constants into generated code. Keeping them here
//! lets the two crates agree without depending on each other.

/// Magic value stored at the start of every `VMContext`, checked in debug
/// assertions to catch stray pointers.
pub const VMCONTEXT_MAGIC: u64 = u64::from_le_bytes(*b"riptide\0");

/// Offset of the magic value in `VMContext`.
pub const VMCTX_MAGIC: i32 = 0x00;
/// Offset of the back-pointer to the owning instance.
pub const VMCTX_INSTANCE: i32 = 0x08;
/// Offset of the pointer to the `VMMemoryDefinition` of memory 0, or null
/// when the module has no memory.
pub const VMCTX_MEMORY_DEFINITION: i32 = 0x10;
/// Offset of the stack limit; compiled prologues trap when `rsp` would
/// drop below this.
pub const VMCTX_STACK_LIMIT: i32 = 0x20;
/// Offset of the pointer to the interrupt flag byte.
pub const VMCTX_INTERRUPT: i32 = 0x28;
/// Offset of the pointer to the builtin function array.
pub const VMCTX_BUILTINS: i32 = 0x30;
/// Offset of the pointer to the defined-globals array.
pub const VMCTX_GLOBALS: i32 = 0x38;
/// Offset of the pointer to the array of imported-global pointers.
pub const VMCTX_IMPORTED_GLOBALS: i32 = 0x40;
/// Offset of the pointer to the per-module `VMFuncRef` array, indexed by
/// function index.
pub const VMCTX_FUNCREFS: i32 = 0x50;
/// Total size of the fixed `VMContext` header.
pub const VMCTX_SIZE: usize = 0x58;

/// Offset of the base pointer within `VMMemoryDefinition`.
pub const VMMEMORY_DEFINITION_BASE: i32 = 0x00;
/// Offset of the byte length within `VMMemoryDefinition`.
pub const VMMEMORY_DEFINITION_CURRENT_LENGTH: i32 = 0x08;

/// Size of one `VMGlobalDefinition` slot.
pub const VMGLOBAL_SIZE: u8 = 16;

/// Offset of the array-call entry point within `VMFuncRef`.
pub const VMFUNCREF_ARRAY_CALL: i32 = 0x00;
/// Offset of the callee `VMContext` pointer within `VMFuncRef`.
pub const VMFUNCREF_VMCTX: i32 = 0x08;
/// Offset of the engine-wide signature id within `VMFuncRef`.
pub const VMFUNCREF_TYPE_ID: i32 = 0x10;
/// Size of one `VMFuncRef`.
pub const VMFUNCREF_SIZE: u8 = 24;

/// Size of one `ValRaw` slot in an array-call argument buffer.
pub const VALRAW_SIZE: u8 = 16;

/// An index into the `VMBuiltinFunctionsArray`.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub struct BuiltinFunctionIndex(u32);

impl BuiltinFunctionIndex {
    /// `fn(vmctx, delta: u64) -> u64`: grow memory 0, returning the old
    /// size in pages or `u64::MAX` on failure.
    pub const fn memory_grow() -> Self {
        Self(0)
    }
    /// `fn(vmctx, table: u32, index: u32) -> *mut VMFuncRef`: read a
    /// funcref table element, recording a trap and returning a sentinel on
    /// out-of-bounds access.
    pub const fn table_get_funcref() -> Self {
        Self(1)
    }
    /// `fn(vmctx, trap: u32, func: u32, offset: u32)`: record a trap about
    /// to be raised at the given wasm location.
    pub const fn raise_trap() -> Self {
        Self(2)
    }
    /// `fn(vmctx, func: u32, offset: u32)`: record one frame while a trap
    /// unwinds through a caller.
    pub const fn push_frame() -> Self {
        Self(3)
    }

    /// Total number of builtin functions.
    pub const fn len() -> u32 {
        4
    }

    /// The index as a plain integer.
    pub const fn index(&self) -> u32 {
        self.0
    }

    /// Byte offset of this builtin's slot within the builtin array.
    pub const fn byte_offset(&self) -> i32 {
        self.0 as i32 * 8
    }
}
