//! The `#[repr(C)]` structures shared between Rust and compiled code.
//!
//! Compiled functions receive a `*mut VMContext` in their first argument
//! and reach everything else through the fixed-offset fields declared
//! here. The offsets are mirrored as constants in
//! `riptide_environ::vmoffsets` for the compiler's benefit; the tests at
//! the bottom keep the two in sync.

use riptide_environ::vmoffsets::{self, VMCONTEXT_MAGIC};
use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};

/// The signature of every compiled function and host trampoline.
///
/// Arguments and results are exchanged through `values`, an array of
/// [`ValRaw`] slots sized to `max(params, results)`. The return value is
/// 0 on success and 1 when a trap or host error was recorded in the
/// active call context.
pub type VMArrayCallFunction =
    unsafe extern "C" fn(vmctx: *mut VMOpaqueContext, values: *mut ValRaw) -> u32;

/// Status returned by an array-call function on success.
pub const ARRAY_CALL_OK: u32 = 0;
/// Status returned by an array-call function when a trap was recorded.
pub const ARRAY_CALL_TRAP: u32 = 1;

/// An opaque context pointer stored in a [`VMFuncRef`].
///
/// Both `VMContext` (wasm callees) and host function contexts start with
/// a magic word, which lets debug assertions distinguish them.
#[repr(C)]
pub struct VMOpaqueContext {
    pub(crate) magic: u64,
}

/// The magic word of host function contexts.
pub const VM_HOST_CONTEXT_MAGIC: u64 = u64::from_le_bytes(*b"riphost\0");

impl VMOpaqueContext {
    /// Upcast a `VMContext` pointer.
    #[inline]
    pub fn from_vmctx(vmctx: *mut VMContext) -> *mut VMOpaqueContext {
        vmctx.cast()
    }

    /// The magic word of the pointed-to context.
    ///
    /// # Safety
    /// `ptr` must point at a live context of either flavor.
    pub unsafe fn magic(ptr: *const VMOpaqueContext) -> u64 {
        (*ptr).magic
    }
}

/// The state of one instance as seen by compiled code.
///
/// Every field lives at the offset named by the corresponding constant in
/// `riptide_environ::vmoffsets`. The structure is created and owned by
/// `Instance` and never moves afterwards.
#[repr(C)]
pub struct VMContext {
    /// Always [`VMCONTEXT_MAGIC`].
    pub(crate) magic: u64,
    /// Back-pointer to the owning `Instance`.
    pub(crate) instance: *mut u8,
    /// The definition of linear memory 0, or null.
    pub(crate) memory: *const VMMemoryDefinition,
    pub(crate) _reserved0: usize,
    /// Compiled prologues trap with a stack-overflow when `rsp` would
    /// drop below this.
    pub(crate) stack_limit: u64,
    /// Checked at loop back-edges and function entries; non-zero requests
    /// an interrupt trap.
    pub(crate) interrupt: *const AtomicU8,
    /// The builtin function table.
    pub(crate) builtins: *const VMBuiltinFunctionsArray,
    /// Defined globals, one 16-byte slot each.
    pub(crate) globals: *mut VMGlobalDefinition,
    /// Pointers to the definitions of imported globals.
    pub(crate) imported_globals: *mut *mut VMGlobalDefinition,
    pub(crate) _reserved1: usize,
    /// One `VMFuncRef` per function in the module, indexed by function
    /// index.
    pub(crate) funcrefs: *const VMFuncRef,
}

impl VMContext {
    /// Downcast an opaque context known to be a wasm `VMContext`.
    ///
    /// # Safety
    /// `ptr` must come from a `VMFuncRef` whose callee is a wasm function.
    #[inline]
    pub unsafe fn from_opaque(ptr: *mut VMOpaqueContext) -> *mut VMContext {
        debug_assert_eq!(VMOpaqueContext::magic(ptr), VMCONTEXT_MAGIC);
        ptr.cast()
    }
}

/// The runtime definition of a linear memory, pointed to by `VMContext`.
///
/// `current_length` is atomic because shared memories may grow on another
/// thread while compiled code reads the field; growth only ever increases
/// it and never moves `base`.
#[repr(C)]
#[derive(Debug)]
pub struct VMMemoryDefinition {
    /// The start of the memory's bytes.
    pub base: *mut u8,
    /// The accessible byte length.
    pub current_length: AtomicUsize,
}

impl VMMemoryDefinition {
    /// The accessible length, with relaxed ordering.
    pub fn current_length(&self) -> usize {
        self.current_length.load(Ordering::Relaxed)
    }
}

/// The runtime value of one global variable: a 16-byte slot reinterpreted
/// according to the global's declared type.
#[repr(C, align(16))]
#[derive(Copy, Clone, Default, Debug)]
pub struct VMGlobalDefinition {
    bits: u128,
}

impl VMGlobalDefinition {
    /// A zero-initialized slot.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_i32(&self) -> i32 {
        self.bits as u32 as i32
    }
    pub fn set_i32(&mut self, value: i32) {
        self.bits = value as u32 as u128;
    }
    pub fn get_i64(&self) -> i64 {
        self.bits as u64 as i64
    }
    pub fn set_i64(&mut self, value: i64) {
        self.bits = value as u64 as u128;
    }
    pub fn get_f32_bits(&self) -> u32 {
        self.bits as u32
    }
    pub fn set_f32_bits(&mut self, value: u32) {
        self.bits = value as u128;
    }
    pub fn get_f64_bits(&self) -> u64 {
        self.bits as u64
    }
    pub fn set_f64_bits(&mut self, value: u64) {
        self.bits = value as u128;
    }
    pub fn get_u128(&self) -> u128 {
        self.bits
    }
    pub fn set_u128(&mut self, value: u128) {
        self.bits = value;
    }
}

/// One 16-byte slot of an array-call argument buffer.
///
/// All scalars live in the low bits, little-endian, so compiled code can
/// load and store them with plain moves of the right width.
#[repr(C, align(16))]
#[derive(Copy, Clone, Default, Debug)]
pub struct ValRaw {
    bits: u128,
}

impl ValRaw {
    pub fn i32(value: i32) -> ValRaw {
        ValRaw { bits: value as u32 as u128 }
    }
    pub fn i64(value: i64) -> ValRaw {
        ValRaw { bits: value as u64 as u128 }
    }
    pub fn f32(bits: u32) -> ValRaw {
        ValRaw { bits: bits as u128 }
    }
    pub fn f64(bits: u64) -> ValRaw {
        ValRaw { bits: bits as u128 }
    }
    pub fn v128(bits: u128) -> ValRaw {
        ValRaw { bits }
    }
    pub fn funcref(ptr: *mut VMFuncRef) -> ValRaw {
        ValRaw { bits: ptr as usize as u128 }
    }
    pub fn externref(ptr: *const ()) -> ValRaw {
        ValRaw { bits: ptr as usize as u128 }
    }

    pub fn get_i32(&self) -> i32 {
        self.bits as u32 as i32
    }
    pub fn get_i64(&self) -> i64 {
        self.bits as u64 as i64
    }
    pub fn get_f32(&self) -> u32 {
        self.bits as u32
    }
    pub fn get_f64(&self) -> u64 {
        self.bits as u64
    }
    pub fn get_v128(&self) -> u128 {
        self.bits
    }
    pub fn get_funcref(&self) -> *mut VMFuncRef {
        self.bits as usize as *mut VMFuncRef
    }
    pub fn get_externref(&self) -> *const () {
        self.bits as usize as *const ()
    }
}

/// A callable reference to a function, the runtime representation of
/// `funcref`.
///
/// These are stored in tables and in each instance's per-module function
/// array; null pointers represent `ref.null func`.
#[repr(C)]
#[derive(Copy, Clone, Debug)]
pub struct VMFuncRef {
    /// The entry point, in the array-call ABI.
    pub array_call: VMArrayCallFunction,
    /// The callee's context, passed as the first argument.
    pub vmctx: *mut VMOpaqueContext,
    /// The engine-wide id of the function's signature, compared by
    /// `call_indirect`.
    pub type_id: u32,
    pub(crate) _pad: u32,
}

impl VMFuncRef {
    /// Creates a funcref for a wasm or host function.
    pub fn new(
        array_call: VMArrayCallFunction,
        vmctx: *mut VMOpaqueContext,
        type_id: u32,
    ) -> VMFuncRef {
        VMFuncRef { array_call, vmctx, type_id, _pad: 0 }
    }
}

/// The table of builtin functions reachable from compiled code.
///
/// Field order matches `BuiltinFunctionIndex` in
/// `riptide_environ::vmoffsets`.
#[repr(C)]
pub struct VMBuiltinFunctionsArray {
    pub(crate) memory_grow: unsafe extern "C" fn(*mut VMContext, u64) -> u64,
    pub(crate) table_get_funcref: unsafe extern "C" fn(*mut VMContext, u32, u32) -> *mut VMFuncRef,
    pub(crate) raise_trap: unsafe extern "C" fn(*mut VMContext, u32, u32, u32),
    pub(crate) push_frame: unsafe extern "C" fn(*mut VMContext, u32, u32),
}

impl VMBuiltinFunctionsArray {
    pub(crate) const INIT: VMBuiltinFunctionsArray = VMBuiltinFunctionsArray {
        memory_grow: crate::libcalls::memory_grow,
        table_get_funcref: crate::libcalls::table_get_funcref,
        raise_trap: crate::libcalls::raise_trap,
        push_frame: crate::libcalls::push_frame,
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use riptide_environ::vmoffsets::BuiltinFunctionIndex;
    use std::mem::{size_of, MaybeUninit};
    use std::ptr::addr_of;

    macro_rules! assert_offset {
        ($base:expr, $field:expr, $expected:expr) => {
            assert_eq!(($field as usize) - ($base as usize), $expected as usize);
        };
    }

    #[test]
    fn vmcontext_layout_matches_vmoffsets() {
        let ctx = MaybeUninit::<VMContext>::uninit();
        let base = ctx.as_ptr();
        unsafe {
            assert_offset!(base, addr_of!((*base).magic), vmoffsets::VMCTX_MAGIC);
            assert_offset!(base, addr_of!((*base).instance), vmoffsets::VMCTX_INSTANCE);
            assert_offset!(
                base,
                addr_of!((*base).memory),
                vmoffsets::VMCTX_MEMORY_DEFINITION
            );
            assert_offset!(
                base,
                addr_of!((*base).stack_limit),
                vmoffsets::VMCTX_STACK_LIMIT
            );
            assert_offset!(base, addr_of!((*base).interrupt), vmoffsets::VMCTX_INTERRUPT);
            assert_offset!(base, addr_of!((*base).builtins), vmoffsets::VMCTX_BUILTINS);
            assert_offset!(base, addr_of!((*base).globals), vmoffsets::VMCTX_GLOBALS);
            assert_offset!(
                base,
                addr_of!((*base).imported_globals),
                vmoffsets::VMCTX_IMPORTED_GLOBALS
            );
            assert_offset!(base, addr_of!((*base).funcrefs), vmoffsets::VMCTX_FUNCREFS);
        }
        assert_eq!(size_of::<VMContext>(), vmoffsets::VMCTX_SIZE);
    }

    #[test]
    fn auxiliary_layouts() {
        let def = MaybeUninit::<VMMemoryDefinition>::uninit();
        let base = def.as_ptr();
        unsafe {
            assert_offset!(base, addr_of!((*base).base), vmoffsets::VMMEMORY_DEFINITION_BASE);
            assert_offset!(
                base,
                addr_of!((*base).current_length),
                vmoffsets::VMMEMORY_DEFINITION_CURRENT_LENGTH
            );
        }
        assert_eq!(size_of::<VMGlobalDefinition>(), vmoffsets::VMGLOBAL_SIZE as usize);
        assert_eq!(size_of::<ValRaw>(), vmoffsets::VALRAW_SIZE as usize);

        let funcref = MaybeUninit::<VMFuncRef>::uninit();
        let base = funcref.as_ptr();
        unsafe {
            assert_offset!(
                base,
                addr_of!((*base).array_call),
                vmoffsets::VMFUNCREF_ARRAY_CALL
            );
            assert_offset!(base, addr_of!((*base).vmctx), vmoffsets::VMFUNCREF_VMCTX);
            assert_offset!(base, addr_of!((*base).type_id), vmoffsets::VMFUNCREF_TYPE_ID);
        }
        assert_eq!(size_of::<VMFuncRef>(), vmoffsets::VMFUNCREF_SIZE as usize);

        assert_eq!(
            size_of::<VMBuiltinFunctionsArray>(),
            BuiltinFunctionIndex::len() as usize * 8
        );
    }

    #[test]
    fn valraw_scalars() {
        assert_eq!(ValRaw::i32(-1).get_i32(), -1);
        assert_eq!(ValRaw::i64(i64::MIN).get_i64(), i64::MIN);
        assert_eq!(ValRaw::f32(0x7fc0_0000).get_f32(), 0x7fc0_0000);
        assert_eq!(ValRaw::f64(0x7ff8_0000_0000_0000).get_f64(), 0x7ff8_0000_0000_0000);
        assert!(ValRaw::funcref(std::ptr::null_mut()).get_funcref().is_null());
    }
}
