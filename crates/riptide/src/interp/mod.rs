//! The interpreter.
//!
//! Functions the compiler declines (or all of them, under the
//! interpreter strategy) run here. Each one gets a funcref whose
//! `vmctx` is a [`VMInterpContext`], so compiled code, host code and
//! other interpreted code all call it through the same array-call ABI
//! without knowing how it executes.

mod code;
mod exec;
mod simd;

pub(crate) use code::{lower, FuncCode};

use crate::engine::Engine;
use riptide_environ::{DefinedFuncIndex, FuncType, Module, Trap};
use riptide_runtime::{
    record_wasm_trap, ExternRef, VMContext, VMFuncRef, VMOpaqueContext, ValRaw, ARRAY_CALL_OK,
    ARRAY_CALL_TRAP,
};
use std::cell::Cell;
use std::sync::Arc;

pub(crate) const VM_INTERP_CONTEXT_MAGIC: u64 = u64::from_le_bytes(*b"ripintr\0");

/// The `vmctx` of an interpreted function's funcref. Layout-compatible
/// with the magic-first prefix every context shares.
#[repr(C)]
pub(crate) struct VMInterpContext {
    pub magic: u64,
    pub state: *const InterpFuncState,
}

/// Everything the interpreter needs to run one function.
pub(crate) struct InterpFuncState {
    /// The owning instance's context.
    pub vmctx: *mut VMContext,
    pub module: Arc<Module>,
    pub defined: DefinedFuncIndex,
    pub func_index: u32,
    pub ty: FuncType,
    pub code: Arc<FuncCode>,
    /// Engine-wide signature ids, indexed by the module's type indices.
    pub shared_type_ids: Arc<Vec<u32>>,
    pub engine: Engine,
}

/// An operand or local.
///
/// References are held as their runtime representations directly, so no
/// store lookup happens on the hot path.
#[derive(Clone, Debug)]
pub(crate) enum Value {
    I32(i32),
    I64(i64),
    F32(u32),
    F64(u64),
    V128(u128),
    Func(*mut VMFuncRef),
    Extern(Option<ExternRef>),
}

impl Value {
    pub fn default_for(ty: riptide_environ::ValType) -> Value {
        use riptide_environ::ValType;
        match ty {
            ValType::I32 => Value::I32(0),
            ValType::I64 => Value::I64(0),
            ValType::F32 => Value::F32(0),
            ValType::F64 => Value::F64(0),
            ValType::V128 => Value::V128(0),
            ValType::FuncRef => Value::Func(std::ptr::null_mut()),
            ValType::ExternRef => Value::Extern(None),
        }
    }

    /// Decodes a value from an array-call slot, taking ownership of any
    /// reference count the caller transferred.
    pub unsafe fn from_raw(raw: ValRaw, ty: riptide_environ::ValType) -> Value {
        use riptide_environ::ValType;
        match ty {
            ValType::I32 => Value::I32(raw.get_i32()),
            ValType::I64 => Value::I64(raw.get_i64()),
            ValType::F32 => Value::F32(raw.get_f32()),
            ValType::F64 => Value::F64(raw.get_f64()),
            ValType::V128 => Value::V128(raw.get_v128()),
            ValType::FuncRef => Value::Func(raw.get_funcref()),
            ValType::ExternRef => {
                let ptr = raw.get_externref();
                if ptr.is_null() {
                    Value::Extern(None)
                } else {
                    Value::Extern(Some(ExternRef::from_raw(ptr)))
                }
            }
        }
    }

    /// Encodes a value into an array-call slot, transferring ownership
    /// of any reference count to the reader.
    pub fn into_raw(self) -> ValRaw {
        match self {
            Value::I32(v) => ValRaw::i32(v),
            Value::I64(v) => ValRaw::i64(v),
            Value::F32(bits) => ValRaw::f32(bits),
            Value::F64(bits) => ValRaw::f64(bits),
            Value::V128(bits) => ValRaw::v128(bits),
            Value::Func(ptr) => ValRaw::funcref(ptr),
            Value::Extern(None) => ValRaw::externref(std::ptr::null()),
            Value::Extern(Some(r)) => ValRaw::externref(r.into_raw()),
        }
    }
}

thread_local! {
    /// Interpreter call depth on this thread, across all stores.
    static DEPTH: Cell<usize> = Cell::new(0);
}

fn depth_limit(max_wasm_stack: usize) -> usize {
    // Interpreted frames are heap-heavy but cheap on the native stack;
    // budget roughly 1 KiB of the configured stack per frame.
    (max_wasm_stack / 1024).max(16)
}

/// The array-call entry point of every interpreted function.
///
/// # Safety
///
/// `vmctx` must be a live [`VMInterpContext`] and `values` an array-call
/// buffer sized for the function's signature.
pub(crate) unsafe extern "C" fn array_call_entry(
    vmctx: *mut VMOpaqueContext,
    values: *mut ValRaw,
) -> u32 {
    let ctx = vmctx as *const VMInterpContext;
    debug_assert_eq!((*ctx).magic, VM_INTERP_CONTEXT_MAGIC);
    let state = &*(*ctx).state;

    let depth = DEPTH.with(|d| {
        let depth = d.get();
        d.set(depth + 1);
        depth
    });
    let status = if depth >= depth_limit(state.engine.config().max_wasm_stack) {
        record_wasm_trap(Trap::StackOverflow, state.func_index, 0);
        ARRAY_CALL_TRAP
    } else {
        let params = state.ty.params();
        let mut args = Vec::with_capacity(state.code.locals.len() + params.len());
        for (i, ty) in params.iter().enumerate() {
            args.push(Value::from_raw(*values.add(i), *ty));
        }
        match exec::run(state, args) {
            Ok(results) => {
                for (i, value) in results.into_iter().enumerate() {
                    *values.add(i) = value.into_raw();
                }
                ARRAY_CALL_OK
            }
            Err(()) => ARRAY_CALL_TRAP,
        }
    };
    DEPTH.with(|d| d.set(d.get() - 1));
    status
}
