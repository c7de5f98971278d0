//! Functions: host-defined and exported wasm functions, and the calls
//! between them.

use crate::store::{self, Store, StoreInner, StoreOpaque};
use crate::values::Val;
use anyhow::{bail, Result};
use riptide_environ::{FuncIndex, FuncType, Trap, ValType};
use riptide_runtime::{
    catch_traps, record_trap, ExternRef, TrapReason, VMFuncRef, VMOpaqueContext, ValRaw,
    ARRAY_CALL_OK, ARRAY_CALL_TRAP, VM_HOST_CONTEXT_MAGIC,
};
use std::sync::atomic::Ordering;

/// A function handle, either a wasm export or a host function created
/// with [`Func::new`].
///
/// Handles are cheap indices tied to the [`Store`] that created them;
/// using one with another store panics.
#[derive(Copy, Clone, Debug)]
pub struct Func {
    store_id: u64,
    index: usize,
}

pub(crate) struct FuncData {
    pub kind: FuncKind,
    pub ty: FuncType,
    pub type_id: u32,
}

pub(crate) enum FuncKind {
    /// A function of an instance in this store.
    Wasm { instance: usize, index: FuncIndex },
    /// A host function. The boxes keep the context and funcref at stable
    /// addresses for as long as guest code may hold the funcref.
    Host {
        #[allow(dead_code)]
        ctx: Box<VMHostFuncContext>,
        #[allow(dead_code)]
        state: Box<HostFuncState>,
        funcref: Box<VMFuncRef>,
    },
    /// A funcref that flowed out of a table, global or return value. It
    /// points into an allocation owned elsewhere in this store.
    Raw(*mut VMFuncRef),
}

/// The `vmctx` of a host function's funcref.
#[repr(C)]
pub(crate) struct VMHostFuncContext {
    pub magic: u64,
    pub state: *const HostFuncState,
}

pub(crate) struct HostFuncState {
    ty: FuncType,
    #[allow(clippy::type_complexity)]
    closure: Box<dyn Fn(*mut StoreOpaque, &[Val], &mut [Val]) -> Result<()> + Send + Sync>,
}

/// The caller's store, handed to host functions so they can reach their
/// host data while wasm is on the stack.
pub struct Caller<'a, T> {
    store: &'a mut StoreInner<T>,
}

impl<T> Caller<'_, T> {
    /// Shared access to the store's host data.
    pub fn data(&self) -> &T {
        &self.store.data
    }

    /// Exclusive access to the store's host data.
    pub fn data_mut(&mut self) -> &mut T {
        &mut self.store.data
    }
}

impl Func {
    /// Creates a host function with the given signature.
    ///
    /// The callback runs whenever wasm (or [`Func::call`]) invokes the
    /// function. Returning an error unwinds the calling guest; the error
    /// is returned from the outermost `call`, with the guest frames that
    /// were on the stack attached as a [`WasmBacktrace`].
    ///
    /// [`WasmBacktrace`]: crate::WasmBacktrace
    pub fn new<T>(
        store: &mut Store<T>,
        ty: FuncType,
        func: impl Fn(Caller<'_, T>, &[Val], &mut [Val]) -> Result<()> + Send + Sync + 'static,
    ) -> Func {
        let closure = Box::new(
            move |opaque: *mut StoreOpaque, params: &[Val], results: &mut [Val]| {
                // The active store is the one that entered the guest,
                // and stores only run guests created from themselves, so
                // this cast recovers the concrete `T`.
                let inner = unsafe { &mut *(opaque as *mut StoreInner<T>) };
                func(Caller { store: inner }, params, results)
            },
        );
        let opaque = store.opaque_mut();
        let type_id = opaque.engine().signatures().register(&ty);
        let state = Box::new(HostFuncState { ty: ty.clone(), closure });
        let ctx = Box::new(VMHostFuncContext {
            magic: VM_HOST_CONTEXT_MAGIC,
            state: &*state,
        });
        let funcref = Box::new(VMFuncRef::new(
            host_array_call,
            &*ctx as *const VMHostFuncContext as *mut VMOpaqueContext,
            type_id,
        ));
        opaque.funcs.push(FuncData {
            kind: FuncKind::Host { ctx, state, funcref },
            ty,
            type_id,
        });
        Func {
            store_id: opaque.id(),
            index: opaque.funcs.len() - 1,
        }
    }

    /// The function's signature.
    pub fn ty<T>(&self, store: &Store<T>) -> FuncType {
        let opaque = store.opaque();
        opaque.check_id(self.store_id);
        opaque.funcs[self.index].ty.clone()
    }

    /// Calls the function with `params`, writing its results into
    /// `results` (which must have exactly as many slots as the signature
    /// has results).
    ///
    /// Traps, host errors and interrupts all surface as the returned
    /// error; the store stays usable afterwards.
    pub fn call<T>(&self, store: &mut Store<T>, params: &[Val], results: &mut [Val]) -> Result<()> {
        let opaque = store.opaque_mut();
        opaque.check_id(self.store_id);
        let ty = opaque.funcs[self.index].ty.clone();
        if params.len() != ty.params().len() {
            bail!(
                "expected {} parameters, got {}",
                ty.params().len(),
                params.len()
            );
        }
        for (value, expected) in params.iter().zip(ty.params()) {
            if value.ty() != *expected {
                bail!("parameter type mismatch: expected {expected}, got {}", value.ty());
            }
        }
        if results.len() != ty.results().len() {
            bail!(
                "expected {} result slots, got {}",
                ty.results().len(),
                results.len()
            );
        }

        let mut buffer = vec![ValRaw::i32(0); params.len().max(results.len()).max(1)];
        for (slot, value) in buffer.iter_mut().zip(params) {
            *slot = val_into_raw(opaque, value);
        }

        let (funcref, module) = resolve(opaque, self.index);
        call_raw(opaque, module.as_deref(), funcref, buffer.as_mut_ptr())?;

        for (i, ty) in ty.results().iter().enumerate() {
            results[i] = unsafe { val_from_raw(opaque, buffer[i], *ty) };
        }
        Ok(())
    }

    pub(crate) fn from_data(opaque: &mut StoreOpaque, data: FuncData) -> Func {
        let store_id = opaque.id();
        opaque.funcs.push(data);
        Func {
            store_id,
            index: opaque.funcs.len() - 1,
        }
    }

    /// Wraps a raw funcref that flowed out of guest state.
    ///
    /// # Safety
    ///
    /// `ptr` must be null or point at a live funcref owned by an object
    /// in this store.
    pub(crate) unsafe fn from_vm_funcref(
        opaque: &mut StoreOpaque,
        ptr: *mut VMFuncRef,
    ) -> Option<Func> {
        if ptr.is_null() {
            return None;
        }
        let type_id = (*ptr).type_id;
        let ty = opaque
            .engine()
            .signatures()
            .lookup(type_id)
            .unwrap_or_else(|| unreachable!("live funcrefs carry registered signatures"));
        Some(Func::from_data(opaque, FuncData { kind: FuncKind::Raw(ptr), ty, type_id }))
    }

    pub(crate) fn resolve_funcref(&self, opaque: &mut StoreOpaque) -> *mut VMFuncRef {
        opaque.check_id(self.store_id);
        resolve(opaque, self.index).0
    }

    pub(crate) fn type_id(&self, opaque: &StoreOpaque) -> u32 {
        opaque.check_id(self.store_id);
        opaque.funcs[self.index].type_id
    }
}

fn resolve(
    opaque: &mut StoreOpaque,
    index: usize,
) -> (*mut VMFuncRef, Option<std::sync::Arc<riptide_environ::Module>>) {
    let (instance, index) = match &opaque.funcs[index].kind {
        FuncKind::Wasm { instance, index } => (*instance, *index),
        FuncKind::Host { funcref, .. } => {
            return (&**funcref as *const VMFuncRef as *mut VMFuncRef, None);
        }
        FuncKind::Raw(ptr) => return (*ptr, None),
    };
    let instance = opaque.instances[instance].handle.instance_mut();
    let module = instance.module().clone();
    (instance.funcref(index), Some(module))
}

/// Runs one guest call through the array-call ABI, turning an unwound
/// trap state into the error the embedder sees.
///
/// This is the single entry point for all transitions from the host into
/// the guest: explicit calls and start functions both come through here.
pub(crate) fn call_raw(
    opaque: &mut StoreOpaque,
    module: Option<&riptide_environ::Module>,
    funcref: *mut VMFuncRef,
    values: *mut ValRaw,
) -> Result<()> {
    if opaque.engine().is_closed() {
        bail!("engine has been closed");
    }

    if opaque.call_depth == 0 {
        // First entry on this call stack: derive the stack limit wasm
        // prologues check from the current stack pointer, approximated
        // by a local's address.
        let marker = 0u8;
        let sp = &marker as *const u8 as usize;
        let limit = sp.saturating_sub(opaque.engine().config().max_wasm_stack) as u64;
        for instance in opaque.instances.iter_mut() {
            instance.handle.instance_mut().set_stack_limit(limit);
        }
    }

    opaque.call_depth += 1;
    let active = store::activate(opaque as *mut StoreOpaque);
    let result = catch_traps(|| unsafe { ((*funcref).array_call)((*funcref).vmctx, values) });
    drop(active);
    opaque.call_depth -= 1;

    match result {
        Ok(()) => Ok(()),
        Err(state) => {
            if matches!(state.reason, TrapReason::Wasm(Trap::Interrupt))
                && !opaque.engine().is_closed()
            {
                // Deliver the interrupt once, then let the store keep
                // going.
                let _ = opaque.interrupt().compare_exchange(
                    1,
                    0,
                    Ordering::SeqCst,
                    Ordering::SeqCst,
                );
            }
            Err(crate::trap::error_from_trap_state(state, module))
        }
    }
}

/// Encodes a value into an array-call slot, transferring ownership of
/// any externref count to the eventual reader.
pub(crate) fn val_into_raw(opaque: &mut StoreOpaque, value: &Val) -> ValRaw {
    match value {
        Val::I32(v) => ValRaw::i32(*v),
        Val::I64(v) => ValRaw::i64(*v),
        Val::F32(bits) => ValRaw::f32(*bits),
        Val::F64(bits) => ValRaw::f64(*bits),
        Val::V128(bits) => ValRaw::v128(*bits),
        Val::FuncRef(None) => ValRaw::funcref(std::ptr::null_mut()),
        Val::FuncRef(Some(func)) => ValRaw::funcref(func.resolve_funcref(opaque)),
        Val::ExternRef(None) => ValRaw::externref(std::ptr::null()),
        Val::ExternRef(Some(r)) => ValRaw::externref(r.clone().into_raw()),
    }
}

/// Decodes a value from an array-call slot, taking ownership of any
/// externref count the writer transferred.
pub(crate) unsafe fn val_from_raw(opaque: &mut StoreOpaque, raw: ValRaw, ty: ValType) -> Val {
    match ty {
        ValType::I32 => Val::I32(raw.get_i32()),
        ValType::I64 => Val::I64(raw.get_i64()),
        ValType::F32 => Val::F32(raw.get_f32()),
        ValType::F64 => Val::F64(raw.get_f64()),
        ValType::V128 => Val::V128(raw.get_v128()),
        ValType::FuncRef => Val::FuncRef(Func::from_vm_funcref(opaque, raw.get_funcref())),
        ValType::ExternRef => {
            let ptr = raw.get_externref();
            if ptr.is_null() {
                Val::ExternRef(None)
            } else {
                Val::ExternRef(Some(ExternRef::from_raw(ptr)))
            }
        }
    }
}

/// The array-call entry point of every host function.
unsafe extern "C" fn host_array_call(vmctx: *mut VMOpaqueContext, values: *mut ValRaw) -> u32 {
    let ctx = vmctx as *const VMHostFuncContext;
    debug_assert_eq!((*ctx).magic, VM_HOST_CONTEXT_MAGIC);
    let state = &*(*ctx).state;

    let result = store::with_active(|opaque| {
        let mut params = Vec::with_capacity(state.ty.params().len());
        for (i, ty) in state.ty.params().iter().enumerate() {
            params.push(unsafe { val_from_raw(opaque, *values.add(i), *ty) });
        }
        let mut results = vec![Val::I32(0); state.ty.results().len()];
        (state.closure)(opaque as *mut StoreOpaque, &params, &mut results).and_then(|()| {
            for (i, (value, ty)) in results.iter().zip(state.ty.results()).enumerate() {
                if value.ty() != *ty {
                    bail!("host function returned a {}, expected {ty}", value.ty());
                }
                unsafe { *values.add(i) = val_into_raw(opaque, value) };
            }
            Ok(())
        })
    });

    match result {
        Ok(()) => ARRAY_CALL_OK,
        Err(error) => {
            record_trap(TrapReason::User(error));
            ARRAY_CALL_TRAP
        }
    }
}
