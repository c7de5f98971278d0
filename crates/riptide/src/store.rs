//! Stores: the unit of ownership for all runtime objects.

use crate::engine::Engine;
use crate::externals::{GlobalData, MemoryData, TableData};
use crate::func::FuncData;
use crate::instance::InstanceData;
use anyhow::{bail, Result};
use riptide_runtime::ExternRef;
use std::cell::Cell;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;

/// A collection of instantiated modules and the host objects (functions,
/// memories, tables, globals) they connect to, together with arbitrary
/// host data `T`.
///
/// All handle types ([`Func`](crate::Func), [`Memory`](crate::Memory),
/// and friends) are indices into their store; using a handle with a
/// different store panics. A store is never unwound out from under
/// running wasm: guest calls take `&mut Store` for their whole duration.
pub struct Store<T> {
    inner: Box<StoreInner<T>>,
}

// The opaque part must come first so a `*mut StoreOpaque` stashed in
// thread-local storage can be cast back to the `StoreInner<T>` it sits
// inside once the concrete `T` is known again.
#[repr(C)]
pub(crate) struct StoreInner<T> {
    pub(crate) opaque: StoreOpaque,
    pub(crate) data: T,
}

/// The type-erased part of a store, shared by every `T`.
pub(crate) struct StoreOpaque {
    id: u64,
    engine: Engine,
    interrupt: Arc<AtomicU8>,
    /// How many guest calls on this store are on the stack right now.
    pub(crate) call_depth: usize,
    pub(crate) instances: Vec<InstanceData>,
    pub(crate) funcs: Vec<FuncData>,
    pub(crate) memories: Vec<MemoryData>,
    pub(crate) tables: Vec<TableData>,
    pub(crate) globals: Vec<GlobalData>,
    /// Values of externref-typed globals. Global definitions hold an
    /// index into this table rather than a raw reference count.
    pub(crate) extern_globals: Vec<Option<ExternRef>>,
}

static NEXT_STORE_ID: AtomicU64 = AtomicU64::new(0);

impl<T> Store<T> {
    /// Creates a store within `engine` owning `data`.
    pub fn new(engine: &Engine, data: T) -> Store<T> {
        let interrupt = Arc::new(AtomicU8::new(0));
        engine.register_interrupt(&interrupt);
        Store {
            inner: Box::new(StoreInner {
                opaque: StoreOpaque {
                    id: NEXT_STORE_ID.fetch_add(1, Ordering::Relaxed),
                    engine: engine.clone(),
                    interrupt,
                    call_depth: 0,
                    instances: Vec::new(),
                    funcs: Vec::new(),
                    memories: Vec::new(),
                    tables: Vec::new(),
                    globals: Vec::new(),
                    extern_globals: Vec::new(),
                },
                data,
            }),
        }
    }

    /// The engine this store was created within.
    pub fn engine(&self) -> &Engine {
        &self.inner.opaque.engine
    }

    /// Shared access to the host data.
    pub fn data(&self) -> &T {
        &self.inner.data
    }

    /// Exclusive access to the host data.
    pub fn data_mut(&mut self) -> &mut T {
        &mut self.inner.data
    }

    /// Consumes the store, returning its host data. Every instance,
    /// memory and table owned by the store is dropped.
    pub fn into_data(self) -> T {
        self.inner.data
    }

    /// A handle that interrupts execution in this store from another
    /// thread. The interrupted call returns an `interrupt` trap at its
    /// next function entry or loop back edge.
    ///
    /// Fails unless [`Config::interruptable`](crate::Config::interruptable)
    /// was set on the engine's configuration.
    pub fn interrupt_handle(&self) -> Result<InterruptHandle> {
        if !self.engine().config().interruptable {
            bail!("interrupts are not enabled in this engine's configuration");
        }
        Ok(InterruptHandle {
            flag: self.inner.opaque.interrupt.clone(),
        })
    }

    pub(crate) fn opaque(&self) -> &StoreOpaque {
        &self.inner.opaque
    }

    pub(crate) fn opaque_mut(&mut self) -> &mut StoreOpaque {
        &mut self.inner.opaque
    }

    pub(crate) fn inner_mut(&mut self) -> &mut StoreInner<T> {
        &mut self.inner
    }
}

impl<T: Default> Default for Store<T> {
    fn default() -> Store<T> {
        Store::new(&Engine::default(), T::default())
    }
}

impl<T> std::fmt::Debug for Store<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store")
            .field("id", &self.inner.opaque.id)
            .finish_non_exhaustive()
    }
}

// Raw pointers inside (funcrefs, global definitions) all point into
// store-owned allocations, so the store moves between threads as a unit.
unsafe impl<T: Send> Send for Store<T> {}
unsafe impl<T: Sync> Sync for Store<T> {}

impl StoreOpaque {
    pub(crate) fn id(&self) -> u64 {
        self.id
    }

    pub(crate) fn engine(&self) -> &Engine {
        &self.engine
    }

    pub(crate) fn interrupt(&self) -> &Arc<AtomicU8> {
        &self.interrupt
    }

    /// Panics unless `id` is this store's id. Handle methods call this
    /// before indexing so a foreign handle fails loudly instead of
    /// aliasing an unrelated object.
    pub(crate) fn check_id(&self, id: u64) {
        assert_eq!(id, self.id, "object used with the wrong store");
    }

    pub(crate) fn alloc_extern_global(&mut self, value: Option<ExternRef>) -> usize {
        self.extern_globals.push(value);
        self.extern_globals.len() - 1
    }

    pub(crate) fn extern_global(&self, slot: usize) -> Option<ExternRef> {
        self.extern_globals[slot].clone()
    }

    pub(crate) fn set_extern_global(&mut self, slot: usize, value: Option<ExternRef>) {
        self.extern_globals[slot] = value;
    }
}

thread_local! {
    /// The store currently running a guest call on this thread. Host
    /// trampolines and interpreted externref accesses reach back through
    /// this pointer; `Func::call` keeps it accurate across reentry.
    static ACTIVE: Cell<*mut StoreOpaque> = Cell::new(std::ptr::null_mut());
}

/// Runs `f` on the active store.
///
/// # Safety
///
/// Must only be called from within a guest call, while the `&mut Store`
/// that entered the guest is held live on the stack above us.
pub(crate) unsafe fn with_active<R>(f: impl FnOnce(&mut StoreOpaque) -> R) -> R {
    let ptr = ACTIVE.with(|cell| cell.get());
    debug_assert!(!ptr.is_null(), "no guest call in progress");
    f(&mut *ptr)
}

/// Marks `store` active for the duration of the returned guard,
/// restoring the previous active store (if any) when dropped.
pub(crate) fn activate(store: *mut StoreOpaque) -> ActiveGuard {
    let prev = ACTIVE.with(|cell| cell.replace(store));
    ActiveGuard { prev }
}

pub(crate) struct ActiveGuard {
    prev: *mut StoreOpaque,
}

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        ACTIVE.with(|cell| cell.set(self.prev));
    }
}

/// Interrupts guest execution in a [`Store`] from any thread.
///
/// Delivered interrupts surface as a trap whose display is
/// "wasm trap: interrupt". The flag is cleared once the trap is
/// returned, so the store remains usable afterwards.
#[derive(Clone)]
pub struct InterruptHandle {
    flag: Arc<AtomicU8>,
}

impl InterruptHandle {
    /// Requests an interrupt. Takes effect at the next function entry or
    /// loop back edge of any guest call in the store.
    pub fn interrupt(&self) {
        self.flag.store(1, Ordering::SeqCst);
    }
}

impl std::fmt::Debug for InterruptHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InterruptHandle").finish_non_exhaustive()
    }
}
