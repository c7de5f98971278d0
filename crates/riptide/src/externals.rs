//! Host handles to globals, tables and memories, and the [`Extern`]
//! sum over everything importable.

use crate::func::Func;
use crate::store::{Store, StoreOpaque};
use crate::values::Val;
use crate::{FuncType, GlobalType, MemoryType, TableType};
use anyhow::{anyhow, bail, Result};
use riptide_environ::ValType;
use riptide_runtime::{TableElement, VMFuncRef, VMGlobalDefinition};
use std::sync::{Arc, Mutex};

/// Anything a module can import or export.
#[derive(Copy, Clone, Debug)]
pub enum Extern {
    /// A function.
    Func(Func),
    /// A global variable.
    Global(Global),
    /// A table.
    Table(Table),
    /// A linear memory.
    Memory(Memory),
}

impl Extern {
    /// The type of the underlying entity.
    pub fn ty<T>(&self, store: &Store<T>) -> ExternType {
        match self {
            Extern::Func(f) => ExternType::Func(f.ty(store)),
            Extern::Global(g) => ExternType::Global(g.ty(store)),
            Extern::Table(t) => ExternType::Table(t.ty(store)),
            Extern::Memory(m) => ExternType::Memory(m.ty(store)),
        }
    }

    pub(crate) fn kind(&self) -> &'static str {
        match self {
            Extern::Func(_) => "function",
            Extern::Global(_) => "global",
            Extern::Table(_) => "table",
            Extern::Memory(_) => "memory",
        }
    }
}

impl From<Func> for Extern {
    fn from(f: Func) -> Extern {
        Extern::Func(f)
    }
}

impl From<Global> for Extern {
    fn from(g: Global) -> Extern {
        Extern::Global(g)
    }
}

impl From<Table> for Extern {
    fn from(t: Table) -> Extern {
        Extern::Table(t)
    }
}

impl From<Memory> for Extern {
    fn from(m: Memory) -> Extern {
        Extern::Memory(m)
    }
}

/// The type of an [`Extern`].
#[derive(Clone, Debug)]
pub enum ExternType {
    /// A function signature.
    Func(FuncType),
    /// A global description.
    Global(GlobalType),
    /// A table description.
    Table(TableType),
    /// A memory description.
    Memory(MemoryType),
}

pub(crate) struct MemoryData {
    pub mem: Arc<Mutex<riptide_runtime::Memory>>,
    pub ty: MemoryType,
}

pub(crate) struct TableData {
    pub table: Arc<Mutex<riptide_runtime::Table>>,
    pub ty: TableType,
}

pub(crate) struct GlobalData {
    /// Host-created definitions are owned here; exported globals point
    /// into their instance's allocation instead.
    #[allow(dead_code)]
    pub owned: Option<Box<VMGlobalDefinition>>,
    pub def: *mut VMGlobalDefinition,
    pub ty: GlobalType,
}

/// A linear memory, either created by the host or exported by an
/// instance.
#[derive(Copy, Clone, Debug)]
pub struct Memory {
    store_id: u64,
    index: usize,
}

impl Memory {
    /// Creates a host-owned memory that instances can import.
    pub fn new<T>(store: &mut Store<T>, ty: MemoryType) -> Result<Memory> {
        let limit = store.engine().config().max_memory_pages;
        let mem = riptide_runtime::Memory::new(&ty, limit)?;
        let opaque = store.opaque_mut();
        opaque.memories.push(MemoryData {
            mem: Arc::new(Mutex::new(mem)),
            ty,
        });
        Ok(Memory {
            store_id: opaque.id(),
            index: opaque.memories.len() - 1,
        })
    }

    pub(crate) fn from_data(opaque: &mut StoreOpaque, data: MemoryData) -> Memory {
        opaque.memories.push(data);
        Memory {
            store_id: opaque.id(),
            index: opaque.memories.len() - 1,
        }
    }

    /// The memory's type.
    pub fn ty<T>(&self, store: &Store<T>) -> MemoryType {
        self.data_impl(store.opaque()).ty
    }

    /// The current size in wasm pages.
    pub fn size<T>(&self, store: &Store<T>) -> u64 {
        let data = self.data_impl(store.opaque());
        data.mem.lock().unwrap_or_else(|e| e.into_inner()).size()
    }

    /// The current size in bytes.
    pub fn data_size<T>(&self, store: &Store<T>) -> usize {
        let data = self.data_impl(store.opaque());
        data.mem
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .byte_size()
    }

    /// Grows the memory by `delta` pages, returning the previous size.
    pub fn grow<T>(&self, store: &mut Store<T>, delta: u64) -> Result<u64> {
        let data = self.data_impl(store.opaque());
        let mut mem = data.mem.lock().unwrap_or_else(|e| e.into_inner());
        match mem.grow(delta)? {
            Some(prev) => Ok(prev),
            None => bail!("failed to grow memory by {delta} pages"),
        }
    }

    /// Reads from the memory at `offset` into `buffer`.
    pub fn read<T>(&self, store: &Store<T>, offset: usize, buffer: &mut [u8]) -> Result<()> {
        let data = self.data_impl(store.opaque());
        let mem = data.mem.lock().unwrap_or_else(|e| e.into_inner());
        let end = offset
            .checked_add(buffer.len())
            .ok_or_else(|| anyhow!("out of bounds memory access"))?;
        if end > mem.byte_size() {
            bail!("out of bounds memory access");
        }
        unsafe {
            std::ptr::copy_nonoverlapping(mem.base().add(offset), buffer.as_mut_ptr(), buffer.len());
        }
        Ok(())
    }

    /// Writes `buffer` into the memory at `offset`.
    pub fn write<T>(&self, store: &mut Store<T>, offset: usize, buffer: &[u8]) -> Result<()> {
        let data = self.data_impl(store.opaque());
        let mem = data.mem.lock().unwrap_or_else(|e| e.into_inner());
        let end = offset
            .checked_add(buffer.len())
            .ok_or_else(|| anyhow!("out of bounds memory access"))?;
        if end > mem.byte_size() {
            bail!("out of bounds memory access");
        }
        unsafe {
            std::ptr::copy_nonoverlapping(buffer.as_ptr(), mem.base().add(offset), buffer.len());
        }
        Ok(())
    }

    /// The whole memory as a byte slice.
    pub fn data<'a, T>(&self, store: &'a Store<T>) -> &'a [u8] {
        let data = self.data_impl(store.opaque());
        let mem = data.mem.lock().unwrap_or_else(|e| e.into_inner());
        // The base address is stable across growth (the storage is a
        // fixed reservation), so the slice stays valid for the store
        // borrow even after the guard drops.
        unsafe { std::slice::from_raw_parts(mem.base(), mem.byte_size()) }
    }

    /// The whole memory as a mutable byte slice.
    pub fn data_mut<'a, T>(&self, store: &'a mut Store<T>) -> &'a mut [u8] {
        let data = self.data_impl(store.opaque());
        let mem = data.mem.lock().unwrap_or_else(|e| e.into_inner());
        unsafe { std::slice::from_raw_parts_mut(mem.base(), mem.byte_size()) }
    }

    fn data_impl<'a>(&self, opaque: &'a StoreOpaque) -> &'a MemoryData {
        opaque.check_id(self.store_id);
        &opaque.memories[self.index]
    }

    pub(crate) fn runtime<'a>(&self, opaque: &'a StoreOpaque) -> &'a MemoryData {
        self.data_impl(opaque)
    }
}

/// A table, either created by the host or exported by an instance.
#[derive(Copy, Clone, Debug)]
pub struct Table {
    store_id: u64,
    index: usize,
}

impl Table {
    /// Creates a host-owned table filled with `init`.
    pub fn new<T>(store: &mut Store<T>, ty: TableType, init: Val) -> Result<Table> {
        let opaque = store.opaque_mut();
        let element = value_to_element(opaque, &init, ty.element)?;
        let mut table = riptide_runtime::Table::new(&ty);
        if ty.minimum > 0 {
            table
                .fill(0, element, ty.minimum)
                .map_err(|_| anyhow!("failed to initialize table"))?;
        }
        opaque.tables.push(TableData {
            table: Arc::new(Mutex::new(table)),
            ty,
        });
        Ok(Table {
            store_id: opaque.id(),
            index: opaque.tables.len() - 1,
        })
    }

    pub(crate) fn from_data(opaque: &mut StoreOpaque, data: TableData) -> Table {
        opaque.tables.push(data);
        Table {
            store_id: opaque.id(),
            index: opaque.tables.len() - 1,
        }
    }

    /// The table's type.
    pub fn ty<T>(&self, store: &Store<T>) -> TableType {
        let opaque = store.opaque();
        opaque.check_id(self.store_id);
        opaque.tables[self.index].ty
    }

    /// The current number of elements.
    pub fn size<T>(&self, store: &Store<T>) -> u32 {
        let opaque = store.opaque();
        opaque.check_id(self.store_id);
        let table = opaque.tables[self.index].table.clone();
        let size = table.lock().unwrap_or_else(|e| e.into_inner()).size();
        size
    }

    /// The element at `index`, or `None` if out of bounds.
    pub fn get<T>(&self, store: &mut Store<T>, index: u32) -> Option<Val> {
        let opaque = store.opaque_mut();
        opaque.check_id(self.store_id);
        let table = opaque.tables[self.index].table.clone();
        let element = table.lock().unwrap_or_else(|e| e.into_inner()).get(index)?;
        Some(element_to_value(opaque, element))
    }

    /// Writes `value` at `index`.
    pub fn set<T>(&self, store: &mut Store<T>, index: u32, value: Val) -> Result<()> {
        let opaque = store.opaque_mut();
        opaque.check_id(self.store_id);
        let ty = opaque.tables[self.index].ty;
        let element = value_to_element(opaque, &value, ty.element)?;
        let table = opaque.tables[self.index].table.clone();
        let result = table
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .set(index, element)
            .map_err(|_| anyhow!("table element index out of bounds"));
        result
    }

    pub(crate) fn ty_impl(&self, opaque: &StoreOpaque) -> TableType {
        opaque.check_id(self.store_id);
        opaque.tables[self.index].ty
    }

    pub(crate) fn size_impl(&self, opaque: &StoreOpaque) -> u32 {
        opaque.check_id(self.store_id);
        let table = opaque.tables[self.index].table.clone();
        let size = table.lock().unwrap_or_else(|e| e.into_inner()).size();
        size
    }

    pub(crate) fn runtime(&self, opaque: &StoreOpaque) -> Arc<Mutex<riptide_runtime::Table>> {
        opaque.check_id(self.store_id);
        opaque.tables[self.index].table.clone()
    }

    /// Grows the table by `delta` elements filled with `init`, returning
    /// the previous size.
    pub fn grow<T>(&self, store: &mut Store<T>, delta: u32, init: Val) -> Result<u32> {
        let opaque = store.opaque_mut();
        opaque.check_id(self.store_id);
        let ty = opaque.tables[self.index].ty;
        let element = value_to_element(opaque, &init, ty.element)?;
        let table = opaque.tables[self.index].table.clone();
        let prev = table
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .grow(delta, element);
        prev.ok_or_else(|| anyhow!("failed to grow table by {delta}"))
    }
}

/// A global variable, either created by the host or exported by an
/// instance.
#[derive(Copy, Clone, Debug)]
pub struct Global {
    store_id: u64,
    index: usize,
}

impl Global {
    /// Creates a host-owned global initialized to `init`.
    pub fn new<T>(store: &mut Store<T>, ty: GlobalType, init: Val) -> Result<Global> {
        if init.ty() != ty.ty {
            bail!("global initializer type mismatch: expected {}, got {}", ty.ty, init.ty());
        }
        let opaque = store.opaque_mut();
        let mut owned = Box::new(VMGlobalDefinition::new());
        if ty.ty == ValType::ExternRef {
            // Externref globals store a slot index; the value itself
            // lives in the store so its count is managed in one place.
            let value = match &init {
                Val::ExternRef(r) => r.clone(),
                _ => unreachable!("checked above"),
            };
            let slot = opaque.alloc_extern_global(value);
            owned.set_u128(slot as u128);
        } else {
            write_global(opaque, &mut owned, &init);
        }
        let def = &mut *owned as *mut VMGlobalDefinition;
        opaque.globals.push(GlobalData {
            owned: Some(owned),
            def,
            ty,
        });
        Ok(Global {
            store_id: opaque.id(),
            index: opaque.globals.len() - 1,
        })
    }

    pub(crate) fn from_data(opaque: &mut StoreOpaque, data: GlobalData) -> Global {
        opaque.globals.push(data);
        Global {
            store_id: opaque.id(),
            index: opaque.globals.len() - 1,
        }
    }

    /// The global's type.
    pub fn ty<T>(&self, store: &Store<T>) -> GlobalType {
        let opaque = store.opaque();
        opaque.check_id(self.store_id);
        opaque.globals[self.index].ty
    }

    /// The current value.
    pub fn get<T>(&self, store: &mut Store<T>) -> Val {
        let opaque = store.opaque_mut();
        opaque.check_id(self.store_id);
        let ty = opaque.globals[self.index].ty;
        let def = unsafe { &*opaque.globals[self.index].def };
        match ty.ty {
            ValType::I32 => Val::I32(def.get_i32()),
            ValType::I64 => Val::I64(def.get_i64()),
            ValType::F32 => Val::F32(def.get_f32_bits()),
            ValType::F64 => Val::F64(def.get_f64_bits()),
            ValType::V128 => Val::V128(def.get_u128()),
            ValType::FuncRef => {
                let ptr = def.get_u128() as u64 as usize as *mut VMFuncRef;
                Val::FuncRef(unsafe { Func::from_vm_funcref(opaque, ptr) })
            }
            ValType::ExternRef => {
                let slot = def.get_u128() as u64 as usize;
                Val::ExternRef(opaque.extern_global(slot))
            }
        }
    }

    /// Replaces the value of a mutable global.
    pub fn set<T>(&self, store: &mut Store<T>, value: Val) -> Result<()> {
        let opaque = store.opaque_mut();
        opaque.check_id(self.store_id);
        let ty = opaque.globals[self.index].ty;
        if !ty.mutability {
            bail!("immutable global cannot be set");
        }
        if value.ty() != ty.ty {
            bail!("global value type mismatch: expected {}, got {}", ty.ty, value.ty());
        }
        if ty.ty == ValType::ExternRef {
            let slot = unsafe { (*opaque.globals[self.index].def).get_u128() } as u64 as usize;
            let value = match value {
                Val::ExternRef(r) => r,
                _ => unreachable!("checked above"),
            };
            opaque.set_extern_global(slot, value);
        } else {
            let ptr = opaque.globals[self.index].def;
            let def = unsafe { &mut *ptr };
            write_global(opaque, def, &value);
        }
        Ok(())
    }

    pub(crate) fn ty_impl(&self, opaque: &StoreOpaque) -> GlobalType {
        opaque.check_id(self.store_id);
        opaque.globals[self.index].ty
    }

    pub(crate) fn definition(&self, opaque: &StoreOpaque) -> *mut VMGlobalDefinition {
        opaque.check_id(self.store_id);
        opaque.globals[self.index].def
    }
}

fn write_global(opaque: &mut StoreOpaque, def: &mut VMGlobalDefinition, value: &Val) {
    match value {
        Val::I32(v) => def.set_i32(*v),
        Val::I64(v) => def.set_i64(*v),
        Val::F32(bits) => def.set_f32_bits(*bits),
        Val::F64(bits) => def.set_f64_bits(*bits),
        Val::V128(bits) => def.set_u128(*bits),
        Val::FuncRef(f) => {
            let ptr = match f {
                Some(f) => f.resolve_funcref(opaque),
                None => std::ptr::null_mut(),
            };
            def.set_u128(ptr as usize as u128);
        }
        Val::ExternRef(_) => unreachable!("externref globals go through the slot table"),
    }
}

pub(crate) fn value_to_element(
    opaque: &mut StoreOpaque,
    value: &Val,
    element: ValType,
) -> Result<TableElement> {
    match (value, element) {
        (Val::FuncRef(None), ValType::FuncRef) => Ok(TableElement::FuncRef(std::ptr::null_mut())),
        (Val::FuncRef(Some(f)), ValType::FuncRef) => {
            Ok(TableElement::FuncRef(f.resolve_funcref(opaque)))
        }
        (Val::ExternRef(r), ValType::ExternRef) => Ok(TableElement::ExternRef(r.clone())),
        _ => bail!("value type mismatch: expected {element}, got {}", value.ty()),
    }
}

pub(crate) fn element_to_value(opaque: &mut StoreOpaque, element: TableElement) -> Val {
    match element {
        TableElement::FuncRef(ptr) => Val::FuncRef(unsafe { Func::from_vm_funcref(opaque, ptr) }),
        TableElement::ExternRef(r) => Val::ExternRef(r),
    }
}
