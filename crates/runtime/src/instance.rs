//! Instance allocation and the state behind every `VMContext`.

use crate::memory::Memory;
use crate::table::Table;
use crate::vmcontext::{
    VMArrayCallFunction, VMBuiltinFunctionsArray, VMContext, VMFuncRef, VMGlobalDefinition,
    VMMemoryDefinition, VMOpaqueContext,
};
use anyhow::Result;
use cranelift_entity::{EntityRef, PrimaryMap};
use riptide_environ::vmoffsets::VMCONTEXT_MAGIC;
use riptide_environ::{
    DefinedFuncIndex, DefinedGlobalIndex, FuncIndex, GlobalIndex, Module, TableIndex, Trap,
};
use std::sync::atomic::AtomicU8;
use std::sync::{Arc, Mutex};

/// The resolved imports an instance is created with, in declaration
/// order per index space.
#[derive(Default)]
pub struct Imports {
    /// One funcref per imported function, copied into the instance's
    /// function array.
    pub functions: Vec<VMFuncRef>,
    /// Imported tables, shared with their exporters.
    pub tables: Vec<Arc<Mutex<Table>>>,
    /// The imported memory, if the module imports one.
    pub memory: Option<Arc<Mutex<Memory>>>,
    /// Pointers to the definitions of imported globals. The pointees are
    /// owned by other instances or by the store, which outlive this
    /// instance.
    pub globals: Vec<*mut VMGlobalDefinition>,
}

/// Everything needed to allocate an instance.
pub struct InstanceAllocationRequest<'a> {
    /// The module to instantiate.
    pub module: &'a Arc<Module>,
    /// Resolved imports.
    pub imports: Imports,
    /// The entry point of each defined function, compiled or interpreted.
    pub array_calls: PrimaryMap<DefinedFuncIndex, VMArrayCallFunction>,
    /// The engine-wide signature id of each type in the module's type
    /// section.
    pub shared_type_ids: Vec<u32>,
    /// The store's interrupt flag; kept alive by the instance.
    pub interrupt: Arc<AtomicU8>,
    /// Embedder-configured cap, in pages, for any defined memory.
    pub max_memory_pages: u64,
}

/// An instantiated module.
///
/// The embedded `VMContext` is what compiled code receives; it points
/// back at this structure and at the boxed arrays owned here, so an
/// `Instance` must never move once created. [`InstanceHandle`] enforces
/// that by keeping it boxed.
pub struct Instance {
    module: Arc<Module>,
    memory: Option<Arc<Mutex<Memory>>>,
    tables: PrimaryMap<TableIndex, Arc<Mutex<Table>>>,
    /// Defined globals; imported ones are reached through
    /// `imported_globals`.
    globals: Box<[VMGlobalDefinition]>,
    imported_globals: Box<[*mut VMGlobalDefinition]>,
    /// One funcref per function index, imported functions included.
    funcrefs: Box<[VMFuncRef]>,
    dropped_data: Vec<bool>,
    dropped_elements: Vec<bool>,
    interrupt: Arc<AtomicU8>,
    vmctx: VMContext,
}

impl Instance {
    /// Recovers the instance from a context pointer handed to compiled
    /// code.
    ///
    /// # Safety
    /// `vmctx` must be the context of a live instance, and the caller
    /// must not hold any other reference to it.
    pub unsafe fn from_vmctx<'a>(vmctx: *mut VMContext) -> &'a mut Instance {
        debug_assert_eq!((*vmctx).magic, VMCONTEXT_MAGIC);
        &mut *((*vmctx).instance as *mut Instance)
    }

    /// The instantiated module.
    pub fn module(&self) -> &Arc<Module> {
        &self.module
    }

    /// The context pointer to pass to compiled code.
    pub fn vmctx_ptr(&mut self) -> *mut VMContext {
        &mut self.vmctx
    }

    /// Sets the stack limit compiled prologues check against.
    pub fn set_stack_limit(&mut self, limit: u64) {
        self.vmctx.stack_limit = limit;
    }

    /// The store's interrupt flag.
    pub fn interrupt(&self) -> &Arc<AtomicU8> {
        &self.interrupt
    }

    /// The instance's linear memory, if it has one.
    pub fn memory(&self) -> Option<&Arc<Mutex<Memory>>> {
        self.memory.as_ref()
    }

    /// The published definition of memory 0, if any.
    pub fn memory_definition(&self) -> Option<*const VMMemoryDefinition> {
        (!self.vmctx.memory.is_null()).then_some(self.vmctx.memory)
    }

    /// The table at `index`.
    pub fn table(&self, index: TableIndex) -> &Arc<Mutex<Table>> {
        &self.tables[index]
    }

    /// The funcref of the function at `index`. The pointee lives as long
    /// as the instance.
    pub fn funcref(&mut self, index: FuncIndex) -> *mut VMFuncRef {
        &mut self.funcrefs[index.index()]
    }

    /// The definition of the global at `index`, resolving imports.
    pub fn global_ptr(&mut self, index: GlobalIndex) -> *mut VMGlobalDefinition {
        match self.module.defined_global_index(index) {
            Some(defined) => &mut self.globals[defined.index()],
            None => self.imported_globals[index.index()],
        }
    }

    /// The defined global at `index`, for applying initializers.
    pub fn defined_global_mut(&mut self, index: DefinedGlobalIndex) -> &mut VMGlobalDefinition {
        &mut self.globals[index.index()]
    }

    /// Grows memory 0 by `delta` pages, returning the previous size in
    /// pages or `None` on failure.
    pub fn memory_grow(&mut self, delta: u64) -> Result<Option<u64>> {
        let memory = match &self.memory {
            Some(memory) => memory,
            None => return Ok(None),
        };
        let mut memory = memory.lock().unwrap_or_else(|e| e.into_inner());
        memory.grow(delta)
    }

    /// Reads a funcref table element for `call_indirect`.
    pub fn table_get_funcref(&self, table: TableIndex, index: u32) -> Result<*mut VMFuncRef, Trap> {
        let table = self.tables[table].lock().unwrap_or_else(|e| e.into_inner());
        table.get_funcref(index).ok_or(Trap::TableOutOfBounds)
    }

    /// Marks a passive data segment as dropped.
    pub fn data_drop(&mut self, index: usize) {
        if let Some(flag) = self.dropped_data.get_mut(index) {
            *flag = true;
        }
    }

    /// The bytes of a passive data segment, or the empty slice once
    /// dropped.
    pub fn passive_data(&self, index: usize) -> &[u8] {
        if self.dropped_data.get(index).copied().unwrap_or(true) {
            return &[];
        }
        &self.module.data[index].data
    }

    /// Marks a passive element segment as dropped.
    pub fn elem_drop(&mut self, index: usize) {
        if let Some(flag) = self.dropped_elements.get_mut(index) {
            *flag = true;
        }
    }

    /// Whether a passive element segment is still live.
    pub fn elem_is_live(&self, index: usize) -> bool {
        !self.dropped_elements.get(index).copied().unwrap_or(true)
    }
}

/// Owner of an [`Instance`], keeping it at a stable address.
pub struct InstanceHandle {
    instance: Box<Instance>,
}

// The raw pointers inside all point at allocations the store keeps alive
// for as long as the handle; access is single-threaded per store apart
// from shared memories, which lock internally.
unsafe impl Send for InstanceHandle {}
unsafe impl Sync for InstanceHandle {}

impl InstanceHandle {
    /// Allocates an instance.
    ///
    /// Tables and memories are created (or taken from the imports) here;
    /// globals start zeroed and segments are not applied. The embedder
    /// evaluates initializers and applies segments afterwards, before the
    /// instance is visible to anything else.
    pub fn new(req: InstanceAllocationRequest<'_>) -> Result<InstanceHandle> {
        let module = req.module;
        debug_assert_eq!(req.imports.functions.len(), module.num_imported_funcs);
        debug_assert_eq!(req.imports.tables.len(), module.num_imported_tables);
        debug_assert_eq!(req.imports.globals.len(), module.num_imported_globals);
        debug_assert_eq!(req.array_calls.len() + module.num_imported_funcs, module.functions.len());

        let mut tables = PrimaryMap::with_capacity(module.tables.len());
        for imported in &req.imports.tables {
            tables.push(imported.clone());
        }
        for (index, plan) in module.tables.iter().skip(module.num_imported_tables) {
            debug_assert!(module.defined_table_index(index).is_some());
            tables.push(Arc::new(Mutex::new(Table::new(plan))));
        }

        let memory = match req.imports.memory {
            Some(memory) => Some(memory),
            None => match module.memories.values().next() {
                Some(plan) if module.num_imported_memories == 0 => {
                    Some(Arc::new(Mutex::new(Memory::new(plan, req.max_memory_pages)?)))
                }
                _ => None,
            },
        };

        let num_defined_globals = module.globals.len() - module.num_imported_globals;
        let globals = vec![VMGlobalDefinition::new(); num_defined_globals].into_boxed_slice();
        let imported_globals = req.imports.globals.into_boxed_slice();

        // Funcrefs for defined functions need the vmctx address, which
        // only exists once the instance is boxed; fill them with a
        // null context first and patch below.
        let mut funcrefs = Vec::with_capacity(module.functions.len());
        funcrefs.extend(req.imports.functions.iter().copied());
        for (defined, &array_call) in req.array_calls.iter() {
            let func = module.func_index(defined);
            let type_id = req.shared_type_ids[module.functions[func].index()];
            funcrefs.push(VMFuncRef::new(array_call, std::ptr::null_mut(), type_id));
        }
        let funcrefs = funcrefs.into_boxed_slice();

        let dropped_data = module
            .data
            .iter()
            .map(|segment| segment.active.is_some())
            .collect();
        let dropped_elements = module
            .elements
            .iter()
            .map(|segment| !matches!(segment.kind, riptide_environ::ElemKind::Passive))
            .collect();

        let mut instance = Box::new(Instance {
            module: module.clone(),
            memory,
            tables,
            globals,
            imported_globals,
            funcrefs,
            dropped_data,
            dropped_elements,
            interrupt: req.interrupt,
            vmctx: VMContext {
                magic: VMCONTEXT_MAGIC,
                instance: std::ptr::null_mut(),
                memory: std::ptr::null(),
                _reserved0: 0,
                stack_limit: 0,
                interrupt: std::ptr::null(),
                builtins: &VMBuiltinFunctionsArray::INIT,
                globals: std::ptr::null_mut(),
                imported_globals: std::ptr::null_mut(),
                _reserved1: 0,
                funcrefs: std::ptr::null(),
            },
        });

        // The box gives the instance its final address; wire up every
        // self-referential pointer.
        let instance_ptr: *mut Instance = &mut *instance;
        let vmctx = VMOpaqueContext::from_vmctx(&mut instance.vmctx);
        instance.vmctx.instance = instance_ptr.cast();
        instance.vmctx.memory = match &instance.memory {
            Some(memory) => {
                let memory = memory.lock().unwrap_or_else(|e| e.into_inner());
                memory.definition().as_ptr()
            }
            None => std::ptr::null(),
        };
        instance.vmctx.interrupt = &*instance.interrupt;
        instance.vmctx.globals = instance.globals.as_mut_ptr();
        instance.vmctx.imported_globals = instance.imported_globals.as_mut_ptr();
        instance.vmctx.funcrefs = instance.funcrefs.as_ptr();
        for funcref in instance.funcrefs[module.num_imported_funcs..].iter_mut() {
            funcref.vmctx = vmctx;
        }

        Ok(InstanceHandle { instance })
    }

    /// The instance.
    pub fn instance(&self) -> &Instance {
        &self.instance
    }

    /// The instance, mutably.
    pub fn instance_mut(&mut self) -> &mut Instance {
        &mut self.instance
    }
}

impl std::fmt::Debug for Instance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Instance")
            .field("module", &self.module.name)
            .field("tables", &self.tables.len())
            .field("has_memory", &self.memory.is_some())
            .finish_non_exhaustive()
    }
}
