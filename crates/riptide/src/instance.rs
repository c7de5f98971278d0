//! Instantiation: import matching, segment application and export
//! lookup.

use crate::engine::Engine;
use crate::externals::{Extern, GlobalData, MemoryData, TableData};
use crate::func::{self, Func, FuncData, FuncKind};
use crate::interp::{self, InterpFuncState, VMInterpContext, VM_INTERP_CONTEXT_MAGIC};
use crate::module::Module;
use crate::store::{Store, StoreOpaque};
use anyhow::{anyhow, bail, Error, Result};
use cranelift_entity::{EntityRef, PrimaryMap};
use riptide_environ::{ConstExpr, ElemKind, EntityIndex, EntityType, Trap, ValType};
use riptide_runtime::{
    Imports, InstanceAllocationRequest, InstanceHandle, TableElement, VMArrayCallFunction,
    VMFuncRef, VMOpaqueContext, ValRaw,
};

/// An instantiated module.
///
/// Like all handles this is a cheap index tied to its [`Store`].
#[derive(Copy, Clone, Debug)]
pub struct Instance {
    store_id: u64,
    index: usize,
}

pub(crate) struct InstanceData {
    pub handle: InstanceHandle,
    pub module: Module,
    /// Contexts of this instance's interpreted functions. Boxed so the
    /// funcrefs that point at them stay valid for the store's life.
    #[allow(dead_code)]
    pub interp_ctxs: Vec<Box<InterpCtx>>,
}

pub(crate) struct InterpCtx {
    pub raw: VMInterpContext,
    #[allow(dead_code)]
    pub state: Box<InterpFuncState>,
}

impl Instance {
    /// Instantiates `module` in `store` with the given imports, matched
    /// positionally against the module's declared imports.
    ///
    /// Runs active segment initialization and the start function, so
    /// this can fail with a trap as well as a link error.
    pub fn new<T>(store: &mut Store<T>, module: &Module, imports: &[Extern]) -> Result<Instance> {
        if !Engine::same(store.engine(), module.engine()) {
            bail!("cross-engine instantiation: module and store have different engines");
        }
        let opaque = store.opaque_mut();
        let env = module.env().clone();

        let imports = build_imports(opaque, module, imports)?;

        let mut array_calls: PrimaryMap<_, VMArrayCallFunction> =
            PrimaryMap::with_capacity(env.code.len());
        for defined in env.code.keys() {
            let native = module
                .compiled()
                .and_then(|compiled| compiled.array_call(defined));
            array_calls.push(native.unwrap_or(interp::array_call_entry));
        }

        let mut handle = InstanceHandle::new(InstanceAllocationRequest {
            module: &env,
            imports,
            array_calls,
            shared_type_ids: (**module.shared_type_ids()).clone(),
            interrupt: opaque.interrupt().clone(),
            max_memory_pages: opaque.engine().config().max_memory_pages,
        })?;

        // Interpreted functions get their contexts before anything can
        // observe a funcref: later instances copy imported funcrefs by
        // value.
        let mut interp_ctxs = Vec::new();
        for defined in env.code.keys() {
            let code = match module.interp_code(defined) {
                Some(code) => code.clone(),
                None => continue,
            };
            let func_index = env.func_index(defined);
            let state = Box::new(InterpFuncState {
                vmctx: handle.instance_mut().vmctx_ptr(),
                module: env.clone(),
                defined,
                func_index: func_index.as_u32(),
                ty: env.func_type(func_index).clone(),
                code,
                shared_type_ids: module.shared_type_ids().clone(),
                engine: opaque.engine().clone(),
            });
            let ctx = Box::new(InterpCtx {
                raw: VMInterpContext {
                    magic: VM_INTERP_CONTEXT_MAGIC,
                    state: &*state,
                },
                state,
            });
            let funcref = handle.instance_mut().funcref(func_index);
            unsafe {
                *funcref = VMFuncRef::new(
                    interp::array_call_entry,
                    &ctx.raw as *const VMInterpContext as *mut VMOpaqueContext,
                    (*funcref).type_id,
                );
            }
            interp_ctxs.push(ctx);
        }

        initialize_globals(opaque, &mut handle)?;
        apply_element_segments(&mut handle)?;
        apply_data_segments(&mut handle)?;

        let start = env.start_func;
        opaque.instances.push(InstanceData {
            handle,
            module: module.clone(),
            interp_ctxs,
        });
        let instance = Instance {
            store_id: opaque.id(),
            index: opaque.instances.len() - 1,
        };

        if let Some(start) = start {
            let funcref = opaque.instances[instance.index]
                .handle
                .instance_mut()
                .funcref(start);
            let mut buffer = [ValRaw::i32(0)];
            func::call_raw(opaque, Some(&*env), funcref, buffer.as_mut_ptr())?;
        }
        Ok(instance)
    }

    /// The module this instance was created from.
    pub fn module<T>(&self, store: &Store<T>) -> Module {
        let opaque = store.opaque();
        opaque.check_id(self.store_id);
        opaque.instances[self.index].module.clone()
    }

    /// Looks up an export by name.
    pub fn get_export<T>(&self, store: &mut Store<T>, name: &str) -> Option<Extern> {
        let opaque = store.opaque_mut();
        opaque.check_id(self.store_id);
        let module = opaque.instances[self.index].module.clone();
        let index = *module.env().exports.get(name)?;
        Some(export_of(opaque, self.index, &module, index))
    }

    /// Looks up an exported function by name.
    pub fn get_func<T>(&self, store: &mut Store<T>, name: &str) -> Option<Func> {
        match self.get_export(store, name)? {
            Extern::Func(f) => Some(f),
            _ => None,
        }
    }

    /// Looks up an exported memory by name.
    pub fn get_memory<T>(&self, store: &mut Store<T>, name: &str) -> Option<crate::Memory> {
        match self.get_export(store, name)? {
            Extern::Memory(m) => Some(m),
            _ => None,
        }
    }

    /// Looks up an exported table by name.
    pub fn get_table<T>(&self, store: &mut Store<T>, name: &str) -> Option<crate::Table> {
        match self.get_export(store, name)? {
            Extern::Table(t) => Some(t),
            _ => None,
        }
    }

    /// Looks up an exported global by name.
    pub fn get_global<T>(&self, store: &mut Store<T>, name: &str) -> Option<crate::Global> {
        match self.get_export(store, name)? {
            Extern::Global(g) => Some(g),
            _ => None,
        }
    }
}

fn export_of(
    opaque: &mut StoreOpaque,
    instance: usize,
    module: &Module,
    index: EntityIndex,
) -> Extern {
    let env = module.env();
    match index {
        EntityIndex::Function(f) => {
            let ty = env.func_type(f).clone();
            let type_id = module.shared_type_ids()[env.functions[f].index()];
            Extern::Func(Func::from_data(
                opaque,
                FuncData {
                    kind: FuncKind::Wasm { instance, index: f },
                    ty,
                    type_id,
                },
            ))
        }
        EntityIndex::Table(t) => {
            let ty = env.tables[t];
            let table = opaque.instances[instance].handle.instance().table(t).clone();
            Extern::Table(crate::Table::from_data(opaque, TableData { table, ty }))
        }
        EntityIndex::Memory(m) => {
            let ty = env.memories[m];
            let mem = opaque.instances[instance]
                .handle
                .instance()
                .memory()
                .unwrap_or_else(|| unreachable!("exported memory exists"))
                .clone();
            Extern::Memory(crate::Memory::from_data(opaque, MemoryData { mem, ty }))
        }
        EntityIndex::Global(g) => {
            let ty = env.globals[g];
            let def = opaque.instances[instance]
                .handle
                .instance_mut()
                .global_ptr(g);
            Extern::Global(crate::Global::from_data(
                opaque,
                GlobalData { owned: None, def, ty },
            ))
        }
    }
}

fn build_imports(
    opaque: &mut StoreOpaque,
    module: &Module,
    provided: &[Extern],
) -> Result<Imports> {
    let env = module.env();
    if provided.len() != env.imports.len() {
        bail!(
            "expected {} imports, got {}",
            env.imports.len(),
            provided.len()
        );
    }

    let mut imports = Imports {
        functions: Vec::new(),
        tables: Vec::new(),
        memory: None,
        globals: Vec::new(),
    };
    for (import, given) in env.imports.iter().zip(provided) {
        let mismatch = || {
            anyhow!(
                "incompatible import type for `{}::{}`",
                import.module,
                import.field
            )
        };
        match (&import.ty, given) {
            (EntityType::Function(type_index), Extern::Func(f)) => {
                let expected = module.shared_type_ids()[type_index.index()];
                if f.type_id(opaque) != expected {
                    return Err(mismatch().context(format!(
                        "expected a function of type {}",
                        module.func_type_at(*type_index),
                    )));
                }
                let funcref = f.resolve_funcref(opaque);
                imports.functions.push(unsafe { *funcref });
            }
            (EntityType::Table(required), Extern::Table(t)) => {
                let ty = t.ty_impl(opaque);
                let size = t.size_impl(opaque);
                if ty.element != required.element
                    || size < required.minimum
                    || !max_fits(ty.maximum, required.maximum)
                {
                    return Err(mismatch());
                }
                imports.tables.push(t.runtime(opaque));
            }
            (EntityType::Memory(required), Extern::Memory(m)) => {
                let data = m.runtime(opaque);
                let ty = data.ty;
                let mem = data.mem.clone();
                let size = mem.lock().unwrap_or_else(|e| e.into_inner()).size();
                if ty.shared != required.shared
                    || size < required.minimum
                    || !max_fits(ty.maximum, required.maximum)
                {
                    return Err(mismatch());
                }
                imports.memory = Some(mem);
            }
            (EntityType::Global(required), Extern::Global(g)) => {
                let ty = g.ty_impl(opaque);
                if ty != *required {
                    return Err(mismatch());
                }
                imports.globals.push(g.definition(opaque));
            }
            (required, given) => {
                let kind = match required {
                    EntityType::Function(_) => "function",
                    EntityType::Table(_) => "table",
                    EntityType::Memory(_) => "memory",
                    EntityType::Global(_) => "global",
                };
                return Err(mismatch().context(format!(
                    "expected a {kind}, got a {}",
                    given.kind()
                )));
            }
        }
    }
    Ok(imports)
}

/// Whether a provided maximum satisfies a required one. A required
/// maximum demands one at least as tight.
fn max_fits<N: PartialOrd>(provided: Option<N>, required: Option<N>) -> bool {
    match required {
        None => true,
        Some(required) => match provided {
            Some(provided) => provided <= required,
            None => false,
        },
    }
}

fn initialize_globals(opaque: &mut StoreOpaque, handle: &mut InstanceHandle) -> Result<()> {
    let env = handle.instance().module().clone();
    for (defined, init) in env.global_initializers.iter() {
        let index = env.global_index(defined);
        let ty = env.globals[index].ty;
        match ty {
            ValType::ExternRef => {
                // Defined externref globals get a fresh store slot; only
                // null or an imported global's value can initialize one.
                let value = match init {
                    ConstExpr::RefNull(_) => None,
                    ConstExpr::GlobalGet(src) => {
                        let slot =
                            unsafe { (*handle.instance_mut().global_ptr(*src)).get_u128() };
                        opaque.extern_global(slot as u64 as usize)
                    }
                    _ => unreachable!("validated initializer"),
                };
                let slot = opaque.alloc_extern_global(value);
                handle
                    .instance_mut()
                    .defined_global_mut(defined)
                    .set_u128(slot as u128);
            }
            ValType::FuncRef => {
                let bits = match init {
                    ConstExpr::RefNull(_) => 0,
                    ConstExpr::RefFunc(f) => {
                        handle.instance_mut().funcref(*f) as usize as u128
                    }
                    ConstExpr::GlobalGet(src) => {
                        unsafe { (*handle.instance_mut().global_ptr(*src)).get_u128() }
                    }
                    _ => unreachable!("validated initializer"),
                };
                handle.instance_mut().defined_global_mut(defined).set_u128(bits);
            }
            _ => {
                let value = eval_numeric(handle, init);
                let def = handle.instance_mut().defined_global_mut(defined);
                match ty {
                    ValType::I32 => def.set_i32(value as u32 as i32),
                    ValType::I64 => def.set_i64(value as u64 as i64),
                    ValType::F32 => def.set_f32_bits(value as u32),
                    ValType::F64 => def.set_f64_bits(value as u64),
                    ValType::V128 => def.set_u128(value),
                    ValType::FuncRef | ValType::ExternRef => unreachable!("handled above"),
                }
            }
        }
    }
    Ok(())
}

fn eval_numeric(handle: &mut InstanceHandle, expr: &ConstExpr) -> u128 {
    match expr {
        ConstExpr::I32(v) => *v as u32 as u128,
        ConstExpr::I64(v) => *v as u64 as u128,
        ConstExpr::F32(bits) => *bits as u128,
        ConstExpr::F64(bits) => *bits as u128,
        ConstExpr::V128(bits) => *bits,
        ConstExpr::GlobalGet(src) => {
            unsafe { (*handle.instance_mut().global_ptr(*src)).get_u128() }
        }
        ConstExpr::RefNull(_) | ConstExpr::RefFunc(_) => {
            unreachable!("validated initializer")
        }
    }
}

fn segment_offset(handle: &mut InstanceHandle, expr: &ConstExpr) -> u32 {
    match expr {
        ConstExpr::I32(v) => *v as u32,
        ConstExpr::GlobalGet(src) => {
            unsafe { (*handle.instance_mut().global_ptr(*src)).get_i32() as u32 }
        }
        _ => unreachable!("validated segment offset"),
    }
}

/// Applies active element segments in declaration order, stopping at
/// the first out-of-bounds write. Earlier writes persist.
fn apply_element_segments(handle: &mut InstanceHandle) -> Result<()> {
    let env = handle.instance().module().clone();
    for segment in &env.elements {
        let (table_index, offset) = match &segment.kind {
            ElemKind::Active { table_index, offset } => (*table_index, offset),
            ElemKind::Passive | ElemKind::Declared => continue,
        };
        let offset = segment_offset(handle, offset);
        if segment.element == ValType::FuncRef {
            let mut ptrs = Vec::with_capacity(segment.items.len());
            for item in segment.items.iter() {
                ptrs.push(match item {
                    ConstExpr::RefFunc(f) => handle.instance_mut().funcref(*f),
                    ConstExpr::RefNull(_) => std::ptr::null_mut(),
                    _ => unreachable!("element items are reference constants"),
                });
            }
            let table = handle.instance().table(table_index).clone();
            let mut table = table.lock().unwrap_or_else(|e| e.into_inner());
            table.init_funcrefs(offset, &ptrs).map_err(Error::new)?;
        } else {
            let table = handle.instance().table(table_index).clone();
            let mut table = table.lock().unwrap_or_else(|e| e.into_inner());
            table
                .fill(offset, TableElement::ExternRef(None), segment.items.len() as u32)
                .map_err(Error::new)?;
        }
    }
    Ok(())
}

/// Applies active data segments in declaration order, stopping at the
/// first out-of-bounds write. Earlier writes persist.
fn apply_data_segments(handle: &mut InstanceHandle) -> Result<()> {
    let env = handle.instance().module().clone();
    for segment in &env.data {
        let offset = match &segment.active {
            Some((_memory, offset)) => segment_offset(handle, offset),
            None => continue,
        };
        let def = handle
            .instance()
            .memory_definition()
            .unwrap_or_else(|| unreachable!("active data segment without a memory"));
        let def = unsafe { &*def };
        let end = offset as u64 + segment.data.len() as u64;
        if end > def.current_length() as u64 {
            return Err(Error::new(Trap::MemoryOutOfBounds));
        }
        unsafe {
            std::ptr::copy_nonoverlapping(
                segment.data.as_ptr(),
                def.base.add(offset as usize),
                segment.data.len(),
            );
        }
    }
    Ok(())
}
