//! Compiled modules.

use crate::engine::Engine;
use crate::interp::{self, FuncCode};
use anyhow::{Context, Result};
use cranelift_entity::{EntityRef, PrimaryMap};
use riptide_environ::{
    decode_module, validate_module, DefinedFuncIndex, EntityIndex, EntityType, FuncType,
};
use riptide_jit::CompiledModule;
use std::path::Path;
use std::sync::Arc;

/// A decoded, validated and (where the backend accepts it) compiled
/// module, ready to be instantiated any number of times in any store of
/// its engine.
///
/// Modules are cheap to clone and safe to share across threads.
#[derive(Clone)]
pub struct Module {
    inner: Arc<ModuleInner>,
}

struct ModuleInner {
    engine: Engine,
    env: Arc<riptide_environ::Module>,
    compiled: Option<CompiledModule>,
    /// Lowered bodies for functions that run in the interpreter.
    interp: PrimaryMap<DefinedFuncIndex, Option<Arc<FuncCode>>>,
    /// Engine-wide signature ids, indexed by the module's type indices.
    shared_type_ids: Arc<Vec<u32>>,
}

impl Module {
    /// Decodes and compiles a module from binary wasm or text format.
    pub fn new(engine: &Engine, bytes: impl AsRef<[u8]>) -> Result<Module> {
        let binary = wat::parse_bytes(bytes.as_ref())?;
        Module::from_binary(engine, &binary)
    }

    /// Loads a module from a file on disk, in binary or text format.
    pub fn from_file(engine: &Engine, path: impl AsRef<Path>) -> Result<Module> {
        let path = path.as_ref();
        let bytes = std::fs::read(path)
            .with_context(|| format!("failed to read `{}`", path.display()))?;
        Module::new(engine, bytes)
    }

    /// Decodes and compiles a module from binary wasm only.
    pub fn from_binary(engine: &Engine, binary: &[u8]) -> Result<Module> {
        let env = decode_module(binary, &engine.config().features)?;
        validate_module(&env)?;

        let shared_type_ids: Vec<u32> = env
            .types
            .values()
            .map(|ty| engine.signatures().register(ty))
            .collect();

        let compiled = match engine.compiler() {
            Some(compiler) => {
                Some(compiler.compile(&env, &|index| shared_type_ids[index.index()])?)
            }
            None => None,
        };

        // Functions the backend declined (or all of them without a
        // compiler) get lowered for the interpreter up front, so
        // instantiation does no per-instance analysis.
        let mut interp = PrimaryMap::with_capacity(env.code.len());
        for (defined, body) in env.code.iter() {
            let native = compiled
                .as_ref()
                .map_or(false, |compiled| compiled.is_compiled(defined));
            if native {
                interp.push(None);
            } else {
                let ty = env.func_type(env.func_index(defined));
                interp.push(Some(Arc::new(interp::lower(&env, ty, body))));
            }
        }

        Ok(Module {
            inner: Arc::new(ModuleInner {
                engine: engine.clone(),
                env: Arc::new(env),
                compiled,
                interp,
                shared_type_ids: Arc::new(shared_type_ids),
            }),
        })
    }

    /// The engine this module was compiled for.
    pub fn engine(&self) -> &Engine {
        &self.inner.engine
    }

    /// The module name from the name section, if present.
    pub fn name(&self) -> Option<&str> {
        self.inner.env.name.as_deref()
    }

    /// The names and types of the module's exports, in declaration
    /// order.
    pub fn exports(&self) -> impl Iterator<Item = (&str, EntityType)> + '_ {
        self.inner
            .env
            .exports
            .iter()
            .map(|(name, index)| (name.as_str(), self.entity_type(*index)))
    }

    /// The type of the export called `name`, if there is one.
    pub fn get_export(&self, name: &str) -> Option<EntityType> {
        let index = self.inner.env.exports.get(name)?;
        Some(self.entity_type(*index))
    }

    /// The imports the module requires, as (module, field, type)
    /// triples in declaration order.
    pub fn imports(&self) -> impl Iterator<Item = (&str, &str, &EntityType)> + '_ {
        self.inner
            .env
            .imports
            .iter()
            .map(|import| (import.module.as_str(), import.field.as_str(), &import.ty))
    }

    fn entity_type(&self, index: EntityIndex) -> EntityType {
        let env = &self.inner.env;
        match index {
            EntityIndex::Function(f) => EntityType::Function(env.functions[f]),
            EntityIndex::Table(t) => EntityType::Table(env.tables[t]),
            EntityIndex::Memory(m) => EntityType::Memory(env.memories[m]),
            EntityIndex::Global(g) => EntityType::Global(env.globals[g]),
        }
    }

    /// The signature of an exported or imported function type index.
    pub(crate) fn func_type_at(&self, index: riptide_environ::TypeIndex) -> &FuncType {
        &self.inner.env.types[index]
    }

    pub(crate) fn env(&self) -> &Arc<riptide_environ::Module> {
        &self.inner.env
    }

    pub(crate) fn compiled(&self) -> Option<&CompiledModule> {
        self.inner.compiled.as_ref()
    }

    pub(crate) fn interp_code(&self, defined: DefinedFuncIndex) -> Option<&Arc<FuncCode>> {
        self.inner.interp[defined].as_ref()
    }

    pub(crate) fn shared_type_ids(&self) -> &Arc<Vec<u32>> {
        &self.inner.shared_type_ids
    }
}

impl std::fmt::Debug for Module {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Module")
            .field("name", &self.name())
            .finish_non_exhaustive()
    }
}
