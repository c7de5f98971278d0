//! Name-based import resolution.

use crate::externals::Extern;
use crate::func::{Caller, Func};
use crate::instance::Instance;
use crate::module::Module;
use crate::store::Store;
use crate::values::Val;
use anyhow::{anyhow, bail, Result};
use riptide_environ::FuncType;
use std::collections::HashMap;

/// Resolves a module's imports by `(module, field)` name instead of by
/// position.
///
/// Definitions are host objects or the exports of previously
/// instantiated modules, so linkers chain instantiations together:
///
/// ```ignore
/// let mut linker = Linker::new();
/// linker.func_new(&mut store, "env", "log", ty, log_fn)?;
/// let a = linker.instantiate(&mut store, &module_a)?;
/// linker.instance(&mut store, "a", a)?;
/// let b = linker.instantiate(&mut store, &module_b)?;
/// ```
#[derive(Debug)]
pub struct Linker<T> {
    map: HashMap<(String, String), Extern>,
    _host: std::marker::PhantomData<fn() -> T>,
}

impl<T> Linker<T> {
    /// Creates an empty linker.
    pub fn new() -> Linker<T> {
        Linker {
            map: HashMap::new(),
            _host: std::marker::PhantomData,
        }
    }

    /// Defines `item` under `module::name`. Redefining a name is an
    /// error.
    pub fn define(
        &mut self,
        module: &str,
        name: &str,
        item: impl Into<Extern>,
    ) -> Result<&mut Self> {
        let key = (module.to_string(), name.to_string());
        if self.map.contains_key(&key) {
            bail!("import `{module}::{name}` defined twice");
        }
        self.map.insert(key, item.into());
        Ok(self)
    }

    /// Creates a host function in `store` and defines it under
    /// `module::name`.
    pub fn func_new(
        &mut self,
        store: &mut Store<T>,
        module: &str,
        name: &str,
        ty: FuncType,
        func: impl Fn(Caller<'_, T>, &[Val], &mut [Val]) -> Result<()> + Send + Sync + 'static,
    ) -> Result<&mut Self> {
        let func = Func::new(store, ty, func);
        self.define(module, name, func)
    }

    /// Defines every export of `instance` under the `module` namespace.
    pub fn instance(
        &mut self,
        store: &mut Store<T>,
        module: &str,
        instance: Instance,
    ) -> Result<&mut Self> {
        let names: Vec<String> = instance
            .module(store)
            .exports()
            .map(|(name, _)| name.to_string())
            .collect();
        for name in names {
            let item = instance
                .get_export(store, &name)
                .unwrap_or_else(|| unreachable!("listed export exists"));
            self.define(module, &name, item)?;
        }
        Ok(self)
    }

    /// The definition under `module::name`, if there is one.
    pub fn get(&self, module: &str, name: &str) -> Option<Extern> {
        self.map
            .get(&(module.to_string(), name.to_string()))
            .copied()
    }

    /// Instantiates `module`, resolving its imports from this linker's
    /// definitions.
    pub fn instantiate(&self, store: &mut Store<T>, module: &Module) -> Result<Instance> {
        let mut imports = Vec::new();
        for (import_module, import_name, _) in module.imports() {
            let item = self.get(import_module, import_name).ok_or_else(|| {
                anyhow!("unknown import: `{import_module}::{import_name}` has not been defined")
            })?;
            imports.push(item);
        }
        Instance::new(store, module, &imports)
    }
}

impl<T> Default for Linker<T> {
    fn default() -> Linker<T> {
        Linker::new()
    }
}
