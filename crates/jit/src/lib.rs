//! Compiles validated modules to executable code.
//!
//! Each defined function is translated to the compiler IR, optimized,
//! and emitted as machine code. Functions the compiler declines, for
//! operators outside the backend's repertoire or for blowing its
//! complexity limits, are left without machine code and run in the
//! interpreter; the rest of their module is unaffected. Calls from
//! compiled code into such functions go through the funcref array, so
//! the two execution modes mix freely inside one module.
//!
//! The compiled bodies are laid out back to back in one allocation,
//! call displacements between them are patched, and the block is made
//! executable. A [`CompiledModule`] then hands out the entry point of
//! every function that has one.

use anyhow::Result;
use cranelift_entity::PrimaryMap;
use riptide_codegen::{
    optimize, translate_function, CodegenResult, CompileContext, CompiledFunction, TargetIsa,
};
use riptide_environ::{DefinedFuncIndex, Module, TypeIndex};
use riptide_runtime::{CodeMemory, VMArrayCallFunction};
use target_lexicon::Triple;

/// Function bodies are aligned to this in the code block.
const CODE_ALIGNMENT: usize = 16;

/// A code generator for one target.
pub struct Compiler {
    isa: Box<dyn TargetIsa>,
}

impl Compiler {
    /// Creates a compiler for `triple`, or fails if no backend supports
    /// it. Embedders treat the failure as "interpret everything".
    pub fn new(triple: &Triple) -> CodegenResult<Compiler> {
        let isa = riptide_codegen::lookup(triple)?;
        log::debug!("using the {} backend for {triple}", isa.name());
        Ok(Compiler { isa })
    }

    /// Compiles every defined function of `module` that the backend
    /// accepts and publishes the result as executable memory.
    ///
    /// `signature_ids` maps module-local type indices to engine-wide
    /// signature ids, burned into `call_indirect` sequences.
    pub fn compile(
        &self,
        module: &Module,
        signature_ids: &dyn Fn(TypeIndex) -> u32,
    ) -> Result<CompiledModule> {
        // Translate everything first: which functions fall back decides
        // how calls to them are lowered.
        let mut funcs = PrimaryMap::with_capacity(module.code.len());
        for defined in module.code.keys() {
            let func = match translate_function(module, defined) {
                Ok(mut func) => {
                    optimize(&mut func);
                    Some(func)
                }
                Err(error) => {
                    log::debug!(
                        "function {} runs in the interpreter: {error}",
                        module.func_index(defined).as_u32(),
                    );
                    None
                }
            };
            funcs.push(func);
        }

        let ctx = CompileContext {
            module,
            signature_ids,
            interpreted: &|func| match module.defined_func_index(func) {
                Some(defined) => funcs[defined].is_none(),
                None => false,
            },
        };

        let mut compiled: PrimaryMap<DefinedFuncIndex, Option<CompiledFunction>> =
            PrimaryMap::with_capacity(funcs.len());
        for (_, func) in funcs.iter() {
            match func {
                Some(func) => compiled.push(Some(self.isa.compile_function(&ctx, func)?)),
                None => compiled.push(None),
            };
        }

        // Lay the bodies out and patch inter-function call displacements
        // before the bytes move into executable memory.
        let mut offsets: PrimaryMap<DefinedFuncIndex, Option<usize>> =
            PrimaryMap::with_capacity(compiled.len());
        let mut code = Vec::new();
        for (_, function) in compiled.iter() {
            match function {
                Some(function) => {
                    let padding = code.len().next_multiple_of(CODE_ALIGNMENT) - code.len();
                    code.extend(std::iter::repeat(0xcc).take(padding));
                    offsets.push(Some(code.len()));
                    code.extend_from_slice(&function.body);
                }
                None => {
                    offsets.push(None);
                }
            }
        }

        for (defined, function) in compiled.iter() {
            let (Some(function), Some(base)) = (function, offsets[defined]) else {
                continue;
            };
            for reloc in &function.relocs {
                let target = module
                    .defined_func_index(reloc.target)
                    .and_then(|defined| offsets[defined])
                    .unwrap_or_else(|| panic!("relocation against uncompiled function"));
                let site = base + reloc.offset as usize;
                let disp = (target as i64 - (site as i64 + 4)) as i32;
                code[site..site + 4].copy_from_slice(&disp.to_le_bytes());
            }
        }

        let mut memory = CodeMemory::new(&code)?;
        memory.publish()?;
        log::debug!(
            "compiled {}/{} functions into {} bytes",
            offsets.values().filter(|offset| offset.is_some()).count(),
            offsets.len(),
            code.len(),
        );
        Ok(CompiledModule { code: memory, offsets })
    }
}

/// The executable code of one module.
pub struct CompiledModule {
    code: CodeMemory,
    offsets: PrimaryMap<DefinedFuncIndex, Option<usize>>,
}

impl CompiledModule {
    /// The entry point of a defined function, if it was compiled.
    pub fn array_call(&self, defined: DefinedFuncIndex) -> Option<VMArrayCallFunction> {
        let offset = self.offsets[defined]?;
        // The offset came out of the layout loop above, so the pointer
        // is inside the published mapping.
        unsafe {
            let entry = self.code.as_ptr().add(offset);
            Some(std::mem::transmute::<*const u8, VMArrayCallFunction>(entry))
        }
    }

    /// Whether the function at `defined` has machine code.
    pub fn is_compiled(&self, defined: DefinedFuncIndex) -> bool {
        self.offsets[defined].is_some()
    }

    /// Whether `pc` falls inside this module's code.
    pub fn contains(&self, pc: usize) -> bool {
        self.code.contains(pc)
    }
}

#[cfg(test)]
#[cfg(target_arch = "x86_64")]
mod tests {
    use super::*;
    use riptide_environ::{decode_module, validate_module, WasmFeatures};

    fn compile(wat: &str) -> CompiledModule {
        let wasm = wat::parse_str(wat).unwrap();
        let module = decode_module(&wasm, &WasmFeatures::default()).unwrap();
        validate_module(&module).unwrap();
        let compiler = Compiler::new(&Triple::host()).unwrap();
        compiler.compile(&module, &|ty| ty.as_u32()).unwrap()
    }

    #[test]
    fn every_simple_function_is_compiled() {
        let compiled = compile(
            r#"(module
                (func (result i32) i32.const 1)
                (func (result i64) i64.const 2))"#,
        );
        assert!(compiled.is_compiled(DefinedFuncIndex::from_u32(0)));
        assert!(compiled.is_compiled(DefinedFuncIndex::from_u32(1)));
    }

    #[test]
    fn unsupported_operators_fall_back_per_function() {
        let compiled = compile(
            r#"(module
                (func (result i32) i32.const 1)
                (func (param f32) (result i32)
                    local.get 0
                    i32.trunc_f32_s))"#,
        );
        assert!(compiled.is_compiled(DefinedFuncIndex::from_u32(0)));
        assert!(!compiled.is_compiled(DefinedFuncIndex::from_u32(1)));
        assert!(compiled.array_call(DefinedFuncIndex::from_u32(1)).is_none());
    }

    #[test]
    fn callers_of_interpreted_functions_still_compile() {
        let compiled = compile(
            r#"(module
                (func $fallback (param f32) (result i32)
                    local.get 0
                    i32.trunc_f32_s)
                (func (result i32)
                    f32.const 1
                    call $fallback))"#,
        );
        assert!(!compiled.is_compiled(DefinedFuncIndex::from_u32(0)));
        assert!(compiled.is_compiled(DefinedFuncIndex::from_u32(1)));
    }

    #[test]
    fn entry_points_are_distinct_and_aligned() {
        let compiled = compile(
            r#"(module
                (func (result i32) i32.const 1)
                (func (result i32) i32.const 2))"#,
        );
        let a = compiled.array_call(DefinedFuncIndex::from_u32(0)).unwrap() as usize;
        let b = compiled.array_call(DefinedFuncIndex::from_u32(1)).unwrap() as usize;
        assert_ne!(a, b);
        assert_eq!(a % 16, 0);
        assert_eq!(b % 16, 0);
    }
}
