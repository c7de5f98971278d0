//! The x86-64 backend.
//!
//! Compilation is three passes: [`lower`] turns the SSA function into
//! virtual-register instructions, [`regalloc`](crate::regalloc) assigns
//! each virtual register a home, and [`emit`] expands every instruction
//! into machine code.

mod emit;
mod inst;
mod lower;
mod regs;

use crate::error::CodegenResult;
use crate::ir::Function;
use crate::isa::{CompileContext, CompiledFunction, TargetIsa};
use crate::regalloc;

use lower::lower;

/// The x86-64 code generator.
pub struct X64Backend;

impl TargetIsa for X64Backend {
    fn name(&self) -> &'static str {
        "x64"
    }

    fn compile_function(
        &self,
        ctx: &CompileContext<'_>,
        func: &Function,
    ) -> CodegenResult<CompiledFunction> {
        let vcode = lower(ctx, func);
        let infos: Vec<_> = vcode.insts.iter().map(|inst| inst.collect_operands()).collect();
        let alloc = regalloc::allocate(
            &vcode.vreg_classes,
            &infos,
            &vcode.block_ranges,
            &vcode.succs,
            &regs::machine_env(),
        );
        Ok(emit::emit(&vcode, &alloc, func.index))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frontend::translate_function;
    use riptide_environ::{
        decode_module, validate_module, DefinedFuncIndex, TypeIndex, WasmFeatures,
    };

    fn compile(wat: &str) -> Vec<CompiledFunction> {
        let wasm = wat::parse_str(wat).unwrap();
        let module = decode_module(&wasm, &WasmFeatures::default()).unwrap();
        validate_module(&module).unwrap();
        let signature_ids = |ty: TypeIndex| ty.as_u32();
        let ctx = CompileContext {
            module: &module,
            signature_ids: &signature_ids,
            interpreted: &|_| false,
        };
        let backend = X64Backend;
        module
            .code
            .keys()
            .map(|def: DefinedFuncIndex| {
                let func = translate_function(&module, def).unwrap();
                backend.compile_function(&ctx, &func).unwrap()
            })
            .collect()
    }

    #[test]
    fn add_compiles_to_machine_code() {
        let compiled = compile(
            r#"(module (func (param i32 i32) (result i32)
                local.get 0
                local.get 1
                i32.add))"#,
        );
        assert_eq!(compiled.len(), 1);
        let body = &compiled[0].body;
        // push rbp; mov rbp, rsp
        assert_eq!(&body[..4], &[0x55, 0x48, 0x89, 0xe5]);
        // ends with ret
        assert_eq!(*body.last().unwrap(), 0xc3);
        assert!(compiled[0].relocs.is_empty());
    }

    #[test]
    fn direct_calls_leave_relocations() {
        let compiled = compile(
            r#"(module
                (func $leaf (result i32) i32.const 7)
                (func (result i32) call $leaf))"#,
        );
        assert!(compiled[0].relocs.is_empty());
        let relocs = &compiled[1].relocs;
        assert_eq!(relocs.len(), 1);
        assert_eq!(relocs[0].target.as_u32(), 0);
        // The displacement field lies inside the body.
        assert!((relocs[0].offset as usize) + 4 <= compiled[1].body.len());
    }

    #[test]
    fn division_compiles_with_trap_checks() {
        let compiled = compile(
            r#"(module (func (param i32 i32) (result i32)
                local.get 0
                local.get 1
                i32.div_s))"#,
        );
        // idiv appears in the body: f7 /7 with modrm selecting ecx.
        let body = &compiled[0].body;
        assert!(body.windows(2).any(|w| w == [0xf7, 0xf9]));
    }

    #[test]
    fn loops_reload_the_interrupt_flag() {
        let compiled = compile(
            r#"(module (func
                (loop $l br $l)))"#,
        );
        // The interrupt flag load `mov rax, [r15 + 0x28]` shows up once
        // in the prologue and once before the back edge.
        let body = &compiled[0].body;
        let pattern = [0x49, 0x8b, 0x87, 0x28, 0x00, 0x00, 0x00];
        let count = body.windows(pattern.len()).filter(|w| *w == pattern).count();
        assert!(count >= 2, "expected two interrupt checks, body: {body:02x?}");
    }
}
