//! Target instruction set backends.

use crate::error::{CodegenError, CodegenResult};
use crate::ir::Function;
use riptide_environ::{FuncIndex, Module, TypeIndex};
use target_lexicon::{Architecture, Triple};

pub mod x64;

/// A relocation in a compiled function's body: a `rel32` call
/// displacement to patch once the target's address is known.
#[derive(Copy, Clone, Debug)]
pub struct Reloc {
    /// Offset of the 4-byte displacement within the function body.
    pub offset: u32,
    /// The function the displacement refers to.
    pub target: FuncIndex,
}

/// The machine code for one function.
pub struct CompiledFunction {
    /// The encoded instructions.
    pub body: Vec<u8>,
    /// Call displacements to patch at link time.
    pub relocs: Vec<Reloc>,
}

/// Module-wide context shared by every function compilation.
pub struct CompileContext<'a> {
    /// The validated module.
    pub module: &'a Module,
    /// Engine-wide signature id of each module type, compared on
    /// indirect calls.
    pub signature_ids: &'a dyn Fn(TypeIndex) -> u32,
    /// Whether a function runs in the interpreter. Calls to such
    /// functions go through their `VMFuncRef` instead of a direct
    /// `call rel32`, since they have no machine code to land in.
    pub interpreted: &'a dyn Fn(FuncIndex) -> bool,
}

/// One compilation target.
pub trait TargetIsa: Send + Sync {
    /// The name of the target, for logging.
    fn name(&self) -> &'static str;

    /// Compiles one function to machine code.
    fn compile_function(
        &self,
        ctx: &CompileContext<'_>,
        func: &Function,
    ) -> CodegenResult<CompiledFunction>;
}

/// Looks up the backend for `triple`.
pub fn lookup(triple: &Triple) -> CodegenResult<Box<dyn TargetIsa>> {
    match triple.architecture {
        Architecture::X86_64 => Ok(Box::new(x64::X64Backend)),
        other => Err(CodegenError::Unsupported(format!(
            "no compiler backend for {other}"
        ))),
    }
}
