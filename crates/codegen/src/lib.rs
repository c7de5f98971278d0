//! The Riptide optimizing compiler.
//!
//! Functions move through three stages: the [frontend] translates
//! validated wasm into the SSA [ir], [opt] runs a small set of
//! machine-independent rewrites over it, and an [isa] backend turns
//! the result into machine code.
//!
//! Not every function is compilable. Operators outside the backend's
//! repertoire (vector and atomic instructions, reference-typed tables,
//! float-to-integer truncations, bulk memory) make the frontend return
//! [`CodegenError::Unsupported`], and functions that blow the internal
//! complexity limits get [`CodegenError::ImplLimit`]. Callers are
//! expected to route such functions to the interpreter rather than
//! fail the module.

pub mod error;
pub mod frontend;
pub mod ir;
pub mod isa;
pub mod opt;
pub mod regalloc;

pub use error::{CodegenError, CodegenResult};
pub use frontend::translate_function;
pub use isa::{lookup, CompileContext, CompiledFunction, Reloc, TargetIsa};
pub use opt::optimize;
