//! Trap reporting.

use anyhow::Error;
use riptide_environ::Module;
use riptide_runtime::{TrapReason, TrapState};
use std::fmt;

pub use riptide_environ::Trap;

/// A captured guest-level backtrace, attached as context to the error
/// returned when a call traps.
///
/// Frames are ordered innermost first. Retrieve it from an error with
/// [`WasmBacktrace::capture`]:
///
/// ```ignore
/// if let Some(bt) = WasmBacktrace::capture(&err) {
///     for frame in bt.frames() { ... }
/// }
/// ```
#[derive(Clone, Debug)]
pub struct WasmBacktrace {
    frames: Vec<FrameInfo>,
}

/// One guest frame of a [`WasmBacktrace`].
#[derive(Clone, Debug)]
pub struct FrameInfo {
    func_index: u32,
    func_name: Option<String>,
    wasm_offset: u32,
}

impl FrameInfo {
    /// The index of the function in its module's index space.
    pub fn func_index(&self) -> u32 {
        self.func_index
    }

    /// The function's name from the name section, if it had one.
    pub fn func_name(&self) -> Option<&str> {
        self.func_name.as_deref()
    }

    /// The code-section-relative offset of the faulting or calling
    /// instruction.
    pub fn wasm_offset(&self) -> u32 {
        self.wasm_offset
    }
}

impl WasmBacktrace {
    /// The backtrace attached to `error`, if it came from a trapping or
    /// failing guest call.
    pub fn capture(error: &Error) -> Option<&WasmBacktrace> {
        error.chain().find_map(|cause| cause.downcast_ref())
    }

    /// The frames of the backtrace, innermost first.
    pub fn frames(&self) -> &[FrameInfo] {
        &self.frames
    }
}

impl fmt::Display for WasmBacktrace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "wasm backtrace:")?;
        for (i, frame) in self.frames.iter().enumerate() {
            write!(f, "    {i}: ")?;
            match &frame.func_name {
                Some(name) => write!(f, "{name}")?,
                None => write!(f, "<wasm function {}>", frame.func_index)?,
            }
            writeln!(f, " @ 0x{:x}", frame.wasm_offset)?;
        }
        Ok(())
    }
}

impl std::error::Error for WasmBacktrace {}

/// Converts the raw state recorded during an unwind into the error an
/// embedder sees, resolving function names against `module`. Calls that
/// enter through a host function have no module to resolve against.
pub(crate) fn error_from_trap_state(state: Box<TrapState>, module: Option<&Module>) -> Error {
    let frames = state
        .frames
        .iter()
        .map(|raw| {
            let index = riptide_environ::FuncIndex::from_u32(raw.func_index);
            FrameInfo {
                func_index: raw.func_index,
                func_name: module
                    .and_then(|m| m.func_name(index))
                    .map(str::to_string),
                wasm_offset: raw.wasm_offset,
            }
        })
        .collect::<Vec<_>>();
    let error = match state.reason {
        TrapReason::Wasm(trap) => Error::new(trap),
        TrapReason::User(error) => error,
    };
    if frames.is_empty() {
        error
    } else {
        error.context(WasmBacktrace { frames })
    }
}
