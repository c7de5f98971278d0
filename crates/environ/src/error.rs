//! Errors produced while decoding or validating a module.

use thiserror::Error;

/// A WebAssembly decoding or validation failure.
///
/// Everything here is fatal to compilation: a module that produces a
/// `WasmError` is rejected outright and no partial state is kept.
#[derive(Debug, Error)]
pub enum WasmError {
    /// The input bytes are not valid WebAssembly, or they violate a static
    /// type rule. The offset points into the original binary at the byte
    /// where the problem was detected.
    #[error("invalid WebAssembly: {message} (at offset {offset:#x})")]
    InvalidWebAssembly {
        /// Description of the problem.
        message: String,
        /// Byte offset into the module where the problem was detected.
        offset: usize,
    },

    /// The input uses a feature that is not enabled in the current
    /// configuration, or one this implementation does not support.
    #[error("unsupported WebAssembly: {0}")]
    Unsupported(String),

    /// An implementation limit (not a spec limit) was exceeded.
    #[error("implementation limit exceeded")]
    ImplLimitExceeded,
}

impl WasmError {
    /// Shorthand constructor for [`WasmError::InvalidWebAssembly`].
    pub fn invalid(message: impl Into<String>, offset: usize) -> Self {
        WasmError::InvalidWebAssembly {
            message: message.into(),
            offset,
        }
    }
}

/// A convenient alias for a `Result` that uses `WasmError` as the error.
pub type WasmResult<T> = Result<T, WasmError>;

/// Return an `Err(WasmError::Unsupported(...))` where the message the
/// string-formatted arguments.
#[macro_export]
macro_rules! wasm_unsupported {
    ($($arg:tt)*) => { $crate::WasmError::Unsupported(format!($($arg)*)) }
}
