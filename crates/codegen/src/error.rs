//! Compilation errors.

/// An error produced while compiling one function.
///
/// `Unsupported` is not fatal to the module: the embedder routes the
/// function to the interpreter instead.
#[derive(Debug, thiserror::Error)]
pub enum CodegenError {
    /// The function uses an operator or shape of code the native backend
    /// does not select.
    #[error("unsupported by the native backend: {0}")]
    Unsupported(String),
    /// An implementation limit was exceeded.
    #[error("implementation limit exceeded: {0}")]
    ImplLimit(String),
}

/// Compilation result type.
pub type CodegenResult<T> = Result<T, CodegenError>;

/// Returns a [`CodegenError::Unsupported`] with formatted text.
#[macro_export]
macro_rules! unsupported {
    ($($arg:tt)*) => {
        return Err($crate::CodegenError::Unsupported(format!($($arg)*)))
    };
}
