//! Feature flags gating which proposals a module may use.

/// The set of WebAssembly proposals enabled for decoding and validation.
///
/// Opcodes belonging to a disabled proposal fail decoding with an
/// unsupported-feature error. The defaults match the widely-supported
/// post-MVP baseline; threads and SIMD are opt-in.
#[derive(Copy, Clone, Debug)]
pub struct WasmFeatures {
    /// Sign-extension operators (`i32.extend8_s`, ...).
    pub sign_extension: bool,
    /// Saturating float-to-int conversions.
    pub saturating_float_to_int: bool,
    /// Multiple return values from functions and blocks.
    pub multi_value: bool,
    /// Bulk memory operations (`memory.copy`, passive segments, ...).
    pub bulk_memory: bool,
    /// Reference types (`funcref`/`externref` values, multiple tables).
    pub reference_types: bool,
    /// Threads: shared memories and atomic operators.
    pub threads: bool,
    /// 128-bit SIMD (the supported subset).
    pub simd: bool,
}

impl Default for WasmFeatures {
    fn default() -> WasmFeatures {
        WasmFeatures {
            sign_extension: true,
            saturating_float_to_int: true,
            multi_value: true,
            bulk_memory: true,
            reference_types: true,
            threads: false,
            simd: false,
        }
    }
}
