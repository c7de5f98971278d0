//! Engine configuration.

use riptide_environ::WasmFeatures;

/// Which execution strategy an [`Engine`](crate::Engine) uses.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Strategy {
    /// Compile to native code where the target and the function allow it,
    /// and fall back to the interpreter otherwise. This is the default.
    Auto,
    /// Require the compiler. Engine creation fails on targets without a
    /// backend; individual functions the backend declines still run
    /// interpreted.
    Compiler,
    /// Run everything in the interpreter.
    Interpreter,
}

/// Global configuration for an [`Engine`](crate::Engine).
///
/// ```ignore
/// let mut config = Config::new();
/// config.wasm_threads(true).strategy(Strategy::Interpreter);
/// let engine = Engine::new(&config)?;
/// ```
#[derive(Clone, Debug)]
pub struct Config {
    pub(crate) features: WasmFeatures,
    pub(crate) strategy: Strategy,
    pub(crate) max_wasm_stack: usize,
    pub(crate) max_memory_pages: u64,
    pub(crate) interruptable: bool,
}

impl Config {
    /// A configuration with default feature flags and the `Auto`
    /// strategy.
    pub fn new() -> Config {
        Config {
            features: WasmFeatures::default(),
            strategy: Strategy::Auto,
            max_wasm_stack: 512 * 1024,
            max_memory_pages: riptide_environ::WASM_MAX_PAGES,
            interruptable: false,
        }
    }

    /// Selects the execution strategy.
    pub fn strategy(&mut self, strategy: Strategy) -> &mut Self {
        self.strategy = strategy;
        self
    }

    /// The amount of native stack guest code may consume before it traps
    /// with a stack overflow. Defaults to 512 KiB.
    pub fn max_wasm_stack(&mut self, size: usize) -> &mut Self {
        self.max_wasm_stack = size;
        self
    }

    /// Caps every linear memory at `pages` wasm pages, on top of each
    /// memory's own declared maximum. Instantiation fails when a
    /// memory's minimum exceeds the cap; `memory.grow` fails against it
    /// the same way it fails against a declared maximum. Defaults to the
    /// 4 GiB wasm limit.
    pub fn max_memory_pages(&mut self, pages: u64) -> &mut Self {
        self.max_memory_pages = pages;
        self
    }

    /// Allows [`Store::interrupt_handle`](crate::Store::interrupt_handle)
    /// to be used with stores in this engine. Disabled by default.
    /// ([`Engine::close`](crate::Engine::close) interrupts regardless.)
    pub fn interruptable(&mut self, enable: bool) -> &mut Self {
        self.interruptable = enable;
        self
    }

    /// Enables the threads proposal: shared memories and atomic
    /// operations. Disabled by default.
    pub fn wasm_threads(&mut self, enable: bool) -> &mut Self {
        self.features.threads = enable;
        self
    }

    /// Enables the fixed-width SIMD proposal. Disabled by default.
    pub fn wasm_simd(&mut self, enable: bool) -> &mut Self {
        self.features.simd = enable;
        self
    }

    /// Enables the reference-types proposal. Enabled by default.
    pub fn wasm_reference_types(&mut self, enable: bool) -> &mut Self {
        self.features.reference_types = enable;
        self
    }

    /// Enables the bulk-memory proposal. Enabled by default.
    pub fn wasm_bulk_memory(&mut self, enable: bool) -> &mut Self {
        self.features.bulk_memory = enable;
        self
    }

    /// Enables multi-value blocks and results. Enabled by default.
    pub fn wasm_multi_value(&mut self, enable: bool) -> &mut Self {
        self.features.multi_value = enable;
        self
    }

    /// Enables the sign-extension operators. Enabled by default.
    pub fn wasm_sign_extension(&mut self, enable: bool) -> &mut Self {
        self.features.sign_extension = enable;
        self
    }

    /// Enables the saturating float-to-int operators. Enabled by default.
    pub fn wasm_saturating_float_to_int(&mut self, enable: bool) -> &mut Self {
        self.features.saturating_float_to_int = enable;
        self
    }
}

impl Default for Config {
    fn default() -> Config {
        Config::new()
    }
}
