//! Engines: shared compilation and configuration state.

use crate::config::{Config, Strategy};
use anyhow::{Context, Result};
use riptide_environ::FuncType;
use riptide_jit::Compiler;
use riptide_runtime::ParkingSpot;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, Weak};
use target_lexicon::Triple;

/// Shared state between [`Module`](crate::Module)s and
/// [`Store`](crate::Store)s: the configuration, the compiler (if the
/// strategy and target provide one), and the engine-wide signature
/// registry that makes indirect-call type checks a single integer
/// comparison.
///
/// Engines are cheap to clone and safe to share across threads.
#[derive(Clone)]
pub struct Engine {
    inner: Arc<EngineInner>,
}

struct EngineInner {
    config: Config,
    compiler: Option<Compiler>,
    signatures: SignatureRegistry,
    parking: ParkingSpot,
    /// Interrupt flags of every store created from this engine, so
    /// `close` can stop in-flight calls.
    interrupts: Mutex<Vec<Weak<AtomicU8>>>,
    closed: AtomicBool,
}

impl Engine {
    /// Creates an engine with the given configuration.
    pub fn new(config: &Config) -> Result<Engine> {
        let compiler = match config.strategy {
            Strategy::Interpreter => None,
            Strategy::Compiler => {
                Some(Compiler::new(&Triple::host()).context("no compiler backend for this host")?)
            }
            Strategy::Auto => match Compiler::new(&Triple::host()) {
                Ok(compiler) => Some(compiler),
                Err(error) => {
                    log::debug!("no compiler backend, falling back to the interpreter: {error}");
                    None
                }
            },
        };
        Ok(Engine {
            inner: Arc::new(EngineInner {
                config: config.clone(),
                compiler,
                signatures: SignatureRegistry::default(),
                parking: ParkingSpot::new(),
                interrupts: Mutex::new(Vec::new()),
                closed: AtomicBool::new(false),
            }),
        })
    }

    /// Closes the engine: every in-flight guest call is interrupted and
    /// every future call fails with an interrupt trap.
    pub fn close(&self) {
        self.inner.closed.store(true, Ordering::SeqCst);
        let interrupts = self
            .inner
            .interrupts
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        for flag in interrupts.iter().filter_map(Weak::upgrade) {
            flag.store(1, Ordering::SeqCst);
        }
    }

    /// Whether [`Engine::close`] has been called.
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    pub(crate) fn config(&self) -> &Config {
        &self.inner.config
    }

    pub(crate) fn compiler(&self) -> Option<&Compiler> {
        self.inner.compiler.as_ref()
    }

    pub(crate) fn signatures(&self) -> &SignatureRegistry {
        &self.inner.signatures
    }

    pub(crate) fn parking(&self) -> &ParkingSpot {
        &self.inner.parking
    }

    pub(crate) fn register_interrupt(&self, flag: &Arc<AtomicU8>) {
        let mut interrupts = self
            .inner
            .interrupts
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        interrupts.retain(|weak| weak.strong_count() > 0);
        interrupts.push(Arc::downgrade(flag));
        if self.is_closed() {
            flag.store(1, Ordering::SeqCst);
        }
    }

    /// Whether two engines are the same engine.
    pub fn same(a: &Engine, b: &Engine) -> bool {
        Arc::ptr_eq(&a.inner, &b.inner)
    }
}

impl Default for Engine {
    fn default() -> Engine {
        Engine::new(&Config::new()).unwrap_or_else(|_| {
            let mut config = Config::new();
            config.strategy(Strategy::Interpreter);
            match Engine::new(&config) {
                Ok(engine) => engine,
                Err(_) => unreachable!("interpreter-only engines always construct"),
            }
        })
    }
}

/// Interns function types so that equal signatures, registered from any
/// module or host function, share one id.
///
/// Every `VMFuncRef` carries its id, which is what indirect calls and
/// host-side type checks compare.
#[derive(Default)]
pub(crate) struct SignatureRegistry {
    inner: Mutex<RegistryInner>,
}

#[derive(Default)]
struct RegistryInner {
    ids: HashMap<FuncType, u32>,
    types: Vec<FuncType>,
}

impl SignatureRegistry {
    pub fn register(&self, ty: &FuncType) -> u32 {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(id) = inner.ids.get(ty) {
            return *id;
        }
        let id = u32::try_from(inner.types.len()).unwrap_or_else(|_| {
            panic!("signature registry overflow");
        });
        inner.ids.insert(ty.clone(), id);
        inner.types.push(ty.clone());
        id
    }

    pub fn lookup(&self, id: u32) -> Option<FuncType> {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.types.get(id as usize).cloned()
    }
}
