//! Runtime values.

use crate::Func;
use riptide_environ::ValType;
use riptide_runtime::ExternRef;

/// A WebAssembly value.
///
/// Floats are carried as raw bits so that NaN payloads survive a round
/// trip through the embedder unchanged.
#[derive(Clone, Debug)]
pub enum Val {
    /// A 32-bit integer.
    I32(i32),
    /// A 64-bit integer.
    I64(i64),
    /// A 32-bit float, as its bit pattern.
    F32(u32),
    /// A 64-bit float, as its bit pattern.
    F64(u64),
    /// A 128-bit vector.
    V128(u128),
    /// A `funcref`, possibly null.
    FuncRef(Option<Func>),
    /// An `externref`, possibly null.
    ExternRef(Option<ExternRef>),
}

impl Val {
    /// The type of this value.
    pub fn ty(&self) -> ValType {
        match self {
            Val::I32(_) => ValType::I32,
            Val::I64(_) => ValType::I64,
            Val::F32(_) => ValType::F32,
            Val::F64(_) => ValType::F64,
            Val::V128(_) => ValType::V128,
            Val::FuncRef(_) => ValType::FuncRef,
            Val::ExternRef(_) => ValType::ExternRef,
        }
    }

    /// A zero or null value of the given type, used for missing
    /// initializers and defaulted locals.
    pub fn default_for(ty: ValType) -> Val {
        match ty {
            ValType::I32 => Val::I32(0),
            ValType::I64 => Val::I64(0),
            ValType::F32 => Val::F32(0),
            ValType::F64 => Val::F64(0),
            ValType::V128 => Val::V128(0),
            ValType::FuncRef => Val::FuncRef(None),
            ValType::ExternRef => Val::ExternRef(None),
        }
    }

    pub fn i32(&self) -> Option<i32> {
        match self {
            Val::I32(v) => Some(*v),
            _ => None,
        }
    }

    pub fn i64(&self) -> Option<i64> {
        match self {
            Val::I64(v) => Some(*v),
            _ => None,
        }
    }

    /// The `f32` value, decoded from its bits.
    pub fn f32(&self) -> Option<f32> {
        match self {
            Val::F32(bits) => Some(f32::from_bits(*bits)),
            _ => None,
        }
    }

    /// The `f64` value, decoded from its bits.
    pub fn f64(&self) -> Option<f64> {
        match self {
            Val::F64(bits) => Some(f64::from_bits(*bits)),
            _ => None,
        }
    }

    pub fn v128(&self) -> Option<u128> {
        match self {
            Val::V128(v) => Some(*v),
            _ => None,
        }
    }

    pub fn unwrap_i32(&self) -> i32 {
        self.i32().expect("expected an i32")
    }

    pub fn unwrap_i64(&self) -> i64 {
        self.i64().expect("expected an i64")
    }

    pub fn unwrap_f32(&self) -> f32 {
        self.f32().expect("expected an f32")
    }

    pub fn unwrap_f64(&self) -> f64 {
        self.f64().expect("expected an f64")
    }

    pub fn unwrap_v128(&self) -> u128 {
        self.v128().expect("expected a v128")
    }

    pub fn unwrap_funcref(&self) -> Option<&Func> {
        match self {
            Val::FuncRef(f) => f.as_ref(),
            _ => panic!("expected a funcref"),
        }
    }

    pub fn unwrap_externref(&self) -> Option<&ExternRef> {
        match self {
            Val::ExternRef(r) => r.as_ref(),
            _ => panic!("expected an externref"),
        }
    }
}

impl From<i32> for Val {
    fn from(value: i32) -> Val {
        Val::I32(value)
    }
}

impl From<i64> for Val {
    fn from(value: i64) -> Val {
        Val::I64(value)
    }
}

impl From<f32> for Val {
    fn from(value: f32) -> Val {
        Val::F32(value.to_bits())
    }
}

impl From<f64> for Val {
    fn from(value: f64) -> Val {
        Val::F64(value.to_bits())
    }
}

impl From<Option<ExternRef>> for Val {
    fn from(value: Option<ExternRef>) -> Val {
        Val::ExternRef(value)
    }
}

impl From<Option<Func>> for Val {
    fn from(value: Option<Func>) -> Val {
        Val::FuncRef(value)
    }
}
