//! WebAssembly type descriptions used throughout the runtime.

use crate::indices::{FuncIndex, GlobalIndex, MemoryIndex, TableIndex, TypeIndex};
use std::fmt;
use std::sync::Arc;

/// The type of a WebAssembly value.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub enum ValType {
    /// 32-bit integer.
    I32,
    /// 64-bit integer.
    I64,
    /// 32-bit float.
    F32,
    /// 64-bit float.
    F64,
    /// 128-bit vector.
    V128,
    /// A nullable reference to a function.
    FuncRef,
    /// A nullable reference to host data.
    ExternRef,
}

impl ValType {
    /// Is this a numeric (non-reference, non-vector) type?
    pub fn is_num(&self) -> bool {
        matches!(self, ValType::I32 | ValType::I64 | ValType::F32 | ValType::F64)
    }

    /// Is this a reference type?
    pub fn is_ref(&self) -> bool {
        matches!(self, ValType::FuncRef | ValType::ExternRef)
    }
}

impl fmt::Display for ValType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ValType::I32 => "i32",
            ValType::I64 => "i64",
            ValType::F32 => "f32",
            ValType::F64 => "f64",
            ValType::V128 => "v128",
            ValType::FuncRef => "funcref",
            ValType::ExternRef => "externref",
        })
    }
}

/// The signature of a function: parameter and result types.
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub struct FuncType {
    params: Arc<[ValType]>,
    results: Arc<[ValType]>,
}

impl FuncType {
    /// Creates a new signature from the given parameter and result types.
    pub fn new(
        params: impl IntoIterator<Item = ValType>,
        results: impl IntoIterator<Item = ValType>,
    ) -> FuncType {
        FuncType {
            params: params.into_iter().collect(),
            results: results.into_iter().collect(),
        }
    }

    /// The parameter types, in order.
    pub fn params(&self) -> &[ValType] {
        &self.params
    }

    /// The result types, in order.
    pub fn results(&self) -> &[ValType] {
        &self.results
    }
}

impl fmt::Display for FuncType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(func")?;
        if !self.params.is_empty() {
            write!(f, " (param")?;
            for p in self.params.iter() {
                write!(f, " {p}")?;
            }
            write!(f, ")")?;
        }
        if !self.results.is_empty() {
            write!(f, " (result")?;
            for r in self.results.iter() {
                write!(f, " {r}")?;
            }
            write!(f, ")")?;
        }
        write!(f, ")")
    }
}

/// A WebAssembly linear memory description.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub struct Memory {
    /// The minimum number of pages.
    pub minimum: u64,
    /// The maximum number of pages, if one was declared.
    pub maximum: Option<u64>,
    /// Whether this memory is shared between threads.
    pub shared: bool,
}

/// A WebAssembly table description.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub struct Table {
    /// The type of element stored in the table.
    pub element: ValType,
    /// The minimum number of elements.
    pub minimum: u32,
    /// The maximum number of elements, if one was declared.
    pub maximum: Option<u32>,
}

/// A WebAssembly global variable description.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub struct Global {
    /// The type of value stored in the global.
    pub ty: ValType,
    /// Whether the global may be written after instantiation.
    pub mutability: bool,
}

/// The type of an importable/exportable entity.
#[derive(Clone, Debug)]
pub enum EntityType {
    /// A function with the given signature index.
    Function(TypeIndex),
    /// A table.
    Table(Table),
    /// A linear memory.
    Memory(Memory),
    /// A global.
    Global(Global),
}

/// A reference to an entity in one of a module's index spaces.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub enum EntityIndex {
    /// A function.
    Function(FuncIndex),
    /// A table.
    Table(TableIndex),
    /// A linear memory.
    Memory(MemoryIndex),
    /// A global.
    Global(GlobalIndex),
}
