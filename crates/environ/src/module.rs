//! Data structures for representing decoded wasm modules.

use crate::indices::*;
use crate::operators::Operator;
use crate::types::{EntityIndex, EntityType, FuncType, Global, Memory, Table, ValType};
use cranelift_entity::{EntityRef, PrimaryMap};
use indexmap::IndexMap;
use std::collections::HashMap;

/// A constant expression, used for global initializers and segment offsets.
#[derive(Copy, Clone, Debug)]
pub enum ConstExpr {
    /// A constant 32-bit integer.
    I32(i32),
    /// A constant 64-bit integer.
    I64(i64),
    /// A constant 32-bit float (bits).
    F32(u32),
    /// A constant 64-bit float (bits).
    F64(u64),
    /// A constant 128-bit vector.
    V128(u128),
    /// The value of an imported global.
    GlobalGet(GlobalIndex),
    /// A null reference of the given type.
    RefNull(ValType),
    /// A reference to a function.
    RefFunc(FuncIndex),
}

/// An entity imported by a module.
#[derive(Clone, Debug)]
pub struct Import {
    /// The module namespace of the import.
    pub module: String,
    /// The field name of the import.
    pub field: String,
    /// The expected type of the import.
    pub ty: EntityType,
    /// Which index-space slot this import fills.
    pub index: EntityIndex,
}

/// A linear-memory initializer.
#[derive(Clone, Debug)]
pub struct DataSegment {
    /// `Some((memory, offset))` for active segments; `None` for passive
    /// segments awaiting `memory.init`.
    pub active: Option<(MemoryIndex, ConstExpr)>,
    /// The bytes to write.
    pub data: Box<[u8]>,
}

/// How an element segment is applied.
#[derive(Clone, Debug)]
pub enum ElemKind {
    /// Applied at instantiation to the given table at the given offset.
    Active {
        /// The table to initialize.
        table_index: TableIndex,
        /// The (constant) starting offset.
        offset: ConstExpr,
    },
    /// Available to `table.init`.
    Passive,
    /// Only usable to forward-declare functions for `ref.func`.
    Declared,
}

/// A table initializer.
#[derive(Clone, Debug)]
pub struct ElemSegment {
    /// Active/passive/declared mode.
    pub kind: ElemKind,
    /// The element type of the segment.
    pub element: ValType,
    /// The items, each a `RefFunc` or `RefNull` constant expression.
    pub items: Box<[ConstExpr]>,
}

/// The decoded body of a defined function.
#[derive(Clone, Debug, Default)]
pub struct FunctionBody {
    /// Declared local types, expanded (params are not included).
    pub locals: Vec<ValType>,
    /// The operator sequence, terminated by an `End`.
    pub code: Vec<Operator>,
    /// Original module byte offset of each operator, used for trap
    /// diagnostics. Parallel to `code`.
    pub offsets: Vec<u32>,
}

/// A decoded WebAssembly module.
///
/// This is the immutable compile-once artifact shared by every instance:
/// it records the declared entities, their initializers and the decoded
/// function bodies, but no run-time state.
#[derive(Clone, Debug, Default)]
pub struct Module {
    /// The module name from the name section, if present.
    pub name: Option<String>,

    /// Function signatures declared by the type section.
    pub types: PrimaryMap<TypeIndex, FuncType>,

    /// All imports, in declaration order.
    pub imports: Vec<Import>,

    /// The signature of every function, imported functions first.
    pub functions: PrimaryMap<FuncIndex, TypeIndex>,

    /// All tables, imported tables first.
    pub tables: PrimaryMap<TableIndex, Table>,

    /// All memories, imported memories first (at most one memory total).
    pub memories: PrimaryMap<MemoryIndex, Memory>,

    /// All globals, imported globals first.
    pub globals: PrimaryMap<GlobalIndex, Global>,

    /// Initializers for defined globals.
    pub global_initializers: PrimaryMap<DefinedGlobalIndex, ConstExpr>,

    /// Exports, keyed by name, in declaration order.
    pub exports: IndexMap<String, EntityIndex>,

    /// The start function, run at the end of instantiation.
    pub start_func: Option<FuncIndex>,

    /// Data segments in declaration order.
    pub data: Vec<DataSegment>,

    /// Element segments in declaration order.
    pub elements: Vec<ElemSegment>,

    /// Decoded bodies of defined functions.
    pub code: PrimaryMap<DefinedFuncIndex, FunctionBody>,

    /// Function names from the name section.
    pub func_names: HashMap<FuncIndex, String>,

    /// Number of imported functions.
    pub num_imported_funcs: usize,
    /// Number of imported tables.
    pub num_imported_tables: usize,
    /// Number of imported memories.
    pub num_imported_memories: usize,
    /// Number of imported globals.
    pub num_imported_globals: usize,
}

impl Module {
    /// Creates an empty module.
    pub fn new() -> Module {
        Module::default()
    }

    /// Convert a `DefinedFuncIndex` into a `FuncIndex`.
    pub fn func_index(&self, defined: DefinedFuncIndex) -> FuncIndex {
        FuncIndex::from_u32(self.num_imported_funcs as u32 + defined.as_u32())
    }

    /// Convert a `FuncIndex` into a `DefinedFuncIndex`, or `None` if the
    /// function is imported.
    pub fn defined_func_index(&self, func: FuncIndex) -> Option<DefinedFuncIndex> {
        (func.index() >= self.num_imported_funcs)
            .then(|| DefinedFuncIndex::from_u32(func.as_u32() - self.num_imported_funcs as u32))
    }

    /// Is the function with the given index imported?
    pub fn is_imported_function(&self, func: FuncIndex) -> bool {
        func.index() < self.num_imported_funcs
    }

    /// Convert a `DefinedGlobalIndex` into a `GlobalIndex`.
    pub fn global_index(&self, defined: DefinedGlobalIndex) -> GlobalIndex {
        GlobalIndex::from_u32(self.num_imported_globals as u32 + defined.as_u32())
    }

    /// Convert a `GlobalIndex` into a `DefinedGlobalIndex`, or `None` if
    /// the global is imported.
    pub fn defined_global_index(&self, global: GlobalIndex) -> Option<DefinedGlobalIndex> {
        (global.index() >= self.num_imported_globals)
            .then(|| DefinedGlobalIndex::from_u32(global.as_u32() - self.num_imported_globals as u32))
    }

    /// Convert a `TableIndex` into a `DefinedTableIndex`, or `None` if the
    /// table is imported.
    pub fn defined_table_index(&self, table: TableIndex) -> Option<DefinedTableIndex> {
        (table.index() >= self.num_imported_tables)
            .then(|| DefinedTableIndex::from_u32(table.as_u32() - self.num_imported_tables as u32))
    }

    /// The signature of the function with the given index.
    pub fn func_type(&self, func: FuncIndex) -> &FuncType {
        &self.types[self.functions[func]]
    }

    /// A printable name for the function with the given index, for
    /// diagnostics.
    pub fn func_name(&self, func: FuncIndex) -> Option<&str> {
        self.func_names.get(&func).map(|s| s.as_str())
    }
}
