//! The decoded operator set.
//!
//! One enum variant per MVP instruction; the atomic and vector proposals
//! are represented with parameterized variants to keep the matchers that
//! consume them manageable.

use crate::indices::{DataIndex, ElemIndex};
use crate::types::ValType;

/// The label type of a block, loop or if.
#[derive(Copy, Clone, Debug)]
pub enum BlockType {
    /// No parameters, no results.
    Empty,
    /// No parameters, one result.
    Value(ValType),
    /// An arbitrary signature from the type section (multi-value).
    Func(crate::indices::TypeIndex),
}

/// The static immediate of a memory access.
#[derive(Copy, Clone, Debug)]
pub struct MemArg {
    /// Constant offset added to the dynamic address.
    pub offset: u32,
    /// Expected alignment, as a power of two.
    pub align: u32,
}

/// The width of an atomic access, in bytes.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum AtomicWidth {
    /// 8-bit access (zero-extended).
    W8,
    /// 16-bit access (zero-extended).
    W16,
    /// 32-bit access.
    W32,
    /// 64-bit access.
    W64,
}

impl AtomicWidth {
    /// Size of the access in bytes.
    pub fn bytes(&self) -> u32 {
        match self {
            AtomicWidth::W8 => 1,
            AtomicWidth::W16 => 2,
            AtomicWidth::W32 => 4,
            AtomicWidth::W64 => 8,
        }
    }
}

/// A read-modify-write atomic operation.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum AtomicRmwOp {
    /// Atomic add.
    Add,
    /// Atomic subtract.
    Sub,
    /// Atomic bitwise and.
    And,
    /// Atomic bitwise or.
    Or,
    /// Atomic bitwise xor.
    Xor,
    /// Atomic exchange.
    Xchg,
}

/// Lane shape of a vector operation.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum SimdShape {
    /// Sixteen 8-bit lanes.
    I8x16,
    /// Eight 16-bit lanes.
    I16x8,
    /// Four 32-bit lanes.
    I32x4,
    /// Two 64-bit lanes.
    I64x2,
    /// Four single-precision lanes.
    F32x4,
    /// Two double-precision lanes.
    F64x2,
}

impl SimdShape {
    /// The number of lanes of this shape.
    pub fn lanes(&self) -> u8 {
        match self {
            SimdShape::I8x16 => 16,
            SimdShape::I16x8 => 8,
            SimdShape::I32x4 | SimdShape::F32x4 => 4,
            SimdShape::I64x2 | SimdShape::F64x2 => 2,
        }
    }

    /// Is this a floating-point shape?
    pub fn is_float(&self) -> bool {
        matches!(self, SimdShape::F32x4 | SimdShape::F64x2)
    }
}

/// A lane-wise binary vector operation.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
#[allow(missing_docs)]
pub enum SimdBinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Min,
    Max,
    Eq,
    Ne,
    LtS,
    LtU,
    GtS,
    GtU,
    LeS,
    LeU,
    GeS,
    GeU,
    Lt,
    Gt,
    Le,
    Ge,
}

/// A lane-wise unary vector operation.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
#[allow(missing_docs)]
pub enum SimdUnaryOp {
    Neg,
    Abs,
    Sqrt,
    AllTrue,
}

/// A vector shift operation.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
#[allow(missing_docs)]
pub enum SimdShiftOp {
    Shl,
    ShrS,
    ShrU,
}

/// A single decoded instruction.
#[derive(Clone, Debug)]
#[allow(missing_docs)]
pub enum Operator {
    // Control.
    Unreachable,
    Nop,
    Block { ty: BlockType },
    Loop { ty: BlockType },
    If { ty: BlockType },
    Else,
    End,
    Br { relative_depth: u32 },
    BrIf { relative_depth: u32 },
    BrTable { targets: Box<[u32]>, default: u32 },
    Return,
    Call { function_index: u32 },
    CallIndirect { type_index: u32, table_index: u32 },

    // Parametric.
    Drop,
    Select,
    TypedSelect { ty: ValType },

    // Variables.
    LocalGet { local_index: u32 },
    LocalSet { local_index: u32 },
    LocalTee { local_index: u32 },
    GlobalGet { global_index: u32 },
    GlobalSet { global_index: u32 },

    // Tables.
    TableGet { table: u32 },
    TableSet { table: u32 },
    TableInit { elem_index: ElemIndex, table: u32 },
    ElemDrop { elem_index: ElemIndex },
    TableCopy { dst_table: u32, src_table: u32 },
    TableGrow { table: u32 },
    TableSize { table: u32 },
    TableFill { table: u32 },

    // Memory loads.
    I32Load { memarg: MemArg },
    I64Load { memarg: MemArg },
    F32Load { memarg: MemArg },
    F64Load { memarg: MemArg },
    I32Load8S { memarg: MemArg },
    I32Load8U { memarg: MemArg },
    I32Load16S { memarg: MemArg },
    I32Load16U { memarg: MemArg },
    I64Load8S { memarg: MemArg },
    I64Load8U { memarg: MemArg },
    I64Load16S { memarg: MemArg },
    I64Load16U { memarg: MemArg },
    I64Load32S { memarg: MemArg },
    I64Load32U { memarg: MemArg },

    // Memory stores.
    I32Store { memarg: MemArg },
    I64Store { memarg: MemArg },
    F32Store { memarg: MemArg },
    F64Store { memarg: MemArg },
    I32Store8 { memarg: MemArg },
    I32Store16 { memarg: MemArg },
    I64Store8 { memarg: MemArg },
    I64Store16 { memarg: MemArg },
    I64Store32 { memarg: MemArg },

    // Memory management.
    MemorySize,
    MemoryGrow,
    MemoryInit { data_index: DataIndex },
    DataDrop { data_index: DataIndex },
    MemoryCopy,
    MemoryFill,

    // Constants.
    I32Const { value: i32 },
    I64Const { value: i64 },
    F32Const { value: u32 },
    F64Const { value: u64 },

    // i32 comparisons.
    I32Eqz,
    I32Eq,
    I32Ne,
    I32LtS,
    I32LtU,
    I32GtS,
    I32GtU,
    I32LeS,
    I32LeU,
    I32GeS,
    I32GeU,

    // i64 comparisons.
    I64Eqz,
    I64Eq,
    I64Ne,
    I64LtS,
    I64LtU,
    I64GtS,
    I64GtU,
    I64LeS,
    I64LeU,
    I64GeS,
    I64GeU,

    // Float comparisons.
    F32Eq,
    F32Ne,
    F32Lt,
    F32Gt,
    F32Le,
    F32Ge,
    F64Eq,
    F64Ne,
    F64Lt,
    F64Gt,
    F64Le,
    F64Ge,

    // i32 arithmetic.
    I32Clz,
    I32Ctz,
    I32Popcnt,
    I32Add,
    I32Sub,
    I32Mul,
    I32DivS,
    I32DivU,
    I32RemS,
    I32RemU,
    I32And,
    I32Or,
    I32Xor,
    I32Shl,
    I32ShrS,
    I32ShrU,
    I32Rotl,
    I32Rotr,

    // i64 arithmetic.
    I64Clz,
    I64Ctz,
    I64Popcnt,
    I64Add,
    I64Sub,
    I64Mul,
    I64DivS,
    I64DivU,
    I64RemS,
    I64RemU,
    I64And,
    I64Or,
    I64Xor,
    I64Shl,
    I64ShrS,
    I64ShrU,
    I64Rotl,
    I64Rotr,

    // f32 arithmetic.
    F32Abs,
    F32Neg,
    F32Ceil,
    F32Floor,
    F32Trunc,
    F32Nearest,
    F32Sqrt,
    F32Add,
    F32Sub,
    F32Mul,
    F32Div,
    F32Min,
    F32Max,
    F32Copysign,

    // f64 arithmetic.
    F64Abs,
    F64Neg,
    F64Ceil,
    F64Floor,
    F64Trunc,
    F64Nearest,
    F64Sqrt,
    F64Add,
    F64Sub,
    F64Mul,
    F64Div,
    F64Min,
    F64Max,
    F64Copysign,

    // Conversions.
    I32WrapI64,
    I32TruncF32S,
    I32TruncF32U,
    I32TruncF64S,
    I32TruncF64U,
    I64ExtendI32S,
    I64ExtendI32U,
    I64TruncF32S,
    I64TruncF32U,
    I64TruncF64S,
    I64TruncF64U,
    F32ConvertI32S,
    F32ConvertI32U,
    F32ConvertI64S,
    F32ConvertI64U,
    F32DemoteF64,
    F64ConvertI32S,
    F64ConvertI32U,
    F64ConvertI64S,
    F64ConvertI64U,
    F64PromoteF32,
    I32ReinterpretF32,
    I64ReinterpretF64,
    F32ReinterpretI32,
    F64ReinterpretI64,

    // Sign extension.
    I32Extend8S,
    I32Extend16S,
    I64Extend8S,
    I64Extend16S,
    I64Extend32S,

    // Saturating truncation.
    I32TruncSatF32S,
    I32TruncSatF32U,
    I32TruncSatF64S,
    I32TruncSatF64U,
    I64TruncSatF32S,
    I64TruncSatF32U,
    I64TruncSatF64S,
    I64TruncSatF64U,

    // Reference types.
    RefNull { ty: ValType },
    RefIsNull,
    RefFunc { function_index: u32 },

    // Atomics.
    MemoryAtomicNotify { memarg: MemArg },
    MemoryAtomicWait32 { memarg: MemArg },
    MemoryAtomicWait64 { memarg: MemArg },
    AtomicFence,
    AtomicLoad { ty: ValType, width: AtomicWidth, memarg: MemArg },
    AtomicStore { ty: ValType, width: AtomicWidth, memarg: MemArg },
    AtomicRmw { op: AtomicRmwOp, ty: ValType, width: AtomicWidth, memarg: MemArg },
    AtomicCmpxchg { ty: ValType, width: AtomicWidth, memarg: MemArg },

    // Vectors (supported subset).
    V128Load { memarg: MemArg },
    V128Store { memarg: MemArg },
    V128Const { value: u128 },
    I8x16Shuffle { lanes: [u8; 16] },
    I8x16Swizzle,
    V128Not,
    V128And,
    V128AndNot,
    V128Or,
    V128Xor,
    V128Bitselect,
    V128AnyTrue,
    SimdSplat { shape: SimdShape },
    SimdExtractLane { shape: SimdShape, lane: u8, signed: bool },
    SimdReplaceLane { shape: SimdShape, lane: u8 },
    SimdBinary { op: SimdBinaryOp, shape: SimdShape },
    SimdUnary { op: SimdUnaryOp, shape: SimdShape },
    SimdShift { op: SimdShiftOp, shape: SimdShape },
}
