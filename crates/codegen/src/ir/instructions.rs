//! Instruction formats and operators.

use super::{Block, Type, Value};
use riptide_environ::{FuncIndex, GlobalIndex, TableIndex, Trap, TypeIndex};
use smallvec::SmallVec;

/// Integer binary operators without trapping behavior.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
#[allow(missing_docs)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    And,
    Or,
    Xor,
    Shl,
    ShrS,
    ShrU,
    Rotl,
    Rotr,
}

/// Integer division and remainder, which can trap.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
#[allow(missing_docs)]
pub enum DivOp {
    DivS,
    DivU,
    RemS,
    RemU,
}

/// Integer unary operators.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
#[allow(missing_docs)]
pub enum IntUnaryOp {
    Clz,
    Ctz,
    Popcnt,
    Extend8S,
    Extend16S,
    /// Only valid on i64.
    Extend32S,
}

/// Integer comparison conditions.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
#[allow(missing_docs)]
pub enum IntCC {
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
}

/// Float comparison conditions, all with wasm's NaN semantics.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
#[allow(missing_docs)]
pub enum FloatCC {
    Eq,
    Ne,
    Lt,
    Gt,
    Le,
    Ge,
}

/// Float unary operators.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
#[allow(missing_docs)]
pub enum FloatUnaryOp {
    Neg,
    Abs,
    Sqrt,
    Ceil,
    Floor,
    Trunc,
    Nearest,
}

/// Float binary operators.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
#[allow(missing_docs)]
pub enum FloatBinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Min,
    Max,
    Copysign,
}

/// Conversions the backend selects directly. Float-to-integer
/// truncations are deliberately absent; the frontend refuses them and
/// the function falls back to the interpreter.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
#[allow(missing_docs)]
pub enum ConvertOp {
    I32WrapI64,
    I64ExtendI32S,
    I64ExtendI32U,
    F32DemoteF64,
    F64PromoteF32,
    F32FromI32S,
    F32FromI64S,
    F64FromI32S,
    F64FromI64S,
    /// Unsigned 32-bit converts go through a zero-extend to 64 bits and
    /// a signed convert.
    F32FromI32U,
    F64FromI32U,
    BitcastI32ToF32,
    BitcastF32ToI32,
    BitcastI64ToF64,
    BitcastF64ToI64,
}

impl ConvertOp {
    /// The result type of the conversion.
    pub fn result_type(self) -> Type {
        use ConvertOp::*;
        match self {
            I32WrapI64 | BitcastF32ToI32 => Type::I32,
            I64ExtendI32S | I64ExtendI32U | BitcastF64ToI64 => Type::I64,
            F32DemoteF64 | F32FromI32S | F32FromI64S | F32FromI32U | BitcastI32ToF32 => Type::F32,
            F64PromoteF32 | F64FromI32S | F64FromI64S | F64FromI32U | BitcastI64ToF64 => Type::F64,
        }
    }
}

/// The width and extension of a memory load.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
#[allow(missing_docs)]
pub enum LoadKind {
    I32,
    I64,
    F32,
    F64,
    I32S8,
    I32U8,
    I32S16,
    I32U16,
    I64S8,
    I64U8,
    I64S16,
    I64U16,
    I64S32,
    I64U32,
}

impl LoadKind {
    /// The type of the loaded value.
    pub fn result_type(self) -> Type {
        use LoadKind::*;
        match self {
            I32 | I32S8 | I32U8 | I32S16 | I32U16 => Type::I32,
            I64 | I64S8 | I64U8 | I64S16 | I64U16 | I64S32 | I64U32 => Type::I64,
            F32 => Type::F32,
            F64 => Type::F64,
        }
    }

    /// The number of bytes accessed.
    pub fn bytes(self) -> u32 {
        use LoadKind::*;
        match self {
            I32S8 | I32U8 | I64S8 | I64U8 => 1,
            I32S16 | I32U16 | I64S16 | I64U16 => 2,
            I32 | F32 | I64S32 | I64U32 => 4,
            I64 | F64 => 8,
        }
    }
}

/// The width of a memory store. Narrow integer stores write the low bits
/// of their operand, which covers both the i32 and i64 store-narrow
/// instructions.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
#[allow(missing_docs)]
pub enum StoreKind {
    I8,
    I16,
    I32,
    I64,
    F32,
    F64,
}

impl StoreKind {
    /// The number of bytes accessed.
    pub fn bytes(self) -> u32 {
        use StoreKind::*;
        match self {
            I8 => 1,
            I16 => 2,
            I32 | F32 => 4,
            I64 | F64 => 8,
        }
    }
}

/// An instruction.
#[derive(Clone, Debug)]
pub enum InstData {
    /// An integer constant of the given type.
    Iconst { ty: Type, bits: u64 },
    /// A float constant; `bits` is the raw encoding.
    Fconst { ty: Type, bits: u64 },
    Binary { op: BinaryOp, ty: Type, args: [Value; 2] },
    /// Division or remainder; traps on zero divisors and signed
    /// overflow at the given wasm offset.
    Div { op: DivOp, ty: Type, args: [Value; 2], wasm_offset: u32 },
    IntUnary { op: IntUnaryOp, ty: Type, arg: Value },
    /// Integer comparison producing 0 or 1 as i32.
    Icmp { cond: IntCC, ty: Type, args: [Value; 2] },
    /// Float comparison producing 0 or 1 as i32.
    Fcmp { cond: FloatCC, ty: Type, args: [Value; 2] },
    FloatUnary { op: FloatUnaryOp, ty: Type, arg: Value },
    FloatBinary { op: FloatBinaryOp, ty: Type, args: [Value; 2] },
    Convert { op: ConvertOp, arg: Value },
    /// `args[0] != 0 ? args[1] : args[2]`.
    Select { ty: Type, args: [Value; 3] },
    /// A bounds-checked access to linear memory at `index + offset`.
    Load { kind: LoadKind, index: Value, offset: u32, wasm_offset: u32 },
    Store { kind: StoreKind, index: Value, value: Value, offset: u32, wasm_offset: u32 },
    /// `memory.size`, in pages.
    MemorySize,
    /// `memory.grow` by the argument, via the runtime builtin.
    MemoryGrow { arg: Value },
    GlobalGet { index: GlobalIndex, ty: Type },
    GlobalSet { index: GlobalIndex, arg: Value },
    Call { func: FuncIndex, args: SmallVec<[Value; 4]>, wasm_offset: u32 },
    CallIndirect {
        type_index: TypeIndex,
        table_index: TableIndex,
        callee: Value,
        args: SmallVec<[Value; 4]>,
        wasm_offset: u32,
    },
    /// Unconditional jump, the only branch that carries arguments.
    Jump { dest: Block, args: SmallVec<[Value; 4]> },
    /// Two-way branch on `cond != 0`; both targets must be parameterless.
    Brif { cond: Value, then_dest: Block, else_dest: Block },
    /// Multi-way branch; all targets must be parameterless.
    BrTable { index: Value, targets: Vec<Block>, default: Block },
    Return { args: SmallVec<[Value; 4]> },
    /// Unconditional trap.
    Trap { code: Trap, wasm_offset: u32 },
}

impl InstData {
    /// Whether this instruction ends a block.
    pub fn is_terminator(&self) -> bool {
        matches!(
            self,
            InstData::Jump { .. }
                | InstData::Brif { .. }
                | InstData::BrTable { .. }
                | InstData::Return { .. }
                | InstData::Trap { .. }
        )
    }

    /// Whether the instruction has a side effect that keeps it alive
    /// even when its results are unused. Traps count: dead-code
    /// elimination must not delete a trapping division or memory access.
    pub fn has_side_effect(&self) -> bool {
        matches!(
            self,
            InstData::Div { .. }
                | InstData::Load { .. }
                | InstData::Store { .. }
                | InstData::MemorySize
                | InstData::MemoryGrow { .. }
                | InstData::GlobalGet { .. }
                | InstData::GlobalSet { .. }
                | InstData::Call { .. }
                | InstData::CallIndirect { .. }
        ) || self.is_terminator()
    }

    /// Calls `f` for every value the instruction uses.
    pub fn for_each_arg(&self, mut f: impl FnMut(Value)) {
        use InstData::*;
        match self {
            Iconst { .. } | Fconst { .. } | MemorySize | GlobalGet { .. } | Trap { .. } => {}
            Binary { args, .. }
            | Div { args, .. }
            | Icmp { args, .. }
            | Fcmp { args, .. }
            | FloatBinary { args, .. } => {
                f(args[0]);
                f(args[1]);
            }
            IntUnary { arg, .. }
            | FloatUnary { arg, .. }
            | Convert { arg, .. }
            | MemoryGrow { arg }
            | GlobalSet { arg, .. } => f(*arg),
            Select { args, .. } => {
                f(args[0]);
                f(args[1]);
                f(args[2]);
            }
            Load { index, .. } => f(*index),
            Store { index, value, .. } => {
                f(*index);
                f(*value);
            }
            Call { args, .. } => args.iter().copied().for_each(f),
            CallIndirect { callee, args, .. } => {
                f(*callee);
                args.iter().copied().for_each(f);
            }
            Jump { args, .. } => args.iter().copied().for_each(f),
            Brif { cond, .. } => f(*cond),
            BrTable { index, .. } => f(*index),
            Return { args } => args.iter().copied().for_each(f),
        }
    }

    /// Calls `f` with a mutable reference to every value the instruction
    /// uses, for rewriting.
    pub fn map_args(&mut self, mut f: impl FnMut(&mut Value)) {
        use InstData::*;
        match self {
            Iconst { .. } | Fconst { .. } | MemorySize | GlobalGet { .. } | Trap { .. } => {}
            Binary { args, .. }
            | Div { args, .. }
            | Icmp { args, .. }
            | Fcmp { args, .. }
            | FloatBinary { args, .. } => {
                f(&mut args[0]);
                f(&mut args[1]);
            }
            IntUnary { arg, .. }
            | FloatUnary { arg, .. }
            | Convert { arg, .. }
            | MemoryGrow { arg }
            | GlobalSet { arg, .. } => f(arg),
            Select { args, .. } => {
                f(&mut args[0]);
                f(&mut args[1]);
                f(&mut args[2]);
            }
            Load { index, .. } => f(index),
            Store { index, value, .. } => {
                f(index);
                f(value);
            }
            Call { args, .. } => args.iter_mut().for_each(f),
            CallIndirect { callee, args, .. } => {
                f(callee);
                args.iter_mut().for_each(f);
            }
            Jump { args, .. } => args.iter_mut().for_each(f),
            Brif { cond, .. } => f(cond),
            BrTable { index, .. } => f(index),
            Return { args } => args.iter_mut().for_each(f),
        }
    }

    /// Calls `f` for every block this terminator can branch to.
    pub fn for_each_target(&self, mut f: impl FnMut(Block)) {
        match self {
            InstData::Jump { dest, .. } => f(*dest),
            InstData::Brif { then_dest, else_dest, .. } => {
                f(*then_dest);
                f(*else_dest);
            }
            InstData::BrTable { targets, default, .. } => {
                for &target in targets {
                    f(target);
                }
                f(*default);
            }
            _ => {}
        }
    }
}
