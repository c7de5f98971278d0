//! Decoding of function-body operators.

use super::reader::BinaryReader;
use crate::error::{WasmError, WasmResult};
use crate::features::WasmFeatures;
use crate::indices::{DataIndex, ElemIndex, TypeIndex};
use crate::operators::*;
use crate::types::ValType;
use crate::wasm_unsupported;
use cranelift_entity::EntityRef;

/// Reads a block type immediate.
pub fn read_block_type(r: &mut BinaryReader<'_>, features: &WasmFeatures) -> WasmResult<BlockType> {
    let offset = r.offset();
    let v = r.read_var_s33()?;
    match v {
        -0x40 => Ok(BlockType::Empty),
        -0x01 => Ok(BlockType::Value(ValType::I32)),
        -0x02 => Ok(BlockType::Value(ValType::I64)),
        -0x03 => Ok(BlockType::Value(ValType::F32)),
        -0x04 => Ok(BlockType::Value(ValType::F64)),
        -0x05 => Ok(BlockType::Value(ValType::V128)),
        -0x10 => Ok(BlockType::Value(ValType::FuncRef)),
        -0x11 => Ok(BlockType::Value(ValType::ExternRef)),
        v if v >= 0 => {
            if !features.multi_value {
                return Err(wasm_unsupported!(
                    "multi-value block types require the multi-value feature"
                ));
            }
            Ok(BlockType::Func(TypeIndex::new(v as usize)))
        }
        _ => Err(WasmError::invalid("invalid block type", offset)),
    }
}

fn require(enabled: bool, what: &str) -> WasmResult<()> {
    if enabled {
        Ok(())
    } else {
        Err(wasm_unsupported!("{what} support is not enabled"))
    }
}

/// Reads a single operator from `r`.
pub fn read_operator(r: &mut BinaryReader<'_>, features: &WasmFeatures) -> WasmResult<Operator> {
    use Operator as O;
    let offset = r.offset();
    let opcode = r.read_u8()?;
    Ok(match opcode {
        0x00 => O::Unreachable,
        0x01 => O::Nop,
        0x02 => O::Block { ty: read_block_type(r, features)? },
        0x03 => O::Loop { ty: read_block_type(r, features)? },
        0x04 => O::If { ty: read_block_type(r, features)? },
        0x05 => O::Else,
        0x0b => O::End,
        0x0c => O::Br { relative_depth: r.read_var_u32()? },
        0x0d => O::BrIf { relative_depth: r.read_var_u32()? },
        0x0e => {
            let count = r.read_var_u32()?;
            let mut targets = Vec::with_capacity(count.min(1024) as usize);
            for _ in 0..count {
                targets.push(r.read_var_u32()?);
            }
            O::BrTable { targets: targets.into(), default: r.read_var_u32()? }
        }
        0x0f => O::Return,
        0x10 => O::Call { function_index: r.read_var_u32()? },
        0x11 => {
            let type_index = r.read_var_u32()?;
            let table_index = r.read_var_u32()?;
            O::CallIndirect { type_index, table_index }
        }

        0x1a => O::Drop,
        0x1b => O::Select,
        0x1c => {
            require(features.reference_types, "reference types")?;
            let count = r.read_var_u32()?;
            if count != 1 {
                return Err(WasmError::invalid("invalid select arity", offset));
            }
            O::TypedSelect { ty: r.read_val_type()? }
        }

        0x20 => O::LocalGet { local_index: r.read_var_u32()? },
        0x21 => O::LocalSet { local_index: r.read_var_u32()? },
        0x22 => O::LocalTee { local_index: r.read_var_u32()? },
        0x23 => O::GlobalGet { global_index: r.read_var_u32()? },
        0x24 => O::GlobalSet { global_index: r.read_var_u32()? },
        0x25 => {
            require(features.reference_types, "reference types")?;
            O::TableGet { table: r.read_var_u32()? }
        }
        0x26 => {
            require(features.reference_types, "reference types")?;
            O::TableSet { table: r.read_var_u32()? }
        }

        0x28 => O::I32Load { memarg: r.read_memarg()? },
        0x29 => O::I64Load { memarg: r.read_memarg()? },
        0x2a => O::F32Load { memarg: r.read_memarg()? },
        0x2b => O::F64Load { memarg: r.read_memarg()? },
        0x2c => O::I32Load8S { memarg: r.read_memarg()? },
        0x2d => O::I32Load8U { memarg: r.read_memarg()? },
        0x2e => O::I32Load16S { memarg: r.read_memarg()? },
        0x2f => O::I32Load16U { memarg: r.read_memarg()? },
        0x30 => O::I64Load8S { memarg: r.read_memarg()? },
        0x31 => O::I64Load8U { memarg: r.read_memarg()? },
        0x32 => O::I64Load16S { memarg: r.read_memarg()? },
        0x33 => O::I64Load16U { memarg: r.read_memarg()? },
        0x34 => O::I64Load32S { memarg: r.read_memarg()? },
        0x35 => O::I64Load32U { memarg: r.read_memarg()? },
        0x36 => O::I32Store { memarg: r.read_memarg()? },
        0x37 => O::I64Store { memarg: r.read_memarg()? },
        0x38 => O::F32Store { memarg: r.read_memarg()? },
        0x39 => O::F64Store { memarg: r.read_memarg()? },
        0x3a => O::I32Store8 { memarg: r.read_memarg()? },
        0x3b => O::I32Store16 { memarg: r.read_memarg()? },
        0x3c => O::I64Store8 { memarg: r.read_memarg()? },
        0x3d => O::I64Store16 { memarg: r.read_memarg()? },
        0x3e => O::I64Store32 { memarg: r.read_memarg()? },
        0x3f => {
            expect_zero_byte(r, "memory.size")?;
            O::MemorySize
        }
        0x40 => {
            expect_zero_byte(r, "memory.grow")?;
            O::MemoryGrow
        }

        0x41 => O::I32Const { value: r.read_var_i32()? },
        0x42 => O::I64Const { value: r.read_var_i64()? },
        0x43 => O::F32Const { value: r.read_f32()? },
        0x44 => O::F64Const { value: r.read_f64()? },

        0x45 => O::I32Eqz,
        0x46 => O::I32Eq,
        0x47 => O::I32Ne,
        0x48 => O::I32LtS,
        0x49 => O::I32LtU,
        0x4a => O::I32GtS,
        0x4b => O::I32GtU,
        0x4c => O::I32LeS,
        0x4d => O::I32LeU,
        0x4e => O::I32GeS,
        0x4f => O::I32GeU,

        0x50 => O::I64Eqz,
        0x51 => O::I64Eq,
        0x52 => O::I64Ne,
        0x53 => O::I64LtS,
        0x54 => O::I64LtU,
        0x55 => O::I64GtS,
        0x56 => O::I64GtU,
        0x57 => O::I64LeS,
        0x58 => O::I64LeU,
        0x59 => O::I64GeS,
        0x5a => O::I64GeU,

        0x5b => O::F32Eq,
        0x5c => O::F32Ne,
        0x5d => O::F32Lt,
        0x5e => O::F32Gt,
        0x5f => O::F32Le,
        0x60 => O::F32Ge,
        0x61 => O::F64Eq,
        0x62 => O::F64Ne,
        0x63 => O::F64Lt,
        0x64 => O::F64Gt,
        0x65 => O::F64Le,
        0x66 => O::F64Ge,

        0x67 => O::I32Clz,
        0x68 => O::I32Ctz,
        0x69 => O::I32Popcnt,
        0x6a => O::I32Add,
        0x6b => O::I32Sub,
        0x6c => O::I32Mul,
        0x6d => O::I32DivS,
        0x6e => O::I32DivU,
        0x6f => O::I32RemS,
        0x70 => O::I32RemU,
        0x71 => O::I32And,
        0x72 => O::I32Or,
        0x73 => O::I32Xor,
        0x74 => O::I32Shl,
        0x75 => O::I32ShrS,
        0x76 => O::I32ShrU,
        0x77 => O::I32Rotl,
        0x78 => O::I32Rotr,

        0x79 => O::I64Clz,
        0x7a => O::I64Ctz,
        0x7b => O::I64Popcnt,
        0x7c => O::I64Add,
        0x7d => O::I64Sub,
        0x7e => O::I64Mul,
        0x7f => O::I64DivS,
        0x80 => O::I64DivU,
        0x81 => O::I64RemS,
        0x82 => O::I64RemU,
        0x83 => O::I64And,
        0x84 => O::I64Or,
        0x85 => O::I64Xor,
        0x86 => O::I64Shl,
        0x87 => O::I64ShrS,
        0x88 => O::I64ShrU,
        0x89 => O::I64Rotl,
        0x8a => O::I64Rotr,

        0x8b => O::F32Abs,
        0x8c => O::F32Neg,
        0x8d => O::F32Ceil,
        0x8e => O::F32Floor,
        0x8f => O::F32Trunc,
        0x90 => O::F32Nearest,
        0x91 => O::F32Sqrt,
        0x92 => O::F32Add,
        0x93 => O::F32Sub,
        0x94 => O::F32Mul,
        0x95 => O::F32Div,
        0x96 => O::F32Min,
        0x97 => O::F32Max,
        0x98 => O::F32Copysign,

        0x99 => O::F64Abs,
        0x9a => O::F64Neg,
        0x9b => O::F64Ceil,
        0x9c => O::F64Floor,
        0x9d => O::F64Trunc,
        0x9e => O::F64Nearest,
        0x9f => O::F64Sqrt,
        0xa0 => O::F64Add,
        0xa1 => O::F64Sub,
        0xa2 => O::F64Mul,
        0xa3 => O::F64Div,
        0xa4 => O::F64Min,
        0xa5 => O::F64Max,
        0xa6 => O::F64Copysign,

        0xa7 => O::I32WrapI64,
        0xa8 => O::I32TruncF32S,
        0xa9 => O::I32TruncF32U,
        0xaa => O::I32TruncF64S,
        0xab => O::I32TruncF64U,
        0xac => O::I64ExtendI32S,
        0xad => O::I64ExtendI32U,
        0xae => O::I64TruncF32S,
        0xaf => O::I64TruncF32U,
        0xb0 => O::I64TruncF64S,
        0xb1 => O::I64TruncF64U,
        0xb2 => O::F32ConvertI32S,
        0xb3 => O::F32ConvertI32U,
        0xb4 => O::F32ConvertI64S,
        0xb5 => O::F32ConvertI64U,
        0xb6 => O::F32DemoteF64,
        0xb7 => O::F64ConvertI32S,
        0xb8 => O::F64ConvertI32U,
        0xb9 => O::F64ConvertI64S,
        0xba => O::F64ConvertI64U,
        0xbb => O::F64PromoteF32,
        0xbc => O::I32ReinterpretF32,
        0xbd => O::I64ReinterpretF64,
        0xbe => O::F32ReinterpretI32,
        0xbf => O::F64ReinterpretI64,

        0xc0..=0xc4 => {
            require(features.sign_extension, "sign extension")?;
            match opcode {
                0xc0 => O::I32Extend8S,
                0xc1 => O::I32Extend16S,
                0xc2 => O::I64Extend8S,
                0xc3 => O::I64Extend16S,
                _ => O::I64Extend32S,
            }
        }

        0xd0 => {
            require(features.reference_types, "reference types")?;
            let ty = r.read_val_type()?;
            if !ty.is_ref() {
                return Err(WasmError::invalid("invalid reference type", offset));
            }
            O::RefNull { ty }
        }
        0xd1 => {
            require(features.reference_types, "reference types")?;
            O::RefIsNull
        }
        0xd2 => {
            require(features.reference_types, "reference types")?;
            O::RefFunc { function_index: r.read_var_u32()? }
        }

        0xfc => read_fc_operator(r, features, offset)?,
        0xfd => {
            require(features.simd, "SIMD")?;
            read_simd_operator(r, offset)?
        }
        0xfe => {
            require(features.threads, "threads")?;
            read_atomic_operator(r, offset)?
        }

        b => {
            return Err(WasmError::invalid(
                format!("unknown opcode {b:#04x}"),
                offset,
            ))
        }
    })
}

fn expect_zero_byte(r: &mut BinaryReader<'_>, what: &str) -> WasmResult<()> {
    let offset = r.offset();
    if r.read_u8()? != 0 {
        return Err(WasmError::invalid(
            format!("non-zero reserved byte in {what}"),
            offset,
        ));
    }
    Ok(())
}

fn read_fc_operator(
    r: &mut BinaryReader<'_>,
    features: &WasmFeatures,
    offset: usize,
) -> WasmResult<Operator> {
    use Operator as O;
    let sub = r.read_var_u32()?;
    Ok(match sub {
        0..=7 => {
            require(features.saturating_float_to_int, "saturating float-to-int")?;
            match sub {
                0 => O::I32TruncSatF32S,
                1 => O::I32TruncSatF32U,
                2 => O::I32TruncSatF64S,
                3 => O::I32TruncSatF64U,
                4 => O::I64TruncSatF32S,
                5 => O::I64TruncSatF32U,
                6 => O::I64TruncSatF64S,
                _ => O::I64TruncSatF64U,
            }
        }
        8 => {
            require(features.bulk_memory, "bulk memory")?;
            let data_index = DataIndex::from_u32(r.read_var_u32()?);
            expect_zero_byte(r, "memory.init")?;
            O::MemoryInit { data_index }
        }
        9 => {
            require(features.bulk_memory, "bulk memory")?;
            O::DataDrop { data_index: DataIndex::from_u32(r.read_var_u32()?) }
        }
        10 => {
            require(features.bulk_memory, "bulk memory")?;
            expect_zero_byte(r, "memory.copy")?;
            expect_zero_byte(r, "memory.copy")?;
            O::MemoryCopy
        }
        11 => {
            require(features.bulk_memory, "bulk memory")?;
            expect_zero_byte(r, "memory.fill")?;
            O::MemoryFill
        }
        12 => {
            require(features.bulk_memory, "bulk memory")?;
            let elem_index = ElemIndex::from_u32(r.read_var_u32()?);
            O::TableInit { elem_index, table: r.read_var_u32()? }
        }
        13 => {
            require(features.bulk_memory, "bulk memory")?;
            O::ElemDrop { elem_index: ElemIndex::from_u32(r.read_var_u32()?) }
        }
        14 => {
            require(features.bulk_memory, "bulk memory")?;
            let dst_table = r.read_var_u32()?;
            O::TableCopy { dst_table, src_table: r.read_var_u32()? }
        }
        15 => {
            require(features.reference_types, "reference types")?;
            O::TableGrow { table: r.read_var_u32()? }
        }
        16 => {
            require(features.reference_types, "reference types")?;
            O::TableSize { table: r.read_var_u32()? }
        }
        17 => {
            require(features.reference_types, "reference types")?;
            O::TableFill { table: r.read_var_u32()? }
        }
        _ => {
            return Err(WasmError::invalid(
                format!("unknown 0xfc opcode {sub}"),
                offset,
            ))
        }
    })
}

fn read_atomic_operator(r: &mut BinaryReader<'_>, offset: usize) -> WasmResult<Operator> {
    use AtomicRmwOp::*;
    use AtomicWidth::*;
    use Operator as O;
    use ValType::{I32, I64};

    let sub = r.read_u8()?;
    if sub == 0x03 {
        expect_zero_byte(r, "atomic.fence")?;
        return Ok(O::AtomicFence);
    }
    let memarg = if sub <= 0x4e { r.read_memarg()? } else { MemArg { offset: 0, align: 0 } };
    // The rmw opcodes repeat the same seven (type, width) combinations for
    // each operation, in this order.
    let combo = |i: u8| -> (ValType, AtomicWidth) {
        match i {
            0 => (I32, W32),
            1 => (I64, W64),
            2 => (I32, W8),
            3 => (I32, W16),
            4 => (I64, W8),
            5 => (I64, W16),
            _ => (I64, W32),
        }
    };
    Ok(match sub {
        0x00 => O::MemoryAtomicNotify { memarg },
        0x01 => O::MemoryAtomicWait32 { memarg },
        0x02 => O::MemoryAtomicWait64 { memarg },
        0x10..=0x16 => {
            let (ty, width) = combo(sub - 0x10);
            O::AtomicLoad { ty, width, memarg }
        }
        0x17..=0x1d => {
            let (ty, width) = combo(sub - 0x17);
            O::AtomicStore { ty, width, memarg }
        }
        0x1e..=0x24 => {
            let (ty, width) = combo(sub - 0x1e);
            O::AtomicRmw { op: Add, ty, width, memarg }
        }
        0x25..=0x2b => {
            let (ty, width) = combo(sub - 0x25);
            O::AtomicRmw { op: Sub, ty, width, memarg }
        }
        0x2c..=0x32 => {
            let (ty, width) = combo(sub - 0x2c);
            O::AtomicRmw { op: And, ty, width, memarg }
        }
        0x33..=0x39 => {
            let (ty, width) = combo(sub - 0x33);
            O::AtomicRmw { op: Or, ty, width, memarg }
        }
        0x3a..=0x40 => {
            let (ty, width) = combo(sub - 0x3a);
            O::AtomicRmw { op: Xor, ty, width, memarg }
        }
        0x41..=0x47 => {
            let (ty, width) = combo(sub - 0x41);
            O::AtomicRmw { op: Xchg, ty, width, memarg }
        }
        0x48..=0x4e => {
            let (ty, width) = combo(sub - 0x48);
            O::AtomicCmpxchg { ty, width, memarg }
        }
        b => {
            return Err(WasmError::invalid(
                format!("unknown atomic opcode {b:#04x}"),
                offset,
            ))
        }
    })
}

fn read_simd_operator(r: &mut BinaryReader<'_>, offset: usize) -> WasmResult<Operator> {
    use Operator as O;
    use SimdBinaryOp::*;
    use SimdShape::*;

    let sub = r.read_var_u32()?;
    // Lane-wise comparisons repeat the same layout per integer shape.
    let int_cmp = |i: u32| -> SimdBinaryOp {
        match i {
            0 => Eq,
            1 => Ne,
            2 => LtS,
            3 => LtU,
            4 => GtS,
            5 => GtU,
            6 => LeS,
            7 => LeU,
            8 => GeS,
            _ => GeU,
        }
    };
    let float_cmp = |i: u32| -> SimdBinaryOp {
        match i {
            0 => Eq,
            1 => Ne,
            2 => Lt,
            3 => Gt,
            4 => Le,
            _ => Ge,
        }
    };

    Ok(match sub {
        0x00 => O::V128Load { memarg: r.read_memarg()? },
        0x0b => O::V128Store { memarg: r.read_memarg()? },
        0x0c => {
            let bytes = r.read_bytes(16)?;
            O::V128Const { value: u128::from_le_bytes(bytes.try_into().unwrap()) }
        }
        0x0d => {
            let bytes = r.read_bytes(16)?;
            let lanes: [u8; 16] = bytes.try_into().unwrap();
            if lanes.iter().any(|&l| l >= 32) {
                return Err(WasmError::invalid("invalid shuffle lane", offset));
            }
            O::I8x16Shuffle { lanes }
        }
        0x0e => O::I8x16Swizzle,
        0x0f..=0x14 => {
            let shape = [I8x16, I16x8, I32x4, I64x2, F32x4, F64x2][(sub - 0x0f) as usize];
            O::SimdSplat { shape }
        }
        0x15 => O::SimdExtractLane { shape: I8x16, lane: r.read_u8()?, signed: true },
        0x16 => O::SimdExtractLane { shape: I8x16, lane: r.read_u8()?, signed: false },
        0x17 => O::SimdReplaceLane { shape: I8x16, lane: r.read_u8()? },
        0x18 => O::SimdExtractLane { shape: I16x8, lane: r.read_u8()?, signed: true },
        0x19 => O::SimdExtractLane { shape: I16x8, lane: r.read_u8()?, signed: false },
        0x1a => O::SimdReplaceLane { shape: I16x8, lane: r.read_u8()? },
        0x1b => O::SimdExtractLane { shape: I32x4, lane: r.read_u8()?, signed: false },
        0x1c => O::SimdReplaceLane { shape: I32x4, lane: r.read_u8()? },
        0x1d => O::SimdExtractLane { shape: I64x2, lane: r.read_u8()?, signed: false },
        0x1e => O::SimdReplaceLane { shape: I64x2, lane: r.read_u8()? },
        0x1f => O::SimdExtractLane { shape: F32x4, lane: r.read_u8()?, signed: false },
        0x20 => O::SimdReplaceLane { shape: F32x4, lane: r.read_u8()? },
        0x21 => O::SimdExtractLane { shape: F64x2, lane: r.read_u8()?, signed: false },
        0x22 => O::SimdReplaceLane { shape: F64x2, lane: r.read_u8()? },

        0x23..=0x2c => O::SimdBinary { op: int_cmp(sub - 0x23), shape: I8x16 },
        0x2d..=0x36 => O::SimdBinary { op: int_cmp(sub - 0x2d), shape: I16x8 },
        0x37..=0x40 => O::SimdBinary { op: int_cmp(sub - 0x37), shape: I32x4 },
        0x41..=0x46 => O::SimdBinary { op: float_cmp(sub - 0x41), shape: F32x4 },
        0x47..=0x4c => O::SimdBinary { op: float_cmp(sub - 0x47), shape: F64x2 },

        0x4d => O::V128Not,
        0x4e => O::V128And,
        0x4f => O::V128AndNot,
        0x50 => O::V128Or,
        0x51 => O::V128Xor,
        0x52 => O::V128Bitselect,
        0x53 => O::V128AnyTrue,

        0x61 => O::SimdUnary { op: SimdUnaryOp::Neg, shape: I8x16 },
        0x63 => O::SimdUnary { op: SimdUnaryOp::AllTrue, shape: I8x16 },
        0x6b => O::SimdShift { op: SimdShiftOp::Shl, shape: I8x16 },
        0x6c => O::SimdShift { op: SimdShiftOp::ShrS, shape: I8x16 },
        0x6d => O::SimdShift { op: SimdShiftOp::ShrU, shape: I8x16 },
        0x6e => O::SimdBinary { op: Add, shape: I8x16 },
        0x71 => O::SimdBinary { op: Sub, shape: I8x16 },

        0x81 => O::SimdUnary { op: SimdUnaryOp::Neg, shape: I16x8 },
        0x83 => O::SimdUnary { op: SimdUnaryOp::AllTrue, shape: I16x8 },
        0x8b => O::SimdShift { op: SimdShiftOp::Shl, shape: I16x8 },
        0x8c => O::SimdShift { op: SimdShiftOp::ShrS, shape: I16x8 },
        0x8d => O::SimdShift { op: SimdShiftOp::ShrU, shape: I16x8 },
        0x8e => O::SimdBinary { op: Add, shape: I16x8 },
        0x91 => O::SimdBinary { op: Sub, shape: I16x8 },
        0x95 => O::SimdBinary { op: Mul, shape: I16x8 },

        0xa1 => O::SimdUnary { op: SimdUnaryOp::Neg, shape: I32x4 },
        0xa3 => O::SimdUnary { op: SimdUnaryOp::AllTrue, shape: I32x4 },
        0xab => O::SimdShift { op: SimdShiftOp::Shl, shape: I32x4 },
        0xac => O::SimdShift { op: SimdShiftOp::ShrS, shape: I32x4 },
        0xad => O::SimdShift { op: SimdShiftOp::ShrU, shape: I32x4 },
        0xae => O::SimdBinary { op: Add, shape: I32x4 },
        0xb1 => O::SimdBinary { op: Sub, shape: I32x4 },
        0xb5 => O::SimdBinary { op: Mul, shape: I32x4 },

        0xc1 => O::SimdUnary { op: SimdUnaryOp::Neg, shape: I64x2 },
        0xc3 => O::SimdUnary { op: SimdUnaryOp::AllTrue, shape: I64x2 },
        0xcb => O::SimdShift { op: SimdShiftOp::Shl, shape: I64x2 },
        0xcc => O::SimdShift { op: SimdShiftOp::ShrS, shape: I64x2 },
        0xcd => O::SimdShift { op: SimdShiftOp::ShrU, shape: I64x2 },
        0xce => O::SimdBinary { op: Add, shape: I64x2 },
        0xd1 => O::SimdBinary { op: Sub, shape: I64x2 },
        0xd5 => O::SimdBinary { op: Mul, shape: I64x2 },

        0xe1 => O::SimdUnary { op: SimdUnaryOp::Neg, shape: F32x4 },
        0xe3 => O::SimdUnary { op: SimdUnaryOp::Sqrt, shape: F32x4 },
        0xe4 => O::SimdBinary { op: Add, shape: F32x4 },
        0xe5 => O::SimdBinary { op: Sub, shape: F32x4 },
        0xe6 => O::SimdBinary { op: Mul, shape: F32x4 },
        0xe7 => O::SimdBinary { op: Div, shape: F32x4 },
        0xe8 => O::SimdBinary { op: Min, shape: F32x4 },
        0xe9 => O::SimdBinary { op: Max, shape: F32x4 },

        0xed => O::SimdUnary { op: SimdUnaryOp::Neg, shape: F64x2 },
        0xef => O::SimdUnary { op: SimdUnaryOp::Sqrt, shape: F64x2 },
        0xf0 => O::SimdBinary { op: Add, shape: F64x2 },
        0xf1 => O::SimdBinary { op: Sub, shape: F64x2 },
        0xf2 => O::SimdBinary { op: Mul, shape: F64x2 },
        0xf3 => O::SimdBinary { op: Div, shape: F64x2 },
        0xf4 => O::SimdBinary { op: Min, shape: F64x2 },
        0xf5 => O::SimdBinary { op: Max, shape: F64x2 },

        b => {
            return Err(wasm_unsupported!(
                "vector opcode {b:#04x} is outside the supported subset"
            ))
        }
    })
}
