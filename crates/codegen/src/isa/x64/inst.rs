//! The virtual-register instruction set the lowering pass produces.
//!
//! Each `Inst` expands to a short fixed machine-code sequence during
//! emission; all scratch-register discipline lives there. The only
//! information the register allocator needs is collected by
//! [`Inst::collect_operands`].

use crate::ir::{
    BinaryOp, ConvertOp, DivOp, FloatBinaryOp, FloatCC, FloatUnaryOp, IntCC, IntUnaryOp,
    LoadKind, StoreKind, Type,
};
use crate::regalloc::{InstInfo, VReg};
use riptide_environ::{FuncIndex, Trap};
use smallvec::SmallVec;

/// How a global is addressed, resolved at lowering time.
#[derive(Copy, Clone, Debug)]
pub enum GlobalAddr {
    /// Index into the defined-globals array.
    Defined(u32),
    /// Index into the imported-global pointer array.
    Imported(u32),
}

/// The callee of a direct call.
#[derive(Copy, Clone, Debug)]
pub enum CallTarget {
    /// A compiled function in this module, called via a relocated
    /// `call rel32`.
    Defined(FuncIndex),
    /// A function called through its `VMFuncRef`: an import, or a
    /// defined function that runs in the interpreter.
    Funcref(FuncIndex),
}

/// A machine block index: the position of a block in emission order.
pub type MachBlock = u32;

#[derive(Clone, Debug)]
pub enum Inst {
    /// Load argument `index` from the incoming value buffer.
    LoadParam { dst: VReg, ty: Type, index: u32 },
    Iconst { dst: VReg, ty: Type, bits: u64 },
    Fconst { dst: VReg, ty: Type, bits: u64 },
    Alu { op: BinaryOp, ty: Type, dst: VReg, lhs: VReg, rhs: VReg },
    Div { op: DivOp, ty: Type, dst: VReg, lhs: VReg, rhs: VReg, wasm_offset: u32 },
    IntUnary { op: IntUnaryOp, ty: Type, dst: VReg, src: VReg },
    Icmp { cond: IntCC, ty: Type, dst: VReg, lhs: VReg, rhs: VReg },
    Fcmp { cond: FloatCC, ty: Type, dst: VReg, lhs: VReg, rhs: VReg },
    FpUnary { op: FloatUnaryOp, ty: Type, dst: VReg, src: VReg },
    FpBinary { op: FloatBinaryOp, ty: Type, dst: VReg, lhs: VReg, rhs: VReg },
    Convert { op: ConvertOp, dst: VReg, src: VReg },
    Select { ty: Type, dst: VReg, cond: VReg, if_true: VReg, if_false: VReg },
    Load { kind: LoadKind, dst: VReg, index: VReg, offset: u32, wasm_offset: u32 },
    Store { kind: StoreKind, index: VReg, src: VReg, offset: u32, wasm_offset: u32 },
    MemorySize { dst: VReg },
    MemoryGrow { dst: VReg, delta: VReg },
    GlobalGet { dst: VReg, ty: Type, global: GlobalAddr },
    GlobalSet { src: VReg, ty: Type, global: GlobalAddr },
    Call {
        target: CallTarget,
        args: SmallVec<[VReg; 4]>,
        arg_tys: SmallVec<[Type; 4]>,
        rets: SmallVec<[VReg; 2]>,
        ret_tys: SmallVec<[Type; 2]>,
        wasm_offset: u32,
    },
    CallIndirect {
        table_index: u32,
        type_id: u32,
        callee: VReg,
        args: SmallVec<[VReg; 4]>,
        arg_tys: SmallVec<[Type; 4]>,
        rets: SmallVec<[VReg; 2]>,
        ret_tys: SmallVec<[Type; 2]>,
        wasm_offset: u32,
    },
    /// Register-to-register move, mostly from block-parameter shuffles.
    Move { ty: Type, dst: VReg, src: VReg },
    Jump { target: MachBlock },
    JumpIf { cond: VReg, then_target: MachBlock, else_target: MachBlock },
    BrTable { index: VReg, targets: Vec<MachBlock>, default: MachBlock },
    Return { rets: SmallVec<[VReg; 2]>, ret_tys: SmallVec<[Type; 2]> },
    Trap { trap: Trap, wasm_offset: u32 },
}

impl Inst {
    /// The operand summary the register allocator consumes.
    pub fn collect_operands(&self) -> InstInfo {
        let mut info = InstInfo::default();
        match self {
            Inst::LoadParam { dst, .. }
            | Inst::Iconst { dst, .. }
            | Inst::Fconst { dst, .. }
            | Inst::MemorySize { dst } => info.defs.push(*dst),
            Inst::Alu { dst, lhs, rhs, .. }
            | Inst::Div { dst, lhs, rhs, .. }
            | Inst::Icmp { dst, lhs, rhs, .. }
            | Inst::Fcmp { dst, lhs, rhs, .. }
            | Inst::FpBinary { dst, lhs, rhs, .. } => {
                info.uses.push(*lhs);
                info.uses.push(*rhs);
                info.defs.push(*dst);
            }
            Inst::IntUnary { dst, src, .. }
            | Inst::FpUnary { dst, src, .. }
            | Inst::Convert { dst, src, .. }
            | Inst::Move { dst, src, .. } => {
                info.uses.push(*src);
                info.defs.push(*dst);
            }
            Inst::Select { dst, cond, if_true, if_false, .. } => {
                info.uses.push(*cond);
                info.uses.push(*if_true);
                info.uses.push(*if_false);
                info.defs.push(*dst);
            }
            Inst::Load { dst, index, .. } => {
                info.uses.push(*index);
                info.defs.push(*dst);
            }
            Inst::Store { index, src, .. } => {
                info.uses.push(*index);
                info.uses.push(*src);
            }
            Inst::MemoryGrow { dst, delta } => {
                info.uses.push(*delta);
                info.defs.push(*dst);
                info.is_call = true;
            }
            Inst::GlobalGet { dst, .. } => info.defs.push(*dst),
            Inst::GlobalSet { src, .. } => info.uses.push(*src),
            Inst::Call { args, rets, .. } => {
                info.uses.extend(args.iter().copied());
                info.defs.extend(rets.iter().copied());
                info.is_call = true;
            }
            Inst::CallIndirect { callee, args, rets, .. } => {
                info.uses.push(*callee);
                info.uses.extend(args.iter().copied());
                info.defs.extend(rets.iter().copied());
                info.is_call = true;
            }
            Inst::JumpIf { cond, .. } => info.uses.push(*cond),
            Inst::BrTable { index, .. } => info.uses.push(*index),
            Inst::Return { rets, .. } => info.uses.extend(rets.iter().copied()),
            Inst::Jump { .. } | Inst::Trap { .. } => {}
        }
        info
    }

    /// Successor machine blocks of a terminator.
    pub fn successors(&self) -> SmallVec<[MachBlock; 2]> {
        match self {
            Inst::Jump { target } => SmallVec::from_slice(&[*target]),
            Inst::JumpIf { then_target, else_target, .. } => {
                SmallVec::from_slice(&[*then_target, *else_target])
            }
            Inst::BrTable { targets, default, .. } => {
                let mut succs: SmallVec<[MachBlock; 2]> = targets.iter().copied().collect();
                succs.push(*default);
                succs
            }
            _ => SmallVec::new(),
        }
    }
}

/// A lowered function: linear instructions partitioned into blocks, in
/// emission order.
pub struct VCode {
    pub insts: Vec<Inst>,
    /// `[start, end)` instruction range of each machine block.
    pub block_ranges: Vec<(u32, u32)>,
    /// Successors of each machine block.
    pub succs: Vec<SmallVec<[MachBlock; 2]>>,
    /// Class of each virtual register.
    pub vreg_classes: Vec<crate::regalloc::RegClass>,
    /// The largest `max(args, results)` over all call sites, for frame
    /// sizing.
    pub max_call_slots: u32,
}
