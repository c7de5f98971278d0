//! Lowering from the SSA IR to virtual-register machine instructions.
//!
//! Lowering is almost one-to-one; the interesting work is taking the IR
//! out of SSA form. Each block parameter becomes an ordinary virtual
//! register, and every jump's arguments turn into a parallel move into
//! the target's parameter registers, sequentialized with a fresh
//! temporary whenever the moves form a cycle.

use super::inst::{CallTarget, GlobalAddr, Inst, VCode};
use crate::ir::{Block, Function, InstData, Type, Value};
use crate::isa::CompileContext;
use crate::regalloc::{RegClass, VReg};
use smallvec::SmallVec;
use std::collections::HashMap;

pub fn lower(ctx: &CompileContext<'_>, func: &Function) -> VCode {
    let mut lowering = Lowering {
        ctx,
        func,
        vregs: HashMap::new(),
        classes: Vec::new(),
        block_pos: func
            .layout
            .iter()
            .enumerate()
            .map(|(at, &block)| (block, at as u32))
            .collect(),
        insts: Vec::new(),
        max_call_slots: 0,
    };

    let mut block_ranges = Vec::with_capacity(func.layout.len());
    let mut succs = Vec::with_capacity(func.layout.len());

    for (at, &block) in func.layout.iter().enumerate() {
        let start = lowering.insts.len() as u32;
        if at == 0 {
            for (index, &param) in func.blocks[block].params.iter().enumerate() {
                let ty = func.dfg.value_type(param);
                let dst = lowering.vreg(param);
                lowering.insts.push(Inst::LoadParam { dst, ty, index: index as u32 });
            }
        }
        let mut block_succs = SmallVec::new();
        for &inst in &func.blocks[block].insts {
            lowering.lower_inst(inst);
            func.dfg.insts[inst].for_each_target(|target| {
                block_succs.push(lowering.block_pos[&target]);
            });
        }
        block_ranges.push((start, lowering.insts.len() as u32));
        succs.push(block_succs);
    }

    VCode {
        insts: lowering.insts,
        block_ranges,
        succs,
        vreg_classes: lowering.classes,
        max_call_slots: lowering.max_call_slots,
    }
}

struct Lowering<'a> {
    ctx: &'a CompileContext<'a>,
    func: &'a Function,
    vregs: HashMap<Value, VReg>,
    classes: Vec<RegClass>,
    block_pos: HashMap<Block, u32>,
    insts: Vec<Inst>,
    max_call_slots: u32,
}

impl Lowering<'_> {
    fn vreg(&mut self, value: Value) -> VReg {
        if let Some(&vreg) = self.vregs.get(&value) {
            return vreg;
        }
        let class = class_of(self.func.dfg.value_type(value));
        let vreg = self.fresh(class);
        self.vregs.insert(value, vreg);
        vreg
    }

    fn fresh(&mut self, class: RegClass) -> VReg {
        let vreg = VReg::from_u32(self.classes.len() as u32);
        self.classes.push(class);
        vreg
    }

    fn vregs(&mut self, values: &[Value]) -> SmallVec<[VReg; 4]> {
        values.iter().map(|&value| self.vreg(value)).collect()
    }

    fn types(&self, values: &[Value]) -> SmallVec<[Type; 4]> {
        values.iter().map(|&value| self.func.dfg.value_type(value)).collect()
    }

    fn result(&mut self, inst: crate::ir::Inst) -> VReg {
        self.vreg(self.func.dfg.first_result(inst))
    }

    fn lower_inst(&mut self, inst: crate::ir::Inst) {
        let data = self.func.dfg.insts[inst].clone();
        match data {
            InstData::Iconst { ty, bits } => {
                let dst = self.result(inst);
                self.insts.push(Inst::Iconst { dst, ty, bits });
            }
            InstData::Fconst { ty, bits } => {
                let dst = self.result(inst);
                self.insts.push(Inst::Fconst { dst, ty, bits });
            }
            InstData::Binary { op, ty, args } => {
                let lhs = self.vreg(args[0]);
                let rhs = self.vreg(args[1]);
                let dst = self.result(inst);
                self.insts.push(Inst::Alu { op, ty, dst, lhs, rhs });
            }
            InstData::Div { op, ty, args, wasm_offset } => {
                let lhs = self.vreg(args[0]);
                let rhs = self.vreg(args[1]);
                let dst = self.result(inst);
                self.insts.push(Inst::Div { op, ty, dst, lhs, rhs, wasm_offset });
            }
            InstData::IntUnary { op, ty, arg } => {
                let src = self.vreg(arg);
                let dst = self.result(inst);
                self.insts.push(Inst::IntUnary { op, ty, dst, src });
            }
            InstData::Icmp { cond, ty, args } => {
                let lhs = self.vreg(args[0]);
                let rhs = self.vreg(args[1]);
                let dst = self.result(inst);
                self.insts.push(Inst::Icmp { cond, ty, dst, lhs, rhs });
            }
            InstData::Fcmp { cond, ty, args } => {
                let lhs = self.vreg(args[0]);
                let rhs = self.vreg(args[1]);
                let dst = self.result(inst);
                self.insts.push(Inst::Fcmp { cond, ty, dst, lhs, rhs });
            }
            InstData::FloatUnary { op, ty, arg } => {
                let src = self.vreg(arg);
                let dst = self.result(inst);
                self.insts.push(Inst::FpUnary { op, ty, dst, src });
            }
            InstData::FloatBinary { op, ty, args } => {
                let lhs = self.vreg(args[0]);
                let rhs = self.vreg(args[1]);
                let dst = self.result(inst);
                self.insts.push(Inst::FpBinary { op, ty, dst, lhs, rhs });
            }
            InstData::Convert { op, arg } => {
                let src = self.vreg(arg);
                let dst = self.result(inst);
                self.insts.push(Inst::Convert { op, dst, src });
            }
            InstData::Select { ty, args } => {
                let cond = self.vreg(args[0]);
                let if_true = self.vreg(args[1]);
                let if_false = self.vreg(args[2]);
                let dst = self.result(inst);
                self.insts.push(Inst::Select { ty, dst, cond, if_true, if_false });
            }
            InstData::Load { kind, index, offset, wasm_offset } => {
                let index = self.vreg(index);
                let dst = self.result(inst);
                self.insts.push(Inst::Load { kind, dst, index, offset, wasm_offset });
            }
            InstData::Store { kind, index, value, offset, wasm_offset } => {
                let index = self.vreg(index);
                let src = self.vreg(value);
                self.insts.push(Inst::Store { kind, index, src, offset, wasm_offset });
            }
            InstData::MemorySize => {
                let dst = self.result(inst);
                self.insts.push(Inst::MemorySize { dst });
            }
            InstData::MemoryGrow { arg } => {
                let delta = self.vreg(arg);
                let dst = self.result(inst);
                self.insts.push(Inst::MemoryGrow { dst, delta });
            }
            InstData::GlobalGet { index, ty } => {
                let dst = self.result(inst);
                let global = self.global_addr(index);
                self.insts.push(Inst::GlobalGet { dst, ty, global });
            }
            InstData::GlobalSet { index, arg } => {
                let src = self.vreg(arg);
                let global = self.global_addr(index);
                let ty = self.func.dfg.value_type(arg);
                self.insts.push(Inst::GlobalSet { src, ty, global });
            }
            InstData::Call { func, args, wasm_offset } => {
                let arg_regs = self.vregs(&args);
                let arg_tys = self.types(&args);
                let results: Vec<Value> = self.func.dfg.inst_results(inst).to_vec();
                let rets: SmallVec<[VReg; 2]> =
                    results.iter().map(|&value| self.vreg(value)).collect();
                let ret_tys: SmallVec<[Type; 2]> = self.types(&results).into_iter().collect();
                let target = if self.ctx.module.is_imported_function(func)
                    || (self.ctx.interpreted)(func)
                {
                    CallTarget::Funcref(func)
                } else {
                    CallTarget::Defined(func)
                };
                self.note_call(args.len(), results.len());
                self.insts.push(Inst::Call {
                    target,
                    args: arg_regs,
                    arg_tys,
                    rets,
                    ret_tys,
                    wasm_offset,
                });
            }
            InstData::CallIndirect { type_index, table_index, callee, args, wasm_offset } => {
                let callee = self.vreg(callee);
                let arg_regs = self.vregs(&args);
                let arg_tys = self.types(&args);
                let results: Vec<Value> = self.func.dfg.inst_results(inst).to_vec();
                let rets: SmallVec<[VReg; 2]> =
                    results.iter().map(|&value| self.vreg(value)).collect();
                let ret_tys: SmallVec<[Type; 2]> = self.types(&results).into_iter().collect();
                self.note_call(args.len(), results.len());
                self.insts.push(Inst::CallIndirect {
                    table_index: table_index.as_u32(),
                    type_id: (self.ctx.signature_ids)(type_index),
                    callee,
                    args: arg_regs,
                    arg_tys,
                    rets,
                    ret_tys,
                    wasm_offset,
                });
            }
            InstData::Jump { dest, args } => {
                self.parallel_move(dest, &args);
                let target = self.block_pos[&dest];
                self.insts.push(Inst::Jump { target });
            }
            InstData::Brif { cond, then_dest, else_dest } => {
                let cond = self.vreg(cond);
                self.insts.push(Inst::JumpIf {
                    cond,
                    then_target: self.block_pos[&then_dest],
                    else_target: self.block_pos[&else_dest],
                });
            }
            InstData::BrTable { index, targets, default } => {
                let index = self.vreg(index);
                let targets = targets.iter().map(|block| self.block_pos[block]).collect();
                let default = self.block_pos[&default];
                self.insts.push(Inst::BrTable { index, targets, default });
            }
            InstData::Return { args } => {
                let rets: SmallVec<[VReg; 2]> =
                    args.iter().map(|&value| self.vreg(value)).collect();
                let ret_tys: SmallVec<[Type; 2]> = self.types(&args).into_iter().collect();
                self.insts.push(Inst::Return { rets, ret_tys });
            }
            InstData::Trap { code, wasm_offset } => {
                self.insts.push(Inst::Trap { trap: code, wasm_offset });
            }
        }
    }

    fn global_addr(&self, index: riptide_environ::GlobalIndex) -> GlobalAddr {
        match self.ctx.module.defined_global_index(index) {
            Some(defined) => GlobalAddr::Defined(defined.as_u32()),
            None => GlobalAddr::Imported(index.as_u32()),
        }
    }

    fn note_call(&mut self, args: usize, rets: usize) {
        self.max_call_slots = self.max_call_slots.max(args.max(rets) as u32);
    }

    /// Emits moves carrying `args` into the parameters of `dest`,
    /// preserving the all-at-once semantics of the edge.
    fn parallel_move(&mut self, dest: Block, args: &[Value]) {
        struct Pending {
            dst: VReg,
            /// The type of the value `dst` holds before the edge, needed
            /// when parking it to break a cycle.
            dst_ty: Type,
            src: VReg,
            ty: Type,
        }

        let mut pending: Vec<Pending> = Vec::with_capacity(args.len());
        let params: Vec<Value> = self.func.blocks[dest].params.to_vec();
        debug_assert_eq!(params.len(), args.len());
        for (&param, &arg) in params.iter().zip(args.iter()) {
            let dst = self.vreg(param);
            let src = self.vreg(arg);
            if dst != src {
                pending.push(Pending {
                    dst,
                    dst_ty: self.func.dfg.value_type(param),
                    src,
                    ty: self.func.dfg.value_type(arg),
                });
            }
        }

        while !pending.is_empty() {
            if let Some(at) = pending
                .iter()
                .position(|m| !pending.iter().any(|other| other.src == m.dst))
            {
                let m = pending.remove(at);
                self.insts.push(Inst::Move { ty: m.ty, dst: m.dst, src: m.src });
                continue;
            }
            // Every destination is also a pending source: a cycle. Park
            // the first destination's old value in a temporary.
            let dst = pending[0].dst;
            let dst_ty = pending[0].dst_ty;
            let temp = self.fresh(class_of(dst_ty));
            self.insts.push(Inst::Move { ty: dst_ty, dst: temp, src: dst });
            for m in &mut pending {
                if m.src == dst {
                    m.src = temp;
                }
            }
        }
    }
}

fn class_of(ty: Type) -> RegClass {
    if ty.is_float() {
        RegClass::Float
    } else {
        RegClass::Int
    }
}
