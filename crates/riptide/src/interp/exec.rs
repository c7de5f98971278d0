//! The operator evaluator.

use super::code::Branch;
use cranelift_entity::EntityRef;
use super::{simd, InterpFuncState, Value};
use riptide_environ::{
    AtomicRmwOp, AtomicWidth, ConstExpr, ElemIndex, FuncIndex, FuncType, FunctionBody,
    GlobalIndex, MemArg, Operator, TableIndex, Trap, TypeIndex, ValType, WASM_PAGE_SIZE,
};
use riptide_runtime::{
    push_frame, record_wasm_trap, Instance, TableElement, VMFuncRef, VMMemoryDefinition, ValRaw,
    ARRAY_CALL_OK,
};
use std::sync::atomic::{fence, AtomicU16, AtomicU32, AtomicU64, AtomicU8, Ordering};
use std::time::Duration;

pub(super) enum Fault {
    /// This frame trapped.
    Trap(Trap),
    /// A callee trapped or failed; the reason is already recorded.
    Propagated,
}

impl From<Trap> for Fault {
    fn from(trap: Trap) -> Fault {
        Fault::Trap(trap)
    }
}

enum Flow {
    Next,
    Jump(u32),
}

/// Runs one function to completion. `locals` holds the arguments; the
/// declared locals are appended here. On `Err` the trap state has been
/// recorded, frame included.
pub(super) fn run(state: &InterpFuncState, mut locals: Vec<Value>) -> Result<Vec<Value>, ()> {
    for ty in &state.code.locals {
        locals.push(Value::default_for(*ty));
    }
    let body = &state.module.code[state.defined];
    let mut interp = Interp { state, locals, stack: Vec::with_capacity(16) };
    match interp.execute(body) {
        Ok(()) => Ok(interp.stack),
        Err((fault, pc)) => {
            let offset = body.offsets.get(pc).copied().unwrap_or(0);
            match fault {
                Fault::Trap(trap) => record_wasm_trap(trap, state.func_index, offset),
                Fault::Propagated => push_frame(state.func_index, offset),
            }
            Err(())
        }
    }
}

struct Interp<'a> {
    state: &'a InterpFuncState,
    locals: Vec<Value>,
    stack: Vec<Value>,
}

impl Interp<'_> {
    fn execute(&mut self, body: &FunctionBody) -> Result<(), (Fault, usize)> {
        if self.interrupted() {
            return Err((Fault::Trap(Trap::Interrupt), 0));
        }
        let ops = &body.code;
        let mut pc = 0usize;
        while pc < ops.len() {
            match self.step(&ops[pc], pc as u32) {
                Ok(Flow::Next) => pc += 1,
                Ok(Flow::Jump(target)) => {
                    let target = target as usize;
                    if target <= pc && self.interrupted() {
                        return Err((Fault::Trap(Trap::Interrupt), pc));
                    }
                    pc = target;
                }
                Err(fault) => return Err((fault, pc)),
            }
        }
        Ok(())
    }

    fn step(&mut self, op: &Operator, pc: u32) -> Result<Flow, Fault> {
        match op {
            Operator::Unreachable => return Err(Trap::UnreachableCodeReached.into()),
            Operator::Nop
            | Operator::Block { .. }
            | Operator::Loop { .. }
            | Operator::End => {}

            Operator::If { .. } => {
                if self.pop_i32() == 0 {
                    return Ok(self.take_branch(self.branch(pc)));
                }
            }
            Operator::Else => return Ok(self.take_branch(self.branch(pc))),
            Operator::Br { .. } | Operator::Return => {
                return Ok(self.take_branch(self.branch(pc)));
            }
            Operator::BrIf { .. } => {
                if self.pop_i32() != 0 {
                    return Ok(self.take_branch(self.branch(pc)));
                }
            }
            Operator::BrTable { .. } => {
                let index = self.pop_u32() as usize;
                let entries = self
                    .state
                    .code
                    .tables
                    .get(&pc)
                    .unwrap_or_else(|| unreachable!("lowered br_table"));
                let entry = entries[index.min(entries.len() - 1)];
                return Ok(self.take_branch(entry));
            }

            Operator::Call { function_index } => {
                let index = FuncIndex::from_u32(*function_index);
                let ty = self.state.module.func_type(index).clone();
                let funcref = unsafe { Instance::from_vmctx(self.state.vmctx).funcref(index) };
                self.call_funcref(funcref, &ty)?;
            }
            Operator::CallIndirect { type_index, table_index } => {
                let callee = self.pop_u32();
                let funcref = unsafe {
                    Instance::from_vmctx(self.state.vmctx)
                        .table_get_funcref(TableIndex::from_u32(*table_index), callee)
                }
                .map_err(Fault::Trap)?;
                if funcref.is_null() {
                    return Err(Trap::IndirectCallToNull.into());
                }
                let expected = self.state.shared_type_ids[*type_index as usize];
                if unsafe { (*funcref).type_id } != expected {
                    return Err(Trap::BadSignature.into());
                }
                let ty = self.state.module.types[TypeIndex::from_u32(*type_index)].clone();
                self.call_funcref(funcref, &ty)?;
            }

            Operator::Drop => {
                self.pop();
            }
            Operator::Select | Operator::TypedSelect { .. } => {
                let cond = self.pop_i32();
                let b = self.pop();
                let a = self.pop();
                self.push(if cond != 0 { a } else { b });
            }

            Operator::LocalGet { local_index } => {
                self.push(self.locals[*local_index as usize].clone());
            }
            Operator::LocalSet { local_index } => {
                self.locals[*local_index as usize] = self.pop();
            }
            Operator::LocalTee { local_index } => {
                let value = self.pop();
                self.locals[*local_index as usize] = value.clone();
                self.push(value);
            }
            Operator::GlobalGet { global_index } => self.global_get(*global_index),
            Operator::GlobalSet { global_index } => self.global_set(*global_index),

            Operator::TableGet { table } => {
                let index = self.pop_u32();
                let table = unsafe {
                    Instance::from_vmctx(self.state.vmctx).table(TableIndex::from_u32(*table))
                }
                .clone();
                let table = table.lock().unwrap_or_else(|e| e.into_inner());
                let elem = table.get(index).ok_or(Trap::TableOutOfBounds)?;
                self.push(element_to_value(elem));
            }
            Operator::TableSet { table } => {
                let value = self.pop();
                let index = self.pop_u32();
                let table = unsafe {
                    Instance::from_vmctx(self.state.vmctx).table(TableIndex::from_u32(*table))
                }
                .clone();
                let mut table = table.lock().unwrap_or_else(|e| e.into_inner());
                table.set(index, value_to_element(value)).map_err(Fault::Trap)?;
            }
            Operator::TableGrow { table } => {
                let delta = self.pop_u32();
                let init = self.pop();
                let table = unsafe {
                    Instance::from_vmctx(self.state.vmctx).table(TableIndex::from_u32(*table))
                }
                .clone();
                let mut table = table.lock().unwrap_or_else(|e| e.into_inner());
                let prev = table.grow(delta, value_to_element(init));
                self.push_i32(prev.map_or(-1, |p| p as i32));
            }
            Operator::TableSize { table } => {
                let table = unsafe {
                    Instance::from_vmctx(self.state.vmctx).table(TableIndex::from_u32(*table))
                }
                .clone();
                let size = table.lock().unwrap_or_else(|e| e.into_inner()).size();
                self.push_i32(size as i32);
            }
            Operator::TableFill { table } => {
                let len = self.pop_u32();
                let value = self.pop();
                let dst = self.pop_u32();
                let table = unsafe {
                    Instance::from_vmctx(self.state.vmctx).table(TableIndex::from_u32(*table))
                }
                .clone();
                let mut table = table.lock().unwrap_or_else(|e| e.into_inner());
                table.fill(dst, value_to_element(value), len).map_err(Fault::Trap)?;
            }
            Operator::TableCopy { dst_table, src_table } => {
                let len = self.pop_u32();
                let src = self.pop_u32();
                let dst = self.pop_u32();
                let instance = unsafe { Instance::from_vmctx(self.state.vmctx) };
                if dst_table == src_table {
                    let table = instance.table(TableIndex::from_u32(*dst_table)).clone();
                    let mut table = table.lock().unwrap_or_else(|e| e.into_inner());
                    table.copy_within(dst, src, len).map_err(Fault::Trap)?;
                } else {
                    let dst_arc = instance.table(TableIndex::from_u32(*dst_table)).clone();
                    let src_arc = instance.table(TableIndex::from_u32(*src_table)).clone();
                    let mut dst_lock = dst_arc.lock().unwrap_or_else(|e| e.into_inner());
                    let src_lock = src_arc.lock().unwrap_or_else(|e| e.into_inner());
                    riptide_runtime::Table::copy_between(&mut dst_lock, &src_lock, dst, src, len)
                        .map_err(Fault::Trap)?;
                }
            }
            Operator::TableInit { elem_index, table } => {
                let len = self.pop_u32();
                let src = self.pop_u32();
                let dst = self.pop_u32();
                self.table_init(*elem_index, *table, dst, src, len)?;
            }
            Operator::ElemDrop { elem_index } => unsafe {
                Instance::from_vmctx(self.state.vmctx).elem_drop(elem_index.index());
            },

            Operator::I32Load { memarg } => {
                let b = self.load::<4>(memarg)?;
                self.push_i32(i32::from_le_bytes(b));
            }
            Operator::I64Load { memarg } => {
                let b = self.load::<8>(memarg)?;
                self.push_i64(i64::from_le_bytes(b));
            }
            Operator::F32Load { memarg } => {
                let b = self.load::<4>(memarg)?;
                self.push(Value::F32(u32::from_le_bytes(b)));
            }
            Operator::F64Load { memarg } => {
                let b = self.load::<8>(memarg)?;
                self.push(Value::F64(u64::from_le_bytes(b)));
            }
            Operator::I32Load8S { memarg } => {
                let b = self.load::<1>(memarg)?;
                self.push_i32(b[0] as i8 as i32);
            }
            Operator::I32Load8U { memarg } => {
                let b = self.load::<1>(memarg)?;
                self.push_i32(b[0] as i32);
            }
            Operator::I32Load16S { memarg } => {
                let b = self.load::<2>(memarg)?;
                self.push_i32(i16::from_le_bytes(b) as i32);
            }
            Operator::I32Load16U { memarg } => {
                let b = self.load::<2>(memarg)?;
                self.push_i32(u16::from_le_bytes(b) as i32);
            }
            Operator::I64Load8S { memarg } => {
                let b = self.load::<1>(memarg)?;
                self.push_i64(b[0] as i8 as i64);
            }
            Operator::I64Load8U { memarg } => {
                let b = self.load::<1>(memarg)?;
                self.push_i64(b[0] as i64);
            }
            Operator::I64Load16S { memarg } => {
                let b = self.load::<2>(memarg)?;
                self.push_i64(i16::from_le_bytes(b) as i64);
            }
            Operator::I64Load16U { memarg } => {
                let b = self.load::<2>(memarg)?;
                self.push_i64(u16::from_le_bytes(b) as i64);
            }
            Operator::I64Load32S { memarg } => {
                let b = self.load::<4>(memarg)?;
                self.push_i64(i32::from_le_bytes(b) as i64);
            }
            Operator::I64Load32U { memarg } => {
                let b = self.load::<4>(memarg)?;
                self.push_i64(u32::from_le_bytes(b) as i64);
            }
            Operator::V128Load { memarg } => {
                let b = self.load::<16>(memarg)?;
                self.push(Value::V128(u128::from_le_bytes(b)));
            }

            Operator::I32Store { memarg } => {
                let v = self.pop_i32();
                self.store(memarg, v.to_le_bytes())?;
            }
            Operator::I64Store { memarg } => {
                let v = self.pop_i64();
                self.store(memarg, v.to_le_bytes())?;
            }
            Operator::F32Store { memarg } => {
                let v = self.pop_f32_bits();
                self.store(memarg, v.to_le_bytes())?;
            }
            Operator::F64Store { memarg } => {
                let v = self.pop_f64_bits();
                self.store(memarg, v.to_le_bytes())?;
            }
            Operator::I32Store8 { memarg } => {
                let v = self.pop_i32();
                self.store(memarg, [v as u8])?;
            }
            Operator::I32Store16 { memarg } => {
                let v = self.pop_i32();
                self.store(memarg, (v as u16).to_le_bytes())?;
            }
            Operator::I64Store8 { memarg } => {
                let v = self.pop_i64();
                self.store(memarg, [v as u8])?;
            }
            Operator::I64Store16 { memarg } => {
                let v = self.pop_i64();
                self.store(memarg, (v as u16).to_le_bytes())?;
            }
            Operator::I64Store32 { memarg } => {
                let v = self.pop_i64();
                self.store(memarg, (v as u32).to_le_bytes())?;
            }
            Operator::V128Store { memarg } => {
                let v = self.pop_v128();
                self.store(memarg, v.to_le_bytes())?;
            }

            Operator::MemorySize => {
                let len = self.memory().current_length() as u64;
                self.push_i32((len / WASM_PAGE_SIZE) as i32);
            }
            Operator::MemoryGrow => {
                let delta = self.pop_u32();
                let instance = unsafe { Instance::from_vmctx(self.state.vmctx) };
                let prev = match instance.memory_grow(delta as u64) {
                    Ok(Some(pages)) => pages as i32,
                    Ok(None) | Err(_) => -1,
                };
                self.push_i32(prev);
            }
            Operator::MemoryInit { data_index } => {
                let len = self.pop_u32();
                let src = self.pop_u32();
                let dst = self.pop_u32();
                let instance = unsafe { Instance::from_vmctx(self.state.vmctx) };
                let (data, data_len) = {
                    let data = instance.passive_data(data_index.index());
                    (data.as_ptr(), data.len())
                };
                let src_end = src as usize + len as usize;
                if src_end > data_len {
                    return Err(Trap::MemoryOutOfBounds.into());
                }
                let ptr = self.mem_addr(dst, 0, len)?;
                unsafe {
                    std::ptr::copy_nonoverlapping(data.add(src as usize), ptr, len as usize);
                }
            }
            Operator::DataDrop { data_index } => unsafe {
                Instance::from_vmctx(self.state.vmctx).data_drop(data_index.index());
            },
            Operator::MemoryCopy => {
                let len = self.pop_u32();
                let src = self.pop_u32();
                let dst = self.pop_u32();
                let src = self.mem_addr(src, 0, len)?;
                let dst = self.mem_addr(dst, 0, len)?;
                unsafe { std::ptr::copy(src, dst, len as usize) };
            }
            Operator::MemoryFill => {
                let len = self.pop_u32();
                let value = self.pop_i32();
                let dst = self.pop_u32();
                let dst = self.mem_addr(dst, 0, len)?;
                unsafe { std::ptr::write_bytes(dst, value as u8, len as usize) };
            }

            Operator::I32Const { value } => self.push_i32(*value),
            Operator::I64Const { value } => self.push_i64(*value),
            Operator::F32Const { value } => self.push(Value::F32(*value)),
            Operator::F64Const { value } => self.push(Value::F64(*value)),
            Operator::V128Const { value } => self.push(Value::V128(*value)),

            Operator::I32Eqz => {
                let a = self.pop_i32();
                self.push_bool(a == 0);
            }
            Operator::I64Eqz => {
                let a = self.pop_i64();
                self.push_bool(a == 0);
            }
            Operator::I32Eq => self.i32_cmp(|a, b| a == b),
            Operator::I32Ne => self.i32_cmp(|a, b| a != b),
            Operator::I32LtS => self.i32_cmp(|a, b| a < b),
            Operator::I32LtU => self.u32_cmp(|a, b| a < b),
            Operator::I32GtS => self.i32_cmp(|a, b| a > b),
            Operator::I32GtU => self.u32_cmp(|a, b| a > b),
            Operator::I32LeS => self.i32_cmp(|a, b| a <= b),
            Operator::I32LeU => self.u32_cmp(|a, b| a <= b),
            Operator::I32GeS => self.i32_cmp(|a, b| a >= b),
            Operator::I32GeU => self.u32_cmp(|a, b| a >= b),
            Operator::I64Eq => self.i64_cmp(|a, b| a == b),
            Operator::I64Ne => self.i64_cmp(|a, b| a != b),
            Operator::I64LtS => self.i64_cmp(|a, b| a < b),
            Operator::I64LtU => self.u64_cmp(|a, b| a < b),
            Operator::I64GtS => self.i64_cmp(|a, b| a > b),
            Operator::I64GtU => self.u64_cmp(|a, b| a > b),
            Operator::I64LeS => self.i64_cmp(|a, b| a <= b),
            Operator::I64LeU => self.u64_cmp(|a, b| a <= b),
            Operator::I64GeS => self.i64_cmp(|a, b| a >= b),
            Operator::I64GeU => self.u64_cmp(|a, b| a >= b),
            Operator::F32Eq => self.f32_cmp(|a, b| a == b),
            Operator::F32Ne => self.f32_cmp(|a, b| a != b),
            Operator::F32Lt => self.f32_cmp(|a, b| a < b),
            Operator::F32Gt => self.f32_cmp(|a, b| a > b),
            Operator::F32Le => self.f32_cmp(|a, b| a <= b),
            Operator::F32Ge => self.f32_cmp(|a, b| a >= b),
            Operator::F64Eq => self.f64_cmp(|a, b| a == b),
            Operator::F64Ne => self.f64_cmp(|a, b| a != b),
            Operator::F64Lt => self.f64_cmp(|a, b| a < b),
            Operator::F64Gt => self.f64_cmp(|a, b| a > b),
            Operator::F64Le => self.f64_cmp(|a, b| a <= b),
            Operator::F64Ge => self.f64_cmp(|a, b| a >= b),

            Operator::I32Clz => self.i32_unary(|a| a.leading_zeros() as i32),
            Operator::I32Ctz => self.i32_unary(|a| a.trailing_zeros() as i32),
            Operator::I32Popcnt => self.i32_unary(|a| a.count_ones() as i32),
            Operator::I32Add => self.i32_binary(|a, b| a.wrapping_add(b)),
            Operator::I32Sub => self.i32_binary(|a, b| a.wrapping_sub(b)),
            Operator::I32Mul => self.i32_binary(|a, b| a.wrapping_mul(b)),
            Operator::I32DivS => {
                let b = self.pop_i32();
                let a = self.pop_i32();
                if b == 0 {
                    return Err(Trap::IntegerDivisionByZero.into());
                }
                let q = a.checked_div(b).ok_or(Trap::IntegerOverflow)?;
                self.push_i32(q);
            }
            Operator::I32DivU => {
                let b = self.pop_u32();
                let a = self.pop_u32();
                if b == 0 {
                    return Err(Trap::IntegerDivisionByZero.into());
                }
                self.push_i32((a / b) as i32);
            }
            Operator::I32RemS => {
                let b = self.pop_i32();
                let a = self.pop_i32();
                if b == 0 {
                    return Err(Trap::IntegerDivisionByZero.into());
                }
                self.push_i32(a.wrapping_rem(b));
            }
            Operator::I32RemU => {
                let b = self.pop_u32();
                let a = self.pop_u32();
                if b == 0 {
                    return Err(Trap::IntegerDivisionByZero.into());
                }
                self.push_i32((a % b) as i32);
            }
            Operator::I32And => self.i32_binary(|a, b| a & b),
            Operator::I32Or => self.i32_binary(|a, b| a | b),
            Operator::I32Xor => self.i32_binary(|a, b| a ^ b),
            Operator::I32Shl => self.i32_binary(|a, b| a.wrapping_shl(b as u32)),
            Operator::I32ShrS => self.i32_binary(|a, b| a.wrapping_shr(b as u32)),
            Operator::I32ShrU => {
                self.i32_binary(|a, b| (a as u32).wrapping_shr(b as u32) as i32)
            }
            Operator::I32Rotl => self.i32_binary(|a, b| (a as u32).rotate_left(b as u32) as i32),
            Operator::I32Rotr => self.i32_binary(|a, b| (a as u32).rotate_right(b as u32) as i32),

            Operator::I64Clz => self.i64_unary(|a| a.leading_zeros() as i64),
            Operator::I64Ctz => self.i64_unary(|a| a.trailing_zeros() as i64),
            Operator::I64Popcnt => self.i64_unary(|a| a.count_ones() as i64),
            Operator::I64Add => self.i64_binary(|a, b| a.wrapping_add(b)),
            Operator::I64Sub => self.i64_binary(|a, b| a.wrapping_sub(b)),
            Operator::I64Mul => self.i64_binary(|a, b| a.wrapping_mul(b)),
            Operator::I64DivS => {
                let b = self.pop_i64();
                let a = self.pop_i64();
                if b == 0 {
                    return Err(Trap::IntegerDivisionByZero.into());
                }
                let q = a.checked_div(b).ok_or(Trap::IntegerOverflow)?;
                self.push_i64(q);
            }
            Operator::I64DivU => {
                let b = self.pop_u64();
                let a = self.pop_u64();
                if b == 0 {
                    return Err(Trap::IntegerDivisionByZero.into());
                }
                self.push_i64((a / b) as i64);
            }
            Operator::I64RemS => {
                let b = self.pop_i64();
                let a = self.pop_i64();
                if b == 0 {
                    return Err(Trap::IntegerDivisionByZero.into());
                }
                self.push_i64(a.wrapping_rem(b));
            }
            Operator::I64RemU => {
                let b = self.pop_u64();
                let a = self.pop_u64();
                if b == 0 {
                    return Err(Trap::IntegerDivisionByZero.into());
                }
                self.push_i64((a % b) as i64);
            }
            Operator::I64And => self.i64_binary(|a, b| a & b),
            Operator::I64Or => self.i64_binary(|a, b| a | b),
            Operator::I64Xor => self.i64_binary(|a, b| a ^ b),
            Operator::I64Shl => self.i64_binary(|a, b| a.wrapping_shl(b as u32)),
            Operator::I64ShrS => self.i64_binary(|a, b| a.wrapping_shr(b as u32)),
            Operator::I64ShrU => {
                self.i64_binary(|a, b| (a as u64).wrapping_shr(b as u32) as i64)
            }
            Operator::I64Rotl => {
                self.i64_binary(|a, b| (a as u64).rotate_left(b as u32) as i64)
            }
            Operator::I64Rotr => {
                self.i64_binary(|a, b| (a as u64).rotate_right(b as u32) as i64)
            }

            Operator::F32Abs => self.f32_unary(|a| a.abs()),
            Operator::F32Neg => self.f32_unary(|a| -a),
            Operator::F32Ceil => self.f32_unary(|a| a.ceil()),
            Operator::F32Floor => self.f32_unary(|a| a.floor()),
            Operator::F32Trunc => self.f32_unary(|a| a.trunc()),
            Operator::F32Nearest => self.f32_unary(nearest32),
            Operator::F32Sqrt => self.f32_unary(|a| a.sqrt()),
            Operator::F32Add => self.f32_binary(|a, b| a + b),
            Operator::F32Sub => self.f32_binary(|a, b| a - b),
            Operator::F32Mul => self.f32_binary(|a, b| a * b),
            Operator::F32Div => self.f32_binary(|a, b| a / b),
            Operator::F32Min => self.f32_binary(fmin32),
            Operator::F32Max => self.f32_binary(fmax32),
            Operator::F32Copysign => self.f32_binary(|a, b| a.copysign(b)),

            Operator::F64Abs => self.f64_unary(|a| a.abs()),
            Operator::F64Neg => self.f64_unary(|a| -a),
            Operator::F64Ceil => self.f64_unary(|a| a.ceil()),
            Operator::F64Floor => self.f64_unary(|a| a.floor()),
            Operator::F64Trunc => self.f64_unary(|a| a.trunc()),
            Operator::F64Nearest => self.f64_unary(nearest64),
            Operator::F64Sqrt => self.f64_unary(|a| a.sqrt()),
            Operator::F64Add => self.f64_binary(|a, b| a + b),
            Operator::F64Sub => self.f64_binary(|a, b| a - b),
            Operator::F64Mul => self.f64_binary(|a, b| a * b),
            Operator::F64Div => self.f64_binary(|a, b| a / b),
            Operator::F64Min => self.f64_binary(fmin64),
            Operator::F64Max => self.f64_binary(fmax64),
            Operator::F64Copysign => self.f64_binary(|a, b| a.copysign(b)),

            Operator::I32WrapI64 => {
                let a = self.pop_i64();
                self.push_i32(a as i32);
            }
            Operator::I32TruncF32S => {
                let a = self.pop_f32();
                self.push_i32(trunc_checked(a as f64, -2147483648.0, 2147483648.0)? as i32);
            }
            Operator::I32TruncF32U => {
                let a = self.pop_f32();
                self.push_i32(trunc_checked(a as f64, 0.0, 4294967296.0)? as u32 as i32);
            }
            Operator::I32TruncF64S => {
                let a = self.pop_f64();
                self.push_i32(trunc_checked(a, -2147483648.0, 2147483648.0)? as i32);
            }
            Operator::I32TruncF64U => {
                let a = self.pop_f64();
                self.push_i32(trunc_checked(a, 0.0, 4294967296.0)? as u32 as i32);
            }
            Operator::I64ExtendI32S => {
                let a = self.pop_i32();
                self.push_i64(a as i64);
            }
            Operator::I64ExtendI32U => {
                let a = self.pop_u32();
                self.push_i64(a as i64);
            }
            Operator::I64TruncF32S => {
                let a = self.pop_f32();
                if a.is_nan() {
                    return Err(Trap::BadConversionToInteger.into());
                }
                if a >= 9223372036854775808.0_f32 || a < -9223372036854775808.0_f32 {
                    return Err(Trap::IntegerOverflow.into());
                }
                self.push_i64(a as i64);
            }
            Operator::I64TruncF32U => {
                let a = self.pop_f32();
                if a.is_nan() {
                    return Err(Trap::BadConversionToInteger.into());
                }
                if a >= 18446744073709551616.0_f32 || a <= -1.0_f32 {
                    return Err(Trap::IntegerOverflow.into());
                }
                self.push_i64(a as u64 as i64);
            }
            Operator::I64TruncF64S => {
                let a = self.pop_f64();
                if a.is_nan() {
                    return Err(Trap::BadConversionToInteger.into());
                }
                if a >= 9223372036854775808.0 || a < -9223372036854775808.0 {
                    return Err(Trap::IntegerOverflow.into());
                }
                self.push_i64(a as i64);
            }
            Operator::I64TruncF64U => {
                let a = self.pop_f64();
                if a.is_nan() {
                    return Err(Trap::BadConversionToInteger.into());
                }
                if a >= 18446744073709551616.0 || a <= -1.0 {
                    return Err(Trap::IntegerOverflow.into());
                }
                self.push_i64(a as u64 as i64);
            }
            Operator::F32ConvertI32S => {
                let a = self.pop_i32();
                self.push_f32(a as f32);
            }
            Operator::F32ConvertI32U => {
                let a = self.pop_u32();
                self.push_f32(a as f32);
            }
            Operator::F32ConvertI64S => {
                let a = self.pop_i64();
                self.push_f32(a as f32);
            }
            Operator::F32ConvertI64U => {
                let a = self.pop_u64();
                self.push_f32(a as f32);
            }
            Operator::F32DemoteF64 => {
                let a = self.pop_f64();
                self.push_f32(a as f32);
            }
            Operator::F64ConvertI32S => {
                let a = self.pop_i32();
                self.push_f64(a as f64);
            }
            Operator::F64ConvertI32U => {
                let a = self.pop_u32();
                self.push_f64(a as f64);
            }
            Operator::F64ConvertI64S => {
                let a = self.pop_i64();
                self.push_f64(a as f64);
            }
            Operator::F64ConvertI64U => {
                let a = self.pop_u64();
                self.push_f64(a as f64);
            }
            Operator::F64PromoteF32 => {
                let a = self.pop_f32();
                self.push_f64(a as f64);
            }
            Operator::I32ReinterpretF32 => {
                let bits = self.pop_f32_bits();
                self.push_i32(bits as i32);
            }
            Operator::I64ReinterpretF64 => {
                let bits = self.pop_f64_bits();
                self.push_i64(bits as i64);
            }
            Operator::F32ReinterpretI32 => {
                let a = self.pop_i32();
                self.push(Value::F32(a as u32));
            }
            Operator::F64ReinterpretI64 => {
                let a = self.pop_i64();
                self.push(Value::F64(a as u64));
            }

            Operator::I32Extend8S => self.i32_unary(|a| a as i8 as i32),
            Operator::I32Extend16S => self.i32_unary(|a| a as i16 as i32),
            Operator::I64Extend8S => self.i64_unary(|a| a as i8 as i64),
            Operator::I64Extend16S => self.i64_unary(|a| a as i16 as i64),
            Operator::I64Extend32S => self.i64_unary(|a| a as i32 as i64),

            Operator::I32TruncSatF32S => {
                let a = self.pop_f32();
                self.push_i32(a as i32);
            }
            Operator::I32TruncSatF32U => {
                let a = self.pop_f32();
                self.push_i32(a as u32 as i32);
            }
            Operator::I32TruncSatF64S => {
                let a = self.pop_f64();
                self.push_i32(a as i32);
            }
            Operator::I32TruncSatF64U => {
                let a = self.pop_f64();
                self.push_i32(a as u32 as i32);
            }
            Operator::I64TruncSatF32S => {
                let a = self.pop_f32();
                self.push_i64(a as i64);
            }
            Operator::I64TruncSatF32U => {
                let a = self.pop_f32();
                self.push_i64(a as u64 as i64);
            }
            Operator::I64TruncSatF64S => {
                let a = self.pop_f64();
                self.push_i64(a as i64);
            }
            Operator::I64TruncSatF64U => {
                let a = self.pop_f64();
                self.push_i64(a as u64 as i64);
            }

            Operator::RefNull { ty } => self.push(Value::default_for(*ty)),
            Operator::RefIsNull => {
                let result = match self.pop() {
                    Value::Func(ptr) => ptr.is_null(),
                    Value::Extern(r) => r.is_none(),
                    _ => unreachable!("validated operand type"),
                };
                self.push_bool(result);
            }
            Operator::RefFunc { function_index } => {
                let funcref = unsafe {
                    Instance::from_vmctx(self.state.vmctx)
                        .funcref(FuncIndex::from_u32(*function_index))
                };
                self.push(Value::Func(funcref));
            }

            Operator::MemoryAtomicNotify { memarg } => {
                let count = self.pop_u32();
                let addr = self.pop_u32();
                let ptr = self.atomic_ptr(addr, memarg, 4)?;
                let woken = if self.memory_is_shared() {
                    self.state.engine.parking().notify(ptr as usize, count)
                } else {
                    0
                };
                self.push_i32(woken as i32);
            }
            Operator::MemoryAtomicWait32 { memarg } => {
                let timeout = self.pop_i64();
                let expected = self.pop_i32();
                let addr = self.pop_u32();
                let ptr = self.atomic_ptr(addr, memarg, 4)?;
                if !self.memory_is_shared() {
                    return Err(Trap::AtomicWaitNonSharedMemory.into());
                }
                let word = unsafe { &*(ptr as *const AtomicU32) };
                let result = self.state.engine.parking().wait32(
                    word,
                    expected as u32,
                    wait_timeout(timeout),
                );
                self.push_i32(result as i32);
            }
            Operator::MemoryAtomicWait64 { memarg } => {
                let timeout = self.pop_i64();
                let expected = self.pop_i64();
                let addr = self.pop_u32();
                let ptr = self.atomic_ptr(addr, memarg, 8)?;
                if !self.memory_is_shared() {
                    return Err(Trap::AtomicWaitNonSharedMemory.into());
                }
                let word = unsafe { &*(ptr as *const AtomicU64) };
                let result = self.state.engine.parking().wait64(
                    word,
                    expected as u64,
                    wait_timeout(timeout),
                );
                self.push_i32(result as i32);
            }
            Operator::AtomicFence => fence(Ordering::SeqCst),
            Operator::AtomicLoad { ty, width, memarg } => {
                let addr = self.pop_u32();
                let ptr = self.atomic_ptr(addr, memarg, width.bytes())?;
                let value = unsafe {
                    match width {
                        AtomicWidth::W8 => (*(ptr as *const AtomicU8)).load(Ordering::SeqCst) as u64,
                        AtomicWidth::W16 => {
                            (*(ptr as *const AtomicU16)).load(Ordering::SeqCst) as u64
                        }
                        AtomicWidth::W32 => {
                            (*(ptr as *const AtomicU32)).load(Ordering::SeqCst) as u64
                        }
                        AtomicWidth::W64 => (*(ptr as *const AtomicU64)).load(Ordering::SeqCst),
                    }
                };
                self.push_extended(*ty, value);
            }
            Operator::AtomicStore { ty, width, memarg } => {
                let value = self.pop_int(*ty);
                let addr = self.pop_u32();
                let ptr = self.atomic_ptr(addr, memarg, width.bytes())?;
                unsafe {
                    match width {
                        AtomicWidth::W8 => {
                            (*(ptr as *const AtomicU8)).store(value as u8, Ordering::SeqCst)
                        }
                        AtomicWidth::W16 => {
                            (*(ptr as *const AtomicU16)).store(value as u16, Ordering::SeqCst)
                        }
                        AtomicWidth::W32 => {
                            (*(ptr as *const AtomicU32)).store(value as u32, Ordering::SeqCst)
                        }
                        AtomicWidth::W64 => {
                            (*(ptr as *const AtomicU64)).store(value, Ordering::SeqCst)
                        }
                    }
                }
            }
            Operator::AtomicRmw { op, ty, width, memarg } => {
                let operand = self.pop_int(*ty);
                let addr = self.pop_u32();
                let ptr = self.atomic_ptr(addr, memarg, width.bytes())?;
                let prev = unsafe { atomic_rmw(*op, *width, ptr, operand) };
                self.push_extended(*ty, prev);
            }
            Operator::AtomicCmpxchg { ty, width, memarg } => {
                let replacement = self.pop_int(*ty);
                let expected = self.pop_int(*ty);
                let addr = self.pop_u32();
                let ptr = self.atomic_ptr(addr, memarg, width.bytes())?;
                let prev = unsafe { atomic_cmpxchg(*width, ptr, expected, replacement) };
                self.push_extended(*ty, prev);
            }

            Operator::I8x16Shuffle { lanes } => {
                let b = self.pop_v128();
                let a = self.pop_v128();
                self.push(Value::V128(simd::shuffle(lanes, a, b)));
            }
            Operator::I8x16Swizzle => {
                let b = self.pop_v128();
                let a = self.pop_v128();
                self.push(Value::V128(simd::swizzle(a, b)));
            }
            Operator::V128Not => {
                let a = self.pop_v128();
                self.push(Value::V128(!a));
            }
            Operator::V128And => self.v128_binary(|a, b| a & b),
            Operator::V128AndNot => self.v128_binary(|a, b| a & !b),
            Operator::V128Or => self.v128_binary(|a, b| a | b),
            Operator::V128Xor => self.v128_binary(|a, b| a ^ b),
            Operator::V128Bitselect => {
                let c = self.pop_v128();
                let b = self.pop_v128();
                let a = self.pop_v128();
                self.push(Value::V128(a & c | b & !c));
            }
            Operator::V128AnyTrue => {
                let a = self.pop_v128();
                self.push_bool(a != 0);
            }
            Operator::SimdSplat { shape } => {
                let value = self.pop();
                self.push(Value::V128(simd::splat(*shape, value)));
            }
            Operator::SimdExtractLane { shape, lane, signed } => {
                let a = self.pop_v128();
                self.push(simd::extract_lane(*shape, *lane, *signed, a));
            }
            Operator::SimdReplaceLane { shape, lane } => {
                let value = self.pop();
                let a = self.pop_v128();
                self.push(Value::V128(simd::replace_lane(*shape, *lane, a, value)));
            }
            Operator::SimdBinary { op, shape } => {
                let b = self.pop_v128();
                let a = self.pop_v128();
                self.push(Value::V128(simd::binary(*op, *shape, a, b)));
            }
            Operator::SimdUnary { op, shape } => {
                let a = self.pop_v128();
                self.push(simd::unary(*op, *shape, a));
            }
            Operator::SimdShift { op, shape } => {
                let amount = self.pop_u32();
                let a = self.pop_v128();
                self.push(Value::V128(simd::shift(*op, *shape, a, amount)));
            }
        }
        Ok(Flow::Next)
    }

    fn branch(&self, pc: u32) -> Branch {
        self.state
            .code
            .branches
            .get(&pc)
            .copied()
            .unwrap_or_else(|| unreachable!("lowered branch"))
    }

    fn take_branch(&mut self, entry: Branch) -> Flow {
        let kept = self.stack.split_off(self.stack.len() - entry.keep as usize);
        self.stack.truncate(entry.height as usize);
        self.stack.extend(kept);
        Flow::Jump(entry.target)
    }

    fn interrupted(&self) -> bool {
        let instance = unsafe { Instance::from_vmctx(self.state.vmctx) };
        instance.interrupt().load(Ordering::Relaxed) != 0
    }

    fn call_funcref(&mut self, funcref: *mut VMFuncRef, ty: &FuncType) -> Result<(), Fault> {
        let params = ty.params().len();
        let results = ty.results().len();
        let mut buffer = vec![ValRaw::i32(0); params.max(results).max(1)];
        for i in (0..params).rev() {
            buffer[i] = self.pop().into_raw();
        }
        let status = unsafe { ((*funcref).array_call)((*funcref).vmctx, buffer.as_mut_ptr()) };
        if status != ARRAY_CALL_OK {
            return Err(Fault::Propagated);
        }
        for (i, ty) in ty.results().iter().enumerate() {
            let value = unsafe { Value::from_raw(buffer[i], *ty) };
            self.push(value);
        }
        Ok(())
    }

    fn table_init(
        &mut self,
        elem: ElemIndex,
        table: u32,
        dst: u32,
        src: u32,
        len: u32,
    ) -> Result<(), Fault> {
        let instance = unsafe { Instance::from_vmctx(self.state.vmctx) };
        let segment = &self.state.module.elements[elem.index()];
        let items: &[ConstExpr] =
            if instance.elem_is_live(elem.index()) { &segment.items } else { &[] };
        let end = (src as usize)
            .checked_add(len as usize)
            .ok_or(Trap::TableOutOfBounds)?;
        if end > items.len() {
            return Err(Trap::TableOutOfBounds.into());
        }
        let table = instance.table(TableIndex::from_u32(table)).clone();
        let mut table = table.lock().unwrap_or_else(|e| e.into_inner());
        if segment.element == ValType::FuncRef {
            let mut ptrs = Vec::with_capacity(len as usize);
            for item in &items[src as usize..end] {
                ptrs.push(match item {
                    ConstExpr::RefFunc(index) => instance.funcref(*index),
                    ConstExpr::RefNull(_) => std::ptr::null_mut(),
                    _ => unreachable!("element items are reference constants"),
                });
            }
            table.init_funcrefs(dst, &ptrs).map_err(Fault::Trap)
        } else {
            table
                .fill(dst, TableElement::ExternRef(None), len)
                .map_err(Fault::Trap)
        }
    }

    fn global_get(&mut self, index: u32) {
        let index = GlobalIndex::from_u32(index);
        let ty = self.state.module.globals[index].ty;
        let def = unsafe { &*Instance::from_vmctx(self.state.vmctx).global_ptr(index) };
        let value = match ty {
            ValType::I32 => Value::I32(def.get_i32()),
            ValType::I64 => Value::I64(def.get_i64()),
            ValType::F32 => Value::F32(def.get_f32_bits()),
            ValType::F64 => Value::F64(def.get_f64_bits()),
            ValType::V128 => Value::V128(def.get_u128()),
            ValType::FuncRef => Value::Func(def.get_u128() as u64 as usize as *mut VMFuncRef),
            ValType::ExternRef => {
                let slot = def.get_u128() as u64 as usize;
                Value::Extern(unsafe { crate::store::with_active(|s| s.extern_global(slot)) })
            }
        };
        self.push(value);
    }

    fn global_set(&mut self, index: u32) {
        let value = self.pop();
        let index = GlobalIndex::from_u32(index);
        let def = unsafe { &mut *Instance::from_vmctx(self.state.vmctx).global_ptr(index) };
        match value {
            Value::I32(v) => def.set_i32(v),
            Value::I64(v) => def.set_i64(v),
            Value::F32(bits) => def.set_f32_bits(bits),
            Value::F64(bits) => def.set_f64_bits(bits),
            Value::V128(bits) => def.set_u128(bits),
            Value::Func(ptr) => def.set_u128(ptr as usize as u128),
            Value::Extern(r) => {
                let slot = def.get_u128() as u64 as usize;
                unsafe { crate::store::with_active(|s| s.set_extern_global(slot, r)) };
            }
        }
    }

    // Memory access.

    fn memory(&self) -> &VMMemoryDefinition {
        let instance = unsafe { Instance::from_vmctx(self.state.vmctx) };
        let def = instance
            .memory_definition()
            .unwrap_or_else(|| unreachable!("memory operator without a memory"));
        unsafe { &*def }
    }

    fn memory_is_shared(&self) -> bool {
        let instance = unsafe { Instance::from_vmctx(self.state.vmctx) };
        match instance.memory() {
            Some(memory) => memory.lock().unwrap_or_else(|e| e.into_inner()).is_shared(),
            None => false,
        }
    }

    fn mem_addr(&self, addr: u32, offset: u32, len: u32) -> Result<*mut u8, Fault> {
        let def = self.memory();
        let ea = addr as u64 + offset as u64;
        if ea + len as u64 > def.current_length() as u64 {
            return Err(Trap::MemoryOutOfBounds.into());
        }
        Ok(unsafe { def.base.add(ea as usize) })
    }

    fn atomic_ptr(&self, addr: u32, memarg: &MemArg, width: u32) -> Result<*mut u8, Fault> {
        let ea = addr as u64 + memarg.offset as u64;
        if ea % width as u64 != 0 {
            return Err(Trap::HeapMisaligned.into());
        }
        self.mem_addr(addr, memarg.offset, width)
    }

    fn load<const N: usize>(&mut self, memarg: &MemArg) -> Result<[u8; N], Fault> {
        let addr = self.pop_u32();
        let ptr = self.mem_addr(addr, memarg.offset, N as u32)?;
        let mut bytes = [0; N];
        unsafe { std::ptr::copy_nonoverlapping(ptr, bytes.as_mut_ptr(), N) };
        Ok(bytes)
    }

    fn store<const N: usize>(&mut self, memarg: &MemArg, bytes: [u8; N]) -> Result<(), Fault> {
        let addr = self.pop_u32();
        let ptr = self.mem_addr(addr, memarg.offset, N as u32)?;
        unsafe { std::ptr::copy_nonoverlapping(bytes.as_ptr(), ptr, N) };
        Ok(())
    }

    // Stack plumbing. Operand types were validated, so a mismatch here is
    // an interpreter bug.

    fn push(&mut self, value: Value) {
        self.stack.push(value);
    }

    fn pop(&mut self) -> Value {
        self.stack.pop().unwrap_or_else(|| unreachable!("validated stack height"))
    }

    fn push_i32(&mut self, value: i32) {
        self.stack.push(Value::I32(value));
    }

    fn push_i64(&mut self, value: i64) {
        self.stack.push(Value::I64(value));
    }

    fn push_f32(&mut self, value: f32) {
        self.stack.push(Value::F32(value.to_bits()));
    }

    fn push_f64(&mut self, value: f64) {
        self.stack.push(Value::F64(value.to_bits()));
    }

    fn push_bool(&mut self, value: bool) {
        self.push_i32(value as i32);
    }

    /// Pushes a zero-extended atomic result as `ty`.
    fn push_extended(&mut self, ty: ValType, value: u64) {
        match ty {
            ValType::I32 => self.push_i32(value as u32 as i32),
            ValType::I64 => self.push_i64(value as i64),
            _ => unreachable!("atomics are integer typed"),
        }
    }

    fn pop_int(&mut self, ty: ValType) -> u64 {
        match ty {
            ValType::I32 => self.pop_u32() as u64,
            ValType::I64 => self.pop_u64(),
            _ => unreachable!("atomics are integer typed"),
        }
    }

    fn pop_i32(&mut self) -> i32 {
        match self.pop() {
            Value::I32(v) => v,
            _ => unreachable!("validated operand type"),
        }
    }

    fn pop_u32(&mut self) -> u32 {
        self.pop_i32() as u32
    }

    fn pop_i64(&mut self) -> i64 {
        match self.pop() {
            Value::I64(v) => v,
            _ => unreachable!("validated operand type"),
        }
    }

    fn pop_u64(&mut self) -> u64 {
        self.pop_i64() as u64
    }

    fn pop_f32_bits(&mut self) -> u32 {
        match self.pop() {
            Value::F32(bits) => bits,
            _ => unreachable!("validated operand type"),
        }
    }

    fn pop_f64_bits(&mut self) -> u64 {
        match self.pop() {
            Value::F64(bits) => bits,
            _ => unreachable!("validated operand type"),
        }
    }

    fn pop_f32(&mut self) -> f32 {
        f32::from_bits(self.pop_f32_bits())
    }

    fn pop_f64(&mut self) -> f64 {
        f64::from_bits(self.pop_f64_bits())
    }

    fn pop_v128(&mut self) -> u128 {
        match self.pop() {
            Value::V128(v) => v,
            _ => unreachable!("validated operand type"),
        }
    }

    fn i32_unary(&mut self, f: impl FnOnce(i32) -> i32) {
        let a = self.pop_i32();
        self.push_i32(f(a));
    }

    fn i64_unary(&mut self, f: impl FnOnce(i64) -> i64) {
        let a = self.pop_i64();
        self.push_i64(f(a));
    }

    fn i32_binary(&mut self, f: impl FnOnce(i32, i32) -> i32) {
        let b = self.pop_i32();
        let a = self.pop_i32();
        self.push_i32(f(a, b));
    }

    fn i64_binary(&mut self, f: impl FnOnce(i64, i64) -> i64) {
        let b = self.pop_i64();
        let a = self.pop_i64();
        self.push_i64(f(a, b));
    }

    fn f32_unary(&mut self, f: impl FnOnce(f32) -> f32) {
        let a = self.pop_f32();
        self.push_f32(f(a));
    }

    fn f64_unary(&mut self, f: impl FnOnce(f64) -> f64) {
        let a = self.pop_f64();
        self.push_f64(f(a));
    }

    fn f32_binary(&mut self, f: impl FnOnce(f32, f32) -> f32) {
        let b = self.pop_f32();
        let a = self.pop_f32();
        self.push_f32(f(a, b));
    }

    fn f64_binary(&mut self, f: impl FnOnce(f64, f64) -> f64) {
        let b = self.pop_f64();
        let a = self.pop_f64();
        self.push_f64(f(a, b));
    }

    fn v128_binary(&mut self, f: impl FnOnce(u128, u128) -> u128) {
        let b = self.pop_v128();
        let a = self.pop_v128();
        self.push(Value::V128(f(a, b)));
    }

    fn i32_cmp(&mut self, f: impl FnOnce(i32, i32) -> bool) {
        let b = self.pop_i32();
        let a = self.pop_i32();
        self.push_bool(f(a, b));
    }

    fn u32_cmp(&mut self, f: impl FnOnce(u32, u32) -> bool) {
        let b = self.pop_u32();
        let a = self.pop_u32();
        self.push_bool(f(a, b));
    }

    fn i64_cmp(&mut self, f: impl FnOnce(i64, i64) -> bool) {
        let b = self.pop_i64();
        let a = self.pop_i64();
        self.push_bool(f(a, b));
    }

    fn u64_cmp(&mut self, f: impl FnOnce(u64, u64) -> bool) {
        let b = self.pop_u64();
        let a = self.pop_u64();
        self.push_bool(f(a, b));
    }

    fn f32_cmp(&mut self, f: impl FnOnce(f32, f32) -> bool) {
        let b = self.pop_f32();
        let a = self.pop_f32();
        self.push_bool(f(a, b));
    }

    fn f64_cmp(&mut self, f: impl FnOnce(f64, f64) -> bool) {
        let b = self.pop_f64();
        let a = self.pop_f64();
        self.push_bool(f(a, b));
    }
}

fn element_to_value(elem: TableElement) -> Value {
    match elem {
        TableElement::FuncRef(ptr) => Value::Func(ptr),
        TableElement::ExternRef(r) => Value::Extern(r),
    }
}

fn value_to_element(value: Value) -> TableElement {
    match value {
        Value::Func(ptr) => TableElement::FuncRef(ptr),
        Value::Extern(r) => TableElement::ExternRef(r),
        _ => unreachable!("validated operand type"),
    }
}

fn wait_timeout(nanos: i64) -> Option<Duration> {
    if nanos < 0 {
        None
    } else {
        Some(Duration::from_nanos(nanos as u64))
    }
}

/// Truncation with the trapping range check of the non-saturating
/// float-to-int conversions: the result must be strictly above `lo - 1`
/// and strictly below `hi`.
fn trunc_checked(x: f64, lo: f64, hi: f64) -> Result<i64, Fault> {
    if x.is_nan() {
        return Err(Trap::BadConversionToInteger.into());
    }
    if x >= hi || x <= lo - 1.0 {
        return Err(Trap::IntegerOverflow.into());
    }
    Ok(x as i64)
}

fn nearest32(x: f32) -> f32 {
    let round = x.round();
    if (x - round).abs() == 0.5 { (x / 2.0).round() * 2.0 } else { round }
}

fn nearest64(x: f64) -> f64 {
    let round = x.round();
    if (x - round).abs() == 0.5 { (x / 2.0).round() * 2.0 } else { round }
}

fn fmin32(a: f32, b: f32) -> f32 {
    if a.is_nan() || b.is_nan() {
        f32::NAN
    } else if a == b {
        // min(-0, +0) is -0.
        if a.is_sign_negative() { a } else { b }
    } else if a < b {
        a
    } else {
        b
    }
}

fn fmax32(a: f32, b: f32) -> f32 {
    if a.is_nan() || b.is_nan() {
        f32::NAN
    } else if a == b {
        if a.is_sign_positive() { a } else { b }
    } else if a > b {
        a
    } else {
        b
    }
}

fn fmin64(a: f64, b: f64) -> f64 {
    if a.is_nan() || b.is_nan() {
        f64::NAN
    } else if a == b {
        if a.is_sign_negative() { a } else { b }
    } else if a < b {
        a
    } else {
        b
    }
}

fn fmax64(a: f64, b: f64) -> f64 {
    if a.is_nan() || b.is_nan() {
        f64::NAN
    } else if a == b {
        if a.is_sign_positive() { a } else { b }
    } else if a > b {
        a
    } else {
        b
    }
}

unsafe fn atomic_rmw(op: AtomicRmwOp, width: AtomicWidth, ptr: *mut u8, operand: u64) -> u64 {
    macro_rules! rmw {
        ($atomic:ty, $prim:ty) => {{
            let word = &*(ptr as *const $atomic);
            let v = operand as $prim;
            (match op {
                AtomicRmwOp::Add => word.fetch_add(v, Ordering::SeqCst),
                AtomicRmwOp::Sub => word.fetch_sub(v, Ordering::SeqCst),
                AtomicRmwOp::And => word.fetch_and(v, Ordering::SeqCst),
                AtomicRmwOp::Or => word.fetch_or(v, Ordering::SeqCst),
                AtomicRmwOp::Xor => word.fetch_xor(v, Ordering::SeqCst),
                AtomicRmwOp::Xchg => word.swap(v, Ordering::SeqCst),
            }) as u64
        }};
    }
    match width {
        AtomicWidth::W8 => rmw!(AtomicU8, u8),
        AtomicWidth::W16 => rmw!(AtomicU16, u16),
        AtomicWidth::W32 => rmw!(AtomicU32, u32),
        AtomicWidth::W64 => rmw!(AtomicU64, u64),
    }
}

unsafe fn atomic_cmpxchg(width: AtomicWidth, ptr: *mut u8, expected: u64, new: u64) -> u64 {
    macro_rules! cmpxchg {
        ($atomic:ty, $prim:ty) => {{
            let word = &*(ptr as *const $atomic);
            match word.compare_exchange(
                expected as $prim,
                new as $prim,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(prev) | Err(prev) => prev as u64,
            }
        }};
    }
    match width {
        AtomicWidth::W8 => cmpxchg!(AtomicU8, u8),
        AtomicWidth::W16 => cmpxchg!(AtomicU16, u16),
        AtomicWidth::W32 => cmpxchg!(AtomicU32, u32),
        AtomicWidth::W64 => cmpxchg!(AtomicU64, u64),
    }
}
