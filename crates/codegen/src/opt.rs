//! Simple IR cleanups run between translation and instruction selection.
//!
//! Two passes: constant folding with algebraic identities, then dead
//! code elimination. Both are deliberately conservative about traps:
//! divisions and memory accesses are never folded away or deleted, and
//! floating-point operations are never evaluated at compile time so that
//! NaN payloads come out of the hardware, not the compiler.

use crate::ir::{BinaryOp, ConvertOp, Function, Inst, InstData, IntCC, IntUnaryOp, Type, Value};
use std::collections::{HashMap, HashSet};

/// Runs the cleanup passes over `func` in place.
pub fn optimize(func: &mut Function) {
    fold_constants(func);
    eliminate_dead_code(func);
}

/// Folds integer operations on constants and rewrites trivial
/// identities. Values are created in definition order, so one forward
/// scan over the instruction map sees every definition before its uses.
fn fold_constants(func: &mut Function) {
    let mut consts: HashMap<Value, u64> = HashMap::new();
    let mut aliases: HashMap<Value, Value> = HashMap::new();

    for index in 0..func.dfg.insts.len() {
        let inst = Inst::from_u32(index as u32);

        if !aliases.is_empty() {
            let mut data = func.dfg.insts[inst].clone();
            data.map_args(|arg| {
                if let Some(&replacement) = aliases.get(arg) {
                    *arg = replacement;
                }
            });
            func.dfg.insts[inst] = data;
        }

        let folded = match &func.dfg.insts[inst] {
            InstData::Iconst { bits, .. } => {
                consts.insert(func.dfg.first_result(inst), *bits);
                None
            }
            InstData::Binary { op, ty, args } => {
                match (consts.get(&args[0]).copied(), consts.get(&args[1]).copied()) {
                    (Some(lhs), Some(rhs)) => Some(Folded::Const(fold_binary(*op, *ty, lhs, rhs))),
                    (_, Some(rhs)) => binary_identity(*op, *ty, args[0], rhs),
                    _ => None,
                }
            }
            InstData::IntUnary { op, ty, arg } => consts
                .get(arg)
                .map(|&bits| Folded::Const(fold_int_unary(*op, *ty, bits))),
            InstData::Icmp { cond, ty, args } => {
                match (consts.get(&args[0]), consts.get(&args[1])) {
                    (Some(&lhs), Some(&rhs)) => {
                        Some(Folded::Const(fold_icmp(*cond, *ty, lhs, rhs) as u64))
                    }
                    _ => None,
                }
            }
            InstData::Convert { op, arg } => consts
                .get(arg)
                .and_then(|&bits| fold_convert(*op, bits))
                .map(Folded::Const),
            InstData::Select { args, .. } => consts
                .get(&args[0])
                .map(|&cond| Folded::Alias(if cond != 0 { args[1] } else { args[2] })),
            _ => None,
        };

        match folded {
            Some(Folded::Const(bits)) => {
                let result = func.dfg.first_result(inst);
                let ty = func.dfg.value_type(result);
                let bits = truncate(ty, bits);
                func.dfg.insts[inst] = InstData::Iconst { ty, bits };
                consts.insert(result, bits);
            }
            Some(Folded::Alias(target)) => {
                let result = func.dfg.first_result(inst);
                let target = aliases.get(&target).copied().unwrap_or(target);
                aliases.insert(result, target);
                if let Some(&bits) = consts.get(&target) {
                    consts.insert(result, bits);
                }
            }
            None => {}
        }
    }
}

enum Folded {
    Const(u64),
    Alias(Value),
}

fn truncate(ty: Type, bits: u64) -> u64 {
    match ty {
        Type::I32 | Type::F32 => bits & 0xffff_ffff,
        Type::I64 | Type::F64 => bits,
    }
}

fn binary_identity(op: BinaryOp, ty: Type, lhs: Value, rhs: u64) -> Option<Folded> {
    let ones = truncate(ty, u64::MAX);
    match op {
        BinaryOp::Add
        | BinaryOp::Sub
        | BinaryOp::Or
        | BinaryOp::Xor
        | BinaryOp::Shl
        | BinaryOp::ShrS
        | BinaryOp::ShrU
        | BinaryOp::Rotl
        | BinaryOp::Rotr
            if rhs == 0 =>
        {
            Some(Folded::Alias(lhs))
        }
        BinaryOp::Mul if rhs == 1 => Some(Folded::Alias(lhs)),
        BinaryOp::Mul | BinaryOp::And if rhs == 0 => Some(Folded::Const(0)),
        BinaryOp::And if rhs == ones => Some(Folded::Alias(lhs)),
        _ => None,
    }
}

fn fold_binary(op: BinaryOp, ty: Type, lhs: u64, rhs: u64) -> u64 {
    match ty {
        Type::I32 => {
            let (a, b) = (lhs as u32, rhs as u32);
            let result = match op {
                BinaryOp::Add => a.wrapping_add(b),
                BinaryOp::Sub => a.wrapping_sub(b),
                BinaryOp::Mul => a.wrapping_mul(b),
                BinaryOp::And => a & b,
                BinaryOp::Or => a | b,
                BinaryOp::Xor => a ^ b,
                BinaryOp::Shl => a.wrapping_shl(b),
                BinaryOp::ShrS => ((a as i32).wrapping_shr(b)) as u32,
                BinaryOp::ShrU => a.wrapping_shr(b),
                BinaryOp::Rotl => a.rotate_left(b & 31),
                BinaryOp::Rotr => a.rotate_right(b & 31),
            };
            result as u64
        }
        _ => {
            let (a, b) = (lhs, rhs);
            match op {
                BinaryOp::Add => a.wrapping_add(b),
                BinaryOp::Sub => a.wrapping_sub(b),
                BinaryOp::Mul => a.wrapping_mul(b),
                BinaryOp::And => a & b,
                BinaryOp::Or => a | b,
                BinaryOp::Xor => a ^ b,
                BinaryOp::Shl => a.wrapping_shl(b as u32),
                BinaryOp::ShrS => ((a as i64).wrapping_shr(b as u32)) as u64,
                BinaryOp::ShrU => a.wrapping_shr(b as u32),
                BinaryOp::Rotl => a.rotate_left(b as u32 & 63),
                BinaryOp::Rotr => a.rotate_right(b as u32 & 63),
            }
        }
    }
}

fn fold_int_unary(op: IntUnaryOp, ty: Type, bits: u64) -> u64 {
    match ty {
        Type::I32 => {
            let a = bits as u32;
            let result = match op {
                IntUnaryOp::Clz => a.leading_zeros(),
                IntUnaryOp::Ctz => a.trailing_zeros(),
                IntUnaryOp::Popcnt => a.count_ones(),
                IntUnaryOp::Extend8S => a as i8 as i32 as u32,
                IntUnaryOp::Extend16S => a as i16 as i32 as u32,
                IntUnaryOp::Extend32S => a,
            };
            result as u64
        }
        _ => match op {
            IntUnaryOp::Clz => bits.leading_zeros() as u64,
            IntUnaryOp::Ctz => bits.trailing_zeros() as u64,
            IntUnaryOp::Popcnt => bits.count_ones() as u64,
            IntUnaryOp::Extend8S => bits as i8 as i64 as u64,
            IntUnaryOp::Extend16S => bits as i16 as i64 as u64,
            IntUnaryOp::Extend32S => bits as i32 as i64 as u64,
        },
    }
}

fn fold_icmp(cond: IntCC, ty: Type, lhs: u64, rhs: u64) -> bool {
    let (a, b) = match ty {
        Type::I32 => (lhs as u32 as u64, rhs as u32 as u64),
        _ => (lhs, rhs),
    };
    let (sa, sb) = match ty {
        Type::I32 => (lhs as u32 as i32 as i64, rhs as u32 as i32 as i64),
        _ => (lhs as i64, rhs as i64),
    };
    match cond {
        IntCC::Eq => a == b,
        IntCC::Ne => a != b,
        IntCC::LtS => sa < sb,
        IntCC::LtU => a < b,
        IntCC::GtS => sa > sb,
        IntCC::GtU => a > b,
        IntCC::LeS => sa <= sb,
        IntCC::LeU => a <= b,
        IntCC::GeS => sa >= sb,
        IntCC::GeU => a >= b,
    }
}

/// Folds the integer-to-integer conversions; anything touching floats is
/// left to the hardware.
fn fold_convert(op: ConvertOp, bits: u64) -> Option<u64> {
    match op {
        ConvertOp::I32WrapI64 => Some(bits & 0xffff_ffff),
        ConvertOp::I64ExtendI32S => Some(bits as u32 as i32 as i64 as u64),
        ConvertOp::I64ExtendI32U => Some(bits & 0xffff_ffff),
        _ => None,
    }
}

/// Removes instructions whose results are unused and which cannot trap
/// or write anything. A single reverse scan suffices because a value is
/// always created before any instruction that uses it.
fn eliminate_dead_code(func: &mut Function) {
    let mut live: HashSet<Value> = HashSet::new();
    let mut keep: HashSet<Inst> = HashSet::new();

    for index in (0..func.dfg.insts.len()).rev() {
        let inst = Inst::from_u32(index as u32);
        let data = &func.dfg.insts[inst];
        let used = func.dfg.inst_results(inst).iter().any(|r| live.contains(r));
        if used || data.has_side_effect() {
            keep.insert(inst);
            data.for_each_arg(|arg| {
                live.insert(arg);
            });
        }
    }

    for &block in &func.layout {
        func.blocks[block].insts.retain(|inst| keep.contains(inst));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frontend::translate_function;
    use riptide_environ::{decode_module, validate_module, DefinedFuncIndex, WasmFeatures};

    fn build(wat: &str) -> Function {
        let bytes = wat::parse_str(wat).unwrap();
        let module = decode_module(&bytes, &WasmFeatures::default()).unwrap();
        validate_module(&module).unwrap();
        let mut func = translate_function(&module, DefinedFuncIndex::from_u32(0)).unwrap();
        optimize(&mut func);
        func
    }

    fn entry_insts(func: &Function) -> Vec<&InstData> {
        func.blocks[func.entry]
            .insts
            .iter()
            .map(|&inst| &func.dfg.insts[inst])
            .collect()
    }

    #[test]
    fn constant_addition_folds() {
        let func = build(
            r#"(module (func (result i32)
                i32.const 40
                i32.const 2
                i32.add))"#,
        );
        let insts = entry_insts(&func);
        // The add is rewritten to a constant; the dead original
        // constants are removed.
        assert_eq!(insts.len(), 2);
        assert!(matches!(insts[0], InstData::Iconst { bits: 42, .. }));
        assert!(matches!(insts[1], InstData::Return { .. }));
    }

    #[test]
    fn add_zero_is_erased() {
        let func = build(
            r#"(module (func (param i64) (result i64)
                local.get 0
                i64.const 0
                i64.add))"#,
        );
        let insts = entry_insts(&func);
        assert_eq!(insts.len(), 1);
        match insts[0] {
            InstData::Return { args } => {
                // The returned value is the parameter itself.
                assert_eq!(args[0], func.blocks[func.entry].params[0]);
            }
            other => panic!("expected return, got {other:?}"),
        }
    }

    #[test]
    fn dead_division_survives() {
        let func = build(
            r#"(module (func (param i32 i32)
                local.get 0
                local.get 1
                i32.div_s
                drop))"#,
        );
        let insts = entry_insts(&func);
        assert!(insts.iter().any(|data| matches!(data, InstData::Div { .. })));
    }

    #[test]
    fn signed_comparison_folds() {
        let func = build(
            r#"(module (func (result i32)
                i32.const -1
                i32.const 1
                i32.lt_s))"#,
        );
        let insts = entry_insts(&func);
        assert!(matches!(insts[0], InstData::Iconst { bits: 1, .. }));
    }

    #[test]
    fn floats_are_never_folded() {
        let func = build(
            r#"(module (func (result f32)
                f32.const 1.5
                f32.const 2.5
                f32.add))"#,
        );
        let insts = entry_insts(&func);
        assert!(insts
            .iter()
            .any(|data| matches!(data, InstData::FloatBinary { .. })));
    }
}
