//! Translation from decoded wasm operators to the SSA IR.
//!
//! The translator threads locals and the operand stack through control
//! flow as block parameters. A `block` gets one merge block whose
//! parameters are the live locals followed by the block results; a
//! `loop` gets a header block whose parameters are the locals followed
//! by the loop parameters. Conditional branches and branch tables only
//! target parameterless blocks, so every argument-carrying edge is an
//! unconditional jump, possibly through a one-jump trampoline block.
//!
//! Functions using features the native backend does not handle are
//! rejected with [`CodegenError::Unsupported`]; the caller runs those
//! through the interpreter instead.

use crate::error::{CodegenError, CodegenResult};
use crate::ir::{
    BinaryOp, Block, ConvertOp, DivOp, FloatBinaryOp, FloatCC, FloatUnaryOp, Function, InstData,
    IntCC, IntUnaryOp, LoadKind, StoreKind, Type, Value,
};
use crate::unsupported;
use riptide_environ::{
    BlockType, DefinedFuncIndex, FuncIndex, GlobalIndex, Module, Operator, TableIndex, Trap,
    TypeIndex,
};
use smallvec::SmallVec;

/// Translation aborts once a function produces this many SSA values; the
/// linear-scan allocator degrades badly past it and the interpreter is a
/// better home for such functions.
const MAX_SSA_VALUES: usize = 10_000;

/// Companion limit on basic blocks.
const MAX_BLOCKS: usize = 2_000;

/// Translates one defined function into SSA form.
pub fn translate_function(module: &Module, defined: DefinedFuncIndex) -> CodegenResult<Function> {
    let func_index = module.func_index(defined);
    let ty = module.func_type(func_index);
    let params = convert_types(ty.params())?;
    let results = convert_types(ty.results())?;

    let body = &module.code[defined];
    let mut local_types = params.clone();
    for &local in &body.locals {
        match Type::from_wasm(local) {
            Some(ty) => local_types.push(ty),
            None => unsupported!("local of type {:?}", local),
        }
    }

    let mut func = Function::new(func_index.as_u32(), params.clone(), results.clone());
    let entry = func.entry;
    let mut locals = Vec::with_capacity(local_types.len());
    for &ty in &params {
        locals.push(func.append_block_param(entry, ty));
    }
    for &ty in &local_types[params.len()..] {
        let data = match ty {
            Type::I32 | Type::I64 => InstData::Iconst { ty, bits: 0 },
            Type::F32 | Type::F64 => InstData::Fconst { ty, bits: 0 },
        };
        let inst = func.append_inst(entry, data, &[ty]);
        locals.push(func.dfg.first_result(inst));
    }

    let mut translator = Translator {
        module,
        func,
        block: entry,
        locals,
        local_types,
        stack: Vec::new(),
        frames: vec![ControlFrame {
            kind: FrameKind::Func,
            params: Vec::new(),
            results,
            height: 0,
            branched: false,
        }],
        reachable: true,
        skip_depth: 0,
    };

    for (op, &offset) in body.code.iter().zip(body.offsets.iter()) {
        translator.translate(op, offset)?;
        if translator.func.num_values() > MAX_SSA_VALUES {
            return Err(CodegenError::ImplLimit(format!(
                "function {} exceeds the SSA value limit",
                func_index.as_u32()
            )));
        }
        if translator.func.num_blocks() > MAX_BLOCKS {
            return Err(CodegenError::ImplLimit(format!(
                "function {} exceeds the block limit",
                func_index.as_u32()
            )));
        }
    }
    debug_assert!(translator.frames.is_empty());

    Ok(translator.func)
}

fn convert_types(types: &[riptide_environ::ValType]) -> CodegenResult<Vec<Type>> {
    types
        .iter()
        .map(|&ty| {
            Type::from_wasm(ty).ok_or_else(|| {
                CodegenError::Unsupported(format!("value of type {:?} in a signature", ty))
            })
        })
        .collect()
}

enum FrameKind {
    /// The implicit function body; branching to it returns.
    Func,
    Block {
        merge: Block,
    },
    Loop {
        header: Block,
    },
    If {
        merge: Block,
        /// The untranslated else arm, with the locals and parameters as
        /// they were when the `if` was entered. Taken (and cleared) when
        /// an `else` is seen, or used to synthesize the missing arm.
        else_block: Option<Block>,
        else_locals: Vec<Value>,
        else_params: Vec<Value>,
    },
}

struct ControlFrame {
    kind: FrameKind,
    params: Vec<Type>,
    results: Vec<Type>,
    /// Operand stack height below this frame's parameters.
    height: usize,
    /// Whether any edge targets the merge block.
    branched: bool,
}

struct Translator<'a> {
    module: &'a Module,
    func: Function,
    /// The block instructions are currently appended to.
    block: Block,
    /// Current SSA value of each local.
    locals: Vec<Value>,
    local_types: Vec<Type>,
    stack: Vec<Value>,
    frames: Vec<ControlFrame>,
    reachable: bool,
    /// Nesting depth of skipped control constructs while unreachable.
    skip_depth: u32,
}

impl Translator<'_> {
    fn translate(&mut self, op: &Operator, offset: u32) -> CodegenResult<()> {
        if !self.reachable {
            match op {
                Operator::Block { .. } | Operator::Loop { .. } | Operator::If { .. } => {
                    self.skip_depth += 1;
                }
                Operator::Else if self.skip_depth == 0 => self.begin_else(),
                Operator::End => {
                    if self.skip_depth == 0 {
                        self.end_frame()?;
                    } else {
                        self.skip_depth -= 1;
                    }
                }
                _ => {}
            }
            return Ok(());
        }

        match op {
            Operator::Unreachable => {
                self.emit(
                    InstData::Trap { code: Trap::UnreachableCodeReached, wasm_offset: offset },
                    &[],
                );
                self.reachable = false;
            }
            Operator::Nop => {}

            Operator::Block { ty } => {
                let (params, results) = self.blocktype(*ty)?;
                let merge = self.merge_block(&results);
                self.frames.push(ControlFrame {
                    height: self.stack.len() - params.len(),
                    kind: FrameKind::Block { merge },
                    params,
                    results,
                    branched: false,
                });
            }
            Operator::Loop { ty } => {
                let (params, results) = self.blocktype(*ty)?;
                let header = self.merge_block(&params);
                let args = self.branch_args(params.len());
                self.stack.truncate(self.stack.len() - params.len());
                let height = self.stack.len();
                self.emit(InstData::Jump { dest: header, args }, &[]);
                self.switch_to(header, height);
                self.frames.push(ControlFrame {
                    kind: FrameKind::Loop { header },
                    params,
                    results,
                    height,
                    branched: false,
                });
            }
            Operator::If { ty } => {
                let (params, results) = self.blocktype(*ty)?;
                let cond = self.pop();
                let merge = self.merge_block(&results);
                let then_block = self.func.create_block();
                let else_block = self.func.create_block();
                let else_params = self.stack[self.stack.len() - params.len()..].to_vec();
                self.emit(
                    InstData::Brif { cond, then_dest: then_block, else_dest: else_block },
                    &[],
                );
                self.frames.push(ControlFrame {
                    height: self.stack.len() - params.len(),
                    kind: FrameKind::If {
                        merge,
                        else_block: Some(else_block),
                        else_locals: self.locals.clone(),
                        else_params,
                    },
                    params,
                    results,
                    branched: false,
                });
                self.block = then_block;
            }
            Operator::Else => {
                // The then arm falls through to the merge point.
                let frame = self.frames.last().ok_or_else(malformed)?;
                let results = frame.results.len();
                let args = self.branch_args(results);
                self.stack.truncate(self.stack.len() - results);
                let merge = match &frame.kind {
                    FrameKind::If { merge, .. } => *merge,
                    _ => return Err(malformed()),
                };
                self.emit(InstData::Jump { dest: merge, args }, &[]);
                if let Some(frame) = self.frames.last_mut() {
                    frame.branched = true;
                }
                self.begin_else();
            }
            Operator::End => self.end_frame()?,

            Operator::Br { relative_depth } => {
                self.branch_to(*relative_depth, self.block);
                self.reachable = false;
            }
            Operator::BrIf { relative_depth } => {
                let cond = self.pop();
                let trampoline = self.func.create_block();
                self.branch_to(*relative_depth, trampoline);
                let fallthrough = self.func.create_block();
                self.emit(
                    InstData::Brif { cond, then_dest: trampoline, else_dest: fallthrough },
                    &[],
                );
                self.block = fallthrough;
            }
            Operator::BrTable { targets, default } => {
                let index = self.pop();
                let table = targets
                    .iter()
                    .map(|&depth| {
                        let trampoline = self.func.create_block();
                        self.branch_to(depth, trampoline);
                        trampoline
                    })
                    .collect();
                let default_block = self.func.create_block();
                self.branch_to(*default, default_block);
                self.emit(
                    InstData::BrTable { index, targets: table, default: default_block },
                    &[],
                );
                self.reachable = false;
            }
            Operator::Return => {
                let count = self.func.results.len();
                let args = SmallVec::from_slice(&self.stack[self.stack.len() - count..]);
                self.emit(InstData::Return { args }, &[]);
                self.reachable = false;
            }

            Operator::Call { function_index } => {
                let func = FuncIndex::from_u32(*function_index);
                let ty = self.module.func_type(func).clone();
                let params = convert_types(ty.params())?;
                let results = convert_types(ty.results())?;
                let args = self.pop_many(params.len());
                let inst = self.emit(
                    InstData::Call { func, args, wasm_offset: offset },
                    &results,
                );
                self.push_results(inst);
            }
            Operator::CallIndirect { type_index, table_index } => {
                let type_index = TypeIndex::from_u32(*type_index);
                let ty = self.module.types[type_index].clone();
                let params = convert_types(ty.params())?;
                let results = convert_types(ty.results())?;
                let callee = self.pop();
                let args = self.pop_many(params.len());
                let inst = self.emit(
                    InstData::CallIndirect {
                        type_index,
                        table_index: TableIndex::from_u32(*table_index),
                        callee,
                        args,
                        wasm_offset: offset,
                    },
                    &results,
                );
                self.push_results(inst);
            }

            Operator::Drop => {
                self.pop();
            }
            Operator::Select => self.select()?,
            Operator::TypedSelect { ty } => {
                if Type::from_wasm(*ty).is_none() {
                    unsupported!("select on {:?}", ty);
                }
                self.select()?;
            }

            Operator::LocalGet { local_index } => {
                self.stack.push(self.locals[*local_index as usize]);
            }
            Operator::LocalSet { local_index } => {
                let value = self.pop();
                self.locals[*local_index as usize] = value;
            }
            Operator::LocalTee { local_index } => {
                let value = *self.stack.last().ok_or_else(malformed)?;
                self.locals[*local_index as usize] = value;
            }
            Operator::GlobalGet { global_index } => {
                let index = GlobalIndex::from_u32(*global_index);
                let ty = match Type::from_wasm(self.module.globals[index].ty) {
                    Some(ty) => ty,
                    None => unsupported!("global of type {:?}", self.module.globals[index].ty),
                };
                let inst = self.emit(InstData::GlobalGet { index, ty }, &[ty]);
                self.push_results(inst);
            }
            Operator::GlobalSet { global_index } => {
                let index = GlobalIndex::from_u32(*global_index);
                if Type::from_wasm(self.module.globals[index].ty).is_none() {
                    unsupported!("global of type {:?}", self.module.globals[index].ty);
                }
                let arg = self.pop();
                self.emit(InstData::GlobalSet { index, arg }, &[]);
            }

            Operator::I32Load { memarg } => self.load(LoadKind::I32, memarg.offset, offset),
            Operator::I64Load { memarg } => self.load(LoadKind::I64, memarg.offset, offset),
            Operator::F32Load { memarg } => self.load(LoadKind::F32, memarg.offset, offset),
            Operator::F64Load { memarg } => self.load(LoadKind::F64, memarg.offset, offset),
            Operator::I32Load8S { memarg } => self.load(LoadKind::I32S8, memarg.offset, offset),
            Operator::I32Load8U { memarg } => self.load(LoadKind::I32U8, memarg.offset, offset),
            Operator::I32Load16S { memarg } => self.load(LoadKind::I32S16, memarg.offset, offset),
            Operator::I32Load16U { memarg } => self.load(LoadKind::I32U16, memarg.offset, offset),
            Operator::I64Load8S { memarg } => self.load(LoadKind::I64S8, memarg.offset, offset),
            Operator::I64Load8U { memarg } => self.load(LoadKind::I64U8, memarg.offset, offset),
            Operator::I64Load16S { memarg } => self.load(LoadKind::I64S16, memarg.offset, offset),
            Operator::I64Load16U { memarg } => self.load(LoadKind::I64U16, memarg.offset, offset),
            Operator::I64Load32S { memarg } => self.load(LoadKind::I64S32, memarg.offset, offset),
            Operator::I64Load32U { memarg } => self.load(LoadKind::I64U32, memarg.offset, offset),

            Operator::I32Store { memarg } => self.store(StoreKind::I32, memarg.offset, offset),
            Operator::I64Store { memarg } => self.store(StoreKind::I64, memarg.offset, offset),
            Operator::F32Store { memarg } => self.store(StoreKind::F32, memarg.offset, offset),
            Operator::F64Store { memarg } => self.store(StoreKind::F64, memarg.offset, offset),
            Operator::I32Store8 { memarg } => self.store(StoreKind::I8, memarg.offset, offset),
            Operator::I32Store16 { memarg } => self.store(StoreKind::I16, memarg.offset, offset),
            Operator::I64Store8 { memarg } => self.store(StoreKind::I8, memarg.offset, offset),
            Operator::I64Store16 { memarg } => self.store(StoreKind::I16, memarg.offset, offset),
            Operator::I64Store32 { memarg } => self.store(StoreKind::I32, memarg.offset, offset),

            Operator::MemorySize => {
                let inst = self.emit(InstData::MemorySize, &[Type::I32]);
                self.push_results(inst);
            }
            Operator::MemoryGrow => {
                let arg = self.pop();
                let inst = self.emit(InstData::MemoryGrow { arg }, &[Type::I32]);
                self.push_results(inst);
            }

            Operator::I32Const { value } => self.iconst(Type::I32, *value as u32 as u64),
            Operator::I64Const { value } => self.iconst(Type::I64, *value as u64),
            Operator::F32Const { value } => {
                let inst = self.emit(
                    InstData::Fconst { ty: Type::F32, bits: *value as u64 },
                    &[Type::F32],
                );
                self.push_results(inst);
            }
            Operator::F64Const { value } => {
                let inst =
                    self.emit(InstData::Fconst { ty: Type::F64, bits: *value }, &[Type::F64]);
                self.push_results(inst);
            }

            Operator::I32Eqz => self.eqz(Type::I32),
            Operator::I64Eqz => self.eqz(Type::I64),
            Operator::I32Eq => self.icmp(IntCC::Eq, Type::I32),
            Operator::I32Ne => self.icmp(IntCC::Ne, Type::I32),
            Operator::I32LtS => self.icmp(IntCC::LtS, Type::I32),
            Operator::I32LtU => self.icmp(IntCC::LtU, Type::I32),
            Operator::I32GtS => self.icmp(IntCC::GtS, Type::I32),
            Operator::I32GtU => self.icmp(IntCC::GtU, Type::I32),
            Operator::I32LeS => self.icmp(IntCC::LeS, Type::I32),
            Operator::I32LeU => self.icmp(IntCC::LeU, Type::I32),
            Operator::I32GeS => self.icmp(IntCC::GeS, Type::I32),
            Operator::I32GeU => self.icmp(IntCC::GeU, Type::I32),
            Operator::I64Eq => self.icmp(IntCC::Eq, Type::I64),
            Operator::I64Ne => self.icmp(IntCC::Ne, Type::I64),
            Operator::I64LtS => self.icmp(IntCC::LtS, Type::I64),
            Operator::I64LtU => self.icmp(IntCC::LtU, Type::I64),
            Operator::I64GtS => self.icmp(IntCC::GtS, Type::I64),
            Operator::I64GtU => self.icmp(IntCC::GtU, Type::I64),
            Operator::I64LeS => self.icmp(IntCC::LeS, Type::I64),
            Operator::I64LeU => self.icmp(IntCC::LeU, Type::I64),
            Operator::I64GeS => self.icmp(IntCC::GeS, Type::I64),
            Operator::I64GeU => self.icmp(IntCC::GeU, Type::I64),

            Operator::F32Eq => self.fcmp(FloatCC::Eq, Type::F32),
            Operator::F32Ne => self.fcmp(FloatCC::Ne, Type::F32),
            Operator::F32Lt => self.fcmp(FloatCC::Lt, Type::F32),
            Operator::F32Gt => self.fcmp(FloatCC::Gt, Type::F32),
            Operator::F32Le => self.fcmp(FloatCC::Le, Type::F32),
            Operator::F32Ge => self.fcmp(FloatCC::Ge, Type::F32),
            Operator::F64Eq => self.fcmp(FloatCC::Eq, Type::F64),
            Operator::F64Ne => self.fcmp(FloatCC::Ne, Type::F64),
            Operator::F64Lt => self.fcmp(FloatCC::Lt, Type::F64),
            Operator::F64Gt => self.fcmp(FloatCC::Gt, Type::F64),
            Operator::F64Le => self.fcmp(FloatCC::Le, Type::F64),
            Operator::F64Ge => self.fcmp(FloatCC::Ge, Type::F64),

            Operator::I32Clz => self.int_unary(IntUnaryOp::Clz, Type::I32),
            Operator::I32Ctz => self.int_unary(IntUnaryOp::Ctz, Type::I32),
            Operator::I32Popcnt => self.int_unary(IntUnaryOp::Popcnt, Type::I32),
            Operator::I32Add => self.binary(BinaryOp::Add, Type::I32),
            Operator::I32Sub => self.binary(BinaryOp::Sub, Type::I32),
            Operator::I32Mul => self.binary(BinaryOp::Mul, Type::I32),
            Operator::I32DivS => self.div(DivOp::DivS, Type::I32, offset),
            Operator::I32DivU => self.div(DivOp::DivU, Type::I32, offset),
            Operator::I32RemS => self.div(DivOp::RemS, Type::I32, offset),
            Operator::I32RemU => self.div(DivOp::RemU, Type::I32, offset),
            Operator::I32And => self.binary(BinaryOp::And, Type::I32),
            Operator::I32Or => self.binary(BinaryOp::Or, Type::I32),
            Operator::I32Xor => self.binary(BinaryOp::Xor, Type::I32),
            Operator::I32Shl => self.binary(BinaryOp::Shl, Type::I32),
            Operator::I32ShrS => self.binary(BinaryOp::ShrS, Type::I32),
            Operator::I32ShrU => self.binary(BinaryOp::ShrU, Type::I32),
            Operator::I32Rotl => self.binary(BinaryOp::Rotl, Type::I32),
            Operator::I32Rotr => self.binary(BinaryOp::Rotr, Type::I32),

            Operator::I64Clz => self.int_unary(IntUnaryOp::Clz, Type::I64),
            Operator::I64Ctz => self.int_unary(IntUnaryOp::Ctz, Type::I64),
            Operator::I64Popcnt => self.int_unary(IntUnaryOp::Popcnt, Type::I64),
            Operator::I64Add => self.binary(BinaryOp::Add, Type::I64),
            Operator::I64Sub => self.binary(BinaryOp::Sub, Type::I64),
            Operator::I64Mul => self.binary(BinaryOp::Mul, Type::I64),
            Operator::I64DivS => self.div(DivOp::DivS, Type::I64, offset),
            Operator::I64DivU => self.div(DivOp::DivU, Type::I64, offset),
            Operator::I64RemS => self.div(DivOp::RemS, Type::I64, offset),
            Operator::I64RemU => self.div(DivOp::RemU, Type::I64, offset),
            Operator::I64And => self.binary(BinaryOp::And, Type::I64),
            Operator::I64Or => self.binary(BinaryOp::Or, Type::I64),
            Operator::I64Xor => self.binary(BinaryOp::Xor, Type::I64),
            Operator::I64Shl => self.binary(BinaryOp::Shl, Type::I64),
            Operator::I64ShrS => self.binary(BinaryOp::ShrS, Type::I64),
            Operator::I64ShrU => self.binary(BinaryOp::ShrU, Type::I64),
            Operator::I64Rotl => self.binary(BinaryOp::Rotl, Type::I64),
            Operator::I64Rotr => self.binary(BinaryOp::Rotr, Type::I64),

            Operator::F32Abs => self.float_unary(FloatUnaryOp::Abs, Type::F32),
            Operator::F32Neg => self.float_unary(FloatUnaryOp::Neg, Type::F32),
            Operator::F32Ceil => self.float_unary(FloatUnaryOp::Ceil, Type::F32),
            Operator::F32Floor => self.float_unary(FloatUnaryOp::Floor, Type::F32),
            Operator::F32Trunc => self.float_unary(FloatUnaryOp::Trunc, Type::F32),
            Operator::F32Nearest => self.float_unary(FloatUnaryOp::Nearest, Type::F32),
            Operator::F32Sqrt => self.float_unary(FloatUnaryOp::Sqrt, Type::F32),
            Operator::F32Add => self.float_binary(FloatBinaryOp::Add, Type::F32),
            Operator::F32Sub => self.float_binary(FloatBinaryOp::Sub, Type::F32),
            Operator::F32Mul => self.float_binary(FloatBinaryOp::Mul, Type::F32),
            Operator::F32Div => self.float_binary(FloatBinaryOp::Div, Type::F32),
            Operator::F32Min => self.float_binary(FloatBinaryOp::Min, Type::F32),
            Operator::F32Max => self.float_binary(FloatBinaryOp::Max, Type::F32),
            Operator::F32Copysign => self.float_binary(FloatBinaryOp::Copysign, Type::F32),

            Operator::F64Abs => self.float_unary(FloatUnaryOp::Abs, Type::F64),
            Operator::F64Neg => self.float_unary(FloatUnaryOp::Neg, Type::F64),
            Operator::F64Ceil => self.float_unary(FloatUnaryOp::Ceil, Type::F64),
            Operator::F64Floor => self.float_unary(FloatUnaryOp::Floor, Type::F64),
            Operator::F64Trunc => self.float_unary(FloatUnaryOp::Trunc, Type::F64),
            Operator::F64Nearest => self.float_unary(FloatUnaryOp::Nearest, Type::F64),
            Operator::F64Sqrt => self.float_unary(FloatUnaryOp::Sqrt, Type::F64),
            Operator::F64Add => self.float_binary(FloatBinaryOp::Add, Type::F64),
            Operator::F64Sub => self.float_binary(FloatBinaryOp::Sub, Type::F64),
            Operator::F64Mul => self.float_binary(FloatBinaryOp::Mul, Type::F64),
            Operator::F64Div => self.float_binary(FloatBinaryOp::Div, Type::F64),
            Operator::F64Min => self.float_binary(FloatBinaryOp::Min, Type::F64),
            Operator::F64Max => self.float_binary(FloatBinaryOp::Max, Type::F64),
            Operator::F64Copysign => self.float_binary(FloatBinaryOp::Copysign, Type::F64),

            Operator::I32WrapI64 => self.convert(ConvertOp::I32WrapI64),
            Operator::I64ExtendI32S => self.convert(ConvertOp::I64ExtendI32S),
            Operator::I64ExtendI32U => self.convert(ConvertOp::I64ExtendI32U),
            Operator::F32ConvertI32S => self.convert(ConvertOp::F32FromI32S),
            Operator::F32ConvertI32U => self.convert(ConvertOp::F32FromI32U),
            Operator::F32ConvertI64S => self.convert(ConvertOp::F32FromI64S),
            Operator::F32DemoteF64 => self.convert(ConvertOp::F32DemoteF64),
            Operator::F64ConvertI32S => self.convert(ConvertOp::F64FromI32S),
            Operator::F64ConvertI32U => self.convert(ConvertOp::F64FromI32U),
            Operator::F64ConvertI64S => self.convert(ConvertOp::F64FromI64S),
            Operator::F64PromoteF32 => self.convert(ConvertOp::F64PromoteF32),
            Operator::I32ReinterpretF32 => self.convert(ConvertOp::BitcastF32ToI32),
            Operator::I64ReinterpretF64 => self.convert(ConvertOp::BitcastF64ToI64),
            Operator::F32ReinterpretI32 => self.convert(ConvertOp::BitcastI32ToF32),
            Operator::F64ReinterpretI64 => self.convert(ConvertOp::BitcastI64ToF64),

            Operator::I32Extend8S => self.int_unary(IntUnaryOp::Extend8S, Type::I32),
            Operator::I32Extend16S => self.int_unary(IntUnaryOp::Extend16S, Type::I32),
            Operator::I64Extend8S => self.int_unary(IntUnaryOp::Extend8S, Type::I64),
            Operator::I64Extend16S => self.int_unary(IntUnaryOp::Extend16S, Type::I64),
            Operator::I64Extend32S => self.int_unary(IntUnaryOp::Extend32S, Type::I64),

            Operator::I32TruncF32S
            | Operator::I32TruncF32U
            | Operator::I32TruncF64S
            | Operator::I32TruncF64U
            | Operator::I64TruncF32S
            | Operator::I64TruncF32U
            | Operator::I64TruncF64S
            | Operator::I64TruncF64U
            | Operator::I32TruncSatF32S
            | Operator::I32TruncSatF32U
            | Operator::I32TruncSatF64S
            | Operator::I32TruncSatF64U
            | Operator::I64TruncSatF32S
            | Operator::I64TruncSatF32U
            | Operator::I64TruncSatF64S
            | Operator::I64TruncSatF64U => {
                unsupported!("float to integer truncation")
            }
            Operator::F32ConvertI64U | Operator::F64ConvertI64U => {
                unsupported!("unsigned 64-bit integer to float conversion")
            }

            Operator::MemoryInit { .. }
            | Operator::DataDrop { .. }
            | Operator::MemoryCopy
            | Operator::MemoryFill => unsupported!("bulk memory operation"),

            Operator::RefNull { .. } | Operator::RefIsNull | Operator::RefFunc { .. } => {
                unsupported!("reference-typed operation")
            }
            Operator::TableGet { .. }
            | Operator::TableSet { .. }
            | Operator::TableInit { .. }
            | Operator::ElemDrop { .. }
            | Operator::TableCopy { .. }
            | Operator::TableGrow { .. }
            | Operator::TableSize { .. }
            | Operator::TableFill { .. } => unsupported!("table operation"),

            Operator::MemoryAtomicNotify { .. }
            | Operator::MemoryAtomicWait32 { .. }
            | Operator::MemoryAtomicWait64 { .. }
            | Operator::AtomicFence
            | Operator::AtomicLoad { .. }
            | Operator::AtomicStore { .. }
            | Operator::AtomicRmw { .. }
            | Operator::AtomicCmpxchg { .. } => unsupported!("atomic operation"),

            Operator::V128Load { .. }
            | Operator::V128Store { .. }
            | Operator::V128Const { .. }
            | Operator::I8x16Shuffle { .. }
            | Operator::I8x16Swizzle
            | Operator::V128Not
            | Operator::V128And
            | Operator::V128AndNot
            | Operator::V128Or
            | Operator::V128Xor
            | Operator::V128Bitselect
            | Operator::V128AnyTrue
            | Operator::SimdSplat { .. }
            | Operator::SimdExtractLane { .. }
            | Operator::SimdReplaceLane { .. }
            | Operator::SimdBinary { .. }
            | Operator::SimdUnary { .. }
            | Operator::SimdShift { .. } => unsupported!("vector operation"),
        }
        Ok(())
    }

    /// Switches translation to the else arm of the innermost `if`.
    fn begin_else(&mut self) {
        let frame = match self.frames.last_mut() {
            Some(frame) => frame,
            None => return,
        };
        let height = frame.height;
        if let FrameKind::If { else_block, else_locals, else_params, .. } = &mut frame.kind {
            if let Some(block) = else_block.take() {
                self.locals = std::mem::take(else_locals);
                let params = std::mem::take(else_params);
                self.stack.truncate(height);
                self.stack.extend(params);
                self.block = block;
                self.reachable = true;
            }
        }
    }

    /// Closes the innermost control frame at an `End`.
    fn end_frame(&mut self) -> CodegenResult<()> {
        let frame = self.frames.pop().ok_or_else(malformed)?;
        let results = frame.results.len();
        match frame.kind {
            FrameKind::Func => {
                if self.reachable {
                    let args = SmallVec::from_slice(&self.stack[self.stack.len() - results..]);
                    self.emit(InstData::Return { args }, &[]);
                }
                self.reachable = false;
            }
            FrameKind::Loop { .. } => {
                // The fallthrough edge is the only way to reach the code
                // after the loop; no merging is necessary.
                if !self.reachable {
                    self.seal_dead_block();
                }
            }
            FrameKind::Block { merge } => {
                self.close_merge(results, frame.height, merge, frame.branched);
            }
            FrameKind::If { merge, else_block, else_locals, else_params, .. } => {
                let mut branched = frame.branched;
                if self.reachable {
                    let args = self.branch_args(results);
                    self.emit(InstData::Jump { dest: merge, args }, &[]);
                    branched = true;
                    self.reachable = false;
                }
                if let Some(block) = else_block {
                    // No else arm was written; the frame's parameters flow
                    // through unchanged.
                    let mut args: SmallVec<[Value; 4]> = SmallVec::from_slice(&else_locals);
                    args.extend(else_params);
                    self.func.append_inst(block, InstData::Jump { dest: merge, args }, &[]);
                    branched = true;
                }
                self.close_merge(results, frame.height, merge, branched);
            }
        }
        Ok(())
    }

    fn close_merge(&mut self, num_results: usize, height: usize, merge: Block, branched: bool) {
        if self.reachable {
            let args = self.branch_args(num_results);
            self.emit(InstData::Jump { dest: merge, args }, &[]);
        } else if !branched {
            // Nothing reaches the merge point; give the block a
            // terminator so the layout stays well formed and carry on
            // unreachable.
            self.switch_to(merge, height);
            self.seal_dead_block();
            self.reachable = false;
            return;
        }
        self.switch_to(merge, height);
        self.reachable = true;
    }

    /// Makes `block` the current block and rebuilds locals and the
    /// operand stack from its parameters.
    fn switch_to(&mut self, block: Block, height: usize) {
        let params: Vec<Value> = self.func.blocks[block].params.to_vec();
        let num_locals = self.locals.len();
        self.locals.clear();
        self.locals.extend(&params[..num_locals]);
        self.stack.truncate(height);
        self.stack.extend(&params[num_locals..]);
        self.block = block;
    }

    /// Terminates the current block with a trap that can never execute.
    fn seal_dead_block(&mut self) {
        if self.func.terminator(self.block).is_none() {
            self.func.append_inst(
                self.block,
                InstData::Trap { code: Trap::UnreachableCodeReached, wasm_offset: 0 },
                &[],
            );
        }
    }

    /// Creates a block whose parameters are the locals followed by
    /// `extra`.
    fn merge_block(&mut self, extra: &[Type]) -> Block {
        let block = self.func.create_block();
        for i in 0..self.local_types.len() {
            let ty = self.local_types[i];
            self.func.append_block_param(block, ty);
        }
        for &ty in extra {
            self.func.append_block_param(block, ty);
        }
        block
    }

    /// The jump arguments for an edge carrying the locals and the top
    /// `extra` stack values. Does not pop.
    fn branch_args(&self, extra: usize) -> SmallVec<[Value; 4]> {
        let mut args: SmallVec<[Value; 4]> = SmallVec::from_slice(&self.locals);
        args.extend_from_slice(&self.stack[self.stack.len() - extra..]);
        args
    }

    /// Emits the branch for `br`-style transfers into `block`, which is
    /// either the current block or a fresh trampoline.
    fn branch_to(&mut self, depth: u32, block: Block) {
        let frame = &self.frames[self.frames.len() - 1 - depth as usize];
        let data = match &frame.kind {
            FrameKind::Func => {
                let count = frame.results.len();
                let args = SmallVec::from_slice(&self.stack[self.stack.len() - count..]);
                InstData::Return { args }
            }
            FrameKind::Loop { header } => {
                InstData::Jump { dest: *header, args: self.branch_args(frame.params.len()) }
            }
            FrameKind::Block { merge } | FrameKind::If { merge, .. } => {
                let merge = *merge;
                let args = self.branch_args(frame.results.len());
                let index = self.frames.len() - 1 - depth as usize;
                self.frames[index].branched = true;
                InstData::Jump { dest: merge, args }
            }
        };
        self.func.append_inst(block, data, &[]);
    }

    fn blocktype(&self, ty: BlockType) -> CodegenResult<(Vec<Type>, Vec<Type>)> {
        match ty {
            BlockType::Empty => Ok((Vec::new(), Vec::new())),
            BlockType::Value(ty) => match Type::from_wasm(ty) {
                Some(ty) => Ok((Vec::new(), vec![ty])),
                None => Err(CodegenError::Unsupported(format!(
                    "block result of type {:?}",
                    ty
                ))),
            },
            BlockType::Func(index) => {
                let ty = &self.module.types[index];
                Ok((convert_types(ty.params())?, convert_types(ty.results())?))
            }
        }
    }

    fn emit(&mut self, data: InstData, result_types: &[Type]) -> crate::ir::Inst {
        self.func.append_inst(self.block, data, result_types)
    }

    fn push_results(&mut self, inst: crate::ir::Inst) {
        let results = self.func.dfg.inst_results(inst).to_vec();
        self.stack.extend(results);
    }

    fn pop(&mut self) -> Value {
        // Validation already proved the stack deep enough.
        self.stack.pop().unwrap_or_else(|| panic!("operand stack underflow"))
    }

    fn pop_many(&mut self, count: usize) -> SmallVec<[Value; 4]> {
        let at = self.stack.len() - count;
        let args = SmallVec::from_slice(&self.stack[at..]);
        self.stack.truncate(at);
        args
    }

    fn iconst(&mut self, ty: Type, bits: u64) {
        let inst = self.emit(InstData::Iconst { ty, bits }, &[ty]);
        self.push_results(inst);
    }

    fn select(&mut self) -> CodegenResult<()> {
        let cond = self.pop();
        let if_false = self.pop();
        let if_true = self.pop();
        let ty = self.func.dfg.value_type(if_true);
        let inst = self.emit(InstData::Select { ty, args: [cond, if_true, if_false] }, &[ty]);
        self.push_results(inst);
        Ok(())
    }

    fn eqz(&mut self, ty: Type) {
        let arg = self.pop();
        let zero = self.emit(InstData::Iconst { ty, bits: 0 }, &[ty]);
        let zero = self.func.dfg.first_result(zero);
        let inst = self.emit(
            InstData::Icmp { cond: IntCC::Eq, ty, args: [arg, zero] },
            &[Type::I32],
        );
        self.push_results(inst);
    }

    fn icmp(&mut self, cond: IntCC, ty: Type) {
        let rhs = self.pop();
        let lhs = self.pop();
        let inst = self.emit(InstData::Icmp { cond, ty, args: [lhs, rhs] }, &[Type::I32]);
        self.push_results(inst);
    }

    fn fcmp(&mut self, cond: FloatCC, ty: Type) {
        let rhs = self.pop();
        let lhs = self.pop();
        let inst = self.emit(InstData::Fcmp { cond, ty, args: [lhs, rhs] }, &[Type::I32]);
        self.push_results(inst);
    }

    fn binary(&mut self, op: BinaryOp, ty: Type) {
        let rhs = self.pop();
        let lhs = self.pop();
        let inst = self.emit(InstData::Binary { op, ty, args: [lhs, rhs] }, &[ty]);
        self.push_results(inst);
    }

    fn div(&mut self, op: DivOp, ty: Type, wasm_offset: u32) {
        let rhs = self.pop();
        let lhs = self.pop();
        let inst = self.emit(InstData::Div { op, ty, args: [lhs, rhs], wasm_offset }, &[ty]);
        self.push_results(inst);
    }

    fn int_unary(&mut self, op: IntUnaryOp, ty: Type) {
        let arg = self.pop();
        let inst = self.emit(InstData::IntUnary { op, ty, arg }, &[ty]);
        self.push_results(inst);
    }

    fn float_unary(&mut self, op: FloatUnaryOp, ty: Type) {
        let arg = self.pop();
        let inst = self.emit(InstData::FloatUnary { op, ty, arg }, &[ty]);
        self.push_results(inst);
    }

    fn float_binary(&mut self, op: FloatBinaryOp, ty: Type) {
        let rhs = self.pop();
        let lhs = self.pop();
        let inst = self.emit(InstData::FloatBinary { op, ty, args: [lhs, rhs] }, &[ty]);
        self.push_results(inst);
    }

    fn convert(&mut self, op: ConvertOp) {
        let arg = self.pop();
        let ty = op.result_type();
        let inst = self.emit(InstData::Convert { op, arg }, &[ty]);
        self.push_results(inst);
    }

    fn load(&mut self, kind: LoadKind, offset: u32, wasm_offset: u32) {
        let index = self.pop();
        let ty = kind.result_type();
        let inst = self.emit(InstData::Load { kind, index, offset, wasm_offset }, &[ty]);
        self.push_results(inst);
    }

    fn store(&mut self, kind: StoreKind, offset: u32, wasm_offset: u32) {
        let value = self.pop();
        let index = self.pop();
        self.emit(InstData::Store { kind, index, value, offset, wasm_offset }, &[]);
    }
}

/// Only reachable on operator sequences the validator would have
/// rejected; translation runs strictly after validation.
fn malformed() -> CodegenError {
    CodegenError::ImplLimit("malformed operator sequence reached the translator".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use riptide_environ::{decode_module, validate_module, WasmFeatures};

    fn translate(wat: &str) -> CodegenResult<Function> {
        let bytes = wat::parse_str(wat).unwrap();
        let module = decode_module(&bytes, &WasmFeatures::default()).unwrap();
        validate_module(&module).unwrap();
        translate_function(&module, riptide_environ::DefinedFuncIndex::from_u32(0))
    }

    #[test]
    fn straight_line_body() {
        let func = translate(
            r#"(module (func (param i32 i32) (result i32)
                local.get 0
                local.get 1
                i32.add))"#,
        )
        .unwrap();
        assert_eq!(func.params, vec![Type::I32, Type::I32]);
        assert_eq!(func.results, vec![Type::I32]);
        // One block: entry with the add and a return.
        assert_eq!(func.layout.len(), 1);
        let terminator = func.terminator(func.entry).unwrap();
        assert!(matches!(func.dfg.insts[terminator], InstData::Return { .. }));
    }

    #[test]
    fn if_else_merges_values() {
        let func = translate(
            r#"(module (func (param i32) (result i32)
                local.get 0
                if (result i32)
                    i32.const 1
                else
                    i32.const 2
                end))"#,
        )
        .unwrap();
        // Entry, merge, then, else.
        assert_eq!(func.layout.len(), 4);
        // The merge block carries the local and the result.
        let merge = func.layout[1];
        assert_eq!(func.blocks[merge].params.len(), 2);
    }

    #[test]
    fn loop_branches_to_header() {
        let func = translate(
            r#"(module (func (param i32)
                loop
                    local.get 0
                    br_if 0
                end))"#,
        )
        .unwrap();
        let header = func.layout[1];
        let mut edges = 0;
        for &block in &func.layout {
            for &inst in &func.blocks[block].insts {
                func.dfg.insts[inst].for_each_target(|target| {
                    if target == header {
                        edges += 1;
                    }
                });
            }
        }
        // The entry jump plus the back edge.
        assert_eq!(edges, 2);
    }

    #[test]
    fn local_updates_flow_through_merges() {
        let func = translate(
            r#"(module (func (param i32) (result i32)
                local.get 0
                if
                    i32.const 7
                    local.set 0
                end
                local.get 0))"#,
        )
        .unwrap();
        // The value returned must be a merge-block parameter, not the
        // original function parameter.
        let ret = func
            .layout
            .iter()
            .find_map(|&block| {
                let terminator = func.terminator(block)?;
                match &func.dfg.insts[terminator] {
                    InstData::Return { args } if !args.is_empty() => Some(args[0]),
                    _ => None,
                }
            })
            .unwrap();
        assert!(matches!(
            func.dfg.values[ret].def,
            crate::ir::ValueDef::Param(block, _) if block != func.entry
        ));
    }

    #[test]
    fn unreachable_code_is_skipped() {
        let func = translate(
            r#"(module (func (result i32)
                i32.const 1
                return
                i32.const 2
                i32.const 3
                i32.add))"#,
        )
        .unwrap();
        let terminator = func.terminator(func.entry).unwrap();
        assert!(matches!(func.dfg.insts[terminator], InstData::Return { .. }));
    }

    #[test]
    fn vector_code_is_refused() {
        let err = translate(
            r#"(module (func (result i32)
                v128.const i64x2 0 0
                v128.any_true))"#,
        )
        .unwrap_err();
        assert!(matches!(err, CodegenError::Unsupported(_)));
    }

    #[test]
    fn truncation_is_refused() {
        let err = translate(
            r#"(module (func (param f32) (result i32)
                local.get 0
                i32.trunc_f32_s))"#,
        )
        .unwrap_err();
        assert!(matches!(err, CodegenError::Unsupported(_)));
    }
}
