//! Validation of decoded modules.
//!
//! [`validate_module`] checks every index and every function body up
//! front, so later stages can index into the module without bounds
//! checks. Function bodies are checked with the standard type-stack and
//! control-frame algorithm, including the polymorphic stack that follows
//! `unreachable`, `br` and friends.

use crate::error::{WasmError, WasmResult};
use crate::indices::*;
use crate::module::{ConstExpr, ElemKind, FunctionBody, Module};
use crate::operators::{
    AtomicWidth, BlockType, MemArg, Operator, SimdShape,
};
use crate::types::{EntityIndex, Global, ValType};
use cranelift_entity::EntityRef;
use std::collections::HashSet;

/// Validates an entire decoded module.
///
/// Feature gating happens during decoding, so this takes no feature set;
/// on success every index embedded in `module` is in bounds and every
/// function body is well typed.
pub fn validate_module(module: &Module) -> WasmResult<()> {
    let declared_funcs = collect_declared_funcs(module);

    for (_, &sig) in module.functions.iter() {
        check_type_index(module, sig)?;
    }
    for (global, init) in module.globals.values().skip(module.num_imported_globals).zip(
        module.global_initializers.values(),
    ) {
        check_global_init(module, global, init)?;
    }
    for (name, index) in &module.exports {
        let in_bounds = match index {
            EntityIndex::Function(f) => f.index() < module.functions.len(),
            EntityIndex::Table(t) => t.index() < module.tables.len(),
            EntityIndex::Memory(m) => m.index() < module.memories.len(),
            EntityIndex::Global(g) => g.index() < module.globals.len(),
        };
        if !in_bounds {
            return Err(WasmError::invalid(
                format!("export `{name}` refers to an unknown entity"),
                0,
            ));
        }
    }
    if let Some(start) = module.start_func {
        if start.index() >= module.functions.len() {
            return Err(WasmError::invalid("unknown start function", 0));
        }
        let ty = module.func_type(start);
        if !ty.params().is_empty() || !ty.results().is_empty() {
            return Err(WasmError::invalid(
                "start function must have an empty signature",
                0,
            ));
        }
    }
    for segment in &module.elements {
        let table = match &segment.kind {
            ElemKind::Active { table_index, offset } => {
                if table_index.index() >= module.tables.len() {
                    return Err(WasmError::invalid("unknown table in element segment", 0));
                }
                check_offset_expr(module, offset)?;
                Some(&module.tables[*table_index])
            }
            ElemKind::Passive | ElemKind::Declared => None,
        };
        if let Some(table) = table {
            if table.element != segment.element {
                return Err(WasmError::invalid(
                    "element segment type does not match its table",
                    0,
                ));
            }
        }
        for item in segment.items.iter() {
            let ty = const_expr_type(module, item)?;
            if ty != segment.element {
                return Err(WasmError::invalid(
                    "element segment item has the wrong type",
                    0,
                ));
            }
        }
    }
    for segment in &module.data {
        if let Some((memory, offset)) = &segment.active {
            if memory.index() >= module.memories.len() {
                return Err(WasmError::invalid("unknown memory in data segment", 0));
            }
            check_offset_expr(module, offset)?;
        }
    }

    for (defined, body) in module.code.iter() {
        let func = module.func_index(defined);
        FuncValidator::new(module, &declared_funcs, func, body).run()?;
    }
    Ok(())
}

/// Functions that may be the target of `ref.func`: those mentioned by an
/// export, a global initializer or any element segment.
fn collect_declared_funcs(module: &Module) -> HashSet<FuncIndex> {
    let mut set = HashSet::new();
    for index in module.exports.values() {
        if let EntityIndex::Function(f) = index {
            set.insert(*f);
        }
    }
    for (_, init) in module.global_initializers.iter() {
        if let ConstExpr::RefFunc(f) = init {
            set.insert(*f);
        }
    }
    for segment in &module.elements {
        for item in segment.items.iter() {
            if let ConstExpr::RefFunc(f) = item {
                set.insert(*f);
            }
        }
    }
    set
}

fn check_type_index(module: &Module, index: TypeIndex) -> WasmResult<()> {
    if index.index() >= module.types.len() {
        return Err(WasmError::invalid(
            format!("unknown type index {}", index.as_u32()),
            0,
        ));
    }
    Ok(())
}

/// The type of a constant expression, with its embedded indices checked.
fn const_expr_type(module: &Module, expr: &ConstExpr) -> WasmResult<ValType> {
    Ok(match expr {
        ConstExpr::I32(_) => ValType::I32,
        ConstExpr::I64(_) => ValType::I64,
        ConstExpr::F32(_) => ValType::F32,
        ConstExpr::F64(_) => ValType::F64,
        ConstExpr::V128(_) => ValType::V128,
        ConstExpr::RefNull(ty) => *ty,
        ConstExpr::RefFunc(f) => {
            if f.index() >= module.functions.len() {
                return Err(WasmError::invalid("unknown function in ref.func", 0));
            }
            ValType::FuncRef
        }
        ConstExpr::GlobalGet(g) => {
            if g.index() >= module.num_imported_globals {
                return Err(WasmError::invalid(
                    "constant expressions may only read imported globals",
                    0,
                ));
            }
            let global = &module.globals[*g];
            if global.mutability {
                return Err(WasmError::invalid(
                    "constant expressions may only read immutable globals",
                    0,
                ));
            }
            global.ty
        }
    })
}

fn check_global_init(module: &Module, global: &Global, init: &ConstExpr) -> WasmResult<()> {
    let ty = const_expr_type(module, init)?;
    if ty != global.ty {
        return Err(WasmError::invalid(
            format!("global initializer has type {ty}, expected {}", global.ty),
            0,
        ));
    }
    Ok(())
}

fn check_offset_expr(module: &Module, offset: &ConstExpr) -> WasmResult<()> {
    if const_expr_type(module, offset)? != ValType::I32 {
        return Err(WasmError::invalid("segment offset must have type i32", 0));
    }
    Ok(())
}

/// What kind of instruction opened a control frame, which decides what
/// `else` and branches to the frame mean.
#[derive(Copy, Clone, PartialEq, Debug)]
enum FrameKind {
    Func,
    Block,
    Loop,
    If,
    Else,
}

struct ControlFrame {
    kind: FrameKind,
    params: Vec<ValType>,
    results: Vec<ValType>,
    /// Operand stack height on entry.
    height: usize,
    /// The rest of this frame is dead code; the operand stack below
    /// `height` is polymorphic.
    unreachable: bool,
}

impl ControlFrame {
    /// What a branch to this frame's label must provide: the params for a
    /// loop (branches go back to the top), the results otherwise.
    fn label_types(&self) -> &[ValType] {
        match self.kind {
            FrameKind::Loop => &self.params,
            _ => &self.results,
        }
    }
}

struct FuncValidator<'a> {
    module: &'a Module,
    declared_funcs: &'a HashSet<FuncIndex>,
    body: &'a FunctionBody,
    /// Parameter types followed by declared locals.
    locals: Vec<ValType>,
    /// `None` entries are the unknown values of a polymorphic stack.
    operands: Vec<Option<ValType>>,
    frames: Vec<ControlFrame>,
    /// Offset of the operator currently being checked, for diagnostics.
    offset: usize,
}

impl<'a> FuncValidator<'a> {
    fn new(
        module: &'a Module,
        declared_funcs: &'a HashSet<FuncIndex>,
        func: FuncIndex,
        body: &'a FunctionBody,
    ) -> FuncValidator<'a> {
        let ty = module.func_type(func);
        let mut locals = ty.params().to_vec();
        locals.extend_from_slice(&body.locals);
        let frames = vec![ControlFrame {
            kind: FrameKind::Func,
            params: Vec::new(),
            results: ty.results().to_vec(),
            height: 0,
            unreachable: false,
        }];
        FuncValidator {
            module,
            declared_funcs,
            body,
            locals,
            operands: Vec::new(),
            frames,
            offset: 0,
        }
    }

    fn run(mut self) -> WasmResult<()> {
        for (op, &offset) in self.body.code.iter().zip(self.body.offsets.iter()) {
            self.offset = offset as usize;
            if self.frames.is_empty() {
                return Err(self.err("operators after the end of the function"));
            }
            self.op(op)?;
        }
        if !self.frames.is_empty() {
            return Err(self.err("control frames left open at the end of the function"));
        }
        Ok(())
    }

    fn err(&self, message: impl Into<String>) -> WasmError {
        WasmError::invalid(message, self.offset)
    }

    fn push(&mut self, ty: ValType) {
        self.operands.push(Some(ty));
    }

    fn pop_any(&mut self) -> WasmResult<Option<ValType>> {
        let frame = self.frames.last().ok_or_else(|| self.err("empty control stack"))?;
        if self.operands.len() == frame.height {
            if frame.unreachable {
                return Ok(None);
            }
            return Err(self.err("operand stack underflow"));
        }
        Ok(self.operands.pop().unwrap())
    }

    fn pop(&mut self, expect: ValType) -> WasmResult<()> {
        match self.pop_any()? {
            Some(actual) if actual != expect => Err(self.err(format!(
                "type mismatch: expected {expect}, found {actual}"
            ))),
            _ => Ok(()),
        }
    }

    /// Marks the rest of the current frame as dead code.
    fn mark_unreachable(&mut self) -> WasmResult<()> {
        let frame = self
            .frames
            .last_mut()
            .ok_or_else(|| WasmError::invalid("empty control stack", self.offset))?;
        self.operands.truncate(frame.height);
        frame.unreachable = true;
        Ok(())
    }

    fn push_frame(
        &mut self,
        kind: FrameKind,
        params: Vec<ValType>,
        results: Vec<ValType>,
    ) {
        let height = self.operands.len();
        for &ty in &params {
            self.push(ty);
        }
        self.frames.push(ControlFrame {
            kind,
            params,
            results,
            height,
            unreachable: false,
        });
    }

    fn pop_frame(&mut self) -> WasmResult<ControlFrame> {
        let results = self
            .frames
            .last()
            .ok_or_else(|| self.err("empty control stack"))?
            .results
            .clone();
        for &ty in results.iter().rev() {
            self.pop(ty)?;
        }
        let frame = self.frames.pop().unwrap();
        if self.operands.len() != frame.height {
            return Err(self.err("values left on the stack at the end of a block"));
        }
        Ok(frame)
    }

    fn label(&self, relative_depth: u32) -> WasmResult<Vec<ValType>> {
        let depth = relative_depth as usize;
        if depth >= self.frames.len() {
            return Err(self.err(format!("unknown label {relative_depth}")));
        }
        Ok(self.frames[self.frames.len() - 1 - depth]
            .label_types()
            .to_vec())
    }

    fn block_params(&self, ty: BlockType) -> WasmResult<Vec<ValType>> {
        Ok(match ty {
            BlockType::Empty | BlockType::Value(_) => Vec::new(),
            BlockType::Func(index) => {
                check_type_index(self.module, index)?;
                self.module.types[index].params().to_vec()
            }
        })
    }

    fn block_results(&self, ty: BlockType) -> WasmResult<Vec<ValType>> {
        Ok(match ty {
            BlockType::Empty => Vec::new(),
            BlockType::Value(ty) => vec![ty],
            BlockType::Func(index) => {
                check_type_index(self.module, index)?;
                self.module.types[index].results().to_vec()
            }
        })
    }

    fn local(&self, index: u32) -> WasmResult<ValType> {
        self.locals
            .get(index as usize)
            .copied()
            .ok_or_else(|| self.err(format!("unknown local {index}")))
    }

    fn global(&self, index: u32) -> WasmResult<&Global> {
        self.module
            .globals
            .get(GlobalIndex::from_u32(index))
            .ok_or_else(|| self.err(format!("unknown global {index}")))
    }

    fn table_element(&self, index: u32) -> WasmResult<ValType> {
        self.module
            .tables
            .get(TableIndex::from_u32(index))
            .map(|t| t.element)
            .ok_or_else(|| self.err(format!("unknown table {index}")))
    }

    /// Checks that a memory exists and that the access alignment does not
    /// exceed the access width.
    fn memarg(&self, memarg: MemArg, natural_log2: u32) -> WasmResult<()> {
        if self.module.memories.is_empty() {
            return Err(self.err("memory access without a declared memory"));
        }
        if memarg.align > natural_log2 {
            return Err(self.err("alignment larger than the access width"));
        }
        Ok(())
    }

    /// Atomic accesses must be exactly naturally aligned.
    fn atomic_memarg(&self, memarg: MemArg, width: AtomicWidth) -> WasmResult<()> {
        if self.module.memories.is_empty() {
            return Err(self.err("memory access without a declared memory"));
        }
        if 1u32 << memarg.align != width.bytes() {
            return Err(self.err("atomic accesses must be naturally aligned"));
        }
        Ok(())
    }

    fn load(&mut self, memarg: MemArg, natural_log2: u32, result: ValType) -> WasmResult<()> {
        self.memarg(memarg, natural_log2)?;
        self.pop(ValType::I32)?;
        self.push(result);
        Ok(())
    }

    fn store(&mut self, memarg: MemArg, natural_log2: u32, operand: ValType) -> WasmResult<()> {
        self.memarg(memarg, natural_log2)?;
        self.pop(operand)?;
        self.pop(ValType::I32)?;
        Ok(())
    }

    fn unary(&mut self, ty: ValType) -> WasmResult<()> {
        self.pop(ty)?;
        self.push(ty);
        Ok(())
    }

    fn binary(&mut self, ty: ValType) -> WasmResult<()> {
        self.pop(ty)?;
        self.pop(ty)?;
        self.push(ty);
        Ok(())
    }

    fn compare(&mut self, ty: ValType) -> WasmResult<()> {
        self.pop(ty)?;
        self.pop(ty)?;
        self.push(ValType::I32);
        Ok(())
    }

    fn convert(&mut self, from: ValType, to: ValType) -> WasmResult<()> {
        self.pop(from)?;
        self.push(to);
        Ok(())
    }

    fn op(&mut self, op: &Operator) -> WasmResult<()> {
        use Operator::*;
        use ValType::{F32, F64, I32, I64, V128};
        match op {
            Unreachable => self.mark_unreachable()?,
            Nop => {}

            Block { ty } => {
                let params = self.block_params(*ty)?;
                let results = self.block_results(*ty)?;
                for &ty in params.iter().rev() {
                    self.pop(ty)?;
                }
                self.push_frame(FrameKind::Block, params, results);
            }
            Loop { ty } => {
                let params = self.block_params(*ty)?;
                let results = self.block_results(*ty)?;
                for &ty in params.iter().rev() {
                    self.pop(ty)?;
                }
                self.push_frame(FrameKind::Loop, params, results);
            }
            If { ty } => {
                let params = self.block_params(*ty)?;
                let results = self.block_results(*ty)?;
                self.pop(I32)?;
                for &ty in params.iter().rev() {
                    self.pop(ty)?;
                }
                self.push_frame(FrameKind::If, params, results);
            }
            Else => {
                let frame = self.pop_frame()?;
                if frame.kind != FrameKind::If {
                    return Err(self.err("`else` without a matching `if`"));
                }
                self.push_frame(FrameKind::Else, frame.params, frame.results);
            }
            End => {
                let frame = self.pop_frame()?;
                // An `if` with no `else` implicitly maps its params to its
                // results, which only type-checks when they agree.
                if frame.kind == FrameKind::If && frame.params != frame.results {
                    return Err(self.err("`if` without `else` must leave the stack unchanged"));
                }
                for &ty in &frame.results {
                    self.push(ty);
                }
            }

            Br { relative_depth } => {
                let label = self.label(*relative_depth)?;
                for &ty in label.iter().rev() {
                    self.pop(ty)?;
                }
                self.mark_unreachable()?;
            }
            BrIf { relative_depth } => {
                let label = self.label(*relative_depth)?;
                self.pop(I32)?;
                for &ty in label.iter().rev() {
                    self.pop(ty)?;
                }
                for &ty in &label {
                    self.push(ty);
                }
            }
            BrTable { targets, default } => {
                self.pop(I32)?;
                let default_label = self.label(*default)?;
                for target in targets.iter() {
                    let label = self.label(*target)?;
                    if label.len() != default_label.len() {
                        return Err(self.err("br_table targets have mismatched arity"));
                    }
                    // Each target must accept the values on the stack; pop
                    // and re-push so polymorphic stacks check correctly.
                    for &ty in label.iter().rev() {
                        self.pop(ty)?;
                    }
                    for &ty in &label {
                        self.push(ty);
                    }
                }
                for &ty in default_label.iter().rev() {
                    self.pop(ty)?;
                }
                self.mark_unreachable()?;
            }
            Return => {
                let results = self.frames[0].results.clone();
                for &ty in results.iter().rev() {
                    self.pop(ty)?;
                }
                self.mark_unreachable()?;
            }
            Call { function_index } => {
                let func = FuncIndex::from_u32(*function_index);
                if func.index() >= self.module.functions.len() {
                    return Err(self.err(format!("unknown function {function_index}")));
                }
                let ty = self.module.func_type(func).clone();
                for &p in ty.params().iter().rev() {
                    self.pop(p)?;
                }
                for &r in ty.results() {
                    self.push(r);
                }
            }
            CallIndirect { type_index, table_index } => {
                let element = self.table_element(*table_index)?;
                if element != ValType::FuncRef {
                    return Err(self.err("call_indirect requires a funcref table"));
                }
                let sig = TypeIndex::from_u32(*type_index);
                check_type_index(self.module, sig)
                    .map_err(|_| self.err(format!("unknown type {type_index}")))?;
                let ty = self.module.types[sig].clone();
                self.pop(I32)?;
                for &p in ty.params().iter().rev() {
                    self.pop(p)?;
                }
                for &r in ty.results() {
                    self.push(r);
                }
            }

            Drop => {
                self.pop_any()?;
            }
            Select => {
                self.pop(I32)?;
                let a = self.pop_any()?;
                let b = self.pop_any()?;
                let ty = match (a, b) {
                    (Some(a), Some(b)) if a != b => {
                        return Err(self.err("select operands must have the same type"))
                    }
                    (Some(t), _) | (_, Some(t)) => Some(t),
                    (None, None) => None,
                };
                if let Some(t) = ty {
                    if t.is_ref() {
                        return Err(self.err("untyped select may not be used with references"));
                    }
                    self.push(t);
                } else {
                    self.operands.push(None);
                }
            }
            TypedSelect { ty } => {
                self.pop(I32)?;
                self.pop(*ty)?;
                self.pop(*ty)?;
                self.push(*ty);
            }

            LocalGet { local_index } => {
                let ty = self.local(*local_index)?;
                self.push(ty);
            }
            LocalSet { local_index } => {
                let ty = self.local(*local_index)?;
                self.pop(ty)?;
            }
            LocalTee { local_index } => {
                let ty = self.local(*local_index)?;
                self.pop(ty)?;
                self.push(ty);
            }
            GlobalGet { global_index } => {
                let ty = self.global(*global_index)?.ty;
                self.push(ty);
            }
            GlobalSet { global_index } => {
                let global = self.global(*global_index)?;
                if !global.mutability {
                    return Err(self.err(format!("global {global_index} is immutable")));
                }
                let ty = global.ty;
                self.pop(ty)?;
            }

            TableGet { table } => {
                let element = self.table_element(*table)?;
                self.pop(I32)?;
                self.push(element);
            }
            TableSet { table } => {
                let element = self.table_element(*table)?;
                self.pop(element)?;
                self.pop(I32)?;
            }
            TableInit { elem_index, table } => {
                let element = self.table_element(*table)?;
                let segment = self
                    .module
                    .elements
                    .get(elem_index.index())
                    .ok_or_else(|| self.err("unknown element segment"))?;
                if segment.element != element {
                    return Err(self.err("table.init element type mismatch"));
                }
                self.pop(I32)?;
                self.pop(I32)?;
                self.pop(I32)?;
            }
            ElemDrop { elem_index } => {
                if elem_index.index() >= self.module.elements.len() {
                    return Err(self.err("unknown element segment"));
                }
            }
            TableCopy { dst_table, src_table } => {
                let dst = self.table_element(*dst_table)?;
                let src = self.table_element(*src_table)?;
                if dst != src {
                    return Err(self.err("table.copy element type mismatch"));
                }
                self.pop(I32)?;
                self.pop(I32)?;
                self.pop(I32)?;
            }
            TableGrow { table } => {
                let element = self.table_element(*table)?;
                self.pop(I32)?;
                self.pop(element)?;
                self.push(I32);
            }
            TableSize { table } => {
                self.table_element(*table)?;
                self.push(I32);
            }
            TableFill { table } => {
                let element = self.table_element(*table)?;
                self.pop(I32)?;
                self.pop(element)?;
                self.pop(I32)?;
            }

            I32Load { memarg } => self.load(*memarg, 2, I32)?,
            I64Load { memarg } => self.load(*memarg, 3, I64)?,
            F32Load { memarg } => self.load(*memarg, 2, F32)?,
            F64Load { memarg } => self.load(*memarg, 3, F64)?,
            I32Load8S { memarg } | I32Load8U { memarg } => self.load(*memarg, 0, I32)?,
            I32Load16S { memarg } | I32Load16U { memarg } => self.load(*memarg, 1, I32)?,
            I64Load8S { memarg } | I64Load8U { memarg } => self.load(*memarg, 0, I64)?,
            I64Load16S { memarg } | I64Load16U { memarg } => self.load(*memarg, 1, I64)?,
            I64Load32S { memarg } | I64Load32U { memarg } => self.load(*memarg, 2, I64)?,

            I32Store { memarg } => self.store(*memarg, 2, I32)?,
            I64Store { memarg } => self.store(*memarg, 3, I64)?,
            F32Store { memarg } => self.store(*memarg, 2, F32)?,
            F64Store { memarg } => self.store(*memarg, 3, F64)?,
            I32Store8 { memarg } => self.store(*memarg, 0, I32)?,
            I32Store16 { memarg } => self.store(*memarg, 1, I32)?,
            I64Store8 { memarg } => self.store(*memarg, 0, I64)?,
            I64Store16 { memarg } => self.store(*memarg, 1, I64)?,
            I64Store32 { memarg } => self.store(*memarg, 2, I64)?,

            MemorySize => {
                self.require_memory()?;
                self.push(I32);
            }
            MemoryGrow => {
                self.require_memory()?;
                self.pop(I32)?;
                self.push(I32);
            }
            MemoryInit { data_index } => {
                self.require_memory()?;
                self.check_data_index(*data_index)?;
                self.pop(I32)?;
                self.pop(I32)?;
                self.pop(I32)?;
            }
            DataDrop { data_index } => self.check_data_index(*data_index)?,
            MemoryCopy | MemoryFill => {
                self.require_memory()?;
                self.pop(I32)?;
                self.pop(I32)?;
                self.pop(I32)?;
            }

            I32Const { .. } => self.push(I32),
            I64Const { .. } => self.push(I64),
            F32Const { .. } => self.push(F32),
            F64Const { .. } => self.push(F64),

            I32Eqz => self.convert(I32, I32)?,
            I32Eq | I32Ne | I32LtS | I32LtU | I32GtS | I32GtU | I32LeS | I32LeU | I32GeS
            | I32GeU => self.compare(I32)?,
            I64Eqz => self.convert(I64, I32)?,
            I64Eq | I64Ne | I64LtS | I64LtU | I64GtS | I64GtU | I64LeS | I64LeU | I64GeS
            | I64GeU => self.compare(I64)?,
            F32Eq | F32Ne | F32Lt | F32Gt | F32Le | F32Ge => self.compare(F32)?,
            F64Eq | F64Ne | F64Lt | F64Gt | F64Le | F64Ge => self.compare(F64)?,

            I32Clz | I32Ctz | I32Popcnt => self.unary(I32)?,
            I32Add | I32Sub | I32Mul | I32DivS | I32DivU | I32RemS | I32RemU | I32And
            | I32Or | I32Xor | I32Shl | I32ShrS | I32ShrU | I32Rotl | I32Rotr => {
                self.binary(I32)?
            }
            I64Clz | I64Ctz | I64Popcnt => self.unary(I64)?,
            I64Add | I64Sub | I64Mul | I64DivS | I64DivU | I64RemS | I64RemU | I64And
            | I64Or | I64Xor | I64Shl | I64ShrS | I64ShrU | I64Rotl | I64Rotr => {
                self.binary(I64)?
            }
            F32Abs | F32Neg | F32Ceil | F32Floor | F32Trunc | F32Nearest | F32Sqrt => {
                self.unary(F32)?
            }
            F32Add | F32Sub | F32Mul | F32Div | F32Min | F32Max | F32Copysign => {
                self.binary(F32)?
            }
            F64Abs | F64Neg | F64Ceil | F64Floor | F64Trunc | F64Nearest | F64Sqrt => {
                self.unary(F64)?
            }
            F64Add | F64Sub | F64Mul | F64Div | F64Min | F64Max | F64Copysign => {
                self.binary(F64)?
            }

            I32WrapI64 => self.convert(I64, I32)?,
            I32TruncF32S | I32TruncF32U | I32TruncSatF32S | I32TruncSatF32U => {
                self.convert(F32, I32)?
            }
            I32TruncF64S | I32TruncF64U | I32TruncSatF64S | I32TruncSatF64U => {
                self.convert(F64, I32)?
            }
            I64ExtendI32S | I64ExtendI32U => self.convert(I32, I64)?,
            I64TruncF32S | I64TruncF32U | I64TruncSatF32S | I64TruncSatF32U => {
                self.convert(F32, I64)?
            }
            I64TruncF64S | I64TruncF64U | I64TruncSatF64S | I64TruncSatF64U => {
                self.convert(F64, I64)?
            }
            F32ConvertI32S | F32ConvertI32U => self.convert(I32, F32)?,
            F32ConvertI64S | F32ConvertI64U => self.convert(I64, F32)?,
            F32DemoteF64 => self.convert(F64, F32)?,
            F64ConvertI32S | F64ConvertI32U => self.convert(I32, F64)?,
            F64ConvertI64S | F64ConvertI64U => self.convert(I64, F64)?,
            F64PromoteF32 => self.convert(F32, F64)?,
            I32ReinterpretF32 => self.convert(F32, I32)?,
            I64ReinterpretF64 => self.convert(F64, I64)?,
            F32ReinterpretI32 => self.convert(I32, F32)?,
            F64ReinterpretI64 => self.convert(I64, F64)?,

            I32Extend8S | I32Extend16S => self.unary(I32)?,
            I64Extend8S | I64Extend16S | I64Extend32S => self.unary(I64)?,

            RefNull { ty } => {
                if !ty.is_ref() {
                    return Err(self.err("ref.null requires a reference type"));
                }
                self.push(*ty);
            }
            RefIsNull => {
                match self.pop_any()? {
                    Some(ty) if !ty.is_ref() => {
                        return Err(self.err("ref.is_null requires a reference"))
                    }
                    _ => {}
                }
                self.push(I32);
            }
            RefFunc { function_index } => {
                let func = FuncIndex::from_u32(*function_index);
                if func.index() >= self.module.functions.len() {
                    return Err(self.err(format!("unknown function {function_index}")));
                }
                if !self.declared_funcs.contains(&func) {
                    return Err(self.err(format!(
                        "function {function_index} is not declared for ref.func"
                    )));
                }
                self.push(ValType::FuncRef);
            }

            MemoryAtomicNotify { memarg } => {
                self.atomic_memarg(*memarg, AtomicWidth::W32)?;
                self.pop(I32)?;
                self.pop(I32)?;
                self.push(I32);
            }
            MemoryAtomicWait32 { memarg } => {
                self.atomic_memarg(*memarg, AtomicWidth::W32)?;
                self.pop(I64)?;
                self.pop(I32)?;
                self.pop(I32)?;
                self.push(I32);
            }
            MemoryAtomicWait64 { memarg } => {
                self.atomic_memarg(*memarg, AtomicWidth::W64)?;
                self.pop(I64)?;
                self.pop(I64)?;
                self.pop(I32)?;
                self.push(I32);
            }
            AtomicFence => {}
            AtomicLoad { ty, width, memarg } => {
                self.atomic_memarg(*memarg, *width)?;
                self.pop(I32)?;
                self.push(*ty);
            }
            AtomicStore { ty, width, memarg } => {
                self.atomic_memarg(*memarg, *width)?;
                self.pop(*ty)?;
                self.pop(I32)?;
            }
            AtomicRmw { ty, width, memarg, .. } => {
                self.atomic_memarg(*memarg, *width)?;
                self.pop(*ty)?;
                self.pop(I32)?;
                self.push(*ty);
            }
            AtomicCmpxchg { ty, width, memarg } => {
                self.atomic_memarg(*memarg, *width)?;
                self.pop(*ty)?;
                self.pop(*ty)?;
                self.pop(I32)?;
                self.push(*ty);
            }

            V128Load { memarg } => self.load(*memarg, 4, V128)?,
            V128Store { memarg } => self.store(*memarg, 4, V128)?,
            V128Const { .. } => self.push(V128),
            I8x16Shuffle { lanes } => {
                if lanes.iter().any(|&l| l >= 32) {
                    return Err(self.err("shuffle lane index out of range"));
                }
                self.binary(V128)?;
            }
            I8x16Swizzle => self.binary(V128)?,
            V128Not => self.unary(V128)?,
            V128And | V128AndNot | V128Or | V128Xor => self.binary(V128)?,
            V128Bitselect => {
                self.pop(V128)?;
                self.pop(V128)?;
                self.pop(V128)?;
                self.push(V128);
            }
            V128AnyTrue => self.convert(V128, I32)?,
            SimdSplat { shape } => self.convert(lane_type(*shape), V128)?,
            SimdExtractLane { shape, lane, .. } => {
                self.check_lane(*shape, *lane)?;
                self.convert(V128, lane_type(*shape))?;
            }
            SimdReplaceLane { shape, lane } => {
                self.check_lane(*shape, *lane)?;
                self.pop(lane_type(*shape))?;
                self.pop(V128)?;
                self.push(V128);
            }
            SimdBinary { .. } => self.binary(V128)?,
            SimdUnary { op, .. } => match op {
                crate::operators::SimdUnaryOp::AllTrue => self.convert(V128, I32)?,
                _ => self.unary(V128)?,
            },
            SimdShift { .. } => {
                self.pop(I32)?;
                self.pop(V128)?;
                self.push(V128);
            }
        }
        Ok(())
    }

    fn require_memory(&self) -> WasmResult<()> {
        if self.module.memories.is_empty() {
            return Err(self.err("memory access without a declared memory"));
        }
        Ok(())
    }

    fn check_data_index(&self, index: DataIndex) -> WasmResult<()> {
        if index.index() >= self.module.data.len() {
            return Err(self.err("unknown data segment"));
        }
        Ok(())
    }

    fn check_lane(&self, shape: SimdShape, lane: u8) -> WasmResult<()> {
        if lane >= shape.lanes() {
            return Err(self.err("lane index out of range"));
        }
        Ok(())
    }
}

/// The scalar type of one lane of the given shape.
fn lane_type(shape: SimdShape) -> ValType {
    match shape {
        SimdShape::I8x16 | SimdShape::I16x8 | SimdShape::I32x4 => ValType::I32,
        SimdShape::I64x2 => ValType::I64,
        SimdShape::F32x4 => ValType::F32,
        SimdShape::F64x2 => ValType::F64,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decode_module;

    fn validate(wat: &str) -> WasmResult<()> {
        let bytes = wat::parse_str(wat).unwrap();
        let module = decode_module(&bytes, &crate::WasmFeatures::default())?;
        validate_module(&module)
    }

    #[test]
    fn well_typed_module() {
        validate(
            r#"(module
                (func (param i32 i32) (result i32)
                    local.get 0
                    local.get 1
                    i32.add))"#,
        )
        .unwrap();
    }

    #[test]
    fn type_mismatch() {
        let err = validate(
            r#"(module
                (func (result i32)
                    i64.const 1))"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("type mismatch"), "{err}");
    }

    #[test]
    fn stack_underflow() {
        let err = validate(r#"(module (func i32.add drop))"#).unwrap_err();
        assert!(err.to_string().contains("underflow"), "{err}");
    }

    #[test]
    fn unreachable_is_polymorphic() {
        validate(
            r#"(module
                (func (result i32)
                    unreachable
                    i32.add))"#,
        )
        .unwrap();
    }

    #[test]
    fn br_with_values() {
        validate(
            r#"(module
                (func (result i32)
                    (block (result i32)
                        i32.const 1
                        br 0)))"#,
        )
        .unwrap();
    }

    #[test]
    fn if_without_else_must_be_balanced() {
        let err = validate(
            r#"(module
                (func (param i32) (result i32)
                    local.get 0
                    if (result i32)
                        i32.const 1
                    end))"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("else"), "{err}");
    }

    #[test]
    fn unknown_local() {
        let err = validate(r#"(module (func local.get 3 drop))"#).unwrap_err();
        assert!(err.to_string().contains("unknown local"), "{err}");
    }

    #[test]
    fn immutable_global_set_rejected() {
        let err = validate(
            r#"(module
                (global $g i32 (i32.const 0))
                (func i32.const 1 global.set $g))"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("immutable"), "{err}");
    }

    #[test]
    fn start_function_signature() {
        let err = validate(
            r#"(module
                (func $f (param i32))
                (start $f))"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("start"), "{err}");
    }

    #[test]
    fn call_type_checks() {
        validate(
            r#"(module
                (func $add (param i32 i32) (result i32)
                    local.get 0 local.get 1 i32.add)
                (func (result i32)
                    i32.const 1
                    i32.const 2
                    call $add))"#,
        )
        .unwrap();
    }

    #[test]
    fn misaligned_access_rejected() {
        // align=3 on an i32 load (natural alignment is 2).
        let err = validate(
            r#"(module
                (memory 1)
                (func (result i32)
                    i32.const 0
                    i32.load align=8))"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("alignment"), "{err}");
    }

    #[test]
    fn memory_required_for_loads() {
        let err = validate(
            r#"(module
                (func (result i32) i32.const 0 i32.load))"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("memory"), "{err}");
    }
}
