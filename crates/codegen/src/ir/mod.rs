//! The intermediate representation.
//!
//! Functions are SSA with block parameters instead of phi nodes. Every
//! value is defined once, either as an instruction result or as a block
//! parameter; control flow transfers values by passing jump arguments to
//! the destination's parameters.

pub mod instructions;

pub use instructions::{
    BinaryOp, ConvertOp, DivOp, FloatBinaryOp, FloatCC, FloatUnaryOp, InstData, IntCC,
    IntUnaryOp, LoadKind, StoreKind,
};

use cranelift_entity::{entity_impl, PrimaryMap, SecondaryMap};
use riptide_environ::ValType;
use smallvec::SmallVec;

/// An SSA value.
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Value(u32);
entity_impl!(Value, "v");

/// A basic block.
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Block(u32);
entity_impl!(Block, "block");

/// An instruction.
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Inst(u32);
entity_impl!(Inst, "inst");

/// The value types the native backend works with. Vectors and references
/// never reach the IR; the frontend refuses them first.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub enum Type {
    I32,
    I64,
    F32,
    F64,
}

impl Type {
    /// The size of the type in bytes.
    pub fn bytes(self) -> u32 {
        match self {
            Type::I32 | Type::F32 => 4,
            Type::I64 | Type::F64 => 8,
        }
    }

    /// Whether this is a floating-point type.
    pub fn is_float(self) -> bool {
        matches!(self, Type::F32 | Type::F64)
    }

    /// Converts a wasm value type, or `None` for types the backend does
    /// not handle.
    pub fn from_wasm(ty: ValType) -> Option<Type> {
        match ty {
            ValType::I32 => Some(Type::I32),
            ValType::I64 => Some(Type::I64),
            ValType::F32 => Some(Type::F32),
            ValType::F64 => Some(Type::F64),
            ValType::V128 | ValType::FuncRef | ValType::ExternRef => None,
        }
    }
}

impl std::fmt::Display for Type {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Type::I32 => "i32",
            Type::I64 => "i64",
            Type::F32 => "f32",
            Type::F64 => "f64",
        };
        f.write_str(s)
    }
}

/// Where a value comes from.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum ValueDef {
    /// The `n`th result of an instruction.
    Result(Inst, u16),
    /// The `n`th parameter of a block.
    Param(Block, u16),
}

/// Type and definition of one value.
#[derive(Copy, Clone, Debug)]
pub struct ValueData {
    pub ty: Type,
    pub def: ValueDef,
}

/// Instructions, values and their connections.
pub struct DataFlowGraph {
    pub insts: PrimaryMap<Inst, InstData>,
    pub values: PrimaryMap<Value, ValueData>,
    results: SecondaryMap<Inst, SmallVec<[Value; 2]>>,
}

impl DataFlowGraph {
    fn new() -> DataFlowGraph {
        DataFlowGraph {
            insts: PrimaryMap::new(),
            values: PrimaryMap::new(),
            results: SecondaryMap::new(),
        }
    }

    /// The type of `value`.
    pub fn value_type(&self, value: Value) -> Type {
        self.values[value].ty
    }

    /// The results of `inst`.
    pub fn inst_results(&self, inst: Inst) -> &[Value] {
        &self.results[inst]
    }

    /// The single result of `inst`; panics if it does not have exactly
    /// one.
    pub fn first_result(&self, inst: Inst) -> Value {
        self.results[inst][0]
    }
}

/// One basic block: parameters plus an ordered instruction list ending in
/// a terminator.
#[derive(Default)]
pub struct BlockData {
    pub params: SmallVec<[Value; 4]>,
    pub insts: Vec<Inst>,
}

/// A function under compilation.
pub struct Function {
    /// The wasm function index, carried for trap metadata and logging.
    pub index: u32,
    /// Parameter types.
    pub params: Vec<Type>,
    /// Result types.
    pub results: Vec<Type>,
    pub dfg: DataFlowGraph,
    pub blocks: PrimaryMap<Block, BlockData>,
    /// Block emission order; the entry block is first.
    pub layout: Vec<Block>,
    pub entry: Block,
}

impl Function {
    /// Creates a function with an (empty) entry block.
    pub fn new(index: u32, params: Vec<Type>, results: Vec<Type>) -> Function {
        let mut blocks = PrimaryMap::new();
        let entry = blocks.push(BlockData::default());
        Function {
            index,
            params,
            results,
            dfg: DataFlowGraph::new(),
            blocks,
            layout: vec![entry],
            entry,
        }
    }

    /// Creates a new block and appends it to the layout.
    pub fn create_block(&mut self) -> Block {
        let block = self.blocks.push(BlockData::default());
        self.layout.push(block);
        block
    }

    /// Appends a parameter of type `ty` to `block`.
    pub fn append_block_param(&mut self, block: Block, ty: Type) -> Value {
        let index = self.blocks[block].params.len() as u16;
        let value = self.dfg.values.push(ValueData {
            ty,
            def: ValueDef::Param(block, index),
        });
        self.blocks[block].params.push(value);
        value
    }

    /// Appends `data` to `block`, creating one result per type in
    /// `result_types`. Returns the instruction.
    pub fn append_inst(
        &mut self,
        block: Block,
        data: InstData,
        result_types: &[Type],
    ) -> Inst {
        let inst = self.dfg.insts.push(data);
        let mut results = SmallVec::new();
        for (i, &ty) in result_types.iter().enumerate() {
            results.push(self.dfg.values.push(ValueData {
                ty,
                def: ValueDef::Result(inst, i as u16),
            }));
        }
        self.dfg.results[inst] = results;
        self.blocks[block].insts.push(inst);
        inst
    }

    /// The terminator of `block`, if the block is complete.
    pub fn terminator(&self, block: Block) -> Option<Inst> {
        let inst = *self.blocks[block].insts.last()?;
        self.dfg.insts[inst].is_terminator().then_some(inst)
    }

    /// Number of values created so far, used for complexity limits.
    pub fn num_values(&self) -> usize {
        self.dfg.values.len()
    }

    /// Number of blocks created so far.
    pub fn num_blocks(&self) -> usize {
        self.blocks.len()
    }
}

impl std::fmt::Debug for Function {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "function f{}({:?}) -> {:?}:", self.index, self.params, self.results)?;
        for &block in &self.layout {
            let data = &self.blocks[block];
            write!(f, "{block}(")?;
            for (i, &param) in data.params.iter().enumerate() {
                if i > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{param}: {}", self.dfg.value_type(param))?;
            }
            writeln!(f, "):")?;
            for &inst in &data.insts {
                let results = self.dfg.inst_results(inst);
                write!(f, "    ")?;
                for (i, &result) in results.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{result}")?;
                }
                if !results.is_empty() {
                    write!(f, " = ")?;
                }
                writeln!(f, "{:?}", self.dfg.insts[inst])?;
            }
        }
        Ok(())
    }
}
