//! Pre-lowering of function bodies for the interpreter.
//!
//! Structured control flow is resolved once per function: every `br`,
//! `br_if`, `br_table`, `if` and `else` gets an entry in a side-table
//! giving the operator index to continue at and how to rewrite the value
//! stack. The executor then never searches for labels, and code made
//! dead by an unconditional transfer is simply never reached.

use riptide_environ::{BlockType, FuncType, FunctionBody, Module, Operator, TypeIndex, ValType};
use std::collections::HashMap;

/// A function body ready for interpretation.
pub(crate) struct FuncCode {
    /// Declared local types, params excluded.
    pub locals: Vec<ValType>,
    pub params: usize,
    pub results: usize,
    /// Resolved edges for `br`, `br_if`, the false edge of `if`, and the
    /// skip-over-the-false-arm edge of `else`, keyed by operator index.
    pub branches: HashMap<u32, Branch>,
    /// Resolved `br_table` edges, in target order with the default last.
    pub tables: HashMap<u32, Box<[Branch]>>,
}

/// One resolved control edge.
///
/// Taking the edge moves the top `keep` operands aside, truncates the
/// value stack to `height`, pushes the operands back, and continues at
/// `target`.
#[derive(Copy, Clone, Debug)]
pub(crate) struct Branch {
    pub target: u32,
    pub height: u32,
    pub keep: u32,
}

enum Kind {
    Block,
    Loop { head: u32 },
    /// `else_site` is the `if` operator awaiting its false edge; cleared
    /// once an `else` is seen.
    If { else_site: Option<u32> },
}

/// Sites whose `target` is patched once the frame's `end` is reached.
enum Exit {
    Branch(u32),
    Table(u32, u32),
}

struct Frame {
    kind: Kind,
    /// Value stack height below the frame's parameters.
    height: u32,
    params: u32,
    results: u32,
    exits: Vec<Exit>,
    /// In dead code behind an unconditional transfer.
    unreachable: bool,
    /// The frame itself was entered in dead code.
    dead: bool,
}

fn block_arity(module: &Module, ty: BlockType) -> (u32, u32) {
    match ty {
        BlockType::Empty => (0, 0),
        BlockType::Value(_) => (0, 1),
        BlockType::Func(index) => {
            let sig = &module.types[index];
            (sig.params().len() as u32, sig.results().len() as u32)
        }
    }
}

pub(crate) fn lower(module: &Module, ty: &FuncType, body: &FunctionBody) -> FuncCode {
    let mut code = FuncCode {
        locals: body.locals.clone(),
        params: ty.params().len(),
        results: ty.results().len(),
        branches: HashMap::new(),
        tables: HashMap::new(),
    };
    let end_of_function = body.code.len() as u32;
    let mut frames = vec![Frame {
        kind: Kind::Block,
        height: 0,
        params: 0,
        results: ty.results().len() as u32,
        exits: Vec::new(),
        unreachable: false,
        dead: false,
    }];
    let mut height: u32 = 0;

    for (pc, op) in body.code.iter().enumerate() {
        let pc = pc as u32;
        let dead = frames.last().map_or(true, |f| f.unreachable);
        match op {
            Operator::Block { ty } | Operator::Loop { ty } | Operator::If { ty } => {
                let (params, results) = block_arity(module, *ty);
                if !dead && matches!(op, Operator::If { .. }) {
                    height -= 1;
                }
                let kind = match op {
                    Operator::Block { .. } => Kind::Block,
                    Operator::Loop { .. } => Kind::Loop { head: pc + 1 },
                    _ => Kind::If { else_site: Some(pc) },
                };
                frames.push(Frame {
                    kind,
                    height: if dead { 0 } else { height - params },
                    params,
                    results,
                    exits: Vec::new(),
                    unreachable: dead,
                    dead,
                });
            }
            Operator::Else => {
                let frame = frames.last_mut().unwrap_or_else(|| unreachable!());
                if !frame.dead {
                    if !frame.unreachable {
                        // The true arm falls into the else: skip past end.
                        code.branches.insert(
                            pc,
                            Branch { target: 0, height: frame.height, keep: frame.results },
                        );
                        frame.exits.push(Exit::Branch(pc));
                    }
                    if let Kind::If { else_site } = &mut frame.kind {
                        if let Some(site) = else_site.take() {
                            code.branches.insert(
                                site,
                                Branch {
                                    target: pc + 1,
                                    height: frame.height,
                                    keep: frame.params,
                                },
                            );
                        }
                    }
                    frame.unreachable = false;
                    height = frame.height + frame.params;
                }
            }
            Operator::End => {
                let frame = match frames.pop() {
                    Some(frame) => frame,
                    None => unreachable!("unbalanced control in validated code"),
                };
                let mut live_after = !frame.unreachable || !frame.exits.is_empty();
                if !frame.dead {
                    // An if with no else reaches past the end on false.
                    if let Kind::If { else_site: Some(site) } = frame.kind {
                        code.branches.insert(
                            site,
                            Branch { target: pc + 1, height: frame.height, keep: frame.params },
                        );
                        live_after = true;
                    }
                    for exit in &frame.exits {
                        match exit {
                            Exit::Branch(site) => {
                                if let Some(entry) = code.branches.get_mut(site) {
                                    entry.target = pc + 1;
                                }
                            }
                            Exit::Table(site, slot) => {
                                if let Some(entries) = code.tables.get_mut(site) {
                                    entries[*slot as usize].target = pc + 1;
                                }
                            }
                        }
                    }
                }
                if frames.is_empty() {
                    break;
                }
                if frame.dead {
                    live_after = false;
                } else {
                    height = frame.height + frame.results;
                }
                frames.last_mut().unwrap_or_else(|| unreachable!()).unreachable = !live_after;
            }
            Operator::Br { relative_depth } if !dead => {
                let entry = branch_to(&frames, *relative_depth, end_of_function);
                code.branches.insert(pc, entry.0);
                if let Some(depth) = entry.1 {
                    let index = frames.len() - 1 - depth;
                    frames[index].exits.push(Exit::Branch(pc));
                }
                frames.last_mut().unwrap_or_else(|| unreachable!()).unreachable = true;
            }
            Operator::BrIf { relative_depth } if !dead => {
                height -= 1;
                let entry = branch_to(&frames, *relative_depth, end_of_function);
                code.branches.insert(pc, entry.0);
                if let Some(depth) = entry.1 {
                    let index = frames.len() - 1 - depth;
                    frames[index].exits.push(Exit::Branch(pc));
                }
            }
            Operator::BrTable { targets, default } if !dead => {
                height -= 1;
                let mut entries = Vec::with_capacity(targets.len() + 1);
                let mut fixups = Vec::new();
                for (slot, depth) in targets.iter().chain(Some(default)).enumerate() {
                    let entry = branch_to(&frames, *depth, end_of_function);
                    entries.push(entry.0);
                    if let Some(depth) = entry.1 {
                        fixups.push((frames.len() - 1 - depth, slot as u32));
                    }
                }
                code.tables.insert(pc, entries.into_boxed_slice());
                for (index, slot) in fixups {
                    frames[index].exits.push(Exit::Table(pc, slot));
                }
                frames.last_mut().unwrap_or_else(|| unreachable!()).unreachable = true;
            }
            Operator::Return if !dead => {
                code.branches.insert(
                    pc,
                    Branch {
                        target: end_of_function,
                        height: 0,
                        keep: ty.results().len() as u32,
                    },
                );
                frames.last_mut().unwrap_or_else(|| unreachable!()).unreachable = true;
            }
            Operator::Unreachable if !dead => {
                frames.last_mut().unwrap_or_else(|| unreachable!()).unreachable = true;
            }
            _ if dead => {}
            _ => {
                let (pops, pushes) = stack_effect(module, op);
                height = height - pops + pushes;
            }
        }
    }
    code
}

/// Resolves a branch depth against the frame stack. Loop edges are
/// complete immediately; other edges need their target patched at the
/// frame's `end`, signalled by returning the depth.
fn branch_to(frames: &[Frame], depth: u32, end_of_function: u32) -> (Branch, Option<usize>) {
    let depth = depth as usize;
    let frame = &frames[frames.len() - 1 - depth];
    match frame.kind {
        Kind::Loop { head } => {
            (Branch { target: head, height: frame.height, keep: frame.params }, None)
        }
        _ if frames.len() - 1 - depth == 0 => (
            Branch { target: end_of_function, height: 0, keep: frame.results },
            None,
        ),
        _ => (
            Branch { target: 0, height: frame.height, keep: frame.results },
            Some(depth),
        ),
    }
}

/// Operand stack effect of a non-control operator.
fn stack_effect(module: &Module, op: &Operator) -> (u32, u32) {
    use Operator::*;
    match op {
        Call { function_index } => {
            let sig = module.func_type(riptide_environ::FuncIndex::from_u32(*function_index));
            (sig.params().len() as u32, sig.results().len() as u32)
        }
        CallIndirect { type_index, .. } => {
            let sig = &module.types[TypeIndex::from_u32(*type_index)];
            (sig.params().len() as u32 + 1, sig.results().len() as u32)
        }

        Drop | LocalSet { .. } | GlobalSet { .. } => (1, 0),
        Select | TypedSelect { .. } => (3, 1),
        LocalTee { .. } => (1, 1),
        LocalGet { .. } | GlobalGet { .. } => (0, 1),

        TableGet { .. } => (1, 1),
        TableSet { .. } => (2, 0),
        TableInit { .. } | TableCopy { .. } | TableFill { .. } => (3, 0),
        ElemDrop { .. } | DataDrop { .. } | AtomicFence => (0, 0),
        TableGrow { .. } => (2, 1),
        TableSize { .. } | MemorySize => (0, 1),

        I32Load { .. } | I64Load { .. } | F32Load { .. } | F64Load { .. }
        | I32Load8S { .. } | I32Load8U { .. } | I32Load16S { .. } | I32Load16U { .. }
        | I64Load8S { .. } | I64Load8U { .. } | I64Load16S { .. } | I64Load16U { .. }
        | I64Load32S { .. } | I64Load32U { .. } | V128Load { .. } | AtomicLoad { .. } => (1, 1),

        I32Store { .. } | I64Store { .. } | F32Store { .. } | F64Store { .. }
        | I32Store8 { .. } | I32Store16 { .. } | I64Store8 { .. } | I64Store16 { .. }
        | I64Store32 { .. } | V128Store { .. } | AtomicStore { .. } => (2, 0),

        MemoryGrow => (1, 1),
        MemoryInit { .. } | MemoryCopy | MemoryFill => (3, 0),

        I32Const { .. } | I64Const { .. } | F32Const { .. } | F64Const { .. }
        | V128Const { .. } | RefNull { .. } | RefFunc { .. } => (0, 1),

        I32Eqz | I64Eqz | RefIsNull => (1, 1),

        I32Eq | I32Ne | I32LtS | I32LtU | I32GtS | I32GtU | I32LeS | I32LeU | I32GeS
        | I32GeU | I64Eq | I64Ne | I64LtS | I64LtU | I64GtS | I64GtU | I64LeS | I64LeU
        | I64GeS | I64GeU | F32Eq | F32Ne | F32Lt | F32Gt | F32Le | F32Ge | F64Eq | F64Ne
        | F64Lt | F64Gt | F64Le | F64Ge => (2, 1),

        I32Add | I32Sub | I32Mul | I32DivS | I32DivU | I32RemS | I32RemU | I32And | I32Or
        | I32Xor | I32Shl | I32ShrS | I32ShrU | I32Rotl | I32Rotr | I64Add | I64Sub
        | I64Mul | I64DivS | I64DivU | I64RemS | I64RemU | I64And | I64Or | I64Xor
        | I64Shl | I64ShrS | I64ShrU | I64Rotl | I64Rotr | F32Add | F32Sub | F32Mul
        | F32Div | F32Min | F32Max | F32Copysign | F64Add | F64Sub | F64Mul | F64Div
        | F64Min | F64Max | F64Copysign => (2, 1),

        I32Clz | I32Ctz | I32Popcnt | I64Clz | I64Ctz | I64Popcnt | F32Abs | F32Neg
        | F32Ceil | F32Floor | F32Trunc | F32Nearest | F32Sqrt | F64Abs | F64Neg | F64Ceil
        | F64Floor | F64Trunc | F64Nearest | F64Sqrt => (1, 1),

        I32WrapI64 | I32TruncF32S | I32TruncF32U | I32TruncF64S | I32TruncF64U
        | I64ExtendI32S | I64ExtendI32U | I64TruncF32S | I64TruncF32U | I64TruncF64S
        | I64TruncF64U | F32ConvertI32S | F32ConvertI32U | F32ConvertI64S | F32ConvertI64U
        | F32DemoteF64 | F64ConvertI32S | F64ConvertI32U | F64ConvertI64S | F64ConvertI64U
        | F64PromoteF32 | I32ReinterpretF32 | I64ReinterpretF64 | F32ReinterpretI32
        | F64ReinterpretI64 | I32Extend8S | I32Extend16S | I64Extend8S | I64Extend16S
        | I64Extend32S | I32TruncSatF32S | I32TruncSatF32U | I32TruncSatF64S
        | I32TruncSatF64U | I64TruncSatF32S | I64TruncSatF32U | I64TruncSatF64S
        | I64TruncSatF64U => (1, 1),

        MemoryAtomicNotify { .. } | AtomicRmw { .. } => (2, 1),
        MemoryAtomicWait32 { .. } | MemoryAtomicWait64 { .. } | AtomicCmpxchg { .. } => (3, 1),

        I8x16Shuffle { .. } | I8x16Swizzle | V128And | V128AndNot | V128Or | V128Xor
        | SimdReplaceLane { .. } | SimdBinary { .. } | SimdShift { .. } => (2, 1),
        V128Not | V128AnyTrue | SimdSplat { .. } | SimdExtractLane { .. }
        | SimdUnary { .. } => (1, 1),
        V128Bitselect => (3, 1),

        Unreachable | Nop | Block { .. } | Loop { .. } | If { .. } | Else | End | Br { .. }
        | BrIf { .. } | BrTable { .. } | Return => {
            unreachable!("control operators are handled by the lowering loop")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use riptide_environ::{decode_module, DefinedFuncIndex, WasmFeatures};

    fn lower_first(wat: &str) -> (FuncCode, Module) {
        let binary = wat::parse_str(wat).unwrap();
        let module = decode_module(&binary, &WasmFeatures::default()).unwrap();
        let def = DefinedFuncIndex::from_u32(0);
        let ty = module.func_type(module.func_index(def)).clone();
        let code = lower(&module, &ty, &module.code[def]);
        (code, module)
    }

    #[test]
    fn loop_backedge_targets_the_head() {
        // 0: loop  1: br 0  2: end  3: end
        let (code, _) = lower_first(
            r#"(module (func (loop (br 0))))"#,
        );
        let entry = code.branches[&1];
        assert_eq!(entry.target, 1);
        assert_eq!(entry.keep, 0);
    }

    #[test]
    fn block_branch_targets_past_the_end() {
        // 0: block  1: br 0  2: end  3: end
        let (code, _) = lower_first(
            r#"(module (func (block (br 0))))"#,
        );
        assert_eq!(code.branches[&1].target, 3);
    }

    #[test]
    fn if_false_edge_skips_the_true_arm() {
        // 0: i32.const  1: if  2: i32.const 1  3: drop  4: else
        // 5: i32.const 2  6: drop  7: end  8: end
        let (code, _) = lower_first(
            r#"(module (func
                i32.const 0
                (if (then i32.const 1 drop) (else i32.const 2 drop))))"#,
        );
        assert_eq!(code.branches[&1].target, 5);
        // The true arm jumps over the false arm.
        assert_eq!(code.branches[&4].target, 8);
    }

    #[test]
    fn br_table_default_is_last() {
        // 0: block  1: block  2: local.get  3: br_table  4: end  5: end  6: end
        let (code, _) = lower_first(
            r#"(module (func (param i32)
                (block (block (local.get 0) (br_table 0 1)))))"#,
        );
        let entries = &code.tables[&3];
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].target, 5);
        assert_eq!(entries[1].target, 6);
    }

    #[test]
    fn branch_with_an_operand_keeps_it() {
        // 0: block  1: i32.const 7  2: br 0  3: end  4: drop  5: end
        let (code, _) = lower_first(
            r#"(module (func
                (block (result i32) (i32.const 7) (br 0))
                drop))"#,
        );
        let entry = code.branches[&2];
        assert_eq!(entry.target, 4);
        assert_eq!(entry.keep, 1);
        assert_eq!(entry.height, 0);
    }

    #[test]
    fn code_behind_a_branch_is_dead() {
        // 0: block  1: br 0  2: i32.const  3: drop  4: end  5: end
        let (code, _) = lower_first(
            r#"(module (func (block (br 0) (i32.const 1) (drop))))"#,
        );
        assert_eq!(code.branches[&1].target, 5);
        assert_eq!(code.branches.len(), 1);
    }
}
