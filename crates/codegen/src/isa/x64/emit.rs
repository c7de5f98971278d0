//! Machine-code emission for x86-64.
//!
//! Each virtual instruction expands to a fixed sequence. Values are
//! computed in the scratch registers (`rax`, `rcx`, `rdx`, `r10`, `r11`
//! and `xmm0`/`xmm1`) and moved to their allocated home afterwards;
//! spilled virtual registers are reloaded at each use. The expansions
//! favor being obviously correct over being tight.
//!
//! Frame layout, rbp-relative:
//!
//! ```text
//!   rbp+16  ..                caller frame
//!   rbp+8                     return address
//!   rbp+0                     saved rbp
//!   rbp-8   .. rbp-40         saved rbx, r12, r13, r14, r15
//!   rbp-48                    incoming value-buffer pointer
//!   rbp-56  .. down           spill slots, 8 bytes each
//!   rsp+0   .. rsp+16*n       outgoing call argument buffer
//! ```
//!
//! `rsp` is 16-byte aligned after the prologue so every call site is
//! correctly aligned.

use super::inst::{CallTarget, GlobalAddr, Inst, VCode};
use super::regs::*;
use crate::ir::{
    BinaryOp, ConvertOp, DivOp, FloatBinaryOp, FloatCC, FloatUnaryOp, IntCC, IntUnaryOp,
    LoadKind, StoreKind, Type,
};
use crate::isa::{CompiledFunction, Reloc};
use crate::regalloc::{AllocationResult, Assignment, VReg};
use cranelift_entity::EntityRef;
use riptide_environ::vmoffsets::*;
use riptide_environ::{FuncIndex, Trap};

/// Condition-code nibbles for `setcc` / `jcc`.
mod cc {
    pub const B: u8 = 0x2;
    pub const AE: u8 = 0x3;
    pub const E: u8 = 0x4;
    pub const NE: u8 = 0x5;
    pub const BE: u8 = 0x6;
    pub const A: u8 = 0x7;
    pub const P: u8 = 0xa;
    pub const NP: u8 = 0xb;
    pub const L: u8 = 0xc;
    pub const GE: u8 = 0xd;
    pub const LE: u8 = 0xe;
    pub const G: u8 = 0xf;
}

#[derive(Copy, Clone, PartialEq, Eq)]
pub struct Label(u32);

enum FixupKind {
    /// `rel32` displacement relative to the end of the 4-byte field.
    Rel32,
    /// 32-bit offset of the label relative to another label.
    Entry32 { base: Label },
}

struct Fixup {
    at: u32,
    label: Label,
    kind: FixupKind,
}

/// A byte buffer with label and relocation bookkeeping.
struct Asm {
    bytes: Vec<u8>,
    labels: Vec<Option<u32>>,
    fixups: Vec<Fixup>,
    relocs: Vec<Reloc>,
}

impl Asm {
    fn new() -> Asm {
        Asm { bytes: Vec::new(), labels: Vec::new(), fixups: Vec::new(), relocs: Vec::new() }
    }

    fn pos(&self) -> u32 {
        self.bytes.len() as u32
    }

    fn new_label(&mut self) -> Label {
        self.labels.push(None);
        Label(self.labels.len() as u32 - 1)
    }

    fn bind(&mut self, label: Label) {
        self.labels[label.0 as usize] = Some(self.pos());
    }

    fn put1(&mut self, byte: u8) {
        self.bytes.push(byte);
    }

    fn put4(&mut self, word: u32) {
        self.bytes.extend_from_slice(&word.to_le_bytes());
    }

    fn put8(&mut self, word: u64) {
        self.bytes.extend_from_slice(&word.to_le_bytes());
    }

    fn label_ref(&mut self, label: Label, kind: FixupKind) {
        self.fixups.push(Fixup { at: self.pos(), label, kind });
        self.put4(0);
    }

    fn finalize(mut self) -> (Vec<u8>, Vec<Reloc>) {
        for fixup in &self.fixups {
            let target = self.labels[fixup.label.0 as usize]
                .unwrap_or_else(|| panic!("unbound label in finished function"));
            let value = match fixup.kind {
                FixupKind::Rel32 => target.wrapping_sub(fixup.at + 4),
                FixupKind::Entry32 { base } => {
                    let base = self.labels[base.0 as usize]
                        .unwrap_or_else(|| panic!("unbound label in finished function"));
                    target.wrapping_sub(base)
                }
            };
            self.bytes[fixup.at as usize..fixup.at as usize + 4]
                .copy_from_slice(&value.to_le_bytes());
        }
        (self.bytes, self.relocs)
    }

    // Encoding primitives. Registers are hardware encodings 0..=15; the
    // same numbering covers xmm0..xmm15 for vector forms.

    fn rex(&mut self, w: bool, reg: u8, index: u8, base: u8) {
        let rex = 0x40
            | (w as u8) << 3
            | ((reg >> 3) & 1) << 2
            | ((index >> 3) & 1) << 1
            | ((base >> 3) & 1);
        if rex != 0x40 || w {
            self.put1(rex);
        }
    }

    fn rex_force(&mut self, w: bool, reg: u8, base: u8) {
        let rex =
            0x40 | (w as u8) << 3 | ((reg >> 3) & 1) << 2 | ((base >> 3) & 1);
        self.put1(rex);
    }

    fn modrm(&mut self, mode: u8, reg: u8, rm: u8) {
        self.put1(mode << 6 | (reg & 7) << 3 | (rm & 7));
    }

    /// `reg, r/m=reg` form after any prefixes and opcode bytes.
    fn rr(&mut self, w: bool, opcodes: &[u8], reg: u8, rm: u8) {
        self.rex(w, reg, 0, rm);
        self.bytes.extend_from_slice(opcodes);
        self.modrm(3, reg, rm);
    }

    /// `reg, [base + disp32]` form.
    fn rm(&mut self, w: bool, opcodes: &[u8], reg: u8, base: u8, disp: i32) {
        self.rex(w, reg, 0, base);
        self.bytes.extend_from_slice(opcodes);
        self.modrm(2, reg, base);
        if base & 7 == RSP {
            self.put1(0x24);
        }
        self.put4(disp as u32);
    }

    // Integer moves.

    fn mov_rr64(&mut self, dst: u8, src: u8) {
        self.rr(true, &[0x89], src, dst);
    }

    fn mov_rr32(&mut self, dst: u8, src: u8) {
        self.rr(false, &[0x89], src, dst);
    }

    fn mov_ri(&mut self, dst: u8, bits: u64) {
        if bits <= u32::MAX as u64 {
            self.rex(false, 0, 0, dst);
            self.put1(0xb8 + (dst & 7));
            self.put4(bits as u32);
        } else {
            self.rex(true, 0, 0, dst);
            self.put1(0xb8 + (dst & 7));
            self.put8(bits);
        }
    }

    fn mov_load64(&mut self, dst: u8, base: u8, disp: i32) {
        self.rm(true, &[0x8b], dst, base, disp);
    }

    fn mov_load32(&mut self, dst: u8, base: u8, disp: i32) {
        self.rm(false, &[0x8b], dst, base, disp);
    }

    fn mov_store64(&mut self, base: u8, disp: i32, src: u8) {
        self.rm(true, &[0x89], src, base, disp);
    }

    fn mov_store32(&mut self, base: u8, disp: i32, src: u8) {
        self.rm(false, &[0x89], src, base, disp);
    }

    fn mov_store16(&mut self, base: u8, disp: i32, src: u8) {
        self.put1(0x66);
        self.rm(false, &[0x89], src, base, disp);
    }

    fn mov_store8(&mut self, base: u8, disp: i32, src: u8) {
        // Only ever used with rax/rcx/rdx sources, so no REX is needed
        // for the byte register.
        self.rm(false, &[0x88], src, base, disp);
    }

    // Integer arithmetic, register-register.

    fn alu_rr(&mut self, w: bool, opcode: u8, dst: u8, src: u8) {
        self.rr(w, &[opcode], src, dst);
    }

    fn imul_rr(&mut self, w: bool, dst: u8, src: u8) {
        self.rr(w, &[0x0f, 0xaf], dst, src);
    }

    fn test_rr(&mut self, w: bool, a: u8, b: u8) {
        self.rr(w, &[0x85], b, a);
    }

    fn cmp_rr(&mut self, w: bool, a: u8, b: u8) {
        self.rr(w, &[0x39], b, a);
    }

    fn cmp_ri32(&mut self, w: bool, reg: u8, imm: i32) {
        self.rex(w, 7, 0, reg);
        self.put1(0x81);
        self.modrm(3, 7, reg);
        self.put4(imm as u32);
    }

    /// `cmp reg, [base + disp]`.
    fn cmp_rm64(&mut self, reg: u8, base: u8, disp: i32) {
        self.rm(true, &[0x3b], reg, base, disp);
    }

    fn cmp_mem8_imm(&mut self, base: u8, disp: i32, imm: u8) {
        self.rm(false, &[0x80], 7, base, disp);
        self.put1(imm);
    }

    fn cmp_mem32_imm(&mut self, base: u8, disp: i32, imm: i32) {
        self.rm(false, &[0x81], 7, base, disp);
        self.put4(imm as u32);
    }

    fn shift_cl(&mut self, w: bool, ext: u8, reg: u8) {
        self.rr(w, &[0xd3], ext, reg);
    }

    fn setcc(&mut self, code: u8, reg: u8) {
        // Byte registers al/cl/dl only.
        self.rr(false, &[0x0f, 0x90 + code], 0, reg);
    }

    fn movzx8(&mut self, dst: u8, src: u8) {
        self.rr(false, &[0x0f, 0xb6], dst, src);
    }

    fn push(&mut self, reg: u8) {
        self.rex(false, 0, 0, reg);
        self.put1(0x50 + (reg & 7));
    }

    fn pop(&mut self, reg: u8) {
        self.rex(false, 0, 0, reg);
        self.put1(0x58 + (reg & 7));
    }

    fn lea(&mut self, dst: u8, base: u8, disp: i32) {
        self.rm(true, &[0x8d], dst, base, disp);
    }

    fn lea_rip(&mut self, dst: u8, label: Label) {
        self.rex(true, dst, 0, 0);
        self.put1(0x8d);
        self.modrm(0, dst, 5);
        self.label_ref(label, FixupKind::Rel32);
    }

    fn sub_rsp(&mut self, imm: i32) {
        self.rex(true, 5, 0, RSP);
        self.put1(0x81);
        self.modrm(3, 5, RSP);
        self.put4(imm as u32);
    }

    fn jmp(&mut self, label: Label) {
        self.put1(0xe9);
        self.label_ref(label, FixupKind::Rel32);
    }

    fn jcc(&mut self, code: u8, label: Label) {
        self.put1(0x0f);
        self.put1(0x80 + code);
        self.label_ref(label, FixupKind::Rel32);
    }

    fn call_reloc(&mut self, target: FuncIndex) {
        self.put1(0xe8);
        let offset = self.pos();
        self.relocs.push(Reloc { offset, target });
        self.put4(0);
    }

    fn call_mem(&mut self, base: u8, disp: i32) {
        self.rm(false, &[0xff], 2, base, disp);
    }

    fn jmp_reg(&mut self, reg: u8) {
        self.rr(false, &[0xff], 4, reg);
    }

    fn ret(&mut self) {
        self.put1(0xc3);
    }

    fn cdq(&mut self, w: bool) {
        if w {
            self.put1(0x48);
        }
        self.put1(0x99);
    }

    fn idiv(&mut self, w: bool, reg: u8) {
        self.rr(w, &[0xf7], 7, reg);
    }

    fn udiv(&mut self, w: bool, reg: u8) {
        self.rr(w, &[0xf7], 6, reg);
    }

    fn bsr(&mut self, w: bool, dst: u8, src: u8) {
        self.rr(w, &[0x0f, 0xbd], dst, src);
    }

    fn bsf(&mut self, w: bool, dst: u8, src: u8) {
        self.rr(w, &[0x0f, 0xbc], dst, src);
    }

    fn popcnt(&mut self, w: bool, dst: u8, src: u8) {
        self.put1(0xf3);
        self.rr(w, &[0x0f, 0xb8], dst, src);
    }

    fn movsx8(&mut self, w: bool, dst: u8, src: u8) {
        self.rr(w, &[0x0f, 0xbe], dst, src);
    }

    fn movsx16(&mut self, w: bool, dst: u8, src: u8) {
        self.rr(w, &[0x0f, 0xbf], dst, src);
    }

    fn movsxd(&mut self, dst: u8, src: u8) {
        self.rr(true, &[0x63], dst, src);
    }

    fn cmov(&mut self, w: bool, code: u8, dst: u8, src: u8) {
        self.rr(w, &[0x0f, 0x40 + code], dst, src);
    }

    // SSE scalar operations. `double` selects the f64 form.

    fn sse_prefix(&mut self, double: bool) {
        self.put1(if double { 0xf2 } else { 0xf3 });
    }

    fn movaps(&mut self, dst: u8, src: u8) {
        self.rr(false, &[0x0f, 0x28], dst, src);
    }

    fn movs_load(&mut self, double: bool, dst: u8, base: u8, disp: i32) {
        self.sse_prefix(double);
        self.rm(false, &[0x0f, 0x10], dst, base, disp);
    }

    fn movs_store(&mut self, double: bool, base: u8, disp: i32, src: u8) {
        self.sse_prefix(double);
        self.rm(false, &[0x0f, 0x11], src, base, disp);
    }

    fn sse_op(&mut self, double: bool, opcode: u8, dst: u8, src: u8) {
        self.sse_prefix(double);
        self.rr(false, &[0x0f, opcode], dst, src);
    }

    fn ucomis(&mut self, double: bool, a: u8, b: u8) {
        if double {
            self.put1(0x66);
        }
        self.rr(false, &[0x0f, 0x2e], a, b);
    }

    /// Packed bitwise op used for the min/max and neg/abs expansions.
    fn packed_logic(&mut self, double: bool, opcode: u8, dst: u8, src: u8) {
        if double {
            self.put1(0x66);
        }
        self.rr(false, &[0x0f, opcode], dst, src);
    }

    fn rounds(&mut self, double: bool, dst: u8, src: u8, imm: u8) {
        self.put1(0x66);
        self.rex(false, dst, 0, src);
        self.bytes
            .extend_from_slice(&[0x0f, 0x3a, if double { 0x0b } else { 0x0a }]);
        self.modrm(3, dst, src);
        self.put1(imm);
    }

    fn cvt(&mut self, prefix: u8, w: bool, opcode: u8, dst: u8, src: u8) {
        self.put1(prefix);
        self.rr(w, &[0x0f, opcode], dst, src);
    }

    /// `movd`/`movq` between general and vector registers.
    fn gpr_to_xmm(&mut self, w: bool, dst_xmm: u8, src: u8) {
        self.put1(0x66);
        self.rr(w, &[0x0f, 0x6e], dst_xmm, src);
    }

    fn xmm_to_gpr(&mut self, w: bool, dst: u8, src_xmm: u8) {
        self.put1(0x66);
        self.rr(w, &[0x0f, 0x7e], src_xmm, dst);
    }
}

enum StubKind {
    Trap { trap: Trap, wasm_offset: u32 },
    Propagate { wasm_offset: u32 },
}

struct Stub {
    label: Label,
    kind: StubKind,
}

pub fn emit(vcode: &VCode, alloc: &AllocationResult, func_index: u32) -> CompiledFunction {
    let mut e = Emitter {
        asm: Asm::new(),
        alloc,
        func_index,
        frame_size: 0,
        stubs: Vec::new(),
        block_labels: Vec::new(),
        epilogue_ok: Label(0),
        trap_epilogue: Label(0),
    };

    let spill_bytes = 8 * alloc.num_spill_slots as i32;
    let call_bytes = 16 * vcode.max_call_slots as i32;
    let base = 8 + spill_bytes + call_bytes;
    e.frame_size = if base % 16 == 8 { base } else { base + 8 };

    e.block_labels = (0..vcode.block_ranges.len()).map(|_| e.asm.new_label()).collect();
    e.epilogue_ok = e.asm.new_label();
    e.trap_epilogue = e.asm.new_label();

    e.prologue();

    for (block, &(start, end)) in vcode.block_ranges.iter().enumerate() {
        let label = e.block_labels[block];
        e.asm.bind(label);
        for at in start..end {
            let next_block = (block + 1) as u32;
            e.emit_inst(&vcode.insts[at as usize], block as u32, next_block);
        }
    }

    e.emit_stubs();
    e.emit_epilogues();

    let (body, relocs) = e.asm.finalize();
    CompiledFunction { body, relocs }
}

/// rbp-relative displacement of the saved value-buffer pointer.
const VALUES_PTR_DISP: i32 = -48;

fn spill_disp(slot: u32) -> i32 {
    -56 - 8 * slot as i32
}

struct Emitter<'a> {
    asm: Asm,
    alloc: &'a AllocationResult,
    func_index: u32,
    frame_size: i32,
    stubs: Vec<Stub>,
    block_labels: Vec<Label>,
    epilogue_ok: Label,
    trap_epilogue: Label,
}

impl Emitter<'_> {
    fn prologue(&mut self) {
        self.asm.push(RBP);
        self.asm.mov_rr64(RBP, RSP);
        for reg in [RBX, R12, R13, R14, R15] {
            self.asm.push(reg);
        }
        self.asm.mov_rr64(R15, RDI);
        self.asm.sub_rsp(self.frame_size);
        self.asm.mov_store64(RBP, VALUES_PTR_DISP, RSI);

        // Stack limit check.
        self.asm.cmp_rm64(RSP, R15, VMCTX_STACK_LIMIT);
        let overflow = self.stub(Trap::StackOverflow, 0);
        self.asm.jcc(cc::B, overflow);

        self.interrupt_check();
    }

    fn interrupt_check(&mut self) {
        self.asm.mov_load64(RAX, R15, VMCTX_INTERRUPT);
        self.asm.cmp_mem8_imm(RAX, 0, 0);
        let stub = self.stub(Trap::Interrupt, 0);
        self.asm.jcc(cc::NE, stub);
    }

    fn stub(&mut self, trap: Trap, wasm_offset: u32) -> Label {
        let label = self.asm.new_label();
        self.stubs.push(Stub { label, kind: StubKind::Trap { trap, wasm_offset } });
        label
    }

    fn propagate_stub(&mut self, wasm_offset: u32) -> Label {
        let label = self.asm.new_label();
        self.stubs.push(Stub { label, kind: StubKind::Propagate { wasm_offset } });
        label
    }

    fn emit_stubs(&mut self) {
        for stub in std::mem::take(&mut self.stubs) {
            self.asm.bind(stub.label);
            match stub.kind {
                StubKind::Trap { trap, wasm_offset } => {
                    self.asm.mov_ri(RSI, trap.as_u32() as u64);
                    self.asm.mov_ri(RDX, self.func_index as u64);
                    self.asm.mov_ri(RCX, wasm_offset as u64);
                    self.asm.mov_rr64(RDI, R15);
                    self.asm.mov_load64(RAX, R15, VMCTX_BUILTINS);
                    self.asm
                        .call_mem(RAX, BuiltinFunctionIndex::raise_trap().byte_offset());
                }
                StubKind::Propagate { wasm_offset } => {
                    self.asm.mov_ri(RSI, self.func_index as u64);
                    self.asm.mov_ri(RDX, wasm_offset as u64);
                    self.asm.mov_rr64(RDI, R15);
                    self.asm.mov_load64(RAX, R15, VMCTX_BUILTINS);
                    self.asm
                        .call_mem(RAX, BuiltinFunctionIndex::push_frame().byte_offset());
                }
            }
            self.asm.jmp(self.trap_epilogue);
        }
    }

    fn emit_epilogues(&mut self) {
        self.asm.bind(self.epilogue_ok);
        // xor eax, eax: the ok status.
        self.asm.alu_rr(false, 0x31, RAX, RAX);
        self.restore_and_ret();

        self.asm.bind(self.trap_epilogue);
        self.asm.mov_ri(RAX, 1);
        self.restore_and_ret();
    }

    fn restore_and_ret(&mut self) {
        self.asm.lea(RSP, RBP, -40);
        for reg in [R15, R14, R13, R12, RBX] {
            self.asm.pop(reg);
        }
        self.asm.pop(RBP);
        self.asm.ret();
    }

    // Operand access.

    fn assignment(&self, vreg: VReg) -> Assignment {
        self.alloc.assignments[vreg.index()]
    }

    /// The register holding an integer operand, reloading into `scratch`
    /// if the value lives in a spill slot.
    fn int_src(&mut self, vreg: VReg, scratch: u8) -> u8 {
        match self.assignment(vreg) {
            Assignment::Reg(preg) => preg.hw_enc(),
            Assignment::Spill(slot) => {
                self.asm.mov_load64(scratch, RBP, spill_disp(slot));
                scratch
            }
        }
    }

    fn float_src(&mut self, vreg: VReg, scratch: u8) -> u8 {
        match self.assignment(vreg) {
            Assignment::Reg(preg) => preg.hw_enc(),
            Assignment::Spill(slot) => {
                self.asm.movs_load(true, scratch, RBP, spill_disp(slot));
                scratch
            }
        }
    }

    /// Moves an integer result out of `src` into the vreg's home.
    /// Integer results are always zero-extended to 64 bits, so the full
    /// register is stored.
    fn int_dst(&mut self, vreg: VReg, src: u8) {
        match self.assignment(vreg) {
            Assignment::Reg(preg) => {
                if preg.hw_enc() != src {
                    self.asm.mov_rr64(preg.hw_enc(), src);
                }
            }
            Assignment::Spill(slot) => self.asm.mov_store64(RBP, spill_disp(slot), src),
        }
    }

    fn float_dst(&mut self, vreg: VReg, src: u8) {
        match self.assignment(vreg) {
            Assignment::Reg(preg) => {
                if preg.hw_enc() != src {
                    self.asm.movaps(preg.hw_enc(), src);
                }
            }
            Assignment::Spill(slot) => self.asm.movs_store(true, RBP, spill_disp(slot), src),
        }
    }

    fn emit_inst(&mut self, inst: &Inst, block: u32, next_block: u32) {
        match inst {
            Inst::LoadParam { dst, ty, index } => {
                self.asm.mov_load64(RAX, RBP, VALUES_PTR_DISP);
                let disp = 16 * *index as i32;
                match ty {
                    Type::I32 => {
                        self.asm.mov_load32(RCX, RAX, disp);
                        self.int_dst(*dst, RCX);
                    }
                    Type::I64 => {
                        self.asm.mov_load64(RCX, RAX, disp);
                        self.int_dst(*dst, RCX);
                    }
                    Type::F32 => {
                        self.asm.movs_load(false, XMM0, RAX, disp);
                        self.float_dst(*dst, XMM0);
                    }
                    Type::F64 => {
                        self.asm.movs_load(true, XMM0, RAX, disp);
                        self.float_dst(*dst, XMM0);
                    }
                }
            }
            Inst::Iconst { dst, bits, .. } => {
                self.asm.mov_ri(RAX, *bits);
                self.int_dst(*dst, RAX);
            }
            Inst::Fconst { dst, ty, bits } => {
                self.asm.mov_ri(RAX, *bits);
                self.asm.gpr_to_xmm(*ty == Type::F64, XMM0, RAX);
                self.float_dst(*dst, XMM0);
            }
            Inst::Alu { op, ty, dst, lhs, rhs } => self.alu(*op, *ty, *dst, *lhs, *rhs),
            Inst::Div { op, ty, dst, lhs, rhs, wasm_offset } => {
                self.div(*op, *ty, *dst, *lhs, *rhs, *wasm_offset)
            }
            Inst::IntUnary { op, ty, dst, src } => self.int_unary(*op, *ty, *dst, *src),
            Inst::Icmp { cond, ty, dst, lhs, rhs } => {
                let w = *ty == Type::I64;
                let l = self.int_src(*lhs, RAX);
                let r = self.int_src(*rhs, RCX);
                self.asm.cmp_rr(w, l, r);
                let code = int_cc_code(*cond);
                self.asm.setcc(code, RAX);
                self.asm.movzx8(RAX, RAX);
                self.int_dst(*dst, RAX);
            }
            Inst::Fcmp { cond, ty, dst, lhs, rhs } => {
                self.fcmp(*cond, *ty, *dst, *lhs, *rhs)
            }
            Inst::FpUnary { op, ty, dst, src } => self.fp_unary(*op, *ty, *dst, *src),
            Inst::FpBinary { op, ty, dst, lhs, rhs } => {
                self.fp_binary(*op, *ty, *dst, *lhs, *rhs)
            }
            Inst::Convert { op, dst, src } => self.convert(*op, *dst, *src),
            Inst::Select { ty, dst, cond, if_true, if_false } => {
                if ty.is_float() {
                    let t = self.float_src(*if_true, XMM0);
                    if t != XMM0 {
                        self.asm.movaps(XMM0, t);
                    }
                    let f = self.float_src(*if_false, XMM1);
                    let c = self.int_src(*cond, RAX);
                    self.asm.test_rr(false, c, c);
                    let done = self.asm.new_label();
                    self.asm.jcc(cc::NE, done);
                    self.asm.movaps(XMM0, f);
                    self.asm.bind(done);
                    self.float_dst(*dst, XMM0);
                } else {
                    let t = self.int_src(*if_true, RAX);
                    if t != RAX {
                        self.asm.mov_rr64(RAX, t);
                    }
                    let f = self.int_src(*if_false, RCX);
                    let c = self.int_src(*cond, RDX);
                    self.asm.test_rr(false, c, c);
                    self.asm.cmov(true, cc::E, RAX, f);
                    self.int_dst(*dst, RAX);
                }
            }
            Inst::Load { kind, dst, index, offset, wasm_offset } => {
                let size = kind.bytes();
                self.memory_address(*index, *offset, size, *wasm_offset);
                let disp = -(size as i32);
                match kind {
                    LoadKind::I32 => self.asm.mov_load32(RAX, R11, disp),
                    LoadKind::I64 => self.asm.mov_load64(RAX, R11, disp),
                    LoadKind::F32 => {
                        self.asm.movs_load(false, XMM0, R11, disp);
                        self.float_dst(*dst, XMM0);
                        return;
                    }
                    LoadKind::F64 => {
                        self.asm.movs_load(true, XMM0, R11, disp);
                        self.float_dst(*dst, XMM0);
                        return;
                    }
                    LoadKind::I32S8 => self.asm.rm(false, &[0x0f, 0xbe], RAX, R11, disp),
                    LoadKind::I32U8 | LoadKind::I64U8 => {
                        self.asm.rm(false, &[0x0f, 0xb6], RAX, R11, disp)
                    }
                    LoadKind::I32S16 => self.asm.rm(false, &[0x0f, 0xbf], RAX, R11, disp),
                    LoadKind::I32U16 | LoadKind::I64U16 => {
                        self.asm.rm(false, &[0x0f, 0xb7], RAX, R11, disp)
                    }
                    LoadKind::I64S8 => self.asm.rm(true, &[0x0f, 0xbe], RAX, R11, disp),
                    LoadKind::I64S16 => self.asm.rm(true, &[0x0f, 0xbf], RAX, R11, disp),
                    LoadKind::I64S32 => self.asm.rm(true, &[0x63], RAX, R11, disp),
                    LoadKind::I64U32 => self.asm.mov_load32(RAX, R11, disp),
                }
                self.int_dst(*dst, RAX);
            }
            Inst::Store { kind, index, src, offset, wasm_offset } => {
                let size = kind.bytes();
                self.memory_address(*index, *offset, size, *wasm_offset);
                let disp = -(size as i32);
                match kind {
                    StoreKind::F32 => {
                        let s = self.float_src(*src, XMM0);
                        self.asm.movs_store(false, R11, disp, s);
                    }
                    StoreKind::F64 => {
                        let s = self.float_src(*src, XMM0);
                        self.asm.movs_store(true, R11, disp, s);
                    }
                    _ => {
                        let s = self.int_src(*src, RAX);
                        match kind {
                            StoreKind::I8 => {
                                // Byte stores need a low-byte-addressable
                                // register.
                                if s != RAX {
                                    self.asm.mov_rr64(RAX, s);
                                }
                                self.asm.mov_store8(R11, disp, RAX);
                            }
                            StoreKind::I16 => {
                                if s != RAX {
                                    self.asm.mov_rr64(RAX, s);
                                }
                                self.asm.mov_store16(R11, disp, RAX);
                            }
                            StoreKind::I32 => self.asm.mov_store32(R11, disp, s),
                            StoreKind::I64 => self.asm.mov_store64(R11, disp, s),
                            StoreKind::F32 | StoreKind::F64 => unreachable!(),
                        }
                    }
                }
            }
            Inst::MemorySize { dst } => {
                self.asm.mov_load64(RAX, R15, VMCTX_MEMORY_DEFINITION);
                self.asm.mov_load64(RAX, RAX, VMMEMORY_DEFINITION_CURRENT_LENGTH);
                // shr rax, 16: pages from bytes.
                self.asm.rex(true, 5, 0, RAX);
                self.asm.put1(0xc1);
                self.asm.modrm(3, 5, RAX);
                self.asm.put1(16);
                self.int_dst(*dst, RAX);
            }
            Inst::MemoryGrow { dst, delta } => {
                let d = self.int_src(*delta, RAX);
                self.asm.mov_rr32(RSI, d);
                self.asm.mov_rr64(RDI, R15);
                self.asm.mov_load64(RAX, R15, VMCTX_BUILTINS);
                self.asm
                    .call_mem(RAX, BuiltinFunctionIndex::memory_grow().byte_offset());
                // The old page count, or u64::MAX which truncates to the
                // -1 failure value.
                self.asm.mov_rr32(RAX, RAX);
                self.int_dst(*dst, RAX);
            }
            Inst::GlobalGet { dst, ty, global } => {
                let disp = self.global_base(*global);
                match ty {
                    Type::I32 => {
                        self.asm.mov_load32(RCX, RAX, disp);
                        self.int_dst(*dst, RCX);
                    }
                    Type::I64 => {
                        self.asm.mov_load64(RCX, RAX, disp);
                        self.int_dst(*dst, RCX);
                    }
                    Type::F32 => {
                        self.asm.movs_load(false, XMM0, RAX, disp);
                        self.float_dst(*dst, XMM0);
                    }
                    Type::F64 => {
                        self.asm.movs_load(true, XMM0, RAX, disp);
                        self.float_dst(*dst, XMM0);
                    }
                }
            }
            Inst::GlobalSet { src, ty, global } => {
                let disp = self.global_base(*global);
                match ty {
                    Type::I32 => {
                        let s = self.int_src(*src, RCX);
                        self.asm.mov_store32(RAX, disp, s);
                    }
                    Type::I64 => {
                        let s = self.int_src(*src, RCX);
                        self.asm.mov_store64(RAX, disp, s);
                    }
                    Type::F32 => {
                        let s = self.float_src(*src, XMM0);
                        self.asm.movs_store(false, RAX, disp, s);
                    }
                    Type::F64 => {
                        let s = self.float_src(*src, XMM0);
                        self.asm.movs_store(true, RAX, disp, s);
                    }
                }
            }
            Inst::Call { target, args, arg_tys, rets, ret_tys, wasm_offset } => {
                self.store_call_args(args, arg_tys);
                match target {
                    CallTarget::Defined(func) => {
                        self.asm.mov_rr64(RDI, R15);
                        self.asm.lea(RSI, RSP, 0);
                        self.asm.call_reloc(*func);
                    }
                    CallTarget::Funcref(func) => {
                        self.asm.mov_load64(RAX, R15, VMCTX_FUNCREFS);
                        let base = VMFUNCREF_SIZE as i32 * func.as_u32() as i32;
                        self.asm.mov_load64(RDI, RAX, base + VMFUNCREF_VMCTX);
                        self.asm.lea(RSI, RSP, 0);
                        self.asm.call_mem(RAX, base + VMFUNCREF_ARRAY_CALL);
                    }
                }
                self.check_call_status(*wasm_offset);
                self.load_call_rets(rets, ret_tys);
            }
            Inst::CallIndirect {
                table_index,
                type_id,
                callee,
                args,
                arg_tys,
                rets,
                ret_tys,
                wasm_offset,
            } => {
                self.store_call_args(args, arg_tys);
                let c = self.int_src(*callee, RDX);
                if c != RDX {
                    self.asm.mov_rr32(RDX, c);
                }
                self.asm.mov_rr64(RDI, R15);
                self.asm.mov_ri(RSI, *table_index as u64);
                self.asm.mov_load64(RAX, R15, VMCTX_BUILTINS);
                self.asm
                    .call_mem(RAX, BuiltinFunctionIndex::table_get_funcref().byte_offset());
                // Out of bounds: the builtin recorded the trap and
                // returned the sentinel.
                self.asm.cmp_ri32(true, RAX, 1);
                self.asm.jcc(cc::E, self.trap_epilogue);
                // Null entry.
                self.asm.test_rr(true, RAX, RAX);
                let null = self.stub(Trap::IndirectCallToNull, *wasm_offset);
                self.asm.jcc(cc::E, null);
                // Signature check.
                self.asm.cmp_mem32_imm(RAX, VMFUNCREF_TYPE_ID, *type_id as i32);
                let bad = self.stub(Trap::BadSignature, *wasm_offset);
                self.asm.jcc(cc::NE, bad);
                self.asm.mov_load64(RDI, RAX, VMFUNCREF_VMCTX);
                self.asm.lea(RSI, RSP, 0);
                self.asm.call_mem(RAX, VMFUNCREF_ARRAY_CALL);
                self.check_call_status(*wasm_offset);
                self.load_call_rets(rets, ret_tys);
            }
            Inst::Move { ty, dst, src } => {
                if ty.is_float() {
                    let s = self.float_src(*src, XMM0);
                    self.float_dst(*dst, s);
                } else {
                    let s = self.int_src(*src, RAX);
                    self.int_dst(*dst, s);
                }
            }
            Inst::Jump { target } => {
                if *target <= block {
                    self.interrupt_check();
                }
                if *target != next_block {
                    self.asm.jmp(self.block_labels[*target as usize]);
                }
            }
            Inst::JumpIf { cond, then_target, else_target } => {
                let c = self.int_src(*cond, RAX);
                self.asm.test_rr(false, c, c);
                self.asm.jcc(cc::NE, self.block_labels[*then_target as usize]);
                if *else_target != next_block {
                    self.asm.jmp(self.block_labels[*else_target as usize]);
                }
            }
            Inst::BrTable { index, targets, default } => {
                let i = self.int_src(*index, RAX);
                if i != RAX {
                    self.asm.mov_rr32(RAX, i);
                }
                self.asm.cmp_ri32(false, RAX, targets.len() as i32);
                self.asm.jcc(cc::AE, self.block_labels[*default as usize]);
                let table = self.asm.new_label();
                self.asm.lea_rip(RCX, table);
                // movsxd rdx, dword [rcx + rax*4]
                self.asm.rex_force(true, RDX, RCX);
                self.asm.put1(0x63);
                self.asm.modrm(0, RDX, 4);
                self.asm.put1(2 << 6 | (RAX & 7) << 3 | (RCX & 7));
                self.asm.alu_rr(true, 0x01, RCX, RDX);
                self.asm.jmp_reg(RCX);
                self.asm.bind(table);
                for &target in targets {
                    let label = self.block_labels[target as usize];
                    self.asm.label_ref(label, FixupKind::Entry32 { base: table });
                }
            }
            Inst::Return { rets, ret_tys } => {
                self.asm.mov_load64(RDX, RBP, VALUES_PTR_DISP);
                for (at, (&ret, &ty)) in rets.iter().zip(ret_tys.iter()).enumerate() {
                    let disp = 16 * at as i32;
                    match ty {
                        Type::I32 => {
                            let s = self.int_src(ret, RAX);
                            self.asm.mov_store32(RDX, disp, s);
                        }
                        Type::I64 => {
                            let s = self.int_src(ret, RAX);
                            self.asm.mov_store64(RDX, disp, s);
                        }
                        Type::F32 => {
                            let s = self.float_src(ret, XMM0);
                            self.asm.movs_store(false, RDX, disp, s);
                        }
                        Type::F64 => {
                            let s = self.float_src(ret, XMM0);
                            self.asm.movs_store(true, RDX, disp, s);
                        }
                    }
                }
                self.asm.jmp(self.epilogue_ok);
            }
            Inst::Trap { trap, wasm_offset } => {
                let stub = self.stub(*trap, *wasm_offset);
                self.asm.jmp(stub);
            }
        }
    }

    /// Loads the base address for a global access into `rax` and returns
    /// the displacement of the value.
    fn global_base(&mut self, global: GlobalAddr) -> i32 {
        match global {
            GlobalAddr::Defined(index) => {
                self.asm.mov_load64(RAX, R15, VMCTX_GLOBALS);
                VMGLOBAL_SIZE as i32 * index as i32
            }
            GlobalAddr::Imported(index) => {
                self.asm.mov_load64(RAX, R15, VMCTX_IMPORTED_GLOBALS);
                self.asm.mov_load64(RAX, RAX, 8 * index as i32);
                0
            }
        }
    }

    /// Bounds-checks a linear-memory access of `size` bytes at
    /// `index + offset` and leaves `base + index + offset + size` in
    /// `r11`, so the access itself uses `[r11 - size]`.
    fn memory_address(&mut self, index: VReg, offset: u32, size: u32, wasm_offset: u32) {
        let i = self.int_src(index, RAX);
        self.asm.mov_rr32(R10, i);
        let upper = offset as u64 + size as u64;
        if upper <= i32::MAX as u64 {
            // add r10, imm32
            self.asm.rex(true, 0, 0, R10);
            self.asm.put1(0x81);
            self.asm.modrm(3, 0, R10);
            self.asm.put4(upper as u32);
        } else {
            self.asm.mov_ri(RAX, upper);
            self.asm.alu_rr(true, 0x01, R10, RAX);
        }
        self.asm.mov_load64(R11, R15, VMCTX_MEMORY_DEFINITION);
        // cmp r10, [r11 + current_length]
        self.asm
            .cmp_rm64(R10, R11, VMMEMORY_DEFINITION_CURRENT_LENGTH);
        let oob = self.stub(Trap::MemoryOutOfBounds, wasm_offset);
        self.asm.jcc(cc::A, oob);
        self.asm.mov_load64(R11, R11, VMMEMORY_DEFINITION_BASE);
        self.asm.alu_rr(true, 0x01, R11, R10);
    }

    fn store_call_args(&mut self, args: &[VReg], arg_tys: &[Type]) {
        for (at, (&arg, &ty)) in args.iter().zip(arg_tys.iter()).enumerate() {
            let disp = 16 * at as i32;
            match ty {
                Type::I32 => {
                    let s = self.int_src(arg, RAX);
                    self.asm.mov_store32(RSP, disp, s);
                }
                Type::I64 => {
                    let s = self.int_src(arg, RAX);
                    self.asm.mov_store64(RSP, disp, s);
                }
                Type::F32 => {
                    let s = self.float_src(arg, XMM0);
                    self.asm.movs_store(false, RSP, disp, s);
                }
                Type::F64 => {
                    let s = self.float_src(arg, XMM0);
                    self.asm.movs_store(true, RSP, disp, s);
                }
            }
        }
    }

    fn check_call_status(&mut self, wasm_offset: u32) {
        self.asm.test_rr(false, RAX, RAX);
        let propagate = self.propagate_stub(wasm_offset);
        self.asm.jcc(cc::NE, propagate);
    }

    fn load_call_rets(&mut self, rets: &[VReg], ret_tys: &[Type]) {
        for (at, (&ret, &ty)) in rets.iter().zip(ret_tys.iter()).enumerate() {
            let disp = 16 * at as i32;
            match ty {
                Type::I32 => {
                    self.asm.mov_load32(RAX, RSP, disp);
                    self.int_dst(ret, RAX);
                }
                Type::I64 => {
                    self.asm.mov_load64(RAX, RSP, disp);
                    self.int_dst(ret, RAX);
                }
                Type::F32 => {
                    self.asm.movs_load(false, XMM0, RSP, disp);
                    self.float_dst(ret, XMM0);
                }
                Type::F64 => {
                    self.asm.movs_load(true, XMM0, RSP, disp);
                    self.float_dst(ret, XMM0);
                }
            }
        }
    }

    fn alu(&mut self, op: BinaryOp, ty: Type, dst: VReg, lhs: VReg, rhs: VReg) {
        let w = ty == Type::I64;
        let l = self.int_src(lhs, RAX);
        if l != RAX {
            self.asm.mov_rr64(RAX, l);
        }
        let r = self.int_src(rhs, RCX);
        match op {
            BinaryOp::Add => self.asm.alu_rr(w, 0x01, RAX, r),
            BinaryOp::Sub => self.asm.alu_rr(w, 0x29, RAX, r),
            BinaryOp::Mul => self.asm.imul_rr(w, RAX, r),
            BinaryOp::And => self.asm.alu_rr(w, 0x21, RAX, r),
            BinaryOp::Or => self.asm.alu_rr(w, 0x09, RAX, r),
            BinaryOp::Xor => self.asm.alu_rr(w, 0x31, RAX, r),
            BinaryOp::Shl | BinaryOp::ShrS | BinaryOp::ShrU | BinaryOp::Rotl | BinaryOp::Rotr => {
                if r != RCX {
                    self.asm.mov_rr64(RCX, r);
                }
                let ext = match op {
                    BinaryOp::Shl => 4,
                    BinaryOp::ShrU => 5,
                    BinaryOp::ShrS => 7,
                    BinaryOp::Rotl => 0,
                    BinaryOp::Rotr => 1,
                    _ => unreachable!(),
                };
                self.asm.shift_cl(w, ext, RAX);
            }
        }
        if !w {
            // Re-establish the zero-extension invariant; the shifts and
            // rotates above were emitted in 32-bit forms already, but a
            // 64-bit form would leave stale upper bits.
            self.asm.mov_rr32(RAX, RAX);
        }
        self.int_dst(dst, RAX);
    }

    fn div(&mut self, op: DivOp, ty: Type, dst: VReg, lhs: VReg, rhs: VReg, wasm_offset: u32) {
        let w = ty == Type::I64;
        let l = self.int_src(lhs, RAX);
        if l != RAX {
            self.asm.mov_rr64(RAX, l);
        }
        let r = self.int_src(rhs, RCX);
        if r != RCX {
            self.asm.mov_rr64(RCX, r);
        }
        self.asm.test_rr(w, RCX, RCX);
        let zero = self.stub(Trap::IntegerDivisionByZero, wasm_offset);
        self.asm.jcc(cc::E, zero);

        match op {
            DivOp::DivS | DivOp::RemS => {
                let divide = self.asm.new_label();
                let done = self.asm.new_label();
                self.asm.cmp_ri32(w, RCX, -1);
                self.asm.jcc(cc::NE, divide);
                match op {
                    DivOp::DivS => {
                        // INT_MIN / -1 overflows.
                        if w {
                            self.asm.mov_ri(R10, i64::MIN as u64);
                            self.asm.cmp_rr(true, RAX, R10);
                        } else {
                            self.asm.cmp_ri32(false, RAX, i32::MIN);
                        }
                        let overflow = self.stub(Trap::IntegerOverflow, wasm_offset);
                        self.asm.jcc(cc::E, overflow);
                    }
                    DivOp::RemS => {
                        // INT_MIN % -1 is 0, but idiv would fault.
                        self.asm.alu_rr(true, 0x31, RDX, RDX);
                        self.asm.jmp(done);
                    }
                    _ => unreachable!(),
                }
                self.asm.bind(divide);
                self.asm.cdq(w);
                self.asm.idiv(w, RCX);
                self.asm.bind(done);
            }
            DivOp::DivU | DivOp::RemU => {
                self.asm.alu_rr(true, 0x31, RDX, RDX);
                self.asm.udiv(w, RCX);
            }
        }

        let result = match op {
            DivOp::DivS | DivOp::DivU => RAX,
            DivOp::RemS | DivOp::RemU => RDX,
        };
        if !w {
            self.asm.mov_rr32(result, result);
        }
        self.int_dst(dst, result);
    }

    fn int_unary(&mut self, op: IntUnaryOp, ty: Type, dst: VReg, src: VReg) {
        let w = ty == Type::I64;
        let s = self.int_src(src, RCX);
        if s != RCX {
            self.asm.mov_rr64(RCX, s);
        }
        match op {
            IntUnaryOp::Clz => {
                let bits = if w { 64 } else { 32 };
                self.asm.mov_ri(RAX, bits);
                self.asm.bsr(w, RDX, RCX);
                let done = self.asm.new_label();
                self.asm.jcc(cc::E, done);
                self.asm.mov_ri(RAX, bits - 1);
                self.asm.alu_rr(false, 0x29, RAX, RDX);
                self.asm.bind(done);
            }
            IntUnaryOp::Ctz => {
                self.asm.mov_ri(RAX, if w { 64 } else { 32 });
                self.asm.bsf(w, RDX, RCX);
                let done = self.asm.new_label();
                self.asm.jcc(cc::E, done);
                self.asm.mov_rr32(RAX, RDX);
                self.asm.bind(done);
            }
            IntUnaryOp::Popcnt => self.asm.popcnt(w, RAX, RCX),
            IntUnaryOp::Extend8S => {
                self.asm.movsx8(w, RAX, RCX);
                if !w {
                    self.asm.mov_rr32(RAX, RAX);
                }
            }
            IntUnaryOp::Extend16S => {
                self.asm.movsx16(w, RAX, RCX);
                if !w {
                    self.asm.mov_rr32(RAX, RAX);
                }
            }
            IntUnaryOp::Extend32S => self.asm.movsxd(RAX, RCX),
        }
        self.int_dst(dst, RAX);
    }

    fn fcmp(&mut self, cond: FloatCC, ty: Type, dst: VReg, lhs: VReg, rhs: VReg) {
        let double = ty == Type::F64;
        let l = self.float_src(lhs, XMM0);
        let r = self.float_src(rhs, XMM1);
        // Compare so that an unordered result (CF set) never satisfies
        // the condition; equality additionally masks the parity flag.
        match cond {
            FloatCC::Eq => {
                self.asm.ucomis(double, l, r);
                self.asm.setcc(cc::E, RAX);
                self.asm.setcc(cc::NP, RCX);
                self.asm.alu_rr(false, 0x21, RAX, RCX);
            }
            FloatCC::Ne => {
                self.asm.ucomis(double, l, r);
                self.asm.setcc(cc::NE, RAX);
                self.asm.setcc(cc::P, RCX);
                self.asm.alu_rr(false, 0x09, RAX, RCX);
            }
            FloatCC::Lt => {
                self.asm.ucomis(double, r, l);
                self.asm.setcc(cc::A, RAX);
            }
            FloatCC::Gt => {
                self.asm.ucomis(double, l, r);
                self.asm.setcc(cc::A, RAX);
            }
            FloatCC::Le => {
                self.asm.ucomis(double, r, l);
                self.asm.setcc(cc::AE, RAX);
            }
            FloatCC::Ge => {
                self.asm.ucomis(double, l, r);
                self.asm.setcc(cc::AE, RAX);
            }
        }
        self.asm.movzx8(RAX, RAX);
        self.int_dst(dst, RAX);
    }

    fn fp_unary(&mut self, op: FloatUnaryOp, ty: Type, dst: VReg, src: VReg) {
        let double = ty == Type::F64;
        let s = self.float_src(src, XMM0);
        match op {
            FloatUnaryOp::Neg | FloatUnaryOp::Abs => {
                if s != XMM0 {
                    self.asm.movaps(XMM0, s);
                }
                let (mask32, mask64): (u64, u64) = match op {
                    FloatUnaryOp::Neg => (0x8000_0000, 0x8000_0000_0000_0000),
                    _ => (0x7fff_ffff, 0x7fff_ffff_ffff_ffff),
                };
                self.asm.mov_ri(RAX, if double { mask64 } else { mask32 });
                self.asm.gpr_to_xmm(double, XMM1, RAX);
                let opcode = if matches!(op, FloatUnaryOp::Neg) { 0x57 } else { 0x54 };
                self.asm.packed_logic(double, opcode, XMM0, XMM1);
            }
            FloatUnaryOp::Sqrt => self.asm.cvt(if double { 0xf2 } else { 0xf3 }, false, 0x51, XMM0, s),
            FloatUnaryOp::Ceil => self.asm.rounds(double, XMM0, s, 0x02),
            FloatUnaryOp::Floor => self.asm.rounds(double, XMM0, s, 0x01),
            FloatUnaryOp::Trunc => self.asm.rounds(double, XMM0, s, 0x03),
            FloatUnaryOp::Nearest => self.asm.rounds(double, XMM0, s, 0x00),
        }
        self.float_dst(dst, XMM0);
    }

    fn fp_binary(&mut self, op: FloatBinaryOp, ty: Type, dst: VReg, lhs: VReg, rhs: VReg) {
        let double = ty == Type::F64;
        let l = self.float_src(lhs, XMM0);
        if l != XMM0 {
            self.asm.movaps(XMM0, l);
        }
        let r = self.float_src(rhs, XMM1);
        match op {
            FloatBinaryOp::Add => self.asm.sse_op(double, 0x58, XMM0, r),
            FloatBinaryOp::Sub => self.asm.sse_op(double, 0x5c, XMM0, r),
            FloatBinaryOp::Mul => self.asm.sse_op(double, 0x59, XMM0, r),
            FloatBinaryOp::Div => self.asm.sse_op(double, 0x5e, XMM0, r),
            FloatBinaryOp::Min | FloatBinaryOp::Max => {
                if r != XMM1 {
                    self.asm.movaps(XMM1, r);
                }
                self.min_max(double, matches!(op, FloatBinaryOp::Min));
            }
            FloatBinaryOp::Copysign => {
                if r != XMM1 {
                    self.asm.movaps(XMM1, r);
                }
                // dst = (lhs & !sign_mask) | (rhs & sign_mask)
                let mask: u64 = if double { 0x8000_0000_0000_0000 } else { 0x8000_0000 };
                self.asm.mov_ri(RAX, mask);
                self.asm.gpr_to_xmm(double, XMM15, RAX);
                self.asm.packed_logic(double, 0x54, XMM1, XMM15); // rhs & mask
                self.asm.packed_logic(double, 0x55, XMM15, XMM0); // andn: !mask & lhs
                self.asm.movaps(XMM0, XMM15);
                self.asm.packed_logic(double, 0x56, XMM0, XMM1);
            }
        }
        self.float_dst(dst, XMM0);
    }

    /// NaN-propagating, zero-sign-respecting min/max with the operands
    /// in xmm0 and xmm1; the result lands in xmm0.
    fn min_max(&mut self, double: bool, is_min: bool) {
        let done = self.asm.new_label();
        let take_other = self.asm.new_label();
        let ordered_equal = self.asm.new_label();
        let nan = self.asm.new_label();

        self.asm.ucomis(double, XMM0, XMM1);
        self.asm.jcc(cc::P, nan);
        self.asm.jcc(cc::E, ordered_equal);
        // Strictly ordered: keep xmm0 when it is already the winner.
        self.asm.jcc(if is_min { cc::B } else { cc::A }, done);
        self.asm.jmp(take_other);

        self.asm.bind(ordered_equal);
        // Equal values can still differ in sign (+0 vs -0): `or` picks
        // -0 for min, `and` picks +0 for max.
        let opcode = if is_min { 0x56 } else { 0x54 };
        self.asm.packed_logic(double, opcode, XMM0, XMM1);
        self.asm.jmp(done);

        self.asm.bind(nan);
        // Adding produces a canonical quiet NaN.
        self.asm.sse_op(double, 0x58, XMM0, XMM1);
        self.asm.jmp(done);

        self.asm.bind(take_other);
        self.asm.movaps(XMM0, XMM1);
        self.asm.bind(done);
    }

    fn convert(&mut self, op: ConvertOp, dst: VReg, src: VReg) {
        match op {
            ConvertOp::I32WrapI64 | ConvertOp::I64ExtendI32U => {
                let s = self.int_src(src, RAX);
                self.asm.mov_rr32(RAX, s);
                self.int_dst(dst, RAX);
            }
            ConvertOp::I64ExtendI32S => {
                let s = self.int_src(src, RAX);
                self.asm.movsxd(RAX, s);
                self.int_dst(dst, RAX);
            }
            ConvertOp::F32DemoteF64 => {
                let s = self.float_src(src, XMM0);
                self.asm.cvt(0xf2, false, 0x5a, XMM0, s);
                self.float_dst(dst, XMM0);
            }
            ConvertOp::F64PromoteF32 => {
                let s = self.float_src(src, XMM0);
                self.asm.cvt(0xf3, false, 0x5a, XMM0, s);
                self.float_dst(dst, XMM0);
            }
            ConvertOp::F32FromI32S => {
                let s = self.int_src(src, RAX);
                self.asm.cvt(0xf3, false, 0x2a, XMM0, s);
                self.float_dst(dst, XMM0);
            }
            ConvertOp::F64FromI32S => {
                let s = self.int_src(src, RAX);
                self.asm.cvt(0xf2, false, 0x2a, XMM0, s);
                self.float_dst(dst, XMM0);
            }
            ConvertOp::F32FromI64S => {
                let s = self.int_src(src, RAX);
                self.asm.cvt(0xf3, true, 0x2a, XMM0, s);
                self.float_dst(dst, XMM0);
            }
            ConvertOp::F64FromI64S => {
                let s = self.int_src(src, RAX);
                self.asm.cvt(0xf2, true, 0x2a, XMM0, s);
                self.float_dst(dst, XMM0);
            }
            ConvertOp::F32FromI32U | ConvertOp::F64FromI32U => {
                // The value is zero-extended; a 64-bit signed convert is
                // exact.
                let s = self.int_src(src, RAX);
                let prefix = if matches!(op, ConvertOp::F32FromI32U) { 0xf3 } else { 0xf2 };
                self.asm.cvt(prefix, true, 0x2a, XMM0, s);
                self.float_dst(dst, XMM0);
            }
            ConvertOp::BitcastI32ToF32 => {
                let s = self.int_src(src, RAX);
                self.asm.gpr_to_xmm(false, XMM0, s);
                self.float_dst(dst, XMM0);
            }
            ConvertOp::BitcastI64ToF64 => {
                let s = self.int_src(src, RAX);
                self.asm.gpr_to_xmm(true, XMM0, s);
                self.float_dst(dst, XMM0);
            }
            ConvertOp::BitcastF32ToI32 => {
                let s = self.float_src(src, XMM0);
                self.asm.xmm_to_gpr(false, RAX, s);
                self.int_dst(dst, RAX);
            }
            ConvertOp::BitcastF64ToI64 => {
                let s = self.float_src(src, XMM0);
                self.asm.xmm_to_gpr(true, RAX, s);
                self.int_dst(dst, RAX);
            }
        }
    }
}

fn int_cc_code(cond: IntCC) -> u8 {
    match cond {
        IntCC::Eq => cc::E,
        IntCC::Ne => cc::NE,
        IntCC::LtS => cc::L,
        IntCC::LtU => cc::B,
        IntCC::GtS => cc::G,
        IntCC::GtU => cc::A,
        IntCC::LeS => cc::LE,
        IntCC::LeU => cc::BE,
        IntCC::GeS => cc::GE,
        IntCC::GeU => cc::AE,
    }
}
