//! Linear-scan register allocation.
//!
//! The allocator is machine-independent: the instruction selector hands
//! it a linearized function where every operand is a virtual register,
//! and gets back one assignment per virtual register, either a physical
//! register for the value's whole live range or a spill slot. Spilled
//! values are reloaded into scratch registers at each use by the
//! emitter, so no edit list is produced.
//!
//! Fixed-register instructions never reach the allocator; the selector
//! expands them through scratch registers that are excluded from the
//! allocatable set.

use cranelift_entity::{entity_impl, EntityRef};
use smallvec::SmallVec;

/// A virtual register.
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VReg(u32);
entity_impl!(VReg, "vr");

/// The two register classes of the backend.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum RegClass {
    /// General-purpose integer registers.
    Int,
    /// Floating-point registers.
    Float,
}

/// A physical register: a class and a hardware encoding.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub struct PReg {
    class: RegClass,
    hw_enc: u8,
}

impl PReg {
    /// Creates a physical register with the given hardware encoding.
    pub const fn new(class: RegClass, hw_enc: u8) -> PReg {
        PReg { class, hw_enc }
    }

    /// The register class.
    pub fn class(self) -> RegClass {
        self.class
    }

    /// The hardware encoding, as used in instruction emission.
    pub fn hw_enc(self) -> u8 {
        self.hw_enc
    }
}

/// The registers the allocator may hand out, split by who must preserve
/// them across calls.
pub struct MachineEnv {
    /// Clobbered by calls; preferred for short-lived values.
    pub caller_saved: Vec<PReg>,
    /// Preserved by callees; the only registers a value that lives
    /// across a call may occupy.
    pub callee_saved: Vec<PReg>,
}

/// The operands of one linearized instruction.
#[derive(Default, Clone)]
pub struct InstInfo {
    /// Virtual registers read by the instruction.
    pub uses: SmallVec<[VReg; 4]>,
    /// Virtual registers written by the instruction.
    pub defs: SmallVec<[VReg; 2]>,
    /// Whether the instruction clobbers every caller-saved register.
    pub is_call: bool,
}

/// Where a virtual register lives.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum Assignment {
    /// In the given register for its entire live range.
    Reg(PReg),
    /// In the 8-byte spill slot with the given index.
    Spill(u32),
}

/// The result of allocation.
pub struct AllocationResult {
    /// One assignment per virtual register. Registers that are never
    /// defined get an arbitrary assignment.
    pub assignments: Vec<Assignment>,
    /// Callee-saved registers handed out, for the prologue to save.
    pub used_callee_saved: Vec<PReg>,
    /// Number of 8-byte spill slots needed.
    pub num_spill_slots: u32,
}

/// A basic block as a half-open range of linear instruction indices.
pub type BlockRange = (u32, u32);

/// Runs linear-scan allocation.
///
/// `blocks` lists the instruction range of each block in layout order
/// and `succs` its successors, both indexed by layout position. `classes`
/// gives the class of each virtual register.
pub fn allocate(
    classes: &[RegClass],
    insts: &[InstInfo],
    blocks: &[BlockRange],
    succs: &[SmallVec<[u32; 2]>],
    env: &MachineEnv,
) -> AllocationResult {
    let live_outs = compute_liveness(classes.len(), insts, blocks, succs);
    let intervals = build_intervals(classes.len(), insts, blocks, &live_outs);
    let calls: Vec<u32> = insts
        .iter()
        .enumerate()
        .filter(|(_, info)| info.is_call)
        .map(|(i, _)| i as u32)
        .collect();
    assign(classes, &intervals, &calls, env)
}

/// Per-block live-out sets, as one bit per virtual register.
fn compute_liveness(
    num_vregs: usize,
    insts: &[InstInfo],
    blocks: &[BlockRange],
    succs: &[SmallVec<[u32; 2]>],
) -> Vec<BitSet> {
    let mut live_ins: Vec<BitSet> = vec![BitSet::new(num_vregs); blocks.len()];
    let mut live_outs: Vec<BitSet> = vec![BitSet::new(num_vregs); blocks.len()];

    let mut changed = true;
    while changed {
        changed = false;
        for (b, &(start, end)) in blocks.iter().enumerate().rev() {
            let mut live = BitSet::new(num_vregs);
            for &succ in &succs[b] {
                live.union(&live_ins[succ as usize]);
            }
            if live != live_outs[b] {
                live_outs[b] = live.clone();
            }
            for inst in (start..end).rev() {
                let info = &insts[inst as usize];
                for &def in &info.defs {
                    live.remove(def.as_u32() as usize);
                }
                for &used in &info.uses {
                    live.insert(used.as_u32() as usize);
                }
            }
            if live != live_ins[b] {
                live_ins[b] = live;
                changed = true;
            }
        }
    }
    live_outs
}

#[derive(Copy, Clone, Debug)]
struct Interval {
    vreg: u32,
    /// First program point, `2 * inst` for a use, `2 * inst + 1` for a
    /// def.
    start: u32,
    /// Last program point, inclusive.
    end: u32,
}

fn build_intervals(
    num_vregs: usize,
    insts: &[InstInfo],
    blocks: &[BlockRange],
    live_outs: &[BitSet],
) -> Vec<Interval> {
    const UNSET: u32 = u32::MAX;
    let mut starts = vec![UNSET; num_vregs];
    let mut ends = vec![0u32; num_vregs];

    let mut note = |vreg: usize, point: u32| {
        if starts[vreg] == UNSET || point < starts[vreg] {
            starts[vreg] = point;
        }
        if point > ends[vreg] {
            ends[vreg] = point;
        }
    };

    for (b, &(start, end)) in blocks.iter().enumerate() {
        if end > start {
            let block_top = 2 * start;
            let block_bottom = 2 * (end - 1) + 1;
            for vreg in live_outs[b].iter() {
                // Live through the whole block. This is conservative for
                // values defined inside the block, which only costs some
                // register pressure.
                note(vreg, block_top);
                note(vreg, block_bottom);
            }
        }
        for inst in start..end {
            let info = &insts[inst as usize];
            for &used in &info.uses {
                note(used.index(), 2 * inst);
            }
            for &def in &info.defs {
                note(def.index(), 2 * inst + 1);
            }
        }
    }

    let mut intervals: Vec<Interval> = (0..num_vregs)
        .filter(|&v| starts[v] != UNSET)
        .map(|v| Interval { vreg: v as u32, start: starts[v], end: ends[v] })
        .collect();
    intervals.sort_by_key(|interval| interval.start);
    intervals
}

/// Whether an interval is live across any call, meaning a caller-saved
/// register cannot hold it.
fn crosses_call(interval: &Interval, calls: &[u32]) -> bool {
    calls
        .iter()
        .any(|&call| interval.start <= 2 * call && interval.end > 2 * call)
}

struct Active {
    interval: Interval,
    reg: PReg,
    callee_saved: bool,
}

fn assign(
    classes: &[RegClass],
    intervals: &[Interval],
    calls: &[u32],
    env: &MachineEnv,
) -> AllocationResult {
    let mut assignments = vec![Assignment::Spill(0); classes.len()];
    let mut free_caller: Vec<PReg> = env.caller_saved.iter().rev().copied().collect();
    let mut free_callee: Vec<PReg> = env.callee_saved.iter().rev().copied().collect();
    let mut active: Vec<Active> = Vec::new();
    let mut used_callee_saved: Vec<PReg> = Vec::new();
    let mut num_spill_slots = 0u32;

    let mut new_slot = |slots: &mut u32| {
        let slot = *slots;
        *slots += 1;
        slot
    };

    for &interval in intervals {
        let class = classes[interval.vreg as usize];

        // Expire intervals that ended before this one starts.
        active.retain(|entry| {
            if entry.interval.end < interval.start {
                if entry.callee_saved {
                    free_callee.push(entry.reg);
                } else {
                    free_caller.push(entry.reg);
                }
                false
            } else {
                true
            }
        });

        let needs_callee_saved = crosses_call(&interval, calls);
        let pick = |pool: &mut Vec<PReg>| {
            let at = pool.iter().rposition(|reg| reg.class() == class)?;
            Some(pool.remove(at))
        };

        let reg = if needs_callee_saved {
            pick(&mut free_callee).map(|reg| (reg, true))
        } else {
            pick(&mut free_caller)
                .map(|reg| (reg, false))
                .or_else(|| pick(&mut free_callee).map(|reg| (reg, true)))
        };

        if let Some((reg, callee_saved)) = reg {
            if callee_saved && !used_callee_saved.contains(&reg) {
                used_callee_saved.push(reg);
            }
            assignments[interval.vreg as usize] = Assignment::Reg(reg);
            active.push(Active { interval, reg, callee_saved });
            continue;
        }

        // No free register: evict the compatible active interval that
        // ends furthest away, unless this one ends even later.
        let victim = active
            .iter()
            .enumerate()
            .filter(|(_, entry)| {
                entry.reg.class() == class && (!needs_callee_saved || entry.callee_saved)
            })
            .max_by_key(|(_, entry)| entry.interval.end)
            .map(|(at, _)| at);

        match victim {
            Some(at) if active[at].interval.end > interval.end => {
                let evicted = active.remove(at);
                assignments[evicted.interval.vreg as usize] =
                    Assignment::Spill(new_slot(&mut num_spill_slots));
                assignments[interval.vreg as usize] = Assignment::Reg(evicted.reg);
                active.push(Active {
                    interval,
                    reg: evicted.reg,
                    callee_saved: evicted.callee_saved,
                });
            }
            _ => {
                assignments[interval.vreg as usize] =
                    Assignment::Spill(new_slot(&mut num_spill_slots));
            }
        }
    }

    AllocationResult { assignments, used_callee_saved, num_spill_slots }
}

/// A fixed-size bit set over virtual register indices.
#[derive(Clone, PartialEq, Eq)]
struct BitSet {
    words: Vec<u64>,
}

impl BitSet {
    fn new(bits: usize) -> BitSet {
        BitSet { words: vec![0; (bits + 63) / 64] }
    }

    fn insert(&mut self, bit: usize) {
        self.words[bit / 64] |= 1 << (bit % 64);
    }

    fn remove(&mut self, bit: usize) {
        self.words[bit / 64] &= !(1 << (bit % 64));
    }

    fn union(&mut self, other: &BitSet) {
        for (word, &extra) in self.words.iter_mut().zip(other.words.iter()) {
            *word |= extra;
        }
    }

    fn iter(&self) -> impl Iterator<Item = usize> + '_ {
        self.words.iter().enumerate().flat_map(|(at, &word)| {
            (0..64).filter(move |bit| word & (1 << bit) != 0).map(move |bit| at * 64 + bit)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use smallvec::smallvec;

    fn env() -> MachineEnv {
        MachineEnv {
            caller_saved: vec![
                PReg::new(RegClass::Int, 0),
                PReg::new(RegClass::Int, 1),
                PReg::new(RegClass::Float, 8),
            ],
            callee_saved: vec![PReg::new(RegClass::Int, 2), PReg::new(RegClass::Int, 3)],
        }
    }

    fn def(vreg: u32) -> InstInfo {
        InstInfo { defs: smallvec![VReg::from_u32(vreg)], ..Default::default() }
    }

    #[test]
    fn distinct_lifetimes_share_a_register() {
        // v0 = ...; use v0; v1 = ...; use v1
        let insts = vec![
            def(0),
            InstInfo { uses: smallvec![VReg::from_u32(0)], ..Default::default() },
            def(1),
            InstInfo { uses: smallvec![VReg::from_u32(1)], ..Default::default() },
        ];
        let classes = vec![RegClass::Int, RegClass::Int];
        let blocks = vec![(0, 4)];
        let succs = vec![smallvec![]];
        let result = allocate(&classes, &insts, &blocks, &succs, &env());
        assert_eq!(result.assignments[0], result.assignments[1]);
        assert!(matches!(result.assignments[0], Assignment::Reg(_)));
        assert_eq!(result.num_spill_slots, 0);
    }

    #[test]
    fn value_across_call_gets_callee_saved() {
        let insts = vec![
            def(0),
            InstInfo { is_call: true, ..Default::default() },
            InstInfo { uses: smallvec![VReg::from_u32(0)], ..Default::default() },
        ];
        let classes = vec![RegClass::Int];
        let result = allocate(&classes, &insts, &[(0, 3)], &[smallvec![]], &env());
        match result.assignments[0] {
            Assignment::Reg(reg) => {
                assert!(env().callee_saved.contains(&reg));
                assert!(result.used_callee_saved.contains(&reg));
            }
            other => panic!("expected a register, got {other:?}"),
        }
    }

    #[test]
    fn float_across_call_spills() {
        // The only float register is caller-saved.
        let insts = vec![
            def(0),
            InstInfo { is_call: true, ..Default::default() },
            InstInfo { uses: smallvec![VReg::from_u32(0)], ..Default::default() },
        ];
        let classes = vec![RegClass::Float];
        let result = allocate(&classes, &insts, &[(0, 3)], &[smallvec![]], &env());
        assert!(matches!(result.assignments[0], Assignment::Spill(_)));
    }

    #[test]
    fn pressure_forces_a_spill() {
        // Five overlapping int values, four int registers.
        let mut insts: Vec<InstInfo> = (0..5).map(def).collect();
        insts.push(InstInfo {
            uses: (0..5).map(VReg::from_u32).collect(),
            ..Default::default()
        });
        let classes = vec![RegClass::Int; 5];
        let result = allocate(&classes, &insts, &[(0, 6)], &[smallvec![]], &env());
        let spills = result
            .assignments
            .iter()
            .filter(|a| matches!(a, Assignment::Spill(_)))
            .count();
        assert_eq!(spills, 1);
        assert_eq!(result.num_spill_slots, 1);
    }

    #[test]
    fn loop_keeps_values_live_across_the_back_edge() {
        // Block 0 defines v0, block 1 uses it and loops to itself, block
        // 2 uses it again.
        let insts = vec![
            def(0),
            InstInfo { uses: smallvec![VReg::from_u32(0)], ..Default::default() },
            InstInfo { uses: smallvec![VReg::from_u32(0)], ..Default::default() },
        ];
        let classes = vec![RegClass::Int];
        let blocks = vec![(0, 1), (1, 2), (2, 3)];
        let succs: Vec<SmallVec<[u32; 2]>> =
            vec![smallvec![1], smallvec![1, 2], smallvec![]];
        let result = allocate(&classes, &insts, &blocks, &succs, &env());
        assert!(matches!(result.assignments[0], Assignment::Reg(_)));
    }
}
