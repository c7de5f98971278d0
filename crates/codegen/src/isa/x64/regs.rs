//! Register conventions of the x86-64 backend.
//!
//! `r15` permanently holds the vmctx pointer. `rax`, `rcx`, `rdx`, `r10`
//! and `r11` are scratch registers that instruction expansions use
//! freely, as are `xmm0`, `xmm1`, `xmm14` and `xmm15`; none of them are
//! ever handed to the register allocator, so fixed-register operations
//! like division and shifts can always be expanded through them.

use crate::regalloc::{MachineEnv, PReg, RegClass};

pub const RAX: u8 = 0;
pub const RCX: u8 = 1;
pub const RDX: u8 = 2;
pub const RBX: u8 = 3;
pub const RSP: u8 = 4;
pub const RBP: u8 = 5;
pub const RSI: u8 = 6;
pub const RDI: u8 = 7;
pub const R8: u8 = 8;
pub const R9: u8 = 9;
pub const R10: u8 = 10;
pub const R11: u8 = 11;
pub const R12: u8 = 12;
pub const R13: u8 = 13;
pub const R14: u8 = 14;
/// Pinned vmctx register.
pub const R15: u8 = 15;

pub const XMM0: u8 = 0;
pub const XMM1: u8 = 1;
pub const XMM15: u8 = 15;

/// The registers handed to the allocator.
pub fn machine_env() -> MachineEnv {
    let int = |enc| PReg::new(RegClass::Int, enc);
    let float = |enc| PReg::new(RegClass::Float, enc);
    MachineEnv {
        caller_saved: vec![
            int(RSI),
            int(RDI),
            int(R8),
            int(R9),
            float(2),
            float(3),
            float(4),
            float(5),
            float(6),
            float(7),
            float(8),
            float(9),
            float(10),
            float(11),
            float(12),
            float(13),
        ],
        callee_saved: vec![int(RBX), int(R12), int(R13), int(R14)],
    }
}
