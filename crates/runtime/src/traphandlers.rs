//! Trap propagation between compiled code, host functions and the
//! embedder.
//!
//! Compiled functions never unwind. They return a status word in the
//! array-call ABI and record what went wrong in a thread-local activation
//! before returning it: trapping instructions call the `raise_trap`
//! builtin, and each frame a failure propagates through appends itself
//! with `push_frame`, which is where backtraces come from. The
//! interpreter and host-to-wasm trampolines feed the same machinery.

use riptide_environ::Trap;
use std::cell::RefCell;

/// Why a wasm activation failed.
#[derive(Debug)]
pub enum TrapReason {
    /// A wasm trap raised by the guest.
    Wasm(Trap),
    /// An error returned by a host function.
    User(anyhow::Error),
}

/// One frame of a wasm backtrace, in raw module terms.
#[derive(Copy, Clone, Debug)]
pub struct RawFrame {
    /// The function index within its module.
    pub func_index: u32,
    /// The module byte offset of the faulting or calling instruction.
    pub wasm_offset: u32,
}

/// A failed activation: the reason plus the wasm frames it unwound
/// through, innermost first.
#[derive(Debug)]
pub struct TrapState {
    pub reason: TrapReason,
    pub frames: Vec<RawFrame>,
}

thread_local! {
    // One entry per live wasm activation on this thread; re-entrant
    // host-to-wasm calls push nested entries.
    static ACTIVATIONS: RefCell<Vec<Option<TrapState>>> = const { RefCell::new(Vec::new()) };
}

/// Runs `f`, a closure that enters wasm through the array-call ABI, and
/// converts a trap status into the recorded [`TrapState`].
pub fn catch_traps<F>(f: F) -> Result<(), Box<TrapState>>
where
    F: FnOnce() -> u32,
{
    ACTIVATIONS.with(|cell| cell.borrow_mut().push(None));
    let status = f();
    let state = ACTIVATIONS.with(|cell| cell.borrow_mut().pop());
    if status == crate::vmcontext::ARRAY_CALL_OK {
        return Ok(());
    }
    match state.flatten() {
        Some(state) => Err(Box::new(state)),
        // A trap status with nothing recorded would be a bug in a
        // trampoline; surface it rather than panic.
        None => Err(Box::new(TrapState {
            reason: TrapReason::User(anyhow::anyhow!(
                "wasm reported a trap without recording one"
            )),
            frames: Vec::new(),
        })),
    }
}

/// Records the reason for the current activation's failure. The first
/// recorded reason wins; later calls only contribute frames.
pub fn record_trap(reason: TrapReason) {
    ACTIVATIONS.with(|cell| {
        let mut activations = cell.borrow_mut();
        match activations.last_mut() {
            Some(slot @ None) => {
                *slot = Some(TrapState { reason, frames: Vec::new() });
            }
            Some(Some(_)) => {}
            None => {
                log::error!("trap recorded outside any wasm activation: {reason:?}");
            }
        }
    });
}

/// Records a wasm trap at the given location.
pub fn record_wasm_trap(trap: Trap, func_index: u32, wasm_offset: u32) {
    record_trap(TrapReason::Wasm(trap));
    push_frame(func_index, wasm_offset);
}

/// Appends one frame to the in-flight trap's backtrace.
pub fn push_frame(func_index: u32, wasm_offset: u32) {
    ACTIVATIONS.with(|cell| {
        let mut activations = cell.borrow_mut();
        if let Some(Some(state)) = activations.last_mut() {
            state.frames.push(RawFrame { func_index, wasm_offset });
        }
    });
}

/// Whether the current activation already has a recorded trap, used by
/// trampolines to decide which status to return.
pub fn has_trap() -> bool {
    ACTIVATIONS.with(|cell| matches!(cell.borrow().last(), Some(Some(_))))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vmcontext::{ARRAY_CALL_OK, ARRAY_CALL_TRAP};

    #[test]
    fn ok_status_discards_nothing() {
        let result = catch_traps(|| ARRAY_CALL_OK);
        assert!(result.is_ok());
    }

    #[test]
    fn trap_with_frames() {
        let err = catch_traps(|| {
            record_wasm_trap(Trap::IntegerDivisionByZero, 3, 0x40);
            push_frame(1, 0x10);
            ARRAY_CALL_TRAP
        })
        .unwrap_err();
        assert!(matches!(err.reason, TrapReason::Wasm(Trap::IntegerDivisionByZero)));
        assert_eq!(err.frames.len(), 2);
        assert_eq!(err.frames[0].func_index, 3);
        assert_eq!(err.frames[1].func_index, 1);
    }

    #[test]
    fn first_reason_wins() {
        let err = catch_traps(|| {
            record_trap(TrapReason::Wasm(Trap::MemoryOutOfBounds));
            record_trap(TrapReason::Wasm(Trap::StackOverflow));
            ARRAY_CALL_TRAP
        })
        .unwrap_err();
        assert!(matches!(err.reason, TrapReason::Wasm(Trap::MemoryOutOfBounds)));
    }

    #[test]
    fn nested_activations_are_independent() {
        let outer = catch_traps(|| {
            let inner = catch_traps(|| {
                record_wasm_trap(Trap::UnreachableCodeReached, 0, 0);
                ARRAY_CALL_TRAP
            });
            assert!(inner.is_err());
            ARRAY_CALL_OK
        });
        assert!(outer.is_ok());
    }
}
