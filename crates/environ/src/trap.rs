//! Trap codes describing the reason guest execution faulted.

use std::fmt;

/// Representation of a WebAssembly trap and what caused it to occur.
///
/// Traps halt guest execution and unwind to the nearest host call
/// boundary, where they are reported as a structured error rather than a
/// process fault. The same codes are used by the interpreter and by
/// compiled code (which transports them as small integers through the
/// trap libcall).
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
#[non_exhaustive]
pub enum Trap {
    /// The current stack space was exhausted.
    StackOverflow,
    /// An out-of-bounds linear-memory access.
    MemoryOutOfBounds,
    /// An atomic operation used a not-naturally-aligned address.
    HeapMisaligned,
    /// An out-of-bounds table access.
    TableOutOfBounds,
    /// An indirect call through a null (uninitialized) table entry.
    IndirectCallToNull,
    /// Signature mismatch on an indirect call.
    BadSignature,
    /// An integer arithmetic operation overflowed.
    IntegerOverflow,
    /// Integer division by zero.
    IntegerDivisionByZero,
    /// A float-to-int conversion had no representable result.
    BadConversionToInteger,
    /// The `unreachable` instruction was reached.
    UnreachableCodeReached,
    /// Execution was interrupted by the embedder.
    Interrupt,
    /// A wait was attempted on a non-shared memory.
    AtomicWaitNonSharedMemory,
}

impl Trap {
    /// All trap codes, used when transporting codes through compiled code.
    const ALL: &'static [Trap] = &[
        Trap::StackOverflow,
        Trap::MemoryOutOfBounds,
        Trap::HeapMisaligned,
        Trap::TableOutOfBounds,
        Trap::IndirectCallToNull,
        Trap::BadSignature,
        Trap::IntegerOverflow,
        Trap::IntegerDivisionByZero,
        Trap::BadConversionToInteger,
        Trap::UnreachableCodeReached,
        Trap::Interrupt,
        Trap::AtomicWaitNonSharedMemory,
    ];

    /// Encode this trap as a small integer for transport through generated
    /// code.
    pub fn as_u32(&self) -> u32 {
        Trap::ALL.iter().position(|t| t == self).unwrap() as u32
    }

    /// Decode a trap previously encoded with [`Trap::as_u32`].
    pub fn from_u32(code: u32) -> Option<Trap> {
        Trap::ALL.get(code as usize).copied()
    }
}

impl fmt::Display for Trap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        use Trap::*;
        let desc = match self {
            StackOverflow => "call stack exhausted",
            MemoryOutOfBounds => "out of bounds memory access",
            HeapMisaligned => "unaligned atomic",
            TableOutOfBounds => "undefined element: out of bounds table access",
            IndirectCallToNull => "uninitialized element",
            BadSignature => "indirect call type mismatch",
            IntegerOverflow => "integer overflow",
            IntegerDivisionByZero => "integer divide by zero",
            BadConversionToInteger => "invalid conversion to integer",
            UnreachableCodeReached => "wasm `unreachable` instruction executed",
            Interrupt => "interrupt",
            AtomicWaitNonSharedMemory => "atomic wait on non-shared memory",
        };
        write!(f, "wasm trap: {desc}")
    }
}

impl std::error::Error for Trap {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip_codes() {
        for trap in Trap::ALL {
            assert_eq!(Trap::from_u32(trap.as_u32()), Some(*trap));
        }
        assert_eq!(Trap::from_u32(Trap::ALL.len() as u32), None);
    }
}
