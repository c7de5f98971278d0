//! Linear memory.

use crate::mmap::{round_up_to_page_size, Mmap};
use crate::vmcontext::VMMemoryDefinition;
use anyhow::{bail, Context, Result};
use riptide_environ::{WASM_MAX_PAGES, WASM_PAGE_SIZE};
use std::ptr::NonNull;
use std::sync::atomic::{AtomicUsize, Ordering};

enum Storage {
    /// The full maximum is reserved up front and pages are committed as
    /// the memory grows, so the base address never changes.
    Static { mmap: Mmap },
    /// Plainly allocated bytes which may move on growth. Used where page
    /// mapping is unavailable; only the interpreter runs there.
    Dynamic { bytes: Vec<u8> },
}

/// A linear memory instance.
///
/// The current base pointer and byte length are published through a boxed
/// [`VMMemoryDefinition`] whose address stays stable for the life of the
/// memory, which is what instances (and, for shared memories, other
/// instances' contexts) point at.
pub struct Memory {
    storage: Storage,
    maximum_pages: u64,
    shared: bool,
    def: Box<VMMemoryDefinition>,
}

impl Memory {
    /// Creates a memory for the given declaration, capped at
    /// `limit_pages` on top of the declared maximum.
    pub fn new(plan: &riptide_environ::Memory, limit_pages: u64) -> Result<Memory> {
        let limit_pages = limit_pages.min(WASM_MAX_PAGES);
        if plan.minimum > limit_pages {
            bail!(
                "memory minimum of {} pages exceeds the limit of {limit_pages} pages",
                plan.minimum
            );
        }
        let minimum_bytes = usize::try_from(plan.minimum * WASM_PAGE_SIZE)
            .ok()
            .context("memory minimum too large for this platform")?;
        let maximum_pages = plan.maximum.unwrap_or(limit_pages).min(limit_pages);
        let maximum_bytes = usize::try_from(maximum_pages * WASM_PAGE_SIZE)
            .ok()
            .context("memory maximum too large for this platform")?;

        let mut storage = if cfg!(unix) {
            let accessible = round_up_to_page_size(minimum_bytes);
            let reserved = round_up_to_page_size(maximum_bytes);
            Storage::Static {
                mmap: Mmap::accessible_reserved(accessible, reserved)?,
            }
        } else {
            Storage::Dynamic { bytes: vec![0; minimum_bytes] }
        };

        let base = match &mut storage {
            Storage::Static { mmap } => mmap.as_mut_ptr(),
            Storage::Dynamic { bytes } => bytes.as_mut_ptr(),
        };
        Ok(Memory {
            storage,
            maximum_pages,
            shared: plan.shared,
            def: Box::new(VMMemoryDefinition {
                base,
                current_length: AtomicUsize::new(minimum_bytes),
            }),
        })
    }

    /// The current size in wasm pages.
    pub fn size(&self) -> u64 {
        self.def.current_length() as u64 / WASM_PAGE_SIZE
    }

    /// The current size in bytes.
    pub fn byte_size(&self) -> usize {
        self.def.current_length()
    }

    /// Whether this is a shared memory.
    pub fn is_shared(&self) -> bool {
        self.shared
    }

    /// The base pointer. Stable for static storage; invalidated by growth
    /// for dynamic storage.
    pub fn base(&self) -> *mut u8 {
        self.def.base
    }

    /// The published definition. The pointee's address is stable for the
    /// life of the memory.
    pub fn definition(&self) -> NonNull<VMMemoryDefinition> {
        NonNull::from(&*self.def)
    }

    /// Grows the memory by `delta` pages, returning the previous size in
    /// pages, or `None` if the limits do not allow the growth.
    pub fn grow(&mut self, delta: u64) -> Result<Option<u64>> {
        let old_pages = self.size();
        let new_pages = match old_pages.checked_add(delta) {
            Some(pages) if pages <= self.maximum_pages => pages,
            _ => return Ok(None),
        };
        if delta == 0 {
            return Ok(Some(old_pages));
        }
        let new_bytes = usize::try_from(new_pages * WASM_PAGE_SIZE)
            .ok()
            .context("memory size overflows this platform")?;

        match &mut self.storage {
            Storage::Static { mmap } => {
                let old_committed = round_up_to_page_size(self.def.current_length());
                let new_committed = round_up_to_page_size(new_bytes);
                if new_committed > mmap.len() {
                    return Ok(None);
                }
                if new_committed > old_committed {
                    mmap.make_accessible(old_committed, new_committed - old_committed)?;
                }
            }
            Storage::Dynamic { bytes } => {
                bytes.resize(new_bytes, 0);
                self.def.base = bytes.as_mut_ptr();
            }
        }
        // Release so a racing reader of a shared memory's length never
        // observes the new length before the pages are committed.
        self.def.current_length.store(new_bytes, Ordering::Release);
        Ok(Some(old_pages))
    }

    /// Copies `bytes` into the memory at `offset`, as used by active data
    /// segments. The caller has already bounds-checked the range.
    ///
    /// # Safety
    /// `offset + bytes.len()` must not exceed the current byte size.
    pub unsafe fn write_unchecked(&mut self, offset: usize, bytes: &[u8]) {
        debug_assert!(offset + bytes.len() <= self.byte_size());
        std::ptr::copy_nonoverlapping(bytes.as_ptr(), self.def.base.add(offset), bytes.len());
    }
}

impl std::fmt::Debug for Memory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Memory")
            .field("pages", &self.size())
            .field("maximum_pages", &self.maximum_pages)
            .field("shared", &self.shared)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plan(minimum: u64, maximum: Option<u64>) -> riptide_environ::Memory {
        riptide_environ::Memory { minimum, maximum, shared: false }
    }

    #[test]
    fn grow_within_limits() {
        let mut memory = Memory::new(&plan(1, Some(3)), WASM_MAX_PAGES).unwrap();
        assert_eq!(memory.size(), 1);
        assert_eq!(memory.grow(1).unwrap(), Some(1));
        assert_eq!(memory.size(), 2);
        assert_eq!(memory.grow(1).unwrap(), Some(2));
        assert_eq!(memory.grow(1).unwrap(), None);
        assert_eq!(memory.size(), 3);
    }

    #[test]
    fn grow_by_zero() {
        let mut memory = Memory::new(&plan(2, Some(2)), WASM_MAX_PAGES).unwrap();
        assert_eq!(memory.grow(0).unwrap(), Some(2));
        assert_eq!(memory.size(), 2);
    }

    #[cfg(unix)]
    #[test]
    fn base_is_stable_across_growth() {
        let mut memory = Memory::new(&plan(1, Some(16)), WASM_MAX_PAGES).unwrap();
        let base = memory.base();
        memory.grow(15).unwrap().unwrap();
        assert_eq!(memory.base(), base);
    }

    #[test]
    fn limit_caps_minimum_and_growth() {
        assert!(Memory::new(&plan(3, None), 2).is_err());
        let mut memory = Memory::new(&plan(1, None), 2).unwrap();
        assert_eq!(memory.grow(1).unwrap(), Some(1));
        assert_eq!(memory.grow(1).unwrap(), None);
    }

    #[test]
    fn contents_survive_growth() {
        let mut memory = Memory::new(&plan(1, None), WASM_MAX_PAGES).unwrap();
        unsafe {
            memory.write_unchecked(100, b"hello");
        }
        memory.grow(1).unwrap().unwrap();
        let slice = unsafe { std::slice::from_raw_parts(memory.base().add(100), 5) };
        assert_eq!(slice, b"hello");
    }
}
