//! Executable memory for compiled code.

use crate::mmap::{round_up_to_page_size, Mmap};
use anyhow::{Context, Result};

/// A block of memory holding compiled code.
///
/// The block starts writable so relocations can be patched in place;
/// [`publish`](CodeMemory::publish) flips it to read-execute, after which
/// it can no longer be modified.
pub struct CodeMemory {
    mmap: Mmap,
    len: usize,
    published: bool,
}

impl CodeMemory {
    /// Allocates a writable block containing a copy of `code`.
    pub fn new(code: &[u8]) -> Result<CodeMemory> {
        let size = round_up_to_page_size(code.len().max(1));
        let mut mmap = Mmap::accessible_reserved(size, size)
            .context("failed to allocate code memory")?;
        unsafe {
            std::ptr::copy_nonoverlapping(code.as_ptr(), mmap.as_mut_ptr(), code.len());
        }
        Ok(CodeMemory { mmap, len: code.len(), published: false })
    }

    /// The code bytes, for patching relocations. Panics if already
    /// published.
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        assert!(!self.published, "code memory is already executable");
        unsafe { std::slice::from_raw_parts_mut(self.mmap.as_mut_ptr(), self.len) }
    }

    /// Makes the block executable.
    pub fn publish(&mut self) -> Result<()> {
        assert!(!self.published);
        self.published = true;
        self.mmap.make_executable(0, self.mmap.len())?;
        Ok(())
    }

    /// The start of the code.
    pub fn as_ptr(&self) -> *const u8 {
        self.mmap.as_ptr()
    }

    /// The length of the code in bytes.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether the block is empty.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Whether `pc` points into this block.
    pub fn contains(&self, pc: usize) -> bool {
        let start = self.mmap.as_ptr() as usize;
        pc >= start && pc < start + self.len
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn copy_and_patch() {
        let mut code = CodeMemory::new(&[0x90, 0x90, 0xc3]).unwrap();
        code.as_mut_slice()[1] = 0xcc;
        assert_eq!(unsafe { *code.as_ptr().add(1) }, 0xcc);
        assert_eq!(code.len(), 3);
    }

    #[cfg(all(unix, target_arch = "x86_64"))]
    #[test]
    fn publish_and_execute() {
        // mov eax, 42; ret
        let mut code = CodeMemory::new(&[0xb8, 0x2a, 0x00, 0x00, 0x00, 0xc3]).unwrap();
        code.publish().unwrap();
        let f: extern "C" fn() -> u32 = unsafe { std::mem::transmute(code.as_ptr()) };
        assert_eq!(f(), 42);
    }
}
