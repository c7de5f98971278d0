//! Page-granular allocations with separate reserve and commit steps.

use anyhow::{Context, Result};

/// Rounds `size` up to the host page size.
pub fn round_up_to_page_size(size: usize) -> usize {
    let page = page_size();
    (size + (page - 1)) & !(page - 1)
}

/// The host page size.
pub fn page_size() -> usize {
    cfg_if::cfg_if! {
        if #[cfg(unix)] {
            rustix::param::page_size()
        } else {
            0x1000
        }
    }
}

/// A page-aligned, initially zeroed allocation.
///
/// On unix the full `reserved` range is mapped `PROT_NONE` up front and
/// pages become readable and writable only through
/// [`make_accessible`](Mmap::make_accessible), which is what lets linear
/// memories grow in place without ever moving their base. Elsewhere the
/// whole range is allocated accessible from the start.
#[derive(Debug)]
pub struct Mmap {
    // Stored as `usize` so the type is `Send` and `Sync` without an
    // `unsafe impl`; the OS handles all cross-thread coordination.
    ptr: usize,
    len: usize,
}

impl Mmap {
    /// An empty mapping.
    pub fn new() -> Mmap {
        let empty = Vec::<u8>::new();
        Mmap { ptr: empty.as_ptr() as usize, len: 0 }
    }

    /// Reserves `reserved` bytes of address space and makes the first
    /// `accessible` bytes readable and writable. Both must be multiples
    /// of the page size.
    pub fn accessible_reserved(accessible: usize, reserved: usize) -> Result<Mmap> {
        assert!(accessible <= reserved);
        assert_eq!(accessible % page_size(), 0);
        assert_eq!(reserved % page_size(), 0);
        if reserved == 0 {
            return Ok(Mmap::new());
        }

        cfg_if::cfg_if! {
            if #[cfg(unix)] {
                use rustix::mm::{mmap_anonymous, MapFlags, ProtFlags};
                let ptr = unsafe {
                    mmap_anonymous(
                        std::ptr::null_mut(),
                        reserved,
                        ProtFlags::empty(),
                        MapFlags::PRIVATE,
                    )
                    .context(format!("failed to reserve {reserved:#x} bytes"))?
                };
                let mut map = Mmap { ptr: ptr as usize, len: reserved };
                if accessible > 0 {
                    map.make_accessible(0, accessible)?;
                }
                Ok(map)
            } else {
                let _ = accessible;
                let mut vec = vec![0u8; reserved];
                let map = Mmap { ptr: vec.as_mut_ptr() as usize, len: reserved };
                std::mem::forget(vec);
                Ok(map)
            }
        }
    }

    /// Makes `[start, start + len)` readable and writable. Both bounds
    /// must be page-aligned and inside the reservation.
    pub fn make_accessible(&mut self, start: usize, len: usize) -> Result<()> {
        assert_eq!(start % page_size(), 0);
        assert_eq!(len % page_size(), 0);
        assert!(start.checked_add(len).map_or(false, |end| end <= self.len));

        cfg_if::cfg_if! {
            if #[cfg(unix)] {
                use rustix::mm::{mprotect, MprotectFlags};
                unsafe {
                    mprotect(
                        (self.ptr + start) as *mut std::ffi::c_void,
                        len,
                        MprotectFlags::READ | MprotectFlags::WRITE,
                    )
                    .context("mprotect failed")?;
                }
                Ok(())
            } else {
                // The whole reservation is already accessible.
                Ok(())
            }
        }
    }

    /// Marks `[start, start + len)` readable and executable, for
    /// publishing compiled code.
    pub fn make_executable(&mut self, start: usize, len: usize) -> Result<()> {
        assert_eq!(start % page_size(), 0);
        assert!(start.checked_add(len).map_or(false, |end| end <= self.len));

        cfg_if::cfg_if! {
            if #[cfg(unix)] {
                use rustix::mm::{mprotect, MprotectFlags};
                unsafe {
                    mprotect(
                        (self.ptr + start) as *mut std::ffi::c_void,
                        round_up_to_page_size(len),
                        MprotectFlags::READ | MprotectFlags::EXEC,
                    )
                    .context("mprotect failed")?;
                }
                Ok(())
            } else {
                let _ = len;
                anyhow::bail!("executable mappings are not supported on this platform")
            }
        }
    }

    /// The base of the mapping.
    pub fn as_ptr(&self) -> *const u8 {
        self.ptr as *const u8
    }

    /// The base of the mapping, mutably.
    pub fn as_mut_ptr(&mut self) -> *mut u8 {
        self.ptr as *mut u8
    }

    /// The size of the reservation in bytes.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether the mapping is empty.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl Drop for Mmap {
    fn drop(&mut self) {
        if self.len == 0 {
            return;
        }
        cfg_if::cfg_if! {
            if #[cfg(unix)] {
                unsafe {
                    let _ = rustix::mm::munmap(self.ptr as *mut std::ffi::c_void, self.len);
                }
            } else {
                unsafe {
                    drop(Vec::from_raw_parts(self.ptr as *mut u8, self.len, self.len));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reserve_then_commit() {
        let page = page_size();
        let mut map = Mmap::accessible_reserved(page, 4 * page).unwrap();
        assert_eq!(map.len(), 4 * page);
        unsafe {
            *map.as_mut_ptr() = 7;
            assert_eq!(*map.as_ptr(), 7);
        }
        map.make_accessible(page, page).unwrap();
        unsafe {
            *map.as_mut_ptr().add(page) = 9;
            assert_eq!(*map.as_ptr().add(page), 9);
        }
    }

    #[test]
    fn rounding() {
        let page = page_size();
        assert_eq!(round_up_to_page_size(0), 0);
        assert_eq!(round_up_to_page_size(1), page);
        assert_eq!(round_up_to_page_size(page), page);
        assert_eq!(round_up_to_page_size(page + 1), 2 * page);
    }
}
