//! Low-level abstraction for allocating and managing zero-filled,
//! page-aligned pages of memory.

use crate::error::{Error, Result};
use crate::sys;
use std::io;
use std::ptr::NonNull;

/// Round `size` up to the nearest multiple of `page_size`.
///
/// `page_size` must be a power of two. Returns `None` if the rounded value
/// does not fit in a `usize`.
pub(crate) fn round_up_to_page_size(size: usize, page_size: usize) -> Option<usize> {
    debug_assert!(page_size.is_power_of_two());
    Some(size.checked_add(page_size - 1)? & !(page_size - 1))
}

/// A page-aligned pointer to page-aligned, initially zeroed, anonymously
/// mapped memory, together with its length.
///
/// The mapping starts out read+write and is released on drop.
#[derive(Debug)]
pub(crate) struct Mmap {
    ptr: NonNull<u8>,
    len: usize,
}

// The mapping is plain process-global memory; nothing ties it to the
// thread that created it.
unsafe impl Send for Mmap {}

impl Mmap {
    /// Create a new `Mmap` pointing to at least `size` bytes of read+write
    /// memory. A zero `size` is treated as a request for one byte, and the
    /// result is rounded up to the page size.
    pub fn with_at_least(size: usize) -> Result<Self> {
        let page_size = crate::host_page_size();
        let rounded = round_up_to_page_size(size.max(1), page_size)
            .ok_or_else(|| Error::allocation_overflow(size))?;
        let ptr = sys::map_anonymous(rounded).map_err(|source| Error::Allocation {
            size: rounded,
            source,
        })?;
        log::trace!("mapped {rounded:#x} bytes at {ptr:p}");
        Ok(Mmap {
            ptr: NonNull::new(ptr).unwrap(),
            len: rounded,
        })
    }

    #[inline]
    pub fn as_ptr(&self) -> *const u8 {
        self.ptr.as_ptr()
    }

    #[inline]
    pub fn as_mut_ptr(&mut self) -> *mut u8 {
        self.ptr.as_ptr()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Switch the whole mapping to read+write.
    pub fn make_writable(&mut self) -> io::Result<()> {
        unsafe { sys::protect_read_write(self.ptr.as_ptr(), self.len) }
    }

    /// Switch the whole mapping to read+execute.
    ///
    /// # Safety
    ///
    /// It is generally not valid to simply make memory executable; the
    /// caller must ensure the mapping's contents are prepared to be fetched
    /// as instructions before anything jumps into it.
    pub unsafe fn make_executable(&mut self) -> io::Result<()> {
        unsafe { sys::protect_read_exec(self.ptr.as_ptr(), self.len) }
    }
}

impl Drop for Mmap {
    fn drop(&mut self) {
        unsafe {
            sys::unmap(self.ptr.as_ptr(), self.len).expect("munmap failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_up_to_page_size() {
        assert_eq!(round_up_to_page_size(0, 4096), Some(0));
        assert_eq!(round_up_to_page_size(1, 4096), Some(4096));
        assert_eq!(round_up_to_page_size(4096, 4096), Some(4096));
        assert_eq!(round_up_to_page_size(4097, 4096), Some(8192));
        assert_eq!(round_up_to_page_size(usize::MAX, 4096), None);
    }

    #[test]
    fn fresh_mapping_is_aligned_and_zeroed() {
        let page_size = crate::host_page_size();
        let mmap = Mmap::with_at_least(100).expect("allocated memory");
        assert_eq!(mmap.as_ptr() as usize % page_size, 0);
        assert_eq!(mmap.len() % page_size, 0);
        let bytes = unsafe { std::slice::from_raw_parts(mmap.as_ptr(), mmap.len()) };
        assert!(bytes.iter().all(|&b| b == 0));
    }

    #[test]
    fn zero_sized_request_maps_one_page() {
        let mmap = Mmap::with_at_least(0).expect("allocated memory");
        assert_eq!(mmap.len(), crate::host_page_size());
    }
}
