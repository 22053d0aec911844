//! The writable/executable code buffer.

use crate::arch;
use crate::error::{Error, Result};
use crate::icache;
use crate::mmap::Mmap;
use crate::sys;
use crate::view::{Elements, Pod};
use std::fmt;
use std::mem;
use std::time::Duration;

/// The protection currently applied to a buffer's mapping.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Mode {
    /// The mapping is readable and writable; code can be written but not
    /// executed.
    Writable,
    /// The mapping is readable and executable; code can be executed but
    /// not changed.
    Executable,
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Mode::Writable => "writable",
            Mode::Executable => "executable",
        })
    }
}

/// A page-aligned, zero-initialized memory buffer that can be toggled
/// between writable and executable modes.
///
/// The buffer is backed by its own anonymous, process-private mapping, so
/// protection changes never affect memory used by other parts of the
/// program. It is created in [`Mode::Writable`]; fill it with instruction
/// bytes through [`as_mut_slice`](Self::as_mut_slice) or a typed
/// [`elements`](Self::elements) view, then run it with
/// [`execute`](Self::execute). The tracked mode always matches the
/// protection the OS has applied to the mapping.
///
/// The mapping is released when the buffer is dropped, whatever mode it is
/// in at that point.
#[derive(Debug)]
pub struct ExecBuffer {
    mmap: Mmap,
    mode: Mode,
}

fn _assert() {
    fn _assert_send<T: Send>() {}
    _assert_send::<ExecBuffer>();
}

impl ExecBuffer {
    /// Creates a buffer of at least `size` bytes, in [`Mode::Writable`],
    /// with every byte zero.
    ///
    /// The allocated length is the smallest page-size multiple that covers
    /// the request; a zero `size` is treated as a request for one byte.
    ///
    /// # Errors
    ///
    /// [`Error::Allocation`] if the OS mapping call fails.
    pub fn with_at_least(size: usize) -> Result<ExecBuffer> {
        let mmap = Mmap::with_at_least(size)?;
        Ok(ExecBuffer {
            mmap,
            mode: Mode::Writable,
        })
    }

    /// Creates a buffer able to hold at least `count` elements of `T`.
    ///
    /// Equivalent to [`with_at_least`](Self::with_at_least) with
    /// `count * size_of::<T>()` bytes.
    pub fn for_elements<T: Pod>(count: usize) -> Result<ExecBuffer> {
        let size = count
            .checked_mul(mem::size_of::<T>())
            .ok_or_else(|| Error::allocation_overflow(usize::MAX))?;
        ExecBuffer::with_at_least(size)
    }

    /// Length in bytes of the allocated mapping.
    ///
    /// Always a positive multiple of [`host_page_size`](crate::host_page_size),
    /// possibly larger than the length requested at construction.
    #[inline]
    pub fn len(&self) -> usize {
        self.mmap.len()
    }

    /// The buffer's current protection mode.
    #[inline]
    pub fn mode(&self) -> Mode {
        self.mode
    }

    /// Raw base address of the buffer.
    #[inline]
    pub fn as_ptr(&self) -> *const u8 {
        self.mmap.as_ptr()
    }

    /// Raw mutable base address of the buffer.
    ///
    /// Stores through the pointer are only permitted by the OS while the
    /// buffer is [`Mode::Writable`].
    #[inline]
    pub fn as_mut_ptr(&mut self) -> *mut u8 {
        self.mmap.as_mut_ptr()
    }

    /// The whole buffer as a byte slice.
    ///
    /// Reads are valid in either mode; the contents start out zeroed.
    pub fn as_slice(&self) -> &[u8] {
        unsafe { std::slice::from_raw_parts(self.mmap.as_ptr(), self.mmap.len()) }
    }

    /// The whole buffer as a mutable byte slice.
    ///
    /// The buffer must be [`Mode::Writable`] when the slice is written
    /// through; a store to an executable mapping faults.
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        debug_assert_eq!(self.mode, Mode::Writable);
        unsafe { std::slice::from_raw_parts_mut(self.mmap.as_mut_ptr(), self.mmap.len()) }
    }

    /// A typed view of the buffer as an array of `T`.
    pub fn elements<T: Pod>(&mut self) -> Elements<'_, T> {
        Elements::new(self)
    }

    /// Makes the buffer executable (read+execute). A no-op if it already
    /// is.
    ///
    /// The instruction cache for the whole mapping is invalidated before
    /// this returns, so code written while the buffer was writable is
    /// visible to instruction fetch.
    ///
    /// # Errors
    ///
    /// [`Error::Protection`] if the OS permission change fails; the buffer
    /// stays writable.
    pub fn set_executable(&mut self) -> Result<()> {
        if self.mode == Mode::Executable {
            return Ok(());
        }
        unsafe { self.mmap.make_executable() }.map_err(|source| Error::Protection {
            mode: Mode::Executable,
            source,
        })?;
        self.flush_icache();
        self.mode = Mode::Executable;
        log::trace!("buffer at {:p} is now executable", self.mmap.as_ptr());
        Ok(())
    }

    /// Makes the buffer writable (read+write). A no-op if it already is.
    ///
    /// The instruction cache is invalidated here as well, so a subsequent
    /// rewrite-and-execute of the same region never observes stale
    /// instruction bytes.
    ///
    /// # Errors
    ///
    /// [`Error::Protection`] if the OS permission change fails; the buffer
    /// stays executable.
    pub fn set_writable(&mut self) -> Result<()> {
        if self.mode == Mode::Writable {
            return Ok(());
        }
        self.mmap.make_writable().map_err(|source| Error::Protection {
            mode: Mode::Writable,
            source,
        })?;
        self.flush_icache();
        self.mode = Mode::Writable;
        log::trace!("buffer at {:p} is now writable", self.mmap.as_ptr());
        Ok(())
    }

    /// Runs the buffer's contents as machine code and returns how much
    /// process CPU time the run consumed.
    ///
    /// The buffer is first made executable if it is not already, with the
    /// same cache maintenance as [`set_executable`](Self::set_executable).
    /// Control then transfers to the first byte of the buffer as a
    /// no-argument routine. The call blocks until the generated code
    /// returns; there is no timeout. The monotonic per-process CPU-time
    /// clock is sampled on either side of the transfer and the difference
    /// is returned at nanosecond resolution.
    ///
    /// # Errors
    ///
    /// [`Error::UnsupportedArchitecture`] if the host CPU has no
    /// control-transfer implementation, returned before any mode change or
    /// clock sample; [`Error::Protection`] if the mapping could not be
    /// made executable.
    ///
    /// # Safety
    ///
    /// The buffer must contain machine code for the host CPU that, when
    /// entered at offset 0, eventually executes a return instruction and
    /// behaves as a no-argument C-ABI function in every other respect
    /// (callee-saved registers, stack discipline). Executing a freshly
    /// constructed, still-zeroed buffer is undefined behavior, as is code
    /// that runs off the end of the mapping. Code that never returns
    /// leaves this call blocked forever.
    pub unsafe fn execute(&mut self) -> Result<Duration> {
        let invoke = arch::invoker()?;
        self.set_executable()?;

        let start = sys::process_cpu_time();
        unsafe { invoke(self.mmap.as_ptr()) };
        let end = sys::process_cpu_time();

        let elapsed = end.saturating_sub(start);
        log::debug!(
            "executed {} byte buffer at {:p} in {elapsed:?}",
            self.mmap.len(),
            self.mmap.as_ptr(),
        );
        Ok(elapsed)
    }

    fn flush_icache(&self) {
        // The flush has no failure mode this abstraction reports; the
        // windows primitive is fallible on paper but cannot fail for the
        // current process over a mapping we own.
        icache::clear_cache(self.mmap.as_ptr(), self.mmap.len())
            .expect("failed to flush the instruction cache");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocation_rounds_up_to_page_size() {
        let page_size = crate::host_page_size();
        for request in [0, 1, 100, page_size - 1, page_size, page_size + 1] {
            let buf = ExecBuffer::with_at_least(request).expect("allocated buffer");
            let expected = request.max(1).div_ceil(page_size) * page_size;
            assert_eq!(buf.len(), expected, "request of {request} bytes");
        }
    }

    #[test]
    fn fresh_buffer_is_writable_and_zeroed() {
        let buf = ExecBuffer::with_at_least(4096).expect("allocated buffer");
        assert_eq!(buf.mode(), Mode::Writable);
        assert!(buf.as_slice().iter().all(|&b| b == 0));
    }

    #[test]
    fn for_elements_covers_the_requested_count() {
        let buf = ExecBuffer::for_elements::<u64>(1000).expect("allocated buffer");
        assert!(buf.len() >= 1000 * std::mem::size_of::<u64>());
    }

    #[test]
    fn mode_transitions_round_trip() {
        let mut buf = ExecBuffer::with_at_least(4096).expect("allocated buffer");

        buf.set_executable().expect("made executable");
        assert_eq!(buf.mode(), Mode::Executable);
        // Reads stay valid in executable mode.
        assert_eq!(buf.as_slice()[0], 0);

        buf.set_writable().expect("made writable");
        assert_eq!(buf.mode(), Mode::Writable);

        // The buffer is usable for writes again after the round trip.
        buf.as_mut_slice()[0] = 0xaa;
        assert_eq!(buf.as_slice()[0], 0xaa);
    }

    #[test]
    fn mode_transitions_are_idempotent() {
        let mut buf = ExecBuffer::with_at_least(4096).expect("allocated buffer");

        buf.set_writable().expect("no-op stays writable");
        assert_eq!(buf.mode(), Mode::Writable);

        buf.set_executable().expect("made executable");
        buf.set_executable().expect("no-op stays executable");
        assert_eq!(buf.mode(), Mode::Executable);

        buf.set_writable().expect("made writable");
        assert_eq!(buf.mode(), Mode::Writable);
    }

    #[test]
    fn drop_releases_the_mapping_in_either_mode() {
        let buf = ExecBuffer::with_at_least(4096).expect("allocated buffer");
        drop(buf);

        let mut buf = ExecBuffer::with_at_least(4096).expect("allocated buffer");
        buf.set_executable().expect("made executable");
        drop(buf);
    }
}
