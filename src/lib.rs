//! Memory buffers that toggle between writable and executable modes.
//!
//! This crate provides [`ExecBuffer`], a page-aligned, zero-initialized,
//! anonymously mapped region of memory whose protection can be flipped
//! between read+write and read+execute. That is the primitive a program
//! needs to generate machine code at runtime and then run it in place:
//! write instruction bytes while the buffer is writable, make it
//! executable, and transfer control to the first byte.
//!
//! When writing self-modifying code special care must be taken before the
//! new code is executed. On fully coherent architectures (x86, s390x) the
//! data cache and the instruction cache are always in sync, but on
//! architectures such as AArch64 they are not, and stale instruction-cache
//! entries may be executed in place of the freshly written bytes. Mode
//! transitions here invalidate the instruction cache for the whole mapping
//! before they complete, so callers never need to think about it.
//!
//! [`ExecBuffer::execute`] transfers control to the start of the buffer as
//! a no-argument routine and reports how much process CPU time the run
//! consumed, which makes the buffer directly usable for microbenchmarking
//! generated instruction sequences.
//!
//! # Example
//!
//! ```no_run
//! use execbuf::ExecBuffer;
//!
//! # fn main() -> execbuf::Result<()> {
//! let mut buf = ExecBuffer::with_at_least(64)?;
//!
//! // x86-64: a single `ret`.
//! buf.as_mut_slice()[0] = 0xc3;
//!
//! let elapsed = unsafe { buf.execute()? };
//! println!("returned after {elapsed:?}");
//! # Ok(())
//! # }
//! ```
//!
//! # Ownership and threads
//!
//! A buffer exclusively owns its mapping; the mapping is released when the
//! buffer is dropped, whatever mode it is in. Nothing is synchronized
//! internally. A buffer may be moved to another thread, but writing,
//! transitioning, and executing it are `&mut self` operations on a single
//! owner, and that owner is responsible for any cross-thread coordination.

use core::sync::atomic::{AtomicUsize, Ordering};

mod arch;
mod buffer;
mod error;
mod icache;
mod mmap;
mod sys;
mod view;

pub use buffer::{ExecBuffer, Mode};
pub use error::{Error, Result};
pub use view::{Elements, Pod};

/// Returns the host OS page size, in bytes.
///
/// Buffer lengths are always a multiple of this.
pub fn host_page_size() -> usize {
    static PAGE_SIZE: AtomicUsize = AtomicUsize::new(0);

    match PAGE_SIZE.load(Ordering::Relaxed) {
        0 => {
            let size = sys::get_page_size();
            assert!(size.is_power_of_two());
            PAGE_SIZE.store(size, Ordering::Relaxed);
            size
        }
        n => n,
    }
}
